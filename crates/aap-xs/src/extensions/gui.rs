//! GUI extension. Only the protocol is carried; rendering belongs to the plugin.

use super::midi::{read_plugin_id, write_plugin_id, MAX_PLUGIN_ID_SIZE};
use super::{unknown_opcode, RequestContext};
use crate::dispatcher::InitiatorInstance;
use crate::error::Result;
use std::sync::Arc;

pub const GUI_EXTENSION_URI: &str = "urn://androidaudioplugin.org/extensions/gui/v1";

pub const GUI_SHARED_MEMORY_SIZE: usize = MAX_PLUGIN_ID_SIZE + 4 + 8;

pub const OPCODE_CREATE_GUI: i32 = 1;
pub const OPCODE_SHOW_GUI: i32 = 2;
pub const OPCODE_HIDE_GUI: i32 = 3;
pub const OPCODE_RESIZE_GUI: i32 = 4;
pub const OPCODE_DESTROY_GUI: i32 = 5;

pub const GUI_RESULT_OK: i32 = 0;
pub const GUI_ERROR_UNSPECIFIED: i32 = 1;

pub trait GuiExtension: Send {
    /// Returns the new GUI instance id, or a negative value on failure.
    fn create(&mut self, plugin_id: &str, instance_id: i32) -> i32;

    fn show(&mut self, gui_id: i32) -> i32;

    fn hide(&mut self, gui_id: i32) -> i32;

    fn resize(&mut self, gui_id: i32, width: i32, height: i32) -> i32;

    fn destroy(&mut self, gui_id: i32) -> i32;
}

pub(crate) fn handle_request(
    ext: Option<&mut dyn GuiExtension>,
    ctx: &RequestContext<'_>,
) -> Option<usize> {
    let s = ctx.serialization;
    let result = match ctx.opcode {
        OPCODE_CREATE_GUI => {
            let (plugin_id, end) = read_plugin_id(ctx, 0);
            let instance_id = s.read_i32(end).unwrap_or(-1);
            ext.map_or(-1, |e| e.create(&plugin_id, instance_id))
        }
        OPCODE_SHOW_GUI | OPCODE_HIDE_GUI | OPCODE_DESTROY_GUI => {
            let gui_id = s.read_i32(0).unwrap_or(-1);
            match ext {
                Some(e) if ctx.opcode == OPCODE_SHOW_GUI => e.show(gui_id),
                Some(e) if ctx.opcode == OPCODE_HIDE_GUI => e.hide(gui_id),
                Some(e) => e.destroy(gui_id),
                None => GUI_ERROR_UNSPECIFIED,
            }
        }
        OPCODE_RESIZE_GUI => {
            let gui_id = s.read_i32(0).unwrap_or(-1);
            let width = s.read_i32(4).unwrap_or(0);
            let height = s.read_i32(8).unwrap_or(0);
            ext.map_or(GUI_ERROR_UNSPECIFIED, |e| e.resize(gui_id, width, height))
        }
        _ => return unknown_opcode(ctx),
    };
    s.write_i32(0, result);
    Some(4)
}

#[derive(Clone)]
pub struct GuiClient {
    initiator: Arc<InitiatorInstance>,
}

impl GuiClient {
    pub fn new(initiator: Arc<InitiatorInstance>) -> Self {
        Self { initiator }
    }

    fn call(&self, opcode: i32, write: impl FnOnce(&crate::serialization::SerializationContext) -> usize) -> Result<i32> {
        self.initiator.call_typed_function_synchronously(opcode, write, |s, _| {
            s.read_i32(0)
                .ok_or_else(|| self.initiator.malformed(opcode, "no result"))
        })
    }

    pub fn create(&self, plugin_id: &str, instance_id: i32) -> Result<i32> {
        self.call(OPCODE_CREATE_GUI, |s| {
            let end = write_plugin_id(s, 0, plugin_id);
            s.write_i32(end, instance_id);
            end + 4
        })
    }

    fn call_with_id(&self, opcode: i32, gui_id: i32) -> Result<i32> {
        self.call(opcode, |s| {
            s.write_i32(0, gui_id);
            4
        })
    }

    pub fn show(&self, gui_id: i32) -> Result<i32> {
        self.call_with_id(OPCODE_SHOW_GUI, gui_id)
    }

    pub fn hide(&self, gui_id: i32) -> Result<i32> {
        self.call_with_id(OPCODE_HIDE_GUI, gui_id)
    }

    pub fn resize(&self, gui_id: i32, width: i32, height: i32) -> Result<i32> {
        self.call(OPCODE_RESIZE_GUI, |s| {
            s.write_i32(0, gui_id);
            s.write_i32(4, width);
            s.write_i32(8, height);
            12
        })
    }

    pub fn destroy(&self, gui_id: i32) -> Result<i32> {
        self.call_with_id(OPCODE_DESTROY_GUI, gui_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extensions::testing::initiator_for;
    use crate::extensions::PluginExtensions;
    use crate::registry::ExtensionKind;

    #[derive(Default)]
    struct Editor {
        visible: bool,
        size: (i32, i32),
        created_for: Option<(String, i32)>,
    }

    impl GuiExtension for Editor {
        fn create(&mut self, plugin_id: &str, instance_id: i32) -> i32 {
            self.created_for = Some((plugin_id.to_string(), instance_id));
            7
        }

        fn show(&mut self, gui_id: i32) -> i32 {
            if gui_id != 7 {
                return GUI_ERROR_UNSPECIFIED;
            }
            self.visible = true;
            GUI_RESULT_OK
        }

        fn hide(&mut self, _gui_id: i32) -> i32 {
            self.visible = false;
            GUI_RESULT_OK
        }

        fn resize(&mut self, _gui_id: i32, width: i32, height: i32) -> i32 {
            self.size = (width, height);
            GUI_RESULT_OK
        }

        fn destroy(&mut self, _gui_id: i32) -> i32 {
            GUI_RESULT_OK
        }
    }

    impl PluginExtensions for Editor {
        fn gui(&mut self) -> Option<&mut dyn GuiExtension> {
            Some(self)
        }
    }

    #[test]
    fn test_gui_lifecycle() {
        let (initiator, sender) = initiator_for(ExtensionKind::Gui, Editor::default());
        let client = GuiClient::new(initiator);

        let gui_id = client.create("org.example.synth", 3).unwrap();
        assert_eq!(gui_id, 7);
        assert_eq!(client.show(gui_id).unwrap(), GUI_RESULT_OK);
        assert_eq!(client.show(99).unwrap(), GUI_ERROR_UNSPECIFIED);
        assert_eq!(client.resize(gui_id, 640, 480).unwrap(), GUI_RESULT_OK);
        assert_eq!(client.hide(gui_id).unwrap(), GUI_RESULT_OK);
        assert_eq!(client.destroy(gui_id).unwrap(), GUI_RESULT_OK);

        let editor = sender.plugin.lock();
        assert!(!editor.visible);
        assert_eq!(editor.size, (640, 480));
        assert_eq!(editor.created_for, Some(("org.example.synth".to_string(), 3)));
    }
}
