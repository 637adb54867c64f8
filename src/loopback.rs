//! In-process [`DirectChannel`] that drives [`LocalPluginInstance`]s on the calling thread.

use crate::context::HostContext;
use crate::error::Error;
use crate::instance::LocalPluginInstance;
use crate::plugin::PluginFactory;
use aap_xs::{BufferHandle, DirectChannel, ExtensionMessage, XsError};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;

type SharedInstance = Arc<Mutex<LocalPluginInstance>>;

/// Service endpoint living in the host's own process.
///
/// Each call locks the target instance for its duration, so a blocking extension call and
/// `process` never run concurrently on one instance.
pub struct LoopbackChannel {
    context: Arc<HostContext>,
    factory: Box<dyn PluginFactory>,
    instances: RwLock<HashMap<i32, SharedInstance>>,
}

impl LoopbackChannel {
    pub fn new(context: Arc<HostContext>, factory: impl PluginFactory + 'static) -> Self {
        Self {
            context,
            factory: Box::new(factory),
            instances: RwLock::new(HashMap::new()),
        }
    }

    /// The service-side instance, for embedders that drive the plugin directly (for example to
    /// send host notifications).
    pub fn instance(&self, instance_id: i32) -> Option<SharedInstance> {
        self.instances.read().get(&instance_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.instances.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.read().is_empty()
    }

    fn with_instance<R>(
        &self,
        instance_id: i32,
        f: impl FnOnce(&mut LocalPluginInstance) -> crate::Result<R>,
    ) -> aap_xs::Result<R> {
        let instance = self
            .instance(instance_id)
            .ok_or(XsError::UnknownInstance(instance_id))?;
        let mut instance = instance.lock();
        f(&mut instance).map_err(XsError::from)
    }
}

impl DirectChannel for LoopbackChannel {
    fn instantiate(&self, plugin_id: &str, sample_rate: u32) -> aap_xs::Result<i32> {
        let plugin = self
            .factory
            .create(plugin_id, sample_rate)
            .ok_or_else(|| XsError::from(Error::PluginNotFound(plugin_id.to_string())))?;
        let instance_id = self.context.allocate_instance_id();
        let instance =
            LocalPluginInstance::new(Arc::clone(&self.context), instance_id, plugin_id, plugin);
        self.instances
            .write()
            .insert(instance_id, Arc::new(Mutex::new(instance)));
        Ok(instance_id)
    }

    fn add_extension(&self, instance_id: i32, uri: &str, buffer: &BufferHandle) -> aap_xs::Result<()> {
        self.with_instance(instance_id, |instance| instance.add_extension(uri, buffer))
    }

    fn complete_instantiation(&self, instance_id: i32) -> aap_xs::Result<()> {
        self.with_instance(instance_id, LocalPluginInstance::complete_instantiation)
    }

    fn prepare(
        &self,
        instance_id: i32,
        frame_count: usize,
        buffers: &[BufferHandle],
    ) -> aap_xs::Result<()> {
        self.with_instance(instance_id, |instance| instance.prepare(frame_count, buffers))
    }

    fn activate(&self, instance_id: i32) -> aap_xs::Result<()> {
        self.with_instance(instance_id, LocalPluginInstance::activate)
    }

    fn process(&self, instance_id: i32, frame_count: usize, timeout_ns: u64) -> aap_xs::Result<()> {
        self.with_instance(instance_id, |instance| instance.process(frame_count, timeout_ns))
    }

    fn deactivate(&self, instance_id: i32) -> aap_xs::Result<()> {
        self.with_instance(instance_id, LocalPluginInstance::deactivate)
    }

    fn extension(&self, message: &ExtensionMessage) -> aap_xs::Result<usize> {
        self.with_instance(message.instance_id, |instance| {
            instance.handle_extension_message(
                &message.uri,
                message.opcode,
                message.request_id,
                message.data_size,
            )
        })
    }

    fn dispose(&self, instance_id: i32) -> aap_xs::Result<()> {
        let result = self.with_instance(instance_id, LocalPluginInstance::dispose);
        self.instances.write().remove(&instance_id);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::{AudioPlugin, PluginBuffer};
    use aap_core::{HostConfig, PluginInstantiationState};
    use aap_xs::{PluginExtensions, PortInfo};

    struct Silence;

    impl PluginExtensions for Silence {}

    impl AudioPlugin for Silence {
        fn ports(&self) -> Vec<PortInfo> {
            Vec::new()
        }

        fn process(&mut self, _: &PluginBuffer, _: usize, _: u64) {}
    }

    fn channel() -> LoopbackChannel {
        let context = Arc::new(HostContext::new(HostConfig::default()).unwrap());
        LoopbackChannel::new(context, |id: &str, _rate: u32| -> Option<Box<dyn AudioPlugin>> {
            (id == "org.example.silence").then(|| Box::new(Silence) as Box<dyn AudioPlugin>)
        })
    }

    #[test]
    fn test_unknown_plugin_and_instance() {
        let channel = channel();
        match channel.instantiate("org.example.missing", 48000) {
            Err(XsError::Remote(msg)) => assert!(msg.contains("org.example.missing")),
            _ => panic!("Expected Remote error"),
        }
        match channel.activate(99) {
            Err(XsError::UnknownInstance(99)) => {}
            _ => panic!("Expected UnknownInstance"),
        }
    }

    #[test]
    fn test_lifecycle_reaches_local_instance() {
        let channel = channel();
        let id = channel.instantiate("org.example.silence", 48000).unwrap();
        assert_eq!(channel.len(), 1);

        channel.complete_instantiation(id).unwrap();
        channel.prepare(id, 128, &[]).unwrap();
        channel.activate(id).unwrap();
        channel.process(id, 128, 0).unwrap();
        {
            let instance = channel.instance(id).unwrap();
            assert_eq!(instance.lock().state(), PluginInstantiationState::Active);
        }

        channel.dispose(id).unwrap();
        assert!(channel.is_empty());
    }

    #[test]
    fn test_illegal_call_is_reported() {
        let channel = channel();
        let id = channel.instantiate("org.example.silence", 48000).unwrap();
        match channel.activate(id) {
            Err(XsError::Remote(msg)) => assert!(msg.contains("activate")),
            _ => panic!("Expected Remote error"),
        }
        let instance = channel.instance(id).unwrap();
        assert_eq!(instance.lock().state(), PluginInstantiationState::Error);
    }
}
