//! Parameters extension.

use super::{unknown_opcode, RequestContext};
use crate::dispatcher::InitiatorInstance;
use crate::error::Result;
use std::sync::Arc;

pub const PARAMETERS_EXTENSION_URI: &str = "urn://androidaudioplugin.org/extensions/parameters/v1";

pub const MAX_PARAMETER_NAME_LENGTH: usize = 256;
pub const MAX_PARAMETER_PATH_LENGTH: usize = 256;

/// One parameter info record.
pub const PARAMETERS_SHARED_MEMORY_SIZE: usize =
    4 + MAX_PARAMETER_NAME_LENGTH + MAX_PARAMETER_PATH_LENGTH + 3 * 8;

pub const OPCODE_GET_PARAMETER_COUNT: i32 = 1;
pub const OPCODE_GET_PARAMETER: i32 = 2;
pub const OPCODE_GET_PROPERTY: i32 = 3;
pub const OPCODE_GET_ENUMERATION_COUNT: i32 = 4;
pub const OPCODE_GET_ENUMERATION: i32 = 5;

pub const OPCODE_NOTIFY_PARAMETERS_CHANGED: i32 = -1;

// Parameter info record layout.
const INFO_ID: usize = 0;
const INFO_NAME: usize = 4;
const INFO_PATH: usize = INFO_NAME + MAX_PARAMETER_NAME_LENGTH;
const INFO_MIN: usize = INFO_PATH + MAX_PARAMETER_PATH_LENGTH;
const INFO_MAX: usize = INFO_MIN + 8;
const INFO_DEFAULT: usize = INFO_MAX + 8;

// Enumeration record layout.
const ENUM_VALUE: usize = 0;
const ENUM_NAME: usize = 8;

#[derive(Debug, Clone, PartialEq)]
pub struct ParameterInfo {
    pub stable_id: i32,
    pub display_name: String,
    pub path: String,
    pub min_value: f64,
    pub max_value: f64,
    pub default_value: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParameterEnumeration {
    pub value: f64,
    pub name: String,
}

pub trait ParametersExtension: Send {
    /// Number of parameters, or -1 when the plugin does not expose them dynamically.
    fn get_parameter_count(&mut self) -> i32;

    fn get_parameter(&mut self, index: i32) -> Option<ParameterInfo>;

    fn get_property(&mut self, parameter_id: i32, property_id: i32) -> f64;

    fn get_enumeration_count(&mut self, parameter_id: i32) -> i32;

    fn get_enumeration(
        &mut self,
        parameter_id: i32,
        enum_index: i32,
    ) -> Option<ParameterEnumeration>;
}

pub trait ParametersHostExtension: Send {
    fn notify_parameters_changed(&mut self);
}

pub(crate) fn handle_request(
    ext: Option<&mut dyn ParametersExtension>,
    ctx: &RequestContext<'_>,
) -> Option<usize> {
    let s = ctx.serialization;
    match ctx.opcode {
        OPCODE_GET_PARAMETER_COUNT => {
            s.write_i32(0, ext.map_or(-1, |e| e.get_parameter_count()));
            Some(4)
        }
        OPCODE_GET_PARAMETER => {
            let index = s.read_i32(0).unwrap_or(-1);
            let info = ext.and_then(|e| e.get_parameter(index));
            let info = info.unwrap_or(ParameterInfo {
                stable_id: -1,
                display_name: String::new(),
                path: String::new(),
                min_value: 0.0,
                max_value: 0.0,
                default_value: 0.0,
            });
            s.write_i32(INFO_ID, info.stable_id);
            s.write_str(INFO_NAME, MAX_PARAMETER_NAME_LENGTH, &info.display_name);
            s.write_str(INFO_PATH, MAX_PARAMETER_PATH_LENGTH, &info.path);
            s.write_f64(INFO_MIN, info.min_value);
            s.write_f64(INFO_MAX, info.max_value);
            s.write_f64(INFO_DEFAULT, info.default_value);
            Some(PARAMETERS_SHARED_MEMORY_SIZE)
        }
        OPCODE_GET_PROPERTY => {
            let id = s.read_i32(0).unwrap_or(-1);
            let property = s.read_i32(4).unwrap_or(-1);
            s.write_f64(0, ext.map_or(0.0, |e| e.get_property(id, property)));
            Some(8)
        }
        OPCODE_GET_ENUMERATION_COUNT => {
            let id = s.read_i32(0).unwrap_or(-1);
            s.write_i32(0, ext.map_or(0, |e| e.get_enumeration_count(id)));
            Some(4)
        }
        OPCODE_GET_ENUMERATION => {
            let id = s.read_i32(0).unwrap_or(-1);
            let enum_index = s.read_i32(4).unwrap_or(-1);
            let entry = ext.and_then(|e| e.get_enumeration(id, enum_index));
            let (value, name) = match &entry {
                Some(e) => (e.value, e.name.as_str()),
                None => (0.0, ""),
            };
            s.write_f64(ENUM_VALUE, value);
            s.write_str(ENUM_NAME, MAX_PARAMETER_NAME_LENGTH, name);
            Some(ENUM_NAME + MAX_PARAMETER_NAME_LENGTH)
        }
        _ => unknown_opcode(ctx),
    }
}

pub(crate) fn handle_host_request(
    ext: &mut dyn ParametersHostExtension,
    ctx: &RequestContext<'_>,
) -> Option<usize> {
    match ctx.opcode {
        OPCODE_NOTIFY_PARAMETERS_CHANGED => ext.notify_parameters_changed(),
        _ => tracing::warn!(uri = ctx.uri, opcode = ctx.opcode, "Unknown host opcode"),
    }
    None
}

/// Typed access to a plugin's parameters extension.
#[derive(Clone)]
pub struct ParametersClient {
    initiator: Arc<InitiatorInstance>,
}

impl ParametersClient {
    pub fn new(initiator: Arc<InitiatorInstance>) -> Self {
        Self { initiator }
    }

    fn require(&self, opcode: i32, got: usize, need: usize) -> Result<()> {
        if got < need {
            return Err(self.initiator.malformed(
                opcode,
                format!("reply of {} bytes, expected {}", got, need),
            ));
        }
        Ok(())
    }

    pub fn get_parameter_count(&self) -> Result<i32> {
        self.initiator.call_typed_function_synchronously(
            OPCODE_GET_PARAMETER_COUNT,
            |_| 0,
            |s, reply| {
                self.require(OPCODE_GET_PARAMETER_COUNT, reply.data_size, 4)?;
                Ok(s.read_i32(0).unwrap_or(-1))
            },
        )
    }

    pub fn get_parameter(&self, index: i32) -> Result<ParameterInfo> {
        self.initiator.call_typed_function_synchronously(
            OPCODE_GET_PARAMETER,
            |s| {
                s.write_i32(0, index);
                4
            },
            |s, reply| {
                self.require(OPCODE_GET_PARAMETER, reply.data_size, PARAMETERS_SHARED_MEMORY_SIZE)?;
                Ok(ParameterInfo {
                    stable_id: s.read_i32(INFO_ID).unwrap_or(-1),
                    display_name: s
                        .read_str(INFO_NAME, MAX_PARAMETER_NAME_LENGTH)
                        .unwrap_or_default(),
                    path: s
                        .read_str(INFO_PATH, MAX_PARAMETER_PATH_LENGTH)
                        .unwrap_or_default(),
                    min_value: s.read_f64(INFO_MIN).unwrap_or(0.0),
                    max_value: s.read_f64(INFO_MAX).unwrap_or(0.0),
                    default_value: s.read_f64(INFO_DEFAULT).unwrap_or(0.0),
                })
            },
        )
    }

    pub fn get_property(&self, parameter_id: i32, property_id: i32) -> Result<f64> {
        self.initiator.call_typed_function_synchronously(
            OPCODE_GET_PROPERTY,
            |s| {
                s.write_i32(0, parameter_id);
                s.write_i32(4, property_id);
                8
            },
            |s, reply| {
                self.require(OPCODE_GET_PROPERTY, reply.data_size, 8)?;
                Ok(s.read_f64(0).unwrap_or(0.0))
            },
        )
    }

    pub fn get_enumeration_count(&self, parameter_id: i32) -> Result<i32> {
        self.initiator.call_typed_function_synchronously(
            OPCODE_GET_ENUMERATION_COUNT,
            |s| {
                s.write_i32(0, parameter_id);
                4
            },
            |s, reply| {
                self.require(OPCODE_GET_ENUMERATION_COUNT, reply.data_size, 4)?;
                Ok(s.read_i32(0).unwrap_or(0))
            },
        )
    }

    pub fn get_enumeration(&self, parameter_id: i32, enum_index: i32) -> Result<ParameterEnumeration> {
        self.initiator.call_typed_function_synchronously(
            OPCODE_GET_ENUMERATION,
            |s| {
                s.write_i32(0, parameter_id);
                s.write_i32(4, enum_index);
                8
            },
            |s, reply| {
                self.require(
                    OPCODE_GET_ENUMERATION,
                    reply.data_size,
                    ENUM_NAME + MAX_PARAMETER_NAME_LENGTH,
                )?;
                Ok(ParameterEnumeration {
                    value: s.read_f64(ENUM_VALUE).unwrap_or(0.0),
                    name: s
                        .read_str(ENUM_NAME, MAX_PARAMETER_NAME_LENGTH)
                        .unwrap_or_default(),
                })
            },
        )
    }
}

/// Host notifications sent by the plugin side.
#[derive(Clone)]
pub struct ParametersService {
    initiator: Arc<InitiatorInstance>,
}

impl ParametersService {
    pub fn new(initiator: Arc<InitiatorInstance>) -> Self {
        Self { initiator }
    }

    pub fn notify_parameters_changed(&self) -> Result<()> {
        self.initiator
            .fire_void_function_and_forget(OPCODE_NOTIFY_PARAMETERS_CHANGED, |_| 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extensions::testing::initiator_for;
    use crate::extensions::PluginExtensions;
    use crate::registry::ExtensionKind;
    use approx::assert_relative_eq;

    struct Filter;

    impl ParametersExtension for Filter {
        fn get_parameter_count(&mut self) -> i32 {
            2
        }

        fn get_parameter(&mut self, index: i32) -> Option<ParameterInfo> {
            match index {
                0 => Some(ParameterInfo {
                    stable_id: 10,
                    display_name: "Cutoff".into(),
                    path: "/filter".into(),
                    min_value: 20.0,
                    max_value: 20000.0,
                    default_value: 1000.0,
                }),
                1 => Some(ParameterInfo {
                    stable_id: 11,
                    display_name: "Mode".into(),
                    path: "/filter".into(),
                    min_value: 0.0,
                    max_value: 2.0,
                    default_value: 0.0,
                }),
                _ => None,
            }
        }

        fn get_property(&mut self, parameter_id: i32, property_id: i32) -> f64 {
            parameter_id as f64 + property_id as f64 / 10.0
        }

        fn get_enumeration_count(&mut self, parameter_id: i32) -> i32 {
            if parameter_id == 11 {
                3
            } else {
                0
            }
        }

        fn get_enumeration(&mut self, parameter_id: i32, enum_index: i32) -> Option<ParameterEnumeration> {
            let names = ["Low-pass", "Band-pass", "High-pass"];
            if parameter_id != 11 {
                return None;
            }
            let name = names.get(usize::try_from(enum_index).ok()?)?;
            Some(ParameterEnumeration {
                value: enum_index as f64,
                name: name.to_string(),
            })
        }
    }

    impl PluginExtensions for Filter {
        fn parameters(&mut self) -> Option<&mut dyn ParametersExtension> {
            Some(self)
        }
    }

    #[test]
    fn test_parameter_info() {
        let (initiator, _) = initiator_for(ExtensionKind::Parameters, Filter);
        let client = ParametersClient::new(initiator);
        assert_eq!(client.get_parameter_count().unwrap(), 2);

        let info = client.get_parameter(0).unwrap();
        assert_eq!(info.stable_id, 10);
        assert_eq!(info.display_name, "Cutoff");
        assert_eq!(info.path, "/filter");
        assert_relative_eq!(info.min_value, 20.0);
        assert_relative_eq!(info.max_value, 20000.0);
        assert_relative_eq!(info.default_value, 1000.0);

        assert_eq!(client.get_parameter(5).unwrap().stable_id, -1);
    }

    #[test]
    fn test_property_and_enumerations() {
        let (initiator, _) = initiator_for(ExtensionKind::Parameters, Filter);
        let client = ParametersClient::new(initiator);
        assert_relative_eq!(client.get_property(10, 2).unwrap(), 10.2);

        assert_eq!(client.get_enumeration_count(11).unwrap(), 3);
        let entry = client.get_enumeration(11, 2).unwrap();
        assert_relative_eq!(entry.value, 2.0);
        assert_eq!(entry.name, "High-pass");
        assert!(client.get_enumeration(10, 0).unwrap().name.is_empty());
    }

    struct NoParameters;
    impl PluginExtensions for NoParameters {}

    #[test]
    fn test_missing_extension_reports_unsupported() {
        let (initiator, _) = initiator_for(ExtensionKind::Parameters, NoParameters);
        assert_eq!(ParametersClient::new(initiator).get_parameter_count().unwrap(), -1);
    }
}
