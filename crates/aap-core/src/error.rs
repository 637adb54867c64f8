//! Error types for aap-core.

use crate::instance_state::{InstanceEvent, PluginInstantiationState};
use thiserror::Error;

/// Error type for aap-core operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Illegal {event} at state {state} (instance {instance_id})")]
    IllegalTransition {
        instance_id: i32,
        state: PluginInstantiationState,
        event: InstanceEvent,
    },
}

/// Result type alias.
pub type Result<T> = core::result::Result<T, Error>;
