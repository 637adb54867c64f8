//! Error types for the aap umbrella crate.

use aap_core::PluginInstantiationState;
use aap_xs::AllocationResult;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Core(#[from] aap_core::Error),

    #[error("MIDI error: {0}")]
    Midi(#[from] aap_midi::Error),

    #[error("AAPXS error: {0}")]
    Xs(#[from] aap_xs::XsError),

    #[error("Port buffer allocation failed: {0}")]
    Allocation(AllocationResult),

    #[error("Instance {instance_id} cannot {operation} at state {state}")]
    WrongState {
        instance_id: i32,
        operation: &'static str,
        state: PluginInstantiationState,
    },

    #[error("Plugin not found: {0}")]
    PluginNotFound(String),

    #[error("Expected {expected} port buffers, got {actual}")]
    PortMismatch { expected: usize, actual: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<Error> for aap_xs::XsError {
    /// Flattens an instance error into the form the direct channel can carry.
    fn from(err: Error) -> Self {
        match err {
            Error::Xs(e) => e,
            Error::Io(e) => aap_xs::XsError::Io(e),
            other => aap_xs::XsError::Remote(other.to_string()),
        }
    }
}
