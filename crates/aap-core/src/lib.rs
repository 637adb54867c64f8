//! Core runtime pieces shared by AAP hosts and plugin services.
//!
//! - [`HostConfig`]: buffer sizes and limits for one connection
//! - [`InstanceStateMachine`]: lifecycle gate deciding between direct and tunneled calls
//! - [`NanoSleepMutex`]: the realtime try-lock used on the audio thread
//!
//! # Example
//!
//! ```ignore
//! use aap_core::{InstanceEvent, InstanceStateMachine, PluginInstantiationState};
//!
//! let mut state = InstanceStateMachine::new(instance_id);
//! state.transition(InstanceEvent::CompleteInstantiation);
//! state.transition(InstanceEvent::Prepare);
//! state.transition(InstanceEvent::Activate);
//! assert_eq!(state.state(), PluginInstantiationState::Active);
//! ```

pub mod error;
pub use error::{Error, Result};

mod config;
pub use config::{HostConfig, AAPXS_DATA_MAX_SIZE, DEFAULT_CONTROL_BUFFER_SIZE};

pub mod instance_state;
pub use instance_state::{
    channel_for, CallChannel, InstanceEvent, InstanceStateMachine, PluginInstantiationState,
    TransitionResult,
};

pub mod lockfree;
pub use lockfree::{AtomicInstantiationState, NanoSleepMutex, NanoSleepMutexGuard};
