//! Plugin instantiation state machine.
//!
//! ```text
//! INITIAL --complete--> UNPREPARED --prepare--> INACTIVE <--activate/deactivate--> ACTIVE
//!    any --dispose--> TERMINATED
//! ```
//!
//! Any event received outside its source state forces `ERROR`. From `ERROR` only `dispose`
//! is accepted.

use crate::lockfree::AtomicInstantiationState;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum PluginInstantiationState {
    #[default]
    Initial = 0,
    Unprepared = 1,
    Inactive = 2,
    Active = 3,
    Terminated = 4,
    Error = 5,
}

impl PluginInstantiationState {
    pub const ALL: [PluginInstantiationState; 6] = [
        Self::Initial,
        Self::Unprepared,
        Self::Inactive,
        Self::Active,
        Self::Terminated,
        Self::Error,
    ];

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Initial,
            1 => Self::Unprepared,
            2 => Self::Inactive,
            3 => Self::Active,
            4 => Self::Terminated,
            _ => Self::Error,
        }
    }
}

impl fmt::Display for PluginInstantiationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Initial => "INITIAL",
            Self::Unprepared => "UNPREPARED",
            Self::Inactive => "INACTIVE",
            Self::Active => "ACTIVE",
            Self::Terminated => "TERMINATED",
            Self::Error => "ERROR",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceEvent {
    CompleteInstantiation,
    Prepare,
    Activate,
    Deactivate,
    Dispose,
}

impl InstanceEvent {
    pub const ALL: [InstanceEvent; 5] = [
        Self::CompleteInstantiation,
        Self::Prepare,
        Self::Activate,
        Self::Deactivate,
        Self::Dispose,
    ];
}

impl fmt::Display for InstanceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::CompleteInstantiation => "completeInstantiation",
            Self::Prepare => "prepare",
            Self::Activate => "activate",
            Self::Deactivate => "deactivate",
            Self::Dispose => "dispose",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionResult {
    /// Moved into a new state.
    Changed(PluginInstantiationState),
    /// Legal event with nothing to do (e.g. `activate` while already active).
    Unchanged,
    /// Illegal event; the instance is now in `ERROR`.
    Rejected {
        from: PluginInstantiationState,
        event: InstanceEvent,
    },
}

impl TransitionResult {
    pub fn is_rejected(&self) -> bool {
        matches!(self, TransitionResult::Rejected { .. })
    }

    /// Converts a rejection into [`Error::IllegalTransition`].
    pub fn into_result(self, instance_id: i32) -> Result<()> {
        match self {
            TransitionResult::Rejected { from, event } => Err(Error::IllegalTransition {
                instance_id,
                state: from,
                event,
            }),
            _ => Ok(()),
        }
    }
}

/// Which path an extension call takes at a given instance state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallChannel {
    /// Blocking call over the direct (non-realtime) channel.
    Direct,
    /// SysEx8 tunnel embedded in the next MIDI buffer.
    Tunnel,
}

/// Single source of truth for an instance's lifecycle.
///
/// Transitions happen on control threads; the current state is published through a shared
/// [`AtomicInstantiationState`] so realtime code and extension senders can read it.
pub struct InstanceStateMachine {
    instance_id: i32,
    state: Arc<AtomicInstantiationState>,
}

impl InstanceStateMachine {
    pub fn new(instance_id: i32) -> Self {
        Self {
            instance_id,
            state: Arc::new(AtomicInstantiationState::default()),
        }
    }

    #[inline]
    pub fn state(&self) -> PluginInstantiationState {
        self.state.get()
    }

    /// Shared read handle to the current state.
    pub fn state_handle(&self) -> Arc<AtomicInstantiationState> {
        Arc::clone(&self.state)
    }

    pub fn instance_id(&self) -> i32 {
        self.instance_id
    }

    pub fn channel(&self) -> CallChannel {
        channel_for(self.state())
    }

    pub fn transition(&mut self, event: InstanceEvent) -> TransitionResult {
        use InstanceEvent::*;
        use PluginInstantiationState as S;

        let current = self.state();
        let next = match (current, event) {
            (S::Terminated, Dispose) => return TransitionResult::Unchanged,
            (_, Dispose) => Some(S::Terminated),

            (S::Initial, CompleteInstantiation) => Some(S::Unprepared),

            (S::Unprepared | S::Inactive, Prepare) => Some(S::Inactive),

            (S::Inactive, Activate) => Some(S::Active),
            (S::Active, Activate) => return TransitionResult::Unchanged,

            (S::Active, Deactivate) => Some(S::Inactive),
            (S::Inactive | S::Unprepared, Deactivate) => return TransitionResult::Unchanged,

            _ => None,
        };

        match next {
            Some(state) => {
                self.state.set(state);
                tracing::debug!(
                    instance_id = self.instance_id,
                    from = %current,
                    to = %state,
                    "{}",
                    event
                );
                TransitionResult::Changed(state)
            }
            None => {
                tracing::error!(
                    instance_id = self.instance_id,
                    state = %current,
                    "Unexpected call to {}() at state {}",
                    event,
                    current
                );
                self.state.set(S::Error);
                TransitionResult::Rejected {
                    from: current,
                    event,
                }
            }
        }
    }

    /// Gate for operations that are not state transitions, such as `process`.
    ///
    /// Returns `true` when the instance is in `required`. Otherwise logs, forces `ERROR` and
    /// returns `false`. Takes `&self` so the audio thread can call it.
    pub fn require(&self, required: PluginInstantiationState, operation: &str) -> bool {
        let current = self.state();
        if current == required {
            return true;
        }
        tracing::error!(
            instance_id = self.instance_id,
            state = %current,
            "Unexpected call to {}() at state {}",
            operation,
            current
        );
        self.state.set(PluginInstantiationState::Error);
        false
    }
}

/// Channel selection from a state snapshot.
pub fn channel_for(state: PluginInstantiationState) -> CallChannel {
    match state {
        PluginInstantiationState::Active => CallChannel::Tunnel,
        _ => CallChannel::Direct,
    }
}
