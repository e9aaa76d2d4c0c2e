//! Worker pool lifecycle state machine.
//!
//! Models the pool lifecycle with validated transitions that return
//! `Result` instead of panicking.

use crate::error::FlutError;

// ── PoolState ────────────────────────────────────────────────────

/// The current phase of a [`WorkerPool`](crate::task::WorkerPool).
///
/// ```text
///  Idle ──► Running ──► Draining ──► Terminated
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PoolState {
    /// Constructed, no workers spawned yet.
    #[default]
    Idle,

    /// Workers are spawned and the queue accepts tasks.
    Running,

    /// `drain` was called; no new submissions.
    Draining,

    /// Every worker has been joined and the queue released.
    Terminated,
}

impl std::fmt::Display for PoolState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Running => write!(f, "Running"),
            Self::Draining => write!(f, "Draining"),
            Self::Terminated => write!(f, "Terminated"),
        }
    }
}

impl PoolState {
    /// Whether `submit` may enqueue work in this state.
    pub fn accepts_tasks(&self) -> bool {
        matches!(self, Self::Running)
    }

    /// Whether the pool has stopped for good.
    pub fn is_terminated(&self) -> bool {
        matches!(self, Self::Terminated)
    }

    // ── Transitions ──────────────────────────────────────────────

    /// Transition to `Running`.
    ///
    /// Valid from: `Idle`.
    pub fn start(&mut self) -> Result<(), FlutError> {
        match self {
            Self::Idle => {
                *self = Self::Running;
                Ok(())
            }
            _ => Err(FlutError::InvalidTransition(
                "cannot start: pool is not Idle",
            )),
        }
    }

    /// Transition to `Draining`.
    ///
    /// Valid from: `Running`. Draining twice reports `PoolClosed`.
    pub fn begin_drain(&mut self) -> Result<(), FlutError> {
        match self {
            Self::Running => {
                *self = Self::Draining;
                Ok(())
            }
            Self::Draining | Self::Terminated => Err(FlutError::PoolClosed),
            Self::Idle => Err(FlutError::InvalidTransition(
                "cannot drain: pool was never started",
            )),
        }
    }

    /// Transition to `Terminated`.
    ///
    /// Valid from: `Draining`.
    pub fn terminate(&mut self) -> Result<(), FlutError> {
        match self {
            Self::Draining => {
                *self = Self::Terminated;
                Ok(())
            }
            _ => Err(FlutError::InvalidTransition(
                "cannot terminate: pool is not Draining",
            )),
        }
    }
}
