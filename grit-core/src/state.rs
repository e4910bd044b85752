// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Init process state machine with a table-driven operation dispatch.
//!
//! Lifecycle: Created | CreatedFromCheckpoint → Running ⇄ Paused → Stopped → Deleted.
//! Illegal operations are rejected with `StateTransitionError`; a transition
//! to a target the current state cannot reach panics, since it means the
//! machine itself is corrupt.

use std::path::PathBuf;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::error::StateTransitionError;
use crate::types::ContainerId;

/// Discriminant of the active state variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StateKind {
    Created,
    CreatedFromCheckpoint,
    Running,
    Paused,
    Stopped,
    Deleted,
}

impl StateKind {
    /// All variants, in lifecycle order.
    pub const ALL: [StateKind; 6] = [
        Self::Created,
        Self::CreatedFromCheckpoint,
        Self::Running,
        Self::Paused,
        Self::Stopped,
        Self::Deleted,
    ];

    /// Get the state name for error messages.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::CreatedFromCheckpoint => "created-from-checkpoint",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Stopped => "stopped",
            Self::Deleted => "deleted",
        }
    }

    /// Check if a committed transition to the target state is valid.
    pub fn can_transition_to(&self, target: StateKind) -> bool {
        matches!(
            (self, target),
            // From Created
            (Self::Created, Self::Running) |
            (Self::Created, Self::Stopped) |
            (Self::Created, Self::Deleted) |
            // From CreatedFromCheckpoint
            (Self::CreatedFromCheckpoint, Self::Running) |
            (Self::CreatedFromCheckpoint, Self::Stopped) |
            (Self::CreatedFromCheckpoint, Self::Deleted) |
            // From Running
            (Self::Running, Self::Stopped) |
            (Self::Running, Self::Paused) |
            // From Paused
            (Self::Paused, Self::Running) |
            (Self::Paused, Self::Stopped) |
            // From Stopped
            (Self::Stopped, Self::Deleted)
        )
    }
}

impl std::fmt::Display for StateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Lifecycle operations a caller can issue against the init process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Start,
    Delete,
    Pause,
    Resume,
    Update,
    Checkpoint,
    Exec,
    Kill,
}

impl Operation {
    pub const ALL: [Operation; 8] = [
        Self::Start,
        Self::Delete,
        Self::Pause,
        Self::Resume,
        Self::Update,
        Self::Checkpoint,
        Self::Exec,
        Self::Kill,
    ];

    pub const fn name(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Delete => "delete",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Update => "update",
            Self::Checkpoint => "checkpoint",
            Self::Exec => "exec",
            Self::Kill => "kill",
        }
    }
}

/// What the dispatch table allows for a (state, operation) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Operation is illegal in this state.
    Rejected,
    /// Operation is performed, state is unchanged.
    Stay,
    /// Operation is performed, then the machine commits to the target.
    Transition(StateKind),
}

/// The lifecycle dispatch table.
pub const fn dispatch(state: StateKind, op: Operation) -> Outcome {
    use self::Operation as Op;
    use self::Outcome::{Rejected, Stay, Transition};
    use self::StateKind as S;

    match (state, op) {
        (S::Created, Op::Start) => Transition(S::Running),
        (S::Created, Op::Delete) => Transition(S::Deleted),
        (S::Created, Op::Update | Op::Exec | Op::Kill) => Stay,
        (S::Created, _) => Rejected,

        (S::CreatedFromCheckpoint, Op::Start) => Transition(S::Running),
        (S::CreatedFromCheckpoint, Op::Delete) => Transition(S::Deleted),
        (S::CreatedFromCheckpoint, Op::Update | Op::Kill) => Stay,
        (S::CreatedFromCheckpoint, _) => Rejected,

        (S::Running, Op::Pause) => Transition(S::Paused),
        (S::Running, Op::Update | Op::Checkpoint | Op::Exec | Op::Kill) => Stay,
        (S::Running, _) => Rejected,

        (S::Paused, Op::Resume) => Transition(S::Running),
        (S::Paused, Op::Update | Op::Checkpoint | Op::Kill) => Stay,
        (S::Paused, _) => Rejected,

        (S::Stopped, Op::Delete) => Transition(S::Deleted),
        (S::Stopped, Op::Kill) => Stay,
        (S::Stopped, _) => Rejected,

        (S::Deleted, _) => Rejected,
    }
}

/// Restore parameters captured when the process is created from a checkpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointParams {
    /// Checkpoint image directory.
    pub image_path: PathBuf,
    /// Where the runtime writes the restored pid.
    pub pid_file: PathBuf,
}

/// The active state variant. Only `CreatedFromCheckpoint` carries data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitState {
    Created,
    CreatedFromCheckpoint(CheckpointParams),
    Running,
    Paused,
    Stopped,
    Deleted,
}

impl InitState {
    pub fn kind(&self) -> StateKind {
        match self {
            Self::Created => StateKind::Created,
            Self::CreatedFromCheckpoint(_) => StateKind::CreatedFromCheckpoint,
            Self::Running => StateKind::Running,
            Self::Paused => StateKind::Paused,
            Self::Stopped => StateKind::Stopped,
            Self::Deleted => StateKind::Deleted,
        }
    }
}

/// Status reported to callers. `Pausing` is a transient sub-state of Running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    Created,
    Running,
    Pausing,
    Paused,
    Stopped,
    Deleted,
}

impl ProcessStatus {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Pausing => "pausing",
            Self::Paused => "paused",
            Self::Stopped => "stopped",
            Self::Deleted => "deleted",
        }
    }
}

impl From<StateKind> for ProcessStatus {
    fn from(kind: StateKind) -> Self {
        match kind {
            StateKind::Created | StateKind::CreatedFromCheckpoint => Self::Created,
            StateKind::Running => Self::Running,
            StateKind::Paused => Self::Paused,
            StateKind::Stopped => Self::Stopped,
            StateKind::Deleted => Self::Deleted,
        }
    }
}

impl std::fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// State machine for an init process lifecycle.
/// Enforces legal operations and tracks timing metrics.
#[derive(Debug)]
pub struct LifecycleStateMachine {
    container_id: ContainerId,
    current_state: InitState,
    last_transition: Instant,
    transition_count: u64,
}

impl LifecycleStateMachine {
    /// Create a machine in `Created`.
    pub fn new(container_id: ContainerId) -> Self {
        Self::with_state(container_id, InitState::Created)
    }

    /// Create a machine in `CreatedFromCheckpoint`.
    pub fn from_checkpoint(container_id: ContainerId, params: CheckpointParams) -> Self {
        Self::with_state(container_id, InitState::CreatedFromCheckpoint(params))
    }

    fn with_state(container_id: ContainerId, current_state: InitState) -> Self {
        Self {
            container_id,
            current_state,
            last_transition: Instant::now(),
            transition_count: 0,
        }
    }

    /// Get the current state.
    pub fn state(&self) -> &InitState {
        &self.current_state
    }

    pub fn kind(&self) -> StateKind {
        self.current_state.kind()
    }

    /// Get the container ID.
    pub fn container_id(&self) -> &ContainerId {
        &self.container_id
    }

    /// Get time since last transition.
    pub fn time_in_current_state(&self) -> std::time::Duration {
        self.last_transition.elapsed()
    }

    /// Get total number of transitions.
    pub fn transition_count(&self) -> u64 {
        self.transition_count
    }

    /// Look up the operation in the dispatch table.
    /// Returns the outcome to commit once side effects succeed.
    pub fn check(&self, op: Operation) -> Result<Outcome, StateTransitionError> {
        let kind = self.kind();
        match dispatch(kind, op) {
            Outcome::Rejected => Err(StateTransitionError::IllegalOperation {
                container_id: self.container_id.clone(),
                operation: op.name(),
                state: kind.name(),
            }),
            outcome => Ok(outcome),
        }
    }

    /// Commit a previously checked outcome.
    pub fn commit(&mut self, outcome: Outcome) {
        if let Outcome::Transition(target) = outcome {
            self.transition_to(target);
        }
    }

    /// Replace the active variant.
    ///
    /// # Panics
    /// Panics when `target` is not reachable from the current state.
    pub fn transition_to(&mut self, target: StateKind) {
        let from = self.kind();
        if !from.can_transition_to(target) {
            panic!(
                "invalid state transition {:?} to {:?} for container {}",
                from.name(),
                target.name(),
                self.container_id
            );
        }

        self.current_state = match target {
            StateKind::Running => InitState::Running,
            StateKind::Paused => InitState::Paused,
            StateKind::Stopped => InitState::Stopped,
            StateKind::Deleted => InitState::Deleted,
            StateKind::Created | StateKind::CreatedFromCheckpoint => {
                unreachable!("created states are never transition targets")
            }
        };

        tracing::debug!(
            container_id = %self.container_id,
            from = from.name(),
            to = target.name(),
            "State transition"
        );

        self.last_transition = Instant::now();
        self.transition_count += 1;
    }
}

/// Metrics for the state machine.
#[derive(Debug, Clone, Serialize)]
pub struct StateMachineMetrics {
    pub container_id: String,
    pub current_state: String,
    pub time_in_state_ms: u64,
    pub transition_count: u64,
}

impl From<&LifecycleStateMachine> for StateMachineMetrics {
    fn from(sm: &LifecycleStateMachine) -> Self {
        Self {
            container_id: sm.container_id.to_string(),
            current_state: sm.kind().name().to_string(),
            time_in_state_ms: sm.time_in_current_state().as_millis() as u64,
            transition_count: sm.transition_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use super::Operation as Op;
    use super::Outcome::{Rejected, Stay, Transition};
    use super::StateKind as S;

    fn make_container_id() -> ContainerId {
        ContainerId::new("test-container").unwrap()
    }

    fn expected(state: StateKind, op: Operation) -> Outcome {
        let row: [Outcome; 8] = match state {
            // Start, Delete, Pause, Resume, Update, Checkpoint, Exec, Kill
            S::Created => [
                Transition(S::Running),
                Transition(S::Deleted),
                Rejected,
                Rejected,
                Stay,
                Rejected,
                Stay,
                Stay,
            ],
            S::CreatedFromCheckpoint => [
                Transition(S::Running),
                Transition(S::Deleted),
                Rejected,
                Rejected,
                Stay,
                Rejected,
                Rejected,
                Stay,
            ],
            S::Running => [
                Rejected,
                Rejected,
                Transition(S::Paused),
                Rejected,
                Stay,
                Stay,
                Stay,
                Stay,
            ],
            S::Paused => [
                Rejected,
                Rejected,
                Rejected,
                Transition(S::Running),
                Stay,
                Stay,
                Rejected,
                Stay,
            ],
            S::Stopped => [
                Rejected,
                Transition(S::Deleted),
                Rejected,
                Rejected,
                Rejected,
                Rejected,
                Rejected,
                Stay,
            ],
            S::Deleted => [Rejected; 8],
        };
        let index = Operation::ALL.iter().position(|o| *o == op).unwrap();
        row[index]
    }

    #[test]
    fn test_dispatch_table_matches_lifecycle() {
        for state in StateKind::ALL {
            for op in Operation::ALL {
                assert_eq!(
                    dispatch(state, op),
                    expected(state, op),
                    "{} / {}",
                    state,
                    op.name()
                );
            }
        }
    }

    #[test]
    fn test_every_dispatched_target_is_reachable() {
        for state in StateKind::ALL {
            for op in Operation::ALL {
                if let Transition(target) = dispatch(state, op) {
                    assert!(state.can_transition_to(target));
                }
            }
        }
    }

    #[test]
    fn test_initial_state() {
        let sm = LifecycleStateMachine::new(make_container_id());
        assert_eq!(sm.kind(), S::Created);
        assert_eq!(sm.transition_count(), 0);
    }

    #[test]
    fn test_valid_transitions() {
        let mut sm = LifecycleStateMachine::new(make_container_id());

        let outcome = sm.check(Op::Start).unwrap();
        sm.commit(outcome);
        assert_eq!(sm.kind(), S::Running);
        assert_eq!(sm.transition_count(), 1);

        let outcome = sm.check(Op::Pause).unwrap();
        sm.commit(outcome);
        assert_eq!(sm.kind(), S::Paused);

        let outcome = sm.check(Op::Resume).unwrap();
        sm.commit(outcome);
        assert_eq!(sm.kind(), S::Running);

        // Stay outcomes do not count as transitions
        let outcome = sm.check(Op::Kill).unwrap();
        sm.commit(outcome);
        assert_eq!(sm.transition_count(), 3);
    }

    #[test]
    fn test_rejected_operation_leaves_state() {
        let sm = LifecycleStateMachine::new(make_container_id());
        let err = sm.check(Op::Pause).unwrap_err();
        assert!(err.to_string().contains("cannot pause"));
        assert_eq!(sm.kind(), S::Created);
    }

    #[test]
    fn test_checkpoint_state_keeps_params() {
        let params = CheckpointParams {
            image_path: PathBuf::from("/images/ckpt"),
            pid_file: PathBuf::from("/run/bundle/init.pid"),
        };
        let sm = LifecycleStateMachine::from_checkpoint(make_container_id(), params.clone());
        assert_eq!(sm.state(), &InitState::CreatedFromCheckpoint(params));
        assert!(sm.check(Op::Exec).is_err());
    }

    #[test]
    #[should_panic(expected = "invalid state transition")]
    fn test_unreachable_target_panics() {
        let mut sm = LifecycleStateMachine::new(make_container_id());
        sm.transition_to(S::Paused);
    }

    #[test]
    fn test_status_collapses_created_variants() {
        assert_eq!(ProcessStatus::from(S::CreatedFromCheckpoint), ProcessStatus::Created);
        assert_eq!(ProcessStatus::from(S::Paused).name(), "paused");
    }

    #[test]
    fn test_metrics_snapshot() {
        let mut sm = LifecycleStateMachine::new(make_container_id());
        sm.transition_to(S::Stopped);
        let metrics = StateMachineMetrics::from(&sm);
        assert_eq!(metrics.current_state, "stopped");
        assert_eq!(metrics.transition_count, 1);
    }
}
