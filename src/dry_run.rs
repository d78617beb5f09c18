//! Simulated arm for dry runs and tests.
//!
//! [`DryRunArm`] accepts exactly the calls a real arm would, logs them, and
//! optionally records them into a shared [`CommandLog`]. Settle waits are
//! honored so that a dry run keeps the same timing as a live one.

use anyhow::Result;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::pose::JointVector;
use crate::sink::{ArmDriver, ArmState};

/// One call received by a [`DryRunArm`].
#[derive(Clone, Debug, PartialEq)]
pub enum RecordedCall {
    MoveJoints { at: Instant, joints: JointVector },
    Gripper { at: Instant, position: f64 },
}

impl RecordedCall {
    pub fn at(&self) -> Instant {
        match self {
            RecordedCall::MoveJoints { at, .. } | RecordedCall::Gripper { at, .. } => *at,
        }
    }
}

/// Shared, append-only record of driver calls.
#[derive(Clone, Debug, Default)]
pub struct CommandLog {
    calls: Arc<Mutex<Vec<RecordedCall>>>,
}

impl CommandLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, call: RecordedCall) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }

    /// Copy of every call recorded so far.
    pub fn snapshot(&self) -> Vec<RecordedCall> {
        self.calls.lock().map(|c| c.to_vec()).unwrap_or_default()
    }

    /// Joint vectors in the order they were commanded.
    pub fn joint_vectors(&self) -> Vec<JointVector> {
        self.snapshot()
            .into_iter()
            .filter_map(|c| match c {
                RecordedCall::MoveJoints { joints, .. } => Some(joints),
                RecordedCall::Gripper { .. } => None,
            })
            .collect()
    }

    /// Gripper positions in the order they were commanded.
    pub fn gripper_positions(&self) -> Vec<f64> {
        self.snapshot()
            .into_iter()
            .filter_map(|c| match c {
                RecordedCall::Gripper { position, .. } => Some(position),
                RecordedCall::MoveJoints { .. } => None,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Arm driver that performs no I/O.
pub struct DryRunArm {
    label: String,
    state: ArmState,
    log: Option<CommandLog>,
    connected: bool,
}

impl DryRunArm {
    pub fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            state: ArmState::default(),
            log: None,
            connected: false,
        }
    }

    /// State reported before any command has been issued.
    pub fn with_initial_state(mut self, state: ArmState) -> Self {
        self.state = state;
        self
    }

    /// Record every call into `log`.
    pub fn recording(mut self, log: CommandLog) -> Self {
        self.log = Some(log);
        self
    }
}

impl ArmDriver for DryRunArm {
    fn connect(&mut self) -> Result<()> {
        self.connected = true;
        tracing::info!("[{}] dry run: no hardware attached", self.label);
        Ok(())
    }

    fn disconnect(&mut self) {
        if self.connected {
            tracing::debug!("[{}] dry run: disconnected", self.label);
        }
        self.connected = false;
    }

    fn current_joint_state(&mut self) -> Result<ArmState> {
        Ok(self.state)
    }

    fn move_joints(&mut self, joints: &JointVector, settle: Duration) -> Result<()> {
        if !self.connected {
            anyhow::bail!("[{}] move_joints before connect", self.label);
        }
        tracing::trace!(
            "[{}] joints (deg): {:?}",
            self.label,
            joints.map(|j| (j.to_degrees() * 10.0).round() / 10.0)
        );
        if let Some(log) = &self.log {
            log.push(RecordedCall::MoveJoints {
                at: Instant::now(),
                joints: *joints,
            });
        }
        self.state.joints = *joints;
        if !settle.is_zero() {
            std::thread::sleep(settle);
        }
        Ok(())
    }

    fn gripper(&mut self, position: f64, settle: Duration) -> Result<()> {
        if !self.connected {
            anyhow::bail!("[{}] gripper before connect", self.label);
        }
        tracing::trace!("[{}] gripper: {:.3}", self.label, position);
        if let Some(log) = &self.log {
            log.push(RecordedCall::Gripper {
                at: Instant::now(),
                position,
            });
        }
        self.state.gripper = position;
        if !settle.is_zero() {
            std::thread::sleep(settle);
        }
        Ok(())
    }
}
