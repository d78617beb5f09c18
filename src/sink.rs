//! Arm drivers and the thread-backed sink players issue commands through.
//!
//! Drivers ([`ArmDriver`]) are blocking: CAN writes, settle sleeps and
//! feedback reads all happen synchronously. [`ArmSink`] runs one driver on a
//! dedicated OS thread and bridges it to async code with a bounded request
//! channel and per-request oneshot replies. Every request is awaited under a
//! timeout, so a hung driver shows up as a failed command instead of a stalled
//! control loop.

use anyhow::{Context, Result};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::pose::JointVector;

/// Requests that may be queued ahead of the worker before `send` reports busy.
const REQUEST_QUEUE: usize = 2;

/// How long to wait for the driver to connect.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// How long to wait for a joint state read.
const STATE_TIMEOUT: Duration = Duration::from_secs(2);

/// How long `close` waits for the worker thread before detaching it.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Writes slower than this are logged.
const SLOW_WRITE: Duration = Duration::from_millis(5);

/// Last-known arm state.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ArmState {
    /// Joint angles in radians.
    pub joints: JointVector,
    /// Gripper position, 0 = open, 1 = closed.
    pub gripper: f64,
}

/// A single command for one arm.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct JointCommand {
    pub joints: JointVector,
    /// Gripper target; `None` leaves the gripper alone.
    pub gripper: Option<f64>,
}

impl From<ArmState> for JointCommand {
    fn from(state: ArmState) -> Self {
        Self {
            joints: state.joints,
            gripper: Some(state.gripper),
        }
    }
}

/// Blocking interface to one physical (or simulated) arm.
pub trait ArmDriver: Send {
    /// Open the transport and enable the arm.
    fn connect(&mut self) -> Result<()>;

    /// Release the transport. Must be safe to call more than once.
    fn disconnect(&mut self);

    /// Read the current joint positions and gripper.
    fn current_joint_state(&mut self) -> Result<ArmState>;

    /// Command joint positions, then hold for `settle`.
    fn move_joints(&mut self, joints: &JointVector, settle: Duration) -> Result<()>;

    /// Command the gripper, then hold for `settle`.
    fn gripper(&mut self, position: f64, settle: Duration) -> Result<()>;
}

impl<T: ArmDriver + ?Sized> ArmDriver for Box<T> {
    fn connect(&mut self) -> Result<()> {
        (**self).connect()
    }

    fn disconnect(&mut self) {
        (**self).disconnect()
    }

    fn current_joint_state(&mut self) -> Result<ArmState> {
        (**self).current_joint_state()
    }

    fn move_joints(&mut self, joints: &JointVector, settle: Duration) -> Result<()> {
        (**self).move_joints(joints, settle)
    }

    fn gripper(&mut self, position: f64, settle: Duration) -> Result<()> {
        (**self).gripper(position, settle)
    }
}

/// Why a sink request failed.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("arm did not respond within {0:?}")]
    Timeout(Duration),
    #[error("arm worker is still busy with earlier commands")]
    Busy,
    #[error("arm worker has stopped")]
    Disconnected,
    #[error("driver error: {0:#}")]
    Driver(anyhow::Error),
}

enum SinkRequest {
    Command {
        command: JointCommand,
        settle: Duration,
        reply: oneshot::Sender<Result<()>>,
    },
    State {
        reply: oneshot::Sender<Result<ArmState>>,
    },
    Stop,
}

/// Async handle to an [`ArmDriver`] running on its own thread.
pub struct ArmSink {
    label: String,
    requests: mpsc::Sender<SinkRequest>,
    timeout: Duration,
    worker: Option<std::thread::JoinHandle<()>>,
    /// Resolves once the worker has disconnected the driver and is exiting.
    stopped: Option<oneshot::Receiver<()>>,
}

impl ArmSink {
    /// Spawn the worker thread, connect the driver and wait for it to come up.
    ///
    /// `timeout` bounds every command sent through [`ArmSink::send`].
    pub async fn open(
        label: &str,
        driver: Box<dyn ArmDriver>,
        timeout: Duration,
    ) -> Result<Self> {
        let (tx, rx) = mpsc::channel(REQUEST_QUEUE);
        let (connected_tx, connected_rx) = oneshot::channel();
        let (stopped_tx, stopped_rx) = oneshot::channel();

        let worker_label = label.to_string();
        let worker = std::thread::Builder::new()
            .name(format!("arm-{}", label))
            .spawn(move || sink_worker(worker_label, driver, rx, connected_tx, stopped_tx))
            .context("Failed to spawn arm worker thread")?;

        match tokio::time::timeout(CONNECT_TIMEOUT, connected_rx).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => return Err(e.context(format!("[{}] connect failed", label))),
            Ok(Err(_)) => anyhow::bail!("[{}] arm worker exited during connect", label),
            Err(_) => anyhow::bail!("[{}] connect timed out after {:?}", label, CONNECT_TIMEOUT),
        }
        tracing::info!("[{}] arm connected", label);

        Ok(Self {
            label: label.to_string(),
            requests: tx,
            timeout,
            worker: Some(worker),
            stopped: Some(stopped_rx),
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Issue one command without waiting for previous ones to drain.
    ///
    /// A full queue counts as a failure: the player never blocks on the arm.
    pub async fn send(&self, command: &JointCommand) -> Result<(), SinkError> {
        self.request(*command, Duration::ZERO, self.timeout).await
    }

    /// Issue a command and hold it for `settle` (startup moves, abort).
    pub async fn send_and_settle(
        &self,
        command: &JointCommand,
        settle: Duration,
    ) -> Result<(), SinkError> {
        self.request(*command, settle, self.timeout + settle).await
    }

    async fn request(
        &self,
        command: JointCommand,
        settle: Duration,
        timeout: Duration,
    ) -> Result<(), SinkError> {
        let (reply, rx) = oneshot::channel();
        self.requests
            .try_send(SinkRequest::Command {
                command,
                settle,
                reply,
            })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => SinkError::Busy,
                mpsc::error::TrySendError::Closed(_) => SinkError::Disconnected,
            })?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(e))) => Err(SinkError::Driver(e)),
            Ok(Err(_)) => Err(SinkError::Disconnected),
            Err(_) => Err(SinkError::Timeout(timeout)),
        }
    }

    /// Read the arm's current joint state.
    pub async fn current_state(&self) -> Result<ArmState, SinkError> {
        let (reply, rx) = oneshot::channel();
        self.requests
            .send(SinkRequest::State { reply })
            .await
            .map_err(|_| SinkError::Disconnected)?;
        match tokio::time::timeout(STATE_TIMEOUT, rx).await {
            Ok(Ok(Ok(state))) => Ok(state),
            Ok(Ok(Err(e))) => Err(SinkError::Driver(e)),
            Ok(Err(_)) => Err(SinkError::Disconnected),
            Err(_) => Err(SinkError::Timeout(STATE_TIMEOUT)),
        }
    }

    /// Stop the worker, disconnect the driver and wait for the thread to exit.
    ///
    /// Waits at most two seconds: a driver stuck inside a call
    /// is detached and left to finish on its own thread.
    pub async fn close(mut self) {
        let worker = self.worker.take();
        let stopped = self.stopped.take();
        let label = std::mem::take(&mut self.label);
        // Drop sends Stop if there is room; the closed channel ends the worker otherwise.
        drop(self);

        let Some(stopped) = stopped else { return };
        match tokio::time::timeout(CLOSE_TIMEOUT, stopped).await {
            Ok(_) => {
                if let Some(worker) = worker {
                    if worker.join().is_err() {
                        tracing::warn!("[{}] arm worker thread panicked", label);
                    }
                }
            }
            Err(_) => tracing::warn!(
                "[{}] arm worker did not stop within {:?}, detaching it",
                label,
                CLOSE_TIMEOUT
            ),
        }
    }
}

impl Drop for ArmSink {
    fn drop(&mut self) {
        let _ = self.requests.try_send(SinkRequest::Stop);
    }
}

fn sink_worker(
    label: String,
    mut driver: Box<dyn ArmDriver>,
    mut rx: mpsc::Receiver<SinkRequest>,
    connected: oneshot::Sender<Result<()>>,
    stopped: oneshot::Sender<()>,
) {
    if let Err(e) = driver.connect() {
        let _ = connected.send(Err(e));
        return;
    }
    if connected.send(Ok(())).is_err() {
        driver.disconnect();
        return;
    }

    while let Some(request) = rx.blocking_recv() {
        match request {
            SinkRequest::Command {
                command,
                settle,
                reply,
            } => {
                let started = Instant::now();
                let result = apply_command(&mut driver, &command, settle);
                let took = started.elapsed().saturating_sub(settle);
                if took > SLOW_WRITE {
                    tracing::debug!(
                        "[{}] slow arm write: {:.1}ms",
                        label,
                        took.as_secs_f64() * 1000.0
                    );
                }
                let _ = reply.send(result);
            }
            SinkRequest::State { reply } => {
                let _ = reply.send(driver.current_joint_state());
            }
            SinkRequest::Stop => break,
        }
    }

    driver.disconnect();
    tracing::debug!("[{}] arm worker stopped", label);
    let _ = stopped.send(());
}

fn apply_command(
    driver: &mut Box<dyn ArmDriver>,
    command: &JointCommand,
    settle: Duration,
) -> Result<()> {
    match command.gripper {
        Some(position) => {
            driver.move_joints(&command.joints, Duration::ZERO)?;
            driver.gripper(position, settle)
        }
        None => driver.move_joints(&command.joints, settle),
    }
}
