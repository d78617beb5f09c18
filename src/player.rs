//! Real-time timeline playback for one arm.
//!
//! A [`Timeline`] turns resolved keyframes into a joint command for any
//! elapsed time. A [`TimelinePlayer`] samples it at a fixed tick rate and
//! pushes the result to an [`ArmSink`], tracking failures and finishing with
//! an exact final pose.
//!
//! ```text
//!   Idle ──tick──▶ Running ──last arrival + settle──▶ Completed
//!                    │
//!                    └──cancel / repeated sink failures──▶ Aborted
//! ```

use std::fmt;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::clock::Clock;
use crate::error::ConfigError;
use crate::interpolate::{blend, value_at, Motion};
use crate::schedule::{format_timestamp, Keyframe};
use crate::sink::{ArmSink, ArmState, JointCommand};

/// Control loop rate used when none (or an invalid one) is configured.
pub const DEFAULT_TICK_RATE_HZ: f64 = 100.0;

/// Tunables for one player.
#[derive(Clone, Debug)]
pub struct PlaybackConfig {
    /// Control loop rate in Hz.
    pub tick_rate_hz: f64,
    /// Joint interpolation and easing.
    pub motion: Motion,
    /// Gripper interpolation; falls back to `motion` when unset.
    pub gripper_motion: Option<Motion>,
    /// How long to hold the last pose after its arrival before completing.
    pub settle: Duration,
    /// Consecutive sink failures tolerated before aborting.
    pub max_consecutive_failures: u32,
    /// Tick gaps longer than this many periods are logged as stalls.
    pub stall_ticks: u32,
    /// Upper bound on a single sink command.
    pub sink_timeout: Duration,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            tick_rate_hz: DEFAULT_TICK_RATE_HZ,
            motion: Motion::default(),
            gripper_motion: None,
            settle: Duration::from_millis(500),
            max_consecutive_failures: 5,
            stall_ticks: 5,
            sink_timeout: Duration::from_millis(50),
        }
    }
}

impl PlaybackConfig {
    pub fn with_tick_rate(mut self, hz: f64) -> Self {
        self.tick_rate_hz = hz;
        self
    }

    pub fn with_motion(mut self, motion: Motion) -> Self {
        self.motion = motion;
        self
    }

    pub fn with_gripper_motion(mut self, motion: Motion) -> Self {
        self.gripper_motion = Some(motion);
        self
    }

    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    pub fn with_max_consecutive_failures(mut self, n: u32) -> Self {
        self.max_consecutive_failures = n;
        self
    }

    pub fn with_sink_timeout(mut self, timeout: Duration) -> Self {
        self.sink_timeout = timeout;
        self
    }

    /// Reject settings the control loop cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.tick_rate_hz.is_finite() && self.tick_rate_hz > 0.0) {
            return Err(ConfigError::InvalidRate(self.tick_rate_hz));
        }
        Ok(())
    }

    /// Time between ticks. An invalid rate falls back to [`DEFAULT_TICK_RATE_HZ`].
    pub fn period(&self) -> Duration {
        let hz = if self.validate().is_ok() {
            self.tick_rate_hz
        } else {
            DEFAULT_TICK_RATE_HZ
        };
        Duration::try_from_secs_f64(1.0 / hz).unwrap_or(Duration::from_millis(10))
    }

    fn gripper_motion(&self) -> Motion {
        self.gripper_motion.unwrap_or(self.motion)
    }
}

/// Keyframes for one arm, with an implicit start keyframe at time zero.
#[derive(Clone, Debug)]
pub struct Timeline {
    keyframes: Vec<Keyframe>,
    /// Gripper value in effect at each keyframe.
    gripper_at: Vec<f64>,
    /// Index of the current segment's end keyframe. Never moves backward.
    cursor: usize,
}

impl Timeline {
    /// Build a timeline starting from `start` at time zero.
    pub fn new(start: &ArmState, entries: &[Keyframe]) -> Self {
        let mut keyframes = Vec::with_capacity(entries.len() + 1);
        keyframes.push(Keyframe {
            at: Duration::ZERO,
            name: "<start>".to_string(),
            joints: start.joints,
            gripper: Some(start.gripper),
        });
        keyframes.extend_from_slice(entries);

        let mut gripper_at = Vec::with_capacity(keyframes.len());
        let mut current = start.gripper;
        for kf in &keyframes {
            current = kf.gripper.unwrap_or(current);
            gripper_at.push(current);
        }

        Self {
            keyframes,
            gripper_at,
            cursor: 1,
        }
    }

    /// Keyframes including the implicit start.
    pub fn keyframes(&self) -> &[Keyframe] {
        &self.keyframes
    }

    /// Arrival of the last keyframe.
    pub fn end(&self) -> Duration {
        self.keyframes.last().map(|k| k.at).unwrap_or_default()
    }

    /// Command for time `now`.
    ///
    /// At a keyframe's arrival the result is that keyframe's pose exactly.
    /// Reads earlier than the current segment start return the segment start.
    pub fn target_at(&mut self, now: Duration, motion: Motion, gripper_motion: Motion) -> JointCommand {
        let last = self.keyframes.len() - 1;
        if last == 0 {
            return self.final_command();
        }
        while self.cursor < last && self.keyframes[self.cursor].at < now {
            self.cursor += 1;
        }

        let end = &self.keyframes[self.cursor];
        if self.cursor == last && now >= end.at {
            return self.final_command();
        }
        let start = &self.keyframes[self.cursor - 1];
        let now = now.max(start.at);

        let joints = value_at(
            &start.joints,
            &end.joints,
            start.at,
            end.at,
            now,
            motion.interpolation,
            motion.easing,
        );
        let gripper = end.gripper.map(|target| {
            let from = self.gripper_at[self.cursor - 1];
            blend(from, target, gripper_motion.progress_at(start.at, end.at, now))
        });
        JointCommand { joints, gripper }
    }

    /// The last keyframe's pose, exactly.
    pub fn final_command(&self) -> JointCommand {
        match self.keyframes.last() {
            Some(last) => JointCommand {
                joints: last.joints,
                gripper: last.gripper,
            },
            None => JointCommand {
                joints: [0.0; crate::pose::JOINT_COUNT],
                gripper: None,
            },
        }
    }
}

/// Lifecycle of a player.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlayerState {
    Idle,
    Running,
    Completed,
    Aborted,
}

impl PlayerState {
    pub fn is_finished(self) -> bool {
        matches!(self, PlayerState::Completed | PlayerState::Aborted)
    }
}

/// Why playback stopped early.
#[derive(Clone, Debug, PartialEq)]
pub enum AbortReason {
    /// External stop request.
    Cancelled,
    /// The sink failed too many times in a row.
    SinkFailures { consecutive: u32, last_error: String },
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::Cancelled => write!(f, "cancelled"),
            AbortReason::SinkFailures {
                consecutive,
                last_error,
            } => write!(
                f,
                "{} consecutive sink failures (last: {})",
                consecutive, last_error
            ),
        }
    }
}

/// Counters collected during playback.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PlaybackReport {
    pub ticks: u64,
    pub commands: u64,
    pub failures: u64,
    pub stalls: u64,
    pub backward_reads: u64,
    /// Clock reading of the last accepted tick.
    pub elapsed: Duration,
}

/// Final result of one player.
#[derive(Clone, Debug)]
pub struct PlaybackOutcome {
    pub label: String,
    pub state: PlayerState,
    pub abort_reason: Option<AbortReason>,
    pub report: PlaybackReport,
}

impl PlaybackOutcome {
    pub fn is_completed(&self) -> bool {
        self.state == PlayerState::Completed
    }
}

/// Drives one arm through a [`Timeline`].
pub struct TimelinePlayer {
    label: String,
    timeline: Timeline,
    sink: ArmSink,
    config: PlaybackConfig,
    state: PlayerState,
    last_now: Option<Duration>,
    safe_pose: JointCommand,
    consecutive_failures: u32,
    abort_reason: Option<AbortReason>,
    report: PlaybackReport,
}

impl TimelinePlayer {
    /// Create an idle player. `start` is the arm's pose at time zero.
    pub fn new(
        label: &str,
        start: ArmState,
        keyframes: &[Keyframe],
        sink: ArmSink,
        config: PlaybackConfig,
    ) -> Self {
        Self {
            label: label.to_string(),
            timeline: Timeline::new(&start, keyframes),
            sink,
            config,
            state: PlayerState::Idle,
            last_now: None,
            safe_pose: JointCommand::from(start),
            consecutive_failures: 0,
            abort_reason: None,
            report: PlaybackReport::default(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn state(&self) -> PlayerState {
        self.state
    }

    pub fn config(&self) -> &PlaybackConfig {
        &self.config
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    /// Advance playback to `now` and issue at most one command.
    pub async fn tick(&mut self, now: Duration) -> PlayerState {
        match self.state {
            PlayerState::Completed | PlayerState::Aborted => return self.state,
            PlayerState::Idle => {
                self.state = PlayerState::Running;
                tracing::info!(
                    "[{}] playback started: {} keyframes, ends at {}",
                    self.label,
                    self.timeline.keyframes().len() - 1,
                    format_timestamp(self.timeline.end())
                );
            }
            PlayerState::Running => {}
        }
        self.report.ticks += 1;

        if let Some(prev) = self.last_now {
            if now < prev {
                self.report.backward_reads += 1;
                tracing::debug!(
                    "[{}] clock read {:?} behind previous tick, ignoring",
                    self.label,
                    prev - now
                );
                return self.state;
            }
            if now == prev {
                return self.state;
            }
            let gap = now - prev;
            let stall = self.config.period() * self.config.stall_ticks;
            if gap > stall {
                self.report.stalls += 1;
                tracing::warn!(
                    "[{}] control loop stalled for {:.1}ms at {}, resuming",
                    self.label,
                    gap.as_secs_f64() * 1000.0,
                    format_timestamp(now)
                );
            }
        }
        self.last_now = Some(now);
        self.report.elapsed = now;

        if now >= self.timeline.end() + self.config.settle {
            self.complete().await;
            return self.state;
        }

        let command = self.timeline.target_at(
            now,
            self.config.motion,
            self.config.gripper_motion(),
        );
        self.dispatch(command).await;
        self.state
    }

    /// Tick on a fixed-rate interval until finished or cancelled.
    pub async fn run<C: Clock>(mut self, clock: &C, cancel: CancellationToken) -> PlaybackOutcome {
        let mut interval = tokio::time::interval(self.config.period());
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.abort(AbortReason::Cancelled).await;
                    break;
                }
                _ = interval.tick() => {
                    if self.tick(clock.elapsed()).await.is_finished() {
                        break;
                    }
                }
            }
        }

        self.finish().await
    }

    /// Abort playback after an external stop request.
    pub async fn cancel(&mut self) {
        if !self.state.is_finished() {
            self.abort(AbortReason::Cancelled).await;
        }
    }

    /// Release the arm and report how playback ended.
    pub async fn finish(self) -> PlaybackOutcome {
        match self.state {
            PlayerState::Completed => tracing::info!(
                "[{}] playback completed at {} ({} commands, {} failures)",
                self.label,
                format_timestamp(self.report.elapsed),
                self.report.commands,
                self.report.failures
            ),
            PlayerState::Aborted => tracing::warn!(
                "[{}] playback aborted: {}",
                self.label,
                self.abort_reason
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_default()
            ),
            PlayerState::Idle | PlayerState::Running => {
                tracing::warn!("[{}] playback stopped while {:?}", self.label, self.state)
            }
        }
        self.sink.close().await;
        PlaybackOutcome {
            label: self.label,
            state: self.state,
            abort_reason: self.abort_reason,
            report: self.report,
        }
    }

    async fn dispatch(&mut self, command: JointCommand) {
        match self.sink.send(&command).await {
            Ok(()) => {
                self.report.commands += 1;
                self.consecutive_failures = 0;
                self.safe_pose = JointCommand {
                    joints: command.joints,
                    gripper: command.gripper.or(self.safe_pose.gripper),
                };
            }
            Err(e) => {
                self.report.failures += 1;
                self.consecutive_failures += 1;
                tracing::warn!(
                    "[{}] command failed ({}/{}): {}",
                    self.label,
                    self.consecutive_failures,
                    self.config.max_consecutive_failures,
                    e
                );
                if self.consecutive_failures >= self.config.max_consecutive_failures {
                    let reason = AbortReason::SinkFailures {
                        consecutive: self.consecutive_failures,
                        last_error: e.to_string(),
                    };
                    self.abort(reason).await;
                }
            }
        }
    }

    async fn complete(&mut self) {
        let command = self.timeline.final_command();
        match self.sink.send(&command).await {
            Ok(()) => {
                self.report.commands += 1;
                self.safe_pose = command;
            }
            Err(e) => {
                self.report.failures += 1;
                tracing::warn!("[{}] final pose command failed: {}", self.label, e);
            }
        }
        self.state = PlayerState::Completed;
    }

    async fn abort(&mut self, reason: AbortReason) {
        self.state = PlayerState::Aborted;
        tracing::warn!(
            "[{}] aborting ({}), holding last known pose",
            self.label,
            reason
        );
        if let Err(e) = self.sink.send(&self.safe_pose).await {
            tracing::error!("[{}] could not command safe pose: {}", self.label, e);
        }
        self.abort_reason = Some(reason);
    }
}
