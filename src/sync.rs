//! Dual-arm playback against one shared clock.
//!
//! Both players sample the same [`PlaybackClock`], so their segment positions
//! agree at every tick. In parallel mode each player runs on its own task; in
//! sequential mode a single loop ticks the primary and then the secondary.
//! Either arm finishing or aborting never stops the other.

use anyhow::Result;
use std::fmt;
use std::str::FromStr;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::clock::{Clock, PlaybackClock};
use crate::player::{PlaybackOutcome, TimelinePlayer};

/// How commands for the two arms are issued.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DispatchMode {
    /// One task per arm.
    #[default]
    Parallel,
    /// Primary then secondary from one loop.
    Sequential,
}

impl fmt::Display for DispatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DispatchMode::Parallel => "parallel",
            DispatchMode::Sequential => "sequential",
        })
    }
}

impl FromStr for DispatchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "parallel" => Ok(DispatchMode::Parallel),
            "sequential" => Ok(DispatchMode::Sequential),
            other => Err(format!("unknown dispatch mode '{}'", other)),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ArmRole {
    Primary,
    Secondary,
}

/// Outcomes of both players.
#[derive(Clone, Debug)]
pub struct DualOutcome {
    pub primary: PlaybackOutcome,
    pub secondary: PlaybackOutcome,
}

impl DualOutcome {
    pub fn all_completed(&self) -> bool {
        self.primary.is_completed() && self.secondary.is_completed()
    }
}

/// Runs a primary and a secondary player to completion.
pub struct DualArmSynchronizer {
    primary: TimelinePlayer,
    secondary: TimelinePlayer,
    mode: DispatchMode,
}

impl DualArmSynchronizer {
    pub fn new(primary: TimelinePlayer, secondary: TimelinePlayer, mode: DispatchMode) -> Self {
        Self {
            primary,
            secondary,
            mode,
        }
    }

    /// Start a shared clock now and play both timelines against it.
    pub async fn run(self, cancel: CancellationToken) -> Result<DualOutcome> {
        self.run_with_clock(PlaybackClock::start(), cancel).await
    }

    pub async fn run_with_clock(
        self,
        clock: PlaybackClock,
        cancel: CancellationToken,
    ) -> Result<DualOutcome> {
        tracing::info!(
            "Dual arm playback: {} + {} ({} dispatch)",
            self.primary.label(),
            self.secondary.label(),
            self.mode
        );
        match self.mode {
            DispatchMode::Parallel => self.run_parallel(clock, cancel).await,
            DispatchMode::Sequential => self.run_sequential(clock, cancel).await,
        }
    }

    async fn run_parallel(
        self,
        clock: PlaybackClock,
        cancel: CancellationToken,
    ) -> Result<DualOutcome> {
        let (tx, mut rx) = mpsc::channel::<(ArmRole, PlaybackOutcome)>(2);

        for (role, player) in [
            (ArmRole::Primary, self.primary),
            (ArmRole::Secondary, self.secondary),
        ] {
            let tx = tx.clone();
            let cancel = cancel.child_token();
            tokio::spawn(async move {
                let outcome = player.run(&clock, cancel).await;
                let _ = tx.send((role, outcome)).await;
            });
        }
        drop(tx);

        let mut primary = None;
        let mut secondary = None;
        while let Some((role, outcome)) = rx.recv().await {
            match role {
                ArmRole::Primary => primary = Some(outcome),
                ArmRole::Secondary => secondary = Some(outcome),
            }
        }

        match (primary, secondary) {
            (Some(primary), Some(secondary)) => Ok(DualOutcome { primary, secondary }),
            (None, _) => anyhow::bail!("primary player task exited without an outcome"),
            (_, None) => anyhow::bail!("secondary player task exited without an outcome"),
        }
    }

    async fn run_sequential(
        self,
        clock: PlaybackClock,
        cancel: CancellationToken,
    ) -> Result<DualOutcome> {
        let mut primary = self.primary;
        let mut secondary = self.secondary;
        let period = primary.config().period().min(secondary.config().period());
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    primary.cancel().await;
                    secondary.cancel().await;
                    break;
                }
                _ = interval.tick() => {
                    let now = clock.elapsed();
                    let p = primary.tick(now).await;
                    let s = secondary.tick(now).await;
                    if p.is_finished() && s.is_finished() {
                        break;
                    }
                }
            }
        }

        Ok(DualOutcome {
            primary: primary.finish().await,
            secondary: secondary.finish().await,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dry_run::{CommandLog, DryRunArm, RecordedCall};
    use crate::player::{AbortReason, PlaybackConfig, PlayerState};
    use crate::schedule::Keyframe;
    use crate::sink::{ArmDriver, ArmSink, ArmState};
    use std::time::Duration;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    fn frames(sign: f64) -> Vec<Keyframe> {
        vec![
            Keyframe {
                at: ms(100),
                name: "a".into(),
                joints: [0.3 * sign; 6],
                gripper: None,
            },
            Keyframe {
                at: ms(250),
                name: "b".into(),
                joints: [0.6 * sign; 6],
                gripper: None,
            },
        ]
    }

    async fn player(label: &str, sign: f64, log: &CommandLog) -> TimelinePlayer {
        let arm = DryRunArm::new(label).recording(log.clone());
        let sink = ArmSink::open(label, Box::new(arm), ms(200)).await.unwrap();
        TimelinePlayer::new(
            label,
            ArmState::default(),
            &frames(sign),
            sink,
            PlaybackConfig::default().with_settle(ms(50)),
        )
    }

    /// Time of the first command whose joints are at least `level` away from zero.
    ///
    /// Both test arms move monotonically away from zero, so this is when an
    /// arm passes a given point of its timeline.
    fn crossing(log: &CommandLog, level: f64) -> std::time::Instant {
        log.snapshot()
            .into_iter()
            .find_map(|c| match c {
                RecordedCall::MoveJoints { at, joints } if joints[0].abs() >= level - 1e-9 => {
                    Some(at)
                }
                _ => None,
            })
            .unwrap()
    }

    /// Driver that rejects every move.
    struct BrokenArm;

    impl ArmDriver for BrokenArm {
        fn connect(&mut self) -> anyhow::Result<()> {
            Ok(())
        }

        fn disconnect(&mut self) {}

        fn current_joint_state(&mut self) -> anyhow::Result<ArmState> {
            Ok(ArmState::default())
        }

        fn move_joints(&mut self, _joints: &[f64; 6], _settle: Duration) -> anyhow::Result<()> {
            anyhow::bail!("bus off")
        }

        fn gripper(&mut self, _position: f64, _settle: Duration) -> anyhow::Result<()> {
            anyhow::bail!("bus off")
        }
    }

    async fn broken_player(label: &str) -> TimelinePlayer {
        let sink = ArmSink::open(label, Box::new(BrokenArm), ms(200)).await.unwrap();
        TimelinePlayer::new(
            label,
            ArmState::default(),
            &frames(-1.0),
            sink,
            PlaybackConfig::default().with_settle(ms(50)),
        )
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_parallel_arrivals_are_synchronized() {
        let left = CommandLog::new();
        let right = CommandLog::new();
        let sync = DualArmSynchronizer::new(
            player("left", 1.0, &left).await,
            player("right", -1.0, &right).await,
            DispatchMode::Parallel,
        );
        let outcome = sync.run(CancellationToken::new()).await.unwrap();
        assert!(outcome.all_completed());

        // Compare when each arm passes the same point of its timeline, from
        // the first segment through both arrivals.
        for step in 1..=12 {
            let level = 0.05 * step as f64;
            let l = crossing(&left, level);
            let r = crossing(&right, level);
            let skew = if l > r { l - r } else { r - l };
            assert!(skew < ms(50), "skew {:?} at level {:.2}", skew, level);
        }
        assert_eq!(left.joint_vectors().last(), Some(&[0.6; 6]));
        assert_eq!(right.joint_vectors().last(), Some(&[-0.6; 6]));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_one_arm_aborting_leaves_the_other_running() {
        for mode in [DispatchMode::Parallel, DispatchMode::Sequential] {
            let left = CommandLog::new();
            let sync = DualArmSynchronizer::new(
                player("left", 1.0, &left).await,
                broken_player("right").await,
                mode,
            );
            let outcome = sync.run(CancellationToken::new()).await.unwrap();

            assert_eq!(outcome.primary.state, PlayerState::Completed, "{mode}");
            assert_eq!(outcome.secondary.state, PlayerState::Aborted, "{mode}");
            assert!(
                matches!(
                    outcome.secondary.abort_reason,
                    Some(AbortReason::SinkFailures { .. })
                ),
                "{mode}"
            );
            assert!(!outcome.all_completed());
            assert_eq!(left.joint_vectors().last(), Some(&[0.6; 6]), "{mode}");
        }
    }

    #[tokio::test]
    async fn test_sequential_mode_completes_both() {
        let left = CommandLog::new();
        let right = CommandLog::new();
        let sync = DualArmSynchronizer::new(
            player("left", 1.0, &left).await,
            player("right", -1.0, &right).await,
            DispatchMode::Sequential,
        );
        let outcome = sync.run(CancellationToken::new()).await.unwrap();
        assert!(outcome.all_completed());
        assert_eq!(left.joint_vectors().last(), Some(&[0.6; 6]));
        assert_eq!(right.joint_vectors().last(), Some(&[-0.6; 6]));
    }

    #[tokio::test]
    async fn test_cancel_aborts_both() {
        for mode in [DispatchMode::Parallel, DispatchMode::Sequential] {
            let left = CommandLog::new();
            let right = CommandLog::new();
            let sync = DualArmSynchronizer::new(
                player("left", 1.0, &left).await,
                player("right", -1.0, &right).await,
                mode,
            );
            let cancel = CancellationToken::new();
            cancel.cancel();
            let outcome = sync.run(cancel).await.unwrap();
            assert_eq!(outcome.primary.state, PlayerState::Aborted, "{mode}");
            assert_eq!(outcome.secondary.state, PlayerState::Aborted, "{mode}");
        }
    }

    #[test]
    fn test_parse_mode() {
        assert_eq!("Sequential".parse::<DispatchMode>(), Ok(DispatchMode::Sequential));
        assert!("both".parse::<DispatchMode>().is_err());
    }
}
