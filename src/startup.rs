//! Pre-playback moves: settling into the startup pose and the J6 signal.
//!
//! The signal sequence tells onlookers the choreography is about to start:
//!
//! ```text
//! t=0..3  settle at the start pose
//! t=4     J6 +60°
//! t=5     J6 back to start
//! t=6     J6 -60°
//! t=7     J6 back to start, schedule begins
//! ```

use anyhow::Result;
use std::time::Duration;

use crate::pose::Pose;
use crate::schedule::Keyframe;
use crate::sink::{ArmSink, ArmState, JointCommand};

/// Pose name used when a startup pose is requested.
pub const STARTUP_POSE: &str = "stand";

/// Time allowed for the arm to reach the startup pose.
pub const STARTUP_SETTLE: Duration = Duration::from_secs(3);

/// Total length of the signal sequence; the schedule is delayed by this much.
pub const SIGNAL_DURATION: Duration = Duration::from_secs(7);

/// J6 swing during the signal, in degrees either side of the start pose.
pub const SIGNAL_J6_OFFSET_DEG: f64 = 60.0;

const J6: usize = 5;

/// Keyframes of the signal sequence relative to playback start.
///
/// The implicit start keyframe at t=0 is not included.
pub fn signal_keyframes(start: &ArmState) -> Vec<Keyframe> {
    let offset = SIGNAL_J6_OFFSET_DEG.to_radians();
    let steps = [
        (STARTUP_SETTLE, 0.0),
        (Duration::from_secs(4), offset),
        (Duration::from_secs(5), 0.0),
        (Duration::from_secs(6), -offset),
        (SIGNAL_DURATION, 0.0),
    ];
    steps
        .iter()
        .enumerate()
        .map(|(i, (at, delta))| {
            let mut joints = start.joints;
            joints[J6] += delta;
            Keyframe {
                at: *at,
                name: format!("signal_{}", i),
                joints,
                gripper: None,
            }
        })
        .collect()
}

/// Prepend the signal sequence to `keyframes`, delaying them by [`SIGNAL_DURATION`].
///
/// If the schedule starts at zero, its first pose replaces the final
/// return-to-center step so that no two keyframes share an arrival.
pub fn with_signal(start: &ArmState, keyframes: &[Keyframe]) -> Vec<Keyframe> {
    let mut out = signal_keyframes(start);
    if keyframes.first().is_some_and(|kf| kf.at.is_zero()) {
        out.pop();
    }
    out.extend(keyframes.iter().map(|kf| Keyframe {
        at: kf.at + SIGNAL_DURATION,
        ..kf.clone()
    }));
    out
}

/// Move the arm to `pose` and hold it for `settle`.
///
/// Returns the state playback should start from. A pose without a gripper
/// value keeps the arm's current gripper position.
pub async fn move_to_pose(
    sink: &ArmSink,
    pose: &Pose,
    current: ArmState,
    settle: Duration,
) -> Result<ArmState> {
    tracing::info!(
        "[{}] moving to startup pose '{}' ({:?} settle)",
        sink.label(),
        pose.name(),
        settle
    );
    let command = JointCommand {
        joints: *pose.joints(),
        gripper: pose.gripper(),
    };
    sink.send_and_settle(&command, settle)
        .await
        .map_err(|e| anyhow::anyhow!("[{}] startup pose move failed: {}", sink.label(), e))?;
    Ok(ArmState {
        joints: *pose.joints(),
        gripper: pose.gripper().unwrap_or(current.gripper),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dry_run::{CommandLog, DryRunArm};

    fn start() -> ArmState {
        ArmState {
            joints: [0.1, 0.2, 0.3, 0.4, 0.5, 0.6],
            gripper: 0.2,
        }
    }

    #[test]
    fn test_signal_shape() {
        let frames = signal_keyframes(&start());
        let times: Vec<u64> = frames.iter().map(|f| f.at.as_secs()).collect();
        assert_eq!(times, vec![3, 4, 5, 6, 7]);

        let offset = 60f64.to_radians();
        assert_eq!(frames[0].joints, start().joints);
        assert!((frames[1].joints[5] - (0.6 + offset)).abs() < 1e-12);
        assert!((frames[3].joints[5] - (0.6 - offset)).abs() < 1e-12);
        assert_eq!(frames[4].joints, start().joints);
        // Only J6 moves.
        assert_eq!(frames[1].joints[..5], start().joints[..5]);
    }

    #[test]
    fn test_with_signal_shifts_schedule() {
        let kf = Keyframe {
            at: Duration::from_millis(1500),
            name: "wave".into(),
            joints: [0.0; 6],
            gripper: Some(1.0),
        };
        let frames = with_signal(&start(), &[kf]);
        assert_eq!(frames.len(), 6);
        assert_eq!(frames[5].at, Duration::from_millis(8500));
        assert_eq!(frames[5].name, "wave");
        assert_eq!(frames[5].gripper, Some(1.0));
    }

    #[test]
    fn test_with_signal_schedule_at_zero() {
        let kf = Keyframe {
            at: Duration::ZERO,
            name: "stand".into(),
            joints: [0.0; 6],
            gripper: None,
        };
        let frames = with_signal(&start(), &[kf]);
        assert_eq!(frames.len(), 5);
        assert_eq!(frames[4].at, SIGNAL_DURATION);
        assert_eq!(frames[4].name, "stand");
        assert!(frames.windows(2).all(|w| w[0].at < w[1].at));
    }

    #[tokio::test]
    async fn test_move_to_pose() {
        let log = CommandLog::new();
        let arm = DryRunArm::new("s").recording(log.clone());
        let sink = ArmSink::open("s", Box::new(arm), Duration::from_millis(100))
            .await
            .unwrap();
        let stand = Pose::from_degrees(STARTUP_POSE, [0.0, 90.0, -90.0, 0.0, 0.0, 0.0], None);

        let state = move_to_pose(&sink, &stand, start(), Duration::from_millis(20))
            .await
            .unwrap();
        assert_eq!(state.joints, *stand.joints());
        assert_eq!(state.gripper, 0.2);
        assert_eq!(log.joint_vectors(), vec![*stand.joints()]);
        sink.close().await;
    }
}
