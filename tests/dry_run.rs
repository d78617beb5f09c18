//! Dry-run playback must command exactly what a live arm would receive.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use choreo::{
    ArmDriver, ArmSink, ArmState, Clock, CommandLog, DryRunArm, Easing, Interpolation,
    JointVector, Keyframe, ManualClock, Motion, PlaybackConfig, PlayerState, Pose,
    TimelinePlayer,
};

/// Stand-in for a hardware driver: accepts and remembers every call.
#[derive(Clone, Default)]
struct HardwareArm {
    joints: Arc<Mutex<Vec<JointVector>>>,
    gripper: Arc<Mutex<Vec<f64>>>,
}

impl ArmDriver for HardwareArm {
    fn connect(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    fn disconnect(&mut self) {}

    fn current_joint_state(&mut self) -> anyhow::Result<ArmState> {
        Ok(ArmState::default())
    }

    fn move_joints(&mut self, joints: &JointVector, _settle: Duration) -> anyhow::Result<()> {
        self.joints.lock().unwrap().push(*joints);
        Ok(())
    }

    fn gripper(&mut self, position: f64, _settle: Duration) -> anyhow::Result<()> {
        self.gripper.lock().unwrap().push(position);
        Ok(())
    }
}

fn keyframes() -> Vec<Keyframe> {
    let poses = [
        Pose::from_degrees("stand", [0.0, 90.0, -90.0, 0.0, 0.0, 0.0], None),
        Pose::from_degrees("left_down", [20.0, 70.0, -70.0, 0.0, 10.0, 0.0], Some(0.8)),
        Pose::from_degrees("wave", [-15.0, 95.0, -80.0, 5.0, -5.0, 30.0], Some(0.1)),
    ];
    [0u64, 900, 1500]
        .iter()
        .zip(poses.iter())
        .map(|(ms, pose)| Keyframe::from_pose(Duration::from_millis(*ms + 200), pose))
        .collect()
}

async fn play(driver: Box<dyn ArmDriver>) -> PlayerState {
    let sink = ArmSink::open("arm", driver, Duration::from_millis(200))
        .await
        .unwrap();
    let config = PlaybackConfig::default()
        .with_motion(Motion::new(Interpolation::Cubic, Easing::EaseOut))
        .with_settle(Duration::from_millis(100));
    let mut player = TimelinePlayer::new("arm", ArmState::default(), &keyframes(), sink, config);

    let clock = ManualClock::new();
    // Uneven tick spacing, including one backward read.
    let steps = [0u64, 10, 13, 40, 97, 150, 300, 510, 505, 700, 1100, 1400, 1700, 1800, 1850];
    for step in steps {
        clock.set(Duration::from_millis(step));
        player.tick(clock.elapsed()).await;
    }
    let outcome = player.finish().await;
    outcome.state
}

#[tokio::test]
async fn dry_run_matches_live_commands() {
    let log = CommandLog::new();
    let dry_state = play(Box::new(DryRunArm::new("arm").recording(log.clone()))).await;

    let hardware = HardwareArm::default();
    let live_state = play(Box::new(hardware.clone())).await;

    assert_eq!(dry_state, PlayerState::Completed);
    assert_eq!(live_state, PlayerState::Completed);

    let live_joints = hardware.joints.lock().unwrap().clone();
    let live_gripper = hardware.gripper.lock().unwrap().clone();
    assert!(!live_joints.is_empty());
    assert_eq!(log.joint_vectors(), live_joints);
    assert_eq!(log.gripper_positions(), live_gripper);
}

#[tokio::test]
async fn every_arrival_is_commanded_exactly() {
    let hardware = HardwareArm::default();
    let sink = ArmSink::open("arm", Box::new(hardware.clone()), Duration::from_millis(200))
        .await
        .unwrap();
    let frames = keyframes();
    let mut player = TimelinePlayer::new(
        "arm",
        ArmState::default(),
        &frames,
        sink,
        PlaybackConfig::default().with_motion(Motion::new(Interpolation::Cubic, Easing::EaseInOut)),
    );
    for frame in &frames {
        player.tick(frame.at).await;
    }
    player.finish().await;

    let sent = hardware.joints.lock().unwrap().clone();
    let expected: Vec<JointVector> = frames.iter().map(|f| f.joints).collect();
    assert_eq!(sent, expected);
}
