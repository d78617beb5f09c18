//! End-to-end tests: files on disk through load, dry-run drivers and playback.

use std::path::{Path, PathBuf};
use std::time::Duration;

use choreo::dry_run::{CommandLog, DryRunArm};
use choreo::session::{self, ArmConfig, SessionConfig, Transport};
use choreo::{
    ArmDriver, ConfigError, DispatchMode, LoadError, PlaybackConfig, PlayerState, PoseTable,
};
use tempfile::{tempdir, TempDir};
use tokio_util::sync::CancellationToken;

const POSES: &str = r#"{
  "scenes": [
    {"name": "stand", "joint_positions": {"J1": 0, "J2": 90, "J3": -90, "J4": 0, "J5": 0, "J6": 0}},
    {"name": "left_down", "joint_positions": {"J1": 20, "J2": 70, "J3": -70, "J4": 0, "J5": 10, "J6": 0}, "gripper": 0.8},
    {"name": "right_up", "joint_positions": {"J1": -20, "J2": 100, "J3": -100, "J4": 5, "J5": 0, "J6": 10}}
  ]
}"#;

fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).unwrap();
    path
}

fn fixture() -> TempDir {
    let dir = tempdir().unwrap();
    write(dir.path(), "poses.json", POSES);
    write(
        dir.path(),
        "left.txt",
        "# left arm\n00:00.100 - left_down\n00:00.250 - stand\n",
    );
    write(
        dir.path(),
        "right.txt",
        "00:00.100 - right_up\n00:00.250 - stand\n",
    );
    dir
}

fn config(dir: &Path, schedules: &[&str]) -> SessionConfig {
    let labels = if schedules.len() == 1 {
        vec!["arm"]
    } else {
        vec!["primary", "secondary"]
    };
    SessionConfig {
        poses: dir.join("poses.json"),
        arms: schedules
            .iter()
            .zip(labels)
            .map(|(s, label)| ArmConfig {
                label: label.to_string(),
                schedule: dir.join(s),
                transport: Transport::DryRun,
            })
            .collect(),
        playback: PlaybackConfig::default()
            .with_settle(Duration::from_millis(50))
            .with_sink_timeout(Duration::from_millis(200)),
        startup_pose: false,
        signal: false,
        dispatch: DispatchMode::Parallel,
    }
}

fn recording_drivers(logs: &[CommandLog]) -> Vec<Box<dyn ArmDriver>> {
    logs.iter()
        .map(|log| Box::new(DryRunArm::new("rec").recording(log.clone())) as Box<dyn ArmDriver>)
        .collect()
}

#[tokio::test]
async fn single_arm_dry_run_completes_on_final_pose() {
    let dir = fixture();
    let config = config(dir.path(), &["left.txt"]);
    let loaded = session::load(&config).unwrap();

    let log = CommandLog::new();
    let outcome = session::run_with_drivers(
        &config,
        &loaded,
        recording_drivers(std::slice::from_ref(&log)),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert!(outcome.all_completed());
    let stand = *loaded.poses.get("stand").unwrap().joints();
    assert_eq!(log.joint_vectors().last(), Some(&stand));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dual_arm_dry_run_completes_both() {
    let dir = fixture();
    let config = config(dir.path(), &["left.txt", "right.txt"]);
    let loaded = session::load(&config).unwrap();

    let logs = [CommandLog::new(), CommandLog::new()];
    let outcome = session::run_with_drivers(
        &config,
        &loaded,
        recording_drivers(&logs),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert!(outcome.all_completed());
    assert_eq!(outcome.outcomes().len(), 2);
    assert!(logs.iter().all(|l| !l.is_empty()));
}

#[tokio::test]
async fn startup_pose_moves_to_stand_first() {
    let dir = fixture();
    let mut config = config(dir.path(), &["left.txt"]);
    config.startup_pose = true;
    let loaded = session::load(&config).unwrap();

    let log = CommandLog::new();
    // Startup settle is a few seconds; cancel as soon as playback begins.
    let cancel = CancellationToken::new();
    let outcome = {
        let task_cancel = cancel.clone();
        let task_log = log.clone();
        tokio::spawn(async move {
            loop {
                if task_log.joint_vectors().len() > 1 {
                    task_cancel.cancel();
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        });
        session::run_with_drivers(
            &config,
            &loaded,
            recording_drivers(std::slice::from_ref(&log)),
            cancel,
        )
        .await
        .unwrap()
    };

    let stand = *loaded.poses.get("stand").unwrap().joints();
    assert_eq!(log.joint_vectors()[0], stand);
    assert_eq!(outcome.outcomes()[0].state, PlayerState::Aborted);
}

#[test]
fn missing_startup_pose_is_a_config_error() {
    let dir = fixture();
    write(
        dir.path(),
        "poses.json",
        r#"{"scenes": [{"name": "left_down", "joint_positions": {"J1": 0, "J2": 90, "J3": -90, "J4": 0, "J5": 0, "J6": 0}}]}"#,
    );
    let mut config = config(dir.path(), &["left.txt"]);
    config.startup_pose = true;

    let err = session::load(&config).unwrap_err();
    assert_eq!(
        err.downcast_ref::<ConfigError>(),
        Some(&ConfigError::MissingStartupPose("stand".into()))
    );
}

#[test]
fn unknown_pose_names_file_and_line() {
    let dir = fixture();
    write(dir.path(), "bad.txt", "00:00.000 - stand\n\n00:01.000 - moonwalk\n");
    let err = session::load(&config(dir.path(), &["bad.txt"])).unwrap_err();

    match err.downcast_ref::<LoadError>() {
        Some(LoadError::UnknownPose { line, pose, .. }) => {
            assert_eq!(*line, 3);
            assert_eq!(pose, "moonwalk");
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(err.to_string().contains("bad.txt:3"));
}

#[test]
fn malformed_schedule_line_is_rejected() {
    let dir = fixture();
    write(dir.path(), "bad.txt", "00:00.000 - stand\n6.5 - left_down\n");
    let err = session::load(&config(dir.path(), &["bad.txt"])).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<LoadError>(),
        Some(LoadError::MalformedLine { line: 2, .. })
    ));
}

#[test]
fn missing_files_are_reported() {
    let dir = tempdir().unwrap();
    let err = PoseTable::load(dir.path().join("nope.json")).unwrap_err();
    assert!(matches!(err, LoadError::Io { .. }));
    assert!(err.to_string().contains("nope.json"));
}

#[test]
fn schedule_listing_shows_every_entry() {
    let dir = fixture();
    let loaded = session::load(&config(dir.path(), &["left.txt", "right.txt"])).unwrap();
    let listing = session::schedule_listing(&loaded);
    assert!(listing.contains("[primary]"));
    assert!(listing.contains("00:00.100  left_down"));
    assert!(listing.contains("gripper 0.80"));
    assert!(listing.contains("[secondary]"));
    assert!(listing.contains("right_up"));
}

#[tokio::test]
async fn invalid_tick_rate_is_rejected_before_playback() {
    let dir = fixture();
    let mut config = config(dir.path(), &["left.txt"]);
    config.playback = config.playback.with_tick_rate(0.0);
    let loaded = session::load(&config).unwrap();

    let log = CommandLog::new();
    let err = session::run_with_drivers(
        &config,
        &loaded,
        recording_drivers(std::slice::from_ref(&log)),
        CancellationToken::new(),
    )
    .await
    .unwrap_err();
    assert_eq!(
        err.downcast_ref::<ConfigError>(),
        Some(&ConfigError::InvalidRate(0.0))
    );
    assert!(log.is_empty());
}
