//! Command-line options for the `choreography` binary.

use clap::{ArgAction, Parser};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;
use crate::interpolate::{Easing, Interpolation, Motion};
use crate::player::PlaybackConfig;
use crate::session::{ArmConfig, SessionConfig, Transport};
use crate::sync::DispatchMode;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "choreography",
    version,
    about = "Play timed pose schedules on one or two Piper arms",
    after_help = "Schedule lines look like `00:06.500 - left_down`. \
                  Use --schedule for one arm or --primary/--secondary for two."
)]
pub struct Cli {
    /// Pose file (JSON scenes)
    #[arg(long, default_value = "poses.json")]
    pub poses: PathBuf,

    /// Schedule for single-arm mode
    #[arg(long)]
    pub schedule: Option<PathBuf>,

    /// Schedule for the primary arm (dual-arm mode)
    #[arg(long)]
    pub primary: Option<PathBuf>,

    /// Schedule for the secondary arm (dual-arm mode)
    #[arg(long)]
    pub secondary: Option<PathBuf>,

    /// CAN interface for single-arm mode, or `auto`
    #[arg(long, default_value = "auto")]
    pub can: String,

    /// CAN interface for the primary arm, or `auto`
    #[arg(long, default_value = "auto")]
    pub primary_can: String,

    /// CAN interface for the secondary arm, or `auto`
    #[arg(long, default_value = "auto")]
    pub secondary_can: String,

    /// Interpolation between keyframes: linear, cubic
    #[arg(long, default_value_t = Interpolation::Linear)]
    pub interpolation: Interpolation,

    /// Easing: linear, ease-in, ease-out, ease-in-out
    #[arg(long, default_value_t = Easing::Linear)]
    pub easing: Easing,

    /// Interpolation for the gripper (defaults to --interpolation)
    #[arg(long)]
    pub gripper_interpolation: Option<Interpolation>,

    /// Move to the `stand` pose before playback
    #[arg(long, action = ArgAction::SetTrue)]
    pub startup_pose: bool,

    /// Wiggle J6 before starting (adds 7 seconds)
    #[arg(long, action = ArgAction::SetTrue)]
    pub signal: bool,

    /// Print the schedule and simulate playback without hardware
    #[arg(long, action = ArgAction::SetTrue)]
    pub dry_run: bool,

    /// Command both arms from one loop instead of one task per arm
    #[arg(long, action = ArgAction::SetTrue)]
    pub sequential: bool,

    /// Control loop rate in Hz
    #[arg(long, default_value_t = 100.0)]
    pub rate: f64,

    /// Hold time after the last pose, in milliseconds
    #[arg(long, default_value_t = 500)]
    pub settle_ms: u64,

    /// Only log warnings and errors
    #[arg(long, short, action = ArgAction::SetTrue)]
    pub quiet: bool,
}

impl Cli {
    /// Validate option combinations and build the session configuration.
    pub fn into_config(self) -> Result<SessionConfig, ConfigError> {
        let transport = |iface: &str| {
            if self.dry_run {
                Transport::DryRun
            } else {
                Transport::from_interface(iface)
            }
        };

        let arms = match (&self.schedule, &self.primary, &self.secondary) {
            (Some(_), Some(_), _) | (Some(_), _, Some(_)) => return Err(ConfigError::MixedModes),
            (Some(schedule), None, None) => vec![ArmConfig {
                label: "arm".to_string(),
                schedule: schedule.clone(),
                transport: transport(&self.can),
            }],
            (None, Some(primary), Some(secondary)) => vec![
                ArmConfig {
                    label: "primary".to_string(),
                    schedule: primary.clone(),
                    transport: transport(&self.primary_can),
                },
                ArmConfig {
                    label: "secondary".to_string(),
                    schedule: secondary.clone(),
                    transport: transport(&self.secondary_can),
                },
            ],
            (None, Some(_), None) => {
                return Err(ConfigError::IncompleteDual {
                    missing: "secondary",
                })
            }
            (None, None, Some(_)) => return Err(ConfigError::IncompleteDual { missing: "primary" }),
            (None, None, None) => return Err(ConfigError::NoSchedule),
        };

        let motion = Motion::new(self.interpolation, self.easing);
        let mut playback = PlaybackConfig::default()
            .with_tick_rate(self.rate)
            .with_motion(motion)
            .with_settle(Duration::from_millis(self.settle_ms));
        if let Some(interpolation) = self.gripper_interpolation {
            playback = playback.with_gripper_motion(Motion::new(interpolation, self.easing));
        }
        playback.validate()?;

        Ok(SessionConfig {
            poses: self.poses,
            arms,
            playback,
            startup_pose: self.startup_pose,
            signal: self.signal,
            dispatch: if self.sequential {
                DispatchMode::Sequential
            } else {
                DispatchMode::Parallel
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("choreography").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_single_arm() {
        let config = parse(&["--schedule", "s.txt", "--can", "can1", "--interpolation", "cubic"])
            .into_config()
            .unwrap();
        assert_eq!(config.arms.len(), 1);
        assert_eq!(config.arms[0].transport, Transport::SocketCan("can1".into()));
        assert_eq!(config.playback.motion.interpolation, Interpolation::Cubic);
        assert_eq!(config.playback.settle, Duration::from_millis(500));
        assert_eq!(config.dispatch, DispatchMode::Parallel);
    }

    #[test]
    fn test_dual_arm_dry_run() {
        let config = parse(&[
            "--primary",
            "a.txt",
            "--secondary",
            "b.txt",
            "--dry-run",
            "--sequential",
            "--easing",
            "ease-out",
        ])
        .into_config()
        .unwrap();
        assert_eq!(config.arms.len(), 2);
        assert_eq!(config.arms[0].label, "primary");
        assert!(config.arms.iter().all(|a| a.transport == Transport::DryRun));
        assert_eq!(config.dispatch, DispatchMode::Sequential);
        assert_eq!(config.playback.motion.easing, Easing::EaseOut);
    }

    #[test]
    fn test_invalid_combinations() {
        assert_eq!(parse(&[]).into_config().unwrap_err(), ConfigError::NoSchedule);
        assert_eq!(
            parse(&["--schedule", "s", "--primary", "a"]).into_config().unwrap_err(),
            ConfigError::MixedModes
        );
        assert_eq!(
            parse(&["--primary", "a"]).into_config().unwrap_err(),
            ConfigError::IncompleteDual { missing: "secondary" }
        );
        assert_eq!(
            parse(&["--schedule", "s", "--rate", "0"]).into_config().unwrap_err(),
            ConfigError::InvalidRate(0.0)
        );
    }

    #[test]
    fn test_bad_interpolation_is_rejected_by_parser() {
        let result = Cli::try_parse_from(["choreography", "--schedule", "s", "--interpolation", "spline"]);
        assert!(result.is_err());
    }
}
