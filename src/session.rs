//! A complete choreography run: load, connect, startup, play, disconnect.

use anyhow::{Context, Result};
use std::fmt::Write as _;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

use crate::clock::PlaybackClock;
use crate::dry_run::DryRunArm;
use crate::error::ConfigError;
use crate::piper;
use crate::player::{PlaybackConfig, PlaybackOutcome, TimelinePlayer};
use crate::pose::PoseTable;
use crate::schedule::{format_timestamp, Choreography, Schedule};
use crate::sink::{ArmDriver, ArmSink};
use crate::startup::{self, STARTUP_POSE, STARTUP_SETTLE};
use crate::sync::{DispatchMode, DualArmSynchronizer, DualOutcome};

/// Where an arm's commands go.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Transport {
    /// Log (and optionally record) commands instead of sending them.
    DryRun,
    /// A named SocketCAN interface.
    SocketCan(String),
    /// First CAN interface not already used by another arm.
    Auto,
}

impl Transport {
    /// Interpret a `--can` style identifier.
    pub fn from_interface(iface: &str) -> Self {
        if iface.eq_ignore_ascii_case("auto") {
            Transport::Auto
        } else {
            Transport::SocketCan(iface.to_string())
        }
    }
}

/// One arm of the session.
#[derive(Clone, Debug)]
pub struct ArmConfig {
    pub label: String,
    pub schedule: PathBuf,
    pub transport: Transport,
}

/// Validated run configuration.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub poses: PathBuf,
    /// One arm, or primary then secondary.
    pub arms: Vec<ArmConfig>,
    pub playback: PlaybackConfig,
    /// Move to the `stand` pose before playback.
    pub startup_pose: bool,
    /// Play the J6 signal sequence before the schedule.
    pub signal: bool,
    pub dispatch: DispatchMode,
}

/// Poses and resolved schedules, ready to play.
#[derive(Clone, Debug)]
pub struct LoadedSession {
    pub poses: PoseTable,
    pub arms: Vec<(ArmConfig, Choreography)>,
}

/// How a session ended.
#[derive(Clone, Debug)]
pub enum SessionOutcome {
    Single(PlaybackOutcome),
    Dual(DualOutcome),
}

impl SessionOutcome {
    /// True if every arm completed its schedule.
    pub fn all_completed(&self) -> bool {
        match self {
            SessionOutcome::Single(outcome) => outcome.is_completed(),
            SessionOutcome::Dual(dual) => dual.all_completed(),
        }
    }

    pub fn outcomes(&self) -> Vec<&PlaybackOutcome> {
        match self {
            SessionOutcome::Single(outcome) => vec![outcome],
            SessionOutcome::Dual(dual) => vec![&dual.primary, &dual.secondary],
        }
    }
}

/// Load the pose table and every arm's schedule, logging load-time warnings.
///
/// All validation happens here, before any hardware is touched.
pub fn load(config: &SessionConfig) -> Result<LoadedSession> {
    let poses = PoseTable::load(&config.poses)?;
    tracing::info!(
        "Loaded {} poses from {}",
        poses.len(),
        config.poses.display()
    );
    if config.startup_pose && poses.get(STARTUP_POSE).is_none() {
        return Err(ConfigError::MissingStartupPose(STARTUP_POSE.to_string()).into());
    }

    let mut arms = Vec::with_capacity(config.arms.len());
    for arm in &config.arms {
        let schedule = Schedule::load(&arm.schedule)?;
        let choreography = Choreography::new(schedule, &poses)?;
        tracing::info!(
            "[{}] {} entries, {} long",
            arm.label,
            choreography.keyframes.len(),
            format_timestamp(choreography.schedule.duration())
        );
        choreography.log_warnings(&arm.label);
        arms.push((arm.clone(), choreography));
    }

    Ok(LoadedSession { poses, arms })
}

/// Human-readable listing of what each arm will do.
pub fn schedule_listing(loaded: &LoadedSession) -> String {
    let mut out = String::new();
    for (arm, choreography) in &loaded.arms {
        let _ = writeln!(out, "[{}] {}", arm.label, choreography.schedule.file());
        for kf in &choreography.keyframes {
            let gripper = kf
                .gripper
                .map(|g| format!("  gripper {:.2}", g))
                .unwrap_or_default();
            let _ = writeln!(
                out,
                "  {}  {:<20}{}",
                format_timestamp(kf.at),
                kf.name,
                gripper
            );
        }
        for warning in &choreography.warnings {
            let _ = writeln!(out, "  warning: {}", warning);
        }
    }
    out
}

/// Build the driver for each arm. `Auto` picks distinct CAN interfaces.
pub fn open_drivers(arms: &[ArmConfig]) -> Result<Vec<Box<dyn ArmDriver>>> {
    let mut taken: Vec<String> = arms
        .iter()
        .filter_map(|a| match &a.transport {
            Transport::SocketCan(iface) => Some(iface.clone()),
            _ => None,
        })
        .collect();

    let mut drivers = Vec::with_capacity(arms.len());
    for arm in arms {
        let driver: Box<dyn ArmDriver> = match &arm.transport {
            Transport::DryRun => Box::new(DryRunArm::new(&arm.label)),
            Transport::SocketCan(iface) => open_can(&arm.label, iface)?,
            Transport::Auto => {
                let available = piper::list_interfaces()
                    .context("Failed to list CAN interfaces")?;
                let iface = available
                    .into_iter()
                    .find(|i| !taken.contains(i))
                    .with_context(|| format!("[{}] no free CAN interface found", arm.label))?;
                tracing::info!("[{}] auto-selected CAN interface {}", arm.label, iface);
                taken.push(iface.clone());
                open_can(&arm.label, &iface)?
            }
        };
        drivers.push(driver);
    }
    Ok(drivers)
}

#[cfg(feature = "can")]
fn open_can(label: &str, iface: &str) -> Result<Box<dyn ArmDriver>> {
    let bus = piper::SocketCanBus::open(iface)?;
    Ok(Box::new(piper::PiperArm::new(label, bus)))
}

#[cfg(not(feature = "can"))]
fn open_can(label: &str, iface: &str) -> Result<Box<dyn ArmDriver>> {
    anyhow::bail!(
        "[{}] cannot open {}: built without CAN support (enable the `can` feature) or use --dry-run",
        label,
        iface
    )
}

/// Load, connect and play the whole session.
pub async fn run(config: &SessionConfig, cancel: CancellationToken) -> Result<SessionOutcome> {
    let loaded = load(config)?;
    let drivers = open_drivers(&config.arms)?;
    run_with_drivers(config, &loaded, drivers, cancel).await
}

/// Play an already-loaded session on the given drivers (one per arm).
pub async fn run_with_drivers(
    config: &SessionConfig,
    loaded: &LoadedSession,
    drivers: Vec<Box<dyn ArmDriver>>,
    cancel: CancellationToken,
) -> Result<SessionOutcome> {
    anyhow::ensure!(
        drivers.len() == loaded.arms.len(),
        "expected {} drivers, got {}",
        loaded.arms.len(),
        drivers.len()
    );
    config.playback.validate()?;

    let mut sinks = Vec::with_capacity(drivers.len());
    for ((arm, _), driver) in loaded.arms.iter().zip(drivers) {
        sinks.push(ArmSink::open(&arm.label, driver, config.playback.sink_timeout).await?);
    }

    let mut prepared = Vec::with_capacity(sinks.len());
    let mut sinks = sinks.into_iter();
    match loaded.arms.as_slice() {
        [(arm, choreo)] => {
            let sink = sinks.next().context("missing sink")?;
            prepared.push(prepare(config, loaded, arm, choreo, sink).await?);
        }
        [(a, ca), (b, cb)] => {
            let (sa, sb) = (
                sinks.next().context("missing primary sink")?,
                sinks.next().context("missing secondary sink")?,
            );
            let (pa, pb) = tokio::try_join!(
                prepare(config, loaded, a, ca, sa),
                prepare(config, loaded, b, cb, sb)
            )?;
            prepared.push(pa);
            prepared.push(pb);
        }
        other => anyhow::bail!("expected one or two arms, got {}", other.len()),
    }

    let mut players = prepared.into_iter();
    match (players.next(), players.next()) {
        (Some(player), None) => {
            let outcome = player.run(&PlaybackClock::start(), cancel).await;
            Ok(SessionOutcome::Single(outcome))
        }
        (Some(primary), Some(secondary)) => {
            let outcome = DualArmSynchronizer::new(primary, secondary, config.dispatch)
                .run(cancel)
                .await?;
            Ok(SessionOutcome::Dual(outcome))
        }
        _ => anyhow::bail!("no arms configured"),
    }
}

async fn prepare(
    config: &SessionConfig,
    loaded: &LoadedSession,
    arm: &ArmConfig,
    choreography: &Choreography,
    sink: ArmSink,
) -> Result<TimelinePlayer> {
    let current = sink
        .current_state()
        .await
        .with_context(|| format!("[{}] failed to read joint state", arm.label))?;

    let start = if config.startup_pose {
        let pose = loaded
            .poses
            .get(STARTUP_POSE)
            .ok_or_else(|| ConfigError::MissingStartupPose(STARTUP_POSE.to_string()))?;
        startup::move_to_pose(&sink, pose, current, STARTUP_SETTLE).await?
    } else {
        current
    };

    let keyframes = if config.signal {
        tracing::info!("[{}] signal sequence before start", arm.label);
        startup::with_signal(&start, &choreography.keyframes)
    } else {
        choreography.keyframes.clone()
    };

    Ok(TimelinePlayer::new(
        &arm.label,
        start,
        &keyframes,
        sink,
        config.playback.clone(),
    ))
}
