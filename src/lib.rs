//! choreo - timed pose choreography for one or two 6-DOF arms.
//!
//! Named poses and `MM:SS.mmm - pose` schedules are resolved into keyframes,
//! then played back in real time: every control tick the player interpolates
//! between the bracketing keyframes and sends the joint vector to the arm.
//! Two arms share one clock origin so their arrivals line up.
//!
//! # Example
//!
//! ```no_run
//! use choreo::{ArmSink, Choreography, DryRunArm, PlaybackClock, PlaybackConfig, PoseTable,
//!              Schedule, TimelinePlayer};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let poses = PoseTable::load("poses.json")?;
//! let choreography = Choreography::new(Schedule::load("dance.txt")?, &poses)?;
//!
//! let timeout = std::time::Duration::from_millis(50);
//! let sink = ArmSink::open("arm", Box::new(DryRunArm::new("arm")), timeout).await?;
//! let start = sink.current_state().await?;
//! let player = TimelinePlayer::new("arm", start, &choreography.keyframes, sink, PlaybackConfig::default());
//! let outcome = player.run(&PlaybackClock::start(), CancellationToken::new()).await;
//! assert!(outcome.is_completed());
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod clock;
pub mod dry_run;
pub mod error;
pub mod interpolate;
pub mod piper;
pub mod player;
pub mod pose;
pub mod schedule;
pub mod session;
pub mod sink;
pub mod startup;
pub mod sync;

pub use clock::{Clock, ManualClock, PlaybackClock};
pub use dry_run::{CommandLog, DryRunArm, RecordedCall};
pub use error::{ConfigError, LoadError};
pub use interpolate::{value_at, Easing, Interpolation, Motion};
pub use player::{
    AbortReason, PlaybackConfig, PlaybackOutcome, PlaybackReport, PlayerState, Timeline,
    TimelinePlayer,
};
pub use pose::{JointVector, Pose, PoseTable, JOINT_COUNT, JOINT_ORDER};
pub use schedule::{Choreography, Keyframe, Schedule, ScheduleEntry};
pub use session::{SessionConfig, SessionOutcome, Transport};
pub use sink::{ArmDriver, ArmSink, ArmState, JointCommand, SinkError};
pub use sync::{DispatchMode, DualArmSynchronizer, DualOutcome};
