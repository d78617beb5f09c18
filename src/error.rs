//! Error types for loading choreography files and validating configuration.
//!
//! Playback-time failures (sink errors, aborts) are not errors in this sense:
//! they are reported through [`crate::player::PlaybackOutcome`].

use thiserror::Error;

/// Errors raised while loading pose tables and schedules.
///
/// Every variant carries enough context (file, line, pose name) to point the
/// user at the offending input. All of them are fatal before playback starts.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The file could not be read.
    #[error("{file}: cannot read file: {source}")]
    Io {
        file: String,
        #[source]
        source: std::io::Error,
    },

    /// The pose file is not valid JSON or does not have the scene layout.
    #[error("{file}: invalid pose file: {source}")]
    Json {
        file: String,
        #[source]
        source: serde_json::Error,
    },

    /// Two scenes share the same name.
    #[error("{file}: pose '{name}' is defined more than once")]
    DuplicatePose { file: String, name: String },

    /// A scene is missing one of the six joint labels.
    #[error("{file}: pose '{pose}' has no value for joint {joint}")]
    MissingJoint {
        file: String,
        pose: String,
        joint: &'static str,
    },

    /// A joint value is NaN or infinite.
    #[error("{file}: pose '{pose}' joint {joint} is not a finite number")]
    NonFiniteJoint {
        file: String,
        pose: String,
        joint: &'static str,
    },

    /// Gripper value outside `[0, 1]`.
    #[error("{file}: pose '{pose}' gripper {value} is outside [0, 1]")]
    GripperOutOfRange {
        file: String,
        pose: String,
        value: f64,
    },

    /// A schedule line does not match `MM:SS.mmm - pose_name`.
    #[error("{file}:{line}: {reason}: `{content}`")]
    MalformedLine {
        file: String,
        line: usize,
        content: String,
        reason: &'static str,
    },

    /// An entry does not arrive strictly after its predecessor.
    #[error(
        "{file}:{line}: arrival {arrival} is not after {previous} (line {previous_line})"
    )]
    NonIncreasing {
        file: String,
        line: usize,
        arrival: String,
        previous_line: usize,
        previous: String,
    },

    /// The schedule has no entries at all.
    #[error("{file}: schedule has no entries")]
    EmptySchedule { file: String },

    /// A schedule entry references a pose that is not in the pose table.
    #[error("{file}:{line}: pose '{pose}' at {timestamp} not found (available: {available})")]
    UnknownPose {
        file: String,
        line: usize,
        pose: String,
        timestamp: String,
        available: String,
    },
}

/// Errors in the requested run configuration, detected at startup.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    /// Neither single-arm nor dual-arm schedules were given.
    #[error("specify --schedule (single arm) or --primary/--secondary (dual arm)")]
    NoSchedule,

    /// Single-arm and dual-arm schedule options were mixed.
    #[error("cannot use --schedule together with --primary/--secondary")]
    MixedModes,

    /// Dual-arm mode was requested with only one schedule.
    #[error("dual arm mode requires both --primary and --secondary (missing --{missing})")]
    IncompleteDual { missing: &'static str },

    /// The control tick rate is not a positive finite number.
    #[error("tick rate must be a positive number of Hz, got {0}")]
    InvalidRate(f64),

    /// Startup pose requested but the pose table has no such entry.
    #[error("startup pose '{0}' is not defined in the pose file")]
    MissingStartupPose(String),
}
