//! Timed schedules: `MM:SS.mmm - pose_name` lines resolved against a pose table.
//!
//! ```text
//! # warm up
//! 00:00.000 - stand
//! 00:06.500 - left_down
//! 01:02.250 – wave
//! ```
//!
//! Blank lines and lines starting with `#` are ignored. Every other line must
//! match the grammar; a malformed line fails the whole load with its line
//! number. Arrivals must be strictly increasing.

use std::path::Path;
use std::time::Duration;

use crate::error::LoadError;
use crate::pose::{JointVector, Pose, PoseTable, JOINT_COUNT, JOINT_MAX_SPEED_DEG, JOINT_ORDER};

/// One parsed schedule line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScheduleEntry {
    /// Offset from playback start at which the pose must be reached.
    pub arrival: Duration,
    /// Name of the pose to reach.
    pub pose: String,
    /// 1-based line number in the source file.
    pub line: usize,
}

/// An ordered list of timed pose targets for one arm.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Schedule {
    file: String,
    entries: Vec<ScheduleEntry>,
}

impl Schedule {
    /// Read and parse a schedule file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, LoadError> {
        let path = path.as_ref();
        let file = path.display().to_string();
        let text = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
            file: file.clone(),
            source,
        })?;
        Self::parse(&text, &file)
    }

    /// Parse schedule text. `file` is only used in error messages.
    pub fn parse(text: &str, file: &str) -> Result<Self, LoadError> {
        let mut entries: Vec<ScheduleEntry> = Vec::new();

        for (idx, raw) in text.lines().enumerate() {
            let line = idx + 1;
            let trimmed = raw.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            let (arrival, pose) =
                parse_line(trimmed).map_err(|reason| LoadError::MalformedLine {
                    file: file.to_string(),
                    line,
                    content: trimmed.to_string(),
                    reason,
                })?;

            if let Some(prev) = entries.last() {
                if arrival <= prev.arrival {
                    return Err(LoadError::NonIncreasing {
                        file: file.to_string(),
                        line,
                        arrival: format_timestamp(arrival),
                        previous_line: prev.line,
                        previous: format_timestamp(prev.arrival),
                    });
                }
            }

            entries.push(ScheduleEntry {
                arrival,
                pose: pose.to_string(),
                line,
            });
        }

        if entries.is_empty() {
            return Err(LoadError::EmptySchedule {
                file: file.to_string(),
            });
        }

        Ok(Self {
            file: file.to_string(),
            entries,
        })
    }

    /// Source name used in messages.
    pub fn file(&self) -> &str {
        &self.file
    }

    pub fn entries(&self) -> &[ScheduleEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Arrival of the last entry.
    pub fn duration(&self) -> Duration {
        self.entries.last().map(|e| e.arrival).unwrap_or_default()
    }

    /// Copy of this schedule with every arrival delayed by `offset`.
    pub fn shifted(&self, offset: Duration) -> Self {
        Self {
            file: self.file.clone(),
            entries: self
                .entries
                .iter()
                .map(|e| ScheduleEntry {
                    arrival: e.arrival + offset,
                    ..e.clone()
                })
                .collect(),
        }
    }

    /// Resolve every entry against the pose table.
    ///
    /// Fails on the first entry whose pose is unknown, naming the entry's line,
    /// timestamp and the poses that are available.
    pub fn resolve(&self, poses: &PoseTable) -> Result<Vec<Keyframe>, LoadError> {
        self.entries
            .iter()
            .map(|entry| {
                let pose = poses.get(&entry.pose).ok_or_else(|| LoadError::UnknownPose {
                    file: self.file.clone(),
                    line: entry.line,
                    pose: entry.pose.clone(),
                    timestamp: format_timestamp(entry.arrival),
                    available: poses.available(),
                })?;
                Ok(Keyframe::from_pose(entry.arrival, pose))
            })
            .collect()
    }
}

/// A resolved target: joint vector (radians) and optional gripper at a time.
#[derive(Clone, Debug, PartialEq)]
pub struct Keyframe {
    pub at: Duration,
    pub name: String,
    pub joints: JointVector,
    pub gripper: Option<f64>,
}

impl Keyframe {
    pub fn from_pose(at: Duration, pose: &Pose) -> Self {
        Self {
            at,
            name: pose.name().to_string(),
            joints: *pose.joints(),
            gripper: pose.gripper(),
        }
    }
}

/// A schedule together with its resolved keyframes and load-time warnings.
#[derive(Clone, Debug)]
pub struct Choreography {
    pub schedule: Schedule,
    pub keyframes: Vec<Keyframe>,
    pub warnings: Vec<String>,
}

impl Choreography {
    /// Resolve `schedule` against `poses` and collect limit and speed warnings.
    pub fn new(schedule: Schedule, poses: &PoseTable) -> Result<Self, LoadError> {
        let keyframes = schedule.resolve(poses)?;
        let mut warnings = Vec::new();

        let mut seen = std::collections::HashSet::new();
        for entry in schedule.entries() {
            if seen.insert(entry.pose.as_str()) {
                if let Some(pose) = poses.get(&entry.pose) {
                    warnings.extend(pose.limit_violations());
                }
            }
        }
        warnings.extend(speed_warnings(&keyframes));

        Ok(Self {
            schedule,
            keyframes,
            warnings,
        })
    }

    /// Log every warning through `tracing`. Warnings never stop playback.
    pub fn log_warnings(&self, label: &str) {
        for warning in &self.warnings {
            tracing::warn!("[{}] {}: {}", label, self.schedule.file(), warning);
        }
    }
}

/// Transitions whose required joint speed exceeds the conservative limit.
pub fn speed_warnings(keyframes: &[Keyframe]) -> Vec<String> {
    let mut out = Vec::new();
    for pair in keyframes.windows(2) {
        let (from, to) = (&pair[0], &pair[1]);
        let dt = to.at.saturating_sub(from.at).as_secs_f64();
        if dt <= 0.0 {
            continue;
        }
        for joint in 0..JOINT_COUNT {
            let delta = (to.joints[joint] - from.joints[joint]).abs().to_degrees();
            let speed = delta / dt;
            if speed > JOINT_MAX_SPEED_DEG {
                out.push(format!(
                    "speed: {} {} -> {} {} needs {:.0}°/s ({:.1}° in {:.3}s, limit {:.0}°/s)",
                    format_timestamp(from.at),
                    from.name,
                    to.name,
                    JOINT_ORDER[joint],
                    speed,
                    delta,
                    dt,
                    JOINT_MAX_SPEED_DEG
                ));
            }
        }
    }
    out
}

fn parse_line(line: &str) -> Result<(Duration, &str), &'static str> {
    let split = line
        .find(|c: char| c == '-' || c == '–' || c.is_whitespace())
        .ok_or("expected `MM:SS.mmm - pose_name`")?;
    let (stamp, rest) = line.split_at(split);

    let arrival = parse_timestamp(stamp)
        .ok_or("timestamp must be MM:SS.mmm (seconds 00-59, three millisecond digits)")?;

    let rest = rest.trim_start();
    let name = rest
        .strip_prefix('-')
        .or_else(|| rest.strip_prefix('–'))
        .ok_or("expected `-` between timestamp and pose name")?
        .trim();

    if name.is_empty() {
        return Err("missing pose name");
    }
    if !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return Err("pose name may only contain letters, digits and underscores");
    }
    Ok((arrival, name))
}

/// Parse `M:SS.mmm` or `MM:SS.mmm` into a duration.
pub fn parse_timestamp(stamp: &str) -> Option<Duration> {
    fn digits(s: &str, min: usize, max: usize) -> Option<u64> {
        if s.len() < min || s.len() > max || !s.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        s.parse().ok()
    }

    let (minutes, rest) = stamp.split_once(':')?;
    let (seconds, millis) = rest.split_once('.')?;
    let minutes = digits(minutes, 1, 2)?;
    let seconds = digits(seconds, 2, 2)?;
    let millis = digits(millis, 3, 3)?;
    if seconds >= 60 {
        return None;
    }
    Some(Duration::from_millis((minutes * 60 + seconds) * 1000 + millis))
}

/// Format a duration as `MM:SS.mmm`.
pub fn format_timestamp(d: Duration) -> String {
    let total_ms = d.as_millis();
    let minutes = total_ms / 60_000;
    let seconds = (total_ms / 1000) % 60;
    let millis = total_ms % 1000;
    format!("{:02}:{:02}.{:03}", minutes, seconds, millis)
}
