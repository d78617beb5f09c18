//! Pure interpolation between two joint vectors over a time segment.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::pose::JointVector;

/// Interpolation shape applied between keyframes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Interpolation {
    /// Constant velocity within the segment.
    #[default]
    Linear,
    /// Smoothstep `3t² - 2t³`: zero velocity at both ends of the segment.
    Cubic,
}

impl Interpolation {
    fn shape(self, t: f64) -> f64 {
        match self {
            Interpolation::Linear => t,
            Interpolation::Cubic => t * t * (3.0 - 2.0 * t),
        }
    }
}

/// Time warp applied to normalized progress before interpolation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Easing {
    #[default]
    Linear,
    EaseIn,
    EaseOut,
    EaseInOut,
}

impl Easing {
    /// Map `t` in `[0, 1]` to eased progress in `[0, 1]`.
    pub fn apply(self, t: f64) -> f64 {
        match self {
            Easing::Linear => t,
            Easing::EaseIn => t * t * t,
            Easing::EaseOut => {
                let u = 1.0 - t;
                1.0 - u * u * u
            }
            Easing::EaseInOut => {
                if t < 0.5 {
                    4.0 * t * t * t
                } else {
                    let u = -2.0 * t + 2.0;
                    1.0 - u * u * u / 2.0
                }
            }
        }
    }
}

/// Interpolation and easing applied together.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Motion {
    pub interpolation: Interpolation,
    pub easing: Easing,
}

impl Motion {
    pub fn new(interpolation: Interpolation, easing: Easing) -> Self {
        Self {
            interpolation,
            easing,
        }
    }

    /// Shaped progress for normalized time `t`. Exactly 0 at `t <= 0` and 1 at `t >= 1`.
    pub fn progress(self, t: f64) -> f64 {
        if t <= 0.0 {
            return 0.0;
        }
        if t >= 1.0 {
            return 1.0;
        }
        self.interpolation.shape(self.easing.apply(t))
    }

    /// Shaped progress at `now` within the segment `[start_time, end_time]`.
    ///
    /// `now` is clamped into the segment. A zero-length segment is already
    /// complete.
    pub fn progress_at(self, start_time: Duration, end_time: Duration, now: Duration) -> f64 {
        if end_time <= start_time || now >= end_time {
            return 1.0;
        }
        if now <= start_time {
            return 0.0;
        }
        let t = (now - start_time).as_secs_f64() / (end_time - start_time).as_secs_f64();
        self.progress(t)
    }
}

/// Blend a scalar. Returns `start` or `end` bit-exactly at progress 0 and 1.
pub fn blend(start: f64, end: f64, progress: f64) -> f64 {
    if progress <= 0.0 {
        start
    } else if progress >= 1.0 {
        end
    } else {
        start + (end - start) * progress
    }
}

/// Joint vector at time `now` on the segment from `start` (at `start_time`)
/// to `end` (at `end_time`).
///
/// At `now == start_time` the result equals `start` and at `now == end_time`
/// it equals `end`, bit for bit. A degenerate segment snaps to `end`.
pub fn value_at(
    start: &JointVector,
    end: &JointVector,
    start_time: Duration,
    end_time: Duration,
    now: Duration,
    interpolation: Interpolation,
    easing: Easing,
) -> JointVector {
    debug_assert!(start_time <= end_time, "segment ends before it starts");
    let p = Motion::new(interpolation, easing).progress_at(start_time, end_time, now);
    let mut out = *start;
    for (o, (s, e)) in out.iter_mut().zip(start.iter().zip(end.iter())) {
        *o = blend(*s, *e, p);
    }
    out
}

impl fmt::Display for Interpolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Interpolation::Linear => "linear",
            Interpolation::Cubic => "cubic",
        })
    }
}

impl FromStr for Interpolation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "linear" => Ok(Interpolation::Linear),
            "cubic" | "smooth" => Ok(Interpolation::Cubic),
            other => Err(format!("unknown interpolation '{}' (linear, cubic)", other)),
        }
    }
}

impl fmt::Display for Easing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Easing::Linear => "linear",
            Easing::EaseIn => "ease-in",
            Easing::EaseOut => "ease-out",
            Easing::EaseInOut => "ease-in-out",
        })
    }
}

impl FromStr for Easing {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "linear" | "none" => Ok(Easing::Linear),
            "ease-in" => Ok(Easing::EaseIn),
            "ease-out" => Ok(Easing::EaseOut),
            "ease-in-out" => Ok(Easing::EaseInOut),
            other => Err(format!(
                "unknown easing '{}' (linear, ease-in, ease-out, ease-in-out)",
                other
            )),
        }
    }
}
