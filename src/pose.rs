//! Pose table: named joint targets loaded from a JSON scene file.
//!
//! File format:
//! ```json
//! {
//!   "scenes": [
//!     {"name": "stand", "joint_positions": {"J1": 0, "J2": 90, "J3": -80, "J4": 0, "J5": 0, "J6": 0}},
//!     {"name": "wave",  "joint_positions": {...}, "gripper": 0.5}
//!   ]
//! }
//! ```
//!
//! Joint values in the file are degrees; the table stores radians, in the
//! arm's joint order `J1..J6`.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

use crate::error::LoadError;

/// Number of controllable joints per arm (gripper excluded).
pub const JOINT_COUNT: usize = 6;

/// Joint labels in the order the arm expects them.
pub const JOINT_ORDER: [&str; JOINT_COUNT] = ["J1", "J2", "J3", "J4", "J5", "J6"];

/// Joint position limits in degrees, from the Piper URDF.
pub const JOINT_LIMITS_DEG: [(f64, f64); JOINT_COUNT] = [
    (-150.0, 150.0),
    (0.0, 180.0),
    (-170.0, 0.0),
    (-100.0, 100.0),
    (-70.0, 70.0),
    (-120.0, 120.0),
];

/// Conservative per-joint speed limit in degrees per second (URDF: 3 rad/s).
pub const JOINT_MAX_SPEED_DEG: f64 = 172.0;

/// Joint angles in radians, ordered `J1..J6`.
pub type JointVector = [f64; JOINT_COUNT];

/// A named arm pose.
#[derive(Clone, Debug, PartialEq)]
pub struct Pose {
    name: String,
    joints: JointVector,
    gripper: Option<f64>,
}

impl Pose {
    /// Create a pose from joint angles in radians.
    pub fn new(name: impl Into<String>, joints: JointVector, gripper: Option<f64>) -> Self {
        Self {
            name: name.into(),
            joints,
            gripper,
        }
    }

    /// Create a pose from joint angles in degrees.
    pub fn from_degrees(name: impl Into<String>, degrees: JointVector, gripper: Option<f64>) -> Self {
        Self::new(name, degrees.map(f64::to_radians), gripper)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Joint angles in radians.
    pub fn joints(&self) -> &JointVector {
        &self.joints
    }

    /// Joint angles converted back to degrees.
    pub fn joints_deg(&self) -> JointVector {
        self.joints.map(f64::to_degrees)
    }

    /// Gripper position (0 = open, 1 = closed), if the pose sets one.
    pub fn gripper(&self) -> Option<f64> {
        self.gripper
    }

    /// Describe every joint of this pose that lies outside the URDF limits.
    pub fn limit_violations(&self) -> Vec<String> {
        let degrees = self.joints_deg();
        let mut out = Vec::new();
        for (idx, joint) in JOINT_ORDER.iter().enumerate() {
            let (lower, upper) = JOINT_LIMITS_DEG[idx];
            let pos = degrees[idx];
            // Small tolerance: degree/radian round trips land just outside 0.
            if pos < lower - 1e-9 || pos > upper + 1e-9 {
                out.push(format!(
                    "joint limit: pose '{}' {}={:.1}° outside [{:.1}°, {:.1}°]",
                    self.name, joint, pos, lower, upper
                ));
            }
        }
        out
    }
}

#[derive(Deserialize)]
struct SceneFile {
    #[serde(default)]
    scenes: Vec<Scene>,
}

#[derive(Deserialize)]
struct Scene {
    name: String,
    joint_positions: HashMap<String, f64>,
    #[serde(default)]
    gripper: Option<f64>,
}

/// Immutable mapping from pose name to [`Pose`], loaded once.
#[derive(Clone, Debug, Default)]
pub struct PoseTable {
    poses: HashMap<String, Pose>,
    order: Vec<String>,
}

impl PoseTable {
    /// Load a pose table from a JSON scene file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, LoadError> {
        let path = path.as_ref();
        let file = path.display().to_string();
        let content = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
            file: file.clone(),
            source,
        })?;
        Self::from_json(&content, &file)
    }

    /// Parse a pose table from JSON text. `file` is only used in error messages.
    pub fn from_json(json: &str, file: &str) -> Result<Self, LoadError> {
        let parsed: SceneFile = serde_json::from_str(json).map_err(|source| LoadError::Json {
            file: file.to_string(),
            source,
        })?;

        let mut poses = Vec::with_capacity(parsed.scenes.len());
        for scene in parsed.scenes {
            let mut degrees = [0.0; JOINT_COUNT];
            for (idx, joint) in JOINT_ORDER.iter().enumerate() {
                let value = *scene.joint_positions.get(*joint).ok_or_else(|| {
                    LoadError::MissingJoint {
                        file: file.to_string(),
                        pose: scene.name.clone(),
                        joint,
                    }
                })?;
                if !value.is_finite() {
                    return Err(LoadError::NonFiniteJoint {
                        file: file.to_string(),
                        pose: scene.name.clone(),
                        joint,
                    });
                }
                degrees[idx] = value;
            }
            if scene.joint_positions.len() > JOINT_COUNT {
                tracing::debug!(
                    "{}: pose '{}' has extra joint labels (ignored)",
                    file,
                    scene.name
                );
            }
            if let Some(value) = scene.gripper {
                if !(0.0..=1.0).contains(&value) {
                    return Err(LoadError::GripperOutOfRange {
                        file: file.to_string(),
                        pose: scene.name,
                        value,
                    });
                }
            }
            poses.push(Pose::from_degrees(scene.name, degrees, scene.gripper));
        }

        Self::from_poses(poses, file)
    }

    /// Build a table from already-constructed poses, rejecting duplicate names.
    pub fn from_poses(
        poses: impl IntoIterator<Item = Pose>,
        file: &str,
    ) -> Result<Self, LoadError> {
        let mut table = Self::default();
        for pose in poses {
            if table.poses.contains_key(pose.name()) {
                return Err(LoadError::DuplicatePose {
                    file: file.to_string(),
                    name: pose.name().to_string(),
                });
            }
            table.order.push(pose.name().to_string());
            table.poses.insert(pose.name().to_string(), pose);
        }
        Ok(table)
    }

    /// Look up a pose by name.
    pub fn get(&self, name: &str) -> Option<&Pose> {
        self.poses.get(name)
    }

    /// Pose names in file order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// Pose names sorted alphabetically, comma-separated (for error messages).
    pub(crate) fn available(&self) -> String {
        let mut names: Vec<&str> = self.names().collect();
        names.sort_unstable();
        names.join(", ")
    }

    pub fn len(&self) -> usize {
        self.poses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.poses.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const POSES: &str = r#"{
        "scenes": [
            {"name": "stand", "joint_positions": {"J1": 0, "J2": 90, "J3": -90, "J4": 0, "J5": 0, "J6": 0}},
            {"name": "left_down", "joint_positions": {"J1": 45, "J2": 30, "J3": -60, "J4": 10, "J5": -20, "J6": 5}, "gripper": 0.25}
        ]
    }"#;

    #[test]
    fn test_load_converts_degrees_to_radians() {
        let table = PoseTable::from_json(POSES, "poses.json").unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.names().collect::<Vec<_>>(), vec!["stand", "left_down"]);

        let stand = table.get("stand").unwrap();
        assert_eq!(stand.joints()[1], 90f64.to_radians());
        assert_eq!(stand.gripper(), None);

        let left = table.get("left_down").unwrap();
        assert_eq!(left.joints()[0], 45f64.to_radians());
        assert_eq!(left.gripper(), Some(0.25));
        assert!(table.get("missing").is_none());
    }

    #[test]
    fn test_duplicate_pose_is_rejected() {
        let json = r#"{"scenes": [
            {"name": "a", "joint_positions": {"J1": 0, "J2": 0, "J3": 0, "J4": 0, "J5": 0, "J6": 0}},
            {"name": "a", "joint_positions": {"J1": 1, "J2": 0, "J3": 0, "J4": 0, "J5": 0, "J6": 0}}
        ]}"#;
        let err = PoseTable::from_json(json, "dup.json").unwrap_err();
        assert!(matches!(err, LoadError::DuplicatePose { ref name, .. } if name == "a"));
    }

    #[test]
    fn test_missing_joint_names_pose_and_joint() {
        let json = r#"{"scenes": [
            {"name": "half", "joint_positions": {"J1": 0, "J2": 0, "J3": 0}}
        ]}"#;
        let err = PoseTable::from_json(json, "half.json").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("half"), "{msg}");
        assert!(msg.contains("J4"), "{msg}");
    }

    #[test]
    fn test_gripper_out_of_range() {
        let json = r#"{"scenes": [
            {"name": "g", "joint_positions": {"J1": 0, "J2": 0, "J3": 0, "J4": 0, "J5": 0, "J6": 0}, "gripper": 1.5}
        ]}"#;
        assert!(matches!(
            PoseTable::from_json(json, "g.json"),
            Err(LoadError::GripperOutOfRange { .. })
        ));
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(
            PoseTable::from_json("{ not json", "bad.json"),
            Err(LoadError::Json { .. })
        ));
    }

    #[test]
    fn test_limit_violations() {
        let ok = Pose::from_degrees("ok", [0.0, 90.0, -90.0, 0.0, 0.0, 0.0], None);
        assert!(ok.limit_violations().is_empty());

        let bad = Pose::from_degrees("bad", [160.0, 90.0, 10.0, 0.0, 0.0, 0.0], None);
        let violations = bad.limit_violations();
        assert_eq!(violations.len(), 2);
        assert!(violations[0].contains("J1"));
        assert!(violations[1].contains("J3"));
    }
}
