//! Piper arm driver over a raw CAN bus.
//!
//! The arm expects the full command set (motor enable, motion control, three
//! joint frames) sent together and repeated while it moves. Joint values go
//! on the wire as big-endian signed millidegrees, two joints per frame.
//!
//! | ID            | Direction | Payload                                   |
//! |---------------|-----------|-------------------------------------------|
//! | 0x471         | tx        | motor enable `07 02 00..`                 |
//! | 0x151         | tx        | CAN mode, joint mode, speed %             |
//! | 0x155..=0x157 | tx        | J1/J2, J3/J4, J5/J6 targets (i32 mdeg BE) |
//! | 0x159         | tx        | gripper, i32 BE in `0..=70000`            |
//! | 0x2A5..=0x2A7 | rx        | joint feedback, same layout as control    |
//! | 0x2A8         | rx        | gripper feedback                          |

use anyhow::Result;
use std::time::{Duration, Instant};

use crate::pose::JointVector;
use crate::sink::{ArmDriver, ArmState};

pub const ARM_MOTOR_ENABLE_ID: u32 = 0x471;
pub const ARM_MOTION_CTRL_2_ID: u32 = 0x151;
pub const ARM_JOINT_CTRL_ID_BASE: u32 = 0x155;
pub const GRIPPER_CTRL_ID: u32 = 0x159;
pub const ARM_JOINT_FEEDBACK_ID_BASE: u32 = 0x2A5;
pub const GRIPPER_FEEDBACK_ID: u32 = 0x2A8;

/// Full-scale gripper value on the wire.
pub const GRIPPER_FULL_SCALE: f64 = 70_000.0;

const ENABLE_PAYLOAD: [u8; 8] = [0x07, 0x02, 0, 0, 0, 0, 0, 0];
const DEFAULT_SPEED_PCT: u8 = 50;
const ENABLE_REPEATS: usize = 10;
const RESEND_INTERVAL: Duration = Duration::from_millis(5);
const RECV_TIMEOUT: Duration = Duration::from_millis(50);
const FEEDBACK_TIMEOUT: Duration = Duration::from_millis(500);

/// Raw CAN access used by [`PiperArm`].
pub trait CanBus: Send {
    /// Write one standard data frame.
    fn write_raw(&mut self, can_id: u32, data: &[u8]) -> Result<()>;

    /// Read one frame. Returns `None` on timeout.
    fn read_raw(&mut self) -> Result<Option<(u32, Vec<u8>)>>;

    /// Set how long [`CanBus::read_raw`] waits for a frame.
    fn set_recv_timeout(&mut self, timeout: Duration) -> Result<()>;
}

/// Motion control payload: CAN command mode, joint move mode, speed percent.
pub fn motion_ctrl_payload(speed_pct: u8) -> [u8; 8] {
    [0x01, 0x01, speed_pct.clamp(1, 100), 0, 0, 0, 0, 0]
}

/// Encode joint targets (radians) into the three joint control frames.
pub fn joint_frames(joints: &JointVector) -> [(u32, [u8; 8]); 3] {
    let mdeg = joints.map(|rad| (rad.to_degrees() * 1000.0) as i32);
    let mut frames = [(0u32, [0u8; 8]); 3];
    for (i, frame) in frames.iter_mut().enumerate() {
        let mut data = [0u8; 8];
        data[..4].copy_from_slice(&mdeg[i * 2].to_be_bytes());
        data[4..].copy_from_slice(&mdeg[i * 2 + 1].to_be_bytes());
        *frame = (ARM_JOINT_CTRL_ID_BASE + i as u32, data);
    }
    frames
}

/// Encode a gripper target (0 = open, 1 = closed).
pub fn gripper_payload(position: f64) -> [u8; 8] {
    let raw = (position.clamp(0.0, 1.0) * GRIPPER_FULL_SCALE) as i32;
    let mut data = [0u8; 8];
    data[..4].copy_from_slice(&raw.to_be_bytes());
    data
}

/// Apply one feedback frame to `state`.
///
/// Returns true if the frame was arm feedback (joint or gripper).
pub fn apply_feedback(can_id: u32, data: &[u8], state: &mut ArmState) -> bool {
    let be_i32 = |bytes: &[u8]| i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);

    if (ARM_JOINT_FEEDBACK_ID_BASE..ARM_JOINT_FEEDBACK_ID_BASE + 3).contains(&can_id) {
        if data.len() >= 8 {
            let idx = ((can_id - ARM_JOINT_FEEDBACK_ID_BASE) * 2) as usize;
            state.joints[idx] = (be_i32(&data[0..4]) as f64 / 1000.0).to_radians();
            state.joints[idx + 1] = (be_i32(&data[4..8]) as f64 / 1000.0).to_radians();
        }
        return true;
    }
    if can_id == GRIPPER_FEEDBACK_ID {
        if data.len() >= 4 {
            state.gripper = be_i32(&data[0..4]) as f64 / GRIPPER_FULL_SCALE;
        }
        return true;
    }
    false
}

/// [`ArmDriver`] for an AgileX Piper arm.
pub struct PiperArm<B: CanBus> {
    label: String,
    bus: B,
    state: ArmState,
    speed_pct: u8,
    connected: bool,
}

impl<B: CanBus> PiperArm<B> {
    pub fn new(label: &str, bus: B) -> Self {
        Self {
            label: label.to_string(),
            bus,
            state: ArmState::default(),
            speed_pct: DEFAULT_SPEED_PCT,
            connected: false,
        }
    }

    /// Motion speed percentage sent with every command (1-100).
    pub fn with_speed(mut self, speed_pct: u8) -> Self {
        self.speed_pct = speed_pct.clamp(1, 100);
        self
    }

    fn send_command_set(&mut self, joints: &JointVector) -> Result<()> {
        self.bus.write_raw(ARM_MOTOR_ENABLE_ID, &ENABLE_PAYLOAD)?;
        self.bus
            .write_raw(ARM_MOTION_CTRL_2_ID, &motion_ctrl_payload(self.speed_pct))?;
        for (id, data) in joint_frames(joints) {
            self.bus.write_raw(id, &data)?;
        }
        Ok(())
    }

    /// Read until all three joint feedback frames arrived or `timeout` passed.
    fn read_feedback(&mut self, timeout: Duration) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        let mut received = [false; 3];
        while Instant::now() < deadline && !received.iter().all(|r| *r) {
            if let Some((id, data)) = self.bus.read_raw()? {
                if apply_feedback(id, &data, &mut self.state)
                    && (ARM_JOINT_FEEDBACK_ID_BASE..ARM_JOINT_FEEDBACK_ID_BASE + 3).contains(&id)
                {
                    received[(id - ARM_JOINT_FEEDBACK_ID_BASE) as usize] = true;
                }
            }
        }
        Ok(received.iter().all(|r| *r))
    }

    fn ensure_connected(&self) -> Result<()> {
        if !self.connected {
            anyhow::bail!("[{}] arm is not connected", self.label);
        }
        Ok(())
    }
}

impl<B: CanBus> ArmDriver for PiperArm<B> {
    fn connect(&mut self) -> Result<()> {
        self.bus.set_recv_timeout(RECV_TIMEOUT)?;
        if !self.read_feedback(FEEDBACK_TIMEOUT)? {
            tracing::warn!("[{}] no joint feedback during connect", self.label);
        }
        for _ in 0..ENABLE_REPEATS {
            self.bus.write_raw(ARM_MOTOR_ENABLE_ID, &ENABLE_PAYLOAD)?;
            self.bus
                .write_raw(ARM_MOTION_CTRL_2_ID, &motion_ctrl_payload(self.speed_pct))?;
            std::thread::sleep(Duration::from_millis(20));
        }
        std::thread::sleep(Duration::from_millis(100));
        self.connected = true;
        tracing::info!(
            "[{}] Piper enabled, joints (deg): {:?}",
            self.label,
            self.state.joints.map(|j| j.to_degrees().round())
        );
        Ok(())
    }

    fn disconnect(&mut self) {
        if self.connected {
            tracing::info!("[{}] Piper disconnected", self.label);
        }
        self.connected = false;
    }

    fn current_joint_state(&mut self) -> Result<ArmState> {
        self.ensure_connected()?;
        if !self.read_feedback(FEEDBACK_TIMEOUT)? {
            tracing::debug!("[{}] partial joint feedback, using cached values", self.label);
        }
        Ok(self.state)
    }

    fn move_joints(&mut self, joints: &JointVector, settle: Duration) -> Result<()> {
        self.ensure_connected()?;
        self.send_command_set(joints)?;
        let started = Instant::now();
        while started.elapsed() < settle {
            std::thread::sleep(RESEND_INTERVAL);
            self.send_command_set(joints)?;
        }
        Ok(())
    }

    fn gripper(&mut self, position: f64, settle: Duration) -> Result<()> {
        self.ensure_connected()?;
        self.bus.write_raw(GRIPPER_CTRL_ID, &gripper_payload(position))?;
        if !settle.is_zero() {
            std::thread::sleep(settle);
        }
        Ok(())
    }
}

/// List CAN network interfaces by reading `/sys/class/net`.
pub fn list_interfaces() -> Result<Vec<String>> {
    let mut interfaces = Vec::new();
    for entry in std::fs::read_dir("/sys/class/net")? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if let Ok(type_str) = std::fs::read_to_string(entry.path().join("type")) {
            // ARPHRD_CAN = 280
            if type_str.trim() == "280" {
                interfaces.push(name);
            }
        }
    }
    interfaces.sort();
    Ok(interfaces)
}

#[cfg(feature = "can")]
pub use socket::SocketCanBus;

#[cfg(feature = "can")]
mod socket {
    use super::CanBus;
    use anyhow::Result;
    use socketcan::{EmbeddedFrame, Frame, Socket};
    use std::time::Duration;

    /// [`CanBus`] on a Linux SocketCAN interface.
    pub struct SocketCanBus {
        socket: socketcan::CanSocket,
        interface: String,
    }

    impl SocketCanBus {
        pub fn open(interface: &str) -> Result<Self> {
            let socket = socketcan::CanSocket::open(interface)
                .map_err(|e| anyhow::anyhow!("Failed to open CAN interface {}: {}", interface, e))?;
            tracing::info!("CAN socket opened on {}", interface);
            Ok(Self {
                socket,
                interface: interface.to_string(),
            })
        }
    }

    impl CanBus for SocketCanBus {
        fn write_raw(&mut self, can_id: u32, data: &[u8]) -> Result<()> {
            let id = socketcan::StandardId::new(can_id as u16)
                .ok_or_else(|| anyhow::anyhow!("Invalid standard CAN ID: {}", can_id))?;
            let frame = socketcan::CanDataFrame::new(id, data)
                .ok_or_else(|| anyhow::anyhow!("Failed to create CAN frame"))?;
            self.socket
                .write_frame(&socketcan::CanFrame::Data(frame))
                .map_err(|e| anyhow::anyhow!("CAN write error on {}: {}", self.interface, e))
        }

        fn read_raw(&mut self) -> Result<Option<(u32, Vec<u8>)>> {
            match self.socket.read_frame() {
                Ok(socketcan::CanFrame::Data(frame)) => {
                    Ok(Some((frame.raw_id(), frame.data().to_vec())))
                }
                // Remote and error frames carry no feedback.
                Ok(_) => Ok(None),
                Err(e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    Ok(None)
                }
                Err(e) => Err(anyhow::anyhow!("CAN read error on {}: {}", self.interface, e)),
            }
        }

        fn set_recv_timeout(&mut self, timeout: Duration) -> Result<()> {
            self.socket
                .set_read_timeout(timeout)
                .map_err(|e| anyhow::anyhow!("Failed to set read timeout: {}", e))
        }
    }
}
