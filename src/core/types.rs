//! Core data types for samples and device metadata.
//!
//! Key types:
//! - [`Sample`]: one timestamped reading set from one device, produced by an
//!   adapter and consumed through the stream queue
//! - [`DeviceDescriptor`]: registry-owned metadata for a discovered device
//! - [`LogicalAddress`]: routing address of a wireless sensor behind a hub

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Instant;

/// Channel label: tared pitch, degrees
pub const CH_PITCH: &str = "Pitch";
/// Channel label: tared yaw, degrees
pub const CH_YAW: &str = "Yaw";
/// Channel label: tared roll, degrees
pub const CH_ROLL: &str = "Roll";
/// Channel label: battery percent remaining
pub const CH_BATTERY: &str = "Battery";

/// Channel labels of every inertial sensor, in streamed payload order
pub fn inertial_channel_labels() -> Vec<String> {
    vec![
        CH_PITCH.to_string(),
        CH_YAW.to_string(),
        CH_ROLL.to_string(),
        CH_BATTERY.to_string(),
    ]
}

/// Monotonic seconds since the first call in this process.
///
/// All sample timestamps come from this clock so that rows from different
/// transports are comparable.
pub fn monotonic_seconds() -> f64 {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    EPOCH.get_or_init(Instant::now).elapsed().as_secs_f64()
}

/// One timestamped reading set from one device.
///
/// Immutable once constructed. `channel_readings` carries exactly the keys in
/// the owning device's `channel_labels`.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Monotonic seconds (see [`monotonic_seconds`])
    pub time: f64,
    /// Nickname of the producing device
    pub device_id: String,
    /// Channel label → reading
    pub channel_readings: HashMap<String, f64>,
}

impl Sample {
    /// Create a sample stamped with the monotonic clock
    pub fn now(device_id: impl Into<String>, channel_readings: HashMap<String, f64>) -> Self {
        Self {
            time: monotonic_seconds(),
            device_id: device_id.into(),
            channel_readings,
        }
    }
}

/// Classification of a discovered device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceKind {
    /// Inertial sensor attached directly over USB serial
    WiredSensor,
    /// Wireless-to-serial bridge multiplexing sensors over logical slots
    WirelessHub,
    /// Inertial sensor reachable through a hub
    WirelessSensor,
    /// One EMG channel slot on the base station
    EmgChannel,
}

impl std::fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DeviceKind::WiredSensor => "wired sensor",
            DeviceKind::WirelessHub => "wireless hub",
            DeviceKind::WirelessSensor => "wireless sensor",
            DeviceKind::EmgChannel => "EMG channel",
        };
        f.write_str(s)
    }
}

/// Routing address of a wireless sensor: which hub, which slot.
///
/// A slot is unique within its hub at any instant; reuse across hubs is fine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicalAddress {
    /// Hex serial of the owning hub
    pub hub_id: String,
    /// Logical slot 0..=15 within the hub
    pub logical_slot: u8,
}

/// Opaque handle locating the physical channel behind a descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportRef {
    /// Directly attached serial device on a named port
    Serial { port: String },
    /// Wireless sensor routed through a hub
    Wireless(LogicalAddress),
    /// EMG slot index (1-based) on the base station data stream
    Emg { slot: u8 },
}

/// What a consumer needs to set up persistence for one sample stream:
/// the id samples arrive under, a short kind tag for file naming, and the
/// ordered channel labels.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamInfo {
    pub device_id: String,
    pub input_kind: String,
    pub channel_labels: Vec<String>,
}

/// Registry-owned metadata for one discovered device.
///
/// `id` is the stable hardware serial (hex); `nickname` defaults to it and may
/// be rewritten by the operator at any time without touching the id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub id: String,
    pub nickname: String,
    pub kind: DeviceKind,
    pub channel_labels: Vec<String>,
    pub transport: TransportRef,
}

impl DeviceDescriptor {
    pub fn new(
        id: impl Into<String>,
        kind: DeviceKind,
        channel_labels: Vec<String>,
        transport: TransportRef,
    ) -> Self {
        let id = id.into();
        Self {
            nickname: id.clone(),
            id,
            kind,
            channel_labels,
            transport,
        }
    }
}
