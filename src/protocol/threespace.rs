//! 3-Space sensor protocol implementation
//!
//! Request frame: `[START] [slot] [OPCODE] [ARGS...] [CHECKSUM]`
//!
//! - `START` is 0xF8 for hub-routed requests (slot byte present) and 0xF7
//!   for directly wired requests (no slot byte)
//! - `CHECKSUM` is the mod-256 sum of every byte after the start byte
//!
//! Hub-routed responses arrive in an envelope `[FAIL] [SLOT] [LEN] [PAYLOAD]`;
//! a non-zero FAIL byte means the sensor did not acknowledge and no payload
//! follows. Wired responses are the raw payload, length fixed per opcode.

use crate::error::{Error, Result};

/// Start byte for hub-routed requests
pub const START_HUB: u8 = 0xF8;
/// Start byte for directly wired requests
pub const START_WIRED: u8 = 0xF7;

/// Number of logical slots a hub multiplexes
pub const MAX_LOGICAL_SLOTS: u8 = 16;

/// Streaming-slot filler for unused slots
pub const SLOT_EMPTY: u8 = 0xFF;

/// Streaming duration meaning "until stopped"
pub const STREAM_DURATION_FOREVER: u32 = 0xFFFF_FFFF;
/// Delay before the first streamed tick, in microseconds
pub const STREAM_START_DELAY_US: u32 = 500_000;

/// Length of the per-tick streamed payload: tared Euler triple + battery
pub const STREAM_PAYLOAD_LEN: usize = 12 + 1;

/// Size of the hub response envelope before the payload: fail + slot
pub const HUB_HEADER_LEN: usize = 2;

const RAD2DEG: f64 = 180.0 / std::f64::consts::PI;

/// Protocol opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    /// Tared orientation as Euler angles (3×f32 BE, radians)
    GetTaredEulerAngles = 0x01,
    /// Configure the eight streaming slots
    SetStreamingSlots = 0x50,
    /// Configure streaming interval, duration, start delay
    SetStreamingTiming = 0x52,
    /// Begin streaming
    StartStreaming = 0x55,
    /// End streaming
    StopStreaming = 0x56,
    /// Zero-orientation calibration at the current pose
    TareWithCurrentOrientation = 0x60,
    /// Enable or disable the magnetometer
    SetCompassEnabled = 0x6D,
    /// Battery percent remaining (1 byte)
    GetBatteryPercent = 0xCA,
    /// Hardware serial bound to a hub slot (hub-local command)
    GetSerialNumberAtSlot = 0xD0,
    /// Hardware serial of the addressed device
    GetSerialNumber = 0xED,
}

/// 3-Space commands with their request arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TsCommand {
    GetTaredEulerAngles,
    /// Eight slot opcodes; unused slots carry [`SLOT_EMPTY`]
    SetStreamingSlots([u8; 8]),
    SetStreamingTiming {
        interval_us: u32,
        duration_us: u32,
        delay_us: u32,
    },
    StartStreaming,
    StopStreaming,
    TareWithCurrentOrientation,
    SetCompassEnabled(bool),
    GetBatteryPercent,
    GetSerialNumberAtSlot(u8),
    GetSerialNumber,
}

impl TsCommand {
    /// Protocol opcode for this command
    pub fn opcode(&self) -> u8 {
        match self {
            TsCommand::GetTaredEulerAngles => Opcode::GetTaredEulerAngles as u8,
            TsCommand::SetStreamingSlots(_) => Opcode::SetStreamingSlots as u8,
            TsCommand::SetStreamingTiming { .. } => Opcode::SetStreamingTiming as u8,
            TsCommand::StartStreaming => Opcode::StartStreaming as u8,
            TsCommand::StopStreaming => Opcode::StopStreaming as u8,
            TsCommand::TareWithCurrentOrientation => Opcode::TareWithCurrentOrientation as u8,
            TsCommand::SetCompassEnabled(_) => Opcode::SetCompassEnabled as u8,
            TsCommand::GetBatteryPercent => Opcode::GetBatteryPercent as u8,
            TsCommand::GetSerialNumberAtSlot(_) => Opcode::GetSerialNumberAtSlot as u8,
            TsCommand::GetSerialNumber => Opcode::GetSerialNumber as u8,
        }
    }

    /// Expected response payload length, fixed per opcode
    pub fn response_len(&self) -> usize {
        match self {
            TsCommand::GetTaredEulerAngles => 12,
            TsCommand::GetBatteryPercent => 1,
            TsCommand::GetSerialNumberAtSlot(_) | TsCommand::GetSerialNumber => 4,
            _ => 0,
        }
    }

    /// Request argument bytes
    fn build_args(&self) -> Vec<u8> {
        match self {
            TsCommand::SetStreamingSlots(slots) => slots.to_vec(),
            TsCommand::SetStreamingTiming {
                interval_us,
                duration_us,
                delay_us,
            } => {
                let mut args = Vec::with_capacity(12);
                args.extend_from_slice(&interval_us.to_be_bytes());
                args.extend_from_slice(&duration_us.to_be_bytes());
                args.extend_from_slice(&delay_us.to_be_bytes());
                args
            }
            TsCommand::SetCompassEnabled(enabled) => vec![u8::from(*enabled)],
            TsCommand::GetSerialNumberAtSlot(slot) => vec![*slot],
            _ => Vec::new(),
        }
    }

    /// Encode as a directly wired request (no slot byte)
    pub fn encode_wired(&self) -> Vec<u8> {
        let args = self.build_args();
        let mut frame = Vec::with_capacity(3 + args.len());
        frame.push(START_WIRED);
        frame.push(self.opcode());
        frame.extend_from_slice(&args);
        frame.push(checksum(&frame[1..]));
        frame
    }

    /// Encode as a hub-routed request addressed to `slot`
    pub fn encode_hub(&self, slot: u8) -> Vec<u8> {
        let args = self.build_args();
        let mut frame = Vec::with_capacity(4 + args.len());
        frame.push(START_HUB);
        frame.push(slot);
        frame.push(self.opcode());
        frame.extend_from_slice(&args);
        frame.push(checksum(&frame[1..]));
        frame
    }

    /// The streaming-slot layout used for acquisition: tared Euler angles in
    /// slot 0, battery percent in slot 1, the rest empty.
    pub fn acquisition_slots() -> [u8; 8] {
        let mut slots = [SLOT_EMPTY; 8];
        slots[0] = Opcode::GetTaredEulerAngles as u8;
        slots[1] = Opcode::GetBatteryPercent as u8;
        slots
    }

    /// Streaming timing with the standard forever-duration and start delay
    pub fn acquisition_timing(interval_us: u32) -> Self {
        TsCommand::SetStreamingTiming {
            interval_us,
            duration_us: STREAM_DURATION_FOREVER,
            delay_us: STREAM_START_DELAY_US,
        }
    }
}

/// Mod-256 checksum over every byte after the start byte
pub fn checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// A decoded request frame, as a sensor or hub would see it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedRequest {
    /// Logical slot for hub-routed frames, `None` for wired frames
    pub slot: Option<u8>,
    pub opcode: u8,
    pub args: Vec<u8>,
}

/// Decode and verify a request frame (either framing).
///
/// Fails on a wrong start byte, a truncated frame, or a checksum mismatch;
/// never returns a silently wrong value.
pub fn decode_request(frame: &[u8]) -> Result<DecodedRequest> {
    if frame.len() < 3 {
        return Err(Error::InvalidFrame(format!(
            "request too short: {} bytes",
            frame.len()
        )));
    }

    let routed = match frame[0] {
        START_HUB => true,
        START_WIRED => false,
        other => {
            return Err(Error::InvalidFrame(format!(
                "bad start byte: {other:#04x}"
            )))
        }
    };

    let body = &frame[1..frame.len() - 1];
    if routed && body.len() < 2 {
        return Err(Error::InvalidFrame("hub request missing slot".into()));
    }

    let expected = checksum(body);
    let actual = frame[frame.len() - 1];
    if expected != actual {
        return Err(Error::ChecksumError { expected, actual });
    }

    if routed {
        Ok(DecodedRequest {
            slot: Some(body[0]),
            opcode: body[1],
            args: body[2..].to_vec(),
        })
    } else {
        Ok(DecodedRequest {
            slot: None,
            opcode: body[0],
            args: body[1..].to_vec(),
        })
    }
}

/// One decoded per-tick streamed reading
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamReading {
    /// Tared pitch, degrees
    pub pitch_deg: f64,
    /// Tared yaw, degrees
    pub yaw_deg: f64,
    /// Tared roll, degrees
    pub roll_deg: f64,
    /// Battery percent remaining
    pub battery_pct: f64,
}

/// Decode the composed streaming payload: 3×f32 BE Euler radians + battery u8
pub fn decode_stream_payload(payload: &[u8]) -> Result<StreamReading> {
    if payload.len() != STREAM_PAYLOAD_LEN {
        return Err(Error::InvalidFrame(format!(
            "stream payload length {} (expected {})",
            payload.len(),
            STREAM_PAYLOAD_LEN
        )));
    }

    let mut angles = [0.0f64; 3];
    for (i, angle) in angles.iter_mut().enumerate() {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&payload[i * 4..i * 4 + 4]);
        *angle = f64::from(f32::from_be_bytes(raw)) * RAD2DEG;
    }

    Ok(StreamReading {
        pitch_deg: angles[0],
        yaw_deg: angles[1],
        roll_deg: angles[2],
        battery_pct: f64::from(payload[12]),
    })
}

/// Hex-encode a 4-byte hardware serial the way nicknames default to it
pub fn serial_hex(raw: [u8; 4]) -> String {
    format!("{:08X}", u32::from_be_bytes(raw))
}

/// Whether a slot-serial readback means the slot is unbound
pub fn is_empty_slot_serial(raw: [u8; 4]) -> bool {
    let v = u32::from_be_bytes(raw);
    v == 0 || v == u32::MAX
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_commands() -> Vec<TsCommand> {
        vec![
            TsCommand::GetTaredEulerAngles,
            TsCommand::SetStreamingSlots(TsCommand::acquisition_slots()),
            TsCommand::acquisition_timing(10_000),
            TsCommand::StartStreaming,
            TsCommand::StopStreaming,
            TsCommand::TareWithCurrentOrientation,
            TsCommand::SetCompassEnabled(false),
            TsCommand::GetBatteryPercent,
            TsCommand::GetSerialNumberAtSlot(7),
            TsCommand::GetSerialNumber,
        ]
    }

    #[test]
    fn test_checksum_excludes_start_byte() {
        // start streaming to slot 3: sum = 3 + 0x55
        let frame = TsCommand::StartStreaming.encode_hub(3);
        assert_eq!(frame, vec![0xF8, 0x03, 0x55, 0x58]);

        // wired framing has no slot byte
        let frame = TsCommand::StartStreaming.encode_wired();
        assert_eq!(frame, vec![0xF7, 0x55, 0x55]);
    }

    #[test]
    fn test_streaming_slots_encoding() {
        let frame = TsCommand::SetStreamingSlots(TsCommand::acquisition_slots()).encode_hub(0);
        assert_eq!(frame[0], START_HUB);
        assert_eq!(frame[1], 0x00);
        assert_eq!(frame[2], 0x50);
        assert_eq!(&frame[3..11], &[0x01, 0xCA, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]);
        assert_eq!(frame.len(), 12);
    }

    #[test]
    fn test_timing_encoding_is_big_endian() {
        let frame = TsCommand::acquisition_timing(10_000).encode_wired();
        // opcode + 3×u32
        assert_eq!(frame[1], 0x52);
        assert_eq!(&frame[2..6], &10_000u32.to_be_bytes());
        assert_eq!(&frame[6..10], &0xFFFF_FFFFu32.to_be_bytes());
        assert_eq!(&frame[10..14], &500_000u32.to_be_bytes());
    }

    #[test]
    fn test_request_round_trip_every_opcode() {
        for cmd in all_commands() {
            let args = cmd.build_args();

            let wired = decode_request(&cmd.encode_wired()).unwrap();
            assert_eq!(wired.slot, None);
            assert_eq!(wired.opcode, cmd.opcode());
            assert_eq!(wired.args, args);

            let routed = decode_request(&cmd.encode_hub(5)).unwrap();
            assert_eq!(routed.slot, Some(5));
            assert_eq!(routed.opcode, cmd.opcode());
            assert_eq!(routed.args, args);
        }
    }

    #[test]
    fn test_single_byte_corruption_is_always_caught() {
        for cmd in all_commands() {
            for frame in [cmd.encode_wired(), cmd.encode_hub(2)] {
                for i in 0..frame.len() {
                    let mut bad = frame.clone();
                    bad[i] ^= 0xFF;
                    assert!(
                        decode_request(&bad).is_err(),
                        "corrupting byte {} of {:02X?} went undetected",
                        i,
                        frame
                    );
                }
            }
        }
    }

    #[test]
    fn test_decode_stream_payload() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&0.5f32.to_be_bytes());
        payload.extend_from_slice(&(-0.25f32).to_be_bytes());
        payload.extend_from_slice(&1.0f32.to_be_bytes());
        payload.push(87);

        let r = decode_stream_payload(&payload).unwrap();
        assert!((r.pitch_deg - 0.5 * RAD2DEG).abs() < 1e-6);
        assert!((r.yaw_deg + 0.25 * RAD2DEG).abs() < 1e-6);
        assert!((r.roll_deg - RAD2DEG).abs() < 1e-6);
        assert_eq!(r.battery_pct, 87.0);
    }

    #[test]
    fn test_decode_stream_payload_rejects_short_input() {
        assert!(decode_stream_payload(&[0u8; 12]).is_err());
        assert!(decode_stream_payload(&[0u8; 14]).is_err());
    }

    #[test]
    fn test_serial_hex_formatting() {
        assert_eq!(serial_hex([0x00, 0x00, 0xA1, 0xB2]), "0000A1B2");
        assert!(is_empty_slot_serial([0, 0, 0, 0]));
        assert!(is_empty_slot_serial([0xFF; 4]));
        assert!(!is_empty_slot_serial([0x00, 0x00, 0xA1, 0xB2]));
    }
}
