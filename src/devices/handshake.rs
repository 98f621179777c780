//! Discovery and configuration handshakes over an open serial link
//!
//! These run only while no stream is active; streaming-time reads live in
//! the adapters.

use crate::error::{Error, Result};
use crate::protocol::threespace::{
    is_empty_slot_serial, serial_hex, TsCommand, HUB_HEADER_LEN, MAX_LOGICAL_SLOTS,
};
use crate::transport::Transport;
use std::collections::BTreeMap;
use std::time::Duration;

/// How long a device gets to answer a discovery or configuration request
pub const ACK_TIMEOUT: Duration = Duration::from_millis(500);

/// Ask a directly attached device (sensor or the hub itself) for its serial
pub fn query_serial_number<T: Transport>(transport: &mut T) -> Result<String> {
    transport.write_all(&TsCommand::GetSerialNumber.encode_wired())?;
    let mut raw = [0u8; 4];
    transport.read_exact_timeout(&mut raw, ACK_TIMEOUT)?;
    Ok(serial_hex(raw))
}

/// Read the hardware serial bound to one hub slot, `None` if the slot is empty
pub fn query_slot_serial<T: Transport>(transport: &mut T, slot: u8) -> Result<Option<String>> {
    transport.write_all(&TsCommand::GetSerialNumberAtSlot(slot).encode_wired())?;
    let mut raw = [0u8; 4];
    transport.read_exact_timeout(&mut raw, ACK_TIMEOUT)?;
    if is_empty_slot_serial(raw) {
        Ok(None)
    } else {
        Ok(Some(serial_hex(raw)))
    }
}

/// Walk every logical slot of a hub and collect the bound serials
pub fn walk_hub_slots<T: Transport>(transport: &mut T) -> Result<BTreeMap<u8, String>> {
    let mut slots = BTreeMap::new();
    for slot in 0..MAX_LOGICAL_SLOTS {
        if let Some(serial) = query_slot_serial(transport, slot)? {
            slots.insert(slot, serial);
        }
    }
    Ok(slots)
}

/// Read one hub response envelope: `[fail] [slot] [len] [payload]`.
///
/// A non-zero fail byte means the sensor did not acknowledge; the payload is
/// absent in that case.
pub fn read_hub_envelope<T: Transport>(
    transport: &mut T,
    timeout: Duration,
) -> Result<(u8, Vec<u8>)> {
    let mut header = [0u8; HUB_HEADER_LEN];
    transport.read_exact_timeout(&mut header, timeout)?;
    let (fail, slot) = (header[0], header[1]);

    if fail != 0 {
        return Err(Error::DeviceError(format!(
            "slot {slot} did not acknowledge (fail={fail:#04x})"
        )));
    }

    let mut len = [0u8; 1];
    transport.read_exact_timeout(&mut len, timeout)?;
    let mut payload = vec![0u8; len[0] as usize];
    transport.read_exact_timeout(&mut payload, timeout)?;
    Ok((slot, payload))
}

/// Send one hub-routed command and read its acknowledgement.
///
/// The hub cannot pipeline: every request must be acknowledged before the
/// next one is issued.
pub fn hub_command_acked<T: Transport>(
    transport: &mut T,
    slot: u8,
    cmd: &TsCommand,
) -> Result<Vec<u8>> {
    transport.write_all(&cmd.encode_hub(slot))?;
    let (resp_slot, payload) = read_hub_envelope(transport, ACK_TIMEOUT)?;
    if resp_slot != slot {
        return Err(Error::UnknownSlot(resp_slot));
    }
    Ok(payload)
}
