//! Wireless hub (dongle) streaming adapter
//!
//! One hub multiplexes up to 16 wireless sensors over a single serial link.
//! Every streamed tick arrives in a hub envelope carrying the logical slot it
//! came from, so responses can be routed back to the originating sensor.

use crate::core::adapter::SourceAdapter;
use crate::core::types::{Sample, CH_BATTERY, CH_PITCH, CH_ROLL, CH_YAW};
use crate::devices::handshake::{hub_command_acked, read_hub_envelope};
use crate::error::{Error, Result};
use crate::protocol::threespace::{decode_stream_payload, TsCommand, STREAM_PAYLOAD_LEN};
use crate::transport::Transport;
use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

/// One wireless sensor bound to a hub slot
#[derive(Debug, Clone)]
pub struct SlotBinding {
    /// Stable hardware serial, hex
    pub serial_hex: String,
    /// Operator-facing name samples are tagged with
    pub nickname: String,
}

/// Streaming adapter for one hub and every slot bound on it
pub struct DongleAdapter<T: Transport> {
    transport: Option<T>,
    label: String,
    hub_id: String,
    slots: BTreeMap<u8, SlotBinding>,
    interval_us: u32,
    escalation_ticks: u32,
    consecutive_failures: u32,
    started: bool,
}

impl<T: Transport> DongleAdapter<T> {
    pub fn new(
        transport: T,
        label: impl Into<String>,
        hub_id: impl Into<String>,
        slots: BTreeMap<u8, SlotBinding>,
        interval_us: u32,
        escalation_ticks: u32,
    ) -> Self {
        Self {
            transport: Some(transport),
            label: label.into(),
            hub_id: hub_id.into(),
            slots,
            interval_us,
            escalation_ticks,
            consecutive_failures: 0,
            started: false,
        }
    }

    /// Hub hardware serial this adapter streams through
    pub fn hub_id(&self) -> &str {
        &self.hub_id
    }

    fn transport_mut(&mut self) -> Result<&mut T> {
        self.transport.as_mut().ok_or(Error::TransportClosed)
    }

    /// Record one invalid tick; past the threshold the link counts as dead
    fn tick_failed(&mut self) -> Result<Option<Sample>> {
        self.consecutive_failures += 1;
        if self.consecutive_failures >= self.escalation_ticks {
            Err(Error::LinkFailed(self.consecutive_failures))
        } else {
            Ok(None)
        }
    }

    /// Read one streamed tick.
    ///
    /// Distinguishes an idle link (no bytes at all: not a failure) from a
    /// broken tick (partial envelope, nack, bad length, unknown slot).
    fn read_tick(&mut self, timeout: Duration) -> Result<Option<Sample>> {
        let deadline = Instant::now() + timeout;
        let transport = self.transport_mut()?;

        // first envelope byte decides idle vs. data
        let mut fail = [0u8; 1];
        loop {
            let n = transport.read(&mut fail)?;
            if n == 1 {
                break;
            }
            if Instant::now() >= deadline {
                return Ok(None); // no tick this round
            }
            std::thread::sleep(Duration::from_millis(1));
        }

        let mut slot = [0u8; 1];
        if transport.read_exact_timeout(&mut slot, timeout).is_err() {
            return self.tick_failed();
        }
        let slot = slot[0];

        if fail[0] != 0 {
            // sensor did not acknowledge; payload is absent
            log::debug!("{}: slot {} missed a tick", self.label, slot);
            return self.tick_failed();
        }

        let transport = self.transport_mut()?;
        let mut len = [0u8; 1];
        if transport.read_exact_timeout(&mut len, timeout).is_err() {
            return self.tick_failed();
        }

        let mut payload = vec![0u8; len[0] as usize];
        if transport.read_exact_timeout(&mut payload, timeout).is_err() {
            return self.tick_failed();
        }

        let reading = match decode_stream_payload(&payload) {
            Ok(r) => r,
            Err(e) => {
                log::debug!("{}: bad tick payload: {}", self.label, e);
                return self.tick_failed();
            }
        };

        let Some(binding) = self.slots.get(&slot) else {
            log::warn!("{}: tick for unknown slot {}", self.label, slot);
            return self.tick_failed();
        };

        let mut readings = HashMap::with_capacity(4);
        readings.insert(CH_PITCH.to_string(), reading.pitch_deg);
        readings.insert(CH_YAW.to_string(), reading.yaw_deg);
        readings.insert(CH_ROLL.to_string(), reading.roll_deg);
        readings.insert(CH_BATTERY.to_string(), reading.battery_pct);

        self.consecutive_failures = 0;
        Ok(Some(Sample::now(binding.nickname.clone(), readings)))
    }
}

impl<T: Transport> SourceAdapter for DongleAdapter<T> {
    fn configure(&mut self) -> Result<()> {
        let interval_us = self.interval_us;
        let slot_ids: Vec<u8> = self.slots.keys().copied().collect();
        let transport = self.transport_mut()?;

        for slot in slot_ids {
            hub_command_acked(
                transport,
                slot,
                &TsCommand::SetStreamingSlots(TsCommand::acquisition_slots()),
            )?;
            hub_command_acked(transport, slot, &TsCommand::acquisition_timing(interval_us))?;
        }
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        let slot_ids: Vec<u8> = self.slots.keys().copied().collect();
        let transport = self.transport_mut()?;

        // fire every start, then collect the acknowledgements
        for slot in &slot_ids {
            transport.write_all(&TsCommand::StartStreaming.encode_hub(*slot))?;
        }
        for _ in &slot_ids {
            read_hub_envelope(transport, super::handshake::ACK_TIMEOUT)?;
        }

        self.started = true;
        log::info!(
            "{}: streaming {} wireless sensor(s) through hub {}",
            self.label,
            self.slots.len(),
            self.hub_id
        );
        Ok(())
    }

    fn recv(&mut self, timeout: Duration) -> Result<Option<Sample>> {
        self.read_tick(timeout)
    }

    fn stop(&mut self) -> Result<()> {
        if !self.started {
            return Ok(());
        }
        self.started = false;

        let slot_ids: Vec<u8> = self.slots.keys().copied().collect();
        let transport = self.transport_mut()?;
        for slot in &slot_ids {
            transport.write_all(&TsCommand::StopStreaming.encode_hub(*slot))?;
        }
        // acks may be interleaved with in-flight ticks; drain best-effort
        for _ in &slot_ids {
            let _ = read_hub_envelope(transport, super::handshake::ACK_TIMEOUT);
        }
        Ok(())
    }

    fn close(&mut self) {
        self.transport = None;
    }

    fn label(&self) -> &str {
        &self.label
    }

    fn device_count(&self) -> usize {
        self.slots.len()
    }
}
