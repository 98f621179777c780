//! Directly wired sensor streaming adapter
//!
//! A wired sensor speaks the same protocol as a wireless one but without the
//! hub envelope: requests carry no slot byte and the streamed data is a bare
//! back-to-back sequence of fixed-length payloads.

use crate::core::adapter::SourceAdapter;
use crate::core::types::{Sample, CH_BATTERY, CH_PITCH, CH_ROLL, CH_YAW};
use crate::error::{Error, Result};
use crate::protocol::threespace::{decode_stream_payload, TsCommand, STREAM_PAYLOAD_LEN};
use crate::transport::Transport;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Streaming adapter for one directly attached sensor
pub struct WiredAdapter<T: Transport> {
    transport: Option<T>,
    label: String,
    id: String,
    nickname: String,
    interval_us: u32,
    escalation_ticks: u32,
    consecutive_failures: u32,
    /// Partial payload carried across timed-out reads
    pending: [u8; STREAM_PAYLOAD_LEN],
    pending_len: usize,
    started: bool,
}

impl<T: Transport> WiredAdapter<T> {
    pub fn new(
        transport: T,
        label: impl Into<String>,
        id: impl Into<String>,
        nickname: impl Into<String>,
        interval_us: u32,
        escalation_ticks: u32,
    ) -> Self {
        Self {
            transport: Some(transport),
            label: label.into(),
            id: id.into(),
            nickname: nickname.into(),
            interval_us,
            escalation_ticks,
            consecutive_failures: 0,
            pending: [0u8; STREAM_PAYLOAD_LEN],
            pending_len: 0,
            started: false,
        }
    }

    /// Stable hardware serial of the attached sensor
    pub fn id(&self) -> &str {
        &self.id
    }

    fn tick_failed(&mut self) -> Result<Option<Sample>> {
        self.consecutive_failures += 1;
        if self.consecutive_failures >= self.escalation_ticks {
            Err(Error::LinkFailed(self.consecutive_failures))
        } else {
            Ok(None)
        }
    }
}

impl<T: Transport> SourceAdapter for WiredAdapter<T> {
    fn configure(&mut self) -> Result<()> {
        let slots = TsCommand::SetStreamingSlots(TsCommand::acquisition_slots());
        let timing = TsCommand::acquisition_timing(self.interval_us);
        let transport = self.transport.as_mut().ok_or(Error::TransportClosed)?;
        // wired set commands carry no acknowledgement envelope
        transport.write_all(&slots.encode_wired())?;
        transport.write_all(&timing.encode_wired())?;
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        let transport = self.transport.as_mut().ok_or(Error::TransportClosed)?;
        transport.write_all(&TsCommand::StartStreaming.encode_wired())?;
        self.started = true;
        log::info!("{}: streaming wired sensor {}", self.label, self.id);
        Ok(())
    }

    fn recv(&mut self, timeout: Duration) -> Result<Option<Sample>> {
        let deadline = Instant::now() + timeout;
        let transport = self.transport.as_mut().ok_or(Error::TransportClosed)?;

        while self.pending_len < STREAM_PAYLOAD_LEN {
            let n = transport.read(&mut self.pending[self.pending_len..])?;
            self.pending_len += n;
            if n == 0 {
                if Instant::now() >= deadline {
                    // partial bytes stay buffered for the next call
                    return Ok(None);
                }
                std::thread::sleep(Duration::from_millis(1));
            }
        }
        self.pending_len = 0;

        match decode_stream_payload(&self.pending) {
            Ok(reading) => {
                let mut readings = HashMap::with_capacity(4);
                readings.insert(CH_PITCH.to_string(), reading.pitch_deg);
                readings.insert(CH_YAW.to_string(), reading.yaw_deg);
                readings.insert(CH_ROLL.to_string(), reading.roll_deg);
                readings.insert(CH_BATTERY.to_string(), reading.battery_pct);
                self.consecutive_failures = 0;
                Ok(Some(Sample::now(self.nickname.clone(), readings)))
            }
            Err(e) => {
                log::debug!("{}: bad payload: {}", self.label, e);
                self.tick_failed()
            }
        }
    }

    fn stop(&mut self) -> Result<()> {
        if !self.started {
            return Ok(());
        }
        self.started = false;
        let transport = self.transport.as_mut().ok_or(Error::TransportClosed)?;
        transport.write_all(&TsCommand::StopStreaming.encode_wired())?;
        Ok(())
    }

    fn close(&mut self) {
        self.transport = None;
    }

    fn label(&self) -> &str {
        &self.label
    }

    fn device_count(&self) -> usize {
        1
    }
}
