//! EMG base station client and streaming adapter
//!
//! The base station exposes two TCP channels: a command channel speaking
//! `\r\n`-terminated ASCII lines and a data channel streaming fixed frames of
//! 16 little-endian floats, one slot per possible sensor.

use crate::config::EmgConfig;
use crate::core::adapter::SourceAdapter;
use crate::core::types::Sample;
use crate::error::{Error, Result};
use crate::protocol::trigno::{encode_batch, encode_command, FrameReader, EMG_SLOT_COUNT};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;

/// Connect timeout for the initial TCP handshake
const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);
/// Reply timeout on the command channel
const COMMAND_TIMEOUT: Duration = Duration::from_secs(3);

/// One channel on an EMG sensor, as reported by the base station
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmgChannelSpec {
    pub gain: f64,
    /// Native samples per frame
    pub samples_per_frame: u32,
    /// Native sample rate in Hz
    pub native_rate: f64,
    pub units: String,
}

/// EMG sensor properties queried from the base station
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmgSensor {
    pub kind: String,
    pub serial: String,
    pub mode: u32,
    pub firmware: String,
    pub emg_channels: u32,
    pub aux_channels: u32,
    pub start_index: u32,
    pub channel_count: u32,
    pub channels: Vec<EmgChannelSpec>,
}

/// Operator-entered placement metadata for one EMG sensor
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmgSensorMeta {
    pub muscle_name: String,
    pub side: String,
}

/// Client for the base station's command channel plus its EMG data channel
pub struct TrignoClient {
    host: String,
    command_port: u16,
    data_port: u16,
    command: Option<TcpStream>,
    data: Option<TcpStream>,
    connected: bool,
    streaming: bool,
    /// Slot 1..=16 → sensor, if paired and active
    sensors: Vec<Option<EmgSensor>>,
    /// serial → placement metadata
    sensor_meta: HashMap<String, EmgSensorMeta>,
    // capability queries, populated by configure()
    pub frame_interval: f64,
    pub emg_sample_rate: f64,
    pub aux_sample_rate: f64,
    pub endianness: String,
    pub base_firmware: String,
    pub base_serial: String,
    pub backwards_compatibility: String,
    pub upsampling: String,
}

impl TrignoClient {
    pub fn new(config: &EmgConfig) -> Self {
        Self {
            host: config.host.clone(),
            command_port: config.command_port,
            data_port: config.data_port,
            command: None,
            data: None,
            connected: false,
            streaming: false,
            sensors: vec![None; EMG_SLOT_COUNT + 1], // 1-based slots
            sensor_meta: HashMap::new(),
            frame_interval: 0.0,
            emg_sample_rate: 0.0,
            aux_sample_rate: 0.0,
            endianness: String::new(),
            base_firmware: String::new(),
            base_serial: String::new(),
            backwards_compatibility: String::new(),
            upsampling: String::new(),
        }
    }

    pub fn connected(&self) -> bool {
        self.connected
    }

    pub fn streaming(&self) -> bool {
        self.streaming
    }

    /// Sensors by slot (index 0 unused; slots are 1-based on the wire)
    pub fn sensors(&self) -> &[Option<EmgSensor>] {
        &self.sensors
    }

    /// Slots with a paired, active sensor, ascending
    pub fn active_slots(&self) -> Vec<u8> {
        (1..=EMG_SLOT_COUNT)
            .filter(|&i| self.sensors[i].is_some())
            .map(|i| i as u8)
            .collect()
    }

    pub fn sensor_meta(&self) -> &HashMap<String, EmgSensorMeta> {
        &self.sensor_meta
    }

    pub fn sensor_meta_mut(&mut self) -> &mut HashMap<String, EmgSensorMeta> {
        &mut self.sensor_meta
    }

    /// Connect both sockets and read the server greeting
    pub fn connect(&mut self) -> Result<()> {
        if self.connected {
            return Ok(());
        }

        let command = connect_stream(&self.host, self.command_port)?;
        command.set_read_timeout(Some(COMMAND_TIMEOUT))?;
        self.command = Some(command);

        let greeting = self.recv_reply()?;
        log::info!("EMG base station: {}", greeting);

        let data = connect_stream(&self.host, self.data_port)?;
        self.data = Some(data);
        self.connected = true;
        Ok(())
    }

    /// Read one reply chunk from the command channel, trimmed
    fn recv_reply(&mut self) -> Result<String> {
        let stream = self.command.as_mut().ok_or(Error::TransportClosed)?;
        let mut buf = [0u8; 1024];
        match stream.read(&mut buf) {
            Ok(0) => Err(Error::InvalidFrame("command channel closed".into())),
            Ok(n) => Ok(String::from_utf8_lossy(&buf[..n]).trim().to_string()),
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                Err(Error::Timeout)
            }
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Send one command and return its reply line
    pub fn send_cmd(&mut self, cmd: &str) -> Result<String> {
        let stream = self.command.as_mut().ok_or(Error::TransportClosed)?;
        stream.write_all(&encode_command(cmd))?;
        self.recv_reply()
    }

    /// Send a whole command batch, then collect one reply per command
    pub fn send_cmds(&mut self, cmds: &[&str]) -> Result<Vec<String>> {
        let stream = self.command.as_mut().ok_or(Error::TransportClosed)?;
        stream.write_all(&encode_batch(cmds))?;
        cmds.iter().map(|_| self.recv_reply()).collect()
    }

    /// Issue the byte-order command and the read-only capability queries
    pub fn configure(&mut self) -> Result<()> {
        let reply = self.send_cmd("ENDIAN LITTLE")?;
        if reply != "OK" {
            return Err(Error::DeviceError(format!(
                "ENDIAN LITTLE refused: {reply}"
            )));
        }

        self.backwards_compatibility = self.send_cmd("BACKWARDS COMPATIBILITY?")?;
        self.upsampling = self.send_cmd("UPSAMPLING?")?;

        self.frame_interval = self.query_f64("FRAME INTERVAL?")?;
        let max_samples_emg = self.query_f64("MAX SAMPLES EMG?")?;
        let max_samples_aux = self.query_f64("MAX SAMPLES AUX?")?;
        if self.frame_interval > 0.0 {
            self.emg_sample_rate = max_samples_emg / self.frame_interval;
            self.aux_sample_rate = max_samples_aux / self.frame_interval;
        }

        self.endianness = self.send_cmd("ENDIANNESS?")?;
        self.base_firmware = self.send_cmd("BASE FIRMWARE?")?;
        self.base_serial = self.send_cmd("BASE SERIAL?")?;

        log::info!(
            "EMG base {} (fw {}): emg rate {:.1} Hz",
            self.base_serial,
            self.base_firmware,
            self.emg_sample_rate
        );
        Ok(())
    }

    fn query_f64(&mut self, cmd: &str) -> Result<f64> {
        let reply = self.send_cmd(cmd)?;
        reply
            .parse::<f64>()
            .map_err(|_| Error::InvalidParameter(format!("{cmd} returned {reply:?}")))
    }

    fn query_u32(&mut self, cmd: &str) -> Result<u32> {
        let reply = self.send_cmd(cmd)?;
        reply
            .parse::<u32>()
            .map_err(|_| Error::InvalidParameter(format!("{cmd} returned {reply:?}")))
    }

    /// Query every slot for a paired, active sensor
    pub fn query_devices(&mut self) -> Result<()> {
        for i in 1..=EMG_SLOT_COUNT {
            let sensor = self.query_device(i)?;
            self.sensors[i] = sensor;
        }
        let n = self.active_slots().len();
        log::info!("EMG base station reports {} active sensor(s)", n);
        Ok(())
    }

    fn query_device(&mut self, i: usize) -> Result<Option<EmgSensor>> {
        if self.send_cmd(&format!("SENSOR {i} PAIRED?"))? == "NO" {
            return Ok(None);
        }
        if self.send_cmd(&format!("SENSOR {i} ACTIVE?"))? == "NO" {
            return Ok(None);
        }

        let kind = self.send_cmd(&format!("SENSOR {i} TYPE?"))?;
        let mode = self.query_u32(&format!("SENSOR {i} MODE?"))?;
        let serial = self.send_cmd(&format!("SENSOR {i} SERIAL?"))?;
        let firmware = self.send_cmd(&format!("SENSOR {i} FIRMWARE?"))?;
        let emg_channels = self.query_u32(&format!("SENSOR {i} EMGCHANNELCOUNT?"))?;
        let aux_channels = self.query_u32(&format!("SENSOR {i} AUXCHANNELCOUNT?"))?;
        let start_index = self.query_u32(&format!("SENSOR {i} STARTINDEX?"))?;
        let channel_count = self.query_u32(&format!("SENSOR {i} CHANNELCOUNT?"))?;

        let mut channels = Vec::with_capacity(channel_count as usize);
        for j in 1..=channel_count {
            channels.push(EmgChannelSpec {
                gain: self.query_f64(&format!("SENSOR {i} CHANNEL {j} GAIN?"))?,
                samples_per_frame: self.query_u32(&format!("SENSOR {i} CHANNEL {j} SAMPLES?"))?,
                native_rate: self.query_f64(&format!("SENSOR {i} CHANNEL {j} RATE?"))?,
                units: self.send_cmd(&format!("SENSOR {i} CHANNEL {j} UNITS?"))?,
            });
        }

        Ok(Some(EmgSensor {
            kind,
            serial,
            mode,
            firmware,
            emg_channels,
            aux_channels,
            start_index,
            channel_count,
            channels,
        }))
    }

    /// Start acquisition on the data channel
    pub fn start(&mut self) -> Result<()> {
        let reply = self.send_cmd("START")?;
        if reply != "OK" {
            return Err(Error::DeviceError(format!("START refused: {reply}")));
        }
        self.streaming = true;
        Ok(())
    }

    /// Stop acquisition. Idempotent.
    pub fn stop(&mut self) -> Result<()> {
        if !self.streaming {
            return Ok(());
        }
        self.streaming = false;
        if self.connected {
            self.send_cmd("STOP")?;
        }
        Ok(())
    }

    /// Mutable handle to the data socket, for the streaming adapter
    pub(crate) fn data_socket(&mut self) -> Result<&mut TcpStream> {
        self.data.as_mut().ok_or(Error::TransportClosed)
    }

    /// Stop, say goodbye, and release both sockets unconditionally
    pub fn close(&mut self) {
        if let Err(e) = self.stop() {
            log::warn!("EMG stop on close failed: {}", e);
        }
        if self.connected {
            if let Err(e) = self.send_cmd("QUIT") {
                log::warn!("EMG QUIT failed: {}", e);
            }
            self.connected = false;
        }
        if let Some(s) = self.command.take() {
            let _ = s.shutdown(Shutdown::Both);
        }
        if let Some(s) = self.data.take() {
            let _ = s.shutdown(Shutdown::Both);
        }
        self.sensors = vec![None; EMG_SLOT_COUNT + 1];
    }

    /// Persist placement metadata plus the slot→serial index as JSON
    pub fn save_meta<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut doc = serde_json::Map::new();
        for (serial, meta) in &self.sensor_meta {
            doc.insert(
                serial.clone(),
                serde_json::to_value(meta).map_err(|e| Error::Other(e.to_string()))?,
            );
        }
        let idx2serial: HashMap<String, String> = self
            .active_slots()
            .iter()
            .map(|&slot| {
                let serial = self.sensors[slot as usize]
                    .as_ref()
                    .map(|s| s.serial.clone())
                    .unwrap_or_default();
                (slot.to_string(), serial)
            })
            .collect();
        doc.insert(
            "idx2serial".to_string(),
            serde_json::to_value(idx2serial).map_err(|e| Error::Other(e.to_string()))?,
        );

        let file = std::fs::File::create(path)?;
        serde_json::to_writer_pretty(file, &doc).map_err(|e| Error::Other(e.to_string()))?;
        Ok(())
    }

    /// Load placement metadata saved by [`save_meta`](Self::save_meta)
    pub fn load_meta<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let file = std::fs::File::open(path)?;
        let mut doc: serde_json::Map<String, serde_json::Value> =
            serde_json::from_reader(file).map_err(|e| Error::Other(e.to_string()))?;
        doc.remove("idx2serial");

        for (serial, value) in doc {
            let meta: EmgSensorMeta =
                serde_json::from_value(value).map_err(|e| Error::Other(e.to_string()))?;
            self.sensor_meta.insert(serial, meta);
        }
        Ok(())
    }
}

impl Drop for TrignoClient {
    fn drop(&mut self) {
        self.close();
    }
}

fn connect_stream(host: &str, port: u16) -> Result<TcpStream> {
    let addr = (host, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| Error::InvalidParameter(format!("cannot resolve {host}:{port}")))?;
    Ok(TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT)?)
}

/// Streaming adapter over a connected [`TrignoClient`]
pub struct TrignoAdapter {
    client: TrignoClient,
    reader: FrameReader,
    /// Device id samples are tagged with (base station serial)
    device_id: String,
    /// Active slots paired with their channel labels, ascending
    channels: Vec<(u8, String)>,
    label: String,
}

impl TrignoAdapter {
    /// Channel label for one EMG slot
    pub fn slot_label(slot: u8) -> String {
        format!("EMG{slot}")
    }

    pub fn new(client: TrignoClient) -> Self {
        let device_id = if client.base_serial.is_empty() {
            "trigno".to_string()
        } else {
            client.base_serial.clone()
        };
        let channels = client
            .active_slots()
            .into_iter()
            .map(|slot| (slot, Self::slot_label(slot)))
            .collect();
        Self {
            client,
            reader: FrameReader::new(),
            device_id,
            channels,
            label: "trigno".to_string(),
        }
    }

    /// Give the client back, e.g. after a failed session start
    pub fn into_client(self) -> TrignoClient {
        self.client
    }

    /// Ordered channel labels this adapter emits
    pub fn channel_labels(&self) -> Vec<String> {
        self.channels.iter().map(|(_, l)| l.clone()).collect()
    }

    /// Device id this adapter tags samples with
    pub fn device_id(&self) -> &str {
        &self.device_id
    }
}

impl SourceAdapter for TrignoAdapter {
    fn configure(&mut self) -> Result<()> {
        self.client.configure()
    }

    fn start(&mut self) -> Result<()> {
        self.client.start()?;
        log::info!(
            "{}: streaming {} EMG channel(s)",
            self.label,
            self.channels.len()
        );
        Ok(())
    }

    fn recv(&mut self, timeout: Duration) -> Result<Option<Sample>> {
        let stream = self.client.data_socket()?;
        stream.set_read_timeout(Some(timeout))?;

        let Some(frame) = self.reader.read_frame(stream)? else {
            return Ok(None);
        };

        let mut readings = HashMap::with_capacity(self.channels.len());
        for (slot, label) in &self.channels {
            readings.insert(label.clone(), f64::from(frame[*slot as usize - 1]));
        }
        Ok(Some(Sample::now(self.device_id.clone(), readings)))
    }

    fn stop(&mut self) -> Result<()> {
        self.client.stop()
    }

    fn close(&mut self) {
        self.client.close();
    }

    fn label(&self) -> &str {
        &self.label
    }

    fn device_count(&self) -> usize {
        self.channels.len()
    }
}
