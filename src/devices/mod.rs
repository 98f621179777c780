//! Device registry: discovery, classification, nicknames, lifecycle
//!
//! The registry owns every idle-time handle. When a stream starts, serial
//! handles are torn down and reopened as raw channels owned exclusively by
//! the stream workers; stopping a stream always re-runs discovery, because
//! hardware state is not assumed stable across a raw-access session.

mod dongle;
mod handshake;
mod trigno;
mod wired;

pub use dongle::{DongleAdapter, SlotBinding};
pub use trigno::{EmgChannelSpec, EmgSensor, EmgSensorMeta, TrignoAdapter, TrignoClient};
pub use wired::WiredAdapter;

use crate::config::AppConfig;
use crate::core::adapter::{SourceAdapter, Tareable};
use crate::core::types::{
    inertial_channel_labels, DeviceDescriptor, DeviceKind, LogicalAddress, Sample, StreamInfo,
    TransportRef,
};
use crate::error::{Error, Result};
use crate::protocol::threespace::TsCommand;
use crate::streaming::StreamEngine;
use crate::transport::{SerialTransport, Transport};
use crossbeam_channel::Sender;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

/// USB vendor id of the 3-Space sensor family
const SENSOR_USB_VID: u16 = 0x2476;
/// Product id of the wireless dongle
const PID_DONGLE: u16 = 0x1060;

/// File-name kind tag for inertial streams
const KIND_IMU: &str = "imu";
/// File-name kind tag for the EMG stream
const KIND_EMG: &str = "emg";

/// What a serial port looks like before the discovery handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PortClass {
    Hub,
    Sensor,
}

/// Classify a port from its USB identity and the configured overrides
fn classify_port(
    port_name: &str,
    usb: Option<(u16, u16)>,
    config: &crate::config::HardwareConfig,
) -> Option<PortClass> {
    if config.dongle_ports.iter().any(|p| p == port_name) {
        return Some(PortClass::Hub);
    }
    if config.wired_ports.iter().any(|p| p == port_name) {
        return Some(PortClass::Sensor);
    }
    if !config.auto_discover {
        return None;
    }
    match usb {
        Some((vid, pid)) if vid == SENSOR_USB_VID => {
            if pid == PID_DONGLE {
                Some(PortClass::Hub)
            } else {
                Some(PortClass::Sensor)
            }
        }
        _ => None,
    }
}

/// Idle-time handle on a directly attached sensor
struct WiredHandle {
    port_name: String,
    id: String,
    transport: SerialTransport,
}

impl WiredHandle {
    fn disable_compass(&mut self) -> Result<()> {
        self.transport
            .write_all(&TsCommand::SetCompassEnabled(false).encode_wired())
    }
}

impl Tareable for WiredHandle {
    fn tare(&mut self) -> Result<()> {
        self.transport
            .write_all(&TsCommand::TareWithCurrentOrientation.encode_wired())
    }
}

/// Idle-time handle on a hub and the slot table discovered behind it
struct HubHandle {
    port_name: String,
    id: String,
    slots: BTreeMap<u8, String>,
    transport: SerialTransport,
}

impl HubHandle {
    fn disable_compass(&mut self) -> Result<()> {
        for slot in self.slots.keys().copied().collect::<Vec<_>>() {
            handshake::hub_command_acked(
                &mut self.transport,
                slot,
                &TsCommand::SetCompassEnabled(false),
            )?;
        }
        Ok(())
    }
}

impl Tareable for HubHandle {
    fn tare(&mut self) -> Result<()> {
        for slot in self.slots.keys().copied().collect::<Vec<_>>() {
            handshake::hub_command_acked(
                &mut self.transport,
                slot,
                &TsCommand::TareWithCurrentOrientation,
            )?;
        }
        Ok(())
    }
}

/// Owns device metadata and the streaming engine; the single entry point for
/// the consumer-facing surface (discover / names / start / stop / tare).
pub struct DeviceRegistry {
    config: AppConfig,
    descriptors: Vec<DeviceDescriptor>,
    /// id → nickname; reset on disconnect-all
    nicknames: HashMap<String, String>,
    wired: Vec<WiredHandle>,
    hubs: Vec<HubHandle>,
    emg: Option<TrignoClient>,
    /// Sample-stream id of the EMG base, if one is connected
    emg_device_id: Option<String>,
    engine: StreamEngine,
}

impl DeviceRegistry {
    pub fn new(config: AppConfig) -> Self {
        let engine = StreamEngine::new(
            Duration::from_millis(config.acquisition.recv_timeout_ms),
            config.acquisition.stats_every,
        );
        Self {
            config,
            descriptors: Vec::new(),
            nicknames: HashMap::new(),
            wired: Vec::new(),
            hubs: Vec::new(),
            emg: None,
            emg_device_id: None,
            engine,
        }
    }

    /// One-line summary of the current device set
    pub fn status(&self) -> String {
        let sensors = self
            .descriptors
            .iter()
            .filter(|d| d.kind != DeviceKind::WirelessHub)
            .count();
        format!(
            "Discovered {} hub(s), {} sensor(s)",
            self.hubs.len(),
            sensors
        )
    }

    /// Walk serial ports and the EMG base station, rebuilding the device set.
    ///
    /// Always starts from a clean slate: every previous handle is closed and
    /// every descriptor dropped before probing. Discovered inertial sensors
    /// get their compass disabled and are tared in place.
    pub fn discover(&mut self) -> Result<()> {
        if self.engine.is_active() {
            return Err(Error::SessionActive);
        }
        self.close_all();

        for (port_name, class) in self.candidate_ports()? {
            let outcome = match class {
                PortClass::Hub => self.probe_hub(&port_name),
                PortClass::Sensor => self.probe_wired(&port_name),
            };
            if let Err(e) = outcome {
                log::warn!("Probe of {} failed: {}", port_name, e);
            }
        }

        self.calibrate_discovered();

        if self.config.emg.enabled {
            if let Err(e) = self.connect_emg() {
                log::warn!("EMG base station unavailable: {}", e);
            }
        }

        log::info!("{}", self.status());
        Ok(())
    }

    /// Enumerate candidate ports: configured overrides first, then the USB scan
    fn candidate_ports(&self) -> Result<Vec<(String, PortClass)>> {
        let mut seen: Vec<(String, PortClass)> = Vec::new();

        for port in &self.config.hardware.dongle_ports {
            seen.push((port.clone(), PortClass::Hub));
        }
        for port in &self.config.hardware.wired_ports {
            seen.push((port.clone(), PortClass::Sensor));
        }

        if self.config.hardware.auto_discover {
            for info in serialport::available_ports()? {
                if seen.iter().any(|(name, _)| *name == info.port_name) {
                    continue;
                }
                let usb = match &info.port_type {
                    serialport::SerialPortType::UsbPort(usb) => Some((usb.vid, usb.pid)),
                    _ => None,
                };
                if let Some(class) = classify_port(&info.port_name, usb, &self.config.hardware) {
                    seen.push((info.port_name, class));
                }
            }
        }

        Ok(seen)
    }

    fn probe_wired(&mut self, port_name: &str) -> Result<()> {
        let mut transport = SerialTransport::open(port_name, self.config.hardware.baud_rate)?;
        transport.drain_input()?;
        let id = handshake::query_serial_number(&mut transport)?;

        self.register_descriptor(DeviceDescriptor::new(
            id.clone(),
            DeviceKind::WiredSensor,
            inertial_channel_labels(),
            TransportRef::Serial {
                port: port_name.to_string(),
            },
        ));
        self.wired.push(WiredHandle {
            port_name: port_name.to_string(),
            id,
            transport,
        });
        Ok(())
    }

    fn probe_hub(&mut self, port_name: &str) -> Result<()> {
        let mut transport = SerialTransport::open(port_name, self.config.hardware.baud_rate)?;
        transport.drain_input()?;
        let hub_id = handshake::query_serial_number(&mut transport)?;
        let slots = handshake::walk_hub_slots(&mut transport)?;

        self.register_descriptor(DeviceDescriptor::new(
            hub_id.clone(),
            DeviceKind::WirelessHub,
            Vec::new(),
            TransportRef::Serial {
                port: port_name.to_string(),
            },
        ));
        for (slot, serial) in &slots {
            self.register_descriptor(DeviceDescriptor::new(
                serial.clone(),
                DeviceKind::WirelessSensor,
                inertial_channel_labels(),
                TransportRef::Wireless(LogicalAddress {
                    hub_id: hub_id.clone(),
                    logical_slot: *slot,
                }),
            ));
        }
        self.hubs.push(HubHandle {
            port_name: port_name.to_string(),
            id: hub_id,
            slots,
            transport,
        });
        Ok(())
    }

    /// Compass off and tare for every inertial sensor; per-device failures
    /// are logged, never fatal to the batch.
    fn calibrate_discovered(&mut self) {
        for handle in &mut self.wired {
            if let Err(e) = handle.disable_compass() {
                log::warn!("{}: compass disable failed: {}", handle.id, e);
            }
            if let Err(e) = handle.tare() {
                log::warn!("{}: tare failed: {}", handle.id, e);
            }
        }
        for hub in &mut self.hubs {
            if let Err(e) = hub.disable_compass() {
                log::warn!("hub {}: compass disable failed: {}", hub.id, e);
            }
            if let Err(e) = hub.tare() {
                log::warn!("hub {}: tare failed: {}", hub.id, e);
            }
        }
    }

    fn connect_emg(&mut self) -> Result<()> {
        let mut client = TrignoClient::new(&self.config.emg);
        client.connect()?;
        client.configure()?;
        client.query_devices()?;

        for slot in client.active_slots() {
            let serial = client.sensors()[slot as usize]
                .as_ref()
                .map(|s| s.serial.clone())
                .unwrap_or_else(|| format!("EMG-slot-{slot}"));
            self.register_descriptor(DeviceDescriptor::new(
                serial,
                DeviceKind::EmgChannel,
                vec![TrignoAdapter::slot_label(slot)],
                TransportRef::Emg { slot },
            ));
        }

        self.emg_device_id = Some(if client.base_serial.is_empty() {
            "trigno".to_string()
        } else {
            client.base_serial.clone()
        });
        self.emg = Some(client);
        Ok(())
    }

    /// Insert a descriptor, applying the persisted nickname (default: the id)
    fn register_descriptor(&mut self, mut descriptor: DeviceDescriptor) {
        let nickname = self
            .nicknames
            .entry(descriptor.id.clone())
            .or_insert_with(|| descriptor.id.clone())
            .clone();
        descriptor.nickname = nickname;
        self.descriptors.push(descriptor);
    }

    /// Whether any streamable sensor (hubs excluded) is known
    pub fn has_sensors(&self) -> bool {
        self.descriptors
            .iter()
            .any(|d| d.kind != DeviceKind::WirelessHub)
    }

    /// Hardware serials of every sensor (hubs excluded)
    pub fn get_all_sensor_serial(&self) -> Vec<String> {
        self.descriptors
            .iter()
            .filter(|d| d.kind != DeviceKind::WirelessHub)
            .map(|d| d.id.clone())
            .collect()
    }

    /// Nicknames of every sensor (hubs excluded)
    pub fn get_all_sensor_names(&self) -> Vec<String> {
        self.descriptors
            .iter()
            .filter(|d| d.kind != DeviceKind::WirelessHub)
            .map(|d| d.nickname.clone())
            .collect()
    }

    /// Nickname of one device, if known
    pub fn get_device_name(&self, id: &str) -> Option<&str> {
        self.nicknames.get(id).map(String::as_str)
    }

    /// Rename a device without touching its hardware id
    pub fn set_device_name(&mut self, id: &str, name: &str) {
        log::info!("{} nicknamed {}", id, name);
        self.nicknames.insert(id.to_string(), name.to_string());
        for descriptor in &mut self.descriptors {
            if descriptor.id == id {
                descriptor.nickname = name.to_string();
            }
        }
    }

    /// All descriptors, hubs included
    pub fn descriptors(&self) -> &[DeviceDescriptor] {
        &self.descriptors
    }

    /// Per-stream persistence info for the consumer's buffers
    pub fn stream_info(&self) -> Vec<StreamInfo> {
        let mut infos: Vec<StreamInfo> = self
            .descriptors
            .iter()
            .filter(|d| matches!(d.kind, DeviceKind::WiredSensor | DeviceKind::WirelessSensor))
            .map(|d| StreamInfo {
                device_id: d.nickname.clone(),
                input_kind: KIND_IMU.to_string(),
                channel_labels: d.channel_labels.clone(),
            })
            .collect();

        if let Some(emg_id) = &self.emg_device_id {
            let mut labels: Vec<(u8, String)> = self
                .descriptors
                .iter()
                .filter_map(|d| match &d.transport {
                    TransportRef::Emg { slot } => {
                        Some((*slot, TrignoAdapter::slot_label(*slot)))
                    }
                    _ => None,
                })
                .collect();
            labels.sort_by_key(|(slot, _)| *slot);
            if !labels.is_empty() {
                infos.push(StreamInfo {
                    device_id: emg_id.clone(),
                    input_kind: KIND_EMG.to_string(),
                    channel_labels: labels.into_iter().map(|(_, l)| l).collect(),
                });
            }
        }
        infos
    }

    /// Zero-orientation calibration for every inertial sensor, while idle.
    /// Fire-and-forget: failures are logged per device.
    pub fn tare_all(&mut self) -> Result<()> {
        if self.engine.is_active() {
            return Err(Error::SessionActive);
        }
        for handle in &mut self.wired {
            match handle.tare() {
                Ok(()) => log::info!("{} tared", handle.id),
                Err(e) => log::warn!("{}: tare failed: {}", handle.id, e),
            }
        }
        for hub in &mut self.hubs {
            match hub.tare() {
                Ok(()) => log::info!("hub {} slots tared", hub.id),
                Err(e) => log::warn!("hub {}: tare failed: {}", hub.id, e),
            }
        }
        Ok(())
    }

    /// Close every transport and clear all bookkeeping.
    /// Afterward `has_sensors()` is false and no nickname survives.
    pub fn close_all(&mut self) {
        self.wired.clear();
        self.hubs.clear();
        if let Some(mut client) = self.emg.take() {
            client.close();
        }
        self.emg_device_id = None;
        self.descriptors.clear();
        self.nicknames.clear();
    }

    /// Start one streaming session into the consumer's bounded queue.
    ///
    /// Registry handles are consumed: serial ports are closed and reopened as
    /// raw channels owned exclusively by the stream workers, and the EMG
    /// client moves into its adapter. On any failure the registry is left
    /// empty and a fresh `discover` is required.
    pub fn start_stream(&mut self, queue: Sender<Sample>) -> Result<()> {
        if self.engine.is_active() {
            return Err(Error::SessionActive);
        }
        if !self.has_sensors() {
            return Err(Error::NoSensors);
        }

        let interval_us = self.config.interval_us();
        let escalation = self.config.acquisition.error_escalation_ticks;
        let baud = self.config.hardware.baud_rate;
        let nicknames = self.nicknames.clone();

        let mut build = || -> Result<Vec<Box<dyn SourceAdapter>>> {
            let mut adapters: Vec<Box<dyn SourceAdapter>> = Vec::new();

            for hub in self.hubs.drain(..) {
                let HubHandle {
                    port_name,
                    id,
                    slots,
                    transport,
                } = hub;
                // the registry handle must not coexist with the worker's
                drop(transport);
                let raw = SerialTransport::open(&port_name, baud)?;

                let bindings: BTreeMap<u8, SlotBinding> = slots
                    .into_iter()
                    .map(|(slot, serial)| {
                        let nickname = nicknames
                            .get(&serial)
                            .cloned()
                            .unwrap_or_else(|| serial.clone());
                        (
                            slot,
                            SlotBinding {
                                serial_hex: serial,
                                nickname,
                            },
                        )
                    })
                    .collect();
                if bindings.is_empty() {
                    log::warn!("hub {} has no bound slots, skipping", id);
                    continue;
                }
                adapters.push(Box::new(DongleAdapter::new(
                    raw,
                    port_name,
                    id,
                    bindings,
                    interval_us,
                    escalation,
                )));
            }

            for handle in self.wired.drain(..) {
                let WiredHandle {
                    port_name,
                    id,
                    transport,
                } = handle;
                drop(transport);
                let raw = SerialTransport::open(&port_name, baud)?;
                let nickname = nicknames.get(&id).cloned().unwrap_or_else(|| id.clone());
                adapters.push(Box::new(WiredAdapter::new(
                    raw,
                    port_name,
                    id,
                    nickname,
                    interval_us,
                    escalation,
                )));
            }

            if let Some(client) = self.emg.take() {
                adapters.push(Box::new(TrignoAdapter::new(client)));
            }

            Ok(adapters)
        };

        let adapters = match build() {
            Ok(adapters) => adapters,
            Err(e) => {
                // partial teardown: hardware state unknown until re-discovery
                self.close_all();
                return Err(e);
            }
        };

        if let Err(e) = self.engine.start(adapters, queue) {
            self.close_all();
            return Err(e);
        }
        Ok(())
    }

    /// Stop the active session, then re-run discovery so the registry
    /// reflects current hardware reality.
    pub fn stop_stream(&mut self) -> Result<()> {
        if !self.engine.is_active() {
            return Ok(());
        }
        self.engine.stop()?;
        // raw access may leave devices needing a fresh handle
        self.discover()
    }

    /// Session and throughput accounting, for observability
    pub fn engine(&self) -> &StreamEngine {
        &self.engine
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::inertial_channel_labels;

    fn registry() -> DeviceRegistry {
        let mut config = AppConfig::lab_defaults();
        config.hardware.auto_discover = false;
        DeviceRegistry::new(config)
    }

    fn wired_descriptor(id: &str) -> DeviceDescriptor {
        DeviceDescriptor::new(
            id,
            DeviceKind::WiredSensor,
            inertial_channel_labels(),
            TransportRef::Serial {
                port: "/dev/ttyUSB0".into(),
            },
        )
    }

    #[test]
    fn test_classify_port_overrides_beat_usb_identity() {
        let mut hw = AppConfig::lab_defaults().hardware;
        hw.dongle_ports = vec!["COM7".into()];
        hw.wired_ports = vec!["COM8".into()];

        assert_eq!(classify_port("COM7", None, &hw), Some(PortClass::Hub));
        assert_eq!(classify_port("COM8", None, &hw), Some(PortClass::Sensor));
    }

    #[test]
    fn test_classify_port_by_usb_identity() {
        let hw = AppConfig::lab_defaults().hardware;

        assert_eq!(
            classify_port("COM3", Some((SENSOR_USB_VID, PID_DONGLE)), &hw),
            Some(PortClass::Hub)
        );
        assert_eq!(
            classify_port("COM4", Some((SENSOR_USB_VID, 0x1010)), &hw),
            Some(PortClass::Sensor)
        );
        // foreign vendor
        assert_eq!(classify_port("COM5", Some((0x0403, 0x6001)), &hw), None);
        // non-USB port
        assert_eq!(classify_port("/dev/ttyS0", None, &hw), None);
    }

    #[test]
    fn test_classify_port_scan_disabled() {
        let mut hw = AppConfig::lab_defaults().hardware;
        hw.auto_discover = false;
        assert_eq!(
            classify_port("COM3", Some((SENSOR_USB_VID, PID_DONGLE)), &hw),
            None
        );
    }

    #[test]
    fn test_nickname_defaults_and_rename() {
        let mut r = registry();
        r.register_descriptor(wired_descriptor("0000A1B2"));

        assert!(r.has_sensors());
        assert_eq!(r.get_all_sensor_serial(), vec!["0000A1B2"]);
        assert_eq!(r.get_all_sensor_names(), vec!["0000A1B2"]);

        r.set_device_name("0000A1B2", "forearm");
        assert_eq!(r.get_device_name("0000A1B2"), Some("forearm"));
        assert_eq!(r.get_all_sensor_names(), vec!["forearm"]);
        // id untouched
        assert_eq!(r.get_all_sensor_serial(), vec!["0000A1B2"]);
    }

    #[test]
    fn test_hubs_are_not_sensors() {
        let mut r = registry();
        r.register_descriptor(DeviceDescriptor::new(
            "0000FFFF",
            DeviceKind::WirelessHub,
            Vec::new(),
            TransportRef::Serial {
                port: "/dev/ttyUSB1".into(),
            },
        ));
        assert!(!r.has_sensors());
        assert!(r.get_all_sensor_serial().is_empty());
    }

    #[test]
    fn test_close_all_clears_every_map() {
        let mut r = registry();
        r.register_descriptor(wired_descriptor("0000A1B2"));
        r.set_device_name("0000A1B2", "forearm");

        r.close_all();
        assert!(!r.has_sensors());
        assert!(r.descriptors().is_empty());
        assert_eq!(r.get_device_name("0000A1B2"), None);
    }

    #[test]
    fn test_start_stream_without_sensors_fails() {
        let mut r = registry();
        let (tx, _rx) = crossbeam_channel::bounded::<Sample>(8);
        assert!(matches!(r.start_stream(tx), Err(Error::NoSensors)));
    }

    #[test]
    fn test_stream_info_groups_emg_channels() {
        let mut r = registry();
        r.register_descriptor(wired_descriptor("0000A1B2"));
        r.register_descriptor(DeviceDescriptor::new(
            "T-0042",
            DeviceKind::EmgChannel,
            vec![TrignoAdapter::slot_label(3)],
            TransportRef::Emg { slot: 3 },
        ));
        r.register_descriptor(DeviceDescriptor::new(
            "T-0043",
            DeviceKind::EmgChannel,
            vec![TrignoAdapter::slot_label(1)],
            TransportRef::Emg { slot: 1 },
        ));
        r.emg_device_id = Some("MDS1234".into());

        let infos = r.stream_info();
        assert_eq!(infos.len(), 2);
        assert_eq!(infos[0].device_id, "0000A1B2");
        assert_eq!(infos[0].input_kind, "imu");
        let emg = &infos[1];
        assert_eq!(emg.device_id, "MDS1234");
        assert_eq!(emg.channel_labels, vec!["EMG1", "EMG3"]);
    }
}
