//! End-to-end session over a mock hub: configure, stream, route by slot,
//! tolerate corruption, tear down, persist.

use kaya_io::buffer::BufferBank;
use kaya_io::core::adapter::SourceAdapter;
use kaya_io::core::types::{CH_BATTERY, CH_PITCH, StreamInfo};
use kaya_io::devices::{DongleAdapter, SlotBinding};
use kaya_io::protocol::threespace::{TsCommand, STREAM_PAYLOAD_LEN};
use kaya_io::streaming::{SessionState, StreamEngine};
use kaya_io::transport::MockTransport;
use kaya_io::Sample;
use std::collections::BTreeMap;
use std::time::Duration;

fn bindings() -> BTreeMap<u8, SlotBinding> {
    let mut slots = BTreeMap::new();
    slots.insert(
        2,
        SlotBinding {
            serial_hex: "000000AA".into(),
            nickname: "sensorA".into(),
        },
    );
    slots.insert(
        5,
        SlotBinding {
            serial_hex: "000000BB".into(),
            nickname: "sensorB".into(),
        },
    );
    slots
}

fn ack(slot: u8) -> Vec<u8> {
    vec![0x00, slot, 0x00]
}

fn tick(slot: u8, pitch: f32, yaw: f32, roll: f32, battery: u8) -> Vec<u8> {
    let mut frame = vec![0x00, slot, STREAM_PAYLOAD_LEN as u8];
    frame.extend_from_slice(&pitch.to_be_bytes());
    frame.extend_from_slice(&yaw.to_be_bytes());
    frame.extend_from_slice(&roll.to_be_bytes());
    frame.push(battery);
    frame
}

/// Preload the handshake acknowledgements and a handful of streamed ticks,
/// run a whole session, and check routing plus the bytes we sent.
#[test]
fn mock_hub_session_end_to_end() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mock = MockTransport::new();

    // configure: slots + timing per slot, one ack each
    for slot in [2u8, 5] {
        mock.inject_read(&ack(slot));
        mock.inject_read(&ack(slot));
    }
    // start: one ack per slot
    mock.inject_read(&ack(2));
    mock.inject_read(&ack(5));

    // streamed ticks: slot 5, a nacked tick, slot 2
    mock.inject_read(&tick(5, 0.1, 0.2, 0.3, 91));
    mock.inject_read(&[0x01, 0x05]); // sensor missed this tick
    mock.inject_read(&tick(2, -0.1, 0.0, 0.1, 64));

    let adapter = DongleAdapter::new(
        mock.clone(),
        "mock-hub",
        "0000C0DE",
        bindings(),
        10_000,
        25,
    );

    let mut engine = StreamEngine::new(Duration::from_millis(30), 0);
    let (tx, rx) = crossbeam_channel::bounded::<Sample>(64);
    engine
        .start(vec![Box::new(adapter) as Box<dyn SourceAdapter>], tx)
        .unwrap();
    assert_eq!(engine.state(), SessionState::Streaming);
    assert_eq!(engine.device_count(), 2);

    let first = rx.recv_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!(first.device_id, "sensorB");
    assert_eq!(first.channel_readings[CH_BATTERY], 91.0);

    let second = rx.recv_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!(second.device_id, "sensorA");
    assert_eq!(second.channel_readings[CH_BATTERY], 64.0);

    // the nacked tick produced nothing further
    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());

    engine.stop().unwrap();
    assert_eq!(engine.state(), SessionState::Idle);
    assert_eq!(engine.total_samples(), 2);

    // every request the hub saw, in order: configure, start, stop
    let slots_cmd = TsCommand::SetStreamingSlots(TsCommand::acquisition_slots());
    let timing_cmd = TsCommand::acquisition_timing(10_000);
    let mut expected = Vec::new();
    for slot in [2u8, 5] {
        expected.extend_from_slice(&slots_cmd.encode_hub(slot));
        expected.extend_from_slice(&timing_cmd.encode_hub(slot));
    }
    for slot in [2u8, 5] {
        expected.extend_from_slice(&TsCommand::StartStreaming.encode_hub(slot));
    }
    for slot in [2u8, 5] {
        expected.extend_from_slice(&TsCommand::StopStreaming.encode_hub(slot));
    }
    assert_eq!(mock.get_written(), expected);
}

/// Samples drained from the queue land in per-device buffers and CSV logs.
#[test]
fn drained_samples_persist_per_device() {
    let mock = MockTransport::new();
    for slot in [3u8] {
        mock.inject_read(&ack(slot));
        mock.inject_read(&ack(slot));
        mock.inject_read(&ack(slot));
    }
    mock.inject_read(&tick(3, 0.5, 0.0, -0.5, 77));
    mock.inject_read(&tick(3, 0.6, 0.1, -0.4, 77));

    let mut slots = BTreeMap::new();
    slots.insert(
        3,
        SlotBinding {
            serial_hex: "000000CC".into(),
            nickname: "ankle".into(),
        },
    );
    let adapter = DongleAdapter::new(mock.clone(), "mock-hub", "0000C0DE", slots, 10_000, 25);

    let mut engine = StreamEngine::new(Duration::from_millis(30), 0);
    let (tx, rx) = crossbeam_channel::bounded::<Sample>(64);
    engine
        .start(vec![Box::new(adapter) as Box<dyn SourceAdapter>], tx)
        .unwrap();

    let savedir = tempfile::tempdir().unwrap();
    let infos = vec![StreamInfo {
        device_id: "ankle".into(),
        input_kind: "imu".into(),
        channel_labels: kaya_io::core::types::inertial_channel_labels(),
    }];
    let mut bank = BufferBank::new(savedir.path().to_path_buf(), 100, infos);

    for _ in 0..2 {
        let sample = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        bank.ingest(&sample).unwrap();
    }
    engine.stop().unwrap();

    let buf = bank.get("ankle").unwrap();
    assert_eq!(buf.len(), 2);
    assert!(buf.channel(CH_PITCH).is_some());

    let csv = std::fs::read_to_string(savedir.path().join("imu_ankle.csv")).unwrap();
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines.len(), 3); // header + 2 rows
    assert_eq!(lines[0], "t,Pitch,Yaw,Roll,Battery");
}
