//! kaya-io - Multi-sensor acquisition library for body-kinematics rigs
//!
//! Turns heterogeneous physical sensors (inertial sensors wired over USB
//! serial or wireless behind a serial dongle, and an EMG base station over
//! TCP) into one uniform stream of typed, timestamped samples, while
//! persisting every sample to per-device CSV logs.
//!
//! Typical flow:
//!
//! 1. [`DeviceRegistry::discover`] walks the hardware and builds descriptors
//! 2. [`DeviceRegistry::start_stream`] spawns one worker per transport,
//!    pushing [`Sample`]s into the consumer's bounded queue
//! 3. The consumer drains the queue into a [`buffer::BufferBank`]
//! 4. [`DeviceRegistry::stop_stream`] tears everything down and re-discovers

pub mod buffer;
pub mod config;
pub mod core;
pub mod devices;
pub mod error;
pub mod protocol;
pub mod streaming;
pub mod transport;

// Re-export commonly used types
pub use crate::config::AppConfig;
pub use crate::core::types::{DeviceDescriptor, DeviceKind, LogicalAddress, Sample, StreamInfo};
pub use crate::devices::DeviceRegistry;
pub use crate::error::{Error, Result};
pub use crate::streaming::{SessionState, StreamEngine};
