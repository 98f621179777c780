//! Acquisition source traits
//!
//! Every physical channel (hub serial link, wired sensor link, EMG data
//! socket) is driven through the same small contract so the streaming engine
//! can treat them uniformly.

use crate::core::types::Sample;
use crate::error::Result;
use std::time::Duration;

/// One physical channel turned into a sequence of [`Sample`]s.
///
/// Lifecycle: `configure` → `start` → `recv` in a loop → `stop` → `close`.
/// An adapter is owned by exactly one stream worker for the worker's
/// lifetime; nothing else may touch its transport while the worker runs.
pub trait SourceAdapter: Send {
    /// Apply the streaming configuration handshake (slots, timing, queries)
    fn configure(&mut self) -> Result<()>;

    /// Issue the protocol's start command(s)
    fn start(&mut self) -> Result<()>;

    /// Read at most one sample, blocking up to `timeout`.
    ///
    /// `Ok(None)` means no data this tick (timeout, checksum failure, short
    /// frame), expected and tolerated. `Err` means the link is gone and the
    /// worker should exit.
    fn recv(&mut self, timeout: Duration) -> Result<Option<Sample>>;

    /// Issue the protocol's stop command(s). Idempotent.
    fn stop(&mut self) -> Result<()>;

    /// Release the underlying handle unconditionally, even if `stop` failed
    fn close(&mut self);

    /// Short label for thread naming and logs (e.g. the port name)
    fn label(&self) -> &str;

    /// Number of logical devices this adapter produces samples for
    fn device_count(&self) -> usize;
}

/// A device that supports zero-orientation calibration.
///
/// Taring is issued while no stream is active; failures are logged per
/// device and never abort the batch.
pub trait Tareable {
    fn tare(&mut self) -> Result<()>;
}
