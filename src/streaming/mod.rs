//! Streaming engine: one worker thread per physical transport
//!
//! A session is one start→stop cycle. Workers block only inside
//! `recv(timeout)`, push into the consumer's bounded queue, and honor a shared
//! cancellation flag checked once per iteration. Stopping joins every worker
//! with a bounded wait; a worker stuck past the deadline is abandoned and its
//! resources are closed best-effort by its own exit path.

use crate::core::adapter::SourceAdapter;
use crate::core::types::Sample;
use crate::error::{Error, Result};
use crossbeam_channel::{SendTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// How long `stop` waits for workers to notice cancellation
const JOIN_WAIT: Duration = Duration::from_secs(2);
/// Poll interval while waiting on a worker to finish
const JOIN_POLL: Duration = Duration::from_millis(10);

/// Session lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Configuring,
    Streaming,
    Draining,
}

/// Drives one acquisition session across all transports
pub struct StreamEngine {
    state: SessionState,
    cancel: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
    total_samples: Arc<AtomicU64>,
    recv_timeout: Duration,
    stats_every: u64,
    device_count: usize,
}

impl StreamEngine {
    pub fn new(recv_timeout: Duration, stats_every: u64) -> Self {
        Self {
            state: SessionState::Idle,
            cancel: Arc::new(AtomicBool::new(false)),
            workers: Vec::new(),
            total_samples: Arc::new(AtomicU64::new(0)),
            recv_timeout,
            stats_every,
            device_count: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Whether a session is anywhere between start and a completed stop
    pub fn is_active(&self) -> bool {
        self.state != SessionState::Idle
    }

    /// Samples pushed to the queue so far this session
    pub fn total_samples(&self) -> u64 {
        self.total_samples.load(Ordering::Relaxed)
    }

    /// Logical devices streaming in the current session
    pub fn device_count(&self) -> usize {
        self.device_count
    }

    /// Configure every adapter and spawn one worker per transport.
    ///
    /// Fails fast without transitioning to `Streaming` when the adapter set
    /// is empty or any configuration handshake fails; already-started
    /// adapters are stopped and closed before returning the error.
    pub fn start(
        &mut self,
        mut adapters: Vec<Box<dyn SourceAdapter>>,
        queue: Sender<Sample>,
    ) -> Result<()> {
        if self.is_active() {
            return Err(Error::SessionActive);
        }
        if adapters.is_empty() {
            return Err(Error::NoSensors);
        }

        self.state = SessionState::Configuring;

        if let Err(e) = configure_all(&mut adapters) {
            for adapter in &mut adapters {
                if let Err(stop_err) = adapter.stop() {
                    log::warn!("{}: stop after failed start: {}", adapter.label(), stop_err);
                }
                adapter.close();
            }
            self.state = SessionState::Idle;
            return Err(e);
        }

        self.cancel = Arc::new(AtomicBool::new(false));
        self.total_samples = Arc::new(AtomicU64::new(0));
        self.device_count = adapters.iter().map(|a| a.device_count()).sum();

        let transports = adapters.len();
        for adapter in adapters {
            let cancel = Arc::clone(&self.cancel);
            let tx = queue.clone();
            let total = Arc::clone(&self.total_samples);
            let stats_every = self.stats_every;
            let recv_timeout = self.recv_timeout;

            let name = format!("stream-{}", sanitize_thread_name(adapter.label()));
            let handle = std::thread::Builder::new()
                .name(name)
                .spawn(move || worker_loop(adapter, cancel, tx, total, stats_every, recv_timeout))
                .map_err(|e| Error::Other(format!("failed to spawn stream worker: {e}")))?;
            self.workers.push(handle);
        }

        self.state = SessionState::Streaming;
        log::info!(
            "Streaming {} device(s) over {} transport(s)",
            self.device_count,
            transports
        );
        Ok(())
    }

    /// Cancel, join every worker with a bounded wait, and return to idle.
    ///
    /// Each worker issues its transport's native stop command and closes the
    /// handle on its own way out; a worker that ignores cancellation past the
    /// deadline is abandoned.
    pub fn stop(&mut self) -> Result<()> {
        if !self.is_active() {
            return Ok(());
        }

        self.state = SessionState::Draining;
        self.cancel.store(true, Ordering::Relaxed);

        let deadline = Instant::now() + JOIN_WAIT;
        for handle in self.workers.drain(..) {
            while !handle.is_finished() && Instant::now() < deadline {
                std::thread::sleep(JOIN_POLL);
            }
            if handle.is_finished() {
                if handle.join().is_err() {
                    log::error!("stream worker panicked");
                }
            } else {
                log::warn!(
                    "stream worker {:?} ignored cancellation, abandoning it",
                    handle.thread().name().unwrap_or("?")
                );
                drop(handle);
            }
        }

        self.state = SessionState::Idle;
        self.device_count = 0;
        log::info!(
            "Session stopped after {} sample(s)",
            self.total_samples.load(Ordering::Relaxed)
        );
        Ok(())
    }
}

fn configure_all(adapters: &mut [Box<dyn SourceAdapter>]) -> Result<()> {
    for adapter in adapters.iter_mut() {
        adapter.configure()?;
        adapter.start()?;
    }
    Ok(())
}

fn sanitize_thread_name(label: &str) -> String {
    label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect()
}

/// Worker loop: recv → push, until cancelled or the link dies.
///
/// `Ok(None)` ticks are routine; a hard error ends this worker only; the
/// rest of the session keeps streaming.
fn worker_loop(
    mut adapter: Box<dyn SourceAdapter>,
    cancel: Arc<AtomicBool>,
    tx: Sender<Sample>,
    total: Arc<AtomicU64>,
    stats_every: u64,
    recv_timeout: Duration,
) {
    let label = adapter.label().to_string();
    let mut window_count = 0u64;
    let mut window_start = Instant::now();

    'outer: while !cancel.load(Ordering::Relaxed) {
        match adapter.recv(recv_timeout) {
            Ok(Some(sample)) => {
                let mut pending = sample;
                loop {
                    match tx.send_timeout(pending, recv_timeout) {
                        Ok(()) => break,
                        Err(SendTimeoutError::Timeout(s)) => {
                            if cancel.load(Ordering::Relaxed) {
                                break 'outer;
                            }
                            pending = s;
                        }
                        Err(SendTimeoutError::Disconnected(_)) => {
                            log::info!("{}: consumer queue closed, stopping", label);
                            break 'outer;
                        }
                    }
                }

                total.fetch_add(1, Ordering::Relaxed);
                window_count += 1;
                if stats_every > 0 && window_count >= stats_every {
                    let dt = window_start.elapsed().as_secs_f64();
                    if dt > 0.0 {
                        log::info!(
                            "{}: throughput {:.1} samples/s",
                            label,
                            window_count as f64 / dt
                        );
                    }
                    window_count = 0;
                    window_start = Instant::now();
                }
            }
            Ok(None) => {} // missed tick, keep going
            Err(e) => {
                log::error!("{}: transport failed, worker exiting: {}", label, e);
                break;
            }
        }
    }

    if let Err(e) = adapter.stop() {
        log::warn!("{}: stop failed: {}", label, e);
    }
    adapter.close();
    log::debug!("{}: worker exited", label);
}
