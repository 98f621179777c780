//! Consumer-side channel buffers and persistence
//!
//! Each device gets a fixed-capacity sliding window over its most recent
//! samples plus an append-only CSV log flushed per row. Buffers are owned and
//! mutated only by the thread draining the sample queue; producers never
//! touch them.

use crate::core::types::{Sample, StreamInfo};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Default moving-average window for derived channels
pub const DEFAULT_MOVING_AVERAGE_POINTS: usize = 100;

/// Create a timestamped session directory under `data_root`
pub fn session_dir(data_root: &Path, task_name: &str) -> Result<PathBuf> {
    let stamp = chrono::Local::now().format("%Y-%m-%d %H-%M-%S-%6f");
    let dir = data_root.join(format!("{stamp}_{task_name}"));
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Subject metadata persisted next to the session data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectMetadata {
    pub subject_id: String,
    pub stim: bool,
}

impl Default for SubjectMetadata {
    fn default() -> Self {
        Self {
            subject_id: "Enter S00#".to_string(),
            stim: false,
        }
    }
}

impl SubjectMetadata {
    /// Write metadata to `savedir/meta.json`
    pub fn to_disk(&self, savedir: &Path) -> Result<()> {
        let file = File::create(savedir.join("meta.json"))?;
        serde_json::to_writer_pretty(file, self).map_err(|e| Error::Other(e.to_string()))?;
        Ok(())
    }
}

/// Fixed-capacity sliding window over one device's samples, with a CSV log.
///
/// The window keeps the `capacity` most recent samples in arrival order
/// (index 0 oldest); older entries are evicted by shifting left. It never
/// shrinks or reallocates after the first fill.
pub struct MultichannelBuffer {
    capacity: usize,
    channel_labels: Vec<String>,
    timestamps: Vec<f64>,
    /// One column per channel label, parallel to `timestamps`
    columns: Vec<Vec<f64>>,
    log_file: File,
    name: String,
    path: PathBuf,
}

impl MultichannelBuffer {
    /// Open `savedir/<input_kind>_<name>.csv` and write the header row
    pub fn new(
        capacity: usize,
        savedir: &Path,
        name: &str,
        input_kind: &str,
        channel_labels: Vec<String>,
    ) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::InvalidParameter("buffer capacity must be > 0".into()));
        }
        if channel_labels.is_empty() {
            return Err(Error::InvalidParameter("no channel labels".into()));
        }

        let path = savedir.join(format!("{input_kind}_{name}.csv"));
        let mut log_file = File::create(&path)?;

        let mut header = String::from("t");
        for label in &channel_labels {
            header.push(',');
            header.push_str(label);
        }
        header.push('\n');
        log_file.write_all(header.as_bytes())?;

        let columns = channel_labels
            .iter()
            .map(|_| Vec::with_capacity(capacity))
            .collect();

        Ok(Self {
            capacity,
            channel_labels,
            timestamps: Vec::with_capacity(capacity),
            columns,
            log_file,
            name: name.to_string(),
            path,
        })
    }

    /// Append one sample: log it (flushed per row, durability over
    /// throughput) and slide it into the window.
    ///
    /// Fails if the sample does not carry exactly this buffer's labels.
    pub fn add_sample(&mut self, sample: &Sample) -> Result<()> {
        let mut readings = Vec::with_capacity(self.channel_labels.len());
        for label in &self.channel_labels {
            let value = sample.channel_readings.get(label).ok_or_else(|| {
                Error::InvalidParameter(format!(
                    "sample from {} missing channel {:?}",
                    sample.device_id, label
                ))
            })?;
            readings.push(*value);
        }

        let mut row = String::with_capacity(16 * (readings.len() + 1));
        row.push_str(&sample.time.to_string());
        for value in &readings {
            row.push(',');
            row.push_str(&value.to_string());
        }
        row.push('\n');
        self.log_file.write_all(row.as_bytes())?;
        self.log_file.flush()?;

        if self.timestamps.len() == self.capacity {
            // evict oldest: shift left, append at the end
            self.timestamps.copy_within(1.., 0);
            if let Some(last) = self.timestamps.last_mut() {
                *last = sample.time;
            }
            for (column, value) in self.columns.iter_mut().zip(&readings) {
                column.copy_within(1.., 0);
                if let Some(last) = column.last_mut() {
                    *last = *value;
                }
            }
        } else {
            self.timestamps.push(sample.time);
            for (column, value) in self.columns.iter_mut().zip(&readings) {
                column.push(*value);
            }
        }
        Ok(())
    }

    /// Samples currently in the window
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Path of the CSV log backing this buffer
    pub fn log_path(&self) -> &Path {
        &self.path
    }

    pub fn channel_labels(&self) -> &[String] {
        &self.channel_labels
    }

    /// Window timestamps, oldest first
    pub fn timestamps(&self) -> &[f64] {
        &self.timestamps
    }

    /// One channel's window, oldest first
    pub fn channel(&self, label: &str) -> Option<&[f64]> {
        let idx = self.channel_labels.iter().position(|l| l == label)?;
        Some(&self.columns[idx])
    }
}

/// [`MultichannelBuffer`] plus a second ring of moving-average values, so a
/// consumer can read raw or smoothed data without recomputation per read.
pub struct AveragedMultichannelBuffer {
    inner: MultichannelBuffer,
    window: usize,
    averaged: Vec<Vec<f64>>,
}

impl AveragedMultichannelBuffer {
    pub fn new(
        capacity: usize,
        savedir: &Path,
        name: &str,
        input_kind: &str,
        channel_labels: Vec<String>,
    ) -> Result<Self> {
        let inner = MultichannelBuffer::new(capacity, savedir, name, input_kind, channel_labels)?;
        let averaged = inner
            .channel_labels
            .iter()
            .map(|_| Vec::with_capacity(capacity))
            .collect();
        Ok(Self {
            inner,
            window: capacity.min(DEFAULT_MOVING_AVERAGE_POINTS),
            averaged,
        })
    }

    /// Moving-average window width actually in effect
    pub fn window(&self) -> usize {
        self.window
    }

    /// Raw window and log access
    pub fn raw(&self) -> &MultichannelBuffer {
        &self.inner
    }

    pub fn add_sample(&mut self, sample: &Sample) -> Result<()> {
        self.inner.add_sample(sample)?;

        let filled = self.inner.len();
        for (idx, averaged) in self.averaged.iter_mut().enumerate() {
            let column = &self.inner.columns[idx];
            let span = self.window.min(filled);
            let mean = column[filled - span..].iter().sum::<f64>() / span as f64;

            if averaged.len() == self.inner.capacity {
                averaged.copy_within(1.., 0);
                if let Some(last) = averaged.last_mut() {
                    *last = mean;
                }
            } else {
                averaged.push(mean);
            }
        }
        Ok(())
    }

    /// One channel's smoothed window, oldest first
    pub fn averaged_channel(&self, label: &str) -> Option<&[f64]> {
        let idx = self
            .inner
            .channel_labels
            .iter()
            .position(|l| l == label)?;
        Some(&self.averaged[idx])
    }
}

/// Lazily creates one buffer per device as its first sample arrives, using
/// the registry's per-stream info for labels and file naming.
pub struct BufferBank {
    savedir: PathBuf,
    capacity: usize,
    infos: HashMap<String, StreamInfo>,
    buffers: HashMap<String, MultichannelBuffer>,
}

impl BufferBank {
    pub fn new(savedir: PathBuf, capacity: usize, infos: Vec<StreamInfo>) -> Self {
        let infos = infos
            .into_iter()
            .map(|info| (info.device_id.clone(), info))
            .collect();
        Self {
            savedir,
            capacity,
            infos,
            buffers: HashMap::new(),
        }
    }

    /// Route one sample to its device's buffer, creating it on first contact
    pub fn ingest(&mut self, sample: &Sample) -> Result<()> {
        if !self.buffers.contains_key(&sample.device_id) {
            let buffer = match self.infos.get(&sample.device_id) {
                Some(info) => MultichannelBuffer::new(
                    self.capacity,
                    &self.savedir,
                    &info.device_id,
                    &info.input_kind,
                    info.channel_labels.clone(),
                )?,
                None => {
                    // stream with no registered info: derive labels from the sample
                    let mut labels: Vec<String> =
                        sample.channel_readings.keys().cloned().collect();
                    labels.sort();
                    log::warn!(
                        "No stream info for {}, deriving {} label(s)",
                        sample.device_id,
                        labels.len()
                    );
                    MultichannelBuffer::new(
                        self.capacity,
                        &self.savedir,
                        &sample.device_id,
                        "unknown",
                        labels,
                    )?
                }
            };
            self.buffers.insert(sample.device_id.clone(), buffer);
        }

        // just inserted above if absent
        match self.buffers.get_mut(&sample.device_id) {
            Some(buffer) => buffer.add_sample(sample),
            None => Err(Error::Other("buffer insertion failed".into())),
        }
    }

    pub fn get(&self, device_id: &str) -> Option<&MultichannelBuffer> {
        self.buffers.get(device_id)
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{CH_BATTERY, CH_PITCH, CH_ROLL, CH_YAW};

    fn labels() -> Vec<String> {
        vec!["first".to_string(), "second".to_string()]
    }

    fn sample(t: f64, first: f64, second: f64) -> Sample {
        let mut readings = HashMap::new();
        readings.insert("first".to_string(), first);
        readings.insert("second".to_string(), second);
        Sample {
            time: t,
            device_id: "dev".to_string(),
            channel_readings: readings,
        }
    }

    #[test]
    fn test_eviction_keeps_most_recent_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut buf = MultichannelBuffer::new(4, dir.path(), "dev", "imu", labels()).unwrap();

        for i in 0..10 {
            buf.add_sample(&sample(i as f64, i as f64 * 10.0, 0.0)).unwrap();
        }

        assert_eq!(buf.len(), 4);
        assert_eq!(buf.timestamps(), &[6.0, 7.0, 8.0, 9.0]);
        assert_eq!(buf.channel("first").unwrap(), &[60.0, 70.0, 80.0, 90.0]);
    }

    #[test]
    fn test_timestamps_nondecreasing_across_wrap() {
        let dir = tempfile::tempdir().unwrap();
        let mut buf = MultichannelBuffer::new(3, dir.path(), "dev", "imu", labels()).unwrap();

        for i in 0..7 {
            buf.add_sample(&sample(i as f64 * 0.01, 0.0, 0.0)).unwrap();
        }
        let ts = buf.timestamps();
        assert!(ts.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_csv_rows_match_samples() {
        let dir = tempfile::tempdir().unwrap();
        let mut buf = MultichannelBuffer::new(2, dir.path(), "wrist", "imu", labels()).unwrap();

        buf.add_sample(&sample(0.5, 1.0, 2.0)).unwrap();
        buf.add_sample(&sample(1.5, 3.0, -4.0)).unwrap();
        buf.add_sample(&sample(2.5, 5.0, 6.5)).unwrap();

        let content = std::fs::read_to_string(buf.log_path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        // every sample is logged, eviction only affects the window
        assert_eq!(
            lines,
            vec!["t,first,second", "0.5,1,2", "1.5,3,-4", "2.5,5,6.5"]
        );
        assert_eq!(buf.len(), 2);
    }

    #[test]
    fn test_missing_channel_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut buf = MultichannelBuffer::new(4, dir.path(), "dev", "imu", labels()).unwrap();

        let mut readings = HashMap::new();
        readings.insert("first".to_string(), 1.0);
        let bad = Sample {
            time: 0.0,
            device_id: "dev".to_string(),
            channel_readings: readings,
        };
        assert!(buf.add_sample(&bad).is_err());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_moving_average_tracks_window() {
        let dir = tempfile::tempdir().unwrap();
        let mut buf =
            AveragedMultichannelBuffer::new(8, dir.path(), "dev", "imu", labels()).unwrap();
        // capacity below the default points: window clamps to capacity
        assert_eq!(buf.window(), 8);

        for i in 0..4 {
            buf.add_sample(&sample(i as f64, (i + 1) as f64, 0.0)).unwrap();
        }
        let avg = buf.averaged_channel("first").unwrap();
        assert_eq!(avg.len(), 4);
        assert!((avg[0] - 1.0).abs() < 1e-12); // mean of [1]
        assert!((avg[3] - 2.5).abs() < 1e-12); // mean of [1,2,3,4]
    }

    #[test]
    fn test_buffer_bank_routes_by_device() {
        let dir = tempfile::tempdir().unwrap();
        let infos = vec![StreamInfo {
            device_id: "wrist".to_string(),
            input_kind: "imu".to_string(),
            channel_labels: vec![
                CH_PITCH.to_string(),
                CH_YAW.to_string(),
                CH_ROLL.to_string(),
                CH_BATTERY.to_string(),
            ],
        }];
        let mut bank = BufferBank::new(dir.path().to_path_buf(), 16, infos);

        let mut readings = HashMap::new();
        readings.insert(CH_PITCH.to_string(), 1.0);
        readings.insert(CH_YAW.to_string(), 2.0);
        readings.insert(CH_ROLL.to_string(), 3.0);
        readings.insert(CH_BATTERY.to_string(), 90.0);
        let s = Sample {
            time: 0.1,
            device_id: "wrist".to_string(),
            channel_readings: readings,
        };

        bank.ingest(&s).unwrap();
        bank.ingest(&s).unwrap();

        assert_eq!(bank.len(), 1);
        let buf = bank.get("wrist").unwrap();
        assert_eq!(buf.len(), 2);
        assert!(dir.path().join("imu_wrist.csv").exists());
    }

    #[test]
    fn test_subject_metadata_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let meta = SubjectMetadata {
            subject_id: "S003".to_string(),
            stim: true,
        };
        meta.to_disk(dir.path()).unwrap();

        let raw = std::fs::read_to_string(dir.path().join("meta.json")).unwrap();
        let parsed: SubjectMetadata = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed, meta);
    }

    #[test]
    fn test_session_dir_is_created_and_named() {
        let dir = tempfile::tempdir().unwrap();
        let savedir = session_dir(dir.path(), "precision").unwrap();
        assert!(savedir.is_dir());
        let name = savedir.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.ends_with("_precision"));
    }
}
