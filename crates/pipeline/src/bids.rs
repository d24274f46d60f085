//! File-based loader for BIDS-style EEG datasets
//!
//! Files for one recording live under `<root>/<subject>/eeg/` and share the
//! prefix `<subject>_task-<task>[_run-<run>]_`:
//!
//! | suffix           | content                                   |
//! |------------------|-------------------------------------------|
//! | `eeg.vhdr`       | BrainVision header (binary next to it)    |
//! | `events.tsv`     | event rows, also attached as annotations  |
//! | `channels.tsv`   | channel kinds and `status` (bad channels) |
//! | `electrodes.tsv` | electrode positions                       |
//! | `eeg.json`       | recording metadata                        |

use crate::brainvision;
use crate::loader::{EventTable, RawLoader, Table, TaskRequest};
use crate::{PipelineError, Result};
use eegflow_signal::{Annotation, ChannelKind, TimeSeriesBuffer};
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Reference electrode dropped from every recording
pub const REFERENCE_CHANNEL: &str = "Cz";

/// Reads one recording of a BIDS dataset
#[derive(Debug, Clone)]
pub struct BidsLoader {
    root: PathBuf,
    request: TaskRequest,
}

impl BidsLoader {
    /// Loader for `request` under dataset `root`
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, request: TaskRequest) -> Self {
        Self {
            root: root.into(),
            request,
        }
    }

    /// Dataset root
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the file with the given suffix, e.g. `events.tsv`
    #[must_use]
    pub fn path(&self, suffix: &str) -> PathBuf {
        let TaskRequest { subject, task, run } = &self.request;
        let mut name = format!("{subject}_task-{task}");
        if let Some(run) = run {
            name.push_str("_run-");
            name.push_str(run);
        }
        name.push('_');
        name.push_str(suffix);
        self.root.join(subject).join("eeg").join(name)
    }

    fn read_optional(&self, suffix: &str) -> Result<Option<String>> {
        let path = self.path(suffix);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!(file = %path.display(), "[bids] optional file absent");
                Ok(None)
            }
            Err(e) => Err(PipelineError::io(e, path, format!("read {suffix}"))),
        }
    }

    fn read_table(&self, suffix: &str) -> Result<Option<Table>> {
        Ok(self.read_optional(suffix)?.map(|text| Table::parse_tsv(&text)))
    }
}

/// Event rows as annotations; description from `value`, else `trial_type`
#[must_use]
pub fn event_annotations(events: &EventTable) -> Vec<Annotation> {
    (0..events.len())
        .filter_map(|row| {
            let onset = events.get_f64(row, "onset")?;
            let description = events
                .get(row, "value")
                .or_else(|| events.get(row, "trial_type"))?;
            let duration = events.get_f64(row, "duration").unwrap_or(0.0).max(0.0);
            Some(Annotation::new(onset, duration, description))
        })
        .collect()
}

impl RawLoader for BidsLoader {
    #[tracing::instrument(skip_all, fields(request = %self.request))]
    fn load_raw(&self) -> Result<TimeSeriesBuffer> {
        let mut recording = brainvision::read(&self.path("eeg.vhdr"))?;

        let channels_table = self.load_channels()?;
        let mut bads = Vec::new();
        if let Some(table) = &channels_table {
            let rows: HashMap<&str, usize> = (0..table.len())
                .filter_map(|r| table.get(r, "name").map(|n| (n, r)))
                .collect();
            for channel in &mut recording.channels {
                let Some(&row) = rows.get(channel.name.as_str()) else {
                    continue;
                };
                if let Some(kind) = table.get(row, "type") {
                    channel.kind = ChannelKind::from_bids(kind);
                }
                if table.get(row, "status").is_some_and(|s| s.eq_ignore_ascii_case("bad")) {
                    bads.push(channel.name.clone());
                }
            }
        }

        let mut buffer = recording
            .into_buffer()?
            .drop_channels(&[REFERENCE_CHANNEL]);
        bads.retain(|b| b != REFERENCE_CHANNEL);
        buffer.mark_bad(bads)?;

        if let Some(electrodes) = self.load_electrodes()? {
            let positions: Vec<(&str, [f64; 3])> = (0..electrodes.len())
                .filter_map(|r| {
                    Some((
                        electrodes.get(r, "name")?,
                        [
                            electrodes.get_f64(r, "x")?,
                            electrodes.get_f64(r, "y")?,
                            electrodes.get_f64(r, "z")?,
                        ],
                    ))
                })
                .collect();
            buffer.set_positions(positions);
        }

        if let Some(events) = self.load_events()? {
            buffer.annotate(event_annotations(&events));
        }

        tracing::info!(
            channels = buffer.n_channels(),
            samples = buffer.n_samples(),
            sfreq = buffer.sfreq(),
            bads = ?buffer.bads(),
            annotations = buffer.annotations().len(),
            "[bids] raw loaded"
        );
        Ok(buffer)
    }

    fn load_events(&self) -> Result<Option<EventTable>> {
        self.read_table("events.tsv")
    }

    fn load_channels(&self) -> Result<Option<Table>> {
        self.read_table("channels.tsv")
    }

    fn load_electrodes(&self) -> Result<Option<Table>> {
        self.read_table("electrodes.tsv")
    }

    fn load_metadata(&self) -> Result<Value> {
        let path = self.path("eeg.json");
        match self.read_optional("eeg.json")? {
            Some(text) => serde_json::from_str(&text)
                .map_err(|e| PipelineError::format(path, e.to_string())),
            None => Ok(Value::Object(serde_json::Map::new())),
        }
    }
}
