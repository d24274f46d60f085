//! Request parameters and their cache facets
//!
//! A parameter object carries everything a client may set for one request.
//! Each cache stage hashes only its facet: a typed projection containing the
//! fields that influence that stage and nothing else.
//!
//! | stage     | facet                                                    |
//! |-----------|----------------------------------------------------------|
//! | prefilter | `l_freq, h_freq, notch, resample_fs`                     |
//! | cleaned   | prefilter facet + every set `clean_*` threshold          |
//! | epochs    | cleaned facet + `tmin, tmax`                             |
//! | evoked    | epochs facet + `stimulus`                                |
//!
//! View-only fields (`channels`, `combine_channels`, `show_bad`, `uv_min`,
//! `uv_max`) belong to no facet.

use crate::channels::parse_channel_list;
use crate::{PipelineError, Result};
use eegflow_signal::{CleaningSettings, FilterSettings};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::path::Path;

/// Default channel selection (occipital cluster of the 128-channel net)
pub const DEFAULT_CHANNELS: &str = "69-76,81-83,88,89";

/// Filtering, cleaning and channel-view parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FilterParams {
    /// High-pass edge (Hz)
    pub l_freq: f64,
    /// Low-pass edge (Hz)
    pub h_freq: f64,
    /// Line-noise notch (Hz)
    pub notch: Option<f64>,
    /// Target sampling rate (Hz)
    pub resample_fs: f64,

    /// Channel list, e.g. `"69-76,81-83,88"`; empty selects E1..E128
    pub channels: String,
    /// Average the selected channels into one `combined` channel
    pub combine_channels: bool,
    /// Keep bad channels in the view
    pub show_bad: bool,
    /// Drop channels whose trace dips below this many µV
    pub uv_min: Option<f64>,
    /// Drop channels whose trace exceeds this many µV
    pub uv_max: Option<f64>,

    /// Flatline duration (s)
    pub clean_flatline_sec: Option<f64>,
    /// High-frequency noise z-score limit
    pub clean_hf_noise_sd_max: Option<f64>,
    /// Minimum correlation with the median trace
    pub clean_corr_min: Option<f64>,
    /// ASR cutoff (standard deviations)
    pub clean_asr_max_std: Option<f64>,
    /// Lower z bound of window power
    pub clean_power_min_sd: Option<f64>,
    /// Upper z bound of window power
    pub clean_power_max_sd: Option<f64>,
    /// Out-of-bound channel percentage that marks a window bad
    pub clean_max_outbound_pct: Option<f64>,
    /// Window length for the power and ASR detectors (s)
    pub clean_window_sec: Option<f64>,
    /// Annotate ASR windows instead of reconstructing them
    pub clean_asr_remove_only: bool,
}

impl Default for FilterParams {
    fn default() -> Self {
        Self {
            l_freq: 4.0,
            h_freq: 30.0,
            notch: None,
            resample_fs: 100.0,
            channels: DEFAULT_CHANNELS.to_string(),
            combine_channels: false,
            show_bad: false,
            uv_min: None,
            uv_max: None,
            clean_flatline_sec: None,
            clean_hf_noise_sd_max: None,
            clean_corr_min: None,
            clean_asr_max_std: None,
            clean_power_min_sd: None,
            clean_power_max_sd: None,
            clean_max_outbound_pct: None,
            clean_window_sec: None,
            clean_asr_remove_only: false,
        }
    }
}

/// Hash input of the prefilter stage
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilterFacet {
    /// High-pass edge
    pub l_freq: f64,
    /// Low-pass edge
    pub h_freq: f64,
    /// Notch; serialized as `null` when unset
    pub notch: Option<f64>,
    /// Target rate
    pub resample_fs: f64,
}

/// Hash input of the cleaned stage
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CleaningFacet {
    /// Prefilter fields
    #[serde(flatten)]
    pub filter: FilterFacet,
    #[serde(skip_serializing_if = "Option::is_none")]
    clean_flatline_sec: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    clean_hf_noise_sd_max: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    clean_corr_min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    clean_asr_max_std: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    clean_power_min_sd: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    clean_power_max_sd: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    clean_max_outbound_pct: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    clean_window_sec: Option<f64>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    clean_asr_remove_only: bool,
}

/// Hash input of the epochs stage
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EpochFacet {
    /// Cleaning fields
    #[serde(flatten)]
    pub cleaning: CleaningFacet,
    /// Window start (s)
    pub tmin: f64,
    /// Window end (s)
    pub tmax: f64,
}

/// Hash input of the evoked stage
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvokedFacet {
    /// Epoch fields
    #[serde(flatten)]
    pub epoch: EpochFacet,
    /// Condition; `null` averages every condition
    pub stimulus: Option<String>,
}

impl FilterParams {
    /// Field names accepted in parameter files
    pub const FIELDS: &'static [&'static str] = &[
        "l_freq",
        "h_freq",
        "notch",
        "resample_fs",
        "channels",
        "combine_channels",
        "show_bad",
        "uv_min",
        "uv_max",
        "clean_flatline_sec",
        "clean_hf_noise_sd_max",
        "clean_corr_min",
        "clean_asr_max_std",
        "clean_power_min_sd",
        "clean_power_max_sd",
        "clean_max_outbound_pct",
        "clean_window_sec",
        "clean_asr_remove_only",
    ];

    /// Prefilter facet
    #[must_use]
    pub fn filter_facet(&self) -> FilterFacet {
        FilterFacet {
            l_freq: self.l_freq,
            h_freq: self.h_freq,
            notch: self.notch,
            resample_fs: self.resample_fs,
        }
    }

    /// Cleaned facet: the prefilter facet plus every threshold that is set
    #[must_use]
    pub fn cleaning_facet(&self) -> CleaningFacet {
        CleaningFacet {
            filter: self.filter_facet(),
            clean_flatline_sec: self.clean_flatline_sec,
            clean_hf_noise_sd_max: self.clean_hf_noise_sd_max,
            clean_corr_min: self.clean_corr_min,
            clean_asr_max_std: self.clean_asr_max_std,
            clean_power_min_sd: self.clean_power_min_sd,
            clean_power_max_sd: self.clean_power_max_sd,
            clean_max_outbound_pct: self.clean_max_outbound_pct,
            clean_window_sec: self.clean_window_sec,
            clean_asr_remove_only: self.clean_asr_remove_only,
        }
    }

    /// Settings for the prefilter chain
    #[must_use]
    pub fn filter_settings(&self) -> FilterSettings {
        FilterSettings {
            l_freq: Some(self.l_freq),
            h_freq: Some(self.h_freq),
            notch: self.notch,
            resample_fs: Some(self.resample_fs),
        }
    }

    /// Settings for the marking detectors
    #[must_use]
    pub fn cleaning_settings(&self) -> CleaningSettings {
        CleaningSettings {
            flatline_sec: self.clean_flatline_sec,
            hf_noise_sd_max: self.clean_hf_noise_sd_max,
            corr_min: self.clean_corr_min,
            asr_max_std: self.clean_asr_max_std,
            asr_remove_only: self.clean_asr_remove_only,
            power_min_sd: self.clean_power_min_sd,
            power_max_sd: self.clean_power_max_sd,
            max_outbound_pct: self.clean_max_outbound_pct,
            window_sec: self.clean_window_sec,
        }
    }

    /// Channel names selected by [`Self::channels`]
    pub fn channel_names(&self) -> Result<Vec<String>> {
        parse_channel_list(&self.channels)
    }

    /// Reject values no stage could honour
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("l_freq", self.l_freq),
            ("h_freq", self.h_freq),
            ("resample_fs", self.resample_fs),
        ] {
            if !value.is_finite() {
                return Err(PipelineError::params(format!("{name} must be finite")));
            }
        }
        if self.l_freq > 0.0 && self.h_freq > 0.0 && self.l_freq >= self.h_freq {
            return Err(PipelineError::params(format!(
                "l_freq ({}) must be below h_freq ({})",
                self.l_freq, self.h_freq
            )));
        }
        if let (Some(lo), Some(hi)) = (self.uv_min, self.uv_max)
            && lo > hi
        {
            return Err(PipelineError::params(format!("uv_min ({lo}) exceeds uv_max ({hi})")));
        }
        self.channel_names().map(|_| ())
    }
}

/// Epoch window and condition selection on top of [`FilterParams`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EpochParams {
    /// Filtering and cleaning parameters
    #[serde(flatten)]
    pub filter: FilterParams,
    /// Window start relative to the event (s)
    pub tmin: f64,
    /// Window end relative to the event (s)
    pub tmax: f64,
    /// Keep only this condition; `None` (or `"None"`) keeps every condition
    #[serde(deserialize_with = "none_string")]
    pub stimulus: Option<String>,
}

impl Default for EpochParams {
    fn default() -> Self {
        Self {
            filter: FilterParams::default(),
            tmin: -2.0,
            tmax: 0.0,
            stimulus: None,
        }
    }
}

fn none_string<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Option<String>, D::Error> {
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.is_empty() && s != "None"))
}

impl EpochParams {
    /// Field names accepted in addition to [`FilterParams::FIELDS`]
    pub const FIELDS: &'static [&'static str] = &["tmin", "tmax", "stimulus"];

    /// Epochs facet
    #[must_use]
    pub fn epoch_facet(&self) -> EpochFacet {
        EpochFacet {
            cleaning: self.filter.cleaning_facet(),
            tmin: self.tmin,
            tmax: self.tmax,
        }
    }

    /// Evoked facet
    #[must_use]
    pub fn evoked_facet(&self) -> EvokedFacet {
        EvokedFacet {
            epoch: self.epoch_facet(),
            stimulus: self.stimulus.clone(),
        }
    }

    /// Same parameters with a different condition
    #[must_use]
    pub fn with_stimulus(mut self, stimulus: Option<&str>) -> Self {
        self.stimulus = stimulus.map(str::to_string);
        self
    }

    /// Reject values no stage could honour
    pub fn validate(&self) -> Result<()> {
        self.filter.validate()?;
        if !(self.tmin.is_finite() && self.tmax.is_finite()) || self.tmin > self.tmax {
            return Err(PipelineError::params(format!(
                "invalid epoch window [{}, {}]",
                self.tmin, self.tmax
            )));
        }
        Ok(())
    }
}

/// Averaging uses the epoch parameters unchanged; `stimulus` picks the condition
pub type EvokedParams = EpochParams;

/// Parameter objects that can be read from JSON or TOML files
pub trait ParamSet: DeserializeOwned {
    /// Every accepted top-level key
    fn accepted_fields() -> BTreeSet<&'static str>;

    /// Post-parse validation
    fn check(&self) -> Result<()>;

    /// Parse from a JSON value, rejecting unknown keys
    fn from_value(value: Value) -> Result<Self> {
        let Value::Object(map) = &value else {
            return Err(PipelineError::params("parameters must be a table/object"));
        };
        let accepted = Self::accepted_fields();
        let unknown: Vec<&str> = map
            .keys()
            .map(String::as_str)
            .filter(|k| !accepted.contains(k))
            .collect();
        if !unknown.is_empty() {
            return Err(PipelineError::params(format!(
                "unknown field(s): {}",
                unknown.join(", ")
            )));
        }
        let params: Self =
            serde_json::from_value(value).map_err(|e| PipelineError::params(e.to_string()))?;
        params.check()?;
        Ok(params)
    }

    /// Parse JSON text
    fn from_json(text: &str) -> Result<Self> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| PipelineError::params(e.to_string()))?;
        Self::from_value(value)
    }

    /// Parse TOML text
    fn from_toml(text: &str) -> Result<Self> {
        let value: Value = toml::from_str(text).map_err(|e| PipelineError::params(e.to_string()))?;
        Self::from_value(value)
    }

    /// Read a `.json` or `.toml` file (by extension)
    fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| PipelineError::io(e, path, "read parameters"))?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml(&text),
            Some("json") => Self::from_json(&text),
            other => Err(PipelineError::params(format!(
                "unsupported parameter file extension {other:?} (expected .json or .toml)"
            ))),
        }
    }
}

impl ParamSet for FilterParams {
    fn accepted_fields() -> BTreeSet<&'static str> {
        Self::FIELDS.iter().copied().collect()
    }

    fn check(&self) -> Result<()> {
        self.validate()
    }
}

impl ParamSet for EpochParams {
    fn accepted_fields() -> BTreeSet<&'static str> {
        FilterParams::FIELDS
            .iter()
            .chain(Self::FIELDS)
            .copied()
            .collect()
    }

    fn check(&self) -> Result<()> {
        self.validate()
    }
}
