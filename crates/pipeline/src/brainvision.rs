//! BrainVision recordings (`.vhdr` header + multiplexed binary `.eeg`)

use crate::{PipelineError, Result};
use eegflow_signal::{ChannelInfo, TimeSeriesBuffer};
use ndarray::Array2;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

/// Sample encoding of the binary file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryFormat {
    /// Little-endian IEEE 754 single precision
    Float32,
    /// Little-endian signed 16-bit integer
    Int16,
}

impl BinaryFormat {
    const fn width(self) -> usize {
        match self {
            Self::Float32 => 4,
            Self::Int16 => 2,
        }
    }
}

/// One `Ch<n>=` entry
#[derive(Debug, Clone, PartialEq)]
pub struct HeaderChannel {
    /// Channel label
    pub name: String,
    /// Scale applied to each stored value
    pub resolution: f64,
    /// Multiplier from the stored unit to volts
    pub to_volts: f64,
}

/// Parsed `.vhdr`
#[derive(Debug, Clone, PartialEq)]
pub struct Header {
    /// Binary file named by `DataFile`, resolved against the header directory
    pub data_file: PathBuf,
    /// Sampling rate in Hz
    pub sfreq: f64,
    /// Sample encoding
    pub format: BinaryFormat,
    /// Channels in storage order
    pub channels: Vec<HeaderChannel>,
}

fn unit_scale(unit: &str) -> f64 {
    match unit.trim().to_ascii_lowercase().as_str() {
        "v" => 1.0,
        "mv" => 1e-3,
        "nv" => 1e-9,
        // µV in any encoding, or no unit at all
        _ => 1e-6,
    }
}

/// Parse header text; `path` locates the binary file and labels errors
pub fn parse_header(text: &str, path: &Path) -> Result<Header> {
    let mut section = String::new();
    let mut data_file = None;
    let mut n_channels = None;
    let mut interval_us = None;
    let mut format = BinaryFormat::Float32;
    let mut orientation_ok = true;
    let mut channels: Vec<(usize, HeaderChannel)> = Vec::new();

    for line in text.lines().map(str::trim) {
        if line.is_empty() || line.starts_with(';') {
            continue;
        }
        if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            section = name.to_string();
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let (key, value) = (key.trim(), value.trim());
        match (section.as_str(), key) {
            ("Common Infos", "DataFile") => data_file = Some(value.to_string()),
            ("Common Infos", "NumberOfChannels") => n_channels = value.parse::<usize>().ok(),
            ("Common Infos", "SamplingInterval") => interval_us = value.parse::<f64>().ok(),
            ("Common Infos", "DataOrientation") => orientation_ok = value.eq_ignore_ascii_case("MULTIPLEXED"),
            ("Binary Infos", "BinaryFormat") => {
                format = match value {
                    "IEEE_FLOAT_32" => BinaryFormat::Float32,
                    "INT_16" => BinaryFormat::Int16,
                    other => {
                        return Err(PipelineError::format(path, format!("unsupported BinaryFormat {other}")));
                    }
                };
            }
            ("Channel Infos", key) if key.starts_with("Ch") => {
                let index: usize = key[2..]
                    .parse()
                    .map_err(|_| PipelineError::format(path, format!("bad channel key {key}")))?;
                let mut fields = value.split(',');
                let name = fields.next().unwrap_or_default().replace("\\1", ",");
                let _reference = fields.next();
                let resolution = fields
                    .next()
                    .map(str::trim)
                    .filter(|r| !r.is_empty())
                    .map_or(Ok(1.0), str::parse::<f64>)
                    .map_err(|_| PipelineError::format(path, format!("bad resolution for {name}")))?;
                let to_volts = unit_scale(fields.next().unwrap_or_default());
                channels.push((index, HeaderChannel { name, resolution, to_volts }));
            }
            _ => {}
        }
    }

    if !orientation_ok {
        return Err(PipelineError::format(path, "only MULTIPLEXED data is supported"));
    }
    let data_file = data_file.ok_or_else(|| PipelineError::format(path, "missing DataFile"))?;
    let interval_us = interval_us
        .filter(|v| v.is_finite() && *v > 0.0)
        .ok_or_else(|| PipelineError::format(path, "missing or invalid SamplingInterval"))?;
    channels.sort_by_key(|(i, _)| *i);
    let channels: Vec<HeaderChannel> = channels.into_iter().map(|(_, c)| c).collect();
    if let Some(n) = n_channels
        && n != channels.len()
    {
        return Err(PipelineError::format(
            path,
            format!("NumberOfChannels={n} but {} channel entries", channels.len()),
        ));
    }
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    Ok(Header {
        data_file: dir.join(data_file),
        sfreq: 1e6 / interval_us,
        format,
        channels,
    })
}

/// Samples in volts plus channel metadata, before any sidecar is applied
#[derive(Debug, Clone)]
pub struct Recording {
    /// `channels × samples`
    pub data: Array2<f64>,
    /// Sampling rate in Hz
    pub sfreq: f64,
    /// Channels in storage order, all EEG until a sidecar says otherwise
    pub channels: Vec<ChannelInfo>,
}

impl Recording {
    /// Wrap into a buffer
    pub fn into_buffer(self) -> Result<TimeSeriesBuffer> {
        Ok(TimeSeriesBuffer::new(self.data, self.sfreq, self.channels)?)
    }
}

/// Read a recording, scaling samples to volts
pub fn read(vhdr: &Path) -> Result<Recording> {
    let raw = fs::read(vhdr).map_err(|e| PipelineError::io(e, vhdr, "read header"))?;
    let header = parse_header(&String::from_utf8_lossy(&raw), vhdr)?;
    let bytes = fs::read(&header.data_file)
        .map_err(|e| PipelineError::io(e, &header.data_file, "read samples"))?;

    let n_channels = header.channels.len();
    let frame = n_channels * header.format.width();
    if frame == 0 || bytes.len() % frame != 0 {
        return Err(PipelineError::format(
            &header.data_file,
            format!("{} bytes is not a whole number of {frame}-byte frames", bytes.len()),
        ));
    }
    let n_samples = bytes.len() / frame;
    let scales: Vec<f64> = header.channels.iter().map(|c| c.resolution * c.to_volts).collect();

    let mut data = Array2::zeros((n_channels, n_samples));
    for (t, chunk) in bytes.chunks_exact(frame).enumerate() {
        for (c, value) in chunk.chunks_exact(header.format.width()).enumerate() {
            let stored = match header.format {
                BinaryFormat::Float32 => f64::from(f32::from_le_bytes([value[0], value[1], value[2], value[3]])),
                BinaryFormat::Int16 => f64::from(i16::from_le_bytes([value[0], value[1]])),
            };
            data[[c, t]] = stored * scales[c];
        }
    }

    let channels = header
        .channels
        .iter()
        .map(|c| ChannelInfo::eeg(c.name.clone()))
        .collect();
    tracing::debug!(
        file = %vhdr.display(),
        channels = n_channels,
        samples = n_samples,
        sfreq = header.sfreq,
        "[brainvision] loaded"
    );
    Ok(Recording {
        data,
        sfreq: header.sfreq,
        channels,
    })
}

/// Write `buffer` as float32 µV next to `vhdr` (`<stem>.eeg`)
pub fn write(buffer: &TimeSeriesBuffer, vhdr: &Path) -> Result<()> {
    let data_path = vhdr.with_extension("eeg");
    let data_name = data_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut header = String::from("Brain Vision Data Exchange Header File Version 1.0\n\n[Common Infos]\n");
    let _ = writeln!(header, "DataFile={data_name}");
    header.push_str("DataFormat=BINARY\nDataOrientation=MULTIPLEXED\n");
    let _ = writeln!(header, "NumberOfChannels={}", buffer.n_channels());
    let _ = writeln!(header, "SamplingInterval={}", 1e6 / buffer.sfreq());
    header.push_str("\n[Binary Infos]\nBinaryFormat=IEEE_FLOAT_32\n\n[Channel Infos]\n");
    for (i, name) in buffer.channel_names().iter().enumerate() {
        let _ = writeln!(header, "Ch{}={},,1,µV", i + 1, name.replace(',', "\\1"));
    }

    let mut bytes = Vec::with_capacity(buffer.n_channels() * buffer.n_samples() * 4);
    for column in buffer.data().columns() {
        for v in column {
            bytes.extend_from_slice(&((v * 1e6) as f32).to_le_bytes());
        }
    }
    fs::write(vhdr, header).map_err(|e| PipelineError::io(e, vhdr, "write header"))?;
    fs::write(&data_path, bytes).map_err(|e| PipelineError::io(e, &data_path, "write samples"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_then_read() {
        let dir = TempDir::new().unwrap();
        let vhdr = dir.path().join("rec_eeg.vhdr");
        let data = Array2::from_shape_fn((3, 50), |(c, t)| (c as f64 - 1.0) * 1e-6 * t as f64);
        let channels = ["E1", "E2", "Cz"].iter().map(|n| ChannelInfo::eeg(*n)).collect();
        let buffer = TimeSeriesBuffer::new(data.clone(), 500.0, channels).unwrap();

        write(&buffer, &vhdr).unwrap();
        let back = read(&vhdr).unwrap().into_buffer().unwrap();
        assert_eq!(back.channel_names(), vec!["E1", "E2", "Cz"]);
        assert!((back.sfreq() - 500.0).abs() < 1e-9);
        assert_eq!(back.n_samples(), 50);
        for (a, b) in back.data().iter().zip(data.iter()) {
            assert!((a - b).abs() < 1e-9);
        }
    }

    #[test]
    fn test_int16_with_resolution() {
        let dir = TempDir::new().unwrap();
        let vhdr = dir.path().join("r.vhdr");
        fs::write(
            &vhdr,
            "[Common Infos]\nDataFile=r.eeg\nNumberOfChannels=2\nSamplingInterval=4000\n\
             [Binary Infos]\nBinaryFormat=INT_16\n\
             [Channel Infos]\n; comment\nCh2=B,,0.5,mV\nCh1=A,,0.1,µV\n",
        )
        .unwrap();
        let samples: [i16; 4] = [10, -4, 20, 8];
        let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        fs::write(dir.path().join("r.eeg"), bytes).unwrap();

        let buf = read(&vhdr).unwrap().into_buffer().unwrap();
        assert!((buf.sfreq() - 250.0).abs() < 1e-9);
        assert_eq!(buf.channel_names(), vec!["A", "B"]);
        assert!((buf.data()[[0, 1]] - 2e-6).abs() < 1e-15);
        assert!((buf.data()[[1, 0]] + 2e-3).abs() < 1e-15);
    }

    #[test]
    fn test_header_errors() {
        let p = Path::new("x.vhdr");
        assert!(parse_header("[Common Infos]\nSamplingInterval=2000\n", p).is_err());
        assert!(parse_header("[Common Infos]\nDataFile=x.eeg\n", p).is_err());
        let err = parse_header(
            "[Common Infos]\nDataFile=x.eeg\nSamplingInterval=2000\n[Binary Infos]\nBinaryFormat=IEEE_FLOAT_64\n",
            p,
        )
        .unwrap_err();
        assert!(err.to_string().contains("IEEE_FLOAT_64"));
    }
}
