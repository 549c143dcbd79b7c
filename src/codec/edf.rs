//! EDF (16-bit) and BDF (24-bit) container codec.
//!
//! Layout per the published specification (https://www.edfplus.info/specs):
//! a 256-byte fixed-field ASCII header, one 256-byte header block per
//! signal, then fixed-point data records. BDF differs only in its magic
//! bytes, its `24BIT` reserved marker and 3-byte little-endian samples.

use std::fs::{self, File};
use std::io::{BufReader, Read};

use camino::Utf8Path;
use tracing::warn;

use super::RecordingCodec;
use crate::domain::RecordingFormat;
use crate::error::PipelineError;
use crate::recording::{Channel, Recording, RecordingInfo};

pub struct EdfCodec {
    format: RecordingFormat,
}

impl EdfCodec {
    pub fn edf() -> Self {
        Self {
            format: RecordingFormat::Edf,
        }
    }

    pub fn bdf() -> Self {
        Self {
            format: RecordingFormat::Bdf,
        }
    }

    fn bytes_per_sample(&self) -> usize {
        match self.format {
            RecordingFormat::Bdf => 3,
            _ => 2,
        }
    }
}

struct SignalHeader {
    label: String,
    unit: String,
    physical_min: f64,
    physical_max: f64,
    digital_min: i64,
    digital_max: i64,
    samples_per_record: usize,
}

impl SignalHeader {
    fn gain(&self) -> f64 {
        (self.physical_max - self.physical_min) / (self.digital_max - self.digital_min) as f64
    }

    fn is_annotations(&self) -> bool {
        self.label == "EDF Annotations" || self.label == "BDF Annotations"
    }
}

struct Header {
    n_records: i64,
    record_duration: f64,
    signals: Vec<SignalHeader>,
}

impl RecordingCodec for EdfCodec {
    fn format(&self) -> RecordingFormat {
        self.format
    }

    fn probe(&self, path: &Utf8Path) -> Result<RecordingInfo, PipelineError> {
        let mut reader = open(path)?;
        let header = read_header(&mut reader, self.format, path)?;
        let waveform: Vec<&SignalHeader> = header
            .signals
            .iter()
            .filter(|signal| !signal.is_annotations())
            .collect();
        let samples_per_record = waveform
            .first()
            .map(|signal| signal.samples_per_record)
            .unwrap_or(0);
        Ok(RecordingInfo {
            n_channels: waveform.len(),
            n_samples: samples_per_record * header.n_records.max(0) as usize,
            sample_rate: samples_per_record as f64 / header.record_duration,
        })
    }

    fn read(&self, path: &Utf8Path) -> Result<Recording, PipelineError> {
        let mut reader = open(path)?;
        let header = read_header(&mut reader, self.format, path)?;
        let n_records = header.n_records.max(0) as usize;
        let bytes_per_sample = self.bytes_per_sample();

        let spr = header
            .signals
            .iter()
            .find(|signal| !signal.is_annotations())
            .map(|signal| signal.samples_per_record)
            .unwrap_or(0);
        if header
            .signals
            .iter()
            .any(|signal| !signal.is_annotations() && signal.samples_per_record != spr)
        {
            return Err(PipelineError::CodecRead {
                path: path.to_owned(),
                reason: "mixed per-signal sampling rates are not supported".to_string(),
            });
        }

        let mut channels: Vec<Channel> = header
            .signals
            .iter()
            .filter(|signal| !signal.is_annotations())
            .map(|signal| Channel {
                label: signal.label.clone(),
                unit: signal.unit.clone(),
                data: Vec::with_capacity(spr * n_records),
            })
            .collect();

        let mut record = Vec::new();
        for _ in 0..n_records {
            let mut channel_idx = 0;
            for signal in &header.signals {
                record.resize(signal.samples_per_record * bytes_per_sample, 0u8);
                reader.read_exact(&mut record).map_err(|err| {
                    PipelineError::CodecRead {
                        path: path.to_owned(),
                        reason: format!("truncated data record: {err}"),
                    }
                })?;
                if signal.is_annotations() {
                    continue;
                }
                let gain = signal.gain();
                let data = &mut channels[channel_idx].data;
                for sample in record.chunks_exact(bytes_per_sample) {
                    let digital = match self.format {
                        RecordingFormat::Bdf => decode_i24(sample),
                        _ => i16::from_le_bytes([sample[0], sample[1]]) as i64,
                    };
                    data.push(gain * (digital - signal.digital_min) as f64 + signal.physical_min);
                }
                channel_idx += 1;
            }
        }

        let sample_rate = spr as f64 / header.record_duration;
        Recording::new(channels, sample_rate, Vec::new())
    }

    fn write(&self, recording: &Recording, path: &Utf8Path) -> Result<(), PipelineError> {
        let (dmin, dmax) = self
            .format
            .digital_range()
            .ok_or(PipelineError::UnsupportedWrite(self.format))?;
        let (dmin, dmax) = (dmin as i64, dmax as i64);

        let n_samples = recording.n_samples();
        let (spr, n_records, record_duration) = record_layout(recording);

        // Per-channel scale spanning the observed amplitude range, so the
        // full digital range is used without clipping. Samples are
        // quantized against the header-rendered bounds, not the raw ones,
        // so reading applies exactly the gain the writer used.
        let scales: Vec<(f64, f64)> = recording
            .channels
            .iter()
            .map(|channel| {
                let (pmin, pmax) = amplitude_span(&channel.data);
                let pmin = ascii_number(pmin).parse().unwrap_or(pmin);
                let pmax = ascii_number(pmax).parse().unwrap_or(pmax);
                if pmax - pmin < f64::EPSILON {
                    (pmin - 1.0, pmax + 1.0)
                } else {
                    (pmin, pmax)
                }
            })
            .collect();

        let mut buf = Vec::with_capacity(
            256 * (recording.n_channels() + 1)
                + n_samples * recording.n_channels() * self.bytes_per_sample(),
        );
        match self.format {
            RecordingFormat::Bdf => {
                buf.push(0xFF);
                push_field(&mut buf, "BIOSEMI", 7);
            }
            _ => push_field(&mut buf, "0", 8),
        }
        push_field(&mut buf, "", 80); // patient identification
        push_field(&mut buf, "", 80); // recording identification
        push_field(&mut buf, "01.01.00", 8);
        push_field(&mut buf, "00.00.00", 8);
        push_field(
            &mut buf,
            &(256 * (recording.n_channels() + 1)).to_string(),
            8,
        );
        let reserved = match self.format {
            RecordingFormat::Bdf => "24BIT",
            _ => "",
        };
        push_field(&mut buf, reserved, 44);
        push_field(&mut buf, &n_records.to_string(), 8);
        push_field(&mut buf, &ascii_number(record_duration), 8);
        push_field(&mut buf, &recording.n_channels().to_string(), 4);

        for channel in &recording.channels {
            push_field(&mut buf, &channel.label, 16);
        }
        for _ in &recording.channels {
            push_field(&mut buf, "", 80); // transducer type
        }
        for channel in &recording.channels {
            push_field(&mut buf, &channel.unit, 8);
        }
        for (pmin, _) in &scales {
            push_field(&mut buf, &ascii_number(*pmin), 8);
        }
        for (_, pmax) in &scales {
            push_field(&mut buf, &ascii_number(*pmax), 8);
        }
        for _ in &recording.channels {
            push_field(&mut buf, &dmin.to_string(), 8);
        }
        for _ in &recording.channels {
            push_field(&mut buf, &dmax.to_string(), 8);
        }
        for _ in &recording.channels {
            push_field(&mut buf, "", 80); // prefiltering
        }
        for _ in &recording.channels {
            push_field(&mut buf, &spr.to_string(), 8);
        }
        for _ in &recording.channels {
            push_field(&mut buf, "", 32); // reserved
        }

        let digital_span = (dmax - dmin) as f64;
        for record in 0..n_records {
            let start = record * spr;
            for (channel, (pmin, pmax)) in recording.channels.iter().zip(&scales) {
                for &value in &channel.data[start..start + spr] {
                    let scaled = (value - pmin) / (pmax - pmin) * digital_span;
                    let digital = (scaled.round() as i64 + dmin).clamp(dmin, dmax);
                    match self.format {
                        RecordingFormat::Bdf => {
                            let raw = digital as i32;
                            buf.extend_from_slice(&raw.to_le_bytes()[..3]);
                        }
                        _ => buf.extend_from_slice(&(digital as i16).to_le_bytes()),
                    }
                }
            }
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent.as_std_path())
                .map_err(|err| PipelineError::Filesystem(format!("create {parent}: {err}")))?;
        }
        fs::write(path.as_std_path(), &buf).map_err(|err| PipelineError::CodecWrite {
            path: path.to_owned(),
            reason: err.to_string(),
        })?;

        if !recording.events.is_empty() {
            // Event tables travel as BIDS TSV sidecars, not as in-band
            // annotation signals.
            warn!(path = %path, events = recording.events.len(), "events not embedded in interchange file");
        }
        Ok(())
    }
}

/// One-second records where the rate divides the signal evenly; otherwise a
/// single record holding the whole signal.
fn record_layout(recording: &Recording) -> (usize, usize, f64) {
    let n_samples = recording.n_samples();
    let rate = recording.sample_rate;
    let integral = rate.fract().abs() < f64::EPSILON && rate >= 1.0;
    if integral && n_samples > 0 && n_samples % rate as usize == 0 {
        let spr = rate as usize;
        (spr, n_samples / spr, 1.0)
    } else {
        (n_samples, 1, n_samples as f64 / rate)
    }
}

fn amplitude_span(data: &[f64]) -> (f64, f64) {
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for &value in data {
        min = min.min(value);
        max = max.max(value);
    }
    if !(min.is_finite() && max.is_finite()) {
        return (-1.0, 1.0);
    }
    if max - min < f64::EPSILON {
        // Flat channel: widen to a unit span so the gain stays finite.
        return (min - 1.0, max + 1.0);
    }
    (min, max)
}

fn push_field(buf: &mut Vec<u8>, value: &str, width: usize) {
    let bytes = value.as_bytes();
    let take = bytes.len().min(width);
    buf.extend_from_slice(&bytes[..take]);
    buf.resize(buf.len() + width - take, b' ');
}

/// Render a number into at most 8 ASCII characters, shrinking precision
/// until it fits.
fn ascii_number(value: f64) -> String {
    if value == value.trunc() && value.abs() < 1e8 {
        return format!("{}", value as i64);
    }
    for precision in (0..=6).rev() {
        let rendered = format!("{value:.precision$}");
        if rendered.len() <= 8 {
            return rendered;
        }
    }
    format!("{value:.1e}")
}

fn decode_i24(bytes: &[u8]) -> i64 {
    let mut raw = (bytes[0] as i32) | ((bytes[1] as i32) << 8) | ((bytes[2] as i32) << 16);
    if bytes[2] & 0x80 != 0 {
        raw |= !0x00FF_FFFF;
    }
    raw as i64
}

fn open(path: &Utf8Path) -> Result<BufReader<File>, PipelineError> {
    let file = File::open(path.as_std_path()).map_err(|err| PipelineError::CodecRead {
        path: path.to_owned(),
        reason: err.to_string(),
    })?;
    Ok(BufReader::new(file))
}

fn read_field<R: Read>(
    reader: &mut R,
    width: usize,
    path: &Utf8Path,
) -> Result<String, PipelineError> {
    let mut buf = vec![0u8; width];
    reader
        .read_exact(&mut buf)
        .map_err(|err| PipelineError::CodecRead {
            path: path.to_owned(),
            reason: format!("truncated header: {err}"),
        })?;
    Ok(String::from_utf8_lossy(&buf).trim().to_string())
}

fn parse_field<T: std::str::FromStr>(
    value: String,
    what: &str,
    path: &Utf8Path,
) -> Result<T, PipelineError> {
    value.parse().map_err(|_| PipelineError::CodecRead {
        path: path.to_owned(),
        reason: format!("invalid {what} field {value:?}"),
    })
}

fn read_header<R: Read>(
    reader: &mut R,
    format: RecordingFormat,
    path: &Utf8Path,
) -> Result<Header, PipelineError> {
    let mut magic = [0u8; 8];
    reader
        .read_exact(&mut magic)
        .map_err(|err| PipelineError::CodecRead {
            path: path.to_owned(),
            reason: format!("truncated header: {err}"),
        })?;
    let magic_ok = match format {
        RecordingFormat::Bdf => magic[0] == 0xFF && &magic[1..] == b"BIOSEMI",
        _ => magic[0] == b'0',
    };
    if !magic_ok {
        return Err(PipelineError::CodecRead {
            path: path.to_owned(),
            reason: format!("not a {} file", format.label()),
        });
    }

    let _patient = read_field(reader, 80, path)?;
    let _recording = read_field(reader, 80, path)?;
    let _start_date = read_field(reader, 8, path)?;
    let _start_time = read_field(reader, 8, path)?;
    let _header_bytes: usize = parse_field(read_field(reader, 8, path)?, "header size", path)?;
    let _reserved = read_field(reader, 44, path)?;
    let n_records: i64 = parse_field(read_field(reader, 8, path)?, "record count", path)?;
    let record_duration: f64 =
        parse_field(read_field(reader, 8, path)?, "record duration", path)?;
    let n_signals: usize = parse_field(read_field(reader, 4, path)?, "signal count", path)?;
    if record_duration <= 0.0 {
        return Err(PipelineError::CodecRead {
            path: path.to_owned(),
            reason: format!("non-positive record duration {record_duration}"),
        });
    }

    // Signal headers are stored field-by-field across all signals.
    let mut labels = Vec::with_capacity(n_signals);
    for _ in 0..n_signals {
        labels.push(read_field(reader, 16, path)?);
    }
    for _ in 0..n_signals {
        read_field(reader, 80, path)?; // transducer type
    }
    let mut units = Vec::with_capacity(n_signals);
    for _ in 0..n_signals {
        units.push(read_field(reader, 8, path)?);
    }
    let mut physical_mins = Vec::with_capacity(n_signals);
    for _ in 0..n_signals {
        physical_mins.push(parse_field(
            read_field(reader, 8, path)?,
            "physical minimum",
            path,
        )?);
    }
    let mut physical_maxs = Vec::with_capacity(n_signals);
    for _ in 0..n_signals {
        physical_maxs.push(parse_field(
            read_field(reader, 8, path)?,
            "physical maximum",
            path,
        )?);
    }
    let mut digital_mins = Vec::with_capacity(n_signals);
    for _ in 0..n_signals {
        digital_mins.push(parse_field(
            read_field(reader, 8, path)?,
            "digital minimum",
            path,
        )?);
    }
    let mut digital_maxs = Vec::with_capacity(n_signals);
    for _ in 0..n_signals {
        digital_maxs.push(parse_field(
            read_field(reader, 8, path)?,
            "digital maximum",
            path,
        )?);
    }
    for _ in 0..n_signals {
        read_field(reader, 80, path)?; // prefiltering
    }
    let mut samples_per_record = Vec::with_capacity(n_signals);
    for _ in 0..n_signals {
        samples_per_record.push(parse_field(
            read_field(reader, 8, path)?,
            "samples per record",
            path,
        )?);
    }
    for _ in 0..n_signals {
        read_field(reader, 32, path)?; // reserved
    }

    let signals = (0..n_signals)
        .map(|i| SignalHeader {
            label: labels[i].clone(),
            unit: units[i].clone(),
            physical_min: physical_mins[i],
            physical_max: physical_maxs[i],
            digital_min: digital_mins[i],
            digital_max: digital_maxs[i],
            samples_per_record: samples_per_record[i],
        })
        .collect();

    Ok(Header {
        n_records,
        record_duration,
        signals,
    })
}
