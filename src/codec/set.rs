//! EEGLAB SET reader.
//!
//! SET recordings are MAT-level-5 containers holding one `EEG` struct. This
//! reader understands the container subset those files use: the 128-byte
//! preamble, small and padded data elements, zlib-compressed elements, and
//! numeric / character / struct matrix classes. The waveform either sits
//! inline as a `nbchan x pnts` matrix or in a companion `.fdt` file of
//! little-endian f32 frames.
//!
//! Writing SET files is out of scope; conversions only ever leave this
//! format.

use std::collections::HashMap;
use std::fs;
use std::io::Read;

use camino::Utf8Path;
use flate2::read::ZlibDecoder;
use tracing::warn;

use super::RecordingCodec;
use crate::domain::RecordingFormat;
use crate::error::PipelineError;
use crate::recording::{Channel, Event, Recording, RecordingInfo};

pub struct SetCodec;

impl RecordingCodec for SetCodec {
    fn format(&self) -> RecordingFormat {
        RecordingFormat::Set
    }

    fn probe(&self, path: &Utf8Path) -> Result<RecordingInfo, PipelineError> {
        let eeg = load_eeg_struct(path)?;
        let (n_channels, n_samples, sample_rate) = header_fields(&eeg, path)?;
        Ok(RecordingInfo {
            n_channels,
            n_samples,
            sample_rate,
        })
    }

    fn read(&self, path: &Utf8Path) -> Result<Recording, PipelineError> {
        let eeg = load_eeg_struct(path)?;
        let (n_channels, n_samples, sample_rate) = header_fields(&eeg, path)?;

        let samples = load_samples(&eeg, path, n_channels, n_samples)?;
        let labels = channel_labels(&eeg, n_channels, path);

        let channels = labels
            .into_iter()
            .enumerate()
            .map(|(ch, label)| {
                let data = (0..n_samples)
                    .map(|t| samples[t * n_channels + ch])
                    .collect();
                Channel::new(label, data)
            })
            .collect();

        let events = load_events(&eeg, path);
        let mut recording = Recording::new(channels, sample_rate, events)?;
        let dropped = recording.retain_valid_events();
        if dropped > 0 {
            warn!(path = %path, dropped, "dropped events with out-of-range latencies");
        }
        Ok(recording)
    }

    fn write(&self, _recording: &Recording, _path: &Utf8Path) -> Result<(), PipelineError> {
        Err(PipelineError::UnsupportedWrite(RecordingFormat::Set))
    }
}

// ── MAT-5 container ───────────────────────────────────────────────────────

const MI_INT8: u32 = 1;
const MI_UINT8: u32 = 2;
const MI_INT16: u32 = 3;
const MI_UINT16: u32 = 4;
const MI_INT32: u32 = 5;
const MI_UINT32: u32 = 6;
const MI_SINGLE: u32 = 7;
const MI_DOUBLE: u32 = 9;
const MI_INT64: u32 = 12;
const MI_UINT64: u32 = 13;
const MI_MATRIX: u32 = 14;
const MI_COMPRESSED: u32 = 15;
const MI_UTF8: u32 = 16;

const MX_STRUCT: u8 = 2;
const MX_CHAR: u8 = 4;

#[derive(Debug, Clone)]
enum MatValue {
    Num { dims: Vec<usize>, data: Vec<f64> },
    Char(String),
    Struct(StructArray),
    Unsupported,
}

#[derive(Debug, Clone)]
struct StructArray {
    len: usize,
    fields: HashMap<String, Vec<MatValue>>,
}

impl StructArray {
    fn scalar(&self, field: &str) -> Option<f64> {
        match self.fields.get(field)?.first()? {
            MatValue::Num { data, .. } => data.first().copied(),
            _ => None,
        }
    }
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
    big_endian: bool,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8], big_endian: bool) -> Self {
        Self {
            buf,
            pos: 0,
            big_endian,
        }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], String> {
        if self.remaining() < n {
            return Err(format!("element truncated at offset {}", self.pos));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u32(&mut self) -> Result<u32, String> {
        let bytes: [u8; 4] = self.take(4)?.try_into().unwrap();
        Ok(if self.big_endian {
            u32::from_be_bytes(bytes)
        } else {
            u32::from_le_bytes(bytes)
        })
    }

    fn align8(&mut self) {
        let rem = self.pos % 8;
        if rem != 0 {
            self.pos = (self.pos + 8 - rem).min(self.buf.len());
        }
    }
}

/// One data element: type tag plus raw payload bytes.
struct Element<'a> {
    ty: u32,
    payload: &'a [u8],
}

fn read_element<'a>(cur: &mut Cursor<'a>) -> Result<Element<'a>, String> {
    let ty_field = cur.u32()?;
    if ty_field & 0xFFFF_0000 != 0 {
        // Small data element: byte count lives in the tag's upper half and
        // the payload is packed into the remaining 4 tag bytes.
        let size = (ty_field >> 16) as usize;
        let ty = ty_field & 0xFFFF;
        let packed = cur.take(4)?;
        if size > 4 {
            return Err(format!("small element with size {size}"));
        }
        return Ok(Element {
            ty,
            payload: &packed[..size],
        });
    }
    let size = cur.u32()? as usize;
    let payload = cur.take(size)?;
    if ty_field != MI_COMPRESSED {
        cur.align8();
    }
    Ok(Element { ty: ty_field, payload })
}

fn numeric_payload(element: &Element<'_>, big_endian: bool) -> Result<Vec<f64>, String> {
    let bytes = element.payload;
    macro_rules! convert {
        ($ty:ty, $width:expr) => {{
            bytes
                .chunks_exact($width)
                .map(|chunk| {
                    let arr: [u8; $width] = chunk.try_into().unwrap();
                    let value = if big_endian {
                        <$ty>::from_be_bytes(arr)
                    } else {
                        <$ty>::from_le_bytes(arr)
                    };
                    value as f64
                })
                .collect()
        }};
    }
    Ok(match element.ty {
        MI_INT8 => bytes.iter().map(|&b| b as i8 as f64).collect(),
        MI_UINT8 => bytes.iter().map(|&b| b as f64).collect(),
        MI_INT16 => convert!(i16, 2),
        MI_UINT16 => convert!(u16, 2),
        MI_INT32 => convert!(i32, 4),
        MI_UINT32 => convert!(u32, 4),
        MI_SINGLE => convert!(f32, 4),
        MI_DOUBLE => convert!(f64, 8),
        MI_INT64 => convert!(i64, 8),
        MI_UINT64 => convert!(u64, 8),
        other => return Err(format!("unexpected numeric element type {other}")),
    })
}

fn char_payload(element: &Element<'_>, big_endian: bool) -> Result<String, String> {
    match element.ty {
        MI_UTF8 => Ok(String::from_utf8_lossy(element.payload).into_owned()),
        MI_INT8 | MI_UINT8 => Ok(element
            .payload
            .iter()
            .map(|&b| b as char)
            .collect()),
        MI_UINT16 | MI_INT16 => {
            let chars: Result<String, _> = element
                .payload
                .chunks_exact(2)
                .map(|chunk| {
                    let arr: [u8; 2] = chunk.try_into().unwrap();
                    let code = if big_endian {
                        u16::from_be_bytes(arr)
                    } else {
                        u16::from_le_bytes(arr)
                    };
                    char::from_u32(code as u32).ok_or("invalid character code")
                })
                .collect();
            chars.map_err(|err| err.to_string())
        }
        other => Err(format!("unexpected character element type {other}")),
    }
}

fn parse_matrix(payload: &[u8], big_endian: bool) -> Result<(String, MatValue), String> {
    if payload.is_empty() {
        return Ok((String::new(), MatValue::Unsupported));
    }
    let mut cur = Cursor::new(payload, big_endian);

    let flags_el = read_element(&mut cur)?;
    if flags_el.ty != MI_UINT32 || flags_el.payload.len() < 4 {
        return Err("missing array flags".to_string());
    }
    let flags_word = {
        let arr: [u8; 4] = flags_el.payload[..4].try_into().unwrap();
        if big_endian {
            u32::from_be_bytes(arr)
        } else {
            u32::from_le_bytes(arr)
        }
    };
    let class = (flags_word & 0xFF) as u8;
    let complex = flags_word & 0x0800 != 0;

    let dims_el = read_element(&mut cur)?;
    let dims: Vec<usize> = numeric_payload(&dims_el, big_endian)?
        .into_iter()
        .map(|d| d.max(0.0) as usize)
        .collect();
    let n_elements: usize = dims.iter().product();

    let name_el = read_element(&mut cur)?;
    let name: String = name_el
        .payload
        .iter()
        .take_while(|&&b| b != 0)
        .map(|&b| b as char)
        .collect();

    let value = match class {
        MX_STRUCT => {
            let len_el = read_element(&mut cur)?;
            let field_len = numeric_payload(&len_el, big_endian)?
                .first()
                .copied()
                .unwrap_or(0.0) as usize;
            if field_len == 0 {
                return Ok((name, MatValue::Struct(StructArray {
                    len: n_elements,
                    fields: HashMap::new(),
                })));
            }
            let names_el = read_element(&mut cur)?;
            let field_names: Vec<String> = names_el
                .payload
                .chunks(field_len)
                .map(|chunk| {
                    chunk
                        .iter()
                        .take_while(|&&b| b != 0)
                        .map(|&b| b as char)
                        .collect()
                })
                .collect();

            let mut fields: HashMap<String, Vec<MatValue>> = field_names
                .iter()
                .map(|name| (name.clone(), Vec::with_capacity(n_elements)))
                .collect();
            for _ in 0..n_elements {
                for field_name in &field_names {
                    let field_el = read_element(&mut cur)?;
                    if field_el.ty != MI_MATRIX {
                        return Err(format!(
                            "struct field {field_name} is not a matrix element"
                        ));
                    }
                    let (_, value) = parse_matrix(field_el.payload, big_endian)?;
                    fields.get_mut(field_name).unwrap().push(value);
                }
            }
            MatValue::Struct(StructArray {
                len: n_elements,
                fields,
            })
        }
        MX_CHAR => {
            let data_el = read_element(&mut cur)?;
            MatValue::Char(char_payload(&data_el, big_endian)?)
        }
        6..=13 => {
            let data_el = read_element(&mut cur)?;
            let data = numeric_payload(&data_el, big_endian)?;
            if complex {
                // Imaginary part follows; EEG metadata is always real.
                let _ = read_element(&mut cur);
            }
            MatValue::Num { dims, data }
        }
        _ => MatValue::Unsupported,
    };
    Ok((name, value))
}

fn parse_variables(buf: &[u8], big_endian: bool) -> Result<Vec<(String, MatValue)>, String> {
    let mut cur = Cursor::new(buf, big_endian);
    let mut variables = Vec::new();
    while cur.remaining() >= 8 {
        let element = read_element(&mut cur)?;
        match element.ty {
            MI_MATRIX => variables.push(parse_matrix(element.payload, big_endian)?),
            MI_COMPRESSED => {
                let mut inflated = Vec::new();
                ZlibDecoder::new(element.payload)
                    .read_to_end(&mut inflated)
                    .map_err(|err| format!("zlib inflate failed: {err}"))?;
                let mut inner = Cursor::new(&inflated, big_endian);
                let inner_el = read_element(&mut inner)?;
                if inner_el.ty == MI_MATRIX {
                    variables.push(parse_matrix(inner_el.payload, big_endian)?);
                }
            }
            _ => {}
        }
    }
    Ok(variables)
}

// ── EEG struct extraction ─────────────────────────────────────────────────

fn read_error(path: &Utf8Path, reason: impl Into<String>) -> PipelineError {
    PipelineError::CodecRead {
        path: path.to_owned(),
        reason: reason.into(),
    }
}

fn load_eeg_struct(path: &Utf8Path) -> Result<StructArray, PipelineError> {
    let buf = fs::read(path.as_std_path()).map_err(|err| read_error(path, err.to_string()))?;
    if buf.len() < 132 {
        return Err(read_error(path, "file too short for a MAT container"));
    }
    let big_endian = match &buf[126..128] {
        b"IM" => false,
        b"MI" => true,
        _ => return Err(read_error(path, "missing MAT endianness marker")),
    };

    let variables =
        parse_variables(&buf[128..], big_endian).map_err(|reason| read_error(path, reason))?;

    let mut fallback = None;
    for (name, value) in variables {
        if let MatValue::Struct(eeg) = value {
            if name == "EEG" {
                return Ok(eeg);
            }
            if fallback.is_none() && eeg.fields.contains_key("srate") {
                fallback = Some(eeg);
            }
        }
    }
    fallback.ok_or_else(|| read_error(path, "no EEG struct variable found"))
}

fn header_fields(
    eeg: &StructArray,
    path: &Utf8Path,
) -> Result<(usize, usize, f64), PipelineError> {
    let n_channels = eeg
        .scalar("nbchan")
        .ok_or_else(|| read_error(path, "missing nbchan field"))? as usize;
    let n_samples = eeg
        .scalar("pnts")
        .ok_or_else(|| read_error(path, "missing pnts field"))? as usize;
    let sample_rate = eeg
        .scalar("srate")
        .ok_or_else(|| read_error(path, "missing srate field"))?;
    if let Some(trials) = eeg.scalar("trials") {
        if trials > 1.0 {
            return Err(read_error(path, "epoched recordings are not supported"));
        }
    }
    if sample_rate <= 0.0 {
        return Err(read_error(path, format!("invalid srate {sample_rate}")));
    }
    Ok((n_channels, n_samples, sample_rate))
}

/// Samples in frame order: `samples[t * n_channels + ch]`.
fn load_samples(
    eeg: &StructArray,
    path: &Utf8Path,
    n_channels: usize,
    n_samples: usize,
) -> Result<Vec<f64>, PipelineError> {
    let expected = n_channels * n_samples;
    let data_field = eeg.fields.get("data").and_then(|values| values.first());
    match data_field {
        Some(MatValue::Num { dims, data }) => {
            if dims.len() >= 2 && (dims[0] != n_channels || dims[1] != n_samples) {
                return Err(read_error(
                    path,
                    format!(
                        "data matrix is {}x{}, header says {n_channels}x{n_samples}",
                        dims[0], dims[1]
                    ),
                ));
            }
            if data.len() < expected {
                return Err(read_error(
                    path,
                    format!("data matrix holds {} values, expected {expected}", data.len()),
                ));
            }
            Ok(data[..expected].to_vec())
        }
        Some(MatValue::Char(name)) => load_fdt(path, name, expected),
        _ => {
            // Older exports record the companion file under `datfile`.
            if let Some(MatValue::Char(name)) =
                eeg.fields.get("datfile").and_then(|values| values.first())
            {
                return load_fdt(path, name, expected);
            }
            Err(read_error(path, "missing data field"))
        }
    }
}

fn load_fdt(
    set_path: &Utf8Path,
    stored_name: &str,
    expected: usize,
) -> Result<Vec<f64>, PipelineError> {
    // Only the basename is trusted; stored paths routinely point at the
    // machine the dataset was exported on.
    let basename = stored_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(stored_name);
    let fdt_path = set_path
        .parent()
        .map(|dir| dir.join(basename))
        .ok_or_else(|| read_error(set_path, "recording has no parent directory"))?;
    let bytes = fs::read(fdt_path.as_std_path())
        .map_err(|err| read_error(set_path, format!("companion file {fdt_path}: {err}")))?;
    if bytes.len() < expected * 4 {
        return Err(read_error(
            set_path,
            format!(
                "companion file {fdt_path} holds {} bytes, expected {}",
                bytes.len(),
                expected * 4
            ),
        ));
    }
    Ok(bytes
        .chunks_exact(4)
        .take(expected)
        .map(|chunk| f32::from_le_bytes(chunk.try_into().unwrap()) as f64)
        .collect())
}

fn channel_labels(eeg: &StructArray, n_channels: usize, path: &Utf8Path) -> Vec<String> {
    if let Some(MatValue::Struct(chanlocs)) =
        eeg.fields.get("chanlocs").and_then(|values| values.first())
    {
        if chanlocs.len == n_channels {
            if let Some(labels) = chanlocs.fields.get("labels") {
                return labels
                    .iter()
                    .enumerate()
                    .map(|(i, value)| match value {
                        MatValue::Char(label) if !label.trim().is_empty() => {
                            label.trim().to_string()
                        }
                        _ => format!("ch{:02}", i + 1),
                    })
                    .collect();
            }
        }
    }
    warn!(path = %path, "no usable channel locations, generating labels");
    (0..n_channels).map(|i| format!("ch{:02}", i + 1)).collect()
}

fn load_events(eeg: &StructArray, path: &Utf8Path) -> Vec<Event> {
    let Some(MatValue::Struct(events)) =
        eeg.fields.get("event").and_then(|values| values.first())
    else {
        return Vec::new();
    };

    let mut out = Vec::with_capacity(events.len);
    for index in 0..events.len {
        let latency = match events
            .fields
            .get("latency")
            .and_then(|values| values.get(index))
        {
            Some(MatValue::Num { data, .. }) if !data.is_empty() => data[0],
            _ => {
                warn!(path = %path, index, "event without latency skipped");
                continue;
            }
        };
        let duration = match events
            .fields
            .get("duration")
            .and_then(|values| values.get(index))
        {
            Some(MatValue::Num { data, .. }) if !data.is_empty() => data[0],
            _ => 0.0,
        };
        let label = match events.fields.get("type").and_then(|values| values.get(index)) {
            Some(MatValue::Char(label)) => label.trim().to_string(),
            Some(MatValue::Num { data, .. }) if !data.is_empty() => {
                if data[0].fract() == 0.0 {
                    format!("{}", data[0] as i64)
                } else {
                    format!("{}", data[0])
                }
            }
            _ => "n/a".to_string(),
        };
        out.push(Event {
            latency,
            duration,
            label,
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn write_is_rejected() {
        let recording = Recording::new(Vec::new(), 100.0, Vec::new()).unwrap();
        let err = SetCodec
            .write(&recording, Utf8Path::new("/tmp/out_eeg.set"))
            .unwrap_err();
        assert_matches!(err, PipelineError::UnsupportedWrite(RecordingFormat::Set));
    }

    #[test]
    fn short_file_is_a_codec_error() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("bad_eeg.set");
        fs::write(&path, b"not a MAT file").unwrap();
        let path = Utf8Path::from_path(&path).unwrap();
        let err = SetCodec.read(path).unwrap_err();
        assert_matches!(err, PipelineError::CodecRead { .. });
    }
}
