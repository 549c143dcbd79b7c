#![allow(dead_code)]

//! Shared fixtures: synthetic EEGLAB SET containers and small BIDS trees.

use std::fs;
use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use flate2::write::ZlibEncoder;
use flate2::Compression;

pub struct SetFixture {
    pub labels: Vec<String>,
    /// Channel-major samples: `data[ch][t]`.
    pub data: Vec<Vec<f64>>,
    pub sample_rate: f64,
    /// `(label, latency_in_samples, duration_in_samples)`.
    pub events: Vec<(String, f64, f64)>,
    /// Store the waveform in a companion `.fdt` file instead of inline.
    pub companion_fdt: bool,
    /// Wrap the EEG struct in a zlib-compressed element.
    pub compressed: bool,
}

impl SetFixture {
    pub fn sine(n_channels: usize, n_samples: usize, sample_rate: f64) -> Self {
        let labels = (0..n_channels).map(|ch| format!("E{}", ch + 1)).collect();
        let data = (0..n_channels)
            .map(|ch| {
                (0..n_samples)
                    .map(|i| {
                        let t = i as f64 / sample_rate;
                        75.0 * (2.0 * std::f64::consts::PI * (6.0 + ch as f64) * t).sin()
                    })
                    .collect()
            })
            .collect();
        Self {
            labels,
            data,
            sample_rate,
            events: Vec::new(),
            companion_fdt: false,
            compressed: false,
        }
    }

    pub fn with_event(mut self, label: &str, latency: f64, duration: f64) -> Self {
        self.events.push((label.to_string(), latency, duration));
        self
    }

    pub fn n_channels(&self) -> usize {
        self.data.len()
    }

    pub fn n_samples(&self) -> usize {
        self.data.first().map(|ch| ch.len()).unwrap_or(0)
    }

    /// Write the `.set` container (and `.fdt` companion when requested).
    pub fn write(&self, path: &Utf8Path) {
        fs::create_dir_all(path.parent().unwrap().as_std_path()).unwrap();
        let n_channels = self.n_channels();
        let n_samples = self.n_samples();

        let data_field = if self.companion_fdt {
            let fdt_name = format!("{}.fdt", path.file_stem().unwrap());
            let mut bytes = Vec::with_capacity(n_channels * n_samples * 4);
            for t in 0..n_samples {
                for ch in 0..n_channels {
                    bytes.extend_from_slice(&(self.data[ch][t] as f32).to_le_bytes());
                }
            }
            fs::write(path.parent().unwrap().join(&fdt_name).as_std_path(), bytes).unwrap();
            char_matrix("data", &fdt_name)
        } else {
            let mut column_major = Vec::with_capacity(n_channels * n_samples);
            for t in 0..n_samples {
                for ch in 0..n_channels {
                    column_major.push(self.data[ch][t]);
                }
            }
            num_matrix("data", &[n_channels as i32, n_samples as i32], &column_major)
        };

        let chanlocs = struct_matrix(
            "chanlocs",
            self.labels.len(),
            &["labels"],
            self.labels
                .iter()
                .map(|label| vec![char_matrix("", label)])
                .collect(),
        );
        let event = struct_matrix(
            "event",
            self.events.len(),
            &["type", "latency", "duration"],
            self.events
                .iter()
                .map(|(label, latency, duration)| {
                    vec![
                        char_matrix("", label),
                        num_scalar("", *latency),
                        num_scalar("", *duration),
                    ]
                })
                .collect(),
        );

        let eeg = struct_matrix(
            "EEG",
            1,
            &[
                "nbchan", "srate", "pnts", "trials", "data", "chanlocs", "event",
            ],
            vec![vec![
                num_scalar("", n_channels as f64),
                num_scalar("", self.sample_rate),
                num_scalar("", n_samples as f64),
                num_scalar("", 1.0),
                data_field,
                chanlocs,
                event,
            ]],
        );

        let mut file = mat_header();
        if self.compressed {
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&eeg).unwrap();
            let deflated = encoder.finish().unwrap();
            file.extend_from_slice(&15u32.to_le_bytes());
            file.extend_from_slice(&(deflated.len() as u32).to_le_bytes());
            file.extend_from_slice(&deflated);
        } else {
            file.extend_from_slice(&eeg);
        }
        fs::write(path.as_std_path(), file).unwrap();
    }
}

fn mat_header() -> Vec<u8> {
    let mut header = Vec::with_capacity(128);
    header.extend_from_slice(b"MATLAB 5.0 MAT-file, test fixture");
    header.resize(116, b' ');
    header.resize(124, 0); // subsystem offset
    header.extend_from_slice(&0x0100u16.to_le_bytes());
    header.extend_from_slice(b"IM");
    header
}

/// Tagged data element, padded to the 8-byte boundary.
fn element(ty: u32, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + payload.len() + 7);
    out.extend_from_slice(&ty.to_le_bytes());
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(payload);
    while out.len() % 8 != 0 {
        out.push(0);
    }
    out
}

fn matrix(class: u8, dims: &[i32], name: &str, tail: Vec<Vec<u8>>) -> Vec<u8> {
    let mut payload = Vec::new();
    let mut flags = Vec::with_capacity(8);
    flags.extend_from_slice(&(class as u32).to_le_bytes());
    flags.extend_from_slice(&0u32.to_le_bytes());
    payload.extend(element(6, &flags));
    let mut dim_bytes = Vec::new();
    for dim in dims {
        dim_bytes.extend_from_slice(&dim.to_le_bytes());
    }
    payload.extend(element(5, &dim_bytes));
    payload.extend(element(1, name.as_bytes()));
    for part in tail {
        payload.extend(part);
    }
    element(14, &payload)
}

fn num_matrix(name: &str, dims: &[i32], data: &[f64]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(data.len() * 8);
    for value in data {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    matrix(6, dims, name, vec![element(9, &bytes)])
}

fn num_scalar(name: &str, value: f64) -> Vec<u8> {
    num_matrix(name, &[1, 1], &[value])
}

fn char_matrix(name: &str, value: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(value.len() * 2);
    for code in value.encode_utf16() {
        bytes.extend_from_slice(&code.to_le_bytes());
    }
    matrix(
        4,
        &[1, value.encode_utf16().count() as i32],
        name,
        vec![element(4, &bytes)],
    )
}

fn struct_matrix(
    name: &str,
    len: usize,
    field_names: &[&str],
    per_element_fields: Vec<Vec<Vec<u8>>>,
) -> Vec<u8> {
    assert_eq!(per_element_fields.len(), len);
    let mut tail = Vec::new();
    tail.push(element(5, &32i32.to_le_bytes()));
    let mut names = Vec::with_capacity(field_names.len() * 32);
    for field in field_names {
        let mut padded = field.as_bytes().to_vec();
        assert!(padded.len() < 32);
        padded.resize(32, 0);
        names.extend_from_slice(&padded);
    }
    tail.push(element(1, &names));
    for fields in per_element_fields {
        assert_eq!(fields.len(), field_names.len());
        for field in fields {
            tail.push(field);
        }
    }
    matrix(2, &[1, len as i32], name, tail)
}

// ── BIDS tree fixtures ────────────────────────────────────────────────────

pub fn utf8(path: &std::path::Path) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(path.to_path_buf()).unwrap()
}

pub struct TreeFixture {
    pub root: Utf8PathBuf,
    pub subjects: Vec<String>,
}

impl TreeFixture {
    /// A small source dataset: `n_subjects` recordings of 4 channels at
    /// 500 Hz for 10 s, with sidecars, events tables and dataset-level
    /// files. The first subject carries one event beyond the recording end.
    pub fn source_dataset(root: Utf8PathBuf, n_subjects: usize) -> Self {
        let subjects: Vec<String> = (1..=n_subjects).map(|i| format!("{i:02}")).collect();
        for (index, subject) in subjects.iter().enumerate() {
            let eeg_dir = root.join(format!("sub-{subject}/eeg"));
            let stem = format!("sub-{subject}_task-rest");

            let mut fixture = SetFixture::sine(4, 5000, 500.0)
                .with_event("start", 1.0, 0.0)
                .with_event("stim", 1000.0, 50.0);
            if index == 0 {
                fixture = fixture.with_event("late", 6000.0, 0.0);
            }
            fixture.write(&eeg_dir.join(format!("{stem}_eeg.set")));

            fs::create_dir_all(eeg_dir.as_std_path()).unwrap();
            fs::write(
                eeg_dir.join(format!("{stem}_eeg.json")).as_std_path(),
                r#"{"SamplingFrequency": 500, "TaskName": "rest", "EEGReference": "Cz"}"#,
            )
            .unwrap();

            let mut events = String::from("onset\tduration\tsample\tvalue\n");
            events.push_str("0.0\t0.0\t1\tstart\n");
            events.push_str("1.998\t0.1\t1000\tstim\n");
            if index == 0 {
                events.push_str("11.998\t0.0\t6000\tlate\n");
            }
            fs::write(
                eeg_dir.join(format!("{stem}_events.tsv")).as_std_path(),
                events,
            )
            .unwrap();
        }

        fs::write(
            root.join("dataset_description.json").as_std_path(),
            r#"{"Name": "Test EEG Dataset", "BIDSVersion": "1.9.0"}"#,
        )
        .unwrap();
        let mut participants = String::from("participant_id\n");
        for subject in &subjects {
            participants.push_str(&format!("sub-{subject}\n"));
        }
        fs::write(root.join("participants.tsv").as_std_path(), participants).unwrap();
        fs::write(
            root.join("task-rest_eeg.json").as_std_path(),
            r#"{"TaskName": "rest"}"#,
        )
        .unwrap();
        fs::write(root.join("README").as_std_path(), "Test dataset\n").unwrap();

        Self { root, subjects }
    }

    pub fn recording_path(&self, subject: &str) -> Utf8PathBuf {
        self.root
            .join(format!("sub-{subject}/eeg/sub-{subject}_task-rest_eeg.set"))
    }
}
