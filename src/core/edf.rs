//! EDF (European Data Format) header and chunk reading.
//!
//! Byte layout follows https://www.edfplus.info/specs/edf.html: a 256-byte
//! main header followed by one 256-byte-times-num_signals block of
//! per-signal headers, then interleaved data records. Grounded on the
//! teacher's `edf.rs` reader (same field widths, same `BufReader<File>` +
//! fixed-width ASCII field parsing idiom), generalized to sample-indexed
//! chunk reads rather than time-windowed ones, per spec §3/§4.A.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rayon::prelude::*;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use super::error::{CoreError, CoreResult};

#[derive(Debug, Clone)]
pub struct EdfMainHeader {
    pub version: String,
    pub patient_id: String,
    pub recording_id: String,
    pub start_date: String,
    pub start_time: String,
    pub header_bytes: usize,
    pub num_data_records: i64,
    pub duration_of_data_record: f64,
    pub num_signals: usize,
}

#[derive(Debug, Clone)]
pub struct EdfSignalHeader {
    pub label: String,
    pub transducer_type: String,
    pub physical_dimension: String,
    pub physical_minimum: f64,
    pub physical_maximum: f64,
    pub digital_minimum: i64,
    pub digital_maximum: i64,
    pub prefiltering: String,
    pub num_samples_per_record: usize,
}

impl EdfSignalHeader {
    pub fn sample_frequency(&self, record_duration: f64) -> f64 {
        if record_duration <= 0.0 {
            return 0.0;
        }
        self.num_samples_per_record as f64 / record_duration
    }

    fn gain(&self) -> f64 {
        let span = self.digital_maximum - self.digital_minimum;
        if span == 0 {
            1.0
        } else {
            (self.physical_maximum - self.physical_minimum) / span as f64
        }
    }

    fn offset(&self) -> f64 {
        self.physical_maximum - self.gain() * self.digital_maximum as f64
    }
}

/// A single channel's samples for one chunk window (spec §3 "Signal").
#[derive(Debug, Clone)]
pub struct SignalChunk {
    pub label: String,
    pub samples: Vec<f64>,
    pub sampling_frequency_hz: f64,
    pub physical_min: f64,
    pub physical_max: f64,
    pub digital_min: i64,
    pub digital_max: i64,
}

/// Decoded, per-channel windowed slice of an EDF file (spec §3 "EDFChunk").
#[derive(Debug, Clone)]
pub struct EdfChunk {
    pub labels: Vec<String>,
    pub signals: Vec<SignalChunk>,
    pub chunk_start_samples: i64,
    pub chunk_end_samples: i64,
    pub chunk_size_samples: i64,
    pub start_datetime: DateTime<Utc>,
}

impl EdfChunk {
    /// Deep copy: every buffer reallocated so mutation by a caller cannot
    /// corrupt cached state (spec §3 "Invariant" / invariant 1).
    pub fn deep_clone(&self) -> Self {
        EdfChunk {
            labels: self.labels.clone(),
            signals: self
                .signals
                .iter()
                .map(|s| SignalChunk {
                    label: s.label.clone(),
                    samples: s.samples.clone(),
                    sampling_frequency_hz: s.sampling_frequency_hz,
                    physical_min: s.physical_min,
                    physical_max: s.physical_max,
                    digital_min: s.digital_min,
                    digital_max: s.digital_max,
                })
                .collect(),
            chunk_start_samples: self.chunk_start_samples,
            chunk_end_samples: self.chunk_end_samples,
            chunk_size_samples: self.chunk_size_samples,
            start_datetime: self.start_datetime,
        }
    }
}

/// FileMetadata (spec §3): derived purely from the header, stable for a TTL window.
#[derive(Debug, Clone)]
pub struct FileMetadata {
    pub total_samples: i64,
    pub num_signals: usize,
    pub signal_labels: Vec<String>,
    pub sampling_frequencies: Vec<f64>,
    pub file_duration_seconds: f64,
}

pub const DEFAULT_CHUNK_SIZE: i64 = 25_600;

/// A single open EDF file, used both by the handle pool (§4.D) and by the
/// orchestrator's bypass-the-pool read path (§4.E).
pub struct EdfReader {
    file: BufReader<File>,
    main: EdfMainHeader,
    signals: Vec<EdfSignalHeader>,
    data_start_offset: u64,
    record_size_bytes: u64,
    channel_byte_offsets: Vec<u64>,
    path: PathBuf,
}

impl EdfReader {
    pub fn open<P: AsRef<Path>>(path: P) -> CoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|_| CoreError::FileNotFound(path.clone()))?;
        let mut file = BufReader::new(file);

        let main = Self::read_main_header(&mut file, &path)?;
        let signals = Self::read_signal_headers(&mut file, main.num_signals, &path)?;

        let mut channel_byte_offsets = Vec::with_capacity(signals.len());
        let mut running = 0u64;
        for s in &signals {
            channel_byte_offsets.push(running);
            running += (s.num_samples_per_record * 2) as u64;
        }
        let record_size_bytes = running;

        Ok(Self {
            file,
            data_start_offset: main.header_bytes as u64,
            main,
            signals,
            record_size_bytes,
            channel_byte_offsets,
            path,
        })
    }

    fn read_fixed_string<R: Read>(reader: &mut R, size: usize, path: &Path) -> CoreResult<String> {
        let mut buffer = vec![0u8; size];
        reader
            .read_exact(&mut buffer)
            .map_err(|e| CoreError::CorruptHeader {
                path: path.to_path_buf(),
                reason: format!("short read ({size} bytes): {e}"),
            })?;
        Ok(String::from_utf8_lossy(&buffer).trim().to_string())
    }

    fn parse_field<T: std::str::FromStr>(s: &str, field: &str, path: &Path) -> CoreResult<T> {
        s.trim().parse::<T>().map_err(|_| CoreError::CorruptHeader {
            path: path.to_path_buf(),
            reason: format!("invalid {field} field: '{s}'"),
        })
    }

    fn read_main_header<R: Read>(reader: &mut R, path: &Path) -> CoreResult<EdfMainHeader> {
        let version = Self::read_fixed_string(reader, 8, path)?;
        let patient_id = Self::read_fixed_string(reader, 80, path)?;
        let recording_id = Self::read_fixed_string(reader, 80, path)?;
        let start_date = Self::read_fixed_string(reader, 8, path)?;
        let start_time = Self::read_fixed_string(reader, 8, path)?;
        let header_bytes: usize =
            Self::parse_field(&Self::read_fixed_string(reader, 8, path)?, "header_bytes", path)?;
        let _reserved = Self::read_fixed_string(reader, 44, path)?;
        let num_data_records: i64 = Self::parse_field(
            &Self::read_fixed_string(reader, 8, path)?,
            "num_data_records",
            path,
        )?;
        let duration_of_data_record: f64 = Self::parse_field(
            &Self::read_fixed_string(reader, 8, path)?,
            "duration_of_data_record",
            path,
        )?;
        let num_signals: usize =
            Self::parse_field(&Self::read_fixed_string(reader, 4, path)?, "num_signals", path)?;

        Ok(EdfMainHeader {
            version,
            patient_id,
            recording_id,
            start_date,
            start_time,
            header_bytes,
            num_data_records,
            duration_of_data_record,
            num_signals,
        })
    }

    fn read_signal_headers<R: Read>(
        reader: &mut R,
        num_signals: usize,
        path: &Path,
    ) -> CoreResult<Vec<EdfSignalHeader>> {
        let mut labels = Vec::with_capacity(num_signals);
        let mut transducer_types = Vec::with_capacity(num_signals);
        let mut physical_dimensions = Vec::with_capacity(num_signals);
        let mut physical_minimums = Vec::with_capacity(num_signals);
        let mut physical_maximums = Vec::with_capacity(num_signals);
        let mut digital_minimums = Vec::with_capacity(num_signals);
        let mut digital_maximums = Vec::with_capacity(num_signals);
        let mut prefilterings = Vec::with_capacity(num_signals);
        let mut num_samples_per_records = Vec::with_capacity(num_signals);

        for _ in 0..num_signals {
            labels.push(Self::read_fixed_string(reader, 16, path)?);
        }
        for _ in 0..num_signals {
            transducer_types.push(Self::read_fixed_string(reader, 80, path)?);
        }
        for _ in 0..num_signals {
            physical_dimensions.push(Self::read_fixed_string(reader, 8, path)?);
        }
        for _ in 0..num_signals {
            physical_minimums.push(Self::parse_field(
                &Self::read_fixed_string(reader, 8, path)?,
                "physical_minimum",
                path,
            )?);
        }
        for _ in 0..num_signals {
            physical_maximums.push(Self::parse_field(
                &Self::read_fixed_string(reader, 8, path)?,
                "physical_maximum",
                path,
            )?);
        }
        for _ in 0..num_signals {
            digital_minimums.push(Self::parse_field(
                &Self::read_fixed_string(reader, 8, path)?,
                "digital_minimum",
                path,
            )?);
        }
        for _ in 0..num_signals {
            digital_maximums.push(Self::parse_field(
                &Self::read_fixed_string(reader, 8, path)?,
                "digital_maximum",
                path,
            )?);
        }
        for _ in 0..num_signals {
            prefilterings.push(Self::read_fixed_string(reader, 80, path)?);
        }
        for _ in 0..num_signals {
            num_samples_per_records.push(Self::parse_field(
                &Self::read_fixed_string(reader, 8, path)?,
                "num_samples_per_record",
                path,
            )?);
        }
        for _ in 0..num_signals {
            // reserved, 32 bytes, discarded
            Self::read_fixed_string(reader, 32, path)?;
        }

        Ok((0..num_signals)
            .map(|i| EdfSignalHeader {
                label: labels[i].clone(),
                transducer_type: transducer_types[i].clone(),
                physical_dimension: physical_dimensions[i].clone(),
                physical_minimum: physical_minimums[i],
                physical_maximum: physical_maximums[i],
                digital_minimum: digital_minimums[i],
                digital_maximum: digital_maximums[i],
                prefiltering: prefilterings[i].clone(),
                num_samples_per_record: num_samples_per_records[i],
            })
            .collect())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn num_signals(&self) -> usize {
        self.signals.len()
    }

    pub fn signal_headers(&self) -> &[EdfSignalHeader] {
        &self.signals
    }

    /// Total samples for signal `i` across the whole file.
    fn total_samples_for(&self, signal_idx: usize) -> i64 {
        self.main.num_data_records.max(0) * self.signals[signal_idx].num_samples_per_record as i64
    }

    /// Liveness probe (spec §4.D): signals_in_file, getNSamples, getSampleFrequency(0), 1-sample read of signal 0.
    pub fn liveness_probe(&mut self) -> bool {
        if self.signals.is_empty() {
            return false;
        }
        if self.total_samples_for(0) < 0 {
            return false;
        }
        if self.signals[0].sample_frequency(self.main.duration_of_data_record) <= 0.0 {
            return false;
        }
        self.read_channel_raw(0, 0, 1).is_ok()
    }

    pub fn read_header(&self) -> FileMetadata {
        let total_samples = if self.signals.is_empty() {
            0
        } else {
            self.total_samples_for(0)
        };
        FileMetadata {
            total_samples,
            num_signals: self.signals.len(),
            signal_labels: self.signals.iter().map(|s| s.label.clone()).collect(),
            sampling_frequencies: self
                .signals
                .iter()
                .map(|s| s.sample_frequency(self.main.duration_of_data_record))
                .collect(),
            file_duration_seconds: self.main.num_data_records.max(0) as f64
                * self.main.duration_of_data_record,
        }
    }

    pub fn start_datetime(&self) -> DateTime<Utc> {
        parse_edf_datetime(&self.main.start_date, &self.main.start_time)
            .unwrap_or_else(|| DateTime::<Utc>::from_timestamp(0, 0).unwrap())
    }

    /// Read raw digital samples `[start, start+len)` for one channel.
    fn read_channel_raw(&mut self, channel_idx: usize, start: i64, len: i64) -> CoreResult<Vec<i16>> {
        if len <= 0 {
            return Ok(Vec::new());
        }
        let spr = self.signals[channel_idx].num_samples_per_record as i64;
        if spr == 0 {
            return Ok(Vec::new());
        }
        let byte_offset_in_record = self.channel_byte_offsets[channel_idx];

        let mut out = Vec::with_capacity(len as usize);
        let mut remaining = len;
        let mut cursor = start;
        while remaining > 0 {
            let record_idx = cursor / spr;
            let offset_in_record = cursor % spr;
            let available_in_record = spr - offset_in_record;
            let take = available_in_record.min(remaining);

            let byte_pos = self.data_start_offset
                + (record_idx as u64) * self.record_size_bytes
                + byte_offset_in_record
                + (offset_in_record as u64) * 2;
            self.file.seek(SeekFrom::Start(byte_pos))?;

            let mut buf = vec![0u8; (take as usize) * 2];
            self.file.read_exact(&mut buf)?;
            for chunk in buf.chunks_exact(2) {
                out.push(i16::from_le_bytes([chunk[0], chunk[1]]));
            }

            cursor += take;
            remaining -= take;
        }
        Ok(out)
    }

    /// Decode a chunk across all channels, per spec §4.A bound-correction rules.
    /// Channel subset: `selected` is `None` for all channels, or `Some(indices)`.
    pub fn read_chunk(
        &mut self,
        chunk_start: i64,
        chunk_size: i64,
        selected: Option<&[usize]>,
    ) -> CoreResult<(EdfChunk, i64)> {
        let total_samples = if self.signals.is_empty() {
            0
        } else {
            self.total_samples_for(0)
        };

        let chunk_start = chunk_start.max(0);
        let chunk_size = if chunk_size <= 0 { DEFAULT_CHUNK_SIZE } else { chunk_size };
        let clipped_start = chunk_start.min(total_samples);
        let clipped_end = (chunk_start + chunk_size).clamp(0, total_samples);

        let indices: Vec<usize> = match selected {
            Some(idxs) => idxs.to_vec(),
            None => (0..self.signals.len()).collect(),
        };

        let mut signals = Vec::with_capacity(indices.len());
        for &idx in &indices {
            if idx >= self.signals.len() {
                continue;
            }
            let n_samples_i = self.total_samples_for(idx);
            let read_len = (n_samples_i - clipped_start).min(chunk_size).max(0);
            let header = &self.signals[idx];
            let freq = header.sample_frequency(self.main.duration_of_data_record);

            if read_len <= 0 {
                tracing::warn!(
                    file = %self.path.display(),
                    channel = %header.label,
                    "channel read degraded to empty placeholder"
                );
                signals.push(SignalChunk {
                    label: header.label.clone(),
                    samples: vec![0.0],
                    sampling_frequency_hz: freq,
                    physical_min: header.physical_minimum,
                    physical_max: header.physical_maximum,
                    digital_min: header.digital_minimum,
                    digital_max: header.digital_maximum,
                });
                continue;
            }

            let raw = self.read_channel_raw(idx, clipped_start, read_len)?;
            let gain = header.gain();
            let offset = header.offset();
            let samples: Vec<f64> = raw.iter().map(|&d| gain * d as f64 + offset).collect();

            signals.push(SignalChunk {
                label: header.label.clone(),
                samples,
                sampling_frequency_hz: freq,
                physical_min: header.physical_minimum,
                physical_max: header.physical_maximum,
                digital_min: header.digital_minimum,
                digital_max: header.digital_maximum,
            });
        }

        let labels = signals.iter().map(|s| s.label.clone()).collect();
        let chunk = EdfChunk {
            labels,
            signals,
            chunk_start_samples: clipped_start,
            chunk_end_samples: clipped_end,
            chunk_size_samples: clipped_end - clipped_start,
            start_datetime: self.start_datetime(),
        };
        Ok((chunk, total_samples))
    }

    /// Parallel physical-value decode across channels for a full data record,
    /// kept for callers that want the teacher's record-oriented access path.
    pub fn read_physical_record(&mut self, record_index: usize) -> CoreResult<Vec<Vec<f64>>> {
        if record_index as i64 >= self.main.num_data_records {
            return Err(CoreError::CorruptHeader {
                path: self.path.clone(),
                reason: format!("record {record_index} out of bounds"),
            });
        }
        let mut digital = Vec::with_capacity(self.signals.len());
        for i in 0..self.signals.len() {
            let spr = self.signals[i].num_samples_per_record as i64;
            digital.push(self.read_channel_raw(i, record_index as i64 * spr, spr)?);
        }
        let signals = &self.signals;
        Ok(digital
            .par_iter()
            .enumerate()
            .map(|(i, raw)| {
                let gain = signals[i].gain();
                let offset = signals[i].offset();
                raw.iter().map(|&d| gain * d as f64 + offset).collect()
            })
            .collect())
    }
}

fn parse_edf_datetime(date: &str, time: &str) -> Option<DateTime<Utc>> {
    // EDF dates are dd.mm.yy, times are hh.mm.ss
    let date_parts: Vec<&str> = date.split('.').collect();
    let time_parts: Vec<&str> = time.split('.').collect();
    if date_parts.len() != 3 || time_parts.len() != 3 {
        return None;
    }
    let day: u32 = date_parts[0].trim().parse().ok()?;
    let month: u32 = date_parts[1].trim().parse().ok()?;
    let mut year: i32 = date_parts[2].trim().parse().ok()?;
    year += if year < 85 { 2000 } else { 1900 };
    let hour: u32 = time_parts[0].trim().parse().ok()?;
    let minute: u32 = time_parts[1].trim().parse().ok()?;
    let second: u32 = time_parts[2].trim().parse().ok()?;

    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    let time = NaiveTime::from_hms_opt(hour, minute, second)?;
    Some(DateTime::<Utc>::from_naive_utc_and_offset(
        NaiveDateTime::new(date, time),
        Utc,
    ))
}

/// Produces a declared testability fallback: a synthetic 10 Hz sine wave
/// over a 1000-second, 512 Hz record (spec §4.A). Gated by
/// `CoreConfig::synthetic_fallback_enabled`, consulted only by
/// `Core::get_metadata`/`Core::read_chunk_raw` when the real file is
/// missing, and off by default (Design Notes §9 — never silent in
/// production).
pub fn synthetic_reader_metadata() -> FileMetadata {
    let freq = 512.0;
    let duration = 1000.0;
    FileMetadata {
        total_samples: (freq * duration) as i64,
        num_signals: 1,
        signal_labels: vec!["SYNTH".to_string()],
        sampling_frequencies: vec![freq],
        file_duration_seconds: duration,
    }
}

pub fn synthetic_chunk(chunk_start: i64, chunk_size: i64) -> (EdfChunk, i64) {
    let meta = synthetic_reader_metadata();
    let chunk_start = chunk_start.max(0).min(meta.total_samples);
    let chunk_size = if chunk_size <= 0 { DEFAULT_CHUNK_SIZE } else { chunk_size };
    let chunk_end = (chunk_start + chunk_size).clamp(0, meta.total_samples);
    let freq = meta.sampling_frequencies[0];
    let samples: Vec<f64> = (chunk_start..chunk_end)
        .map(|n| (2.0 * std::f64::consts::PI * 10.0 * (n as f64 / freq)).sin())
        .collect();
    let chunk = EdfChunk {
        labels: meta.signal_labels.clone(),
        signals: vec![SignalChunk {
            label: meta.signal_labels[0].clone(),
            samples,
            sampling_frequency_hz: freq,
            physical_min: -1.0,
            physical_max: 1.0,
            digital_min: -32768,
            digital_max: 32767,
        }],
        chunk_start_samples: chunk_start,
        chunk_end_samples: chunk_end,
        chunk_size_samples: chunk_end - chunk_start,
        start_datetime: DateTime::<Utc>::from_timestamp(0, 0).unwrap(),
    };
    (chunk, meta.total_samples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_test_edf(path: &Path, num_signals: usize, spr: usize, num_records: usize) {
        let mut buf = Vec::new();
        let header_bytes = 256 + num_signals * 256;
        buf.extend(format!("{:<8}", "0").into_bytes());
        buf.extend(format!("{:<80}", "patient").into_bytes());
        buf.extend(format!("{:<80}", "recording").into_bytes());
        buf.extend(format!("{:<8}", "01.01.20").into_bytes());
        buf.extend(format!("{:<8}", "00.00.00").into_bytes());
        buf.extend(format!("{:<8}", header_bytes).into_bytes());
        buf.extend(vec![b' '; 44]);
        buf.extend(format!("{:<8}", num_records).into_bytes());
        buf.extend(format!("{:<8}", "1").into_bytes());
        buf.extend(format!("{:<4}", num_signals).into_bytes());

        for i in 0..num_signals {
            buf.extend(format!("{:<16}", format!("CH{i}")).into_bytes());
        }
        for _ in 0..num_signals {
            buf.extend(vec![b' '; 80]);
        }
        for _ in 0..num_signals {
            buf.extend(format!("{:<8}", "uV").into_bytes());
        }
        for _ in 0..num_signals {
            buf.extend(format!("{:<8}", "-100").into_bytes());
        }
        for _ in 0..num_signals {
            buf.extend(format!("{:<8}", "100").into_bytes());
        }
        for _ in 0..num_signals {
            buf.extend(format!("{:<8}", "-32768").into_bytes());
        }
        for _ in 0..num_signals {
            buf.extend(format!("{:<8}", "32767").into_bytes());
        }
        for _ in 0..num_signals {
            buf.extend(vec![b' '; 80]);
        }
        for _ in 0..num_signals {
            buf.extend(format!("{:<8}", spr).into_bytes());
        }
        for _ in 0..num_signals {
            buf.extend(vec![b' '; 32]);
        }

        for r in 0..num_records {
            for _ in 0..num_signals {
                for s in 0..spr {
                    let val = ((r * spr + s) % 100) as i16;
                    buf.extend(val.to_le_bytes());
                }
            }
        }

        let mut f = File::create(path).unwrap();
        f.write_all(&buf).unwrap();
    }

    #[test]
    fn reads_header_fields() {
        let dir = std::env::temp_dir().join(format!("edfcore-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("a.edf");
        write_test_edf(&path, 2, 100, 10);

        let reader = EdfReader::open(&path).unwrap();
        let meta = reader.read_header();
        assert_eq!(meta.num_signals, 2);
        assert_eq!(meta.total_samples, 1000);
        assert_eq!(meta.signal_labels, vec!["CH0", "CH1"]);
    }

    #[test]
    fn chunk_bound_correction_clips_and_placeholders() {
        let dir = std::env::temp_dir().join(format!("edfcore-test2-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("b.edf");
        write_test_edf(&path, 1, 100, 5); // 500 samples total

        let mut reader = EdfReader::open(&path).unwrap();
        let (chunk, total) = reader.read_chunk(-10, 0, None).unwrap();
        assert_eq!(total, 500);
        assert_eq!(chunk.chunk_start_samples, 0);
        assert_eq!(chunk.chunk_size_samples, DEFAULT_CHUNK_SIZE.min(500));

        let (chunk2, _) = reader.read_chunk(600, 100, None).unwrap();
        assert_eq!(chunk2.signals[0].samples, vec![0.0]);
    }

    #[test]
    fn liveness_probe_detects_healthy_reader() {
        let dir = std::env::temp_dir().join(format!("edfcore-test3-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("c.edf");
        write_test_edf(&path, 1, 50, 4);
        let mut reader = EdfReader::open(&path).unwrap();
        assert!(reader.liveness_probe());
    }
}
