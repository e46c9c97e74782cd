//! Automatic channel selection (spec §4.F): name filter, physiological
//! range filter, variance probe, and a three-step fallback ladder, used
//! when a DDA request doesn't pin an explicit channel list.

use std::path::Path;

use super::edf::EdfSignalHeader;
use super::error::CoreResult;
use super::handle_pool::HandlePool;

const NAME_BLOCKLIST: &[&str] = &[
    "event", "annotation", "trigger", "marker", "status", "evt", "ecg", "ekg", "emg", "eog",
    "pulse", "sat", "o2", "spo2", "resp", "hr", "temp",
];

const PROBLEMATIC_ABS_VALUE: f64 = 10_000.0;
const VARIANCE_MIN: f64 = 0.001;
const VARIANCE_MAX: f64 = 1_000_000.0;
const PROBE_OFFSET_SAMPLES: i64 = 0;
const PROBE_SIZE_SAMPLES: i64 = 2_560;

fn passes_name_filter(label: &str) -> bool {
    let lower = label.to_lowercase();
    !NAME_BLOCKLIST.iter().any(|needle| lower.contains(needle))
}

fn is_problematic_range(header: &EdfSignalHeader) -> bool {
    header.physical_minimum > header.physical_maximum
        || header.physical_minimum.abs() > PROBLEMATIC_ABS_VALUE
        || header.physical_maximum.abs() > PROBLEMATIC_ABS_VALUE
}

/// Selects up to `max_channels` signal indices for DDA when the caller did
/// not pin an explicit list, following the exact ladder in spec §4.F.
pub fn select_channels(
    pool: &HandlePool,
    path: &Path,
    max_channels: usize,
) -> CoreResult<Vec<usize>> {
    let path_buf = path.to_path_buf();
    let headers: Vec<EdfSignalHeader> =
        pool.with_reader(&path_buf, |r| Ok(r.signal_headers().to_vec()))?;

    let name_filtered: Vec<usize> = (0..headers.len())
        .filter(|&i| passes_name_filter(&headers[i].label))
        .collect();
    let candidate_pool: Vec<usize> = if name_filtered.is_empty() {
        (0..headers.len()).collect()
    } else {
        name_filtered
    };

    let non_problematic: Vec<usize> = candidate_pool
        .iter()
        .copied()
        .filter(|&i| !is_problematic_range(&headers[i]))
        .collect();

    let (candidates, effective_max) = if !non_problematic.is_empty() {
        (non_problematic, max_channels)
    } else {
        (candidate_pool.clone(), max_channels.min(3))
    };

    if candidates.len() >= effective_max {
        return Ok(candidates.into_iter().take(effective_max).collect());
    }

    probe_top_variance(pool, &path_buf, &candidates, effective_max)
        .map(Ok)
        .unwrap_or_else(|| fallback_ladder(&headers, &candidate_pool, effective_max))
}

/// Reads an uncached, unpreprocessed probe window per candidate and keeps
/// those whose variance falls in `(VARIANCE_MIN, VARIANCE_MAX)`, sorted
/// descending, returning the top `max_channels`. `None` if the probe read
/// itself fails (caller falls back to a plain truncation).
fn probe_top_variance(
    pool: &HandlePool,
    path: &std::path::PathBuf,
    candidates: &[usize],
    max_channels: usize,
) -> Option<Vec<usize>> {
    let (chunk, _) = pool
        .with_reader(path, |r| r.read_chunk(PROBE_OFFSET_SAMPLES, PROBE_SIZE_SAMPLES, Some(candidates)))
        .ok()?;

    let mut scored: Vec<(usize, f64)> = chunk
        .signals
        .iter()
        .zip(candidates.iter())
        .filter_map(|(signal, &idx)| {
            let variance = sample_variance(&signal.samples);
            if variance > VARIANCE_MIN && variance < VARIANCE_MAX {
                Some((idx, variance))
            } else {
                None
            }
        })
        .collect();

    if scored.is_empty() {
        return None;
    }
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    Some(scored.into_iter().take(max_channels).map(|(idx, _)| idx).collect())
}

fn sample_variance(samples: &[f64]) -> f64 {
    let finite: Vec<f64> = samples.iter().copied().filter(|s| s.is_finite()).collect();
    let n = finite.len();
    if n == 0 {
        return 0.0;
    }
    let mean = finite.iter().sum::<f64>() / n as f64;
    finite.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n as f64
}

/// Three-step fallback when fewer candidates remain than `max_channels`:
/// re-run the candidate set at the reduced size, then indices `1..N+1`
/// (skipping channel 0), then the first `N` channels entirely unfiltered.
fn fallback_ladder(
    headers: &[EdfSignalHeader],
    candidates: &[usize],
    max_channels: usize,
) -> CoreResult<Vec<usize>> {
    if !candidates.is_empty() {
        return Ok(candidates.iter().copied().take(max_channels).collect());
    }

    let skip_first: Vec<usize> = (1..headers.len()).take(max_channels).collect();
    if !skip_first.is_empty() {
        return Ok(skip_first);
    }

    Ok((0..headers.len()).take(max_channels).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(label: &str, phys_min: f64, phys_max: f64) -> EdfSignalHeader {
        EdfSignalHeader {
            label: label.to_string(),
            transducer_type: String::new(),
            physical_dimension: "uV".to_string(),
            physical_minimum: phys_min,
            physical_maximum: phys_max,
            digital_minimum: -2048,
            digital_maximum: 2047,
            prefiltering: String::new(),
            num_samples_per_record: 256,
        }
    }

    #[test]
    fn name_filter_excludes_annotation_channels() {
        assert!(!passes_name_filter("EDF Annotations"));
        assert!(!passes_name_filter("ECG"));
        assert!(passes_name_filter("EEG Fp1"));
    }

    #[test]
    fn problematic_range_detects_inverted_and_extreme_bounds() {
        assert!(is_problematic_range(&header("a", 100.0, -100.0)));
        assert!(is_problematic_range(&header("a", -50000.0, 50000.0)));
        assert!(!is_problematic_range(&header("a", -200.0, 200.0)));
    }

    #[test]
    fn fallback_ladder_uses_candidates_first() {
        let headers = vec![header("a", -1.0, 1.0); 5];
        let result = fallback_ladder(&headers, &[2, 3], 4).unwrap();
        assert_eq!(result, vec![2, 3]);
    }

    #[test]
    fn fallback_ladder_skips_channel_zero_when_no_candidates() {
        let headers = vec![header("a", -1.0, 1.0); 5];
        let result = fallback_ladder(&headers, &[], 3).unwrap();
        assert_eq!(result, vec![1, 2, 3]);
    }

    #[test]
    fn sample_variance_ignores_non_finite_samples() {
        let clean = sample_variance(&[1.0, 2.0, 3.0, 4.0]);
        let with_nan_and_inf = sample_variance(&[1.0, 2.0, 3.0, 4.0, f64::NAN, f64::INFINITY]);
        assert!((clean - with_nan_and_inf).abs() < 1e-12);
    }
}
