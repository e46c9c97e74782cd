//! Per-channel preprocessing pipeline (spec §4.A).
//!
//! Stateless: every option is a pure function of one channel's sample
//! buffer, applied in the fixed order `removeOutliers -> smoothing ->
//! normalization -> resample -> lowpassFilter -> highpassFilter ->
//! notchFilter -> detrend`. Never cached — `core::chunk_cache` stores only
//! raw chunks, and this pipeline is re-run on a fresh `deep_clone()` of the
//! cached chunk on every hit (spec §4.C "raw-only" invariant).
//!
//! Filter mechanics (`Butterworth`, `Notch`, biquad cascades) are in
//! `core::filters`, ported from the sibling signal-processing package.
//! The remaining five options have no teacher counterpart and are new.

use rustfft::{num_complex::Complex64, FftPlanner};
use serde::Deserialize;

use super::edf::SignalChunk;
use super::filters::{Butterworth, Notch};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NormalizationMode {
    None,
    Minmax,
    Zscore,
}

impl Default for NormalizationMode {
    fn default() -> Self {
        NormalizationMode::None
    }
}

/// Preprocessing request, an explicit record of the options in spec §4.A.
/// Unknown keys are rejected at the boundary (spec §9 Design Notes).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct PreprocessingOptions {
    pub remove_outliers: bool,
    pub smoothing_window: Option<usize>,
    pub normalization: NormalizationMode,
    pub resample_hz: Option<f64>,
    pub lowpass_filter: bool,
    pub highpass_filter: bool,
    pub notch_filter: Option<f64>,
    pub detrend: bool,
}

impl PreprocessingOptions {
    pub fn is_identity(&self) -> bool {
        !self.remove_outliers
            && self.smoothing_window.is_none()
            && self.normalization == NormalizationMode::None
            && self.resample_hz.is_none()
            && !self.lowpass_filter
            && !self.highpass_filter
            && self.notch_filter.is_none()
            && !self.detrend
    }
}

const LOWPASS_CUTOFF_HZ: f64 = 40.0;
const HIGHPASS_CUTOFF_HZ: f64 = 0.5;
const NOTCH_Q: f64 = 30.0;
const BUTTERWORTH_ORDER: usize = 4;

/// Applies every requested option to `channel` in spec order, in place.
pub fn apply(channel: &mut SignalChunk, options: &PreprocessingOptions) {
    if options.is_identity() {
        return;
    }
    if options.remove_outliers {
        remove_outliers(&mut channel.samples);
    }
    if let Some(window) = options.smoothing_window {
        smooth(&mut channel.samples, window);
    }
    match options.normalization {
        NormalizationMode::None => {}
        NormalizationMode::Minmax => normalize_minmax(&mut channel.samples),
        NormalizationMode::Zscore => normalize_zscore(&mut channel.samples),
    }
    if let Some(target_hz) = options.resample_hz {
        if target_hz > 0.0 && channel.sampling_frequency_hz > 0.0 {
            channel.samples = resample_fourier(&channel.samples, channel.sampling_frequency_hz, target_hz);
            channel.sampling_frequency_hz = target_hz;
        }
    }
    if options.lowpass_filter && channel.sampling_frequency_hz > 0.0 {
        let filter = Butterworth::lowpass(LOWPASS_CUTOFF_HZ, channel.sampling_frequency_hz, BUTTERWORTH_ORDER);
        channel.samples = filter.filtfilt(&channel.samples);
    }
    if options.highpass_filter && channel.sampling_frequency_hz > 0.0 {
        let filter = Butterworth::highpass(HIGHPASS_CUTOFF_HZ, channel.sampling_frequency_hz, BUTTERWORTH_ORDER);
        channel.samples = filter.filtfilt(&channel.samples);
    }
    if let Some(notch_hz) = options.notch_filter {
        if notch_hz > 0.0 && channel.sampling_frequency_hz > 0.0 {
            let filter = Notch::design(notch_hz, channel.sampling_frequency_hz, NOTCH_Q);
            channel.samples = filter.filtfilt(&channel.samples);
        }
    }
    if options.detrend {
        detrend_linear(&mut channel.samples);
    }
}

/// Clips samples outside `[Q1 - 1.5*IQR, Q3 + 1.5*IQR]` to the nearer bound.
fn remove_outliers(samples: &mut [f64]) {
    if samples.len() < 4 {
        return;
    }
    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let q1 = percentile(&sorted, 0.25);
    let q3 = percentile(&sorted, 0.75);
    let iqr = q3 - q1;
    let lower = q1 - 1.5 * iqr;
    let upper = q3 + 1.5 * iqr;
    for s in samples.iter_mut() {
        if *s < lower {
            *s = lower;
        } else if *s > upper {
            *s = upper;
        }
    }
}

fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = p * (sorted.len() - 1) as f64;
    let lo = idx.floor() as usize;
    let hi = idx.ceil() as usize;
    if lo == hi {
        sorted[lo]
    } else {
        let frac = idx - lo as f64;
        sorted[lo] * (1.0 - frac) + sorted[hi] * frac
    }
}

/// Moving-average smoothing. Window forced odd, `>= 3`, `<= len / 10`.
fn smooth(samples: &mut [f64], requested_window: usize) {
    let len = samples.len();
    if len < 3 {
        return;
    }
    let max_window = (len / 10).max(3);
    let mut window = requested_window.clamp(3, max_window);
    if window % 2 == 0 {
        window -= 1;
    }
    if window < 3 {
        return;
    }
    let half = window / 2;
    let original = samples.to_vec();
    for i in 0..len {
        let start = i.saturating_sub(half);
        let end = (i + half + 1).min(len);
        let sum: f64 = original[start..end].iter().sum();
        samples[i] = sum / (end - start) as f64;
    }
}

fn normalize_minmax(samples: &mut [f64]) {
    if samples.is_empty() {
        return;
    }
    let min = samples.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = samples.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;
    if range <= 0.0 {
        return;
    }
    for s in samples.iter_mut() {
        *s = (*s - min) / range;
    }
}

fn normalize_zscore(samples: &mut [f64]) {
    let n = samples.len();
    if n == 0 {
        return;
    }
    let mean = samples.iter().sum::<f64>() / n as f64;
    let variance = samples.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n as f64;
    let stddev = variance.sqrt();
    if stddev <= 0.0 {
        return;
    }
    for s in samples.iter_mut() {
        *s = (*s - mean) / stddev;
    }
}

/// Fourier-domain resample: FFT, zero-pad or truncate in frequency domain,
/// inverse FFT, scale by the length ratio.
fn resample_fourier(samples: &[f64], source_hz: f64, target_hz: f64) -> Vec<f64> {
    let n = samples.len();
    if n == 0 || (source_hz - target_hz).abs() < f64::EPSILON {
        return samples.to_vec();
    }
    let target_len = ((n as f64) * target_hz / source_hz).round().max(1.0) as usize;

    let mut planner = FftPlanner::<f64>::new();
    let fft = planner.plan_fft_forward(n);
    let mut buffer: Vec<Complex64> = samples.iter().map(|&s| Complex64::new(s, 0.0)).collect();
    fft.process(&mut buffer);

    let mut resized = vec![Complex64::new(0.0, 0.0); target_len];
    let half = n / 2;
    let copy_half = half.min(target_len / 2);
    for i in 0..=copy_half {
        if i < buffer.len() && i < resized.len() {
            resized[i] = buffer[i];
        }
    }
    for i in 1..=copy_half {
        let src_idx = n - i;
        let dst_idx = target_len.wrapping_sub(i);
        if src_idx < buffer.len() && i < target_len && dst_idx < resized.len() {
            resized[dst_idx] = buffer[src_idx];
        }
    }

    let ifft = planner.plan_fft_inverse(target_len);
    ifft.process(&mut resized);

    let scale = 1.0 / n as f64;
    resized.iter().map(|c| c.re * scale).collect()
}

/// Least-squares linear fit subtracted from the signal.
fn detrend_linear(samples: &mut [f64]) {
    let n = samples.len();
    if n < 2 {
        return;
    }
    let n_f = n as f64;
    let x_mean = (n_f - 1.0) / 2.0;
    let y_mean = samples.iter().sum::<f64>() / n_f;

    let mut numerator = 0.0;
    let mut denominator = 0.0;
    for (i, &y) in samples.iter().enumerate() {
        let x = i as f64 - x_mean;
        numerator += x * (y - y_mean);
        denominator += x * x;
    }
    if denominator == 0.0 {
        return;
    }
    let slope = numerator / denominator;
    let intercept = y_mean - slope * x_mean;
    for (i, s) in samples.iter_mut().enumerate() {
        *s -= slope * i as f64 + intercept;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel_with(samples: Vec<f64>, hz: f64) -> SignalChunk {
        SignalChunk {
            label: "ch1".to_string(),
            samples,
            sampling_frequency_hz: hz,
            physical_min: -1000.0,
            physical_max: 1000.0,
            digital_min: -2048,
            digital_max: 2047,
        }
    }

    #[test]
    fn empty_options_is_identity() {
        let original = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let mut chan = channel_with(original.clone(), 256.0);
        apply(&mut chan, &PreprocessingOptions::default());
        assert_eq!(chan.samples, original);
    }

    #[test]
    fn zscore_normalizes_mean_and_stddev() {
        let mut chan = channel_with(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0], 256.0);
        let options = PreprocessingOptions {
            normalization: NormalizationMode::Zscore,
            ..Default::default()
        };
        apply(&mut chan, &options);

        let n = chan.samples.len() as f64;
        let mean = chan.samples.iter().sum::<f64>() / n;
        let variance = chan.samples.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n;
        assert!(mean.abs() < 1e-9);
        assert!((variance.sqrt() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn remove_outliers_clips_extreme_value() {
        let mut chan = channel_with(vec![1.0, 2.0, 2.0, 3.0, 2.0, 2.0, 1.0, 500.0], 256.0);
        remove_outliers(&mut chan.samples);
        assert!(chan.samples.iter().all(|&s| s < 500.0));
    }

    #[test]
    fn smoothing_window_forced_odd_and_bounded() {
        let mut samples = vec![0.0; 50];
        samples[25] = 10.0;
        smooth(&mut samples, 4);
        assert!(samples[25] < 10.0);
        assert!(samples[25] > 0.0);
    }

    #[test]
    fn detrend_removes_linear_ramp() {
        let ramp: Vec<f64> = (0..100).map(|i| i as f64 * 0.5 + 3.0).collect();
        let mut samples = ramp;
        detrend_linear(&mut samples);
        let max_abs = samples.iter().cloned().fold(0.0_f64, |acc, v| acc.max(v.abs()));
        assert!(max_abs < 1e-6);
    }

    #[test]
    fn resample_changes_length_by_ratio() {
        let samples: Vec<f64> = (0..256).map(|i| (i as f64 * 0.1).sin()).collect();
        let resampled = resample_fourier(&samples, 256.0, 128.0);
        assert_eq!(resampled.len(), 128);
    }
}
