//! Second-order-section IIR filters (Butterworth, notch), ported from the
//! sibling signal-processing package's filter designer and trimmed to the
//! lowpass/highpass/notch operations spec §4.A actually uses.

use std::f64::consts::PI;

/// `H(z) = (b0 + b1*z^-1 + b2*z^-2) / (1 + a1*z^-1 + a2*z^-2)`
#[derive(Debug, Clone, Copy)]
pub struct BiquadCoeffs {
    pub b0: f64,
    pub b1: f64,
    pub b2: f64,
    pub a1: f64,
    pub a2: f64,
}

#[derive(Debug, Clone, Default)]
struct BiquadState {
    z1: f64,
    z2: f64,
}

#[derive(Debug, Clone)]
struct BiquadFilter {
    coeffs: BiquadCoeffs,
    state: BiquadState,
}

impl BiquadFilter {
    fn new(coeffs: BiquadCoeffs) -> Self {
        Self { coeffs, state: BiquadState::default() }
    }

    #[inline]
    fn process(&mut self, input: f64) -> f64 {
        let output = self.coeffs.b0 * input + self.state.z1;
        self.state.z1 = self.coeffs.b1 * input - self.coeffs.a1 * output + self.state.z2;
        self.state.z2 = self.coeffs.b2 * input - self.coeffs.a2 * output;
        output
    }
}

/// Cascaded biquad sections, run forward then backward for zero-phase
/// filtering (spec §4.A: lowpass/highpass are "zero-phase").
#[derive(Debug, Clone)]
pub struct SosFilter {
    sections: Vec<BiquadCoeffs>,
    gain: f64,
}

impl SosFilter {
    fn new(sections: Vec<BiquadCoeffs>, gain: f64) -> Self {
        Self { sections, gain }
    }

    fn run_forward(&self, signal: &[f64]) -> Vec<f64> {
        let mut sections: Vec<BiquadFilter> =
            self.sections.iter().copied().map(BiquadFilter::new).collect();
        signal
            .iter()
            .map(|&s| {
                let mut out = s * self.gain;
                for section in &mut sections {
                    out = section.process(out);
                }
                out
            })
            .collect()
    }

    /// Zero-phase filter: forward pass, then reversed forward pass on the
    /// reversed result (equivalent to `filtfilt` for this section count).
    pub fn filtfilt(&self, signal: &[f64]) -> Vec<f64> {
        if signal.is_empty() {
            return Vec::new();
        }
        let forward = self.run_forward(signal);
        let mut reversed = forward;
        reversed.reverse();
        let mut back = self.run_forward(&reversed);
        back.reverse();
        back
    }
}

fn prewarp(freq: f64, sample_rate: f64) -> f64 {
    (PI * freq / sample_rate).tan()
}

fn design_lowpass(wn: f64, order: usize) -> Vec<BiquadCoeffs> {
    let num_sections = (order + 1) / 2;
    let mut sections = Vec::with_capacity(num_sections);
    for k in 0..num_sections {
        let theta = PI * (2.0 * k as f64 + 1.0) / (2.0 * order as f64);
        let alpha = -2.0 * theta.cos();
        if order % 2 == 1 && k == num_sections - 1 {
            let k_coeff = wn / (1.0 + wn);
            sections.push(BiquadCoeffs {
                b0: k_coeff,
                b1: k_coeff,
                b2: 0.0,
                a1: (wn - 1.0) / (wn + 1.0),
                a2: 0.0,
            });
        } else {
            let wn2 = wn * wn;
            let denom = 1.0 + alpha * wn + wn2;
            sections.push(BiquadCoeffs {
                b0: wn2 / denom,
                b1: 2.0 * wn2 / denom,
                b2: wn2 / denom,
                a1: 2.0 * (wn2 - 1.0) / denom,
                a2: (1.0 - alpha * wn + wn2) / denom,
            });
        }
    }
    sections
}

fn design_highpass(wn: f64, order: usize) -> Vec<BiquadCoeffs> {
    let num_sections = (order + 1) / 2;
    let mut sections = Vec::with_capacity(num_sections);
    for k in 0..num_sections {
        let theta = PI * (2.0 * k as f64 + 1.0) / (2.0 * order as f64);
        let alpha = -2.0 * theta.cos();
        if order % 2 == 1 && k == num_sections - 1 {
            let k_coeff = 1.0 / (1.0 + wn);
            sections.push(BiquadCoeffs {
                b0: k_coeff,
                b1: -k_coeff,
                b2: 0.0,
                a1: (wn - 1.0) / (wn + 1.0),
                a2: 0.0,
            });
        } else {
            let wn2 = wn * wn;
            let denom = 1.0 + alpha * wn + wn2;
            sections.push(BiquadCoeffs {
                b0: 1.0 / denom,
                b1: -2.0 / denom,
                b2: 1.0 / denom,
                a1: 2.0 * (wn2 - 1.0) / denom,
                a2: (1.0 - alpha * wn + wn2) / denom,
            });
        }
    }
    sections
}

pub struct Butterworth;

impl Butterworth {
    /// 4th-order lowpass, cutoff relative to the channel's own sample rate.
    pub fn lowpass(cutoff: f64, sample_rate: f64, order: usize) -> SosFilter {
        let wn = prewarp(cutoff, sample_rate);
        SosFilter::new(design_lowpass(wn, order), 1.0)
    }

    pub fn highpass(cutoff: f64, sample_rate: f64, order: usize) -> SosFilter {
        let wn = prewarp(cutoff, sample_rate);
        SosFilter::new(design_highpass(wn, order), 1.0)
    }
}

pub struct Notch;

impl Notch {
    /// IIR notch at `center_freq`, quality factor `q_factor` (spec: Q = 30).
    pub fn design(center_freq: f64, sample_rate: f64, q_factor: f64) -> SosFilter {
        let w0 = 2.0 * PI * center_freq / sample_rate;
        let bandwidth = w0 / q_factor;
        let cos_w0 = w0.cos();
        let sin_w0 = w0.sin();
        let alpha = sin_w0 * (bandwidth / 2.0).sinh();

        let a0 = 1.0 + alpha;
        let coeffs = BiquadCoeffs {
            b0: 1.0 / a0,
            b1: -2.0 * cos_w0 / a0,
            b2: 1.0 / a0,
            a1: -2.0 * cos_w0 / a0,
            a2: (1.0 - alpha) / a0,
        };
        SosFilter::new(vec![coeffs], 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notch_attenuates_target_frequency() {
        let sample_rate = 1000.0;
        let notch_freq = 50.0;
        let filter = Notch::design(notch_freq, sample_rate, 30.0);

        let signal: Vec<f64> = (0..1000)
            .map(|i| (2.0 * PI * notch_freq * i as f64 / sample_rate).sin())
            .collect();
        let filtered = filter.filtfilt(&signal);

        let input_rms: f64 = (signal.iter().map(|x| x * x).sum::<f64>() / signal.len() as f64).sqrt();
        let output_rms: f64 =
            (filtered.iter().map(|x| x * x).sum::<f64>() / filtered.len() as f64).sqrt();
        assert!(output_rms < input_rms * 0.2);
    }

    #[test]
    fn lowpass_passes_dc() {
        let filter = Butterworth::lowpass(10.0, 100.0, 4);
        let signal = vec![1.0; 200];
        let out = filter.filtfilt(&signal);
        assert!((out[150] - 1.0).abs() < 0.05);
    }
}
