//! # Phase Vocoder Module
//!
//! Tempo-preserving pitch shift. The signal is time-stretched by the pitch
//! ratio with STFT phase propagation, then read back at the same ratio so the
//! pitch moves and the duration does not.

use std::f32::consts::PI;

use rustfft::num_complex::Complex;
use serde::{Deserialize, Serialize};

use crate::error::{RetuneError, RetuneResult};
use crate::fft::{hann_window, FftPair};
use crate::render::{ensure_render_size, interpolate};

const TWO_PI: f32 = 2.0 * PI;

/// STFT framing for the vocoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VocoderConfig {
    pub fft_size: usize,
    /// Analysis hop is `fft_size / hop_divisor`.
    pub hop_divisor: usize,
}

impl Default for VocoderConfig {
    fn default() -> Self {
        Self {
            fft_size: 2048,
            hop_divisor: 4,
        }
    }
}

impl VocoderConfig {
    pub fn hop_size(&self) -> usize {
        self.fft_size / self.hop_divisor.max(1)
    }

    pub fn validate(&self) -> RetuneResult<()> {
        if self.fft_size < 16 || self.hop_divisor < 2 || self.hop_size() == 0 {
            return Err(RetuneError::InvalidInput(format!(
                "vocoder needs fft_size >= 16 and hop_divisor >= 2, got {} / {}",
                self.fft_size, self.hop_divisor
            )));
        }
        Ok(())
    }
}

/// STFT phase vocoder for a single channel.
#[derive(Clone)]
pub struct PhaseVocoder {
    fft: FftPair,
    window: Vec<f32>,
    hop: usize,
}

impl PhaseVocoder {
    pub fn new(config: &VocoderConfig) -> RetuneResult<Self> {
        config.validate()?;
        Ok(Self {
            fft: FftPair::new(config.fft_size),
            window: hann_window(config.fft_size),
            hop: config.hop_size(),
        })
    }

    /// Shifts pitch by `ratio` (2.0 = one octave up) keeping the length.
    ///
    /// The analysis hop shrinks for large ratios so that stretched frames
    /// land at most `fft_size / 2` apart and always overlap.
    ///
    /// `progress` receives the number of STFT frames finished so far and
    /// the total frame count.
    ///
    /// # Errors
    /// * `InvalidInput` - `ratio` is not positive, or is above `fft_size / 2`
    /// * `TooLarge` - the stretched signal would exceed the render limit
    pub fn pitch_shift(
        &self,
        signal: &[f32],
        ratio: f64,
        progress: &mut dyn FnMut(usize, usize),
    ) -> RetuneResult<Vec<f32>> {
        let size = self.fft.size();
        if !ratio.is_finite() || ratio <= 0.0 {
            return Err(RetuneError::InvalidInput(format!(
                "pitch ratio must be positive, got {ratio}"
            )));
        }
        let hop = self.hop.min(((size / 2) as f64 / ratio).floor() as usize);
        if hop == 0 {
            return Err(RetuneError::InvalidInput(format!(
                "pitch ratio {ratio:.3} is beyond what a {size}-point vocoder can stretch"
            )));
        }
        if signal.is_empty() {
            return Ok(Vec::new());
        }

        let mut padded = vec![0.0; size];
        padded.extend_from_slice(signal);
        padded.resize(signal.len() + 2 * size, 0.0);

        let stretched = self.time_stretch(&padded, hop, ratio, progress)?;

        // Input sample `x` lands at `x * ratio` in the stretched signal.
        let offset = size as f64 * ratio;
        Ok((0..signal.len())
            .map(|i| interpolate(&stretched, offset + i as f64 * ratio))
            .collect())
    }

    /// Overlap-adds frames taken every `hop` samples at `hop * ratio`
    /// spacing, advancing each bin's phase by its measured frequency.
    fn time_stretch(
        &self,
        signal: &[f32],
        hop: usize,
        ratio: f64,
        progress: &mut dyn FnMut(usize, usize),
    ) -> RetuneResult<Vec<f32>> {
        let size = self.fft.size();
        let bins = size / 2 + 1;
        if signal.len() < size {
            return Ok(signal.to_vec());
        }

        let frames = (signal.len() - size) / hop + 1;
        // Synthesis positions stay fractional until rounded per frame, so the
        // overall stretch is exactly `ratio`.
        let synthesis_pos = |frame: usize| (frame as f64 * hop as f64 * ratio).round() as usize;
        let out_len = synthesis_pos(frames - 1).saturating_add(size);
        ensure_render_size(out_len, 1)?;
        let mut output = vec![0.0f32; out_len];
        let mut window_sum = vec![0.0f32; out_len];

        let mut last_phase = vec![0.0f32; bins];
        let mut sum_phase = vec![0.0f32; bins];
        let mut spectrum = vec![Complex::new(0.0f32, 0.0); size];
        let mut last_pos_out = 0;

        for frame in 0..frames {
            let pos_in = frame * hop;
            let pos_out = synthesis_pos(frame);
            let phase_scale = (pos_out - last_pos_out) as f32 / hop as f32;
            for (i, slot) in spectrum.iter_mut().enumerate() {
                *slot = Complex::new(signal[pos_in + i] * self.window[i], 0.0);
            }
            self.fft.forward(&mut spectrum);

            for k in 0..bins {
                let (magnitude, phase) = spectrum[k].to_polar();
                if frame == 0 {
                    sum_phase[k] = phase;
                } else {
                    let expected = TWO_PI * k as f32 * hop as f32 / size as f32;
                    let mut delta = phase - last_phase[k] - expected;
                    delta -= TWO_PI * (delta / TWO_PI).round();
                    sum_phase[k] += (expected + delta) * phase_scale;
                    sum_phase[k] -= TWO_PI * (sum_phase[k] / TWO_PI).round();
                }
                last_phase[k] = phase;
                spectrum[k] = Complex::from_polar(magnitude, sum_phase[k]);
            }
            for k in 1..size - bins + 1 {
                spectrum[size - k] = spectrum[k].conj();
            }

            self.fft.inverse(&mut spectrum);

            for (i, &w) in self.window.iter().enumerate() {
                output[pos_out + i] += spectrum[i].re * w;
                window_sum[pos_out + i] += w * w;
            }
            last_pos_out = pos_out;

            progress(frame + 1, frames);
        }

        for (sample, &norm) in output.iter_mut().zip(&window_sum) {
            if norm > 1e-6 {
                *sample /= norm;
            }
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, rate: u32, frames: usize) -> Vec<f32> {
        (0..frames)
            .map(|i| (2.0 * PI * freq * i as f32 / rate as f32).sin())
            .collect()
    }

    /// Zero crossings per second over the steady middle of a signal.
    fn crossing_rate(signal: &[f32], rate: u32) -> f32 {
        let middle = &signal[signal.len() / 4..signal.len() * 3 / 4];
        let crossings = middle
            .windows(2)
            .filter(|w| (w[0] < 0.0) != (w[1] < 0.0))
            .count();
        crossings as f32 / 2.0 / (middle.len() as f32 / rate as f32)
    }

    #[test]
    fn keeps_the_length() {
        let vocoder = PhaseVocoder::new(&VocoderConfig::default()).unwrap();
        let input = sine(440.0, 44100, 20000);
        for ratio in [0.5, 432.0 / 440.0, 1.0, 1.5] {
            let out = vocoder.pitch_shift(&input, ratio, &mut |_, _| {}).unwrap();
            assert_eq!(out.len(), input.len());
        }
    }

    #[test]
    fn moves_the_pitch() {
        let vocoder = PhaseVocoder::new(&VocoderConfig::default()).unwrap();
        let input = sine(440.0, 44100, 44100);
        let out = vocoder.pitch_shift(&input, 1.2, &mut |_, _| {}).unwrap();
        let measured = crossing_rate(&out, 44100);
        assert!((measured - 528.0).abs() < 528.0 * 0.02, "measured {measured} Hz");
    }

    #[test]
    fn unity_ratio_is_transparent() {
        let vocoder = PhaseVocoder::new(&VocoderConfig::default()).unwrap();
        let input = sine(300.0, 44100, 22050);
        let out = vocoder.pitch_shift(&input, 1.0, &mut |_, _| {}).unwrap();
        let error = input[5000..17000]
            .iter()
            .zip(&out[5000..17000])
            .map(|(a, b)| (a - b).abs())
            .fold(0.0f32, f32::max);
        assert!(error < 1e-2, "max error {error}");
    }

    #[test]
    fn reports_every_frame() {
        let vocoder = PhaseVocoder::new(&VocoderConfig {
            fft_size: 256,
            hop_divisor: 4,
        })
        .unwrap();
        let mut last = (0, 0);
        vocoder
            .pitch_shift(&sine(100.0, 8000, 4000), 1.1, &mut |done, total| last = (done, total))
            .unwrap();
        assert!(last.1 > 0);
        assert_eq!(last.0, last.1);
    }

    #[test]
    fn large_ratios_leave_no_gaps() {
        let vocoder = PhaseVocoder::new(&VocoderConfig::default()).unwrap();
        let input = sine(174.0, 44100, 44100);
        let out = vocoder.pitch_shift(&input, 963.0 / 174.0, &mut |_, _| {}).unwrap();
        assert_eq!(out.len(), input.len());

        let middle = &out[out.len() / 4..out.len() * 3 / 4];
        let mut run = 0;
        let mut longest = 0;
        for sample in middle {
            run = if sample.abs() < 1e-4 { run + 1 } else { 0 };
            longest = longest.max(run);
        }
        assert!(longest <= 3, "{longest} silent samples in a row");

        let measured = crossing_rate(&out, 44100);
        assert!((measured - 963.0).abs() < 963.0 * 0.03, "measured {measured} Hz");
    }

    #[test]
    fn rejects_unusable_ratios() {
        let vocoder = PhaseVocoder::new(&VocoderConfig::default()).unwrap();
        let input = sine(440.0, 44100, 4096);
        for ratio in [0.0, -1.0, f64::NAN, 2000.0] {
            assert!(matches!(
                vocoder.pitch_shift(&input, ratio, &mut |_, _| {}),
                Err(RetuneError::InvalidInput(_))
            ));
        }
    }

    #[test]
    fn rejects_degenerate_framing() {
        assert!(PhaseVocoder::new(&VocoderConfig {
            fft_size: 8,
            hop_divisor: 4
        })
        .is_err());
        assert!(PhaseVocoder::new(&VocoderConfig {
            fft_size: 1024,
            hop_divisor: 1
        })
        .is_err());
    }
}
