//! # Pitch Detection Module
//!
//! Estimates the dominant fundamental frequency of a decoded clip.
//!
//! ## Features
//! - Difference-based autocorrelation over a bounded analysis window
//! - RMS noise gate so silence never produces a spurious frequency
//! - YIN as an alternative estimator behind the same interface
//! - Every threshold lives in [`DetectorConfig`]
//!
//! Analysis never fails on inconclusive audio. Silence and aperiodic input
//! come back as the fallback frequency with a low confidence.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::buffer::AudioBuffer;
use crate::error::{RetuneError, RetuneResult};

/// Lags scored per parallel batch by [`Autocorrelation`].
const LAG_BLOCK: usize = 512;

/// Dominant frequency of an analysis window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    /// Always positive; the fallback frequency when nothing locked.
    pub frequency: f32,
    /// 0.0 to 1.0
    pub confidence: f32,
}

/// Thresholds and fallbacks used by the detector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Windows with RMS below this are treated as silence.
    pub noise_floor: f32,
    /// A lag is a candidate only if its correlation exceeds this.
    pub lag_threshold: f64,
    /// The best candidate must exceed this to be reported.
    pub acceptance_floor: f64,
    /// Window length used when the caller gives no duration.
    pub max_window_secs: f64,
    pub fallback_hz: f32,
    pub locked_confidence: f32,
    pub unlocked_confidence: f32,
    pub silent_confidence: f32,
    /// Stop scanning once the first accepted correlation peak has passed.
    /// Without it, later period multiples that land closer to an integer lag
    /// win and the detector reports a subharmonic.
    pub stop_at_first_peak: bool,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            noise_floor: 0.01,
            lag_threshold: 0.9,
            acceptance_floor: 0.01,
            max_window_secs: 2.0,
            fallback_hz: 440.0,
            locked_confidence: 0.8,
            unlocked_confidence: 0.3,
            silent_confidence: 0.1,
            stop_at_first_peak: true,
        }
    }
}

/// A fundamental-frequency estimation strategy.
///
/// Implementations receive a window that already passed the noise gate and
/// return `None` when they cannot lock onto a periodic signal.
pub trait FrequencyEstimator: Send + Sync {
    fn estimate(&self, window: &[f32], sample_rate: u32, config: &DetectorConfig) -> Option<f32>;
}

/// Time-domain autocorrelation using mean absolute difference.
///
/// For each lag up to half the window the score is
/// `1 - sum(|x[i] - x[i + lag]|) / half` over the first half of the window.
/// A lag becomes the candidate when its score beats the lag threshold, the
/// previous lag's score and the best score so far.
#[derive(Debug, Clone, Copy, Default)]
pub struct Autocorrelation;

impl Autocorrelation {
    fn correlation_at(window: &[f32], half: usize, offset: usize) -> f64 {
        let diff: f64 = window[..half]
            .iter()
            .zip(&window[offset..offset + half])
            .map(|(&a, &b)| (a as f64 - b as f64).abs())
            .sum();
        1.0 - diff / half as f64
    }
}

impl FrequencyEstimator for Autocorrelation {
    fn estimate(&self, window: &[f32], sample_rate: u32, config: &DetectorConfig) -> Option<f32> {
        let half = window.len() / 2;
        let mut best_offset = None;
        let mut best_correlation = 0.0;
        let mut last_correlation = 1.0;

        let mut block_start = 1;
        'scan: while block_start < half {
            let block_end = (block_start + LAG_BLOCK).min(half);
            let scores: Vec<f64> = (block_start..block_end)
                .into_par_iter()
                .map(|offset| Self::correlation_at(window, half, offset))
                .collect();

            for (offset, correlation) in (block_start..block_end).zip(scores) {
                if correlation > config.lag_threshold && correlation > last_correlation {
                    if correlation > best_correlation {
                        best_correlation = correlation;
                        best_offset = Some(offset);
                    }
                } else if config.stop_at_first_peak && best_offset.is_some() {
                    break 'scan;
                }
                last_correlation = correlation;
            }
            block_start = block_end;
        }

        log::debug!(
            "autocorrelation: best offset {:?}, correlation {:.4}",
            best_offset,
            best_correlation
        );

        match best_offset {
            Some(offset) if best_correlation > config.acceptance_floor => {
                Some(sample_rate as f32 / offset as f32)
            }
            _ => None,
        }
    }
}

/// YIN estimator with parabolic interpolation.
///
/// Only the first `frame_size` samples of the window are examined, which
/// keeps the cost fixed regardless of the window length.
#[derive(Debug, Clone, Copy)]
pub struct Yin {
    pub frame_size: usize,
    /// Dips shallower than this are treated as noise.
    pub clarity_threshold: f32,
}

impl Default for Yin {
    fn default() -> Self {
        Self {
            frame_size: 4096,
            clarity_threshold: 0.1,
        }
    }
}

impl FrequencyEstimator for Yin {
    fn estimate(&self, window: &[f32], sample_rate: u32, _config: &DetectorConfig) -> Option<f32> {
        let signal = &window[..window.len().min(self.frame_size)];
        let half = signal.len() / 2;
        if half < 3 {
            return None;
        }

        // Difference function
        let mut yin_buffer = vec![0.0f32; half];
        for (tau, slot) in yin_buffer.iter_mut().enumerate().skip(1) {
            *slot = (0..half)
                .map(|i| {
                    let delta = signal[i] - signal[i + tau];
                    delta * delta
                })
                .sum();
        }

        // Cumulative mean normalized difference
        let mut running_sum = 0.0;
        yin_buffer[0] = 1.0;
        for (tau, value) in yin_buffer.iter_mut().enumerate().skip(1) {
            running_sum += *value;
            if running_sum != 0.0 {
                *value *= tau as f32 / running_sum;
            } else {
                *value = 1.0;
            }
        }

        // First dip near the global minimum, then walk down into it
        let min_val = yin_buffer
            .iter()
            .skip(1)
            .copied()
            .fold(f32::INFINITY, f32::min);
        let threshold = min_val + 0.05;

        let mut period = (2..half)
            .find(|&tau| yin_buffer[tau] < threshold && yin_buffer[tau] < yin_buffer[tau - 1])?;
        while period + 1 < half && yin_buffer[period + 1] < yin_buffer[period] {
            period += 1;
        }

        if yin_buffer[period] > self.clarity_threshold || period + 1 >= half {
            return None;
        }

        let y1 = yin_buffer[period - 1];
        let y2 = yin_buffer[period];
        let y3 = yin_buffer[period + 1];
        let denom = y1 - 2.0 * y2 + y3;
        let period_float = if denom != 0.0 {
            period as f32 + (y1 - y3) / (2.0 * denom)
        } else {
            period as f32
        };

        let frequency = sample_rate as f32 / period_float;
        (frequency.is_finite() && frequency > 0.0).then_some(frequency)
    }
}

/// Detects the dominant frequency of audio buffers.
#[derive(Debug, Clone, Default)]
pub struct PitchDetector<E = Autocorrelation> {
    config: DetectorConfig,
    estimator: E,
}

impl PitchDetector<Autocorrelation> {
    pub fn new(config: DetectorConfig) -> Self {
        Self::with_estimator(config, Autocorrelation)
    }
}

impl<E: FrequencyEstimator> PitchDetector<E> {
    pub fn with_estimator(config: DetectorConfig, estimator: E) -> Self {
        Self { config, estimator }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Estimates the dominant frequency of the first channel.
    ///
    /// # Arguments
    /// * `start_secs` - Window start, clamped to the buffer; negative values
    ///   start at the first frame
    /// * `duration_secs` - Window length; defaults to `max_window_secs` or
    ///   whatever remains of the buffer
    ///
    /// # Errors
    /// * `InvalidInput` - non-finite start, or negative or non-finite duration
    /// * `EmptyWindow` - the window contains no samples
    pub fn detect_dominant_frequency(
        &self,
        buffer: &AudioBuffer,
        start_secs: f64,
        duration_secs: Option<f64>,
    ) -> RetuneResult<DetectionResult> {
        let range = buffer.window(start_secs, duration_secs, self.config.max_window_secs)?;
        if range.is_empty() {
            return Err(RetuneError::EmptyWindow {
                start: range.start,
                end: range.end,
            });
        }

        let samples = buffer.channel(0).ok_or(RetuneError::EmptyBuffer)?;
        log::debug!(
            "analysing frames {}..{} at {} Hz",
            range.start,
            range.end,
            buffer.sample_rate()
        );
        Ok(self.detect_in_samples(&samples[range], buffer.sample_rate()))
    }

    /// Runs the noise gate and the estimator over raw samples.
    pub fn detect_in_samples(&self, window: &[f32], sample_rate: u32) -> DetectionResult {
        let rms = if window.is_empty() {
            0.0
        } else {
            (window.iter().map(|&s| s as f64 * s as f64).sum::<f64>() / window.len() as f64).sqrt()
        };

        if rms < self.config.noise_floor as f64 {
            log::debug!("rms {:.5} below noise floor, using fallback", rms);
            return DetectionResult {
                frequency: self.config.fallback_hz,
                confidence: self.config.silent_confidence,
            };
        }

        match self.estimator.estimate(window, sample_rate, &self.config) {
            Some(frequency) if frequency.is_finite() && frequency > 0.0 => DetectionResult {
                frequency,
                confidence: self.config.locked_confidence,
            },
            _ => DetectionResult {
                frequency: self.config.fallback_hz,
                confidence: self.config.unlocked_confidence,
            },
        }
    }
}

/// [`PitchDetector::detect_dominant_frequency`] with default thresholds.
pub fn detect_dominant_frequency(
    buffer: &AudioBuffer,
    start_secs: f64,
    duration_secs: Option<f64>,
) -> RetuneResult<DetectionResult> {
    PitchDetector::new(DetectorConfig::default()).detect_dominant_frequency(
        buffer,
        start_secs,
        duration_secs,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn generate_sine(freq: f32, sample_rate: u32, duration: f32) -> Vec<f32> {
        let num_samples = (sample_rate as f32 * duration) as usize;
        (0..num_samples)
            .map(|i| (2.0 * PI * freq * i as f32 / sample_rate as f32).sin())
            .collect()
    }

    fn assert_within(detected: f32, expected: f32, tolerance: f32) {
        assert!(
            (detected - expected).abs() <= expected * tolerance,
            "expected ~{expected} Hz, got {detected} Hz"
        );
    }

    #[test]
    fn silence_falls_back() {
        for (rate, frames) in [(8000, 1), (44100, 44100), (48000, 7)] {
            let buffer = AudioBuffer::silent(rate, 2, frames).unwrap();
            let result = detect_dominant_frequency(&buffer, 0.0, None).unwrap();
            assert_eq!(result.frequency, 440.0);
            assert!(result.confidence <= 0.3);
        }
    }

    #[test]
    fn detects_pure_tones() {
        for freq in [220.0, 440.0, 523.25] {
            let buffer = AudioBuffer::mono(44100, generate_sine(freq, 44100, 1.0)).unwrap();
            let result = detect_dominant_frequency(&buffer, 0.0, None).unwrap();
            assert_within(result.frequency, freq, 0.02);
            assert_eq!(result.confidence, 0.8);
        }
    }

    #[test]
    fn detects_inside_a_region() {
        let mut samples = vec![0.0; 22050];
        samples.extend(generate_sine(330.0, 44100, 0.5));
        let buffer = AudioBuffer::mono(44100, samples).unwrap();

        let region = detect_dominant_frequency(&buffer, 0.5, Some(0.5)).unwrap();
        assert_within(region.frequency, 330.0, 0.02);

        let lead_in = detect_dominant_frequency(&buffer, 0.0, Some(0.25)).unwrap();
        assert_eq!(lead_in.frequency, 440.0);
        assert_eq!(lead_in.confidence, 0.1);
    }

    #[test]
    fn aperiodic_signal_is_low_confidence() {
        // A single ramp has no repeating period.
        let samples: Vec<f32> = (0..8000).map(|i| i as f32 / 8000.0 - 0.5).collect();
        let buffer = AudioBuffer::mono(8000, samples).unwrap();
        let result = detect_dominant_frequency(&buffer, 0.0, None).unwrap();
        assert_eq!(result.frequency, 440.0);
        assert_eq!(result.confidence, 0.3);
    }

    #[test]
    fn full_scan_locks_onto_a_period_multiple() {
        let config = DetectorConfig {
            stop_at_first_peak: false,
            ..DetectorConfig::default()
        };
        let buffer = AudioBuffer::mono(44100, generate_sine(440.0, 44100, 1.0)).unwrap();
        let result = PitchDetector::new(config)
            .detect_dominant_frequency(&buffer, 0.0, None)
            .unwrap();

        let multiple = 440.0 / result.frequency;
        assert!(multiple.round() >= 1.0);
        assert!((multiple - multiple.round()).abs() < 0.02, "ratio {multiple}");
    }

    #[test]
    fn empty_window_is_an_error() {
        let buffer = AudioBuffer::mono(44100, generate_sine(440.0, 44100, 0.1)).unwrap();
        assert!(matches!(
            detect_dominant_frequency(&buffer, 5.0, None),
            Err(RetuneError::EmptyWindow { .. })
        ));
        let empty = AudioBuffer::mono(44100, Vec::new()).unwrap();
        assert!(detect_dominant_frequency(&empty, 0.0, None).is_err());
        assert!(detect_dominant_frequency(&buffer, f64::NAN, None).is_err());
    }

    #[test]
    fn negative_start_reads_from_the_first_frame() {
        let buffer = AudioBuffer::mono(44100, generate_sine(440.0, 44100, 0.25)).unwrap();
        let clamped = detect_dominant_frequency(&buffer, -0.1, None).unwrap();
        let from_zero = detect_dominant_frequency(&buffer, 0.0, None).unwrap();
        assert_eq!(clamped.frequency, from_zero.frequency);
        assert_eq!(clamped.confidence, 0.8);
    }

    #[test]
    fn yin_estimator_agrees() {
        let detector = PitchDetector::with_estimator(DetectorConfig::default(), Yin::default());
        for freq in [110.0, 440.0, 880.0] {
            let buffer = AudioBuffer::mono(44100, generate_sine(freq, 44100, 0.5)).unwrap();
            let result = detector.detect_dominant_frequency(&buffer, 0.0, None).unwrap();
            assert_within(result.frequency, freq, 0.01);
            assert_eq!(result.confidence, 0.8);
        }
    }
}
