// retune-core/src/lib.rs

//! The core logic for the retuning engine.
//! This crate detects the dominant frequency of a clip, retunes it to a
//! target frequency (varispeed or tempo-preserving) and encodes the result
//! as 16-bit PCM WAV. It is completely headless: no device I/O and no
//! file-system access.

pub mod buffer;
pub mod config;
pub mod error;
pub mod fft;
pub mod pitch;
pub mod presets;
pub mod render;
pub mod retune;
pub mod tuning;
pub mod vocoder;
pub mod wav;
pub mod worker;

use serde::Serialize;

pub use buffer::AudioBuffer;
pub use config::EngineConfig;
pub use error::{RetuneError, RetuneResult};
pub use pitch::{detect_dominant_frequency, DetectionResult, DetectorConfig, PitchDetector};
pub use presets::{find_preset, SacredFrequency, SACRED_FREQUENCIES};
pub use retune::{retune_audio, RetuneMode, RetuneRequest, Retuner};
pub use tuning::{
    calculate_frequency_deviation, frequency_to_note, pitch_shift_ratio, FrequencyDeviation,
};
pub use wav::buffer_to_wave;
pub use worker::{JobId, RenderEvent, RenderWorker};

use pitch::FrequencyEstimator;
use tuning::find_nearest_note;

/// Everything known about one analysed region.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    /// The detected frequency in Hz.
    pub frequency: f32,
    /// The confidence of the detected frequency (0.0 to 1.0).
    pub confidence: f32,
    /// Chromatic note name, e.g. `"A4"`.
    pub note: String,
    /// The nearest piano key.
    pub nearest_note: String,
    pub nearest_note_hz: f32,
    /// Offset from the nearest key in cents.
    pub cents_from_nearest: f32,
    pub deviation_432: FrequencyDeviation,
    pub deviation_440: FrequencyDeviation,
}

/// Detects over `[start, start + duration)` and names the result.
pub fn analyze_region<E: FrequencyEstimator>(
    detector: &PitchDetector<E>,
    buffer: &AudioBuffer,
    start_secs: f64,
    duration_secs: Option<f64>,
) -> RetuneResult<AnalysisReport> {
    let detection = detector.detect_dominant_frequency(buffer, start_secs, duration_secs)?;
    let frequency = detection.frequency;
    let (nearest_note, nearest_note_hz) = find_nearest_note(frequency);

    Ok(AnalysisReport {
        frequency,
        confidence: detection.confidence,
        note: frequency_to_note(frequency),
        cents_from_nearest: calculate_frequency_deviation(frequency, nearest_note_hz)?.cents,
        nearest_note,
        nearest_note_hz,
        deviation_432: calculate_frequency_deviation(frequency, 432.0)?,
        deviation_440: calculate_frequency_deviation(frequency, 440.0)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn reports_a_region() {
        let samples: Vec<f32> = (0..44100)
            .map(|i| 0.7 * (2.0 * std::f32::consts::PI * 432.0 * i as f32 / 44100.0).sin())
            .collect();
        let buffer = AudioBuffer::mono(44100, samples).unwrap();
        let detector = PitchDetector::new(DetectorConfig::default());

        let report = analyze_region(&detector, &buffer, 0.0, Some(0.5)).unwrap();
        assert_eq!(report.confidence, 0.8);
        assert_eq!(report.note, "A4");
        assert_eq!(report.nearest_note, "A4");
        assert_abs_diff_eq!(report.nearest_note_hz, 440.0, epsilon = 1e-3);
        assert_abs_diff_eq!(report.deviation_432.cents, 0.0, epsilon = 10.0);
        assert!(report.deviation_440.cents < 0.0);
        assert_abs_diff_eq!(report.cents_from_nearest, report.deviation_440.cents, epsilon = 1e-3);
    }

    #[test]
    fn silent_regions_report_the_fallback() {
        let buffer = AudioBuffer::silent(8000, 1, 8000).unwrap();
        let report = analyze_region(
            &PitchDetector::new(DetectorConfig::default()),
            &buffer,
            0.0,
            None,
        )
        .unwrap();
        assert_eq!(report.frequency, 440.0);
        assert_eq!(report.confidence, 0.1);
        assert_eq!(report.deviation_440.cents, 0.0);
    }
}
