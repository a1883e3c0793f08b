//! # Retune Module
//!
//! Moves a clip from an assumed base tuning (usually A = 440 Hz) to a target
//! frequency. Two modes:
//! - **Pure** (varispeed): the clip is played back at `target / base`, so
//!   pitch and duration change together.
//! - **Pitch only**: a phase vocoder shifts the pitch and the duration stays
//!   exactly the same.
//!
//! The source buffer is only borrowed; every call renders a new buffer in its
//! own [`OfflineContext`].

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::buffer::AudioBuffer;
use crate::error::{ensure_positive_hz, RetuneError, RetuneResult};
use crate::render::{BufferSource, OfflineContext};
use crate::tuning::{pitch_shift_ratio, ratio_to_semitones, semitones_to_ratio};
use crate::vocoder::{PhaseVocoder, VocoderConfig};

/// Base tuning assumed when the caller does not supply one.
pub const DEFAULT_BASE_HZ: f64 = 440.0;

/// How the pitch change is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RetuneMode {
    /// Varispeed: pitch and tempo scale together.
    #[default]
    Pure,
    /// Pitch moves, tempo is preserved.
    PitchOnly,
}

impl RetuneMode {
    pub fn preserves_tempo(self) -> bool {
        matches!(self, RetuneMode::PitchOnly)
    }
}

impl fmt::Display for RetuneMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetuneMode::Pure => write!(f, "pure"),
            RetuneMode::PitchOnly => write!(f, "pitch-only"),
        }
    }
}

impl FromStr for RetuneMode {
    type Err = RetuneError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pure" | "varispeed" => Ok(RetuneMode::Pure),
            "pitch-only" | "pitch_only" | "pitchonly" => Ok(RetuneMode::PitchOnly),
            other => Err(RetuneError::InvalidInput(format!(
                "unknown retune mode '{other}', expected 'pure' or 'pitch-only'"
            ))),
        }
    }
}

/// One retune invocation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetuneRequest {
    pub target_hz: f64,
    pub base_hz: f64,
    pub mode: RetuneMode,
}

impl RetuneRequest {
    /// Retune to `target_hz` from 440 Hz in varispeed mode.
    pub fn new(target_hz: f64) -> Self {
        Self {
            target_hz,
            base_hz: DEFAULT_BASE_HZ,
            mode: RetuneMode::Pure,
        }
    }

    pub fn with_base_hz(mut self, base_hz: f64) -> Self {
        self.base_hz = base_hz;
        self
    }

    pub fn with_mode(mut self, mode: RetuneMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn validate(&self) -> RetuneResult<()> {
        ensure_positive_hz("target frequency", self.target_hz)?;
        ensure_positive_hz("base frequency", self.base_hz)?;
        Ok(())
    }

    /// `target / base`
    pub fn ratio(&self) -> RetuneResult<f64> {
        pitch_shift_ratio(self.base_hz, self.target_hz)
    }

    pub fn semitones(&self) -> RetuneResult<f64> {
        self.ratio().map(ratio_to_semitones)
    }
}

/// Renders retuned copies of audio buffers.
#[derive(Debug, Clone, Default)]
pub struct Retuner {
    vocoder: VocoderConfig,
}

impl Retuner {
    pub fn new(vocoder: VocoderConfig) -> Self {
        Self { vocoder }
    }

    pub fn retune_audio(
        &self,
        source: &AudioBuffer,
        request: &RetuneRequest,
    ) -> RetuneResult<AudioBuffer> {
        self.retune_with_progress(source, request, &|_| {})
    }

    /// Retunes `source` per `request`, reporting progress in `[0, 1]`.
    ///
    /// # Errors
    /// * `InvalidFrequency` - target or base is not a positive frequency
    /// * `InvalidInput` - the source has no frames, or the ratio is beyond
    ///   what the vocoder can shift
    /// * `TooLarge` - the output would exceed the render limit
    /// * `RenderFailed` - the render produced no audio
    pub fn retune_with_progress(
        &self,
        source: &AudioBuffer,
        request: &RetuneRequest,
        progress: &(dyn Fn(f32) + Sync),
    ) -> RetuneResult<AudioBuffer> {
        request.validate()?;
        let semitones = request.semitones()?;
        log::info!(
            "retuning {:.3}s clip from {} Hz to {} Hz ({:+.3} semitones, {})",
            source.duration_secs(),
            request.base_hz,
            request.target_hz,
            semitones,
            request.mode
        );

        let output = self.apply_pitch_shift(
            source,
            semitones,
            request.mode.preserves_tempo(),
            progress,
        )?;

        log::info!("retune finished: {:.3}s output", output.duration_secs());
        Ok(output)
    }

    /// Shifts `source` by `semitones`.
    ///
    /// Without `preserve_tempo` the output is `floor(len / ratio)` frames
    /// long; with it the output has exactly the source length.
    pub fn apply_pitch_shift(
        &self,
        source: &AudioBuffer,
        semitones: f64,
        preserve_tempo: bool,
        progress: &(dyn Fn(f32) + Sync),
    ) -> RetuneResult<AudioBuffer> {
        if !semitones.is_finite() {
            return Err(RetuneError::InvalidInput(format!(
                "semitone shift must be finite, got {semitones}"
            )));
        }
        if source.is_empty() {
            return Err(RetuneError::InvalidInput("source buffer has no frames".into()));
        }

        let ratio = semitones_to_ratio(semitones);
        let output = if preserve_tempo {
            self.shift_preserving_tempo(source, ratio, progress)?
        } else {
            let length = (source.len() as f64 / ratio).floor() as usize;
            let mut context =
                OfflineContext::new(source.num_channels(), length, source.sample_rate())?;
            context.connect(BufferSource::new(source, ratio)?);
            context.render_with_progress(progress)?
        };

        if output.is_empty() {
            log::warn!("retune rendered an empty buffer");
            return Err(RetuneError::RenderFailed("render produced no audio".into()));
        }
        Ok(output)
    }

    fn shift_preserving_tempo(
        &self,
        source: &AudioBuffer,
        ratio: f64,
        progress: &(dyn Fn(f32) + Sync),
    ) -> RetuneResult<AudioBuffer> {
        let vocoder = PhaseVocoder::new(&self.vocoder)?;
        let channels = source.num_channels();
        let finished = AtomicUsize::new(0);

        let shifted = source
            .channels()
            .par_iter()
            .map(|samples| {
                let mut reported = 0;
                vocoder.pitch_shift(samples, ratio, &mut |done, total| {
                    let step = done - reported;
                    let all = finished.fetch_add(step, Ordering::Relaxed) + step;
                    reported = done;
                    progress(all as f32 / (total * channels) as f32);
                })
            })
            .collect::<RetuneResult<Vec<_>>>()?;

        AudioBuffer::new(source.sample_rate(), shifted)
    }
}

/// [`Retuner::retune_audio`] with the default vocoder framing.
pub fn retune_audio(source: &AudioBuffer, request: &RetuneRequest) -> RetuneResult<AudioBuffer> {
    Retuner::default().retune_audio(source, request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pitch::detect_dominant_frequency;
    use std::f32::consts::PI;
    use std::sync::Mutex;

    fn sine_buffer(freq: f32, rate: u32, secs: f32, channels: usize) -> AudioBuffer {
        let frames = (rate as f32 * secs) as usize;
        let samples: Vec<f32> = (0..frames)
            .map(|i| 0.8 * (2.0 * PI * freq * i as f32 / rate as f32).sin())
            .collect();
        AudioBuffer::new(rate, vec![samples; channels]).unwrap()
    }

    #[test]
    fn request_math() {
        let request = RetuneRequest::new(432.0);
        assert_eq!(request.base_hz, 440.0);
        assert_eq!(request.mode, RetuneMode::Pure);
        assert!((request.ratio().unwrap() - 432.0 / 440.0).abs() < 1e-12);
        assert!((request.semitones().unwrap() + 0.3177).abs() < 1e-3);

        assert!(RetuneRequest::new(0.0).validate().is_err());
        assert!(RetuneRequest::new(432.0).with_base_hz(-1.0).validate().is_err());
    }

    #[test]
    fn parses_modes() {
        assert_eq!("pure".parse::<RetuneMode>().unwrap(), RetuneMode::Pure);
        assert_eq!("Pitch-Only".parse::<RetuneMode>().unwrap(), RetuneMode::PitchOnly);
        assert!("fast".parse::<RetuneMode>().is_err());
        assert_eq!(RetuneMode::PitchOnly.to_string(), "pitch-only");
    }

    #[test]
    fn varispeed_follows_the_duration_law() {
        let source = sine_buffer(440.0, 8000, 1.0, 2);
        for target in [174.0, 432.0, 528.0, 963.0] {
            let out = retune_audio(&source, &RetuneRequest::new(target)).unwrap();
            assert_eq!(out.num_channels(), 2);
            assert_eq!(out.sample_rate(), 8000);
            let expected = source.len() as f64 * 440.0 / target;
            assert!(
                (out.len() as f64 - expected).abs() <= 1.0,
                "{} frames for target {target}, expected {expected}",
                out.len()
            );
        }
    }

    #[test]
    fn varispeed_moves_the_pitch() {
        let source = sine_buffer(440.0, 44100, 1.0, 1);
        let out = retune_audio(&source, &RetuneRequest::new(528.0)).unwrap();
        let detected = detect_dominant_frequency(&out, 0.0, None).unwrap();
        assert!((detected.frequency - 528.0).abs() < 528.0 * 0.02, "{}", detected.frequency);
    }

    #[test]
    fn pitch_only_keeps_duration() {
        let source = sine_buffer(440.0, 44100, 1.0, 2);
        let request = RetuneRequest::new(528.0).with_mode(RetuneMode::PitchOnly);
        let out = retune_audio(&source, &request).unwrap();

        assert_eq!(out.num_channels(), 2);
        assert_eq!(out.sample_rate(), 44100);
        assert_eq!(out.len(), source.len());

        let detected = detect_dominant_frequency(&out, 0.25, Some(0.5)).unwrap();
        assert!((detected.frequency - 528.0).abs() < 528.0 * 0.02, "{}", detected.frequency);
    }

    #[test]
    fn never_mutates_the_source() {
        let source = sine_buffer(440.0, 8000, 0.25, 1);
        let copy = source.clone();
        retune_audio(&source, &RetuneRequest::new(432.0)).unwrap();
        assert_eq!(source, copy);
    }

    #[test]
    fn degenerate_renders_fail() {
        // One frame shifted up cannot fill a single output frame.
        let source = AudioBuffer::mono(8000, vec![0.5]).unwrap();
        let err = retune_audio(&source, &RetuneRequest::new(880.0)).unwrap_err();
        assert!(matches!(err, RetuneError::RenderFailed(_)));

        let empty = AudioBuffer::mono(8000, Vec::new()).unwrap();
        assert!(matches!(
            retune_audio(&empty, &RetuneRequest::new(432.0)),
            Err(RetuneError::InvalidInput(_))
        ));
    }

    #[test]
    fn extreme_ratios_fail_before_allocating() {
        let source = sine_buffer(440.0, 44100, 1.0, 1);
        assert!(matches!(
            retune_audio(&source, &RetuneRequest::new(1e-9)),
            Err(RetuneError::TooLarge { .. })
        ));

        let request = RetuneRequest::new(440.0 * 2000.0).with_mode(RetuneMode::PitchOnly);
        assert!(matches!(
            retune_audio(&source, &request),
            Err(RetuneError::InvalidInput(_))
        ));
    }

    #[test]
    fn progress_reaches_completion_in_both_modes() {
        let source = sine_buffer(440.0, 8000, 0.5, 2);
        for mode in [RetuneMode::Pure, RetuneMode::PitchOnly] {
            let peak = Mutex::new(0.0f32);
            let request = RetuneRequest::new(432.0).with_mode(mode);
            Retuner::default()
                .retune_with_progress(&source, &request, &|f| {
                    let mut peak = peak.lock().unwrap();
                    *peak = peak.max(f);
                })
                .unwrap();
            let peak = peak.into_inner().unwrap();
            assert!((peak - 1.0).abs() < 1e-6, "{mode}: {peak}");
        }
    }
}
