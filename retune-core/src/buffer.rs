//! # Audio Buffer Module
//!
//! A decoded, channel-separated block of 32-bit float PCM. The engine only
//! ever borrows a source buffer and hands back a new one; nothing here
//! mutates audio in place.

use std::ops::Range;

use crate::error::{RetuneError, RetuneResult};

/// Decoded multi-channel audio at a fixed sample rate.
///
/// All channels are guaranteed to hold the same number of frames.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    sample_rate: u32,
    channels: Vec<Vec<f32>>,
}

impl AudioBuffer {
    /// Builds a buffer from per-channel sample vectors.
    ///
    /// # Errors
    /// * `EmptyBuffer` - no channels were given
    /// * `InvalidInput` - the sample rate is zero
    /// * `ChannelLengthMismatch` - channels disagree on frame count
    pub fn new(sample_rate: u32, channels: Vec<Vec<f32>>) -> RetuneResult<Self> {
        if channels.is_empty() {
            return Err(RetuneError::EmptyBuffer);
        }
        if sample_rate == 0 {
            return Err(RetuneError::InvalidInput("sample rate must be positive".into()));
        }

        let expected = channels[0].len();
        if let Some((channel, samples)) = channels
            .iter()
            .enumerate()
            .find(|(_, c)| c.len() != expected)
        {
            return Err(RetuneError::ChannelLengthMismatch {
                channel,
                expected,
                actual: samples.len(),
            });
        }

        Ok(Self {
            sample_rate,
            channels,
        })
    }

    /// Single-channel convenience constructor.
    pub fn mono(sample_rate: u32, samples: Vec<f32>) -> RetuneResult<Self> {
        Self::new(sample_rate, vec![samples])
    }

    /// A silent buffer of `frames` frames on every channel.
    pub fn silent(sample_rate: u32, num_channels: usize, frames: usize) -> RetuneResult<Self> {
        Self::new(sample_rate, vec![vec![0.0; frames]; num_channels])
    }

    /// Deinterleaves `frame`-ordered samples into channels.
    pub fn from_interleaved(
        sample_rate: u32,
        num_channels: usize,
        samples: &[f32],
    ) -> RetuneResult<Self> {
        if num_channels == 0 {
            return Err(RetuneError::EmptyBuffer);
        }
        if samples.len() % num_channels != 0 {
            return Err(RetuneError::InvalidInput(format!(
                "{} interleaved samples do not divide into {} channels",
                samples.len(),
                num_channels
            )));
        }

        let frames = samples.len() / num_channels;
        let mut channels = vec![Vec::with_capacity(frames); num_channels];
        for (i, &sample) in samples.iter().enumerate() {
            channels[i % num_channels].push(sample);
        }
        Self::new(sample_rate, channels)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    /// Number of frames (samples per channel).
    pub fn len(&self) -> usize {
        self.channels[0].len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn duration_secs(&self) -> f64 {
        self.len() as f64 / self.sample_rate as f64
    }

    pub fn channel(&self, index: usize) -> Option<&[f32]> {
        self.channels.get(index).map(Vec::as_slice)
    }

    pub fn channels(&self) -> &[Vec<f32>] {
        &self.channels
    }

    pub fn into_channels(self) -> Vec<Vec<f32>> {
        self.channels
    }

    /// Frame-interleaved copy of the samples (L R L R ... for stereo).
    pub fn to_interleaved(&self) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.len() * self.num_channels());
        for frame in 0..self.len() {
            for channel in &self.channels {
                out.push(channel[frame]);
            }
        }
        out
    }

    /// Converts a time window into a frame range clamped to the buffer.
    ///
    /// A negative start is clamped to the first frame. With `duration_secs`
    /// omitted the window runs to `default_secs` past the start, or to the
    /// end of the buffer if that comes first.
    ///
    /// # Errors
    /// * `InvalidInput` - non-finite start, or negative or non-finite duration
    pub fn window(
        &self,
        start_secs: f64,
        duration_secs: Option<f64>,
        default_secs: f64,
    ) -> RetuneResult<Range<usize>> {
        if !start_secs.is_finite() {
            return Err(RetuneError::InvalidInput(format!(
                "start time must be a finite number of seconds, got {start_secs}"
            )));
        }
        let start_secs = start_secs.max(0.0);
        let span_secs = duration_secs.unwrap_or(default_secs);
        if !span_secs.is_finite() || span_secs < 0.0 {
            return Err(RetuneError::InvalidInput(format!(
                "duration must be a non-negative number of seconds, got {span_secs}"
            )));
        }

        let rate = self.sample_rate as f64;
        let start = ((start_secs * rate).floor() as usize).min(self.len());
        let span = (span_secs * rate).floor() as usize;
        let end = start.saturating_add(span).min(self.len());
        Ok(start..end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_mismatched_channels() {
        let err = AudioBuffer::new(44100, vec![vec![0.0; 4], vec![0.0; 3]]).unwrap_err();
        match err {
            RetuneError::ChannelLengthMismatch {
                channel,
                expected,
                actual,
            } => {
                assert_eq!(channel, 1);
                assert_eq!(expected, 4);
                assert_eq!(actual, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn rejects_no_channels_and_zero_rate() {
        assert!(matches!(
            AudioBuffer::new(44100, Vec::new()),
            Err(RetuneError::EmptyBuffer)
        ));
        assert!(matches!(
            AudioBuffer::mono(0, vec![0.0]),
            Err(RetuneError::InvalidInput(_))
        ));
    }

    #[test]
    fn interleaving_round_trips() {
        let buffer = AudioBuffer::from_interleaved(48000, 2, &[0.1, -0.1, 0.2, -0.2]).unwrap();
        assert_eq!(buffer.num_channels(), 2);
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.channel(1), Some(&[-0.1, -0.2][..]));
        assert_eq!(buffer.to_interleaved(), vec![0.1, -0.1, 0.2, -0.2]);
    }

    #[test]
    fn window_defaults_and_clamps() {
        let buffer = AudioBuffer::silent(1000, 1, 5000).unwrap();

        assert_eq!(buffer.window(0.0, None, 2.0).unwrap(), 0..2000);
        assert_eq!(buffer.window(4.0, None, 2.0).unwrap(), 4000..5000);
        assert_eq!(buffer.window(1.0, Some(0.5), 2.0).unwrap(), 1000..1500);
        // Explicit durations are not capped by the default.
        assert_eq!(buffer.window(0.0, Some(3.0), 2.0).unwrap(), 0..3000);
        // Starting past the end clamps to an empty range.
        assert_eq!(buffer.window(9.0, None, 2.0).unwrap(), 5000..5000);
        assert_eq!(buffer.window(-1.0, None, 2.0).unwrap(), 0..2000);
        assert_eq!(buffer.window(-0.5, Some(1.0), 2.0).unwrap(), 0..1000);
        assert!(buffer.window(f64::NEG_INFINITY, None, 2.0).is_err());
        assert!(buffer.window(0.0, Some(f64::NAN), 2.0).is_err());
    }
}
