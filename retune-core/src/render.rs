//! # Offline Rendering Module
//!
//! An explicitly constructed rendering context that plays a borrowed source
//! buffer through a rate-controlled playback node into its own destination.
//! Each retune builds and consumes its own context, so concurrent renders
//! never share state.

use std::sync::atomic::{AtomicUsize, Ordering};

use rayon::prelude::*;

use crate::buffer::AudioBuffer;
use crate::error::{RetuneError, RetuneResult};

/// Frames rendered per block between progress reports.
const RENDER_BLOCK: usize = 1 << 16;

/// Most f32 samples, summed over channels, a single render may allocate.
pub const MAX_RENDER_SAMPLES: usize = 1 << 28;

/// Rejects renders of `frames x channels` samples over [`MAX_RENDER_SAMPLES`].
pub(crate) fn ensure_render_size(frames: usize, channels: usize) -> RetuneResult<()> {
    match frames.checked_mul(channels) {
        Some(samples) if samples <= MAX_RENDER_SAMPLES => Ok(()),
        _ => Err(RetuneError::TooLarge {
            bytes: (frames as u64)
                .saturating_mul(channels as u64)
                .saturating_mul(std::mem::size_of::<f32>() as u64),
        }),
    }
}

/// Linearly interpolated read at a fractional frame position.
///
/// Positions outside the signal read as silence.
pub(crate) fn interpolate(samples: &[f32], position: f64) -> f32 {
    if !(position >= 0.0) {
        return 0.0;
    }
    let index = position.floor() as usize;
    let Some(&s0) = samples.get(index) else {
        return 0.0;
    };
    let frac = (position - index as f64) as f32;
    if frac == 0.0 {
        return s0;
    }
    let s1 = samples.get(index + 1).copied().unwrap_or(0.0);
    s0 + (s1 - s0) * frac
}

/// Plays a borrowed buffer at a fixed playback rate.
///
/// A rate of 2.0 reads the source twice as fast: one octave up, half the
/// duration. Past the end of the source the node outputs silence.
#[derive(Debug, Clone, Copy)]
pub struct BufferSource<'a> {
    buffer: &'a AudioBuffer,
    playback_rate: f64,
}

impl<'a> BufferSource<'a> {
    /// # Errors
    /// * `InvalidInput` - the rate is zero, negative or not finite
    pub fn new(buffer: &'a AudioBuffer, playback_rate: f64) -> RetuneResult<Self> {
        if !(playback_rate.is_finite() && playback_rate > 0.0) {
            return Err(RetuneError::InvalidInput(format!(
                "playback rate must be positive, got {playback_rate}"
            )));
        }
        Ok(Self {
            buffer,
            playback_rate,
        })
    }

    pub fn playback_rate(&self) -> f64 {
        self.playback_rate
    }

    /// Source samples feeding destination channel `channel`.
    ///
    /// Mono sources feed every destination channel; a mono destination gets
    /// the average of all source channels.
    fn render_into(
        &self,
        channel: usize,
        destination_channels: usize,
        step: f64,
        first_frame: usize,
        out: &mut [f32],
    ) {
        let sources = self.buffer.channels();
        for (i, sample) in out.iter_mut().enumerate() {
            let position = (first_frame + i) as f64 * step;
            *sample = if sources.len() == destination_channels || sources.len() == 1 {
                interpolate(&sources[channel.min(sources.len() - 1)], position)
            } else if destination_channels == 1 {
                sources.iter().map(|s| interpolate(s, position)).sum::<f32>()
                    / sources.len() as f32
            } else {
                sources
                    .get(channel)
                    .map_or(0.0, |s| interpolate(s, position))
            };
        }
    }
}

/// A one-shot offline rendering context.
///
/// Owns its destination; [`render`](Self::render) consumes the context and
/// returns the rendered buffer. Dropping it unrendered releases everything.
#[derive(Debug)]
pub struct OfflineContext<'a> {
    num_channels: usize,
    length: usize,
    sample_rate: u32,
    source: Option<BufferSource<'a>>,
}

impl<'a> OfflineContext<'a> {
    /// # Errors
    /// * `InvalidInput` - zero channels or a zero sample rate
    /// * `TooLarge` - the destination would exceed [`MAX_RENDER_SAMPLES`]
    pub fn new(num_channels: usize, length: usize, sample_rate: u32) -> RetuneResult<Self> {
        if num_channels == 0 || sample_rate == 0 {
            return Err(RetuneError::InvalidInput(format!(
                "offline context needs channels and a sample rate, got {num_channels} channels at {sample_rate} Hz"
            )));
        }
        ensure_render_size(length, num_channels)?;
        Ok(Self {
            num_channels,
            length,
            sample_rate,
            source: None,
        })
    }

    pub fn length(&self) -> usize {
        self.length
    }

    /// Connects `source` to the destination, replacing any earlier source.
    pub fn connect(&mut self, source: BufferSource<'a>) {
        self.source = Some(source);
    }

    pub fn render(self) -> RetuneResult<AudioBuffer> {
        self.render_with_progress(&|_| {})
    }

    /// Renders every frame, reporting the completed fraction after each block.
    ///
    /// # Errors
    /// * `RenderFailed` - the context has zero frames to render
    pub fn render_with_progress(
        self,
        progress: &(dyn Fn(f32) + Sync),
    ) -> RetuneResult<AudioBuffer> {
        if self.length == 0 {
            return Err(RetuneError::RenderFailed(
                "offline context has no frames to render".into(),
            ));
        }

        let mut channels = vec![vec![0.0f32; self.length]; self.num_channels];
        if let Some(source) = &self.source {
            // A source recorded at another rate is read proportionally faster or slower.
            let step = source.playback_rate * source.buffer.sample_rate() as f64
                / self.sample_rate as f64;
            let done = AtomicUsize::new(0);
            let total = self.length * self.num_channels;

            channels.par_iter_mut().enumerate().for_each(|(channel, out)| {
                for (block, chunk) in out.chunks_mut(RENDER_BLOCK).enumerate() {
                    let first_frame = block * RENDER_BLOCK;
                    source.render_into(channel, self.num_channels, step, first_frame, chunk);
                    let finished = done.fetch_add(chunk.len(), Ordering::Relaxed) + chunk.len();
                    progress(finished as f32 / total as f32);
                }
            });
        } else {
            progress(1.0);
        }

        log::debug!(
            "rendered {} frames x {} channels at {} Hz",
            self.length,
            self.num_channels,
            self.sample_rate
        );
        AudioBuffer::new(self.sample_rate, channels)
    }
}
