//! # Playback Module
//!
//! Auditions a rendered buffer on the default output device using CPAL
//! (Cross-Platform Audio Library).

use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SupportedStreamConfigRange;
use retune_core::AudioBuffer;

/// Plays `buffer` to the end, blocking the calling thread.
///
/// # Errors
/// Fails when there is no output device or it cannot run f32 samples at
/// the buffer's sample rate.
pub fn play(buffer: &AudioBuffer) -> Result<()> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| anyhow!("No output device available"))?;

    log::info!("Using audio output device: {}", device.name()?);

    let configs = device.supported_output_configs()?.collect::<Vec<_>>();
    let sample_rate = buffer.sample_rate();
    let supported_config = find_supported_config(configs, buffer.num_channels(), sample_rate)
        .ok_or_else(|| anyhow!("No f32 output format at {sample_rate} Hz"))?;
    let config: cpal::StreamConfig = supported_config
        .with_sample_rate(cpal::SampleRate(sample_rate))
        .into();
    let device_channels = usize::from(config.channels);

    let source = buffer.channels().to_vec();
    let frames = buffer.len();
    let mut position = 0;
    let (done_tx, done_rx) = crossbeam_channel::bounded(1);

    let err_fn = |err| log::error!("An error occurred on the audio stream: {err}");

    let stream = device.build_output_stream(
        &config,
        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
            for frame in data.chunks_mut(device_channels) {
                for (channel, sample) in frame.iter_mut().enumerate() {
                    // Extra device channels repeat the last source channel.
                    let samples = &source[channel.min(source.len() - 1)];
                    *sample = samples.get(position).copied().unwrap_or(0.0);
                }
                position += 1;
            }
            if position >= frames {
                let _ = done_tx.try_send(());
            }
        },
        err_fn,
        None,
    )?;

    stream.play()?;
    let timeout = Duration::from_secs_f64(buffer.duration_secs() + 1.0);
    if done_rx.recv_timeout(timeout).is_err() {
        log::warn!("playback did not finish within {:.1}s", timeout.as_secs_f64());
    }

    // Give the device a moment to drain its last period.
    thread::sleep(Duration::from_millis(200));
    stream.pause()?;
    Ok(())
}

/// Picks an f32 configuration that runs at `sample_rate`, preferring the
/// channel count closest to `channels`.
fn find_supported_config(
    configs: Vec<SupportedStreamConfigRange>,
    channels: usize,
    sample_rate: u32,
) -> Option<SupportedStreamConfigRange> {
    configs
        .into_iter()
        .filter(|c| {
            c.sample_format() == cpal::SampleFormat::F32
                && c.min_sample_rate().0 <= sample_rate
                && sample_rate <= c.max_sample_rate().0
        })
        .min_by_key(|c| usize::from(c.channels()).abs_diff(channels))
}
