//! # WAV Encoder Module
//!
//! Serialises float buffers into a canonical 44-byte-header RIFF/WAVE file
//! with interleaved 16-bit signed PCM.

use crate::buffer::AudioBuffer;
use crate::error::{RetuneError, RetuneResult};

/// Media type for encoded output.
pub const WAV_MEDIA_TYPE: &str = "audio/wav";

/// Size of the canonical header in bytes.
pub const HEADER_LEN: usize = 44;

const BITS_PER_SAMPLE: u16 = 16;
const BYTES_PER_SAMPLE: u16 = BITS_PER_SAMPLE / 8;

/// Default export name for a processed clip: `<stem>_processed.wav`.
pub fn processed_file_name(stem: &str) -> String {
    format!("{stem}_processed.wav")
}

/// Converts one float sample to 16-bit PCM.
///
/// Negative samples scale by 32768 and the rest by 32767, then truncate.
pub fn sample_to_i16(sample: f32) -> i16 {
    let s = sample.clamp(-1.0, 1.0);
    if s < 0.0 {
        (s * 32768.0) as i16
    } else {
        (s * 32767.0) as i16
    }
}

/// Size of the PCM payload for `frames x channels` 16-bit samples.
///
/// # Errors
/// * `InvalidInput` - more than 65535 channels
/// * `TooLarge` - the payload does not fit the 32-bit RIFF size fields
pub fn wav_data_size(frames: usize, channels: usize) -> RetuneResult<u32> {
    let num_channels = u16::try_from(channels).map_err(|_| {
        RetuneError::InvalidInput(format!("{channels} channels do not fit a WAV header"))
    })?;
    let data_bytes = (frames as u64)
        .saturating_mul(u64::from(num_channels))
        .saturating_mul(u64::from(BYTES_PER_SAMPLE));
    // RIFF ChunkSize is 36 + data and must fit in a u32 as well.
    if data_bytes > u64::from(u32::MAX) - 36 {
        return Err(RetuneError::TooLarge {
            bytes: (HEADER_LEN as u64).saturating_add(data_bytes),
        });
    }
    Ok(data_bytes as u32)
}

/// Encodes a whole buffer as a 16-bit PCM WAV file.
pub fn buffer_to_wave(buffer: &AudioBuffer) -> RetuneResult<Vec<u8>> {
    let channels: Vec<&[f32]> = buffer.channels().iter().map(Vec::as_slice).collect();
    encode_channels(&channels, buffer.sample_rate())
}

/// Encodes channel-separated samples as a 16-bit PCM WAV file.
///
/// # Errors
/// * `EmptyBuffer` - no channels
/// * `ChannelLengthMismatch` - channels differ in length
/// * `InvalidInput` - zero sample rate or more than 65535 channels
/// * `TooLarge` - the payload does not fit the 32-bit RIFF size fields
pub fn encode_channels(channels: &[&[f32]], sample_rate: u32) -> RetuneResult<Vec<u8>> {
    let Some(first) = channels.first() else {
        return Err(RetuneError::EmptyBuffer);
    };
    let frames = first.len();
    if let Some((channel, samples)) = channels
        .iter()
        .enumerate()
        .find(|(_, samples)| samples.len() != frames)
    {
        return Err(RetuneError::ChannelLengthMismatch {
            channel,
            expected: frames,
            actual: samples.len(),
        });
    }
    if sample_rate == 0 {
        return Err(RetuneError::InvalidInput("sample rate must be positive".into()));
    }
    let data_size = wav_data_size(frames, channels.len())?;
    let num_channels = channels.len() as u16;
    let block_align = num_channels * BYTES_PER_SAMPLE;
    let byte_rate = u64::from(sample_rate) * u64::from(block_align);
    let byte_rate = u32::try_from(byte_rate).map_err(|_| {
        RetuneError::InvalidInput(format!("byte rate {byte_rate} does not fit a WAV header"))
    })?;

    let mut buf = Vec::with_capacity(HEADER_LEN + data_size as usize);

    // RIFF header
    buf.extend_from_slice(b"RIFF");
    buf.extend_from_slice(&(36 + data_size).to_le_bytes());
    buf.extend_from_slice(b"WAVE");

    // fmt chunk
    buf.extend_from_slice(b"fmt ");
    buf.extend_from_slice(&16u32.to_le_bytes()); // chunk size
    buf.extend_from_slice(&1u16.to_le_bytes()); // PCM format
    buf.extend_from_slice(&num_channels.to_le_bytes());
    buf.extend_from_slice(&sample_rate.to_le_bytes());
    buf.extend_from_slice(&byte_rate.to_le_bytes());
    buf.extend_from_slice(&block_align.to_le_bytes());
    buf.extend_from_slice(&BITS_PER_SAMPLE.to_le_bytes());

    // data chunk, frame-interleaved
    buf.extend_from_slice(b"data");
    buf.extend_from_slice(&data_size.to_le_bytes());
    for frame in 0..frames {
        for samples in channels {
            buf.extend_from_slice(&sample_to_i16(samples[frame]).to_le_bytes());
        }
    }

    log::debug!(
        "encoded {frames} frames x {num_channels} channels at {sample_rate} Hz ({} bytes)",
        buf.len()
    );
    Ok(buf)
}
