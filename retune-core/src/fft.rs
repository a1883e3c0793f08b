//! # Fast Fourier Transform (FFT) Module
//!
//! Frequency-domain helpers built on RustFFT: windowing, forward/inverse
//! transform pairs for the phase vocoder, and the magnitude spectrum readout
//! of a buffer region.
//!
//! ## Features
//! - Hann windowing for reduced spectral leakage
//! - DC offset removal before analysis
//! - Decibel magnitude spectrum of any buffer region

use std::sync::Arc;

use rustfft::{num_complex::Complex, FftPlanner};
use serde::Serialize;

use crate::buffer::AudioBuffer;
use crate::error::{RetuneError, RetuneResult};

/// FFT length used by [`analyze_frequency_spectrum`].
pub const SPECTRUM_FFT_SIZE: usize = 8192;

/// Magnitudes at or below this are reported as this many decibels.
pub const SILENCE_DB: f32 = -200.0;

/// Removes the DC offset from a signal by making its average value zero.
fn remove_dc_offset(signal: &mut [f32]) {
    let len = signal.len();
    if len == 0 {
        return;
    }
    let avg = signal.iter().sum::<f32>() / len as f32;
    if avg.abs() > 1e-6 {
        for sample in signal.iter_mut() {
            *sample -= avg;
        }
    }
}

/// Periodic Hann window of `size` points.
pub fn hann_window(size: usize) -> Vec<f32> {
    (0..size)
        .map(|i| 0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / size as f32).cos()))
        .collect()
}

/// Applies a Hann window to the input buffer to reduce spectral leakage.
fn apply_hann_window(buffer: &mut [f32]) {
    let window = hann_window(buffer.len());
    for (sample, w) in buffer.iter_mut().zip(window) {
        *sample *= w;
    }
}

/// Forward and inverse plans of one size, reusable across frames.
#[derive(Clone)]
pub struct FftPair {
    size: usize,
    forward: Arc<dyn rustfft::Fft<f32>>,
    inverse: Arc<dyn rustfft::Fft<f32>>,
}

impl FftPair {
    pub fn new(size: usize) -> Self {
        let mut planner = FftPlanner::new();
        Self {
            size,
            forward: planner.plan_fft_forward(size),
            inverse: planner.plan_fft_inverse(size),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn forward(&self, buffer: &mut [Complex<f32>]) {
        self.forward.process(buffer);
    }

    /// Inverse transform scaled by `1 / size`.
    pub fn inverse(&self, buffer: &mut [Complex<f32>]) {
        self.inverse.process(buffer);
        let scale = 1.0 / self.size as f32;
        for x in buffer.iter_mut() {
            *x *= scale;
        }
    }
}

/// Performs a forward FFT of `size` points on a signal.
///
/// The signal is DC-corrected, Hann-windowed, then zero-padded or truncated
/// to `size` samples.
pub fn perform_fft(signal: &[f32], size: usize) -> Vec<Complex<f32>> {
    let mut processed_signal = signal[..signal.len().min(size)].to_vec();
    remove_dc_offset(&mut processed_signal);
    apply_hann_window(&mut processed_signal);
    processed_signal.resize(size, 0.0);

    let mut buffer: Vec<Complex<f32>> = processed_signal
        .into_iter()
        .map(|sample| Complex { re: sample, im: 0.0 })
        .collect();

    FftPlanner::new().plan_fft_forward(size).process(&mut buffer);
    buffer
}

/// Magnitudes of the bins below Nyquist.
pub fn spectrum_to_magnitudes(spectrum: &[Complex<f32>]) -> Vec<f32> {
    spectrum
        .iter()
        .take(spectrum.len() / 2)
        .map(|c| c.norm())
        .collect()
}

/// Decibel magnitude spectrum of a buffer region.
#[derive(Debug, Clone, Serialize)]
pub struct Spectrum {
    /// Width of one bin in Hz.
    pub bin_hz: f32,
    /// `fft_size / 2` bins, normalised by the FFT length.
    pub magnitudes_db: Vec<f32>,
    /// Centre frequency of the loudest bin, ignoring DC.
    pub peak_hz: f32,
}

/// Magnitude spectrum of the first channel over a region.
///
/// `duration_secs` defaults to one second.
///
/// # Errors
/// * `InvalidInput` - non-finite start, negative or non-finite duration, or an FFT size
///   below 2
/// * `EmptyWindow` - the region contains no samples
pub fn analyze_frequency_spectrum(
    buffer: &AudioBuffer,
    start_secs: f64,
    duration_secs: Option<f64>,
    fft_size: usize,
) -> RetuneResult<Spectrum> {
    if fft_size < 2 {
        return Err(RetuneError::InvalidInput(format!(
            "FFT size must be at least 2, got {fft_size}"
        )));
    }

    let range = buffer.window(start_secs, duration_secs, 1.0)?;
    if range.is_empty() {
        return Err(RetuneError::EmptyWindow {
            start: range.start,
            end: range.end,
        });
    }
    let samples = buffer.channel(0).ok_or(RetuneError::EmptyBuffer)?;

    let spectrum = perform_fft(&samples[range], fft_size);
    let scale = 1.0 / fft_size as f32;
    let magnitudes_db: Vec<f32> = spectrum_to_magnitudes(&spectrum)
        .into_iter()
        .map(|m| {
            let m = m * scale;
            if m > 0.0 {
                (20.0 * m.log10()).max(SILENCE_DB)
            } else {
                SILENCE_DB
            }
        })
        .collect();

    let bin_hz = buffer.sample_rate() as f32 / fft_size as f32;
    let peak_bin = magnitudes_db
        .iter()
        .enumerate()
        .skip(1)
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map_or(0, |(i, _)| i);

    Ok(Spectrum {
        bin_hz,
        magnitudes_db,
        peak_hz: peak_bin as f32 * bin_hz,
    })
}
