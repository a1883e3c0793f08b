//! # Retune - command-line host for the retuning engine
//!
//! Reads WAV files from disk, runs analysis or a retune through
//! `retune-core`, and writes the encoded result back out.
//!
//! ## Commands
//! - `analyze`: dominant frequency, note and tuning deviation of a region
//! - `retune`: render a clip at a new tuning on the background worker
//! - `presets`: list the quick-select target frequencies

#[cfg(feature = "playback")]
mod playback;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;

use retune_core::fft::{analyze_frequency_spectrum, SPECTRUM_FFT_SIZE};
use retune_core::wav::processed_file_name;
use retune_core::{
    analyze_region, buffer_to_wave, find_preset, AnalysisReport, AudioBuffer, EngineConfig,
    RenderWorker, RetuneMode, RetuneRequest, SACRED_FREQUENCIES,
};

#[derive(Parser)]
#[command(name = "retune", version, about = "Detect and retune the pitch of audio clips")]
struct Cli {
    /// JSON engine configuration; missing fields keep their defaults
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log analysis and render details
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Detect the dominant frequency of a region
    Analyze {
        input: PathBuf,

        /// Region start in seconds
        #[arg(long, default_value_t = 0.0)]
        start: f64,

        /// Region length in seconds (default: up to the detector window)
        #[arg(long)]
        duration: Option<f64>,

        /// Also report the loudest spectral bin
        #[arg(long)]
        spectrum: bool,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Render the clip at a new tuning
    Retune {
        input: PathBuf,

        /// Output file (default: <input>_processed.wav)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Target frequency in Hz
        #[arg(long, conflicts_with = "preset", required_unless_present = "preset")]
        target: Option<f64>,

        /// Target preset, e.g. "432 Hz" or 528
        #[arg(long)]
        preset: Option<String>,

        /// Source tuning in Hz (default: from config, 440)
        #[arg(long, conflicts_with = "detect")]
        base: Option<f64>,

        /// Use the detected frequency as the source tuning
        #[arg(long)]
        detect: bool,

        /// pure (pitch and tempo) or pitch-only
        #[arg(long, default_value = "pure")]
        mode: RetuneMode,

        /// Play the result on the default output device
        #[arg(long)]
        play: bool,
    },

    /// List the preset target frequencies
    Presets {
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Analyze {
            input,
            start,
            duration,
            spectrum,
            json,
        } => analyze(&config, &input, start, duration, spectrum, json),
        Command::Retune {
            input,
            output,
            target,
            preset,
            base,
            detect,
            mode,
            play,
        } => {
            let target = resolve_target(target, preset.as_deref())?;
            let source = load_wav(&input)?;
            let base = if detect {
                detect_base(&config, &source)?
            } else {
                base.unwrap_or(config.base_hz)
            };
            let request = RetuneRequest::new(target).with_base_hz(base).with_mode(mode);
            let output = output.unwrap_or_else(|| default_output(&input));
            retune(&config, source, request, &output, play)
        }
        Command::Presets { json } => presets(json),
    }
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    let Some(path) = path else {
        return Ok(EngineConfig::default());
    };
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    let config: EngineConfig = serde_json::from_str(&text)
        .with_context(|| format!("Invalid config {}", path.display()))?;
    config.validate()?;
    log::debug!("loaded config from {}", path.display());
    Ok(config)
}

/// Decodes a WAV file into channel-separated float samples.
fn load_wav(path: &Path) -> Result<AudioBuffer> {
    let reader = hound::WavReader::open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let spec = reader.spec();

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<Result<_, _>>()
            .with_context(|| format!("Failed to decode {}", path.display()))?,
        hound::SampleFormat::Int => {
            let max_val = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max_val))
                .collect::<Result<_, _>>()
                .with_context(|| format!("Failed to decode {}", path.display()))?
        }
    };

    let buffer = AudioBuffer::from_interleaved(spec.sample_rate, spec.channels as usize, &samples)?;
    log::info!(
        "loaded {}: {:.3}s, {} channel(s) at {} Hz",
        path.display(),
        buffer.duration_secs(),
        buffer.num_channels(),
        buffer.sample_rate()
    );
    Ok(buffer)
}

fn resolve_target(target: Option<f64>, preset: Option<&str>) -> Result<f64> {
    match (target, preset) {
        (Some(hz), _) => Ok(hz),
        (None, Some(label)) => find_preset(label)
            .map(|p| p.hz as f64)
            .ok_or_else(|| anyhow!("Unknown preset '{label}' (see `retune presets`)")),
        (None, None) => bail!("Either --target or --preset is required"),
    }
}

fn default_output(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output");
    input.with_file_name(processed_file_name(stem))
}

fn detect_base(config: &EngineConfig, source: &AudioBuffer) -> Result<f64> {
    let detection = config.detector().detect_dominant_frequency(source, 0.0, None)?;
    if detection.confidence < config.detector.locked_confidence {
        log::warn!(
            "no clear pitch detected (confidence {:.1}), assuming {} Hz",
            detection.confidence,
            detection.frequency
        );
    } else {
        log::info!("detected source tuning {:.2} Hz", detection.frequency);
    }
    Ok(detection.frequency as f64)
}

#[derive(Serialize)]
struct AnalyzeOutput<'a> {
    #[serde(flatten)]
    report: &'a AnalysisReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    spectrum_peak_hz: Option<f32>,
}

fn analyze(
    config: &EngineConfig,
    input: &Path,
    start: f64,
    duration: Option<f64>,
    spectrum: bool,
    json: bool,
) -> Result<()> {
    let buffer = load_wav(input)?;
    let report = analyze_region(&config.detector(), &buffer, start, duration)?;
    let spectrum_peak_hz = if spectrum {
        Some(analyze_frequency_spectrum(&buffer, start, duration, SPECTRUM_FFT_SIZE)?.peak_hz)
    } else {
        None
    };

    if json {
        let output = AnalyzeOutput {
            report: &report,
            spectrum_peak_hz,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("Frequency:   {:.2} Hz (confidence {:.1})", report.frequency, report.confidence);
    println!("Note:        {}", report.note);
    println!(
        "Nearest key: {} at {:.2} Hz ({:+.1} cents)",
        report.nearest_note, report.nearest_note_hz, report.cents_from_nearest
    );
    println!(
        "vs 432 Hz:   {:+.1} cents ({:+.2}%)",
        report.deviation_432.cents, report.deviation_432.percentage
    );
    println!(
        "vs 440 Hz:   {:+.1} cents ({:+.2}%)",
        report.deviation_440.cents, report.deviation_440.percentage
    );
    if let Some(peak) = spectrum_peak_hz {
        println!("Peak bin:    {peak:.2} Hz");
    }
    Ok(())
}

fn retune(
    config: &EngineConfig,
    source: AudioBuffer,
    request: RetuneRequest,
    output: &Path,
    play: bool,
) -> Result<()> {
    request.validate()?;
    if play && !cfg!(feature = "playback") {
        bail!("--play needs a build with the `playback` feature");
    }

    let worker = RenderWorker::spawn(config.retuner())?;
    let id = worker.submit(Arc::new(source), request)?;
    let mut last_decile = 0;
    let rendered = worker.wait_with_progress(id, |fraction| {
        let decile = (fraction * 10.0) as u32;
        if decile > last_decile {
            last_decile = decile;
            log::info!("rendering... {}%", decile * 10);
        }
    })?;
    worker.shutdown();

    let bytes = buffer_to_wave(&rendered)?;
    fs::write(output, &bytes)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    println!(
        "Wrote {} ({:.3}s, {} -> {} Hz, {})",
        output.display(),
        rendered.duration_secs(),
        request.base_hz,
        request.target_hz,
        request.mode
    );

    #[cfg(feature = "playback")]
    {
        if play {
            playback::play(&rendered)?;
        }
    }
    Ok(())
}

fn presets(json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(&SACRED_FREQUENCIES)?);
        return Ok(());
    }
    for preset in &SACRED_FREQUENCIES {
        match preset.description {
            Some(description) => println!("{:>7}  {description}", preset.label),
            None => println!("{:>7}", preset.label),
        }
    }
    Ok(())
}
