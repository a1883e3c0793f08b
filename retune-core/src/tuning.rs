//! # Musical Tuning Module
//!
//! Pitch arithmetic shared by the detector, the retuner and the frequency-lab
//! readout: ratio/semitone conversions, cent deviations and note naming.
//!
//! ## Features
//! - Ratio <-> semitone conversions (`12 * log2(ratio)` and back)
//! - Cent and percentage deviation from a target frequency
//! - Note naming relative to C0 = 440 * 2^-4.75 Hz
//! - 88-key piano note table (A0 to C8) for nearest-note lookups

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{ensure_positive_hz, RetuneResult};

/// Returned by [`frequency_to_note`] when no note applies.
pub const NOT_APPLICABLE: &str = "N/A";

const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Converts a frequency ratio into a semitone offset.
///
/// Returns `NaN` for `ratio <= 0`; callers validate before relying on it.
pub fn ratio_to_semitones(ratio: f64) -> f64 {
    if ratio > 0.0 {
        12.0 * ratio.log2()
    } else {
        f64::NAN
    }
}

/// Converts a semitone offset into a frequency ratio.
pub fn semitones_to_ratio(semitones: f64) -> f64 {
    2.0_f64.powf(semitones / 12.0)
}

/// Ratio that moves `current_hz` onto `target_hz`.
///
/// # Errors
/// * `InvalidFrequency` - either frequency is zero, negative or not finite
pub fn pitch_shift_ratio(current_hz: f64, target_hz: f64) -> RetuneResult<f64> {
    let current = ensure_positive_hz("current frequency", current_hz)?;
    let target = ensure_positive_hz("target frequency", target_hz)?;
    Ok(target / current)
}

/// How far a detected frequency sits from a target.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrequencyDeviation {
    /// Positive = sharp, negative = flat. 100 cents = 1 semitone.
    pub cents: f32,
    /// `(detected - target) / target * 100`
    pub percentage: f32,
}

/// Calculates the deviation of `detected_hz` from `target_hz`.
///
/// # Errors
/// * `InvalidFrequency` - either frequency is zero, negative or not finite
pub fn calculate_frequency_deviation(
    detected_hz: f32,
    target_hz: f32,
) -> RetuneResult<FrequencyDeviation> {
    let detected = ensure_positive_hz("detected frequency", detected_hz as f64)?;
    let target = ensure_positive_hz("target frequency", target_hz as f64)?;

    Ok(FrequencyDeviation {
        cents: (1200.0 * (detected / target).log2()) as f32,
        percentage: ((detected - target) / target * 100.0) as f32,
    })
}

/// Names the note nearest to `frequency`, e.g. `"A4"`.
///
/// The octave is taken from the rounded half-step count above C0, not from
/// `floor(half_steps / 12)` on the unrounded value. The two differ just
/// below each C: 260 Hz rounds up to C and is named `"C4"`, where the
/// floored count would give `"C3"`.
///
/// Zero, negative and non-finite input yield [`NOT_APPLICABLE`].
pub fn frequency_to_note(frequency: f32) -> String {
    if !(frequency.is_finite() && frequency > 0.0) {
        return NOT_APPLICABLE.to_string();
    }

    let c0 = 440.0 * 2.0_f64.powf(-4.75);
    let half_steps = 12.0 * (frequency as f64 / c0).log2();
    // Octave follows the rounded step so B/C boundaries land in the right octave.
    let nearest_step = half_steps.round() as i64;
    let octave = nearest_step.div_euclid(12);
    let note = nearest_step.rem_euclid(12) as usize;

    format!("{}{}", NOTE_NAMES[note], octave)
}

/// Represents a single musical note with its name and frequency.
#[derive(Debug, Clone)]
pub struct Note {
    /// Note name (e.g., "A4", "C#3")
    pub name: String,
    /// Frequency in Hz
    pub frequency: f32,
}

/// Equal-tempered notes of an 88-key piano (A0 to C8), A4 = 440 Hz.
static NOTES: Lazy<Vec<Note>> = Lazy::new(|| {
    (0..88)
        .map(|key: i32| {
            // Key 0 is A0, nine semitones above C0.
            let step = key + 9;
            let frequency = 440.0 * 2.0_f32.powf((key as f32 - 48.0) / 12.0);
            let name = format!("{}{}", NOTE_NAMES[(step % 12) as usize], step / 12);
            Note { name, frequency }
        })
        .collect()
});

/// Note name to key index.
static NOTE_MAP: Lazy<BTreeMap<String, usize>> = Lazy::new(|| {
    NOTES
        .iter()
        .enumerate()
        .map(|(i, note)| (note.name.clone(), i))
        .collect()
});

/// Finds the piano key closest to `freq`.
///
/// # Returns
/// * `(note_name, equal_tempered_frequency)`
pub fn find_nearest_note(freq: f32) -> (String, f32) {
    let closest = NOTES
        .iter()
        .min_by(|a, b| {
            let diff_a = (a.frequency - freq).abs();
            let diff_b = (b.frequency - freq).abs();
            diff_a.total_cmp(&diff_b)
        })
        .unwrap_or(&NOTES[48]);

    (closest.name.clone(), closest.frequency)
}

/// Frequency of a named piano key such as `"C4"` or `"F#2"`.
pub fn note_frequency(name: &str) -> Option<f32> {
    NOTE_MAP.get(name).map(|&i| NOTES[i].frequency)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn semitone_round_trip() {
        let mut ratio = 0.01;
        while ratio <= 10.0 {
            let back = semitones_to_ratio(ratio_to_semitones(ratio));
            assert!((back - ratio).abs() < 1e-9, "{ratio} came back as {back}");
            ratio += 0.37;
        }
    }

    #[test]
    fn octave_is_twelve_semitones() {
        assert_relative_eq!(ratio_to_semitones(2.0), 12.0);
        assert_relative_eq!(semitones_to_ratio(-12.0), 0.5);
        assert!(ratio_to_semitones(0.0).is_nan());
        assert!(ratio_to_semitones(-1.0).is_nan());
    }

    #[test]
    fn shift_ratio_validates_input() {
        assert_relative_eq!(pitch_shift_ratio(440.0, 432.0).unwrap(), 432.0 / 440.0);
        assert!(pitch_shift_ratio(0.0, 432.0).is_err());
        assert!(pitch_shift_ratio(440.0, -1.0).is_err());
        assert!(pitch_shift_ratio(f64::NAN, 432.0).is_err());
    }

    #[test]
    fn deviation_sign_convention() {
        let same = calculate_frequency_deviation(432.0, 432.0).unwrap();
        assert_eq!(same.cents, 0.0);
        assert_eq!(same.percentage, 0.0);

        let sharp = calculate_frequency_deviation(440.0, 432.0).unwrap();
        assert!(sharp.cents > 0.0);
        assert_relative_eq!(sharp.cents, 31.77, epsilon = 0.01);
        assert_relative_eq!(sharp.percentage, 1.8519, epsilon = 1e-3);

        let flat = calculate_frequency_deviation(420.0, 432.0).unwrap();
        assert!(flat.cents < 0.0);
        assert!(flat.percentage < 0.0);

        assert!(calculate_frequency_deviation(0.0, 432.0).is_err());
    }

    #[test]
    fn names_notes() {
        assert_eq!(frequency_to_note(440.0), "A4");
        assert_eq!(frequency_to_note(261.63), "C4");
        assert_eq!(frequency_to_note(27.5), "A0");
        assert_eq!(frequency_to_note(528.0), "C5");
        assert_eq!(frequency_to_note(432.0), "A4");
        // Just under C4 still rounds up into octave 4.
        assert_eq!(frequency_to_note(260.0), "C4");
    }

    #[test]
    fn degenerate_frequency_is_not_applicable() {
        assert_eq!(frequency_to_note(0.0), NOT_APPLICABLE);
        assert_eq!(frequency_to_note(-5.0), NOT_APPLICABLE);
        assert_eq!(frequency_to_note(f32::NAN), NOT_APPLICABLE);
    }

    #[test]
    fn nearest_note_table() {
        let (name, freq) = find_nearest_note(442.0);
        assert_eq!(name, "A4");
        assert_relative_eq!(freq, 440.0, epsilon = 1e-3);

        assert_eq!(find_nearest_note(10.0).0, "A0");
        assert_eq!(find_nearest_note(5000.0).0, "C8");

        assert_relative_eq!(note_frequency("C4").unwrap(), 261.6256, epsilon = 1e-3);
        assert!(note_frequency("H2").is_none());
    }
}
