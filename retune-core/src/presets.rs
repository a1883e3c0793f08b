//! Quick-select retune targets.

use once_cell::sync::Lazy;
use serde::Serialize;
use std::collections::BTreeMap;

/// A named retune target.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SacredFrequency {
    pub hz: f32,
    pub label: &'static str,
    pub description: Option<&'static str>,
}

const fn preset(hz: f32, label: &'static str, description: Option<&'static str>) -> SacredFrequency {
    SacredFrequency {
        hz,
        label,
        description,
    }
}

/// The fixed preset table, lowest first.
pub const SACRED_FREQUENCIES: [SacredFrequency; 12] = [
    preset(174.0, "174 Hz", None),
    preset(285.0, "285 Hz", None),
    preset(396.0, "396 Hz", None),
    preset(417.0, "417 Hz", None),
    preset(432.0, "432 Hz", Some("Cosmic tuning")),
    preset(440.0, "440 Hz", Some("Standard tuning")),
    preset(444.0, "444 Hz", Some("Crystal tuning")),
    preset(528.0, "528 Hz", Some("Love frequency")),
    preset(639.0, "639 Hz", None),
    preset(741.0, "741 Hz", None),
    preset(852.0, "852 Hz", None),
    preset(963.0, "963 Hz", None),
];

/// Labels normalised to lowercase without spaces ("432hz").
static BY_LABEL: Lazy<BTreeMap<String, &'static SacredFrequency>> = Lazy::new(|| {
    SACRED_FREQUENCIES
        .iter()
        .map(|p| (normalize(p.label), p))
        .collect()
});

fn normalize(label: &str) -> String {
    label
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Looks a preset up by label ("432 Hz", "432hz") or bare value ("432").
pub fn find_preset(query: &str) -> Option<&'static SacredFrequency> {
    let key = normalize(query);
    if let Some(p) = BY_LABEL.get(&key) {
        return Some(*p);
    }
    let hz: f32 = key.parse().ok()?;
    SACRED_FREQUENCIES.iter().find(|p| p.hz == hz)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_is_sorted_and_complete() {
        let values: Vec<f32> = SACRED_FREQUENCIES.iter().map(|p| p.hz).collect();
        assert_eq!(
            values,
            vec![174.0, 285.0, 396.0, 417.0, 432.0, 440.0, 444.0, 528.0, 639.0, 741.0, 852.0, 963.0]
        );
    }

    #[test]
    fn lookup_by_label_or_value() {
        assert_eq!(find_preset("432 Hz").map(|p| p.hz), Some(432.0));
        assert_eq!(find_preset("528hz").map(|p| p.description), Some(Some("Love frequency")));
        assert_eq!(find_preset("963").map(|p| p.label), Some("963 Hz"));
        assert!(find_preset("433").is_none());
        assert!(find_preset("loud").is_none());
    }
}
