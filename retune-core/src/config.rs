//! Engine configuration, loadable from JSON.

use serde::{Deserialize, Serialize};

use crate::error::{ensure_positive_hz, RetuneError, RetuneResult};
use crate::pitch::{DetectorConfig, PitchDetector};
use crate::retune::{Retuner, DEFAULT_BASE_HZ};
use crate::vocoder::VocoderConfig;

/// Every tunable of the engine. Missing fields take their defaults.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub detector: DetectorConfig,
    pub vocoder: VocoderConfig,
    /// Source tuning assumed when none is given.
    pub base_hz: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            detector: DetectorConfig::default(),
            vocoder: VocoderConfig::default(),
            base_hz: DEFAULT_BASE_HZ,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> RetuneResult<()> {
        ensure_positive_hz("base frequency", self.base_hz)?;
        ensure_positive_hz("fallback frequency", self.detector.fallback_hz as f64)?;
        if !(self.detector.max_window_secs.is_finite() && self.detector.max_window_secs > 0.0) {
            return Err(RetuneError::InvalidInput(format!(
                "max_window_secs must be positive, got {}",
                self.detector.max_window_secs
            )));
        }
        self.vocoder.validate()
    }

    pub fn detector(&self) -> PitchDetector {
        PitchDetector::new(self.detector)
    }

    pub fn retuner(&self) -> Retuner {
        Retuner::new(self.vocoder)
    }
}
