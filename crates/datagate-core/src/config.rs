//! Configuration schema (datagate.toml)

use serde::{Deserialize, Serialize};

/// Pre-load checks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SanityConfig {
    /// Maximum batch age in hours. No freshness check when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub freshness_sla_hours: Option<f64>,

    /// Modification times further in the future than this are clock skew
    pub max_clock_skew_secs: u64,

    /// How many recent content hashes to compare against (0 disables)
    pub duplicate_window: usize,
}

impl Default for SanityConfig {
    fn default() -> Self {
        Self {
            freshness_sla_hours: None,
            max_clock_skew_secs: 300,
            duplicate_window: 50,
        }
    }
}

/// Sampling of large batches
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SamplingConfig {
    /// Raw size above which the loader samples rows
    pub threshold_bytes: u64,

    /// Bernoulli keep probability, in (0, 1]
    pub sample_rate: f64,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            threshold_bytes: 500 * 1024 * 1024,
            sample_rate: 0.1,
        }
    }
}

/// Seasonal partition used for row-count baselines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BucketKind {
    #[default]
    DayOfWeek,
    Month,
}

/// History window, bounded by count or by age
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lookback {
    /// Most recent N matching records
    Runs(usize),

    /// Records no older than N days
    Days(u32),
}

impl Default for Lookback {
    fn default() -> Self {
        // twelve weeks
        Self::Days(84)
    }
}

/// Outlier and seasonal detection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnomalyConfig {
    pub zscore_threshold: f64,
    pub iqr_multiplier: f64,

    /// Columns with |skewness| below this use Z-score, otherwise IQR
    pub skew_cutoff: f64,

    /// Seasonal deviation (in standard deviations) that raises a warning
    pub seasonal_sigma: f64,

    /// Bucket samples needed before a seasonal baseline is trusted
    pub min_bucket_samples: usize,

    pub bucket: BucketKind,
    pub lookback: Lookback,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            zscore_threshold: 3.0,
            iqr_multiplier: 1.5,
            skew_cutoff: 1.0,
            seasonal_sigma: 3.0,
            min_bucket_samples: 3,
            bucket: BucketKind::default(),
            lookback: Lookback::default(),
        }
    }
}

/// Rolling drift comparison
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DriftConfig {
    /// Number of most recent runs forming the baseline
    pub window_runs: usize,

    /// Relative deviation that raises a warning
    pub threshold: f64,

    /// Runs needed before drift is evaluated
    pub min_history: usize,
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self {
            window_runs: 7,
            threshold: 0.30,
            min_history: 2,
        }
    }
}

/// Trust score weights
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrustWeights {
    pub history: f64,
    pub verdict: f64,
    pub quality: f64,
}

impl Default for TrustWeights {
    fn default() -> Self {
        Self {
            history: 0.40,
            verdict: 0.35,
            quality: 0.25,
        }
    }
}

impl TrustWeights {
    /// Weights scaled to sum to 1
    pub fn normalized(&self) -> TrustWeights {
        let total = self.history + self.verdict + self.quality;
        if total <= 0.0 || (total - 1.0).abs() < f64::EPSILON {
            return *self;
        }
        TrustWeights {
            history: self.history / total,
            verdict: self.verdict / total,
            quality: self.quality / total,
        }
    }
}

/// Contract self-healing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RemediationConfig {
    pub enabled: bool,

    /// Attach proposals as pending instead of writing them
    pub require_approval: bool,
}

impl Default for RemediationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            require_approval: true,
        }
    }
}

/// Report assembly
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReportConfig {
    /// Cap on quarantine candidate row indices listed in the report
    pub max_quarantine: usize,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            max_quarantine: 100,
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub sanity: SanityConfig,
    pub sampling: SamplingConfig,
    pub anomaly: AnomalyConfig,
    pub drift: DriftConfig,
    pub trust: TrustWeights,
    pub remediation: RemediationConfig,
    pub report: ReportConfig,
}

impl PipelineConfig {
    /// Load config from TOML file
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;

        Self::from_toml(&contents)
    }

    /// Load config from TOML string
    pub fn from_toml(toml: &str) -> Result<Self, ConfigError> {
        let config: PipelineConfig = toml::from_str(toml)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to TOML file
    pub fn save_to_file(&self, path: &std::path::Path) -> Result<(), ConfigError> {
        let toml = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, toml)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Reject settings no run could use
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if let Some(sla) = self.sanity.freshness_sla_hours {
            if !(sla > 0.0) {
                return invalid(format!("sanity.freshness_sla_hours must be positive, got {}", sla));
            }
        }
        if !(self.sampling.sample_rate > 0.0 && self.sampling.sample_rate <= 1.0) {
            return invalid(format!(
                "sampling.sample_rate must be in (0, 1], got {}",
                self.sampling.sample_rate
            ));
        }

        let thresholds = [
            ("anomaly.zscore_threshold", self.anomaly.zscore_threshold),
            ("anomaly.iqr_multiplier", self.anomaly.iqr_multiplier),
            ("anomaly.skew_cutoff", self.anomaly.skew_cutoff),
            ("anomaly.seasonal_sigma", self.anomaly.seasonal_sigma),
            ("drift.threshold", self.drift.threshold),
            ("trust.history", self.trust.history),
            ("trust.verdict", self.trust.verdict),
            ("trust.quality", self.trust.quality),
        ];
        for (name, value) in thresholds {
            if !value.is_finite() || value < 0.0 {
                return invalid(format!("{} must be a non-negative number, got {}", name, value));
            }
        }

        if self.trust.history + self.trust.verdict + self.trust.quality <= 0.0 {
            return invalid("trust weights must not all be zero".to_string());
        }
        if self.drift.window_runs == 0 {
            return invalid("drift.window_runs must be at least 1".to_string());
        }
        match self.anomaly.lookback {
            Lookback::Runs(0) | Lookback::Days(0) => {
                return invalid("anomaly.lookback must be at least 1".to_string());
            }
            _ => {}
        }

        Ok(())
    }
}

/// Config error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn default_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.sanity.freshness_sla_hours, None);
        assert_eq!(config.sanity.duplicate_window, 50);
        assert_eq!(config.sampling.threshold_bytes, 524_288_000);
        assert_eq!(config.anomaly.lookback, Lookback::Days(84));
        assert_eq!(config.drift.window_runs, 7);
        assert!(config.remediation.require_approval);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_sections() {
        let config = PipelineConfig::from_toml(
            r#"
[anomaly]
bucket = "month"
lookback = { runs = 24 }

[trust]
history = 0.5
"#,
        )
        .unwrap();

        assert_eq!(config.anomaly.bucket, BucketKind::Month);
        assert_eq!(config.anomaly.lookback, Lookback::Runs(24));
        assert_eq!(config.anomaly.seasonal_sigma, 3.0);
        assert_eq!(config.trust.history, 0.5);
        assert_eq!(config.trust.verdict, 0.35);
    }

    #[test]
    fn weight_normalization() {
        let weights = TrustWeights {
            history: 2.0,
            verdict: 1.0,
            quality: 1.0,
        };
        let normalized = weights.normalized();
        assert!((normalized.history - 0.5).abs() < 1e-9);
        assert!((normalized.verdict - 0.25).abs() < 1e-9);

        assert_eq!(TrustWeights::default().normalized(), TrustWeights::default());
    }

    #[test]
    fn rejects_invalid_values() {
        assert!(matches!(
            PipelineConfig::from_toml("[sampling]\nsample_rate = 0.0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            PipelineConfig::from_toml("[drift]\nthreshold = -0.1"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            PipelineConfig::from_toml("[trust]\nhistory = 0.0\nverdict = 0.0\nquality = 0.0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            PipelineConfig::from_toml("[sanity]\nunknown_key = 1"),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn config_toml_roundtrip() {
        let mut config = PipelineConfig::default();
        config.sanity.freshness_sla_hours = Some(24.0);
        let toml = toml::to_string(&config).unwrap();
        let parsed = PipelineConfig::from_toml(&toml).unwrap();
        assert_eq!(config, parsed);
    }
}
