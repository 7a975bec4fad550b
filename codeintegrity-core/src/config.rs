use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::SeverityWeights;

/// Top-level configuration, matching `codeintegrity.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntegrityConfig {
    #[serde(default)]
    pub analysis: AnalysisSection,
    #[serde(default)]
    pub scoring: SeverityWeights,
    #[serde(default)]
    pub verification: VerificationSection,
    #[serde(default)]
    pub pipeline: PipelineSection,
    #[serde(default)]
    pub acquisition: AcquisitionSection,
}

impl IntegrityConfig {
    /// Read and validate a TOML config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Parse(format!("{}: {e}", path.display())))?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pipeline.max_concurrent_repos == 0 {
            return Err(ConfigError::Invalid(
                "pipeline.max_concurrent_repos must be at least 1".into(),
            ));
        }
        if self.analysis.timestamp_tolerance_secs < 0 {
            return Err(ConfigError::Invalid(
                "analysis.timestamp_tolerance_secs must not be negative".into(),
            ));
        }
        if self.acquisition.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "acquisition.base_url must not be empty".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisSection {
    /// Branch, tag, or revision to analyze. Empty means the default branch.
    pub reference: String,
    /// Allowed backwards clock skew before a timestamp counts as regressed.
    pub timestamp_tolerance_secs: i64,
}

/// How commit signatures are checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VerifierBackend {
    /// Shell out to `gpg`, `gpgsm`, and `ssh-keygen`.
    #[default]
    Command,
    /// Treat every signature as unverifiable.
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationSection {
    pub backend: VerifierBackend,
    pub gpg_program: String,
    pub gpgsm_program: String,
    pub ssh_program: String,
    pub ssh_allowed_signers: Option<PathBuf>,
    /// Worker threads for signature checks; 0 uses one per core.
    pub concurrency: usize,
}

impl Default for VerificationSection {
    fn default() -> Self {
        Self {
            backend: VerifierBackend::Command,
            gpg_program: "gpg".into(),
            gpgsm_program: "gpgsm".into(),
            ssh_program: "ssh-keygen".into(),
            ssh_allowed_signers: None,
            concurrency: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSection {
    pub max_concurrent_repos: usize,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            max_concurrent_repos: 4,
        }
    }
}

/// Where repositories are cloned from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionSection {
    /// Clone URLs are `<base_url>/<owner>/<name>.git`.
    pub base_url: String,
}

impl Default for AcquisitionSection {
    fn default() -> Self {
        Self {
            base_url: "https://github.com".into(),
        }
    }
}
