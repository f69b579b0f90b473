//! Gateway settings and validation.
//!
//! All fields are optional so partial configuration degrades to defaults.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::domain::{DEFAULT_TTL_MS, SamplingParams};
use crate::ports::EngineBackend;

/// Default port for the HTTP compatibility surface.
pub const DEFAULT_HTTP_PORT: u16 = 9337;

/// Default interval between expired-conversation sweeps.
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;

/// Caller identity trusted with host-only operations.
pub const DEFAULT_HOST_CALLER_ID: &str = "host";

/// Gateway settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Root directory for durable state (conversations, token store).
    pub data_dir: Option<PathBuf>,

    /// TTL applied to conversations created without one, in milliseconds.
    pub default_ttl_ms: Option<u64>,

    /// Seconds between sweeper passes over expired conversations.
    pub sweep_interval_secs: Option<u64>,

    /// Sampling parameters applied to new conversations.
    pub default_sampling: Option<SamplingParams>,

    /// Model to load at startup.
    pub model_path: Option<PathBuf>,

    /// Preferred compute backend for the model.
    pub backend: Option<EngineBackend>,

    /// Port for the HTTP compatibility surface.
    pub http_port: Option<u16>,

    /// Caller identity allowed to revoke tokens and drive host operations.
    pub host_caller_id: Option<String>,
}

impl Settings {
    /// Settings with every default filled in.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self {
            data_dir: None,
            default_ttl_ms: Some(DEFAULT_TTL_MS),
            sweep_interval_secs: Some(DEFAULT_SWEEP_INTERVAL_SECS),
            default_sampling: Some(SamplingParams::default()),
            model_path: None,
            backend: Some(EngineBackend::Cpu),
            http_port: Some(DEFAULT_HTTP_PORT),
            host_caller_id: Some(DEFAULT_HOST_CALLER_ID.to_string()),
        }
    }

    /// Overlay another settings value onto this one. Fields that are
    /// `Some` in `other` win; `None` fields leave the current value alone.
    pub fn merge(&mut self, other: &Settings) {
        if let Some(ref dir) = other.data_dir {
            self.data_dir = Some(dir.clone());
        }
        if let Some(ttl) = other.default_ttl_ms {
            self.default_ttl_ms = Some(ttl);
        }
        if let Some(interval) = other.sweep_interval_secs {
            self.sweep_interval_secs = Some(interval);
        }
        if let Some(sampling) = other.default_sampling {
            self.default_sampling = Some(sampling);
        }
        if let Some(ref path) = other.model_path {
            self.model_path = Some(path.clone());
        }
        if let Some(backend) = other.backend {
            self.backend = Some(backend);
        }
        if let Some(port) = other.http_port {
            self.http_port = Some(port);
        }
        if let Some(ref caller) = other.host_caller_id {
            self.host_caller_id = Some(caller.clone());
        }
    }

    /// Effective default TTL in milliseconds.
    #[must_use]
    pub fn effective_default_ttl_ms(&self) -> u64 {
        self.default_ttl_ms.unwrap_or(DEFAULT_TTL_MS)
    }

    /// Effective sweep interval in seconds.
    #[must_use]
    pub fn effective_sweep_interval_secs(&self) -> u64 {
        self.sweep_interval_secs
            .unwrap_or(DEFAULT_SWEEP_INTERVAL_SECS)
    }

    /// Effective HTTP port.
    #[must_use]
    pub fn effective_http_port(&self) -> u16 {
        self.http_port.unwrap_or(DEFAULT_HTTP_PORT)
    }

    /// Effective compute backend.
    #[must_use]
    pub fn effective_backend(&self) -> EngineBackend {
        self.backend.unwrap_or(EngineBackend::Cpu)
    }

    /// Effective sampling parameters for new conversations.
    #[must_use]
    pub fn effective_default_sampling(&self) -> SamplingParams {
        self.default_sampling.unwrap_or_default()
    }

    /// Effective host caller identity.
    #[must_use]
    pub fn effective_host_caller_id(&self) -> String {
        self.host_caller_id
            .clone()
            .unwrap_or_else(|| DEFAULT_HOST_CALLER_ID.to_string())
    }
}

/// Settings validation error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SettingsError {
    #[error("default_ttl_ms must be positive")]
    ZeroTtl,

    #[error("sweep_interval_secs must be positive")]
    ZeroSweepInterval,

    #[error("temperature must be within 0..=2, got {0}")]
    InvalidTemperature(f64),

    #[error("top_p must be within 0..=1, got {0}")]
    InvalidTopP(f64),

    #[error("top_k must be at least 1, got {0}")]
    InvalidTopK(u32),
}

/// Validate settings before use.
pub fn validate_settings(settings: &Settings) -> Result<(), SettingsError> {
    if settings.default_ttl_ms == Some(0) {
        return Err(SettingsError::ZeroTtl);
    }
    if settings.sweep_interval_secs == Some(0) {
        return Err(SettingsError::ZeroSweepInterval);
    }
    if let Some(sampling) = settings.default_sampling {
        if !(0.0..=2.0).contains(&sampling.temperature) {
            return Err(SettingsError::InvalidTemperature(sampling.temperature));
        }
        if !(0.0..=1.0).contains(&sampling.top_p) {
            return Err(SettingsError::InvalidTopP(sampling.top_p));
        }
        if sampling.top_k < 1 {
            return Err(SettingsError::InvalidTopK(sampling.top_k));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let settings = Settings::with_defaults();
        assert!(validate_settings(&settings).is_ok());
        assert_eq!(settings.effective_default_ttl_ms(), DEFAULT_TTL_MS);
        assert_eq!(settings.effective_backend(), EngineBackend::Cpu);
    }

    #[test]
    fn zero_intervals_are_rejected() {
        let settings = Settings {
            default_ttl_ms: Some(0),
            ..Settings::with_defaults()
        };
        assert!(validate_settings(&settings).is_err());

        let settings = Settings {
            sweep_interval_secs: Some(0),
            ..Settings::with_defaults()
        };
        assert!(validate_settings(&settings).is_err());
    }

    #[test]
    fn empty_settings_fall_back_everywhere() {
        let settings = Settings::default();
        assert_eq!(settings.effective_http_port(), DEFAULT_HTTP_PORT);
        assert_eq!(settings.effective_host_caller_id(), DEFAULT_HOST_CALLER_ID);
        assert_eq!(settings.effective_default_sampling(), SamplingParams::default());
    }

    #[test]
    fn merge_overlays_only_set_fields() {
        let mut settings = Settings::with_defaults();
        let overrides = Settings {
            http_port: Some(8123),
            default_sampling: Some(SamplingParams {
                temperature: 0.2,
                top_p: 0.9,
                top_k: 20,
            }),
            ..Settings::default()
        };

        settings.merge(&overrides);
        assert_eq!(settings.http_port, Some(8123));
        assert_eq!(settings.effective_default_sampling().temperature, 0.2);
        // Untouched fields keep their previous values.
        assert_eq!(settings.default_ttl_ms, Some(DEFAULT_TTL_MS));
        assert_eq!(settings.host_caller_id.as_deref(), Some(DEFAULT_HOST_CALLER_ID));
    }

    #[test]
    fn out_of_range_sampling_is_rejected() {
        let mut settings = Settings::with_defaults();
        settings.default_sampling = Some(SamplingParams {
            temperature: 3.0,
            ..SamplingParams::default()
        });
        assert!(matches!(
            validate_settings(&settings),
            Err(SettingsError::InvalidTemperature(_))
        ));

        settings.default_sampling = Some(SamplingParams {
            top_k: 0,
            ..SamplingParams::default()
        });
        assert!(matches!(
            validate_settings(&settings),
            Err(SettingsError::InvalidTopK(0))
        ));
    }
}
