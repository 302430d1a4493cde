use crate::models::Confidence;
use std::time::Duration;

/// Numeric model confidence at or above which a candidate is bucketed HIGH.
pub const CONFIDENCE_HIGH_MIN: f64 = 0.80;
/// Numeric model confidence at or above which a candidate is bucketed MEDIUM.
pub const CONFIDENCE_MEDIUM_MIN: f64 = 0.50;
/// Tier required for the fusion stage to auto-accept its top candidate.
pub const AUTO_ACCEPT_TIER: Confidence = Confidence::High;
/// Laplacian-magnitude variance below which an image is flagged blurry.
/// A uniform image scores 0; in-focus product shots land well above 100.
pub const BLUR_VARIANCE_THRESHOLD: f64 = 100.0;

const DEFAULT_STAGE_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MAX_PHOTOS: usize = 8;

/// Per-request pipeline settings, snapshotted once so concurrent requests
/// cannot observe each other's configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub stage_timeout: Duration,
    pub max_photos: usize,
    pub blur_variance_threshold: f64,
    pub auto_accept_tier: Confidence,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stage_timeout: Duration::from_secs(DEFAULT_STAGE_TIMEOUT_SECS),
            max_photos: DEFAULT_MAX_PHOTOS,
            blur_variance_threshold: BLUR_VARIANCE_THRESHOLD,
            auto_accept_tier: AUTO_ACCEPT_TIER,
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        Self {
            stage_timeout: Duration::from_secs(
                env_u64("STAGE_TIMEOUT_SECS", DEFAULT_STAGE_TIMEOUT_SECS),
            ),
            max_photos: env_usize("MAX_PHOTOS", DEFAULT_MAX_PHOTOS),
            blur_variance_threshold: env_f64("BLUR_VARIANCE_THRESHOLD", BLUR_VARIANCE_THRESHOLD),
            auto_accept_tier: AUTO_ACCEPT_TIER,
        }
    }
}

/// Bucket a raw numeric confidence into a named tier. Values outside
/// [0, 1] clamp rather than leak through unbucketed.
pub fn bucket_confidence(raw: f64) -> Confidence {
    let clamped = if raw.is_finite() {
        raw.clamp(0.0, 1.0)
    } else {
        0.0
    };
    if clamped >= CONFIDENCE_HIGH_MIN {
        Confidence::High
    } else if clamped >= CONFIDENCE_MEDIUM_MIN {
        Confidence::Medium
    } else {
        Confidence::Low
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v >= 1)
        .unwrap_or(default)
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<f64>().ok())
        .filter(|v| v.is_finite() && *v >= 0.0)
        .unwrap_or(default)
}
