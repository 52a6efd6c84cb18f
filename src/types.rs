//! Core data types shared across the crate
//!
//! - [`Sample`] - complex baseband sample carried by every stream
//! - [`SourceStatus`] - health reported by a hardware source
//! - [`SdrStatus`] / [`RxStatus`] - coarse status strings published for operators

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// A complex baseband sample (two IEEE-754 single-precision components)
pub type Sample = rustfft::num_complex::Complex<f32>;

/// Health reported by a hardware sample source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SourceStatus {
    /// Source is closed or stopped
    #[default]
    Offline,
    /// Source is streaming
    Online,
    /// Source reported a failure
    Error,
}

impl std::fmt::Display for SourceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceStatus::Offline => write!(f, "Offline"),
            SourceStatus::Online => write!(f, "Online"),
            SourceStatus::Error => write!(f, "Error"),
        }
    }
}

/// Hardware-side status published by the recorder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SdrStatus {
    #[default]
    Offline,
    Online,
    Error,
    Restarting,
}

impl SdrStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SdrStatus::Offline => "offline",
            SdrStatus::Online => "online",
            SdrStatus::Error => "error",
            SdrStatus::Restarting => "restarting",
        }
    }
}

/// Receive-side status published by the recorder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RxStatus {
    #[default]
    Stopped,
    Running,
    /// Hardware claims to be online but no samples arrive
    NoIq,
    Restarting,
    Error,
}

impl RxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RxStatus::Stopped => "stopped",
            RxStatus::Running => "running",
            RxStatus::NoIq => "no_iq",
            RxStatus::Restarting => "restarting",
            RxStatus::Error => "error",
        }
    }
}

/// Current wall-clock time as fractional unix seconds
pub fn unix_now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
