//! Static device capability facts attached at registration time.
//!
//! Capability reports come straight from untrusted clients and are frequently
//! partial: browsers report `cpuCores` as either a number or the string
//! `"Unavailable"`, and WebGL fingerprinting may yield no GPU strings at all.
//! Normalization is conservative — a malformed report never blocks
//! registration, it just degrades to capacity 1 and `"unavailable"` GPU info.

use serde::{Deserialize, Serialize};

/// Placeholder used when a device cannot (or will not) report a value.
pub const UNAVAILABLE: &str = "unavailable";

/// Upper bound on believable core counts; reports above it clamp down.
pub const MAX_REPORTED_CORES: u32 = 1024;

/// What kind of client the device is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientKind {
    Browser,
    Native,
}

impl Default for ClientKind {
    fn default() -> Self {
        ClientKind::Browser
    }
}

/// GPU vendor/renderer strings as reported by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpuInfo {
    pub vendor: String,
    pub renderer: String,
}

impl Default for GpuInfo {
    fn default() -> Self {
        Self {
            vendor: UNAVAILABLE.to_string(),
            renderer: UNAVAILABLE.to_string(),
        }
    }
}

/// Raw `cpuCores` value from the wire: a number, or a placeholder string
/// like `"Unavailable"` from browsers without `hardwareConcurrency`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReportedCores {
    Count(i64),
    Text(String),
}

impl Default for ReportedCores {
    fn default() -> Self {
        ReportedCores::Text(UNAVAILABLE.to_string())
    }
}

/// Static per-device facts attached to a registry entry at `register` time.
///
/// Never independently mutated; a fresh `device_info` message replaces the
/// whole bag.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceCapabilities {
    #[serde(default)]
    pub client: ClientKind,
    #[serde(default, rename = "userAgent")]
    pub user_agent: Option<String>,
    #[serde(default, rename = "cpuCores")]
    pub cpu_cores: ReportedCores,
    #[serde(default)]
    pub gpu: GpuInfo,
}

impl DeviceCapabilities {
    /// Usable concurrency of the device, always in
    /// `1..=MAX_REPORTED_CORES`.
    ///
    /// Zero, negative, missing, or textual core counts all normalize to 1
    /// (a device that registered is assumed able to run at least one job);
    /// absurd counts clamp to [`MAX_REPORTED_CORES`] instead of wrapping.
    pub fn effective_cores(&self) -> u32 {
        match &self.cpu_cores {
            ReportedCores::Count(n) => u32::try_from(*n)
                .map(|cores| cores.clamp(1, MAX_REPORTED_CORES))
                .unwrap_or(1),
            ReportedCores::Text(_) => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reported_count_passes_through() {
        let caps = DeviceCapabilities {
            cpu_cores: ReportedCores::Count(8),
            ..Default::default()
        };
        assert_eq!(caps.effective_cores(), 8);
    }

    #[test]
    fn zero_cores_defaults_to_one() {
        let caps = DeviceCapabilities {
            cpu_cores: ReportedCores::Count(0),
            ..Default::default()
        };
        assert_eq!(caps.effective_cores(), 1);
    }

    #[test]
    fn negative_cores_defaults_to_one() {
        let caps = DeviceCapabilities {
            cpu_cores: ReportedCores::Count(-4),
            ..Default::default()
        };
        assert_eq!(caps.effective_cores(), 1);
    }

    #[test]
    fn core_count_beyond_u32_normalizes_to_one() {
        // A garbage report must degrade, never truncate to zero capacity.
        let caps = DeviceCapabilities {
            cpu_cores: ReportedCores::Count(1_i64 << 32),
            ..Default::default()
        };
        assert_eq!(caps.effective_cores(), 1);
    }

    #[test]
    fn oversized_core_count_clamps_to_cap() {
        let caps = DeviceCapabilities {
            cpu_cores: ReportedCores::Count(3_000_000_000),
            ..Default::default()
        };
        assert_eq!(caps.effective_cores(), MAX_REPORTED_CORES);
    }

    #[test]
    fn textual_cores_defaults_to_one() {
        let caps = DeviceCapabilities {
            cpu_cores: ReportedCores::Text("Unavailable".into()),
            ..Default::default()
        };
        assert_eq!(caps.effective_cores(), 1);
    }

    #[test]
    fn browser_report_deserializes() {
        // Shape sent by the browser client's getDeviceInfo().
        let caps: DeviceCapabilities = serde_json::from_value(serde_json::json!({
            "client": "browser",
            "userAgent": "Mozilla/5.0",
            "cpuCores": 12,
            "gpu": { "vendor": "NVIDIA Corporation", "renderer": "RTX 4090" }
        }))
        .unwrap();
        assert_eq!(caps.effective_cores(), 12);
        assert_eq!(caps.gpu.vendor, "NVIDIA Corporation");
    }

    #[test]
    fn partial_report_deserializes_with_defaults() {
        let caps: DeviceCapabilities = serde_json::from_value(serde_json::json!({
            "cpuCores": "Unavailable"
        }))
        .unwrap();
        assert_eq!(caps.effective_cores(), 1);
        assert_eq!(caps.gpu.vendor, UNAVAILABLE);
        assert_eq!(caps.client, ClientKind::Browser);
    }

    #[test]
    fn empty_report_deserializes() {
        let caps: DeviceCapabilities = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(caps.effective_cores(), 1);
    }
}
