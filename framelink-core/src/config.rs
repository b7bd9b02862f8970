//! Channel configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::TransportFormat;

/// Well-known default name of the shared-memory segment.
pub const DEFAULT_CHANNEL_NAME: &str = "framelink-frames";
/// Well-known default name of the frame-ready signal.
pub const DEFAULT_SIGNAL_NAME: &str = "framelink-ready";

/// Configuration for one frame-sharing channel.
///
/// External readers locate the channel by `channel_name`/`signal_name`; the
/// defaults are the fixed well-known names, overrides exist mainly so tests
/// can run isolated channels side by side.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShareConfig {
    /// Name of the shared-memory segment.
    pub channel_name: String,
    /// Name of the cross-process frame-ready signal.
    pub signal_name: String,
    /// Pixel layout frames are published in.
    pub transport_format: TransportFormat,
    /// Attempt zero-copy GPU texture delivery where the platform supports
    /// it. Falls back to memory delivery when setup fails.
    pub gpu_texture: bool,
    /// Minimum spacing between publishes in milliseconds (0 = none).
    /// A pacing/debug knob; production leaves it at 0.
    pub publish_interval_ms: u64,
}

impl Default for ShareConfig {
    fn default() -> Self {
        Self {
            channel_name: DEFAULT_CHANNEL_NAME.into(),
            signal_name: DEFAULT_SIGNAL_NAME.into(),
            transport_format: TransportFormat::Bgra32,
            gpu_texture: true,
            publish_interval_ms: 0,
        }
    }
}

impl ShareConfig {
    /// Publish pacing as a `Duration`, `None` when disabled.
    pub fn publish_interval(&self) -> Option<Duration> {
        (self.publish_interval_ms > 0).then(|| Duration::from_millis(self.publish_interval_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_names_are_well_known() {
        let cfg = ShareConfig::default();
        assert_eq!(cfg.channel_name, "framelink-frames");
        assert_eq!(cfg.signal_name, "framelink-ready");
        assert!(cfg.publish_interval().is_none());
    }

    #[test]
    fn toml_roundtrip() {
        let cfg = ShareConfig::default();
        let text = toml::to_string_pretty(&cfg).unwrap();
        assert!(text.contains("channel_name"));
        let parsed: ShareConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.transport_format, TransportFormat::Bgra32);
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let parsed: ShareConfig = toml::from_str("transport_format = \"i420\"").unwrap();
        assert_eq!(parsed.transport_format, TransportFormat::I420);
        assert_eq!(parsed.channel_name, DEFAULT_CHANNEL_NAME);
    }
}
