// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Plugin manifest shape (§6: "consumed, not written") and SDK
//! compatibility checks performed by the registry at load time.

use serde::{Deserialize, Serialize};

use crate::ids::PluginId;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginManifest {
    pub plugin: PluginManifestBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginManifestBody {
    pub id: PluginId,
    /// Path (relative to the manifest) to the compiled plugin entry point.
    pub entry: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub version: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub sdk: SdkCompat,
    #[serde(default)]
    pub dependency: Vec<PluginDependency>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SdkCompat {
    #[serde(default)]
    pub recommended: Option<String>,
    #[serde(default)]
    pub supported: Option<SdkRange>,
    #[serde(default)]
    pub untested: Option<SdkRange>,
    #[serde(default)]
    pub conflicts: Vec<SdkRange>,
}

/// An inclusive `[min, max]` SDK version range. Either bound may be omitted
/// to mean "unbounded in that direction".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SdkRange {
    #[serde(default)]
    pub min: Option<String>,
    #[serde(default)]
    pub max: Option<String>,
}

impl SdkRange {
    pub fn contains(&self, version: &str) -> bool {
        let v = parse_version(version);
        let min_ok = self.min.as_deref().map(parse_version).map_or(true, |min| v >= min);
        let max_ok = self.max.as_deref().map(parse_version).map_or(true, |max| v <= max);
        min_ok && max_ok
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginDependency {
    pub plugin_id: PluginId,
    #[serde(default)]
    pub required: bool,
}

/// Outcome of checking a manifest's declared SDK compatibility against the
/// running host's SDK version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SdkCompatOutcome {
    Ok,
    Warn(String),
    Reject(String),
}

impl SdkCompat {
    /// §6: "The registry rejects a plugin if the host SDK version is in any
    /// `conflicts` range, if `supported` is set and the host is outside it...;
    /// warnings are emitted for `recommended`/`untested` mismatches."
    pub fn check(&self, host_sdk_version: &str) -> SdkCompatOutcome {
        for conflict in &self.conflicts {
            if conflict.contains(host_sdk_version) {
                return SdkCompatOutcome::Reject(format!(
                    "host SDK {host_sdk_version} is in declared conflict range"
                ));
            }
        }
        if let Some(supported) = &self.supported {
            if !supported.contains(host_sdk_version) {
                return SdkCompatOutcome::Reject(format!(
                    "host SDK {host_sdk_version} is outside the declared supported range"
                ));
            }
        }
        if let Some(untested) = &self.untested {
            if untested.contains(host_sdk_version) {
                return SdkCompatOutcome::Warn(format!(
                    "host SDK {host_sdk_version} is only marked untested by this plugin"
                ));
            }
        }
        if let Some(recommended) = &self.recommended {
            if parse_version(recommended) != parse_version(host_sdk_version) {
                return SdkCompatOutcome::Warn(format!(
                    "host SDK {host_sdk_version} differs from the recommended {recommended}"
                ));
            }
        }
        SdkCompatOutcome::Ok
    }
}

/// Parses a loose `major.minor.patch` version string, defaulting missing or
/// unparsable components to zero. Not a full semver implementation: the
/// manifest only ever compares SDK versions the host itself mints.
fn parse_version(s: &str) -> (u64, u64, u64) {
    let mut parts = s.trim().splitn(3, '.').map(|p| p.parse::<u64>().unwrap_or(0));
    (parts.next().unwrap_or(0), parts.next().unwrap_or(0), parts.next().unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_contains_is_inclusive_on_both_bounds() {
        let range = SdkRange { min: Some("1.0.0".into()), max: Some("2.0.0".into()) };
        assert!(range.contains("1.0.0"));
        assert!(range.contains("2.0.0"));
        assert!(range.contains("1.5.3"));
        assert!(!range.contains("2.0.1"));
        assert!(!range.contains("0.9.9"));
    }

    #[test]
    fn unbounded_range_accepts_everything() {
        let range = SdkRange::default();
        assert!(range.contains("99.0.0"));
    }

    #[test]
    fn conflict_range_rejects() {
        let sdk = SdkCompat {
            conflicts: vec![SdkRange { min: Some("1.0.0".into()), max: Some("1.2.0".into()) }],
            ..Default::default()
        };
        assert_eq!(
            sdk.check("1.1.0"),
            SdkCompatOutcome::Reject(
                "host SDK 1.1.0 is in declared conflict range".into()
            )
        );
    }

    #[test]
    fn supported_range_outside_rejects() {
        let sdk = SdkCompat {
            supported: Some(SdkRange { min: Some("2.0.0".into()), max: None }),
            ..Default::default()
        };
        assert!(matches!(sdk.check("1.0.0"), SdkCompatOutcome::Reject(_)));
        assert_eq!(sdk.check("2.5.0"), SdkCompatOutcome::Ok);
    }

    #[test]
    fn untested_range_warns_not_rejects() {
        let sdk = SdkCompat {
            untested: Some(SdkRange { min: Some("3.0.0".into()), max: None }),
            ..Default::default()
        };
        assert!(matches!(sdk.check("3.1.0"), SdkCompatOutcome::Warn(_)));
    }

    #[test]
    fn recommended_mismatch_warns() {
        let sdk = SdkCompat { recommended: Some("1.2.0".into()), ..Default::default() };
        assert!(matches!(sdk.check("1.3.0"), SdkCompatOutcome::Warn(_)));
        assert_eq!(sdk.check("1.2.0"), SdkCompatOutcome::Ok);
    }

    #[test]
    fn manifest_deserializes_from_toml() {
        let toml_src = r#"
            [plugin]
            id = "plg-timer"
            entry = "./target/release/timer-plugin"
            name = "Timer Service"
            version = "1.0.0"

            [plugin.sdk]
            recommended = "1.0.0"
        "#;
        let manifest: PluginManifest = toml::from_str(toml_src).unwrap();
        assert_eq!(manifest.plugin.name, "Timer Service");
        assert_eq!(manifest.plugin.sdk.recommended.as_deref(), Some("1.0.0"));
    }
}
