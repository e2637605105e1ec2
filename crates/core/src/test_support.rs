// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test builders and proptest strategies shared across crates
//! (enabled via the `test-support` feature).

use crate::ids::PluginId;
use crate::manifest::{PluginManifestBody, SdkCompat};

crate::builder! {
    pub struct PluginManifestBodyBuilder => PluginManifestBody {
        into { id: PluginId = PluginId::from_string("plg-test") }
        into { entry: String = "./plugin" }
        into { name: String = "Test Plugin" }
        into { description: String = "" }
        into { version: String = "1.0.0" }
        into { author: String = "" }
        computed { sdk: SdkCompat = SdkCompat::default() }
        computed { dependency: Vec<crate::manifest::PluginDependency> = Vec::new() }
    }
}

#[cfg(feature = "proptest")]
pub mod strategies {
    use proptest::prelude::*;

    /// A small alphabet of topic names, deliberately including collisions so
    /// generated sequences exercise per-topic ring eviction.
    pub fn topic_name() -> impl Strategy<Value = String> {
        prop_oneof!["alpha", "beta", "gamma"].prop_map(String::from)
    }

    pub fn payload_priority() -> impl Strategy<Value = u8> {
        0u8..=9
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_produces_expected_defaults() {
        let body = PluginManifestBody::builder().build();
        assert_eq!(body.name, "Test Plugin");
        assert_eq!(body.version, "1.0.0");
    }

    #[test]
    fn builder_setters_override_defaults() {
        let body = PluginManifestBody::builder().name("Custom").version("2.0.0").build();
        assert_eq!(body.name, "Custom");
        assert_eq!(body.version, "2.0.0");
    }
}
