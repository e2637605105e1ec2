// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Strongly-typed identifiers used across the plugin host runtime.

use crate::define_id;

define_id! {
    /// Identifies a loaded plugin. Normally parsed from the plugin manifest's
    /// `plugin.id` via [`PluginId::from_string`] rather than generated with
    /// `new()`; a collision at registration is resolved by auto-renaming with
    /// a numeric suffix (see the request router's conflict policy).
    pub struct PluginId("plg-");
}

define_id! {
    /// Identifies one outstanding request across the IPC fabric: a
    /// `trigger`/`trigger_custom_event` call, a plugin-to-plugin call, or a
    /// fast-plane RPC. Keys the pending-response map and the per-request wake
    /// event.
    pub struct RequestId("req-");
}

define_id! {
    /// Identifies a registered event handler entry (`event_id` in the
    /// manifest scan). Combined with `plugin_id` and `event_type` to form the
    /// composite handler-registry keys described in the data model.
    pub struct HandlerId("hdl-");
}

define_id! {
    /// Identifies a bus subscription, keyed together with the bus name.
    pub struct SubscriptionId("sub-");
}

define_id! {
    /// Identifies a tracked run (`POST /runs`).
    pub struct RunId("run-");
}

define_id! {
    /// Identifies a blob uploaded via the run protocol's upload endpoints.
    pub struct BlobId("blb-");
}

define_id! {
    /// Identifies an in-progress blob upload session.
    pub struct UploadId("upl-");
}
