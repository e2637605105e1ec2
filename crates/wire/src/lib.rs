// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire types for the plugin host runtime's cross-process fabric.
//!
//! Two planes are defined here:
//!
//! - the **fast plane**: a framed msgpack request/response transport
//!   (`codec`, `rpc`) plus a push-batch channel (`push`) for low-latency
//!   publishes, per spec §4.2;
//! - the **ingest envelope** (`ingest`) external producers use to deliver
//!   `delta_batch`/`snapshot` payloads into a bus, per spec §6.
//!
//! `subscribe` carries the `BUS_SUBSCRIBE` request/reply shape and the
//! replay-plan `Node` tree is re-exported from `pb-bus` by callers that need
//! both (kept there since evaluating a plan requires the store).

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod codec;
pub mod ingest;
pub mod push;
pub mod rpc;
pub mod subscribe;

pub use codec::{decode, encode, read_message, write_message, ProtocolError};
pub use ingest::{IngestEnvelope, IngestItem};
pub use push::PushBatch;
pub use rpc::{RpcError, RpcOp, RpcRequest, RpcResponse};
pub use subscribe::{BusSubscribeReply, BusSubscribeRequest};
