// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Push-batch envelope for the fast plane's hot path (spec §4.2). Producers
//! buffer locally and flush at a max batch size or after a time budget;
//! the consumer validates `(first_seq, last_seq, count)` against a
//! per-plugin watermark.

use pb_core::ids::PluginId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushBatch {
    pub from_plugin: PluginId,
    pub first_seq: u64,
    pub last_seq: u64,
    pub count: u64,
    pub items: Vec<Value>,
}

/// Outcome of validating a batch against a plugin's watermark (spec §4.2:
/// "advances the watermark atomically (O(1)) or ... scans the item sequence
/// (O(n))").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatermarkOutcome {
    /// `first_seq` picks up exactly where the watermark left off; advanced
    /// to `last_seq` in O(1).
    Advanced,
    /// The batch is entirely behind the watermark (a duplicate resend);
    /// dropped without advancing.
    Duplicate,
    /// `first_seq`/`last_seq`/`count` are inconsistent with each other, or
    /// skip ahead of the watermark, leaving a gap.
    OutOfOrder,
}

impl PushBatch {
    /// Whether the declared `(first_seq, last_seq, count)` triple is
    /// internally consistent, independent of any watermark.
    pub fn is_self_consistent(&self) -> bool {
        self.last_seq >= self.first_seq
            && self.count == self.last_seq - self.first_seq + 1
            && self.items.len() as u64 == self.count
    }

    /// Validate against `watermark` (the last accepted seq for this
    /// plugin, or `None` if nothing has been accepted yet) and return both
    /// the outcome and the watermark to adopt on `Advanced`.
    pub fn check_watermark(&self, watermark: Option<u64>) -> WatermarkOutcome {
        if !self.is_self_consistent() {
            return WatermarkOutcome::OutOfOrder;
        }
        match watermark {
            None => WatermarkOutcome::Advanced,
            Some(w) if self.last_seq <= w => WatermarkOutcome::Duplicate,
            Some(w) if self.first_seq == w + 1 => WatermarkOutcome::Advanced,
            Some(_) => WatermarkOutcome::OutOfOrder,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(first: u64, last: u64, n: usize) -> PushBatch {
        PushBatch {
            from_plugin: PluginId::from_string("plg-a"),
            first_seq: first,
            last_seq: last,
            count: last - first + 1,
            items: vec![Value::Null; n],
        }
    }

    #[test]
    fn fresh_watermark_accepts_any_starting_batch() {
        let b = batch(5, 7, 3);
        assert_eq!(b.check_watermark(None), WatermarkOutcome::Advanced);
    }

    #[test]
    fn contiguous_batch_advances() {
        let b = batch(8, 10, 3);
        assert_eq!(b.check_watermark(Some(7)), WatermarkOutcome::Advanced);
    }

    #[test]
    fn resend_of_already_applied_range_is_duplicate() {
        let b = batch(3, 5, 3);
        assert_eq!(b.check_watermark(Some(7)), WatermarkOutcome::Duplicate);
    }

    #[test]
    fn gap_is_out_of_order() {
        let b = batch(9, 10, 2);
        assert_eq!(b.check_watermark(Some(7)), WatermarkOutcome::OutOfOrder);
    }

    #[test]
    fn mismatched_count_is_not_self_consistent() {
        let b = batch(1, 3, 2);
        assert!(!b.is_self_consistent());
    }
}
