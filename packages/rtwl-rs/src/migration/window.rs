// Watermark-driven window join shared by point stacking and max extraction
//
// A window [start, end] over a set of buffers is released once the
// participating buffers extend more than `margin` ticks beyond `start`.
// The watermark is the first tick not yet released and only moves forward.

use crate::buffer::StreamBuffer;
use serde::{Deserialize, Serialize};

/// Which buffers must be ready before a window is released
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReadinessPolicy {
    /// Every buffer must be ready; a silent input stalls the join
    #[default]
    Strict,

    /// Any non-empty subset of ready buffers is enough
    Lenient,
}

/// A resolved window: inclusive ticks plus the indices of contributing buffers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinWindow {
    pub start: i64,
    pub end: i64,
    pub ready: Vec<usize>,
}

impl JoinWindow {
    pub fn len(&self) -> usize {
        (self.end - self.start + 1) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }
}

#[derive(Debug, Clone)]
pub struct WindowJoin {
    watermark: i64,
    margin_ticks: i64,
    policy: ReadinessPolicy,
}

impl WindowJoin {
    /// New join with its watermark at the epoch
    pub fn new(margin_ticks: i64, policy: ReadinessPolicy) -> Self {
        Self {
            watermark: 0,
            margin_ticks,
            policy,
        }
    }

    pub fn watermark(&self) -> i64 {
        self.watermark
    }

    pub fn margin_ticks(&self) -> i64 {
        self.margin_ticks
    }

    pub fn policy(&self) -> ReadinessPolicy {
        self.policy
    }

    /// Window that may be released now, if any. Does not move the watermark.
    pub fn resolve(&self, buffers: &[StreamBuffer]) -> Option<JoinWindow> {
        if buffers.is_empty() {
            return None;
        }

        let spans: Vec<Option<(i64, i64)>> = buffers
            .iter()
            .map(|b| b.start_tick().zip(b.end_tick()))
            .collect();

        if self.policy == ReadinessPolicy::Strict && spans.iter().any(Option::is_none) {
            return None;
        }

        let start = spans
            .iter()
            .flatten()
            .map(|&(start, _)| start)
            .max()?
            .max(self.watermark);

        let ready: Vec<usize> = spans
            .iter()
            .enumerate()
            .filter_map(|(i, span)| match span {
                Some((_, end)) if end - start > self.margin_ticks => Some(i),
                _ => None,
            })
            .collect();

        let enough = match self.policy {
            ReadinessPolicy::Strict => ready.len() == buffers.len(),
            ReadinessPolicy::Lenient => !ready.is_empty(),
        };
        if !enough {
            return None;
        }

        let end = ready.iter().filter_map(|&i| spans[i]).map(|(_, end)| end).min()?;
        if end < start {
            return None;
        }

        Some(JoinWindow { start, end, ready })
    }

    /// Mark `window` as released
    pub fn advance(&mut self, window: &JoinWindow) {
        self.watermark = self.watermark.max(window.end + 1);
    }

    /// Move the watermark back to the epoch
    pub fn reset(&mut self) {
        self.watermark = 0;
    }
}
