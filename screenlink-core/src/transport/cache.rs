//! Most recent group of pictures, for viewers joining mid-stream.
//!
//! Holds the latest key-frame and the contiguous deltas after it. A
//! sequence gap or overflow drops the deltas and stops collecting until
//! the next key-frame; the key-frame itself stays, so a replay is always
//! decodable on its own.

use std::collections::VecDeque;

use crate::types::EncodedUnit;

#[derive(Debug)]
pub struct GopCache {
    key: Option<EncodedUnit>,
    deltas: VecDeque<EncodedUnit>,
    max_deltas: usize,
    /// Deltas were lost since `key`; later ones are not decodable.
    broken: bool,
}

impl GopCache {
    pub fn new(max_deltas: usize) -> Self {
        Self {
            key: None,
            deltas: VecDeque::new(),
            max_deltas,
            broken: false,
        }
    }

    /// Record a unit leaving the encoder.
    pub fn push(&mut self, unit: &EncodedUnit) {
        if unit.is_key_frame() {
            self.key = Some(unit.clone());
            self.deltas.clear();
            self.broken = false;
            return;
        }
        let Some(key) = &self.key else {
            return;
        };
        if self.broken {
            return;
        }
        let last = self.deltas.back().unwrap_or(key).sequence;
        if last + 1 != unit.sequence || self.deltas.len() >= self.max_deltas {
            self.deltas.clear();
            self.broken = true;
            return;
        }
        self.deltas.push_back(unit.clone());
    }

    /// Units a joining viewer needs, key-frame first. Empty without a key-frame.
    pub fn replay(&self) -> Vec<EncodedUnit> {
        self.key
            .iter()
            .chain(self.deltas.iter())
            .cloned()
            .collect()
    }

    /// Whether a replay reaches the newest encoded unit. When it does not,
    /// a joining viewer needs a fresh key-frame to follow the live stream.
    pub fn is_current(&self) -> bool {
        self.key.is_some() && !self.broken
    }

    pub fn len(&self) -> usize {
        usize::from(self.key.is_some()) + self.deltas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.key.is_none()
    }

    pub fn clear(&mut self) {
        self.key = None;
        self.deltas.clear();
        self.broken = false;
    }
}

// ── Tests ────────────────────────────────────────────────────────
