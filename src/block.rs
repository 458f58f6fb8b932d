//! A dense score block: 256 cells covering one /24.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicI16, AtomicU32, Ordering};

pub const BLOCK_SIZE: usize = 256;
pub const MAX_SCORE: i16 = 32_767;
pub const MIN_SCORE: i16 = -32_767;

/// Clamps a widened sum into the representable score range.
#[inline]
pub fn saturate(value: i32) -> i16 {
    value.clamp(MIN_SCORE as i32, MAX_SCORE as i32) as i16
}

/// Computes `old + delta`, saturating at the score bounds. `delta ==
/// i16::MIN` cannot be negated safely for a decrement, so callers that
/// want "subtract delta" must route it through [`saturating_sub`]
/// instead of negating `delta` themselves.
#[inline]
pub fn saturating_add(old: i16, delta: i16) -> i16 {
    saturate(old as i32 + delta as i32)
}

/// Computes `old - delta`, saturating at the score bounds. Handles
/// `delta == i16::MIN` by redirecting to an increment by `MAX_SCORE`,
/// since `-i16::MIN` overflows `i16`.
#[inline]
pub fn saturating_sub(old: i16, delta: i16) -> i16 {
    if delta == i16::MIN {
        saturating_add(old, MAX_SCORE)
    } else {
        saturating_add(old, -delta)
    }
}

#[repr(align(64))]
pub struct ScoreBlock {
    scores: [AtomicI16; BLOCK_SIZE],
    active_count: AtomicU32,
    lock: Mutex<()>,
}

impl ScoreBlock {
    pub fn new() -> Box<Self> {
        Box::new(ScoreBlock {
            scores: [const { AtomicI16::new(0) }; BLOCK_SIZE],
            active_count: AtomicU32::new(0),
            lock: Mutex::new(()),
        })
    }

    /// Lock-free read of a single cell.
    #[inline]
    pub fn load(&self, host: u8) -> i16 {
        self.scores[host as usize].load(Ordering::Acquire)
    }

    pub fn active_count(&self) -> u32 {
        self.active_count.load(Ordering::Acquire)
    }

    /// Overwrites a cell. Returns `(previous, active_count_delta)` where
    /// `active_count_delta` is -1/0/+1 depending on the zero/non-zero
    /// transition, so the caller can adjust the engine's global count.
    pub fn store(&self, host: u8, value: i16) -> (i16, i32) {
        let _guard = self.lock.lock();
        let cell = &self.scores[host as usize];
        let prev = cell.load(Ordering::Relaxed);
        cell.store(value, Ordering::Release);
        let delta = Self::active_delta(prev, value);
        if delta != 0 {
            self.active_count
                .fetch_add(delta as u32, Ordering::Release);
        }
        (prev, delta)
    }

    /// Applies `f(old) -> new` under the block lock. Used by both
    /// increment/decrement (so the saturation math happens atomically
    /// with respect to other writers of the same cell) and by decay.
    pub fn update_with<F: FnOnce(i16) -> i16>(&self, host: u8, f: F) -> (i16, i16, i32) {
        let _guard = self.lock.lock();
        let cell = &self.scores[host as usize];
        let prev = cell.load(Ordering::Relaxed);
        let new = f(prev);
        if new != prev {
            cell.store(new, Ordering::Release);
        }
        let delta = Self::active_delta(prev, new);
        if delta != 0 {
            self.active_count
                .fetch_add(delta as u32, Ordering::Release);
        }
        (prev, new, delta)
    }

    pub fn delete(&self, host: u8) -> (i16, i32) {
        self.store(host, 0)
    }

    /// Zeros every cell. Used by `clear()`. Returns the prior
    /// `active_count` so the caller can adjust the global counter.
    pub fn reset(&self) -> u32 {
        let _guard = self.lock.lock();
        for cell in &self.scores {
            cell.store(0, Ordering::Release);
        }
        self.active_count.swap(0, Ordering::Release)
    }

    /// Runs `f(host, score)` for every currently non-zero cell. Does not
    /// hold the block lock across the scan: a racing write may be
    /// observed torn between iterations but never produces undefined
    /// behavior, matching the traversal contract in the engine docs.
    pub fn for_each_live<F: FnMut(u8, i16)>(&self, mut f: F) {
        for (i, cell) in self.scores.iter().enumerate() {
            let v = cell.load(Ordering::Acquire);
            if v != 0 {
                f(i as u8, v);
            }
        }
    }

    fn active_delta(prev: i16, new: i16) -> i32 {
        match (prev == 0, new == 0) {
            (true, false) => 1,
            (false, true) => -1,
            _ => 0,
        }
    }
}

pub const BLOCK_MEMORY_BYTES: usize = std::mem::size_of::<ScoreBlock>();
