//! The engine context: owns the bitmap filter and directory, and
//! exposes the full public read/write/decay/iterate/clear contract.

use crate::address::{parse_ipv4, AddressParts};
use crate::bitmap::Bitmap;
use crate::block::{self, BLOCK_MEMORY_BYTES};
use crate::directory::Directory;
use crate::error::{Result, ScoreEngineError};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

/// Result of a bulk CSV load, also used to summarize a decay sweep's
/// effect when logged.
#[derive(Debug, Default, Clone, Copy)]
pub struct BulkLoadResult {
    pub lines_processed: u64,
    pub lines_skipped: u64,
    pub sets: u64,
    pub updates: u64,
    pub parse_errors: u64,
    pub elapsed_seconds: f64,
    pub lines_per_second: f64,
}

pub struct ScoreEngine {
    bitmap: Bitmap,
    directory: Directory,
    score_count: AtomicU64,
    block_count: AtomicU64,
    directory_count: AtomicU64,
}

impl ScoreEngine {
    pub fn new() -> Self {
        let bitmap = Bitmap::new();
        let directory = Directory::new();
        info!(
            bitmap_bytes = bitmap.memory_usage(),
            "scoring engine created"
        );
        ScoreEngine {
            bitmap,
            directory,
            score_count: AtomicU64::new(0),
            block_count: AtomicU64::new(0),
            directory_count: AtomicU64::new(0),
        }
    }

    /// Reads the score for `ip`. Returns 0 if absent.
    pub fn get(&self, ip: u32) -> i16 {
        let prefix24 = AddressParts::prefix24(ip);
        if !self.bitmap.test(prefix24) {
            return 0;
        }
        let parts = AddressParts::decompose(ip);
        match self.directory.lookup(parts.prefix16, parts.block_index) {
            Some(block) => block.load(parts.host_index),
            None => 0,
        }
    }

    /// Like [`get`](Self::get), but parses a dotted-decimal string and
    /// returns `Err(InvalidArgument)` for a malformed address instead
    /// of silently treating it as address 0.
    pub fn get_checked(&self, ip_str: &str) -> Result<i16> {
        if !is_plausible_ipv4(ip_str) {
            return Err(ScoreEngineError::InvalidArgument(format!(
                "invalid IPv4 address: {ip_str}"
            )));
        }
        Ok(self.get(parse_ipv4(ip_str)))
    }

    /// Overwrites the score for `ip`, allocating storage as needed.
    /// Returns the previous score.
    pub fn set(&self, ip: u32, score: i16) -> i16 {
        let (prev, _delta) = self.write(ip, |_prev| score);
        prev
    }

    /// Saturating increment. Returns the new score.
    pub fn increment(&self, ip: u32, delta: i16) -> i16 {
        let (_prev, new) = self.write_and_return_new(ip, move |old| block::saturating_add(old, delta));
        new
    }

    /// Saturating decrement. Returns the new score.
    pub fn decrement(&self, ip: u32, delta: i16) -> i16 {
        let (_prev, new) = self.write_and_return_new(ip, move |old| block::saturating_sub(old, delta));
        new
    }

    /// Sets the score to 0 if present. No-op if already absent.
    pub fn delete(&self, ip: u32) {
        if self.get(ip) == 0 {
            return;
        }
        self.write(ip, |_prev| 0);
    }

    /// Applies a batch of `(address, delta)` increments. Returns the
    /// number of entries applied.
    pub fn increment_batch(&self, entries: &[(u32, i16)]) -> usize {
        for &(ip, delta) in entries {
            self.increment(ip, delta);
        }
        entries.len()
    }

    /// Number of currently non-zero cells across the whole table.
    pub fn count(&self) -> u64 {
        self.score_count.load(Ordering::Acquire)
    }

    /// Number of /24 blocks ever allocated (never decreases).
    pub fn block_count(&self) -> u64 {
        self.block_count.load(Ordering::Acquire)
    }

    /// Number of /16 directory arrays ever allocated (never decreases).
    /// Distinct from `block_count`: many /24 blocks in the same /16
    /// share a single directory array.
    pub fn directory_count(&self) -> u64 {
        self.directory_count.load(Ordering::Acquire)
    }

    /// Approximate bytes owned by the engine: bitmap plus every
    /// allocated directory array and score block.
    pub fn memory_usage(&self) -> usize {
        let dir_entry_bytes = std::mem::size_of::<crate::directory::BlockSlots>();
        self.bitmap.memory_usage()
            + (self.directory_count() as usize) * dir_entry_bytes
            + (self.block_count() as usize) * BLOCK_MEMORY_BYTES
    }

    /// Zeros every block, clears every bitmap bit, and resets the live
    /// count to 0. Allocated blocks remain allocated for reuse.
    pub fn clear(&self) {
        let mut total_cleared: u64 = 0;
        self.directory.for_each_block(|prefix16, block_index, block| {
            let cleared = block.reset();
            if cleared > 0 {
                self.bitmap
                    .clear(((prefix16 as u32) << 8) | block_index as u32);
            }
            total_cleared += cleared as u64;
        });
        self.score_count.fetch_sub(total_cleared, Ordering::AcqRel);
        debug!(cleared = total_cleared, "engine cleared");
    }

    /// Visits every live `(address, score)` pair. `f` returns `false`
    /// to stop the walk early. Returns the number of cells visited.
    /// Must not call back into the engine: nothing here reenters a
    /// block's lock, but a callback that did would deadlock against
    /// itself if it happened to target the same block.
    pub fn foreach<F: FnMut(u32, i16) -> bool>(&self, mut f: F) -> u64 {
        let mut visited = 0u64;
        let mut stop = false;
        self.directory.for_each_block(|prefix16, block_index, block| {
            if stop {
                return;
            }
            block.for_each_live(|host_index, score| {
                if stop {
                    return;
                }
                let ip = ((prefix16 as u32) << 16) | ((block_index as u32) << 8) | host_index as u32;
                visited += 1;
                if !f(ip, score) {
                    stop = true;
                }
            });
        });
        visited
    }

    /// Applies `new = truncate(old * factor)`, snapping to 0 within
    /// `|deadzone|`. `factor` outside `[0.0, 1.0]` is a no-op returning 0.
    /// Returns the number of cells modified.
    pub fn decay(&self, factor: f32, deadzone: i16) -> u64 {
        if !(0.0..=1.0).contains(&factor) {
            return 0;
        }
        let abs_deadzone = deadzone.unsigned_abs() as i32;
        let mut modified = 0u64;
        self.directory.for_each_block(|prefix16, block_index, block| {
            if block.active_count() == 0 {
                return;
            }
            // We can't iterate cells lock-free here and mutate under
            // the per-cell lock at the same time without re-deriving
            // indices, so decay walks all 256 hosts directly.
            for host in 0u16..256 {
                let host = host as u8;
                let (prev, new, delta) = block.update_with(host, |old| {
                    if old == 0 {
                        return 0;
                    }
                    let scaled = (old as f32 * factor).trunc() as i32;
                    let scaled = if scaled.abs() <= abs_deadzone { 0 } else { scaled };
                    block::saturate(scaled)
                });
                if new != prev {
                    modified += 1;
                    self.score_count.fetch_add(delta as i64 as u64, Ordering::AcqRel);
                }
            }
            if block.active_count() == 0 {
                self.bitmap
                    .clear(((prefix16 as u32) << 8) | block_index as u32);
            }
        });
        debug!(factor, deadzone, modified, "decay sweep complete");
        modified
    }

    fn write<F: FnOnce(i16) -> i16>(&self, ip: u32, f: F) -> (i16, i32) {
        let (prev, new, delta) = self.write_raw(ip, f);
        let _ = new;
        (prev, delta)
    }

    fn write_and_return_new<F: Fn(i16) -> i16>(&self, ip: u32, f: F) -> (i16, i16) {
        let (prev, new, _delta) = self.write_raw(ip, f);
        (prev, new)
    }

    /// Shared write path for `set`/`increment`/`decrement`/`delete`:
    /// locates or allocates the block, applies `f`, and re-sets the
    /// bitmap bit unconditionally before returning. The bit must be
    /// re-set even when `lookup_or_insert` found an already-allocated
    /// block, since `decay`/`clear`/`load` may have cleared it while
    /// the block itself stayed allocated; `Bitmap::set` short-circuits
    /// on an already-set bit so this costs nothing in the common case.
    fn write_raw<F: FnOnce(i16) -> i16>(&self, ip: u32, f: F) -> (i16, i16, i32) {
        let parts = AddressParts::decompose(ip);
        let (block, allocated_dir, allocated_block) =
            self.directory
                .lookup_or_insert(parts.prefix16, parts.block_index, &self.bitmap);
        if allocated_dir {
            self.directory_count.fetch_add(1, Ordering::AcqRel);
        }
        if allocated_dir || allocated_block {
            self.block_count.fetch_add(1, Ordering::AcqRel);
        }
        let (prev, new, delta) = block.update_with(parts.host_index, f);
        if delta != 0 {
            self.score_count
                .fetch_add(delta as i64 as u64, Ordering::AcqRel);
        }
        self.bitmap.set(AddressParts::prefix24(ip));
        (prev, new, delta)
    }
}

impl Default for ScoreEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Validates the dotted-decimal shape independently of `parse_ipv4`,
/// since that parser folds "invalid" and "0.0.0.0" into the same zero
/// sentinel and so can't itself distinguish them for `get_checked`.
fn is_plausible_ipv4(s: &str) -> bool {
    let mut octet_count = 1;
    let mut digits_in_octet = 0;
    let mut value = 0u32;
    for c in s.chars() {
        match c {
            '0'..='9' => {
                digits_in_octet += 1;
                value = value * 10 + c.to_digit(10).unwrap();
            }
            '.' => {
                if digits_in_octet == 0 || value > 255 {
                    return false;
                }
                octet_count += 1;
                digits_in_octet = 0;
                value = 0;
            }
            _ => return false,
        }
        if digits_in_octet > 3 {
            return false;
        }
    }
    octet_count == 4 && digits_in_octet > 0 && value <= 255
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get() {
        let engine = ScoreEngine::new();
        engine.set(0xC0A80101, 100);
        assert_eq!(engine.get(0xC0A80101), 100);
        assert_eq!(engine.count(), 1);
    }

    #[test]
    fn set_then_increment() {
        let engine = ScoreEngine::new();
        engine.set(1, 100);
        engine.increment(1, 50);
        assert_eq!(engine.get(1), 150);
    }

    #[test]
    fn set_then_decrement_below_zero() {
        let engine = ScoreEngine::new();
        engine.set(1, 50);
        let new = engine.decrement(1, 60);
        assert_eq!(new, -10);
    }

    #[test]
    fn set_then_delete() {
        let engine = ScoreEngine::new();
        engine.set(1, 77);
        engine.delete(1);
        assert_eq!(engine.get(1), 0);
        assert_eq!(engine.count(), 0);
    }

    #[test]
    fn decay_halves_score() {
        let engine = ScoreEngine::new();
        engine.set(1, 1_000);
        engine.decay(0.5, 0);
        assert_eq!(engine.get(1), 500);
    }

    #[test]
    fn decay_within_deadzone_zeroes_out() {
        let engine = ScoreEngine::new();
        engine.set(1, 5);
        engine.decay(0.5, 10);
        assert_eq!(engine.get(1), 0);
        assert_eq!(engine.count(), 0);
    }

    #[test]
    fn decay_rejects_out_of_range_factor() {
        let engine = ScoreEngine::new();
        engine.set(1, 100);
        assert_eq!(engine.decay(-0.5, 0), 0);
        assert_eq!(engine.decay(1.5, 0), 0);
        assert_eq!(engine.get(1), 100);
    }

    #[test]
    fn write_after_clear_is_readable_again() {
        let engine = ScoreEngine::new();
        engine.set(1, 10);
        engine.clear();
        assert_eq!(engine.get(1), 0);
        engine.set(1, 111);
        assert_eq!(engine.get(1), 111);
    }

    #[test]
    fn write_after_decay_empties_block_is_readable_again() {
        let engine = ScoreEngine::new();
        engine.set(1, 5);
        engine.decay(0.5, 10); // zeroes the cell and clears the bitmap bit
        assert_eq!(engine.get(1), 0);
        engine.set(1, 77);
        assert_eq!(engine.get(1), 77);
    }

    #[test]
    fn clear_resets_everything() {
        let engine = ScoreEngine::new();
        engine.set(1, 10);
        engine.set(2, 20);
        engine.clear();
        assert_eq!(engine.get(1), 0);
        assert_eq!(engine.get(2), 0);
        assert_eq!(engine.count(), 0);
    }

    #[test]
    fn foreach_visits_all_live_entries() {
        let engine = ScoreEngine::new();
        engine.set(1, 10);
        engine.set(2, 20);
        engine.set(3, 0);
        let mut seen = Vec::new();
        engine.foreach(|ip, score| {
            seen.push((ip, score));
            true
        });
        seen.sort();
        assert_eq!(seen, vec![(1, 10), (2, 20)]);
    }

    #[test]
    fn foreach_can_stop_early() {
        let engine = ScoreEngine::new();
        for ip in 1..=10u32 {
            engine.set(ip, 1);
        }
        let mut visited = 0;
        engine.foreach(|_, _| {
            visited += 1;
            visited < 3
        });
        assert!(visited <= 3);
    }

    #[test]
    fn get_checked_rejects_malformed_string() {
        let engine = ScoreEngine::new();
        assert!(engine.get_checked("not-an-ip").is_err());
        assert!(engine.get_checked("192.168.1.1").is_ok());
    }

    #[test]
    fn decrement_i16_min_saturates_instead_of_overflowing() {
        let engine = ScoreEngine::new();
        engine.set(1, 0);
        let new = engine.decrement(1, i16::MIN);
        assert_eq!(new, 32_767);
    }

    #[test]
    fn concurrent_increments_on_same_address_sum_exactly() {
        use std::sync::Arc;
        use std::thread;

        let engine = Arc::new(ScoreEngine::new());
        let threads = 8;
        let per_thread = 100;
        let mut handles = Vec::new();
        for _ in 0..threads {
            let engine = Arc::clone(&engine);
            handles.push(thread::spawn(move || {
                for _ in 0..per_thread {
                    engine.increment(0xC0A80101, 1);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(engine.get(0xC0A80101), (threads * per_thread) as i16);
        assert_eq!(engine.count(), 1);
    }

    #[test]
    fn concurrent_writes_to_disjoint_addresses_are_all_preserved() {
        use std::sync::Arc;
        use std::thread;

        let engine = Arc::new(ScoreEngine::new());
        let mut handles = Vec::new();
        for t in 0..16u32 {
            let engine = Arc::clone(&engine);
            handles.push(thread::spawn(move || {
                engine.set(t, (t + 1) as i16);
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        for t in 0..16u32 {
            assert_eq!(engine.get(t), (t + 1) as i16);
        }
        assert_eq!(engine.count(), 16);
    }
}
