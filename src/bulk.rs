//! Bulk CSV-delta loader.
//!
//! Grammar per line: `IP,VALUE` with optional surrounding whitespace.
//! `#`-prefixed and blank lines are comments. `VALUE`:
//!   `N`    absolute set to +N
//!   `-N`   absolute set to -N
//!   `+N`   relative increment by +N
//!   `+-N`  relative increment by -N (the only way to express a
//!          relative decrement)

use crate::address::parse_ipv4;
use crate::engine::{BulkLoadResult, ScoreEngine};
use crate::error::{Result, ScoreEngineError};
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info};

enum Value {
    Set(i16),
    Relative(i16),
}

fn parse_line(line: &str) -> Option<(u32, Value)> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return None;
    }
    let trimmed = match trimmed.split_once('#') {
        Some((before, _)) => before.trim_end(),
        None => trimmed,
    };

    let (ip_str, value_str) = trimmed.split_once(',')?;
    let ip_str = ip_str.trim();
    let value_str = value_str.trim();
    if ip_str.is_empty() || value_str.is_empty() {
        return None;
    }

    let ip = parse_ipv4(ip_str);
    if ip == 0 && ip_str != "0.0.0.0" {
        return None;
    }

    let value = if let Some(rest) = value_str.strip_prefix("+-") {
        Value::Relative(-parse_saturating_magnitude(rest)?)
    } else if let Some(rest) = value_str.strip_prefix('+') {
        Value::Relative(parse_saturating_magnitude(rest)?)
    } else if let Some(rest) = value_str.strip_prefix('-') {
        Value::Set(-parse_saturating_magnitude(rest)?)
    } else {
        Value::Set(parse_saturating_magnitude(value_str)?)
    };
    Some((ip, value))
}

/// Folds digit-by-digit instead of delegating to `str::parse`, so an
/// arbitrarily long run of digits saturates at `MAX_SCORE` instead of
/// failing to parse once it would overflow `u32`.
fn parse_saturating_magnitude(s: &str) -> Option<i16> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let max = crate::block::MAX_SCORE as u32;
    let mut value = 0u32;
    for b in s.bytes() {
        value = (value * 10 + (b - b'0') as u32).min(max);
    }
    Some(value as i16)
}

fn apply_lines<R: BufRead>(engine: &ScoreEngine, reader: R) -> BulkLoadResult {
    let start = Instant::now();
    let mut result = BulkLoadResult::default();

    for line in reader.lines() {
        let Ok(line) = line else {
            result.lines_processed += 1;
            result.lines_skipped += 1;
            result.parse_errors += 1;
            continue;
        };
        result.lines_processed += 1;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        match parse_line(&line) {
            Some((ip, Value::Set(score))) => {
                engine.set(ip, score);
                result.sets += 1;
            }
            Some((ip, Value::Relative(delta))) => {
                if delta >= 0 {
                    engine.increment(ip, delta);
                } else {
                    engine.decrement(ip, delta.unsigned_abs() as i16);
                }
                result.updates += 1;
            }
            None => {
                debug!(line, "bulk load parse error");
                result.parse_errors += 1;
                result.lines_skipped += 1;
            }
        }
    }

    result.elapsed_seconds = start.elapsed().as_secs_f64();
    result.lines_per_second = if result.elapsed_seconds > 0.0 {
        result.lines_processed as f64 / result.elapsed_seconds
    } else {
        0.0
    };
    info!(
        lines_processed = result.lines_processed,
        sets = result.sets,
        updates = result.updates,
        parse_errors = result.parse_errors,
        lines_per_second = result.lines_per_second,
        "bulk load complete"
    );
    result
}

pub fn bulk_load(engine: &ScoreEngine, path: impl AsRef<Path>) -> Result<BulkLoadResult> {
    let path = path.as_ref();
    let file = std::fs::File::open(path).map_err(ScoreEngineError::Io)?;
    let reader = BufReader::with_capacity(64 * 1024, file);
    Ok(apply_lines(engine, reader))
}

pub fn bulk_load_buffer(engine: &ScoreEngine, data: &[u8]) -> BulkLoadResult {
    apply_lines(engine, data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ScoreEngine;

    #[test]
    fn absolute_set_positive_and_negative() {
        let engine = ScoreEngine::new();
        let result = bulk_load_buffer(&engine, b"192.168.1.1,100\n192.168.1.2,-25\n");
        assert_eq!(engine.get(0xC0A80101), 100);
        assert_eq!(engine.get(0xC0A80102), -25);
        assert_eq!(result.sets, 2);
        assert_eq!(result.lines_processed, 2);
    }

    #[test]
    fn oversized_digit_run_saturates_instead_of_erroring() {
        let engine = ScoreEngine::new();
        let result = bulk_load_buffer(&engine, b"10.0.0.1,99999999999999999999\n");
        assert_eq!(engine.get(0x0A000001), crate::block::MAX_SCORE);
        assert_eq!(result.sets, 1);
        assert_eq!(result.parse_errors, 0);
    }

    #[test]
    fn relative_increment_and_decrement() {
        let engine = ScoreEngine::new();
        engine.set(0xC0A80101, 100);
        engine.set(0xC0A80102, 120);
        let result = bulk_load_buffer(&engine, b"192.168.1.1,+50\n192.168.1.2,+-30\n");
        assert_eq!(engine.get(0xC0A80101), 150);
        assert_eq!(engine.get(0xC0A80102), 90);
        assert_eq!(result.updates, 2);
    }

    #[test]
    fn comments_and_blank_lines_count_only_as_processed() {
        let engine = ScoreEngine::new();
        let result = bulk_load_buffer(&engine, b"# a comment\n\n10.0.0.1,5\n");
        assert_eq!(result.lines_processed, 3);
        assert_eq!(result.sets, 1);
        assert_eq!(engine.get(0x0A000001), 5);
    }

    #[test]
    fn unparseable_lines_count_as_parse_errors() {
        let engine = ScoreEngine::new();
        let result = bulk_load_buffer(&engine, b"not,a,valid,line\ngarbage\n");
        assert_eq!(result.parse_errors, 2);
        assert_eq!(result.lines_skipped, 2);
    }

    #[test]
    fn trailing_comment_on_data_line_is_ignored() {
        let engine = ScoreEngine::new();
        let result = bulk_load_buffer(&engine, b"10.0.0.1,100 # seed value\n");
        assert_eq!(engine.get(0x0A000001), 100);
        assert_eq!(result.sets, 1);
    }

    #[test]
    fn bulk_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deltas.csv");
        std::fs::write(&path, "1.2.3.4,42\n").unwrap();
        let engine = ScoreEngine::new();
        let result = bulk_load(&engine, &path).unwrap();
        assert_eq!(engine.get(0x01020304), 42);
        assert_eq!(result.sets, 1);
    }
}
