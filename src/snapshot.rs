//! Binary snapshot persistence.
//!
//! Format (little-endian, no padding, no checksum):
//!   4 bytes  magic "SAUR"
//!   4 bytes  version (currently 1)
//!   8 bytes  entry count
//!   entries: 4-byte address, 2-byte signed score, repeated

use crate::engine::ScoreEngine;
use crate::error::{Result, ScoreEngineError};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::time::Instant;
use tracing::{error, info, warn};

const MAGIC: &[u8; 4] = b"SAUR";
const VERSION: u32 = 1;
const HEADER_LEN: u64 = 16;
const ENTRY_LEN: usize = 6;

/// Writes every live `(address, score)` pair to `path` via a temp file
/// plus rename, so a reader never observes a partially written archive.
pub fn save(engine: &ScoreEngine, path: impl AsRef<Path>) -> Result<u64> {
    let path = path.as_ref();
    let start = Instant::now();
    let tmp_path = path.with_extension(format!("tmp.{}", std::process::id()));

    let result = save_to_tmp(engine, &tmp_path);
    let count = match result {
        Ok(count) => count,
        Err(e) => {
            let _ = std::fs::remove_file(&tmp_path);
            error!(error = %e, path = %path.display(), "snapshot save failed");
            return Err(e);
        }
    };

    if let Err(e) = std::fs::rename(&tmp_path, path) {
        let _ = std::fs::remove_file(&tmp_path);
        error!(error = %e, path = %path.display(), "snapshot rename failed");
        return Err(ScoreEngineError::Io(e));
    }

    info!(
        path = %path.display(),
        entries = count,
        elapsed_ms = start.elapsed().as_millis(),
        "snapshot saved"
    );
    Ok(count)
}

fn save_to_tmp(engine: &ScoreEngine, tmp_path: &Path) -> Result<u64> {
    let file = File::create(tmp_path)?;
    let mut writer = BufWriter::new(file);

    writer.write_all(MAGIC)?;
    writer.write_all(&VERSION.to_le_bytes())?;
    writer.write_all(&0u64.to_le_bytes())?; // placeholder count

    let mut count = 0u64;
    let mut io_err = None;
    engine.foreach(|ip, score| {
        if io_err.is_some() {
            return false;
        }
        let mut buf = [0u8; ENTRY_LEN];
        buf[0..4].copy_from_slice(&ip.to_le_bytes());
        buf[4..6].copy_from_slice(&score.to_le_bytes());
        if let Err(e) = writer.write_all(&buf) {
            io_err = Some(e);
            return false;
        }
        count += 1;
        true
    });
    if let Some(e) = io_err {
        return Err(ScoreEngineError::Io(e));
    }

    writer.flush()?;
    let file = writer.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;

    // back-patch the entry count now that we know it.
    write_count_at(tmp_path, count)?;

    Ok(count)
}

fn write_count_at(path: &Path, count: u64) -> io::Result<()> {
    use std::io::{Seek, SeekFrom};
    let mut file = std::fs::OpenOptions::new().write(true).open(path)?;
    file.seek(SeekFrom::Start(8))?;
    file.write_all(&count.to_le_bytes())?;
    file.flush()?;
    file.sync_all()
}

/// Clears `engine` and replaces its contents with the archive at
/// `path`. Returns the number of entries applied.
pub fn load(engine: &ScoreEngine, path: impl AsRef<Path>) -> Result<u64> {
    let path = path.as_ref();
    let start = Instant::now();
    let file = File::open(path).map_err(|e| {
        error!(error = %e, path = %path.display(), "snapshot open failed");
        ScoreEngineError::Io(e)
    })?;
    let mut reader = BufReader::new(file);

    let mut header = [0u8; HEADER_LEN as usize];
    reader.read_exact(&mut header).map_err(ScoreEngineError::Io)?;

    if &header[0..4] != MAGIC {
        warn!(path = %path.display(), "snapshot has bad magic");
        return Err(ScoreEngineError::InvalidArgument(
            "snapshot magic mismatch".into(),
        ));
    }
    let version = u32::from_le_bytes(header[4..8].try_into().unwrap());
    if version != VERSION {
        warn!(path = %path.display(), version, "snapshot has unsupported version");
        return Err(ScoreEngineError::InvalidArgument(format!(
            "unsupported snapshot version {version}"
        )));
    }
    let entry_count = u64::from_le_bytes(header[8..16].try_into().unwrap());
    if entry_count > u32::MAX as u64 {
        return Err(ScoreEngineError::InvalidArgument(format!(
            "snapshot entry count {entry_count} exceeds 2^32"
        )));
    }

    engine.clear();

    let mut buf = [0u8; ENTRY_LEN];
    for _ in 0..entry_count {
        reader.read_exact(&mut buf).map_err(ScoreEngineError::Io)?;
        let ip = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        let score = i16::from_le_bytes(buf[4..6].try_into().unwrap());
        if score != 0 {
            engine.set(ip, score);
        }
    }

    info!(
        path = %path.display(),
        entries = entry_count,
        elapsed_ms = start.elapsed().as_millis(),
        "snapshot loaded"
    );
    Ok(entry_count)
}
