//! Chunked file transfer with resume support.
//!
//! Copies one file in `chunk_size`-byte units, emitting a `TransferUnit`
//! to the caller after every chunk. Cancellation and the execution
//! deadline are checked at chunk boundaries, so worst-case responsiveness
//! is one chunk's I/O time. On failure the engine reports the byte offset
//! durably flushed so a retried attempt can resume without re-copying.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::error::BexError;
use crate::retry::classify_dest_io;

/// One chunk transfer event. Ephemeral: produced and consumed within a
/// single execution, never shared across executions.
#[derive(Debug, Clone)]
pub struct TransferUnit {
    /// Byte offset of the chunk within the file.
    pub offset: u64,
    /// Chunk length; the final chunk is usually shorter. Wide enough
    /// that no configurable chunk size can truncate it.
    pub len: u64,
    /// Hex SHA-256 of the chunk, when chunk checksums are enabled.
    pub checksum: Option<String>,
}

/// Failure during a chunked copy, carrying the bytes durably flushed to
/// the destination so the caller can record a resume offset.
#[derive(Debug)]
pub struct TransferFailure {
    pub flushed: u64,
    pub error: BexError,
}

/// Wall-clock deadline for the whole execution, checked at chunk
/// boundaries only (never pre-emptively inside a chunk's I/O).
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    pub at: Instant,
    pub limit: Duration,
}

impl Deadline {
    pub fn after(limit: Duration) -> Self {
        Self {
            at: Instant::now() + limit,
            limit,
        }
    }

    pub fn exceeded(&self) -> bool {
        Instant::now() >= self.at
    }

    pub fn as_error(&self) -> BexError {
        BexError::Timeout {
            limit_secs: self.limit.as_secs(),
        }
    }
}

/// Parameters for one file copy.
#[derive(Debug, Clone, Copy)]
pub struct TransferRequest<'a> {
    pub source: &'a Path,
    pub dest: &'a Path,
    pub chunk_size: usize,
    /// Byte position to continue from; the destination must already hold
    /// exactly this many bytes or the copy fails with `ResumeMismatch`.
    pub resume_offset: u64,
    /// Record a SHA-256 per chunk in the emitted units.
    pub checksum_chunks: bool,
}

fn fail(flushed: u64, error: BexError) -> TransferFailure {
    TransferFailure { flushed, error }
}

/// Copy `source` to `dest` in chunks, invoking `on_unit` after each chunk.
/// Returns the destination's total byte length on success. Not restartable
/// by itself; the caller restarts by re-invoking with a new resume offset.
pub fn copy_chunks(
    req: TransferRequest<'_>,
    abort: &AtomicBool,
    deadline: Option<Deadline>,
    mut on_unit: impl FnMut(&TransferUnit),
) -> Result<u64, TransferFailure> {
    debug_assert!(req.chunk_size > 0);

    if let Some(parent) = req.dest.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| fail(0, classify_dest_io(req.resume_offset, req.dest, e)))?;
    }

    let mut dest_file = if req.resume_offset > 0 {
        let found = match std::fs::metadata(req.dest) {
            Ok(m) => m.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => return Err(fail(0, classify_dest_io(req.resume_offset, req.dest, e))),
        };
        if found != req.resume_offset {
            return Err(fail(
                0,
                BexError::ResumeMismatch {
                    expected: req.resume_offset,
                    found,
                },
            ));
        }
        File::options()
            .append(true)
            .open(req.dest)
            .map_err(|e| fail(0, classify_dest_io(req.resume_offset, req.dest, e)))?
    } else {
        File::options()
            .write(true)
            .create(true)
            .truncate(true)
            .open(req.dest)
            .map_err(|e| fail(0, classify_dest_io(0, req.dest, e)))?
    };

    let mut src = File::open(req.source).map_err(|e| {
        fail(
            req.resume_offset,
            BexError::Transfer {
                offset: req.resume_offset,
                source: e,
            },
        )
    })?;
    if req.resume_offset > 0 {
        src.seek(SeekFrom::Start(req.resume_offset)).map_err(|e| {
            fail(
                req.resume_offset,
                BexError::Transfer {
                    offset: req.resume_offset,
                    source: e,
                },
            )
        })?;
    }

    let mut buf = vec![0u8; req.chunk_size];
    let mut offset = req.resume_offset;

    loop {
        if abort.load(Ordering::Relaxed) {
            let _ = dest_file.sync_data();
            return Err(fail(offset, BexError::Cancelled));
        }
        if let Some(d) = deadline {
            if d.exceeded() {
                let _ = dest_file.sync_data();
                return Err(fail(offset, d.as_error()));
            }
        }

        // Fill the chunk buffer; short reads before EOF are re-read so
        // chunk lengths stay exact.
        let mut filled = 0usize;
        while filled < req.chunk_size {
            let n = src.read(&mut buf[filled..]).map_err(|e| {
                fail(offset, BexError::Transfer { offset, source: e })
            })?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        if filled == 0 {
            break;
        }

        if let Err(e) = dest_file.write_all(&buf[..filled]) {
            // Trim any partial chunk so the next attempt can resume cleanly.
            let _ = dest_file.set_len(offset);
            let _ = dest_file.sync_data();
            return Err(fail(offset, classify_dest_io(offset, req.dest, e)));
        }

        let checksum = if req.checksum_chunks {
            use sha2::{Digest, Sha256};
            Some(hex::encode(Sha256::digest(&buf[..filled])))
        } else {
            None
        };

        let unit = TransferUnit {
            offset,
            len: filled as u64,
            checksum,
        };
        offset += filled as u64;
        on_unit(&unit);
    }

    dest_file
        .sync_data()
        .map_err(|e| fail(offset, BexError::Transfer { offset, source: e }))?;
    Ok(offset)
}
