//! Overlapping line-window chunking of textual assets
//!
//! Chunks are deterministic and order-free: two runs over the same file
//! yield identical windows, fingerprints, and point IDs.

mod identity;

pub use identity::*;

use crate::config::ChunkConfig;
use uuid::Uuid;

/// Chunking parameters for one asset class
#[derive(Debug, Clone, Copy)]
pub struct ChunkProfile {
    /// Target token budget per chunk (tokens approximated at 4 per line)
    pub target_tokens: usize,
    /// Overlap between consecutive windows, in lines
    pub overlap_lines: usize,
}

impl ChunkProfile {
    pub fn script(config: &ChunkConfig) -> Self {
        Self {
            target_tokens: config.script_target_tokens,
            overlap_lines: config.script_overlap_lines,
        }
    }

    pub fn scene(config: &ChunkConfig) -> Self {
        Self {
            target_tokens: config.scene_target_tokens,
            overlap_lines: config.scene_overlap_lines,
        }
    }

    /// Window height in lines: `max(30, target_tokens / 4)`
    pub fn lines_per_chunk(&self) -> usize {
        (self.target_tokens / 4).max(30)
    }

    /// Window advance: `max(1, lines_per_chunk - overlap)`
    pub fn step(&self) -> usize {
        self.lines_per_chunk()
            .saturating_sub(self.overlap_lines)
            .max(1)
    }
}

/// One line window of a textual asset
#[derive(Debug, Clone)]
pub struct Chunk {
    /// 1-based inclusive start line
    pub line_start: usize,
    /// 1-based inclusive end line
    pub line_end: usize,
    /// Window text, newline-joined
    pub text: String,
    /// FNV-1a 32 fingerprint of the window text, hex
    pub fingerprint: String,
    /// Stable chunk key (`<absPath>#<start>-<end>#<fnv32hex>`)
    pub key: String,
    /// UUID v5 of the chunk key under the repository namespace
    pub point_id: Uuid,
}

/// Split text into overlapping line windows.
///
/// Lines split on `\r?\n`; windows advance by `step()`; the final window is
/// clamped to the end of the file. An empty file yields no chunks at all —
/// the zero-length window is suppressed so no embedding call is made for it.
pub fn chunk_lines(text: &str, abs_path: &str, profile: ChunkProfile) -> Vec<Chunk> {
    if text.is_empty() {
        return Vec::new();
    }

    let lines: Vec<&str> = text
        .split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .collect();

    let total = lines.len();
    let window = profile.lines_per_chunk();
    let step = profile.step();

    let mut chunks = Vec::new();
    let mut start = 0usize;
    loop {
        let end = (start + window).min(total);
        let body = lines[start..end].join("\n");
        if !body.is_empty() {
            let fingerprint = fnv1a32(&body);
            let key = chunk_key(abs_path, start + 1, end, fingerprint);
            chunks.push(Chunk {
                line_start: start + 1,
                line_end: end,
                point_id: point_id(&key),
                fingerprint: format!("{fingerprint:08x}"),
                key,
                text: body,
            });
        }
        if end >= total {
            break;
        }
        start += step;
    }

    chunks
}
