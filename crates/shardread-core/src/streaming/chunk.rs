//! Streamed series payloads

use bytes::Bytes;
use std::cmp::Ordering;

/// Encoding of a chunk's sample data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChunkEncoding {
    /// Gorilla-style XOR float samples
    Xor,
    /// Native histogram samples
    Histogram,
    /// Native float histogram samples
    FloatHistogram,
}

/// One encoded chunk of samples for a series
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Timestamp of the first sample, milliseconds
    pub start_timestamp_ms: i64,
    /// Timestamp of the last sample, milliseconds
    pub end_timestamp_ms: i64,
    /// Sample encoding
    pub encoding: ChunkEncoding,
    /// Encoded samples
    pub data: Bytes,
}

impl Chunk {
    /// Create a chunk
    pub fn new(
        start_timestamp_ms: i64,
        end_timestamp_ms: i64,
        encoding: ChunkEncoding,
        data: impl Into<Bytes>,
    ) -> Self {
        Self {
            start_timestamp_ms,
            end_timestamp_ms,
            encoding,
            data: data.into(),
        }
    }

    /// Whether the chunk has samples within `[min_time_ms, max_time_ms]`
    pub fn overlaps(&self, min_time_ms: i64, max_time_ms: i64) -> bool {
        self.start_timestamp_ms <= max_time_ms && self.end_timestamp_ms >= min_time_ms
    }
}

/// Chunks for one series in a streamed reply. The series is identified by
/// its position in the stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryStreamSeriesChunks {
    /// Chunks, ordered by start time
    pub chunks: Vec<Chunk>,
}

/// One message of a streamed reply
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryStreamResponse {
    /// Series carried by this message, in stream order
    pub series_chunks: Vec<QueryStreamSeriesChunks>,
}

/// Merge two time-ordered chunk lists for the same series, keeping one copy
/// of chunks both replicas returned.
pub fn accumulate_chunks(a: Vec<Chunk>, b: Vec<Chunk>) -> Vec<Chunk> {
    if a.is_empty() {
        return b;
    }
    if b.is_empty() {
        return a;
    }

    let mut out = Vec::with_capacity(a.len() + b.len());
    let mut left = a.into_iter().peekable();
    let mut right = b.into_iter().peekable();

    while let (Some(l), Some(r)) = (left.peek(), right.peek()) {
        if l == r {
            out.extend(left.next());
            right.next();
            continue;
        }

        let order = l
            .start_timestamp_ms
            .cmp(&r.start_timestamp_ms)
            .then(l.end_timestamp_ms.cmp(&r.end_timestamp_ms));
        match order {
            Ordering::Greater => out.extend(right.next()),
            _ => out.extend(left.next()),
        }
    }

    out.extend(left);
    out.extend(right);
    out
}
