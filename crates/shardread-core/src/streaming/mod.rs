//! Streaming series replies
//!
//! ```text
//!   transport ──recv──► producer ──[1 batch]──► get_chunks(0), get_chunks(1), ...
//! ```

pub mod chunk;
pub mod reader;
pub mod series;

pub use chunk::{Chunk, ChunkEncoding, QueryStreamResponse, QueryStreamSeriesChunks, accumulate_chunks};
pub use reader::{SeriesChunksStream, SeriesChunksStreamReader};
pub use series::{SharedStreamReader, StreamingChunkSeries, StreamingSeriesSource};
