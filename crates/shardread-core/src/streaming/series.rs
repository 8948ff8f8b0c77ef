//! Series assembled from several replica streams

use super::chunk::{Chunk, accumulate_chunks};
use super::reader::{SeriesChunksStream, SeriesChunksStreamReader};
use crate::error::Result;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// A stream reader shared by every series it carries
pub type SharedStreamReader<S> = Arc<Mutex<SeriesChunksStreamReader<S>>>;

/// Location of one series within one replica's stream
pub struct StreamingSeriesSource<S> {
    /// Reader for the replica's stream
    pub reader: SharedStreamReader<S>,
    /// Position of the series in that stream
    pub series_index: usize,
}

impl<S> Clone for StreamingSeriesSource<S> {
    fn clone(&self) -> Self {
        Self {
            reader: Arc::clone(&self.reader),
            series_index: self.series_index,
        }
    }
}

/// A series whose chunks are still on the wire, possibly from several
/// replicas.
///
/// Series must be read in the order their indexes appear in each source
/// stream.
pub struct StreamingChunkSeries<S> {
    /// Series labels
    pub labels: BTreeMap<String, String>,
    /// Start of the queried range, milliseconds
    pub min_time_ms: i64,
    /// End of the queried range, milliseconds
    pub max_time_ms: i64,
    /// Streams holding chunks for this series
    pub sources: Vec<StreamingSeriesSource<S>>,
}

impl<S: SeriesChunksStream> StreamingChunkSeries<S> {
    /// Pull this series from every source, merge replica copies and keep
    /// chunks overlapping the queried range
    pub async fn chunks(&self) -> Result<Vec<Chunk>> {
        let mut chunks = Vec::new();

        for source in &self.sources {
            let received = source
                .reader
                .lock()
                .await
                .get_chunks(source.series_index)
                .await?;
            chunks = accumulate_chunks(chunks, received);
        }

        chunks.retain(|c| c.overlaps(self.min_time_ms, self.max_time_ms));
        Ok(chunks)
    }
}
