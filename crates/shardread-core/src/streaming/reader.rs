//! Bounded series stream reader
//!
//! A replica answers a series query with a stream of messages, each carrying
//! the chunks of a variable number of series. [`SeriesChunksStreamReader`]
//! moves that stream into a background producer which regroups series into
//! fixed-size batches and hands them over through a channel holding a single
//! batch. The consumer then reads series one at a time with
//! [`get_chunks`](SeriesChunksStreamReader::get_chunks), strictly in stream
//! order, without ever holding more than two batches in memory.

use super::chunk::{Chunk, QueryStreamResponse};
use crate::context::RequestContext;
use crate::error::{Error, Result, StreamError};
use async_trait::async_trait;
use std::collections::VecDeque;
use tokio::sync::mpsc;

/// Receiving half of a streamed series reply
#[async_trait]
pub trait SeriesChunksStream: Send + 'static {
    /// Receive the next message. `Ok(None)` marks the end of the stream.
    async fn recv(&mut self) -> Result<Option<QueryStreamResponse>>;

    /// Release the sending half of the stream
    async fn close_send(&mut self) -> Result<()>;

    /// Context of the request this stream belongs to. It is cancelled when
    /// the request completes or is abandoned.
    fn context(&self) -> &RequestContext;
}

/// A buffered series, or the terminal failure of the stream
#[derive(Debug)]
enum StreamedSeries {
    Series { index: usize, chunks: Vec<Chunk> },
    Failed(Error),
}

/// Forward-only reader over one replica's streamed series.
///
/// Series are assigned indexes in arrival order, starting at zero.
/// Buffering stops when the stream ends, fails, or its context is done.
pub struct SeriesChunksStreamReader<S> {
    client: Option<S>,
    ctx: RequestContext,
    batch_rx: Option<mpsc::Receiver<Vec<StreamedSeries>>>,
    batch: VecDeque<StreamedSeries>,
    expected_series_count: usize,
    series_buffer_size: usize,
}

impl<S: SeriesChunksStream> SeriesChunksStreamReader<S> {
    /// Create a reader expecting exactly `expected_series_count` series,
    /// buffered `series_buffer_size` at a time
    pub fn new(client: S, expected_series_count: usize, series_buffer_size: usize) -> Self {
        let ctx = client.context().clone();
        Self {
            client: Some(client),
            ctx,
            batch_rx: None,
            batch: VecDeque::new(),
            expected_series_count,
            series_buffer_size: series_buffer_size.max(1),
        }
    }

    /// Number of series the stream declared
    pub fn expected_series_count(&self) -> usize {
        self.expected_series_count
    }

    /// Start the background producer. Calling it again has no effect.
    ///
    /// Must be called from within a tokio runtime, before the first
    /// [`get_chunks`](Self::get_chunks).
    pub fn start_buffering(&mut self) {
        let Some(client) = self.client.take() else {
            return;
        };

        let (tx, rx) = mpsc::channel(1);
        self.batch_rx = Some(rx);

        let producer = SeriesBufferProducer {
            client,
            tx,
            ctx: self.ctx.clone(),
            expected_series_count: self.expected_series_count,
            series_buffer_size: self.series_buffer_size,
        };
        tokio::spawn(producer.run());
    }

    /// Chunks of the series at `series_index`.
    ///
    /// Must be called with strictly increasing indexes starting at zero.
    pub async fn get_chunks(&mut self, series_index: usize) -> Result<Vec<Chunk>> {
        if self.batch.is_empty() {
            let Some(rx) = self.batch_rx.as_mut() else {
                return Err(StreamError::NotStarted {
                    index: series_index,
                }
                .into());
            };

            match rx.recv().await {
                Some(batch) if !batch.is_empty() => self.batch = batch.into(),
                _ => {
                    // The context is also cancelled once a request completes
                    // successfully, so it is only consulted when nothing is
                    // buffered.
                    if let Some(err) = self.ctx.err() {
                        return Err(err);
                    }
                    return Err(StreamError::Exhausted {
                        index: series_index,
                    }
                    .into());
                }
            }
        }

        let Some(series) = self.batch.pop_front() else {
            return Err(StreamError::Exhausted {
                index: series_index,
            }
            .into());
        };

        match series {
            StreamedSeries::Failed(err) => Err(StreamError::Failed {
                index: series_index,
                source: Box::new(err),
            }
            .into()),
            StreamedSeries::Series { index, .. } if index != series_index => {
                Err(StreamError::IndexMismatch {
                    requested: series_index,
                    actual: index,
                }
                .into())
            }
            StreamedSeries::Series { chunks, .. } => Ok(chunks),
        }
    }
}

/// Background half of the reader
struct SeriesBufferProducer<S> {
    client: S,
    tx: mpsc::Sender<Vec<StreamedSeries>>,
    ctx: RequestContext,
    expected_series_count: usize,
    series_buffer_size: usize,
}

impl<S: SeriesChunksStream> SeriesBufferProducer<S> {
    async fn run(mut self) {
        self.produce().await;

        let Self { mut client, tx, .. } = self;
        drop(tx);
        if let Err(e) = client.close_send().await {
            tracing::debug!("Failed to close series stream: {}", e);
        }
    }

    async fn produce(&mut self) {
        let mut next_series_index = 0;
        let mut current_batch = Vec::with_capacity(self.series_buffer_size);

        loop {
            let received = tokio::select! {
                received = self.client.recv() => received,
                _ = self.ctx.done() => return,
            };

            let msg = match received {
                Ok(Some(msg)) => msg,
                Ok(None) => {
                    if next_series_index < self.expected_series_count {
                        self.send_error(
                            StreamError::UnexpectedEof {
                                expected: self.expected_series_count,
                                received: next_series_index,
                            }
                            .into(),
                        )
                        .await;
                    } else if !current_batch.is_empty() {
                        self.send_or_abort(current_batch).await;
                    }
                    return;
                }
                Err(e) => {
                    self.send_error(e).await;
                    return;
                }
            };

            for series in msg.series_chunks {
                if next_series_index >= self.expected_series_count {
                    self.send_error(
                        StreamError::TooManySeries {
                            expected: self.expected_series_count,
                        }
                        .into(),
                    )
                    .await;
                    return;
                }

                current_batch.push(StreamedSeries::Series {
                    index: next_series_index,
                    chunks: series.chunks,
                });
                next_series_index += 1;

                if current_batch.len() == self.series_buffer_size {
                    let full = std::mem::replace(
                        &mut current_batch,
                        Vec::with_capacity(self.series_buffer_size),
                    );
                    if !self.send_or_abort(full).await {
                        return;
                    }
                }
            }
        }
    }

    /// Push a batch unless the request is done or the reader is gone; a
    /// full buffer nobody reads would otherwise block the producer forever.
    async fn send_or_abort(&mut self, batch: Vec<StreamedSeries>) -> bool {
        tokio::select! {
            _ = self.ctx.done() => false,
            sent = self.tx.send(batch) => sent.is_ok(),
        }
    }

    async fn send_error(&mut self, err: Error) {
        tracing::debug!("Series stream failed: {}", err);
        self.send_or_abort(vec![StreamedSeries::Failed(err)]).await;
    }
}
