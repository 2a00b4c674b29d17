//! Record channels between commands.
//!
//! ```text
//!   stage N ──send──▶ [PipelineChannel: VecDeque<Record>] ──receive──▶ stage N+1
//!                     ├── send waits while the queue is full (backpressure)
//!                     ├── receive waits while the queue is empty
//!                     ├── close_for_consumer → receive drains, then ends the stream
//!                     └── close_for_producer → every pending or later send fails
//!                                              with ProducerClosed
//! ```
//!
//! Every stage closes its input for-producer and its output for-consumer when
//! it finishes, however it finishes. A stage that stops reading early (e.g.
//! `take 3`) therefore stops its upstream, and a stage that stops writing ends
//! the stream of its downstream.
//!
//! The queue lives behind a `std::sync::Mutex`; critical sections are plain
//! `VecDeque` operations and the lock is never held across an `.await`.

use crate::record::{LOCATION, Record};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tokio::sync::Notify;

/// Returned by [`OutputChannel::send`] once nobody downstream will read again.
///
/// This is a control-flow signal, not a failure: commands propagate it with `?`
/// and the pipeline turns it into a successful exit of the producing stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("downstream stopped reading")]
pub struct ProducerClosed;

/// Source of records for a command.
#[async_trait]
pub trait InputChannel: Send + Sync {
    /// Next record, or `None` at end of stream.
    async fn receive(&self) -> Option<Record>;
}

/// Sink of records for a command.
#[async_trait]
pub trait OutputChannel: Send + Sync {
    async fn send(&self, record: Record) -> Result<(), ProducerClosed>;
}

/// Default number of records buffered between two stages.
pub const DEFAULT_CAPACITY: usize = 16;

struct Queue {
    records: VecDeque<Record>,
    producer_closed: bool,
    consumer_closed: bool,
}

/// Bounded single-producer/single-consumer handoff between two pipeline stages.
pub struct PipelineChannel {
    queue: Mutex<Queue>,
    capacity: usize,
    /// Signalled when a record is queued or the stream ends.
    readable: Notify,
    /// Signalled when a record is taken or sends must stop.
    writable: Notify,
}

impl PipelineChannel {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(Queue {
                records: VecDeque::with_capacity(capacity.min(1024)),
                producer_closed: false,
                consumer_closed: false,
            }),
            capacity: capacity.max(1),
            readable: Notify::new(),
            writable: Notify::new(),
        }
    }

    fn queue(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Takes the next record, waiting for one if the queue is empty.
    ///
    /// Returns `None` once the producer has closed the stream and every queued
    /// record was taken. A task cancelled while waiting simply stops here.
    pub async fn receive(&self) -> Option<Record> {
        loop {
            {
                let mut queue = self.queue();
                if queue.producer_closed {
                    return None;
                }
                if let Some(record) = queue.records.pop_front() {
                    drop(queue);
                    self.writable.notify_one();
                    return Some(record);
                }
                if queue.consumer_closed {
                    return None;
                }
            }
            self.readable.notified().await;
        }
    }

    /// Queues `record`, waiting while the queue is full.
    ///
    /// Fails with [`ProducerClosed`] if the channel is, or becomes while
    /// waiting, closed for the producer.
    pub async fn send(&self, record: Record) -> Result<(), ProducerClosed> {
        loop {
            {
                let mut queue = self.queue();
                if queue.producer_closed || queue.consumer_closed {
                    return Err(ProducerClosed);
                }
                if queue.records.len() < self.capacity {
                    queue.records.push_back(record);
                    drop(queue);
                    self.readable.notify_one();
                    return Ok(());
                }
            }
            self.writable.notified().await;
        }
    }

    /// The reading side will not read anymore: stop the writing side.
    pub fn close_for_producer(&self) {
        let mut queue = self.queue();
        queue.producer_closed = true;
        queue.records.clear();
        drop(queue);
        self.writable.notify_one();
        self.readable.notify_one();
    }

    /// The writing side will not write anymore: end the stream once drained.
    pub fn close_for_consumer(&self) {
        self.queue().consumer_closed = true;
        self.readable.notify_one();
    }
}

impl Default for PipelineChannel {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[async_trait]
impl InputChannel for PipelineChannel {
    async fn receive(&self) -> Option<Record> {
        PipelineChannel::receive(self).await
    }
}

#[async_trait]
impl OutputChannel for PipelineChannel {
    async fn send(&self, record: Record) -> Result<(), ProducerClosed> {
        PipelineChannel::send(self, record).await
    }
}

/// Input that is always at end of stream.
pub struct EmptyInput;

#[async_trait]
impl InputChannel for EmptyInput {
    async fn receive(&self) -> Option<Record> {
        None
    }
}

/// Lines of the process standard input, as text records.
pub struct StdinInput {
    lines: tokio::sync::Mutex<Lines<BufReader<tokio::io::Stdin>>>,
}

impl StdinInput {
    pub fn new() -> Self {
        Self {
            lines: tokio::sync::Mutex::new(BufReader::new(tokio::io::stdin()).lines()),
        }
    }
}

impl Default for StdinInput {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InputChannel for StdinInput {
    async fn receive(&self) -> Option<Record> {
        match self.lines.lock().await.next_line().await {
            Ok(line) => line.map(Record::text),
            Err(e) => {
                tracing::warn!("failed to read standard input: {}", e);
                None
            }
        }
    }
}

/// Renders records as lines on a writer (the terminal, usually).
pub struct WriterOutput<W> {
    writer: tokio::sync::Mutex<W>,
    separator: &'static str,
}

impl<W> WriterOutput<W> {
    pub fn new(writer: W, separator: &'static str) -> Self {
        Self {
            writer: tokio::sync::Mutex::new(writer),
            separator,
        }
    }
}

impl WriterOutput<tokio::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(tokio::io::stdout(), "\t")
    }
}

impl WriterOutput<tokio::io::Stderr> {
    pub fn stderr() -> Self {
        Self::new(tokio::io::stderr(), ": ")
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> OutputChannel for WriterOutput<W> {
    async fn send(&self, record: Record) -> Result<(), ProducerClosed> {
        let mut line = record.render(self.separator);
        line.push('\n');
        let mut writer = self.writer.lock().await;
        // a closed terminal or pipe means nobody reads us anymore
        writer.write_all(line.as_bytes()).await.map_err(|e| {
            tracing::debug!("output closed: {}", e);
            ProducerClosed
        })?;
        writer.flush().await.map_err(|_| ProducerClosed)
    }
}

/// Keeps every record in memory. Used to capture output.
#[derive(Default)]
pub struct Collector {
    records: Mutex<Vec<Record>>,
}

impl Collector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<Record> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Every record rendered with tab separators.
    pub fn lines(&self) -> Vec<String> {
        self.records().iter().map(|r| r.render("\t")).collect()
    }
}

#[async_trait]
impl OutputChannel for Collector {
    async fn send(&self, record: Record) -> Result<(), ProducerClosed> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
        Ok(())
    }
}

/// Tags every record with the location of the statement writing it.
pub struct LocatedOutput {
    inner: Arc<dyn OutputChannel>,
    location: String,
}

impl LocatedOutput {
    pub fn new(inner: Arc<dyn OutputChannel>, location: impl Into<String>) -> Self {
        Self {
            inner,
            location: location.into(),
        }
    }
}

#[async_trait]
impl OutputChannel for LocatedOutput {
    async fn send(&self, record: Record) -> Result<(), ProducerClosed> {
        self.inner
            .send(record.tag(LOCATION, self.location.as_str()))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_records_arrive_in_order_then_end() {
        let channel = Arc::new(PipelineChannel::new(2));
        let producer = {
            let channel = channel.clone();
            tokio::spawn(async move {
                for i in 0..5 {
                    channel.send(Record::of("n", i as i64)).await?;
                }
                channel.close_for_consumer();
                Ok::<_, ProducerClosed>(())
            })
        };

        let mut seen = Vec::new();
        while let Some(record) = channel.receive().await {
            seen.push(record.render(""));
        }
        assert_eq!(seen, vec!["0", "1", "2", "3", "4"]);
        assert_eq!(producer.await.unwrap(), Ok(()));
    }

    #[tokio::test]
    async fn test_close_for_producer_interrupts_blocked_send() {
        let channel = Arc::new(PipelineChannel::new(1));
        channel.send(Record::text("fills the queue")).await.unwrap();

        let blocked = {
            let channel = channel.clone();
            tokio::spawn(async move { channel.send(Record::text("waits")).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!blocked.is_finished());

        channel.close_for_producer();
        let result = tokio::time::timeout(Duration::from_secs(1), blocked)
            .await
            .expect("send should be released")
            .unwrap();
        assert_eq!(result, Err(ProducerClosed));
        assert_eq!(
            channel.send(Record::text("later")).await,
            Err(ProducerClosed)
        );
    }

    #[tokio::test]
    async fn test_close_for_consumer_releases_blocked_receive() {
        let channel = Arc::new(PipelineChannel::new(4));
        let waiting = {
            let channel = channel.clone();
            tokio::spawn(async move { channel.receive().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        channel.close_for_consumer();
        let received = tokio::time::timeout(Duration::from_secs(1), waiting)
            .await
            .expect("receive should be released")
            .unwrap();
        assert_eq!(received, None);
    }

    #[tokio::test]
    async fn test_queued_records_survive_consumer_close() {
        let channel = PipelineChannel::new(4);
        channel.send(Record::text("a")).await.unwrap();
        channel.close_for_consumer();
        assert_eq!(channel.receive().await, Some(Record::text("a")));
        assert_eq!(channel.receive().await, None);
    }

    #[tokio::test]
    async fn test_located_output_tags_records() {
        let collector = Arc::new(Collector::new());
        let located = LocatedOutput::new(collector.clone(), "grep");
        located.send(Record::text("bad pattern")).await.unwrap();
        assert_eq!(collector.lines(), vec!["grep\tbad pattern"]);
    }
}
