//! Incremental delivery of model output.
//!
//! A [`StreamingResponder`] moves a model's fragment stream onto a bounded
//! single-producer/single-consumer channel. The producer task forwards each
//! fragment as it arrives and finishes with exactly one terminal event
//! ([`StreamEvent::End`] or [`StreamEvent::Failed`]). A slow consumer applies
//! backpressure: once `capacity` fragments are buffered the producer waits.

use crate::types::{AppError, Result};
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;

/// Boxed fragment stream as returned by [`LLMClient::stream_chat`](super::LLMClient::stream_chat)
pub type FragmentStream = Box<dyn Stream<Item = Result<String>> + Send + Unpin>;

/// One item on the response channel
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Text exactly as received from the model
    Fragment(String),
    /// The model signalled completion
    End,
    /// The model stream failed; carries the classified cause
    Failed(String),
}

/// Spawns producer tasks that feed bounded response channels
#[derive(Debug, Clone)]
pub struct StreamingResponder {
    capacity: usize,
}

impl StreamingResponder {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
        }
    }

    /// Start forwarding `source` and hand back the consuming end.
    pub fn spawn(&self, mut source: FragmentStream) -> ResponseStream {
        let (tx, rx) = mpsc::channel(self.capacity);

        tokio::spawn(async move {
            let mut forwarded = 0usize;
            while let Some(item) = source.next().await {
                match item {
                    Ok(fragment) => {
                        if fragment.is_empty() {
                            continue;
                        }
                        if tx.send(StreamEvent::Fragment(fragment)).await.is_err() {
                            tracing::debug!(forwarded, "response consumer went away");
                            return;
                        }
                        forwarded += 1;
                    }
                    Err(e) => {
                        tracing::error!(kind = e.kind(), error = %e, forwarded, "model stream failed");
                        let _ = tx.send(StreamEvent::Failed(e.to_string())).await;
                        return;
                    }
                }
            }
            tracing::debug!(forwarded, "model stream finished");
            let _ = tx.send(StreamEvent::End).await;
        });

        ResponseStream {
            rx,
            finished: false,
        }
    }
}

/// Consuming end of a response channel. Not restartable.
#[derive(Debug)]
pub struct ResponseStream {
    rx: mpsc::Receiver<StreamEvent>,
    finished: bool,
}

impl ResponseStream {
    /// Next event, or `None` once a terminal event has been returned.
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        if self.finished {
            return None;
        }

        // A producer that vanished without a terminal event counts as failed
        let event = self
            .rx
            .recv()
            .await
            .unwrap_or_else(|| StreamEvent::Failed("producer dropped".to_string()));

        if matches!(event, StreamEvent::End | StreamEvent::Failed(_)) {
            self.finished = true;
        }
        Some(event)
    }

    /// Adapt into an HTTP body stream.
    ///
    /// A failure is yielded as an error after the fragments already sent, so
    /// the server aborts the chunked body instead of completing it.
    pub fn into_text_stream(
        mut self,
    ) -> impl Stream<Item = std::result::Result<String, std::io::Error>> + Send {
        async_stream::stream! {
            while let Some(event) = self.next_event().await {
                match event {
                    StreamEvent::Fragment(text) => yield Ok(text),
                    StreamEvent::End => break,
                    StreamEvent::Failed(cause) => {
                        tracing::debug!(cause = %cause, "aborting streamed body");
                        yield Err(std::io::Error::other(cause));
                        break;
                    }
                }
            }
        }
    }

    /// Drain the channel into one string, surfacing a failure as an error.
    pub async fn collect_text(mut self) -> Result<String> {
        let mut text = String::new();
        while let Some(event) = self.next_event().await {
            match event {
                StreamEvent::Fragment(fragment) => text.push_str(&fragment),
                StreamEvent::End => break,
                StreamEvent::Failed(cause) => return Err(AppError::LLM(cause)),
            }
        }
        Ok(text)
    }
}
