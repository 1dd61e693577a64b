//! Single ordered sink for a turn's outgoing events.

use futures::stream::BoxStream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::types::StreamEvent;

/// Outgoing events of one turn, in emission order.
pub type EventStream = BoxStream<'static, StreamEvent>;

/// Sender half of a turn's event channel.
///
/// Producers write one after another; nothing is interleaved. Once the turn
/// is canceled, or the consumer goes away, every write is refused.
#[derive(Clone)]
pub struct StreamWriter {
    tx: mpsc::Sender<StreamEvent>,
    cancel: CancellationToken,
}

impl StreamWriter {
    /// Create a writer and the stream its events arrive on.
    pub fn channel(capacity: usize, cancel: CancellationToken) -> (Self, EventStream) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx, cancel }, Box::pin(ReceiverStream::new(rx)))
    }

    /// Emit an event. Returns false when the event was dropped.
    pub async fn write(&self, event: StreamEvent) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            sent = self.tx.send(event) => {
                if sent.is_err() {
                    // consumer hung up
                    self.cancel.cancel();
                    return false;
                }
                true
            }
        }
    }

    pub fn is_canceled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn writes_arrive_in_order() {
        let (writer, stream) = StreamWriter::channel(8, CancellationToken::new());
        assert!(writer.write(StreamEvent::StartStep).await);
        assert!(writer.write(StreamEvent::FinishStep).await);
        drop(writer);
        let events: Vec<StreamEvent> = stream.collect().await;
        assert_eq!(events, vec![StreamEvent::StartStep, StreamEvent::FinishStep]);
    }

    #[tokio::test]
    async fn cancellation_refuses_writes() {
        let cancel = CancellationToken::new();
        let (writer, stream) = StreamWriter::channel(8, cancel.clone());
        cancel.cancel();
        assert!(!writer.write(StreamEvent::StartStep).await);
        drop(writer);
        assert_eq!(stream.count().await, 0);
    }

    #[tokio::test]
    async fn dropped_consumer_cancels_the_turn() {
        let (writer, stream) = StreamWriter::channel(1, CancellationToken::new());
        drop(stream);
        assert!(!writer.write(StreamEvent::StartStep).await);
        assert!(writer.is_canceled());
    }
}
