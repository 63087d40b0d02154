//! Single-use handoff from the stream-reading task to the tool call
//!
//! The producer side lives inside the stream handler and is written to when
//! the terminal event arrives; the consumer side is awaited by the tool call
//! with a deadline. Only the first delivery is kept.

use crate::error::BridgeError;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::oneshot;

/// Completion status of an invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationStatus {
    /// The top-level `end` node finished; the text is its rendered inputs
    Succeeded,
    /// The upstream reported the run as failed; the text is the reason
    Failed,
    /// The stream closed before any terminal event; the text is whatever
    /// message chunks had been streamed
    IncompleteStream,
}

/// Text payload of a finished invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationResult {
    pub status: InvocationStatus,
    pub text: String,
}

impl InvocationResult {
    /// A successful result carrying the rendered terminal payload
    pub fn succeeded(text: impl Into<String>) -> Self {
        Self {
            status: InvocationStatus::Succeeded,
            text: text.into(),
        }
    }

    /// The upstream reported the run as failed
    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            status: InvocationStatus::Failed,
            text: reason.into(),
        }
    }

    /// The stream closed early; `partial` is whatever text was streamed
    pub fn incomplete(partial: impl Into<String>) -> Self {
        Self {
            status: InvocationStatus::IncompleteStream,
            text: partial.into(),
        }
    }

    /// Whether the terminal payload was delivered
    pub fn is_success(&self) -> bool {
        self.status == InvocationStatus::Succeeded
    }
}

/// Render a terminal payload as the tool's text result
///
/// A bare JSON string is returned as its content; anything else is
/// serialized compactly.
pub fn render_payload(payload: &Value) -> String {
    match payload {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Create the two halves of a bridge
pub fn channel<T>() -> (BridgeProducer<T>, BridgeConsumer<T>) {
    let (tx, rx) = oneshot::channel();
    (
        BridgeProducer { slot: Some(tx) },
        BridgeConsumer { receiver: rx },
    )
}

/// Write side of a bridge
#[derive(Debug)]
pub struct BridgeProducer<T> {
    slot: Option<oneshot::Sender<T>>,
}

impl<T> BridgeProducer<T> {
    /// Deliver `value` if nothing was delivered before
    ///
    /// Returns `false` when the value was ignored, either because an earlier
    /// delivery won or because the consumer is gone.
    pub fn deliver(&mut self, value: T) -> bool {
        match self.slot.take() {
            Some(sender) => sender.send(value).is_ok(),
            None => false,
        }
    }

    /// Whether a delivery has been attempted
    pub fn is_spent(&self) -> bool {
        self.slot.is_none()
    }
}

/// Read side of a bridge
#[derive(Debug)]
pub struct BridgeConsumer<T> {
    receiver: oneshot::Receiver<T>,
}

impl<T> BridgeConsumer<T> {
    /// Wait up to `deadline` for the delivered value
    pub async fn wait(self, deadline: Duration) -> Result<T, BridgeError> {
        match tokio::time::timeout(deadline, self.receiver).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(BridgeError::Closed),
            Err(_) => Err(BridgeError::Timeout(deadline)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_first_delivery_wins() {
        let (mut producer, consumer) = channel();
        assert!(producer.deliver("first"));
        assert!(!producer.deliver("second"));
        assert!(producer.is_spent());

        assert_eq!(consumer.wait(Duration::from_secs(1)).await, Ok("first"));
    }

    #[tokio::test]
    async fn test_delivery_from_another_task() {
        let (mut producer, consumer) = channel();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            producer.deliver(InvocationResult::succeeded("done"));
        });

        let result = consumer.wait(Duration::from_secs(5)).await.unwrap();
        assert!(result.is_success());
        assert_eq!(result.text, "done");
    }

    #[tokio::test]
    async fn test_wait_times_out() {
        let (_producer, consumer) = channel::<String>();
        let err = consumer.wait(Duration::from_millis(50)).await.unwrap_err();
        assert_eq!(err, BridgeError::Timeout(Duration::from_millis(50)));
    }

    #[tokio::test]
    async fn test_dropped_producer_closes() {
        let (producer, consumer) = channel::<String>();
        drop(producer);
        assert_eq!(
            consumer.wait(Duration::from_secs(1)).await,
            Err(BridgeError::Closed)
        );
    }

    #[tokio::test]
    async fn test_delivery_after_consumer_gone_is_ignored() {
        let (mut producer, consumer) = channel();
        drop(consumer);
        assert!(!producer.deliver(1));
    }

    #[test]
    fn test_render_payload() {
        assert_eq!(render_payload(&json!({"a": 1})), r#"{"a":1}"#);
        assert_eq!(render_payload(&json!("plain text")), "plain text");
        assert_eq!(render_payload(&json!([1, "x"])), r#"[1,"x"]"#);
        assert_eq!(render_payload(&Value::Null), "null");
    }
}
