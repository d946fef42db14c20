//! Forwards executor progress events to a channel for CLI/server renderers.

use async_trait::async_trait;
use tokio::sync::mpsc;

use askdb_core::executor::{ExecutionProgressEvent, ExecutionProgressReporter};

pub struct ChannelProgressReporter {
    tx: mpsc::UnboundedSender<ExecutionProgressEvent>,
}

impl ChannelProgressReporter {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ExecutionProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl ExecutionProgressReporter for ChannelProgressReporter {
    async fn report(&self, event: ExecutionProgressEvent) -> Result<(), String> {
        self.tx
            .send(event)
            .map_err(|_| "progress receiver dropped".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_events_arrive_in_order_and_closed_receiver_is_reported() {
        let (reporter, mut rx) = ChannelProgressReporter::channel();
        reporter
            .report(ExecutionProgressEvent::new("exec", Some(0), None, "step_started"))
            .await
            .expect("send");
        reporter
            .report(ExecutionProgressEvent::new("exec", None, None, "plan_completed"))
            .await
            .expect("send");

        assert_eq!(rx.recv().await.expect("first").phase, "step_started");
        assert_eq!(rx.recv().await.expect("second").phase, "plan_completed");

        drop(rx);
        let err = reporter
            .report(ExecutionProgressEvent::new("exec", None, None, "plan_failed"))
            .await
            .expect_err("closed");
        assert_eq!(err, "progress receiver dropped");
    }
}
