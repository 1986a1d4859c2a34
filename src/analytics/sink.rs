use super::AnalyticsStore;
use crate::dispatch::{DispatchOutcome, OutcomeSink};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// Hands outcomes to a background writer so the dispatch loop never waits
/// on the database.
pub struct AnalyticsSink {
    tx: mpsc::UnboundedSender<DispatchOutcome>,
}

impl AnalyticsSink {
    /// Start the writer task. It exits once every clone of the sink has been
    /// dropped and the queue is drained.
    pub fn spawn(store: AnalyticsStore, bot_id: impl Into<String>) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<DispatchOutcome>();
        let bot_id = bot_id.into();

        let handle = tokio::spawn(async move {
            while let Some(outcome) = rx.recv().await {
                let store = store.clone();
                let bot_id = bot_id.clone();
                let destination = outcome.destination.clone();

                let result =
                    tokio::task::spawn_blocking(move || store.record_outcome(&bot_id, &outcome)).await;
                match result {
                    Ok(Ok(())) => debug!(destination = %destination, "Recorded outcome"),
                    Ok(Err(e)) => error!(destination = %destination, "Failed to record outcome: {}", e),
                    Err(e) => error!(destination = %destination, "Analytics writer panicked: {}", e),
                }
            }
            debug!("Analytics writer stopped");
        });

        (Self { tx }, handle)
    }
}

impl OutcomeSink for AnalyticsSink {
    fn record(&self, outcome: &DispatchOutcome) {
        if self.tx.send(outcome.clone()).is_err() {
            error!(destination = %outcome.destination, "Analytics writer is gone, outcome dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{DispatchConfig, DispatchStatus, Dispatcher};
    use crate::session::InMemorySession;
    use crate::template::MessageTemplate;
    use crate::test_helpers::mocks::destinations;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn test_writer_drains_queue_before_exit() {
        let store = AnalyticsStore::open_in_memory().unwrap();
        let (sink, handle) = AnalyticsSink::spawn(store.clone(), "bot-1");

        sink.record(&DispatchOutcome::new("run", "grp1", DispatchStatus::Sent, None));
        sink.record(&DispatchOutcome::new(
            "run",
            "grp2",
            DispatchStatus::Failed { detail: "nope".to_string() },
            None,
        ));
        drop(sink);
        handle.await.unwrap();

        let stats = store.get_bot_stats("bot-1").unwrap().unwrap();
        assert_eq!(stats.messages_sent, 2);
        assert_eq!(stats.successful_sends, 1);
        assert_eq!(stats.failed_sends, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_run_is_recorded() {
        let store = AnalyticsStore::open_in_memory().unwrap();
        let (sink, handle) = AnalyticsSink::spawn(store.clone(), "bot-1");
        let session = InMemorySession::new("bot-1").with_rate_limit("grp2", 5);

        let dispatcher = Dispatcher::new(DispatchConfig::default()).with_sink(Arc::new(sink));
        dispatcher
            .dispatch(
                &session,
                &destinations(&["grp1", "grp2", "grp3"]),
                &MessageTemplate::new("hello"),
                false,
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        drop(dispatcher);
        handle.await.unwrap();

        let stats = store.get_bot_stats("bot-1").unwrap().unwrap();
        assert_eq!(stats.messages_sent, 3);
        assert_eq!(stats.successful_sends, 2);
        assert_eq!(stats.rate_limited_sends, 1);

        let performance = store.get_group_performance(7).unwrap();
        let names: Vec<_> = performance.iter().map(|p| p.group_name.as_str()).collect();
        assert_eq!(names, vec!["grp1", "grp2", "grp3"]);
    }
}
