use super::dispatcher::Dispatcher;
use super::types::{DispatchError, DispatchReport};
use crate::destinations::DestinationStore;
use crate::session::Session;
use crate::template::MessageTemplate;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Owns a session and the saved group list, and lets one broadcast at a
/// time use them.
pub struct Broadcaster {
    session: Mutex<Box<dyn Session>>,
    destinations: DestinationStore,
    dispatcher: Dispatcher,
}

impl Broadcaster {
    pub fn new(session: Box<dyn Session>, destinations: DestinationStore, dispatcher: Dispatcher) -> Self {
        Self {
            session: Mutex::new(session),
            destinations,
            dispatcher,
        }
    }

    /// Broadcast to the saved groups. Fails with `SessionBusy` if another
    /// run still holds the session.
    pub async fn run(
        &self,
        template: &MessageTemplate,
        randomize: bool,
        cancel: &CancellationToken,
    ) -> Result<DispatchReport, DispatchError> {
        let session = self.session.try_lock().map_err(|_| {
            warn!("Broadcast rejected: session already in use");
            DispatchError::SessionBusy
        })?;

        if !session.is_authenticated() {
            return Err(DispatchError::NotAuthenticated);
        }
        if template.is_blank() {
            return Err(DispatchError::EmptyMessage);
        }

        let destinations = self.destinations.load().await?;
        self.dispatcher
            .dispatch(session.as_ref(), &destinations, template, randomize, cancel)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{ChannelSink, DispatchConfig, DispatchStatus};
    use crate::session::InMemorySession;
    use std::sync::Arc;
    use tempfile::TempDir;

    async fn broadcaster_with_groups(
        dir: &TempDir,
        session: Arc<InMemorySession>,
        groups: &[&str],
        dispatcher: Dispatcher,
    ) -> Broadcaster {
        let store = DestinationStore::new(dir.path().join("groups.csv"));
        store.save(groups.iter().copied()).await.unwrap();
        Broadcaster::new(Box::new(session), store, dispatcher)
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_uses_saved_groups() {
        let dir = TempDir::new().unwrap();
        let session = Arc::new(InMemorySession::new("bot-1"));
        let broadcaster = broadcaster_with_groups(
            &dir,
            session.clone(),
            &["grp1", "grp2"],
            Dispatcher::new(DispatchConfig::default()),
        )
        .await;

        let report = broadcaster
            .run(&MessageTemplate::new("hello"), false, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.sent_count(), 2);
        assert_eq!(session.sent_messages().await.len(), 2);
    }

    #[tokio::test]
    async fn test_run_without_saved_groups() {
        let dir = TempDir::new().unwrap();
        let session = Arc::new(InMemorySession::new("bot-1"));
        let store = DestinationStore::new(dir.path().join("groups.csv"));
        let broadcaster = Broadcaster::new(
            Box::new(session),
            store,
            Dispatcher::new(DispatchConfig::default()),
        );

        let result = broadcaster
            .run(&MessageTemplate::new("hello"), false, &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(DispatchError::NoDestinations)));
    }

    #[tokio::test]
    async fn test_blank_message_reported_before_groups_are_read() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("groups.csv");
        std::fs::write(&path, "name\ngrp1\n").unwrap();
        let broadcaster = Broadcaster::new(
            Box::new(Arc::new(InMemorySession::new("bot-1"))),
            DestinationStore::new(&path),
            Dispatcher::new(DispatchConfig::default()),
        );

        let result = broadcaster
            .run(&MessageTemplate::new("  \n "), false, &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(DispatchError::EmptyMessage)));

        let result = broadcaster
            .run(&MessageTemplate::new("hello"), false, &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(DispatchError::Destinations(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_run_is_rejected_while_first_holds_session() {
        let dir = TempDir::new().unwrap();
        let session = Arc::new(InMemorySession::new("bot-1"));
        let (sink, mut rx) = ChannelSink::new();
        let broadcaster = Arc::new(
            broadcaster_with_groups(
                &dir,
                session.clone(),
                &["grp1", "grp2"],
                Dispatcher::new(DispatchConfig::default()).with_sink(Arc::new(sink)),
            )
            .await,
        );

        let cancel = CancellationToken::new();
        let first = {
            let broadcaster = broadcaster.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                broadcaster
                    .run(&MessageTemplate::new("hello"), false, &cancel)
                    .await
            })
        };

        // the first run is now sleeping after its first send
        let outcome = rx.recv().await.unwrap();
        assert_eq!(outcome.status, DispatchStatus::Sent);

        let second = broadcaster
            .run(&MessageTemplate::new("hello"), false, &CancellationToken::new())
            .await;
        assert!(matches!(second, Err(DispatchError::SessionBusy)));

        cancel.cancel();
        let report = first.await.unwrap().unwrap();
        assert!(report.cancelled);
        assert_eq!(report.outcomes.len(), 1);
    }
}
