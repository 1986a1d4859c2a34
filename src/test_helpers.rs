#[cfg(test)]
pub mod mocks {
    use crate::destinations::Destination;
    use crate::dispatch::{DispatchOutcome, OutcomeSink};
    use crate::session::{ChatHandle, InMemorySession, Session, SessionError};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_util::sync::CancellationToken;

    pub fn destinations(names: &[&str]) -> Vec<Destination> {
        names
            .iter()
            .map(|name| Destination::parse(name).expect("test group names are not blank"))
            .collect()
    }

    /// Cancels the run once `limit` outcomes have been recorded.
    pub struct CancelAfterSink {
        limit: usize,
        seen: AtomicUsize,
        cancel: CancellationToken,
    }

    impl CancelAfterSink {
        pub fn new(limit: usize, cancel: CancellationToken) -> Self {
            Self {
                limit,
                seen: AtomicUsize::new(0),
                cancel,
            }
        }
    }

    impl OutcomeSink for CancelAfterSink {
        fn record(&self, _outcome: &DispatchOutcome) {
            if self.seen.fetch_add(1, Ordering::SeqCst) + 1 >= self.limit {
                self.cancel.cancel();
            }
        }
    }

    /// Resolves like `InMemorySession`, but no send ever completes.
    pub struct StalledSession {
        inner: InMemorySession,
    }

    impl StalledSession {
        pub fn new(account_id: &str) -> Self {
            Self {
                inner: InMemorySession::new(account_id),
            }
        }

        pub async fn resolved_names(&self) -> Vec<String> {
            self.inner.resolved_names().await
        }
    }

    #[async_trait]
    impl Session for StalledSession {
        fn account_id(&self) -> String {
            self.inner.account_id()
        }

        fn is_authenticated(&self) -> bool {
            self.inner.is_authenticated()
        }

        async fn resolve(&self, name: &str) -> Result<ChatHandle, SessionError> {
            self.inner.resolve(name).await
        }

        async fn send(&self, _handle: &ChatHandle, _text: &str) -> Result<(), SessionError> {
            std::future::pending().await
        }
    }
}
