use super::types::*;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// An authenticated connection to the messaging provider.
///
/// A session is used by one dispatch run at a time; implementations do not
/// need to handle interleaved resolve/send calls from concurrent runs.
#[async_trait]
pub trait Session: Send + Sync {
    /// Stable identifier of the logged-in account, used for analytics.
    fn account_id(&self) -> String;

    fn is_authenticated(&self) -> bool;

    async fn resolve(&self, name: &str) -> Result<ChatHandle, SessionError>;

    async fn send(&self, handle: &ChatHandle, text: &str) -> Result<(), SessionError>;
}

#[async_trait]
impl<T: Session + ?Sized> Session for Arc<T> {
    fn account_id(&self) -> String {
        (**self).account_id()
    }

    fn is_authenticated(&self) -> bool {
        (**self).is_authenticated()
    }

    async fn resolve(&self, name: &str) -> Result<ChatHandle, SessionError> {
        (**self).resolve(name).await
    }

    async fn send(&self, handle: &ChatHandle, text: &str) -> Result<(), SessionError> {
        (**self).send(handle, text).await
    }
}

/// Scripted session that never touches the network.
///
/// Every name resolves unless a failure was scripted for it; every send
/// succeeds unless a failure or rate limit was scripted for that name.
pub struct InMemorySession {
    account_id: String,
    authenticated: AtomicBool,
    resolve_failures: HashMap<String, SessionError>,
    send_failures: HashMap<String, SessionError>,
    sent: RwLock<Vec<(String, String)>>,
    resolved: RwLock<Vec<String>>,
}

impl InMemorySession {
    pub fn new(account_id: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            authenticated: AtomicBool::new(true),
            resolve_failures: HashMap::new(),
            send_failures: HashMap::new(),
            sent: RwLock::new(Vec::new()),
            resolved: RwLock::new(Vec::new()),
        }
    }

    pub fn unauthenticated(self) -> Self {
        self.authenticated.store(false, Ordering::SeqCst);
        self
    }

    pub fn with_resolve_failure(mut self, name: &str, detail: &str) -> Self {
        self.resolve_failures
            .insert(name.to_string(), SessionError::Resolution(detail.to_string()));
        self
    }

    pub fn with_resolve_rate_limit(mut self, name: &str, retry_after_secs: u64) -> Self {
        self.resolve_failures
            .insert(name.to_string(), SessionError::RateLimited { retry_after_secs });
        self
    }

    pub fn with_send_failure(mut self, name: &str, detail: &str) -> Self {
        self.send_failures
            .insert(name.to_string(), SessionError::Send(detail.to_string()));
        self
    }

    pub fn with_rate_limit(mut self, name: &str, retry_after_secs: u64) -> Self {
        self.send_failures
            .insert(name.to_string(), SessionError::RateLimited { retry_after_secs });
        self
    }

    pub fn disconnect(&self) {
        self.authenticated.store(false, Ordering::SeqCst);
    }

    /// `(group name, text)` pairs in send order.
    pub async fn sent_messages(&self) -> Vec<(String, String)> {
        self.sent.read().await.clone()
    }

    pub async fn resolved_names(&self) -> Vec<String> {
        self.resolved.read().await.clone()
    }
}

#[async_trait]
impl Session for InMemorySession {
    fn account_id(&self) -> String {
        self.account_id.clone()
    }

    fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    async fn resolve(&self, name: &str) -> Result<ChatHandle, SessionError> {
        if !self.is_authenticated() {
            return Err(SessionError::NotAuthenticated);
        }
        self.resolved.write().await.push(name.to_string());

        if let Some(err) = self.resolve_failures.get(name) {
            return Err(err.clone());
        }

        Ok(ChatHandle {
            id: format!("chat-{}", name),
            name: name.to_string(),
            title: Some(name.to_string()),
        })
    }

    async fn send(&self, handle: &ChatHandle, text: &str) -> Result<(), SessionError> {
        if !self.is_authenticated() {
            return Err(SessionError::NotAuthenticated);
        }
        if let Some(err) = self.send_failures.get(&handle.name) {
            return Err(err.clone());
        }

        self.sent
            .write()
            .await
            .push((handle.name.clone(), text.to_string()));
        Ok(())
    }
}
