use super::sink::OutcomeSink;
use super::types::*;
use crate::destinations::Destination;
use crate::session::{Session, SessionError};
use crate::template::{MessageTemplate, SpintaxExpander, TemplateExpander};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Drives one broadcast: destinations are handled strictly one after the
/// other, and each one gets exactly one outcome.
pub struct Dispatcher {
    config: DispatchConfig,
    expander: Arc<dyn TemplateExpander>,
    sinks: Vec<Arc<dyn OutcomeSink>>,
}

impl Dispatcher {
    pub fn new(config: DispatchConfig) -> Self {
        Self {
            config,
            expander: Arc::new(SpintaxExpander::new()),
            sinks: Vec::new(),
        }
    }

    pub fn with_expander(mut self, expander: Arc<dyn TemplateExpander>) -> Self {
        self.expander = expander;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn OutcomeSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Send `template` to every destination in order. A destination listed
    /// more than once is only handled at its first position.
    ///
    /// Precondition failures return an error before any send. Everything
    /// that goes wrong afterwards is recorded as an outcome. Cancelling
    /// `cancel` ends the run early with the outcomes collected so far; a
    /// destination whose request was interrupted gets no outcome.
    pub async fn dispatch(
        &self,
        session: &dyn Session,
        destinations: &[Destination],
        template: &MessageTemplate,
        randomize: bool,
        cancel: &CancellationToken,
    ) -> Result<DispatchReport, DispatchError> {
        if !session.is_authenticated() {
            return Err(DispatchError::NotAuthenticated);
        }

        let first_text = self.expander.expand(template.as_str(), randomize);
        if first_text.is_empty() {
            return Err(DispatchError::EmptyMessage);
        }

        let destinations = unique(destinations);
        if destinations.is_empty() {
            return Err(DispatchError::NoDestinations);
        }

        let mut report = DispatchReport::new();
        report.start();
        info!(
            run_id = %report.run_id,
            account = %session.account_id(),
            destinations = destinations.len(),
            randomize,
            "Starting broadcast"
        );

        let mut first_text = Some(first_text);
        for destination in destinations {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let text = match first_text.take() {
                Some(text) => text,
                None => self.expander.expand(template.as_str(), randomize),
            };

            let Some((outcome, pause)) = self.deliver(session, &report.run_id, destination, text, cancel).await else {
                info!(run_id = %report.run_id, destination = %destination, "Cancelled while contacting group");
                report.cancelled = true;
                break;
            };
            self.emit(&outcome);
            report.outcomes.push(outcome);

            if let Some(pause) = pause {
                if !wait(pause, cancel).await {
                    report.cancelled = true;
                    break;
                }
            }
        }

        report.finish();
        info!(
            run_id = %report.run_id,
            sent = report.sent_count(),
            rate_limited = report.rate_limited_count(),
            failed = report.failed_count(),
            cancelled = report.cancelled,
            "Broadcast finished"
        );

        Ok(report)
    }

    /// One destination: resolve, send, and decide how long to pause before
    /// the next one. `None` when cancelled mid-request.
    async fn deliver(
        &self,
        session: &dyn Session,
        run_id: &str,
        destination: &Destination,
        text: String,
        cancel: &CancellationToken,
    ) -> Option<(DispatchOutcome, Option<Duration>)> {
        if text.is_empty() {
            let status = DispatchStatus::Failed {
                detail: "message expanded to empty text".to_string(),
            };
            return Some((DispatchOutcome::new(run_id, destination.as_str(), status, Some(text)), None));
        }

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            result = round_trip(session, destination, &text) => result,
        };

        let (status, pause) = match result {
            Ok(()) => (DispatchStatus::Sent, Some(self.config.inter_send_delay())),
            Err(SessionError::RateLimited { retry_after_secs }) => (
                DispatchStatus::RateLimited { retry_after_secs },
                Some(Duration::from_secs(retry_after_secs)),
            ),
            Err(e) => (DispatchStatus::Failed { detail: e.to_string() }, None),
        };

        Some((DispatchOutcome::new(run_id, destination.as_str(), status, Some(text)), pause))
    }

    fn emit(&self, outcome: &DispatchOutcome) {
        for sink in &self.sinks {
            sink.record(outcome);
        }
    }
}

async fn round_trip(session: &dyn Session, destination: &Destination, text: &str) -> Result<(), SessionError> {
    let handle = session.resolve(destination.as_str()).await?;
    debug!(destination = %destination, chat_id = %handle.id, "Resolved group");
    session.send(&handle, text).await
}

fn unique(destinations: &[Destination]) -> Vec<&Destination> {
    let mut seen = HashSet::new();
    destinations
        .iter()
        .filter(|destination| {
            let first = seen.insert(destination.as_str());
            if !first {
                warn!(destination = %destination, "Skipping duplicate group");
            }
            first
        })
        .collect()
}

/// Sleep for `duration` unless cancelled first. Returns false on cancel.
async fn wait(duration: Duration, cancel: &CancellationToken) -> bool {
    if duration.is_zero() {
        return !cancel.is_cancelled();
    }

    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}
