use super::types::{DispatchOutcome, DispatchStatus};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Receives outcomes in emission order.
///
/// `record` is called from inside the dispatch loop and must return
/// without waiting on I/O.
pub trait OutcomeSink: Send + Sync {
    fn record(&self, outcome: &DispatchOutcome);
}

/// Writes every outcome to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl OutcomeSink for TracingSink {
    fn record(&self, outcome: &DispatchOutcome) {
        match &outcome.status {
            DispatchStatus::Sent => {
                info!(run_id = %outcome.run_id, destination = %outcome.destination, "Sent message to {}", outcome.destination);
            }
            DispatchStatus::RateLimited { retry_after_secs } => {
                warn!(
                    run_id = %outcome.run_id,
                    destination = %outcome.destination,
                    retry_after_secs,
                    "Rate limit hit, waiting {} seconds", retry_after_secs
                );
            }
            DispatchStatus::Failed { detail } => {
                error!(
                    run_id = %outcome.run_id,
                    destination = %outcome.destination,
                    "Error sending to {}: {}", outcome.destination, detail
                );
            }
        }
    }
}

/// Forwards outcomes to a subscriber over an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<DispatchOutcome>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DispatchOutcome>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl OutcomeSink for ChannelSink {
    fn record(&self, outcome: &DispatchOutcome) {
        // a dropped receiver only means nobody is listening any more
        let _ = self.tx.send(outcome.clone());
    }
}
