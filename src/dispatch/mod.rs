pub mod broadcaster;
pub mod dispatcher;
pub mod sink;
pub mod types;

pub use broadcaster::Broadcaster;
pub use dispatcher::Dispatcher;
pub use sink::{ChannelSink, OutcomeSink, TracingSink};
pub use types::*;
