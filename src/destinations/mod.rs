pub mod store;
pub mod types;

pub use store::DestinationStore;
pub use types::*;
