pub mod bot_api;
pub mod client;
pub mod store;
pub mod types;

pub use bot_api::BotApiSession;
pub use client::{InMemorySession, Session};
pub use store::SessionStore;
pub use types::*;
