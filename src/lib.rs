pub mod analytics;
pub mod config;
pub mod destinations;
pub mod dispatch;
pub mod session;
pub mod template;

mod test_helpers;
