pub mod content_filter;
pub mod metrics;
pub mod providers;
pub mod relay;
pub mod session_store;
pub mod sweeper;
pub mod usage_tracker;

pub use content_filter::ContentFilter;
pub use relay::ChatRelay;
pub use session_store::SessionStore;
pub use sweeper::Sweeper;
pub use usage_tracker::UsageTracker;
