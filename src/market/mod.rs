pub mod expiry;
pub mod gateway_client;
pub mod notifier;
pub mod source;

// Re-exports (public API)
pub use expiry::WeekdayCalendar;
pub use gateway_client::HttpMarketData;
pub use notifier::{Alert, LogNotifier, Notifier, WebhookNotifier};
pub use source::{ExpiryCalendar, ExpiryKind, Instrument, MarketDataSource};
