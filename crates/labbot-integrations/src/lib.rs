//! HTTP adapters for the services the bot talks to besides the LLM:
//! a remote analytics API, Tavily web search and the Google Sheets
//! maintenance log.

mod http;
pub mod remote_analytics;
pub mod sheets;
pub mod tavily;

pub use remote_analytics::RemoteAnalytics;
pub use sheets::GoogleSheetsStore;
pub use tavily::TavilySearch;
