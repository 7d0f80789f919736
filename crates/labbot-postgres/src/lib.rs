//! Postgres adapters: the SQL analytics backend over the readings database
//! and the conversation checkpointer.

pub mod analytics;
pub mod checkpointer;
pub mod pool;

pub use analytics::SqlAnalytics;
pub use checkpointer::PostgresCheckpointer;
pub use pool::connect_lazy;
