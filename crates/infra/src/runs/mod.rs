//! Storage and transport adapters for agent-run observers.

pub mod audit;
#[cfg(feature = "redis")]
pub mod live;

pub use audit::PostgresRunAuditLog;
#[cfg(feature = "redis")]
pub use live::RedisLiveChannel;
