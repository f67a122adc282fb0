//! CRM-side plumbing: access-token caching, outbound field policy and the
//! `crm-sync` job handler.
//!
//! The CRM provider itself is an external collaborator reached through
//! [`TokenFetcher`] and [`CrmClient`]; nothing here speaks its API.

pub mod sanitize;
pub mod sync;
pub mod token;
#[cfg(feature = "redis")]
pub mod redis_store;

pub use sanitize::strip_blocked_fields;
pub use sync::{CrmClient, CrmSyncHandler};
pub use token::{
    CachedTokenProvider, CrmToken, InMemoryTokenStore, TokenFetcher, TokenStore, TokenStoreError,
};
#[cfg(feature = "redis")]
pub use redis_store::RedisTokenStore;
