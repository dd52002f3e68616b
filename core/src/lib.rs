/// Agora Sync - client-side realtime synchronization layer
///
/// Keeps local caches of community entities (events, groups, posts,
/// conversations, notifications, profiles, settings) consistent with the REST
/// API and a single authenticated push channel, plus debounced search.

pub mod api;
pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod model;
pub mod push;
pub mod search;
pub mod session;
pub mod store;

pub use api::{ApiClient, ApiResult, HttpApiClient};
pub use client::SyncClient;
pub use config::{Config, ReconnectPolicy};
pub use error::{ApiError, Result, SyncError};
pub use push::{ConnectionState, PushLink, PushTransport, TcpPushTransport};
pub use session::{Session, SessionCredential};
pub use store::Store;
