//! Offline-first data sync and token lifecycle layer for the NoghreSod
//! marketplace.
//!
//! Reads go through per-entity repositories that emit `Loading`, then cached
//! data when there is any, then fresh network data or a classified error.
//! Requests carry a bearer token that is refreshed once, single-flight, when
//! the server answers 401. Everything is wired explicitly by [`SyncContext`].

pub mod api;
pub mod auth;
pub mod cache;
pub mod clock;
pub mod config;
pub mod connectivity;
pub mod context;
pub mod error;
pub mod logging;
pub mod query;
pub mod shop;

pub use context::SyncContext;
pub use error::{ErrorKind, SyncError, SyncResult};
pub use query::{Query, Resource, ResourceStream};
