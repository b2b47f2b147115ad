//! Store interface consumed by every component above it, plus the two
//! implementations: the HTTP transport and the in-memory test double.
//!
//! All cross-process coordination is delegated to the store's atomic
//! preconditions (`prev_exist`, `prev_index`, `prev_value`); the client side
//! holds no locks.

mod fake;
mod http;


pub use fake::*;
pub use http::*;

use std::time::Duration;

use async_trait::async_trait;

use crate::errors::Result;
use crate::node::Response;

/// Options for [`Store::get`].
#[derive(Debug, Clone, Copy, Default)]
pub struct GetOptions {
    /// Return the whole subtree instead of a single directory level.
    pub recursive: bool,
    /// Sort directory listings by key.
    pub sorted: bool,
}

impl GetOptions {
    pub fn recursive() -> Self {
        GetOptions {
            recursive: true,
            ..GetOptions::default()
        }
    }

    pub fn sorted(mut self) -> Self {
        self.sorted = true;
        self
    }
}

/// Options for [`Store::set`].
///
/// `refresh` updates the lease without changing the value and without
/// notifying watchers; combining it with `value` is a wire error.
#[derive(Debug, Clone, Default)]
pub struct SetOptions {
    pub value: Option<String>,
    pub dir: bool,
    pub ttl: Option<u64>,
    pub refresh: bool,
    pub prev_exist: Option<bool>,
    pub prev_index: Option<u64>,
    pub prev_value: Option<String>,
}

impl SetOptions {
    /// Plain last-writer-wins value write.
    pub fn value(value: impl Into<String>) -> Self {
        SetOptions {
            value: Some(value.into()),
            ..SetOptions::default()
        }
    }

    /// Create-only value write: fails with node-already-exists if the path
    /// is taken.
    pub fn create(value: impl Into<String>) -> Self {
        SetOptions {
            value: Some(value.into()),
            prev_exist: Some(false),
            ..SetOptions::default()
        }
    }

    /// Create-only directory write.
    pub fn mkdir() -> Self {
        SetOptions {
            dir: true,
            prev_exist: Some(false),
            ..SetOptions::default()
        }
    }

    /// Lease refresh constrained to not change the value.
    pub fn refresh(ttl: u64, prev_value: impl Into<String>) -> Self {
        SetOptions {
            refresh: true,
            ttl: Some(ttl),
            prev_exist: Some(true),
            prev_value: Some(prev_value.into()),
            ..SetOptions::default()
        }
    }

    pub fn with_ttl(mut self, ttl: Option<u64>) -> Self {
        self.ttl = ttl;
        self
    }
}

/// Options for [`Store::delete`].
#[derive(Debug, Clone, Default)]
pub struct DeleteOptions {
    pub recursive: bool,
    pub dir: bool,
    pub prev_index: Option<u64>,
    pub prev_value: Option<String>,
}

impl DeleteOptions {
    pub fn recursive() -> Self {
        DeleteOptions {
            recursive: true,
            ..DeleteOptions::default()
        }
    }

    pub fn dir() -> Self {
        DeleteOptions {
            dir: true,
            ..DeleteOptions::default()
        }
    }

    /// Compare-and-delete on the last known modification index.
    pub fn prev_index(prev_index: u64) -> Self {
        DeleteOptions {
            prev_index: Some(prev_index),
            ..DeleteOptions::default()
        }
    }
}

/// Options for [`Store::watch`].
#[derive(Debug, Clone, Copy, Default)]
pub struct WatchOptions {
    pub recursive: bool,
    /// Return the first event at or after this store index. Without it the
    /// watch reports only future events.
    pub wait_index: Option<u64>,
    /// Upper bound on the blocking wait. `None` waits until the transport
    /// gives up.
    pub timeout: Option<Duration>,
}

impl WatchOptions {
    pub fn recursive_from(wait_index: u64) -> Self {
        WatchOptions {
            recursive: true,
            wait_index: Some(wait_index),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// The versioned hierarchical key-value store, as seen by this client.
///
/// Every response carries the store-wide monotonic index; mutating
/// responses also carry the action taken and the prior node state.
/// Instances are injected explicitly; components never share a global
/// client.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Store: Send + Sync {
    /// Read a node, optionally with its whole subtree.
    ///
    /// # Errors
    /// [`crate::Error::KeyNotFound`] for a missing key.
    async fn get(&self, key: &str, options: GetOptions) -> Result<Response>;

    /// Write a node, honoring any optimistic-concurrency preconditions.
    async fn set(&self, key: &str, options: SetOptions) -> Result<Response>;

    /// Delete a node, honoring any optimistic-concurrency preconditions.
    async fn delete(&self, key: &str, options: DeleteOptions) -> Result<Response>;

    /// Block for the next event at or after `wait_index`.
    ///
    /// Returns `Ok(None)` when the bounded wait elapses without an event;
    /// this is the documented timeout outcome, distinct from the
    /// [`crate::Error::EventIndexCleared`] history-compaction error.
    async fn watch(&self, key: &str, options: WatchOptions) -> Result<Option<Response>>;
}
