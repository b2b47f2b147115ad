//! Write-side reconciler: converge a subtree of leased nodes to a desired
//! `path -> value` mapping.
//!
//! The writer tracks the last node it wrote per path and only touches the
//! store when the desired value is unknown or has changed, so a steady-state
//! [`Writer::update`] issues no requests. Leases may be shared with other
//! writers maintaining the same value on the same path; sharing is detected
//! from the previous-node state reported on writes and refreshes, and a
//! shared path is never deleted by this writer.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::DateTime;
use chrono::Utc;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::errors::Error;
use crate::errors::Result;
use crate::node::Node;
use crate::node::Response;
use crate::store::DeleteOptions;
use crate::store::SetOptions;
use crate::store::Store;

/// Reconciler for a set of (optionally leased) value nodes.
pub struct Writer {
    store: Arc<dyn Store>,
    ttl: Option<u64>,
    /// Last written node per path.
    nodes: BTreeMap<String, Node>,
    /// Expiration observed on the co-owner's lease, per shared path.
    shared: BTreeMap<String, DateTime<Utc>>,
}

impl Writer {
    pub fn new(store: Arc<dyn Store>, ttl: Option<u64>) -> Self {
        Writer {
            store,
            ttl,
            nodes: BTreeMap::new(),
            shared: BTreeMap::new(),
        }
    }

    /// Expiration of the co-owner's lease, if the path is currently
    /// considered shared with another writer.
    pub fn shared(&self, path: &str) -> Option<DateTime<Utc>> {
        self.shared.get(path).copied()
    }

    /// Converge the store to the desired `path -> value` mapping.
    ///
    /// Unknown and changed values are written last-writer-wins with the
    /// configured TTL; previously written paths absent from `desired` are
    /// removed, unless shared. Idempotent: repeating the same `desired`
    /// issues no further store requests.
    pub async fn update(&mut self, desired: BTreeMap<String, String>) -> Result<()> {
        for (path, value) in &desired {
            let known = self
                .nodes
                .get(path)
                .is_some_and(|node| node.value.as_deref() == Some(value.as_str()));
            if known {
                continue;
            }

            let options = SetOptions::value(value.clone()).with_ttl(self.ttl);
            let response = self.store.set(path, options).await?;

            info!("set {path}@{}", response.node.modified_index);
            self.detect_shared_write(path, &response);
            self.nodes.insert(path.clone(), response.node);
        }

        let stale: Vec<String> = self
            .nodes
            .keys()
            .filter(|path| !desired.contains_key(*path))
            .cloned()
            .collect();

        for path in stale {
            self.remove(&path).await?;
            self.nodes.remove(&path);
            self.shared.remove(&path);
        }

        Ok(())
    }

    /// Refresh the lease on every tracked path, without changing values.
    ///
    /// # Errors
    /// [`Error::Invalid`] if the writer has no TTL configured.
    /// [`Error::KeyNotFound`] if a tracked node already expired, and
    /// [`Error::TestFailed`] if a third party replaced its value; both mean
    /// this writer lost ownership, and the caller decides how to recover.
    pub async fn refresh(&mut self) -> Result<()> {
        let Some(ttl) = self.ttl else {
            return Err(Error::Invalid("refresh without a configured TTL".to_string()));
        };

        let tracked: Vec<(String, String, u64)> = self
            .nodes
            .iter()
            .map(|(path, node)| {
                (
                    path.clone(),
                    node.value.clone().unwrap_or_default(),
                    node.modified_index,
                )
            })
            .collect();

        for (path, value, tracked_index) in tracked {
            let response = self.store.set(&path, SetOptions::refresh(ttl, value)).await?;

            self.track_refresh(&path, tracked_index, ttl, &response);
            self.nodes.insert(path, response.node);
        }

        Ok(())
    }

    /// Remove every tracked path, shared ones excepted, and forget them.
    pub async fn clear(&mut self) -> Result<()> {
        let paths: Vec<String> = self.nodes.keys().cloned().collect();
        for path in paths {
            self.remove(&path).await?;
        }

        self.nodes.clear();
        self.shared.clear();

        Ok(())
    }

    /// A write that changed nothing against a node that carries a lease
    /// means another writer refreshed it first: the lease is shared.
    fn detect_shared_write(&mut self, path: &str, response: &Response) {
        let Some(prev) = &response.prev_node else {
            // fresh create
            return;
        };
        if prev.value != response.node.value {
            // genuine value change
            return;
        }

        if let Some(expiration) = prev.expiration {
            warn!("set {path}: shared, already refreshed until {expiration}");
            self.shared.insert(path.to_string(), expiration);
        }
    }

    /// Fold the previous-node state of a refresh response into the shared
    /// marker for the path.
    ///
    /// An unexpected previous index means a concurrent refresher; matching
    /// indexes with a lapsed co-owner expiration mean exclusive ownership
    /// again. The server clock is derived from the refreshed lease deadline
    /// minus the TTL just applied.
    fn track_refresh(&mut self, path: &str, tracked_index: u64, ttl: u64, response: &Response) {
        let prev = response.prev_node.as_ref();

        if prev.map(|node| node.modified_index) != Some(tracked_index) {
            if let Some(expiration) = prev.and_then(|node| node.expiration) {
                if self.shared.contains_key(path) {
                    debug!("refresh {path}: still shared until {expiration}");
                } else {
                    warn!("refresh {path}: shared, concurrently refreshed until {expiration}");
                }
                self.shared.insert(path.to_string(), expiration);
            }
        } else if let Some(shared_until) = self.shared.get(path).copied() {
            let server_now = response
                .node
                .expiration
                .map(|deadline| deadline - chrono::Duration::seconds(ttl as i64));

            if server_now.is_some_and(|now| shared_until <= now) {
                info!("refresh {path}: co-owner lease lapsed at {shared_until}, exclusive again");
                self.shared.remove(path);
            }
        }
    }

    /// Shared-aware removal: a shared path is left for its co-owner, and a
    /// node someone else modified since our last write is left alone.
    async fn remove(&mut self, path: &str) -> Result<()> {
        if self.shared.contains_key(path) {
            info!("remove {path}: shared, skipped");
            return Ok(());
        }

        let Some(node) = self.nodes.get(path) else {
            return Ok(());
        };

        match self
            .store
            .delete(path, DeleteOptions::prev_index(node.modified_index))
            .await
        {
            Ok(response) => {
                info!("delete {path}@{}", response.etcd_index);
                Ok(())
            }
            // benign races: a third party took over or the lease expired
            Err(error @ (Error::TestFailed(_) | Error::KeyNotFound(_))) => {
                warn!("remove {path}: {error}");
                Ok(())
            }
            Err(error) => Err(error),
        }
    }
}
