//! Read-side watch cache: sync a subtree once, then follow the event
//! stream to keep an in-memory copy current.
//!
//! The cache tracks a resume index across both phases. After a sync it is
//! the store-wide index of the response; after an event it is the event
//! node's modification index. The next watch always asks for resume + 1,
//! so no event is skipped and none is seen twice. When the store has
//! compacted the resume index out of its history, the watch fails with
//! event-index-cleared and [`Reader::run`] recovers with a fresh sync.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;
use tracing::warn;

use crate::errors::Error;
use crate::errors::Result;
use crate::node::Action;
use crate::node::Node;
use crate::node::Response;
use crate::store::GetOptions;
use crate::store::Store;
use crate::store::WatchOptions;

type Loader<T> = Box<dyn Fn(&Node) -> Result<T> + Send + Sync>;

/// Watch cache over one directory prefix, decoding nodes with a loader
/// callback.
pub struct Reader<T> {
    store: Arc<dyn Store>,
    prefix: String,
    loader: Loader<T>,
    nodes: BTreeMap<String, T>,
    resume_index: Option<u64>,
}

impl Reader<Node> {
    /// Cache keeping the undecoded wire nodes.
    pub fn raw(store: Arc<dyn Store>, prefix: impl Into<String>) -> Self {
        Reader::new(store, prefix, |node| Ok(node.clone()))
    }
}

impl<T> Reader<T> {
    pub fn new<F>(store: Arc<dyn Store>, prefix: impl Into<String>, loader: F) -> Self
    where
        F: Fn(&Node) -> Result<T> + Send + Sync + 'static,
    {
        Reader {
            store,
            prefix: prefix.into(),
            loader: Box::new(loader),
            nodes: BTreeMap::new(),
            resume_index: None,
        }
    }

    /// Replace the cache with a recursive read of the prefix.
    ///
    /// A missing prefix directory is a valid empty state; its error
    /// response still carries the store index to resume from.
    pub async fn sync(&mut self) -> Result<()> {
        match self.store.get(&self.prefix, GetOptions::recursive()).await {
            Ok(response) => {
                let mut leaves = Vec::new();
                response.node.walk(&mut |node| leaves.push(node.clone()));

                let mut nodes = BTreeMap::new();
                for node in &leaves {
                    nodes.insert(node.key.clone(), (self.loader)(node)?);
                }

                self.nodes = nodes;
                self.resume_index = Some(response.etcd_index);
            }
            Err(Error::KeyNotFound(error)) => {
                self.nodes = BTreeMap::new();
                self.resume_index = Some(error.index);
            }
            Err(error) => return Err(error),
        }

        debug!(
            "sync {}: {} nodes @ {:?}",
            self.prefix,
            self.nodes.len(),
            self.resume_index,
        );

        Ok(())
    }

    /// Block for the next event after the resume point and fold it into
    /// the cache.
    ///
    /// Returns `false` when the bounded wait elapsed without an event.
    ///
    /// # Errors
    /// [`Error::EventIndexCleared`] once the resume point has been
    /// compacted out of the store's history; the caller recovers by
    /// syncing again. [`Error::ProtocolViolation`] for an event action the
    /// cache has no defined transition for.
    pub async fn watch(&mut self) -> Result<bool> {
        let Some(resume_index) = self.resume_index else {
            return Err(Error::Invalid("watch before initial sync".to_string()));
        };

        let options = WatchOptions::recursive_from(resume_index + 1);
        match self.store.watch(&self.prefix, options).await? {
            Some(response) => {
                self.apply(&response)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Sync, then watch forever, invoking the callback with the current
    /// node map after the sync and after every watch round (changed or
    /// not). The callback returns `false` to stop the loop.
    pub async fn run<F>(&mut self, mut each: F) -> Result<()>
    where
        F: FnMut(&BTreeMap<String, T>) -> bool,
    {
        self.sync().await?;
        if !each(&self.nodes) {
            return Ok(());
        }

        loop {
            match self.watch().await {
                Ok(_) => {}
                Err(Error::EventIndexCleared(error)) => {
                    warn!("watch {}: {error}, resyncing", self.prefix);
                    self.sync().await?;
                }
                Err(error) => return Err(error),
            }

            if !each(&self.nodes) {
                return Ok(());
            }
        }
    }

    fn apply(&mut self, response: &Response) -> Result<()> {
        let node = &response.node;
        debug!(
            "watch {}: {} {}@{}",
            self.prefix, response.action, node.key, node.modified_index,
        );

        match response.action {
            Action::Create | Action::Set | Action::Update | Action::CompareAndSwap => {
                // a directory create carries no value to cache
                if !node.is_directory() {
                    let value = (self.loader)(node)?;
                    self.nodes.insert(node.key.clone(), value);
                }
            }
            Action::Delete | Action::CompareAndDelete | Action::Expire => {
                // a single event covers a recursive directory delete
                self.nodes.remove(&node.key);
                let subtree = format!("{}/", node.key);
                self.nodes.retain(|key, _| !key.starts_with(&subtree));
            }
            Action::Get => {
                return Err(Error::ProtocolViolation(format!(
                    "unexpected watch event action {} for {}",
                    response.action, node.key,
                )));
            }
        }

        self.resume_index = Some(node.modified_index);
        Ok(())
    }

    /// Store-wide index the next watch resumes after. `None` before the
    /// first sync.
    pub fn resume_index(&self) -> Option<u64> {
        self.resume_index
    }

    pub fn get(&self, key: &str) -> Option<&T> {
        self.nodes.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &T)> {
        self.nodes.iter().map(|(key, value)| (key.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Snapshot of the current cache contents.
    pub fn to_map(&self) -> BTreeMap<String, T>
    where
        T: Clone,
    {
        self.nodes.clone()
    }
}
