//! In-memory emulation of the `/v2/keys` wire contract, for application
//! testing.
//!
//! Seed it with [`FakeStore::load`], point components at it through the
//! [`Store`] trait, then inspect the end state with [`FakeStore::nodes`],
//! [`FakeStore::logs`] and [`FakeStore::modified`]. Leases run on a
//! simulated clock advanced with [`FakeStore::tick`]; watch history can be
//! dropped with [`FakeStore::clear_history`] to exercise gap recovery.

use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::time::sleep;
use tokio::time::Instant;

use super::DeleteOptions;
use super::GetOptions;
use super::SetOptions;
use super::Store;
use super::WatchOptions;
use crate::errors::Error;
use crate::errors::KeysError;
use crate::errors::Result;
use crate::node::Action;
use crate::node::Node;
use crate::node::Response;

/// Watch events retained before the oldest resume indexes become
/// unservable.
const EVENT_HISTORY_LIMIT: usize = 1000;

/// Bound on a watch wait when the caller does not give one.
const DEFAULT_WATCH_TIMEOUT: Duration = Duration::from_millis(250);

/// Polling interval for blocked watch calls.
const WATCH_POLL_INTERVAL: Duration = Duration::from_millis(5);

#[derive(Debug, Clone)]
struct Entry {
    /// Leaf payload; `None` marks a directory.
    value: Option<String>,
    created_index: u64,
    modified_index: u64,
    expire: Option<DateTime<Utc>>,
}

impl Entry {
    fn is_directory(&self) -> bool {
        self.value.is_none()
    }
}

#[derive(Debug, Clone)]
struct Event {
    index: u64,
    action: Action,
    node: Node,
    prev_node: Option<Node>,
}

struct FakeState {
    index: u64,
    start_index: u64,
    clock: DateTime<Utc>,
    entries: BTreeMap<String, Entry>,
    logs: Vec<(Action, String)>,
    events: VecDeque<Event>,
    /// Lowest wait index still servable from `events`.
    history_start: u64,
}

/// In-memory [`Store`] implementation.
pub struct FakeStore {
    state: Mutex<FakeState>,
}

impl Default for FakeStore {
    fn default() -> Self {
        Self::new()
    }
}

fn keys_error(code: u32, index: u64, message: &str, key: &str) -> Error {
    Error::from_keys(KeysError {
        error_code: code,
        index,
        message: message.to_string(),
        reason: key.to_string(),
    })
}

fn normalize(key: &str) -> String {
    let key = key.trim_end_matches('/');
    if key.is_empty() {
        return "/".to_string();
    }
    if key.starts_with('/') {
        key.to_string()
    } else {
        format!("/{key}")
    }
}

fn parent_path(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(at) => &path[..at],
    }
}

impl FakeStore {
    pub fn new() -> Self {
        let mut entries = BTreeMap::new();
        entries.insert(
            "/".to_string(),
            Entry {
                value: None,
                created_index: 0,
                modified_index: 0,
                expire: None,
            },
        );

        FakeStore {
            state: Mutex::new(FakeState {
                index: 0,
                start_index: 0,
                // fixed epoch keeps lease expirations deterministic
                clock: DateTime::UNIX_EPOCH,
                entries,
                logs: Vec::new(),
                events: VecDeque::new(),
                history_start: 1,
            }),
        }
    }

    /// Seed leaf nodes, creating parent directories as needed.
    ///
    /// Seeding advances the store index but is not logged and produces no
    /// watch events, so tests observe only the operations under test.
    pub fn load<I, K, V>(&self, pairs: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.load_with_ttl(pairs, None)
    }

    /// Seed leaf nodes carrying a lease.
    pub fn load_with_ttl<I, K, V>(&self, pairs: I, ttl: Option<u64>)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut state = self.state.lock();
        for (key, value) in pairs {
            let path = normalize(&key.into());
            state.index += 1;
            let index = state.index;
            let entry = Entry {
                value: Some(value.into()),
                created_index: index,
                modified_index: index,
                expire: ttl.map(|ttl| state.clock + chrono::Duration::seconds(ttl as i64)),
            };
            state
                .write(&path, entry)
                .expect("load: parent of a seeded node is a leaf");
        }
        state.start_index = state.index;
        state.history_start = state.index + 1;
    }

    /// Advance the simulated clock, expiring overdue leased nodes.
    pub fn tick(&self, seconds: u64) {
        let mut state = self.state.lock();
        state.clock += chrono::Duration::seconds(seconds as i64);

        let expired: Vec<(String, Entry)> = state
            .entries
            .iter()
            .filter(|(_, entry)| entry.expire.is_some_and(|at| state.clock >= at))
            .map(|(path, entry)| (path.clone(), entry.clone()))
            .collect();

        for (path, entry) in expired {
            // an expiring ancestor may have removed this entry already
            if state.entries.contains_key(&path) {
                state.remove(&path, &entry, Action::Expire);
            }
        }
    }

    /// Current store-wide index.
    pub fn index(&self) -> u64 {
        self.state.lock().index
    }

    /// True once any mutation has happened after construction or seeding.
    pub fn modified(&self) -> bool {
        let state = self.state.lock();
        state.index > state.start_index
    }

    /// Logged mutations as `(action, path)` pairs, directory paths with a
    /// trailing `/`. Seeding and lease refreshes are not logged.
    pub fn logs(&self) -> Vec<(Action, String)> {
        self.state.lock().logs.clone()
    }

    /// Current leaf nodes as a path → value map.
    pub fn nodes(&self) -> BTreeMap<String, String> {
        let state = self.state.lock();
        state
            .entries
            .iter()
            .filter_map(|(path, entry)| {
                entry.value.as_ref().map(|value| (path.clone(), value.clone()))
            })
            .collect()
    }

    /// Drop retained watch history, so the next watch with a resume index
    /// fails with event-index-cleared and forces a fresh sync.
    pub fn clear_history(&self) {
        let mut state = self.state.lock();
        state.events.clear();
        state.history_start = state.index + 1;
    }
}

impl FakeState {
    fn serialize(&self, path: &str, entry: &Entry, recursive: bool, toplevel: bool) -> Node {
        let nodes = if entry.is_directory() && (recursive || toplevel) {
            Some(
                self.children_of(path)
                    .map(|(child_path, child)| self.serialize(child_path, child, recursive, false))
                    .collect(),
            )
        } else {
            None
        };

        Node {
            key: path.to_string(),
            value: entry.value.clone(),
            created_index: entry.created_index,
            modified_index: entry.modified_index,
            dir: entry.is_directory(),
            nodes,
            expiration: entry.expire,
            ttl: entry
                .expire
                .map(|at| (at - self.clock).num_seconds()),
        }
    }

    fn children_of<'a>(&'a self, path: &'a str) -> impl Iterator<Item = (&'a str, &'a Entry)> {
        let prefix = if path == "/" {
            "/".to_string()
        } else {
            format!("{path}/")
        };
        let prefix_len = prefix.len();

        self.entries
            .range(prefix.clone()..)
            .take_while(move |(child, _)| child.starts_with(&prefix))
            // the root is its own prefix; a node is never its own child
            .filter(move |(child, _)| {
                child.len() > prefix_len && !child[prefix_len..].contains('/')
            })
            .map(|(child, entry)| (child.as_str(), entry))
    }

    /// Create or replace a node entry, linking in any missing parent
    /// directories.
    fn write(&mut self, path: &str, entry: Entry) -> Result<()> {
        let index = entry.modified_index;

        let mut ancestor = parent_path(path);
        loop {
            match self.entries.get(ancestor) {
                Some(existing) if existing.is_directory() => break,
                Some(_) => {
                    return Err(keys_error(104, self.index, "Not a directory", ancestor));
                }
                None => {
                    self.entries.insert(
                        ancestor.to_string(),
                        Entry {
                            value: None,
                            created_index: index,
                            modified_index: index,
                            expire: None,
                        },
                    );
                    ancestor = parent_path(ancestor);
                }
            }
        }

        self.entries.insert(path.to_string(), entry);
        Ok(())
    }

    fn log(&mut self, action: Action, path: &str, directory: bool) {
        let path = if directory { format!("{path}/") } else { path.to_string() };
        self.logs.push((action, path));
    }

    fn record_event(&mut self, action: Action, node: Node, prev_node: Option<Node>) {
        self.events.push_back(Event {
            index: self.index,
            action,
            node,
            prev_node,
        });

        while self.events.len() > EVENT_HISTORY_LIMIT {
            if let Some(dropped) = self.events.pop_front() {
                self.history_start = dropped.index + 1;
            }
        }
    }

    /// Remove an entry and its subtree; used by delete and lease expiry.
    /// Returns the response node snapshot.
    fn remove(&mut self, path: &str, entry: &Entry, action: Action) -> (Node, Node) {
        self.entries.remove(path);

        let subtree: Vec<String> = {
            let prefix = format!("{path}/");
            self.entries
                .range(prefix.clone()..)
                .take_while(|(child, _)| child.starts_with(&prefix))
                .map(|(child, _)| child.clone())
                .collect()
        };
        for child in subtree {
            self.entries.remove(&child);
        }

        self.index += 1;
        let prev_node = self.serialize(path, entry, false, false);
        let node = Node {
            key: path.to_string(),
            value: None,
            created_index: entry.created_index,
            modified_index: self.index,
            dir: entry.is_directory(),
            nodes: None,
            expiration: None,
            ttl: None,
        };

        self.log(action, path, entry.is_directory());
        self.record_event(action, node.clone(), Some(prev_node.clone()));

        (node, prev_node)
    }
}

#[async_trait]
impl Store for FakeStore {
    async fn get(&self, key: &str, options: GetOptions) -> Result<Response> {
        let state = self.state.lock();
        let path = normalize(key);

        let Some(entry) = state.entries.get(&path) else {
            return Err(keys_error(100, state.index, "Key not found", &path));
        };

        Ok(Response {
            action: Action::Get,
            node: state.serialize(&path, entry, options.recursive, true),
            prev_node: None,
            etcd_index: state.index,
        })
    }

    async fn set(&self, key: &str, options: SetOptions) -> Result<Response> {
        let mut state = self.state.lock();
        let path = normalize(key);

        if options.refresh && options.value.is_some() {
            return Err(keys_error(211, state.index, "Value provided on refresh", &path));
        }
        if options.refresh && options.ttl.is_none() {
            return Err(keys_error(212, state.index, "A TTL must be provided on refresh", &path));
        }

        let expire = options
            .ttl
            .map(|ttl| state.clock + chrono::Duration::seconds(ttl as i64));

        if let Some(entry) = state.entries.get(&path).cloned() {
            if options.prev_exist == Some(false) {
                return Err(keys_error(105, state.index, "Key already exists", &path));
            }
            if options.dir || entry.is_directory() {
                return Err(keys_error(102, state.index, "Not a file", &path));
            }

            let compare = options.prev_index.is_some() || options.prev_value.is_some();
            if let Some(prev_index) = options.prev_index {
                if entry.modified_index != prev_index {
                    return Err(keys_error(101, state.index, "Compare index failed", &path));
                }
            }
            if let Some(prev_value) = &options.prev_value {
                if entry.value.as_ref() != Some(prev_value) {
                    return Err(keys_error(101, state.index, "Compare value failed", &path));
                }
            }

            let action = if compare { Action::CompareAndSwap } else { Action::Set };

            let prev_node = state.serialize(&path, &entry, false, false);
            let value = if options.refresh {
                entry.value.clone()
            } else {
                options.value.clone()
            };

            state.index += 1;
            let updated = Entry {
                value,
                created_index: entry.created_index,
                modified_index: state.index,
                expire,
            };
            state.entries.insert(path.clone(), updated.clone());
            let node = state.serialize(&path, &updated, false, false);

            // a refresh does not notify watchers
            if !options.refresh {
                state.log(action, &path, false);
                state.record_event(action, node.clone(), Some(prev_node.clone()));
            }

            Ok(Response {
                action,
                node,
                prev_node: Some(prev_node),
                etcd_index: state.index,
            })
        } else {
            if options.refresh
                || options.prev_exist == Some(true)
                || options.prev_index.is_some()
                || options.prev_value.is_some()
            {
                return Err(keys_error(100, state.index, "Key not found", &path));
            }

            let action = if options.prev_exist == Some(false) {
                Action::Create
            } else {
                Action::Set
            };

            let index = state.index + 1;
            let entry = Entry {
                value: if options.dir {
                    None
                } else {
                    Some(options.value.unwrap_or_default())
                },
                created_index: index,
                modified_index: index,
                expire,
            };
            state.write(&path, entry.clone())?;
            state.index = index;

            let node = state.serialize(&path, &entry, false, false);

            state.log(action, &path, options.dir);
            state.record_event(action, node.clone(), None);

            Ok(Response {
                action,
                node,
                prev_node: None,
                etcd_index: state.index,
            })
        }
    }

    async fn delete(&self, key: &str, options: DeleteOptions) -> Result<Response> {
        let mut state = self.state.lock();
        let path = normalize(key);

        let Some(entry) = state.entries.get(&path).cloned() else {
            return Err(keys_error(100, state.index, "Key not found", &path));
        };

        if entry.is_directory() && !options.dir && !options.recursive {
            return Err(keys_error(102, state.index, "Not a file", &path));
        }
        if entry.is_directory()
            && options.dir
            && !options.recursive
            && state.children_of(&path).next().is_some()
        {
            return Err(keys_error(108, state.index, "Directory not empty", &path));
        }

        let compare = options.prev_index.is_some() || options.prev_value.is_some();
        if let Some(prev_index) = options.prev_index {
            if entry.modified_index != prev_index {
                return Err(keys_error(101, state.index, "Compare index failed", &path));
            }
        }
        if let Some(prev_value) = &options.prev_value {
            if entry.value.as_ref() != Some(prev_value) {
                return Err(keys_error(101, state.index, "Compare value failed", &path));
            }
        }

        let action = if compare { Action::CompareAndDelete } else { Action::Delete };
        let (node, prev_node) = state.remove(&path, &entry, action);

        Ok(Response {
            action,
            node,
            prev_node: Some(prev_node),
            etcd_index: state.index,
        })
    }

    async fn watch(&self, key: &str, options: WatchOptions) -> Result<Option<Response>> {
        let path = normalize(key);
        let timeout = options.timeout.unwrap_or(DEFAULT_WATCH_TIMEOUT);
        let deadline = Instant::now() + timeout;

        let wait_index = {
            let state = self.state.lock();
            options.wait_index.unwrap_or(state.index + 1)
        };

        loop {
            {
                let state = self.state.lock();

                if wait_index < state.history_start {
                    return Err(keys_error(
                        401,
                        state.index,
                        "The event in requested index is outdated and cleared",
                        &path,
                    ));
                }

                let matched = state.events.iter().find(|event| {
                    event.index >= wait_index
                        && (event.node.key == path
                            || (options.recursive
                                && event.node.key.starts_with(&format!("{path}/"))))
                });

                if let Some(event) = matched {
                    return Ok(Some(Response {
                        action: event.action,
                        node: event.node.clone(),
                        prev_node: event.prev_node.clone(),
                        etcd_index: state.index,
                    }));
                }
            }

            if Instant::now() >= deadline {
                return Ok(None);
            }
            sleep(WATCH_POLL_INTERVAL).await;
        }
    }
}
