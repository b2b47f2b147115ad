//! Client-side coordination over a versioned hierarchical key-value store
//! speaking the `/v2/keys` protocol.
//!
//! The building blocks, bottom up:
//! - [`Schema`]: compiled path templates mapping placeholder values to node
//!   paths and back.
//! - [`Store`]: the async store interface, with the [`HttpStore`] transport
//!   and the in-memory [`FakeStore`] test double.
//! - [`Repository`]: schema-driven CRUD over JSON-valued leaf nodes.
//! - [`Reader`]: a watch cache that syncs a subtree once and then follows
//!   the event stream, recovering from compacted watch history with a
//!   fresh sync.
//! - [`Writer`]: a reconciler converging a set of leased nodes to a desired
//!   `path -> value` mapping, aware of leases shared with other writers.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use etcd_sync::HttpStore;
//! use etcd_sync::Reader;
//! use etcd_sync::StoreConfig;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), etcd_sync::Error> {
//! let store = Arc::new(HttpStore::new(&StoreConfig::load(None)?)?);
//!
//! let mut reader = Reader::raw(store, "/kontena/test");
//! reader
//!     .run(|nodes| {
//!         println!("{} nodes", nodes.len());
//!         true
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```

mod config;
mod errors;
mod node;
mod reader;
mod repository;
mod schema;
mod store;
mod writer;

#[cfg(test)]
mod writer_test;

pub use config::*;
pub use errors::*;
pub use node::*;
pub use reader::*;
pub use repository::*;
pub use schema::*;
pub use store::*;
pub use writer::*;
