//! Schema-driven CRUD over JSON-valued leaf nodes.
//!
//! A [`Repository`] binds a [`Schema`] to a value type: placeholder values
//! select the node path, and the node value is the serde-encoded `T`. All
//! coordination is delegated to the store's atomic preconditions; the
//! repository itself holds no state beyond its schema.

use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::errors::Error;
use crate::node::Node;
use crate::reader::Reader;
use crate::schema::Schema;
use crate::schema::SchemaError;
use crate::store::DeleteOptions;
use crate::store::GetOptions;
use crate::store::SetOptions;
use crate::store::Store;

pub type RepositoryResult<T> = std::result::Result<T, RepositoryError>;

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    /// A store precondition failed: the node already exists, was
    /// concurrently removed, or a directory was not empty.
    #[error("conflict at {key}: {message}")]
    Conflict { key: String, message: String },

    #[error("not found: {key}")]
    NotFound { key: String },

    /// Node value failed to decode, or a directory sat where a value node
    /// was expected.
    #[error("invalid value at {key}: {message}")]
    Invalid { key: String, message: String },

    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// Any other store failure, passed through.
    #[error(transparent)]
    Store(#[from] Error),
}

/// A decoded node: the placeholder values parsed back out of its path, the
/// deserialized value, and the node version for optimistic concurrency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Object<T> {
    pub key: String,
    /// Placeholder values, in schema order.
    pub keys: Vec<String>,
    pub value: T,
    pub modified_index: u64,
}

/// Typed view of the subtree addressed by one [`Schema`].
pub struct Repository<T> {
    store: Arc<dyn Store>,
    schema: Schema,
    _value: PhantomData<fn() -> T>,
}

impl<T> Repository<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(store: Arc<dyn Store>, schema: Schema) -> Self {
        Repository {
            store,
            schema,
            _value: PhantomData,
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    fn encode(&self, key: &str, value: &T) -> RepositoryResult<String> {
        serde_json::to_string(value).map_err(|e| RepositoryError::Invalid {
            key: key.to_string(),
            message: e.to_string(),
        })
    }

    fn decode(&self, node: &Node) -> RepositoryResult<Object<T>> {
        decode_object(&self.schema, node)
    }

    /// Read one node.
    ///
    /// An absent node is a valid outcome, not an error.
    pub async fn get(&self, keys: &[&str]) -> RepositoryResult<Option<Object<T>>> {
        let path = self.schema.build(keys)?;

        match self.store.get(&path, GetOptions::default()).await {
            Ok(response) => Ok(Some(self.decode(&response.node)?)),
            Err(error) if error.is_not_found() => Ok(None),
            Err(error) => Err(error.into()),
        }
    }

    /// Create-only write.
    ///
    /// # Errors
    /// [`RepositoryError::Conflict`] if the node already exists.
    pub async fn create(&self, keys: &[&str], value: &T) -> RepositoryResult<Object<T>> {
        let path = self.schema.build(keys)?;
        let encoded = self.encode(&path, value)?;

        match self.store.set(&path, SetOptions::create(encoded)).await {
            Ok(response) => self.decode(&response.node),
            Err(Error::NodeExist(_)) => Err(RepositoryError::Conflict {
                key: path,
                message: "node already exists".to_string(),
            }),
            Err(error) => Err(error.into()),
        }
    }

    /// Create the node, or read the one that won the race.
    ///
    /// # Errors
    /// [`RepositoryError::Conflict`] if the winning node was deleted again
    /// before it could be read back.
    pub async fn create_or_get(&self, keys: &[&str], value: &T) -> RepositoryResult<Object<T>> {
        match self.create(keys, value).await {
            Err(RepositoryError::Conflict { .. }) => {
                self.get(keys).await?.ok_or_else(|| RepositoryError::Conflict {
                    key: self.schema.build(keys).unwrap_or_default(),
                    message: "node was concurrently deleted".to_string(),
                })
            }
            result => result,
        }
    }

    /// Replace the value of an existing node.
    ///
    /// # Errors
    /// [`RepositoryError::NotFound`] if the node does not exist.
    pub async fn update(&self, keys: &[&str], value: &T) -> RepositoryResult<Object<T>> {
        let path = self.schema.build(keys)?;
        let encoded = self.encode(&path, value)?;
        let options = SetOptions {
            value: Some(encoded),
            prev_exist: Some(true),
            ..SetOptions::default()
        };

        match self.store.set(&path, options).await {
            Ok(response) => self.decode(&response.node),
            Err(error) if error.is_not_found() => Err(RepositoryError::NotFound { key: path }),
            Err(error) => Err(error.into()),
        }
    }

    /// Ensure the directory prefix for the given (possibly partial)
    /// placeholder values exists. Already existing, as anything, is success.
    pub async fn mkdir(&self, keys: &[&str]) -> RepositoryResult<()> {
        let prefix = self.schema.prefix(keys)?;
        let path = prefix.trim_end_matches('/');

        match self.store.set(path, SetOptions::mkdir()).await {
            Ok(_) | Err(Error::NodeExist(_)) => Ok(()),
            Err(error) => Err(error.into()),
        }
    }

    /// Enumerate every node under the given (possibly partial) placeholder
    /// values. A missing prefix directory is an empty enumeration.
    pub async fn list(&self, keys: &[&str]) -> RepositoryResult<Vec<Object<T>>> {
        let mut objects = Vec::new();
        self.for_each(keys, |object| objects.push(object)).await?;
        Ok(objects)
    }

    pub async fn for_each<F>(&self, keys: &[&str], mut each: F) -> RepositoryResult<()>
    where
        F: FnMut(Object<T>),
    {
        let prefix = self.schema.prefix(keys)?;

        let response = match self.store.get(&prefix, GetOptions::recursive()).await {
            Ok(response) => response,
            Err(error) if error.is_not_found() => return Ok(()),
            Err(error) => return Err(error.into()),
        };

        let mut leaves = Vec::new();
        response.node.walk(&mut |node| leaves.push(node.clone()));

        for node in &leaves {
            each(self.decode(node)?);
        }

        Ok(())
    }

    /// Delete the node for fully bound placeholder values, or the whole
    /// directory subtree for a partial set.
    ///
    /// # Errors
    /// [`RepositoryError::NotFound`] if nothing exists at the path.
    pub async fn delete(&self, keys: &[&str]) -> RepositoryResult<()> {
        let (path, options) = if keys.len() < self.schema.key_count() {
            let prefix = self.schema.prefix(keys)?;
            (
                prefix.trim_end_matches('/').to_string(),
                DeleteOptions::recursive(),
            )
        } else {
            (self.schema.build(keys)?, DeleteOptions::default())
        };

        match self.store.delete(&path, options).await {
            Ok(_) => Ok(()),
            Err(error) if error.is_not_found() => Err(RepositoryError::NotFound { key: path }),
            Err(error) => Err(error.into()),
        }
    }

    /// Remove an empty directory prefix.
    ///
    /// # Errors
    /// [`RepositoryError::Conflict`] if the directory still has children,
    /// [`RepositoryError::NotFound`] if it does not exist.
    pub async fn rmdir(&self, keys: &[&str]) -> RepositoryResult<()> {
        let prefix = self.schema.prefix(keys)?;
        let path = prefix.trim_end_matches('/').to_string();

        match self.store.delete(&path, DeleteOptions::dir()).await {
            Ok(_) => Ok(()),
            Err(Error::DirNotEmpty(_)) => Err(RepositoryError::Conflict {
                key: path,
                message: "directory not empty".to_string(),
            }),
            Err(error) if error.is_not_found() => Err(RepositoryError::NotFound { key: path }),
            Err(error) => Err(error.into()),
        }
    }

    /// Watch cache over this repository's whole subtree, decoding nodes
    /// into [`Object`]s as they arrive.
    pub fn reader(&self) -> RepositoryResult<Reader<Object<T>>>
    where
        T: 'static,
    {
        let prefix = self.schema.prefix(&[])?;
        let schema = self.schema.clone();

        Ok(Reader::new(self.store.clone(), prefix, move |node| {
            decode_object(&schema, node).map_err(|e| Error::Invalid(e.to_string()))
        }))
    }
}

fn decode_object<T>(schema: &Schema, node: &Node) -> RepositoryResult<Object<T>>
where
    T: DeserializeOwned,
{
    let keys = schema.parse(&node.key)?;

    let Some(value) = &node.value else {
        return Err(RepositoryError::Invalid {
            key: node.key.clone(),
            message: "directory where a value node was expected".to_string(),
        });
    };

    let value = serde_json::from_str(value).map_err(|e| RepositoryError::Invalid {
        key: node.key.clone(),
        message: e.to_string(),
    })?;

    Ok(Object {
        key: node.key.clone(),
        keys,
        value,
        modified_index: node.modified_index,
    })
}
