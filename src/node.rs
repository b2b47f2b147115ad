//! Wire data model for the `/v2/keys` API: nodes, mutation actions and
//! response envelopes.

use std::fmt;
use std::str::FromStr;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

use crate::errors::Error;
use crate::errors::Result;

/// A single entry in the hierarchical store: either a leaf carrying a value,
/// or a directory carrying child nodes.
///
/// `modified_index` strictly increases on every mutation observed for this
/// node; indexes are store-wide and never reused.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Node {
    /// Absolute slash-separated path.
    pub key: String,

    /// Leaf payload. Absent for directories.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,

    #[serde(rename = "createdIndex", default)]
    pub created_index: u64,

    #[serde(rename = "modifiedIndex", default)]
    pub modified_index: u64,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub dir: bool,

    /// Child nodes. The store omits this field for an empty directory, so
    /// absence means empty, not unknown.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodes: Option<Vec<Node>>,

    /// Lease deadline. The store removes the node when it passes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<i64>,
}

impl Node {
    pub fn is_directory(&self) -> bool {
        self.dir
    }

    /// Child nodes of a directory.
    ///
    /// # Errors
    /// [`Error::Invalid`] if this node is a leaf.
    pub fn children(&self) -> Result<&[Node]> {
        if !self.dir {
            return Err(Error::Invalid(format!("node {} is not a directory", self.key)));
        }

        Ok(self.nodes.as_deref().unwrap_or_default())
    }

    /// Visit every leaf node under this node, depth first.
    pub fn walk<F>(&self, visit: &mut F)
    where
        F: FnMut(&Node),
    {
        if self.dir {
            for node in self.nodes.as_deref().unwrap_or_default() {
                node.walk(visit);
            }
        } else {
            visit(self);
        }
    }
}

/// Mutation tag reported with every store response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Action {
    Get,
    Set,
    Create,
    Update,
    CompareAndSwap,
    Delete,
    CompareAndDelete,
    Expire,
}

impl FromStr for Action {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "get" => Ok(Action::Get),
            "set" => Ok(Action::Set),
            "create" => Ok(Action::Create),
            "update" => Ok(Action::Update),
            "compareAndSwap" => Ok(Action::CompareAndSwap),
            "delete" => Ok(Action::Delete),
            "compareAndDelete" => Ok(Action::CompareAndDelete),
            "expire" => Ok(Action::Expire),
            _ => Err(Error::ProtocolViolation(format!("unknown action: {s}"))),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            Action::Get => "get",
            Action::Set => "set",
            Action::Create => "create",
            Action::Update => "update",
            Action::CompareAndSwap => "compareAndSwap",
            Action::Delete => "delete",
            Action::CompareAndDelete => "compareAndDelete",
            Action::Expire => "expire",
        };
        f.write_str(tag)
    }
}

/// Response body as decoded from the wire, before the action tag has been
/// validated against the closed [`Action`] set.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RawResponse {
    pub action: String,
    pub node: Node,
    #[serde(rename = "prevNode", default)]
    pub prev_node: Option<Node>,
}

/// A store response: the affected node, the action that produced it, the
/// prior node state for mutations, and the store-wide index at response
/// time (the `X-Etcd-Index` header).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub action: Action,
    pub node: Node,
    pub prev_node: Option<Node>,
    pub etcd_index: u64,
}

impl Response {
    /// Validate a decoded wire body into a typed response.
    ///
    /// # Errors
    /// [`Error::ProtocolViolation`] for an action tag outside the closed set.
    pub(crate) fn from_raw(raw: RawResponse, etcd_index: u64) -> Result<Self> {
        Ok(Response {
            action: raw.action.parse()?,
            node: raw.node,
            prev_node: raw.prev_node,
            etcd_index,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(key: &str, value: &str) -> Node {
        Node {
            key: key.into(),
            value: Some(value.into()),
            ..Node::default()
        }
    }

    #[test]
    fn decodes_leaf_node() {
        let node: Node = serde_json::from_str(
            r#"{"key":"/kontena/test1","value":"foo","createdIndex":3,"modifiedIndex":5}"#,
        )
        .unwrap();

        assert_eq!(node.key, "/kontena/test1");
        assert_eq!(node.value.as_deref(), Some("foo"));
        assert_eq!(node.modified_index, 5);
        assert!(!node.is_directory());
    }

    #[test]
    fn decodes_leased_node() {
        let node: Node = serde_json::from_str(
            r#"{"key":"/kontena/test1","value":"foo","createdIndex":3,"modifiedIndex":5,"ttl":30,"expiration":"2016-05-10T12:31:34.123Z"}"#,
        )
        .unwrap();

        assert_eq!(node.ttl, Some(30));
        assert!(node.expiration.is_some());
    }

    #[test]
    fn empty_directory_omits_nodes() {
        let node: Node =
            serde_json::from_str(r#"{"key":"/kontena","dir":true,"modifiedIndex":2}"#).unwrap();

        assert!(node.is_directory());
        assert_eq!(node.children().unwrap(), &[]);
    }

    #[test]
    fn children_of_leaf_is_an_error() {
        let node = leaf("/kontena/test1", "foo");
        assert!(matches!(node.children(), Err(Error::Invalid(_))));
    }

    #[test]
    fn walk_visits_nested_leaves() {
        let tree = Node {
            key: "/kontena".into(),
            dir: true,
            nodes: Some(vec![
                leaf("/kontena/test1", "a"),
                Node {
                    key: "/kontena/sub".into(),
                    dir: true,
                    nodes: Some(vec![leaf("/kontena/sub/test2", "b")]),
                    ..Node::default()
                },
            ]),
            ..Node::default()
        };

        let mut keys = Vec::new();
        tree.walk(&mut |node| keys.push(node.key.clone()));

        assert_eq!(keys, vec!["/kontena/test1", "/kontena/sub/test2"]);
    }

    #[test]
    fn rejects_unknown_action() {
        let raw = RawResponse {
            action: "munge".into(),
            node: leaf("/kontena/test1", "foo"),
            prev_node: None,
        };

        assert!(matches!(
            Response::from_raw(raw, 1),
            Err(Error::ProtocolViolation(_))
        ));
    }

    #[test]
    fn parses_compare_actions() {
        assert_eq!("compareAndSwap".parse::<Action>().unwrap(), Action::CompareAndSwap);
        assert_eq!(
            "compareAndDelete".parse::<Action>().unwrap(),
            Action::CompareAndDelete
        );
    }
}
