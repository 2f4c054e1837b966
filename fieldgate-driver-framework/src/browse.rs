//! Namespace tree browsing for the browse and schema requests.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::Serialize;

use crate::client::{BrowseDirection, ClientError, ClientResult, NodeClass};
use crate::resolver::BrowseSource;

/// One node of a browse reply.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct BrowseEntry {
    pub browse_name: String,
    pub browse_path: String,
    pub display_name: String,
    pub node_id: String,
    pub node_class: NodeClass,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nodes: Option<Vec<BrowseEntry>>,
}

/// What to browse and how deep.
#[derive(Debug, Clone)]
pub struct BrowseRequest {
    pub node: String,
    /// Browse path of `node`, prefixed to every result.
    pub base_path: String,
    pub direction: BrowseDirection,
    /// `None` walks the whole tree below `node`.
    pub max_depth: Option<usize>,
    /// Return a flat list instead of nested `Nodes`.
    pub flat: bool,
}

impl BrowseRequest {
    /// Direct children of `node`.
    pub fn children(node: impl Into<String>, base_path: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            base_path: base_path.into(),
            direction: BrowseDirection::Forward,
            max_depth: Some(1),
            flat: false,
        }
    }

    /// The whole tree below `node`.
    pub fn tree(node: impl Into<String>, base_path: impl Into<String>, flat: bool) -> Self {
        Self {
            node: node.into(),
            base_path: base_path.into(),
            direction: BrowseDirection::Forward,
            max_depth: None,
            flat,
        }
    }

    pub fn with_direction(mut self, direction: BrowseDirection) -> Self {
        self.direction = direction;
        self
    }
}

type WalkFuture<'a> = Pin<Box<dyn Future<Output = ClientResult<Vec<BrowseEntry>>> + Send + 'a>>;

/// Browse a namespace tree. Objects are descended into; each node is listed once.
pub async fn browse_tree(
    source: &dyn BrowseSource,
    request: &BrowseRequest,
    timeout: Duration,
) -> ClientResult<Vec<BrowseEntry>> {
    let mut visited = HashSet::from([request.node.clone()]);
    let tree = walk(
        source,
        request,
        timeout,
        request.node.clone(),
        request.base_path.clone(),
        1,
        &mut visited,
    )
    .await?;

    if request.flat {
        let mut flat = Vec::new();
        flatten(tree, &mut flat);
        Ok(flat)
    } else {
        Ok(tree)
    }
}

fn walk<'a>(
    source: &'a dyn BrowseSource,
    request: &'a BrowseRequest,
    timeout: Duration,
    node: String,
    path: String,
    depth: usize,
    visited: &'a mut HashSet<String>,
) -> WalkFuture<'a> {
    Box::pin(async move {
        let children = tokio::time::timeout(timeout, source.browse(&node, request.direction))
            .await
            .map_err(|_| ClientError::Timeout(timeout))??;

        let mut entries = Vec::with_capacity(children.len());
        for child in children {
            if !visited.insert(child.address.clone()) {
                continue;
            }
            let browse_path = if path.is_empty() {
                child.browse_name.clone()
            } else {
                format!("{}/{}", path, child.browse_name)
            };
            let descend = child.class == NodeClass::Object
                && request.max_depth.is_none_or(|max| depth < max);

            let nodes = if descend {
                let nested = walk(
                    source,
                    request,
                    timeout,
                    child.address.clone(),
                    browse_path.clone(),
                    depth + 1,
                    visited,
                )
                .await?;
                Some(nested)
            } else {
                None
            };

            entries.push(BrowseEntry {
                browse_name: child.browse_name,
                browse_path,
                display_name: child.display_name,
                node_id: child.address,
                node_class: child.class,
                nodes,
            });
        }
        Ok(entries)
    })
}

fn flatten(entries: Vec<BrowseEntry>, out: &mut Vec<BrowseEntry>) {
    for mut entry in entries {
        let nested = entry.nodes.take();
        out.push(entry);
        if let Some(nested) = nested {
            flatten(nested, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::BrowseNode;
    use async_trait::async_trait;
    use std::collections::HashMap;

    struct Tree(HashMap<&'static str, Vec<BrowseNode>>);

    #[async_trait]
    impl BrowseSource for Tree {
        async fn browse(
            &self,
            node: &str,
            direction: BrowseDirection,
        ) -> ClientResult<Vec<BrowseNode>> {
            if direction == BrowseDirection::Inverse {
                return Ok(vec![BrowseNode::new("i=84", "Root", NodeClass::Object)]);
            }
            Ok(self.0.get(node).cloned().unwrap_or_default())
        }
    }

    fn tree() -> Tree {
        let mut map = HashMap::new();
        map.insert(
            "i=85",
            vec![
                BrowseNode::new("ns=1;s=Line", "Line", NodeClass::Object),
                BrowseNode::new("ns=1;s=Mode", "Mode", NodeClass::Variable),
            ],
        );
        map.insert(
            "ns=1;s=Line",
            vec![
                BrowseNode::new("ns=1;s=Line.Speed", "Speed", NodeClass::Variable),
                // Loop back to the parent.
                BrowseNode::new("i=85", "Objects", NodeClass::Object),
            ],
        );
        Tree(map)
    }

    #[tokio::test]
    async fn test_children_only() {
        let request = BrowseRequest::children("i=85", "Objects");
        let entries = browse_tree(&tree(), &request, Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].browse_path, "Objects/Line");
        assert!(entries[0].nodes.is_none());
    }

    #[tokio::test]
    async fn test_nested_tree() {
        let request = BrowseRequest::tree("i=85", "Objects", false);
        let entries = browse_tree(&tree(), &request, Duration::from_secs(1))
            .await
            .unwrap();

        let line = &entries[0];
        let nested = line.nodes.as_ref().unwrap();
        assert_eq!(nested.len(), 1);
        assert_eq!(nested[0].browse_path, "Objects/Line/Speed");

        let json = serde_json::to_value(&entries).unwrap();
        assert_eq!(json[0]["NodeId"], "ns=1;s=Line");
        assert_eq!(json[0]["NodeClass"], "Object");
        assert_eq!(json[0]["Nodes"][0]["BrowseName"], "Speed");
        assert!(json[1].get("Nodes").is_none());
    }

    #[tokio::test]
    async fn test_flat_tree() {
        let request = BrowseRequest::tree("i=85", "Objects", true);
        let entries = browse_tree(&tree(), &request, Duration::from_secs(1))
            .await
            .unwrap();

        let paths: Vec<&str> = entries.iter().map(|e| e.browse_path.as_str()).collect();
        assert_eq!(paths, vec!["Objects/Line", "Objects/Line/Speed", "Objects/Mode"]);
        assert!(entries.iter().all(|e| e.nodes.is_none()));
    }

    #[tokio::test]
    async fn test_inverse_direction() {
        let request =
            BrowseRequest::children("ns=1;s=Line", "").with_direction(BrowseDirection::Inverse);
        let entries = browse_tree(&tree(), &request, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(entries[0].browse_name, "Root");
        assert_eq!(entries[0].browse_path, "Root");
    }
}
