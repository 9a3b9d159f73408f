// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Node references and `--connect` selector resolution
//!
//! The node list is rebuilt from the cluster on every call and kept in the
//! order the API returned it, so ordinals match what `--list` printed.

use k8s_openapi::api::core::v1::Node;
use serde::Serialize;

/// A worker node and the address the relay dials
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeRef {
    pub name: String,
    pub address: String,
}

impl NodeRef {
    /// Name and first reported address of a node; `None` for unnamed nodes
    pub fn from_node(node: &Node) -> Option<Self> {
        let name = node.metadata.name.clone()?;
        let address = node
            .status
            .as_ref()
            .and_then(|s| s.addresses.as_ref())
            .and_then(|a| a.first())
            .map(|a| a.address.clone())
            .unwrap_or_default();
        Some(Self { name, address })
    }
}

pub fn node_refs(nodes: &[Node]) -> Vec<NodeRef> {
    nodes.iter().filter_map(NodeRef::from_node).collect()
}

/// User-supplied `--connect` token
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeSelector {
    /// 1-based position in the listed order
    Ordinal(usize),
    Name(String),
}

impl NodeSelector {
    pub fn parse(token: &str) -> Self {
        let token = token.trim();
        match token.parse::<usize>() {
            Ok(n) => NodeSelector::Ordinal(n),
            Err(_) => NodeSelector::Name(token.to_string()),
        }
    }

    /// Resolve against the current node list
    ///
    /// An out-of-range ordinal falls back to a name lookup, since node names
    /// may be purely numeric. Nodes without an address never match.
    pub fn resolve<'a>(&self, nodes: &'a [NodeRef]) -> Option<&'a NodeRef> {
        let found = match self {
            NodeSelector::Ordinal(n) if (1..=nodes.len()).contains(n) => nodes.get(n - 1),
            NodeSelector::Ordinal(n) => find_by_name(nodes, &n.to_string()),
            NodeSelector::Name(name) => find_by_name(nodes, name),
        };
        found.filter(|node| !node.address.is_empty())
    }
}

fn find_by_name<'a>(nodes: &'a [NodeRef], name: &str) -> Option<&'a NodeRef> {
    nodes.iter().find(|node| node.name == name)
}

impl std::fmt::Display for NodeSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeSelector::Ordinal(n) => write!(f, "{}", n),
            NodeSelector::Name(name) => f.write_str(name),
        }
    }
}

#[cfg(test)]
pub(crate) fn test_node(name: &str, address: Option<&str>) -> Node {
    use k8s_openapi::api::core::v1::{NodeAddress, NodeStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    Node {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        status: address.map(|addr| NodeStatus {
            addresses: Some(vec![NodeAddress {
                address: addr.to_string(),
                type_: "InternalIP".to_string(),
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}
