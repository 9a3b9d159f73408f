// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

use serde::Serialize;

use crate::kubernetes::NodeRef;

#[derive(Serialize)]
struct NumberedNode<'a> {
    index: usize,
    #[serde(flatten)]
    node: &'a NodeRef,
}

pub struct JsonFormatter;

impl JsonFormatter {
    pub fn format(nodes: &[NodeRef]) -> String {
        let rows: Vec<NumberedNode<'_>> = nodes
            .iter()
            .enumerate()
            .map(|(idx, node)| NumberedNode {
                index: idx + 1,
                node,
            })
            .collect();
        serde_json::to_string_pretty(&rows).unwrap_or_else(|_| "[]".to_string())
    }
}
