// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

use comfy_table::{Table, presets::ASCII_BORDERS_ONLY_CONDENSED};

use crate::kubernetes::NodeRef;

const HEADER: [&str; 3] = ["#", "NAME", "ADDRESS"];

pub struct TableFormatter;

impl TableFormatter {
    /// Numbered node table; the `#` column is what `--connect` accepts
    pub fn format(nodes: &[NodeRef]) -> String {
        if nodes.is_empty() {
            return "No nodes found".to_string();
        }

        let mut table = Table::new();
        table.load_preset(ASCII_BORDERS_ONLY_CONDENSED);
        table.set_header(HEADER);

        for (idx, node) in nodes.iter().enumerate() {
            table.add_row(vec![
                (idx + 1).to_string(),
                node.name.clone(),
                node.address.clone(),
            ]);
        }

        format!("List of nodes:\n{}", table)
    }
}
