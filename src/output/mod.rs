// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

mod json;
mod table;

pub use json::JsonFormatter;
pub use table::TableFormatter;

use crate::cli::OutputFormat;
use crate::kubernetes::NodeRef;

/// Render the node list for `--list`
pub fn format_nodes(nodes: &[NodeRef], format: &OutputFormat) -> String {
    match format {
        OutputFormat::Table => TableFormatter::format(nodes),
        OutputFormat::Json => JsonFormatter::format(nodes),
    }
}
