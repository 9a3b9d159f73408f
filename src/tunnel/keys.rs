// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Rewriting of outbound keystrokes before they reach the remote shell

use std::borrow::Cow;

/// ASCII ETX (Ctrl-C)
pub const ETX: u8 = 0x03;
/// ASCII EOT (Ctrl-D)
pub const EOT: u8 = 0x04;

/// Sent instead of Ctrl-C
pub const INTERRUPT_HINT: &[u8] = b"\r: Press CTRL-D to exit!\r";
/// Sent instead of Ctrl-D
pub const EXIT_COMMAND: &[u8] = b"\nexit\r";

/// Rewrite one chunk read from the local terminal
///
/// Ctrl-C becomes a hint to use Ctrl-D, Ctrl-D becomes the remote `exit`
/// command. Chunks without either byte are passed through unchanged.
pub fn filter_outbound(input: &[u8]) -> Cow<'_, [u8]> {
    if !input.iter().any(|&b| b == ETX || b == EOT) {
        return Cow::Borrowed(input);
    }

    let mut out = Vec::with_capacity(input.len() + EXIT_COMMAND.len());
    for &byte in input {
        match byte {
            ETX => out.extend_from_slice(INTERRUPT_HINT),
            EOT => out.extend_from_slice(EXIT_COMMAND),
            other => out.push(other),
        }
    }
    Cow::Owned(out)
}
