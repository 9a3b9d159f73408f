// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

mod forward;
mod keys;
mod manager;
mod pty;
mod readiness;
mod relay;

pub use forward::KubectlPortForward;
pub use manager::TunnelManager;
pub use pty::PtyShell;
pub use readiness::TokioDelay;
pub use relay::{RelaySessionController, RelaySettings};
