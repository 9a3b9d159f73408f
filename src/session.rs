// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Per-process session identity
//!
//! Every object a `connect` creates shares one name so that a later
//! `--destroy` sweep can find them, even after this process is gone.

use rand::Rng;

/// Length of the random suffix appended to the name prefix
const SUFFIX_LEN: usize = 8;

/// Characters allowed in a DNS-1123 label, minus the hyphen
const SUFFIX_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Namespace/name pair shared by all objects of one session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionIdentity {
    namespace: String,
    service_name: String,
}

impl SessionIdentity {
    /// Build an identity with a fresh random suffix
    pub fn generate(namespace: &str, prefix: &str) -> Self {
        Self::with_suffix(namespace, prefix, &random_suffix(SUFFIX_LEN))
    }

    /// Build an identity with a caller-chosen suffix
    pub fn with_suffix(namespace: &str, prefix: &str, suffix: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            service_name: format!("{}-{}", prefix, suffix),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Name used for the relay pod, Role and RoleBinding
    pub fn service_name(&self) -> &str {
        &self.service_name
    }
}

/// Random string of lowercase ASCII letters and digits, each equally likely
pub fn random_suffix(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| char::from(SUFFIX_CHARSET[rng.gen_range(0..SUFFIX_CHARSET.len())]))
        .collect()
}
