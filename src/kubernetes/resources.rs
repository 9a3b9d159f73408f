// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Object definitions for the session namespace, RBAC pair and relay pod

use k8s_openapi::api::core::v1::{Container, ContainerPort, Namespace, Pod, PodSpec};
use k8s_openapi::api::rbac::v1::{PolicyRule, Role, RoleBinding, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;

use super::nodes::NodeRef;
use crate::config::Settings;
use crate::session::SessionIdentity;

pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY: &str = "k8s-node-ssh";
pub const SESSION_LABEL: &str = "k8s-node-ssh/session";

fn labels(session: Option<&str>) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::from([(MANAGED_BY_LABEL.to_string(), MANAGED_BY.to_string())]);
    if let Some(name) = session {
        labels.insert(SESSION_LABEL.to_string(), name.to_string());
    }
    labels
}

fn session_meta(identity: &SessionIdentity) -> ObjectMeta {
    ObjectMeta {
        name: Some(identity.service_name().to_string()),
        namespace: Some(identity.namespace().to_string()),
        labels: Some(labels(Some(identity.service_name()))),
        ..Default::default()
    }
}

pub fn namespace(name: &str) -> Namespace {
    Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(labels(None)),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Role allowing the namespace's pods to use the configured PodSecurityPolicy
pub fn role(identity: &SessionIdentity, settings: &Settings) -> Role {
    Role {
        metadata: session_meta(identity),
        rules: Some(vec![PolicyRule {
            api_groups: Some(vec!["policy".to_string()]),
            resources: Some(vec!["podsecuritypolicies".to_string()]),
            verbs: vec!["use".to_string()],
            resource_names: Some(vec![settings.pod_security_policy.clone()]),
            ..Default::default()
        }]),
    }
}

/// Binds the session Role to the namespace's default ServiceAccount
pub fn role_binding(identity: &SessionIdentity) -> RoleBinding {
    RoleBinding {
        metadata: session_meta(identity),
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "Role".to_string(),
            name: identity.service_name().to_string(),
        },
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".to_string(),
            name: "default".to_string(),
            namespace: Some(identity.namespace().to_string()),
            ..Default::default()
        }]),
    }
}

/// Single-container pod relaying `relay_port` to the node's shell port
pub fn relay_pod(identity: &SessionIdentity, settings: &Settings, node: &NodeRef) -> Pod {
    let container = Container {
        name: identity.namespace().to_string(),
        image: Some(settings.relay_image.clone()),
        command: Some(vec!["socat".to_string()]),
        args: Some(relay_args(settings, node)),
        ports: Some(vec![ContainerPort {
            container_port: i32::from(settings.relay_port),
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
        ..Default::default()
    };

    Pod {
        metadata: session_meta(identity),
        spec: Some(PodSpec {
            containers: vec![container],
            restart_policy: Some("Never".to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn relay_args(settings: &Settings, node: &NodeRef) -> Vec<String> {
    vec![
        format!("tcp-listen:{},fork", settings.relay_port),
        format!("tcp:{}:{}", node.address, settings.target_port),
    ]
}
