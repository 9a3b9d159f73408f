// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Typed create/read/list/delete for the four resource kinds a session uses
//!
//! Conflict on create and absence on delete/read are folded into outcomes by
//! one set of wrappers, so callers never inspect status codes themselves.

use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::core::v1::{Namespace, Node, Pod};
use k8s_openapi::api::rbac::v1::{Role, RoleBinding};
use kube::api::{DeleteParams, ListParams, PostParams};
use kube::{Api, Client, Resource};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use tracing::debug;

/// Server-side timeout for list calls
const LIST_TIMEOUT_SECS: u32 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    AlreadyExists,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    AlreadyAbsent,
}

/// Cluster operations needed by the tunnel lifecycle
#[async_trait]
pub trait ClusterGateway: Send + Sync {
    async fn list_nodes(&self) -> Result<Vec<Node>, kube::Error>;

    async fn create_namespace(&self, namespace: &Namespace) -> Result<CreateOutcome, kube::Error>;
    async fn read_namespace(&self, name: &str) -> Result<Option<Namespace>, kube::Error>;
    async fn delete_namespace(&self, name: &str) -> Result<DeleteOutcome, kube::Error>;

    async fn create_role(&self, ns: &str, role: &Role) -> Result<CreateOutcome, kube::Error>;
    async fn list_roles(&self, ns: &str) -> Result<Vec<Role>, kube::Error>;
    async fn delete_role(&self, ns: &str, name: &str) -> Result<DeleteOutcome, kube::Error>;

    async fn create_role_binding(
        &self,
        ns: &str,
        binding: &RoleBinding,
    ) -> Result<CreateOutcome, kube::Error>;
    async fn list_role_bindings(&self, ns: &str) -> Result<Vec<RoleBinding>, kube::Error>;
    async fn delete_role_binding(&self, ns: &str, name: &str)
    -> Result<DeleteOutcome, kube::Error>;

    async fn create_pod(&self, ns: &str, pod: &Pod) -> Result<CreateOutcome, kube::Error>;
    async fn read_pod(&self, ns: &str, name: &str) -> Result<Option<Pod>, kube::Error>;
    async fn list_pods(&self, ns: &str) -> Result<Vec<Pod>, kube::Error>;
    async fn delete_pod(&self, ns: &str, name: &str) -> Result<DeleteOutcome, kube::Error>;
}

fn is_status(err: &kube::Error, code: u16) -> bool {
    matches!(err, kube::Error::Api(api_err) if api_err.code == code)
}

pub fn is_conflict(err: &kube::Error) -> bool {
    is_status(err, 409)
}

pub fn is_not_found(err: &kube::Error) -> bool {
    is_status(err, 404)
}

/// Treat "already exists" as success
pub fn tolerate_conflict<T>(result: Result<T, kube::Error>) -> Result<CreateOutcome, kube::Error> {
    match result {
        Ok(_) => Ok(CreateOutcome::Created),
        Err(e) if is_conflict(&e) => Ok(CreateOutcome::AlreadyExists),
        Err(e) => Err(e),
    }
}

/// Treat "not found" as success
pub fn tolerate_absent<T>(result: Result<T, kube::Error>) -> Result<DeleteOutcome, kube::Error> {
    match result {
        Ok(_) => Ok(DeleteOutcome::Deleted),
        Err(e) if is_not_found(&e) => Ok(DeleteOutcome::AlreadyAbsent),
        Err(e) => Err(e),
    }
}

/// Map "not found" on a read to `None`
pub fn optional<T>(result: Result<T, kube::Error>) -> Result<Option<T>, kube::Error> {
    match result {
        Ok(obj) => Ok(Some(obj)),
        Err(e) if is_not_found(&e) => Ok(None),
        Err(e) => Err(e),
    }
}

async fn create_idempotent<K>(api: &Api<K>, obj: &K) -> Result<CreateOutcome, kube::Error>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Serialize + Debug,
{
    let outcome = tolerate_conflict(api.create(&PostParams::default(), obj).await)?;
    debug!(
        kind = %K::kind(&()),
        name = ?obj.meta().name,
        outcome = ?outcome,
        "create"
    );
    Ok(outcome)
}

async fn delete_idempotent<K>(api: &Api<K>, name: &str) -> Result<DeleteOutcome, kube::Error>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug,
{
    let outcome = tolerate_absent(api.delete(name, &DeleteParams::default()).await)?;
    debug!(kind = %K::kind(&()), name = %name, outcome = ?outcome, "delete");
    Ok(outcome)
}

async fn list_all<K>(api: &Api<K>) -> Result<Vec<K>, kube::Error>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    let params = ListParams::default().timeout(LIST_TIMEOUT_SECS);
    Ok(api.list(&params).await?.items)
}

/// Gateway backed by a live API server
#[derive(Clone)]
pub struct KubeGateway {
    client: Client,
}

impl KubeGateway {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn namespaced<K>(&self, ns: &str) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope>,
        <K as Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), ns)
    }
}

#[async_trait]
impl ClusterGateway for KubeGateway {
    async fn list_nodes(&self) -> Result<Vec<Node>, kube::Error> {
        list_all(&Api::<Node>::all(self.client.clone())).await
    }

    async fn create_namespace(&self, namespace: &Namespace) -> Result<CreateOutcome, kube::Error> {
        create_idempotent(&Api::<Namespace>::all(self.client.clone()), namespace).await
    }

    async fn read_namespace(&self, name: &str) -> Result<Option<Namespace>, kube::Error> {
        optional(Api::<Namespace>::all(self.client.clone()).get(name).await)
    }

    async fn delete_namespace(&self, name: &str) -> Result<DeleteOutcome, kube::Error> {
        delete_idempotent(&Api::<Namespace>::all(self.client.clone()), name).await
    }

    async fn create_role(&self, ns: &str, role: &Role) -> Result<CreateOutcome, kube::Error> {
        create_idempotent(&self.namespaced::<Role>(ns), role).await
    }

    async fn list_roles(&self, ns: &str) -> Result<Vec<Role>, kube::Error> {
        list_all(&self.namespaced::<Role>(ns)).await
    }

    async fn delete_role(&self, ns: &str, name: &str) -> Result<DeleteOutcome, kube::Error> {
        delete_idempotent(&self.namespaced::<Role>(ns), name).await
    }

    async fn create_role_binding(
        &self,
        ns: &str,
        binding: &RoleBinding,
    ) -> Result<CreateOutcome, kube::Error> {
        create_idempotent(&self.namespaced::<RoleBinding>(ns), binding).await
    }

    async fn list_role_bindings(&self, ns: &str) -> Result<Vec<RoleBinding>, kube::Error> {
        list_all(&self.namespaced::<RoleBinding>(ns)).await
    }

    async fn delete_role_binding(
        &self,
        ns: &str,
        name: &str,
    ) -> Result<DeleteOutcome, kube::Error> {
        delete_idempotent(&self.namespaced::<RoleBinding>(ns), name).await
    }

    async fn create_pod(&self, ns: &str, pod: &Pod) -> Result<CreateOutcome, kube::Error> {
        create_idempotent(&self.namespaced::<Pod>(ns), pod).await
    }

    async fn read_pod(&self, ns: &str, name: &str) -> Result<Option<Pod>, kube::Error> {
        optional(self.namespaced::<Pod>(ns).get(name).await)
    }

    async fn list_pods(&self, ns: &str) -> Result<Vec<Pod>, kube::Error> {
        list_all(&self.namespaced::<Pod>(ns)).await
    }

    async fn delete_pod(&self, ns: &str, name: &str) -> Result<DeleteOutcome, kube::Error> {
        delete_idempotent(&self.namespaced::<Pod>(ns), name).await
    }
}

#[cfg(test)]
pub(crate) fn api_error(code: u16) -> kube::Error {
    let reason = match code {
        404 => "NotFound",
        409 => "AlreadyExists",
        _ => "InternalError",
    };
    kube::Error::Api(kube::error::ErrorResponse {
        status: "Failure".to_string(),
        message: format!("status {}", code),
        reason: reason.to_string(),
        code,
    })
}
