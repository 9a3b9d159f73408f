// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! In-memory gateway for tests

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Namespace, Node, Pod, PodStatus};
use k8s_openapi::api::rbac::v1::{Role, RoleBinding};
use kube::Resource;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::Mutex;

use super::gateway::{
    ClusterGateway, CreateOutcome, DeleteOutcome, api_error, optional, tolerate_absent,
    tolerate_conflict,
};

type Key = (String, String);

#[derive(Default)]
struct State {
    nodes: Vec<Node>,
    namespaces: BTreeMap<String, Namespace>,
    roles: BTreeMap<Key, Role>,
    bindings: BTreeMap<Key, RoleBinding>,
    pods: BTreeMap<Key, Pod>,
    /// Phases handed out by successive `read_pod` calls; the last one sticks
    phases: VecDeque<String>,
    failing: HashSet<&'static str>,
    calls: Vec<String>,
    /// Reads a deleted pod stays visible for
    terminating_reads: u32,
    terminating: BTreeMap<Key, (Pod, u32)>,
}

#[derive(Default)]
pub struct FakeGateway {
    state: Mutex<State>,
}

fn key(ns: &str, name: &str) -> Key {
    (ns.to_string(), name.to_string())
}

fn name_of<K: Resource>(obj: &K) -> String {
    obj.meta().name.clone().unwrap_or_default()
}

impl FakeGateway {
    pub fn with_nodes(nodes: Vec<Node>) -> Self {
        let gateway = Self::default();
        gateway.state.lock().unwrap().nodes = nodes;
        gateway
    }

    pub fn add_namespace(&self, name: &str) {
        self.state
            .lock()
            .unwrap()
            .namespaces
            .insert(name.to_string(), super::resources::namespace(name));
    }

    pub fn add_pod(&self, ns: &str, name: &str) {
        let mut pod = Pod::default();
        pod.metadata.name = Some(name.to_string());
        self.state.lock().unwrap().pods.insert(key(ns, name), pod);
    }

    pub fn add_role(&self, ns: &str, name: &str) {
        let mut role = Role::default();
        role.metadata.name = Some(name.to_string());
        self.state.lock().unwrap().roles.insert(key(ns, name), role);
    }

    pub fn add_role_binding(&self, ns: &str, name: &str) {
        let mut binding = RoleBinding::default();
        binding.metadata.name = Some(name.to_string());
        self.state
            .lock()
            .unwrap()
            .bindings
            .insert(key(ns, name), binding);
    }

    /// Script the phases reported for pods, one per read
    pub fn set_phases(&self, phases: &[&str]) {
        self.state.lock().unwrap().phases = phases.iter().map(|p| p.to_string()).collect();
    }

    /// Keep deleted pods readable for `reads` more `read_pod` calls
    pub fn set_terminating_reads(&self, reads: u32) {
        self.state.lock().unwrap().terminating_reads = reads;
    }

    /// Make the named operation fail with a 500
    pub fn fail(&self, op: &'static str) {
        self.state.lock().unwrap().failing.insert(op);
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn has_namespace(&self, name: &str) -> bool {
        self.state.lock().unwrap().namespaces.contains_key(name)
    }

    pub fn pod_names(&self, ns: &str) -> Vec<String> {
        names_in(&self.state.lock().unwrap().pods, ns)
    }

    pub fn role_names(&self, ns: &str) -> Vec<String> {
        names_in(&self.state.lock().unwrap().roles, ns)
    }

    pub fn role_binding_names(&self, ns: &str) -> Vec<String> {
        names_in(&self.state.lock().unwrap().bindings, ns)
    }

    pub fn pod(&self, ns: &str, name: &str) -> Option<Pod> {
        self.state.lock().unwrap().pods.get(&key(ns, name)).cloned()
    }

    pub fn role(&self, ns: &str, name: &str) -> Option<Role> {
        self.state.lock().unwrap().roles.get(&key(ns, name)).cloned()
    }

    /// Record the call and fail it if requested
    fn enter(&self, op: &'static str) -> Result<std::sync::MutexGuard<'_, State>, kube::Error> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(op.to_string());
        if state.failing.contains(op) {
            return Err(api_error(500));
        }
        Ok(state)
    }
}

fn names_in<V>(map: &BTreeMap<Key, V>, ns: &str) -> Vec<String> {
    map.keys()
        .filter(|(n, _)| n == ns)
        .map(|(_, name)| name.clone())
        .collect()
}

fn require_namespace(state: &State, ns: &str) -> Result<(), kube::Error> {
    if state.namespaces.contains_key(ns) {
        Ok(())
    } else {
        Err(api_error(404))
    }
}

fn insert_new<V>(map: &mut BTreeMap<Key, V>, k: Key, v: V) -> Result<(), kube::Error> {
    if map.contains_key(&k) {
        return Err(api_error(409));
    }
    map.insert(k, v);
    Ok(())
}

fn remove<V>(map: &mut BTreeMap<Key, V>, k: &Key) -> Result<V, kube::Error> {
    map.remove(k).ok_or_else(|| api_error(404))
}

#[async_trait]
impl ClusterGateway for FakeGateway {
    async fn list_nodes(&self) -> Result<Vec<Node>, kube::Error> {
        Ok(self.enter("list_nodes")?.nodes.clone())
    }

    async fn create_namespace(&self, namespace: &Namespace) -> Result<CreateOutcome, kube::Error> {
        let mut state = self.enter("create_namespace")?;
        let name = name_of(namespace);
        let result = if state.namespaces.contains_key(&name) {
            Err(api_error(409))
        } else {
            state.namespaces.insert(name, namespace.clone());
            Ok(())
        };
        tolerate_conflict(result)
    }

    async fn read_namespace(&self, name: &str) -> Result<Option<Namespace>, kube::Error> {
        let state = self.enter("read_namespace")?;
        optional(state.namespaces.get(name).cloned().ok_or_else(|| api_error(404)))
    }

    async fn delete_namespace(&self, name: &str) -> Result<DeleteOutcome, kube::Error> {
        let mut state = self.enter("delete_namespace")?;
        // No cascade: tests observe what the caller swept itself
        tolerate_absent(state.namespaces.remove(name).ok_or_else(|| api_error(404)))
    }

    async fn create_role(&self, ns: &str, role: &Role) -> Result<CreateOutcome, kube::Error> {
        let mut state = self.enter("create_role")?;
        require_namespace(&state, ns)?;
        tolerate_conflict(insert_new(&mut state.roles, key(ns, &name_of(role)), role.clone()))
    }

    async fn list_roles(&self, ns: &str) -> Result<Vec<Role>, kube::Error> {
        let state = self.enter("list_roles")?;
        Ok(state
            .roles
            .iter()
            .filter(|((n, _), _)| n == ns)
            .map(|(_, role)| role.clone())
            .collect())
    }

    async fn delete_role(&self, ns: &str, name: &str) -> Result<DeleteOutcome, kube::Error> {
        let mut state = self.enter("delete_role")?;
        tolerate_absent(remove(&mut state.roles, &key(ns, name)))
    }

    async fn create_role_binding(
        &self,
        ns: &str,
        binding: &RoleBinding,
    ) -> Result<CreateOutcome, kube::Error> {
        let mut state = self.enter("create_role_binding")?;
        require_namespace(&state, ns)?;
        tolerate_conflict(insert_new(
            &mut state.bindings,
            key(ns, &name_of(binding)),
            binding.clone(),
        ))
    }

    async fn list_role_bindings(&self, ns: &str) -> Result<Vec<RoleBinding>, kube::Error> {
        let state = self.enter("list_role_bindings")?;
        Ok(state
            .bindings
            .iter()
            .filter(|((n, _), _)| n == ns)
            .map(|(_, binding)| binding.clone())
            .collect())
    }

    async fn delete_role_binding(
        &self,
        ns: &str,
        name: &str,
    ) -> Result<DeleteOutcome, kube::Error> {
        let mut state = self.enter("delete_role_binding")?;
        tolerate_absent(remove(&mut state.bindings, &key(ns, name)))
    }

    async fn create_pod(&self, ns: &str, pod: &Pod) -> Result<CreateOutcome, kube::Error> {
        let mut state = self.enter("create_pod")?;
        require_namespace(&state, ns)?;
        tolerate_conflict(insert_new(&mut state.pods, key(ns, &name_of(pod)), pod.clone()))
    }

    async fn read_pod(&self, ns: &str, name: &str) -> Result<Option<Pod>, kube::Error> {
        let mut state = self.enter("read_pod")?;
        let phase = if state.phases.len() > 1 {
            state.phases.pop_front()
        } else {
            state.phases.front().cloned()
        };
        let k = key(ns, name);
        let lingering = match state.terminating.get_mut(&k) {
            Some((pod, left)) if *left > 0 => {
                *left -= 1;
                Some(pod.clone())
            }
            _ => None,
        };
        let pod = state.pods.get(&k).cloned().or(lingering).map(|mut pod| {
            pod.status = Some(PodStatus {
                phase: Some(phase.unwrap_or_else(|| "Running".to_string())),
                ..Default::default()
            });
            pod
        });
        optional(pod.ok_or_else(|| api_error(404)))
    }

    async fn list_pods(&self, ns: &str) -> Result<Vec<Pod>, kube::Error> {
        let state = self.enter("list_pods")?;
        Ok(state
            .pods
            .iter()
            .filter(|((n, _), _)| n == ns)
            .map(|(_, pod)| pod.clone())
            .collect())
    }

    async fn delete_pod(&self, ns: &str, name: &str) -> Result<DeleteOutcome, kube::Error> {
        let mut state = self.enter("delete_pod")?;
        let k = key(ns, name);
        let result = remove(&mut state.pods, &k);
        if let Ok(pod) = &result
            && state.terminating_reads > 0
        {
            let reads = state.terminating_reads;
            state.terminating.insert(k, (pod.clone(), reads));
        }
        tolerate_absent(result)
    }
}
