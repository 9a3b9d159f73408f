mod client;
#[cfg(test)]
pub(crate) mod fake;
pub mod gateway;
pub mod nodes;
pub mod resources;

pub use client::connect;
pub use gateway::{ClusterGateway, CreateOutcome, DeleteOutcome, KubeGateway};
pub use nodes::{NodeRef, NodeSelector};
