//! Cellar Core - bucket-scoped metadata over an ordered KV store
//!
//! The master process owns a single ordered key-value store and carves
//! it into named namespaces, one per bucket. Namespaces are advertised
//! to worker processes through an atomically published manifest, and all
//! KV traffic from workers flows through the length-framed RPC server in
//! [`server`].

pub mod kv;
pub mod listing;
pub mod metastore;
pub mod namespace;
pub mod server;

pub use kv::{Namespace, RootDb, Scan};
pub use metastore::Metastore;
pub use namespace::{LocalNamespace, Manifest, MethodDescriptor, Registry};
pub use server::{bootstrap, serve, ServerState};
