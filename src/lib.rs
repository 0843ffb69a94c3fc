//! Collector agent library: the collector engine (spec.md's core) plus the
//! thin ambient collaborators (config, HTTP/Kubernetes transport, telemetry)
//! that `src/main.rs` wires together into a runnable binary. Exposed as a
//! library, not just a binary module tree, so integration tests can drive
//! the adapters and the manager the same way the binary does.

pub mod adapters;
pub mod config;
pub mod expander;
pub mod http_client;
pub mod k8s;
pub mod manager;
pub mod merger;
pub mod model;
pub mod sink;
pub mod status;
pub mod tags;
pub mod telemetry;
pub mod token;
