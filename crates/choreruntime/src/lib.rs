//! Control flow execution runtime
//!
//! This crate turns a stored control into a running flow: it owns the node
//! factory registry, builds the per-run flow registry, performs the
//! validation/prefetch pass and runs the graph one task per edge.

mod executor;
mod loader;
mod prefetch;
mod registry;
mod runtime;

pub use executor::FlowExecutor;
pub use loader::{has_reachable_cycle, load_nodes};
pub use prefetch::visit_and_fetch;
pub use registry::{NodeFactory, NodeMetadata, NodeRegistry, PortDefinition};
pub use runtime::{ConfigError, FlowRequest, FlowRuntime, RunHandle, RuntimeConfig};
