//! Core abstractions for the chore flow engine
//!
//! This crate provides the graph model, the value envelope passed along
//! edges, the node capability trait and the per-run flow registry. It knows
//! nothing about how a run is scheduled.

mod error;
mod flow;
mod graph;
mod host;
mod node;
mod value;

pub use error::{FlowError, HostError, NodeError};
pub use flow::{FlowRegistry, ParkGuard, StallTracker};
pub use graph::{
    parse_graph, split_list, Connection, GraphDefinition, NodeConfig, PortConnections,
};
pub use host::{EmailMessage, EmailSettings, FlowLauncher, Host, HttpRequest, HttpResponse};
pub use node::{tags_enabled, InputSlot, Node, NodeContext, Ports, TagSet, Trigger};
pub use value::{bytes_to_data, data_to_bytes, Attachment, Envelope, Payload, Response};

/// Result type for flow operations
pub type Result<T> = std::result::Result<T, FlowError>;
