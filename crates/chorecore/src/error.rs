use thiserror::Error;

/// Errors that abort a flow before (or instead of) execution.
#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Endpoint not found: {0}")]
    EndpointNotFound(String),

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Node {node_id} ({node_type}) cannot be created: {source}")]
    Create {
        node_id: String,
        node_type: String,
        #[source]
        source: NodeError,
    },

    #[error("Node {node_id} ({node_type}) validate failed: {source}")]
    Validate {
        node_id: String,
        node_type: String,
        #[source]
        source: NodeError,
    },

    #[error("Node {node_id} ({node_type}) fetch failed: {source}")]
    Fetch {
        node_id: String,
        node_type: String,
        #[source]
        source: NodeError,
    },

    #[error("Flow canceled")]
    Canceled,

    #[error("Host error: {0}")]
    Host(#[from] HostError),
}

impl FlowError {
    /// True when the requested endpoint matched no entry node.
    pub fn is_not_found(&self) -> bool {
        matches!(self, FlowError::EndpointNotFound(_))
    }
}

impl From<serde_json::Error> for FlowError {
    fn from(e: serde_json::Error) -> Self {
        FlowError::Parse(e.to_string())
    }
}

/// Errors produced by a single node while validating, fetching or running.
#[derive(Error, Debug, Clone)]
pub enum NodeError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Node has no signal input to continue")]
    MissingSignal,

    #[error("Host error: {0}")]
    Host(#[from] HostError),

    #[error("Script error: {0}")]
    Script(String),

    #[error("Template error: {0}")]
    Template(String),

    #[error("Execution failed: {0}")]
    Execution(String),

    #[error("Nested flow failed: {0}")]
    Nested(String),

    #[error("Stall detected, node {0} terminated")]
    Stalled(String),
}

/// Errors reported by the host collaborators (storage, transport).
#[derive(Error, Debug, Clone)]
pub enum HostError {
    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid data: {0}")]
    Invalid(String),
}
