use chorecore::{FlowError, Node, NodeConfig, NodeError};
use std::collections::HashMap;
use std::sync::Arc;

/// Factory trait for creating node instances
pub trait NodeFactory: Send + Sync {
    /// Create a fresh instance of the node for one run
    fn create(&self, node_id: &str, config: &NodeConfig) -> Result<Arc<dyn Node>, NodeError>;

    /// Get node type identifier
    fn node_type(&self) -> &str;

    /// Optional: Get node metadata (description, input/output ports)
    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::default()
    }
}

/// Metadata about a node type
#[derive(Debug, Clone)]
pub struct NodeMetadata {
    pub description: String,
    pub category: String,
    pub inputs: Vec<PortDefinition>,
    pub outputs: Vec<PortDefinition>,
}

impl Default for NodeMetadata {
    fn default() -> Self {
        Self {
            description: String::new(),
            category: "general".to_string(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }
}

impl NodeMetadata {
    pub fn new(description: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            category: category.into(),
            ..Self::default()
        }
    }

    pub fn input(mut self, name: &str, description: &str, required: bool) -> Self {
        self.inputs.push(PortDefinition::new(name, description, required));
        self
    }

    pub fn output(mut self, name: &str, description: &str) -> Self {
        self.outputs.push(PortDefinition::new(name, description, false));
        self
    }
}

#[derive(Debug, Clone)]
pub struct PortDefinition {
    pub name: String,
    pub description: String,
    pub required: bool,
}

impl PortDefinition {
    pub fn new(name: &str, description: &str, required: bool) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            required,
        }
    }
}

/// Registry of available node types
///
/// Built once at process start and shared read-only by every run.
pub struct NodeRegistry {
    factories: HashMap<String, Arc<dyn NodeFactory>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a node factory under its own type name
    pub fn register(&mut self, factory: Arc<dyn NodeFactory>) {
        let node_type = factory.node_type().to_string();
        self.register_as(node_type, factory);
    }

    /// Register a factory under an additional type name
    pub fn register_as(&mut self, node_type: impl Into<String>, factory: Arc<dyn NodeFactory>) {
        let node_type = node_type.into();
        tracing::debug!("Registering node type: {}", node_type);
        self.factories.insert(node_type, factory);
    }

    /// Create a node instance for `node_id`.
    ///
    /// Unknown types give `Ok(None)`: controls may carry editor-only nodes.
    pub fn create_node(
        &self,
        node_id: &str,
        config: &NodeConfig,
    ) -> Result<Option<Arc<dyn Node>>, FlowError> {
        let Some(factory) = self.factories.get(&config.node_type) else {
            return Ok(None);
        };

        factory
            .create(node_id, config)
            .map(Some)
            .map_err(|source| FlowError::Create {
                node_id: node_id.to_string(),
                node_type: config.node_type.clone(),
                source,
            })
    }

    pub fn contains(&self, node_type: &str) -> bool {
        self.factories.contains_key(node_type)
    }

    /// Get all registered node types, sorted
    pub fn list_node_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.factories.keys().cloned().collect();
        types.sort();
        types
    }

    /// Get metadata for a node type
    pub fn get_metadata(&self, node_type: &str) -> Option<NodeMetadata> {
        self.factories.get(node_type).map(|f| f.metadata())
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}
