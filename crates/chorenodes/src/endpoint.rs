use async_trait::async_trait;
use chorecore::{
    Envelope, FlowRegistry, Node, NodeConfig, NodeContext, NodeError, Payload, Ports, Trigger,
};
use choreruntime::{NodeFactory, NodeMetadata};
use std::sync::Arc;

/// Entry node: its `endpoint` name is the trigger key of a run
pub struct EndpointNode {
    ports: Ports,
    endpoint: String,
    methods: Vec<String>,
    tags: Vec<String>,
}

impl EndpointNode {
    pub fn new(node_id: &str, config: &NodeConfig) -> Self {
        Self {
            ports: Ports::new(node_id, config),
            endpoint: config.str_field("endpoint").trim().to_string(),
            methods: config.list_field("methods"),
            tags: config.list_field("tags"),
        }
    }
}

#[async_trait]
impl Node for EndpointNode {
    fn node_type(&self) -> &str {
        "endpoint"
    }

    fn ports(&self) -> &Ports {
        &self.ports
    }

    async fn run(
        &self,
        _ctx: &NodeContext,
        payload: Payload,
        _input: &str,
    ) -> Result<Envelope, NodeError> {
        Ok(Envelope::PassThrough(payload))
    }

    fn trigger(&self) -> Option<Trigger> {
        Some(Trigger {
            endpoint: self.endpoint.clone(),
            methods: self.methods.clone(),
            tags: self.tags.clone(),
        })
    }

    // Entry tags define the active set, they never disable the entry.
    fn active_input(&self, _source: &str, _flow: &FlowRegistry) {}
}

pub struct EndpointNodeFactory;

impl NodeFactory for EndpointNodeFactory {
    fn create(&self, node_id: &str, config: &NodeConfig) -> Result<Arc<dyn Node>, NodeError> {
        Ok(Arc::new(EndpointNode::new(node_id, config)))
    }

    fn node_type(&self) -> &str {
        "endpoint"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::new("Entry point matched by endpoint name and method", "flow")
            .output("output_1", "Initial payload")
    }
}
