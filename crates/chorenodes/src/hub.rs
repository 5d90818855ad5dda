use async_trait::async_trait;
use chorecore::{Envelope, Node, NodeConfig, NodeContext, NodeError, Payload, Ports};
use choreruntime::{NodeFactory, NodeMetadata};
use std::sync::Arc;

/// Convergence point: forwards every incoming value untouched
pub struct HubNode {
    ports: Ports,
}

#[async_trait]
impl Node for HubNode {
    fn node_type(&self) -> &str {
        "hub"
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
}

pub struct HubNodeFactory;

impl NodeFactory for HubNodeFactory {
    fn create(&self, node_id: &str, config: &NodeConfig) -> Result<Arc<dyn Node>, NodeError> {
        Ok(Arc::new(HubNode {
            ports: Ports::new(node_id, config),
        }))
    }

    fn node_type(&self) -> &str {
        "hub"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::new("Fan-in and pass-through point, honours tags", "flow")
            .input("input_1", "Any number of upstream connections", false)
            .output("output_1", "Incoming value unchanged")
    }
}
