use crate::js;
use async_trait::async_trait;
use chorecore::{Envelope, Node, NodeConfig, NodeContext, NodeError, Payload, Ports};
use choreruntime::{NodeFactory, NodeMetadata};
use serde_json::Value as JsonValue;
use std::sync::Arc;

/// Fans out one branch per element of a list expression
pub struct ForLoopNode {
    ports: Ports,
    expression: String,
}

impl ForLoopNode {
    pub fn new(node_id: &str, config: &NodeConfig) -> Self {
        Self {
            ports: Ports::new(node_id, config),
            expression: config.str_field("for").to_string(),
        }
    }
}

#[async_trait]
impl Node for ForLoopNode {
    fn node_type(&self) -> &str {
        "forLoop"
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
        let value = js::evaluate(&self.expression, &payload.to_json())
            .await
            .map_err(|e| NodeError::Script(format!("cannot run loop value: {}", e)))?;

        let items = match value {
            JsonValue::Array(items) if !items.is_empty() => items,
            _ => {
                tracing::debug!("loop produced no elements");
                return Ok(Envelope::Stop);
            }
        };

        Ok(Envelope::Many(
            items.iter().map(Payload::from_json).collect(),
        ))
    }
}

/// Registered under both `forLoop` and the editor's `for`
pub struct ForLoopNodeFactory {
    type_name: &'static str,
}

impl ForLoopNodeFactory {
    pub fn new(type_name: &'static str) -> Self {
        Self { type_name }
    }
}

impl NodeFactory for ForLoopNodeFactory {
    fn create(&self, node_id: &str, config: &NodeConfig) -> Result<Arc<dyn Node>, NodeError> {
        Ok(Arc::new(ForLoopNode::new(node_id, config)))
    }

    fn node_type(&self) -> &str {
        self.type_name
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::new("Run the following nodes once per list element", "flow")
            .input("input_1", "Value bound to `data`", true)
            .output("output_1", "One branch per element")
    }
}
