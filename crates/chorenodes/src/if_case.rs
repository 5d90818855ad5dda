use crate::js;
use async_trait::async_trait;
use chorecore::{Envelope, Node, NodeConfig, NodeContext, NodeError, Payload, Ports};
use choreruntime::{NodeFactory, NodeMetadata};
use std::sync::Arc;

const FALSE_OUTPUT: usize = 0;
const TRUE_OUTPUT: usize = 1;

/// Two-way branch on a script expression; output 0 is false, 1 is true.
///
/// The value goes on without the upstream side value.
pub struct IfCaseNode {
    ports: Ports,
    expression: String,
}

impl IfCaseNode {
    pub fn new(node_id: &str, config: &NodeConfig) -> Self {
        Self {
            ports: Ports::new(node_id, config),
            expression: config.str_field("if").to_string(),
        }
    }
}

#[async_trait]
impl Node for IfCaseNode {
    fn node_type(&self) -> &str {
        "ifCase"
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
        let selected = match js::evaluate_bool(&self.expression, &payload.to_json()).await {
            Ok(true) => TRUE_OUTPUT,
            Ok(false) => FALSE_OUTPUT,
            Err(e) => {
                tracing::error!(error = %e, "cannot evaluate condition, passing as false");
                FALSE_OUTPUT
            }
        };

        Ok(Envelope::Select {
            payload: payload.with_data(payload.data.clone()),
            outputs: vec![selected],
        })
    }
}

pub struct IfCaseNodeFactory;

impl NodeFactory for IfCaseNodeFactory {
    fn create(&self, node_id: &str, config: &NodeConfig) -> Result<Arc<dyn Node>, NodeError> {
        Ok(Arc::new(IfCaseNode::new(node_id, config)))
    }

    fn node_type(&self) -> &str {
        "ifCase"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::new("Route by a boolean expression over `data`", "flow")
            .input("input_1", "Value bound to `data`", true)
            .output("output_1", "False branch")
            .output("output_2", "True branch")
    }
}
