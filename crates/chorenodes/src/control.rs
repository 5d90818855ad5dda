use async_trait::async_trait;
use chorecore::{Envelope, Host, Node, NodeConfig, NodeContext, NodeError, Payload, Ports};
use choreruntime::{NodeFactory, NodeMetadata};
use std::sync::{Arc, OnceLock};

/// Calls another stored control as a sub-flow and forwards its response
pub struct ControlNode {
    ports: Ports,
    control: String,
    endpoint: String,
    method: String,
    content: OnceLock<Vec<u8>>,
}

impl ControlNode {
    pub fn new(node_id: &str, config: &NodeConfig) -> Self {
        Self {
            ports: Ports::new(node_id, config),
            control: config.str_field("control").trim().to_string(),
            endpoint: config.str_field("endpoint").trim().to_string(),
            method: config.str_field("method").trim().to_string(),
            content: OnceLock::new(),
        }
    }
}

#[async_trait]
impl Node for ControlNode {
    fn node_type(&self) -> &str {
        "control"
    }

    fn ports(&self) -> &Ports {
        &self.ports
    }

    async fn run(
        &self,
        ctx: &NodeContext,
        payload: Payload,
        _input: &str,
    ) -> Result<Envelope, NodeError> {
        let content = self
            .content
            .get()
            .ok_or_else(|| NodeError::Execution("control content not fetched".to_string()))?;

        let method = (!self.method.is_empty()).then_some(self.method.as_str());
        let response = ctx
            .launcher
            .start_nested_flow(
                ctx.cancellation(),
                &self.control,
                &self.endpoint,
                method,
                content,
                payload.data.clone(),
            )
            .await
            .map_err(|e| NodeError::Nested(e.to_string()))?;

        match response {
            Some(response) => Ok(Envelope::Value(Payload {
                data: Some(response.data.clone()),
                response: Some(response),
                ..Payload::default()
            })),
            None => {
                tracing::debug!(control = %self.control, "nested flow gave no response");
                Ok(Envelope::PassThrough(payload))
            }
        }
    }

    fn validate(&self) -> Result<(), NodeError> {
        if self.control.is_empty() {
            return Err(NodeError::Configuration("control name is empty".to_string()));
        }
        if self.endpoint.is_empty() {
            return Err(NodeError::Configuration("endpoint is empty".to_string()));
        }
        Ok(())
    }

    async fn fetch(&self, host: &dyn Host) -> Result<(), NodeError> {
        let content = host.lookup_control(&self.control).await?;
        let _ = self.content.set(content);
        Ok(())
    }

    fn is_fetched(&self) -> bool {
        self.content.get().is_some()
    }
}

pub struct ControlNodeFactory;

impl NodeFactory for ControlNodeFactory {
    fn create(&self, node_id: &str, config: &NodeConfig) -> Result<Arc<dyn Node>, NodeError> {
        Ok(Arc::new(ControlNode::new(node_id, config)))
    }

    fn node_type(&self) -> &str {
        "control"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::new("Run another control at an endpoint and await its response", "flow")
            .input("input_1", "Initial payload of the nested run", true)
            .output("output_1", "Nested response, or the input when there is none")
    }
}
