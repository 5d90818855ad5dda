use crate::render::render;
use async_trait::async_trait;
use chorecore::{Envelope, Host, Node, NodeConfig, NodeContext, NodeError, Payload, Ports};
use choreruntime::{NodeFactory, NodeMetadata};
use std::sync::{Arc, OnceLock};

/// Renders a stored template against the incoming value
pub struct TemplateNode {
    ports: Ports,
    name: String,
    content: OnceLock<String>,
}

impl TemplateNode {
    pub fn new(node_id: &str, config: &NodeConfig) -> Self {
        Self {
            ports: Ports::new(node_id, config),
            name: config.str_field("template").trim().to_string(),
            content: OnceLock::new(),
        }
    }
}

#[async_trait]
impl Node for TemplateNode {
    fn node_type(&self) -> &str {
        "template"
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
        let content = self
            .content
            .get()
            .ok_or_else(|| NodeError::Execution("template content not fetched".to_string()))?;

        let rendered = render(content, &payload.to_json())?;
        Ok(Envelope::Value(payload.with_data(Some(rendered.into_bytes()))))
    }

    async fn fetch(&self, host: &dyn Host) -> Result<(), NodeError> {
        if self.name.is_empty() {
            return Err(NodeError::Configuration(
                "template fetch failed: template name empty".to_string(),
            ));
        }

        let raw = host.lookup_template(&self.name).await?;
        let _ = self.content.set(String::from_utf8_lossy(&raw).into_owned());

        Ok(())
    }

    fn is_fetched(&self) -> bool {
        self.content.get().is_some()
    }
}

pub struct TemplateNodeFactory;

impl NodeFactory for TemplateNodeFactory {
    fn create(&self, node_id: &str, config: &NodeConfig) -> Result<Arc<dyn Node>, NodeError> {
        Ok(Arc::new(TemplateNode::new(node_id, config)))
    }

    fn node_type(&self) -> &str {
        "template"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::new("Render a stored template with the incoming value", "transform")
            .input("input_1", "Template data", true)
            .output("output_1", "Rendered text")
    }
}
