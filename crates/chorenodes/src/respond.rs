use crate::render::{headers_source, parse_headers};
use async_trait::async_trait;
use chorecore::{Envelope, Node, NodeConfig, NodeContext, NodeError, Payload, Ports, Response};
use choreruntime::{NodeFactory, NodeMetadata};
use std::sync::Arc;

/// Terminal node producing the run's response
pub struct RespondNode {
    ports: Ports,
    status_raw: String,
    headers_raw: String,
    forward_upstream: bool,
}

impl RespondNode {
    pub fn new(node_id: &str, config: &NodeConfig) -> Self {
        Self {
            ports: Ports::new(node_id, config),
            status_raw: config.text_field("status"),
            headers_raw: headers_source(config.data.get("headers")),
            forward_upstream: config.bool_field("get"),
        }
    }

    fn status(&self) -> u16 {
        if self.status_raw.is_empty() {
            return 200;
        }

        match self.status_raw.parse::<u16>() {
            Ok(status) => status,
            Err(_) => {
                tracing::warn!(
                    "status code {} cannot convert to integer, passing with 200",
                    self.status_raw
                );
                200
            }
        }
    }
}

#[async_trait]
impl Node for RespondNode {
    fn node_type(&self) -> &str {
        "respond"
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
        let headers = parse_headers(&self.headers_raw)?;

        if self.forward_upstream {
            if let Some(mut upstream) = payload.response {
                upstream.headers.extend(headers);
                return Ok(Envelope::Respond(upstream));
            }
        }

        let mut response = Response::new(self.status(), payload.data.unwrap_or_default());
        response.headers = headers;

        Ok(Envelope::Respond(response))
    }

    fn is_respond(&self) -> bool {
        true
    }
}

pub struct RespondNodeFactory;

impl NodeFactory for RespondNodeFactory {
    fn create(&self, node_id: &str, config: &NodeConfig) -> Result<Arc<dyn Node>, NodeError> {
        Ok(Arc::new(RespondNode::new(node_id, config)))
    }

    fn node_type(&self) -> &str {
        "respond"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::new("Answer the run synchronously; first response wins", "flow")
            .input("input_1", "Response body", true)
    }
}
