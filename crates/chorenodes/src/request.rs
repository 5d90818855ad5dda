use crate::gate::{gated_data, SignalGate};
use crate::render::{headers_source, parse_headers, render};
use async_trait::async_trait;
use chorecore::{
    Envelope, FlowRegistry, Host, HttpRequest, Node, NodeConfig, NodeContext, NodeError, Payload,
    Ports, Response,
};
use choreruntime::{NodeFactory, NodeMetadata};
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

pub(crate) const VALUE_INPUT: &str = "input_1";

const FAILURE_OUTPUT: usize = 0;
const SUCCESS_OUTPUT: usize = 1;
const ALWAYS_OUTPUT: usize = 2;

/// Outbound HTTP call.
///
/// `url`, `method` and `headers` are templates rendered against the side
/// value of the incoming payload, or against the value delivered on
/// `input_1` when that input is wired.
pub struct RequestNode {
    ports: Ports,
    url: String,
    method: String,
    headers_raw: String,
    auth: String,
    payload_nil: bool,
    auth_headers: OnceLock<BTreeMap<String, String>>,
    gate: SignalGate,
}

impl RequestNode {
    pub fn new(node_id: &str, config: &NodeConfig) -> Self {
        let method = config.str_field("method").trim();

        Self {
            ports: Ports::new(node_id, config),
            url: config.str_field("url").trim().to_string(),
            method: if method.is_empty() { "POST" } else { method }.to_string(),
            headers_raw: headers_source(config.data.get("headers")),
            auth: config.str_field("auth").trim().to_string(),
            payload_nil: config.bool_field("payload_nil"),
            auth_headers: OnceLock::new(),
            gate: SignalGate::new(),
        }
    }

    fn build(&self, data: &serde_json::Value, payload: &Payload) -> Result<HttpRequest, NodeError> {
        let url = render(&self.url, data)?;
        let method = render(&self.method, data)?;
        let declared = parse_headers(&render(&self.headers_raw, data)?)?;

        let mut headers = self.auth_headers.get().cloned().unwrap_or_default();
        headers.extend(declared);

        Ok(HttpRequest {
            url,
            method,
            headers,
            body: if self.payload_nil {
                None
            } else {
                payload.data.clone()
            },
        })
    }
}

#[async_trait]
impl Node for RequestNode {
    fn node_type(&self) -> &str {
        "request"
    }

    fn ports(&self) -> &Ports {
        &self.ports
    }

    async fn run(
        &self,
        ctx: &NodeContext,
        payload: Payload,
        input: &str,
    ) -> Result<Envelope, NodeError> {
        if input == VALUE_INPUT {
            self.gate.signal(Some(payload)).await;
            return Ok(Envelope::Stop);
        }

        let Some(data) = gated_data(&self.gate, ctx, &payload).await? else {
            return Ok(Envelope::Stop);
        };

        let request = self.build(&data, &payload)?;
        tracing::debug!(url = %request.url, method = %request.method, "sending request");

        let response: Response = ctx.host.send_http(request).await?.into();
        let selected = if (100..400).contains(&response.status) {
            SUCCESS_OUTPUT
        } else {
            FAILURE_OUTPUT
        };

        Ok(Envelope::Select {
            payload: Payload {
                data: Some(response.data.clone()),
                response: Some(response),
                ..Payload::default()
            },
            outputs: vec![selected, ALWAYS_OUTPUT],
        })
    }

    fn validate(&self) -> Result<(), NodeError> {
        if self.url.is_empty() {
            return Err(NodeError::Configuration("url is empty".to_string()));
        }
        Ok(())
    }

    async fn fetch(&self, host: &dyn Host) -> Result<(), NodeError> {
        if self.auth.is_empty() {
            return Ok(());
        }

        let headers = host.lookup_auth(&self.auth).await?;
        let _ = self.auth_headers.set(headers);
        Ok(())
    }

    fn is_fetched(&self) -> bool {
        self.auth.is_empty() || self.auth_headers.get().is_some()
    }

    fn active_input(&self, source: &str, flow: &FlowRegistry) {
        let activated = self.ports.activate(source, flow.active_tags());
        if activated.iter().any(|name| name == VALUE_INPUT) {
            self.gate.arm(flow);
        }
    }
}

pub struct RequestNodeFactory;

impl NodeFactory for RequestNodeFactory {
    fn create(&self, node_id: &str, config: &NodeConfig) -> Result<Arc<dyn Node>, NodeError> {
        Ok(Arc::new(RequestNode::new(node_id, config)))
    }

    fn node_type(&self) -> &str {
        "request"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::new("Send an HTTP request with stored auth headers", "network")
            .input("input_1", "Template values, first delivery only", false)
            .input("input_2", "Request body; triggers the call", true)
            .output("output_1", "Failure (status >= 400)")
            .output("output_2", "Success")
            .output("output_3", "Always")
    }
}
