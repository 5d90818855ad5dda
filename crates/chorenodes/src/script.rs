use crate::js;
use async_trait::async_trait;
use chorecore::{
    data_to_bytes, Attachment, Envelope, Node, NodeConfig, NodeContext, NodeError, Payload, Ports,
};
use choreruntime::{NodeFactory, NodeMetadata};
use serde_json::{Map, Value as JsonValue};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

const ERROR_OUTPUT: usize = 0;
const SUCCESS_OUTPUT: usize = 1;
const RAW_OUTPUT: usize = 2;

#[derive(Default)]
struct Inputs {
    values: HashMap<String, JsonValue>,
    requests: Map<String, JsonValue>,
}

/// Runs a script's `main` with one argument per input, ordered by input name.
///
/// With more than one active input the node waits until every active input
/// has delivered; later values on the same input replace earlier ones.
pub struct ScriptNode {
    ports: Ports,
    script: String,
    inputs: Mutex<Inputs>,
}

impl ScriptNode {
    pub fn new(node_id: &str, config: &NodeConfig) -> Self {
        Self {
            ports: Ports::new(node_id, config),
            script: config.str_field("script").to_string(),
            inputs: Mutex::new(Inputs::default()),
        }
    }

    /// Store the value; returns the arguments once the node is ready to run.
    fn collect(&self, input: &str, payload: &Payload) -> Option<(Vec<JsonValue>, JsonValue)> {
        let active = self.ports.active_input_names();
        let mut inputs = self.inputs.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(response) = payload.response.as_ref() {
            inputs.requests.insert(input.to_string(), response.to_json());
        }
        inputs.values.insert(input.to_string(), payload.to_json());

        if active.len() > 1 && !active.iter().all(|name| inputs.values.contains_key(name)) {
            return None;
        }

        let args = self
            .ports
            .input_names()
            .iter()
            .map(|name| inputs.values.get(name).cloned().unwrap_or(JsonValue::Null))
            .collect();

        Some((args, JsonValue::Object(inputs.requests.clone())))
    }
}

#[async_trait]
impl Node for ScriptNode {
    fn node_type(&self) -> &str {
        "script"
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
        let Some((args, requests)) = self.collect(input, &payload) else {
            return Ok(Envelope::Stop);
        };

        let cancel = ctx.cancellation().clone();
        let outcome = js::run_main(self.script.clone(), args, requests, cancel).await;
        let (selection, outcome) = match outcome {
            Ok(outcome) if outcome.ok => (SUCCESS_OUTPUT, outcome),
            Ok(outcome) => (ERROR_OUTPUT, outcome),
            Err(e) => (
                ERROR_OUTPUT,
                js::ScriptOutcome {
                    ok: false,
                    value: JsonValue::String(e.to_string()),
                    side: JsonValue::Null,
                    attachments: Vec::new(),
                },
            ),
        };

        let attachments = outcome
            .attachments
            .into_iter()
            .map(|(name, content)| Attachment::new(name, content))
            .collect();

        Ok(Envelope::Select {
            payload: Payload {
                data: data_to_bytes(&outcome.value),
                values: data_to_bytes(&outcome.side),
                response: None,
                attachments,
            },
            outputs: vec![selection, RAW_OUTPUT],
        })
    }
}

pub struct ScriptNodeFactory;

impl NodeFactory for ScriptNodeFactory {
    fn create(&self, node_id: &str, config: &NodeConfig) -> Result<Arc<dyn Node>, NodeError> {
        Ok(Arc::new(ScriptNode::new(node_id, config)))
    }

    fn node_type(&self) -> &str {
        "script"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::new("Run `function main(...)` with one argument per input", "transform")
            .input("input_N", "Arguments, ordered by input name", false)
            .output("output_1", "Error")
            .output("output_2", "Success")
            .output("output_3", "Raw result, always")
    }
}
