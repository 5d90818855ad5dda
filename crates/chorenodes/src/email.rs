use crate::gate::{gated_data, SignalGate};
use crate::render::render;
use crate::request::VALUE_INPUT;
use async_trait::async_trait;
use chorecore::{
    split_list, EmailMessage, EmailSettings, Envelope, FlowRegistry, Host, HostError, Node,
    NodeConfig, NodeContext, NodeError, Payload, Ports,
};
use choreruntime::{NodeFactory, NodeMetadata};
use serde_json::Value as JsonValue;
use std::sync::{Arc, OnceLock};

const SETTINGS_NAMESPACE: &str = "email";

/// Sends the payload as a mail body; terminal in the graph
pub struct EmailNode {
    ports: Ports,
    from: String,
    to: String,
    cc: String,
    bcc: String,
    subject: String,
    settings: OnceLock<EmailSettings>,
    gate: SignalGate,
}

impl EmailNode {
    pub fn new(node_id: &str, config: &NodeConfig) -> Self {
        Self {
            ports: Ports::new(node_id, config),
            from: config.str_field("from").to_string(),
            to: config.str_field("to").to_string(),
            cc: config.str_field("cc").to_string(),
            bcc: config.str_field("bcc").to_string(),
            subject: config.str_field("subject").to_string(),
            settings: OnceLock::new(),
            gate: SignalGate::new(),
        }
    }

    fn message(
        &self,
        settings: &EmailSettings,
        data: &JsonValue,
        payload: Payload,
    ) -> Result<EmailMessage, NodeError> {
        let mut from = render(&self.from, data)?.trim().to_string();
        if from.is_empty() {
            from = settings.email.clone();
        }

        Ok(EmailMessage {
            from,
            to: split_list(&render(&self.to, data)?),
            cc: split_list(&render(&self.cc, data)?),
            bcc: split_list(&render(&self.bcc, data)?),
            subject: render(&self.subject, data)?,
            body: payload.data.unwrap_or_default(),
            attachments: payload.attachments,
        })
    }
}

#[async_trait]
impl Node for EmailNode {
    fn node_type(&self) -> &str {
        "email"
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

        let settings = self
            .settings
            .get()
            .ok_or_else(|| NodeError::Execution("email settings not fetched".to_string()))?;

        let Some(data) = gated_data(&self.gate, ctx, &payload).await? else {
            return Ok(Envelope::Stop);
        };

        let message = self.message(settings, &data, payload)?;
        if message.to.is_empty() {
            return Err(NodeError::Configuration("no recipients".to_string()));
        }

        let attachments = message.attachments.len();
        ctx.host.send_email(settings, message).await?;
        tracing::info!(attachments, "email sent");

        Ok(Envelope::Stop)
    }

    async fn fetch(&self, host: &dyn Host) -> Result<(), NodeError> {
        let raw = host.lookup_settings(SETTINGS_NAMESPACE).await?;
        let settings: EmailSettings = serde_json::from_value(raw)
            .map_err(|e| HostError::Invalid(format!("email settings: {}", e)))?;

        let _ = self.settings.set(settings);
        Ok(())
    }

    fn is_fetched(&self) -> bool {
        self.settings.get().is_some()
    }

    fn active_input(&self, source: &str, flow: &FlowRegistry) {
        let activated = self.ports.activate(source, flow.active_tags());
        if activated.iter().any(|name| name == VALUE_INPUT) {
            self.gate.arm(flow);
        }
    }

    fn next_count(&self) -> usize {
        0
    }
}

pub struct EmailNodeFactory;

impl NodeFactory for EmailNodeFactory {
    fn create(&self, node_id: &str, config: &NodeConfig) -> Result<Arc<dyn Node>, NodeError> {
        Ok(Arc::new(EmailNode::new(node_id, config)))
    }

    fn node_type(&self) -> &str {
        "email"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::new("Send the payload as an email body", "network")
            .input("input_1", "Header values, first delivery only", false)
            .input("input_2", "Mail body; triggers the send", true)
    }
}
