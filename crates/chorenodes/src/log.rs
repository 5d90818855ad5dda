use async_trait::async_trait;
use chorecore::{Envelope, Node, NodeConfig, NodeContext, NodeError, Payload, Ports};
use choreruntime::{NodeFactory, NodeMetadata};
use std::sync::Arc;

/// Emits one log line and forwards the value untouched
pub struct LogNode {
    ports: Ports,
    level: LogLevel,
    message: String,
    with_data: bool,
}

impl LogNode {
    pub fn new(node_id: &str, config: &NodeConfig) -> Self {
        Self {
            ports: Ports::new(node_id, config),
            level: parse_level(config.str_field("level")),
            message: config.str_field("message").to_string(),
            with_data: config.bool_field("data"),
        }
    }

    pub fn level(&self) -> LogLevel {
        self.level
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

fn parse_level(raw: &str) -> LogLevel {
    match raw.trim().to_lowercase().as_str() {
        "info" => LogLevel::Info,
        "warn" | "warning" => LogLevel::Warn,
        "error" => LogLevel::Error,
        _ => LogLevel::Debug,
    }
}

#[async_trait]
impl Node for LogNode {
    fn node_type(&self) -> &str {
        "log"
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
        let data = self.with_data.then(|| payload.text());
        let message = self.message.as_str();

        match (self.level, data) {
            (LogLevel::Error, Some(data)) => tracing::error!(data = %data, "{}", message),
            (LogLevel::Error, None) => tracing::error!("{}", message),
            (LogLevel::Warn, Some(data)) => tracing::warn!(data = %data, "{}", message),
            (LogLevel::Warn, None) => tracing::warn!("{}", message),
            (LogLevel::Info, Some(data)) => tracing::info!(data = %data, "{}", message),
            (LogLevel::Info, None) => tracing::info!("{}", message),
            (LogLevel::Debug, Some(data)) => tracing::debug!(data = %data, "{}", message),
            (LogLevel::Debug, None) => tracing::debug!("{}", message),
        }

        Ok(Envelope::PassThrough(payload))
    }
}

pub struct LogNodeFactory;

impl NodeFactory for LogNodeFactory {
    fn create(&self, node_id: &str, config: &NodeConfig) -> Result<Arc<dyn Node>, NodeError> {
        Ok(Arc::new(LogNode::new(node_id, config)))
    }

    fn node_type(&self) -> &str {
        "log"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::new("Log a message, optionally with the payload", "utility")
            .input("input_1", "Value to log", true)
            .output("output_1", "Incoming value unchanged")
    }
}
