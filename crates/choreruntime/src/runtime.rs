use crate::executor::FlowExecutor;
use crate::loader::{has_reachable_cycle, load_nodes};
use crate::prefetch::visit_and_fetch;
use crate::registry::NodeRegistry;
use async_trait::async_trait;
use chorecore::{
    parse_graph, FlowError, FlowLauncher, FlowRegistry, Host, Payload, Response, TagSet,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

/// Main runtime for starting control flows
///
/// Cheap to clone; clones share the node registry and host.
#[derive(Clone)]
pub struct FlowRuntime {
    registry: Arc<NodeRegistry>,
    host: Arc<dyn Host>,
    config: RuntimeConfig,
}

impl FlowRuntime {
    /// Create a new runtime with default settings
    pub fn new(registry: Arc<NodeRegistry>, host: Arc<dyn Host>) -> Self {
        Self::with_config(registry, host, RuntimeConfig::default())
    }

    /// Create a new runtime with custom configuration
    pub fn with_config(
        registry: Arc<NodeRegistry>,
        host: Arc<dyn Host>,
        config: RuntimeConfig,
    ) -> Self {
        Self {
            registry,
            host,
            config,
        }
    }

    /// Get access to the node registry
    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Parse, build and prefetch a flow without running it.
    pub async fn prepare(
        &self,
        request: &FlowRequest,
        cancel: CancellationToken,
    ) -> Result<Arc<FlowRegistry>, FlowError> {
        let graph = parse_graph(&request.content)?;

        let tags: TagSet = request.tags.iter().map(|t| t.trim().to_string()).collect();
        let flow = Arc::new(
            FlowRegistry::new(
                request.control.as_str(),
                request.endpoint.as_str(),
                request.method.clone(),
                tags,
                cancel,
            )
            .with_stall_timeout(self.config.stall_timeout()),
        );

        load_nodes(&self.registry, &graph, &flow)?;
        visit_and_fetch(&flow, self.host.as_ref()).await?;

        if self.config.warn_on_cycles && has_reachable_cycle(&flow) {
            tracing::warn!("control graph contains a cycle, relying on stall detection");
        }

        Ok(flow)
    }

    /// Start a run in the background.
    ///
    /// Flow-start failures (parse, endpoint, validate, fetch) are returned
    /// here; failures of individual nodes are only logged and recorded.
    pub async fn start_flow(&self, request: FlowRequest) -> Result<RunHandle, FlowError> {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!(
            "flow",
            control = %request.control.trim(),
            endpoint = %request.endpoint.trim(),
            run_id = %run_id
        );

        let cancel = request.cancel.child_token();
        let flow = self
            .prepare(&request, cancel.clone())
            .instrument(span.clone())
            .await?;

        let response = flow.take_receiver();
        let launcher: Arc<dyn FlowLauncher> = Arc::new(self.clone());
        let executor = span.in_scope(|| {
            tracing::info!("starting control flow");
            FlowExecutor::new(Arc::clone(&flow), Arc::clone(&self.host), launcher)
        });

        let payload = Payload {
            data: request.payload,
            ..Payload::default()
        };
        let done = tokio::spawn(
            executor
                .run(payload, self.config.accepted_fallback)
                .instrument(span),
        );

        Ok(RunHandle {
            run_id,
            flow,
            response,
            done: Some(done),
            cancel,
        })
    }
}

#[async_trait]
impl FlowLauncher for FlowRuntime {
    async fn start_nested_flow(
        &self,
        parent: &CancellationToken,
        control: &str,
        endpoint: &str,
        method: Option<&str>,
        content: &[u8],
        payload: Option<Vec<u8>>,
    ) -> Result<Option<Response>, FlowError> {
        tracing::info!("internal call control=[{}] endpoint=[{}]", control, endpoint);

        let request = FlowRequest {
            control: control.to_string(),
            endpoint: endpoint.to_string(),
            method: method.map(str::to_string),
            tags: Vec::new(),
            content: content.to_vec(),
            payload,
            cancel: parent.clone(),
        };

        let mut handle = self.start_flow(request).await?;
        Ok(handle.response().await)
    }
}

/// Per-invocation inputs of a run
#[derive(Debug, Clone, Default)]
pub struct FlowRequest {
    pub control: String,
    pub endpoint: String,
    pub method: Option<String>,
    /// Tags enabled for this run in addition to the entry node tags
    pub tags: Vec<String>,
    /// Stored graph content of the control
    pub content: Vec<u8>,
    pub payload: Option<Vec<u8>>,
    /// Caller cancellation; timeouts are implemented by cancelling it
    pub cancel: CancellationToken,
}

impl FlowRequest {
    pub fn new(
        control: impl Into<String>,
        endpoint: impl Into<String>,
        content: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            control: control.into(),
            endpoint: endpoint.into(),
            content: content.into(),
            ..Self::default()
        }
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Handle of a started run
pub struct RunHandle {
    run_id: Uuid,
    flow: Arc<FlowRegistry>,
    response: Option<mpsc::Receiver<Response>>,
    done: Option<JoinHandle<()>>,
    cancel: CancellationToken,
}

impl RunHandle {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// False when no reachable node can respond synchronously.
    pub fn has_response_channel(&self) -> bool {
        self.response.is_some()
    }

    /// Take the response channel; `None` if there is none or it was taken.
    pub fn take_response_channel(&mut self) -> Option<mpsc::Receiver<Response>> {
        self.response.take()
    }

    /// Wait for the run's response, `None` when the channel closes empty.
    pub async fn response(&mut self) -> Option<Response> {
        match self.response.as_mut() {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }

    /// Cancel every branch of this run.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Errors recorded by branches so far.
    pub fn errors(&self) -> Vec<String> {
        self.flow.errors()
    }

    /// Wait until every branch has returned; gives the recorded errors.
    pub async fn wait(mut self) -> Vec<String> {
        if let Some(done) = self.done.take() {
            if let Err(e) = done.await {
                tracing::error!("flow task failed: {}", e);
            }
        }
        self.flow.errors()
    }
}

/// Configuration for the runtime
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Upper bound for a branch parked in a gate, in milliseconds
    pub stall_timeout_ms: Option<u64>,
    /// Answer unclaimed responses with 202 "Accepted" or the joined errors
    pub accepted_fallback: bool,
    pub warn_on_cycles: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            stall_timeout_ms: None,
            accepted_fallback: false,
            warn_on_cycles: true,
        }
    }
}

impl RuntimeConfig {
    pub fn stall_timeout(&self) -> Option<Duration> {
        self.stall_timeout_ms.map(Duration::from_millis)
    }

    /// Load a JSON configuration file; missing fields take their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;

        Ok(serde_json::from_slice(&raw)?)
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}
