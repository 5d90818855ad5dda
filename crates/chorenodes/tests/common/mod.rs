#![allow(dead_code)]

use async_trait::async_trait;
use chorecore::{
    EmailMessage, EmailSettings, FlowError, FlowLauncher, FlowRegistry, Host, HostError,
    HttpRequest, HttpResponse, NodeContext, Response, TagSet,
};
use choreruntime::{FlowRequest, FlowRuntime};
use serde_json::{json, Value as JsonValue};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// In-memory host recording every outbound call.
#[derive(Default)]
pub struct MockHost {
    pub templates: HashMap<String, String>,
    pub auths: HashMap<String, BTreeMap<String, String>>,
    pub controls: HashMap<String, Vec<u8>>,
    pub settings: HashMap<String, JsonValue>,
    pub http_status: Option<u16>,
    pub http_fails: bool,
    pub lookups: AtomicUsize,
    pub http_sent: Mutex<Vec<HttpRequest>>,
    pub email_sent: Mutex<Vec<EmailMessage>>,
}

impl MockHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_template(mut self, name: &str, content: &str) -> Self {
        self.templates.insert(name.to_string(), content.to_string());
        self
    }

    pub fn with_auth(mut self, name: &str, key: &str, value: &str) -> Self {
        self.auths
            .entry(name.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_control(mut self, name: &str, graph: JsonValue) -> Self {
        self.controls.insert(name.to_string(), graph.to_string().into_bytes());
        self
    }

    pub fn with_email_settings(mut self) -> Self {
        self.settings.insert(
            "email".to_string(),
            json!({"host": "smtp.local", "port": 25, "no_auth": true, "email": "bot@local"}),
        );
        self
    }

    pub fn with_http_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }

    pub fn lookup_count(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    pub fn http_requests(&self) -> Vec<HttpRequest> {
        self.http_sent.lock().unwrap().clone()
    }

    pub fn emails(&self) -> Vec<EmailMessage> {
        self.email_sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Host for MockHost {
    async fn lookup_auth(&self, name: &str) -> Result<BTreeMap<String, String>, HostError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.auths.get(name).cloned().ok_or(HostError::NotFound {
            kind: "auth",
            name: name.to_string(),
        })
    }

    async fn lookup_template(&self, name: &str) -> Result<Vec<u8>, HostError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.templates
            .get(name)
            .map(|t| t.clone().into_bytes())
            .ok_or(HostError::NotFound {
                kind: "template",
                name: name.to_string(),
            })
    }

    async fn lookup_settings(&self, namespace: &str) -> Result<JsonValue, HostError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.settings.get(namespace).cloned().ok_or(HostError::NotFound {
            kind: "settings",
            name: namespace.to_string(),
        })
    }

    async fn lookup_control(&self, name: &str) -> Result<Vec<u8>, HostError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.controls.get(name).cloned().ok_or(HostError::NotFound {
            kind: "control",
            name: name.to_string(),
        })
    }

    async fn send_http(&self, request: HttpRequest) -> Result<HttpResponse, HostError> {
        if self.http_fails {
            return Err(HostError::Transport("connection refused".to_string()));
        }

        let body = request.body.clone().unwrap_or_default();
        self.http_sent.lock().unwrap().push(request);

        Ok(HttpResponse {
            status: self.http_status.unwrap_or(200),
            headers: BTreeMap::from([("content-type".to_string(), "text/plain".to_string())]),
            body,
        })
    }

    async fn send_email(
        &self,
        _settings: &EmailSettings,
        message: EmailMessage,
    ) -> Result<(), HostError> {
        self.email_sent.lock().unwrap().push(message);
        Ok(())
    }
}

/// Launcher for node tests that never start nested runs.
pub struct NoLauncher;

#[async_trait]
impl FlowLauncher for NoLauncher {
    async fn start_nested_flow(
        &self,
        _parent: &CancellationToken,
        control: &str,
        _endpoint: &str,
        _method: Option<&str>,
        _content: &[u8],
        _payload: Option<Vec<u8>>,
    ) -> Result<Option<Response>, FlowError> {
        Err(FlowError::EndpointNotFound(control.to_string()))
    }
}

pub fn flow() -> Arc<FlowRegistry> {
    flow_with(CancellationToken::new(), None)
}

/// Flow bound to `cancel`, with an optional bound on how long a branch may park.
pub fn flow_with(cancel: CancellationToken, stall_timeout: Option<Duration>) -> Arc<FlowRegistry> {
    Arc::new(
        FlowRegistry::new("test", "e1", None, TagSet::new(), cancel)
            .with_stall_timeout(stall_timeout),
    )
}

pub fn context(node_id: &str, flow: &Arc<FlowRegistry>, host: Arc<MockHost>) -> NodeContext {
    NodeContext::new(node_id, Arc::clone(flow), host, Arc::new(NoLauncher))
}

pub fn runtime(host: MockHost) -> (FlowRuntime, Arc<MockHost>) {
    let host = Arc::new(host);
    let registry = Arc::new(chorenodes::standard_registry());
    (FlowRuntime::new(registry, host.clone()), host)
}

pub fn request(graph: &JsonValue) -> FlowRequest {
    FlowRequest::new("test", "e1", graph.to_string())
}

/// Drawflow-style node entry with `output_count` declared outputs.
pub fn node(
    name: &str,
    data: JsonValue,
    inputs: &[(&str, &str, &str)],
    output_count: usize,
    outputs: &[(&str, &str, &str)],
) -> JsonValue {
    let mut ins = serde_json::Map::new();
    for (port, node, output) in inputs {
        let entry = ins
            .entry(port.to_string())
            .or_insert_with(|| json!({"connections": []}));
        entry["connections"]
            .as_array_mut()
            .unwrap()
            .push(json!({"node": node, "output": output}));
    }

    let mut outs = serde_json::Map::new();
    for i in 1..=output_count {
        outs.insert(format!("output_{}", i), json!({"connections": []}));
    }
    for (port, node, input) in outputs {
        let entry = outs
            .entry(port.to_string())
            .or_insert_with(|| json!({"connections": []}));
        entry["connections"]
            .as_array_mut()
            .unwrap()
            .push(json!({"node": node, "output": input}));
    }

    json!({"name": name, "data": data, "inputs": ins, "outputs": outs})
}
