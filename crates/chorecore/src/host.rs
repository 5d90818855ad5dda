use crate::{Attachment, HostError, Response};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;

/// Outbound HTTP call issued by a Request node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpRequest {
    pub url: String,
    pub method: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

impl From<HttpResponse> for Response {
    fn from(r: HttpResponse) -> Self {
        Response {
            data: r.body,
            status: r.status,
            headers: r.headers,
            is_error: false,
        }
    }
}

/// SMTP settings stored under the `email` namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailSettings {
    pub host: String,
    pub port: u16,
    pub no_auth: bool,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailMessage {
    pub from: String,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub subject: String,
    pub body: Vec<u8>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

/// Storage and transport collaborators the engine depends on.
#[async_trait]
pub trait Host: Send + Sync {
    /// Headers produced by a named auth definition.
    async fn lookup_auth(&self, name: &str) -> Result<BTreeMap<String, String>, HostError>;

    async fn lookup_template(&self, name: &str) -> Result<Vec<u8>, HostError>;

    async fn lookup_settings(&self, namespace: &str) -> Result<JsonValue, HostError>;

    /// Stored graph content of a named control.
    async fn lookup_control(&self, name: &str) -> Result<Vec<u8>, HostError>;

    async fn send_http(&self, request: HttpRequest) -> Result<HttpResponse, HostError>;

    async fn send_email(
        &self,
        settings: &EmailSettings,
        message: EmailMessage,
    ) -> Result<(), HostError>;
}

/// Starts child runs for Control nodes.
///
/// Returns `Ok(None)` when the child run finished without a response.
#[async_trait]
pub trait FlowLauncher: Send + Sync {
    async fn start_nested_flow(
        &self,
        parent: &CancellationToken,
        control: &str,
        endpoint: &str,
        method: Option<&str>,
        content: &[u8],
        payload: Option<Vec<u8>>,
    ) -> Result<Option<Response>, crate::FlowError>;
}
