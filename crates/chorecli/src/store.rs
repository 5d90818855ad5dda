use async_trait::async_trait;
use chorecore::{EmailMessage, EmailSettings, Host, HostError, HttpRequest, HttpResponse};
use chorenodes::HttpTransport;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Host backed by a directory tree:
///
/// ```text
/// controls/<name>.json   templates/<name>.tmpl
/// auths/<name>.json      settings/<namespace>.json
/// outbox/                (written) one .eml file per sent email
/// ```
pub struct DirStore {
    root: PathBuf,
    transport: HttpTransport,
}

impl DirStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            transport: HttpTransport::new(),
        }
    }

    pub fn with_transport(mut self, transport: HttpTransport) -> Self {
        self.transport = transport;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry(
        &self,
        kind: &'static str,
        dir: &str,
        name: &str,
        ext: &str,
    ) -> Result<PathBuf, HostError> {
        let name = name.trim();
        if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
            return Err(HostError::Invalid(format!("bad {} name: {:?}", kind, name)));
        }

        Ok(self.root.join(dir).join(format!("{}.{}", name, ext)))
    }

    async fn read(
        &self,
        kind: &'static str,
        dir: &str,
        name: &str,
        ext: &str,
    ) -> Result<Vec<u8>, HostError> {
        let path = self.entry(kind, dir, name, ext)?;
        tracing::debug!("reading {} from {}", kind, path.display());

        tokio::fs::read(&path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => HostError::NotFound {
                kind,
                name: name.trim().to_string(),
            },
            _ => HostError::Invalid(format!("cannot read {}: {}", path.display(), e)),
        })
    }

    async fn read_json(
        &self,
        kind: &'static str,
        dir: &str,
        name: &str,
    ) -> Result<JsonValue, HostError> {
        let raw = self.read(kind, dir, name, "json").await?;
        serde_json::from_slice(&raw)
            .map_err(|e| HostError::Invalid(format!("{} {}: {}", kind, name, e)))
    }
}

#[async_trait]
impl Host for DirStore {
    async fn lookup_auth(&self, name: &str) -> Result<BTreeMap<String, String>, HostError> {
        let JsonValue::Object(fields) = self.read_json("auth", "auths", name).await? else {
            return Err(HostError::Invalid(format!("auth {} is not an object", name)));
        };

        Ok(fields
            .into_iter()
            .map(|(k, v)| match v {
                JsonValue::String(s) => (k, s),
                other => (k, other.to_string()),
            })
            .collect())
    }

    async fn lookup_template(&self, name: &str) -> Result<Vec<u8>, HostError> {
        self.read("template", "templates", name, "tmpl").await
    }

    async fn lookup_settings(&self, namespace: &str) -> Result<JsonValue, HostError> {
        self.read_json("settings", "settings", namespace).await
    }

    async fn lookup_control(&self, name: &str) -> Result<Vec<u8>, HostError> {
        self.read("control", "controls", name, "json").await
    }

    async fn send_http(&self, request: HttpRequest) -> Result<HttpResponse, HostError> {
        self.transport.send(request).await
    }

    /// Queue the message as an `.eml` file under `outbox/`.
    ///
    /// No SMTP delivery happens here; `settings` only shows up in the log
    /// line so a relay picking up the outbox knows where it was headed.
    async fn send_email(
        &self,
        settings: &EmailSettings,
        message: EmailMessage,
    ) -> Result<(), HostError> {
        let outbox = self.root.join("outbox");
        tokio::fs::create_dir_all(&outbox)
            .await
            .map_err(|e| HostError::Transport(format!("cannot create outbox: {}", e)))?;

        let path = outbox.join(format!("{}.eml", uuid::Uuid::new_v4()));
        tokio::fs::write(&path, render_email(&message))
            .await
            .map_err(|e| HostError::Transport(format!("cannot write {}: {}", path.display(), e)))?;

        tracing::info!(
            "email for {} queued in {} (smtp {}:{})",
            message.to.join(", "),
            path.display(),
            settings.host,
            settings.port
        );
        Ok(())
    }
}

fn render_email(message: &EmailMessage) -> Vec<u8> {
    let mut out = format!("From: {}\r\n", message.from);
    for (header, list) in [("To", &message.to), ("Cc", &message.cc), ("Bcc", &message.bcc)] {
        if !list.is_empty() {
            out.push_str(&format!("{}: {}\r\n", header, list.join(", ")));
        }
    }
    out.push_str(&format!("Subject: {}\r\n", message.subject));

    if message.attachments.is_empty() {
        out.push_str("\r\n");
        let mut bytes = out.into_bytes();
        bytes.extend_from_slice(&message.body);
        return bytes;
    }

    let boundary = format!("chore-{}", uuid::Uuid::new_v4().simple());
    out.push_str("MIME-Version: 1.0\r\n");
    out.push_str(&format!(
        "Content-Type: multipart/mixed; boundary=\"{}\"\r\n\r\n",
        boundary
    ));
    out.push_str(&format!(
        "--{}\r\nContent-Type: text/plain; charset=utf-8\r\n\r\n",
        boundary
    ));

    let mut bytes = out.into_bytes();
    bytes.extend_from_slice(&message.body);
    for attachment in &message.attachments {
        let part = format!(
            "\r\n--{}\r\nContent-Type: application/octet-stream\r\n\
             Content-Disposition: attachment; filename=\"{}\"\r\n\
             Content-Transfer-Encoding: 8bit\r\n\r\n",
            boundary, attachment.name
        );
        bytes.extend_from_slice(part.as_bytes());
        bytes.extend_from_slice(&attachment.content);
    }
    bytes.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());
    bytes
}
