use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

/// Terminal payload of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub data: Vec<u8>,
    pub status: u16,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub is_error: bool,
}

impl Response {
    pub fn new(status: u16, data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            status,
            headers: BTreeMap::new(),
            is_error: false,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            data: message.into().into_bytes(),
            status: 500,
            headers: BTreeMap::new(),
            is_error: true,
        }
    }

    /// Body as text, lossy.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }

    /// Structured view used by scripts: `{status, headers, data}`.
    pub fn to_json(&self) -> JsonValue {
        serde_json::json!({
            "status": self.status,
            "headers": self.headers,
            "data": bytes_to_data(Some(&self.data)),
        })
    }
}

/// File produced by a script's `setAttachment`, delivered with an email.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub content: Vec<u8>,
}

impl Attachment {
    pub fn new(name: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }
}

/// Value carried along one edge.
///
/// `data` is the primary value, `values` an optional side value set by a
/// script, `response` the last HTTP or nested-flow response seen upstream.
/// `attachments` travel with the value until an Email node sends them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Payload {
    pub data: Option<Vec<u8>>,
    pub values: Option<Vec<u8>>,
    pub response: Option<Response>,
    pub attachments: Vec<Attachment>,
}

impl Payload {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: Some(data.into()),
            ..Self::default()
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_json(value: &JsonValue) -> Self {
        Self {
            data: data_to_bytes(value),
            ..Self::default()
        }
    }

    /// Replace the primary value, keeping the upstream response and
    /// attachments. The side value is dropped.
    pub fn with_data(&self, data: Option<Vec<u8>>) -> Self {
        Self {
            data,
            values: None,
            response: self.response.clone(),
            attachments: self.attachments.clone(),
        }
    }

    pub fn with_response(mut self, response: Response) -> Self {
        self.response = Some(response);
        self
    }

    pub fn bytes(&self) -> &[u8] {
        self.data.as_deref().unwrap_or_default()
    }

    pub fn to_json(&self) -> JsonValue {
        bytes_to_data(self.data.as_deref())
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(self.bytes()).into_owned()
    }
}

/// Result shape of one node execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Envelope {
    /// Fan out along output 0.
    Value(Payload),
    /// One branch per element along output 0.
    Many(Vec<Payload>),
    /// Fan out along each selected output index.
    Select { payload: Payload, outputs: Vec<usize> },
    /// Candidate terminal response of the run.
    Respond(Response),
    /// Incoming value forwarded untouched along output 0.
    PassThrough(Payload),
    /// End the branch without propagating. Not an error.
    Stop,
}

impl Envelope {
    pub fn is_stop(&self) -> bool {
        matches!(self, Envelope::Stop)
    }
}

/// Decode stored bytes into structured data.
///
/// JSON is preferred; anything else becomes a string. Empty or absent
/// bytes decode to null.
pub fn bytes_to_data(bytes: Option<&[u8]>) -> JsonValue {
    match bytes {
        None => JsonValue::Null,
        Some(b) if b.is_empty() => JsonValue::Null,
        Some(b) => serde_json::from_slice(b)
            .unwrap_or_else(|_| JsonValue::String(String::from_utf8_lossy(b).into_owned())),
    }
}

/// Encode structured data back into bytes.
///
/// Strings are written verbatim so that text values do not gain quotes.
pub fn data_to_bytes(value: &JsonValue) -> Option<Vec<u8>> {
    match value {
        JsonValue::Null => None,
        JsonValue::String(s) => Some(s.clone().into_bytes()),
        other => Some(other.to_string().into_bytes()),
    }
}
