use chorecore::{HostError, HttpRequest, HttpResponse};
use std::collections::BTreeMap;
use std::time::Duration;

/// reqwest-backed HTTP sender for host implementations
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, HostError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| HostError::Transport(format!("cannot build http client: {}", e)))?;

        Ok(Self { client })
    }

    pub async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HostError> {
        let method = reqwest::Method::from_bytes(request.method.trim().to_uppercase().as_bytes())
            .map_err(|_| HostError::Invalid(format!("unsupported method: {}", request.method)))?;

        let mut builder = self.client.request(method, request.url.trim());
        for (key, value) in &request.headers {
            builder = builder.header(key.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| HostError::Transport(format!("HTTP request failed: {}", e)))?;

        let status = response.status().as_u16();
        let headers: BTreeMap<String, String> = response
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or("").to_string()))
            .collect();

        let body = response
            .bytes()
            .await
            .map_err(|e| HostError::Transport(format!("Failed to read response: {}", e)))?;

        tracing::debug!("Response status: {}", status);

        Ok(HttpResponse {
            status,
            headers,
            body: body.to_vec(),
        })
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}
