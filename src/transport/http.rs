use std::time::Duration;

use reqwest::blocking::Client;

use super::{Request, Response, Result, Transport, TransportError};

/// Blocking HTTP transport sharing one client for the whole run.
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(TransportError::Client)?;
        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    fn get(&self, request: &Request) -> Result<Response> {
        log::debug!("GET {}", request.url);
        let mut builder = self.client.get(&request.url);
        for (key, value) in &request.headers {
            builder = builder.header(key.as_str(), value.as_str());
        }

        let response = builder.send().map_err(|source| TransportError::Request {
            url: request.url.clone(),
            source,
        })?;
        let status = response.status();
        log::debug!("GET {} returned {}", request.url, status);

        Ok(Response {
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or_default().to_string(),
            body: Box::new(response),
        })
    }
}
