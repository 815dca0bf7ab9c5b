//! A narrow HTTP interface for the registry client.
//! The real implementation wraps one blocking reqwest client; tests use a
//! helper that serves canned responses and records what was asked for.

pub mod http;

use std::fmt;
use std::io::Read;

pub use http::HttpTransport;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to build http client")]
    Client(#[source] reqwest::Error),
    #[error("request to {url} failed")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("no response registered for {0}")]
    Unregistered(String),
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// A GET request: the only verb the registry protocol needs here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub url: String,
    pub headers: Vec<(String, String)>,
}

impl Request {
    pub fn get<S: Into<String>>(url: S) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
        }
    }

    pub fn header<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    pub fn header_value(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }
}

pub struct Response {
    pub status: u16,
    pub reason: String,
    pub body: Box<dyn Read>,
}

impl Response {
    pub fn is_ok(&self) -> bool {
        self.status == 200
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("reason", &self.reason)
            .finish_non_exhaustive()
    }
}

pub trait Transport {
    /// Perform exactly one round trip. Non-200 statuses are not errors at
    /// this level; the caller decides what a status means.
    fn get(&self, request: &Request) -> Result<Response>;
}
