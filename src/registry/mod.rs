//! Client for the Docker Hub registry protocol: a pull-scoped bearer token,
//! the v2 image manifest and layer blobs.
//!
//! Every call is one synchronous round trip over the [`Transport`] handed in
//! by the caller, with no retry. The token obtained first is reused for every
//! later call and never refreshed.
//!
//! [`Transport`]: crate::transport::Transport

mod client;
mod manifest;
mod token;

use std::path::PathBuf;
use std::time::Duration;

pub use client::RegistryClient;
pub use manifest::{Descriptor, Digest, DigestError, Manifest};
pub use token::Token;

use crate::transport::TransportError;

pub const DEFAULT_AUTH_URL: &str = "https://auth.docker.io/token";
pub const DEFAULT_SERVICE: &str = "registry.docker.io";
pub const DEFAULT_REGISTRY_URL: &str = "https://registry-1.docker.io";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
pub const MANIFEST_V2_MEDIA_TYPE: &str = "application/vnd.docker.distribution.manifest.v2+json";
pub const LAYER_FILE_SUFFIX: &str = ".tar.gz";

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("cannot get {what}, status: {status} {reason}")]
    UnexpectedStatus {
        what: &'static str,
        status: u16,
        reason: String,
    },
    #[error("failed to decode {what}")]
    Decode {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("token response carried neither token nor access_token")]
    EmptyToken,
    #[error("manifest for {0} lists no layers")]
    NoLayers(String),
    #[error("failed to write layer to {path:?}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, RegistryError>;

/// Where the registry lives and how downloads are stored.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub auth_url: String,
    pub service: String,
    pub registry_url: String,
    pub timeout: Duration,
    /// Directory downloaded layers are written to.
    pub download_dir: PathBuf,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            auth_url: DEFAULT_AUTH_URL.to_string(),
            service: DEFAULT_SERVICE.to_string(),
            registry_url: DEFAULT_REGISTRY_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
            download_dir: PathBuf::from("."),
        }
    }
}
