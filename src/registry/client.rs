use std::fs::File;
use std::io;
use std::path::PathBuf;

use super::{
    Digest, Manifest, RegistryConfig, RegistryError, Result, Token, LAYER_FILE_SUFFIX,
    MANIFEST_V2_MEDIA_TYPE,
};
use crate::image::ImageReference;
use crate::transport::{Request, Response, Transport};

/// Registry operations over a borrowed transport. Holds no state of its own,
/// so the token has to be passed into every authenticated call.
pub struct RegistryClient<'a> {
    transport: &'a dyn Transport,
    config: &'a RegistryConfig,
}

impl<'a> RegistryClient<'a> {
    pub fn new(transport: &'a dyn Transport, config: &'a RegistryConfig) -> Self {
        Self { transport, config }
    }

    pub fn token_url(&self, image: &ImageReference) -> String {
        format!(
            "{}?service={}&scope=repository:{}:pull",
            self.config.auth_url,
            self.config.service,
            image.name()
        )
    }

    pub fn manifest_url(&self, image: &ImageReference) -> String {
        format!(
            "{}/v2/library/{}/manifests/{}",
            self.config.registry_url,
            image.name(),
            image.tag()
        )
    }

    pub fn blob_url(&self, image: &ImageReference, digest: &Digest) -> String {
        format!(
            "{}/v2/library/{}/blobs/{}",
            self.config.registry_url,
            image.name(),
            digest
        )
    }

    /// Obtain a pull-scoped bearer token for the repository.
    pub fn fetch_token(&self, image: &ImageReference) -> Result<Token> {
        let request = Request::get(self.token_url(image));
        let response = self.send(&request, "token")?;
        let token: Token =
            serde_json::from_reader(response.body).map_err(|source| RegistryError::Decode {
                what: "token",
                source,
            })?;
        if token.is_empty() {
            return Err(RegistryError::EmptyToken);
        }

        log::debug!(
            "got token for {}, expires at {:?}",
            image.name(),
            token.expires_at()
        );
        Ok(token)
    }

    pub fn fetch_manifest(
        &self,
        image: &ImageReference,
        token: Option<&Token>,
    ) -> Result<Manifest> {
        let request = authorize(
            Request::get(self.manifest_url(image)).header("Accept", MANIFEST_V2_MEDIA_TYPE),
            token,
        );
        let response = self.send(&request, "manifest")?;
        let manifest: Manifest =
            serde_json::from_reader(response.body).map_err(|source| RegistryError::Decode {
                what: "manifest",
                source,
            })?;
        if manifest.layers.is_empty() {
            return Err(RegistryError::NoLayers(image.to_string()));
        }

        log::debug!(
            "manifest for {} lists {} layers, using {}",
            image,
            manifest.layers.len(),
            manifest.layers[0].digest
        );
        Ok(manifest)
    }

    /// Stream a blob verbatim into `<download_dir>/<hex>.tar.gz` and return
    /// the path. A failed transfer leaves whatever was written in place.
    pub fn download_layer(
        &self,
        image: &ImageReference,
        token: Option<&Token>,
        digest: &Digest,
    ) -> Result<PathBuf> {
        let request = authorize(Request::get(self.blob_url(image, digest)), token);
        let mut response = self.send(&request, "layer")?;

        let path = self
            .config
            .download_dir
            .join(format!("{}{}", digest.encoded(), LAYER_FILE_SUFFIX));
        let write_err = |source: io::Error| RegistryError::Write {
            path: path.clone(),
            source,
        };
        let mut file = File::create(&path).map_err(write_err)?;
        let written = io::copy(&mut response.body, &mut file).map_err(write_err)?;
        file.sync_all().map_err(write_err)?;

        log::debug!("wrote {} bytes of {} to {:?}", written, digest, path);
        Ok(path)
    }

    fn send(&self, request: &Request, what: &'static str) -> Result<Response> {
        let response = self.transport.get(request)?;
        if !response.is_ok() {
            return Err(RegistryError::UnexpectedStatus {
                what,
                status: response.status,
                reason: response.reason,
            });
        }
        Ok(response)
    }
}

fn authorize(request: Request, token: Option<&Token>) -> Request {
    match token {
        Some(token) if !token.is_empty() => {
            request.header("Authorization", format!("Bearer {}", token.bearer()))
        }
        _ => request,
    }
}
