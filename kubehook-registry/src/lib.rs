//! Kubehook registry inspection
//!
//! Reads an image's configured entrypoint straight from its registry over
//! the Docker Registry HTTP API v2, without pulling any layers. Container
//! steps whose definition carries no entrypoint use it as their command.
//!
//! # Example
//!
//! ```no_run
//! use kubehook_registry::{EntrypointInspector, RegistryClient};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = RegistryClient::new()?;
//!     match client.entrypoint("ghcr.io/owner/tool:latest", None).await? {
//!         Some(entrypoint) => println!("entrypoint: {}", entrypoint),
//!         None => println!("image has no entrypoint"),
//!     }
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod error;
pub mod manifest;
pub mod reference;

// Re-export commonly used types
pub use error::{RegistryError, Result};
pub use reference::ImageReference;

use async_trait::async_trait;
use kubehook_core::RegistryAuth;
use reqwest::header::{ACCEPT, WWW_AUTHENTICATE};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

use auth::{Authorization, Credentials, authorize, parse_challenge};
use manifest::{CONFIG_ACCEPT, ImageConfig, MANIFEST_ACCEPT, Manifest};

/// Overall deadline for one request to the registry
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Looks up the entrypoint an image declares
#[async_trait]
pub trait EntrypointInspector: Send + Sync {
    /// Entrypoint of `image` joined by spaces, or `None` if it declares none
    async fn entrypoint(&self, image: &str, auth: Option<&RegistryAuth>) -> Result<Option<String>>;
}

/// HTTP client for image registries
#[derive(Debug, Clone)]
pub struct RegistryClient {
    /// HTTP client instance
    client: Client,
}

impl RegistryClient {
    /// Create a new registry client with the default request timeout
    pub fn new() -> Result<Self> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self { client })
    }

    /// Create a new registry client with a custom HTTP client
    ///
    /// # Arguments
    /// * `client` - A configured reqwest Client
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    /// Resolves the entrypoint of `image`
    ///
    /// # Arguments
    /// * `image` - Image reference, optionally prefixed with `docker://`
    /// * `auth` - Registry credentials from the container definition
    ///
    /// # Returns
    /// The entrypoint joined by spaces, `None` if the image declares none
    pub async fn get_entrypoint(
        &self,
        image: &str,
        auth: Option<&RegistryAuth>,
    ) -> Result<Option<String>> {
        let image = ImageReference::parse(image)?;
        debug!("Inspecting image {} for entrypoint", image);

        let credentials = auth.and_then(|a| {
            a.username().map(|username| Credentials {
                username: username.to_string(),
                password: a.password().to_string(),
            })
        });
        let mut session = Session {
            client: &self.client,
            image: &image,
            credentials,
            authorization: None,
        };

        let mut manifest: Manifest = session
            .get_json(&image.manifest_url(&image.reference), MANIFEST_ACCEPT)
            .await?;

        if manifest.is_index() {
            let digest = manifest
                .select_platform()
                .map(str::to_string)
                .ok_or_else(|| RegistryError::ParseError("empty image index".to_string()))?;
            debug!("Resolved image index of {} to manifest {}", image, digest);
            manifest = session
                .get_json(&image.manifest_url(&digest), MANIFEST_ACCEPT)
                .await?;
        }

        let config_digest = manifest
            .config
            .map(|c| c.digest)
            .ok_or_else(|| RegistryError::ParseError("manifest has no config".to_string()))?;

        let config: ImageConfig = session
            .get_json(&image.blob_url(&config_digest), CONFIG_ACCEPT)
            .await?;

        let entrypoint = config.entrypoint();
        match &entrypoint {
            Some(entrypoint) => debug!("Found entrypoint {} in image {}", entrypoint, image),
            None => debug!("Image {} has no entrypoint defined", image),
        }
        Ok(entrypoint)
    }
}

#[async_trait]
impl EntrypointInspector for RegistryClient {
    async fn entrypoint(&self, image: &str, auth: Option<&RegistryAuth>) -> Result<Option<String>> {
        self.get_entrypoint(image, auth).await
    }
}

/// Requests against one repository, answering the first auth challenge
struct Session<'a> {
    client: &'a Client,
    image: &'a ImageReference,
    credentials: Option<Credentials>,
    authorization: Option<Authorization>,
}

impl Session<'_> {
    async fn get_json<T: DeserializeOwned>(&mut self, url: &str, accept: &str) -> Result<T> {
        let mut response = self.send(url, accept).await?;

        if response.status() == StatusCode::UNAUTHORIZED && self.authorization.is_none() {
            let challenge = response
                .headers()
                .get(WWW_AUTHENTICATE)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_challenge)
                .ok_or_else(|| {
                    RegistryError::AuthFailed(format!("no usable challenge from {}", self.image.registry))
                })?;

            let authorization = authorize(
                self.client,
                &challenge,
                &self.image.pull_scope(),
                self.credentials.as_ref(),
            )
            .await?;
            self.authorization = Some(authorization);
            response = self.send(url, accept).await?;
        }

        let status = response.status();
        if !status.is_success() {
            return Err(RegistryError::api_error(status.as_u16(), url));
        }

        response
            .json()
            .await
            .map_err(|e| RegistryError::ParseError(format!("Failed to parse JSON from {}: {}", url, e)))
    }

    async fn send(&self, url: &str, accept: &str) -> Result<reqwest::Response> {
        let mut request = self.client.get(url).header(ACCEPT, accept);
        if let Some(authorization) = &self.authorization {
            request = authorization.apply(request);
        }
        Ok(request.send().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        assert!(RegistryClient::new().is_ok());
    }

    #[test]
    fn test_client_with_custom_client() {
        let http_client = Client::new();
        let client = RegistryClient::with_client(http_client);
        let _inspector: &dyn EntrypointInspector = &client;
    }

    #[tokio::test]
    async fn test_invalid_reference_fails_before_any_request() {
        let client = RegistryClient::new().unwrap();
        let result = client.get_entrypoint("oci://nope", None).await;
        assert!(matches!(result, Err(RegistryError::InvalidReference(_))));
    }
}
