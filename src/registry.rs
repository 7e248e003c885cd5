//! # OCI Registry Client
//!
//! Pulls action images into the [`BlobStore`] with `oci-distribution`.
//!
//! ## Registry Rewrite
//!
//! When [`RegistryCredentials::registry`] is set, every pull is resolved
//! against that host, whatever registry the action's image reference names,
//! and authenticated with basic credentials. Provisioning networks usually
//! only reach a local mirror.
//!
//! ```text
//! quay.io/tinkerbell/actions/image2disk:latest
//!   └── with registry=10.0.0.1:5000
//!       -> 10.0.0.1:5000/tinkerbell/actions/image2disk:latest
//! ```
//!
//! Without a configured registry, references resolve normally and pull
//! anonymously.
//!
//! ## Multi-Arch
//!
//! Image indexes are resolved to the host's `linux/<arch>` manifest.
//!
//! ## Limits
//!
//! | Check | Limit |
//! |-------|-------|
//! | Reference length | [`MAX_IMAGE_REF_LEN`] |
//! | Layer count | [`MAX_LAYERS`] |
//! | Layer size | [`MAX_LAYER_SIZE`] |
//! | Config size | [`MAX_CONFIG_SIZE`] |
//! | Each registry round-trip | [`IMAGE_PULL_TIMEOUT`] |

use crate::constants::{
    IMAGE_PULL_TIMEOUT, MAX_CONFIG_SIZE, MAX_IMAGE_REF_LEN, MAX_LAYER_SIZE, MAX_LAYERS,
};
use crate::error::{Error, Result};
use crate::storage::BlobStore;
use oci_distribution::client::{ClientConfig, ClientProtocol};
use oci_distribution::manifest::{OciDescriptor, OciManifest};
use oci_distribution::secrets::RegistryAuth;
use oci_distribution::{Client, Reference};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Credentials for the node's image registry.
///
/// Only used when `registry` is non-empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryCredentials {
    /// Registry host (`host[:port]`).
    pub registry: String,
    /// Basic-auth user name.
    pub username: String,
    /// Basic-auth password.
    pub password: String,
}

impl RegistryCredentials {
    /// Returns true if a registry host is configured.
    pub fn is_configured(&self) -> bool {
        !self.registry.is_empty()
    }
}

/// The parts of an image config that shape the container process.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageConfig {
    #[serde(default)]
    pub env: Vec<String>,
    #[serde(default)]
    pub entrypoint: Vec<String>,
    #[serde(default)]
    pub cmd: Vec<String>,
    #[serde(default)]
    pub working_dir: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
}

/// Metadata about an OCI image layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerInfo {
    /// Digest of the compressed blob.
    pub digest: String,
    /// Compressed size in bytes.
    pub size: u64,
    /// Media type.
    pub media_type: String,
}

/// A pulled image whose blobs are all in the [`BlobStore`].
///
/// `layers` are ordered base first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageHandle {
    /// Image name as the action gave it (the cache key).
    pub reference: String,
    /// Manifest digest.
    pub digest: String,
    /// Resolved `os/arch`.
    pub platform: String,
    /// Layers, base first.
    pub layers: Vec<LayerInfo>,
    /// Config blob digest.
    pub config_digest: String,
    /// Decoded process config.
    pub config: ImageConfig,
}

/// Registry client for action image pulls.
pub struct RegistryClient {
    client: Client,
    credentials: RegistryCredentials,
}

impl RegistryClient {
    /// Creates a client. Credentials apply only if a registry is configured.
    pub fn new(credentials: RegistryCredentials) -> Self {
        Self {
            client: Client::new(ClientConfig {
                protocol: ClientProtocol::Https,
                ..Default::default()
            }),
            credentials,
        }
    }

    fn auth(&self) -> RegistryAuth {
        if self.credentials.is_configured() && !self.credentials.username.is_empty() {
            RegistryAuth::Basic(
                self.credentials.username.clone(),
                self.credentials.password.clone(),
            )
        } else {
            RegistryAuth::Anonymous
        }
    }

    /// Validates `image_ref` and maps it onto the configured registry.
    pub fn resolve_reference(&self, image_ref: &str) -> Result<Reference> {
        validate_reference(image_ref)?;

        let reference: Reference = image_ref
            .parse()
            .map_err(|e| Error::InvalidImageReference {
                reference: image_ref.to_string(),
                reason: format!("{}", e),
            })?;

        if !self.credentials.is_configured() {
            return Ok(reference);
        }

        let registry = self.credentials.registry.clone();
        let repository = reference.repository().to_string();
        Ok(match reference.digest() {
            Some(digest) => Reference::with_digest(registry, repository, digest.to_string()),
            None => Reference::with_tag(
                registry,
                repository,
                reference.tag().unwrap_or("latest").to_string(),
            ),
        })
    }

    /// Pulls an image: manifest, config and every layer not yet cached.
    pub async fn pull(&self, image_ref: &str, storage: &BlobStore) -> Result<ImageHandle> {
        let reference = self.resolve_reference(image_ref)?;
        let auth = self.auth();
        let pull_err = |reason: String| Error::ImagePullFailed {
            reference: image_ref.to_string(),
            reason,
        };

        info!("Pulling image {} from {}", image_ref, reference.registry());

        let (manifest, digest) =
            tokio::time::timeout(IMAGE_PULL_TIMEOUT, self.client.pull_manifest(&reference, &auth))
                .await
                .map_err(|_| pull_err(format!("manifest fetch timed out after {:?}", IMAGE_PULL_TIMEOUT)))?
                .map_err(|e| pull_err(e.to_string()))?;

        let (target_os, target_arch) = target_platform();
        let resolved = self
            .resolve_manifest(&reference, &auth, manifest, target_os, target_arch)
            .await
            .map_err(|reason| pull_err(reason))?;

        if resolved.layers.len() > MAX_LAYERS {
            return Err(pull_err(format!(
                "too many layers: {} > {}",
                resolved.layers.len(),
                MAX_LAYERS
            )));
        }

        let config_bytes = self
            .fetch_blob(&reference, &resolved.config, storage, MAX_CONFIG_SIZE)
            .await?;
        let config = parse_image_config(image_ref, &config_bytes)?;

        let mut layers = Vec::with_capacity(resolved.layers.len());
        for desc in &resolved.layers {
            self.fetch_blob(&reference, desc, storage, MAX_LAYER_SIZE).await?;
            layers.push(LayerInfo {
                digest: desc.digest.clone(),
                size: desc.size.max(0) as u64,
                media_type: desc.media_type.clone(),
            });
        }

        info!("Pulled {} ({} layers)", image_ref, layers.len());

        Ok(ImageHandle {
            reference: image_ref.to_string(),
            digest,
            platform: format!("{}/{}", target_os, target_arch),
            layers,
            config_digest: resolved.config.digest,
            config,
        })
    }

    /// Returns a blob from the cache, downloading and verifying it first if
    /// needed.
    async fn fetch_blob(
        &self,
        reference: &Reference,
        desc: &OciDescriptor,
        storage: &BlobStore,
        limit: usize,
    ) -> Result<Vec<u8>> {
        if storage.has_blob(&desc.digest) {
            debug!("Blob {} already cached", desc.digest);
            return storage.get_blob(&desc.digest);
        }

        if desc.size > limit as i64 {
            return Err(Error::ImageTooLarge {
                size: desc.size as u64,
                limit: limit as u64,
            });
        }

        debug!("Pulling blob {} ({} bytes)", desc.digest, desc.size);

        let mut data = Vec::new();
        tokio::time::timeout(
            IMAGE_PULL_TIMEOUT,
            self.client.pull_blob(reference, desc, &mut data),
        )
        .await
        .map_err(|_| Error::ImagePullFailed {
            reference: reference.to_string(),
            reason: format!("blob {} timed out after {:?}", desc.digest, IMAGE_PULL_TIMEOUT),
        })?
        .map_err(|e| Error::ImagePullFailed {
            reference: reference.to_string(),
            reason: format!("blob {}: {}", desc.digest, e),
        })?;

        storage.put_blob(&desc.digest, &data)?;
        Ok(data)
    }

    /// Resolves a manifest (handling multi-arch indexes) to its config and
    /// layer descriptors.
    async fn resolve_manifest(
        &self,
        reference: &Reference,
        auth: &RegistryAuth,
        manifest: OciManifest,
        target_os: &str,
        target_arch: &str,
    ) -> std::result::Result<ResolvedManifest, String> {
        let index = match manifest {
            OciManifest::Image(img) => {
                return Ok(ResolvedManifest {
                    config: img.config,
                    layers: img.layers,
                });
            }
            OciManifest::ImageIndex(index) => index,
        };

        let matching = index.manifests.iter().find(|m| {
            m.platform
                .as_ref()
                .is_some_and(|p| p.os == target_os && p.architecture == target_arch)
        });

        let Some(manifest_desc) = matching else {
            let available: Vec<String> = index
                .manifests
                .iter()
                .filter_map(|m| m.platform.as_ref())
                .map(|p| format!("{}/{}", p.os, p.architecture))
                .collect();
            return Err(format!(
                "no manifest for {}/{}. Available: {}",
                target_os,
                target_arch,
                available.join(", ")
            ));
        };

        let platform_ref = Reference::with_digest(
            reference.registry().to_string(),
            reference.repository().to_string(),
            manifest_desc.digest.clone(),
        );

        let (platform_manifest, _) = tokio::time::timeout(
            IMAGE_PULL_TIMEOUT,
            self.client.pull_manifest(&platform_ref, auth),
        )
        .await
        .map_err(|_| "platform manifest fetch timed out".to_string())?
        .map_err(|e| format!("failed to pull platform manifest: {}", e))?;

        match platform_manifest {
            OciManifest::Image(img) => Ok(ResolvedManifest {
                config: img.config,
                layers: img.layers,
            }),
            OciManifest::ImageIndex(_) => Err("nested image index not supported".to_string()),
        }
    }
}

struct ResolvedManifest {
    config: OciDescriptor,
    layers: Vec<OciDescriptor>,
}

/// Checks reference length and characters before parsing.
pub fn validate_reference(image_ref: &str) -> Result<()> {
    if image_ref.is_empty() {
        return Err(Error::InvalidImageReference {
            reference: image_ref.to_string(),
            reason: "empty reference".to_string(),
        });
    }
    if image_ref.len() > MAX_IMAGE_REF_LEN {
        return Err(Error::InvalidImageReference {
            reference: image_ref.to_string(),
            reason: format!("exceeds {} bytes", MAX_IMAGE_REF_LEN),
        });
    }
    if !image_ref
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "/:.-_@".contains(c))
    {
        return Err(Error::InvalidImageReference {
            reference: image_ref.to_string(),
            reason: "contains invalid characters".to_string(),
        });
    }
    Ok(())
}

/// Decodes the `config` section of an OCI image config blob.
pub fn parse_image_config(reference: &str, data: &[u8]) -> Result<ImageConfig> {
    #[derive(Deserialize)]
    struct Root {
        #[serde(default)]
        config: Option<Section>,
    }

    #[derive(Deserialize)]
    #[serde(rename_all = "PascalCase")]
    struct Section {
        #[serde(default)]
        env: Option<Vec<String>>,
        #[serde(default)]
        entrypoint: Option<Vec<String>>,
        #[serde(default)]
        cmd: Option<Vec<String>>,
        #[serde(default)]
        working_dir: Option<String>,
        #[serde(default)]
        user: Option<String>,
    }

    let root: Root = serde_json::from_slice(data).map_err(|e| Error::InvalidImageConfig {
        reference: reference.to_string(),
        reason: e.to_string(),
    })?;

    Ok(match root.config {
        Some(section) => ImageConfig {
            env: section.env.unwrap_or_default(),
            entrypoint: section.entrypoint.unwrap_or_default(),
            cmd: section.cmd.unwrap_or_default(),
            working_dir: section.working_dir,
            user: section.user,
        },
        None => ImageConfig::default(),
    })
}

/// Returns the OCI `(os, architecture)` of this host.
fn target_platform() -> (&'static str, &'static str) {
    let arch = match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "arm" => "arm",
        "riscv64" => "riscv64",
        "s390x" => "s390x",
        "powerpc64" => "ppc64le",
        _ => "amd64",
    };
    ("linux", arch)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_validation() {
        assert!(validate_reference("quay.io/tinkerbell/actions/image2disk:latest").is_ok());
        assert!(validate_reference("nginx :latest").is_err());
        assert!(validate_reference("").is_err());
        assert!(validate_reference(&"a".repeat(MAX_IMAGE_REF_LEN + 1)).is_err());
    }

    #[test]
    fn test_rewrite_to_configured_registry() {
        let client = RegistryClient::new(RegistryCredentials {
            registry: "10.0.0.1:5000".to_string(),
            username: "admin".to_string(),
            password: "secret".to_string(),
        });
        let reference = client
            .resolve_reference("quay.io/tinkerbell/actions/image2disk:v1")
            .unwrap();
        assert_eq!(reference.registry(), "10.0.0.1:5000");
        assert_eq!(reference.repository(), "tinkerbell/actions/image2disk");
        assert_eq!(reference.tag(), Some("v1"));
        assert!(matches!(client.auth(), RegistryAuth::Basic(..)));
    }

    #[test]
    fn test_no_registry_keeps_reference() {
        let client = RegistryClient::new(RegistryCredentials::default());
        let reference = client.resolve_reference("quay.io/org/app:1").unwrap();
        assert_eq!(reference.registry(), "quay.io");
        assert!(matches!(client.auth(), RegistryAuth::Anonymous));
    }

    #[test]
    fn test_parse_image_config() {
        let blob = br#"{"architecture":"amd64","config":{"Env":["PATH=/bin"],"Entrypoint":["/init"],"Cmd":["-v"],"WorkingDir":"/work"}}"#;
        let config = parse_image_config("img", blob).unwrap();
        assert_eq!(config.env, vec!["PATH=/bin".to_string()]);
        assert_eq!(config.entrypoint, vec!["/init".to_string()]);
        assert_eq!(config.cmd, vec!["-v".to_string()]);
        assert_eq!(config.working_dir.as_deref(), Some("/work"));

        let empty = parse_image_config("img", br#"{"architecture":"amd64"}"#).unwrap();
        assert_eq!(empty, ImageConfig::default());
    }
}
