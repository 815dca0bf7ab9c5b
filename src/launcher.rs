//! The launch pipeline: one fixed sequence of stages, each finishing before
//! the next starts.
//!
//! 1. resolve the command on the host and check it is a regular file
//! 2. create the sandbox directory
//! 3. fetch a pull token, the manifest and the first layer
//! 4. extract that layer into the sandbox, delete the download and copy the
//!    command in on top of it
//! 5. chroot into the sandbox, then unshare mount, UTS and PID namespaces
//! 6. run the command and report how it ended
//!
//! Everything that needs the host filesystem or the network happens before
//! step 5, because nothing outside the sandbox is reachable afterwards.

use std::fs;
use std::path::{Path, PathBuf};

use crate::executor::{self, ExecutorError, Outcome};
use crate::image::ImageReference;
use crate::registry::{Digest, RegistryClient, RegistryConfig, RegistryError};
use crate::sandbox::{self, PreparedSandbox, SandboxBuilder, SandboxError};
use crate::syscall::Syscall;
use crate::transport::Transport;

#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("cannot resolve command")]
    Command(#[source] SandboxError),
    #[error("cannot build sandbox")]
    Sandbox(#[source] SandboxError),
    #[error("cannot get token")]
    Token(#[source] RegistryError),
    #[error("cannot get manifest")]
    Manifest(#[source] RegistryError),
    #[error("cannot download layer {digest}")]
    Download {
        digest: Digest,
        #[source]
        source: RegistryError,
    },
    #[error("cannot extract layer")]
    Extract(#[source] SandboxError),
    #[error("cannot isolate process")]
    Isolate(#[source] SandboxError),
    #[error("cannot run command")]
    Execute(#[source] ExecutorError),
}

type Result<T> = std::result::Result<T, LaunchError>;

/// Deletes a downloaded layer archive when dropped.
struct DownloadedLayer(PathBuf);

impl DownloadedLayer {
    fn path(&self) -> &Path {
        &self.0
    }
}

impl Drop for DownloadedLayer {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.0) {
            log::warn!("failed to remove downloaded layer {:?}: {}", self.0, err);
        }
    }
}

pub struct Launcher<'a> {
    transport: Box<dyn Transport>,
    syscall: &'a dyn Syscall,
    config: RegistryConfig,
    sandbox_parent: Option<PathBuf>,
}

impl<'a> Launcher<'a> {
    pub fn new(transport: Box<dyn Transport>, syscall: &'a dyn Syscall) -> Self {
        Self {
            transport,
            syscall,
            config: RegistryConfig::default(),
            sandbox_parent: None,
        }
    }

    pub fn with_config(mut self, config: RegistryConfig) -> Self {
        self.config = config;
        self
    }

    /// Create sandboxes below `dir` rather than the system temp directory.
    pub fn with_sandbox_parent<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.sandbox_parent = Some(dir.into());
        self
    }

    /// Run `command` with `args` inside a sandbox built from `image`.
    ///
    /// On success the process has been chrooted and moved to new namespaces
    /// for good, whatever the command's outcome. Failures before the chroot
    /// leave the host untouched apart from a partially downloaded layer.
    pub fn launch(
        self,
        image: &ImageReference,
        command: &str,
        args: &[String],
    ) -> Result<Outcome> {
        let Launcher {
            transport,
            syscall,
            config,
            sandbox_parent,
        } = self;

        let command = sandbox::resolve_command(command).map_err(LaunchError::Command)?;

        let mut builder = SandboxBuilder::new(&command);
        if let Some(parent) = sandbox_parent {
            builder = builder.with_parent(parent);
        }
        let prepared = builder.prepare().map_err(LaunchError::Sandbox)?;
        log::info!("prepared sandbox {:?} for {:?}", prepared.root(), command);

        let layer = fetch_first_layer(transport.as_ref(), &config, image)?;
        // the blocking client owns a runtime thread; let it go before the
        // process-wide changes below
        drop(transport);

        populate(&prepared, &layer)?;
        drop(layer);

        let sandbox = prepared.enter(syscall).map_err(|err| match err {
            SandboxError::Unshare(_) => LaunchError::Isolate(err),
            err => LaunchError::Sandbox(err),
        })?;

        log::info!(
            "running {:?} {:?} in {:?}",
            sandbox.command(),
            args,
            sandbox.host_root()
        );
        let outcome = executor::run(sandbox.command(), args).map_err(LaunchError::Execute)?;
        log::info!("command {:?} {}", sandbox.command(), outcome);
        Ok(outcome)
    }
}

fn fetch_first_layer(
    transport: &dyn Transport,
    config: &RegistryConfig,
    image: &ImageReference,
) -> Result<DownloadedLayer> {
    let client = RegistryClient::new(transport, config);

    log::info!("fetching token for {}", image);
    let token = client.fetch_token(image).map_err(LaunchError::Token)?;

    log::info!("fetching manifest for {}", image);
    let manifest = client
        .fetch_manifest(image, Some(&token))
        .map_err(LaunchError::Manifest)?;
    let digest = manifest
        .first_layer()
        .map(|layer| layer.digest.clone())
        .ok_or_else(|| LaunchError::Manifest(RegistryError::NoLayers(image.to_string())))?;

    log::info!("downloading layer {}", digest);
    let path = client
        .download_layer(image, Some(&token), &digest)
        .map_err(|source| LaunchError::Download {
            digest: digest.clone(),
            source,
        })?;
    Ok(DownloadedLayer(path))
}

fn populate(prepared: &PreparedSandbox, layer: &DownloadedLayer) -> Result<()> {
    log::info!("extracting {:?} into {:?}", layer.path(), prepared.root());
    prepared.populate(layer.path()).map_err(|err| match err {
        SandboxError::Populate(_) => LaunchError::Extract(err),
        err => LaunchError::Sandbox(err),
    })
}

#[cfg(test)]
mod tests {
    use std::fs;

    use anyhow::Result;
    use nix::sched::CloneFlags;

    use super::*;
    use crate::layer::tests::sample_layer;
    use crate::syscall::test::TestHelperSyscall;
    use crate::transport::test::TestHelperTransport;

    const LAYER_DIGEST: &str =
        "sha256:5c3b5a5f14ae1a2fbfc5a1e7e4b9d52f5e7d0dc6a2b4a1f3d0e9c8b7a6f5e4d3";
    const TOKEN_URL: &str =
        "https://auth.docker.io/token?service=registry.docker.io&scope=repository:busybox:pull";
    const MANIFEST_URL: &str = "https://registry-1.docker.io/v2/library/busybox/manifests/latest";
    const LAYER_MEDIA_TYPE: &str = "application/vnd.docker.image.rootfs.diff.tar.gzip";

    fn blob_url() -> String {
        format!("https://registry-1.docker.io/v2/library/busybox/blobs/{LAYER_DIGEST}")
    }

    fn manifest(layers: &[&str]) -> String {
        let layers: Vec<String> = layers
            .iter()
            .map(|digest| {
                format!(
                    r#"{{"mediaType": "{LAYER_MEDIA_TYPE}", "size": 1, "digest": "{digest}"}}"#
                )
            })
            .collect();
        format!(
            r#"{{
                "schemaVersion": 2,
                "mediaType": "application/vnd.docker.distribution.manifest.v2+json",
                "config": {{
                    "mediaType": "application/vnd.docker.container.image.v1+json",
                    "size": 1,
                    "digest": "sha256:{}"
                }},
                "layers": [{}]
            }}"#,
            "e".repeat(64),
            layers.join(",")
        )
    }

    struct Fixture {
        _scratch: tempfile::TempDir,
        sandboxes: PathBuf,
        downloads: PathBuf,
    }

    impl Fixture {
        fn new() -> Result<Self> {
            let scratch = tempfile::tempdir()?;
            let sandboxes = scratch.path().join("sandboxes");
            let downloads = scratch.path().join("downloads");
            fs::create_dir(&sandboxes)?;
            fs::create_dir(&downloads)?;
            Ok(Self {
                _scratch: scratch,
                sandboxes,
                downloads,
            })
        }

        fn launcher<'a>(
            &self,
            transport: &TestHelperTransport,
            syscall: &'a TestHelperSyscall,
        ) -> Launcher<'a> {
            Launcher::new(Box::new(transport.clone()), syscall)
                .with_config(RegistryConfig {
                    download_dir: self.downloads.clone(),
                    ..Default::default()
                })
                .with_sandbox_parent(&self.sandboxes)
        }
    }

    fn busybox() -> ImageReference {
        ImageReference::parse("busybox").unwrap()
    }

    fn registry(manifest_status: u16, manifest_body: String) -> Result<TestHelperTransport> {
        Ok(TestHelperTransport::default()
            .with_response(TOKEN_URL, 200, r#"{"token": "t0k3n"}"#)
            .with_response(MANIFEST_URL, manifest_status, manifest_body)
            .with_response(blob_url(), 200, sample_layer()?))
    }

    #[test]
    fn test_launch_runs_every_stage_in_order() -> Result<()> {
        let fixture = Fixture::new()?;
        let other_layer = format!("sha256:{}", "a".repeat(64));
        let transport = registry(200, manifest(&[LAYER_DIGEST, &other_layer]))?;
        let syscall = TestHelperSyscall::default();

        let outcome = fixture.launcher(&transport, &syscall).launch(
            &busybox(),
            "/bin/sh",
            &["-c".to_string(), "exit 7".to_string()],
        )?;
        assert_eq!(outcome, Outcome::Exited(7));
        assert_eq!(outcome.exit_code(), 7);

        // only the first layer is ever requested
        assert_eq!(
            transport.get_request_urls(),
            vec![TOKEN_URL.to_string(), MANIFEST_URL.to_string(), blob_url()]
        );
        for request in &transport.get_requests()[1..] {
            assert_eq!(request.header_value("Authorization"), Some("Bearer t0k3n"));
        }

        let chroots = syscall.get_chroot_args();
        assert_eq!(chroots.len(), 1);
        let root = &chroots[0];
        assert!(root.starts_with(&fixture.sandboxes));
        assert!(root.join("etc/motd").is_file());
        assert!(root.join("bin/sh").is_file());
        assert_eq!(
            syscall.get_unshare_args(),
            vec![CloneFlags::CLONE_NEWNS | CloneFlags::CLONE_NEWUTS | CloneFlags::CLONE_NEWPID]
        );

        // the archive does not outlive extraction
        assert_eq!(fs::read_dir(&fixture.downloads)?.count(), 0);
        Ok(())
    }

    #[test]
    fn test_manifest_not_found_skips_download() -> Result<()> {
        let fixture = Fixture::new()?;
        let transport = registry(404, String::new())?;
        let syscall = TestHelperSyscall::default();

        let err = fixture
            .launcher(&transport, &syscall)
            .launch(&busybox(), "/bin/sh", &[])
            .unwrap_err();
        assert!(matches!(
            err,
            LaunchError::Manifest(RegistryError::UnexpectedStatus { status: 404, .. })
        ));

        assert_eq!(
            transport.get_request_urls(),
            vec![TOKEN_URL.to_string(), MANIFEST_URL.to_string()]
        );
        assert!(syscall.get_chroot_args().is_empty());
        assert!(syscall.get_unshare_args().is_empty());
        assert_eq!(fs::read_dir(&fixture.sandboxes)?.count(), 0);
        assert_eq!(fs::read_dir(&fixture.downloads)?.count(), 0);
        Ok(())
    }

    #[test]
    fn test_directory_command_fails_before_network() -> Result<()> {
        let fixture = Fixture::new()?;
        let transport = registry(200, manifest(&[LAYER_DIGEST]))?;
        let syscall = TestHelperSyscall::default();

        let err = fixture
            .launcher(&transport, &syscall)
            .launch(&busybox(), fixture.downloads.to_str().unwrap(), &[])
            .unwrap_err();
        assert!(matches!(
            err,
            LaunchError::Command(SandboxError::NotRegularFile(_))
        ));
        assert!(transport.get_requests().is_empty());
        assert_eq!(fs::read_dir(&fixture.sandboxes)?.count(), 0);
        Ok(())
    }

    #[test]
    fn test_token_failure_removes_sandbox() -> Result<()> {
        let fixture = Fixture::new()?;
        let transport = TestHelperTransport::default().with_response(TOKEN_URL, 503, "");
        let syscall = TestHelperSyscall::default();

        let err = fixture
            .launcher(&transport, &syscall)
            .launch(&busybox(), "/bin/sh", &[])
            .unwrap_err();
        assert!(matches!(
            err,
            LaunchError::Token(RegistryError::UnexpectedStatus { status: 503, .. })
        ));
        assert_eq!(transport.get_request_urls(), vec![TOKEN_URL.to_string()]);
        assert_eq!(fs::read_dir(&fixture.sandboxes)?.count(), 0);
        Ok(())
    }

    #[test]
    fn test_corrupt_layer_fails_extraction() -> Result<()> {
        let fixture = Fixture::new()?;
        let transport = registry(200, manifest(&[LAYER_DIGEST]))?
            .with_response(blob_url(), 200, "not a tarball");
        let syscall = TestHelperSyscall::default();

        let err = fixture
            .launcher(&transport, &syscall)
            .launch(&busybox(), "/bin/sh", &[])
            .unwrap_err();
        assert!(matches!(err, LaunchError::Extract(_)));
        assert!(syscall.get_chroot_args().is_empty());
        assert_eq!(fs::read_dir(&fixture.sandboxes)?.count(), 0);
        assert_eq!(fs::read_dir(&fixture.downloads)?.count(), 0);
        Ok(())
    }

    #[test]
    fn test_error_messages_name_the_stage() {
        let err = LaunchError::Manifest(RegistryError::UnexpectedStatus {
            what: "manifest",
            status: 404,
            reason: "Not Found".to_string(),
        });
        let chain = format!("{:#}", anyhow::Error::from(err));
        assert_eq!(
            chain,
            "cannot get manifest: cannot get manifest, status: 404 Not Found"
        );
    }
}
