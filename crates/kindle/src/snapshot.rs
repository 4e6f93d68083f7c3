//! Choosing, loading and building startup snapshots.

use std::fs;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

use kindle_config::{DEFAULT_SNAPSHOT_BLOB, EmbeddedSnapshotPolicy, HostOptions};
use kindle_snapshot::{
    BlobError, PackageError, PackagedResource, SnapshotConfig, SnapshotConfigError, SnapshotData,
    SnapshotError, SnapshotMetadata,
};

use crate::engine::{Engine, EngineError};
use crate::exit_code::ExitCode;
use crate::options::ParsedOptions;
use crate::validation::ValidationError;

const SNAPSHOT_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::snapshot");

/// Origin reported for a snapshot carried by a packaged executable.
pub const PACKAGE_ORIGIN: &str = "packaged application";
/// Origin reported for the snapshot linked into the engine.
pub const EMBEDDED_ORIGIN: &str = "embedded snapshot";

/// Failures while resolving or building a snapshot.
#[derive(Debug, Error)]
pub enum SnapshotFailure {
    /// The executable's package trailer is damaged.
    #[error(transparent)]
    Package(#[from] PackageError),
    /// A blob could not be read or failed validation.
    #[error(transparent)]
    Load(SnapshotError),
    /// `--embedded-snapshot` was given but the engine has none.
    #[error("no embedded snapshot is available")]
    EmbeddedMissing,
    /// `--build-snapshot-config` could not be used.
    #[error(transparent)]
    BuilderConfig(#[from] SnapshotConfigError),
    /// The builder script could not be read.
    #[error("Cannot read builder script {path} for building snapshot. {source}")]
    BuilderScript {
        /// Script path.
        path: Utf8PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },
    /// The embedded builder was requested but there is nothing to export.
    #[error("--build-snapshot with the embedded builder needs an engine with an embedded snapshot")]
    NothingToExport,
    /// No builder script was named.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// The builder ran and failed.
    #[error("snapshot builder failed: {0}")]
    Builder(#[source] EngineError),
    /// The engine state could not be encoded.
    #[error("cannot encode snapshot: {0}")]
    Encode(#[source] BlobError),
    /// The blob could not be written.
    #[error(transparent)]
    Write(SnapshotError),
}

impl SnapshotFailure {
    /// Exit status for this failure.
    #[must_use]
    pub const fn exit_code(&self) -> ExitCode {
        match self {
            Self::Package(_)
            | Self::Load(_)
            | Self::EmbeddedMissing
            | Self::Encode(_)
            | Self::Write(_) => ExitCode::StartupSnapshotFailure,
            Self::BuilderConfig(_) | Self::BuilderScript { .. } => ExitCode::GenericUserError,
            Self::NothingToExport => ExitCode::InvalidCommandLineArgument,
            Self::Validation(error) => error.exit_code(),
            Self::Builder(EngineError::BuilderExit(code)) => ExitCode::Script(*code),
            Self::Builder(_) => ExitCode::GenericUserError,
        }
    }
}

/// Where the snapshot in use came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotSource {
    /// The packaged executable's trailer.
    Package,
    /// A `--snapshot-blob` file.
    File(Utf8PathBuf),
    /// The engine's linked-in snapshot.
    Embedded,
}

/// A snapshot chosen for the main instance.
#[derive(Debug)]
pub struct ResolvedSnapshot {
    /// The validated blob.
    pub data: SnapshotData,
    /// Where it came from.
    pub source: SnapshotSource,
}

/// A blob written in build mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltSnapshot {
    /// Destination file.
    pub path: Utf8PathBuf,
    /// Bytes written.
    pub len: usize,
    /// The blob was built deterministically.
    pub predictable: bool,
}

/// Resolves and builds snapshots for one host and engine.
#[derive(Debug, Clone)]
pub struct SnapshotManager {
    host: SnapshotMetadata,
}

impl SnapshotManager {
    /// Manager for the running host and `engine_tag`.
    #[must_use]
    pub fn new(engine_tag: &str) -> Self {
        Self::with_metadata(SnapshotMetadata::for_host(env!("CARGO_PKG_VERSION"), engine_tag))
    }

    /// Manager comparing blobs against `host`.
    #[must_use]
    pub const fn with_metadata(host: SnapshotMetadata) -> Self {
        Self { host }
    }

    /// Metadata written into built blobs.
    #[must_use]
    pub const fn host(&self) -> &SnapshotMetadata {
        &self.host
    }

    fn compatible(&self, data: SnapshotData, origin: &str) -> Result<SnapshotData, SnapshotError> {
        data.check_compatible(&self.host)
            .map(|()| data)
            .map_err(|source| SnapshotError::Invalid {
                origin: origin.to_owned(),
                source,
            })
    }

    /// Picks the snapshot for run mode. First match wins: a packaged
    /// snapshot, `--snapshot-blob`, then the embedded snapshot unless
    /// disabled.
    ///
    /// An implicit embedded snapshot that fails validation is skipped with a
    /// warning. Every explicit request fails loudly.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotFailure`] when an explicitly requested snapshot is
    /// missing, unreadable or invalid.
    pub fn resolve(
        &self,
        package: Option<&PackagedResource>,
        options: &HostOptions,
        embedded: Option<&'static [u8]>,
    ) -> Result<Option<ResolvedSnapshot>, SnapshotFailure> {
        if let Some(PackagedResource::Snapshot(data)) = package {
            let data = self
                .compatible(data.clone(), PACKAGE_ORIGIN)
                .map_err(SnapshotFailure::Load)?;
            return Ok(Some(ResolvedSnapshot {
                data,
                source: SnapshotSource::Package,
            }));
        }

        if package.is_none() {
            if let Some(path) = options.snapshot_blob.as_deref() {
                let data = SnapshotData::from_file(path)
                    .and_then(|data| self.compatible(data, path.as_str()))
                    .map_err(SnapshotFailure::Load)?;
                debug!(target: SNAPSHOT_TARGET, path = %path, "loaded snapshot blob");
                return Ok(Some(ResolvedSnapshot {
                    data,
                    source: SnapshotSource::File(path.to_path_buf()),
                }));
            }
        }

        let policy = options.embedded_snapshot_policy();
        if policy == EmbeddedSnapshotPolicy::Disabled {
            return Ok(None);
        }
        let Some(bytes) = embedded else {
            return match policy {
                EmbeddedSnapshotPolicy::Required => Err(SnapshotFailure::EmbeddedMissing),
                _ => Ok(None),
            };
        };
        let loaded = SnapshotData::from_static(bytes)
            .map_err(|source| SnapshotError::Invalid {
                origin: EMBEDDED_ORIGIN.to_owned(),
                source,
            })
            .and_then(|data| self.compatible(data, EMBEDDED_ORIGIN));
        match (loaded, policy) {
            (Ok(data), _) => Ok(Some(ResolvedSnapshot {
                data,
                source: SnapshotSource::Embedded,
            })),
            (Err(error), EmbeddedSnapshotPolicy::Required) => Err(SnapshotFailure::Load(error)),
            (Err(error), _) => {
                warn!(target: SNAPSHOT_TARGET, error = %error, "ignoring unusable embedded snapshot");
                Ok(None)
            }
        }
    }

    /// Runs the builder and writes the blob.
    ///
    /// The builder comes from `--build-snapshot-config` when given, else
    /// from the entry script position. The output goes to `--snapshot-blob`
    /// or `snapshot.blob` in the working directory.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotFailure`] if the builder cannot be read or run, or
    /// the blob cannot be written.
    pub fn build(
        &self,
        engine: &mut dyn Engine,
        parsed: &ParsedOptions,
        predictable: bool,
    ) -> Result<BuiltSnapshot, SnapshotFailure> {
        let options = &parsed.options;
        let (config, args) = match options.build_snapshot_config.as_deref() {
            Some(path) => {
                let config = SnapshotConfig::from_file(path)?;
                let args = patch_builder_args(&parsed.args, &config);
                (config, args)
            }
            None => {
                let builder = parsed
                    .entry_script()
                    .ok_or(ValidationError::MissingBuilder)?;
                (SnapshotConfig::for_script(Utf8Path::new(builder)), parsed.args.clone())
            }
        };
        let path = options
            .snapshot_blob
            .clone()
            .unwrap_or_else(|| Utf8PathBuf::from(DEFAULT_SNAPSHOT_BLOB));

        let data = if config.uses_embedded_builder() {
            let bytes = engine
                .embedded_snapshot()
                .ok_or(SnapshotFailure::NothingToExport)?;
            SnapshotData::from_static(bytes).map_err(|source| {
                SnapshotFailure::Load(SnapshotError::Invalid {
                    origin: EMBEDDED_ORIGIN.to_owned(),
                    source,
                })
            })?
        } else {
            let source = fs::read_to_string(&config.builder).map_err(|source| {
                SnapshotFailure::BuilderScript {
                    path: config.builder.clone(),
                    source,
                }
            })?;
            let payload = engine
                .generate_snapshot(&source, &args, &parsed.exec_args, &config)
                .map_err(SnapshotFailure::Builder)?;
            SnapshotData::new(&self.host, predictable, &payload).map_err(SnapshotFailure::Encode)?
        };

        data.to_file(&path).map_err(SnapshotFailure::Write)?;
        info!(
            target: SNAPSHOT_TARGET,
            path = %path,
            bytes = data.as_bytes().len(),
            predictable = data.is_predictable(),
            "snapshot written"
        );
        Ok(BuiltSnapshot {
            path,
            len: data.as_bytes().len(),
            predictable: data.is_predictable(),
        })
    }
}

/// Argument vector seen by a builder named in a config file: `argv[0]`,
/// the builder, the configured arguments, then whatever followed the
/// options on the command line.
#[must_use]
pub fn patch_builder_args(args: &[String], config: &SnapshotConfig) -> Vec<String> {
    let (program, rest) = match args.split_first() {
        Some((program, rest)) => (program.clone(), rest),
        None => (kindle_config::PROGRAM_NAME.to_owned(), &[][..]),
    };
    let mut patched = Vec::with_capacity(args.len() + config.args.len() + 1);
    patched.push(program);
    patched.push(config.builder.to_string());
    patched.extend(config.args.iter().cloned());
    patched.extend(rest.iter().cloned());
    patched
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{BindingEngine, SharedWriter};
    use rstest::{fixture, rstest};
    use std::io::sink;
    use tempfile::TempDir;

    const TAG: &str = "binding-1";

    struct Workspace {
        _dir: TempDir,
        root: Utf8PathBuf,
    }

    impl Workspace {
        fn write(&self, name: &str, contents: &[u8]) -> Utf8PathBuf {
            let path = self.root.join(name);
            fs::write(&path, contents).expect("write fixture");
            path
        }
    }

    #[fixture]
    fn workspace() -> Workspace {
        let dir = TempDir::new().expect("temporary directory");
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("UTF-8 path");
        Workspace { _dir: dir, root }
    }

    fn manager() -> SnapshotManager {
        SnapshotManager::new(TAG)
    }

    fn blob(manager: &SnapshotManager, payload: &[u8]) -> Vec<u8> {
        SnapshotData::new(manager.host(), false, payload)
            .expect("encode")
            .as_bytes()
            .to_vec()
    }

    fn leak(bytes: Vec<u8>) -> &'static [u8] {
        Box::leak(bytes.into_boxed_slice())
    }

    fn engine() -> BindingEngine {
        let mut engine = BindingEngine::new(SharedWriter::new(sink()), SharedWriter::new(sink()));
        engine.set_flags_from_command_line(&["--random-seed=1".to_owned()]);
        engine.initialize_platform(1).expect("platform");
        engine.initialize().expect("engine");
        engine
    }

    fn parsed(args: &[&str], configure: impl FnOnce(&mut HostOptions)) -> ParsedOptions {
        let args: Vec<String> = args.iter().map(|arg| (*arg).to_owned()).collect();
        let mut parsed = ParsedOptions::passthrough(&args);
        configure(&mut parsed.options);
        parsed
    }

    #[rstest]
    fn patches_builder_arguments() {
        let config = SnapshotConfig {
            builder: "build.ks".into(),
            args: vec!["--mode".to_owned(), "full".to_owned()],
            without_code_cache: false,
        };
        let args = vec!["kindle".to_owned(), "extra".to_owned()];
        assert_eq!(
            patch_builder_args(&args, &config),
            ["kindle", "build.ks", "--mode", "full", "extra"]
        );
    }

    #[rstest]
    fn nothing_configured_means_no_snapshot() {
        let resolved = manager()
            .resolve(None, &HostOptions::default(), None)
            .expect("resolution");
        assert!(resolved.is_none());
    }

    #[rstest]
    fn blob_file_wins_over_embedded(workspace: Workspace) {
        let manager = manager();
        let path = workspace.write("app.blob", &blob(&manager, b"{}"));
        let embedded = leak(blob(&manager, b"{\"embedded\":true}"));
        let mut options = HostOptions::default();
        options.snapshot_blob = Some(path.clone());

        let resolved = manager
            .resolve(None, &options, Some(embedded))
            .expect("resolution")
            .expect("a snapshot");
        assert_eq!(resolved.source, SnapshotSource::File(path));
    }

    #[rstest]
    fn missing_blob_file_is_fatal(workspace: Workspace) {
        let mut options = HostOptions::default();
        options.snapshot_blob = Some(workspace.root.join("absent.blob"));
        let error = manager()
            .resolve(None, &options, None)
            .expect_err("missing file");
        assert_eq!(error.exit_code(), ExitCode::StartupSnapshotFailure);
        assert!(error.to_string().starts_with("Cannot open"));
    }

    #[rstest]
    fn implicit_embedded_snapshot_degrades_quietly() {
        let corrupt = leak(b"not a snapshot".to_vec());
        let resolved = manager()
            .resolve(None, &HostOptions::default(), Some(corrupt))
            .expect("implicit failure is tolerated");
        assert!(resolved.is_none());
    }

    #[rstest]
    fn required_embedded_snapshot_must_validate() {
        let corrupt = leak(b"not a snapshot".to_vec());
        let mut options = HostOptions::default();
        options.embedded_snapshot = true;
        let error = manager()
            .resolve(None, &options, Some(corrupt))
            .expect_err("explicit failure");
        assert_eq!(error.exit_code(), ExitCode::StartupSnapshotFailure);
    }

    #[rstest]
    fn disabled_embedded_snapshot_is_ignored() {
        let manager = manager();
        let embedded = leak(blob(&manager, b"{}"));
        let mut options = HostOptions::default();
        options.no_embedded_snapshot = true;
        assert!(
            manager
                .resolve(None, &options, Some(embedded))
                .expect("resolution")
                .is_none()
        );
    }

    #[rstest]
    fn incompatible_engine_tag_is_rejected(workspace: Workspace) {
        let other = SnapshotManager::new("other-engine");
        let path = workspace.write("other.blob", &blob(&other, b"{}"));
        let mut options = HostOptions::default();
        options.snapshot_blob = Some(path);
        let error = manager()
            .resolve(None, &options, None)
            .expect_err("tag mismatch");
        assert!(error.to_string().contains("engine tag"));
    }

    #[rstest]
    fn builds_from_the_entry_script(workspace: Workspace) {
        let builder = workspace.write("build.ks", b"let answer = 42\n");
        let output = workspace.root.join("out.blob");
        let parsed = parsed(&["kindle", builder.as_str()], |options| {
            options.build_snapshot = true;
            options.snapshot_blob = Some(output.clone());
        });
        let manager = manager();
        let built = manager
            .build(&mut engine(), &parsed, true)
            .expect("build");
        assert_eq!(built.path, output);
        assert!(built.predictable);

        let data = SnapshotData::from_file(&output).expect("written blob");
        assert_eq!(data.payload(), br#"{"answer":42}"#);
    }

    #[rstest]
    fn unreadable_builder_is_a_user_error(workspace: Workspace) {
        let missing = workspace.root.join("missing.ks");
        let parsed = parsed(&["kindle", missing.as_str()], |options| {
            options.build_snapshot = true;
        });
        let error = manager()
            .build(&mut engine(), &parsed, false)
            .expect_err("missing builder");
        assert_eq!(error.exit_code(), ExitCode::GenericUserError);
        assert!(error.to_string().starts_with("Cannot read builder script"));
    }

    #[rstest]
    fn embedded_builder_without_snapshot_is_rejected(workspace: Workspace) {
        let config = workspace.write(
            "snapshot.json",
            br#"{"builder":"kindle:embedded_snapshot_main"}"#,
        );
        let parsed = parsed(&["kindle"], |options| {
            options.build_snapshot = true;
            options.build_snapshot_config = Some(config.clone());
        });
        let error = manager()
            .build(&mut engine(), &parsed, false)
            .expect_err("nothing to export");
        assert_eq!(error.exit_code(), ExitCode::InvalidCommandLineArgument);
    }
}
