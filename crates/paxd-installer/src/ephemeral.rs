use std::path::PathBuf;
use std::process::Stdio;

use paxd_core::{PackageManifest, PackageSource};
use paxd_resolver::resolve_install_plan;
use tracing::{debug, info, warn};

use crate::alias::{AliasGuard, ShimAliasRegistry};
use crate::backends::BackendSet;
use crate::error::InstallError;
use crate::launch::Launcher;
use crate::layout::PrefixLayout;
use crate::orchestrator::{InstallOptions, InstallTarget, Orchestrator};
use crate::process::{wait_cancellable, CancelToken};

const TEMP_ROOT_PREFIX: &str = "paxd-fastxd-";

/// Runs packages from a throwaway prefix that is deleted when the run ends,
/// however it ends.
pub struct EphemeralRuntime<'a> {
    source: &'a dyn PackageSource,
    backends: &'a BackendSet,
    launcher: Launcher,
    temp_parent: Option<PathBuf>,
    cancel: CancelToken,
    options: InstallOptions,
}

impl<'a> EphemeralRuntime<'a> {
    pub fn new(source: &'a dyn PackageSource, backends: &'a BackendSet, launcher: Launcher) -> Self {
        Self {
            source,
            backends,
            launcher,
            temp_parent: None,
            cancel: CancelToken::new(),
            options: InstallOptions::default(),
        }
    }

    /// Directory the temporary roots are created in; the system temp
    /// directory when unset.
    pub fn with_temp_parent(mut self, parent: impl Into<PathBuf>) -> Self {
        self.temp_parent = Some(parent.into());
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_options(mut self, options: InstallOptions) -> Self {
        self.options = options;
        self
    }

    /// Installs `manifest` and its dependencies into a fresh temporary root,
    /// runs its main executable with `args` and returns the exit code.
    pub fn run(
        &self,
        package_id: &str,
        manifest: &PackageManifest,
        args: &[String],
    ) -> Result<i32, InstallError> {
        if !manifest.install.supports_fastxd {
            return Err(InstallError::FastxdUnsupported(package_id.to_string()));
        }
        let Some(entry) = manifest.install.entry_point.as_ref() else {
            return Err(InstallError::NoMainExecutable(package_id.to_string()));
        };

        let plan = resolve_install_plan(package_id, manifest, |id| self.source.load_manifest(id))?;

        let mut builder = tempfile::Builder::new();
        builder.prefix(TEMP_ROOT_PREFIX);
        let temp_root = match &self.temp_parent {
            Some(parent) => builder.tempdir_in(parent),
            None => builder.tempdir(),
        }
        .map_err(|err| anyhow::Error::new(err).context("failed to create temporary root"))?;
        debug!(root = %temp_root.path().display(), package = package_id, "created temporary root");

        let layout = PrefixLayout::new(temp_root.path());
        let aliases = ShimAliasRegistry::new(layout.clone(), self.launcher.clone());
        let exit_code = {
            let orchestrator = Orchestrator::new(
                InstallTarget::ephemeral(layout),
                self.source,
                self.backends,
                &aliases,
            )
            .with_cancel(self.cancel.clone())
            .with_options(self.options);
            let report = orchestrator.install(&plan)?;
            for issue in &report.issues {
                warn!(package = package_id, "{issue}");
            }
            let _alias = report
                .record
                .alias
                .as_ref()
                .map(|binding| AliasGuard::new(&aliases, &binding.alias, package_id));

            let executable = report.record.install_root.join(&entry.main_executable);
            let mut cmd = self.launcher.command(&executable, args);
            cmd.stdin(Stdio::inherit())
                .stdout(Stdio::inherit())
                .stderr(Stdio::inherit());
            info!(package = package_id, executable = %executable.display(), "running temporary install");

            let mut child = cmd.spawn().map_err(|source| InstallError::Launch {
                program: self.launcher.program_for(&executable),
                source,
            })?;
            let status = wait_cancellable(&mut child, &self.cancel)
                .map_err(|err| anyhow::Error::new(err).context("failed to wait for package"))?
                .ok_or(InstallError::Cancelled)?;
            status.code().unwrap_or(1)
        };

        let root_path = temp_root.path().to_path_buf();
        if let Err(err) = temp_root.close() {
            warn!(root = %root_path.display(), "failed to remove temporary root: {err}");
        } else {
            debug!(root = %root_path.display(), "removed temporary root");
        }
        Ok(exit_code)
    }
}
