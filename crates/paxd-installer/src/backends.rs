use std::collections::BTreeMap;
use std::process::Command;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use paxd_core::Backend;
use rayon::prelude::*;
use tracing::debug;

use crate::process::{run_cancellable, CancelToken};

/// An external package manager. Each identifier is installed as an isolated
/// operation so one failure never hides the others.
pub trait BackendInstaller: Send + Sync {
    fn install_one(&self, id: &str, cancel: &CancelToken) -> Result<()>;

    /// One result per id, in input order. Ids run in parallel.
    fn install(&self, ids: &[String], cancel: &CancelToken) -> Vec<(String, Result<()>)> {
        ids.par_iter()
            .map(|id| (id.clone(), self.install_one(id, cancel)))
            .collect()
    }
}

/// Installs by running `<program> <args_before..> <id> <args_after..>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandBackend {
    pub backend: Backend,
    pub program: String,
    pub args_before: Vec<String>,
    pub args_after: Vec<String>,
}

impl CommandBackend {
    pub fn default_for(backend: Backend) -> Option<Self> {
        let (program, before, after): (&str, &[&str], &[&str]) = match backend {
            Backend::Pip => ("python", &["-m", "pip", "install", "-q"], &[]),
            Backend::Npm => ("npm", &["install", "-g"], &[]),
            Backend::Winget => (
                "winget",
                &["install", "--id"],
                &[
                    "-e",
                    "--accept-package-agreements",
                    "--accept-source-agreements",
                    "--disable-interactivity",
                ],
            ),
            Backend::Choco => ("choco", &["install"], &["-y"]),
            Backend::Paxd => return None,
        };
        Some(Self {
            backend,
            program: program.to_string(),
            args_before: before.iter().map(ToString::to_string).collect(),
            args_after: after.iter().map(ToString::to_string).collect(),
        })
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn command(&self, id: &str) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args_before).arg(id).args(&self.args_after);
        cmd
    }
}

impl BackendInstaller for CommandBackend {
    fn install_one(&self, id: &str, cancel: &CancelToken) -> Result<()> {
        if cancel.is_cancelled() {
            bail!("cancelled");
        }
        debug!(backend = %self.backend, id, program = %self.program, "running backend installer");
        let result = run_cancellable(&mut self.command(id), cancel)
            .with_context(|| format!("failed to execute: {}", self.program))?
            .ok_or_else(|| anyhow!("cancelled"))?;
        if !result.success {
            let detail = result.stderr.trim();
            let detail = if detail.is_empty() {
                result.stdout.trim()
            } else {
                detail
            };
            bail!(
                "{} exited with code {}: {}",
                self.program,
                result.code.unwrap_or(-1),
                detail
            );
        }
        Ok(())
    }
}

/// Installers keyed by backend.
#[derive(Clone, Default)]
pub struct BackendSet {
    installers: BTreeMap<Backend, Arc<dyn BackendInstaller>>,
}

impl BackendSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Command installers for every external backend, with optional program
    /// overrides.
    pub fn with_defaults(program_overrides: &BTreeMap<Backend, String>) -> Self {
        let mut set = Self::new();
        for backend in Backend::ALL {
            let Some(mut installer) = CommandBackend::default_for(backend) else {
                continue;
            };
            if let Some(program) = program_overrides.get(&backend) {
                installer = installer.with_program(program.clone());
            }
            set.insert(backend, Arc::new(installer));
        }
        set
    }

    pub fn insert(&mut self, backend: Backend, installer: Arc<dyn BackendInstaller>) {
        self.installers.insert(backend, installer);
    }

    pub fn get(&self, backend: Backend) -> Option<&dyn BackendInstaller> {
        self.installers.get(&backend).map(|installer| installer.as_ref())
    }

    pub fn backends(&self) -> impl Iterator<Item = Backend> + '_ {
        self.installers.keys().copied()
    }
}

impl std::fmt::Debug for BackendSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.installers.keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_commands_match_backend_conventions() {
        let pip = CommandBackend::default_for(Backend::Pip).expect("pip has a default");
        let cmd = pip.command("rich");
        assert_eq!(cmd.get_program(), "python");
        assert_eq!(
            cmd.get_args().collect::<Vec<_>>(),
            vec!["-m", "pip", "install", "-q", "rich"]
        );

        let choco = CommandBackend::default_for(Backend::Choco).expect("choco has a default");
        assert_eq!(
            choco.command("git").get_args().collect::<Vec<_>>(),
            vec!["install", "git", "-y"]
        );

        assert!(CommandBackend::default_for(Backend::Paxd).is_none());
    }

    #[test]
    fn program_overrides_apply() {
        let overrides = BTreeMap::from([(Backend::Pip, "python3".to_string())]);
        let set = BackendSet::with_defaults(&overrides);
        assert_eq!(set.backends().count(), 4);
        assert!(set.get(Backend::Paxd).is_none());
        assert!(set.get(Backend::Npm).is_some());
    }

    #[cfg(unix)]
    #[test]
    fn failing_command_reports_exit_code() {
        let backend = CommandBackend {
            backend: Backend::Npm,
            program: "sh".to_string(),
            args_before: vec!["-c".to_string()],
            args_after: Vec::new(),
        };
        let results = backend.install(
            &["exit 0".to_string(), "echo nope >&2; exit 2".to_string()],
            &CancelToken::new(),
        );
        assert!(results[0].1.is_ok());
        let err = results[1].1.as_ref().expect_err("second must fail").to_string();
        assert!(err.contains("code 2") && err.contains("nope"), "{err}");
    }
}
