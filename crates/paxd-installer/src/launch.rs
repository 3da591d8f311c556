use std::collections::BTreeMap;
use std::path::Path;
use std::process::Command;

/// Chooses how a package's main executable is started, keyed by file
/// extension (`py` -> `python`). Unmapped files are executed directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Launcher {
    interpreters: BTreeMap<String, String>,
}

impl Default for Launcher {
    fn default() -> Self {
        let python = if cfg!(windows) { "python" } else { "python3" };
        Self::new(BTreeMap::from([
            ("py".to_string(), python.to_string()),
            ("js".to_string(), "node".to_string()),
            ("ps1".to_string(), "powershell".to_string()),
        ]))
    }
}

impl Launcher {
    pub fn new(interpreters: BTreeMap<String, String>) -> Self {
        Self { interpreters }
    }

    /// Default mapping with `overrides` applied on top.
    pub fn with_overrides(overrides: &BTreeMap<String, String>) -> Self {
        let mut launcher = Self::default();
        for (extension, program) in overrides {
            launcher
                .interpreters
                .insert(extension.trim_start_matches('.').to_ascii_lowercase(), program.clone());
        }
        launcher
    }

    pub fn interpreter_for(&self, target: &Path) -> Option<&str> {
        let extension = target.extension()?.to_str()?.to_ascii_lowercase();
        self.interpreters.get(&extension).map(String::as_str)
    }

    pub fn command(&self, target: &Path, args: &[String]) -> Command {
        let mut cmd = match self.interpreter_for(target) {
            Some(interpreter) => {
                let mut cmd = Command::new(interpreter);
                cmd.arg(target);
                cmd
            }
            None => Command::new(target),
        };
        cmd.args(args);
        cmd
    }

    /// Program name shown in errors when `target` fails to start.
    pub fn program_for(&self, target: &Path) -> String {
        self.interpreter_for(target)
            .map(ToString::to_string)
            .unwrap_or_else(|| target.display().to_string())
    }
}
