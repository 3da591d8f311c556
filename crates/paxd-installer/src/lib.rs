mod alias;
mod backends;
mod ephemeral;
mod error;
mod fs_utils;
mod hooks;
mod launch;
mod layout;
mod ledger;
mod orchestrator;
mod process;
mod staging;
mod types;
mod uninstall;

pub use alias::{AliasRegistry, ShimAliasRegistry};
pub use backends::{BackendInstaller, BackendSet, CommandBackend};
pub use ephemeral::EphemeralRuntime;
pub use error::{BackendFailure, InstallError};
pub use layout::{default_user_prefix, PrefixLayout};
pub use launch::Launcher;
pub use ledger::{Ledger, PackageLock};
pub use orchestrator::{InstallOptions, InstallTarget, Orchestrator};
pub use process::{run_cancellable, wait_cancellable, CancelToken, ExecResult};
pub use types::{
    AliasBinding, InstallMode, InstallReason, InstallReport, InstalledPackageRecord, MarkerState,
    ResolvedDependency, ScanEntry, UninstallResult, UninstallStatus, UpdateOutcome, UpdatePolicy,
};
pub use uninstall::uninstall_package;
