use std::io;
use std::sync::Mutex;

use anyhow::{anyhow, bail, Context, Result};
use paxd_core::PackageSource;
use paxd_installer::{
    uninstall_package, BackendSet, CancelToken, EphemeralRuntime, InstallError, InstallOptions,
    InstallTarget, Launcher, Ledger, Orchestrator, PrefixLayout, ShimAliasRegistry,
    UninstallStatus, UpdatePolicy,
};
use paxd_registry::Registry;
use tracing::debug;

use crate::completion::write_completions_script;
use crate::config::{load_config, resolve_prefix, PaxdConfig, PREFIX_ENV};
use crate::render::{
    current_output_style, format_doctor_lines, format_info_lines, format_install_report_lines,
    format_list_lines, format_plan_lines, format_uninstall_lines, format_update_outcome_lines,
    print_lines, render_status_line, OutputStyle, Spinner,
};
use crate::{Cli, Commands};

/// Prefix, configuration and registry choice for one invocation.
pub(crate) struct Session {
    layout: PrefixLayout,
    config: PaxdConfig,
    registry_override: Option<String>,
}

impl Session {
    pub(crate) fn open(cli: &Cli) -> Result<Self> {
        let prefix = resolve_prefix(cli.prefix.clone(), std::env::var_os(PREFIX_ENV))?;
        let layout = PrefixLayout::new(prefix);
        let config = load_config(&layout.config_path())?;
        debug!(prefix = %layout.prefix().display(), "session opened");
        Ok(Self {
            layout,
            config,
            registry_override: cli.registry.clone(),
        })
    }

    pub(crate) fn layout(&self) -> &PrefixLayout {
        &self.layout
    }

    pub(crate) fn registry_location(&self) -> Option<&str> {
        self.registry_override
            .as_deref()
            .or(self.config.registry.as_deref())
    }

    fn registry(&self) -> Result<Registry> {
        let location = self.registry_location().ok_or_else(|| {
            anyhow!(
                "no registry configured: pass --registry or set `registry` in {}",
                self.layout.config_path().display()
            )
        })?;
        Registry::open(location)
            .with_context(|| format!("failed to open registry: {location}"))
    }

    fn backends(&self) -> BackendSet {
        BackendSet::with_defaults(&self.config.backends)
    }

    fn launcher(&self) -> Launcher {
        Launcher::with_overrides(&self.config.interpreters)
    }
}

pub(crate) fn run_cli(cli: Cli) -> Result<i32> {
    let session = Session::open(&cli)?;
    let style = current_output_style();

    match cli.command {
        Commands::Install {
            package,
            skip_checksum,
            dry_run,
        } => run_install_command(&session, &package, skip_checksum, dry_run, style),
        Commands::Update {
            package,
            force,
            skip_checksum,
        } => run_update_command(&session, &package, force, skip_checksum, style),
        Commands::Uninstall { package } => run_uninstall_command(&session, &package, style),
        Commands::List => {
            let records = Ledger::new(session.layout().clone()).list()?;
            print_lines(&format_list_lines(&records));
            Ok(0)
        }
        Commands::Info { package } => {
            let registry = session.registry()?;
            let manifest = registry
                .load_manifest(&package)?
                .ok_or_else(|| InstallError::PackageNotFound(package.clone()))?;
            let installed = Ledger::new(session.layout().clone()).get(&package)?;
            print_lines(&format_info_lines(&package, &manifest, installed.as_ref()));
            Ok(0)
        }
        Commands::Run {
            package,
            skip_checksum,
            args,
        } => run_ephemeral_command(&session, &package, &args, skip_checksum, style),
        Commands::Export => {
            let entries = Ledger::new(session.layout().clone()).scan_export()?;
            let json =
                serde_json::to_string_pretty(&entries).context("failed to encode export")?;
            println!("{json}");
            Ok(0)
        }
        Commands::Completions { shell } => {
            let mut stdout = io::stdout().lock();
            write_completions_script(shell, session.layout(), &mut stdout)?;
            Ok(0)
        }
        Commands::Doctor => {
            let held_locks = Ledger::new(session.layout().clone()).held_locks()?;
            let path_var = std::env::var_os("PATH");
            print_lines(&format_doctor_lines(
                session.layout(),
                session.registry_location(),
                &held_locks,
                path_var.as_deref(),
                style,
            ));
            Ok(0)
        }
    }
}

fn run_install_command(
    session: &Session,
    package: &str,
    skip_checksum: bool,
    dry_run: bool,
    style: OutputStyle,
) -> Result<i32> {
    let registry = session.registry()?;
    let backends = session.backends();
    let aliases = ShimAliasRegistry::new(session.layout().clone(), session.launcher());
    let orchestrator = Orchestrator::new(
        InstallTarget::persistent(session.layout().clone()),
        &registry,
        &backends,
        &aliases,
    )
    .with_cancel(interrupt_token()?)
    .with_options(InstallOptions { skip_checksum });

    let spinner = Spinner::start(style, &format!("resolving {package}"));
    let plan = orchestrator.plan_for(package);
    spinner.finish();
    let plan = plan?;

    if dry_run {
        let ledger = orchestrator.ledger();
        let plan = plan.without_packages(|id| ledger.contains(id));
        print_lines(&format_plan_lines(&plan));
        return Ok(0);
    }
    if skip_checksum {
        println!(
            "{}",
            render_status_line(style, "warn", "checksum verification disabled")
        );
    }

    let spinner = Spinner::start(style, &format!("installing {package}"));
    let report = orchestrator.install(&plan);
    spinner.finish();
    print_lines(&format_install_report_lines(&report?, style));
    Ok(0)
}

fn run_update_command(
    session: &Session,
    package: &str,
    force: bool,
    skip_checksum: bool,
    style: OutputStyle,
) -> Result<i32> {
    let registry = session.registry()?;
    let backends = session.backends();
    let aliases = ShimAliasRegistry::new(session.layout().clone(), session.launcher());
    let orchestrator = Orchestrator::new(
        InstallTarget::persistent(session.layout().clone()),
        &registry,
        &backends,
        &aliases,
    )
    .with_cancel(interrupt_token()?)
    .with_options(InstallOptions { skip_checksum });

    let record = orchestrator
        .ledger()
        .get(package)?
        .ok_or_else(|| InstallError::NotInstalled(package.to_string()))?;
    let policy = if force {
        UpdatePolicy::Force
    } else {
        UpdatePolicy::NewerOnly
    };

    let spinner = Spinner::start(style, &format!("updating {package}"));
    let outcome = orchestrator
        .plan_for(package)
        .and_then(|plan| orchestrator.update(&record, &plan, policy));
    spinner.finish();
    print_lines(&format_update_outcome_lines(package, &outcome?, style));
    Ok(0)
}

fn run_uninstall_command(session: &Session, package: &str, style: OutputStyle) -> Result<i32> {
    let ledger = Ledger::new(session.layout().clone());
    let aliases = ShimAliasRegistry::new(session.layout().clone(), session.launcher());
    let result = uninstall_package(&ledger, &aliases, package)?;
    print_lines(&format_uninstall_lines(&result, style));
    if result.status == UninstallStatus::BlockedByDependents {
        bail!(
            "package '{package}' is still required by {}",
            result.blocked_by.join(", ")
        );
    }
    Ok(0)
}

fn run_ephemeral_command(
    session: &Session,
    package: &str,
    args: &[String],
    skip_checksum: bool,
    style: OutputStyle,
) -> Result<i32> {
    let registry = session.registry()?;
    let backends = session.backends();
    let manifest = registry
        .load_manifest(package)?
        .ok_or_else(|| InstallError::PackageNotFound(package.to_string()))?;

    let mut runtime = EphemeralRuntime::new(&registry, &backends, session.launcher())
        .with_cancel(interrupt_token()?)
        .with_options(InstallOptions { skip_checksum });
    if let Some(parent) = &session.config.temp_dir {
        runtime = runtime.with_temp_parent(parent);
    }

    if style == OutputStyle::Rich {
        eprintln!(
            "{}",
            render_status_line(style, "step", &format!("running {package} from a temporary install"))
        );
    }
    let code = runtime.run(package, &manifest, args)?;
    debug!(package, code, "temporary run finished");
    Ok(code)
}

/// Ctrl-C cancels the running operation. The handler is installed once per
/// process and shared by every command.
fn interrupt_token() -> Result<CancelToken> {
    static TOKEN: Mutex<Option<CancelToken>> = Mutex::new(None);
    let mut slot = TOKEN
        .lock()
        .map_err(|_| anyhow!("interrupt handler state is poisoned"))?;
    if let Some(token) = slot.as_ref() {
        return Ok(token.clone());
    }

    let token = CancelToken::new();
    let handler_token = token.clone();
    ctrlc::set_handler(move || handler_token.cancel())
        .context("failed to install Ctrl-C handler")?;
    *slot = Some(token.clone());
    Ok(token)
}
