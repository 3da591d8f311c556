use std::io::IsTerminal;
use std::path::Path;
use std::time::Duration;

use anstyle::{AnsiColor, Effects, Style};
use indicatif::{ProgressBar, ProgressStyle};
use paxd_core::PackageManifest;
use paxd_installer::{
    InstallReason, InstallReport, InstalledPackageRecord, PrefixLayout, UninstallResult,
    UninstallStatus, UpdateOutcome,
};
use paxd_resolver::InstallPlan;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum OutputStyle {
    Plain,
    Rich,
}

pub(crate) fn current_output_style() -> OutputStyle {
    if std::env::var_os("NO_COLOR").is_some() || !std::io::stdout().is_terminal() {
        OutputStyle::Plain
    } else {
        OutputStyle::Rich
    }
}

/// Transient spinner shown while the engine works; absent in plain output.
pub(crate) struct Spinner {
    progress_bar: Option<ProgressBar>,
}

impl Spinner {
    pub(crate) fn start(style: OutputStyle, message: &str) -> Self {
        let progress_bar = (style == OutputStyle::Rich).then(|| {
            let progress_bar = ProgressBar::new_spinner();
            if let Ok(template) = ProgressStyle::with_template("{spinner:.cyan.bold} {msg}") {
                progress_bar.set_style(template.tick_chars(".oO@* "));
            }
            progress_bar.set_message(message.to_string());
            progress_bar.enable_steady_tick(Duration::from_millis(80));
            progress_bar
        });
        Self { progress_bar }
    }

    pub(crate) fn finish(self) {
        if let Some(progress_bar) = self.progress_bar {
            progress_bar.finish_and_clear();
        }
    }
}

pub(crate) fn print_lines(lines: &[String]) {
    for line in lines {
        println!("{line}");
    }
}

pub(crate) fn render_status_line(style: OutputStyle, status: &str, message: &str) -> String {
    match style {
        OutputStyle::Plain => message.to_string(),
        OutputStyle::Rich => {
            let (badge, color) = match status {
                "ok" => ("[OK]", AnsiColor::Green),
                "warn" => ("[WARN]", AnsiColor::Yellow),
                "err" => ("[ERR]", AnsiColor::Red),
                _ => ("[..]", AnsiColor::BrightBlack),
            };
            let style = Style::new()
                .fg_color(Some(color.into()))
                .effects(Effects::BOLD);
            format!("{}{badge}{} {message}", style.render(), style.render_reset())
        }
    }
}

pub(crate) fn format_plan_lines(plan: &InstallPlan) -> Vec<String> {
    let mut lines = vec![format!("install plan for {}:", plan.root)];
    lines.extend(
        plan.operations()
            .iter()
            .map(|operation| format!("  {operation}")),
    );
    lines
}

pub(crate) fn format_install_report_lines(
    report: &InstallReport,
    style: OutputStyle,
) -> Vec<String> {
    let summary = format!(
        "installed {} {} to {}",
        report.record.name,
        report.record.version,
        report.record.install_root.display()
    );
    format_report_lines(report, style, &summary)
}

pub(crate) fn format_update_outcome_lines(
    name: &str,
    outcome: &UpdateOutcome,
    style: OutputStyle,
) -> Vec<String> {
    match outcome {
        UpdateOutcome::Updated { previous, report } => {
            let summary = format!("updated {name} {previous} -> {}", report.record.version);
            format_report_lines(report, style, &summary)
        }
        UpdateOutcome::UpToDate(version) => vec![render_status_line(
            style,
            "step",
            &format!("{name} {version} is up to date"),
        )],
        UpdateOutcome::Downgrade {
            installed,
            available,
        } => vec![render_status_line(
            style,
            "warn",
            &format!(
                "registry has {name} {available}, older than installed {installed}; use --force to downgrade"
            ),
        )],
    }
}

fn format_report_lines(report: &InstallReport, style: OutputStyle, summary: &str) -> Vec<String> {
    let mut lines = Vec::new();
    for dependency in &report.dependencies {
        lines.push(render_status_line(
            style,
            "step",
            &format!(
                "installed dependency {} {}",
                dependency.name, dependency.version
            ),
        ));
    }
    for issue in &report.issues {
        lines.push(render_status_line(style, "warn", &issue.to_string()));
    }
    lines.push(render_status_line(style, "ok", summary));
    if let Some(alias) = &report.record.alias {
        lines.push(render_status_line(
            style,
            "step",
            &format!("command: {}", alias.alias),
        ));
    }
    lines
}

pub(crate) fn format_uninstall_lines(result: &UninstallResult, style: OutputStyle) -> Vec<String> {
    let version = result
        .version
        .map(|version| format!(" {version}"))
        .unwrap_or_default();
    let line = match result.status {
        UninstallStatus::NotInstalled => {
            render_status_line(style, "step", &format!("{} is not installed", result.name))
        }
        UninstallStatus::Uninstalled => render_status_line(
            style,
            "ok",
            &format!("uninstalled {}{version}", result.name),
        ),
        UninstallStatus::BlockedByDependents => render_status_line(
            style,
            "err",
            &format!(
                "cannot uninstall {}{version}: required by {}",
                result.name,
                result.blocked_by.join(", ")
            ),
        ),
    };
    vec![line]
}

pub(crate) fn format_list_lines(records: &[InstalledPackageRecord]) -> Vec<String> {
    if records.is_empty() {
        return vec!["No installed packages".to_string()];
    }
    records
        .iter()
        .map(|record| match record.reason {
            InstallReason::Root => format!("{} {}", record.name, record.version),
            InstallReason::Dependency => {
                format!("{} {} (dependency)", record.name, record.version)
            }
        })
        .collect()
}

pub(crate) fn format_info_lines(
    package_id: &str,
    manifest: &PackageManifest,
    installed: Option<&InstalledPackageRecord>,
) -> Vec<String> {
    let mut lines = vec![
        format!("Package: {package_id}"),
        format!("Name: {}", manifest.name),
        format!("Version: {}", manifest.version),
        format!("Author: {}", manifest.author),
        format!("License: {}", manifest.license),
        format!("Description: {}", manifest.description),
    ];
    if !manifest.tags.is_empty() {
        let tags = manifest.tags.iter().map(String::as_str).collect::<Vec<_>>();
        lines.push(format!("Tags: {}", tags.join(", ")));
    }
    for group in &manifest.install.dependencies {
        lines.push(format!("Depends ({}): {}", group.backend, group.ids.join(", ")));
    }
    if let Some(alias) = manifest.command_alias() {
        lines.push(format!("Command: {alias}"));
    }
    if manifest.install.supports_fastxd {
        lines.push("Runnable without install: yes".to_string());
    }
    lines.push(match installed {
        Some(record) => format!("Installed: {} ({})", record.version, record.install_root.display()),
        None => "Installed: no".to_string(),
    });
    lines
}

pub(crate) fn format_doctor_lines(
    layout: &PrefixLayout,
    registry: Option<&str>,
    held_locks: &[String],
    path_var: Option<&std::ffi::OsStr>,
    style: OutputStyle,
) -> Vec<String> {
    let mut lines = vec![
        format!("prefix: {}", layout.prefix().display()),
        format!("packages: {}", layout.pkgs_dir().display()),
        format!("bin: {}", layout.bin_dir().display()),
        format!("state: {}", layout.state_dir().display()),
        format!("config: {}", describe_config(&layout.config_path())),
        format!("registry: {}", registry.unwrap_or("(not configured)")),
    ];

    let bin_dir = layout.bin_dir();
    let on_path = path_var
        .map(|value| std::env::split_paths(value).any(|entry| entry == bin_dir))
        .unwrap_or(false);
    if !on_path {
        lines.push(render_status_line(
            style,
            "warn",
            &format!("{} is not on PATH; command aliases will not resolve", bin_dir.display()),
        ));
    }
    for name in held_locks {
        lines.push(render_status_line(
            style,
            "warn",
            &format!(
                "lock held for {name}: {} (remove it if no paxd process is running)",
                layout.lock_path(name).display()
            ),
        ));
    }
    lines
}

fn describe_config(path: &Path) -> String {
    if path.is_file() {
        path.display().to_string()
    } else {
        format!("{} (missing, using defaults)", path.display())
    }
}
