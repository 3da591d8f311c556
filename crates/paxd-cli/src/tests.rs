use std::fs;
use std::path::Path;

use clap::Parser;
use paxd_core::{PackageManifest, PackageVersion};
use paxd_installer::{
    InstallReason, InstalledPackageRecord, Ledger, MarkerState, PrefixLayout, UninstallResult,
    UninstallStatus, UpdateOutcome,
};
use paxd_resolver::resolve_install_plan;
use tempfile::TempDir;

use super::*;
use crate::completion::{path_setup_snippet, write_completions_script};
use crate::config::{load_config, parse_config, resolve_prefix};
use crate::dispatch::run_cli;
use crate::render::*;

fn manifest(name: &str, install: &str) -> PackageManifest {
    PackageManifest::from_yaml_str(&format!(
        "name: {name}\nauthor: tester\nversion: 1.0.0\ndescription: test\nlicense: MIT\ninstall:\n{install}"
    ))
    .expect("manifest must parse")
}

fn write_registry_package(root: &Path, id: &str, manifest: &str, files: &[(&str, &str)]) {
    let dir = root.join("packages").join(id);
    fs::create_dir_all(&dir).expect("must create package dir");
    fs::write(dir.join("package.yaml"), manifest).expect("must write manifest");
    for (path, content) in files {
        let path = dir.join(path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("must create parent");
        }
        fs::write(path, content).expect("must write file");
    }
}

fn record(name: &str, reason: InstallReason) -> InstalledPackageRecord {
    InstalledPackageRecord {
        name: name.to_string(),
        display_name: name.to_string(),
        version: PackageVersion::new(1, 0, 0),
        install_root: format!("/opt/paxd/pkgs/{name}").into(),
        mode: paxd_installer::InstallMode::Persistent,
        reason,
        files: Vec::new(),
        dependencies: Vec::new(),
        alias: None,
        marker_state: MarkerState::None,
        installed_at_unix: 1,
        updated_at_unix: 1,
    }
}

fn cli(args: &[&str]) -> Cli {
    Cli::try_parse_from(std::iter::once("paxd").chain(args.iter().copied()))
        .expect("command must parse")
}

#[test]
fn install_flags_parse() {
    let cli = cli(&["install", "com.example.tool", "--skip-checksum", "--dry-run"]);
    match cli.command {
        Commands::Install {
            package,
            skip_checksum,
            dry_run,
        } => {
            assert_eq!(package, "com.example.tool");
            assert!(skip_checksum);
            assert!(dry_run);
        }
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
fn run_forwards_arguments_after_separator() {
    let cli = cli(&["--prefix", "/tmp/p", "run", "tool", "--", "--flag", "value"]);
    assert_eq!(cli.prefix.as_deref(), Some(Path::new("/tmp/p")));
    match cli.command {
        Commands::Run { package, args, .. } => {
            assert_eq!(package, "tool");
            assert_eq!(args, vec!["--flag", "value"]);
        }
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
fn global_flags_follow_subcommands() {
    let cli = cli(&["update", "tool", "--force", "--registry", "https://example.test", "-v"]);
    assert_eq!(cli.registry.as_deref(), Some("https://example.test"));
    assert!(cli.verbose);
    assert!(matches!(cli.command, Commands::Update { force: true, .. }));
}

#[test]
fn unknown_completion_shell_is_rejected() {
    assert!(Cli::try_parse_from(["paxd", "completions", "tcsh"]).is_err());
    assert!(matches!(
        cli(&["completions", "powershell"]).command,
        Commands::Completions {
            shell: CliCompletionShell::Powershell
        }
    ));
}

#[test]
fn config_parses_every_section() {
    let config = parse_config(
        r#"
registry = "https://example.test/paxd-repo"
temp_dir = "/var/tmp"

[backends]
pip = "python3.12"

[interpreters]
py = "pypy3"
"#,
    )
    .expect("config must parse");

    assert_eq!(config.registry.as_deref(), Some("https://example.test/paxd-repo"));
    assert_eq!(config.temp_dir.as_deref(), Some(Path::new("/var/tmp")));
    assert_eq!(
        config.backends.get(&paxd_core::Backend::Pip).map(String::as_str),
        Some("python3.12")
    );
    assert_eq!(config.interpreters.get("py").map(String::as_str), Some("pypy3"));
}

#[test]
fn config_rejects_unknown_keys_and_backends() {
    assert!(parse_config("registy = \"typo\"").is_err());
    assert!(parse_config("[backends]\ncargo = \"cargo\"").is_err());
    assert_eq!(parse_config("").expect("empty config"), config::PaxdConfig::default());
}

#[test]
fn missing_config_file_uses_defaults() {
    let dir = TempDir::new().expect("tempdir");
    let config = load_config(&dir.path().join("config.toml")).expect("must load");
    assert_eq!(config, config::PaxdConfig::default());

    fs::write(dir.path().join("config.toml"), "registry = [").expect("write");
    let err = load_config(&dir.path().join("config.toml")).expect_err("must fail");
    assert!(err.to_string().contains("config.toml"), "{err}");
}

#[test]
fn prefix_flag_wins_over_environment() {
    let prefix = resolve_prefix(Some("/flag".into()), Some("/env".into())).expect("prefix");
    assert_eq!(prefix, Path::new("/flag"));
    let prefix = resolve_prefix(None, Some("/env".into())).expect("prefix");
    assert_eq!(prefix, Path::new("/env"));
}

#[test]
fn status_lines_are_plain_or_badged() {
    assert_eq!(
        render_status_line(OutputStyle::Plain, "ok", "installed tool 1.0.0"),
        "installed tool 1.0.0"
    );
    let rich = render_status_line(OutputStyle::Rich, "warn", "checksum verification disabled");
    assert!(rich.contains("[WARN]"), "{rich}");
    assert!(rich.ends_with(" checksum verification disabled"), "{rich}");
}

#[test]
fn list_lines_mark_dependencies() {
    assert_eq!(format_list_lines(&[]), vec!["No installed packages"]);
    assert_eq!(
        format_list_lines(&[
            record("app", InstallReason::Root),
            record("lib", InstallReason::Dependency),
        ]),
        vec!["app 1.0.0", "lib 1.0.0 (dependency)"]
    );
}

#[test]
fn plan_lines_list_operations_in_order() {
    let lib = manifest("lib", "  files: [lib.py]\n");
    let app = manifest(
        "app",
        "  files: [app.py]\n  dependencies:\n    paxd: [lib]\n    pip: [rich]\n",
    );
    let plan = resolve_install_plan("app", &app, |id| {
        Ok((id == "lib").then(|| lib.clone()))
    })
    .expect("plan");

    let lines = format_plan_lines(&plan);
    assert_eq!(lines[0], "install plan for app:");
    let stage_lib = lines
        .iter()
        .position(|line| line.contains("stage lib"))
        .expect("lib staged");
    let stage_app = lines
        .iter()
        .position(|line| line.contains("stage app"))
        .expect("app staged");
    assert!(stage_lib < stage_app);
    assert!(lines.iter().any(|line| line.contains("pip install rich")));
}

#[test]
fn update_and_uninstall_lines_describe_outcome() {
    let up_to_date = format_update_outcome_lines(
        "tool",
        &UpdateOutcome::UpToDate(PackageVersion::new(2, 0, 0)),
        OutputStyle::Plain,
    );
    assert_eq!(up_to_date, vec!["tool 2.0.0 is up to date"]);

    let downgrade = format_update_outcome_lines(
        "tool",
        &UpdateOutcome::Downgrade {
            installed: PackageVersion::new(2, 0, 0),
            available: PackageVersion::new(1, 0, 0),
        },
        OutputStyle::Plain,
    );
    assert!(downgrade[0].contains("--force"));

    let blocked = format_uninstall_lines(
        &UninstallResult {
            name: "lib".to_string(),
            version: Some(PackageVersion::new(1, 0, 0)),
            status: UninstallStatus::BlockedByDependents,
            blocked_by: vec!["app".to_string(), "other".to_string()],
        },
        OutputStyle::Plain,
    );
    assert_eq!(blocked, vec!["cannot uninstall lib 1.0.0: required by app, other"]);
}

#[test]
fn doctor_warns_about_path_and_held_locks() {
    let layout = PrefixLayout::new("/opt/paxd");
    let lines = format_doctor_lines(
        &layout,
        None,
        &["tool".to_string()],
        Some(std::ffi::OsStr::new("/usr/bin")),
        OutputStyle::Plain,
    );
    assert!(lines.contains(&"registry: (not configured)".to_string()));
    assert!(lines.iter().any(|line| line.contains("is not on PATH")));
    assert!(lines.iter().any(|line| line.starts_with("lock held for tool")));

    let path = std::env::join_paths([Path::new("/usr/bin"), layout.bin_dir().as_path()])
        .expect("join paths");
    let lines = format_doctor_lines(
        &layout,
        Some("https://example.test"),
        &[],
        Some(path.as_os_str()),
        OutputStyle::Plain,
    );
    assert!(!lines.iter().any(|line| line.contains("is not on PATH")));
}

#[test]
fn completions_include_path_setup() {
    let layout = PrefixLayout::new("/opt/paxd");
    let mut script = Vec::new();
    write_completions_script(CliCompletionShell::Bash, &layout, &mut script)
        .expect("must write completions");
    let script = String::from_utf8(script).expect("utf8");
    assert!(script.contains("paxd"));
    assert!(script.contains(&path_setup_snippet(&layout, CliCompletionShell::Bash)));

    let fish = path_setup_snippet(&layout, CliCompletionShell::Fish);
    assert!(fish.contains("set -gx PATH"), "{fish}");
}

#[test]
fn install_list_export_and_uninstall_through_cli() {
    let registry = TempDir::new().expect("tempdir");
    let prefix = TempDir::new().expect("tempdir");
    write_registry_package(
        registry.path(),
        "app",
        "name: App\nauthor: t\nversion: 1.0.0\ndescription: d\nlicense: MIT\ninstall:\n  files: [app.txt]\n  dependencies:\n    paxd: [lib]\n",
        &[("app.txt", "app")],
    );
    write_registry_package(
        registry.path(),
        "lib",
        "name: Lib\nauthor: t\nversion: 0.3.0\ndescription: d\nlicense: MIT\ninstall:\n  files: [data/lib.txt]\n",
        &[("data/lib.txt", "lib")],
    );
    let prefix_arg = prefix.path().to_string_lossy().to_string();
    let registry_arg = registry.path().to_string_lossy().to_string();
    let invoke = |args: &[&str]| {
        let mut full = vec!["--prefix", prefix_arg.as_str(), "--registry", registry_arg.as_str()];
        full.extend_from_slice(args);
        run_cli(cli(&full))
    };

    assert_eq!(invoke(&["install", "app", "--dry-run"]).expect("dry run"), 0);
    assert!(!prefix.path().join("pkgs/app").exists());

    assert_eq!(invoke(&["install", "app"]).expect("install"), 0);
    assert_eq!(
        fs::read_to_string(prefix.path().join("pkgs/lib/data/lib.txt")).expect("lib file"),
        "lib"
    );
    let ledger = Ledger::new(PrefixLayout::new(prefix.path()));
    let names = ledger
        .list()
        .expect("list")
        .into_iter()
        .map(|record| record.name)
        .collect::<Vec<_>>();
    assert_eq!(names, vec!["app", "lib"]);

    assert_eq!(invoke(&["list"]).expect("list"), 0);
    assert_eq!(invoke(&["export"]).expect("export"), 0);
    assert_eq!(invoke(&["info", "lib"]).expect("info"), 0);
    assert!(invoke(&["install", "app"]).is_err());
    assert!(invoke(&["uninstall", "lib"]).is_err());
    assert_eq!(invoke(&["update", "app"]).expect("update"), 0);

    assert_eq!(invoke(&["uninstall", "app"]).expect("uninstall"), 0);
    assert_eq!(invoke(&["uninstall", "lib"]).expect("uninstall"), 0);
    assert!(ledger.list().expect("list").is_empty());
}

#[test]
fn commands_needing_a_registry_explain_how_to_configure_one() {
    let prefix = TempDir::new().expect("tempdir");
    let prefix_arg = prefix.path().to_string_lossy().to_string();
    let err = run_cli(cli(&["--prefix", &prefix_arg, "info", "tool"])).expect_err("must fail");
    assert!(err.to_string().contains("no registry configured"), "{err}");
}

#[cfg(unix)]
#[test]
fn run_returns_the_package_exit_code() {
    let registry = TempDir::new().expect("tempdir");
    let prefix = TempDir::new().expect("tempdir");
    let temp_parent = TempDir::new().expect("tempdir");
    write_registry_package(
        registry.path(),
        "tool",
        "name: Tool\nauthor: t\nversion: 1.0.0\ndescription: d\nlicense: MIT\ninstall:\n  files: [tool.sh]\n  main_executable: tool.sh\n  command_alias: tool\n  supports_fastxd: true\n",
        &[("tool.sh", "exit \"$1\"\n")],
    );
    fs::write(
        prefix.path().join("config.toml"),
        format!(
            "registry = '{}'\ntemp_dir = '{}'\n\n[interpreters]\nsh = \"sh\"\n",
            registry.path().display(),
            temp_parent.path().display()
        ),
    )
    .expect("write config");
    let prefix_arg = prefix.path().to_string_lossy().to_string();

    let code = run_cli(cli(&["--prefix", &prefix_arg, "run", "tool", "--", "4"])).expect("run");
    assert_eq!(code, 4);
    assert!(fs::read_dir(temp_parent.path())
        .expect("read temp parent")
        .next()
        .is_none());
    assert!(!prefix.path().join("pkgs/tool").exists());
}
