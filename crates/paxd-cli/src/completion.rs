use std::io::Write;

use anyhow::{Context, Result};
use clap::{CommandFactory, ValueEnum};
use clap_complete::Shell;
use paxd_installer::PrefixLayout;

use crate::Cli;

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub(crate) enum CliCompletionShell {
    Bash,
    Zsh,
    Fish,
    Powershell,
}

impl From<CliCompletionShell> for Shell {
    fn from(shell: CliCompletionShell) -> Self {
        match shell {
            CliCompletionShell::Bash => Shell::Bash,
            CliCompletionShell::Zsh => Shell::Zsh,
            CliCompletionShell::Fish => Shell::Fish,
            CliCompletionShell::Powershell => Shell::PowerShell,
        }
    }
}

/// Generated clap completions followed by a block that puts the alias shims
/// directory on PATH.
pub(crate) fn write_completions_script<W: Write>(
    shell: CliCompletionShell,
    layout: &PrefixLayout,
    writer: &mut W,
) -> Result<()> {
    let mut command = Cli::command();
    let mut generated = Vec::new();
    clap_complete::generate(Shell::from(shell), &mut command, "paxd", &mut generated);

    writer
        .write_all(&generated)
        .with_context(|| "failed writing generated completion script")?;
    writer
        .write_all(b"\n")
        .with_context(|| "failed writing completion script delimiter")?;
    writer
        .write_all(path_setup_snippet(layout, shell).as_bytes())
        .with_context(|| "failed writing PATH setup block")?;
    Ok(())
}

pub(crate) fn path_setup_snippet(layout: &PrefixLayout, shell: CliCompletionShell) -> String {
    let bin = layout.bin_dir().display().to_string();
    match shell {
        CliCompletionShell::Bash | CliCompletionShell::Zsh => {
            let escaped = escape_single_quote_shell(&bin);
            format!(
                "# paxd command aliases\ncase \":$PATH:\" in\n  *':{escaped}:'*) ;;\n  *) export PATH='{escaped}':\"$PATH\" ;;\nesac\n"
            )
        }
        CliCompletionShell::Fish => {
            let escaped = escape_single_quote_shell(&bin);
            format!(
                "# paxd command aliases\nif not contains -- '{escaped}' $PATH\n    set -gx PATH '{escaped}' $PATH\nend\n"
            )
        }
        CliCompletionShell::Powershell => {
            let escaped = escape_ps_single_quote(&bin);
            format!(
                "# paxd command aliases\n$paxdBin = '{escaped}'\nif (-not ($env:PATH -split [IO.Path]::PathSeparator -contains $paxdBin)) {{\n  $env:PATH = $paxdBin + [IO.Path]::PathSeparator + $env:PATH\n}}\nRemove-Variable paxdBin -ErrorAction SilentlyContinue\n"
            )
        }
    }
}

fn escape_single_quote_shell(value: &str) -> String {
    value.replace('\'', "'\"'\"'")
}

fn escape_ps_single_quote(value: &str) -> String {
    value.replace('\'', "''")
}
