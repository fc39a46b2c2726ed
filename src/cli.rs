use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use nix::sys::stat::Mode;
use serde::Deserialize;

#[derive(Debug, Parser)]
#[command(
    name = "dexec",
    version,
    about = "Detach from the terminal and replace this process with another program"
)]
pub struct Cli {
    /// TOML launch file; flags given on the command line take precedence
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Directory the daemon changes into before exec [default: /]
    #[arg(short = 'C', long, value_name = "DIR")]
    working_directory: Option<PathBuf>,

    /// File creation mask of the daemon, in octal [default: 0]
    #[arg(long, value_name = "OCTAL", value_parser = parse_umask)]
    umask: Option<u32>,

    /// Program name the target sees as its first argument [default: EXECUTABLE]
    #[arg(long, value_name = "NAME")]
    arg0: Option<String>,

    /// What happens to stdin, stdout and stderr [default: inherit]
    #[arg(long, value_enum)]
    stdio: Option<StdioArg>,

    /// Terminate the daemon if the working directory cannot be entered
    #[arg(long)]
    strict_working_directory: bool,

    /// Wait until the target program is executing and fail if the daemon could not get there
    #[arg(long)]
    await_exec: bool,

    /// Restore default signal handlers and clear the signal mask before exec
    #[arg(long)]
    reset_signals: bool,

    /// Close inherited file descriptors above stderr before exec
    #[arg(long)]
    close_descriptors: bool,

    /// Program to execute followed by its arguments, passed through untouched
    #[arg(
        value_name = "EXECUTABLE [ARGS]",
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    command: Vec<String>,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
enum StdioArg {
    Inherit,
    Null,
    Close,
}

impl From<StdioArg> for dexec::Stdio {
    fn from(stdio: StdioArg) -> Self {
        match stdio {
            StdioArg::Inherit => Self::Inherit,
            StdioArg::Null => Self::Null,
            StdioArg::Close => Self::Close,
        }
    }
}

/// Launch configuration read from disk.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct LaunchFile {
    executable: Option<PathBuf>,
    argv: Option<Vec<String>>,
    working_directory: Option<PathBuf>,
    umask: Option<u32>,
    stdio: Option<StdioArg>,
    #[serde(default)]
    strict_working_directory: bool,
    #[serde(default)]
    await_exec: bool,
    #[serde(default)]
    reset_signals: bool,
    #[serde(default)]
    close_descriptors: bool,
}

impl LaunchFile {
    fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read launch file {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Invalid launch file {}", path.display()))
    }

    fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }
}

fn parse_umask(value: &str) -> Result<u32, String> {
    let digits = value.strip_prefix("0o").unwrap_or(value);
    let umask = u32::from_str_radix(digits, 8)
        .map_err(|err| format!("`{value}` is not an octal number: {err}"))?;
    if umask > 0o777 {
        Err(format!("`{value}` is larger than 777"))
    } else {
        Ok(umask)
    }
}

fn to_mode(umask: u32) -> Result<Mode> {
    anyhow::ensure!(umask <= 0o777, "umask {umask:o} is larger than 777");
    let bits = nix::libc::mode_t::try_from(umask).context("umask does not fit mode_t")?;
    Ok(Mode::from_bits_truncate(bits))
}

impl Cli {
    /// Merges the command line with the launch file, if any.
    pub fn into_spec(self) -> Result<dexec::LaunchSpec> {
        let file = match &self.config {
            Some(path) => LaunchFile::load(path)?,
            None => LaunchFile::default(),
        };

        let (executable, mut argv) = match self.command.split_first() {
            Some((executable, args)) => (
                PathBuf::from(executable),
                Some(
                    std::iter::once(executable.clone())
                        .chain(args.iter().cloned())
                        .collect::<Vec<_>>(),
                ),
            ),
            None => (
                file.executable
                    .context("No executable given on the command line or in the launch file")?,
                file.argv,
            ),
        };

        if let Some(arg0) = self.arg0 {
            let argv = argv.get_or_insert_with(Vec::new);
            if argv.is_empty() {
                argv.push(arg0);
            } else {
                argv[0] = arg0;
            }
        }

        let mut builder = dexec::LaunchSpec::builder(executable)
            .umask(to_mode(self.umask.or(file.umask).unwrap_or(0))?)
            .stdio(self.stdio.or(file.stdio).map_or(dexec::Stdio::Inherit, Into::into))
            .strict_working_directory(
                self.strict_working_directory || file.strict_working_directory,
            )
            .await_exec(self.await_exec || file.await_exec)
            .reset_signals(self.reset_signals || file.reset_signals)
            .close_descriptors(self.close_descriptors || file.close_descriptors);

        if let Some(argv) = argv {
            builder = builder.argv(argv);
        }

        if let Some(working_directory) = self.working_directory.or(file.working_directory) {
            builder = builder.working_directory(working_directory);
        }

        Ok(builder.build()?)
    }
}
