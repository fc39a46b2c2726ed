#![deny(clippy::pedantic)]
#![warn(rust_2018_idioms)]
#![cfg(target_family = "unix")]

//! Turns the calling process into a daemon and replaces it with another program.
//!
//! The sequence is a single `fork`, then in the child: `umask`, `setsid`, `chdir`, standard stream
//! disposition, `SIGPIPE` restored to its default, optional signal and descriptor cleanup, and
//! finally `execv`. The invoking process exits with status `0` as soon as the fork succeeded,
//! unless asked to [wait for the exec](spec::Builder::await_exec).
//!
//! # Example
//! ```no_run
//! let spec = dexec::LaunchSpec::builder("/bin/sleep")
//!     .arg("300")
//!     .working_directory("/tmp")
//!     .build()
//!     .expect("launch spec is valid");
//!
//! match dexec::launch(spec) {
//!     Ok(never) => match never {},
//!     Err(err) => eprintln!("Failed to launch daemon: {}", err),
//! }
//! ```

mod report;
pub mod spec;
mod sys;

pub use spec::{LaunchSpec, Stdio};

// https://man7.org/linux/man-pages/man7/daemon.7.html
// https://man7.org/linux/man-pages/man2/setsid.2.html

use std::convert::Infallible;
use std::os::unix::io::{AsRawFd, RawFd};

type InvocationResult<T = ()> = Result<T, Error>;
type DaemonResult<T = ()> = Result<T, (Stage, nix::Error)>;

/// Failures observed by the invoking process.
#[derive(thiserror::Error, Debug, Clone, Eq, PartialEq)]
pub enum Error {
    #[error("The {field} must be an absolute path: {}", .path.display())]
    RelativePath {
        field: &'static str,
        path: std::path::PathBuf,
    },

    #[error("The argument vector is empty")]
    EmptyArgv,

    #[error("The {field} contains a nul byte")]
    NulByte { field: &'static str },

    #[error("Failed to create status reporting pipe: {0}")]
    CreatePipe(nix::Error),

    #[error("Failed to fork daemon process: {0}")]
    Fork(nix::Error),

    #[error("Failed to receive daemon status report: {0}")]
    ReadStatus(nix::Error),

    #[error("Daemon sent an unknown status code: {code}")]
    UnknownStatus { code: u8 },

    #[error("Daemon sent an incomplete status report")]
    TruncatedStatus,

    #[error("Daemon failed to start: {stage}: {cause}")]
    Daemon { stage: Stage, cause: nix::Error },
}

impl Error {
    fn daemon(stage: Stage, cause: nix::Error) -> Self {
        Self::Daemon { stage, cause }
    }

    /// Exit status for a launcher reporting this error.
    ///
    /// Daemon failures reuse the status the daemon itself exited with.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Daemon { stage, .. } => i32::from(stage.code()),
            _ => 1,
        }
    }
}

/// The step of the sequence that failed after forking.
///
/// The daemon exits with the code of the failed stage.
#[derive(thiserror::Error, dexec_derive::StatusCode, Debug, Copy, Clone, Eq, PartialEq)]
#[repr(u8)]
pub enum Stage {
    #[error("Failed to create a new session")]
    SessionCreate = 2,

    #[error("Failed to change working directory")]
    WorkingDirectory = 3,

    #[error("Failed to redirect standard streams")]
    RedirectStreams = 4,

    #[error("Failed to reset signal handlers")]
    ResetSignals = 5,

    #[error("Failed to close file descriptors")]
    CloseDescriptors = 6,

    #[error("Failed to execute program")]
    Exec = 127,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Exit {
    Invoker,
    Daemon(Stage, nix::Error),
}

/// Daemonizes and replaces the process image with `spec.executable()`.
///
/// Never returns on success: the invoking process exits with status `0` and the daemon becomes the
/// target program. A daemon that fails exits with the code of the failed [`Stage`].
///
/// Must be called while the process is still single threaded.
///
/// # Errors
/// If the status pipe cannot be created or the fork fails. With
/// [`await_exec`](spec::Builder::await_exec) also if the daemon reports a failure before exec.
///
/// Errors are only ever returned to the invoking process.
pub fn launch(spec: LaunchSpec) -> InvocationResult<Infallible> {
    let channel = if spec.await_exec {
        Some(report::channel()?)
    } else {
        None
    };

    match sequence(&mut sys::Unix, &spec, channel)? {
        Exit::Invoker => std::process::exit(0),
        Exit::Daemon(stage, cause) => {
            tracing::error!(%stage, %cause, "Daemon failed before exec");
            std::process::exit(i32::from(stage.code()))
        }
    }
}

fn sequence<S: sys::System>(
    system: &mut S,
    spec: &LaunchSpec,
    channel: Option<(report::Reader, report::Writer)>,
) -> InvocationResult<Exit> {
    let (reader, writer) = channel.map_or((None, None), |(reader, writer)| {
        (Some(reader), Some(writer))
    });

    match system.fork().map_err(Error::Fork)? {
        sys::Fork::Invoker(child) => {
            drop(writer);
            tracing::debug!(pid = child.as_raw(), "Forked daemon process");
            finalize_invoker(reader)?;
            Ok(Exit::Invoker)
        }
        sys::Fork::Daemon => {
            drop(reader);
            let keep = writer.as_ref().map(AsRawFd::as_raw_fd);
            match finalize_daemon(system, spec, keep) {
                Ok(never) => match never {},
                Err((stage, cause)) => {
                    if let Some(writer) = writer {
                        writer.report(stage, cause);
                    }
                    Ok(Exit::Daemon(stage, cause))
                }
            }
        }
    }
}

fn finalize_invoker(reader: Option<report::Reader>) -> InvocationResult {
    reader.map_or(Ok(()), report::Reader::wait)
}

fn finalize_daemon<S: sys::System>(
    system: &mut S,
    spec: &LaunchSpec,
    keep: Option<RawFd>,
) -> DaemonResult<Infallible> {
    system.umask(spec.umask);

    let session = system
        .setsid()
        .map_err(|err| (Stage::SessionCreate, err))?;
    tracing::debug!(session = session.as_raw(), "Created new session");

    change_directory(system, spec)?;

    if spec.stdio != Stdio::Inherit {
        system
            .redirect_streams(spec.stdio)
            .map_err(|err| (Stage::RedirectStreams, err))?;
    }

    // The Rust runtime ignores SIGPIPE and an ignored disposition survives exec
    system
        .restore_sigpipe()
        .map_err(|err| (Stage::ResetSignals, err))?;

    if spec.reset_signals {
        system
            .reset_signals()
            .map_err(|err| (Stage::ResetSignals, err))?;
    }

    if spec.close_descriptors {
        system
            .close_descriptors(keep)
            .map_err(|err| (Stage::CloseDescriptors, err))?;
    }

    tracing::debug!(executable = ?spec.executable, argv = ?spec.argv, "Executing");
    system
        .exec(&spec.executable, &spec.argv)
        .map_err(|err| (Stage::Exec, err))
}

fn change_directory<S: sys::System>(system: &mut S, spec: &LaunchSpec) -> DaemonResult {
    match system.chdir(&spec.working_directory) {
        Ok(()) => Ok(()),
        Err(err) if spec.strict_working_directory => Err((Stage::WorkingDirectory, err)),
        Err(err) => {
            tracing::warn!(
                path = %spec.working_directory.display(),
                %err,
                "Working directory is unreachable, staying in the inherited one"
            );
            Ok(())
        }
    }
}
