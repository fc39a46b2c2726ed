//! Description of the program the daemon becomes.
//!
//! # Example
//! ```no_run
//! use dexec::{LaunchSpec, Stdio};
//!
//! let spec = LaunchSpec::builder("/usr/bin/ruby")
//!     .argv(["rotel-server", "/etc/rotel/rotel-server.rb", "--", "-d"])
//!     .working_directory("/etc/rotel")
//!     .stdio(Stdio::Null)
//!     .build()
//!     .expect("launch spec is valid");
//!
//! if let Err(err) = dexec::launch(spec) {
//!     eprintln!("Failed to launch daemon: {}", err);
//! }
//! ```

use std::ffi::{CStr, CString, OsString};
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::path::{Path, PathBuf};

use nix::sys::stat::Mode;

/// What happens to the daemon's standard input and outputs before exec.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub enum Stdio {
    /// Keep whatever was inherited from the invoking process.
    #[default]
    Inherit,
    /// Point all three streams to `/dev/null`.
    Null,
    /// Close all three streams.
    Close,
}

/// Everything the daemon needs to know to replace itself with the target program.
///
/// Built through [`LaunchSpec::builder`] and consumed by [`launch`](crate::launch). The C strings
/// handed to `execv` are allocated while building, so nothing is allocated for them after forking.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub(crate) executable: CString,
    pub(crate) argv: Vec<CString>,
    pub(crate) working_directory: PathBuf,
    pub(crate) umask: Mode,
    pub(crate) stdio: Stdio,
    pub(crate) strict_working_directory: bool,
    pub(crate) await_exec: bool,
    pub(crate) reset_signals: bool,
    pub(crate) close_descriptors: bool,
}

impl LaunchSpec {
    /// Starts describing a launch of `executable`, which must be an absolute path.
    #[must_use]
    pub fn builder<P: Into<PathBuf>>(executable: P) -> Builder {
        Builder::new(executable.into())
    }

    #[must_use]
    pub fn executable(&self) -> &CStr {
        &self.executable
    }

    #[must_use]
    pub fn argv(&self) -> &[CString] {
        &self.argv
    }

    #[must_use]
    pub fn working_directory(&self) -> &Path {
        &self.working_directory
    }

    #[must_use]
    pub fn umask(&self) -> Mode {
        self.umask
    }

    #[must_use]
    pub fn stdio(&self) -> Stdio {
        self.stdio
    }

    #[must_use]
    pub fn strict_working_directory(&self) -> bool {
        self.strict_working_directory
    }

    #[must_use]
    pub fn await_exec(&self) -> bool {
        self.await_exec
    }

    #[must_use]
    pub fn reset_signals(&self) -> bool {
        self.reset_signals
    }

    #[must_use]
    pub fn close_descriptors(&self) -> bool {
        self.close_descriptors
    }
}

/// Holds the launch configuration until it is validated by [`build()`](Builder::build).
///
/// By default the argument vector is just the executable path, the working directory is `/`, the
/// umask is empty and the standard streams are inherited.
#[derive(Debug, Clone)]
pub struct Builder {
    executable: PathBuf,
    argv: Option<Vec<OsString>>,
    working_directory: PathBuf,
    umask: Mode,
    stdio: Stdio,
    strict_working_directory: bool,
    await_exec: bool,
    reset_signals: bool,
    close_descriptors: bool,
}

impl Builder {
    fn new(executable: PathBuf) -> Self {
        Self {
            executable,
            argv: None,
            working_directory: PathBuf::from("/"),
            umask: Mode::empty(),
            stdio: Stdio::Inherit,
            strict_working_directory: false,
            await_exec: false,
            reset_signals: false,
            close_descriptors: false,
        }
    }

    /// Replaces the whole argument vector, program name included. It cannot be empty.
    ///
    /// Arguments are passed through untouched, so a literal `--` reaches the target program.
    #[must_use]
    pub fn argv<I, S>(mut self, argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.argv = Some(argv.into_iter().map(Into::into).collect());
        self
    }

    /// Appends one argument after the ones already set.
    #[must_use]
    pub fn arg<S: Into<OsString>>(mut self, arg: S) -> Self {
        let executable = &self.executable;
        self.argv
            .get_or_insert_with(|| vec![executable.clone().into_os_string()])
            .push(arg.into());
        self
    }

    /// Sets the directory the daemon changes into. Must be absolute.
    #[must_use]
    pub fn working_directory<P: Into<PathBuf>>(mut self, working_directory: P) -> Self {
        self.working_directory = working_directory.into();
        self
    }

    /// Sets the file creation mask of the daemon.
    #[must_use]
    pub fn umask(mut self, umask: Mode) -> Self {
        self.umask = umask;
        self
    }

    /// Sets what happens to the standard streams.
    #[must_use]
    pub fn stdio(mut self, stdio: Stdio) -> Self {
        self.stdio = stdio;
        self
    }

    /// Terminate the daemon when the working directory cannot be entered.
    ///
    /// Otherwise the failure is logged and the daemon stays in the inherited directory.
    #[must_use]
    pub fn strict_working_directory(mut self, strict: bool) -> Self {
        self.strict_working_directory = strict;
        self
    }

    /// Keep the invoking process alive until the daemon has either executed the target program or
    /// failed, and report the failure to the invoker.
    #[must_use]
    pub fn await_exec(mut self, await_exec: bool) -> Self {
        self.await_exec = await_exec;
        self
    }

    /// Restore default signal dispositions and clear the signal mask before exec.
    ///
    /// Ignored signals and the mask survive exec otherwise. `SIGPIPE` is restored either way.
    #[must_use]
    pub fn reset_signals(mut self, reset: bool) -> Self {
        self.reset_signals = reset;
        self
    }

    /// Close every inherited file descriptor above stderr before exec.
    #[must_use]
    pub fn close_descriptors(mut self, close: bool) -> Self {
        self.close_descriptors = close;
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    /// If the executable or the working directory is not absolute, if the argument vector is
    /// empty, or if any path or argument contains a nul byte.
    pub fn build(self) -> super::InvocationResult<LaunchSpec> {
        let executable = absolute("executable", self.executable)?;
        let executable_c = c_string("executable", executable.clone().into_os_string())?;
        let working_directory = absolute("working directory", self.working_directory)?;
        if working_directory.as_os_str().as_bytes().contains(&0) {
            return Err(super::Error::NulByte {
                field: "working directory",
            });
        }

        let argv = self
            .argv
            .unwrap_or_else(|| vec![executable.clone().into_os_string()])
            .into_iter()
            .map(|arg| c_string("argument", arg))
            .collect::<Result<Vec<_>, _>>()?;
        if argv.is_empty() {
            return Err(super::Error::EmptyArgv);
        }

        Ok(LaunchSpec {
            executable: executable_c,
            argv,
            working_directory,
            umask: self.umask,
            stdio: self.stdio,
            strict_working_directory: self.strict_working_directory,
            await_exec: self.await_exec,
            reset_signals: self.reset_signals,
            close_descriptors: self.close_descriptors,
        })
    }
}

fn absolute(field: &'static str, path: PathBuf) -> super::InvocationResult<PathBuf> {
    if path.is_absolute() {
        Ok(path)
    } else {
        Err(super::Error::RelativePath { field, path })
    }
}

// Allowed because the only possible failure is the nul byte
#[allow(clippy::map_err_ignore)]
fn c_string(field: &'static str, string: OsString) -> super::InvocationResult<CString> {
    CString::new(string.into_vec()).map_err(|_| super::Error::NulByte { field })
}
