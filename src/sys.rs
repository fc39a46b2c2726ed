//! Every call that mutates process state while daemonizing goes through [`System`], so the
//! sequence in `lib.rs` can be replayed against a recording implementation.

use std::convert::Infallible;
use std::ffi::{CStr, CString};
use std::os::unix::io::RawFd;
use std::path::Path;

use nix::libc::{STDERR_FILENO, STDIN_FILENO, STDOUT_FILENO};
use nix::sys::stat::Mode;
use nix::unistd::Pid;

use super::spec::Stdio;

const STREAMS: [RawFd; 3] = [STDIN_FILENO, STDOUT_FILENO, STDERR_FILENO];

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) enum Fork {
    Invoker(Pid),
    Daemon,
}

pub(crate) trait System {
    fn fork(&mut self) -> nix::Result<Fork>;

    /// Returns the previous mask.
    fn umask(&mut self, mask: Mode) -> Mode;

    fn setsid(&mut self) -> nix::Result<Pid>;

    fn chdir(&mut self, path: &Path) -> nix::Result<()>;

    fn redirect_streams(&mut self, stdio: Stdio) -> nix::Result<()>;

    /// Sets `SIGPIPE` back to its default disposition.
    fn restore_sigpipe(&mut self) -> nix::Result<()>;

    fn reset_signals(&mut self) -> nix::Result<()>;

    /// Closes every descriptor above stderr except `keep`.
    fn close_descriptors(&mut self, keep: Option<RawFd>) -> nix::Result<()>;

    fn exec(&mut self, executable: &CStr, argv: &[CString]) -> nix::Result<Infallible>;
}

/// The running process.
#[derive(Debug, Copy, Clone, Default)]
pub(crate) struct Unix;

impl System for Unix {
    fn fork(&mut self) -> nix::Result<Fork> {
        use nix::unistd;

        // The daemon branch only runs the calls below before it either execs or exits
        match unsafe { unistd::fork() }? {
            unistd::ForkResult::Parent { child } => Ok(Fork::Invoker(child)),
            unistd::ForkResult::Child => Ok(Fork::Daemon),
        }
    }

    fn umask(&mut self, mask: Mode) -> Mode {
        nix::sys::stat::umask(mask)
    }

    fn setsid(&mut self) -> nix::Result<Pid> {
        nix::unistd::setsid()
    }

    fn chdir(&mut self, path: &Path) -> nix::Result<()> {
        nix::unistd::chdir(path)
    }

    fn redirect_streams(&mut self, stdio: Stdio) -> nix::Result<()> {
        match stdio {
            Stdio::Inherit => Ok(()),
            Stdio::Null => {
                let devnull =
                    nix::fcntl::open("/dev/null", nix::fcntl::OFlag::O_RDWR, Mode::empty())?;
                for fd in STREAMS {
                    if fd != devnull {
                        nix::unistd::dup2(devnull, fd)?;
                    }
                }
                if devnull > STDERR_FILENO {
                    nix::unistd::close(devnull)?;
                }
                Ok(())
            }
            Stdio::Close => STREAMS
                .into_iter()
                .try_for_each(|fd| ignore_closed(nix::unistd::close(fd))),
        }
    }

    fn restore_sigpipe(&mut self) -> nix::Result<()> {
        use nix::sys::signal as nix;

        unsafe { nix::signal(nix::SIGPIPE, nix::SigHandler::SigDfl) }.map(drop)
    }

    fn reset_signals(&mut self) -> nix::Result<()> {
        use nix::sys::signal as nix;

        nix::Signal::iterator()
            .filter(|signal| signal != &nix::SIGKILL && signal != &nix::SIGSTOP)
            .map(|signal| unsafe { nix::signal(signal, nix::SigHandler::SigDfl) })
            .find_map(Result::err)
            .map_or(Ok(()), Err)?;

        nix::sigprocmask(nix::SigmaskHow::SIG_SETMASK, Some(&nix::SigSet::empty()), None)
    }

    fn close_descriptors(&mut self, keep: Option<RawFd>) -> nix::Result<()> {
        // Allowed because of the filter_map flow
        #[allow(clippy::needless_pass_by_value)]
        fn file_to_fd(entry: std::fs::DirEntry) -> Option<RawFd> {
            entry
                .file_name()
                .to_str()
                .and_then(|name| name.parse().ok())
        }

        // The listing holds a descriptor of its own, so collect before closing anything
        let open = std::fs::read_dir("/dev/fd/")
            .map_err(|err| {
                err.raw_os_error()
                    .map_or(nix::errno::Errno::UnknownErrno, nix::errno::Errno::from_i32)
            })?
            .filter_map(Result::ok)
            .filter_map(file_to_fd)
            .filter(|fd| fd > &STDERR_FILENO && Some(*fd) != keep)
            .collect::<Vec<_>>();

        open.into_iter()
            .try_for_each(|fd| ignore_closed(nix::unistd::close(fd)))
    }

    fn exec(&mut self, executable: &CStr, argv: &[CString]) -> nix::Result<Infallible> {
        nix::unistd::execv(executable, argv)
    }
}

fn ignore_closed(result: nix::Result<()>) -> nix::Result<()> {
    match result {
        Err(nix::errno::Errno::EBADF) => Ok(()),
        result => result,
    }
}
