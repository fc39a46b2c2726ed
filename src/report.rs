//! Status channel from the daemon back to the invoker.
//!
//! Both ends are close-on-exec: a successful exec closes the daemon's end and the invoker reads
//! end-of-file. A failing daemon writes a single record before exiting instead.

use std::os::unix::io::{AsRawFd, RawFd};

use nix::errno::Errno;

use super::{Error, InvocationResult, Stage};

// Stage code followed by the big endian errno
const RECORD_LEN: usize = 5;

#[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
pub(crate) fn channel() -> InvocationResult<(Reader, Writer)> {
    let (reader, writer) =
        nix::unistd::pipe2(nix::fcntl::OFlag::O_CLOEXEC).map_err(Error::CreatePipe)?;
    Ok((Reader(reader), Writer(writer)))
}

// Not atomic, which is only sound because `launch` requires a single threaded caller
#[cfg(not(any(target_os = "linux", target_os = "android", target_os = "freebsd")))]
pub(crate) fn channel() -> InvocationResult<(Reader, Writer)> {
    use nix::fcntl::{fcntl, FcntlArg, FdFlag};

    let (reader, writer) = nix::unistd::pipe().map_err(Error::CreatePipe)?;
    let (reader, writer) = (Reader(reader), Writer(writer));

    for fd in [reader.0, writer.0] {
        fcntl(fd, FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC)).map_err(Error::CreatePipe)?;
    }

    Ok((reader, writer))
}

#[derive(Debug)]
pub(crate) struct Reader(RawFd);

impl Drop for Reader {
    fn drop(&mut self) {
        let _ = nix::unistd::close(self.0);
    }
}

impl Reader {
    /// Blocks until the daemon either executed its target or reported a failure.
    ///
    /// Every copy of the writing end has to be closed on the invoker side beforehand.
    pub(crate) fn wait(self) -> InvocationResult {
        let mut record = [0_u8; RECORD_LEN];
        let mut filled = 0;

        while filled < RECORD_LEN {
            match nix::unistd::read(self.0, &mut record[filled..]) {
                Ok(0) => break,
                Ok(read) => filled += read,
                Err(Errno::EINTR) => continue,
                Err(err) => return Err(Error::ReadStatus(err)),
            }
        }

        match filled {
            0 => Ok(()),
            RECORD_LEN => {
                let stage =
                    Stage::from_code(record[0]).ok_or(Error::UnknownStatus { code: record[0] })?;
                let errno = i32::from_be_bytes([record[1], record[2], record[3], record[4]]);
                Err(Error::daemon(stage, Errno::from_i32(errno)))
            }
            _ => Err(Error::TruncatedStatus),
        }
    }
}

#[derive(Debug)]
pub(crate) struct Writer(RawFd);

impl Drop for Writer {
    fn drop(&mut self) {
        let _ = nix::unistd::close(self.0);
    }
}

impl AsRawFd for Writer {
    fn as_raw_fd(&self) -> RawFd {
        self.0
    }
}

impl Writer {
    pub(crate) fn report(self, stage: Stage, cause: nix::Error) {
        let mut record = [0_u8; RECORD_LEN];
        record[0] = stage.code();
        record[1..].copy_from_slice(&(cause as i32).to_be_bytes());

        // Below PIPE_BUF, so the record is written whole or not at all
        let _ = nix::unistd::write(self.0, &record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn end_of_file_means_exec() {
        let (reader, writer) = channel().unwrap();
        drop(writer);

        assert_eq!(Ok(()), reader.wait());
    }

    #[test]
    fn failure_record() {
        let (reader, writer) = channel().unwrap();
        writer.report(Stage::Exec, Errno::ENOENT);

        assert_eq!(
            Err(Error::Daemon {
                stage: Stage::Exec,
                cause: Errno::ENOENT,
            }),
            reader.wait()
        );
    }

    #[test]
    fn every_stage_survives_the_pipe() {
        for stage in [
            Stage::SessionCreate,
            Stage::WorkingDirectory,
            Stage::RedirectStreams,
            Stage::ResetSignals,
            Stage::CloseDescriptors,
            Stage::Exec,
        ] {
            let (reader, writer) = channel().unwrap();
            writer.report(stage, Errno::EACCES);

            assert_eq!(
                Err(Error::Daemon {
                    stage,
                    cause: Errno::EACCES,
                }),
                reader.wait()
            );
        }
    }

    #[test]
    fn unknown_stage() {
        let (reader, writer) = channel().unwrap();
        nix::unistd::write(writer.as_raw_fd(), &[42, 0, 0, 0, 2]).unwrap();
        drop(writer);

        assert_eq!(Err(Error::UnknownStatus { code: 42 }), reader.wait());
    }

    #[test]
    fn truncated_record() {
        let (reader, writer) = channel().unwrap();
        nix::unistd::write(writer.as_raw_fd(), &[Stage::Exec.code(), 0]).unwrap();
        drop(writer);

        assert_eq!(Err(Error::TruncatedStatus), reader.wait());
    }

    #[test]
    fn close_on_exec() {
        use nix::fcntl::{fcntl, FcntlArg, FdFlag};

        let (reader, writer) = channel().unwrap();
        for fd in [reader.0, writer.as_raw_fd()] {
            let flags = FdFlag::from_bits_truncate(fcntl(fd, FcntlArg::F_GETFD).unwrap());
            assert!(flags.contains(FdFlag::FD_CLOEXEC));
        }
    }
}
