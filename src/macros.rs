//! Small helpers shared by the Unix backend.

/// Calls a libc function and wraps the result in an `io::Result`.
///
/// Retries automatically on `EINTR`, since almost every caller wants that
/// and the few that don't (the blocking wait itself) handle `EINTR` one
/// level up where the remaining timeout is known.
macro_rules! syscall {
    ($fn:ident ( $($arg:expr),* $(,)* ) ) => {{
        loop {
            #[allow(unused_unsafe)]
            let res = unsafe { libc::$fn($($arg),*) };
            if res == -1 {
                let err = std::io::Error::last_os_error();
                if err.kind() == std::io::ErrorKind::Interrupted {
                    continue;
                }
                break Err(err);
            }
            break Ok(res);
        }
    }};
}

pub(crate) use syscall;
