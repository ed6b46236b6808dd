//! Lazy one-time platform setup.
//!
//! Before the first kqueue relies on it, this validates the technique used
//! to detect a hung-up peer on a readable fd: on some kernels/fd types the
//! `EPOLLHUP`/`EPOLLRDHUP` bits alone are trustworthy; where they are not,
//! the read filter falls back to a zero-length `MSG_PEEK`. The result is
//! cached for the life of the process, validated once on a disposable
//! socket pair.

use std::os::fd::AsRawFd;
use std::os::unix::net::UnixStream;
use std::sync::OnceLock;

static PEER_CLOSE_HUP_TRUSTED: OnceLock<bool> = OnceLock::new();

/// Whether `EPOLLHUP`/`EPOLLRDHUP` alone can be trusted to mean "peer
/// closed" on this kernel, without falling back to a zero-length
/// `MSG_PEEK`. Runs the self-test at most once per process.
pub(crate) fn peer_close_hup_trusted() -> bool {
    *PEER_CLOSE_HUP_TRUSTED.get_or_init(run_self_test)
}

fn run_self_test() -> bool {
    let result = (|| -> std::io::Result<bool> {
        let (a, b) = UnixStream::pair()?;
        a.set_nonblocking(true)?;
        drop(b);

        let ep = rustix::event::epoll::create(rustix::event::epoll::CreateFlags::CLOEXEC)?;
        let borrowed = unsafe { std::os::fd::BorrowedFd::borrow_raw(a.as_raw_fd()) };
        rustix::event::epoll::add(
            &ep,
            borrowed,
            rustix::event::epoll::EventData::new_u64(0),
            rustix::event::epoll::EventFlags::IN | rustix::event::epoll::EventFlags::RDHUP,
        )?;
        let mut events = rustix::event::epoll::EventVec::with_capacity(1);
        let ts = rustix::time::Timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        rustix::event::epoll::wait(&ep, &mut events, Some(&ts))?;
        let hup_bit_set = events.iter().any(|e| {
            e.flags.contains(rustix::event::epoll::EventFlags::HUP)
                || e.flags.contains(rustix::event::epoll::EventFlags::RDHUP)
        });

        // Cross-check with a zero-length MSG_PEEK, the fallback technique
        // itself, to see whether the two agree on this kernel.
        let peek_says_closed = unsafe {
            let mut buf = [0u8; 1];
            let n = libc::recv(
                a.as_raw_fd(),
                buf.as_mut_ptr() as *mut _,
                buf.len(),
                libc::MSG_PEEK | libc::MSG_DONTWAIT,
            );
            n == 0
        };

        Ok(hup_bit_set && peek_says_closed)
    })();

    match result {
        Ok(trusted) => {
            #[cfg(feature = "trace")]
            tracing::debug!(trusted, "peer-close HUP self-test");
            trusted
        }
        // If the self-test itself can't run (should not happen on any
        // real Linux kernel), fail safe and always do the extra peek.
        Err(_err) => {
            #[cfg(feature = "trace")]
            tracing::warn!(error = ?_err, "peer-close self-test failed, falling back to MSG_PEEK always");
            false
        }
    }
}
