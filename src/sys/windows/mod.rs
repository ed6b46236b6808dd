//! The Windows backend: an I/O completion port as the aggregator, with
//! waitable timers and zero-byte overlapped socket reads/writes behind the
//! individual filters.
//!
//! This path is carried in-tree as a parallel realization of the same
//! contracts `sys::unix` implements, but is not held to the same
//! completeness bar (see the crate-level docs): `EVFILT_VNODE`,
//! `EVFILT_SIGNAL`, and `EVFILT_PROC` are not implemented here, and the
//! read/write filter approximates BSD's level/edge and EOF semantics rather
//! than getting them from a native readiness primitive the way `epoll` gives
//! the Unix backend.

mod filter;
mod iocp;
mod knote;
mod kqueue;

pub use kqueue::{Events, Kqueue};
