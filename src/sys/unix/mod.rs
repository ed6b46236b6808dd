//! The Linux backend: epoll as the aggregator, with signalfd/timerfd/
//! inotify/eventfd/pidfd behind the individual filters.

mod aggregator;
mod filter;
mod knote;
mod kqueue;
mod platform;

pub(crate) use kqueue::borrow_raw;
pub use kqueue::{Events, Kqueue};
