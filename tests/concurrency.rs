//! Multiple threads may safely add, trigger, and wait on the same kqueue,
//! and a blocked wait can be woken from another thread via the
//! aggregator's dedicated notify primitive.

#![cfg(any(target_os = "linux", target_os = "android"))]

mod common;

use common::new_kqueue;
use easy_parallel::Parallel;
use kqueue_compat::*;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

#[test]
fn many_threads_register_and_trigger_distinct_idents() {
    let kq = new_kqueue();
    let n: u64 = 16;

    let _: Vec<()> = Parallel::new()
        .each(0..n, |i| {
            // A little jitter so threads don't all land in lockstep,
            // exercising the filter lock under genuine interleaving rather
            // than a synchronized start.
            std::thread::sleep(Duration::from_micros(fastrand::u64(0..500)));

            kq.kevent(
                &[Kevent::new(i, EVFILT_USER, EV_ADD | EV_ONESHOT, 0, 0, 0)],
                &mut [],
                None,
            )
            .expect("add");
            kq.kevent(
                &[Kevent::new(i, EVFILT_USER, 0, NOTE_TRIGGER, 0, 0)],
                &mut [],
                None,
            )
            .expect("trigger");
        })
        .run();

    let mut seen = HashSet::new();
    let mut events = vec![Kevent::zeroed(); n as usize];
    while (seen.len() as u64) < n {
        let got = kq
            .kevent(&[], &mut events, Some(Duration::from_secs(2)))
            .expect("kevent");
        assert!(got > 0, "every ident was already triggered by now");
        for ev in &events[..got] {
            seen.insert(ev.ident);
        }
    }
    assert_eq!(seen.len() as u64, n);
}

#[test]
fn cross_thread_notify_unblocks_a_waiting_thread() {
    let kq = Arc::new(new_kqueue());
    let waiter = kq.clone();

    let (_results, ()) = Parallel::new()
        .add(move || {
            let mut events = [Kevent::zeroed(); 1];
            let n = waiter
                .kevent(&[], &mut events, Some(Duration::from_secs(5)))
                .expect("kevent");
            // Woken purely by `notify()`, with no knote ready.
            assert_eq!(n, 0);
        })
        .finish(move || {
            std::thread::sleep(Duration::from_millis(100));
            kq.notify().expect("notify");
        });
}
