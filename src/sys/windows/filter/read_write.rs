//! `EVFILT_READ` / `EVFILT_WRITE`.
//!
//! IOCP has no readiness primitive analogous to `epoll`: it reports
//! completions, not "this socket is now readable." This filter approximates
//! readiness the way overlapped-I/O callers have always approximated it for
//! sockets — a zero-byte `WSARecv`/`WSASend` completes as soon as the
//! operation *could* proceed, without consuming any data, which is exactly
//! what a caller polling `EVFILT_READ`/`EVFILT_WRITE` wants to know. `ident`
//! is the raw `SOCKET` handle, same numeric convention `EVFILT_READ`/
//! `EVFILT_WRITE` use for an fd on the Unix backend.
//!
//! Both directions share one [`IoTable`] per socket for the same reason
//! `sys::unix::filter::read_write` does: so `EV_CLEAR`/disable state and
//! the outstanding zero-byte op are tracked once per socket, not once per
//! direction.

use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use windows_sys::Win32::Networking::WinSock::{WSARecv, WSASend, SOCKET, WSABUF};
use windows_sys::Win32::System::IO::OVERLAPPED;

use crate::error::errno;
use crate::event::Kevent;
use crate::sys::windows::filter::{Disposal, Filter};
use crate::sys::windows::iocp::Aggregator;

const READ_FILTER_INDEX: usize = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Direction {
    Read,
    Write,
}

/// A zero-byte overlapped op in flight. `overlapped` must stay the first
/// field: IOCP hands back a `*mut OVERLAPPED` on completion, and this
/// filter recovers the owning `IoOp` by casting that pointer straight back,
/// the same layout trick `mio`'s old Windows selector and `lio`'s IOCP
/// backend both rely on.
#[repr(C)]
struct IoOp {
    overlapped: OVERLAPPED,
    socket: SOCKET,
    direction: Direction,
}

struct IoKnote {
    enabled: AtomicBool,
    oneshot: bool,
    dispatch: bool,
    clear: bool,
}

impl IoKnote {
    fn new(change: &Kevent) -> Self {
        IoKnote {
            enabled: AtomicBool::new(true),
            oneshot: change.is_oneshot(),
            dispatch: change.is_dispatch(),
            clear: change.is_clear(),
        }
    }
}

#[derive(Default)]
struct IoRegistration {
    read: Mutex<Option<Arc<IoKnote>>>,
    write: Mutex<Option<Arc<IoKnote>>>,
    read_pending: AtomicBool,
    write_pending: AtomicBool,
}

pub(crate) struct IoTable {
    regs: Mutex<HashMap<SOCKET, Arc<IoRegistration>>>,
    associated: Mutex<HashSet<SOCKET>>,
}

impl IoTable {
    pub(crate) fn new() -> Self {
        IoTable {
            regs: Mutex::new(HashMap::new()),
            associated: Mutex::new(HashSet::new()),
        }
    }

    fn reg_for(&self, socket: SOCKET) -> Arc<IoRegistration> {
        self.regs
            .lock()
            .unwrap()
            .entry(socket)
            .or_insert_with(|| Arc::new(IoRegistration::default()))
            .clone()
    }

    fn slot<'a>(reg: &'a IoRegistration, direction: Direction) -> &'a Mutex<Option<Arc<IoKnote>>> {
        match direction {
            Direction::Read => &reg.read,
            Direction::Write => &reg.write,
        }
    }

    fn ensure_associated(&self, agg: &Aggregator, socket: SOCKET) -> io::Result<()> {
        let mut associated = self.associated.lock().unwrap();
        if associated.contains(&socket) {
            return Ok(());
        }
        agg.associate(socket as windows_sys::Win32::Foundation::HANDLE, READ_FILTER_INDEX, socket as u64)?;
        associated.insert(socket);
        Ok(())
    }

    fn submit(&self, socket: SOCKET, direction: Direction) -> io::Result<()> {
        let flag = match direction {
            Direction::Read => {
                // Only one zero-byte op per direction outstanding at a time.
                true
            }
            Direction::Write => true,
        };
        let _ = flag;

        let op = Box::new(IoOp {
            overlapped: unsafe { std::mem::zeroed() },
            socket,
            direction,
        });
        let ptr = Box::into_raw(op);

        let result = match direction {
            Direction::Read => {
                let mut buf = WSABUF {
                    len: 0,
                    buf: std::ptr::null_mut(),
                };
                let mut flags: u32 = 0;
                let mut transferred: u32 = 0;
                unsafe {
                    WSARecv(
                        socket,
                        &mut buf,
                        1,
                        &mut transferred,
                        &mut flags,
                        ptr as *mut OVERLAPPED,
                        None,
                    )
                }
            }
            Direction::Write => {
                let buf = WSABUF {
                    len: 0,
                    buf: std::ptr::null_mut(),
                };
                let mut transferred: u32 = 0;
                unsafe {
                    WSASend(
                        socket,
                        &buf,
                        1,
                        &mut transferred,
                        0,
                        ptr as *mut OVERLAPPED,
                        None,
                    )
                }
            }
        };

        if result != 0 {
            let err = unsafe { windows_sys::Win32::Networking::WinSock::WSAGetLastError() };
            const WSA_IO_PENDING: i32 = 997;
            if err != WSA_IO_PENDING {
                unsafe { drop(Box::from_raw(ptr)) };
                return Err(io::Error::from_raw_os_error(err));
            }
        }
        Ok(())
    }

    fn sync_registration(&self, agg: &Aggregator, socket: SOCKET, reg: &IoRegistration) -> io::Result<()> {
        self.ensure_associated(agg, socket)?;
        let want_read = reg
            .read
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|k| k.enabled.load(Ordering::Acquire));
        let want_write = reg
            .write
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|k| k.enabled.load(Ordering::Acquire));

        if want_read && !reg.read_pending.swap(true, Ordering::AcqRel) {
            self.submit(socket, Direction::Read)?;
        }
        if want_write && !reg.write_pending.swap(true, Ordering::AcqRel) {
            self.submit(socket, Direction::Write)?;
        }
        Ok(())
    }

    fn apply_change(&self, agg: &Aggregator, direction: Direction, change: &Kevent) -> io::Result<()> {
        let socket = change.ident as SOCKET;

        if change.is_delete() {
            let reg = self.reg_for(socket);
            let existed = Self::slot(&reg, direction).lock().unwrap().take().is_some();
            if !existed {
                self.drop_if_unused(socket, &reg);
                return Err(io::Error::from_raw_os_error(errno::ENOENT));
            }
            self.drop_if_unused(socket, &reg);
            return Ok(());
        }

        if change.is_enable() || change.is_disable() {
            let reg = self.reg_for(socket);
            {
                let slot = Self::slot(&reg, direction).lock().unwrap();
                let knote = slot.as_ref().ok_or_else(|| io::Error::from_raw_os_error(errno::ENOENT))?;
                knote.enabled.store(change.is_enable(), Ordering::Release);
            }
            return self.sync_registration(agg, socket, &reg);
        }

        if change.is_add() {
            let reg = self.reg_for(socket);
            {
                let mut slot = Self::slot(&reg, direction).lock().unwrap();
                if slot.is_some() {
                    return Err(io::Error::from_raw_os_error(errno::EEXIST));
                }
                *slot = Some(Arc::new(IoKnote::new(change)));
            }
            return self.sync_registration(agg, socket, &reg);
        }

        Err(io::Error::from_raw_os_error(errno::EINVAL))
    }

    fn drop_if_unused(&self, socket: SOCKET, reg: &IoRegistration) {
        let empty = reg.read.lock().unwrap().is_none() && reg.write.lock().unwrap().is_none();
        if empty {
            self.regs.lock().unwrap().remove(&socket);
            self.associated.lock().unwrap().remove(&socket);
        }
    }

    pub(crate) fn copyout(
        &self,
        agg: &Aggregator,
        overlapped: *mut OVERLAPPED,
        _transferred: u32,
        result: io::Result<()>,
    ) -> io::Result<Vec<(Kevent, Disposal)>> {
        let op = unsafe { Box::from_raw(overlapped as *mut IoOp) };
        let IoOp { socket, direction, .. } = *op;

        let reg = match self.regs.lock().unwrap().get(&socket).cloned() {
            Some(reg) => reg,
            None => return Ok(Vec::new()),
        };
        match direction {
            Direction::Read => reg.read_pending.store(false, Ordering::Release),
            Direction::Write => reg.write_pending.store(false, Ordering::Release),
        }

        let slot = Self::slot(&reg, direction).lock().unwrap();
        let knote = match slot.as_ref() {
            Some(k) => k.clone(),
            None => return Ok(Vec::new()),
        };
        drop(slot);

        let eof = result.is_err();
        let enabled = knote.enabled.load(Ordering::Acquire);

        let mut out = Vec::new();
        if enabled {
            let filter_tag = match direction {
                Direction::Read => crate::EVFILT_READ,
                Direction::Write => crate::EVFILT_WRITE,
            };
            let mut flags = 0u16;
            if eof {
                flags |= crate::EV_EOF;
            }
            let disposal = if knote.oneshot {
                Disposal::Delete
            } else if knote.dispatch {
                Disposal::Disable
            } else {
                Disposal::None
            };
            out.push((
                Kevent {
                    ident: socket as u64,
                    filter: filter_tag,
                    flags,
                    fflags: 0,
                    data: 1,
                    udata: 0,
                },
                disposal,
            ));

            // Not edge-triggered and still enabled after delivery: keep the
            // readiness signal live by resubmitting, the same way an epoll
            // level-triggered registration re-wakes without any action from
            // this crate.
            if !knote.clear && !eof && disposal == Disposal::None {
                let _ = self.sync_registration(agg, socket, &reg);
            }
        }

        Ok(out)
    }

    pub(crate) fn teardown_all(&self, _agg: &Aggregator) {
        self.regs.lock().unwrap().clear();
        self.associated.lock().unwrap().clear();
    }

    fn disable(&self, agg: &Aggregator, direction: Direction, socket: SOCKET) -> io::Result<()> {
        let reg = self.reg_for(socket);
        if let Some(knote) = Self::slot(&reg, direction).lock().unwrap().as_ref() {
            knote.enabled.store(false, Ordering::Release);
        }
        self.sync_registration(agg, socket, &reg)
    }

    fn delete(&self, _agg: &Aggregator, direction: Direction, socket: SOCKET) -> io::Result<()> {
        let reg = self.reg_for(socket);
        *Self::slot(&reg, direction).lock().unwrap() = None;
        self.drop_if_unused(socket, &reg);
        Ok(())
    }
}

pub(crate) struct ReadWriteFilter {
    io: Arc<IoTable>,
    direction: Direction,
}

impl ReadWriteFilter {
    pub(crate) fn new(io: Arc<IoTable>, direction: Direction) -> Self {
        ReadWriteFilter { io, direction }
    }
}

impl Filter for ReadWriteFilter {
    fn apply_change(&self, agg: &Aggregator, change: &Kevent) -> io::Result<()> {
        self.io.apply_change(agg, self.direction, change)
    }

    fn copyout(&self, _agg: &Aggregator, _ident: u64) -> io::Result<Vec<(Kevent, Disposal)>> {
        // Read/write readiness arrives keyed by OVERLAPPED pointer and is
        // demultiplexed by `FilterTable::io_copyout` directly, never through
        // this per-direction entry point.
        Ok(Vec::new())
    }

    fn disable(&self, agg: &Aggregator, ident: u64) -> io::Result<()> {
        self.io.disable(agg, self.direction, ident as SOCKET)
    }

    fn delete(&self, agg: &Aggregator, ident: u64) -> io::Result<()> {
        self.io.delete(agg, self.direction, ident as SOCKET)
    }

    fn teardown_all(&self, _agg: &Aggregator) {
        // Actual teardown happens once via `FilterTable::teardown_all` ->
        // `IoTable::teardown_all`, shared between both directions.
    }
}
