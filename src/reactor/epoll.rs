use std::{
    io, mem,
    os::fd::{AsRawFd, FromRawFd, OwnedFd},
    ptr::null_mut,
    task::Waker,
    time::Duration,
};

use slab::Slab;

use self::events::Events;
use super::TimerKey;

mod events;

struct Armed {
    id: u64,
    waker: Waker,
    // Closing the timerfd also removes it from the epoll set.
    _fd: OwnedFd,
}

/// Fallback backend: one non-blocking `timerfd` per armed timer, all watched
/// by a single epoll instance.
pub(super) struct EpollTimers {
    epoll: OwnedFd,
    slots: Slab<Armed>,
    next_id: u64,
    events: Events,
}

fn cvt(ret: libc::c_int) -> io::Result<libc::c_int> {
    if ret == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret)
    }
}

impl EpollTimers {
    pub fn new() -> io::Result<Self> {
        let fd = cvt(unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) })?;

        Ok(Self {
            epoll: unsafe { OwnedFd::from_raw_fd(fd) },
            slots: Slab::new(),
            next_id: 0,
            events: Events::new(),
        })
    }

    fn timerfd(timeout: Duration) -> io::Result<OwnedFd> {
        let fd = cvt(unsafe {
            libc::timerfd_create(
                libc::CLOCK_MONOTONIC,
                libc::TFD_NONBLOCK | libc::TFD_CLOEXEC,
            )
        })?;
        let fd = unsafe { OwnedFd::from_raw_fd(fd) };

        // An all-zero it_value disarms a timerfd instead of firing it.
        let timeout = timeout.max(Duration::from_nanos(1));
        let mut tspec = unsafe { mem::zeroed::<libc::itimerspec>() };
        tspec.it_value.tv_sec = timeout.as_secs() as _;
        tspec.it_value.tv_nsec = timeout.subsec_nanos() as _;

        cvt(unsafe { libc::timerfd_settime(fd.as_raw_fd(), 0, &tspec, null_mut()) })?;

        Ok(fd)
    }

    pub fn arm(&mut self, timeout: Duration, waker: Waker) -> io::Result<TimerKey> {
        let fd = Self::timerfd(timeout)?;
        let entry = self.slots.vacant_entry();
        let slot = entry.key();

        let mut event = libc::epoll_event {
            events: libc::EPOLLIN as u32,
            u64: slot as u64,
        };

        cvt(unsafe {
            libc::epoll_ctl(
                self.epoll.as_raw_fd(),
                libc::EPOLL_CTL_ADD,
                fd.as_raw_fd(),
                &mut event,
            )
        })?;

        let id = self.next_id;
        self.next_id += 1;
        entry.insert(Armed { id, waker, _fd: fd });

        Ok(TimerKey { slot, id })
    }

    pub fn rearm(&mut self, key: TimerKey, waker: &Waker) -> bool {
        match self.slots.get_mut(key.slot) {
            Some(armed) if armed.id == key.id => {
                if !armed.waker.will_wake(waker) {
                    armed.waker = waker.clone();
                }
                true
            }
            _ => false,
        }
    }

    pub fn disarm(&mut self, key: TimerKey) {
        if self.slots.get(key.slot).is_some_and(|a| a.id == key.id) {
            self.slots.remove(key.slot);
        }
    }

    pub fn armed(&self) -> usize {
        self.slots.len()
    }

    pub fn react(&mut self) -> io::Result<Vec<Waker>> {
        let ready: Vec<u64> = match self.events.wait(&self.epoll) {
            Ok(ready) => ready.collect(),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        Ok(ready
            .into_iter()
            .filter_map(|slot| self.slots.try_remove(slot as usize))
            .map(|armed| armed.waker)
            .collect())
    }
}
