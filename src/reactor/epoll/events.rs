use std::{
    io,
    mem::MaybeUninit,
    os::fd::{AsFd, AsRawFd},
};

const MAX_NUM_EVENTS: usize = 64;

pub struct Events {
    inner: [MaybeUninit<libc::epoll_event>; MAX_NUM_EVENTS],
}

impl Events {
    pub const fn new() -> Self {
        Self {
            inner: [MaybeUninit::uninit(); MAX_NUM_EVENTS],
        }
    }

    /// Wait for readiness on `fd` and return the `u64` payload of every ready
    /// registration.
    pub fn wait(&mut self, fd: impl AsFd) -> io::Result<impl Iterator<Item = u64> + '_> {
        let n = unsafe {
            libc::epoll_wait(
                fd.as_fd().as_raw_fd(),
                self.inner.as_mut_ptr() as *mut _,
                MAX_NUM_EVENTS as i32,
                -1,
            )
        };

        if n == -1 {
            return Err(io::Error::last_os_error());
        }

        Ok(self
            .inner
            .iter()
            .take(n as usize)
            .map(|x| unsafe { x.assume_init() }.u64))
    }
}
