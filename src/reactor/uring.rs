use std::{io, task::Waker, time::Duration};

use io_uring::{opcode, squeue, types, IoUring};
use log::warn;
use slab::Slab;

use super::TimerKey;

/// `user_data` of timeout-removal requests; their completions carry nothing.
const CANCEL_TAG: u64 = u64::MAX;

enum Slot {
    Armed { id: u64, waker: Waker },
    // Disarmed but the kernel still owes us a completion for this slot.
    Cancelled,
}

struct Timeout {
    slot: Slot,
    // The kernel reads this when the request is submitted, which can be later
    // than `arm` if submitting failed the first time around.
    _spec: Box<types::Timespec>,
}

pub(super) struct UringTimers {
    ring: IoUring,
    slots: Slab<Timeout>,
    next_id: u64,
    armed: usize,
}

impl UringTimers {
    pub fn new(entries: u32) -> io::Result<Self> {
        Ok(Self {
            ring: IoUring::new(entries)?,
            slots: Slab::new(),
            next_id: 0,
            armed: 0,
        })
    }

    /// Put `entry` on the submission queue, flushing the queue first if it is
    /// full. On error the entry was not queued.
    fn push(&mut self, entry: &squeue::Entry) -> io::Result<()> {
        let pushed = unsafe { self.ring.submission().push(entry).is_ok() };

        if !pushed {
            self.ring.submit()?;
            unsafe {
                self.ring
                    .submission()
                    .push(entry)
                    .map_err(|_| io::Error::other("io_uring submission queue full"))?;
            }
        }

        Ok(())
    }

    /// Queue a timeout request without submitting it.
    fn queue(&mut self, timeout: Duration, waker: Waker) -> io::Result<TimerKey> {
        let id = self.next_id;
        let spec = Box::new(types::Timespec::from(timeout));
        let entry = opcode::Timeout::new(&*spec).build();
        let slot = self.slots.insert(Timeout {
            slot: Slot::Armed { id, waker },
            _spec: spec,
        });

        if let Err(e) = self.push(&entry.user_data(slot as u64)) {
            self.slots.remove(slot);
            return Err(e);
        }

        self.next_id += 1;
        self.armed += 1;

        Ok(TimerKey { slot, id })
    }

    /// Give up on a timer whose request is queued but may never have reached
    /// the kernel. The request goes out with the next successful submission,
    /// so the slot stays reserved until its completion turns up.
    fn abandon(&mut self, key: TimerKey) {
        if let Some(timeout) = self.slots.get_mut(key.slot) {
            if matches!(timeout.slot, Slot::Armed { id, .. } if id == key.id) {
                timeout.slot = Slot::Cancelled;
                self.armed -= 1;
            }
        }
    }

    pub fn arm(&mut self, timeout: Duration, waker: Waker) -> io::Result<TimerKey> {
        let key = self.queue(timeout, waker)?;

        if let Err(e) = self.ring.submit() {
            self.abandon(key);
            return Err(e);
        }

        Ok(key)
    }

    pub fn rearm(&mut self, key: TimerKey, waker: &Waker) -> bool {
        match self.slots.get_mut(key.slot).map(|t| &mut t.slot) {
            Some(Slot::Armed { id, waker: current }) if *id == key.id => {
                if !current.will_wake(waker) {
                    *current = waker.clone();
                }
                true
            }
            _ => false,
        }
    }

    pub fn disarm(&mut self, key: TimerKey) {
        let Some(timeout) = self.slots.get_mut(key.slot) else {
            return;
        };

        if !matches!(timeout.slot, Slot::Armed { id, .. } if id == key.id) {
            return;
        }

        timeout.slot = Slot::Cancelled;
        self.armed -= 1;

        let entry = opcode::TimeoutRemove::new(key.slot as u64)
            .build()
            .user_data(CANCEL_TAG);

        // If removal can't be queued the timeout simply runs out; the
        // tombstone swallows its completion.
        if let Err(e) = self.push(&entry) {
            warn!("failed to cancel timer {key:?}: {e}");
            return;
        }

        // A queued removal that fails to submit goes out with the next
        // successful submission.
        if let Err(e) = self.ring.submit() {
            warn!("failed to submit cancellation of timer {key:?}: {e}");
        }
    }

    pub fn armed(&self) -> usize {
        self.armed
    }

    pub fn react(&mut self) -> io::Result<Vec<Waker>> {
        match self.ring.submit_and_wait(1) {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(Vec::new()),
            Err(e) => return Err(e),
        }

        let finished: Vec<u64> = self.ring.completion().map(|cqe| cqe.user_data()).collect();
        let mut wakers = Vec::new();

        for tag in finished.into_iter().filter(|tag| *tag != CANCEL_TAG) {
            match self.slots.try_remove(tag as usize).map(|t| t.slot) {
                Some(Slot::Armed { waker, .. }) => {
                    self.armed -= 1;
                    wakers.push(waker);
                }
                Some(Slot::Cancelled) | None => {}
            }
        }

        Ok(wakers)
    }
}
