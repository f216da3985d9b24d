//! Recycled-memory queue shared by both allocators.
//!
//! Memories are pushed back in groups (one group per buffer) and served
//! last-in first-out. A flush bumps an epoch so that blocked waiters give up
//! with [`VaError::Flushing`] instead of sleeping on an emptied queue.

use parking_lot::{Condvar, Mutex};
use va_core::error::{VaError, VaResult};

/// Whether [`AvailableQueue::pop_group`] may block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WaitMode {
    /// Wait for memory to be recycled.
    #[default]
    Block,
    /// Fail with `WouldBlock` instead of waiting.
    DontWait,
}

struct QueueState<M> {
    /// Top of the stack is the most recently recycled memory.
    items: Vec<M>,
    closed: bool,
    epoch: u64,
}

pub(crate) struct AvailableQueue<M> {
    state: Mutex<QueueState<M>>,
    cond: Condvar,
    same_group: fn(&M, &M) -> bool,
}

impl<M> AvailableQueue<M> {
    /// `same_group` tells whether two adjacent memories belong to one buffer.
    pub(crate) fn new(same_group: fn(&M, &M) -> bool) -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: Vec::new(),
                closed: false,
                epoch: 0,
            }),
            cond: Condvar::new(),
            same_group,
        }
    }

    /// Push one buffer's memories in plane order.
    ///
    /// Hands the group back when the queue is closed.
    pub(crate) fn push_group(&self, group: Vec<M>) -> Result<(), Vec<M>> {
        if group.is_empty() {
            return Ok(());
        }
        let mut state = self.state.lock();
        if state.closed {
            return Err(group);
        }
        state.items.extend(group);
        drop(state);
        self.cond.notify_one();
        Ok(())
    }

    /// Pop the most recently pushed group, in plane order.
    pub(crate) fn pop_group(&self, mode: WaitMode) -> VaResult<Vec<M>> {
        let mut state = self.state.lock();
        let epoch = state.epoch;
        while state.items.is_empty() {
            if state.closed || state.epoch != epoch {
                return Err(VaError::Flushing);
            }
            if mode == WaitMode::DontWait {
                return Err(VaError::WouldBlock);
            }
            self.cond.wait(&mut state);
        }

        let mut group = Vec::with_capacity(1);
        if let Some(first) = state.items.pop() {
            group.push(first);
        }
        while let (Some(next), Some(last)) = (state.items.last(), group.last()) {
            if !(self.same_group)(next, last) {
                break;
            }
            if let Some(item) = state.items.pop() {
                group.push(item);
            }
        }
        group.reverse();
        Ok(group)
    }

    /// Remove every queued memory and wake all waiters.
    ///
    /// The caller drops the returned memories, outside the queue lock.
    pub(crate) fn drain(&self) -> Vec<M> {
        let mut state = self.state.lock();
        state.epoch = state.epoch.wrapping_add(1);
        let drained = std::mem::take(&mut state.items);
        drop(state);
        self.cond.notify_all();
        drained
    }

    /// Drain and refuse further pushes.
    pub(crate) fn close(&self) -> Vec<M> {
        self.state.lock().closed = true;
        self.drain()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    /// Number of buffer-sized groups currently queued.
    pub(crate) fn groups(&self) -> usize {
        let state = self.state.lock();
        let mut groups = 0;
        let mut prev: Option<&M> = None;
        for item in &state.items {
            match prev {
                Some(p) if (self.same_group)(p, item) => {}
                _ => groups += 1,
            }
            prev = Some(item);
        }
        groups
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    /// (surface, plane)
    type Plane = (u32, u32);

    fn queue() -> AvailableQueue<Plane> {
        AvailableQueue::new(|a, b| a.0 == b.0)
    }

    #[test]
    fn test_lifo_groups_in_plane_order() {
        let q = queue();
        q.push_group(vec![(1, 0), (1, 1)]).unwrap();
        q.push_group(vec![(2, 0), (2, 1)]).unwrap();
        assert_eq!(q.groups(), 2);

        assert_eq!(q.pop_group(WaitMode::DontWait).unwrap(), vec![(2, 0), (2, 1)]);
        assert_eq!(q.pop_group(WaitMode::DontWait).unwrap(), vec![(1, 0), (1, 1)]);
        assert!(matches!(
            q.pop_group(WaitMode::DontWait),
            Err(VaError::WouldBlock)
        ));
    }

    #[test]
    fn test_blocked_pop_wakes_on_push() {
        let q = Arc::new(queue());
        let waiter = {
            let q = Arc::clone(&q);
            thread::spawn(move || q.pop_group(WaitMode::Block))
        };
        thread::sleep(Duration::from_millis(20));
        q.push_group(vec![(7, 0)]).unwrap();
        assert_eq!(waiter.join().unwrap().unwrap(), vec![(7, 0)]);
    }

    #[test]
    fn test_drain_interrupts_waiters() {
        let q = Arc::new(queue());
        let waiter = {
            let q = Arc::clone(&q);
            thread::spawn(move || q.pop_group(WaitMode::Block))
        };
        thread::sleep(Duration::from_millis(20));
        assert!(q.drain().is_empty());
        assert!(matches!(waiter.join().unwrap(), Err(VaError::Flushing)));

        // usable again after the flush
        q.push_group(vec![(3, 0)]).unwrap();
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn test_closed_queue_rejects_push() {
        let q = queue();
        q.push_group(vec![(1, 0)]).unwrap();
        assert_eq!(q.close(), vec![(1, 0)]);
        assert_eq!(q.push_group(vec![(2, 0)]), Err(vec![(2, 0)]));
        assert!(matches!(q.pop_group(WaitMode::Block), Err(VaError::Flushing)));
    }
}
