//! Hand-off between interrupt context and the worker that runs the engines.
//!
//! An interrupt handler only raises a latch. The first raise enqueues a [`Work`] item;
//! further raises are absorbed until the engine picks the item up and clears the latch
//! on entry, so at most one item per direction is ever outstanding and a raise during
//! processing is caught by the next item.

use core::sync::atomic::{AtomicBool, Ordering};
use heapless::mpmc::MpMcQueue;
use log::*;

/// Which side of the bridge became ready.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WorkKind {
    Can,
    Serial,
}

/// A deferred request to run one engine handler.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Work {
    /// Index of the port inside its hub
    pub port: usize,
    pub kind: WorkKind,
}

/// Queue of deferred work, drained by a single worker.
pub trait WorkQueue {
    /// Enqueue `work`, handing it back when there is no room.
    fn submit(&self, work: Work) -> Result<(), Work>;
}

impl<const N: usize> WorkQueue for MpMcQueue<Work, N> {
    fn submit(&self, work: Work) -> Result<(), Work> {
        self.enqueue(work)
    }
}

/// Single-flight latches of one engine.
#[derive(Debug)]
pub struct ProxySignals {
    port: usize,
    can: AtomicBool,
    serial: AtomicBool,
}

impl ProxySignals {
    pub const fn new(port: usize) -> Self {
        ProxySignals {
            port,
            can: AtomicBool::new(false),
            serial: AtomicBool::new(false),
        }
    }

    pub const fn port(&self) -> usize {
        self.port
    }

    fn latch(&self, kind: WorkKind) -> &AtomicBool {
        match kind {
            WorkKind::Can => &self.can,
            WorkKind::Serial => &self.serial,
        }
    }

    /// Raise a latch from interrupt context. Returns true when work was enqueued.
    pub fn notify<Q: WorkQueue + ?Sized>(&self, kind: WorkKind, queue: &Q) -> bool {
        let latch = self.latch(kind);
        if latch.swap(true, Ordering::AcqRel) {
            return false;
        }
        match queue.submit(Work {
            port: self.port,
            kind,
        }) {
            Ok(()) => true,
            Err(work) => {
                latch.store(false, Ordering::Release);
                warn!("work queue full, dropped {:?}", work);
                false
            }
        }
    }

    /// CAN receive or transmit space became available.
    pub fn notify_can<Q: WorkQueue + ?Sized>(&self, queue: &Q) -> bool {
        self.notify(WorkKind::Can, queue)
    }

    /// Serial receive data or transmit space became available.
    pub fn notify_serial<Q: WorkQueue + ?Sized>(&self, queue: &Q) -> bool {
        self.notify(WorkKind::Serial, queue)
    }

    /// Cleared by the handler on entry.
    pub fn acknowledge(&self, kind: WorkKind) {
        self.latch(kind).store(false, Ordering::Release);
    }

    pub fn is_pending(&self, kind: WorkKind) -> bool {
        self.latch(kind).load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::CountingQueue;
    use test_log::test;

    #[test]
    fn burst_enqueues_once() {
        let queue = CountingQueue::new(8);
        let signals = ProxySignals::new(3);
        assert!(signals.notify_can(&queue));
        assert!(!signals.notify_can(&queue));
        assert!(!signals.notify_can(&queue));
        assert_eq!(queue.submitted(), std::vec![Work { port: 3, kind: WorkKind::Can }]);
        assert!(signals.is_pending(WorkKind::Can));
        assert!(!signals.is_pending(WorkKind::Serial));
    }

    #[test]
    fn directions_are_independent() {
        let queue = CountingQueue::new(8);
        let signals = ProxySignals::new(0);
        assert!(signals.notify_can(&queue));
        assert!(signals.notify_serial(&queue));
        assert_eq!(queue.submitted().len(), 2);
    }

    #[test]
    fn acknowledge_rearms() {
        let queue = CountingQueue::new(8);
        let signals = ProxySignals::new(0);
        assert!(signals.notify_serial(&queue));
        signals.acknowledge(WorkKind::Serial);
        assert!(signals.notify_serial(&queue));
        assert_eq!(queue.submitted().len(), 2);
    }

    #[test]
    fn rejected_work_clears_latch() {
        let queue = CountingQueue::new(0);
        let signals = ProxySignals::new(0);
        assert!(!signals.notify_can(&queue));
        assert!(!signals.is_pending(WorkKind::Can));
    }

    #[test]
    fn heapless_queue() {
        let queue: MpMcQueue<Work, 4> = MpMcQueue::new();
        let signals = ProxySignals::new(1);
        assert!(signals.notify_can(&queue));
        assert!(!signals.notify_can(&queue));
        assert_eq!(queue.dequeue(), Some(Work { port: 1, kind: WorkKind::Can }));
        assert_eq!(queue.dequeue(), None);
    }
}
