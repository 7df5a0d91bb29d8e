//! Deferred-send timer.
//!
//! A single task holds a min-heap of due times and hands messages back to
//! the dispatch queue when they come due. Admission already bounded
//! `scheduled_for` to the scheduling horizon, so the heap stays small
//! relative to traffic.

use std::{
    cmp::Reverse,
    collections::BinaryHeap,
    sync::{Arc, Mutex},
    time::Duration,
};

use chrono::{DateTime, Utc};
use courier_core::{Clock, MessageId};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::dispatcher::Dispatcher;

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
struct DueEntry {
    at: DateTime<Utc>,
    id: uuid::Uuid,
}

/// Timer feeding deferred messages back into the dispatch queue.
#[derive(Debug)]
pub struct Scheduler {
    clock: Arc<dyn Clock>,
    heap: Mutex<BinaryHeap<Reverse<DueEntry>>>,
    wakeup: Notify,
}

impl Scheduler {
    /// Creates an empty scheduler.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock, heap: Mutex::new(BinaryHeap::new()), wakeup: Notify::new() }
    }

    /// Registers a stored message for dispatch at `at`.
    pub fn schedule(&self, id: MessageId, at: DateTime<Utc>) {
        let mut heap = self.heap.lock().unwrap_or_else(|e| e.into_inner());
        heap.push(Reverse(DueEntry { at, id: id.0 }));
        drop(heap);
        self.wakeup.notify_one();
    }

    /// Number of messages waiting for their due time.
    pub fn pending(&self) -> usize {
        self.heap.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn pop_due(&self, now: DateTime<Utc>) -> Option<MessageId> {
        let mut heap = self.heap.lock().unwrap_or_else(|e| e.into_inner());
        match heap.peek() {
            Some(Reverse(entry)) if entry.at <= now => {
                let Reverse(entry) = heap.pop()?;
                Some(MessageId::from(entry.id))
            },
            _ => None,
        }
    }

    fn next_due(&self) -> Option<DateTime<Utc>> {
        let heap = self.heap.lock().unwrap_or_else(|e| e.into_inner());
        heap.peek().map(|Reverse(entry)| entry.at)
    }

    /// Runs the wakeup loop until cancelled. Due messages re-enter the
    /// dispatch queue via [`Dispatcher::requeue`].
    pub async fn run(self: Arc<Self>, dispatcher: Dispatcher, cancel: CancellationToken) {
        info!("scheduler started");
        loop {
            while let Some(id) = self.pop_due(self.clock.now_utc()) {
                if let Err(error) = dispatcher.requeue(id).await {
                    error!(message_id = %id, %error, "scheduled requeue failed");
                }
            }

            let wait = match self.next_due() {
                Some(at) => {
                    let now = self.clock.now_utc();
                    (at - now).to_std().unwrap_or(Duration::ZERO)
                },
                // Nothing queued; sleep until a schedule() wakes us.
                None => Duration::from_secs(3600),
            };

            tokio::select! {
                () = cancel.cancelled() => return,
                () = self.wakeup.notified() => {},
                () = self.clock.sleep(wait) => {},
            }
        }
    }
}
