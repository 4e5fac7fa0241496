//! Frame id allocation and response correlation.
//!
//! The radio echoes the frame id of a request in every response to it. The
//! [`FrameTable`] owns all 256 ids as a fixed arena of slots: an id is
//! reserved before its frame is written, a [`PendingRequest`] is registered
//! on it, and inbound responses are dispatched to that request until its
//! [`ResponseBehavior`] says it is complete.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tracing::{debug, trace};

use crate::behavior::{Completion, PendingRequest, ResponseBehavior, Timer};
use crate::error::{MeshError, Result};
use crate::lock;
use crate::types::{FRAME_ID_COUNT, FrameId};

enum Slot<V> {
    Free,
    /// Reserved with no request attached (fire-and-forget).
    Reserved,
    Pending(PendingRequest<V>),
}

struct Entry<V> {
    /// Bumped on every reservation so stale timers can be recognised.
    generation: u64,
    slot: Slot<V>,
    /// Frees the slot if no response arrives in time.
    lease: Option<Timer>,
}

struct TableState<V> {
    entries: Vec<Entry<V>>,
    last: usize,
    in_use: usize,
}

impl<V> TableState<V> {
    fn free(&mut self, index: usize) -> Option<PendingRequest<V>> {
        let entry = &mut self.entries[index];
        entry.lease = None;
        match std::mem::replace(&mut entry.slot, Slot::Free) {
            Slot::Free => None,
            Slot::Reserved => {
                self.in_use -= 1;
                None
            }
            Slot::Pending(request) => {
                self.in_use -= 1;
                Some(request)
            }
        }
    }
}

/// Fixed-capacity frame id pool and response correlation map.
///
/// Cloning the table yields another handle to the same slots.
pub struct FrameTable<V> {
    inner: Arc<Mutex<TableState<V>>>,
}

impl<V> Clone for FrameTable<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V: Send + 'static> FrameTable<V> {
    /// Create a table with every id free.
    pub fn new() -> Self {
        let entries = (0..FRAME_ID_COUNT)
            .map(|_| Entry {
                generation: 0,
                slot: Slot::Free,
                lease: None,
            })
            .collect();
        Self {
            inner: Arc::new(Mutex::new(TableState {
                entries,
                // Start so that id 1 is handed out first and id 0 last.
                last: 0,
                in_use: 0,
            })),
        }
    }

    /// Reserve the next free frame id.
    ///
    /// Scans circularly from just after the last id handed out; the last id
    /// itself is the final candidate. Fails with [`MeshError::QueueFull`]
    /// when every id is in use.
    pub fn reserve(&self) -> Result<FrameId> {
        let mut guard = lock(&self.inner);
        let state = &mut *guard;

        for offset in 1..=FRAME_ID_COUNT {
            let index = (state.last + offset) % FRAME_ID_COUNT;
            let entry = &mut state.entries[index];
            if matches!(entry.slot, Slot::Free) {
                entry.slot = Slot::Reserved;
                entry.generation += 1;
                state.last = index;
                state.in_use += 1;
                trace!(id = index, "reserved frame id");
                return Ok(FrameId(index as u8));
            }
        }

        Err(MeshError::QueueFull)
    }

    /// Attach a pending request to a reserved id.
    ///
    /// Must be called before the frame carrying `id` is written.
    pub fn register(
        &self,
        id: FrameId,
        behavior: ResponseBehavior,
        completion: Completion<V>,
    ) -> Result<()> {
        let mut state = lock(&self.inner);
        let entry = &mut state.entries[id.index()];

        match entry.slot {
            Slot::Reserved => {}
            Slot::Free => {
                return Err(MeshError::protocol(format!("frame id {id} is not reserved")));
            }
            Slot::Pending(_) => {
                return Err(MeshError::protocol(format!(
                    "frame id {id} already has a pending request"
                )));
            }
        }

        let mut request = PendingRequest::new(behavior, completion);
        if let ResponseBehavior::CollectUntilTimeout(after) = behavior {
            let table = Arc::downgrade(&self.inner);
            let generation = entry.generation;
            request.set_timer(Timer::start(after, move || {
                expire_weak(&table, id, generation);
            }));
        }
        entry.slot = Slot::Pending(request);
        Ok(())
    }

    /// Free `id` if it is still in use after `lifetime`.
    ///
    /// Meant for reservations without a request and for first-response
    /// requests, which otherwise wait forever for a lost response. A request
    /// freed this way is abandoned. The lease ends when the slot is freed.
    pub fn lease(&self, id: FrameId, lifetime: Duration) {
        let mut state = lock(&self.inner);
        let entry = &mut state.entries[id.index()];
        if matches!(entry.slot, Slot::Free) {
            return;
        }
        let table = Arc::downgrade(&self.inner);
        let generation = entry.generation;
        entry.lease = Some(Timer::start(lifetime, move || {
            lapse_weak(&table, id, generation);
        }));
    }

    /// Feed a response to the request holding `id`.
    ///
    /// The completion callback, if this response completes the request, runs
    /// on the calling thread after the table lock is released.
    pub fn dispatch(&self, id: FrameId, value: V) {
        let done = {
            let mut guard = lock(&self.inner);
            let state = &mut *guard;
            let entry = &mut state.entries[id.index()];

            let (done, free) = match &mut entry.slot {
                Slot::Free => {
                    debug!(%id, "dropping response for a frame id with no request");
                    (None, false)
                }
                Slot::Reserved => {
                    trace!(%id, "response to fire-and-forget frame discarded");
                    (None, true)
                }
                Slot::Pending(request) => {
                    let done = request.feed(value);
                    let free = done.is_some();
                    (done, free)
                }
            };
            if free {
                state.free(id.index());
            }
            done
        };

        if let Some((completion, values)) = done {
            completion(values);
        }
    }

    /// Free `id` without completing its request.
    ///
    /// Returns `false` if the id was not in use.
    pub fn release(&self, id: FrameId) -> bool {
        let mut state = lock(&self.inner);
        if matches!(state.entries[id.index()].slot, Slot::Free) {
            return false;
        }
        if let Some(mut request) = state.free(id.index()) {
            request.abandon();
        }
        true
    }

    /// Abandon every pending request and free all ids.
    ///
    /// No completion callback is invoked. Returns the number of requests
    /// abandoned.
    pub fn shutdown(&self) -> usize {
        let mut state = lock(&self.inner);
        let mut abandoned = 0;
        for index in 0..FRAME_ID_COUNT {
            if let Some(mut request) = state.free(index) {
                request.abandon();
                abandoned += 1;
            }
        }
        debug!(abandoned, "frame table shut down");
        abandoned
    }

    /// Number of ids currently in use.
    pub fn in_use(&self) -> usize {
        lock(&self.inner).in_use
    }

    #[cfg(test)]
    fn generation(&self, id: FrameId) -> u64 {
        lock(&self.inner).entries[id.index()].generation
    }
}

impl<V: Send + 'static> Default for FrameTable<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> std::fmt::Debug for FrameTable<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.inner);
        f.debug_struct("FrameTable")
            .field("in_use", &state.in_use)
            .field("last", &state.last)
            .finish()
    }
}

/// Complete a collect-until-timeout request when its timer fires.
///
/// Ignored if the table is gone, or if the slot was freed and reserved
/// again since the timer started.
fn expire_weak<V>(table: &Weak<Mutex<TableState<V>>>, id: FrameId, generation: u64) {
    let Some(inner) = table.upgrade() else {
        return;
    };

    let done = {
        let mut state = lock(&inner);
        let entry = &mut state.entries[id.index()];
        if entry.generation != generation {
            trace!(%id, "stale timer ignored");
            return;
        }
        let done = match &mut entry.slot {
            Slot::Pending(request) => request.expire(),
            _ => None,
        };
        if done.is_some() {
            state.free(id.index());
        }
        done
    };

    if let Some((completion, values)) = done {
        debug!(%id, responses = values.len(), "collect window closed");
        completion(values);
    }
}

/// Free a slot whose lease ran out.
fn lapse_weak<V>(table: &Weak<Mutex<TableState<V>>>, id: FrameId, generation: u64) {
    let Some(inner) = table.upgrade() else {
        return;
    };

    let abandoned = {
        let mut state = lock(&inner);
        let entry = &state.entries[id.index()];
        if entry.generation != generation || matches!(entry.slot, Slot::Free) {
            return;
        }
        let request = state.free(id.index());
        debug!(%id, "no response in time, frame id freed");
        request
    };

    if let Some(mut request) = abandoned {
        request.abandon();
    }
}
