use crate::networking::synapse::{Synapse, SynapseHeaders};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

/// Bounded, insertion ordered log of past calls. Entries are rebuilt from the
/// header representation only, so payload fields never end up here.
#[derive(Debug)]
pub struct CallHistory {
    capacity: usize,
    entries: Mutex<VecDeque<SynapseHeaders>>,
}

impl CallHistory {
    pub fn new(capacity: usize) -> Self {
        CallHistory {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
        }
    }

    pub fn record<P>(&self, synapse: &Synapse<P>)
    where
        P: crate::networking::synapse::Payload,
    {
        self.record_headers(redact(synapse));
    }

    pub fn record_headers(&self, headers: SynapseHeaders) {
        if self.capacity == 0 {
            return;
        }
        let mut entries = self.lock();
        while entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(headers);
    }

    pub fn snapshot(&self) -> Vec<SynapseHeaders> {
        self.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<SynapseHeaders>> {
        // a panic while holding the lock cannot leave a half written entry
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Header-only copy of an envelope, reconstructed from its wire headers.
pub fn redact<P>(synapse: &Synapse<P>) -> SynapseHeaders
where
    P: crate::networking::synapse::Payload,
{
    SynapseHeaders::from_header_map(&synapse.to_headers())
}

/// Records the last known header state of a call when dropped, unless the
/// call was committed first. Used by streaming calls the consumer may abandon.
pub(crate) struct HistoryGuard<'a> {
    history: &'a CallHistory,
    pending: Option<SynapseHeaders>,
}

impl<'a> HistoryGuard<'a> {
    pub(crate) fn new(history: &'a CallHistory, headers: SynapseHeaders) -> Self {
        HistoryGuard {
            history,
            pending: Some(headers),
        }
    }

    /// Replace the state recorded if the call is abandoned from here on.
    pub(crate) fn update(&mut self, headers: SynapseHeaders) {
        self.pending = Some(headers);
    }

    pub(crate) fn commit(mut self, headers: SynapseHeaders) {
        self.pending = None;
        self.history.record_headers(headers);
    }
}

impl Drop for HistoryGuard<'_> {
    fn drop(&mut self) {
        if let Some(headers) = self.pending.take() {
            self.history.record_headers(headers);
        }
    }
}
