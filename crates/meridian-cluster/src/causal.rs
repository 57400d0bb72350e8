//! Meridian Causal Consistency Engine
//!
//! Decides whether an incoming write is causally deliverable, buffers
//! non-deliverable writes in a delayed queue, and re-examines the queue
//! after every successful delivery so that one delivery can unblock a
//! whole chain of buffered writes.
//!
//! Deliverability is checked in two stages:
//! 1. Action dependency — the metadata may state that this write depends on
//!    a key currently holding a specific value (PUT) or being absent
//!    (DELETE); the local store must satisfy that predicate.
//! 2. Clock dependency — for peer-originated writes, the sender's entry in
//!    the message clock must be exactly one ahead of our entry for the
//!    sender, and no other entry may be ahead of ours. Client-originated
//!    writes carry no prior causal view and always pass this stage.
//!
//! @version 0.1.0
//! @author Meridian Development Team

use crate::address::Address;
use crate::clock::VectorClock;
use crate::store::{KvStore, WriteResult};
use meridian_common::{MeridianError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};

// =============================================================================
// Write
// =============================================================================

/// The kind of mutation applied to a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriteAction {
    #[serde(rename = "PUT")]
    Put,
    #[serde(rename = "DELETE")]
    Delete,
}

/// A single mutation of the local store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Write {
    pub action: WriteAction,
    pub key: String,
    pub value: Option<Value>,
}

impl Write {
    pub fn put(key: impl Into<String>, value: Value) -> Self {
        Self {
            action: WriteAction::Put,
            key: key.into(),
            value: Some(value),
        }
    }

    pub fn delete(key: impl Into<String>) -> Self {
        Self {
            action: WriteAction::Delete,
            key: key.into(),
            value: None,
        }
    }
}

// =============================================================================
// Sender
// =============================================================================

/// Who originated a submission: an external client, or a peer replica
/// re-delivering one of its own client writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sender {
    Client,
    Peer(Address),
}

impl Sender {
    pub fn is_client(&self) -> bool {
        matches!(self, Sender::Client)
    }
}

// =============================================================================
// Causal Metadata
// =============================================================================

/// A dependency on the observable state of one key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionDependency {
    pub action: WriteAction,
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

/// Immutable causality snapshot attached to every broadcast write and
/// returned to clients with every response. The embedded action is the
/// write the holder last observed; from the receiver's point of view it is
/// the predicate this submission causally depends on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CausalMetadata {
    #[serde(rename = "depends-on", skip_serializing_if = "Option::is_none")]
    pub depends_on: Option<ActionDependency>,
    pub clocks: VectorClock,
}

impl CausalMetadata {
    pub fn new(depends_on: Option<ActionDependency>, clocks: VectorClock) -> Self {
        Self { depends_on, clocks }
    }
}

// =============================================================================
// Pending Write
// =============================================================================

/// A write that failed its deliverability check, held until its
/// dependencies are satisfied. Never dropped.
#[derive(Debug, Clone)]
struct PendingWrite {
    write: Write,
    sender: Sender,
    metadata: CausalMetadata,
}

// =============================================================================
// Delivery Outcome
// =============================================================================

/// A write that must be replicated to shard peers, paired with the
/// metadata snapshot to attach.
#[derive(Debug, Clone)]
pub struct OutboundWrite {
    pub write: Write,
    pub metadata: CausalMetadata,
}

/// Outcome of submitting a write to the engine.
#[derive(Debug, Clone)]
pub enum Delivery {
    /// The write (and possibly a chain of previously-queued writes) was
    /// applied. `metadata` is the snapshot to return to the caller;
    /// `broadcasts` lists every client-originated write delivered in this
    /// call that must now be fanned out to peers.
    Applied {
        result: WriteResult,
        metadata: CausalMetadata,
        broadcasts: Vec<OutboundWrite>,
        unblocked: usize,
    },
    /// Dependencies not yet satisfied; the write was queued, retry later.
    Queued,
}

// =============================================================================
// Causal Engine
// =============================================================================

/// Per-replica causal delivery engine. Owns the vector clock, the local
/// record store, and the delayed queue; the three mutate together under
/// the caller's single lock.
#[derive(Debug)]
pub struct CausalEngine {
    local: Address,
    clock: VectorClock,
    store: KvStore,
    queue: VecDeque<PendingWrite>,
}

impl CausalEngine {
    /// Create an engine tracking a clock entry for every initial replica.
    pub fn new<'a>(local: Address, replicas: impl IntoIterator<Item = &'a Address>) -> Self {
        Self {
            local,
            clock: VectorClock::for_replicas(replicas),
            store: KvStore::new(),
            queue: VecDeque::new(),
        }
    }

    pub fn local(&self) -> &Address {
        &self.local
    }

    pub fn clock(&self) -> &VectorClock {
        &self.clock
    }

    pub fn store(&self) -> &KvStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut KvStore {
        &mut self.store
    }

    /// Number of writes currently buffered in the delayed queue.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    // =========================================================================
    // Membership Side Effects
    // =========================================================================

    /// Start tracking a clock entry for a newly-joined replica.
    pub fn track_replica(&mut self, addr: &Address) {
        self.clock.track(addr);
    }

    /// Drop the clock entry for a permanently-removed replica.
    pub fn forget_replica(&mut self, addr: &Address) {
        self.clock.forget(addr);
    }

    /// Adopt a peer's snapshot during bootstrap or shard join.
    pub fn adopt_snapshot(&mut self, records: HashMap<String, Value>, clocks: &VectorClock) {
        self.store.load(records);
        self.clock.merge(clocks);
    }

    // =========================================================================
    // Submission
    // =========================================================================

    /// Submit a write for causal delivery.
    ///
    /// Returns `Delivery::Queued` when the deliverability check fails (the
    /// write is buffered, never dropped). On success the write is applied,
    /// the clock advanced, and the delayed queue rescanned end-to-end.
    pub fn submit(
        &mut self,
        write: Write,
        sender: Sender,
        metadata: Option<CausalMetadata>,
    ) -> Result<Delivery> {
        if let Some(md) = &metadata {
            if !self.deliverable(&sender, md) {
                tracing::debug!(
                    key = %write.key,
                    queued = self.queue.len() + 1,
                    "write not causally deliverable, buffering"
                );
                self.queue.push_back(PendingWrite {
                    write,
                    sender,
                    metadata: md.clone(),
                });
                return Ok(Delivery::Queued);
            }
        }

        // A client deleting an absent key is a lookup failure, not a
        // delivery; the clock must not advance.
        if sender.is_client()
            && write.action == WriteAction::Delete
            && !self.store.contains(&write.key)
        {
            return Err(MeridianError::KeyNotFound);
        }

        let result = self.apply(&write, &sender, metadata.as_ref());

        let mut broadcasts = Vec::new();
        if sender.is_client() {
            broadcasts.push(OutboundWrite {
                metadata: CausalMetadata::new(
                    metadata.as_ref().and_then(|m| m.depends_on.clone()),
                    self.clock.clone(),
                ),
                write: write.clone(),
            });
        }

        let unblocked = self.rescan(&mut broadcasts);

        let response_metadata = CausalMetadata::new(
            Some(ActionDependency {
                action: write.action,
                key: write.key.clone(),
                value: write.value.clone(),
            }),
            self.clock.clone(),
        );

        Ok(Delivery::Applied {
            result,
            metadata: response_metadata,
            broadcasts,
            unblocked,
        })
    }

    /// Check whether a causal read with the supplied metadata can be
    /// served: the client must not have observed writes this replica has
    /// not yet delivered.
    pub fn read_satisfiable(&self, metadata: &CausalMetadata) -> bool {
        metadata.clocks.dominated_by(&self.clock)
    }

    /// Metadata snapshot for read responses.
    pub fn read_metadata(&self, depends_on: Option<ActionDependency>) -> CausalMetadata {
        CausalMetadata::new(depends_on, self.clock.clone())
    }

    // =========================================================================
    // Deliverability
    // =========================================================================

    fn deliverable(&self, sender: &Sender, metadata: &CausalMetadata) -> bool {
        self.action_satisfied(metadata.depends_on.as_ref())
            && self.clock_satisfied(sender, &metadata.clocks)
    }

    fn action_satisfied(&self, dependency: Option<&ActionDependency>) -> bool {
        let Some(dep) = dependency else {
            return true;
        };
        match dep.action {
            WriteAction::Put => self.store.get(&dep.key) == dep.value.as_ref(),
            WriteAction::Delete => !self.store.contains(&dep.key),
        }
    }

    fn clock_satisfied(&self, sender: &Sender, incoming: &VectorClock) -> bool {
        let Sender::Peer(peer) = sender else {
            // A client has no prior causal view to violate.
            return true;
        };
        incoming.entries().all(|(replica, value)| {
            let local = self.clock.get(replica);
            if replica == peer {
                value == local + 1
            } else {
                value <= local
            }
        })
    }

    // =========================================================================
    // Application
    // =========================================================================

    fn apply(&mut self, write: &Write, sender: &Sender, metadata: Option<&CausalMetadata>) -> WriteResult {
        let result = match write.action {
            WriteAction::Put => {
                let value = write.value.clone().unwrap_or(Value::Null);
                self.store.put(write.key.clone(), value)
            }
            WriteAction::Delete => {
                self.store.remove(&write.key);
                WriteResult::Deleted
            }
        };

        match sender {
            Sender::Client => {
                let local = self.local.clone();
                self.clock.increment(&local);
            }
            Sender::Peer(_) => {
                if let Some(md) = metadata {
                    self.clock.merge(&md.clocks);
                }
            }
        }

        result
    }

    /// Work-list rescan of the delayed queue: repeatedly sweep the queue in
    /// FIFO order, delivering every now-deliverable entry, and stop only
    /// when a full pass makes no progress.
    fn rescan(&mut self, broadcasts: &mut Vec<OutboundWrite>) -> usize {
        let mut delivered = 0;
        loop {
            let mut progressed = false;
            let mut index = 0;
            while index < self.queue.len() {
                let ready = {
                    let pending = &self.queue[index];
                    self.deliverable(&pending.sender, &pending.metadata)
                };
                if !ready {
                    index += 1;
                    continue;
                }

                let pending = self
                    .queue
                    .remove(index)
                    .expect("index checked against queue length");
                self.apply(&pending.write, &pending.sender, Some(&pending.metadata));
                if pending.sender.is_client() {
                    broadcasts.push(OutboundWrite {
                        metadata: CausalMetadata::new(
                            pending.metadata.depends_on.clone(),
                            self.clock.clone(),
                        ),
                        write: pending.write,
                    });
                }
                delivered += 1;
                progressed = true;
            }
            if !progressed {
                break;
            }
        }
        if delivered > 0 {
            tracing::debug!(delivered, remaining = self.queue.len(), "delayed queue drained");
        }
        delivered
    }
}

// =============================================================================
// Tests
// =============================================================================
