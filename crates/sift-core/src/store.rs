//! Pluggable storage for node working memories.
//!
//! Nodes keep their live state in process. After every committed change the
//! network hands each touched node's [`MemoryChange`] to the
//! [`MemoryStore`], and deletes the snapshots of nodes removed with their
//! last rule. Any store honouring this contract can be plugged in;
//! [`InMemoryStore`] is the reference implementation.

use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

use crate::error::{SiftError, SiftResult};
use crate::memory::{MemoryChange, WorkingMemory};
use crate::rete_nodes::NodeId;

/// Storage contract used by the network
pub trait MemoryStore: Send + Sync {
    fn save_memory(&self, node_id: NodeId, memory: &WorkingMemory) -> SiftResult<()>;

    /// `Ok(None)` when nothing was ever saved for `node_id`
    fn load_memory(&self, node_id: NodeId) -> SiftResult<Option<WorkingMemory>>;

    /// Deleting an unknown node is not an error
    fn delete_memory(&self, node_id: NodeId) -> SiftResult<()>;

    fn list_nodes(&self) -> SiftResult<Vec<NodeId>>;

    /// Write the entries of `change` into the memory of `node_id`, creating
    /// the memory when none exists.
    ///
    /// The default reads the whole memory back and saves it again. Stores
    /// able to update entries in place should override it.
    fn apply_change(&self, node_id: NodeId, change: &MemoryChange) -> SiftResult<()> {
        let mut memory = self.load_memory(node_id)?.unwrap_or_default();
        change.apply_to(&mut memory);
        self.save_memory(node_id, &memory)
    }
}

/// Map-backed store guarded by a reader/writer lock. Reads hand out deep
/// copies so callers can never alias stored state.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    memories: RwLock<HashMap<NodeId, WorkingMemory>>,
    fail_saves: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail (fault injection)
    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.memories.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned(node_id: Option<NodeId>) -> SiftError {
    SiftError::store(node_id, "memory store lock poisoned")
}

impl MemoryStore for InMemoryStore {
    fn save_memory(&self, node_id: NodeId, memory: &WorkingMemory) -> SiftResult<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(SiftError::store(Some(node_id), "save rejected"));
        }
        let mut memories = self.memories.write().map_err(|_| poisoned(Some(node_id)))?;
        memories.insert(node_id, memory.deep_copy());
        debug!(node_id = node_id, facts = memory.fact_count(), tokens = memory.token_count(), "Saved node memory");
        Ok(())
    }

    fn load_memory(&self, node_id: NodeId) -> SiftResult<Option<WorkingMemory>> {
        let memories = self.memories.read().map_err(|_| poisoned(Some(node_id)))?;
        Ok(memories.get(&node_id).map(WorkingMemory::deep_copy))
    }

    fn delete_memory(&self, node_id: NodeId) -> SiftResult<()> {
        let mut memories = self.memories.write().map_err(|_| poisoned(Some(node_id)))?;
        memories.remove(&node_id);
        Ok(())
    }

    fn list_nodes(&self) -> SiftResult<Vec<NodeId>> {
        let memories = self.memories.read().map_err(|_| poisoned(None))?;
        let mut ids: Vec<NodeId> = memories.keys().copied().collect();
        ids.sort_unstable();
        Ok(ids)
    }

    fn apply_change(&self, node_id: NodeId, change: &MemoryChange) -> SiftResult<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(SiftError::store(Some(node_id), "save rejected"));
        }
        let mut memories = self.memories.write().map_err(|_| poisoned(Some(node_id)))?;
        change.deep_copy().apply_to(memories.entry(node_id).or_default());
        debug!(node_id = node_id, entries = change.len(), "Applied node memory change");
        Ok(())
    }
}
