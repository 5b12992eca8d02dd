// Sharded descriptor → holder map; unrelated descriptors take different locks.
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHasher};

use crate::core::error::Error;
use crate::core::schema::Schema;
use crate::core::store::descriptor::StreamDescriptor;
use crate::core::store::holder::StreamHolder;
use crate::core::store::session::SessionId;

type Shard = RwLock<FxHashMap<StreamDescriptor, Arc<StreamHolder>>>;

pub(crate) struct Registry {
    shards: Vec<Shard>,
}

impl Registry {
    pub fn new(shard_count: usize) -> Self {
        let shards = (0..shard_count.max(1))
            .map(|_| RwLock::new(FxHashMap::default()))
            .collect();
        Self { shards }
    }

    fn shard(&self, descriptor: &StreamDescriptor) -> &Shard {
        let mut hasher = FxHasher::default();
        descriptor.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % self.shards.len()]
    }

    pub fn get(&self, descriptor: &StreamDescriptor) -> Option<Arc<StreamHolder>> {
        self.shard(descriptor).read().get(descriptor).cloned()
    }

    /// Finds or creates the holder and registers `session` on it while the
    /// shard lock is held, so idle-holder removal cannot race the start.
    pub fn begin(
        &self,
        descriptor: &StreamDescriptor,
        schema: &Arc<Schema>,
        session: SessionId,
    ) -> Result<Arc<StreamHolder>, Error> {
        let mut shard = self.shard(descriptor).write();
        let holder = shard
            .entry(descriptor.clone())
            .or_insert_with(|| Arc::new(StreamHolder::new(descriptor.clone(), Arc::clone(schema))))
            .clone();
        holder.begin_session(session, schema)?;
        Ok(holder)
    }

    /// Removes `holder` if it is still registered and has nothing committed
    /// or pending.
    pub fn release_if_idle(&self, holder: &Arc<StreamHolder>) -> bool {
        let mut shard = self.shard(holder.descriptor()).write();
        let registered = shard
            .get(holder.descriptor())
            .is_some_and(|current| Arc::ptr_eq(current, holder));
        if registered && holder.is_idle() {
            shard.remove(holder.descriptor());
            return true;
        }
        false
    }

    /// Removes an ACTIVE holder; EMPTY holders stay for their pending sessions.
    pub fn remove_active(&self, descriptor: &StreamDescriptor) -> Option<Arc<StreamHolder>> {
        let mut shard = self.shard(descriptor).write();
        if !shard.get(descriptor).is_some_and(|holder| holder.is_active()) {
            return None;
        }
        let holder = shard.remove(descriptor)?;
        holder.mark_dropped();
        Some(holder)
    }

    pub fn snapshot(&self) -> Vec<Arc<StreamHolder>> {
        self.shards
            .iter()
            .flat_map(|shard| shard.read().values().cloned().collect::<Vec<_>>())
            .collect()
    }

    pub fn clear(&self) -> usize {
        let mut removed = 0;
        for shard in &self.shards {
            for (_, holder) in shard.write().drain() {
                holder.mark_dropped();
                removed += 1;
            }
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::Registry;
    use crate::core::batch::tests::{person_batch, person_schema};
    use crate::core::buffer::Arena;
    use crate::core::store::descriptor::StreamDescriptor;
    use crate::core::store::session::SessionId;

    #[test]
    fn begin_reuses_the_registered_holder() {
        let registry = Registry::new(4);
        let descriptor = StreamDescriptor::path(["a"]);
        let first = registry.begin(&descriptor, &person_schema(), SessionId(1)).expect("first");
        let second = registry.begin(&descriptor, &person_schema(), SessionId(2)).expect("second");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.pending_sessions(), 2);
    }

    #[test]
    fn idle_holders_are_released() {
        let registry = Registry::new(4);
        let descriptor = StreamDescriptor::path(["a"]);
        let holder = registry.begin(&descriptor, &person_schema(), SessionId(1)).expect("begin");
        assert!(!registry.release_if_idle(&holder));
        holder.abort(SessionId(1));
        assert!(registry.release_if_idle(&holder));
        assert!(registry.get(&descriptor).is_none());
    }

    #[test]
    fn remove_active_skips_empty_holders() {
        let arena = Arena::new();
        let registry = Registry::new(1);
        let descriptor = StreamDescriptor::path(["a"]);
        let holder = registry.begin(&descriptor, &person_schema(), SessionId(1)).expect("begin");
        assert!(registry.remove_active(&descriptor).is_none());
        holder
            .commit(SessionId(1), vec![Arc::new(person_batch(&arena))])
            .expect("commit");
        assert!(registry.remove_active(&descriptor).is_some());
        assert!(registry.snapshot().is_empty());
    }
}
