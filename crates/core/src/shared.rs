//! Schedule shared between the negotiation task and the slot executor.

use std::sync::Arc;

use log::trace;
use tokio::sync::RwLock;

use crate::resolver::NextActiveLink;
use crate::schedule::{ScheduleError, ScheduleStore};
use crate::types::Asn;

/// Lock-guarded [`ScheduleStore`].
///
/// Mutators wait for the lock. The slot executor never waits: its reads fail
/// with [`ScheduleError::Locked`] while an update is in progress, so a
/// half-rebuilt slotframe is never observed.
#[derive(Clone, Default)]
pub struct SharedSchedule {
    inner: Arc<RwLock<ScheduleStore>>,
}

impl SharedSchedule {
    pub fn new(store: ScheduleStore) -> Self {
        Self {
            inner: Arc::new(RwLock::new(store)),
        }
    }

    pub fn is_locked(&self) -> bool {
        self.inner.try_read().is_err()
    }

    /// Runs `f` with exclusive access, yielding until the lock is free.
    pub async fn update<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut ScheduleStore) -> R,
    {
        let mut store = self.inner.write().await;
        f(&mut store)
    }

    /// Non-blocking read for the executor path.
    pub fn try_with<F, R>(&self, f: F) -> Result<R, ScheduleError>
    where
        F: FnOnce(&ScheduleStore) -> R,
    {
        let store = self.inner.try_read().map_err(|_| ScheduleError::Locked)?;
        Ok(f(&store))
    }

    pub fn try_next_active_link(&self, asn: Asn) -> Result<Option<NextActiveLink>, ScheduleError> {
        let next = self.try_with(|store| store.next_active_link(asn));
        if next.is_err() {
            trace!("next_active_link at asn {} refused: schedule locked", asn);
        }
        next
    }

    pub async fn snapshot(&self) -> ScheduleStore {
        self.inner.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::{LinkOptions, LinkType};
    use crate::types::Destination;

    #[tokio::test]
    async fn test_executor_read_refused_while_locked() {
        let shared = SharedSchedule::default();
        shared
            .update(|store| {
                store.add_slotframe(0, 4)?;
                store.add_link(0, LinkOptions::TX, LinkType::Normal, Destination::Broadcast, 1, 0)?;
                Ok::<_, ScheduleError>(())
            })
            .await
            .unwrap();

        let guard = shared.inner.write().await;
        assert!(shared.is_locked());
        assert_eq!(shared.try_next_active_link(0).unwrap_err(), ScheduleError::Locked);
        drop(guard);

        assert!(!shared.is_locked());
        let next = shared.try_next_active_link(0).unwrap().unwrap();
        assert_eq!(next.link.timeslot, 1);
        assert_eq!(next.time_offset, 1);
    }

    #[tokio::test]
    async fn test_snapshot_is_detached() {
        let shared = SharedSchedule::default();
        shared.update(|store| store.add_slotframe(7, 3).map(|_| ())).await.unwrap();
        let snapshot = shared.snapshot().await;
        shared.update(|store| store.remove_all_slotframes()).await;
        assert!(snapshot.get_slotframe_by_handle(7).is_some());
        tokio_test::assert_ok!(shared.try_with(|store| assert!(store.slotframes().is_empty())));
    }
}
