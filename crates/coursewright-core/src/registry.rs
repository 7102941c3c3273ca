//! Thread registry: concurrency-safe map from thread id to [`WorkflowState`].
//!
//! All access goes through a `std::sync::RwLock`. Guards are never held
//! across an `.await`; callers receive cloned snapshots.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::Utc;

use crate::error::{Error, Result};
use crate::models::WorkflowState;

#[derive(Debug, Default)]
pub struct ThreadRegistry {
    threads: RwLock<HashMap<String, WorkflowState>>,
}

impl ThreadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new workflow. Rejects a thread id that is already live.
    pub fn insert(&self, state: WorkflowState) -> Result<()> {
        let mut map = self.write()?;
        if map.contains_key(&state.thread_id) {
            return Err(Error::validation(format!(
                "thread {} already exists",
                state.thread_id
            )));
        }
        map.insert(state.thread_id.clone(), state);
        Ok(())
    }

    /// Snapshot of one workflow's state.
    pub fn get(&self, thread_id: &str) -> Result<Option<WorkflowState>> {
        Ok(self.read()?.get(thread_id).cloned())
    }

    /// Mutate a workflow's state under the write lock.
    ///
    /// The step may only move forward and progress may only grow; a closure
    /// that violates either is rejected and the previous state is kept.
    /// Returns the updated snapshot.
    pub fn update<F>(&self, thread_id: &str, f: F) -> Result<WorkflowState>
    where
        F: FnOnce(&mut WorkflowState),
    {
        let mut map = self.write()?;
        let entry = map
            .get_mut(thread_id)
            .ok_or_else(|| Error::not_found(format!("thread {thread_id}")))?;

        let mut next = entry.clone();
        f(&mut next);
        if next.current_step < entry.current_step {
            return Err(Error::validation(format!(
                "thread {thread_id} cannot move back from {} to {}",
                entry.current_step, next.current_step
            )));
        }
        if next.progress < entry.progress {
            return Err(Error::validation(format!(
                "thread {thread_id} progress cannot decrease from {} to {}",
                entry.progress, next.progress
            )));
        }
        next.updated_at = Utc::now();
        *entry = next;
        Ok(entry.clone())
    }

    pub fn remove(&self, thread_id: &str) -> Result<Option<WorkflowState>> {
        Ok(self.write()?.remove(thread_id))
    }

    pub fn contains(&self, thread_id: &str) -> Result<bool> {
        Ok(self.read()?.contains_key(thread_id))
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.read()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.read()?.is_empty())
    }

    /// Live thread ids, sorted.
    pub fn ids(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self.read()?.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    /// Drop completed workflows whose completion is older than `retention`.
    /// Returns the evicted ids. A retention reaching past the earliest
    /// representable time evicts nothing.
    pub fn evict_completed(&self, retention: Duration) -> Result<Vec<String>> {
        let cutoff = chrono::Duration::from_std(retention)
            .ok()
            .and_then(|r| Utc::now().checked_sub_signed(r));
        let Some(cutoff) = cutoff else {
            return Ok(Vec::new());
        };
        let mut map = self.write()?;
        let expired: Vec<String> = map
            .values()
            .filter(|s| s.is_completed() && s.completed_at.is_some_and(|at| at <= cutoff))
            .map(|s| s.thread_id.clone())
            .collect();
        for id in &expired {
            map.remove(id);
        }
        Ok(expired)
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<String, WorkflowState>>> {
        self.threads
            .read()
            .map_err(|_| Error::Store("thread registry lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, WorkflowState>>> {
        self.threads
            .write()
            .map_err(|_| Error::Store("thread registry lock poisoned".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{GenerationParameters, WorkflowStep};
    use std::sync::Arc;

    fn state(id: &str) -> WorkflowState {
        WorkflowState::new(
            id,
            GenerationParameters {
                title: "T".into(),
                target_audience: "A".into(),
                teaching_style: "S".into(),
                learning_objective: "O".into(),
                compulsory_areas: vec![],
            },
        )
    }

    #[test]
    fn insert_get_remove() {
        let reg = ThreadRegistry::new();
        reg.insert(state("t1")).unwrap();
        assert!(reg.contains("t1").unwrap());
        assert!(reg.insert(state("t1")).is_err());
        assert_eq!(reg.get("t1").unwrap().unwrap().thread_id, "t1");

        assert!(reg.remove("t1").unwrap().is_some());
        assert!(reg.remove("t1").unwrap().is_none());
        assert!(reg.get("t1").unwrap().is_none());
    }

    #[test]
    fn update_moves_forward_only() {
        let reg = ThreadRegistry::new();
        reg.insert(state("t")).unwrap();

        let s = reg
            .update("t", |s| {
                s.current_step = WorkflowStep::Planning;
                s.progress = 20;
            })
            .unwrap();
        assert_eq!(s.current_step, WorkflowStep::Planning);

        let back = reg.update("t", |s| s.current_step = WorkflowStep::Analyzing);
        assert!(matches!(back, Err(Error::Validation(_))));
        let lower = reg.update("t", |s| s.progress = 10);
        assert!(matches!(lower, Err(Error::Validation(_))));

        let kept = reg.get("t").unwrap().unwrap();
        assert_eq!(kept.current_step, WorkflowStep::Planning);
        assert_eq!(kept.progress, 20);
    }

    #[test]
    fn update_unknown_thread_is_not_found() {
        let reg = ThreadRegistry::new();
        assert!(matches!(
            reg.update("nope", |_| {}),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn eviction_only_touches_old_completed_threads() {
        let reg = ThreadRegistry::new();
        let mut done_old = state("old");
        done_old.current_step = WorkflowStep::Completed;
        done_old.completed_at = Some(Utc::now() - chrono::Duration::hours(2));
        let mut done_new = state("new");
        done_new.current_step = WorkflowStep::Completed;
        done_new.completed_at = Some(Utc::now());
        reg.insert(done_old).unwrap();
        reg.insert(done_new).unwrap();
        reg.insert(state("running")).unwrap();

        let evicted = reg.evict_completed(Duration::from_secs(3600)).unwrap();
        assert_eq!(evicted, vec!["old".to_string()]);
        assert_eq!(reg.ids().unwrap(), vec!["new".to_string(), "running".to_string()]);
    }

    #[test]
    fn huge_retention_evicts_nothing() {
        let reg = ThreadRegistry::new();
        let mut done = state("done");
        done.current_step = WorkflowStep::Completed;
        done.completed_at = Some(Utc::now() - chrono::Duration::days(365));
        reg.insert(done).unwrap();

        for retention in [Duration::from_secs(10_000_000_000_000), Duration::MAX] {
            assert!(reg.evict_completed(retention).unwrap().is_empty());
        }
        assert_eq!(reg.ids().unwrap(), vec!["done".to_string()]);
    }

    #[test]
    fn concurrent_updates_are_serialized() {
        let reg = Arc::new(ThreadRegistry::new());
        reg.insert(state("t")).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let reg = reg.clone();
                std::thread::spawn(move || {
                    for _ in 0..10 {
                        reg.update("t", |s| s.progress = s.progress.saturating_add(1))
                            .unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(reg.get("t").unwrap().unwrap().progress, 80);
    }
}
