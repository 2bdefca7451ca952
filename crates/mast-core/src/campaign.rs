//! The campaign scheduler: a process-wide, self-coalescing reconciliation
//! driver.
//!
//! At most one reconciliation pass runs at a time in a process. Triggering is
//! non-blocking: a caller that finds a pass already in flight is coalesced
//! into the *next* pass, because the in-flight one may have read the pending
//! set before the caller's change landed. A pass loads every applicable
//! pending change, resolves each into a commit candidate, and applies all
//! resulting state inside one transaction; any failure rolls the transaction
//! back and schedules an unconditional retry with bounded backoff.
//!
//! Callers can ask for a completion signal. A watcher fires exactly once,
//! and only after a pass that has observed the watcher's triggering change
//! has fully committed. A failed pass never fires watchers.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::build::{BuildDispatcher, BuildRequest};
use crate::error::Error;
use crate::resolve::{self, CommitCandidate, ResolveError};
use crate::store::{Store, StoreTx};
use crate::types::PendingChange;

const RETRY_BASE: Duration = Duration::from_millis(100);
const RETRY_CAP: Duration = Duration::from_secs(5);

/// Scheduler state guarded by one lock.
///
/// `current` holds completion watchers for the pass in flight; `next` holds
/// watchers for triggers that arrived while it ran. Keeping them apart is
/// what stops a watcher from firing before a pass has actually observed its
/// change.
#[derive(Default)]
struct DriverState {
    running: bool,
    rerun: bool,
    current: Vec<oneshot::Sender<()>>,
    next: Vec<oneshot::Sender<()>>,
    failures: u32,
}

/// A change applied by a committed pass, plus what the image builder needs.
struct Merged {
    artifact_name: String,
    candidate: CommitCandidate,
}

/// The reconciliation driver. One long-lived instance per process.
pub struct Campaign<S> {
    store: Arc<S>,
    builder: Option<Arc<dyn BuildDispatcher>>,
    state: Mutex<DriverState>,
}

impl<S: Store> Campaign<S> {
    pub fn new(store: Arc<S>, builder: Option<Arc<dyn BuildDispatcher>>) -> Arc<Self> {
        Arc::new(Self {
            store,
            builder,
            state: Mutex::new(DriverState::default()),
        })
    }

    /// Request a reconciliation pass.
    ///
    /// Returns immediately. If a pass is already running, the request is
    /// coalesced into the pass that will run after it. Must be called from
    /// within a tokio runtime.
    pub fn trigger(self: &Arc<Self>) {
        self.enqueue(None);
    }

    /// Request a pass and receive a signal once a pass that has observed the
    /// current database state commits.
    ///
    /// The receiver resolves only on success; failed passes retry until one
    /// commits.
    pub fn trigger_watch(self: &Arc<Self>) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.enqueue(Some(tx));
        rx
    }

    fn enqueue(self: &Arc<Self>, watcher: Option<oneshot::Sender<()>>) {
        let mut state = self.state.lock();
        if state.running {
            // The in-flight pass may have read the pending set already, so
            // this request is only honored by the pass after it.
            if let Some(tx) = watcher {
                state.next.push(tx);
            }
            state.rerun = true;
            debug!("campaign already running, coalesced");
            return;
        }
        state.running = true;
        state.rerun = false;
        if let Some(tx) = watcher {
            state.current.push(tx);
        }
        drop(state);

        let driver = Arc::clone(self);
        tokio::spawn(async move { driver.drive().await });
    }

    /// Run passes until no rerun is requested. Exactly one drive loop exists
    /// at a time; it owns the `running` flag for its whole lifetime.
    async fn drive(self: Arc<Self>) {
        enum Step {
            Exit,
            Continue(Option<Duration>),
        }

        loop {
            let outcome = self.pass().await;

            let (merged, step) = {
                let mut state = self.state.lock();
                let merged = match outcome {
                    Ok(merged) => {
                        state.failures = 0;
                        for watcher in state.current.drain(..) {
                            let _ = watcher.send(());
                        }
                        Some(merged)
                    }
                    Err(err) => {
                        warn!(error = %err, "campaign pass failed, scheduling retry");
                        state.rerun = true;
                        state.failures = state.failures.saturating_add(1);
                        // These watchers still deserve a signal once a pass
                        // succeeds; they ride along with the retry.
                        None
                    }
                };

                let step = if state.rerun {
                    let queued = std::mem::take(&mut state.next);
                    state.current.extend(queued);
                    state.rerun = false;
                    if merged.is_none() {
                        Step::Continue(Some(backoff(state.failures)))
                    } else {
                        Step::Continue(None)
                    }
                } else {
                    state.next.clear();
                    state.running = false;
                    Step::Exit
                };
                (merged, step)
            };

            if let Some(merged) = &merged {
                if !merged.is_empty() {
                    info!(merged = merged.len(), "campaign pass committed");
                }
            }
            if let (Some(merged), Some(builder)) = (merged, self.builder.as_ref()) {
                for item in merged {
                    builder.dispatch(BuildRequest {
                        artifact_name: item.artifact_name,
                        changesets: item.candidate.members,
                    });
                }
            }

            match step {
                Step::Exit => return,
                Step::Continue(Some(delay)) => tokio::time::sleep(delay).await,
                Step::Continue(None) => {}
            }
        }
    }

    /// One reconciliation pass: everything inside a single transaction on a
    /// blocking thread.
    async fn pass(&self) -> crate::Result<Vec<Merged>> {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || {
            store.with_tx(|tx| {
                let pending = tx.open_changes()?;
                debug!(count = pending.len(), "loaded open pending changes");

                let mut merged = Vec::with_capacity(pending.len());
                for change in &pending {
                    merged.push(resolve_one(tx, change)?);
                }
                for item in &merged {
                    tx.insert_commit(&item.candidate)?;
                }
                for item in &merged {
                    tx.set_head(&item.candidate.repository, &item.candidate.digest)?;
                }
                for item in &merged {
                    tx.resolve_change(
                        &item.candidate.repository,
                        item.candidate.changeset,
                        &item.candidate.digest,
                    )?;
                }
                Ok(merged)
            })
        })
        .await
        .map_err(|err| Error::Task(err.to_string()))?
    }
}

/// Gather the resolver's inputs for one pending change and run it.
fn resolve_one(tx: &mut dyn StoreTx, change: &PendingChange) -> crate::Result<Merged> {
    debug!(
        repository = %change.repository,
        changeset = %change.changeset,
        "resolving pending change"
    );

    let current = tx.tree_changesets(&change.repository)?;
    let target = tx
        .changeset(change.changeset)?
        .ok_or(ResolveError::MissingChangeset(change.changeset))?;
    let repository = tx
        .repository(&change.repository)?
        .ok_or_else(|| ResolveError::MissingRepository(change.repository.clone()))?;

    // Latest versions for dependencies the target introduces to the tree.
    let present: HashSet<&str> = current.iter().map(|c| c.name.as_str()).collect();
    let mut latest = HashMap::new();
    for name in &target.stakeholders {
        if present.contains(name.as_str()) || latest.contains_key(name) {
            continue;
        }
        if let Some(changeset) = tx.latest_changeset(name)? {
            latest.insert(name.clone(), changeset);
        }
    }

    let candidate = resolve::resolve(
        &change.repository,
        repository.head.as_deref(),
        current,
        target,
        latest,
    )?;

    debug!(
        repository = %candidate.repository,
        digest = %candidate.digest,
        members = candidate.members.len(),
        "generated commit candidate"
    );

    Ok(Merged {
        artifact_name: repository.artifact_name,
        candidate,
    })
}

fn backoff(failures: u32) -> Duration {
    let exponent = failures.saturating_sub(1).min(6);
    RETRY_BASE.saturating_mul(1u32 << exponent).min(RETRY_CAP)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::commit_digest;
    use crate::store::StoreError;
    use crate::types::{ChangeStatus, Changeset, Repository};
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use uuid::Uuid;

    #[derive(Clone, Default)]
    struct MockData {
        changesets: HashMap<Uuid, Changeset>,
        repositories: HashMap<String, Repository>,
        pending: Vec<PendingChange>,
        commits: HashMap<String, Vec<Uuid>>,
    }

    #[derive(Default)]
    struct MockStore {
        data: Mutex<MockData>,
        passes: AtomicUsize,
        commits_inserted: AtomicUsize,
        heads_set: AtomicUsize,
        fail_remaining: AtomicUsize,
        gate: Mutex<Option<mpsc::Receiver<()>>>,
    }

    struct MockTx<'a> {
        data: &'a mut MockData,
        commits_inserted: &'a AtomicUsize,
        heads_set: &'a AtomicUsize,
    }

    impl StoreTx for MockTx<'_> {
        fn open_changes(&mut self) -> Result<Vec<PendingChange>, StoreError> {
            let mut seen = HashSet::new();
            Ok(self
                .data
                .pending
                .iter()
                .filter(|c| c.status == ChangeStatus::Open)
                .filter(|c| seen.insert(c.repository.clone()))
                .cloned()
                .collect())
        }

        fn tree_changesets(&mut self, repository: &str) -> Result<Vec<Changeset>, StoreError> {
            let Some(head) = self
                .data
                .repositories
                .get(repository)
                .and_then(|r| r.head.clone())
            else {
                return Ok(Vec::new());
            };
            let members = self.data.commits.get(&head).cloned().unwrap_or_default();
            Ok(members
                .iter()
                .filter_map(|uuid| self.data.changesets.get(uuid).cloned())
                .collect())
        }

        fn changeset(&mut self, uuid: Uuid) -> Result<Option<Changeset>, StoreError> {
            Ok(self.data.changesets.get(&uuid).cloned())
        }

        fn latest_changeset(&mut self, name: &str) -> Result<Option<Changeset>, StoreError> {
            Ok(self
                .data
                .changesets
                .values()
                .filter(|c| c.name == name)
                .max_by_key(|c| c.created)
                .cloned())
        }

        fn repository(&mut self, name: &str) -> Result<Option<Repository>, StoreError> {
            Ok(self.data.repositories.get(name).cloned())
        }

        fn insert_commit(&mut self, candidate: &CommitCandidate) -> Result<(), StoreError> {
            if !self.data.commits.contains_key(&candidate.digest) {
                self.data
                    .commits
                    .insert(candidate.digest.clone(), candidate.member_uuids());
                self.commits_inserted.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        }

        fn set_head(&mut self, repository: &str, digest: &str) -> Result<(), StoreError> {
            let repo = self
                .data
                .repositories
                .get_mut(repository)
                .ok_or_else(|| StoreError::NotFound(repository.to_string()))?;
            repo.head = Some(digest.to_string());
            self.heads_set.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn resolve_change(
            &mut self,
            repository: &str,
            changeset: Uuid,
            digest: &str,
        ) -> Result<(), StoreError> {
            for change in &mut self.data.pending {
                if change.repository == repository && change.changeset == changeset {
                    change.status = ChangeStatus::Merged;
                    change.resolved_commit = Some(digest.to_string());
                }
            }
            Ok(())
        }
    }

    impl Store for MockStore {
        fn with_tx<T, F>(&self, f: F) -> crate::Result<T>
        where
            T: Send,
            F: FnOnce(&mut dyn StoreTx) -> crate::Result<T> + Send,
        {
            self.passes.fetch_add(1, Ordering::SeqCst);

            // Hold the pass open while the test issues more triggers.
            if let Some(gate) = self.gate.lock().take() {
                let _ = gate.recv_timeout(Duration::from_secs(5));
            }

            if self
                .fail_remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(StoreError::Backend("injected failure".into()).into());
            }

            // Commit-or-rollback: mutate a copy, write it back only on Ok.
            let mut data = self.data.lock();
            let mut scratch = data.clone();
            let result = f(&mut MockTx {
                data: &mut scratch,
                commits_inserted: &self.commits_inserted,
                heads_set: &self.heads_set,
            });
            if result.is_ok() {
                *data = scratch;
            }
            result
        }
    }

    fn changeset(name: &str) -> Changeset {
        Changeset {
            uuid: Uuid::new_v4(),
            name: name.to_string(),
            image: format!("registry.example.com/{name}"),
            stakeholders: Vec::new(),
            created: Utc::now(),
        }
    }

    /// Store with repository `app`, one changeset, one open pending change.
    fn seeded() -> (Arc<MockStore>, Uuid) {
        let mut data = MockData::default();
        let cs = changeset("app");
        let uuid = cs.uuid;
        data.changesets.insert(cs.uuid, cs);
        data.repositories.insert(
            "app".to_string(),
            Repository {
                name: "app".to_string(),
                artifact_name: "registry.example.com/app-release".to_string(),
                head: None,
            },
        );
        data.pending.push(PendingChange {
            repository: "app".to_string(),
            changeset: uuid,
            status: ChangeStatus::Open,
            resolved_commit: None,
            created: Utc::now(),
        });
        let store = MockStore {
            data: Mutex::new(data),
            ..MockStore::default()
        };
        (Arc::new(store), uuid)
    }

    async fn wait_until(f: impl Fn() -> bool) {
        for _ in 0..500 {
            if f() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition never reached");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn pass_with_no_pending_changes_mutates_nothing() {
        let store = Arc::new(MockStore::default());
        let campaign = Campaign::new(Arc::clone(&store), None);

        campaign.trigger_watch().await.unwrap();

        assert_eq!(store.passes.load(Ordering::SeqCst), 1);
        assert_eq!(store.commits_inserted.load(Ordering::SeqCst), 0);
        assert_eq!(store.heads_set.load(Ordering::SeqCst), 0);
        assert!(!store.data.lock().repositories.values().any(|r| r.head.is_some()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn pass_merges_a_pending_change() {
        let (store, uuid) = seeded();
        let campaign = Campaign::new(Arc::clone(&store), None);

        campaign.trigger_watch().await.unwrap();

        let expected = commit_digest(None, &[uuid]);
        let data = store.data.lock();
        assert_eq!(
            data.repositories["app"].head.as_deref(),
            Some(expected.as_str())
        );
        assert_eq!(data.commits[&expected], vec![uuid]);
        assert_eq!(data.pending[0].status, ChangeStatus::Merged);
        assert_eq!(data.pending[0].resolved_commit.as_deref(), Some(expected.as_str()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn triggers_during_a_pass_coalesce_into_exactly_one_more() {
        let (gate_tx, gate_rx) = mpsc::channel();
        let store = Arc::new(MockStore {
            gate: Mutex::new(Some(gate_rx)),
            ..MockStore::default()
        });
        let campaign = Campaign::new(Arc::clone(&store), None);

        campaign.trigger();
        wait_until(|| store.passes.load(Ordering::SeqCst) == 1).await;

        // Four requests land while the first pass is inside the store; all
        // four must be honored by a single follow-up pass.
        let watchers: Vec<_> = (0..4).map(|_| campaign.trigger_watch()).collect();
        gate_tx.send(()).unwrap();

        for watcher in watchers {
            watcher.await.unwrap();
        }
        assert_eq!(store.passes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn failed_pass_leaves_state_untouched_and_retries() {
        let (store, uuid) = seeded();
        store.fail_remaining.store(1, Ordering::SeqCst);
        let campaign = Campaign::new(Arc::clone(&store), None);

        // The watcher resolves only once a pass has actually committed.
        campaign.trigger_watch().await.unwrap();

        assert!(store.passes.load(Ordering::SeqCst) >= 2);
        let expected = commit_digest(None, &[uuid]);
        let data = store.data.lock();
        assert_eq!(
            data.repositories["app"].head.as_deref(),
            Some(expected.as_str())
        );
        assert_eq!(data.pending[0].status, ChangeStatus::Merged);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn repeated_triggers_resolve_each_change_once() {
        let (store, _) = seeded();
        let campaign = Campaign::new(Arc::clone(&store), None);

        campaign.trigger_watch().await.unwrap();
        campaign.trigger_watch().await.unwrap();

        // The second pass found nothing open and inserted nothing new.
        assert_eq!(store.commits_inserted.load(Ordering::SeqCst), 1);
        assert_eq!(store.heads_set.load(Ordering::SeqCst), 1);
    }

    struct RecordingDispatcher {
        requests: Mutex<Vec<BuildRequest>>,
    }

    impl BuildDispatcher for RecordingDispatcher {
        fn dispatch(&self, request: BuildRequest) {
            self.requests.lock().push(request);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn merged_commits_are_handed_to_the_builder() {
        let (store, uuid) = seeded();
        let dispatcher = Arc::new(RecordingDispatcher {
            requests: Mutex::new(Vec::new()),
        });
        let campaign = Campaign::new(Arc::clone(&store), Some(dispatcher.clone()));

        campaign.trigger_watch().await.unwrap();

        let requests = dispatcher.requests.lock();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].artifact_name, "registry.example.com/app-release");
        assert_eq!(requests[0].changesets.len(), 1);
        assert_eq!(requests[0].changesets[0].uuid, uuid);
    }

    #[test]
    fn backoff_is_capped() {
        assert_eq!(backoff(1), Duration::from_millis(100));
        assert_eq!(backoff(2), Duration::from_millis(200));
        assert_eq!(backoff(6), Duration::from_millis(3200));
        assert_eq!(backoff(60), RETRY_CAP);
    }
}
