//! Job Queue / Task Processor (spec.md §4.D): a persisted priority queue
//! feeding one job at a time through the Ratchet Driver, on the serialized
//! executor so two jobs never mutate ratchet state concurrently.
//!
//! Grounded in the teacher's `guard-service::engine` watcher loop (a single
//! `tokio::spawn` task draining shared state behind a lock, restarted by a
//! "kick" rather than polled), generalized from fixed event kinds to an
//! ordered job queue.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, OnceLock, Weak};

use tracing::{error, warn};
use uuid::Uuid;

use chrono::Duration;

use crate::{
    communication::Communication,
    config::EngineConfig,
    context::{SessionContextCell, UserConfiguration},
    dispatcher,
    error::EngineError,
    executor::SerializedExecutor,
    identity::{self, SessionIdentityProps},
    job::{JobRecord, Priority, TaskPayload},
    model::EncryptedBlob,
    ratchet_driver::{DbKey, RatchetDriver},
    traits::{EventReceiver, SessionDelegate, SessionStore, SessionTransport},
};

struct HeapEntry(JobRecord);

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id
    }
}
impl Eq for HeapEntry {}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Higher priority first; within a priority, smaller sequence_id
        // first (ascending submission order) — `BinaryHeap` is a max-heap,
        // so the sequence comparison is reversed.
        self.0
            .priority
            .cmp(&other.0.priority)
            .then_with(|| other.0.sequence_id.cmp(&self.0.sequence_id))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// `create_identity(configuration, session_context_id) -> SessionIdentityProps`,
/// supplied by the host at construction time (spec.md §4.C step 4).
pub type CreateIdentity = dyn Fn(&UserConfiguration, i64) -> SessionIdentityProps + Send + Sync;

/// Single-runner job queue (spec.md §4.D). Construct with [`JobQueue::new`]
/// and drive it with [`JobQueue::feed_task`] / [`JobQueue::load_tasks`].
pub struct JobQueue {
    store: Arc<dyn SessionStore>,
    transport: Arc<dyn SessionTransport>,
    receiver: Arc<dyn EventReceiver>,
    delegate: Arc<dyn SessionDelegate>,
    driver: Arc<RatchetDriver>,
    executor: SerializedExecutor,
    heap: parking_lot::Mutex<BinaryHeap<HeapEntry>>,
    communications: parking_lot::Mutex<Vec<Communication>>,
    next_sequence: AtomicU64,
    running: AtomicBool,
    cancelled: AtomicBool,
    config: EngineConfig,
    context: SessionContextCell,
    db_key: DbKey,
    create_identity: Arc<CreateIdentity>,
    /// Lets `&self` methods obtain an owned `Arc<Self>` to hand to
    /// `tokio::spawn`, without forcing every caller to go through
    /// `self: Arc<Self>` receivers (not a supported receiver type on
    /// stable Rust for anything but a plain `Arc<Self>` by value).
    self_ref: OnceLock<Weak<Self>>,
}

impl JobQueue {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn SessionStore>,
        transport: Arc<dyn SessionTransport>,
        receiver: Arc<dyn EventReceiver>,
        delegate: Arc<dyn SessionDelegate>,
        driver: Arc<RatchetDriver>,
        executor: SerializedExecutor,
        config: EngineConfig,
        context: SessionContextCell,
        db_key: DbKey,
        create_identity: Arc<CreateIdentity>,
    ) -> Arc<Self> {
        let queue = Arc::new(Self {
            store,
            transport,
            receiver,
            delegate,
            driver,
            executor,
            heap: parking_lot::Mutex::new(BinaryHeap::new()),
            communications: parking_lot::Mutex::new(Vec::new()),
            next_sequence: AtomicU64::new(0),
            running: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            config,
            context,
            db_key,
            create_identity,
            self_ref: OnceLock::new(),
        });
        let _ = queue.self_ref.set(Arc::downgrade(&queue));
        queue
    }

    /// `loadTasks()`: restore the persisted queue on startup. Jobs whose
    /// blob fails to decrypt are dropped (fail-closed, §4.B) rather than
    /// aborting the whole restore.
    pub async fn load_tasks(&self) -> Result<(), EngineError> {
        let blobs = self.store.read_all_jobs().await.map_err(EngineError::Store)?;
        let jobs: Vec<JobRecord> = blobs
            .into_iter()
            .filter_map(|blob| {
                let opened = blob.open::<JobRecord>(&self.db_key);
                if opened.is_none() {
                    warn!(job_id = %blob.id, "dropping job record that failed to decrypt");
                }
                opened.map(|d| d.props)
            })
            .collect();

        let max_seq = jobs.iter().map(|j| j.sequence_id).max().unwrap_or(0);
        self.next_sequence.store(max_seq + 1, AtomicOrdering::SeqCst);

        let mut heap = self.heap.lock();
        for job in jobs {
            heap.push(HeapEntry(job));
        }
        drop(heap);
        self.kick();
        Ok(())
    }

    /// `feedTask(task, priority)`: persist a new job and wake the runner.
    pub async fn feed_task(
        &self,
        task: TaskPayload,
        priority: Priority,
        is_background_task: bool,
    ) -> Result<(), EngineError> {
        let sequence_id = self.next_sequence.fetch_add(1, AtomicOrdering::SeqCst);
        let mut job = match task {
            TaskPayload::OutboundWrite(t) => JobRecord::new_outbound(sequence_id, priority, t),
            TaskPayload::InboundStream(t) => JobRecord::new_inbound(sequence_id, priority, t),
        };
        job.is_background_task = is_background_task;

        let blob = EncryptedBlob::seal(job.id, &self.db_key, &job)?;
        self.store.create_job(blob).await.map_err(EngineError::Store)?;
        self.heap.lock().push(HeapEntry(job));
        self.kick();
        Ok(())
    }

    /// Convenience wrapper matching spec.md §4.D naming for outbound jobs.
    pub async fn outbound_task(
        &self,
        task: crate::job::OutboundTaskMessage,
        priority: Priority,
    ) -> Result<(), EngineError> {
        self.feed_task(TaskPayload::OutboundWrite(task), priority, false).await
    }

    /// Convenience wrapper matching spec.md §4.D naming for inbound jobs.
    pub async fn inbound_task(
        &self,
        task: crate::job::InboundTaskMessage,
        priority: Priority,
    ) -> Result<(), EngineError> {
        self.feed_task(TaskPayload::InboundStream(task), priority, false).await
    }

    /// Stop the runner permanently. Already in-flight work finishes; no
    /// further jobs are picked up, and `kick()` becomes a no-op.
    pub fn cancel(&self) {
        self.cancelled.store(true, AtomicOrdering::SeqCst);
        self.executor.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(AtomicOrdering::SeqCst)
    }

    /// `refreshIdentities(senderSecretName)` (spec.md §4.C), run
    /// automatically ahead of dispatching an inbound job so identity
    /// selection by `deviceId` (§4.E.2) always sees the latest verified
    /// device set for the sender.
    async fn refresh_sender_identities(&self, sender_secret_name: &str) -> Result<(), EngineError> {
        let ctx = self.context.get().ok_or(EngineError::SessionNotInitialized)?;
        let my_secret_name = ctx.session_user.secret_name.clone();
        let my_device_id = ctx.session_user.device_id;

        let blobs = self.store.fetch_all_identities().await.map_err(EngineError::Store)?;
        let is_relevant = |p: &SessionIdentityProps| {
            p.secret_name == sender_secret_name || (p.secret_name == my_secret_name && p.device_id != my_device_id)
        };

        // (record id, decrypted props) for every currently-relevant identity,
        // so the reconciliation pass below never has to re-scan `blobs`.
        let relevant: Vec<(Uuid, SessionIdentityProps)> = blobs
            .iter()
            .filter_map(|blob| blob.open::<SessionIdentityProps>(&self.db_key))
            .filter(|d| is_relevant(&d.props))
            .map(|d| (d.id, d.props))
            .collect();

        let create_identity = Arc::clone(&self.create_identity);
        let refreshed = identity::refresh_identities(
            self.transport.as_ref(),
            sender_secret_name,
            &my_secret_name,
            my_device_id,
            relevant.iter().map(|(_, props)| props.clone()).collect(),
            |configuration, session_context_id| create_identity(configuration, session_context_id),
        )
        .await?;

        let refreshed_by_device: std::collections::HashMap<Uuid, &SessionIdentityProps> =
            refreshed.iter().map(|p| (p.device_id, p)).collect();

        for (device_id, props) in &refreshed_by_device {
            match relevant.iter().find(|(_, existing)| existing.device_id == *device_id) {
                Some((id, _)) => {
                    let blob = EncryptedBlob::seal(*id, &self.db_key, props)?;
                    self.store.update_identity(blob).await.map_err(EngineError::Store)?;
                }
                None => {
                    let blob = EncryptedBlob::seal(Uuid::new_v4(), &self.db_key, props)?;
                    self.store.create_identity(blob).await.map_err(EngineError::Store)?;
                }
            }
        }

        let refreshed_device_ids: HashSet<Uuid> = refreshed_by_device.keys().copied().collect();
        for (id, props) in &relevant {
            if !refreshed_device_ids.contains(&props.device_id) {
                self.store.delete_identity(*id).await.map_err(EngineError::Store)?;
            }
        }

        Ok(())
    }

    /// Start the runner if it isn't already going. The single-runner
    /// invariant is enforced by `running`: only the thread that flips it
    /// false→true spawns a loop.
    fn kick(&self) {
        if self.is_cancelled() {
            return;
        }
        if self
            .running
            .compare_exchange(false, true, AtomicOrdering::SeqCst, AtomicOrdering::SeqCst)
            .is_ok()
        {
            let Some(this) = self.self_ref.get().and_then(Weak::upgrade) else {
                self.running.store(false, AtomicOrdering::SeqCst);
                return;
            };
            tokio::spawn(async move { this.run().await });
        }
    }

    async fn run(self: Arc<Self>) {
        loop {
            if self.is_cancelled() {
                self.running.store(false, AtomicOrdering::SeqCst);
                return;
            }

            let next = self.heap.lock().pop();
            let Some(HeapEntry(job)) = next else {
                self.running.store(false, AtomicOrdering::SeqCst);
                return;
            };

            if job.is_delayed_until_future() {
                // Not viable yet: put it back unchanged and stop rather than
                // busy-wait; a later `feed_task`/`load_tasks` call restarts
                // the runner.
                self.heap.lock().push(HeapEntry(job));
                self.running.store(false, AtomicOrdering::SeqCst);
                return;
            }

            if let TaskPayload::InboundStream(inbound) = &job.task {
                if let Err(e) = self.refresh_sender_identities(&inbound.sender_secret_name).await {
                    warn!(sender = %inbound.sender_secret_name, error = %e, "identity refresh before dispatch failed");
                }
            }

            let identities = match self.store.fetch_all_identities().await {
                Ok(v) => v,
                Err(e) => {
                    error!(error = %e, "failed to load identities; stopping runner");
                    self.heap.lock().push(HeapEntry(job));
                    self.running.store(false, AtomicOrdering::SeqCst);
                    return;
                }
            };

            let result = self.execute_job(&job, &identities).await;
            match result {
                Ok(()) => {
                    let _ = self.store.delete_job(job.id).await;
                }
                Err(e) if e.is_poison() => {
                    warn!(job_id = %job.id, error = %e, "poisoned job; deleting");
                    let _ = self.store.delete_job(job.id).await;
                }
                Err(EngineError::InitialMessageNotReceived) => {
                    // The driver already stashed the underlying message;
                    // the job record itself is done.
                    let _ = self.store.delete_job(job.id).await;
                }
                Err(e) => {
                    let mut retried = job;
                    retried.attempts += 1;

                    if retried.attempts >= self.config.max_job_attempts {
                        warn!(
                            job_id = %retried.id,
                            attempts = retried.attempts,
                            error = %e,
                            "job exceeded max attempts; poisoning"
                        );
                        let _ = self.store.delete_job(retried.id).await;
                        continue;
                    }

                    error!(job_id = %retried.id, error = %e, "job failed; will retry");
                    retried.delayed_until = Some(
                        chrono::Utc::now() + Duration::seconds(self.config.job_retry_backoff_secs as i64),
                    );
                    if let Ok(blob) = EncryptedBlob::seal(retried.id, &self.db_key, &retried) {
                        let _ = self.store.update_job(blob).await;
                    }
                    self.heap.lock().push(HeapEntry(retried));
                    // Other jobs may still be runnable (this one is merely
                    // delayed); only stop the runner once the heap is
                    // actually empty or every remaining job is delayed,
                    // which the top of the loop already checks.
                    continue;
                }
            }
        }
    }

    async fn execute_job(
        &self,
        job: &JobRecord,
        identities: &[EncryptedBlob],
    ) -> Result<(), EngineError> {
        let driver = Arc::clone(&self.driver);
        let store = Arc::clone(&self.store);
        let transport = Arc::clone(&self.transport);
        let delegate = Arc::clone(&self.delegate);
        let receiver = Arc::clone(&self.receiver);

        match &job.task {
            TaskPayload::OutboundWrite(task) => {
                let task = task.clone();
                let identities = identities.to_vec();
                self.executor
                    .submit(async move {
                        driver
                            .handle_write_message(task, &identities, store.as_ref(), transport.as_ref(), delegate.as_ref())
                            .await
                            .map(|_| ())
                    })
                    .await
            }
            TaskPayload::InboundStream(task) => {
                let task = task.clone();
                let identities = identities.to_vec();
                let decoded = self
                    .executor
                    .submit(async move {
                        driver
                            .handle_stream_message(task, &identities, store.as_ref(), transport.as_ref(), delegate.as_ref())
                            .await
                    })
                    .await?;

                let mut cache = self.communications.lock().clone();
                for item in decoded {
                    dispatcher::dispatch(
                        item.message,
                        &item.sender_secret_name,
                        item.sender_device_id,
                        item.session_context_id,
                        item.shared_message_id,
                        &mut cache,
                        store.as_ref(),
                        receiver.as_ref(),
                        delegate.as_ref(),
                        &self.context,
                        &self.db_key,
                    )
                    .await?;
                }
                *self.communications.lock() = cache;
                Ok(())
            }
        }
    }
}
