//! Per-device session engine (spec.md §2): wires the Serialized Executor,
//! Session Context, Session Identity Resolver, Ratchet Driver, Job Queue and
//! Message Dispatcher behind one facade, [`SessionEngine`].
//!
//! Grounded in the teacher's top-level `guard-service` crate, which exposes
//! one `Service` struct assembling its watcher, store and transport layers
//! behind a small public API; this facade follows the same shape.

pub mod communication;
pub mod config;
pub mod contact;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod friendship;
pub mod identity;
pub mod job;
pub mod message_record;
pub mod model;
pub mod queue;
pub mod ratchet_driver;
pub mod traits;

use std::sync::Arc;

use ratchet_core::manager::HybridRatchetManager;
use uuid::Uuid;

pub use communication::{Communication, CommunicationMembers, CommunicationType};
pub use config::EngineConfig;
pub use contact::ContactProps;
pub use context::{DccKey, DeviceKeys, SessionContext, SessionContextCell, SessionUser, UserConfiguration};
pub use error::EngineError;
pub use executor::SerializedExecutor;
pub use friendship::{FriendState, FriendshipMetadata};
pub use identity::{refresh_identities, SessionIdentityProps};
pub use job::{InboundTaskMessage, JobRecord, OutboundTaskMessage, Priority, TaskPayload};
pub use message_record::EncryptedMessage;
pub use model::{Decrypted, EncryptedBlob};
pub use queue::JobQueue;
pub use ratchet_driver::{DbKey, DecodedInbound, RatchetDriver};
pub use traits::{EventReceiver, KeysType, RotatedPublicKeys, SessionDelegate, SessionStore, SessionTransport};

/// Top-level handle to a running session engine for one local device
/// (spec.md §2). Construct with [`SessionEngine::new`], load or create the
/// [`SessionContext`] with [`SessionEngine::restore_session_context`] /
/// [`SessionEngine::bootstrap_session_context`], then feed work in with
/// [`SessionEngine::submit_outbound`] / [`SessionEngine::submit_inbound`].
pub struct SessionEngine {
    store: Arc<dyn SessionStore>,
    transport: Arc<dyn SessionTransport>,
    context: SessionContextCell,
    queue: Arc<JobQueue>,
    db_key: DbKey,
}

impl SessionEngine {
    /// Assemble the engine's components (§4.A-E) over caller-supplied
    /// storage, transport and app-facing callback implementations. Does not
    /// load any persisted state; call [`Self::restore_session_context`]
    /// before feeding tasks.
    pub fn new(
        store: Arc<dyn SessionStore>,
        transport: Arc<dyn SessionTransport>,
        receiver: Arc<dyn EventReceiver>,
        delegate: Arc<dyn SessionDelegate>,
        db_key: DbKey,
        config: EngineConfig,
        create_identity: impl Fn(&UserConfiguration, i64) -> SessionIdentityProps + Send + Sync + 'static,
    ) -> Result<Arc<Self>, String> {
        config.validate()?;

        let context = SessionContextCell::new();
        let manager = Arc::new(HybridRatchetManager::new());
        let driver = Arc::new(RatchetDriver::new(manager, context.clone(), db_key));
        let executor = SerializedExecutor::spawn();
        let queue = JobQueue::new(
            Arc::clone(&store),
            Arc::clone(&transport),
            receiver,
            delegate,
            driver,
            executor,
            config,
            context.clone(),
            db_key,
            Arc::new(create_identity),
        );

        Ok(Arc::new(Self {
            store,
            transport,
            context,
            queue,
            db_key,
        }))
    }

    /// Load the persisted [`SessionContext`] (if any) and resume the
    /// persisted job queue (§4.D "loadTasks"). Call once at process start.
    pub async fn restore_session_context(&self) -> Result<bool, EngineError> {
        let Some(blob) = self
            .store
            .fetch_session_context()
            .await
            .map_err(EngineError::Store)?
        else {
            return Ok(false);
        };
        let decrypted = blob
            .open::<SessionContext>(&self.db_key)
            .ok_or(EngineError::DecryptFailed)?;
        self.context.set(decrypted.props);
        self.queue.load_tasks().await?;
        Ok(true)
    }

    /// First-run setup: persist a freshly generated [`SessionContext`] and
    /// start the job queue against an empty backlog.
    pub async fn bootstrap_session_context(&self, ctx: SessionContext) -> Result<(), EngineError> {
        let blob = EncryptedBlob::seal(Uuid::nil(), &self.db_key, &ctx)?;
        self.store
            .create_session_context(blob)
            .await
            .map_err(EngineError::Store)?;
        self.context.set(ctx);
        self.queue.load_tasks().await
    }

    /// `refreshIdentities(secretName)` (spec.md §4.C), run against the
    /// current context's own device identity and persisted identities for
    /// `secret_name`.
    pub async fn refresh_identities(
        &self,
        secret_name: &str,
        stored: Vec<SessionIdentityProps>,
        create_identity: impl FnMut(&UserConfiguration, i64) -> SessionIdentityProps,
    ) -> Result<Vec<SessionIdentityProps>, EngineError> {
        let ctx = self.context.get().ok_or(EngineError::SessionNotInitialized)?;
        identity::refresh_identities(
            self.transport.as_ref(),
            secret_name,
            &ctx.session_user.secret_name,
            ctx.session_user.device_id,
            stored,
            create_identity,
        )
        .await
    }

    /// `feedTask` for an outbound write (§4.D/§4.E.1).
    pub async fn submit_outbound(
        &self,
        task: OutboundTaskMessage,
        priority: Priority,
    ) -> Result<(), EngineError> {
        self.queue.outbound_task(task, priority).await
    }

    /// `feedTask` for an inbound stream message (§4.D/§4.E.2).
    pub async fn submit_inbound(
        &self,
        task: InboundTaskMessage,
        priority: Priority,
    ) -> Result<(), EngineError> {
        self.queue.inbound_task(task, priority).await
    }

    pub fn session_context(&self) -> Option<SessionContext> {
        self.context.get()
    }

    /// Stop the job queue's runner permanently. Used on shutdown to let the
    /// process exit without waiting on a runner that would otherwise keep
    /// itself alive picking up delayed retries.
    pub fn cancel(&self) {
        self.queue.cancel();
    }
}
