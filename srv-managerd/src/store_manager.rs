use std::thread;
use tokio::sync::{mpsc, oneshot};
use anyhow::{Context, Result};
use shared::types::{ProbeOutcome, StatusSnapshot, Target, TargetFields, TargetStatus};
use uuid::Uuid;
use crate::store::db::StoreDb;

/// Commands sent to the store thread
pub enum StoreCommand {
    List(oneshot::Sender<Result<Vec<Target>>>),
    Get(Uuid, oneshot::Sender<Result<Option<Target>>>),
    FindByExternalKey(String, oneshot::Sender<Result<Option<Target>>>),
    Create {
        fields: TargetFields,
        external_key: Option<String>,
        reply: oneshot::Sender<Result<Target>>,
    },
    Update(Uuid, TargetFields, oneshot::Sender<Result<Option<Target>>>),
    UpdateDestination {
        id: Uuid,
        host: String,
        port: u16,
        reply: oneshot::Sender<Result<bool>>,
    },
    Delete(Uuid, oneshot::Sender<Result<bool>>),
    RecordStatus(Uuid, ProbeOutcome, oneshot::Sender<Result<StatusSnapshot>>),
    History {
        target_id: Uuid,
        limit: u32,
        reply: oneshot::Sender<Result<Vec<StatusSnapshot>>>,
    },
    Latest(oneshot::Sender<Result<Vec<TargetStatus>>>),
    Shutdown,
}

/// Handle to the target registry and status recorder.
///
/// The SQLite connection lives on a dedicated thread; every method is a
/// request/reply round trip over a channel, so the handle is cheap to clone
/// into probe tasks and HTTP handlers.
#[derive(Clone)]
pub struct StoreHandle {
    tx: mpsc::Sender<StoreCommand>,
}

impl StoreHandle {
    /// Spawn a new store thread with the given database
    pub fn spawn(db: StoreDb) -> Self {
        let (tx, mut rx) = mpsc::channel::<StoreCommand>(256);

        thread::spawn(move || {
            while let Some(cmd) = rx.blocking_recv() {
                match cmd {
                    StoreCommand::List(reply) => {
                        let _ = reply.send(db.list_targets());
                    }
                    StoreCommand::Get(id, reply) => {
                        let _ = reply.send(db.get_target(id));
                    }
                    StoreCommand::FindByExternalKey(key, reply) => {
                        let _ = reply.send(db.find_by_external_key(&key));
                    }
                    StoreCommand::Create { fields, external_key, reply } => {
                        let _ = reply.send(db.create_target(&fields, external_key.as_deref()));
                    }
                    StoreCommand::Update(id, fields, reply) => {
                        let _ = reply.send(db.update_target(id, &fields));
                    }
                    StoreCommand::UpdateDestination { id, host, port, reply } => {
                        let _ = reply.send(db.update_destination(id, &host, port));
                    }
                    StoreCommand::Delete(id, reply) => {
                        let _ = reply.send(db.delete_target(id));
                    }
                    StoreCommand::RecordStatus(target_id, outcome, reply) => {
                        let _ = reply.send(db.insert_status(target_id, &outcome));
                    }
                    StoreCommand::History { target_id, limit, reply } => {
                        let _ = reply.send(db.status_history(target_id, limit));
                    }
                    StoreCommand::Latest(reply) => {
                        let _ = reply.send(db.latest_statuses());
                    }
                    StoreCommand::Shutdown => {
                        tracing::info!("Store thread shutting down");
                        break;
                    }
                }
            }
        });

        Self { tx }
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<T>>) -> StoreCommand,
    ) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .context("Store thread is not running")?;
        rx.await.context("Store thread dropped the request")?
    }

    /// All targets in creation order
    pub async fn list(&self) -> Result<Vec<Target>> {
        self.request(StoreCommand::List).await
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Target>> {
        self.request(|reply| StoreCommand::Get(id, reply)).await
    }

    pub async fn find_by_external_key(&self, key: String) -> Result<Option<Target>> {
        self.request(|reply| StoreCommand::FindByExternalKey(key, reply)).await
    }

    pub async fn create(&self, fields: TargetFields, external_key: Option<String>) -> Result<Target> {
        self.request(|reply| StoreCommand::Create { fields, external_key, reply }).await
    }

    pub async fn update(&self, id: Uuid, fields: TargetFields) -> Result<Option<Target>> {
        self.request(|reply| StoreCommand::Update(id, fields, reply)).await
    }

    /// Change only host and port. Returns true if data changed.
    pub async fn update_destination(&self, id: Uuid, host: String, port: u16) -> Result<bool> {
        self.request(|reply| StoreCommand::UpdateDestination { id, host, port, reply }).await
    }

    pub async fn delete(&self, id: Uuid) -> Result<bool> {
        self.request(|reply| StoreCommand::Delete(id, reply)).await
    }

    /// Append one status snapshot for a target
    pub async fn record_status(&self, target_id: Uuid, outcome: ProbeOutcome) -> Result<StatusSnapshot> {
        self.request(|reply| StoreCommand::RecordStatus(target_id, outcome, reply)).await
    }

    /// Status history, newest first
    pub async fn history(&self, target_id: Uuid, limit: u32) -> Result<Vec<StatusSnapshot>> {
        self.request(|reply| StoreCommand::History { target_id, limit, reply }).await
    }

    /// Latest snapshot per target
    pub async fn latest(&self) -> Result<Vec<TargetStatus>> {
        self.request(StoreCommand::Latest).await
    }

    /// Shutdown the store thread
    pub async fn shutdown(&self) -> Result<()> {
        self.tx.send(StoreCommand::Shutdown).await?;
        Ok(())
    }
}
