use std::collections::HashSet;
use std::marker::PhantomData;
use std::sync::Arc;

use futures::future::{join_all, select_all};
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{error, info, instrument};

use wasync_core::events::GroupParticipantsUpdate;
use wasync_core::payloads::MessageKey;
use wasync_core::{Operation, SessionId};
use wasync_store::{GroupRow, Record, RecordPatch, SessionStore, StoreError};
use wasync_telemetry::MetricsRecorder;

use crate::config::UpsertPolicy;
use crate::emitter::{Emitter, Envelope};
use crate::entities::{apply_participant_action, EntitySpec, Groups, Messages};
use crate::error::HandlerError;

/// Reconciles one entity kind of one session into storage.
///
/// Every public operation contains its own failures: they are logged and
/// surfaced as error notifications, never returned to the caller.
pub struct EntityHandler<S: EntitySpec> {
    store: SessionStore,
    emitter: Arc<Emitter>,
    metrics: Arc<MetricsRecorder>,
    policy: UpsertPolicy,
    _spec: PhantomData<fn() -> S>,
}

impl<S: EntitySpec> EntityHandler<S> {
    pub fn new(
        store: SessionStore,
        emitter: Arc<Emitter>,
        metrics: Arc<MetricsRecorder>,
        policy: UpsertPolicy,
    ) -> Self {
        Self {
            store,
            emitter,
            metrics,
            policy,
            _spec: PhantomData,
        }
    }

    pub fn session_id(&self) -> &SessionId {
        self.store.session_id()
    }

    fn prefix(&self) -> &'static str {
        S::KIND.prefix()
    }

    fn labels(&self) -> [(&'static str, &'static str); 1] {
        [("entity", self.prefix())]
    }

    /// Bulk historical load. Only natural ids not already stored are
    /// inserted; `is_latest` first clears the session's rows. All or nothing.
    #[instrument(skip_all, fields(session_id = %self.session_id(), entity = self.prefix(), count = payloads.len()))]
    pub async fn set(&self, payloads: &[S::Payload], is_latest: bool) {
        match self.try_set(payloads, is_latest).await {
            Ok(rows) => {
                info!(inserted = rows.len(), is_latest, "synced {}", self.prefix());
                self.metrics
                    .counter_inc("sync.rows_inserted", &self.labels(), rows.len() as u64);
                self.succeed(Operation::Set, &rows, Some(rows.len()));
            }
            Err(e) => self.fail(Operation::Set, e),
        }
    }

    async fn try_set(&self, payloads: &[S::Payload], is_latest: bool) -> Result<Vec<S::Row>, HandlerError> {
        let mut seen = HashSet::new();
        let mut rows = Vec::with_capacity(payloads.len());
        for payload in payloads {
            let row = S::to_row(payload)?;
            if seen.insert(row.id().to_string()) {
                rows.push(row);
            }
        }

        self.blocking(move |store| {
            store.transaction(|tx| {
                if is_latest {
                    tx.delete_all::<S::Row>()?;
                }
                let ids: Vec<String> = rows.iter().map(|r| r.id().to_string()).collect();
                let existing = tx.existing_ids::<S::Row>(&ids)?;
                let fresh: Vec<S::Row> = rows
                    .into_iter()
                    .filter(|r| !existing.contains(r.id()))
                    .collect();
                tx.insert_many(&fresh)?;
                Ok(fresh)
            })
        })
        .await
    }

    /// Insert-or-replace every payload, awaited according to the policy.
    #[instrument(skip_all, fields(session_id = %self.session_id(), entity = self.prefix(), count = payloads.len()))]
    pub async fn upsert(&self, payloads: &[S::Payload]) {
        match self.policy {
            UpsertPolicy::AwaitAll => self.upsert_all(payloads).await,
            UpsertPolicy::FirstSettled => self.upsert_first_settled(payloads).await,
        }
    }

    async fn upsert_all(&self, payloads: &[S::Payload]) {
        let mut writes = Vec::with_capacity(payloads.len());
        for payload in payloads {
            match S::to_row(payload) {
                Ok(row) => writes.push(self.write_row(row)),
                Err(e) => self.fail(Operation::Upsert, e.into()),
            }
        }

        for result in join_all(writes).await {
            match result {
                Ok(row) => {
                    self.metrics.counter_inc("sync.rows_upserted", &self.labels(), 1);
                    self.succeed(Operation::Upsert, std::slice::from_ref(&row), None);
                }
                Err(e) => self.fail(Operation::Upsert, e),
            }
        }
    }

    async fn upsert_first_settled(&self, payloads: &[S::Payload]) {
        let rows = match payloads.iter().map(S::to_row).collect::<Result<Vec<_>, _>>() {
            Ok(rows) => rows,
            Err(e) => return self.fail(Operation::Upsert, e.into()),
        };
        if rows.is_empty() {
            return self.succeed(Operation::Upsert, &rows, Some(0));
        }

        let writes = rows.iter().cloned().map(|row| {
            let store = self.store.clone();
            tokio::task::spawn_blocking(move || store.upsert(&row))
        });
        // Dropping the remaining handles leaves those writes running detached.
        let (first, _, _rest) = select_all(writes).await;
        match first.map_err(HandlerError::from).and_then(|r| r.map_err(HandlerError::from)) {
            Ok(()) => {
                self.metrics
                    .counter_inc("sync.rows_upserted", &self.labels(), rows.len() as u64);
                self.succeed(Operation::Upsert, &rows, Some(rows.len()));
            }
            Err(e) => self.fail(Operation::Upsert, e),
        }
    }

    async fn write_row(&self, row: S::Row) -> Result<S::Row, HandlerError> {
        self.blocking(move |store| store.upsert(&row).map(|()| row)).await
    }

    /// Apply partial updates strictly in order. Updates addressing rows that
    /// do not exist are skipped without an error notification.
    #[instrument(skip_all, fields(session_id = %self.session_id(), entity = self.prefix(), count = updates.len()))]
    pub async fn update(&self, updates: &[S::Update]) {
        for update in updates {
            if let Err(e) = self.apply_update(update).await {
                self.fail(Operation::Update, e);
            }
        }
    }

    async fn apply_update(&self, update: &S::Update) -> Result<(), HandlerError> {
        let id = S::update_id(update)?;
        let lookup = id.clone();
        let Some(existing) = self
            .blocking(move |store| store.find::<S::Row>(&lookup))
            .await?
        else {
            self.skip(&id, "not found");
            return Ok(());
        };

        let patch = S::to_patch(update, &existing)?;
        self.write_patch(id, patch).await
    }

    async fn write_patch(&self, id: String, patch: RecordPatch) -> Result<(), HandlerError> {
        let target = id.clone();
        match self
            .blocking(move |store| store.update::<S::Row>(&target, &patch))
            .await
        {
            Ok(row) => {
                self.metrics.counter_inc("sync.rows_updated", &self.labels(), 1);
                self.succeed(Operation::Update, std::slice::from_ref(&row), None);
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                self.skip(&id, "vanished before update");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Bulk delete by natural id. Absent ids are not an error.
    #[instrument(skip_all, fields(session_id = %self.session_id(), entity = self.prefix(), count = ids.len()))]
    pub async fn delete(&self, ids: &[String]) {
        let owned = ids.to_vec();
        match self
            .blocking(move |store| store.delete_many::<S::Row>(&owned))
            .await
        {
            Ok(deleted) => {
                self.metrics
                    .counter_inc("sync.rows_deleted", &self.labels(), deleted as u64);
                self.succeed(Operation::Delete, ids, Some(deleted));
            }
            Err(e) => self.fail(Operation::Delete, e),
        }
    }

    fn skip(&self, id: &str, reason: &str) {
        info!(id, reason, "{} update skipped", self.prefix());
        self.metrics.counter_inc("sync.updates_skipped", &self.labels(), 1);
    }

    fn succeed<T: Serialize>(&self, op: Operation, items: &[T], count: Option<usize>) {
        let data = match success_data(self.prefix(), items, count) {
            Ok(data) => data,
            Err(e) => return self.fail(op, e.into()),
        };
        self.emitter.emit(Envelope::success(S::KIND, op, self.session_id(), data));
    }

    fn fail(&self, op: Operation, e: HandlerError) {
        error!(operation = %op, error = %e, "{} {} failed", self.prefix(), op);
        self.metrics.counter_inc(
            "sync.handler_errors",
            &[("entity", self.prefix()), ("operation", op.as_str())],
            1,
        );
        self.emitter.emit(Envelope::failure(S::KIND, op, self.session_id(), &e));
    }

    /// Run a synchronous store call on the blocking pool.
    async fn blocking<T, F>(&self, f: F) -> Result<T, HandlerError>
    where
        T: Send + 'static,
        F: FnOnce(SessionStore) -> Result<T, StoreError> + Send + 'static,
    {
        let store = self.store.clone();
        Ok(tokio::task::spawn_blocking(move || f(store)).await??)
    }
}

fn success_data<T: Serialize>(
    prefix: &str,
    items: &[T],
    count: Option<usize>,
) -> Result<Value, serde_json::Error> {
    let mut data = Map::new();
    data.insert(prefix.to_string(), serde_json::to_value(items)?);
    if let Some(count) = count {
        data.insert("count".into(), count.into());
    }
    Ok(Value::Object(data))
}

impl EntityHandler<Messages> {
    /// Delete messages addressed by key.
    pub async fn delete_keys(&self, keys: &[MessageKey]) {
        match keys.iter().map(Messages::key_id).collect::<Result<Vec<_>, _>>() {
            Ok(ids) => self.delete(&ids).await,
            Err(e) => self.fail(Operation::Delete, e.into()),
        }
    }

    /// Delete every message of one chat.
    #[instrument(skip_all, fields(session_id = %self.session_id(), entity = "messages"))]
    pub async fn delete_chat(&self, remote_jid: &str) {
        let jid = remote_jid.to_string();
        match self
            .blocking(move |store| store.delete_chat_messages(&jid))
            .await
        {
            Ok(deleted) => {
                self.metrics
                    .counter_inc("sync.rows_deleted", &self.labels(), deleted as u64);
                let data = json!({
                    "messages": {"jid": remote_jid, "all": true},
                    "count": deleted,
                });
                self.emitter.emit(Envelope::success(
                    Messages::KIND,
                    Operation::Delete,
                    self.session_id(),
                    data,
                ));
            }
            Err(e) => self.fail(Operation::Delete, e),
        }
    }
}

impl EntityHandler<Groups> {
    /// Read-modify-write of a group's participant list.
    #[instrument(skip_all, fields(session_id = %self.session_id(), entity = "groups", group = %change.id))]
    pub async fn update_participants(&self, change: &GroupParticipantsUpdate) {
        if let Err(e) = self.try_update_participants(change).await {
            self.fail(Operation::Update, e);
        }
    }

    async fn try_update_participants(&self, change: &GroupParticipantsUpdate) -> Result<(), HandlerError> {
        let id = change.id.clone();
        let lookup = id.clone();
        let Some(group) = self
            .blocking(move |store| store.find::<GroupRow>(&lookup))
            .await?
        else {
            self.skip(&id, "group not found");
            return Ok(());
        };

        let current = group.participants.unwrap_or_default();
        let next = apply_participant_action(&current, &change.participants, change.action);
        let patch = RecordPatch::new().set("participants", serde_json::to_string(&next)?);
        self.write_patch(id, patch).await
    }
}
