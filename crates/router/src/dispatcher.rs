//! Controller-side command dispatch.
//!
//! A [`CommandRouter`] appends command requests to `commands:{station}` and
//! correlates responses arriving on its own reply stream
//! `responses:{service}:{instance}` back to the [`CommandHandle`] that waits
//! for them.
//!
//! Responses are read through a consumer group named after the controller
//! service, so several instances of one service could share the reply load.
//! Retry is the caller's decision: [`CommandRouter::send_with_retry`] is a
//! loop over fresh sends, never a redelivery of the same correlation id.

use crate::anomaly::{AnomalyCounters, AnomalyKind, AnomalySnapshot, ProtocolAnomaly};
use crate::error::{Result, RouterError};
use crate::pending::{Completion, PendingInfo, PendingTable, Resolution};
use arturo_bus::{Broker, EntryId, ReadCursor, StreamEntry};
use arturo_core::IdentityPatterns;
use arturo_protocol::address::{command_stream, reply_stream, MESSAGE_FIELD};
use arturo_protocol::{
    build, BuildOptions, Codec, CommandRequestPayload, Message, MessageType, OtaRequestPayload,
    Payload, Source,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Bounds on `timeout_ms` accepted by the request schema.
const MIN_TIMEOUT_MS: u64 = 100;
const MAX_TIMEOUT_MS: u64 = 300_000;

/// Tuning for the reply side of a [`CommandRouter`].
#[derive(Debug, Clone)]
pub struct RouterOptions {
    /// How long one reply read may block.
    pub reply_block: Duration,
    /// Entries read per reply poll.
    pub batch_size: usize,
}

impl Default for RouterOptions {
    fn default() -> Self {
        Self {
            reply_block: Duration::from_millis(500),
            batch_size: 32,
        }
    }
}

/// Dispatches commands and correlates their responses.
#[derive(Debug, Clone)]
pub struct CommandRouter<B> {
    broker: B,
    codec: Codec,
    source: Source,
    reply_stream: String,
    group: String,
    table: PendingTable,
    anomalies: Arc<AnomalyCounters>,
    options: RouterOptions,
}

impl<B: Broker + Clone + 'static> CommandRouter<B> {
    /// Create the router and its reply consumer group.
    ///
    /// Replies left unacknowledged by a previous run belong to commands this
    /// process never issued; they are acknowledged and counted as unmatched.
    pub async fn new(broker: B, codec: Codec, source: Source, options: RouterOptions) -> Result<Self> {
        let reply_stream = reply_stream(&source.service, &source.instance);
        let group = source.service.clone();
        broker.ensure_group(&reply_stream, &group).await?;

        let router = Self {
            broker,
            codec,
            source,
            reply_stream,
            group,
            table: PendingTable::new(),
            anomalies: Arc::new(AnomalyCounters::new()),
            options,
        };
        router.drain_stale_replies().await?;
        info!(reply_stream = %router.reply_stream, "command router ready");
        Ok(router)
    }

    pub fn source(&self) -> &Source {
        &self.source
    }

    /// `responses:{service}:{instance}` for this router.
    pub fn reply_stream(&self) -> &str {
        &self.reply_stream
    }

    pub fn pending(&self) -> &PendingTable {
        &self.table
    }

    pub fn pending_count(&self) -> usize {
        self.table.len()
    }

    pub fn anomalies(&self) -> AnomalySnapshot {
        self.anomalies.snapshot()
    }

    /// Dispatch a device command to `station`.
    ///
    /// The request is validated before anything is registered or appended.
    /// If the payload carries no `timeout_ms`, the router's timeout is
    /// written into it, clamped to what the schema accepts.
    pub async fn send(
        &self,
        station: &str,
        payload: CommandRequestPayload,
        timeout: Duration,
    ) -> Result<CommandHandle> {
        let payload = with_device_timeout(payload, timeout);
        self.dispatch(station, payload.into(), timeout, 1).await
    }

    /// Dispatch a firmware update request to `station`.
    pub async fn send_ota(
        &self,
        station: &str,
        payload: OtaRequestPayload,
        timeout: Duration,
    ) -> Result<CommandHandle> {
        self.dispatch(station, payload.into(), timeout, 1).await
    }

    /// Send, and on timeout send again with a fresh correlation id, up to
    /// `attempts` times in total. Any error other than a timeout is returned
    /// immediately.
    pub async fn send_with_retry(
        &self,
        station: &str,
        payload: CommandRequestPayload,
        timeout: Duration,
        attempts: u32,
    ) -> Result<Message> {
        let attempts = attempts.max(1);
        let payload = with_device_timeout(payload, timeout);
        let mut attempt = 1;
        loop {
            let handle = self
                .dispatch(station, payload.clone().into(), timeout, attempt)
                .await?;
            match handle.wait().await {
                Err(err) if err.is_timeout() && attempt < attempts => {
                    warn!(station, attempt, attempts, "command timed out, retrying");
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    async fn dispatch(
        &self,
        station: &str,
        payload: Payload,
        timeout: Duration,
        attempt: u32,
    ) -> Result<CommandHandle> {
        if !IdentityPatterns::is_valid_instance(station) {
            return Err(RouterError::InvalidStation(station.to_string()));
        }

        let deadline = Instant::now()
            .checked_add(timeout)
            .ok_or(RouterError::InvalidTimeout(timeout))?;
        let (correlation_id, receiver) = loop {
            let candidate = Uuid::new_v4();
            if let Some(receiver) = self.table.register(candidate, station, deadline, attempt) {
                break (candidate, receiver);
            }
            warn!(correlation_id = %candidate, "correlation id collision, regenerating");
        };

        let wire = match self.encode_request(payload, correlation_id) {
            Ok(wire) => wire,
            Err(err) => {
                self.table.discard(correlation_id);
                return Err(err);
            }
        };

        let stream = command_stream(station);
        match self.broker.append(&stream, &[(MESSAGE_FIELD, wire.as_str())]).await {
            Ok(entry_id) => {
                debug!(station, %correlation_id, %entry_id, attempt, "command dispatched");
                Ok(CommandHandle {
                    correlation_id,
                    station: station.to_string(),
                    timeout,
                    deadline,
                    receiver,
                    table: self.table.clone(),
                })
            }
            Err(err) => {
                self.table.discard(correlation_id);
                warn!(station, %correlation_id, error = %err, "command append failed");
                Err(err.into())
            }
        }
    }

    fn encode_request(&self, payload: Payload, correlation_id: Uuid) -> Result<String> {
        let message = build(
            &self.source,
            payload,
            BuildOptions::new()
                .correlation_id(correlation_id)
                .reply_to(self.reply_stream.as_str()),
        )
        .map_err(RouterError::InvalidPayload)?;
        self.codec
            .encode(&message)
            .map_err(RouterError::InvalidPayload)
    }

    /// Read one batch of replies, complete matching commands and acknowledge
    /// every entry read. Returns how many commands were completed.
    pub async fn poll_replies(&self, block: Option<Duration>) -> Result<usize> {
        let entries = self
            .broker
            .read_group(
                &self.reply_stream,
                &self.group,
                &self.source.instance,
                ReadCursor::New,
                self.options.batch_size,
                block,
            )
            .await?;
        self.settle(entries).await
    }

    /// Time out every pending command past its deadline.
    pub fn sweep_expired(&self) -> Vec<PendingInfo> {
        let swept = self.table.expire(Instant::now());
        for entry in &swept {
            info!(
                station = %entry.station,
                correlation_id = %entry.correlation_id,
                "pending command expired"
            );
        }
        swept
    }

    /// Run [`CommandRouter::poll_replies`] and
    /// [`CommandRouter::sweep_expired`] in a loop until the task is aborted.
    pub fn spawn_reply_listener(&self) -> JoinHandle<()> {
        let router = self.clone();
        tokio::spawn(async move {
            loop {
                if let Err(err) = router.poll_replies(Some(router.options.reply_block)).await {
                    warn!(error = %err, stream = %router.reply_stream, "reply poll failed");
                    tokio::time::sleep(router.options.reply_block).await;
                }
                router.sweep_expired();
            }
        })
    }

    async fn drain_stale_replies(&self) -> Result<()> {
        let mut after: Option<EntryId> = None;
        loop {
            let entries = self
                .broker
                .read_group(
                    &self.reply_stream,
                    &self.group,
                    &self.source.instance,
                    ReadCursor::Pending {
                        after: after.clone(),
                    },
                    self.options.batch_size,
                    None,
                )
                .await?;
            match entries.last() {
                Some(last) => after = Some(last.id.clone()),
                None => return Ok(()),
            }
            self.settle(entries).await?;
        }
    }

    async fn settle(&self, entries: Vec<StreamEntry>) -> Result<usize> {
        if entries.is_empty() {
            return Ok(0);
        }
        let mut delivered = 0;
        let mut ids: Vec<EntryId> = Vec::with_capacity(entries.len());
        for entry in entries {
            if self.correlate(&entry) {
                delivered += 1;
            }
            ids.push(entry.id);
        }
        self.broker.ack(&self.reply_stream, &self.group, &ids).await?;
        Ok(delivered)
    }

    fn correlate(&self, entry: &StreamEntry) -> bool {
        let anomaly = |kind, correlation_id, detail: String| ProtocolAnomaly {
            kind,
            stream: self.reply_stream.clone(),
            entry_id: entry.id.clone(),
            correlation_id,
            detail,
        };

        let message = match entry.field(MESSAGE_FIELD) {
            Some(raw) => match self.codec.decode(raw.as_bytes()) {
                Ok(message) => message,
                Err(err) => {
                    self.anomalies
                        .record(&anomaly(AnomalyKind::Malformed, None, err.to_string()));
                    return false;
                }
            },
            None => {
                self.anomalies.record(&anomaly(
                    AnomalyKind::Malformed,
                    None,
                    format!("missing {} field", MESSAGE_FIELD),
                ));
                return false;
            }
        };

        let correlation_id = match (message.message_type(), message.correlation_id()) {
            (MessageType::DeviceCommandResponse, Some(id)) => id,
            (other, id) => {
                self.anomalies.record(&anomaly(
                    AnomalyKind::UnexpectedType,
                    id,
                    format!("{} on a reply stream", other),
                ));
                return false;
            }
        };

        match self.table.complete(correlation_id, message) {
            Resolution::Delivered => {
                debug!(%correlation_id, entry_id = %entry.id, "response correlated");
                true
            }
            Resolution::Duplicate => {
                self.anomalies.record(&anomaly(
                    AnomalyKind::Duplicate,
                    Some(correlation_id),
                    "command already completed".to_string(),
                ));
                false
            }
            Resolution::Late(state) => {
                self.anomalies.record(&anomaly(
                    AnomalyKind::Late,
                    Some(correlation_id),
                    format!("command already {:?}", state),
                ));
                false
            }
            Resolution::Unmatched => {
                self.anomalies.record(&anomaly(
                    AnomalyKind::Unmatched,
                    Some(correlation_id),
                    "no pending command".to_string(),
                ));
                false
            }
        }
    }
}

fn with_device_timeout(mut payload: CommandRequestPayload, timeout: Duration) -> CommandRequestPayload {
    if payload.timeout_ms.is_none() {
        let ms = u64::try_from(timeout.as_millis())
            .unwrap_or(u64::MAX)
            .clamp(MIN_TIMEOUT_MS, MAX_TIMEOUT_MS);
        payload.timeout_ms = Some(ms);
    }
    payload
}

/// Waits for the response to one dispatched command.
///
/// Dropping the handle releases the pending entry; the command already on
/// the station's stream is not retracted, and its response will be counted
/// as late.
#[derive(Debug)]
pub struct CommandHandle {
    correlation_id: Uuid,
    station: String,
    timeout: Duration,
    deadline: Instant,
    receiver: oneshot::Receiver<Completion>,
    table: PendingTable,
}

impl CommandHandle {
    pub fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    pub fn station(&self) -> &str {
        &self.station
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Resolve to the correlated response, or [`RouterError::CommandTimeout`]
    /// at the deadline. The pending entry is gone afterwards either way.
    pub async fn wait(mut self) -> Result<Message> {
        let outcome = tokio::time::timeout_at(self.deadline, &mut self.receiver).await;
        match outcome {
            Ok(Ok(Completion::Response(message))) => Ok(message),
            Ok(Ok(Completion::TimedOut)) => Err(self.timed_out()),
            Ok(Err(_)) => Err(RouterError::Cancelled(self.correlation_id)),
            Err(_) => {
                self.table.time_out(self.correlation_id);
                // A response may have landed between the deadline and removal.
                match self.receiver.try_recv() {
                    Ok(Completion::Response(message)) => Ok(message),
                    _ => Err(self.timed_out()),
                }
            }
        }
    }

    /// Stop waiting. Returns whether the command was still pending.
    pub fn cancel(self) -> bool {
        self.table.cancel(self.correlation_id)
    }

    fn timed_out(&self) -> RouterError {
        info!(station = %self.station, correlation_id = %self.correlation_id, "command timed out");
        RouterError::CommandTimeout {
            correlation_id: self.correlation_id,
            station: self.station.clone(),
            timeout: self.timeout,
        }
    }
}

impl Drop for CommandHandle {
    fn drop(&mut self) {
        self.table.cancel(self.correlation_id);
    }
}
