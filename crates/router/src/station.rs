//! Station-side command consumption.
//!
//! A station reads only `commands:{station}`, through a consumer group named
//! after itself. After a restart it first works through the entries it was
//! handed before but never acknowledged, then switches to new entries.
//! Delivery is at least once; [`Delivery::is_duplicate`] flags envelope ids
//! this consumer has already handed out recently.

use crate::anomaly::{AnomalyCounters, AnomalyKind, AnomalySnapshot, ProtocolAnomaly};
use crate::error::{Result, RouterError};
use arturo_bus::{Broker, EntryId, ReadCursor, StreamEntry};
use arturo_protocol::address::{command_stream, MESSAGE_FIELD};
use arturo_protocol::{
    build, BuildOptions, Codec, CommandRequestPayload, CommandResponsePayload, Message,
    MessageType, Source,
};
use futures::stream::{self, Stream, StreamExt};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Envelope ids remembered for duplicate detection.
pub const DUPLICATE_WINDOW: usize = 1024;

#[derive(Debug, Clone)]
pub struct ConsumerOptions {
    /// Entries fetched per read.
    pub batch_size: usize,
    /// How long [`StationConsumer::next`] waits for new entries.
    pub block: Duration,
}

impl Default for ConsumerOptions {
    fn default() -> Self {
        Self {
            batch_size: 16,
            block: Duration::from_secs(1),
        }
    }
}

/// One command handed to the station.
#[derive(Debug, Clone)]
pub struct Delivery {
    entry_id: EntryId,
    message: Message,
    duplicate: bool,
    recovered: bool,
}

impl Delivery {
    pub fn entry_id(&self) -> &str {
        &self.entry_id
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn into_message(self) -> Message {
        self.message
    }

    /// The device command, if this is a `device.command.request`.
    pub fn command(&self) -> Option<&CommandRequestPayload> {
        self.message.as_command_request()
    }

    /// The envelope id was already handed out by this consumer.
    pub fn is_duplicate(&self) -> bool {
        self.duplicate
    }

    /// Read back from the unacknowledged backlog after a restart.
    pub fn is_recovered(&self) -> bool {
        self.recovered
    }
}

#[derive(Debug, Default)]
struct RecentIds {
    order: VecDeque<Uuid>,
    seen: HashSet<Uuid>,
}

impl RecentIds {
    /// Returns `false` if the id was already in the window.
    fn insert(&mut self, id: Uuid) -> bool {
        if !self.seen.insert(id) {
            return false;
        }
        self.order.push_back(id);
        if self.order.len() > DUPLICATE_WINDOW {
            if let Some(old) = self.order.pop_front() {
                self.seen.remove(&old);
            }
        }
        true
    }
}

/// Acknowledges and answers deliveries. Cheap to clone, so handlers can hold
/// one while the consumer keeps reading.
#[derive(Debug, Clone)]
pub struct StationResponder<B> {
    broker: B,
    codec: Codec,
    source: Source,
    stream: String,
    group: String,
}

impl<B: Broker> StationResponder<B> {
    /// Acknowledge a delivery. Returns `false` if it was already acknowledged.
    pub async fn ack(&self, delivery: &Delivery) -> Result<bool> {
        self.ack_ids(&[delivery.entry_id.clone()]).await
    }

    async fn ack_ids(&self, ids: &[EntryId]) -> Result<bool> {
        let acked = self.broker.ack(&self.stream, &self.group, ids).await?;
        Ok(acked > 0)
    }

    /// Answer `request` on its `reply_to` stream.
    ///
    /// The response copies the request's correlation id and is validated
    /// before it is appended.
    pub async fn respond(
        &self,
        request: &Message,
        payload: CommandResponsePayload,
    ) -> Result<EntryId> {
        let reply_to = request
            .reply_to()
            .ok_or_else(|| RouterError::NoReplyAddress(request.id()))?;
        let response = build(&self.source, payload, BuildOptions::answering(request))
            .map_err(RouterError::InvalidPayload)?;
        let wire = self
            .codec
            .encode(&response)
            .map_err(RouterError::InvalidPayload)?;
        let entry_id = self
            .broker
            .append(reply_to, &[(MESSAGE_FIELD, wire.as_str())])
            .await?;
        debug!(
            reply_to,
            correlation_id = ?response.correlation_id(),
            %entry_id,
            "response sent"
        );
        Ok(entry_id)
    }
}

/// Reads the station's own command stream.
#[derive(Debug)]
pub struct StationConsumer<B> {
    responder: StationResponder<B>,
    consumer: String,
    options: ConsumerOptions,
    recovering: bool,
    /// Last backlog entry handed out during recovery.
    recovery_cursor: Option<EntryId>,
    recovered: usize,
    buffer: VecDeque<Delivery>,
    recent: RecentIds,
    anomalies: Arc<AnomalyCounters>,
}

impl<B: Broker + Clone + 'static> StationConsumer<B> {
    /// Consumer for the station named by `source.instance`.
    pub async fn new(broker: B, codec: Codec, source: Source, options: ConsumerOptions) -> Result<Self> {
        let station = source.instance.clone();
        let stream = command_stream(&station);
        broker.ensure_group(&stream, &station).await?;
        info!(station = %station, stream = %stream, "station consumer ready");
        Ok(Self {
            responder: StationResponder {
                broker,
                codec,
                source,
                stream,
                group: station.clone(),
            },
            consumer: station,
            options,
            recovering: true,
            recovery_cursor: None,
            recovered: 0,
            buffer: VecDeque::new(),
            recent: RecentIds::default(),
            anomalies: Arc::new(AnomalyCounters::new()),
        })
    }

    pub fn station(&self) -> &str {
        &self.consumer
    }

    pub fn stream(&self) -> &str {
        &self.responder.stream
    }

    pub fn responder(&self) -> StationResponder<B> {
        self.responder.clone()
    }

    pub fn anomalies(&self) -> AnomalySnapshot {
        self.anomalies.snapshot()
    }

    /// Next command, or `None` once the configured wait elapses with nothing
    /// to deliver.
    pub async fn next(&mut self) -> Result<Option<Delivery>> {
        loop {
            if let Some(delivery) = self.buffer.pop_front() {
                return Ok(Some(delivery));
            }

            if self.recovering {
                let cursor = ReadCursor::Pending {
                    after: self.recovery_cursor.clone(),
                };
                let entries = self.read(cursor, None).await?;
                match entries.last() {
                    Some(last) => {
                        self.recovery_cursor = Some(last.id.clone());
                        self.recovered += entries.len();
                        self.accept(entries, true).await?;
                    }
                    None => {
                        debug!(
                            station = %self.consumer,
                            recovered = self.recovered,
                            "backlog drained"
                        );
                        self.recovering = false;
                        self.recovery_cursor = None;
                    }
                }
                continue;
            }

            let entries = self
                .read(ReadCursor::New, Some(self.options.block))
                .await?;
            if entries.is_empty() {
                return Ok(None);
            }
            self.accept(entries, false).await?;
            if self.buffer.is_empty() {
                return Ok(None);
            }
        }
    }

    /// Endless stream of deliveries. Empty waits are skipped; errors are
    /// yielded and reading continues.
    pub fn into_stream(self) -> impl Stream<Item = Result<Delivery>> + Send {
        stream::unfold(self, |mut consumer| async move {
            loop {
                match consumer.next().await {
                    Ok(Some(delivery)) => return Some((Ok(delivery), consumer)),
                    Ok(None) => continue,
                    Err(err) => return Some((Err(err), consumer)),
                }
            }
        })
    }

    /// Move reading onto its own task, feeding a channel of `capacity`.
    ///
    /// Receiving from the channel can be abandoned at any point without
    /// losing a delivery, so it can sit in a `select!` next to other events.
    /// The task ends once the receiver is dropped; a read cut short then
    /// stays pending and is recovered by the next consumer.
    pub fn spawn_reader(self, capacity: usize) -> (mpsc::Receiver<Result<Delivery>>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let station = self.consumer.clone();
        let task = tokio::spawn(async move {
            let deliveries = self.into_stream();
            futures::pin_mut!(deliveries);
            loop {
                let item = tokio::select! {
                    _ = tx.closed() => break,
                    item = deliveries.next() => item,
                };
                match item {
                    Some(item) => {
                        if tx.send(item).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            debug!(station = %station, "command reader stopped");
        });
        (rx, task)
    }

    pub async fn ack(&self, delivery: &Delivery) -> Result<bool> {
        self.responder.ack(delivery).await
    }

    pub async fn respond(
        &self,
        request: &Message,
        payload: CommandResponsePayload,
    ) -> Result<EntryId> {
        self.responder.respond(request, payload).await
    }

    async fn read(&self, cursor: ReadCursor, block: Option<Duration>) -> Result<Vec<StreamEntry>> {
        let entries = self
            .responder
            .broker
            .read_group(
                &self.responder.stream,
                &self.responder.group,
                &self.consumer,
                cursor,
                self.options.batch_size,
                block,
            )
            .await?;
        Ok(entries)
    }

    /// Decode entries into the buffer. Anything that is not a valid command
    /// request is acknowledged and dropped.
    async fn accept(&mut self, entries: Vec<StreamEntry>, recovered: bool) -> Result<()> {
        let mut discard = Vec::new();
        for entry in entries {
            match self.decode(&entry) {
                Ok(message) => {
                    let duplicate = !self.recent.insert(message.id());
                    if duplicate {
                        debug!(station = %self.consumer, id = %message.id(), "duplicate delivery");
                    }
                    self.buffer.push_back(Delivery {
                        entry_id: entry.id,
                        message,
                        duplicate,
                        recovered,
                    });
                }
                Err((kind, detail)) => {
                    self.anomalies.record(&ProtocolAnomaly {
                        kind,
                        stream: self.responder.stream.clone(),
                        entry_id: entry.id.clone(),
                        correlation_id: None,
                        detail,
                    });
                    discard.push(entry.id);
                }
            }
        }
        if !discard.is_empty() {
            warn!(station = %self.consumer, count = discard.len(), "discarding invalid command entries");
            self.responder.ack_ids(&discard).await?;
        }
        Ok(())
    }

    fn decode(&self, entry: &StreamEntry) -> std::result::Result<Message, (AnomalyKind, String)> {
        let raw = entry
            .field(MESSAGE_FIELD)
            .ok_or_else(|| (AnomalyKind::Malformed, format!("missing {} field", MESSAGE_FIELD)))?;
        let message = self
            .responder
            .codec
            .decode(raw.as_bytes())
            .map_err(|err| (AnomalyKind::Malformed, err.to_string()))?;
        match message.message_type() {
            MessageType::DeviceCommandRequest | MessageType::SystemOtaRequest => Ok(message),
            other => Err((
                AnomalyKind::UnexpectedType,
                format!("{} on a command stream", other),
            )),
        }
    }
}
