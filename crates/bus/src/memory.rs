//! In-process broker with consumer-group semantics.
//!
//! Behaves like the subset of Redis the protocol uses: append-only streams
//! with per-group delivery cursors and pending lists, keys with lazy TTL
//! expiry, and broadcast channels without backlog. Time is read from
//! `tokio::time`, so tests can pause and advance it.

use crate::broker::{Broker, EntryId, ReadCursor, StreamEntry, Subscription};
use crate::error::{BusError, Result};
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{broadcast, Notify};
use tokio::time::Instant;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{trace, warn};

const CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug)]
struct PendingEntry {
    consumer: String,
    deliveries: u32,
}

#[derive(Debug, Default)]
struct Group {
    /// Index of the next never-delivered entry.
    next: usize,
    /// Delivered, unacknowledged entries by index.
    pending: BTreeMap<usize, PendingEntry>,
}

#[derive(Debug, Default)]
struct Stream {
    entries: Vec<StreamEntry>,
    index: HashMap<EntryId, usize>,
    groups: HashMap<String, Group>,
    appended: Arc<Notify>,
    last_ms: u64,
    seq: u64,
}

impl Stream {
    fn next_id(&mut self, now_ms: u64) -> EntryId {
        if now_ms > self.last_ms {
            self.last_ms = now_ms;
            self.seq = 0;
        } else {
            self.seq += 1;
        }
        format!("{}-{}", self.last_ms, self.seq)
    }

    /// Index of the first entry whose id sorts after `after`.
    fn position_after(&self, after: &str) -> usize {
        if let Some(&index) = self.index.get(after) {
            return index + 1;
        }
        let bound = parse_id(after);
        self.entries
            .partition_point(|entry| parse_id(&entry.id) <= bound)
    }

    fn read(
        &mut self,
        stream: &str,
        group: &str,
        consumer: &str,
        cursor: &ReadCursor,
        count: usize,
    ) -> Result<Vec<StreamEntry>> {
        let start = match cursor {
            ReadCursor::Pending { after: Some(after) } => self.position_after(after),
            _ => 0,
        };
        let entries = &self.entries;
        let state = self.groups.get_mut(group).ok_or_else(|| BusError::NoGroup {
            stream: stream.to_string(),
            group: group.to_string(),
        })?;

        let mut out = Vec::new();
        match cursor {
            ReadCursor::Pending { .. } => {
                for (&index, pending) in state.pending.range_mut(start..) {
                    if out.len() >= count {
                        break;
                    }
                    if pending.consumer == consumer {
                        pending.deliveries += 1;
                        out.push(entries[index].clone());
                    }
                }
            }
            ReadCursor::New => {
                while state.next < entries.len() && out.len() < count {
                    let index = state.next;
                    state.next += 1;
                    state.pending.insert(
                        index,
                        PendingEntry {
                            consumer: consumer.to_string(),
                            deliveries: 1,
                        },
                    );
                    out.push(entries[index].clone());
                }
            }
        }
        Ok(out)
    }
}

/// Splits a "ms-seq" id; a bare "ms" counts as sequence 0.
fn parse_id(id: &str) -> (u64, u64) {
    let (ms, seq) = id.split_once('-').unwrap_or((id, "0"));
    (ms.parse().unwrap_or(0), seq.parse().unwrap_or(0))
}

#[derive(Debug)]
struct Key {
    value: String,
    expires_at: Option<Instant>,
}

impl Key {
    fn expired(&self, now: Instant) -> bool {
        self.expires_at.map(|at| now >= at).unwrap_or(false)
    }
}

#[derive(Debug, Default)]
struct State {
    streams: HashMap<String, Stream>,
    keys: HashMap<String, Key>,
    channels: HashMap<String, broadcast::Sender<String>>,
}

impl State {
    fn live_key(&mut self, key: &str) -> Option<&Key> {
        let now = Instant::now();
        if self.keys.get(key).map(|k| k.expired(now)).unwrap_or(false) {
            trace!(key, "key expired");
            self.keys.remove(key);
        }
        self.keys.get(key)
    }
}

/// In-memory [`Broker`].
///
/// Cheap to clone; clones share state, so one instance can stand in for the
/// whole bus in a test.
#[derive(Debug, Clone)]
pub struct MemoryBroker {
    state: Arc<Mutex<State>>,
    /// Base for entry ids.
    origin: Instant,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self {
            state: Arc::default(),
            origin: Instant::now(),
        }
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn now_ms(&self) -> u64 {
        Instant::now().duration_since(self.origin).as_millis() as u64
    }

    /// Number of entries ever appended to `stream`.
    pub fn stream_len(&self, stream: &str) -> usize {
        self.state()
            .streams
            .get(stream)
            .map(|s| s.entries.len())
            .unwrap_or(0)
    }

    /// How many times the entry has been handed out through `group`, or
    /// `None` once it is acknowledged.
    pub fn delivery_count(&self, stream: &str, group: &str, id: &str) -> Option<u32> {
        let state = self.state();
        let stream = state.streams.get(stream)?;
        let index = *stream.index.get(id)?;
        stream
            .groups
            .get(group)?
            .pending
            .get(&index)
            .map(|p| p.deliveries)
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn append(&self, stream: &str, fields: &[(&str, &str)]) -> Result<EntryId> {
        let now_ms = self.now_ms();
        let mut state = self.state();
        let target = state.streams.entry(stream.to_string()).or_default();
        let id = target.next_id(now_ms);
        let entry = StreamEntry {
            id: id.clone(),
            fields: fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        };
        target.index.insert(id.clone(), target.entries.len());
        target.entries.push(entry);
        target.appended.notify_waiters();
        trace!(stream, entry_id = %id, "appended");
        Ok(id)
    }

    async fn ensure_group(&self, stream: &str, group: &str) -> Result<()> {
        let mut state = self.state();
        state
            .streams
            .entry(stream.to_string())
            .or_default()
            .groups
            .entry(group.to_string())
            .or_default();
        Ok(())
    }

    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        cursor: ReadCursor,
        count: usize,
        block: Option<Duration>,
    ) -> Result<Vec<StreamEntry>> {
        let deadline = block.map(|b| Instant::now() + b);
        loop {
            let appended = {
                let mut state = self.state();
                let target = state.streams.get_mut(stream).ok_or_else(|| BusError::NoGroup {
                    stream: stream.to_string(),
                    group: group.to_string(),
                })?;
                let entries = target.read(stream, group, consumer, &cursor, count)?;
                if !entries.is_empty() || matches!(cursor, ReadCursor::Pending { .. }) {
                    return Ok(entries);
                }
                target.appended.clone()
            };

            let deadline = match deadline {
                Some(deadline) if Instant::now() < deadline => deadline,
                _ => return Ok(Vec::new()),
            };

            // Register interest, then re-check, so an append between the read
            // above and the wait below is not missed.
            let notified = appended.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut state = self.state();
                if let Some(target) = state.streams.get_mut(stream) {
                    let entries = target.read(stream, group, consumer, &cursor, count)?;
                    if !entries.is_empty() {
                        return Ok(entries);
                    }
                }
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    async fn ack(&self, stream: &str, group: &str, ids: &[EntryId]) -> Result<usize> {
        let mut state = self.state();
        let target = match state.streams.get_mut(stream) {
            Some(target) => target,
            None => return Ok(0),
        };
        let indices: Vec<usize> = ids.iter().filter_map(|id| target.index.get(id).copied()).collect();
        let group_state = match target.groups.get_mut(group) {
            Some(group_state) => group_state,
            None => return Ok(0),
        };
        Ok(indices
            .into_iter()
            .filter(|index| group_state.pending.remove(index).is_some())
            .count())
    }

    async fn pending_count(&self, stream: &str, group: &str) -> Result<usize> {
        let state = self.state();
        state
            .streams
            .get(stream)
            .and_then(|s| s.groups.get(group))
            .map(|g| g.pending.len())
            .ok_or_else(|| BusError::NoGroup {
                stream: stream.to_string(),
                group: group.to_string(),
            })
    }

    async fn set_with_expiry(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        self.state().keys.insert(
            key.to_string(),
            Key {
                value: value.to_string(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.state().live_key(key).map(|k| k.value.clone()))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.state().live_key(key).is_some())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut state = self.state();
        let existed = state.live_key(key).is_some();
        state.keys.remove(key);
        Ok(existed)
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<usize> {
        let state = self.state();
        let reached = match state.channels.get(channel) {
            Some(sender) => sender.send(payload.to_string()).unwrap_or(0),
            None => 0,
        };
        trace!(channel, reached, "published");
        Ok(reached)
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription> {
        let receiver = {
            let mut state = self.state();
            state
                .channels
                .entry(channel.to_string())
                .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
                .subscribe()
        };
        let channel = channel.to_string();
        let stream = BroadcastStream::new(receiver).filter_map(move |item| {
            let channel = channel.clone();
            async move {
                match item {
                    Ok(payload) => Some(payload),
                    Err(lagged) => {
                        warn!(channel = %channel, error = %lagged, "subscriber lagged");
                        None
                    }
                }
            }
        });
        Ok(stream.boxed())
    }
}
