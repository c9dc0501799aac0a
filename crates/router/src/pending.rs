//! Pending command table.
//!
//! One entry per dispatched command that still waits for its response. The
//! entry owns the sending half of a oneshot; the [`crate::CommandHandle`]
//! owns the receiving half. Whoever removes the entry decides the outcome:
//! the reply listener completes it, the sweeper or the waiting handle times
//! it out, dropping the handle cancels it.
//!
//! Resolved correlation ids are remembered in a bounded window so a response
//! that shows up afterwards can be classified as late or duplicate.

use arturo_protocol::Message;
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

/// Resolved correlation ids kept for anomaly classification.
pub const RESOLVED_WINDOW: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandState {
    Pending,
    Completed,
    TimedOut,
    Cancelled,
}

/// What the waiting handle receives.
#[derive(Debug)]
pub(crate) enum Completion {
    Response(Message),
    TimedOut,
}

/// Bookkeeping for one dispatched command.
#[derive(Debug)]
pub struct PendingCommand {
    correlation_id: Uuid,
    station: String,
    deadline: Instant,
    attempt: u32,
    state: CommandState,
    notify: Option<oneshot::Sender<Completion>>,
}

impl PendingCommand {
    pub fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    pub fn station(&self) -> &str {
        &self.station
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// 1 for the first attempt, incremented by each caller-side retry.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn state(&self) -> CommandState {
        self.state
    }

    fn finish(&mut self, state: CommandState, completion: Option<Completion>) {
        self.state = state;
        if let (Some(tx), Some(completion)) = (self.notify.take(), completion) {
            // The handle may already be gone.
            let _ = tx.send(completion);
        }
    }
}

/// Copy of a live entry, for inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingInfo {
    pub correlation_id: Uuid,
    pub station: String,
    pub deadline: Instant,
    pub attempt: u32,
    pub state: CommandState,
}

/// How a response was matched against the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Handed to the waiting handle.
    Delivered,
    /// The command had already timed out or been cancelled.
    Late(CommandState),
    /// The command had already been completed.
    Duplicate,
    /// Never seen, or resolved too long ago to remember.
    Unmatched,
}

#[derive(Debug, Default)]
struct Resolved {
    order: VecDeque<Uuid>,
    states: HashMap<Uuid, CommandState>,
}

impl Resolved {
    fn remember(&mut self, correlation_id: Uuid, state: CommandState) {
        if self.states.insert(correlation_id, state).is_none() {
            self.order.push_back(correlation_id);
        }
        while self.order.len() > RESOLVED_WINDOW {
            if let Some(old) = self.order.pop_front() {
                self.states.remove(&old);
            }
        }
    }
}

#[derive(Debug, Default)]
struct Table {
    live: HashMap<Uuid, PendingCommand>,
    resolved: Resolved,
}

impl Table {
    fn resolve(&mut self, correlation_id: Uuid, state: CommandState, completion: Option<Completion>) -> bool {
        match self.live.remove(&correlation_id) {
            Some(mut entry) => {
                entry.finish(state, completion);
                self.resolved.remember(correlation_id, state);
                true
            }
            None => false,
        }
    }
}

/// Shared table of commands awaiting a response.
#[derive(Debug, Clone, Default)]
pub struct PendingTable {
    inner: Arc<Mutex<Table>>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Table> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a new entry. Returns `None` if the id is already live.
    pub(crate) fn register(
        &self,
        correlation_id: Uuid,
        station: &str,
        deadline: Instant,
        attempt: u32,
    ) -> Option<oneshot::Receiver<Completion>> {
        let mut table = self.lock();
        if table.live.contains_key(&correlation_id) {
            return None;
        }
        let (tx, rx) = oneshot::channel();
        table.live.insert(
            correlation_id,
            PendingCommand {
                correlation_id,
                station: station.to_string(),
                deadline,
                attempt,
                state: CommandState::Pending,
                notify: Some(tx),
            },
        );
        Some(rx)
    }

    /// Drop an entry whose command never left the process.
    pub(crate) fn discard(&self, correlation_id: Uuid) {
        self.lock().live.remove(&correlation_id);
    }

    /// Match a response to its entry.
    pub fn complete(&self, correlation_id: Uuid, response: Message) -> Resolution {
        let mut table = self.lock();
        if table.resolve(
            correlation_id,
            CommandState::Completed,
            Some(Completion::Response(response)),
        ) {
            return Resolution::Delivered;
        }
        match table.resolved.states.get(&correlation_id) {
            Some(CommandState::Completed) => Resolution::Duplicate,
            Some(state) => Resolution::Late(*state),
            None => Resolution::Unmatched,
        }
    }

    /// Release an entry without a response. Returns whether it was live.
    pub fn cancel(&self, correlation_id: Uuid) -> bool {
        let cancelled = self.lock().resolve(correlation_id, CommandState::Cancelled, None);
        if cancelled {
            debug!(%correlation_id, "pending command cancelled");
        }
        cancelled
    }

    /// Time out a single entry. Returns whether it was live.
    pub(crate) fn time_out(&self, correlation_id: Uuid) -> bool {
        self.lock()
            .resolve(correlation_id, CommandState::TimedOut, None)
    }

    /// Time out every entry whose deadline has passed and notify its handle.
    pub fn expire(&self, now: Instant) -> Vec<PendingInfo> {
        let mut table = self.lock();
        let expired: Vec<Uuid> = table
            .live
            .values()
            .filter(|entry| entry.deadline <= now)
            .map(|entry| entry.correlation_id)
            .collect();

        let mut swept = Vec::with_capacity(expired.len());
        for correlation_id in expired {
            if let Some(mut entry) = table.live.remove(&correlation_id) {
                entry.finish(CommandState::TimedOut, Some(Completion::TimedOut));
                table.resolved.remember(correlation_id, CommandState::TimedOut);
                swept.push(info_of(&entry));
            }
        }
        swept
    }

    pub fn contains(&self, correlation_id: Uuid) -> bool {
        self.lock().live.contains_key(&correlation_id)
    }

    pub fn get(&self, correlation_id: Uuid) -> Option<PendingInfo> {
        self.lock().live.get(&correlation_id).map(info_of)
    }

    pub fn len(&self) -> usize {
        self.lock().live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live correlation ids, for diagnostics.
    pub fn correlation_ids(&self) -> HashSet<Uuid> {
        self.lock().live.keys().copied().collect()
    }
}

fn info_of(entry: &PendingCommand) -> PendingInfo {
    PendingInfo {
        correlation_id: entry.correlation_id,
        station: entry.station.clone(),
        deadline: entry.deadline,
        attempt: entry.attempt,
        state: entry.state,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arturo_protocol::{
        build, BuildOptions, CommandResponsePayload, Source,
    };
    use proptest::prelude::*;
    use std::time::Duration;

    fn response(correlation_id: Uuid) -> Message {
        build(
            &Source::new("esp32_tcp_bridge", "station-01", "1.0.0"),
            CommandResponsePayload::success("fluke-8846a", "identify", Some("FLUKE".to_string())),
            BuildOptions::new().correlation_id(correlation_id),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_complete_delivers_to_receiver() {
        let table = PendingTable::new();
        let id = Uuid::new_v4();
        let rx = table
            .register(id, "station-01", Instant::now() + Duration::from_secs(5), 1)
            .unwrap();

        assert_eq!(table.complete(id, response(id)), Resolution::Delivered);
        assert!(table.is_empty());
        match rx.await.unwrap() {
            Completion::Response(message) => assert_eq!(message.correlation_id(), Some(id)),
            Completion::TimedOut => panic!("expected a response"),
        }
    }

    #[tokio::test]
    async fn test_register_rejects_live_id() {
        let table = PendingTable::new();
        let id = Uuid::new_v4();
        let deadline = Instant::now() + Duration::from_secs(1);
        assert!(table.register(id, "station-01", deadline, 1).is_some());
        assert!(table.register(id, "station-02", deadline, 1).is_none());
        assert_eq!(table.get(id).unwrap().station, "station-01");
    }

    #[tokio::test]
    async fn test_late_and_duplicate_classification() {
        let table = PendingTable::new();
        let deadline = Instant::now() + Duration::from_secs(1);

        let completed = Uuid::new_v4();
        let _rx1 = table.register(completed, "station-01", deadline, 1).unwrap();
        assert_eq!(table.complete(completed, response(completed)), Resolution::Delivered);
        assert_eq!(table.complete(completed, response(completed)), Resolution::Duplicate);

        let cancelled = Uuid::new_v4();
        let _rx2 = table.register(cancelled, "station-01", deadline, 1).unwrap();
        assert!(table.cancel(cancelled));
        assert!(!table.cancel(cancelled));
        assert_eq!(
            table.complete(cancelled, response(cancelled)),
            Resolution::Late(CommandState::Cancelled)
        );

        let stranger = Uuid::new_v4();
        assert_eq!(table.complete(stranger, response(stranger)), Resolution::Unmatched);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expire_notifies_and_removes() {
        let table = PendingTable::new();
        let soon = Uuid::new_v4();
        let later = Uuid::new_v4();
        let now = Instant::now();
        let rx = table.register(soon, "station-01", now + Duration::from_millis(100), 1).unwrap();
        let _rx = table.register(later, "station-02", now + Duration::from_secs(10), 2).unwrap();

        tokio::time::advance(Duration::from_millis(150)).await;
        let swept = table.expire(Instant::now());
        assert_eq!(swept.len(), 1);
        assert_eq!(swept[0].correlation_id, soon);
        assert_eq!(swept[0].state, CommandState::TimedOut);
        assert!(matches!(rx.await.unwrap(), Completion::TimedOut));

        assert!(!table.contains(soon));
        assert_eq!(table.get(later).unwrap().attempt, 2);
        assert_eq!(
            table.complete(soon, response(soon)),
            Resolution::Late(CommandState::TimedOut)
        );
    }

    #[test]
    fn test_resolved_window_is_bounded() {
        let mut resolved = Resolved::default();
        let first = Uuid::new_v4();
        resolved.remember(first, CommandState::Completed);
        for _ in 0..RESOLVED_WINDOW {
            resolved.remember(Uuid::new_v4(), CommandState::Completed);
        }
        assert_eq!(resolved.order.len(), RESOLVED_WINDOW);
        assert!(!resolved.states.contains_key(&first));
    }

    proptest! {
        #[test]
        fn prop_table_tracks_live_entries(ops in prop::collection::vec((0usize..6, 0u8..3), 0..64)) {
            let ids: Vec<Uuid> = (0..6).map(|_| Uuid::new_v4()).collect();
            let table = PendingTable::new();
            let deadline = Instant::now() + Duration::from_secs(60);
            let mut live = HashSet::new();

            for (slot, op) in ops {
                let id = ids[slot];
                match op {
                    0 => {
                        let registered = table.register(id, "station-01", deadline, 1).is_some();
                        prop_assert_eq!(registered, live.insert(id));
                    }
                    1 => {
                        let delivered = table.complete(id, response(id)) == Resolution::Delivered;
                        prop_assert_eq!(delivered, live.remove(&id));
                    }
                    _ => {
                        prop_assert_eq!(table.cancel(id), live.remove(&id));
                    }
                }
                prop_assert_eq!(table.len(), live.len());
            }
            prop_assert_eq!(table.correlation_ids(), live);
        }
    }
}
