//! Station state as seen by a monitor.
//!
//! Combines the last heartbeat per station with the presence key:
//! ONLINE when the key exists and a heartbeat arrived recently, STALE when
//! the key exists but heartbeats stopped, OFFLINE when the key is gone.

use crate::error::Result;
use crate::presence::PresenceTracker;
use arturo_bus::Broker;
use arturo_protocol::{HeartbeatPayload, Message};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StationState {
    Online,
    Stale,
    Offline,
}

impl fmt::Display for StationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StationState::Online => "ONLINE",
            StationState::Stale => "STALE",
            StationState::Offline => "OFFLINE",
        };
        f.write_str(name)
    }
}

/// A station changed state between two refreshes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub station: String,
    pub from: Option<StationState>,
    pub to: StationState,
}

#[derive(Debug, Clone)]
struct StationRecord {
    last_heartbeat: Option<(Instant, HeartbeatPayload)>,
    state: Option<StationState>,
}

#[derive(Debug)]
pub struct StationTracker {
    stale_after: Duration,
    stations: BTreeMap<String, StationRecord>,
}

impl Default for StationTracker {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}

impl StationTracker {
    pub fn new(stale_after: Duration) -> Self {
        Self {
            stale_after,
            stations: BTreeMap::new(),
        }
    }

    /// Start tracking a station before any heartbeat from it arrives.
    pub fn watch_station(&mut self, station: &str) {
        self.stations
            .entry(station.to_string())
            .or_insert(StationRecord {
                last_heartbeat: None,
                state: None,
            });
    }

    /// Record a heartbeat. Returns the station it came from, or `None` for
    /// other message types.
    pub fn record_heartbeat(&mut self, message: &Message) -> Option<String> {
        let payload = message.as_heartbeat()?.clone();
        let station = message.source().instance.clone();
        let record = self
            .stations
            .entry(station.clone())
            .or_insert(StationRecord {
                last_heartbeat: None,
                state: None,
            });
        record.last_heartbeat = Some((Instant::now(), payload));
        Some(station)
    }

    pub fn last_heartbeat(&self, station: &str) -> Option<&HeartbeatPayload> {
        self.stations
            .get(station)?
            .last_heartbeat
            .as_ref()
            .map(|(_, payload)| payload)
    }

    /// Classify a station from its presence and heartbeat age.
    pub fn classify(&self, station: &str, alive: bool, now: Instant) -> StationState {
        if !alive {
            return StationState::Offline;
        }
        let recent = self
            .stations
            .get(station)
            .and_then(|record| record.last_heartbeat.as_ref())
            .map(|(at, _)| now.saturating_duration_since(*at) <= self.stale_after)
            .unwrap_or(false);
        if recent {
            StationState::Online
        } else {
            StationState::Stale
        }
    }

    pub fn state(&self, station: &str) -> Option<StationState> {
        self.stations.get(station)?.state
    }

    /// Re-check presence for every known station and return the ones whose
    /// state changed.
    pub async fn refresh<B: Broker>(&mut self, presence: &PresenceTracker<B>) -> Result<Vec<Transition>> {
        let names: Vec<String> = self.stations.keys().cloned().collect();
        let mut alive = Vec::with_capacity(names.len());
        for station in &names {
            alive.push(presence.is_alive(station).await?);
        }

        let now = Instant::now();
        let mut transitions = Vec::new();
        for (station, alive) in names.into_iter().zip(alive) {
            let to = self.classify(&station, alive, now);
            if let Some(record) = self.stations.get_mut(&station) {
                let from = record.state.replace(to);
                if from != Some(to) {
                    info!(station = %station, from = ?from, to = %to, "station state changed");
                    transitions.push(Transition { station, from, to });
                }
            }
        }
        Ok(transitions)
    }
}
