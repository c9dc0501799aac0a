//! Protocol anomalies.
//!
//! Traffic that is well-formed enough to reach a consumer but cannot be acted
//! on: responses nobody waits for, duplicates, entries that fail to decode.
//! Anomalies are logged and counted. They never fail the consumer.

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    /// Response for a correlation id this router never issued or has forgotten.
    Unmatched,
    /// Response that arrived after its command timed out or was cancelled.
    Late,
    /// Second response for an already completed command.
    Duplicate,
    /// Entry that failed parsing or schema validation.
    Malformed,
    /// Valid message of a type that does not belong on the stream.
    UnexpectedType,
}

impl fmt::Display for AnomalyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AnomalyKind::Unmatched => "unmatched",
            AnomalyKind::Late => "late",
            AnomalyKind::Duplicate => "duplicate",
            AnomalyKind::Malformed => "malformed",
            AnomalyKind::UnexpectedType => "unexpected_type",
        };
        f.write_str(name)
    }
}

/// One observed anomaly.
#[derive(Debug, Clone)]
pub struct ProtocolAnomaly {
    pub kind: AnomalyKind,
    pub stream: String,
    pub entry_id: String,
    pub correlation_id: Option<Uuid>,
    pub detail: String,
}

/// Running totals per [`AnomalyKind`].
#[derive(Debug, Default)]
pub struct AnomalyCounters {
    unmatched: AtomicU64,
    late: AtomicU64,
    duplicate: AtomicU64,
    malformed: AtomicU64,
    unexpected_type: AtomicU64,
}

/// Point-in-time copy of [`AnomalyCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AnomalySnapshot {
    pub unmatched: u64,
    pub late: u64,
    pub duplicate: u64,
    pub malformed: u64,
    pub unexpected_type: u64,
}

impl AnomalySnapshot {
    pub fn total(&self) -> u64 {
        self.unmatched + self.late + self.duplicate + self.malformed + self.unexpected_type
    }
}

impl AnomalyCounters {
    pub fn new() -> Self {
        Self::default()
    }

    fn counter(&self, kind: AnomalyKind) -> &AtomicU64 {
        match kind {
            AnomalyKind::Unmatched => &self.unmatched,
            AnomalyKind::Late => &self.late,
            AnomalyKind::Duplicate => &self.duplicate,
            AnomalyKind::Malformed => &self.malformed,
            AnomalyKind::UnexpectedType => &self.unexpected_type,
        }
    }

    /// Log and count.
    pub fn record(&self, anomaly: &ProtocolAnomaly) {
        self.counter(anomaly.kind).fetch_add(1, Ordering::Relaxed);
        warn!(
            kind = %anomaly.kind,
            stream = %anomaly.stream,
            entry_id = %anomaly.entry_id,
            correlation_id = ?anomaly.correlation_id,
            detail = %anomaly.detail,
            "protocol anomaly"
        );
    }

    pub fn get(&self, kind: AnomalyKind) -> u64 {
        self.counter(kind).load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> AnomalySnapshot {
        AnomalySnapshot {
            unmatched: self.get(AnomalyKind::Unmatched),
            late: self.get(AnomalyKind::Late),
            duplicate: self.get(AnomalyKind::Duplicate),
            malformed: self.get(AnomalyKind::Malformed),
            unexpected_type: self.get(AnomalyKind::UnexpectedType),
        }
    }
}
