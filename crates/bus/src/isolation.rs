//! Per-identity isolation policy.
//!
//! Every identity on the bus gets a static rule: a list of grants, each
//! binding an address pattern to the operations allowed on it. Anything not
//! granted is denied, including every operation by an unknown identity.
//!
//! Station rules are checked on insert so that no station can ever be given
//! access to another station's command stream or to administrative
//! operations.

use crate::error::{BusError, Result};
use arturo_protocol::address::{
    command_stream, presence_key, reply_stream, station_of_command_stream,
    COMMAND_STREAM_PREFIX, EMERGENCY_STOP_CHANNEL, EVENT_CHANNEL_PREFIX, HEARTBEAT_CHANNEL,
    REPLY_STREAM_PREFIX,
};
use std::collections::HashMap;
use std::fmt;
use tracing::debug;

/// Class of substrate operation being authorized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Append, set, delete, publish.
    Publish,
    /// Read, subscribe, create a consumer group, inspect.
    Consume,
    /// Acknowledge stream entries.
    Ack,
    /// Configuration and user management. Never granted to stations.
    Admin,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Publish => "publish",
            Operation::Consume => "consume",
            Operation::Ack => "ack",
            Operation::Admin => "admin",
        };
        f.write_str(name)
    }
}

/// Which addresses a grant covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressPattern {
    Exact(String),
    /// Every address starting with the prefix, written `prefix*`.
    Prefix(String),
}

impl AddressPattern {
    /// Parse `foo` as exact and `foo*` as a prefix.
    pub fn parse(pattern: &str) -> Self {
        match pattern.strip_suffix('*') {
            Some(prefix) => AddressPattern::Prefix(prefix.to_string()),
            None => AddressPattern::Exact(pattern.to_string()),
        }
    }

    pub fn matches(&self, address: &str) -> bool {
        match self {
            AddressPattern::Exact(exact) => exact == address,
            AddressPattern::Prefix(prefix) => address.starts_with(prefix.as_str()),
        }
    }

    /// Whether the pattern can match a command stream other than `own`.
    fn reaches_foreign_command_stream(&self, own: &str) -> bool {
        match self {
            AddressPattern::Exact(address) => {
                station_of_command_stream(address).map(|s| s != own).unwrap_or(false)
            }
            // A prefix either covers the whole command namespace or a slice
            // of it; in both cases some other station name can match.
            AddressPattern::Prefix(prefix) => {
                COMMAND_STREAM_PREFIX.starts_with(prefix.as_str())
                    || prefix.starts_with(COMMAND_STREAM_PREFIX)
            }
        }
    }
}

impl fmt::Display for AddressPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressPattern::Exact(exact) => f.write_str(exact),
            AddressPattern::Prefix(prefix) => write!(f, "{}*", prefix),
        }
    }
}

/// Operations allowed on one address pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grant {
    pub pattern: AddressPattern,
    pub operations: Vec<Operation>,
}

impl Grant {
    pub fn new(pattern: &str, operations: &[Operation]) -> Self {
        Self {
            pattern: AddressPattern::parse(pattern),
            operations: operations.to_vec(),
        }
    }

    fn allows(&self, operation: Operation, address: &str) -> bool {
        self.operations.contains(&operation) && self.pattern.matches(address)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Role {
    Station(String),
    Controller,
}

/// The static rule for one identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IsolationRule {
    identity: String,
    role: Role,
    grants: Vec<Grant>,
}

impl IsolationRule {
    /// Rule for station `instance`; its identity is the instance name.
    ///
    /// Grants publish+consume+ack on `commands:{instance}`, publish on
    /// `responses:*` and `events:heartbeat`, publish+consume on
    /// `events:emergency_stop`, and publish on its own presence key.
    pub fn station(instance: &str, presence_namespace: &str) -> Self {
        use Operation::*;
        Self {
            identity: instance.to_string(),
            role: Role::Station(instance.to_string()),
            grants: vec![
                Grant::new(&command_stream(instance), &[Publish, Consume, Ack]),
                Grant::new(&format!("{}*", REPLY_STREAM_PREFIX), &[Publish]),
                Grant::new(HEARTBEAT_CHANNEL, &[Publish]),
                Grant::new(EMERGENCY_STOP_CHANNEL, &[Publish, Consume]),
                Grant::new(&presence_key(presence_namespace, instance), &[Publish]),
            ],
        }
    }

    /// Rule for controller `service`/`instance`; its identity is
    /// `{service}:{instance}`.
    ///
    /// Grants publish on `commands:*`, consume+ack on its own reply stream,
    /// publish+consume on `events:*`, and consume on presence keys.
    pub fn controller(service: &str, instance: &str, presence_namespace: &str) -> Self {
        use Operation::*;
        Self {
            identity: controller_identity(service, instance),
            role: Role::Controller,
            grants: vec![
                Grant::new(&format!("{}*", COMMAND_STREAM_PREFIX), &[Publish]),
                Grant::new(&reply_stream(service, instance), &[Consume, Ack]),
                Grant::new(&format!("{}*", EVENT_CHANNEL_PREFIX), &[Publish, Consume]),
                Grant::new(&format!("{}:*", presence_namespace), &[Consume]),
            ],
        }
    }

    /// Add a grant. Station rules are re-checked when inserted into a policy.
    pub fn with_grant(mut self, grant: Grant) -> Self {
        self.grants.push(grant);
        self
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn grants(&self) -> &[Grant] {
        &self.grants
    }

    fn check_station_bounds(&self) -> Result<()> {
        let own = match &self.role {
            Role::Station(own) => own,
            Role::Controller => return Ok(()),
        };
        for grant in &self.grants {
            if grant.operations.contains(&Operation::Admin) {
                return Err(BusError::RuleRejected {
                    identity: self.identity.clone(),
                    reason: format!("admin operations granted on {}", grant.pattern),
                });
            }
            if grant.pattern.reaches_foreign_command_stream(own) {
                return Err(BusError::RuleRejected {
                    identity: self.identity.clone(),
                    reason: format!("{} reaches another station's command stream", grant.pattern),
                });
            }
        }
        Ok(())
    }
}

/// Identity string used for controller rules.
pub fn controller_identity(service: &str, instance: &str) -> String {
    format!("{}:{}", service, instance)
}

/// Outcome of an authorization check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
}

/// Rule set keyed by identity. Deny by default.
#[derive(Debug, Clone, Default)]
pub struct IsolationPolicy {
    rules: HashMap<String, IsolationRule>,
}

impl IsolationPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the rule for an identity.
    pub fn insert(&mut self, rule: IsolationRule) -> Result<()> {
        rule.check_station_bounds()?;
        debug!(identity = %rule.identity, grants = rule.grants.len(), "isolation rule installed");
        self.rules.insert(rule.identity.clone(), rule);
        Ok(())
    }

    /// Builder form of [`IsolationPolicy::insert`].
    pub fn with_rule(mut self, rule: IsolationRule) -> Result<Self> {
        self.insert(rule)?;
        Ok(self)
    }

    pub fn rule(&self, identity: &str) -> Option<&IsolationRule> {
        self.rules.get(identity)
    }

    pub fn authorize(&self, identity: &str, operation: Operation, address: &str) -> Decision {
        let allowed = self
            .rules
            .get(identity)
            .map(|rule| rule.grants.iter().any(|g| g.allows(operation, address)))
            .unwrap_or(false);
        if allowed {
            Decision::Allow
        } else {
            Decision::Deny
        }
    }

    /// [`IsolationPolicy::authorize`] as a `Result`.
    pub fn check(&self, identity: &str, operation: Operation, address: &str) -> Result<()> {
        match self.authorize(identity, operation, address) {
            Decision::Allow => Ok(()),
            Decision::Deny => Err(BusError::Unauthorized {
                identity: identity.to_string(),
                operation,
                address: address.to_string(),
            }),
        }
    }
}
