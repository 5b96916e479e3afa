use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, info};

use super::SessionError;
use super::token::{SessionToken, TokenDigester};
use crate::clock::{Clock, expiry_after};
use crate::domain::{LeaseHolder, MachineId};
use crate::lease::to_chrono;

/// Default session lifetime.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(60 * 60);

/// A live session, keyed by the digest of its token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    /// Digest of the bearer token; also the identity used for leases.
    pub holder: LeaseHolder,
    pub machine_id: MachineId,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl SessionRecord {
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }

    pub fn is_bound_to(&self, machine_id: &MachineId) -> bool {
        &self.machine_id == machine_id
    }
}

/// In-process session cache with lazy TTL eviction.
///
/// Sessions live only as long as the process. Lookup of an expired record
/// removes it under the shard write lock, so once any caller has seen a
/// token as expired no later lookup can accept it.
pub struct SessionDirectory {
    sessions: DashMap<LeaseHolder, SessionRecord>,
    digester: TokenDigester,
    clock: Arc<dyn Clock>,
    ttl: chrono::Duration,
}

impl fmt::Debug for SessionDirectory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionDirectory")
            .field("sessions", &self.sessions.len())
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl SessionDirectory {
    pub fn new(digester: TokenDigester, clock: Arc<dyn Clock>) -> Self {
        Self {
            sessions: DashMap::new(),
            digester,
            clock,
            ttl: to_chrono(DEFAULT_SESSION_TTL),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = to_chrono(ttl);
        self
    }

    /// Issue a token bound to `machine_id`.
    pub fn create_session(
        &self,
        machine_id: &str,
    ) -> Result<(SessionToken, SessionRecord), SessionError> {
        let machine_id = MachineId::parse(machine_id)?;
        let token = SessionToken::generate()?;
        let created_at = self.clock.now();
        let record = SessionRecord {
            holder: self.digester.holder_for(&token),
            machine_id,
            created_at,
            expires_at: expiry_after(created_at, self.ttl)?,
        };

        self.sessions.insert(record.holder.clone(), record.clone());
        info!(
            machine = %record.machine_id,
            token = %token,
            expires_at = %record.expires_at,
            "session created"
        );
        Ok((token, record))
    }

    /// Resolve a presented token to its live session.
    pub fn validate(&self, token: &SessionToken) -> Option<SessionRecord> {
        let holder = self.digester.holder_for(token);
        match self.sessions.entry(holder) {
            Entry::Occupied(entry) => {
                let now = self.clock.now();
                if entry.get().is_live(now) {
                    Some(entry.get().clone())
                } else {
                    entry.remove();
                    debug!(token = %token, "evicted expired session");
                    None
                }
            }
            Entry::Vacant(_) => None,
        }
    }

    /// Lease identity for a presented token, without checking liveness.
    pub fn holder_for(&self, token: &SessionToken) -> LeaseHolder {
        self.digester.holder_for(token)
    }

    /// Drop a session explicitly. Returns whether it existed.
    pub fn evict(&self, token: &SessionToken) -> bool {
        self.sessions.remove(&self.digester.holder_for(token)).is_some()
    }

    /// Remove every expired session and return how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut removed = 0;
        self.sessions.retain(|_, record| {
            let keep = record.is_live(now);
            if !keep {
                removed += 1;
            }
            keep
        });
        if removed > 0 {
            debug!(removed, "purged expired sessions");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
