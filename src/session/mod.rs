//! Session resolution and snapshot persistence seams.
//!
//! The projection engine never touches these; the HTTP layer resolves a
//! session for each request and hands finished runs to a [`SnapshotStore`].

use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use thiserror::Error;
use uuid::Uuid;

use crate::core::{Config, Projection, ScenarioPreset};

pub const ANONYMOUS_SESSION: &str = "anonymous";

#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("missing bearer token")]
    MissingToken,
    #[error("unknown bearer token")]
    UnknownToken,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("snapshot store unavailable")]
    Unavailable,
}

pub trait SessionProvider: Send + Sync {
    fn resolve(&self, bearer: Option<&str>) -> Result<SessionId, SessionError>;
}

pub trait SnapshotStore: Send + Sync {
    fn save(&self, snapshot: Snapshot) -> Result<(), StoreError>;
    fn list(&self, session: &SessionId) -> Result<Vec<Snapshot>, StoreError>;
}

/// Admits every caller under the shared anonymous session.
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenSessions;

impl SessionProvider for OpenSessions {
    fn resolve(&self, _bearer: Option<&str>) -> Result<SessionId, SessionError> {
        Ok(SessionId::new(ANONYMOUS_SESSION))
    }
}

#[derive(Debug, Default, Clone)]
pub struct StaticTokenSessions {
    tokens: HashMap<String, SessionId>,
}

impl StaticTokenSessions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, token: impl Into<String>, session: SessionId) -> Self {
        self.tokens.insert(token.into(), session);
        self
    }

    /// Parses `token=session` pairs separated by commas. A bare token is its own session id.
    pub fn from_token_list(list: &str) -> Self {
        list.split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .fold(Self::new(), |sessions, entry| match entry.split_once('=') {
                Some((token, session)) => {
                    sessions.with_token(token.trim(), SessionId::new(session.trim()))
                }
                None => sessions.with_token(entry, SessionId::new(entry)),
            })
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl SessionProvider for StaticTokenSessions {
    fn resolve(&self, bearer: Option<&str>) -> Result<SessionId, SessionError> {
        let token = bearer
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(SessionError::MissingToken)?;
        self.tokens
            .get(token)
            .cloned()
            .ok_or(SessionError::UnknownToken)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub id: Uuid,
    pub session_id: SessionId,
    pub preset: ScenarioPreset,
    pub car_price: f64,
    pub deal_mix_pct: f64,
    pub monthly_intros: f64,
    pub avg_employees: f64,
    #[serde(rename = "additionalNLRate")]
    pub additional_nl_rate: f64,
    pub repeat_rate: f64,
    pub hot_lead_rate: f64,
    pub total_dealer_revenue: f64,
    pub total_intermediary_revenue: f64,
    pub total_hot_leads: f64,
    pub dealer_revenue_final_month: f64,
}

impl Snapshot {
    pub fn capture(session_id: SessionId, config: &Config, projection: &Projection) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            preset: config.preset,
            car_price: config.car_price,
            deal_mix_pct: config.referral_mix * 100.0,
            monthly_intros: config.monthly_intros,
            avg_employees: config.avg_employees_per_employer,
            additional_nl_rate: config.organic_conversion_rate * 100.0,
            repeat_rate: config.repeat_rate * 100.0,
            hot_lead_rate: config.hot_lead_rate * 100.0,
            total_dealer_revenue: projection.summary.total_dealer_revenue,
            total_intermediary_revenue: projection.summary.total_intermediary_revenue,
            total_hot_leads: projection.summary.total_hot_leads,
            dealer_revenue_final_month: projection.summary.dealer_revenue_final_month,
        }
    }
}

#[derive(Debug, Default)]
pub struct InMemorySnapshotStore {
    by_session: Mutex<HashMap<SessionId, Vec<Snapshot>>>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SnapshotStore for InMemorySnapshotStore {
    fn save(&self, snapshot: Snapshot) -> Result<(), StoreError> {
        let mut guard = self.by_session.lock().map_err(|_| StoreError::Unavailable)?;
        guard
            .entry(snapshot.session_id.clone())
            .or_default()
            .push(snapshot);
        Ok(())
    }

    fn list(&self, session: &SessionId) -> Result<Vec<Snapshot>, StoreError> {
        let guard = self.by_session.lock().map_err(|_| StoreError::Unavailable)?;
        Ok(guard.get(session).cloned().unwrap_or_default())
    }
}
