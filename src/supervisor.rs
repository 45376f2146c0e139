//! Connection supervisor.
//!
//! Keeps exactly one session alive at a time. Every closed or lost
//! connection is replaced right away by a new one with a fresh identity and
//! the next script from the catalog. A target that refuses a connection
//! outright, or a case supply that fails, ends the run.

use crate::script::ScriptCatalog;
use crate::session::{FuzzSettings, Session, SessionEnd, SessionError, SessionId};
use crate::supply::CaseStore;
use crate::transport::Target;
use rand::Rng;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Errors that stop the supervisor.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("failed to connect to {target}: {source}")]
    Connect {
        target: Target,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Counters for a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Connections established.
    pub sessions: u64,
    /// Sessions that sent their whole script.
    pub completed: u64,
    /// Sessions whose connection went away early.
    pub lost: u64,
    /// Cases written.
    pub cases_sent: u64,
    /// Fuzzed cases written.
    pub fuzzed_sent: u64,
}

/// How one supervised session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub id: SessionId,
    pub end: SessionEnd,
}

/// Owns the case store, catalog and rng for a run against one target.
pub struct Supervisor<R> {
    target: Target,
    catalog: ScriptCatalog,
    store: CaseStore,
    settings: Arc<FuzzSettings>,
    rng: R,
    session_limit: Option<u64>,
    summary: RunSummary,
}

impl<R: Rng> Supervisor<R> {
    #[must_use]
    pub fn new(
        target: Target,
        catalog: ScriptCatalog,
        store: CaseStore,
        settings: FuzzSettings,
        rng: R,
    ) -> Self {
        Self {
            target,
            catalog,
            store,
            settings: Arc::new(settings),
            rng,
            session_limit: None,
            summary: RunSummary::default(),
        }
    }

    /// Stop cleanly after this many sessions instead of running forever.
    #[must_use]
    pub const fn with_session_limit(mut self, limit: Option<u64>) -> Self {
        self.session_limit = limit;
        self
    }

    /// Counters so far.
    #[must_use]
    pub const fn summary(&self) -> RunSummary {
        self.summary
    }

    /// Connect, run sessions back to back, and reconnect after each one.
    ///
    /// Returns only on a fatal error or when the session limit is reached.
    pub async fn run(&mut self) -> Result<RunSummary, SupervisorError> {
        info!(addr = %self.target, "Starting fuzz run");

        loop {
            if self.limit_reached() {
                info!(addr = %self.target, sessions = self.summary.sessions, "Session limit reached");
                return Ok(self.summary);
            }

            self.run_session().await?;

            if !self.limit_reached() {
                info!(addr = %self.target, "Reconnecting");
            }
        }
    }

    /// Open one connection and drive the next script over it.
    ///
    /// The session limit is not consulted here.
    pub async fn run_session(&mut self) -> Result<SessionReport, SupervisorError> {
        let stream = self
            .target
            .connect()
            .await
            .map_err(|source| SupervisorError::Connect {
                target: self.target.clone(),
                source,
            })?;

        let mut session = Session::new(
            SessionId::new(),
            self.catalog.next_script(),
            Arc::clone(&self.settings),
        );
        self.summary.sessions += 1;

        let result = session
            .drive(stream, &mut self.store, &mut self.rng)
            .await;
        self.summary.cases_sent += session.sent();
        self.summary.fuzzed_sent += session.fuzzed();

        let end = result?;
        match &end {
            SessionEnd::Completed => {
                self.summary.completed += 1;
                info!(session = %session.id(), "Connection closed");
            }
            SessionEnd::Lost { reason } => {
                self.summary.lost += 1;
                warn!(session = %session.id(), %reason, "Connection to server lost");
            }
        }
        Ok(SessionReport {
            id: session.id(),
            end,
        })
    }

    fn limit_reached(&self) -> bool {
        self.session_limit
            .is_some_and(|limit| self.summary.sessions >= limit)
    }
}
