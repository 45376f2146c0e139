//! Connection driver.
//!
//! A [`Session`] owns one established connection: it walks its script one
//! category at a time, picks a valid or fuzzed case for each step, writes
//! it, waits out the pacing delay and finally closes the connection.
//!
//! ```text
//! Connecting --established--> Active --script done--> Closing --> Closed
//!                               |
//!                               +--peer gone / write failed--> Closed
//! ```

use crate::script::SessionScript;
use crate::supply::{CaseKind, CaseStore, SupplyError};
use crate::transport::{self, Disconnect};
use rand::Rng;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};
use uuid::Uuid;

/// Errors that stop a session and the whole run.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("could not supply a case for {category:?}: {source}")]
    Supply {
        category: String,
        #[source]
        source: SupplyError,
    },
}

/// Per-connection identity, fresh for every connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// How many steps in ten get a fuzzed case, from 0 (never) to 10 (always).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FuzzRatio(u8);

impl FuzzRatio {
    pub const MAX: u8 = 10;

    /// Returns `None` if `tenths` is above 10.
    #[must_use]
    pub const fn new(tenths: u8) -> Option<Self> {
        if tenths <= Self::MAX {
            Some(Self(tenths))
        } else {
            None
        }
    }

    #[must_use]
    pub const fn tenths(self) -> u8 {
        self.0
    }
}

impl Default for FuzzRatio {
    fn default() -> Self {
        Self(3)
    }
}

/// Settings shared by every session of a run.
#[derive(Debug, Clone)]
pub struct FuzzSettings {
    pub ratio: FuzzRatio,
    /// Pause after each step, including the last one before closing.
    pub delay: Duration,
    /// Categories that always get valid cases.
    pub dont_fuzz: BTreeSet<String>,
}

impl Default for FuzzSettings {
    fn default() -> Self {
        Self {
            ratio: FuzzRatio::default(),
            delay: Duration::from_millis(50),
            dont_fuzz: BTreeSet::new(),
        }
    }
}

/// Decide whether the next `category` step is fuzzed.
///
/// Draws from `1..=10` only for categories that may be fuzzed; a draw at or
/// below the ratio picks a mutated case.
pub fn choose_case<R: Rng>(settings: &FuzzSettings, category: &str, rng: &mut R) -> CaseKind {
    if settings.dont_fuzz.contains(category) {
        return CaseKind::Valid;
    }
    let draw: u8 = rng.random_range(1..=FuzzRatio::MAX);
    if draw <= settings.ratio.tenths() {
        CaseKind::Mutated
    } else {
        CaseKind::Valid
    }
}

/// Connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Active,
    Closing,
    Closed,
}

/// How a session ended, when it did not hit a fatal error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// The whole script was sent and the connection closed by us.
    Completed,
    /// The connection went away mid-script.
    Lost { reason: String },
}

/// One connection running one script.
pub struct Session {
    id: SessionId,
    script: SessionScript,
    cursor: usize,
    state: SessionState,
    settings: Arc<FuzzSettings>,
    sent: u64,
    fuzzed: u64,
}

impl Session {
    #[must_use]
    pub const fn new(id: SessionId, script: SessionScript, settings: Arc<FuzzSettings>) -> Self {
        Self {
            id,
            script,
            cursor: 0,
            state: SessionState::Connecting,
            settings,
            sent: 0,
            fuzzed: 0,
        }
    }

    #[must_use]
    pub const fn id(&self) -> SessionId {
        self.id
    }

    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub const fn script(&self) -> &SessionScript {
        &self.script
    }

    /// Steps already sent.
    #[must_use]
    pub const fn cursor(&self) -> usize {
        self.cursor
    }

    /// Cases written so far.
    #[must_use]
    pub const fn sent(&self) -> u64 {
        self.sent
    }

    /// Fuzzed cases written so far.
    #[must_use]
    pub const fn fuzzed(&self) -> u64 {
        self.fuzzed
    }

    /// Drive the script over an established stream until it ends.
    ///
    /// The first step goes out immediately. A supply failure aborts at once
    /// without writing anything more. A session is single-use: driving it
    /// again after it closed returns immediately.
    pub async fn drive<S, R>(
        &mut self,
        stream: S,
        store: &mut CaseStore,
        rng: &mut R,
    ) -> Result<SessionEnd, SessionError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
        R: Rng,
    {
        if self.state != SessionState::Connecting {
            return Ok(SessionEnd::Lost {
                reason: "session already used".to_string(),
            });
        }

        let id = self.id.to_string();
        let (mut reader, mut writer) = tokio::io::split(stream);
        self.state = SessionState::Active;
        info!(session = %id, script = %self.script, "Connected to server");

        while let Some(category) = self.script.get(self.cursor).map(str::to_string) {
            let kind = choose_case(&self.settings, &category, rng);
            let payload = match store.next_case(kind, &category) {
                Ok(payload) => payload,
                Err(source) => {
                    self.state = SessionState::Closed;
                    return Err(SessionError::Supply { category, source });
                }
            };

            info!(
                session = %id,
                %category,
                %kind,
                payload = %transport::encode_payload(&payload),
                "Fuzzer -> Server"
            );
            if let Err(e) = writer.write_all(&payload).await {
                return Ok(self.lost(&Disconnect::Failed(e.to_string())));
            }
            self.cursor += 1;
            self.sent += 1;
            if kind == CaseKind::Mutated {
                self.fuzzed += 1;
            }

            if let Err(reason) = transport::pace(&mut reader, self.settings.delay, &id).await {
                return Ok(self.lost(&reason));
            }
        }

        self.state = SessionState::Closing;
        info!(session = %id, "End of session, initiating disconnect");
        if let Err(e) = writer.shutdown().await {
            debug!(session = %id, error = %e, "Shutdown failed");
        }
        self.state = SessionState::Closed;
        Ok(SessionEnd::Completed)
    }

    fn lost(&mut self, reason: &Disconnect) -> SessionEnd {
        self.state = SessionState::Closed;
        SessionEnd::Lost {
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supply::Mutator;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::collections::HashSet;
    use std::path::Path;
    use tokio::io::AsyncReadExt;

    struct StaticMutator;

    impl Mutator for StaticMutator {
        fn generate(&self, _seed_dir: &Path, count: usize) -> Result<Vec<Vec<u8>>, SupplyError> {
            Ok(vec![b"FUZZ".to_vec(); count.max(1)])
        }
    }

    fn settings(ratio: u8, dont_fuzz: &[&str]) -> FuzzSettings {
        FuzzSettings {
            ratio: FuzzRatio::new(ratio).expect("ratio"),
            delay: Duration::from_millis(1),
            dont_fuzz: dont_fuzz.iter().map(|s| (*s).to_string()).collect(),
        }
    }

    fn store_with(categories: &[&str]) -> (tempfile::TempDir, CaseStore) {
        let root = tempfile::tempdir().expect("tempdir");
        for category in categories {
            let dir = root.path().join(category);
            std::fs::create_dir(&dir).expect("mkdir");
            std::fs::write(dir.join("0"), format!("<{category}>")).expect("write");
        }
        let store = CaseStore::new(root.path().to_path_buf(), Arc::new(StaticMutator));
        (root, store)
    }

    #[allow(clippy::cast_precision_loss)]
    fn mutation_rate(ratio: u8, draws: usize) -> f64 {
        let settings = settings(ratio, &[]);
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let mutated = (0..draws)
            .filter(|_| choose_case(&settings, "publish", &mut rng) == CaseKind::Mutated)
            .count();
        mutated as f64 / draws as f64
    }

    #[test]
    fn test_ratio_bounds() {
        assert!(FuzzRatio::new(0).is_some());
        assert!(FuzzRatio::new(10).is_some());
        assert!(FuzzRatio::new(11).is_none());
    }

    #[test]
    fn test_ratio_zero_never_mutates() {
        assert!(mutation_rate(0, 5_000) < f64::EPSILON);
    }

    #[test]
    fn test_ratio_ten_always_mutates() {
        assert!((mutation_rate(10, 5_000) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_ratio_converges_to_tenths() {
        for ratio in 1..10u8 {
            let rate = mutation_rate(ratio, 20_000);
            let expected = f64::from(ratio) / 10.0;
            assert!(
                (rate - expected).abs() < 0.02,
                "ratio {ratio}: got {rate}, expected {expected}"
            );
        }
    }

    #[test]
    fn test_opted_out_category_is_never_fuzzed() {
        let settings = settings(10, &["connect"]);
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..1_000 {
            assert_eq!(choose_case(&settings, "connect", &mut rng), CaseKind::Valid);
        }
        assert_eq!(choose_case(&settings, "publish", &mut rng), CaseKind::Mutated);
    }

    #[test]
    fn test_seeded_rng_gives_repeatable_decisions() {
        let settings = settings(5, &[]);
        let run = |seed| {
            let mut rng = StdRng::seed_from_u64(seed);
            (0..64)
                .map(|_| choose_case(&settings, "publish", &mut rng))
                .collect::<Vec<_>>()
        };
        assert_eq!(run(42), run(42));
    }

    #[test]
    fn test_session_ids_are_unique() {
        let ids: HashSet<_> = (0..1_000).map(|_| SessionId::new()).collect();
        assert_eq!(ids.len(), 1_000);
    }

    #[tokio::test]
    async fn test_drive_sends_script_in_order_then_closes() {
        let (_root, mut store) = store_with(&["connect", "publish", "disconnect"]);
        let script = SessionScript::new(["connect", "publish", "disconnect"]);
        let mut session = Session::new(SessionId::new(), script, Arc::new(settings(0, &[])));
        let mut rng = StdRng::seed_from_u64(7);
        let (client, mut server) = tokio::io::duplex(1024);

        assert_eq!(session.state(), SessionState::Connecting);
        let end = session
            .drive(client, &mut store, &mut rng)
            .await
            .expect("drive");

        assert_eq!(end, SessionEnd::Completed);
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(session.cursor(), session.script().len());
        assert_eq!(session.sent(), 3);
        assert_eq!(session.fuzzed(), 0);

        let mut received = Vec::new();
        server.read_to_end(&mut received).await.expect("read");
        assert_eq!(received, b"<connect><publish><disconnect>");
    }

    #[tokio::test]
    async fn test_drive_fuzzes_everything_but_opted_out() {
        let (_root, mut store) = store_with(&["connect", "publish"]);
        let script = SessionScript::new(["connect", "publish", "publish"]);
        let mut session =
            Session::new(SessionId::new(), script, Arc::new(settings(10, &["connect"])));
        let mut rng = StdRng::seed_from_u64(7);
        let (client, mut server) = tokio::io::duplex(1024);

        session
            .drive(client, &mut store, &mut rng)
            .await
            .expect("drive");

        let mut received = Vec::new();
        server.read_to_end(&mut received).await.expect("read");
        assert_eq!(received, b"<connect>FUZZFUZZ");
        assert_eq!(session.fuzzed(), 2);
    }

    #[tokio::test]
    async fn test_supply_failure_aborts_before_writing() {
        let (_root, mut store) = store_with(&["connect"]);
        let script = SessionScript::new(["connect", "subscribe", "disconnect"]);
        let mut session = Session::new(SessionId::new(), script, Arc::new(settings(0, &[])));
        let mut rng = StdRng::seed_from_u64(7);
        let (client, mut server) = tokio::io::duplex(1024);

        let err = session
            .drive(client, &mut store, &mut rng)
            .await
            .expect_err("missing category");

        let SessionError::Supply { category, source } = err;
        assert_eq!(category, "subscribe");
        assert!(source.is_configuration());
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(session.cursor(), 1);

        let mut received = Vec::new();
        server.read_to_end(&mut received).await.expect("read");
        assert_eq!(received, b"<connect>");
    }

    #[tokio::test]
    async fn test_peer_close_is_a_lost_session() {
        let (_root, mut store) = store_with(&["connect", "disconnect"]);
        let script = SessionScript::new(["connect", "disconnect"]);
        let mut settings = settings(0, &[]);
        settings.delay = Duration::from_secs(5);
        let mut session = Session::new(SessionId::new(), script, Arc::new(settings));
        let mut rng = StdRng::seed_from_u64(7);
        let (client, mut server) = tokio::io::duplex(1024);

        let peer = tokio::spawn(async move {
            let mut buf = [0u8; 9];
            server.read_exact(&mut buf).await.expect("read first case");
            drop(server);
        });

        let end = session
            .drive(client, &mut store, &mut rng)
            .await
            .expect("drive");
        peer.await.expect("peer task");

        assert!(matches!(end, SessionEnd::Lost { .. }));
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(session.cursor(), 1);
    }

    #[tokio::test]
    async fn test_session_cannot_be_reused() {
        let (_root, mut store) = store_with(&["connect"]);
        let script = SessionScript::new(["connect"]);
        let mut session = Session::new(SessionId::new(), script, Arc::new(settings(0, &[])));
        let mut rng = StdRng::seed_from_u64(7);

        let (client, _server) = tokio::io::duplex(1024);
        session.drive(client, &mut store, &mut rng).await.expect("drive");

        let (client, _server) = tokio::io::duplex(1024);
        let end = session.drive(client, &mut store, &mut rng).await.expect("drive");

        assert!(matches!(end, SessionEnd::Lost { .. }));
        assert_eq!(session.cursor(), 1);
    }
}
