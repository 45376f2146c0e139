//! Test fixtures for fuzz runs.
//!
//! Provides a loopback target that records what each connection sent, a
//! builder for valid-case directories, and stand-in mutation tools:
//!
//! ```ignore
//! let target = FakeTarget::start().await;
//! let cases = CaseRoot::new().category("connect", &[b"\x10\x00"]);
//! let tool = ScriptedTool::counting(cases.path());
//!
//! // ... run a Supervisor against target.target() ...
//!
//! let sessions = target.sessions(2, Duration::from_secs(5)).await?;
//! ```

use crate::supply::MutationTool;
use crate::transport::Target;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Errors from the test fixtures.
#[derive(Debug, Error)]
pub enum TestError {
    #[error("timeout waiting for sessions")]
    Timeout,

    #[error("target stopped accepting")]
    TargetGone,
}

/// How the fake target treats each accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetBehavior {
    /// Read until the client closes.
    Drain,
    /// Read until the client closes, answering each read with these bytes.
    Echo(&'static [u8]),
    /// Close after receiving this many bytes.
    HangUpAfter(usize),
}

/// Loopback TCP server recording the bytes of every connection.
pub struct FakeTarget {
    target: Target,
    received: mpsc::UnboundedReceiver<Vec<u8>>,
    accept_handle: JoinHandle<()>,
}

impl FakeTarget {
    /// Start a target that drains every connection.
    pub async fn start() -> Self {
        Self::with_behavior(TargetBehavior::Drain).await
    }

    /// Start a target with the given per-connection behavior.
    ///
    /// # Panics
    ///
    /// Panics if no loopback port can be bound.
    pub async fn with_behavior(behavior: TargetBehavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind loopback");
        let port = listener.local_addr().expect("local addr").port();
        let (tx, received) = mpsc::unbounded_channel();

        let accept_handle = tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let tx = tx.clone();
                tokio::spawn(async move {
                    let mut data = Vec::new();
                    let mut buf = [0u8; 1024];
                    loop {
                        let n = match stream.read(&mut buf).await {
                            Ok(0) | Err(_) => break,
                            Ok(n) => n,
                        };
                        data.extend_from_slice(&buf[..n]);
                        match behavior {
                            TargetBehavior::Drain => {}
                            TargetBehavior::Echo(reply) => {
                                if stream.write_all(reply).await.is_err() {
                                    break;
                                }
                            }
                            TargetBehavior::HangUpAfter(limit) => {
                                if data.len() >= limit {
                                    break;
                                }
                            }
                        }
                    }
                    let _ = tx.send(data);
                });
            }
        });

        Self {
            target: Target::new("127.0.0.1", port),
            received,
            accept_handle,
        }
    }

    /// Address to point the fuzzer at.
    #[must_use]
    pub fn target(&self) -> Target {
        self.target.clone()
    }

    /// Wait for `count` finished connections and return what each sent, in
    /// the order they finished.
    pub async fn sessions(&mut self, count: usize, wait: Duration) -> Result<Vec<Vec<u8>>, TestError> {
        let mut sessions = Vec::with_capacity(count);
        let deadline = tokio::time::Instant::now() + wait;
        while sessions.len() < count {
            match tokio::time::timeout_at(deadline, self.received.recv()).await {
                Ok(Some(data)) => sessions.push(data),
                Ok(None) => return Err(TestError::TargetGone),
                Err(_) => return Err(TestError::Timeout),
            }
        }
        Ok(sessions)
    }
}

impl Drop for FakeTarget {
    fn drop(&mut self) {
        self.accept_handle.abort();
    }
}

/// Temporary valid-case root with one subdirectory per category.
pub struct CaseRoot {
    dir: TempDir,
}

impl CaseRoot {
    /// # Panics
    ///
    /// Panics if the temporary directory cannot be created.
    #[must_use]
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("create case root"),
        }
    }

    /// Add a category whose cases are read back in the given order.
    ///
    /// # Panics
    ///
    /// Panics if the files cannot be written.
    #[must_use]
    pub fn category(self, name: &str, cases: &[&[u8]]) -> Self {
        let dir = self.dir.path().join(name);
        std::fs::create_dir_all(&dir).expect("create category dir");
        for (i, case) in cases.iter().enumerate() {
            std::fs::write(dir.join(format!("{i:04}")), case).expect("write case");
        }
        self
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

impl Default for CaseRoot {
    fn default() -> Self {
        Self::new()
    }
}

/// A radamsa stand-in written as a shell script and run through `/bin/sh`.
pub struct ScriptedTool {
    script: PathBuf,
    calls: PathBuf,
}

impl ScriptedTool {
    /// A tool that writes `count` cases named `fuzz-<call>-<i>` and counts
    /// its invocations in a file next to the script.
    ///
    /// # Panics
    ///
    /// Panics if the script cannot be written.
    #[must_use]
    pub fn counting(dir: &Path) -> Self {
        let script = dir.join("mutator.sh");
        let calls = dir.join("mutator.calls");
        let body = format!(
            r#"out=""; n=""
while [ $# -gt 0 ]; do
  case "$1" in
    -o) out="$2"; shift 2 ;;
    -n) n="$2"; shift 2 ;;
    *) shift ;;
  esac
done
echo x >> "{calls}"
call=$(wc -l < "{calls}" | tr -d ' ')
dir=$(dirname "$out")
i=1
while [ "$i" -le "$n" ]; do
  printf 'fuzz-%s-%s' "$call" "$i" > "$dir/$(printf '%04d' "$i").fuzz"
  i=$((i + 1))
done
"#,
            calls = calls.display()
        );
        std::fs::write(&script, body).expect("write mutator script");
        Self { script, calls }
    }

    /// A tool that prints `message` to stderr and exits with `code`.
    ///
    /// # Panics
    ///
    /// Panics if the script cannot be written.
    #[must_use]
    pub fn failing(dir: &Path, code: i32, message: &str) -> Self {
        let script = dir.join("failing-mutator.sh");
        let calls = dir.join("failing-mutator.calls");
        let body = format!("echo x >> \"{}\"\necho '{message}' >&2\nexit {code}\n", calls.display());
        std::fs::write(&script, body).expect("write mutator script");
        Self { script, calls }
    }

    /// The tool, wrapped for use by a case store.
    #[must_use]
    pub fn tool(&self) -> MutationTool {
        MutationTool::new(PathBuf::from("/bin/sh")).with_args([self.script.clone()])
    }

    /// How many times the tool has run.
    #[must_use]
    pub fn calls(&self) -> usize {
        std::fs::read_to_string(&self.calls).map_or(0, |s| s.lines().count())
    }
}
