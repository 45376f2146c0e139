//! brokerfuzz — scripted fuzzing sessions against message brokers
//!
//! Replays scripted client sessions against a server, now and then swapping
//! a valid message for a mutated one produced by an external mutation tool
//! (radamsa). Payloads are opaque bytes; the protocol only shows up in the
//! names of the session script categories.

// Error documentation is deferred - the errors are self-explanatory from types
#![allow(clippy::missing_errors_doc)]

pub mod cli;
pub mod replay;
pub mod script;
pub mod session;
pub mod supervisor;
pub mod supply;
pub mod testing;
pub mod transport;

pub use cli::{Cli, Command};
pub use replay::{replay, ReplayError};
pub use script::{CatalogError, ScriptCatalog, SessionScript};
pub use session::{
    choose_case, FuzzRatio, FuzzSettings, Session, SessionEnd, SessionError, SessionId,
    SessionState,
};
pub use supervisor::{RunSummary, SessionReport, Supervisor, SupervisorError};
pub use supply::{
    CaseKind, CaseSource, CaseStore, ExampleCycle, MutationBatches, MutationTool, Mutator,
    SupplyError, DEFAULT_BATCH_SIZE,
};
pub use transport::Target;
