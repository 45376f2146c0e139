//! Fuzz-case supply.
//!
//! A [`CaseStore`] hands out payloads per category: valid examples are
//! loaded once from `<root>/<category>/` and cycled forever, mutated cases
//! come from batches produced by a [`Mutator`] and are regenerated whenever
//! the current batch runs dry.
//!
//! The store lives for the whole run and is passed by `&mut` into every
//! session, so the expensive batches are shared across reconnects.

mod mutator;

pub use mutator::{MutationTool, Mutator};

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Number of mutated cases requested per regeneration.
pub const DEFAULT_BATCH_SIZE: usize = 500;

/// Errors that can occur while supplying cases.
#[derive(Debug, Error)]
pub enum SupplyError {
    #[error("valid-case path {} is not a directory", .0.display())]
    DirectoryNotFound(PathBuf),

    #[error("valid-case directory {} contains no cases", .0.display())]
    EmptyDirectory(PathBuf),

    #[error("failed to read case {}: {source}", path.display())]
    ReadCase {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to create mutation output directory: {0}")]
    OutputDir(#[source] std::io::Error),

    #[error("failed to run mutation tool {}: {source}", program.display())]
    ToolSpawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("mutation tool {} failed ({status}): {stderr}", program.display())]
    ToolFailed {
        program: PathBuf,
        status: ExitStatus,
        stderr: String,
    },

    #[error("mutation of {} produced no cases", dir.display())]
    EmptyBatch { dir: PathBuf },
}

impl SupplyError {
    /// Whether this is a problem with the valid-case directories rather than
    /// with the mutation tool.
    #[must_use]
    pub const fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::DirectoryNotFound(_) | Self::EmptyDirectory(_) | Self::ReadCase { .. }
        )
    }
}

/// Whether a step sends a valid example or a mutated one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CaseKind {
    Valid,
    Mutated,
}

impl fmt::Display for CaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Valid => f.write_str("valid"),
            Self::Mutated => f.write_str("fuzzed"),
        }
    }
}

/// A pull-based source of payloads for one category.
pub trait CaseSource: Send {
    /// Take the next payload, refilling the underlying buffer if needed.
    fn next_case(&mut self) -> Result<Vec<u8>, SupplyError>;
}

/// Valid examples of one category, handed out cyclically.
#[derive(Debug)]
pub struct ExampleCycle {
    cases: Vec<Vec<u8>>,
    next: usize,
}

impl ExampleCycle {
    /// Load every file in `dir` as one example, in file-name order.
    pub fn load(dir: &Path) -> Result<Self, SupplyError> {
        if !dir.is_dir() {
            return Err(SupplyError::DirectoryNotFound(dir.to_path_buf()));
        }
        let cases = read_cases(dir)?;
        if cases.is_empty() {
            return Err(SupplyError::EmptyDirectory(dir.to_path_buf()));
        }
        debug!(dir = %dir.display(), count = cases.len(), "Loaded valid cases");
        Ok(Self { cases, next: 0 })
    }

    /// Number of examples in the cycle.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cases.len()
    }

    /// Always false: empty directories are rejected on load.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }
}

impl CaseSource for ExampleCycle {
    fn next_case(&mut self) -> Result<Vec<u8>, SupplyError> {
        let case = self.cases[self.next].clone();
        self.next = (self.next + 1) % self.cases.len();
        Ok(case)
    }
}

/// Mutated cases for one category, consumed batch by batch.
///
/// A batch is never topped up: it is used until empty and then replaced
/// wholesale by a fresh one from the mutator.
pub struct MutationBatches {
    seed_dir: PathBuf,
    batch_size: usize,
    pending: VecDeque<Vec<u8>>,
    mutator: Arc<dyn Mutator>,
}

impl MutationBatches {
    /// Create an empty source; the first pull generates the first batch.
    #[must_use]
    pub fn new(seed_dir: PathBuf, batch_size: usize, mutator: Arc<dyn Mutator>) -> Self {
        Self {
            seed_dir,
            batch_size,
            pending: VecDeque::new(),
            mutator,
        }
    }

    /// Cases left in the current batch.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.pending.len()
    }
}

impl CaseSource for MutationBatches {
    fn next_case(&mut self) -> Result<Vec<u8>, SupplyError> {
        if let Some(case) = self.pending.pop_front() {
            return Ok(case);
        }

        if !self.seed_dir.is_dir() {
            return Err(SupplyError::DirectoryNotFound(self.seed_dir.clone()));
        }
        self.pending = self
            .mutator
            .generate(&self.seed_dir, self.batch_size)?
            .into();

        self.pending.pop_front().ok_or_else(|| SupplyError::EmptyBatch {
            dir: self.seed_dir.clone(),
        })
    }
}

/// Per-category cache of valid and mutated cases.
pub struct CaseStore {
    root: PathBuf,
    batch_size: usize,
    mutator: Arc<dyn Mutator>,
    sources: HashMap<(CaseKind, String), Box<dyn CaseSource>>,
}

impl CaseStore {
    /// Create a store reading examples from subdirectories of `root`.
    #[must_use]
    pub fn new(root: PathBuf, mutator: Arc<dyn Mutator>) -> Self {
        Self {
            root,
            batch_size: DEFAULT_BATCH_SIZE,
            mutator,
            sources: HashMap::new(),
        }
    }

    /// Override the number of cases generated per mutation batch.
    #[must_use]
    pub const fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Directory holding the examples of `category`.
    #[must_use]
    pub fn category_dir(&self, category: &str) -> PathBuf {
        self.root.join(category)
    }

    /// Next valid example of `category`.
    pub fn valid(&mut self, category: &str) -> Result<Vec<u8>, SupplyError> {
        self.next_case(CaseKind::Valid, category)
    }

    /// Next mutated case of `category`, generating a new batch if needed.
    pub fn mutated(&mut self, category: &str) -> Result<Vec<u8>, SupplyError> {
        self.next_case(CaseKind::Mutated, category)
    }

    /// Next case of the given kind.
    pub fn next_case(&mut self, kind: CaseKind, category: &str) -> Result<Vec<u8>, SupplyError> {
        let key = (kind, category.to_string());
        if let Some(source) = self.sources.get_mut(&key) {
            return source.next_case();
        }

        let dir = self.category_dir(category);
        let mut source: Box<dyn CaseSource> = match kind {
            CaseKind::Valid => Box::new(ExampleCycle::load(&dir)?),
            CaseKind::Mutated => Box::new(MutationBatches::new(
                dir,
                self.batch_size,
                Arc::clone(&self.mutator),
            )),
        };
        let case = source.next_case()?;
        self.sources.insert(key, source);
        Ok(case)
    }
}

/// Read every regular file in `dir`, sorted by file name.
pub(crate) fn read_cases(dir: &Path) -> Result<Vec<Vec<u8>>, SupplyError> {
    let read_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source: std::io::Error| SupplyError::ReadCase { path, source }
    };

    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(read_err(dir))? {
        let path = entry.map_err(read_err(dir))?.path();
        if path.is_file() {
            paths.push(path);
        }
    }
    paths.sort();

    paths
        .iter()
        .map(|path| std::fs::read(path).map_err(read_err(path)))
        .collect()
}
