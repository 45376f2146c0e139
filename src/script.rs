//! Session scripts and the round-robin catalog they are drawn from.
//!
//! A script is the ordered list of categories one connection sends before
//! it disconnects. Categories name subdirectories of the valid-case root.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::ffi::OsStr;
use std::fmt;
use std::path::{Component, Path};
use thiserror::Error;

/// Errors from loading a script catalog.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read script catalog {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid script catalog: {0}")]
    Parse(#[source] serde_json::Error),

    #[error("script catalog is empty")]
    Empty,

    #[error("script {0} has no steps")]
    EmptyScript(usize),

    #[error("script {index} has invalid category {category:?}")]
    InvalidCategory { index: usize, category: String },
}

/// One connect-to-disconnect interaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionScript(Vec<String>);

impl SessionScript {
    /// Create a script from category names.
    pub fn new<I, S>(categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(categories.into_iter().map(Into::into).collect())
    }

    /// Category at step `index`, if the script is that long.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&str> {
        self.0.get(index).map(String::as_str)
    }

    /// The first category, which opens the session.
    #[must_use]
    pub fn first(&self) -> Option<&str> {
        self.get(0)
    }

    /// Number of steps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// All categories in order.
    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl fmt::Display for SessionScript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join(" -> "))
    }
}

/// A fixed, non-empty list of scripts handed out round-robin.
#[derive(Debug, Clone)]
pub struct ScriptCatalog {
    scripts: Vec<SessionScript>,
    next: usize,
}

impl ScriptCatalog {
    /// Build a catalog, validating every script.
    pub fn new(scripts: Vec<SessionScript>) -> Result<Self, CatalogError> {
        if scripts.is_empty() {
            return Err(CatalogError::Empty);
        }
        for (index, script) in scripts.iter().enumerate() {
            if script.is_empty() {
                return Err(CatalogError::EmptyScript(index));
            }
            if let Some(bad) = script.categories().find(|c| !is_plain_category(c)) {
                return Err(CatalogError::InvalidCategory {
                    index,
                    category: bad.to_string(),
                });
            }
        }
        Ok(Self { scripts, next: 0 })
    }

    /// The MQTT sessions: connect/disconnect up to full QoS 2 exchanges.
    #[must_use]
    pub fn mqtt() -> Self {
        let scripts = vec![
            SessionScript::new(["connect", "disconnect"]),
            SessionScript::new(["connect", "subscribe", "disconnect"]),
            SessionScript::new(["connect", "subscribe", "publish", "disconnect"]),
            SessionScript::new([
                "connect",
                "subscribe",
                "publish",
                "publish-ack",
                "publish-release",
                "publish-complete",
                "publish-received",
                "publish-complete",
                "disconnect",
            ]),
            SessionScript::new([
                "connect",
                "publish",
                "publish-release",
                "subscribe",
                "publish-received",
                "publish-ack",
                "disconnect",
            ]),
        ];
        Self { scripts, next: 0 }
    }

    /// Parse a catalog from JSON: an array of arrays of category names.
    pub fn from_json(json: &str) -> Result<Self, CatalogError> {
        let scripts: Vec<SessionScript> =
            serde_json::from_str(json).map_err(CatalogError::Parse)?;
        Self::new(scripts)
    }

    /// Load a JSON catalog from a file.
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let json = std::fs::read_to_string(path).map_err(|source| CatalogError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&json)
    }

    /// The next script in rotation, wrapping after the last.
    pub fn next_script(&mut self) -> SessionScript {
        let script = self.scripts[self.next].clone();
        self.next = (self.next + 1) % self.scripts.len();
        script
    }

    /// All scripts in catalog order.
    #[must_use]
    pub fn scripts(&self) -> &[SessionScript] {
        &self.scripts
    }

    /// Categories that open at least one script.
    ///
    /// A category listed here is opted out at every step it appears in, not
    /// only when it opens a session.
    #[must_use]
    pub fn opening_categories(&self) -> BTreeSet<String> {
        self.scripts
            .iter()
            .filter_map(|s| s.first().map(str::to_string))
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.scripts.len()
    }

    /// Always false: empty catalogs are rejected on construction.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.scripts.is_empty()
    }
}

impl Default for ScriptCatalog {
    fn default() -> Self {
        Self::mqtt()
    }
}

/// A category must be a single normal path component under the case root.
fn is_plain_category(category: &str) -> bool {
    let mut components = Path::new(category).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(name)), None) if name == OsStr::new(category)
    )
}
