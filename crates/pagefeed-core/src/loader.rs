//! Recovery of query results from the build's on-disk cache.
//!
//! Page results are read lazily, one path at a time, through a
//! [`PageDataReader`]. Static query results are read in bulk once, when the
//! channel is initialized.

use crate::cache::ResultCache;
use async_trait::async_trait;
use pagefeed_protocol::QueryResult;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Content of a static query artifact whose query has not run yet.
pub const UNDEFINED_SENTINEL: &str = "undefined";

/// Cache loader errors.
#[derive(Debug, Error)]
pub enum LoaderError {
    /// The artifact could not be read.
    #[error("Failed to read {}: {source}", .path.display())]
    Io {
        /// Artifact path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The artifact is not valid page data.
    #[error("Failed to parse {}: {source}", .path.display())]
    Parse {
        /// Artifact path.
        path: PathBuf,
        /// Underlying parse error.
        #[source]
        source: serde_json::Error,
    },
}

/// Where the build writes its output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageDataContext {
    /// The build's public directory.
    pub public_dir: PathBuf,
}

impl PageDataContext {
    /// Context for the project rooted at `root`.
    #[must_use]
    pub fn for_root(root: impl AsRef<Path>) -> Self {
        Self {
            public_dir: root.as_ref().join("public"),
        }
    }
}

/// A persisted page-data artifact.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageData {
    /// Page query result.
    pub result: serde_json::Value,
    /// Page path, if recorded.
    #[serde(default)]
    pub path: Option<String>,
    /// Component chunk name, if recorded.
    #[serde(default)]
    pub component_chunk_name: Option<String>,
}

/// Durable source of page-data artifacts.
#[async_trait]
pub trait PageDataReader: Send + Sync {
    /// Read the artifact for `page_path`.
    async fn read(&self, ctx: &PageDataContext, page_path: &str)
        -> Result<PageData, LoaderError>;
}

/// Reads `page-data.json` files from the public directory.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsPageDataReader;

#[async_trait]
impl PageDataReader for FsPageDataReader {
    async fn read(
        &self,
        ctx: &PageDataContext,
        page_path: &str,
    ) -> Result<PageData, LoaderError> {
        let path = page_data_path(&ctx.public_dir, page_path);
        let contents = tokio::fs::read(&path)
            .await
            .map_err(|source| LoaderError::Io {
                path: path.clone(),
                source,
            })?;
        serde_json::from_slice(&contents).map_err(|source| LoaderError::Parse { path, source })
    }
}

/// Directory name used for a page path under `page-data/`.
///
/// `/` maps to `index`; other paths lose their surrounding slashes.
#[must_use]
pub fn fixed_page_path(page_path: &str) -> &str {
    let trimmed = page_path.trim_matches('/');
    if trimmed.is_empty() {
        "index"
    } else {
        trimmed
    }
}

/// Location of the page-data artifact for `page_path`.
#[must_use]
pub fn page_data_path(public_dir: &Path, page_path: &str) -> PathBuf {
    public_dir
        .join("page-data")
        .join(fixed_page_path(page_path))
        .join("page-data.json")
}

/// A component that declares a static query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticQueryComponent {
    /// Content hash of the query.
    pub hash: String,
    /// Path of the declaring component.
    pub component_path: PathBuf,
}

impl StaticQueryComponent {
    /// Create a new component entry.
    #[must_use]
    pub fn new(hash: impl Into<String>, component_path: impl Into<PathBuf>) -> Self {
        Self {
            hash: hash.into(),
            component_path: component_path.into(),
        }
    }
}

/// Read access to the build's state.
pub trait BuildState: Send + Sync {
    /// Static query components currently known to the build.
    fn static_query_components(&self) -> Vec<StaticQueryComponent>;

    /// Root directory of the project.
    fn program_directory(&self) -> PathBuf;
}

/// A fixed list of static query components for one project.
#[derive(Debug, Clone, Default)]
pub struct ComponentRegistry {
    root: PathBuf,
    components: Vec<StaticQueryComponent>,
}

impl ComponentRegistry {
    /// Create a registry for the project at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, components: Vec<StaticQueryComponent>) -> Self {
        Self {
            root: root.into(),
            components,
        }
    }

    /// Build a registry from the static query artifacts already on disk.
    ///
    /// Discovered components point at their artifact, since the declaring
    /// component is not recorded there. A missing directory yields an
    /// empty registry.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory exists but cannot be listed.
    pub fn discover(root: impl Into<PathBuf>) -> std::io::Result<Self> {
        let root = root.into();
        let dir = static_query_dir(&root);

        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(dir = %dir.display(), "No static query directory");
                return Ok(Self::new(root, Vec::new()));
            }
            Err(e) => return Err(e),
        };

        let mut components = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(hash) = path.file_stem().and_then(|s| s.to_str()) {
                components.push(StaticQueryComponent::new(hash, path.clone()));
            }
        }
        components.sort_by(|a, b| a.hash.cmp(&b.hash));

        Ok(Self::new(root, components))
    }

    /// Number of components.
    #[must_use]
    pub fn len(&self) -> usize {
        self.components.len()
    }

    /// Check if the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}

impl BuildState for ComponentRegistry {
    fn static_query_components(&self) -> Vec<StaticQueryComponent> {
        self.components.clone()
    }

    fn program_directory(&self) -> PathBuf {
        self.root.clone()
    }
}

fn static_query_dir(root: &Path) -> PathBuf {
    root.join("public").join("static").join("d")
}

/// Location of the artifact for the static query `hash`.
#[must_use]
pub fn static_query_path(root: &Path, hash: &str) -> PathBuf {
    static_query_dir(root).join(format!("{hash}.json"))
}

/// Read the static query results of `components` from disk.
///
/// Hashes already in `known` are skipped. Artifacts that hold the
/// `undefined` sentinel, or that cannot be read or parsed, are logged and
/// skipped. Returns only the freshly loaded results.
#[must_use]
pub fn load_static_query_results(
    root: &Path,
    components: &[StaticQueryComponent],
    known: &ResultCache,
) -> ResultCache {
    let mut loaded = ResultCache::new();

    for component in components {
        let hash = component.hash.as_str();
        if known.contains(hash) || loaded.contains(hash) {
            continue;
        }

        let path = static_query_path(root, hash);
        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) => {
                warn!(hash = %hash, path = %path.display(), error = %e, "Static query result unreadable");
                continue;
            }
        };

        if contents.trim() == UNDEFINED_SENTINEL {
            info!(
                hash = %hash,
                component = %component.component_path.display(),
                "Static query has not run yet"
            );
            continue;
        }

        match serde_json::from_str(&contents) {
            Ok(result) => {
                loaded.set(hash, QueryResult::new(hash, result));
            }
            Err(e) => {
                warn!(hash = %hash, path = %path.display(), error = %e, "Static query result unparsable");
            }
        }
    }

    debug!(count = loaded.len(), "Loaded static query results from disk");
    loaded
}
