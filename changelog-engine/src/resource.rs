//!
//! Resource resolution for changelog files.
//!
//! A [CompositeResourceAccessor] asks its accessors in the order they were added
//! and uses the first one that knows the path. The usual order is:
//!
//! 1. [EmbeddedResourceAccessor]: files compiled into the binary.
//! 2. [FileSystemResourceAccessor]: files relative to a root directory.
//! 3. [CallerResourceAccessor]: whatever lookup the embedding application supplies.
//!

use std::{
    collections::HashMap,
    fs, io,
    path::{Path, PathBuf},
};

use crate::error::EngineError;

/// A source of changelog files.
pub trait ResourceAccessor: Send + Sync {
    /// Short human readable description, used in error messages.
    fn describe(&self) -> String;

    /// Read the resource at `path`. Returns `Ok(None)` if this accessor does not know it.
    fn open(&self, path: &str) -> io::Result<Option<String>>;
}

/// A resolved resource.
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    /// The path the resource was requested with.
    pub path: String,
    pub content: String,
    /// Description of the accessor that delivered the resource.
    pub source: String,
}

/// Strip prefixes that only mark a path as "inside the binary".
fn normalize_embedded_path(path: &str) -> &str {
    let path = path.strip_prefix("classpath:").unwrap_or(path);
    path.trim_start_matches('/')
}

/// Resources compiled into the binary, usually with `include_str!`.
#[derive(Debug, Clone, Default)]
pub struct EmbeddedResourceAccessor {
    resources: HashMap<String, &'static str>,
}

impl EmbeddedResourceAccessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a resource under `path`.
    pub fn with(mut self, path: &str, content: &'static str) -> Self {
        self.insert(path, content);
        self
    }

    pub fn insert(&mut self, path: &str, content: &'static str) {
        self.resources
            .insert(normalize_embedded_path(path).to_string(), content);
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

impl ResourceAccessor for EmbeddedResourceAccessor {
    fn describe(&self) -> String {
        format!("embedded ({} resources)", self.resources.len())
    }

    fn open(&self, path: &str) -> io::Result<Option<String>> {
        Ok(self
            .resources
            .get(normalize_embedded_path(path))
            .map(|content| content.to_string()))
    }
}

/// Files below a root directory. Absolute paths are read as they are.
#[derive(Debug, Clone)]
pub struct FileSystemResourceAccessor {
    root: PathBuf,
}

impl FileSystemResourceAccessor {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve relative paths against the working directory of the process.
    pub fn current_dir() -> Self {
        Self::new(".")
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ResourceAccessor for FileSystemResourceAccessor {
    fn describe(&self) -> String {
        format!("filesystem ({})", self.root.display())
    }

    fn open(&self, path: &str) -> io::Result<Option<String>> {
        let path = Path::new(path);
        let full_path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        };
        match fs::read_to_string(&full_path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            // A directory with the requested name is not a changelog.
            Err(_) if full_path.is_dir() => Ok(None),
            Err(e) => Err(e),
        }
    }
}

type Lookup = dyn Fn(&str) -> io::Result<Option<String>> + Send + Sync;

/// Resources delivered by a lookup function of the embedding application.
pub struct CallerResourceAccessor {
    name: String,
    lookup: Box<Lookup>,
}

impl CallerResourceAccessor {
    pub fn new(
        name: impl Into<String>,
        lookup: impl Fn(&str) -> io::Result<Option<String>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            lookup: Box::new(lookup),
        }
    }

    /// Look the path up in each directory, in order.
    pub fn search_paths(dirs: Vec<PathBuf>) -> Self {
        let name = format!(
            "search paths ({})",
            dirs.iter()
                .map(|dir| dir.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );
        Self::new(name, move |path| {
            for dir in &dirs {
                if let Some(content) = FileSystemResourceAccessor::new(dir).open(path)? {
                    return Ok(Some(content));
                }
            }
            Ok(None)
        })
    }
}

impl std::fmt::Debug for CallerResourceAccessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallerResourceAccessor")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl ResourceAccessor for CallerResourceAccessor {
    fn describe(&self) -> String {
        self.name.clone()
    }

    fn open(&self, path: &str) -> io::Result<Option<String>> {
        (self.lookup)(path)
    }
}

/// An ordered list of accessors. The first accessor that knows a path wins.
#[derive(Default)]
pub struct CompositeResourceAccessor {
    accessors: Vec<Box<dyn ResourceAccessor>>,
}

impl CompositeResourceAccessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an accessor. It is asked after all accessors added before it.
    pub fn with(mut self, accessor: impl ResourceAccessor + 'static) -> Self {
        self.push(accessor);
        self
    }

    pub fn push(&mut self, accessor: impl ResourceAccessor + 'static) {
        self.accessors.push(Box::new(accessor));
    }

    pub fn len(&self) -> usize {
        self.accessors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accessors.is_empty()
    }

    /// Resolve `path` with the first accessor that knows it.
    pub fn load(&self, path: &str) -> Result<Resource, EngineError> {
        for accessor in &self.accessors {
            let content = accessor
                .open(path)
                .map_err(|source| EngineError::ResourceRead {
                    path: path.to_string(),
                    source,
                })?;
            if let Some(content) = content {
                tracing::debug!("Resolved [{}] through {}", path, accessor.describe());
                return Ok(Resource {
                    path: path.to_string(),
                    content,
                    source: accessor.describe(),
                });
            }
        }
        Err(EngineError::ResourceNotFound {
            path: path.to_string(),
            searched: self.describe(),
        })
    }

    fn describe(&self) -> String {
        if self.accessors.is_empty() {
            return "no resource accessors".to_string();
        }
        self.accessors
            .iter()
            .map(|accessor| accessor.describe())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl std::fmt::Debug for CompositeResourceAccessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CompositeResourceAccessor[{}]", self.describe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_strips_classpath_prefix() {
        let accessor = EmbeddedResourceAccessor::new().with("/db/changelog.yaml", "content");
        assert_eq!(
            accessor.open("classpath:db/changelog.yaml").unwrap(),
            Some("content".to_string())
        );
        assert_eq!(
            accessor.open("db/changelog.yaml").unwrap(),
            Some("content".to_string())
        );
        assert_eq!(accessor.open("other.yaml").unwrap(), None);
    }

    #[test]
    fn test_filesystem_relative_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("changelog.sql"), "--liquibase formatted sql").unwrap();
        let accessor = FileSystemResourceAccessor::new(dir.path());
        assert!(accessor.open("changelog.sql").unwrap().is_some());
        assert!(accessor.open("missing.sql").unwrap().is_none());

        let absolute = dir.path().join("changelog.sql");
        let other_root = FileSystemResourceAccessor::new("/nonexistent");
        assert!(other_root
            .open(absolute.to_str().unwrap())
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_composite_first_match_wins() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("changelog.yaml"), "from filesystem").unwrap();

        let composite = CompositeResourceAccessor::new()
            .with(EmbeddedResourceAccessor::new().with("changelog.yaml", "from embedded"))
            .with(FileSystemResourceAccessor::new(dir.path()))
            .with(CallerResourceAccessor::new("caller", |path| {
                Ok((path == "caller.yaml").then(|| "from caller".to_string()))
            }));

        let resource = composite.load("changelog.yaml").unwrap();
        assert_eq!(resource.content, "from embedded");
        assert!(resource.source.starts_with("embedded"));

        let resource = composite.load("caller.yaml").unwrap();
        assert_eq!(resource.content, "from caller");
        assert_eq!(resource.source, "caller");
    }

    #[test]
    fn test_composite_not_found_lists_accessors() {
        let composite = CompositeResourceAccessor::new()
            .with(EmbeddedResourceAccessor::new())
            .with(FileSystemResourceAccessor::new("/nonexistent"));
        let err = composite.load("missing.yaml").unwrap_err();
        assert!(err.is_resource_error());
        let message = err.to_string();
        assert!(message.contains("missing.yaml"));
        assert!(message.contains("embedded"));
        assert!(message.contains("/nonexistent"));
    }

    #[test]
    fn test_search_paths_in_order() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        fs::write(second.path().join("a.sql"), "second").unwrap();
        fs::write(first.path().join("b.sql"), "first").unwrap();
        fs::write(second.path().join("b.sql"), "second").unwrap();

        let accessor = CallerResourceAccessor::search_paths(vec![
            first.path().to_path_buf(),
            second.path().to_path_buf(),
        ]);
        assert_eq!(accessor.open("a.sql").unwrap(), Some("second".to_string()));
        assert_eq!(accessor.open("b.sql").unwrap(), Some("first".to_string()));
        assert_eq!(accessor.open("c.sql").unwrap(), None);
    }
}
