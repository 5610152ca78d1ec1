//! URI resolvers that hand encoded image bytes to the surface's load worker.
//!
//! Resolvers run on the worker thread, never on the render thread, so they
//! are free to block.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use anyhow::{anyhow, bail, Context, Result};
use reqwest::blocking::Client;
use reqwest::Url;
use tracing::debug;

/// Resolves a URI to the encoded bytes of an image.
pub trait ImageSource: Send + Sync {
    fn fetch(&self, uri: &str) -> Result<Vec<u8>>;
}

impl<S: ImageSource + ?Sized> ImageSource for Arc<S> {
    fn fetch(&self, uri: &str) -> Result<Vec<u8>> {
        (**self).fetch(uri)
    }
}

/// Reads `file://` URIs and plain filesystem paths.
#[derive(Debug, Clone, Default)]
pub struct FileSource {
    base: Option<PathBuf>,
}

impl FileSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Relative paths resolve against `base` instead of the process
    /// working directory.
    pub fn with_base<P: Into<PathBuf>>(base: P) -> Self {
        Self {
            base: Some(base.into()),
        }
    }

    fn resolve(&self, uri: &str) -> Result<PathBuf> {
        let path = if uri.starts_with("file://") {
            let url = Url::parse(uri).with_context(|| format!("parsing file uri '{uri}'"))?;
            url.to_file_path()
                .map_err(|_| anyhow!("'{uri}' does not name a local file"))?
        } else {
            PathBuf::from(uri)
        };

        match &self.base {
            Some(base) if path.is_relative() => Ok(base.join(path)),
            _ => Ok(path),
        }
    }
}

impl ImageSource for FileSource {
    fn fetch(&self, uri: &str) -> Result<Vec<u8>> {
        let path = self.resolve(uri)?;
        debug!(%uri, path = %path.display(), "reading image file");
        fs::read(&path).with_context(|| format!("reading {}", path.display()))
    }
}

/// Fetches `http://` and `https://` URIs with a blocking client.
#[derive(Debug, Clone)]
pub struct HttpSource {
    http: Client,
}

impl HttpSource {
    pub fn new() -> Result<Self> {
        let http = Client::builder()
            .build()
            .context("building http client")?;
        Ok(Self { http })
    }

    pub fn with_client(http: Client) -> Self {
        Self { http }
    }
}

impl ImageSource for HttpSource {
    fn fetch(&self, uri: &str) -> Result<Vec<u8>> {
        let url = Url::parse(uri).with_context(|| format!("parsing url '{uri}'"))?;
        debug!(%url, "downloading image");
        let response = self
            .http
            .get(url.clone())
            .send()
            .with_context(|| format!("requesting {url}"))?
            .error_for_status()
            .with_context(|| format!("{url} returned an error status"))?;
        let bytes = response
            .bytes()
            .with_context(|| format!("reading body of {url}"))?;
        Ok(bytes.to_vec())
    }
}

/// URI to bytes map, for bundled assets and tests.
#[derive(Debug, Default)]
pub struct MemorySource {
    entries: RwLock<HashMap<String, Arc<[u8]>>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, uri: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        self.insert(uri, bytes);
        self
    }

    pub fn insert(&self, uri: impl Into<String>, bytes: impl Into<Arc<[u8]>>) {
        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        entries.insert(uri.into(), bytes.into());
    }

    pub fn remove(&self, uri: &str) -> bool {
        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        entries.remove(uri).is_some()
    }
}

impl ImageSource for MemorySource {
    fn fetch(&self, uri: &str) -> Result<Vec<u8>> {
        let entries = self
            .entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match entries.get(uri) {
            Some(bytes) => Ok(bytes.to_vec()),
            None => bail!("no in-memory image registered for '{uri}'"),
        }
    }
}

/// Dispatches on the URI scheme. URIs without a scheme go to the `file`
/// route.
#[derive(Default)]
pub struct SchemeRouter {
    routes: HashMap<String, Arc<dyn ImageSource>>,
}

impl SchemeRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// `file`, `http` and `https` wired to [`FileSource`] and [`HttpSource`].
    pub fn standard() -> Result<Self> {
        let http: Arc<dyn ImageSource> = Arc::new(HttpSource::new()?);
        Ok(Self::new()
            .route("file", Arc::new(FileSource::new()))
            .route("http", Arc::clone(&http))
            .route("https", http))
    }

    pub fn route(mut self, scheme: &str, source: Arc<dyn ImageSource>) -> Self {
        self.routes.insert(scheme.to_ascii_lowercase(), source);
        self
    }

    fn scheme(uri: &str) -> String {
        match uri.split_once("://") {
            Some((scheme, _)) => scheme.to_ascii_lowercase(),
            None => "file".to_string(),
        }
    }
}

impl std::fmt::Debug for SchemeRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut schemes: Vec<&str> = self.routes.keys().map(String::as_str).collect();
        schemes.sort_unstable();
        f.debug_struct("SchemeRouter").field("schemes", &schemes).finish()
    }
}

impl ImageSource for SchemeRouter {
    fn fetch(&self, uri: &str) -> Result<Vec<u8>> {
        let scheme = Self::scheme(uri);
        let source = self
            .routes
            .get(&scheme)
            .ok_or_else(|| anyhow!("no image source handles '{scheme}' uris"))?;
        source.fetch(uri)
    }
}

/// Convenience for hosts that keep images next to a config file.
pub fn file_source_near(path: &Path) -> FileSource {
    match path.parent() {
        Some(parent) => FileSource::with_base(parent),
        None => FileSource::new(),
    }
}
