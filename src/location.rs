//! Resolving user-facing names (paths, URLs, in-memory ids, archive
//! members) to a [`crate::source::Source`], with a thin process-wide
//! registry layered on top for aliasing and directory-listing caching.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::{IoError, TiffResult};
use crate::source::{FileSource, MemorySource, Source, SourceHandle};
#[cfg(feature = "http")]
use crate::source::UrlSource;
use crate::util::check_suffix;

/// Where a source's bytes ultimately come from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Location {
    /// An id naming a buffer registered directly with the registry.
    Memory(String),
    /// A path on the local filesystem.
    File(String),
    /// A URL, resolved through the `http` source.
    Url(String),
}

impl Location {
    pub fn from_path_or_url(name: &str) -> Self {
        if name.starts_with("http://") || name.starts_with("https://") {
            Location::Url(name.to_string())
        } else {
            Location::File(name.to_string())
        }
    }

    fn is_gzip(&self) -> bool {
        self.name().map(|n| check_suffix(n, ".gz")).unwrap_or(false)
    }

    fn is_bzip2(&self) -> bool {
        self.name().map(|n| check_suffix(n, ".bz2")).unwrap_or(false)
    }

    fn is_zip(&self) -> bool {
        self.name().map(|n| check_suffix(n, ".zip")).unwrap_or(false)
    }

    fn name(&self) -> Option<&str> {
        match self {
            Location::Memory(n) | Location::File(n) | Location::Url(n) => Some(n),
        }
    }
}

/// Key for the directory-listing cache: an absolute path paired with
/// whether hidden entries were included, since the two listings differ.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct DirListingKey {
    absolute_path: String,
    include_hidden: bool,
}

/// A process-wide registry of name aliases, in-memory buffers, and cached
/// directory listings, all behind a single mutex.
///
/// A single lock (rather than one per map) matches the synchronous,
/// single-writer-at-a-time concurrency model used throughout this crate:
/// the registry is consulted rarely enough (open-time, not per-read) that
/// lock contention is not a concern, and a single lock rules out the
/// lock-ordering hazards that multiple maps would introduce.
#[derive(Default)]
pub struct LocationRegistry {
    inner: Mutex<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    aliases: HashMap<String, Location>,
    memory_sources: HashMap<String, Vec<u8>>,
    dir_listings: HashMap<DirListingKey, Vec<String>>,
}

impl LocationRegistry {
    pub fn new() -> Self {
        LocationRegistry::default()
    }

    /// Registers `alias` to resolve to `target` instead of being looked up
    /// as a path or URL directly.
    pub fn add_alias(&self, alias: impl Into<String>, target: Location) {
        let mut inner = self.inner.lock().unwrap();
        inner.aliases.insert(alias.into(), target);
    }

    /// Registers an in-memory buffer under `id`, retrievable later as
    /// `Location::Memory(id)`.
    pub fn put_memory(&self, id: impl Into<String>, data: Vec<u8>) {
        let mut inner = self.inner.lock().unwrap();
        inner.memory_sources.insert(id.into(), data);
    }

    /// Removes a previously registered alias or memory buffer. The registry
    /// never evicts entries on its own; callers must invalidate explicitly.
    pub fn remove(&self, name: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.aliases.remove(name);
        inner.memory_sources.remove(name);
    }

    /// Returns a cached directory listing for `(absolute_path,
    /// include_hidden)`, populating it with `populate` on first use.
    /// Entries are never refreshed automatically; call
    /// [`Self::invalidate_dir_listing`] after writes that add or remove
    /// files in a directory this registry has already listed.
    pub fn dir_listing(
        &self,
        absolute_path: &str,
        include_hidden: bool,
        populate: impl FnOnce() -> TiffResult<Vec<String>>,
    ) -> TiffResult<Vec<String>> {
        let key = DirListingKey {
            absolute_path: absolute_path.to_string(),
            include_hidden,
        };
        let mut inner = self.inner.lock().unwrap();
        if let Some(listing) = inner.dir_listings.get(&key) {
            return Ok(listing.clone());
        }
        drop(inner);
        let listing = populate()?;
        let mut inner = self.inner.lock().unwrap();
        inner.dir_listings.insert(key, listing.clone());
        Ok(listing)
    }

    pub fn invalidate_dir_listing(&self, absolute_path: &str, include_hidden: bool) {
        let key = DirListingKey {
            absolute_path: absolute_path.to_string(),
            include_hidden,
        };
        let mut inner = self.inner.lock().unwrap();
        inner.dir_listings.remove(&key);
    }

    /// Enumerates a local directory's children, or runs the HTML
    /// directory-index heuristic for a URL. Cached under
    /// `(path, includeHidden)` like any other listing.
    pub fn list(&self, path: &str, include_hidden: bool) -> TiffResult<Vec<String>> {
        match self.resolve_alias(path) {
            Location::Url(url) => self.dir_listing(path, include_hidden, || list_url_index(&url)),
            _ => {
                let absolute = std::fs::canonicalize(path)
                    .map(|p| p.to_string_lossy().into_owned())
                    .unwrap_or_else(|_| path.to_string());
                self.dir_listing(&absolute, include_hidden, || list_local_dir(&absolute, include_hidden))
            }
        }
    }

    fn resolve_alias(&self, name: &str) -> Location {
        let inner = self.inner.lock().unwrap();
        inner
            .aliases
            .get(name)
            .cloned()
            .unwrap_or_else(|| Location::from_path_or_url(name))
    }

    /// Opens `name` (resolving any alias first) as a read-only source,
    /// transparently unwrapping a `.gz`/`.bz2`/`.zip` suffix.
    pub fn open_read_only(&self, name: &str) -> TiffResult<Source> {
        let location = self.resolve_alias(name);
        self.open_location_read_only(&location)
    }

    pub fn open_location_read_only(&self, location: &Location) -> TiffResult<Source> {
        let base = match location {
            Location::Memory(id) => {
                let inner = self.inner.lock().unwrap();
                let data = inner
                    .memory_sources
                    .get(id)
                    .cloned()
                    .ok_or(IoError::UnexpectedEnd)?;
                Source::Memory(MemorySource::from_vec(data))
            }
            Location::File(path) => Source::File(FileSource::open_read_only(path)?),
            #[cfg(feature = "http")]
            Location::Url(url) => Source::Url(UrlSource::new(url.clone())?),
            #[cfg(not(feature = "http"))]
            Location::Url(_) => {
                return Err(IoError::Other(std::io::Error::new(
                    std::io::ErrorKind::Unsupported,
                    "http source support not compiled in",
                ))
                .into())
            }
        };

        if location.is_gzip() || location.is_bzip2() || location.is_zip() {
            self.unwrap_archive(location, base)
        } else {
            Ok(base)
        }
    }

    fn unwrap_archive(&self, location: &Location, mut base: Source) -> TiffResult<Source> {
        use crate::source::CompressedSource;
        use std::io::Cursor;

        let len = base.len()? as usize;
        let mut buf = vec![0u8; len];
        base.read_exact_at(0, &mut buf)?;

        let compressed = if location.is_gzip() {
            CompressedSource::open_gzip(Cursor::new(buf))?
        } else if location.is_bzip2() {
            CompressedSource::open_bzip2(Cursor::new(buf))?
        } else {
            CompressedSource::open_zip(Cursor::new(buf), None)?
        };
        Ok(Source::Compressed(Box::new(compressed)))
    }

    /// Opens `name` as a read-write source, failing for URLs and archive
    /// members which cannot be written back through this registry.
    pub fn open_read_write(&self, name: &str) -> TiffResult<Source> {
        let location = self.resolve_alias(name);
        match location {
            Location::File(path) if !location_has_archive_suffix(&location) => {
                Ok(Source::File(FileSource::open_read_write(path)?))
            }
            Location::Memory(id) => {
                let inner = self.inner.lock().unwrap();
                let data = inner.memory_sources.get(&id).cloned().unwrap_or_default();
                Ok(Source::Memory(MemorySource::from_vec(data)))
            }
            _ => Err(IoError::ReadOnly.into()),
        }
    }
}

fn location_has_archive_suffix(location: &Location) -> bool {
    location.is_gzip() || location.is_bzip2() || location.is_zip()
}

/// Local directory enumeration: every entry's file name, excluding
/// dotfiles unless `include_hidden` is set. Entries are returned
/// in whatever order `read_dir` yields them - callers that need a stable
/// order sort afterward.
fn list_local_dir(absolute_path: &str, include_hidden: bool) -> TiffResult<Vec<String>> {
    let entries = std::fs::read_dir(absolute_path).map_err(IoError::Other)?;
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(IoError::Other)?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if include_hidden || !name.starts_with('.') {
            names.push(name);
        }
    }
    Ok(names)
}

/// The HTML directory-index heuristic: fetch the URL as text, scan
/// for `<a href="...">` entries. Apache/nginx autoindex pages are the
/// target; anything else just yields an empty listing rather than an error.
#[cfg(feature = "http")]
fn list_url_index(url: &str) -> TiffResult<Vec<String>> {
    let body = reqwest::blocking::get(url)
        .and_then(|r| r.text())
        .map_err(|e| IoError::Other(std::io::Error::new(std::io::ErrorKind::Other, e)))?;
    Ok(extract_href_entries(&body))
}

#[cfg(not(feature = "http"))]
fn list_url_index(_url: &str) -> TiffResult<Vec<String>> {
    Err(IoError::Other(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "http source support not compiled in",
    ))
    .into())
}

/// Pulls every `href="..."` target out of an HTML directory-index page,
/// skipping the conventional "parent directory" link and anything that
/// isn't a bare relative name (query strings, absolute URLs, fragments).
fn extract_href_entries(body: &str) -> Vec<String> {
    let mut names = Vec::new();
    let lower = body.to_ascii_lowercase();
    let mut search_from = 0usize;
    while let Some(rel) = lower[search_from..].find("href=") {
        let start = search_from + rel + "href=".len();
        let Some(quote) = body.as_bytes().get(start).copied() else { break };
        if quote != b'"' && quote != b'\'' {
            search_from = start;
            continue;
        }
        let value_start = start + 1;
        let Some(rel_end) = body[value_start..].find(quote as char) else { break };
        let value = &body[value_start..value_start + rel_end];
        search_from = value_start + rel_end;

        if value.is_empty()
            || value == "../"
            || value.starts_with('?')
            || value.starts_with('#')
            || value.contains("://")
        {
            continue;
        }
        names.push(value.trim_end_matches('/').to_string());
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_round_trip_through_registry() {
        let registry = LocationRegistry::new();
        registry.put_memory("buf", vec![1, 2, 3, 4]);
        let mut source = registry.open_read_only("buf").unwrap();
        use crate::source::SourceHandle;
        let mut out = [0u8; 4];
        source.read_at(0, &mut out).unwrap();
        assert_eq!(out, [1, 2, 3, 4]);
    }

    #[test]
    fn alias_redirects_to_target() {
        let registry = LocationRegistry::new();
        registry.put_memory("real-buf", vec![9, 9]);
        registry.add_alias("nickname", Location::Memory("real-buf".to_string()));
        let mut source = registry.open_read_only("nickname").unwrap();
        use crate::source::SourceHandle;
        let mut out = [0u8; 2];
        source.read_at(0, &mut out).unwrap();
        assert_eq!(out, [9, 9]);
    }

    #[test]
    fn dir_listing_is_cached_until_invalidated() {
        let registry = LocationRegistry::new();
        let mut calls = 0;
        let listing = registry
            .dir_listing("/some/dir", false, || {
                calls += 1;
                Ok(vec!["a.tif".to_string()])
            })
            .unwrap();
        assert_eq!(listing, vec!["a.tif".to_string()]);

        let listing2 = registry
            .dir_listing("/some/dir", false, || {
                calls += 1;
                Ok(vec!["b.tif".to_string()])
            })
            .unwrap();
        assert_eq!(listing2, vec!["a.tif".to_string()]);
        assert_eq!(calls, 1);

        registry.invalidate_dir_listing("/some/dir", false);
        let listing3 = registry
            .dir_listing("/some/dir", false, || {
                calls += 1;
                Ok(vec!["b.tif".to_string()])
            })
            .unwrap();
        assert_eq!(listing3, vec!["b.tif".to_string()]);
        assert_eq!(calls, 2);
    }

    #[test]
    fn hidden_and_visible_listings_are_distinct_cache_entries() {
        let registry = LocationRegistry::new();
        registry
            .dir_listing("/d", false, || Ok(vec!["visible".into()]))
            .unwrap();
        registry
            .dir_listing("/d", true, || Ok(vec!["visible".into(), ".hidden".into()]))
            .unwrap();
        let visible = registry.dir_listing("/d", false, || panic!("cached")).unwrap();
        let all = registry.dir_listing("/d", true, || panic!("cached")).unwrap();
        assert_eq!(visible, vec!["visible".to_string()]);
        assert_eq!(all, vec!["visible".to_string(), ".hidden".to_string()]);
    }

    #[test]
    fn list_excludes_dotfiles_unless_asked_for() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.tif"), b"").unwrap();
        std::fs::write(dir.path().join(".b.tif"), b"").unwrap();

        let registry = LocationRegistry::new();
        let mut visible = registry.list(dir.path().to_str().unwrap(), false).unwrap();
        visible.sort();
        assert_eq!(visible, vec!["a.tif".to_string()]);

        let mut all = registry.list(dir.path().to_str().unwrap(), true).unwrap();
        all.sort();
        assert_eq!(all, vec![".b.tif".to_string(), "a.tif".to_string()]);
    }

    #[test]
    fn extract_href_entries_skips_parent_links_and_query_strings() {
        let page = r#"
            <html><body>
            <a href="../">Parent Directory</a>
            <a href="plane-0.tif">plane-0.tif</a>
            <a href='plane-1.tif'>plane-1.tif</a>
            <a href="?C=N;O=D">sort</a>
            <a href="https://example.com/elsewhere.tif">elsewhere</a>
            <a href="subdir/">subdir</a>
            </body></html>
        "#;
        assert_eq!(
            extract_href_entries(page),
            vec!["plane-0.tif".to_string(), "plane-1.tif".to_string(), "subdir".to_string()]
        );
    }
}
