//! Vault document store — async note I/O behind a logical-path firewall.
//!
//! Logical paths are slash-separated and relative to the vault root
//! ("daily/today" or "daily/today.md"). Every path crosses the firewall in
//! [`VaultStore::resolve`] before touching the filesystem.

use std::path::{Component, Path, PathBuf};

use serde::Serialize;
use tracing::debug;

/// Error type for vault store operations.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("Note not found: {0}")]
    NotFound(String),
    #[error("Path escapes the vault: {0}")]
    PathOutsideVault(String),
    #[error("Invalid vault path: {0}")]
    InvalidPath(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One note matched by a content search.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub path: String,
    /// Matching lines, trimmed, capped per note.
    pub matches: Vec<String>,
}

/// Maximum matching lines reported per note.
const MAX_MATCHES_PER_NOTE: usize = 5;

/// Async file access rooted at a vault directory.
pub struct VaultStore {
    root: PathBuf,
}

impl VaultStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a logical path to an absolute path inside the vault.
    /// Security: rejects absolute paths, traversal, and hidden segments.
    /// Appends `.md` when the path carries no extension.
    fn resolve(&self, logical: &str) -> Result<PathBuf, VaultError> {
        if logical.is_empty() {
            return Err(VaultError::InvalidPath("empty path".into()));
        }

        let candidate = Path::new(logical);
        if candidate.is_absolute() {
            return Err(VaultError::PathOutsideVault(logical.to_string()));
        }

        let mut resolved = self.root.clone();
        for component in candidate.components() {
            match component {
                Component::Normal(seg) => {
                    let seg_str = seg.to_string_lossy();
                    if seg_str.starts_with('.') {
                        return Err(VaultError::InvalidPath(logical.to_string()));
                    }
                    resolved.push(seg);
                }
                Component::CurDir => {}
                // ParentDir, RootDir, Prefix all escape the vault
                _ => return Err(VaultError::PathOutsideVault(logical.to_string())),
            }
        }

        if resolved.extension().is_none() {
            resolved.set_extension("md");
        }
        Ok(resolved)
    }

    /// Convert an absolute note path back to its logical form.
    fn logical(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/")
    }

    pub async fn read_note(&self, path: &str) -> Result<String, VaultError> {
        let resolved = self.resolve(path)?;
        match tokio::fs::read_to_string(&resolved).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(VaultError::NotFound(path.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn write_note(&self, path: &str, content: &str) -> Result<(), VaultError> {
        let resolved = self.resolve(path)?;
        if let Some(parent) = resolved.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&resolved, content).await?;
        debug!(path = %path, bytes = content.len(), "Note written");
        Ok(())
    }

    pub async fn delete_note(&self, path: &str) -> Result<(), VaultError> {
        let resolved = self.resolve(path)?;
        match tokio::fs::remove_file(&resolved).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(VaultError::NotFound(path.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// List every Markdown note in the vault as a logical path, sorted.
    pub async fn list_notes(&self) -> Result<Vec<String>, VaultError> {
        let mut notes = Vec::new();
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                let name = entry.file_name().to_string_lossy().to_string();
                if name.starts_with('.') {
                    continue;
                }
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    pending.push(path);
                } else if path.extension().is_some_and(|ext| ext == "md") {
                    notes.push(self.logical(&path));
                }
            }
        }

        notes.sort();
        Ok(notes)
    }

    /// Case-insensitive substring search across all notes.
    pub async fn search_notes(&self, query: &str) -> Result<Vec<SearchHit>, VaultError> {
        let needle = query.to_lowercase();
        let mut hits = Vec::new();

        for path in self.list_notes().await? {
            let content = match self.read_note(&path).await {
                Ok(content) => content,
                // Note removed between listing and reading
                Err(VaultError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            };
            let matches: Vec<String> = content
                .lines()
                .filter(|line| line.to_lowercase().contains(&needle))
                .take(MAX_MATCHES_PER_NOTE)
                .map(|line| line.trim().to_string())
                .collect();
            if !matches.is_empty() {
                hits.push(SearchHit { path, matches });
            }
        }

        Ok(hits)
    }

    /// Notes containing a `[[wiki-link]]` to the target note.
    /// The target may be given with or without the `.md` extension.
    pub async fn backlinks(&self, target: &str) -> Result<Vec<String>, VaultError> {
        let stem = target.trim_end_matches(".md");
        let exact = format!("[[{stem}]]");
        let aliased = format!("[[{stem}|");
        let mut sources = Vec::new();

        for path in self.list_notes().await? {
            if path.trim_end_matches(".md") == stem {
                continue;
            }
            let content = match self.read_note(&path).await {
                Ok(content) => content,
                Err(VaultError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            };
            if content.contains(&exact) || content.contains(&aliased) {
                sources.push(path);
            }
        }

        Ok(sources)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, VaultStore) {
        let dir = TempDir::new().unwrap();
        let store = VaultStore::new(dir.path().to_path_buf());
        (dir, store)
    }

    #[tokio::test]
    async fn write_then_read_roundtrip() {
        let (_dir, store) = store();
        store.write_note("daily/today", "# Today\nnotes").await.unwrap();
        let content = store.read_note("daily/today.md").await.unwrap();
        assert_eq!(content, "# Today\nnotes");
    }

    #[tokio::test]
    async fn read_missing_note_is_not_found() {
        let (_dir, store) = store();
        let err = store.read_note("nope").await.unwrap_err();
        assert!(matches!(err, VaultError::NotFound(_)));
    }

    #[tokio::test]
    async fn firewall_rejects_traversal() {
        let (_dir, store) = store();
        let err = store.read_note("../escape").await.unwrap_err();
        assert!(matches!(err, VaultError::PathOutsideVault(_)));

        let err = store.read_note("a/../../escape").await.unwrap_err();
        assert!(matches!(err, VaultError::PathOutsideVault(_)));
    }

    #[tokio::test]
    async fn firewall_rejects_absolute_and_hidden() {
        let (_dir, store) = store();
        let err = store.read_note("/etc/passwd").await.unwrap_err();
        assert!(matches!(err, VaultError::PathOutsideVault(_)));

        let err = store.read_note(".obsidian/config").await.unwrap_err();
        assert!(matches!(err, VaultError::InvalidPath(_)));

        let err = store.read_note("").await.unwrap_err();
        assert!(matches!(err, VaultError::InvalidPath(_)));
    }

    #[tokio::test]
    async fn list_walks_subdirectories() {
        let (_dir, store) = store();
        store.write_note("a", "one").await.unwrap();
        store.write_note("sub/b", "two").await.unwrap();
        store.write_note("sub/deep/c", "three").await.unwrap();

        let notes = store.list_notes().await.unwrap();
        assert_eq!(notes, vec!["a.md", "sub/b.md", "sub/deep/c.md"]);
    }

    #[tokio::test]
    async fn search_is_case_insensitive() {
        let (_dir, store) = store();
        store.write_note("a", "Rust is FAST\nother line").await.unwrap();
        store.write_note("b", "nothing here").await.unwrap();

        let hits = store.search_notes("fast").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].path, "a.md");
        assert_eq!(hits[0].matches, vec!["Rust is FAST"]);
    }

    #[tokio::test]
    async fn backlinks_find_wiki_links() {
        let (_dir, store) = store();
        store.write_note("hub", "see [[notes/target]] for more").await.unwrap();
        store.write_note("alias", "also [[notes/target|the target]]").await.unwrap();
        store.write_note("unrelated", "no links").await.unwrap();
        store.write_note("notes/target", "the target itself").await.unwrap();

        let sources = store.backlinks("notes/target").await.unwrap();
        assert_eq!(sources, vec!["alias.md", "hub.md"]);
    }
}
