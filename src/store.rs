use std::collections::BTreeMap;
use std::path;

use anyhow::Context;
use anyhow::Result;
use anyhow::bail;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::mirror::Attributes;
use crate::mirror::BreakingChangeNotifier;
use crate::mirror::Mirror;
use crate::mirror::MirrorError;
use crate::mirror::StoredAttributes;

/// Name of the mirror definitions file at the repository root.
pub const STORE_FILE: &str = ".braids.json";

pub const CONFIG_VERSION: u32 = 1;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Mirror '{0}' already exists")]
    AlreadyExists(String),
    #[error("Mirror '{0}' does not exist")]
    NotFound(String),
    #[error("Unsupported config version {0}; this braid understands version {CONFIG_VERSION}")]
    UnsupportedVersion(u32),
}

#[derive(Deserialize)]
struct StoredFile {
    config_version: u32,
    #[serde(default)]
    mirrors: BTreeMap<String, StoredAttributes>,
}

#[derive(Serialize)]
struct CanonicalFile<'a> {
    config_version: u32,
    mirrors: BTreeMap<&'a str, &'a Attributes>,
}

/// The ordered set of mirrors defined for a repository.
#[derive(Debug)]
pub struct MirrorStore {
    file: path::PathBuf,
    mirrors: BTreeMap<String, Mirror>,
    removed: Vec<String>,
}

impl MirrorStore {
    /// Load mirror definitions from `file`; a missing file is an empty store.
    ///
    /// Mirrors that have to be dropped because of a breaking change are
    /// skipped and listed in [`MirrorStore::removed`].
    pub fn load(file: path::PathBuf, notifier: &mut dyn BreakingChangeNotifier) -> Result<Self> {
        if !file.exists() {
            return Ok(Self::empty(file));
        }

        let contents = std::fs::read_to_string(&file)
            .with_context(|| format!("Failed to read {}", file.display()))?;
        let stored: StoredFile = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse {}", file.display()))?;
        if stored.config_version != CONFIG_VERSION {
            bail!(StoreError::UnsupportedVersion(stored.config_version));
        }

        let mut store = Self::empty(file);
        for (path, attributes) in stored.mirrors {
            match Mirror::new(&path, attributes, Some(&mut *notifier)) {
                Ok(mirror) => {
                    store.mirrors.insert(mirror.path().to_string(), mirror);
                }
                Err(MirrorError::RemoveMirrorDueToBreakingChange(path)) => {
                    store.removed.push(path);
                }
                Err(err) => return Err(err).context(format!("Invalid mirror '{}'", path)),
            }
        }

        Ok(store)
    }

    pub fn empty(file: path::PathBuf) -> Self {
        Self {
            file,
            mirrors: BTreeMap::new(),
            removed: Vec::new(),
        }
    }

    /// Write the canonical form of all mirrors back to disk.
    pub fn save(&self) -> Result<()> {
        let mut json = serde_json::to_string_pretty(&self.canonical())?;
        json.push('\n');
        std::fs::write(&self.file, json)
            .with_context(|| format!("Failed to write {}", self.file.display()))?;
        Ok(())
    }

    fn canonical(&self) -> CanonicalFile<'_> {
        CanonicalFile {
            config_version: CONFIG_VERSION,
            mirrors: self
                .mirrors
                .iter()
                .map(|(path, mirror)| (path.as_str(), mirror.attributes()))
                .collect(),
        }
    }

    pub fn file(&self) -> &path::Path {
        &self.file
    }

    pub fn mirrors(&self) -> impl Iterator<Item = &Mirror> {
        self.mirrors.values()
    }

    /// Paths of mirrors dropped while loading.
    pub fn removed(&self) -> &[String] {
        &self.removed
    }

    pub fn get(&self, path: &str) -> Result<&Mirror> {
        let path = path.strip_suffix('/').unwrap_or(path);
        self.mirrors
            .get(path)
            .ok_or_else(|| StoreError::NotFound(path.to_string()).into())
    }

    pub fn get_mut(&mut self, path: &str) -> Result<&mut Mirror> {
        let path = path.strip_suffix('/').unwrap_or(path);
        self.mirrors
            .get_mut(path)
            .ok_or_else(|| StoreError::NotFound(path.to_string()).into())
    }

    pub fn contains(&self, path: &str) -> bool {
        self.mirrors.contains_key(path.strip_suffix('/').unwrap_or(path))
    }

    pub fn add(&mut self, mirror: Mirror) -> Result<()> {
        if self.mirrors.contains_key(mirror.path()) {
            bail!(StoreError::AlreadyExists(mirror.path().to_string()));
        }
        self.mirrors.insert(mirror.path().to_string(), mirror);
        Ok(())
    }

    pub fn remove(&mut self, path: &str) -> Result<Mirror> {
        let path = path.strip_suffix('/').unwrap_or(path);
        self.mirrors
            .remove(path)
            .ok_or_else(|| StoreError::NotFound(path.to_string()).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mirror::AddOptions;

    fn no_notices(description: &str) {
        panic!("unexpected breaking change: {}", description);
    }

    fn write(dir: &tempfile::TempDir, contents: &str) -> path::PathBuf {
        let file = dir.path().join(STORE_FILE);
        std::fs::write(&file, contents).unwrap();
        file
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store =
            MirrorStore::load(dir.path().join(STORE_FILE), &mut no_notices).unwrap();
        assert_eq!(store.mirrors().count(), 0);
    }

    #[test]
    fn test_load_migrates_and_drops_removed_mirrors() {
        let dir = tempfile::tempdir().unwrap();
        let file = write(
            &dir,
            r#"{
              "config_version": 1,
              "mirrors": {
                "vendor/old": {"url": "svn://x", "type": "svn"},
                "vendor/locked/": {"url": "git://y", "branch": "main", "lock": true, "revision": "abc"},
                "vendor/full": {"url": "git://z", "branch": "main", "squashed": false, "revision": "def"}
              }
            }"#,
        );

        let mut notices = Vec::new();
        let store = MirrorStore::load(file, &mut |n: &str| notices.push(n.to_string())).unwrap();

        assert_eq!(store.removed(), ["vendor/old"]);
        assert_eq!(notices.len(), 2);
        assert!(store.get("vendor/locked").unwrap().locked());
        assert!(store.get("vendor/full").is_ok());
        assert!(!store.contains("vendor/old"));
    }

    #[test]
    fn test_unknown_attribute_is_a_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let file = write(
            &dir,
            r#"{"config_version": 1, "mirrors": {"a": {"url": "u", "colour": "red"}}}"#,
        );
        assert!(MirrorStore::load(file, &mut |_: &str| {}).is_err());
    }

    #[test]
    fn test_unsupported_version() {
        let dir = tempfile::tempdir().unwrap();
        let file = write(&dir, r#"{"config_version": 2, "mirrors": {}}"#);
        let err = MirrorStore::load(file, &mut |_: &str| {}).unwrap_err();
        assert_eq!(
            err.downcast_ref::<StoreError>(),
            Some(&StoreError::UnsupportedVersion(2))
        );
    }

    #[test]
    fn test_save_writes_canonical_form() {
        let dir = tempfile::tempdir().unwrap();
        let file = write(
            &dir,
            r#"{"config_version": 1, "mirrors": {
                "b": {"revision": "r2", "tag": "v1", "url": "git://b", "type": "git"},
                "a": {"revision": "r1", "path": "lib", "branch": "main", "url": "git://a", "squashed": true}
            }}"#,
        );
        let store = MirrorStore::load(file.clone(), &mut |_: &str| {}).unwrap();
        store.save().unwrap();

        insta::assert_snapshot!(std::fs::read_to_string(&file).unwrap(), @r#"
        {
          "config_version": 1,
          "mirrors": {
            "a": {
              "url": "git://a",
              "branch": "main",
              "path": "lib",
              "revision": "r1"
            },
            "b": {
              "url": "git://b",
              "tag": "v1",
              "revision": "r2"
            }
          }
        }
        "#);
    }

    #[test]
    fn test_add_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = MirrorStore::empty(dir.path().join(STORE_FILE));
        let mirror = Mirror::new_from_options("git://x/lib.git", AddOptions::default()).unwrap();

        store.add(mirror.clone()).unwrap();
        let err = store.add(mirror).unwrap_err();
        assert_eq!(
            err.downcast_ref::<StoreError>(),
            Some(&StoreError::AlreadyExists("lib".to_string()))
        );

        store.get_mut("lib/").unwrap().set_revision(Some("abc".to_string()));
        store.save().unwrap();

        let mut reloaded =
            MirrorStore::load(dir.path().join(STORE_FILE), &mut no_notices).unwrap();
        assert_eq!(reloaded.get("lib").unwrap().revision(), Some("abc"));

        reloaded.remove("lib").unwrap();
        assert!(reloaded.remove("lib").is_err());
    }
}
