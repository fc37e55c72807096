use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde_json::Value;

/// Opaque key-value persistence, shaped like the extension storage area.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<Value>>;
    fn set(&mut self, key: &str, value: Value) -> anyhow::Result<()>;
    fn remove(&mut self, key: &str) -> anyhow::Result<()>;
}

impl<S: KeyValueStore + ?Sized> KeyValueStore for &mut S {
    fn get(&self, key: &str) -> anyhow::Result<Option<Value>> {
        (**self).get(key)
    }

    fn set(&mut self, key: &str, value: Value) -> anyhow::Result<()> {
        (**self).set(key, value)
    }

    fn remove(&mut self, key: &str) -> anyhow::Result<()> {
        (**self).remove(key)
    }
}

#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    values: BTreeMap<String, Value>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<Value>> {
        Ok(self.values.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: Value) -> anyhow::Result<()> {
        self.values.insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&mut self, key: &str) -> anyhow::Result<()> {
        self.values.remove(key);
        Ok(())
    }
}

/// One JSON object on disk; every write rewrites the whole file.
#[derive(Clone, Debug)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> anyhow::Result<serde_json::Map<String, Value>> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(serde_json::Map::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("read store: {}", self.path.display()))
            }
        };
        if text.trim().is_empty() {
            return Ok(serde_json::Map::new());
        }
        serde_json::from_str(&text).with_context(|| format!("parse store: {}", self.path.display()))
    }

    fn write_all(&self, map: &serde_json::Map<String, Value>) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create store dir: {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(map).context("serialize store")?;
        std::fs::write(&self.path, json)
            .with_context(|| format!("write store: {}", self.path.display()))?;
        Ok(())
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<Value>> {
        Ok(self.read_all()?.remove(key))
    }

    fn set(&mut self, key: &str, value: Value) -> anyhow::Result<()> {
        let mut map = self.read_all()?;
        map.insert(key.to_string(), value);
        self.write_all(&map)
    }

    fn remove(&mut self, key: &str) -> anyhow::Result<()> {
        let mut map = self.read_all()?;
        if map.remove(key).is_some() {
            self.write_all(&map)?;
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static NEXT: AtomicUsize = AtomicUsize::new(0);

    /// Fresh directory under the system temp dir.
    pub fn temp_dir(tag: &str) -> PathBuf {
        let n = NEXT.fetch_add(1, Ordering::Relaxed);
        let dir = std::env::temp_dir().join(format!(
            "ringsdb-translator-{tag}-{}-{n}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).expect("create temp dir");
        dir
    }
}
