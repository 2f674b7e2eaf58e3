use anyhow::{Context, Result};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// The three persisted selections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SelectionKey {
    Repo,
    FirstBranch,
    SecondBranch,
}

impl SelectionKey {
    pub const ALL: [SelectionKey; 3] = [
        SelectionKey::Repo,
        SelectionKey::FirstBranch,
        SelectionKey::SecondBranch,
    ];

    /// Key name in the backing file
    pub fn as_str(&self) -> &'static str {
        match self {
            SelectionKey::Repo => "selected_repo",
            SelectionKey::FirstBranch => "selected_first",
            SelectionKey::SecondBranch => "selected_second",
        }
    }
}

/// Durable key/value store for the user's last selections.
/// `get` returns `None` for keys that were never written.
pub trait SelectionStore {
    fn get(&self, key: SelectionKey) -> Option<String>;
    fn set(&self, key: SelectionKey, value: &str) -> Result<()>;
}

/// Snapshot of all persisted selections.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionState {
    pub repo: Option<String>,
    pub first_branch: Option<String>,
    pub second_branch: Option<String>,
}

impl SelectionState {
    pub fn load(store: &dyn SelectionStore) -> Self {
        Self {
            repo: store.get(SelectionKey::Repo),
            first_branch: store.get(SelectionKey::FirstBranch),
            second_branch: store.get(SelectionKey::SecondBranch),
        }
    }
}

// ── File-backed store ──

/// Selections stored as a flat TOML table. Every `set` rewrites the file
/// before returning.
pub struct FileSelectionStore {
    path: PathBuf,
    values: RefCell<BTreeMap<String, String>>,
}

impl FileSelectionStore {
    /// Open the store at `~/.local/share/wp/selection.toml` (platform data dir).
    pub fn open_default() -> Result<Self> {
        let dir = dirs::data_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine data directory"))?
            .join("wp");
        Self::open(dir.join("selection.toml"))
    }

    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let values = match std::fs::read_to_string(&path) {
            Ok(content) => parse_selection_file(&path, &content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()))
            }
        };
        Ok(Self {
            path,
            values: RefCell::new(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, values: &BTreeMap<String, String>) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        let content = toml::to_string_pretty(values)?;
        std::fs::write(&self.path, content)
            .with_context(|| format!("Failed to write {}", self.path.display()))?;
        Ok(())
    }
}

/// Keep only the known string keys; anything else in the file is ignored.
fn parse_selection_file(path: &Path, content: &str) -> BTreeMap<String, String> {
    let table = match toml::from_str::<toml::Table>(content) {
        Ok(t) => t,
        Err(e) => {
            log::warn!("Ignoring unreadable selection file {}: {}", path.display(), e);
            return BTreeMap::new();
        }
    };
    SelectionKey::ALL
        .iter()
        .filter_map(|k| {
            let value = table.get(k.as_str())?.as_str()?;
            Some((k.as_str().to_string(), value.to_string()))
        })
        .collect()
}

impl SelectionStore for FileSelectionStore {
    fn get(&self, key: SelectionKey) -> Option<String> {
        self.values.borrow().get(key.as_str()).cloned()
    }

    fn set(&self, key: SelectionKey, value: &str) -> Result<()> {
        let mut values = self.values.borrow_mut();
        values.insert(key.as_str().to_string(), value.to_string());
        self.flush(&values)
    }
}

// ── In-memory store ──

#[derive(Debug, Default)]
pub struct MemorySelectionStore {
    values: RefCell<BTreeMap<SelectionKey, String>>,
}

impl MemorySelectionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SelectionStore for MemorySelectionStore {
    fn get(&self, key: SelectionKey) -> Option<String> {
        self.values.borrow().get(&key).cloned()
    }

    fn set(&self, key: SelectionKey, value: &str) -> Result<()> {
        self.values.borrow_mut().insert(key, value.to_string());
        Ok(())
    }
}
