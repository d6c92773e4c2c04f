//! JSON file persistence for observed trees.
//!
//! A [`JsonFileStore`] binds one root node of a [`DataContext`] to a `.json`
//! file:
//!
//! - [`open`](JsonFileStore::open) / [`attach`](JsonFileStore::attach) load
//!   an existing file into the node (comments included) and start from a
//!   clean ledger;
//! - [`persist`](JsonFileStore::persist) writes a pretty snapshot whenever
//!   the tree changed and reports the change set that triggered it;
//! - [`reload`](JsonFileStore::reload) and [`poll`](JsonFileStore::poll)
//!   merge the file back into the tree when it was edited externally.
//!
//! The store never owns the context. The host drives it: run the context's
//! pending `-change` deliveries, then call `persist`.

use std::cell::Cell;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::rc::{Rc, Weak};
use std::time::SystemTime;

use data_context::{
    parse_document_into, stringify, Channel, ContextError, DataContext, DecodeError, EncodeError,
    Liveness, NodeId, NodeKind, Slot, StringifyOptions,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store path must end with .json: {}", .0.display())]
    InvalidExtension(PathBuf),
    #[error("store I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("context error: {0}")]
    Context(#[from] ContextError),
    #[error("encode error: {0}")]
    Encode(#[from] EncodeError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: PathBuf,
    /// On reload, drop record keys and sequence elements the file no longer
    /// has.
    pub remove_unused_keys: bool,
    /// When false, every file operation is a no-op.
    pub enable_file_read_write: bool,
    /// Spaces per level of the written snapshot, clamped to `1..=10`.
    pub indent: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::new(),
            remove_unused_keys: true,
            enable_file_read_write: true,
            indent: 2,
        }
    }
}

impl StoreConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }
}

/// Outcome of a write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Persisted {
    /// Flushed change set, in diff form.
    pub changes: String,
    /// Full text written to the file.
    pub json: String,
}

#[derive(Debug)]
pub struct JsonFileStore {
    config: StoreConfig,
    root: NodeId,
    /// Set by the `-change` listener; cleared by `persist`.
    pending: Rc<Cell<bool>>,
    written: bool,
    last_seen: Option<SystemTime>,
}

impl JsonFileStore {
    /// Opens the store on a fresh empty record.
    pub fn open(ctx: &mut DataContext, config: StoreConfig) -> Result<Self, StoreError> {
        let root = ctx.create(NodeKind::Record);
        Self::attach(ctx, config, root)
    }

    /// Opens the store on an existing node. If the file exists it is merged
    /// into `root`; otherwise the first [`persist`](Self::persist) creates it
    /// from the node's current contents.
    pub fn attach(
        ctx: &mut DataContext,
        config: StoreConfig,
        root: NodeId,
    ) -> Result<Self, StoreError> {
        if config.path.extension().and_then(|ext| ext.to_str()) != Some("json") {
            return Err(StoreError::InvalidExtension(config.path));
        }
        ctx.kind(root)?;

        let mut store = Self {
            config,
            root,
            pending: Rc::new(Cell::new(false)),
            written: false,
            last_seen: None,
        };
        if store.config.enable_file_read_write {
            if let Some(dir) = store.config.path.parent() {
                if !dir.as_os_str().is_empty() {
                    fs::create_dir_all(dir)?;
                }
            }
            if store.config.path.exists() {
                let text = fs::read_to_string(&store.config.path)?;
                store.load(ctx, &text)?;
                store.written = true;
                store.last_seen = modified_time(&store.config.path);
                debug!(path = %store.config.path.display(), bytes = text.len(), "loaded store");
            }
        }
        store.listen(ctx)?;
        Ok(store)
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Whether a `-change` delivery arrived since the last write.
    pub fn has_pending_write(&self) -> bool {
        self.pending.get()
    }

    fn load(&mut self, ctx: &mut DataContext, text: &str) -> Result<(), StoreError> {
        if !text.trim().is_empty() {
            self.root = merge_file(ctx, text, self.root, false)?;
        }
        ctx.reset_changes(self.root)?;
        Ok(())
    }

    /// The listener dies with the store.
    fn listen(&self, ctx: &mut DataContext) -> Result<(), StoreError> {
        let flag: Weak<Cell<bool>> = Rc::downgrade(&self.pending);
        ctx.on(
            self.root,
            Channel::Change,
            move |_, _| {
                if let Some(flag) = flag.upgrade() {
                    flag.set(true);
                }
                true
            },
            Liveness::tied_to(&self.pending),
        )?;
        Ok(())
    }

    /// Writes the tree if it changed since the last write, or if the file
    /// was never written. Returns `None` when nothing was written.
    pub fn persist(&mut self, ctx: &mut DataContext) -> Result<Option<Persisted>, StoreError> {
        if !self.config.enable_file_read_write {
            return Ok(None);
        }
        self.pending.set(false);
        if self.written && !ctx.is_changed(self.root)? {
            return Ok(None);
        }

        let root = Slot::Node(self.root);
        let changes = stringify(ctx, &root, &StringifyOptions::changes())?;
        let json = stringify(ctx, &root, &StringifyOptions::pretty(self.config.indent))?;
        fs::write(&self.config.path, &json)?;
        self.written = true;
        self.last_seen = modified_time(&self.config.path);
        debug!(
            path = %self.config.path.display(),
            bytes = json.len(),
            "persisted store"
        );
        Ok(Some(Persisted { changes, json }))
    }

    /// Reads the file and merges it into the tree. Returns the change set
    /// the merge produced, already flushed from the ledger, or `None` when
    /// the file is missing.
    ///
    /// Comments come from the file too. Unsaved local changes are forgotten
    /// by the ledger first, so the next [`persist`](Self::persist) does not
    /// write the file back.
    pub fn reload(&mut self, ctx: &mut DataContext) -> Result<Option<String>, StoreError> {
        if !self.config.enable_file_read_write {
            return Ok(None);
        }
        let text = match fs::read_to_string(&self.config.path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        self.last_seen = modified_time(&self.config.path);

        let text = if text.trim().is_empty() { "{}" } else { text.as_str() };
        ctx.reset_changes(self.root)?;
        let root = merge_file(ctx, text, self.root, self.config.remove_unused_keys)?;
        if root != self.root {
            self.root = root;
            self.listen(ctx)?;
        }
        let changes = stringify(ctx, &Slot::Node(self.root), &StringifyOptions::changes())?;
        debug!(
            path = %self.config.path.display(),
            changed = !changes.is_empty(),
            "reloaded store"
        );
        Ok(Some(changes))
    }

    /// Reloads when the file's modification time moved since the last read
    /// or write.
    pub fn poll(&mut self, ctx: &mut DataContext) -> Result<Option<String>, StoreError> {
        if !self.config.enable_file_read_write {
            return Ok(None);
        }
        let Some(modified) = modified_time(&self.config.path) else {
            return Ok(None);
        };
        if self.last_seen == Some(modified) {
            return Ok(None);
        }
        self.reload(ctx)
    }
}

/// Comments in the file win over the ones in the tree.
fn merge_file(
    ctx: &mut DataContext,
    text: &str,
    root: NodeId,
    remove_unused_keys: bool,
) -> Result<NodeId, StoreError> {
    match parse_document_into(ctx, text, root, remove_unused_keys)? {
        Slot::Node(id) => Ok(id),
        Slot::Scalar(_) => Err(ContextError::NotContainer.into()),
    }
}

fn modified_time(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|meta| meta.modified()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tracing_test::traced_test;

    fn store_in(dir: &tempfile::TempDir, name: &str) -> StoreConfig {
        StoreConfig::new(dir.path().join(name))
    }

    #[test]
    fn rejects_paths_without_json_extension() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = DataContext::new();
        for name in ["data.txt", "data", "data.json.bak"] {
            let err = JsonFileStore::open(&mut ctx, store_in(&dir, name)).unwrap_err();
            assert!(matches!(err, StoreError::InvalidExtension(_)), "name {name}");
        }
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let config: StoreConfig = serde_json::from_str(r#"{"path":"a/b.json"}"#).unwrap();
        assert_eq!(config.path, PathBuf::from("a/b.json"));
        assert!(config.remove_unused_keys);
        assert!(config.enable_file_read_write);
        assert_eq!(config.indent, 2);
    }

    #[test]
    #[traced_test]
    fn first_persist_creates_file_and_directories() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = DataContext::new();
        let root = ctx.wrap_node(json!({"a": 1})).unwrap();
        let config = store_in(&dir, "nested/deeper/state.json");
        let mut store = JsonFileStore::attach(&mut ctx, config, root).unwrap();
        assert!(dir.path().join("nested/deeper").is_dir());
        assert!(!store.path().exists());

        let persisted = store.persist(&mut ctx).unwrap().unwrap();
        assert_eq!(persisted.json, "{\n  \"a\": 1\n}");
        assert_eq!(persisted.changes, "");
        assert_eq!(fs::read_to_string(store.path()).unwrap(), persisted.json);
        assert!(logs_contain("persisted store"));

        // Nothing changed since.
        assert_eq!(store.persist(&mut ctx).unwrap(), None);
    }

    #[test]
    fn change_listener_flags_pending_writes() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = DataContext::new();
        let mut store = JsonFileStore::open(&mut ctx, store_in(&dir, "s.json")).unwrap();
        store.persist(&mut ctx).unwrap();

        ctx.write(store.root(), "k", "v").unwrap();
        assert!(!store.has_pending_write());
        ctx.run_pending();
        assert!(store.has_pending_write());

        let persisted = store.persist(&mut ctx).unwrap().unwrap();
        assert_eq!(persisted.changes, "{\"k\":\"v\"}");
        assert!(!store.has_pending_write());
    }

    #[test]
    fn dropping_the_store_unsubscribes() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = DataContext::new();
        let store = JsonFileStore::open(&mut ctx, store_in(&dir, "s.json")).unwrap();
        let root = store.root();
        assert_eq!(ctx.listener_count(root, Channel::Change), 1);
        drop(store);

        ctx.write(root, "k", 1i64).unwrap();
        ctx.run_pending();
        assert_eq!(ctx.listener_count(root, Channel::Change), 0);
    }

    #[test]
    fn disabled_io_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = DataContext::new();
        let config = StoreConfig {
            enable_file_read_write: false,
            ..store_in(&dir, "sub/off.json")
        };
        let mut store = JsonFileStore::open(&mut ctx, config).unwrap();
        ctx.write(store.root(), "k", 1i64).unwrap();

        assert_eq!(store.persist(&mut ctx).unwrap(), None);
        assert_eq!(store.reload(&mut ctx).unwrap(), None);
        assert_eq!(store.poll(&mut ctx).unwrap(), None);
        assert!(!dir.path().join("sub").exists());
    }
}
