use std::fs;
use std::time::{Duration, SystemTime};

use data_context::{DataContext, DecodeError, NodeKind};
use data_context_store::{JsonFileStore, StoreConfig, StoreError};
use serde_json::{json, Value};

fn touch_later(path: &std::path::Path) {
    let file = fs::File::options().write(true).open(path).unwrap();
    file.set_modified(SystemTime::now() + Duration::from_secs(5))
        .unwrap();
}

#[test]
fn comments_survive_load_edit_persist() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("settings.json");
    fs::write(
        &path,
        "/* config */\n{\n  /* port */\n  \"port\": 80,\n  \"hosts\": [\n    \"a\"\n  ]\n}",
    )
    .unwrap();

    let mut ctx = DataContext::new();
    let mut store = JsonFileStore::open(&mut ctx, StoreConfig::new(&path)).unwrap();
    let root = store.root();
    assert_eq!(
        ctx.node_value(root).unwrap(),
        json!({"port": 80, "hosts": ["a"]})
    );
    assert!(!ctx.is_changed(root).unwrap());
    assert_eq!(store.persist(&mut ctx).unwrap(), None);

    ctx.write(root, "port", 81i64).unwrap();
    let persisted = store.persist(&mut ctx).unwrap().unwrap();
    assert_eq!(persisted.changes, "{\"port\":81}");
    assert_eq!(
        persisted.json,
        "/* config */\n{\n  /* port */\n  \"port\": 81,\n  \"hosts\": [\n    \"a\"\n  ]\n}"
    );
    assert_eq!(fs::read_to_string(&path).unwrap(), persisted.json);
}

#[test]
fn reload_matrix() {
    struct Case {
        name: &'static str,
        initial: Value,
        file: &'static str,
        remove_unused_keys: bool,
        after: Value,
        changes: &'static str,
    }
    let cases = vec![
        Case {
            name: "changed_scalar",
            initial: json!({"a": 1, "b": 2}),
            file: "{\"a\": 1, \"b\": 3}",
            remove_unused_keys: true,
            after: json!({"a": 1, "b": 3}),
            changes: "{\"b\":3}",
        },
        Case {
            name: "identical",
            initial: json!({"a": 1, "b": [true]}),
            file: "{\"a\": 1, \"b\": [true]}",
            remove_unused_keys: true,
            after: json!({"a": 1, "b": [true]}),
            changes: "",
        },
        Case {
            name: "removed_key",
            initial: json!({"a": 1, "b": 2}),
            file: "{\"a\": 1}",
            remove_unused_keys: true,
            after: json!({"a": 1}),
            changes: "{\r\r\"a\":1}",
        },
        Case {
            name: "removed_key_kept",
            initial: json!({"a": 1, "b": 2}),
            file: "{\"a\": 1}",
            remove_unused_keys: false,
            after: json!({"a": 1, "b": 2}),
            changes: "",
        },
        Case {
            name: "shorter_sequence",
            initial: json!({"l": [1, 2, 3]}),
            file: "{\"l\": [1, 2]}",
            remove_unused_keys: true,
            after: json!({"l": [1, 2]}),
            changes: "{\"l\":[\r\r0:1,1:2]}",
        },
        Case {
            name: "empty_file",
            initial: json!({"a": 1}),
            file: "",
            remove_unused_keys: true,
            after: json!({}),
            changes: "{\r\r}",
        },
    ];

    for case in cases {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let mut ctx = DataContext::new();
        let root = ctx.wrap_node(case.initial).unwrap();
        let config = StoreConfig {
            remove_unused_keys: case.remove_unused_keys,
            ..StoreConfig::new(&path)
        };
        let mut store = JsonFileStore::attach(&mut ctx, config, root).unwrap();

        fs::write(&path, case.file).unwrap();
        let changes = store.reload(&mut ctx).unwrap();
        assert_eq!(changes.as_deref(), Some(case.changes), "case {}", case.name);
        assert_eq!(ctx.node_value(store.root()).unwrap(), case.after, "case {}", case.name);
        assert!(!ctx.is_changed(store.root()).unwrap(), "case {}", case.name);
        assert!(store.persist(&mut ctx).unwrap().is_some(), "case {}", case.name);
    }
}

#[test]
fn reload_takes_comments_from_the_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("notes.json");
    fs::write(
        &path,
        "/*top*/{/*old*/\"a\": 1, \"b\": 2, \"list\": [1, 2], /*obj*/\"obj\": {}}",
    )
    .unwrap();
    let mut ctx = DataContext::new();
    let mut store = JsonFileStore::open(&mut ctx, StoreConfig::new(&path)).unwrap();
    let root = store.root();
    let obj = ctx.child(root, "obj").unwrap();
    assert_eq!(ctx.key_metadata(root, "a").unwrap(), &["old".to_string()]);

    fs::write(
        &path,
        "{/*new*/\"a\": 1, /*bc*/\"b\": 2, \"list\": [1, 2], \"obj\": {}}",
    )
    .unwrap();
    assert_eq!(store.reload(&mut ctx).unwrap().as_deref(), Some(""));
    assert_eq!(store.root(), root);
    assert_eq!(ctx.child(root, "obj"), Some(obj));
    assert_eq!(ctx.key_metadata(root, "a").unwrap(), &["new".to_string()]);
    assert_eq!(ctx.key_metadata(root, "b").unwrap(), &["bc".to_string()]);
    assert!(ctx.metadata(root).unwrap().is_empty());
    assert!(ctx.metadata(obj).unwrap().is_empty());

    // The next write keeps the edited comments.
    ctx.write(root, "b", 3i64).unwrap();
    let persisted = store.persist(&mut ctx).unwrap().unwrap();
    assert!(persisted.json.contains("/*new*/"), "{}", persisted.json);
    assert!(persisted.json.contains("/*bc*/"), "{}", persisted.json);
    assert!(!persisted.json.contains("old"), "{}", persisted.json);
}

#[test]
fn reload_replaces_a_root_of_another_shape() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("list.json");
    let mut ctx = DataContext::new();
    let mut store = JsonFileStore::open(&mut ctx, StoreConfig::new(&path)).unwrap();
    let before = store.root();

    fs::write(&path, "[1, 2]").unwrap();
    let changes = store.reload(&mut ctx).unwrap().unwrap();
    assert_ne!(store.root(), before);
    assert_eq!(ctx.kind(store.root()).unwrap(), NodeKind::Sequence);
    assert_eq!(changes, "[\r\r0:1,1:2]");

    ctx.push(store.root(), 3i64).unwrap();
    ctx.run_pending();
    assert!(store.has_pending_write());
}

#[test]
fn poll_reloads_only_after_external_edits() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("watched.json");
    let mut ctx = DataContext::new();
    let mut store = JsonFileStore::open(&mut ctx, StoreConfig::new(&path)).unwrap();
    ctx.write(store.root(), "n", 1i64).unwrap();
    store.persist(&mut ctx).unwrap();
    assert_eq!(store.poll(&mut ctx).unwrap(), None);

    fs::write(&path, "{\"n\": 2}").unwrap();
    touch_later(&path);
    assert_eq!(store.poll(&mut ctx).unwrap().as_deref(), Some("{\"n\":2}"));
    assert_eq!(ctx.node_value(store.root()).unwrap(), json!({"n": 2}));
    assert_eq!(store.poll(&mut ctx).unwrap(), None);
}

#[test]
fn broken_files_surface_errors() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.json");
    fs::write(&path, "{\"a\": }").unwrap();
    let mut ctx = DataContext::new();
    let err = JsonFileStore::open(&mut ctx, StoreConfig::new(&path)).unwrap_err();
    assert!(matches!(err, StoreError::Decode(_)), "{err}");

    let other = dir.path().join("fine.json");
    let mut store = JsonFileStore::open(&mut ctx, StoreConfig::new(&other)).unwrap();
    fs::write(&other, "[1,,]").unwrap();
    assert!(matches!(
        store.reload(&mut ctx),
        Err(StoreError::Decode(DecodeError::Syntax(_)))
    ));
    fs::write(&other, "7").unwrap();
    assert!(matches!(store.reload(&mut ctx), Err(StoreError::Context(_))));
}
