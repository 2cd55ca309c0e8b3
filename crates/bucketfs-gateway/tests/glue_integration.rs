//! End-to-end tests of the export glue over the in-memory object store.

use bucketfs_gateway::error::{NFS3ERR_EXIST, NFS3ERR_NOENT, NFS3ERR_PERM, NFS3ERR_STALE};
use bucketfs_gateway::{
    Credentials, DigestType, Entryplus3, Export, ExportConfig, FileHandle3, GatewayError, Sattr3,
};
use bucketfs_meta::{
    HandleKey, MemoryObjectStore, NamespaceConfig, RenameMode, StoreContext, StoreError, StoreVerb,
};
use proptest::prelude::*;
use std::sync::Arc;

fn mount_with(store: Arc<MemoryObjectStore>, namespace: NamespaceConfig) -> Export {
    let mut config = ExportConfig::new("/qs", "AKID", "bucket1", "pek3a");
    config.namespace = namespace;
    Export::mount(config, Arc::new(StoreContext::new(store))).unwrap()
}

fn setup() -> (Arc<MemoryObjectStore>, Export) {
    let store = Arc::new(MemoryObjectStore::new());
    store.create_bucket("bucket1");
    let export = mount_with(store.clone(), NamespaceConfig::default());
    (store, export)
}

fn cred() -> Credentials {
    Credentials::new(1000, 1000)
}

async fn bucket(export: &Export) -> FileHandle3 {
    export
        .lookup(&export.root_handle(), "bucket1")
        .await
        .unwrap()
        .0
}

async fn collect(export: &Export, dir: &FileHandle3, cookie: u64) -> (Vec<Entryplus3>, bool) {
    let mut entries = Vec::new();
    let eof = export
        .readdir(dir, cookie, |e| {
            entries.push(e);
            true
        })
        .await
        .unwrap();
    (entries, eof)
}

#[tokio::test]
async fn test_nested_create_from_fresh_mount() {
    let (store, export) = setup();
    let bucket = bucket(&export).await;
    let (dir, dir_attrs) = export
        .mkdir(&bucket, "dir1", &Sattr3::default(), &cred())
        .await
        .unwrap();
    assert!(dir_attrs.is_dir());
    let (file, file_attrs) = export
        .create(&dir, "file1", &Sattr3::with_mode(0o644), &cred())
        .await
        .unwrap();
    assert!(!file_attrs.is_dir());
    assert_eq!(file_attrs.mode, 0o644);
    assert!(store.contains("bucket1", "dir1"));
    assert!(store.contains("bucket1", "dir1/file1"));

    let mut wire = [0u8; 16];
    export
        .handle_to_wire(&file, DigestType::NfsV3, &mut wire)
        .unwrap();
    let dir_key = dir.as_key().unwrap();
    assert_eq!(
        HandleKey::from_wire(&wire).unwrap(),
        HandleKey::derive_child(&dir_key, 2, "bucket1/dir1", "file1")
    );
}

#[tokio::test]
async fn test_lookup_after_remount_matches_created_handle() {
    let (store, export) = setup();
    let bucket = bucket(&export).await;
    let (dir, _) = export
        .mkdir(&bucket, "dir1", &Sattr3::default(), &cred())
        .await
        .unwrap();
    let (file, _) = export
        .create(&dir, "file1", &Sattr3::default(), &cred())
        .await
        .unwrap();

    // Only the root key hashes the instance; everything below it is path-derived.
    let other = mount_with(store, NamespaceConfig::default());
    let bucket2 = other
        .lookup(&other.root_handle(), "bucket1")
        .await
        .unwrap()
        .0;
    let (dir2, _) = other.lookup(&bucket2, "dir1").await.unwrap();
    let (file2, attrs) = other.lookup(&dir2, "file1").await.unwrap();
    assert_eq!(dir2, dir);
    assert_eq!(file2, file);
    assert!(!attrs.is_dir());
    assert_eq!(
        file2.as_key().unwrap(),
        HandleKey::derive_child(&dir2.as_key().unwrap(), 2, "bucket1/dir1", "file1")
    );
}

#[tokio::test]
async fn test_lookup_missing_is_noent() {
    let (_store, export) = setup();
    let bucket = bucket(&export).await;
    let err = export.lookup(&bucket, "nope").await.unwrap_err();
    assert_eq!(err.nfs3_status(), NFS3ERR_NOENT);
    assert_eq!(export.stats().op(bucketfs_gateway::stats::Op::Lookup).errors(), 1);
}

#[tokio::test]
async fn test_create_collision_is_exist_without_put() {
    let (store, export) = setup();
    store.insert_object("bucket1", "taken", 3);
    let bucket = bucket(&export).await;
    let puts = store.stats().puts;
    let err = export
        .create(&bucket, "taken", &Sattr3::default(), &cred())
        .await
        .unwrap_err();
    assert_eq!(err.nfs3_status(), NFS3ERR_EXIST);
    assert_eq!(store.stats().puts, puts);
}

#[tokio::test]
async fn test_backend_failure_is_io() {
    let (store, export) = setup();
    let bucket = bucket(&export).await;
    store.fail_next(StoreVerb::Put, StoreError::Transport("reset".to_string()));
    let err = export
        .create(&bucket, "f", &Sattr3::default(), &cred())
        .await
        .unwrap_err();
    assert_eq!(err, GatewayError::Nfs3Io);
}

#[tokio::test]
async fn test_readdir_plus_pages_with_cookies() {
    let store = Arc::new(MemoryObjectStore::new());
    for i in 0..5 {
        store.insert_object("bucket1", &format!("f{i}"), 100 + i as u64);
    }
    store.insert_object("bucket1", "sub/inner", 1);
    let export = mount_with(
        store,
        NamespaceConfig {
            list_page_size: 4,
            ..Default::default()
        },
    );
    let b = export.lookup(&export.root_handle(), "bucket1").await.unwrap().0;

    let (first, eof) = collect(&export, &b, 0).await;
    assert!(!eof);
    let names: Vec<_> = first.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["f0", "f1", "f2", "f3"]);
    assert_eq!(first[3].cookie, 4);
    assert_eq!(first[2].name_attributes.size, 102);
    assert_eq!(first[0].fileid, first[0].name_attributes.fileid);

    let (rest, eof) = collect(&export, &b, 4).await;
    assert!(eof);
    let names: Vec<_> = rest.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["f4", "sub"]);
    assert!(rest[1].name_attributes.is_dir());
    assert_eq!(rest[1].cookie, 6);

    let (again, _) = collect(&export, &b, 0).await;
    assert_eq!(again[0].name_handle, first[0].name_handle);
}

#[tokio::test]
async fn test_readdir_plus_refused_entry_is_not_consumed() {
    let store = Arc::new(MemoryObjectStore::new());
    for i in 0..3 {
        store.insert_object("bucket1", &format!("f{i}"), 1);
    }
    let export = mount_with(store, NamespaceConfig::default());
    let b = export.lookup(&export.root_handle(), "bucket1").await.unwrap().0;

    let mut seen = Vec::new();
    let eof = export
        .readdir(&b, 0, |e| {
            if seen.len() == 1 {
                return false;
            }
            seen.push(e.cookie);
            true
        })
        .await
        .unwrap();
    assert!(!eof);
    assert_eq!(seen, vec![1]);

    let (rest, eof) = collect(&export, &b, 1).await;
    assert!(eof);
    assert_eq!(rest[0].name, "f1");
    assert_eq!(rest[0].cookie, 2);
}

#[tokio::test]
async fn test_readdir_bad_cookie_is_inval() {
    let (_store, export) = setup();
    let bucket = bucket(&export).await;
    let err = export.readdir(&bucket, 99, |_| true).await.unwrap_err();
    assert_eq!(err, GatewayError::Nfs3Inval);
}

#[tokio::test]
async fn test_rename_directory_is_perm() {
    let (_store, export) = setup();
    let bucket = bucket(&export).await;
    export
        .mkdir(&bucket, "d", &Sattr3::default(), &cred())
        .await
        .unwrap();
    let err = export.rename(&bucket, "d", &bucket, "e").await.unwrap_err();
    assert_eq!(err.nfs3_status(), NFS3ERR_PERM);
}

#[tokio::test]
async fn test_rename_open_file_is_perm() {
    let (_store, export) = setup();
    let bucket = bucket(&export).await;
    let (file, _) = export
        .create(&bucket, "f", &Sattr3::default(), &cred())
        .await
        .unwrap();
    export.open2(&file).unwrap();
    assert!(export.status2(&file).unwrap());
    let err = export.rename(&bucket, "f", &bucket, "g").await.unwrap_err();
    assert_eq!(err.nfs3_status(), NFS3ERR_PERM);
    export.close(&file).unwrap();
    assert!(!export.status2(&file).unwrap());
}

#[tokio::test]
async fn test_rename_moves_object() {
    let (store, export) = setup();
    let bucket = bucket(&export).await;
    let (file, _) = export
        .create(&bucket, "old", &Sattr3::default(), &cred())
        .await
        .unwrap();
    export.release(&file).unwrap();
    export
        .rename(&bucket, "old", &bucket, "new")
        .await
        .unwrap();
    assert!(store.contains("bucket1", "new"));
    assert!(!store.contains("bucket1", "old"));
    let (moved, _) = export.lookup(&bucket, "new").await.unwrap();
    assert_eq!(
        moved.as_key().unwrap(),
        HandleKey::derive_child(&bucket.as_key().unwrap(), 1, "bucket1", "new")
    );
    assert_eq!(
        export.lookup(&bucket, "old").await.unwrap_err(),
        GatewayError::Nfs3NoEnt
    );
}

#[tokio::test]
async fn test_rename_copy_only_keeps_source() {
    let store = Arc::new(MemoryObjectStore::new());
    store.create_bucket("bucket1");
    let export = mount_with(
        store.clone(),
        NamespaceConfig {
            rename_mode: RenameMode::CopyOnly,
            ..Default::default()
        },
    );
    let b = bucket(&export).await;
    export
        .create(&b, "a", &Sattr3::default(), &cred())
        .await
        .unwrap();
    export.rename(&b, "a", &b, "b").await.unwrap();
    assert!(store.contains("bucket1", "a"));
    assert!(store.contains("bucket1", "b"));
    assert_eq!(store.stats().deletes, 0);
}

#[tokio::test]
async fn test_unlink_and_stale_handle() {
    let (store, export) = setup();
    let bucket = bucket(&export).await;
    let (file, _) = export
        .create(&bucket, "gone", &Sattr3::default(), &cred())
        .await
        .unwrap();
    export.unlink(&bucket, "gone").await.unwrap();
    assert!(!store.contains("bucket1", "gone"));
    let err = export.getattrs(&file).unwrap_err();
    assert_eq!(err.nfs3_status(), NFS3ERR_STALE);
}

#[tokio::test]
async fn test_unlink_non_empty_directory() {
    let (_store, export) = setup();
    let bucket = bucket(&export).await;
    let (dir, _) = export
        .mkdir(&bucket, "d", &Sattr3::default(), &cred())
        .await
        .unwrap();
    export
        .create(&dir, "f", &Sattr3::default(), &cred())
        .await
        .unwrap();
    assert_eq!(
        export.unlink(&bucket, "d").await.unwrap_err(),
        GatewayError::Nfs3NotEmpty
    );
}

#[tokio::test]
async fn test_create_handle_round_trip() {
    let (_store, export) = setup();
    let bucket = bucket(&export).await;
    let (file, attrs) = export
        .create(&bucket, "f", &Sattr3::default(), &cred())
        .await
        .unwrap();
    let mut wire = [0u8; 16];
    let len = export
        .handle_to_wire(&file, DigestType::NfsV4, &mut wire)
        .unwrap();
    let (again, attrs2) = export.create_handle(&wire[..len]).unwrap();
    assert_eq!(again, file);
    assert_eq!(attrs2.fileid, attrs.fileid);
    export.release(&again).unwrap();
    export.release(&file).unwrap();
}

#[tokio::test]
async fn test_name_too_long() {
    let (_store, export) = setup();
    let bucket = bucket(&export).await;
    let name = "x".repeat(1100);
    assert_eq!(
        export
            .create(&bucket, &name, &Sattr3::default(), &cred())
            .await
            .unwrap_err(),
        GatewayError::Nfs3NameTooLong
    );
}

#[tokio::test]
async fn test_export_root_shows_only_its_bucket() {
    let (store, export) = setup();
    store.create_bucket("bucket2");
    let root = export.root_handle();

    let (listing, eof) = collect(&export, &root, 0).await;
    assert!(eof);
    let names: Vec<_> = listing.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["bucket1"]);

    assert_eq!(
        export.lookup(&root, "bucket2").await.unwrap_err().nfs3_status(),
        NFS3ERR_NOENT
    );
    let err = export
        .mkdir(&root, "bucket3", &Sattr3::default(), &cred())
        .await
        .unwrap_err();
    assert_eq!(err.nfs3_status(), NFS3ERR_PERM);
    let err = export
        .create(&root, "file", &Sattr3::default(), &cred())
        .await
        .unwrap_err();
    assert_eq!(err.nfs3_status(), NFS3ERR_PERM);
}

#[tokio::test]
async fn test_exports_on_different_buckets_are_isolated() {
    let store = Arc::new(MemoryObjectStore::new());
    store.insert_object("bucket1", "mine", 1);
    store.insert_object("bucket2", "theirs", 1);
    let ctx = Arc::new(StoreContext::new(store));
    let other = Export::mount(ExportConfig::new("/other", "AKID", "bucket2", "pek3a"), ctx).unwrap();

    let root = other.root_handle();
    assert!(other.lookup(&root, "bucket1").await.is_err());
    let (bucket, _) = other.lookup(&root, "bucket2").await.unwrap();
    let (listing, _) = collect(&other, &bucket, 0).await;
    let names: Vec<_> = listing.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["theirs"]);
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #[test]
    fn test_wire_handle_matches_derived_key(
        names in proptest::collection::vec("[a-z0-9]{1,12}", 1..4),
    ) {
        let rt = runtime();
        rt.block_on(async {
            let (_store, export) = setup();
            let mut dir = bucket(&export).await;
            let mut path = "bucket1".to_string();
            let mut depth = 1;
            for name in &names {
                let (child, _) = export
                    .mkdir(&dir, name, &Sattr3::default(), &cred())
                    .await
                    .unwrap();
                let mut wire = [0u8; 16];
                export.handle_to_wire(&child, DigestType::NfsV3, &mut wire).unwrap();
                let expected = HandleKey::derive_child(&dir.as_key().unwrap(), depth, &path, name);
                assert_eq!(HandleKey::from_wire(&wire).unwrap(), expected);
                path = format!("{path}/{name}");
                depth += 1;
                dir = child;
            }
        });
    }
}
