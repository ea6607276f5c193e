use quartz_storage::PageStore;
use tempfile::TempDir;

async fn create_test_store() -> (PageStore, TempDir) {
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let store = PageStore::open(temp_dir.path())
        .await
        .expect("failed to open page store");
    (store, temp_dir)
}

#[tokio::test]
async fn test_extend_then_read() {
    let (store, _temp) = create_test_store().await;

    let mut guard = store.extend().await.expect("extend failed");
    guard.add_item(b"test_value").expect("add_item failed");
    store.mark_dirty(&mut guard).expect("mark_dirty failed");
    drop(guard);

    let page = store.read_shared(0).await.expect("read_shared failed");
    assert_eq!(page.first_item(), Some(&b"test_value"[..]));
}

#[tokio::test]
async fn test_read_out_of_range_page() {
    let (store, _temp) = create_test_store().await;
    assert!(store.read_shared(0).await.is_err());
    assert!(store.read_shared(999).await.is_err());
}

#[tokio::test]
async fn test_overwrite_requires_clear() {
    let (store, _temp) = create_test_store().await;

    let mut guard = store.extend().await.unwrap();
    guard.add_item(b"original").unwrap();
    store.mark_dirty(&mut guard).unwrap();

    // A page with a live item refuses a second add_item...
    assert!(guard.add_item(b"replacement").is_err());

    // ...until cleared, after which it behaves like a fresh page.
    guard.clear();
    guard.add_item(b"replacement").unwrap();
    store.mark_dirty(&mut guard).unwrap();
    drop(guard);

    let page = store.read_exclusive(0).await.unwrap();
    assert_eq!(page.first_item(), Some(&b"replacement"[..]));
}

#[tokio::test]
async fn test_wal_file_created_on_write() {
    let (store, temp) = create_test_store().await;

    let mut guard = store.extend().await.unwrap();
    guard.add_item(b"wal_value").unwrap();
    store.mark_dirty(&mut guard).unwrap();

    let wal_path = temp.path().join("hnsw.wal");
    assert!(wal_path.exists(), "WAL file should exist after a dirty write");
}

#[tokio::test]
async fn test_checkpoint_truncates_wal() {
    let (store, temp) = create_test_store().await;

    let mut guard = store.extend().await.unwrap();
    guard.add_item(b"checkpointed_value").unwrap();
    store.mark_dirty(&mut guard).unwrap();
    drop(guard);

    store.checkpoint().await.unwrap();

    let wal_path = temp.path().join("hnsw.wal");
    let wal_len = std::fs::metadata(&wal_path).unwrap().len();
    assert_eq!(wal_len, 0, "checkpoint should truncate the WAL");
}

#[tokio::test]
async fn test_large_batch_of_pages() {
    let (store, _temp) = create_test_store().await;

    let batch_size = 200;
    for i in 0..batch_size {
        let mut guard = store.extend().await.unwrap();
        let value = format!("batch_value_{i}");
        guard.add_item(value.as_bytes()).unwrap();
        store.mark_dirty(&mut guard).unwrap();
    }

    assert_eq!(store.relation_size(), batch_size);
    for i in 0..batch_size {
        let expected = format!("batch_value_{i}");
        let page = store.read_shared(i).await.unwrap();
        assert_eq!(page.first_item(), Some(expected.as_bytes()));
    }
}

#[tokio::test]
async fn test_binary_payload() {
    let (store, _temp) = create_test_store().await;

    let payload = vec![0x00, 0xFF, 0xFE, 0x01, 0x02, 0x03];
    let mut guard = store.extend().await.unwrap();
    guard.add_item(&payload).unwrap();
    store.mark_dirty(&mut guard).unwrap();
    drop(guard);

    let page = store.read_shared(0).await.unwrap();
    assert_eq!(page.first_item(), Some(payload.as_slice()));
}

#[tokio::test]
async fn test_empty_payload() {
    let (store, _temp) = create_test_store().await;

    let mut guard = store.extend().await.unwrap();
    guard.add_item(b"").unwrap();
    store.mark_dirty(&mut guard).unwrap();
    drop(guard);

    let page = store.read_shared(0).await.unwrap();
    assert_eq!(page.first_item(), Some(&b""[..]));
}

#[tokio::test]
async fn test_concurrent_extends() {
    let (store, _temp) = create_test_store().await;
    let store = std::sync::Arc::new(store);

    let mut handles = vec![];
    for i in 0..10 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            let mut guard = store.extend().await.unwrap();
            let value = format!("concurrent_{i}");
            guard.add_item(value.as_bytes()).unwrap();
            store.mark_dirty(&mut guard).unwrap();
            guard.page_number()
        }));
    }

    let mut page_numbers: Vec<u32> = Vec::new();
    for handle in handles {
        page_numbers.push(handle.await.expect("task panicked"));
    }
    page_numbers.sort_unstable();
    assert_eq!(page_numbers, (0..10).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_reopen_after_checkpoint_preserves_relation_size() {
    let temp_dir = TempDir::new().unwrap();
    {
        let store = PageStore::open(temp_dir.path()).await.unwrap();
        for i in 0..5 {
            let mut guard = store.extend().await.unwrap();
            guard.add_item(format!("v{i}").as_bytes()).unwrap();
            store.mark_dirty(&mut guard).unwrap();
        }
        store.checkpoint().await.unwrap();
    }

    let store = PageStore::open(temp_dir.path()).await.unwrap();
    assert_eq!(store.relation_size(), 5);
    for i in 0..5 {
        let page = store.read_shared(i).await.unwrap();
        assert_eq!(page.first_item(), Some(format!("v{i}").as_bytes()));
    }
}
