//! Example: driving the page store directly.
//!
//! This demonstrates the primitives the HNSW graph engine builds on: paging
//! in new nodes with `extend`, reading them back under a shared lock,
//! in-place updates under an exclusive lock, and crash safety via the
//! write-ahead log and `checkpoint`.

use quartz_storage::PageStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("QuartzDB page store example\n");

    println!("Opening page store at ./data/example_pages...");
    let store = PageStore::open("./data/example_pages").await?;

    println!("Appending pages...");
    let mut guard = store.extend().await?;
    guard.add_item(b"node:alice")?;
    store.mark_dirty(&mut guard)?;
    drop(guard);

    let mut guard = store.extend().await?;
    guard.add_item(b"node:bob")?;
    store.mark_dirty(&mut guard)?;
    drop(guard);

    println!("Reading pages back...");
    let page0 = store.read_shared(0).await?;
    if let Some(item) = page0.first_item() {
        println!("   page 0 = {}", String::from_utf8_lossy(item));
    }
    drop(page0);

    println!("Updating page 0 in place...");
    let mut guard = store.read_exclusive(0).await?;
    guard.clear();
    guard.add_item(b"node:alice-updated")?;
    store.mark_dirty(&mut guard)?;
    drop(guard);

    let page0 = store.read_shared(0).await?;
    println!(
        "   page 0 = {} (updated)",
        String::from_utf8_lossy(page0.first_item().unwrap())
    );
    drop(page0);

    println!("\nRelation size: {} pages", store.relation_size());

    println!("\nCheckpointing (applies dirty frames, truncates the WAL)...");
    store.checkpoint().await?;
    println!("   done");

    println!("\nConcurrent appends from several tasks...");
    let store = std::sync::Arc::new(store);
    let mut handles = vec![];
    for i in 0..5 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            let value = format!("concurrent_node_{i}");
            let mut guard = store.extend().await.unwrap();
            guard.add_item(value.as_bytes()).unwrap();
            store.mark_dirty(&mut guard).unwrap();
            println!("   task {i} wrote page {}", guard.page_number());
        }));
    }
    for handle in handles {
        handle.await?;
    }

    println!("\nFinal relation size: {} pages", store.relation_size());
    println!("Done.");

    Ok(())
}
