// Many threads and tasks sharing one factory

use crate::integration::common::{create_factory, ORIGINAL_DATA, PARTITION_ID};
use futures::future::join_all;
use rowcrypt::metastore::InMemoryMetastore;
use rowcrypt::BasicExpiringCryptoPolicy;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const NUM_THREADS: usize = 8;
const OPERATIONS_PER_THREAD: usize = 25;

/// Day-granular key timestamps, so every racer creates the same key version
fn coarse_policy() -> BasicExpiringCryptoPolicy {
    BasicExpiringCryptoPolicy::default().with_create_date_precision(Duration::from_secs(86_400))
}

#[test]
fn test_concurrent_encrypt_decrypt_with_same_session() {
    let metastore = Arc::new(InMemoryMetastore::new());
    let factory = create_factory(Arc::clone(&metastore), coarse_policy());
    let session = Arc::new(factory.session(PARTITION_ID).unwrap());

    let handles: Vec<_> = (0..NUM_THREADS)
        .map(|i| {
            let session = Arc::clone(&session);
            thread::spawn(move || {
                for j in 0..OPERATIONS_PER_THREAD {
                    let data = format!("{}_{}_data_{}", ORIGINAL_DATA, i, j);
                    let drr = session.encrypt(data.as_bytes()).unwrap();
                    assert_eq!(session.decrypt(&drr).unwrap(), data.as_bytes());
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(metastore.len(), 2);
}

#[test]
fn test_concurrent_first_use_creates_one_key_per_level() {
    let metastore = Arc::new(InMemoryMetastore::new());
    let factory = Arc::new(create_factory(Arc::clone(&metastore), coarse_policy()));

    let handles: Vec<_> = (0..NUM_THREADS)
        .map(|_| {
            let factory = Arc::clone(&factory);
            thread::spawn(move || factory.encrypt(PARTITION_ID, ORIGINAL_DATA.as_bytes()).unwrap())
        })
        .collect();

    let records: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(metastore.len(), 2);
    let parent = records[0].key.parent_key_meta.clone();
    assert!(records.iter().all(|drr| drr.key.parent_key_meta == parent));

    // any record decrypts through any session
    for drr in &records {
        assert_eq!(factory.decrypt(PARTITION_ID, drr).unwrap(), ORIGINAL_DATA.as_bytes());
    }
}

#[test]
fn test_concurrent_cached_sessions_across_partitions() {
    let factory = Arc::new(create_factory(
        Arc::new(InMemoryMetastore::new()),
        coarse_policy()
            .with_session_cache(true)
            .with_session_cache_max_size(2),
    ));

    let handles: Vec<_> = (0..NUM_THREADS)
        .map(|i| {
            let factory = Arc::clone(&factory);
            thread::spawn(move || {
                let partition = format!("partition_{}", i % 4);
                for _ in 0..OPERATIONS_PER_THREAD {
                    let session = factory.session(&partition).unwrap();
                    let drr = session.encrypt(ORIGINAL_DATA.as_bytes()).unwrap();
                    assert_eq!(session.decrypt(&drr).unwrap(), ORIGINAL_DATA.as_bytes());
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    // every session was released, so compaction brought the cache back under its bound
    assert!(factory.cached_sessions().unwrap() <= 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_async_encrypt_decrypt() {
    let factory = Arc::new(create_factory(
        Arc::new(InMemoryMetastore::new()),
        coarse_policy(),
    ));

    let encrypts = (0..NUM_THREADS).map(|i| {
        let factory = Arc::clone(&factory);
        async move {
            let data = format!("{}_{}", ORIGINAL_DATA, i).into_bytes();
            let drr = factory.encrypt_async(PARTITION_ID, data.clone()).await.unwrap();
            (data, drr)
        }
    });

    for (data, drr) in join_all(encrypts).await {
        let decrypted = factory.decrypt_async(PARTITION_ID, drr).await.unwrap();
        assert_eq!(decrypted, data);
    }
}
