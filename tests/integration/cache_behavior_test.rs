// Key and session caching as seen from the outside

use crate::integration::common::{
    create_factory, create_static_kms, init_logging, CountingSecretFactory, SecretCounts,
    ORIGINAL_DATA, PARTITION_ID, PRODUCT, SERVICE,
};
use rowcrypt::metastore::InMemoryMetastore;
use rowcrypt::{BasicExpiringCryptoPolicy, Error, NeverExpiredCryptoPolicy, SessionFactory};
use std::sync::Arc;

fn counting_factory(policy: BasicExpiringCryptoPolicy) -> (SessionFactory, Arc<SecretCounts>) {
    init_logging();

    let secrets = CountingSecretFactory::new();
    let counts = Arc::clone(&secrets.counts);

    let factory = SessionFactory::builder(SERVICE, PRODUCT)
        .with_metastore(Arc::new(InMemoryMetastore::new()))
        .with_kms(create_static_kms())
        .with_policy(Arc::new(policy))
        .with_secret_factory(Arc::new(secrets))
        .build()
        .unwrap();

    (factory, counts)
}

#[test]
fn test_keys_are_created_once_and_reused() {
    let metastore = Arc::new(InMemoryMetastore::new());
    let factory = create_factory(Arc::clone(&metastore), BasicExpiringCryptoPolicy::default());
    let session = factory.session(PARTITION_ID).unwrap();

    for _ in 0..10 {
        let drr = session.encrypt(ORIGINAL_DATA.as_bytes()).unwrap();
        session.decrypt(&drr).unwrap();
    }

    assert_eq!(metastore.len(), 2);
}

#[test]
fn test_partitions_share_the_system_key() {
    let metastore = Arc::new(InMemoryMetastore::new());
    let factory = create_factory(Arc::clone(&metastore), BasicExpiringCryptoPolicy::default());

    for partition in ["a", "b", "c"] {
        factory.encrypt(partition, ORIGINAL_DATA.as_bytes()).unwrap();
    }

    // one system key plus one intermediate key per partition
    assert_eq!(metastore.len(), 4);
}

#[test]
fn test_never_expired_policy() {
    let metastore = Arc::new(InMemoryMetastore::new());
    let factory = create_factory(Arc::clone(&metastore), NeverExpiredCryptoPolicy);

    let drr = factory.encrypt(PARTITION_ID, ORIGINAL_DATA.as_bytes()).unwrap();
    assert_eq!(factory.decrypt(PARTITION_ID, &drr).unwrap(), ORIGINAL_DATA.as_bytes());
    assert_eq!(factory.cached_sessions(), None);
    assert_eq!(metastore.len(), 2);
}

#[test]
fn test_no_cache_policy_still_round_trips() {
    let (factory, counts) = counting_factory(BasicExpiringCryptoPolicy::default().with_no_cache());

    let session = factory.session(PARTITION_ID).unwrap();
    let drr = session.encrypt(ORIGINAL_DATA.as_bytes()).unwrap();
    assert_eq!(session.decrypt(&drr).unwrap(), ORIGINAL_DATA.as_bytes());

    // nothing is held between calls
    assert_eq!(counts.live(), 0);
}

#[test]
fn test_cached_sessions_are_shared_per_partition() {
    let (factory, _counts) = counting_factory(
        BasicExpiringCryptoPolicy::default()
            .with_session_cache(true)
            .with_session_cache_max_size(10),
    );

    let first = factory.session(PARTITION_ID).unwrap();
    let second = factory.session(PARTITION_ID).unwrap();
    let other = factory.session("partB").unwrap();
    assert_eq!(factory.cached_sessions(), Some(2));

    let drr = first.encrypt(ORIGINAL_DATA.as_bytes()).unwrap();
    assert_eq!(second.decrypt(&drr).unwrap(), ORIGINAL_DATA.as_bytes());
    assert!(matches!(other.decrypt(&drr), Err(Error::InvalidPartition(_))));
}

#[test]
fn test_session_cache_bound_wipes_evicted_keys_once() {
    let (factory, counts) = counting_factory(
        BasicExpiringCryptoPolicy::default()
            .with_session_cache(true)
            .with_session_cache_max_size(1),
    );

    let a = factory.session("partA").unwrap();
    a.encrypt(ORIGINAL_DATA.as_bytes()).unwrap();
    a.close();

    // the system key and partA's intermediate key stay cached while partA is idle
    assert_eq!(factory.cached_sessions(), Some(1));
    assert_eq!(counts.live(), 2);
    let wiped_before = counts.wiped();

    // acquiring partB pushes idle partA out of the cache
    let b = factory.session("partB").unwrap();
    assert_eq!(factory.cached_sessions(), Some(1));
    assert_eq!(counts.live(), 1);
    assert_eq!(counts.wiped(), wiped_before + 1);

    b.encrypt(ORIGINAL_DATA.as_bytes()).unwrap();
    b.close();
    assert_eq!(counts.live(), 2);

    // partA's context is gone, so nothing more is wiped on its behalf
    let wiped_after_b = counts.wiped();
    drop(a);
    assert_eq!(counts.wiped(), wiped_after_b);

    factory.close();
    assert_eq!(counts.live(), 0);
    assert_eq!(counts.created(), counts.wiped());
}

#[test]
fn test_active_sessions_are_not_evicted() {
    let (factory, counts) = counting_factory(
        BasicExpiringCryptoPolicy::default()
            .with_session_cache(true)
            .with_session_cache_max_size(1),
    );

    let a = factory.session("partA").unwrap();
    let drr = a.encrypt(ORIGINAL_DATA.as_bytes()).unwrap();

    // partA is still in use, so the cache goes over its bound rather than evict it
    let b = factory.session("partB").unwrap();
    b.encrypt(ORIGINAL_DATA.as_bytes()).unwrap();
    assert_eq!(factory.cached_sessions(), Some(2));
    assert_eq!(a.decrypt(&drr).unwrap(), ORIGINAL_DATA.as_bytes());

    b.close();
    a.close();

    factory.close();
    assert_eq!(counts.live(), 0);
}

#[test]
fn test_uncached_sessions_wipe_on_close() {
    let (factory, counts) = counting_factory(BasicExpiringCryptoPolicy::default());

    let session = factory.session(PARTITION_ID).unwrap();
    session.encrypt(ORIGINAL_DATA.as_bytes()).unwrap();
    assert_eq!(counts.live(), 2);

    // the intermediate key goes with the session, the system key stays with the factory
    session.close();
    assert_eq!(counts.live(), 1);

    factory.close();
    assert_eq!(counts.live(), 0);
}
