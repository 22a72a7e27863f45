// Key expiry, rotation and revocation

use crate::integration::common::{create_factory, ORIGINAL_DATA, PARTITION_ID};
use rowcrypt::metastore::InMemoryMetastore;
use rowcrypt::policy::RotationStrategy;
use rowcrypt::{BasicExpiringCryptoPolicy, Metastore};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const IK_ID: &str = "_IK_partA_svc_prod";
const SK_ID: &str = "_SK_svc_prod";

/// Keys expire after a second and get second-granular timestamps
fn short_lived_policy() -> BasicExpiringCryptoPolicy {
    BasicExpiringCryptoPolicy::new(Duration::from_secs(1), Duration::from_secs(60 * 60))
        .with_create_date_precision(Duration::from_secs(1))
}

fn wait_for_expiry() {
    thread::sleep(Duration::from_millis(2100));
}

#[test]
fn test_expired_keys_are_rotated_inline() {
    let metastore = Arc::new(InMemoryMetastore::new());
    let factory = create_factory(Arc::clone(&metastore), short_lived_policy());
    let session = factory.session(PARTITION_ID).unwrap();

    let old = session.encrypt(ORIGINAL_DATA.as_bytes()).unwrap();
    wait_for_expiry();
    let new = session.encrypt(ORIGINAL_DATA.as_bytes()).unwrap();

    let old_ik = old.key.parent_key_meta.as_ref().unwrap();
    let new_ik = new.key.parent_key_meta.as_ref().unwrap();
    assert_eq!(old_ik.id, new_ik.id);
    assert!(new_ik.created > old_ik.created);

    // the system key rotated too
    assert_eq!(metastore.len(), 4);
    let latest_sk = metastore.load_latest(SK_ID).unwrap().unwrap();
    let new_ik_record = metastore.load(IK_ID, new_ik.created).unwrap().unwrap();
    assert_eq!(new_ik_record.parent_key_meta.unwrap().created, latest_sk.created);

    // records written under the old keys still decrypt
    assert_eq!(session.decrypt(&old).unwrap(), ORIGINAL_DATA.as_bytes());
    assert_eq!(session.decrypt(&new).unwrap(), ORIGINAL_DATA.as_bytes());
}

#[test]
fn test_old_records_decrypt_in_a_new_factory_after_rotation() {
    let metastore = Arc::new(InMemoryMetastore::new());

    let (old, new) = {
        let factory = create_factory(Arc::clone(&metastore), short_lived_policy());
        let old = factory.encrypt(PARTITION_ID, ORIGINAL_DATA.as_bytes()).unwrap();
        wait_for_expiry();
        let new = factory.encrypt(PARTITION_ID, b"after rotation").unwrap();
        (old, new)
    };

    let factory = create_factory(metastore, short_lived_policy());
    assert_eq!(factory.decrypt(PARTITION_ID, &old).unwrap(), ORIGINAL_DATA.as_bytes());
    assert_eq!(factory.decrypt(PARTITION_ID, &new).unwrap(), b"after rotation");
}

#[test]
fn test_queued_rotation_keeps_serving_expired_keys() {
    let metastore = Arc::new(InMemoryMetastore::new());
    let factory = create_factory(
        Arc::clone(&metastore),
        short_lived_policy().with_rotation_strategy(RotationStrategy::Queued),
    );
    let session = factory.session(PARTITION_ID).unwrap();

    let old = session.encrypt(ORIGINAL_DATA.as_bytes()).unwrap();
    wait_for_expiry();
    let new = session.encrypt(ORIGINAL_DATA.as_bytes()).unwrap();

    assert_eq!(old.key.parent_key_meta, new.key.parent_key_meta);
    assert_eq!(metastore.len(), 2);
}

#[test]
fn test_revoked_intermediate_key_is_replaced() {
    let metastore = Arc::new(InMemoryMetastore::new());
    let policy = BasicExpiringCryptoPolicy::default().with_create_date_precision(Duration::from_secs(1));

    let old = {
        let factory = create_factory(Arc::clone(&metastore), policy.clone());
        factory.encrypt(PARTITION_ID, ORIGINAL_DATA.as_bytes()).unwrap()
    };
    let old_ik = old.key.parent_key_meta.clone().unwrap();
    assert!(metastore.mark_revoked(IK_ID, old_ik.created));

    // make sure the replacement gets a different timestamp
    thread::sleep(Duration::from_millis(1100));

    let factory = create_factory(Arc::clone(&metastore), policy);
    let new = factory.encrypt(PARTITION_ID, ORIGINAL_DATA.as_bytes()).unwrap();
    let new_ik = new.key.parent_key_meta.clone().unwrap();

    assert!(new_ik.created > old_ik.created);
    assert!(!metastore.load(IK_ID, new_ik.created).unwrap().unwrap().is_revoked());

    // the revoked key still decrypts what it protected
    assert_eq!(factory.decrypt(PARTITION_ID, &old).unwrap(), ORIGINAL_DATA.as_bytes());
}

#[test]
fn test_revocation_is_noticed_after_the_check_interval() {
    let metastore = Arc::new(InMemoryMetastore::new());
    let policy = BasicExpiringCryptoPolicy::new(Duration::from_secs(60 * 60), Duration::from_millis(500))
        .with_create_date_precision(Duration::from_secs(1));
    let factory = create_factory(Arc::clone(&metastore), policy);
    let session = factory.session(PARTITION_ID).unwrap();

    let first = session.encrypt(ORIGINAL_DATA.as_bytes()).unwrap();
    let first_ik = first.key.parent_key_meta.clone().unwrap();
    assert!(metastore.mark_revoked(IK_ID, first_ik.created));

    // still within the check interval: the cached key is trusted
    let cached = session.encrypt(ORIGINAL_DATA.as_bytes()).unwrap();
    assert_eq!(cached.key.parent_key_meta.as_ref(), Some(&first_ik));

    thread::sleep(Duration::from_millis(1100));

    let rotated = session.encrypt(ORIGINAL_DATA.as_bytes()).unwrap();
    assert!(rotated.key.parent_key_meta.unwrap().created > first_ik.created);
}

#[test]
fn test_expired_read_notifies_observer() {
    use std::sync::atomic::{AtomicUsize, Ordering};

    let metastore = Arc::new(InMemoryMetastore::new());
    let notified = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&notified);

    let factory = rowcrypt::SessionFactory::builder("svc", "prod")
        .with_metastore(metastore)
        .with_kms(crate::integration::common::create_static_kms())
        .with_policy(Arc::new(
            short_lived_policy()
                .with_notify_expired_intermediate_key_on_read(true)
                .with_notify_expired_system_key_on_read(true),
        ))
        .with_expired_key_observer(move |_, _| {
            seen.fetch_add(1, Ordering::SeqCst);
        })
        .build()
        .unwrap();

    let drr = factory.encrypt(PARTITION_ID, ORIGINAL_DATA.as_bytes()).unwrap();
    wait_for_expiry();

    assert_eq!(factory.decrypt(PARTITION_ID, &drr).unwrap(), ORIGINAL_DATA.as_bytes());
    assert!(notified.load(Ordering::SeqCst) >= 1);
}

#[test]
fn test_queued_rotation_notifies_on_encrypt() {
    use std::sync::atomic::{AtomicUsize, Ordering};

    let metastore = Arc::new(InMemoryMetastore::new());
    let notified = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&notified);

    let factory = rowcrypt::SessionFactory::builder("svc", "prod")
        .with_metastore(Arc::<InMemoryMetastore>::clone(&metastore))
        .with_kms(crate::integration::common::create_static_kms())
        .with_policy(Arc::new(
            short_lived_policy()
                .with_rotation_strategy(RotationStrategy::Queued)
                .with_notify_expired_intermediate_key_on_read(true)
                .with_notify_expired_system_key_on_read(true),
        ))
        .with_expired_key_observer(move |_, _| {
            seen.fetch_add(1, Ordering::SeqCst);
        })
        .build()
        .unwrap();
    let session = factory.session(PARTITION_ID).unwrap();

    let first = session.encrypt(ORIGINAL_DATA.as_bytes()).unwrap();
    assert_eq!(notified.load(Ordering::SeqCst), 0);
    wait_for_expiry();

    let stale = session.encrypt(ORIGINAL_DATA.as_bytes()).unwrap();
    assert_eq!(stale.key.parent_key_meta, first.key.parent_key_meta);
    assert!(notified.load(Ordering::SeqCst) >= 1);
    assert_eq!(metastore.len(), 2);
}
