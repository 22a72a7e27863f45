// Shared fixtures for the integration tests

use rowcrypt::kms::StaticKeyManagementService;
use rowcrypt::metastore::InMemoryMetastore;
use rowcrypt::{BasicExpiringCryptoPolicy, CryptoPolicy, SessionFactory};
use securememory::{DefaultSecretFactory, Secret, SecretFactory};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};

pub const SERVICE: &str = "svc";
pub const PRODUCT: &str = "prod";
pub const PARTITION_ID: &str = "partA";
pub const ORIGINAL_DATA: &str = "somesupersecretstring!hjdkashfjkdashfd";
pub const MASTER_KEY_HEX: &str = "6161616161616161616161616161616161616161616161616161616161616161";

static INIT: Once = Once::new();

pub fn init_logging() {
    INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

pub fn create_static_kms() -> Arc<StaticKeyManagementService> {
    let key = hex::decode(MASTER_KEY_HEX).expect("invalid hex key");
    Arc::new(
        StaticKeyManagementService::new(key, Arc::new(DefaultSecretFactory::new()))
            .expect("failed to create static KMS"),
    )
}

pub fn create_factory(
    metastore: Arc<InMemoryMetastore>,
    policy: impl CryptoPolicy + 'static,
) -> SessionFactory {
    init_logging();

    SessionFactory::builder(SERVICE, PRODUCT)
        .with_metastore(metastore)
        .with_kms(create_static_kms())
        .with_policy(Arc::new(policy))
        .build()
        .expect("failed to build session factory")
}

pub fn default_factory() -> SessionFactory {
    create_factory(
        Arc::new(InMemoryMetastore::new()),
        BasicExpiringCryptoPolicy::default(),
    )
}

/// Counts how many secrets were created and how many of them have been wiped
#[derive(Debug, Default)]
pub struct SecretCounts {
    created: AtomicUsize,
    wiped: AtomicUsize,
}

impl SecretCounts {
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn wiped(&self) -> usize {
        self.wiped.load(Ordering::SeqCst)
    }

    pub fn live(&self) -> usize {
        self.created() - self.wiped()
    }
}

struct CountingSecret {
    inner: Box<dyn Secret>,
    counts: Arc<SecretCounts>,
}

impl Secret for CountingSecret {
    fn len(&self) -> usize {
        self.inner.len()
    }

    fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    fn close(&self) -> securememory::Result<()> {
        let was_open = !self.inner.is_closed();
        self.inner.close()?;
        if was_open {
            self.counts.wiped.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn access(&self, action: &mut dyn FnMut(&[u8])) -> securememory::Result<()> {
        self.inner.access(action)
    }
}

/// Secret factory that records every secret it hands out in a [`SecretCounts`]
pub struct CountingSecretFactory {
    inner: DefaultSecretFactory,
    pub counts: Arc<SecretCounts>,
}

impl CountingSecretFactory {
    pub fn new() -> Self {
        Self {
            inner: DefaultSecretFactory::new(),
            counts: Arc::new(SecretCounts::default()),
        }
    }

    fn wrap(&self, inner: Box<dyn Secret>) -> Box<dyn Secret> {
        self.counts.created.fetch_add(1, Ordering::SeqCst);
        Box::new(CountingSecret {
            inner,
            counts: Arc::clone(&self.counts),
        })
    }
}

impl SecretFactory for CountingSecretFactory {
    fn create(&self, b: &mut [u8]) -> securememory::Result<Box<dyn Secret>> {
        let secret = self.inner.create(b)?;
        Ok(self.wrap(secret))
    }

    fn create_random(&self, size: usize) -> securememory::Result<Box<dyn Secret>> {
        let secret = self.inner.create_random(size)?;
        Ok(self.wrap(secret))
    }
}
