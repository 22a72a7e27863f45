//! JSON configuration for building a [`SessionFactory`]
//!
//! Field names follow the PascalCase keys the Asherah bindings accept, so an existing config
//! document can be reused as is:
//!
//! ```
//! use rowcrypt::ConfigOptions;
//!
//! let config = ConfigOptions::from_json(
//!     r#"{"ServiceName":"svc","ProductID":"prod","Metastore":"memory","KMS":"static"}"#,
//! )
//! .unwrap()
//! .validate()
//! .unwrap();
//!
//! let factory = config.factory_builder().unwrap().build().unwrap();
//! # factory.close();
//! ```

use crate::error::{Error, Result};
use crate::kms::StaticKeyManagementService;
use crate::metastore::InMemoryMetastore;
use crate::policy::{BasicExpiringCryptoPolicy, CryptoPolicy};
use crate::session::{SessionFactory, SessionFactoryBuilder};
use crate::AES256_KEY_SIZE;

use securememory::DefaultSecretFactory;
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Master key used by the static KMS when `StaticMasterKeyHex` is absent. Test use only.
pub const TEST_STATIC_MASTER_KEY: &[u8; AES256_KEY_SIZE] = b"thisIsAStaticMasterKeyForTesting";

const DEFAULT_EXPIRE_AFTER_SECS: u64 = 60 * 60 * 24 * 90;
const DEFAULT_CHECK_INTERVAL_SECS: u64 = 60 * 60;
const DEFAULT_SESSION_CACHE_MAX_SIZE: usize = 1000;
const DEFAULT_SESSION_CACHE_DURATION_SECS: u64 = 60 * 60 * 2;

/// Raw configuration as read from JSON
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct ConfigOptions {
    #[serde(rename = "ServiceName")]
    pub service_name: Option<String>,
    #[serde(rename = "ProductID")]
    pub product_id: Option<String>,
    /// Key lifetime in seconds
    #[serde(rename = "ExpireAfter")]
    pub expire_after: Option<u64>,
    /// Revocation re-check interval in seconds
    #[serde(rename = "CheckInterval")]
    pub check_interval: Option<u64>,
    #[serde(rename = "Metastore")]
    pub metastore: Option<String>,
    #[serde(rename = "KMS")]
    pub kms: Option<String>,
    /// 64 hex characters
    #[serde(rename = "StaticMasterKeyHex")]
    pub static_master_key_hex: Option<String>,
    #[serde(rename = "SessionCacheMaxSize")]
    pub session_cache_max_size: Option<usize>,
    /// Idle session lifetime in seconds
    #[serde(rename = "SessionCacheDuration")]
    pub session_cache_duration: Option<u64>,
    #[serde(rename = "EnableRegionSuffix")]
    pub enable_region_suffix: Option<bool>,
    #[serde(rename = "RegionSuffix")]
    pub region_suffix: Option<String>,
    #[serde(rename = "EnableSessionCaching")]
    pub enable_session_caching: Option<bool>,
    #[serde(rename = "Verbose")]
    pub verbose: Option<bool>,
}

/// Where wrapped keys are stored
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MetastoreKind {
    Memory,
    Rdbms,
    DynamoDb,
}

impl FromStr for MetastoreKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "memory" | "test-debug-memory" => Ok(Self::Memory),
            "rdbms" => Ok(Self::Rdbms),
            "dynamodb" => Ok(Self::DynamoDb),
            other => Err(Error::Config(format!("unsupported Metastore value: {}", other))),
        }
    }
}

impl fmt::Display for MetastoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Memory => "memory",
            Self::Rdbms => "rdbms",
            Self::DynamoDb => "dynamodb",
        })
    }
}

/// Which KMS wraps system keys
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KmsKind {
    Static,
    Aws,
}

impl FromStr for KmsKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "static" | "test-debug-static" => Ok(Self::Static),
            "aws" => Ok(Self::Aws),
            other => Err(Error::Config(format!("unsupported KMS value: {}", other))),
        }
    }
}

impl fmt::Display for KmsKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Static => "static",
            Self::Aws => "aws",
        })
    }
}

/// Configuration that passed [`ConfigOptions::validate`]
#[derive(Clone)]
pub struct ValidatedConfig {
    pub service_name: String,
    pub product_id: String,
    pub metastore: MetastoreKind,
    pub kms: KmsKind,
    pub expire_after: Duration,
    pub check_interval: Duration,
    pub session_cache_max_size: usize,
    pub session_cache_duration: Duration,
    pub enable_session_caching: bool,
    pub region_suffix: Option<String>,
    pub verbose: bool,
    static_master_key_hex: Option<String>,
}

impl fmt::Debug for ValidatedConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidatedConfig")
            .field("service_name", &self.service_name)
            .field("product_id", &self.product_id)
            .field("metastore", &self.metastore)
            .field("kms", &self.kms)
            .field("expire_after", &self.expire_after)
            .field("check_interval", &self.check_interval)
            .field("session_cache_max_size", &self.session_cache_max_size)
            .field("session_cache_duration", &self.session_cache_duration)
            .field("enable_session_caching", &self.enable_session_caching)
            .field("region_suffix", &self.region_suffix)
            .field("verbose", &self.verbose)
            .finish_non_exhaustive()
    }
}

fn required(value: &Option<String>, field: &str) -> Result<String> {
    match value.as_deref() {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(Error::Config(format!("{} is required", field))),
    }
}

impl ConfigOptions {
    /// Parses a JSON config document
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Checks required fields and parses the enumerated ones
    pub fn validate(&self) -> Result<ValidatedConfig> {
        let service_name = required(&self.service_name, "ServiceName")?;
        let product_id = required(&self.product_id, "ProductID")?;
        let metastore = required(&self.metastore, "Metastore")?.parse::<MetastoreKind>()?;
        let kms = self.kms.as_deref().unwrap_or("static").parse::<KmsKind>()?;

        let region_suffix = if self.enable_region_suffix.unwrap_or(false) {
            Some(required(&self.region_suffix, "RegionSuffix (EnableRegionSuffix is set)")?)
        } else {
            None
        };

        if let Some(hex_key) = &self.static_master_key_hex {
            if hex_key.len() != AES256_KEY_SIZE * 2 {
                return Err(Error::Config(format!(
                    "StaticMasterKeyHex must be {} hex characters",
                    AES256_KEY_SIZE * 2
                )));
            }
        }

        let session_cache_max_size = self
            .session_cache_max_size
            .unwrap_or(DEFAULT_SESSION_CACHE_MAX_SIZE);
        if session_cache_max_size == 0 {
            return Err(Error::Config("SessionCacheMaxSize must be positive".into()));
        }

        Ok(ValidatedConfig {
            service_name,
            product_id,
            metastore,
            kms,
            expire_after: Duration::from_secs(self.expire_after.unwrap_or(DEFAULT_EXPIRE_AFTER_SECS)),
            check_interval: Duration::from_secs(
                self.check_interval.unwrap_or(DEFAULT_CHECK_INTERVAL_SECS),
            ),
            session_cache_max_size,
            session_cache_duration: Duration::from_secs(
                self.session_cache_duration
                    .unwrap_or(DEFAULT_SESSION_CACHE_DURATION_SECS),
            ),
            enable_session_caching: self.enable_session_caching.unwrap_or(true),
            region_suffix,
            verbose: self.verbose.unwrap_or(false),
            static_master_key_hex: self.static_master_key_hex.clone(),
        })
    }
}

impl ValidatedConfig {
    /// The crypto policy these settings describe
    pub fn policy(&self) -> BasicExpiringCryptoPolicy {
        BasicExpiringCryptoPolicy::new(self.expire_after, self.check_interval)
            .with_session_cache(self.enable_session_caching)
            .with_session_cache_max_size(self.session_cache_max_size)
            .with_session_cache_duration(self.session_cache_duration)
    }

    /// Log level for `env_logger` or whichever logger the application installs
    pub fn log_level(&self) -> log::LevelFilter {
        if self.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        }
    }

    fn static_master_key(&self) -> Result<Vec<u8>> {
        match &self.static_master_key_hex {
            Some(hex_key) => hex::decode(hex_key)
                .map_err(|e| Error::Config(format!("StaticMasterKeyHex: {}", e))),
            None => {
                log::warn!("StaticMasterKeyHex not set, using the built-in test master key");
                Ok(TEST_STATIC_MASTER_KEY.to_vec())
            }
        }
    }

    /// A factory builder preset with everything this config can construct on its own
    ///
    /// The `rdbms` and `dynamodb` metastores and the `aws` KMS are not built here; supply
    /// them with [`SessionFactoryBuilder::with_metastore`] and
    /// [`SessionFactoryBuilder::with_kms`] before calling `build`.
    pub fn factory_builder(&self) -> Result<SessionFactoryBuilder> {
        let policy: Arc<dyn CryptoPolicy> = Arc::new(self.policy());

        let mut builder = SessionFactory::builder(self.service_name.as_str(), self.product_id.as_str())
            .with_policy(policy);

        if let Some(suffix) = &self.region_suffix {
            builder = builder.with_region_suffix(suffix.as_str());
        }

        match self.metastore {
            MetastoreKind::Memory => {
                builder = builder.with_metastore(Arc::new(InMemoryMetastore::new()));
            }
            kind => log::debug!("metastore {} must be supplied by the caller", kind),
        }

        match self.kms {
            KmsKind::Static => {
                let kms = StaticKeyManagementService::new(
                    self.static_master_key()?,
                    Arc::new(DefaultSecretFactory::new()),
                )?;
                builder = builder.with_kms(Arc::new(kms));
            }
            kind => log::debug!("kms {} must be supplied by the caller", kind),
        }

        Ok(builder)
    }
}
