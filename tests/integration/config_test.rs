// Building factories from JSON configuration

use crate::integration::common::{create_static_kms, init_logging, MASTER_KEY_HEX, ORIGINAL_DATA};
use rowcrypt::config::{KmsKind, MetastoreKind};
use rowcrypt::metastore::InMemoryMetastore;
use rowcrypt::{ConfigOptions, Error};
use std::sync::Arc;

#[test]
fn test_memory_static_config_round_trip() {
    init_logging();

    let json = format!(
        r#"{{
            "ServiceName": "svc",
            "ProductID": "prod",
            "Metastore": "memory",
            "KMS": "static",
            "StaticMasterKeyHex": "{}",
            "EnableSessionCaching": true,
            "SessionCacheMaxSize": 5,
            "Verbose": true
        }}"#,
        MASTER_KEY_HEX
    );

    let config = ConfigOptions::from_json(&json).unwrap().validate().unwrap();
    assert_eq!(config.log_level(), log::LevelFilter::Debug);

    let factory = config.factory_builder().unwrap().build().unwrap();
    let drr = factory.encrypt("partA", ORIGINAL_DATA.as_bytes()).unwrap();

    assert_eq!(factory.decrypt("partA", &drr).unwrap(), ORIGINAL_DATA.as_bytes());
    assert_eq!(factory.cached_sessions(), Some(1));
}

#[test]
fn test_region_suffix_from_config() {
    let json = r#"{"ServiceName":"svc","ProductID":"prod","Metastore":"memory",
        "EnableRegionSuffix":true,"RegionSuffix":"us-west-2"}"#;

    let factory = ConfigOptions::from_json(json)
        .unwrap()
        .validate()
        .unwrap()
        .factory_builder()
        .unwrap()
        .build()
        .unwrap();

    let drr = factory.encrypt("partA", ORIGINAL_DATA.as_bytes()).unwrap();
    assert_eq!(
        drr.key.parent_key_meta.unwrap().id,
        "_IK_partA_svc_prod_us-west-2"
    );
}

#[test]
fn test_external_collaborators_can_be_supplied() {
    let json = r#"{"ServiceName":"svc","ProductID":"prod","Metastore":"rdbms","KMS":"aws"}"#;
    let config = ConfigOptions::from_json(json).unwrap().validate().unwrap();

    assert_eq!(config.metastore, MetastoreKind::Rdbms);
    assert_eq!(config.kms, KmsKind::Aws);
    assert!(matches!(
        config.factory_builder().unwrap().build(),
        Err(Error::Config(_))
    ));

    let factory = config
        .factory_builder()
        .unwrap()
        .with_metastore(Arc::new(InMemoryMetastore::new()))
        .with_kms(create_static_kms())
        .build()
        .unwrap();

    let drr = factory.encrypt("partA", ORIGINAL_DATA.as_bytes()).unwrap();
    assert_eq!(factory.decrypt("partA", &drr).unwrap(), ORIGINAL_DATA.as_bytes());
}

#[test]
fn test_invalid_config_documents() {
    assert!(matches!(ConfigOptions::from_json("{"), Err(Error::Json(_))));

    let missing_product = ConfigOptions::from_json(r#"{"ServiceName":"svc","Metastore":"memory"}"#)
        .unwrap()
        .validate();
    assert!(matches!(missing_product, Err(Error::Config(msg)) if msg.contains("ProductID")));

    let bad_kms = ConfigOptions::from_json(
        r#"{"ServiceName":"svc","ProductID":"prod","Metastore":"memory","KMS":"vault"}"#,
    )
    .unwrap()
    .validate();
    assert!(matches!(bad_kms, Err(Error::Config(_))));

    let bad_hex = ConfigOptions::from_json(&format!(
        r#"{{"ServiceName":"svc","ProductID":"prod","Metastore":"memory","StaticMasterKeyHex":"{}"}}"#,
        "zz".repeat(32)
    ))
    .unwrap()
    .validate()
    .unwrap();
    assert!(matches!(bad_hex.factory_builder(), Err(Error::Config(_))));
}
