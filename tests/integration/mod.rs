// Integration tests for rowcrypt, run against the in-memory metastore and static KMS

pub mod common;

mod cache_behavior_test;
mod concurrency_test;
mod config_test;
mod rotation_test;
