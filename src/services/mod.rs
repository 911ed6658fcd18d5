//! Key building, link coding, access policy, the `ObjectStore` facade, and
//! the storage clients it can drive.

pub mod access_policy;
pub mod key_builder;
pub mod link_codec;
pub mod memory_storage;
pub mod object_store;
pub mod storage_client;
pub mod storage_service;
