//! Identity layer for RBD volumes and snapshots.
//!
//! This crate provides:
//! - The opaque handle codec packing cluster, pool and object identity into one string
//! - The backend object descriptor shared by volumes, snapshots and clones

pub mod codec;
pub mod descriptor;
pub mod error;

pub use codec::{
    CURRENT_VERSION, MAX_CLUSTER_ID_LEN, MAX_HANDLE_LEN, MAX_OBJECT_UUID_LEN, VolumeIdentifier,
    decode_handle, encode_handle,
};
pub use descriptor::{BackendObjectDescriptor, ObjectKind};
pub use error::CodecError;
