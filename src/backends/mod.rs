//! Concrete `Backend` drivers.
//!
//! `posixfs` is always available; the remote drivers are gated behind
//! Cargo features since they pull in sizeable, optional dependency trees.

pub mod posixfs;

#[cfg(feature = "s3")]
pub mod s3;

#[cfg(feature = "sftp")]
pub mod sftp;

#[cfg(feature = "rclone")]
pub mod rclone;
