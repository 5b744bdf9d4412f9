//! Key Management Service implementations
//!
//! A KMS wraps and unwraps system key material under a master key the
//! library never sees in full. Two implementations are provided:
//!
//! - [`StaticKeyManagementService`]: a process-local 32-byte master key, for
//!   testing and development only
//! - `AwsKeyManagementService` (behind the `aws-kms` feature): AWS KMS with
//!   multi-region support
//!
//! Custom implementations plug in through the
//! [`KeyManagementService`](crate::KeyManagementService) trait.

mod static_kms;

pub use static_kms::StaticKeyManagementService;

#[cfg(feature = "aws-kms")]
mod aws;

#[cfg(feature = "aws-kms")]
pub use aws::{AwsKeyManagementService, AwsKmsBuilder};
