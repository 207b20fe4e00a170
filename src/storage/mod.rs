//! Object storage backends.
//!
//! The [`backend::ObjectBackend`] trait abstracts over the S3-compatible
//! service the client talks to.  Implementations include the AWS SDK
//! backend for real endpoints and an in-memory backend.

pub mod backend;
pub mod memory;
pub mod post_policy;
pub mod s3;
