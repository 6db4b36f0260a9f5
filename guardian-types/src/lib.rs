//! # guardian-types
//!
//! Wire types for the GuardianT store-and-forward relay.
//!
//! This crate provides the types shared between the relay and its clients:
//! - [`DeviceId`], [`BlobId`] - Identity types
//! - [`QueuedMessage`] - A message waiting in a recipient queue
//! - Request and response bodies for the HTTP surface
//! - [`TypesError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod ids;
mod messages;

pub use error::TypesError;
pub use ids::{BlobId, DeviceId, MAX_DEVICE_ID_LEN};
pub use messages::{
    AdminStats, ErrorBody, QueueStat, QueuedMessage, SendAck, SendRequest, TokenResponse,
    UploadResponse, WhoAmI,
};
