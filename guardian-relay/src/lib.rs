//! # guardian-relay
//!
//! Store-and-forward relay for GuardianT devices.
//!
//! This crate implements a relay server that:
//! - Exchanges pre-shared device secrets for short-lived bearer tokens
//! - Queues opaque, end-to-end encrypted messages per recipient device
//! - Holds uploaded files until their first download, then deletes them
//! - Never interprets payloads (relay is a "dumb pipe")
//!
//! ## Architecture
//!
//! ```text
//! Device A ──┐                         ┌── Device B
//!            │   HTTP + bearer token   │
//!            ├────────────────────────►│
//!            │                         │
//!        ┌───┴─────────────────────────┴───┐
//!        │          guardian-relay          │
//!        │  ┌────────────┐ ┌────────────┐  │
//!        │  │  SQLite    │ │  uploads/  │  │
//!        │  │  (queues)  │ │  (blobs)   │  │
//!        │  └────────────┘ └────────────┘  │
//!        └──────────────────────────────────┘
//! ```
//!
//! ## API
//!
//! - `POST /api/auth/device` → token
//! - `POST /api/chat/send` / `GET /api/chat/poll` (queue, drain)
//! - `POST /api/files/upload` / `GET /api/files/:file_id` (read-once blobs)
//! - `GET /api/admin/stats` (HTTP Basic)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod auth;
pub mod cleanup;
pub mod config;
pub mod error;
pub mod http;
pub mod limits;
pub mod server;
pub mod storage;
