//! # WarrantyDesk Ingestion
//!
//! The inbox-scanning and document-classification pipeline behind
//! WarrantyDesk: connect to a user's mailbox, page through messages with
//! attachments, pull out candidate PDFs, classify them as warranty documents
//! (cheap local heuristics plus a remote text classifier), persist accepted
//! documents idempotently, and stream live progress to the initiating
//! client.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌───────────────────────────┐   ┌──────────┐
//! │  Mailbox  │──▶│       Scan pipeline        │──▶│  SQLite   │
//! │ (REST API)│   │ MIME walk → classify → store│   │  (dedup)  │
//! └───────────┘   └──────────────┬─────────────┘   └──────────┘
//!                                │ progress events
//!                  ┌─────────────┴────────────┐
//!                  ▼                          ▼
//!             ┌──────────┐             ┌──────────┐
//!             │   CLI    │             │   HTTP   │
//!             │  (wdx)   │             │  (SSE)   │
//!             └──────────┘             └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! wdx init                          # create database
//! wdx scan --owner alice            # synchronous scan with stderr progress
//! wdx documents --owner alice       # list stored warranty documents
//! wdx serve                         # start the HTTP API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`mailbox`] | Paginated mailbox client |
//! | [`mime`] | MIME part tree walk |
//! | [`extract`] | PDF text extraction |
//! | [`heuristics`] | Rule-based warranty scoring |
//! | [`classify`] | Remote classifier + combined decision |
//! | [`cache`] | Content-hash verdict memoization |
//! | [`store`] | Idempotent document persistence |
//! | [`progress`] | Progress event channel |
//! | [`scan`] | Scan orchestration state machine |
//! | [`server`] | HTTP API |
//! | [`db`] | Database connection and migrations |

pub mod cache;
pub mod classify;
pub mod config;
pub mod db;
pub mod extract;
pub mod heuristics;
pub mod mailbox;
pub mod mime;
pub mod models;
pub mod progress;
pub mod scan;
pub mod server;
pub mod store;
