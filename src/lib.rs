//! Content-addressable image ingestion and album catalog.
//!
//! Uploaded payloads are hashed, stored once per unique hash in a
//! [`ContentStore`](store::ContentStore), and recorded in a relational
//! [`Catalog`](db::Catalog) that links every image into its owner's default
//! album. [`Library`] ties the two together for front-ends.

pub mod config;
pub mod db;
pub mod error;
pub mod identity;
pub mod library;
pub mod logging;
pub mod store;

pub use config::Config;
pub use error::{CoreError, ErrorKind, Result};
pub use library::{IngestFailure, IngestReport, IngestRequest, Library, Upload};
