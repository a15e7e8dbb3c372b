//! # threadline-shared
//!
//! Value types shared by the sync engine and its embedders: identifiers,
//! timeline entries, the opaque pagination cursor, and the error taxonomy.

pub mod constants;
pub mod cursor;
pub mod error;
pub mod types;

pub use cursor::{Cursor, Page};
pub use error::{RateLimitOrigin, Result, SyncError};
pub use types::*;
