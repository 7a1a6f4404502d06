//! Heicsync-Common: Shared types and utilities.
//!
//! - **Typed IDs**: `JobId` wraps the UUID of a conversion job
//! - **Core Types**: job states and job kinds, with their string forms
//! - **Path Utilities**: source file detection by extension
//! - **Error Handling**: the conversion error taxonomy and result alias
//!
//! # Examples
//!
//! ```
//! use heicsync_common::{JobId, JobState, Error, Result};
//! use heicsync_common::paths::is_jpeg_file;
//! use std::path::Path;
//!
//! let job_id = JobId::new();
//! assert!(JobState::Failed.is_terminal());
//! assert!(is_jpeg_file(Path::new("IMG_0001.JPG")));
//!
//! fn example() -> Result<()> {
//!     Err(Error::not_found("/photos/missing.jpg"))
//! }
//! ```

pub mod error;
pub mod ids;
pub mod paths;
pub mod types;

pub use error::{Error, Result};
pub use ids::*;
pub use types::*;
