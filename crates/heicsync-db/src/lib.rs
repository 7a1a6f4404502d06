//! Heicsync-DB: the conversion ledger.
//!
//! Every conversion attempt is recorded as a row in `conversion_jobs`. The
//! ledger is SQLite accessed through an r2d2 pool.
//!
//! # Modules
//!
//! - `migrations` - Embedded schema migrations
//! - `pool` - Connection pool management
//! - `models` - Rust models matching the schema
//! - `queries` - Job creation, state transitions, listing and statistics
//!
//! # Example
//!
//! ```
//! use heicsync_common::JobKind;
//! use heicsync_db::pool::{init_memory_pool, get_conn};
//! use heicsync_db::queries::jobs;
//!
//! let pool = init_memory_pool().unwrap();
//! let conn = get_conn(&pool).unwrap();
//!
//! let job = jobs::create_job(&conn, JobKind::Once, "/photos/a/IMG_0001.jpg").unwrap();
//! assert_eq!(jobs::get_stats(&conn).unwrap().pending, 1);
//! # let _ = job;
//! ```

pub mod migrations;
pub mod models;
pub mod pool;
pub mod queries;
