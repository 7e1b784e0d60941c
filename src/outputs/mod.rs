//! Output generation for crawl runs.
//!
//! # Submodules
//!
//! - [`json`]: Writes the summaries of a multi-source run to a JSON report
//!
//! # Output Structure
//!
//! ```text
//! report_dir/
//! └── 2026-10-16/
//!     ├── crawl_083015.json
//!     └── crawl_143002.json
//! ```

pub mod json;
