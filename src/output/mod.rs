//! Result reporting
//!
//! - `text`: human-readable console report
//! - `json`: machine-readable report, printed or written to a file

pub mod json;
pub mod text;
