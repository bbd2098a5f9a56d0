//! # SOW Domain Models
//!
//! Records shared by the extraction pipeline and the HTTP surface.
//!
//! - **ContentBlock**: a table or table-like text region detected on a page
//! - **Milestone** / **Deliverable**: records recovered from completion output
//! - **ExtractionResult**: the envelope returned for one document

pub mod document;
pub mod extraction;
pub mod milestone;


pub use document::*;
pub use extraction::*;
pub use milestone::*;
