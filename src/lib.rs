//! # docbind – record-driven document template binder
//!
//! This crate binds page-structured HTML templates to external records
//! without destroying the template markup. The pipeline stages are:
//!
//! 1. **Parse** – HTML string → DOM tree ([`dom`])
//! 2. **Normalize** – guarantee the root/page structure ([`page`])
//! 3. **Map** – wrap placeholders and shadow them with record values
//!    ([`placeholder`], [`mapping`])
//! 4. **Generate** – refresh barcode and QR artifacts ([`artifacts`])
//! 5. **Paginate** – move overflow onto new pages ([`paginate`])
//! 6. **Restore** – strip the live transform for storage ([`placeholder`])
//!
//! [`pipeline`] ties the stages together; everything in between is usable
//! on its own.

pub mod artifacts;
pub mod code128;
pub mod dom;
pub mod mapping;
pub mod measure;
pub mod page;
pub mod paginate;
pub mod pipeline;
pub mod placeholder;
pub mod resolver;
pub mod style_inject;
pub mod value;

// Re-exports for convenience
pub use pipeline::{bind_document, restore_for_storage, BindConfig, BindError, BoundDocument};
pub use resolver::{FieldMap, Record};
