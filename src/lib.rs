//! # pdftext: fast PDF text extraction
//!
//! pdftext reads PDF 1.x files and produces logically ordered UTF-8 text
//! without materializing per-character intermediate structures. The read
//! path runs from the raw byte window through the cross-reference view,
//! the object parser, the filter pipeline and the content-stream
//! interpreter, and assembles reading order from the Tagged-PDF structure
//! tree when one is present.
//!
//! ## Quick start
//!
//! ```no_run
//! use pdftext::core::PDFDocument;
//!
//! let mut doc = PDFDocument::open("document.pdf")?;
//! println!("{} pages", doc.page_count());
//!
//! // One page, reading order
//! let text = doc.extract_page(0)?;
//!
//! // The whole document, pages separated by form feeds
//! let everything = doc.extract_all()?;
//! # Ok::<(), pdftext::core::PDFError>(())
//! ```
//!
//! ## Extraction modes
//!
//! - [`core::PDFDocument::extract_page`] — accuracy mode: tagged reading
//!   order when the structure tree covers the page, stream order
//!   otherwise, geometric assembly as the last resort.
//! - [`core::PDFDocument::extract_page_fast`] — raw content-stream order.
//! - [`core::PDFDocument::extract_bounds`] — positioned spans with
//!   glyph-run bounding boxes, for layout-aware consumers.
//!
//! ## Error policies
//!
//! Malformed documents are the norm, not the exception. The error sink
//! runs in one of three policies (strict / default / permissive) chosen
//! at open time through [`core::DocumentConfig`]; recoverable errors are
//! recorded and extraction degrades per object rather than failing the
//! document.
//!
//! ## Threading
//!
//! A document's caches are not synchronized. Use one `PDFDocument` per
//! thread; the byte window itself is read-only and cheap to share.
//!
//! The C ABI surface for host-language bindings lives in [`ffi`].

pub mod core;
pub mod ffi;

pub use crate::core::{DocumentConfig, ErrorPolicy, PDFDocument, PDFError, PDFResult};
