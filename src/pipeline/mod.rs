//! Pipeline stages for document analysis.
//!
//! Each submodule implements one transformation step and is testable on its
//! own; [`crate::analyze`] strings them together and owns the state machine.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ extract ──▶ prompt ──▶ llm ──▶ normalize ──▶ report
//! (sniff)   (text/OCR)  (template) (retry)  (schema)      (lopdf)
//! ```
//!
//! 1. [`input`]     — validate the upload, detect format, count PDF pages
//! 2. [`extract`]   — per-page text: PDF text layers first, OCR for the rest.
//!    Uses [`raster`] to turn scanned pages into PNGs, [`encode`] for image
//!    conversion and [`ocr`] for recognition
//! 3. [`prompt`]    — render the template's extraction prompt
//! 4. [`llm`]       — the extraction call with retry, timeout and cancellation
//! 5. [`normalize`] — map the JSON answer onto the template schema
//! 6. [`report`]    — lay out the normalised result as a PDF

pub mod encode;
pub mod extract;
pub mod input;
pub mod llm;
pub mod normalize;
pub mod ocr;
pub mod prompt;
pub mod raster;
pub mod report;
