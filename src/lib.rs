//! Variant notation validation and annotation engine.
//!
//! Accepts HGVS, VCF-style, rsID and structural notations, validates and
//! normalizes them, and annotates them through the Ensembl VEP REST API
//! behind a shared rate limiter, an in-memory cache and a bounded 429 retry.

pub mod config;
pub mod context;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod services;

pub use config::AnnotatorConfig;
pub use context::{CallContext, CancelHandle};
pub use errors::AnnotationError;
pub use models::{
    AnnotationFlag, AnnotationOptions, AnnotationResponse, AnnotationSummary, ColocatedVariant,
    Format, NormalizedRequest, TranscriptConsequence, VariantNotation,
};
pub use services::{AnnotationClient, HttpTransport};
