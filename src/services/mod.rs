pub mod cache;
pub mod client;
pub mod extractor;
pub mod notation;
pub mod rate_limiter;
pub mod transport;

pub use cache::{AnnotationCache, CacheStats};
pub use client::AnnotationClient;
pub use extractor::{select_primary_transcript, summarize};
pub use notation::{classify, parse, to_remote_request, validate};
pub use rate_limiter::{QuotaStatus, RateLimiter};
pub use transport::{
    AnnotationTransport, HttpTransport, UpstreamMethod, UpstreamRequest, UpstreamResponse,
};
