use futures::future::join_all;
use http::StatusCode;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{AnnotatorConfig, MAX_RETRY_AFTER_SECS};
use crate::context::CallContext;
use crate::errors::AnnotationError;
use crate::models::{
    AnnotationOptions, AnnotationResponse, AnnotationSummary, CacheKey, NormalizedRequest,
    VariantNotation,
};
use crate::services::cache::{AnnotationCache, CacheStats};
use crate::services::extractor::summarize;
use crate::services::notation::parse as parse_notation;
use crate::services::rate_limiter::RateLimiter;
use crate::services::transport::{
    AnnotationTransport, HttpTransport, UpstreamMethod, UpstreamRequest, UpstreamResponse,
};

/// Annotates variant notations against the VEP REST API.
///
/// One client owns one rate limiter and one cache; clone the `Arc` handles
/// from [`AnnotationClient::rate_limiter`] and [`AnnotationClient::cache`] to
/// inspect them.
pub struct AnnotationClient<T: AnnotationTransport = HttpTransport> {
    transport: T,
    config: AnnotatorConfig,
    rate_limiter: Arc<RateLimiter>,
    cache: Arc<AnnotationCache>,
    /// Per-key locks so concurrent misses on one key make a single remote call.
    in_flight: InFlight,
}

type InFlight = StdMutex<HashMap<CacheKey, Arc<Mutex<()>>>>;

impl AnnotationClient<HttpTransport> {
    pub fn new(config: AnnotatorConfig) -> Result<Self, AnnotationError> {
        Ok(Self::with_transport(config, HttpTransport::new()?))
    }
}

impl<T: AnnotationTransport> AnnotationClient<T> {
    pub fn with_transport(config: AnnotatorConfig, transport: T) -> Self {
        let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit, config.rate_window));
        let cache = Arc::new(AnnotationCache::with_ttl(
            config.cache_capacity,
            config.cache_ttl,
        ));
        Self {
            transport,
            config,
            rate_limiter,
            cache,
            in_flight: StdMutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &AnnotatorConfig {
        &self.config
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    pub fn cache(&self) -> &Arc<AnnotationCache> {
        &self.cache
    }

    pub async fn cache_stats(&self) -> CacheStats {
        self.cache.stats().await
    }

    /// Number of keys with a remote call in progress or queued.
    pub fn pending_keys(&self) -> usize {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Validates `input`, fetches (or recalls) its annotation and summarizes it.
    ///
    /// Invalid notations fail before any rate-limit slot or network call is spent.
    pub async fn annotate(
        &self,
        ctx: &CallContext,
        input: &str,
        options: &AnnotationOptions,
    ) -> Result<AnnotationSummary, AnnotationError> {
        let (notation, request) = parse_notation(input)?;
        let key = CacheKey::new(notation.raw(), options);

        if let Some(response) = self.cache.get(&key).await {
            debug!("Cache hit for {}", key);
            return Ok(self.summarize_for(&notation, response));
        }

        let slot = InFlightSlot::claim(&self.in_flight, &key);
        let response = self
            .fetch_once(ctx, &key, &slot.lock, &notation, &request, options)
            .await?;

        Ok(self.summarize_for(&notation, response))
    }

    /// Annotates every input concurrently; results keep the input order.
    pub async fn annotate_batch<S: AsRef<str>>(
        &self,
        ctx: &CallContext,
        inputs: &[S],
        options: &AnnotationOptions,
    ) -> Vec<Result<AnnotationSummary, AnnotationError>> {
        join_all(
            inputs
                .iter()
                .map(|input| self.annotate(ctx, input.as_ref(), options)),
        )
        .await
    }

    async fn fetch_once(
        &self,
        ctx: &CallContext,
        key: &CacheKey,
        key_lock: &Arc<Mutex<()>>,
        notation: &VariantNotation,
        request: &NormalizedRequest,
        options: &AnnotationOptions,
    ) -> Result<Arc<AnnotationResponse>, AnnotationError> {
        let _guard = ctx.run(key_lock.lock()).await?;

        // Another caller may have filled the entry while we waited.
        if let Some(response) = self.cache.peek(key).await {
            debug!("Coalesced request for {}", key);
            return Ok(response);
        }

        let response = Arc::new(self.fetch(ctx, notation, request, options).await?);
        self.cache.put(key.clone(), Arc::clone(&response)).await;
        Ok(response)
    }

    async fn fetch(
        &self,
        ctx: &CallContext,
        notation: &VariantNotation,
        request: &NormalizedRequest,
        options: &AnnotationOptions,
    ) -> Result<AnnotationResponse, AnnotationError> {
        let upstream = self.build_request(request, options)?;
        let mut retries = 0;

        loop {
            self.rate_limiter.acquire(ctx).await?;

            let start_time = Instant::now();
            let response = ctx.run(self.transport.send(upstream.clone())).await??;
            info!(
                "{:?} {} ({}) {} {}ms",
                upstream.method,
                notation.raw(),
                notation.format(),
                response.status,
                start_time.elapsed().as_millis()
            );
            self.observe_quota(&response);

            match response.status {
                status if status.is_success() => return decode_payload(notation, &response.body),
                StatusCode::TOO_MANY_REQUESTS => {
                    if retries >= self.config.max_retries {
                        warn!("Still rate limited for {} after {} retries", notation.raw(), retries);
                        return Err(AnnotationError::RateLimitExceeded(format!(
                            "remote service kept returning 429 for {} after {} retries",
                            notation.raw(),
                            retries
                        )));
                    }
                    retries += 1;
                    let wait = retry_after(&response).unwrap_or(self.config.default_retry_after);
                    warn!(
                        "Rate limited on {}; waiting {}s before retry {}",
                        notation.raw(),
                        wait.as_secs_f64(),
                        retries
                    );
                    ctx.sleep(wait).await?;
                }
                StatusCode::BAD_REQUEST => {
                    return Err(AnnotationError::InvalidFormat(format!(
                        "remote service rejected {}: {}",
                        notation.raw(),
                        error_message(&response.body)
                    )));
                }
                status => {
                    warn!("Upstream error {} for {}", status, notation.raw());
                    return Err(AnnotationError::UpstreamService(format!(
                        "remote service returned {} for {}: {}",
                        status,
                        notation.raw(),
                        error_message(&response.body)
                    )));
                }
            }
        }
    }

    fn build_request(
        &self,
        request: &NormalizedRequest,
        options: &AnnotationOptions,
    ) -> Result<UpstreamRequest, AnnotationError> {
        let species = self.config.species.as_str();
        match request {
            NormalizedRequest::Hgvs(notation) => Ok(UpstreamRequest {
                method: UpstreamMethod::Get,
                url: self.endpoint_url(&["vep", species, "hgvs", notation.as_str()], options)?,
                body: None,
                timeout: self.config.get_timeout,
            }),
            NormalizedRequest::Region(record) => Ok(UpstreamRequest {
                method: UpstreamMethod::Post,
                url: self.endpoint_url(&["vep", species, "region"], options)?,
                body: Some(json!({ "variants": [record.to_region_line()] })),
                timeout: self.config.post_timeout,
            }),
        }
    }

    fn endpoint_url(
        &self,
        segments: &[&str],
        options: &AnnotationOptions,
    ) -> Result<String, AnnotationError> {
        let mut url = reqwest::Url::parse(&self.config.base_url).map_err(|e| {
            AnnotationError::UpstreamService(format!(
                "invalid base URL {}: {}",
                self.config.base_url, e
            ))
        })?;

        url.path_segments_mut()
            .map_err(|_| {
                AnnotationError::UpstreamService(format!(
                    "base URL {} cannot take a path",
                    self.config.base_url
                ))
            })?
            .pop_if_empty()
            .extend(segments);

        let query = options.query_string();
        if !query.is_empty() {
            url.set_query(Some(&query));
        }
        Ok(url.to_string())
    }

    fn observe_quota(&self, response: &UpstreamResponse) {
        if let (Some(remaining), Some(limit)) = (
            response.header_u64("x-ratelimit-remaining"),
            response.header_u64("x-ratelimit-limit"),
        ) {
            self.rate_limiter.observe_response_headers(remaining, limit);
        }
    }

    fn summarize_for(
        &self,
        notation: &VariantNotation,
        response: Arc<AnnotationResponse>,
    ) -> AnnotationSummary {
        let mut summary = summarize(response);
        summary.input = notation.raw().to_string();
        summary
    }
}

/// One caller's share of a key's in-flight lock.
///
/// Dropping the slot (on return or when the `annotate` future is dropped)
/// removes the map entry once no other caller holds it.
struct InFlightSlot<'a> {
    in_flight: &'a InFlight,
    key: CacheKey,
    lock: Arc<Mutex<()>>,
}

impl<'a> InFlightSlot<'a> {
    fn claim(in_flight: &'a InFlight, key: &CacheKey) -> Self {
        let lock = Arc::clone(
            in_flight
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        );
        Self {
            in_flight,
            key: key.clone(),
            lock,
        }
    }
}

impl Drop for InFlightSlot<'_> {
    fn drop(&mut self) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        // The map holds one reference and this slot another; anything more is a waiter.
        if Arc::strong_count(&self.lock) <= 2
            && in_flight
                .get(&self.key)
                .map_or(false, |lock| Arc::ptr_eq(lock, &self.lock))
        {
            in_flight.remove(&self.key);
        }
    }
}

/// Seconds from `Retry-After`, capped at [`MAX_RETRY_AFTER_SECS`].
///
/// HTTP-date values and numbers a `Duration` cannot hold fall back to the default.
fn retry_after(response: &UpstreamResponse) -> Option<Duration> {
    let seconds: f64 = response.header("retry-after")?.trim().parse().ok()?;
    let wait = Duration::try_from_secs_f64(seconds).ok()?;
    Some(wait.min(Duration::from_secs(MAX_RETRY_AFTER_SECS)))
}

fn error_message(body: &[u8]) -> String {
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(map)) => match map.get("error") {
            Some(Value::String(message)) => message.clone(),
            Some(other) => other.to_string(),
            None => Value::Object(map).to_string(),
        },
        _ => String::from_utf8_lossy(body).trim().to_string(),
    }
}

/// Accepts a single object or a list (first element wins).
fn decode_payload(
    notation: &VariantNotation,
    body: &[u8],
) -> Result<AnnotationResponse, AnnotationError> {
    let not_found = || {
        AnnotationError::NotFound(format!("no annotation available for {}", notation.raw()))
    };

    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(not_found());
    }

    let payload = match serde_json::from_slice::<Value>(body)? {
        Value::Array(items) => items.into_iter().next().ok_or_else(not_found)?,
        Value::Null => return Err(not_found()),
        object => object,
    };
    if !payload.is_object() {
        return Err(AnnotationError::UpstreamService(format!(
            "unexpected annotation payload for {}: {}",
            notation.raw(),
            payload
        )));
    }

    Ok(serde_json::from_value(payload)?)
}
