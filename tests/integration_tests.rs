use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use variant_annotator::{
    handlers, AnnotationClient, AnnotationError, AnnotationOptions, AnnotatorConfig, CallContext,
};
use warp::http::StatusCode;
use warp::Filter;

fn vep_payload() -> Value {
    json!([{
        "input": "17 36459258 . A G . . .",
        "assembly_name": "GRCh38",
        "seq_region_name": "17",
        "start": 36459258,
        "end": 36459258,
        "allele_string": "A/G",
        "most_severe_consequence": "missense_variant",
        "transcript_consequences": [
            {
                "transcript_id": "ENST00000366667",
                "gene_symbol": "HNF1B",
                "impact": "MODIFIER",
                "cadd_phred": 3.1
            },
            {
                "transcript_id": "ENST00000617316",
                "gene_id": "ENSG00000275410",
                "gene_symbol": "HNF1B",
                "impact": "MODERATE",
                "mane_select": "NM_000458.4",
                "hgvsc": "ENST00000617316.2:c.544T>C",
                "cadd_phred": 25.3
            }
        ],
        "colocated_variants": [{"id": "rs1057519940", "gnomad_af": 0.000001}]
    }])
}

/// Stub VEP: the region endpoint answers 429 for the first `throttle_first`
/// calls, the HGVS endpoint always rejects the notation.
fn spawn_stub(throttle_first: usize) -> (SocketAddr, Arc<AtomicUsize>) {
    let hits = Arc::new(AtomicUsize::new(0));

    let region_hits = Arc::clone(&hits);
    let region = warp::path!("vep" / "human" / "region")
        .and(warp::post())
        .and(warp::query::<HashMap<String, String>>())
        .and(warp::body::json())
        .map(move |query: HashMap<String, String>, body: Value| {
            let seen = region_hits.fetch_add(1, Ordering::SeqCst);
            if seen < throttle_first {
                return warp::reply::with_status(
                    warp::reply::with_header(warp::reply::json(&json!({})), "Retry-After", "1"),
                    StatusCode::TOO_MANY_REQUESTS,
                );
            }

            let expected_line = json!(["17 36459258 . A G . . ."]);
            let status = if body["variants"] == expected_line
                && query.get("CADD").map(String::as_str) == Some("1")
                && query.get("mane").map(String::as_str) == Some("1")
            {
                StatusCode::OK
            } else {
                StatusCode::INTERNAL_SERVER_ERROR
            };
            warp::reply::with_status(
                warp::reply::with_header(warp::reply::json(&vep_payload()), "X-RateLimit-Limit", "55000"),
                status,
            )
        });

    let hgvs_hits = Arc::clone(&hits);
    let hgvs = warp::path!("vep" / "human" / "hgvs" / String)
        .and(warp::get())
        .map(move |_notation: String| {
            hgvs_hits.fetch_add(1, Ordering::SeqCst);
            warp::reply::with_status(
                warp::reply::json(&json!({"error": "Could not get a Transcript object"})),
                StatusCode::BAD_REQUEST,
            )
        });

    let (addr, server) = warp::serve(region.or(hgvs)).bind_ephemeral(([127, 0, 0, 1], 0));
    tokio::spawn(server);
    (addr, hits)
}

fn client_for(addr: SocketAddr) -> AnnotationClient {
    let config = AnnotatorConfig {
        base_url: format!("http://{}", addr),
        ..AnnotatorConfig::default()
    };
    AnnotationClient::new(config).unwrap()
}

#[tokio::test]
async fn test_vcf_annotation_over_http() {
    let (addr, hits) = spawn_stub(0);
    let client = client_for(addr);
    let ctx = CallContext::with_timeout(Duration::from_secs(10));
    let options = AnnotationOptions::default();

    let summary = client
        .annotate(&ctx, "chr17-36459258-A-G", &options)
        .await
        .unwrap();

    assert_eq!(summary.input, "chr17-36459258-A-G");
    assert_eq!(summary.transcript_id.as_deref(), Some("ENST00000617316"));
    assert_eq!(summary.cadd_score, Some(25.3));
    assert_eq!(summary.gnomad_af, Some(0.000001));
    assert_eq!(summary.impact.as_deref(), Some("MODERATE"));

    client
        .annotate(&ctx, "chr17-36459258-A-G", &options)
        .await
        .unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_retry_after_is_honoured_over_http() {
    let (addr, hits) = spawn_stub(1);
    let client = client_for(addr);
    let start = Instant::now();

    let summary = client
        .annotate(
            &CallContext::with_timeout(Duration::from_secs(10)),
            "17-36459258-A-G",
            &AnnotationOptions::default(),
        )
        .await
        .unwrap();

    assert!(start.elapsed() >= Duration::from_secs(1));
    assert_eq!(hits.load(Ordering::SeqCst), 2);
    assert_eq!(summary.position, Some(36459258));
}

#[tokio::test]
async fn test_remote_rejection_over_http() {
    let (addr, hits) = spawn_stub(0);
    let client = client_for(addr);

    let err = client
        .annotate(
            &CallContext::with_timeout(Duration::from_secs(10)),
            "NM_000458.4:c.544+1G>A",
            &AnnotationOptions::default(),
        )
        .await
        .unwrap_err();

    match err {
        AnnotationError::InvalidFormat(message) => {
            assert!(message.contains("Could not get a Transcript object"))
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_unreachable_upstream_is_service_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = client_for(addr);
    let err = client
        .annotate(
            &CallContext::with_timeout(Duration::from_secs(10)),
            "rs56116432",
            &AnnotationOptions::default(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, AnnotationError::UpstreamService(_)));
}

#[tokio::test]
async fn test_annotate_endpoint_returns_summary_json() {
    let (addr, _hits) = spawn_stub(0);
    let routes = handlers::routes(Arc::new(client_for(addr)));

    let response = warp::test::request()
        .path("/annotate?variant=17-36459258-A-G")
        .reply(&routes)
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let body: Value = serde_json::from_slice(response.body()).unwrap();
    assert_eq!(body["cadd_score"], json!(25.3));
    assert_eq!(body["chromosome"], json!("17"));
    assert_eq!(body["position"], json!(36459258));
    assert_eq!(body["gene_symbol"], json!("HNF1B"));

    let response = warp::test::request()
        .path("/annotate?variant=NM_000458.4:c.544%2B1G%3EA")
        .reply(&routes)
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
