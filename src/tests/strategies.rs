use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    body::Body,
    extract::{Form, Query},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Router,
};

use futures::stream::{self, StreamExt};

use super::support::{
    bind, config_for, gateway_for, serve, unreachable_base, Hits, VIDEO_BYTES,
};
use crate::errors::RetrievalError;
use crate::gateway::{RetrievalRequest, Strategy};

const SOURCE: &str = "https://www.tiktok.com/@user/video/7311";

fn video() -> Response {
    ([(header::CONTENT_TYPE, "video/mp4")], VIDEO_BYTES).into_response()
}

/// Video body with no `Content-Type` at all.
fn untyped_video() -> Response {
    Response::builder()
        .body(Body::from(VIDEO_BYTES))
        .unwrap()
}

#[tokio::test]
async fn test_direct_redirect_follows_location() {
    let (listener, base) = bind().await;
    let seen: Arc<Mutex<Option<HashMap<String, String>>>> = Default::default();

    let cdn = base.join("v16.tiktokcdn.com/video/7311.mp4").unwrap();
    let app = Router::new()
        .route(
            "/dlpanda/",
            get({
                let seen = seen.clone();
                let cdn = cdn.to_string();
                move |Query(q): Query<HashMap<String, String>>| async move {
                    *seen.lock().unwrap() = Some(q);
                    (StatusCode::FOUND, [(header::LOCATION, cdn)])
                }
            }),
        )
        .route("/v16.tiktokcdn.com/video/7311.mp4", get(|| async { video() }));
    serve(listener, app);

    let gateway = gateway_for(config_for(&base));
    let result = gateway
        .retrieve(&RetrievalRequest::new(SOURCE, Strategy::DirectRedirect))
        .await
        .unwrap();

    let query = seen.lock().unwrap().clone().unwrap();
    assert_eq!(query.get("url").map(String::as_str), Some(SOURCE));

    assert!(result.success);
    assert_eq!(result.mime_type, "video/mp4");
    assert_eq!(result.source_url, SOURCE);
    assert_eq!(result.size_bytes, VIDEO_BYTES.len());
    assert_eq!(result.decode().unwrap(), VIDEO_BYTES);
}

#[tokio::test]
async fn test_direct_redirect_scrapes_page_without_redirect() {
    let (listener, base) = bind().await;

    let app = Router::new()
        .route(
            "/dlpanda/",
            get(|| async {
                Html(
                    r#"<html><body>
                    <a href="/ads/video/banner.mp4">ad</a>
                    <a href="/tiktokcdn.com/watermark.png">logo</a>
                    <a href="/tiktokcdn.com/video/7311.mp4">Download</a>
                    </body></html>"#,
                )
            }),
        )
        .route("/tiktokcdn.com/video/7311.mp4", get(|| async { untyped_video() }));
    serve(listener, app);

    let gateway = gateway_for(config_for(&base));
    let request = RetrievalRequest::new(SOURCE, Strategy::DirectRedirect);

    let link = gateway.extract_link(&request).await.unwrap();
    assert_eq!(link, base.join("tiktokcdn.com/video/7311.mp4").unwrap());

    let result = gateway.retrieve(&request).await.unwrap();
    assert_eq!(result.mime_type, "video/mp4");
    assert_eq!(result.decode().unwrap(), VIDEO_BYTES);
}

#[tokio::test]
async fn test_direct_redirect_no_match_skips_download() {
    let (listener, base) = bind().await;
    let downloads = Hits::default();

    let app = Router::new()
        .route(
            "/dlpanda/",
            get(|| async { Html(r#"<a href="/about">about</a><p>Video unavailable</p>"#) }),
        )
        .fallback({
            let downloads = downloads.clone();
            move || async move {
                downloads.hit();
                StatusCode::NOT_FOUND
            }
        });
    serve(listener, app);

    let err = gateway_for(config_for(&base))
        .retrieve(&RetrievalRequest::new(SOURCE, Strategy::DirectRedirect))
        .await
        .unwrap_err();

    assert!(
        matches!(
            err,
            RetrievalError::ExtractionFailed {
                upstream_status: None,
                ..
            }
        ),
        "{err:?}"
    );
    assert_eq!(downloads.count(), 0);
}

#[tokio::test]
async fn test_mirror_error_status_is_reported() {
    let (listener, base) = bind().await;

    let app = Router::new().route(
        "/dlpanda/",
        get(|| async { (StatusCode::SERVICE_UNAVAILABLE, "maintenance") }),
    );
    serve(listener, app);

    let err = gateway_for(config_for(&base))
        .retrieve(&RetrievalRequest::new(SOURCE, Strategy::DirectRedirect))
        .await
        .unwrap_err();

    assert!(matches!(err, RetrievalError::ExtractionFailed { .. }), "{err:?}");
    assert_eq!(err.upstream_status(), Some(503));
}

#[tokio::test]
async fn test_form_post_downloads_first_matching_anchor() {
    let (listener, base) = bind().await;
    let form: Arc<Mutex<Option<HashMap<String, String>>>> = Default::default();

    let page = format!(
        r#"<html><body>
        <a href="{base}blog/post">blog</a>
        <a href="{base}musicaldown/download/abc.mp4">MP4</a>
        <a href="{base}musicaldown/download/abc-hd.mp4">MP4 HD</a>
        </body></html>"#
    );

    let app = Router::new()
        .route(
            "/musicaldown/",
            post({
                let form = form.clone();
                move |Form(f): Form<HashMap<String, String>>| async move {
                    *form.lock().unwrap() = Some(f);
                    Html(page)
                }
            }),
        )
        .route("/musicaldown/download/abc.mp4", get(|| async { video() }));
    serve(listener, app);

    let mut request = RetrievalRequest::new(SOURCE, Strategy::FormPost);
    request
        .extra_params
        .insert("lang".to_string(), "en".to_string());
    request
        .extra_params
        .insert("url".to_string(), "https://evil.example/".to_string());

    let result = gateway_for(config_for(&base))
        .retrieve(&request)
        .await
        .unwrap();
    assert_eq!(result.decode().unwrap(), VIDEO_BYTES);

    let form = form.lock().unwrap().clone().unwrap();
    assert_eq!(form.get("url").map(String::as_str), Some(SOURCE));
    assert_eq!(form.get("submit").map(String::as_str), Some(""));
    assert_eq!(form.get("lang").map(String::as_str), Some("en"));
}

#[tokio::test]
async fn test_form_post_without_link_fails_extraction() {
    let (listener, base) = bind().await;
    let downloads = Hits::default();

    let app = Router::new()
        .route(
            "/musicaldown/",
            post(|| async { Html("<p>This video is private</p>") }),
        )
        .fallback({
            let downloads = downloads.clone();
            move || async move {
                downloads.hit();
                StatusCode::NOT_FOUND
            }
        });
    serve(listener, app);

    let err = gateway_for(config_for(&base))
        .retrieve(&RetrievalRequest::new(SOURCE, Strategy::FormPost))
        .await
        .unwrap_err();

    assert!(matches!(err, RetrievalError::ExtractionFailed { .. }), "{err:?}");
    assert!(err.to_string().contains("Failed to fetch download link"));
    assert_eq!(downloads.count(), 0);
}

#[tokio::test]
async fn test_token_form_resolves_source_and_sends_token() {
    let (listener, base) = bind().await;
    let form: Arc<Mutex<Option<HashMap<String, String>>>> = Default::default();

    let short = base.join("t/ZS123").unwrap();
    let canonical = base.join("@user/video/7311").unwrap();
    let page = format!(
        r#"<a href="https://other.example/v.mp4">mirror</a>
        <a href="{base}tikcdn/v/7311.mp4?token=1">Without watermark</a>"#
    );

    let app = Router::new()
        .route(
            "/ssstik/",
            get(|| async {
                Html(
                    r#"<form><input type="hidden" name="tt" value="tok-42"><input name="id"></form>"#,
                )
            }),
        )
        .route(
            "/t/ZS123",
            get(|| async { (StatusCode::FOUND, [(header::LOCATION, "/@user/video/7311")]) }),
        )
        .route("/@user/video/7311", get(|| async { "video page" }))
        .route(
            "/ssstik/abc",
            post({
                let form = form.clone();
                move |Query(q): Query<HashMap<String, String>>,
                      Form(f): Form<HashMap<String, String>>| async move {
                    assert_eq!(q.get("url").map(String::as_str), Some("dl"));
                    *form.lock().unwrap() = Some(f);
                    Html(page)
                }
            }),
        )
        .route("/tikcdn/v/7311.mp4", get(|| async { video() }));
    serve(listener, app);

    let result = gateway_for(config_for(&base))
        .retrieve(&RetrievalRequest::new(short.as_str(), Strategy::TokenForm))
        .await
        .unwrap();

    assert_eq!(result.source_url, short.as_str());
    assert_eq!(result.decode().unwrap(), VIDEO_BYTES);

    let form = form.lock().unwrap().clone().unwrap();
    assert_eq!(form.get("id").map(String::as_str), Some(canonical.as_str()));
    assert_eq!(form.get("tt").map(String::as_str), Some("tok-42"));
    assert_eq!(form.get("locale").map(String::as_str), Some("en"));
}

#[tokio::test]
async fn test_token_form_without_token_never_submits() {
    let (listener, base) = bind().await;
    let submits = Hits::default();

    let app = Router::new()
        .route("/ssstik/", get(|| async { Html("<form><input name=\"id\"></form>") }))
        .route(
            "/ssstik/abc",
            post({
                let submits = submits.clone();
                move || async move {
                    submits.hit();
                    Html("")
                }
            }),
        );
    serve(listener, app);

    let err = gateway_for(config_for(&base))
        .retrieve(&RetrievalRequest::new(SOURCE, Strategy::TokenForm))
        .await
        .unwrap_err();

    assert!(matches!(err, RetrievalError::ExtractionFailed { .. }), "{err:?}");
    assert_eq!(submits.count(), 0);
}

#[tokio::test]
async fn test_download_error_status() {
    let (listener, base) = bind().await;

    let app = Router::new().route(
        "/dlpanda/",
        get(|| async { Html(r#"<a href="/tiktokcdn.com/video/gone.mp4">dl</a>"#) }),
    );
    serve(listener, app);

    let err = gateway_for(config_for(&base))
        .retrieve(&RetrievalRequest::new(SOURCE, Strategy::DirectRedirect))
        .await
        .unwrap_err();

    assert!(matches!(err, RetrievalError::DownloadFailed { .. }), "{err:?}");
    assert_eq!(err.upstream_status(), Some(404));
}

#[tokio::test]
async fn test_download_over_limit() {
    let (listener, base) = bind().await;

    let app = Router::new()
        .route(
            "/dlpanda/",
            get(|| async { Html(r#"<a href="/tiktokcdn.com/video/big.mp4">dl</a>"#) }),
        )
        .route("/tiktokcdn.com/video/big.mp4", get(|| async { video() }));
    serve(listener, app);

    let mut config = config_for(&base);
    config.max_artifact_bytes = 4;

    let err = gateway_for(config)
        .retrieve(&RetrievalRequest::new(SOURCE, Strategy::DirectRedirect))
        .await
        .unwrap_err();

    assert!(matches!(err, RetrievalError::DownloadFailed { .. }), "{err:?}");
}

#[tokio::test]
async fn test_invalid_input_makes_no_requests() {
    let (listener, base) = bind().await;
    let hits = Hits::default();

    let app = Router::new().fallback({
        let hits = hits.clone();
        move || async move {
            hits.hit();
            StatusCode::OK
        }
    });
    serve(listener, app);

    let gateway = gateway_for(config_for(&base));

    for strategy in Strategy::ALL {
        for source in ["", "not a url", "file:///etc/passwd"] {
            let err = gateway
                .retrieve(&RetrievalRequest::new(source, strategy))
                .await
                .unwrap_err();
            assert!(
                matches!(err, RetrievalError::InvalidInput(_)),
                "{strategy} {source:?}: {err:?}"
            );
        }
    }

    for strategy in [Strategy::FormPost, Strategy::TokenForm, Strategy::DirectRedirect] {
        let err = gateway
            .retrieve(&RetrievalRequest::new("https://example.com/v.mp4", strategy))
            .await
            .unwrap_err();
        assert!(matches!(err, RetrievalError::InvalidInput(_)), "{strategy}");
    }

    assert_eq!(hits.count(), 0);
}

#[tokio::test]
async fn test_unreachable_mirror() {
    let base = unreachable_base();

    let err = gateway_for(config_for(&base))
        .retrieve(&RetrievalRequest::new(SOURCE, Strategy::FormPost))
        .await
        .unwrap_err();

    assert!(
        matches!(err, RetrievalError::UpstreamUnreachable { .. }),
        "{err:?}"
    );
}

#[tokio::test]
async fn test_generative_strategy_has_no_link() {
    let (_listener, base) = bind().await;

    let err = gateway_for(config_for(&base))
        .extract_link(&RetrievalRequest::new(
            "https://example.com/photo.jpg",
            Strategy::GenerativeTransform,
        ))
        .await
        .unwrap_err();

    assert!(matches!(err, RetrievalError::InvalidInput(_)));
}

#[tokio::test]
async fn test_unsized_download_stops_at_limit() {
    const CHUNK: usize = 64 * 1024;
    const CHUNKS: usize = 1024;

    let (listener, base) = bind().await;
    let pulled = Arc::new(AtomicUsize::new(0));

    let app = Router::new()
        .route(
            "/dlpanda/",
            get(|| async { Html(r#"<a href="/tiktokcdn.com/video/endless.mp4">dl</a>"#) }),
        )
        .route(
            "/tiktokcdn.com/video/endless.mp4",
            get({
                let pulled = pulled.clone();
                move || async move {
                    let chunks = stream::iter(0..CHUNKS).map(move |_| {
                        pulled.fetch_add(1, Ordering::SeqCst);
                        Ok::<_, std::io::Error>(vec![0u8; CHUNK])
                    });
                    Response::builder()
                        .header(header::CONTENT_TYPE, "video/mp4")
                        .body(Body::from_stream(chunks))
                        .unwrap()
                }
            }),
        );
    serve(listener, app);

    let mut config = config_for(&base);
    config.max_artifact_bytes = 1024;

    let err = gateway_for(config)
        .retrieve(&RetrievalRequest::new(SOURCE, Strategy::DirectRedirect))
        .await
        .unwrap_err();

    assert!(matches!(err, RetrievalError::DownloadFailed { .. }), "{err:?}");
    assert!(err.to_string().contains("1024"), "{err}");
    // socket buffers hold a few MiB at most, the whole body is 64 MiB
    assert!(pulled.load(Ordering::SeqCst) < CHUNKS);
}

#[tokio::test]
async fn test_token_form_without_cdn_link() {
    let (listener, base) = bind().await;
    let downloads = Hits::default();

    let app = Router::new()
        .route(
            "/ssstik/",
            get(|| async { Html(r#"<input type="hidden" name="tt" value="tok-42">"#) }),
        )
        .route(
            "/ssstik/abc",
            post(|| async {
                Html(r#"<a href="https://other.example/v.mp4">mirror</a><p>Video not found</p>"#)
            }),
        )
        .route("/@user/video/7311", get(|| async { "video page" }))
        .fallback({
            let downloads = downloads.clone();
            move || async move {
                downloads.hit();
                StatusCode::NOT_FOUND
            }
        });
    serve(listener, app);

    let source = base.join("@user/video/7311").unwrap();
    let err = gateway_for(config_for(&base))
        .retrieve(&RetrievalRequest::new(source.as_str(), Strategy::TokenForm))
        .await
        .unwrap_err();

    assert!(
        matches!(
            err,
            RetrievalError::ExtractionFailed {
                upstream_status: None,
                ..
            }
        ),
        "{err:?}"
    );
    assert_eq!(downloads.count(), 0);
}

#[tokio::test]
async fn test_direct_redirect_without_location() {
    let (listener, base) = bind().await;
    let downloads = Hits::default();

    let app = Router::new()
        .route("/dlpanda/", get(|| async { StatusCode::FOUND }))
        .fallback({
            let downloads = downloads.clone();
            move || async move {
                downloads.hit();
                StatusCode::NOT_FOUND
            }
        });
    serve(listener, app);

    let err = gateway_for(config_for(&base))
        .retrieve(&RetrievalRequest::new(SOURCE, Strategy::DirectRedirect))
        .await
        .unwrap_err();

    assert!(matches!(err, RetrievalError::ExtractionFailed { .. }), "{err:?}");
    assert_eq!(err.upstream_status(), Some(302));
    assert_eq!(downloads.count(), 0);
}

#[tokio::test]
async fn test_slow_mirror_times_out() {
    let (listener, base) = bind().await;

    let app = Router::new().route(
        "/musicaldown/",
        post(|| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Html("<p>too late</p>")
        }),
    );
    serve(listener, app);

    let mut config = config_for(&base);
    config.http_timeout_secs = 1;

    let err = gateway_for(config)
        .retrieve(&RetrievalRequest::new(SOURCE, Strategy::FormPost))
        .await
        .unwrap_err();

    assert!(matches!(err, RetrievalError::UpstreamTimeout(_)), "{err:?}");
}
