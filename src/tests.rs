#[cfg(test)]
mod integration_tests {
    use crate::renderer::MockRenderer;
    use crate::{router, AppState, Config, RenderError, SessionStatus};
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use axum::response::Response;
    use axum::Router;
    use http_body_util::BodyExt;
    use serde_json::Value;
    use std::sync::Arc;
    use tower::ServiceExt;

    const FAKE_PNG: &[u8] = b"\x89PNG\r\n\x1a\nfake-image-bytes";

    fn keyed_config() -> Config {
        let mut config = Config::default();
        config.auth.api_key = Some("secret".to_string());
        config.auth.allowed_origins = vec!["example.com".to_string()];
        config
    }

    fn app(config: Config, renderer: MockRenderer) -> (Router, Arc<AppState>) {
        let state = Arc::new(AppState::new(config, Arc::new(renderer), None));
        (router(state.clone()), state)
    }

    fn rendering(times: usize) -> MockRenderer {
        let mut renderer = MockRenderer::new();
        renderer
            .expect_render()
            .times(times)
            .returning(|_| Ok(FAKE_PNG.to_vec()));
        renderer
    }

    async fn get(app: &Router, uri: &str, referer: Option<&str>) -> Response {
        let mut request = Request::builder().uri(uri);
        if let Some(referer) = referer {
            request = request.header(header::REFERER, referer);
        }
        app.clone()
            .oneshot(request.body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    async fn post(app: &Router, uri: &str) -> Response {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        app.clone().oneshot(request).await.unwrap()
    }

    async fn body_bytes(response: Response) -> Vec<u8> {
        response
            .into_body()
            .collect()
            .await
            .unwrap()
            .to_bytes()
            .to_vec()
    }

    async fn body_json(response: Response) -> Value {
        serde_json::from_slice(&body_bytes(response).await).unwrap()
    }

    #[tokio::test]
    async fn test_screenshot_is_rendered_once_then_cached() {
        let (app, state) = app(keyed_config(), rendering(1));
        let uri = "/api/screenshot?url=https://example.com&width=800&height=600&scale=1&type=png&key=secret";

        let first = get(&app, uri, None).await;
        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(first.headers()[header::CONTENT_TYPE], "image/png");
        assert_eq!(first.headers()["x-cache"], "MISS");
        assert_eq!(
            first.headers()[header::CONTENT_DISPOSITION],
            "inline; filename=\"https___example.com_.png\""
        );
        assert_eq!(first.headers()[header::CACHE_CONTROL], "public, max-age=3600");
        let length: usize = first.headers()[header::CONTENT_LENGTH]
            .to_str()
            .unwrap()
            .parse()
            .unwrap();
        let first_body = body_bytes(first).await;
        assert_eq!(length, first_body.len());
        assert_eq!(first_body, FAKE_PNG);

        let second = get(&app, uri, None).await;
        assert_eq!(second.status(), StatusCode::OK);
        assert_eq!(second.headers()["x-cache"], "HIT");
        assert_eq!(body_bytes(second).await, first_body);
        assert_eq!(state.cache.len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_url_is_rejected_before_auth() {
        let (app, _) = app(keyed_config(), rendering(0));

        let response = get(&app, "/api/screenshot?url=not-a-url", None).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = body_json(response).await;
        assert_eq!(body["message"], "Invalid query parameters");
        assert_eq!(body["error"]["issues"][0]["path"][0], "url");
    }

    #[tokio::test]
    async fn test_missing_url_is_rejected() {
        let (app, _) = app(keyed_config(), rendering(0));

        let response = get(&app, "/api/screenshot?key=secret", None).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"]["issues"][0]["message"], "Required");
    }

    #[tokio::test]
    async fn test_width_without_height() {
        let (app, _) = app(keyed_config(), rendering(0));

        let response = get(
            &app,
            "/api/screenshot?url=https://example.com&width=800&key=secret",
            None,
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = body_json(response).await;
        let issues = body["error"]["issues"].as_array().unwrap();
        assert!(issues.iter().any(|issue| issue["path"][0] == "height"));
    }

    #[tokio::test]
    async fn test_unauthorized_without_key_or_allowed_referer() {
        let (app, _) = app(keyed_config(), rendering(0));
        let uri = "/api/screenshot?url=https://example.com";

        for referer in [None, Some("https://evil.test/page"), Some("garbage")] {
            let response = get(&app, uri, referer).await;
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
            assert_eq!(body_json(response).await["message"], "Unauthorized");
        }

        let response = get(&app, "/api/screenshot?url=https://example.com&key=wrong", None).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_allowed_referer_is_authorized() {
        let (app, _) = app(keyed_config(), rendering(1));

        let response = get(
            &app,
            "/api/screenshot?url=https://target.test",
            Some("https://example.com/gallery"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_bypass_authorizes_everything() {
        let mut config = Config::default();
        config.auth.bypass = true;
        let (app, _) = app(config, rendering(1));

        let response = get(&app, "/api/screenshot?url=https://example.com", None).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_render_failure_is_opaque_and_not_cached() {
        let mut renderer = MockRenderer::new();
        renderer
            .expect_render()
            .times(2)
            .returning(|_| Err(RenderError::NavigationFailed("net::ERR_NAME_NOT_RESOLVED".into())));
        let (app, state) = app(keyed_config(), renderer);
        let uri = "/api/screenshot?url=https://unresolvable.test&key=secret";

        for _ in 0..2 {
            let response = get(&app, uri, None).await;
            assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
            let body = body_bytes(response).await;
            let text = String::from_utf8(body).unwrap();
            assert_eq!(text, r#"{"error":"Failed to generate screenshot"}"#);
        }
        assert!(state.cache.is_empty());
    }

    #[tokio::test]
    async fn test_ignored_quality_shares_cache_entry() {
        let (app, _) = app(keyed_config(), rendering(1));

        let low = get(&app, "/api/screenshot?url=https://example.com&quality=10&key=secret", None).await;
        let high = get(&app, "/api/screenshot?url=https://example.com&quality=90&key=secret", None).await;

        assert_eq!(low.headers()["x-cache"], "MISS");
        assert_eq!(high.headers()["x-cache"], "HIT");
    }

    #[tokio::test]
    async fn test_requested_format_reaches_renderer() {
        let mut renderer = MockRenderer::new();
        renderer
            .expect_render()
            .withf(|request| {
                request.format == crate::OutputFormat::Webp
                    && request.viewport.width == 800
                    && request.viewport.height == 600
                    && request.quality == 70
                    && request.full_page
            })
            .times(1)
            .returning(|_| Ok(b"RIFF....WEBP".to_vec()));
        let (app, _) = app(keyed_config(), renderer);

        let response = get(
            &app,
            "/api/screenshot?url=https://example.com&width=800&height=600&quality=70&fullPage=1&type=webp&key=secret",
            None,
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/webp");
        assert!(response.headers()[header::CONTENT_DISPOSITION]
            .to_str()
            .unwrap()
            .ends_with(".webp\""));
    }

    #[tokio::test]
    async fn test_full_page_uses_string_truthiness() {
        let mut renderer = MockRenderer::new();
        renderer
            .expect_render()
            .withf(|request| request.full_page)
            .times(1)
            .returning(|_| Ok(FAKE_PNG.to_vec()));
        renderer
            .expect_render()
            .withf(|request| !request.full_page)
            .times(1)
            .returning(|_| Ok(FAKE_PNG.to_vec()));
        let (app, _) = app(keyed_config(), renderer);

        let truthy = get(&app, "/api/screenshot?url=https://example.com&fullPage=false&key=secret", None).await;
        assert_eq!(truthy.status(), StatusCode::OK);

        let empty = get(&app, "/api/screenshot?url=https://example.com&fullPage=&key=secret", None).await;
        assert_eq!(empty.status(), StatusCode::OK);
        assert_eq!(empty.headers()["x-cache"], "MISS");
    }

    #[tokio::test]
    async fn test_revalidate_drops_cached_renders() {
        let (app, state) = app(keyed_config(), rendering(2));
        let uri = "/api/screenshot?url=https://example.com&key=secret";

        get(&app, uri, None).await;
        assert_eq!(state.cache.len(), 1);

        let denied = post(&app, "/api/revalidate?url=https://example.com").await;
        assert_eq!(denied.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(state.cache.len(), 1);

        let bad = post(&app, "/api/revalidate?url=ftp://example.com&key=secret").await;
        assert_eq!(bad.status(), StatusCode::BAD_REQUEST);

        let response = post(&app, "/api/revalidate?url=https://example.com&key=secret").await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["revalidated"], true);
        assert_eq!(body["removed"], 1);
        assert!(state.cache.is_empty());

        let again = get(&app, uri, None).await;
        assert_eq!(again.headers()["x-cache"], "MISS");
    }

    #[tokio::test]
    async fn test_healthz_reports_browser_and_cache() {
        let mut renderer = MockRenderer::new();
        renderer.expect_status().returning(SessionStatus::default);
        let (app, _) = app(keyed_config(), renderer);

        let response = get(&app, "/healthz", None).await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["cache_entries"], 0);
        assert_eq!(body["browser"]["launched"], false);
    }

    #[tokio::test]
    async fn test_metrics_disabled_is_not_found() {
        let (app, _) = app(keyed_config(), MockRenderer::new());
        let response = get(&app, "/metrics", None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_index_page() {
        let (app, _) = app(keyed_config(), MockRenderer::new());

        let response = get(&app, "/", None).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/html"));
        let html = String::from_utf8(body_bytes(response).await).unwrap();
        assert!(html.contains("Screenshot Maker"));
    }

    #[test]
    fn test_url_builder_matches_endpoint() {
        let link = crate::ScreenshotUrlBuilder::new("https://example.com")
            .format(crate::OutputFormat::Jpeg)
            .build("http://localhost:3000")
            .unwrap();
        assert_eq!(link.path(), "/api/screenshot");
        assert_eq!(
            link.query(),
            Some("url=https%3A%2F%2Fexample.com&type=jpeg")
        );
    }
}
