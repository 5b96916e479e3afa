use axum::{
    Router,
    http::{HeaderName, HeaderValue, Method},
    routing::{get, post},
};
use tower_http::{
    cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use neonvend_core::api::routes::{hardware, health, vending};

use crate::AppState;
use crate::handlers;
use crate::infra::config::CorsConfig;

/// Kiosk and hardware endpoints.
pub fn create_api_router() -> Router<AppState> {
    Router::new()
        .route(vending::SESSION_CREATE, post(handlers::session::create_session))
        .route(vending::STATUS, get(handlers::status::machine_status))
        .route(vending::LOCK, post(handlers::lock::lock_machine))
        .route(vending::BUY, post(handlers::buy::buy_voucher))
        .route(hardware::COIN, post(handlers::hardware::receive_coin))
}

/// Full application: probes, API routes and middleware.
pub fn create_app(state: AppState) -> Router {
    let cors_layer = if state.config().dev_mode {
        CorsLayer::permissive()
    } else {
        cors_from_config(&state.config().cors)
    };

    Router::new()
        .route(health::PING, get(handlers::health::ping))
        .route(health::HEALTH, get(handlers::health::health))
        .merge(create_api_router())
        .layer(cors_layer)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_from_config(cors: &CorsConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = cors
        .allowed_origins
        .iter()
        .filter_map(|s| HeaderValue::from_str(s).ok())
        .collect();
    let allow_origin = if origins.is_empty() {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(origins)
    };

    // Both lists were validated during config load.
    let methods: Vec<Method> = cors
        .allowed_methods
        .iter()
        .filter_map(|m| Method::from_bytes(m.as_bytes()).ok())
        .collect();
    let headers: Vec<HeaderName> = cors
        .allowed_headers
        .iter()
        .filter_map(|h| HeaderName::from_bytes(h.as_bytes()).ok())
        .collect();

    let layer = CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(AllowMethods::list(methods))
        .allow_headers(AllowHeaders::list(headers));

    if cors.allow_credentials {
        layer.allow_credentials(true)
    } else {
        layer
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, header};
    use neonvend_core::{InMemoryLedgerStore, ManualClock};
    use tower::ServiceExt;

    use super::*;
    use crate::infra::config::{ConfigMetadata, loader::compose, sources::EnvConfig};
    use crate::infra::startup::build_state;

    fn app(origins: &[&str]) -> Router {
        let env = EnvConfig {
            store: Some("memory".into()),
            hmac_secret: Some("routes-test-hmac-secret".into()),
            cors_allowed_origins: Some(origins.iter().map(|o| o.to_string()).collect()),
            dev_mode: Some(false),
            ..EnvConfig::default()
        };
        let config = compose(None, env, ConfigMetadata::default()).unwrap().config;
        let state = build_state(
            Arc::new(config),
            Arc::new(InMemoryLedgerStore::new()),
            Arc::new(ManualClock::starting_now()),
        )
        .unwrap();
        create_app(state)
    }

    fn preflight(origin: &str) -> Request<Body> {
        Request::builder()
            .method(Method::OPTIONS)
            .uri(vending::LOCK)
            .header(header::ORIGIN, origin)
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn preflight_allows_listed_origin() {
        let response = app(&["https://kiosk.example"])
            .oneshot(preflight("https://kiosk.example"))
            .await
            .unwrap();

        assert_eq!(
            response.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN),
            Some(&HeaderValue::from_static("https://kiosk.example"))
        );
    }

    #[tokio::test]
    async fn preflight_ignores_unlisted_origin() {
        let response = app(&["https://kiosk.example"])
            .oneshot(preflight("https://evil.example"))
            .await
            .unwrap();

        assert!(
            response
                .headers()
                .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
                .is_none()
        );
    }

    #[tokio::test]
    async fn unknown_route_is_not_found() {
        let response = app(&[])
            .oneshot(Request::builder().uri("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::NOT_FOUND);
    }
}
