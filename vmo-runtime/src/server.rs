//! Management HTTP server: liveness and metrics
use crate::{controller::Context, Error, Result};
use axum::{extract::State, http::StatusCode, routing::get, Router};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::Api;
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use vmo_core::names::CRD_NAME;

/// Routes served on the management port
pub fn router(ctx: Arc<Context>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .with_state(ctx)
}

/// Serve the management routes on `port` until `token` fires
pub async fn serve(ctx: Arc<Context>, port: u16, token: CancellationToken) -> Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await.map_err(Error::Server)?;
    info!(port, "management server listening");
    axum::serve(listener, router(ctx))
        .with_graceful_shutdown(token.cancelled_owned())
        .await
        .map_err(Error::Server)
}

async fn health(State(ctx): State<Arc<Context>>) -> (StatusCode, &'static str) {
    let stall = Duration::from_secs(ctx.config.current().queue_stall_seconds);
    if ctx.backlog.is_stalled(stall) {
        warn!(backlog = ctx.backlog.len(), "reconciliation stalled");
        return (StatusCode::INTERNAL_SERVER_ERROR, "reconciliation stalled");
    }
    let crds: Api<CustomResourceDefinition> = Api::all(ctx.client.clone());
    if let Err(error) = crds.get(CRD_NAME).await {
        warn!(%error, "custom resource definition not available");
        return (StatusCode::INTERNAL_SERVER_ERROR, "custom resource definition not available");
    }
    (StatusCode::OK, "ok")
}

async fn metrics(State(ctx): State<Arc<Context>>) -> (StatusCode, String) {
    ctx.metrics.set_queue_depth(ctx.backlog.len());
    match ctx.metrics.render() {
        Ok(text) => (StatusCode::OK, text),
        Err(error) => (StatusCode::INTERNAL_SERVER_ERROR, error.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{cache::stores, fake::ApiServer, Context, LiveConfig, Metrics, SearchClient, Settings};
    use axum::{body::Body, http::Request};
    use http_body_util::BodyExt;
    use kube::CustomResourceExt;
    use tower::ServiceExt;
    use vmo_core::VerrazzanoMonitoringInstance;

    fn context(server: &ApiServer) -> Arc<Context> {
        let (caches, _writers) = stores();
        Arc::new(Context::new(
            server.client(),
            caches,
            LiveConfig::default(),
            Metrics::new().unwrap(),
            SearchClient::new(Duration::from_secs(1)).unwrap(),
            Settings::default(),
        ))
    }

    async fn call(ctx: Arc<Context>, path: &str) -> (StatusCode, String) {
        let request = Request::get(path).body(Body::empty()).unwrap();
        let response = router(ctx).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8_lossy(&bytes).into_owned())
    }

    #[tokio::test]
    async fn healthy_with_registered_definition() {
        let server = ApiServer::new();
        server.insert(&VerrazzanoMonitoringInstance::crd());
        assert_eq!(call(context(&server), "/health").await, (StatusCode::OK, "ok".into()));
    }

    #[tokio::test]
    async fn unhealthy_without_definition() {
        let server = ApiServer::new();
        let (status, _) = call(context(&server), "/health").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_backlog_is_unhealthy() {
        let server = ApiServer::new();
        server.insert(&VerrazzanoMonitoringInstance::crd());
        let ctx = context(&server);
        ctx.backlog.triggered("monitoring/system".into());
        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(call(ctx.clone(), "/health").await.0, StatusCode::OK);
        tokio::time::advance(Duration::from_secs(31)).await;
        let (status, body) = call(ctx.clone(), "/health").await;
        assert_eq!((status, body.as_str()), (StatusCode::INTERNAL_SERVER_ERROR, "reconciliation stalled"));

        // a pass picking the instance up clears the condition
        ctx.backlog.picked_up("monitoring/system");
        assert_eq!(call(ctx, "/health").await.0, StatusCode::OK);
    }

    #[tokio::test]
    async fn metrics_are_exposed() {
        let server = ApiServer::new();
        let ctx = context(&server);
        ctx.metrics.step_finished("services", true);
        let (status, body) = call(ctx, "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains(r#"vmo_reconcile_total{step="services"} 1"#));
        assert!(body.contains("vmo_queue_depth 0"));
    }
}
