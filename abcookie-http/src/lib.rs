pub mod handlers;
pub mod middleware;

use std::sync::Arc;

use abcookie::{AssignmentEngine, ExposureReport, Reporter};
use axum::{routing::get, Router};
use tokio::sync::mpsc;

pub use middleware::assign_experiments;

pub struct AppState {
    pub engine: AssignmentEngine,
    /// Absent when no analytics surface is available.
    pub reporter: Option<Arc<dyn Reporter>>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(handlers::render_page))
        .route("/experiments", get(handlers::get_experiments))
        .layer(axum::middleware::from_fn_with_state(
            state,
            assign_experiments,
        ))
}

/// Drain exposure reports off the request path and log them. Delivery to a
/// concrete analytics backend plugs in here.
pub fn spawn_report_logger(
    mut rx: mpsc::Receiver<ExposureReport>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(report) = rx.recv().await {
            tracing::info!(
                tracking_id = %report.tracking_id,
                experiment = %report.experiment_name,
                exp = %report.exp,
                "exposure"
            );
        }
        tracing::debug!("report channel closed");
    })
}

pub async fn serve(state: Arc<AppState>, bind_addr: &str) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!("abcookie listening on {}", listener.local_addr()?);
    axum::serve(listener, router(state)).await
}
