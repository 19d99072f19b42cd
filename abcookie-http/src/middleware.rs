//! Resolves every experiment for each request and persists changes as
//! `Set-Cookie` headers on the response.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

use abcookie::{HeaderCookieJar, RequestContext};

use crate::AppState;

/// Axum middleware. Inserts the visitor's [`abcookie::Assignments`] into the
/// request extensions before the handler runs.
pub async fn assign_experiments(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let ctx = RequestContext::new(request.headers().clone(), request.uri().path());
    let mut jar = HeaderCookieJar::for_request(request.headers());

    let assignments = state
        .engine
        .assign(&ctx, &mut jar, state.reporter.as_deref());
    tracing::debug!(
        path = %ctx.path,
        resolved = assignments.len(),
        cookies_set = jar.set_cookie_values().len(),
        "experiments resolved"
    );
    request.extensions_mut().insert(assignments);

    let mut response = next.run(request).await;
    jar.apply(response.headers_mut());
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use abcookie::{AssignmentEngine, Assignments, Experiment, ExperimentSet, Variant};
    use axum::{body::Body, http::header::SET_COOKIE, routing::get, Extension, Router};
    use tower::ServiceExt;

    fn state() -> Arc<AppState> {
        let (set, _) = ExperimentSet::from_configs(vec![Experiment::new(
            "e1",
            "hero",
            vec![Variant::default(), Variant::default()],
        )]);
        Arc::new(AppState {
            engine: AssignmentEngine::new(set),
            reporter: None,
        })
    }

    #[tokio::test]
    async fn handler_sees_assignments_and_response_gets_cookie() {
        let state = state();
        let app = Router::new()
            .route(
                "/",
                get(|Extension(a): Extension<Assignments>| async move {
                    a.classes().join(" ")
                }),
            )
            .layer(axum::middleware::from_fn_with_state(
                state.clone(),
                assign_experiments,
            ));

        let req = axum::http::Request::builder()
            .uri("/")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();

        let cookie = resp.headers().get(SET_COOKIE).unwrap().to_str().unwrap();
        assert!(cookie.starts_with("exp-hero=e1."));
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        assert!(std::str::from_utf8(&body).unwrap().starts_with("exp-hero-"));
    }
}
