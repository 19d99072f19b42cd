use axum::{response::Html, Extension, Json};

use abcookie::Assignments;

/// The visitor's resolved experiments as JSON.
pub async fn get_experiments(Extension(assignments): Extension<Assignments>) -> Json<Assignments> {
    Json(assignments)
}

/// Minimal page carrying the display classes on `<body>` and the resolved map
/// for client-side code.
pub async fn render_page(Extension(assignments): Extension<Assignments>) -> Html<String> {
    let classes = assignments.classes().join(" ");
    let data = serde_json::to_string(&assignments).unwrap_or_else(|e| {
        tracing::warn!("failed to serialize assignments: {}", e);
        "{}".to_string()
    });
    // Keep the JSON from closing the script element early.
    let data = data.replace("</", "<\\/");
    Html(format!(
        "<!doctype html>\n<html><body class=\"{}\">\n<script id=\"experiments\" type=\"application/json\">{}</script>\n</body></html>\n",
        classes, data
    ))
}
