//! `GET /history`.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use tracing::{debug, error, warn};

use crate::storage::{HistoryRecord, HistoryStore, Page, PageError};

/// Shared state for the history routes.
#[derive(Clone)]
pub struct HistoryState {
    pub store: Arc<dyn HistoryStore>,
    pub max_limit: u64,
}

pub fn router(state: HistoryState) -> Router {
    Router::new()
        .route("/history", get(get_history))
        .with_state(state)
}

/// The value of `name`, rejecting a key that appears more than once.
fn single<'a>(
    params: &'a [(String, String)],
    name: &'static str,
) -> Result<Option<&'a str>, PageError> {
    let mut values = params
        .iter()
        .filter(|(key, _)| key == name)
        .map(|(_, value)| value.as_str());
    let first = values.next();
    if values.next().is_some() {
        return Err(PageError::Repeated(name));
    }
    Ok(first)
}

fn parse_page(params: &[(String, String)], max_limit: u64) -> Result<Page, PageError> {
    Page::parse(single(params, "skip")?, single(params, "limit")?, max_limit)
}

// Parameters arrive as raw pairs; validation happens in `parse_page` so every
// bad value yields 406 rather than the extractor's 400.
async fn get_history(
    State(state): State<HistoryState>,
    Query(params): Query<Vec<(String, String)>>,
) -> Result<Json<Vec<HistoryRecord>>, (StatusCode, String)> {
    let page = parse_page(&params, state.max_limit).map_err(|e| {
        warn!(error = %e, "Rejected history query");
        (StatusCode::NOT_ACCEPTABLE, e.to_string())
    })?;

    let records = state.store.query(page).await.map_err(|e| {
        error!(error = %e, skip = page.skip, limit = page.limit, "Failed to query history");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to query history".to_string(),
        )
    })?;

    debug!(skip = page.skip, limit = page.limit, count = records.len(), "Served history page");
    Ok(Json(records))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryHistoryStore;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use axum::response::Response;
    use tower::ServiceExt;

    async fn state_with(paths: &[&str]) -> (HistoryState, Arc<MemoryHistoryStore>) {
        let store = Arc::new(MemoryHistoryStore::new());
        for path in paths {
            store
                .insert(&HistoryRecord {
                    video_path: path.to_string(),
                })
                .await
                .unwrap();
        }
        let state = HistoryState {
            store: store.clone(),
            max_limit: 100,
        };
        (state, store)
    }

    async fn get(state: HistoryState, uri: &str) -> Response {
        router(state)
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_returns_window_in_order() {
        let (state, _) = state_with(&["a.mp4", "b.mp4", "c.mp4"]).await;

        let response = get(state, "/history?skip=1&limit=1").await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            json_body(response).await,
            serde_json::json!([{ "videoPath": "b.mp4" }])
        );
    }

    #[tokio::test]
    async fn test_empty_history_is_empty_array() {
        let (state, _) = state_with(&[]).await;

        let response = get(state, "/history?skip=0&limit=10").await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await, serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_non_numeric_parameter_is_not_acceptable() {
        let (state, _) = state_with(&["a.mp4"]).await;

        let response = get(state, "/history?skip=abc&limit=10").await;

        assert_eq!(response.status(), StatusCode::NOT_ACCEPTABLE);
    }

    #[tokio::test]
    async fn test_negative_parameter_is_not_acceptable() {
        let (state, _) = state_with(&["a.mp4"]).await;

        let response = get(state, "/history?skip=0&limit=-1").await;

        assert_eq!(response.status(), StatusCode::NOT_ACCEPTABLE);
    }

    #[tokio::test]
    async fn test_missing_parameter_is_not_acceptable() {
        let (state, _) = state_with(&["a.mp4"]).await;

        let response = get(state, "/history?skip=0").await;

        assert_eq!(response.status(), StatusCode::NOT_ACCEPTABLE);
    }

    #[tokio::test]
    async fn test_repeated_parameter_is_not_acceptable() {
        let (state, _) = state_with(&["a.mp4"]).await;

        let response = get(state, "/history?skip=0&skip=1&limit=1").await;

        assert_eq!(response.status(), StatusCode::NOT_ACCEPTABLE);
    }

    #[tokio::test]
    async fn test_huge_skip_is_an_empty_page() {
        let (state, _) = state_with(&["a.mp4"]).await;

        let response = get(state, "/history?skip=18446744073709551615&limit=1").await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await, serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_limit_is_capped() {
        let (mut state, _) = state_with(&["a", "b", "c", "d"]).await;
        state.max_limit = 2;

        let response = get(state, "/history?skip=0&limit=50").await;

        assert_eq!(
            json_body(response).await,
            serde_json::json!([{ "videoPath": "a" }, { "videoPath": "b" }])
        );
    }

    #[tokio::test]
    async fn test_store_failure_is_internal_error() {
        let (state, store) = state_with(&["a.mp4"]).await;
        store.set_fail_on_query(true).await;

        let response = get(state, "/history?skip=0&limit=10").await;

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
