//! Server-sent-events endpoint, one stream per source.
//!
//! | Route | Response |
//! |-------|----------|
//! | `GET /` | JSON array of source names |
//! | `GET /{source}` | `text/event-stream` of that source's events |
//!
//! Clients resume with the standard `Last-Event-ID` header, or with a
//! `last_event_id` query parameter when they cannot set headers.

use std::convert::Infallible;
use std::time::Duration;

use async_stream::stream;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures::{Stream, StreamExt};
use serde::Deserialize;
use tracing::{info, warn};

use crate::broker::Broker;
use crate::models::{EVENT_TYPE, Event};

const LAST_EVENT_ID: &str = "last-event-id";

#[derive(Clone)]
pub struct AppState {
    broker: Broker,
}

#[derive(Debug, Deserialize)]
struct ResumeQuery {
    last_event_id: Option<String>,
}

pub fn router(broker: Broker) -> Router {
    Router::new()
        .route("/", get(list_sources))
        .route("/{source}", get(stream_source))
        .route("/{source}/", get(stream_source))
        .with_state(AppState { broker })
}

async fn list_sources(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.broker.topics().to_vec())
}

async fn stream_source(
    State(state): State<AppState>,
    Path(source): Path<String>,
    Query(query): Query<ResumeQuery>,
    headers: HeaderMap,
) -> Response {
    let raw = headers
        .get(LAST_EVENT_ID)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
        .or(query.last_event_id);
    let last_seen = match parse_last_event_id(raw.as_deref()) {
        Ok(id) => id,
        Err(msg) => return (StatusCode::BAD_REQUEST, msg).into_response(),
    };

    let events = match state.broker.subscribe(&source, last_seen).await {
        Ok(Some(events)) => events,
        Ok(None) => {
            return (StatusCode::NOT_FOUND, format!("unknown source {source:?}")).into_response();
        }
        Err(e) => {
            warn!(%source, error = %e, "Subscription failed");
            return (StatusCode::SERVICE_UNAVAILABLE, "archive unavailable").into_response();
        }
    };
    info!(%source, ?last_seen, "Subscriber connected");

    Sse::new(to_sse(source, events))
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
        .into_response()
}

/// Blank means no checkpoint.
fn parse_last_event_id(raw: Option<&str>) -> Result<Option<i64>, String> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => s
            .parse::<i64>()
            .ok()
            .filter(|id| *id >= 0)
            .map(Some)
            .ok_or_else(|| format!("bad Last-Event-ID {s:?}")),
    }
}

fn sse_event(event: &Event) -> SseEvent {
    SseEvent::default()
        .id(event.id.to_string())
        .event(EVENT_TYPE)
        .data(event.data())
}

fn to_sse<S>(source: String, mut events: S) -> impl Stream<Item = Result<SseEvent, Infallible>>
where
    S: Stream<Item = crate::error::Result<Event>> + Unpin,
{
    stream! {
        while let Some(next) = events.next().await {
            match next {
                Ok(event) => yield Ok(sse_event(&event)),
                Err(e) => {
                    // The client reconnects with its Last-Event-ID.
                    warn!(%source, error = %e, "Ending subscription on archive error");
                    break;
                }
            }
        }
        info!(%source, "Subscriber stream closed");
    }
}

#[cfg(test)]
mod tests {
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;
    use crate::store::testing::{item, temp_store};

    async fn app() -> (Router, Broker, crate::store::Store, tempfile::TempDir) {
        let (store, dir) = temp_store().await;
        let broker = Broker::new(store.clone(), ["acme".to_string(), "other".to_string()], 16);
        (router(broker.clone()), broker, store, dir)
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[test]
    fn test_parse_last_event_id() {
        assert_eq!(parse_last_event_id(None), Ok(None));
        assert_eq!(parse_last_event_id(Some(" ")), Ok(None));
        assert_eq!(parse_last_event_id(Some("42")), Ok(Some(42)));
        assert!(parse_last_event_id(Some("abc")).is_err());
        assert!(parse_last_event_id(Some("-3")).is_err());
    }

    #[tokio::test]
    async fn test_lists_sources() {
        let (app, _broker, _store, _dir) = app().await;
        let resp = app.oneshot(get("/")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let names: Vec<String> = serde_json::from_slice(&body).unwrap();
        assert_eq!(names, ["acme", "other"]);
    }

    #[tokio::test]
    async fn test_unknown_source_is_404() {
        let (app, _broker, _store, _dir) = app().await;
        let resp = app.oneshot(get("/nobody")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_bad_last_event_id_is_400() {
        let (app, _broker, _store, _dir) = app().await;
        let req = Request::builder()
            .uri("/acme")
            .header(LAST_EVENT_ID, "yesterday")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let (app, _broker, _store, _dir) = self::app().await;
        let resp = app.oneshot(get("/acme?last_event_id=x")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_stream_replays_from_checkpoint() {
        let (app, broker, store, _dir) = app().await;
        for n in 1..=3 {
            store.stash(&item("acme", n)).await.unwrap();
        }

        let req = Request::builder()
            .uri("/acme/")
            .header(LAST_EVENT_ID, "1")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers().get("content-type").unwrap(),
            "text/event-stream"
        );

        // Closing the broker ends the stream so the body can be collected.
        broker.close();
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("id: 2\n"));
        assert!(text.contains("id: 3\n"));
        assert!(!text.contains("id: 1\n"));
        assert!(text.contains("event: press_release\n"));
        assert!(text.contains(r#""permalink":"http://acme.example/pr/3""#));
    }
}
