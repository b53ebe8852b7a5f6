//! Xtream Codes panels served by a local mock

mod common;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use ativeplay_sync::services::http::RetryPolicy;
use ativeplay_sync::services::records::RawTime;
use ativeplay_sync::services::xtream::{XtreamClient, XtreamCredentials};
use ativeplay_sync::{DropReason, DropReport, PersistencePort, PlaylistSource, SyncError, SyncStatus};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{TimeZone, Utc};
use serde_json::json;

#[derive(Default)]
struct Panel {
    reject: bool,
    forbid: bool,
    /// Number of auth calls answered with a 429 before succeeding
    rate_limited_auth: AtomicUsize,
    /// Number of auth calls answered with a 500 before succeeding
    failing_auth: AtomicUsize,
    guide_down: AtomicBool,
    auth_hits: AtomicUsize,
    api_hits: AtomicUsize,
}

async fn player_api(State(panel): State<Arc<Panel>>, Query(params): Query<HashMap<String, String>>) -> Response {
    panel.api_hits.fetch_add(1, Ordering::SeqCst);
    if panel.reject {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    if panel.forbid {
        return StatusCode::FORBIDDEN.into_response();
    }

    match params.get("action").map(String::as_str) {
        None => {
            panel.auth_hits.fetch_add(1, Ordering::SeqCst);
            let limited = panel.rate_limited_auth.load(Ordering::SeqCst);
            if limited > 0 {
                panel.rate_limited_auth.store(limited - 1, Ordering::SeqCst);
                return (StatusCode::TOO_MANY_REQUESTS, [("retry-after", "1")]).into_response();
            }
            let failing = panel.failing_auth.load(Ordering::SeqCst);
            if failing > 0 {
                panel.failing_auth.store(failing - 1, Ordering::SeqCst);
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
            Json(json!({
                "user_info": {"username": "demo", "auth": 1, "status": "Active", "exp_date": "1900000000"},
                "server_info": {"url": "panel", "port": "80", "timezone": "UTC"}
            }))
            .into_response()
        }
        Some("get_live_categories") => Json(json!([
            {"category_id": "1", "category_name": "UK News"},
            {"category_id": "2", "category_name": "Sport"}
        ]))
        .into_response(),
        // Ids as strings and numbers, plus one element without a stream id
        Some("get_live_streams") => Json(json!([
            {"num": 1, "name": "BBC One", "stream_id": "101", "epg_channel_id": "bbc1.uk",
             "category_id": "1", "tv_archive": 1, "tv_archive_duration": "7"},
            {"num": 2, "name": "Sky Sports", "stream_id": 102, "category_id": 2},
            {"num": 3, "name": "Broken"}
        ]))
        .into_response(),
        Some("get_series_categories") => Json(json!([
            {"category_id": "4", "category_name": "Factual"}
        ]))
        .into_response(),
        Some("get_short_epg") | Some("get_simple_data_table") => Json(json!({"epg_listings": [
            {"title": "TW9ybmluZyBoZWFkbGluZXM=", "description": "",
             "start_timestamp": "1760868000", "stop_timestamp": "1760871600"},
            {"title": "", "start_timestamp": "1760871600", "stop_timestamp": "1760875200"}
        ]}))
        .into_response(),
        Some("get_series") => Json(json!({
            "9": {"series_id": "9", "name": "Dragons' Den", "category_id": "4"}
        }))
        .into_response(),
        Some(_) => Json(json!([])).into_response(),
    }
}

async fn xmltv(State(panel): State<Arc<Panel>>) -> Response {
    if panel.guide_down.load(Ordering::SeqCst) {
        return StatusCode::NOT_FOUND.into_response();
    }
    ([("content-type", "application/xml")], common::GUIDE_XML).into_response()
}

async fn start(panel: Panel) -> (String, Arc<Panel>) {
    let panel = Arc::new(panel);
    let app = Router::new()
        .route("/player_api.php", get(player_api))
        .route("/xmltv.php", get(xmltv))
        .with_state(panel.clone());
    (common::serve(app).await, panel)
}

fn source(base: &str) -> PlaylistSource {
    PlaylistSource::Xtream(XtreamCredentials::new(base, "demo", "secret"))
}

#[tokio::test]
async fn rejected_credentials_fail_without_retry() {
    let (base, panel) = start(Panel {
        reject: true,
        ..Default::default()
    })
    .await;
    let (engine, store) = common::engine(&common::test_config());
    let playlist = engine.import("Panel", source(&base)).await.unwrap();

    let result = engine.sync(playlist.id).await;
    assert!(matches!(result, Err(SyncError::Auth(_))), "got {:?}", result);
    assert_eq!(panel.api_hits.load(Ordering::SeqCst), 1);

    let playlist = store.load_playlist(playlist.id).await.unwrap().unwrap();
    assert_eq!(playlist.status, SyncStatus::Error);
    assert!(playlist.last_error.is_some());
    assert!(playlist.last_synced_at.is_none());
}

#[tokio::test]
async fn catalog_and_guide_are_synced() {
    let (base, _panel) = start(Panel::default()).await;
    let (engine, store) = common::engine(&common::test_config());
    let playlist = engine.import("Panel", source(&base)).await.unwrap();

    let changeset = engine.sync(playlist.id).await.unwrap();
    assert_eq!(changeset.channels.added.len(), 2);
    assert!(changeset.channels.added.contains("xt-101"));
    assert!(changeset.categories.added.contains("xt-1"));
    assert_eq!(changeset.epg.added.len(), 2);

    let snapshot = store.load_snapshot(playlist.id).await.unwrap();
    let bbc = snapshot.channels.get("xt-101").unwrap();
    assert_eq!(bbc.category_id, "xt-1");
    assert_eq!(bbc.catchup.as_ref().and_then(|c| c.days), Some(7));

    let stored = store.load_playlist(playlist.id).await.unwrap().unwrap();
    assert_eq!(stored.status, SyncStatus::Idle);
    assert_eq!(stored.dropped_records, 1);

    let at = Utc.with_ymd_and_hms(2026, 10, 19, 10, 30, 0).unwrap();
    let (current, next) = engine.current_and_next(playlist.id, "xt-101", at).await.unwrap();
    assert_eq!(current.unwrap().title, "Breakfast");
    assert_eq!(next.unwrap().title, "Homes Under the Hammer");

    // Same source again: nothing to write
    let again = engine.sync(playlist.id).await.unwrap();
    assert!(again.is_empty(), "unexpected changes: {:?}", again);
}

#[tokio::test]
async fn server_errors_are_retried() {
    let (base, panel) = start(Panel {
        failing_auth: AtomicUsize::new(2),
        ..Default::default()
    })
    .await;
    let (engine, _store) = common::engine(&common::test_config());
    let playlist = engine.import("Panel", source(&base)).await.unwrap();

    let changeset = engine.sync(playlist.id).await.unwrap();
    assert_eq!(changeset.channels.added.len(), 2);
    assert_eq!(panel.auth_hits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn exhausted_retries_surface_as_transient() {
    let (base, panel) = start(Panel {
        failing_auth: AtomicUsize::new(10),
        ..Default::default()
    })
    .await;
    let (engine, store) = common::engine(&common::test_config());
    let playlist = engine.import("Panel", source(&base)).await.unwrap();

    let result = engine.sync(playlist.id).await;
    assert!(
        matches!(result, Err(SyncError::TransientNetwork { attempts: 3, .. })),
        "got {:?}",
        result
    );
    assert_eq!(panel.auth_hits.load(Ordering::SeqCst), 3);
    let stored = store.load_playlist(playlist.id).await.unwrap().unwrap();
    assert_eq!(stored.status, SyncStatus::Error);
}

#[tokio::test]
async fn forbidden_account_fails_without_retry() {
    let (base, panel) = start(Panel {
        forbid: true,
        ..Default::default()
    })
    .await;
    let (engine, _store) = common::engine(&common::test_config());
    let playlist = engine.import("Panel", source(&base)).await.unwrap();

    let result = engine.sync(playlist.id).await;
    assert!(matches!(result, Err(SyncError::Auth(_))), "got {:?}", result);
    assert_eq!(panel.api_hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn rate_limit_is_retried_once() {
    let (base, panel) = start(Panel {
        rate_limited_auth: AtomicUsize::new(1),
        ..Default::default()
    })
    .await;
    let (engine, _store) = common::engine(&common::test_config());
    let playlist = engine.import("Panel", source(&base)).await.unwrap();

    let changeset = engine.sync(playlist.id).await.unwrap();
    assert_eq!(changeset.channels.added.len(), 2);
    assert_eq!(panel.auth_hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn second_rate_limit_fails_the_cycle() {
    let (base, panel) = start(Panel {
        rate_limited_auth: AtomicUsize::new(10),
        ..Default::default()
    })
    .await;
    let (engine, store) = common::engine(&common::test_config());
    let playlist = engine.import("Panel", source(&base)).await.unwrap();

    let result = engine.sync(playlist.id).await;
    assert!(
        matches!(result, Err(SyncError::TransientNetwork { attempts: 2, .. })),
        "got {:?}",
        result
    );
    // One retry only, even though the policy allows more for server errors
    assert_eq!(panel.auth_hits.load(Ordering::SeqCst), 2);
    let stored = store.load_playlist(playlist.id).await.unwrap().unwrap();
    assert_eq!(stored.status, SyncStatus::Error);
}

#[tokio::test]
async fn guide_outage_keeps_previous_programmes() {
    let (base, panel) = start(Panel::default()).await;
    let (engine, store) = common::engine(&common::test_config());
    let playlist = engine.import("Panel", source(&base)).await.unwrap();

    engine.sync(playlist.id).await.unwrap();
    assert_eq!(store.load_snapshot(playlist.id).await.unwrap().epg.len(), 2);

    panel.guide_down.store(true, Ordering::SeqCst);
    let changeset = engine.sync(playlist.id).await.unwrap();
    assert!(changeset.epg.removed.is_empty());
    assert_eq!(store.load_snapshot(playlist.id).await.unwrap().epg.len(), 2);
}

#[tokio::test]
async fn get_php_link_is_imported_as_panel() {
    let (base, panel) = start(Panel::default()).await;
    let (engine, _store) = common::engine(&common::test_config());
    let link = format!("{}/get.php?username=demo&password=secret&type=m3u_plus&output=ts", base);

    let playlist = engine.import_url("Panel", &link).await.unwrap();
    assert_eq!(playlist.source, source(&base));

    engine.sync(playlist.id).await.unwrap();
    assert_eq!(panel.auth_hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn per_channel_guide_and_series_listing() {
    let (base, _panel) = start(Panel::default()).await;
    let client = XtreamClient::new(
        reqwest::Client::new(),
        XtreamCredentials::new(&base, "demo", "secret"),
        RetryPolicy::none(),
    );

    let mut report = DropReport::new();
    let programmes = client.channel_programmes(101, "bbc1.uk", &mut report).await.unwrap();
    assert_eq!(programmes.len(), 1);
    assert_eq!(programmes[0].title, "Morning headlines");
    assert_eq!(programmes[0].channel_ref, "bbc1.uk");
    assert_eq!(programmes[0].start, RawTime::Unix(1760868000));
    assert_eq!(report.count(DropReason::MalformedRecord), 1);

    let short = client.short_epg(101, Some(2)).await.unwrap();
    assert_eq!(short.epg_listings.len(), 2);

    let categories = client.series_categories().await.unwrap();
    assert_eq!(categories.items.len(), 1);
    assert_eq!(categories.items[0].category_name, "Factual");

    let series = client.series().await.unwrap();
    assert_eq!(series.items.len(), 1);
    assert_eq!(series.items[0].series_id, 9);
}
