//! Standalone regression tests.
//!
//! Drives the full router and the sweep loop against an in-memory cluster:
//! power actions, auto-shutdown adjustment, adoption, and expiry.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use chrono::Utc;
use serde_json::Value;
use tokio::sync::watch;
use tower::ServiceExt;

use pvekeep_api::{ApiState, DisplayOptions, build_router};
use pvekeep_core::{NodeSelector, PowerAction};
use pvekeep_gateway::{ActionGateway, InMemoryGateway};
use pvekeep_scheduler::{ShutdownRegistry, ShutdownScheduler, VmController};

struct Harness {
    gw: InMemoryGateway,
    registry: ShutdownRegistry,
    router: Router,
    scheduler: ShutdownScheduler,
}

fn harness() -> Harness {
    let gw = InMemoryGateway::new().with_node("pve1");
    gw.add_stopped_vm("pve1", 100);
    gw.add_running_vm("pve1", 101, 7 * 3600);
    gw.add_stopped_vm("pve1", 102);

    let gateway: Arc<dyn ActionGateway> = Arc::new(gw.clone());
    let registry = ShutdownRegistry::new();
    let controller = VmController::new(
        Arc::clone(&gateway),
        registry.clone(),
        NodeSelector::FirstListed,
    );
    let scheduler = ShutdownScheduler::new(
        gateway,
        registry.clone(),
        NodeSelector::FirstListed,
        Duration::from_millis(20),
    );
    let router = build_router(ApiState {
        controller,
        display: DisplayOptions::default(),
    });

    Harness {
        gw,
        registry,
        router,
        scheduler,
    }
}

async fn get_json(router: &Router, uri: &str) -> (StatusCode, Value) {
    let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
    let resp = router.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

async fn post_json(router: &Router, uri: &str, body: Option<&str>) -> (StatusCode, Value) {
    let mut req = Request::builder().method("POST").uri(uri);
    let body = match body {
        Some(b) => {
            req = req.header("content-type", "application/json");
            Body::from(b.to_string())
        }
        None => Body::empty(),
    };
    let resp = router.clone().oneshot(req.body(body).unwrap()).await.unwrap();
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn node_summary() {
    let h = harness();
    let (status, body) = get_json(&h.router, "/api/v1/node").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["node"], "pve1");
    assert_eq!(body["data"]["mem_percent"], 0.0);
}

#[tokio::test]
async fn list_vms_adopts_running_once() {
    let h = harness();

    let (status, body) = get_json(&h.router, "/api/v1/vms").await;
    assert_eq!(status, StatusCode::OK);

    let vms = body["data"].as_array().unwrap();
    assert_eq!(vms.len(), 3);
    assert_eq!(vms[0]["vmid"], 100);
    assert!(vms[0]["auto_shutdown"].is_null());
    assert_eq!(vms[0]["auto_shutdown_delay"], 6.0);

    assert_eq!(vms[1]["vmid"], 101);
    assert_eq!(vms[1]["uptime_formatted"], "7h 0m");
    assert!(vms[1]["auto_shutdown"].is_string());
    let adopted = h.registry.get(101).unwrap();

    // A second listing must not re-anchor the entry.
    get_json(&h.router, "/api/v1/vms").await;
    assert_eq!(h.registry.get(101), Some(adopted));
}

#[tokio::test]
async fn start_then_shutdown_via_api() {
    let h = harness();

    let (status, body) = post_json(&h.router, "/api/v1/vms/100/start", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["action"], "start");
    assert!(body["data"]["upid"].as_str().unwrap().starts_with("UPID:pve1:"));
    assert!(h.registry.contains(100));

    let (status, _) = post_json(&h.router, "/api/v1/vms/100/shutdown", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(!h.registry.contains(100));
    assert_eq!(
        h.gw.actions(),
        vec![(100, PowerAction::Start), (100, PowerAction::Shutdown)]
    );
}

#[tokio::test]
async fn invalid_action_is_400_and_registry_untouched() {
    let h = harness();

    let (status, body) = post_json(&h.router, "/api/v1/vms/100/suspend", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().unwrap().contains("suspend"));

    let (status, _) = post_json(
        &h.router,
        "/api/v1/vms/100/autoshutdown",
        Some(r#"{"action":"cancel"}"#),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert!(h.registry.is_empty());
    assert!(h.gw.actions().is_empty());
}

#[tokio::test]
async fn failed_power_action_is_502() {
    let h = harness();
    h.gw.set_failing(100, true);

    let (status, body) = post_json(&h.router, "/api/v1/vms/100/start", None).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["success"], false);
    assert!(!h.registry.contains(100));
}

#[tokio::test]
async fn delay_twice_then_reset() {
    let h = harness();
    post_json(&h.router, "/api/v1/vms/100/start", None).await;
    let start = h.registry.get(100).unwrap();

    for _ in 0..2 {
        let (status, _) = post_json(
            &h.router,
            "/api/v1/vms/100/autoshutdown",
            Some(r#"{"action":"delay"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }
    let delayed = h.registry.get(100).unwrap();
    assert_eq!(delayed.deadline - start.deadline, chrono::Duration::hours(12));
    assert_eq!(delayed.total_delay_hours, 18.0);

    let (status, body) = post_json(
        &h.router,
        "/api/v1/vms/100/autoshutdown",
        Some(r#"{"action":"reset"}"#),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total_delay_hours"], 6.0);
    assert!(h.registry.get(100).unwrap().deadline < delayed.deadline);
}

#[tokio::test]
async fn started_vm_is_shut_down_after_six_hours() {
    let h = harness();
    post_json(&h.router, "/api/v1/vms/102/start", None).await;
    let t0 = Utc::now();

    let report = h
        .scheduler
        .sweep_at(t0 + chrono::Duration::hours(6) + chrono::Duration::seconds(1))
        .await;

    assert_eq!(report.shut_down, vec![102]);
    assert!(!h.registry.contains(102));
    assert!(!h.gw.vm(102).unwrap().is_running());

    let (_, body) = get_json(&h.router, "/api/v1/vms").await;
    let vm = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .find(|vm| vm["vmid"] == 102)
        .unwrap();
    assert_eq!(vm["status"], "stopped");
    assert!(vm["auto_shutdown"].is_null());
}

#[tokio::test]
async fn adjusting_stopped_vms_never_shuts_them_down() {
    let h = harness();
    for (vmid, action) in [(100, "delay"), (102, "reset")] {
        let (status, _) = post_json(
            &h.router,
            &format!("/api/v1/vms/{vmid}/autoshutdown"),
            Some(&format!(r#"{{"action":"{action}"}}"#)),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }
    assert_eq!(h.registry.len(), 2);

    let later = Utc::now() + chrono::Duration::hours(6) + chrono::Duration::seconds(1);
    let report = h.scheduler.sweep_at(later).await;

    assert_eq!(report.dropped, vec![100, 102]);
    assert!(report.shut_down.is_empty());
    assert!(report.failed.is_empty());
    assert!(h.registry.is_empty());
    assert!(h.gw.actions().is_empty());

    // Nothing left to retry.
    assert!(h.scheduler.sweep_at(later).await.is_empty());
}

#[tokio::test]
async fn delay_on_unknown_vm_is_cleared_by_listing() {
    let h = harness();
    let (status, body) = post_json(
        &h.router,
        "/api/v1/vms/999/autoshutdown",
        Some(r#"{"action":"delay"}"#),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total_delay_hours"], 6.0);
    assert!(h.registry.contains(999));

    let (status, body) = get_json(&h.router, "/api/v1/vms").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 3);
    assert!(!h.registry.contains(999));
    assert_eq!(
        h.registry.snapshot().iter().map(|(id, _)| *id).collect::<Vec<_>>(),
        vec![101]
    );
}

#[tokio::test]
async fn scheduler_loop_runs_beside_api() {
    let h = harness();
    // Overdue entry for a VM that is running.
    h.gw.add_running_vm("pve1", 103, 60);
    h.registry.upsert(
        103,
        pvekeep_scheduler::ShutdownEntry {
            deadline: Utc::now() - chrono::Duration::minutes(1),
            total_delay_hours: 6.0,
        },
    );

    let (tx, rx) = watch::channel(false);
    let scheduler = Arc::new(h.scheduler);
    let handle = {
        let scheduler = Arc::clone(&scheduler);
        tokio::spawn(async move { scheduler.run(rx).await })
    };

    tokio::time::sleep(Duration::from_millis(150)).await;

    assert!(!h.gw.vm(103).unwrap().is_running());
    assert!(!h.registry.contains(103));
    // Bootstrap adopted the long-running VM without shutting it down.
    assert!(h.registry.contains(101));
    assert!(h.gw.vm(101).unwrap().is_running());

    let (status, _) = get_json(&h.router, "/healthz").await;
    assert_eq!(status, StatusCode::OK);

    tx.send(true).unwrap();
    handle.await.unwrap();
}
