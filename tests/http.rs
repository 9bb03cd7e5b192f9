use daily_tracker::models::{Budget, ChecklistUpdate, DatedRecord, NewProspect, Prospect, ProspectUpdate, SubItem, TrackingStats, fields};
use daily_tracker::{ClientConfig, DateKey, ResourceClient, SyncCoordinator, TrackerError};
use once_cell::sync::Lazy;
use reqwest::{Client, StatusCode};
use serde_json::{Value, json};
use std::net::TcpListener;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time::sleep;

struct TestServer {
    base_url: String,
    child: Child,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

static SERVER: Lazy<Mutex<Option<Arc<TestServer>>>> = Lazy::new(|| Mutex::new(None));

#[cfg(unix)]
mod cleanup {
    use std::sync::Once;
    use std::sync::atomic::{AtomicI32, Ordering};

    static REGISTER: Once = Once::new();
    static PID: AtomicI32 = AtomicI32::new(0);

    pub fn register(pid: u32) {
        REGISTER.call_once(|| {
            PID.store(pid as i32, Ordering::SeqCst);
            unsafe {
                libc::atexit(on_exit);
            }
        });
    }

    extern "C" fn on_exit() {
        let pid = PID.load(Ordering::SeqCst);
        if pid > 0 {
            unsafe {
                libc::kill(pid, libc::SIGTERM);
            }
        }
    }
}

fn pick_free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind random port");
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

fn unique_data_path() -> String {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let mut path = std::env::temp_dir();
    path.push(format!("daily_tracker_http_{}_{}.json", std::process::id(), nanos));
    path.to_string_lossy().to_string()
}

async fn wait_until_ready(base_url: &str) {
    let client = Client::new();
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if let Ok(resp) = client.get(format!("{base_url}/health")).send().await {
            if resp.status().is_success() {
                return;
            }
        }
        if Instant::now() > deadline {
            panic!("server did not become ready");
        }
        sleep(Duration::from_millis(100)).await;
    }
}

async fn spawn_server() -> TestServer {
    let port = pick_free_port();
    let data_path = unique_data_path();
    let child = Command::new(env!("CARGO_BIN_EXE_daily_tracker"))
        .env("PORT", port.to_string())
        .env("APP_DATA_PATH", data_path)
        .env("RUST_LOG", "info")
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .spawn()
        .expect("failed to spawn server");

    #[cfg(unix)]
    cleanup::register(child.id());

    let base_url = format!("http://127.0.0.1:{port}");
    wait_until_ready(&base_url).await;

    TestServer { base_url, child }
}

async fn shared_server() -> Arc<TestServer> {
    let mut guard = SERVER.lock().await;
    if let Some(server) = guard.as_ref() {
        return Arc::clone(server);
    }
    let server = Arc::new(spawn_server().await);
    *guard = Some(Arc::clone(&server));
    server
}

// Each test writes to its own resource so they can share one server.
fn coordinator(server: &TestServer, resource: &str) -> SyncCoordinator<ResourceClient> {
    let config = ClientConfig::new(server.base_url.as_str(), resource).with_timeout(5);
    SyncCoordinator::new(ResourceClient::new(config).unwrap())
}

#[tokio::test]
async fn http_patch_then_get_returns_merged_fields() {
    let server = shared_server().await;
    let client = Client::new();
    let url = format!("{}/http_patch/2026-01-05", server.base_url);

    let missing = client.get(&url).send().await.unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);

    for body in [json!({ "steps": 8000, "mood": "good" }), json!({ "steps": 9500 })] {
        let response = client.patch(&url).json(&body).send().await.unwrap();
        assert!(response.status().is_success());
    }

    let record: DatedRecord = client.get(&url).send().await.unwrap().json().await.unwrap();
    assert_eq!(record.date.to_string(), "2026-01-05");
    assert_eq!(record.number("steps"), Some(9500.0));
    assert_eq!(record.field("mood").and_then(|value| value.as_str()), Some("good"));
    assert!(record.field("updated_at").is_some());
}

#[tokio::test]
async fn http_rejects_malformed_dates() {
    let server = shared_server().await;
    let client = Client::new();

    for date in ["2026-1-5", "2026-02-30", "yesterday"] {
        let response = client
            .get(format!("{}/http_dates/{date}", server.base_url))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{date}");
    }
}

#[tokio::test]
async fn http_items_toggle_and_delete() {
    let server = shared_server().await;
    let client = Client::new();
    let base = format!("{}/http_items/2026-01-05", server.base_url);

    let record: DatedRecord = client
        .post(format!("{base}/items"))
        .json(&json!({ "text": "buy milk" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(record.items.len(), 1);
    let id = record.items[0].id.clone();
    assert!(!id.is_empty());

    let toggled: DatedRecord = client
        .patch(format!("{base}/items/{id}"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(toggled.items[0].completed);
    assert!(toggled.items[0].completed_at.is_some());

    let unknown = client.patch(format!("{base}/items/nope")).send().await.unwrap();
    assert_eq!(unknown.status(), StatusCode::NOT_FOUND);

    let deleted = client.delete(format!("{base}/items/{id}")).send().await.unwrap();
    assert_eq!(deleted.status(), StatusCode::NO_CONTENT);
    let again = client.delete(format!("{base}/items/{id}")).send().await.unwrap();
    assert_eq!(again.status(), StatusCode::NOT_FOUND);

    let record: DatedRecord = client.get(&base).send().await.unwrap().json().await.unwrap();
    assert!(record.items.is_empty());
}

#[tokio::test]
async fn http_list_is_newest_first_and_limited() {
    let server = shared_server().await;
    let client = Client::new();

    for date in ["2026-01-03", "2026-01-05", "2026-01-04"] {
        let response = client
            .post(format!("{}/http_list", server.base_url))
            .json(&json!({ "date": date, "minutes": 30 }))
            .send()
            .await
            .unwrap();
        assert!(response.status().is_success());
    }

    let records: Vec<DatedRecord> = client
        .get(format!("{}/http_list?limit=2", server.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let dates: Vec<String> = records.iter().map(|record| record.date.to_string()).collect();
    assert_eq!(dates, ["2026-01-05", "2026-01-04"]);
}

#[tokio::test]
async fn http_stats_totals_the_requested_metric() {
    let server = shared_server().await;
    let client = Client::new();
    let today = DateKey::today();

    for (key, minutes) in [(today, 20), (today.add_days(-1), 40)] {
        client
            .patch(format!("{}/http_stats/{key}", server.base_url))
            .json(&json!({ "minutes": minutes }))
            .send()
            .await
            .unwrap();
    }

    let stats: TrackingStats = client
        .get(format!("{}/stats/http_stats?metric=minutes", server.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats.current_streak, 2);
    assert_eq!(stats.total_active_days, 2);
    assert_eq!(stats.total, 60.0);
}

#[tokio::test]
async fn http_refuses_fields_named_like_wire_keys() {
    let server = shared_server().await;
    let client = Client::new();
    let url = format!("{}/http_reserved/2026-01-05", server.base_url);

    let response = client.patch(&url).json(&json!({ "steps": 100 })).send().await.unwrap();
    assert!(response.status().is_success());

    for body in [json!({ "date": "oops" }), json!({ "items": "x" })] {
        let response = client.patch(&url).json(&body).send().await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{body}");
    }
    let response = client.patch(&url).json(&json!({ "steps": null, "mood": "ok" })).send().await.unwrap();
    assert!(response.status().is_success());
    let record: DatedRecord = client.get(&url).send().await.unwrap().json().await.unwrap();
    assert_eq!(record.date.to_string(), "2026-01-05");
    assert_eq!(record.field("steps"), None);
    assert!(record.items.is_empty());
}

#[tokio::test]
async fn http_prospect_checklist_lifecycle() {
    let server = shared_server().await;
    let config = ClientConfig::new(server.base_url.as_str(), "prospects").with_timeout(5);
    let prospects = ResourceClient::new(config).unwrap();

    let created: Prospect = prospects
        .post_json(
            &[],
            &NewProspect {
                name: "Acme".into(),
                notes: None,
                checklist: Some(vec!["nda".into(), "pitch_deck".into(), "nda".into()]),
            },
        )
        .await
        .unwrap();
    assert_eq!(created.checklist.len(), 2);
    let id = created.id.as_str();

    let step = ChecklistUpdate {
        item: "nda".into(),
        completed: true,
        notes: Some("signed".into()),
    };
    let updated: Prospect = prospects.patch_json(&[id, "checklist"], Some(&step)).await.unwrap();
    assert!(updated.checklist[0].completed);
    assert_eq!(updated.checklist[0].notes.as_deref(), Some("signed"));

    let unknown = ChecklistUpdate {
        item: "handshake".into(),
        completed: true,
        notes: None,
    };
    let missing = prospects
        .patch_json::<_, Prospect>(&[id, "checklist"], Some(&unknown))
        .await;
    assert!(matches!(missing, Err(daily_tracker::TransportError::NotFound)));

    let renamed: Prospect = prospects
        .patch_json(
            &[id],
            Some(&ProspectUpdate {
                status: Some("won".into()),
                ..Default::default()
            }),
        )
        .await
        .unwrap();
    assert_eq!((renamed.name.as_str(), renamed.status.as_str()), ("Acme", "won"));

    let progress: Value = prospects.get_json(&[id, "progress"]).await.unwrap().unwrap();
    assert_eq!(progress["completed"], 1);
    assert_eq!(progress["total"], 2);

    let listed: Vec<Prospect> = prospects.get_json(&[]).await.unwrap().unwrap();
    assert!(listed.iter().any(|prospect| prospect.id == id));

    prospects.delete(&[id]).await.unwrap();
    assert!(prospects.get_json::<Prospect>(&[id]).await.unwrap().is_none());
}

#[tokio::test]
async fn http_budget_feeds_monthly_report() {
    let server = shared_server().await;
    let client = Client::new();
    let base = &server.base_url;

    for (date, kind, category, amount) in [
        ("2026-03-02", "income", "salary", 3000.0),
        ("2026-03-02", "expense", "food", 120.0),
        ("2026-03-15", "expense", "rent", 1500.0),
        ("2026-04-01", "expense", "food", 999.0),
    ] {
        let response = client
            .post(format!("{base}/http_transactions/{date}/items"))
            .json(&json!({ "type": kind, "category": category, "amount": amount }))
            .send()
            .await
            .unwrap();
        assert!(response.status().is_success());
    }

    let bad = client
        .post(format!("{base}/budgets"))
        .json(&json!({ "month": "March", "categories": {} }))
        .send()
        .await
        .unwrap();
    assert_eq!(bad.status(), StatusCode::BAD_REQUEST);

    let saved: Budget = client
        .post(format!("{base}/budgets"))
        .json(&json!({ "month": "2026-03", "categories": { "food": 200.0, "rent": 1500.0 } }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(saved.updated_at.is_some());

    let fetched = client.get(format!("{base}/budgets/2026-03")).send().await.unwrap();
    assert_eq!(fetched.status(), StatusCode::OK);
    let absent = client.get(format!("{base}/budgets/1999-01")).send().await.unwrap();
    assert_eq!(absent.status(), StatusCode::NOT_FOUND);

    let report: Value = client
        .get(format!("{base}/reports/2026-03?resource=http_transactions"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(report["month"], "2026-03");
    assert_eq!(report["total_income"], 3000.0);
    assert_eq!(report["total_expenses"], 1620.0);
    assert_eq!(report["net"], 1380.0);
    assert_eq!(report["by_category"][0]["category"], "rent");
    let comparison = report["budget_comparison"].as_array().unwrap();
    assert_eq!(comparison.len(), 2);
}

#[tokio::test]
async fn coordinator_round_trips_through_the_service() {
    let server = shared_server().await;
    let sync = coordinator(&server, "sync_daily");
    let key = DateKey::parse("2026-01-05").unwrap();

    let empty = sync.load(key).await.unwrap();
    assert!(empty.is_empty());

    let saved = sync
        .save_fields(key, fields([("weight", 180.5)]))
        .await
        .unwrap();
    assert_eq!(saved.number("weight"), Some(180.5));
    assert!(saved.field("updated_at").is_some());

    let item = SubItem::new(fields([("name", "oatmeal")]));
    let item_id = item.id.clone();
    let with_item = sync.add_item(key, item).await.unwrap();
    assert_eq!(with_item.items.len(), 1);

    let toggled = sync.toggle_item(key, item_id.as_str()).await.unwrap();
    assert!(toggled.items[0].completed);

    let removed = sync.remove_item(key, item_id.as_str()).await.unwrap();
    assert!(removed.items.is_empty());

    let unknown = sync.toggle_item(key, "missing").await;
    assert!(matches!(unknown, Err(TrackerError::ItemNotFound { .. })));

    let fresh = coordinator(&server, "sync_daily");
    let loaded = fresh.load(key).await.unwrap();
    assert_eq!(loaded.number("weight"), Some(180.5));
    assert!(loaded.items.is_empty());

    sync.delete_record(key).await.unwrap();
    assert!(fresh.load(key).await.unwrap().is_empty());
}

#[tokio::test]
async fn coordinator_reports_unreachable_service() {
    let config = ClientConfig::new(format!("http://127.0.0.1:{}", pick_free_port()), "daily").with_timeout(2);
    let sync = SyncCoordinator::new(ResourceClient::new(config).unwrap());
    let key = DateKey::parse("2026-01-05").unwrap();

    let result = sync.save_fields(key, fields([("steps", 100_i64)])).await;
    assert!(matches!(result, Err(TrackerError::SyncFailed { .. })));
    assert!(sync.record(key).is_empty());

    assert!(matches!(sync.load(key).await, Err(TrackerError::FetchFailed(_))));
}
