// End-to-end poll cycles against in-process fakes.
//
// Real FileWatermarkStore on a TempDir, ManualClock for time, and fake
// identity provider / API client / sink that count what they were asked to do.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, NaiveDate};
use gridpoll::{
    AccessToken, ApiClient, ClientCredentials, Clock, EndpointSpec, FileWatermarkStore,
    Granularity, IdentityProvider, IssuedToken, LocationHint, ManualClock, Phase, PollError,
    Poller, ResultSink, TimeWindow, Timestamp, TokenManager, WatermarkStore,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

// ── Fakes ─────────────────────────────────────────────────────────────────────

fn ts(h: u32, m: u32, s: u32) -> Timestamp {
    NaiveDate::from_ymd_opt(2025, 1, 27)
        .unwrap()
        .and_hms_opt(h, m, s)
        .unwrap()
}

#[derive(Default)]
struct FakeProvider {
    calls: AtomicUsize,
}

#[async_trait]
impl IdentityProvider for FakeProvider {
    async fn exchange(&self, _: &ClientCredentials) -> Result<IssuedToken, PollError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(IssuedToken {
            value: format!("bearer-{}", n),
            nominal_ttl: ChronoDuration::minutes(60),
        })
    }
}

#[derive(Default)]
struct FakeClient {
    calls: AtomicUsize,
    fail: AtomicBool,
    tokens_seen: Mutex<Vec<String>>,
}

#[async_trait]
impl ApiClient for FakeClient {
    async fn query(
        &self,
        token: &AccessToken,
        _endpoint: &str,
        _params: &HashMap<String, String>,
    ) -> Result<Value, PollError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.tokens_seen.lock().unwrap().push(token.value.clone());
        if self.fail.load(Ordering::SeqCst) {
            return Err(PollError::Transport("connection reset".to_string()));
        }
        Ok(json!({"_meta": {"totalRecords": 2}, "data": [["a"], ["b"]]}))
    }
}

/// Keeps every persisted window. With `hang_after_write` set it records the
/// payload and then never returns, standing in for a crash before commit.
#[derive(Default)]
struct MemorySink {
    windows: Mutex<Vec<TimeWindow>>,
    hang_after_write: AtomicBool,
}

#[async_trait]
impl ResultSink for MemorySink {
    async fn persist(&self, payload: &Value, hint: &LocationHint) -> Result<u64, PollError> {
        self.windows.lock().unwrap().push(hint.window);
        if self.hang_after_write.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        Ok(payload["data"].as_array().map(|d| d.len() as u64).unwrap_or(0))
    }
}

struct Harness {
    _dir: TempDir,
    clock: Arc<ManualClock>,
    provider: Arc<FakeProvider>,
    tokens: Arc<TokenManager>,
    store: Arc<FileWatermarkStore>,
}

impl Harness {
    fn new(start: Timestamp) -> Self {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(start));
        let provider = Arc::new(FakeProvider::default());
        let tokens = Arc::new(TokenManager::new(
            provider.clone(),
            ClientCredentials::new("operator", "secret"),
            clock.clone(),
            ChronoDuration::minutes(5),
            Duration::from_secs(5),
        ));
        let store = Arc::new(FileWatermarkStore::new(dir.path().join("state")).unwrap());
        Self {
            _dir: dir,
            clock,
            provider,
            tokens,
            store,
        }
    }

    fn poller(
        &self,
        endpoint: EndpointSpec,
        client: Arc<FakeClient>,
        sink: Arc<MemorySink>,
    ) -> Poller {
        Poller::new(
            endpoint,
            self.tokens.clone(),
            client,
            sink,
            self.store.clone(),
            self.clock.clone() as Arc<dyn Clock>,
            Duration::from_secs(5),
        )
    }
}

fn rtm_lmp() -> EndpointSpec {
    EndpointSpec::new("rtm_lmp", "np6-788-cd/lmp_node_zone_hub", Granularity::Second)
        .with_lookback_seconds(15 * 60)
}

// ── Scenarios ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_first_run_bootstraps_from_lookback() {
    let h = Harness::new(ts(10, 0, 0));
    let sink = Arc::new(MemorySink::default());
    let poller = h.poller(rtm_lmp(), Arc::new(FakeClient::default()), sink.clone());

    let outcome = poller.run_once().await;

    assert!(outcome.is_success(), "{:?}", outcome);
    let window = outcome.window.unwrap();
    assert_eq!(window.from, ts(9, 45, 0));
    assert_eq!(window.to, ts(10, 0, 0));
    assert_eq!(outcome.record_count, 2);

    let wm = h.store.load("rtm_lmp").unwrap().unwrap();
    assert_eq!(wm.last_to, ts(10, 0, 0));
    assert_eq!(wm.endpoint_id, "rtm_lmp");

    let raw = std::fs::read_to_string(h.store.path_for("rtm_lmp")).unwrap();
    let record: Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(record["last_to"], "2025-01-27T10:00:00");
}

#[tokio::test]
async fn test_next_run_resumes_one_second_after_watermark() {
    let h = Harness::new(ts(10, 0, 0));
    let poller = h.poller(
        rtm_lmp(),
        Arc::new(FakeClient::default()),
        Arc::new(MemorySink::default()),
    );
    assert!(poller.run_once().await.is_success());

    h.clock.set(ts(10, 15, 0));
    let outcome = poller.run_once().await;

    let window = outcome.window.unwrap();
    assert_eq!(window.from, ts(10, 0, 1));
    assert_eq!(window.to, ts(10, 15, 0));
    assert_eq!(h.store.load("rtm_lmp").unwrap().unwrap().last_to, ts(10, 15, 0));
}

#[tokio::test]
async fn test_caught_up_is_noop_without_network() {
    let h = Harness::new(ts(10, 0, 0));
    h.store
        .commit("rtm_lmp", ts(10, 0, 0), 7, ts(10, 0, 0))
        .unwrap();
    let before = h.store.load("rtm_lmp").unwrap();
    let client = Arc::new(FakeClient::default());
    let poller = h.poller(rtm_lmp(), client.clone(), Arc::new(MemorySink::default()));

    let outcome = poller.run_once().await;

    assert!(outcome.is_noop());
    assert_eq!(client.calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.provider.calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.store.load("rtm_lmp").unwrap(), before);
}

// ── Properties ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_watermark_never_moves_backwards() {
    let h = Harness::new(ts(10, 0, 0));
    let poller = h.poller(
        rtm_lmp(),
        Arc::new(FakeClient::default()),
        Arc::new(MemorySink::default()),
    );
    assert!(poller.run_once().await.is_success());

    // Wall clock stepped back behind the watermark
    h.clock.set(ts(9, 30, 0));
    assert!(poller.run_once().await.is_noop());
    assert_eq!(h.store.load("rtm_lmp").unwrap().unwrap().last_to, ts(10, 0, 0));

    h.clock.set(ts(10, 5, 0));
    assert!(poller.run_once().await.is_success());
    assert_eq!(h.store.load("rtm_lmp").unwrap().unwrap().last_to, ts(10, 5, 0));
}

#[tokio::test]
async fn test_consecutive_windows_leave_no_gap() {
    let h = Harness::new(ts(10, 0, 0));
    let sink = Arc::new(MemorySink::default());
    let poller = h.poller(rtm_lmp(), Arc::new(FakeClient::default()), sink.clone());

    for minutes in [0, 5, 7, 20, 21] {
        h.clock.set(ts(10, 0, 0) + ChronoDuration::minutes(minutes));
        assert!(poller.run_once().await.is_success());
    }

    let windows = sink.windows.lock().unwrap();
    assert_eq!(windows.len(), 5);
    assert_eq!(windows[0].from, ts(9, 45, 0));
    assert_eq!(windows.last().unwrap().to, ts(10, 21, 0));
    for pair in windows.windows(2) {
        assert_eq!(pair[1].from, pair[0].to + ChronoDuration::seconds(1));
    }
}

#[tokio::test]
async fn test_retry_after_fetch_failure_requests_same_window() {
    let h = Harness::new(ts(10, 0, 0));
    let client = Arc::new(FakeClient::default());
    let poller = h.poller(rtm_lmp(), client.clone(), Arc::new(MemorySink::default()));
    assert!(poller.run_once().await.is_success());

    h.clock.set(ts(10, 15, 0));
    client.fail.store(true, Ordering::SeqCst);
    let failed = poller.run_once().await;
    let (phase, error) = failed.error().unwrap();
    assert_eq!(phase, Phase::Fetching);
    assert!(error.is_retryable());
    assert_eq!(h.store.load("rtm_lmp").unwrap().unwrap().last_to, ts(10, 0, 0));

    client.fail.store(false, Ordering::SeqCst);
    let retried = poller.run_once().await;
    assert!(retried.is_success());
    assert_eq!(retried.window, failed.window);
}

#[tokio::test]
async fn test_pollers_share_one_token() {
    let h = Harness::new(ts(10, 0, 0));
    let client = Arc::new(FakeClient::default());
    let dam = EndpointSpec::new("dam_spp", "np4-190-cd/dam_stlmnt_pnt_prices", Granularity::Day)
        .with_lookback_seconds(86_400);
    let rtm = h.poller(rtm_lmp(), client.clone(), Arc::new(MemorySink::default()));
    let dam = h.poller(dam, client.clone(), Arc::new(MemorySink::default()));

    let (a, b) = tokio::join!(rtm.run_once(), dam.run_once());
    assert!(a.is_success());
    assert!(b.is_success());

    h.clock.advance(ChronoDuration::minutes(20));
    assert!(rtm.run_once().await.is_success());

    assert_eq!(h.provider.calls.load(Ordering::SeqCst), 1);
    let seen = client.tokens_seen.lock().unwrap();
    assert_eq!(seen.len(), 3);
    assert!(seen.iter().all(|t| t == "bearer-1"));
}

#[tokio::test]
async fn test_crash_between_persist_and_commit_keeps_previous_watermark() {
    let h = Harness::new(ts(10, 0, 0));
    let sink = Arc::new(MemorySink::default());
    let poller = h.poller(rtm_lmp(), Arc::new(FakeClient::default()), sink.clone());
    assert!(poller.run_once().await.is_success());
    let before = h.store.load("rtm_lmp").unwrap();

    h.clock.set(ts(10, 15, 0));
    sink.hang_after_write.store(true, Ordering::SeqCst);
    let interrupted = tokio::time::timeout(Duration::from_millis(50), poller.run_once()).await;
    assert!(interrupted.is_err());
    assert_eq!(h.store.load("rtm_lmp").unwrap(), before);

    // Restart: the same window is delivered once more
    sink.hang_after_write.store(false, Ordering::SeqCst);
    assert!(poller.run_once().await.is_success());
    let windows = sink.windows.lock().unwrap();
    assert_eq!(windows.len(), 3);
    assert_eq!(windows[1], windows[2]);
    assert_eq!(windows[2].from, ts(10, 0, 1));
}
