use once_cell::sync::Lazy;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::net::TcpListener;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time::sleep;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChallengeView {
    status: String,
    settings: SettingsView,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SettingsView {
    is_active: bool,
    is_paused: bool,
    current_day: u32,
    challenge_days: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskView {
    id: String,
    day_number: u32,
    is_active: bool,
    unlocked: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ParticipantView {
    total_points: u64,
    rank: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LeaderboardView {
    rank: u32,
    user_id: String,
    total_points: u64,
}

struct TestServer {
    base_url: String,
    child: Child,
    client: Client,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

static TEST_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

#[cfg(unix)]
mod cleanup {
    use std::sync::Mutex;
    use std::sync::Once;

    static REGISTER: Once = Once::new();
    static PIDS: Mutex<Vec<i32>> = Mutex::new(Vec::new());

    pub fn register(pid: u32) {
        if let Ok(mut pids) = PIDS.lock() {
            pids.push(pid as i32);
        }
        REGISTER.call_once(|| unsafe {
            libc::atexit(on_exit);
        });
    }

    extern "C" fn on_exit() {
        if let Ok(pids) = PIDS.lock() {
            for pid in pids.iter().copied().filter(|pid| *pid > 0) {
                unsafe {
                    libc::kill(pid, libc::SIGTERM);
                }
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

fn unique_path(kind: &str) -> String {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let mut path = std::env::temp_dir();
    path.push(format!("challenge_http_{kind}_{}_{}.json", std::process::id(), nanos));
    path.to_string_lossy().to_string()
}

async fn wait_until_ready(client: &Client, base_url: &str) {
    let deadline = Instant::now() + Duration::from_secs(3);
    loop {
        if let Ok(resp) = client.get(format!("{base_url}/api/challenge")).send().await {
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
    let child = Command::new(env!("CARGO_BIN_EXE_challenge_tracker"))
        .env("PORT", port.to_string())
        .env("APP_DATA_PATH", unique_path("data"))
        .env("APP_MARKER_PATH", unique_path("markers"))
        .env("RUST_LOG", "info")
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .spawn()
        .expect("failed to spawn server");

    #[cfg(unix)]
    cleanup::register(child.id());

    let base_url = format!("http://127.0.0.1:{port}");
    let client = Client::new();
    wait_until_ready(&client, &base_url).await;

    TestServer {
        base_url,
        child,
        client,
    }
}

impl TestServer {
    async fn post(&self, path: &str, body: serde_json::Value) -> reqwest::Response {
        self.client
            .post(format!("{}{path}", self.base_url))
            .json(&body)
            .send()
            .await
            .unwrap()
    }

    async fn challenge_op(&self, path: &str, body: serde_json::Value) -> ChallengeView {
        let response = self.post(path, body).await;
        assert!(response.status().is_success(), "{path} failed: {}", response.status());
        response.json().await.unwrap()
    }

    async fn tasks(&self) -> Vec<TaskView> {
        self.client
            .get(format!("{}/api/tasks", self.base_url))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap()
    }

    async fn participant(&self, id: &str) -> ParticipantView {
        self.client
            .get(format!("{}/api/users/{id}", self.base_url))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap()
    }

    async fn seed_task(&self, id: &str, day: u32, points: u32) {
        let response = self
            .client
            .put(format!("{}/api/tasks/{id}", self.base_url))
            .json(&json!({ "dayNumber": day, "points": points, "title": format!("Day {day}") }))
            .send()
            .await
            .unwrap();
        assert!(response.status().is_success());
    }
}

#[tokio::test]
async fn http_start_and_advance_moves_task_visibility() {
    let _guard = TEST_LOCK.lock().await;
    let server = spawn_server().await;
    server.seed_task("day0", 0, 5).await;
    server.seed_task("day1", 1, 10).await;

    let before: ChallengeView = server
        .client
        .get(format!("{}/api/challenge", server.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(before.status, "notStarted");

    let started = server.challenge_op("/api/challenge/start", json!({})).await;
    assert_eq!(started.status, "active");
    assert_eq!(started.settings.current_day, 0);
    assert_eq!(started.settings.challenge_days.len(), 15);

    let tasks = server.tasks().await;
    let day0 = tasks.iter().find(|task| task.id == "day0").unwrap();
    let day1 = tasks.iter().find(|task| task.id == "day1").unwrap();
    assert!(day0.is_active && day0.unlocked);
    assert!(!day1.is_active && !day1.unlocked);

    let advanced = server
        .challenge_op("/api/challenge/advance", json!({ "currentDay": 0 }))
        .await;
    assert_eq!(advanced.settings.current_day, 1);

    let tasks = server.tasks().await;
    for task in &tasks {
        assert_eq!(task.is_active, task.day_number == 1, "task {}", task.id);
        assert!(task.unlocked);
    }

    let stale = server
        .post("/api/challenge/advance", json!({ "currentDay": 0 }))
        .await;
    assert_eq!(stale.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn http_pause_locks_tasks_and_resume_keeps_day() {
    let _guard = TEST_LOCK.lock().await;
    let server = spawn_server().await;
    server.seed_task("day0", 0, 5).await;

    let not_paused = server.post("/api/challenge/resume", json!({})).await;
    assert_eq!(not_paused.status(), StatusCode::CONFLICT);

    server.challenge_op("/api/challenge/start", json!({})).await;
    server
        .post("/api/users/u1", json!({ "displayName": "Amina" }))
        .await;

    let toggled: ParticipantView = server
        .post("/api/users/u1/toggle", json!({ "taskId": "day0", "completed": true }))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(toggled.total_points, 5);

    let paused = server.challenge_op("/api/challenge/pause", json!({})).await;
    assert_eq!(paused.status, "paused");
    assert!(paused.settings.is_paused);

    let locked = server
        .post("/api/users/u1/toggle", json!({ "taskId": "day0", "completed": false }))
        .await;
    assert_eq!(locked.status(), StatusCode::CONFLICT);

    let resumed = server.challenge_op("/api/challenge/resume", json!({})).await;
    assert!(!resumed.settings.is_paused);
    assert!(resumed.settings.is_active);
    assert_eq!(resumed.settings.current_day, 0);
}

#[tokio::test]
async fn http_leaderboard_reads_and_rank_writes_back() {
    let _guard = TEST_LOCK.lock().await;
    let server = spawn_server().await;
    server.seed_task("a", 0, 5).await;
    server.seed_task("b", 0, 20).await;
    server.challenge_op("/api/challenge/start", json!({})).await;

    for (user, name) in [("u1", "Amina"), ("u2", "Bilal")] {
        server
            .post(&format!("/api/users/{user}"), json!({ "displayName": name }))
            .await;
    }
    server
        .post("/api/users/u1/toggle", json!({ "taskId": "a", "completed": true }))
        .await;
    server
        .post("/api/users/u2/toggle", json!({ "taskId": "b", "completed": true }))
        .await;

    let board: Vec<LeaderboardView> = server
        .client
        .get(format!("{}/api/leaderboard", server.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(board.len(), 2);
    assert_eq!((board[0].rank, board[0].user_id.as_str(), board[0].total_points), (1, "u2", 20));
    assert_eq!((board[1].rank, board[1].user_id.as_str(), board[1].total_points), (2, "u1", 5));

    let unranked = server.participant("u2").await;
    assert_eq!(unranked.rank, None);

    let ranked = server.post("/api/leaderboard/rank", json!({})).await;
    assert!(ranked.status().is_success());
    assert_eq!(server.participant("u2").await.rank, Some(1));
    assert_eq!(server.participant("u1").await.rank, Some(2));

    let stopped = server.challenge_op("/api/challenge/stop", json!({})).await;
    assert_eq!(stopped.status, "stopped");
    assert!(!stopped.settings.is_active);
}
