//! Integration tests for the TUTasksy backend.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response};
use serde_json::{json, Value};
use sqlx::SqlitePool;
use tempfile::TempDir;

use crate::config::Config;
use crate::db::{init_database, Repository};
use crate::feed::ChangeFeed;
use crate::lifecycle::InFlightGate;
use crate::search::SearchIndex;
use crate::{create_router, AppState};

const ADMIN: &str = "admin";

/// Test fixture for integration tests.
struct TestFixture {
    client: Client,
    base_url: String,
    repo: Arc<Repository>,
    pool: SqlitePool,
    likes: InFlightGate,
    _temp_dir: TempDir,
}

impl TestFixture {
    async fn new() -> Self {
        Self::with_psk(Some("test-api-key".to_string())).await
    }

    async fn with_psk(psk: Option<String>) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test.sqlite");
        let index_path = temp_dir.path().join("index");

        // Initialize database
        let pool = init_database(&db_path).await.expect("Failed to init DB");
        let repo = Arc::new(Repository::new(pool.clone(), ChangeFeed::new(64)));

        // Initialize search index
        let search = Arc::new(SearchIndex::open(&index_path).expect("Failed to init search"));

        let config = Config {
            api_psk: psk.clone(),
            db_path,
            index_path,
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            log_level: "warn".to_string(),
            admin_ids: vec![ADMIN.to_string()],
            max_write_retries: 5,
            feed_capacity: 64,
        };

        let state = AppState::new(Arc::clone(&repo), search, config);
        let likes = state.likes.clone();
        let app = create_router(state);

        // Bind to random port
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind");
        let addr = listener.local_addr().expect("Failed to get addr");
        let base_url = format!("http://{}", addr);

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        // Wait for server to start
        tokio::time::sleep(Duration::from_millis(100)).await;

        let mut client_builder = Client::builder();
        if let Some(key) = psk {
            let mut headers = reqwest::header::HeaderMap::new();
            headers.insert("x-api-key", key.parse().unwrap());
            client_builder = client_builder.default_headers(headers);
        }

        TestFixture {
            client: client_builder.build().unwrap(),
            base_url,
            repo,
            pool,
            likes,
            _temp_dir: temp_dir,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn get(&self, path: &str, user: &str) -> RequestBuilder {
        self.client.get(self.url(path)).header("x-user-id", user)
    }

    fn post(&self, path: &str, user: &str, body: Value) -> RequestBuilder {
        self.client
            .post(self.url(path))
            .header("x-user-id", user)
            .json(&body)
    }

    fn put(&self, path: &str, user: &str, body: Value) -> RequestBuilder {
        self.client
            .put(self.url(path))
            .header("x-user-id", user)
            .json(&body)
    }

    fn delete(&self, path: &str, user: &str) -> RequestBuilder {
        self.client.delete(self.url(path)).header("x-user-id", user)
    }

    async fn register(&self, user: &str, nickname: &str) -> Value {
        let resp = self
            .post(
                "/api/profiles",
                user,
                json!({
                    "displayName": format!("{} Student", nickname),
                    "studentId": format!("65{}", user.len()),
                    "faculty": "Engineering",
                    "nickname": nickname
                }),
            )
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        body(resp).await["data"].clone()
    }

    async fn create_task(&self, owner: &str, title: &str, max_accepted: i64) -> String {
        let resp = self
            .post(
                "/api/tasks",
                owner,
                json!({
                    "title": title,
                    "description": "Help needed near the library",
                    "reward": "50 baht",
                    "maxAccepted": max_accepted
                }),
            )
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        body(resp).await["data"]["id"].as_str().unwrap().to_string()
    }

    async fn revision(&self) -> i64 {
        let resp = self.get("/api/revision", "anyone").send().await.unwrap();
        body(resp).await["data"]["revisionId"].as_i64().unwrap()
    }
}

async fn body(resp: Response) -> Value {
    resp.json().await.unwrap()
}

/// Read an event stream until `needle` shows up.
async fn read_until(resp: &mut Response, needle: &str) -> String {
    let mut seen = String::new();
    tokio::time::timeout(Duration::from_secs(5), async {
        while !seen.contains(needle) {
            let chunk = resp.chunk().await.unwrap().expect("stream ended");
            seen.push_str(&String::from_utf8_lossy(&chunk));
        }
    })
    .await
    .expect("timed out waiting for event");
    seen
}

#[tokio::test]
async fn test_health_check() {
    let fixture = TestFixture::new().await;

    let resp = fixture
        .client
        .get(fixture.url("/health"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "OK");
}

#[tokio::test]
async fn test_auth_missing_psk() {
    let fixture = TestFixture::new().await;

    let resp = Client::new()
        .get(fixture.url("/api/tasks"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    let body = body(resp).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn test_auth_invalid_psk() {
    let fixture = TestFixture::new().await;

    let resp = Client::new()
        .get(fixture.url("/api/tasks"))
        .header("x-api-key", "wrong-key")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    let resp = Client::new()
        .get(fixture.url("/api/tasks"))
        .header("Authorization", "Bearer test-api-key")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn test_writes_require_user_id() {
    let fixture = TestFixture::new().await;

    let resp = fixture
        .client
        .post(fixture.url("/api/tasks"))
        .json(&json!({"title": "t", "description": "d", "reward": "r"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
}

#[tokio::test]
async fn test_profile_register_and_update() {
    let fixture = TestFixture::new().await;

    let profile = fixture.register("u1", "Alice").await;
    assert_eq!(profile["nickname"], "Alice");
    assert_eq!(profile["isAdmin"], false);
    assert_eq!(profile["isBanned"], false);

    // Registering twice conflicts
    let resp = fixture
        .post(
            "/api/profiles",
            "u1",
            json!({"displayName": "Again", "studentId": "1", "faculty": "Science"}),
        )
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);

    // Missing faculty is a validation error
    let resp = fixture
        .post(
            "/api/profiles",
            "u2",
            json!({"displayName": "Bob", "studentId": "2", "faculty": " "}),
        )
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    // Partial update keeps the other fields
    let resp = fixture
        .put("/api/profiles/u1", "u1", json!({"bio": "Third year", "expectedVersion": 1}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let updated = body(resp).await;
    assert_eq!(updated["data"]["bio"], "Third year");
    assert_eq!(updated["data"]["nickname"], "Alice");
    assert_eq!(updated["data"]["version"], 2);

    // Stale version
    let resp = fixture
        .put("/api/profiles/u1", "u1", json!({"bio": "Late", "expectedVersion": 1}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);
    assert_eq!(body(resp).await["error"]["details"]["currentVersion"], 2);

    // Someone else's profile
    let resp = fixture
        .put("/api/profiles/u1", "u2", json!({"bio": "Hacked"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);

    // Profile images must be http(s) URLs
    let resp = fixture
        .put("/api/profiles/u1", "u1", json!({"profileImageUrl": "profile_images/u1.jpg"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn test_admin_flag_comes_from_config() {
    let fixture = TestFixture::new().await;

    let admin = fixture.register(ADMIN, "Moderator").await;
    assert_eq!(admin["isAdmin"], true);
}

#[tokio::test]
async fn test_task_create_and_list() {
    let fixture = TestFixture::new().await;
    fixture.register("u1", "Alice").await;

    let first = fixture.create_task("u1", "Move boxes", 1).await;
    let second = fixture.create_task("u1", "Print slides", 2).await;

    let resp = fixture.get("/api/tasks", "u1").send().await.unwrap();
    assert_eq!(resp.status(), 200);
    let tasks = body(resp).await["data"].as_array().unwrap().clone();
    assert_eq!(tasks.len(), 2);
    // Newest first
    assert_eq!(tasks[0]["id"], second.as_str());
    assert_eq!(tasks[1]["id"], first.as_str());

    let task = &tasks[1];
    assert_eq!(task["username"], "Alice");
    assert_eq!(task["userId"], "u1");
    assert_eq!(task["status"], "Available");
    assert_eq!(task["maxAccepted"], 1);
    assert_eq!(task["likeUserIds"], json!([]));

    let resp = fixture
        .get(&format!("/api/tasks/{}", first), "u1")
        .send()
        .await
        .unwrap();
    assert_eq!(body(resp).await["data"]["title"], "Move boxes");
}

#[tokio::test]
async fn test_task_create_validation() {
    let fixture = TestFixture::new().await;
    fixture.register("u1", "Alice").await;

    let resp = fixture
        .post(
            "/api/tasks",
            "u1",
            json!({"title": "  ", "description": "d", "reward": "r"}),
        )
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    assert_eq!(body(resp).await["error"]["code"], "VALIDATION_ERROR");

    let resp = fixture
        .post(
            "/api/tasks",
            "u1",
            json!({"title": "t", "description": "d", "reward": "r", "maxAccepted": 0}),
        )
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    // No profile, no nickname to post under
    let resp = fixture
        .post(
            "/api/tasks",
            "ghost",
            json!({"title": "t", "description": "d", "reward": "r"}),
        )
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn test_interest_is_idempotent_and_reversible() {
    let fixture = TestFixture::new().await;
    fixture.register("owner", "Owner").await;
    fixture.register("u1", "Alice").await;
    let task = fixture.create_task("owner", "Water plants", 1).await;

    let interest = format!("/api/tasks/{}/interest", task);
    fixture.post(&interest, "u1", json!({})).send().await.unwrap();
    let before = fixture.revision().await;
    let resp = fixture.post(&interest, "u1", json!({})).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(body(resp).await["data"]["interestedUserIds"], json!(["u1"]));
    // A no-op write does not bump the revision
    assert_eq!(fixture.revision().await, before);

    // Only the owner or the user themselves may reject
    fixture.register("u2", "Bob").await;
    let reject = format!("/api/tasks/{}/interest/u1", task);
    let resp = fixture.delete(&reject, "u2").send().await.unwrap();
    assert_eq!(resp.status(), 403);

    let resp = fixture.delete(&reject, "owner").send().await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(body(resp).await["data"]["interestedUserIds"], json!([]));

    let resp = fixture.post(&interest, "u1", json!({})).send().await.unwrap();
    assert_eq!(body(resp).await["data"]["interestedUserIds"], json!(["u1"]));

    // Withdrawing your own interest is allowed
    let resp = fixture.delete(&reject, "u1").send().await.unwrap();
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn test_accept_enforces_capacity() {
    let fixture = TestFixture::new().await;
    fixture.register("owner", "Owner").await;
    fixture.register("u1", "Alice").await;
    fixture.register("u2", "Bob").await;
    let task = fixture.create_task("owner", "Walk dog", 1).await;

    for user in ["u1", "u2"] {
        fixture
            .post(&format!("/api/tasks/{}/interest", task), user, json!({}))
            .send()
            .await
            .unwrap();
    }

    let accept = format!("/api/tasks/{}/accept", task);

    // Only the owner accepts
    let resp = fixture
        .post(&accept, "u1", json!({"userId": "u1"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);

    let resp = fixture
        .post(&accept, "owner", json!({"userId": "u1"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let accepted = body(resp).await;
    assert_eq!(accepted["data"]["acceptedUserIds"], json!(["u1"]));
    assert_eq!(accepted["data"]["status"], "Assigned");

    // Full: the second user is rejected and nothing changes
    let resp = fixture
        .post(&accept, "owner", json!({"userId": "u2"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);
    let rejected = body(resp).await;
    assert_eq!(rejected["error"]["code"], "CAPACITY_REACHED");
    assert_eq!(rejected["error"]["details"]["maxAccepted"], 1);

    // Re-accepting is a no-op success
    let resp = fixture
        .post(&accept, "owner", json!({"userId": "u1"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let resp = fixture
        .get(&format!("/api/tasks/{}", task), "owner")
        .send()
        .await
        .unwrap();
    let stored = body(resp).await;
    assert_eq!(stored["data"]["acceptedUserIds"], json!(["u1"]));
    // Accepted users stay in the interested set
    assert_eq!(stored["data"]["interestedUserIds"], json!(["u1", "u2"]));

    let resp = fixture
        .get(&format!("/api/tasks/{}/interested", task), "owner")
        .send()
        .await
        .unwrap();
    let interested = body(resp).await["data"].as_array().unwrap().clone();
    assert_eq!(interested.len(), 2);
    assert_eq!(interested[0]["userId"], "u1");
    assert_eq!(interested[0]["accepted"], true);
    assert_eq!(interested[0]["profile"]["nickname"], "Alice");
    assert_eq!(interested[1]["accepted"], false);
}

#[tokio::test]
async fn test_concurrent_accepts_cannot_breach_capacity() {
    let fixture = TestFixture::new().await;
    fixture.register("owner", "Owner").await;
    let task = fixture.create_task("owner", "Queue for tickets", 1).await;
    for user in ["u1", "u2"] {
        fixture
            .post(&format!("/api/tasks/{}/interest", task), user, json!({}))
            .send()
            .await
            .unwrap();
    }
    let accept = format!("/api/tasks/{}/accept", task);

    let (a, b) = tokio::join!(
        fixture.post(&accept, "owner", json!({"userId": "u1"})).send(),
        fixture.post(&accept, "owner", json!({"userId": "u2"})).send(),
    );
    let mut statuses = vec![a.unwrap().status().as_u16(), b.unwrap().status().as_u16()];
    statuses.sort();
    assert_eq!(statuses, vec![200, 409]);

    let resp = fixture
        .get(&format!("/api/tasks/{}", task), "owner")
        .send()
        .await
        .unwrap();
    let stored = body(resp).await;
    assert_eq!(stored["data"]["acceptedUserIds"].as_array().unwrap().len(), 1);
    assert_eq!(stored["data"]["status"], "Assigned");
}

#[tokio::test]
async fn test_accept_with_stale_version() {
    let fixture = TestFixture::new().await;
    fixture.register("owner", "Owner").await;
    let task = fixture.create_task("owner", "Proofread essay", 2).await;

    let resp = fixture
        .post(
            &format!("/api/tasks/{}/accept", task),
            "owner",
            json!({"userId": "u1", "expectedVersion": 99}),
        )
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);
    let conflict = body(resp).await;
    assert_eq!(conflict["error"]["code"], "VERSION_MISMATCH");
    assert_eq!(conflict["error"]["details"]["currentVersion"], 1);
}

#[tokio::test]
async fn test_accept_requires_interest() {
    let fixture = TestFixture::new().await;
    fixture.register("owner", "Owner").await;
    let task = fixture.create_task("owner", "Deliver parcel", 1).await;

    let resp = fixture
        .post(
            &format!("/api/tasks/{}/accept", task),
            "owner",
            json!({"userId": "ghost-never-registered"}),
        )
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    assert_eq!(body(resp).await["error"]["code"], "VALIDATION_ERROR");

    let resp = fixture
        .get(&format!("/api/tasks/{}", task), "owner")
        .send()
        .await
        .unwrap();
    let stored = body(resp).await;
    assert_eq!(stored["data"]["acceptedUserIds"], json!([]));
    assert_eq!(stored["data"]["status"], "Available");
}

#[tokio::test]
async fn test_like_while_in_flight_is_rejected() {
    let fixture = TestFixture::new().await;
    fixture.register("owner", "Owner").await;
    fixture.register("u1", "Alice").await;
    let task = fixture.create_task("owner", "Label boxes", 1).await;
    let like = format!("/api/tasks/{}/like", task);

    let permit = fixture
        .likes
        .try_enter(format!("{}:{}", task, "u1"))
        .unwrap();

    let resp = fixture.post(&like, "u1", json!({})).send().await.unwrap();
    assert_eq!(resp.status(), 409);
    assert_eq!(body(resp).await["error"]["code"], "REQUEST_IN_FLIGHT");

    // Another user is not blocked
    let resp = fixture.post(&like, "owner", json!({})).send().await.unwrap();
    assert_eq!(resp.status(), 200);

    drop(permit);
    let resp = fixture.post(&like, "u1", json!({})).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(body(resp).await["data"]["likeCount"], 2);
}

#[tokio::test]
async fn test_toggle_like_twice_restores() {
    let fixture = TestFixture::new().await;
    fixture.register("owner", "Owner").await;
    fixture.register("u1", "Alice").await;
    let task = fixture.create_task("owner", "Feed cat", 1).await;
    let like = format!("/api/tasks/{}/like", task);

    let resp = fixture.post(&like, "u1", json!({})).send().await.unwrap();
    let liked = body(resp).await;
    assert_eq!(liked["data"]["liked"], true);
    assert_eq!(liked["data"]["likeCount"], 1);

    // Favorites filter
    let resp = fixture
        .get("/api/tasks?filter=favorites", "u1")
        .send()
        .await
        .unwrap();
    assert_eq!(body(resp).await["data"].as_array().unwrap().len(), 1);

    let resp = fixture.post(&like, "u1", json!({})).send().await.unwrap();
    let unliked = body(resp).await;
    assert_eq!(unliked["data"]["liked"], false);
    assert_eq!(unliked["data"]["likeCount"], 0);
    assert_eq!(unliked["data"]["task"]["likeUserIds"], json!([]));
}

#[tokio::test]
async fn test_task_filters() {
    let fixture = TestFixture::new().await;
    fixture.register("owner", "Owner").await;
    fixture.register("u1", "Alice").await;
    let task = fixture.create_task("owner", "Carry books", 1).await;
    fixture.create_task("u1", "Return books", 1).await;

    fixture
        .post(&format!("/api/tasks/{}/interest", task), "u1", json!({}))
        .send()
        .await
        .unwrap();
    fixture
        .post(&format!("/api/tasks/{}/accept", task), "owner", json!({"userId": "u1"}))
        .send()
        .await
        .unwrap();

    let resp = fixture.get("/api/tasks?filter=created", "owner").send().await.unwrap();
    let created = body(resp).await["data"].as_array().unwrap().clone();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0]["id"], task.as_str());

    let resp = fixture.get("/api/tasks?filter=accepted", "u1").send().await.unwrap();
    let accepted = body(resp).await["data"].as_array().unwrap().clone();
    assert_eq!(accepted.len(), 1);
    assert_eq!(accepted[0]["id"], task.as_str());

    // Filtering needs a caller
    let resp = fixture
        .client
        .get(fixture.url("/api/tasks?filter=created"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
}

#[tokio::test]
async fn test_comments() {
    let fixture = TestFixture::new().await;
    fixture.register("owner", "Owner").await;
    fixture.register("u1", "Alice").await;
    let task = fixture.create_task("owner", "Fix bike", 1).await;
    let path = format!("/api/tasks/{}/comments", task);

    for text in ["Which building?", "Engineering 2"] {
        let resp = fixture
            .post(&path, "u1", json!({"text": text}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
    }

    let resp = fixture.get(&path, "owner").send().await.unwrap();
    let comments = body(resp).await["data"].as_array().unwrap().clone();
    assert_eq!(comments.len(), 2);
    assert_eq!(comments[0]["text"], "Which building?");
    assert_eq!(comments[0]["username"], "Alice");
    assert_eq!(comments[1]["text"], "Engineering 2");

    let resp = fixture
        .post(&path, "u1", json!({"text": "   "}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let resp = fixture
        .post("/api/tasks/missing/comments", "u1", json!({"text": "hello"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn test_reports_and_ban() {
    let fixture = TestFixture::new().await;
    fixture.register(ADMIN, "Moderator").await;
    fixture.register("u1", "Alice").await;
    fixture.register("u2", "Bob").await;

    // Self-reports are refused
    let resp = fixture
        .post("/api/reports", "u1", json!({"reportedUserId": "u1", "reason": "spam"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let resp = fixture
        .post("/api/reports", "u2", json!({"reportedUserId": "u1", "reason": "No-show"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let report = body(resp).await["data"].clone();
    assert_eq!(report["status"], "pending");
    let report_id = report["id"].as_str().unwrap().to_string();

    // Non-admins cannot moderate
    let resp = fixture.get("/api/reports", "u2").send().await.unwrap();
    assert_eq!(resp.status(), 403);

    let resp = fixture
        .put(&format!("/api/reports/{}", report_id), ADMIN, json!({"status": "investigating"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(body(resp).await["data"]["status"], "investigating");

    let resp = fixture
        .post("/api/admin/users/u1/ban", ADMIN, json!({"banned": true}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let outcome = body(resp).await["data"].clone();
    assert_eq!(outcome["profile"]["isBanned"], true);
    assert_eq!(outcome["resolvedReports"], 1);

    let resp = fixture
        .get("/api/reports?status=resolved", ADMIN)
        .send()
        .await
        .unwrap();
    let resolved = body(resp).await["data"].as_array().unwrap().clone();
    assert_eq!(resolved.len(), 1);
    assert_eq!(resolved[0]["id"], report_id.as_str());

    // Banned users can read but not write
    let resp = fixture.get("/api/tasks", "u1").send().await.unwrap();
    assert_eq!(resp.status(), 200);
    let resp = fixture
        .post(
            "/api/tasks",
            "u1",
            json!({"title": "t", "description": "d", "reward": "r"}),
        )
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);
    assert_eq!(body(resp).await["error"]["code"], "FORBIDDEN");

    // Unban restores writes
    fixture
        .post("/api/admin/users/u1/ban", ADMIN, json!({"banned": false}))
        .send()
        .await
        .unwrap();
    fixture.create_task("u1", "Back again", 1).await;

    let resp = fixture
        .delete(&format!("/api/reports/{}", report_id), ADMIN)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let resp = fixture.get("/api/reports", ADMIN).send().await.unwrap();
    assert!(body(resp).await["data"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_ban_resolves_dismissed_reports() {
    let fixture = TestFixture::new().await;
    fixture.register(ADMIN, "Moderator").await;
    fixture.register("u1", "Alice").await;
    fixture.register("u2", "Bob").await;

    let resp = fixture
        .post("/api/reports", "u2", json!({"reportedUserId": "u1", "reason": "Rude in chat"}))
        .send()
        .await
        .unwrap();
    let report_id = body(resp).await["data"]["id"].as_str().unwrap().to_string();

    let resp = fixture
        .put(&format!("/api/reports/{}", report_id), ADMIN, json!({"status": "dismissed"}))
        .send()
        .await
        .unwrap();
    assert_eq!(body(resp).await["data"]["status"], "dismissed");

    let resp = fixture
        .post("/api/admin/users/u1/ban", ADMIN, json!({"banned": true}))
        .send()
        .await
        .unwrap();
    assert_eq!(body(resp).await["data"]["resolvedReports"], 1);

    let resp = fixture.get("/api/reports", ADMIN).send().await.unwrap();
    let reports = body(resp).await["data"].as_array().unwrap().clone();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0]["status"], "resolved");
}

#[tokio::test]
async fn test_chat_flow() {
    let fixture = TestFixture::new().await;
    fixture.register("u1", "Alice").await;
    fixture.register("u2", "Bob").await;
    fixture.register("u3", "Carol").await;

    let resp = fixture
        .post("/api/chats", "u1", json!({"otherUserId": "u2"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let chat_id = body(resp).await["data"]["id"].as_str().unwrap().to_string();

    // The same pair finds the same chat from either side
    let resp = fixture
        .post("/api/chats", "u2", json!({"otherUserId": "u1"}))
        .send()
        .await
        .unwrap();
    assert_eq!(body(resp).await["data"]["id"], chat_id.as_str());

    let messages = format!("/api/chats/{}/messages", chat_id);
    fixture
        .post(&messages, "u1", json!({"text": "Still need help?"}))
        .send()
        .await
        .unwrap();
    let resp = fixture
        .post(&messages, "u2", json!({"imageUrl": "https://cdn.example.com/chat_images/map.jpg"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let resp = fixture.get(&messages, "u1").send().await.unwrap();
    let history = body(resp).await["data"].as_array().unwrap().clone();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0]["text"], "Still need help?");
    assert_eq!(history[1]["senderId"], "u2");

    let resp = fixture.get("/api/chats", "u1").send().await.unwrap();
    let previews = body(resp).await["data"].as_array().unwrap().clone();
    assert_eq!(previews.len(), 1);
    assert_eq!(previews[0]["otherUserId"], "u2");
    assert_eq!(previews[0]["otherUserName"], "Bob");
    assert_eq!(previews[0]["lastMessage"], "[image]");

    // Outsiders cannot read or write
    let resp = fixture.get(&messages, "u3").send().await.unwrap();
    assert_eq!(resp.status(), 403);
    let resp = fixture
        .post(&messages, "u3", json!({"text": "hi"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);

    // Empty messages are refused
    let resp = fixture
        .post(&messages, "u1", json!({"text": " "}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let resp = fixture
        .post("/api/chats", "u1", json!({"otherUserId": "u1"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn test_reconcile_repairs_stale_summary() {
    let fixture = TestFixture::new().await;
    fixture.register("u1", "Alice").await;
    fixture.register("u2", "Bob").await;

    let resp = fixture
        .post("/api/chats", "u1", json!({"otherUserId": "u2"}))
        .send()
        .await
        .unwrap();
    let chat_id = body(resp).await["data"]["id"].as_str().unwrap().to_string();
    fixture
        .post(&format!("/api/chats/{}/messages", chat_id), "u1", json!({"text": "See you at 5"}))
        .send()
        .await
        .unwrap();

    sqlx::query("UPDATE chats SET last_message = 'stale', last_sender_id = 'u2' WHERE id = ?")
        .bind(&chat_id)
        .execute(&fixture.pool)
        .await
        .unwrap();

    assert_eq!(fixture.repo.reconcile_chat_summaries().await.unwrap(), 1);
    assert_eq!(fixture.repo.reconcile_chat_summaries().await.unwrap(), 0);

    let chat = fixture.repo.require_chat(&chat_id).await.unwrap();
    assert_eq!(chat.last_message.as_deref(), Some("See you at 5"));
    assert_eq!(chat.last_sender_id.as_deref(), Some("u1"));
}

#[tokio::test]
async fn test_task_stream_pushes_snapshots() {
    let fixture = TestFixture::new().await;
    fixture.register("u1", "Alice").await;
    fixture.create_task("u1", "First errand", 1).await;

    let mut stream = fixture.get("/api/tasks/stream", "u1").send().await.unwrap();
    assert_eq!(stream.status(), 200);

    let initial = read_until(&mut stream, "First errand").await;
    assert!(initial.contains("event: tasks"));

    fixture.create_task("u1", "Second errand", 1).await;
    read_until(&mut stream, "Second errand").await;
}

#[tokio::test]
async fn test_message_stream_is_for_participants() {
    let fixture = TestFixture::new().await;
    fixture.register("u1", "Alice").await;
    fixture.register("u2", "Bob").await;
    fixture.register("u3", "Carol").await;

    let resp = fixture
        .post("/api/chats", "u1", json!({"otherUserId": "u2"}))
        .send()
        .await
        .unwrap();
    let chat_id = body(resp).await["data"]["id"].as_str().unwrap().to_string();
    let stream_path = format!("/api/chats/{}/stream", chat_id);

    let resp = fixture.get(&stream_path, "u3").send().await.unwrap();
    assert_eq!(resp.status(), 403);

    let mut stream = fixture.get(&stream_path, "u2").send().await.unwrap();
    read_until(&mut stream, "event: messages").await;

    fixture
        .post(&format!("/api/chats/{}/messages", chat_id), "u1", json!({"text": "On my way"}))
        .send()
        .await
        .unwrap();
    read_until(&mut stream, "On my way").await;
}

#[tokio::test]
async fn test_malformed_rows_are_rejected() {
    let fixture = TestFixture::new().await;
    fixture.register("u1", "Alice").await;
    fixture.create_task("u1", "Healthy task", 1).await;

    sqlx::query(
        "INSERT INTO tasks (id, user_id, username, title, description, created_at, reward, status, like_user_ids) VALUES ('broken', 'u1', 'Alice', 't', 'd', '2025-01-01T00:00:00.000000Z', 'r', 'Available', 'not json')",
    )
    .execute(&fixture.pool)
    .await
    .unwrap();

    let resp = fixture.get("/api/tasks/broken", "u1").send().await.unwrap();
    assert_eq!(resp.status(), 500);
    assert_eq!(body(resp).await["error"]["code"], "DECODE_ERROR");

    // List reads skip the bad record
    let resp = fixture.get("/api/tasks", "u1").send().await.unwrap();
    let tasks = body(resp).await["data"].as_array().unwrap().clone();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0]["title"], "Healthy task");
}

#[tokio::test]
async fn test_search_endpoint() {
    let fixture = TestFixture::new().await;
    fixture.register("u1", "Alice").await;
    let task = fixture.create_task("u1", "Translate abstract", 1).await;
    fixture.create_task("u1", "Move sofa", 1).await;

    // The reader reloads shortly after commit
    tokio::time::sleep(Duration::from_millis(500)).await;

    let resp = fixture
        .get("/api/search?q=translate", "u1")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let results = body(resp).await["data"].clone();
    assert_eq!(results["total"], 1);
    assert_eq!(results["results"][0]["task"]["id"], task.as_str());
}

#[tokio::test]
async fn test_revision_increments_on_writes() {
    let fixture = TestFixture::new().await;

    let start = fixture.revision().await;
    fixture.register("u1", "Alice").await;
    assert_eq!(fixture.revision().await, start + 1);

    let task = fixture.create_task("u1", "Buy coffee", 1).await;
    assert_eq!(fixture.revision().await, start + 2);

    let resp = fixture
        .post(&format!("/api/tasks/{}/like", task), "u1", json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(body(resp).await["revisionId"], start + 3);
}

#[tokio::test]
async fn test_not_found_errors() {
    let fixture = TestFixture::new().await;
    fixture.register("u1", "Alice").await;

    for path in ["/api/tasks/nope", "/api/profiles/nope", "/api/chats/nope/messages"] {
        let resp = fixture.get(path, "u1").send().await.unwrap();
        assert_eq!(resp.status(), 404, "{}", path);
        assert_eq!(body(resp).await["error"]["code"], "NOT_FOUND");
    }

    let resp = fixture
        .post("/api/tasks/nope/interest", "u1", json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    let resp = fixture
        .put("/api/reports/nope", "u1", json!({"status": "resolved"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);
}
