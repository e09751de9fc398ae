//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use account_api::accounts::AccountService;
use account_api::clock::SystemClock;
use account_api::config::AppConfig;
use account_api::lifecycle::{App, Shutdown};
use account_api::mail::MemoryTransport;
use account_api::tasks::{ShutdownOutcome, TaskPool};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

pub const PASSWORD: &str = "secret-pass";

/// Defaults suitable for tests: fast pool, generous rate limit.
pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.session.secret = "integration-test-secret-0123456789abcdef".into();
    config.rate_limit.burst_size = 1_000;
    config.rate_limit.requests_per_second = 1_000.0;
    config.workers.count = 2;
    config.workers.queue_capacity = 32;
    config.workers.shutdown_timeout_secs = 5;
    config
}

/// A running server on an ephemeral local port.
pub struct TestServer {
    pub base: String,
    pub client: reqwest::Client,
    pub mailer: Arc<MemoryTransport>,
    pub accounts: Arc<AccountService>,
    pub pool: TaskPool,
    shutdown: Shutdown,
    handle: JoinHandle<Result<ShutdownOutcome, account_api::lifecycle::StartupError>>,
}

impl TestServer {
    pub async fn start() -> Self {
        Self::start_with(test_config()).await
    }

    pub async fn start_with(config: AppConfig) -> Self {
        let mailer = Arc::new(MemoryTransport::new());
        let pool = TaskPool::start(&config.workers);
        let app = App::build(config, Arc::new(SystemClock), mailer.clone(), pool.clone()).unwrap();
        let accounts = app.state().accounts.clone();
        let shutdown = app.shutdown_handle();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(app.serve(listener));

        Self {
            base: format!("http://{addr}"),
            client: reqwest::Client::new(),
            mailer,
            accounts,
            pool,
            shutdown,
            handle,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/api/v1{}", self.base, path)
    }

    pub async fn post(&self, path: &str, body: Value) -> reqwest::Response {
        self.client.post(self.url(path)).json(&body).send().await.unwrap()
    }

    pub async fn register(&self, email: &str) -> u64 {
        let res = self
            .post(
                "/auth/register",
                json!({ "email": email, "password": PASSWORD, "full_name": "Test User" }),
            )
            .await;
        assert_eq!(res.status(), 201, "register {email}");
        let body: Value = res.json().await.unwrap();
        body["data"]["id"].as_u64().unwrap()
    }

    /// Returns (access_token, refresh_token).
    pub async fn login(&self, email: &str, password: &str) -> (String, String) {
        let res = self
            .post("/auth/login", json!({ "email": email, "password": password }))
            .await;
        assert_eq!(res.status(), 200, "login {email}");
        let body: Value = res.json().await.unwrap();
        (
            body["data"]["access_token"].as_str().unwrap().to_string(),
            body["data"]["refresh_token"].as_str().unwrap().to_string(),
        )
    }

    pub async fn get_authed(&self, path: &str, token: &str) -> reqwest::Response {
        self.client
            .get(self.url(path))
            .bearer_auth(token)
            .send()
            .await
            .unwrap()
    }

    pub async fn send_authed(
        &self,
        method: reqwest::Method,
        path: &str,
        token: &str,
        body: Option<Value>,
    ) -> reqwest::Response {
        let mut request = self.client.request(method, self.url(path)).bearer_auth(token);
        if let Some(body) = body {
            request = request.json(&body);
        }
        request.send().await.unwrap()
    }

    pub async fn wait_for_mail(&self, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.mailer.messages().len() < count {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("mail never delivered");
    }

    pub async fn stop(self) -> ShutdownOutcome {
        self.shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(10), self.handle)
            .await
            .expect("server did not stop")
            .unwrap()
            .unwrap()
    }
}

/// Pull the six-digit code out of a reset mail body.
pub fn extract_code(html: &str) -> String {
    let start = html.find("<strong>").expect("no code in mail") + "<strong>".len();
    html[start..start + 6].to_string()
}
