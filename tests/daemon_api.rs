//! Daemon API Integration Tests
//!
//! Drives the HTTP front-end end to end: fake panel, in-memory key store,
//! real router on an ephemeral port.


use integration_harness::{FakePanel, VLESS_INBOUND, fast_options, provisioner};
use keysmith_daemon::config::LimitsConfig;
use keysmith_daemon::{AppState, router};
use keysmith_storage::KeyStore;
use reqwest::{Client, StatusCode};
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

struct DaemonSetup {
    limits: LimitsConfig,
    compensate_orphans: bool,
    /// Register the configured servers in the key store
    sync_servers: bool,
}

impl Default for DaemonSetup {
    fn default() -> Self {
        Self {
            limits: LimitsConfig::default(),
            compensate_orphans: false,
            sync_servers: true,
        }
    }
}

struct TestDaemon {
    addr: SocketAddr,
    panel: FakePanel,
    http: Client,
}

impl TestDaemon {
    async fn start(max_keys_per_user: u32) -> Self {
        Self::start_with(DaemonSetup {
            limits: LimitsConfig {
                max_keys_per_user,
                ..Default::default()
            },
            ..Default::default()
        })
        .await
    }

    async fn start_with(setup: DaemonSetup) -> Self {
        let panel = FakePanel::start().await;

        let store = KeyStore::in_memory().await.unwrap();
        store.migrate().await.unwrap();
        if setup.sync_servers {
            store
                .sync_servers(&[
                    (1, "Germany", "203.0.113.10"),
                    (2, "Finland", "203.0.113.20"),
                    (3, "Nowhere", ""),
                ])
                .await
                .unwrap();
        }

        let state = AppState::new(
            Arc::new(provisioner(&panel, fast_options())),
            store,
            setup.limits,
            setup.compensate_orphans,
        );

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(state)).await.unwrap();
        });

        Self {
            addr,
            panel,
            http: Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    async fn issue(&self, user_id: i64, protocol: &str) -> (StatusCode, Value) {
        let resp = self
            .http
            .post(self.url("/keys"))
            .json(&json!({ "user_id": user_id, "username": "jane", "protocol": protocol }))
            .send()
            .await
            .unwrap();
        let status = resp.status();
        (status, resp.json().await.unwrap())
    }

    async fn get(&self, path: &str) -> (StatusCode, Value) {
        let resp = self.http.get(self.url(path)).send().await.unwrap();
        let status = resp.status();
        (status, resp.json().await.unwrap())
    }
}

#[tokio::test]
async fn test_health_and_servers() {
    let daemon = TestDaemon::start(4).await;

    let (status, body) = daemon.get("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, body) = daemon.get("/servers").await;
    assert_eq!(status, StatusCode::OK);
    let servers = body.as_array().unwrap();
    assert_eq!(servers.len(), 3);
    assert_eq!(servers[0]["name"], "VLESS Reality Server");
    assert_eq!(servers[0]["protocols"], json!(["vless"]));
}

#[tokio::test]
async fn test_key_lifecycle_and_limit() {
    let daemon = TestDaemon::start(2).await;

    let (status, first) = daemon.issue(42, "vless").await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(first["key"].as_str().unwrap().starts_with("vless://"));
    assert_eq!(first["keys_left"], 1);

    let (status, second) = daemon.issue(42, "ss").await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(second["key"].as_str().unwrap().starts_with("ss://"));
    assert_eq!(second["keys_left"], 0);

    let (status, body) = daemon.issue(42, "vless").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains("limit"));

    // Another user is unaffected.
    let (status, _) = daemon.issue(43, "vless").await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, keys) = daemon.get("/users/42/keys").await;
    assert_eq!(status, StatusCode::OK);
    let keys = keys.as_array().unwrap();
    assert_eq!(keys.len(), 2);
    assert_eq!(keys[0]["server_name"], "VLESS Reality Server");
    assert_eq!(keys[0]["region"], "Germany");
    assert_eq!(keys[1]["protocol"], "shadowsocks");

    let id = first["subscription_id"].as_i64().unwrap();
    let resp = daemon
        .http
        .delete(daemon.url(&format!("/keys/{}", id)))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["outcome"], "deleted");

    let resp = daemon
        .http
        .delete(daemon.url(&format!("/keys/{}", id)))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let (_, keys) = daemon.get("/users/42/keys").await;
    assert_eq!(keys.as_array().unwrap().len(), 1);

    // The revoked slot is free again.
    let (status, _) = daemon.issue(42, "vless").await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn test_revoke_key_already_gone_from_panel() {
    let daemon = TestDaemon::start(4).await;
    let (_, issued) = daemon.issue(1, "vless").await;
    let id = issued["subscription_id"].as_i64().unwrap();

    let panel = daemon.panel.client();
    let resp = panel
        .delete_client(VLESS_INBOUND, issued["identifier"].as_str().unwrap())
        .await
        .unwrap();
    assert!(resp.success);

    let resp = daemon
        .http
        .delete(daemon.url(&format!("/keys/{}", id)))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["outcome"], "already_gone");
}

#[tokio::test]
async fn test_key_traffic() {
    let daemon = TestDaemon::start(4).await;
    let (_, issued) = daemon.issue(1, "vless").await;
    let id = issued["subscription_id"].as_i64().unwrap();

    let (status, _) = daemon.get(&format!("/keys/{}/traffic", id)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    daemon
        .panel
        .state
        .set_traffic(issued["identifier"].as_str().unwrap(), 1024, 1536, 0);
    let (status, body) = daemon.get(&format!("/keys/{}/traffic", id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["up"], 1024);
    assert_eq!(body["up_human"], "1.00 KB");
    assert_eq!(body["down_human"], "1.50 KB");
    assert_eq!(body["total_human"], "0 B");
}

#[tokio::test]
async fn test_error_statuses() {
    let daemon = TestDaemon::start(4).await;

    let (status, _) = daemon.issue(1, "wireguard").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let resp = daemon
        .http
        .post(daemon.url("/keys"))
        .json(&json!({ "user_id": 1, "protocol": "vless", "server_id": 99 }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    // No server offers Outline in the test registry.
    let (status, _) = daemon.issue(1, "outline").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Address missing: the panel accepted the client but no link exists.
    let resp = daemon
        .http
        .post(daemon.url("/keys"))
        .json(&json!({ "user_id": 1, "protocol": "shadowsocks", "server_id": 3 }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    let body: Value = resp.json().await.unwrap();
    assert!(!body["error"].as_str().unwrap().contains("tg_1"));

    let (_, keys) = daemon.get("/users/1/keys").await;
    assert!(keys.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_inbound_clients_endpoint() {
    let daemon = TestDaemon::start(4).await;
    let (_, issued) = daemon.issue(9, "vless").await;

    let (status, clients) = daemon.get("/servers/1/clients/vless").await;
    assert_eq!(status, StatusCode::OK);
    let clients = clients.as_array().unwrap();
    assert_eq!(clients.len(), 1);
    assert_eq!(clients[0]["email"], issued["identifier"]);

    let (status, _) = daemon.get("/servers/1/clients/shadowsocks").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = daemon.get("/servers/42/clients/vless").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_concurrent_issues_respect_limit() {
    let daemon = TestDaemon::start(2).await;

    let tasks: Vec<_> = (0..6)
        .map(|_| {
            let http = daemon.http.clone();
            let url = daemon.url("/keys");
            tokio::spawn(async move {
                http.post(url)
                    .json(&json!({ "user_id": 77, "protocol": "vless" }))
                    .send()
                    .await
                    .unwrap()
                    .status()
            })
        })
        .collect();

    let mut created = 0;
    let mut conflicts = 0;
    for task in tasks {
        match task.await.unwrap() {
            StatusCode::CREATED => created += 1,
            StatusCode::CONFLICT => conflicts += 1,
            other => panic!("unexpected status {}", other),
        }
    }
    assert_eq!((created, conflicts), (2, 4));
    assert_eq!(daemon.panel.state.client_emails(VLESS_INBOUND).len(), 2);

    let (_, keys) = daemon.get("/users/77/keys").await;
    assert_eq!(keys.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_unstored_key_stays_on_panel_by_default() {
    // Without server rows every subscription insert fails.
    let daemon = TestDaemon::start_with(DaemonSetup {
        sync_servers: false,
        ..Default::default()
    })
    .await;

    let (status, body) = daemon.issue(5, "vless").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(!body["error"].as_str().unwrap().contains("tg_5"));

    let emails = daemon.panel.state.client_emails(VLESS_INBOUND);
    assert_eq!(emails.len(), 1);
    assert!(emails[0].starts_with("tg_5_jane_"));

    let (_, keys) = daemon.get("/users/5/keys").await;
    assert!(keys.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_unstored_key_removed_when_compensating() {
    let daemon = TestDaemon::start_with(DaemonSetup {
        sync_servers: false,
        compensate_orphans: true,
        ..Default::default()
    })
    .await;

    let (status, _) = daemon.issue(5, "vless").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(daemon.panel.state.client_emails(VLESS_INBOUND).is_empty());
}

#[tokio::test]
async fn test_out_of_range_lifetime_creates_nothing() {
    let daemon = TestDaemon::start_with(DaemonSetup {
        limits: LimitsConfig {
            key_lifetime_days: 100_000_000,
            ..Default::default()
        },
        ..Default::default()
    })
    .await;

    let (status, body) = daemon.issue(1, "vless").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"].as_str().unwrap().contains("temporarily unavailable"));
    assert!(daemon.panel.state.client_emails(VLESS_INBOUND).is_empty());
    assert_eq!(daemon.panel.logins(), 0);

    // The daemon keeps serving.
    let (status, _) = daemon.get("/health").await;
    assert_eq!(status, StatusCode::OK);
}
