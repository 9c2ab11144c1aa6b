//! Panel Session Integration Tests
//!
//! Login caching, invalidation on 401 and cookie expiry handling against
//! the fake panel.


use integration_harness::{FakePanel, VLESS_INBOUND};
use keysmith_panel::{PanelClient, PanelConfig, PanelError};
use std::sync::Arc;
use std::sync::atomic::Ordering;

#[tokio::test]
async fn test_session_reused_across_calls() {
    let panel = FakePanel::start().await;
    let client = panel.client();

    for _ in 0..5 {
        let resp = client.get_inbound(VLESS_INBOUND).await.unwrap();
        assert!(resp.success);
    }
    assert_eq!(panel.logins(), 1);
    assert!(client.session().current().await.is_some());
}

#[tokio::test]
async fn test_concurrent_callers_share_one_login() {
    let panel = FakePanel::start().await;
    let client = panel.client();

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.get_inbound(VLESS_INBOUND).await })
        })
        .collect();
    for task in tasks {
        assert!(task.await.unwrap().unwrap().success);
    }
    assert_eq!(panel.logins(), 1);
}

#[tokio::test]
async fn test_unauthorized_clears_session() {
    let panel = FakePanel::start().await;
    let client = panel.client();

    client.get_inbound(VLESS_INBOUND).await.unwrap();
    panel.state.expire_session();

    let err = client.get_inbound(VLESS_INBOUND).await.unwrap_err();
    assert!(matches!(err, PanelError::Unauthorized));
    assert!(client.session().current().await.is_none());

    client.get_inbound(VLESS_INBOUND).await.unwrap();
    assert_eq!(panel.logins(), 2);
}

#[tokio::test]
async fn test_short_lived_cookie_forces_relogin() {
    let panel = FakePanel::start().await;
    // Below the refresh margin, so every call needs a fresh session.
    *panel.state.cookie_max_age.lock().unwrap() = Some(30);
    let client = panel.client();

    client.get_inbound(VLESS_INBOUND).await.unwrap();
    client.get_inbound(VLESS_INBOUND).await.unwrap();
    assert_eq!(panel.logins(), 2);
}

#[tokio::test]
async fn test_wrong_password_is_authentication_error() {
    let panel = FakePanel::start().await;
    let client = PanelClient::new(PanelConfig::new(panel.url(), "admin", "nope")).unwrap();

    let err = client.get_inbound(VLESS_INBOUND).await.unwrap_err();
    match err {
        PanelError::Session(inner) => assert!(matches!(*inner, PanelError::Authentication(_))),
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(panel.logins(), 0);
    assert_eq!(panel.state.inbound_fetches.load(Ordering::SeqCst), 0);
}
