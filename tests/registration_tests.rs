//! Peer registration over HTTP

use mesh_discovery::discovery::{RegistrationClient, RegistrationOutcome};
use pretty_assertions::assert_eq;
use rstest::rstest;
use std::time::Duration;

mod common;
use common::{mesh_node, MockPeer};

fn client() -> RegistrationClient {
    RegistrationClient::new(Duration::from_secs(2)).unwrap()
}

#[tokio::test]
async fn test_accepted_registration_returns_peer_description() {
    let peer = MockPeer::start().await;
    let remote = mesh_node("remote", "192.168.1.90");
    peer.accept_with(&remote).await;

    let own = mesh_node("local", "192.168.1.10").with_scope_context("home");
    let outcome = client().register(&peer.uri(), &own).await;

    assert!(outcome.is_success());
    assert_eq!(outcome, RegistrationOutcome::Registered(remote));

    let bodies = peer.received_descriptions().await;
    assert_eq!(bodies.len(), 1);
    assert_eq!(bodies[0]["usn"], own.usn.as_str());
    assert_eq!(bodies[0]["scopeContext"], "home");
    assert_eq!(bodies[0]["isMeshEngineNode"], true);
    assert_eq!(bodies[0]["meshWsUrl"], "ws://192.168.1.10:8081/");
}

#[rstest]
#[case(500, RegistrationOutcome::ServerError(500))]
#[case(503, RegistrationOutcome::ServerError(503))]
#[case(406, RegistrationOutcome::Rejected)]
#[tokio::test]
async fn test_refusals_map_to_outcomes(#[case] status: u16, #[case] expected: RegistrationOutcome) {
    let peer = MockPeer::start().await;
    peer.respond_with_status(status).await;

    let outcome = client()
        .register(&peer.uri(), &mesh_node("local", "192.168.1.10"))
        .await;
    assert_eq!(outcome, expected);
}

#[tokio::test]
async fn test_other_statuses_fail() {
    let peer = MockPeer::start().await;
    peer.respond_with_status(404).await;

    let outcome = client()
        .register(&peer.uri(), &mesh_node("local", "192.168.1.10"))
        .await;
    assert!(matches!(outcome, RegistrationOutcome::Failed(_)));
}

#[tokio::test]
async fn test_unreadable_reply_fails() {
    let peer = MockPeer::start().await;
    peer.respond_with_garbage().await;

    let outcome = client()
        .register(&peer.uri(), &mesh_node("local", "192.168.1.10"))
        .await;
    assert!(matches!(outcome, RegistrationOutcome::Failed(_)));
}

#[tokio::test]
async fn test_unreachable_peer_fails() {
    // nothing listens on the discard port of localhost
    let outcome = client()
        .register("http://127.0.0.1:9", &mesh_node("local", "192.168.1.10"))
        .await;
    assert!(matches!(outcome, RegistrationOutcome::Failed(_)));
}

#[tokio::test]
async fn test_invalid_target_fails_without_request() {
    let outcome = client()
        .register("not a url", &mesh_node("local", "192.168.1.10"))
        .await;
    assert!(matches!(outcome, RegistrationOutcome::Failed(_)));
}

#[tokio::test]
async fn test_callback_receives_outcome() {
    let peer = MockPeer::start().await;
    peer.respond_with_status(406).await;

    let (tx, rx) = tokio::sync::oneshot::channel();
    let sent = client().register_with_callback(peer.uri(), mesh_node("local", "192.168.1.10"), move |o| {
        let _ = tx.send(o);
    });
    assert!(sent);

    assert_eq!(rx.await.unwrap(), RegistrationOutcome::Rejected);
}

#[test]
fn test_callback_outside_runtime_reports_failure() {
    let (tx, rx) = std::sync::mpsc::channel();
    let sent = client().register_with_callback(
        "http://192.168.1.90:8080".to_string(),
        mesh_node("local", "192.168.1.10"),
        move |o| {
            let _ = tx.send(o);
        },
    );

    assert!(!sent);
    assert!(matches!(rx.try_recv(), Ok(RegistrationOutcome::Failed(_))));
}

#[test]
fn test_target_with_path_keeps_it() {
    let url = RegistrationClient::registration_url("http://10.0.0.2:8080/mesh").unwrap();
    assert_eq!(url.as_str(), "http://10.0.0.2:8080/mesh/DEVICEREG.JSON");
}
