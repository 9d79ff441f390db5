//! End-to-end tests of the session client against a real coordinator.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use common::types::{Direction, Position};
use coordinator_test_utils::TestCoordinatorServer;
use session_client::api::HttpCoordinatorApi;
use session_client::config::ClientConfig;
use session_client::machine::SessionView;
use session_client::state::{Failure, Phase};
use session_client::SessionClient;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(15);

fn client(server: &TestCoordinatorServer, id: Option<&str>) -> SessionClient {
    let config = ClientConfig {
        core_url: server.url(),
        session_unit_seconds: server.config().session_unit_seconds,
        ..ClientConfig::default()
    };
    let api = Arc::new(HttpCoordinatorApi::new(server.url()).unwrap());
    SessionClient::with_api(&config, id.map(Into::into), api)
}

async fn wait_until(
    client: &SessionClient,
    what: &str,
    predicate: impl FnMut(&SessionView) -> bool,
) -> SessionView {
    match tokio::time::timeout(WAIT, client.session().wait_for(predicate)).await {
        Ok(view) => view.unwrap(),
        Err(_) => panic!("timed out waiting for {what}: {:?}", client.session().view()),
    }
}

async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("timed out waiting for {what}");
}

#[tokio::test]
async fn test_turn_hand_over_between_two_clients() -> Result<(), anyhow::Error> {
    let server = TestCoordinatorServer::spawn_with(&[("SESSION_UNIT_SECONDS", "1")]).await?;
    server.grant("alice", 3).await?;
    server.grant("bob", 3).await?;

    let alice = client(&server, Some("alice"));
    let view = wait_until(&alice, "alice active", SessionView::is_active).await;
    assert_eq!(view.state.total_seconds, Some(3));
    assert!(view.state.remaining <= 3);

    let bob = client(&server, Some("bob"));
    let view = wait_until(&bob, "bob queued", |v| v.phase() == Phase::Queued).await;
    assert_eq!(view.state.position, Some(1));

    // Alice's time runs out; bob is promoted by broadcast alone.
    wait_until(&alice, "alice ended", |v| v.phase() == Phase::Ended).await;
    let view = wait_until(&bob, "bob active", SessionView::is_active).await;
    assert_eq!(view.state.total_seconds, Some(3));

    // A command from alice after her session is dropped client-side.
    assert!(!alice.dispatcher().move_claw(Direction::Up).await);

    bob.session().leave().await?;
    assert_eq!(bob.session().view().phase(), Phase::Ended);

    let coordinator = server.coordinator().clone();
    eventually("slot released", || {
        let coordinator = coordinator.clone();
        async move {
            coordinator
                .snapshot()
                .await
                .is_ok_and(|s| s.active_id.is_none() && s.queue.is_empty())
        }
    })
    .await;

    alice.shutdown().await;
    bob.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_no_credits_surfaces_error() -> Result<(), anyhow::Error> {
    let server = TestCoordinatorServer::spawn().await?;

    let broke = client(&server, Some("broke"));
    wait_until(&broke, "no credits", |v| {
        v.phase() == Phase::Error(Failure::NoCredits)
    })
    .await;

    broke.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_missing_identity_redirects_home() -> Result<(), anyhow::Error> {
    let server = TestCoordinatorServer::spawn().await?;

    let anonymous = client(&server, None);
    wait_until(&anonymous, "redirect", |v| v.phase() == Phase::RedirectHome).await;

    let snapshot = server.coordinator().snapshot().await?;
    assert!(snapshot.queue.is_empty());
    assert!(snapshot.active_id.is_none());

    anonymous.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_controls_reach_the_scene() -> Result<(), anyhow::Error> {
    let server = TestCoordinatorServer::spawn().await?;
    server.grant("carol", 2).await?;

    let carol = client(&server, Some("carol"));
    wait_until(&carol, "carol active", SessionView::is_active).await;

    let object_count = server.config().round_object_count;
    let controller = &carol;
    eventually("round mirrored", || async move {
        controller.mirror().await.objects().len() == object_count
    })
    .await;

    assert!(controller.dispatcher().move_claw(Direction::Right).await);
    eventually("claw echoed", || async move {
        controller.mirror().await.claw() == Position::new(20, 0)
    })
    .await;
    assert_eq!(controller.dispatcher().claw().await, Position::new(20, 0));

    controller.dispatcher().grab().await;
    eventually("grab mirrored", || async move {
        controller.mirror().await.is_grabbing()
    })
    .await;

    carol.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_shutdown_releases_queue_place() -> Result<(), anyhow::Error> {
    let server = TestCoordinatorServer::spawn().await?;
    server.grant("dave", 2).await?;
    server.grant("erin", 2).await?;

    let dave = client(&server, Some("dave"));
    wait_until(&dave, "dave active", SessionView::is_active).await;
    let erin = client(&server, Some("erin"));
    wait_until(&erin, "erin queued", |v| v.phase() == Phase::Queued).await;
    wait_until(&dave, "dave sees erin", |v| v.state.queue_length == 1).await;

    erin.shutdown().await;

    let coordinator = server.coordinator().clone();
    eventually("erin removed", || {
        let coordinator = coordinator.clone();
        async move { coordinator.snapshot().await.is_ok_and(|s| s.queue.is_empty()) }
    })
    .await;

    // Dave saw the shorter queue.
    wait_until(&dave, "queue length", |v| v.state.queue_length == 0).await;

    dave.shutdown().await;
    Ok(())
}
