//! Connectivity probing and handshake retries.

use super::harness::{wait_event, wait_state, TestHarness};
use crate::{ConnectionStatus, DisconnectReason, RelayEvent, Stage};
use std::time::Duration;

fn is_disconnected(event: &RelayEvent) -> bool {
    matches!(event, RelayEvent::StateChanged(s) if s.connection_status == ConnectionStatus::Disconnected)
}

#[tokio::test(start_paused = true)]
async fn unreachable_relay_fails_first_attempt_once() {
    let h = TestHarness::new();
    h.probe.set_reachable(false);

    let client = h.hub.join_random("duel", 2, "p1").unwrap();
    let mut events = client.subscribe();

    let state = wait_state(&client, |s| {
        s.connection_status == ConnectionStatus::Disconnected
    })
    .await;
    assert_eq!(
        state.disconnect_reason,
        Some(DisconnectReason::InitialConnectionFailed)
    );
    assert_eq!(state.stage, Stage::WaitingForMoreMembers);
    assert_eq!(h.probe.calls(), 1);
    assert_eq!(h.connector.attempts(), 0);
    assert!(!h.hub.can_try_reconnecting("p1"));
    assert!(!h.hub.registry().is_live("p1"));

    tokio::time::sleep(Duration::from_secs(30)).await;
    let mut disconnects = 0;
    while let Ok(event) = events.try_recv() {
        if is_disconnected(&event) {
            disconnects += 1;
        }
    }
    assert_eq!(disconnects, 1);
    assert_eq!(h.probe.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn failed_first_attempt_can_be_retried() {
    let mut h = TestHarness::new();
    h.probe.set_reachable(false);

    let client = h.hub.join_random("duel", 2, "p1").unwrap();
    wait_state(&client, |s| s.can_reconnect()).await;

    h.probe.set_reachable(true);
    client.reconnect();
    let state = wait_state(&client, |s| {
        s.connection_status != ConnectionStatus::Disconnected
    })
    .await;
    assert!(matches!(
        state.connection_status,
        ConnectionStatus::Connecting | ConnectionStatus::Connected
    ));

    let _conn = h.next_conn().await;
    wait_state(&client, |s| s.is_connected()).await;
    assert!(h.hub.registry().is_live("p1"));
}

#[tokio::test(start_paused = true)]
async fn started_session_keeps_probing_while_offline() {
    let mut h = TestHarness::new();
    let (client, conn) = h.started_session("p1").await;

    h.probe.set_reachable(false);
    let probes_before = h.probe.calls();
    conn.drop_connection();

    wait_state(&client, |s| {
        s.connection_status == ConnectionStatus::Reconnecting
    })
    .await;
    tokio::time::sleep(Duration::from_secs(30)).await;

    let state = client.state();
    assert_eq!(state.connection_status, ConnectionStatus::Reconnecting);
    assert_eq!(state.disconnect_reason, None);
    assert!(h.probe.calls() - probes_before >= 5);
    assert_eq!(h.connector.attempts(), 1);

    h.probe.set_reachable(true);
    let _conn = h.next_conn().await;
    wait_state(&client, |s| s.is_connected()).await;
    assert!(h.hub.can_try_reconnecting("p1"));
}

#[tokio::test(start_paused = true)]
async fn disconnect_while_offline_ends_probing() {
    let mut h = TestHarness::new();
    let (client, conn) = h.started_session("p1").await;
    let mut events = client.subscribe();

    h.probe.set_reachable(false);
    conn.drop_connection();
    wait_state(&client, |s| {
        s.connection_status == ConnectionStatus::Reconnecting
    })
    .await;
    tokio::time::sleep(Duration::from_secs(10)).await;

    client.disconnect(false);
    let event = wait_event(&mut events, is_disconnected).await;
    let RelayEvent::StateChanged(state) = event else {
        unreachable!()
    };
    assert_eq!(
        state.disconnect_reason,
        Some(DisconnectReason::DisconnectRequested)
    );
    assert_eq!(state.stage, Stage::ConnectionClosed);
    assert!(!h.hub.can_try_reconnecting("p1"));
    assert!(!h.hub.registry().is_live("p1"));

    let probes = h.probe.calls();
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(h.probe.calls(), probes);
}

#[tokio::test(start_paused = true)]
async fn handshake_retried_with_fresh_probe() {
    let mut h = TestHarness::new();
    h.connector.refuse(2);

    let client = h.hub.join_random("duel", 2, "p1").unwrap();
    let _conn = h.next_conn().await;
    wait_state(&client, |s| s.is_connected()).await;

    assert_eq!(h.connector.attempts(), 3);
    assert_eq!(h.probe.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn exhausted_handshakes_fail_first_attempt() {
    let h = TestHarness::new();
    h.connector.refuse(3);

    let client = h.hub.join_random("duel", 2, "p1").unwrap();
    let state = wait_state(&client, |s| {
        s.connection_status == ConnectionStatus::Disconnected
    })
    .await;

    assert_eq!(
        state.disconnect_reason,
        Some(DisconnectReason::InitialConnectionFailed)
    );
    assert_eq!(h.connector.attempts(), 3);
}

#[tokio::test(start_paused = true)]
async fn exhausted_handshakes_after_start_report_dead_connection() {
    let mut h = TestHarness::new();
    let (client, conn) = h.started_session("p1").await;

    h.connector.refuse(3);
    conn.drop_connection();

    let state = wait_state(&client, |s| {
        s.connection_status == ConnectionStatus::Disconnected
    })
    .await;
    assert_eq!(
        state.disconnect_reason,
        Some(DisconnectReason::ConnectionDied)
    );
    assert_eq!(state.stage, Stage::SessionInProgress);
    assert!(state.can_reconnect());
    assert!(h.hub.can_try_reconnecting("p1"));

    client.reconnect();
    let conn = h.next_conn().await;
    assert_eq!(conn.url.query(), Some("sessionType=duel&sessionId=s1"));
    wait_state(&client, |s| s.is_connected()).await;
}
