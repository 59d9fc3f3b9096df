mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use common::{quad_line, MockTransport};
use rs485_configurator_lib::device::{DeviceManager, Notification, SequenceKind, SequenceState};
use rs485_configurator_lib::protocol::{ProtocolError, RequestKind};
use rs485_configurator_lib::{MemoryStore, ProtocolSettings};

const STEP: Duration = Duration::from_millis(500);

fn manager() -> (DeviceManager<MockTransport>, MockTransport, broadcast::Receiver<Notification>) {
    let transport = MockTransport::new();
    let manager = DeviceManager::new(
        transport.clone(),
        Arc::new(MemoryStore::new()),
        ProtocolSettings::default(),
    );
    let events = manager.subscribe();
    (manager, transport, events)
}

fn drain(events: &mut broadcast::Receiver<Notification>) -> Vec<Notification> {
    let mut out = Vec::new();
    while let Ok(notification) = events.try_recv() {
        out.push(notification);
    }
    out
}

fn fields(values: &[&str]) -> Box<Vec<String>> {
    Box::new(values.iter().map(|v| v.to_string()).collect())
}

#[tokio::test(start_paused = true)]
async fn test_octal_write_is_paced() {
    let (mut manager, transport, mut events) = manager();
    let values = ["11", "12", "13", "14", "15", "16", "17", "18"];

    manager.start_sequence(SequenceKind::Octal, fields(&values)).await.unwrap();
    assert_eq!(manager.sequence_state(), SequenceState::WritingStep(1));
    assert_eq!(transport.sent_text(), vec!["21000b2a00".to_string()]);

    // Nothing happens before the pacing delay has passed
    tokio::time::advance(STEP / 2).await;
    manager.advance_sequence().await.unwrap();
    assert_eq!(transport.sent().len(), 1);

    tokio::time::advance(STEP / 2).await;
    manager.advance_sequence().await.unwrap();
    for _ in 0..6 {
        tokio::time::advance(STEP).await;
        manager.advance_sequence().await.unwrap();
    }

    let sent = transport.sent();
    assert_eq!(sent.len(), 8);
    for pair in sent.windows(2) {
        assert_eq!(pair[1].at - pair[0].at, STEP);
    }
    assert_eq!(sent[7].text, "2107123400");
    assert_eq!(manager.sequence_state(), SequenceState::Idle);
    assert!(manager.write_session().is_none());

    let notifications = drain(&mut events);
    let steps = notifications
        .iter()
        .filter(|n| matches!(n, Notification::SequenceStep { .. }))
        .count();
    assert_eq!(steps, 8);
    assert_eq!(
        notifications.last(),
        Some(&Notification::SequenceCompleted {
            kind: SequenceKind::Octal
        })
    );
}

#[tokio::test(start_paused = true)]
async fn test_invalid_field_aborts_at_step() {
    let (mut manager, transport, mut events) = manager();
    let values = ["11", "12", "13", "abc", "15", "16", "17", "18"];

    manager.start_sequence(SequenceKind::Octal, fields(&values)).await.unwrap();
    tokio::time::advance(STEP).await;
    manager.advance_sequence().await.unwrap();
    tokio::time::advance(STEP).await;
    manager.advance_sequence().await.unwrap();
    tokio::time::advance(STEP).await;

    match manager.advance_sequence().await {
        Err(ProtocolError::Validation { field, value, .. }) => {
            assert_eq!(field, "AM8 channel 4");
            assert_eq!(value, "abc");
        }
        other => panic!("expected validation error, got {:?}", other),
    }
    assert_eq!(manager.sequence_state(), SequenceState::Aborted(3));
    assert_eq!(transport.sent().len(), 3);
    assert!(manager.next_wakeup().is_none());

    // Aborted for good, later ticks do nothing
    tokio::time::advance(STEP).await;
    manager.advance_sequence().await.unwrap();
    assert_eq!(transport.sent().len(), 3);

    let aborted = drain(&mut events)
        .into_iter()
        .find(|n| matches!(n, Notification::SequenceAborted { .. }));
    match aborted {
        Some(Notification::SequenceAborted { kind, index, .. }) => {
            assert_eq!(kind, SequenceKind::Octal);
            assert_eq!(index, 3);
        }
        other => panic!("expected abort notification, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_first_field_invalid_sends_nothing() {
    let (mut manager, transport, _events) = manager();
    let result = manager
        .start_sequence(SequenceKind::Quad, fields(&["0", "2", "3", "4"]))
        .await;
    assert!(matches!(result, Err(ProtocolError::Validation { .. })));
    assert_eq!(manager.sequence_state(), SequenceState::Aborted(0));
    assert!(transport.sent().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_send_failure_aborts() {
    let (mut manager, transport, _events) = manager();
    transport.fail_after(2);

    manager
        .start_sequence(SequenceKind::Quad, fields(&["21", "22", "23", "24"]))
        .await
        .unwrap();
    tokio::time::advance(STEP).await;
    manager.advance_sequence().await.unwrap();
    tokio::time::advance(STEP).await;

    assert!(matches!(
        manager.advance_sequence().await,
        Err(ProtocolError::Transport(_))
    ));
    assert_eq!(manager.sequence_state(), SequenceState::Aborted(2));
    assert_eq!(transport.sent().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_second_sequence_rejected_while_running() {
    let (mut manager, transport, _events) = manager();
    manager
        .start_sequence(SequenceKind::Quad, fields(&["21", "22", "23", "24"]))
        .await
        .unwrap();

    let second = manager
        .start_sequence(SequenceKind::Octal, fields(&["11"; 8]))
        .await;
    assert!(matches!(second, Err(ProtocolError::SequenceInProgress)));
    assert_eq!(transport.sent().len(), 1);
    assert_eq!(manager.write_session().map(|s| s.kind), Some(SequenceKind::Quad));
}

#[tokio::test(start_paused = true)]
async fn test_quad_echo_does_not_hold_busy() {
    let (mut manager, transport, mut events) = manager();
    manager
        .start_sequence(SequenceKind::Quad, fields(&["21", "22", "23", "24"]))
        .await
        .unwrap();

    assert_eq!(transport.sent_text(), vec!["2200153700".to_string()]);
    assert_eq!(manager.awaiting(), vec![RequestKind::QuadWrite]);
    assert!(!manager.is_busy());

    manager.handle_line(&quad_line([21, 2, 3, 4])).await;
    assert!(manager.awaiting().is_empty());

    let echo = drain(&mut events)
        .into_iter()
        .find_map(|n| match n {
            Notification::QuadAddressEcho { record } => Some(record),
            _ => None,
        });
    assert_eq!(echo.map(|r| r.addresses), Some([21, 2, 3, 4]));
}
