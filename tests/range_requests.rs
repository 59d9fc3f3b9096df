mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use common::{quad_line, single_line, MockTransport};
use rs485_configurator_lib::device::{DeviceManager, Notification};
use rs485_configurator_lib::protocol::{ProtocolError, RangeKind, RequestKind};
use rs485_configurator_lib::{MemoryStore, ProtocolSettings};

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

#[tokio::test]
async fn test_single_range_roundtrip() {
    let (mut manager, transport, mut events) = manager();

    manager.request_range(RangeKind::Single, 1, 5).await.unwrap();
    assert_eq!(transport.sent_text(), vec!["1001051400".to_string()]);
    assert!(manager.is_busy());

    manager.handle_line(&single_line(3)).await;
    assert!(!manager.is_busy());

    let notifications = drain(&mut events);
    assert_eq!(notifications.len(), 3);
    assert_eq!(notifications[0], Notification::BusyChanged { busy: true });
    match &notifications[1] {
        Notification::SingleStatus { record } => {
            assert_eq!(record.address, 3);
            assert_eq!(record.power_status, 1);
            assert_eq!(record.payload.len(), 21);
        }
        other => panic!("unexpected notification {:?}", other),
    }
    assert_eq!(notifications[2], Notification::BusyChanged { busy: false });
}

#[tokio::test]
async fn test_range_validation_sends_nothing() {
    let (mut manager, transport, mut events) = manager();

    match manager.request_range(RangeKind::Octal, 5, 20).await {
        Err(ProtocolError::Validation { field, min, max, .. }) => {
            assert_eq!(field, "start");
            assert_eq!((min, max), (10, 99));
        }
        other => panic!("expected validation error, got {:?}", other),
    }

    match manager.request_range(RangeKind::Quad, 30, 20).await {
        Err(ProtocolError::Validation { field, .. }) => assert_eq!(field, "end"),
        other => panic!("expected validation error, got {:?}", other),
    }

    assert!(manager.request_range(RangeKind::Single, 1, 248).await.is_err());
    assert!(transport.sent().is_empty());
    assert!(manager.awaiting().is_empty());
    assert!(drain(&mut events).is_empty());
}

#[tokio::test]
async fn test_single_takes_priority_over_quad() {
    let (mut manager, _transport, mut events) = manager();
    manager.request_range(RangeKind::Quad, 1, 10).await.unwrap();
    manager.request_range(RangeKind::Single, 1, 10).await.unwrap();
    drain(&mut events);

    manager.handle_line(&quad_line([1, 2, 3, 4])).await;
    assert_eq!(manager.awaiting(), vec![RequestKind::QuadRange]);

    manager.handle_line(&quad_line([1, 2, 3, 4])).await;
    assert!(manager.awaiting().is_empty());

    let notifications = drain(&mut events);
    assert!(matches!(notifications[0], Notification::SingleStatus { .. }));
    match &notifications[1] {
        Notification::QuadStatus { record } => {
            assert_eq!(record.addresses, [1, 2, 3, 4]);
            assert_eq!(record.relay_statuses, [1, 0, 1, 0]);
        }
        other => panic!("unexpected notification {:?}", other),
    }
}

#[tokio::test]
async fn test_malformed_response_clears_flag() {
    let (mut manager, _transport, mut events) = manager();
    manager.request_range(RangeKind::Quad, 1, 10).await.unwrap();
    drain(&mut events);

    manager.handle_line("01 02 03").await;
    assert!(!manager.is_busy());

    let notifications = drain(&mut events);
    assert!(matches!(notifications[0], Notification::Error { .. }));
    assert_eq!(notifications[1], Notification::BusyChanged { busy: false });
}

#[tokio::test(start_paused = true)]
async fn test_range_timeout() {
    let (mut manager, _transport, mut events) = manager();
    manager.request_range(RangeKind::Octal, 10, 20).await.unwrap();
    drain(&mut events);

    tokio::time::advance(Duration::from_secs(5)).await;
    manager.handle_timeouts().await;
    assert!(drain(&mut events).is_empty());
    assert!(manager.is_busy());

    tokio::time::advance(Duration::from_millis(5_001)).await;
    manager.handle_timeouts().await;
    let notifications = drain(&mut events);
    assert!(notifications.contains(&Notification::Timeout {
        kind: RequestKind::OctalRange
    }));
    assert!(notifications.contains(&Notification::BusyChanged { busy: false }));
    assert!(manager.awaiting().is_empty());
}

#[tokio::test]
async fn test_unsolicited_acknowledgements() {
    let (mut manager, _transport, mut events) = manager();

    manager.handle_line("OK").await;
    manager.handle_line("Error: bad checksum").await;
    manager.handle_line("hello").await;

    let notifications = drain(&mut events);
    assert_eq!(
        notifications,
        vec![
            Notification::Acknowledged {
                line: "OK".to_string()
            },
            Notification::DeviceReportedError {
                line: "Error: bad checksum".to_string()
            },
        ]
    );
}

#[tokio::test]
async fn test_single_address_write() {
    let (mut manager, transport, _events) = manager();
    manager.write_single_address(42).await.unwrap();
    assert_eq!(transport.sent_text(), vec!["20002a0a00".to_string()]);
    assert!(manager.awaiting().is_empty());

    assert!(manager.write_single_address(0).await.is_err());
    assert_eq!(transport.sent().len(), 1);
}
