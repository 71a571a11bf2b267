//! Event decoding and handling.

use std::sync::Arc;

use tokio::sync::mpsc;

use herald::ledger::{Ledger, Status};
use herald::signal::OneShot;
use herald::whatsapp::events::{receipt_status, EventHandler, WhatsAppEvent};
use herald::whatsapp::session::SessionError;

fn setup() -> (tempfile::TempDir, Arc<Ledger>, Arc<OneShot>, EventHandler) {
    let dir = tempfile::tempdir().expect("tempdir");
    let ledger = match Ledger::initialize(dir.path().join("status.csv")) {
        Ok(ledger) => Arc::new(ledger),
        Err(err) => panic!("ledger should initialise: {err}"),
    };
    let readiness = Arc::new(OneShot::new());
    let handler = EventHandler::new(Arc::clone(&ledger), Arc::clone(&readiness));
    (dir, ledger, readiness, handler)
}

fn receipt(kind: &str, ids: &[&str]) -> WhatsAppEvent {
    WhatsAppEvent::Receipt {
        sender: "628111@s.whatsapp.net".to_owned(),
        message_ids: ids.iter().map(|s| (*s).to_owned()).collect(),
        receipt_type: kind.to_owned(),
    }
}

#[test]
fn decodes_bridge_event_json() {
    let json = r#"[
        {"type": "connected", "push_name": "Church Office"},
        {"type": "receipt", "sender": "628111@s.whatsapp.net", "message_ids": ["A", "B"], "receipt_type": "read"},
        {"type": "logged_out", "reason": "unlinked"},
        {"type": "push_name_setting", "push_name": "Office"},
        {"type": "disconnected"}
    ]"#;
    let events: Vec<WhatsAppEvent> = serde_json::from_str(json).expect("should decode");
    assert_eq!(events.len(), 5);
    assert_eq!(
        events[0],
        WhatsAppEvent::Connected {
            push_name: Some("Church Office".to_owned())
        }
    );
    assert_eq!(events[1], receipt("read", &["A", "B"]));
}

#[test]
fn receipt_types_map_to_statuses() {
    assert_eq!(receipt_status("delivered"), Some(Status::Delivered));
    assert_eq!(receipt_status("read"), Some(Status::Read));
    assert_eq!(receipt_status("played"), None);
    assert_eq!(receipt_status("sender"), None);
}

#[test]
fn receipt_uses_sender_user_and_first_message_id() {
    let (_dir, ledger, _, handler) = setup();

    handler.handle(receipt("delivered", &["A", "B"])).expect("handled");

    let entries = ledger.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].number, "628111");
    assert_eq!(entries[0].message_id, "A");
    assert_eq!(entries[0].status, Status::Delivered);
}

#[test]
fn unknown_receipt_type_leaves_ledger_untouched() {
    let (_dir, ledger, _, handler) = setup();
    ledger.update("628111", "A", Status::Sent).expect("seed");

    handler.handle(receipt("played", &["A"])).expect("handled");
    handler.handle(receipt("read", &[])).expect("handled");

    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger.status_of("628111", "A"), Some(Status::Sent));
}

#[test]
fn readiness_needs_a_push_name() {
    let (_dir, _, readiness, handler) = setup();

    handler
        .handle(WhatsAppEvent::Connected { push_name: None })
        .expect("handled");
    assert!(!readiness.is_fired());

    handler
        .handle(WhatsAppEvent::PushNameSetting {
            push_name: "Office".to_owned(),
        })
        .expect("handled");
    assert!(readiness.is_fired());

    // Already signalled: repeat events are harmless.
    handler
        .handle(WhatsAppEvent::Connected {
            push_name: Some("Office".to_owned()),
        })
        .expect("handled");
}

#[test]
fn account_name_while_disconnected_does_not_signal_readiness() {
    let (_dir, _, readiness, handler) = setup();
    let name = || WhatsAppEvent::PushNameSetting {
        push_name: "Office".to_owned(),
    };

    handler.handle(name()).expect("handled");
    assert!(!readiness.is_fired(), "no Connected seen yet");

    handler
        .handle(WhatsAppEvent::Connected { push_name: None })
        .expect("handled");
    handler
        .handle(WhatsAppEvent::Disconnected { reason: None })
        .expect("handled");
    handler.handle(name()).expect("handled");
    assert!(!readiness.is_fired(), "link dropped before the name arrived");

    handler
        .handle(WhatsAppEvent::Connected { push_name: None })
        .expect("handled");
    handler.handle(name()).expect("handled");
    assert!(readiness.is_fired());
}

#[tokio::test]
async fn logout_event_ends_handler_with_forced_logout() {
    let (_dir, ledger, _, handler) = setup();
    let (tx, rx) = mpsc::channel(8);

    tx.send(receipt("delivered", &["A"])).await.expect("send");
    tx.send(WhatsAppEvent::LoggedOut { reason: None }).await.expect("send");
    tx.send(receipt("read", &["A"])).await.expect("send");

    let result = handler.run(rx).await;
    assert!(matches!(result, Err(SessionError::ForcedLogout)));
    assert_eq!(ledger.status_of("628111", "A"), Some(Status::Delivered));
}

#[tokio::test]
async fn handler_returns_when_channel_closes() {
    let (_dir, _, _, handler) = setup();
    let (tx, rx) = mpsc::channel(8);
    drop(tx);
    assert!(handler.run(rx).await.is_ok());
}
