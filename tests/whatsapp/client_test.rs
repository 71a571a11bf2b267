//! Bridge HTTP client against a one-shot local server.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use herald::whatsapp::client::{BridgeClient, MessagingClient, PairingEvent};
use herald::whatsapp::jid::resolve;
use herald::whatsapp::media::{MediaClass, Payload};
use herald::whatsapp::WhatsAppError;

/// Serve one response and hand back the raw request text.
async fn serve_once(status_line: &str, body: &str) -> (String, JoinHandle<String>) {
    let listener_result = TcpListener::bind("127.0.0.1:0").await;
    assert!(listener_result.is_ok());
    let listener = match listener_result {
        Ok(listener) => listener,
        Err(err) => panic!("listener should bind: {err}"),
    };
    let addr = match listener.local_addr() {
        Ok(addr) => addr,
        Err(err) => panic!("listener should expose local addr: {err}"),
    };

    let status_line_owned = status_line.to_owned();
    let body_owned = body.to_owned();
    let handle = tokio::spawn(async move {
        let mut request = String::new();
        if let Ok((mut socket, _)) = listener.accept().await {
            let mut read_buf = vec![0_u8; 64 * 1024];
            let n = socket.read(&mut read_buf).await.unwrap_or(0);
            request = String::from_utf8_lossy(&read_buf[..n]).into_owned();

            let response = format!(
                "HTTP/1.1 {status_line_owned}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body_owned}",
                body_owned.len()
            );
            let _ = socket.write_all(response.as_bytes()).await;
        }
        request
    });

    (format!("http://{addr}"), handle)
}

#[tokio::test]
async fn status_decodes_envelope() {
    let (url, server) = serve_once(
        "200 OK",
        r#"{"success":true,"data":{"connected":true,"paired":true,"push_name":"Office"}}"#,
    )
    .await;
    let client = BridgeClient::new(url);

    let status = client.status().await.expect("status");
    assert!(status.connected);
    assert!(status.paired);
    assert_eq!(status.push_name.as_deref(), Some("Office"));

    let request = server.await.expect("server task");
    assert!(request.starts_with("GET /status "));
}

#[tokio::test]
async fn send_posts_jid_and_payload_and_returns_id() {
    let (url, server) = serve_once("200 OK", r#"{"success":true,"data":{"id":"3EB0ABC123"}}"#).await;
    let client = BridgeClient::new(format!("{url}/"));

    let id = client
        .send_message(
            &resolve("628111"),
            &Payload::Text {
                body: "hello".to_owned(),
            },
        )
        .await
        .expect("send");
    assert_eq!(id, "3EB0ABC123");

    let request = server.await.expect("server task");
    assert!(request.starts_with("POST /send "));
    assert!(request.contains(r#""jid":"628111@s.whatsapp.net""#));
    assert!(request.contains(r#""type":"text""#));
}

#[tokio::test]
async fn bridge_failure_surfaces_error_message() {
    let (url, _server) = serve_once(
        "500 Internal Server Error",
        r#"{"success":false,"error":"not connected"}"#,
    )
    .await;
    let client = BridgeClient::new(url);

    let err = client
        .send_message(
            &resolve("628111"),
            &Payload::Text {
                body: "hello".to_owned(),
            },
        )
        .await;
    match err {
        Err(WhatsAppError::Api(msg)) => assert!(msg.contains("not connected")),
        other => panic!("expected API error, got {other:?}"),
    }
}

#[tokio::test]
async fn success_false_with_200_is_error() {
    let (url, _server) = serve_once("200 OK", r#"{"success":false,"error":"rate limited"}"#).await;
    let client = BridgeClient::new(url);

    assert!(matches!(
        client.connect().await,
        Err(WhatsAppError::Api(_))
    ));
}

#[tokio::test]
async fn check_returns_reachability() {
    let (url, server) = serve_once(
        "200 OK",
        r#"{"success":true,"data":[{"query":"0811","jid":null,"is_in":false}]}"#,
    )
    .await;
    let client = BridgeClient::new(url);

    let results = client
        .is_on_whatsapp(&["0811".to_owned()])
        .await
        .expect("check");
    assert_eq!(results.len(), 1);
    assert!(!results[0].is_in);

    let request = server.await.expect("server task");
    assert!(request.contains(r#""numbers":["0811"]"#));
}

#[tokio::test]
async fn upload_sends_base64_and_media_type() {
    let (url, server) = serve_once(
        "200 OK",
        r#"{"success":true,"data":{"url":"u","direct_path":"/d","media_key":"k","file_sha256":"h","file_enc_sha256":"e","file_length":3}}"#,
    )
    .await;
    let client = BridgeClient::new(url);

    let uploaded = client.upload(b"abc", MediaClass::Video).await.expect("upload");
    assert_eq!(uploaded.direct_path, "/d");
    assert_eq!(uploaded.file_length, 3);

    let request = server.await.expect("server task");
    assert!(request.contains(r#""media_type":"video""#));
    assert!(request.contains(r#""data":"YWJj""#));
}

#[tokio::test]
async fn pairing_event_decodes() {
    let (url, _server) = serve_once(
        "200 OK",
        r#"{"success":true,"data":{"event":"code","code":"2@xyz"}}"#,
    )
    .await;
    let client = BridgeClient::new(url);

    assert_eq!(
        client.next_pairing_event().await.expect("event"),
        PairingEvent::Code {
            code: "2@xyz".to_owned(),
            qr_png: None
        }
    );
}

#[tokio::test]
async fn unreachable_bridge_is_not_connected() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let client = BridgeClient::new(format!("http://{addr}"));
    assert!(!client.is_connected().await);
    assert!(matches!(
        client.status().await,
        Err(WhatsAppError::BridgeNotRunning)
    ));
}
