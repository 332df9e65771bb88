use futures_util::{SinkExt, StreamExt};
use ombud_common::protocol::{ClientEvent, Envelope, PROTOCOL_VERSION};
use ombud_common::token::{self, Claims};
use ombud_common::Role;
use ombuds::auth::HmacTokenVerifier;
use ombuds::config::ServerConfig;
use ombuds::ServerState;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

pub const TEST_SECRET: &[u8] = b"integration-test-secret-32bytes!";

pub fn test_config(listen: SocketAddr) -> ServerConfig {
    ServerConfig {
        listen,
        metrics_addr: "127.0.0.1:0".parse().unwrap(),
        max_conns: 1000,
        max_conns_ip: 100,
        msg_rate: 120,
        max_payload: 16_384,
        auth_timeout: 5,
        ping_interval: 30,
        idle_timeout: 120,
        bot_reply_limit: 5,
    }
}

pub fn mint_token(id: &str, name: &str, role: Role) -> String {
    token::mint(
        TEST_SECRET,
        &Claims {
            id: id.to_string(),
            name: name.to_string(),
            role,
            exp: token::unix_now() + 3600,
        },
    )
    .unwrap()
}

pub struct TestClient {
    pub ws_tx: futures_util::stream::SplitSink<
        tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
        Message,
    >,
    pub ws_rx: futures_util::stream::SplitStream<
        tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
    >,
}

impl TestClient {
    /// Open a WebSocket with the expected subprotocol, without
    /// authenticating.
    pub async fn connect_raw(addr: &SocketAddr) -> Self {
        use tokio_tungstenite::tungstenite::client::IntoClientRequest;
        let url = format!("ws://{addr}");
        let mut req = url.into_client_request().unwrap();
        req.headers_mut()
            .insert("Sec-WebSocket-Protocol", PROTOCOL_VERSION.parse().unwrap());
        let (ws, _) = tokio_tungstenite::connect_async(req).await.unwrap();
        let (ws_tx, ws_rx) = ws.split();
        Self { ws_tx, ws_rx }
    }

    /// Connect and authenticate, asserting the welcome envelope.
    pub async fn connect(addr: &SocketAddr, token: &str) -> Self {
        let mut client = Self::connect_raw(addr).await;
        client
            .send_event(&ClientEvent::Auth {
                token: token.to_string(),
            })
            .await;
        let welcome = client.recv_envelope().await;
        assert_eq!(welcome.sender, "System");
        assert!(
            welcome.message.starts_with("Welcome"),
            "expected welcome, got {welcome:?}"
        );
        client
    }

    pub async fn send_event(&mut self, event: &ClientEvent) {
        let text = serde_json::to_string(event).unwrap();
        self.send_text(&text).await;
    }

    pub async fn send_text(&mut self, text: &str) {
        self.ws_tx
            .send(Message::Text(text.to_string()))
            .await
            .unwrap();
    }

    pub async fn send_message(&mut self, text: &str) {
        self.send_event(&ClientEvent::Message {
            message: text.to_string(),
            recipient_id: None,
        })
        .await;
    }

    pub async fn send_message_to(&mut self, text: &str, recipient: &str) {
        self.send_event(&ClientEvent::Message {
            message: text.to_string(),
            recipient_id: Some(recipient.to_string()),
        })
        .await;
    }

    pub async fn recv_envelope(&mut self) -> Envelope {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(5), self.ws_rx.next())
                .await
                .expect("timeout waiting for envelope")
                .expect("stream ended while waiting for envelope")
                .unwrap();
            match msg {
                Message::Text(text) => return serde_json::from_str(&text).unwrap(),
                Message::Ping(_) | Message::Pong(_) => {}
                other => panic!("expected text frame, got {other:?}"),
            }
        }
    }

    pub async fn recv_envelope_timeout(&mut self, timeout: Duration) -> Option<Envelope> {
        tokio::time::timeout(timeout, self.recv_envelope()).await.ok()
    }

    /// Wait for the server to drop the connection, tolerating a close
    /// frame, a clean end of stream, or a reset.
    pub async fn expect_closed(&mut self) {
        let outcome = tokio::time::timeout(Duration::from_secs(5), async {
            while let Some(msg) = self.ws_rx.next().await {
                match msg {
                    Ok(Message::Close(_)) | Err(_) => return Ok(()),
                    Ok(Message::Text(text)) => return Err(text),
                    _ => {}
                }
            }
            Ok(())
        })
        .await
        .expect("timeout waiting for connection close");
        if let Err(text) = outcome {
            panic!("expected close, got text frame: {text}");
        }
    }
}

fn make_state(config: ServerConfig) -> Arc<ServerState> {
    Arc::new(ServerState::new(
        config,
        Arc::new(HmacTokenVerifier::new(TEST_SECRET.to_vec())),
    ))
}

pub async fn start_server() -> (SocketAddr, Arc<ServerState>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = make_state(test_config(addr));

    let state_clone = state.clone();
    tokio::spawn(async move {
        if let Err(e) = ombuds::run(listener, state_clone).await {
            eprintln!("server error in test: {e}");
        }
    });

    tokio::time::sleep(Duration::from_millis(50)).await;

    (addr, state)
}

/// Block until the registry holds exactly `n` sessions.
pub async fn wait_for_sessions(state: &ServerState, n: usize) {
    for _ in 0..200 {
        if state.registry.len() == n {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "timed out waiting for {n} registered sessions, have {}",
        state.registry.len()
    );
}
