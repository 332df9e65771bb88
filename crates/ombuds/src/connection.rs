use crate::error::OmbudsError;
use crate::metrics::{counters, gauges, histograms};
use crate::ratelimit::RateLimiter;
use crate::registry::SessionHandle;
use crate::relay::{self, RouteDecision};
use crate::server::ServerState;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use ombud_common::protocol::{ClientEvent, Envelope, PROTOCOL_VERSION};
use ombud_common::Identity;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{interval, timeout, Duration};
use tokio_tungstenite::tungstenite::http::Request;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;
type WsRecv = SplitStream<WebSocketStream<TcpStream>>;

struct IpGuard {
    state: Arc<ServerState>,
    ip: IpAddr,
}

impl Drop for IpGuard {
    fn drop(&mut self) {
        let mut remove = false;
        if let Some(mut entry) = self.state.ip_connections.get_mut(&self.ip) {
            *entry = entry.saturating_sub(1);
            if *entry == 0 {
                remove = true;
            }
        }
        if remove {
            self.state
                .ip_connections
                .remove_if(&self.ip, |_, v| *v == 0);
        }
    }
}

struct ConnGuard {
    state: Arc<ServerState>,
}

impl ConnGuard {
    fn acquire(state: &Arc<ServerState>) -> Self {
        state.active_connections.fetch_add(1, Ordering::Relaxed);
        Self {
            state: state.clone(),
        }
    }
}

impl Drop for ConnGuard {
    fn drop(&mut self) {
        self.state
            .active_connections
            .fetch_sub(1, Ordering::Relaxed);
    }
}

/// Serialize one envelope and write it as a single text frame.
async fn send_envelope<T>(ws_tx: &mut T, envelope: &Envelope) -> Result<(), OmbudsError>
where
    T: futures_util::Sink<Message> + Unpin,
    T::Error: std::fmt::Debug,
{
    let text = serde_json::to_string(envelope)?;
    ws_tx
        .send(Message::Text(text))
        .await
        .map_err(|_| OmbudsError::ConnectionClosed)
}

/// Wait for a well-formed `auth` event and verify its token.
///
/// Malformed frames are answered with an "invalid message" envelope and
/// the wait continues; well-formed non-auth events from the
/// unauthenticated session carry no identity and are dropped.
async fn wait_for_auth(
    ws_tx: &mut WsSink,
    ws_rx: &mut WsRecv,
    state: &ServerState,
) -> Result<Identity, OmbudsError> {
    loop {
        let msg = ws_rx
            .next()
            .await
            .ok_or(OmbudsError::ConnectionClosed)?
            .map_err(OmbudsError::WebSocket)?;
        match msg {
            Message::Text(text) => match ClientEvent::parse(&text) {
                Ok(ClientEvent::Auth { token }) => {
                    return state.verifier.verify(&token).map_err(OmbudsError::Auth);
                }
                Ok(ClientEvent::Message { .. }) => {
                    tracing::debug!("dropping message event from unauthenticated connection");
                }
                Err(_) => {
                    counters::messages_dropped_total("malformed");
                    send_envelope(ws_tx, &Envelope::system("Invalid message")).await?;
                }
            },
            Message::Binary(_) => {
                counters::messages_dropped_total("malformed");
                send_envelope(ws_tx, &Envelope::system("Invalid message")).await?;
            }
            Message::Ping(data) => {
                if let Err(e) = ws_tx.send(Message::Pong(data)).await {
                    tracing::debug!("failed to send pong: {}", e);
                }
            }
            Message::Close(_) => return Err(OmbudsError::ConnectionClosed),
            _ => {}
        }
    }
}

/// Drive the auth handshake: one system envelope on failure, a welcome
/// envelope on success, no retry either way.
async fn authenticate(
    ws_tx: &mut WsSink,
    ws_rx: &mut WsRecv,
    state: &ServerState,
) -> Result<Identity, OmbudsError> {
    match timeout(
        Duration::from_secs(state.config.auth_timeout),
        wait_for_auth(ws_tx, ws_rx, state),
    )
    .await
    {
        Ok(Ok(identity)) => {
            counters::auth_total("ok");
            send_envelope(ws_tx, &Envelope::welcome(&identity)).await?;
            Ok(identity)
        }
        Ok(Err(e)) => {
            if matches!(e, OmbudsError::Auth(_)) {
                counters::auth_total("failed");
                let _ = send_envelope(ws_tx, &Envelope::system("Authentication failed")).await;
            }
            Err(e)
        }
        Err(_) => {
            counters::auth_total("timeout");
            let _ = send_envelope(ws_tx, &Envelope::system("Authentication failed")).await;
            Err(OmbudsError::AuthTimeout)
        }
    }
}

/// Deliver an envelope into another session's channel, fire-and-forget.
///
/// A closed channel means the session's task is gone; its stale registry
/// entry is removed so later lookups report the user offline.
fn deliver(state: &ServerState, dest: &SessionHandle, envelope: Envelope) -> bool {
    match dest.tx.try_send(envelope) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(_)) => {
            counters::messages_dropped_total("backpressure");
            false
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            counters::messages_dropped_total("offline");
            state
                .registry
                .remove_if(&dest.identity.id, dest.connected_at);
            false
        }
    }
}

pub async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    state: Arc<ServerState>,
) -> Result<(), OmbudsError> {
    // Acquire pre-auth semaphore to limit unauthenticated connections
    let _permit = state.pre_auth_semaphore.acquire().await.map_err(|_| {
        tracing::debug!("pre-auth semaphore closed");
        OmbudsError::ConnectionClosed
    })?;
    let _conn_guard = ConnGuard::acquire(&state);

    // Transport cap sits above max_payload; overlong frames still reach
    // the JSON-level oversize check.
    let mut ws_config = WebSocketConfig::default();
    ws_config.max_message_size = Some(state.config.max_payload + 1024);
    ws_config.max_frame_size = Some(state.config.max_payload + 1024);

    let client_proto = Arc::new(std::sync::OnceLock::new());
    let proto_cell = client_proto.clone();
    let ws_stream = tokio_tungstenite::accept_hdr_async_with_config(
        stream,
        move |req: &Request<()>, mut resp: tokio_tungstenite::tungstenite::http::Response<()>| {
            if let Some(protocols) = req.headers().get("sec-websocket-protocol") {
                if let Ok(proto_str) = protocols.to_str() {
                    for p in proto_str.split(',').map(str::trim) {
                        let _ = proto_cell.set(p.to_string());
                        if p == PROTOCOL_VERSION {
                            resp.headers_mut().insert(
                                "sec-websocket-protocol",
                                tokio_tungstenite::tungstenite::http::HeaderValue::from_static(
                                    PROTOCOL_VERSION,
                                ),
                            );
                            break;
                        }
                    }
                }
            }
            Ok(resp)
        },
        Some(ws_config),
    )
    .await
    .map_err(OmbudsError::WebSocket)?;

    // Atomic check-and-increment for per-IP connection limiting
    let client_ip = peer_addr.ip();
    let mut should_reject = false;
    match state.ip_connections.entry(client_ip) {
        dashmap::mapref::entry::Entry::Occupied(mut entry) => {
            let count = *entry.get();
            if count >= state.config.max_conns_ip {
                should_reject = true;
            } else {
                *entry.get_mut() += 1;
            }
        }
        dashmap::mapref::entry::Entry::Vacant(entry) => {
            entry.insert(1);
        }
    }
    if should_reject {
        tracing::debug!(ip = %client_ip, limit = state.config.max_conns_ip, "per-IP connection limit exceeded");
        return Err(OmbudsError::ConnectionClosed);
    }
    let _ip_guard = IpGuard {
        state: state.clone(),
        ip: client_ip,
    };

    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    // Reject clients speaking an unknown wire version before wasting an
    // auth round-trip on them.
    let client_version = client_proto.get().map(String::as_str).unwrap_or("");
    if client_version != PROTOCOL_VERSION {
        tracing::debug!(
            client_proto = client_version,
            required = PROTOCOL_VERSION,
            "rejecting outdated client"
        );
        let _ = send_envelope(&mut ws_tx, &Envelope::system("Unsupported protocol version")).await;
        return Err(OmbudsError::UnsupportedProtocol);
    }

    let identity = authenticate(&mut ws_tx, &mut ws_rx, &state).await?;
    tracing::debug!(user = %identity.id, role = ?identity.role, "session authenticated");

    let (deliver_tx, mut deliver_rx) = mpsc::channel::<Envelope>(256);
    let connected_at = Instant::now();
    let session = SessionHandle {
        tx: deliver_tx,
        identity,
        connected_at,
        cancel: CancellationToken::new(),
    };

    // A second login for the same identity takes the registry slot and
    // force-closes the connection it replaced.
    if let Some(superseded) = state.registry.insert(session.clone()) {
        superseded.cancel.cancel();
    }

    gauges::inc_sessions_active();

    let result = run_message_loop(&mut ws_tx, &mut ws_rx, &mut deliver_rx, &state, &session).await;

    state.registry.remove_if(&session.identity.id, connected_at);
    gauges::dec_sessions_active();

    result
}

/// Drive the select loop for an authenticated session.
async fn run_message_loop(
    ws_tx: &mut WsSink,
    ws_rx: &mut WsRecv,
    deliver_rx: &mut mpsc::Receiver<Envelope>,
    state: &ServerState,
    session: &SessionHandle,
) -> Result<(), OmbudsError> {
    let mut rate_limiter = RateLimiter::new();
    let mut ping_interval = interval(Duration::from_secs(state.config.ping_interval));
    let idle_timeout = Duration::from_secs(state.config.idle_timeout);
    let mut last_activity = Instant::now();

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                last_activity = Instant::now();
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let start = Instant::now();
                        process_event(&text, state, ws_tx, &mut rate_limiter, session).await?;
                        histograms::relay_latency_seconds(start.elapsed().as_secs_f64());
                    }
                    Some(Ok(Message::Binary(_))) => {
                        counters::messages_dropped_total("malformed");
                        send_envelope(ws_tx, &Envelope::system("Invalid message")).await?;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = ws_tx.send(Message::Pong(data)).await {
                            tracing::debug!("failed to send pong: {}", e);
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => return Ok(()),
                    Some(Err(e)) => return Err(OmbudsError::WebSocket(e)),
                    _ => {}
                }
            }
            Some(envelope) = deliver_rx.recv() => {
                last_activity = Instant::now();
                send_envelope(ws_tx, &envelope).await?;
            }
            () = session.cancel.cancelled() => {
                tracing::debug!(user = %session.identity.id, "session superseded by a newer login");
                let _ = send_envelope(ws_tx, &Envelope::system("Signed in from another connection")).await;
                return Ok(());
            }
            _ = ping_interval.tick() => {
                if last_activity.elapsed() >= idle_timeout {
                    tracing::debug!("idle timeout reached, closing connection");
                    return Ok(());
                }
                if let Err(e) = ws_tx.send(Message::Ping(vec![])).await {
                    tracing::debug!("failed to send ping: {}", e);
                }
            }
        }
    }
}

/// Apply one inbound frame from an authenticated session: parse, check
/// hygiene limits, classify, then perform the sends the decision calls
/// for.
async fn process_event<T>(
    text: &str,
    state: &ServerState,
    ws_tx: &mut T,
    rate_limiter: &mut RateLimiter,
    session: &SessionHandle,
) -> Result<(), OmbudsError>
where
    T: futures_util::Sink<Message> + Unpin,
    T::Error: std::fmt::Debug,
{
    if text.len() > state.config.max_payload {
        counters::messages_dropped_total("oversize");
        return send_envelope(ws_tx, &Envelope::system("Message too large")).await;
    }

    let event = match ClientEvent::parse(text) {
        Ok(event) => event,
        Err(_) => {
            counters::messages_dropped_total("malformed");
            return send_envelope(ws_tx, &Envelope::system("Invalid message")).await;
        }
    };

    let (message, recipient_id) = match event {
        ClientEvent::Auth { .. } => {
            // Identity is fixed for the session's lifetime.
            tracing::debug!(user = %session.identity.id, "ignoring auth event on authenticated session");
            return Ok(());
        }
        ClientEvent::Message {
            message,
            recipient_id,
        } => (message, recipient_id),
    };

    if !rate_limiter.check_and_record(state.config.msg_rate) {
        counters::messages_dropped_total("rate_limit");
        return send_envelope(ws_tx, &Envelope::system("Too many messages, slow down")).await;
    }

    let identity = &session.identity;
    let decision = relay::classify(
        identity.role,
        state.quota.get(&identity.id),
        recipient_id.as_deref(),
        state.config.bot_reply_limit,
    );

    match decision {
        RouteDecision::DirectSend { recipient } => {
            let Some(dest) = state.registry.get(&recipient) else {
                counters::messages_dropped_total("offline");
                return send_envelope(ws_tx, &Envelope::system("User is not online")).await;
            };
            match dest.tx.try_send(Envelope::direct(identity, &message, &identity.id)) {
                Ok(()) => {
                    counters::messages_relayed_total("direct");
                    // Echo a copy so the admin's own UI shows the sent
                    // message, threaded under the recipient.
                    send_envelope(ws_tx, &Envelope::direct(identity, &message, &recipient)).await?;
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    counters::messages_dropped_total("backpressure");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    counters::messages_dropped_total("offline");
                    state.registry.remove_if(&dest.identity.id, dest.connected_at);
                    send_envelope(ws_tx, &Envelope::system("User is not online")).await?;
                }
            }
        }
        RouteDecision::Escalate => {
            let mut reached = 0usize;
            state.registry.for_each_admin(|admin| {
                if deliver(state, admin, Envelope::escalation(identity, &message)) {
                    reached += 1;
                }
            });
            counters::escalations_total();
            tracing::debug!(user = %identity.id, admins = reached, "escalated message");
        }
        RouteDecision::BotReply => {
            let reply = state.bot.reply_to(&message);
            let count = state.quota.increment(&identity.id);
            counters::bot_replies_total();
            send_envelope(ws_tx, &Envelope::bot_reply(reply, &identity.id)).await?;

            // The increment is atomic, so exactly one message observes the
            // transition to the limit and triggers the one-time notices.
            if count == state.config.bot_reply_limit {
                send_envelope(ws_tx, &Envelope::limit_reached(&identity.id, count)).await?;
                state.registry.for_each_admin(|admin| {
                    let _ = deliver(state, admin, Envelope::limit_notice(identity, count));
                });
                tracing::debug!(user = %identity.id, "automated reply limit reached");
            }
        }
        RouteDecision::Broadcast { recipient } => {
            let mut relayed = false;
            state.registry.for_each(|dest| {
                if dest.identity.id != identity.id && dest.identity.id == recipient {
                    relayed |= deliver(state, dest, Envelope::direct(identity, &message, &identity.id));
                }
            });
            if relayed {
                counters::messages_relayed_total("broadcast");
            }
        }
    }

    Ok(())
}
