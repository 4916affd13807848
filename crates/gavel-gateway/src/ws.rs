//! WebSocket ingress.
//!
//! Connections authenticate with a bearer token before upgrade. Joins are
//! shape-checked before any lookup and both "no such auction" and "not a
//! participant" produce one opaque error. Bids are pre-validated, gated on
//! KV health (fail closed) and double rate-limited before reaching the bid
//! service.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use gavel_core::constants::{RATE_AUCTION_MAX, RATE_USER_MAX, RATE_WINDOW};
use gavel_core::keys;
use gavel_core::metrics;
use gavel_core::money::{format_amount, parse_amount};
use gavel_core::protocol::{ClientMessage, ServerMessage};
use gavel_core::status::RejectReason;
use gavel_core::types::AuctionId;

use gavel_engine::{BidOutcome, PlaceBidRequest};
use gavel_store::{auctions, participants};

use crate::auth::AuthedUser;
use crate::rooms::{next_conn_id, ConnId, FrameSender};
use crate::GatewayState;

/// One opaque message for every join failure (anti-enumeration).
const OPAQUE_JOIN_ERROR: &str = "auction unavailable";

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<HashMap<String, String>>,
    State(state): State<Arc<GatewayState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Response {
    let Some(token) = params.get("token") else {
        return (StatusCode::UNAUTHORIZED, "missing token").into_response();
    };
    let user = match state.auth.verify(token) {
        Ok(user) => user,
        Err(e) => {
            debug!(error = %e, "ws auth failed");
            return (StatusCode::UNAUTHORIZED, "invalid token").into_response();
        }
    };
    ws.on_upgrade(move |socket| handle_socket(socket, state, user, addr))
}

struct Session {
    conn: ConnId,
    user: AuthedUser,
    ip: String,
    out: FrameSender,
    joined: HashSet<AuctionId>,
}

impl Session {
    fn send(&self, msg: &ServerMessage) {
        let _ = self.out.send(msg.to_json());
    }

    fn reject(&self, reason: RejectReason, current_price: Option<String>, message: impl Into<String>) {
        self.send(&ServerMessage::BidRejected {
            reason_code: reason,
            current_price,
            message: message.into(),
        });
    }
}

async fn handle_socket(socket: WebSocket, state: Arc<GatewayState>, user: AuthedUser, addr: SocketAddr) {
    metrics::WS_CONNECTIONS.inc();
    let (mut sink, mut stream) = socket.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();

    let writer = tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            if sink.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    let mut session = Session {
        conn: next_conn_id(),
        user,
        ip: addr.ip().to_string(),
        out: out_tx,
        joined: HashSet::new(),
    };

    while let Some(Ok(frame)) = stream.next().await {
        match frame {
            Message::Text(text) => match serde_json::from_str::<ClientMessage>(text.as_str()) {
                Ok(msg) => handle_message(&state, &mut session, msg).await,
                Err(e) => {
                    debug!(error = %e, "undecodable client frame");
                    session.send(&ServerMessage::Error { message: "malformed message".into() });
                }
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    // Defense in depth: leave every joined room on disconnect.
    state.rooms.leave_all(session.conn);
    metrics::WS_CONNECTIONS.dec();
    writer.abort();
}

async fn handle_message(state: &Arc<GatewayState>, session: &mut Session, msg: ClientMessage) {
    match msg {
        ClientMessage::JoinAuction { auction_id } => join_auction(state, session, &auction_id).await,
        ClientMessage::LeaveAuction { auction_id } => {
            if let Ok(id) = auction_id.parse::<AuctionId>() {
                state.rooms.leave(id, session.conn);
                session.joined.remove(&id);
            }
        }
        ClientMessage::PlaceBid {
            auction_id,
            amount,
            reference_price,
            idempotency_key,
            client_sent_at,
        } => {
            place_bid(
                state,
                session,
                &auction_id,
                &amount,
                &reference_price,
                idempotency_key,
                client_sent_at,
            )
            .await
        }
    }
}

async fn join_auction(state: &Arc<GatewayState>, session: &mut Session, raw_id: &str) {
    // Shape check before any lookup.
    let Ok(auction_id) = raw_id.parse::<AuctionId>() else {
        session.send(&ServerMessage::Error { message: OPAQUE_JOIN_ERROR.into() });
        return;
    };

    let participant = match participants::get(&state.pool, auction_id, session.user.user_id).await {
        Ok(p) => p,
        Err(e) => {
            warn!(error = %e, "participant lookup failed");
            session.send(&ServerMessage::Error { message: OPAQUE_JOIN_ERROR.into() });
            return;
        }
    };
    if participant.map(|p| p.eligible) != Some(true) {
        session.send(&ServerMessage::Error { message: OPAQUE_JOIN_ERROR.into() });
        return;
    }

    let auction = match auctions::get(&state.pool, auction_id).await {
        Ok(Some(a)) => a,
        _ => {
            session.send(&ServerMessage::Error { message: OPAQUE_JOIN_ERROR.into() });
            return;
        }
    };

    state.rooms.join(auction_id, session.conn, session.out.clone());
    session.joined.insert(auction_id);

    let participant_count = participants::count(&state.pool, auction_id).await.unwrap_or(0);
    session.send(&ServerMessage::AuctionState {
        auction_id: auction_id.to_string(),
        status: auction.status,
        current_price: format_amount(auction.current_price),
        bid_count: auction.bid_count,
        participant_count,
        watcher_count: state.rooms.watcher_count(auction_id),
        time_remaining_ms: auction.time_remaining_ms(Utc::now()),
        extended_until: auction.extended_until,
    });
}

#[allow(clippy::too_many_arguments)]
async fn place_bid(
    state: &Arc<GatewayState>,
    session: &mut Session,
    raw_auction_id: &str,
    raw_amount: &str,
    raw_reference_price: &str,
    idempotency_key: String,
    client_sent_at: Option<gavel_core::types::Timestamp>,
) {
    let Ok(auction_id) = raw_auction_id.parse::<AuctionId>() else {
        session.send(&ServerMessage::Error { message: OPAQUE_JOIN_ERROR.into() });
        return;
    };

    // Early amount validation: digits with an optional fraction, positive.
    let amount = match parse_amount(raw_amount) {
        Ok(a) => a,
        Err(_) => {
            session.reject(RejectReason::InvalidAmount, None, "malformed amount");
            return;
        }
    };
    let reference_price = match parse_amount(raw_reference_price) {
        Ok(p) => p,
        Err(_) => {
            session.reject(RejectReason::InvalidAmount, None, "malformed reference price");
            return;
        }
    };

    // Fail closed: no KV, no bids.
    if !state.kv.healthy() {
        session.reject(RejectReason::ServiceUnavailable, None, "coordination store unavailable");
        return;
    }

    // Burst suppression per user and per auction.
    let user_rate = state
        .kv
        .rate(&keys::rate_user_key(session.user.user_id), RATE_USER_MAX, RATE_WINDOW)
        .await;
    match user_rate {
        Ok(decision) if !decision.allowed => {
            session.reject(RejectReason::RateLimited, None, "too many bids; slow down");
            return;
        }
        Err(_) => {
            session.reject(RejectReason::ServiceUnavailable, None, "coordination store unavailable");
            return;
        }
        Ok(_) => {}
    }
    let auction_rate = state
        .kv
        .rate(&keys::rate_auction_key(auction_id), RATE_AUCTION_MAX, RATE_WINDOW)
        .await;
    match auction_rate {
        Ok(decision) if !decision.allowed => {
            session.reject(RejectReason::RateLimited, None, "auction is busy; retry shortly");
            return;
        }
        Err(_) => {
            session.reject(RejectReason::ServiceUnavailable, None, "coordination store unavailable");
            return;
        }
        Ok(_) => {}
    }

    let request = PlaceBidRequest {
        auction_id,
        amount,
        reference_price,
        idempotency_key,
        client_sent_at,
    };
    let outcome = state
        .bids
        .place_bid(request, session.user.user_id, Some(session.ip.clone()))
        .await;

    match outcome {
        Ok(BidOutcome::Accepted(accepted)) => {
            let msg = ServerMessage::BidAccepted {
                bid_id: accepted.bid_id.to_string(),
                user_id_masked: accepted.user_id.masked(),
                amount: format_amount(accepted.amount),
                server_timestamp: accepted.server_ts,
                new_bid_count: accepted.new_bid_count,
            };
            // Room members everywhere get it via the fabric; a bidder who
            // never joined the room still gets a direct acknowledgement.
            if let Err(e) = state.publisher.publish(auction_id, &msg).await {
                warn!(auction_id = %auction_id, error = %e, "bid broadcast failed");
                session.send(&msg);
            } else if !session.joined.contains(&auction_id) {
                session.send(&msg);
            }

            if let Some(new_end) = accepted.extended_until {
                let extended = ServerMessage::AuctionExtended {
                    auction_id: auction_id.to_string(),
                    new_end_time: new_end,
                    triggered_by_bid_id: accepted.bid_id.to_string(),
                };
                if let Err(e) = state.publisher.publish(auction_id, &extended).await {
                    warn!(auction_id = %auction_id, error = %e, "extension broadcast failed");
                }
            }
        }
        Ok(BidOutcome::Rejected { reason, current_price, message }) => {
            session.reject(reason, current_price, message);
        }
        Err(e) => {
            let reason = e.reject_reason().unwrap_or(RejectReason::ServiceUnavailable);
            warn!(auction_id = %auction_id, error = %e, "bid pipeline error");
            session.reject(reason, None, "bid could not be processed");
        }
    }
}
