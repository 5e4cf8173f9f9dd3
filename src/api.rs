use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::NaiveDate;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::PhaseOptions;
use crate::error::PipelineError;
use crate::phase::PhaseController;
use crate::types::{AppState, ClientCommand, Phase, WsMessage};

/// Outbound messages queued per WebSocket client
const CLIENT_QUEUE: usize = 256;

/// Query params for the events endpoint
#[derive(Debug, Deserialize)]
pub struct EventsQueryParams {
    pub date: String,
    pub phase: String,
}

/// Response for dates list
#[derive(Serialize)]
pub struct DatesResponse {
    pub dates: Vec<NaiveDate>,
}

fn parse_session(params: &EventsQueryParams) -> Result<(NaiveDate, Phase), String> {
    let date = NaiveDate::parse_from_str(&params.date, "%Y-%m-%d")
        .map_err(|e| format!("Invalid date '{}': {}", params.date, e))?;
    let phase = params.phase.parse::<Phase>().map_err(|e| e.to_string())?;
    Ok((date, phase))
}

/// GET /api/events - Logged events for one (date, phase) session
pub async fn get_events(
    State(state): State<Arc<AppState>>,
    Query(params): Query<EventsQueryParams>,
) -> impl IntoResponse {
    match parse_session(&params) {
        Ok((date, phase)) => {
            let session = state.controller.event_log().get_events(date, phase);
            (StatusCode::OK, Json(serde_json::json!(session)))
        }
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": e})),
        ),
    }
}

/// GET /api/dates - Trading dates with logged sessions
pub async fn get_dates(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let dates = state.controller.event_log().available_dates();
    Json(DatesResponse { dates })
}

/// GET /api/status - Canonical session summary
pub async fn get_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.controller.status())
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<WsMessage>(CLIENT_QUEUE);

    // Send current state to new client
    let _ = tx.send(WsMessage::Status(state.controller.status())).await;

    // Single writer for the socket
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if let Ok(json) = serde_json::to_string(&msg) {
                if sender.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
        }
    });

    let controller = Arc::clone(&state.controller);
    let recv_task = tokio::spawn(async move {
        let mut forwards: HashMap<Phase, JoinHandle<()>> = HashMap::new();

        while let Some(Ok(msg)) = receiver.next().await {
            let Message::Text(text) = msg else {
                continue;
            };
            let command = match serde_json::from_str::<ClientCommand>(text.as_str()) {
                Ok(command) => command,
                Err(e) => {
                    let _ = tx
                        .send(WsMessage::Error {
                            message: format!("Bad command: {}", e),
                        })
                        .await;
                    continue;
                }
            };

            match command {
                ClientCommand::StartPhase { phase, options } => {
                    // Subscribe first so the client sees the run from its first event
                    forwards
                        .entry(phase)
                        .or_insert_with(|| forward_events(&controller, phase, tx.clone()));
                    start_phase(&controller, phase, options.into(), tx.clone());
                    let _ = tx.send(WsMessage::PhaseAccepted { phase }).await;
                }
                ClientCommand::Subscribe { phase } => {
                    forwards
                        .entry(phase)
                        .or_insert_with(|| forward_events(&controller, phase, tx.clone()));
                }
                ClientCommand::Status => {
                    let _ = tx.send(WsMessage::Status(controller.status())).await;
                }
            }
        }

        for (_, forward) in forwards {
            forward.abort();
        }
    });

    // Wait for either task to complete
    tokio::select! {
        _ = send_task => {},
        _ = recv_task => {},
    }

    info!("WebSocket client disconnected");
}

/// Replay then live events for `phase` into the client's queue
fn forward_events(
    controller: &PhaseController,
    phase: Phase,
    tx: mpsc::Sender<WsMessage>,
) -> JoinHandle<()> {
    let mut subscription = controller.subscribe(phase);
    tokio::spawn(async move {
        while let Some(event) = subscription.recv().await {
            if tx.send(WsMessage::Event { phase, event }).await.is_err() {
                return;
            }
        }
        warn!(%phase, "Subscription dropped by broadcaster");
        let _ = tx
            .send(WsMessage::Error {
                message: format!("Subscription to {} dropped, resubscribe to catch up", phase),
            })
            .await;
    })
}

fn failure_message(phase: Phase, error: &PipelineError) -> String {
    if error.is_configuration() {
        format!("Rejected {} request: {}", phase, error)
    } else {
        format!("Phase {} failed: {}", phase, error)
    }
}

/// The run outlives the client that asked for it
fn start_phase(
    controller: &Arc<PhaseController>,
    phase: Phase,
    options: PhaseOptions,
    tx: mpsc::Sender<WsMessage>,
) {
    let handle = controller.spawn_phase(phase, options);
    tokio::spawn(async move {
        let message = match handle.await {
            Ok(Ok(outcome)) => {
                info!(?outcome, "Phase finished");
                return;
            }
            Ok(Err(e)) => failure_message(phase, &e),
            Err(e) => format!("Phase task ended: {}", e),
        };
        warn!(%phase, "{}", message);
        let _ = tx.send(WsMessage::Error { message }).await;
    });
}
