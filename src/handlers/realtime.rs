use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
    Extension,
};
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::principal::Principal;
use crate::services::dispatch::{ErrorReply, TripEvent};
use crate::services::lifecycle::{self, Heartbeat};
use crate::AppState;

/// Client to server traffic, `{"event": name, "data": payload}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientCommand {
    #[serde(rename = "trip:accept")]
    Accept { trip_id: Uuid },
    #[serde(rename = "trip:cancel")]
    Cancel {
        trip_id: Uuid,
        #[serde(default)]
        reason: Option<String>,
    },
    #[serde(rename = "trip:status")]
    Status { trip_id: Uuid },
    #[serde(rename = "driver:location")]
    Location {
        lat: f64,
        lon: f64,
        #[serde(default)]
        bearing: Option<f64>,
    },
    #[serde(rename = "driver:availability")]
    Availability { available: bool },
}

pub async fn connect(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| session(socket, state, principal))
}

async fn session(mut socket: WebSocket, state: AppState, principal: Principal) {
    let mut events = state.hub.subscribe();
    tracing::info!(user_id = %principal.id, role = principal.role.as_str(), "Realtime session opened");

    loop {
        tokio::select! {
            inbound = socket.recv() => {
                let text = match inbound {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        tracing::debug!(user_id = %principal.id, error = %e, "Socket receive failed");
                        break;
                    }
                };
                let reply = match serde_json::from_str::<ClientCommand>(text.as_str()) {
                    Ok(command) => dispatch(&state, &principal, command).await,
                    Err(e) => Some(error_event(&AppError::Validation(format!("Malformed command: {}", e)))),
                };
                if let Some(reply) = reply {
                    if send(&mut socket, &reply).await.is_err() {
                        break;
                    }
                }
            }
            outbound = events.recv() => {
                match outbound {
                    Ok(envelope) => {
                        if !envelope.audience.includes(&principal) {
                            continue;
                        }
                        if send(&mut socket, &envelope.event).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(user_id = %principal.id, skipped, "Realtime session lagging, events dropped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }

    tracing::info!(user_id = %principal.id, "Realtime session closed");
}

async fn send(socket: &mut WebSocket, event: &TripEvent) -> Result<(), axum::Error> {
    let json = match serde_json::to_string(event) {
        Ok(json) => json,
        Err(e) => {
            tracing::error!(event = event.name(), error = %e, "Failed to encode event");
            return Ok(());
        }
    };
    socket.send(Message::Text(json.into())).await
}

fn error_event(err: &AppError) -> TripEvent {
    TripEvent::Error(ErrorReply::from(err))
}

/// Run one command. Trip commands answer with the resulting trip; driver
/// commands only answer on failure since their effect is broadcast.
pub async fn dispatch(state: &AppState, principal: &Principal, command: ClientCommand) -> Option<TripEvent> {
    match execute(state, principal, command).await {
        Ok(Some(trip)) => Some(TripEvent::Status(Box::new(trip))),
        Ok(None) => None,
        Err(e) => Some(error_event(&e)),
    }
}

async fn execute(
    state: &AppState,
    principal: &Principal,
    command: ClientCommand,
) -> AppResult<Option<crate::entities::trip::Model>> {
    match command {
        ClientCommand::Accept { trip_id } => {
            lifecycle::accept_trip(state, principal, trip_id).await.map(Some)
        }
        ClientCommand::Cancel { trip_id, reason } => {
            lifecycle::cancel_trip(state, principal, trip_id, reason).await.map(Some)
        }
        ClientCommand::Status { trip_id } => {
            lifecycle::get_trip(state, principal, trip_id).await.map(Some)
        }
        ClientCommand::Location { lat, lon, bearing } => {
            let beat = Heartbeat {
                lat: Some(lat),
                lon: Some(lon),
                bearing,
                ..Default::default()
            };
            lifecycle::driver_heartbeat(state, principal, &beat).await.map(|_| None)
        }
        ClientCommand::Availability { available } => {
            let beat = Heartbeat {
                available: Some(available),
                ..Default::default()
            };
            lifecycle::driver_heartbeat(state, principal, &beat).await.map(|_| None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commands_parse_from_event_envelope() {
        let accept: ClientCommand = serde_json::from_str(
            r#"{"event":"trip:accept","data":{"trip_id":"6f1c1f7e-8a55-4c1b-9d5e-3c1a2b3c4d5e"}}"#,
        )
        .unwrap();
        assert!(matches!(accept, ClientCommand::Accept { .. }));

        let location: ClientCommand = serde_json::from_str(
            r#"{"event":"driver:location","data":{"lat":9.03,"lon":38.74}}"#,
        )
        .unwrap();
        match location {
            ClientCommand::Location { lat, lon, bearing } => {
                assert_eq!(lat, 9.03);
                assert_eq!(lon, 38.74);
                assert!(bearing.is_none());
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_unknown_command_is_rejected() {
        let parsed = serde_json::from_str::<ClientCommand>(r#"{"event":"trip:teleport","data":{}}"#);
        assert!(parsed.is_err());
    }
}
