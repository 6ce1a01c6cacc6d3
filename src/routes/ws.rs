use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::Response,
    routing::get,
    Router,
};
use futures_util::{sink::SinkExt, stream::StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedSender};
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use crate::{
    AppState,
    error::AppError,
    models::{ClientCommand, ProgressEvent},
    services::session::SharedSession,
};

const PONG: &str = r#"{"type":"pong"}"#;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/ws/upload", get(progress_channel))
}

#[derive(Debug, Deserialize)]
pub struct ChannelQuery {
    #[serde(default)]
    session_id: Option<Uuid>,
}

async fn progress_channel(
    ws: WebSocketUpgrade,
    Query(query): Query<ChannelQuery>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let session = state.sessions.get_or_create(query.session_id);
    ws.on_upgrade(move |socket| handle_socket(socket, session, state))
}

async fn handle_socket(socket: WebSocket, session: SharedSession, state: Arc<AppState>) {
    let session_id = session.lock().id;
    let connection = Uuid::new_v4();
    info!("Progress channel {} opened for session {}", connection, session_id);

    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ProgressEvent>();
    let (pong_tx, mut pong_rx) = mpsc::unbounded_channel::<()>();

    let sender_task = tokio::spawn(async move {
        loop {
            let text = tokio::select! {
                Some(event) = rx.recv() => match serde_json::to_string(&event) {
                    Ok(json) => json,
                    Err(e) => {
                        error!("Failed to serialize progress event: {}", e);
                        continue;
                    }
                },
                Some(()) = pong_rx.recv() => PONG.to_string(),
                else => break,
            };
            if let Err(e) = sender.send(Message::Text(text)).await {
                debug!("Progress channel send failed: {}", e);
                break;
            }
        }
    });

    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientCommand>(&text) {
                Ok(ClientCommand::Ping) => {
                    if pong_tx.send(()).is_err() {
                        break;
                    }
                }
                Ok(command) => handle_command(command, connection, &session, &state, &tx),
                Err(e) => {
                    warn!("Invalid message on channel {}: {}", connection, e);
                    let _ = tx.send(rejection(&session, "invalid", format!("Invalid message: {}", e)));
                }
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                let e = AppError::ChannelError(e.to_string());
                error!("Channel {}: {}", connection, e);
                break;
            }
        }
    }

    session.lock().hub().unsubscribe(connection);
    state.sessions.release(session_id);
    sender_task.abort();
    info!("Progress channel {} closed", connection);
}

fn handle_command(
    command: ClientCommand,
    connection: Uuid,
    session: &SharedSession,
    state: &AppState,
    tx: &UnboundedSender<ProgressEvent>,
) {
    match command {
        ClientCommand::StartUpload { rows, duplicate_action, resume_token } => {
            let admitted = {
                let mut guard = session.lock();
                let hub = guard.hub();
                guard
                    .begin_commit(rows, duplicate_action, resume_token)
                    .map(|plan| {
                        hub.subscribe(connection, tx.clone(), false);
                        plan
                    })
            };

            match admitted {
                Ok(plan) => {
                    // the task owns the commit from here; its handle is not awaited
                    let _ = state.orchestrator.spawn(session.clone(), plan);
                }
                Err(e) => {
                    warn!("Commit rejected on channel {}: {}", connection, e);
                    let _ = tx.send(rejection(session, "rejected", e.to_string()));
                }
            }
        }
        ClientCommand::Resume { resume_token } => {
            let (hub, known) = {
                let guard = session.lock();
                (guard.hub(), guard.state().token() == Some(resume_token))
            };
            if known {
                debug!("Channel {} resumed commit {}", connection, resume_token);
                hub.subscribe(connection, tx.clone(), true);
            } else {
                let message = format!("unknown resume token {}", resume_token);
                let _ = tx.send(rejection(session, "rejected", message));
            }
        }
        ClientCommand::Ping => {}
    }
}

/// Error sent to one connection only. It carries the session's current
/// percentage so the stream the client sees never goes backwards.
fn rejection(session: &SharedSession, step: &str, message: String) -> ProgressEvent {
    let progress = session.lock().hub().high_water();
    ProgressEvent::error(step, progress, message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::models::{DuplicateAction, EventKind};
    use crate::services::catalog::memory::InMemoryCatalog;
    use crate::services::duplicate_resolver::fixtures::{bolt_nut_screw, entry};
    use crate::services::excel::{DecodedWorkbook, WorkbookAnalyzer};
    use crate::services::orchestrator::CommitState;
    use crate::services::session::ImportSession;

    fn staged() -> (Arc<AppState>, SharedSession) {
        let catalog = Arc::new(InMemoryCatalog::with_entries(vec![entry(1, "Bolt", 5.0, 1)]));
        let state = Arc::new(AppState::new(Config::default(), catalog));

        let (sheet, snapshot) = bolt_nut_screw();
        let workbook = DecodedWorkbook { sheets: vec![sheet] };
        let analysis = WorkbookAnalyzer::new(1024).analyze(&workbook);
        let mut session = ImportSession::from_upload("stock.xlsx".into(), workbook, analysis);
        session.select_sheet(None, snapshot).unwrap();
        let shared = state.sessions.insert(session);
        (state, shared)
    }

    #[test]
    fn empty_commit_is_rejected_on_the_channel() {
        let (state, session) = staged();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let command = ClientCommand::StartUpload {
            rows: Some(vec![]),
            duplicate_action: DuplicateAction::Skip,
            resume_token: None,
        };
        handle_command(command, Uuid::new_v4(), &session, &state, &tx);

        let event = tokio_test::block_on(rx.recv()).unwrap();
        assert_eq!(event.kind, EventKind::Error);
        assert_eq!(event.step, "rejected");
        assert_eq!(session.lock().state(), &CommitState::AwaitingCommit);
    }

    #[test]
    fn rejection_after_finished_commit_keeps_percentage() {
        let (_state, session) = staged();
        let hub = session.lock().hub();
        hub.emit(ProgressEvent::complete(Default::default(), vec![], "Import completed"));

        let err = serde_json::from_str::<ClientCommand>(r#"{"action":"bogus"}"#).unwrap_err();
        let event = rejection(&session, "invalid", format!("Invalid message: {}", err));
        assert_eq!(event.kind, EventKind::Error);
        assert_eq!(event.progress, 100);
    }

    #[test]
    fn resume_with_unknown_token_is_rejected() {
        let (state, session) = staged();
        let (tx, mut rx) = mpsc::unbounded_channel();
        handle_command(
            ClientCommand::Resume { resume_token: Uuid::new_v4() },
            Uuid::new_v4(),
            &session,
            &state,
            &tx,
        );

        let event = tokio_test::block_on(rx.recv()).unwrap();
        assert_eq!(event.kind, EventKind::Error);
        assert!(!session.lock().hub().has_subscribers());
    }

    #[tokio::test]
    async fn start_upload_streams_until_complete() {
        let (state, session) = staged();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let command = ClientCommand::StartUpload {
            rows: None,
            duplicate_action: DuplicateAction::Update,
            resume_token: None,
        };
        handle_command(command, Uuid::new_v4(), &session, &state, &tx);

        let mut last = None;
        while let Some(event) = rx.recv().await {
            let done = event.kind == EventKind::Complete;
            last = Some(event);
            if done {
                break;
            }
        }
        let last = last.unwrap();
        assert_eq!(last.progress, 100);
        assert_eq!(last.data.unwrap().stats.processed(), 3);
        assert_eq!(state.catalog.find(1).unwrap().unwrap().price, 6.0);
    }
}
