//! WebSocket transport for the Least Count session engine. This layer
//! only frames JSON intents off the socket and fans events back out;
//! all game truth lives behind [`session::Sessions`].

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use clap::Parser;
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use uuid::Uuid;

mod error;
mod game;
mod session;
mod validator;

use leastcount_protocol::{ClientToServer, ServerToClient};
use session::Sessions;

/// Authoritative session server for Least Count.
#[derive(Parser)]
struct Args {
    /// Address to listen on.
    #[arg(long, default_value = "0.0.0.0:9001")]
    addr: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let sessions = Sessions::new();
    let app = Router::new()
        .route("/ws", get(ws_handler))
        .with_state(sessions);

    let listener = tokio::net::TcpListener::bind(&args.addr).await?;
    info!("listening on ws://{}/ws", args.addr);
    axum::serve(listener, app).await?;
    Ok(())
}

async fn ws_handler(ws: WebSocketUpgrade, State(sessions): State<Sessions>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, sessions))
}

async fn handle_socket(socket: WebSocket, sessions: Sessions) {
    let (mut sender, mut receiver) = socket.split();

    let (tx_out, mut rx_out) = tokio::sync::mpsc::unbounded_channel::<ServerToClient>();
    tokio::spawn(async move {
        while let Some(msg) = rx_out.recv().await {
            let text = match serde_json::to_string(&msg) {
                Ok(t) => t,
                Err(err) => {
                    warn!("dropping unserializable event: {}", err);
                    continue;
                }
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let conn_id = Uuid::new_v4();
    debug!("conn {} opened", conn_id);

    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(text) => match serde_json::from_str::<ClientToServer>(&text) {
                Ok(intent) => sessions.dispatch(conn_id, &tx_out, intent),
                Err(err) => {
                    debug!("conn {}: unparseable intent: {}", conn_id, err);
                    let _ = tx_out.send(ServerToClient::Error {
                        code: "BAD_REQUEST".to_string(),
                        message: format!("could not parse intent: {}", err),
                    });
                }
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    sessions.disconnect(conn_id);
    debug!("conn {} closed", conn_id);
}
