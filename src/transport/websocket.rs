//! WebSocket bridge for ports.

// ============================================================================
// Imports
// ============================================================================

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, trace, warn};

use super::port::{Port, PortKind};

// ============================================================================
// Bridge
// ============================================================================

/// Creates a [`Port`] whose frames travel over `ws_stream`.
///
/// Spawns the socket event loop. Must be called inside a tokio runtime.
pub fn websocket_port<S>(kind: PortKind, ws_stream: WebSocketStream<S>) -> Port
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

    let port = Port::new(kind, outbound_tx, inbound_rx);

    tokio::spawn(run_event_loop(ws_stream, outbound_rx, inbound_tx));

    port
}

/// Pumps frames between the socket and the port channels.
///
/// Ends when either side closes; dropping `inbound_tx` closes the port.
async fn run_event_loop<S>(
    ws_stream: WebSocketStream<S>,
    mut outbound_rx: mpsc::UnboundedReceiver<String>,
    inbound_tx: mpsc::UnboundedSender<String>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut ws_write, mut ws_read) = ws_stream.split();

    loop {
        tokio::select! {
            message = ws_read.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        if inbound_tx.send(text.to_string()).is_err() {
                            debug!("Port dropped, closing socket");
                            let _ = ws_write.close().await;
                            break;
                        }
                    }

                    Some(Ok(Message::Close(_))) => {
                        debug!("WebSocket closed by remote");
                        break;
                    }

                    Some(Err(e)) => {
                        error!(error = %e, "WebSocket error");
                        break;
                    }

                    None => {
                        debug!("WebSocket stream ended");
                        break;
                    }

                    // Ignore Binary, Ping, Pong
                    _ => {}
                }
            }

            frame = outbound_rx.recv() => {
                match frame {
                    Some(json) => {
                        if let Err(e) = ws_write.send(Message::Text(json.into())).await {
                            warn!(error = %e, "Failed to send frame");
                            break;
                        }
                        trace!("Frame sent");
                    }

                    None => {
                        debug!("Port closed, closing socket");
                        let _ = ws_write.close().await;
                        break;
                    }
                }
            }
        }
    }

    debug!("Socket event loop terminated");
}
