//! RPC layer
//! - transport.rs: Content-Length framing
//! - connection.rs: Outbound requests and response correlation
//! - mod.rs: Reader/writer tasks and the inbound envelope

pub mod connection;
pub mod transport;

use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

pub use connection::{Connection, PendingResponse};

use crate::protocol::{Message, Origin};

/// An inbound request or notification, tagged with where it came from and
/// the connection replies go out on.
#[derive(Clone)]
pub struct Envelope {
    pub origin: Origin,
    pub message: Message,
    pub peer: Connection,
}

impl Envelope {
    pub fn new(origin: Origin, message: Message, peer: Connection) -> Self {
        Self {
            origin,
            message,
            peer,
        }
    }
}

/// Where reader tasks deliver inbound requests and notifications.
pub type InboundSink = Arc<dyn Fn(Envelope) + Send + Sync>;

/// Drains `outgoing` onto `writer` until every sender is gone.
pub fn spawn_writer<W>(mut writer: W, mut outgoing: mpsc::UnboundedReceiver<Message>) -> JoinHandle<()>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(message) = outgoing.recv().await {
            let text = match message.to_json() {
                Ok(text) => text,
                Err(e) => {
                    error!("Failed to encode outgoing message: {}", e);
                    continue;
                }
            };
            if let Err(e) = transport::write_message(&mut writer, &text).await {
                warn!("Failed to write message: {}", e);
                break;
            }
        }
        debug!("Writer stopped");
    })
}

/// Reads messages from `reader`. Responses complete requests pending on
/// `connection`; everything else goes to `sink`. When the stream ends the
/// connection's pending requests fail and `on_close` runs.
pub fn spawn_reader<R>(
    mut reader: R,
    connection: Connection,
    origin: Origin,
    sink: InboundSink,
    on_close: impl FnOnce() + Send + 'static,
) -> JoinHandle<()>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            let text = match transport::read_message(&mut reader).await {
                Ok(Some(text)) => text,
                Ok(None) => break,
                Err(e) => {
                    warn!("Failed to read from {}: {}", connection.name(), e);
                    break;
                }
            };

            match Message::parse(&text) {
                Ok(Message::Response(response)) => {
                    connection.handle_response(response);
                }
                Ok(message) => sink(Envelope::new(origin, message, connection.clone())),
                Err(e) => warn!("Dropping malformed message from {}: {}", connection.name(), e),
            }
        }

        debug!("{} closed its stream", connection.name());
        connection.close();
        on_close();
    })
}
