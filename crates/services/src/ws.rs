use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, trace, warn};

use rudiment_domain::InboundMessage;

use crate::api::Endpoints;
use crate::channel::{ChannelEvent, ChannelEventKind, ChannelFactory, ChannelLink, EventSender, Generation};
use crate::ServiceError;

/// Opens websocket connections to `{stream_base}{stream_path}/{session_id}`.
/// Must be used from within a tokio runtime.
pub struct WsChannelFactory {
    endpoints: Endpoints,
}

impl WsChannelFactory {
    pub fn new(endpoints: Endpoints) -> Self {
        Self { endpoints }
    }
}

impl ChannelFactory for WsChannelFactory {
    fn open(
        &self,
        session_id: &str,
        generation: Generation,
        events: EventSender,
    ) -> Box<dyn ChannelLink> {
        let url = self.endpoints.stream_url(session_id);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        tokio::spawn(run_connection(url, generation, events, outbound_rx, shutdown_rx));
        Box::new(WsLink {
            outbound: Some(outbound_tx),
            shutdown: Some(shutdown_tx),
        })
    }
}

struct WsLink {
    outbound: Option<mpsc::UnboundedSender<String>>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl ChannelLink for WsLink {
    fn send(&self, frame: String) -> Result<(), ServiceError> {
        let outbound = self.outbound.as_ref().ok_or(ServiceError::NotConnected)?;
        outbound
            .send(frame)
            .map_err(|_| ServiceError::Transport("connection task has exited".into()))
    }

    fn close(&mut self) {
        self.outbound = None;
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

async fn run_connection(
    url: String,
    generation: Generation,
    events: EventSender,
    mut outbound: mpsc::UnboundedReceiver<String>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let emit = |kind| {
        let _ = events.send(ChannelEvent::new(generation, kind));
    };

    let connected = tokio::select! {
        result = connect_async(url.as_str()) => result,
        _ = &mut shutdown => {
            debug!(%url, generation, "handshake abandoned");
            return;
        }
    };
    let stream = match connected {
        Ok((stream, _response)) => stream,
        Err(err) => {
            warn!(%url, %err, "stream handshake failed");
            emit(ChannelEventKind::Closed {
                reason: Some(err.to_string()),
            });
            return;
        }
    };
    info!(%url, generation, "stream connected");
    emit(ChannelEventKind::Opened);

    let (mut sink, mut source) = stream.split();
    let reason = loop {
        tokio::select! {
            _ = &mut shutdown => {
                let _ = sink.send(Message::Close(None)).await;
                break None;
            }
            frame = outbound.recv() => match frame {
                Some(text) => {
                    if let Err(err) = sink.send(Message::Text(text)).await {
                        break Some(err.to_string());
                    }
                }
                None => {
                    let _ = sink.close().await;
                    break None;
                }
            },
            incoming = source.next() => match incoming {
                Some(Ok(Message::Text(text))) => match InboundMessage::parse(&text) {
                    Ok(message) => {
                        trace!(generation, kind = message.kind(), "inbound frame");
                        emit(ChannelEventKind::Message(message));
                    }
                    Err(err) => warn!(%err, "dropping inbound frame"),
                },
                Some(Ok(Message::Close(frame))) => {
                    break frame.map(|frame| frame.reason.to_string());
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => break Some(err.to_string()),
                None => break None,
            },
        }
    };
    debug!(generation, ?reason, "stream task finished");
    emit(ChannelEventKind::Closed { reason });
}
