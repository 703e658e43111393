//! WebSocket implementation of the real-time channel seam.
//!
//! The connector owns at most one live channel. `open` replaces whatever
//! channel existed (aborting its pump task) and spawns a new pump that
//! connects, then bridges frames both ways:
//!
//! - inbound text frames become [`ChannelEvent::Frame`]s,
//! - outbound [`ClientFrame`]s arrive over an mpsc queue and are written
//!   to the socket,
//! - any close or I/O failure ends the pump with a [`ChannelEvent::Closed`]
//!   carrying the observed (or synthesized) close code.
//!
//! Every event carries the epoch of the connect attempt that produced it,
//! so events from an aborted or superseded channel are discarded upstream.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;
use url::Url;
use waitroom_core::channel::{
    ChannelConnector, ChannelEvent, ChannelRequest, TransportError,
};
use waitroom_core::protocol::ClientFrame;
use waitroom_core::types::ChannelEpoch;

/// Synthetic close code for abnormal termination (no close frame seen).
const CLOSE_CODE_ABNORMAL: u16 = 1006;

/// Synthetic close code for a close frame that carried no status.
const CLOSE_CODE_NO_STATUS: u16 = 1005;

struct ActiveChannel {
    epoch: ChannelEpoch,
    outbound: mpsc::UnboundedSender<Message>,
    pump: tokio::task::JoinHandle<()>,
}

/// [`ChannelConnector`] over tokio-tungstenite.
pub struct WebSocketConnector {
    ws_base_url: String,
    connect_timeout: Duration,
    events: mpsc::UnboundedSender<ChannelEvent>,
    active: Mutex<Option<ActiveChannel>>,
}

impl WebSocketConnector {
    /// Create a connector and the event stream it will emit on.
    #[must_use]
    pub fn new(
        ws_base_url: impl Into<String>,
        connect_timeout: Duration,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<ChannelEvent>) {
        let (events, event_stream) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            ws_base_url: ws_base_url.into(),
            connect_timeout,
            events,
            active: Mutex::new(None),
        });
        (connector, event_stream)
    }

    /// Channel address for `request`: `{base}/ws/queue/{resource}?token=...`.
    fn address(&self, request: &ChannelRequest) -> Result<Url, TransportError> {
        let base = Url::parse(&self.ws_base_url)
            .map_err(|e| TransportError::InvalidAddress(e.to_string()))?;
        let mut url = base
            .join(&format!("ws/queue/{}", request.resource_id))
            .map_err(|e| TransportError::InvalidAddress(e.to_string()))?;
        url.query_pairs_mut()
            .append_pair("token", request.credential.expose());
        Ok(url)
    }

    /// Epoch of the channel currently held, if any.
    pub async fn active_epoch(&self) -> Option<ChannelEpoch> {
        self.active.lock().await.as_ref().map(|channel| channel.epoch)
    }

    fn replace(&self, slot: &mut Option<ActiveChannel>, next: ActiveChannel) {
        if let Some(previous) = slot.replace(next) {
            tracing::debug!(epoch = %previous.epoch, "Replacing live channel");
            previous.pump.abort();
        }
    }
}

#[async_trait]
impl ChannelConnector for WebSocketConnector {
    async fn open(&self, request: ChannelRequest) -> Result<(), TransportError> {
        let url = self.address(&request)?;
        let epoch = request.epoch;

        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let events = self.events.clone();
        let connect_timeout = self.connect_timeout;
        let pump = tokio::spawn(async move {
            run_channel(url, epoch, connect_timeout, outbound_rx, events).await;
        });

        let mut active = self.active.lock().await;
        self.replace(
            &mut active,
            ActiveChannel {
                epoch,
                outbound,
                pump,
            },
        );
        metrics::counter!("channel.opens.started").increment(1);
        Ok(())
    }

    async fn send(&self, frame: ClientFrame) {
        let active = self.active.lock().await;
        let Some(channel) = active.as_ref() else {
            tracing::debug!("Dropping outbound frame: no live channel");
            return;
        };
        match frame.encode() {
            Ok(text) => {
                let _ = channel.outbound.send(Message::Text(text));
            }
            Err(error) => {
                tracing::warn!(%error, "Failed to encode outbound frame");
            }
        }
    }

    async fn close(&self) {
        let mut active = self.active.lock().await;
        if let Some(channel) = active.take() {
            let _ = channel.outbound.send(Message::Close(Some(CloseFrame {
                code: CloseCode::Normal,
                reason: "client leaving".into(),
            })));
            // Give the pump a moment to flush the close frame, then stop it.
            tokio::time::sleep(Duration::from_millis(50)).await;
            channel.pump.abort();
            metrics::counter!("channel.closes.requested").increment(1);
        }
    }
}

/// Connect and pump one channel until it dies.
async fn run_channel(
    url: Url,
    epoch: ChannelEpoch,
    connect_timeout: Duration,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    events: mpsc::UnboundedSender<ChannelEvent>,
) {
    let stream = match tokio::time::timeout(connect_timeout, connect_async(url.as_str())).await {
        Ok(Ok((stream, _response))) => stream,
        Ok(Err(error)) => {
            tracing::debug!(%epoch, %error, "Channel connect failed");
            let _ = events.send(ChannelEvent::Errored {
                epoch,
                message: error.to_string(),
            });
            let _ = events.send(ChannelEvent::Closed {
                epoch,
                code: CLOSE_CODE_ABNORMAL,
            });
            return;
        }
        Err(_) => {
            let _ = events.send(ChannelEvent::Errored {
                epoch,
                message: format!("connect timed out after {connect_timeout:?}"),
            });
            let _ = events.send(ChannelEvent::Closed {
                epoch,
                code: CLOSE_CODE_ABNORMAL,
            });
            return;
        }
    };

    let _ = events.send(ChannelEvent::Opened { epoch });
    metrics::counter!("channel.opens.established").increment(1);

    let (mut sink, mut source) = stream.split();
    let mut outbound_open = true;

    loop {
        tokio::select! {
            outgoing = outbound.recv(), if outbound_open => {
                match outgoing {
                    Some(message) => {
                        if sink.send(message).await.is_err() {
                            let _ = events.send(ChannelEvent::Closed {
                                epoch,
                                code: CLOSE_CODE_ABNORMAL,
                            });
                            return;
                        }
                    }
                    None => {
                        // Sender side dropped; request a close and drain the
                        // socket until the server acknowledges.
                        let _ = sink.send(Message::Close(None)).await;
                        outbound_open = false;
                    }
                }
            }
            incoming = source.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        metrics::counter!("channel.frames.received").increment(1);
                        let _ = events.send(ChannelEvent::Frame { epoch, text });
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let code = frame.map_or(CLOSE_CODE_NO_STATUS, |f| u16::from(f.code));
                        tracing::debug!(%epoch, code, "Channel closed by server");
                        let _ = events.send(ChannelEvent::Closed { epoch, code });
                        return;
                    }
                    // Pings are answered by tungstenite; binary frames are
                    // not part of the protocol.
                    Some(Ok(_)) => {}
                    Some(Err(error)) => {
                        let _ = events.send(ChannelEvent::Errored {
                            epoch,
                            message: error.to_string(),
                        });
                        let _ = events.send(ChannelEvent::Closed {
                            epoch,
                            code: CLOSE_CODE_ABNORMAL,
                        });
                        return;
                    }
                    None => {
                        let _ = events.send(ChannelEvent::Closed {
                            epoch,
                            code: CLOSE_CODE_ABNORMAL,
                        });
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use waitroom_core::channel::Credential;
    use waitroom_core::types::ResourceId;

    fn request(epoch: u64) -> ChannelRequest {
        ChannelRequest {
            resource_id: ResourceId::new(),
            credential: Credential::new("tok-123"),
            epoch: ChannelEpoch::new(epoch),
        }
    }

    #[tokio::test]
    async fn address_embeds_resource_and_token() {
        let (connector, _events) =
            WebSocketConnector::new("ws://queue.example.com/", Duration::from_secs(1));
        let request = request(1);
        let url = connector.address(&request).unwrap();
        assert_eq!(
            url.as_str(),
            format!(
                "ws://queue.example.com/ws/queue/{}?token=tok-123",
                request.resource_id
            )
        );
    }

    #[tokio::test]
    async fn invalid_base_url_is_a_precondition_failure() {
        let (connector, _events) = WebSocketConnector::new("not a url", Duration::from_secs(1));
        let result = connector.open(request(1)).await;
        assert!(matches!(result, Err(TransportError::InvalidAddress(_))));
    }

    #[tokio::test]
    async fn open_replaces_the_previous_channel() {
        let (connector, _events) =
            WebSocketConnector::new("ws://127.0.0.1:9/", Duration::from_secs(1));

        connector.open(request(1)).await.unwrap();
        connector.open(request(2)).await.unwrap();

        assert_eq!(connector.active_epoch().await, Some(ChannelEpoch::new(2)));
    }

    #[tokio::test]
    async fn failed_connect_surfaces_error_then_abnormal_close() {
        // Port 9 (discard) is not listening; connect is refused quickly.
        let (connector, mut events) =
            WebSocketConnector::new("ws://127.0.0.1:9/", Duration::from_secs(5));
        connector.open(request(7)).await.unwrap();

        let first = tokio::time::timeout(Duration::from_secs(10), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            first,
            ChannelEvent::Errored { epoch, .. } if epoch == ChannelEpoch::new(7)
        ));

        let second = tokio::time::timeout(Duration::from_secs(10), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            second,
            ChannelEvent::Closed {
                epoch: ChannelEpoch::new(7),
                code: 1006
            }
        );
    }

    #[tokio::test]
    async fn close_clears_the_active_channel() {
        let (connector, _events) =
            WebSocketConnector::new("ws://127.0.0.1:9/", Duration::from_secs(1));
        connector.open(request(1)).await.unwrap();
        connector.close().await;
        assert_eq!(connector.active_epoch().await, None);
    }
}
