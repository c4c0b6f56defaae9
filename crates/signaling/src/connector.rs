//! Verbindungsaufbau zum Signaling-Server
//!
//! Ein [`Connector`] oeffnet eine [`Link`]: ein Paar aus Sink und Stream von
//! JSON-Texten. Der Transport weiss nichts ueber das darunterliegende
//! Protokoll.
//!
//! ```text
//!   WebSocketConnector  --> ws:// Text-Frames      --+
//!   TcpConnector        --> u32-BE + JSON (Codec)  --+--> Link { sink, stream }
//!   MockConnector       --> mpsc-Kanaele (Tests)   --+
//! ```

use async_trait::async_trait;
use futures_util::{future, Sink, SinkExt, Stream, StreamExt};
use salon_protocol::FrameCodec;
use std::pin::Pin;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::codec::Framed;

use crate::error::{SignalingError, SignalingResult};

/// Ausgehende Richtung einer Verbindung
pub type FrameSink = Pin<Box<dyn Sink<String, Error = SignalingError> + Send>>;

/// Eingehende Richtung einer Verbindung
pub type FrameStream = Pin<Box<dyn Stream<Item = SignalingResult<String>> + Send>>;

/// Eine geoeffnete Verbindung
pub struct Link {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Link")
    }
}

/// Oeffnet Verbindungen zum Signaling-Server
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Oeffnet eine neue Verbindung
    async fn open(&self) -> SignalingResult<Link>;

    /// Ziel fuer Log-Meldungen
    fn ziel(&self) -> String;
}

// ---------------------------------------------------------------------------
// WebSocket
// ---------------------------------------------------------------------------

/// Verbindet ueber WebSocket; eine Nachricht pro Text-Frame
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: String,
}

impl WebSocketConnector {
    pub fn neu(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn open(&self) -> SignalingResult<Link> {
        let (ws, _antwort) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| SignalingError::Verbindung(e.to_string()))?;
        let (ws_sink, ws_stream) = ws.split();

        let sink = ws_sink
            .sink_map_err(|e| SignalingError::Io(e.to_string()))
            .with(|frame: String| future::ready(Ok::<_, SignalingError>(Message::text(frame))));

        let stream = ws_stream.filter_map(|nachricht| {
            future::ready(match nachricht {
                Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
                Ok(Message::Binary(daten)) => Some(
                    String::from_utf8(daten.to_vec())
                        .map_err(|e| SignalingError::protokoll(e.to_string())),
                ),
                // Ping/Pong beantwortet tungstenite selbst, Close beendet den Stream
                Ok(_) => None,
                Err(e) => Some(Err(SignalingError::Io(e.to_string()))),
            })
        });

        Ok(Link {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        })
    }

    fn ziel(&self) -> String {
        self.url.clone()
    }
}

// ---------------------------------------------------------------------------
// TCP
// ---------------------------------------------------------------------------

/// Verbindet ueber rohes TCP mit length-prefixed Frames
#[derive(Debug, Clone)]
pub struct TcpConnector {
    adresse: String,
    max_frame_size: usize,
}

impl TcpConnector {
    pub fn neu(adresse: impl Into<String>) -> Self {
        Self {
            adresse: adresse.into(),
            max_frame_size: salon_protocol::wire::DEFAULT_MAX_FRAME_SIZE,
        }
    }

    pub fn mit_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn open(&self) -> SignalingResult<Link> {
        let stream = TcpStream::connect(self.adresse.as_str())
            .await
            .map_err(|e| SignalingError::Verbindung(e.to_string()))?;
        stream.set_nodelay(true)?;

        let framed = Framed::new(stream, FrameCodec::with_max_size(self.max_frame_size));
        let (tcp_sink, tcp_stream) = framed.split();

        Ok(Link {
            sink: Box::pin(tcp_sink.sink_map_err(SignalingError::from)),
            stream: Box::pin(tcp_stream.map(|frame| frame.map_err(SignalingError::from))),
        })
    }

    fn ziel(&self) -> String {
        format!("tcp://{}", self.adresse)
    }
}
