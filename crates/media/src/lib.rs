//! salon-media – Transporte, Producer, Consumer und Datenkanaele
//!
//! ## Architektur
//!
//! ```text
//!                 TransportManager (initialize, Send/Recv-Transport)
//!                        |
//!        +---------------+----------------+
//!        |               |                |
//! ProducerManager  ConsumerManager  DataChannelManager
//!        |               |                |
//!        +------ MediaEngine / EngineTransport (Trait) -----+
//!                        |                                  |
//!             TransportConnectionManager  <-- TransportHandler (connect, produce, producedata)
//!                        |
//!                 SignalingClient
//! ```
//!
//! Die eigentliche WebRTC-Engine und die Aufnahmegeraete liegen hinter den
//! Traits in [`engine`] und [`device`]; [`sim`] liefert eine Software-Variante.

pub mod connection_manager;
pub mod consumer_manager;
pub mod data_channel_manager;
pub mod device;
pub mod engine;
pub mod error;
pub mod producer_manager;
pub mod sim;
pub mod transport_manager;

#[cfg(test)]
pub(crate) mod testutil;

pub use connection_manager::{ProduceCallback, ProduceDataCallback, TransportConnectionManager};
pub use consumer_manager::{ConsumerManager, Subscription};
pub use data_channel_manager::{DataChannelManager, DataChannelOptions, DataConsumerAnkuendigung};
pub use device::{CaptureConstraints, DeviceInfo, DeviceKind, MediaDevices, MediaTrack};
pub use engine::{
    EngineConsumer, EngineDataConsumer, EngineDataProducer, EngineProducer, EngineTransport,
    EngineTransportState, MediaEngine, TransportHandler,
};
pub use error::{MediaError, MediaResult};
pub use producer_manager::{ProducerEreignis, ProducerManager, PublishOptions, PublishedTrack};
pub use transport_manager::TransportManager;
