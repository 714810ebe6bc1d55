//! Autotrader Networking - broker adapters and the call recorder

pub mod broker;
pub mod recorder;

pub use broker::{
    Broker, BrokerFactory, KoreaAuthConfig, KoreaBroker, KoreaBrokerFactory, SchwabBroker,
    SchwabBrokerFactory,
};
pub use recorder::{JsonlRecorder, RecordingBroker, RecordingBrokerFactory};
