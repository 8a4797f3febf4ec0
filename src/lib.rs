//! `govee-ble-mqtt` library.
//!
//! The binary (`src/main.rs`) is responsible for configuration loading, logging,
//! signal handling and process exit codes. The pipeline itself lives in
//! [`crate::app`], where it can be tested deterministically with an injected
//! radio and transport:
//!
//! BLE advertisement → [`scanner`] → [`decoder`] → [`publisher`] → MQTT broker

pub mod app;
pub mod config;
pub mod decoder;
pub mod output;
pub mod publisher;
pub mod reading;
pub mod scanner;

#[cfg(test)]
mod test_utils;

// Re-export commonly used types at the crate root
pub use app::{PipelineStats, run, run_pipeline, run_with_io};
pub use config::Options;
pub use decoder::{DecodeError, MIN_FRAME_LEN, decode};
pub use output::OutputFormatter;
pub use output::json::JsonFormatter;
pub use publisher::{
    BrokerTarget, ConnectionState, Credentials, Delivery, LinkState, MqttTransport, PublishError,
    Publisher, Transport, TransportEvent,
};
pub use reading::Reading;
pub use scanner::{
    AdvertisementEvent, Disposition, Radio, RadioEvent, RadioFuture, RadioState, ScanError,
    Scanner,
};
