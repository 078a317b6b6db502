use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The wrapper placed on a protocol work list by the Ingress API and
/// consumed by the Dispatcher. `payload` is opaque to the broker: it may
/// be a raw string (APRS text, LoRa/HTTP JSON body) or a structured value
/// (the satellite transport's full request body).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEnvelope {
    pub sender: String,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    pub ingest_method: IngestMethod,
    pub transmit_method: Option<TransmitMethod>,
}

impl RawEnvelope {
    pub fn new(
        sender: impl Into<String>,
        payload: serde_json::Value,
        ingest_method: IngestMethod,
        transmit_method: Option<TransmitMethod>,
    ) -> Self {
        Self {
            sender: sender.into(),
            payload,
            timestamp: Utc::now(),
            ingest_method,
            transmit_method,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum IngestMethod {
    Http,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransmitMethod {
    #[serde(rename = "APRS")]
    Aprs,
    Iridium,
    #[serde(rename = "LoRa")]
    LoRa,
}

impl TransmitMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransmitMethod::Aprs => "APRS",
            TransmitMethod::Iridium => "Iridium",
            TransmitMethod::LoRa => "LoRa",
        }
    }
}

/// The name of a protocol work list. Doubles as the broker routing key
/// and the name the dispatcher logs/tags metrics with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueName {
    Aprs,
    Iridium,
    Lora,
    PredictFlight,
    GetPath,
    DeadLetter,
}

impl QueueName {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueName::Aprs => "aprs",
            QueueName::Iridium => "iridium",
            QueueName::Lora => "lora",
            QueueName::PredictFlight => "predict_flight",
            QueueName::GetPath => "get_path",
            QueueName::DeadLetter => "dead_letter",
        }
    }

    pub const PROTOCOL_LISTS: &'static [QueueName] =
        &[QueueName::Aprs, QueueName::Iridium, QueueName::Lora];

    pub const SCHEDULER_LISTS: &'static [QueueName] =
        &[QueueName::PredictFlight, QueueName::GetPath];
}
