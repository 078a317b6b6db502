pub mod callsign;
pub mod envelope;
pub mod packet;
pub mod telemetry;
pub mod ws;

pub use callsign::{Callsign, CallsignError};
pub use envelope::{IngestMethod, QueueName, RawEnvelope, TransmitMethod};
pub use packet::{Packet, PositionEvent};
pub use telemetry::TelemetryRow;
