// Internal Protocol for Dispatcher <-> Worker Communication
//
// Decision: gRPC with tonic, the worker is the client on all three channels
// Decision: JSON payloads are strings rendered like the dispatcher renders them
// Decision: Proto is transport layer, fleetrun-durable types remain source of truth

use std::io;

use fleetrun_durable::Argument;
use serde::Serialize;
use uuid::Uuid;

// Generated protobuf code
pub mod proto {
    tonic::include_proto!("fleetrun.internal");
}

// Re-export for convenience
pub use proto::worker_fabric_client::WorkerFabricClient;
pub use proto::worker_fabric_server::{WorkerFabric, WorkerFabricServer};

/// Metadata header carrying the worker identity on every call
pub const WORKER_IDENTITY_HEADER: &str = "x-worker-identity";

/// Token sent on the request channel before any request is received
pub const READY_TOKEN: &str = "Ready";

// ============================================================================
// Error types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ConversionError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Invalid UUID: {0}")]
    InvalidUuid(#[from] uuid::Error),

    #[error("Unknown enum value {value} for {field}")]
    UnknownEnumValue { field: &'static str, value: i32 },
}

// ============================================================================
// Inbound domain types
// ============================================================================

/// One request to run a workflow
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub workflow_id: Uuid,
    pub execution_id: Uuid,
    /// Explicit start node, overriding the workflow's declared start
    pub start: Option<Uuid>,
    pub arguments: Vec<Argument>,
    pub resume: bool,
}

/// A command from the dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    Pause(Uuid),
    Abort(Uuid),
    /// Terminate the worker
    Exit,
}

// ============================================================================
// Decoding
// ============================================================================

fn parse_uuid(value: &str) -> Result<Uuid, ConversionError> {
    Uuid::parse_str(value).map_err(ConversionError::from)
}

/// JSON text becomes the value it encodes, anything else stays a string
fn parse_json_text(text: &str) -> serde_json::Value {
    serde_json::from_str(text).unwrap_or_else(|_| serde_json::Value::String(text.to_string()))
}

/// Convert a wire argument to a domain argument
pub fn decode_argument(value: &proto::Argument) -> Result<Argument, ConversionError> {
    use proto::argument::Source;

    match value
        .source
        .as_ref()
        .ok_or(ConversionError::MissingField("argument.source"))?
    {
        Source::Value(text) => Ok(Argument::value(&value.name, parse_json_text(text))),
        Source::Reference(reference) => Ok(Argument::reference(&value.name, reference)),
        Source::Selection(text) => Ok(Argument::selection(&value.name, parse_json_text(text))),
    }
}

/// Convert a wire execution request to a domain request
pub fn decode_execution_request(
    value: &proto::ExecuteWorkflowMessage,
) -> Result<ExecutionRequest, ConversionError> {
    Ok(ExecutionRequest {
        workflow_id: parse_uuid(&value.workflow_id)?,
        execution_id: parse_uuid(&value.workflow_execution_id)?,
        start: value.start.as_deref().map(parse_uuid).transpose()?,
        arguments: value
            .arguments
            .iter()
            .map(decode_argument)
            .collect::<Result<Vec<_>, _>>()?,
        resume: value.resume,
    })
}

/// Convert a wire control packet to a domain signal
pub fn decode_control_signal(
    value: &proto::CommunicationPacket,
) -> Result<ControlSignal, ConversionError> {
    use proto::communication_packet::Type;

    let kind = Type::try_from(value.r#type).map_err(|_| ConversionError::UnknownEnumValue {
        field: "communication_packet.type",
        value: value.r#type,
    })?;

    let target = || -> Result<Uuid, ConversionError> {
        let id = value
            .workflow_execution_id
            .as_deref()
            .ok_or(ConversionError::MissingField("workflow_execution_id"))?;
        parse_uuid(id)
    };

    match kind {
        Type::Pause => Ok(ControlSignal::Pause(target()?)),
        Type::Abort => Ok(ControlSignal::Abort(target()?)),
        Type::Exit => Ok(ControlSignal::Exit),
    }
}

/// Convert a domain signal to a wire control packet
pub fn encode_control_signal(value: ControlSignal) -> proto::CommunicationPacket {
    use proto::communication_packet::Type;

    let (kind, target) = match value {
        ControlSignal::Pause(id) => (Type::Pause, Some(id.to_string())),
        ControlSignal::Abort(id) => (Type::Abort, Some(id.to_string())),
        ControlSignal::Exit => (Type::Exit, None),
    };
    proto::CommunicationPacket {
        r#type: kind as i32,
        workflow_execution_id: target,
    }
}

// ============================================================================
// JSON rendering
// ============================================================================

/// Compact JSON with a space after every separator
struct WireFormatter;

impl serde_json::ser::Formatter for WireFormatter {
    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        writer.write_all(b": ")
    }
}

/// Render JSON the way the dispatcher does, e.g. `{"a": 1, "b": [1, 2]}`
pub fn to_wire_json(value: &serde_json::Value) -> String {
    let mut out = Vec::new();
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, WireFormatter);
    if value.serialize(&mut serializer).is_err() {
        return value.to_string();
    }
    String::from_utf8(out).unwrap_or_else(|_| value.to_string())
}
