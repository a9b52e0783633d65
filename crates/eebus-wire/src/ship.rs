//! SHIP frame types and framing.
//!
//! Every WebSocket binary message is one message-type byte followed by a
//! JSON-UTF8 value. The CMI frame content is the literal bytes `{"cmi":1}`.

use serde_json::{Value, json};

use crate::EebusError;
use crate::value::{
    SeqBuilder, SeqReader, as_bool, as_str, as_u32, from_slice_exact, to_canonical_bytes,
};

/// SHIP message-type byte. Values above `CONTROL` abort the connection.
pub mod msg_type {
    pub const INIT: u8 = 0x01;
    pub const DATA: u8 = 0x02;
    pub const END: u8 = 0x03;
    pub const CMI: u8 = 0x04;
    pub const CONTROL: u8 = 0x05;
}

/// The SPINE protocol id carried in every data frame header.
pub const PROTOCOL_ID: &str = "ee1.0";

/// The expected CMI value; anything else is a CMI mismatch.
pub const CMI_VALUE: u64 = 1;

// ---------------------------------------------------------------------------
// Control message bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HelloPhase {
    Ready,
    Pending,
    Aborted,
}

impl HelloPhase {
    fn as_str(self) -> &'static str {
        match self {
            HelloPhase::Ready => "ready",
            HelloPhase::Pending => "pending",
            HelloPhase::Aborted => "aborted",
        }
    }

    fn parse(s: &str) -> Result<Self, EebusError> {
        match s {
            "ready" => Ok(HelloPhase::Ready),
            "pending" => Ok(HelloPhase::Pending),
            "aborted" => Ok(HelloPhase::Aborted),
            other => Err(EebusError::Parse(format!("unknown hello phase `{other}`"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionHello {
    pub phase: HelloPhase,
    /// Remaining wait time in milliseconds.
    pub waiting: Option<u32>,
    pub prolongation_request: Option<bool>,
}

impl ConnectionHello {
    pub fn ready() -> Self {
        ConnectionHello {
            phase: HelloPhase::Ready,
            waiting: None,
            prolongation_request: None,
        }
    }

    pub fn pending(waiting_ms: Option<u32>) -> Self {
        ConnectionHello {
            phase: HelloPhase::Pending,
            waiting: waiting_ms,
            prolongation_request: None,
        }
    }

    pub fn aborted() -> Self {
        ConnectionHello {
            phase: HelloPhase::Aborted,
            waiting: None,
            prolongation_request: None,
        }
    }

    fn to_value(&self) -> Value {
        SeqBuilder::new()
            .field("phase", json!(self.phase.as_str()))
            .opt("waiting", self.waiting.map(|w| json!(w)))
            .opt("prolongationRequest", self.prolongation_request.map(|p| json!(p)))
            .build()
    }

    fn from_value(value: &Value) -> Result<Self, EebusError> {
        let seq = SeqReader::new(value)?;
        seq.deny_unknown(&["phase", "waiting", "prolongationRequest"])?;
        Ok(ConnectionHello {
            phase: HelloPhase::parse(&as_str(seq.require("phase")?, "phase")?)?,
            waiting: seq
                .get("waiting")
                .map(|v| as_u32(v, "waiting"))
                .transpose()?,
            prolongation_request: seq
                .get("prolongationRequest")
                .map(|v| as_bool(v, "prolongationRequest"))
                .transpose()?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeType {
    AnnounceMax,
    Select,
}

impl HandshakeType {
    fn as_str(self) -> &'static str {
        match self {
            HandshakeType::AnnounceMax => "announceMax",
            HandshakeType::Select => "select",
        }
    }

    fn parse(s: &str) -> Result<Self, EebusError> {
        match s {
            "announceMax" => Ok(HandshakeType::AnnounceMax),
            "select" => Ok(HandshakeType::Select),
            other => Err(EebusError::Parse(format!(
                "unknown handshake type `{other}`"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolVersion {
    pub major: u32,
    pub minor: u32,
}

/// The only format this implementation speaks.
pub const FORMAT_JSON_UTF8: &str = "JSON-UTF8";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageProtocolHandshake {
    pub handshake_type: HandshakeType,
    pub version: ProtocolVersion,
    pub formats: Vec<String>,
}

impl MessageProtocolHandshake {
    pub fn new(handshake_type: HandshakeType) -> Self {
        MessageProtocolHandshake {
            handshake_type,
            version: ProtocolVersion { major: 1, minor: 0 },
            formats: vec![FORMAT_JSON_UTF8.to_owned()],
        }
    }

    /// Exactly version 1.0 with JSON-UTF8 among the offered formats.
    pub fn is_acceptable(&self) -> bool {
        self.version.major == 1
            && self.version.minor == 0
            && self.formats.iter().any(|f| f == FORMAT_JSON_UTF8)
    }

    fn to_value(&self) -> Value {
        let version = SeqBuilder::new()
            .field("major", json!(self.version.major))
            .field("minor", json!(self.version.minor))
            .build();
        let formats = SeqBuilder::new()
            .field("format", Value::Array(self.formats.iter().map(|f| json!(f)).collect()))
            .build();
        SeqBuilder::new()
            .field("handshakeType", json!(self.handshake_type.as_str()))
            .field("version", version)
            .field("formats", formats)
            .build()
    }

    fn from_value(value: &Value) -> Result<Self, EebusError> {
        let seq = SeqReader::new(value)?;
        seq.deny_unknown(&["handshakeType", "version", "formats"])?;

        let version_seq = SeqReader::new(seq.require("version")?)?;
        let version = ProtocolVersion {
            major: as_u32(version_seq.require("major")?, "version.major")?,
            minor: as_u32(version_seq.require("minor")?, "version.minor")?,
        };

        let formats_seq = SeqReader::new(seq.require("formats")?)?;
        let format_list = formats_seq
            .require("format")?
            .as_array()
            .ok_or_else(|| EebusError::Parse("formats.format: expected an array".into()))?;
        let formats = format_list
            .iter()
            .map(|f| as_str(f, "format"))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(MessageProtocolHandshake {
            handshake_type: HandshakeType::parse(&as_str(
                seq.require("handshakeType")?,
                "handshakeType",
            )?)?,
            version,
            formats,
        })
    }
}

/// `messageProtocolHandshakeError` codes.
pub mod handshake_error {
    pub const RFU: u32 = 0;
    pub const TIMEOUT: u32 = 1;
    pub const UNEXPECTED_MESSAGE: u32 = 2;
    pub const SELECTION_MISMATCH: u32 = 3;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageProtocolHandshakeError {
    pub error: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinState {
    Required,
    Optional,
    PinOk,
    None,
}

impl PinState {
    fn as_str(self) -> &'static str {
        match self {
            PinState::Required => "required",
            PinState::Optional => "optional",
            PinState::PinOk => "pinOk",
            PinState::None => "none",
        }
    }

    fn parse(s: &str) -> Result<Self, EebusError> {
        match s {
            "required" => Ok(PinState::Required),
            "optional" => Ok(PinState::Optional),
            "pinOk" => Ok(PinState::PinOk),
            "none" => Ok(PinState::None),
            other => Err(EebusError::Parse(format!("unknown pin state `{other}`"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinInputPermission {
    Ok,
    Busy,
}

impl PinInputPermission {
    fn as_str(self) -> &'static str {
        match self {
            PinInputPermission::Ok => "ok",
            PinInputPermission::Busy => "busy",
        }
    }

    fn parse(s: &str) -> Result<Self, EebusError> {
        match s {
            "ok" => Ok(PinInputPermission::Ok),
            "busy" => Ok(PinInputPermission::Busy),
            other => Err(EebusError::Parse(format!(
                "unknown pin input permission `{other}`"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionPinState {
    pub pin_state: PinState,
    pub input_permission: Option<PinInputPermission>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionPinInput {
    /// 8–16 hex digits; validated on decode.
    pub pin: String,
}

/// `connectionPinError` codes.
pub mod pin_error {
    pub const WRONG_PIN: u32 = 1;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionPinError {
    pub error: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessMethods {
    /// The local SHIP id.
    pub id: String,
    pub dns_sd_mdns: bool,
    pub dns_uri: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClosePhase {
    Announce,
    Confirm,
}

impl ClosePhase {
    fn as_str(self) -> &'static str {
        match self {
            ClosePhase::Announce => "announce",
            ClosePhase::Confirm => "confirm",
        }
    }

    fn parse(s: &str) -> Result<Self, EebusError> {
        match s {
            "announce" => Ok(ClosePhase::Announce),
            "confirm" => Ok(ClosePhase::Confirm),
            other => Err(EebusError::Parse(format!("unknown close phase `{other}`"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionClose {
    pub phase: ClosePhase,
    /// Upper bound in ms the sender stays available before forcing the
    /// transport down.
    pub max_time: Option<u32>,
    pub reason: Option<String>,
}

impl ConnectionClose {
    pub fn announce(reason: Option<&str>) -> Self {
        ConnectionClose {
            phase: ClosePhase::Announce,
            max_time: None,
            reason: reason.map(str::to_owned),
        }
    }

    pub fn confirm() -> Self {
        ConnectionClose {
            phase: ClosePhase::Confirm,
            max_time: None,
            reason: None,
        }
    }
}

/// Data-phase frame: a SPINE datagram wrapped in the SHIP envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShipData {
    pub protocol_id: String,
    pub payload: Value,
}

impl ShipData {
    pub fn new(payload: Value) -> Self {
        ShipData {
            protocol_id: PROTOCOL_ID.to_owned(),
            payload,
        }
    }
}

// ---------------------------------------------------------------------------
// Frame
// ---------------------------------------------------------------------------

/// One decoded SHIP frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShipFrame {
    Cmi(u64),
    Hello(ConnectionHello),
    ProtocolHandshake(MessageProtocolHandshake),
    ProtocolHandshakeError(MessageProtocolHandshakeError),
    PinState(ConnectionPinState),
    PinInput(ConnectionPinInput),
    PinError(ConnectionPinError),
    AccessMethodsRequest,
    AccessMethods(AccessMethods),
    Close(ConnectionClose),
    Data(ShipData),
}

fn single_key_root(value: &Value) -> Result<(&str, &Value), EebusError> {
    crate::value::choice_of(value)
}

impl ShipFrame {
    /// Message-type byte this frame travels under.
    pub fn message_type(&self) -> u8 {
        match self {
            ShipFrame::Cmi(_) => msg_type::CMI,
            ShipFrame::Data(_) => msg_type::DATA,
            ShipFrame::Close(_) => msg_type::END,
            _ => msg_type::INIT,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let body = self.body_value();
        let mut frame = Vec::with_capacity(64);
        frame.push(self.message_type());
        frame.extend_from_slice(&to_canonical_bytes(&body));
        frame
    }

    fn body_value(&self) -> Value {
        match self {
            ShipFrame::Cmi(v) => json!({ "cmi": v }),
            ShipFrame::Hello(hello) => json!({ "connectionHello": hello.to_value() }),
            ShipFrame::ProtocolHandshake(hs) => {
                json!({ "messageProtocolHandshake": hs.to_value() })
            }
            ShipFrame::ProtocolHandshakeError(e) => json!({
                "messageProtocolHandshakeError":
                    SeqBuilder::new().field("error", json!(e.error)).build()
            }),
            ShipFrame::PinState(ps) => json!({
                "connectionPinState": SeqBuilder::new()
                    .field("pinState", json!(ps.pin_state.as_str()))
                    .opt(
                        "inputPermission",
                        ps.input_permission.map(|p| json!(p.as_str())),
                    )
                    .build()
            }),
            ShipFrame::PinInput(pi) => json!({
                "connectionPinInput": SeqBuilder::new().field("pin", json!(pi.pin)).build()
            }),
            ShipFrame::PinError(pe) => json!({
                "connectionPinError": SeqBuilder::new().field("error", json!(pe.error)).build()
            }),
            ShipFrame::AccessMethodsRequest => json!({ "accessMethodsRequest": [] }),
            ShipFrame::AccessMethods(am) => json!({
                "accessMethods": SeqBuilder::new()
                    .field("id", json!(am.id))
                    .tag_if("dnsSd_mDns", am.dns_sd_mdns)
                    .opt(
                        "dns",
                        am.dns_uri.as_ref().map(|uri| {
                            SeqBuilder::new().field("uri", json!(uri)).build()
                        }),
                    )
                    .build()
            }),
            ShipFrame::Close(close) => json!({
                "connectionClose": SeqBuilder::new()
                    .field("phase", json!(close.phase.as_str()))
                    .opt("maxTime", close.max_time.map(|t| json!(t)))
                    .opt("reason", close.reason.as_ref().map(|r| json!(r)))
                    .build()
            }),
            ShipFrame::Data(data) => json!({
                "data": SeqBuilder::new()
                    .field(
                        "header",
                        SeqBuilder::new()
                            .field("protocolId", json!(data.protocol_id))
                            .build(),
                    )
                    .field("payload", data.payload.clone())
                    .build()
            }),
        }
    }

    /// Decode one framed message; the first byte selects the type.
    pub fn decode(bytes: &[u8]) -> Result<Self, EebusError> {
        let (&ty, body) = bytes
            .split_first()
            .ok_or_else(|| EebusError::Parse("empty frame".into()))?;

        if ty > msg_type::CONTROL {
            return Err(EebusError::Parse(format!(
                "unsupported message type {ty:#04x}"
            )));
        }

        let value = from_slice_exact(body)?;
        let (key, inner) = single_key_root(&value)?;

        match (ty, key) {
            (msg_type::CMI, "cmi") => {
                let v = inner
                    .as_u64()
                    .ok_or_else(|| EebusError::Parse("cmi: expected an integer".into()))?;
                Ok(ShipFrame::Cmi(v))
            }
            (msg_type::INIT | msg_type::CONTROL, "connectionHello") => {
                Ok(ShipFrame::Hello(ConnectionHello::from_value(inner)?))
            }
            (msg_type::INIT | msg_type::CONTROL, "messageProtocolHandshake") => Ok(
                ShipFrame::ProtocolHandshake(MessageProtocolHandshake::from_value(inner)?),
            ),
            (msg_type::INIT | msg_type::CONTROL, "messageProtocolHandshakeError") => {
                let seq = SeqReader::new(inner)?;
                seq.deny_unknown(&["error"])?;
                Ok(ShipFrame::ProtocolHandshakeError(
                    MessageProtocolHandshakeError {
                        error: as_u32(seq.require("error")?, "error")?,
                    },
                ))
            }
            (msg_type::INIT | msg_type::CONTROL, "connectionPinState") => {
                let seq = SeqReader::new(inner)?;
                seq.deny_unknown(&["pinState", "inputPermission"])?;
                Ok(ShipFrame::PinState(ConnectionPinState {
                    pin_state: PinState::parse(&as_str(seq.require("pinState")?, "pinState")?)?,
                    input_permission: seq
                        .get("inputPermission")
                        .map(|v| {
                            as_str(v, "inputPermission").and_then(|s| PinInputPermission::parse(&s))
                        })
                        .transpose()?,
                }))
            }
            (msg_type::INIT | msg_type::CONTROL, "connectionPinInput") => {
                let seq = SeqReader::new(inner)?;
                seq.deny_unknown(&["pin"])?;
                let pin = as_str(seq.require("pin")?, "pin")?;
                validate_pin(&pin)?;
                Ok(ShipFrame::PinInput(ConnectionPinInput { pin }))
            }
            (msg_type::INIT | msg_type::CONTROL, "connectionPinError") => {
                let seq = SeqReader::new(inner)?;
                seq.deny_unknown(&["error"])?;
                Ok(ShipFrame::PinError(ConnectionPinError {
                    error: as_u32(seq.require("error")?, "error")?,
                }))
            }
            (msg_type::INIT | msg_type::CONTROL, "accessMethodsRequest") => {
                Ok(ShipFrame::AccessMethodsRequest)
            }
            (msg_type::INIT | msg_type::CONTROL, "accessMethods") => {
                let seq = SeqReader::new(inner)?;
                seq.deny_unknown(&["id", "dnsSd_mDns", "dns"])?;
                let dns_uri = seq
                    .get("dns")
                    .map(|dns| {
                        let dns_seq = SeqReader::new(dns)?;
                        as_str(dns_seq.require("uri")?, "dns.uri")
                    })
                    .transpose()?;
                Ok(ShipFrame::AccessMethods(AccessMethods {
                    id: as_str(seq.require("id")?, "id")?,
                    dns_sd_mdns: seq.get("dnsSd_mDns").is_some(),
                    dns_uri,
                }))
            }
            (msg_type::END, "connectionClose") => {
                let seq = SeqReader::new(inner)?;
                seq.deny_unknown(&["phase", "maxTime", "reason"])?;
                Ok(ShipFrame::Close(ConnectionClose {
                    phase: ClosePhase::parse(&as_str(seq.require("phase")?, "phase")?)?,
                    max_time: seq
                        .get("maxTime")
                        .map(|v| as_u32(v, "maxTime"))
                        .transpose()?,
                    reason: seq
                        .get("reason")
                        .map(|v| as_str(v, "reason"))
                        .transpose()?,
                }))
            }
            (msg_type::DATA, "data") => {
                let seq = SeqReader::new(inner)?;
                seq.deny_unknown(&["header", "payload"])?;
                let header = SeqReader::new(seq.require("header")?)?;
                let protocol_id = as_str(header.require("protocolId")?, "protocolId")?;
                Ok(ShipFrame::Data(ShipData {
                    protocol_id,
                    payload: seq.require("payload")?.clone(),
                }))
            }
            (ty, key) => Err(EebusError::Parse(format!(
                "unexpected `{key}` under message type {ty:#04x}"
            ))),
        }
    }
}

/// 8–16 hex digits.
fn validate_pin(pin: &str) -> Result<(), EebusError> {
    if !(8..=16).contains(&pin.len()) {
        return Err(EebusError::Parse(format!(
            "pin length {} outside 8..=16",
            pin.len()
        )));
    }
    hex::decode(pin_padded(pin)).map_err(|_| EebusError::Parse("pin is not hex".into()))?;
    Ok(())
}

fn pin_padded(pin: &str) -> String {
    if pin.len() % 2 == 0 {
        pin.to_owned()
    } else {
        format!("0{pin}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cmi_frame_is_the_literal_bytes() {
        assert_eq!(ShipFrame::Cmi(1).encode(), b"\x04{\"cmi\":1}");
        assert_eq!(
            ShipFrame::decode(b"\x04{\"cmi\":1}").unwrap(),
            ShipFrame::Cmi(1)
        );
    }

    #[test]
    fn hello_ready_round_trip() {
        let bytes = b"\x01{\"connectionHello\":[{\"phase\":\"ready\"}]}";
        let frame = ShipFrame::decode(bytes).unwrap();
        assert_eq!(frame, ShipFrame::Hello(ConnectionHello::ready()));
        assert_eq!(frame.encode(), bytes);
    }

    #[test]
    fn hello_without_phase_is_rejected() {
        let bytes = b"\x01{\"connectionHello\":[{\"waiting\":6000}]}";
        assert!(ShipFrame::decode(bytes).is_err());
    }

    #[test]
    fn hello_pending_with_prolongation() {
        let bytes =
            b"\x01{\"connectionHello\":[{\"phase\":\"pending\"},{\"prolongationRequest\":true}]}";
        match ShipFrame::decode(bytes).unwrap() {
            ShipFrame::Hello(hello) => {
                assert_eq!(hello.phase, HelloPhase::Pending);
                assert_eq!(hello.prolongation_request, Some(true));
            }
            other => panic!("expected hello, got {other:?}"),
        }
    }

    #[test]
    fn handshake_round_trip() {
        let bytes = b"\x01{\"messageProtocolHandshake\":[{\"handshakeType\":\"select\"},{\"version\":[{\"major\":1},{\"minor\":0}]},{\"formats\":[{\"format\":[\"JSON-UTF8\"]}]}]}";
        let frame = ShipFrame::decode(bytes).unwrap();
        match &frame {
            ShipFrame::ProtocolHandshake(hs) => {
                assert_eq!(hs.handshake_type, HandshakeType::Select);
                assert!(hs.is_acceptable());
            }
            other => panic!("expected handshake, got {other:?}"),
        }
        assert_eq!(frame.encode(), bytes);
    }

    #[test]
    fn handshake_missing_version_is_rejected() {
        let bytes = b"\x01{\"messageProtocolHandshake\":[{\"handshakeType\":\"select\"},{\"formats\":[{\"format\":[\"JSON-UTF8\"]}]}]}";
        assert!(ShipFrame::decode(bytes).is_err());
    }

    #[test]
    fn version_two_is_not_acceptable() {
        let hs = MessageProtocolHandshake {
            handshake_type: HandshakeType::Select,
            version: ProtocolVersion { major: 2, minor: 0 },
            formats: vec![FORMAT_JSON_UTF8.to_owned()],
        };
        assert!(!hs.is_acceptable());
    }

    #[test]
    fn close_round_trip_with_reason() {
        let frame = ShipFrame::Close(ConnectionClose::announce(Some("CMI mismatch")));
        let bytes = frame.encode();
        assert_eq!(
            bytes,
            b"\x03{\"connectionClose\":[{\"phase\":\"announce\"},{\"reason\":\"CMI mismatch\"}]}"
        );
        assert_eq!(ShipFrame::decode(&bytes).unwrap(), frame);
    }

    #[test]
    fn empty_close_is_rejected() {
        assert!(ShipFrame::decode(b"\x03{\"connectionClose\":[]}").is_err());
    }

    #[test]
    fn unknown_message_type_is_rejected() {
        assert!(ShipFrame::decode(b"\x06{\"cmi\":1}").is_err());
    }

    #[test]
    fn access_methods_round_trip() {
        let frame = ShipFrame::AccessMethods(AccessMethods {
            id: "ship-id-1".to_owned(),
            dns_sd_mdns: true,
            dns_uri: None,
        });
        assert_eq!(ShipFrame::decode(&frame.encode()).unwrap(), frame);
    }

    #[test]
    fn pin_input_length_is_validated() {
        assert!(ShipFrame::decode(b"\x01{\"connectionPinInput\":[{\"pin\":\"abc\"}]}").is_err());
        assert!(
            ShipFrame::decode(b"\x01{\"connectionPinInput\":[{\"pin\":\"0123456789abcdef\"}]}")
                .is_ok()
        );
        assert!(
            ShipFrame::decode(b"\x01{\"connectionPinInput\":[{\"pin\":\"zzzzzzzz\"}]}").is_err()
        );
    }

    #[test]
    fn data_frame_round_trip() {
        let frame = ShipFrame::Data(ShipData::new(json!({"datagram": []})));
        let bytes = frame.encode();
        assert!(bytes.starts_with(&[msg_type::DATA]));
        assert_eq!(ShipFrame::decode(&bytes).unwrap(), frame);
    }

    #[test]
    fn unknown_top_level_key_is_rejected() {
        assert!(ShipFrame::decode(b"\x01{\"connectionHullo\":[]}").is_err());
    }
}
