//! SPINE datagram: header, commands, filters, and the wire envelope.
//!
//! The payload handed to SHIP data frames is
//! `{"datagram":[{"header":[...]},{"payload":{"cmd":[...]}}]}`.

use serde_json::{Value, json};

use crate::EebusError;
use crate::value::{SeqBuilder, SeqReader, as_bool, as_str, as_u32, as_u64};

use super::address::FeatureAddress;
use super::function::FunctionData;

pub const SPECIFICATION_VERSION: &str = "1.3.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmdClassifier {
    Read,
    Reply,
    Notify,
    Write,
    Call,
    Result,
}

impl CmdClassifier {
    pub fn as_str(self) -> &'static str {
        match self {
            CmdClassifier::Read => "read",
            CmdClassifier::Reply => "reply",
            CmdClassifier::Notify => "notify",
            CmdClassifier::Write => "write",
            CmdClassifier::Call => "call",
            CmdClassifier::Result => "result",
        }
    }

    pub fn parse(s: &str) -> Result<Self, EebusError> {
        match s {
            "read" => Ok(CmdClassifier::Read),
            "reply" => Ok(CmdClassifier::Reply),
            "notify" => Ok(CmdClassifier::Notify),
            "write" => Ok(CmdClassifier::Write),
            "call" => Ok(CmdClassifier::Call),
            "result" => Ok(CmdClassifier::Result),
            other => Err(EebusError::InputArgumentOutOfRange(format!(
                "unknown cmd classifier `{other}`"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub specification_version: String,
    pub source: FeatureAddress,
    pub destination: FeatureAddress,
    pub msg_counter: u64,
    pub msg_counter_reference: Option<u64>,
    pub cmd_classifier: CmdClassifier,
    pub ack_request: Option<bool>,
}

impl Header {
    pub fn wants_ack(&self) -> bool {
        self.ack_request == Some(true)
    }

    fn to_value(&self) -> Value {
        SeqBuilder::new()
            .field("specificationVersion", json!(self.specification_version))
            .field("addressSource", self.source.to_value())
            .field("addressDestination", self.destination.to_value())
            .field("msgCounter", json!(self.msg_counter))
            .opt(
                "msgCounterReference",
                self.msg_counter_reference.map(|c| json!(c)),
            )
            .field("cmdClassifier", json!(self.cmd_classifier.as_str()))
            .opt("ackRequest", self.ack_request.map(|a| json!(a)))
            .build()
    }

    fn from_value(value: &Value) -> Result<Self, EebusError> {
        let seq = SeqReader::new(value)?;
        seq.deny_unknown(&[
            "specificationVersion",
            "addressSource",
            "addressDestination",
            "msgCounter",
            "msgCounterReference",
            "cmdClassifier",
            "ackRequest",
        ])?;

        Ok(Header {
            specification_version: as_str(
                seq.require("specificationVersion")?,
                "specificationVersion",
            )?,
            source: FeatureAddress::from_value(seq.require("addressSource")?)?,
            destination: FeatureAddress::from_value(seq.require("addressDestination")?)?,
            msg_counter: as_u64(seq.require("msgCounter")?, "msgCounter")?,
            msg_counter_reference: seq
                .get("msgCounterReference")
                .map(|v| as_u64(v, "msgCounterReference"))
                .transpose()?,
            cmd_classifier: CmdClassifier::parse(&as_str(
                seq.require("cmdClassifier")?,
                "cmdClassifier",
            )?)?,
            ack_request: seq
                .get("ackRequest")
                .map(|v| as_bool(v, "ackRequest"))
                .transpose()?,
        })
    }
}

/// Partial-update selector attached to a command.
///
/// Selector and element trees are type-specific; they are carried as raw
/// values keyed by their choice name and interpreted by the function data
/// they apply to.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Filter {
    pub filter_id: Option<u32>,
    /// `(choice key, value)` of the data-selectors choice.
    pub selectors: Option<(String, Value)>,
    /// `(choice key, value)` of the data-elements choice.
    pub elements: Option<(String, Value)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FilterControl {
    Partial,
    Delete,
}

impl Filter {
    /// An empty partial filter, as attached to full-list notifies.
    pub fn empty() -> Self {
        Filter::default()
    }

    /// Extract the set of ids named by the selectors, looking for the given
    /// id key (`"limitId"`, `"measurementId"`, ...). `None` when the filter
    /// has no selectors, i.e. it matches everything.
    pub fn selected_ids(&self, id_key: &str) -> Option<Vec<u32>> {
        let (_, value) = self.selectors.as_ref()?;
        let mut ids = Vec::new();
        collect_ids(value, id_key, &mut ids);
        Some(ids)
    }

    fn to_value(&self, control: FilterControl) -> Value {
        let cmd_control = match control {
            FilterControl::Partial => SeqBuilder::new().field("partial", json!([])).build(),
            FilterControl::Delete => SeqBuilder::new().field("delete", json!([])).build(),
        };

        let mut builder = SeqBuilder::new()
            .opt("filterId", self.filter_id.map(|id| json!(id)))
            .field("cmdControl", cmd_control);
        if let Some((key, value)) = &self.selectors {
            builder = builder.field(key, value.clone());
        }
        if let Some((key, value)) = &self.elements {
            builder = builder.field(key, value.clone());
        }
        builder.build()
    }

    fn from_value(value: &Value) -> Result<(Self, FilterControl), EebusError> {
        let seq = SeqReader::new(value)?;

        let control_value = seq.require("cmdControl")?;
        let control_seq = SeqReader::new(control_value)?;
        let control = if control_seq.get("partial").is_some() {
            FilterControl::Partial
        } else if control_seq.get("delete").is_some() {
            FilterControl::Delete
        } else {
            return Err(EebusError::Parse(
                "filter cmdControl is neither partial nor delete".into(),
            ));
        };

        let mut filter = Filter {
            filter_id: seq
                .get("filterId")
                .map(|v| as_u32(v, "filterId"))
                .transpose()?,
            selectors: None,
            elements: None,
        };

        for key in seq.keys() {
            if key == "filterId" || key == "cmdControl" {
                continue;
            }
            let value = seq.get(key).expect("key just listed").clone();
            if key.ends_with("Selectors") {
                filter.selectors = Some((key.to_owned(), value));
            } else if key.ends_with("Elements") {
                filter.elements = Some((key.to_owned(), value));
            } else {
                return Err(EebusError::Parse(format!("unknown filter field `{key}`")));
            }
        }

        Ok((filter, control))
    }
}

fn collect_ids(value: &Value, id_key: &str, out: &mut Vec<u32>) {
    match value {
        Value::Array(items) => {
            for item in items {
                collect_ids(item, id_key, out);
            }
        }
        Value::Object(map) => {
            for (key, inner) in map {
                if key == id_key {
                    if let Some(id) = inner.as_u64().and_then(|n| u32::try_from(n).ok()) {
                        out.push(id);
                    }
                } else {
                    collect_ids(inner, id_key, out);
                }
            }
        }
        _ => {}
    }
}

/// One command: a typed function payload plus optional partial/delete
/// filters.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub function: FunctionData,
    pub filter_partial: Option<Filter>,
    pub filter_delete: Option<Filter>,
}

impl Command {
    pub fn new(function: FunctionData) -> Self {
        Command {
            function,
            filter_partial: None,
            filter_delete: None,
        }
    }

    pub fn with_partial(mut self, filter: Filter) -> Self {
        self.filter_partial = Some(filter);
        self
    }

    pub fn with_delete(mut self, filter: Filter) -> Self {
        self.filter_delete = Some(filter);
        self
    }

    fn to_value(&self) -> Value {
        let mut filters = Vec::new();
        if let Some(f) = &self.filter_partial {
            filters.push(f.to_value(FilterControl::Partial));
        }
        if let Some(f) = &self.filter_delete {
            filters.push(f.to_value(FilterControl::Delete));
        }

        let mut builder =
            SeqBuilder::new().field("function", json!(self.function.function_type().as_str()));
        if !filters.is_empty() {
            builder = builder.field("filter", Value::Array(filters));
        }
        builder
            .field(
                self.function.function_type().as_str(),
                self.function.to_value(),
            )
            .build()
    }

    fn from_value(value: &Value) -> Result<Self, EebusError> {
        let seq = SeqReader::new(value)?;

        let mut filter_partial = None;
        let mut filter_delete = None;
        if let Some(filters) = seq.get("filter") {
            let filters = filters
                .as_array()
                .ok_or_else(|| EebusError::Parse("filter: expected an array".into()))?;
            for filter_value in filters {
                let (filter, control) = Filter::from_value(filter_value)?;
                match control {
                    FilterControl::Partial => filter_partial = Some(filter),
                    FilterControl::Delete => filter_delete = Some(filter),
                }
            }
        }

        let mut function = None;
        for key in seq.keys() {
            if key == "function" || key == "filter" {
                continue;
            }
            let data_value = seq.get(key).expect("key just listed");
            function = Some(FunctionData::from_keyed_value(key, data_value)?);
        }

        Ok(Command {
            function: function
                .ok_or_else(|| EebusError::InputArgumentNull("command data choice".into()))?,
            filter_partial,
            filter_delete,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Datagram {
    pub header: Header,
    pub cmds: Vec<Command>,
}

impl Datagram {
    /// The value placed in a SHIP data frame payload.
    pub fn to_value(&self) -> Value {
        let cmds: Vec<Value> = self.cmds.iter().map(Command::to_value).collect();
        json!({
            "datagram": SeqBuilder::new()
                .field("header", self.header.to_value())
                .field("payload", json!({ "cmd": cmds }))
                .build()
        })
    }

    pub fn from_value(value: &Value) -> Result<Self, EebusError> {
        let (key, inner) = crate::value::choice_of(value)?;
        if key != "datagram" {
            return Err(EebusError::Parse(format!(
                "expected `datagram`, got `{key}`"
            )));
        }

        let seq = SeqReader::new(inner)?;
        seq.deny_unknown(&["header", "payload"])?;

        let header = Header::from_value(seq.require("header")?)?;

        let payload = seq.require("payload")?;
        let cmd_list = payload
            .get("cmd")
            .and_then(Value::as_array)
            .ok_or_else(|| EebusError::InputArgumentNull("payload.cmd".into()))?;
        if cmd_list.is_empty() {
            return Err(EebusError::InputArgumentNull("payload.cmd is empty".into()));
        }

        let cmds = cmd_list
            .iter()
            .map(Command::from_value)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Datagram { header, cmds })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spine::function::{DeviceDiagnosisHeartbeatData, FunctionData};

    fn sample_header(classifier: CmdClassifier) -> Header {
        Header {
            specification_version: SPECIFICATION_VERSION.to_owned(),
            source: FeatureAddress::new(Some("d:_n:a_b-1".into()), vec![1], 2),
            destination: FeatureAddress::new(Some("d:_n:c_d-2".into()), vec![0], 0),
            msg_counter: 7,
            msg_counter_reference: None,
            cmd_classifier: classifier,
            ack_request: Some(true),
        }
    }

    #[test]
    fn datagram_round_trip() {
        let datagram = Datagram {
            header: sample_header(CmdClassifier::Notify),
            cmds: vec![Command::new(FunctionData::DeviceDiagnosisHeartbeatData(
                DeviceDiagnosisHeartbeatData {
                    timeout: Some(4000),
                    heartbeat_counter: Some(12),
                },
            ))],
        };

        let value = datagram.to_value();
        assert_eq!(Datagram::from_value(&value).unwrap(), datagram);
    }

    #[test]
    fn empty_cmd_list_is_rejected() {
        let datagram = Datagram {
            header: sample_header(CmdClassifier::Read),
            cmds: vec![Command::new(FunctionData::DeviceDiagnosisHeartbeatData(
                DeviceDiagnosisHeartbeatData::default(),
            ))],
        };
        let mut value = datagram.to_value();
        value["datagram"][1]["payload"]["cmd"] = json!([]);
        assert!(Datagram::from_value(&value).is_err());
    }

    #[test]
    fn header_without_classifier_is_rejected() {
        let datagram = Datagram {
            header: sample_header(CmdClassifier::Read),
            cmds: vec![Command::new(FunctionData::DeviceDiagnosisHeartbeatData(
                DeviceDiagnosisHeartbeatData::default(),
            ))],
        };
        let mut value = datagram.to_value();
        // Strip the cmdClassifier entry out of the header sequence.
        let header = value["datagram"][0]["header"].as_array_mut().unwrap();
        header.retain(|entry| entry.get("cmdClassifier").is_none());
        assert!(Datagram::from_value(&value).is_err());
    }

    #[test]
    fn filter_selected_ids() {
        let filter = Filter {
            filter_id: None,
            selectors: Some((
                "loadControlLimitListDataSelectors".into(),
                json!([{ "limitId": 1 }, { "limitId": 3 }]),
            )),
            elements: None,
        };
        assert_eq!(filter.selected_ids("limitId"), Some(vec![1, 3]));
        assert_eq!(Filter::empty().selected_ids("limitId"), None);
    }

    #[test]
    fn command_filters_round_trip() {
        let cmd = Command::new(FunctionData::DeviceDiagnosisHeartbeatData(
            DeviceDiagnosisHeartbeatData::default(),
        ))
        .with_partial(Filter::empty())
        .with_delete(Filter {
            filter_id: Some(2),
            selectors: Some((
                "loadControlLimitListDataSelectors".into(),
                json!([{ "limitId": 4 }]),
            )),
            elements: None,
        });

        let round = Command::from_value(&cmd.to_value()).unwrap();
        assert_eq!(round, cmd);
    }
}
