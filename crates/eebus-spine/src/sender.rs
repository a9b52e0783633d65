//! Outbound datagram composition.
//!
//! One `Sender` per remote device. Message counters are strictly
//! monotonic per sender, starting at 1; frames are serialized here and
//! enqueued on the connection's data writer, so no caller ever blocks on
//! the transport while holding the device lock.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::debug;

use eebus_runtime::EebusError;
use eebus_ship::DataWriter;
use eebus_wire::spine::node_management::{
    BindingManagementDelete, BindingManagementRequest, SubscriptionManagementDelete,
    SubscriptionManagementRequest,
};
use eebus_wire::spine::{
    CmdClassifier, Command, Datagram, FeatureAddress, FunctionData, Header, ResultData,
    SPECIFICATION_VERSION,
};
use eebus_wire::spine::{
    NodeManagementBindingDeleteCall, NodeManagementBindingRequestCall,
    NodeManagementSubscriptionDeleteCall, NodeManagementSubscriptionRequestCall,
};

struct SenderInner {
    ski: String,
    writer: Arc<dyn DataWriter>,
    counter: AtomicU64,
}

/// Composes and ships datagrams to one remote device.
#[derive(Clone)]
pub struct Sender {
    inner: Arc<SenderInner>,
}

impl Sender {
    pub fn new(ski: impl Into<String>, writer: Arc<dyn DataWriter>) -> Self {
        Sender {
            inner: Arc::new(SenderInner {
                ski: ski.into(),
                writer,
                counter: AtomicU64::new(0),
            }),
        }
    }

    pub fn ski(&self) -> &str {
        &self.inner.ski
    }

    /// The counter of the most recently composed datagram.
    pub fn last_counter(&self) -> u64 {
        self.inner.counter.load(Ordering::SeqCst)
    }

    fn next_counter(&self) -> u64 {
        self.inner.counter.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn send(
        &self,
        classifier: CmdClassifier,
        source: FeatureAddress,
        destination: FeatureAddress,
        msg_counter_reference: Option<u64>,
        ack_request: Option<bool>,
        cmds: Vec<Command>,
    ) -> Result<u64, EebusError> {
        let msg_counter = self.next_counter();
        let datagram = Datagram {
            header: Header {
                specification_version: SPECIFICATION_VERSION.to_owned(),
                source,
                destination,
                msg_counter,
                msg_counter_reference,
                cmd_classifier: classifier,
                ack_request,
            },
            cmds,
        };

        debug!(
            ski = %self.inner.ski,
            classifier = classifier.as_str(),
            counter = msg_counter,
            "sending datagram"
        );
        self.inner.writer.write_payload(datagram.to_value())?;
        Ok(msg_counter)
    }

    /// Read request; returns the counter for reply correlation.
    pub fn send_read(
        &self,
        source: &FeatureAddress,
        destination: &FeatureAddress,
        cmd: Command,
    ) -> Result<u64, EebusError> {
        self.send(
            CmdClassifier::Read,
            source.clone(),
            destination.clone(),
            None,
            None,
            vec![cmd],
        )
    }

    /// Reply to a read, carrying the request's counter as the reference.
    pub fn send_reply(
        &self,
        request_header: &Header,
        source: &FeatureAddress,
        cmd: Command,
    ) -> Result<u64, EebusError> {
        self.send(
            CmdClassifier::Reply,
            source.clone(),
            request_header.source.clone(),
            Some(request_header.msg_counter),
            None,
            vec![cmd],
        )
    }

    pub fn send_notify(
        &self,
        source: &FeatureAddress,
        destination: &FeatureAddress,
        cmd: Command,
    ) -> Result<u64, EebusError> {
        self.send(
            CmdClassifier::Notify,
            source.clone(),
            destination.clone(),
            None,
            None,
            vec![cmd],
        )
    }

    pub fn send_write(
        &self,
        source: &FeatureAddress,
        destination: &FeatureAddress,
        cmd: Command,
    ) -> Result<u64, EebusError> {
        self.send(
            CmdClassifier::Write,
            source.clone(),
            destination.clone(),
            None,
            Some(true),
            vec![cmd],
        )
    }

    pub fn send_call_subscribe(
        &self,
        source: &FeatureAddress,
        destination: &FeatureAddress,
        server_feature_type: Option<String>,
    ) -> Result<u64, EebusError> {
        let request = SubscriptionManagementRequest {
            client_address: source.clone(),
            server_address: destination.clone(),
            server_feature_type,
        };
        let cmd = Command::new(FunctionData::NodeManagementSubscriptionRequestCall(
            NodeManagementSubscriptionRequestCall::new(request),
        ));
        self.send_node_management_call(source, destination, cmd)
    }

    pub fn send_call_unsubscribe(
        &self,
        source: &FeatureAddress,
        destination: &FeatureAddress,
    ) -> Result<u64, EebusError> {
        let delete = SubscriptionManagementDelete {
            subscription_id: None,
            client_address: Some(source.clone()),
            server_address: Some(destination.clone()),
        };
        let cmd = Command::new(FunctionData::NodeManagementSubscriptionDeleteCall(
            NodeManagementSubscriptionDeleteCall::new(delete),
        ));
        self.send_node_management_call(source, destination, cmd)
    }

    pub fn send_call_bind(
        &self,
        source: &FeatureAddress,
        destination: &FeatureAddress,
        server_feature_type: Option<String>,
    ) -> Result<u64, EebusError> {
        let request = BindingManagementRequest {
            client_address: source.clone(),
            server_address: destination.clone(),
            server_feature_type,
        };
        let cmd = Command::new(FunctionData::NodeManagementBindingRequestCall(
            NodeManagementBindingRequestCall::new(request),
        ));
        self.send_node_management_call(source, destination, cmd)
    }

    pub fn send_call_unbind(
        &self,
        source: &FeatureAddress,
        destination: &FeatureAddress,
    ) -> Result<u64, EebusError> {
        let delete = BindingManagementDelete {
            binding_id: None,
            client_address: Some(source.clone()),
            server_address: Some(destination.clone()),
        };
        let cmd = Command::new(FunctionData::NodeManagementBindingDeleteCall(
            NodeManagementBindingDeleteCall::new(delete),
        ));
        self.send_node_management_call(source, destination, cmd)
    }

    /// Management calls address the peer's node management feature, no
    /// matter which local feature initiated them.
    fn send_node_management_call(
        &self,
        source: &FeatureAddress,
        destination: &FeatureAddress,
        cmd: Command,
    ) -> Result<u64, EebusError> {
        let nm_destination = FeatureAddress::node_management(destination.device.clone());
        self.send(
            CmdClassifier::Call,
            source.clone(),
            nm_destination,
            None,
            Some(true),
            vec![cmd],
        )
    }

    pub fn send_result_success(
        &self,
        request_header: &Header,
        source: &FeatureAddress,
    ) -> Result<u64, EebusError> {
        self.send_result(request_header, source, ResultData::success())
    }

    pub fn send_result_error(
        &self,
        request_header: &Header,
        source: &FeatureAddress,
        result: ResultData,
    ) -> Result<u64, EebusError> {
        self.send_result(request_header, source, result)
    }

    fn send_result(
        &self,
        request_header: &Header,
        source: &FeatureAddress,
        result: ResultData,
    ) -> Result<u64, EebusError> {
        self.send(
            CmdClassifier::Result,
            source.clone(),
            request_header.source.clone(),
            Some(request_header.msg_counter),
            None,
            vec![Command::new(FunctionData::ResultData(result))],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    pub(crate) struct CapturingWriter {
        pub datagrams: Mutex<Vec<Datagram>>,
    }

    impl CapturingWriter {
        pub(crate) fn new() -> Arc<Self> {
            Arc::new(CapturingWriter {
                datagrams: Mutex::new(Vec::new()),
            })
        }
    }

    impl DataWriter for CapturingWriter {
        fn write_payload(&self, payload: serde_json::Value) -> Result<(), EebusError> {
            let datagram = Datagram::from_value(&payload)?;
            self.datagrams.lock().unwrap().push(datagram);
            Ok(())
        }
    }

    fn addr(device: &str, entity: u32, feature: u32) -> FeatureAddress {
        FeatureAddress::new(Some(device.into()), vec![entity], feature)
    }

    #[test]
    fn counters_are_strictly_monotonic_from_one() {
        let writer = CapturingWriter::new();
        let sender = Sender::new("ski-a", writer.clone() as Arc<dyn DataWriter>);

        let src = addr("d:local", 1, 1);
        let dst = addr("d:remote", 1, 1);

        let c1 = sender
            .send_read(&src, &dst, Command::new(FunctionData::ResultData(ResultData::success())))
            .unwrap();
        let c2 = sender
            .send_notify(&src, &dst, Command::new(FunctionData::ResultData(ResultData::success())))
            .unwrap();

        assert_eq!(c1, 1);
        assert_eq!(c2, 2);
        let datagrams = writer.datagrams.lock().unwrap();
        assert!(datagrams[0].header.msg_counter < datagrams[1].header.msg_counter);
    }

    #[test]
    fn reply_references_the_request_counter() {
        let writer = CapturingWriter::new();
        let sender = Sender::new("ski-a", writer.clone() as Arc<dyn DataWriter>);

        let request_header = Header {
            specification_version: SPECIFICATION_VERSION.to_owned(),
            source: addr("d:remote", 1, 1),
            destination: addr("d:local", 1, 1),
            msg_counter: 42,
            msg_counter_reference: None,
            cmd_classifier: CmdClassifier::Read,
            ack_request: None,
        };

        sender
            .send_reply(
                &request_header,
                &addr("d:local", 1, 1),
                Command::new(FunctionData::ResultData(ResultData::success())),
            )
            .unwrap();

        let datagrams = writer.datagrams.lock().unwrap();
        let header = &datagrams[0].header;
        assert_eq!(header.msg_counter_reference, Some(42));
        assert_eq!(header.destination, addr("d:remote", 1, 1));
        assert_eq!(header.cmd_classifier, CmdClassifier::Reply);
    }

    #[test]
    fn management_calls_target_the_peer_node_management() {
        let writer = CapturingWriter::new();
        let sender = Sender::new("ski-a", writer.clone() as Arc<dyn DataWriter>);

        sender
            .send_call_subscribe(&addr("d:local", 0, 0), &addr("d:remote", 1, 2), None)
            .unwrap();

        let datagrams = writer.datagrams.lock().unwrap();
        let header = &datagrams[0].header;
        assert_eq!(header.cmd_classifier, CmdClassifier::Call);
        assert_eq!(
            header.destination,
            FeatureAddress::node_management(Some("d:remote".into()))
        );
        assert_eq!(header.ack_request, Some(true));
    }
}
