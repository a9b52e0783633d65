//! Golden wire-format tests: literal SHIP byte strings in, typed frames
//! out, and byte-identical re-encoding where the encoding is canonical.

use eebus_wire::ship::{
    ClosePhase, ConnectionClose, ConnectionHello, HandshakeType, HelloPhase, ShipFrame,
    handshake_error, msg_type,
};
use eebus_wire::spine::{
    CmdClassifier, Command, Datagram, FeatureAddress, FunctionData, Header,
    LoadControlLimitListData, SPECIFICATION_VERSION,
};

#[test]
fn cmi_wire_bytes_are_exact() {
    assert_eq!(ShipFrame::Cmi(1).encode(), b"\x04{\"cmi\":1}");
}

#[test]
fn cmi_mismatch_is_decodable() {
    // A mismatching CMI value still parses; the SME decides to abort.
    match ShipFrame::decode(b"\x04{\"cmi\":2}").unwrap() {
        ShipFrame::Cmi(v) => assert_eq!(v, 2),
        other => panic!("expected cmi, got {other:?}"),
    }
}

#[test]
fn hello_ready_vector() {
    let frame = ShipFrame::decode(b"\x01{\"connectionHello\":[{\"phase\":\"ready\"}]}").unwrap();
    assert_eq!(frame, ShipFrame::Hello(ConnectionHello::ready()));
}

#[test]
fn hello_aborted_vector() {
    let frame = ShipFrame::decode(b"\x01{\"connectionHello\":[{\"phase\":\"aborted\"}]}").unwrap();
    match frame {
        ShipFrame::Hello(hello) => assert_eq!(hello.phase, HelloPhase::Aborted),
        other => panic!("expected hello, got {other:?}"),
    }
}

#[test]
fn hello_ready_with_waiting_vector() {
    let frame =
        ShipFrame::decode(b"\x01{\"connectionHello\":[{\"phase\":\"ready\"},{\"waiting\":6000}]}")
            .unwrap();
    match frame {
        ShipFrame::Hello(hello) => {
            assert_eq!(hello.phase, HelloPhase::Ready);
            assert_eq!(hello.waiting, Some(6000));
        }
        other => panic!("expected hello, got {other:?}"),
    }
}

#[test]
fn handshake_select_vector() {
    let bytes = b"\x01{\"messageProtocolHandshake\":[{\"handshakeType\":\"select\"},{\"version\":[{\"major\":1},{\"minor\":0}]},{\"formats\":[{\"format\":[\"JSON-UTF8\"]}]}]}";
    match ShipFrame::decode(bytes).unwrap() {
        ShipFrame::ProtocolHandshake(hs) => {
            assert_eq!(hs.handshake_type, HandshakeType::Select);
            assert!(hs.is_acceptable());
        }
        other => panic!("expected handshake, got {other:?}"),
    }
}

#[test]
fn handshake_version_two_decodes_but_is_unacceptable() {
    let bytes = b"\x01{\"messageProtocolHandshake\":[{\"handshakeType\":\"select\"},{\"version\":[{\"major\":2},{\"minor\":0}]},{\"formats\":[{\"format\":[\"JSON-UTF8\"]}]}]}";
    match ShipFrame::decode(bytes).unwrap() {
        ShipFrame::ProtocolHandshake(hs) => assert!(!hs.is_acceptable()),
        other => panic!("expected handshake, got {other:?}"),
    }
}

#[test]
fn handshake_error_selection_mismatch_encoding() {
    let frame = ShipFrame::ProtocolHandshakeError(eebus_wire::ship::MessageProtocolHandshakeError {
        error: handshake_error::SELECTION_MISMATCH,
    });
    assert_eq!(
        frame.encode(),
        b"\x01{\"messageProtocolHandshakeError\":[{\"error\":3}]}"
    );
}

#[test]
fn close_announce_vector() {
    let frame = ShipFrame::decode(b"\x03{\"connectionClose\":[{\"phase\":\"announce\"}]}").unwrap();
    match frame {
        ShipFrame::Close(close) => {
            assert_eq!(close.phase, ClosePhase::Announce);
            assert_eq!(close.max_time, None);
        }
        other => panic!("expected close, got {other:?}"),
    }
}

#[test]
fn close_confirm_round_trip() {
    let frame = ShipFrame::Close(ConnectionClose::confirm());
    let bytes = frame.encode();
    assert_eq!(bytes[0], msg_type::END);
    assert_eq!(ShipFrame::decode(&bytes).unwrap(), frame);
}

#[test]
fn message_types_above_control_abort() {
    for ty in [0x06u8, 0x10, 0xff] {
        let mut bytes = vec![ty];
        bytes.extend_from_slice(b"{\"cmi\":1}");
        assert!(ShipFrame::decode(&bytes).is_err());
    }
}

#[test]
fn datagram_through_ship_data_frame() {
    let datagram = Datagram {
        header: Header {
            specification_version: SPECIFICATION_VERSION.to_owned(),
            source: FeatureAddress::new(Some("d:_n:vendor_model-1".into()), vec![1], 1),
            destination: FeatureAddress::new(Some("d:_n:other_model-2".into()), vec![0], 0),
            msg_counter: 1,
            msg_counter_reference: None,
            cmd_classifier: CmdClassifier::Read,
            ack_request: None,
        },
        cmds: vec![Command::new(FunctionData::LoadControlLimitListData(
            LoadControlLimitListData::default(),
        ))],
    };

    let frame = ShipFrame::Data(eebus_wire::ship::ShipData::new(datagram.to_value()));
    let bytes = frame.encode();
    assert_eq!(bytes[0], msg_type::DATA);

    match ShipFrame::decode(&bytes).unwrap() {
        ShipFrame::Data(data) => {
            assert_eq!(data.protocol_id, eebus_wire::ship::PROTOCOL_ID);
            assert_eq!(Datagram::from_value(&data.payload).unwrap(), datagram);
        }
        other => panic!("expected data frame, got {other:?}"),
    }
}

#[test]
fn data_frame_without_protocol_id_is_rejected() {
    let bytes = b"\x02{\"data\":[{\"header\":[]},{\"payload\":{\"datagram\":[]}}]}";
    assert!(ShipFrame::decode(bytes).is_err());
}
