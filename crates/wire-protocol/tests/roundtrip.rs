use std::io::Cursor;
use std::sync::Arc;

use wire_protocol::{Message, MessageKind, Safety};

#[test]
fn ping_roundtrips_with_no_body() {
    let mut request = Message::new(MessageKind::Ping, 0);
    let mut wire = Vec::new();
    request.send(&mut wire).unwrap();

    let mut reply = Message::new_reply(&request);
    reply.add_operation();
    reply.append_string("data");
    let mut reply_wire = Vec::new();
    // Simulate a server writing the reply header by hand since Message::send
    // only knows how to send requests it built itself; round-trip through
    // receive() to exercise framing end to end.
    reply.send(&mut reply_wire).unwrap();

    let mut received = Message::new_reply(&request);
    received.receive(&mut Cursor::new(reply_wire)).unwrap();
    assert_eq!(received.count(), 1);
    assert_eq!(received.correlation(), request.correlation());
}

#[test]
fn data_write_sub_operation_layout() {
    let path = "coll/item";
    let mut msg = Message::new(MessageKind::DataWrite, path.len() + 32);
    msg.set_safety(Safety::Network);
    msg.append_string(path);

    msg.add_operation();
    msg.append_8(4);
    msg.append_8(0);
    msg.add_send_span(Arc::from(*b"ABCD"));

    msg.add_operation();
    msg.append_8(4);
    msg.append_8(4);
    msg.add_send_span(Arc::from(*b"EFGH"));

    let mut wire = Vec::new();
    msg.send(&mut wire).unwrap();

    let mut received = Message::new(MessageKind::DataWrite, 0);
    received.receive(&mut Cursor::new(wire)).unwrap();

    assert_eq!(received.count(), 2);
    assert_eq!(received.safety(), Safety::Network);
    assert_eq!(received.get_string().unwrap(), path);
    assert_eq!(received.get_8().unwrap(), 4);
    assert_eq!(received.get_8().unwrap(), 0);
    assert_eq!(received.get_n(4).unwrap(), b"ABCD");
    assert_eq!(received.get_8().unwrap(), 4);
    assert_eq!(received.get_8().unwrap(), 4);
    assert_eq!(received.get_n(4).unwrap(), b"EFGH");
}

#[test]
fn force_safety_survives_later_set_safety() {
    let mut msg = Message::new(MessageKind::DataCreate, 0);
    msg.force_safety(Safety::Network);
    msg.set_safety(Safety::None);
    assert_eq!(msg.safety(), Safety::Network);
}

#[test]
fn short_read_is_reported() {
    let mut msg = Message::new(MessageKind::DataRead, 0);
    msg.add_operation();
    msg.append_8(42);

    let mut wire = Vec::new();
    msg.send(&mut wire).unwrap();

    let mut received = Message::new(MessageKind::DataRead, 0);
    received.receive(&mut Cursor::new(wire)).unwrap();

    assert_eq!(received.get_8().unwrap(), 42);
    assert!(received.get_8().is_err());
}
