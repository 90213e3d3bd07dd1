use api_contract::{
    LiveUpdateMessage, LivePayload, LiveValue, TagsDto, WriteRegisterRequest, WriteResponse,
};
use domain::{
    CommandOutcome, CommandValue, DataPoint, DataValue, RegisterKind, TagSet,
};
use serde_json::{Value, json};
use std::time::Instant;

fn point(value: DataValue) -> DataPoint {
    DataPoint {
        ts_ms: 1_700_000_000_000,
        acquired_at: Instant::now(),
        value,
        tags: TagSet {
            device_name: "SimDevice1".to_string(),
            slave_id: 1,
            register_name: "setpoints".to_string(),
            address: 0,
            register_type: RegisterKind::HoldingRegister,
        },
    }
}

#[test]
fn live_message_uses_string_tags() {
    let message = LiveUpdateMessage {
        topic: "modbus/gateway/SimDevice1/1/holding_register/0".to_string(),
        payload: LivePayload::from(&point(DataValue::Int(42))),
    };
    let value = serde_json::to_value(&message).expect("serialize");
    assert_eq!(value["payload"]["value"], json!(42));
    assert_eq!(value["payload"]["tags"]["address"], json!("0"));
    assert_eq!(value["payload"]["tags"]["slave_id"], json!("1"));
    assert_eq!(value["payload"]["tags"]["register_type"], json!("holding_register"));
    assert_eq!(value["payload"]["timestamp"], json!(1_700_000_000_000_i64));
}

#[test]
fn live_message_tags_survive_json() {
    let original = point(DataValue::Float(21.5));
    let message = LiveUpdateMessage {
        topic: "t".to_string(),
        payload: LivePayload::from(&original),
    };
    let text = serde_json::to_string(&message).expect("serialize");
    let decoded: LiveUpdateMessage = serde_json::from_str(&text).expect("parse");
    let restored = decoded.payload.to_data_point().expect("tags");
    assert_eq!(restored.tags, original.tags);
    assert_eq!(restored.value, DataValue::Float(21.5));
}

#[test]
fn bool_value_stays_bool() {
    let payload = LivePayload::from(&point(DataValue::Bool(true)));
    let value = serde_json::to_value(&payload).expect("serialize");
    assert_eq!(value["value"], Value::Bool(true));
}

#[test]
fn tags_with_bad_address_are_rejected() {
    let tags = TagsDto {
        device_name: "d".to_string(),
        slave_id: "1".to_string(),
        register_name: String::new(),
        address: "70000".to_string(),
        register_type: "coil".to_string(),
    };
    assert!(tags.to_tag_set().is_err());
}

#[test]
fn plain_payload_parsing() {
    assert_eq!(LiveValue::parse_plain("True"), Some(LiveValue::Bool(true)));
    assert_eq!(LiveValue::parse_plain(" 17 "), Some(LiveValue::Int(17)));
    assert_eq!(LiveValue::parse_plain("1.25"), Some(LiveValue::Float(1.25)));
    assert_eq!(LiveValue::parse_plain("on"), None);
}

#[test]
fn write_request_maps_value_types() {
    let request: WriteRegisterRequest = serde_json::from_value(json!({
        "slave_id": 1,
        "address": 10,
        "value": true,
        "register_type": "coil"
    }))
    .expect("parse");
    let command = request.to_command().expect("command");
    assert_eq!(command.register_type, RegisterKind::Coil);
    assert_eq!(command.value, CommandValue::Bool(true));
    assert!(command.correlation_id.is_none());

    let request: WriteRegisterRequest = serde_json::from_value(json!({
        "slave_id": 1,
        "address": 3,
        "value": 2.5,
        "register_type": "holding_registers"
    }))
    .expect("parse");
    let command = request.to_command().expect("command");
    assert_eq!(command.value, CommandValue::Float(2.5));
}

#[test]
fn write_request_rejects_string_value() {
    let request: WriteRegisterRequest = serde_json::from_value(json!({
        "slave_id": 1,
        "address": 3,
        "value": "on",
        "register_type": "coil"
    }))
    .expect("parse");
    assert!(request.to_command().is_err());
}

#[test]
fn write_response_carries_status() {
    let outcome = CommandOutcome::applied("written").with_correlation_id(Some("c-1".into()));
    let response = WriteResponse::from_outcome(&outcome, None);
    let value = serde_json::to_value(response).expect("serialize");
    assert_eq!(value["status"], json!("applied"));
    assert_eq!(value["correlation_id"], json!("c-1"));
    assert!(value.get("request_details").is_none());
}
