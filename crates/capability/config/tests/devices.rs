use domain::{RegisterEncoding, RegisterKind, WordOrder};
use ems_config::{ConfigError, parse_devices};
use std::time::Duration;

const VALID: &str = r#"{
  "devices": [
    {
      "name": "SimDevice1",
      "slave_id": 1,
      "host": "127.0.0.1",
      "port": 5020,
      "polling_interval_ms": 5000,
      "register_groups": [
        { "name": "coils", "kind": "coil", "address": 0, "count": 8 },
        { "name": "power", "kind": "holding_registers", "address": 0, "count": 2,
          "encoding": "uint32", "word_order": "low_first" },
        { "name": "temp", "kind": "input_register", "address": 100, "count": 2, "scale": 0.1 }
      ]
    },
    { "name": "SimDevice2", "slave_id": 2, "host": "10.0.0.2" }
  ]
}"#;

#[test]
fn parses_devices_with_defaults() {
    let devices = parse_devices(VALID).expect("devices");
    assert_eq!(devices.len(), 2);

    let first = &devices[0];
    assert_eq!(first.polling_interval, Duration::from_secs(5));
    assert_eq!(first.transport.to_string(), "127.0.0.1:5020");
    assert_eq!(first.groups[1].kind, RegisterKind::HoldingRegister);
    assert_eq!(first.groups[1].encoding, RegisterEncoding::Uint32);
    assert_eq!(first.groups[1].word_order, WordOrder::LowFirst);
    assert_eq!(first.groups[2].scale, Some(0.1));

    let second = &devices[1];
    assert_eq!(second.transport.port, 502);
    assert!(second.groups.is_empty());
}

fn expect_invalid(raw: &str) {
    match parse_devices(raw) {
        Err(ConfigError::InvalidDevice(_)) => {}
        other => panic!("expected invalid device, got {:?}", other),
    }
}

#[test]
fn rejects_duplicate_slave_ids() {
    expect_invalid(
        r#"{"devices":[
            {"name":"a","slave_id":1,"host":"h"},
            {"name":"b","slave_id":1,"host":"h"}
        ]}"#,
    );
}

#[test]
fn rejects_duplicate_names() {
    expect_invalid(
        r#"{"devices":[
            {"name":"a","slave_id":1,"host":"h"},
            {"name":"a","slave_id":2,"host":"h"}
        ]}"#,
    );
}

#[test]
fn rejects_count_not_multiple_of_width() {
    expect_invalid(
        r#"{"devices":[{"name":"a","slave_id":1,"host":"h","register_groups":[
            {"name":"g","kind":"holding_register","address":0,"count":3,"encoding":"float32"}
        ]}]}"#,
    );
}

#[test]
fn rejects_zero_count_and_overflowing_range() {
    expect_invalid(
        r#"{"devices":[{"name":"a","slave_id":1,"host":"h","register_groups":[
            {"name":"g","kind":"coil","address":0,"count":0}
        ]}]}"#,
    );
    expect_invalid(
        r#"{"devices":[{"name":"a","slave_id":1,"host":"h","register_groups":[
            {"name":"g","kind":"coil","address":65535,"count":2}
        ]}]}"#,
    );
}

#[test]
fn rejects_encoding_on_bit_kinds() {
    expect_invalid(
        r#"{"devices":[{"name":"a","slave_id":1,"host":"h","register_groups":[
            {"name":"g","kind":"discrete_input","address":0,"count":2,"encoding":"uint32"}
        ]}]}"#,
    );
}

#[test]
fn rejects_unknown_kind_and_zero_interval() {
    expect_invalid(
        r#"{"devices":[{"name":"a","slave_id":1,"host":"h","register_groups":[
            {"name":"g","kind":"analog","address":0,"count":1}
        ]}]}"#,
    );
    expect_invalid(r#"{"devices":[{"name":"a","slave_id":1,"host":"h","polling_interval_ms":0}]}"#);
}

#[test]
fn malformed_json_is_a_file_error() {
    assert!(matches!(
        parse_devices("{not json"),
        Err(ConfigError::DeviceFile(_))
    ));
}
