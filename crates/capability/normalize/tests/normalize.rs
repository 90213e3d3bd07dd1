use api_contract::{LivePayload, LiveUpdateMessage};
use domain::{
    DataValue, DeviceDescriptor, RawReading, RawValues, RegisterEncoding, RegisterGroup,
    RegisterKind, TransportAddress,
};
use ems_normalize::{NormalizeError, normalize, normalize_or_drop};
use std::time::Duration;

fn device(groups: Vec<RegisterGroup>) -> DeviceDescriptor {
    DeviceDescriptor {
        name: "SimDevice1".to_string(),
        slave_id: 1,
        transport: TransportAddress {
            host: "127.0.0.1".to_string(),
            port: 5020,
        },
        groups,
        polling_interval: Duration::from_secs(5),
    }
}

#[test]
fn holding_pair_as_uint32_yields_one_point() {
    let group = RegisterGroup::new("power", RegisterKind::HoldingRegister, 0, 2)
        .with_encoding(RegisterEncoding::Uint32);
    let device = device(vec![group.clone()]);
    let reading = RawReading::new(RawValues::Registers(vec![0, 1234]));

    let points = normalize(&device, &group, &reading).expect("normalize");
    assert_eq!(points.len(), 1);
    let point = &points[0];
    assert_eq!(point.value, DataValue::Int(1234));
    assert_eq!(point.tags.device_name, "SimDevice1");
    assert_eq!(point.tags.address, 0);
    assert_eq!(point.tags.register_type, RegisterKind::HoldingRegister);
    assert_eq!(point.ts_ms, reading.ts_ms);
}

#[test]
fn coils_yield_one_bool_per_address() {
    let group = RegisterGroup::new("relays", RegisterKind::Coil, 10, 3);
    let device = device(vec![group.clone()]);
    let reading = RawReading::new(RawValues::Bits(vec![true, false, true]));

    let points = normalize(&device, &group, &reading).expect("normalize");
    let summary: Vec<_> = points
        .iter()
        .map(|point| (point.tags.address, point.value))
        .collect();
    assert_eq!(
        summary,
        vec![
            (10, DataValue::Bool(true)),
            (11, DataValue::Bool(false)),
            (12, DataValue::Bool(true)),
        ]
    );
}

#[test]
fn plain_registers_are_not_scaled() {
    let group = RegisterGroup::new("raw", RegisterKind::InputRegister, 5, 2);
    let device = device(vec![group.clone()]);
    let reading = RawReading::new(RawValues::Registers(vec![65535, 7]));

    let points = normalize(&device, &group, &reading).expect("normalize");
    assert_eq!(points[0].value, DataValue::Int(65535));
    assert_eq!(points[1].value, DataValue::Int(7));
    assert_eq!(points[1].tags.address, 6);
}

#[test]
fn length_mismatch_is_malformed() {
    let group = RegisterGroup::new("raw", RegisterKind::HoldingRegister, 0, 4);
    let device = device(vec![group.clone()]);
    let reading = RawReading::new(RawValues::Registers(vec![1, 2, 3]));

    assert_eq!(
        normalize(&device, &group, &reading),
        Err(NormalizeError::MalformedReading {
            expected: 4,
            actual: 3
        })
    );
    assert!(normalize_or_drop(&device, &group, &reading).is_empty());
}

#[test]
fn bits_for_register_group_is_malformed() {
    let group = RegisterGroup::new("raw", RegisterKind::HoldingRegister, 0, 2);
    let device = device(vec![group.clone()]);
    let reading = RawReading::new(RawValues::Bits(vec![true, false]));
    assert!(matches!(
        normalize(&device, &group, &reading),
        Err(NormalizeError::KindMismatch { .. })
    ));
}

#[test]
fn live_message_round_trip_preserves_identity() {
    let groups = vec![
        RegisterGroup::new("relays", RegisterKind::Coil, 3, 2),
        RegisterGroup::new("temps", RegisterKind::InputRegister, 100, 4)
            .with_encoding(RegisterEncoding::Float32),
    ];
    let device = device(groups.clone());
    let readings = [
        RawReading::new(RawValues::Bits(vec![true, true])),
        RawReading::new(RawValues::Registers(vec![0x41AC, 0x0000, 0x4120, 0x0000])),
    ];

    for (group, reading) in groups.iter().zip(readings.iter()) {
        for point in normalize(&device, group, reading).expect("normalize") {
            let message = LiveUpdateMessage {
                topic: "modbus/gateway".to_string(),
                payload: LivePayload::from(&point),
            };
            let text = serde_json::to_string(&message).expect("serialize");
            let decoded: LiveUpdateMessage = serde_json::from_str(&text).expect("parse");
            let tags = decoded.payload.tags.to_tag_set().expect("tags");

            assert_eq!(tags, point.tags);
            assert_eq!(tags.device_name, device.name);
            assert_eq!(tags.slave_id, device.slave_id);
            assert_eq!(tags.register_name, group.name);
            assert_eq!(tags.register_type, group.kind);
            assert!(group.contains(tags.address));
        }
    }
}
