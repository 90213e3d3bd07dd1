use domain::{
    CommandOutcome, CommandStatus, DeviceDescriptor, RegisterEncoding, RegisterGroup,
    RegisterKind, TransportAddress,
};
use std::time::Duration;

fn descriptor() -> DeviceDescriptor {
    DeviceDescriptor {
        name: "SimDevice1".to_string(),
        slave_id: 1,
        transport: TransportAddress {
            host: "127.0.0.1".to_string(),
            port: 5020,
        },
        groups: vec![
            RegisterGroup::new("coils", RegisterKind::Coil, 0, 16),
            RegisterGroup::new("setpoints", RegisterKind::HoldingRegister, 10, 4)
                .with_encoding(RegisterEncoding::Uint32),
        ],
        polling_interval: Duration::from_secs(5),
    }
}

#[test]
fn only_coil_and_holding_are_writable() {
    let writable: Vec<_> = RegisterKind::ALL
        .iter()
        .filter(|kind| kind.is_writable())
        .map(|kind| kind.as_str())
        .collect();
    assert_eq!(writable, vec!["coil", "holding_register"]);
}

#[test]
fn group_lookup_respects_kind_and_range() {
    let device = descriptor();
    assert!(device.group_covering(RegisterKind::Coil, 15).is_some());
    assert!(device.group_covering(RegisterKind::Coil, 16).is_none());
    assert!(device.group_covering(RegisterKind::HoldingRegister, 13).is_some());
    assert!(device.group_covering(RegisterKind::HoldingRegister, 0).is_none());
    assert!(!device.declares_kind(RegisterKind::InputRegister));
}

#[test]
fn encoding_width_matches_register_span() {
    assert_eq!(RegisterEncoding::Uint16.width(), 1);
    assert_eq!(RegisterEncoding::Int32.width(), 2);
    assert_eq!(RegisterEncoding::Float32.width(), 2);
    assert_eq!(RegisterEncoding::Float64.width(), 4);
    assert_eq!("FLOAT32".parse::<RegisterEncoding>(), Ok(RegisterEncoding::Float32));
}

#[test]
fn outcome_carries_correlation_id() {
    let outcome = CommandOutcome::failed("device in backoff")
        .with_correlation_id(Some("cmd-1".to_string()));
    assert_eq!(outcome.status, CommandStatus::Failed);
    assert_eq!(outcome.status.to_string(), "failed");
    assert_eq!(outcome.correlation_id.as_deref(), Some("cmd-1"));
}
