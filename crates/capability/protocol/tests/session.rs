use domain::{DeviceDescriptor, RegisterGroup, RegisterKind, TransportAddress};
use ems_protocol::{
    BackoffPolicy, ConnectionStatus, DeviceSession, ProtocolError, RegisterWrite, ScriptStep,
    ScriptedTransport, SessionConfig, TransportOp,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, advance, sleep};

fn device(name: &str, slave_id: u8) -> Arc<DeviceDescriptor> {
    Arc::new(DeviceDescriptor {
        name: name.to_string(),
        slave_id,
        transport: TransportAddress {
            host: "127.0.0.1".to_string(),
            port: 5020,
        },
        groups: vec![
            RegisterGroup::new("a", RegisterKind::HoldingRegister, 0, 2),
            RegisterGroup::new("b", RegisterKind::HoldingRegister, 10, 2),
            RegisterGroup::new("c", RegisterKind::HoldingRegister, 20, 2),
        ],
        polling_interval: Duration::from_secs(5),
    })
}

fn config() -> SessionConfig {
    SessionConfig {
        op_timeout: Duration::from_secs(1),
        connect_timeout: Duration::from_secs(1),
        backoff: BackoffPolicy {
            base: Duration::from_millis(500),
            max: Duration::from_secs(30),
            max_exponent: 6,
            jitter_percent: 0,
        },
        poll_queue_capacity: 8,
        command_queue_capacity: 4,
    }
}

fn spawn(transport: &ScriptedTransport, config: SessionConfig) -> DeviceSession {
    DeviceSession::spawn(device("SimDevice1", 1), Arc::new(transport.clone()), config)
}

#[tokio::test(start_paused = true)]
async fn connects_lazily_on_first_operation() {
    let transport = ScriptedTransport::new();
    transport.set_register(RegisterKind::HoldingRegister, 0, 7);
    let session = spawn(&transport, config());

    sleep(Duration::from_millis(10)).await;
    assert_eq!(transport.connects(), 0);
    assert_eq!(session.state().status, ConnectionStatus::Disconnected);

    let group = session.device().groups[0].clone();
    let reading = session.read(&group).await.expect("read");
    assert_eq!(reading.values.len(), 2);
    assert_eq!(transport.connects(), 1);

    let state = session.state();
    assert_eq!(state.status, ConnectionStatus::Connected);
    assert!(state.last_success_ms.is_some());
}

#[tokio::test(start_paused = true)]
async fn operations_never_overlap() {
    let transport = ScriptedTransport::new();
    transport.set_default_delay(Duration::from_millis(50));
    let session = spawn(&transport, config());
    let groups = session.device().groups.clone();

    let pending: Vec<_> = groups
        .iter()
        .chain(groups.iter())
        .map(|group| session.enqueue_read(group).expect("enqueue"))
        .collect();
    let writes = async {
        for address in 0..3u16 {
            session
                .write(address, RegisterWrite::Coil(true))
                .await
                .expect("write");
        }
    };
    let reads = async {
        for read in pending {
            read.wait().await.expect("read");
        }
    };
    tokio::join!(writes, reads);

    assert_eq!(transport.completed().len(), 9);
    assert_eq!(transport.max_in_flight(), 1);
}

#[tokio::test(start_paused = true)]
async fn queued_command_runs_before_later_polls() {
    let transport = ScriptedTransport::new();
    transport.set_default_delay(Duration::from_millis(100));
    let session = spawn(&transport, config());
    let groups = session.device().groups.clone();

    let first = session.enqueue_read(&groups[0]).expect("enqueue");
    sleep(Duration::from_millis(10)).await;
    let second = session.enqueue_read(&groups[1]).expect("enqueue");
    let third = session.enqueue_read(&groups[2]).expect("enqueue");

    let (write, r1, r2, r3) = tokio::join!(
        session.write(10, RegisterWrite::Coil(true)),
        first.wait(),
        second.wait(),
        third.wait()
    );
    write.expect("write");
    r1.expect("r1");
    r2.expect("r2");
    r3.expect("r3");

    let order: Vec<_> = transport
        .completed()
        .iter()
        .map(|event| (event.op, event.address))
        .collect();
    assert_eq!(
        order,
        vec![
            (TransportOp::Read, 0),
            (TransportOp::Write, 10),
            (TransportOp::Read, 10),
            (TransportOp::Read, 20),
        ]
    );
    assert_eq!(transport.register(RegisterKind::Coil, 10), Some(1));
}

#[tokio::test(start_paused = true)]
async fn transport_failures_back_off_then_recover() {
    let transport = ScriptedTransport::new();
    transport.push_steps([
        ScriptStep::TransportError,
        ScriptStep::TransportError,
        ScriptStep::TransportError,
    ]);
    let session = spawn(&transport, config());
    let group = session.device().groups[0].clone();

    let mut previous = Duration::ZERO;
    for (attempt, expected_ms) in [(1u32, 500u64), (2, 1_000), (3, 2_000)] {
        let err = session.read(&group).await.expect_err("transport error");
        assert!(matches!(err, ProtocolError::Transport(_)));

        let state = session.state();
        assert_eq!(state.status, ConnectionStatus::Backoff);
        assert_eq!(state.consecutive_failures, attempt);
        let remaining = state.backoff_remaining().expect("in backoff");
        assert!(remaining <= Duration::from_millis(expected_ms));
        assert!(remaining > Duration::from_millis(expected_ms - 100));
        assert!(remaining > previous);
        previous = remaining;

        // 退避期间的操作立即失败，不触达设备
        let connects = transport.connects();
        let err = session.read(&group).await.expect_err("backoff");
        assert!(matches!(err, ProtocolError::Backoff { .. }));
        assert_eq!(transport.connects(), connects);

        advance(Duration::from_millis(expected_ms + 10)).await;
    }

    session.read(&group).await.expect("fourth read succeeds");
    let state = session.state();
    assert_eq!(state.consecutive_failures, 0);
    assert_eq!(state.status, ConnectionStatus::Connected);
    assert!(state.backoff_remaining().is_none());
    assert_eq!(transport.connects(), 4);
}

#[tokio::test(start_paused = true)]
async fn timeout_abandons_link_and_backs_off() {
    let transport = ScriptedTransport::new();
    transport.push_steps([ScriptStep::Delay(Duration::from_secs(10))]);
    let session = spawn(&transport, config());
    let group = session.device().groups[0].clone();

    let started = Instant::now();
    let err = session.read(&group).await.expect_err("timeout");
    assert_eq!(err, ProtocolError::Timeout(Duration::from_secs(1)));
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(session.state().status, ConnectionStatus::Backoff);
    assert!(transport.completed().is_empty());

    advance(Duration::from_millis(600)).await;
    session.read(&group).await.expect("read after backoff");
    assert_eq!(transport.connects(), 2);
}

#[tokio::test(start_paused = true)]
async fn protocol_error_keeps_connection() {
    let transport = ScriptedTransport::new();
    transport.push_steps([ScriptStep::ProtocolError]);
    let session = spawn(&transport, config());
    let group = session.device().groups[0].clone();

    let err = session.read(&group).await.expect_err("protocol error");
    assert!(matches!(err, ProtocolError::Protocol(_)));
    let state = session.state();
    assert_eq!(state.status, ConnectionStatus::Connected);
    assert_eq!(state.consecutive_failures, 0);
    assert!(state.last_error.is_some());

    session.read(&group).await.expect("read");
    assert_eq!(transport.connects(), 1);
}

#[tokio::test(start_paused = true)]
async fn refused_connection_enters_backoff() {
    let transport = ScriptedTransport::new();
    transport.fail_connects(1);
    let session = spawn(&transport, config());
    let group = session.device().groups[0].clone();

    let err = session.read(&group).await.expect_err("refused");
    assert!(matches!(err, ProtocolError::Transport(_)));
    assert_eq!(session.state().consecutive_failures, 1);

    advance(Duration::from_millis(600)).await;
    session.read(&group).await.expect("reconnected");
}

#[tokio::test(start_paused = true)]
async fn write_exception_is_rejected_without_backoff() {
    let transport = ScriptedTransport::new();
    transport.push_steps([ScriptStep::Exception]);
    let session = spawn(&transport, config());

    let err = session
        .write(3, RegisterWrite::Register(99))
        .await
        .expect_err("exception");
    assert!(matches!(err, ProtocolError::Rejected(_)));
    assert!(session.backoff_remaining().is_none());
    assert_eq!(transport.register(RegisterKind::HoldingRegister, 3), None);
}

#[tokio::test(start_paused = true)]
async fn full_poll_queue_rejects_enqueue() {
    let transport = ScriptedTransport::new();
    let mut config = config();
    config.poll_queue_capacity = 2;
    let session = spawn(&transport, config);
    let group = session.device().groups[0].clone();

    let _a = session.enqueue_read(&group).expect("first");
    let _b = session.enqueue_read(&group).expect("second");
    assert!(matches!(
        session.enqueue_read(&group),
        Err(ProtocolError::QueueFull)
    ));
}

#[tokio::test(start_paused = true)]
async fn stalled_device_does_not_delay_another() {
    let slow = ScriptedTransport::new();
    slow.set_default_delay(Duration::from_secs(30));
    let fast = ScriptedTransport::new();

    let mut config = config();
    config.op_timeout = Duration::from_secs(60);
    let slow_session = DeviceSession::spawn(
        device("Slow", 1),
        Arc::new(slow.clone()),
        config.clone(),
    );
    let fast_session = DeviceSession::spawn(device("Fast", 2), Arc::new(fast.clone()), config);

    let group = slow_session.device().groups[0].clone();
    let stalled = slow_session.enqueue_read(&group).expect("enqueue");
    sleep(Duration::from_millis(5)).await;

    let started = Instant::now();
    for _ in 0..5 {
        fast_session.read(&group).await.expect("fast read");
    }
    assert!(started.elapsed() < Duration::from_millis(100));

    stalled.wait().await.expect("slow read eventually completes");
}
