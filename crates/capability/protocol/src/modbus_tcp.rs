//! Modbus TCP 传输实现
//!
//! 每个设备会话持有一个 `ModbusTcpConnection`，由会话保证同一时刻只有一个请求在途。

use crate::error::ProtocolError;
use crate::transport::{DeviceConnection, DeviceTransport, RegisterWrite};
use async_trait::async_trait;
use domain::{DeviceDescriptor, RawValues, RegisterKind};
use tokio_modbus::{
    ExceptionCode,
    client::{Context, Reader, Writer},
    prelude::*,
};
use tracing::debug;

/// Modbus TCP 连接工厂（无状态，可在所有设备间共享）
#[derive(Debug, Clone, Default)]
pub struct ModbusTcpTransport;

impl ModbusTcpTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DeviceTransport for ModbusTcpTransport {
    async fn connect(
        &self,
        device: &DeviceDescriptor,
    ) -> Result<Box<dyn DeviceConnection>, ProtocolError> {
        let target = device.transport.to_string();
        let addr = tokio::net::lookup_host(target.as_str())
            .await
            .map_err(|e| ProtocolError::Transport(format!("resolve {}: {}", target, e)))?
            .next()
            .ok_or_else(|| ProtocolError::Transport(format!("no address for {}", target)))?;

        let ctx = tcp::connect_slave(addr, Slave(device.slave_id))
            .await
            .map_err(|e| ProtocolError::Transport(e.to_string()))?;

        debug!(
            target: "ems.session",
            device_name = %device.name,
            addr = %addr,
            "modbus_connected"
        );
        Ok(Box::new(ModbusTcpConnection { ctx }))
    }
}

/// 单个 Modbus TCP 连接
pub struct ModbusTcpConnection {
    ctx: Context,
}

#[async_trait]
impl DeviceConnection for ModbusTcpConnection {
    async fn read(
        &mut self,
        kind: RegisterKind,
        address: u16,
        count: u16,
    ) -> Result<RawValues, ProtocolError> {
        let values = match kind {
            RegisterKind::Coil => {
                let mut bits = flatten(self.ctx.read_coils(address, count).await, exception)?;
                bits.truncate(usize::from(count));
                RawValues::Bits(bits)
            }
            RegisterKind::DiscreteInput => {
                let mut bits = flatten(
                    self.ctx.read_discrete_inputs(address, count).await,
                    exception,
                )?;
                bits.truncate(usize::from(count));
                RawValues::Bits(bits)
            }
            RegisterKind::HoldingRegister => RawValues::Registers(flatten(
                self.ctx.read_holding_registers(address, count).await,
                exception,
            )?),
            RegisterKind::InputRegister => RawValues::Registers(flatten(
                self.ctx.read_input_registers(address, count).await,
                exception,
            )?),
        };
        Ok(values)
    }

    async fn write(&mut self, address: u16, value: RegisterWrite) -> Result<(), ProtocolError> {
        match value {
            RegisterWrite::Coil(bit) => flatten(
                self.ctx.write_single_coil(address, bit).await,
                rejected,
            ),
            RegisterWrite::Register(word) => flatten(
                self.ctx.write_single_register(address, word).await,
                rejected,
            ),
        }
    }
}

fn exception(code: ExceptionCode) -> ProtocolError {
    ProtocolError::Protocol(format!("exception: {:?}", code))
}

fn rejected(code: ExceptionCode) -> ProtocolError {
    ProtocolError::Rejected(format!("exception: {:?}", code))
}

/// 展开 tokio-modbus 的双层结果：外层为传输/帧错误，内层为设备异常码。
fn flatten<T>(
    result: Result<Result<T, ExceptionCode>, tokio_modbus::Error>,
    on_exception: fn(ExceptionCode) -> ProtocolError,
) -> Result<T, ProtocolError> {
    match result {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(code)) => Err(on_exception(code)),
        Err(tokio_modbus::Error::Transport(e)) => Err(ProtocolError::Transport(e.to_string())),
        Err(tokio_modbus::Error::Protocol(e)) => Err(ProtocolError::Protocol(e.to_string())),
    }
}
