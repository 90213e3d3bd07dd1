//! 传输层接口：会话通过它连接设备并执行单次读写。

use crate::error::ProtocolError;
use async_trait::async_trait;
use domain::{DeviceDescriptor, RawValues, RegisterKind};

/// 单次写入的值（已通过校验）。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterWrite {
    Coil(bool),
    Register(u16),
}

impl RegisterWrite {
    pub fn kind(&self) -> RegisterKind {
        match self {
            RegisterWrite::Coil(_) => RegisterKind::Coil,
            RegisterWrite::Register(_) => RegisterKind::HoldingRegister,
        }
    }
}

/// 设备连接工厂。
#[async_trait]
pub trait DeviceTransport: Send + Sync {
    async fn connect(
        &self,
        device: &DeviceDescriptor,
    ) -> Result<Box<dyn DeviceConnection>, ProtocolError>;
}

/// 已建立的设备连接；同一时刻只由一个会话 worker 持有。
#[async_trait]
pub trait DeviceConnection: Send {
    async fn read(
        &mut self,
        kind: RegisterKind,
        address: u16,
        count: u16,
    ) -> Result<RawValues, ProtocolError>;

    async fn write(&mut self, address: u16, value: RegisterWrite) -> Result<(), ProtocolError>;
}
