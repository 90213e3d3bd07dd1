//! 网关领域模型：设备描述、寄存器分组、数据点与写命令。
//!
//! 本 crate 不依赖任何运行时或序列化库，所有能力模块共享这些类型。

pub mod command;
pub mod data;
pub mod device;

pub use command::{CommandOutcome, CommandStatus, CommandValue, WriteCommand};
pub use data::{DataPoint, DataValue, RawReading, RawValues, TagSet, now_epoch_ms};
pub use device::{
    DeviceDescriptor, RegisterEncoding, RegisterGroup, RegisterKind, TransportAddress, WordOrder,
};
