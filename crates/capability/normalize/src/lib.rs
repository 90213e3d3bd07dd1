//! 原始读数 → 带标签数据点。
//!
//! - 线圈 / 离散输入：每个位一个布尔数据点，地址为 `base + i`
//! - 保持 / 输入寄存器：按分组编码解码，每个值占 `encoding.width()` 个寄存器，
//!   地址取首个寄存器
//! - 只有显式配置 `scale` 时才缩放（结果为浮点）

use domain::{
    DataPoint, DataValue, DeviceDescriptor, RawReading, RawValues, RegisterEncoding,
    RegisterGroup, TagSet, WordOrder,
};
use tracing::warn;

/// 规范化错误。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NormalizeError {
    #[error("malformed reading: expected {expected} values, got {actual}")]
    MalformedReading { expected: usize, actual: usize },
    #[error("malformed reading: {kind} group returned {returned}")]
    KindMismatch {
        kind: &'static str,
        returned: &'static str,
    },
}

/// 纯函数：把一次分组读数转换为数据点。
pub fn normalize(
    device: &DeviceDescriptor,
    group: &RegisterGroup,
    reading: &RawReading,
) -> Result<Vec<DataPoint>, NormalizeError> {
    let expected = usize::from(group.count);
    let actual = reading.values.len();
    if actual != expected {
        return Err(NormalizeError::MalformedReading { expected, actual });
    }

    let values: Vec<(u16, DataValue)> = match (&reading.values, group.kind.is_bit()) {
        (RawValues::Bits(bits), true) => bits
            .iter()
            .enumerate()
            .map(|(offset, bit)| (offset as u16, DataValue::Bool(*bit)))
            .collect(),
        (RawValues::Registers(registers), false) => decode_registers(group, registers),
        (RawValues::Registers(_), true) => {
            return Err(NormalizeError::KindMismatch {
                kind: group.kind.as_str(),
                returned: "registers",
            });
        }
        (RawValues::Bits(_), false) => {
            return Err(NormalizeError::KindMismatch {
                kind: group.kind.as_str(),
                returned: "bits",
            });
        }
    };

    Ok(values
        .into_iter()
        .map(|(offset, value)| DataPoint {
            ts_ms: reading.ts_ms,
            acquired_at: reading.acquired_at,
            value,
            tags: TagSet {
                device_name: device.name.clone(),
                slave_id: device.slave_id,
                register_name: group.name.clone(),
                address: group.address.saturating_add(offset),
                register_type: group.kind,
            },
        })
        .collect())
}

/// 规范化并丢弃畸形读数（记录日志与计数）。
pub fn normalize_or_drop(
    device: &DeviceDescriptor,
    group: &RegisterGroup,
    reading: &RawReading,
) -> Vec<DataPoint> {
    match normalize(device, group, reading) {
        Ok(points) => {
            ems_telemetry::record_points_normalized(points.len() as u64);
            points
        }
        Err(err) => {
            ems_telemetry::record_malformed_reading();
            warn!(
                target: "ems.normalize",
                device_name = %device.name,
                slave_id = device.slave_id,
                register_name = %group.name,
                error = %err,
                "malformed_reading"
            );
            Vec::new()
        }
    }
}

/// 按编码解码寄存器，返回 (相对首地址偏移, 值)。
fn decode_registers(group: &RegisterGroup, registers: &[u16]) -> Vec<(u16, DataValue)> {
    let width = usize::from(group.encoding.width());
    let mut values = Vec::with_capacity(registers.len() / width);
    for (index, chunk) in registers.chunks_exact(width).enumerate() {
        let offset = (index * width) as u16;
        let mut words = [0u16; 4];
        words[..width].copy_from_slice(chunk);
        if group.word_order == WordOrder::LowFirst {
            words[..width].reverse();
        }
        let raw = decode_words(group.encoding, &words[..width]);
        let value = match (raw, group.scale) {
            (value, None) => value,
            (value, Some(scale)) => DataValue::Float(value.as_f64() * scale),
        };
        if let DataValue::Float(v) = value
            && !v.is_finite()
        {
            ems_telemetry::record_non_finite_value();
            warn!(
                target: "ems.normalize",
                register_name = %group.name,
                address = group.address.saturating_add(offset),
                "non_finite_value_skipped"
            );
            continue;
        }
        values.push((offset, value));
    }
    values
}

/// 高字在前的寄存器序列解码。
fn decode_words(encoding: RegisterEncoding, words: &[u16]) -> DataValue {
    let combined = words
        .iter()
        .fold(0u64, |acc, word| (acc << 16) | u64::from(*word));
    match encoding {
        RegisterEncoding::Uint16 => DataValue::Int(i64::from(words[0])),
        RegisterEncoding::Int16 => DataValue::Int(i64::from(words[0] as i16)),
        RegisterEncoding::Uint32 => DataValue::Int(combined as u32 as i64),
        RegisterEncoding::Int32 => DataValue::Int(i64::from(combined as u32 as i32)),
        RegisterEncoding::Float32 => DataValue::Float(f64::from(f32::from_bits(combined as u32))),
        RegisterEncoding::Float64 => DataValue::Float(f64::from_bits(combined)),
    }
}
