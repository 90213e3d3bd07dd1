use crate::device::RegisterKind;
use std::time::Instant;

/// 传输层返回的原始值。
#[derive(Debug, Clone, PartialEq)]
pub enum RawValues {
    Bits(Vec<bool>),
    Registers(Vec<u16>),
}

impl RawValues {
    pub fn len(&self) -> usize {
        match self {
            RawValues::Bits(bits) => bits.len(),
            RawValues::Registers(registers) => registers.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 一次分组读取的结果。
#[derive(Debug, Clone)]
pub struct RawReading {
    pub values: RawValues,
    /// 采集时刻（单调时钟）
    pub acquired_at: Instant,
    /// 采集时刻（墙钟，毫秒），用于存储
    pub ts_ms: i64,
}

impl RawReading {
    pub fn new(values: RawValues) -> Self {
        Self {
            values,
            acquired_at: Instant::now(),
            ts_ms: now_epoch_ms(),
        }
    }
}

/// 数据点取值。
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DataValue {
    Bool(bool),
    Int(i64),
    Float(f64),
}

impl DataValue {
    pub fn as_f64(&self) -> f64 {
        match self {
            DataValue::Bool(v) => {
                if *v {
                    1.0
                } else {
                    0.0
                }
            }
            DataValue::Int(v) => *v as f64,
            DataValue::Float(v) => *v,
        }
    }
}

impl std::fmt::Display for DataValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataValue::Bool(v) => write!(f, "{}", v),
            DataValue::Int(v) => write!(f, "{}", v),
            DataValue::Float(v) => write!(f, "{}", v),
        }
    }
}

/// 标签集：唯一标识产生数据点的 (设备, 寄存器分组, 地址)。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TagSet {
    pub device_name: String,
    pub slave_id: u8,
    pub register_name: String,
    pub address: u16,
    pub register_type: RegisterKind,
}

/// 规范化后的数据点，产生后不可变。
#[derive(Debug, Clone, PartialEq)]
pub struct DataPoint {
    pub ts_ms: i64,
    pub acquired_at: Instant,
    pub value: DataValue,
    pub tags: TagSet,
}

/// 获取当前时间戳（毫秒）
pub fn now_epoch_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
