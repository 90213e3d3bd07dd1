//! 存储记录与查询条件。

use domain::{DataPoint, DataValue, RegisterKind, TagSet};

/// 已落库的数据点。
#[derive(Debug, Clone, PartialEq)]
pub struct PointRecord {
    pub ts_ms: i64,
    pub value: DataValue,
    pub tags: TagSet,
}

impl From<&DataPoint> for PointRecord {
    fn from(point: &DataPoint) -> Self {
        Self {
            ts_ms: point.ts_ms,
            value: point.value,
            tags: point.tags.clone(),
        }
    }
}

/// 历史查询过滤条件（时间为毫秒，闭区间）。
#[derive(Debug, Clone)]
pub struct HistoryFilter {
    pub start_ms: Option<i64>,
    pub end_ms: Option<i64>,
    pub device_name: Option<String>,
    pub slave_id: Option<u8>,
    pub register_type: Option<RegisterKind>,
    pub address: Option<u16>,
    pub limit: u32,
}

impl Default for HistoryFilter {
    fn default() -> Self {
        Self {
            start_ms: None,
            end_ms: None,
            device_name: None,
            slave_id: None,
            register_type: None,
            address: None,
            limit: 1_000,
        }
    }
}

impl HistoryFilter {
    /// 记录是否满足过滤条件。
    pub fn matches(&self, record: &PointRecord) -> bool {
        self.start_ms.is_none_or(|start| record.ts_ms >= start)
            && self.end_ms.is_none_or(|end| record.ts_ms <= end)
            && self
                .device_name
                .as_ref()
                .is_none_or(|name| &record.tags.device_name == name)
            && self.slave_id.is_none_or(|id| record.tags.slave_id == id)
            && self
                .register_type
                .is_none_or(|kind| record.tags.register_type == kind)
            && self.address.is_none_or(|address| record.tags.address == address)
    }
}

/// 值的存储形式：数值 + 类型标记。
pub fn encode_value(value: &DataValue) -> (f64, &'static str) {
    match value {
        DataValue::Bool(v) => (if *v { 1.0 } else { 0.0 }, "bool"),
        DataValue::Int(v) => (*v as f64, "int"),
        DataValue::Float(v) => (*v, "float"),
    }
}

pub fn decode_value(value: f64, kind: &str) -> DataValue {
    match kind {
        "bool" => DataValue::Bool(value != 0.0),
        "int" => DataValue::Int(value as i64),
        _ => DataValue::Float(value),
    }
}
