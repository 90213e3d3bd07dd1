//! 设备与寄存器分组描述。

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Modbus 寄存器类型。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegisterKind {
    /// 线圈 (0x01 读 / 0x05 写)
    Coil,
    /// 离散输入 (0x02)
    DiscreteInput,
    /// 保持寄存器 (0x03 读 / 0x06 写)
    HoldingRegister,
    /// 输入寄存器 (0x04)
    InputRegister,
}

impl RegisterKind {
    pub const ALL: [RegisterKind; 4] = [
        RegisterKind::Coil,
        RegisterKind::DiscreteInput,
        RegisterKind::HoldingRegister,
        RegisterKind::InputRegister,
    ];

    /// 标签与 topic 中使用的名称。
    pub fn as_str(&self) -> &'static str {
        match self {
            RegisterKind::Coil => "coil",
            RegisterKind::DiscreteInput => "discrete_input",
            RegisterKind::HoldingRegister => "holding_register",
            RegisterKind::InputRegister => "input_register",
        }
    }

    /// 仅线圈与保持寄存器可写。
    pub fn is_writable(&self) -> bool {
        matches!(self, RegisterKind::Coil | RegisterKind::HoldingRegister)
    }

    /// 按位读取的类型（值为布尔）。
    pub fn is_bit(&self) -> bool {
        matches!(self, RegisterKind::Coil | RegisterKind::DiscreteInput)
    }
}

impl fmt::Display for RegisterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RegisterKind {
    type Err = String;

    /// 兼容单复数写法（`holding_register` / `holding_registers`）。
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase().replace('-', "_");
        let normalized = normalized.strip_suffix('s').unwrap_or(&normalized);
        match normalized {
            "coil" => Ok(RegisterKind::Coil),
            "discrete_input" => Ok(RegisterKind::DiscreteInput),
            "holding_register" => Ok(RegisterKind::HoldingRegister),
            "input_register" => Ok(RegisterKind::InputRegister),
            _ => Err(format!("unknown register type: {}", value.trim())),
        }
    }
}

/// 寄存器值编码。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RegisterEncoding {
    #[default]
    Uint16,
    Int16,
    Uint32,
    Int32,
    Float32,
    Float64,
}

impl RegisterEncoding {
    /// 单个值占用的寄存器数量。
    pub fn width(&self) -> u16 {
        match self {
            RegisterEncoding::Uint16 | RegisterEncoding::Int16 => 1,
            RegisterEncoding::Uint32 | RegisterEncoding::Int32 | RegisterEncoding::Float32 => 2,
            RegisterEncoding::Float64 => 4,
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(self, RegisterEncoding::Float32 | RegisterEncoding::Float64)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RegisterEncoding::Uint16 => "uint16",
            RegisterEncoding::Int16 => "int16",
            RegisterEncoding::Uint32 => "uint32",
            RegisterEncoding::Int32 => "int32",
            RegisterEncoding::Float32 => "float32",
            RegisterEncoding::Float64 => "float64",
        }
    }
}

impl FromStr for RegisterEncoding {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "uint16" | "u16" => Ok(RegisterEncoding::Uint16),
            "int16" | "i16" => Ok(RegisterEncoding::Int16),
            "uint32" | "u32" => Ok(RegisterEncoding::Uint32),
            "int32" | "i32" => Ok(RegisterEncoding::Int32),
            "float32" | "f32" => Ok(RegisterEncoding::Float32),
            "float64" | "f64" => Ok(RegisterEncoding::Float64),
            other => Err(format!("unknown register encoding: {}", other)),
        }
    }
}

/// 多寄存器值的字序。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WordOrder {
    /// 高字在前（Modbus 常见约定）
    #[default]
    HighFirst,
    LowFirst,
}

/// 寄存器分组：一次读请求的范围，同时用于标记结果数据点。
#[derive(Debug, Clone, PartialEq)]
pub struct RegisterGroup {
    pub name: String,
    pub kind: RegisterKind,
    pub address: u16,
    pub count: u16,
    pub encoding: RegisterEncoding,
    pub word_order: WordOrder,
    /// 显式配置时才缩放
    pub scale: Option<f64>,
}

impl RegisterGroup {
    pub fn new(name: impl Into<String>, kind: RegisterKind, address: u16, count: u16) -> Self {
        Self {
            name: name.into(),
            kind,
            address,
            count,
            encoding: RegisterEncoding::default(),
            word_order: WordOrder::default(),
            scale: None,
        }
    }

    pub fn with_encoding(mut self, encoding: RegisterEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn with_scale(mut self, scale: f64) -> Self {
        self.scale = Some(scale);
        self
    }

    /// 分组覆盖的地址区间是否包含 `address`。
    pub fn contains(&self, address: u16) -> bool {
        let end = u32::from(self.address) + u32::from(self.count);
        address >= self.address && u32::from(address) < end
    }
}

/// 设备传输地址（Modbus TCP）。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportAddress {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for TransportAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// 设备描述：加载后不可变，每个配置设备一份。
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceDescriptor {
    pub name: String,
    pub slave_id: u8,
    pub transport: TransportAddress,
    pub groups: Vec<RegisterGroup>,
    pub polling_interval: Duration,
}

impl DeviceDescriptor {
    /// 该设备是否声明了 `kind` 类型的寄存器空间。
    pub fn declares_kind(&self, kind: RegisterKind) -> bool {
        self.groups.iter().any(|group| group.kind == kind)
    }

    /// 查找覆盖 `(kind, address)` 的分组。
    pub fn group_covering(&self, kind: RegisterKind, address: u16) -> Option<&RegisterGroup> {
        self.groups
            .iter()
            .find(|group| group.kind == kind && group.contains(address))
    }
}
