//! 会话注册表：按设备名称索引，支持按 slave_id 查找。

use crate::error::ProtocolError;
use crate::session::{DeviceSession, SessionConfig};
use crate::transport::DeviceTransport;
use domain::DeviceDescriptor;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Default)]
pub struct SessionRegistry {
    sessions: Vec<Arc<DeviceSession>>,
    by_name: HashMap<String, usize>,
    by_slave: HashMap<u8, usize>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 为每个设备创建会话，共用同一个传输工厂。
    pub fn spawn_all(
        devices: impl IntoIterator<Item = DeviceDescriptor>,
        transport: Arc<dyn DeviceTransport>,
        config: &SessionConfig,
    ) -> Result<Self, ProtocolError> {
        let mut registry = Self::new();
        for device in devices {
            let session =
                DeviceSession::spawn(Arc::new(device), Arc::clone(&transport), config.clone());
            registry.insert(Arc::new(session))?;
        }
        Ok(registry)
    }

    /// 注册会话；名称或 slave_id 重复时报错。
    pub fn insert(&mut self, session: Arc<DeviceSession>) -> Result<(), ProtocolError> {
        let name = session.device().name.clone();
        let slave_id = session.device().slave_id;
        if self.by_name.contains_key(&name) {
            return Err(ProtocolError::ConfigParse(format!(
                "duplicate device name: {}",
                name
            )));
        }
        if self.by_slave.contains_key(&slave_id) {
            return Err(ProtocolError::ConfigParse(format!(
                "duplicate slave_id: {}",
                slave_id
            )));
        }
        let index = self.sessions.len();
        self.sessions.push(session);
        self.by_name.insert(name, index);
        self.by_slave.insert(slave_id, index);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<DeviceSession>> {
        self.by_name.get(name).map(|index| &self.sessions[*index])
    }

    pub fn by_slave_id(&self, slave_id: u8) -> Option<&Arc<DeviceSession>> {
        self.by_slave.get(&slave_id).map(|index| &self.sessions[*index])
    }

    /// 按注册顺序遍历。
    pub fn iter(&self) -> impl Iterator<Item = &Arc<DeviceSession>> {
        self.sessions.iter()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
