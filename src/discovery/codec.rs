//! 实例记录编解码
//!
//! 后端中存放的实例记录是 JSON：`{"network","address","weight","tags"}`，
//! 不认识的字段忽略，缺失的 `tags` 视为空

use crate::error::CodecError;
use crate::types::{DEFAULT_NETWORK, DEFAULT_WEIGHT, ResolvedInstance, ServiceDescriptor};
use crate::utils::address::NormalizedAddress;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 后端中存放的实例记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceRecord {
    #[serde(default = "default_network")]
    pub network: String,
    pub address: String,
    /// 其他语言的客户端可能写入负数或 0，解码时统一按默认权重处理
    #[serde(default)]
    pub weight: i64,
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

fn default_network() -> String {
    DEFAULT_NETWORK.to_string()
}

impl InstanceRecord {
    /// 由描述符和规范化后的地址构建，权重 0 替换为默认权重
    pub fn from_descriptor(descriptor: &ServiceDescriptor, address: &NormalizedAddress) -> Self {
        Self {
            network: DEFAULT_NETWORK.to_string(),
            address: address.to_string(),
            weight: i64::from(descriptor.effective_weight()),
            tags: descriptor.tags.clone(),
        }
    }

    /// 有效权重：非正数替换为默认权重
    pub fn effective_weight(&self) -> u32 {
        if self.weight <= 0 {
            DEFAULT_WEIGHT
        } else {
            u32::try_from(self.weight).unwrap_or(u32::MAX)
        }
    }

    /// 标签是否包含过滤条件的全部键值
    pub fn matches_tags(&self, filter: &HashMap<String, String>) -> bool {
        filter
            .iter()
            .all(|(k, v)| self.tags.get(k).is_some_and(|tag| tag == v))
    }

    pub fn into_resolved(self) -> ResolvedInstance {
        let weight = self.effective_weight();
        let network = if self.network.is_empty() {
            DEFAULT_NETWORK.to_string()
        } else {
            self.network
        };
        ResolvedInstance::new(network, self.address, weight, self.tags)
    }
}

pub fn encode(record: &InstanceRecord) -> Result<Vec<u8>, CodecError> {
    serde_json::to_vec(record).map_err(CodecError::Encode)
}

pub fn decode(bytes: &[u8]) -> Result<InstanceRecord, CodecError> {
    let record: InstanceRecord = serde_json::from_slice(bytes).map_err(CodecError::Decode)?;
    if record.address.trim().is_empty() {
        return Err(CodecError::Invalid("empty address".to_string()));
    }
    Ok(record)
}
