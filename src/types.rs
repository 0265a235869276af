use crate::error::{RegistryError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 默认实例权重，注册时权重为 0 或解析到非正权重时使用
pub const DEFAULT_WEIGHT: u32 = 10;

/// 默认网络协议
pub const DEFAULT_NETWORK: &str = "tcp";

/// 服务描述符：调用方提供的注册信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    pub service_name: String,
    /// `host:port`，host 可以为空或通配地址，注册时会替换为本机地址
    pub address: String,
    #[serde(default)]
    pub weight: u32,
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

impl ServiceDescriptor {
    pub fn new(service_name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            address: address.into(),
            weight: DEFAULT_WEIGHT,
            tags: HashMap::new(),
        }
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn with_tags(mut self, tags: HashMap<String, String>) -> Self {
        self.tags = tags;
        self
    }

    /// 权重为 0 时使用默认权重
    pub fn effective_weight(&self) -> u32 {
        if self.weight == 0 {
            DEFAULT_WEIGHT
        } else {
            self.weight
        }
    }

    /// 校验描述符（不涉及 I/O）
    pub fn validate(&self) -> Result<()> {
        if self.service_name.trim().is_empty() {
            return Err(RegistryError::invalid_descriptor("missing service name"));
        }
        // 服务名是存储路径的一段，带 `/` 会落进其他服务的前缀
        if self.service_name.contains('/') {
            return Err(RegistryError::invalid_descriptor(format!(
                "service name `{}` must not contain `/`",
                self.service_name
            )));
        }
        if self.address.trim().is_empty() {
            return Err(RegistryError::invalid_descriptor("missing address"));
        }
        Ok(())
    }
}

/// 解析目标：服务名和可选的标签过滤
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetInfo {
    pub service_name: String,
    pub tags: HashMap<String, String>,
}

impl TargetInfo {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            tags: HashMap::new(),
        }
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }
}

impl From<&ServiceDescriptor> for TargetInfo {
    fn from(descriptor: &ServiceDescriptor) -> Self {
        Self {
            service_name: descriptor.service_name.clone(),
            tags: descriptor.tags.clone(),
        }
    }
}

/// 解析得到的实例快照（只读）
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedInstance {
    protocol: String,
    address: String,
    weight: u32,
    tags: HashMap<String, String>,
}

impl ResolvedInstance {
    pub(crate) fn new(
        protocol: String,
        address: String,
        weight: u32,
        tags: HashMap<String, String>,
    ) -> Self {
        Self {
            protocol,
            address,
            weight,
            tags,
        }
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn weight(&self) -> u32 {
        self.weight
    }

    pub fn tags(&self) -> &HashMap<String, String> {
        &self.tags
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }
}

/// 一次解析的结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolveResult {
    /// 缓存键，等于解析时使用的目标描述
    pub cache_key: String,
    pub instances: Vec<ResolvedInstance>,
}

impl ResolveResult {
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }
}
