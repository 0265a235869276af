//! 实例键
//!
//! 实例身份由服务名和规范化后的地址决定，本地注册表和各个后端都以它为索引

use crate::utils::address::NormalizedAddress;
use std::fmt;

/// 实例键：`(service_name, host, port)`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceKey {
    service_name: String,
    address: NormalizedAddress,
}

impl InstanceKey {
    pub fn new(service_name: impl Into<String>, address: NormalizedAddress) -> Self {
        Self {
            service_name: service_name.into(),
            address,
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn address(&self) -> &NormalizedAddress {
        &self.address
    }

    /// 服务内唯一的实例 ID：`host:port`
    pub fn instance_id(&self) -> String {
        self.address.to_string()
    }

    /// 分层存储路径：`/<namespace>/<service>/<host:port>`
    pub fn storage_path(&self, namespace: &str) -> String {
        format!(
            "{}{}",
            service_prefix(namespace, &self.service_name),
            self.address
        )
    }
}

impl fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.service_name, self.address)
    }
}

/// 服务的存储前缀：`/<namespace>/<service>/`
pub fn service_prefix(namespace: &str, service_name: &str) -> String {
    let namespace = namespace.trim_matches('/');
    if namespace.is_empty() {
        format!("/{service_name}/")
    } else {
        format!("/{namespace}/{service_name}/")
    }
}
