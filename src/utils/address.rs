//! 地址规范化
//!
//! 注册前把 `host:port` 中的空 host 或通配地址替换为本机第一个非回环 IPv4 地址，
//! 保证后端里存放的是其他节点可以连接的地址

use crate::error::{RegistryError, Result};
use local_ip_address::{list_afinet_netifas, local_ip};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};

/// 本机地址探测
pub trait IpResolver: Send + Sync {
    /// 返回本机第一个非回环 IPv4 地址
    fn local_ipv4(&self) -> Option<Ipv4Addr>;
}

/// 基于网卡列表的默认实现
#[derive(Debug, Clone, Copy, Default)]
pub struct InterfaceIpResolver;

impl IpResolver for InterfaceIpResolver {
    fn local_ipv4(&self) -> Option<Ipv4Addr> {
        let from_interfaces = list_afinet_netifas().ok().and_then(|ifas| {
            ifas.into_iter().find_map(|(_, ip)| match ip {
                IpAddr::V4(v4) if !v4.is_loopback() && !v4.is_unspecified() => Some(v4),
                _ => None,
            })
        });

        from_interfaces.or_else(|| match local_ip() {
            Ok(IpAddr::V4(v4)) if !v4.is_loopback() => Some(v4),
            _ => None,
        })
    }
}

/// 规范化之后的地址
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NormalizedAddress {
    host: String,
    port: u16,
}

impl NormalizedAddress {
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for NormalizedAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&join_host_port(&self.host, self.port))
    }
}

/// 拼接 host 和端口，IPv6 字面量加方括号
pub fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

/// 拆分 `host:port`，返回去掉方括号的 host 和原始端口字符串
pub fn split_host_port(address: &str) -> Result<(&str, &str)> {
    let (host, port) = address.rsplit_once(':').ok_or_else(|| {
        RegistryError::invalid_descriptor(format!("address `{address}` is missing a port"))
    })?;

    let host = match host.strip_prefix('[') {
        Some(inner) => inner.strip_suffix(']').ok_or_else(|| {
            RegistryError::invalid_descriptor(format!("address `{address}` has an unclosed bracket"))
        })?,
        None if host.contains(':') => {
            return Err(RegistryError::invalid_descriptor(format!(
                "address `{address}` has too many colons"
            )));
        }
        None => host,
    };

    Ok((host, port))
}

fn is_unspecified(host: &str) -> bool {
    host.is_empty()
        || host
            .parse::<IpAddr>()
            .map(|ip| ip.is_unspecified())
            .unwrap_or(false)
}

/// 使用默认网卡探测规范化地址
pub fn normalize(address: &str) -> Result<NormalizedAddress> {
    normalize_with(address, &InterfaceIpResolver)
}

/// 规范化地址
///
/// - 空 host、`0.0.0.0`、`::` 替换为本机非回环 IPv4，找不到时返回 `NoLocalAddress`
/// - 端口为 0 或无法解析时返回 `InvalidPort`
/// - 其他 host 原样保留
pub fn normalize_with(address: &str, resolver: &dyn IpResolver) -> Result<NormalizedAddress> {
    let (host, port) = split_host_port(address.trim())?;

    let port = match port.parse::<u16>() {
        Ok(port) if port != 0 => port,
        _ => return Err(RegistryError::invalid_port(address)),
    };

    let host = if is_unspecified(host) {
        resolver
            .local_ipv4()
            .ok_or(RegistryError::NoLocalAddress)?
            .to_string()
    } else {
        host.to_string()
    };

    Ok(NormalizedAddress { host, port })
}
