//! 工具函数模块

pub mod address;

pub use address::{
    InterfaceIpResolver, IpResolver, NormalizedAddress, join_host_port, normalize, normalize_with,
    split_host_port,
};
