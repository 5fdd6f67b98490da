//! HTTP/1 流量处理的核心模块。
//!
//! 子模块分工：
//! - `traffic`: 流量处理器本体——keep-alive 状态机、入站调度器、
//!   出站整形器与冲刷协调器
//! - `pipeline`: 流水线队列，缓存在途请求之后到达的入站消息

pub(crate) mod pipeline;
pub(crate) mod traffic;

pub use self::traffic::TrafficHandler;
