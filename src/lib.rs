// 以下 lint 属性控制编译器的警告行为：
#![deny(missing_docs)] // 所有公共 API 必须有文档注释
#![deny(missing_debug_implementations)] // 所有公共类型必须实现 Debug trait
#![cfg_attr(test, deny(rust_2018_idioms))] // 测试时要求使用 Rust 2018 惯用写法

//! # http1-traffic
//!
//! 服务端 HTTP/1.x 连接的**流量处理**：本 crate 实现每连接消息流水线中
//! 位于 HTTP 解码器与应用请求处理器之间的双工内联阶段，负责执行
//! RFC 7230 的分帧与 keep-alive 语义，在同一条双向连接上协调流水线
//! （pipelined）请求的到达与响应的完成顺序，并决定连接何时必须关闭。
//!
//! ## 职责划分
//!
//! 核心是两件事：
//!
//! 1. **keep-alive 与流水线状态机**——以 `pending_responses` 计数与
//!    keep-alive 标志为轴心，协调入站请求到达与出站响应完成；上一个
//!    响应未完成时到达的请求被缓冲，响应严格按请求顺序上线
//! 2. **读/写/冲刷纪律**——读批次边界上的冲刷合并、背压下的立即冲刷、
//!    解码失败下的分帧安全错误响应
//!
//! 把字节变成消息部件的 HTTP 编解码器、TLS 阶段、代理协议前导读取、
//! 产生响应的应用处理器、空闲超时插桩都是外部协作者，经由
//! [`rt::Channel`] 接缝与本阶段交互。
//!
//! ## 并发模型
//!
//! 每连接单线程协作式：一条连接的全部入站事件、出站写入与排空任务
//! 都运行在同一个执行器上。处理器内部没有任何 await，也从不阻塞；
//! 出站写入返回完成承诺（[`rt::WritePromise`]），排空经
//! [`rt::Channel::schedule_drain`] 调度后串行执行。
//!
//! ## 使用
//!
//! ```
//! use http1_traffic::server::conn::Builder;
//!
//! let mut builder = Builder::new();
//! builder.max_keep_alive_requests(1000);
//! let handler = builder.build();
//! # drop(handler);
//! ```
//!
//! 嵌入方随后在连接的执行器上把流水线事件转交给
//! [`TrafficHandler`] 的对应方法。

// 日志宏最先引入，使整个 crate 都能使用 trace!/debug!/warn!/error!
#[macro_use]
mod trace;

mod error;
mod headers;

pub mod proto;
pub mod rt;
pub mod server;

// 对外导出核心类型
pub use crate::error::{Error, Result};
pub use crate::proto::h1::TrafficHandler;
