//! 日志追踪（tracing）宏模块
//!
//! 本模块为 crate 提供统一的日志基础设施：对 `tracing` crate 的日志宏做
//! 条件包装，使得：
//!
//! 1. 当 `tracing` feature 启用时，宏展开为实际的 `tracing::*` 调用
//! 2. 当 `tracing` feature 未启用时，宏展开为空操作（零成本抽象）
//!
//! ## 在 crate 中的角色
//!
//! 本模块通过 `#[macro_use]` 在 `lib.rs` 中最先被引入，使整个 crate 的代码
//! 都可以直接使用 `trace!`、`debug!`、`warn!`、`error!`，而无需关心
//! `tracing` feature 是否启用。连接状态机的每个关键转换（pending 计数增减、
//! 流水线缓冲、关闭决策）都经由这些宏记录。

// 即使某些级别当前未被使用，也提供完整的级别封装；此属性抑制"未使用宏"警告。
#![allow(unused_macros)]

/// `trace!` —— 追踪级别日志宏
///
/// 最细粒度的日志级别，用于记录状态机每一步的详细转换信息。
macro_rules! trace {
    ($($arg:tt)*) => {
        {
            #[cfg(feature = "tracing")]
            {
                tracing::trace!($($arg)+);
            }
        }
    }
}

/// `debug!` —— 调试级别日志宏
///
/// 用于记录有助于调试但在正常运行时不需要的信息，
/// 例如 pending 响应计数的变化、流水线队列的长度。
macro_rules! debug {
    ($($arg:tt)*) => {
        {
            #[cfg(feature = "tracing")]
            {
                tracing::debug!($($arg)+);
            }
        }
    }
}

/// `warn!` —— 警告级别日志宏
///
/// 用于记录潜在的问题，例如被丢弃的消息。
macro_rules! warn {
    ($($arg:tt)*) => {
        {
            #[cfg(feature = "tracing")]
            {
                tracing::warn!($($arg)+);
            }
        }
    }
}

/// `error!` —— 错误级别日志宏
///
/// 用于记录严重错误信息，例如入站消息的解码失败。
macro_rules! error {
    ($($arg:tt)*) => {
        {
            #[cfg(feature = "tracing")]
            {
                tracing::error!($($arg)+);
            }
        }
    }
}
