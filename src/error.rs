//! 错误与结果类型模块
//!
//! 本模块定义了 crate 的核心错误类型 [`Error`] 及其相关的辅助类型。
//! 流量处理阶段可能发生的所有错误——入站消息的解码失败、HTTP/2.0 前言
//! 误入 HTTP/1 流水线、每请求连接信息构造失败、出站写入失败——都被统一
//! 封装在 `Error` 类型中。
//!
//! ## 设计理念
//!
//! - **不透明错误**：`Error` 使用 `Box<ErrorImpl>` 包装内部实现，既将栈上
//!   大小压缩到一个指针宽度，又隐藏内部结构细节。
//! - **错误链**：通过 `std::error::Error::source()` 暴露底层原因，方便诊断。
//! - **分类判断**：外部代码通过 `is_*` 方法判断错误类别，内部分类枚举
//!   （`Kind`、`Decode`、`User`）保持 crate 私有。

// 引入标准库的 Error trait，重命名为 StdError 以避免与本模块的 Error 冲突
use std::error::Error as StdError;
// 格式化 trait，用于实现 Debug 和 Display
use std::fmt;

/// 本 crate 常用的 Result 类型别名。
pub type Result<T> = std::result::Result<T, Error>;

/// 错误原因的类型别名。
///
/// 使用 `Box<dyn StdError + Send + Sync>` 作为类型擦除的错误原因，
/// `Send + Sync` 约束确保错误可以安全地跨线程传递。
type Cause = Box<dyn StdError + Send + Sync>;

/// 表示处理 HTTP/1 连接流量时可能发生的错误。
///
/// # 格式化
///
/// 此类型的 `Display` 实现只打印当前层级的错误详情。要打印包括 source
/// 链在内的所有信息，请使用 `std::error::Report` 或等效的第三方类型。
/// 错误消息的具体措辞是未指定的，**不要依赖它**。
///
/// # Source
///
/// 底层原因通过 `Error::source()` 以类型擦除的方式暴露。可以检查 source
/// 的确切类型，但**不能依赖它们**：它们可能随时更改。
pub struct Error {
    // Box 堆分配使 Error 的栈大小仅为一个指针宽度，
    // 这对 Result<T, Error> 的大小优化很重要。
    inner: Box<ErrorImpl>,
}

/// 错误的内部实现结构体，包含分类（kind）和可选的原因链（cause）。
struct ErrorImpl {
    kind: Kind,
    cause: Option<Cause>,
}

/// 错误分类枚举（crate 内部使用）。
#[derive(Debug)]
pub(super) enum Kind {
    /// 入站消息携带了失败的解码结果
    Decode(Decode),
    /// 用户提供的组件引起的错误
    User(User),
    /// 写入承诺在完成之前被丢弃
    Canceled,
    /// 出站写入时发生的 I/O 错误
    Io,
}

/// 入站解码错误的子分类。
#[derive(Debug)]
pub(super) enum Decode {
    /// 解码器在消息上报告了失败
    Message,
    /// 收到了声明 HTTP/2.0 的请求
    VersionH2,
}

/// 用户组件错误的子分类。
#[derive(Debug)]
pub(super) enum User {
    /// 配置的 Forwarded 头解析器在构造连接信息时失败
    ConnectionInfo,
}

// ===== impl Error =====

impl Error {
    /// 检查是否为入站解码错误（包括 HTTP/2.0 拒绝）。
    pub fn is_decode(&self) -> bool {
        matches!(self.inner.kind, Kind::Decode(_))
    }

    /// 检查是否为 HTTP/2.0 请求误入 HTTP/1 阶段导致的错误。
    pub fn is_version_h2(&self) -> bool {
        matches!(self.inner.kind, Kind::Decode(Decode::VersionH2))
    }

    /// 检查是否由用户提供的组件引起。
    pub fn is_user(&self) -> bool {
        matches!(self.inner.kind, Kind::User(_))
    }

    /// 检查是否因写入承诺被丢弃而取消。
    pub fn is_canceled(&self) -> bool {
        matches!(self.inner.kind, Kind::Canceled)
    }

    /// 检查是否为出站写入的 I/O 错误。
    pub fn is_io(&self) -> bool {
        matches!(self.inner.kind, Kind::Io)
    }

    pub(super) fn new(kind: Kind) -> Error {
        Error {
            inner: Box::new(ErrorImpl { kind, cause: None }),
        }
    }

    pub(super) fn with<C: Into<Cause>>(mut self, cause: C) -> Error {
        self.inner.cause = Some(cause.into());
        self
    }

    pub(super) fn new_decode<C: Into<Cause>>(cause: C) -> Error {
        Error::new(Kind::Decode(Decode::Message)).with(cause)
    }

    pub(super) fn new_version_h2() -> Error {
        Error::new(Kind::Decode(Decode::VersionH2))
    }

    pub(super) fn new_connection_info<C: Into<Cause>>(cause: C) -> Error {
        Error::new(Kind::User(User::ConnectionInfo)).with(cause)
    }

    pub(super) fn new_canceled() -> Error {
        Error::new(Kind::Canceled)
    }

    pub(super) fn new_io(cause: std::io::Error) -> Error {
        Error::new(Kind::Io).with(cause)
    }

    /// 返回当前分类对应的静态描述文本。
    fn description(&self) -> &str {
        match self.inner.kind {
            Kind::Decode(Decode::Message) => "inbound message decoding failed",
            Kind::Decode(Decode::VersionH2) => {
                "unexpected HTTP/2.0 request in HTTP/1 connection"
            }
            Kind::User(User::ConnectionInfo) => "connection info resolution failed",
            Kind::Canceled => "write promise canceled",
            Kind::Io => "write error",
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut f = f.debug_tuple("http1_traffic::Error");
        f.field(&self.inner.kind);
        if let Some(ref cause) = self.inner.cause {
            f.field(cause);
        }
        f.finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.inner
            .cause
            .as_ref()
            .map(|cause| &**cause as &(dyn StdError + 'static))
    }
}
