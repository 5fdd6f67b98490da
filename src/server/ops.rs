//! 每请求操作对象与连接信息模块。
//!
//! 每当调度器接受一个请求，就构造一个 [`Operations`]：它携带解析完成的
//! [`ConnectionInfo`]（scheme、经可选 Forwarded 解析器改写的客户端地址、
//! 服务端地址）、捕获的请求到达时刻、连接级已服务请求计数器，以及不可变
//! 的每连接配置句柄（压缩策略、cookie 编解码器、表单解码器工厂、超时、
//! 头部校验开关、完成信号包装器）。绑定时计数器自增，随后连接级观察者
//! 收到 `Configured` 通知。
//!
//! 模块同时定义各外部协作者的接缝（trait / 类型别名）：cookie 编解码、
//! 压缩判定、表单解码工厂、连接观察者。这些协作者只在此声明接口，
//! 实现由嵌入方提供。

// 标准库导入
use std::error::Error as StdError;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

// http crate 的 scheme 与头部值类型
use http::uri::Scheme;
use http::HeaderValue;

use crate::proto::{RequestHead, ResponseHead};
use crate::rt::WriteComplete;
use crate::server::conn::Config;

/// 可选的 `Forwarded` / `X-Forwarded-*` 头部解析器。
///
/// 以基础连接信息和请求头为输入，返回改写后的连接信息；
/// 返回错误视为每请求构造失败，请求将以解码失败的方式被拒绝。
pub type ForwardedHeaderHandler = Arc<
    dyn Fn(ConnectionInfo, &RequestHead) -> Result<ConnectionInfo, Box<dyn StdError + Send + Sync>>
        + Send
        + Sync,
>;

/// 压缩判定谓词：按请求与响应头决定是否压缩该响应。
pub type CompressPredicate = Arc<dyn Fn(&RequestHead, &ResponseHead) -> bool + Send + Sync>;

/// 每请求完成信号的可选包装器。
pub type MapHandle = Arc<dyn Fn(WriteComplete) -> WriteComplete + Send + Sync>;

/// 响应压缩的策略选项，透传给每请求操作对象。
#[derive(Clone, Debug, Default)]
pub struct CompressionOptions {
    /// 压缩级别（`None` 使用实现默认值）
    pub level: Option<u32>,
    /// 启用压缩的最小响应体字节数
    pub min_response_size: Option<u64>,
}

/// Cookie 编码器接缝。
pub trait CookieEncoder: Send + Sync {
    /// 把一对名值编码为 `Set-Cookie` 头部值；无法编码时返回 `None`。
    fn encode(&self, name: &str, value: &str) -> Option<HeaderValue>;
}

/// Cookie 解码器接缝。
pub trait CookieDecoder: Send + Sync {
    /// 把一个 `Cookie` 头部值解码为名值对序列。
    fn decode(&self, value: &HeaderValue) -> Vec<(String, String)>;
}

/// 表单解码器工厂接缝，透传给每请求操作对象。
pub trait FormDecoderProvider: Send + Sync {
    /// 表单数据在内存中缓存的上限字节数，超出后转存磁盘。
    fn max_in_memory_size(&self) -> u64 {
        16 * 1024
    }

    /// 是否以流式方式暴露表单字段。
    fn streaming(&self) -> bool {
        false
    }
}

/// 连接级状态观察者。
///
/// 调度器在每个被接受请求的操作对象绑定后通知观察者。
pub trait ConnectionObserver: Send + Sync {
    /// 连接上发生了一次状态转换。
    fn on_state_change(&self, ops: &Operations, state: ObservedState);
}

/// 观察者可见的连接状态。
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObservedState {
    /// 每请求操作对象已绑定，请求即将交付应用处理器
    Configured,
}

/// 默认的空观察者。
pub(crate) struct NoopObserver;

impl ConnectionObserver for NoopObserver {
    fn on_state_change(&self, _ops: &Operations, _state: ObservedState) {}
}

/// 一条连接的解析结果：scheme 与两端地址。
///
/// 基础信息来自套接字与 TLS 阶段；配置了 Forwarded 解析器时，
/// 客户端地址与 scheme 可能被请求头改写。
#[derive(Clone, Debug)]
pub struct ConnectionInfo {
    scheme: Scheme,
    host_addr: SocketAddr,
    remote_addr: SocketAddr,
}

impl ConnectionInfo {
    /// 请求的 scheme（`http` / `https`，或解析器改写后的值）。
    pub fn scheme(&self) -> &Scheme {
        &self.scheme
    }

    /// 服务端地址。
    pub fn host_addr(&self) -> SocketAddr {
        self.host_addr
    }

    /// 客户端地址（代理协议或 Forwarded 解析器改写后的值优先）。
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// 替换 scheme，供 Forwarded 解析器改写使用。
    pub fn with_scheme(mut self, scheme: Scheme) -> ConnectionInfo {
        self.scheme = scheme;
        self
    }

    /// 替换服务端地址，供 Forwarded 解析器改写使用。
    pub fn with_host_addr(mut self, addr: SocketAddr) -> ConnectionInfo {
        self.host_addr = addr;
        self
    }

    /// 替换客户端地址，供 Forwarded 解析器改写使用。
    pub fn with_remote_addr(mut self, addr: SocketAddr) -> ConnectionInfo {
        self.remote_addr = addr;
        self
    }

    /// 从连接事实与请求头解析连接信息。
    ///
    /// 先由 TLS 在场与否确定 scheme，再交给可选的 Forwarded 解析器改写。
    /// 解析器失败时返回已解析好的基础信息与错误，供诊断使用。
    pub(crate) fn resolve(
        head: &RequestHead,
        secure: bool,
        local_addr: SocketAddr,
        remote_addr: SocketAddr,
        forwarded: Option<&ForwardedHeaderHandler>,
    ) -> Result<ConnectionInfo, (ConnectionInfo, crate::Error)> {
        let info = ConnectionInfo {
            scheme: if secure { Scheme::HTTPS } else { Scheme::HTTP },
            host_addr: local_addr,
            remote_addr,
        };
        match forwarded {
            Some(handler) => match handler(info.clone(), head) {
                Ok(rewritten) => Ok(rewritten),
                Err(cause) => Err((info, crate::Error::new_connection_info(cause))),
            },
            None => Ok(info),
        }
    }
}

/// 每请求操作对象。
///
/// 请求被接受时由调度器构造并绑定到连接，应用处理器通过它访问
/// 解析完成的连接信息、请求到达时刻与每连接配置。
pub struct Operations {
    connection_info: ConnectionInfo,
    timestamp: Instant,
    secure: bool,
    config: Arc<Config>,
    requests: Arc<AtomicU64>,
}

impl Operations {
    pub(crate) fn new(
        connection_info: ConnectionInfo,
        timestamp: Instant,
        secure: bool,
        config: Arc<Config>,
        requests: Arc<AtomicU64>,
    ) -> Operations {
        Operations {
            connection_info,
            timestamp,
            secure,
            config,
            requests,
        }
    }

    /// 绑定本操作对象：连接级已服务请求计数自增。
    pub(crate) fn bind(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        trace!(
            "request operations bound, requests served on connection: {}",
            self.requests.load(Ordering::Relaxed)
        );
    }

    /// 解析完成的连接信息。
    pub fn connection_info(&self) -> &ConnectionInfo {
        &self.connection_info
    }

    /// 请求头到达的时刻。
    ///
    /// 对被流水线缓冲过的请求，这是入队时捕获的原始到达时刻。
    pub fn timestamp(&self) -> Instant {
        self.timestamp
    }

    /// 连接是否经由 TLS。
    pub fn is_secure(&self) -> bool {
        self.secure
    }

    /// 本连接至今已服务（接受）的请求数。
    pub fn requests_served(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    /// 每请求读超时。
    pub fn read_timeout(&self) -> Option<Duration> {
        self.config.read_timeout
    }

    /// 每请求总超时。
    pub fn request_timeout(&self) -> Option<Duration> {
        self.config.request_timeout
    }

    /// 是否启用头部校验。
    pub fn validate_headers(&self) -> bool {
        self.config.validate_headers
    }

    /// 压缩判定谓词。
    pub fn compress(&self) -> Option<&CompressPredicate> {
        self.config.compress.as_ref()
    }

    /// 压缩策略选项。
    pub fn compression_options(&self) -> Option<&CompressionOptions> {
        self.config.compression_options.as_ref()
    }

    /// Cookie 编码器。
    pub fn cookie_encoder(&self) -> Option<&Arc<dyn CookieEncoder>> {
        self.config.cookie_encoder.as_ref()
    }

    /// Cookie 解码器。
    pub fn cookie_decoder(&self) -> Option<&Arc<dyn CookieDecoder>> {
        self.config.cookie_decoder.as_ref()
    }

    /// 表单解码器工厂。
    pub fn form_decoder_provider(&self) -> Option<&Arc<dyn FormDecoderProvider>> {
        self.config.form_decoder_provider.as_ref()
    }

    /// 每请求完成信号的包装器。
    pub fn map_handle(&self) -> Option<&MapHandle> {
        self.config.map_handle.as_ref()
    }
}

impl fmt::Debug for Operations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operations")
            .field("connection_info", &self.connection_info)
            .field("timestamp", &self.timestamp)
            .field("secure", &self.secure)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn head() -> RequestHead {
        RequestHead::new(Method::GET, "/".parse().unwrap())
    }

    #[test]
    fn resolve_scheme_follows_tls() {
        let info = ConnectionInfo::resolve(&head(), false, addr(80), addr(40000), None).unwrap();
        assert_eq!(info.scheme(), &Scheme::HTTP);
        assert_eq!(info.host_addr(), addr(80));
        assert_eq!(info.remote_addr(), addr(40000));

        let info = ConnectionInfo::resolve(&head(), true, addr(443), addr(40000), None).unwrap();
        assert_eq!(info.scheme(), &Scheme::HTTPS);
    }

    #[test]
    fn resolve_applies_forwarded_handler() {
        let handler: ForwardedHeaderHandler =
            Arc::new(|info, _head| Ok(info.with_remote_addr(addr(1234))));
        let info =
            ConnectionInfo::resolve(&head(), false, addr(80), addr(40000), Some(&handler)).unwrap();
        assert_eq!(info.remote_addr(), addr(1234));
    }

    #[test]
    fn resolve_failure_keeps_base_info() {
        let handler: ForwardedHeaderHandler = Arc::new(|_info, _head| {
            Err(Box::from(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "bad forwarded header",
            )))
        });
        let (info, err) =
            ConnectionInfo::resolve(&head(), true, addr(443), addr(40000), Some(&handler))
                .unwrap_err();
        assert_eq!(info.scheme(), &Scheme::HTTPS);
        assert_eq!(info.remote_addr(), addr(40000));
        assert!(err.is_user());
    }
}
