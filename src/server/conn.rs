//! 每连接配置与构建器模块。
//!
//! [`Builder`] 收集一条 HTTP/1 连接的全部流量处理选项，`build()` 产出
//! 绑定了不可变配置的 [`TrafficHandler`]。处理器是单连接的：连接建立时
//! 构造一个实例，连接关闭时丢弃。
//!
//! **注意**：选项的默认值*不被视为稳定的*，可能随时更改。

// 标准库导入
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::proto::h1::TrafficHandler;
use crate::server::ops::{
    CompressPredicate, CompressionOptions, ConnectionObserver, CookieDecoder, CookieEncoder,
    FormDecoderProvider, ForwardedHeaderHandler, MapHandle, NoopObserver,
};

/// HTTP/1 连接流量处理的配置构建器。
///
/// # 示例
///
/// ```
/// use http1_traffic::server::conn::Builder;
/// use std::time::Duration;
///
/// let mut builder = Builder::new();
/// builder
///     .max_keep_alive_requests(100)
///     .idle_timeout(Some(Duration::from_secs(30)));
/// let handler = builder.build();
/// # drop(handler);
/// ```
#[derive(Clone)]
pub struct Builder {
    max_keep_alive_requests: Option<u64>,
    idle_timeout: Option<Duration>,
    read_timeout: Option<Duration>,
    request_timeout: Option<Duration>,
    validate_headers: bool,
    last_flush_when_no_read: bool,
    forwarded_header_handler: Option<ForwardedHeaderHandler>,
    compress: Option<CompressPredicate>,
    compression_options: Option<CompressionOptions>,
    cookie_encoder: Option<Arc<dyn CookieEncoder>>,
    cookie_decoder: Option<Arc<dyn CookieDecoder>>,
    form_decoder_provider: Option<Arc<dyn FormDecoderProvider>>,
    map_handle: Option<MapHandle>,
    observer: Option<Arc<dyn ConnectionObserver>>,
}

/// 流量处理器持有的不可变每连接配置。
pub(crate) struct Config {
    pub(crate) max_keep_alive_requests: Option<u64>,
    pub(crate) idle_timeout: Option<Duration>,
    pub(crate) read_timeout: Option<Duration>,
    pub(crate) request_timeout: Option<Duration>,
    pub(crate) validate_headers: bool,
    pub(crate) last_flush_when_no_read: bool,
    pub(crate) forwarded_header_handler: Option<ForwardedHeaderHandler>,
    pub(crate) compress: Option<CompressPredicate>,
    pub(crate) compression_options: Option<CompressionOptions>,
    pub(crate) cookie_encoder: Option<Arc<dyn CookieEncoder>>,
    pub(crate) cookie_decoder: Option<Arc<dyn CookieDecoder>>,
    pub(crate) form_decoder_provider: Option<Arc<dyn FormDecoderProvider>>,
    pub(crate) map_handle: Option<MapHandle>,
    pub(crate) observer: Arc<dyn ConnectionObserver>,
}

// ===== impl Builder =====

impl Builder {
    /// 以默认选项创建构建器：无保活上限、无超时、校验头部、
    /// 冲刷合并关闭。
    pub fn new() -> Builder {
        Builder {
            max_keep_alive_requests: None,
            idle_timeout: None,
            read_timeout: None,
            request_timeout: None,
            validate_headers: true,
            last_flush_when_no_read: false,
            forwarded_header_handler: None,
            compress: None,
            compression_options: None,
            cookie_encoder: None,
            cookie_decoder: None,
            form_decoder_provider: None,
            map_handle: None,
            observer: None,
        }
    }

    /// 单条连接最多服务的请求数，达到后强制关闭；`-1` 表示不限制。
    ///
    /// # Panics
    ///
    /// `max` 既不是正数也不是 `-1` 时 panic。
    pub fn max_keep_alive_requests(&mut self, max: i64) -> &mut Self {
        assert!(
            max == -1 || max > 0,
            "max_keep_alive_requests must be positive or -1"
        );
        self.max_keep_alive_requests = if max == -1 { None } else { Some(max as u64) };
        self
    }

    /// 连接空闲超过该时长则关闭；`None` 不限制。
    pub fn idle_timeout(&mut self, timeout: Option<Duration>) -> &mut Self {
        self.idle_timeout = timeout;
        self
    }

    /// 每请求读超时，透传给每请求操作对象。
    pub fn read_timeout(&mut self, timeout: Option<Duration>) -> &mut Self {
        self.read_timeout = timeout;
        self
    }

    /// 每请求总超时，透传给每请求操作对象。
    pub fn request_timeout(&mut self, timeout: Option<Duration>) -> &mut Self {
        self.request_timeout = timeout;
        self
    }

    /// 是否启用头部校验，默认开启。
    pub fn validate_headers(&mut self, enabled: bool) -> &mut Self {
        self.validate_headers = enabled;
        self
    }

    /// 启用冲刷合并模式：响应收尾阶段的冲刷被推迟到读批次边界，
    /// 以减少流水线场景下的系统调用次数。默认关闭。
    pub fn last_flush_when_no_read(&mut self, enabled: bool) -> &mut Self {
        self.last_flush_when_no_read = enabled;
        self
    }

    /// 配置 `Forwarded` / `X-Forwarded-*` 头部解析器。
    pub fn forwarded_header_handler(&mut self, handler: ForwardedHeaderHandler) -> &mut Self {
        self.forwarded_header_handler = Some(handler);
        self
    }

    /// 配置压缩判定谓词，透传给每请求操作对象。
    pub fn compress(&mut self, predicate: CompressPredicate) -> &mut Self {
        self.compress = Some(predicate);
        self
    }

    /// 配置压缩策略选项，透传给每请求操作对象。
    pub fn compression_options(&mut self, options: CompressionOptions) -> &mut Self {
        self.compression_options = Some(options);
        self
    }

    /// 配置 cookie 编码器，透传给每请求操作对象。
    pub fn cookie_encoder(&mut self, encoder: Arc<dyn CookieEncoder>) -> &mut Self {
        self.cookie_encoder = Some(encoder);
        self
    }

    /// 配置 cookie 解码器，透传给每请求操作对象。
    pub fn cookie_decoder(&mut self, decoder: Arc<dyn CookieDecoder>) -> &mut Self {
        self.cookie_decoder = Some(decoder);
        self
    }

    /// 配置表单解码器工厂，透传给每请求操作对象。
    pub fn form_decoder_provider(&mut self, provider: Arc<dyn FormDecoderProvider>) -> &mut Self {
        self.form_decoder_provider = Some(provider);
        self
    }

    /// 配置每请求完成信号的包装器。
    pub fn map_handle(&mut self, map_handle: MapHandle) -> &mut Self {
        self.map_handle = Some(map_handle);
        self
    }

    /// 配置连接级状态观察者，默认为空观察者。
    pub fn observer(&mut self, observer: Arc<dyn ConnectionObserver>) -> &mut Self {
        self.observer = Some(observer);
        self
    }

    /// 以当前选项构造一条连接的流量处理器。
    pub fn build(&self) -> TrafficHandler {
        TrafficHandler::new(Arc::new(Config {
            max_keep_alive_requests: self.max_keep_alive_requests,
            idle_timeout: self.idle_timeout,
            read_timeout: self.read_timeout,
            request_timeout: self.request_timeout,
            validate_headers: self.validate_headers,
            last_flush_when_no_read: self.last_flush_when_no_read,
            forwarded_header_handler: self.forwarded_header_handler.clone(),
            compress: self.compress.clone(),
            compression_options: self.compression_options.clone(),
            cookie_encoder: self.cookie_encoder.clone(),
            cookie_decoder: self.cookie_decoder.clone(),
            form_decoder_provider: self.form_decoder_provider.clone(),
            map_handle: self.map_handle.clone(),
            observer: self
                .observer
                .clone()
                .unwrap_or_else(|| Arc::new(NoopObserver)),
        }))
    }
}

impl Default for Builder {
    fn default() -> Builder {
        Builder::new()
    }
}

impl fmt::Debug for Builder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Builder")
            .field("max_keep_alive_requests", &self.max_keep_alive_requests)
            .field("idle_timeout", &self.idle_timeout)
            .field("read_timeout", &self.read_timeout)
            .field("request_timeout", &self.request_timeout)
            .field("validate_headers", &self.validate_headers)
            .field("last_flush_when_no_read", &self.last_flush_when_no_read)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults() {
        let handler = Builder::new().build();
        assert!(handler.is_persistent());
        assert_eq!(handler.pending_responses(), 0);
    }

    #[test]
    fn max_keep_alive_unlimited() {
        let mut builder = Builder::new();
        builder.max_keep_alive_requests(-1);
        assert!(builder.max_keep_alive_requests.is_none());
        builder.max_keep_alive_requests(3);
        assert_eq!(builder.max_keep_alive_requests, Some(3));
    }

    #[test]
    #[should_panic(expected = "must be positive or -1")]
    fn max_keep_alive_rejects_zero() {
        Builder::new().max_keep_alive_requests(0);
    }
}
