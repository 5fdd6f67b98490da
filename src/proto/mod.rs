//! HTTP 消息模型模块。
//!
//! 本模块定义了穿过流量处理阶段的消息表示：请求头、响应头、消息体分块、
//! 末块（last content）、完整响应，以及入站/出站两个方向的标签化枚举
//! [`Inbound`] 与 [`Outbound`]。
//!
//! ## 所有权约定
//!
//! 消息体载荷统一使用 [`bytes::Bytes`]。一个消息部件被交给处理器后，
//! 处理器要么将其转发（move 继续向下传递所有权），要么原地丢弃；
//! 任何未被转发的部件在作用域结束时被确定性释放。
//!
//! ## 解码结果
//!
//! 入站消息携带解码器附加的 [`DecodeResult`]：解码失败的消息仍会作为
//! 事件到达本阶段，由调度器负责合成错误响应并关闭连接。出站方向的
//! `DecodeResult` 恒为成功，保留字段只是为了让两个方向共用同一组部件类型。

// 标准库导入
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

// bytes crate 的不可变字节容器，消息体载荷的统一表示
use bytes::Bytes;
// http crate 的头部、方法、URI、版本与状态码类型
use http::{HeaderMap, Method, StatusCode, Uri, Version};

pub(crate) mod h1;

/// 解码器附加在入站消息上的解码结果。
///
/// 成功结果不携带任何信息；失败结果携带类型擦除后的原因，
/// 使用 `Arc` 共享以便在日志与合成错误响应之间传递。
#[derive(Clone, Default)]
pub struct DecodeResult {
    cause: Option<Arc<dyn StdError + Send + Sync>>,
}

impl DecodeResult {
    /// 成功的解码结果。
    pub fn ok() -> DecodeResult {
        DecodeResult { cause: None }
    }

    /// 携带原因的失败解码结果。
    pub fn failure<E>(cause: E) -> DecodeResult
    where
        E: StdError + Send + Sync + 'static,
    {
        DecodeResult {
            cause: Some(Arc::new(cause)),
        }
    }

    /// 是否为失败结果。
    pub fn is_failure(&self) -> bool {
        self.cause.is_some()
    }

    /// 失败原因（如有）。
    pub fn cause(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.cause.as_deref()
    }

    /// 取出共享的失败原因，用于构造错误链。
    pub(crate) fn shared_cause(&self) -> Option<Arc<dyn StdError + Send + Sync>> {
        self.cause.clone()
    }
}

impl fmt::Debug for DecodeResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.cause {
            Some(ref cause) => f.debug_tuple("DecodeResult::Failure").field(cause).finish(),
            None => f.write_str("DecodeResult::Ok"),
        }
    }
}

/// 入站 HTTP 请求头。
///
/// 请求行（方法 + URI）、协议版本、头部字段集合，
/// 以及解码器附加的解码结果。
#[derive(Debug)]
pub struct RequestHead {
    /// HTTP 方法
    pub method: Method,
    /// 请求目标
    pub uri: Uri,
    /// 协议版本
    pub version: Version,
    /// 头部字段集合
    pub headers: HeaderMap,
    /// 解码器附加的解码结果
    pub decode: DecodeResult,
}

impl RequestHead {
    /// 以 HTTP/1.1 默认版本构造请求头。
    pub fn new(method: Method, uri: Uri) -> RequestHead {
        RequestHead {
            method,
            uri,
            version: Version::HTTP_11,
            headers: HeaderMap::new(),
            decode: DecodeResult::ok(),
        }
    }
}

/// 出站 HTTP 响应头。
#[derive(Debug)]
pub struct ResponseHead {
    /// 状态码
    pub status: StatusCode,
    /// 协议版本
    pub version: Version,
    /// 头部字段集合
    pub headers: HeaderMap,
}

impl ResponseHead {
    /// 以 HTTP/1.1 默认版本构造响应头。
    pub fn new(status: StatusCode) -> ResponseHead {
        ResponseHead {
            status,
            version: Version::HTTP_11,
            headers: HeaderMap::new(),
        }
    }
}

/// 消息体中间分块。
#[derive(Debug)]
pub struct Content {
    /// 分块载荷
    pub data: Bytes,
    /// 解码器附加的解码结果（出站方向恒为成功）
    pub decode: DecodeResult,
}

impl Content {
    /// 构造携带载荷的分块。
    pub fn new(data: Bytes) -> Content {
        Content {
            data,
            decode: DecodeResult::ok(),
        }
    }
}

/// 消息体末块，标记一条消息的结束，可携带尾部字段（trailers）。
#[derive(Debug)]
pub struct LastContent {
    /// 末块载荷（可为空）
    pub data: Bytes,
    /// 尾部字段
    pub trailers: HeaderMap,
    /// 解码器附加的解码结果（出站方向恒为成功）
    pub decode: DecodeResult,
}

impl LastContent {
    /// 构造携带载荷的末块。
    pub fn new(data: Bytes) -> LastContent {
        LastContent {
            data,
            trailers: HeaderMap::new(),
            decode: DecodeResult::ok(),
        }
    }

    /// 空末块标记：无载荷、无尾部字段、解码成功。
    ///
    /// 这是消息结束的良性标记，即使在连接空闲时到达也总是可以安全转发。
    pub fn empty() -> LastContent {
        LastContent::new(Bytes::new())
    }

    /// 是否为空末块标记。
    pub fn is_empty(&self) -> bool {
        self.data.is_empty() && self.trailers.is_empty() && !self.decode.is_failure()
    }
}

/// 完整响应：响应头 + 消息体 + 末块合一的单次写入。
#[derive(Debug)]
pub struct FullResponse {
    /// 响应头
    pub head: ResponseHead,
    /// 完整消息体
    pub body: Bytes,
    /// 尾部字段
    pub trailers: HeaderMap,
}

impl FullResponse {
    /// 组合响应头与完整消息体。
    pub fn new(head: ResponseHead, body: Bytes) -> FullResponse {
        FullResponse {
            head,
            body,
            trailers: HeaderMap::new(),
        }
    }
}

/// 入站事件：解码器产出的请求消息部件。
#[derive(Debug)]
pub enum Inbound {
    /// 新请求的头部
    Request(RequestHead),
    /// 请求体中间分块
    Content(Content),
    /// 请求体末块
    Last(LastContent),
}

impl Inbound {
    /// 取本事件携带的解码结果。
    pub(crate) fn decode(&self) -> &DecodeResult {
        match self {
            Inbound::Request(head) => &head.decode,
            Inbound::Content(content) => &content.decode,
            Inbound::Last(last) => &last.decode,
        }
    }
}

/// 出站事件：应用写出的响应消息部件。
///
/// 按具体分类分派，对应出站整形器的五种处理路径。
#[derive(Debug)]
pub enum Outbound {
    /// 仅响应头，消息体随后分块写出
    Response(ResponseHead),
    /// 头 + 体 + 末块合一的完整响应
    Full(FullResponse),
    /// 响应体中间分块
    Content(Content),
    /// 响应体末块
    Last(LastContent),
    /// 其他不透明出站对象（例如已经编码完成的原始字节）
    Raw(Bytes),
}
