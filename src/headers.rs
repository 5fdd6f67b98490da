//! HTTP 头部与报文分帧判定工具模块
//!
//! 本模块提供 keep-alive 语义与响应分帧（framing）相关的纯函数判定，
//! 供流量处理阶段在入站请求与出站响应两个方向上使用：
//!
//! - `Connection` 头部的 keep-alive / close 令牌扫描
//! - 按 HTTP 版本与 `Connection` 头部组合判定消息是否保持连接
//! - 出站响应头的 keep-alive 重写
//! - 响应是否具有"自定义消息长度"（客户端无需依赖连接关闭即可探测
//!   消息结束）的判定
//!
//! 所有函数都是无状态纯函数，`pub(super)` 可见性，仅供 crate 内部使用。

// HeaderValue 是头部值类型；CONNECTION 等是预定义头部名常量
use http::header::{HeaderValue, CONNECTION, CONTENT_LENGTH, CONTENT_TYPE, TRANSFER_ENCODING};
use http::{HeaderMap, StatusCode, Version};

use crate::proto::ResponseHead;

/// 检查一个 `Connection` 头部值是否包含指定令牌（逗号分隔，忽略大小写）。
fn connection_has(value: &HeaderValue, needle: &str) -> bool {
    if let Ok(s) = value.to_str() {
        for val in s.split(',') {
            if val.trim().eq_ignore_ascii_case(needle) {
                return true;
            }
        }
    }
    false
}

/// 检查 `Connection` 头部值是否声明了 `keep-alive`。
pub(super) fn connection_keep_alive(value: &HeaderValue) -> bool {
    connection_has(value, "keep-alive")
}

/// 检查 `Connection` 头部值是否声明了 `close`。
pub(super) fn connection_close(value: &HeaderValue) -> bool {
    connection_has(value, "close")
}

/// 按 HTTP 版本与 `Connection` 头部判定消息是否保持连接。
///
/// 判定顺序：
/// 1. 任一 `Connection` 值包含 `close` → 不保持
/// 2. HTTP/1.1 及以上默认保持
/// 3. HTTP/1.0 需要显式的 `Connection: keep-alive`
pub(super) fn is_keep_alive(version: Version, headers: &HeaderMap) -> bool {
    if headers.get_all(CONNECTION).iter().any(connection_close) {
        return false;
    }
    if version > Version::HTTP_10 {
        return true;
    }
    headers.get_all(CONNECTION).iter().any(connection_keep_alive)
}

/// 重写出站头部的 keep-alive 标记，使其与服务端决策一致。
///
/// 与版本默认值一致时移除 `Connection` 头部，不一致时显式写入：
/// - HTTP/1.1+：保持 → 移除；关闭 → `Connection: close`
/// - HTTP/1.0：保持 → `Connection: keep-alive`；关闭 → 移除
pub(super) fn set_keep_alive(version: Version, headers: &mut HeaderMap, keep_alive: bool) {
    if version > Version::HTTP_10 {
        if keep_alive {
            headers.remove(CONNECTION);
        } else {
            headers.insert(CONNECTION, HeaderValue::from_static("close"));
        }
    } else if keep_alive {
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
    } else {
        headers.remove(CONNECTION);
    }
}

/// 检查是否设置了 `Content-Length` 头部。
pub(super) fn content_length_set(headers: &HeaderMap) -> bool {
    headers.contains_key(CONTENT_LENGTH)
}

/// 检查 `Transfer-Encoding` 是否以 chunked 结束。
///
/// chunked 必须是最后一个传输编码，所以只检查最后一个值的最后一个令牌。
pub(super) fn transfer_encoding_chunked(headers: &HeaderMap) -> bool {
    let last = match headers.get_all(TRANSFER_ENCODING).iter().next_back() {
        Some(value) => value,
        None => return false,
    };
    match last.to_str() {
        Ok(s) => s
            .rsplit(',')
            .next()
            .map_or(false, |token| token.trim().eq_ignore_ascii_case("chunked")),
        Err(_) => false,
    }
}

/// 检查 `Content-Type` 是否为 `multipart/...`（忽略大小写的前缀匹配）。
pub(super) fn is_multipart(headers: &HeaderMap) -> bool {
    const PREFIX: &str = "multipart";
    match headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok()) {
        Some(ct) => ct.len() >= PREFIX.len() && ct[..PREFIX.len()].eq_ignore_ascii_case(PREFIX),
        None => false,
    }
}

/// 判定响应是否具有自定义消息长度。
///
/// Keep-alive 只有在客户端无需依赖连接关闭即可探测消息结束时才可行：
/// `Content-Length`、`Transfer-Encoding: chunked`、`multipart/*` 内容，
/// 或按规范无消息体的状态码（1xx / 204 / 304）。
/// 均不满足时，服务端必须在响应后关闭连接。
pub(super) fn is_self_defined_message_length(head: &ResponseHead) -> bool {
    content_length_set(&head.headers)
        || transfer_encoding_chunked(&head.headers)
        || is_multipart(&head.headers)
        || head.status.is_informational()
        || head.status == StatusCode::NO_CONTENT
        || head.status == StatusCode::NOT_MODIFIED
}
