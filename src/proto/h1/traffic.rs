//! HTTP/1 连接流量处理器模块。
//!
//! 本模块实现服务端 HTTP/1.x 连接的核心状态管理。[`TrafficHandler`]
//! 作为每连接消息流水线中的一个双工阶段，坐在解码器与应用处理器之间，
//! 负责：
//!
//! - Keep-alive 管理：按 RFC 7230 跟踪连接是否可以复用，并在必要时
//!   改写出站响应头
//! - 流水线（pipelining）：在上一个响应尚未完成时缓冲后续到达的请求，
//!   保证响应按请求到达顺序上线
//! - 分帧纪律：没有自定义消息长度的响应强制在写完后关闭连接
//! - 读/写/冲刷协调：读批次边界上的冲刷合并，背压下的立即冲刷
//!
//! 状态机的核心是 `pending_responses` 计数与 `keep_alive` 标志的组合：
//! 连接在 `Idle -> Serving -> (Buffering) -> Idle` 的循环中运转，任何
//! 一次关闭决策（非保活请求、不可探测结束的响应、解码失败、保活上限）
//! 都让状态机进入 Closing，当前响应成为最后一个。
//!
//! 并发模型是每连接单线程协作式：所有入站事件、出站写入与排空任务都
//! 运行在同一个执行器上，单线程约定即同步纪律，状态无须加锁。

// 标准库导入
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

// bytes crate 的不可变字节容器
use bytes::Bytes;
// http crate 的头部名常量与类型
use http::header::{HeaderValue, CONNECTION, CONTENT_LENGTH};
use http::{StatusCode, Version};

use super::pipeline::{Deferred, Pipelined, RequestHolder};
use crate::headers;
use crate::proto::{DecodeResult, FullResponse, Inbound, Outbound, RequestHead, ResponseHead};
use crate::rt::{Channel, WritePromise};
use crate::server::conn::Config;
use crate::server::ops::{ConnectionInfo, ObservedState, Operations};

/// 服务端 HTTP/1 连接的流量处理器。
///
/// 单连接对象：连接建立时由 [`Builder::build`] 构造，连接拆除时丢弃。
/// 嵌入方在连接的单线程执行器上把流水线事件转交给对应方法：
///
/// - 生命周期：[`handler_added`]（attach 时索取首读）、
///   [`channel_active`]、[`handler_removed`]（释放队列）
/// - 入站：[`read`] 处理解码器产出的每个消息，[`read_complete`]
///   标记读批次边界
/// - 出站：[`write`] 整形应用写出的响应部件，[`flush`] 协调冲刷
/// - 排空：[`drain`] 执行经 [`Channel::schedule_drain`] 调度的
///   流水线队列排空
///
/// [`Builder::build`]: crate::server::conn::Builder::build
/// [`handler_added`]: TrafficHandler::handler_added
/// [`channel_active`]: TrafficHandler::channel_active
/// [`handler_removed`]: TrafficHandler::handler_removed
/// [`read`]: TrafficHandler::read
/// [`read_complete`]: TrafficHandler::read_complete
/// [`write`]: TrafficHandler::write
/// [`flush`]: TrafficHandler::flush
/// [`drain`]: TrafficHandler::drain
pub struct TrafficHandler {
    /// 不可变的每连接配置
    config: Arc<Config>,
    /// 连接级已服务请求计数器，与每请求操作对象共享
    requests: Arc<AtomicU64>,
    /// 连接状态
    state: State,
}

/// 连接的内部状态结构体。
struct State {
    /// keep-alive 是否仍然有效（即 persistent connection 标志）
    keep_alive: KA,
    /// 已接受但最终响应尚未写完的请求数
    pending_responses: u32,
    /// 入站流水线是否已把至少一个消息推迟到了在途请求之后
    overflow: bool,
    /// 当前出站响应是否为非 1xx（其末块会递减 pending 计数）
    non_informational: bool,
    /// 当前响应的末块已进入出站路径；新请求头到达时清除
    finalizing: bool,
    /// 当前读批次内是否已有入站事件到达；读批次边界时清除
    read: bool,
    /// 有一次冲刷被推迟，等待读批次边界
    needs_flush: bool,
    /// 惰性分配的流水线队列
    pipelined: Option<Pipelined>,
    /// 首个入站事件时捕获的对端地址（代理协议地址优先）
    remote_addr: Option<SocketAddr>,
    /// 首个入站事件时捕获的 TLS 在场标志
    secure: Option<bool>,
}

/// 由状态属性导出的连接阶段视图。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Phase {
    /// 没有在途请求，连接可复用
    Idle,
    /// k 个请求在途，队头请求在应用处
    Serving(u32),
    /// k 个请求在途，q 个消息被推迟
    Buffering(u32, usize),
    /// 关闭决策已做出，当前响应是最后一个
    Closing,
}

/// Keep-Alive 状态枚举。
///
/// `Enabled` 表示连接仍可复用；任何一次关闭决策都转入 `Disabled`，
/// 且不可逆。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum KA {
    /// keep-alive 有效（默认值）
    #[default]
    Enabled,
    /// keep-alive 已禁用，当前响应完成后连接关闭
    Disabled,
}

/// 为 KA 实现 `BitAndAssign<bool>` 运算符。
///
/// 当右侧为 false（消息不支持 keep-alive）时转入 Disabled，
/// 允许 `state.keep_alive &= is_keep_alive(..)` 的写法。
impl std::ops::BitAndAssign<bool> for KA {
    fn bitand_assign(&mut self, enabled: bool) {
        if !enabled {
            trace!("remote disabling keep-alive");
            *self = KA::Disabled;
        }
    }
}

impl KA {
    fn is_enabled(self) -> bool {
        matches!(self, KA::Enabled)
    }

    fn disable(&mut self) {
        *self = KA::Disabled;
    }
}

// ===== impl TrafficHandler =====

impl TrafficHandler {
    pub(crate) fn new(config: Arc<Config>) -> TrafficHandler {
        TrafficHandler {
            config,
            requests: Arc::new(AtomicU64::new(0)),
            state: State::new(),
        }
    }

    /// keep-alive 是否仍然有效。
    pub fn is_persistent(&self) -> bool {
        self.state.keep_alive.is_enabled()
    }

    /// 已接受但最终响应尚未写完的请求数。
    pub fn pending_responses(&self) -> u32 {
        self.state.pending_responses
    }

    // ===== 生命周期 =====

    /// 处理器接入连接流水线：立即索取第一批读。
    pub fn handler_added<C: Channel>(&mut self, ch: &mut C) {
        debug!("new http connection, requesting read");
        ch.request_read();
    }

    /// 连接激活：插入空闲超时阶段（如配置了空闲超时）。
    pub fn channel_active<C: Channel>(&mut self, ch: &mut C) {
        if let Some(timeout) = self.config.idle_timeout {
            ch.install_idle_timeout(timeout);
        }
    }

    /// 处理器从连接流水线拆除：释放流水线队列中的全部剩余条目。
    pub fn handler_removed(&mut self) {
        if let Some(mut pipelined) = self.state.pipelined.take() {
            if !pipelined.is_empty() {
                pipelined.discard();
            }
        }
    }

    // ===== 入站调度 =====

    /// 处理解码器产出的一个入站消息。
    ///
    /// 请求头在流水线队头时被派发给应用（构造并绑定每请求操作对象），
    /// 否则连同其后的消息体部件一起入队推迟；响应已全部送出后到达的
    /// 内容按空闲规则转发或丢弃。
    pub fn read<C: Channel>(&mut self, ch: &mut C, msg: Inbound) {
        self.state.read = true;
        // 每连接事实在首个入站事件上惰性捕获
        if self.state.secure.is_none() {
            self.state.secure = Some(ch.is_secure());
        }
        if self.state.remote_addr.is_none() {
            self.state.remote_addr =
                Some(ch.proxy_peer_addr().unwrap_or_else(|| ch.remote_addr()));
        }

        let msg = match msg {
            Inbound::Request(head) => return self.read_request_head(ch, head),
            msg => msg,
        };

        if self.state.keep_alive.is_enabled() && self.state.pending_responses == 0 {
            // 响应已全部送出，连接空闲
            match msg {
                Inbound::Last(last) if last.is_empty() => {
                    // 空末块是良性的消息结束标记，总是安全转发
                    ch.fire_read(Inbound::Last(last));
                }
                Inbound::Last(last) => {
                    if last.decode.is_failure() {
                        let err = decode_error(&last.decode);
                        drop(last);
                        self.send_decoding_failures(ch, err, None);
                        return;
                    }
                    ch.fire_read(Inbound::Last(last));
                }
                msg => {
                    debug!("dropping http content, response has been sent already");
                    drop(msg);
                }
            }
            ch.request_read();
            return;
        }

        if self.state.overflow {
            debug!(
                "buffering pipelined http content, pending responses: {}, queued: {}",
                self.state.pending_responses,
                self.state.queued()
            );
            self.enqueue(Deferred::from(msg));
            return;
        }

        if msg.decode().is_failure() {
            let err = decode_error(msg.decode());
            drop(msg);
            self.send_decoding_failures(ch, err, None);
            return;
        }

        ch.fire_read(msg);
    }

    /// 处理新到达的请求头。
    fn read_request_head<C: Channel>(&mut self, ch: &mut C, head: RequestHead) {
        self.state.finalizing = false;

        // 空闲超时阶段在请求期间移除，连接回到空闲后再插回
        if self.config.idle_timeout.is_some() {
            ch.remove_idle_timeout();
        }

        if head.version == Version::HTTP_2 {
            error!("unexpected request [{} {} HTTP/2.0]", head.method, head.uri);
            let err = crate::Error::new_version_h2();
            drop(head);
            self.send_decoding_failures(ch, err, None);
            return;
        }

        if self.state.keep_alive.is_enabled() {
            self.state.pending_responses += 1;
            debug!(
                "increasing pending responses count: {}",
                self.state.pending_responses
            );
            self.state.keep_alive &= headers::is_keep_alive(head.version, &head.headers);
        } else {
            debug!("dropping pipelined http request, previous response requested connection close");
            drop(head);
            return;
        }

        if self.state.pending_responses > 1 {
            debug!(
                "buffering pipelined http request, pending responses: {}, queued: {}",
                self.state.pending_responses,
                self.state.queued()
            );
            self.state.overflow = true;
            self.enqueue(Deferred::Request(RequestHolder::new(head)));
            return;
        }

        self.state.overflow = false;

        if self.config.last_flush_when_no_read {
            // 上一个响应的终端写入可能仍在途，先强制终结它
            ch.terminate();
        }

        if head.decode.is_failure() {
            let err = decode_error(&head.decode);
            drop(head);
            self.send_decoding_failures(ch, err, None);
            return;
        }

        self.dispatch(ch, head, Instant::now());
    }

    /// 派发一个位于流水线队头的请求：解析连接信息，构造并绑定每请求
    /// 操作对象，通知观察者，然后把请求头转发给应用处理器。
    ///
    /// 返回是否派发成功；构造失败时请求已被以解码失败的方式拒绝。
    fn dispatch<C: Channel>(&mut self, ch: &mut C, head: RequestHead, timestamp: Instant) -> bool {
        let secure = self.state.secure.unwrap_or(false);
        let remote_addr = self
            .state
            .remote_addr
            .unwrap_or_else(|| ch.remote_addr());

        let info = match ConnectionInfo::resolve(
            &head,
            secure,
            ch.local_addr(),
            remote_addr,
            self.config.forwarded_header_handler.as_ref(),
        ) {
            Ok(info) => info,
            Err((info, err)) => {
                drop(head);
                self.send_decoding_failures(ch, err, Some(info));
                return false;
            }
        };

        let ops = Operations::new(
            info,
            timestamp,
            secure,
            self.config.clone(),
            self.requests.clone(),
        );
        ops.bind();
        self.config.observer.on_state_change(&ops, ObservedState::Configured);
        ch.bind(ops);

        ch.fire_read(Inbound::Request(head));
        true
    }

    /// 排空流水线队列。
    ///
    /// 在上一个响应的末块写出、且队列非空时经 [`Channel::schedule_drain`]
    /// 调度，与其他入站工作串行执行。每次排空至多派发一个请求头，随后
    /// 转发其消息体部件，直到遇见下一个请求头或队列见底。
    pub fn drain<C: Channel>(&mut self, ch: &mut C) {
        let mut dispatched_request = false;
        loop {
            let next_is_request = match self.state.pipelined.as_ref().and_then(Pipelined::peek) {
                Some(Deferred::Request(_)) => true,
                Some(_) => false,
                None => break,
            };

            if next_is_request {
                if dispatched_request {
                    // 下一个请求等它前面这个的响应完成后再派发
                    return;
                }
                if !self.state.keep_alive.is_enabled() {
                    self.discard();
                    return;
                }

                let holder = match self.state.pipelined.as_mut().and_then(Pipelined::pop) {
                    Some(Deferred::Request(holder)) => holder,
                    _ => unreachable!("pipeline drain peeked a request"),
                };

                self.state.finalizing = false;

                if self.config.last_flush_when_no_read {
                    ch.terminate();
                }

                let (head, timestamp) = holder.into_parts();

                if head.decode.is_failure() {
                    let err = decode_error(&head.decode);
                    drop(head);
                    self.send_decoding_failures(ch, err, None);
                    self.discard();
                    return;
                }

                debug!(
                    "draining next pipelined http request, pending responses: {}, queued: {}",
                    self.state.pending_responses,
                    self.state.queued()
                );
                if !self.dispatch(ch, head, timestamp) {
                    return;
                }
                dispatched_request = true;
            } else if let Some(part) = self.state.pipelined.as_mut().and_then(Pipelined::pop) {
                match part {
                    Deferred::Content(content) => ch.fire_read(Inbound::Content(content)),
                    Deferred::Last(last) => ch.fire_read(Inbound::Last(last)),
                    Deferred::Request(_) => unreachable!("pipeline drain peeked a body part"),
                }
            }
        }
        self.state.overflow = false;
    }

    // ===== 读批次边界 =====

    /// 读批次结束：清除读标志，并在冲刷合并模式下补上被推迟的冲刷。
    pub fn read_complete<C: Channel>(&mut self, ch: &mut C) {
        if self.state.read {
            self.state.read = false;
            if self.config.last_flush_when_no_read && self.state.needs_flush {
                self.state.needs_flush = false;
                ch.flush();
            }
        }
    }

    // ===== 出站整形 =====

    /// 整形应用写出的一个出站响应部件。
    ///
    /// 响应头按服务端决策改写 keep-alive 标记；末块带上必要的
    /// 关闭语义并推进 pending 计数；响应完结后迟到的内容被丢弃、
    /// 其承诺直接置为成功。
    pub fn write<C: Channel>(&mut self, ch: &mut C, msg: Outbound, promise: WritePromise) {
        match msg {
            Outbound::Response(mut head) => {
                self.stamp_response_head(&mut head);
                ch.write(Outbound::Response(head), promise);
            }
            Outbound::Full(mut full) => {
                if self.stamp_response_head(&mut full.head) {
                    // 100 Continue 原样写过，不做任何计数
                    ch.write(Outbound::Full(full), promise);
                    return;
                }
                self.write_last_content(ch, Outbound::Full(full), promise);
            }
            Outbound::Last(last) => {
                self.write_last_content(ch, Outbound::Last(last), promise);
            }
            Outbound::Content(content) => {
                if self.state.keep_alive.is_enabled() && self.state.pending_responses == 0 {
                    debug!("dropping http content, response has been sent already");
                    drop(content);
                    promise.succeed();
                    return;
                }
                ch.write(Outbound::Content(content), promise);
            }
            Outbound::Raw(data) => {
                if self.state.keep_alive.is_enabled() && self.state.pending_responses == 0 {
                    debug!("dropping outbound object, response has been sent already");
                    drop(data);
                    promise.succeed();
                    return;
                }
                ch.write(Outbound::Raw(data), promise);
            }
        }
    }

    /// 给出站响应头打上服务端的 keep-alive 决策。
    ///
    /// 计算 `non_informational` 标志；保活上限已到、响应声明不保活、
    /// 或响应没有自定义消息长度时，本响应成为最后一个；服务端决定
    /// 不再保持时，把出站头上的 keep-alive 标记改写为 close。
    ///
    /// 返回状态码是否为 `100 Continue`（调用方需原样写过）。
    fn stamp_response_head(&mut self, head: &mut ResponseHead) -> bool {
        self.state.non_informational = !head.status.is_informational();

        let max_keep_alive_reached = match self.config.max_keep_alive_requests {
            Some(max) => self.requests.load(Ordering::Relaxed) == max,
            None => false,
        };
        if max_keep_alive_reached
            || !headers::is_keep_alive(head.version, &head.headers)
            || !headers::is_self_defined_message_length(head)
        {
            // 客户端无法在不关闭连接的情况下探测消息结束
            self.state.pending_responses = 0;
            self.state.keep_alive.disable();
        }

        // 应用以为能保持连接，但服务端知道得更多时要修正响应头
        if !self.state.should_keep_alive() {
            headers::set_keep_alive(head.version, &mut head.headers, false);
        }

        head.status == StatusCode::CONTINUE
    }

    /// 处理当前响应的末块（或完整响应的体 + 末块部分）。
    fn write_last_content<C: Channel>(
        &mut self,
        ch: &mut C,
        msg: Outbound,
        mut promise: WritePromise,
    ) {
        self.state.finalizing = true;

        if self.config.last_flush_when_no_read {
            self.state.needs_flush = !self.state.read;
        }

        if !self.state.should_keep_alive() {
            debug!(
                "non persistent http connection, preparing to close, pending responses: {}",
                self.state.pending_responses
            );
            promise.set_close_on_complete();
            ch.write(msg, promise);
            return;
        }

        ch.write(msg, promise);

        if self.state.non_informational {
            self.state.non_informational = false;
            self.state.pending_responses -= 1;
            debug!(
                "decreasing pending responses count: {}",
                self.state.pending_responses
            );
        }

        if self.state.queued() > 0 {
            debug!(
                "scheduling pipelined request drain, pending responses: {}, queued: {}",
                self.state.pending_responses,
                self.state.queued()
            );
            ch.schedule_drain();
        } else {
            if let Some(timeout) = self.config.idle_timeout {
                ch.install_idle_timeout(timeout);
            }
            ch.request_read();
        }
    }

    // ===== 冲刷协调 =====

    /// 协调一次出站冲刷请求。
    ///
    /// 默认模式下直接透传。冲刷合并模式下，响应收尾阶段的冲刷被推迟
    /// 到读批次边界；此前已有推迟的冲刷、或出站通道已不可写（背压）时
    /// 立即冲刷。
    pub fn flush<C: Channel>(&mut self, ch: &mut C) {
        if self.config.last_flush_when_no_read && self.state.finalizing {
            if self.state.needs_flush || !ch.is_writable() {
                self.state.needs_flush = false;
                ch.flush();
            } else {
                self.state.needs_flush = true;
            }
        } else {
            ch.flush();
        }
    }

    // ===== 失败处理 =====

    /// 以解码失败的方式拒绝一个请求。
    ///
    /// 连接不再保持；合成一个分帧安全的错误响应（空消息体、显式
    /// `Content-Length: 0` 与 `Connection: close`），带上完成后关闭的
    /// 标记直接写给编码器并冲刷。
    fn send_decoding_failures<C: Channel>(
        &mut self,
        ch: &mut C,
        err: crate::Error,
        connection_info: Option<ConnectionInfo>,
    ) {
        self.state.keep_alive.disable();
        self.log_rejection(&err, connection_info.as_ref());

        let mut head = ResponseHead::new(StatusCode::BAD_REQUEST);
        head.headers
            .insert(CONTENT_LENGTH, HeaderValue::from_static("0"));
        head.headers
            .insert(CONNECTION, HeaderValue::from_static("close"));

        let mut promise = WritePromise::detached();
        promise.set_close_on_complete();
        ch.write(Outbound::Full(FullResponse::new(head, Bytes::new())), promise);
        ch.flush();
    }

    /// 记录一次请求拒绝；已解析出的连接信息保留在诊断输出里。
    fn log_rejection(&self, _err: &crate::Error, _info: Option<&ConnectionInfo>) {
        match _info {
            Some(_info) => {
                error!("rejecting request from {}: {}", _info.remote_addr(), _err)
            }
            None => error!("rejecting request: {}", _err),
        }
    }

    // ===== 队列辅助 =====

    fn enqueue(&mut self, item: Deferred) {
        self.state
            .pipelined
            .get_or_insert_with(Pipelined::new)
            .push(item);
    }

    fn discard(&mut self) {
        if let Some(pipelined) = self.state.pipelined.as_mut() {
            if !pipelined.is_empty() {
                pipelined.discard();
            }
        }
    }
}

impl fmt::Debug for TrafficHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrafficHandler")
            .field("state", &self.state)
            .finish()
    }
}

// ===== impl State =====

impl State {
    fn new() -> State {
        State {
            keep_alive: KA::Enabled,
            pending_responses: 0,
            overflow: false,
            non_informational: false,
            finalizing: false,
            read: false,
            needs_flush: false,
            pipelined: None,
            remote_addr: None,
            secure: None,
        }
    }

    /// 响应完成后连接是否还应保持。
    fn should_keep_alive(&self) -> bool {
        self.pending_responses != 0 && self.keep_alive.is_enabled()
    }

    fn queued(&self) -> usize {
        self.pipelined.as_ref().map_or(0, Pipelined::len)
    }

    fn phase(&self) -> Phase {
        if !self.keep_alive.is_enabled() {
            Phase::Closing
        } else if self.pending_responses == 0 {
            Phase::Idle
        } else if self.overflow {
            Phase::Buffering(self.pending_responses, self.queued())
        } else {
            Phase::Serving(self.pending_responses)
        }
    }
}

impl fmt::Debug for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut builder = f.debug_struct("State");
        builder
            .field("phase", &self.phase())
            .field("keep_alive", &self.keep_alive);

        // Only show the flush fields when they are interesting...
        if self.finalizing {
            builder.field("finalizing", &true);
        }
        if self.needs_flush {
            builder.field("needs_flush", &true);
        }

        builder.finish()
    }
}

/// 从失败的解码结果构造错误，保留解码器给出的原因。
fn decode_error(decode: &DecodeResult) -> crate::Error {
    match decode.shared_cause() {
        Some(cause) => crate::Error::new_decode(cause),
        None => crate::Error::new_decode(io::Error::new(
            io::ErrorKind::InvalidData,
            "decoder reported failure",
        )),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use http::header::TRANSFER_ENCODING;
    use http::Method;

    use super::*;
    use crate::proto::{Content, LastContent};
    use crate::server::conn::Builder;
    use crate::server::ops::{ConnectionObserver, ForwardedHeaderHandler};

    /// 记录一切交互的流水线假实现。
    struct MockChannel {
        fired: Vec<Inbound>,
        written: Vec<(Outbound, WritePromise)>,
        flushes: usize,
        reads_requested: usize,
        drains_scheduled: usize,
        idle_installed: usize,
        idle_removed: usize,
        terminated: usize,
        bound: Vec<Operations>,
        writable: bool,
        secure: bool,
        proxy_peer: Option<SocketAddr>,
    }

    impl MockChannel {
        fn new() -> MockChannel {
            MockChannel {
                fired: Vec::new(),
                written: Vec::new(),
                flushes: 0,
                reads_requested: 0,
                drains_scheduled: 0,
                idle_installed: 0,
                idle_removed: 0,
                terminated: 0,
                bound: Vec::new(),
                writable: true,
                secure: false,
                proxy_peer: None,
            }
        }

        fn last_written(&self) -> &(Outbound, WritePromise) {
            self.written.last().expect("nothing written")
        }

        fn written_head(&self, index: usize) -> &ResponseHead {
            match self.written[index].0 {
                Outbound::Response(ref head) => head,
                Outbound::Full(ref full) => &full.head,
                ref other => panic!("write {} is not a response head: {:?}", index, other),
            }
        }
    }

    impl Channel for MockChannel {
        fn fire_read(&mut self, msg: Inbound) {
            self.fired.push(msg);
        }

        fn bind(&mut self, ops: Operations) {
            self.bound.push(ops);
        }

        fn terminate(&mut self) {
            self.terminated += 1;
        }

        fn write(&mut self, msg: Outbound, promise: WritePromise) {
            self.written.push((msg, promise));
        }

        fn flush(&mut self) {
            self.flushes += 1;
        }

        fn is_writable(&self) -> bool {
            self.writable
        }

        fn request_read(&mut self) {
            self.reads_requested += 1;
        }

        fn schedule_drain(&mut self) {
            self.drains_scheduled += 1;
        }

        fn install_idle_timeout(&mut self, _timeout: Duration) {
            self.idle_installed += 1;
        }

        fn remove_idle_timeout(&mut self) {
            self.idle_removed += 1;
        }

        fn is_secure(&self) -> bool {
            self.secure
        }

        fn local_addr(&self) -> SocketAddr {
            SocketAddr::from(([127, 0, 0, 1], 8080))
        }

        fn remote_addr(&self) -> SocketAddr {
            SocketAddr::from(([127, 0, 0, 1], 40000))
        }

        fn proxy_peer_addr(&self) -> Option<SocketAddr> {
            self.proxy_peer
        }
    }

    fn get(path: &str) -> RequestHead {
        RequestHead::new(Method::GET, path.parse().unwrap())
    }

    fn ok_head_with_length() -> ResponseHead {
        let mut head = ResponseHead::new(StatusCode::OK);
        head.headers
            .insert(CONTENT_LENGTH, HeaderValue::from_static("0"));
        head
    }

    fn full_ok() -> Outbound {
        Outbound::Full(FullResponse::new(ok_head_with_length(), Bytes::new()))
    }

    fn attach(builder: &Builder) -> (TrafficHandler, MockChannel) {
        let mut handler = builder.build();
        let mut ch = MockChannel::new();
        handler.handler_added(&mut ch);
        handler.channel_active(&mut ch);
        (handler, ch)
    }

    #[test]
    fn attach_solicits_first_read() {
        let (handler, ch) = attach(&Builder::new());
        assert_eq!(ch.reads_requested, 1);
        assert_eq!(handler.state.phase(), Phase::Idle);
    }

    #[test]
    fn single_request_roundtrip() {
        let (mut h, mut ch) = attach(&Builder::new());

        h.read(&mut ch, Inbound::Request(get("/")));
        h.read(&mut ch, Inbound::Last(LastContent::empty()));
        assert_eq!(h.state.phase(), Phase::Serving(1));
        assert_eq!(ch.fired.len(), 2);
        assert_eq!(ch.bound.len(), 1);

        h.write(&mut ch, full_ok(), WritePromise::detached());
        assert_eq!(h.state.phase(), Phase::Idle);
        assert!(!ch.last_written().1.wants_close());
        // 回到空闲后多索取一次读
        assert_eq!(ch.reads_requested, 2);
        assert_eq!(ch.drains_scheduled, 0);
    }

    #[test]
    fn pipelined_requests_buffered_and_drained_in_order() {
        let (mut h, mut ch) = attach(&Builder::new());

        h.read(&mut ch, Inbound::Request(get("/a")));
        h.read(&mut ch, Inbound::Last(LastContent::empty()));
        h.read(&mut ch, Inbound::Request(get("/b")));
        h.read(&mut ch, Inbound::Last(LastContent::empty()));

        assert_eq!(h.state.phase(), Phase::Buffering(2, 2));
        // 只有 /a 被派发
        assert_eq!(ch.fired.len(), 2);
        assert_eq!(ch.bound.len(), 1);

        h.write(&mut ch, full_ok(), WritePromise::detached());
        assert_eq!(h.pending_responses(), 1);
        assert_eq!(ch.drains_scheduled, 1);

        h.drain(&mut ch);
        assert_eq!(ch.bound.len(), 2);
        assert_eq!(ch.fired.len(), 4);
        match ch.fired[2] {
            Inbound::Request(ref head) => assert_eq!(head.uri.path(), "/b"),
            ref other => panic!("expected buffered request head: {:?}", other),
        }
        assert_eq!(h.state.phase(), Phase::Serving(1));

        h.write(&mut ch, full_ok(), WritePromise::detached());
        assert_eq!(h.state.phase(), Phase::Idle);
        // 两个响应按请求顺序写出，连接回到空闲并多索取一次读
        assert_eq!(ch.written.len(), 2);
        assert_eq!(ch.reads_requested, 2);
    }

    #[test]
    fn request_after_close_decision_is_dropped() {
        let (mut h, mut ch) = attach(&Builder::new());

        let mut head = get("/a");
        head.headers
            .insert(CONNECTION, HeaderValue::from_static("close"));
        h.read(&mut ch, Inbound::Request(head));
        assert_eq!(h.state.phase(), Phase::Closing);
        assert_eq!(ch.fired.len(), 1);

        // 关闭决策之后的流水线请求被丢弃
        h.read(&mut ch, Inbound::Request(get("/b")));
        assert_eq!(ch.fired.len(), 1);
        assert_eq!(h.pending_responses(), 1);

        h.write(&mut ch, full_ok(), WritePromise::detached());
        assert!(ch.last_written().1.wants_close());
    }

    #[test]
    fn http2_request_rejected_with_error_response() {
        let (mut h, mut ch) = attach(&Builder::new());

        h.read(&mut ch, Inbound::Request(get("/a")));

        let mut preface =
            RequestHead::new(Method::from_bytes(b"PRI").unwrap(), "*".parse().unwrap());
        preface.version = Version::HTTP_2;
        h.read(&mut ch, Inbound::Request(preface));

        assert!(!h.is_persistent());
        assert_eq!(h.pending_responses(), 1);
        // 只有 /a 被转发
        assert_eq!(ch.fired.len(), 1);

        let (msg, promise) = ch.last_written();
        match *msg {
            Outbound::Full(ref full) => {
                assert_eq!(full.head.status, StatusCode::BAD_REQUEST);
                assert_eq!(full.head.headers.get(CONNECTION).unwrap(), "close");
                assert_eq!(full.head.headers.get(CONTENT_LENGTH).unwrap(), "0");
                assert!(full.body.is_empty());
            }
            ref other => panic!("expected error response: {:?}", other),
        }
        assert!(promise.wants_close());
        assert_eq!(ch.flushes, 1);
    }

    #[test]
    fn decode_failure_synthesizes_error_response() {
        let (mut h, mut ch) = attach(&Builder::new());

        let mut head = get("/bad");
        head.decode = DecodeResult::failure(io::Error::new(
            io::ErrorKind::InvalidData,
            "bad chunk size",
        ));
        h.read(&mut ch, Inbound::Request(head));

        assert!(!h.is_persistent());
        assert!(ch.fired.is_empty());
        match ch.last_written().0 {
            Outbound::Full(ref full) => assert_eq!(full.head.status, StatusCode::BAD_REQUEST),
            ref other => panic!("expected error response: {:?}", other),
        }
        assert!(ch.last_written().1.wants_close());
    }

    #[test]
    fn response_without_framing_forces_close() {
        let (mut h, mut ch) = attach(&Builder::new());
        h.read(&mut ch, Inbound::Request(get("/a")));

        // 没有 Content-Length 也不是 chunked 的响应头
        h.write(
            &mut ch,
            Outbound::Response(ResponseHead::new(StatusCode::OK)),
            WritePromise::detached(),
        );
        assert!(!h.is_persistent());
        assert_eq!(h.pending_responses(), 0);
        assert_eq!(ch.written_head(0).headers.get(CONNECTION).unwrap(), "close");

        // 内容照常转发
        h.write(
            &mut ch,
            Outbound::Content(Content::new(Bytes::from_static(b"hello"))),
            WritePromise::detached(),
        );
        assert_eq!(ch.written.len(), 2);

        // 末块带上完成后关闭的标记
        h.write(
            &mut ch,
            Outbound::Last(LastContent::empty()),
            WritePromise::detached(),
        );
        assert!(ch.last_written().1.wants_close());
    }

    #[test]
    fn chunked_response_preserves_keep_alive() {
        let (mut h, mut ch) = attach(&Builder::new());
        h.read(&mut ch, Inbound::Request(get("/a")));

        let mut head = ResponseHead::new(StatusCode::OK);
        head.headers
            .insert(TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        h.write(&mut ch, Outbound::Response(head), WritePromise::detached());
        assert!(h.is_persistent());
        assert!(ch.written_head(0).headers.get(CONNECTION).is_none());

        h.write(
            &mut ch,
            Outbound::Last(LastContent::empty()),
            WritePromise::detached(),
        );
        assert!(!ch.last_written().1.wants_close());
        assert_eq!(h.state.phase(), Phase::Idle);
    }

    #[test]
    fn idle_inbound_content_rules() {
        let (mut h, mut ch) = attach(&Builder::new());

        // 完成一次往返，连接回到空闲
        h.read(&mut ch, Inbound::Request(get("/a")));
        h.write(&mut ch, full_ok(), WritePromise::detached());
        assert_eq!(h.state.phase(), Phase::Idle);
        let fired_before = ch.fired.len();
        let reads_before = ch.reads_requested;

        // 空末块标记总是被转发
        h.read(&mut ch, Inbound::Last(LastContent::empty()));
        assert_eq!(ch.fired.len(), fired_before + 1);
        assert_eq!(ch.reads_requested, reads_before + 1);

        // 非末块内容被丢弃，但仍然索取下一次读
        h.read(
            &mut ch,
            Inbound::Content(Content::new(Bytes::from_static(b"stray"))),
        );
        assert_eq!(ch.fired.len(), fired_before + 1);
        assert_eq!(ch.reads_requested, reads_before + 2);

        // 非空末块经解码检查后转发
        h.read(
            &mut ch,
            Inbound::Last(LastContent::new(Bytes::from_static(b"tail"))),
        );
        assert_eq!(ch.fired.len(), fired_before + 2);
        assert_eq!(ch.reads_requested, reads_before + 3);
    }

    #[test]
    fn late_outbound_content_completes_promise_without_forwarding() {
        let (mut h, mut ch) = attach(&Builder::new());
        h.read(&mut ch, Inbound::Request(get("/a")));
        h.write(&mut ch, full_ok(), WritePromise::detached());
        let written = ch.written.len();

        let (promise, mut complete) = WritePromise::new();
        h.write(
            &mut ch,
            Outbound::Content(Content::new(Bytes::from_static(b"late"))),
            promise,
        );
        assert_eq!(ch.written.len(), written);
        assert!(complete.try_done().unwrap().is_ok());
    }

    #[test]
    fn max_keep_alive_requests_closes_connection() {
        let mut builder = Builder::new();
        builder.max_keep_alive_requests(3);
        let (mut h, mut ch) = attach(&builder);

        h.read(&mut ch, Inbound::Request(get("/1")));
        h.read(&mut ch, Inbound::Request(get("/2")));
        h.read(&mut ch, Inbound::Request(get("/3")));
        h.read(&mut ch, Inbound::Request(get("/4")));
        assert_eq!(h.pending_responses(), 4);

        h.write(&mut ch, full_ok(), WritePromise::detached());
        h.drain(&mut ch);
        h.write(&mut ch, full_ok(), WritePromise::detached());
        h.drain(&mut ch);
        assert_eq!(ch.bound.len(), 3);

        // 第 3 个响应头写出时已服务请求数到达上限
        h.write(&mut ch, full_ok(), WritePromise::detached());
        assert!(!h.is_persistent());
        assert_eq!(h.pending_responses(), 0);
        assert_eq!(ch.written_head(2).headers.get(CONNECTION).unwrap(), "close");
        assert!(ch.last_written().1.wants_close());
        // 不再调度排空，第 4 个请求留在队列里
        assert_eq!(ch.drains_scheduled, 2);
        assert_eq!(ch.bound.len(), 3);

        // 拆除时队列中剩余条目被释放
        h.handler_removed();
        assert!(h.state.pipelined.is_none());
    }

    #[test]
    fn flush_coalesced_to_read_boundary() {
        let mut builder = Builder::new();
        builder.last_flush_when_no_read(true);
        let (mut h, mut ch) = attach(&builder);

        // 读批次进行中
        h.read(&mut ch, Inbound::Request(get("/a")));
        let mut head = ResponseHead::new(StatusCode::OK);
        head.headers
            .insert(TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        h.write(&mut ch, Outbound::Response(head), WritePromise::detached());
        h.write(
            &mut ch,
            Outbound::Content(Content::new(Bytes::from_static(b"he"))),
            WritePromise::detached(),
        );
        h.write(
            &mut ch,
            Outbound::Content(Content::new(Bytes::from_static(b"llo"))),
            WritePromise::detached(),
        );
        h.write(
            &mut ch,
            Outbound::Last(LastContent::empty()),
            WritePromise::detached(),
        );

        // 收尾阶段的冲刷被推迟
        h.flush(&mut ch);
        assert_eq!(ch.flushes, 0);

        // 读批次边界上恰好补一次冲刷
        h.read_complete(&mut ch);
        assert_eq!(ch.flushes, 1);

        // 没有新的读批次就没有新的冲刷
        h.read_complete(&mut ch);
        assert_eq!(ch.flushes, 1);
    }

    #[test]
    fn backpressure_forces_immediate_flush() {
        let mut builder = Builder::new();
        builder.last_flush_when_no_read(true);
        let (mut h, mut ch) = attach(&builder);

        h.read(&mut ch, Inbound::Request(get("/a")));
        h.write(&mut ch, full_ok(), WritePromise::detached());

        ch.writable = false;
        h.flush(&mut ch);
        assert_eq!(ch.flushes, 1);
        assert!(!h.state.needs_flush);
    }

    #[test]
    fn coalescing_mode_terminates_inflight_response_on_new_request() {
        let mut builder = Builder::new();
        builder.last_flush_when_no_read(true);
        let (mut h, mut ch) = attach(&builder);

        h.read(&mut ch, Inbound::Request(get("/a")));
        assert_eq!(ch.terminated, 1);
        h.write(&mut ch, full_ok(), WritePromise::detached());

        // 终端写入在途时新请求到达，先强制终结上一个出站操作
        h.read(&mut ch, Inbound::Request(get("/b")));
        assert_eq!(ch.terminated, 2);
    }

    #[test]
    fn continue_response_passes_through_without_accounting() {
        let (mut h, mut ch) = attach(&Builder::new());
        h.read(&mut ch, Inbound::Request(get("/upload")));

        h.write(
            &mut ch,
            Outbound::Response(ResponseHead::new(StatusCode::CONTINUE)),
            WritePromise::detached(),
        );
        assert_eq!(h.pending_responses(), 1);
        assert!(h.is_persistent());

        h.write(&mut ch, full_ok(), WritePromise::detached());
        assert_eq!(h.pending_responses(), 0);
        assert!(h.is_persistent());
    }

    #[test]
    fn full_continue_skips_last_content_accounting() {
        let (mut h, mut ch) = attach(&Builder::new());
        h.read(&mut ch, Inbound::Request(get("/upload")));

        h.write(
            &mut ch,
            Outbound::Full(FullResponse::new(
                ResponseHead::new(StatusCode::CONTINUE),
                Bytes::new(),
            )),
            WritePromise::detached(),
        );
        assert_eq!(h.pending_responses(), 1);
        // 没有触发回到空闲的读
        assert_eq!(ch.reads_requested, 1);
    }

    struct RecordingObserver {
        states: Mutex<Vec<ObservedState>>,
    }

    impl ConnectionObserver for RecordingObserver {
        fn on_state_change(&self, _ops: &Operations, state: ObservedState) {
            self.states.lock().unwrap().push(state);
        }
    }

    #[test]
    fn observer_notified_when_request_bound() {
        let observer = Arc::new(RecordingObserver {
            states: Mutex::new(Vec::new()),
        });
        let mut builder = Builder::new();
        builder.observer(observer.clone());
        let (mut h, mut ch) = attach(&builder);

        h.read(&mut ch, Inbound::Request(get("/a")));
        assert_eq!(
            *observer.states.lock().unwrap(),
            vec![ObservedState::Configured]
        );
    }

    #[test]
    fn forwarded_handler_rewrites_connection_info() {
        let rewritten = SocketAddr::from(([10, 0, 0, 7], 443));
        let forwarded: ForwardedHeaderHandler =
            Arc::new(move |info, _head| Ok(info.with_remote_addr(rewritten)));
        let mut builder = Builder::new();
        builder.forwarded_header_handler(forwarded);
        let (mut h, mut ch) = attach(&builder);

        h.read(&mut ch, Inbound::Request(get("/a")));
        assert_eq!(ch.bound[0].connection_info().remote_addr(), rewritten);
    }

    #[test]
    fn forwarded_handler_failure_rejects_request() {
        let forwarded: ForwardedHeaderHandler = Arc::new(|_info, _head| {
            Err(Box::from(io::Error::new(
                io::ErrorKind::InvalidData,
                "bad forwarded header",
            )))
        });
        let mut builder = Builder::new();
        builder.forwarded_header_handler(forwarded);
        let (mut h, mut ch) = attach(&builder);

        h.read(&mut ch, Inbound::Request(get("/a")));
        assert!(!h.is_persistent());
        assert!(ch.bound.is_empty());
        assert!(ch.fired.is_empty());
        assert!(ch.last_written().1.wants_close());
    }

    #[test]
    fn proxy_protocol_address_preferred() {
        let peer = SocketAddr::from(([192, 168, 1, 9], 7000));
        let (mut h, mut ch) = attach(&Builder::new());
        ch.proxy_peer = Some(peer);

        h.read(&mut ch, Inbound::Request(get("/a")));
        assert_eq!(ch.bound[0].connection_info().remote_addr(), peer);
    }

    #[test]
    fn tls_presence_sets_https_scheme() {
        let (mut h, mut ch) = attach(&Builder::new());
        ch.secure = true;

        h.read(&mut ch, Inbound::Request(get("/a")));
        assert_eq!(
            ch.bound[0].connection_info().scheme(),
            &http::uri::Scheme::HTTPS
        );
        assert!(ch.bound[0].is_secure());
    }

    #[test]
    fn idle_timeout_stage_follows_idle_transitions() {
        let mut builder = Builder::new();
        builder.idle_timeout(Some(Duration::from_secs(30)));
        let (mut h, mut ch) = attach(&builder);
        assert_eq!(ch.idle_installed, 1);

        h.read(&mut ch, Inbound::Request(get("/a")));
        assert_eq!(ch.idle_removed, 1);

        h.write(&mut ch, full_ok(), WritePromise::detached());
        assert_eq!(ch.idle_installed, 2);
    }

    #[test]
    fn buffered_decode_failure_discards_rest_of_queue() {
        let (mut h, mut ch) = attach(&Builder::new());
        h.read(&mut ch, Inbound::Request(get("/a")));

        let mut bad = get("/bad");
        bad.decode = DecodeResult::failure(io::Error::new(io::ErrorKind::InvalidData, "broken"));
        h.read(&mut ch, Inbound::Request(bad));
        h.read(&mut ch, Inbound::Request(get("/c")));

        h.write(&mut ch, full_ok(), WritePromise::detached());
        assert_eq!(ch.drains_scheduled, 1);
        h.drain(&mut ch);

        assert!(!h.is_persistent());
        // /bad 被拒绝，/c 连同队列一起被丢弃
        assert_eq!(ch.bound.len(), 1);
        assert!(ch.last_written().1.wants_close());
        assert_eq!(h.state.queued(), 0);
    }
}
