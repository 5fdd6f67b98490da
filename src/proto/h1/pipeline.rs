//! 流水线队列模块。
//!
//! 客户端在上一个响应尚未写完时发来的后续消息会被推迟：请求头连同
//! 入队时捕获的到达时刻包成 [`RequestHolder`]，其后的消息体部件按原序
//! 跟随。队列是惰性分配的无界 FIFO，排空只由调度器驱动；
//! 连接拆除时队列中剩余的条目被一次性释放。
//!
//! 到达时刻在入队时捕获而不是派发时捕获，这样被流水线推迟的请求
//! 仍然保有准确的请求起始时间。

// 标准库导入
use std::collections::VecDeque;
use std::time::Instant;

use crate::proto::{Content, Inbound, LastContent, RequestHead};

/// 被推迟的请求头与它的到达时刻。
#[derive(Debug)]
pub(crate) struct RequestHolder {
    head: RequestHead,
    timestamp: Instant,
}

impl RequestHolder {
    /// 包住请求头并捕获当前时刻。
    pub(crate) fn new(head: RequestHead) -> RequestHolder {
        RequestHolder {
            head,
            timestamp: Instant::now(),
        }
    }

    /// 拆出请求头与入队时捕获的到达时刻。
    pub(crate) fn into_parts(self) -> (RequestHead, Instant) {
        (self.head, self.timestamp)
    }
}

/// 队列中的一个被推迟条目。
///
/// 排空循环据此走一个直白的状态机：派发一个请求头，
/// 然后转发其后的消息体部件，直到遇见下一个请求头或队列见底。
#[derive(Debug)]
pub(crate) enum Deferred {
    /// 被推迟的请求头（含到达时刻）
    Request(RequestHolder),
    /// 被推迟请求的消息体分块
    Content(Content),
    /// 被推迟请求的消息体末块
    Last(LastContent),
}

impl From<Inbound> for Deferred {
    fn from(msg: Inbound) -> Deferred {
        match msg {
            Inbound::Request(head) => Deferred::Request(RequestHolder::new(head)),
            Inbound::Content(content) => Deferred::Content(content),
            Inbound::Last(last) => Deferred::Last(last),
        }
    }
}

/// 惰性分配的无界流水线队列。
#[derive(Debug)]
pub(crate) struct Pipelined {
    queue: VecDeque<Deferred>,
}

impl Pipelined {
    pub(crate) fn new() -> Pipelined {
        Pipelined {
            queue: VecDeque::new(),
        }
    }

    /// 追加一个被推迟条目。队列无界，追加不会失败。
    pub(crate) fn push(&mut self, item: Deferred) {
        self.queue.push_back(item);
    }

    /// 窥视队首条目。
    pub(crate) fn peek(&self) -> Option<&Deferred> {
        self.queue.front()
    }

    /// 取出队首条目。
    pub(crate) fn pop(&mut self) -> Option<Deferred> {
        self.queue.pop_front()
    }

    /// 当前排队条目数。
    pub(crate) fn len(&self) -> usize {
        self.queue.len()
    }

    /// 队列是否为空。
    pub(crate) fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// 释放所有剩余条目。每个条目被 drop 恰好一次。
    pub(crate) fn discard(&mut self) {
        debug!("discarding {} deferred item(s)", self.queue.len());
        self.queue.clear();
    }
}
