//! 运行时与传输层接缝模块。
//!
//! 流量处理器本身不做任何 IO，也从不阻塞：它通过本模块定义的
//! [`Channel`] trait 与所在连接的流水线交互。嵌入方（通常是某个异步
//! 运行时上的连接驱动循环）为自己的传输实现 `Channel`，并保证所有
//! 回调都在该连接的单线程执行器上串行执行——这条单线程约定就是
//! 每连接状态无须加锁的同步纪律。
//!
//! 出站写入通过 [`WritePromise`] / [`WriteComplete`] 这对一次性完成
//! 通道传递结果：处理器可以在转发前给承诺打上"完成后关闭连接"的
//! 标记，传输在物理写入完成后兑现承诺并按标记关闭连接。

// 标准库导入
use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

// futures-channel 的一次性通道，承诺完成信号的底层实现
use futures_channel::oneshot;

use crate::proto::{Inbound, Outbound};
use crate::server::Operations;

/// 连接流水线上下文：流量处理器与外界交互的唯一接缝。
///
/// 所有方法都必须在该连接的单线程执行器上被调用。实现方负责：
///
/// - 入站方向：`fire_read` 把消息继续传给应用处理器
/// - 出站方向：`write` 把消息交给编码器，`flush` 触发真正的冲刷
/// - 控制面：`request_read` 向传输索要下一批字节；`schedule_drain`
///   在同一执行器上调度一次 [`TrafficHandler::drain`] 调用，
///   与其他入站工作串行
///
/// [`TrafficHandler::drain`]: crate::TrafficHandler::drain
pub trait Channel {
    /// 把一个入站消息转发给应用处理器（所有权随之转移）。
    fn fire_read(&mut self, msg: Inbound);

    /// 绑定新接受请求的每请求操作对象。
    ///
    /// 在对应的请求头经由 `fire_read` 转发之前调用。
    fn bind(&mut self, ops: Operations);

    /// 强制终结当前尚在收尾的出站操作。
    ///
    /// 仅在冲刷合并模式下、新的请求头在上一个终端写入仍在途时被调用。
    fn terminate(&mut self);

    /// 把一个出站消息交给编码器。
    ///
    /// 传输必须在物理写入完成后兑现 `promise`（成功或失败），
    /// 且当被兑现的承诺带有关闭标记时关闭连接。
    fn write(&mut self, msg: Outbound, promise: WritePromise);

    /// 把缓冲的出站字节冲刷到套接字。
    fn flush(&mut self);

    /// 出站通道当前是否可写（未触发写背压）。
    fn is_writable(&self) -> bool;

    /// 请求传输读取下一批入站字节。
    fn request_read(&mut self);

    /// 在本连接的执行器上调度一次流水线队列排空。
    ///
    /// 实现必须保证排空任务与其他入站事件串行执行。
    fn schedule_drain(&mut self);

    /// 在流水线中插入空闲超时阶段。
    fn install_idle_timeout(&mut self, timeout: Duration);

    /// 从流水线中移除空闲超时阶段。
    fn remove_idle_timeout(&mut self);

    /// 入站流水线中是否存在更早的 TLS 阶段。
    fn is_secure(&self) -> bool;

    /// 套接字本端地址。
    fn local_addr(&self) -> SocketAddr;

    /// 套接字对端地址。
    fn remote_addr(&self) -> SocketAddr;

    /// 可选的代理协议（proxy-protocol）前导所解析出的真实对端地址。
    fn proxy_peer_addr(&self) -> Option<SocketAddr> {
        None
    }
}

/// 出站写入的完成承诺。
///
/// 由 [`WritePromise::new`] 与 [`WriteComplete`] 成对创建。处理器可能
/// 自行兑现承诺（内容因响应已完结而被丢弃时直接置为成功），也可能
/// 先打上关闭标记再随消息转发给传输。
pub struct WritePromise {
    tx: Option<oneshot::Sender<crate::Result<()>>>,
    close_on_complete: bool,
}

impl WritePromise {
    /// 创建一对承诺与完成句柄。
    pub fn new() -> (WritePromise, WriteComplete) {
        let (tx, rx) = oneshot::channel();
        (
            WritePromise {
                tx: Some(tx),
                close_on_complete: false,
            },
            WriteComplete { rx },
        )
    }

    /// 创建无人监听完成信号的承诺。
    pub fn detached() -> WritePromise {
        WritePromise {
            tx: None,
            close_on_complete: false,
        }
    }

    /// 给承诺打上"完成后关闭连接"的标记。
    pub(crate) fn set_close_on_complete(&mut self) {
        self.close_on_complete = true;
    }

    /// 该写入完成后是否必须关闭连接。
    pub fn wants_close(&self) -> bool {
        self.close_on_complete
    }

    /// 以成功兑现承诺。
    pub fn succeed(mut self) {
        if let Some(tx) = self.tx.take() {
            // 接收端可能已被丢弃，忽略发送失败
            let _ = tx.send(Ok(()));
        }
    }

    /// 以失败兑现承诺。写入失败只影响该承诺，不改变连接的响应计数。
    pub fn fail(mut self, err: crate::Error) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Err(err));
        }
    }
}

impl fmt::Debug for WritePromise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WritePromise")
            .field("close_on_complete", &self.close_on_complete)
            .field("completed", &self.tx.is_none())
            .finish()
    }
}

/// 出站写入的完成句柄。
///
/// 作为 `Future` 轮询时在写入完成后产出结果；承诺在未兑现时被丢弃
/// 则产出取消错误。
#[derive(Debug)]
pub struct WriteComplete {
    rx: oneshot::Receiver<crate::Result<()>>,
}

impl WriteComplete {
    /// 非阻塞地查询完成结果。
    ///
    /// 尚未完成时返回 `None`；承诺被丢弃时返回取消错误。
    pub fn try_done(&mut self) -> Option<crate::Result<()>> {
        match self.rx.try_recv() {
            Ok(Some(result)) => Some(result),
            Ok(None) => None,
            Err(_canceled) => Some(Err(crate::Error::new_canceled())),
        }
    }
}

impl Future for WriteComplete {
    type Output = crate::Result<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_canceled)) => Poll::Ready(Err(crate::Error::new_canceled())),
            Poll::Pending => Poll::Pending,
        }
    }
}
