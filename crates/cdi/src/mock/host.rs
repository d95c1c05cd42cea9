//! Mock 主控制器

use alloc::boxed::Box;
use alloc::collections::VecDeque;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;

use sync::SpinLock;

use crate::usb::{
    Completion, Direction, EndpointKey, HostController, TransferEngine, TransferId,
    TransferRequest, TransferStatus, UsbError,
};

/// 应答器对一个请求的处理方式
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockReply {
    /// 在 `enqueue` 内直接完成；IN 请求携带数据
    Complete(TransferStatus, Vec<u8>),
    /// 挂起，等待 [`MockHostController::complete_next`]
    Defer,
    /// 拒绝入队
    Reject(UsbError),
}

/// 应答器
pub type Responder = Box<dyn FnMut(&TransferRequest) -> MockReply + Send>;

/// 可编程应答的主控制器
///
/// 没有设置应答器时所有请求都挂起。应答器调用期间不持有任何锁；
/// 在应答器或完成回调中再次入队的请求同样挂起。
pub struct MockHostController {
    engine: SpinLock<Weak<TransferEngine>>,
    responder: SpinLock<Option<Responder>>,
    deferred: SpinLock<VecDeque<TransferRequest>>,
    history: SpinLock<Vec<TransferRequest>>,
    cancelled: SpinLock<Vec<TransferId>>,
}

impl MockHostController {
    /// 创建控制器
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            engine: SpinLock::new(Weak::new()),
            responder: SpinLock::new(None),
            deferred: SpinLock::new(VecDeque::new()),
            history: SpinLock::new(Vec::new()),
            cancelled: SpinLock::new(Vec::new()),
        })
    }

    /// 关联传输引擎，用于报告完成
    pub fn attach_engine(&self, engine: &Arc<TransferEngine>) {
        *self.engine.lock() = Arc::downgrade(engine);
    }

    /// 设置应答器
    pub fn set_responder(
        &self,
        responder: impl FnMut(&TransferRequest) -> MockReply + Send + 'static,
    ) {
        *self.responder.lock() = Some(Box::new(responder));
    }

    /// 移除应答器，之后的请求全部挂起
    pub fn clear_responder(&self) {
        self.responder.lock().take();
    }

    /// 完成端点上最早挂起的请求
    ///
    /// 没有挂起的请求时返回 `false`。
    pub fn complete_next(&self, key: EndpointKey, status: TransferStatus, data: &[u8]) -> bool {
        let request = {
            let mut deferred = self.deferred.lock();
            let Some(pos) = deferred.iter().position(|r| r.key == key) else {
                return false;
            };
            deferred.remove(pos)
        };
        let Some(request) = request else {
            return false;
        };
        self.report(&request, status, data);
        true
    }

    /// 挂起的请求数
    pub fn deferred_len(&self) -> usize {
        self.deferred.lock().len()
    }

    /// 挂起的请求
    pub fn deferred(&self) -> Vec<TransferRequest> {
        self.deferred.lock().iter().cloned().collect()
    }

    /// 所有入队过的请求（含被拒绝的）
    pub fn requests(&self) -> Vec<TransferRequest> {
        self.history.lock().clone()
    }

    /// 最近一次入队的请求
    pub fn last_request(&self) -> Option<TransferRequest> {
        self.history.lock().last().cloned()
    }

    /// 某个传输入队的次数（re-arm 复用同一标识）
    pub fn enqueue_count(&self, id: TransferId) -> usize {
        self.history.lock().iter().filter(|r| r.id == id).count()
    }

    /// 被取消的传输
    pub fn cancelled(&self) -> Vec<TransferId> {
        self.cancelled.lock().clone()
    }

    fn report(&self, request: &TransferRequest, status: TransferStatus, data: &[u8]) {
        let Some(engine) = self.engine.lock().upgrade() else {
            return;
        };
        let is_in = match request.setup {
            Some(setup) => setup.is_in(),
            None => request.endpoint.direction() == Direction::In,
        };
        let completion = if is_in {
            Completion::Received(data)
        } else if status == TransferStatus::Success {
            Completion::Sent(request.length)
        } else {
            Completion::Empty
        };
        engine.complete(request.key, status, completion);
    }
}

impl HostController for MockHostController {
    fn name(&self) -> &str {
        "mock-hc"
    }

    fn enqueue(&self, request: &TransferRequest) -> Result<(), UsbError> {
        self.history.lock().push(request.clone());

        // 调用期间把应答器取出来，嵌套入队看到的是“没有应答器”
        let responder = self.responder.lock().take();
        let reply = match responder {
            Some(mut responder) => {
                let reply = responder(request);
                let mut slot = self.responder.lock();
                if slot.is_none() {
                    *slot = Some(responder);
                }
                reply
            }
            None => MockReply::Defer,
        };

        match reply {
            MockReply::Defer => {
                self.deferred.lock().push_back(request.clone());
                Ok(())
            }
            MockReply::Reject(e) => Err(e),
            MockReply::Complete(status, data) => {
                self.report(request, status, &data);
                Ok(())
            }
        }
    }

    fn cancel(&self, id: TransferId) {
        self.cancelled.lock().push(id);
        self.deferred.lock().retain(|r| r.id != id);
    }
}
