//! 传输引擎
//!
//! 负责端点 I/O 的异步提交与完成：
//!
//! - [`TransferEngine::submit`] 把 [`Transfer`] 移交给引擎并立即返回，调用方在完成前
//!   不再持有缓冲区；
//! - 主控制器在完成时调用 [`TransferEngine::complete`]，引擎总是完成该端点上最早提交的
//!   传输，设置状态和实际长度，并在不持锁的情况下同步调用完成回调；
//! - 设置了 re-arm 且成功完成的传输在回调返回后用同一个标识重新提交；
//! - [`TransferEngine::abort`] 和 [`TransferEngine::fence_device`] 是同步的：返回后
//!   被取消的传输不会再完成，也不会再 re-arm。
//!
//! 完成回调运行在中断延伸上下文中，必须短小且不阻塞。

use alloc::boxed::Box;
use alloc::collections::{BTreeMap, BTreeSet, VecDeque};
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicUsize, Ordering};

use sync::{IntrGuard, SpinLock};

use super::descriptor::SetupPacket;
use super::device::{Direction, Endpoint, TransferType, UsbDevice};
use super::error::UsbError;
use super::host::{Completion, EndpointKey, HostController, TransferId, TransferRequest};
use crate::ops::{deadline_after, sched_ops};

/// 传输状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    /// 尚未完成
    Pending,
    /// 成功
    Success,
    /// 端点 STALL
    Stalled,
    /// 超时
    TimedOut,
    /// 被取消，不会 re-arm
    Aborted,
}

impl TransferStatus {
    /// 转换为结果
    pub fn into_result(self) -> Result<(), UsbError> {
        match self {
            TransferStatus::Success => Ok(()),
            TransferStatus::Stalled => Err(UsbError::Stalled),
            TransferStatus::TimedOut => Err(UsbError::TimedOut),
            TransferStatus::Aborted => Err(UsbError::Aborted),
            TransferStatus::Pending => Err(UsbError::InvalidState),
        }
    }
}

/// 完成回调
pub type CompletionFn = Box<dyn FnMut(&mut Transfer) + Send>;

/// 一次端点 I/O
///
/// 提交时所有权移交给引擎，完成回调拿到 `&mut Transfer`，可以通过
/// [`take_data`](Transfer::take_data) 取走缓冲区。
pub struct Transfer {
    id: Option<TransferId>,
    key: EndpointKey,
    endpoint: Endpoint,
    setup: Option<SetupPacket>,
    buffer: Vec<u8>,
    length: usize,
    actual: usize,
    status: TransferStatus,
    rearm: bool,
    completion: Option<CompletionFn>,
}

impl Transfer {
    fn new(
        device: u8,
        endpoint: Endpoint,
        setup: Option<SetupPacket>,
        buffer: Vec<u8>,
    ) -> Self {
        Self {
            id: None,
            key: EndpointKey::new(device, &endpoint),
            endpoint,
            setup,
            length: buffer.len(),
            buffer,
            actual: 0,
            status: TransferStatus::Pending,
            rearm: false,
            completion: None,
        }
    }

    /// 设备到主机的控制传输
    pub fn control_in(device: &UsbDevice, setup: SetupPacket) -> Result<Self, UsbError> {
        if !setup.is_in() {
            return Err(UsbError::EndpointMismatch);
        }
        let buffer = vec![0u8; setup.length as usize];
        Ok(Self::new(device.address(), device.ep0(), Some(setup), buffer))
    }

    /// 主机到设备的控制传输，`data` 的长度必须等于 `setup.length`
    pub fn control_out(
        device: &UsbDevice,
        setup: SetupPacket,
        data: Vec<u8>,
    ) -> Result<Self, UsbError> {
        if setup.is_in() || data.len() != setup.length as usize {
            return Err(UsbError::EndpointMismatch);
        }
        Ok(Self::new(device.address(), device.ep0(), Some(setup), data))
    }

    fn data_stage(
        device: &UsbDevice,
        endpoint: Endpoint,
        ty: TransferType,
        dir: Direction,
        buffer: Vec<u8>,
    ) -> Result<Self, UsbError> {
        if endpoint.transfer_type() != ty || endpoint.direction() != dir {
            return Err(UsbError::EndpointMismatch);
        }
        Ok(Self::new(device.address(), endpoint, None, buffer))
    }

    /// 批量 IN，读取 `buffer.len()` 字节
    pub fn bulk_in(device: &UsbDevice, endpoint: Endpoint, buffer: Vec<u8>) -> Result<Self, UsbError> {
        Self::data_stage(device, endpoint, TransferType::Bulk, Direction::In, buffer)
    }

    /// 批量 OUT
    pub fn bulk_out(device: &UsbDevice, endpoint: Endpoint, data: Vec<u8>) -> Result<Self, UsbError> {
        Self::data_stage(device, endpoint, TransferType::Bulk, Direction::Out, data)
    }

    /// 中断 IN
    pub fn interrupt_in(
        device: &UsbDevice,
        endpoint: Endpoint,
        buffer: Vec<u8>,
    ) -> Result<Self, UsbError> {
        Self::data_stage(device, endpoint, TransferType::Interrupt, Direction::In, buffer)
    }

    /// 设置完成回调
    pub fn with_completion(mut self, f: impl FnMut(&mut Transfer) + Send + 'static) -> Self {
        self.completion = Some(Box::new(f));
        self
    }

    /// 成功完成后自动重新提交
    pub fn with_rearm(mut self) -> Self {
        self.rearm = true;
        self
    }

    /// 传输标识，提交后才有
    pub fn id(&self) -> Option<TransferId> {
        self.id
    }

    /// 端点键
    pub fn key(&self) -> EndpointKey {
        self.key
    }

    /// 目标端点
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// 状态
    pub fn status(&self) -> TransferStatus {
        self.status
    }

    /// 请求长度
    pub fn length(&self) -> usize {
        self.length
    }

    /// 实际传输的字节数
    pub fn actual_length(&self) -> usize {
        self.actual
    }

    /// 已传输的数据
    pub fn data(&self) -> &[u8] {
        &self.buffer[..self.actual.min(self.buffer.len())]
    }

    /// 取走缓冲区（截断到实际长度）
    ///
    /// re-arm 时引擎会重新分配同样长度的缓冲区。
    pub fn take_data(&mut self) -> Vec<u8> {
        let mut buffer = core::mem::take(&mut self.buffer);
        buffer.truncate(self.actual);
        buffer
    }

    /// 是否会 re-arm
    pub fn is_rearm(&self) -> bool {
        self.rearm
    }

    /// 在回调中开启或关闭 re-arm
    pub fn set_rearm(&mut self, rearm: bool) {
        self.rearm = rearm;
    }

    fn is_in(&self) -> bool {
        match self.setup {
            Some(setup) => setup.is_in(),
            None => self.endpoint.direction() == Direction::In,
        }
    }

    fn request(&self, id: TransferId) -> TransferRequest {
        TransferRequest {
            id,
            key: self.key,
            endpoint: self.endpoint,
            setup: self.setup,
            data: if self.is_in() {
                Vec::new()
            } else {
                self.buffer.clone()
            },
            length: self.length,
        }
    }

    fn invoke_completion(&mut self) {
        if let Some(mut cb) = self.completion.take() {
            cb(self);
            self.completion = Some(cb);
        }
    }
}

impl core::fmt::Debug for Transfer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Transfer")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("length", &self.length)
            .field("actual", &self.actual)
            .field("status", &self.status)
            .field("rearm", &self.rearm)
            .finish()
    }
}

#[derive(Default)]
struct EndpointQueue {
    pending: VecDeque<Transfer>,
    halted: bool,
}

/// 正在执行完成回调的传输
struct InFlight {
    device: u8,
    abort: bool,
}

#[derive(Default)]
struct EngineState {
    queues: BTreeMap<EndpointKey, EndpointQueue>,
    fenced: BTreeSet<u8>,
    completing: BTreeMap<TransferId, InFlight>,
}

/// 传输引擎
pub struct TransferEngine {
    host: Arc<dyn HostController>,
    next_id: AtomicUsize,
    state: SpinLock<EngineState>,
}

impl TransferEngine {
    /// 在主控制器之上创建引擎
    pub fn new(host: Arc<dyn HostController>) -> Arc<Self> {
        Arc::new(Self {
            host,
            next_id: AtomicUsize::new(1),
            state: SpinLock::new(EngineState::default()),
        })
    }

    /// 主控制器名
    pub fn host_name(&self) -> &str {
        self.host.name()
    }

    /// 异步提交
    pub fn submit(&self, transfer: Transfer) -> Result<TransferId, UsbError> {
        self.submit_inner(transfer).map_err(|(e, _)| e)
    }

    /// 提交；失败时尽量把传输交还调用者
    fn submit_inner(
        &self,
        mut transfer: Transfer,
    ) -> Result<TransferId, (UsbError, Option<Transfer>)> {
        if transfer.endpoint.transfer_type() == TransferType::Isochronous {
            return Err((UsbError::NotSupported, Some(transfer)));
        }

        let id = *transfer
            .id
            .get_or_insert_with(|| TransferId(self.next_id.fetch_add(1, Ordering::Relaxed)));
        transfer.status = TransferStatus::Pending;
        transfer.actual = 0;
        if transfer.buffer.len() < transfer.length {
            transfer.buffer.resize(transfer.length, 0);
        }
        let key = transfer.key;
        let request = transfer.request(id);

        {
            let mut state = self.state.lock();
            if state.fenced.contains(&key.device) {
                return Err((UsbError::NoDevice, Some(transfer)));
            }
            let queue = state.queues.entry(key).or_default();
            if queue.halted && !key.is_control() {
                return Err((UsbError::Halted, Some(transfer)));
            }
            queue.pending.push_back(transfer);
        }

        // 主控制器可能在 enqueue 内直接完成请求，此时不能持锁
        if let Err(e) = self.host.enqueue(&request) {
            log::warn!("usb: {} rejected {:?}: {}", self.host.name(), id, e);
            return Err((e, self.take_pending(key, id)));
        }
        Ok(id)
    }

    fn take_pending(&self, key: EndpointKey, id: TransferId) -> Option<Transfer> {
        let mut state = self.state.lock();
        let queue = state.queues.get_mut(&key)?;
        let pos = queue.pending.iter().position(|t| t.id == Some(id))?;
        queue.pending.remove(pos)
    }

    /// 主控制器报告端点上最早的一个传输已完成
    pub fn complete(&self, key: EndpointKey, status: TransferStatus, data: Completion<'_>) {
        let status = if status == TransferStatus::Pending {
            log::error!("usb: completion with pending status on {:?}", key);
            TransferStatus::Aborted
        } else {
            status
        };

        let mut transfer = {
            let mut state = self.state.lock();
            let Some(queue) = state.queues.get_mut(&key) else {
                log::warn!("usb: spurious completion on {:?}", key);
                return;
            };
            let Some(transfer) = queue.pending.pop_front() else {
                log::warn!("usb: spurious completion on {:?}", key);
                return;
            };
            if status == TransferStatus::Stalled && !key.is_control() {
                queue.halted = true;
            }
            if let Some(id) = transfer.id {
                state.completing.insert(
                    id,
                    InFlight {
                        device: key.device,
                        abort: false,
                    },
                );
            }
            transfer
        };

        transfer.status = status;
        transfer.actual = match data {
            Completion::Received(bytes) => {
                let n = bytes.len().min(transfer.length).min(transfer.buffer.len());
                transfer.buffer[..n].copy_from_slice(&bytes[..n]);
                n
            }
            Completion::Sent(n) => n.min(transfer.length),
            Completion::Empty => 0,
        };
        if status == TransferStatus::Stalled {
            log::debug!("usb: {:?} stalled", key);
        }

        self.finish(transfer);
    }

    /// 调用回调，然后按需 re-arm
    fn finish(&self, mut transfer: Transfer) {
        let Some(id) = transfer.id else {
            return;
        };
        transfer.invoke_completion();

        let abort_requested = self
            .state
            .lock()
            .completing
            .remove(&id)
            .is_some_and(|f| f.abort);
        if abort_requested {
            transfer.status = TransferStatus::Aborted;
            transfer.invoke_completion();
            return;
        }

        if transfer.status != TransferStatus::Success || !transfer.rearm {
            return;
        }
        if let Err((e, transfer)) = self.submit_inner(transfer) {
            // re-arm 失败：回调再收到一次 Aborted，轮询就此结束
            log::warn!("usb: re-arm of {:?} failed: {}", id, e);
            if let Some(mut transfer) = transfer {
                transfer.status = TransferStatus::Aborted;
                transfer.actual = 0;
                transfer.invoke_completion();
            }
        }
    }

    /// 取消一个传输
    ///
    /// 返回 `false` 表示该传输已经结束。
    pub fn abort(&self, id: TransferId) -> bool {
        let found = {
            let mut state = self.state.lock();
            let mut found = None;
            for queue in state.queues.values_mut() {
                if let Some(pos) = queue.pending.iter().position(|t| t.id == Some(id)) {
                    found = queue.pending.remove(pos);
                    break;
                }
            }
            if found.is_none() {
                // 回调正在执行：阻止其 re-arm
                if let Some(flight) = state.completing.get_mut(&id) {
                    flight.abort = true;
                    return true;
                }
            }
            found
        };

        let Some(mut transfer) = found else {
            return false;
        };
        self.host.cancel(id);
        transfer.status = TransferStatus::Aborted;
        transfer.actual = 0;
        transfer.invoke_completion();
        log::debug!("usb: aborted {:?}", id);
        true
    }

    /// 隔离设备：取消该地址上的所有传输并拒绝后续提交
    ///
    /// 返回被取消的传输数。
    pub fn fence_device(&self, address: u8) -> usize {
        let drained: Vec<Transfer> = {
            let mut state = self.state.lock();
            state.fenced.insert(address);
            let keys: Vec<EndpointKey> = state
                .queues
                .keys()
                .filter(|k| k.device == address)
                .copied()
                .collect();
            let mut drained = Vec::new();
            for key in keys {
                if let Some(queue) = state.queues.remove(&key) {
                    drained.extend(queue.pending);
                }
            }
            for flight in state.completing.values_mut() {
                if flight.device == address {
                    flight.abort = true;
                }
            }
            drained
        };

        let count = drained.len();
        for mut transfer in drained {
            if let Some(id) = transfer.id {
                self.host.cancel(id);
            }
            transfer.status = TransferStatus::Aborted;
            transfer.actual = 0;
            transfer.invoke_completion();
        }
        log::debug!("usb: fenced address {}, {} transfers aborted", address, count);
        count
    }

    /// 解除隔离（地址被回收后调用）
    pub fn unfence_device(&self, address: u8) {
        self.state.lock().fenced.remove(&address);
    }

    /// 地址是否被隔离
    pub fn is_fenced(&self, address: u8) -> bool {
        self.state.lock().fenced.contains(&address)
    }

    /// 端点是否处于 halt 状态
    pub fn is_halted(&self, key: EndpointKey) -> bool {
        self.state
            .lock()
            .queues
            .get(&key)
            .is_some_and(|q| q.halted)
    }

    /// 设备上尚未完成的传输数
    pub fn pending_count(&self, address: u8) -> usize {
        self.state
            .lock()
            .queues
            .iter()
            .filter(|(k, _)| k.device == address)
            .map(|(_, q)| q.pending.len())
            .sum()
    }

    /// 提交并等待完成，返回实际传输的数据
    ///
    /// 会替换传输原有的回调并关闭 re-arm。超时后传输被取消并返回 `TimedOut`。
    /// 中断上下文中调用返回 `WouldBlock`。
    pub fn submit_and_wait(&self, transfer: Transfer, timeout_ms: u64) -> Result<Vec<u8>, UsbError> {
        if sync::in_interrupt() {
            return Err(UsbError::WouldBlock);
        }

        type Slot = SpinLock<Option<(TransferStatus, Vec<u8>)>>;
        let slot: Arc<Slot> = Arc::new(SpinLock::new(None));
        let channel = Arc::as_ptr(&slot) as usize;

        let result = slot.clone();
        let mut transfer = transfer.with_completion(move |t| {
            let data = t.take_data();
            *result.lock() = Some((t.status(), data));
            sched_ops().wake_all(channel);
        });
        transfer.rearm = false;

        let id = self.submit(transfer)?;
        let deadline = deadline_after(timeout_ms);
        loop {
            let _guard = IntrGuard::new();
            if let Some((status, data)) = slot.lock().take() {
                return status.into_result().map(|_| data);
            }
            if sched_ops().now_ms() >= deadline {
                break;
            }
            sched_ops().block_on(channel, deadline);
        }

        self.abort(id);
        let result = resolve_after_abort(slot.lock().take());
        if result == Err(UsbError::TimedOut) {
            log::debug!("usb: {:?} timed out after {} ms", id, timeout_ms);
        }
        result
    }

    /// 同步控制读
    pub fn control_in(
        &self,
        device: &UsbDevice,
        setup: SetupPacket,
        timeout_ms: u64,
    ) -> Result<Vec<u8>, UsbError> {
        device.ensure_present()?;
        self.submit_and_wait(Transfer::control_in(device, setup)?, timeout_ms)
    }

    /// 同步控制写
    pub fn control_out(
        &self,
        device: &UsbDevice,
        setup: SetupPacket,
        data: Vec<u8>,
        timeout_ms: u64,
    ) -> Result<(), UsbError> {
        device.ensure_present()?;
        self.submit_and_wait(Transfer::control_out(device, setup, data)?, timeout_ms)
            .map(|_| ())
    }

    /// 异步控制写，可在完成回调中调用
    pub fn control_out_async(
        &self,
        device: &UsbDevice,
        setup: SetupPacket,
        data: Vec<u8>,
        completion: impl FnMut(&mut Transfer) + Send + 'static,
    ) -> Result<TransferId, UsbError> {
        device.ensure_present()?;
        self.submit(Transfer::control_out(device, setup, data)?.with_completion(completion))
    }

    /// 清除端点 halt：CLEAR_FEATURE(ENDPOINT_HALT)，然后允许再次提交
    pub fn clear_halt(
        &self,
        device: &UsbDevice,
        endpoint: &Endpoint,
        timeout_ms: u64,
    ) -> Result<(), UsbError> {
        let setup = SetupPacket::clear_endpoint_halt(endpoint.address());
        self.control_out(device, setup, Vec::new(), timeout_ms)?;
        let key = EndpointKey::new(device.address(), endpoint);
        if let Some(queue) = self.state.lock().queues.get_mut(&key) {
            queue.halted = false;
        }
        log::debug!("usb: cleared halt on {:?}", key);
        Ok(())
    }
}

/// 超时取消后的结果
///
/// 取消前的一瞬间可能已经完成，此时按真实状态返回；只有被本次取消终止
/// （或没有任何结果）才算超时。
fn resolve_after_abort(
    outcome: Option<(TransferStatus, Vec<u8>)>,
) -> Result<Vec<u8>, UsbError> {
    match outcome {
        None | Some((TransferStatus::Aborted, _)) => Err(UsbError::TimedOut),
        Some((status, data)) => status.into_result().map(|_| data),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockHostController, MockReply, init_test_env};
    use crate::usb::device::UsbSpeed;
    use crate::usb::descriptor::EndpointDescriptor;
    use alloc::sync::Arc;
    use core::sync::atomic::AtomicUsize;

    fn interrupt_ep() -> Endpoint {
        Endpoint::from_descriptor(&EndpointDescriptor {
            endpoint_address: 0x81,
            attributes: 0x03,
            max_packet_size: 8,
            interval: 10,
        })
    }

    fn bulk_ep(address: u8) -> Endpoint {
        Endpoint::from_descriptor(&EndpointDescriptor {
            endpoint_address: address,
            attributes: 0x02,
            max_packet_size: 64,
            interval: 0,
        })
    }

    fn setup() -> (Arc<MockHostController>, Arc<TransferEngine>, Arc<UsbDevice>) {
        init_test_env();
        let hc = MockHostController::new();
        let engine = TransferEngine::new(hc.clone());
        hc.attach_engine(&engine);
        let dev = UsbDevice::new(1, UsbSpeed::Full, engine.clone());
        dev.set_address(5);
        (hc, engine, dev)
    }

    #[test]
    fn test_rearm_counts_and_abort() {
        let (hc, engine, dev) = setup();
        let calls = Arc::new(AtomicUsize::new(0));
        let aborted = Arc::new(AtomicUsize::new(0));
        let (c, a) = (calls.clone(), aborted.clone());
        let transfer = Transfer::interrupt_in(&dev, interrupt_ep(), vec![0; 8])
            .unwrap()
            .with_rearm()
            .with_completion(move |t| match t.status() {
                TransferStatus::Success => {
                    c.fetch_add(1, Ordering::SeqCst);
                }
                TransferStatus::Aborted => {
                    a.fetch_add(1, Ordering::SeqCst);
                }
                _ => {}
            });
        let id = engine.submit(transfer).unwrap();
        let key = EndpointKey::new(5, &interrupt_ep());

        const N: usize = 5;
        for _ in 0..N {
            assert!(hc.complete_next(key, TransferStatus::Success, &[0; 8]));
        }
        assert_eq!(calls.load(Ordering::SeqCst), N);
        // initial submission plus N resubmissions
        assert_eq!(hc.enqueue_count(id), N + 1);

        assert!(engine.abort(id));
        assert_eq!(aborted.load(Ordering::SeqCst), 1);
        assert_eq!(hc.enqueue_count(id), N + 1);
        assert_eq!(hc.deferred_len(), 0);
        assert!(!hc.complete_next(key, TransferStatus::Success, &[0; 8]));
        assert!(hc.cancelled().contains(&id));
        assert!(!engine.abort(id));
    }

    #[test]
    fn test_aborted_completion_never_rearms() {
        let (hc, engine, dev) = setup();
        let transfer = Transfer::interrupt_in(&dev, interrupt_ep(), vec![0; 8])
            .unwrap()
            .with_rearm();
        let id = engine.submit(transfer).unwrap();
        let key = EndpointKey::new(5, &interrupt_ep());
        assert!(hc.complete_next(key, TransferStatus::Aborted, &[]));
        assert_eq!(hc.enqueue_count(id), 1);
        assert_eq!(engine.pending_count(5), 0);
    }

    #[test]
    fn test_abort_from_callback_stops_rearm() {
        let (hc, engine, dev) = setup();
        let weak = Arc::downgrade(&engine);
        let own_id: Arc<SpinLock<Option<TransferId>>> = Arc::new(SpinLock::new(None));
        let slot = own_id.clone();
        let transfer = Transfer::interrupt_in(&dev, interrupt_ep(), vec![0; 8])
            .unwrap()
            .with_rearm()
            .with_completion(move |t| {
                if t.status() != TransferStatus::Success {
                    return;
                }
                if let (Some(engine), Some(id)) = (weak.upgrade(), *slot.lock()) {
                    engine.abort(id);
                }
            });
        let id = engine.submit(transfer).unwrap();
        *own_id.lock() = Some(id);
        let key = EndpointKey::new(5, &interrupt_ep());
        assert!(hc.complete_next(key, TransferStatus::Success, &[1; 8]));
        assert_eq!(hc.enqueue_count(id), 1);
        assert_eq!(engine.pending_count(5), 0);
    }

    #[test]
    fn test_endpoint_mismatch_is_immediate() {
        let (_hc, _engine, dev) = setup();
        assert_eq!(
            Transfer::bulk_in(&dev, interrupt_ep(), vec![0; 8]).err(),
            Some(UsbError::EndpointMismatch)
        );
        assert_eq!(
            Transfer::bulk_out(&dev, bulk_ep(0x82), vec![0; 8]).err(),
            Some(UsbError::EndpointMismatch)
        );
        let out_setup = SetupPacket::set_configuration(1);
        assert_eq!(
            Transfer::control_in(&dev, out_setup).err(),
            Some(UsbError::EndpointMismatch)
        );
    }

    #[test]
    fn test_fifo_order_per_endpoint() {
        let (hc, engine, dev) = setup();
        let order = Arc::new(SpinLock::new(Vec::new()));
        for tag in 0u8..3 {
            let order = order.clone();
            let t = Transfer::bulk_in(&dev, bulk_ep(0x82), vec![0; 4])
                .unwrap()
                .with_completion(move |t| order.lock().push((tag, t.data()[0])));
            engine.submit(t).unwrap();
        }
        let key = EndpointKey::new(5, &bulk_ep(0x82));
        for byte in [10u8, 11, 12] {
            hc.complete_next(key, TransferStatus::Success, &[byte; 4]);
        }
        assert_eq!(*order.lock(), [(0, 10), (1, 11), (2, 12)]);
    }

    #[test]
    fn test_stall_halts_endpoint_until_cleared() {
        let (hc, engine, dev) = setup();
        let ep = bulk_ep(0x82);
        let key = EndpointKey::new(5, &ep);
        engine
            .submit(Transfer::bulk_in(&dev, ep, vec![0; 4]).unwrap())
            .unwrap();
        hc.complete_next(key, TransferStatus::Stalled, &[]);
        assert!(engine.is_halted(key));
        assert_eq!(
            engine.submit(Transfer::bulk_in(&dev, ep, vec![0; 4]).unwrap()),
            Err(UsbError::Halted)
        );

        hc.set_responder(|_req| MockReply::Complete(TransferStatus::Success, Vec::new()));
        engine.clear_halt(&dev, &ep, 100).unwrap();
        assert!(!engine.is_halted(key));
        let last = hc.last_request().unwrap();
        assert_eq!(last.setup, Some(SetupPacket::clear_endpoint_halt(0x82)));
    }

    #[test]
    fn test_fence_aborts_and_refuses() {
        let (hc, engine, dev) = setup();
        let aborted = Arc::new(AtomicUsize::new(0));
        for ep in [bulk_ep(0x82), bulk_ep(0x02)] {
            let a = aborted.clone();
            let buffer = vec![0; 4];
            let t = if ep.direction() == Direction::In {
                Transfer::bulk_in(&dev, ep, buffer)
            } else {
                Transfer::bulk_out(&dev, ep, buffer)
            };
            let t = t.unwrap().with_completion(move |t| {
                assert_eq!(t.status(), TransferStatus::Aborted);
                a.fetch_add(1, Ordering::SeqCst);
            });
            engine.submit(t).unwrap();
        }
        assert_eq!(engine.fence_device(5), 2);
        assert_eq!(aborted.load(Ordering::SeqCst), 2);
        assert_eq!(hc.cancelled().len(), 2);
        assert_eq!(
            engine.submit(Transfer::bulk_in(&dev, bulk_ep(0x82), vec![0; 4]).unwrap()),
            Err(UsbError::NoDevice)
        );
        engine.unfence_device(5);
        assert!(!engine.is_fenced(5));
    }

    #[test]
    fn test_submit_and_wait_inline_and_timeout() {
        let (hc, engine, dev) = setup();
        hc.set_responder(|req| {
            if req.setup.is_some() {
                MockReply::Complete(TransferStatus::Success, vec![0xAB; 4])
            } else {
                MockReply::Defer
            }
        });
        let data = engine
            .control_in(&dev, SetupPacket::get_descriptor(1, 0, 4), 50)
            .unwrap();
        assert_eq!(data, [0xAB; 4]);

        let t = Transfer::bulk_in(&dev, bulk_ep(0x82), vec![0; 4]).unwrap();
        assert_eq!(engine.submit_and_wait(t, 20), Err(UsbError::TimedOut));
        assert_eq!(engine.pending_count(5), 0);
        assert_eq!(hc.deferred_len(), 0);
    }

    #[test]
    fn test_rearm_failure_reports_aborted() {
        let (hc, engine, dev) = setup();
        let statuses = Arc::new(SpinLock::new(Vec::new()));
        let s = statuses.clone();
        let t = Transfer::interrupt_in(&dev, interrupt_ep(), vec![0; 8])
            .unwrap()
            .with_rearm()
            .with_completion(move |t| s.lock().push(t.status()));
        engine.submit(t).unwrap();
        hc.set_responder(|_req| MockReply::Reject(UsbError::HostError));
        let key = EndpointKey::new(5, &interrupt_ep());
        hc.complete_next(key, TransferStatus::Success, &[0; 8]);
        assert_eq!(
            *statuses.lock(),
            [TransferStatus::Success, TransferStatus::Aborted]
        );
        assert_eq!(engine.pending_count(5), 0);
    }

    #[test]
    fn test_completion_racing_timeout_keeps_real_status() {
        assert_eq!(
            resolve_after_abort(Some((TransferStatus::Stalled, Vec::new()))),
            Err(UsbError::Stalled)
        );
        assert_eq!(
            resolve_after_abort(Some((TransferStatus::Success, vec![1, 2]))),
            Ok(vec![1, 2])
        );
        assert_eq!(
            resolve_after_abort(Some((TransferStatus::Aborted, Vec::new()))),
            Err(UsbError::TimedOut)
        );
        assert_eq!(resolve_after_abort(None), Err(UsbError::TimedOut));
    }
}
