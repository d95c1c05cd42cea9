//! 驱动注册表
//!
//! 按种类保存已注册的驱动：
//!
//! - 文件系统驱动是单例，第一次注册生效，之后的注册静默忽略，且不会调用其 `init`；
//! - USB 类驱动和其他驱动可以共存，USB 类驱动按 `matches` 谓词选择。
//!
//! 驱动的 `init` 延迟到第一次查找时执行，由每个注册项上的一次性状态保护。
//! 调用驱动钩子时从不持有注册表的锁。

use alloc::collections::BTreeMap;
use alloc::format;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use sync::SpinLock;

use crate::driver::{Driver, DriverError, DriverHandle, DriverKind};
use crate::fs::FsDriver;
use crate::list::List;
use crate::usb::UsbClassDriver;

// 一次性初始化状态
const UNINIT: u8 = 0;
const RUNNING: u8 = 1;
const READY: u8 = 2;

/// 注册结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// 已加入注册表
    Registered,
    /// 被忽略（文件系统槽已占用，或同种类下重名）
    Ignored,
}

struct Registration {
    handle: DriverHandle,
    state: AtomicU8,
}

impl Registration {
    fn new(handle: DriverHandle) -> Self {
        Self {
            handle,
            state: AtomicU8::new(UNINIT),
        }
    }

    /// 保证 `init` 成功执行过一次；失败时恢复为未初始化，下次使用会重试
    fn ensure_init(&self) -> Result<(), DriverError> {
        loop {
            match self
                .state
                .compare_exchange(UNINIT, RUNNING, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => {
                    return match self.handle.init() {
                        Ok(()) => {
                            self.state.store(READY, Ordering::Release);
                            log::debug!("cdi: driver {:?} initialized", self.handle);
                            Ok(())
                        }
                        Err(e) => {
                            self.state.store(UNINIT, Ordering::Release);
                            log::warn!("cdi: driver {:?} init failed: {}", self.handle, e);
                            Err(e)
                        }
                    };
                }
                Err(READY) => return Ok(()),
                Err(_) => core::hint::spin_loop(),
            }
        }
    }

    fn is_initialized(&self) -> bool {
        self.state.load(Ordering::Acquire) == READY
    }
}

/// I/O 命名空间中的节点
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// 目录
    Directory,
    /// 驱动节点
    Driver(DriverKind),
}

/// 注册表背后的抽象 I/O 命名空间
///
/// 每个已注册的驱动发布为 `<kind>/<name>`。命名空间在第一次注册时才初始化，
/// 且最多初始化一次。
pub struct IoNamespace {
    state: AtomicU8,
    init_runs: AtomicUsize,
    nodes: SpinLock<BTreeMap<String, NodeKind>>,
}

impl IoNamespace {
    const fn new() -> Self {
        Self {
            state: AtomicU8::new(UNINIT),
            init_runs: AtomicUsize::new(0),
            nodes: SpinLock::new(BTreeMap::new()),
        }
    }

    fn ensure_init(&self) {
        loop {
            match self
                .state
                .compare_exchange(UNINIT, RUNNING, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => {
                    self.init_runs.fetch_add(1, Ordering::Relaxed);
                    let mut nodes = self.nodes.lock();
                    for kind in [DriverKind::Filesystem, DriverKind::UsbClass, DriverKind::Misc] {
                        nodes.insert(String::from(kind.as_str()), NodeKind::Directory);
                    }
                    drop(nodes);
                    self.state.store(READY, Ordering::Release);
                    log::debug!("cdi: io namespace initialized");
                    return;
                }
                Err(READY) => return,
                Err(_) => core::hint::spin_loop(),
            }
        }
    }

    fn publish(&self, kind: DriverKind, name: &str) {
        let path = format!("{}/{}", kind.as_str(), name);
        self.nodes.lock().insert(path, NodeKind::Driver(kind));
    }

    fn unpublish(&self, kind: DriverKind, name: &str) {
        let path = format!("{}/{}", kind.as_str(), name);
        self.nodes.lock().remove(&path);
    }

    /// 命名空间是否已初始化
    pub fn is_initialized(&self) -> bool {
        self.state.load(Ordering::Acquire) == READY
    }

    /// 初始化实际执行的次数（0 或 1）
    pub fn init_runs(&self) -> usize {
        self.init_runs.load(Ordering::Relaxed)
    }

    /// 查找路径对应的节点
    pub fn lookup(&self, path: &str) -> Option<NodeKind> {
        self.nodes.lock().get(path).copied()
    }

    /// 按字典序列出所有路径
    pub fn paths(&self) -> Vec<String> {
        self.nodes.lock().keys().cloned().collect()
    }
}

/// 驱动注册表
pub struct DriverRegistry {
    drivers: SpinLock<List<Arc<Registration>>>,
    namespace: IoNamespace,
}

impl DriverRegistry {
    /// 创建空注册表，命名空间尚未初始化
    pub const fn new() -> Self {
        Self {
            drivers: SpinLock::new(List::new()),
            namespace: IoNamespace::new(),
        }
    }

    /// 注册驱动
    pub fn register(&self, handle: DriverHandle) -> RegisterOutcome {
        self.namespace.ensure_init();

        let kind = handle.kind();
        {
            let mut drivers = self.drivers.lock();
            if kind == DriverKind::Filesystem
                && drivers.iter().any(|r| r.handle.kind() == DriverKind::Filesystem)
            {
                return RegisterOutcome::Ignored;
            }
            if drivers
                .iter()
                .any(|r| r.handle.kind() == kind && r.handle.name() == handle.name())
            {
                log::warn!("cdi: duplicate driver {:?} ignored", handle);
                return RegisterOutcome::Ignored;
            }
            drivers.push_back(Arc::new(Registration::new(handle.clone())));
        }

        self.namespace.publish(kind, handle.name());
        log::info!("cdi: registered driver {:?}", handle);
        RegisterOutcome::Registered
    }

    /// 注销驱动并调用其 `destroy`
    ///
    /// 返回被移除的驱动；不存在时返回 `None`。
    pub fn unregister(&self, kind: DriverKind, name: &str) -> Option<DriverHandle> {
        let reg = self
            .drivers
            .lock()
            .remove_first(|r| r.handle.kind() == kind && r.handle.name() == name)?;

        self.namespace.unpublish(kind, name);
        if !reg.is_initialized() {
            log::debug!("cdi: destroying uninitialized driver {:?}", reg.handle);
        }
        reg.handle.destroy();
        log::info!("cdi: unregistered driver {:?}", reg.handle);
        Some(reg.handle.clone())
    }

    /// 当前的文件系统驱动（必要时先初始化）
    pub fn filesystem(&self) -> Option<Arc<dyn FsDriver>> {
        let reg = self.find(|r| r.handle.kind() == DriverKind::Filesystem)?;
        reg.ensure_init().ok()?;
        match &reg.handle {
            DriverHandle::Filesystem(d) => Some(d.clone()),
            _ => None,
        }
    }

    /// 按注册顺序列出匹配接口三元组的 USB 类驱动（已初始化）
    ///
    /// 初始化失败的驱动被跳过。
    pub fn usb_candidates(
        &self,
        class: u8,
        subclass: u8,
        protocol: u8,
    ) -> Vec<Arc<dyn UsbClassDriver>> {
        let matching: Vec<(Arc<Registration>, Arc<dyn UsbClassDriver>)> = {
            let drivers = self.drivers.lock();
            drivers
                .iter()
                .filter_map(|r| match &r.handle {
                    DriverHandle::UsbClass(d) if d.matches(class, subclass, protocol) => {
                        Some((r.clone(), d.clone()))
                    }
                    _ => None,
                })
                .collect()
        };

        matching
            .into_iter()
            .filter(|(reg, _)| reg.ensure_init().is_ok())
            .map(|(_, driver)| driver)
            .collect()
    }

    /// 第一个匹配接口三元组的 USB 类驱动
    pub fn match_usb(
        &self,
        class: u8,
        subclass: u8,
        protocol: u8,
    ) -> Option<Arc<dyn UsbClassDriver>> {
        self.usb_candidates(class, subclass, protocol).into_iter().next()
    }

    /// 按名称查找其他驱动（必要时先初始化）
    pub fn misc(&self, name: &str) -> Option<Arc<dyn Driver>> {
        let reg = self.find(|r| r.handle.kind() == DriverKind::Misc && r.handle.name() == name)?;
        reg.ensure_init().ok()?;
        match &reg.handle {
            DriverHandle::Misc(d) => Some(d.clone()),
            _ => None,
        }
    }

    /// 按注册顺序列出所有驱动
    pub fn drivers(&self) -> Vec<DriverHandle> {
        self.drivers.lock().iter().map(|r| r.handle.clone()).collect()
    }

    /// 已注册驱动的数量
    pub fn len(&self) -> usize {
        self.drivers.lock().len()
    }

    /// 注册表是否为空
    pub fn is_empty(&self) -> bool {
        self.drivers.lock().is_empty()
    }

    /// 注册表背后的 I/O 命名空间
    pub fn namespace(&self) -> &IoNamespace {
        &self.namespace
    }

    fn find(&self, pred: impl Fn(&Registration) -> bool) -> Option<Arc<Registration>> {
        self.drivers.lock().iter().find(|r| pred(r)).cloned()
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::new()
    }
}
