//! 同步原语封装
//!
//! 中断与前台之间共享的状态全部经由本模块的类型访问:
//! - `ReadyFlag`: 调度就绪标志 (中断置位, 前台清除)
//! - `AtomicCounter`: 统计计数器
//! - `CriticalCell`: 基于 embassy-sync 的临界区互斥单元
//!
//! 统一使用 CriticalSectionRawMutex, 以确保在单核/双核环境下的正确性

use core::cell::RefCell;

use embassy_sync::blocking_mutex::{raw::CriticalSectionRawMutex, Mutex};
use portable_atomic::{AtomicBool, AtomicU32, Ordering};

use crate::tasks::SchedError;

// ===== 类型别名: 简化使用 =====

/// 临界区互斥单元 - 保护中断与前台共享的硬件句柄
///
/// 只在极短的更新期间持有临界区 (关中断), 不得包住整个任务体
///
/// # Example
/// ```ignore
/// static LED: CriticalCell<Option<Output<'static>>> = CriticalCell::new(RefCell::new(None));
///
/// LED.lock(|cell| {
///     if let Some(led) = cell.borrow_mut().as_mut() {
///         led.set_high();
///     }
/// });
/// ```
pub type CriticalCell<T> = Mutex<CriticalSectionRawMutex, RefCell<T>>;

/// 创建新的临界区互斥单元
#[inline]
pub const fn new_cell<T>(value: T) -> CriticalCell<T> {
    Mutex::new(RefCell::new(value))
}

// ===== 同步工具函数 =====

/// 在临界区中执行闭包
///
/// 禁用中断确保原子性，适用于非常短的操作
///
/// # Warning
/// 临界区内不能执行任何长时间计算
#[inline]
pub fn with_critical_section<R, F>(f: F) -> R
where
    F: FnOnce(critical_section::CriticalSection) -> R,
{
    critical_section::with(f)
}

// ===== 调度就绪标志 =====

/// 调度就绪标志
///
/// 单写者纪律:
/// - 只有节拍中断调用 `raise` (false → true)
/// - 只有前台扫描在完成整轮任务后调用 `clear` (true → false)
///
/// 置位使用 Release, 读取使用 Acquire, 前台看到标志时
/// 也能看到中断在置位前写入的全部数据
pub struct ReadyFlag {
    flag: AtomicBool,
}

impl ReadyFlag {
    /// 创建新的 (未置位) 标志
    pub const fn new() -> Self {
        Self {
            flag: AtomicBool::new(false),
        }
    }

    /// 置位标志 (节拍中断)
    ///
    /// 若标志在进入时已经置位, 说明上一轮扫描尚未完成,
    /// 返回 `SchedError::Overrun`, 标志保持置位
    #[inline(always)]
    pub fn raise(&self) -> Result<(), SchedError> {
        if self.flag.swap(true, Ordering::AcqRel) {
            Err(SchedError::Overrun)
        } else {
            Ok(())
        }
    }

    /// 清除标志 (前台扫描结束)
    #[inline(always)]
    pub fn clear(&self) {
        self.flag.store(false, Ordering::Release);
    }

    /// 检查标志 (不清除)
    #[inline(always)]
    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

// ===== 原子计数器 =====

/// 原子计数器 - 用于节拍计数和统计
///
/// 32 位回绕计数, 在所有目标上都是单指令原子操作
pub struct AtomicCounter {
    count: AtomicU32,
}

impl AtomicCounter {
    /// 创建新的计数器
    pub const fn new() -> Self {
        Self {
            count: AtomicU32::new(0),
        }
    }

    /// 创建指定初始值的计数器
    pub const fn with_value(value: u32) -> Self {
        Self {
            count: AtomicU32::new(value),
        }
    }

    /// 增加并返回新值
    #[inline(always)]
    pub fn increment(&self) -> u32 {
        self.count.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
    }

    /// 获取当前值
    #[inline(always)]
    pub fn get(&self) -> u32 {
        self.count.load(Ordering::Relaxed)
    }

    /// 若新值更大则更新, 返回是否更新
    #[inline(always)]
    pub fn raise_to(&self, value: u32) -> bool {
        self.count.fetch_max(value, Ordering::Relaxed) < value
    }

    /// 重置为 0
    #[inline(always)]
    pub fn reset(&self) {
        self.count.store(0, Ordering::Relaxed);
    }
}

impl Default for ReadyFlag {
    fn default() -> Self {
        Self::new()
    }
}

impl Default for AtomicCounter {
    fn default() -> Self {
        Self::new()
    }
}
