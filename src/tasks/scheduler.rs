//! 协作式调度核心
//!
//! 任务表在初始化时一次性建立 (`TaskTable`), 之后只读。
//! 每个节拍前台执行一次扫描 (`Scheduler::sweep`):
//!
//! 1. 按表顺序遍历每个任务
//! 2. `elapsed >= period` 时同步调用任务并把 `elapsed` 清零
//! 3. 无论是否调用, `elapsed` 加 1
//! 4. 整轮结束后清除调度就绪标志
//!
//! 任务之间没有抢占: 一个任务返回后下一个任务才运行。
//! 所有任务一轮的执行时间之和必须严格小于一个节拍, 否则节拍中断
//! 会发现就绪标志仍然置位, 并判定为致命超时。

use heapless::Vec;

use crate::sync::primitives::ReadyFlag;
use crate::tasks::SchedError;
use crate::util::log::*;

/// 任务回调: 零参数、非阻塞, 生命周期覆盖整个调度器
pub type TaskFn<'a> = &'a dyn Fn();

/// 任务在表中的位置 (即调度顺序)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "log-defmt", derive(defmt::Format))]
pub struct TaskId(pub usize);

/// 任务槽位
struct Slot<'a> {
    /// 周期 (节拍数, >= 1)
    period: u32,
    /// 距上次运行的节拍数, 只由扫描修改
    elapsed: u32,
    /// 任务回调
    tick_fn: TaskFn<'a>,
}

// ===== 任务表构建器 =====

/// 任务表构建器
///
/// # Type Parameters
/// * `N` - 最大任务数 (<= 64)
///
/// # Example
/// ```ignore
/// let mut table = TaskTable::<8>::new();
/// table.task(1, &tick_counter)?;
/// table.task(BLINK_ON_PERIOD, &blink_on)?;
/// let mut scheduler = table.finish_with_monitor(&load_monitor)?;
/// ```
pub struct TaskTable<'a, const N: usize> {
    slots: Vec<Slot<'a>, N>,
}

impl<'a, const N: usize> TaskTable<'a, N> {
    /// 创建空任务表
    pub const fn new() -> Self {
        assert!(N <= 64, "at most 64 task slots");
        Self { slots: Vec::new() }
    }

    /// 追加一个周期任务
    ///
    /// 追加顺序即调度顺序
    pub fn task(&mut self, period: u32, tick_fn: TaskFn<'a>) -> Result<TaskId, SchedError> {
        if period == 0 {
            return Err(SchedError::ZeroPeriod);
        }

        let id = TaskId(self.slots.len());
        self.slots
            .push(Slot {
                period,
                elapsed: 0,
                tick_fn,
            })
            .map_err(|_| SchedError::TableFull)?;
        Ok(id)
    }

    /// 已登记的任务数
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// 冻结任务表
    pub fn finish(self) -> Scheduler<'a, N> {
        log_debug!("task table sealed with {} tasks", self.slots.len());
        Scheduler {
            slots: self.slots,
            sweeps: 0,
        }
    }

    /// 把负载监控任务放到最后一个槽位后冻结任务表
    ///
    /// 监控任务每个节拍运行一次, 并且总在同一轮的其他任务之后运行,
    /// 这样它测到的是整轮扫描的耗时
    pub fn finish_with_monitor(mut self, monitor: TaskFn<'a>) -> Result<Scheduler<'a, N>, SchedError> {
        self.task(1, monitor)?;
        Ok(self.finish())
    }
}

impl<const N: usize> Default for TaskTable<'_, N> {
    fn default() -> Self {
        Self::new()
    }
}

// ===== 扫描结果 =====

/// 一轮扫描的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "log-defmt", derive(defmt::Format))]
pub struct SweepReport {
    /// 扫描序号 (从 1 开始, 回绕)
    pub sweep: u32,
    /// 本轮运行的任务位图 (bit i 对应 TaskId(i))
    pub fired: u64,
}

impl SweepReport {
    /// 指定任务本轮是否运行
    #[inline]
    pub fn fired(&self, id: TaskId) -> bool {
        id.0 < 64 && self.fired & (1u64 << id.0) != 0
    }

    /// 本轮运行的任务数
    #[inline]
    pub fn dispatched(&self) -> u32 {
        self.fired.count_ones()
    }
}

// ===== 调度器 =====

/// 协作式调度器
///
/// 由前台独占; 中断只接触 `ReadyFlag`
pub struct Scheduler<'a, const N: usize> {
    slots: Vec<Slot<'a>, N>,
    sweeps: u32,
}

impl<'a, const N: usize> Scheduler<'a, N> {
    /// 执行一轮扫描
    ///
    /// 按表顺序运行所有到期任务, 整轮结束后清除 `ready`
    pub fn sweep(&mut self, ready: &ReadyFlag) -> SweepReport {
        let mut fired = 0u64;

        for (i, slot) in self.slots.iter_mut().enumerate() {
            if slot.elapsed >= slot.period {
                (slot.tick_fn)();
                slot.elapsed = 0;
                fired |= 1u64 << i;
            }
            slot.elapsed = slot.elapsed.saturating_add(1);
        }

        // 只有完整的一轮才会清除标志
        ready.clear();

        self.sweeps = self.sweeps.wrapping_add(1);
        let report = SweepReport {
            sweep: self.sweeps,
            fired,
        };
        log_trace!("sweep {} dispatched {} ({:x})", report.sweep, report.dispatched(), fired);
        report
    }

    /// 任务数
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// 是否没有任务
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// 已执行的扫描轮数
    pub fn sweeps(&self) -> u32 {
        self.sweeps
    }

    /// 任务周期
    pub fn period(&self, id: TaskId) -> Option<u32> {
        self.slots.get(id.0).map(|slot| slot.period)
    }

    /// 任务当前的已过节拍数
    pub fn elapsed(&self, id: TaskId) -> Option<u32> {
        self.slots.get(id.0).map(|slot| slot.elapsed)
    }
}
