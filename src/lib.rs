//! CoopSched - 节拍驱动的协作式调度器
//!
//! 本库提供以下核心功能:
//! - 固定周期任务表的协作式调度 (每个节拍一次扫描)
//! - 调度超时 (overrun) 检测与致命错误处理
//! - 中断安全的多生产者调试环形缓冲区
//! - 条件编译日志系统

#![cfg_attr(not(test), no_std)]

pub mod hw;
pub mod sync;
pub mod tasks;
pub mod util;

// ===== 重导出常用类型 =====
pub use hw::{DebugTx, FreeRunningCounter, Indicator, SharedSerial};
pub use sync::primitives::{AtomicCounter, CriticalCell, ReadyFlag};
pub use sync::ringbuffer::{Consumer, DebugRing, DebugWriter};
pub use tasks::fatal::{FatalCode, FatalHandler, FaultLatch};
pub use tasks::housekeeping::Housekeeping;
pub use tasks::scheduler::{Scheduler, SweepReport, TaskId, TaskTable};
pub use tasks::tick::{Activity, Foreground, TickSource};
pub use tasks::SchedError;

// ===== 版本信息 =====
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// 系统配置常量
pub mod config {
    /// 调度节拍周期 (ms)
    pub const TICK_PERIOD_MS: u32 = 5;

    /// 一个节拍内自由运行计数器的满量程 (计数器单位)
    ///
    /// 计数器在每个节拍开始时归零, 数到该值时触发下一个节拍
    pub const SYSTEM_TICK_TIMER: u32 = 3750;

    /// 任务表最大槽位数
    pub const MAX_TASKS: usize = 8;

    /// 调试环形缓冲区大小 (必须是 2 的幂)
    pub const DEBUG_RING_SIZE: usize = 256;

    /// 负载指示灯点亮周期 (节拍), 约 1 秒
    pub const BLINK_ON_PERIOD: u32 = SYSTEM_TICK_TIMER / 16;

    /// 心跳打印周期 (节拍), 约 2 秒
    pub const HEARTBEAT_PERIOD: u32 = 400;

    /// 演示定时器启动周期 (节拍), 约 10 秒
    pub const PRINT_TIMER_PERIOD: u32 = 2000;

    /// 负载水位初值, 大于 0 以保证测量前指示灯也有可见闪烁
    pub const SYSTEM_TIMER_MAX_INIT: u32 = 100;

    /// 水位到指示灯熄灭节拍数的换算位移 (除以 16)
    pub const LOAD_SHIFT: u32 = 4;

    /// 致命错误循环中每次打印后的排空自旋次数
    pub const FATAL_SPIN_CYCLES: u32 = 1_000_000;

    /// 演示定时器单次延时 (μs)
    pub const DEMO_TIMER_DELAY_US: u64 = 1_333;
}
