//! 任务模块
//!
//! 节拍驱动的协作式调度核心:
//! - `scheduler`: 静态任务表与扫描
//! - `housekeeping`: 核心自带的维护任务 (心跳、负载指示、负载监控)
//! - `fatal`: 致命错误处理 (Running → Faulted)
//! - `tick`: 节拍中断与前台循环的衔接

pub mod fatal;
pub mod housekeeping;
pub mod scheduler;
pub mod tick;

use core::fmt;

/// 调度错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "log-defmt", derive(defmt::Format))]
pub enum SchedError {
    /// 任务周期为 0
    ZeroPeriod,
    /// 任务表已满
    TableFull,
    /// 上一轮扫描未完成时又来了节拍
    Overrun,
    /// 系统已进入故障状态, 不再调度
    Faulted,
}

impl fmt::Display for SchedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            SchedError::ZeroPeriod => "task period must be at least one tick",
            SchedError::TableFull => "task table is full",
            SchedError::Overrun => "Scheduler Overrun Error.",
            SchedError::Faulted => "system is faulted",
        };
        f.write_str(msg)
    }
}
