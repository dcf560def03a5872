//! 同步原语模块
//!
//! 提供中断安全的同步原语:
//! - `ReadyFlag`: 调度就绪标志
//! - `AtomicCounter`: 原子计数器
//! - `CriticalCell`: 临界区互斥单元 (embassy-sync)
//! - `DebugRing`: 多生产者单消费者调试环形缓冲区

pub mod primitives;
pub mod ringbuffer;

pub use primitives::{AtomicCounter, CriticalCell, ReadyFlag};
pub use ringbuffer::{Consumer, DebugRing, DebugWriter};
