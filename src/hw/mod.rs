//! 硬件边界
//!
//! 核心逻辑只通过本模块的 trait 接触外设:
//! - `DebugTx`: 调试串口发送寄存器
//! - `FreeRunningCounter`: 节拍定时器的自由运行计数值
//! - `Indicator`: 负载/故障指示灯 (任意 `embedded_hal` 输出引脚)
//! - `SharedSerial`: 把任意 `embedded_io` 串口适配为 `DebugTx`

pub mod indicator;
pub mod serial;

pub use indicator::Indicator;
pub use serial::SharedSerial;

/// 调试输出发送设备
///
/// 两个方法都必须立即返回, 不得等待硬件
pub trait DebugTx {
    /// 发送寄存器是否可以接收一个字节
    fn is_ready(&mut self) -> bool;

    /// 写入一个字节 (只在 `is_ready` 返回 true 后调用)
    fn write(&mut self, byte: u8);
}

impl<T: DebugTx + ?Sized> DebugTx for &mut T {
    #[inline]
    fn is_ready(&mut self) -> bool {
        (**self).is_ready()
    }

    #[inline]
    fn write(&mut self, byte: u8) {
        (**self).write(byte)
    }
}

/// 自由运行的硬件计数器
///
/// 每个节拍开始时归零, 在一个节拍内单调递增
pub trait FreeRunningCounter {
    /// 当前计数值
    fn sample(&self) -> u32;
}

impl<F: Fn() -> u32> FreeRunningCounter for F {
    #[inline]
    fn sample(&self) -> u32 {
        self()
    }
}
