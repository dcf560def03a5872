//! 致命错误处理
//!
//! 系统状态机只有两个状态: `Running → Faulted`。
//! `Faulted` 是吸收态, 只有外部复位才能离开。
//!
//! 进入故障后:
//! 1. 永久屏蔽中断 (进入临界区且不再退出)
//! 2. 指示灯强制常亮
//! 3. 无限循环: 打印错误横幅, 然后手动泵出调试缓冲区一段时间
//!
//! 正常的前台排空已经停止, 因此由故障循环自己接管消费者角色,
//! 保证操作员总能在调试串口上看到错误信息。
//! 被打断在预留与发布之间的生产者永远不会恢复, 接管后的消费者
//! 会跳过这些槽位, 而不是停在上面等待

use core::fmt;

use embedded_hal::digital::OutputPin;
use portable_atomic::{AtomicU8, Ordering};

use crate::config::FATAL_SPIN_CYCLES;
use crate::dprint;
use crate::hw::{DebugTx, Indicator};
use crate::sync::ringbuffer::{Consumer, DebugRing};
use crate::util::log::*;

/// 致命错误码
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "log-defmt", derive(defmt::Format))]
#[repr(i32)]
pub enum FatalCode {
    /// 调度超时: 上一轮扫描未完成时又来了节拍
    SchedulerOverrun = 0,
    /// panic 转入故障路径
    Panic = 1,
}

impl FatalCode {
    /// 数值错误码 (出现在横幅中)
    #[inline]
    pub const fn code(self) -> i32 {
        self as i32
    }
}

impl fmt::Display for FatalCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

// ===== 故障锁存 =====

/// 系统状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "log-defmt", derive(defmt::Format))]
pub enum SystemState {
    Running,
    Faulted,
}

const RUNNING: u8 = 0;
const FAULTED: u8 = 1;

/// 故障锁存器
///
/// 一旦置位永不清除
pub struct FaultLatch {
    state: AtomicU8,
}

impl FaultLatch {
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(RUNNING),
        }
    }

    /// Running → Faulted
    ///
    /// # Returns
    /// 本次调用是否完成了状态转换 (只有第一次返回 true)
    #[inline]
    pub fn latch(&self) -> bool {
        self.state
            .compare_exchange(RUNNING, FAULTED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    #[inline]
    pub fn state(&self) -> SystemState {
        match self.state.load(Ordering::Acquire) {
            RUNNING => SystemState::Running,
            _ => SystemState::Faulted,
        }
    }

    #[inline]
    pub fn is_faulted(&self) -> bool {
        self.state() == SystemState::Faulted
    }
}

impl Default for FaultLatch {
    fn default() -> Self {
        Self::new()
    }
}

// ===== 致命错误处理器 =====

/// 致命错误处理器
pub struct FatalHandler<'a, P, const N: usize> {
    ring: &'a DebugRing<N>,
    indicator: &'a Indicator<P>,
    latch: &'a FaultLatch,
    spin: u32,
}

impl<'a, P: OutputPin, const N: usize> FatalHandler<'a, P, N> {
    pub const fn new(ring: &'a DebugRing<N>, indicator: &'a Indicator<P>, latch: &'a FaultLatch) -> Self {
        Self {
            ring,
            indicator,
            latch,
            spin: FATAL_SPIN_CYCLES,
        }
    }

    /// 设置每次打印后的排空自旋次数
    pub const fn with_spin(mut self, spin: u32) -> Self {
        self.spin = spin;
        self
    }

    /// 锁存故障并强制点亮指示灯
    ///
    /// # Returns
    /// 本次调用是否完成了 Running → Faulted 转换
    pub fn enter(&self, code: FatalCode) -> bool {
        let first = self.latch.latch();
        self.indicator.force_on();
        if first {
            log_error!("fatal error, code {}", code.code());
        }
        first
    }

    /// 把错误横幅写入调试缓冲区
    pub fn emit_banner(&self, code: FatalCode, msg: &str) {
        dprint!(self.ring, "\n!!! -- FATAL ERROR ({}) -- !!!\n{}\n", code, msg);
    }

    /// 手动泵出调试缓冲区 `spin` 次
    ///
    /// # Returns
    /// 实际发送的字节数
    pub fn pump<T: DebugTx>(&self, consumer: &mut Consumer<'_, N>, tx: &mut T) -> usize {
        let mut sent = 0;
        for _ in 0..self.spin {
            if consumer.drain_one(tx) {
                sent += 1;
            } else {
                core::hint::spin_loop();
            }
        }
        sent
    }

    /// 故障循环的一次迭代: 打印横幅, 然后泵出
    pub fn cycle<T: DebugTx>(
        &self,
        code: FatalCode,
        msg: &str,
        consumer: &mut Consumer<'_, N>,
        tx: &mut T,
    ) -> usize {
        self.emit_banner(code, msg);
        self.pump(consumer, tx)
    }

    /// 进入故障状态, 永不返回
    ///
    /// 可以在中断上下文调用; 中断被永久屏蔽, 前台循环不会恢复
    pub fn fatal<T: DebugTx>(&self, code: FatalCode, msg: &str, tx: &mut T) -> ! {
        // 临界区永不释放: 从此不再有任何抢占
        let _restore = unsafe { critical_section::acquire() };

        self.enter(code);

        // Safety: 中断已永久屏蔽, 原有的消费者 (前台空闲循环) 和被打断的
        // 生产者都不会再运行
        let mut consumer = unsafe { self.ring.steal_consumer() };
        loop {
            self.cycle(code, msg, &mut consumer, tx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::indicator::tests::TestPin;
    use std::vec::Vec;

    struct VecTx(Vec<u8>);

    impl DebugTx for VecTx {
        fn is_ready(&mut self) -> bool {
            true
        }

        fn write(&mut self, byte: u8) {
            self.0.push(byte);
        }
    }

    const BANNER: &[u8] = b"\r\n!!! -- FATAL ERROR (0) -- !!!\r\nScheduler Overrun Error.\r\n";

    #[test]
    fn test_latch_is_absorbing() {
        let latch = FaultLatch::new();
        assert_eq!(latch.state(), SystemState::Running);

        assert!(latch.latch());
        assert!(!latch.latch());
        assert!(latch.is_faulted());
    }

    #[test]
    fn test_enter_once_and_force_indicator() {
        let ring: DebugRing<256> = DebugRing::new();
        let led = Indicator::new(TestPin::default());
        let latch = FaultLatch::new();
        let handler = FatalHandler::new(&ring, &led, &latch);

        assert!(handler.enter(FatalCode::SchedulerOverrun));
        assert!(!handler.enter(FatalCode::SchedulerOverrun));
        assert!(led.is_on());
        led.off();
        assert!(led.is_on());
    }

    #[test]
    fn test_cycle_repeats_banner() {
        let ring: DebugRing<256> = DebugRing::new();
        let led = Indicator::new(TestPin::default());
        let latch = FaultLatch::new();
        let handler = FatalHandler::new(&ring, &led, &latch).with_spin(200);
        let mut consumer = ring.consumer().unwrap();
        let mut tx = VecTx(Vec::new());

        // 正常流程中积压的输出先被泵出
        ring.write_bytes(b"pending");
        handler.enter(FatalCode::SchedulerOverrun);

        let msg = "Scheduler Overrun Error.";
        let first = handler.cycle(FatalCode::SchedulerOverrun, msg, &mut consumer, &mut tx);
        let second = handler.cycle(FatalCode::SchedulerOverrun, msg, &mut consumer, &mut tx);

        assert_eq!(first, b"pending".len() + BANNER.len());
        assert_eq!(second, BANNER.len());

        let mut expected = b"pending".to_vec();
        expected.extend_from_slice(BANNER);
        expected.extend_from_slice(BANNER);
        assert_eq!(tx.0, expected);
    }

    #[test]
    fn test_cycle_skips_interrupted_producer() {
        let ring: DebugRing<256> = DebugRing::new();
        let led = Indicator::new(TestPin::default());
        let latch = FaultLatch::new();
        let handler = FatalHandler::new(&ring, &led, &latch).with_spin(512);
        let mut tx = VecTx(Vec::new());

        // 节拍中断打断了一个刚预留完槽位的任务
        ring.write_bytes(b"ok");
        ring.reserve_unpublished();
        ring.write_bytes(b"!");

        handler.enter(FatalCode::SchedulerOverrun);
        let mut consumer = unsafe { ring.steal_consumer() };
        handler.cycle(FatalCode::SchedulerOverrun, "Scheduler Overrun Error.", &mut consumer, &mut tx);

        let mut expected = b"ok!".to_vec();
        expected.extend_from_slice(BANNER);
        assert_eq!(tx.0, expected);
        assert!(ring.is_empty());
    }

    #[test]
    fn test_banner_survives_full_ring() {
        let ring: DebugRing<256> = DebugRing::new();
        let led = Indicator::new(TestPin::default());
        let latch = FaultLatch::new();
        let handler = FatalHandler::new(&ring, &led, &latch).with_spin(1024);
        let mut tx = VecTx(Vec::new());

        // 进入故障时缓冲区已满, 其中一个槽位永远不会发布
        ring.reserve_unpublished();
        assert_eq!(ring.write_bytes(&[b'x'; 300]), 254);
        assert!(ring.is_full());

        handler.enter(FatalCode::SchedulerOverrun);
        let mut consumer = unsafe { ring.steal_consumer() };
        let msg = "Scheduler Overrun Error.";
        // 第一次横幅被丢弃, 泵出后缓冲区腾空
        assert_eq!(handler.cycle(FatalCode::SchedulerOverrun, msg, &mut consumer, &mut tx), 254);
        assert_eq!(handler.cycle(FatalCode::SchedulerOverrun, msg, &mut consumer, &mut tx), BANNER.len());

        assert_eq!(tx.0.len(), 254 + BANNER.len());
        assert!(tx.0.ends_with(BANNER));
    }

    #[test]
    fn test_short_spin_leaves_backlog() {
        let ring: DebugRing<256> = DebugRing::new();
        let led = Indicator::new(TestPin::default());
        let latch = FaultLatch::new();
        let handler = FatalHandler::new(&ring, &led, &latch).with_spin(4);
        let mut consumer = ring.consumer().unwrap();
        let mut tx = VecTx(Vec::new());

        handler.cycle(FatalCode::Panic, "boom", &mut consumer, &mut tx);
        assert_eq!(tx.0, b"\r\n!!");
        assert!(!ring.is_empty());
    }
}
