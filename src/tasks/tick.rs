//! 节拍源与前台循环的衔接
//!
//! - `TickSource::on_tick`: 节拍中断的全部内容 (超时检查 + 置位就绪标志)
//! - `Foreground::poll`: 前台循环的一步 (有节拍就扫描, 否则排空一个字节)
//!
//! 前台在启动后先无条件扫描一轮, 之后每个节拍恰好扫描一轮

use crate::hw::DebugTx;
use crate::sync::primitives::{AtomicCounter, ReadyFlag};
use crate::sync::ringbuffer::Consumer;
use crate::tasks::fatal::FaultLatch;
use crate::tasks::scheduler::{Scheduler, SweepReport};
use crate::tasks::SchedError;
use crate::util::log::*;

// ===== 节拍源 =====

/// 节拍中断处理
///
/// 中断优先级应高于前台、低于其他只做打印的演示中断
pub struct TickSource<'a> {
    ready: &'a ReadyFlag,
    latch: &'a FaultLatch,
    ticks: AtomicCounter,
}

impl<'a> TickSource<'a> {
    pub const fn new(ready: &'a ReadyFlag, latch: &'a FaultLatch) -> Self {
        Self {
            ready,
            latch,
            ticks: AtomicCounter::new(),
        }
    }

    /// 节拍中断体
    ///
    /// # Returns
    /// - `Ok(())`: 已置位就绪标志
    /// - `Err(SchedError::Overrun)`: 标志仍然置位, 调用方必须进入致命错误路径
    /// - `Err(SchedError::Faulted)`: 系统已故障, 节拍被忽略
    #[inline]
    pub fn on_tick(&self) -> Result<(), SchedError> {
        if self.latch.is_faulted() {
            return Err(SchedError::Faulted);
        }

        self.ticks.increment();
        self.ready.raise()
    }

    /// 已收到的节拍数
    #[inline]
    pub fn ticks(&self) -> u32 {
        self.ticks.get()
    }
}

// ===== 前台循环 =====

/// 前台循环一步的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "log-defmt", derive(defmt::Format))]
pub enum Activity {
    /// 执行了一轮扫描
    Swept(SweepReport),
    /// 向发送设备转移了一个字节
    Drained,
    /// 无事可做
    Idle,
}

/// 前台循环
pub struct Foreground<'a> {
    ready: &'a ReadyFlag,
    latch: &'a FaultLatch,
    booted: bool,
}

impl<'a> Foreground<'a> {
    pub const fn new(ready: &'a ReadyFlag, latch: &'a FaultLatch) -> Self {
        Self {
            ready,
            latch,
            booted: false,
        }
    }

    /// 前台循环的一步
    ///
    /// 首次调用执行启动扫描; 之后只在就绪标志置位时扫描,
    /// 其余时间每步最多向 `tx` 排空一个字节
    pub fn poll<const T: usize, const N: usize, TX: DebugTx>(
        &mut self,
        scheduler: &mut Scheduler<'_, T>,
        consumer: &mut Consumer<'_, N>,
        tx: &mut TX,
    ) -> Result<Activity, SchedError> {
        if self.latch.is_faulted() {
            return Err(SchedError::Faulted);
        }

        if !self.booted || self.ready.is_set() {
            if !self.booted {
                log_info!("scheduler started");
            }
            self.booted = true;
            return Ok(Activity::Swept(scheduler.sweep(self.ready)));
        }

        if consumer.drain_one(tx) {
            Ok(Activity::Drained)
        } else {
            Ok(Activity::Idle)
        }
    }

    /// 前台主循环, 永不返回
    pub fn run<const T: usize, const N: usize, TX: DebugTx>(
        &mut self,
        scheduler: &mut Scheduler<'_, T>,
        consumer: &mut Consumer<'_, N>,
        tx: &mut TX,
    ) -> ! {
        loop {
            if self.poll(scheduler, consumer, tx).is_err() {
                // 故障循环接管了一切, 这里只剩等待复位
                core::hint::spin_loop();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::indicator::tests::TestPin;
    use crate::hw::Indicator;
    use crate::sync::ringbuffer::DebugRing;
    use crate::tasks::fatal::{FatalCode, FatalHandler, SystemState};
    use crate::tasks::scheduler::{TaskId, TaskTable};
    use core::cell::Cell;
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

    #[test]
    fn test_boot_sweep_then_one_sweep_per_tick() {
        let ready = ReadyFlag::new();
        let latch = FaultLatch::new();
        let source = TickSource::new(&ready, &latch);
        let mut fg = Foreground::new(&ready, &latch);

        let ring: DebugRing<64> = DebugRing::new();
        let mut consumer = ring.consumer().unwrap();
        let mut tx = VecTx(Vec::new());

        let runs = Cell::new(0u32);
        let task = || runs.set(runs.get() + 1);
        let mut table = TaskTable::<2>::new();
        table.task(1, &task).unwrap();
        let mut sched = table.finish();

        assert!(matches!(fg.poll(&mut sched, &mut consumer, &mut tx), Ok(Activity::Swept(_))));
        // 无节拍: 不扫描
        for _ in 0..5 {
            assert_eq!(fg.poll(&mut sched, &mut consumer, &mut tx), Ok(Activity::Idle));
        }
        assert_eq!(sched.sweeps(), 1);

        for tick in 1..=3u32 {
            source.on_tick().unwrap();
            assert!(ready.is_set());
            assert!(matches!(fg.poll(&mut sched, &mut consumer, &mut tx), Ok(Activity::Swept(_))));
            assert!(!ready.is_set());
            assert_eq!(fg.poll(&mut sched, &mut consumer, &mut tx), Ok(Activity::Idle));
            assert_eq!(sched.sweeps(), tick + 1);
        }
        assert_eq!(runs.get(), 3);
        assert_eq!(source.ticks(), 3);
    }

    #[test]
    fn test_idle_time_drains_task_output() {
        let ready = ReadyFlag::new();
        let latch = FaultLatch::new();
        let source = TickSource::new(&ready, &latch);
        let mut fg = Foreground::new(&ready, &latch);

        let ring: DebugRing<64> = DebugRing::new();
        let mut consumer = ring.consumer().unwrap();
        let mut tx = VecTx(Vec::new());

        let say = || {
            ring.write_bytes(b"hi");
        };
        let mut table = TaskTable::<2>::new();
        let id = table.task(2, &say).unwrap();
        let mut sched = table.finish();

        fg.poll(&mut sched, &mut consumer, &mut tx).unwrap();
        for _ in 0..2 {
            source.on_tick().unwrap();
            if let Ok(Activity::Swept(report)) = fg.poll(&mut sched, &mut consumer, &mut tx) {
                assert_eq!(report.fired(id), report.sweep == 3);
            } else {
                panic!("expected a sweep");
            }
        }

        assert_eq!(fg.poll(&mut sched, &mut consumer, &mut tx), Ok(Activity::Drained));
        assert_eq!(fg.poll(&mut sched, &mut consumer, &mut tx), Ok(Activity::Drained));
        assert_eq!(fg.poll(&mut sched, &mut consumer, &mut tx), Ok(Activity::Idle));
        assert_eq!(tx.0, b"hi");
    }

    #[test]
    fn test_periods_1_10_1_through_foreground() {
        let ready = ReadyFlag::new();
        let latch = FaultLatch::new();
        let source = TickSource::new(&ready, &latch);
        let mut fg = Foreground::new(&ready, &latch);

        let ring: DebugRing<16> = DebugRing::new();
        let mut consumer = ring.consumer().unwrap();
        let mut tx = VecTx(Vec::new());

        let counts = [Cell::new(0u32), Cell::new(0u32), Cell::new(0u32)];
        let t0 = || counts[0].set(counts[0].get() + 1);
        let t1 = || counts[1].set(counts[1].get() + 1);
        let t2 = || counts[2].set(counts[2].get() + 1);
        let mut table = TaskTable::<3>::new();
        table.task(1, &t0).unwrap();
        table.task(10, &t1).unwrap();
        let mut sched = table.finish_with_monitor(&t2).unwrap();

        fg.poll(&mut sched, &mut consumer, &mut tx).unwrap();
        let mut t1_ticks = Vec::new();
        for tick in 1..=25u32 {
            source.on_tick().unwrap();
            match fg.poll(&mut sched, &mut consumer, &mut tx) {
                Ok(Activity::Swept(report)) if report.fired(TaskId(1)) => t1_ticks.push(tick),
                Ok(Activity::Swept(_)) => {}
                other => panic!("unexpected {:?}", other),
            }
        }

        assert_eq!(counts[0].get(), 25);
        assert_eq!(counts[1].get(), 2);
        assert_eq!(counts[2].get(), 25);
        assert_eq!(t1_ticks, [10, 20]);
    }

    #[test]
    fn test_back_to_back_ticks_enter_fatal_path() {
        let ready = ReadyFlag::new();
        let latch = FaultLatch::new();
        let source = TickSource::new(&ready, &latch);
        let mut fg = Foreground::new(&ready, &latch);

        let ring: DebugRing<256> = DebugRing::new();
        let pin = TestPin::default();
        let led = Indicator::new(pin.clone());
        let handler = FatalHandler::new(&ring, &led, &latch).with_spin(512);

        let nop = || {};
        let mut table = TaskTable::<1>::new();
        table.task(1, &nop).unwrap();
        let mut sched = table.finish();
        let mut consumer = ring.consumer().unwrap();
        let mut tx = VecTx(Vec::new());
        fg.poll(&mut sched, &mut consumer, &mut tx).unwrap();

        // 两个节拍之间没有完成扫描
        let mut entries = 0;
        for _ in 0..2 {
            if let Err(SchedError::Overrun) = source.on_tick() {
                if handler.enter(FatalCode::SchedulerOverrun) {
                    entries += 1;
                }
            }
        }
        assert_eq!(entries, 1);
        assert_eq!(latch.state(), SystemState::Faulted);
        assert!(led.is_on());
        assert!(led.is_latched());

        // 正常调度不再恢复
        assert_eq!(
            fg.poll(&mut sched, &mut consumer, &mut tx),
            Err(SchedError::Faulted)
        );
        assert_eq!(source.on_tick(), Err(SchedError::Faulted));
        assert!(!handler.enter(FatalCode::SchedulerOverrun));

        // 故障循环持续输出横幅, 指示灯保持常亮
        for _ in 0..3 {
            handler.cycle(FatalCode::SchedulerOverrun, "Scheduler Overrun Error.", &mut consumer, &mut tx);
            led.off();
            assert!(led.is_on());
        }
        let text = String::from_utf8(tx.0).unwrap();
        assert_eq!(text.matches("!!! -- FATAL ERROR (0) -- !!!").count(), 3);
        assert!(pin.high.load(std::sync::atomic::Ordering::SeqCst));
    }
}
