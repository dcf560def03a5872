//! 核心维护任务
//!
//! 这些任务由调度核心自己登记, 为系统提供活性与负载可视化:
//! - `tick_counter`: 节拍计数 (每节拍, 最便宜的任务, 用作心跳)
//! - `blink_on`: 约每秒点亮一次负载指示灯
//! - `blink_off`: 每节拍检查, 点亮时长与最坏扫描耗时成正比
//! - `heartbeat`: 定期打印节拍计数
//! - `load_monitor`: 采样节拍定时器计数值, 更新负载水位 (必须最后运行)
//!
//! 指示灯每秒闪一次, 脉宽反映一个节拍内最多用掉了多少时间

use crate::config::{LOAD_SHIFT, SYSTEM_TIMER_MAX_INIT};
use crate::hw::{FreeRunningCounter, Indicator};
use crate::sync::primitives::AtomicCounter;
use crate::sync::ringbuffer::DebugRing;
use crate::{dprint, dprintln, NAME, VERSION};

use embedded_hal::digital::OutputPin;

/// 维护任务的共享状态
///
/// 计数器只由调度器在前台修改, 使用原子类型是为了让诊断读取
/// 可以发生在任意上下文
pub struct Housekeeping<'a, P, C, const N: usize> {
    indicator: &'a Indicator<P>,
    counter: C,
    console: &'a DebugRing<N>,
    tick_counter: AtomicCounter,
    led_counter: AtomicCounter,
    system_timer_max: AtomicCounter,
}

impl<'a, P, C, const N: usize> Housekeeping<'a, P, C, N>
where
    P: OutputPin,
    C: FreeRunningCounter,
{
    pub fn new(indicator: &'a Indicator<P>, counter: C, console: &'a DebugRing<N>) -> Self {
        Self {
            indicator,
            counter,
            console,
            tick_counter: AtomicCounter::new(),
            led_counter: AtomicCounter::new(),
            system_timer_max: AtomicCounter::with_value(SYSTEM_TIMER_MAX_INIT),
        }
    }

    /// 打印启动横幅
    pub fn banner(&self) {
        dprintln!(self.console);
        dprintln!(self.console, "{} v{} RT Scheduler", NAME, VERSION);
        dprintln!(self.console, "=========================");
    }

    // ===== 任务 =====

    /// 节拍计数
    #[inline]
    pub fn tick_counter(&self) {
        self.tick_counter.increment();
    }

    /// 点亮指示灯并重新开始计时
    pub fn blink_on(&self) {
        self.indicator.on();
        self.led_counter.reset();
    }

    /// 点亮时长达到 `水位 / 16` 个节拍后熄灭
    pub fn blink_off(&self) {
        let max_elapsed = self.system_timer_max.get() >> LOAD_SHIFT;
        if self.led_counter.increment() >= max_elapsed {
            self.indicator.off();
        }
    }

    /// 打印节拍计数
    pub fn heartbeat(&self) {
        dprint!(self.console, "sys counter is : {}\n", self.tick_counter.get());
    }

    /// 更新负载水位
    ///
    /// 必须是表中最后一个任务: 此时计数值反映整轮扫描的耗时
    pub fn load_monitor(&self) {
        let sample = self.counter.sample();
        self.system_timer_max.raise_to(sample);
    }

    // ===== 诊断 =====

    /// 已计数的节拍数
    pub fn ticks(&self) -> u32 {
        self.tick_counter.get()
    }

    /// 负载水位 (计数器单位)
    pub fn system_timer_max(&self) -> u32 {
        self.system_timer_max.get()
    }

    /// 指示灯点亮后经过的节拍数
    pub fn led_counter(&self) -> u32 {
        self.led_counter.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::indicator::tests::TestPin;
    use core::cell::Cell;
    use std::vec::Vec;

    fn drain<const N: usize>(ring: &DebugRing<N>) -> Vec<u8> {
        let mut consumer = ring.consumer().unwrap();
        let mut out = Vec::new();
        while let Some(byte) = consumer.pop() {
            out.push(byte);
        }
        out
    }

    #[test]
    fn test_blink_pulse_width_follows_watermark() {
        let led = Indicator::new(TestPin::default());
        let ring: DebugRing<64> = DebugRing::new();
        let hk = Housekeeping::new(&led, || 0u32, &ring);

        // 初始水位 100 → 100 >> 4 = 6 个节拍
        hk.blink_on();
        assert!(led.is_on());
        for _ in 0..5 {
            hk.blink_off();
            assert!(led.is_on());
        }
        hk.blink_off();
        assert!(!led.is_on());
        assert_eq!(hk.led_counter(), 6);
    }

    #[test]
    fn test_load_monitor_keeps_maximum() {
        let led = Indicator::new(TestPin::default());
        let ring: DebugRing<64> = DebugRing::new();
        let sample = Cell::new(50u32);
        let hk = Housekeeping::new(&led, || sample.get(), &ring);

        hk.load_monitor();
        assert_eq!(hk.system_timer_max(), 100);

        sample.set(3200);
        hk.load_monitor();
        assert_eq!(hk.system_timer_max(), 3200);

        sample.set(10);
        hk.load_monitor();
        assert_eq!(hk.system_timer_max(), 3200);

        // 更高的水位 → 更长的点亮时间 (3200 >> 4 = 200)
        hk.blink_on();
        for _ in 0..199 {
            hk.blink_off();
        }
        assert!(led.is_on());
        hk.blink_off();
        assert!(!led.is_on());
    }

    #[test]
    fn test_heartbeat_prints_tick_count() {
        let led = Indicator::new(TestPin::default());
        let ring: DebugRing<64> = DebugRing::new();
        let hk = Housekeeping::new(&led, || 0u32, &ring);

        for _ in 0..42 {
            hk.tick_counter();
        }
        hk.heartbeat();

        assert_eq!(hk.ticks(), 42);
        assert_eq!(drain(&ring), b"sys counter is : 42\r\n");
    }

    #[test]
    fn test_banner_uses_crlf() {
        let led = Indicator::new(TestPin::default());
        let ring: DebugRing<128> = DebugRing::new();
        let hk = Housekeeping::new(&led, || 0u32, &ring);

        hk.banner();
        let out = drain(&ring);
        assert!(out.starts_with(b"\r\ncoopsched v"));
        assert!(out.ends_with(b"=========================\r\n"));
    }

    #[test]
    fn test_fault_latch_overrides_blink_off() {
        let led = Indicator::new(TestPin::default());
        let ring: DebugRing<64> = DebugRing::new();
        let hk = Housekeeping::new(&led, || 0u32, &ring);

        led.force_on();
        for _ in 0..10 {
            hk.blink_off();
        }
        assert!(led.is_on());
    }
}
