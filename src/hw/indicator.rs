//! 指示灯
//!
//! 前台任务 (`blink_on` / `blink_off`) 与致命错误路径 (可能在中断中)
//! 共享同一个引脚, 因此引脚放在临界区互斥单元中。
//! `force_on` 之后指示灯被锁定为常亮, 后续 `off` 无效。

use embedded_hal::digital::OutputPin;

use crate::sync::primitives::{new_cell, CriticalCell};
use crate::util::log::*;

struct State<P> {
    pin: Option<P>,
    lit: bool,
    latched: bool,
}

impl<P: OutputPin> State<P> {
    /// 驱动引脚到当前状态
    fn drive(&mut self) -> bool {
        let lit = self.lit;
        match self.pin.as_mut() {
            Some(pin) if lit => pin.set_high().is_ok(),
            Some(pin) => pin.set_low().is_ok(),
            None => true,
        }
    }
}

/// 负载/故障指示灯
pub struct Indicator<P> {
    state: CriticalCell<State<P>>,
}

impl<P: OutputPin> Indicator<P> {
    /// 包装输出引脚, 初始状态为熄灭
    pub const fn new(pin: P) -> Self {
        Self::with_pin(Some(pin))
    }

    /// 尚未绑定引脚的指示灯, 用于 `static`
    pub const fn detached() -> Self {
        Self::with_pin(None)
    }

    const fn with_pin(pin: Option<P>) -> Self {
        Self {
            state: new_cell(State {
                pin,
                lit: false,
                latched: false,
            }),
        }
    }

    /// 绑定引脚, 并立即输出当前状态
    pub fn attach(&self, pin: P) {
        self.state.lock(|cell| {
            let mut state = cell.borrow_mut();
            state.pin = Some(pin);
            if !state.drive() {
                log_warn!("indicator: attach failed");
            }
        });
    }

    /// 点亮
    pub fn on(&self) {
        self.state.lock(|cell| {
            let mut state = cell.borrow_mut();
            state.lit = true;
            if !state.drive() {
                log_warn!("indicator: set_high failed");
            }
        });
    }

    /// 熄灭 (锁定后无效)
    pub fn off(&self) {
        self.state.lock(|cell| {
            let mut state = cell.borrow_mut();
            if state.latched {
                return;
            }
            state.lit = false;
            if !state.drive() {
                log_warn!("indicator: set_low failed");
            }
        });
    }

    /// 点亮并永久锁定
    pub fn force_on(&self) {
        self.state.lock(|cell| {
            let mut state = cell.borrow_mut();
            state.lit = true;
            state.latched = true;
            // 故障路径不能依赖日志, 忽略引脚错误
            let _ = state.drive();
        });
    }

    /// 当前是否点亮
    pub fn is_on(&self) -> bool {
        self.state.lock(|cell| cell.borrow().lit)
    }

    /// 是否已被故障锁定
    pub fn is_latched(&self) -> bool {
        self.state.lock(|cell| cell.borrow().latched)
    }
}
