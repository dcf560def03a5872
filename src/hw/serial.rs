//! 共享调试串口
//!
//! 串口发送端放在临界区单元里, 由前台排空与致命错误路径共用。
//! 致命错误路径可能发生在单元被借用的中途 (例如 panic),
//! 因此这里只 `try_borrow_mut`, 借用失败时视为设备忙, 绝不再次 panic。

use embedded_io::{Write, WriteReady};

use crate::hw::DebugTx;
use crate::sync::primitives::CriticalCell;
use crate::util::log::*;

/// 基于 `embedded_io` 的共享发送设备
pub struct SharedSerial<'a, W> {
    port: &'a CriticalCell<Option<W>>,
    lost: u32,
}

impl<'a, W: Write + WriteReady> SharedSerial<'a, W> {
    pub const fn new(port: &'a CriticalCell<Option<W>>) -> Self {
        Self { port, lost: 0 }
    }

    /// 设备报告就绪但写入失败而丢失的字节数
    pub fn lost(&self) -> u32 {
        self.lost
    }
}

impl<W: Write + WriteReady> DebugTx for SharedSerial<'_, W> {
    fn is_ready(&mut self) -> bool {
        self.port.lock(|cell| match cell.try_borrow_mut() {
            Ok(mut port) => port
                .as_mut()
                .is_some_and(|w| w.write_ready().unwrap_or(false)),
            Err(_) => false,
        })
    }

    fn write(&mut self, byte: u8) {
        let written = self.port.lock(|cell| match cell.try_borrow_mut() {
            Ok(mut port) => match port.as_mut() {
                Some(w) => matches!(w.write(&[byte]), Ok(1)),
                None => false,
            },
            Err(_) => false,
        });

        if !written {
            self.lost = self.lost.wrapping_add(1);
            log_warn!("debug uart: byte lost");
        }
    }
}
