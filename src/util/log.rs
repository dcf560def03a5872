//! 条件编译日志系统
//!
//! 根据 feature 选择不同的日志后端:
//! - `log-defmt`: 使用 defmt (高效二进制日志)
//! - `dev` / `log-println`: 使用 esp-println (文本日志)
//! - 默认 (release / 主机测试): 不输出, 参数只做类型检查
//!
//! 日志只用于开发诊断; 面向操作员的调试文本 (启动横幅、心跳、
//! 致命错误横幅) 走 `DebugRing`。
//!
//! 五个级别宏只定义一次, 统一转发给 `__log_emit!`,
//! 后端的选择集中在 `__log_emit!` 的三个 cfg 变体里。
//!
//! # 日志级别
//! - `log_error!` / `log_warn!` / `log_info!` / `log_debug!` / `log_trace!`
//!
//! 只能用在语句位置。

// ===================================================================
// 后端: defmt
// ===================================================================
#[cfg(feature = "log-defmt")]
#[doc(hidden)]
#[macro_export]
macro_rules! __log_emit {
    (error, $($arg:tt)*) => { defmt::error!($($arg)*) };
    (warn, $($arg:tt)*) => { defmt::warn!($($arg)*) };
    (info, $($arg:tt)*) => { defmt::info!($($arg)*) };
    (debug, $($arg:tt)*) => { defmt::debug!($($arg)*) };
    (trace, $($arg:tt)*) => { defmt::trace!($($arg)*) };
}

// ===================================================================
// 后端: esp-println
// ===================================================================
#[cfg(all(any(feature = "dev", feature = "log-println"), not(feature = "log-defmt")))]
#[doc(hidden)]
#[macro_export]
macro_rules! __log_emit {
    (error, $($arg:tt)*) => { $crate::__log_emit!(@line "ERROR", $($arg)*) };
    (warn, $($arg:tt)*) => { $crate::__log_emit!(@line "WARN", $($arg)*) };
    (info, $($arg:tt)*) => { $crate::__log_emit!(@line "INFO", $($arg)*) };
    (debug, $($arg:tt)*) => { $crate::__log_emit!(@line "DEBUG", $($arg)*) };
    (trace, $($arg:tt)*) => { $crate::__log_emit!(@line "TRACE", $($arg)*) };
    (@line $tag:literal, $($arg:tt)*) => {
        esp_println::println!("[{}] {}", $tag, format_args!($($arg)*))
    };
}

// ===================================================================
// 后端: 无 (release 模式 / 主机测试)
// ===================================================================
#[cfg(not(any(feature = "dev", feature = "log-defmt", feature = "log-println")))]
#[doc(hidden)]
#[macro_export]
macro_rules! __log_emit {
    ($level:ident, $($arg:tt)*) => {
        // 不求值, 只让参数参与类型检查 (避免未使用变量告警)
        if false {
            let _ = format_args!($($arg)*);
        }
    };
}

// ===================================================================
// 级别宏
// ===================================================================

/// 错误
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => { $crate::__log_emit!(error, $($arg)*) };
}

/// 警告
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => { $crate::__log_emit!(warn, $($arg)*) };
}

/// 一般信息
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => { $crate::__log_emit!(info, $($arg)*) };
}

/// 调试信息
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => { $crate::__log_emit!(debug, $($arg)*) };
}

/// 详细跟踪
#[macro_export]
macro_rules! log_trace {
    ($($arg:tt)*) => { $crate::__log_emit!(trace, $($arg)*) };
}

// ===================================================================
// 便捷重导出
// ===================================================================
#[allow(unused_imports)]
pub use crate::{log_debug, log_error, log_info, log_trace, log_warn};
