//! 中断安全的调试环形缓冲区
//!
//! 多生产者单消费者 (MPSC) 字节环形缓冲区
//! 特点:
//! - 生产者可在任意上下文调用 (前台任务或任意优先级中断)
//! - 无锁实现 (原子 CAS 预留槽位)
//! - 满时静默丢弃, 生产者永不阻塞
//! - 编译时确定容量 (必须是 2 的幂)
//!
//! # 预留与发布分离
//!
//! `head` 只负责预留槽位, 每个槽位另有一个 `ready` 标记负责发布:
//! 生产者先写入数据, 再以 Release 置位 `ready`; 消费者只有以 Acquire
//! 观察到 `ready` 后才读取。低优先级生产者在预留与写入之间被高优先级
//! 生产者抢占时, 消费者会停在未发布的槽位上等待, 而不会读到未写入的数据。

use core::cell::UnsafeCell;
use core::fmt;

use portable_atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::hw::DebugTx;
use crate::sync::primitives::AtomicCounter;

/// 单个槽位: 数据 + 发布标记
struct Slot {
    byte: UnsafeCell<u8>,
    ready: AtomicBool,
}

impl Slot {
    const EMPTY: Slot = Slot {
        byte: UnsafeCell::new(0),
        ready: AtomicBool::new(false),
    };
}

/// 调试环形缓冲区
///
/// 可用容量为 `N - 1`: 保留一个槽位以区分满与空
///
/// # Type Parameters
/// * `N` - 槽位数 (必须是 2 的幂以用掩码回绕)
///
/// # Example
/// ```ignore
/// static DEBUG: DebugRing<256> = DebugRing::new();
///
/// // 生产者 (任意上下文)
/// DEBUG.enqueue(b'A');
///
/// // 消费者 (仅前台空闲时间)
/// let mut consumer = DEBUG.consumer().unwrap();
/// consumer.drain_one(&mut uart);
/// ```
#[repr(C, align(32))] // 缓存行对齐
pub struct DebugRing<const N: usize> {
    /// 数据存储
    slots: [Slot; N],
    /// 预留游标 (多个生产者, CAS 推进), 自由运行
    head: AtomicUsize,
    /// 读取游标 (仅消费者写入), 自由运行
    tail: AtomicUsize,
    /// 消费者句柄是否已被领取
    consumer_taken: AtomicBool,
    /// 因缓冲区满而丢弃的字节数
    dropped: AtomicCounter,
}

// Safety: 槽位数据只在预留成功后由唯一的生产者写入,
// 并只在 `ready` 发布后由唯一的消费者读取
unsafe impl<const N: usize> Sync for DebugRing<N> {}

impl<const N: usize> DebugRing<N> {
    const MASK: usize = N - 1;

    /// 创建新的空环形缓冲区
    ///
    /// # Panics
    /// 编译时检查 N 必须是 2 的幂
    pub const fn new() -> Self {
        assert!(N > 1 && (N & (N - 1)) == 0, "N must be a power of 2");

        Self {
            slots: [Slot::EMPTY; N],
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
            consumer_taken: AtomicBool::new(false),
            dropped: AtomicCounter::new(),
        }
    }

    /// 槽位数
    #[inline(always)]
    pub const fn capacity(&self) -> usize {
        N
    }

    /// 可用容量 (N - 1)
    #[inline(always)]
    pub const fn usable_capacity(&self) -> usize {
        N - 1
    }

    /// 已预留但尚未读取的字节数
    #[inline(always)]
    pub fn len(&self) -> usize {
        let tail = self.tail.load(Ordering::Acquire);
        let head = self.head.load(Ordering::Acquire);
        head.wrapping_sub(tail)
    }

    /// 是否为空
    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 是否已满
    #[inline(always)]
    pub fn is_full(&self) -> bool {
        self.len() >= N - 1
    }

    /// 当前预留游标 (诊断用)
    #[inline(always)]
    pub fn head(&self) -> usize {
        self.head.load(Ordering::Acquire)
    }

    /// 当前读取游标 (诊断用)
    #[inline(always)]
    pub fn tail(&self) -> usize {
        self.tail.load(Ordering::Acquire)
    }

    /// 因缓冲区满而丢弃的字节数
    #[inline(always)]
    pub fn dropped(&self) -> u32 {
        self.dropped.get()
    }

    /// 写入单个字节 (任意上下文, 非阻塞)
    ///
    /// 缓冲区满时字节被静默丢弃, 调用方不会收到任何信号
    #[inline]
    pub fn enqueue(&self, byte: u8) {
        self.try_enqueue(byte);
    }

    /// 写入单个字节, 返回是否被接受
    fn try_enqueue(&self, byte: u8) -> bool {
        let mut head = self.head.load(Ordering::Relaxed);

        // 预留: CAS 保证两个生产者永远不会拿到同一个槽位,
        // 即使其中一个在中途被更高优先级的生产者打断
        loop {
            let tail = self.tail.load(Ordering::Acquire);
            if head.wrapping_sub(tail) >= N - 1 {
                self.dropped.increment();
                return false; // 已满
            }

            match self.head.compare_exchange_weak(
                head,
                head.wrapping_add(1),
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(current) => head = current, // CAS 失败，重试
            }
        }

        // 发布: 先写数据, 再置位 ready
        let slot = &self.slots[head & Self::MASK];
        unsafe {
            slot.byte.get().write(byte);
        }
        slot.ready.store(true, Ordering::Release);
        true
    }

    /// 批量写入
    ///
    /// # Returns
    /// 实际写入的字节数 (其余被丢弃)
    pub fn write_bytes(&self, data: &[u8]) -> usize {
        data.iter().filter(|&&byte| self.try_enqueue(byte)).count()
    }

    /// 获取格式化写入器
    #[inline]
    pub fn writer(&self) -> DebugWriter<'_, N> {
        DebugWriter { ring: self }
    }

    /// 领取唯一的消费者句柄
    ///
    /// 第二次调用返回 `None`
    pub fn consumer(&self) -> Option<Consumer<'_, N>> {
        if self.consumer_taken.swap(true, Ordering::AcqRel) {
            None
        } else {
            Some(Consumer {
                ring: self,
                abandon_unpublished: false,
            })
        }
    }

    /// 强制获取消费者句柄, 无论是否已被领取
    ///
    /// 窃取得到的句柄把已预留但未发布的槽位视为永久丢失并跳过:
    /// 中断被永久屏蔽后, 被打断在预留与发布之间的生产者再也不会恢复,
    /// 停在它的槽位上等待只会让输出永远卡住
    ///
    /// # Safety
    /// 调用方必须保证原有的消费者, 以及任何已预留槽位但尚未发布的
    /// 生产者, 都再也不会运行 (例如致命错误路径已永久屏蔽中断)
    pub unsafe fn steal_consumer(&self) -> Consumer<'_, N> {
        self.consumer_taken.store(true, Ordering::Release);
        Consumer {
            ring: self,
            abandon_unpublished: true,
        }
    }

    /// 模拟在预留与发布之间被抢占的生产者
    #[cfg(test)]
    pub(crate) fn reserve_unpublished(&self) {
        self.head.fetch_add(1, Ordering::AcqRel);
    }
}

impl<const N: usize> Default for DebugRing<N> {
    fn default() -> Self {
        Self::new()
    }
}

// ===== 消费者 =====

/// 唯一的消费者句柄
///
/// 只应在最低优先级上下文使用 (前台空闲时间或致命错误循环)
pub struct Consumer<'a, const N: usize> {
    ring: &'a DebugRing<N>,
    /// 跳过未发布的槽位 (仅窃取的句柄)
    abandon_unpublished: bool,
}

impl<'a, const N: usize> Consumer<'a, N> {
    /// 查看下一个已发布的字节 (不消费)
    ///
    /// 下一个槽位已预留但尚未发布时返回 `None`
    #[inline]
    pub fn peek(&self) -> Option<u8> {
        let tail = self.ring.tail.load(Ordering::Relaxed);
        let head = self.ring.head.load(Ordering::Acquire);

        if head == tail {
            return None; // 为空
        }

        let slot = &self.ring.slots[tail & DebugRing::<N>::MASK];
        if !slot.ready.load(Ordering::Acquire) {
            return None; // 已预留, 未发布
        }

        Some(unsafe { slot.byte.get().read() })
    }

    /// 读取单个字节
    #[inline]
    pub fn pop(&mut self) -> Option<u8> {
        if self.abandon_unpublished {
            self.skip_unpublished();
        }
        let byte = self.peek()?;

        let tail = self.ring.tail.load(Ordering::Relaxed);
        self.ring.slots[tail & DebugRing::<N>::MASK]
            .ready
            .store(false, Ordering::Relaxed);
        // Release: 槽位清空先于游标推进对生产者可见
        self.ring.tail.store(tail.wrapping_add(1), Ordering::Release);
        Some(byte)
    }

    /// 越过 `tail` 处连续的未发布槽位
    ///
    /// # Returns
    /// 跳过的槽位数
    fn skip_unpublished(&mut self) -> usize {
        let start = self.ring.tail.load(Ordering::Relaxed);
        let head = self.ring.head.load(Ordering::Acquire);

        let mut tail = start;
        while tail != head && !self.ring.slots[tail & DebugRing::<N>::MASK].ready.load(Ordering::Acquire) {
            tail = tail.wrapping_add(1);
        }

        if tail != start {
            self.ring.tail.store(tail, Ordering::Release);
        }
        tail.wrapping_sub(start)
    }

    /// 向发送设备转移一个字节
    ///
    /// 设备空闲且缓冲区非空时恰好转移一个字节并推进 `tail`
    ///
    /// # Returns
    /// 是否转移了一个字节
    pub fn drain_one<T: DebugTx>(&mut self, tx: &mut T) -> bool {
        if !tx.is_ready() {
            return false;
        }

        match self.pop() {
            Some(byte) => {
                tx.write(byte);
                true
            }
            None => false,
        }
    }
}

// ===== 格式化写入 =====

/// `core::fmt::Write` 适配器
///
/// 与串口终端约定一致, `\n` 被展开为 `\r\n`
pub struct DebugWriter<'a, const N: usize> {
    ring: &'a DebugRing<N>,
}

impl<const N: usize> fmt::Write for DebugWriter<'_, N> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for &byte in s.as_bytes() {
            if byte == b'\n' {
                self.ring.enqueue(b'\r');
            }
            self.ring.enqueue(byte);
        }
        // 丢弃不是错误
        Ok(())
    }
}

/// 格式化打印到调试缓冲区
#[macro_export]
macro_rules! dprint {
    ($ring:expr, $($arg:tt)*) => {{
        let _ = core::fmt::Write::write_fmt(&mut $ring.writer(), format_args!($($arg)*));
    }};
}

/// 格式化打印到调试缓冲区并换行
#[macro_export]
macro_rules! dprintln {
    ($ring:expr) => {
        $crate::dprint!($ring, "\n")
    };
    ($ring:expr, $($arg:tt)*) => {{
        $crate::dprint!($ring, $($arg)*);
        $crate::dprint!($ring, "\n");
    }};
}
