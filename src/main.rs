//! CoopSched - ESP32-S3 板级固件
//!
//! 把库里的调度核心绑定到真实外设:
//! - TIMG0 周期定时器: 5 ms 调度节拍 (Priority3)
//! - TIMG1 单次定时器: 演示用高优先级中断 (Priority5), 只打印
//! - UART0 发送: 调试输出, 由前台空闲时间逐字节排空
//! - GPIO2: 负载/故障指示灯
//!
//! 硬件目标: ESP32-S3-N16R8

#![no_std]
#![no_main]

use core::cell::RefCell;

use coopsched::config::{
    BLINK_ON_PERIOD, DEBUG_RING_SIZE, DEMO_TIMER_DELAY_US, HEARTBEAT_PERIOD, MAX_TASKS,
    PRINT_TIMER_PERIOD, SYSTEM_TICK_TIMER, TICK_PERIOD_MS,
};
use coopsched::sync::primitives::new_cell;
use coopsched::tasks::scheduler::TaskFn;
use coopsched::util::log::*;
use coopsched::{
    CriticalCell, DebugRing, FatalCode, FatalHandler, FaultLatch, Foreground, Housekeeping, Indicator,
    ReadyFlag, SchedError, Scheduler, SharedSerial, TaskTable, TickSource,
};
use esp_hal::{
    gpio::{Level, Output, OutputConfig},
    handler,
    interrupt::Priority,
    time::{Duration, Instant},
    timer::{timg::TimerGroup, OneShotTimer, PeriodicTimer},
    uart::{Config as UartConfig, Uart, UartTx},
    Blocking,
};
use portable_atomic::{AtomicU64, Ordering};

esp_bootloader_esp_idf::esp_app_desc!();

// ===== Panic Handler =====
#[cfg(feature = "dev")]
use esp_backtrace as _;

/// 非开发模式下 panic 也走致命错误路径, 保证串口上有输出
#[cfg(not(feature = "dev"))]
#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    FATAL.fatal(FatalCode::Panic, "panic", &mut debug_tx())
}

// ===== 静态分配 =====
// 中断与前台共享的对象全部是 'static

/// 调试输出缓冲区
static DEBUG: DebugRing<DEBUG_RING_SIZE> = DebugRing::new();

/// 调度就绪标志
static READY: ReadyFlag = ReadyFlag::new();

/// 故障锁存器
static FAULT: FaultLatch = FaultLatch::new();

/// 节拍中断体
static TICK: TickSource<'static> = TickSource::new(&READY, &FAULT);

/// 负载/故障指示灯, 引脚在初始化时绑定
static LED: Indicator<Output<'static>> = Indicator::detached();

/// 致命错误处理器
static FATAL: FatalHandler<'static, Output<'static>, DEBUG_RING_SIZE> =
    FatalHandler::new(&DEBUG, &LED, &FAULT);

/// 调试串口发送端 (前台排空与故障循环共用)
static DEBUG_UART: CriticalCell<Option<UartTx<'static, Blocking>>> = new_cell(None);

/// 调度节拍定时器
static TICK_TIMER: CriticalCell<Option<PeriodicTimer<'static, Blocking>>> = new_cell(None);

/// 演示定时器
static DEMO_TIMER: CriticalCell<Option<OneShotTimer<'static, Blocking>>> = new_cell(None);

/// 最近一个节拍开始的时刻 (μs)
static TICK_START_US: AtomicU64 = AtomicU64::new(0);

// ===== 硬件适配 =====

/// 通过全局串口句柄发送的调试输出设备
///
/// 每次访问都在临界区内完成, 节拍中断不会在借用中途打断前台
fn debug_tx() -> SharedSerial<'static, UartTx<'static, Blocking>> {
    SharedSerial::new(&DEBUG_UART)
}

/// 当前节拍内经过的时间, 换算为节拍定时器计数单位
///
/// 一个完整节拍对应 `SYSTEM_TICK_TIMER` 个单位
fn tick_timer_count() -> u32 {
    let now = Instant::now().duration_since_epoch().as_micros();
    let elapsed = now.saturating_sub(TICK_START_US.load(Ordering::Acquire));
    let units = elapsed * SYSTEM_TICK_TIMER as u64 / (TICK_PERIOD_MS as u64 * 1000);
    units.min(u32::MAX as u64) as u32
}

fn with_timer<T>(timer: &CriticalCell<Option<T>>, f: impl FnOnce(&mut T)) {
    timer.lock(|cell: &RefCell<Option<T>>| {
        if let Some(t) = cell.borrow_mut().as_mut() {
            f(t);
        }
    });
}

/// 按顺序登记任务, 负载监控放在最后
fn build_scheduler<'a>(
    tasks: &[(u32, TaskFn<'a>)],
    monitor: TaskFn<'a>,
) -> Result<Scheduler<'a, MAX_TASKS>, SchedError> {
    let mut table = TaskTable::new();
    for &(period, tick_fn) in tasks {
        table.task(period, tick_fn)?;
    }
    table.finish_with_monitor(monitor)
}

/// 初始化失败: 点亮指示灯并停机
fn halt() -> ! {
    LED.force_on();
    loop {
        core::hint::spin_loop();
    }
}

// ===== 中断处理 =====

#[handler(priority = Priority::Priority3)]
fn tick_isr() {
    with_timer(&TICK_TIMER, |t| t.clear_interrupt());
    TICK_START_US.store(
        Instant::now().duration_since_epoch().as_micros(),
        Ordering::Release,
    );

    if let Err(SchedError::Overrun) = TICK.on_tick() {
        FATAL.fatal(
            FatalCode::SchedulerOverrun,
            "Scheduler Overrun Error.",
            &mut debug_tx(),
        );
    }
}

#[handler(priority = Priority::Priority5)]
fn demo_timer_isr() {
    with_timer(&DEMO_TIMER, |t| t.clear_interrupt());
    DEBUG.write_bytes(b"*TIMER 2*\r\n");
}

// ===== 主入口点 =====
#[esp_hal::main]
fn main() -> ! {
    // ========================================
    // 1. 硬件初始化
    // ========================================
    let peripherals = esp_hal::init(esp_hal::Config::default());

    LED.attach(Output::new(
        peripherals.GPIO2,
        Level::Low,
        OutputConfig::default(),
    ));

    // ========================================
    // 2. 调试串口
    // ========================================
    let uart = match Uart::new(
        peripherals.UART0,
        UartConfig::default().with_baudrate(115_200),
    ) {
        Ok(uart) => uart.with_tx(peripherals.GPIO43).with_rx(peripherals.GPIO44),
        Err(_) => halt(),
    };
    let (_rx, tx) = uart.split();
    DEBUG_UART.lock(|cell| cell.replace(Some(tx)));

    let Some(mut consumer) = DEBUG.consumer() else {
        halt()
    };

    log_info!("{} v{} starting on ESP32-S3", coopsched::NAME, coopsched::VERSION);

    // ========================================
    // 3. 任务表
    // ========================================
    let hk = Housekeeping::new(&LED, tick_timer_count, &DEBUG);

    let tick_counter = || hk.tick_counter();
    let blink_on = || hk.blink_on();
    let blink_off = || hk.blink_off();
    let heartbeat = || hk.heartbeat();
    let load_monitor = || hk.load_monitor();
    let start_print_timer = || {
        with_timer(&DEMO_TIMER, |t| {
            if t.schedule(Duration::from_micros(DEMO_TIMER_DELAY_US)).is_err() {
                log_warn!("demo timer: schedule failed");
            }
        })
    };

    let tasks: [(u32, TaskFn<'_>); 5] = [
        (1, &tick_counter),
        (BLINK_ON_PERIOD, &blink_on),
        (1, &blink_off),
        (PRINT_TIMER_PERIOD, &start_print_timer),
        (HEARTBEAT_PERIOD, &heartbeat),
    ];
    let mut scheduler = match build_scheduler(&tasks, &load_monitor) {
        Ok(scheduler) => scheduler,
        Err(e) => {
            log_error!("task table: {}", e);
            halt()
        }
    };

    hk.banner();

    // ========================================
    // 4. 定时器 (最后启动, 此前一切都已就绪)
    // ========================================
    let timg1 = TimerGroup::new(peripherals.TIMG1);
    let mut demo = OneShotTimer::new(timg1.timer0);
    demo.set_interrupt_handler(demo_timer_isr);
    demo.enable_interrupt(true);
    DEMO_TIMER.lock(|cell| cell.replace(Some(demo)));

    let timg0 = TimerGroup::new(peripherals.TIMG0);
    let mut tick = PeriodicTimer::new(timg0.timer0);
    tick.set_interrupt_handler(tick_isr);
    tick.enable_interrupt(true);
    TICK_START_US.store(
        Instant::now().duration_since_epoch().as_micros(),
        Ordering::Release,
    );
    if tick
        .start(Duration::from_millis(TICK_PERIOD_MS as u64))
        .is_err()
    {
        halt();
    }
    TICK_TIMER.lock(|cell| cell.replace(Some(tick)));

    log_info!("tick timer started ({} ms)", TICK_PERIOD_MS);

    // ========================================
    // 5. 前台循环
    // ========================================
    let mut foreground = Foreground::new(&READY, &FAULT);
    foreground.run(&mut scheduler, &mut consumer, &mut debug_tx())
}
