#![cfg_attr(not(test), no_std)]

#[macro_use]
mod macros;
mod level;
mod record;

pub use level::{Level, LevelFilter, CLOG};
pub use record::Record;

use core::{
    fmt::{self, Write},
    sync::atomic::{AtomicUsize, Ordering},
};

use anstyle::{AnsiColor, Reset};
use spin::Once;

/// 日志的实际去处，由内核（或测试）在启动时注册一次
pub trait Tracer: Sync {
    fn log(&self, record: &Record<'_>);
}

static KERNEL_TRACER: Once<&'static dyn Tracer> = Once::new();

static MAX_LEVEL: AtomicUsize = AtomicUsize::new(CLOG as usize);

/// 注册日志输出。只有第一次调用生效
pub fn init(tracer: &'static dyn Tracer) {
    KERNEL_TRACER.call_once(|| tracer);
}

/// 运行时调整日志等级，默认为编译期的 [`CLOG`]
pub fn set_max_level(level: LevelFilter) {
    MAX_LEVEL.store(level as usize, Ordering::Relaxed);
}

#[inline]
pub fn max_level() -> LevelFilter {
    LevelFilter::from_usize(MAX_LEVEL.load(Ordering::Relaxed))
}

#[inline]
#[doc(hidden)]
pub fn log_impl(level: Level, target: &'static str, args: fmt::Arguments<'_>) {
    // 尚未注册时日志直接丢弃
    if let Some(tracer) = KERNEL_TRACER.get() {
        tracer.log(&Record::new(level, target, args));
    }
}

/// 按 `[LEVEL] target: message` 的格式写出一条日志，等级部分带颜色
pub fn write_record(writer: &mut impl Write, record: &Record<'_>) -> fmt::Result {
    let color = match record.level() {
        Level::Error => AnsiColor::Red,
        Level::Warn => AnsiColor::BrightYellow,
        Level::Info => AnsiColor::Blue,
        Level::Debug => AnsiColor::Green,
        Level::Trace => AnsiColor::BrightBlack,
    };
    write!(
        writer,
        "{}[{:>5}]{} {}: ",
        color.render_fg(),
        record.level(),
        Reset.render(),
        record.target()
    )?;
    writeln!(writer, "{}", record.args())
}
