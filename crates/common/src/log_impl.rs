//! log 门面的实现
//!
//! 输出途径由使用方注册（内核里是串口，宿主机测试里可以是标准输出），
//! 这里只负责格式化：按日志级别着色，行首标注 target 和行号。

use core::fmt::{self, Write};

use log::{Level, LevelFilter, Metadata, Record};
use spin::Once;

static SINK: Once<fn(&str)> = Once::new();

struct SinkWriter(fn(&str));

impl Write for SinkWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        (self.0)(s);
        Ok(())
    }
}

struct KernelLogger;

static LOGGER: KernelLogger = KernelLogger;

impl log::Log for KernelLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        let Some(sink) = SINK.get() else {
            return;
        };
        let target = match record.target().is_empty() {
            true => record.module_path().unwrap_or_default(),
            false => record.target(),
        };
        let color_code = match record.level() {
            Level::Error => 31u8, // Red
            Level::Warn => 93,    // BrightYellow
            Level::Info => 34,    // Blue
            Level::Debug => 32,   // Green
            Level::Trace => 90,   // BrightBlack
        };
        let _ = writeln!(
            SinkWriter(*sink),
            "\u{1B}[{}m\
                [{}:{}] {}\
                \u{1B}[0m",
            color_code,
            target,
            record.line().unwrap_or_default(),
            record.args()
        );
    }

    fn flush(&self) {}
}

/// 注册输出途径并初始化 log 门面，重复调用只有第一次生效
pub fn init(level: LevelFilter, sink: fn(&str)) {
    SINK.call_once(|| sink);
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(level);
}
