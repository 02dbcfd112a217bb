use colored::{ColoredString, Colorize};
use log::{Level, LevelFilter, Log, Metadata, Record};

static LOG_ADAPTER: LogAdapter = LogAdapter;

/// Prints log records to stderr as `[LEVEL] [target] message`.
pub struct LogAdapter;

impl Log for LogAdapter {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            eprintln!("{}", format_log_record(record));
        }
    }

    fn flush(&self) {}
}

pub fn format_log_record(record: &Record) -> String {
    format!(
        "[{}] [{}] {}",
        colored_level(record.level()),
        short_target(record.target()).cyan(),
        record.args()
    )
}

fn colored_level(level: Level) -> ColoredString {
    let name = level.to_string();
    match level {
        Level::Error => name.red().bold(),
        Level::Warn => name.yellow(),
        Level::Info => name.white(),
        Level::Debug | Level::Trace => name.dimmed(),
    }
}

/// `imgtile::element_processing::shape_merge` -> `shape_merge`
fn short_target(target: &str) -> &str {
    target.rsplit("::").next().unwrap_or(target)
}

/// Installs the adapter. Safe to call more than once, later calls only change the level.
pub fn init(debug: bool) {
    let _ = log::set_logger(&LOG_ADAPTER);
    log::set_max_level(if debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    });
}
