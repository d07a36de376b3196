use lazy_static::lazy_static;
use slog::{o, Discard, Drain, Logger};
use std::fs::File;

const LOG_PATH: &str = "target/hyggec.log";

/// Builds the file-backed root logger. `None` if the log file cannot be
/// created (e.g. no target directory when running the installed binary).
fn file_logger() -> Option<Logger> {
    let file = File::create(LOG_PATH).ok()?;
    let decorator = slog_term::PlainSyncDecorator::new(file);
    let drain = slog_term::CompactFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    Some(Logger::root(
        drain,
        o!("hyggec" => env!("CARGO_PKG_VERSION")),
    ))
}

lazy_static! {
    static ref ROOT: Logger = match file_logger() {
        Some(logger) => logger,
        None => Logger::root(Discard, o!()),
    };
    pub static ref TYPECHECK_LOG: Logger = ROOT.new(o!("pass" => "typecheck"));
    pub static ref CODEGEN_LOG: Logger = ROOT.new(o!("pass" => "codegen"));
}
