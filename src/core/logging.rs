use log::LevelFilter;

/// Wire up the fern dispatcher: `[timestamp] LEVEL: message (file:line)` on
/// stderr. Info by default, Debug behind the --debug flag.
pub fn init_logging(debug: bool) -> Result<(), log::SetLoggerError> {
    let level = if debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{}] {}: {} ({}:{})",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                message,
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
            ))
        })
        .level(level)
        .chain(std::io::stderr())
        .apply()
}
