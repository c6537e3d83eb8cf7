#[macro_use]
extern crate log;

use std::env::consts::{
    ARCH, DLL_EXTENSION, DLL_PREFIX, DLL_SUFFIX, EXE_EXTENSION, EXE_SUFFIX, FAMILY, OS,
};
use std::fs::OpenOptions;
use std::io::{self, Write, BufWriter};
use std::sync::{Arc, Mutex};

use anyhow::Error;
use clap::Parser;
use log::LevelFilter;
use simplelog::{
    ColorChoice, CombinedLogger, Config, ConfigBuilder, TermLogger, TerminalMode, WriteLogger,
};

use crate::program::{Args, Program};

mod flac;
mod program;

/// Log file written next to the working directory.
const LOG_FILE: &str = "flac_downloader.log";

/// Size of the log file buffer.
const LOG_BUFFER_CAPACITY: usize = 64 * 1024;

/// Number of log lines between forced flushes.
const FLUSH_EVERY_LINES: usize = 50;

/// A buffered log file writer that flushes every few lines so a crash loses little.
struct BufferedFileWriter {
    inner: Arc<Mutex<BufWriter<std::fs::File>>>,
    line_count: Arc<Mutex<usize>>,
}

impl BufferedFileWriter {
    fn new() -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(LOG_FILE)?;

        let buffered_writer = BufWriter::with_capacity(LOG_BUFFER_CAPACITY, file);

        Ok(Self {
            inner: Arc::new(Mutex::new(buffered_writer)),
            line_count: Arc::new(Mutex::new(0)),
        })
    }
}

impl Write for BufferedFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut writer = self
            .inner
            .lock()
            .map_err(|_| io::Error::other("Failed to acquire log writer lock"))?;

        let size = writer.write(buf)?;

        let newlines = buf.iter().filter(|&&b| b == b'\n').count();
        if newlines > 0 {
            if let Ok(mut count) = self.line_count.lock() {
                let before = *count;
                *count += newlines;
                if before / FLUSH_EVERY_LINES != *count / FLUSH_EVERY_LINES {
                    writer.flush()?;
                }
            }
        }

        Ok(size)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut writer = self
            .inner
            .lock()
            .map_err(|_| io::Error::other("Failed to acquire log writer lock"))?;
        writer.flush()
    }
}

impl Drop for BufferedFileWriter {
    fn drop(&mut self) {
        if let Ok(mut writer) = self.inner.lock() {
            let _ = writer.flush();
        }
    }
}

fn main() -> Result<(), Error> {
    let args = Args::parse();

    initialize_logger();
    log_system_information();

    let program = Program::new(args);
    let result = program.run();
    if let Err(err) = &result {
        error!("{:#}", err);
    }
    log::logger().flush();
    result
}

/// Initializes the terminal logger and the trace-level file logger.
///
/// Falls back to terminal-only logging when the log file cannot be opened.
fn initialize_logger() {
    let mut config = ConfigBuilder::new();
    config.add_filter_allow_str("flac_downloader");

    let buffered_file_writer = match BufferedFileWriter::new() {
        Ok(writer) => writer,
        Err(e) => {
            eprintln!("Failed to open {}: {}. Logging will only output to terminal.", LOG_FILE, e);
            let _ = TermLogger::init(
                LevelFilter::Info,
                Config::default(),
                TerminalMode::Mixed,
                ColorChoice::Auto,
            );
            return;
        }
    };

    if let Err(e) = CombinedLogger::init(vec![
        TermLogger::new(
            LevelFilter::Info,
            Config::default(),
            TerminalMode::Mixed,
            ColorChoice::Auto,
        ),
        WriteLogger::new(
            LevelFilter::max(),
            config.build(),
            buffered_file_writer,
        ),
    ]) {
        eprintln!("Failed to initialize combined logger: {}. Falling back to terminal-only logging.", e);
        let _ = TermLogger::init(
            LevelFilter::Info,
            Config::default(),
            TerminalMode::Mixed,
            ColorChoice::Auto,
        );
    }
}

/// Logs important information about the system being used.
fn log_system_information() {
    trace!("Printing system information out into log for debug purposes...");
    trace!("ARCH:           \"{}\"", ARCH);
    trace!("DLL_EXTENSION:  \"{}\"", DLL_EXTENSION);
    trace!("DLL_PREFIX:     \"{}\"", DLL_PREFIX);
    trace!("DLL_SUFFIX:     \"{}\"", DLL_SUFFIX);
    trace!("EXE_EXTENSION:  \"{}\"", EXE_EXTENSION);
    trace!("EXE_SUFFIX:     \"{}\"", EXE_SUFFIX);
    trace!("FAMILY:         \"{}\"", FAMILY);
    trace!("OS:             \"{}\"", OS);
}
