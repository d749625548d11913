//! Daemon entry point: CLI parsing, logging setup, and the single-thread
//! event loop that multiplexes the command input stream against the
//! kernel event channel (spec §5).

mod cli;
mod logging;
mod protocol;

use std::io::{self, BufRead};
use std::os::unix::io::AsRawFd;

use anyhow::Context;
use clap::Parser;
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};

use fsnotifier_core::{DispatchRecord, Engine};

#[cfg(target_os = "linux")]
type Backend = fsnotifier_core::source::InotifySource;
#[cfg(not(target_os = "linux"))]
type Backend = fsnotifier_core::source::KqueueSource;

const STDIN: Token = Token(0);
const KERNEL: Token = Token(1);

fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();
    logging::init(&cli.log_level);

    let mut engine = Engine::<Backend>::new().context("failed to initialize kernel event channel")?;

    let stdin_fd = io::stdin().as_raw_fd();
    let kernel_fd = engine.as_raw_fd();

    let mut poll = Poll::new().context("failed to create event loop")?;
    poll.registry()
        .register(&mut SourceFd(&stdin_fd), STDIN, Interest::READABLE)
        .context("failed to register command stream with event loop")?;
    poll.registry()
        .register(&mut SourceFd(&kernel_fd), KERNEL, Interest::READABLE)
        .context("failed to register kernel event channel with event loop")?;

    let mut mio_events = Events::with_capacity(16);
    let mut input = io::BufReader::new(io::stdin());
    let stdout = io::stdout();
    let mut warned_limit = false;

    'outer: loop {
        if let Err(err) = poll.poll(&mut mio_events, None) {
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err).context("event loop poll failed");
        }

        for event in mio_events.iter() {
            match event.token() {
                STDIN => {
                    let mut line = String::new();
                    let n = input.read_line(&mut line).context("failed to read command")?;
                    if n == 0 {
                        tracing::info!("command stream reached end-of-file; shutting down");
                        engine.close();
                        break 'outer;
                    }
                    if handle_command(&mut engine, &line, &stdout) {
                        break 'outer;
                    }
                }
                KERNEL => match engine.poll() {
                    Ok(records) => {
                        let mut out = stdout.lock();
                        for record in &records {
                            if let Err(err) = protocol::write_record(&mut out, record) {
                                tracing::error!(?err, "failed to write record to output stream");
                            }
                            if matches!(record, DispatchRecord::Overflow) {
                                tracing::warn!("kernel event queue overflow surfaced to controlling process");
                            }
                        }
                    }
                    Err(err) => {
                        tracing::error!(?err, "fatal kernel event channel error; exiting without graceful teardown");
                        break 'outer;
                    }
                },
                _ => unreachable!("no other tokens are registered with the event loop"),
            }

            // Logged once, the first time the platform's watch-descriptor
            // quota is exhausted, regardless of which branch tripped it
            // (spec §10: "not repeated for subsequent registration
            // failures in the same run").
            if !warned_limit && engine.limit_reached() {
                warned_limit = true;
                tracing::warn!("watch-descriptor quota exhausted; watch list may be incomplete");
            }
        }
    }

    Ok(())
}

/// Parses and executes one command line, writing any resulting
/// acknowledgement or error record to the output stream. Returns `true`
/// if the daemon should shut down. Parse and engine-level failures are
/// both reported as `MESSAGE` records rather than killing the daemon: a
/// malformed or rejected command from the controlling process is not a
/// fatal condition (spec §7 reserves `ERR_ABORT` for structural
/// failures, not bad input).
fn handle_command(engine: &mut Engine<Backend>, line: &str, stdout: &io::Stdout) -> bool {
    match protocol::parse_command(line) {
        Ok(Some(protocol::Command::Watch { root, ignore })) => {
            match engine.watch(&root, ignore) {
                Ok(handle) => {
                    let mut out = stdout.lock();
                    if let Err(err) = protocol::write_root_ack(&mut out, handle) {
                        tracing::error!(?err, "failed to write ROOT acknowledgement");
                    }
                }
                Err(err) => {
                    tracing::warn!(?err, path = %root.display(), "failed to watch root");
                    let mut out = stdout.lock();
                    let _ = protocol::write_message(&mut out, &err.to_string());
                }
            }
            false
        }
        Ok(Some(protocol::Command::Unwatch { handle })) => {
            if let Err(err) = engine.unwatch(handle) {
                tracing::warn!(?err, "failed to unwatch");
                let mut out = stdout.lock();
                let _ = protocol::write_message(&mut out, &err.to_string());
            }
            false
        }
        Ok(Some(protocol::Command::Exit)) => {
            tracing::info!("received EXIT command; shutting down");
            engine.close();
            true
        }
        Ok(None) => false,
        Err(err) => {
            tracing::warn!(?err, line = %line.trim_end(), "failed to parse command");
            let mut out = stdout.lock();
            let _ = protocol::write_message(&mut out, &err.to_string());
            false
        }
    }
}
