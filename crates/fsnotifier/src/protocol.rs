//! The line-oriented command protocol with the controlling parent
//! process (spec §6). The core treats this as an external collaborator
//! with a narrow contract; this module is that collaborator's concrete
//! textual surface for this daemon.
//!
//! **Input** (one command per line, read from stdin):
//!
//! - `WATCH <path>[\t<ignore1>,<ignore2>,...]` — register a new root.
//! - `UNWATCH <handle>` — tear down a previously registered root.
//! - `EXIT` — graceful shutdown.
//!
//! **Output** (two lines per record, written to stdout):
//!
//! - `CREATE\n<path>\n` — fixed by the spec exactly (§6).
//! - `CHANGE\n<path> <mask>\n` — `<mask>` is the decimal bits of
//!   [`fsnotifier_core::RawEventMask`].
//! - `ROOT\n<handle>\n` — acknowledges a successful `WATCH`.
//! - `MESSAGE\n<text>\n` — errors, overflow, and anything else that
//!   doesn't fit the above (spec §6: "Overflow is surfaced as a
//!   distinguished MESSAGE record").

use std::io::{self, Write};
use std::path::PathBuf;

use fsnotifier_core::{DispatchRecord, Handle};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("unknown command: {0}")]
    UnknownCommand(String),
    #[error("WATCH command is missing a path")]
    MissingPath,
    #[error("invalid watch handle: {0}")]
    InvalidHandle(String),
}

#[derive(Debug, PartialEq, Eq)]
pub enum Command {
    Watch { root: PathBuf, ignore: Vec<String> },
    Unwatch { handle: Handle },
    Exit,
}

/// Parses one line of input. A blank line (or a line that is only a
/// line ending) is not an error; it is simply ignored, matching the
/// pattern of a parent process sending an occasional keep-alive
/// newline.
pub fn parse_command(line: &str) -> Result<Option<Command>, ProtocolError> {
    let line = line.trim_end_matches(['\n', '\r']);
    if line.trim().is_empty() {
        return Ok(None);
    }

    let mut parts = line.splitn(2, ' ');
    let verb = parts.next().unwrap_or("");
    let rest = parts.next().unwrap_or("").trim();

    match verb {
        "WATCH" => {
            if rest.is_empty() {
                return Err(ProtocolError::MissingPath);
            }
            let mut fields = rest.splitn(2, '\t');
            let path = fields.next().unwrap_or("").trim();
            if path.is_empty() {
                return Err(ProtocolError::MissingPath);
            }
            let ignore = fields
                .next()
                .map(|rules| rules.split(',').filter(|s| !s.is_empty()).map(str::to_string).collect())
                .unwrap_or_default();
            Ok(Some(Command::Watch { root: PathBuf::from(path), ignore }))
        }
        "UNWATCH" => {
            let raw = rest.parse::<i32>().map_err(|_| ProtocolError::InvalidHandle(rest.to_string()))?;
            Ok(Some(Command::Unwatch { handle: Handle(raw) }))
        }
        "EXIT" => Ok(Some(Command::Exit)),
        other => Err(ProtocolError::UnknownCommand(other.to_string())),
    }
}

pub fn write_root_ack(w: &mut impl Write, handle: Handle) -> io::Result<()> {
    writeln!(w, "ROOT")?;
    writeln!(w, "{}", handle.0)?;
    w.flush()
}

pub fn write_message(w: &mut impl Write, text: &str) -> io::Result<()> {
    writeln!(w, "MESSAGE")?;
    writeln!(w, "{text}")?;
    w.flush()
}

pub fn write_record(w: &mut impl Write, record: &DispatchRecord) -> io::Result<()> {
    match record {
        DispatchRecord::Create(path) => {
            writeln!(w, "CREATE")?;
            writeln!(w, "{}", path.display())?;
        }
        DispatchRecord::Change { path, mask } => {
            writeln!(w, "CHANGE")?;
            writeln!(w, "{} {}", path.display(), mask.bits())?;
        }
        DispatchRecord::Overflow => {
            writeln!(w, "MESSAGE")?;
            writeln!(w, "event queue overflow; some changes may have been lost")?;
        }
    }
    w.flush()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_watch_without_ignore_rules() {
        let cmd = parse_command("WATCH /tmp/a\n").unwrap().unwrap();
        assert_eq!(cmd, Command::Watch { root: PathBuf::from("/tmp/a"), ignore: vec![] });
    }

    #[test]
    fn parses_watch_with_ignore_rules() {
        let cmd = parse_command("WATCH /tmp/a\t/tmp/a/ignored,.git\n").unwrap().unwrap();
        assert_eq!(
            cmd,
            Command::Watch {
                root: PathBuf::from("/tmp/a"),
                ignore: vec!["/tmp/a/ignored".to_string(), ".git".to_string()],
            }
        );
    }

    #[test]
    fn parses_unwatch() {
        let cmd = parse_command("UNWATCH 7\n").unwrap().unwrap();
        assert_eq!(cmd, Command::Unwatch { handle: Handle(7) });
    }

    #[test]
    fn parses_exit() {
        assert_eq!(parse_command("EXIT\n").unwrap().unwrap(), Command::Exit);
    }

    #[test]
    fn blank_line_is_ignored() {
        assert_eq!(parse_command("\n").unwrap(), None);
        assert_eq!(parse_command("").unwrap(), None);
    }

    #[test]
    fn rejects_unknown_verb() {
        assert!(matches!(parse_command("PING\n"), Err(ProtocolError::UnknownCommand(_))));
    }

    #[test]
    fn rejects_watch_without_path() {
        assert!(matches!(parse_command("WATCH\n"), Err(ProtocolError::MissingPath)));
    }

    #[test]
    fn rejects_non_numeric_handle() {
        assert!(matches!(parse_command("UNWATCH abc\n"), Err(ProtocolError::InvalidHandle(_))));
    }
}
