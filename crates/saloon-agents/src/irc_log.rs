//! IRC-style conversation log.
//!
//! ```text
//! [14:02:11] *** Negotiating title (3 roles, max 10 rounds)
//! [14:02:15] <Zero> Echoes of Tomorrow
//! [14:02:19] <Gustave> Echoes of Tomorrow
//! [14:02:19] *** Consensus reached (identical, confidence 1.00)
//! ```
//!
//! Lines go to the terminal (optionally coloured) and, when a log file is
//! open, to `logs/<YYYY-MM-DD_HH-MM-SS>.log` without colour codes.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Local;
use saloon_coordination::negotiation::{
    AgentError, ConsensusResult, Proposal, Role, Session, SessionFailure, SessionObserver,
    SessionStatus,
};

const RESET: &str = "\x1b[0m";
const GRAY: &str = "\x1b[90m";
const BOLD: &str = "\x1b[1m";
const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const RED: &str = "\x1b[31m";

fn agent_color(agent_id: &str) -> &'static str {
    match agent_id.to_ascii_lowercase().as_str() {
        "zero" => "\x1b[36m",
        "gustave" => "\x1b[35m",
        "camille" => "\x1b[34m",
        _ => "\x1b[37m",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tone {
    System,
    Success,
    Warning,
    Error,
}

impl Tone {
    fn color(self) -> &'static str {
        match self {
            Self::System => BOLD,
            Self::Success => GREEN,
            Self::Warning => YELLOW,
            Self::Error => RED,
        }
    }
}

/// [`SessionObserver`] that renders the negotiation as a chat transcript.
pub struct IrcLog {
    out: Mutex<Box<dyn Write + Send>>,
    file: Mutex<Option<BufWriter<File>>>,
    file_path: Option<PathBuf>,
    use_colors: bool,
}

impl IrcLog {
    /// Log to stdout.
    pub fn stdout(use_colors: bool) -> Self {
        Self::with_writer(Box::new(io::stdout()), use_colors)
    }

    pub fn with_writer(out: Box<dyn Write + Send>, use_colors: bool) -> Self {
        Self {
            out: Mutex::new(out),
            file: Mutex::new(None),
            file_path: None,
            use_colors,
        }
    }

    /// Also append to a timestamped file under `dir`, created if missing.
    pub fn with_log_dir(mut self, dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
        let path = dir.join(format!("{}.log", Local::now().format("%Y-%m-%d_%H-%M-%S")));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open log file {}", path.display()))?;
        self.file = Mutex::new(Some(BufWriter::new(file)));
        self.file_path = Some(path);
        Ok(self)
    }

    pub fn file_path(&self) -> Option<&Path> {
        self.file_path.as_deref()
    }

    pub fn system(&self, message: &str) {
        self.notice(Tone::System, message);
    }

    pub fn success(&self, message: &str) {
        self.notice(Tone::Success, message);
    }

    pub fn warning(&self, message: &str) {
        self.notice(Tone::Warning, message);
    }

    pub fn error(&self, message: &str) {
        self.notice(Tone::Error, message);
    }

    /// Flush and close the log file. Later lines go to the terminal only.
    pub fn close(&self) {
        if let Ok(mut file) = self.file.lock() {
            if let Some(mut writer) = file.take() {
                let _ = writer.flush();
            }
        }
        if let Ok(mut out) = self.out.lock() {
            let _ = out.flush();
        }
    }

    fn notice(&self, tone: Tone, message: &str) {
        let stamp = timestamp();
        let plain = format!("[{}] *** {}", stamp, message);
        let colored = format!(
            "{GRAY}[{}]{RESET} {}*** {}{RESET}",
            stamp,
            tone.color(),
            message
        );
        self.emit(&plain, &colored);
    }

    fn speak(&self, agent_id: &str, text: &str) {
        let stamp = timestamp();
        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            let plain = format!("[{}] <{}> {}", stamp, agent_id, line);
            let colored = format!(
                "{GRAY}[{}]{RESET} {}<{}>{RESET} {}",
                stamp,
                agent_color(agent_id),
                agent_id,
                line
            );
            self.emit(&plain, &colored);
        }
    }

    fn emit(&self, plain: &str, colored: &str) {
        if let Ok(mut out) = self.out.lock() {
            let line = if self.use_colors { colored } else { plain };
            let _ = writeln!(out, "{}", line);
        }
        if let Ok(mut file) = self.file.lock() {
            if let Some(writer) = file.as_mut() {
                let _ = writeln!(writer, "{}", plain);
            }
        }
    }
}

impl Drop for IrcLog {
    fn drop(&mut self) {
        self.close();
    }
}

fn timestamp() -> String {
    Local::now().format("%H:%M:%S").to_string()
}

impl SessionObserver for IrcLog {
    fn on_start(&self, session: &Session) {
        self.system(&format!(
            "Negotiating {} for \"{}\" ({} roles, max {} rounds)",
            session.kind,
            session.topic,
            session.roles.len(),
            session.max_rounds
        ));
    }

    fn on_proposal(&self, _session_id: &str, proposal: &Proposal) {
        self.speak(&proposal.agent_id, &proposal.content);
    }

    fn on_consensus(&self, _session_id: &str, result: &ConsensusResult) {
        if result.reached {
            self.success(&format!(
                "Consensus reached ({}, confidence {:.2})",
                result.method, result.confidence
            ));
        }
    }

    fn on_retry(&self, _session_id: &str, role: Role, attempt: u32, error: &AgentError, delay: Duration) {
        self.warning(&format!(
            "{} call failed (attempt {}): {}. Retrying in {} ms",
            role,
            attempt,
            error,
            delay.as_millis()
        ));
    }

    fn on_failure(&self, _session_id: &str, failure: &SessionFailure) {
        self.error(&format!("Negotiation failed: {}", failure));
    }

    fn on_finish(&self, session: &Session) {
        let message = format!(
            "{} {} after {} proposal(s)",
            session.kind,
            session.status(),
            session.history().len()
        );
        match session.status() {
            SessionStatus::Converged => self.success(&message),
            SessionStatus::Forced | SessionStatus::Cancelled => self.warning(&message),
            _ => self.error(&message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuf {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    #[test]
    fn test_agent_lines_plain() {
        let buf = SharedBuf::default();
        let log = IrcLog::with_writer(Box::new(buf.clone()), false);
        log.on_proposal("s", &Proposal::new("Zero", Role::Creative, "Line one\n\nLine two", 0));
        let text = buf.text();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("<Zero> Line one"));
        assert!(lines[1].ends_with("<Zero> Line two"));
        assert!(!text.contains('\x1b'));
    }

    #[test]
    fn test_colored_output() {
        let buf = SharedBuf::default();
        let log = IrcLog::with_writer(Box::new(buf.clone()), true);
        log.system("hello");
        assert!(buf.text().contains("\x1b[1m*** hello"));
    }

    #[test]
    fn test_log_file_is_plain() {
        let dir = tempfile::tempdir().unwrap();
        let log = IrcLog::with_writer(Box::new(SharedBuf::default()), true)
            .with_log_dir(dir.path())
            .unwrap();
        log.success("saved");
        let path = log.file_path().unwrap().to_path_buf();
        log.close();
        let contents = fs::read_to_string(path).unwrap();
        assert!(contents.contains("*** saved"));
        assert!(!contents.contains('\x1b'));
    }
}
