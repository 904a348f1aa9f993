//! External tool invocation.
//!
//! Each run gets two reader threads, one per output stream. Readers forward
//! raw chunks over a channel and the calling thread assembles them into
//! lines, so the consumer always runs on the calling thread. Both readers are
//! drained before the exit status is awaited. A tool that fills one pipe
//! while we block on the other can therefore never stall.
//!
//! A partial line that sees no newline within the line timeout is forwarded
//! as is; whatever follows starts a new line.

use std::io::{ErrorKind, Read};
use std::process::{Command, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::{BuildError, Result};

const STDERR_TAIL: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

/// Exit status plus the last stderr lines, for error reports.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolRun {
    pub code: i32,
    pub stderr_tail: Vec<String>,
}

impl ToolRun {
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ProcessRunner {
    /// How long a partial line may wait for its newline before it is
    /// forwarded anyway.
    pub line_timeout: Duration,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self {
            line_timeout: Duration::from_millis(100),
        }
    }
}

impl ProcessRunner {
    pub fn new(line_timeout: Duration) -> Self {
        Self { line_timeout }
    }

    /// Run `argv`, feeding every output line to `consumer`.
    ///
    /// Empty arguments are dropped; an empty command succeeds without
    /// spawning anything.
    pub fn run<F>(&self, argv: &[String], mut consumer: F) -> Result<ToolRun>
    where
        F: FnMut(Stream, &str),
    {
        let argv: Vec<&str> = argv
            .iter()
            .map(|a| a.as_str())
            .filter(|a| !a.trim().is_empty())
            .collect();
        let Some((program, args)) = argv.split_first() else {
            return Ok(ToolRun::default());
        };

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| BuildError::ToolLaunch {
                program: program.to_string(),
                source,
            })?;

        let (tx, rx) = mpsc::channel::<(Stream, Vec<u8>)>();
        let mut readers = Vec::with_capacity(2);
        if let Some(out) = child.stdout.take() {
            readers.push(spawn_reader(Stream::Stdout, out, tx.clone()));
        }
        if let Some(err) = child.stderr.take() {
            readers.push(spawn_reader(Stream::Stderr, err, tx.clone()));
        }
        drop(tx);

        let mut tail: Vec<String> = Vec::new();
        let mut deliver = |stream: Stream, lines: Vec<String>| {
            for line in lines {
                if stream == Stream::Stderr {
                    if tail.len() == STDERR_TAIL {
                        tail.remove(0);
                    }
                    tail.push(line.clone());
                }
                consumer(stream, &line);
            }
        };

        let mut out_buf = LineBuffer::default();
        let mut err_buf = LineBuffer::default();
        loop {
            let deadline = [out_buf.deadline(self.line_timeout), err_buf.deadline(self.line_timeout)]
                .into_iter()
                .flatten()
                .min();
            let received = match deadline {
                Some(deadline) => rx.recv_timeout(deadline.saturating_duration_since(Instant::now())),
                None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
            };
            match received {
                Ok((Stream::Stdout, chunk)) => deliver(Stream::Stdout, out_buf.push(&chunk)),
                Ok((Stream::Stderr, chunk)) => deliver(Stream::Stderr, err_buf.push(&chunk)),
                Err(RecvTimeoutError::Timeout) => {
                    let now = Instant::now();
                    if out_buf.deadline(self.line_timeout).is_some_and(|d| d <= now) {
                        deliver(Stream::Stdout, out_buf.flush_partial());
                    }
                    if err_buf.deadline(self.line_timeout).is_some_and(|d| d <= now) {
                        deliver(Stream::Stderr, err_buf.flush_partial());
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        deliver(Stream::Stdout, out_buf.finish());
        deliver(Stream::Stderr, err_buf.finish());

        for reader in readers {
            // a panicked reader already lost its output; the exit code still counts
            let _ = reader.join();
        }

        let status = child.wait().map_err(|source| BuildError::ToolLaunch {
            program: program.to_string(),
            source,
        })?;

        Ok(ToolRun {
            code: status.code().unwrap_or(-1),
            stderr_tail: tail,
        })
    }
}

fn spawn_reader<R>(stream: Stream, mut reader: R, tx: Sender<(Stream, Vec<u8>)>) -> thread::JoinHandle<()>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let mut buf = [0u8; 4096];
        loop {
            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(_) => break,
            };
            if tx.send((stream, buf[..n].to_vec())).is_err() {
                break;
            }
        }
    })
}

/// Bytes of one stream waiting for their newline.
#[derive(Debug, Default)]
struct LineBuffer {
    pending: Vec<u8>,
    since: Option<Instant>,
}

impl LineBuffer {
    /// Append a chunk and return every line it completed.
    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in chunk {
            self.pending.push(byte);
            if byte == b'\n' {
                lines.push(decode(&self.pending));
                self.pending.clear();
                self.since = None;
            }
        }
        if !self.pending.is_empty() && self.since.is_none() {
            self.since = Some(Instant::now());
        }
        lines
    }

    fn deadline(&self, timeout: Duration) -> Option<Instant> {
        self.since.map(|since| since + timeout)
    }

    /// Forward the partial line, holding back a split UTF-8 sequence.
    fn flush_partial(&mut self) -> Vec<String> {
        let complete = complete_prefix(&self.pending);
        if complete == 0 {
            self.since = Some(Instant::now());
            return Vec::new();
        }
        let line = decode(&self.pending[..complete]);
        self.pending = self.pending.split_off(complete);
        self.since = (!self.pending.is_empty()).then(Instant::now);
        vec![line]
    }

    fn finish(&mut self) -> Vec<String> {
        if self.pending.is_empty() {
            return Vec::new();
        }
        let line = decode(&self.pending);
        self.pending.clear();
        self.since = None;
        vec![line]
    }
}

fn decode(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .trim_end_matches(['\n', '\r'])
        .to_string()
}

/// Length of `bytes` without a multi-byte character cut off at the end.
fn complete_prefix(bytes: &[u8]) -> usize {
    let len = bytes.len();
    for i in (len.saturating_sub(4)..len).rev() {
        let b = bytes[i];
        if b & 0xC0 == 0x80 {
            continue;
        }
        let width = match b {
            0xF0..=0xFF => 4,
            0xE0..=0xEF => 3,
            0xC0..=0xDF => 2,
            _ => 1,
        };
        return if len - i < width { i } else { len };
    }
    len
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".to_string(), "-c".to_string(), script.to_string()]
    }

    #[test]
    fn test_lines_from_both_streams() {
        let mut out = Vec::new();
        let mut err = Vec::new();
        let run = ProcessRunner::default()
            .run(&sh("echo one; echo two >&2; echo three"), |s, l| match s {
                Stream::Stdout => out.push(l.to_string()),
                Stream::Stderr => err.push(l.to_string()),
            })
            .unwrap();
        assert!(run.success());
        assert_eq!(out, vec!["one", "three"]);
        assert_eq!(err, vec!["two"]);
        assert_eq!(run.stderr_tail, vec!["two"]);
    }

    #[test]
    fn test_exit_code_is_returned() {
        let run = ProcessRunner::default().run(&sh("exit 3"), |_, _| {}).unwrap();
        assert_eq!(run.code, 3);
        assert!(!run.success());
    }

    #[test]
    fn test_spawn_failure_is_launch_error() {
        let argv = vec!["/no/such/tool-xyz".to_string()];
        let err = ProcessRunner::default().run(&argv, |_, _| {}).unwrap_err();
        assert!(matches!(err, BuildError::ToolLaunch { .. }));
    }

    #[test]
    fn test_empty_arguments_are_dropped() {
        let argv = vec![
            "".to_string(),
            "sh".to_string(),
            " ".to_string(),
            "-c".to_string(),
            "echo ok".to_string(),
        ];
        let mut lines = Vec::new();
        ProcessRunner::default()
            .run(&argv, |_, l| lines.push(l.to_string()))
            .unwrap();
        assert_eq!(lines, vec!["ok"]);

        let run = ProcessRunner::default().run(&[], |_, _| {}).unwrap();
        assert!(run.success());
    }

    #[test]
    fn test_large_output_on_both_pipes_does_not_stall() {
        let script = "i=0; while [ $i -lt 20000 ]; do echo out$i; echo err$i >&2; i=$((i+1)); done";
        let mut count = 0;
        let run = ProcessRunner::default().run(&sh(script), |_, _| count += 1).unwrap();
        assert!(run.success());
        assert_eq!(count, 40000);
        assert_eq!(run.stderr_tail.len(), STDERR_TAIL);
        assert_eq!(run.stderr_tail.last().map(String::as_str), Some("err19999"));
    }

    #[test]
    fn test_trailing_partial_line_is_delivered() {
        let mut lines = Vec::new();
        ProcessRunner::default()
            .run(&sh("printf 'no newline'"), |_, l| lines.push(l.to_string()))
            .unwrap();
        assert_eq!(lines, vec!["no newline"]);
    }

    #[test]
    fn test_quiet_partial_line_is_forwarded_after_timeout() {
        let start = Instant::now();
        let mut lines = Vec::new();
        ProcessRunner::new(Duration::from_millis(100))
            .run(&sh("printf 'Uploading...'; sleep 1; printf ' done\\n'"), |_, l| {
                lines.push((start.elapsed(), l.to_string()))
            })
            .unwrap();
        let texts: Vec<&str> = lines.iter().map(|(_, l)| l.as_str()).collect();
        assert_eq!(texts, vec!["Uploading...", " done"]);
        assert!(lines[0].0 < Duration::from_millis(900), "{lines:?}");
    }

    #[test]
    fn test_split_utf8_sequence_is_held_back() {
        let mut buf = LineBuffer::default();
        let bytes = "café\n".as_bytes();
        // cut inside the two-byte 'é'
        assert!(buf.push(&bytes[..4]).is_empty());
        assert_eq!(buf.flush_partial(), vec!["caf"]);
        assert!(buf.flush_partial().is_empty());
        assert_eq!(buf.push(&bytes[4..]), vec!["é"]);
        assert!(buf.finish().is_empty());
    }

    #[test]
    fn test_complete_prefix() {
        assert_eq!(complete_prefix(b"abc"), 3);
        assert_eq!(complete_prefix("é".as_bytes()), 2);
        assert_eq!(complete_prefix(&"€".as_bytes()[..2]), 0);
        assert_eq!(complete_prefix(&"a€".as_bytes()[..3]), 1);
        assert_eq!(complete_prefix(b""), 0);
    }
}
