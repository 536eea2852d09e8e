//! Remote sessions.
//!
//! One session per host runs on its own thread. It opens a [`Transport`]
//! running the sampling script, splits the stream into cycles at each
//! `__END__` line, decodes every cycle and installs the result in the
//! host's slot. A failed or closed stream is reopened after a fixed
//! backoff until the session is stopped.

use std::io::{BufRead, BufReader, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::error::TransportError;
use crate::parser::{
    decode_cycle, DecodeOptions, CYCLE_END, DATE_PREFIX, ERROR_PREFIX, NETSTAT_END, NETSTAT_START,
    WARN_PREFIX,
};
use crate::store::{Host, SessionStatus};

/// Delay between two session starts, so a large fleet does not open all
/// its connections in the same instant.
pub const STAGGER: Duration = Duration::from_millis(200);

/// Granularity of interruptible sleeps.
const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// Something that can run a command on a host and stream its stdout.
pub trait Transport: Send + Sync {
    fn open(&self, host: &str, command: &str) -> Result<Box<dyn Read + Send>, TransportError>;
}

/// Everything a session needs besides its host and transport.
#[derive(Clone, Debug)]
pub struct SessionSettings {
    /// Seconds the remote script sleeps between two cycles
    pub measure_interval_secs: u64,
    /// GC log to scan for the last stop-the-world pause
    pub gc_log_file: Option<String>,
    /// Application log to grep for ERROR/WARN lines
    pub log_file: Option<String>,
    /// Grep the application log every this many cycles
    pub log_grep_freq: u32,
    /// Wait before reopening a failed transport
    pub backoff: Duration,
    pub decode: DecodeOptions,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            measure_interval_secs: 1,
            gc_log_file: None,
            log_file: None,
            log_grep_freq: 10,
            backoff: Duration::from_secs(1),
            decode: DecodeOptions::default(),
        }
    }
}

/// Single-quote a value for a POSIX shell.
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Build the sampling loop executed on the remote host.
///
/// Each iteration prints the raw counters, the remote clock in epoch
/// milliseconds and, when configured, the log counts and the last GC pause,
/// then terminates the cycle with `__END__`.
pub fn remote_command(settings: &SessionSettings) -> String {
    let log_cmd = match &settings.log_file {
        Some(file) => {
            let file = shell_quote(file);
            let freq = settings.log_grep_freq.max(1);
            format!(
                "idx=$((idx+1)); if [ $((idx%{freq})) = 0 ]; then \
                 echo \"{ERROR_PREFIX}$(grep ERROR {file} | wc -l)\" && \
                 echo \"{WARN_PREFIX}$(grep WARN {file} | wc -l)\"; fi; "
            )
        }
        None => String::new(),
    };
    let gc_cmd = match &settings.gc_log_file {
        Some(file) => format!(
            "tail -n 200 {} | tac | grep -m 1 \"threads were stopped\"; ",
            shell_quote(file)
        ),
        None => String::new(),
    };
    format!(
        "idx=-1; while true; do {log_cmd}cat /proc/diskstats && cat /proc/stat; \
         echo \"{NETSTAT_START}\" && netstat -i && \
         netstat -s | grep -E \"(active connections opening|failed connection attempts)\"; \
         echo \"{NETSTAT_END}\"; \
         echo \"{DATE_PREFIX}$(($(date +%s%N)/1000000))\"; \
         {gc_cmd}echo \"{CYCLE_END}\"; sleep {}; done",
        settings.measure_interval_secs.max(1)
    )
}

/// Splits a byte stream into cycles of lines.
pub struct CycleReader<R> {
    reader: BufReader<R>,
    buf: Vec<u8>,
}

impl<R: Read> CycleReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            reader: BufReader::new(inner),
            buf: Vec::new(),
        }
    }

    /// Read up to and including the next `__END__` line.
    ///
    /// Returns `Ok(None)` at end of input, or as soon as `stop` is set
    /// between two lines. A trailing incomplete cycle is discarded.
    pub fn next_cycle(&mut self, stop: &AtomicBool) -> Result<Option<Vec<String>>, TransportError> {
        let mut lines = Vec::new();
        loop {
            if stop.load(Ordering::Relaxed) {
                return Ok(None);
            }
            self.buf.clear();
            if self.reader.read_until(b'\n', &mut self.buf)? == 0 {
                return Ok(None);
            }
            let line = String::from_utf8_lossy(&self.buf);
            let line = line.trim_end_matches(['\n', '\r']).to_owned();
            let end = line.contains(CYCLE_END);
            lines.push(line);
            if end {
                return Ok(Some(lines));
            }
        }
    }
}

/// Sleep for `duration`, waking early if `stop` is set.
fn sleep_unless_stopped(duration: Duration, stop: &AtomicBool) {
    let deadline = Instant::now() + duration;
    while !stop.load(Ordering::Relaxed) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        thread::sleep(SLEEP_SLICE.min(deadline - now));
    }
}

/// Stream cycles into `host` until the transport ends or `stop` is set.
/// `received` counts the cycles applied on this connection.
fn stream(
    host: &Host,
    transport: &dyn Transport,
    command: &str,
    settings: &SessionSettings,
    stop: &AtomicBool,
    received: &mut u64,
) -> Result<(), TransportError> {
    let mut reader = CycleReader::new(transport.open(host.name(), command)?);
    host.set_status(SessionStatus::Streaming);
    info!(host = host.name(), "session streaming");

    while let Some(lines) = reader.next_cycle(stop)? {
        let snapshot = decode_cycle(&lines, &settings.decode);
        if !snapshot.is_authoritative() {
            debug!(host = host.name(), lines = lines.len(), "cycle without remote date");
        }
        host.apply_snapshot(snapshot);
        *received += 1;
    }

    if stop.load(Ordering::Relaxed) {
        Ok(())
    } else {
        Err(TransportError::Closed)
    }
}

/// Supervise one host until `stop` is set.
pub fn run_session(
    host: Arc<Host>,
    transport: Arc<dyn Transport>,
    settings: SessionSettings,
    stop: Arc<AtomicBool>,
) {
    let command = remote_command(&settings);
    let mut attempts: u32 = 0;

    while !stop.load(Ordering::Relaxed) {
        // While retrying the row keeps showing the last failure.
        if attempts == 0 {
            host.set_status(SessionStatus::Connecting);
        }
        let mut received = 0;
        match stream(&host, transport.as_ref(), &command, &settings, &stop, &mut received) {
            Ok(()) => break,
            Err(err) => {
                attempts = if received > 0 { 1 } else { attempts.saturating_add(1) };
                warn!(host = host.name(), attempts, error = %err, "session failed, reconnecting");
                host.set_status(SessionStatus::Retrying {
                    attempts,
                    last_error: err.to_string(),
                });
                sleep_unless_stopped(settings.backoff, &stop);
            }
        }
    }
    debug!(host = host.name(), "session stopped");
}

/// A running session thread.
pub struct SessionHandle {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

impl SessionHandle {
    /// Ask the session to finish. It notices between two lines or while
    /// waiting to reconnect.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    pub fn join(self) -> thread::Result<()> {
        self.thread.join()
    }
}

/// Stop every session and join those that finish within `grace`.
///
/// A session blocked in a read only notices the stop flag when its next
/// line arrives, so it is left running. Returns how many were left.
pub fn shutdown(handles: Vec<SessionHandle>, grace: Duration) -> usize {
    for handle in &handles {
        handle.stop();
    }
    let deadline = Instant::now() + grace;
    let mut left = 0;
    for handle in handles {
        while !handle.is_finished() && Instant::now() < deadline {
            thread::sleep(SLEEP_SLICE);
        }
        if !handle.is_finished() {
            left += 1;
            continue;
        }
        if handle.join().is_err() {
            warn!("session thread panicked");
        }
    }
    left
}

/// Start the session of one host on a named thread.
pub fn spawn_session(
    host: Arc<Host>,
    transport: Arc<dyn Transport>,
    settings: SessionSettings,
) -> std::io::Result<SessionHandle> {
    let stop = Arc::new(AtomicBool::new(false));
    let thread = thread::Builder::new()
        .name(format!("session-{}", host.name()))
        .spawn({
            let stop = Arc::clone(&stop);
            move || run_session(host, transport, settings, stop)
        })?;
    Ok(SessionHandle { stop, thread })
}

/// Start one session per host, [`STAGGER`] apart.
pub fn spawn_all(
    hosts: &[Arc<Host>],
    transport: Arc<dyn Transport>,
    settings: &SessionSettings,
) -> std::io::Result<Vec<SessionHandle>> {
    let mut handles = Vec::with_capacity(hosts.len());
    for (index, host) in hosts.iter().enumerate() {
        if index > 0 {
            thread::sleep(STAGGER);
        }
        handles.push(spawn_session(
            Arc::clone(host),
            Arc::clone(&transport),
            settings.clone(),
        )?);
    }
    Ok(handles)
}
