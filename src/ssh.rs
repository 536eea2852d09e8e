//! SSH transport backed by the system `ssh` client.

use std::io::{self, Read};
use std::process::{Child, ChildStdout, Command, Stdio};

use crate::error::TransportError;
use crate::session::Transport;

const PROGRAM: &str = "ssh";

/// Runs the sampling command through `ssh user@host`.
#[derive(Clone, Debug)]
pub struct SshTransport {
    pub user: String,
    pub key: Option<String>,
    pub port: u16,
}

impl SshTransport {
    /// Arguments passed to `ssh`, without the program name.
    pub fn args(&self, host: &str, command: &str) -> Vec<String> {
        let mut args: Vec<String> = [
            "-o",
            "BatchMode=yes",
            "-o",
            "StrictHostKeyChecking=no",
            "-o",
            "ServerAliveInterval=5",
            "-p",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        args.push(self.port.to_string());
        if let Some(key) = &self.key {
            args.push("-i".into());
            args.push(key.clone());
        }
        args.push(format!("{}@{}", self.user, host));
        args.push(command.into());
        args
    }
}

/// Stdout of a running `ssh` process. Dropping it terminates the process.
struct ChildStream {
    child: Child,
    stdout: ChildStdout,
}

impl Read for ChildStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stdout.read(buf)
    }
}

impl Drop for ChildStream {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

impl Transport for SshTransport {
    fn open(&self, host: &str, command: &str) -> Result<Box<dyn Read + Send>, TransportError> {
        let mut child = Command::new(PROGRAM)
            .args(self.args(host, command))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| TransportError::Spawn {
                program: PROGRAM.into(),
                source,
            })?;
        let Some(stdout) = child.stdout.take() else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(TransportError::MissingStdout);
        };
        Ok(Box::new(ChildStream { child, stdout }))
    }
}
