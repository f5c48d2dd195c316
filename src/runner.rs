//! External command execution.
//!
//! Every component in this crate talks to the system exclusively through the
//! [`CommandRunner`] trait: queries (`ifconfig -a`, `iwlist scan`), mutations
//! (`ifconfig <iface> up`), daemon launches and even signal delivery
//! (`kill -TERM <pid>`). Keeping one seam makes the whole control layer
//! scriptable in tests and auditable in logs.

use std::process::Command;

use crate::error::{NetshellError, Result};

/// Captured result of one external command invocation.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Raw stdout, lossily decoded.
    pub stdout: String,
    /// Process exit code, or -1 when terminated by signal.
    pub status: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// Executes a program with arguments, synchronously and with the caller's
/// privileges.
///
/// Implementations must capture stdout; callers largely ignore the exit
/// status and verify mutations by re-querying state instead.
pub trait CommandRunner: Send + Sync {
    fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput>;
}

/// Default runner backed by `std::process::Command`.
///
/// Stderr is discarded, matching the behavior the parsers were written
/// against (the underlying tools print noise such as "no wireless
/// extensions" there).
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        tracing::debug!("exec: {} {}", program, args.join(" "));

        let output = Command::new(program)
            .args(args)
            .stderr(std::process::Stdio::null())
            .output()
            .map_err(|e| NetshellError::CommandFailed {
                command: format!("{} {}", program, args.join(" ")),
                source: e,
            })?;

        let status = output.status.code().unwrap_or(-1);
        if status != 0 {
            tracing::debug!("{} exited with status {}", program, status);
        }

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            status,
        })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted command runner for unit tests.

    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    use super::{CommandOutput, CommandRunner};
    use crate::error::Result;

    type Hook = Box<dyn Fn(&[String]) + Send>;

    #[derive(Default)]
    struct Inner {
        queued: HashMap<String, VecDeque<String>>,
        sticky: HashMap<String, String>,
        hooks: Vec<(String, Hook)>,
        calls: Vec<(String, Vec<String>)>,
    }

    /// Test double: replays scripted stdout per program and records every
    /// invocation. Queued outputs are consumed in order, then the sticky
    /// output (if any) repeats, then empty stdout.
    #[derive(Default)]
    pub(crate) struct FakeRunner {
        inner: Mutex<Inner>,
    }

    impl FakeRunner {
        pub fn new() -> Self {
            Self::default()
        }

        /// Queue one stdout payload for the next invocation of `program`.
        pub fn push_output(&self, program: &str, stdout: &str) {
            self.inner
                .lock()
                .unwrap()
                .queued
                .entry(program.to_string())
                .or_default()
                .push_back(stdout.to_string());
        }

        /// Set a repeating stdout payload for `program`.
        pub fn set_output(&self, program: &str, stdout: &str) {
            self.inner
                .lock()
                .unwrap()
                .sticky
                .insert(program.to_string(), stdout.to_string());
        }

        /// Run a side effect whenever `program` is invoked (e.g. create the
        /// PID file a daemon would have written).
        pub fn on_command(&self, program: &str, hook: impl Fn(&[String]) + Send + 'static) {
            self.inner
                .lock()
                .unwrap()
                .hooks
                .push((program.to_string(), Box::new(hook)));
        }

        pub fn calls(&self) -> Vec<(String, Vec<String>)> {
            self.inner.lock().unwrap().calls.clone()
        }

        pub fn count(&self, program: &str) -> usize {
            self.inner
                .lock()
                .unwrap()
                .calls
                .iter()
                .filter(|(p, _)| p == program)
                .count()
        }
    }

    impl CommandRunner for FakeRunner {
        fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
            let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
            let mut inner = self.inner.lock().unwrap();
            inner.calls.push((program.to_string(), args.clone()));

            let stdout = inner
                .queued
                .get_mut(program)
                .and_then(|q| q.pop_front())
                .or_else(|| inner.sticky.get(program).cloned())
                .unwrap_or_default();

            // Hooks run while the lock is held; tests only use them for
            // filesystem side effects.
            for (target, hook) in &inner.hooks {
                if target == program {
                    hook(&args);
                }
            }

            Ok(CommandOutput { stdout, status: 0 })
        }
    }
}
