//! Recording shell double for unit tests.

use super::{CommandOutput, ShellCommand, ShellExecutor};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;

struct Responder {
    needle: String,
    remaining: Option<usize>,
    output: CommandOutput,
}

/// Records every command line and answers with scripted outputs.
///
/// Commands that match no responder succeed with empty output.
#[derive(Default)]
pub(crate) struct RecordingShell {
    commands: Mutex<Vec<String>>,
    responders: Mutex<Vec<Responder>>,
    delay: Option<Duration>,
}

impl RecordingShell {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Sleep this long inside every command, to widen race windows.
    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Answer every command containing `needle` with `output`.
    pub(crate) fn respond(&self, needle: &str, output: CommandOutput) {
        self.push(needle, None, output);
    }

    /// Answer the next `times` commands containing `needle` with `output`.
    pub(crate) fn respond_times(&self, needle: &str, times: usize, output: CommandOutput) {
        self.push(needle, Some(times), output);
    }

    fn push(&self, needle: &str, remaining: Option<usize>, output: CommandOutput) {
        self.responders.lock().unwrap().push(Responder {
            needle: needle.to_string(),
            remaining,
            output,
        });
    }

    pub(crate) fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    /// Number of recorded commands containing `needle`.
    pub(crate) fn count(&self, needle: &str) -> usize {
        self.commands
            .lock()
            .unwrap()
            .iter()
            .filter(|line| line.contains(needle))
            .count()
    }

    fn answer(&self, line: &str) -> CommandOutput {
        let mut responders = self.responders.lock().unwrap();
        for responder in responders.iter_mut() {
            if !line.contains(&responder.needle) {
                continue;
            }
            match responder.remaining {
                Some(0) => continue,
                Some(ref mut n) => {
                    *n -= 1;
                    return responder.output.clone();
                }
                None => return responder.output.clone(),
            }
        }
        CommandOutput::default()
    }
}

#[async_trait]
impl ShellExecutor for RecordingShell {
    async fn capture(&self, command: ShellCommand) -> Result<CommandOutput> {
        self.commands.lock().unwrap().push(command.line.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.answer(&command.line))
    }

    fn executor_type(&self) -> &'static str {
        "recording"
    }
}
