//! `console.*` sink shared by the host and worker contexts

use boa_engine::{Context, JsResult};
use boa_gc::{Finalize, Trace};
use boa_runtime::{ConsoleState, Logger};
use colored::Colorize;

/// Prints console output to stdout/stderr, prefixed with the worker id inside workers
#[derive(Debug, Clone, Default, Trace, Finalize)]
pub struct ConsoleLogger {
    label: Option<String>,
}

impl ConsoleLogger {
    /// Logger for the host context
    pub fn host() -> Self {
        Self::default()
    }

    /// Logger for an isolated context
    pub fn labelled(label: impl Into<String>) -> Self {
        Self {
            label: Some(label.into()),
        }
    }

    fn format(&self, level: Option<&str>, msg: &str) -> String {
        let mut line = String::new();
        if let Some(label) = &self.label {
            line.push_str(&format!("[{}] ", label).dimmed().to_string());
        }
        if let Some(level) = level {
            line.push_str(level);
            line.push(' ');
        }
        line.push_str(msg);
        line
    }
}

impl Logger for ConsoleLogger {
    fn log(&self, msg: String, _state: &ConsoleState, _context: &mut Context) -> JsResult<()> {
        println!("{}", self.format(None, &msg));
        Ok(())
    }

    fn info(&self, msg: String, _state: &ConsoleState, _context: &mut Context) -> JsResult<()> {
        println!("{}", self.format(Some("[INFO]"), &msg));
        Ok(())
    }

    fn warn(&self, msg: String, _state: &ConsoleState, _context: &mut Context) -> JsResult<()> {
        eprintln!("{}", self.format(Some("[WARN]"), &msg));
        Ok(())
    }

    fn error(&self, msg: String, _state: &ConsoleState, _context: &mut Context) -> JsResult<()> {
        eprintln!("{}", self.format(Some("[ERROR]"), &msg));
        Ok(())
    }
}
