pub mod fanout;
pub mod stream;

use anyhow::Result;
use serde::Serialize;

#[derive(Debug, Clone)]
pub struct OutputContext {
    pub json: bool,
    pub verbose: bool,
}

impl OutputContext {
    /// Print a report as pretty JSON, or through `human` otherwise
    pub fn print<T: Serialize>(&self, report: &T, human: impl FnOnce(&T)) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(report)?);
        } else {
            human(report);
        }
        Ok(())
    }
}

/// Join addresses for display
pub fn join_or_dash(values: &[String]) -> String {
    if values.is_empty() {
        "-".to_string()
    } else {
        values.join(", ")
    }
}
