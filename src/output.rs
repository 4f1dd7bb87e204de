use std::io::{self, Write};

use serde::Serialize;

use crate::app::{ConvertResult, ProgressEvent, ProgressSink, ReconcileResult};

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_convert(result: &ConvertResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_reconcile(result: &ReconcileResult) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

// Job messages would interleave with the JSON document on stdout.
impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}
