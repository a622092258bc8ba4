use std::io;

use anyhow::Result;
use serde::Serialize;

pub(crate) mod command;
pub(crate) mod scan;
pub(crate) mod session;
pub(crate) mod ui;

pub use self::command::{Args, Command, LogLevel, OutputFormat};
pub use self::scan::ScanArgs;
pub use self::session::SessionArgs;

/// Writes `value` as one compact JSON line.
pub(crate) fn write_json_line(out: &mut impl io::Write, value: &impl Serialize) -> Result<()> {
    serde_json::to_writer(&mut *out, value)?;
    writeln!(out)?;
    Ok(())
}
