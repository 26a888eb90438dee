//! Formatted output helpers for CLI commands.

#![allow(clippy::print_stdout)]

use std::fmt::Write;
use std::io::Write as _;

use corral_runtime::state::ContainerRecord;

/// Prints one line to stdout.
pub fn line(text: &str) {
    println!("{text}");
}

/// Prints `text` to stdout verbatim.
pub fn raw(text: &str) {
    print!("{text}");
    let _ = std::io::stdout().flush();
}

/// Renders container records as a `ps` table.
#[must_use]
pub fn container_table(records: &[ContainerRecord]) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<12} {:<15} {:<8} {:<10} {:<20} {:<20}",
        "ID", "NAME", "PID", "STATUS", "COMMAND", "CREATED"
    );
    for r in records {
        let _ = writeln!(
            out,
            "{:<12} {:<15} {:<8} {:<10} {:<20} {:<20}",
            r.id, r.name, r.pid, r.status, r.command, r.created_time
        );
    }
    out
}
