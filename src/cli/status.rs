//! Handler for the `status` command.
//!
//! The collector runs as a plain foreground/systemd process with no
//! IPC or status-file surface of its own yet; this is a placeholder
//! for whichever monitoring hook (status file, metrics endpoint) gets
//! built alongside the operational tooling.

/// Execute the status command.
pub fn execute() {
    println!("marketwatch status: not yet implemented");
    println!("check `systemctl status marketwatch` or the configured log sink in the meantime");
}
