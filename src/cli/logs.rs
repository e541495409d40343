//! Handler for the `logs` command.
//!
//! Not yet implemented: the daemon currently only logs to stdout via
//! `tracing-subscriber`, so there is no dedicated log sink for this
//! command to tail. Left as a stub so the CLI surface matches its
//! eventual shape (`journalctl`-backed, as the teacher's wraps).

use crate::cli::LogsArgs;

/// Execute the logs command.
pub fn execute(args: &LogsArgs) {
    println!("marketwatch logs: not yet implemented");
    println!("(requested {} lines, follow={})", args.lines, args.follow);
}
