use std::path::PathBuf;

use clap::Parser;

use crate::{boundary::UnguardedPolicy, entry::Signature, header::DEFAULT_ENTRY_SYMBOL};

#[derive(Parser, Debug)]
#[clap(
    name = "noexit",
    about = "Runs a target's renamed main with exit() and _exit() intercepted"
)]
pub struct RuntimeOptions {
    /// Number of times to run the entry point, each under a fresh catch
    /// boundary and with freshly built arguments
    #[clap(long, default_value = "1")]
    pub iterations: usize,

    /// Symbol the target's main was renamed to
    #[clap(long, default_value = DEFAULT_ENTRY_SYMBOL)]
    pub entry_symbol: String,

    /// Parameter list of the renamed main: none, argv or envp
    #[clap(long, default_value = "argv")]
    pub signature: Signature,

    /// Write a JSON report of every iteration's outcome to this path
    #[clap(long)]
    pub report: Option<PathBuf>,

    /// Capture a backtrace for every intercepted termination
    #[clap(long)]
    pub backtrace: bool,

    /// What to do when the target exits from a thread with no catch boundary:
    /// forward or abort
    #[clap(long, default_value = "forward")]
    pub on_unguarded: UnguardedPolicy,

    /// Arguments passed to the target after its argv[0]
    #[clap(last = true)]
    pub target_args: Vec<String>,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            iterations: 1,
            entry_symbol: DEFAULT_ENTRY_SYMBOL.to_owned(),
            signature: Signature::Argv,
            report: None,
            backtrace: false,
            on_unguarded: UnguardedPolicy::Forward,
            target_args: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_cli_defaults() {
        let parsed = RuntimeOptions::parse_from(["noexit"]);
        let default = RuntimeOptions::default();

        assert_eq!(parsed.iterations, default.iterations);
        assert_eq!(parsed.entry_symbol, default.entry_symbol);
        assert_eq!(parsed.signature, default.signature);
        assert_eq!(parsed.on_unguarded, default.on_unguarded);
        assert!(parsed.target_args.is_empty());
    }

    #[test]
    fn target_args_follow_double_dash() {
        let parsed = RuntimeOptions::parse_from([
            "noexit",
            "--iterations",
            "3",
            "--signature",
            "envp",
            "--on-unguarded",
            "abort",
            "--",
            "--iterations",
            "input.bin",
        ]);

        assert_eq!(parsed.iterations, 3);
        assert_eq!(parsed.signature, Signature::Envp);
        assert_eq!(parsed.on_unguarded, UnguardedPolicy::Abort);
        assert_eq!(parsed.target_args, ["--iterations", "input.bin"]);
    }

    #[test]
    fn bad_signature_is_rejected() {
        assert!(RuntimeOptions::try_parse_from(["noexit", "--signature", "kwargs"]).is_err());
    }
}
