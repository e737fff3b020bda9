//! Argument parsing for the `codeloop` binary: one positional pair
//! (instructions file, repo path or clone URL) plus the flags listed in the
//! external-interfaces section of the spec, and five supporting
//! subcommands (`scan`, `validate`, `schema`, `version`) alongside `iterate`
//! and its `api`-mode alias.

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(
    name = "codeloop",
    version,
    about = "Drives an automated edit -> run -> fix loop against a git repository.",
    propagate_version = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(clap::Args, Debug, Default)]
pub struct GlobalOpts {
    /// Increase stderr verbosity (`-v` = debug, `-vv` = trace).
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Emit logs as JSON lines instead of human-readable text.
    #[arg(long = "json-logs", global = true)]
    pub json_logs: bool,

    /// Directory config file is resolved relative to; defaults to the repo path.
    #[arg(long = "config-file", global = true)]
    pub config_file: Option<String>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum TransportModeArg {
    Api,
    Browser,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Runs the full bootstrap -> plan -> iterate -> fix -> finalize loop.
    Iterate(IterateArgs),

    /// Shorthand for `iterate --mode api`.
    Api(IterateArgs),

    /// Prints the repo manifest (syntactic file classification) and exits.
    Scan {
        /// Repo path to scan.
        repo_path: String,
    },

    /// Validates a patch envelope read from a file, or stdin if omitted.
    Validate {
        /// Path to a file containing one JSON patch envelope.
        envelope_file: Option<String>,
    },

    /// Prints the JSON schema describing the patch and plan envelopes.
    Schema,

    /// Prints the binary's version and exits.
    Version,
}

#[derive(clap::Args, Debug)]
pub struct IterateArgs {
    /// Path to a file containing the run instructions.
    pub instructions_file: String,

    /// Local repo path, or a clone URL (cloned into a temp dir removed at exit).
    pub repo_path_or_url: String,

    /// Verification command to run after each iteration, e.g. `cargo test`.
    #[arg(long = "cmd")]
    pub cmd: Option<String>,

    /// Run unattended: never prompt, accept the model's plan as given.
    /// The orchestrator never prompts interactively in the first place, so
    /// this flag exists for external-interface compatibility and currently
    /// has no runtime effect.
    #[arg(long = "auto")]
    pub auto: bool,

    /// Verification command timeout, in seconds.
    #[arg(long = "timeout")]
    pub timeout_secs: Option<u64>,

    /// Which transport to drive the model through.
    #[arg(long = "mode", value_enum)]
    pub mode: Option<TransportModeArg>,

    /// Model name, passed through to the HTTP transport.
    #[arg(long = "model")]
    pub model: Option<String>,

    /// Per-model-call timeout, in seconds.
    #[arg(long = "api-timeout")]
    pub api_timeout_secs: Option<u64>,

    /// Forces the plan's estimated iteration count to exactly this value.
    #[arg(long = "iterations", value_parser = clap::value_parser!(u8).range(1..=3))]
    pub iterations: Option<u8>,

    /// Branch name prefix; iteration N runs on `<prefix>-<N>`.
    #[arg(long = "branch-prefix")]
    pub branch_prefix: Option<String>,

    /// Git remote to push the final branch to, if pushing is enabled.
    #[arg(long = "remote")]
    pub remote: Option<String>,

    /// Skip pushing the final branch (and opening a PR) at finalize time.
    #[arg(long = "no-push")]
    pub no_push: bool,
}
