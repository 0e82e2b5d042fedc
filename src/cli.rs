//! Command-line surface. Grounded on `worktrunk`'s `cli.rs` (clap-derive
//! structs, one `Commands` variant per subcommand); the table of flags below
//! is `spec.md` §6's CLI surface table.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "gitp", version, about = "A meta-VCS orchestrator for nested repository trees")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Increase log verbosity (-v, -vv, -vvv).
    #[arg(short = 'v', long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[arg(long, value_enum, global = true, default_value_t = ColorArg::Auto)]
    pub color: ColorArg,
}

#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorArg {
    Auto,
    Always,
    Never,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Reconcile every materialized node against its manifest declaration.
    Sync {
        targets: Vec<String>,
        #[arg(short, long)]
        force: bool,
    },

    /// Pull from `src` (a local path or manifest URL) into the current tree.
    Pull {
        src: Option<String>,
        #[arg(long, value_name = "PATH")]
        target: Option<String>,
        #[arg(long, value_name = "PATH", num_args = 0..=1, default_missing_value = ".")]
        local: Option<String>,
        #[arg(short, long)]
        force: bool,
    },

    /// Clone a gitp tree rooted at `src` into `dst`.
    Clone { src: String, dst: String },

    /// Move the top-level repo (and its declared descendants) to `ref`.
    Checkout {
        #[arg(required = true)]
        refs: Vec<String>,
        #[arg(short = 'b', long)]
        branch: bool,
        #[arg(long)]
        orphan: bool,
        #[arg(long)]
        detach: bool,
        #[arg(short, long)]
        force: bool,
    },

    /// Declare and materialize a new manifest entry.
    New {
        dst: String,
        #[arg(long = "from")]
        from: String,
        #[arg(long)]
        branch: Option<String>,
        #[arg(long)]
        commit: Option<String>,
        #[arg(long)]
        link: Option<PathBuf>,
        #[arg(long)]
        newest: bool,
        #[arg(long)]
        link_filter: Option<String>,
        #[arg(short, long)]
        force: bool,
    },

    /// Declare `tgt` as a symlink to `link`.
    Link {
        tgt: String,
        link: PathBuf,
        #[arg(long)]
        newest: bool,
        #[arg(long)]
        filter: Option<String>,
        #[arg(long)]
        overlay: bool,
        #[arg(short, long)]
        force: bool,
    },

    /// Remove the symlink declaration for `tgt`, leaving a plain entry.
    Unlink {
        tgt: String,
        #[arg(long)]
        overlay: bool,
    },

    /// Remove one or more manifest entries and their materialized trees.
    Rm {
        #[arg(required = true)]
        targets: Vec<String>,
        #[arg(short, long)]
        force: bool,
    },

    /// Rename a manifest entry (and move its materialized tree).
    Mv { src: String, dst: String },

    /// Commit every changed node under the current tree.
    Commit(CommitArgs),

    /// Push every changed node, deepest first.
    Push {
        #[arg(short, long)]
        force: bool,
    },

    /// Cross-repo super-stash.
    Stash {
        #[command(subcommand)]
        command: StashCommand,
    },

    /// Run a command (or a `git`-prefixed subcommand) at every materialized node.
    Exec {
        #[arg(short = 't', long = "target", action = clap::ArgAction::Append)]
        targets: Vec<String>,
        #[arg(short = 'x', long = "filter", action = clap::ArgAction::Append)]
        filters: Vec<String>,
        #[arg(short = 'm', long)]
        modified: bool,
        #[arg(short, long)]
        preview: bool,
        #[arg(required = true, trailing_var_arg = true)]
        cmd: Vec<String>,
    },

    /// Print the status symbol of every node.
    Status {
        #[arg(short, long)]
        short: bool,
    },

    /// Run the exclusive-access lock server.
    Server {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[arg(long, default_value_t = 9999)]
        port: u16,
        #[arg(long, default_value_t = 16)]
        queue_size: usize,
        #[arg(long, default_value_t = 300)]
        timeout: u64,
        #[arg(long, default_value_t = 10)]
        timeout_margin: u64,
    },

    /// Show help for a subcommand, or general help.
    Help { command: Option<String> },

    /// Anything else is forwarded to the underlying VCS unmodified.
    #[command(external_subcommand)]
    External(Vec<String>),
}

#[derive(Args, Debug)]
pub struct CommitArgs {
    #[arg(short = 'm', long)]
    pub message: Option<String>,
    /// Reuse the authorship and message of an existing commit.
    #[arg(short = 'C')]
    pub reuse_message: Option<String>,
    #[arg(short = 'F', long)]
    pub file: Option<PathBuf>,
    #[arg(long)]
    pub no_edit: bool,
    /// Rejected: gitp has no interactive mode (spec.md §7, usage error).
    #[arg(short = 'p', long, hide = true)]
    pub patch: bool,
    /// Rejected: same reason as `--patch`.
    #[arg(short = 'e', long, hide = true)]
    pub edit: bool,
    #[arg(trailing_var_arg = true)]
    pub extra: Vec<String>,
}

#[derive(Subcommand, Debug)]
pub enum StashCommand {
    Push {
        #[arg(short, long)]
        message: Option<String>,
    },
    Pop {
        reference: Option<String>,
    },
    Apply {
        reference: Option<String>,
    },
    Drop {
        reference: Option<String>,
    },
    Branch {
        name: String,
        reference: String,
    },
    Show {
        reference: Option<String>,
    },
    List,
    Clear,
}
