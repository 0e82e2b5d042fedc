use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use log::LevelFilter;

use gitp::cli::{Cli, ColorArg, Commands, StashCommand};
use gitp::context::{ColorMode, Context, Verbosity};
use gitp::error::{downcast, GitpError};
use gitp::manifest::MANIFEST_FILE;
use gitp::styling::{eprintln, println, ERROR, GREEN};
use gitp::{exec, new_link, reconcile, stash, sync, vcs, verbs};

fn main() -> ExitCode {
    let cli = Cli::parse();

    let verbosity = if cli.quiet {
        Verbosity::Quiet
    } else {
        match cli.verbose {
            0 => Verbosity::Normal,
            1 => Verbosity::Verbose,
            _ => Verbosity::Debug,
        }
    };
    let color = match cli.color {
        ColorArg::Auto => ColorMode::Auto,
        ColorArg::Always => ColorMode::Always,
        ColorArg::Never => ColorMode::Never,
    };
    init_logging(verbosity);

    let ctx = match Context::new(verbosity, color, false) {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("{ERROR}error: could not determine current directory: {e}{ERROR:#}");
            return ExitCode::from(7);
        }
    };

    match run(&ctx, cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let code = downcast(&err).map(GitpError::exit_code).unwrap_or(1);
            eprintln!("{ERROR}error: {err:#}{ERROR:#}");
            ExitCode::from(code as u8)
        }
    }
}

fn init_logging(verbosity: Verbosity) {
    let level = match verbosity {
        Verbosity::Quiet => LevelFilter::Error,
        Verbosity::Normal => LevelFilter::Warn,
        Verbosity::Verbose => LevelFilter::Info,
        Verbosity::Debug => LevelFilter::Debug,
    };
    env_logger::Builder::new().filter_level(level).format_timestamp(None).init();
}

fn run(ctx: &Context, command: Option<Commands>) -> anyhow::Result<()> {
    let cwd = ctx.invocation_dir.clone();
    match command.unwrap_or(Commands::Status { short: false }) {
        Commands::Sync { targets, force } => {
            let target = targets.into_iter().next();
            sync::sync(&cwd, &sync::SyncOptions { force, target, local: false })
        }
        Commands::Pull { src, target, local, force } => {
            let src_path = src.as_deref().map(Path::new);
            let opts = sync::SyncOptions { force, target, local: local.is_some() };
            sync::pull(src_path, &cwd, &opts)
        }
        Commands::Clone { src, dst } => sync::clone_top(&src, &PathBuf::from(dst)),
        Commands::Checkout { refs, branch, orphan: _, detach, force } => {
            if refs.len() == 1 {
                new_link::checkout(
                    &cwd,
                    new_link::CheckoutTarget::Ref { reference: refs[0].clone(), is_branch: branch && !detach },
                    force,
                )
            } else {
                anyhow::ensure!(refs.len() == 2, "checkout takes either a single ref or <ref> <path>");
                new_link::checkout(
                    &cwd,
                    new_link::CheckoutTarget::FromRef { reference: refs[0].clone(), path: refs[1].clone() },
                    force,
                )
            }
        }
        Commands::New { dst, from, branch, commit, link, newest, link_filter, force } => {
            anyhow::ensure!(
                !(branch.is_some() && commit.is_some()),
                "--branch and --commit are mutually exclusive"
            );
            let reference = branch
                .map(new_link::Ref::Branch)
                .or_else(|| commit.map(new_link::Ref::Commit));
            new_link::new(
                &cwd,
                &dst,
                new_link::NewOptions {
                    from_url: Some(from),
                    ref_: reference,
                    link,
                    link_newest: newest,
                    link_filter,
                    force,
                },
            )
        }
        Commands::Link { tgt, link, newest, filter, overlay, force } => {
            new_link::link(&cwd, &tgt, &link, newest, filter, overlay, force)
        }
        Commands::Unlink { tgt, overlay } => new_link::unlink(&cwd, &tgt, overlay),
        Commands::Rm { targets, force } => {
            for t in targets {
                verbs::rm(&cwd, &t, force)?;
            }
            Ok(())
        }
        Commands::Mv { src, dst } => verbs::mv(&cwd, &src, &dst),
        Commands::Commit(args) => cmd_commit(&cwd, args),
        Commands::Push { force } => verbs::push(&cwd, force),
        Commands::Stash { command } => cmd_stash(&cwd, command),
        Commands::Exec { targets, filters, modified, preview, cmd } => {
            cmd_exec(&cwd, targets, filters, modified, preview, cmd)
        }
        Commands::Status { short } => cmd_status(&cwd, short),
        Commands::Server { host, port, queue_size, timeout, timeout_margin } => {
            cmd_server(host, port, queue_size, timeout, timeout_margin)
        }
        Commands::Help { command } => {
            let mut cmd = <Cli as clap::CommandFactory>::command();
            if let Some(name) = command {
                if let Some(sub) = cmd.find_subcommand_mut(&name) {
                    sub.print_help()?;
                    return Ok(());
                }
            }
            cmd.print_help()?;
            Ok(())
        }
        Commands::External(args) => cmd_external(&cwd, args),
    }
}

fn cmd_commit(cwd: &Path, args: gitp::cli::CommitArgs) -> anyhow::Result<()> {
    anyhow::ensure!(!args.patch, "interactive commit (-p) is not supported; pass a message");
    anyhow::ensure!(!args.edit, "interactive commit (-e) is not supported; pass a message");

    let mut message_args = Vec::new();
    if let Some(m) = &args.message {
        message_args.push("-m".to_string());
        message_args.push(m.clone());
    }
    if let Some(c) = &args.reuse_message {
        message_args.push("-C".to_string());
        message_args.push(c.clone());
    }
    if let Some(f) = &args.file {
        message_args.push("-F".to_string());
        message_args.push(f.display().to_string());
    }
    if args.no_edit {
        message_args.push("--no-edit".to_string());
    }
    message_args.extend(args.extra);
    anyhow::ensure!(!message_args.is_empty(), "commit requires -m, -C, -F, or --no-edit");

    let failures = verbs::commit(cwd, &message_args)?;
    if failures > 0 {
        return Err(GitpError::vcs(format!("{failures} node(s) failed to commit")).into());
    }
    Ok(())
}

fn cmd_stash(cwd: &Path, command: StashCommand) -> anyhow::Result<()> {
    match command {
        StashCommand::Push { message } => {
            let message = message.unwrap_or_default();
            if stash::push(cwd, &message)? {
                println!("saved working directory state");
            } else {
                println!("no local changes to save");
            }
            Ok(())
        }
        StashCommand::Pop { reference } => {
            let entry = stash::resolve(cwd, reference.as_deref())?;
            stash::apply_op(cwd, &entry, stash::StashOp::Pop)
        }
        StashCommand::Apply { reference } => {
            let entry = stash::resolve(cwd, reference.as_deref())?;
            stash::apply_op(cwd, &entry, stash::StashOp::Apply)
        }
        StashCommand::Drop { reference } => {
            let entry = stash::resolve(cwd, reference.as_deref())?;
            stash::apply_op(cwd, &entry, stash::StashOp::Drop)
        }
        StashCommand::Branch { name, reference } => {
            let entry = stash::resolve(cwd, Some(&reference))?;
            stash::branch(cwd, &name, &entry)
        }
        StashCommand::Show { reference } => {
            let entry = stash::resolve(cwd, reference.as_deref())?;
            println!("{}", entry.message);
            Ok(())
        }
        StashCommand::List => {
            for entry in stash::read_stashes(cwd)? {
                println!("stash@{{{}}}: On {}: {}", entry.pos, entry.branch, entry.message);
            }
            Ok(())
        }
        StashCommand::Clear => stash::clear(cwd),
    }
}

fn cmd_exec(
    cwd: &Path,
    targets: Vec<String>,
    filters: Vec<String>,
    modified_only: bool,
    preview: bool,
    cmd: Vec<String>,
) -> anyhow::Result<()> {
    let opts = exec::ExecOptions { targets, filters, modified_only, preview, stop_on_error: false };
    let results = exec::exec(cwd, &cmd, &opts)?;
    let mut failures = 0u32;
    for result in results {
        match result.skipped {
            Some(reason) => log::debug!("{}: skipped ({reason:?})", result.path.display()),
            None => {
                if let Some(output) = &result.output {
                    print!("{output}");
                }
                if result.failed {
                    failures += 1;
                }
            }
        }
    }
    if failures > 0 {
        return Err(GitpError::vcs(format!("{failures} node(s) exited non-zero")).into());
    }
    Ok(())
}

fn cmd_status(cwd: &Path, short: bool) -> anyhow::Result<()> {
    let mismatches = reconcile::check_for_state_match(cwd, None, true)?;
    if mismatches.is_empty() && !cwd.join(MANIFEST_FILE).is_file() {
        println!("(no manifest at {})", cwd.display());
        return Ok(());
    }
    for (path, mismatch) in &mismatches {
        print_status_line(path, mismatch.state, short);
    }
    if mismatches.is_empty() {
        println!("{GREEN}✓{GREEN:#} nothing to sync");
    }
    Ok(())
}

fn print_status_line(path: &Path, state: reconcile::RepoState, short: bool) {
    let style = gitp::styling::state_style(state);
    if short {
        println!("{style}{}{style:#} {}", state.symbol(), path.display());
    } else {
        println!("{style}{}{style:#} {} [{state:?}]", state.symbol(), path.display());
    }
}

fn cmd_server(host: String, port: u16, queue_size: usize, timeout: u64, timeout_margin: u64) -> anyhow::Result<()> {
    let config = gitp::lock::ServerConfig::new(
        queue_size,
        std::time::Duration::from_secs(timeout),
        std::time::Duration::from_secs(timeout_margin),
    )?;
    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
    runtime.block_on(gitp::lock::serve(&host, port, config))
}

/// Unknown subcommands forward straight to `git` (or, failing that, to the
/// bare program name) with the user's full argv, per `spec.md` §6/§7.
fn cmd_external(cwd: &Path, mut args: Vec<String>) -> anyhow::Result<()> {
    anyhow::ensure!(!args.is_empty(), "no command given");
    let program = args.remove(0);
    let repo = vcs::Repo::at(cwd);
    let status = if repo.is_git_repo() {
        std::process::Command::new("git").arg(&program).args(&args).current_dir(cwd).status()?
    } else {
        std::process::Command::new(&program).args(&args).current_dir(cwd).status()?
    };
    std::process::exit(status.code().unwrap_or(1));
}
