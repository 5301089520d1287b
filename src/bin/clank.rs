// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use clank::{
    config::Config,
    fs::HostInspector,
    link::{exclude::ExcludeDrafter, state::LinkState, LinkReport, Linker},
    listing::{list, LinkFilter, ListEntry, ListOptions},
    mapping::MappingContext,
    orphan::find_orphans,
    path::{default_config_path, normalize, relative_to},
    scope::ScopeFlags,
    store::{self, OverlayStore},
    vcs::{Git2Vcs, Vcs},
};

use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand};
use std::{
    env::current_dir,
    path::{Path, PathBuf},
    process::exit,
};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "clank [options] <clank-command>",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    /// Path to configuration file.
    #[arg(long, global = true, value_name = "path")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    async fn run(self) -> Result<()> {
        let config_path = match self.config {
            Some(path) => path,
            None => default_config_path()?,
        };

        match self.command {
            Command::Init => run_init(&config_path),
            Command::Link => run_link(&config_path).await,
            Command::Unlink => run_unlink(&config_path).await,
            Command::Add(opts) => run_add(&config_path, opts).await,
            Command::Rm(opts) => run_rm(&config_path, opts).await,
            Command::Mv(opts) => run_mv(&config_path, opts).await,
            Command::List(opts) => run_list(&config_path, opts).await,
            Command::Check => run_check(&config_path).await,
            Command::Status => run_status(&config_path),
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Initialize overlay repository and default configuration.
    #[command(override_usage = "clank init [options]")]
    Init,

    /// Link every applicable overlay file into current checkout.
    #[command(override_usage = "clank link [options]")]
    Link,

    /// Remove every overlay link from current checkout.
    #[command(override_usage = "clank unlink [options]")]
    Unlink,

    /// Move files into overlay and link them back.
    #[command(override_usage = "clank add [options] <path>...")]
    Add(AddOptions),

    /// Remove files from overlay along with their links.
    #[command(override_usage = "clank rm [options] <path>...")]
    Rm(RmOptions),

    /// Move managed files to another scope.
    #[command(override_usage = "clank mv [options] <path>...")]
    Mv(MvOptions),

    /// List managed files of current checkout.
    #[command(override_usage = "clank list [options] [path]")]
    List(ListArgs),

    /// Report broken links, instructions conflicts, and orphans.
    #[command(override_usage = "clank check [options]")]
    Check,

    /// Show working tree status of overlay repository.
    #[command(override_usage = "clank status [options]")]
    Status,
}

#[derive(Args, Clone, Debug, Default)]
#[group(multiple = false)]
struct ScopeArgs {
    /// Use global scope, shared by every project.
    #[arg(short, long)]
    pub global: bool,

    /// Use project scope, shared by every worktree of the project.
    #[arg(short, long)]
    pub project: bool,

    /// Use worktree scope, private to current worktree.
    #[arg(short, long)]
    pub worktree: bool,
}

impl From<ScopeArgs> for ScopeFlags {
    fn from(args: ScopeArgs) -> Self {
        Self {
            global: args.global,
            project: args.project,
            worktree: args.worktree,
        }
    }
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct AddOptions {
    /// Paths to bring under management.
    #[arg(required = true, value_name = "path")]
    pub paths: Vec<PathBuf>,

    #[command(flatten)]
    pub scope: ScopeArgs,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct RmOptions {
    /// Paths to remove from overlay.
    #[arg(required = true, value_name = "path")]
    pub paths: Vec<PathBuf>,

    #[command(flatten)]
    pub scope: ScopeArgs,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct MvOptions {
    /// Managed paths to move.
    #[arg(required = true, value_name = "path")]
    pub paths: Vec<PathBuf>,

    #[command(flatten)]
    pub scope: ScopeArgs,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct ListArgs {
    /// Only list below this directory.
    #[arg(value_name = "path")]
    pub path: Option<PathBuf>,

    /// Include files in tool directories.
    #[arg(long)]
    pub hidden: bool,

    /// Maximum depth below misc directories.
    #[arg(short, long, value_name = "n")]
    pub depth: Option<usize>,

    /// List only files linked into overlay.
    #[arg(short, long, group = "state")]
    pub linked: bool,

    /// List only files not linked into overlay.
    #[arg(short, long, group = "state")]
    pub unlinked: bool,

    /// Show every fanned out copy of a file.
    #[arg(long)]
    pub no_dedupe: bool,

    #[command(flatten)]
    pub scope: ScopeArgs,
}

#[tokio::main]
async fn main() {
    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .with_timer(false)
        .without_time();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    if let Err(error) = run().await {
        error!("{error:?}");
        exit(1);
    }

    exit(0)
}

async fn run() -> Result<()> {
    Cli::parse().run().await
}

/// Everything one command needs about the current checkout.
struct Session {
    cwd: PathBuf,
    config: Config,
    vcs: Git2Vcs,
    ctx: MappingContext,
    exclude: ExcludeDrafter,
}

impl Session {
    fn open(config_path: &Path) -> Result<Self> {
        let cwd = normalize(current_dir()?);
        let config = Config::load(config_path)?;
        let vcs = Git2Vcs::discover(&cwd)?;
        let git = vcs.git_context()?;
        let ctx = MappingContext::new(config.overlay_repo.as_path(), git.root.clone(), git);
        let exclude = ExcludeDrafter::new(vcs.exclude_path())?;

        Ok(Self {
            cwd,
            config,
            vcs,
            ctx,
            exclude,
        })
    }

    fn store(&self) -> OverlayStore<'_, Git2Vcs> {
        OverlayStore::new(&self.ctx, &self.config, &self.vcs).with_exclude(self.exclude.clone())
    }

    fn linker(&self) -> Linker<'_, Git2Vcs> {
        self.store().linker()
    }

    fn rel(&self, path: &Path) -> PathBuf {
        relative_to(path, &self.cwd)
    }
}

fn run_init(config_path: &Path) -> Result<()> {
    let config = Config::load(config_path)?;
    let project = current_dir()
        .ok()
        .and_then(|cwd| Git2Vcs::discover(cwd).ok())
        .and_then(|vcs| vcs.git_context().ok())
        .map(|git| git.project_name);

    store::init(config.overlay_repo.as_path(), project.as_deref())?;
    if config.save_if_absent(config_path)? {
        info!("write config to {:?}", config_path.display());
    }

    Ok(())
}

async fn run_link(config_path: &Path) -> Result<()> {
    let session = Session::open(config_path)?;
    let report = session.linker().link().await?;
    summarize(&session, &report);

    Ok(())
}

async fn run_unlink(config_path: &Path) -> Result<()> {
    let session = Session::open(config_path)?;
    let removed = session.linker().unlink().await?;
    info!("removed {} links", removed.len());

    Ok(())
}

async fn run_add(config_path: &Path, opts: AddOptions) -> Result<()> {
    let session = Session::open(config_path)?;
    let scope = ScopeFlags::from(opts.scope).resolve_or(clank::Scope::Project)?;
    let report = session.store().add(&opts.paths, scope, &session.cwd).await?;
    info!("added {} files to {scope} scope", report.stored.len());
    summarize(&session, &report.links);

    report_failures(&session, "add", &report.failed)
}

async fn run_rm(config_path: &Path, opts: RmOptions) -> Result<()> {
    let session = Session::open(config_path)?;
    let scope = ScopeFlags::from(opts.scope).selected()?;
    let report = session.store().remove(&opts.paths, scope, &session.cwd).await?;
    info!(
        "removed {} files and {} links",
        report.deleted.len(),
        report.unlinked.len()
    );
    if !report.links.is_noop() {
        summarize(&session, &report.links);
    }

    report_failures(&session, "remove", &report.failed)
}

async fn run_mv(config_path: &Path, opts: MvOptions) -> Result<()> {
    let session = Session::open(config_path)?;
    let scope = ScopeFlags::from(opts.scope).resolve_required()?;
    let report = session.store().move_scope(&opts.paths, scope, &session.cwd).await?;
    for path in &report.unchanged {
        info!("{:?} already in {scope} scope", path.display());
    }
    summarize(&session, &report.links);

    report_failures(&session, "move", &report.failed)
}

async fn run_list(config_path: &Path, opts: ListArgs) -> Result<()> {
    let session = Session::open(config_path)?;
    let link_filter = match (opts.linked, opts.unlinked) {
        (true, _) => LinkFilter::Linked,
        (_, true) => LinkFilter::Unlinked,
        _ => LinkFilter::All,
    };
    let options = ListOptions {
        hidden: opts.hidden,
        max_depth: opts.depth,
        subtree: opts.path.map(|path| normalize(session.cwd.join(path))),
        link_filter,
        scope: ScopeFlags::from(opts.scope).selected()?,
        dedupe: !opts.no_dedupe,
    };

    let inspector = HostInspector::new(&session.vcs);
    let entries = list(&session.ctx, &session.config, &inspector, &options, &session.cwd).await;
    for entry in entries {
        println!("{}", render_entry(&session, &entry));
    }

    Ok(())
}

async fn run_check(config_path: &Path) -> Result<()> {
    let session = Session::open(config_path)?;
    let linker = session.linker();
    let mut problems = 0;

    for conflict in linker.instructions_conflicts().await {
        problems += 1;
        println!("conflict: {conflict}");
        println!("  fix: {}", conflict.remediation(&session.ctx.target_root));
    }

    for (path, state) in linker.classify_target().await {
        match state {
            LinkState::OutsideOverlay { target } => {
                problems += 1;
                println!(
                    "outside overlay: {} -> {}",
                    session.rel(&path).display(),
                    target.display()
                );
                println!("  fix: rm {}", session.rel(&path).display());
            }
            LinkState::WrongMapping { overlay, .. } => {
                problems += 1;
                println!(
                    "wrong mapping: {} -> {}",
                    session.rel(&path).display(),
                    overlay.display()
                );
                println!("  fix: clank link");
            }
            LinkState::Valid { .. } | LinkState::Unadded => {}
        }
    }

    for orphan in find_orphans(&session.ctx, &session.config).await? {
        problems += 1;
        println!("orphan: {orphan}");
        println!("  fix: {}", orphan.remediation(&session.ctx));
    }

    if problems > 0 {
        bail!("found {problems} problems");
    }
    info!("no problems found");

    Ok(())
}

fn run_status(config_path: &Path) -> Result<()> {
    let config = Config::load(config_path)?;
    let vcs = Git2Vcs::discover(config.overlay_repo.as_path())?;
    for line in vcs.status_lines()? {
        println!("{line}");
    }

    Ok(())
}

fn render_entry(session: &Session, entry: &ListEntry) -> String {
    let path = entry.display.display();
    match &entry.state {
        LinkState::Valid { scope, .. } => format!("{path} ({scope})"),
        LinkState::Unadded => format!("{path} (unadded)"),
        LinkState::OutsideOverlay { target } => {
            format!("{path} -> {} (outside overlay)", target.display())
        }
        LinkState::WrongMapping {
            expected: Some(expected),
            ..
        } => format!(
            "{path} (wrong mapping, belongs at {})",
            session.rel(expected).display()
        ),
        LinkState::WrongMapping { expected: None, .. } => format!("{path} (wrong mapping)"),
    }
}

fn report_failures(session: &Session, action: &str, failed: &[(PathBuf, String)]) -> Result<()> {
    for (path, reason) in failed {
        warn!("cannot {action} {:?}: {reason}", session.rel(path).display());
    }
    if !failed.is_empty() {
        bail!("{} of the given paths failed, the rest went through", failed.len());
    }

    Ok(())
}

fn summarize(session: &Session, report: &LinkReport) {
    info!(
        "{} created, {} replaced, {} unchanged, {} removed",
        report.created.len(),
        report.replaced.len(),
        report.unchanged.len(),
        report.removed.len()
    );
    for path in &report.skipped_tracked {
        warn!("{:?} is tracked by git, not linked", session.rel(path).display());
    }
    for missing in &report.missing_anchor {
        warn!(
            "{:?} not linked, directory {:?} is gone, run `clank check`",
            session.rel(&missing.link).display(),
            session.rel(&missing.anchor).display()
        );
    }
    for (path, reason) in &report.failed {
        warn!("cannot link {:?}: {reason}", session.rel(path).display());
    }
}
