mod branches;
mod change_requests;
mod config;
mod controls;
mod presets;
mod query;
mod store;
mod workflow;

use anyhow::{Context, Result};
use branches::{BranchCache, CacheStatus, HttpBranchSource};
use change_requests::GitHubClient;
use clap::{Parser, Subcommand};
use config::WpConfig;
use controls::{ControlName, MemoryControls};
use query::{Navigator, UrlSync};
use std::process::Command as Process;
use std::rc::Rc;
use store::{FileSelectionStore, MemorySelectionStore, SelectionState, SelectionStore};
use url::Url;
use workflow::{Workflow, WorkflowError};

/// Pick a repository and two branches, then open the weight comparison
#[derive(Parser)]
#[command(name = "wp", version, about)]
struct Cli {
    /// Comparison server base URL (overrides config)
    #[arg(long, global = true)]
    server: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List repositories known to the server
    Repos,
    /// Print the branches of a repository
    Branches {
        repo: String,
        /// Make the server fetch from its remote first
        #[arg(long)]
        fetch: bool,
    },
    /// Print the parameter preset of every known repository
    Presets,
    /// Pick two branches and launch a comparison
    Compare {
        /// Page URL whose query string seeds the selection
        #[arg(long)]
        url: Option<String>,
        #[arg(long)]
        repo: Option<String>,
        /// First (old) branch
        #[arg(long)]
        old: Option<String>,
        /// Second (new) branch
        #[arg(long)]
        new: Option<String>,
        /// Bypass all branch caches
        #[arg(long)]
        refresh: bool,
        /// Open the comparison in the browser
        #[arg(long)]
        open: bool,
    },
    /// List open pull requests and optionally compare one
    Prs {
        #[arg(long)]
        owner: Option<String>,
        #[arg(long)]
        repo: Option<String>,
        /// Compare the pull request with this number
        #[arg(long)]
        launch: Option<u64>,
        #[arg(long)]
        open: bool,
    },
    /// Change one parameter of a page URL and navigate there
    Redirect {
        /// Page URL to start from
        #[arg(long)]
        url: String,
        /// Control whose query parameter changes
        name: ControlName,
        value: String,
        #[arg(long)]
        open: bool,
    },
    /// Show the parameters a page or comparison URL carries
    Show { url: String },
    /// Print the remembered repository and branches
    Selection,
    /// Write the effective config to ~/.config/wp/config.toml
    InitConfig,
}

/// Prints the target and optionally hands it to the platform opener.
struct TerminalNavigator {
    open: bool,
}

impl Navigator for TerminalNavigator {
    fn navigate(&self, url: &Url) {
        println!("{}", url);
        if self.open {
            if let Err(e) = open_in_browser(url) {
                log::warn!("Failed to open browser: {:#}", e);
            }
        }
    }
}

fn open_in_browser(url: &Url) -> Result<()> {
    let mut cmd = if cfg!(target_os = "macos") {
        Process::new("open")
    } else if cfg!(target_os = "windows") {
        let mut c = Process::new("cmd");
        c.args(["/C", "start", ""]);
        c
    } else {
        Process::new("xdg-open")
    };
    let status = cmd
        .arg(url.as_str())
        .status()
        .context("Failed to launch browser")?;
    if !status.success() {
        anyhow::bail!("Browser opener exited with {}", status);
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    let cwd = std::env::current_dir().context("Failed to read current directory")?;
    let config = config::load_config(&cwd);

    let server = cli.server.as_deref().unwrap_or(&config.server.base_url);
    let server = Url::parse(server).with_context(|| format!("Invalid server URL '{}'", server))?;
    let http = reqwest::Client::builder()
        .user_agent(concat!("wp/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to create HTTP client")?;

    match cli.command {
        Command::Repos => {
            let source = HttpBranchSource::new(http, server);
            for repo in source.list_repositories().await? {
                println!("{}", repo);
            }
        }
        Command::Branches { repo, fetch } => {
            let source = Rc::new(HttpBranchSource::new(http, server));
            let cache = BranchCache::new(source, config.fetch_timeout());
            let branches = cache.load(&repo, fetch).await?;
            if branches.is_empty() {
                log::warn!("{} has no branches", repo);
            }
            for branch in branches.iter() {
                println!("{:<50} {}", branch.name, branch.last_commit);
            }
            if let CacheStatus::Loaded(count) = cache.status(&repo) {
                println!("{} branches", count);
            }
        }
        Command::Presets => {
            let table = config.preset_table();
            for repo in table.repos() {
                let preset = table.resolve(Some(repo))?;
                println!("{}", repo);
                for (name, value) in preset.query_pairs().iter().skip(1) {
                    println!("  {:<14} {}", name, value);
                }
            }
        }
        Command::Compare {
            url,
            repo,
            old,
            new,
            refresh,
            open,
        } => {
            let mut page = match url {
                Some(u) => Url::parse(&u).with_context(|| format!("Invalid page URL '{}'", u))?,
                None => server.clone(),
            };
            // --repo acts like the query parameter so the first load honours --refresh
            if let Some(repo) = repo.filter(|r| !r.is_empty()) {
                page = query::with_param(&page, ControlName::Repo.as_str(), &repo);
            }

            let (workflow, controls) = build_workflow(&config, http, server, page, open);
            workflow.start(refresh).await.map_err(with_hint)?;
            if workflow.state().repo().is_none() {
                anyhow::bail!("No repository selected; pass --repo");
            }
            // Branch flags are the user picking from the loaded lists
            if let Some(old) = offered_branch(&controls, ControlName::Old, old)? {
                workflow.first_changed(Some(&old));
            }
            if let Some(new) = offered_branch(&controls, ControlName::New, new)? {
                workflow.second_changed(Some(&new));
            }
            log::info!(
                "Comparing {:?} → {:?}",
                controls.get(ControlName::Old),
                controls.get(ControlName::New)
            );
            workflow.launch().map_err(with_hint)?;
        }
        Command::Prs {
            owner,
            repo,
            launch,
            open,
        } => {
            let owner = owner.unwrap_or_else(|| config.github.owner.clone());
            let repo = repo.unwrap_or_else(|| config.github.repo.clone());
            let api_url = Url::parse(&config.github.api_url)
                .with_context(|| format!("Invalid GitHub API URL '{}'", config.github.api_url))?;
            let github = GitHubClient::new(http.clone(), api_url);
            let list = github.list_open(&owner, &repo).await?;

            for row in &list.rows {
                let marker = if row.class.disabled {
                    'x'
                } else if row.class.highlighted {
                    '*'
                } else {
                    ' '
                };
                let title: String = row.request.title.chars().take(100).collect();
                println!(
                    "{} #{:<6} {:<60} {:<16} {} → {}  {}  {}",
                    marker,
                    row.request.number,
                    title,
                    row.request.author(),
                    row.request.head.ref_name,
                    row.request.base.ref_name,
                    row.request.updated_at.format("%Y-%m-%d"),
                    row.request.html_url,
                );
            }
            println!("{} highlighted", list.highlighted);

            if let Some(number) = launch {
                let row = list
                    .rows
                    .iter()
                    .find(|r| r.request.number == number)
                    .with_context(|| format!("No open pull request #{}", number))?;
                let (workflow, _) = build_workflow(&config, http, server.clone(), server, open);
                workflow
                    .compare_change_request(row, &repo)
                    .await
                    .map_err(with_hint)?;
            }
        }
        Command::Redirect {
            url,
            name,
            value,
            open,
        } => {
            let page = Url::parse(&url).with_context(|| format!("Invalid page URL '{}'", url))?;
            let sync = UrlSync::new(page, Rc::new(TerminalNavigator { open }));
            if sync.redirect_target(name.as_str(), Some(&value)).is_none() {
                anyhow::bail!("Empty value for {}", name);
            }
            sync.on_change(name, Some(&value));
        }
        Command::Show { url } => {
            let page = Url::parse(&url).with_context(|| format!("Invalid URL '{}'", url))?;
            match query::parse_compare_url(&page) {
                Ok(request) => {
                    println!("compare {} → {}", request.old, request.new);
                    for (name, value) in request.preset.query_pairs() {
                        println!("  {:<14} {}", name, value);
                    }
                }
                Err(e) => {
                    log::debug!("{}", e);
                    let sync = UrlSync::new(page, Rc::new(TerminalNavigator { open: false }));
                    for name in ControlName::ALL {
                        println!("{:<14} {}", name, sync.read_param(name.as_str(), "-"));
                    }
                }
            }
        }
        Command::Selection => {
            let store = open_store();
            let selection = SelectionState::load(store.as_ref());
            let show = |value: Option<String>| value.unwrap_or_else(|| "-".to_string());
            println!("repo   {}", show(selection.repo));
            println!("old    {}", show(selection.first_branch));
            println!("new    {}", show(selection.second_branch));
        }
        Command::InitConfig => {
            let path = config::save_config(&config)?;
            println!("Wrote {}", path.display());
        }
    }

    Ok(())
}

fn offered_branch(
    controls: &MemoryControls,
    name: ControlName,
    value: Option<String>,
) -> Result<Option<String>> {
    let Some(value) = value.filter(|v| !v.is_empty()) else {
        return Ok(None);
    };
    if !controls.options(name).contains(&value) {
        anyhow::bail!("No branch '{}' (--{})", value, name);
    }
    Ok(Some(value))
}

/// Point the user at the fix for the failures they can act on.
fn with_hint(e: WorkflowError) -> anyhow::Error {
    let hint = match &e {
        WorkflowError::Preset(p) if p.is_unknown_repository() => {
            Some("pick a repository with a preset, or add [presets.<repo>] to .wp-config.toml")
        }
        WorkflowError::NotReady => Some("pass --old and --new, or check the branch list"),
        _ => None,
    };
    match hint {
        Some(hint) => anyhow::Error::new(e).context(hint),
        None => e.into(),
    }
}

fn open_store() -> Rc<dyn SelectionStore> {
    match FileSelectionStore::open_default() {
        Ok(store) => {
            log::debug!("Selections in {}", store.path().display());
            Rc::new(store)
        }
        Err(e) => {
            log::warn!("Selections won't be remembered: {:#}", e);
            Rc::new(MemorySelectionStore::new())
        }
    }
}

fn build_workflow(
    config: &WpConfig,
    http: reqwest::Client,
    server: Url,
    page: Url,
    open: bool,
) -> (Workflow, Rc<MemoryControls>) {
    let store = open_store();
    let controls = Rc::new(MemoryControls::new());
    let source = Rc::new(HttpBranchSource::new(http, server.clone()));
    let sync = UrlSync::new(page, Rc::new(TerminalNavigator { open }));
    let workflow = Workflow::new(
        BranchCache::new(source, config.fetch_timeout()),
        config.preset_table(),
        store,
        controls.clone(),
        sync,
        server,
    );
    (workflow, controls)
}
