use async_trait::async_trait;
use futures::future::{FutureExt, LocalBoxFuture, Shared};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Branch that is selected when nothing better is known
pub const DEFAULT_BRANCH: &str = "master";

// ── Types ──

/// A branch name and a display string for its latest commit
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "(String, String)")]
pub struct BranchDescriptor {
    pub name: String,
    pub last_commit: String,
}

impl From<(String, String)> for BranchDescriptor {
    fn from((name, last_commit): (String, String)) -> Self {
        Self { name, last_commit }
    }
}

/// Branches of one repository in server order. Never re-sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BranchList {
    branches: Vec<BranchDescriptor>,
}

impl BranchList {
    pub fn new(branches: Vec<BranchDescriptor>) -> Self {
        Self { branches }
    }

    pub fn names(&self) -> Vec<String> {
        self.branches.iter().map(|b| b.name.clone()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.branches.iter().any(|b| b.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &BranchDescriptor> {
        self.branches.iter()
    }

    pub fn len(&self) -> usize {
        self.branches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.branches.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("Request to {url} failed: {message}")]
    Http { url: String, message: String },
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("Failed to decode response from {url}: {message}")]
    Decode { url: String, message: String },
    #[error("Fetching branches for {repo} timed out after {after:?}")]
    Timeout { repo: String, after: Duration },
}

// ── Sources ──

/// Where branch lists come from. `refresh` asks the server to bypass its
/// own cache.
#[async_trait(?Send)]
pub trait BranchSource {
    async fn fetch_branches(&self, repo: &str, refresh: bool) -> Result<BranchList, FetchError>;
}

/// Talks to the comparison server's `/branches` and `/repos` endpoints.
pub struct HttpBranchSource {
    client: reqwest::Client,
    base_url: Url,
}

#[derive(Deserialize)]
struct BranchesResponse {
    branch: Vec<BranchDescriptor>,
}

#[derive(Deserialize)]
struct ReposResponse {
    repos: Vec<String>,
}

impl HttpBranchSource {
    pub fn new(client: reqwest::Client, base_url: Url) -> Self {
        Self { client, base_url }
    }

    pub fn branches_url(&self, repo: &str, refresh: bool) -> Result<Url, FetchError> {
        let mut url = self.endpoint("/branches")?;
        url.query_pairs_mut()
            .append_pair("repo", repo)
            .append_pair("fetch", if refresh { "true" } else { "false" });
        Ok(url)
    }

    /// Repositories the server knows about
    pub async fn list_repositories(&self) -> Result<Vec<String>, FetchError> {
        let url = self.endpoint("/repos")?;
        let response: ReposResponse = get_json(&self.client, url).await?;
        Ok(response.repos)
    }

    fn endpoint(&self, path: &str) -> Result<Url, FetchError> {
        self.base_url.join(path).map_err(|e| FetchError::Http {
            url: self.base_url.to_string(),
            message: e.to_string(),
        })
    }
}

#[async_trait(?Send)]
impl BranchSource for HttpBranchSource {
    async fn fetch_branches(&self, repo: &str, refresh: bool) -> Result<BranchList, FetchError> {
        let url = self.branches_url(repo, refresh)?;
        let response: BranchesResponse = get_json(&self.client, url).await?;
        Ok(BranchList::new(response.branch))
    }
}

/// GET `url` and decode the JSON body, mapping every failure to a `FetchError`.
pub async fn get_json<T: DeserializeOwned>(
    client: &reqwest::Client,
    url: Url,
) -> Result<T, FetchError> {
    let url_str = url.to_string();
    log::debug!("GET {}", url_str);
    let response = client.get(url).send().await.map_err(|e| FetchError::Http {
        url: url_str.clone(),
        message: e.to_string(),
    })?;

    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::Status {
            url: url_str,
            status: status.as_u16(),
        });
    }

    let body = response.text().await.map_err(|e| FetchError::Http {
        url: url_str.clone(),
        message: e.to_string(),
    })?;
    serde_json::from_str(&body).map_err(|e| FetchError::Decode {
        url: url_str,
        message: e.to_string(),
    })
}

// ── Cache ──

type SharedFetch = Shared<LocalBoxFuture<'static, Result<Rc<BranchList>, FetchError>>>;

struct InFlight {
    generation: u64,
    forced: bool,
    fetch: SharedFetch,
}

#[derive(Default)]
struct CacheState {
    loaded: HashMap<String, Rc<BranchList>>,
    /// Generation of the fetch that produced each `loaded` entry
    applied: HashMap<String, u64>,
    in_flight: HashMap<String, InFlight>,
    next_generation: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    NotLoaded,
    Loading,
    Loaded(usize),
}

/// Per-repository branch lists for the lifetime of the session.
///
/// At most one fetch per repository is outstanding; concurrent `load` calls
/// share its outcome. A failed fetch leaves any previous list in place.
pub struct BranchCache {
    source: Rc<dyn BranchSource>,
    timeout: Duration,
    state: Rc<RefCell<CacheState>>,
}

impl BranchCache {
    pub fn new(source: Rc<dyn BranchSource>, timeout: Duration) -> Self {
        Self {
            source,
            timeout,
            state: Rc::new(RefCell::new(CacheState::default())),
        }
    }

    /// Branch list for `repo`, fetched when not cached or when `force` is set.
    pub async fn load(&self, repo: &str, force: bool) -> Result<Rc<BranchList>, FetchError> {
        let fetch = {
            let mut state = self.state.borrow_mut();
            if !force {
                if let Some(list) = state.loaded.get(repo) {
                    return Ok(Rc::clone(list));
                }
            }
            // A forced load must not be satisfied by a fetch that may hit
            // the server's cache.
            let joinable = state
                .in_flight
                .get(repo)
                .filter(|f| f.forced || !force)
                .map(|f| f.fetch.clone());
            match joinable {
                Some(fetch) => {
                    log::debug!("Joining in-flight branch fetch for {}", repo);
                    fetch
                }
                None => self.start_fetch(&mut state, repo, force),
            }
        };
        fetch.await
    }

    /// Cached list, if any. `None` means never loaded, not "no branches".
    pub fn get(&self, repo: &str) -> Option<Rc<BranchList>> {
        self.state.borrow().loaded.get(repo).cloned()
    }

    pub fn status(&self, repo: &str) -> CacheStatus {
        let state = self.state.borrow();
        if state.in_flight.contains_key(repo) {
            CacheStatus::Loading
        } else {
            match state.loaded.get(repo) {
                Some(list) => CacheStatus::Loaded(list.len()),
                None => CacheStatus::NotLoaded,
            }
        }
    }

    fn start_fetch(&self, state: &mut CacheState, repo: &str, force: bool) -> SharedFetch {
        state.next_generation += 1;
        let generation = state.next_generation;
        let source = Rc::clone(&self.source);
        let cache: Weak<RefCell<CacheState>> = Rc::downgrade(&self.state);
        let timeout = self.timeout;
        let repo_key = repo.to_string();

        log::info!("Loading branches for {} (refresh: {})", repo, force);
        let fetch = async move {
            let fetched =
                tokio::time::timeout(timeout, source.fetch_branches(&repo_key, force)).await;
            let result = match fetched {
                Ok(result) => result.map(Rc::new),
                Err(_) => Err(FetchError::Timeout {
                    repo: repo_key.clone(),
                    after: timeout,
                }),
            };

            // A list never replaces one from a later fetch; the whole update
            // happens under one borrow.
            if let Some(cache) = cache.upgrade() {
                let mut state = cache.borrow_mut();
                let CacheState {
                    loaded,
                    applied,
                    in_flight,
                    ..
                } = &mut *state;
                if in_flight
                    .get(&repo_key)
                    .is_some_and(|f| f.generation == generation)
                {
                    in_flight.remove(&repo_key);
                }
                match &result {
                    Ok(list) => {
                        let superseded = applied
                            .get(&repo_key)
                            .is_some_and(|&newer| newer > generation);
                        if superseded {
                            log::debug!("Discarding stale branch list for {}", repo_key);
                        } else {
                            applied.insert(repo_key.clone(), generation);
                            loaded.insert(repo_key.clone(), Rc::clone(list));
                        }
                    }
                    Err(e) => log::warn!("Branch fetch for {} failed: {}", repo_key, e),
                }
            }
            result
        }
        .boxed_local()
        .shared();

        state.in_flight.insert(
            repo.to_string(),
            InFlight {
                generation,
                forced: force,
                fetch: fetch.clone(),
            },
        );
        fetch
    }
}

// ── Selection after load ──

/// Which rule picked a control's value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionTier {
    Url,
    Persisted,
    Master,
    Unset,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchChoice {
    pub name: Option<String>,
    pub tier: SelectionTier,
}

/// Pick a branch for one control once `list` is known.
///
/// Priority: value pending from the URL, then the persisted selection, then
/// `master`, else unset. Candidates that are not in `list` are skipped.
pub fn select_branch(
    list: &BranchList,
    from_url: Option<&str>,
    persisted: Option<&str>,
) -> BranchChoice {
    let candidates = [
        (from_url, SelectionTier::Url),
        (persisted, SelectionTier::Persisted),
        (Some(DEFAULT_BRANCH), SelectionTier::Master),
    ];
    for (candidate, tier) in candidates {
        let Some(name) = candidate.filter(|n| !n.is_empty()) else {
            continue;
        };
        if list.contains(name) {
            return BranchChoice {
                name: Some(name.to_string()),
                tier,
            };
        }
        if tier != SelectionTier::Master {
            log::debug!("Ignoring stale {:?} branch selection '{}'", tier, name);
        }
    }
    BranchChoice {
        name: None,
        tier: SelectionTier::Unset,
    }
}
