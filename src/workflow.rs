use crate::branches::{select_branch, BranchCache, BranchList, FetchError};
use crate::change_requests::ChangeRequestRow;
use crate::controls::{ControlName, Controls};
use crate::presets::{PresetError, PresetTable};
use crate::query::{build_compare_url, UrlSync};
use crate::store::{SelectionKey, SelectionStore};
use std::cell::RefCell;
use std::rc::Rc;
use thiserror::Error;
use url::Url;

/// Manual comparison flow
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowState {
    Idle,
    /// `error` holds the last fetch failure for display
    RepoSelected { repo: String, error: Option<String> },
    BranchesLoading { repo: String },
    BranchesReady { repo: String, branches: Rc<BranchList> },
    Launching { url: Url },
}

impl FlowState {
    pub fn repo(&self) -> Option<&str> {
        match self {
            FlowState::RepoSelected { repo, .. }
            | FlowState::BranchesLoading { repo }
            | FlowState::BranchesReady { repo, .. } => Some(repo.as_str()),
            FlowState::Idle | FlowState::Launching { .. } => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error(transparent)]
    Preset(#[from] PresetError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("Select a repository and both branches first")]
    NotReady,
    #[error("PR #{0} comes from a fork and can't be compared")]
    DisabledChangeRequest(u64),
    #[error("Failed to build comparison URL: {0}")]
    Url(#[from] url::ParseError),
}

/// Per-control wiring for the two branch selectors
struct BranchSlot {
    control: ControlName,
    key: SelectionKey,
}

const BRANCH_SLOTS: [BranchSlot; 2] = [
    BranchSlot {
        control: ControlName::Old,
        key: SelectionKey::FirstBranch,
    },
    BranchSlot {
        control: ControlName::New,
        key: SelectionKey::SecondBranch,
    },
];

/// Drives repo/branch picking and comparison launches.
///
/// Handlers take `&self` so a host can call them from re-entrant event
/// callbacks; all state lives behind `RefCell`s and is never borrowed across
/// an `.await`.
pub struct Workflow {
    cache: BranchCache,
    presets: PresetTable,
    store: Rc<dyn SelectionStore>,
    controls: Rc<dyn Controls>,
    sync: UrlSync,
    server: Url,
    state: RefCell<FlowState>,
    /// Branch values from the URL not yet overridden by the user
    pending: RefCell<[Option<String>; 2]>,
}

impl Workflow {
    pub fn new(
        cache: BranchCache,
        presets: PresetTable,
        store: Rc<dyn SelectionStore>,
        controls: Rc<dyn Controls>,
        sync: UrlSync,
        server: Url,
    ) -> Self {
        let pending = [sync.param(ControlName::Old), sync.param(ControlName::New)];
        Self {
            cache,
            presets,
            store,
            controls,
            sync,
            server,
            state: RefCell::new(FlowState::Idle),
            pending: RefCell::new(pending),
        }
    }

    pub fn state(&self) -> FlowState {
        self.state.borrow().clone()
    }

    /// Seed the controls from the URL, then pick up the repo (URL first,
    /// persisted second) and load its branches. `refresh` makes that first
    /// load bypass every cache.
    pub async fn start(&self, refresh: bool) -> Result<(), WorkflowError> {
        self.sync.init_controls(self.controls.as_ref());
        let repo = self
            .sync
            .param(ControlName::Repo)
            .or_else(|| self.store.get(SelectionKey::Repo));
        let loaded = match repo {
            Some(repo) if refresh => self.enter_repo(&repo, true).await,
            Some(repo) => self.select_repo(&repo).await,
            None => return Ok(()),
        };
        loaded.map(|_| ())
    }

    /// Repo control changed
    pub async fn select_repo(&self, repo: &str) -> Result<Rc<BranchList>, WorkflowError> {
        self.enter_repo(repo, false).await
    }

    async fn enter_repo(&self, repo: &str, force: bool) -> Result<Rc<BranchList>, WorkflowError> {
        self.persist(SelectionKey::Repo, repo);
        self.controls.control(ControlName::Repo).set(Some(repo));
        self.set_state(FlowState::RepoSelected {
            repo: repo.to_string(),
            error: None,
        });
        self.load_branches(repo, force).await
    }

    /// Re-fetch the current repo's branches, bypassing every cache.
    pub async fn refresh(&self) -> Result<Rc<BranchList>, WorkflowError> {
        let repo = self.state.borrow().repo().map(str::to_string);
        let repo = repo.ok_or(WorkflowError::NotReady)?;
        self.load_branches(&repo, true).await
    }

    /// First (old) branch control changed
    pub fn first_changed(&self, value: Option<&str>) {
        self.branch_changed(0, value);
    }

    /// Second (new) branch control changed
    pub fn second_changed(&self, value: Option<&str>) {
        self.branch_changed(1, value);
    }

    /// Build the comparison URL from the selected repo and branches and go.
    pub fn launch(&self) -> Result<Url, WorkflowError> {
        let repo = match &*self.state.borrow() {
            FlowState::BranchesReady { repo, .. } => repo.clone(),
            _ => return Err(WorkflowError::NotReady),
        };
        let old = self.selected(ControlName::Old).ok_or(WorkflowError::NotReady)?;
        let new = self.selected(ControlName::New).ok_or(WorkflowError::NotReady)?;
        let preset = self.presets.resolve(Some(&repo))?;

        let url = build_compare_url(&self.server, &preset, &old, &new)?;
        self.go(url)
    }

    /// One-click comparison of a pull request: refresh the repo's branches so
    /// both refs are known server-side, then compare base against head.
    pub async fn compare_change_request(
        &self,
        row: &ChangeRequestRow,
        repo: &str,
    ) -> Result<Url, WorkflowError> {
        if row.class.disabled {
            return Err(WorkflowError::DisabledChangeRequest(row.request.number));
        }
        let preset = self.presets.resolve(Some(repo))?;
        self.cache.load(repo, true).await?;

        let url = build_compare_url(
            &self.server,
            &preset,
            &row.request.base.ref_name,
            &row.request.head.ref_name,
        )?;
        self.go(url)
    }

    async fn load_branches(
        &self,
        repo: &str,
        force: bool,
    ) -> Result<Rc<BranchList>, WorkflowError> {
        self.set_state(FlowState::BranchesLoading {
            repo: repo.to_string(),
        });
        let result = self.cache.load(repo, force).await;

        // The user may have picked another repo while this was loading
        if self.state.borrow().repo() != Some(repo) {
            log::debug!("Dropping branch result for {}: repo changed", repo);
            return result.map_err(WorkflowError::from);
        }

        match result {
            Ok(branches) => {
                self.apply_branches(&branches);
                self.set_state(FlowState::BranchesReady {
                    repo: repo.to_string(),
                    branches: Rc::clone(&branches),
                });
                Ok(branches)
            }
            Err(e) => {
                self.set_state(FlowState::RepoSelected {
                    repo: repo.to_string(),
                    error: Some(e.to_string()),
                });
                Err(e.into())
            }
        }
    }

    /// Fill both branch controls and pick their values.
    fn apply_branches(&self, branches: &BranchList) {
        let names = branches.names();
        let pending = self.pending.borrow().clone();
        for (slot, from_url) in BRANCH_SLOTS.iter().zip(pending) {
            let control = self.controls.control(slot.control);
            control.set_options(&names);

            let persisted = self.store.get(slot.key);
            let choice = select_branch(branches, from_url.as_deref(), persisted.as_deref());
            log::debug!("{} → {:?} ({:?})", slot.control, choice.name, choice.tier);
            control.set(choice.name.as_deref());
            if let Some(name) = &choice.name {
                self.persist(slot.key, name);
            }
        }
    }

    fn branch_changed(&self, index: usize, value: Option<&str>) {
        let slot = &BRANCH_SLOTS[index];
        self.pending.borrow_mut()[index] = None;
        self.controls.control(slot.control).set(value);
        if let Some(value) = value.filter(|v| !v.is_empty()) {
            self.persist(slot.key, value);
        }
    }

    fn selected(&self, name: ControlName) -> Option<String> {
        self.controls.control(name).get().filter(|v| !v.is_empty())
    }

    fn go(&self, url: Url) -> Result<Url, WorkflowError> {
        log::info!("Opening: {}", url);
        self.sync.navigate(&url);
        self.set_state(FlowState::Launching { url: url.clone() });
        Ok(url)
    }

    fn set_state(&self, state: FlowState) {
        *self.state.borrow_mut() = state;
    }

    /// Selections are advisory; a failed write is logged, not fatal.
    fn persist(&self, key: SelectionKey, value: &str) {
        if let Err(e) = self.store.set(key, value) {
            log::warn!("Failed to persist {}: {:#}", key.as_str(), e);
        }
    }
}
