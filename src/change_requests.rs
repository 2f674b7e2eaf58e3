use crate::branches::{get_json, FetchError};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use url::Url;

/// Rows mentioning this are highlighted
pub const HIGHLIGHT_KEYWORD: &str = "weight";

/// Open pull requests fetched per listing
const PAGE_SIZE: &str = "30";

/// A GitHub pull request as returned by `GET /repos/{owner}/{repo}/pulls`
#[derive(Debug, Clone, Deserialize)]
pub struct ChangeRequest {
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    pub user: GitHubUser,
    pub head: GitRef,
    pub base: GitRef,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub html_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitHubUser {
    pub login: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitHubRepo {
    pub owner: GitHubUser,
}

/// One side of a pull request
#[derive(Debug, Clone, Deserialize)]
pub struct GitRef {
    #[serde(rename = "ref")]
    pub ref_name: String,
    #[serde(default)]
    pub user: Option<GitHubUser>,
    /// `null` when the source fork was deleted
    #[serde(default)]
    pub repo: Option<GitHubRepo>,
}

impl GitRef {
    fn owner(&self) -> Option<&str> {
        self.repo
            .as_ref()
            .map(|r| r.owner.login.as_str())
            .or_else(|| self.user.as_ref().map(|u| u.login.as_str()))
    }
}

impl ChangeRequest {
    pub fn author(&self) -> &str {
        &self.user.login
    }

    /// Owner of the repository the source branch lives in
    pub fn source_owner(&self) -> Option<&str> {
        self.head.owner()
    }

    fn mentions(&self, keyword: &str) -> bool {
        let body = self.body.as_deref().unwrap_or("");
        [
            self.title.as_str(),
            body,
            self.head.ref_name.as_str(),
            self.base.ref_name.as_str(),
        ]
        .iter()
        .any(|text| text.to_lowercase().contains(keyword))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RowClass {
    pub highlighted: bool,
    pub disabled: bool,
}

/// Disabled when the source branch lives outside `target_owner` (forks can't
/// be compared). Highlighted when it mentions weights and is not disabled.
pub fn classify(request: &ChangeRequest, target_owner: &str) -> RowClass {
    let disabled = request
        .source_owner()
        .map_or(true, |owner| !owner.eq_ignore_ascii_case(target_owner));
    RowClass {
        highlighted: !disabled && request.mentions(HIGHLIGHT_KEYWORD),
        disabled,
    }
}

#[derive(Debug, Clone)]
pub struct ChangeRequestRow {
    pub request: ChangeRequest,
    pub class: RowClass,
}

#[derive(Debug, Clone, Default)]
pub struct ChangeRequestList {
    pub rows: Vec<ChangeRequestRow>,
    pub highlighted: usize,
}

/// Classify and order requests, most recently updated first.
pub fn build_rows(mut requests: Vec<ChangeRequest>, target_owner: &str) -> ChangeRequestList {
    requests.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    let rows: Vec<ChangeRequestRow> = requests
        .into_iter()
        .map(|request| {
            let class = classify(&request, target_owner);
            ChangeRequestRow { request, class }
        })
        .collect();
    let highlighted = rows.iter().filter(|r| r.class.highlighted).count();
    ChangeRequestList { rows, highlighted }
}

// ── GitHub API ──

pub struct GitHubClient {
    client: reqwest::Client,
    api_url: Url,
}

impl GitHubClient {
    pub fn new(client: reqwest::Client, api_url: Url) -> Self {
        Self { client, api_url }
    }

    pub fn pulls_url(&self, owner: &str, repo: &str) -> Result<Url, FetchError> {
        let mut url = self.api_url.clone();
        url.path_segments_mut()
            .map_err(|_| FetchError::Http {
                url: self.api_url.to_string(),
                message: "API URL cannot be a base".to_string(),
            })?
            .pop_if_empty()
            .extend(["repos", owner, repo, "pulls"]);
        url.query_pairs_mut()
            .append_pair("state", "open")
            .append_pair("per_page", PAGE_SIZE)
            .append_pair("sort", "updated")
            .append_pair("direction", "desc");
        Ok(url)
    }

    /// Open pull requests of `owner/repo`, classified against `owner`.
    pub async fn list_open(
        &self,
        owner: &str,
        repo: &str,
    ) -> Result<ChangeRequestList, FetchError> {
        let url = self.pulls_url(owner, repo)?;
        let requests: Vec<ChangeRequest> = get_json(&self.client, url).await?;
        log::info!("Fetched {} open pull requests for {}/{}", requests.len(), owner, repo);
        Ok(build_rows(requests, owner))
    }
}
