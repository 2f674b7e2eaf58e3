use crate::controls::{ControlName, Controls};
use crate::presets::{CompareMethod, ParameterPreset, Unit};
use std::rc::Rc;
use thiserror::Error;
use url::Url;

/// Path of the server-rendered comparison view
pub const COMPARE_PATH: &str = "/compare";

/// Performs the actual page navigation.
pub trait Navigator {
    fn navigate(&self, url: &Url);
}

/// Keeps the page controls and the query string in step: controls are seeded
/// from the URL, and a control change navigates to the URL with that one
/// parameter replaced.
pub struct UrlSync {
    page: Url,
    navigator: Rc<dyn Navigator>,
}

impl UrlSync {
    pub fn new(page: Url, navigator: Rc<dyn Navigator>) -> Self {
        Self { page, navigator }
    }

    /// Decoded query value, or `default` when missing or empty.
    pub fn read_param(&self, name: &str, default: &str) -> String {
        read_param(&self.page, name).unwrap_or_else(|| default.to_string())
    }

    pub fn param(&self, name: ControlName) -> Option<String> {
        read_param(&self.page, name.as_str())
    }

    /// Where `redirect` would go. `None` for a missing or empty value.
    pub fn redirect_target(&self, name: &str, value: Option<&str>) -> Option<Url> {
        let value = value.filter(|v| !v.is_empty())?;
        Some(with_param(&self.page, name, value))
    }

    /// Navigate to the current URL with `name` set to `value`. Missing or
    /// empty values are dropped with a warning.
    pub fn redirect(&self, name: &str, value: Option<&str>) {
        match self.redirect_target(name, value) {
            Some(target) => {
                log::info!("Redirecting to: {}", target);
                self.navigate(&target);
            }
            None => log::warn!("redirect: invalid value {:?} for {}", value, name),
        }
    }

    /// The side-effecting half of every launch and redirect.
    pub fn navigate(&self, url: &Url) {
        self.navigator.navigate(url);
    }

    /// Put every value present in the query string into its control.
    pub fn init_controls(&self, controls: &dyn Controls) {
        for name in ControlName::ALL {
            if let Some(value) = self.param(name) {
                controls.control(name).set(Some(&value));
            }
        }
    }

    /// Change handler for a control: the new value goes into the URL.
    pub fn on_change(&self, name: ControlName, value: Option<&str>) {
        self.redirect(name.as_str(), value);
    }
}

pub fn read_param(url: &Url, name: &str) -> Option<String> {
    url.query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
        .filter(|v| !v.is_empty())
}

/// `url` with `name` replaced (first occurrence, duplicates removed) or
/// appended. All other parameters keep their order.
pub fn with_param(url: &Url, name: &str, value: &str) -> Url {
    let mut pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
    let mut replaced = false;
    pairs.retain_mut(|(k, v)| {
        if k != name {
            return true;
        }
        if replaced {
            return false;
        }
        *v = value.to_string();
        replaced = true;
        true
    });
    if !replaced {
        pairs.push((name.to_string(), value.to_string()));
    }

    let mut target = url.clone();
    target.query_pairs_mut().clear().extend_pairs(pairs);
    target
}

// ── Comparison URL ──

/// Everything a comparison launch carries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompareRequest {
    pub preset: ParameterPreset,
    pub old: String,
    pub new: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompareUrlError {
    #[error("Not a comparison URL: {0}")]
    WrongPath(String),
    #[error("Missing query parameter: {0}")]
    Missing(&'static str),
    #[error("Invalid value '{value}' for {name}")]
    Invalid { name: &'static str, value: String },
}

/// The one way to build a comparison URL: the full preset plus both refs.
pub fn build_compare_url(
    base: &Url,
    preset: &ParameterPreset,
    old: &str,
    new: &str,
) -> Result<Url, url::ParseError> {
    let mut url = base.join(COMPARE_PATH)?;
    {
        let mut query = url.query_pairs_mut();
        query.clear();
        for (name, value) in preset.query_pairs() {
            query.append_pair(name, &value);
        }
        query.append_pair("old", old).append_pair("new", new);
    }
    Ok(url)
}

pub fn parse_compare_url(url: &Url) -> Result<CompareRequest, CompareUrlError> {
    if url.path() != COMPARE_PATH {
        return Err(CompareUrlError::WrongPath(url.to_string()));
    }
    let required = |name: &'static str| {
        url.query_pairs()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
            .ok_or(CompareUrlError::Missing(name))
    };
    fn parsed<T: std::str::FromStr>(
        name: &'static str,
        value: String,
    ) -> Result<T, CompareUrlError> {
        value
            .parse()
            .map_err(|_| CompareUrlError::Invalid { name, value })
    }

    let preset = ParameterPreset {
        repo: required("repo")?,
        threshold: parsed("threshold", required("threshold")?)?,
        path_pattern: required("path_pattern")?,
        method: parsed::<CompareMethod>("method", required("method")?)?,
        ignore_errors: parsed("ignore_errors", required("ignore_errors")?)?,
        unit: parsed::<Unit>("unit", required("unit")?)?,
    };
    Ok(CompareRequest {
        preset,
        old: required("old")?,
        new: required("new")?,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::controls::MemoryControls;
    use crate::presets::PresetTable;
    use std::cell::RefCell;

    #[derive(Default)]
    pub(crate) struct RecordingNavigator {
        pub visited: RefCell<Vec<Url>>,
    }

    impl Navigator for RecordingNavigator {
        fn navigate(&self, url: &Url) {
            self.visited.borrow_mut().push(url.clone());
        }
    }

    fn sync_at(page: &str) -> (UrlSync, Rc<RecordingNavigator>) {
        let navigator = Rc::new(RecordingNavigator::default());
        let sync = UrlSync::new(Url::parse(page).unwrap(), navigator.clone());
        (sync, navigator)
    }

    #[test]
    fn read_param_decodes_and_defaults() {
        let (sync, _) = sync_at("http://host/compare?old=feature%2Fx&new=&repo=polkadot-sdk");
        assert_eq!(sync.read_param("old", "master"), "feature/x");
        assert_eq!(sync.read_param("new", "master"), "master");
        assert_eq!(sync.read_param("unit", "time"), "time");
        assert_eq!(sync.read_param("repo", ""), "polkadot-sdk");
    }

    #[test]
    fn redirect_replaces_one_param_and_keeps_the_rest() {
        let (sync, nav) = sync_at("http://host/compare?repo=a&old=x&new=y&old=dup#row-3");
        sync.redirect("old", Some("release/1.0"));

        let visited = nav.visited.borrow();
        assert_eq!(visited.len(), 1);
        let target = &visited[0];
        assert_eq!(target.path(), "/compare");
        let pairs: Vec<(String, String)> = target.query_pairs().into_owned().collect();
        assert_eq!(
            pairs,
            [
                ("repo".to_string(), "a".to_string()),
                ("old".to_string(), "release/1.0".to_string()),
                ("new".to_string(), "y".to_string()),
            ]
        );
    }

    #[test]
    fn redirect_appends_missing_param() {
        let (sync, nav) = sync_at("http://host/compare?repo=a");
        sync.on_change(ControlName::IgnoreErrors, Some("false"));
        assert_eq!(
            nav.visited.borrow()[0].query(),
            Some("repo=a&ignore_errors=false")
        );
    }

    #[test]
    fn redirect_with_empty_value_does_nothing() {
        let (sync, nav) = sync_at("http://host/compare?old=x");
        sync.redirect("old", Some(""));
        sync.redirect("old", None);
        assert!(nav.visited.borrow().is_empty());
        assert_eq!(sync.redirect_target("old", Some("")), None);
    }

    #[test]
    fn init_controls_seeds_from_query() {
        let (sync, _) =
            sync_at("http://host/compare?repo=polkadot-sdk&threshold=5&method=base&old=");
        let controls = MemoryControls::new();
        sync.init_controls(&controls);
        assert_eq!(controls.get(ControlName::Repo).as_deref(), Some("polkadot-sdk"));
        assert_eq!(controls.get(ControlName::Threshold).as_deref(), Some("5"));
        assert_eq!(controls.get(ControlName::Method).as_deref(), Some("base"));
        assert_eq!(controls.get(ControlName::Old), None);
    }

    #[test]
    fn compare_url_round_trips() {
        let preset = PresetTable::builtin().resolve(Some("polkadot-sdk")).unwrap();
        let base = Url::parse("https://weights.example.org/some/page?x=1").unwrap();
        let old = "release/v1.0 & hotfix+1";
        let new = "oty/weight#update";

        let url = build_compare_url(&base, &preset, old, new).unwrap();
        assert_eq!(url.path(), "/compare");
        assert!(url.as_str().starts_with(
            "https://weights.example.org/compare?repo=polkadot-sdk&threshold=10&path_pattern="
        ));

        let request = parse_compare_url(&url).unwrap();
        assert_eq!(request.preset, preset);
        assert_eq!(request.old, old);
        assert_eq!(request.new, new);
    }

    #[test]
    fn parse_compare_url_rejects_bad_input() {
        let url = Url::parse("http://host/branches?repo=a").unwrap();
        assert!(matches!(parse_compare_url(&url), Err(CompareUrlError::WrongPath(_))));

        let url = Url::parse("http://host/compare?repo=a&threshold=10").unwrap();
        assert_eq!(
            parse_compare_url(&url),
            Err(CompareUrlError::Missing("path_pattern"))
        );

        let url = Url::parse(
            "http://host/compare?repo=a&threshold=ten&path_pattern=x&method=base&ignore_errors=true&unit=time&old=a&new=b",
        )
        .unwrap();
        assert!(matches!(
            parse_compare_url(&url),
            Err(CompareUrlError::Invalid { name: "threshold", .. })
        ));
    }
}
