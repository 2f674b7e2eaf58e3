use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Logical names of the page controls. The string form doubles as the query
/// parameter name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlName {
    Repo,
    Threshold,
    PathPattern,
    Old,
    New,
    Unit,
    Method,
    IgnoreErrors,
}

impl ControlName {
    pub const ALL: [ControlName; 8] = [
        ControlName::Repo,
        ControlName::Threshold,
        ControlName::PathPattern,
        ControlName::Old,
        ControlName::New,
        ControlName::Unit,
        ControlName::Method,
        ControlName::IgnoreErrors,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ControlName::Repo => "repo",
            ControlName::Threshold => "threshold",
            ControlName::PathPattern => "path_pattern",
            ControlName::Old => "old",
            ControlName::New => "new",
            ControlName::Unit => "unit",
            ControlName::Method => "method",
            ControlName::IgnoreErrors => "ignore_errors",
        }
    }
}

impl fmt::Display for ControlName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ControlName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| format!("Unknown control: {}", s))
    }
}

/// One selector, input box or checkbox. Checkboxes use "true"/"false".
pub trait Control {
    fn get(&self) -> Option<String>;
    fn set(&self, value: Option<&str>);
    /// Replace the selectable options. Inputs and checkboxes ignore this.
    fn set_options(&self, _options: &[String]) {}
}

/// Lookup of every control on the page by logical name
pub trait Controls {
    fn control(&self, name: ControlName) -> &dyn Control;
}

// ── In-memory controls ──

#[derive(Debug, Default)]
pub struct MemoryControl {
    value: RefCell<Option<String>>,
    options: RefCell<Vec<String>>,
}

impl MemoryControl {
    pub fn options(&self) -> Vec<String> {
        self.options.borrow().clone()
    }
}

impl Control for MemoryControl {
    fn get(&self) -> Option<String> {
        self.value.borrow().clone()
    }

    fn set(&self, value: Option<&str>) {
        *self.value.borrow_mut() = value.map(str::to_string);
    }

    fn set_options(&self, options: &[String]) {
        *self.options.borrow_mut() = options.to_vec();
        // A select can't keep a value that is no longer offered
        let mut value = self.value.borrow_mut();
        if value.as_ref().is_some_and(|v| !options.contains(v)) {
            *value = None;
        }
    }
}

/// Controls that live only in memory. Used by the CLI as its "page".
pub struct MemoryControls {
    controls: HashMap<ControlName, MemoryControl>,
}

impl Default for MemoryControls {
    fn default() -> Self {
        Self {
            controls: ControlName::ALL
                .into_iter()
                .map(|n| (n, MemoryControl::default()))
                .collect(),
        }
    }
}

impl MemoryControls {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: ControlName) -> Option<String> {
        self.control(name).get()
    }

    pub fn options(&self, name: ControlName) -> Vec<String> {
        self.controls.get(&name).map(MemoryControl::options).unwrap_or_default()
    }
}

impl Controls for MemoryControls {
    fn control(&self, name: ControlName) -> &dyn Control {
        // Every name is inserted by `default`
        &self.controls[&name]
    }
}
