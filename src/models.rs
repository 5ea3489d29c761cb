// src/models.rs

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use crate::core::ini;

// --- DIAGNOSTICS ---
// Engine operations never print. They return `Vec<LogInfo>` and let the caller
// decide where the messages go (build log, UI, test assertions).

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogState {
    Success,
    Info,
    Warning,
    Error,
    CriticalError,
}

impl fmt::Display for LogState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Success => "Success",
            Self::Info => "Info",
            Self::Warning => "Warning",
            Self::Error => "Error",
            Self::CriticalError => "CriticalError",
        };
        write!(f, "{s}")
    }
}

/// One diagnostic message produced by an engine operation.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LogInfo {
    pub state: LogState,
    pub message: String,
    /// Nesting depth for hierarchical build logs. 0 = top level.
    pub depth: u32,
}

impl LogInfo {
    pub fn new(state: LogState, message: impl Into<String>) -> Self {
        Self {
            state,
            message: message.into(),
            depth: 0,
        }
    }

    pub fn with_depth(state: LogState, message: impl Into<String>, depth: u32) -> Self {
        Self {
            state,
            message: message.into(),
            depth,
        }
    }
}

impl fmt::Display for LogInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.state, self.message)
    }
}

// --- SCRIPT DISCOVERY ---

/// A script located during project-root scanning, before it is parsed.
///
/// `real_path` is where the file lives on disk; `tree_path` is its position in
/// the project tree (they differ for directory-linked scripts). Identity is
/// case-insensitive on both paths, matching the on-disk semantics of the
/// script format's original platform.
#[derive(Debug, Clone)]
pub struct ScriptParseInfo {
    pub real_path: PathBuf,
    pub tree_path: PathBuf,
    pub is_dir: bool,
    pub is_dir_link: bool,
}

impl ScriptParseInfo {
    /// Case-insensitive identity key, used for deduplication.
    pub fn dedup_key(&self) -> (String, String, bool, bool) {
        (
            path_key(&self.real_path),
            path_key(&self.tree_path),
            self.is_dir,
            self.is_dir_link,
        )
    }
}

impl PartialEq for ScriptParseInfo {
    fn eq(&self, other: &Self) -> bool {
        self.is_dir == other.is_dir
            && self.is_dir_link == other.is_dir_link
            && path_eq_ignore_case(&self.real_path, &other.real_path)
            && path_eq_ignore_case(&self.tree_path, &other.tree_path)
    }
}

impl Eq for ScriptParseInfo {}

/// Lowercased string form of a path, for case-insensitive map keys.
pub fn path_key(path: &Path) -> String {
    path.to_string_lossy().to_lowercase()
}

pub fn path_eq_ignore_case(a: &Path, b: &Path) -> bool {
    path_key(a) == path_key(b)
}

/// Scripts written on the format's original platform carry backslash paths.
/// Forward slashes work everywhere we run, so normalize to them.
pub fn normalize_separators(s: &str) -> String {
    s.replace('\\', "/")
}

// --- SELECTION STATE ---

/// Tri-state checkbox value of a script in the project tree.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelectedState {
    True,
    False,
    #[default]
    None,
}

impl SelectedState {
    pub fn parse(s: &str) -> Self {
        if s.eq_ignore_ascii_case("True") {
            Self::True
        } else if s.eq_ignore_ascii_case("False") {
            Self::False
        } else {
            Self::None
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::True => "True",
            Self::False => "False",
            Self::None => "None",
        }
    }
}

// --- COMPATIBILITY OPTIONS ---

/// Per-project compatibility switches, loaded from `compat.ini`.
///
/// Only the flags this crate acts on are modeled; the file may carry more keys
/// and they are preserved on disk (the loader never rewrites the file).
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompatOption {
    /// Emulate the historic wildcard bug in directory-link expansion: a
    /// wildcard link collects the immediate subdirectories of its parent
    /// instead of the matching directory itself.
    pub asterisk_bug_dir_link: bool,
    /// Accept legacy `NotExistFile`-style negated branch conditions.
    pub legacy_branch_condition: bool,
    /// Allow a single drive letter as a loop start/end bound.
    pub allow_letter_in_loop: bool,
    /// Ignore the width field of WebLabel controls when validating.
    pub ignore_width_of_web_label: bool,
}

const COMPAT_SECTION: &str = "Compat";

impl CompatOption {
    /// Loads options from an ini file. A missing file or section yields the
    /// defaults (all off).
    pub fn from_file(path: &Path) -> io::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let dict = match ini::parse_ini_section_to_dict(path, COMPAT_SECTION)? {
            Some(dict) => dict,
            None => return Ok(Self::default()),
        };
        let flag = |key: &str| {
            ini::get_ci(&dict, key).is_some_and(|v| v.eq_ignore_ascii_case("True"))
        };
        Ok(Self {
            asterisk_bug_dir_link: flag("AsteriskBugDirLink"),
            legacy_branch_condition: flag("LegacyBranchCondition"),
            allow_letter_in_loop: flag("AllowLetterInLoop"),
            ignore_width_of_web_label: flag("IgnoreWidthOfWebLabel"),
        })
    }

    /// Writes the modeled flags back to an ini file.
    pub fn to_file(&self, path: &Path) -> io::Result<()> {
        let flags = [
            ("AsteriskBugDirLink", self.asterisk_bug_dir_link),
            ("LegacyBranchCondition", self.legacy_branch_condition),
            ("AllowLetterInLoop", self.allow_letter_in_loop),
            ("IgnoreWidthOfWebLabel", self.ignore_width_of_web_label),
        ];
        for (key, value) in flags {
            let value = if value { "True" } else { "False" };
            ini::write_key(path, COMPAT_SECTION, key, value)?;
        }
        Ok(())
    }
}
