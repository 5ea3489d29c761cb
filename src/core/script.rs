// src/core/script.rs

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::core::ini;
use crate::core::parser;
use crate::core::section::{names, ScriptSection, SectionType};
use crate::models::{path_key, SelectedState};

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("script [{0}] does not exist")]
    PathNotFound(PathBuf),
    #[error("[{0}] is invalid, please add a [Main] section")]
    MissingMainSection(PathBuf),
    #[error("[{0}] is invalid, please check the [Main] section")]
    InvalidMainSection(PathBuf),
    #[error("link script [{0}] has no Link key in its [Main] section")]
    MissingLinkKey(PathBuf),
    #[error("tree path [{0}] is already owned by another script")]
    TreePathCollision(PathBuf),
    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptType {
    Script,
    Link,
    Directory,
}

/// A parsed script: its sections, `[Main]` metadata and tree placement.
///
/// Scripts serialize into the on-disk cache; tree placement and link state
/// are skipped and reassigned by the project loader after deserialization.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Script {
    script_type: ScriptType,
    real_path: PathBuf,
    #[serde(skip)]
    tree_path: PathBuf,
    is_main_script: bool,
    ignore_main: bool,
    /// Keyed by lowercased section name; `ScriptSection::name` keeps case.
    sections: HashMap<String, ScriptSection>,
    /// Ini-style view of `[Main]`, keys in original case.
    main_info: HashMap<String, String>,
    title: String,
    author: String,
    description: String,
    version: String,
    level: i32,
    selected: SelectedState,
    mandatory: bool,
    /// Extra interface section names from `[Main] InterfaceList=`.
    interface_list: Vec<String>,
    #[serde(skip)]
    link: Option<Box<Script>>,
    #[serde(skip)]
    link_loaded: bool,
    #[serde(skip)]
    is_dir_link: bool,
}

impl Script {
    /// Loads and parses a script or link file from disk.
    ///
    /// `level` overrides `[Main] Level=` when given (directory links inherit
    /// the level of the link descriptor's location).
    pub fn load(
        script_type: ScriptType,
        real_path: &Path,
        tree_path: &Path,
        level: Option<i32>,
        is_main_script: bool,
        ignore_main: bool,
        is_dir_link: bool,
    ) -> Result<Self, ScriptError> {
        if script_type == ScriptType::Directory {
            return Ok(Self::directory(
                real_path,
                tree_path,
                level.unwrap_or(0),
                is_dir_link,
            ));
        }
        if !real_path.is_file() {
            return Err(ScriptError::PathNotFound(real_path.to_path_buf()));
        }

        let mut script = Self {
            script_type,
            real_path: real_path.to_path_buf(),
            tree_path: tree_path.to_path_buf(),
            is_main_script,
            ignore_main,
            sections: HashMap::new(),
            main_info: HashMap::new(),
            title: String::new(),
            author: String::new(),
            description: String::new(),
            version: String::new(),
            level: level.unwrap_or(0),
            selected: SelectedState::None,
            mandatory: false,
            interface_list: Vec::new(),
            link: None,
            link_loaded: false,
            is_dir_link,
        };
        script.sections = script.parse_sections()?;
        script.read_main_section(level)?;
        script.resolve_not_inspected();
        Ok(script)
    }

    /// Synthesizes a directory node of the script tree. Never touches disk.
    pub fn directory(real_path: &Path, tree_path: &Path, level: i32, is_dir_link: bool) -> Self {
        let name = tree_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let main_lines = vec![
            format!("Title={name}"),
            format!("Description=[Directory] {name}"),
            format!("Level={level}"),
        ];
        let main = ScriptSection::new(
            real_path.to_path_buf(),
            names::MAIN.to_string(),
            SectionType::Main,
            Some(main_lines.clone()),
            0,
        );
        let main_info =
            ini::parse_ini_lines_ini_style(main_lines.iter().map(String::as_str));
        let mut sections = HashMap::new();
        sections.insert(names::MAIN.to_lowercase(), main);
        Self {
            script_type: ScriptType::Directory,
            real_path: real_path.to_path_buf(),
            tree_path: tree_path.to_path_buf(),
            is_main_script: false,
            ignore_main: false,
            sections,
            main_info,
            description: format!("[Directory] {name}"),
            title: name,
            author: String::new(),
            version: String::new(),
            level,
            selected: SelectedState::None,
            mandatory: false,
            interface_list: Vec::new(),
            link: None,
            link_loaded: false,
            is_dir_link,
        }
    }

    fn parse_sections(&self) -> Result<HashMap<String, ScriptSection>, ScriptError> {
        let lines = ini::read_file_lines(&self.real_path)?;
        let mut sections = HashMap::new();
        let mut current: Option<(String, usize, Vec<String>)> = None;

        let finalize =
            |sections: &mut HashMap<String, ScriptSection>,
             (name, line_idx, mut body): (String, usize, Vec<String>)| {
                while body.first().is_some_and(|l| l.is_empty()) {
                    body.remove(0);
                }
                while body.last().is_some_and(|l| l.is_empty()) {
                    body.pop();
                }
                let section_type = Self::detect_initial_type(&name);
                let body = if section_type.load_at_script_load() {
                    Some(body)
                } else {
                    None
                };
                let section = ScriptSection::new(
                    self.real_path.clone(),
                    name.clone(),
                    section_type,
                    body,
                    line_idx,
                );
                sections.insert(name.to_lowercase(), section);
            };

        for (idx, line) in lines.iter().enumerate() {
            if let Some(name) = ini::section_header(line) {
                if let Some(prev) = current.take() {
                    finalize(&mut sections, prev);
                }
                current = Some((name.to_string(), idx, Vec::new()));
            } else if let Some((_, _, body)) = current.as_mut() {
                body.push(line.trim().to_string());
            }
        }
        if let Some(prev) = current.take() {
            finalize(&mut sections, prev);
        }
        Ok(sections)
    }

    /// Classification possible from the name alone; everything else starts as
    /// `NotInspected` and is resolved after `[Main]` has been read.
    fn detect_initial_type(name: &str) -> SectionType {
        if name.eq_ignore_ascii_case(names::MAIN) {
            SectionType::Main
        } else if name.eq_ignore_ascii_case(names::VARIABLES) {
            SectionType::Variables
        } else if name.eq_ignore_ascii_case(names::INTERFACE) {
            SectionType::Interface
        } else if name.eq_ignore_ascii_case(names::ENCODED_FOLDERS) {
            SectionType::AttachFolderList
        } else if name.eq_ignore_ascii_case(names::AUTHOR_ENCODED)
            || name.eq_ignore_ascii_case(names::INTERFACE_ENCODED)
        {
            SectionType::AttachFileList
        } else if name
            .to_ascii_lowercase()
            .starts_with(&names::ENCODED_FILE_INTERFACE_PREFIX.to_ascii_lowercase())
        {
            SectionType::AttachEncodeNow
        } else if name
            .to_ascii_lowercase()
            .starts_with(&names::ENCODED_FILE_PREFIX.to_ascii_lowercase())
        {
            SectionType::AttachEncodeLazy
        } else {
            SectionType::NotInspected
        }
    }

    fn read_main_section(&mut self, level_override: Option<i32>) -> Result<(), ScriptError> {
        let main_key = names::MAIN.to_lowercase();
        let main_dict = self
            .sections
            .get(&main_key)
            .and_then(ScriptSection::cached_lines)
            .map(|lines| ini::parse_ini_lines_ini_style(lines.iter().map(String::as_str)));

        match self.script_type {
            ScriptType::Script if !self.ignore_main => {
                let dict = main_dict
                    .ok_or_else(|| ScriptError::MissingMainSection(self.real_path.clone()))?;
                if ini::get_ci(&dict, "Title").is_none() {
                    return Err(ScriptError::InvalidMainSection(self.real_path.clone()));
                }
                self.main_info = dict;
            }
            ScriptType::Link => {
                let dict = main_dict
                    .ok_or_else(|| ScriptError::MissingMainSection(self.real_path.clone()))?;
                if ini::get_ci(&dict, "Link").is_none() {
                    return Err(ScriptError::MissingLinkKey(self.real_path.clone()));
                }
                self.main_info = dict;
            }
            _ => {
                self.main_info = main_dict.unwrap_or_default();
            }
        }

        let get = |key: &str| ini::get_ci(&self.main_info, key).cloned();
        self.title = get("Title").unwrap_or_else(|| {
            self.real_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        });
        self.author = get("Author").unwrap_or_default();
        self.description = get("Description").unwrap_or_default();
        self.version = get("Version").unwrap_or_else(|| "0".to_string());
        self.level = level_override.unwrap_or_else(|| {
            get("Level").and_then(|v| v.trim().parse().ok()).unwrap_or(0)
        });
        self.selected = get("Selected")
            .map(|v| SelectedState::parse(&v))
            .unwrap_or(SelectedState::None);
        self.mandatory = get("Mandatory").is_some_and(|v| v.eq_ignore_ascii_case("True"));
        self.interface_list = self.parse_interface_list();
        Ok(())
    }

    fn parse_interface_list(&self) -> Vec<String> {
        let Some(raw) = ini::get_ci(&self.main_info, "InterfaceList") else {
            return Vec::new();
        };
        let args = match parser::split_arguments(raw) {
            Ok(args) => args,
            Err(e) => {
                log::warn!(
                    "invalid InterfaceList in [{}]: {e}",
                    self.real_path.display()
                );
                return Vec::new();
            }
        };
        let mut list = Vec::new();
        for name in args {
            if self.sections.contains_key(&name.to_lowercase()) {
                list.push(name);
            } else {
                log::warn!(
                    "InterfaceList names missing section [{name}] in [{}]",
                    self.real_path.display()
                );
            }
        }
        list
    }

    /// Resolves every `NotInspected` section using the information only
    /// available after the whole file has been split: the interface list and
    /// the `[EncodedFolders]` membership.
    fn resolve_not_inspected(&mut self) {
        let interface_names: HashSet<String> = self
            .interface_section_names()
            .into_iter()
            .map(|n| n.to_lowercase())
            .collect();
        let encoded_folders: HashSet<String> = self
            .sections
            .get(&names::ENCODED_FOLDERS.to_lowercase())
            .and_then(ScriptSection::cached_lines)
            .map(|lines| {
                lines
                    .iter()
                    .map(|l| l.trim())
                    .filter(|l| !l.is_empty() && !ini::is_comment(l))
                    .map(str::to_lowercase)
                    .collect()
            })
            .unwrap_or_default();

        for (key, section) in &mut self.sections {
            if section.section_type() != SectionType::NotInspected {
                continue;
            }
            let resolved = if interface_names.contains(key) {
                SectionType::Interface
            } else if encoded_folders.contains(key) {
                SectionType::AttachFileList
            } else {
                SectionType::Code
            };
            section.resolve_type(resolved);
        }
    }

    // --- ACCESSORS (link-aware where the target's content should show) ---

    fn target(&self) -> &Self {
        match (&self.link, self.link_loaded) {
            (Some(link), true) => link,
            _ => self,
        }
    }

    pub fn script_type(&self) -> ScriptType {
        self.script_type
    }

    pub fn real_path(&self) -> &Path {
        &self.real_path
    }

    pub fn tree_path(&self) -> &Path {
        &self.tree_path
    }

    pub fn set_tree_path(&mut self, tree_path: PathBuf) {
        self.tree_path = tree_path;
    }

    pub fn is_main_script(&self) -> bool {
        self.is_main_script
    }

    pub fn is_dir_link(&self) -> bool {
        self.is_dir_link
    }

    pub fn set_is_dir_link(&mut self, is_dir_link: bool) {
        self.is_dir_link = is_dir_link;
    }

    pub fn title(&self) -> &str {
        &self.target().title
    }

    pub fn author(&self) -> &str {
        &self.target().author
    }

    pub fn description(&self) -> &str {
        &self.target().description
    }

    pub fn version(&self) -> &str {
        &self.target().version
    }

    /// Tree level. Belongs to the tree entry, so never delegated to a link
    /// target.
    pub fn level(&self) -> i32 {
        self.level
    }

    pub fn selected(&self) -> SelectedState {
        self.selected
    }

    pub fn mandatory(&self) -> bool {
        self.mandatory
    }

    pub fn main_info(&self) -> &HashMap<String, String> {
        &self.target().main_info
    }

    pub fn sections(&self) -> &HashMap<String, ScriptSection> {
        &self.target().sections
    }

    pub fn has_section(&self, name: &str) -> bool {
        self.sections().contains_key(&name.to_lowercase())
    }

    pub fn section(&self, name: &str) -> Option<&ScriptSection> {
        self.sections().get(&name.to_lowercase())
    }

    pub fn section_mut(&mut self, name: &str) -> Option<&mut ScriptSection> {
        let key = name.to_lowercase();
        if self.link_loaded {
            if let Some(link) = self.link.as_mut() {
                return link.sections.get_mut(&key);
            }
        }
        self.sections.get_mut(&key)
    }

    /// The script's interface section names: the `[Main] Interface=` entry
    /// (default `Interface`) plus the `InterfaceList` additions.
    pub fn interface_section_names(&self) -> Vec<String> {
        let this = self.target();
        let primary = ini::get_ci(&this.main_info, "Interface")
            .cloned()
            .unwrap_or_else(|| names::INTERFACE.to_string());
        let mut seen: HashSet<String> = HashSet::new();
        let mut out = Vec::new();
        for name in std::iter::once(primary).chain(this.interface_list.iter().cloned()) {
            if seen.insert(name.to_lowercase()) {
                out.push(name);
            }
        }
        out
    }

    /// The primary interface section name (`[Main] Interface=`, default
    /// `Interface`).
    pub fn interface_section_name(&self) -> String {
        ini::get_ci(&self.target().main_info, "Interface")
            .cloned()
            .unwrap_or_else(|| names::INTERFACE.to_string())
    }

    /// Whether an interface-attached resource named `file_name` exists,
    /// either listed in `[InterfaceEncoded]` or as an attachment section.
    pub fn contains_interface_resource(&self, file_name: &str) -> bool {
        let this = self.target();
        let listed = this
            .sections
            .get(&names::INTERFACE_ENCODED.to_lowercase())
            .and_then(ScriptSection::cached_lines)
            .map(|lines| ini::parse_ini_lines_ini_style(lines.iter().map(String::as_str)))
            .is_some_and(|dict| ini::get_ci(&dict, file_name).is_some());
        listed
            || this.sections.contains_key(
                &format!("{}{}", names::ENCODED_FILE_INTERFACE_PREFIX, file_name)
                    .to_lowercase(),
            )
    }

    // --- LINK STATE ---

    pub fn link_loaded(&self) -> bool {
        self.link_loaded
    }

    pub fn link_target(&self) -> Option<&Self> {
        self.link.as_deref()
    }

    pub(crate) fn set_link(&mut self, target: Self) {
        self.link = Some(Box::new(target));
        self.link_loaded = true;
    }

    /// Case-insensitive identity, used for cache dedup.
    pub fn identity_key(&self) -> (String, String) {
        (path_key(&self.real_path), path_key(&self.tree_path))
    }

    // --- MUTATION ---

    /// Sets the tri-state selection, writing through to the in-memory
    /// `[Main]` lines and the file. No-op when unchanged or `None`-tristate
    /// scripts gain a state for the first time through the UI layer.
    pub fn set_selected(&mut self, state: SelectedState) -> io::Result<bool> {
        if self.selected == state {
            return Ok(false);
        }
        self.selected = state;
        self.main_info
            .retain(|k, _| !k.eq_ignore_ascii_case("Selected"));
        self.main_info
            .insert("Selected".to_string(), state.as_str().to_string());
        if let Some(main) = self.sections.get_mut(&names::MAIN.to_lowercase()) {
            main.update_ini_key("Selected", state.as_str());
        }
        ini::write_key(&self.real_path, names::MAIN, "Selected", state.as_str())?;
        Ok(true)
    }

    /// Re-reads one section from disk. A section that appeared since the
    /// last load is added; returns false when it does not exist in the file.
    pub fn refresh_section(&mut self, name: &str) -> io::Result<bool> {
        let key = name.to_lowercase();
        if let Some(section) = self.sections.get_mut(&key) {
            return section.reload();
        }
        match ini::parse_raw_section(&self.real_path, name)? {
            Some(lines) => {
                let section_type = Self::detect_initial_type(name);
                let section = ScriptSection::new(
                    self.real_path.clone(),
                    name.to_string(),
                    section_type,
                    section_type.load_at_script_load().then_some(lines),
                    0,
                );
                self.sections.insert(key, section);
                self.resolve_not_inspected();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Re-parses the whole file, replacing every section and the `[Main]`
    /// metadata. Link state and tree placement survive.
    pub fn refresh_sections(&mut self) -> Result<(), ScriptError> {
        let fresh = Self::load(
            self.script_type,
            &self.real_path,
            &self.tree_path,
            None,
            self.is_main_script,
            self.ignore_main,
            self.is_dir_link,
        )?;
        let link = self.link.take();
        let link_loaded = self.link_loaded;
        *self = fresh;
        self.link = link;
        self.link_loaded = link_loaded;
        Ok(())
    }
}
