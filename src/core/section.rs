// src/core/section.rs

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

use crate::core::ini;

/// Reserved section names and name prefixes.
pub mod names {
    pub const MAIN: &str = "Main";
    pub const VARIABLES: &str = "Variables";
    pub const INTERFACE: &str = "Interface";
    pub const PROCESS: &str = "Process";
    pub const ENCODED_FOLDERS: &str = "EncodedFolders";
    pub const AUTHOR_ENCODED: &str = "AuthorEncoded";
    pub const INTERFACE_ENCODED: &str = "InterfaceEncoded";
    pub const ENCODED_FILE_PREFIX: &str = "EncodedFile-";
    pub const ENCODED_FILE_INTERFACE_PREFIX: &str = "EncodedFile-InterfaceEncoded-";
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionType {
    /// Could not be classified while splitting; resolved after the full pass.
    NotInspected,
    Main,
    Variables,
    Interface,
    Code,
    AttachFolderList,
    AttachFileList,
    AttachEncodeNow,
    /// Attachment payload. Skipped at script load, read only on demand.
    AttachEncodeLazy,
}

impl SectionType {
    /// Whether sections of this type get their lines read at script load.
    pub fn load_at_script_load(self) -> bool {
        !matches!(self, Self::AttachEncodeLazy)
    }
}

/// One `[Name]` section of a script.
///
/// Lines are stored lazily: sections loaded at script-load time carry them
/// in memory, attachment payloads are fetched on demand, and `unload` drops
/// content back to the just-metadata state. The owning script is referenced
/// by path, not by pointer, so sections serialize cleanly into the cache.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ScriptSection {
    script_path: PathBuf,
    name: String,
    section_type: SectionType,
    /// 0-based line index of the `[Name]` header in the script file.
    line_idx: usize,
    lines: Option<Vec<String>>,
    #[serde(skip)]
    ini_dict: Option<HashMap<String, String>>,
}

impl ScriptSection {
    pub fn new(
        script_path: PathBuf,
        name: String,
        section_type: SectionType,
        lines: Option<Vec<String>>,
        line_idx: usize,
    ) -> Self {
        Self {
            script_path,
            name,
            section_type,
            line_idx,
            lines,
            ini_dict: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn section_type(&self) -> SectionType {
        self.section_type
    }

    pub fn line_idx(&self) -> usize {
        self.line_idx
    }

    pub fn script_path(&self) -> &Path {
        &self.script_path
    }

    pub fn is_loaded(&self) -> bool {
        self.lines.is_some()
    }

    /// Promotes a `NotInspected` section to its resolved type. Returns false
    /// when the section was already classified.
    pub fn resolve_type(&mut self, section_type: SectionType) -> bool {
        if self.section_type != SectionType::NotInspected {
            return false;
        }
        self.section_type = section_type;
        true
    }

    /// Reads the section's lines from disk into memory.
    ///
    /// Returns false when the section no longer exists in the file.
    pub fn load_lines(&mut self) -> io::Result<bool> {
        match ini::parse_raw_section(&self.script_path, &self.name)? {
            Some(lines) => {
                self.lines = Some(lines);
                self.ini_dict = None;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// The section's lines, loading them on first access.
    pub fn lines(&mut self) -> io::Result<&[String]> {
        if self.lines.is_none() && !self.load_lines()? {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!(
                    "section [{}] not found in [{}]",
                    self.name,
                    self.script_path.display()
                ),
            ));
        }
        Ok(self.lines.as_deref().unwrap_or_default())
    }

    /// The lines already held in memory, if any. Never touches the disk.
    pub fn cached_lines(&self) -> Option<&[String]> {
        self.lines.as_deref()
    }

    /// Drops line and dict content, returning the section to metadata-only
    /// state. The next `lines()` call re-reads from disk.
    pub fn unload(&mut self) {
        self.lines = None;
        self.ini_dict = None;
    }

    pub fn reload(&mut self) -> io::Result<bool> {
        self.unload();
        self.load_lines()
    }

    /// Ini-style dict view of the section, built once and cached until the
    /// lines change.
    pub fn ini_dict(&mut self) -> io::Result<&HashMap<String, String>> {
        if self.ini_dict.is_none() {
            let lines = self.lines()?;
            let dict = ini::parse_ini_lines_ini_style(lines.iter().map(String::as_str));
            self.ini_dict = Some(dict);
        }
        Ok(self.ini_dict.get_or_insert_with(HashMap::new))
    }

    /// Updates (or appends) `key=value` in the in-memory lines. Returns false
    /// when the section content is not memory-backed.
    pub fn update_ini_key(&mut self, key: &str, value: &str) -> bool {
        let Some(lines) = self.lines.as_mut() else {
            return false;
        };
        self.ini_dict = None;
        for line in lines.iter_mut() {
            let trimmed = line.trim();
            if ini::is_comment(trimmed) {
                continue;
            }
            if let Some((k, _)) = trimmed.split_once('=') {
                if k.trim().eq_ignore_ascii_case(key) {
                    *line = format!("{key}={value}");
                    return true;
                }
            }
        }
        lines.push(format!("{key}={value}"));
        true
    }

    /// Deletes `key` from the in-memory lines. Returns false when the key is
    /// absent or the content is not memory-backed.
    pub fn delete_ini_key(&mut self, key: &str) -> bool {
        let Some(lines) = self.lines.as_mut() else {
            return false;
        };
        let before = lines.len();
        lines.retain(|line| {
            let trimmed = line.trim();
            if ini::is_comment(trimmed) {
                return true;
            }
            trimmed
                .split_once('=')
                .map_or(true, |(k, _)| !k.trim().eq_ignore_ascii_case(key))
        });
        if lines.len() == before {
            return false;
        }
        self.ini_dict = None;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use tempfile::NamedTempFile;

    fn fixture() -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "[Main]\nTitle=Demo\nLevel=5\n\n[Process]\nEcho,Hi\n").unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_lazy_load_and_unload_cycle() {
        // --- Setup ---
        let file = fixture();
        let mut section = ScriptSection::new(
            file.path().to_path_buf(),
            "Process".to_string(),
            SectionType::Code,
            None,
            4,
        );
        assert!(!section.is_loaded());

        // --- Execute ---
        let lines = section.lines().unwrap().to_vec();

        // --- Assert ---
        assert_eq!(lines, vec!["Echo,Hi".to_string()]);
        assert!(section.is_loaded());
        section.unload();
        assert!(!section.is_loaded());
        assert_eq!(section.lines().unwrap(), ["Echo,Hi".to_string()]);
    }

    #[test]
    fn test_lines_errors_when_section_vanished() {
        let file = fixture();
        let mut section = ScriptSection::new(
            file.path().to_path_buf(),
            "Gone".to_string(),
            SectionType::Code,
            None,
            0,
        );
        assert!(section.lines().is_err());
    }

    #[test]
    fn test_ini_dict_is_rebuilt_after_update() {
        // --- Setup ---
        let file = fixture();
        let mut section = ScriptSection::new(
            file.path().to_path_buf(),
            "Main".to_string(),
            SectionType::Main,
            None,
            0,
        );
        assert_eq!(section.ini_dict().unwrap()["Title"], "Demo");

        // --- Execute ---
        assert!(section.update_ini_key("Title", "Renamed"));
        assert!(section.update_ini_key("Selected", "True"));

        // --- Assert ---
        let dict = section.ini_dict().unwrap();
        assert_eq!(dict["Title"], "Renamed");
        assert_eq!(dict["Selected"], "True");
        assert_eq!(ini::get_ci(dict, "level").unwrap(), "5");
    }

    #[test]
    fn test_update_and_delete_require_loaded_content() {
        let file = fixture();
        let mut section = ScriptSection::new(
            file.path().to_path_buf(),
            "Main".to_string(),
            SectionType::Main,
            None,
            0,
        );
        // Not memory-backed yet.
        assert!(!section.update_ini_key("Title", "X"));
        assert!(!section.delete_ini_key("Title"));

        section.load_lines().unwrap();
        assert!(section.delete_ini_key("Level"));
        assert!(!section.delete_ini_key("Level"));
    }

    #[test]
    fn test_resolve_type_only_from_not_inspected() {
        let file = fixture();
        let mut section = ScriptSection::new(
            file.path().to_path_buf(),
            "Process".to_string(),
            SectionType::NotInspected,
            None,
            4,
        );
        assert!(section.resolve_type(SectionType::Code));
        assert!(!section.resolve_type(SectionType::Interface));
        assert_eq!(section.section_type(), SectionType::Code);
    }
}
