// src/core/variables.rs

use lazy_static::lazy_static;
use regex::{Captures, Regex};
use std::collections::HashMap;

use crate::core::ini;
use crate::core::section::ScriptSection;
use crate::models::{LogInfo, LogState};

lazy_static! {
    static ref EXPAND_RE: Regex = Regex::new(r"%([^\s%]+)%").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarsType {
    Global,
    Local,
}

/// Two-tier `%Var%` table. Locals shadow globals on expansion.
///
/// Deliberately slim: full variable semantics belong to the execution
/// engine. The loader needs set/get/expand and `[Variables]` ingestion.
#[derive(Debug, Clone, Default)]
pub struct Variables {
    global: HashMap<String, String>,
    local: HashMap<String, String>,
}

impl Variables {
    pub fn new(base_dir: &str) -> Self {
        let mut vars = Self::default();
        vars.set_value(VarsType::Global, "BaseDir", base_dir);
        vars
    }

    pub fn set_value(&mut self, vars_type: VarsType, key: &str, value: &str) {
        let dict = match vars_type {
            VarsType::Global => &mut self.global,
            VarsType::Local => &mut self.local,
        };
        dict.retain(|k, _| !k.eq_ignore_ascii_case(key));
        dict.insert(key.to_string(), value.to_string());
    }

    pub fn get_value(&self, vars_type: VarsType, key: &str) -> Option<&str> {
        let dict = match vars_type {
            VarsType::Global => &self.global,
            VarsType::Local => &self.local,
        };
        ini::get_ci(dict, key).map(String::as_str)
    }

    /// Lookup across both tiers, local first.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.get_value(VarsType::Local, key)
            .or_else(|| self.get_value(VarsType::Global, key))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn delete(&mut self, vars_type: VarsType, key: &str) -> bool {
        let dict = match vars_type {
            VarsType::Global => &mut self.global,
            VarsType::Local => &mut self.local,
        };
        let before = dict.len();
        dict.retain(|k, _| !k.eq_ignore_ascii_case(key));
        dict.len() != before
    }

    /// Replaces every known `%Var%` in `s`. Unknown references stay as-is.
    pub fn expand(&self, s: &str) -> String {
        EXPAND_RE
            .replace_all(s, |caps: &Captures<'_>| {
                let key = &caps[1];
                self.get(key)
                    .map_or_else(|| caps[0].to_string(), str::to_string)
            })
            .into_owned()
    }

    pub fn reset_local(&mut self) {
        self.local.clear();
    }

    /// Ingests a `[Variables]` section (var-style `%Key%=Value` lines).
    pub fn add_variables(
        &mut self,
        vars_type: VarsType,
        section: &ScriptSection,
    ) -> Vec<LogInfo> {
        let mut logs = Vec::new();
        let Some(lines) = section.cached_lines() else {
            logs.push(LogInfo::new(
                LogState::Error,
                format!("section [{}] is not loaded", section.name()),
            ));
            return logs;
        };
        let dict = ini::parse_ini_lines_var_style(lines.iter().map(String::as_str));
        for (key, value) in dict {
            logs.push(LogInfo::with_depth(
                LogState::Success,
                format!("Var [%{key}%] set to [{value}]"),
                1,
            ));
            self.set_value(vars_type, &key, &value);
        }
        logs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::section::SectionType;
    use std::path::PathBuf;

    #[test]
    fn test_local_shadows_global() {
        let mut vars = Variables::new("/base");
        vars.set_value(VarsType::Global, "Target", "global");
        vars.set_value(VarsType::Local, "Target", "local");
        assert_eq!(vars.get("Target"), Some("local"));
        assert_eq!(vars.get_value(VarsType::Global, "target"), Some("global"));
    }

    #[test]
    fn test_expand_replaces_known_and_keeps_unknown() {
        let mut vars = Variables::new("/base");
        vars.set_value(VarsType::Global, "Tools", "%BaseDir%/Tools");
        assert_eq!(vars.expand("%BaseDir%/Projects"), "/base/Projects");
        assert_eq!(vars.expand("%Missing%/x"), "%Missing%/x");
    }

    #[test]
    fn test_add_variables_from_section() {
        let section = ScriptSection::new(
            PathBuf::from("/s.script"),
            "Variables".to_string(),
            SectionType::Variables,
            Some(vec![
                "%API%=Lib.script".to_string(),
                "Plain=skipped".to_string(),
            ]),
            0,
        );
        let mut vars = Variables::new("/base");
        let logs = vars.add_variables(VarsType::Global, &section);
        assert_eq!(logs.len(), 1);
        assert_eq!(vars.get("API"), Some("Lib.script"));
        assert!(!vars.contains("Plain"));
    }

    #[test]
    fn test_set_value_is_case_insensitive_replace() {
        let mut vars = Variables::default();
        vars.set_value(VarsType::Global, "Key", "1");
        vars.set_value(VarsType::Global, "KEY", "2");
        assert_eq!(vars.get("key"), Some("2"));
    }
}
