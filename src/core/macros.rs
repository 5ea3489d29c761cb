// src/core/macros.rs

//! The macro table.
//!
//! A project's main script opts into macros through its `[Variables]`
//! section: `%API%` points at the macro library script and `%APIVAR%` names
//! the section whose `Name=Command` entries become the global macro dict.
//! Ini-style keys of the main script's `[Variables]` are permanent macros,
//! imported last so they override the library.

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::core::ini;
use crate::core::parser::{Statement, StatementParser};
use crate::core::script::Script;
use crate::core::section::{names, ScriptSection};
use crate::core::variables::{Variables, VarsType};
use crate::models::{normalize_separators, path_eq_ignore_case, CompatOption, LogInfo, LogState};

lazy_static! {
    static ref MACRO_NAME_RE: Regex = Regex::new(r"^[A-Za-z0-9_]+$").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacroType {
    Global,
    Local,
}

#[derive(Debug, Clone)]
pub struct MacroTable {
    macro_enabled: bool,
    main_script_path: PathBuf,
    macro_script_path: Option<PathBuf>,
    macro_section_name: Option<String>,
    /// Keys keep their original case; lookups are case-insensitive.
    global_dict: HashMap<String, Statement>,
    local_dict: HashMap<String, Statement>,
}

impl MacroTable {
    /// Builds the macro table for a project.
    ///
    /// `main_script` is the project's main script and `all_scripts` the
    /// loaded script list the `%API%` path is resolved against. Failures
    /// leave macros disabled and are reported as diagnostics, never as hard
    /// errors: a project without macros is a valid project.
    pub fn new(
        main_script: &Script,
        all_scripts: &[Script],
        variables: &mut Variables,
        compat: &CompatOption,
    ) -> (Self, Vec<LogInfo>) {
        let mut logs = Vec::new();
        let mut table = Self {
            macro_enabled: false,
            main_script_path: main_script.real_path().to_path_buf(),
            macro_script_path: None,
            macro_section_name: None,
            global_dict: HashMap::new(),
            local_dict: HashMap::new(),
        };

        let Some(lines) = main_script
            .section(names::VARIABLES)
            .and_then(ScriptSection::cached_lines)
        else {
            logs.push(LogInfo::new(LogState::Info, "Macro not defined"));
            return (table, logs);
        };
        let var_dict = ini::parse_ini_lines_var_style(lines.iter().map(String::as_str));
        let (Some(api), Some(api_var)) = (
            ini::get_ci(&var_dict, "API").cloned(),
            ini::get_ci(&var_dict, "APIVAR").cloned(),
        ) else {
            logs.push(LogInfo::new(LogState::Info, "Macro not defined"));
            return (table, logs);
        };

        variables.set_value(VarsType::Global, "API", &api);
        let api_path = PathBuf::from(normalize_separators(&variables.expand(&api)));
        let Some(macro_script) = all_scripts
            .iter()
            .find(|sc| path_eq_ignore_case(sc.real_path(), &api_path))
        else {
            logs.push(LogInfo::new(
                LogState::Error,
                format!(
                    "Macro defined but unable to find macro script [{}]",
                    api_path.display()
                ),
            ));
            return (table, logs);
        };
        let Some(macro_section) = macro_script.section(&api_var) else {
            logs.push(LogInfo::new(
                LogState::Error,
                format!("Macro defined but unable to find macro section [{api_var}]"),
            ));
            return (table, logs);
        };

        table.macro_enabled = true;
        table.macro_script_path = Some(macro_script.real_path().to_path_buf());
        table.macro_section_name = Some(api_var.clone());

        if let Some(vars_section) = macro_script.section(names::VARIABLES) {
            logs.extend(variables.add_variables(VarsType::Global, vars_section));
        }
        logs.extend(table.load_macro_dict(MacroType::Global, macro_section, false, compat));

        // Permanent macros: ini-style keys of the main script's [Variables].
        let permanent = ini::parse_ini_lines_ini_style(lines.iter().map(String::as_str));
        let main_vars_section = main_script.section(names::VARIABLES);
        for (name, command) in permanent {
            if !MACRO_NAME_RE.is_match(&name) {
                logs.push(LogInfo::new(
                    LogState::Error,
                    format!("Invalid macro name [{name}]"),
                ));
                continue;
            }
            let Some(section) = main_vars_section else {
                continue;
            };
            let parser = StatementParser::new(section, compat);
            match parser.parse_statement(&command) {
                Ok(stmt) => {
                    dict_insert(&mut table.global_dict, &name, stmt);
                }
                Err(e) => logs.push(LogInfo::new(
                    LogState::Error,
                    format!("Invalid macro [{name}]: {e}"),
                )),
            }
        }

        (table, logs)
    }

    pub fn macro_enabled(&self) -> bool {
        self.macro_enabled
    }

    pub fn macro_script_path(&self) -> Option<&Path> {
        self.macro_script_path.as_deref()
    }

    pub fn macro_section_name(&self) -> Option<&str> {
        self.macro_section_name.as_deref()
    }

    pub fn global_dict(&self) -> &HashMap<String, Statement> {
        &self.global_dict
    }

    pub fn local_dict(&self) -> &HashMap<String, Statement> {
        &self.local_dict
    }

    /// Lookup across both dicts, local first.
    pub fn get(&self, name: &str) -> Option<&Statement> {
        ini::get_ci(&self.local_dict, name).or_else(|| ini::get_ci(&self.global_dict, name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn reset_local_dict(&mut self) {
        self.local_dict.clear();
    }

    /// Imports `Name=Command` entries of a section into one of the dicts.
    pub fn load_macro_dict(
        &mut self,
        macro_type: MacroType,
        section: &ScriptSection,
        append: bool,
        compat: &CompatOption,
    ) -> Vec<LogInfo> {
        let mut logs = Vec::new();
        let Some(lines) = section.cached_lines() else {
            logs.push(LogInfo::new(
                LogState::Error,
                format!("section [{}] is not loaded", section.name()),
            ));
            return logs;
        };
        let entries = ini::parse_ini_lines_ini_style(lines.iter().map(String::as_str));
        let parser = StatementParser::new(section, compat);

        let dict = match macro_type {
            MacroType::Global => &mut self.global_dict,
            MacroType::Local => &mut self.local_dict,
        };
        if !append {
            dict.clear();
        }
        for (name, command) in entries {
            if !MACRO_NAME_RE.is_match(&name) {
                logs.push(LogInfo::new(
                    LogState::Error,
                    format!("Invalid macro name [{name}]"),
                ));
                continue;
            }
            match parser.parse_statement(&command) {
                Ok(stmt) => {
                    logs.push(LogInfo::with_depth(
                        LogState::Success,
                        format!("Macro [{name}] set to [{command}]"),
                        1,
                    ));
                    dict_insert(dict, &name, stmt);
                }
                Err(e) => logs.push(LogInfo::new(
                    LogState::Error,
                    format!("Invalid macro [{name}]: {e}"),
                )),
            }
        }
        logs
    }

    /// Defines or deletes one macro.
    ///
    /// `command = None` deletes. Permanent macros are persisted into the main
    /// script's `[Variables]`; a persistence failure is reported but the
    /// in-memory dict is still updated.
    pub fn set_macro(
        &mut self,
        name: &str,
        command: Option<&str>,
        section: &ScriptSection,
        compat: &CompatOption,
        global: bool,
        permanent: bool,
    ) -> LogInfo {
        if !MACRO_NAME_RE.is_match(name) {
            return LogInfo::new(LogState::Error, format!("Invalid macro name [{name}]"));
        }

        match command {
            Some(command) => {
                let parser = StatementParser::new(section, compat);
                let stmt = match parser.parse_statement(command) {
                    Ok(stmt) => stmt,
                    Err(e) => {
                        return LogInfo::new(
                            LogState::Error,
                            format!("Invalid macro command [{command}]: {e}"),
                        )
                    }
                };
                if permanent {
                    dict_insert(&mut self.global_dict, name, stmt);
                    match ini::write_key(&self.main_script_path, names::VARIABLES, name, command)
                    {
                        Ok(()) => LogInfo::new(
                            LogState::Success,
                            format!("Permanent Macro [{name}] set to [{command}]"),
                        ),
                        Err(e) => LogInfo::new(
                            LogState::Error,
                            format!(
                                "Unable to write macro [{name}] into [{}]: {e}",
                                self.main_script_path.display()
                            ),
                        ),
                    }
                } else if global {
                    dict_insert(&mut self.global_dict, name, stmt);
                    LogInfo::new(
                        LogState::Success,
                        format!("Global Macro [{name}] set to [{command}]"),
                    )
                } else {
                    dict_insert(&mut self.local_dict, name, stmt);
                    LogInfo::new(
                        LogState::Success,
                        format!("Local Macro [{name}] set to [{command}]"),
                    )
                }
            }
            None => {
                if permanent {
                    if !dict_remove(&mut self.global_dict, name) {
                        return LogInfo::new(
                            LogState::Error,
                            format!("Permanent Macro [{name}] not found"),
                        );
                    }
                    match ini::delete_key(&self.main_script_path, names::VARIABLES, name) {
                        Ok(_) => LogInfo::new(
                            LogState::Success,
                            format!("Permanent Macro [{name}] deleted"),
                        ),
                        Err(e) => LogInfo::new(
                            LogState::Error,
                            format!(
                                "Unable to delete macro [{name}] from [{}]: {e}",
                                self.main_script_path.display()
                            ),
                        ),
                    }
                } else if global {
                    if dict_remove(&mut self.global_dict, name) {
                        LogInfo::new(LogState::Success, format!("Global Macro [{name}] deleted"))
                    } else {
                        LogInfo::new(LogState::Error, format!("Global Macro [{name}] not found"))
                    }
                } else if dict_remove(&mut self.local_dict, name) {
                    LogInfo::new(LogState::Success, format!("Local Macro [{name}] deleted"))
                } else {
                    LogInfo::new(LogState::Error, format!("Local Macro [{name}] not found"))
                }
            }
        }
    }
}

fn dict_insert(dict: &mut HashMap<String, Statement>, name: &str, stmt: Statement) {
    dict.retain(|k, _| !k.eq_ignore_ascii_case(name));
    dict.insert(name.to_string(), stmt);
}

fn dict_remove(dict: &mut HashMap<String, Statement>, name: &str) -> bool {
    let before = dict.len();
    dict.retain(|k, _| !k.eq_ignore_ascii_case(name));
    dict.len() != before
}
