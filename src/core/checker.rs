// src/core/checker.rs

//! Static syntax validation of a loaded script.
//!
//! The checker walks the section graph the way a build would: it starts at
//! `[Process]` and the interface sections, follows `Run`/`Exec`/`Loop` and
//! control references into other sections of the same script, and validates
//! every statement and control it passes. References into other script files
//! or through unexpanded variables cannot be resolved statically and are
//! skipped.

use std::collections::HashSet;

use crate::constants;
use crate::core::parser::{
    string_contains_variable, CondType, IfStatement, Statement, StatementKind, StatementParser,
};
use crate::core::script::Script;
use crate::core::section::{names, SectionType};
use crate::core::ui::{self, UIControlType, UIInfo};
use crate::models::{CompatOption, LogInfo, LogState};

/// Overall verdict of a check run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckState {
    Clean,
    Warning,
    Error,
}

#[derive(Debug)]
pub struct CheckResult {
    pub state: CheckState,
    pub logs: Vec<LogInfo>,
    /// Sections the walk reached.
    pub visited_sections: usize,
    /// Sections a complete walk could reach: code and interface sections.
    pub checkable_sections: usize,
}

impl CheckResult {
    /// Fraction of checkable sections the walk covered.
    pub fn coverage(&self) -> f64 {
        if self.checkable_sections == 0 {
            1.0
        } else {
            self.visited_sections as f64 / self.checkable_sections as f64
        }
    }
}

const INTERFACE_ELEMENTS: [&str; 9] = [
    "Text", "Visible", "PosX", "PosY", "Width", "Height", "Value", "ToolTip", "Items",
];

pub struct SyntaxChecker<'a> {
    script: &'a Script,
    compat: &'a CompatOption,
    visited: HashSet<String>,
    /// Sections whose existence is guarded by an enclosing
    /// `If,ExistSection` on this script; a missing target is not an error
    /// inside the guarded branch.
    guarded: HashSet<String>,
    logs: Vec<LogInfo>,
}

impl<'a> SyntaxChecker<'a> {
    pub fn new(script: &'a Script, compat: &'a CompatOption) -> Self {
        // Link scripts delegate validation to their resolved target.
        let script = script.link_target().unwrap_or(script);
        Self {
            script,
            compat,
            visited: HashSet::new(),
            guarded: HashSet::new(),
            logs: Vec::new(),
        }
    }

    pub fn check(mut self) -> CheckResult {
        if self.script.has_section(names::PROCESS) {
            self.check_code_section(names::PROCESS);
        }
        for name in self.script.interface_section_names() {
            self.check_interface_section(&name);
        }
        // Interface sections nothing references still get validated; code
        // sections stay untouched, they may be data for another script.
        let unvisited: Vec<String> = self
            .script
            .sections()
            .values()
            .filter(|s| {
                s.section_type() == SectionType::Interface
                    && !self.visited.contains(&s.name().to_lowercase())
            })
            .map(|s| s.name().to_string())
            .collect();
        for name in unvisited {
            self.check_interface_section(&name);
        }

        let checkable = self
            .script
            .sections()
            .values()
            .filter(|s| {
                matches!(
                    s.section_type(),
                    SectionType::Code | SectionType::Interface
                )
            })
            .count();
        let visited = self
            .script
            .sections()
            .values()
            .filter(|s| self.visited.contains(&s.name().to_lowercase()))
            .count();

        let state = if self.logs.iter().any(|l| l.state >= LogState::Error) {
            CheckState::Error
        } else if self.logs.iter().any(|l| l.state == LogState::Warning) {
            CheckState::Warning
        } else {
            CheckState::Clean
        };
        CheckResult {
            state,
            logs: self.logs,
            visited_sections: visited,
            checkable_sections: checkable,
        }
    }

    fn error(&mut self, message: String) {
        self.logs.push(LogInfo::new(LogState::Error, message));
    }

    fn warning(&mut self, message: String) {
        self.logs.push(LogInfo::new(LogState::Warning, message));
    }

    /// Whether a script-file argument names the script under check. Other
    /// files and variable-bearing paths are out of reach.
    fn refers_to_self(&self, script_file: &str) -> bool {
        script_file.eq_ignore_ascii_case(constants::SELF_SCRIPT_TOKEN)
    }

    // --- CODE SECTIONS ---

    fn check_code_section(&mut self, name: &str) {
        if !self.visited.insert(name.to_lowercase()) {
            return;
        }
        let Some(section) = self.script.section(name) else {
            return;
        };
        let Some(lines) = section.cached_lines().map(<[String]>::to_vec) else {
            return;
        };
        let parser = StatementParser::new(section, self.compat);
        let (stmts, parse_logs) = parser.parse_statements(&lines);
        self.logs.extend(parse_logs);
        self.check_statements(&stmts, name);
    }

    fn check_statements(&mut self, stmts: &[Statement], section_name: &str) {
        for stmt in stmts {
            self.check_statement(stmt, section_name);
        }
    }

    fn check_statement(&mut self, stmt: &Statement, section_name: &str) {
        match &stmt.kind {
            StatementKind::RunExec {
                script_file,
                section_name: target,
                ..
            }
            | StatementKind::Loop {
                break_loop: false,
                script_file,
                section_name: target,
                ..
            } => {
                self.check_section_ref(script_file, target, section_name, &stmt.raw, false);
            }
            StatementKind::AddInterface {
                script_file,
                section_name: target,
                ..
            } => {
                self.check_section_ref(script_file, target, section_name, &stmt.raw, true);
            }
            StatementKind::ReadInterface {
                element,
                script_file,
                section_name: target,
                key,
                ..
            }
            | StatementKind::WriteInterface {
                element,
                script_file,
                section_name: target,
                key,
                ..
            } => {
                self.check_interface_access(element, script_file, target, key, &stmt.raw);
            }
            StatementKind::IniWrite {
                file,
                section,
                key,
                value,
            } => {
                // Switching the active interface by writing `[Main]`
                // `Interface=` makes the named section reachable.
                if self.refers_to_self(file)
                    && section.eq_ignore_ascii_case(names::MAIN)
                    && key.eq_ignore_ascii_case("Interface")
                    && !string_contains_variable(value)
                {
                    self.check_section_ref(
                        constants::SELF_SCRIPT_TOKEN,
                        value,
                        section_name,
                        &stmt.raw,
                        true,
                    );
                }
            }
            StatementKind::If(if_stmt) => {
                let guard = self.section_guard(if_stmt);
                if let Some(guard) = &guard {
                    self.guarded.insert(guard.clone());
                }
                self.check_statements(&if_stmt.link, section_name);
                if let Some(guard) = guard {
                    self.guarded.remove(&guard);
                }
            }
            StatementKind::Else(else_stmt) => {
                self.check_statements(&else_stmt.link, section_name);
            }
            // Parse failures are already reported by the statement parser.
            _ => {}
        }
    }

    /// Detects `If,ExistSection,%ScriptFile%,<X>,...`: inside the branch a
    /// missing section `<X>` of this script is intentional, not an error.
    fn section_guard(&self, if_stmt: &IfStatement) -> Option<String> {
        let cond = &if_stmt.condition;
        if cond.cond_type == CondType::ExistSection
            && !cond.not
            && cond.args.len() == 2
            && self.refers_to_self(&cond.args[0])
            && !string_contains_variable(&cond.args[1])
        {
            Some(cond.args[1].to_lowercase())
        } else {
            None
        }
    }

    fn check_section_ref(
        &mut self,
        script_file: &str,
        target: &str,
        from: &str,
        raw: &str,
        interface: bool,
    ) {
        if !self.refers_to_self(script_file) || string_contains_variable(target) {
            return;
        }
        if !self.script.has_section(target) {
            if !self.guarded.contains(&target.to_lowercase()) {
                self.error(format!(
                    "section [{target}] does not exist (run from [{from}]) ({raw})"
                ));
            }
            return;
        }
        if interface {
            self.check_interface_section(target);
        } else {
            self.check_code_section(target);
        }
    }

    fn check_interface_access(
        &mut self,
        element: &str,
        script_file: &str,
        target: &str,
        key: &str,
        raw: &str,
    ) {
        if !INTERFACE_ELEMENTS
            .iter()
            .any(|e| e.eq_ignore_ascii_case(element))
        {
            self.error(format!("invalid interface element [{element}] ({raw})"));
        }
        if !self.refers_to_self(script_file) || string_contains_variable(target) {
            return;
        }
        let Some(section) = self.script.section(target) else {
            self.error(format!("section [{target}] does not exist ({raw})"));
            return;
        };
        let Some(lines) = section.cached_lines().map(<[String]>::to_vec) else {
            return;
        };
        let (controls, _) = ui::parse_interface(&lines, target);
        if !string_contains_variable(key)
            && !controls.iter().any(|c| c.key.eq_ignore_ascii_case(key))
        {
            self.error(format!(
                "section [{target}] has no control [{key}] ({raw})"
            ));
        }
        self.check_interface_section(target);
    }

    // --- INTERFACE SECTIONS ---

    fn check_interface_section(&mut self, name: &str) {
        if !self.visited.insert(name.to_lowercase()) {
            return;
        }
        let Some(section) = self.script.section(name) else {
            return;
        };
        let Some(lines) = section.cached_lines().map(<[String]>::to_vec) else {
            return;
        };
        let (controls, parse_logs) = ui::parse_interface(&lines, name);
        self.logs.extend(parse_logs);
        for control in &controls {
            self.check_control(control, name);
        }
    }

    fn check_control(&mut self, control: &ui::UIControl, section_name: &str) {
        let key = &control.key;
        match &control.info {
            UIInfo::CheckBox {
                section_name: run, ..
            }
            | UIInfo::RadioButton {
                section_name: run, ..
            }
            | UIInfo::ComboBox {
                section_name: run, ..
            }
            | UIInfo::RadioGroup {
                section_name: run, ..
            } => {
                if let Some(run) = run.clone() {
                    self.check_control_section(&run, key, section_name);
                }
                match &control.info {
                    UIInfo::ComboBox { index: None, .. } => {
                        self.warning(format!(
                            "ComboBox [{key}] must start with one of its items (section [{section_name}])"
                        ));
                    }
                    UIInfo::RadioGroup {
                        items, selected, ..
                    } if *selected >= items.len() => {
                        self.warning(format!(
                            "RadioGroup [{key}] has an out-of-range selected index [{selected}] (section [{section_name}])"
                        ));
                    }
                    _ => {}
                }
            }
            UIInfo::Button {
                section_name: run,
                picture,
                ..
            } => {
                self.check_control_section(&run.clone(), key, section_name);
                if let Some(picture) = picture.clone() {
                    self.check_resource(&picture, key, section_name);
                }
            }
            UIInfo::Image { url } => match url.clone() {
                Some(url) if is_url(&url) => self.check_url(&url, key, section_name),
                _ => {
                    // The image itself travels as an attachment named after
                    // the control's text.
                    let resource = control.text.clone();
                    if !resource.is_empty() && !string_contains_variable(&resource) {
                        self.check_resource(&resource, key, section_name);
                    }
                }
            },
            UIInfo::TextFile => {
                let resource = control.text.clone();
                if !resource.is_empty() && !string_contains_variable(&resource) {
                    self.check_resource(&resource, key, section_name);
                }
            }
            UIInfo::WebLabel { url } => {
                self.check_url(&url.clone(), key, section_name);
                if !self.compat.ignore_width_of_web_label
                    && control.width < control.text.chars().count() as i32
                {
                    self.warning(format!(
                        "WebLabel [{key}] is too narrow for its text (section [{section_name}])"
                    ));
                }
            }
            UIInfo::FileBox {
                select_file,
                filter,
                ..
            } => {
                if let Some(filter) = filter {
                    if !*select_file {
                        // Folder selection has nothing to filter.
                        self.warning(format!(
                            "FileBox [{key}] selects a directory, its filter has no effect (section [{section_name}])"
                        ));
                    }
                    // A filter is `Name|Pattern` pairs joined by `|`, so the
                    // separator count must be odd.
                    if filter.matches('|').count() % 2 == 0 {
                        self.warning(format!(
                            "FileBox [{key}] has a malformed filter [{filter}] (section [{section_name}])"
                        ));
                    }
                }
            }
            _ => {}
        }
    }

    fn check_control_section(&mut self, run: &str, key: &str, section_name: &str) {
        if string_contains_variable(run) {
            return;
        }
        if self.script.has_section(run) {
            self.check_code_section(run);
        } else {
            self.error(format!(
                "section [{run}] referenced by control [{key}] does not exist (section [{section_name}])"
            ));
        }
    }

    fn check_resource(&mut self, resource: &str, key: &str, section_name: &str) {
        if !self.script.contains_interface_resource(resource) {
            self.warning(format!(
                "resource [{resource}] of control [{key}] is not attached (section [{section_name}])"
            ));
        }
    }

    fn check_url(&mut self, url: &str, key: &str, section_name: &str) {
        if !is_url(url) {
            self.warning(format!(
                "control [{key}] has an invalid url [{url}] (section [{section_name}])"
            ));
        }
    }
}

fn is_url(s: &str) -> bool {
    let lowered = s.to_ascii_lowercase();
    lowered.starts_with("http://")
        || lowered.starts_with("https://")
        || lowered.starts_with("ftp://")
}
