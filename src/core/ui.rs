// src/core/ui.rs

//! Interface-section controls.
//!
//! Each control is one ini line: `Key=Text,Visibility,Type,X,Y,W,H[,...]`.
//! The seven leading fields are mandatory; the tail is type-specific, with an
//! optional trailing `__Tooltip` argument. A line with an odd number of
//! double quotes continues on the next line.

use serde::{Deserialize, Serialize};

use crate::core::ini;
use crate::core::parser::{self, ParseError};
use crate::models::{LogInfo, LogState};

/// Wire numbers are part of the format and never change.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum UIControlType {
    TextBox = 0,
    TextLabel = 1,
    NumberBox = 2,
    CheckBox = 3,
    ComboBox = 4,
    Image = 5,
    TextFile = 6,
    Button = 8,
    WebLabel = 10,
    RadioButton = 11,
    Bevel = 12,
    FileBox = 13,
    RadioGroup = 14,
}

impl UIControlType {
    pub fn from_num(num: i64) -> Option<Self> {
        match num {
            0 => Some(Self::TextBox),
            1 => Some(Self::TextLabel),
            2 => Some(Self::NumberBox),
            3 => Some(Self::CheckBox),
            4 => Some(Self::ComboBox),
            5 => Some(Self::Image),
            6 => Some(Self::TextFile),
            8 => Some(Self::Button),
            10 => Some(Self::WebLabel),
            11 => Some(Self::RadioButton),
            12 => Some(Self::Bevel),
            13 => Some(Self::FileBox),
            14 => Some(Self::RadioGroup),
            _ => None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum UIInfo {
    TextBox {
        value: String,
    },
    TextLabel {
        font_size: u32,
        style: Option<String>,
    },
    NumberBox {
        value: i64,
        min: i64,
        max: i64,
        tick: i64,
    },
    CheckBox {
        checked: bool,
        section_name: Option<String>,
        show_progress: bool,
    },
    ComboBox {
        items: Vec<String>,
        /// Position of `Text` inside `items`; `None` when the shown value is
        /// not one of the items.
        index: Option<usize>,
        section_name: Option<String>,
        show_progress: bool,
    },
    Image {
        url: Option<String>,
    },
    TextFile,
    Button {
        section_name: String,
        picture: Option<String>,
        show_progress: bool,
    },
    WebLabel {
        url: String,
    },
    RadioButton {
        selected: bool,
        section_name: Option<String>,
        show_progress: bool,
    },
    Bevel,
    FileBox {
        select_file: bool,
        title: Option<String>,
        filter: Option<String>,
    },
    RadioGroup {
        items: Vec<String>,
        selected: usize,
        section_name: Option<String>,
        show_progress: bool,
    },
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct UIControl {
    pub key: String,
    pub text: String,
    pub visibility: bool,
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
    pub control_type: UIControlType,
    pub info: UIInfo,
    pub tooltip: Option<String>,
    /// 0-based index of the line inside the section body.
    pub line_idx: usize,
}

/// Parses an interface section body. Malformed controls and duplicate keys
/// degrade to diagnostics; well-formed controls still come back.
pub fn parse_interface(lines: &[String], section_name: &str) -> (Vec<UIControl>, Vec<LogInfo>) {
    let mut controls: Vec<UIControl> = Vec::new();
    let mut logs = Vec::new();

    let mut i = 0;
    while i < lines.len() {
        let line_idx = i;
        let mut raw = lines[i].trim().to_string();
        if raw.is_empty() || ini::is_comment(&raw) {
            i += 1;
            continue;
        }
        // Odd quote count: the control continues on the next line.
        while raw.matches('"').count() % 2 == 1 && i + 1 < lines.len() {
            i += 1;
            raw.push_str(lines[i].trim());
        }
        i += 1;

        let Some((key, value)) = raw.split_once('=') else {
            logs.push(LogInfo::new(
                LogState::Error,
                format!("control has no key ({raw}) (section [{section_name}])"),
            ));
            continue;
        };
        let key = key.trim();
        if controls.iter().any(|c| c.key.eq_ignore_ascii_case(key)) {
            logs.push(LogInfo::new(
                LogState::Warning,
                format!("duplicated key [{key}] (section [{section_name}])"),
            ));
            continue;
        }
        match parse_control(key, value, line_idx) {
            Ok(control) => controls.push(control),
            Err(e) => logs.push(LogInfo::new(
                LogState::Error,
                format!("{e} (control [{key}] of section [{section_name}])"),
            )),
        }
    }
    (controls, logs)
}

fn parse_control(key: &str, value: &str, line_idx: usize) -> Result<UIControl, ParseError> {
    let args = parser::split_arguments(value)?;
    if args.len() < 7 {
        return Err(ParseError::Syntax(format!(
            "a control must have at least 7 fields ({value})"
        )));
    }

    let text = args[0].clone();
    let visibility = args[1] == "1" || args[1].eq_ignore_ascii_case("True");
    let type_num: i64 = args[2]
        .trim()
        .parse()
        .map_err(|_| ParseError::Syntax(format!("invalid control type [{}]", args[2])))?;
    let control_type = UIControlType::from_num(type_num)
        .ok_or_else(|| ParseError::Syntax(format!("unknown control type [{type_num}]")))?;
    let coord = |idx: usize| -> Result<i32, ParseError> {
        args[idx]
            .trim()
            .parse()
            .map_err(|_| ParseError::Syntax(format!("invalid coordinate [{}]", args[idx])))
    };
    let (x, y, width, height) = (coord(3)?, coord(4)?, coord(5)?, coord(6)?);

    let mut rest: Vec<String> = args[7..].to_vec();
    let tooltip = match rest.last() {
        Some(last) if last.starts_with("__") => rest.pop().map(|t| t[2..].to_string()),
        _ => None,
    };

    let info = parse_info(control_type, &text, &rest, value)?;
    Ok(UIControl {
        key: key.to_string(),
        text,
        visibility,
        x,
        y,
        width,
        height,
        control_type,
        info,
        tooltip,
        line_idx,
    })
}

fn parse_info(
    control_type: UIControlType,
    text: &str,
    rest: &[String],
    raw: &str,
) -> Result<UIInfo, ParseError> {
    let int = |s: &String| -> Result<i64, ParseError> {
        s.trim()
            .parse()
            .map_err(|_| ParseError::Syntax(format!("invalid number [{s}] ({raw})")))
    };

    Ok(match control_type {
        UIControlType::TextBox => UIInfo::TextBox {
            value: rest.first().cloned().unwrap_or_default(),
        },
        UIControlType::TextLabel => {
            let font_size = rest
                .first()
                .map(|s| {
                    s.trim().parse::<u32>().map_err(|_| {
                        ParseError::Syntax(format!("invalid font size [{s}] ({raw})"))
                    })
                })
                .transpose()?
                .unwrap_or(8);
            UIInfo::TextLabel {
                font_size,
                style: rest.get(1).cloned(),
            }
        }
        UIControlType::NumberBox => {
            if rest.len() < 4 {
                return Err(ParseError::Syntax(format!(
                    "NumberBox requires value, min, max and tick ({raw})"
                )));
            }
            UIInfo::NumberBox {
                value: int(&rest[0])?,
                min: int(&rest[1])?,
                max: int(&rest[2])?,
                tick: int(&rest[3])?,
            }
        }
        UIControlType::CheckBox => {
            let checked = rest
                .first()
                .is_some_and(|v| v.eq_ignore_ascii_case("True"));
            let (section_name, show_progress, _) = section_suffix(&rest[1.min(rest.len())..]);
            UIInfo::CheckBox {
                checked,
                section_name,
                show_progress,
            }
        }
        UIControlType::ComboBox => {
            let (section_name, show_progress, consumed) = section_suffix(rest);
            let items: Vec<String> = rest[..rest.len() - consumed].to_vec();
            let index = items.iter().position(|item| item == text);
            UIInfo::ComboBox {
                items,
                index,
                section_name,
                show_progress,
            }
        }
        UIControlType::Image => UIInfo::Image {
            url: rest.first().cloned().filter(|u| !u.is_empty()),
        },
        UIControlType::TextFile => UIInfo::TextFile,
        UIControlType::Button => {
            let section_name = rest
                .first()
                .cloned()
                .filter(|s| !s.is_empty())
                .ok_or_else(|| {
                    ParseError::Syntax(format!("Button requires a section name ({raw})"))
                })?;
            let picture = rest
                .get(1)
                .cloned()
                .filter(|p| !p.is_empty() && p != "0" && !p.eq_ignore_ascii_case("None"));
            let show_progress = rest
                .get(2)
                .is_some_and(|v| v.eq_ignore_ascii_case("True"));
            UIInfo::Button {
                section_name,
                picture,
                show_progress,
            }
        }
        UIControlType::WebLabel => {
            let url = rest.first().cloned().filter(|u| !u.is_empty()).ok_or_else(|| {
                ParseError::Syntax(format!("WebLabel requires a url ({raw})"))
            })?;
            UIInfo::WebLabel { url }
        }
        UIControlType::RadioButton => {
            let selected = rest
                .first()
                .is_some_and(|v| v.eq_ignore_ascii_case("True"));
            let (section_name, show_progress, _) = section_suffix(&rest[1.min(rest.len())..]);
            UIInfo::RadioButton {
                selected,
                section_name,
                show_progress,
            }
        }
        UIControlType::Bevel => UIInfo::Bevel,
        UIControlType::FileBox => {
            let select_file = rest
                .first()
                .map_or(true, |m| !m.eq_ignore_ascii_case("dir"));
            let mut title = None;
            let mut filter = None;
            for arg in rest {
                if let Some(v) = strip_prefix_ci(arg, "Title=") {
                    title = Some(v.to_string());
                } else if let Some(v) = strip_prefix_ci(arg, "Filter=") {
                    filter = Some(v.to_string());
                }
            }
            UIInfo::FileBox {
                select_file,
                title,
                filter,
            }
        }
        UIControlType::RadioGroup => {
            let (section_name, show_progress, consumed) = section_suffix(rest);
            let body = &rest[..rest.len() - consumed];
            let Some((selected_raw, items)) = body.split_last() else {
                return Err(ParseError::Syntax(format!(
                    "RadioGroup requires items and a selected index ({raw})"
                )));
            };
            let selected = selected_raw.trim().parse::<usize>().map_err(|_| {
                ParseError::Syntax(format!(
                    "invalid RadioGroup selected index [{selected_raw}] ({raw})"
                ))
            })?;
            UIInfo::RadioGroup {
                items: items.to_vec(),
                selected,
                section_name,
                show_progress,
            }
        }
    })
}

/// Detects the trailing `_SectionToRun_,<ShowProgress>` pair some controls
/// accept. Returns the section name, the flag and how many arguments the
/// suffix consumed.
fn section_suffix(rest: &[String]) -> (Option<String>, bool, usize) {
    if rest.len() >= 2 {
        let name = &rest[rest.len() - 2];
        let flag = &rest[rest.len() - 1];
        let is_bool = flag.eq_ignore_ascii_case("True") || flag.eq_ignore_ascii_case("False");
        if is_bool && name.len() >= 3 && name.starts_with('_') && name.ends_with('_') {
            return (
                Some(name[1..name.len() - 1].to_string()),
                flag.eq_ignore_ascii_case("True"),
                2,
            );
        }
    }
    (None, false, 0)
}

fn strip_prefix_ci<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    if s.len() >= prefix.len() && s[..prefix.len()].eq_ignore_ascii_case(prefix) {
        Some(&s[prefix.len()..])
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_mandatory_fields_are_parsed() {
        let lines = body(&["pText1=Display,1,1,20,30,100,18"]);
        let (controls, logs) = parse_interface(&lines, "Interface");
        assert!(logs.is_empty());
        assert_eq!(controls.len(), 1);
        let c = &controls[0];
        assert_eq!(c.key, "pText1");
        assert_eq!(c.text, "Display");
        assert!(c.visibility);
        assert_eq!((c.x, c.y, c.width, c.height), (20, 30, 100, 18));
        assert_eq!(c.control_type, UIControlType::TextLabel);
    }

    #[test]
    fn test_too_few_fields_is_error() {
        let lines = body(&["pBad=Display,1,1,20,30"]);
        let (controls, logs) = parse_interface(&lines, "Interface");
        assert!(controls.is_empty());
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].state, LogState::Error);
    }

    #[test]
    fn test_duplicate_key_is_warning() {
        let lines = body(&[
            "pText1=A,1,1,1,1,1,1",
            "ptext1=B,1,1,1,1,1,1",
        ]);
        let (controls, logs) = parse_interface(&lines, "Interface");
        assert_eq!(controls.len(), 1);
        assert_eq!(controls[0].text, "A");
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].state, LogState::Warning);
    }

    #[test]
    fn test_checkbox_with_section_and_tooltip() {
        let lines = body(&["pCheck=Enable,1,3,10,10,200,18,True,_DoWork_,True,__Runs DoWork"]);
        let (controls, logs) = parse_interface(&lines, "Interface");
        assert!(logs.is_empty(), "{logs:?}");
        let c = &controls[0];
        assert_eq!(c.control_type, UIControlType::CheckBox);
        assert_eq!(c.tooltip.as_deref(), Some("Runs DoWork"));
        match &c.info {
            UIInfo::CheckBox {
                checked,
                section_name,
                show_progress,
            } => {
                assert!(checked);
                assert_eq!(section_name.as_deref(), Some("DoWork"));
                assert!(show_progress);
            }
            other => panic!("unexpected info: {other:?}"),
        }
    }

    #[test]
    fn test_combobox_index_resolution() {
        let lines = body(&["pCombo=B,1,4,10,10,150,21,A,B,C"]);
        let (controls, _) = parse_interface(&lines, "Interface");
        match &controls[0].info {
            UIInfo::ComboBox { items, index, .. } => {
                assert_eq!(items, &["A", "B", "C"]);
                assert_eq!(*index, Some(1));
            }
            other => panic!("unexpected info: {other:?}"),
        }

        let lines = body(&["pCombo=Z,1,4,10,10,150,21,A,B,C"]);
        let (controls, _) = parse_interface(&lines, "Interface");
        match &controls[0].info {
            UIInfo::ComboBox { index, .. } => assert_eq!(*index, None),
            other => panic!("unexpected info: {other:?}"),
        }
    }

    #[test]
    fn test_radiogroup_items_and_index() {
        let lines = body(&["pGroup=Pick,1,14,10,10,150,60,First,Second,Third,2"]);
        let (controls, logs) = parse_interface(&lines, "Interface");
        assert!(logs.is_empty(), "{logs:?}");
        match &controls[0].info {
            UIInfo::RadioGroup {
                items, selected, ..
            } => {
                assert_eq!(items, &["First", "Second", "Third"]);
                assert_eq!(*selected, 2);
            }
            other => panic!("unexpected info: {other:?}"),
        }
    }

    #[test]
    fn test_quoted_continuation_merges_lines() {
        let lines = body(&[
            "pLabel=\"Spans two",
            "lines\",1,1,10,10,100,18",
        ]);
        let (controls, logs) = parse_interface(&lines, "Interface");
        assert!(logs.is_empty(), "{logs:?}");
        assert_eq!(controls[0].text, "Spans twolines");
    }

    #[test]
    fn test_filebox_named_arguments() {
        let lines = body(&[
            "pFile=C:\\x.txt,1,13,10,10,200,20,file,\"Title=Pick a file\",\"Filter=Text|*.txt\"",
        ]);
        let (controls, logs) = parse_interface(&lines, "Interface");
        assert!(logs.is_empty(), "{logs:?}");
        match &controls[0].info {
            UIInfo::FileBox {
                select_file,
                title,
                filter,
            } => {
                assert!(select_file);
                assert_eq!(title.as_deref(), Some("Pick a file"));
                assert_eq!(filter.as_deref(), Some("Text|*.txt"));
            }
            other => panic!("unexpected info: {other:?}"),
        }
    }

    #[test]
    fn test_button_requires_section() {
        let lines = body(&["pBtn=Go,1,8,10,10,80,25"]);
        let (controls, logs) = parse_interface(&lines, "Interface");
        assert!(controls.is_empty());
        assert_eq!(logs.len(), 1);

        let lines = body(&["pBtn=Go,1,8,10,10,80,25,DoWork,logo.png,True"]);
        let (controls, logs) = parse_interface(&lines, "Interface");
        assert!(logs.is_empty(), "{logs:?}");
        match &controls[0].info {
            UIInfo::Button {
                section_name,
                picture,
                show_progress,
            } => {
                assert_eq!(section_name, "DoWork");
                assert_eq!(picture.as_deref(), Some("logo.png"));
                assert!(show_progress);
            }
            other => panic!("unexpected info: {other:?}"),
        }
    }
}
