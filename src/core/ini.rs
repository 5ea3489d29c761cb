// src/core/ini.rs

//! Ini-structured text primitives.
//!
//! Scripts are ini files with engine-specific conventions layered on top:
//! comments start with `//`, `#` or `;`, plain sections use `Key=Value`
//! ("ini-style"), and variable sections use `%Key%=Value` ("var-style").
//! Everything here reads text as UTF-8 with lossy conversion and strips a
//! leading BOM.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;

/// Returns true for a full-line comment.
pub fn is_comment(line: &str) -> bool {
    line.starts_with("//") || line.starts_with('#') || line.starts_with(';')
}

/// Reads a whole file as trimmed-right lines. Strips a UTF-8 BOM if present.
pub fn read_file_lines(path: &Path) -> io::Result<Vec<String>> {
    let bytes = fs::read(path)?;
    let text = String::from_utf8_lossy(&bytes);
    let text = text.strip_prefix('\u{feff}').unwrap_or(&text);
    Ok(text.lines().map(|l| l.trim_end().to_string()).collect())
}

/// Returns the section name if the line is a `[Section]` header.
pub fn section_header(line: &str) -> Option<&str> {
    let line = line.trim();
    if line.len() >= 2 && line.starts_with('[') && line.ends_with(']') {
        Some(line[1..line.len() - 1].trim())
    } else {
        None
    }
}

/// Extracts the raw lines of one section from a file.
///
/// Returns `Ok(None)` when the section does not exist. Section names compare
/// case-insensitively. Leading/trailing blank lines inside the section are
/// trimmed; interior blank lines are kept.
pub fn parse_raw_section(path: &Path, section: &str) -> io::Result<Option<Vec<String>>> {
    let lines = read_file_lines(path)?;
    let mut found = false;
    let mut body: Vec<String> = Vec::new();
    for line in lines {
        if let Some(name) = section_header(&line) {
            if found {
                break;
            }
            found = name.eq_ignore_ascii_case(section);
            continue;
        }
        if found {
            body.push(line.trim().to_string());
        }
    }
    if !found {
        return Ok(None);
    }
    while body.first().is_some_and(|l| l.is_empty()) {
        body.remove(0);
    }
    while body.last().is_some_and(|l| l.is_empty()) {
        body.pop();
    }
    Ok(Some(body))
}

/// Parses ini-style lines (`Key=Value`, key NOT `%`-wrapped) into a dict.
///
/// Comments, blank lines, keyless lines and `%`-wrapped keys are skipped.
/// Key case is preserved; use [`get_ci`] for lookups.
pub fn parse_ini_lines_ini_style<'a, I>(lines: I) -> HashMap<String, String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut dict = HashMap::new();
    for line in lines {
        let line = line.trim();
        if line.is_empty() || is_comment(line) {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() || (key.starts_with('%') && key.ends_with('%')) {
            continue;
        }
        dict.insert(key.to_string(), value.trim().to_string());
    }
    dict
}

/// Parses var-style lines (`%Key%=Value`) into a dict, keys unwrapped.
pub fn parse_ini_lines_var_style<'a, I>(lines: I) -> HashMap<String, String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut dict = HashMap::new();
    for line in lines {
        let line = line.trim();
        if line.is_empty() || is_comment(line) {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.len() < 3 || !key.starts_with('%') || !key.ends_with('%') {
            continue;
        }
        let key = &key[1..key.len() - 1];
        dict.insert(key.to_string(), value.trim().to_string());
    }
    dict
}

/// Reads one section from a file as an ini-style dict.
pub fn parse_ini_section_to_dict(
    path: &Path,
    section: &str,
) -> io::Result<Option<HashMap<String, String>>> {
    let lines = parse_raw_section(path, section)?;
    Ok(lines.map(|lines| parse_ini_lines_ini_style(lines.iter().map(String::as_str))))
}

/// Case-insensitive lookup into a preserved-case dict. Sections are small, so
/// a linear scan beats carrying a second lowercased index around.
pub fn get_ci<'a, V>(dict: &'a HashMap<String, V>, key: &str) -> Option<&'a V> {
    dict.iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, v)| v)
}

/// Writes `key=value` into a section of an ini file, replacing an existing
/// key (case-insensitive) in place. Creates the file and/or the section when
/// missing. Unrelated content is preserved byte-for-byte.
pub fn write_key(path: &Path, section: &str, key: &str, value: &str) -> io::Result<()> {
    let mut lines = if path.exists() {
        read_file_lines(path)?
    } else {
        Vec::new()
    };

    match section_bounds(&lines, section) {
        Some((start, end)) => {
            let mut replaced = false;
            for line in &mut lines[start..end] {
                if line_key_matches(line, key) {
                    *line = format!("{key}={value}");
                    replaced = true;
                    break;
                }
            }
            if !replaced {
                // Insert before the trailing blank lines of the section.
                let mut at = end;
                while at > start && lines[at - 1].trim().is_empty() {
                    at -= 1;
                }
                lines.insert(at, format!("{key}={value}"));
            }
        }
        None => {
            if !lines.is_empty() && !lines.last().is_some_and(|l| l.trim().is_empty()) {
                lines.push(String::new());
            }
            lines.push(format!("[{section}]"));
            lines.push(format!("{key}={value}"));
        }
    }

    fs::write(path, lines.join("\n") + "\n")
}

/// Deletes `key` from a section. Returns whether the key existed.
pub fn delete_key(path: &Path, section: &str, key: &str) -> io::Result<bool> {
    if !path.exists() {
        return Ok(false);
    }
    let mut lines = read_file_lines(path)?;
    let Some((start, end)) = section_bounds(&lines, section) else {
        return Ok(false);
    };
    let Some(idx) = (start..end).find(|&i| line_key_matches(&lines[i], key)) else {
        return Ok(false);
    };
    lines.remove(idx);
    fs::write(path, lines.join("\n") + "\n")?;
    Ok(true)
}

/// Body range (exclusive of headers) of a section inside `lines`.
fn section_bounds(lines: &[String], section: &str) -> Option<(usize, usize)> {
    let mut start = None;
    for (i, line) in lines.iter().enumerate() {
        match section_header(line) {
            Some(name) if start.is_none() && name.eq_ignore_ascii_case(section) => {
                start = Some(i + 1);
            }
            Some(_) if start.is_some() => return Some((start.unwrap_or(0), i)),
            _ => {}
        }
    }
    start.map(|s| (s, lines.len()))
}

fn line_key_matches(line: &str, key: &str) -> bool {
    let line = line.trim();
    if is_comment(line) {
        return false;
    }
    line.split_once('=')
        .is_some_and(|(k, _)| k.trim().eq_ignore_ascii_case(key))
}
