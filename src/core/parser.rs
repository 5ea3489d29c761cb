// src/core/parser.rs

//! Statement grammar: `Command,Arg1,"Quoted,Arg",...` with `,\` line
//! continuation and `If`/`Else` blocks delimited by `Begin`/`End`.
//!
//! Only the command families the syntax checker cross-references are given
//! typed shapes; everything else parses as `Generic`. A malformed line is a
//! `ParseError`, and bulk parsing degrades it to an `Error` statement plus a
//! diagnostic instead of poisoning the whole section.

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::VecDeque;
use thiserror::Error;

use crate::core::ini;
use crate::core::section::ScriptSection;
use crate::models::{CompatOption, LogInfo, LogState};

lazy_static! {
    static ref COMMAND_NAME_RE: Regex = Regex::new(r"^[A-Za-z0-9_]+$").unwrap();
    static ref VARIABLE_RE: Regex = Regex::new(r"%[^\s%]+%").unwrap();
    static ref SECTION_PARAM_RE: Regex = Regex::new(r"(?i)#(?:\d+|o\d+|a|c|r)").unwrap();
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("double quotes must come in pairs ({0})")]
    UnbalancedQuotes(String),
    #[error("invalid command name [{0}]")]
    InvalidCommandName(String),
    #[error("[{command}] must have at least {required} arguments ({raw})")]
    MissingArguments {
        command: String,
        required: usize,
        raw: String,
    },
    #[error("[If] must have an embedded command ({0})")]
    MissingEmbeddedCommand(String),
    #[error("invalid branch condition ({0})")]
    InvalidBranchCondition(String),
    #[error("deprecated negated branch condition ({0})")]
    DeprecatedBranchCondition(String),
    #[error("[Else] must be preceded by a matching [If] ({0})")]
    ElseWithoutIf(String),
    #[error("[Begin] has no matching [End] ({0})")]
    UnmatchedBegin(String),
    #[error("[End] has no matching [Begin] ({0})")]
    UnexpectedEnd(String),
    #[error("syntax error ({0})")]
    Syntax(String),
}

// --- ARGUMENT GRAMMAR ---

/// Splits the next argument off a comma-separated operand string.
///
/// A double-quoted argument may contain commas; `""` is the empty argument.
/// Returns the argument and the remaining operand string, if any.
pub fn get_next_argument(s: &str) -> Result<(String, Option<String>), ParseError> {
    let s = s.trim();
    if let Some(rest) = s.strip_prefix('"') {
        let end = rest
            .find('"')
            .ok_or_else(|| ParseError::UnbalancedQuotes(s.to_string()))?;
        let arg = rest[..end].to_string();
        let tail = rest[end + 1..].trim_start();
        return if tail.is_empty() {
            Ok((arg, None))
        } else if let Some(tail) = tail.strip_prefix(',') {
            Ok((arg, Some(tail.to_string())))
        } else {
            Err(ParseError::Syntax(format!(
                "text after a closing quote must be a comma ({s})"
            )))
        };
    }
    match s.find(',') {
        Some(idx) => Ok((
            s[..idx].trim().to_string(),
            Some(s[idx + 1..].to_string()),
        )),
        None => Ok((s.to_string(), None)),
    }
}

/// Splits a full operand string into arguments.
pub fn split_arguments(s: &str) -> Result<Vec<String>, ParseError> {
    let mut args = Vec::new();
    let mut rest = Some(s.to_string());
    while let Some(cur) = rest {
        let (arg, next) = get_next_argument(&cur)?;
        args.push(arg);
        rest = next;
    }
    Ok(args)
}

/// Whether the text references a `%Variable%` or a `#N`-style section
/// parameter, i.e. whether its value is unknowable before execution.
pub fn string_contains_variable(s: &str) -> bool {
    VARIABLE_RE.is_match(s) || SECTION_PARAM_RE.is_match(s)
}

// --- STATEMENT MODEL ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunVariant {
    Run,
    Exec,
    RunEx,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopVariant {
    Loop,
    LoopLetter,
    LoopEx,
    LoopLetterEx,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CondType {
    ExistFile,
    ExistDir,
    ExistSection,
    ExistVar,
    ExistMacro,
    Ping,
    Online,
    Question,
    Equal,
    EqualX,
    Smaller,
    Bigger,
    SmallerEqual,
    BiggerEqual,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchCondition {
    pub cond_type: CondType,
    pub not: bool,
    pub args: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct IfStatement {
    pub condition: BranchCondition,
    /// The embedded command as written on the `If` line.
    pub embed: Statement,
    /// The folded command block the branch runs.
    pub link: Vec<Statement>,
    pub link_parsed: bool,
}

#[derive(Debug, Clone)]
pub struct ElseStatement {
    pub embed: Statement,
    pub link: Vec<Statement>,
    pub link_parsed: bool,
}

#[derive(Debug, Clone)]
pub enum StatementKind {
    None,
    Comment,
    /// A line that failed to parse; carries the failure so downstream passes
    /// can report it without re-parsing.
    Error {
        message: String,
    },
    If(Box<IfStatement>),
    Else(Box<ElseStatement>),
    Begin,
    End,
    RunExec {
        variant: RunVariant,
        script_file: String,
        section_name: String,
        in_params: Vec<String>,
    },
    Loop {
        variant: LoopVariant,
        break_loop: bool,
        script_file: String,
        section_name: String,
        args: Vec<String>,
    },
    AddInterface {
        script_file: String,
        section_name: String,
        prefix: String,
    },
    ReadInterface {
        element: String,
        script_file: String,
        section_name: String,
        key: String,
        dest_var: String,
    },
    WriteInterface {
        element: String,
        script_file: String,
        section_name: String,
        key: String,
        value: String,
    },
    IniWrite {
        file: String,
        section: String,
        key: String,
        value: String,
    },
    Set {
        var_key: String,
        var_value: String,
        global: bool,
        permanent: bool,
    },
    Echo {
        message: String,
        warn: bool,
    },
    Generic {
        command: String,
        args: Vec<String>,
    },
}

#[derive(Debug, Clone)]
pub struct Statement {
    pub raw: String,
    /// 0-based index of the line inside its section body.
    pub line_idx: usize,
    pub kind: StatementKind,
}

impl Statement {
    pub fn new(raw: impl Into<String>, line_idx: usize, kind: StatementKind) -> Self {
        Self {
            raw: raw.into(),
            line_idx,
            kind,
        }
    }
}

// --- PARSER ---

pub struct StatementParser<'a> {
    section_name: String,
    /// Line index of the section header in the script file, used to report
    /// 1-based file line numbers.
    header_line_idx: usize,
    compat: &'a CompatOption,
}

impl<'a> StatementParser<'a> {
    pub fn new(section: &ScriptSection, compat: &'a CompatOption) -> Self {
        Self {
            section_name: section.name().to_string(),
            header_line_idx: section.line_idx(),
            compat,
        }
    }

    pub fn from_parts(section_name: &str, header_line_idx: usize, compat: &'a CompatOption) -> Self {
        Self {
            section_name: section_name.to_string(),
            header_line_idx,
            compat,
        }
    }

    /// Parses one raw statement (no continuation, no block folding).
    pub fn parse_statement(&self, raw: &str) -> Result<Statement, ParseError> {
        let lines = [raw.trim_end().to_string()];
        let mut i = 0;
        self.parse_one(&lines, &mut i)
    }

    /// Parses a section body into folded statements. Malformed lines degrade
    /// to `Error` statements plus diagnostics.
    pub fn parse_statements(&self, lines: &[String]) -> (Vec<Statement>, Vec<LogInfo>) {
        let mut logs = Vec::new();
        let mut stmts = Vec::new();
        let mut i = 0;
        while i < lines.len() {
            let line_idx = i;
            match self.parse_one(lines, &mut i) {
                Ok(stmt) => {
                    if !matches!(stmt.kind, StatementKind::None) {
                        stmts.push(stmt);
                    }
                }
                Err(e) => {
                    logs.push(LogInfo::new(
                        LogState::Error,
                        format!(
                            "{e} (line {} of section [{}])",
                            self.header_line_idx + line_idx + 2,
                            self.section_name
                        ),
                    ));
                    stmts.push(Statement::new(
                        lines[line_idx].trim(),
                        line_idx,
                        StatementKind::Error {
                            message: e.to_string(),
                        },
                    ));
                }
            }
            i += 1;
        }

        match Self::fold_block(&mut VecDeque::from(stmts.clone())) {
            Ok(folded) => (folded, logs),
            Err(e) => {
                logs.push(LogInfo::new(
                    LogState::Error,
                    format!("{e} (section [{}])", self.section_name),
                ));
                // Strip block tokens so downstream passes see plain commands.
                stmts.retain(|s| !matches!(s.kind, StatementKind::Begin | StatementKind::End));
                (stmts, logs)
            }
        }
    }

    fn parse_one(&self, lines: &[String], i: &mut usize) -> Result<Statement, ParseError> {
        let line_idx = *i;
        let mut raw = lines[line_idx].trim().to_string();
        if raw.is_empty() {
            return Ok(Statement::new(raw, line_idx, StatementKind::None));
        }
        if ini::is_comment(&raw) {
            return Ok(Statement::new(raw, line_idx, StatementKind::Comment));
        }

        // `,\` at end of line continues the statement on the next line.
        while raw.ends_with(",\\") {
            if *i + 1 >= lines.len() {
                return Err(ParseError::Syntax(format!(
                    "last statement of a section cannot be continued ({raw})"
                )));
            }
            *i += 1;
            raw.truncate(raw.len() - 1);
            raw.push_str(lines[*i].trim());
        }

        let (command, operands) = match raw.find(',') {
            Some(idx) => (raw[..idx].trim().to_string(), Some(&raw[idx + 1..])),
            None => (raw.trim().to_string(), None),
        };
        if !COMMAND_NAME_RE.is_match(&command) {
            return Err(ParseError::InvalidCommandName(command));
        }
        let args = match operands {
            Some(ops) => split_arguments(ops)?,
            None => Vec::new(),
        };
        self.dispatch(&raw, &command, args, line_idx)
    }

    /// Builds a typed statement from an already-split command and arguments.
    /// Used both for raw lines and for the embedded command of a branch.
    fn dispatch(
        &self,
        raw: &str,
        command: &str,
        args: Vec<String>,
        line_idx: usize,
    ) -> Result<Statement, ParseError> {
        let require = |n: usize| -> Result<(), ParseError> {
            if args.len() < n {
                Err(ParseError::MissingArguments {
                    command: command.to_string(),
                    required: n,
                    raw: raw.to_string(),
                })
            } else {
                Ok(())
            }
        };

        let kind = match command.to_ascii_lowercase().as_str() {
            "if" => return self.parse_if(raw, args, line_idx),
            "else" => return self.parse_else(raw, args, line_idx),
            "begin" => {
                if !args.is_empty() {
                    return Err(ParseError::Syntax(format!(
                        "[Begin] takes no arguments ({raw})"
                    )));
                }
                StatementKind::Begin
            }
            "end" => {
                if !args.is_empty() {
                    return Err(ParseError::Syntax(format!(
                        "[End] takes no arguments ({raw})"
                    )));
                }
                StatementKind::End
            }
            cmd @ ("run" | "exec" | "runex") => {
                require(2)?;
                let variant = match cmd {
                    "run" => RunVariant::Run,
                    "exec" => RunVariant::Exec,
                    _ => RunVariant::RunEx,
                };
                StatementKind::RunExec {
                    variant,
                    script_file: args[0].clone(),
                    section_name: args[1].clone(),
                    in_params: args[2..].to_vec(),
                }
            }
            cmd @ ("loop" | "loopletter" | "loopex" | "loopletterex") => {
                require(1)?;
                let variant = match cmd {
                    "loop" => LoopVariant::Loop,
                    "loopletter" => LoopVariant::LoopLetter,
                    "loopex" => LoopVariant::LoopEx,
                    _ => LoopVariant::LoopLetterEx,
                };
                if args[0].eq_ignore_ascii_case("BREAK") {
                    StatementKind::Loop {
                        variant,
                        break_loop: true,
                        script_file: String::new(),
                        section_name: String::new(),
                        args: Vec::new(),
                    }
                } else {
                    require(4)?;
                    StatementKind::Loop {
                        variant,
                        break_loop: false,
                        script_file: args[0].clone(),
                        section_name: args[1].clone(),
                        args: args[2..].to_vec(),
                    }
                }
            }
            "addinterface" => {
                require(3)?;
                StatementKind::AddInterface {
                    script_file: args[0].clone(),
                    section_name: args[1].clone(),
                    prefix: args[2].clone(),
                }
            }
            "readinterface" => {
                require(5)?;
                StatementKind::ReadInterface {
                    element: args[0].clone(),
                    script_file: args[1].clone(),
                    section_name: args[2].clone(),
                    key: args[3].clone(),
                    dest_var: args[4].clone(),
                }
            }
            "writeinterface" => {
                require(5)?;
                StatementKind::WriteInterface {
                    element: args[0].clone(),
                    script_file: args[1].clone(),
                    section_name: args[2].clone(),
                    key: args[3].clone(),
                    value: args[4].clone(),
                }
            }
            "iniwrite" => {
                require(4)?;
                StatementKind::IniWrite {
                    file: args[0].clone(),
                    section: args[1].clone(),
                    key: args[2].clone(),
                    value: args[3..].join(","),
                }
            }
            "set" => {
                require(2)?;
                let var_key = args[0].clone();
                let valid = (var_key.starts_with('%') && var_key.ends_with('%') && var_key.len() >= 3)
                    || var_key.starts_with('#');
                if !valid {
                    return Err(ParseError::Syntax(format!(
                        "[Set] variable name must be %-wrapped ({raw})"
                    )));
                }
                let mut global = false;
                let mut permanent = false;
                for flag in &args[2..] {
                    if flag.eq_ignore_ascii_case("GLOBAL") {
                        global = true;
                    } else if flag.eq_ignore_ascii_case("PERMANENT") {
                        permanent = true;
                    } else {
                        return Err(ParseError::Syntax(format!(
                            "[Set] has an invalid flag [{flag}] ({raw})"
                        )));
                    }
                }
                StatementKind::Set {
                    var_key,
                    var_value: args[1].clone(),
                    global,
                    permanent,
                }
            }
            "echo" => {
                require(1)?;
                let warn = args.get(1).is_some_and(|a| a.eq_ignore_ascii_case("WARN"));
                StatementKind::Echo {
                    message: args[0].clone(),
                    warn,
                }
            }
            _ => StatementKind::Generic {
                command: command.to_string(),
                args,
            },
        };
        Ok(Statement::new(raw, line_idx, kind))
    }

    fn parse_if(
        &self,
        raw: &str,
        args: Vec<String>,
        line_idx: usize,
    ) -> Result<Statement, ParseError> {
        let (condition, consumed) = self.parse_branch_condition(raw, &args)?;
        if consumed >= args.len() {
            return Err(ParseError::MissingEmbeddedCommand(raw.to_string()));
        }
        let embed_cmd = args[consumed].clone();
        if !COMMAND_NAME_RE.is_match(&embed_cmd) {
            return Err(ParseError::InvalidCommandName(embed_cmd));
        }
        let embed = self.dispatch(raw, &embed_cmd, args[consumed + 1..].to_vec(), line_idx)?;
        Ok(Statement::new(
            raw,
            line_idx,
            StatementKind::If(Box::new(IfStatement {
                condition,
                embed,
                link: Vec::new(),
                link_parsed: false,
            })),
        ))
    }

    fn parse_else(
        &self,
        raw: &str,
        args: Vec<String>,
        line_idx: usize,
    ) -> Result<Statement, ParseError> {
        if args.is_empty() {
            return Err(ParseError::MissingEmbeddedCommand(raw.to_string()));
        }
        let embed_cmd = args[0].clone();
        if !COMMAND_NAME_RE.is_match(&embed_cmd) {
            return Err(ParseError::InvalidCommandName(embed_cmd));
        }
        let embed = self.dispatch(raw, &embed_cmd, args[1..].to_vec(), line_idx)?;
        Ok(Statement::new(
            raw,
            line_idx,
            StatementKind::Else(Box::new(ElseStatement {
                embed,
                link: Vec::new(),
                link_parsed: false,
            })),
        ))
    }

    /// Parses the condition part of an `If` argument list. Returns the
    /// condition and the number of arguments it consumed.
    fn parse_branch_condition(
        &self,
        raw: &str,
        args: &[String],
    ) -> Result<(BranchCondition, usize), ParseError> {
        let mut idx = 0;
        let mut not = false;
        let first = args
            .first()
            .ok_or_else(|| ParseError::InvalidBranchCondition(raw.to_string()))?;
        let mut keyword = first.as_str();
        if keyword.eq_ignore_ascii_case("Not") {
            not = true;
            idx = 1;
            keyword = args
                .get(1)
                .ok_or_else(|| ParseError::InvalidBranchCondition(raw.to_string()))?;
        }

        let lowered = keyword.to_ascii_lowercase();
        let (cond_type, legacy_not, arg_count) = match lowered.as_str() {
            "existfile" => (CondType::ExistFile, false, 1),
            "existdir" => (CondType::ExistDir, false, 1),
            "existsection" => (CondType::ExistSection, false, 2),
            "existvar" => (CondType::ExistVar, false, 1),
            "existmacro" => (CondType::ExistMacro, false, 1),
            "ping" => (CondType::Ping, false, 1),
            "online" => (CondType::Online, false, 0),
            "question" => (CondType::Question, false, 1),
            "notexistfile" => (CondType::ExistFile, true, 1),
            "notexistdir" => (CondType::ExistDir, true, 1),
            "notexistsection" => (CondType::ExistSection, true, 2),
            "notexistvar" => (CondType::ExistVar, true, 1),
            "notexistmacro" => (CondType::ExistMacro, true, 1),
            _ => {
                // Comparison: <Value1>,<Operator>,<Value2>
                let op = args
                    .get(idx + 1)
                    .ok_or_else(|| ParseError::InvalidBranchCondition(raw.to_string()))?;
                let (cond_type, op_not) = match op.to_ascii_lowercase().as_str() {
                    "equal" | "==" => (CondType::Equal, false),
                    "notequal" | "!=" => (CondType::Equal, true),
                    "equalx" | "===" => (CondType::EqualX, false),
                    "smaller" | "<" => (CondType::Smaller, false),
                    "bigger" | ">" => (CondType::Bigger, false),
                    "smallerequal" | "<=" => (CondType::SmallerEqual, false),
                    "biggerequal" | ">=" => (CondType::BiggerEqual, false),
                    _ => return Err(ParseError::InvalidBranchCondition(raw.to_string())),
                };
                if args.len() < idx + 3 {
                    return Err(ParseError::InvalidBranchCondition(raw.to_string()));
                }
                let cond = BranchCondition {
                    cond_type,
                    not: not != op_not,
                    args: vec![args[idx].clone(), args[idx + 2].clone()],
                };
                return Ok((cond, idx + 3));
            }
        };

        if legacy_not {
            if !self.compat.legacy_branch_condition {
                return Err(ParseError::DeprecatedBranchCondition(raw.to_string()));
            }
            not = !not;
        }
        if args.len() < idx + 1 + arg_count {
            return Err(ParseError::InvalidBranchCondition(raw.to_string()));
        }
        let cond = BranchCondition {
            cond_type,
            not,
            args: args[idx + 1..idx + 1 + arg_count].to_vec(),
        };
        Ok((cond, idx + 1 + arg_count))
    }

    // --- BLOCK FOLDING ---

    fn fold_block(cmds: &mut VecDeque<Statement>) -> Result<Vec<Statement>, ParseError> {
        let mut out = Vec::new();
        let mut else_flag = false;
        while let Some(stmt) = cmds.pop_front() {
            match &stmt.kind {
                StatementKind::If(_) => {
                    out.push(Self::fold_if(stmt, cmds)?);
                    else_flag = true;
                }
                StatementKind::Else(_) => {
                    if !else_flag {
                        return Err(ParseError::ElseWithoutIf(stmt.raw));
                    }
                    let (folded, chained) = Self::fold_else(stmt, cmds)?;
                    out.push(folded);
                    else_flag = chained;
                }
                StatementKind::End => return Err(ParseError::UnexpectedEnd(stmt.raw)),
                StatementKind::Begin => {
                    return Err(ParseError::Syntax(format!(
                        "[Begin] must be embedded in [If] or [Else] ({})",
                        stmt.raw
                    )))
                }
                StatementKind::Comment => out.push(stmt),
                _ => {
                    else_flag = false;
                    out.push(stmt);
                }
            }
        }
        Ok(out)
    }

    fn fold_if(
        stmt: Statement,
        cmds: &mut VecDeque<Statement>,
    ) -> Result<Statement, ParseError> {
        let Statement { raw, line_idx, kind } = stmt;
        let StatementKind::If(boxed) = kind else {
            return Err(ParseError::Syntax(format!("not an [If] statement ({raw})")));
        };
        let IfStatement {
            condition, embed, ..
        } = *boxed;

        let (embed, link) = match &embed.kind {
            StatementKind::If(_) => {
                let inner = Self::fold_if(embed, cmds)?;
                (inner.clone(), vec![inner])
            }
            StatementKind::Begin => {
                let block = Self::extract_block(cmds, &raw)?;
                let link = Self::fold_block(&mut VecDeque::from(block))?;
                (embed, link)
            }
            StatementKind::Else(_) | StatementKind::End => {
                return Err(ParseError::Syntax(format!(
                    "[If] cannot embed [{}] ({raw})",
                    if matches!(embed.kind, StatementKind::Else(_)) {
                        "Else"
                    } else {
                        "End"
                    }
                )))
            }
            _ => {
                let link = vec![embed.clone()];
                (embed, link)
            }
        };

        Ok(Statement::new(
            raw,
            line_idx,
            StatementKind::If(Box::new(IfStatement {
                condition,
                embed,
                link,
                link_parsed: true,
            })),
        ))
    }

    /// Returns the folded statement and whether the else-chain stays open
    /// (an `Else,If,...` keeps accepting another `Else`).
    fn fold_else(
        stmt: Statement,
        cmds: &mut VecDeque<Statement>,
    ) -> Result<(Statement, bool), ParseError> {
        let Statement { raw, line_idx, kind } = stmt;
        let StatementKind::Else(boxed) = kind else {
            return Err(ParseError::Syntax(format!("not an [Else] statement ({raw})")));
        };
        let ElseStatement { embed, .. } = *boxed;

        let (embed, link, chained) = match &embed.kind {
            StatementKind::If(_) => {
                let inner = Self::fold_if(embed, cmds)?;
                (inner.clone(), vec![inner], true)
            }
            StatementKind::Begin => {
                let block = Self::extract_block(cmds, &raw)?;
                let link = Self::fold_block(&mut VecDeque::from(block))?;
                (embed, link, false)
            }
            StatementKind::Else(_) | StatementKind::End => {
                return Err(ParseError::Syntax(format!(
                    "[Else] cannot embed another block token ({raw})"
                )))
            }
            _ => {
                let link = vec![embed.clone()];
                (embed, link, false)
            }
        };

        Ok((
            Statement::new(
                raw,
                line_idx,
                StatementKind::Else(Box::new(ElseStatement {
                    embed,
                    link,
                    link_parsed: true,
                })),
            ),
            chained,
        ))
    }

    /// Consumes statements up to the matching `End`, excluded.
    fn extract_block(
        cmds: &mut VecDeque<Statement>,
        raw: &str,
    ) -> Result<Vec<Statement>, ParseError> {
        let mut depth = 0usize;
        let mut block = Vec::new();
        while let Some(stmt) = cmds.pop_front() {
            match &stmt.kind {
                StatementKind::End => {
                    if depth == 0 {
                        return Ok(block);
                    }
                    depth -= 1;
                    block.push(stmt);
                }
                kind if Self::opens_block(kind) => {
                    depth += 1;
                    block.push(stmt);
                }
                _ => block.push(stmt),
            }
        }
        Err(ParseError::UnmatchedBegin(raw.to_string()))
    }

    fn opens_block(kind: &StatementKind) -> bool {
        match kind {
            StatementKind::If(b) => Self::embed_opens(&b.embed),
            StatementKind::Else(b) => Self::embed_opens(&b.embed),
            _ => false,
        }
    }

    fn embed_opens(stmt: &Statement) -> bool {
        match &stmt.kind {
            StatementKind::Begin => true,
            StatementKind::If(b) => Self::embed_opens(&b.embed),
            StatementKind::Else(b) => Self::embed_opens(&b.embed),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser(compat: &CompatOption) -> StatementParser<'_> {
        StatementParser::from_parts("Process", 10, compat)
    }

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_get_next_argument_handles_quotes() {
        assert_eq!(
            get_next_argument("plain,rest").unwrap(),
            ("plain".to_string(), Some("rest".to_string()))
        );
        assert_eq!(
            get_next_argument("\"has,comma\",rest").unwrap(),
            ("has,comma".to_string(), Some("rest".to_string()))
        );
        assert_eq!(
            get_next_argument("\"\",tail").unwrap(),
            (String::new(), Some("tail".to_string()))
        );
        assert_eq!(get_next_argument("last").unwrap(), ("last".to_string(), None));
        assert!(matches!(
            get_next_argument("\"unterminated"),
            Err(ParseError::UnbalancedQuotes(_))
        ));
    }

    #[test]
    fn test_split_arguments() {
        let args = split_arguments("A, \"B, with comma\" ,C,\"\"").unwrap();
        assert_eq!(args, vec!["A", "B, with comma", "C", ""]);
    }

    #[test]
    fn test_string_contains_variable() {
        assert!(string_contains_variable("%BaseDir%\\file"));
        assert!(string_contains_variable("param #2 here"));
        assert!(string_contains_variable("#a"));
        assert!(!string_contains_variable("plain text 100%"));
        assert!(!string_contains_variable("Section"));
    }

    #[test]
    fn test_parse_run_statement() {
        let compat = CompatOption::default();
        let stmt = parser(&compat)
            .parse_statement("Run,%ScriptFile%,DoWork,arg1,\"arg,2\"")
            .unwrap();
        match stmt.kind {
            StatementKind::RunExec {
                variant,
                script_file,
                section_name,
                in_params,
            } => {
                assert_eq!(variant, RunVariant::Run);
                assert_eq!(script_file, "%ScriptFile%");
                assert_eq!(section_name, "DoWork");
                assert_eq!(in_params, vec!["arg1", "arg,2"]);
            }
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[test]
    fn test_line_continuation_merges_lines() {
        let compat = CompatOption::default();
        let body = lines(&["Run,%ScriptFile%,\\", "DoWork,\\", "arg1"]);
        let (stmts, logs) = parser(&compat).parse_statements(&body);
        assert!(logs.is_empty());
        assert_eq!(stmts.len(), 1);
        match &stmts[0].kind {
            StatementKind::RunExec { section_name, in_params, .. } => {
                assert_eq!(section_name, "DoWork");
                assert_eq!(in_params, &["arg1".to_string()]);
            }
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[test]
    fn test_invalid_command_degrades_to_error_statement() {
        let compat = CompatOption::default();
        let body = lines(&["Bad Command,arg", "Echo,ok"]);
        let (stmts, logs) = parser(&compat).parse_statements(&body);
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].state, LogState::Error);
        assert_eq!(stmts.len(), 2);
        assert!(matches!(stmts[0].kind, StatementKind::Error { .. }));
        assert!(matches!(stmts[1].kind, StatementKind::Echo { .. }));
    }

    #[test]
    fn test_if_single_line_folds_embed_into_link() {
        let compat = CompatOption::default();
        let body = lines(&["If,ExistSection,%ScriptFile%,Extra,Run,%ScriptFile%,Extra"]);
        let (stmts, logs) = parser(&compat).parse_statements(&body);
        assert!(logs.is_empty());
        let StatementKind::If(if_stmt) = &stmts[0].kind else {
            panic!("expected If");
        };
        assert_eq!(if_stmt.condition.cond_type, CondType::ExistSection);
        assert_eq!(if_stmt.condition.args, vec!["%ScriptFile%", "Extra"]);
        assert!(if_stmt.link_parsed);
        assert_eq!(if_stmt.link.len(), 1);
        assert!(matches!(if_stmt.embed.kind, StatementKind::RunExec { .. }));
    }

    #[test]
    fn test_begin_end_block_folding() {
        let compat = CompatOption::default();
        let body = lines(&[
            "If,%A%,Equal,1,Begin",
            "Echo,one",
            "If,%B%,Equal,2,Begin",
            "Echo,two",
            "End",
            "Echo,three",
            "End",
            "Else,Begin",
            "Echo,four",
            "End",
            "Echo,after",
        ]);
        let (stmts, logs) = parser(&compat).parse_statements(&body);
        assert!(logs.is_empty(), "{logs:?}");
        assert_eq!(stmts.len(), 3);

        let StatementKind::If(if_stmt) = &stmts[0].kind else {
            panic!("expected If");
        };
        assert_eq!(if_stmt.link.len(), 3);
        let StatementKind::If(nested) = &if_stmt.link[1].kind else {
            panic!("expected nested If");
        };
        assert_eq!(nested.link.len(), 1);

        let StatementKind::Else(else_stmt) = &stmts[1].kind else {
            panic!("expected Else");
        };
        assert_eq!(else_stmt.link.len(), 1);
        assert!(matches!(stmts[2].kind, StatementKind::Echo { .. }));
    }

    #[test]
    fn test_else_without_if_is_error() {
        let compat = CompatOption::default();
        let body = lines(&["Echo,plain", "Else,Echo,nope"]);
        let (_, logs) = parser(&compat).parse_statements(&body);
        assert!(logs.iter().any(|l| l.state == LogState::Error));
    }

    #[test]
    fn test_unmatched_begin_is_error() {
        let compat = CompatOption::default();
        let body = lines(&["If,%A%,Equal,1,Begin", "Echo,one"]);
        let (_, logs) = parser(&compat).parse_statements(&body);
        assert!(logs.iter().any(|l| l.state == LogState::Error));
    }

    #[test]
    fn test_not_negates_condition() {
        let compat = CompatOption::default();
        let stmt = parser(&compat)
            .parse_statement("If,Not,ExistFile,%Target%,Echo,missing")
            .unwrap();
        let StatementKind::If(if_stmt) = &stmt.kind else {
            panic!("expected If");
        };
        assert!(if_stmt.condition.not);
        assert_eq!(if_stmt.condition.cond_type, CondType::ExistFile);
    }

    #[test]
    fn test_legacy_negated_condition_requires_compat() {
        let strict = CompatOption::default();
        let err = parser(&strict)
            .parse_statement("If,NotExistFile,%Target%,Echo,missing")
            .unwrap_err();
        assert!(matches!(err, ParseError::DeprecatedBranchCondition(_)));

        let legacy = CompatOption {
            legacy_branch_condition: true,
            ..CompatOption::default()
        };
        let stmt = parser(&legacy)
            .parse_statement("If,NotExistFile,%Target%,Echo,missing")
            .unwrap();
        let StatementKind::If(if_stmt) = &stmt.kind else {
            panic!("expected If");
        };
        assert!(if_stmt.condition.not);
    }

    #[test]
    fn test_loop_break_and_full_forms() {
        let compat = CompatOption::default();
        let p = parser(&compat);
        let stmt = p.parse_statement("Loop,BREAK").unwrap();
        assert!(matches!(
            stmt.kind,
            StatementKind::Loop { break_loop: true, .. }
        ));

        let stmt = p
            .parse_statement("Loop,%ScriptFile%,Work,1,10")
            .unwrap();
        match stmt.kind {
            StatementKind::Loop {
                break_loop,
                script_file,
                section_name,
                args,
                ..
            } => {
                assert!(!break_loop);
                assert_eq!(script_file, "%ScriptFile%");
                assert_eq!(section_name, "Work");
                assert_eq!(args, vec!["1", "10"]);
            }
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[test]
    fn test_set_parses_scope_flags() {
        let compat = CompatOption::default();
        let p = parser(&compat);
        let stmt = p.parse_statement("Set,%Var%,Value,GLOBAL").unwrap();
        match stmt.kind {
            StatementKind::Set { var_key, global, permanent, .. } => {
                assert_eq!(var_key, "%Var%");
                assert!(global);
                assert!(!permanent);
            }
            other => panic!("unexpected kind: {other:?}"),
        }
        assert!(p.parse_statement("Set,NoPercent,Value").is_err());
    }

    #[test]
    fn test_unknown_command_is_generic() {
        let compat = CompatOption::default();
        let stmt = parser(&compat)
            .parse_statement("FileCopy,%SrcFile%,%DestDir%")
            .unwrap();
        match stmt.kind {
            StatementKind::Generic { command, args } => {
                assert_eq!(command, "FileCopy");
                assert_eq!(args.len(), 2);
            }
            other => panic!("unexpected kind: {other:?}"),
        }
    }
}
