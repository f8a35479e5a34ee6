// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 buildflow contributors

//! Dockerfile-style descriptor parser
//!
//! Parses the text form of a multi-stage build into [`Stage`]s:
//!
//! ```text
//! FROM python:3.12-slim AS base
//! ENV PYTHONUNBUFFERED=1
//! WORKDIR /app
//!
//! FROM base AS builder
//! COPY requirements.txt .
//! RUN pip install --target /libs -r requirements.txt
//!
//! FROM base AS runtime
//! COPY --from=builder /libs /libs
//! COPY src/ .
//! EXPOSE 8000
//! CMD ["run-server", "0.0.0.0:8000"]
//! ```
//!
//! `ARG` values are substituted while parsing; global `ARG`s (before the
//! first `FROM`) apply to `FROM` lines and to stages that redeclare them.

use std::collections::HashMap;

use super::{CopySources, Instruction, Stage};
use crate::errors::BuildError;
use crate::executors::expand_vars;

/// Instructions that are recognised but not supported by the engine
const UNSUPPORTED: &[&str] = &[
    "ADD",
    "ENTRYPOINT",
    "HEALTHCHECK",
    "ONBUILD",
    "SHELL",
    "STOPSIGNAL",
    "USER",
    "VOLUME",
];

/// Parse a Dockerfile-style descriptor into stages
pub fn parse(content: &str) -> Result<Vec<Stage>, BuildError> {
    let mut parser = DescriptorParser::new(content);
    parser.parse()
}

struct DescriptorParser {
    lines: Vec<(usize, String)>,
    global_args: HashMap<String, String>,
    stage_args: HashMap<String, String>,
}

impl DescriptorParser {
    fn new(content: &str) -> Self {
        Self {
            lines: Self::preprocess(content),
            global_args: HashMap::new(),
            stage_args: HashMap::new(),
        }
    }

    /// Join continuation lines and drop comments and blank lines
    fn preprocess(content: &str) -> Vec<(usize, String)> {
        let mut result = Vec::new();
        let mut current = String::new();
        let mut start_line = 0;
        let mut continuation = false;

        for (line_num, line) in content.lines().enumerate() {
            let line_num = line_num + 1;
            let trimmed = line.trim();

            // Comment lines are skipped even inside a continuation
            if trimmed.starts_with('#') {
                continue;
            }
            // Blank lines never end or start an instruction
            if trimmed.is_empty() {
                continue;
            }

            let body = trimmed.strip_suffix('\\').unwrap_or(trimmed).trim();
            if continuation {
                if !body.is_empty() {
                    current.push(' ');
                    current.push_str(body);
                }
            } else {
                start_line = line_num;
                current = body.to_string();
            }

            continuation = trimmed.ends_with('\\');
            if !continuation && !current.is_empty() {
                result.push((start_line, std::mem::take(&mut current)));
            }
        }

        if !current.is_empty() {
            result.push((start_line, current));
        }

        result
    }

    fn parse(&mut self) -> Result<Vec<Stage>, BuildError> {
        let mut stages: Vec<Stage> = Vec::new();
        let lines = std::mem::take(&mut self.lines);

        for (line_num, line) in &lines {
            let line_num = *line_num;
            let (keyword, rest) = split_instruction(line);

            if keyword == "FROM" {
                stages.push(self.parse_from(line_num, rest)?);
                continue;
            }

            if keyword == "ARG" {
                self.parse_arg(line_num, rest, stages.is_empty())?;
                continue;
            }

            let Some(stage) = stages.last_mut() else {
                return Err(parse_error(
                    line_num,
                    format!("Expected ARG or FROM, found {}", keyword),
                    Some("A build descriptor must start with ARG or FROM"),
                ));
            };

            let rest = self.substitute_args(rest);
            let instructions = match keyword.as_str() {
                "RUN" => parse_run(line_num, &rest)?,
                "COPY" => parse_copy(line_num, &rest)?,
                "ENV" => parse_pairs(line_num, &rest, "ENV")?
                    .into_iter()
                    .map(|(key, value)| Instruction::Env { key, value })
                    .collect(),
                "LABEL" => parse_pairs(line_num, &rest, "LABEL")?
                    .into_iter()
                    .map(|(key, value)| Instruction::Label { key, value })
                    .collect(),
                "WORKDIR" => parse_workdir(line_num, &rest)?,
                "EXPOSE" => parse_expose(line_num, &rest)?,
                "CMD" => parse_cmd(line_num, &rest)?,
                other if UNSUPPORTED.contains(&other) => {
                    return Err(parse_error(
                        line_num,
                        format!("Unsupported instruction: {}", other),
                        Some("Supported: FROM, ARG, ENV, WORKDIR, RUN, COPY, EXPOSE, CMD, LABEL"),
                    ));
                }
                other => {
                    return Err(parse_error(
                        line_num,
                        format!("Unknown instruction: {}", other),
                        None,
                    ));
                }
            };

            stage.steps.extend(instructions);
        }

        if stages.is_empty() {
            return Err(parse_error(
                1,
                "Descriptor must contain at least one FROM instruction",
                None,
            ));
        }

        Ok(stages)
    }

    fn parse_from(&mut self, line_num: usize, rest: &str) -> Result<Stage, BuildError> {
        // FROM [--platform=<platform>] <image> [AS <name>]
        self.stage_args.clear();

        let args: Vec<&str> = rest
            .split_whitespace()
            .filter(|a| {
                if a.starts_with("--platform=") {
                    tracing::debug!(line = line_num, "Ignoring FROM --platform");
                    false
                } else {
                    true
                }
            })
            .collect();

        let Some(image) = args.first() else {
            return Err(parse_error(
                line_num,
                "FROM instruction requires an image reference",
                Some("Usage: FROM <image> [AS <name>]"),
            ));
        };

        let name = match args.get(1..) {
            Some([as_kw, name]) if as_kw.eq_ignore_ascii_case("AS") => Some(name.to_string()),
            Some([]) | None => None,
            Some([as_kw]) if as_kw.eq_ignore_ascii_case("AS") => {
                return Err(parse_error(line_num, "FROM ... AS requires a stage name", None));
            }
            Some(_) => {
                return Err(parse_error(
                    line_num,
                    format!("Unexpected arguments after FROM {}", image),
                    Some("Usage: FROM <image> [AS <name>]"),
                ));
            }
        };

        let from = expand_vars(image, |var| self.global_args.get(var).cloned());

        Ok(Stage {
            name,
            description: None,
            from,
            steps: Vec::new(),
        })
    }

    fn parse_arg(&mut self, line_num: usize, rest: &str, global: bool) -> Result<(), BuildError> {
        let rest = rest.trim();
        if rest.is_empty() {
            return Err(parse_error(
                line_num,
                "ARG requires a name",
                Some("Usage: ARG <name>[=<default>]"),
            ));
        }

        let (name, default) = match rest.split_once('=') {
            Some((name, value)) => (name.trim().to_string(), Some(unquote(value.trim()))),
            None => (rest.to_string(), None),
        };

        if global {
            self.global_args.insert(name, default.unwrap_or_default());
        } else {
            let value = default
                .map(|v| self.substitute_args(&v))
                .or_else(|| self.global_args.get(&name).cloned())
                .unwrap_or_default();
            self.stage_args.insert(name, value);
        }

        Ok(())
    }

    fn substitute_args(&self, text: &str) -> String {
        if self.stage_args.is_empty() {
            return text.to_string();
        }
        expand_vars(text, |var| self.stage_args.get(var).cloned())
    }
}

fn parse_error(line: usize, message: impl Into<String>, hint: Option<&str>) -> BuildError {
    BuildError::Parse {
        line,
        message: message.into(),
        hint: hint.map(String::from),
    }
}

/// Split a line into its upper-cased keyword and the raw remainder
fn split_instruction(line: &str) -> (String, &str) {
    let line = line.trim();
    match line.split_once(char::is_whitespace) {
        Some((keyword, rest)) => (keyword.to_uppercase(), rest.trim()),
        None => (line.to_uppercase(), ""),
    }
}

/// Tokenizer that respects double quotes and JSON arrays
fn tokenize(s: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut in_json = 0;

    for c in s.chars() {
        match c {
            '"' if in_json == 0 => {
                in_quotes = !in_quotes;
                current.push(c);
            }
            '[' if !in_quotes => {
                in_json += 1;
                current.push(c);
            }
            ']' if !in_quotes && in_json > 0 => {
                in_json -= 1;
                current.push(c);
                if in_json == 0 {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            ' ' | '\t' if !in_quotes && in_json == 0 => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            _ => current.push(c),
        }
    }

    if !current.is_empty() {
        tokens.push(current);
    }

    tokens
}

fn unquote(s: &str) -> String {
    s.strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(s)
        .to_string()
}

/// Parse a JSON exec-form array, if the text is one
fn exec_form(s: &str) -> Option<Vec<String>> {
    if s.starts_with('[') {
        serde_json::from_str::<Vec<String>>(s).ok()
    } else {
        None
    }
}

fn parse_run(line_num: usize, rest: &str) -> Result<Vec<Instruction>, BuildError> {
    if rest.is_empty() {
        return Err(parse_error(
            line_num,
            "RUN instruction requires a command",
            Some("Usage: RUN <command>"),
        ));
    }

    // Exec form is flattened into a shell command line
    let command = match exec_form(rest) {
        Some(args) => args
            .iter()
            .map(|a| shell_quote(a))
            .collect::<Vec<_>>()
            .join(" "),
        None => rest.to_string(),
    };

    Ok(vec![Instruction::Run { command }])
}

fn shell_quote(arg: &str) -> String {
    if !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:@%+,".contains(c))
    {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

fn parse_copy(line_num: usize, rest: &str) -> Result<Vec<Instruction>, BuildError> {
    // COPY [--from=<stage>] <src>... <dest>
    let args = match exec_form(rest) {
        Some(args) => args,
        None => tokenize(rest).iter().map(|a| unquote(a)).collect(),
    };

    let mut from = None;
    let mut start = 0;
    for (i, arg) in args.iter().enumerate() {
        if let Some(stage) = arg.strip_prefix("--from=") {
            from = Some(stage.to_string());
            start = i + 1;
        } else if arg.starts_with("--") {
            return Err(parse_error(
                line_num,
                format!("Unsupported COPY flag: {}", arg),
                Some("Only --from=<stage> is supported"),
            ));
        } else {
            break;
        }
    }

    let paths = &args[start..];
    let Some((dest, sources)) = paths.split_last() else {
        return Err(copy_usage(line_num));
    };
    if sources.is_empty() {
        return Err(copy_usage(line_num));
    }

    let src = if sources.len() == 1 {
        CopySources::Single(sources[0].clone())
    } else {
        CopySources::Multiple(sources.to_vec())
    };

    Ok(vec![Instruction::Copy {
        from,
        src,
        dest: dest.clone(),
    }])
}

fn copy_usage(line_num: usize) -> BuildError {
    parse_error(
        line_num,
        "COPY requires at least source and destination",
        Some("Usage: COPY [--from=<stage>] <src>... <dest>"),
    )
}

/// `KEY=VALUE ...` or the legacy `KEY VALUE` form
fn parse_pairs(
    line_num: usize,
    rest: &str,
    keyword: &str,
) -> Result<Vec<(String, String)>, BuildError> {
    let tokens = tokenize(rest);
    let Some(first) = tokens.first() else {
        return Err(parse_error(
            line_num,
            format!("{} requires at least one key=value pair", keyword),
            None,
        ));
    };

    if !first.contains('=') {
        let Some((key, value)) = rest.split_once(char::is_whitespace) else {
            return Err(parse_error(line_num, format!("{} requires a value", keyword), None));
        };
        return Ok(vec![(key.to_string(), unquote(value.trim()))]);
    }

    tokens
        .iter()
        .map(|token| {
            token
                .split_once('=')
                .map(|(k, v)| (unquote(k), unquote(v)))
                .ok_or_else(|| {
                    parse_error(
                        line_num,
                        format!("Expected key=value, found '{}'", token),
                        None,
                    )
                })
        })
        .collect()
}

fn parse_workdir(line_num: usize, rest: &str) -> Result<Vec<Instruction>, BuildError> {
    if rest.is_empty() {
        return Err(parse_error(line_num, "WORKDIR requires a path", None));
    }
    Ok(vec![Instruction::Workdir {
        path: unquote(rest),
    }])
}

fn parse_expose(line_num: usize, rest: &str) -> Result<Vec<Instruction>, BuildError> {
    let mut instructions = Vec::new();

    for arg in rest.split_whitespace() {
        let (port_str, protocol) = arg.split_once('/').unwrap_or((arg, "tcp"));

        if !protocol.eq_ignore_ascii_case("tcp") && !protocol.eq_ignore_ascii_case("udp") {
            return Err(parse_error(
                line_num,
                format!("Unknown protocol: {}", protocol),
                Some("Protocol must be 'tcp' or 'udp'"),
            ));
        }

        let port = port_str
            .parse::<u16>()
            .ok()
            .filter(|p| *p != 0)
            .ok_or_else(|| parse_error(line_num, format!("Invalid port number: {}", port_str), None))?;

        instructions.push(Instruction::Expose { port });
    }

    if instructions.is_empty() {
        return Err(parse_error(
            line_num,
            "EXPOSE requires a port",
            Some("Usage: EXPOSE <port>[/<protocol>]"),
        ));
    }

    Ok(instructions)
}

fn parse_cmd(line_num: usize, rest: &str) -> Result<Vec<Instruction>, BuildError> {
    if rest.is_empty() {
        return Err(parse_error(line_num, "CMD requires a command", None));
    }

    let args = match exec_form(rest) {
        Some(args) => args,
        None if rest.starts_with('[') => {
            return Err(parse_error(
                line_num,
                "Invalid JSON array for CMD",
                Some(r#"Use double quotes: CMD ["executable", "arg"]"#),
            ));
        }
        None => vec!["/bin/sh".to_string(), "-c".to_string(), rest.to_string()],
    };

    Ok(vec![Instruction::Cmd { args }])
}
