//! Typed directives.
//!
//! A `Layer` stores its directive as `{kind, value}` strings; the executor
//! works on the closed `Instruction` enum parsed from it.

use strata_core::{Result, StrataError};

use super::types::{Layer, LayerKind};

/// A single build directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    /// `FROM <image>`
    From { image: String },
    /// `COPY <src> <dst>`
    Copy { src: String, dst: String },
    /// `RUN <command>`
    Run { command: String },
    /// `CMD <command>`: runtime command, skipped by lite builds
    Cmd { command: String },
    /// `ENV <key>=<value>` or `ENV <key> <value>`
    Env { key: String, value: String },
    /// `LABEL <key>=<value>`
    Label { key: String, value: String },
    /// `WORKDIR <path>`
    Workdir { path: String },
}

impl Instruction {
    /// Parse a layer's value according to its kind.
    pub fn parse(layer: &Layer) -> Result<Self> {
        let value = layer.value.trim();
        if value.is_empty() {
            return Err(StrataError::ValidationError(format!(
                "{} requires an argument",
                layer.kind
            )));
        }

        match layer.kind {
            LayerKind::From => Ok(Instruction::From {
                image: first_word(value).to_string(),
            }),
            LayerKind::Copy => {
                let (src, dst) = parse_copy_value(value)?;
                Ok(Instruction::Copy { src, dst })
            }
            LayerKind::Run => Ok(Instruction::Run {
                command: value.to_string(),
            }),
            LayerKind::Cmd => Ok(Instruction::Cmd {
                command: value.to_string(),
            }),
            LayerKind::Env => {
                let (key, value) = parse_key_value(value);
                Ok(Instruction::Env { key, value })
            }
            LayerKind::Label => {
                let (key, value) = parse_key_value(value);
                Ok(Instruction::Label { key, value })
            }
            LayerKind::Workdir => Ok(Instruction::Workdir {
                path: value.to_string(),
            }),
            LayerKind::Base => Err(StrataError::ValidationError(
                "BASE layers are produced by the builder, not executed".to_string(),
            )),
        }
    }

    pub fn kind(&self) -> LayerKind {
        match self {
            Self::From { .. } => LayerKind::From,
            Self::Copy { .. } => LayerKind::Copy,
            Self::Run { .. } => LayerKind::Run,
            Self::Cmd { .. } => LayerKind::Cmd,
            Self::Env { .. } => LayerKind::Env,
            Self::Label { .. } => LayerKind::Label,
            Self::Workdir { .. } => LayerKind::Workdir,
        }
    }
}

/// Split a COPY value into source pattern and destination.
///
/// Only the first two whitespace-separated fields are significant.
fn parse_copy_value(value: &str) -> Result<(String, String)> {
    let mut fields = value.split_whitespace();
    match (fields.next(), fields.next()) {
        (Some(src), Some(dst)) => Ok((src.to_string(), dst.to_string())),
        _ => Err(StrataError::ValidationError(format!(
            "COPY requires a source and a destination, got '{}'",
            value
        ))),
    }
}

/// `KEY=VALUE` (value may be quoted) or legacy `KEY VALUE`.
fn parse_key_value(rest: &str) -> (String, String) {
    if let Some(eq_pos) = rest.find('=') {
        let space_pos = rest.find(char::is_whitespace);
        if space_pos.map_or(true, |sp| eq_pos < sp) {
            let key = rest[..eq_pos].trim().to_string();
            let value = unquote(&rest[eq_pos + 1..]);
            return (key, value);
        }
    }

    let (key, value) = split_first_word(rest);
    (key.to_string(), unquote(value))
}

fn first_word(s: &str) -> &str {
    split_first_word(s).0
}

/// Split a string into the first word and the rest.
pub(crate) fn split_first_word(s: &str) -> (&str, &str) {
    let s = s.trim();
    match s.find(char::is_whitespace) {
        Some(pos) => (&s[..pos], s[pos..].trim_start()),
        None => (s, ""),
    }
}

/// Remove surrounding quotes from a string.
fn unquote(s: &str) -> String {
    let s = s.trim();
    if s.len() >= 2
        && ((s.starts_with('"') && s.ends_with('"')) || (s.starts_with('\'') && s.ends_with('\'')))
    {
        s[1..s.len() - 1].to_string()
    } else {
        s.to_string()
    }
}
