//! Kubefile parser.
//!
//! Parses a Kubefile into the raw image spec: a leading FROM layer followed
//! by one layer per directive, all without ids. Supports line continuations
//! (`\`), comments, and the JSON exec form for RUN/CMD.

use strata_core::{Result, StrataError};

use super::instruction::{split_first_word, Instruction};
use super::types::{Image, ImageSpec, Layer, LayerKind};

/// Parsed Kubefile: the directive layers in order.
#[derive(Debug, Clone)]
pub struct Kubefile {
    pub layers: Vec<Layer>,
}

impl Kubefile {
    /// Parse a Kubefile from its text content.
    pub fn parse(content: &str) -> Result<Self> {
        let mut layers = Vec::new();

        for (line_num, line) in join_continuation_lines(content) {
            let trimmed = line.trim();

            // Skip empty lines and comments
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            layers.push(parse_line(trimmed, line_num)?);
        }

        match layers.first() {
            None => {
                return Err(StrataError::ParseError {
                    line: 0,
                    message: "Kubefile is empty or contains no instructions".to_string(),
                })
            }
            Some(first) if first.kind != LayerKind::From => {
                return Err(StrataError::ParseError {
                    line: 1,
                    message: "First instruction must be FROM".to_string(),
                })
            }
            _ => {}
        }

        if layers.iter().skip(1).any(|l| l.kind == LayerKind::From) {
            return Err(StrataError::ParseError {
                line: 0,
                message: "Only one FROM is supported".to_string(),
            });
        }

        Ok(Kubefile { layers })
    }

    /// Parse a Kubefile from a file path.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            StrataError::ValidationError(format!(
                "Failed to read Kubefile at {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::parse(&content)
    }

    /// The unbuilt image this Kubefile describes.
    pub fn into_image(self, name: impl Into<String>) -> Image {
        Image {
            name: name.into(),
            id: None,
            spec: ImageSpec {
                layers: self.layers,
                ..Default::default()
            },
        }
    }
}

/// Join lines ending with `\` into single logical lines.
///
/// Each logical line carries the 1-based number of its first physical line.
fn join_continuation_lines(content: &str) -> Vec<(usize, String)> {
    let mut logical_lines = Vec::new();
    let mut current = String::new();
    let mut start = 0;

    for (idx, line) in content.lines().enumerate() {
        if current.is_empty() {
            start = idx + 1;
        }
        if let Some(stripped) = line.strip_suffix('\\') {
            current.push_str(stripped.trim_end());
            current.push(' ');
        } else {
            current.push_str(line);
            logical_lines.push((start, std::mem::take(&mut current)));
        }
    }

    // Handle trailing continuation without final line
    if !current.is_empty() {
        logical_lines.push((start, current));
    }

    logical_lines
}

/// Parse a single logical line into a layer, validating its value.
fn parse_line(line: &str, line_num: usize) -> Result<Layer> {
    let (keyword, rest) = split_first_word(line);
    let kind: LayerKind = keyword.parse().map_err(|_| StrataError::ParseError {
        line: line_num,
        message: format!("Unknown instruction '{}'", keyword),
    })?;

    if kind == LayerKind::Base {
        return Err(StrataError::ParseError {
            line: line_num,
            message: "BASE cannot be used in a Kubefile".to_string(),
        });
    }

    let value = match kind {
        LayerKind::Run | LayerKind::Cmd if rest.starts_with('[') => {
            shell_words::join(parse_json_array(rest, line_num)?)
        }
        _ => rest.to_string(),
    };

    let layer = Layer::new(kind, value);
    Instruction::parse(&layer).map_err(|e| StrataError::ParseError {
        line: line_num,
        message: e.to_string(),
    })?;
    Ok(layer)
}

/// Parse a JSON array string like `["a", "b", "c"]` into a Vec<String>.
fn parse_json_array(s: &str, line_num: usize) -> Result<Vec<String>> {
    serde_json::from_str(s).map_err(|e| StrataError::ParseError {
        line: line_num,
        message: format!("Invalid JSON array '{}': {}", s, e),
    })
}
