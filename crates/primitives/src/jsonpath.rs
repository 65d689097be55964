//! kubectl-style JSONPath subset.
//!
//! Supported grammar: `{}` (whole document), `{.key}`, `{.a.b}`,
//! `{.list[0]}`, `{.list[*].k}`. A `[*]` step maps the remaining steps over
//! every array element and collects the elements that match, the way
//! `kubectl -o jsonpath` does.

use serde_json::Value;

/// Errors while parsing a path expression.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum JsonPathError {
    #[error("expression must be wrapped in braces, e.g. {{.spec.replicas}}")]
    MissingBraces,
    #[error("empty key at offset {0}")]
    EmptyKey(usize),
    #[error("invalid array index at offset {0}")]
    InvalidIndex(usize),
    #[error("unexpected character {ch:?} at offset {pos}")]
    UnexpectedChar { pos: usize, ch: char },
}

/// Errors while evaluating a parsed path against a document.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum EvalError {
    #[error("{0} is not an object")]
    NotAnObject(String),
    #[error("{0} is not an array")]
    NotAnArray(String),
    #[error("key {0} not found")]
    MissingKey(String),
    #[error("index {index} out of bounds at {path} (len {len})")]
    OutOfBounds {
        path: String,
        index: usize,
        len: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Step {
    Key(String),
    Index(usize),
    Wildcard,
}

/// A parsed path expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonPath {
    steps: Vec<Step>,
}

impl JsonPath {
    /// Parses an expression. `{}` parses to the identity path.
    pub fn parse(expression: &str) -> Result<Self, JsonPathError> {
        let trimmed = expression.trim();
        let inner = trimmed
            .strip_prefix('{')
            .and_then(|rest| rest.strip_suffix('}'))
            .ok_or(JsonPathError::MissingBraces)?;

        let mut steps = Vec::new();
        let chars: Vec<char> = inner.chars().collect();
        let mut pos = 0;
        while pos < chars.len() {
            match chars[pos] {
                '.' => {
                    let start = pos + 1;
                    let mut end = start;
                    while end < chars.len() && chars[end] != '.' && chars[end] != '[' {
                        end += 1;
                    }
                    if end == start {
                        return Err(JsonPathError::EmptyKey(start));
                    }
                    steps.push(Step::Key(chars[start..end].iter().collect()));
                    pos = end;
                }
                '[' => {
                    let start = pos + 1;
                    let mut end = start;
                    while end < chars.len() && chars[end] != ']' {
                        end += 1;
                    }
                    if end == chars.len() {
                        return Err(JsonPathError::InvalidIndex(start));
                    }
                    let body: String = chars[start..end].iter().collect();
                    if body == "*" {
                        steps.push(Step::Wildcard);
                    } else {
                        let index = body
                            .parse::<usize>()
                            .map_err(|_| JsonPathError::InvalidIndex(start))?;
                        steps.push(Step::Index(index));
                    }
                    pos = end + 1;
                }
                ch => return Err(JsonPathError::UnexpectedChar { pos, ch }),
            }
        }
        Ok(Self { steps })
    }

    /// Evaluates the path, returning the selected subtree.
    pub fn evaluate(&self, document: &Value) -> Result<Value, EvalError> {
        eval(&self.steps, document, String::from("$"))
    }
}

fn eval(steps: &[Step], value: &Value, path: String) -> Result<Value, EvalError> {
    let Some((step, rest)) = steps.split_first() else {
        return Ok(value.clone());
    };
    match step {
        Step::Key(key) => {
            let object = value.as_object().ok_or_else(|| EvalError::NotAnObject(path.clone()))?;
            let child = object
                .get(key)
                .ok_or_else(|| EvalError::MissingKey(format!("{path}.{key}")))?;
            eval(rest, child, format!("{path}.{key}"))
        }
        Step::Index(index) => {
            let array = value.as_array().ok_or_else(|| EvalError::NotAnArray(path.clone()))?;
            let child = array.get(*index).ok_or_else(|| EvalError::OutOfBounds {
                path: path.clone(),
                index: *index,
                len: array.len(),
            })?;
            eval(rest, child, format!("{path}[{index}]"))
        }
        Step::Wildcard => {
            let array = value.as_array().ok_or_else(|| EvalError::NotAnArray(path.clone()))?;
            let mut collected = Vec::new();
            for (index, element) in array.iter().enumerate() {
                // Elements that don't match the remaining path are skipped,
                // matching kubectl semantics for [*] projections.
                if let Ok(projected) = eval(rest, element, format!("{path}[{index}]")) {
                    collected.push(projected);
                }
            }
            Ok(Value::Array(collected))
        }
    }
}
