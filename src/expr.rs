use crate::error::{DocWinError, Result};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use std::collections::HashMap;
use std::fmt;

/// Variable values available when resolving expressions.
/// Threaded explicitly through the call chain; there is no ambient context.
#[derive(Debug, Clone, Default)]
pub struct EvalContext {
    vars: HashMap<String, String>,
}

impl EvalContext {
    pub fn new() -> Self {
        EvalContext::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(name.into(), value.into());
        self
    }

    pub fn put(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(|s| s.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Segment {
    Literal(String),
    Var(String),
}

/// A pre-compiled SQL template with `@Name@` placeholders.
///
/// Compiled once (typically at descriptor build time) and resolved per query
/// against an [`EvalContext`]. `@@` escapes a literal `@`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SqlExpression {
    segments: Vec<Segment>,
}

impl SqlExpression {
    pub fn constant(sql: impl Into<String>) -> Self {
        let sql = sql.into();
        let segments = if sql.is_empty() {
            Vec::new()
        } else {
            vec![Segment::Literal(sql)]
        };
        SqlExpression { segments }
    }

    pub fn compile(source: &str) -> Result<Self> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut rest = source;

        while let Some(start) = rest.find('@') {
            literal.push_str(&rest[..start]);
            rest = &rest[start + 1..];

            if let Some(stripped) = rest.strip_prefix('@') {
                literal.push('@');
                rest = stripped;
                continue;
            }

            let end = rest.find('@').ok_or_else(|| {
                DocWinError::Expression(format!("Unterminated variable in '{source}'"))
            })?;
            let name = &rest[..end];
            if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '#')
            {
                return Err(DocWinError::Expression(format!(
                    "Invalid variable name '{name}' in '{source}'"
                )));
            }

            if !literal.is_empty() {
                segments.push(Segment::Literal(std::mem::take(&mut literal)));
            }
            segments.push(Segment::Var(name.to_string()));
            rest = &rest[end + 1..];
        }

        literal.push_str(rest);
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(SqlExpression { segments })
    }

    pub fn is_constant(&self) -> bool {
        self.segments
            .iter()
            .all(|s| matches!(s, Segment::Literal(_)))
    }

    pub fn variable_names(&self) -> Vec<&str> {
        self.segments
            .iter()
            .filter_map(|s| match s {
                Segment::Var(name) => Some(name.as_str()),
                Segment::Literal(_) => None,
            })
            .collect()
    }

    /// Resolve all placeholders. Fails if a variable is missing from the context.
    pub fn resolve(&self, ctx: &EvalContext) -> Result<String> {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Var(name) => {
                    let value = ctx.get(name).ok_or_else(|| {
                        DocWinError::Expression(format!("Variable '@{name}@' not found in context"))
                    })?;
                    out.push_str(value);
                }
            }
        }
        Ok(out)
    }

    /// Resolve only the given placeholders, leaving the others in place.
    pub fn resolve_partial(&self, vars: &HashMap<&str, String>) -> SqlExpression {
        let mut segments = Vec::with_capacity(self.segments.len());
        for segment in &self.segments {
            match segment {
                Segment::Var(name) => match vars.get(name.as_str()) {
                    Some(value) => segments.push(Segment::Literal(value.clone())),
                    None => segments.push(segment.clone()),
                },
                Segment::Literal(_) => segments.push(segment.clone()),
            }
        }
        // Merge adjacent literals so equality stays structural
        let mut merged: Vec<Segment> = Vec::with_capacity(segments.len());
        for segment in segments {
            match (merged.last_mut(), segment) {
                (Some(Segment::Literal(prev)), Segment::Literal(text)) => prev.push_str(&text),
                (_, segment) => merged.push(segment),
            }
        }
        SqlExpression { segments: merged }
    }

    /// Concatenate expressions, merging adjacent literal segments.
    pub fn concat(parts: impl IntoIterator<Item = SqlExpression>) -> SqlExpression {
        let mut merged: Vec<Segment> = Vec::new();
        for part in parts {
            for segment in part.segments {
                match (merged.last_mut(), segment) {
                    (Some(Segment::Literal(prev)), Segment::Literal(text)) => prev.push_str(&text),
                    (_, segment) => merged.push(segment),
                }
            }
        }
        SqlExpression { segments: merged }
    }

    /// This expression wrapped in literal text, e.g. `(` ... `) AS alias`.
    pub fn surrounded(&self, prefix: &str, suffix: &str) -> SqlExpression {
        let mut segments = Vec::with_capacity(self.segments.len() + 2);
        if !prefix.is_empty() {
            segments.push(Segment::Literal(prefix.to_string()));
        }
        segments.extend(self.segments.iter().cloned());
        if !suffix.is_empty() {
            segments.push(Segment::Literal(suffix.to_string()));
        }
        SqlExpression { segments }
    }

    /// Check that this expression, with every placeholder replaced by NULL,
    /// parses as a SQL WHERE condition.
    pub fn validate_as_where_clause(&self) -> Result<()> {
        let mut clause = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => clause.push_str(text),
                Segment::Var(_) => clause.push_str("NULL"),
            }
        }

        let sql = format!("SELECT * FROM t WHERE {clause}");
        let dialect = GenericDialect {};
        Parser::parse_sql(&dialect, &sql)
            .map_err(|e| DocWinError::Expression(format!("Not a valid WHERE clause: {e}")))?;
        Ok(())
    }
}

impl fmt::Display for SqlExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => f.write_str(text)?,
                Segment::Var(name) => write!(f, "@{name}@")?,
            }
        }
        Ok(())
    }
}

/// Result of evaluating a [`LogicExpression`], keeping the expression text
/// for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicResult {
    value: bool,
    name: String,
}

impl LogicResult {
    pub fn named_constant(name: impl Into<String>, value: bool) -> Self {
        LogicResult {
            value,
            name: name.into(),
        }
    }

    pub fn is_true(&self) -> bool {
        self.value
    }

    pub fn is_false(&self) -> bool {
        !self.value
    }
}

impl fmt::Display for LogicResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogicJoin {
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct LogicComparison {
    variable: String,
    negate: bool,
    value: String,
}

impl LogicComparison {
    fn evaluate(&self, ctx: &EvalContext) -> bool {
        // A missing variable never matches
        let matches = ctx.get(&self.variable).map(|v| v == self.value);
        match matches {
            Some(eq) => eq != self.negate,
            None => false,
        }
    }
}

/// A boolean expression over document field values, e.g.
/// `@Processed@=N & @DocStatus@!=VO`. Terms are joined left to right with
/// `&` (and) or `|` (or); values may be single-quoted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicExpression {
    source: String,
    constant: Option<bool>,
    first: Option<LogicComparison>,
    rest: Vec<(LogicJoin, LogicComparison)>,
}

impl LogicExpression {
    pub fn constant(value: bool) -> Self {
        LogicExpression {
            source: value.to_string(),
            constant: Some(value),
            first: None,
            rest: Vec::new(),
        }
    }

    pub fn parse(source: &str) -> Result<Self> {
        let trimmed = source.trim();
        if trimmed.eq_ignore_ascii_case("true") {
            return Ok(LogicExpression::constant(true));
        }
        if trimmed.eq_ignore_ascii_case("false") {
            return Ok(LogicExpression::constant(false));
        }

        let mut first = None;
        let mut rest = Vec::new();
        let mut pending_join = None;

        let mut remaining = trimmed;
        loop {
            let (term, tail) = match remaining.find(['&', '|']) {
                Some(pos) => {
                    let join = if remaining.as_bytes()[pos] == b'&' {
                        LogicJoin::And
                    } else {
                        LogicJoin::Or
                    };
                    (&remaining[..pos], Some((join, &remaining[pos + 1..])))
                }
                None => (remaining, None),
            };

            let comparison = Self::parse_comparison(term, source)?;
            match pending_join {
                None => first = Some(comparison),
                Some(join) => rest.push((join, comparison)),
            }

            match tail {
                Some((join, tail)) => {
                    pending_join = Some(join);
                    remaining = tail;
                }
                None => break,
            }
        }

        Ok(LogicExpression {
            source: trimmed.to_string(),
            constant: None,
            first,
            rest,
        })
    }

    fn parse_comparison(term: &str, source: &str) -> Result<LogicComparison> {
        let term = term.trim();
        let (variable, negate, value) = if let Some((left, right)) = term.split_once("!=") {
            (left, true, right)
        } else if let Some((left, right)) = term.split_once('=') {
            (left, false, right)
        } else {
            return Err(DocWinError::Expression(format!(
                "Invalid logic term '{term}' in '{source}'"
            )));
        };

        let variable = variable
            .trim()
            .strip_prefix('@')
            .and_then(|v| v.strip_suffix('@'))
            .ok_or_else(|| {
                DocWinError::Expression(format!(
                    "Logic term '{term}' in '{source}' must compare a @Variable@"
                ))
            })?;

        let value = value.trim();
        let value = value
            .strip_prefix('\'')
            .and_then(|v| v.strip_suffix('\''))
            .unwrap_or(value);

        Ok(LogicComparison {
            variable: variable.to_string(),
            negate,
            value: value.to_string(),
        })
    }

    /// Evaluate left to right against the given context.
    pub fn evaluate(&self, ctx: &EvalContext) -> LogicResult {
        if let Some(value) = self.constant {
            return LogicResult::named_constant(&self.source, value);
        }

        let mut value = match &self.first {
            Some(comparison) => comparison.evaluate(ctx),
            None => false,
        };
        for (join, comparison) in &self.rest {
            value = match join {
                LogicJoin::And => value && comparison.evaluate(ctx),
                LogicJoin::Or => value || comparison.evaluate(ctx),
            };
        }

        LogicResult::named_constant(&self.source, value)
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}
