//! In-memory query backend over a promtool JSON dump
//!
//! `promtool query instant -o json` (and the Prometheus API `result` array)
//! produce a list of `{"metric": {...}, "value": [ts, "v"]}` objects. This
//! backend loads such a dump and evaluates the narrow PromQL subset the
//! workload queries use:
//!
//! ```text
//! metric{label="v", label!="v", label=~"re", label!~"re"}
//! sum(<selector>)
//! sum(<selector>) by (label, ...)
//! ```
//!
//! Timestamps in the dump are ignored; the dump is one snapshot.

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Deserialize;
use tracing::debug;

use super::{QueryApi, QueryResponse, QueryValue, Sample};
use crate::{Error, Result};

const METRIC_NAME_LABEL: &str = "__name__";

/// One entry of a promtool JSON dump
#[derive(Clone, Debug, Deserialize)]
pub struct PromtoolSample {
    /// Series labels, including `__name__`
    pub metric: BTreeMap<String, String>,
    /// `[timestamp, "value"]`
    pub value: (serde_json::Value, String),
}

impl PromtoolSample {
    fn into_sample(self) -> Result<Sample> {
        let value: f64 = self.value.1.parse().map_err(|e| {
            Error::query(format!("invalid sample value '{}': {}", self.value.1, e))
        })?;
        Ok(Sample {
            labels: self.metric,
            value,
        })
    }
}

/// Query backend evaluating expressions against samples held in memory
#[derive(Clone, Debug, Default)]
pub struct FileQueryApi {
    samples: Vec<Sample>,
}

impl FileQueryApi {
    /// Backend over an already-decoded sample set
    pub fn from_samples(samples: Vec<Sample>) -> Self {
        Self { samples }
    }

    /// Parse a promtool JSON dump
    pub fn from_json(json: &str) -> Result<Self> {
        let raw: Vec<PromtoolSample> = serde_json::from_str(json)
            .map_err(|e| Error::query(format!("failed to parse sample file: {}", e)))?;
        let samples = raw
            .into_iter()
            .map(PromtoolSample::into_sample)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { samples })
    }

    /// Load a promtool JSON dump from disk
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path).map_err(|e| {
            Error::query(format!("failed to read {}: {}", path.display(), e))
        })?;
        let api = Self::from_json(&data)?;
        debug!(path = %path.display(), samples = api.samples.len(), "loaded sample file");
        Ok(api)
    }

    /// Number of raw samples loaded
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether no samples were loaded
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    fn evaluate(&self, expr: &Expr) -> Vec<Sample> {
        match expr {
            Expr::Selector(selector) => self
                .samples
                .iter()
                .filter(|s| selector.matches(s))
                .cloned()
                .collect(),
            Expr::Sum { selector, by } => {
                let mut groups: BTreeMap<BTreeMap<String, String>, f64> = BTreeMap::new();
                for sample in self.samples.iter().filter(|s| selector.matches(s)) {
                    let key: BTreeMap<String, String> = by
                        .iter()
                        .filter_map(|l| sample.label(l).map(|v| (l.clone(), v.to_string())))
                        .collect();
                    *groups.entry(key).or_insert(0.0) += sample.value;
                }
                groups
                    .into_iter()
                    .map(|(labels, value)| Sample { labels, value })
                    .collect()
            }
        }
    }
}

#[async_trait]
impl QueryApi for FileQueryApi {
    async fn query(&self, query: &str, _time: DateTime<Utc>) -> Result<QueryResponse> {
        let expr = Parser::new(query).parse()?;
        Ok(QueryResponse::new(QueryValue::Vector(self.evaluate(&expr))))
    }
}

// =============================================================================
// Expression Parsing
// =============================================================================

#[derive(Debug)]
enum Expr {
    Selector(Selector),
    Sum { selector: Selector, by: Vec<String> },
}

#[derive(Debug)]
struct Selector {
    metric: Option<String>,
    matchers: Vec<Matcher>,
}

impl Selector {
    fn matches(&self, sample: &Sample) -> bool {
        if let Some(metric) = &self.metric {
            if sample.label(METRIC_NAME_LABEL) != Some(metric.as_str()) {
                return false;
            }
        }
        self.matchers
            .iter()
            .all(|m| m.matches(sample.label_or_empty(&m.label)))
    }
}

#[derive(Debug)]
struct Matcher {
    label: String,
    op: MatchOp,
}

#[derive(Debug)]
enum MatchOp {
    Equal(String),
    NotEqual(String),
    Regex(Regex),
    NotRegex(Regex),
}

impl Matcher {
    fn matches(&self, value: &str) -> bool {
        match &self.op {
            MatchOp::Equal(v) => value == v,
            MatchOp::NotEqual(v) => value != v,
            MatchOp::Regex(re) => re.is_match(value),
            MatchOp::NotRegex(re) => !re.is_match(value),
        }
    }
}

/// Recursive-descent parser for the supported PromQL subset
struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn parse(mut self) -> Result<Expr> {
        self.skip_ws();
        let expr = if self.peek_keyword("sum") {
            self.pos += 3;
            self.expect('(')?;
            let selector = self.selector()?;
            self.expect(')')?;
            self.skip_ws();
            let by = if self.peek_keyword("by") {
                self.pos += 2;
                self.label_list()?
            } else {
                vec![]
            };
            Expr::Sum { selector, by }
        } else {
            Expr::Selector(self.selector()?)
        };

        self.skip_ws();
        if self.pos != self.input.len() {
            return Err(self.error("unexpected trailing input"));
        }
        Ok(expr)
    }

    fn selector(&mut self) -> Result<Selector> {
        self.skip_ws();
        let metric = if self.peek() == Some('{') {
            None
        } else {
            Some(self.ident()?)
        };

        self.skip_ws();
        let mut matchers = Vec::new();
        if self.peek() == Some('{') {
            self.pos += 1;
            loop {
                self.skip_ws();
                if self.peek() == Some('}') {
                    self.pos += 1;
                    break;
                }
                matchers.push(self.matcher()?);
                self.skip_ws();
                match self.next() {
                    Some(',') => continue,
                    Some('}') => break,
                    _ => return Err(self.error("expected ',' or '}' in label matchers")),
                }
            }
        }

        if metric.is_none() && matchers.is_empty() {
            return Err(self.error("selector must name a metric or a label matcher"));
        }
        Ok(Selector { metric, matchers })
    }

    fn matcher(&mut self) -> Result<Matcher> {
        let label = self.ident()?;
        self.skip_ws();
        let rest = &self.input[self.pos..];
        let (op_len, kind) = if rest.starts_with("=~") {
            (2, "=~")
        } else if rest.starts_with("!~") {
            (2, "!~")
        } else if rest.starts_with("!=") {
            (2, "!=")
        } else if rest.starts_with('=') {
            (1, "=")
        } else {
            return Err(self.error("expected label match operator"));
        };
        self.pos += op_len;
        self.skip_ws();
        let value = self.string()?;

        let op = match kind {
            "=" => MatchOp::Equal(value),
            "!=" => MatchOp::NotEqual(value),
            "=~" => MatchOp::Regex(anchored_regex(&value)?),
            _ => MatchOp::NotRegex(anchored_regex(&value)?),
        };
        Ok(Matcher { label, op })
    }

    fn label_list(&mut self) -> Result<Vec<String>> {
        self.expect('(')?;
        let mut labels = Vec::new();
        loop {
            self.skip_ws();
            if self.peek() == Some(')') {
                self.pos += 1;
                break;
            }
            labels.push(self.ident()?);
            self.skip_ws();
            match self.next() {
                Some(',') => continue,
                Some(')') => break,
                _ => return Err(self.error("expected ',' or ')' in grouping labels")),
            }
        }
        Ok(labels)
    }

    fn ident(&mut self) -> Result<String> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == '_' || c == ':' {
                self.pos += c.len_utf8();
            } else {
                break;
            }
        }
        if start == self.pos {
            return Err(self.error("expected identifier"));
        }
        Ok(self.input[start..self.pos].to_string())
    }

    fn string(&mut self) -> Result<String> {
        self.expect('"')?;
        let mut out = String::new();
        loop {
            match self.next() {
                Some('"') => return Ok(out),
                Some('\\') => match self.next() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some(c) => out.push(c),
                    None => break,
                },
                Some(c) => out.push(c),
                None => break,
            }
        }
        Err(self.error("unterminated string"))
    }

    fn expect(&mut self, want: char) -> Result<()> {
        self.skip_ws();
        match self.next() {
            Some(c) if c == want => Ok(()),
            _ => Err(self.error(&format!("expected '{}'", want))),
        }
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        let rest = &self.input[self.pos..];
        rest.starts_with(keyword)
            && !rest[keyword.len()..]
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
    }

    fn peek(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn next(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_ws(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.pos += c.len_utf8();
            } else {
                break;
            }
        }
    }

    fn error(&self, msg: &str) -> Error {
        Error::query(format!(
            "failed to parse query at position {}: {} in {:?}",
            self.pos, msg, self.input
        ))
    }
}

fn anchored_regex(pattern: &str) -> Result<Regex> {
    Regex::new(&format!("^(?:{})$", pattern))
        .map_err(|e| Error::query(format!("invalid regex '{}': {}", pattern, e)))
}
