//! Expression tree of a parsed LogQL query.
//!
//! The engine receives queries already parsed; this module only models the
//! tree, renders it back to canonical query text and answers the structural
//! questions the engine asks (which selectors does it touch, does it sort,
//! does it fold to a constant).

use std::fmt::{Display, Formatter};
use std::time::Duration;

use crate::error::{QueryError, Result};
use crate::labels::{LabelMatcher, Labels, MatchType};

/// Any parsed query.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A stream selector returning log lines.
    Log(LogSelectorExpr),
    /// A metric expression returning samples.
    Sample(SampleExpr),
    /// `variants(...) of (...)`.
    Variants(VariantsExpr),
}

impl Display for Expr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Expr::Log(e) => e.fmt(f),
            Expr::Sample(e) => e.fmt(f),
            Expr::Variants(e) => e.fmt(f),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineFilterOp {
    Contains,
    NotContains,
    Match,
    NotMatch,
}

/// A stage of a log pipeline. Stages are executed by the querier; the engine
/// only carries them through to the selector string.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineStage {
    LineFilter { op: LineFilterOp, pattern: String },
    /// `| logfmt`, `| json` and friends.
    Parser(String),
    /// `| level="error"` style label filters, kept verbatim.
    LabelFilter(String),
}

impl Display for PipelineStage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineStage::LineFilter { op, pattern } => {
                let op = match op {
                    LineFilterOp::Contains => "|=",
                    LineFilterOp::NotContains => "!=",
                    LineFilterOp::Match => "|~",
                    LineFilterOp::NotMatch => "!~",
                };
                write!(f, "{op} {pattern:?}")
            }
            PipelineStage::Parser(name) => write!(f, "| {name}"),
            PipelineStage::LabelFilter(filter) => write!(f, "| {filter}"),
        }
    }
}

/// `{app="foo"} |= "bar" | logfmt`
#[derive(Debug, Clone, PartialEq)]
pub struct LogSelectorExpr {
    pub matchers: Vec<LabelMatcher>,
    pub pipeline: Vec<PipelineStage>,
}

impl LogSelectorExpr {
    pub fn new(matchers: Vec<LabelMatcher>) -> Self {
        Self {
            matchers,
            pipeline: Vec::new(),
        }
    }

    pub fn with_stage(mut self, stage: PipelineStage) -> Self {
        self.pipeline.push(stage);
        self
    }

    /// Labels pinned by the equality matchers of the selector.
    pub fn static_labels(&self) -> Labels {
        Labels::from_pairs(
            self.matchers
                .iter()
                .filter(|m| m.match_type == MatchType::Equal)
                .map(|m| (m.name.clone(), m.value.clone())),
        )
    }
}

impl Display for LogSelectorExpr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{")?;
        for (i, m) in self.matchers.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{m}")?;
        }
        write!(f, "}}")?;
        for stage in &self.pipeline {
            write!(f, " {stage}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnwrapConversion {
    Bytes,
    Duration,
    DurationSeconds,
}

/// `| unwrap latency` or `| unwrap bytes(size)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unwrap {
    pub identifier: String,
    pub conversion: Option<UnwrapConversion>,
}

impl Display for Unwrap {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.conversion {
            None => write!(f, "| unwrap {}", self.identifier),
            Some(UnwrapConversion::Bytes) => write!(f, "| unwrap bytes({})", self.identifier),
            Some(UnwrapConversion::Duration) => {
                write!(f, "| unwrap duration({})", self.identifier)
            }
            Some(UnwrapConversion::DurationSeconds) => {
                write!(f, "| unwrap duration_seconds({})", self.identifier)
            }
        }
    }
}

/// A log selector over a time window: `{app="foo"} | unwrap x [5m] offset 1m`.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRangeExpr {
    pub selector: LogSelectorExpr,
    pub interval: Duration,
    pub offset: Duration,
    pub unwrap: Option<Unwrap>,
}

impl LogRangeExpr {
    pub fn new(selector: LogSelectorExpr, interval: Duration) -> Self {
        Self {
            selector,
            interval,
            offset: Duration::ZERO,
            unwrap: None,
        }
    }

    pub fn with_offset(mut self, offset: Duration) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_unwrap(mut self, identifier: impl Into<String>) -> Self {
        self.unwrap = Some(Unwrap {
            identifier: identifier.into(),
            conversion: None,
        });
        self
    }
}

impl Display for LogRangeExpr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.selector)?;
        if let Some(unwrap) = &self.unwrap {
            write!(f, " {unwrap}")?;
        }
        write!(f, " [{}]", format_duration(self.interval))?;
        if !self.offset.is_zero() {
            write!(f, " offset {}", format_duration(self.offset))?;
        }
        Ok(())
    }
}

/// Functions turning a window of samples into one value per series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeOp {
    CountOverTime,
    Rate,
    RateCounter,
    BytesOverTime,
    BytesRate,
    FirstOverTime,
    LastOverTime,
    AbsentOverTime,
    SumOverTime,
    AvgOverTime,
    MinOverTime,
    MaxOverTime,
    StddevOverTime,
    StdvarOverTime,
    QuantileOverTime,
}

impl RangeOp {
    pub fn name(self) -> &'static str {
        match self {
            RangeOp::CountOverTime => "count_over_time",
            RangeOp::Rate => "rate",
            RangeOp::RateCounter => "rate_counter",
            RangeOp::BytesOverTime => "bytes_over_time",
            RangeOp::BytesRate => "bytes_rate",
            RangeOp::FirstOverTime => "first_over_time",
            RangeOp::LastOverTime => "last_over_time",
            RangeOp::AbsentOverTime => "absent_over_time",
            RangeOp::SumOverTime => "sum_over_time",
            RangeOp::AvgOverTime => "avg_over_time",
            RangeOp::MinOverTime => "min_over_time",
            RangeOp::MaxOverTime => "max_over_time",
            RangeOp::StddevOverTime => "stddev_over_time",
            RangeOp::StdvarOverTime => "stdvar_over_time",
            RangeOp::QuantileOverTime => "quantile_over_time",
        }
    }

    /// Functions that only make sense over unwrapped values.
    pub fn requires_unwrap(self) -> bool {
        matches!(
            self,
            RangeOp::RateCounter
                | RangeOp::FirstOverTime
                | RangeOp::LastOverTime
                | RangeOp::SumOverTime
                | RangeOp::AvgOverTime
                | RangeOp::MinOverTime
                | RangeOp::MaxOverTime
                | RangeOp::StddevOverTime
                | RangeOp::StdvarOverTime
                | RangeOp::QuantileOverTime
        )
    }
}

/// `by (a, b)` or `without (a, b)`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Grouping {
    pub without: bool,
    pub labels: Vec<String>,
}

impl Grouping {
    pub fn by<S: Into<String>>(labels: impl IntoIterator<Item = S>) -> Self {
        Self {
            without: false,
            labels: labels.into_iter().map(Into::into).collect(),
        }
    }

    pub fn without<S: Into<String>>(labels: impl IntoIterator<Item = S>) -> Self {
        Self {
            without: true,
            labels: labels.into_iter().map(Into::into).collect(),
        }
    }

    /// Reduces a label set to its group key.
    pub fn apply(&self, labels: &Labels) -> Labels {
        if self.without {
            labels.drop_names(&self.labels)
        } else {
            labels.keep(&self.labels)
        }
    }
}

impl Display for Grouping {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let kw = if self.without { "without" } else { "by" };
        write!(f, "{kw} ({})", self.labels.join(", "))
    }
}

/// `rate({app="foo"}[1m])`
#[derive(Debug, Clone, PartialEq)]
pub struct RangeAggregationExpr {
    pub left: LogRangeExpr,
    pub op: RangeOp,
    pub grouping: Option<Grouping>,
    /// φ of `quantile_over_time`.
    pub param: Option<f64>,
}

impl Display for RangeAggregationExpr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}(", self.op.name())?;
        if let Some(param) = self.param {
            write!(f, "{param}, ")?;
        }
        write!(f, "{})", self.left)?;
        if let Some(grouping) = &self.grouping {
            write!(f, " {grouping}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorOp {
    Sum,
    Avg,
    Min,
    Max,
    Count,
    Stddev,
    Stdvar,
    Topk,
    Bottomk,
    Sort,
    SortDesc,
}

impl VectorOp {
    pub fn name(self) -> &'static str {
        match self {
            VectorOp::Sum => "sum",
            VectorOp::Avg => "avg",
            VectorOp::Min => "min",
            VectorOp::Max => "max",
            VectorOp::Count => "count",
            VectorOp::Stddev => "stddev",
            VectorOp::Stdvar => "stdvar",
            VectorOp::Topk => "topk",
            VectorOp::Bottomk => "bottomk",
            VectorOp::Sort => "sort",
            VectorOp::SortDesc => "sort_desc",
        }
    }
}

/// `sum by (app) (...)`, `topk(2, ...)`.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorAggregationExpr {
    pub left: Box<SampleExpr>,
    pub op: VectorOp,
    pub grouping: Option<Grouping>,
    /// k of topk/bottomk.
    pub param: Option<usize>,
}

impl Display for VectorAggregationExpr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.op.name())?;
        if let Some(grouping) = &self.grouping {
            write!(f, " {grouping} ")?;
        }
        write!(f, "(")?;
        if let Some(k) = self.param {
            write!(f, "{k}, ")?;
        }
        write!(f, "{})", self.left)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Unless,
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Or => "or",
            BinaryOp::And => "and",
            BinaryOp::Unless => "unless",
            BinaryOp::Eq => "==",
            BinaryOp::Neq => "!=",
            BinaryOp::Gt => ">",
            BinaryOp::Gte => ">=",
            BinaryOp::Lt => "<",
            BinaryOp::Lte => "<=",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Pow => "^",
        }
    }

    /// Binding strength; higher binds tighter.
    pub fn precedence(self) -> u8 {
        match self {
            BinaryOp::Or => 1,
            BinaryOp::And | BinaryOp::Unless => 2,
            BinaryOp::Eq
            | BinaryOp::Neq
            | BinaryOp::Gt
            | BinaryOp::Gte
            | BinaryOp::Lt
            | BinaryOp::Lte => 3,
            BinaryOp::Add | BinaryOp::Sub => 4,
            BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => 5,
            BinaryOp::Pow => 6,
        }
    }

    pub fn is_right_associative(self) -> bool {
        self == BinaryOp::Pow
    }

    pub fn is_comparison(self) -> bool {
        self.precedence() == 3
    }

    pub fn is_set_operator(self) -> bool {
        self.precedence() <= 2
    }

    /// Applies the operator to two values.
    ///
    /// Returns the resulting value and whether the element survives. Only
    /// comparisons can reject; they yield the left value when they keep it.
    /// Division and modulo by zero yield NaN.
    pub fn eval(self, lhs: f64, rhs: f64) -> (f64, bool) {
        match self {
            BinaryOp::Add => (lhs + rhs, true),
            BinaryOp::Sub => (lhs - rhs, true),
            BinaryOp::Mul => (lhs * rhs, true),
            BinaryOp::Div if rhs == 0.0 => (f64::NAN, true),
            BinaryOp::Div => (lhs / rhs, true),
            BinaryOp::Mod if rhs == 0.0 => (f64::NAN, true),
            BinaryOp::Mod => (lhs % rhs, true),
            BinaryOp::Pow => (lhs.powf(rhs), true),
            BinaryOp::Eq => (lhs, lhs == rhs),
            BinaryOp::Neq => (lhs, lhs != rhs),
            BinaryOp::Gt => (lhs, lhs > rhs),
            BinaryOp::Gte => (lhs, lhs >= rhs),
            BinaryOp::Lt => (lhs, lhs < rhs),
            BinaryOp::Lte => (lhs, lhs <= rhs),
            BinaryOp::Or | BinaryOp::And | BinaryOp::Unless => (lhs, true),
        }
    }
}

/// How the two sides of a vector/vector operation pair up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Cardinality {
    #[default]
    OneToOne,
    /// `group_left`
    ManyToOne,
    /// `group_right`
    OneToMany,
    /// Set operators.
    ManyToMany,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VectorMatching {
    pub card: Cardinality,
    /// `on(...)` when true, `ignoring(...)` otherwise.
    pub on: bool,
    pub matching_labels: Vec<String>,
    /// Labels copied from the "one" side under group_left/group_right.
    pub include: Vec<String>,
}

impl VectorMatching {
    pub fn on<S: Into<String>>(labels: impl IntoIterator<Item = S>) -> Self {
        Self {
            on: true,
            matching_labels: labels.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn ignoring<S: Into<String>>(labels: impl IntoIterator<Item = S>) -> Self {
        Self {
            on: false,
            matching_labels: labels.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn group_left<S: Into<String>>(mut self, include: impl IntoIterator<Item = S>) -> Self {
        self.card = Cardinality::ManyToOne;
        self.include = include.into_iter().map(Into::into).collect();
        self
    }

    pub fn group_right<S: Into<String>>(mut self, include: impl IntoIterator<Item = S>) -> Self {
        self.card = Cardinality::OneToMany;
        self.include = include.into_iter().map(Into::into).collect();
        self
    }
}

impl Display for VectorMatching {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let kw = if self.on { "on" } else { "ignoring" };
        if self.on || !self.matching_labels.is_empty() {
            write!(f, "{kw} ({}) ", self.matching_labels.join(", "))?;
        }
        match self.card {
            Cardinality::ManyToOne => write!(f, "group_left ({}) ", self.include.join(", ")),
            Cardinality::OneToMany => write!(f, "group_right ({}) ", self.include.join(", ")),
            Cardinality::OneToOne | Cardinality::ManyToMany => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct BinOpOptions {
    pub return_bool: bool,
    pub vector_matching: Option<VectorMatching>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BinOpExpr {
    pub lhs: Box<SampleExpr>,
    pub rhs: Box<SampleExpr>,
    pub op: BinaryOp,
    pub opts: BinOpOptions,
}

impl Display for BinOpExpr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let prec = self.op.precedence();
        let right_assoc = self.op.is_right_associative();
        let wrap_lhs = match self.lhs.as_ref() {
            SampleExpr::BinOp(l) => {
                l.op.precedence() < prec || (right_assoc && l.op.precedence() == prec)
            }
            _ => false,
        };
        let wrap_rhs = match self.rhs.as_ref() {
            SampleExpr::BinOp(r) => {
                r.op.precedence() < prec || (!right_assoc && r.op.precedence() == prec)
            }
            _ => false,
        };
        if wrap_lhs {
            write!(f, "({})", self.lhs)?;
        } else {
            write!(f, "{}", self.lhs)?;
        }
        write!(f, " {} ", self.op.symbol())?;
        if self.opts.return_bool {
            write!(f, "bool ")?;
        }
        if let Some(matching) = &self.opts.vector_matching {
            write!(f, "{matching}")?;
        }
        if wrap_rhs {
            write!(f, "({})", self.rhs)
        } else {
            write!(f, "{}", self.rhs)
        }
    }
}

/// `label_replace(v, "dst", "replacement", "src", "regex")`
#[derive(Debug, Clone, PartialEq)]
pub struct LabelReplaceExpr {
    pub left: Box<SampleExpr>,
    pub dst: String,
    pub replacement: String,
    pub src: String,
    pub regex: String,
}

impl Display for LabelReplaceExpr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "label_replace({}, {:?}, {:?}, {:?}, {:?})",
            self.left, self.dst, self.replacement, self.src, self.regex
        )
    }
}

/// Expressions evaluating to samples.
#[derive(Debug, Clone, PartialEq)]
pub enum SampleExpr {
    RangeAggregation(RangeAggregationExpr),
    VectorAggregation(VectorAggregationExpr),
    BinOp(BinOpExpr),
    Literal(f64),
    /// `vector(2)`
    Vector(f64),
    LabelReplace(LabelReplaceExpr),
}

impl SampleExpr {
    pub fn range(op: RangeOp, left: LogRangeExpr) -> Self {
        SampleExpr::RangeAggregation(RangeAggregationExpr {
            left,
            op,
            grouping: None,
            param: None,
        })
    }

    pub fn aggregate(op: VectorOp, grouping: Option<Grouping>, left: SampleExpr) -> Self {
        SampleExpr::VectorAggregation(VectorAggregationExpr {
            left: Box::new(left),
            op,
            grouping,
            param: None,
        })
    }

    /// topk/bottomk.
    pub fn select_k(op: VectorOp, k: usize, grouping: Option<Grouping>, left: SampleExpr) -> Self {
        SampleExpr::VectorAggregation(VectorAggregationExpr {
            left: Box::new(left),
            op,
            grouping,
            param: Some(k),
        })
    }

    pub fn binary(op: BinaryOp, lhs: SampleExpr, rhs: SampleExpr) -> Self {
        Self::binary_with(op, BinOpOptions::default(), lhs, rhs)
    }

    pub fn binary_with(op: BinaryOp, opts: BinOpOptions, lhs: SampleExpr, rhs: SampleExpr) -> Self {
        SampleExpr::BinOp(BinOpExpr {
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
            op,
            opts,
        })
    }

    /// Pre-order traversal.
    pub fn walk<'a>(&'a self, f: &mut dyn FnMut(&'a SampleExpr)) {
        f(self);
        match self {
            SampleExpr::VectorAggregation(e) => e.left.walk(f),
            SampleExpr::BinOp(e) => {
                e.lhs.walk(f);
                e.rhs.walk(f);
            }
            SampleExpr::LabelReplace(e) => e.left.walk(f),
            SampleExpr::RangeAggregation(_) | SampleExpr::Literal(_) | SampleExpr::Vector(_) => {}
        }
    }

    /// Every log range the expression reads from.
    pub fn log_ranges(&self) -> Vec<&LogRangeExpr> {
        let mut ranges = Vec::new();
        self.walk(&mut |e| {
            if let SampleExpr::RangeAggregation(r) = e {
                ranges.push(&r.left);
            }
        });
        ranges
    }

    /// True when the expression orders its output by value, in which case
    /// instant results must not be re-sorted by labels.
    pub fn is_sortable(&self) -> bool {
        let mut sortable = false;
        self.walk(&mut |e| {
            if let SampleExpr::VectorAggregation(agg) = e
                && matches!(agg.op, VectorOp::Sort | VectorOp::SortDesc)
            {
                sortable = true;
            }
        });
        sortable
    }

    /// Reduces a tree made only of literals to its value.
    ///
    /// Comparisons between scalars always produce 0 or 1.
    pub fn fold_literal(&self) -> Option<f64> {
        match self {
            SampleExpr::Literal(v) => Some(*v),
            SampleExpr::BinOp(e) if !e.op.is_set_operator() => {
                let lhs = e.lhs.fold_literal()?;
                let rhs = e.rhs.fold_literal()?;
                let (value, keep) = e.op.eval(lhs, rhs);
                if e.op.is_comparison() {
                    Some(if keep { 1.0 } else { 0.0 })
                } else {
                    Some(value)
                }
            }
            _ => None,
        }
    }

    /// Structural checks the evaluator relies on.
    pub fn validate(&self) -> Result<()> {
        let mut err = None;
        self.walk(&mut |e| {
            if err.is_some() {
                return;
            }
            match e {
                SampleExpr::RangeAggregation(r) => {
                    if r.op.requires_unwrap() && r.left.unwrap.is_none() {
                        err = Some(QueryError::InvalidQuery(format!(
                            "invalid aggregation {} without unwrap",
                            r.op.name()
                        )));
                    } else if r.op == RangeOp::QuantileOverTime {
                        match r.param {
                            Some(q) if (0.0..=1.0).contains(&q) => {}
                            _ => {
                                err = Some(QueryError::InvalidQuery(
                                    "quantile_over_time requires a parameter between 0 and 1"
                                        .to_string(),
                                ))
                            }
                        }
                    } else if r.grouping.is_some() && !r.op.requires_unwrap() {
                        err = Some(QueryError::InvalidQuery(format!(
                            "grouping not allowed for {} aggregation",
                            r.op.name()
                        )));
                    }
                }
                SampleExpr::VectorAggregation(agg) => {
                    if matches!(agg.op, VectorOp::Topk | VectorOp::Bottomk) && agg.param.is_none()
                    {
                        err = Some(QueryError::InvalidQuery(format!(
                            "parameter required for operation {}",
                            agg.op.name()
                        )));
                    }
                }
                SampleExpr::BinOp(b) => {
                    let scalar_side = b.lhs.fold_literal().is_some() || b.rhs.fold_literal().is_some();
                    if b.op.is_set_operator() && scalar_side {
                        err = Some(QueryError::InvalidQuery(format!(
                            "set operator {} not allowed in binary scalar expression",
                            b.op.symbol()
                        )));
                    }
                }
                SampleExpr::LabelReplace(lr) => {
                    if let Err(e) = regex::Regex::new(&lr.regex) {
                        err = Some(QueryError::InvalidQuery(format!(
                            "invalid regular expression in label_replace(): {e}"
                        )));
                    }
                }
                SampleExpr::Literal(_) | SampleExpr::Vector(_) => {}
            }
        });
        err.map_or(Ok(()), Err)
    }
}

impl Display for SampleExpr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            SampleExpr::RangeAggregation(e) => e.fmt(f),
            SampleExpr::VectorAggregation(e) => e.fmt(f),
            SampleExpr::BinOp(e) => e.fmt(f),
            SampleExpr::Literal(v) => write!(f, "{v}"),
            SampleExpr::Vector(v) => write!(f, "vector({v})"),
            SampleExpr::LabelReplace(e) => e.fmt(f),
        }
    }
}

/// `variants(count_over_time(...), bytes_over_time(...)) of ({app="foo"}[1m])`
#[derive(Debug, Clone, PartialEq)]
pub struct VariantsExpr {
    pub variants: Vec<SampleExpr>,
    pub log_range: LogRangeExpr,
}

impl VariantsExpr {
    /// The shared range plus every range referenced by a variant.
    pub fn log_ranges(&self) -> Vec<&LogRangeExpr> {
        let mut ranges = vec![&self.log_range];
        for variant in &self.variants {
            ranges.extend(variant.log_ranges());
        }
        ranges
    }
}

impl Display for VariantsExpr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "variants(")?;
        for (i, v) in self.variants.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{v}")?;
        }
        write!(f, ") of ({})", self.log_range)
    }
}

/// Renders a duration the way Prometheus prints one: `1h30m`, `2d`, `2w`.
pub fn format_duration(d: Duration) -> String {
    const SEC: u128 = 1000;
    const MIN: u128 = 60 * SEC;
    const HOUR: u128 = 60 * MIN;
    const DAY: u128 = 24 * HOUR;
    const WEEK: u128 = 7 * DAY;
    const YEAR: u128 = 365 * DAY;

    let mut ms = d.as_millis();
    if ms == 0 {
        return "0s".to_string();
    }

    let mut out = String::new();
    // years and weeks only when they divide the duration exactly
    for (unit, mult, exact) in [
        ("y", YEAR, true),
        ("w", WEEK, true),
        ("d", DAY, false),
        ("h", HOUR, false),
        ("m", MIN, false),
        ("s", SEC, false),
        ("ms", 1, false),
    ] {
        if exact && ms % mult != 0 {
            continue;
        }
        let v = ms / mult;
        if v > 0 {
            out.push_str(&format!("{v}{unit}"));
            ms -= v * mult;
        }
    }
    out
}
