use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime};
use common::{ParameterKind, RawValue, TypeSchema, Value};
use sea_orm::sea_query::{Expr, Query as SeaQuery};
use sea_orm::{ColumnTrait, Condition, DbBackend};

use crate::entity::{entities, parameter};
use crate::error::{Result, StoreError};

/// Caller-supplied clause builder. Receives the value column and returns a
/// boolean SQL expression over it.
pub type ClauseFn = Arc<dyn Fn(Expr) -> Expr + Send + Sync>;

/// Per-call options of a flat search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FindOptions {
    /// When false, string literals match as substrings.
    pub strict: bool,
    /// When true, string literals given for non-string parameters are
    /// parsed with the parameter kind's text format. A date parameter then
    /// also matches a partial `YYYY`, `YYYY-MM` or `YYYY-MM-DD`.
    pub convert_string: bool,
}

impl Default for FindOptions {
    fn default() -> Self {
        Self {
            strict: true,
            convert_string: false,
        }
    }
}

impl FindOptions {
    pub fn substring() -> Self {
        Self {
            strict: false,
            ..Self::default()
        }
    }

    pub fn converting() -> Self {
        Self {
            convert_string: true,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl CompareOp {
    fn holds(self, ordering: Ordering) -> bool {
        match self {
            Self::Ne => ordering != Ordering::Equal,
            Self::Gt => ordering == Ordering::Greater,
            Self::Ge => ordering != Ordering::Less,
            Self::Lt => ordering == Ordering::Less,
            Self::Le => ordering != Ordering::Greater,
        }
    }
}

/// One condition on a single parameter or entity attribute.
#[derive(Clone)]
pub enum Criterion {
    /// Equality. String literals containing `%` or `_` match as LIKE
    /// patterns.
    Eq(RawValue),
    /// Logical OR over the inner criteria.
    AnyOf(Vec<Criterion>),
    Compare(CompareOp, RawValue),
    /// Inclusive range.
    Between(RawValue, RawValue),
    /// SQL LIKE pattern, string parameters only.
    Like(String),
    /// Custom clause. Only usable in database searches.
    Clause(ClauseFn),
}

impl fmt::Debug for Criterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Eq(v) => f.debug_tuple("Eq").field(v).finish(),
            Self::AnyOf(items) => f.debug_tuple("AnyOf").field(items).finish(),
            Self::Compare(op, v) => f.debug_tuple("Compare").field(op).field(v).finish(),
            Self::Between(lo, hi) => f.debug_tuple("Between").field(lo).field(hi).finish(),
            Self::Like(p) => f.debug_tuple("Like").field(p).finish(),
            Self::Clause(_) => f.write_str("Clause(<fn>)"),
        }
    }
}

macro_rules! criterion_from {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Criterion {
                fn from(value: $ty) -> Self {
                    Criterion::Eq(RawValue::from(value))
                }
            }
        )*
    };
}

criterion_from!(
    &str,
    String,
    i64,
    i32,
    f64,
    bool,
    NaiveDate,
    NaiveTime,
    NaiveDateTime
);

impl From<RawValue> for Criterion {
    fn from(value: RawValue) -> Self {
        Criterion::Eq(value)
    }
}

impl From<Vec<Criterion>> for Criterion {
    fn from(items: Vec<Criterion>) -> Self {
        Criterion::AnyOf(items)
    }
}

/// Conjunction of criteria keyed by parameter name.
///
/// Keys starting with `_` (`_id`, `_unique_id`, `_parent_id`) address entity
/// attributes. The bare forms `id`, `unique_id` and `parent_id` do the same
/// unless the type declares a parameter of that name.
#[derive(Clone, Debug, Default)]
pub struct Filter {
    criteria: Vec<(String, Criterion)>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, criterion: impl Into<Criterion>) -> Self {
        self.criteria.push((key.into(), criterion.into()));
        self
    }

    pub fn push(&mut self, key: impl Into<String>, criterion: impl Into<Criterion>) {
        self.criteria.push((key.into(), criterion.into()));
    }

    pub fn is_empty(&self) -> bool {
        self.criteria.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Criterion)> {
        self.criteria.iter().map(|(k, c)| (k.as_str(), c))
    }
}

impl<K: Into<String>, C: Into<Criterion>> FromIterator<(K, C)> for Filter {
    fn from_iter<I: IntoIterator<Item = (K, C)>>(iter: I) -> Self {
        Self {
            criteria: iter
                .into_iter()
                .map(|(k, c)| (k.into(), c.into()))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attribute {
    Id,
    UniqueId,
    ParentId,
}

impl Attribute {
    fn column(self) -> entities::Column {
        match self {
            Self::Id => entities::Column::Id,
            Self::UniqueId => entities::Column::UniqueId,
            Self::ParentId => entities::Column::ParentId,
        }
    }

    pub fn kind(self) -> ParameterKind {
        match self {
            Self::Id | Self::ParentId => ParameterKind::Integer,
            Self::UniqueId => ParameterKind::String,
        }
    }
}

/// What a filter key refers to on a given type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKey {
    Param(ParameterKind),
    Attribute(Attribute),
}

/// Resolve `key` against `schema`. Declared parameters win over the bare
/// attribute names.
pub fn resolve_key(schema: &TypeSchema, key: &str) -> Option<FilterKey> {
    if let Some(kind) = schema.kind_of(key) {
        return Some(FilterKey::Param(kind));
    }
    match key.strip_prefix('_').unwrap_or(key) {
        "id" => Some(FilterKey::Attribute(Attribute::Id)),
        "unique_id" => Some(FilterKey::Attribute(Attribute::UniqueId)),
        "parent_id" => Some(FilterKey::Attribute(Attribute::ParentId)),
        _ => None,
    }
}

/// A literal after coercion to the compared kind.
enum Literal {
    Value(Value),
    Pattern(String),
    PartialDate(Vec<u32>),
    Null,
}

fn string_literal(text: String, options: FindOptions) -> Literal {
    if !options.strict {
        Literal::Pattern(format!("%{text}%"))
    } else if text.contains(['%', '_']) {
        Literal::Pattern(text)
    } else {
        Literal::Value(Value::String(text))
    }
}

fn literal(key: &str, kind: ParameterKind, raw: &RawValue, options: FindOptions) -> Result<Literal> {
    match (kind, raw) {
        (_, RawValue::Null) => Ok(Literal::Null),
        (ParameterKind::String, RawValue::Text(text)) => Ok(string_literal(text.clone(), options)),
        (_, RawValue::Text(text)) if options.convert_string => match kind.parse(text) {
            Ok(value) => Ok(Literal::Value(value)),
            Err(err) if kind == ParameterKind::Date => {
                partial_date(text).map(Literal::PartialDate).ok_or(err.into())
            }
            Err(err) => Err(err.into()),
        },
        _ => Ok(Literal::Value(kind.coerce(key, raw.clone())?)),
    }
}

/// Exact comparison value; patterns and partial dates are rejected.
fn bound(key: &str, kind: ParameterKind, raw: &RawValue, options: FindOptions) -> Result<Value> {
    let exact = FindOptions {
        strict: true,
        ..options
    };
    match literal(key, kind, raw, exact)? {
        Literal::Value(value) => Ok(value),
        _ => Err(StoreError::Filter(format!(
            "'{key}' needs a comparable {kind} value, got {}",
            raw.describe()
        ))),
    }
}

/// `YYYY`, `YYYY-MM` or `YYYY-MM-DD` split into numbers.
fn partial_date(text: &str) -> Option<Vec<u32>> {
    let parts: Vec<u32> = text
        .trim()
        .split('-')
        .map(|p| p.parse::<u32>().ok())
        .collect::<Option<_>>()?;
    let valid = match parts.as_slice() {
        [_year] => true,
        [_year, month] => (1..=12).contains(month),
        [_year, month, day] => (1..=12).contains(month) && (1..=31).contains(day),
        _ => false,
    };
    valid.then_some(parts)
}

fn db_value(value: &Value) -> sea_orm::Value {
    match value {
        Value::String(s) => s.clone().into(),
        Value::Integer(i) => (*i).into(),
        Value::Float(f) => (*f).into(),
        Value::Date(d) => (*d).into(),
        Value::Time(t) => (*t).into(),
        Value::DateTime(dt) => (*dt).into(),
        Value::Boolean(b) => (*b).into(),
    }
}

/// Compiles criteria into SQL conditions for one backend.
pub struct Compiler {
    backend: DbBackend,
    options: FindOptions,
}

impl Compiler {
    pub fn new(backend: DbBackend, options: FindOptions) -> Self {
        Self { backend, options }
    }

    /// Condition selecting entities of `identity` that satisfy every
    /// criterion of `filter`.
    pub fn compile(&self, identity: &str, schema: &TypeSchema, filter: &Filter) -> Result<Condition> {
        let mut condition = Condition::all().add(entities::Column::TypeName.eq(identity));

        for (key, criterion) in filter.iter() {
            let resolved = resolve_key(schema, key).ok_or_else(|| StoreError::UnknownParameter {
                type_name: identity.to_string(),
                param: key.to_string(),
            })?;

            condition = match resolved {
                FilterKey::Attribute(attribute) => condition.add(self.attribute_condition(
                    key,
                    attribute,
                    criterion,
                )?),
                FilterKey::Param(kind) => {
                    let column = parameter::value_column(kind);
                    let values = self.criterion(key, kind, column, criterion)?;
                    condition.add(
                        entities::Column::Id.in_subquery(
                            SeaQuery::select()
                                .column(parameter::Column::EntityId)
                                .from(parameter::Entity)
                                .and_where(parameter::Column::Name.eq(key))
                                .cond_where(values)
                                .to_owned(),
                        ),
                    )
                }
            };
        }
        Ok(condition)
    }

    fn attribute_condition(
        &self,
        key: &str,
        attribute: Attribute,
        criterion: &Criterion,
    ) -> Result<Condition> {
        self.criterion(key, attribute.kind(), attribute.column(), criterion)
    }

    fn criterion<Col: ColumnTrait>(
        &self,
        key: &str,
        kind: ParameterKind,
        column: Col,
        criterion: &Criterion,
    ) -> Result<Condition> {
        let expr = match criterion {
            Criterion::Eq(raw) => match literal(key, kind, raw, self.options)? {
                Literal::Value(value) => column.eq(db_value(&value)),
                Literal::Pattern(pattern) => self.like(column, &pattern),
                Literal::PartialDate(parts) => return Ok(self.partial_date(column, &parts)),
                Literal::Null => column.is_null(),
            },
            Criterion::AnyOf(items) => {
                let mut any = Condition::any();
                for item in items {
                    any = any.add(self.criterion(key, kind, column, item)?);
                }
                return Ok(any);
            }
            Criterion::Compare(op, raw) => {
                let value = db_value(&bound(key, kind, raw, self.options)?);
                match op {
                    CompareOp::Ne => column.ne(value),
                    CompareOp::Gt => column.gt(value),
                    CompareOp::Ge => column.gte(value),
                    CompareOp::Lt => column.lt(value),
                    CompareOp::Le => column.lte(value),
                }
            }
            Criterion::Between(lo, hi) => column.between(
                db_value(&bound(key, kind, lo, self.options)?),
                db_value(&bound(key, kind, hi, self.options)?),
            ),
            Criterion::Like(pattern) => {
                if kind != ParameterKind::String {
                    return Err(StoreError::Filter(format!(
                        "LIKE needs a string parameter, '{key}' is {kind}"
                    )));
                }
                self.like(column, pattern)
            }
            Criterion::Clause(build) => build(Expr::col(column)),
        };
        Ok(Condition::all().add(expr))
    }

    /// Case-sensitive LIKE with `\\` as the escape character, the same
    /// semantics as [`like_match`]. SQLite's LIKE ignores ASCII case, so
    /// there the pattern runs as a GLOB.
    fn like<Col: ColumnTrait>(&self, column: Col, pattern: &str) -> Expr {
        match self.backend {
            DbBackend::Sqlite => Expr::cust_with_values(
                format!("\"{}\" GLOB ?", column.as_str()),
                [glob_pattern(pattern)],
            ),
            _ => column.like(pattern),
        }
    }

    /// Match the year, month and day parts a partial date gives.
    fn partial_date<Col: ColumnTrait>(&self, column: Col, parts: &[u32]) -> Condition {
        let column_name = column.as_str().to_string();
        let mut condition = Condition::all();

        for (part, value) in ["year", "month", "day"].iter().zip(parts) {
            let sql = match self.backend {
                DbBackend::Postgres => format!("CAST(date_part('{part}', \"{column_name}\") AS INTEGER) = ?"),
                _ => {
                    let format = match *part {
                        "year" => "%Y",
                        "month" => "%m",
                        _ => "%d",
                    };
                    format!("CAST(strftime('{format}', \"{column_name}\") AS INTEGER) = ?")
                }
            };
            condition = condition.add(Expr::cust_with_values(sql, [i64::from(*value)]));
        }
        condition
    }
}

/// Evaluate a criterion against an in-memory value. `None` never matches
/// anything but a null literal.
pub fn matches(
    key: &str,
    kind: ParameterKind,
    value: Option<&Value>,
    criterion: &Criterion,
    options: FindOptions,
) -> Result<bool> {
    match criterion {
        Criterion::AnyOf(items) => {
            for item in items {
                if matches(key, kind, value, item, options)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Criterion::Clause(_) => Err(StoreError::Filter(format!(
            "custom clause on '{key}' can only run inside a database search"
        ))),
        Criterion::Eq(raw) => {
            let literal = literal(key, kind, raw, options)?;
            let Some(value) = value else {
                return Ok(matches!(literal, Literal::Null));
            };
            Ok(match literal {
                Literal::Null => false,
                Literal::Value(expected) => value.compare(&expected) == Some(Ordering::Equal),
                Literal::Pattern(pattern) => match value {
                    Value::String(s) => like_match(&pattern, s),
                    _ => false,
                },
                Literal::PartialDate(parts) => match value {
                    Value::Date(d) => {
                        let actual = [d.year() as u32, d.month(), d.day()];
                        parts.iter().zip(actual).all(|(want, got)| *want == got)
                    }
                    _ => false,
                },
            })
        }
        Criterion::Compare(op, raw) => {
            let expected = bound(key, kind, raw, options)?;
            Ok(value
                .and_then(|v| v.compare(&expected))
                .is_some_and(|ordering| op.holds(ordering)))
        }
        Criterion::Between(lo, hi) => {
            let lo = bound(key, kind, lo, options)?;
            let hi = bound(key, kind, hi, options)?;
            Ok(value.is_some_and(|v| {
                v.compare(&lo).is_some_and(|o| o != Ordering::Less)
                    && v.compare(&hi).is_some_and(|o| o != Ordering::Greater)
            }))
        }
        Criterion::Like(pattern) => match value {
            Some(Value::String(s)) => Ok(like_match(pattern, s)),
            Some(_) => Err(StoreError::Filter(format!(
                "LIKE needs a string parameter, '{key}' is {kind}"
            ))),
            None => Ok(false),
        },
    }
}

/// Rewrite a LIKE pattern as an equivalent SQLite GLOB pattern.
fn glob_pattern(pattern: &str) -> String {
    let mut glob = String::with_capacity(pattern.len());
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        let literal = match c {
            '%' => {
                glob.push('*');
                continue;
            }
            '_' => {
                glob.push('?');
                continue;
            }
            '\\' => chars.next().unwrap_or('\\'),
            c => c,
        };
        match literal {
            '*' | '?' | '[' => {
                glob.push('[');
                glob.push(literal);
                glob.push(']');
            }
            c => glob.push(c),
        }
    }
    glob
}

/// SQL LIKE semantics: `%` matches any run, `_` one character and `\`
/// escapes the next character. Case-sensitive.
pub fn like_match(pattern: &str, text: &str) -> bool {
    enum Token {
        Any,
        One,
        Char(char),
    }

    let mut tokens = Vec::new();
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        tokens.push(match c {
            '%' => Token::Any,
            '_' => Token::One,
            '\\' => Token::Char(chars.next().unwrap_or('\\')),
            c => Token::Char(c),
        });
    }

    let text: Vec<char> = text.chars().collect();
    // reachable[j]: the tokens consumed so far can match text[..j]
    let mut reachable = vec![false; text.len() + 1];
    reachable[0] = true;

    for token in &tokens {
        let mut next = vec![false; text.len() + 1];
        match token {
            Token::Any => {
                let mut seen = false;
                for j in 0..=text.len() {
                    seen |= reachable[j];
                    next[j] = seen;
                }
            }
            Token::One => {
                for j in 0..text.len() {
                    next[j + 1] = reachable[j];
                }
            }
            Token::Char(c) => {
                for j in 0..text.len() {
                    next[j + 1] = reachable[j] && text[j] == *c;
                }
            }
        }
        reachable = next;
    }
    reachable[text.len()]
}
