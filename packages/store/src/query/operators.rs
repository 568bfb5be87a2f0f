//! Shorthand constructors for [`Criterion`] values.

use std::sync::Arc;

use common::RawValue;
use sea_orm::sea_query::Expr;

use super::filter::{CompareOp, Criterion};

pub fn eq(value: impl Into<RawValue>) -> Criterion {
    Criterion::Eq(value.into())
}

pub fn ne(value: impl Into<RawValue>) -> Criterion {
    Criterion::Compare(CompareOp::Ne, value.into())
}

pub fn gt(value: impl Into<RawValue>) -> Criterion {
    Criterion::Compare(CompareOp::Gt, value.into())
}

pub fn ge(value: impl Into<RawValue>) -> Criterion {
    Criterion::Compare(CompareOp::Ge, value.into())
}

pub fn lt(value: impl Into<RawValue>) -> Criterion {
    Criterion::Compare(CompareOp::Lt, value.into())
}

pub fn le(value: impl Into<RawValue>) -> Criterion {
    Criterion::Compare(CompareOp::Le, value.into())
}

/// Inclusive on both ends.
pub fn between(lo: impl Into<RawValue>, hi: impl Into<RawValue>) -> Criterion {
    Criterion::Between(lo.into(), hi.into())
}

pub fn like(pattern: impl Into<String>) -> Criterion {
    Criterion::Like(pattern.into())
}

pub fn any_of<I, C>(items: I) -> Criterion
where
    I: IntoIterator<Item = C>,
    C: Into<Criterion>,
{
    Criterion::AnyOf(items.into_iter().map(Into::into).collect())
}

/// Wrap a clause builder that receives the value column.
pub fn clause<F>(build: F) -> Criterion
where
    F: Fn(Expr) -> Expr + Send + Sync + 'static,
{
    Criterion::Clause(Arc::new(build))
}
