use std::fmt::Display;

use accurate::{sum::Klein, traits::*};
use num::complex::Complex64;

#[cfg(feature = "rayon")]
use rayon::prelude::*;

use crate::{ArborError, ArborResult};

/// Whether a node produces real or complex numbers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Domain {
    Real,
    Complex,
}

impl Domain {
    /// The domain of a value combining inputs from `self` and `other`.
    pub fn join(self, other: Domain) -> Domain {
        match (self, other) {
            (Domain::Real, Domain::Real) => Domain::Real,
            _ => Domain::Complex,
        }
    }
}

/// The shape of a node's output.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Shape {
    /// A single number.
    Scalar,
    /// One entry per event of whichever [`DataSet`](crate::data::DataSet) the tree is bound to.
    Batch,
    /// A batch of constant length which does not depend on the bound data, such as a
    /// phase-space sample used for normalization integrals.
    Fixed(usize),
}

impl Shape {
    /// The shape of an elementwise combination of `self` and `other`, or a structural error if
    /// the two shapes can never agree.
    pub fn join(self, other: Shape) -> ArborResult<Shape> {
        match (self, other) {
            (Shape::Scalar, s) | (s, Shape::Scalar) => Ok(s),
            (Shape::Batch, Shape::Batch) => Ok(Shape::Batch),
            (Shape::Fixed(a), Shape::Fixed(b)) if a == b => Ok(Shape::Fixed(a)),
            (a, b) => Err(ArborError::structural(format!(
                "cannot combine a {} with a {} elementwise",
                a, b
            ))),
        }
    }
}

impl Display for Shape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Shape::Scalar => write!(f, "scalar"),
            Shape::Batch => write!(f, "batch"),
            Shape::Fixed(n) => write!(f, "batch[{}]", n),
        }
    }
}

/// The static type of a node, determined when the node is inserted into a tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ValueType {
    pub shape: Shape,
    pub domain: Domain,
}

impl ValueType {
    pub fn new(shape: Shape, domain: Domain) -> Self {
        Self { shape, domain }
    }
    pub fn real_scalar() -> Self {
        Self::new(Shape::Scalar, Domain::Real)
    }
    pub fn is_real(&self) -> bool {
        self.domain == Domain::Real
    }
    pub fn is_scalar(&self) -> bool {
        self.shape == Shape::Scalar
    }
    pub fn with_domain(self, domain: Domain) -> Self {
        Self { domain, ..self }
    }
    pub fn with_shape(self, shape: Shape) -> Self {
        Self { shape, ..self }
    }
}

impl Display for ValueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.domain {
            Domain::Real => write!(f, "real {}", self.shape),
            Domain::Complex => write!(f, "complex {}", self.shape),
        }
    }
}

/// The cached output of a node.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Real(f64),
    Complex(Complex64),
    RealBatch(Vec<f64>),
    ComplexBatch(Vec<Complex64>),
}

impl Value {
    /// The number of entries for a batch, or `None` for a scalar.
    pub fn batch_len(&self) -> Option<usize> {
        match self {
            Value::Real(_) | Value::Complex(_) => None,
            Value::RealBatch(v) => Some(v.len()),
            Value::ComplexBatch(v) => Some(v.len()),
        }
    }
    pub fn domain(&self) -> Domain {
        match self {
            Value::Real(_) | Value::RealBatch(_) => Domain::Real,
            Value::Complex(_) | Value::ComplexBatch(_) => Domain::Complex,
        }
    }
    /// Get a real scalar, if this is one.
    pub fn as_real(&self) -> Option<f64> {
        match self {
            Value::Real(v) => Some(*v),
            _ => None,
        }
    }
    /// Get a real batch, if this is one.
    pub fn as_real_batch(&self) -> Option<&[f64]> {
        match self {
            Value::RealBatch(v) => Some(v),
            _ => None,
        }
    }
    /// Get a scalar of either domain as a complex number.
    pub fn as_complex(&self) -> Option<Complex64> {
        match self {
            Value::Real(v) => Some(Complex64::new(*v, 0.0)),
            Value::Complex(v) => Some(*v),
            _ => None,
        }
    }
    /// Convert into a real batch of length `n`, broadcasting a real scalar.
    pub fn into_real_batch(self, n: usize) -> ArborResult<Vec<f64>> {
        match self {
            Value::Real(v) => Ok(vec![v; n]),
            Value::RealBatch(v) if v.len() == n => Ok(v),
            Value::RealBatch(v) => Err(ArborError::structural(format!(
                "expected a batch of {} values but found {}",
                n,
                v.len()
            ))),
            _ => Err(ArborError::structural(
                "expected a real value but found a complex one",
            )),
        }
    }
    pub(crate) fn real_view(&self) -> RealView<'_> {
        match self {
            Value::Real(v) => RealView::Scalar(*v),
            Value::RealBatch(v) => RealView::Batch(v),
            Value::Complex(v) => RealView::Scalar(v.re),
            Value::ComplexBatch(v) => RealView::Re(v),
        }
    }
    pub(crate) fn complex_view(&self) -> ComplexView<'_> {
        match self {
            Value::Real(v) => ComplexView::Scalar(Complex64::new(*v, 0.0)),
            Value::Complex(v) => ComplexView::Scalar(*v),
            Value::RealBatch(v) => ComplexView::Real(v),
            Value::ComplexBatch(v) => ComplexView::Batch(v),
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Real(v) => write!(f, "{}", v),
            Value::Complex(v) => write!(f, "{}", v),
            Value::RealBatch(v) => write!(f, "[{} real values]", v.len()),
            Value::ComplexBatch(v) => write!(f, "[{} complex values]", v.len()),
        }
    }
}

/// A read-only view of a real input, indexable per event. Complex inputs are viewed through
/// their real part.
#[derive(Clone, Copy)]
pub(crate) enum RealView<'a> {
    Scalar(f64),
    Batch(&'a [f64]),
    Re(&'a [Complex64]),
}

impl RealView<'_> {
    #[inline]
    pub(crate) fn at(&self, i: usize) -> f64 {
        match self {
            RealView::Scalar(v) => *v,
            RealView::Batch(v) => v[i],
            RealView::Re(v) => v[i].re,
        }
    }
    pub(crate) fn batch_len(&self) -> Option<usize> {
        match self {
            RealView::Scalar(_) => None,
            RealView::Batch(v) => Some(v.len()),
            RealView::Re(v) => Some(v.len()),
        }
    }
}

/// A read-only view of an input of either domain, indexable per event as a complex number.
#[derive(Clone, Copy)]
pub(crate) enum ComplexView<'a> {
    Scalar(Complex64),
    Real(&'a [f64]),
    Batch(&'a [Complex64]),
}

impl ComplexView<'_> {
    #[inline]
    pub(crate) fn at(&self, i: usize) -> Complex64 {
        match self {
            ComplexView::Scalar(v) => *v,
            ComplexView::Real(v) => Complex64::new(v[i], 0.0),
            ComplexView::Batch(v) => v[i],
        }
    }
}

/// Build a vector of `n` entries from an index function, in parallel when `rayon` is enabled.
#[cfg(feature = "rayon")]
pub(crate) fn tabulate<T, F>(n: usize, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(usize) -> T + Sync + Send,
{
    (0..n).into_par_iter().map(f).collect()
}

/// Build a vector of `n` entries from an index function, in parallel when `rayon` is enabled.
#[cfg(not(feature = "rayon"))]
pub(crate) fn tabulate<T, F>(n: usize, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(usize) -> T + Sync + Send,
{
    (0..n).map(f).collect()
}

/// Compensated sum of a batch, in parallel when `rayon` is enabled.
#[cfg(feature = "rayon")]
pub(crate) fn sum_real(values: &[f64]) -> f64 {
    values
        .par_iter()
        .copied()
        .parallel_sum_with_accumulator::<Klein<f64>>()
}

/// Compensated sum of a batch, in parallel when `rayon` is enabled.
#[cfg(not(feature = "rayon"))]
pub(crate) fn sum_real(values: &[f64]) -> f64 {
    values
        .iter()
        .copied()
        .sum_with_accumulator::<Klein<f64>>()
}

/// Compensated sum of the products of two equally long batches.
#[cfg(feature = "rayon")]
pub(crate) fn sum_products(a: &[f64], b: &[f64]) -> f64 {
    a.par_iter()
        .zip(b.par_iter())
        .map(|(a, b)| a * b)
        .parallel_sum_with_accumulator::<Klein<f64>>()
}

/// Compensated sum of the products of two equally long batches.
#[cfg(not(feature = "rayon"))]
pub(crate) fn sum_products(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(a, b)| a * b)
        .sum_with_accumulator::<Klein<f64>>()
}

#[cfg(feature = "rayon")]
fn sum_complex(values: &[Complex64]) -> Complex64 {
    Complex64::new(
        values
            .par_iter()
            .map(|z| z.re)
            .parallel_sum_with_accumulator::<Klein<f64>>(),
        values
            .par_iter()
            .map(|z| z.im)
            .parallel_sum_with_accumulator::<Klein<f64>>(),
    )
}

#[cfg(not(feature = "rayon"))]
fn sum_complex(values: &[Complex64]) -> Complex64 {
    Complex64::new(
        values
            .iter()
            .map(|z| z.re)
            .sum_with_accumulator::<Klein<f64>>(),
        values
            .iter()
            .map(|z| z.im)
            .sum_with_accumulator::<Klein<f64>>(),
    )
}

/// Elementwise binary operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl BinaryOp {
    #[inline]
    fn real(self, a: f64, b: f64) -> f64 {
        match self {
            BinaryOp::Add => a + b,
            BinaryOp::Sub => a - b,
            BinaryOp::Mul => a * b,
            BinaryOp::Div => a / b,
        }
    }
    #[inline]
    fn complex(self, a: Complex64, b: Complex64) -> Complex64 {
        match self {
            BinaryOp::Add => a + b,
            BinaryOp::Sub => a - b,
            BinaryOp::Mul => a * b,
            BinaryOp::Div => a / b,
        }
    }
}

/// Apply `op` elementwise, broadcasting scalars and promoting real inputs to complex ones when
/// the domains differ.
pub(crate) fn binary(op: BinaryOp, a: &Value, b: &Value) -> Value {
    let n = a.batch_len().or(b.batch_len());
    match (a.domain(), b.domain(), n) {
        (Domain::Real, Domain::Real, None) => {
            Value::Real(op.real(a.real_view().at(0), b.real_view().at(0)))
        }
        (Domain::Real, Domain::Real, Some(n)) => {
            let (a, b) = (a.real_view(), b.real_view());
            Value::RealBatch(tabulate(n, |i| op.real(a.at(i), b.at(i))))
        }
        (_, _, None) => Value::Complex(op.complex(a.complex_view().at(0), b.complex_view().at(0))),
        (_, _, Some(n)) => {
            let (a, b) = (a.complex_view(), b.complex_view());
            Value::ComplexBatch(tabulate(n, |i| op.complex(a.at(i), b.at(i))))
        }
    }
}

/// Apply a map to a value of either domain, keeping the domain.
pub(crate) fn map_value<R, C>(value: &Value, real: R, complex: C) -> Value
where
    R: Fn(f64) -> f64 + Sync + Send,
    C: Fn(Complex64) -> Complex64 + Sync + Send,
{
    match value {
        Value::Real(v) => Value::Real(real(*v)),
        Value::Complex(v) => Value::Complex(complex(*v)),
        Value::RealBatch(v) => Value::RealBatch(tabulate(v.len(), |i| real(v[i]))),
        Value::ComplexBatch(v) => Value::ComplexBatch(tabulate(v.len(), |i| complex(v[i]))),
    }
}

/// Apply a map to a value of either domain which always produces real output.
pub(crate) fn map_to_real<R, C>(value: &Value, real: R, complex: C) -> Value
where
    R: Fn(f64) -> f64 + Sync + Send,
    C: Fn(Complex64) -> f64 + Sync + Send,
{
    match value {
        Value::Real(v) => Value::Real(real(*v)),
        Value::Complex(v) => Value::Real(complex(*v)),
        Value::RealBatch(v) => Value::RealBatch(tabulate(v.len(), |i| real(v[i]))),
        Value::ComplexBatch(v) => Value::RealBatch(tabulate(v.len(), |i| complex(v[i]))),
    }
}

/// Sum the entries of a batch. Scalars are returned unchanged.
pub(crate) fn reduce_sum(value: &Value) -> Value {
    match value {
        Value::RealBatch(v) => Value::Real(sum_real(v)),
        Value::ComplexBatch(v) => Value::Complex(sum_complex(v)),
        scalar => scalar.clone(),
    }
}

/// Average the entries of a batch. An empty batch averages to zero.
pub(crate) fn reduce_mean(value: &Value) -> Value {
    let n = value.batch_len().unwrap_or(1).max(1) as f64;
    match reduce_sum(value) {
        Value::Real(v) => Value::Real(v / n),
        Value::Complex(v) => Value::Complex(v / n),
        other => other,
    }
}

/// Repeat a scalar `n` times.
pub(crate) fn broadcast(value: &Value, n: usize) -> Value {
    match value {
        Value::Real(v) => Value::RealBatch(vec![*v; n]),
        Value::Complex(v) => Value::ComplexBatch(vec![*v; n]),
        batch => batch.clone(),
    }
}
