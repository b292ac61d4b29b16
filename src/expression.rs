use std::fmt::{Debug, Display};

use auto_ops::*;
use num::complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::{
    kernels::Kernel,
    parameters::FitParameter,
    tree::{FunctionTree, NodeId, ReduceOp, UnaryOp},
    ArborResult,
};

/// A serializable description of a computation which can be lowered into a [`FunctionTree`].
///
/// Expressions are plain trees with operator overloading, which makes them convenient to write
/// by hand or to produce from a [`ModelConfig`](crate::builder::ModelConfig). Sharing only
/// happens once an expression is built: [`Expression::build`] inserts into a tree which
/// hash-conses identical subexpressions, and parameters with the same name always refer to the
/// same registry entry.
#[derive(Clone, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum Expression {
    Scalar(f64),
    ComplexScalar(Complex64),
    Parameter(FitParameter),
    Variable(String),
    Add(Box<Expression>, Box<Expression>),
    Sub(Box<Expression>, Box<Expression>),
    Mul(Box<Expression>, Box<Expression>),
    Div(Box<Expression>, Box<Expression>),
    Neg(Box<Expression>),
    Real(Box<Expression>),
    Imag(Box<Expression>),
    Conj(Box<Expression>),
    NormSqr(Box<Expression>),
    Ln(Box<Expression>),
    Exp(Box<Expression>),
    Sqrt(Box<Expression>),
    Powi(Box<Expression>, i32),
    Polar(Box<Expression>, Box<Expression>),
    Sum(Box<Expression>),
    Mean(Box<Expression>),
    Broadcast(Box<Expression>),
    Kernel(Box<dyn Kernel>, Vec<Expression>),
}

/// A real constant.
pub fn constant(value: f64) -> Expression {
    Expression::Scalar(value)
}

/// A complex constant.
pub fn complex(re: f64, im: f64) -> Expression {
    Expression::ComplexScalar(Complex64::new(re, im))
}

/// A free parameter with the given name and starting value.
pub fn parameter<T: AsRef<str>>(name: T, value: f64) -> Expression {
    Expression::Parameter(FitParameter::new(name, value))
}

/// A fixed parameter with the given name and value.
pub fn fixed<T: AsRef<str>>(name: T, value: f64) -> Expression {
    Expression::Parameter(FitParameter::fixed(name, value))
}

/// A named column of the [`DataSet`](crate::data::DataSet) the tree is evaluated over.
pub fn variable<T: AsRef<str>>(name: T) -> Expression {
    Expression::Variable(name.as_ref().to_string())
}

impl From<f64> for Expression {
    fn from(value: f64) -> Self {
        Expression::Scalar(value)
    }
}

impl From<FitParameter> for Expression {
    fn from(value: FitParameter) -> Self {
        Expression::Parameter(value)
    }
}

impl Expression {
    fn boxed(&self) -> Box<Expression> {
        Box::new(self.clone())
    }
    pub fn real(&self) -> Self {
        Self::Real(self.boxed())
    }
    pub fn imag(&self) -> Self {
        Self::Imag(self.boxed())
    }
    pub fn conj(&self) -> Self {
        Self::Conj(self.boxed())
    }
    pub fn norm_sqr(&self) -> Self {
        Self::NormSqr(self.boxed())
    }
    pub fn ln(&self) -> Self {
        Self::Ln(self.boxed())
    }
    pub fn exp(&self) -> Self {
        Self::Exp(self.boxed())
    }
    pub fn sqrt(&self) -> Self {
        Self::Sqrt(self.boxed())
    }
    pub fn powi(&self, n: i32) -> Self {
        Self::Powi(self.boxed(), n)
    }
    /// Sum a batch over all events.
    pub fn sum(&self) -> Self {
        Self::Sum(self.boxed())
    }
    /// Average a batch over all events.
    pub fn mean(&self) -> Self {
        Self::Mean(self.boxed())
    }
    /// Repeat a scalar once per event.
    pub fn broadcast(&self) -> Self {
        Self::Broadcast(self.boxed())
    }
    /// The complex number with magnitude `self` and phase `phase`.
    pub fn polar(&self, phase: &Expression) -> Self {
        Self::Polar(self.boxed(), phase.boxed())
    }
    /// Apply a kernel to the given inputs.
    pub fn kernel(kernel: Box<dyn Kernel>, inputs: &[Expression]) -> Self {
        Self::Kernel(kernel, inputs.to_vec())
    }

    fn collect_terms<'a>(&'a self, add: bool, terms: &mut Vec<&'a Expression>) {
        match (self, add) {
            (Expression::Add(a, b), true) | (Expression::Mul(a, b), false) => {
                a.collect_terms(add, terms);
                b.collect_terms(add, terms);
            }
            _ => terms.push(self),
        }
    }

    fn build_terms(&self, add: bool, tree: &mut FunctionTree) -> ArborResult<NodeId> {
        let mut terms = Vec::new();
        self.collect_terms(add, &mut terms);
        let ids = terms
            .into_iter()
            .map(|term| term.build(tree))
            .collect::<ArborResult<Vec<_>>>()?;
        if add {
            tree.add(&ids)
        } else {
            tree.mul(&ids)
        }
    }

    /// Lower this expression into `tree`, returning the id of its root.
    ///
    /// Chains of additions and multiplications are flattened into single n-ary nodes.
    ///
    /// # Errors
    ///
    /// Returns [`ArborError::StructuralGraphError`](crate::ArborError::StructuralGraphError) if
    /// any subexpression is malformed, such as adding a batch to a fixed-length batch.
    pub fn build(&self, tree: &mut FunctionTree) -> ArborResult<NodeId> {
        match self {
            Expression::Scalar(v) => tree.constant(*v),
            Expression::ComplexScalar(v) => tree.complex_constant(*v),
            Expression::Parameter(p) => tree.parameter(p.clone()),
            Expression::Variable(name) => tree.variable(name),
            Expression::Add(_, _) => self.build_terms(true, tree),
            Expression::Mul(_, _) => self.build_terms(false, tree),
            Expression::Sub(a, b) => {
                let (a, b) = (a.build(tree)?, b.build(tree)?);
                tree.sub(a, b)
            }
            Expression::Div(a, b) => {
                let (a, b) = (a.build(tree)?, b.build(tree)?);
                tree.div(a, b)
            }
            Expression::Neg(a) => self.build_unary(UnaryOp::Neg, a, tree),
            Expression::Real(a) => self.build_unary(UnaryOp::Real, a, tree),
            Expression::Imag(a) => self.build_unary(UnaryOp::Imag, a, tree),
            Expression::Conj(a) => self.build_unary(UnaryOp::Conj, a, tree),
            Expression::NormSqr(a) => self.build_unary(UnaryOp::NormSqr, a, tree),
            Expression::Ln(a) => self.build_unary(UnaryOp::Ln, a, tree),
            Expression::Exp(a) => self.build_unary(UnaryOp::Exp, a, tree),
            Expression::Sqrt(a) => self.build_unary(UnaryOp::Sqrt, a, tree),
            Expression::Powi(a, n) => self.build_unary(UnaryOp::Powi(*n), a, tree),
            Expression::Polar(r, phi) => {
                let (r, phi) = (r.build(tree)?, phi.build(tree)?);
                tree.polar(r, phi)
            }
            Expression::Sum(a) => {
                let a = a.build(tree)?;
                tree.reduce(ReduceOp::Sum, a)
            }
            Expression::Mean(a) => {
                let a = a.build(tree)?;
                tree.reduce(ReduceOp::Mean, a)
            }
            Expression::Broadcast(a) => {
                let a = a.build(tree)?;
                tree.broadcast(a)
            }
            Expression::Kernel(kernel, inputs) => {
                let ids = inputs
                    .iter()
                    .map(|input| input.build(tree))
                    .collect::<ArborResult<Vec<_>>>()?;
                tree.kernel(kernel.clone(), &ids)
            }
        }
    }

    fn build_unary(
        &self,
        op: UnaryOp,
        input: &Expression,
        tree: &mut FunctionTree,
    ) -> ArborResult<NodeId> {
        let input = input.build(tree)?;
        tree.unary(op, input)
    }

    /// Build a fresh [`FunctionTree`] whose head is this expression.
    pub fn to_tree(&self) -> ArborResult<FunctionTree> {
        let mut tree = FunctionTree::new();
        let head = self.build(&mut tree)?;
        tree.set_head(head)?;
        log::debug!("built a tree of {} nodes from an expression", tree.len());
        Ok(tree)
    }

    fn children(&self) -> Vec<&Expression> {
        match self {
            Expression::Scalar(_)
            | Expression::ComplexScalar(_)
            | Expression::Parameter(_)
            | Expression::Variable(_) => vec![],
            Expression::Add(a, b)
            | Expression::Sub(a, b)
            | Expression::Mul(a, b)
            | Expression::Div(a, b)
            | Expression::Polar(a, b) => vec![a, b],
            Expression::Neg(a)
            | Expression::Real(a)
            | Expression::Imag(a)
            | Expression::Conj(a)
            | Expression::NormSqr(a)
            | Expression::Ln(a)
            | Expression::Exp(a)
            | Expression::Sqrt(a)
            | Expression::Powi(a, _)
            | Expression::Sum(a)
            | Expression::Mean(a)
            | Expression::Broadcast(a) => vec![a],
            Expression::Kernel(_, inputs) => inputs.iter().collect(),
        }
    }

    fn write_tree(
        &self,
        f: &mut std::fmt::Formatter<'_>,
        parent_prefix: &str,
        immediate_prefix: &str,
        parent_suffix: &str,
    ) -> std::fmt::Result {
        let display_string = match self {
            Expression::Scalar(v) => v.to_string(),
            Expression::ComplexScalar(v) => v.to_string(),
            Expression::Parameter(p) => p.name.clone(),
            Expression::Variable(name) => format!("Variable({})", name),
            Expression::Add(_, _) => "+".to_string(),
            Expression::Sub(_, _) => "-".to_string(),
            Expression::Mul(_, _) => "×".to_string(),
            Expression::Div(_, _) => "÷".to_string(),
            Expression::Neg(_) => "-".to_string(),
            Expression::Real(_) => "Re".to_string(),
            Expression::Imag(_) => "Im".to_string(),
            Expression::Conj(_) => "*".to_string(),
            Expression::NormSqr(_) => "NormSqr".to_string(),
            Expression::Ln(_) => "Ln".to_string(),
            Expression::Exp(_) => "Exp".to_string(),
            Expression::Sqrt(_) => "Sqrt".to_string(),
            Expression::Powi(_, n) => format!("^{}", n),
            Expression::Polar(_, _) => "Polar".to_string(),
            Expression::Sum(_) => "Sum".to_string(),
            Expression::Mean(_) => "Mean".to_string(),
            Expression::Broadcast(_) => "Broadcast".to_string(),
            Expression::Kernel(kernel, _) => kernel.name(),
        };
        writeln!(f, "{}{}{}", parent_prefix, immediate_prefix, display_string)?;
        let child_prefix = format!("{}{}", parent_prefix, parent_suffix);
        let children = self.children();
        let mut it = children.iter().peekable();
        while let Some(child) = it.next() {
            match it.peek() {
                Some(_) => child.write_tree(f, &child_prefix, "├─ ", "│  "),
                None => child.write_tree(f, &child_prefix, "└─ ", "   "),
            }?;
        }
        Ok(())
    }
}

impl Debug for Expression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.write_tree(f, "", "", "")
    }
}

impl Display for Expression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.write_tree(f, "", "", "")
    }
}

#[rustfmt::skip]
impl_op_ex!(+ |a: &Expression, b: &Expression| -> Expression {
    Expression::Add(a.boxed(), b.boxed())
});
#[rustfmt::skip]
impl_op_ex!(- |a: &Expression, b: &Expression| -> Expression {
    Expression::Sub(a.boxed(), b.boxed())
});
#[rustfmt::skip]
impl_op_ex!(* |a: &Expression, b: &Expression| -> Expression {
    Expression::Mul(a.boxed(), b.boxed())
});
#[rustfmt::skip]
impl_op_ex!(/ |a: &Expression, b: &Expression| -> Expression {
    Expression::Div(a.boxed(), b.boxed())
});
#[rustfmt::skip]
impl_op_ex!(- |a: &Expression| -> Expression {
    Expression::Neg(a.boxed())
});
#[rustfmt::skip]
impl_op_ex_commutative!(+ |a: &Expression, b: &f64| -> Expression {
    Expression::Add(a.boxed(), Box::new(Expression::Scalar(*b)))
});
#[rustfmt::skip]
impl_op_ex_commutative!(* |a: &Expression, b: &f64| -> Expression {
    Expression::Mul(a.boxed(), Box::new(Expression::Scalar(*b)))
});
