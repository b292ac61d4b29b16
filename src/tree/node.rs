use std::fmt::Display;

use num::complex::Complex64;
use serde::{Deserialize, Serialize};

use super::value::{Domain, Shape, Value, ValueType};
use crate::{
    kernels::{Kernel, MAX_KERNEL_ARITY},
    ArborError, ArborResult,
};

/// A stable index of a node within a [`FunctionTree`](super::FunctionTree).
///
/// A node's inputs always have smaller ids than the node itself, so ascending id order is a
/// valid evaluation order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    /// The position of the node in its tree's arena.
    pub fn index(&self) -> usize {
        self.0
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Elementwise single-input operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    /// The additive inverse.
    Neg,
    /// The real part.
    Real,
    /// The imaginary part.
    Imag,
    /// The complex conjugate.
    Conj,
    /// The absolute square.
    NormSqr,
    /// The natural logarithm.
    Ln,
    /// The exponential function.
    Exp,
    /// The principal square root.
    Sqrt,
    /// An integer power.
    Powi(i32),
}

impl UnaryOp {
    fn output_domain(&self, input: Domain) -> Domain {
        match self {
            UnaryOp::Real | UnaryOp::Imag | UnaryOp::NormSqr => Domain::Real,
            _ => input,
        }
    }
}

impl Display for UnaryOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnaryOp::Neg => write!(f, "-"),
            UnaryOp::Real => write!(f, "Re"),
            UnaryOp::Imag => write!(f, "Im"),
            UnaryOp::Conj => write!(f, "*"),
            UnaryOp::NormSqr => write!(f, "NormSqr"),
            UnaryOp::Ln => write!(f, "Ln"),
            UnaryOp::Exp => write!(f, "Exp"),
            UnaryOp::Sqrt => write!(f, "Sqrt"),
            UnaryOp::Powi(n) => write!(f, "^{}", n),
        }
    }
}

/// Reductions from a batch to a scalar.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReduceOp {
    Sum,
    Mean,
}

impl Display for ReduceOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReduceOp::Sum => write!(f, "Sum"),
            ReduceOp::Mean => write!(f, "Mean"),
        }
    }
}

/// The closed set of node kinds a [`FunctionTree`](super::FunctionTree) can hold.
#[derive(Clone, Debug)]
pub enum NodeKind {
    /// A constant scalar, or a constant batch of fixed length.
    Constant(Value),
    /// A reference to a parameter by its index in the tree's
    /// [`ParameterList`](crate::parameters::ParameterList).
    Parameter(usize),
    /// A named column of the bound [`DataSet`](crate::data::DataSet).
    Variable(String),
    /// The event weights of the bound [`DataSet`](crate::data::DataSet).
    Weights,
    /// The sum of any number of inputs.
    Add(Vec<NodeId>),
    /// The product of any number of inputs.
    Mul(Vec<NodeId>),
    /// The difference of two inputs.
    Sub(NodeId, NodeId),
    /// The ratio of two inputs.
    Div(NodeId, NodeId),
    /// An elementwise single-input operation.
    Unary(UnaryOp, NodeId),
    /// A complex number from a real magnitude and a real phase.
    Polar(NodeId, NodeId),
    /// A reduction of a batch into a scalar.
    Reduce(ReduceOp, NodeId),
    /// A scalar repeated once per event of the bound data, or `len` times if given.
    Broadcast {
        input: NodeId,
        len: Option<usize>,
    },
    /// An opaque physics kernel.
    Kernel(Box<dyn Kernel>, Vec<NodeId>),
}

/// The hash-consing key of a node. Two nodes with equal keys compute identical values.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) enum NodeKey {
    Constant {
        domain: Domain,
        batch: bool,
        bits: Vec<u64>,
    },
    Parameter(usize),
    Variable(String),
    Weights,
    Add(Vec<NodeId>),
    Mul(Vec<NodeId>),
    Sub(NodeId, NodeId),
    Div(NodeId, NodeId),
    Unary(UnaryOp, NodeId),
    Polar(NodeId, NodeId),
    Reduce(ReduceOp, NodeId),
    Broadcast(NodeId, Option<usize>),
    Kernel(String, Vec<NodeId>),
}

fn complex_bits(values: &[Complex64]) -> Vec<u64> {
    values
        .iter()
        .flat_map(|v| [v.re.to_bits(), v.im.to_bits()])
        .collect()
}

fn sorted(ids: &[NodeId]) -> Vec<NodeId> {
    let mut ids = ids.to_vec();
    ids.sort_unstable();
    ids
}

impl NodeKind {
    /// The inputs of this node, in order.
    pub fn inputs(&self) -> Vec<NodeId> {
        match self {
            NodeKind::Constant(_)
            | NodeKind::Parameter(_)
            | NodeKind::Variable(_)
            | NodeKind::Weights => Vec::new(),
            NodeKind::Add(inputs) | NodeKind::Mul(inputs) | NodeKind::Kernel(_, inputs) => {
                inputs.clone()
            }
            NodeKind::Sub(a, b) | NodeKind::Div(a, b) | NodeKind::Polar(a, b) => vec![*a, *b],
            NodeKind::Unary(_, a) | NodeKind::Reduce(_, a) => vec![*a],
            NodeKind::Broadcast { input, .. } => vec![*input],
        }
    }

    /// Rebuild this node with every input passed through `mapping`.
    pub fn remap<F: Fn(NodeId) -> NodeId>(&self, mapping: F) -> Self {
        let many = |ids: &[NodeId]| ids.iter().map(|id| mapping(*id)).collect::<Vec<_>>();
        match self {
            NodeKind::Constant(_)
            | NodeKind::Parameter(_)
            | NodeKind::Variable(_)
            | NodeKind::Weights => self.clone(),
            NodeKind::Add(inputs) => NodeKind::Add(many(inputs)),
            NodeKind::Mul(inputs) => NodeKind::Mul(many(inputs)),
            NodeKind::Sub(a, b) => NodeKind::Sub(mapping(*a), mapping(*b)),
            NodeKind::Div(a, b) => NodeKind::Div(mapping(*a), mapping(*b)),
            NodeKind::Unary(op, a) => NodeKind::Unary(*op, mapping(*a)),
            NodeKind::Polar(a, b) => NodeKind::Polar(mapping(*a), mapping(*b)),
            NodeKind::Reduce(op, a) => NodeKind::Reduce(*op, mapping(*a)),
            NodeKind::Broadcast { input, len } => NodeKind::Broadcast {
                input: mapping(*input),
                len: *len,
            },
            NodeKind::Kernel(kernel, inputs) => {
                NodeKind::Kernel(kernel.clone(), many(inputs))
            }
        }
    }

    /// The hash-consing key, or `None` if this node should never be shared.
    pub(crate) fn key(&self) -> Option<NodeKey> {
        Some(match self {
            NodeKind::Constant(value) => match value {
                Value::Real(v) => NodeKey::Constant {
                    domain: Domain::Real,
                    batch: false,
                    bits: vec![v.to_bits()],
                },
                Value::Complex(v) => NodeKey::Constant {
                    domain: Domain::Complex,
                    batch: false,
                    bits: complex_bits(&[*v]),
                },
                Value::RealBatch(v) => NodeKey::Constant {
                    domain: Domain::Real,
                    batch: true,
                    bits: v.iter().map(|x| x.to_bits()).collect(),
                },
                Value::ComplexBatch(v) => NodeKey::Constant {
                    domain: Domain::Complex,
                    batch: true,
                    bits: complex_bits(v),
                },
            },
            NodeKind::Parameter(index) => NodeKey::Parameter(*index),
            NodeKind::Variable(name) => NodeKey::Variable(name.clone()),
            NodeKind::Weights => NodeKey::Weights,
            NodeKind::Add(inputs) => NodeKey::Add(sorted(inputs)),
            NodeKind::Mul(inputs) => NodeKey::Mul(sorted(inputs)),
            NodeKind::Sub(a, b) => NodeKey::Sub(*a, *b),
            NodeKind::Div(a, b) => NodeKey::Div(*a, *b),
            NodeKind::Unary(op, a) => NodeKey::Unary(*op, *a),
            NodeKind::Polar(a, b) => NodeKey::Polar(*a, *b),
            NodeKind::Reduce(op, a) => NodeKey::Reduce(*op, *a),
            NodeKind::Broadcast { input, len } => NodeKey::Broadcast(*input, *len),
            NodeKind::Kernel(kernel, inputs) => {
                NodeKey::Kernel(serde_json::to_string(kernel).ok()?, inputs.clone())
            }
        })
    }

    /// Infer the output type of this node from the types of its inputs, rejecting any
    /// combination which can never be evaluated.
    pub(crate) fn infer(&self, inputs: &[ValueType]) -> ArborResult<ValueType> {
        match self {
            NodeKind::Constant(value) => Ok(match value {
                Value::Real(_) => ValueType::new(Shape::Scalar, Domain::Real),
                Value::Complex(_) => ValueType::new(Shape::Scalar, Domain::Complex),
                Value::RealBatch(v) => ValueType::new(Shape::Fixed(v.len()), Domain::Real),
                Value::ComplexBatch(v) => ValueType::new(Shape::Fixed(v.len()), Domain::Complex),
            }),
            NodeKind::Parameter(_) => Ok(ValueType::real_scalar()),
            NodeKind::Variable(_) | NodeKind::Weights => {
                Ok(ValueType::new(Shape::Batch, Domain::Real))
            }
            NodeKind::Add(_) | NodeKind::Mul(_) => {
                let (first, rest) = inputs.split_first().ok_or_else(|| {
                    ArborError::structural("a sum or product needs at least one input")
                })?;
                rest.iter().try_fold(*first, |acc, t| {
                    Ok(ValueType::new(
                        acc.shape.join(t.shape)?,
                        acc.domain.join(t.domain),
                    ))
                })
            }
            NodeKind::Sub(_, _) | NodeKind::Div(_, _) => Ok(ValueType::new(
                inputs[0].shape.join(inputs[1].shape)?,
                inputs[0].domain.join(inputs[1].domain),
            )),
            NodeKind::Unary(op, _) => {
                Ok(inputs[0].with_domain(op.output_domain(inputs[0].domain)))
            }
            NodeKind::Polar(_, _) => {
                if !(inputs[0].is_real() && inputs[1].is_real()) {
                    return Err(ArborError::structural(
                        "the magnitude and phase of a polar number must be real",
                    ));
                }
                Ok(ValueType::new(
                    inputs[0].shape.join(inputs[1].shape)?,
                    Domain::Complex,
                ))
            }
            NodeKind::Reduce(op, _) => {
                if inputs[0].is_scalar() {
                    return Err(ArborError::structural(format!(
                        "cannot reduce a scalar with {}",
                        op
                    )));
                }
                Ok(inputs[0].with_shape(Shape::Scalar))
            }
            NodeKind::Broadcast { len, .. } => {
                if !inputs[0].is_scalar() {
                    return Err(ArborError::structural(format!(
                        "only scalars can be broadcast, found a {}",
                        inputs[0]
                    )));
                }
                Ok(inputs[0].with_shape(len.map_or(Shape::Batch, Shape::Fixed)))
            }
            NodeKind::Kernel(kernel, _) => {
                if kernel.arity() != inputs.len() || inputs.len() > MAX_KERNEL_ARITY {
                    return Err(ArborError::structural(format!(
                        "kernel {} expects {} inputs (at most {}) but was given {}",
                        kernel.name(),
                        kernel.arity(),
                        MAX_KERNEL_ARITY,
                        inputs.len()
                    )));
                }
                if let Some(bad) = inputs.iter().find(|t| !t.is_real()) {
                    return Err(ArborError::structural(format!(
                        "kernel {} only accepts real inputs, found a {}",
                        kernel.name(),
                        bad
                    )));
                }
                let shape = inputs
                    .iter()
                    .try_fold(Shape::Scalar, |acc, t| acc.join(t.shape))?;
                Ok(ValueType::new(shape, kernel.domain()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commutative_keys_ignore_order() {
        let a = NodeKind::Add(vec![NodeId(2), NodeId(1)]);
        let b = NodeKind::Add(vec![NodeId(1), NodeId(2)]);
        assert_eq!(a.key(), b.key());
        let c = NodeKind::Sub(NodeId(2), NodeId(1));
        let d = NodeKind::Sub(NodeId(1), NodeId(2));
        assert_ne!(c.key(), d.key());
    }

    #[test]
    fn test_constant_keys_distinguish_domains() {
        let real = NodeKind::Constant(Value::Real(1.0));
        let complex = NodeKind::Constant(Value::Complex(Complex64::new(1.0, 0.0)));
        assert_ne!(real.key(), complex.key());
    }

    #[test]
    fn test_remap() {
        let kind = NodeKind::Div(NodeId(0), NodeId(1));
        let remapped = kind.remap(|id| NodeId(id.0 + 10));
        assert_eq!(remapped.inputs(), vec![NodeId(10), NodeId(11)]);
    }

    #[test]
    fn test_inference_rejects_bad_shapes() {
        let batch = ValueType::new(Shape::Batch, Domain::Real);
        let fixed = ValueType::new(Shape::Fixed(4), Domain::Real);
        let scalar = ValueType::real_scalar();
        assert!(NodeKind::Add(vec![NodeId(0), NodeId(1)])
            .infer(&[batch, fixed])
            .is_err());
        assert!(NodeKind::Reduce(ReduceOp::Sum, NodeId(0))
            .infer(&[scalar])
            .is_err());
        assert!(NodeKind::Broadcast {
            input: NodeId(0),
            len: None
        }
        .infer(&[batch])
        .is_err());
        assert_eq!(
            NodeKind::Unary(UnaryOp::NormSqr, NodeId(0))
                .infer(&[batch.with_domain(Domain::Complex)])
                .unwrap(),
            batch
        );
    }
}
