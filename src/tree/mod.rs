use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;
use num::complex::Complex64;

use crate::{
    data::DataSet,
    kernels::{Kernel, MAX_KERNEL_ARITY},
    parameters::{FitParameter, ParameterList},
    ArborError, ArborResult,
};

mod node;
mod print;
/// Static value types and the batch arithmetic used by every node.
pub mod value;

pub use node::{NodeId, NodeKind, ReduceOp, UnaryOp};

use node::NodeKey;
use value::{
    binary, broadcast, map_to_real, map_value, reduce_mean, reduce_sum, tabulate, BinaryOp,
    Domain, RealView, Value, ValueType,
};

#[derive(Clone, Debug)]
struct Node {
    kind: NodeKind,
    value_type: ValueType,
    inputs: Vec<NodeId>,
    parents: Vec<NodeId>,
    cache: Option<Value>,
    dirty: bool,
    recomputes: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Binding {
    id: u64,
    len: usize,
}

/// An acyclic graph of typed computations stored in an arena and addressed by [`NodeId`]s.
///
/// Nodes are only ever appended, and every input of a node must already exist when the node is
/// inserted, so the graph cannot contain cycles. Inserting a node which is structurally identical
/// to an existing one returns the existing [`NodeId`] instead, which means a common
/// subexpression is stored (and computed) exactly once no matter how many parents it has.
///
/// Every node caches its last output. Mutating a parameter through the tree marks only the nodes
/// which transitively depend on it as dirty, and binding a different [`DataSet`] marks only the
/// nodes which depend on event data. Evaluation then recomputes exactly the dirty nodes that the
/// requested output depends on, each at most once.
#[derive(Clone, Debug, Default)]
pub struct FunctionTree {
    nodes: Vec<Node>,
    interned: HashMap<NodeKey, NodeId>,
    parameters: ParameterList,
    parameter_nodes: HashMap<usize, NodeId>,
    variables: IndexMap<String, NodeId>,
    event_nodes: Vec<NodeId>,
    broadcast_nodes: Vec<NodeId>,
    head: Option<NodeId>,
    binding: Option<Binding>,
    /// The number of declared variables already checked against the bound dataset.
    checked_variables: usize,
}

impl FunctionTree {
    /// Create an empty tree with no parameters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a node, returning its id.
    ///
    /// # Errors
    ///
    /// Returns [`ArborError::StructuralGraphError`] if any input does not exist in this tree or
    /// if the input types can never be combined by this kind of node (for example, reducing a
    /// scalar or mixing data-bound batches with fixed-length ones).
    pub fn insert(&mut self, kind: NodeKind) -> ArborResult<NodeId> {
        if let NodeKind::Parameter(index) = kind {
            if self.parameters.get_index(index).is_none() {
                return Err(ArborError::structural(format!(
                    "parameter index {} is not registered in this tree",
                    index
                )));
            }
        }
        let inputs = kind.inputs();
        let mut input_types = Vec::with_capacity(inputs.len());
        for input in &inputs {
            let node = self.nodes.get(input.0).ok_or_else(|| {
                ArborError::structural(format!("node {} does not exist in this tree", input))
            })?;
            input_types.push(node.value_type);
        }
        let value_type = kind.infer(&input_types)?;
        let key = kind.key();
        if let Some(existing) = key.as_ref().and_then(|key| self.interned.get(key)) {
            return Ok(*existing);
        }
        let id = NodeId(self.nodes.len());
        for input in &inputs {
            let parents = &mut self.nodes[input.0].parents;
            if !parents.contains(&id) {
                parents.push(id);
            }
        }
        match &kind {
            NodeKind::Parameter(index) => {
                self.parameter_nodes.insert(*index, id);
            }
            NodeKind::Variable(name) => {
                self.variables.insert(name.clone(), id);
                self.event_nodes.push(id);
            }
            NodeKind::Weights => self.event_nodes.push(id),
            NodeKind::Broadcast { len: None, .. } => self.broadcast_nodes.push(id),
            _ => {}
        }
        self.nodes.push(Node {
            kind,
            value_type,
            inputs,
            parents: Vec::new(),
            cache: None,
            dirty: true,
            recomputes: 0,
        });
        if let Some(key) = key {
            self.interned.insert(key, id);
        }
        Ok(id)
    }

    pub fn constant(&mut self, value: f64) -> ArborResult<NodeId> {
        self.insert(NodeKind::Constant(Value::Real(value)))
    }
    pub fn complex_constant(&mut self, value: Complex64) -> ArborResult<NodeId> {
        self.insert(NodeKind::Constant(Value::Complex(value)))
    }
    /// Insert a constant batch of fixed length.
    pub fn data(&mut self, values: Vec<f64>) -> ArborResult<NodeId> {
        self.insert(NodeKind::Constant(Value::RealBatch(values)))
    }
    /// Register a parameter (or look up an existing one with the same name) and insert a node
    /// referencing it.
    pub fn parameter(&mut self, parameter: FitParameter) -> ArborResult<NodeId> {
        let index = self.parameters.create_or_get(parameter);
        self.insert(NodeKind::Parameter(index))
    }
    /// Insert a node reading the named column of whichever [`DataSet`] the tree is bound to.
    pub fn variable<T: AsRef<str>>(&mut self, name: T) -> ArborResult<NodeId> {
        self.insert(NodeKind::Variable(name.as_ref().to_string()))
    }
    /// Insert a node reading the event weights of whichever [`DataSet`] the tree is bound to.
    pub fn weights(&mut self) -> ArborResult<NodeId> {
        self.insert(NodeKind::Weights)
    }
    pub fn add(&mut self, inputs: &[NodeId]) -> ArborResult<NodeId> {
        self.insert(NodeKind::Add(inputs.to_vec()))
    }
    pub fn mul(&mut self, inputs: &[NodeId]) -> ArborResult<NodeId> {
        self.insert(NodeKind::Mul(inputs.to_vec()))
    }
    pub fn sub(&mut self, a: NodeId, b: NodeId) -> ArborResult<NodeId> {
        self.insert(NodeKind::Sub(a, b))
    }
    pub fn div(&mut self, a: NodeId, b: NodeId) -> ArborResult<NodeId> {
        self.insert(NodeKind::Div(a, b))
    }
    pub fn unary(&mut self, op: UnaryOp, input: NodeId) -> ArborResult<NodeId> {
        self.insert(NodeKind::Unary(op, input))
    }
    pub fn polar(&mut self, magnitude: NodeId, phase: NodeId) -> ArborResult<NodeId> {
        self.insert(NodeKind::Polar(magnitude, phase))
    }
    pub fn reduce(&mut self, op: ReduceOp, input: NodeId) -> ArborResult<NodeId> {
        self.insert(NodeKind::Reduce(op, input))
    }
    /// Repeat a scalar once per event of the bound [`DataSet`].
    pub fn broadcast(&mut self, input: NodeId) -> ArborResult<NodeId> {
        self.insert(NodeKind::Broadcast { input, len: None })
    }
    pub fn kernel(&mut self, kernel: Box<dyn Kernel>, inputs: &[NodeId]) -> ArborResult<NodeId> {
        self.insert(NodeKind::Kernel(kernel, inputs.to_vec()))
    }

    /// Designate the output node used by [`FunctionTree::evaluate`].
    pub fn set_head(&mut self, head: NodeId) -> ArborResult<()> {
        self.node(head)?;
        self.head = Some(head);
        Ok(())
    }
    pub fn head(&self) -> Option<NodeId> {
        self.head
    }
    fn node(&self, id: NodeId) -> ArborResult<&Node> {
        self.nodes
            .get(id.0)
            .ok_or_else(|| ArborError::structural(format!("node {} does not exist in this tree", id)))
    }
    pub fn kind(&self, id: NodeId) -> ArborResult<&NodeKind> {
        Ok(&self.node(id)?.kind)
    }
    pub fn value_type(&self, id: NodeId) -> ArborResult<ValueType> {
        Ok(self.node(id)?.value_type)
    }
    /// The nodes which take `id` as an input.
    pub fn parents(&self, id: NodeId) -> ArborResult<&[NodeId]> {
        Ok(&self.node(id)?.parents)
    }
    /// The number of nodes in the arena.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
    /// Returns `true` if the node will be recomputed the next time it is needed.
    pub fn is_dirty(&self, id: NodeId) -> ArborResult<bool> {
        Ok(self.node(id)?.dirty)
    }
    /// The number of times the given node has been computed since the counters were last reset.
    pub fn recompute_count(&self, id: NodeId) -> ArborResult<usize> {
        Ok(self.node(id)?.recomputes)
    }
    /// The number of node computations across the whole tree since the counters were last reset.
    pub fn total_recomputes(&self) -> usize {
        self.nodes.iter().map(|node| node.recomputes).sum()
    }
    pub fn reset_recompute_counters(&mut self) {
        for node in self.nodes.iter_mut() {
            node.recomputes = 0;
        }
    }
    /// The names of every column the tree reads from its bound [`DataSet`].
    pub fn variables(&self) -> Vec<String> {
        self.variables.keys().cloned().collect()
    }
    pub fn parameters(&self) -> &ParameterList {
        &self.parameters
    }

    /// Mark the given nodes and every node depending on them as dirty.
    ///
    /// A dirty node always has dirty parents, so the walk stops at nodes which are already dirty.
    fn invalidate(&mut self, roots: &[NodeId]) {
        let mut stack: Vec<NodeId> = roots.to_vec();
        while let Some(id) = stack.pop() {
            let node = &mut self.nodes[id.0];
            if node.dirty {
                continue;
            }
            node.dirty = true;
            stack.extend(node.parents.iter().copied());
        }
    }
    fn invalidate_parameters(&mut self, indices: &[usize]) {
        let roots: Vec<NodeId> = indices
            .iter()
            .filter_map(|index| self.parameter_nodes.get(index).copied())
            .collect();
        self.invalidate(&roots);
    }

    /// Set the value of a parameter by name.
    pub fn update_parameter_value<T: AsRef<str>>(&mut self, name: T, value: f64) -> ArborResult<()> {
        let index = self.parameters.update_value(name, value)?;
        self.invalidate_parameters(&[index]);
        Ok(())
    }
    /// Fix a parameter by name, optionally assigning it a new value.
    pub fn fix_parameter<T: AsRef<str>>(&mut self, name: T, value: Option<f64>) -> ArborResult<()> {
        let index = self.parameters.fix(name, value)?;
        self.invalidate_parameters(&[index]);
        Ok(())
    }
    /// Release a parameter by name, optionally assigning it a new value.
    pub fn release_parameter<T: AsRef<str>>(
        &mut self,
        name: T,
        value: Option<f64>,
    ) -> ArborResult<()> {
        let index = self.parameters.release(name, value)?;
        self.invalidate_parameters(&[index]);
        Ok(())
    }
    /// Replace the bounds of a parameter by name.
    pub fn update_parameter_range<T: AsRef<str>>(
        &mut self,
        name: T,
        min: Option<f64>,
        max: Option<f64>,
    ) -> ArborResult<()> {
        let index = self.parameters.update_range(name, min, max)?;
        self.invalidate_parameters(&[index]);
        Ok(())
    }
    /// Apply every parameter in `other` by name. Nothing is changed if any name is unknown.
    pub fn update_parameters(&mut self, other: &ParameterList) -> ArborResult<()> {
        let indices = self.parameters.update_from(other)?;
        self.invalidate_parameters(&indices);
        Ok(())
    }
    /// Assign every parameter value positionally, in declaration order.
    pub fn update_parameter_values(&mut self, values: &[f64]) -> ArborResult<()> {
        let before = self.parameters.values();
        self.parameters.update_values(values)?;
        let changed: Vec<usize> = self
            .parameters
            .values()
            .iter()
            .zip(before)
            .enumerate()
            .filter(|(_, (new, old))| new.to_bits() != old.to_bits())
            .map(|(index, _)| index)
            .collect();
        self.invalidate_parameters(&changed);
        Ok(())
    }

    /// Bind a [`DataSet`] to the tree, invalidating the nodes which read event data if it differs
    /// from the last one bound.
    ///
    /// # Errors
    ///
    /// Returns [`ArborError::StructuralGraphError`] naming every declared variable which the
    /// dataset does not contain. The previous binding and all caches are left untouched. Binding
    /// the same dataset again only checks the variables declared since the last binding.
    pub fn bind(&mut self, dataset: &DataSet) -> ArborResult<()> {
        let binding = Binding {
            id: dataset.id(),
            len: dataset.len(),
        };
        let rebinding = self.binding == Some(binding);
        let missing: Vec<String> = self
            .variables
            .keys()
            .skip(if rebinding { self.checked_variables } else { 0 })
            .filter(|name| dataset.column(name).is_none())
            .map(|name| format!("\"{}\"", name))
            .collect();
        if !missing.is_empty() {
            return Err(ArborError::structural(format!(
                "the dataset is missing the column(s) {}",
                missing.join(", ")
            )));
        }
        self.checked_variables = self.variables.len();
        if rebinding {
            return Ok(());
        }
        log::debug!(
            "binding dataset {} with {} events to a tree of {} nodes",
            binding.id,
            binding.len,
            self.nodes.len()
        );
        let mut roots = self.event_nodes.clone();
        if self.binding.map(|b| b.len) != Some(binding.len) {
            roots.extend(self.broadcast_nodes.iter().copied());
        }
        self.invalidate(&roots);
        self.binding = Some(binding);
        Ok(())
    }

    /// Evaluate the head of the tree over `dataset`.
    pub fn evaluate(&mut self, dataset: &DataSet) -> ArborResult<&Value> {
        let head = self
            .head
            .ok_or_else(|| ArborError::structural("the tree has no head node"))?;
        self.evaluate_node(head, dataset)
    }

    /// Evaluate any node of the tree over `dataset`, recomputing only the dirty nodes it depends
    /// on.
    pub fn evaluate_node(&mut self, id: NodeId, dataset: &DataSet) -> ArborResult<&Value> {
        self.node(id)?;
        self.bind(dataset)?;
        let mut pending = Vec::new();
        let mut seen = HashSet::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if !seen.insert(current) {
                continue;
            }
            let node = &self.nodes[current.0];
            if node.dirty || node.cache.is_none() {
                pending.push(current);
                stack.extend(node.inputs.iter().copied());
            }
        }
        // inputs always have smaller ids than the nodes which use them
        pending.sort_unstable();
        for current in pending {
            let value = self.compute(current, dataset)?;
            log::trace!("recomputed node {} -> {}", current, value);
            let node = &mut self.nodes[current.0];
            node.cache = Some(value);
            node.dirty = false;
            node.recomputes += 1;
        }
        self.nodes[id.0]
            .cache
            .as_ref()
            .ok_or_else(|| ArborError::structural(format!("node {} has no cached value", id)))
    }

    fn cached(&self, id: NodeId) -> ArborResult<&Value> {
        self.nodes[id.0]
            .cache
            .as_ref()
            .ok_or_else(|| ArborError::structural(format!("input {} was not computed", id)))
    }

    fn compute(&self, id: NodeId, dataset: &DataSet) -> ArborResult<Value> {
        let node = &self.nodes[id.0];
        Ok(match &node.kind {
            NodeKind::Constant(value) => value.clone(),
            NodeKind::Parameter(index) => Value::Real(
                self.parameters
                    .get_index(*index)
                    .ok_or_else(|| {
                        ArborError::structural(format!("parameter index {} is missing", index))
                    })?
                    .value,
            ),
            NodeKind::Variable(name) => Value::RealBatch(
                dataset
                    .column(name)
                    .ok_or_else(|| {
                        ArborError::structural(format!("the dataset is missing column \"{}\"", name))
                    })?
                    .to_vec(),
            ),
            NodeKind::Weights => Value::RealBatch(dataset.weights().to_vec()),
            NodeKind::Add(inputs) => self.fold(BinaryOp::Add, inputs)?,
            NodeKind::Mul(inputs) => self.fold(BinaryOp::Mul, inputs)?,
            NodeKind::Sub(a, b) => binary(BinaryOp::Sub, self.cached(*a)?, self.cached(*b)?),
            NodeKind::Div(a, b) => binary(BinaryOp::Div, self.cached(*a)?, self.cached(*b)?),
            NodeKind::Unary(op, a) => apply_unary(*op, self.cached(*a)?),
            NodeKind::Polar(r, phi) => {
                let (r, phi) = (self.cached(*r)?.real_view(), self.cached(*phi)?.real_view());
                match r.batch_len().or(phi.batch_len()) {
                    None => Value::Complex(Complex64::from_polar(r.at(0), phi.at(0))),
                    Some(n) => Value::ComplexBatch(tabulate(n, |i| {
                        Complex64::from_polar(r.at(i), phi.at(i))
                    })),
                }
            }
            NodeKind::Reduce(ReduceOp::Sum, a) => reduce_sum(self.cached(*a)?),
            NodeKind::Reduce(ReduceOp::Mean, a) => reduce_mean(self.cached(*a)?),
            NodeKind::Broadcast { input, len } => {
                broadcast(self.cached(*input)?, len.unwrap_or(dataset.len()))
            }
            NodeKind::Kernel(kernel, inputs) => {
                let views = inputs
                    .iter()
                    .map(|input| Ok(self.cached(*input)?.real_view()))
                    .collect::<ArborResult<Vec<RealView>>>()?;
                evaluate_kernel(kernel.as_ref(), &views)
            }
        })
    }

    fn fold(&self, op: BinaryOp, inputs: &[NodeId]) -> ArborResult<Value> {
        let (first, rest) = inputs
            .split_first()
            .ok_or_else(|| ArborError::structural("a sum or product needs at least one input"))?;
        rest.iter().try_fold(self.cached(*first)?.clone(), |acc, input| {
            Ok(binary(op, &acc, self.cached(*input)?))
        })
    }

    /// Copy the subgraph below `root` with every reference to event data replaced by the
    /// contents of `sample`, returning the id of the copied root.
    ///
    /// Variables become constant batches, weights become a constant batch of the sample's
    /// weights, and broadcasts take the sample's length. The copy therefore depends only on
    /// parameters and is never invalidated by binding a different [`DataSet`], which is what
    /// normalization integrals over a phase-space sample need. Nodes which never touch event data
    /// are shared with the original.
    pub fn substitute_data(&mut self, root: NodeId, sample: &DataSet) -> ArborResult<NodeId> {
        self.node(root)?;
        let mut reachable = Vec::new();
        let mut seen = HashSet::new();
        let mut stack = vec![root];
        while let Some(current) = stack.pop() {
            if seen.insert(current) {
                reachable.push(current);
                stack.extend(self.nodes[current.0].inputs.iter().copied());
            }
        }
        reachable.sort_unstable();
        let mut mapping: HashMap<NodeId, NodeId> = HashMap::with_capacity(reachable.len());
        for id in reachable {
            let kind = match &self.nodes[id.0].kind {
                NodeKind::Variable(name) => NodeKind::Constant(Value::RealBatch(
                    sample
                        .column(name)
                        .ok_or_else(|| {
                            ArborError::structural(format!(
                                "the sample is missing the column \"{}\"",
                                name
                            ))
                        })?
                        .to_vec(),
                )),
                NodeKind::Weights => NodeKind::Constant(Value::RealBatch(sample.weights().to_vec())),
                NodeKind::Broadcast { input, len: None } => NodeKind::Broadcast {
                    input: mapping[input],
                    len: Some(sample.len()),
                },
                kind => kind.remap(|input| mapping[&input]),
            };
            let copy = self.insert(kind)?;
            mapping.insert(id, copy);
        }
        Ok(mapping[&root])
    }
}

fn apply_unary(op: UnaryOp, value: &Value) -> Value {
    match op {
        UnaryOp::Neg => map_value(value, |x| -x, |z| -z),
        UnaryOp::Real => map_to_real(value, |x| x, |z| z.re),
        UnaryOp::Imag => map_to_real(value, |_| 0.0, |z| z.im),
        UnaryOp::Conj => map_value(value, |x| x, |z| z.conj()),
        UnaryOp::NormSqr => map_to_real(value, |x| x * x, |z| z.norm_sqr()),
        UnaryOp::Ln => map_value(value, f64::ln, |z| z.ln()),
        UnaryOp::Exp => map_value(value, f64::exp, |z| z.exp()),
        UnaryOp::Sqrt => map_value(value, f64::sqrt, |z| z.sqrt()),
        UnaryOp::Powi(n) => map_value(value, |x| x.powi(n), |z| z.powi(n)),
    }
}

fn evaluate_kernel(kernel: &dyn Kernel, views: &[RealView]) -> Value {
    let call = |i: usize| {
        let mut args = [0.0; MAX_KERNEL_ARITY];
        for (arg, view) in args.iter_mut().zip(views) {
            *arg = view.at(i);
        }
        kernel.compute(&args[..views.len()])
    };
    let n = views.iter().find_map(|view| view.batch_len());
    match (kernel.domain(), n) {
        (Domain::Real, None) => Value::Real(call(0).re),
        (Domain::Complex, None) => Value::Complex(call(0)),
        (Domain::Real, Some(n)) => Value::RealBatch(tabulate(n, |i| call(i).re)),
        (Domain::Complex, Some(n)) => Value::ComplexBatch(tabulate(n, call)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn dataset(x: Vec<f64>) -> DataSet {
        DataSet::from_columns([("x", x)]).unwrap()
    }

    /// head = a * x + b
    fn linear() -> (FunctionTree, NodeId, NodeId) {
        let mut tree = FunctionTree::new();
        let a = tree.parameter(FitParameter::new("a", 2.0)).unwrap();
        let b = tree.parameter(FitParameter::new("b", 1.0)).unwrap();
        let x = tree.variable("x").unwrap();
        let ax = tree.mul(&[a, x]).unwrap();
        let head = tree.add(&[ax, b]).unwrap();
        tree.set_head(head).unwrap();
        (tree, ax, head)
    }

    #[test]
    fn test_linear_scenario() {
        let (mut tree, _, _) = linear();
        let ds = dataset(vec![1.0, 2.0, 3.0]);
        assert_eq!(
            tree.evaluate(&ds).unwrap(),
            &Value::RealBatch(vec![3.0, 5.0, 7.0])
        );
        tree.update_parameter_value("a", 3.0).unwrap();
        assert_eq!(
            tree.evaluate(&ds).unwrap(),
            &Value::RealBatch(vec![4.0, 7.0, 10.0])
        );
    }

    #[test]
    fn test_reevaluation_is_free() {
        let (mut tree, _, _) = linear();
        let ds = dataset(vec![1.0, 2.0, 3.0]);
        let first = tree.evaluate(&ds).unwrap().clone();
        let count = tree.total_recomputes();
        assert_eq!(count, tree.len());
        let second = tree.evaluate(&ds).unwrap().clone();
        assert_eq!(tree.total_recomputes(), count);
        assert_eq!(first, second);
    }

    #[test]
    fn test_parameter_update_is_precise() {
        let (mut tree, ax, head) = linear();
        let ds = dataset(vec![1.0, 2.0, 3.0]);
        tree.evaluate(&ds).unwrap();
        tree.reset_recompute_counters();
        tree.update_parameter_value("b", 5.0).unwrap();
        assert!(!tree.is_dirty(ax).unwrap());
        assert!(tree.is_dirty(head).unwrap());
        tree.evaluate(&ds).unwrap();
        assert_eq!(tree.recompute_count(ax).unwrap(), 0);
        assert_eq!(tree.recompute_count(head).unwrap(), 1);
        assert_eq!(tree.total_recomputes(), 2);
    }

    #[test]
    fn test_shared_subtree_is_computed_once() {
        let mut tree = FunctionTree::new();
        let a = tree.parameter(FitParameter::new("a", 2.0)).unwrap();
        let x = tree.variable("x").unwrap();
        let shared = tree.mul(&[a, x]).unwrap();
        let left = tree.unary(UnaryOp::Exp, shared).unwrap();
        let right = tree.unary(UnaryOp::Sqrt, shared).unwrap();
        let third = tree.unary(UnaryOp::Powi(2), shared).unwrap();
        let head = tree.add(&[left, right, third]).unwrap();
        tree.set_head(head).unwrap();
        assert_eq!(tree.parents(shared).unwrap().len(), 3);
        let ds = dataset(vec![0.5, 2.0]);
        tree.evaluate(&ds).unwrap();
        assert_eq!(tree.recompute_count(shared).unwrap(), 1);
        tree.update_parameter_value("a", 3.0).unwrap();
        let value = tree.evaluate(&ds).unwrap().clone();
        assert_eq!(tree.recompute_count(shared).unwrap(), 2);
        let batch = value.as_real_batch().unwrap();
        assert_relative_eq!(batch[0], 1.5f64.exp() + 1.5f64.sqrt() + 2.25);
        assert_relative_eq!(batch[1], 6.0f64.exp() + 6.0f64.sqrt() + 36.0);
    }

    #[test]
    fn test_unreferenced_parameter_changes_nothing() {
        let (mut tree, _, _) = linear();
        let c = tree.parameters.create_or_get(FitParameter::new("c", 0.0));
        assert_eq!(c, 2);
        let ds = dataset(vec![1.0, 2.0, 3.0]);
        let before = tree.evaluate(&ds).unwrap().clone();
        tree.reset_recompute_counters();
        tree.update_parameter_value("c", 100.0).unwrap();
        let after = tree.evaluate(&ds).unwrap().clone();
        assert_eq!(before, after);
        assert_eq!(tree.total_recomputes(), 0);
    }

    #[test]
    fn test_missing_column_is_structural() {
        let mut tree = FunctionTree::new();
        let x = tree.variable("x").unwrap();
        let y = tree.variable("y").unwrap();
        let head = tree.mul(&[x, y]).unwrap();
        tree.set_head(head).unwrap();
        let ds = dataset(vec![1.0, 2.0]);
        match tree.evaluate(&ds) {
            Err(ArborError::StructuralGraphError { reason }) => assert!(reason.contains("\"y\"")),
            other => panic!("expected a structural error, got {:?}", other),
        }
    }

    #[test]
    fn test_variable_added_after_binding_is_checked() {
        let (mut tree, ax, _) = linear();
        let ds = dataset(vec![1.0, 2.0]);
        tree.evaluate(&ds).unwrap();
        let y = tree.variable("y").unwrap();
        let head = tree.add(&[ax, y]).unwrap();
        tree.set_head(head).unwrap();
        match tree.bind(&ds) {
            Err(ArborError::StructuralGraphError { reason }) => assert!(reason.contains("\"y\"")),
            other => panic!("expected a structural error, got {:?}", other),
        }
        assert!(tree.evaluate(&ds).is_err());
        let ds = DataSet::from_columns([("x", vec![1.0, 2.0]), ("y", vec![0.5, 0.25])]).unwrap();
        tree.reset_recompute_counters();
        assert_eq!(
            tree.evaluate(&ds).unwrap(),
            &Value::RealBatch(vec![2.5, 4.25])
        );
        assert!(tree.bind(&ds).is_ok());
        assert_eq!(tree.recompute_count(ax).unwrap(), 1);
    }

    #[test]
    fn test_rebinding_keeps_parameter_only_caches() {
        let mut tree = FunctionTree::new();
        let a = tree.parameter(FitParameter::new("a", 2.0)).unwrap();
        let b = tree.parameter(FitParameter::new("b", 3.0)).unwrap();
        let ab = tree.mul(&[a, b]).unwrap();
        let x = tree.variable("x").unwrap();
        let head = tree.add(&[ab, x]).unwrap();
        tree.set_head(head).unwrap();
        tree.evaluate(&dataset(vec![1.0])).unwrap();
        tree.reset_recompute_counters();
        let value = tree.evaluate(&dataset(vec![1.0, 2.0])).unwrap().clone();
        assert_eq!(value, Value::RealBatch(vec![7.0, 8.0]));
        assert_eq!(tree.recompute_count(ab).unwrap(), 0);
        assert_eq!(tree.recompute_count(x).unwrap(), 1);
        assert_eq!(tree.total_recomputes(), 2);
    }

    #[test]
    fn test_hash_consing() {
        let mut tree = FunctionTree::new();
        let a = tree.parameter(FitParameter::new("a", 1.0)).unwrap();
        let x = tree.variable("x").unwrap();
        let ax = tree.mul(&[a, x]).unwrap();
        let xa = tree.mul(&[x, a]).unwrap();
        assert_eq!(ax, xa);
        let a_again = tree.parameter(FitParameter::new("a", 10.0)).unwrap();
        assert_eq!(a, a_again);
        assert_eq!(tree.len(), 3);
    }

    #[test]
    fn test_structural_errors_at_insertion() {
        let mut tree = FunctionTree::new();
        assert!(tree.unary(UnaryOp::Neg, NodeId(4)).is_err());
        let x = tree.variable("x").unwrap();
        let data = tree.data(vec![1.0, 2.0]).unwrap();
        assert!(tree.add(&[x, data]).is_err());
        assert!(tree.add(&[]).is_err());
        assert!(tree.insert(NodeKind::Parameter(3)).is_err());
        assert!(tree.evaluate(&dataset(vec![1.0])).is_err());
    }

    #[test]
    fn test_positional_update() {
        let (mut tree, ax, _) = linear();
        let ds = dataset(vec![1.0, 2.0, 3.0]);
        tree.evaluate(&ds).unwrap();
        assert!(tree.update_parameter_values(&[1.0]).is_err());
        tree.update_parameter_values(&[2.0, 0.0]).unwrap();
        assert!(!tree.is_dirty(ax).unwrap());
        assert_eq!(
            tree.evaluate(&ds).unwrap(),
            &Value::RealBatch(vec![2.0, 4.0, 6.0])
        );
    }

    #[test]
    fn test_substitute_data_for_integrals() {
        let mut tree = FunctionTree::new();
        let a = tree.parameter(FitParameter::new("a", 2.0)).unwrap();
        let x = tree.variable("x").unwrap();
        let w = tree.weights().unwrap();
        let ax = tree.mul(&[a, x, w]).unwrap();
        let integral = tree.reduce(ReduceOp::Sum, ax).unwrap();
        let sample = DataSet::new(
            [("x".to_string(), vec![1.0, 2.0])].into_iter().collect(),
            vec![1.0, 0.5],
        )
        .unwrap();
        let fixed = tree.substitute_data(integral, &sample).unwrap();
        assert_ne!(fixed, integral);
        assert_eq!(tree.value_type(fixed).unwrap(), ValueType::real_scalar());
        let other = dataset(vec![10.0, 20.0, 30.0]);
        assert_eq!(tree.evaluate_node(fixed, &other).unwrap(), &Value::Real(4.0));
        tree.update_parameter_value("a", 1.0).unwrap();
        assert_eq!(tree.evaluate_node(fixed, &other).unwrap(), &Value::Real(2.0));
    }

    #[test]
    fn test_polar_and_reductions() {
        let mut tree = FunctionTree::new();
        let r = tree.parameter(FitParameter::new("r", 2.0)).unwrap();
        let phi = tree.variable("x").unwrap();
        let z = tree.polar(r, phi).unwrap();
        let n = tree.unary(UnaryOp::NormSqr, z).unwrap();
        let head = tree.reduce(ReduceOp::Mean, n).unwrap();
        tree.set_head(head).unwrap();
        let value = tree.evaluate(&dataset(vec![0.0, 1.0, 2.0])).unwrap();
        assert_relative_eq!(value.as_real().unwrap(), 4.0, epsilon = 1e-12);
    }
}
