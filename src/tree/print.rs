use std::{collections::HashSet, fmt::Display};

use super::{FunctionTree, NodeId, NodeKind, Value};

impl FunctionTree {
    fn label(&self, id: NodeId) -> String {
        match &self.nodes[id.0].kind {
            NodeKind::Constant(Value::RealBatch(v)) => format!("Data[{}]", v.len()),
            NodeKind::Constant(Value::ComplexBatch(v)) => format!("Data[{}]", v.len()),
            NodeKind::Constant(value) => value.to_string(),
            NodeKind::Parameter(index) => match self.parameters.get_index(*index) {
                Some(parameter) => format!("Parameter({})", parameter.name),
                None => "<unregistered>".to_string(),
            },
            NodeKind::Variable(name) => format!("Variable({})", name),
            NodeKind::Weights => "Weights".to_string(),
            NodeKind::Add(_) => "+".to_string(),
            NodeKind::Mul(_) => "×".to_string(),
            NodeKind::Sub(_, _) => "-".to_string(),
            NodeKind::Div(_, _) => "÷".to_string(),
            NodeKind::Unary(op, _) => op.to_string(),
            NodeKind::Polar(_, _) => "Polar".to_string(),
            NodeKind::Reduce(op, _) => op.to_string(),
            NodeKind::Broadcast { len: None, .. } => "Broadcast".to_string(),
            NodeKind::Broadcast { len: Some(n), .. } => format!("Broadcast[{}]", n),
            NodeKind::Kernel(kernel, _) => kernel.name(),
        }
    }

    fn write_tree(
        &self,
        id: NodeId,
        f: &mut std::fmt::Formatter<'_>,
        parent_prefix: &str,
        immediate_prefix: &str,
        parent_suffix: &str,
        seen: &mut HashSet<NodeId>,
    ) -> std::fmt::Result {
        if !seen.insert(id) {
            return writeln!(
                f,
                "{}{}{} [{}] (shared)",
                parent_prefix,
                immediate_prefix,
                self.label(id),
                id
            );
        }
        let node = &self.nodes[id.0];
        writeln!(
            f,
            "{}{}{} [{}] {{{}}}",
            parent_prefix,
            immediate_prefix,
            self.label(id),
            id,
            node.value_type
        )?;
        let child_prefix = format!("{}{}", parent_prefix, parent_suffix);
        let mut it = node.inputs.iter().peekable();
        while let Some(child) = it.next() {
            match it.peek() {
                Some(_) => self.write_tree(*child, f, &child_prefix, "├─ ", "│  ", seen),
                None => self.write_tree(*child, f, &child_prefix, "└─ ", "   ", seen),
            }?;
        }
        Ok(())
    }

    /// Render the subgraph below `id` as an indented tree.
    pub fn display_node(&self, id: NodeId) -> String {
        if id.0 >= self.nodes.len() {
            return format!("<missing node {}>", id);
        }
        NodeDisplay { tree: self, id }.to_string()
    }
}

struct NodeDisplay<'a> {
    tree: &'a FunctionTree,
    id: NodeId,
}

impl Display for NodeDisplay<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.tree
            .write_tree(self.id, f, "", "", "", &mut HashSet::new())
    }
}

impl Display for FunctionTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.head {
            Some(head) => self.write_tree(head, f, "", "", "", &mut HashSet::new()),
            None => writeln!(f, "<empty tree>"),
        }
    }
}
