//! Items related to expressions.
//!
//! An expression is a binary tree stored within a `petgraph` arena. Each node is either an
//! `Operator` with exactly two inputs or a `Terminal` with none. Inputs are attached via edges
//! that point from the child to its parent and are weighted by the `Side` they occupy.

use crate::error::Error;
use fnv::FnvHashMap;
use petgraph::visit::EdgeRef;
use petgraph::{self, Incoming, Outgoing};
use rand::Rng;
use std::collections::HashMap;
use std::fmt;
use std::hash::BuildHasher;

/// The directed graph type used to represent an expression.
pub type DiGraph = petgraph::graph::DiGraph<Node, Side, u32>;

/// The node index type used within the expr DiGraph type.
pub type NodeIndex = petgraph::graph::NodeIndex<u32>;

// Traits.

/// Named-variable values that an expression is evaluated against.
pub trait Bindings {
    /// The value bound to `name`, if any.
    fn value(&self, name: &str) -> Option<f64>;
}

// Model.

/// Binary arithmetic operators.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Operator {
    Add,
    Sub,
    Mul,
    Div,
}

/// The leaves of an expression.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Terminal {
    /// Looked up within the `Bindings` at evaluation time.
    Variable(&'static str),
    Constant(f64),
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Kind {
    Operator(Operator),
    Terminal(Terminal),
}

/// A single node within the expression arena.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Node {
    pub kind: Kind,
    /// Distance from the root plus one. Only valid after `Expr::recompute_depths`.
    pub depth: u32,
}

/// The operand slot that a child occupies beneath its operator.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Side {
    Left,
    Right,
}

/// The operators, variables and constants from which expressions are generated.
///
/// Both `operators` and the union of `variables` and `constants` must be non-empty.
#[derive(Copy, Clone, Debug)]
pub struct PrimitiveSet {
    pub operators: &'static [Operator],
    pub variables: &'static [&'static str],
    pub constants: &'static [f64],
}

/// An expression tree. The root always lives at node index `0`.
#[derive(Clone, Debug)]
pub struct Expr {
    graph: DiGraph,
}

// Impls.

impl Operator {
    pub const ALL: [Operator; 4] = [Operator::Add, Operator::Sub, Operator::Mul, Operator::Div];

    pub fn symbol(self) -> &'static str {
        match self {
            Operator::Add => "+",
            Operator::Sub => "-",
            Operator::Mul => "x",
            Operator::Div => "/",
        }
    }

    /// Apply the operator with `right` as the first operand and `left` as the second.
    ///
    /// Division by a zero `left` divides by `1` instead.
    pub fn apply(self, right: f64, left: f64) -> f64 {
        match self {
            Operator::Add => right + left,
            Operator::Sub => right - left,
            Operator::Mul => right * left,
            Operator::Div => right / if left == 0.0 { 1.0 } else { left },
        }
    }
}

impl PrimitiveSet {
    pub fn random_operator<R: Rng>(&self, rng: &mut R) -> Operator {
        self.operators[rng.gen_range(0..self.operators.len())]
    }

    /// A terminal drawn uniformly from the union of variables and constants.
    pub fn random_terminal<R: Rng>(&self, rng: &mut R) -> Terminal {
        let n_vars = self.variables.len();
        let n = rng.gen_range(0..n_vars + self.constants.len());
        if n < n_vars {
            Terminal::Variable(self.variables[n])
        } else {
            Terminal::Constant(self.constants[n - n_vars])
        }
    }

    /// An operator or a terminal with equal probability.
    pub fn random_kind<R: Rng>(&self, rng: &mut R) -> Kind {
        if rng.gen_bool(0.5) {
            Kind::Operator(self.random_operator(rng))
        } else {
            Kind::Terminal(self.random_terminal(rng))
        }
    }
}

impl Expr {
    /// An expression consisting of a single terminal.
    pub fn terminal(terminal: Terminal) -> Self {
        let mut graph = DiGraph::new();
        graph.add_node(Node { kind: Kind::Terminal(terminal), depth: 1 });
        Expr { graph }
    }

    pub fn variable(name: &'static str) -> Self {
        Self::terminal(Terminal::Variable(name))
    }

    pub fn constant(value: f64) -> Self {
        Self::terminal(Terminal::Constant(value))
    }

    /// Combine two expressions beneath a new operator root. Both operands are deep-copied.
    pub fn operator(op: Operator, left: &Expr, right: &Expr) -> Self {
        let mut graph = DiGraph::with_capacity(1 + left.node_count() + right.node_count(), 0);
        let root = graph.add_node(Node { kind: Kind::Operator(op), depth: 1 });
        let r = right.copy_into(&mut graph, right.root(), None);
        graph.add_edge(r, root, Side::Right);
        let l = left.copy_into(&mut graph, left.root(), None);
        graph.add_edge(l, root, Side::Left);
        let mut expr = Expr { graph };
        expr.recompute_depths();
        expr
    }

    pub fn root(&self) -> NodeIndex {
        NodeIndex::new(0)
    }

    pub fn node(&self, nx: NodeIndex) -> &Node {
        &self.graph[nx]
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Read-only access to the underlying arena.
    pub fn graph(&self) -> &DiGraph {
        &self.graph
    }

    /// The input occupying the given side of `nx`.
    pub fn child(&self, nx: NodeIndex, side: Side) -> Option<NodeIndex> {
        self.graph
            .edges_directed(nx, Incoming)
            .find(|e| *e.weight() == side)
            .map(|e| e.source())
    }

    /// The `(left, right)` operands of an operator node.
    pub fn operands(&self, nx: NodeIndex) -> Result<(NodeIndex, NodeIndex), Error> {
        match (self.child(nx, Side::Left), self.child(nx, Side::Right)) {
            (Some(left), Some(right)) => Ok((left, right)),
            _ => Err(Error::MalformedTree {
                node: nx.index(),
                reason: "operator is missing an operand",
            }),
        }
    }

    /// The depth of the tree: the greatest stored depth among its leaves.
    pub fn depth(&self) -> u32 {
        self.depth_from(self.root())
    }

    fn depth_from(&self, nx: NodeIndex) -> u32 {
        self.graph
            .neighbors_directed(nx, Incoming)
            .map(|child| self.depth_from(child))
            .max()
            .unwrap_or(self.graph[nx].depth)
    }

    /// Re-label every node with its distance from the root plus one.
    pub fn recompute_depths(&mut self) {
        let mut stack = vec![(self.root(), 1)];
        while let Some((nx, depth)) = stack.pop() {
            self.graph[nx].depth = depth;
            let children = self.graph.neighbors_directed(nx, Incoming).collect::<Vec<_>>();
            stack.extend(children.into_iter().map(|child| (child, depth + 1)));
        }
    }

    /// Every operator node in pre-order, visiting the right input before the left.
    pub fn internal_nodes(&self) -> Vec<NodeIndex> {
        let mut nodes = vec![];
        let mut stack = vec![self.root()];
        while let Some(nx) = stack.pop() {
            if let Some(right) = self.child(nx, Side::Right) {
                nodes.push(nx);
                if let Some(left) = self.child(nx, Side::Left) {
                    stack.push(left);
                }
                stack.push(right);
            }
        }
        nodes
    }

    /// Evaluate the expression in terms of the given bindings.
    pub fn evaluate<B>(&self, bindings: &B) -> Result<f64, Error>
    where
        B: Bindings + ?Sized,
    {
        self.evaluate_node(self.root(), bindings)
    }

    fn evaluate_node<B>(&self, nx: NodeIndex, bindings: &B) -> Result<f64, Error>
    where
        B: Bindings + ?Sized,
    {
        match self.graph[nx].kind {
            Kind::Operator(op) => {
                let (left, right) = self.operands(nx)?;
                let right = self.evaluate_node(right, bindings)?;
                let left = self.evaluate_node(left, bindings)?;
                Ok(op.apply(right, left))
            }
            Kind::Terminal(Terminal::Constant(value)) => Ok(value),
            Kind::Terminal(Terminal::Variable(name)) => bindings
                .value(name)
                .ok_or_else(|| Error::UnboundVariable(name.to_string())),
        }
    }

    /// Clone the subtree whose root is at the given node into a new expression.
    pub fn clone_subtree(&self, subtree_root: NodeIndex) -> Expr {
        let mut graph = DiGraph::new();
        self.copy_into(&mut graph, subtree_root, None);
        let mut expr = Expr { graph };
        expr.recompute_depths();
        expr
    }

    /// A copy of this expression with the subtree at `nx` replaced by a copy of `subtree`.
    pub fn replace_subtree(&self, nx: NodeIndex, subtree: &Expr) -> Expr {
        let capacity = self.node_count() + subtree.node_count();
        let mut graph = DiGraph::with_capacity(capacity, capacity);
        self.copy_into(&mut graph, self.root(), Some((nx, subtree)));
        let mut expr = Expr { graph };
        expr.recompute_depths();
        expr
    }

    // Copies the subtree at `nx` into `dst` in pre-order, substituting the graft where it applies.
    fn copy_into(
        &self,
        dst: &mut DiGraph,
        nx: NodeIndex,
        graft: Option<(NodeIndex, &Expr)>,
    ) -> NodeIndex {
        if let Some((target, subtree)) = graft {
            if nx == target {
                return subtree.copy_into(dst, subtree.root(), None);
            }
        }
        let copy = dst.add_node(self.graph[nx]);
        for &side in &[Side::Right, Side::Left] {
            if let Some(child) = self.child(nx, side) {
                let child_copy = self.copy_into(dst, child, graft);
                dst.add_edge(child_copy, copy, side);
            }
        }
        copy
    }

    /// Check the structural invariants of the tree.
    ///
    /// Every non-root node has exactly one parent, operators have exactly one input on each
    /// side, terminals have none and every stored depth matches its distance from the root.
    pub fn validate(&self) -> Result<(), Error> {
        let malformed =
            |nx: NodeIndex, reason| Err(Error::MalformedTree { node: nx.index(), reason });
        for nx in self.graph.node_indices() {
            let mut parents = self.graph.edges_directed(nx, Outgoing);
            let expected_depth = match (nx == self.root(), parents.next(), parents.next()) {
                (true, None, _) => 1,
                (false, Some(e), None) => self.graph[e.target()].depth + 1,
                (true, Some(_), _) => return malformed(nx, "root has a parent"),
                _ => return malformed(nx, "node must have exactly one parent"),
            };
            if self.graph[nx].depth != expected_depth {
                return malformed(nx, "stored depth is stale");
            }
            let inputs = self.graph.edges_directed(nx, Incoming).count();
            match self.graph[nx].kind {
                Kind::Operator(_) => {
                    self.operands(nx)?;
                    if inputs != 2 {
                        return malformed(nx, "operator must have exactly two operands");
                    }
                }
                Kind::Terminal(_) => {
                    if inputs != 0 {
                        return malformed(nx, "terminal has operands");
                    }
                }
            }
        }
        Ok(())
    }

    fn fmt_node(&self, nx: NodeIndex, f: &mut fmt::Formatter) -> fmt::Result {
        match self.graph[nx].kind {
            Kind::Terminal(t) => write!(f, "{}", t),
            Kind::Operator(op) => match self.operands(nx) {
                Ok((left, right)) => {
                    write!(f, "(")?;
                    self.fmt_node(right, f)?;
                    write!(f, " {} ", op.symbol())?;
                    self.fmt_node(left, f)?;
                    write!(f, ")")
                }
                Err(_) => write!(f, "(<malformed> {} <malformed>)", op.symbol()),
            },
        }
    }
}

/// Generate a random expression whose depth never exceeds `max_depth`.
///
/// With a `max_depth` of `1` the expression is a single terminal (`0` is treated as `1`).
/// Otherwise the root is an operator and every input is grown recursively, forcing terminals
/// at `max_depth`.
pub fn gen<R>(rng: &mut R, primitives: &PrimitiveSet, max_depth: u32) -> Expr
where
    R: Rng,
{
    if max_depth <= 1 {
        return Expr::terminal(primitives.random_terminal(rng));
    }
    let mut graph = DiGraph::new();
    let kind = Kind::Operator(primitives.random_operator(rng));
    let root = graph.add_node(Node { kind, depth: 1 });
    grow(rng, primitives, &mut graph, root, 2, max_depth);
    Expr { graph }
}

// Attach both inputs of `parent` at `depth`, recursing into any operators.
fn grow<R>(
    rng: &mut R,
    primitives: &PrimitiveSet,
    g: &mut DiGraph,
    parent: NodeIndex,
    depth: u32,
    max_depth: u32,
) where
    R: Rng,
{
    for &side in &[Side::Right, Side::Left] {
        let kind = if depth >= max_depth {
            Kind::Terminal(primitives.random_terminal(rng))
        } else {
            primitives.random_kind(rng)
        };
        let child = g.add_node(Node { kind, depth });
        g.add_edge(child, parent, side);
        if let Kind::Operator(_) = kind {
            grow(rng, primitives, g, child, depth + 1, max_depth);
        }
    }
}

// Bindings impls.

impl<S: BuildHasher> Bindings for HashMap<String, f64, S> {
    fn value(&self, name: &str) -> Option<f64> {
        self.get(name).cloned()
    }
}

impl<'a> Bindings for [(&'a str, f64)] {
    fn value(&self, name: &str) -> Option<f64> {
        self.iter().find(|&&(n, _)| n == name).map(|&(_, v)| v)
    }
}

/// Bindings keyed by owned variable names.
pub type BindingMap = FnvHashMap<String, f64>;

// Display impls.

impl fmt::Display for Terminal {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Terminal::Variable(name) => write!(f, "{}", name),
            Terminal::Constant(value) => write!(f, "{}", value),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.fmt_node(self.root(), f)
    }
}
