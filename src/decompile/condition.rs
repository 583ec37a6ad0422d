//! Boolean conditions and their synthesis from chains of conditional jumps.
//!
//! A chain of blocks that each end in a comparison jump expresses one
//! compound condition. Every path through the chain that reaches the `body`
//! sink contributes one conjunction of branch outcomes; the condition is the
//! disjunction of those conjunctions, simplified.

use crate::code_attribute::SimpleCondition;

use super::cfg_types::{BlockGraph, BlockId};
use super::error::StructureError;
use super::expr::{CompareOp, Expr, Stmt};
use super::stack_sim::Simulator;

/// A boolean expression tree.
#[derive(Clone, Debug, PartialEq)]
pub enum Condition {
    /// Two operands and a comparison operator.
    Compare { op: CompareOp, left: Expr, right: Expr },
    /// Single operand tested for truth (`expected == true`) or falsity.
    Test { operand: Expr, expected: bool },
    And(Vec<Condition>),
    Or(Vec<Condition>),
    Not(Box<Condition>),
    /// Constant condition, as in `while (true)`.
    Const(bool),
}

impl Condition {
    /// The condition under which a conditional jump is taken.
    pub fn from_jump(simple: SimpleCondition, mut operands: Vec<Expr>) -> Condition {
        let op = simple.op;
        if simple.arity == 2 && operands.len() == 2 {
            let right = operands.pop().unwrap_or(Expr::NullLiteral);
            let left = operands.pop().unwrap_or(Expr::NullLiteral);
            return Condition::Compare { op, left, right };
        }
        let operand = operands.pop().unwrap_or(Expr::NullLiteral);
        if simple.null_test {
            return Condition::Compare { op, left: operand, right: Expr::NullLiteral };
        }
        match operand {
            // `lcmp; iflt` and friends fold back into a direct comparison
            Expr::CmpResult { left, right, .. } => Condition::Compare { op, left: *left, right: *right },
            operand if matches!(op, CompareOp::Eq | CompareOp::Ne) => {
                Condition::Test { operand, expected: op == CompareOp::Ne }
            }
            operand => Condition::Compare { op, left: operand, right: Expr::IntLiteral(0) },
        }
    }

    /// Logical negation, pushed into leaves where that is exact.
    pub fn negate(self) -> Condition {
        match self {
            Condition::Compare { op, left, right } => Condition::Compare { op: op.negate(), left, right },
            Condition::Test { operand, expected } => Condition::Test { operand, expected: !expected },
            Condition::Not(inner) => *inner,
            Condition::Const(value) => Condition::Const(!value),
            other => Condition::Not(Box::new(other)),
        }
    }

    /// Flatten nested and/or, fold constants, drop double negation.
    pub fn simplify(self) -> Condition {
        match self {
            Condition::And(terms) => {
                let mut flat = Vec::new();
                for term in terms.into_iter().map(Condition::simplify) {
                    match term {
                        Condition::Const(true) => {}
                        Condition::Const(false) => return Condition::Const(false),
                        Condition::And(inner) => flat.extend(inner),
                        other => flat.push(other),
                    }
                }
                match flat.len() {
                    0 => Condition::Const(true),
                    1 => flat.pop().unwrap_or(Condition::Const(true)),
                    _ => Condition::And(flat),
                }
            }
            Condition::Or(terms) => {
                let mut flat = Vec::new();
                for term in terms.into_iter().map(Condition::simplify) {
                    match term {
                        Condition::Const(false) => {}
                        Condition::Const(true) => return Condition::Const(true),
                        Condition::Or(inner) => flat.extend(inner),
                        other => flat.push(other),
                    }
                }
                match flat.len() {
                    0 => Condition::Const(false),
                    1 => flat.pop().unwrap_or(Condition::Const(false)),
                    _ => Condition::Or(flat),
                }
            }
            Condition::Not(inner) => inner.simplify().negate(),
            leaf => leaf,
        }
    }

    /// Evaluate with `leaf` deciding every comparison and test.
    pub fn evaluate(&self, leaf: &mut dyn FnMut(&Condition) -> bool) -> bool {
        match self {
            Condition::Compare { .. } | Condition::Test { .. } => leaf(self),
            Condition::And(terms) => terms.iter().all(|t| t.evaluate(leaf)),
            Condition::Or(terms) => terms.iter().any(|t| t.evaluate(leaf)),
            Condition::Not(inner) => !inner.evaluate(leaf),
            Condition::Const(value) => *value,
        }
    }

    /// Number of comparison and test leaves.
    pub fn leaf_count(&self) -> usize {
        match self {
            Condition::Compare { .. } | Condition::Test { .. } => 1,
            Condition::And(terms) | Condition::Or(terms) => terms.iter().map(Condition::leaf_count).sum(),
            Condition::Not(inner) => inner.leaf_count(),
            Condition::Const(_) => 0,
        }
    }

    pub fn references_local(&self, slot: u16) -> bool {
        let mut found = false;
        self.for_each_expr(&mut |e| found |= e.references_local(slot));
        found
    }

    pub fn has_side_effects(&self) -> bool {
        let mut found = false;
        self.for_each_expr(&mut |e| found |= e.has_side_effects());
        found
    }

    pub fn bind_stack_inputs(&mut self, incoming: &[Expr]) {
        self.for_each_expr_mut(&mut |e| e.bind_stack_inputs(incoming));
    }

    pub fn for_each_expr(&self, f: &mut dyn FnMut(&Expr)) {
        match self {
            Condition::Compare { left, right, .. } => {
                f(left);
                f(right);
            }
            Condition::Test { operand, .. } => f(operand),
            Condition::And(terms) | Condition::Or(terms) => {
                for term in terms {
                    term.for_each_expr(f);
                }
            }
            Condition::Not(inner) => inner.for_each_expr(f),
            Condition::Const(_) => {}
        }
    }

    pub fn for_each_expr_mut(&mut self, f: &mut dyn FnMut(&mut Expr)) {
        match self {
            Condition::Compare { left, right, .. } => {
                f(left);
                f(right);
            }
            Condition::Test { operand, .. } => f(operand),
            Condition::And(terms) | Condition::Or(terms) => {
                for term in terms {
                    term.for_each_expr_mut(f);
                }
            }
            Condition::Not(inner) => inner.for_each_expr_mut(f),
            Condition::Const(_) => {}
        }
    }
}

/// One block of a condition chain. `condition` holds when the `target`
/// edge is taken.
#[derive(Clone, Debug)]
pub struct ChainNode {
    pub block: BlockId,
    pub condition: Condition,
    pub target: BlockId,
    pub else_target: BlockId,
}

/// A literal of the path formula: (chain node, branch taken).
type Literal = (usize, bool);

/// Build the condition under which control entering `nodes[0]` reaches
/// `body` rather than `ret`.
pub fn synthesize(nodes: &[ChainNode], body: BlockId, ret: BlockId) -> Result<Condition, StructureError> {
    let first = nodes
        .first()
        .ok_or_else(|| StructureError::unreachable(body, "empty condition chain"))?;
    let mut paths = Vec::new();
    let mut on_path = vec![false; nodes.len()];
    walk_paths(nodes, body, ret, 0, &mut Vec::new(), &mut on_path, &mut paths)?;
    log::trace!(
        "condition chain at block {}: {} nodes, {} paths reach body",
        first.block,
        nodes.len(),
        paths.len()
    );

    let terms = simplify_terms(paths);
    Ok(build_condition(nodes, &terms).simplify())
}

fn walk_paths(
    nodes: &[ChainNode],
    body: BlockId,
    ret: BlockId,
    node: usize,
    path: &mut Vec<Literal>,
    on_path: &mut Vec<bool>,
    out: &mut Vec<Vec<Literal>>,
) -> Result<(), StructureError> {
    if on_path[node] {
        return Err(StructureError::malformed(nodes[node].block, "condition chain loops back on itself"));
    }
    on_path[node] = true;
    let edges = [(nodes[node].target, true), (nodes[node].else_target, false)];
    for (edge, taken) in edges {
        path.push((node, taken));
        if edge == body {
            out.push(path.clone());
        } else if edge != ret {
            let next = nodes.iter().position(|n| n.block == edge).ok_or_else(|| {
                StructureError::malformed(
                    nodes[node].block,
                    format!("condition chain leaves to block {} outside its sinks", edge),
                )
            })?;
            walk_paths(nodes, body, ret, next, path, on_path, out)?;
        }
        path.pop();
    }
    on_path[node] = false;
    Ok(())
}

/// Rewrite the disjunction of path conjunctions to an equivalent, smaller one.
fn simplify_terms(mut terms: Vec<Vec<Literal>>) -> Vec<Vec<Literal>> {
    for term in &mut terms {
        let mut seen = Vec::new();
        term.retain(|lit| {
            let fresh = !seen.contains(lit);
            seen.push(*lit);
            fresh
        });
    }
    terms.retain(|term| !term.iter().any(|&(n, v)| term.contains(&(n, !v))));

    loop {
        let mut changed = false;

        // (P & x) | (Q & !x) with P ⊆ Q  ==>  (P & x) | Q
        'reduce: for a in 0..terms.len() {
            for b in 0..terms.len() {
                if a == b {
                    continue;
                }
                for &(node, value) in &terms[a] {
                    let opposite = (node, !value);
                    if !terms[b].contains(&opposite) {
                        continue;
                    }
                    let rest_in_b = terms[a]
                        .iter()
                        .filter(|&&lit| lit != (node, value))
                        .all(|lit| terms[b].contains(lit));
                    if rest_in_b {
                        terms[b].retain(|&lit| lit != opposite);
                        changed = true;
                        break 'reduce;
                    }
                }
            }
        }

        // Absorption: P | (P & Q)  ==>  P
        let mut keep = vec![true; terms.len()];
        for a in 0..terms.len() {
            for b in 0..terms.len() {
                if a == b || !keep[a] || !keep[b] {
                    continue;
                }
                let subset = terms[a].iter().all(|lit| terms[b].contains(lit));
                if subset && (terms[a].len() < terms[b].len() || a < b) {
                    keep[b] = false;
                    changed = true;
                }
            }
        }
        let mut index = 0;
        terms.retain(|_| {
            index += 1;
            keep[index - 1]
        });

        if !changed {
            return terms;
        }
    }
}

fn literal(nodes: &[ChainNode], (node, taken): Literal) -> Condition {
    let condition = nodes[node].condition.clone();
    if taken {
        condition
    } else {
        condition.negate()
    }
}

/// Turn simplified terms into a tree, factoring out shared literals.
fn build_condition(nodes: &[ChainNode], terms: &[Vec<Literal>]) -> Condition {
    if terms.is_empty() {
        return Condition::Const(false);
    }
    if terms.iter().any(|t| t.is_empty()) {
        return Condition::Const(true);
    }

    let common: Vec<Literal> = terms[0]
        .iter()
        .copied()
        .filter(|lit| terms.iter().all(|t| t.contains(lit)))
        .collect();
    if !common.is_empty() {
        let mut factors: Vec<Condition> = common.iter().map(|&lit| literal(nodes, lit)).collect();
        let rests: Vec<Vec<Literal>> = terms
            .iter()
            .map(|t| t.iter().copied().filter(|lit| !common.contains(lit)).collect())
            .collect();
        if rests.iter().all(|r: &Vec<Literal>| !r.is_empty()) {
            factors.push(build_condition(nodes, &rests));
        }
        return Condition::And(factors);
    }

    // Group neighbouring terms that start with the same literal.
    let mut groups: Vec<Vec<Vec<Literal>>> = Vec::new();
    for term in terms {
        match groups.last_mut() {
            Some(group) if group[0][0] == term[0] => group.push(term.clone()),
            _ => groups.push(vec![term.clone()]),
        }
    }
    Condition::Or(groups.iter().map(|group| build_condition(nodes, group)).collect())
}

/// A synthesized condition plus how its chain touches the operand stack.
#[derive(Clone, Debug, PartialEq)]
pub struct Guard {
    pub condition: Condition,
    /// Entry-stack values the chain head pops (a ternary value it tests).
    pub consumed: usize,
    /// Values the chain head pushes below its operands, left for whatever
    /// follows (e.g. a receiver pushed before a ternary argument).
    pub carried: Vec<Expr>,
    /// Statements the chain head runs before its condition; only present
    /// when condition headers were not split off.
    pub prelude: Vec<Stmt>,
    /// Instruction index of the chain head, for error reports.
    pub origin: usize,
}

impl Guard {
    pub fn constant(value: bool, origin: usize) -> Guard {
        Guard {
            condition: Condition::Const(value),
            consumed: 0,
            carried: Vec::new(),
            prelude: Vec::new(),
            origin,
        }
    }

    /// No stack traffic and no statements: only the condition itself.
    pub fn is_pure(&self) -> bool {
        self.consumed == 0 && self.carried.is_empty() && self.prelude.is_empty()
    }
}

/// Simulate the chain blocks and synthesize their condition.
pub fn build_guard(
    graph: &BlockGraph,
    sim: &Simulator,
    chain: &[BlockId],
    body: BlockId,
    ret: BlockId,
) -> Result<Guard, StructureError> {
    let mut nodes = Vec::with_capacity(chain.len());
    let mut consumed = 0;
    let mut carried = Vec::new();
    let mut prelude = Vec::new();
    let mut origin = 0;
    for (k, &id) in chain.iter().enumerate() {
        let block = graph.block(id)?;
        let simulated = sim.simulate(block)?;
        if k > 0 && !simulated.statements.is_empty() {
            return Err(StructureError::unsupported(
                block.report_index(),
                "statements inside a compound condition",
            ));
        }
        let condition = simulated
            .branch_condition()
            .cloned()
            .ok_or_else(|| StructureError::unreachable(block.report_index(), "condition chain block has no comparison"))?;
        let (target, else_target) = match (block.target, block.else_target) {
            (Some(t), Some(e)) => (t, e),
            _ => {
                return Err(StructureError::unreachable(
                    block.report_index(),
                    "condition chain block lacks a conditional pair",
                ))
            }
        };
        if k == 0 {
            consumed = simulated.consumed;
            carried = simulated.exit_stack;
            prelude = simulated.statements;
            origin = block.report_index();
        } else if simulated.consumed > 0 || !simulated.exit_stack.is_empty() {
            return Err(StructureError::unsupported(
                block.report_index(),
                "stack values flow through the middle of a condition chain",
            ));
        }
        nodes.push(ChainNode { block: id, condition, target, else_target });
    }
    let condition = synthesize(&nodes, body, ret)?;
    Ok(Guard { condition, consumed, carried, prelude, origin })
}
