//! Turns the section tree into structured statements by replaying every
//! block over one operand stack that flows through the tree.

use super::condition::{Condition, Guard};
use super::error::StructureError;
use super::expr::{Expr, Stmt};
use super::stack_sim::{Branch, Simulator};
use super::structured_types::*;

pub struct Assembler<'a> {
    sim: &'a Simulator<'a>,
    rewrite_for_loops: bool,
}

impl<'a> Assembler<'a> {
    pub fn new(sim: &'a Simulator<'a>, rewrite_for_loops: bool) -> Self {
        Self { sim, rewrite_for_loops }
    }

    pub fn assemble(&self, sections: Vec<BlockSection>) -> Result<StructuredBody, StructureError> {
        let mut stack = Vec::new();
        let mut out = Vec::new();
        self.assemble_seq(sections, &mut stack, &mut out)?;
        if !stack.is_empty() {
            return Err(StructureError::malformed(0, format!("{} values left on the operand stack", stack.len())));
        }
        Ok(StructuredBody::new(out))
    }

    fn assemble_seq(
        &self,
        sections: Vec<BlockSection>,
        stack: &mut Vec<Expr>,
        out: &mut Vec<StructuredStmt>,
    ) -> Result<(), StructureError> {
        for section in sections {
            self.assemble_section(section, stack, out)?;
        }
        Ok(())
    }

    fn assemble_section(
        &self,
        section: BlockSection,
        stack: &mut Vec<Expr>,
        out: &mut Vec<StructuredStmt>,
    ) -> Result<(), StructureError> {
        match section {
            BlockSection::Inline(block) => {
                let simulated = self.sim.simulate(&block)?;
                let incoming = take_inputs(stack, simulated.consumed, block.report_index())?;
                for mut stmt in simulated.statements {
                    stmt.bind_stack_inputs(&incoming);
                    out.push(StructuredStmt::Simple(stmt));
                }
                for mut value in simulated.exit_stack {
                    value.bind_stack_inputs(&incoming);
                    stack.push(value);
                }
            }
            BlockSection::If { guard, body, elifs, else_body } => {
                let condition = bind_guard(guard, stack, out)?;
                let height = stack.len();
                let then_body = self.branch(body, stack, height)?;
                let mut arms = Vec::with_capacity(elifs.len());
                for (guard, body) in elifs {
                    let origin = guard.origin;
                    let mut trial = stack.clone();
                    let mut prelude = Vec::new();
                    let condition = bind_guard(guard, &mut trial, &mut prelude)?;
                    if !prelude.is_empty() || trial.len() != height {
                        return Err(StructureError::unsupported(origin, "else-if condition with stack traffic"));
                    }
                    arms.push((condition, self.branch(body, stack, height)?));
                }
                let else_body = match else_body {
                    Some(body) => Some(self.branch(body, stack, height)?).filter(|b| !b.is_empty()),
                    None => None,
                };
                push_if(condition, then_body, arms, else_body, out);
            }
            BlockSection::While { guard, body } => {
                if !guard.is_pure() {
                    return Err(StructureError::unsupported(
                        guard.origin,
                        "loop condition that runs statements or moves stack values",
                    ));
                }
                let condition = guard.condition;
                let body = self.branch(body, stack, stack.len())?;
                if let Some(stmt) = self.as_for_loop(&condition, &body, out) {
                    out.pop();
                    out.push(stmt);
                } else {
                    out.push(StructuredStmt::While { condition, body });
                }
            }
            BlockSection::DoWhile { guard, body } => {
                if guard.consumed > 0 || !guard.carried.is_empty() {
                    return Err(StructureError::unsupported(guard.origin, "do-while condition that moves stack values"));
                }
                let mut body = self.branch(body, stack, stack.len())?;
                body.extend(guard.prelude.into_iter().map(StructuredStmt::Simple));
                out.push(StructuredStmt::DoWhile { body, condition: guard.condition });
            }
            BlockSection::Switch { selector, cases } => {
                let report = selector.report_index();
                let simulated = self.sim.simulate(&selector)?;
                let incoming = take_inputs(stack, simulated.consumed, report)?;
                for mut stmt in simulated.statements {
                    stmt.bind_stack_inputs(&incoming);
                    out.push(StructuredStmt::Simple(stmt));
                }
                let mut selector = match simulated.branch {
                    Some(Branch::Switch(expr)) => expr,
                    _ => return Err(StructureError::unreachable(report, "switch block has no selector")),
                };
                selector.bind_stack_inputs(&incoming);
                if !simulated.exit_stack.is_empty() {
                    return Err(StructureError::unsupported(report, "switch leaves values on the operand stack"));
                }
                let height = stack.len();
                let mut arms = Vec::with_capacity(cases.len());
                for case in cases {
                    arms.push(SwitchCase {
                        values: case.keys,
                        is_default: case.is_default,
                        body: self.branch(case.body, stack, height)?,
                        breaks: case.breaks,
                        falls_through: case.falls_through,
                    });
                }
                out.push(StructuredStmt::Switch { selector, cases: arms });
            }
            BlockSection::TryCatch { body, catches } => {
                let height = stack.len();
                let try_body = self.branch(body, stack, height)?;
                let mut clauses = Vec::with_capacity(catches.len());
                for catch in catches {
                    let mut inner = stack.clone();
                    inner.push(Expr::CaughtException);
                    let mut body = Vec::new();
                    self.assemble_seq(catch.body, &mut inner, &mut body)?;
                    // an empty handler body never popped the exception
                    if inner.len() == height + 1 && matches!(inner.last(), Some(Expr::CaughtException)) {
                        inner.pop();
                    }
                    if inner.len() != height {
                        return Err(StructureError::unsupported(0, "catch body changes the operand stack height"));
                    }
                    if matches!(
                        body.first(),
                        Some(StructuredStmt::Simple(Stmt::LocalStore { value: Expr::CaughtException, .. }))
                    ) {
                        body.remove(0);
                    }
                    clauses.push(CatchClause { exception_types: catch.exception_types, var: catch.local, body });
                }
                out.push(StructuredStmt::TryCatch { try_body, catches: clauses });
            }
            BlockSection::Ternary { guard, true_sections, false_sections } => {
                let origin = guard.origin;
                let condition = bind_guard(guard, stack, out)?;
                let then_expr = self.value(true_sections, stack, origin)?;
                let else_expr = self.value(false_sections, stack, origin)?;
                stack.push(Expr::Ternary {
                    condition: Box::new(condition),
                    then_expr: Box::new(then_expr),
                    else_expr: Box::new(else_expr),
                });
            }
            BlockSection::Break => out.push(StructuredStmt::Break),
            BlockSection::Continue => out.push(StructuredStmt::Continue),
        }
        Ok(())
    }

    /// Assemble a nested body on a copy of the stack; it must hand the
    /// stack back at `height`.
    fn branch(
        &self,
        sections: Vec<BlockSection>,
        stack: &[Expr],
        height: usize,
    ) -> Result<Vec<StructuredStmt>, StructureError> {
        let mut inner = stack.to_vec();
        let mut body = Vec::new();
        self.assemble_seq(sections, &mut inner, &mut body)?;
        if inner.len() != height && !ends_abruptly(&body) {
            return Err(StructureError::unsupported(
                0,
                format!("branch leaves {} values where {} were expected", inner.len(), height),
            ));
        }
        Ok(body)
    }

    /// Assemble one ternary arm; it must leave exactly one value.
    fn value(&self, sections: Vec<BlockSection>, stack: &[Expr], origin: usize) -> Result<Expr, StructureError> {
        let mut inner = stack.to_vec();
        let mut body = Vec::new();
        self.assemble_seq(sections, &mut inner, &mut body)?;
        if !body.is_empty() {
            return Err(StructureError::unsupported(origin, "statements inside a conditional expression arm"));
        }
        if inner.len() != stack.len() + 1 {
            return Err(StructureError::malformed(
                origin,
                format!("conditional expression arm leaves {} values", inner.len() as isize - stack.len() as isize),
            ));
        }
        inner
            .pop()
            .ok_or_else(|| StructureError::malformed(origin, "conditional expression arm leaves no value"))
    }

    /// `init; while (cond) { ...; update; }` as a for loop, when `init`
    /// stores the local the condition tests and `update` steps.
    fn as_for_loop(
        &self,
        condition: &Condition,
        body: &[StructuredStmt],
        out: &[StructuredStmt],
    ) -> Option<StructuredStmt> {
        if !self.rewrite_for_loops {
            return None;
        }
        let init = match out.last() {
            Some(StructuredStmt::Simple(stmt @ Stmt::LocalStore { .. })) => stmt,
            _ => return None,
        };
        let slot = match init {
            Stmt::LocalStore { var, .. } => var.index,
            _ => return None,
        };
        let (update, rest) = match body.split_last() {
            Some((StructuredStmt::Simple(update), rest)) if update.increments_local() == Some(slot) => (update, rest),
            _ => return None,
        };
        if !condition.references_local(slot) || has_own_continue(rest) {
            return None;
        }
        log::trace!("while loop over local {} rewritten as for loop", slot);
        Some(StructuredStmt::For {
            init: init.clone(),
            condition: condition.clone(),
            update: update.clone(),
            body: rest.to_vec(),
        })
    }
}

/// Pop the values a block reads from below its entry, bottom to top.
fn take_inputs(stack: &mut Vec<Expr>, consumed: usize, index: usize) -> Result<Vec<Expr>, StructureError> {
    if consumed > stack.len() {
        return Err(StructureError::malformed(
            index,
            format!("block pops {} values but only {} are on the stack", consumed, stack.len()),
        ));
    }
    Ok(stack.split_off(stack.len() - consumed))
}

/// Emit the guard's prelude, leave its carried values on the stack and
/// return its condition with stack inputs bound.
fn bind_guard(guard: Guard, stack: &mut Vec<Expr>, out: &mut Vec<StructuredStmt>) -> Result<Condition, StructureError> {
    let incoming = take_inputs(stack, guard.consumed, guard.origin)?;
    for mut stmt in guard.prelude {
        stmt.bind_stack_inputs(&incoming);
        out.push(StructuredStmt::Simple(stmt));
    }
    for mut value in guard.carried {
        value.bind_stack_inputs(&incoming);
        stack.push(value);
    }
    let mut condition = guard.condition;
    condition.bind_stack_inputs(&incoming);
    Ok(condition)
}

fn push_if(
    condition: Condition,
    then_body: Vec<StructuredStmt>,
    elifs: Vec<(Condition, Vec<StructuredStmt>)>,
    else_body: Option<Vec<StructuredStmt>>,
    out: &mut Vec<StructuredStmt>,
) {
    if then_body.is_empty() && elifs.is_empty() {
        match else_body {
            None if !condition.has_side_effects() => {}
            None => out.push(StructuredStmt::If { condition, then_body, elifs, else_body: None }),
            Some(body) => out.push(StructuredStmt::If {
                condition: condition.negate().simplify(),
                then_body: body,
                elifs,
                else_body: None,
            }),
        }
        return;
    }
    out.push(StructuredStmt::If { condition, then_body, elifs, else_body });
}

fn ends_abruptly(body: &[StructuredStmt]) -> bool {
    matches!(
        body.last(),
        Some(StructuredStmt::Simple(Stmt::Return(_) | Stmt::Throw(_)) | StructuredStmt::Break | StructuredStmt::Continue)
    )
}

/// A `continue` that belongs to this loop rather than a nested one.
fn has_own_continue(stmts: &[StructuredStmt]) -> bool {
    stmts.iter().any(|stmt| match stmt {
        StructuredStmt::Continue => true,
        StructuredStmt::If { then_body, elifs, else_body, .. } => {
            has_own_continue(then_body)
                || elifs.iter().any(|(_, body)| has_own_continue(body))
                || else_body.as_deref().map_or(false, has_own_continue)
        }
        StructuredStmt::Switch { cases, .. } => cases.iter().any(|case| has_own_continue(&case.body)),
        StructuredStmt::TryCatch { try_body, catches } => {
            has_own_continue(try_body) || catches.iter().any(|catch| has_own_continue(&catch.body))
        }
        _ => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decompile::expr::LocalVar;

    fn local(slot: u16) -> Expr {
        Expr::LocalLoad(LocalVar::unnamed(slot))
    }

    #[test]
    fn guard_binding_moves_values_through_the_stack() {
        let guard = Guard {
            condition: Condition::Test { operand: Expr::StackIn(0), expected: true },
            consumed: 2,
            carried: vec![Expr::StackIn(1)],
            prelude: Vec::new(),
            origin: 3,
        };
        let mut stack = vec![local(0), local(1), local(2)];
        let mut out = Vec::new();
        let condition = bind_guard(guard, &mut stack, &mut out).unwrap();
        assert_eq!(condition, Condition::Test { operand: local(2), expected: true });
        assert_eq!(stack, vec![local(0), local(1)]);
        assert!(out.is_empty());
    }

    #[test]
    fn underflow_is_malformed() {
        let mut stack = vec![local(1)];
        let err = take_inputs(&mut stack, 2, 7).unwrap_err();
        assert!(matches!(err, StructureError::Malformed { index: 7, .. }));
    }

    #[test]
    fn empty_if_without_effects_is_dropped() {
        let mut out = Vec::new();
        push_if(Condition::Test { operand: local(0), expected: true }, vec![], vec![], None, &mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn continue_inside_nested_loop_is_not_our_own() {
        let nested = StructuredStmt::While {
            condition: Condition::Const(true),
            body: vec![StructuredStmt::Continue],
        };
        assert!(!has_own_continue(&[nested]));
        let guarded = StructuredStmt::If {
            condition: Condition::Const(true),
            then_body: vec![StructuredStmt::Continue],
            elifs: vec![],
            else_body: None,
        };
        assert!(has_own_continue(&[guarded]));
    }
}
