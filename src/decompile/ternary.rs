//! Collapses conditional expressions (`c ? a : b`, and boolean values such
//! as `x = a && b`) into single blocks before region decomposition.
//!
//! A conditional expression shows up as a span of blocks whose arms leave a
//! value on the operand stack for the block after the span, the consumer.
//! The span is replaced by its head block carrying a `Ternary` section, so
//! the region decomposer never sees the arms.

use std::collections::BTreeSet;

use super::cfg_types::*;
use super::condition::build_guard;
use super::error::StructureError;
use super::stack_sim::Simulator;
use super::structured_types::BlockSection;

/// Collapse every ternary span of the graph, innermost arms first.
/// With `enabled == false` a ternary consumer is reported as malformed.
pub fn collapse_ternaries(graph: &mut BlockGraph, sim: &Simulator, enabled: bool) -> Result<usize, StructureError> {
    let mut seq = graph.order.clone();
    let count = collapse_in(graph, sim, &mut seq, enabled)?;
    graph.populate_targeted_by();
    log::debug!("ternary pre-pass: {} conditional expressions collapsed", count);
    Ok(count)
}

fn collapse_in(
    graph: &mut BlockGraph,
    sim: &Simulator,
    seq: &mut Vec<BlockId>,
    enabled: bool,
) -> Result<usize, StructureError> {
    let mut count = 0;
    let mut p = 1;
    while p < seq.len() {
        if !is_consumer(graph, sim, seq, p)? {
            p += 1;
            continue;
        }
        let consumer = seq[p];
        if !enabled {
            return Err(StructureError::malformed(
                graph.block(consumer)?.report_index(),
                "block consumes a conditional expression but ternary detection is disabled",
            ));
        }
        let s = (0..p)
            .find(|&s| span_shape(graph, &seq[s..p], consumer).is_some())
            .ok_or_else(|| match graph.get(consumer) {
                Some(block) => StructureError::malformed(
                    block.report_index(),
                    format!("block {} takes stack values but no ternary span feeds it", consumer),
                ),
                None => StructureError::unreachable(consumer, "ternary consumer vanished"),
            })?;
        let span: Vec<BlockId> = seq[s..p].to_vec();
        count += 1 + collapse_span(graph, sim, &span, consumer)?;
        seq.drain(s + 1..p);
        p = s + 1;
    }
    Ok(count)
}

/// A block needs a value no block before it pushed on every path: either it
/// pops below its entry stack, or it is a jump target while its fallthrough
/// predecessor still holds values.
fn is_consumer(graph: &BlockGraph, sim: &Simulator, seq: &[BlockId], p: usize) -> Result<bool, StructureError> {
    let block = graph.block(seq[p])?;
    if block.is_marker() || block.internal.is_some() {
        return Ok(false);
    }
    // the caught exception is on the stack at handler entry
    let mut k = p;
    while k > 0 {
        k -= 1;
        let prev = graph.block(seq[k])?;
        if !prev.is_marker() {
            break;
        }
        if matches!(prev.kind, BlockKind::Handler(..)) {
            return Ok(false);
        }
    }
    let goto_targeted = block
        .targeted_by
        .iter()
        .any(|&t| graph.get(t).map_or(false, |b| b.goto_target() == Some(block.id)));
    if !goto_targeted {
        return Ok(false);
    }
    if sim.simulate(block)?.consumed > 0 {
        return Ok(true);
    }
    let prev = graph.block(seq[p - 1])?;
    let falls_in = prev.kind == BlockKind::Code
        && prev.internal.is_none()
        && prev.last.is_none()
        && prev.target == Some(block.id);
    Ok(falls_in && !sim.simulate(prev)?.exit_stack.is_empty())
}

/// Split a candidate span into (chain end, false arm start) if it has the
/// shape `chain; true arm; goto consumer; false arm` with one entry and all
/// exits into `consumer`.
fn span_shape(graph: &BlockGraph, span: &[BlockId], consumer: BlockId) -> Option<(usize, usize)> {
    let blocks: Vec<&Block> = span.iter().map(|&id| graph.get(id)).collect::<Option<_>>()?;
    let head = blocks.first()?;
    if !head.is_conditional() || blocks.last()?.target != Some(consumer) {
        return None;
    }
    let members: BTreeSet<BlockId> = span.iter().copied().collect();
    for (k, block) in blocks.iter().enumerate() {
        if block.is_marker() || block.is_switch() || block.exits_method() {
            return None;
        }
        if k > 0 && !block.targeted_by.is_subset(&members) {
            return None;
        }
        if block.successors().iter().any(|s| *s != consumer && !members.contains(s)) {
            return None;
        }
    }

    for c in 1..span.len() {
        if !blocks[c - 1].is_conditional() {
            break;
        }
        for b in c + 1..span.len() {
            if blocks[b - 1].goto_target() == Some(consumer) && arms_fit(&blocks, span, c, b, consumer) {
                return Some((c, b));
            }
        }
    }
    None
}

fn arms_fit(blocks: &[&Block], span: &[BlockId], c: usize, b: usize, consumer: BlockId) -> bool {
    let (true_head, false_head) = (span[c], span[b]);
    let chain = &span[..c];
    for (k, block) in blocks[..c].iter().enumerate() {
        let ok = block
            .successors()
            .iter()
            .all(|s| *s == true_head || *s == false_head || chain[k + 1..].contains(s));
        if !ok {
            return false;
        }
    }
    let arm_fits = |range: std::ops::Range<usize>| {
        let arm = &span[range.clone()];
        blocks[range].iter().all(|block| {
            block.successors().iter().all(|s| *s == consumer || arm.contains(s))
                && block.targeted_by.iter().all(|t| arm.contains(t) || chain.contains(t))
        })
    };
    let reached = |head: BlockId| blocks[..c].iter().any(|block| block.successors().contains(&head));
    arm_fits(c..b) && arm_fits(b..span.len()) && reached(true_head) && reached(false_head)
}

/// Replace `span` by its head block carrying a `Ternary` section. Returns
/// the number of nested ternaries collapsed on the way.
fn collapse_span(
    graph: &mut BlockGraph,
    sim: &Simulator,
    span: &[BlockId],
    consumer: BlockId,
) -> Result<usize, StructureError> {
    let (c, b) = span_shape(graph, span, consumer)
        .ok_or_else(|| StructureError::unreachable(span[0], "ternary span lost its shape"))?;
    let guard = build_guard(graph, sim, &span[..c], span[c], span[b])?;
    let (true_sections, nested_true) = reduce_arm(graph, sim, span[c..b].to_vec(), consumer)?;
    let (false_sections, nested_false) = reduce_arm(graph, sim, span[b..].to_vec(), consumer)?;
    for &id in &span[1..c] {
        graph.remove(id);
    }

    let head = graph.block_mut(span[0])?;
    head.opcodes.clear();
    head.last = None;
    head.else_target = None;
    head.switch_targets.clear();
    head.target = Some(consumer);
    head.internal = Some(Box::new(BlockSection::Ternary { guard, true_sections, false_sections }));
    graph.populate_targeted_by();
    log::trace!("collapsed ternary at block {} feeding block {}", span[0], consumer);
    Ok(nested_true + nested_false)
}

/// Turn the blocks of one arm into sections. Nested ternaries inside the
/// arm are collapsed first; an arm that is itself a ternary becomes one.
fn reduce_arm(
    graph: &mut BlockGraph,
    sim: &Simulator,
    mut arm: Vec<BlockId>,
    consumer: BlockId,
) -> Result<(Vec<BlockSection>, usize), StructureError> {
    if arm.len() > 1 {
        if let Some(&last) = arm.last() {
            let block = graph.block(last)?;
            if block.kind == BlockKind::Code && block.is_logic_empty() && block.goto_target() == Some(consumer) {
                graph.remap(last, consumer);
                graph.remove(last);
                arm.pop();
            }
        }
    }
    graph.populate_targeted_by();

    let mut nested = collapse_in(graph, sim, &mut arm, true)?;
    if arm.len() > 1 && graph.block(arm[0])?.is_conditional() {
        if span_shape(graph, &arm, consumer).is_none() {
            return Err(StructureError::malformed(
                graph.block(arm[0])?.report_index(),
                "ternary arm branches without forming a nested conditional expression",
            ));
        }
        nested += 1 + collapse_span(graph, sim, &arm, consumer)?;
        arm.truncate(1);
    }

    let mut sections = Vec::with_capacity(arm.len());
    for id in arm {
        let mut block = graph
            .remove(id)
            .ok_or_else(|| StructureError::unreachable(id, "ternary arm block missing"))?;
        if block.is_conditional() || block.is_switch() {
            return Err(StructureError::unsupported(block.report_index(), "control flow inside a ternary arm"));
        }
        sections.push(match block.internal.take() {
            Some(section) => *section,
            None => BlockSection::Inline(block),
        });
    }
    Ok((sections, nested))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::code_attribute::{Instruction, JumpOpcode, Label};
    use crate::decompile::cfg::build_graph;
    use crate::decompile::cleanup::cleanup;
    use crate::decompile::expr::Expr;
    use crate::types::MethodBody;

    fn push(value: i32) -> Instruction {
        Instruction::Push(Expr::IntLiteral(value))
    }

    #[test]
    fn simple_ternary_collapses_into_head() {
        // x = c ? 1 : 2; return
        let method = MethodBody::new(
            "m",
            "(Z)V",
            vec![
                Instruction::Load(0),
                Instruction::If { opcode: JumpOpcode::Ifeq, target: Label(1) },
                push(1),
                Instruction::Goto(Label(2)),
                Instruction::Label(Label(1)),
                push(2),
                Instruction::Label(Label(2)),
                Instruction::Store(1),
                Instruction::Return,
            ],
        );
        let labels = method.label_positions();
        let sim = Simulator::new(&method, &labels);
        let mut graph = build_graph(&method).unwrap();
        cleanup(&mut graph, true).unwrap();
        assert_eq!(collapse_ternaries(&mut graph, &sim, true).unwrap(), 1);
        let blocks: Vec<_> = graph.blocks().collect();
        assert_eq!(blocks.len(), 2);
        match blocks[0].internal.as_deref() {
            Some(BlockSection::Ternary { true_sections, false_sections, .. }) => {
                assert_eq!(true_sections.len(), 1);
                assert_eq!(false_sections.len(), 1);
            }
            other => panic!("expected ternary, got {:?}", other),
        }
        assert_eq!(blocks[0].target, Some(blocks[1].id));
    }

    #[test]
    fn disabled_detection_reports_malformed() {
        let method = MethodBody::new(
            "m",
            "(Z)I",
            vec![
                Instruction::Load(0),
                Instruction::If { opcode: JumpOpcode::Ifeq, target: Label(1) },
                push(1),
                Instruction::Goto(Label(2)),
                Instruction::Label(Label(1)),
                push(2),
                Instruction::Label(Label(2)),
                Instruction::ReturnValue,
            ],
        );
        let labels = method.label_positions();
        let sim = Simulator::new(&method, &labels);
        let mut graph = build_graph(&method).unwrap();
        cleanup(&mut graph, true).unwrap();
        let err = collapse_ternaries(&mut graph, &sim, false).unwrap_err();
        assert!(matches!(err, StructureError::Malformed { .. }));
    }
}
