use crate::code_attribute::Instruction;

use super::cfg_types::*;
use super::error::StructureError;
use super::stack_sim::stack_profile;

/// Tidy a freshly built graph: drop empty blocks, split statement prefixes
/// off condition and jump blocks, then recompute reverse edges.
pub fn cleanup(graph: &mut BlockGraph, split_headers: bool) -> Result<(), StructureError> {
    let elided = elide_empty_blocks(graph);
    let split = if split_headers { split_headers_off(graph)? } else { 0 };
    graph.populate_targeted_by();
    log::debug!("cleanup: {} empty blocks elided, {} headers split", elided, split);
    Ok(())
}

/// Remove code blocks holding nothing but labels, redirecting their
/// predecessors to their fallthrough successor.
fn elide_empty_blocks(graph: &mut BlockGraph) -> usize {
    let empty: Vec<(BlockId, BlockId)> = graph
        .blocks()
        .filter(|b| b.kind == BlockKind::Code && b.opcodes.is_empty() && b.last.is_none() && b.internal.is_none())
        .filter_map(|b| b.target.map(|t| (b.id, t)))
        .collect();
    for &(id, target) in &empty {
        // an earlier removal may have moved our own target
        let target = graph.get(id).and_then(|b| b.target).unwrap_or(target);
        graph.remap(id, target);
        graph.remove(id);
    }
    empty.len()
}

fn split_headers_off(graph: &mut BlockGraph) -> Result<usize, StructureError> {
    let candidates: Vec<BlockId> = graph
        .blocks()
        .filter(|b| b.kind == BlockKind::Code && (b.is_goto() || b.is_conditional() || b.is_switch()))
        .map(|b| b.id)
        .collect();
    let mut count = 0;
    for id in candidates {
        if let Some(at) = split_point(graph.block(id)?) {
            split_block(graph, id, at)?;
            count += 1;
        }
    }
    Ok(count)
}

/// The last opcode position where the block's own values are all consumed
/// and the rest of the block, terminal included, needs nothing from before.
fn split_point(block: &Block) -> Option<usize> {
    let terminal = block.last_instruction()?;
    let allow_full = matches!(terminal, Instruction::Goto(_));
    let n = block.opcodes.len();
    let upper = if allow_full { n } else { n.saturating_sub(1) };
    (1..=upper).rev().find(|&k| {
        let (_, height) = stack_profile(block.opcodes[..k].iter().map(|a| &a.instruction));
        if height != 0 {
            return false;
        }
        let rest = block.opcodes[k..].iter().map(|a| &a.instruction).chain(std::iter::once(terminal));
        stack_profile(rest).0 == 0
    })
}

/// Move `opcodes[at..]` and the terminal into a new block placed right
/// after `id`. The header keeps the id, so incoming edges stay put.
fn split_block(graph: &mut BlockGraph, id: BlockId, at: usize) -> Result<(), StructureError> {
    let (tail, last, target, else_target, switch_targets, break_point) = {
        let header = graph.block_mut(id)?;
        let tail = header.opcodes.split_off(at);
        (
            tail,
            header.last.take(),
            header.target.take(),
            header.else_target.take(),
            std::mem::take(&mut header.switch_targets),
            header.break_point,
        )
    };
    let start = tail
        .first()
        .or(last.as_ref())
        .map_or(break_point, |a| a.index);

    let reduced = graph.alloc(BlockKind::Code, start, break_point);
    {
        let block = graph.block_mut(reduced)?;
        block.opcodes = tail;
        block.last = last;
        block.target = target;
        block.else_target = else_target;
        block.switch_targets = switch_targets;
    }
    let header = graph.block_mut(id)?;
    header.break_point = start.saturating_sub(1);
    header.target = Some(reduced);

    let position = graph
        .position(id)
        .ok_or_else(|| StructureError::unreachable(id, "split block is not in the linear order"))?;
    graph.order.insert(position + 1, reduced);
    Ok(())
}
