use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};

use crate::code_attribute::{Instruction, Label};
use crate::types::MethodBody;

use super::cfg_types::*;
use super::error::StructureError;

/// Sort key of a marker within the group spliced before one block:
/// region ends (innermost first), then handlers, then region starts
/// (outermost first).
type MarkerKey = (u8, usize, usize);

/// Build the block graph for a method body.
pub fn build_graph(method: &MethodBody) -> Result<BlockGraph, StructureError> {
    let instrs = &method.instructions;
    let labels = resolve_labels(instrs)?;
    let mut graph = BlockGraph::new(labels);
    if instrs.is_empty() {
        return Ok(graph);
    }

    // Step 1: refuse unsupported constructs, check every jump lands on a label
    for (index, instr) in instrs.iter().enumerate() {
        if let Instruction::Unsupported(name) = instr {
            return Err(StructureError::unsupported(index, format!("`{}` is not structured", name)));
        }
        for label in instr.jump_targets() {
            if !graph.labels.contains_key(&label) {
                return Err(StructureError::malformed(
                    index,
                    format!("jump to undefined label {}", label.0),
                ));
            }
        }
    }

    // Step 2: group the exception table into protected regions
    graph.regions = collect_regions(method, &graph.labels)?;

    // Step 3: break points (inclusive block ends)
    let mut break_points = BTreeSet::new();
    for (index, instr) in instrs.iter().enumerate() {
        if instr.is_terminal() {
            break_points.insert(index);
        }
        for label in instr.jump_targets() {
            mark_before(&mut break_points, graph.labels[&label]);
        }
    }
    for region in &graph.regions {
        mark_before(&mut break_points, region.start);
        mark_before(&mut break_points, region.end);
        for handler in &region.handlers {
            mark_before(&mut break_points, handler.index);
        }
    }
    break_points.insert(instrs.len() - 1);

    // Step 4: slice the stream into blocks
    let mut starts: BTreeMap<usize, BlockId> = BTreeMap::new();
    let mut code_blocks = Vec::new();
    let mut start = 0;
    for &bp in &break_points {
        if bp >= instrs.len() {
            break;
        }
        let id = graph.alloc(BlockKind::Code, start, bp);
        let block = graph.block_mut(id)?;
        for (index, instruction) in instrs.iter().enumerate().take(bp + 1).skip(start) {
            if instruction.is_pseudo() {
                continue;
            }
            let addressed = AddressedInstruction { index, instruction: instruction.clone() };
            if index == bp && instruction.is_terminal() {
                block.last = Some(addressed);
            } else {
                block.opcodes.push(addressed);
            }
        }
        starts.insert(start, id);
        code_blocks.push(id);
        start = bp + 1;
    }

    // Step 5: exception markers, allocated in descending start order
    let mut region_order: Vec<usize> = (0..graph.regions.len()).collect();
    region_order.sort_by_key(|&r| (Reverse(graph.regions[r].start), r));
    let mut groups: BTreeMap<usize, Vec<(MarkerKey, BlockId)>> = BTreeMap::new();
    for r in region_order {
        let region = graph.regions[r].clone();
        let id = graph.alloc(BlockKind::TryStart(r), region.start, region.start.saturating_sub(1));
        groups.entry(region.start).or_default().push(((2, usize::MAX - region.end, r), id));
        let id = graph.alloc(BlockKind::TryEnd(r), region.end, region.end.saturating_sub(1));
        groups.entry(region.end).or_default().push(((0, usize::MAX - region.start, r), id));
        for (h, handler) in region.handlers.iter().enumerate() {
            let id = graph.alloc(BlockKind::Handler(r, h), handler.index, handler.index.saturating_sub(1));
            groups.entry(handler.index).or_default().push(((1, r, h), id));
        }
    }
    for group in groups.values_mut() {
        group.sort_by_key(|(key, _)| *key);
    }

    // Step 6: linear order, markers spliced in front of the block they precede
    let mut order = Vec::with_capacity(code_blocks.len() + groups.len() * 3);
    for &id in &code_blocks {
        let start = graph.block(id)?.start;
        if let Some(group) = groups.get(&start) {
            order.extend(group.iter().map(|(_, marker)| *marker));
        }
        order.push(id);
    }
    if let Some(group) = groups.get(&instrs.len()) {
        order.extend(group.iter().map(|(_, marker)| *marker));
    }
    graph.order = order;

    // Step 7: wire edges
    for (k, &id) in code_blocks.iter().enumerate() {
        let next = code_blocks.get(k + 1).copied();
        let (source, last) = {
            let block = graph.block(id)?;
            (block.start, block.last.clone())
        };
        let mut target = None;
        let mut else_target = None;
        let mut switch_targets = BTreeMap::new();
        match last.as_ref().map(|a| (a.index, &a.instruction)) {
            Some((_, Instruction::Goto(label))) => {
                let dest = block_at(&graph, &starts, *label)?;
                target = Some(entry_for(&graph, &groups, source, dest)?);
            }
            Some((index, Instruction::If { opcode, target: label })) => {
                let dest = block_at(&graph, &starts, *label)?;
                target = Some(entry_for(&graph, &groups, source, dest)?);
                let next = next.ok_or_else(|| {
                    StructureError::malformed(index, format!("`{}` falls off the end of the method", opcode.mnemonic()))
                })?;
                else_target = Some(entry_for(&graph, &groups, source, next)?);
            }
            Some((_, Instruction::Switch { pairs, default })) => {
                for (key, label) in pairs {
                    let dest = block_at(&graph, &starts, *label)?;
                    switch_targets.insert(SwitchKey::Case(*key), entry_for(&graph, &groups, source, dest)?);
                }
                let dest = block_at(&graph, &starts, *default)?;
                switch_targets.insert(SwitchKey::Default, entry_for(&graph, &groups, source, dest)?);
            }
            Some(_) => {}
            None => {
                if let Some(next) = next {
                    target = Some(entry_for(&graph, &groups, source, next)?);
                }
            }
        }
        let block = graph.block_mut(id)?;
        block.target = target;
        block.else_target = else_target;
        block.switch_targets = switch_targets;
    }

    // Markers fall through to the next member of their group, then the block.
    for (&start, group) in &groups {
        let tail = starts.get(&start).copied();
        for (k, (_, marker)) in group.iter().enumerate() {
            let target = group.get(k + 1).map(|(_, m)| *m).or(tail);
            graph.block_mut(*marker)?.target = target;
        }
    }

    graph.populate_targeted_by();
    log::debug!(
        "built {} blocks ({} exception regions) for {}",
        graph.len(),
        graph.regions.len(),
        method.name
    );
    Ok(graph)
}

fn resolve_labels(instrs: &[Instruction]) -> Result<BTreeMap<Label, usize>, StructureError> {
    let mut labels = BTreeMap::new();
    for (index, instr) in instrs.iter().enumerate() {
        if let Instruction::Label(label) = instr {
            if labels.insert(*label, index).is_some() {
                return Err(StructureError::malformed(index, format!("label {} defined twice", label.0)));
            }
        }
    }
    Ok(labels)
}

/// A block must end right before `index`.
fn mark_before(break_points: &mut BTreeSet<usize>, index: usize) {
    if index > 0 {
        break_points.insert(index - 1);
    }
}

fn block_at(
    graph: &BlockGraph,
    starts: &BTreeMap<usize, BlockId>,
    label: Label,
) -> Result<BlockId, StructureError> {
    let index = graph.labels[&label];
    starts
        .get(&index)
        .copied()
        .ok_or_else(|| StructureError::malformed(index, format!("label {} has no code after it", label.0)))
}

/// Where an edge from a block starting at `source` into `dest` lands once
/// markers are spliced in front of `dest`: entering a region goes through
/// its start marker, leaving a region body goes through its end marker.
fn entry_for(
    graph: &BlockGraph,
    groups: &BTreeMap<usize, Vec<(MarkerKey, BlockId)>>,
    source: usize,
    dest: BlockId,
) -> Result<BlockId, StructureError> {
    let start = graph.block(dest)?.start;
    if let Some(group) = groups.get(&start) {
        for &(_, marker) in group {
            match graph.block(marker)?.kind {
                BlockKind::TryStart(r) if !graph.regions[r].covers(source) => return Ok(marker),
                BlockKind::TryEnd(r) if graph.regions[r].covers(source) => return Ok(marker),
                _ => {}
            }
        }
    }
    Ok(dest)
}

fn collect_regions(
    method: &MethodBody,
    labels: &BTreeMap<Label, usize>,
) -> Result<Vec<ExceptionRegion>, StructureError> {
    let position = |label: Label, row: usize| {
        labels.get(&label).copied().ok_or_else(|| {
            StructureError::malformed(row, format!("exception table row {} names undefined label {}", row, label.0))
        })
    };

    let mut by_range: BTreeMap<(usize, usize), ExceptionRegion> = BTreeMap::new();
    for (row, entry) in method.exception_table.iter().enumerate() {
        let start = position(entry.start, row)?;
        let end = position(entry.end, row)?;
        let handler = position(entry.handler, row)?;
        if start >= end {
            return Err(StructureError::malformed(start, "empty protected range"));
        }
        let region = by_range
            .entry((start, end))
            .or_insert_with(|| ExceptionRegion { start, end, handlers: Vec::new() });
        if region.covers(handler) {
            return Err(StructureError::unsupported(handler, "handler inside its own protected range"));
        }
        match region.handlers.iter_mut().find(|h| h.label == entry.handler) {
            Some(existing) => {
                existing.catch_types.push(entry.catch_type.clone());
                existing.local = existing.local.or(entry.local);
            }
            None => region.handlers.push(RegionHandler {
                label: entry.handler,
                index: handler,
                catch_types: vec![entry.catch_type.clone()],
                local: entry.local,
            }),
        }
    }

    let regions: Vec<ExceptionRegion> = by_range.into_values().collect();
    for (i, a) in regions.iter().enumerate() {
        for b in &regions[i + 1..] {
            if a.start < b.start && b.start < a.end && a.end < b.end {
                return Err(StructureError::unsupported(b.start, "exception ranges overlap without nesting"));
            }
            let shared = a.handlers.iter().any(|ha| b.handlers.iter().any(|hb| ha.label == hb.label));
            if shared {
                return Err(StructureError::unsupported(
                    b.start,
                    "handler shared by several protected ranges (finally)",
                ));
            }
        }
    }
    Ok(regions)
}
