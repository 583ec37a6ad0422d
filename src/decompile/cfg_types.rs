use std::collections::{BTreeMap, BTreeSet};

use crate::code_attribute::{Instruction, Label};

use super::error::StructureError;
use super::structured_types::BlockSection;

/// Block ID is the block's slot in the graph arena. It stays stable while
/// blocks are split, removed and reordered.
pub type BlockId = usize;

/// An instruction paired with its index in the method's instruction stream.
#[derive(Clone, Debug, PartialEq)]
pub struct AddressedInstruction {
    pub index: usize,
    pub instruction: Instruction,
}

/// Key of a switch edge.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SwitchKey {
    Case(i32),
    Default,
}

/// What a block stands for. Markers carry no instructions; the `usize` is
/// the index of the exception region in [`BlockGraph::regions`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockKind {
    Code,
    TryStart(usize),
    TryEnd(usize),
    /// Region index, handler index within the region.
    Handler(usize, usize),
}

/// A handler of an exception region. Several table entries sharing the
/// range and the handler label collapse into one handler with several types.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegionHandler {
    pub label: Label,
    pub index: usize,
    /// Internal class names; `None` is a catch-all.
    pub catch_types: Vec<Option<String>>,
    pub local: Option<u16>,
}

/// A protected range `[start, end)` in instruction indices with its handlers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExceptionRegion {
    pub start: usize,
    pub end: usize,
    pub handlers: Vec<RegionHandler>,
}

impl ExceptionRegion {
    pub fn covers(&self, index: usize) -> bool {
        self.start <= index && index < self.end
    }
}

/// A basic block in the block graph.
#[derive(Clone, Debug)]
pub struct Block {
    pub id: BlockId,
    pub kind: BlockKind,
    /// Index of the first instruction covered by this block.
    pub start: usize,
    /// Index of the last instruction (inclusive).
    pub break_point: usize,
    /// Non-terminal instructions, pseudo-instructions removed.
    pub opcodes: Vec<AddressedInstruction>,
    /// Jump, switch, return or throw ending the block.
    pub last: Option<AddressedInstruction>,
    pub target: Option<BlockId>,
    pub else_target: Option<BlockId>,
    pub switch_targets: BTreeMap<SwitchKey, BlockId>,
    pub targeted_by: BTreeSet<BlockId>,
    /// Structured content that replaced this block's own.
    pub internal: Option<Box<BlockSection>>,
}

impl Block {
    pub fn new(id: BlockId, kind: BlockKind, start: usize, break_point: usize) -> Self {
        Self {
            id,
            kind,
            start,
            break_point,
            opcodes: Vec::new(),
            last: None,
            target: None,
            else_target: None,
            switch_targets: BTreeMap::new(),
            targeted_by: BTreeSet::new(),
            internal: None,
        }
    }

    pub fn is_marker(&self) -> bool {
        self.kind != BlockKind::Code
    }

    pub fn last_instruction(&self) -> Option<&Instruction> {
        self.last.as_ref().map(|a| &a.instruction)
    }

    pub fn is_conditional(&self) -> bool {
        matches!(self.last_instruction(), Some(Instruction::If { .. }))
    }

    pub fn is_goto(&self) -> bool {
        matches!(self.last_instruction(), Some(Instruction::Goto(_)))
    }

    pub fn is_switch(&self) -> bool {
        matches!(self.last_instruction(), Some(Instruction::Switch { .. }))
    }

    /// Ends in return or throw.
    pub fn exits_method(&self) -> bool {
        matches!(
            self.last_instruction(),
            Some(Instruction::Return | Instruction::ReturnValue | Instruction::Throw)
        )
    }

    /// No real instructions before the terminal.
    pub fn is_logic_empty(&self) -> bool {
        self.opcodes.is_empty() && self.internal.is_none()
    }

    /// Target of an unconditional goto ending this block.
    pub fn goto_target(&self) -> Option<BlockId> {
        if self.is_goto() {
            self.target
        } else {
            None
        }
    }

    /// Outgoing edges in a stable order, without duplicates.
    pub fn successors(&self) -> Vec<BlockId> {
        let mut succs = Vec::new();
        let edges = self
            .target
            .iter()
            .chain(self.else_target.iter())
            .chain(self.switch_targets.values());
        for &succ in edges {
            if !succs.contains(&succ) {
                succs.push(succ);
            }
        }
        succs
    }

    /// Index used when reporting an error against this block.
    pub fn report_index(&self) -> usize {
        self.last.as_ref().map_or(self.break_point, |a| a.index)
    }

    fn remap_edges(&mut self, from: BlockId, to: BlockId) {
        for edge in self.target.iter_mut().chain(self.else_target.iter_mut()) {
            if *edge == from {
                *edge = to;
            }
        }
        for edge in self.switch_targets.values_mut() {
            if *edge == from {
                *edge = to;
            }
        }
        if self.targeted_by.remove(&from) {
            self.targeted_by.insert(to);
        }
    }
}

/// The block graph for a single method: an arena of blocks plus their
/// linear order.
#[derive(Clone, Debug, Default)]
pub struct BlockGraph {
    blocks: BTreeMap<BlockId, Block>,
    pub order: Vec<BlockId>,
    pub regions: Vec<ExceptionRegion>,
    pub labels: BTreeMap<Label, usize>,
    next_id: BlockId,
}

impl BlockGraph {
    pub fn new(labels: BTreeMap<Label, usize>) -> Self {
        Self { labels, ..Self::default() }
    }

    /// Allocate a new block. It is not placed in `order`.
    pub fn alloc(&mut self, kind: BlockKind, start: usize, break_point: usize) -> BlockId {
        let id = self.next_id;
        self.next_id += 1;
        self.blocks.insert(id, Block::new(id, kind, start, break_point));
        id
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn get(&self, id: BlockId) -> Option<&Block> {
        self.blocks.get(&id)
    }

    pub fn block(&self, id: BlockId) -> Result<&Block, StructureError> {
        self.blocks
            .get(&id)
            .ok_or_else(|| StructureError::unreachable(id, "block missing from graph"))
    }

    pub fn block_mut(&mut self, id: BlockId) -> Result<&mut Block, StructureError> {
        self.blocks
            .get_mut(&id)
            .ok_or_else(|| StructureError::unreachable(id, "block missing from graph"))
    }

    /// Blocks in linear order.
    pub fn blocks(&self) -> impl Iterator<Item = &Block> {
        self.order.iter().filter_map(|id| self.blocks.get(id))
    }

    pub fn position(&self, id: BlockId) -> Option<usize> {
        self.order.iter().position(|&b| b == id)
    }

    /// Redirect every edge and back-reference naming `from` to `to`.
    /// Applying it again, or for an id nobody references, changes nothing.
    pub fn remap(&mut self, from: BlockId, to: BlockId) {
        if from == to {
            return;
        }
        for block in self.blocks.values_mut() {
            block.remap_edges(from, to);
        }
    }

    /// Drop `id` from the linear order and the arena.
    pub fn remove(&mut self, id: BlockId) -> Option<Block> {
        self.order.retain(|&b| b != id);
        self.blocks.remove(&id)
    }

    /// Recompute `targeted_by` from the current edges.
    pub fn populate_targeted_by(&mut self) {
        let mut incoming: BTreeMap<BlockId, BTreeSet<BlockId>> = BTreeMap::new();
        for block in self.blocks.values() {
            for succ in block.successors() {
                incoming.entry(succ).or_default().insert(block.id);
            }
        }
        for block in self.blocks.values_mut() {
            block.targeted_by = incoming.remove(&block.id).unwrap_or_default();
        }
    }

    /// Every block has exactly one successor shape: a single target, a
    /// conditional pair, a switch map, or nothing.
    pub fn check_invariants(&self) -> Result<(), StructureError> {
        for block in self.blocks() {
            let shape_ok = match block.last_instruction() {
                Some(Instruction::If { .. }) => {
                    block.target.is_some() && block.else_target.is_some() && block.switch_targets.is_empty()
                }
                Some(Instruction::Switch { .. }) => {
                    block.target.is_none() && block.else_target.is_none() && !block.switch_targets.is_empty()
                }
                Some(Instruction::Goto(_)) => {
                    block.target.is_some() && block.else_target.is_none() && block.switch_targets.is_empty()
                }
                Some(_) => block.successors().is_empty(),
                None => block.else_target.is_none() && block.switch_targets.is_empty(),
            };
            if !shape_ok {
                return Err(StructureError::unreachable(
                    block.report_index(),
                    format!("block {} has an inconsistent successor set", block.id),
                ));
            }
            for succ in block.successors() {
                if !self.blocks.contains_key(&succ) {
                    return Err(StructureError::unreachable(
                        block.report_index(),
                        format!("block {} points at removed block {}", block.id, succ),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Generate a DOT graph for visualization.
    pub fn to_dot(&self) -> String {
        let mut dot = String::from("digraph Blocks {\n");
        for block in self.blocks() {
            let (label, style) = match block.kind {
                BlockKind::Code => {
                    let content = match &block.internal {
                        Some(section) => section.kind_name().to_string(),
                        None => format!("{} instrs", block.opcodes.len()),
                    };
                    (format!("B{} @{} ({})", block.id, block.start, content), "solid")
                }
                BlockKind::TryStart(r) => (format!("B{} try{} start", block.id, r), "dashed"),
                BlockKind::TryEnd(r) => (format!("B{} try{} end", block.id, r), "dashed"),
                BlockKind::Handler(r, h) => (format!("B{} try{} handler{}", block.id, r, h), "dashed"),
            };
            dot.push_str(&format!("  B{} [label=\"{}\", style={}];\n", block.id, label, style));
            if let Some(target) = block.target {
                dot.push_str(&format!("  B{} -> B{};\n", block.id, target));
            }
            if let Some(else_target) = block.else_target {
                dot.push_str(&format!("  B{} -> B{} [label=\"else\"];\n", block.id, else_target));
            }
            for (key, target) in &block.switch_targets {
                let key = match key {
                    SwitchKey::Case(value) => value.to_string(),
                    SwitchKey::Default => "default".to_string(),
                };
                dot.push_str(&format!("  B{} -> B{} [label=\"{}\"];\n", block.id, target, key));
            }
        }
        dot.push_str("}\n");
        dot
    }
}
