use std::collections::{BTreeMap, BTreeSet};

use crate::attribute_info::{class_descriptor, LocalVariableTable};
use crate::code_attribute::Instruction;

use super::cfg_types::*;
use super::condition::{build_guard, Guard};
use super::error::StructureError;
use super::expr::LocalVar;
use super::method_decompiler::StructureOptions;
use super::stack_sim::Simulator;
use super::structured_types::*;

/// Where control goes when a sequence runs off its end, and what `break`
/// and `continue` jump to at this nesting level.
#[derive(Clone, Copy, Debug, Default)]
struct Scope {
    exit: Option<BlockId>,
    break_target: Option<BlockId>,
    continue_target: Option<BlockId>,
}

/// A contiguous run of blocks being structured, with block positions.
struct SeqView<'s> {
    seq: &'s [BlockId],
    pos: &'s BTreeMap<BlockId, usize>,
    scope: Scope,
}

impl SeqView<'_> {
    fn len(&self) -> usize {
        self.seq.len()
    }

    /// Block control reaches after position `p` falls through.
    fn after(&self, p: usize) -> Option<BlockId> {
        self.seq.get(p + 1).copied().or(self.scope.exit)
    }
}

/// Turns the linear block order into a tree of [`BlockSection`]s. Blocks
/// are moved out of the graph as they are placed in the tree.
pub struct RegionDecomposer<'a, 'g> {
    graph: &'g mut BlockGraph,
    sim: &'a Simulator<'a>,
    locals: &'a LocalVariableTable,
    collapse_else_if: bool,
    catch_scope_fallback: bool,
    /// Set when a catch body's end came from its local's scope.
    pub used_catch_scope_fallback: bool,
}

impl<'a, 'g> RegionDecomposer<'a, 'g> {
    pub fn new(
        graph: &'g mut BlockGraph,
        sim: &'a Simulator<'a>,
        locals: &'a LocalVariableTable,
        options: &StructureOptions,
    ) -> Self {
        Self {
            graph,
            sim,
            locals,
            collapse_else_if: options.collapse_else_if,
            catch_scope_fallback: options.catch_scope_fallback,
            used_catch_scope_fallback: false,
        }
    }

    /// Structure the whole graph.
    pub fn decompose(&mut self) -> Result<Vec<BlockSection>, StructureError> {
        let seq = self.graph.order.clone();
        let sections = self.structure_seq(&seq, Scope::default())?;
        if let Some(left) = self.graph.blocks().next() {
            return Err(StructureError::unreachable(
                left.report_index(),
                format!("block {} was never placed in a region", left.id),
            ));
        }
        log::debug!("region decomposition produced {} top-level sections", sections.len());
        Ok(sections)
    }

    fn structure_seq(&mut self, seq: &[BlockId], scope: Scope) -> Result<Vec<BlockSection>, StructureError> {
        let pos: BTreeMap<BlockId, usize> = seq.iter().enumerate().map(|(p, &id)| (id, p)).collect();
        let view = SeqView { seq, pos: &pos, scope };
        let mut out = Vec::new();
        let mut i = 0;
        while i < seq.len() {
            i = self.structure_at(&view, i, &mut out)?;
        }
        Ok(out)
    }

    /// Place the region starting at position `i`; returns the position
    /// after it.
    fn structure_at(&mut self, view: &SeqView, i: usize, out: &mut Vec<BlockSection>) -> Result<usize, StructureError> {
        let id = view.seq[i];
        let (kind, is_goto, is_switch, is_conditional, report) = {
            let block = self.graph.block(id)?;
            (block.kind, block.is_goto(), block.is_switch(), block.is_conditional(), block.report_index())
        };

        if Some(id) != view.scope.continue_target {
            if let Some(j) = self.back_edge_source(view, i)? {
                return self.structure_loop(view, i, j, out);
            }
        }

        match kind {
            BlockKind::Code => {}
            BlockKind::TryStart(region) => return self.structure_try(view, i, region, out),
            BlockKind::TryEnd(_) | BlockKind::Handler(..) => {
                return Err(StructureError::unreachable(report, "exception marker outside its try region"));
            }
        }

        if is_goto {
            if let Some(next) = self.structure_entry_loop(view, i, out)? {
                return Ok(next);
            }
        }
        if is_switch {
            return self.structure_switch(view, i, out);
        }
        if is_conditional {
            return self.structure_if(view, i, out);
        }
        self.structure_inline(view, i, out)
    }

    // ========================================================================
    // Loops
    // ========================================================================

    /// Latest position at or after `i` with an edge back to `seq[i]`.
    fn back_edge_source(&self, view: &SeqView, i: usize) -> Result<Option<usize>, StructureError> {
        let block = self.graph.block(view.seq[i])?;
        Ok(block
            .targeted_by
            .iter()
            .filter(|src| self.graph.get(**src).is_some())
            .filter_map(|src| view.pos.get(src).copied())
            .filter(|&p| p >= i)
            .max())
    }

    fn structure_loop(
        &mut self,
        view: &SeqView,
        i: usize,
        j: usize,
        out: &mut Vec<BlockSection>,
    ) -> Result<usize, StructureError> {
        let head = view.seq[i];
        self.check_single_entry(view, i, j + 1)?;
        let exit = view.after(j);

        let tail = self.graph.block(view.seq[j])?;
        let succs = tail.successors();
        let bottom_tested = tail.is_conditional()
            && succs.len() == 2
            && succs.contains(&head)
            && succs.iter().all(|s| *s == head || Some(*s) == exit);

        if let (true, Some(exit)) = (bottom_tested, exit) {
            let c = self.do_while_chain_start(view, i, j, head, exit)?;
            let chain = view.seq[c..=j].to_vec();
            let guard = build_guard(&*self.graph, self.sim, &chain, head, exit)?;
            let scope = Scope {
                exit: Some(view.seq[c]),
                break_target: Some(exit),
                continue_target: Some(view.seq[c]),
            };
            let body = self.structure_seq(&view.seq[i..c], scope)?;
            self.discard(&chain);
            log::trace!("do-while at block {} ({} condition blocks)", head, chain.len());
            out.push(BlockSection::DoWhile { guard, body });
            return Ok(j + 1);
        }

        if let Some(exit) = exit {
            if let Some(c) = self.loop_chain_end(view, i, j, exit)? {
                let chain = view.seq[i..c].to_vec();
                let guard = build_guard(&*self.graph, self.sim, &chain, view.seq[c], exit)?;
                // a head that runs statements stays in the body as `if (...) break;`
                if guard.is_pure() {
                    let scope = Scope { exit: Some(head), break_target: Some(exit), continue_target: Some(head) };
                    let body = self.structure_seq(&view.seq[c..=j], scope)?;
                    self.discard(&chain);
                    log::trace!("top-tested while at block {}", head);
                    out.push(BlockSection::While { guard, body });
                    return Ok(j + 1);
                }
            }
        }

        let origin = self.graph.block(head)?.report_index();
        let scope = Scope { exit: Some(head), break_target: exit, continue_target: Some(head) };
        let body = self.structure_seq(&view.seq[i..=j], scope)?;
        log::trace!("endless loop at block {}", head);
        out.push(BlockSection::While { guard: Guard::constant(true, origin), body });
        Ok(j + 1)
    }

    /// Walk a do-while condition chain backward from its tail at `j`.
    fn do_while_chain_start(
        &self,
        view: &SeqView,
        i: usize,
        j: usize,
        head: BlockId,
        exit: BlockId,
    ) -> Result<usize, StructureError> {
        let min = if j == i { i } else { i + 1 };
        let mut c = j;
        while c > min {
            let candidate = self.graph.block(view.seq[c - 1])?;
            if !candidate.is_conditional() {
                break;
            }
            let chain = &view.seq[c..=j];
            let stays = candidate
                .successors()
                .iter()
                .all(|s| *s == head || *s == exit || chain.contains(s));
            if !stays {
                break;
            }
            let inner = self.graph.block(view.seq[c])?;
            let entered_elsewhere = inner
                .targeted_by
                .iter()
                .any(|src| view.pos.get(src).map_or(false, |&q| q + 1 < c || q > j));
            if entered_elsewhere {
                break;
            }
            c -= 1;
        }
        Ok(c)
    }

    /// Longest condition chain at `i` whose sinks are the first body block
    /// and `exit`; returns the body start.
    fn loop_chain_end(&self, view: &SeqView, i: usize, j: usize, exit: BlockId) -> Result<Option<usize>, StructureError> {
        let mut m = i;
        while m <= j && self.graph.block(view.seq[m])?.is_conditional() {
            m += 1;
        }
        for c in (i + 1..=m.min(j)).rev() {
            if self.chain_fits(view, i, c, view.seq[c], exit)? {
                return Ok(Some(c));
            }
        }
        Ok(None)
    }

    /// `goto cond; body; cond: if (...) goto body`
    fn structure_entry_loop(
        &mut self,
        view: &SeqView,
        i: usize,
        out: &mut Vec<BlockSection>,
    ) -> Result<Option<usize>, StructureError> {
        let target = match self.graph.block(view.seq[i])?.goto_target() {
            Some(target) => target,
            None => return Ok(None),
        };
        let k = match view.pos.get(&target) {
            Some(&k) if k > i + 1 => k,
            _ => return Ok(None),
        };
        let body_head = view.seq[i + 1];
        let mut m = k;
        while m < view.len() && self.graph.block(view.seq[m])?.is_conditional() {
            m += 1;
        }
        for j in (k..m).rev() {
            let exit = match view.after(j) {
                Some(exit) => exit,
                None => continue,
            };
            if !self.chain_fits(view, k, j + 1, body_head, exit)? {
                continue;
            }
            self.check_single_entry(view, i, j + 1)?;
            let chain = view.seq[k..=j].to_vec();
            let guard = build_guard(&*self.graph, self.sim, &chain, body_head, exit)?;
            let entry = self.take_section(view.seq[i])?;
            let scope = Scope { exit: Some(target), break_target: Some(exit), continue_target: Some(target) };
            let mut body = self.structure_seq(&view.seq[i + 1..k], scope)?;
            out.push(entry);
            if guard.is_pure() {
                self.discard(&chain);
                log::trace!("bottom-tested while at block {}", body_head);
                out.push(BlockSection::While { guard, body });
            } else {
                // the condition runs statements: test it first inside an endless loop
                let exit_guard = build_guard(&*self.graph, self.sim, &chain, exit, body_head)?;
                self.discard(&chain);
                log::trace!("bottom-tested loop at block {} with statement header", body_head);
                body.insert(
                    0,
                    BlockSection::If { guard: exit_guard, body: vec![BlockSection::Break], elifs: Vec::new(), else_body: None },
                );
                out.push(BlockSection::While { guard: Guard::constant(true, guard.origin), body });
            }
            return Ok(Some(j + 1));
        }
        Ok(None)
    }

    /// `seq[start..c]` is a chain of conditionals entered only at its head
    /// whose edges leave only to `body` and `other`, reaching both.
    fn chain_fits(
        &self,
        view: &SeqView,
        start: usize,
        c: usize,
        body: BlockId,
        other: BlockId,
    ) -> Result<bool, StructureError> {
        let chain = &view.seq[start..c];
        let (mut reaches_body, mut reaches_other) = (false, false);
        for (k, &id) in chain.iter().enumerate() {
            let block = self.graph.block(id)?;
            if !block.is_conditional() {
                return Ok(false);
            }
            if k > 0 && block.targeted_by.iter().any(|src| !chain.contains(src) && self.graph.get(*src).is_some()) {
                return Ok(false);
            }
            for succ in block.successors() {
                if succ == body {
                    reaches_body = true;
                } else if succ == other {
                    reaches_other = true;
                } else if !chain[k + 1..].contains(&succ) {
                    return Ok(false);
                }
            }
        }
        Ok(reaches_body && reaches_other)
    }

    // ========================================================================
    // Exception regions
    // ========================================================================

    fn structure_try(
        &mut self,
        view: &SeqView,
        i: usize,
        region_index: usize,
        out: &mut Vec<BlockSection>,
    ) -> Result<usize, StructureError> {
        let region = self
            .graph
            .regions
            .get(region_index)
            .cloned()
            .ok_or_else(|| StructureError::unreachable(view.seq[i], "try marker names an unknown region"))?;
        let kind_at = |graph: &BlockGraph, p: usize| graph.get(view.seq[p]).map(|b| b.kind);

        let e = (i + 1..view.len())
            .find(|&p| kind_at(&*self.graph, p) == Some(BlockKind::TryEnd(region_index)))
            .ok_or_else(|| StructureError::malformed(region.start, "try region end lies outside its enclosing region"))?;
        let mut markers = vec![view.seq[i], view.seq[e]];

        // `goto merge` right after the protected range
        let mut cursor = e + 1;
        let mut merge = None;
        if let Some(&id) = view.seq.get(cursor) {
            let block = self.graph.block(id)?;
            if block.kind == BlockKind::Code && block.is_logic_empty() && block.is_goto() {
                merge = block.target;
                markers.push(id);
                cursor += 1;
            }
        }

        let handlers: Vec<(usize, usize)> = (cursor..view.len())
            .filter_map(|p| match kind_at(&*self.graph, p) {
                Some(BlockKind::Handler(r, h)) if r == region_index => Some((p, h)),
                _ => None,
            })
            .collect();
        match handlers.first() {
            Some(&(p, _)) if p == cursor => {}
            _ => {
                return Err(StructureError::malformed(
                    region.start,
                    "code between a protected range and its first handler",
                ))
            }
        }
        let last_handler = handlers[handlers.len() - 1].0;

        // a catch that jumps past the last handler names the merge point
        if merge.is_none() {
            for pair in handlers.windows(2) {
                let end = pair[1].0;
                if end <= pair[0].0 + 1 {
                    continue;
                }
                if let Some(target) = self.graph.block(view.seq[end - 1])?.goto_target() {
                    let past = view.pos.get(&target).map_or(Some(target) == view.scope.exit, |&q| q > last_handler);
                    if past {
                        merge = Some(target);
                        break;
                    }
                }
            }
        }

        let end = match merge {
            Some(m) => match view.pos.get(&m) {
                Some(&q) if q > last_handler => q,
                Some(_) => {
                    return Err(StructureError::malformed(region.start, "try merge point precedes its last handler"))
                }
                None if Some(m) == view.scope.exit => view.len(),
                None => {
                    return Err(StructureError::unsupported(
                        region.start,
                        format!("try statement continues at block {} outside its enclosing region", m),
                    ))
                }
            },
            None => self.last_catch_end(view, &region, &handlers, i)?,
        };
        self.check_single_entry(view, i, end)?;

        let body_scope = Scope { exit: Some(view.seq[e]), ..view.scope };
        let body = self.structure_seq(&view.seq[i + 1..e], body_scope)?;

        let catch_exit = merge.or_else(|| view.seq.get(end).copied()).or(view.scope.exit);
        let mut catches = Vec::with_capacity(handlers.len());
        for (k, &(p, h)) in handlers.iter().enumerate() {
            let stop = handlers.get(k + 1).map_or(end, |next| next.0);
            let handler = region
                .handlers
                .get(h)
                .ok_or_else(|| StructureError::unreachable(view.seq[p], "handler marker names an unknown handler"))?;
            let exception_types: Vec<String> = if handler.catch_types.iter().any(Option::is_none) {
                Vec::new()
            } else {
                handler.catch_types.iter().flatten().cloned().collect()
            };
            let first = view.seq.get(p + 1).copied().filter(|_| p + 1 < stop);
            let local = self.catch_local(handler, first, &exception_types);
            let scope = Scope { exit: catch_exit, ..view.scope };
            let body = self.structure_seq(&view.seq[p + 1..stop], scope)?;
            markers.push(view.seq[p]);
            catches.push(Catch { exception_types, local, body });
        }
        self.discard(&markers);
        log::trace!("try region {} with {} catches", region_index, catches.len());
        out.push(BlockSection::TryCatch { body, catches });
        Ok(end)
    }

    /// End of the last catch body when no merge point is known.
    fn last_catch_end(
        &mut self,
        view: &SeqView,
        region: &ExceptionRegion,
        handlers: &[(usize, usize)],
        start: usize,
    ) -> Result<usize, StructureError> {
        let &(last, h) = handlers
            .last()
            .ok_or_else(|| StructureError::malformed(region.start, "try region without handlers"))?;

        if self.catch_scope_fallback {
            if let Some(scope_end) = self.catch_scope_end(view, region, last, h) {
                let end = (last + 1..view.len())
                    .find(|&p| self.graph.get(view.seq[p]).map_or(false, |b| b.start >= scope_end))
                    .unwrap_or(view.len());
                log::warn!(
                    "catch body at instruction {} ends where its local goes out of scope (instruction {})",
                    region.handlers.get(h).map_or(region.start, |hd| hd.index),
                    scope_end
                );
                self.used_catch_scope_fallback = true;
                return Ok(end);
            }
        }

        // nothing after the handler is entered from before it: the rest of
        // the sequence only runs after this catch
        for p in last + 1..view.len() {
            let block = self.graph.block(view.seq[p])?;
            // marker fallthrough is not a real entry
            let entered = block.targeted_by.iter().any(|src| {
                view.pos.get(src).map_or(false, |&q| q >= start && q < last)
                    && self.graph.get(*src).map_or(true, |b| !b.is_marker())
            });
            if entered {
                return Err(StructureError::malformed(
                    block.report_index(),
                    "cannot tell where the last catch body ends",
                ));
            }
        }
        Ok(view.len())
    }

    /// Instruction index where the catch local's scope closes.
    fn catch_scope_end(&self, view: &SeqView, region: &ExceptionRegion, marker: usize, h: usize) -> Option<usize> {
        let handler = region.handlers.get(h)?;
        let first = view.seq.get(marker + 1).and_then(|&id| self.graph.get(id));
        let store = first.and_then(leading_store);
        let types: Vec<String> = handler.catch_types.iter().flatten().cloned().collect();
        let descriptor = match types.as_slice() {
            [single] => Some(class_descriptor(single)),
            _ => None,
        };
        let item = self
            .locals
            .instance_for_label(handler.label, descriptor.as_deref())
            .or_else(|| {
                let (slot, at) = store?;
                self.locals.instance_at(slot, at + 1, &self.graph.labels)
            })?;
        self.graph.labels.get(&item.end).copied()
    }

    fn catch_local(&self, handler: &RegionHandler, first: Option<BlockId>, types: &[String]) -> Option<LocalVar> {
        let store = first.and_then(|id| self.graph.get(id)).and_then(leading_store);
        let slot = store.map(|(slot, _)| slot).or(handler.local)?;
        let descriptor = match types {
            [single] => Some(class_descriptor(single)),
            _ => None,
        };
        if let Some(item) = self.locals.instance_for_label(handler.label, descriptor.as_deref()) {
            if item.index == slot {
                return Some(LocalVar {
                    index: slot,
                    name: Some(item.name.clone()),
                    descriptor: Some(item.descriptor.clone()),
                });
            }
        }
        let at = store.map_or(handler.index, |(_, index)| index + 1);
        Some(self.sim.local(slot, at))
    }

    // ========================================================================
    // Switches
    // ========================================================================

    fn structure_switch(&mut self, view: &SeqView, i: usize, out: &mut Vec<BlockSection>) -> Result<usize, StructureError> {
        let len = view.len();
        let selector = self.graph.block(view.seq[i])?;
        let report = selector.report_index();

        // (target, case keys, is default) per distinct target, by position
        let mut arms: BTreeMap<usize, (BlockId, Vec<i32>, bool)> = BTreeMap::new();
        for (key, &target) in &selector.switch_targets {
            let p = match view.pos.get(&target) {
                Some(&p) if p > i => p,
                None if Some(target) == view.scope.exit => len,
                _ => return Err(StructureError::unsupported(report, "switch target outside its region")),
            };
            let arm = arms.entry(p).or_insert_with(|| (target, Vec::new(), false));
            match key {
                SwitchKey::Case(value) => arm.1.push(*value),
                SwitchKey::Default => arm.2 = true,
            }
        }

        // A default that only collects breaks is the merge point, not an arm.
        let mut merge_pos = None;
        if let Some((&p, (target, keys, true))) = arms.iter().next_back() {
            if keys.is_empty() {
                let jumped_to = p == len
                    || self.graph.block(*target)?.targeted_by.iter().any(|src| {
                        view.pos.get(src).map_or(false, |&q| q > i && q < p)
                            && self.graph.get(*src).map_or(false, |b| b.goto_target() == Some(*target))
                    });
                if jumped_to {
                    merge_pos = Some(p);
                }
            }
        }
        if let Some(p) = merge_pos {
            arms.remove(&p);
        }
        let merge_pos = match merge_pos {
            Some(p) => p,
            None => {
                let last_arm = arms.keys().next_back().copied().unwrap_or(i);
                (last_arm + 1..len)
                    .find(|&q| {
                        self.graph.get(view.seq[q]).map_or(false, |b| {
                            b.targeted_by.iter().any(|src| view.pos.get(src).map_or(false, |&s| s > i && s < last_arm))
                        })
                    })
                    .unwrap_or(len)
            }
        };
        let merge = view.seq.get(merge_pos).copied().or(view.scope.exit);
        let end = self.region_end(view, i, merge_pos)?;
        if end != merge_pos {
            return Err(StructureError::unsupported(report, "switch case jumps past the switch merge point"));
        }

        let starts: Vec<usize> = arms.keys().copied().collect();
        let mut cases = Vec::with_capacity(arms.len());
        for (k, (p, (_, mut keys, is_default))) in arms.into_iter().enumerate() {
            let stop = starts.get(k + 1).copied().unwrap_or(merge_pos).max(p);
            let next_start = starts.get(k + 1).and_then(|&q| view.seq.get(q).copied());
            let (breaks, falls_through) = if stop > p {
                let last = self.graph.block(view.seq[stop - 1])?;
                let breaks = merge.is_some() && last.goto_target() == merge;
                let falls = !breaks && next_start.map_or(false, |n| last.successors().contains(&n));
                (breaks, falls)
            } else {
                (true, false)
            };
            keys.sort_unstable();
            let exit = if falls_through && !breaks { next_start } else { merge };
            let scope = Scope { exit, break_target: merge, ..view.scope };
            let body = self.structure_seq(&view.seq[p..stop], scope)?;
            cases.push(Case { keys, is_default, body, breaks, falls_through });
        }

        let selector = self
            .graph
            .remove(view.seq[i])
            .ok_or_else(|| StructureError::unreachable(report, "switch block missing"))?;
        log::trace!("switch at block {} with {} cases", selector.id, cases.len());
        out.push(BlockSection::Switch { selector, cases });
        Ok(merge_pos)
    }

    // ========================================================================
    // Conditionals
    // ========================================================================

    /// Longest forward condition chain at `i` with at most two exits, one
    /// of them the block right after the chain.
    fn if_chain(&self, view: &SeqView, i: usize) -> Result<Option<(usize, BlockId, BlockId)>, StructureError> {
        let mut m = i;
        while m < view.len() && self.graph.block(view.seq[m])?.is_conditional() {
            m += 1;
        }
        'chains: for c in (i + 1..=m).rev() {
            let next = match view.seq.get(c).copied().or(view.scope.exit) {
                Some(next) => next,
                None => continue,
            };
            let chain = &view.seq[i..c];
            let mut outside = BTreeSet::new();
            for (k, &id) in chain.iter().enumerate() {
                let block = self.graph.block(id)?;
                if k > 0 && block.targeted_by.iter().any(|src| !chain.contains(src) && self.graph.get(*src).is_some()) {
                    continue 'chains;
                }
                for succ in block.successors() {
                    if chain[k + 1..].contains(&succ) {
                        continue;
                    }
                    if chain[..=k].contains(&succ) {
                        continue 'chains;
                    }
                    outside.insert(succ);
                }
            }
            if outside.contains(&next) && outside.len() <= 2 {
                let other = outside.iter().copied().find(|&s| s != next).unwrap_or(next);
                return Ok(Some((c, next, other)));
            }
        }
        Ok(None)
    }

    fn structure_if(&mut self, view: &SeqView, i: usize, out: &mut Vec<BlockSection>) -> Result<usize, StructureError> {
        let report = self.graph.block(view.seq[i])?.report_index();
        let (c, next, x) = self
            .if_chain(view, i)?
            .ok_or_else(|| StructureError::unreachable(report, "conditional does not open a region"))?;
        let chain = view.seq[i..c].to_vec();
        let len = view.len();
        let scope = view.scope;

        // `if (...) break;` and `if (...) continue;`
        if !view.pos.contains_key(&x) && Some(x) != scope.exit {
            let jump = if Some(x) == scope.break_target {
                BlockSection::Break
            } else if Some(x) == scope.continue_target {
                BlockSection::Continue
            } else {
                return Err(StructureError::unsupported(report, format!("condition jumps out of its region to block {}", x)));
            };
            let guard = build_guard(&*self.graph, self.sim, &chain, x, next)?;
            self.discard(&chain);
            out.push(BlockSection::If { guard, body: vec![jump], elifs: Vec::new(), else_body: None });
            return Ok(c);
        }

        let then_end = match view.pos.get(&x) {
            Some(&px) if px >= c => px,
            Some(_) => return Err(StructureError::unsupported(report, "condition jumps backward out of its region")),
            None => len,
        };

        // The then body ends in a jump over the else body.
        let mut else_range = None;
        if then_end > c && then_end < len {
            let last = self.graph.block(view.seq[then_end - 1])?;
            if let Some(y) = last.goto_target() {
                match view.pos.get(&y) {
                    Some(&py) if py > then_end => else_range = Some((py, Some(y))),
                    None if Some(y) == scope.exit => else_range = Some((len, Some(y))),
                    _ => {}
                }
            }
        }
        let end = else_range.map_or(then_end, |(e, _)| e);
        if self.region_end(view, i, end)? != end {
            return Err(StructureError::unsupported(report, "conditional region extends past its merge point"));
        }

        let guard = build_guard(&*self.graph, self.sim, &chain, next, x)?;
        let merge = match else_range {
            Some((_, y)) => y,
            None => view.seq.get(then_end).copied().or(scope.exit),
        };
        let body = self.structure_seq(&view.seq[c..then_end], Scope { exit: merge, ..scope })?;
        let mut else_body = match else_range {
            Some((e, _)) => Some(self.structure_seq(&view.seq[then_end..e], Scope { exit: merge, ..scope })?),
            None => None,
        };
        self.discard(&chain);

        let mut elifs = Vec::new();
        while self.collapse_else_if
            && matches!(else_body.as_deref(), Some([BlockSection::If { guard, .. }]) if guard.is_pure())
        {
            if let Some(BlockSection::If { guard, body, elifs: inner, else_body: inner_else }) =
                else_body.take().and_then(|mut nested| nested.pop())
            {
                elifs.push((guard, body));
                elifs.extend(inner);
                else_body = inner_else;
            }
        }
        let else_body = else_body.filter(|b| !b.is_empty());
        log::trace!("if at block {} ({} elifs, else: {})", chain[0], elifs.len(), else_body.is_some());
        out.push(BlockSection::If { guard, body, elifs, else_body });
        Ok(end)
    }

    // ========================================================================
    // Plain blocks
    // ========================================================================

    fn structure_inline(&mut self, view: &SeqView, i: usize, out: &mut Vec<BlockSection>) -> Result<usize, StructureError> {
        let (goto, report) = {
            let block = self.graph.block(view.seq[i])?;
            (block.goto_target(), block.report_index())
        };
        out.push(self.take_section(view.seq[i])?);
        if let Some(target) = goto {
            let is_last = i + 1 == view.len();
            if view.seq.get(i + 1) == Some(&target) || (is_last && Some(target) == view.scope.exit) {
                // plain fallthrough
            } else if Some(target) == view.scope.break_target {
                out.push(BlockSection::Break);
            } else if Some(target) == view.scope.continue_target {
                out.push(BlockSection::Continue);
            } else {
                return Err(StructureError::unsupported(report, format!("jump to block {} leaves its region", target)));
            }
        }
        Ok(i + 1)
    }

    // ========================================================================
    // Region bounds
    // ========================================================================

    /// Grow `[start, end)` until no block inside jumps past it, then check
    /// nothing outside jumps in. Jumps to break and continue targets are
    /// ignored; a jump to the scope exit counts as the sequence end.
    fn region_end(&self, view: &SeqView, start: usize, end: usize) -> Result<usize, StructureError> {
        let mut end = end;
        let mut p = start;
        while p < end {
            let block = self.graph.block(view.seq[p])?;
            for succ in block.successors() {
                if Some(succ) == view.scope.break_target || Some(succ) == view.scope.continue_target {
                    continue;
                }
                let q = match view.pos.get(&succ) {
                    Some(&q) => q,
                    None if Some(succ) == view.scope.exit => view.len(),
                    None => {
                        return Err(StructureError::unsupported(
                            block.report_index(),
                            format!("block {} jumps out of its region to block {}", block.id, succ),
                        ))
                    }
                };
                if q < start {
                    return Err(StructureError::unsupported(block.report_index(), "jump backward out of a region"));
                }
                end = end.max(q);
            }
            p += 1;
        }
        self.check_single_entry(view, start, end)?;
        Ok(end)
    }

    /// Blocks of `seq[start..end]` other than the first are entered only
    /// from inside the window.
    fn check_single_entry(&self, view: &SeqView, start: usize, end: usize) -> Result<(), StructureError> {
        for p in start + 1..end.min(view.len()) {
            let block = self.graph.block(view.seq[p])?;
            let from_outside = block
                .targeted_by
                .iter()
                .any(|src| view.pos.get(src).map_or(false, |&q| q < start || q >= end));
            if from_outside {
                return Err(StructureError::malformed(block.report_index(), "jump into the middle of a region"));
            }
        }
        Ok(())
    }

    fn take_section(&mut self, id: BlockId) -> Result<BlockSection, StructureError> {
        let mut block = self
            .graph
            .remove(id)
            .ok_or_else(|| StructureError::unreachable(id, "block placed twice"))?;
        Ok(match block.internal.take() {
            Some(section) => *section,
            None => BlockSection::Inline(block),
        })
    }

    fn discard(&mut self, ids: &[BlockId]) {
        for &id in ids {
            self.graph.remove(id);
        }
    }
}

/// `astore` of the caught exception at the top of a handler block.
fn leading_store(block: &Block) -> Option<(u16, usize)> {
    match block.opcodes.first() {
        Some(AddressedInstruction { index, instruction: Instruction::Store(slot) }) => Some((*slot, *index)),
        _ => None,
    }
}
