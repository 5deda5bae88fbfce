//! Basic-block partitioning and the extended block graph.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::analysis::effects::{self, EdgeEffect, Successor};
use crate::analysis::expr::{Expr, Replacement};
use crate::analysis::{BlockId, State};
use crate::bytecode::encode::EncodedInstr;
use crate::bytecode::op::Opcode;

// =============================================================================
// Blocks and edges
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct BlockInstr {
    pub offset: u32,
    pub len: u32,
    pub op: Opcode,
    pub arg: u32,
    pub target: Option<u32>,
    /// `None` when the delta is carried by the outgoing edges instead.
    pub delta: Option<i64>,
}

/// Transfer from the exit state of the source block to the entry of the
/// destination, as terms over the source's symbolic state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub stack: Expr,
    pub frames: Expr,
    pub exception: Expr,
    pub not_taken: Option<Expr>,
}

impl Edge {
    pub fn instantiate(effect: &EdgeEffect, source: BlockId) -> Self {
        let sym = State::symbolic(source);
        let run = |slot: Option<effects::TransferFn>, default: &Expr| match slot {
            Some(f) => f(&sym.stack, &sym.frames, &sym.exception),
            None => default.clone(),
        };
        Edge {
            stack: run(effect.stack, &sym.stack),
            frames: run(effect.frames, &sym.frames),
            exception: run(effect.exception, &sym.exception),
            not_taken: effect
                .not_taken
                .map(|f| f(&sym.stack, &sym.frames, &sym.exception)),
        }
    }

    pub fn identity(source: BlockId) -> Self {
        Edge::instantiate(&EdgeEffect::to(Successor::Next), source)
    }

    /// The candidate entry state produced from one exit state of `source`, or
    /// `None` when the predicate rules the edge out for that state.
    pub fn apply(&self, source: BlockId, state: &State) -> Option<State> {
        let replacement = Replacement::bind(source, state);
        if let Some(predicate) = &self.not_taken {
            if replacement.apply(predicate).as_bool() == Some(true) {
                return None;
            }
        }
        Some(State {
            stack: replacement.apply(&self.stack),
            frames: replacement.apply(&self.frames),
            exception: replacement.apply(&self.exception),
        })
    }
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.stack, self.frames, self.exception)?;
        if let Some(predicate) = &self.not_taken {
            write!(f, " unless {}", predicate)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct Block {
    pub instrs: Vec<BlockInstr>,
    pub targets: BTreeMap<BlockId, Vec<Edge>>,
    /// Net in-block delta.
    pub delta: i64,
    /// Highest running delta, never below 0.
    pub max_delta: i64,
    /// Lowest running delta, never above 0.
    pub min_delta: i64,
}

impl Block {
    fn record(&mut self, instr: BlockInstr) {
        if let Some(delta) = instr.delta {
            self.delta += delta;
            self.max_delta = self.max_delta.max(self.delta);
            self.min_delta = self.min_delta.min(self.delta);
        }
        self.instrs.push(instr);
    }

    fn link(&mut self, target: BlockId, edge: Edge) {
        self.targets.entry(target).or_default().push(edge);
    }
}

// =============================================================================
// Graph
// =============================================================================

#[derive(Debug, Clone, Default)]
pub struct GraphBlock {
    pub block: Block,
    pub sources: Vec<(BlockId, Edge)>,
    /// Blocks whose states must be recomputed when this block's states change.
    pub dependents: BTreeSet<BlockId>,
    /// Exit states (entry state plus `block.delta`).
    pub states: BTreeSet<State>,
}

#[derive(Debug, Clone, Default)]
pub struct BlockGraph {
    nodes: BTreeMap<BlockId, GraphBlock>,
}

impl BlockGraph {
    pub fn get(&self, id: BlockId) -> Option<&GraphBlock> {
        self.nodes.get(&id)
    }

    pub fn get_mut(&mut self, id: BlockId) -> Option<&mut GraphBlock> {
        self.nodes.get_mut(&id)
    }

    pub fn contains(&self, id: BlockId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (BlockId, &GraphBlock)> {
        self.nodes.iter().map(|(id, node)| (*id, node))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Real blocks only, in offset order.
    pub fn code_blocks(&self) -> impl Iterator<Item = (BlockId, &GraphBlock)> {
        self.iter().filter(|(id, _)| !id.is_pseudo())
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Single forward pass that cuts the encoded stream into blocks.
pub struct CfgBuilder<'a> {
    label_offsets: &'a BTreeSet<u32>,
    blocks: BTreeMap<BlockId, Block>,
    current: Option<BlockId>,
    pending_next: Option<(u32, Opcode)>,
}

impl<'a> CfgBuilder<'a> {
    /// `label_offsets` holds the byte offset of every placed label.
    pub fn new(label_offsets: &'a BTreeSet<u32>) -> Self {
        CfgBuilder {
            label_offsets,
            blocks: BTreeMap::new(),
            current: None,
            pending_next: None,
        }
    }

    pub fn insert(&mut self, instr: &EncodedInstr) {
        let effect = effects::effect(instr.op);
        let id = *self.current.get_or_insert(BlockId(instr.offset));
        let block = self.blocks.entry(id).or_default();

        let delta = i64::from(instr.op.stack_effect(instr.arg));
        block.record(BlockInstr {
            offset: instr.offset,
            len: instr.len,
            op: instr.op,
            arg: instr.arg,
            target: instr.target,
            delta: effect.applies_delta.then_some(delta),
        });

        let next = instr.offset + instr.len;
        if !effect.ends_block() && !self.label_offsets.contains(&next) {
            self.pending_next = Some((next, instr.op));
            return;
        }

        for edge_effect in &effect.edges {
            let target = match edge_effect.successor {
                Successor::Next => BlockId(next),
                Successor::Fixed(pseudo) => pseudo,
                Successor::Target => match instr.target {
                    Some(offset) => BlockId(offset),
                    None => continue,
                },
            };
            block.link(target, Edge::instantiate(edge_effect, id));
        }
        tracing::trace!(
            "closed block {} at {:04X} ({}), delta={} max={}",
            id,
            next,
            instr.op,
            block.delta,
            block.max_delta
        );
        self.current = None;
        self.pending_next = None;
    }

    /// Adds the pseudo-blocks, derives sources and dependents, and prunes
    /// blocks that nothing can reach.
    pub fn finish(mut self) -> BlockGraph {
        if let (Some(id), Some((next, op))) = (self.current, self.pending_next) {
            tracing::debug!("block {} runs off the end after {} at {:04X}", id, op, next);
        }

        let mut start = Block::default();
        if self.blocks.contains_key(&BlockId(0)) {
            start.link(BlockId(0), Edge::identity(BlockId::START));
        }
        self.blocks.insert(BlockId::START, start);
        self.blocks.entry(BlockId::END).or_default();
        self.blocks.entry(BlockId::EXCEPT).or_default();

        let mut nodes: BTreeMap<BlockId, GraphBlock> = BTreeMap::new();
        let mut links: Vec<(BlockId, BlockId, Edge)> = Vec::new();
        for (id, block) in &self.blocks {
            for (target, edges) in &block.targets {
                for edge in edges {
                    links.push((*id, *target, edge.clone()));
                }
            }
        }
        for (id, block) in self.blocks {
            nodes.insert(
                id,
                GraphBlock {
                    block,
                    ..GraphBlock::default()
                },
            );
        }
        for (source, target, edge) in links {
            if !nodes.contains_key(&target) {
                tracing::debug!("dropping edge {} -> {}: no such block", source, target);
                continue;
            }
            if let Some(node) = nodes.get_mut(&source) {
                node.dependents.insert(target);
            }
            if let Some(node) = nodes.get_mut(&target) {
                node.sources.push((source, edge));
            }
        }

        let mut graph = BlockGraph { nodes };
        prune(&mut graph);
        graph
    }
}

fn prune(graph: &mut BlockGraph) {
    let mut work: Vec<BlockId> = graph
        .iter()
        .filter(|(id, node)| *id != BlockId::START && node.sources.is_empty())
        .map(|(id, _)| id)
        .collect();

    while let Some(id) = work.pop() {
        let orphaned = graph
            .get(id)
            .is_some_and(|node| node.sources.is_empty());
        if id == BlockId::START || !orphaned {
            continue;
        }
        let Some(removed) = graph.nodes.remove(&id) else {
            continue;
        };
        tracing::debug!("pruned unreachable block {}", id);
        for target in removed.block.targets.keys() {
            if let Some(node) = graph.nodes.get_mut(target) {
                node.sources.retain(|(source, _)| *source != id);
                if node.sources.is_empty() {
                    work.push(*target);
                }
            }
        }
    }
}
