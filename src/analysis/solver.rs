//! Worklist fixed point over a [`BlockGraph`].
//!
//! Processing a block recomputes its whole exit-state set from the current
//! exit states of its sources. Candidates that still mention another block's
//! state are expanded against that block's committed states, or dropped until
//! that block has some. A changed set re-enqueues every dependent.

use std::collections::{BTreeMap, BTreeSet};

use crate::analysis::cfg::BlockGraph;
use crate::analysis::expr::Replacement;
use crate::analysis::{BlockId, State};
use crate::bytecode::assemble_error::AssembleError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SolverConfig {
    /// Sweeps over the worklist before giving up.
    pub max_rounds: usize,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self { max_rounds: 1000 }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SolveStats {
    pub rounds: usize,
    /// How many times each block was recomputed.
    pub visits: BTreeMap<BlockId, usize>,
}

/// Runs the worklist to a fixed point.
///
/// Pending blocks are taken in offset order. A round ends whenever the next
/// pending block does not come after the one just processed, so a straight
/// chain of any length fits in one round and the budget counts loop trips.
pub fn solve(graph: &mut BlockGraph, config: &SolverConfig) -> Result<SolveStats, AssembleError> {
    let mut stats = SolveStats::default();
    let Some(start) = graph.get_mut(BlockId::START) else {
        return Ok(stats);
    };
    start.states = BTreeSet::from([State::initial()]);
    let mut pending: BTreeSet<BlockId> = start.dependents.clone();
    let mut last: Option<BlockId> = None;

    while let Some(id) = pending.pop_first() {
        if last.is_none_or(|last| id <= last) {
            if stats.rounds >= config.max_rounds {
                return Err(AssembleError::ConvergenceFailure {
                    rounds: stats.rounds,
                    block: id,
                });
            }
            stats.rounds += 1;
            tracing::debug!("solver round {}: {} pending", stats.rounds, pending.len() + 1);
        }
        last = Some(id);

        if id == BlockId::START || !graph.contains(id) {
            continue;
        }
        *stats.visits.entry(id).or_default() += 1;

        let (entries, dependencies) = entry_states(graph, id);
        for dependency in dependencies {
            if let Some(node) = graph.get_mut(dependency) {
                node.dependents.insert(id);
            }
        }

        let Some(node) = graph.get_mut(id) else {
            continue;
        };
        let delta = node.block.delta;
        let exits: BTreeSet<State> = entries
            .into_iter()
            .map(|entry| State {
                stack: &entry.stack + delta,
                ..entry
            })
            .collect();
        if exits != node.states {
            tracing::trace!("block {}: {} -> {} states", id, node.states.len(), exits.len());
            node.states = exits;
            pending.extend(node.dependents.iter().copied());
        }
    }

    Ok(stats)
}

/// Entry states of `id` derived from its sources, plus every block whose
/// states the candidates referred to.
fn entry_states(graph: &BlockGraph, id: BlockId) -> (BTreeSet<State>, BTreeSet<BlockId>) {
    let mut entries = BTreeSet::new();
    let mut dependencies = BTreeSet::new();
    let Some(node) = graph.get(id) else {
        return (entries, dependencies);
    };

    for (source, edge) in &node.sources {
        let Some(source_node) = graph.get(*source) else {
            continue;
        };
        for state in &source_node.states {
            if let Some(candidate) = edge.apply(*source, state) {
                expand(graph, candidate, &mut entries, &mut dependencies);
            }
        }
    }
    (entries, dependencies)
}

/// Substitutes committed states for every free block in `candidate`, one
/// block at a time, keeping each fully bound combination.
fn expand(
    graph: &BlockGraph,
    candidate: State,
    out: &mut BTreeSet<State>,
    dependencies: &mut BTreeSet<BlockId>,
) {
    let mut frontier = vec![candidate];
    while let Some(state) = frontier.pop() {
        let free = state.free_vars();
        let Some(block) = free.iter().next() else {
            out.insert(state);
            continue;
        };
        dependencies.insert(block);
        let Some(node) = graph.get(block) else {
            continue;
        };
        for bound in &node.states {
            frontier.push(state.substitute(&Replacement::bind(block, bound)));
        }
    }
}

/// Largest operand-stack depth reached anywhere in the solved graph.
pub fn max_depth(graph: &BlockGraph) -> Result<u32, AssembleError> {
    let mut depth: i64 = 0;
    for (id, node) in graph.iter() {
        for state in &node.states {
            let exit = state
                .stack
                .as_int()
                .ok_or_else(|| AssembleError::UnresolvedDepth {
                    block: id,
                    expr: state.stack.to_string(),
                })?;
            let entry = exit - node.block.delta;
            let lowest = entry + node.block.min_delta;
            if lowest < 0 {
                return Err(AssembleError::StackUnderflow {
                    block: id,
                    depth: lowest,
                });
            }
            depth = depth.max(entry + node.block.max_delta);
        }
    }
    Ok(u32::try_from(depth).unwrap_or(u32::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::cfg::{CfgBuilder, Edge};
    use crate::analysis::expr::{self, Role};
    use crate::bytecode::encode::EncodedInstr;
    use crate::bytecode::ir::Operand;
    use crate::bytecode::op::Opcode;

    fn instr(offset: u32, op: Opcode, arg: u32, target: Option<u32>) -> EncodedInstr {
        EncodedInstr {
            index: (offset / 2) as usize,
            line: 1,
            op,
            operand: Operand::Arg(arg),
            arg,
            target,
            target_index: None,
            offset,
            len: 2,
        }
    }

    fn graph_of(instrs: &[EncodedInstr], labels: &[u32]) -> BlockGraph {
        let labels: BTreeSet<u32> = labels.iter().copied().collect();
        let mut builder = CfgBuilder::new(&labels);
        for i in instrs {
            builder.insert(i);
        }
        builder.finish()
    }

    fn stacks(graph: &BlockGraph, id: BlockId) -> Vec<i64> {
        graph
            .get(id)
            .map(|node| node.states.iter().filter_map(|s| s.stack.as_int()).collect())
            .unwrap_or_default()
    }

    #[test]
    fn test_straight_line_depth() {
        let mut graph = graph_of(
            &[
                instr(0, Opcode::LoadConst, 0, None),
                instr(2, Opcode::LoadConst, 1, None),
                instr(4, Opcode::LoadConst, 2, None),
                instr(6, Opcode::BuildTuple, 3, None),
                instr(8, Opcode::ReturnValue, 0, None),
            ],
            &[],
        );
        solve(&mut graph, &SolverConfig::default()).unwrap();
        assert_eq!(max_depth(&graph).unwrap(), 3);
        assert_eq!(stacks(&graph, BlockId::END), vec![0]);
    }

    #[test]
    fn test_loop_converges_with_single_state() {
        let mut graph = loop_graph();
        let stats = solve(&mut graph, &SolverConfig::default()).unwrap();
        assert_eq!(max_depth(&graph).unwrap(), 2);
        assert_eq!(stacks(&graph, BlockId(6)), vec![1]);
        assert!(stats.visits[&BlockId(6)] <= 3);
        assert_eq!(stats.rounds, 2);
        let after = graph.get(BlockId(14)).map(|n| n.states.len());
        assert_eq!(after, Some(1));
    }

    fn loop_graph() -> BlockGraph {
        // SETUP_LOOP; LOAD_FAST; GET_ITER; head: FOR_ITER; STORE_FAST;
        // JUMP_ABSOLUTE head; done: POP_BLOCK; after: LOAD_CONST; RETURN_VALUE
        graph_of(
            &[
                instr(0, Opcode::SetupLoop, 12, Some(14)),
                instr(2, Opcode::LoadFast, 0, None),
                instr(4, Opcode::GetIter, 0, None),
                instr(6, Opcode::ForIter, 4, Some(12)),
                instr(8, Opcode::StoreFast, 1, None),
                instr(10, Opcode::JumpAbsolute, 6, Some(6)),
                instr(12, Opcode::PopBlock, 0, None),
                instr(14, Opcode::LoadConst, 0, None),
                instr(16, Opcode::ReturnValue, 0, None),
            ],
            &[6, 12, 14],
        )
    }

    #[test]
    fn test_budget_exhaustion_is_convergence_failure() {
        let mut graph = loop_graph();
        let err = solve(&mut graph, &SolverConfig { max_rounds: 1 }).unwrap_err();
        assert_eq!(
            err,
            AssembleError::ConvergenceFailure {
                rounds: 1,
                block: BlockId(6)
            }
        );
    }

    #[test]
    fn test_long_chain_is_one_round() {
        let mut instrs = Vec::new();
        let mut labels = Vec::new();
        for i in 0..1500u32 {
            labels.push(i * 2);
            instrs.push(instr(i * 2, Opcode::Nop, 0, None));
        }
        instrs.push(instr(3000, Opcode::LoadConst, 0, None));
        instrs.push(instr(3002, Opcode::ReturnValue, 0, None));
        labels.push(3000);
        let mut graph = graph_of(&instrs, &labels);

        let stats = solve(&mut graph, &SolverConfig { max_rounds: 2 }).unwrap();
        assert_eq!(stats.rounds, 1);
        assert_eq!(stacks(&graph, BlockId::END), vec![0]);
    }

    #[test]
    fn test_pushing_loop_never_converges() {
        // head: LOAD_CONST; JUMP_ABSOLUTE head
        let mut graph = graph_of(
            &[
                instr(0, Opcode::LoadConst, 0, None),
                instr(2, Opcode::JumpAbsolute, 0, Some(0)),
            ],
            &[0],
        );
        let err = solve(&mut graph, &SolverConfig { max_rounds: 50 }).unwrap_err();
        assert!(matches!(
            err,
            AssembleError::ConvergenceFailure { rounds: 50, block: BlockId(0) }
        ));
    }

    #[test]
    fn test_resolve_is_idempotent() {
        let mut graph = graph_of(
            &[
                instr(0, Opcode::LoadFast, 0, None),
                instr(2, Opcode::PopJumpIfFalse, 8, Some(8)),
                instr(4, Opcode::LoadConst, 0, None),
                instr(6, Opcode::ReturnValue, 0, None),
                instr(8, Opcode::LoadConst, 1, None),
                instr(10, Opcode::ReturnValue, 0, None),
            ],
            &[8],
        );
        solve(&mut graph, &SolverConfig::default()).unwrap();
        let first: Vec<_> = graph.iter().map(|(id, n)| (id, n.states.clone())).collect();
        solve(&mut graph, &SolverConfig::default()).unwrap();
        let second: Vec<_> = graph.iter().map(|(id, n)| (id, n.states.clone())).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_underflow_reported() {
        let mut graph = graph_of(
            &[
                instr(0, Opcode::PopTop, 0, None),
                instr(2, Opcode::LoadConst, 0, None),
                instr(4, Opcode::ReturnValue, 0, None),
            ],
            &[],
        );
        solve(&mut graph, &SolverConfig::default()).unwrap();
        let err = max_depth(&graph).unwrap_err();
        assert_eq!(
            err,
            AssembleError::StackUnderflow {
                block: BlockId(0),
                depth: -1
            }
        );
    }

    #[test]
    fn test_pop_block_on_empty_control_stack_is_unresolved() {
        let mut graph = graph_of(
            &[
                instr(0, Opcode::PopBlock, 0, None),
                instr(2, Opcode::LoadConst, 0, None),
                instr(4, Opcode::ReturnValue, 0, None),
            ],
            &[],
        );
        solve(&mut graph, &SolverConfig::default()).unwrap();
        let err = max_depth(&graph).unwrap_err();
        assert!(matches!(err, AssembleError::UnresolvedDepth { block: BlockId(2), .. }));
    }

    #[test]
    fn test_cross_block_reference_waits_for_dependency() {
        // Block 4's edge into 8 reads the stack of block 0 instead of its own.
        let mut graph = graph_of(
            &[
                instr(0, Opcode::LoadConst, 0, None),
                instr(2, Opcode::LoadConst, 0, None),
                instr(4, Opcode::PopTop, 0, None),
                instr(6, Opcode::PopTop, 0, None),
                instr(8, Opcode::LoadConst, 0, None),
                instr(10, Opcode::ReturnValue, 0, None),
            ],
            &[4, 8],
        );
        let borrowed = Edge {
            stack: expr::add(&[expr::atom(Role::Stack, Some(BlockId(0))), expr::int(3)]),
            ..Edge::identity(BlockId(4))
        };
        if let Some(node) = graph.get_mut(BlockId(8)) {
            node.sources = vec![(BlockId(4), borrowed)];
        }
        solve(&mut graph, &SolverConfig::default()).unwrap();
        assert_eq!(stacks(&graph, BlockId(8)), vec![5]);
        let deps = graph.get(BlockId(0)).map(|n| n.dependents.contains(&BlockId(8)));
        assert_eq!(deps, Some(true));
    }
}
