//! Per-opcode control-flow effects.
//!
//! Each opcode maps to one [`Effect`]: whether its static stack delta is
//! folded into the enclosing block, whether it forces the block to end, and the
//! edges it contributes. Edge transfers are plain functions of the source
//! block's exit state `(s, f, e)`; a `None` slot passes the value through.

use std::fmt;
use std::sync::OnceLock;

use crate::analysis::BlockId;
use crate::analysis::expr::{self, Expr};
use crate::bytecode::op::Opcode;

/// Symbolic transfer over `(stack, frames, exception)`.
pub type TransferFn = fn(&Expr, &Expr, &Expr) -> Expr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Successor {
    /// The instruction that follows in the stream.
    Next,
    /// The instruction's resolved jump target.
    Target,
    /// A pseudo-block such as END.
    Fixed(BlockId),
}

#[derive(Clone, Copy)]
pub struct EdgeEffect {
    pub successor: Successor,
    pub stack: Option<TransferFn>,
    pub frames: Option<TransferFn>,
    pub exception: Option<TransferFn>,
    /// Evaluates to `true` for source states that cannot take this edge.
    pub not_taken: Option<TransferFn>,
}

impl EdgeEffect {
    pub fn to(successor: Successor) -> Self {
        EdgeEffect {
            successor,
            stack: None,
            frames: None,
            exception: None,
            not_taken: None,
        }
    }

    pub fn stack(mut self, f: TransferFn) -> Self {
        self.stack = Some(f);
        self
    }

    pub fn frames(mut self, f: TransferFn) -> Self {
        self.frames = Some(f);
        self
    }

    pub fn exception(mut self, f: TransferFn) -> Self {
        self.exception = Some(f);
        self
    }

    pub fn unless(mut self, f: TransferFn) -> Self {
        self.not_taken = Some(f);
        self
    }

    /// Falls through to the next instruction without touching the state.
    pub fn is_identity_fallthrough(&self) -> bool {
        self.successor == Successor::Next
            && self.stack.is_none()
            && self.frames.is_none()
            && self.exception.is_none()
            && self.not_taken.is_none()
    }
}

impl fmt::Debug for EdgeEffect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slot = |t: Option<TransferFn>| if t.is_some() { "fn" } else { "id" };
        f.debug_struct("EdgeEffect")
            .field("successor", &self.successor)
            .field("stack", &slot(self.stack))
            .field("frames", &slot(self.frames))
            .field("exception", &slot(self.exception))
            .field("not_taken", &self.not_taken.is_some())
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct Effect {
    /// The static delta is added to the block's running delta.
    pub applies_delta: bool,
    /// The block always ends after this instruction.
    pub closes_block: bool,
    pub edges: Vec<EdgeEffect>,
}

impl Effect {
    fn fallthrough() -> Self {
        Effect {
            applies_delta: true,
            closes_block: false,
            edges: vec![EdgeEffect::to(Successor::Next)],
        }
    }

    fn branch() -> Self {
        Effect {
            applies_delta: true,
            closes_block: true,
            edges: vec![
                EdgeEffect::to(Successor::Next),
                EdgeEffect::to(Successor::Target),
            ],
        }
    }

    fn closing(applies_delta: bool, edges: Vec<EdgeEffect>) -> Self {
        Effect {
            applies_delta,
            closes_block: true,
            edges,
        }
    }

    /// Anything beyond a plain fallthrough ends the block.
    pub fn ends_block(&self) -> bool {
        self.closes_block || !matches!(self.edges.as_slice(), [edge] if edge.is_identity_fallthrough())
    }
}

// =============================================================================
// Transfer functions
// =============================================================================

fn push_one(s: &Expr, _f: &Expr, _e: &Expr) -> Expr {
    s + 1
}

fn pop_one(s: &Expr, _f: &Expr, _e: &Expr) -> Expr {
    s - 1
}

/// Stack at an exception handler: six values describe the exception.
fn enter_handler(s: &Expr, _f: &Expr, _e: &Expr) -> Expr {
    s + 6
}

/// A `with` handler additionally keeps the exit callable.
fn enter_with_handler(s: &Expr, _f: &Expr, _e: &Expr) -> Expr {
    s + 7
}

fn saved_depth(_s: &Expr, f: &Expr, _e: &Expr) -> Expr {
    expr::head(f)
}

fn push_marker(s: &Expr, f: &Expr, _e: &Expr) -> Expr {
    expr::cons(&[s.clone(), f.clone()])
}

fn pop_marker(_s: &Expr, f: &Expr, _e: &Expr) -> Expr {
    expr::tail(f)
}

fn raised(_s: &Expr, _f: &Expr, _e: &Expr) -> Expr {
    expr::boolean(true)
}

fn cleared(_s: &Expr, _f: &Expr, _e: &Expr) -> Expr {
    expr::boolean(false)
}

fn finally_exit(s: &Expr, _f: &Expr, e: &Expr) -> Expr {
    expr::select(e, &(s - 6), &(s - 1))
}

fn exception_pending(_s: &Expr, _f: &Expr, e: &Expr) -> Expr {
    e.clone()
}

fn no_exception(_s: &Expr, _f: &Expr, e: &Expr) -> Expr {
    expr::select(e, &expr::boolean(false), &expr::boolean(true))
}

// =============================================================================
// Table
// =============================================================================

fn effect_for(op: Opcode) -> Effect {
    use Opcode::*;
    use Successor::{Fixed, Next, Target};

    match op {
        ReturnValue => Effect::closing(true, vec![EdgeEffect::to(Fixed(BlockId::END))]),
        RaiseVarargs => Effect::closing(true, vec![EdgeEffect::to(Fixed(BlockId::EXCEPT))]),

        JumpAbsolute | JumpForward | ContinueLoop => {
            Effect::closing(false, vec![EdgeEffect::to(Target)])
        }

        JumpIfFalseOrPop | JumpIfTrueOrPop => Effect::closing(
            false,
            vec![EdgeEffect::to(Next).stack(pop_one), EdgeEffect::to(Target)],
        ),

        ForIter => Effect::closing(
            false,
            vec![
                EdgeEffect::to(Next).stack(push_one),
                EdgeEffect::to(Target).stack(pop_one),
            ],
        ),

        SetupLoop => Effect::closing(
            false,
            vec![EdgeEffect::to(Next).frames(push_marker), EdgeEffect::to(Target)],
        ),

        SetupExcept => Effect::closing(
            false,
            vec![
                EdgeEffect::to(Next).frames(push_marker),
                EdgeEffect::to(Target)
                    .stack(enter_handler)
                    .frames(push_marker)
                    .exception(raised),
            ],
        ),

        SetupFinally => Effect::closing(
            false,
            vec![
                EdgeEffect::to(Next).frames(push_marker).exception(cleared),
                EdgeEffect::to(Target).stack(enter_handler).exception(raised),
            ],
        ),

        SetupWith => Effect::closing(
            false,
            vec![
                EdgeEffect::to(Next).stack(push_one).frames(push_marker),
                EdgeEffect::to(Target)
                    .stack(enter_with_handler)
                    .exception(raised),
            ],
        ),

        PopBlock => Effect::closing(
            false,
            vec![EdgeEffect::to(Next).stack(saved_depth).frames(pop_marker)],
        ),

        PopExcept => Effect::closing(
            false,
            vec![
                EdgeEffect::to(Next)
                    .stack(saved_depth)
                    .frames(pop_marker)
                    .exception(cleared),
            ],
        ),

        EndFinally => Effect::closing(
            false,
            vec![
                EdgeEffect::to(Next)
                    .stack(finally_exit)
                    .exception(cleared)
                    .unless(exception_pending),
                EdgeEffect::to(Fixed(BlockId::EXCEPT)).unless(no_exception),
            ],
        ),

        _ if op.operand_kind().is_label() => Effect::branch(),
        _ => Effect::fallthrough(),
    }
}

fn table() -> &'static [Effect] {
    static TABLE: OnceLock<Vec<Effect>> = OnceLock::new();
    TABLE.get_or_init(|| {
        (0..=u8::MAX)
            .map(|byte| Opcode::from_u8(byte).map_or_else(Effect::fallthrough, effect_for))
            .collect()
    })
}

/// The effect of `op`. The table is built on first use and shared afterwards.
pub fn effect(op: Opcode) -> &'static Effect {
    &table()[op as usize]
}
