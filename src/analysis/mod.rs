//! # Stack-depth analysis
//!
//! Abstract interpretation of an encoded instruction stream. The stream is cut
//! into basic blocks ([`cfg`]), each edge between blocks carries symbolic
//! transfer functions built from the per-opcode [`effects`] table, and the
//! [`solver`] propagates operand-stack / control-stack / exception state along
//! those edges until nothing changes. All symbolic values are [`expr::Expr`]
//! terms.
//!
//! ## Conventions
//!
//! - A block is identified by the byte offset of its first instruction.
//! - Three pseudo-blocks exist beside the real ones: [`BlockId::START`],
//!   [`BlockId::END`] (normal return) and [`BlockId::EXCEPT`] (exception leaves
//!   the unit).
//! - A state is the triple `(S, F, E)`: operand-stack depth, control-stack
//!   (a sequence of saved depths, innermost first) and the exception-pending flag.

pub mod cfg;
pub mod effects;
pub mod expr;
pub mod solver;

use std::fmt;

use crate::analysis::expr::{FreeVars, Replacement};
pub use crate::analysis::expr::{Expr, Role};

/// Identity of a node in the block graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

impl BlockId {
    pub const START: BlockId = BlockId(0xFFFF_FFFD);
    pub const EXCEPT: BlockId = BlockId(0xFFFF_FFFE);
    pub const END: BlockId = BlockId(0xFFFF_FFFF);

    /// True for START, END and EXCEPT.
    pub fn is_pseudo(self) -> bool {
        self.0 >= Self::START.0
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            BlockId::START => write!(f, "START"),
            BlockId::EXCEPT => write!(f, "EXCEPT"),
            BlockId::END => write!(f, "END"),
            BlockId(offset) => write!(f, "{:04X}", offset),
        }
    }
}

/// One abstract machine state: `(stack, control-stack, exception)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct State {
    pub stack: Expr,
    pub frames: Expr,
    pub exception: Expr,
}

impl State {
    /// Empty operand stack, empty control stack, no exception pending.
    pub fn initial() -> Self {
        State {
            stack: expr::int(0),
            frames: expr::empty_seq(),
            exception: expr::boolean(false),
        }
    }

    /// The unresolved state of `block`: one atom per role, tagged with the block.
    pub fn symbolic(block: BlockId) -> Self {
        State {
            stack: expr::atom(Role::Stack, Some(block)),
            frames: expr::atom(Role::Frames, Some(block)),
            exception: expr::atom(Role::Exception, Some(block)),
        }
    }

    pub fn free_vars(&self) -> FreeVars {
        expr::free_vars(&[
            self.stack.clone(),
            self.frames.clone(),
            self.exception.clone(),
        ])
    }

    pub fn substitute(&self, replacement: &Replacement) -> State {
        State {
            stack: replacement.apply(&self.stack),
            frames: replacement.apply(&self.frames),
            exception: replacement.apply(&self.exception),
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.stack, self.frames, self.exception)
    }
}
