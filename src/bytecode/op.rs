use std::fmt;

// =============================================================================
// OPCODE - wordcode instruction set
// =============================================================================

/// Opcodes at or above this value use their operand byte.
pub const HAVE_ARGUMENT: u8 = 90;

macro_rules! opcodes {
    ($($name:ident = $code:literal => $mnemonic:literal,)*) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr(u8)]
        pub enum Opcode {
            $($name = $code,)*
        }

        impl Opcode {
            pub const ALL: &'static [Opcode] = &[$(Opcode::$name,)*];

            pub fn from_u8(byte: u8) -> Option<Opcode> {
                match byte {
                    $($code => Some(Opcode::$name),)*
                    _ => None,
                }
            }

            pub fn mnemonic(self) -> &'static str {
                match self {
                    $(Opcode::$name => $mnemonic,)*
                }
            }
        }
    };
}

opcodes! {
    // stack shuffles
    PopTop = 1 => "POP_TOP",
    RotTwo = 2 => "ROT_TWO",
    RotThree = 3 => "ROT_THREE",
    DupTop = 4 => "DUP_TOP",
    DupTopTwo = 5 => "DUP_TOP_TWO",
    Nop = 9 => "NOP",

    // unary
    UnaryPositive = 10 => "UNARY_POSITIVE",
    UnaryNegative = 11 => "UNARY_NEGATIVE",
    UnaryNot = 12 => "UNARY_NOT",
    UnaryInvert = 15 => "UNARY_INVERT",

    // binary
    BinaryPower = 19 => "BINARY_POWER",
    BinaryMultiply = 20 => "BINARY_MULTIPLY",
    BinaryModulo = 22 => "BINARY_MODULO",
    BinaryAdd = 23 => "BINARY_ADD",
    BinarySubtract = 24 => "BINARY_SUBTRACT",
    BinarySubscr = 25 => "BINARY_SUBSCR",
    BinaryFloorDivide = 26 => "BINARY_FLOOR_DIVIDE",
    BinaryTrueDivide = 27 => "BINARY_TRUE_DIVIDE",
    InplaceAdd = 55 => "INPLACE_ADD",
    InplaceSubtract = 56 => "INPLACE_SUBTRACT",
    InplaceMultiply = 57 => "INPLACE_MULTIPLY",
    StoreSubscr = 60 => "STORE_SUBSCR",
    DeleteSubscr = 61 => "DELETE_SUBSCR",
    BinaryLshift = 62 => "BINARY_LSHIFT",
    BinaryRshift = 63 => "BINARY_RSHIFT",
    BinaryAnd = 64 => "BINARY_AND",
    BinaryXor = 65 => "BINARY_XOR",
    BinaryOr = 66 => "BINARY_OR",
    GetIter = 68 => "GET_ITER",

    // block structure
    ReturnValue = 83 => "RETURN_VALUE",
    YieldValue = 86 => "YIELD_VALUE",
    PopBlock = 87 => "POP_BLOCK",
    EndFinally = 88 => "END_FINALLY",
    PopExcept = 89 => "POP_EXCEPT",

    // names and containers
    StoreName = 90 => "STORE_NAME",
    DeleteName = 91 => "DELETE_NAME",
    UnpackSequence = 92 => "UNPACK_SEQUENCE",
    ForIter = 93 => "FOR_ITER",
    StoreAttr = 95 => "STORE_ATTR",
    StoreGlobal = 97 => "STORE_GLOBAL",
    LoadConst = 100 => "LOAD_CONST",
    LoadName = 101 => "LOAD_NAME",
    BuildTuple = 102 => "BUILD_TUPLE",
    BuildList = 103 => "BUILD_LIST",
    BuildMap = 105 => "BUILD_MAP",
    LoadAttr = 106 => "LOAD_ATTR",
    CompareOp = 107 => "COMPARE_OP",
    ImportName = 108 => "IMPORT_NAME",

    // jumps
    JumpForward = 110 => "JUMP_FORWARD",
    JumpIfFalseOrPop = 111 => "JUMP_IF_FALSE_OR_POP",
    JumpIfTrueOrPop = 112 => "JUMP_IF_TRUE_OR_POP",
    JumpAbsolute = 113 => "JUMP_ABSOLUTE",
    PopJumpIfFalse = 114 => "POP_JUMP_IF_FALSE",
    PopJumpIfTrue = 115 => "POP_JUMP_IF_TRUE",
    LoadGlobal = 116 => "LOAD_GLOBAL",
    ContinueLoop = 119 => "CONTINUE_LOOP",
    SetupLoop = 120 => "SETUP_LOOP",
    SetupExcept = 121 => "SETUP_EXCEPT",
    SetupFinally = 122 => "SETUP_FINALLY",

    // locals and cells
    LoadFast = 124 => "LOAD_FAST",
    StoreFast = 125 => "STORE_FAST",
    DeleteFast = 126 => "DELETE_FAST",
    RaiseVarargs = 130 => "RAISE_VARARGS",
    CallFunction = 131 => "CALL_FUNCTION",
    LoadClosure = 135 => "LOAD_CLOSURE",
    LoadDeref = 136 => "LOAD_DEREF",
    StoreDeref = 137 => "STORE_DEREF",
    SetupWith = 143 => "SETUP_WITH",

    ExtendedArg = 144 => "EXTENDED_ARG",
}

/// How an opcode's operand is written and resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    None,
    Arg,
    Compare,
    Constant,
    Name,
    Local,
    Free,
    /// Byte offset of the target.
    AbsLabel,
    /// Distance from the end of this instruction to the target.
    RelLabel,
}

impl OperandKind {
    pub fn is_label(self) -> bool {
        matches!(self, OperandKind::AbsLabel | OperandKind::RelLabel)
    }
}

impl fmt::Display for OperandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            OperandKind::None => "no operand",
            OperandKind::Arg => "numeric",
            OperandKind::Compare => "comparison",
            OperandKind::Constant => "constant",
            OperandKind::Name => "name",
            OperandKind::Local => "local",
            OperandKind::Free => "free variable",
            OperandKind::AbsLabel | OperandKind::RelLabel => "label",
        };
        write!(f, "{}", text)
    }
}

impl Opcode {
    pub fn has_argument(self) -> bool {
        self as u8 >= HAVE_ARGUMENT
    }

    pub fn from_mnemonic(text: &str) -> Option<Opcode> {
        Opcode::ALL.iter().copied().find(|op| op.mnemonic() == text)
    }

    pub fn operand_kind(self) -> OperandKind {
        use Opcode::*;
        match self {
            StoreName | DeleteName | StoreAttr | StoreGlobal | LoadName | LoadAttr
            | ImportName | LoadGlobal => OperandKind::Name,
            UnpackSequence | BuildTuple | BuildList | BuildMap | RaiseVarargs | CallFunction
            | ExtendedArg => OperandKind::Arg,
            LoadConst => OperandKind::Constant,
            CompareOp => OperandKind::Compare,
            ForIter | JumpForward | SetupLoop | SetupExcept | SetupFinally | SetupWith => {
                OperandKind::RelLabel
            }
            JumpIfFalseOrPop | JumpIfTrueOrPop | JumpAbsolute | PopJumpIfFalse | PopJumpIfTrue
            | ContinueLoop => OperandKind::AbsLabel,
            LoadFast | StoreFast | DeleteFast => OperandKind::Local,
            LoadClosure | LoadDeref | StoreDeref => OperandKind::Free,
            _ => OperandKind::None,
        }
    }

    /// Net operand-stack change of one execution along the fallthrough path.
    ///
    /// For opcodes whose effect depends on the path taken (FOR_ITER, the
    /// SETUP_* family, END_FINALLY, ...) this is the fallthrough value; the
    /// analysis models those through edge transfers instead.
    pub fn stack_effect(self, arg: u32) -> i32 {
        use Opcode::*;
        let n = i32::try_from(arg).unwrap_or(i32::MAX);
        match self {
            PopTop => -1,
            RotTwo | RotThree | Nop => 0,
            DupTop => 1,
            DupTopTwo => 2,

            UnaryPositive | UnaryNegative | UnaryNot | UnaryInvert => 0,
            BinaryPower | BinaryMultiply | BinaryModulo | BinaryAdd | BinarySubtract
            | BinarySubscr | BinaryFloorDivide | BinaryTrueDivide | InplaceAdd
            | InplaceSubtract | InplaceMultiply | BinaryLshift | BinaryRshift | BinaryAnd
            | BinaryXor | BinaryOr => -1,
            StoreSubscr => -3,
            DeleteSubscr => -2,
            GetIter => 0,

            ReturnValue => -1,
            YieldValue => 0,
            PopBlock | PopExcept => 0,
            EndFinally => -1,

            StoreName | StoreGlobal => -1,
            DeleteName => 0,
            UnpackSequence => n.saturating_sub(1),
            ForIter => 1,
            StoreAttr => -2,
            LoadConst | LoadName | LoadGlobal => 1,
            BuildTuple | BuildList => 1 - n,
            BuildMap => 1i32.saturating_sub(n.saturating_mul(2)),
            LoadAttr => 0,
            CompareOp | ImportName => -1,

            JumpForward | JumpAbsolute | ContinueLoop => 0,
            JumpIfFalseOrPop | JumpIfTrueOrPop => 0,
            PopJumpIfFalse | PopJumpIfTrue => -1,
            SetupLoop | SetupExcept | SetupFinally => 0,
            SetupWith => 1,

            LoadFast | LoadClosure | LoadDeref => 1,
            StoreFast | StoreDeref => -1,
            DeleteFast => 0,
            RaiseVarargs | CallFunction => -n,

            ExtendedArg => 0,
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.mnemonic())
    }
}

// =============================================================================
// Comparison kinds
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CmpOp {
    Lt,
    Le,
    Eq,
    Ne,
    Gt,
    Ge,
    In,
    NotIn,
    Is,
    IsNot,
    ExceptionMatch,
}

impl CmpOp {
    pub const ALL: [CmpOp; 11] = [
        CmpOp::Lt,
        CmpOp::Le,
        CmpOp::Eq,
        CmpOp::Ne,
        CmpOp::Gt,
        CmpOp::Ge,
        CmpOp::In,
        CmpOp::NotIn,
        CmpOp::Is,
        CmpOp::IsNot,
        CmpOp::ExceptionMatch,
    ];

    pub fn index(self) -> u32 {
        self as u32
    }

    pub fn from_index(index: u32) -> Option<CmpOp> {
        usize::try_from(index)
            .ok()
            .and_then(|i| CmpOp::ALL.get(i).copied())
    }

    pub fn symbol(self) -> &'static str {
        match self {
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
            CmpOp::In => "in",
            CmpOp::NotIn => "not in",
            CmpOp::Is => "is",
            CmpOp::IsNot => "is not",
            CmpOp::ExceptionMatch => "exception match",
        }
    }

    pub fn from_symbol(text: &str) -> Option<CmpOp> {
        CmpOp::ALL.iter().copied().find(|op| op.symbol() == text)
    }
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_u8_matches_repr() {
        for op in Opcode::ALL {
            assert_eq!(Opcode::from_u8(*op as u8), Some(*op));
        }
        assert_eq!(Opcode::from_u8(0), None);
        assert_eq!(Opcode::from_u8(255), None);
    }

    #[test]
    fn test_mnemonic_round_trip() {
        assert_eq!(Opcode::from_mnemonic("LOAD_CONST"), Some(Opcode::LoadConst));
        assert_eq!(Opcode::from_mnemonic("load_const"), None);
        assert_eq!(Opcode::SetupWith.to_string(), "SETUP_WITH");
    }

    #[test]
    fn test_argument_threshold_agrees_with_operand_kind() {
        for op in Opcode::ALL {
            assert_eq!(
                op.has_argument(),
                op.operand_kind() != OperandKind::None,
                "{}",
                op
            );
        }
    }

    #[test]
    fn test_label_kinds() {
        assert_eq!(Opcode::JumpForward.operand_kind(), OperandKind::RelLabel);
        assert_eq!(Opcode::JumpAbsolute.operand_kind(), OperandKind::AbsLabel);
        assert!(Opcode::SetupExcept.operand_kind().is_label());
        assert!(!Opcode::LoadFast.operand_kind().is_label());
    }

    #[test]
    fn test_argument_dependent_effects() {
        assert_eq!(Opcode::BuildTuple.stack_effect(3), -2);
        assert_eq!(Opcode::BuildTuple.stack_effect(0), 1);
        assert_eq!(Opcode::BuildMap.stack_effect(2), -3);
        assert_eq!(Opcode::UnpackSequence.stack_effect(3), 2);
        assert_eq!(Opcode::CallFunction.stack_effect(2), -2);
        assert_eq!(Opcode::RaiseVarargs.stack_effect(1), -1);
    }

    #[test]
    fn test_cmp_op_indices() {
        assert_eq!(CmpOp::Lt.index(), 0);
        assert_eq!(CmpOp::ExceptionMatch.index(), 10);
        assert_eq!(CmpOp::from_index(7), Some(CmpOp::NotIn));
        assert_eq!(CmpOp::from_index(11), None);
        assert_eq!(CmpOp::from_symbol("is not"), Some(CmpOp::IsNot));
    }
}
