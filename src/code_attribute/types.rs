use crate::decompile::expr::{BinOp, CmpKind, CompareOp, Expr, InvokeKind, UnaryOp};

/// A jump label. Labels are placed in the instruction stream as
/// [`Instruction::Label`] pseudo-instructions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Label(pub u32);

/// The conditional jump opcodes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum JumpOpcode {
    Ifeq = 0,
    Ifne,
    Iflt,
    Ifge,
    Ifgt,
    Ifle,
    IfIcmpeq,
    IfIcmpne,
    IfIcmplt,
    IfIcmpge,
    IfIcmpgt,
    IfIcmple,
    IfAcmpeq,
    IfAcmpne,
    Ifnull,
    Ifnonnull,
}

/// What a conditional jump tests, read off its opcode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SimpleCondition {
    /// Number of operands popped (1 for zero/null tests, 2 for compares).
    pub arity: u8,
    pub op: CompareOp,
    /// Single-operand test against `null` rather than zero.
    pub null_test: bool,
}

const fn zero_test(op: CompareOp) -> SimpleCondition {
    SimpleCondition { arity: 1, op, null_test: false }
}

const fn compare(op: CompareOp) -> SimpleCondition {
    SimpleCondition { arity: 2, op, null_test: false }
}

const fn null_test(op: CompareOp) -> SimpleCondition {
    SimpleCondition { arity: 1, op, null_test: true }
}

/// Indexed by `JumpOpcode as usize`.
const JUMP_CONDITIONS: [SimpleCondition; 16] = [
    zero_test(CompareOp::Eq),
    zero_test(CompareOp::Ne),
    zero_test(CompareOp::Lt),
    zero_test(CompareOp::Ge),
    zero_test(CompareOp::Gt),
    zero_test(CompareOp::Le),
    compare(CompareOp::Eq),
    compare(CompareOp::Ne),
    compare(CompareOp::Lt),
    compare(CompareOp::Ge),
    compare(CompareOp::Gt),
    compare(CompareOp::Le),
    compare(CompareOp::Eq),
    compare(CompareOp::Ne),
    null_test(CompareOp::Eq),
    null_test(CompareOp::Ne),
];

impl JumpOpcode {
    /// The condition under which this jump is taken.
    pub const fn simple_condition(self) -> SimpleCondition {
        JUMP_CONDITIONS[self as usize]
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            JumpOpcode::Ifeq => "ifeq",
            JumpOpcode::Ifne => "ifne",
            JumpOpcode::Iflt => "iflt",
            JumpOpcode::Ifge => "ifge",
            JumpOpcode::Ifgt => "ifgt",
            JumpOpcode::Ifle => "ifle",
            JumpOpcode::IfIcmpeq => "if_icmpeq",
            JumpOpcode::IfIcmpne => "if_icmpne",
            JumpOpcode::IfIcmplt => "if_icmplt",
            JumpOpcode::IfIcmpge => "if_icmpge",
            JumpOpcode::IfIcmpgt => "if_icmpgt",
            JumpOpcode::IfIcmple => "if_icmple",
            JumpOpcode::IfAcmpeq => "if_acmpeq",
            JumpOpcode::IfAcmpne => "if_acmpne",
            JumpOpcode::Ifnull => "ifnull",
            JumpOpcode::Ifnonnull => "ifnonnull",
        }
    }
}

/// A decoded instruction. Constant-pool references are already resolved to
/// names, and anything whose value the structurer does not need to look
/// inside arrives as [`Instruction::Push`] carrying a prebuilt expression.
#[derive(Clone, Debug, PartialEq)]
pub enum Instruction {
    // Pseudo-instructions
    Label(Label),
    LineNumber(u32),
    Nop,

    // Values and locals
    Push(Expr),
    Load(u16),
    Store(u16),
    Iinc { index: u16, amount: i32 },

    // Arithmetic
    Binary(BinOp),
    Unary(UnaryOp),
    Compare(CmpKind),
    CheckCast(String),
    InstanceOf(String),

    // Fields, arrays and objects
    GetField { class_name: String, field_name: String, is_static: bool },
    PutField { class_name: String, field_name: String, is_static: bool },
    ArrayLoad,
    ArrayStore,
    ArrayLength,
    New(String),
    Invoke {
        kind: InvokeKind,
        class_name: String,
        method_name: String,
        arg_count: u8,
        returns_value: bool,
    },
    Monitor { enter: bool },

    // Stack shuffling
    Dup,
    Pop,
    Swap,

    // Terminals
    Goto(Label),
    If { opcode: JumpOpcode, target: Label },
    Switch { pairs: Vec<(i32, Label)>, default: Label },
    Return,
    ReturnValue,
    Throw,

    /// A construct the structurer refuses (invokedynamic, multianewarray, jsr, ...).
    Unsupported(String),
}

impl Instruction {
    /// Jumps, switches, returns and throws end a basic block.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Instruction::Goto(_)
                | Instruction::If { .. }
                | Instruction::Switch { .. }
                | Instruction::Return
                | Instruction::ReturnValue
                | Instruction::Throw
        )
    }

    /// Labels, line numbers and `nop` carry no logic.
    pub fn is_pseudo(&self) -> bool {
        matches!(self, Instruction::Label(_) | Instruction::LineNumber(_) | Instruction::Nop)
    }

    /// Labels this instruction may transfer control to.
    pub fn jump_targets(&self) -> Vec<Label> {
        match self {
            Instruction::Goto(target) | Instruction::If { target, .. } => vec![*target],
            Instruction::Switch { pairs, default } => {
                let mut targets: Vec<Label> = pairs.iter().map(|(_, l)| *l).collect();
                targets.push(*default);
                targets
            }
            _ => vec![],
        }
    }

    /// Operand stack effect as (pops, pushes).
    pub fn stack_effect(&self) -> (usize, usize) {
        match self {
            Instruction::Label(_)
            | Instruction::LineNumber(_)
            | Instruction::Nop
            | Instruction::Iinc { .. }
            | Instruction::Goto(_)
            | Instruction::Return
            | Instruction::Unsupported(_) => (0, 0),
            Instruction::Push(_) | Instruction::Load(_) | Instruction::New(_) => (0, 1),
            Instruction::Store(_) => (1, 0),
            Instruction::Binary(_) | Instruction::Compare(_) => (2, 1),
            Instruction::Unary(_)
            | Instruction::CheckCast(_)
            | Instruction::InstanceOf(_)
            | Instruction::ArrayLength => (1, 1),
            Instruction::GetField { is_static, .. } => (if *is_static { 0 } else { 1 }, 1),
            Instruction::PutField { is_static, .. } => (if *is_static { 1 } else { 2 }, 0),
            Instruction::ArrayLoad => (2, 1),
            Instruction::ArrayStore => (3, 0),
            Instruction::Invoke { kind, arg_count, returns_value, .. } => {
                let receiver = if *kind == InvokeKind::Static { 0 } else { 1 };
                (*arg_count as usize + receiver, *returns_value as usize)
            }
            Instruction::Monitor { .. } => (1, 0),
            Instruction::Dup => (1, 2),
            Instruction::Pop => (1, 0),
            Instruction::Swap => (2, 2),
            Instruction::If { opcode, .. } => (opcode.simple_condition().arity as usize, 0),
            Instruction::Switch { .. } | Instruction::ReturnValue | Instruction::Throw => (1, 0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jump_table_matches_opcode_order() {
        assert_eq!(JumpOpcode::Ifeq.simple_condition(), zero_test(CompareOp::Eq));
        assert_eq!(JumpOpcode::IfIcmpge.simple_condition().arity, 2);
        assert_eq!(JumpOpcode::IfIcmpge.simple_condition().op, CompareOp::Ge);
        assert_eq!(JumpOpcode::IfAcmpne.simple_condition().op, CompareOp::Ne);
        assert!(JumpOpcode::Ifnonnull.simple_condition().null_test);
        assert_eq!(JumpOpcode::Ifnonnull.simple_condition().op, CompareOp::Ne);
    }

    #[test]
    fn invoke_stack_effect_counts_receiver() {
        let call = Instruction::Invoke {
            kind: InvokeKind::Virtual,
            class_name: "java/io/PrintStream".into(),
            method_name: "println".into(),
            arg_count: 1,
            returns_value: false,
        };
        assert_eq!(call.stack_effect(), (2, 0));
        assert!(!call.is_terminal());
        assert!(Instruction::Throw.is_terminal());
    }
}
