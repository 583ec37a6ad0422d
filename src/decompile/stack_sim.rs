use std::collections::BTreeMap;

use crate::attribute_info::LocalVariableTable;
use crate::code_attribute::{Instruction, Label};
use crate::types::MethodBody;

use super::cfg_types::*;
use super::condition::Condition;
use super::error::StructureError;
use super::expr::*;

/// What a block's terminal leaves behind once its operands are popped.
#[derive(Clone, Debug, PartialEq)]
pub enum Branch {
    /// Condition under which the jump (the `target` edge) is taken.
    Condition(Condition),
    /// Selector of a switch.
    Switch(Expr),
}

/// A simulated basic block: the result of replaying one [`Block`].
#[derive(Clone, Debug)]
pub struct SimulatedBlock {
    pub id: BlockId,
    pub statements: Vec<Stmt>,
    /// Values pushed by this block and still on the stack at its end,
    /// bottom to top.
    pub exit_stack: Vec<Expr>,
    /// Number of values popped that were on the stack when the block was
    /// entered. They appear as `Expr::StackIn` in the results.
    pub consumed: usize,
    pub branch: Option<Branch>,
}

impl SimulatedBlock {
    pub fn branch_condition(&self) -> Option<&Condition> {
        match &self.branch {
            Some(Branch::Condition(condition)) => Some(condition),
            _ => None,
        }
    }
}

/// Replays instructions over an abstract operand stack. One per method;
/// it only reads the method's metadata.
pub struct Simulator<'a> {
    locals: &'a LocalVariableTable,
    labels: &'a BTreeMap<Label, usize>,
    is_static: bool,
}

impl<'a> Simulator<'a> {
    pub fn new(method: &'a MethodBody, labels: &'a BTreeMap<Label, usize>) -> Self {
        Self {
            locals: &method.local_variables,
            labels,
            is_static: method.is_static(),
        }
    }

    /// Create a LocalVar with optional name lookup.
    pub fn local(&self, slot: u16, at: usize) -> LocalVar {
        match self.locals.instance_at(slot, at, self.labels) {
            Some(item) => LocalVar {
                index: slot,
                name: Some(item.name.clone()),
                descriptor: Some(item.descriptor.clone()),
            },
            None => LocalVar::unnamed(slot),
        }
    }

    /// Simulate a single block, converting its instructions into statements,
    /// leftover stack values and the terminal's branch operands.
    pub fn simulate(&self, block: &Block) -> Result<SimulatedBlock, StructureError> {
        let mut state = StackState::default();

        for addressed in block.opcodes.iter().chain(block.last.iter()) {
            let index = addressed.index;
            let dup_height = state.dup_height.take();
            match &addressed.instruction {
                // ============================================================
                // Pseudo-instructions
                // ============================================================
                Instruction::Label(_) | Instruction::LineNumber(_) | Instruction::Nop => {}

                // ============================================================
                // Values and locals
                // ============================================================
                Instruction::Push(expr) => state.push(expr.clone()),
                Instruction::Load(slot) => {
                    if *slot == 0 && !self.is_static {
                        state.push(Expr::This);
                    } else {
                        state.push(Expr::LocalLoad(self.local(*slot, index)));
                    }
                }
                Instruction::Store(slot) => {
                    let stores_copy = dup_height == Some(state.stack.len());
                    let value = state.pop();
                    // load; dup; push 1; add; store is `i++` on a non-int local
                    if let Some(amount) = unit_step(&value, *slot) {
                        if state.fold_post_increment(*slot, amount, index) {
                            continue;
                        }
                    }
                    // Locals are often declared by the store itself, one past its scope start.
                    let var = self.local(*slot, index + 1);
                    if stores_copy {
                        // dup; store leaves a copy that now reads back from the local
                        let top = state.stack.len().saturating_sub(1);
                        state.spill_reads(*slot, index, top);
                        if let Some(copy) = state.stack.last_mut() {
                            *copy = Expr::LocalLoad(var.clone());
                        }
                    } else {
                        state.spill_reads(*slot, index, usize::MAX);
                    }
                    state.emit(Stmt::LocalStore { var, value });
                }
                Instruction::Iinc { index: slot, amount } => {
                    if (*amount == 1 || *amount == -1) && state.fold_post_increment(*slot, *amount, index) {
                        continue;
                    }
                    state.spill_reads(*slot, index, usize::MAX);
                    let var = self.local(*slot, index);
                    state.emit(Stmt::Iinc { var, amount: *amount });
                }

                // ============================================================
                // Arithmetic
                // ============================================================
                Instruction::Binary(op) => {
                    let right = state.pop();
                    let left = state.pop();
                    state.push(Expr::BinaryOp { op: *op, left: Box::new(left), right: Box::new(right) });
                }
                Instruction::Unary(op) => {
                    let operand = state.pop();
                    state.push(Expr::UnaryOp { op: *op, operand: Box::new(operand) });
                }
                Instruction::Compare(kind) => {
                    let right = state.pop();
                    let left = state.pop();
                    state.push(Expr::CmpResult { kind: *kind, left: Box::new(left), right: Box::new(right) });
                }
                Instruction::CheckCast(target_type) => {
                    let operand = state.pop();
                    state.push(Expr::Cast { target_type: target_type.clone(), operand: Box::new(operand) });
                }
                Instruction::InstanceOf(check_type) => {
                    let operand = state.pop();
                    state.push(Expr::Instanceof { operand: Box::new(operand), check_type: check_type.clone() });
                }

                // ============================================================
                // Fields, arrays and objects
                // ============================================================
                Instruction::GetField { class_name, field_name, is_static } => {
                    let object = if *is_static { None } else { Some(Box::new(state.pop())) };
                    state.push(Expr::FieldGet {
                        object,
                        class_name: class_name.clone(),
                        field_name: field_name.clone(),
                    });
                }
                Instruction::PutField { class_name, field_name, is_static } => {
                    let value = state.pop();
                    let object = if *is_static { None } else { Some(state.pop()) };
                    state.emit(Stmt::FieldStore {
                        object,
                        class_name: class_name.clone(),
                        field_name: field_name.clone(),
                        value,
                    });
                }
                Instruction::ArrayLoad => {
                    let idx = state.pop();
                    let array = state.pop();
                    state.push(Expr::ArrayLoad { array: Box::new(array), index: Box::new(idx) });
                }
                Instruction::ArrayStore => {
                    let value = state.pop();
                    let idx = state.pop();
                    let array = state.pop();
                    state.emit(Stmt::ArrayStore { array, index: idx, value });
                }
                Instruction::ArrayLength => {
                    let array = state.pop();
                    state.push(Expr::ArrayLength { array: Box::new(array) });
                }
                Instruction::New(class_name) => {
                    state.push(Expr::UninitNew { class_name: class_name.clone() });
                }
                Instruction::Invoke { kind, class_name, method_name, arg_count, returns_value } => {
                    let args = state.pop_args(*arg_count as usize);
                    let receiver = if *kind == InvokeKind::Static { None } else { Some(state.pop()) };
                    match receiver {
                        Some(Expr::UninitNew { class_name: created }) if method_name == "<init>" => {
                            let new_expr = Expr::New { class_name: created.clone(), args };
                            // new;dup;<init> leaves the original below the dup copy
                            if !state.replace_uninit_new(&created, &new_expr) {
                                state.emit(Stmt::ExprStmt(new_expr));
                            }
                        }
                        receiver => {
                            let call = Expr::MethodCall {
                                kind: *kind,
                                object: receiver.map(Box::new),
                                class_name: class_name.clone(),
                                method_name: method_name.clone(),
                                args,
                            };
                            if *returns_value {
                                state.push(call);
                            } else {
                                state.emit(Stmt::ExprStmt(call));
                            }
                        }
                    }
                }
                Instruction::Monitor { enter } => {
                    let object = state.pop();
                    state.emit(Stmt::Monitor { enter: *enter, object });
                }

                // ============================================================
                // Stack shuffling
                // ============================================================
                Instruction::Dup => {
                    let value = state.pop();
                    state.push(value.clone());
                    state.push(value);
                    state.dup_height = Some(state.stack.len());
                }
                Instruction::Pop => {
                    let value = state.pop();
                    if value.has_side_effects() {
                        state.emit(Stmt::ExprStmt(value));
                    }
                }
                Instruction::Swap => {
                    let top = state.pop();
                    let below = state.pop();
                    state.push(top);
                    state.push(below);
                }

                // ============================================================
                // Terminals
                // ============================================================
                Instruction::Goto(_) => {}
                Instruction::If { opcode, .. } => {
                    let simple = opcode.simple_condition();
                    let mut operands = Vec::with_capacity(simple.arity as usize);
                    for _ in 0..simple.arity {
                        operands.push(state.pop());
                    }
                    operands.reverse();
                    state.branch = Some(Branch::Condition(Condition::from_jump(simple, operands)));
                }
                Instruction::Switch { .. } => {
                    let selector = state.pop();
                    state.branch = Some(Branch::Switch(selector));
                }
                Instruction::Return => state.emit(Stmt::Return(None)),
                Instruction::ReturnValue => {
                    let value = state.pop();
                    state.emit(Stmt::Return(Some(value)));
                }
                Instruction::Throw => {
                    let value = state.pop();
                    state.emit(Stmt::Throw(value));
                }

                Instruction::Unsupported(name) => {
                    return Err(StructureError::unsupported(index, format!("`{}` is not structured", name)));
                }
            }
        }

        Ok(SimulatedBlock {
            id: block.id,
            statements: state.statements,
            exit_stack: state.stack,
            consumed: state.consumed,
            branch: state.branch,
        })
    }
}

#[derive(Default)]
struct StackState {
    stack: Vec<Expr>,
    statements: Vec<Stmt>,
    consumed: usize,
    branch: Option<Branch>,
    /// Stack height right after a `dup`, cleared by the next instruction.
    dup_height: Option<usize>,
}

impl StackState {
    fn push(&mut self, expr: Expr) {
        self.stack.push(expr);
    }

    /// Pop from the stack, or reach below the block's entry.
    fn pop(&mut self) -> Expr {
        match self.stack.pop() {
            Some(expr) => expr,
            None => {
                let depth = self.consumed as u16;
                self.consumed += 1;
                Expr::StackIn(depth)
            }
        }
    }

    /// Pop `n` arguments, returned left-to-right.
    fn pop_args(&mut self, n: usize) -> Vec<Expr> {
        let mut args: Vec<Expr> = (0..n).map(|_| self.pop()).collect();
        args.reverse();
        args
    }

    fn emit(&mut self, stmt: Stmt) {
        self.statements.push(stmt);
    }

    /// Pending values below `below` that read `slot` are moved into
    /// temporaries so a write at instruction `at` cannot change what they
    /// evaluate to.
    fn spill_reads(&mut self, slot: u16, at: usize, below: usize) {
        let mut spilled = 0;
        for k in 0..below.min(self.stack.len()) {
            if !self.stack[k].references_local(slot) {
                continue;
            }
            let temp = LocalVar::temporary(at, spilled);
            let value = std::mem::replace(&mut self.stack[k], Expr::LocalLoad(temp.clone()));
            self.statements.push(Stmt::LocalStore { var: temp, value });
            spilled += 1;
        }
    }

    /// Turn a pending plain read of `slot` on top of the stack into `slot++`
    /// (or `--`), spilling any other pending reads of it first.
    fn fold_post_increment(&mut self, slot: u16, amount: i32, at: usize) -> bool {
        let var = match self.stack.last() {
            Some(Expr::LocalLoad(var)) if var.index == slot => var.clone(),
            _ => return false,
        };
        let top = self.stack.len() - 1;
        self.spill_reads(slot, at, top);
        self.stack[top] = Expr::PostIncrement { var, amount };
        true
    }

    /// Replace the topmost uninitialized `new` of `class_name`.
    fn replace_uninit_new(&mut self, class_name: &str, replacement: &Expr) -> bool {
        for item in self.stack.iter_mut().rev() {
            if let Expr::UninitNew { class_name: cn } = item {
                if cn == class_name {
                    *item = replacement.clone();
                    return true;
                }
            }
        }
        false
    }
}

/// `slot + 1` or `slot - 1`, as the step it applies to `slot`.
fn unit_step(value: &Expr, slot: u16) -> Option<i32> {
    let (op, left, right) = match value {
        Expr::BinaryOp { op, left, right } => (op, left.as_ref(), right.as_ref()),
        _ => return None,
    };
    let reads_slot = matches!(left, Expr::LocalLoad(var) if var.index == slot);
    let is_one = matches!(right, Expr::IntLiteral(1) | Expr::LongLiteral(1));
    match op {
        BinOp::Add if reads_slot && is_one => Some(1),
        BinOp::Sub if reads_slot && is_one => Some(-1),
        _ => None,
    }
}

/// Stack profile of an instruction run from its stack effects alone:
/// (values needed from the entry stack, values left on top).
pub fn stack_profile<'i>(instrs: impl IntoIterator<Item = &'i Instruction>) -> (usize, usize) {
    let mut needed = 0;
    let mut height = 0;
    for instr in instrs {
        let (pops, pushes) = instr.stack_effect();
        if pops > height {
            needed += pops - height;
            height = 0;
        } else {
            height -= pops;
        }
        height += pushes;
    }
    (needed, height)
}
