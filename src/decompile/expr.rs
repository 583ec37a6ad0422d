use super::condition::Condition;

/// Binary operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinOp {
    Add, Sub, Mul, Div, Rem,
    Shl, Shr, Ushr,
    And, Or, Xor,
}

impl BinOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Rem => "%",
            BinOp::Shl => "<<",
            BinOp::Shr => ">>",
            BinOp::Ushr => ">>>",
            BinOp::And => "&",
            BinOp::Or => "|",
            BinOp::Xor => "^",
        }
    }
}

/// Unary operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not, // bitwise not
}

/// Comparison operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CompareOp {
    Eq, Ne, Lt, Ge, Gt, Le,
}

impl CompareOp {
    /// Returns the negated comparison.
    pub fn negate(self) -> Self {
        match self {
            CompareOp::Eq => CompareOp::Ne,
            CompareOp::Ne => CompareOp::Eq,
            CompareOp::Lt => CompareOp::Ge,
            CompareOp::Ge => CompareOp::Lt,
            CompareOp::Gt => CompareOp::Le,
            CompareOp::Le => CompareOp::Gt,
        }
    }

    /// Java source token for this operator.
    pub fn as_str(&self) -> &'static str {
        match self {
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Ge => ">=",
            CompareOp::Gt => ">",
            CompareOp::Le => "<=",
        }
    }
}

/// Method invocation kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InvokeKind {
    Virtual,
    Special,
    Static,
    Interface,
}

/// Compare instruction kinds (lcmp, fcmpl, ...).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CmpKind {
    LCmp,
    FCmpL,
    FCmpG,
    DCmpL,
    DCmpG,
}

/// Local variable reference. The name and descriptor come from the
/// local-variable table when one is available.
#[derive(Clone, Debug, PartialEq)]
pub struct LocalVar {
    pub index: u16,
    pub name: Option<String>,
    pub descriptor: Option<String>,
}

impl LocalVar {
    pub fn unnamed(index: u16) -> Self {
        Self { index, name: None, descriptor: None }
    }

    /// A synthesized local holding a value read before the write at
    /// instruction `at`.
    pub fn temporary(at: usize, n: usize) -> Self {
        let name = if n == 0 { format!("tmp{}", at) } else { format!("tmp{}_{}", at, n) };
        Self { index: u16::MAX, name: Some(name), descriptor: None }
    }

    pub fn display_name(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("var{}", self.index),
        }
    }
}

/// Expression tree node -- represents a value-producing computation.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    // --- Literals ---
    IntLiteral(i32),
    LongLiteral(i64),
    FloatLiteral(f32),
    DoubleLiteral(f64),
    StringLiteral(String),
    ClassLiteral(String),
    NullLiteral,

    /// An expression built outside this crate, carried through untouched.
    Opaque(String),

    // --- Variables ---
    LocalLoad(LocalVar),
    This,
    /// `var++` / `var--`: reads the local, then steps it.
    PostIncrement { var: LocalVar, amount: i32 },

    // --- Operations ---
    BinaryOp { op: BinOp, left: Box<Expr>, right: Box<Expr> },
    UnaryOp { op: UnaryOp, operand: Box<Expr> },
    Cast { target_type: String, operand: Box<Expr> },
    Instanceof { operand: Box<Expr>, check_type: String },

    // --- Field access ---
    FieldGet {
        object: Option<Box<Expr>>,
        class_name: String,
        field_name: String,
    },

    // --- Method invocation ---
    MethodCall {
        kind: InvokeKind,
        object: Option<Box<Expr>>,
        class_name: String,
        method_name: String,
        args: Vec<Expr>,
    },

    // --- Object creation ---
    New { class_name: String, args: Vec<Expr> },
    ArrayLength { array: Box<Expr> },
    ArrayLoad { array: Box<Expr>, index: Box<Expr> },

    // --- Comparison ---
    Compare { op: CompareOp, left: Box<Expr>, right: Box<Expr> },
    /// Result of lcmp/fcmpl/fcmpg/dcmpl/dcmpg: -1, 0, or 1
    CmpResult { kind: CmpKind, left: Box<Expr>, right: Box<Expr> },

    // --- Ternary (synthesized during structuring) ---
    Ternary { condition: Box<Condition>, then_expr: Box<Expr>, else_expr: Box<Expr> },

    // --- Stack bookkeeping (used during simulation, resolved during assembly) ---
    /// Value that was already on the operand stack when the block was entered.
    /// `StackIn(0)` is the top of the entry stack.
    StackIn(u16),
    /// The exception object pushed on entry to a handler block.
    CaughtException,
    /// Marker for an uninitialized `new` before <init> is called
    UninitNew { class_name: String },
}

impl Expr {
    /// Whether evaluating this expression may have a visible effect.
    pub fn has_side_effects(&self) -> bool {
        match self {
            Expr::MethodCall { .. } | Expr::New { .. } | Expr::PostIncrement { .. } => true,
            Expr::BinaryOp { left, right, .. }
            | Expr::Compare { left, right, .. }
            | Expr::CmpResult { left, right, .. } => {
                left.has_side_effects() || right.has_side_effects()
            }
            Expr::UnaryOp { operand, .. }
            | Expr::Cast { operand, .. }
            | Expr::Instanceof { operand, .. } => operand.has_side_effects(),
            Expr::FieldGet { object, .. } => object.as_ref().map_or(false, |o| o.has_side_effects()),
            Expr::ArrayLength { array } => array.has_side_effects(),
            Expr::ArrayLoad { array, index } => array.has_side_effects() || index.has_side_effects(),
            Expr::Ternary { condition, then_expr, else_expr } => {
                condition.has_side_effects()
                    || then_expr.has_side_effects()
                    || else_expr.has_side_effects()
            }
            _ => false,
        }
    }

    /// Whether this expression reads the local in `slot`.
    pub fn references_local(&self, slot: u16) -> bool {
        let mut found = false;
        self.walk(&mut |e| match e {
            Expr::LocalLoad(var) | Expr::PostIncrement { var, .. } => found |= var.index == slot,
            _ => {}
        });
        found
    }

    /// Replace `StackIn` placeholders with the values the block was entered
    /// with. `incoming` is ordered bottom to top.
    pub fn bind_stack_inputs(&mut self, incoming: &[Expr]) {
        if let Expr::StackIn(depth) = self {
            let depth = *depth as usize;
            if depth < incoming.len() {
                *self = incoming[incoming.len() - 1 - depth].clone();
            }
            return;
        }
        self.for_each_child_mut(&mut |child| child.bind_stack_inputs(incoming));
    }

    fn walk(&self, f: &mut dyn FnMut(&Expr)) {
        f(self);
        match self {
            Expr::BinaryOp { left, right, .. }
            | Expr::Compare { left, right, .. }
            | Expr::CmpResult { left, right, .. } => {
                left.walk(f);
                right.walk(f);
            }
            Expr::UnaryOp { operand, .. }
            | Expr::Cast { operand, .. }
            | Expr::Instanceof { operand, .. } => operand.walk(f),
            Expr::FieldGet { object: Some(object), .. } => object.walk(f),
            Expr::MethodCall { object, args, .. } => {
                if let Some(object) = object {
                    object.walk(f);
                }
                for arg in args {
                    arg.walk(f);
                }
            }
            Expr::New { args, .. } => {
                for arg in args {
                    arg.walk(f);
                }
            }
            Expr::ArrayLength { array } => array.walk(f),
            Expr::ArrayLoad { array, index } => {
                array.walk(f);
                index.walk(f);
            }
            Expr::Ternary { condition, then_expr, else_expr } => {
                condition.for_each_expr(&mut |e| e.walk(f));
                then_expr.walk(f);
                else_expr.walk(f);
            }
            _ => {}
        }
    }

    fn for_each_child_mut(&mut self, f: &mut dyn FnMut(&mut Expr)) {
        match self {
            Expr::BinaryOp { left, right, .. }
            | Expr::Compare { left, right, .. }
            | Expr::CmpResult { left, right, .. } => {
                f(left);
                f(right);
            }
            Expr::UnaryOp { operand, .. }
            | Expr::Cast { operand, .. }
            | Expr::Instanceof { operand, .. } => f(operand),
            Expr::FieldGet { object: Some(object), .. } => f(object),
            Expr::MethodCall { object, args, .. } => {
                if let Some(object) = object {
                    f(object);
                }
                args.iter_mut().for_each(|a| f(a));
            }
            Expr::New { args, .. } => args.iter_mut().for_each(|a| f(a)),
            Expr::ArrayLength { array } => f(array),
            Expr::ArrayLoad { array, index } => {
                f(array);
                f(index);
            }
            Expr::Ternary { condition, then_expr, else_expr } => {
                condition.for_each_expr_mut(&mut |e| f(e));
                f(then_expr);
                f(else_expr);
            }
            _ => {}
        }
    }
}

/// Statement -- represents a side-effecting operation.
#[derive(Clone, Debug, PartialEq)]
pub enum Stmt {
    LocalStore { var: LocalVar, value: Expr },
    FieldStore {
        object: Option<Expr>,
        class_name: String,
        field_name: String,
        value: Expr,
    },
    ArrayStore { array: Expr, index: Expr, value: Expr },
    ExprStmt(Expr),
    Iinc { var: LocalVar, amount: i32 },
    Return(Option<Expr>),
    Throw(Expr),
    Monitor { enter: bool, object: Expr },
}

impl Stmt {
    pub fn bind_stack_inputs(&mut self, incoming: &[Expr]) {
        match self {
            Stmt::LocalStore { value, .. } => value.bind_stack_inputs(incoming),
            Stmt::FieldStore { object, value, .. } => {
                if let Some(object) = object {
                    object.bind_stack_inputs(incoming);
                }
                value.bind_stack_inputs(incoming);
            }
            Stmt::ArrayStore { array, index, value } => {
                array.bind_stack_inputs(incoming);
                index.bind_stack_inputs(incoming);
                value.bind_stack_inputs(incoming);
            }
            Stmt::ExprStmt(expr) | Stmt::Throw(expr) | Stmt::Return(Some(expr)) => {
                expr.bind_stack_inputs(incoming)
            }
            Stmt::Monitor { object, .. } => object.bind_stack_inputs(incoming),
            Stmt::Iinc { .. } | Stmt::Return(None) => {}
        }
    }

    /// If this statement steps `slot` by a constant (`i++`, `i += k`,
    /// `i = i - k`), return the local it steps.
    pub fn increments_local(&self) -> Option<u16> {
        match self {
            Stmt::Iinc { var, .. } => Some(var.index),
            Stmt::LocalStore { var, value: Expr::BinaryOp { op: BinOp::Add | BinOp::Sub, left, .. } } => {
                match left.as_ref() {
                    Expr::LocalLoad(read) if read.index == var.index => Some(var.index),
                    _ => None,
                }
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binding_replaces_placeholders_from_the_top() {
        let mut expr = Expr::BinaryOp {
            op: BinOp::Add,
            left: Box::new(Expr::StackIn(1)),
            right: Box::new(Expr::StackIn(0)),
        };
        expr.bind_stack_inputs(&[Expr::IntLiteral(1), Expr::IntLiteral(2)]);
        assert_eq!(
            expr,
            Expr::BinaryOp {
                op: BinOp::Add,
                left: Box::new(Expr::IntLiteral(1)),
                right: Box::new(Expr::IntLiteral(2)),
            }
        );
    }

    #[test]
    fn increments_recognize_iinc_and_self_add() {
        let i = LocalVar::unnamed(3);
        assert_eq!(Stmt::Iinc { var: i.clone(), amount: 1 }.increments_local(), Some(3));
        let add = Stmt::LocalStore {
            var: i.clone(),
            value: Expr::BinaryOp {
                op: BinOp::Add,
                left: Box::new(Expr::LocalLoad(i.clone())),
                right: Box::new(Expr::IntLiteral(2)),
            },
        };
        assert_eq!(add.increments_local(), Some(3));
        let unrelated = Stmt::LocalStore { var: i, value: Expr::IntLiteral(0) };
        assert_eq!(unrelated.increments_local(), None);
    }
}
