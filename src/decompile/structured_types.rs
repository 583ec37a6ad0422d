use super::cfg_types::Block;
use super::condition::{Condition, Guard};
use super::expr::{Expr, LocalVar, Stmt};

/// A region of the block graph after it was recognized. Regions nest:
/// bodies are sequences of sections, and a section may stand for many
/// original blocks.
#[derive(Clone, Debug)]
pub enum BlockSection {
    /// A plain block whose statements are emitted in place.
    Inline(Block),
    /// if / else if / else
    If {
        guard: Guard,
        body: Vec<BlockSection>,
        elifs: Vec<(Guard, Vec<BlockSection>)>,
        else_body: Option<Vec<BlockSection>>,
    },
    /// Top-tested loop.
    While { guard: Guard, body: Vec<BlockSection> },
    /// Bottom-tested loop.
    DoWhile { guard: Guard, body: Vec<BlockSection> },
    /// `selector` is the block ending in the switch instruction.
    Switch { selector: Block, cases: Vec<Case> },
    TryCatch { body: Vec<BlockSection>, catches: Vec<Catch> },
    /// Conditional expression; both arms leave exactly one value.
    Ternary {
        guard: Guard,
        true_sections: Vec<BlockSection>,
        false_sections: Vec<BlockSection>,
    },
    Break,
    Continue,
}

impl BlockSection {
    pub fn kind_name(&self) -> &'static str {
        match self {
            BlockSection::Inline(_) => "inline",
            BlockSection::If { .. } => "if",
            BlockSection::While { .. } => "while",
            BlockSection::DoWhile { .. } => "do-while",
            BlockSection::Switch { .. } => "switch",
            BlockSection::TryCatch { .. } => "try-catch",
            BlockSection::Ternary { .. } => "ternary",
            BlockSection::Break => "break",
            BlockSection::Continue => "continue",
        }
    }
}

/// A switch arm before statement assembly.
#[derive(Clone, Debug)]
pub struct Case {
    pub keys: Vec<i32>,
    pub is_default: bool,
    pub body: Vec<BlockSection>,
    /// The arm ends in a jump to the merge point.
    pub breaks: bool,
    /// The arm runs into the next one.
    pub falls_through: bool,
}

/// A handler of a try region before statement assembly.
#[derive(Clone, Debug)]
pub struct Catch {
    /// Internal class names; empty for a catch-all.
    pub exception_types: Vec<String>,
    pub local: Option<LocalVar>,
    pub body: Vec<BlockSection>,
}

/// A structured statement, the result of control flow structuring.
#[derive(Clone, Debug, PartialEq)]
pub enum StructuredStmt {
    /// A simple statement (from stack simulation).
    Simple(Stmt),
    If {
        condition: Condition,
        then_body: Vec<StructuredStmt>,
        elifs: Vec<(Condition, Vec<StructuredStmt>)>,
        else_body: Option<Vec<StructuredStmt>>,
    },
    While {
        condition: Condition,
        body: Vec<StructuredStmt>,
    },
    DoWhile {
        body: Vec<StructuredStmt>,
        condition: Condition,
    },
    For {
        init: Stmt,
        condition: Condition,
        update: Stmt,
        body: Vec<StructuredStmt>,
    },
    Switch {
        selector: Expr,
        cases: Vec<SwitchCase>,
    },
    TryCatch {
        try_body: Vec<StructuredStmt>,
        catches: Vec<CatchClause>,
    },
    Break,
    Continue,
}

/// A switch case arm.
#[derive(Clone, Debug, PartialEq)]
pub struct SwitchCase {
    pub values: Vec<i32>,
    pub is_default: bool,
    pub body: Vec<StructuredStmt>,
    pub breaks: bool,
    pub falls_through: bool,
}

/// A catch clause in a try-catch.
#[derive(Clone, Debug, PartialEq)]
pub struct CatchClause {
    /// Internal class names; empty means catch-all.
    pub exception_types: Vec<String>,
    pub var: Option<LocalVar>,
    pub body: Vec<StructuredStmt>,
}

/// A structured method body: the sequence of structured statements.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StructuredBody {
    pub statements: Vec<StructuredStmt>,
}

impl StructuredBody {
    pub fn new(statements: Vec<StructuredStmt>) -> Self {
        Self { statements }
    }

    /// Statements at every nesting level, depth first.
    pub fn walk(&self, f: &mut dyn FnMut(&StructuredStmt)) {
        walk_stmts(&self.statements, f);
    }
}

fn walk_stmts(stmts: &[StructuredStmt], f: &mut dyn FnMut(&StructuredStmt)) {
    for stmt in stmts {
        f(stmt);
        match stmt {
            StructuredStmt::If { then_body, elifs, else_body, .. } => {
                walk_stmts(then_body, f);
                for (_, body) in elifs {
                    walk_stmts(body, f);
                }
                if let Some(body) = else_body {
                    walk_stmts(body, f);
                }
            }
            StructuredStmt::While { body, .. }
            | StructuredStmt::DoWhile { body, .. }
            | StructuredStmt::For { body, .. } => walk_stmts(body, f),
            StructuredStmt::Switch { cases, .. } => {
                for case in cases {
                    walk_stmts(&case.body, f);
                }
            }
            StructuredStmt::TryCatch { try_body, catches } => {
                walk_stmts(try_body, f);
                for catch in catches {
                    walk_stmts(&catch.body, f);
                }
            }
            StructuredStmt::Simple(_) | StructuredStmt::Break | StructuredStmt::Continue => {}
        }
    }
}
