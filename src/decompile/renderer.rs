use std::fmt::Write;

use super::condition::Condition;
use super::expr::*;
use super::structured_types::*;

/// Configuration for rendering a structured body as a Java-like listing.
#[derive(Clone, Debug)]
pub struct RenderConfig {
    pub indent: String,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self { indent: "    ".into() }
    }
}

/// Render a structured body, one statement per line.
pub fn render_body(body: &StructuredBody, config: &RenderConfig) -> String {
    let mut renderer = ListingRenderer::new(config.clone());
    for stmt in &body.statements {
        renderer.render_structured_stmt(stmt);
    }
    renderer.output
}

struct ListingRenderer {
    config: RenderConfig,
    output: String,
    indent_level: usize,
}

impl ListingRenderer {
    fn new(config: RenderConfig) -> Self {
        Self {
            config,
            output: String::new(),
            indent_level: 0,
        }
    }

    fn render_block(&mut self, stmts: &[StructuredStmt]) {
        self.indent_level += 1;
        for stmt in stmts {
            self.render_structured_stmt(stmt);
        }
        self.indent_level -= 1;
    }

    fn render_structured_stmt(&mut self, stmt: &StructuredStmt) {
        match stmt {
            StructuredStmt::Simple(s) => self.render_simple_stmt(s),
            StructuredStmt::If { condition, then_body, elifs, else_body } => {
                self.writeln(&format!("if ({}) {{", render_condition(condition)));
                self.render_block(then_body);
                for (condition, body) in elifs {
                    self.writeln(&format!("}} else if ({}) {{", render_condition(condition)));
                    self.render_block(body);
                }
                if let Some(body) = else_body {
                    self.writeln("} else {");
                    self.render_block(body);
                }
                self.writeln("}");
            }
            StructuredStmt::While { condition, body } => {
                self.writeln(&format!("while ({}) {{", render_condition(condition)));
                self.render_block(body);
                self.writeln("}");
            }
            StructuredStmt::DoWhile { body, condition } => {
                self.writeln("do {");
                self.render_block(body);
                self.writeln(&format!("}} while ({});", render_condition(condition)));
            }
            StructuredStmt::For { init, condition, update, body } => {
                self.writeln(&format!(
                    "for ({}; {}; {}) {{",
                    render_simple_inline(init),
                    render_condition(condition),
                    render_simple_inline(update)
                ));
                self.render_block(body);
                self.writeln("}");
            }
            StructuredStmt::Switch { selector, cases } => {
                self.writeln(&format!("switch ({}) {{", render_expr(selector)));
                self.indent_level += 1;
                for case in cases {
                    for value in &case.values {
                        self.writeln(&format!("case {}:", value));
                    }
                    if case.is_default {
                        self.writeln("default:");
                    }
                    self.indent_level += 1;
                    for stmt in &case.body {
                        self.render_structured_stmt(stmt);
                    }
                    if case.breaks {
                        self.writeln("break;");
                    }
                    self.indent_level -= 1;
                }
                self.indent_level -= 1;
                self.writeln("}");
            }
            StructuredStmt::TryCatch { try_body, catches } => {
                self.writeln("try {");
                self.render_block(try_body);
                for catch in catches {
                    let types = if catch.exception_types.is_empty() {
                        "Throwable".to_string()
                    } else {
                        catch
                            .exception_types
                            .iter()
                            .map(|t| simple_class_name(t))
                            .collect::<Vec<_>>()
                            .join(" | ")
                    };
                    let name = catch.var.as_ref().map_or_else(|| "e".to_string(), |v| v.display_name());
                    self.writeln(&format!("}} catch ({} {}) {{", types, name));
                    self.render_block(&catch.body);
                }
                self.writeln("}");
            }
            StructuredStmt::Break => self.writeln("break;"),
            StructuredStmt::Continue => self.writeln("continue;"),
        }
    }

    fn render_simple_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Return(None) => self.writeln("return;"),
            Stmt::Return(Some(expr)) => self.writeln(&format!("return {};", render_expr(expr))),
            Stmt::Throw(expr) => self.writeln(&format!("throw {};", render_expr(expr))),
            Stmt::Monitor { enter, object } => {
                let action = if *enter { "monitorenter" } else { "monitorexit" };
                self.writeln(&format!("// {} {}", action, render_expr(object)));
            }
            other => self.writeln(&format!("{};", render_simple_inline(other))),
        }
    }

    fn writeln(&mut self, text: &str) {
        for _ in 0..self.indent_level {
            self.output.push_str(&self.config.indent);
        }
        self.output.push_str(text);
        self.output.push('\n');
    }
}

fn render_simple_inline(stmt: &Stmt) -> String {
    match stmt {
        Stmt::LocalStore { var, value } => format!("{} = {}", var.display_name(), render_expr(value)),
        Stmt::FieldStore { object, class_name, field_name, value } => {
            let target = match object {
                Some(obj) => format!("{}.{}", render_expr(obj), field_name),
                None => format!("{}.{}", simple_class_name(class_name), field_name),
            };
            format!("{} = {}", target, render_expr(value))
        }
        Stmt::ArrayStore { array, index, value } => {
            format!("{}[{}] = {}", render_expr(array), render_expr(index), render_expr(value))
        }
        Stmt::ExprStmt(expr) => render_expr(expr),
        Stmt::Iinc { var, amount } => match *amount {
            1 => format!("{}++", var.display_name()),
            -1 => format!("{}--", var.display_name()),
            n if n < 0 => format!("{} -= {}", var.display_name(), -(n as i64)),
            n => format!("{} += {}", var.display_name(), n),
        },
        Stmt::Return(None) => "return".into(),
        Stmt::Return(Some(expr)) => format!("return {}", render_expr(expr)),
        Stmt::Throw(expr) => format!("throw {}", render_expr(expr)),
        Stmt::Monitor { enter, object } => {
            let action = if *enter { "monitorenter" } else { "monitorexit" };
            format!("/* {} */ {}", action, render_expr(object))
        }
    }
}

/// Render a condition in Java syntax.
pub fn render_condition(condition: &Condition) -> String {
    match condition {
        Condition::Compare { op, left, right } => {
            format!("{} {} {}", render_operand(left), op.as_str(), render_operand(right))
        }
        Condition::Test { operand, expected: true } => render_expr(operand),
        Condition::Test { operand, expected: false } => format!("!{}", render_operand(operand)),
        Condition::And(terms) => join_terms(terms, " && ", |t| matches!(t, Condition::Or(_))),
        Condition::Or(terms) => join_terms(terms, " || ", |_| false),
        Condition::Not(inner) => format!("!({})", render_condition(inner)),
        Condition::Const(value) => value.to_string(),
    }
}

fn join_terms(terms: &[Condition], sep: &str, needs_parens: impl Fn(&Condition) -> bool) -> String {
    terms
        .iter()
        .map(|t| {
            if needs_parens(t) {
                format!("({})", render_condition(t))
            } else {
                render_condition(t)
            }
        })
        .collect::<Vec<_>>()
        .join(sep)
}

pub fn render_expr(expr: &Expr) -> String {
    match expr {
        Expr::IntLiteral(v) => format!("{}", v),
        Expr::LongLiteral(v) => format!("{}L", v),
        Expr::FloatLiteral(v) => {
            if v.is_nan() {
                "Float.NaN".into()
            } else if v.is_infinite() {
                if *v > 0.0 { "Float.POSITIVE_INFINITY".into() } else { "Float.NEGATIVE_INFINITY".into() }
            } else {
                format!("{}f", v)
            }
        }
        Expr::DoubleLiteral(v) => {
            if v.is_nan() {
                "Double.NaN".into()
            } else if v.is_infinite() {
                if *v > 0.0 { "Double.POSITIVE_INFINITY".into() } else { "Double.NEGATIVE_INFINITY".into() }
            } else {
                format!("{}d", v)
            }
        }
        Expr::StringLiteral(s) => format!("\"{}\"", escape_java_string(s)),
        Expr::ClassLiteral(name) => format!("{}.class", simple_class_name(name)),
        Expr::NullLiteral => "null".into(),
        Expr::Opaque(text) => text.clone(),
        Expr::LocalLoad(var) => var.display_name(),
        Expr::This => "this".into(),
        Expr::PostIncrement { var, amount } => {
            let op = if *amount < 0 { "--" } else { "++" };
            format!("{}{}", var.display_name(), op)
        }
        Expr::BinaryOp { op, left, right } => {
            format!("{} {} {}", render_operand(left), op.as_str(), render_operand(right))
        }
        Expr::UnaryOp { op, operand } => {
            let op_str = match op {
                UnaryOp::Neg => "-",
                UnaryOp::Not => "~",
            };
            format!("{}{}", op_str, render_operand(operand))
        }
        Expr::Cast { target_type, operand } => {
            format!("({}){}", simple_class_name(target_type), render_operand(operand))
        }
        Expr::Instanceof { operand, check_type } => {
            format!("{} instanceof {}", render_operand(operand), simple_class_name(check_type))
        }
        Expr::FieldGet { object, class_name, field_name } => match object {
            Some(obj) => format!("{}.{}", render_operand(obj), field_name),
            None => format!("{}.{}", simple_class_name(class_name), field_name),
        },
        Expr::MethodCall { kind, object, class_name, method_name, args } => {
            let args = args.iter().map(render_expr).collect::<Vec<_>>().join(", ");
            match (kind, object) {
                (InvokeKind::Static, _) | (_, None) => {
                    format!("{}.{}({})", simple_class_name(class_name), method_name, args)
                }
                (_, Some(receiver)) => format!("{}.{}({})", render_operand(receiver), method_name, args),
            }
        }
        Expr::New { class_name, args } => {
            let args = args.iter().map(render_expr).collect::<Vec<_>>().join(", ");
            format!("new {}({})", simple_class_name(class_name), args)
        }
        Expr::ArrayLength { array } => format!("{}.length", render_operand(array)),
        Expr::ArrayLoad { array, index } => format!("{}[{}]", render_operand(array), render_expr(index)),
        Expr::Compare { op, left, right } => {
            format!("{} {} {}", render_operand(left), op.as_str(), render_operand(right))
        }
        Expr::CmpResult { left, right, .. } => {
            format!("/* cmp */ {} <=> {}", render_operand(left), render_operand(right))
        }
        Expr::Ternary { condition, then_expr, else_expr } => {
            format!(
                "{} ? {} : {}",
                render_condition(condition),
                render_operand(then_expr),
                render_operand(else_expr)
            )
        }
        Expr::StackIn(depth) => format!("/* stack[{}] */", depth),
        Expr::CaughtException => "/* exception */".into(),
        Expr::UninitNew { class_name } => format!("/* uninit */ new {}", simple_class_name(class_name)),
    }
}

/// Parenthesize compound operands.
fn render_operand(expr: &Expr) -> String {
    match expr {
        Expr::BinaryOp { .. } | Expr::Compare { .. } | Expr::Ternary { .. } | Expr::Instanceof { .. } => {
            format!("({})", render_expr(expr))
        }
        _ => render_expr(expr),
    }
}

fn simple_class_name(name: &str) -> &str {
    match name.rfind('/') {
        Some(pos) => &name[pos + 1..],
        None => name,
    }
}

fn escape_java_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\0' => out.push_str("\\0"),
            c if c.is_control() => {
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(slot: u16, name: &str) -> LocalVar {
        LocalVar { index: slot, name: Some(name.into()), descriptor: Some("I".into()) }
    }

    #[test]
    fn for_loop_renders_on_one_header_line() {
        let i = var(1, "i");
        let body = StructuredBody::new(vec![StructuredStmt::For {
            init: Stmt::LocalStore { var: i.clone(), value: Expr::IntLiteral(0) },
            condition: Condition::Compare {
                op: CompareOp::Lt,
                left: Expr::LocalLoad(i.clone()),
                right: Expr::IntLiteral(10),
            },
            update: Stmt::Iinc { var: i, amount: 1 },
            body: vec![StructuredStmt::Break],
        }]);
        let text = render_body(&body, &RenderConfig::default());
        assert_eq!(text, "for (i = 0; i < 10; i++) {\n    break;\n}\n");
    }

    #[test]
    fn mixed_connectives_get_parentheses() {
        let test = |slot: u16| Condition::Test { operand: Expr::LocalLoad(LocalVar::unnamed(slot)), expected: true };
        let condition = Condition::And(vec![test(0), Condition::Or(vec![test(1), test(2)])]);
        assert_eq!(render_condition(&condition), "var0 && (var1 || var2)");
    }

    #[test]
    fn strings_are_escaped() {
        assert_eq!(render_expr(&Expr::StringLiteral("a\"b\n".into())), "\"a\\\"b\\n\"");
    }
}
