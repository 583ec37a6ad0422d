use classfile_structurer::attribute_info::{ExceptionEntry, LocalVariable, LocalVariableTable};
use classfile_structurer::code_attribute::{Instruction, JumpOpcode, Label};
use classfile_structurer::decompile::cfg;
use classfile_structurer::decompile::cfg_types::BlockKind;
use classfile_structurer::decompile::cleanup;
use classfile_structurer::decompile::condition::Condition;
use classfile_structurer::decompile::expr::{CompareOp, Expr, InvokeKind, LocalVar, Stmt};
use classfile_structurer::decompile::stack_sim::Simulator;
use classfile_structurer::decompile::structuring::RegionDecomposer;
use classfile_structurer::decompile::ternary;
use classfile_structurer::decompile::{
    render_body, BlockSection, DecompileError, RenderConfig, StructureError, StructureOptions, StructuredStmt,
    Structurer,
};
use classfile_structurer::MethodBody;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn call(name: &str) -> Instruction {
    Instruction::Invoke {
        kind: InvokeKind::Static,
        class_name: "A".into(),
        method_name: name.into(),
        arg_count: 0,
        returns_value: false,
    }
}

fn push(value: i32) -> Instruction {
    Instruction::Push(Expr::IntLiteral(value))
}

fn jump(opcode: JumpOpcode, target: u32) -> Instruction {
    Instruction::If { opcode, target: Label(target) }
}

fn label(n: u32) -> Instruction {
    Instruction::Label(Label(n))
}

fn render_with(options: StructureOptions, method: &MethodBody) -> String {
    init_logging();
    let structured = Structurer::new(options)
        .structure_method(method)
        .unwrap_or_else(|e| panic!("structuring {} failed: {}", method.name, e));
    render_body(&structured.body, &RenderConfig::default())
}

fn render(method: &MethodBody) -> String {
    render_with(StructureOptions::default(), method)
}

fn var(slot: u16) -> Expr {
    Expr::LocalLoad(LocalVar::unnamed(slot))
}

/// `var1 = 0; while (var1 < 10) { A.foo(); <step> }`, compiled the javac way.
fn counting_loop(step: Instruction) -> MethodBody {
    MethodBody::new(
        "count",
        "()V",
        vec![
            push(0),
            Instruction::Store(1),
            Instruction::Goto(Label(1)),
            label(0),
            call("foo"),
            step,
            label(1),
            Instruction::Load(1),
            push(10),
            jump(JumpOpcode::IfIcmplt, 0),
            Instruction::Return,
        ],
    )
}

// ---- Phase 1: Straight-line code tests ----

#[test]
fn test_single_block_decomposes_to_itself() {
    let method = MethodBody::new("m", "()V", vec![call("foo"), Instruction::Return]);
    let labels = method.label_positions();
    let sim = Simulator::new(&method, &labels);
    let mut graph = cfg::build_graph(&method).unwrap();
    let before = graph.blocks().next().cloned().unwrap();
    let sections = RegionDecomposer::new(&mut graph, &sim, &method.local_variables, &StructureOptions::default())
        .decompose()
        .unwrap();
    assert_eq!(sections.len(), 1);
    match &sections[0] {
        BlockSection::Inline(block) => {
            assert_eq!(block.id, before.id);
            assert_eq!(block.opcodes, before.opcodes);
            assert_eq!(block.last, before.last);
        }
        other => panic!("expected inline block, got {:?}", other),
    }
    assert!(graph.is_empty());
}

#[test]
fn test_straight_line_renders_in_order() {
    let method = MethodBody::new("m", "()V", vec![call("foo"), call("bar"), Instruction::Return]);
    assert_eq!(render(&method), "A.foo();\nA.bar();\nreturn;\n");
}

#[test]
fn test_read_before_increment_is_post_increment() {
    let method = MethodBody::new(
        "m",
        "()V",
        vec![Instruction::Load(1), Instruction::Iinc { index: 1, amount: 1 }, Instruction::Store(2), Instruction::Return],
    );
    assert_eq!(render(&method), "var2 = var1++;\nreturn;\n");
}

#[test]
fn test_post_increment_as_call_argument() {
    let method = MethodBody::new(
        "m",
        "()V",
        vec![
            Instruction::Load(1),
            Instruction::Iinc { index: 1, amount: 1 },
            Instruction::Invoke {
                kind: InvokeKind::Static,
                class_name: "A".into(),
                method_name: "foo".into(),
                arg_count: 1,
                returns_value: false,
            },
            Instruction::Return,
        ],
    );
    assert_eq!(render(&method), "A.foo(var1++);\nreturn;\n");
}

#[test]
fn test_read_before_large_step_goes_through_temporary() {
    let method = MethodBody::new(
        "m",
        "()V",
        vec![Instruction::Load(1), Instruction::Iinc { index: 1, amount: 3 }, Instruction::Store(2), Instruction::Return],
    );
    assert_eq!(render(&method), "tmp1 = var1;\nvar1 += 3;\nvar2 = tmp1;\nreturn;\n");
}

// ---- Phase 2: Conditional tests ----

#[test]
fn test_if_body_ending_in_jump_to_merge_has_no_else() {
    let method = MethodBody::new(
        "m",
        "(Z)V",
        vec![
            Instruction::Load(0),
            jump(JumpOpcode::Ifeq, 1),
            Instruction::Iinc { index: 1, amount: 1 },
            Instruction::Goto(Label(1)),
            label(1),
            Instruction::Return,
        ],
    );
    assert_eq!(render(&method), "if (var0) {\n    var1++;\n}\nreturn;\n");
}

#[test]
fn test_if_else_assigns_on_both_paths() {
    let method = MethodBody::new(
        "m",
        "(Z)V",
        vec![
            Instruction::Load(0),
            jump(JumpOpcode::Ifeq, 1),
            push(1),
            Instruction::Store(1),
            Instruction::Goto(Label(2)),
            label(1),
            push(2),
            Instruction::Store(1),
            label(2),
            Instruction::Return,
        ],
    );
    assert_eq!(
        render(&method),
        "if (var0) {\n    var1 = 1;\n} else {\n    var1 = 2;\n}\nreturn;\n"
    );
}

fn else_if_method() -> MethodBody {
    MethodBody::new(
        "m",
        "(ZZ)V",
        vec![
            Instruction::Load(0),
            jump(JumpOpcode::Ifeq, 1),
            push(1),
            Instruction::Store(2),
            Instruction::Goto(Label(9)),
            label(1),
            Instruction::Load(1),
            jump(JumpOpcode::Ifeq, 2),
            push(2),
            Instruction::Store(2),
            Instruction::Goto(Label(9)),
            label(2),
            push(3),
            Instruction::Store(2),
            label(9),
            Instruction::Return,
        ],
    )
}

#[test]
fn test_nested_else_if_is_flattened() {
    assert_eq!(
        render(&else_if_method()),
        "if (var0) {\n    var2 = 1;\n} else if (var1) {\n    var2 = 2;\n} else {\n    var2 = 3;\n}\nreturn;\n"
    );
}

#[test]
fn test_else_if_collapse_can_be_disabled() {
    let options = StructureOptions { collapse_else_if: false, ..StructureOptions::default() };
    let structured = Structurer::new(options).structure_method(&else_if_method()).unwrap();
    match &structured.body.statements[0] {
        StructuredStmt::If { elifs, else_body: Some(else_body), .. } => {
            assert!(elifs.is_empty());
            assert!(matches!(else_body.as_slice(), [StructuredStmt::If { .. }]));
        }
        other => panic!("expected if/else, got {:?}", other),
    }
}

#[test]
fn test_and_chain_becomes_one_condition() {
    let method = MethodBody::new(
        "m",
        "(ZZ)V",
        vec![
            Instruction::Load(0),
            jump(JumpOpcode::Ifeq, 1),
            Instruction::Load(1),
            jump(JumpOpcode::Ifeq, 1),
            call("foo"),
            label(1),
            Instruction::Return,
        ],
    );
    assert_eq!(render(&method), "if (var0 && var1) {\n    A.foo();\n}\nreturn;\n");
}

#[test]
fn test_or_chain_becomes_one_condition() {
    let method = MethodBody::new(
        "m",
        "(ZZ)V",
        vec![
            Instruction::Load(0),
            jump(JumpOpcode::Ifne, 2),
            Instruction::Load(1),
            jump(JumpOpcode::Ifeq, 1),
            label(2),
            call("foo"),
            label(1),
            Instruction::Return,
        ],
    );
    assert_eq!(render(&method), "if (var0 || var1) {\n    A.foo();\n}\nreturn;\n");
}

// ---- Phase 3: Loop tests ----

#[test]
fn test_two_block_loop_is_do_while() {
    let method = MethodBody::new(
        "m",
        "()V",
        vec![
            label(0),
            Instruction::Iinc { index: 1, amount: 1 },
            Instruction::Goto(Label(1)),
            label(1),
            Instruction::Load(1),
            push(10),
            jump(JumpOpcode::IfIcmplt, 0),
            Instruction::Return,
        ],
    );
    let structured = Structurer::default().structure_method(&method).unwrap();
    let expected_condition = Condition::Compare { op: CompareOp::Lt, left: var(1), right: Expr::IntLiteral(10) };
    match &structured.body.statements[0] {
        StructuredStmt::DoWhile { body, condition } => {
            assert_eq!(condition, &expected_condition);
            assert_eq!(
                body,
                &vec![StructuredStmt::Simple(Stmt::Iinc { var: LocalVar::unnamed(1), amount: 1 })]
            );
        }
        other => panic!("expected do-while, got {:?}", other),
    }
    assert_eq!(render(&method), "do {\n    var1++;\n} while (var1 < 10);\nreturn;\n");
}

#[test]
fn test_counting_while_is_rewritten_as_for() {
    assert_eq!(
        render(&counting_loop(Instruction::Iinc { index: 1, amount: 1 })),
        "for (var1 = 0; var1 < 10; var1++) {\n    A.foo();\n}\nreturn;\n"
    );
}

#[test]
fn test_for_rewrite_can_be_disabled() {
    let options = StructureOptions { rewrite_for_loops: false, ..StructureOptions::default() };
    assert_eq!(
        render_with(options, &counting_loop(Instruction::Iinc { index: 1, amount: 1 })),
        "var1 = 0;\nwhile (var1 < 10) {\n    A.foo();\n    var1++;\n}\nreturn;\n"
    );
}

#[test]
fn test_loop_stepping_another_local_stays_while() {
    assert_eq!(
        render(&counting_loop(Instruction::Iinc { index: 2, amount: 1 })),
        "var1 = 0;\nwhile (var1 < 10) {\n    A.foo();\n    var2++;\n}\nreturn;\n"
    );
}

#[test]
fn test_loop_without_trailing_step_stays_while() {
    assert_eq!(
        render(&counting_loop(call("bar"))),
        "var1 = 0;\nwhile (var1 < 10) {\n    A.foo();\n    A.bar();\n}\nreturn;\n"
    );
}

#[test]
fn test_back_edge_without_condition_is_endless_loop() {
    let method = MethodBody::new("m", "()V", vec![label(0), call("foo"), Instruction::Goto(Label(0))]);
    assert_eq!(render(&method), "while (true) {\n    A.foo();\n}\n");
}

#[test]
fn test_exit_from_middle_of_loop_is_break() {
    let method = MethodBody::new(
        "m",
        "(Z)V",
        vec![
            label(0),
            call("foo"),
            Instruction::Load(0),
            jump(JumpOpcode::Ifne, 1),
            call("bar"),
            Instruction::Goto(Label(0)),
            label(1),
            Instruction::Return,
        ],
    );
    assert_eq!(
        render(&method),
        "while (true) {\n    A.foo();\n    if (var0) {\n        break;\n    }\n    A.bar();\n}\nreturn;\n"
    );
}

#[test]
fn test_top_tested_loop_is_while() {
    let method = MethodBody::new(
        "m",
        "(Z)V",
        vec![
            label(0),
            Instruction::Load(0),
            jump(JumpOpcode::Ifeq, 1),
            call("foo"),
            Instruction::Goto(Label(0)),
            label(1),
            Instruction::Return,
        ],
    );
    assert_eq!(render(&method), "while (var0) {\n    A.foo();\n}\nreturn;\n");
}

const STATEMENT_HEAD_LOOP: &str = "while (true) {\n    A.foo();\n    if (!var0) {\n        break;\n    }\n    A.bar();\n}\nreturn;\n";

fn unsplit() -> StructureOptions {
    StructureOptions { split_condition_headers: false, ..StructureOptions::default() }
}

#[test]
fn test_top_tested_loop_with_statement_head_tests_inside_endless_loop() {
    let method = MethodBody::new(
        "m",
        "(Z)V",
        vec![
            label(0),
            call("foo"),
            Instruction::Load(0),
            jump(JumpOpcode::Ifeq, 1),
            call("bar"),
            Instruction::Goto(Label(0)),
            label(1),
            Instruction::Return,
        ],
    );
    let structured = Structurer::new(unsplit()).structure_method(&method).unwrap();
    match &structured.body.statements[0] {
        StructuredStmt::While { condition: Condition::Const(true), body } => {
            assert!(matches!(body[0], StructuredStmt::Simple(Stmt::ExprStmt(_))));
            assert!(matches!(&body[1], StructuredStmt::If { then_body, .. } if then_body == &vec![StructuredStmt::Break]));
        }
        other => panic!("expected endless loop, got {:?}", other),
    }
    assert_eq!(render_with(unsplit(), &method), STATEMENT_HEAD_LOOP);
}

#[test]
fn test_bottom_tested_loop_with_statement_head_tests_inside_endless_loop() {
    let method = MethodBody::new(
        "m",
        "(Z)V",
        vec![
            Instruction::Goto(Label(1)),
            label(0),
            call("bar"),
            label(1),
            call("foo"),
            Instruction::Load(0),
            jump(JumpOpcode::Ifne, 0),
            Instruction::Return,
        ],
    );
    assert_eq!(render_with(unsplit(), &method), STATEMENT_HEAD_LOOP);
}

#[test]
fn test_loop_without_init_store_stays_while() {
    let method = MethodBody::new(
        "count",
        "()V",
        vec![
            Instruction::Goto(Label(1)),
            label(0),
            call("foo"),
            Instruction::Iinc { index: 1, amount: 1 },
            label(1),
            Instruction::Load(1),
            push(10),
            jump(JumpOpcode::IfIcmplt, 0),
            Instruction::Return,
        ],
    );
    assert_eq!(render(&method), "while (var1 < 10) {\n    A.foo();\n    var1++;\n}\nreturn;\n");
}

#[test]
fn test_loop_with_own_continue_stays_while() {
    let method = MethodBody::new(
        "count",
        "(ZIZ)V",
        vec![
            push(0),
            Instruction::Store(1),
            Instruction::Goto(Label(1)),
            label(0),
            Instruction::Load(0),
            jump(JumpOpcode::Ifeq, 2),
            Instruction::Load(2),
            jump(JumpOpcode::Ifne, 1),
            call("bar"),
            label(2),
            call("foo"),
            Instruction::Iinc { index: 1, amount: 1 },
            label(1),
            Instruction::Load(1),
            push(10),
            jump(JumpOpcode::IfIcmplt, 0),
            Instruction::Return,
        ],
    );
    let structured = Structurer::default().structure_method(&method).unwrap();
    assert!(matches!(
        structured.body.statements.as_slice(),
        [
            StructuredStmt::Simple(Stmt::LocalStore { .. }),
            StructuredStmt::While { .. },
            StructuredStmt::Simple(Stmt::Return(None)),
        ]
    ));
    assert_eq!(
        render_body(&structured.body, &RenderConfig::default()),
        "var1 = 0;\nwhile (var1 < 10) {\n    if (var0) {\n        if (var2) {\n            continue;\n        }\n        A.bar();\n    }\n    A.foo();\n    var1++;\n}\nreturn;\n"
    );
}

// ---- Phase 4: Switch tests ----

#[test]
fn test_shared_default_target_is_one_case() {
    let method = MethodBody::new(
        "m",
        "(I)V",
        vec![
            Instruction::Load(0),
            Instruction::Switch {
                pairs: vec![(1, Label(1)), (2, Label(2)), (3, Label(3)), (4, Label(4))],
                default: Label(4),
            },
            label(1),
            push(1),
            Instruction::Store(1),
            Instruction::Goto(Label(9)),
            label(2),
            push(2),
            Instruction::Store(1),
            Instruction::Goto(Label(9)),
            label(3),
            push(3),
            Instruction::Store(1),
            Instruction::Goto(Label(9)),
            label(4),
            push(4),
            Instruction::Store(1),
            label(9),
            Instruction::Return,
        ],
    );
    let structured = Structurer::default().structure_method(&method).unwrap();
    let cases = match &structured.body.statements[0] {
        StructuredStmt::Switch { selector, cases } => {
            assert_eq!(selector, &var(0));
            cases
        }
        other => panic!("expected switch, got {:?}", other),
    };
    assert_eq!(cases.len(), 4);
    let keys: Vec<_> = cases.iter().map(|c| (c.values.clone(), c.is_default)).collect();
    assert_eq!(
        keys,
        vec![(vec![1], false), (vec![2], false), (vec![3], false), (vec![4], true)]
    );
    assert!(cases[..3].iter().all(|c| c.breaks && !c.falls_through));
}

#[test]
fn test_case_without_break_falls_through() {
    let method = MethodBody::new(
        "m",
        "(I)V",
        vec![
            Instruction::Load(0),
            Instruction::Switch { pairs: vec![(1, Label(1)), (2, Label(2))], default: Label(9) },
            label(1),
            call("foo"),
            label(2),
            call("bar"),
            Instruction::Goto(Label(9)),
            label(9),
            Instruction::Return,
        ],
    );
    assert_eq!(
        render(&method),
        "switch (var0) {\n    case 1:\n        A.foo();\n    case 2:\n        A.bar();\n        break;\n}\nreturn;\n"
    );
}

// ---- Phase 5: Ternary tests ----

fn nested_ternary_method() -> MethodBody {
    // var2 = var0 ? 1 : (var1 ? 2 : 3)
    MethodBody::new(
        "m",
        "(ZZ)V",
        vec![
            Instruction::Load(0),
            jump(JumpOpcode::Ifeq, 1),
            push(1),
            Instruction::Goto(Label(3)),
            label(1),
            Instruction::Load(1),
            jump(JumpOpcode::Ifeq, 2),
            push(2),
            Instruction::Goto(Label(3)),
            label(2),
            push(3),
            label(3),
            Instruction::Store(2),
            Instruction::Return,
        ],
    )
}

#[test]
fn test_nested_ternary_recurses_into_false_arm() {
    let method = nested_ternary_method();
    let labels = method.label_positions();
    let sim = Simulator::new(&method, &labels);
    let mut graph = cfg::build_graph(&method).unwrap();
    cleanup::cleanup(&mut graph, true).unwrap();
    assert_eq!(ternary::collapse_ternaries(&mut graph, &sim, true).unwrap(), 2);

    let head = graph.blocks().next().unwrap();
    match head.internal.as_deref() {
        Some(BlockSection::Ternary { true_sections, false_sections, .. }) => {
            assert!(!true_sections.is_empty());
            assert!(matches!(false_sections.as_slice(), [BlockSection::Ternary { .. }]));
        }
        other => panic!("expected ternary, got {:?}", other),
    }
}

#[test]
fn test_nested_ternary_renders_as_expression() {
    assert_eq!(render(&nested_ternary_method()), "var2 = var0 ? 1 : (var1 ? 2 : 3);\nreturn;\n");
}

// ---- Phase 6: Exception region tests ----

fn io_exception(start: u32, end: u32, handler: u32) -> ExceptionEntry {
    ExceptionEntry {
        start: Label(start),
        end: Label(end),
        handler: Label(handler),
        catch_type: Some("java/io/IOException".into()),
        local: None,
    }
}

#[test]
fn test_try_catch_binds_named_local() {
    let mut method = MethodBody::new(
        "m",
        "()V",
        vec![
            label(0),
            call("foo"),
            label(1),
            Instruction::Goto(Label(3)),
            label(2),
            Instruction::Store(1),
            call("bar"),
            label(3),
            Instruction::Return,
        ],
    );
    method.exception_table = vec![io_exception(0, 1, 2)];
    method.local_variables = LocalVariableTable::new(vec![LocalVariable {
        index: 1,
        name: "e".into(),
        descriptor: "Ljava/io/IOException;".into(),
        start: Label(2),
        end: Label(3),
    }]);
    assert_eq!(
        render(&method),
        "try {\n    A.foo();\n} catch (IOException e) {\n    A.bar();\n}\nreturn;\n"
    );
}

fn try_without_merge() -> MethodBody {
    let mut method = MethodBody::new(
        "m",
        "(Z)V",
        vec![
            Instruction::Load(0),
            jump(JumpOpcode::Ifeq, 4),
            label(0),
            call("foo"),
            Instruction::Return,
            label(1),
            label(2),
            Instruction::Store(1),
            call("bar"),
            label(4),
            call("baz"),
            Instruction::Return,
        ],
    );
    method.exception_table = vec![io_exception(0, 1, 2)];
    method
}

#[test]
fn test_catch_end_follows_local_scope() {
    let mut method = try_without_merge();
    method.local_variables = LocalVariableTable::new(vec![LocalVariable {
        index: 1,
        name: "e".into(),
        descriptor: "Ljava/io/IOException;".into(),
        start: Label(2),
        end: Label(4),
    }]);
    let structured = Structurer::default().structure_method(&method).unwrap();
    assert!(structured.used_catch_scope_fallback);
    assert_eq!(
        render_body(&structured.body, &RenderConfig::default()),
        "if (var0) {\n    try {\n        A.foo();\n        return;\n    } catch (IOException e) {\n        A.bar();\n    }\n}\nA.baz();\nreturn;\n"
    );
}

#[test]
fn test_catch_end_without_local_scope_runs_to_merge() {
    let structured = Structurer::default().structure_method(&try_without_merge()).unwrap();
    assert!(!structured.used_catch_scope_fallback);
    assert!(matches!(structured.body.statements[0], StructuredStmt::If { .. }));
}

// ---- Phase 7: Error and batch tests ----

#[test]
fn test_refused_instruction_is_skipped() {
    let method = MethodBody::new("m", "()V", vec![Instruction::Unsupported("invokedynamic".into()), Instruction::Return]);
    let err = Structurer::default().structure_method(&method).unwrap_err();
    assert!(err.is_skippable());
    match err {
        DecompileError::Method { method_name, source } => {
            assert_eq!(method_name, "m");
            assert!(matches!(source, StructureError::Unsupported { index: 0, .. }));
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[test]
fn test_jump_to_undefined_label_is_malformed() {
    let method = MethodBody::new("m", "()V", vec![Instruction::Goto(Label(7))]);
    let err = Structurer::default().structure_method(&method).unwrap_err();
    assert!(!err.is_skippable());
    assert!(matches!(err, DecompileError::Method { source: StructureError::Malformed { .. }, .. }));
}

#[test]
fn test_popping_an_empty_stack_is_malformed() {
    let method = MethodBody::new("m", "()V", vec![Instruction::Store(1), Instruction::Return]);
    let err = Structurer::default().structure_method(&method).unwrap_err();
    assert!(matches!(err, DecompileError::Method { source: StructureError::Malformed { .. }, .. }));
}

#[test]
fn test_ternary_without_detection_is_malformed() {
    let options = StructureOptions { detect_ternaries: false, ..StructureOptions::default() };
    let err = Structurer::new(options).structure_method(&nested_ternary_method()).unwrap_err();
    assert!(matches!(err, DecompileError::Method { source: StructureError::Malformed { .. }, .. }));
}

/// An inner loop that jumps straight out of the outer one.
fn labelled_break_method() -> MethodBody {
    MethodBody::new(
        "labelled",
        "(ZZ)V",
        vec![
            label(0),
            call("foo"),
            label(1),
            call("bar"),
            Instruction::Load(0),
            jump(JumpOpcode::Ifne, 9),
            Instruction::Load(1),
            jump(JumpOpcode::Ifne, 1),
            Instruction::Goto(Label(0)),
            label(9),
            Instruction::Return,
        ],
    )
}

#[test]
fn test_labelled_break_is_unsupported() {
    let err = Structurer::default().structure_method(&labelled_break_method()).unwrap_err();
    assert!(err.is_skippable());
    assert!(matches!(err, DecompileError::Method { source: StructureError::Unsupported { .. }, .. }));

    let report = Structurer::default().structure_all(&[labelled_break_method()]);
    assert!(report.structured.is_empty());
    assert!(report.failed.is_empty());
    assert_eq!(report.skipped.len(), 1);
}

#[test]
fn test_jump_into_loop_body_is_malformed() {
    // the second check jumps back into the middle of the loop
    let method = MethodBody::new(
        "m",
        "(ZZ)V",
        vec![
            label(0),
            call("foo"),
            label(1),
            call("bar"),
            Instruction::Load(0),
            jump(JumpOpcode::Ifne, 0),
            Instruction::Load(1),
            jump(JumpOpcode::Ifne, 1),
            Instruction::Return,
        ],
    );
    let err = Structurer::default().structure_method(&method).unwrap_err();
    assert!(!err.is_skippable());
    match err {
        DecompileError::Method { source: StructureError::Malformed { message, .. }, .. } => {
            assert!(message.contains("middle of a region"), "{}", message);
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[test]
fn test_catch_end_entered_from_try_body_is_malformed() {
    let mut method = MethodBody::new(
        "m",
        "(Z)V",
        vec![
            label(0),
            Instruction::Load(0),
            jump(JumpOpcode::Ifeq, 4),
            call("foo"),
            Instruction::Return,
            label(1),
            label(2),
            Instruction::Store(1),
            call("bar"),
            label(4),
            call("baz"),
            Instruction::Return,
        ],
    );
    method.exception_table = vec![io_exception(0, 1, 2)];
    let err = Structurer::default().structure_method(&method).unwrap_err();
    match err {
        DecompileError::Method { source: StructureError::Malformed { message, .. }, .. } => {
            assert!(message.contains("last catch body"), "{}", message);
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[test]
fn test_orphaned_try_end_is_unreachable_state() {
    init_logging();
    let mut method = MethodBody::new(
        "m",
        "()V",
        vec![
            label(0),
            call("foo"),
            label(1),
            Instruction::Goto(Label(3)),
            label(2),
            Instruction::Store(1),
            call("bar"),
            label(3),
            Instruction::Return,
        ],
    );
    method.exception_table = vec![io_exception(0, 1, 2)];
    let labels = method.label_positions();
    let sim = Simulator::new(&method, &labels);
    let mut graph = cfg::build_graph(&method).unwrap();
    let start = graph.blocks().find(|b| b.kind == BlockKind::TryStart(0)).map(|b| b.id).unwrap();
    graph.remove(start);
    graph.populate_targeted_by();
    let err = RegionDecomposer::new(&mut graph, &sim, &method.local_variables, &StructureOptions::default())
        .decompose()
        .unwrap_err();
    assert!(matches!(err, StructureError::UnreachableState { .. }));
}

#[test]
fn test_edge_to_removed_block_is_unreachable_state() {
    let method = MethodBody::new(
        "m",
        "(Z)V",
        vec![Instruction::Load(0), jump(JumpOpcode::Ifeq, 1), call("foo"), label(1), Instruction::Return],
    );
    let mut graph = cfg::build_graph(&method).unwrap();
    let last = *graph.order.last().unwrap();
    graph.remove(last);
    assert!(matches!(graph.check_invariants(), Err(StructureError::UnreachableState { .. })));
}

#[test]
fn test_batch_sorts_results() {
    init_logging();
    let methods = vec![
        MethodBody::new("ok", "()V", vec![Instruction::Return]),
        MethodBody::new("empty", "()V", vec![]),
        MethodBody::new("indy", "()V", vec![Instruction::Unsupported("invokedynamic".into())]),
        MethodBody::new("broken", "()V", vec![Instruction::Goto(Label(3))]),
    ];
    let report = Structurer::default().structure_all(&methods);
    assert_eq!(report.structured.len(), 1);
    assert_eq!(report.structured[0].name, "ok");
    assert_eq!(report.skipped.len(), 2);
    assert!(matches!(report.skipped[0], DecompileError::NoCode(_)));
    assert_eq!(report.failed.len(), 1);
}

#[test]
fn test_structuring_is_deterministic() {
    let methods = [
        else_if_method(),
        nested_ternary_method(),
        counting_loop(Instruction::Iinc { index: 1, amount: 1 }),
        try_without_merge(),
    ];
    let structurer = Structurer::default();
    for method in &methods {
        let first = structurer.structure_method(method).unwrap();
        for _ in 0..4 {
            assert_eq!(structurer.structure_method(method).unwrap(), first);
        }
        let dot = cfg::build_graph(method).unwrap().to_dot();
        assert_eq!(cfg::build_graph(method).unwrap().to_dot(), dot);
    }
}
