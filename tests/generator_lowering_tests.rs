//! Integration tests for the generator lowering pass

mod common;
use common::render_flat;

use cinnabar::ast::{factory, printer, FunctionKind, ParameterFlags};
use cinnabar::{CodeGenerator, Error, Opcode};

mod empty_functions {
    use super::*;

    #[test]
    fn test_empty_generator_has_single_terminating_case() {
        let generator = CodeGenerator::new();
        let function = generator.build_generator_function(
            FunctionKind::Declaration,
            Some(factory::ident("empty")),
            None,
        );
        let js = render_flat(&function);
        assert!(js.contains("function empty()"), "Got: {}", js);
        assert!(
            js.contains("return __generator(function (__state)"),
            "Got: {}",
            js
        );
        assert!(js.contains("switch (__state.label)"), "Got: {}", js);
        assert!(
            js.contains("case 0: { return [\"return\"]; }"),
            "Got: {}",
            js
        );
    }

    #[test]
    fn test_dropped_statements_leave_generator_empty() {
        let mut generator = CodeGenerator::new();
        generator.emit_statement(None);
        generator.emit_statement(None);
        let function =
            generator.build_generator_function(FunctionKind::Expression, None, None);
        let js = render_flat(&function);
        assert!(
            js.contains("case 0: { return [\"return\"]; }"),
            "Got: {}",
            js
        );
        assert!(!js.contains("case 1:"), "Got: {}", js);
    }
}

mod yields {
    use super::*;

    #[test]
    fn test_single_yield_splits_into_two_cases() {
        let mut generator = CodeGenerator::new();
        generator.emit(Opcode::Yield(Some(factory::number(42.0))));
        let function =
            generator.build_generator_function(FunctionKind::Expression, None, None);
        let js = render_flat(&function);
        assert!(
            js.contains("case 0: { return [\"yield\", 42]; }"),
            "Got: {}",
            js
        );
        assert!(
            js.contains("case 1: { return [\"return\"]; }"),
            "Got: {}",
            js
        );
        // Yield is abrupt, so no fall-through fix-up is needed.
        assert!(!js.contains("__state.label = 1;"), "Got: {}", js);
    }

    #[test]
    fn test_valueless_yield() {
        let mut generator = CodeGenerator::new();
        generator.emit(Opcode::Yield(None));
        let function =
            generator.build_generator_function(FunctionKind::Expression, None, None);
        let js = render_flat(&function);
        assert!(js.contains("return [\"yield\"];"), "Got: {}", js);
    }

    #[test]
    fn test_loop_with_yield_state_machine() {
        let mut generator = CodeGenerator::new();
        let loop_head = generator.define_label();
        generator.mark_label(loop_head);
        let break_label = generator.begin_continue_block(loop_head, None);
        generator.emit(Opcode::BrFalse(break_label, factory::raw("i < 3")));
        let resume = generator.define_label();
        generator.emit(Opcode::Yield(Some(factory::raw("i"))));
        generator.mark_label(resume);
        generator.emit_statement(Some(factory::raw("i++")));
        generator.emit(Opcode::Break(loop_head));
        generator.end_continue_block();

        let function = generator.build_generator_function(
            FunctionKind::Declaration,
            Some(factory::ident("range")),
            None,
        );
        let js = render_flat(&function);
        assert!(
            js.contains(
                "case 0: { if (!(i < 3)) { return [\"break\", 2]; } return [\"yield\", i]; }"
            ),
            "Got: {}",
            js
        );
        assert!(
            js.contains("case 1: { i++; return [\"break\", 0]; }"),
            "Got: {}",
            js
        );
        assert!(
            js.contains("case 2: { return [\"return\"]; }"),
            "Got: {}",
            js
        );
    }
}

mod completions {
    use super::*;

    #[test]
    fn test_explicit_return_suppresses_synthetic_return() {
        let mut generator = CodeGenerator::new();
        generator.emit(Opcode::Return(Some(factory::number(7.0))));
        let function =
            generator.build_generator_function(FunctionKind::Expression, None, None);
        let js = render_flat(&function);
        assert!(js.contains("return [\"return\", 7];"), "Got: {}", js);
        assert!(!js.contains("return [\"return\"];"), "Got: {}", js);
    }

    #[test]
    fn test_throw_suppresses_synthetic_return() {
        let mut generator = CodeGenerator::new();
        generator.emit(Opcode::Throw(factory::raw("new Error(\"boom\")")));
        let function =
            generator.build_generator_function(FunctionKind::Expression, None, None);
        let js = render_flat(&function);
        assert!(js.contains("throw new Error(\"boom\");"), "Got: {}", js);
        assert!(!js.contains("[\"return\"]"), "Got: {}", js);
    }
}

mod break_targets {
    use super::*;

    #[test]
    fn test_nested_break_block_resolution() {
        let mut generator = CodeGenerator::new();
        let outer = generator.begin_break_block(Some("outer"));
        let inner = generator.begin_break_block(None);

        assert_eq!(generator.find_break_target(None), Some(inner));
        assert_eq!(generator.find_break_target(Some("outer")), Some(outer));
        assert_eq!(generator.find_break_target(Some("missing")), None);

        generator.end_break_block();
        generator.end_break_block();
        assert_eq!(generator.find_break_target(None), None);
    }

    #[test]
    fn test_continue_block_resolution() {
        let mut generator = CodeGenerator::new();
        let loop_head = generator.define_label();
        generator.mark_label(loop_head);
        let break_label = generator.begin_continue_block(loop_head, Some("loop"));

        assert_eq!(generator.find_continue_target(None), Some(loop_head));
        assert_eq!(generator.find_continue_target(Some("loop")), Some(loop_head));
        assert_eq!(generator.find_break_target(None), Some(break_label));
        // A plain break block never answers a continue query.
        assert_eq!(generator.find_continue_target(Some("missing")), None);

        generator.end_continue_block();
    }

    #[test]
    fn test_script_blocks_behave_like_their_counterparts() {
        let mut generator = CodeGenerator::new();
        let script_break = generator.begin_script_break_block(Some("top"));
        assert_eq!(generator.find_break_target(None), Some(script_break));
        assert_eq!(generator.find_break_target(Some("top")), Some(script_break));
        assert_eq!(generator.find_continue_target(None), None);
        generator.end_script_break_block();

        let head = generator.define_label();
        generator.mark_label(head);
        let script_continue = generator.begin_script_continue_block(head, Some("top"));
        assert_eq!(generator.find_continue_target(Some("top")), Some(head));
        assert_eq!(generator.find_break_target(None), Some(script_continue));
        generator.end_script_continue_block();
    }
}

mod protected_regions {
    use super::*;

    #[test]
    fn test_try_finally() {
        let mut generator = CodeGenerator::new();
        generator.begin_exception_block();
        generator.emit_statement(Some(factory::raw("probe()")));
        generator.begin_finally_block();
        generator.emit_statement(Some(factory::raw("cleanup()")));
        generator.end_exception_block();

        let function =
            generator.build_generator_function(FunctionKind::Expression, None, None);
        let js = render_flat(&function);
        assert!(js.contains("__state.trys = [];"), "Got: {}", js);
        assert!(
            js.contains("__state.trys.push([0, null, 1, 2]);"),
            "Got: {}",
            js
        );
        assert!(
            js.contains("probe(); return [\"break\", 2];"),
            "Got: {}",
            js
        );
        assert!(
            js.contains("case 1: { cleanup(); return [\"endfinally\"]; }"),
            "Got: {}",
            js
        );
        assert!(
            js.contains("case 2: { return [\"return\"]; }"),
            "Got: {}",
            js
        );
    }

    #[test]
    fn test_try_catch() {
        let mut generator = CodeGenerator::new();
        generator.begin_exception_block();
        generator.emit_statement(Some(factory::raw("risky()")));
        generator.begin_catch_block(factory::ident("e"));
        generator.emit_statement(Some(factory::raw("recover(e)")));
        generator.end_exception_block();

        let function =
            generator.build_generator_function(FunctionKind::Expression, None, None);
        let js = render_flat(&function);
        assert!(
            js.contains("__state.trys.push([0, 1, null, 2]);"),
            "Got: {}",
            js
        );
        assert!(
            js.contains("risky(); return [\"break\", 2];"),
            "Got: {}",
            js
        );
        assert!(
            js.contains("case 1: { e = __state.error; recover(e); return [\"break\", 2]; }"),
            "Got: {}",
            js
        );
    }

    #[test]
    fn test_try_catch_finally_populates_every_slot() {
        let mut generator = CodeGenerator::new();
        generator.begin_exception_block();
        generator.emit_statement(Some(factory::raw("a()")));
        generator.begin_catch_block(factory::ident("e"));
        generator.emit_statement(Some(factory::raw("b()")));
        generator.begin_finally_block();
        generator.emit_statement(Some(factory::raw("c()")));
        generator.end_exception_block();

        let function =
            generator.build_generator_function(FunctionKind::Expression, None, None);
        let js = render_flat(&function);
        assert!(
            js.contains("__state.trys.push([0, 1, 2, 3]);"),
            "Got: {}",
            js
        );
        assert!(
            js.contains("case 2: { c(); return [\"endfinally\"]; }"),
            "Got: {}",
            js
        );
        assert!(
            js.contains("case 3: { return [\"return\"]; }"),
            "Got: {}",
            js
        );
    }

    #[test]
    fn test_nested_exception_blocks_register_separately() {
        let mut generator = CodeGenerator::new();
        generator.begin_exception_block();
        generator.emit_statement(Some(factory::raw("a()")));
        generator.begin_exception_block();
        generator.emit_statement(Some(factory::raw("b()")));
        generator.begin_finally_block();
        generator.emit_statement(Some(factory::raw("c()")));
        generator.end_exception_block();
        generator.begin_catch_block(factory::ident("e"));
        generator.emit_statement(Some(factory::raw("d()")));
        generator.end_exception_block();

        let function =
            generator.build_generator_function(FunctionKind::Expression, None, None);
        let js = render_flat(&function);
        // Outer region: catch at case 4, no finally, ends at case 5.
        assert!(
            js.contains("__state.trys.push([0, 4, null, 5]);"),
            "Got: {}",
            js
        );
        // Inner region: no catch, finally at case 2, ends at case 3.
        assert!(
            js.contains("__state.trys.push([1, null, 2, 3]);"),
            "Got: {}",
            js
        );
        // The runtime stack initializer appears exactly once, up front.
        assert_eq!(js.matches("__state.trys = [];").count(), 1, "Got: {}", js);
    }
}

mod branching {
    use super::*;

    #[test]
    fn test_conditional_branch_with_fall_through() {
        let mut generator = CodeGenerator::new();
        let target = generator.define_label();
        generator.emit(Opcode::BrTrue(target, factory::raw("cond")));
        generator.emit_statement(Some(factory::raw("a()")));
        generator.mark_label(target);
        generator.emit_statement(Some(factory::raw("b()")));

        let function =
            generator.build_generator_function(FunctionKind::Expression, None, None);
        let js = render_flat(&function);
        assert!(
            js.contains("if (cond) { return [\"break\", 1]; }"),
            "Got: {}",
            js
        );
        // a() cannot fall off the end of case 0: the fix-up re-points the
        // label register at the next case.
        assert!(
            js.contains("a(); __state.label = 1;"),
            "Got: {}",
            js
        );
        assert!(js.contains("case 1: { b();"), "Got: {}", js);
    }

    #[test]
    fn test_no_fix_up_after_abrupt_case() {
        let mut generator = CodeGenerator::new();
        let target = generator.define_label();
        generator.emit(Opcode::Break(target));
        generator.mark_label(target);
        generator.emit_statement(Some(factory::raw("b()")));

        let function =
            generator.build_generator_function(FunctionKind::Expression, None, None);
        let js = render_flat(&function);
        assert!(!js.contains("__state.label ="), "Got: {}", js);
        assert!(
            js.contains("case 0: { return [\"break\", 1]; }"),
            "Got: {}",
            js
        );
    }

    #[test]
    fn test_labels_bound_out_of_definition_order() {
        let mut generator = CodeGenerator::new();
        let later = generator.define_label();
        let earlier = generator.define_label();
        generator.emit(Opcode::Yield(None));
        generator.mark_label(earlier);
        generator.emit(Opcode::Yield(None));
        generator.mark_label(later);
        generator.emit(Opcode::Break(earlier));

        let function =
            generator.build_generator_function(FunctionKind::Expression, None, None);
        let js = render_flat(&function);
        // Case numbering follows binding order, not allocation order, and
        // the break terminates its case outright.
        assert!(
            js.contains("case 2: { return [\"break\", 1]; }"),
            "Got: {}",
            js
        );
        assert!(
            js.contains("case 3: { return [\"return\"]; }"),
            "Got: {}",
            js
        );
    }

    #[test]
    fn test_labels_bound_at_the_same_position_share_a_case() {
        let mut generator = CodeGenerator::new();
        let first = generator.define_label();
        let second = generator.define_label();
        generator.emit(Opcode::Yield(None));
        generator.mark_label(first);
        generator.mark_label(second);
        generator.emit(Opcode::Break(second));

        let function =
            generator.build_generator_function(FunctionKind::Expression, None, None);
        let js = render_flat(&function);
        assert!(js.contains("return [\"break\", 1];"), "Got: {}", js);
        // Both labels resolve to case 1; the only case after it is the
        // synthetic terminator.
        assert!(
            js.contains("case 2: { return [\"return\"]; }"),
            "Got: {}",
            js
        );
        assert!(!js.contains("case 3:"), "Got: {}", js);
    }
}

mod dead_code {
    use super::*;

    #[test]
    fn test_operations_after_yield_are_suppressed_until_next_label() {
        let mut generator = CodeGenerator::new();
        let resume = generator.define_label();
        generator.emit(Opcode::Yield(None));
        generator.emit_statement(Some(factory::raw("dead()")));
        generator.mark_label(resume);
        generator.emit_statement(Some(factory::raw("live()")));

        let function =
            generator.build_generator_function(FunctionKind::Expression, None, None);
        let js = render_flat(&function);
        assert!(!js.contains("dead()"), "Got: {}", js);
        assert!(js.contains("live()"), "Got: {}", js);
    }

    #[test]
    fn test_operations_after_return_are_suppressed() {
        let mut generator = CodeGenerator::new();
        generator.emit(Opcode::Return(None));
        generator.emit_statement(Some(factory::raw("dead()")));

        let function =
            generator.build_generator_function(FunctionKind::Expression, None, None);
        let js = render_flat(&function);
        assert!(!js.contains("dead()"), "Got: {}", js);
    }
}

mod case_structure {
    use super::*;
    use cinnabar::ast::{Node, NodeKind};

    /// Walk a built function and check that within every case clause no
    /// statement follows a terminating return or throw
    fn assert_cases_terminate_cleanly(node: &Node) {
        match node.kind() {
            NodeKind::Function { body, .. } => {
                for statement in body {
                    assert_cases_terminate_cleanly(statement);
                }
            }
            NodeKind::ReturnStatement(Some(argument)) => assert_cases_terminate_cleanly(argument),
            NodeKind::ExpressionStatement(expression) => assert_cases_terminate_cleanly(expression),
            NodeKind::Call { callee, arguments } | NodeKind::New { callee, arguments } => {
                assert_cases_terminate_cleanly(callee);
                for argument in arguments {
                    assert_cases_terminate_cleanly(argument);
                }
            }
            NodeKind::SwitchStatement { cases, .. } => {
                for case in cases {
                    assert_cases_terminate_cleanly(case);
                }
            }
            NodeKind::CaseClause { index, statements } => {
                let statements = statements.borrow();
                for (i, statement) in statements.iter().enumerate() {
                    let terminating = matches!(
                        statement.kind(),
                        NodeKind::ReturnStatement(_) | NodeKind::ThrowStatement(_)
                    );
                    assert!(
                        !terminating || i == statements.len() - 1,
                        "dead statement after a completion in case {}",
                        index
                    );
                }
            }
            _ => {}
        }
    }

    #[test]
    fn test_trailing_yield_gets_its_own_terminating_case() {
        let mut generator = CodeGenerator::new();
        generator.emit(Opcode::Yield(Some(factory::number(1.0))));
        let function =
            generator.build_generator_function(FunctionKind::Expression, None, None);
        assert_cases_terminate_cleanly(&function);
    }

    #[test]
    fn test_trailing_break_gets_its_own_terminating_case() {
        let mut generator = CodeGenerator::new();
        let later = generator.define_label();
        let earlier = generator.define_label();
        generator.emit(Opcode::Yield(None));
        generator.mark_label(earlier);
        generator.emit(Opcode::Yield(None));
        generator.mark_label(later);
        generator.emit(Opcode::Break(earlier));
        let function =
            generator.build_generator_function(FunctionKind::Expression, None, None);
        assert_cases_terminate_cleanly(&function);
    }

    #[test]
    fn test_protected_region_cases_terminate_cleanly() {
        let mut generator = CodeGenerator::new();
        generator.begin_exception_block();
        generator.emit_statement(Some(factory::raw("a()")));
        generator.begin_catch_block(factory::ident("e"));
        generator.emit_statement(Some(factory::raw("b()")));
        generator.begin_finally_block();
        generator.emit_statement(Some(factory::raw("c()")));
        generator.end_exception_block();
        let function =
            generator.build_generator_function(FunctionKind::Expression, None, None);
        assert_cases_terminate_cleanly(&function);
    }

    #[test]
    fn test_loop_cases_terminate_cleanly() {
        let mut generator = CodeGenerator::new();
        let loop_head = generator.define_label();
        generator.mark_label(loop_head);
        let break_label = generator.begin_continue_block(loop_head, None);
        generator.emit(Opcode::BrFalse(break_label, factory::raw("i < 3")));
        let resume = generator.define_label();
        generator.emit(Opcode::Yield(Some(factory::raw("i"))));
        generator.mark_label(resume);
        generator.emit(Opcode::Break(loop_head));
        generator.end_continue_block();
        let function =
            generator.build_generator_function(FunctionKind::Expression, None, None);
        assert_cases_terminate_cleanly(&function);
    }
}

mod labels {
    use super::*;

    #[test]
    fn test_referencing_an_unmarked_label_fails_at_render_time() {
        let mut generator = CodeGenerator::new();
        let label = generator.define_label();
        generator.emit(Opcode::Break(label));
        let function =
            generator.build_generator_function(FunctionKind::Expression, None, None);
        let err = printer::render(&function).unwrap_err();
        assert!(matches!(err, Error::UnresolvedLabel { label: 1 }));
    }

    #[test]
    fn test_unreferenced_unmarked_labels_are_harmless() {
        let mut generator = CodeGenerator::new();
        let _unused = generator.define_label();
        generator.emit(Opcode::Yield(None));
        let function =
            generator.build_generator_function(FunctionKind::Expression, None, None);
        assert!(printer::render(&function).is_ok());
    }

    #[test]
    fn test_inline_fragments_resolve_after_finalization() {
        let mut generator = CodeGenerator::new();
        let label = generator.define_label();
        let break_fragment = generator.create_inline_break(label);
        let return_fragment = generator.create_inline_return(Some(factory::number(7.0)));
        generator.emit(Opcode::Yield(None));
        generator.mark_label(label);
        let _function =
            generator.build_generator_function(FunctionKind::Expression, None, None);

        assert_eq!(render_flat(&break_fragment), "return [\"break\", 1];");
        assert_eq!(render_flat(&return_fragment), "return [\"return\", 7];");
    }
}

mod symbols {
    use super::*;

    #[test]
    fn test_locals_are_hoisted_into_one_declaration() {
        let mut generator = CodeGenerator::new();
        let slot = generator.declare_local(None);
        let user = generator.declare_local(Some("user"));
        generator.emit(Opcode::Yield(Some(slot)));
        generator.emit_statement(Some(user));

        let function =
            generator.build_generator_function(FunctionKind::Expression, None, None);
        let js = render_flat(&function);
        assert!(js.contains("var __l0, user;"), "Got: {}", js);
    }

    #[test]
    fn test_cache_expression_evaluates_once() {
        let mut generator = CodeGenerator::new();
        let cached = generator.cache_expression(factory::raw("compute()"));
        generator.emit(Opcode::Yield(Some(cached)));

        let function =
            generator.build_generator_function(FunctionKind::Expression, None, None);
        let js = render_flat(&function);
        assert!(js.contains("var __l0;"), "Got: {}", js);
        assert!(js.contains("__l0 = compute();"), "Got: {}", js);
        assert!(js.contains("return [\"yield\", __l0];"), "Got: {}", js);
    }

    #[test]
    fn test_parameters_appear_on_the_built_function() {
        let mut generator = CodeGenerator::new();
        generator.add_parameter("first", ParameterFlags::default());
        generator.add_parameter("rest", ParameterFlags { rest: true });
        let function = generator.build_generator_function(
            FunctionKind::Declaration,
            Some(factory::ident("spread")),
            None,
        );
        let js = render_flat(&function);
        assert!(js.contains("function spread(first, ...rest)"), "Got: {}", js);
    }

    #[test]
    fn test_hoisted_functions_precede_the_driver_call() {
        let mut generator = CodeGenerator::new();
        let helper = factory::function(
            FunctionKind::Declaration,
            Some(factory::ident("helper")),
            vec![],
            vec![factory::return_statement(None)],
        );
        generator.add_function(helper);

        let function =
            generator.build_generator_function(FunctionKind::Expression, None, None);
        let js = render_flat(&function);
        let helper_at = js.find("function helper()").expect("helper missing");
        let driver_at = js.find("return __generator").expect("driver missing");
        assert!(helper_at < driver_at, "Got: {}", js);
    }

    #[test]
    fn test_emit_template_fragment() {
        let mut generator = CodeGenerator::new();
        generator.emit_template("{target} = __state.sent();", [("target", factory::ident("x"))]);
        let function =
            generator.build_generator_function(FunctionKind::Expression, None, None);
        let js = render_flat(&function);
        assert!(js.contains("x = __state.sent();"), "Got: {}", js);
    }
}

mod finalization {
    use super::*;
    use cinnabar::ast::Span;
    use cinnabar::lowering::STATE_IDENT;

    #[test]
    #[should_panic(expected = "unclosed block")]
    fn test_unclosed_block_panics_at_finalization() {
        let mut generator = CodeGenerator::new();
        generator.begin_break_block(None);
        let _ = generator.build_generator_function(FunctionKind::Expression, None, None);
    }

    #[test]
    fn test_built_function_is_stamped_with_location() {
        use cinnabar::ast::SourceLocation;

        let generator = CodeGenerator::new();
        let span = Span::new(
            SourceLocation::new(1, 1, 0),
            SourceLocation::new(9, 2, 150),
        );
        let function = generator.build_generator_function(
            FunctionKind::Declaration,
            Some(factory::ident("f")),
            Some(span),
        );
        assert_eq!(function.span(), Some(span));
    }

    #[test]
    fn test_state_ident_is_the_only_threaded_parameter() {
        let generator = CodeGenerator::new();
        let function =
            generator.build_generator_function(FunctionKind::Expression, None, None);
        let js = render_flat(&function);
        assert!(
            js.contains(&format!("function ({})", STATE_IDENT)),
            "Got: {}",
            js
        );
    }
}
