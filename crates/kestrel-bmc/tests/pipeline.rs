//! End-to-end checks of the full pipeline: unwind, encode, solve with the
//! bundled propagation solver, reconstruct the trace.
//!
//! The programs mirror the little C bodies a front-end would hand over:
//! guarded error calls, an uninitialized read through a havocked load, a
//! counting loop checked inside and beyond the bound, and a two-arm join
//! disambiguated through the predecessor variable.

use proptest::prelude::*;

use kestrel_bmc::{
    BmcError, BmcOptions, BoundedModelChecker, HavocMemoryModel, IntRepresentation,
    PropagationSolverFactory, SafetyResult, TraceEvent, ERROR_INTRINSIC,
};
use kestrel_core::{Context, Literal};
use kestrel_ir::{
    ArithOp, CmpOp, Function, Instr, IrConst, IrType, Operand, Phi, Rhs, Terminator,
};

fn check(function: &Function, options: BmcOptions) -> Result<SafetyResult, BmcError> {
    let mut ctx = Context::new();
    let factory = PropagationSolverFactory;
    let checker = BoundedModelChecker::new(options, &factory);
    checker.run(&mut ctx, function, Box::new(HavocMemoryModel))
}

fn error_call(code: Operand) -> Instr {
    Instr::new(
        None,
        Rhs::Call {
            callee: ERROR_INTRINSIC.to_string(),
            args: vec![code],
        },
    )
}

/// `int x = 1; if (x == k) error(code); return 0;`
fn guarded_error(k: i32, code: u32) -> Function {
    let mut f = Function::new("main");
    let entry = f.entry();
    let err = f.add_block("err");
    let ret = f.add_block("ret");

    let x = f.add_value(Some("x"), IrType::I32);
    let c = f.add_value(Some("c"), IrType::I1);

    f.push_instr(entry, Instr::new(Some(x), Rhs::Const(IrConst::i32_(1))))
        .unwrap();
    f.push_instr(
        entry,
        Instr::new(
            Some(c),
            Rhs::Cmp {
                op: CmpOp::Eq,
                lhs: Operand::Value(x),
                rhs: Operand::Const(IrConst::i32_(k)),
            },
        ),
    )
    .unwrap();
    f.set_terminator(
        entry,
        Terminator::CondBr {
            cond: Operand::Value(c),
            then_target: err,
            else_target: ret,
        },
    )
    .unwrap();
    f.push_instr(err, error_call(Operand::Const(IrConst::i32_(code as i32))))
        .unwrap();
    f.set_terminator(err, Terminator::Abort).unwrap();
    f.set_terminator(
        ret,
        Terminator::Return {
            value: Some(Operand::Const(IrConst::i32_(0))),
        },
    )
    .unwrap();
    f
}

/// `for (i = 0; i < limit; i++); if (i == limit) error(7); return 0;`
fn counting_loop_then_error(limit: i32) -> Function {
    let mut f = Function::new("main");
    let entry = f.entry();
    let header = f.add_block("header");
    let body = f.add_block("body");
    let after = f.add_block("after");
    let err = f.add_block("err");
    let ret = f.add_block("ret");

    let i0 = f.add_value(Some("i0"), IrType::I32);
    let i = f.add_value(Some("i"), IrType::I32);
    let c = f.add_value(Some("c"), IrType::I1);
    let inext = f.add_value(Some("inext"), IrType::I32);
    let iout = f.add_value(Some("iout"), IrType::I32);
    let g = f.add_value(Some("g"), IrType::I1);

    f.push_instr(entry, Instr::new(Some(i0), Rhs::Const(IrConst::i32_(0))))
        .unwrap();
    f.set_terminator(entry, Terminator::Jump { target: header })
        .unwrap();

    f.push_phi(
        header,
        Phi {
            dest: i,
            incoming: vec![(entry, Operand::Value(i0)), (body, Operand::Value(inext))],
            loc: None,
        },
    )
    .unwrap();
    f.push_instr(
        header,
        Instr::new(
            Some(c),
            Rhs::Cmp {
                op: CmpOp::Slt,
                lhs: Operand::Value(i),
                rhs: Operand::Const(IrConst::i32_(limit)),
            },
        ),
    )
    .unwrap();
    f.set_terminator(
        header,
        Terminator::CondBr {
            cond: Operand::Value(c),
            then_target: body,
            else_target: after,
        },
    )
    .unwrap();

    f.push_instr(
        body,
        Instr::new(
            Some(inext),
            Rhs::Arith {
                op: ArithOp::Add,
                lhs: Operand::Value(i),
                rhs: Operand::Const(IrConst::i32_(1)),
            },
        ),
    )
    .unwrap();
    f.set_terminator(body, Terminator::Jump { target: header })
        .unwrap();

    // The loop's result leaves through a join, one entry per unrolled
    // exit edge.
    f.push_phi(
        after,
        Phi {
            dest: iout,
            incoming: vec![(header, Operand::Value(i))],
            loc: None,
        },
    )
    .unwrap();
    f.push_instr(
        after,
        Instr::new(
            Some(g),
            Rhs::Cmp {
                op: CmpOp::Eq,
                lhs: Operand::Value(iout),
                rhs: Operand::Const(IrConst::i32_(limit)),
            },
        ),
    )
    .unwrap();
    f.set_terminator(
        after,
        Terminator::CondBr {
            cond: Operand::Value(g),
            then_target: err,
            else_target: ret,
        },
    )
    .unwrap();

    f.push_instr(err, error_call(Operand::Const(IrConst::i32_(7))))
        .unwrap();
    f.set_terminator(err, Terminator::Abort).unwrap();
    f.set_terminator(ret, Terminator::Return { value: None })
        .unwrap();
    f
}

fn assigned(trace_events: &[TraceEvent], variable: &str) -> Option<Literal> {
    trace_events.iter().find_map(|e| match e {
        TraceEvent::Assign {
            variable: v, value, ..
        } if v == variable => Some(*value),
        _ => None,
    })
}

// ---------------------------------------------------------------------------
// Straight-line programs
// ---------------------------------------------------------------------------

#[test]
fn straight_line_unreachable_error_is_safe() {
    let f = guarded_error(2, 1);
    let result = check(&f, BmcOptions::default()).unwrap();
    assert_eq!(result, SafetyResult::Success);
}

#[test]
fn straight_line_reachable_error_fails_with_code_and_trace() {
    let f = guarded_error(1, 42);
    let result = check(&f, BmcOptions::default()).unwrap();
    match result {
        SafetyResult::Fail { error_code, trace } => {
            assert_eq!(error_code, 42);
            // The assignment is recovered even though x was eliminated
            // from the formula.
            assert_eq!(
                assigned(&trace.events, "main/x"),
                Some(Literal::Bv { value: 1, width: 32 })
            );
            assert!(matches!(
                trace.events.last().unwrap(),
                TraceEvent::FunctionCall { name, .. } if name == ERROR_INTRINSIC
            ));
        }
        other => panic!("expected a counterexample, got {:?}", other),
    }
}

#[test]
fn elimination_off_gives_the_same_verdicts() {
    let options = BmcOptions {
        no_elim_vars: true,
        ..BmcOptions::default()
    };
    assert_eq!(
        check(&guarded_error(2, 1), options.clone()).unwrap(),
        SafetyResult::Success
    );
    match check(&guarded_error(1, 42), options).unwrap() {
        SafetyResult::Fail { error_code, .. } => assert_eq!(error_code, 42),
        other => panic!("expected a counterexample, got {:?}", other),
    }
}

#[test]
fn math_int_mode_gives_the_same_verdicts() {
    let options = BmcOptions {
        int_representation: IntRepresentation::MathInt,
        ..BmcOptions::default()
    };
    assert_eq!(
        check(&guarded_error(2, 1), options.clone()).unwrap(),
        SafetyResult::Success
    );
    match check(&guarded_error(1, 9), options).unwrap() {
        SafetyResult::Fail { error_code, trace } => {
            assert_eq!(error_code, 9);
            assert_eq!(assigned(&trace.events, "main/x"), Some(Literal::Int(1)));
        }
        other => panic!("expected a counterexample, got {:?}", other),
    }
}

// ---------------------------------------------------------------------------
// Uninitialized reads
// ---------------------------------------------------------------------------

/// `int x; if (x == 1) error(2); return 0;` with x read through a
/// havocked load.
#[test]
fn uninitialized_read_is_reachable_with_model_choice() {
    let mut f = Function::new("main");
    let entry = f.entry();
    let err = f.add_block("err");
    let ret = f.add_block("ret");

    let p = f.add_value(Some("p"), IrType::Ptr);
    let x = f.add_value(Some("x"), IrType::I32);
    let c = f.add_value(Some("c"), IrType::I1);

    f.push_instr(entry, Instr::new(Some(p), Rhs::Alloc)).unwrap();
    f.push_instr(
        entry,
        Instr::new(
            Some(x),
            Rhs::Load {
                ptr: Operand::Value(p),
            },
        ),
    )
    .unwrap();
    f.push_instr(
        entry,
        Instr::new(
            Some(c),
            Rhs::Cmp {
                op: CmpOp::Eq,
                lhs: Operand::Value(x),
                rhs: Operand::Const(IrConst::i32_(1)),
            },
        ),
    )
    .unwrap();
    f.set_terminator(
        entry,
        Terminator::CondBr {
            cond: Operand::Value(c),
            then_target: err,
            else_target: ret,
        },
    )
    .unwrap();
    f.push_instr(err, error_call(Operand::Const(IrConst::i32_(2))))
        .unwrap();
    f.set_terminator(err, Terminator::Abort).unwrap();
    f.set_terminator(ret, Terminator::Return { value: None })
        .unwrap();

    match check(&f, BmcOptions::default()).unwrap() {
        SafetyResult::Fail { error_code, trace } => {
            assert_eq!(error_code, 2);
            // The model had to choose x = 1 to reach the error.
            assert_eq!(
                assigned(&trace.events, "main/x"),
                Some(Literal::Bv { value: 1, width: 32 })
            );
        }
        other => panic!("expected a counterexample, got {:?}", other),
    }
}

/// The explicit-undef form additionally reports the undefined-behavior
/// point.
#[test]
fn undef_value_reports_undefined_behavior_event() {
    let mut f = Function::new("main");
    let entry = f.entry();
    let err = f.add_block("err");
    let ret = f.add_block("ret");

    let x = f.add_value(Some("x"), IrType::I32);
    let c = f.add_value(Some("c"), IrType::I1);

    f.push_instr(entry, Instr::new(Some(x), Rhs::Undef)).unwrap();
    f.push_instr(
        entry,
        Instr::new(
            Some(c),
            Rhs::Cmp {
                op: CmpOp::Eq,
                lhs: Operand::Value(x),
                rhs: Operand::Const(IrConst::i32_(1)),
            },
        ),
    )
    .unwrap();
    f.set_terminator(
        entry,
        Terminator::CondBr {
            cond: Operand::Value(c),
            then_target: err,
            else_target: ret,
        },
    )
    .unwrap();
    f.push_instr(err, error_call(Operand::Const(IrConst::i32_(3))))
        .unwrap();
    f.set_terminator(err, Terminator::Abort).unwrap();
    f.set_terminator(ret, Terminator::Return { value: None })
        .unwrap();

    // Keep the binding so the model records the choice for x itself.
    let options = BmcOptions {
        no_elim_vars: true,
        ..BmcOptions::default()
    };
    match check(&f, options).unwrap() {
        SafetyResult::Fail { trace, .. } => {
            assert!(trace
                .events
                .iter()
                .any(|e| matches!(e, TraceEvent::UndefinedBehavior { .. })));
            assert_eq!(
                assigned(&trace.events, "main/x"),
                Some(Literal::Bv { value: 1, width: 32 })
            );
        }
        other => panic!("expected a counterexample, got {:?}", other),
    }
}

// ---------------------------------------------------------------------------
// Loops against the bound
// ---------------------------------------------------------------------------

#[test]
fn loop_within_bound_reaches_the_error() {
    let f = counting_loop_then_error(5);
    let options = BmcOptions {
        bound: 6,
        ..BmcOptions::default()
    };
    match check(&f, options).unwrap() {
        SafetyResult::Fail { error_code, trace } => {
            assert_eq!(error_code, 7);
            // The loop result reached the limit.
            assert_eq!(
                assigned(&trace.events, "main/iout"),
                Some(Literal::Bv { value: 5, width: 32 })
            );
        }
        other => panic!("expected a counterexample, got {:?}", other),
    }
}

#[test]
fn loop_beyond_bound_is_safe_within_bound() {
    let f = counting_loop_then_error(5);
    let options = BmcOptions {
        bound: 3,
        ..BmcOptions::default()
    };
    assert_eq!(check(&f, options).unwrap(), SafetyResult::Success);
}

#[test]
fn bound_zero_never_enters_the_loop() {
    let f = counting_loop_then_error(5);
    let options = BmcOptions {
        bound: 0,
        ..BmcOptions::default()
    };
    assert_eq!(check(&f, options).unwrap(), SafetyResult::Success);
}

// ---------------------------------------------------------------------------
// Join disambiguation
// ---------------------------------------------------------------------------

/// Both arms assign x; the error requires the else-arm value. The trace
/// must follow the branch the model picked in the join's predecessor
/// variable.
#[test]
fn phi_disambiguation_follows_the_model() {
    let mut f = Function::new("main");
    let entry = f.entry();
    let a = f.add_block("a");
    let b = f.add_block("b");
    let join = f.add_block("join");
    let err = f.add_block("err");
    let ret = f.add_block("ret");

    let c = f.add_value(Some("c"), IrType::I1);
    let xa = f.add_value(Some("xa"), IrType::I32);
    let xb = f.add_value(Some("xb"), IrType::I32);
    let x = f.add_value(Some("x"), IrType::I32);
    let g = f.add_value(Some("g"), IrType::I1);

    f.push_instr(entry, Instr::new(Some(c), Rhs::Undef)).unwrap();
    f.set_terminator(
        entry,
        Terminator::CondBr {
            cond: Operand::Value(c),
            then_target: a,
            else_target: b,
        },
    )
    .unwrap();
    f.push_instr(a, Instr::new(Some(xa), Rhs::Const(IrConst::i32_(1))))
        .unwrap();
    f.set_terminator(a, Terminator::Jump { target: join }).unwrap();
    f.push_instr(b, Instr::new(Some(xb), Rhs::Const(IrConst::i32_(2))))
        .unwrap();
    f.set_terminator(b, Terminator::Jump { target: join }).unwrap();
    f.push_phi(
        join,
        Phi {
            dest: x,
            incoming: vec![(a, Operand::Value(xa)), (b, Operand::Value(xb))],
            loc: None,
        },
    )
    .unwrap();
    f.push_instr(
        join,
        Instr::new(
            Some(g),
            Rhs::Cmp {
                op: CmpOp::Eq,
                lhs: Operand::Value(x),
                rhs: Operand::Const(IrConst::i32_(2)),
            },
        ),
    )
    .unwrap();
    f.set_terminator(
        join,
        Terminator::CondBr {
            cond: Operand::Value(g),
            then_target: err,
            else_target: ret,
        },
    )
    .unwrap();
    f.push_instr(err, error_call(Operand::Const(IrConst::i32_(11))))
        .unwrap();
    f.set_terminator(err, Terminator::Abort).unwrap();
    f.set_terminator(ret, Terminator::Return { value: None })
        .unwrap();

    match check(&f, BmcOptions::default()).unwrap() {
        SafetyResult::Fail { error_code, trace } => {
            assert_eq!(error_code, 11);
            // Only the else arm can justify x == 2.
            assert_eq!(
                assigned(&trace.events, "main/xb"),
                Some(Literal::Bv { value: 2, width: 32 })
            );
            assert_eq!(assigned(&trace.events, "main/xa"), None);
            assert_eq!(
                assigned(&trace.events, "main/x"),
                Some(Literal::Bv { value: 2, width: 32 })
            );
        }
        other => panic!("expected a counterexample, got {:?}", other),
    }
}

// ---------------------------------------------------------------------------
// Error codes, boundaries, determinism
// ---------------------------------------------------------------------------

/// The error code may be a run-time value; it is read back from the model.
#[test]
fn symbolic_error_code_is_read_from_the_model() {
    let mut f = Function::new("main");
    let entry = f.entry();
    let err = f.add_block("err");
    let ret = f.add_block("ret");

    let p = f.add_value(Some("p"), IrType::Ptr);
    let v = f.add_value(Some("v"), IrType::I32);
    let c = f.add_value(Some("c"), IrType::I1);

    f.push_instr(entry, Instr::new(Some(p), Rhs::Alloc)).unwrap();
    f.push_instr(
        entry,
        Instr::new(
            Some(v),
            Rhs::Load {
                ptr: Operand::Value(p),
            },
        ),
    )
    .unwrap();
    f.push_instr(
        entry,
        Instr::new(
            Some(c),
            Rhs::Cmp {
                op: CmpOp::Eq,
                lhs: Operand::Value(v),
                rhs: Operand::Const(IrConst::i32_(13)),
            },
        ),
    )
    .unwrap();
    f.set_terminator(
        entry,
        Terminator::CondBr {
            cond: Operand::Value(c),
            then_target: err,
            else_target: ret,
        },
    )
    .unwrap();
    f.push_instr(err, error_call(Operand::Value(v))).unwrap();
    f.set_terminator(err, Terminator::Abort).unwrap();
    f.set_terminator(ret, Terminator::Return { value: None })
        .unwrap();

    match check(&f, BmcOptions::default()).unwrap() {
        SafetyResult::Fail { error_code, .. } => assert_eq!(error_code, 13),
        other => panic!("expected a counterexample, got {:?}", other),
    }
}

#[test]
fn empty_error_set_returns_success() {
    let mut f = Function::new("main");
    let ret = f.add_block("ret");
    f.set_terminator(f.entry(), Terminator::Jump { target: ret })
        .unwrap();
    f.set_terminator(ret, Terminator::Return { value: None })
        .unwrap();
    assert_eq!(check(&f, BmcOptions::default()).unwrap(), SafetyResult::Success);
}

/// Two free values compared with each other fall outside the propagation
/// solver's fragment; the run surfaces the solver report instead of
/// claiming safety.
#[test]
fn undecidable_formula_surfaces_the_solver_report() {
    let mut f = Function::new("main");
    let entry = f.entry();
    let err = f.add_block("err");
    let ret = f.add_block("ret");

    let pa = f.add_value(Some("pa"), IrType::Ptr);
    let pb = f.add_value(Some("pb"), IrType::Ptr);
    let a = f.add_value(Some("a"), IrType::I32);
    let b = f.add_value(Some("b"), IrType::I32);
    let c = f.add_value(Some("c"), IrType::I1);

    f.push_instr(entry, Instr::new(Some(pa), Rhs::Alloc)).unwrap();
    f.push_instr(entry, Instr::new(Some(pb), Rhs::Alloc)).unwrap();
    f.push_instr(
        entry,
        Instr::new(
            Some(a),
            Rhs::Load {
                ptr: Operand::Value(pa),
            },
        ),
    )
    .unwrap();
    f.push_instr(
        entry,
        Instr::new(
            Some(b),
            Rhs::Load {
                ptr: Operand::Value(pb),
            },
        ),
    )
    .unwrap();
    f.push_instr(
        entry,
        Instr::new(
            Some(c),
            Rhs::Cmp {
                op: CmpOp::Slt,
                lhs: Operand::Value(a),
                rhs: Operand::Value(b),
            },
        ),
    )
    .unwrap();
    f.set_terminator(
        entry,
        Terminator::CondBr {
            cond: Operand::Value(c),
            then_target: err,
            else_target: ret,
        },
    )
    .unwrap();
    f.push_instr(err, error_call(Operand::Const(IrConst::i32_(1))))
        .unwrap();
    f.set_terminator(err, Terminator::Abort).unwrap();
    f.set_terminator(ret, Terminator::Return { value: None })
        .unwrap();

    assert!(matches!(
        check(&f, BmcOptions::default()),
        Err(BmcError::Solver(_))
    ));
}

#[test]
fn verdict_and_trace_are_deterministic_across_runs() {
    let f = counting_loop_then_error(5);
    let options = BmcOptions {
        bound: 6,
        ..BmcOptions::default()
    };
    let first = check(&f, options.clone()).unwrap();
    let second = check(&f, options).unwrap();
    assert_eq!(first, second);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Unwinding faithfulness: the error after a `limit`-iteration loop
    /// needs `limit + 1` header entries, so the verdict flips exactly at
    /// that bound.
    #[test]
    fn loop_verdict_flips_exactly_at_the_bound(limit in 0i32..5, bound in 0u32..8) {
        let f = counting_loop_then_error(limit);
        let options = BmcOptions { bound, ..BmcOptions::default() };
        let result = check(&f, options).unwrap();
        if bound > limit as u32 {
            prop_assert!(result.is_fail(), "bound {} limit {}", bound, limit);
        } else {
            prop_assert!(result.is_success(), "bound {} limit {}", bound, limit);
        }
    }
}
