//! Resource limits and execution tracing.

use std::rc::Rc;

use coil::{
    CodeBuilder, CompareOp, ExcType, LimitedTracker, Namespace, NoLimitTracker, NoopTracer, Opcode, RecordingTracer,
    ResourceLimits, ResourceTracker, TraceEvent, Value, Vm,
};
use pretty_assertions::assert_eq;

/// `def f(n): return f(n + 1)`
fn runaway() -> CodeBuilder {
    let mut code = CodeBuilder::new("f");
    code.params(&["n"]);
    code.name_op(Opcode::LoadGlobal, "f").local_op(Opcode::LoadFast, "n").load_const(1);
    code.emit(Opcode::BinaryAdd).call(1, 0).emit(Opcode::ReturnValue);
    code
}

#[test]
fn recursion_error_is_catchable() {
    let mut module = CodeBuilder::new("<module>");
    module.load_const(runaway().build()).load_const("f").emit_arg(Opcode::MakeFunction, 0);
    module.name_op(Opcode::StoreName, "f");
    let (handler, no_match) = (module.new_label(), module.new_label());
    module.jump(Opcode::SetupExcept, handler);
    module.name_op(Opcode::LoadName, "f").load_const(0).call(1, 0).emit(Opcode::ReturnValue);
    module.bind(handler).emit(Opcode::DupTop).name_op(Opcode::LoadName, "RecursionError");
    module.compare(CompareOp::ExceptionMatch).jump(Opcode::PopJumpIfFalse, no_match);
    module.emit(Opcode::PopTop).emit(Opcode::PopTop).emit(Opcode::PopTop);
    module.load_const("too deep").emit(Opcode::ReturnValue);
    module.bind(no_match).emit(Opcode::EndFinally);
    module.load_none().emit(Opcode::ReturnValue);

    let mut vm = Vm::new(NoLimitTracker::with_recursion_limit(20), NoopTracer);
    let result = vm.run(Rc::new(module.build()), Namespace::new(), None).unwrap();
    assert_eq!(result, Value::from("too deep"));
    assert_eq!(vm.frame_depth(), 0);
}

#[test]
fn uncaught_recursion_error_carries_the_whole_traceback() {
    let mut module = CodeBuilder::new("<module>");
    module.load_const(runaway().build()).load_const("f").emit_arg(Opcode::MakeFunction, 0);
    module.name_op(Opcode::StoreName, "f");
    module.name_op(Opcode::LoadName, "f").load_const(0).call(1, 0).emit(Opcode::ReturnValue);

    let mut vm = Vm::new(NoLimitTracker::with_recursion_limit(5), NoopTracer);
    let err = vm.run(Rc::new(module.build()), Namespace::new(), None).unwrap_err();
    assert!(err.is(ExcType::RecursionError));
    assert!(!err.is_uncatchable());
    assert_eq!(err.message(), "maximum recursion depth exceeded");
    // <module> plus the four nested f frames that fit under the limit
    assert_eq!(err.traceback().len(), 5);
}

#[test]
fn operation_budget_skips_every_handler() {
    let mut module = CodeBuilder::new("<module>");
    let (handler, top) = (module.new_label(), module.new_label());
    module.jump(Opcode::SetupExcept, handler);
    module.bind(top).jump(Opcode::JumpAbsolute, top);
    module.bind(handler).emit(Opcode::PopTop).emit(Opcode::PopTop).emit(Opcode::PopTop);
    module.load_const("caught").emit(Opcode::ReturnValue);

    let tracker = LimitedTracker::new(ResourceLimits::new().max_operations(100));
    let mut vm = Vm::new(tracker, NoopTracer);
    let err = vm.run(Rc::new(module.build()), Namespace::new(), None).unwrap_err();
    assert!(err.is(ExcType::TimeoutError));
    assert!(err.is_uncatchable());
    assert_eq!(vm.tracker().operation_count(), Some(101));
    assert_eq!(vm.frame_depth(), 0);
}

#[test]
fn tracer_sees_calls_returns_and_unwinds() {
    let mut f = CodeBuilder::new("f");
    f.load_const(1).emit(Opcode::ReturnValue);
    let mut module = CodeBuilder::new("<module>");
    module.load_const(f.build()).load_const("f").emit_arg(Opcode::MakeFunction, 0);
    module.name_op(Opcode::StoreName, "f");
    module.name_op(Opcode::LoadName, "f").call(0, 0).emit(Opcode::ReturnValue);

    let mut vm = Vm::new(NoLimitTracker::new(), RecordingTracer::new());
    let result = vm.run(Rc::new(module.build()), Namespace::new(), None).unwrap();
    assert_eq!(result, Value::Int(1));

    let events: Vec<TraceEvent> = vm
        .tracer()
        .events()
        .iter()
        .filter(|event| !matches!(event, TraceEvent::Instruction { .. }))
        .cloned()
        .collect();
    assert_eq!(
        events,
        vec![
            TraceEvent::Call {
                name: "<module>".to_owned(),
                depth: 1
            },
            TraceEvent::MakeFunction {
                cell_count: 0,
                defaults_count: 0
            },
            TraceEvent::Call {
                name: "f".to_owned(),
                depth: 2
            },
            TraceEvent::Unwind {
                why: "return",
                block_depth: 0
            },
            TraceEvent::Return { depth: 1 },
            TraceEvent::Unwind {
                why: "return",
                block_depth: 0
            },
            TraceEvent::Return { depth: 0 },
        ]
    );
}

#[test]
fn instruction_events_record_offsets_and_stack_depth() {
    let mut module = CodeBuilder::new("<module>");
    module.load_const(2).load_const(3).emit(Opcode::BinaryAdd).emit(Opcode::ReturnValue);

    let mut vm = Vm::new(NoLimitTracker::new(), RecordingTracer::new());
    vm.run(Rc::new(module.build()), Namespace::new(), None).unwrap();
    let instructions: Vec<(usize, Opcode, usize)> = vm
        .tracer()
        .events()
        .iter()
        .filter_map(|event| match event {
            TraceEvent::Instruction {
                ip,
                opcode,
                stack_depth,
            } => Some((*ip, *opcode, *stack_depth)),
            _ => None,
        })
        .collect();
    assert_eq!(
        instructions,
        vec![
            (0, Opcode::LoadConst, 0),
            (3, Opcode::LoadConst, 1),
            (6, Opcode::BinaryAdd, 2),
            (7, Opcode::ReturnValue, 1),
        ]
    );
}
