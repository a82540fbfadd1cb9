//! Block-stack behavior: except and finally handlers, with-statements, and
//! break/continue/return crossing finally blocks.

use std::rc::Rc;

use coil::{CodeBuilder, CompareOp, ExcType, Exception, Label, Namespace, NoLimitTracker, NoopTracer, Opcode, Value, Vm};
use pretty_assertions::assert_eq;

fn run_module(builder: CodeBuilder) -> Result<Value, Exception> {
    let mut vm = Vm::new(NoLimitTracker::new(), NoopTracer);
    vm.run(Rc::new(builder.build()), Namespace::new(), None)
}

/// Emits `raise <exc_type>(<msg>)`.
fn raise(builder: &mut CodeBuilder, exc_type: &str, msg: &str) {
    builder.name_op(Opcode::LoadName, exc_type).load_const(msg).call(1, 0);
    builder.emit_arg(Opcode::RaiseVarargs, 1);
}

/// Emits the head of an `except <exc_type> as <name>:` clause at the handler
/// entry. Jumps to `no_match` when the clause does not apply.
fn except_clause(builder: &mut CodeBuilder, exc_type: &str, name: &str, no_match: Label) {
    builder.emit(Opcode::DupTop).name_op(Opcode::LoadName, exc_type);
    builder.compare(CompareOp::ExceptionMatch).jump(Opcode::PopJumpIfFalse, no_match);
    builder.emit(Opcode::PopTop).name_op(Opcode::StoreName, name).emit(Opcode::PopTop);
}

/// `try: raise <raised>("k") except <caught> as e: pass` then `return e.args`.
fn try_except(raised: &str, caught: &str) -> CodeBuilder {
    let mut module = CodeBuilder::new("<module>");
    let (handler, no_match, done) = (module.new_label(), module.new_label(), module.new_label());
    module.jump(Opcode::SetupExcept, handler);
    raise(&mut module, raised, "k");
    module.emit(Opcode::PopBlock).jump(Opcode::JumpForward, done);
    module.bind(handler);
    except_clause(&mut module, caught, "e", no_match);
    module.emit(Opcode::PopExcept).jump(Opcode::JumpForward, done);
    module.bind(no_match).emit(Opcode::EndFinally);
    module.bind(done).name_op(Opcode::LoadName, "e").name_op(Opcode::LoadAttr, "args");
    module.emit(Opcode::ReturnValue);
    module
}

#[test]
fn except_catches_subclasses_of_the_clause() {
    let result = run_module(try_except("KeyError", "LookupError")).unwrap();
    assert_eq!(result, Value::new_tuple(vec![Value::from("k")]));
}

#[test]
fn non_matching_clause_reraises() {
    let err = run_module(try_except("KeyError", "ValueError")).unwrap_err();
    assert!(err.is(ExcType::KeyError));
    assert_eq!(err.message(), "k");
}

#[test]
fn bare_raise_reraises_the_handled_exception() {
    let mut module = CodeBuilder::new("<module>");
    let handler = module.new_label();
    module.jump(Opcode::SetupExcept, handler);
    raise(&mut module, "TypeError", "first");
    module.bind(handler);
    module.emit_arg(Opcode::RaiseVarargs, 0);
    let err = run_module(module).unwrap_err();
    assert!(err.is(ExcType::TypeError));
    assert_eq!(err.message(), "first");

    let mut module = CodeBuilder::new("<module>");
    module.emit_arg(Opcode::RaiseVarargs, 0);
    let err = run_module(module).unwrap_err();
    assert!(err.is(ExcType::RuntimeError));
    assert_eq!(err.message(), "No active exception to reraise");
}

#[test]
fn raise_from_sets_the_cause() {
    let mut module = CodeBuilder::new("<module>");
    let (handler, no_match, done) = (module.new_label(), module.new_label(), module.new_label());
    module.jump(Opcode::SetupExcept, handler);
    module.name_op(Opcode::LoadName, "ValueError").load_const("outer").call(1, 0);
    module.name_op(Opcode::LoadName, "KeyError").load_const("inner").call(1, 0);
    module.emit_arg(Opcode::RaiseVarargs, 2);
    module.bind(handler);
    except_clause(&mut module, "ValueError", "e", no_match);
    module.emit(Opcode::PopExcept).jump(Opcode::JumpForward, done);
    module.bind(no_match).emit(Opcode::EndFinally);
    module.bind(done).name_op(Opcode::LoadName, "e").name_op(Opcode::LoadAttr, "__cause__");
    module.emit(Opcode::ReturnValue);
    let cause = run_module(module).unwrap();
    assert_eq!(cause.py_type_name(), "KeyError");
    assert_eq!(cause.exception_message(), "inner");
}

#[test]
fn user_exception_classes_are_caught_by_their_base() {
    let mut module = CodeBuilder::new("<module>");
    let mut body = CodeBuilder::new("AppError");
    body.load_none().emit(Opcode::ReturnValue);
    module.load_const(body.build()).load_const("AppError").emit_arg(Opcode::MakeFunction, 0);
    module.load_const("AppError").name_op(Opcode::LoadName, "ValueError");
    module.emit_arg(Opcode::BuildClass, 1).name_op(Opcode::StoreName, "AppError");

    let (handler, no_match, done) = (module.new_label(), module.new_label(), module.new_label());
    module.jump(Opcode::SetupExcept, handler);
    raise(&mut module, "AppError", "disk full");
    module.bind(handler);
    except_clause(&mut module, "ValueError", "e", no_match);
    module.emit(Opcode::PopExcept).jump(Opcode::JumpForward, done);
    module.bind(no_match).emit(Opcode::EndFinally);
    module.bind(done).name_op(Opcode::LoadName, "e").emit(Opcode::ReturnValue);

    let caught = run_module(module).unwrap();
    assert_eq!(caught.py_type_name(), "AppError");
    assert_eq!(caught.exception_message(), "disk full");
}

#[test]
fn finally_runs_before_a_return_completes() {
    let mut f = CodeBuilder::new("f");
    let fin = f.new_label();
    f.jump(Opcode::SetupFinally, fin);
    f.load_const(1).emit(Opcode::ReturnValue);
    f.emit(Opcode::PopBlock).load_none();
    f.bind(fin).load_const("ran").name_op(Opcode::StoreGlobal, "flag");
    f.emit(Opcode::EndFinally);
    f.load_none().emit(Opcode::ReturnValue);

    let mut module = CodeBuilder::new("<module>");
    module.load_const(f.build()).load_const("f").emit_arg(Opcode::MakeFunction, 0).call(0, 0);
    module.name_op(Opcode::LoadName, "flag").emit_arg(Opcode::BuildTuple, 2);
    module.emit(Opcode::ReturnValue);
    assert_eq!(
        run_module(module).unwrap(),
        Value::new_tuple(vec![Value::Int(1), Value::from("ran")])
    );
}

#[test]
fn finally_runs_while_an_exception_propagates() {
    let mut module = CodeBuilder::new("<module>");
    let fin = module.new_label();
    module.jump(Opcode::SetupFinally, fin);
    raise(&mut module, "ValueError", "boom");
    module.emit(Opcode::PopBlock).load_none();
    module.bind(fin).load_const(1).name_op(Opcode::StoreName, "cleaned");
    module.emit(Opcode::EndFinally);
    module.load_none().emit(Opcode::ReturnValue);

    let mut vm = Vm::new(NoLimitTracker::new(), NoopTracer);
    let globals = Namespace::new();
    let err = vm.run(Rc::new(module.build()), globals.clone(), None).unwrap_err();
    assert!(err.is(ExcType::ValueError));
    assert_eq!(globals.get("cleaned"), Some(Value::Int(1)));
}

#[test]
fn raise_in_finally_replaces_the_propagating_exception() {
    let mut module = CodeBuilder::new("<module>");
    let fin = module.new_label();
    module.jump(Opcode::SetupFinally, fin);
    raise(&mut module, "ValueError", "try");
    module.emit(Opcode::PopBlock).load_none();
    module.bind(fin);
    raise(&mut module, "KeyError", "fin");
    module.emit(Opcode::EndFinally);
    module.load_none().emit(Opcode::ReturnValue);

    let err = run_module(module).unwrap_err();
    assert!(err.is(ExcType::KeyError));
    assert!(!err.is(ExcType::ValueError));
    assert_eq!(err.message(), "fin");
}

#[test]
fn return_in_finally_discards_the_propagating_exception() {
    let mut f = CodeBuilder::new("f");
    let fin = f.new_label();
    f.jump(Opcode::SetupFinally, fin);
    raise(&mut f, "ValueError", "lost");
    f.emit(Opcode::PopBlock).load_none();
    f.bind(fin).load_const(42).emit(Opcode::ReturnValue);
    f.emit(Opcode::EndFinally);
    f.load_none().emit(Opcode::ReturnValue);

    let mut module = CodeBuilder::new("<module>");
    module.load_const(f.build()).load_const("f").emit_arg(Opcode::MakeFunction, 0).call(0, 0);
    module.emit(Opcode::ReturnValue);
    assert_eq!(run_module(module).unwrap(), Value::Int(42));
}

#[test]
fn break_runs_enclosing_finally() {
    let mut module = CodeBuilder::new("<module>");
    let (top, fin, end) = (module.new_label(), module.new_label(), module.new_label());
    module.load_const(0).name_op(Opcode::StoreName, "n");
    module.jump(Opcode::SetupLoop, end);
    module.bind(top).jump(Opcode::SetupFinally, fin);
    module.emit(Opcode::BreakLoop);
    module.emit(Opcode::PopBlock).load_none();
    module.bind(fin).name_op(Opcode::LoadName, "n").load_const(1).emit(Opcode::InplaceAdd);
    module.name_op(Opcode::StoreName, "n").emit(Opcode::EndFinally);
    module.jump(Opcode::JumpAbsolute, top);
    module.emit(Opcode::PopBlock);
    module.bind(end).name_op(Opcode::LoadName, "n").emit(Opcode::ReturnValue);
    assert_eq!(run_module(module).unwrap(), Value::Int(1));
}

#[test]
fn continue_runs_enclosing_finally_and_keeps_the_loop() {
    let mut module = CodeBuilder::new("<module>");
    let (top, fin, exit, end) = (
        module.new_label(),
        module.new_label(),
        module.new_label(),
        module.new_label(),
    );
    module.load_const(0).name_op(Opcode::StoreName, "i");
    module.load_const(0).name_op(Opcode::StoreName, "hits");
    module.jump(Opcode::SetupLoop, end);
    module.bind(top).name_op(Opcode::LoadName, "i").load_const(3).compare(CompareOp::Lt);
    module.jump(Opcode::PopJumpIfFalse, exit);
    module.name_op(Opcode::LoadName, "i").load_const(1).emit(Opcode::InplaceAdd);
    module.name_op(Opcode::StoreName, "i");
    module.jump(Opcode::SetupFinally, fin);
    module.jump(Opcode::ContinueLoop, top);
    module.emit(Opcode::PopBlock).load_none();
    module.bind(fin).name_op(Opcode::LoadName, "hits").load_const(1).emit(Opcode::InplaceAdd);
    module.name_op(Opcode::StoreName, "hits").emit(Opcode::EndFinally);
    module.jump(Opcode::JumpAbsolute, top);
    module.bind(exit).emit(Opcode::PopBlock);
    module.bind(end).name_op(Opcode::LoadName, "hits").emit(Opcode::ReturnValue);
    assert_eq!(run_module(module).unwrap(), Value::Int(3));
}

/// A context manager class whose `__exit__` records the exception type it saw
/// in the global `seen` and returns `suppress`.
fn manager_class(module: &mut CodeBuilder, suppress: bool) {
    let mut enter = CodeBuilder::new("__enter__");
    enter.params(&["self"]);
    enter.load_const("entered").emit(Opcode::ReturnValue);

    let mut exit = CodeBuilder::new("__exit__");
    exit.params(&["self", "exc_type", "exc", "tb"]);
    exit.local_op(Opcode::LoadFast, "exc_type").name_op(Opcode::StoreGlobal, "seen");
    exit.load_const(suppress).emit(Opcode::ReturnValue);

    let mut body = CodeBuilder::new("Manager");
    for (name, code) in [("__enter__", enter), ("__exit__", exit)] {
        body.load_const(code.build()).load_const(name).emit_arg(Opcode::MakeFunction, 0);
        body.name_op(Opcode::StoreName, name);
    }
    body.load_none().emit(Opcode::ReturnValue);

    module.load_const(body.build()).load_const("Manager").emit_arg(Opcode::MakeFunction, 0);
    module.load_const("Manager").emit_arg(Opcode::BuildClass, 0);
    module.name_op(Opcode::StoreName, "Manager");
}

/// `with Manager() as entered: <raise ValueError if raising>`, then returns
/// `(entered, seen)`.
fn with_statement(suppress: bool, raising: bool) -> CodeBuilder {
    let mut module = CodeBuilder::new("<module>");
    manager_class(&mut module, suppress);
    let cleanup = module.new_label();
    module.name_op(Opcode::LoadName, "Manager").call(0, 0);
    module.jump(Opcode::SetupWith, cleanup);
    module.name_op(Opcode::StoreName, "entered");
    if raising {
        module.name_op(Opcode::LoadName, "ValueError").emit_arg(Opcode::RaiseVarargs, 1);
    }
    module.emit(Opcode::PopBlock).load_none();
    module.bind(cleanup).emit(Opcode::WithCleanup).emit(Opcode::EndFinally);
    module.name_op(Opcode::LoadName, "entered").name_op(Opcode::LoadName, "seen");
    module.emit_arg(Opcode::BuildTuple, 2).emit(Opcode::ReturnValue);
    module
}

#[test]
fn with_calls_exit_with_nones_on_normal_completion() {
    let result = run_module(with_statement(false, false)).unwrap();
    assert_eq!(result, Value::new_tuple(vec![Value::from("entered"), Value::None]));
}

#[test]
fn with_exit_returning_true_suppresses_the_exception() {
    let result = run_module(with_statement(true, true)).unwrap();
    assert_eq!(
        result,
        Value::new_tuple(vec![Value::from("entered"), Value::ExcType(ExcType::ValueError)])
    );
}

#[test]
fn with_exit_returning_false_lets_the_exception_propagate() {
    let mut vm = Vm::new(NoLimitTracker::new(), NoopTracer);
    let globals = Namespace::new();
    let err = vm
        .run(Rc::new(with_statement(false, true).build()), globals.clone(), None)
        .unwrap_err();
    assert!(err.is(ExcType::ValueError));
    assert_eq!(globals.get("seen"), Some(Value::ExcType(ExcType::ValueError)));
    assert_eq!(vm.frame_depth(), 0);
}

#[test]
fn return_inside_with_calls_exit_first() {
    let mut f = CodeBuilder::new("f");
    let cleanup = f.new_label();
    f.name_op(Opcode::LoadGlobal, "Manager").call(0, 0);
    f.jump(Opcode::SetupWith, cleanup);
    f.emit(Opcode::ReturnValue);
    f.emit(Opcode::PopBlock).load_none();
    f.bind(cleanup).emit(Opcode::WithCleanup).emit(Opcode::EndFinally);
    f.load_none().emit(Opcode::ReturnValue);

    let mut module = CodeBuilder::new("<module>");
    module.load_const("unset").name_op(Opcode::StoreName, "seen");
    manager_class(&mut module, false);
    module.load_const(f.build()).load_const("f").emit_arg(Opcode::MakeFunction, 0).call(0, 0);
    module.name_op(Opcode::LoadName, "seen").emit_arg(Opcode::BuildTuple, 2);
    module.emit(Opcode::ReturnValue);
    assert_eq!(
        run_module(module).unwrap(),
        Value::new_tuple(vec![Value::from("entered"), Value::None])
    );
}
