//! End-to-end execution of assembled code units: names, operators, loops,
//! calls, closures, classes, imports and host interop.

use std::rc::Rc;

use coil::{
    CodeBuilder, CollectStringPrint, CompareOp, ExcType, Exception, HostFunction, Module, Namespace, NoLimitTracker,
    NoopTracer, Opcode, StackFrame, Value, Vm,
};
use pretty_assertions::assert_eq;

fn run_module(builder: CodeBuilder) -> Result<Value, Exception> {
    let mut vm = Vm::new(NoLimitTracker::new(), NoopTracer);
    vm.run(Rc::new(builder.build()), Namespace::new(), None)
}

fn no_args() -> Vec<Value> {
    Vec::new()
}

fn no_kwargs() -> Vec<(&'static str, Value)> {
    Vec::new()
}

/// `def f(a, b=10): return a - b`
fn sub_function() -> CodeBuilder {
    let mut f = CodeBuilder::new("f");
    f.params(&["a", "b"]);
    f.local_op(Opcode::LoadFast, "a").local_op(Opcode::LoadFast, "b");
    f.emit(Opcode::BinarySubtract).emit(Opcode::ReturnValue);
    f
}

/// Module code that defines `f` from [`sub_function`] and returns it.
fn define_sub() -> CodeBuilder {
    let mut module = CodeBuilder::new("<module>");
    module.load_const(10).load_const(sub_function().build()).load_const("f");
    module.emit_arg(Opcode::MakeFunction, 1).emit(Opcode::ReturnValue);
    module
}

#[test]
fn integer_division_rounds_towards_negative_infinity() {
    let mut module = CodeBuilder::new("<module>");
    module.load_const(7).load_const(-2).emit(Opcode::BinaryFloorDivide);
    module.load_const(-7).load_const(3).emit(Opcode::BinaryModulo);
    module.emit_arg(Opcode::BuildTuple, 2).emit(Opcode::ReturnValue);
    assert_eq!(
        run_module(module).unwrap(),
        Value::new_tuple(vec![Value::Int(-4), Value::Int(2)])
    );
}

#[test]
fn unsupported_operands_raise_type_error() {
    let mut module = CodeBuilder::new("<module>");
    module.load_const(1).load_const("a").emit(Opcode::BinaryAdd).emit(Opcode::ReturnValue);
    let err = run_module(module).unwrap_err();
    assert!(err.is(ExcType::TypeError));
    assert_eq!(err.message(), "unsupported operand type(s) for +: 'int' and 'str'");
}

#[test]
fn for_loop_sums_a_range() {
    let mut module = CodeBuilder::new("<module>");
    let (top, cleanup, end) = (module.new_label(), module.new_label(), module.new_label());
    module.load_const(0).name_op(Opcode::StoreName, "total");
    module.jump(Opcode::SetupLoop, end);
    module.name_op(Opcode::LoadName, "range").load_const(5).call(1, 0).emit(Opcode::GetIter);
    module.bind(top).jump(Opcode::ForIter, cleanup);
    module.name_op(Opcode::StoreName, "i");
    module.name_op(Opcode::LoadName, "total").name_op(Opcode::LoadName, "i");
    module.emit(Opcode::InplaceAdd).name_op(Opcode::StoreName, "total");
    module.jump(Opcode::JumpAbsolute, top);
    module.bind(cleanup).emit(Opcode::PopBlock);
    module.bind(end).name_op(Opcode::LoadName, "total").emit(Opcode::ReturnValue);
    assert_eq!(run_module(module).unwrap(), Value::Int(10));
}

#[test]
fn break_leaves_the_loop_at_its_exit() {
    let mut module = CodeBuilder::new("<module>");
    let (top, body, end) = (module.new_label(), module.new_label(), module.new_label());
    module.load_const(0).name_op(Opcode::StoreName, "n");
    module.jump(Opcode::SetupLoop, end);
    module.bind(top).name_op(Opcode::LoadName, "n").load_const(3).compare(CompareOp::Eq);
    module.jump(Opcode::PopJumpIfFalse, body);
    module.emit(Opcode::BreakLoop);
    module.bind(body).name_op(Opcode::LoadName, "n").load_const(1).emit(Opcode::InplaceAdd);
    module.name_op(Opcode::StoreName, "n").jump(Opcode::JumpAbsolute, top);
    module.emit(Opcode::PopBlock);
    module.bind(end).name_op(Opcode::LoadName, "n").emit(Opcode::ReturnValue);
    assert_eq!(run_module(module).unwrap(), Value::Int(3));
}

#[test]
fn unpacking_assigns_in_order() {
    let mut module = CodeBuilder::new("<module>");
    module.load_const(1).load_const(2).emit_arg(Opcode::BuildList, 2);
    module.emit_arg(Opcode::UnpackSequence, 2);
    module.name_op(Opcode::StoreName, "a").name_op(Opcode::StoreName, "b");
    module.name_op(Opcode::LoadName, "b").name_op(Opcode::LoadName, "a");
    module.emit_arg(Opcode::BuildTuple, 2).emit(Opcode::ReturnValue);
    assert_eq!(
        run_module(module).unwrap(),
        Value::new_tuple(vec![Value::Int(2), Value::Int(1)])
    );

    let mut module = CodeBuilder::new("<module>");
    module.load_const(1).emit_arg(Opcode::BuildTuple, 1);
    module.emit_arg(Opcode::UnpackSequence, 2).load_none().emit(Opcode::ReturnValue);
    let err = run_module(module).unwrap_err();
    assert_eq!(err.message(), "not enough values to unpack (expected 2, got 1)");
}

#[test]
fn dict_literals_and_subscripts() {
    let mut module = CodeBuilder::new("<module>");
    module.load_const("a").load_const(1).load_const("b").load_const(2);
    module.emit_arg(Opcode::BuildMap, 2).name_op(Opcode::StoreName, "d");
    module.load_const(3).name_op(Opcode::LoadName, "d").load_const("c").emit(Opcode::StoreSubscr);
    module.name_op(Opcode::LoadName, "d").load_const("c").emit(Opcode::BinarySubscr);
    module.emit(Opcode::ReturnValue);
    assert_eq!(run_module(module).unwrap(), Value::Int(3));

    let mut module = CodeBuilder::new("<module>");
    module.emit_arg(Opcode::BuildMap, 0).load_const("missing").emit(Opcode::BinarySubscr);
    module.emit(Opcode::ReturnValue);
    assert!(run_module(module).unwrap_err().is(ExcType::KeyError));
}

#[test]
fn defaults_and_keywords_bind_to_parameters() {
    let mut module = CodeBuilder::new("<module>");
    module.load_const(10).load_const(sub_function().build()).load_const("f");
    module.emit_arg(Opcode::MakeFunction, 1).name_op(Opcode::StoreName, "f");
    module.name_op(Opcode::LoadName, "f").load_const(1).call(1, 0);
    module.name_op(Opcode::LoadName, "f");
    module.load_const("b").load_const(1).load_const("a").load_const(5).call(0, 2);
    module.emit_arg(Opcode::BuildTuple, 2).emit(Opcode::ReturnValue);
    assert_eq!(
        run_module(module).unwrap(),
        Value::new_tuple(vec![Value::Int(-9), Value::Int(4)])
    );
}

#[test]
fn binding_errors_name_the_function() {
    let mut vm = Vm::new(NoLimitTracker::new(), NoopTracer);
    let f = vm.run(Rc::new(define_sub().build()), Namespace::new(), None).unwrap();

    let err = vm.call(&f, no_args(), no_kwargs()).unwrap_err();
    assert_eq!(err.message(), "f() missing 1 required positional argument: 'a'");

    let err = vm.call(&f, [Value::Int(1), Value::Int(2), Value::Int(3)], no_kwargs()).unwrap_err();
    assert_eq!(err.message(), "f() takes 2 positional arguments but 3 were given");

    let err = vm.call(&f, [Value::Int(1)], [("a", Value::Int(2))]).unwrap_err();
    assert_eq!(err.message(), "f() got multiple values for argument 'a'");

    let err = vm.call(&f, [Value::Int(1)], [("c", Value::Int(2))]).unwrap_err();
    assert!(err.is(ExcType::TypeError));
    assert_eq!(err.message(), "f() got an unexpected keyword argument 'c'");

    assert_eq!(vm.call(&f, [Value::Int(1)], [("b", Value::Int(4))]).unwrap(), Value::Int(-3));
    assert_eq!(vm.frame_depth(), 0);
}

#[test]
fn binding_errors_leave_the_callee_unentered() {
    let mut f = CodeBuilder::new("f");
    f.params(&["a"]);
    f.load_const(true).name_op(Opcode::StoreGlobal, "entered");
    f.local_op(Opcode::LoadFast, "a").emit(Opcode::ReturnValue);
    let mut module = CodeBuilder::new("<module>");
    module.load_const(f.build()).load_const("f").emit_arg(Opcode::MakeFunction, 0);
    module.emit(Opcode::ReturnValue);

    let globals = Namespace::new();
    let mut vm = Vm::new(NoLimitTracker::new(), NoopTracer);
    let f = vm.run(Rc::new(module.build()), globals.clone(), None).unwrap();

    assert!(vm.call(&f, no_args(), no_kwargs()).is_err());
    assert!(vm.call(&f, [Value::Int(1), Value::Int(2)], no_kwargs()).is_err());
    assert!(vm.call(&f, [Value::Int(1)], [("b", Value::Int(2))]).is_err());
    assert!(!globals.contains("entered"));

    assert_eq!(vm.call(&f, [Value::Int(5)], no_kwargs()).unwrap(), Value::Int(5));
    assert_eq!(globals.get("entered"), Some(Value::Bool(true)));
}

#[test]
fn surplus_arguments_are_collected() {
    let mut g = CodeBuilder::new("g");
    g.params(&["a"]).varargs("rest").varkeywords("extra");
    g.local_op(Opcode::LoadFast, "a").local_op(Opcode::LoadFast, "rest").local_op(Opcode::LoadFast, "extra");
    g.emit_arg(Opcode::BuildTuple, 3).emit(Opcode::ReturnValue);

    let mut module = CodeBuilder::new("<module>");
    module.load_const(g.build()).load_const("g").emit_arg(Opcode::MakeFunction, 0);
    module.load_const(1).load_const(2).load_const(3).load_const("k").load_const(4).call(3, 1);
    module.emit(Opcode::ReturnValue);
    assert_eq!(run_module(module).unwrap().py_repr(), "(1, (2, 3), {'k': 4})");
}

#[test]
fn closures_share_their_cells() {
    let mut inc = CodeBuilder::new("inc");
    inc.freevars(&["count"]);
    inc.deref_op(Opcode::LoadDeref, "count").load_const(1).emit(Opcode::InplaceAdd);
    inc.deref_op(Opcode::StoreDeref, "count").deref_op(Opcode::LoadDeref, "count");
    inc.emit(Opcode::ReturnValue);

    let mut make_counter = CodeBuilder::new("make_counter");
    make_counter.load_const(0).deref_op(Opcode::StoreDeref, "count");
    make_counter.deref_op(Opcode::LoadClosure, "count").emit_arg(Opcode::BuildTuple, 1);
    make_counter.load_const(inc.build()).load_const("inc").emit_arg(Opcode::MakeClosure, 0);
    make_counter.emit(Opcode::ReturnValue);

    let mut module = CodeBuilder::new("<module>");
    module.load_const(make_counter.build()).load_const("make_counter");
    module.emit_arg(Opcode::MakeFunction, 0).call(0, 0).name_op(Opcode::StoreName, "c");
    for _ in 0..2 {
        module.name_op(Opcode::LoadName, "c").call(0, 0).emit(Opcode::PopTop);
    }
    module.name_op(Opcode::LoadName, "c").call(0, 0).emit(Opcode::ReturnValue);
    assert_eq!(run_module(module).unwrap(), Value::Int(3));
}

/// ```text
/// def make_adder(x):
///     def add(y):
///         return x + y
///     return add
/// make_adder(10)(7)
/// ```
#[test]
fn captured_parameters_start_in_their_cells() {
    let mut add = CodeBuilder::new("add");
    add.params(&["y"]).freevars(&["x"]);
    add.deref_op(Opcode::LoadDeref, "x").local_op(Opcode::LoadFast, "y");
    add.emit(Opcode::BinaryAdd).emit(Opcode::ReturnValue);

    let mut make_adder = CodeBuilder::new("make_adder");
    make_adder.params(&["x"]).cellvars(&["x"]);
    make_adder.deref_op(Opcode::LoadClosure, "x").emit_arg(Opcode::BuildTuple, 1);
    make_adder.load_const(add.build()).load_const("add").emit_arg(Opcode::MakeClosure, 0);
    make_adder.emit(Opcode::ReturnValue);

    let mut module = CodeBuilder::new("<module>");
    module.load_const(make_adder.build()).load_const("make_adder").emit_arg(Opcode::MakeFunction, 0);
    module.load_const(10).call(1, 0).load_const(7).call(1, 0).emit(Opcode::ReturnValue);
    assert_eq!(run_module(module).unwrap(), Value::Int(17));
}

/// ```text
/// def outer():
///     n = 1
///     def bump():
///         nonlocal n
///         n = 5
///     bump()
///     return n
/// ```
#[test]
fn outer_frame_sees_cell_writes_from_inner_calls() {
    let mut bump = CodeBuilder::new("bump");
    bump.freevars(&["n"]);
    bump.load_const(5).deref_op(Opcode::StoreDeref, "n");
    bump.load_none().emit(Opcode::ReturnValue);

    let mut outer = CodeBuilder::new("outer");
    outer.load_const(1).deref_op(Opcode::StoreDeref, "n");
    outer.deref_op(Opcode::LoadClosure, "n").emit_arg(Opcode::BuildTuple, 1);
    outer.load_const(bump.build()).load_const("bump").emit_arg(Opcode::MakeClosure, 0);
    outer.call(0, 0).emit(Opcode::PopTop);
    outer.deref_op(Opcode::LoadDeref, "n").emit(Opcode::ReturnValue);

    let mut module = CodeBuilder::new("<module>");
    module.load_const(outer.build()).load_const("outer").emit_arg(Opcode::MakeFunction, 0);
    module.call(0, 0).emit(Opcode::ReturnValue);
    assert_eq!(run_module(module).unwrap(), Value::Int(5));
}

#[test]
fn reading_an_unassigned_free_variable_is_a_name_error() {
    let mut inner = CodeBuilder::new("inner");
    inner.freevars(&["x"]);
    inner.deref_op(Opcode::LoadDeref, "x").emit(Opcode::ReturnValue);

    let mut outer = CodeBuilder::new("outer");
    outer.deref_op(Opcode::LoadClosure, "x").emit_arg(Opcode::BuildTuple, 1);
    outer.load_const(inner.build()).load_const("inner").emit_arg(Opcode::MakeClosure, 0);
    outer.call(0, 0).emit(Opcode::ReturnValue);

    let mut module = CodeBuilder::new("<module>");
    module.load_const(outer.build()).load_const("outer").emit_arg(Opcode::MakeFunction, 0);
    module.call(0, 0).emit(Opcode::ReturnValue);
    let err = run_module(module).unwrap_err();
    assert!(err.is(ExcType::NameError));
    assert_eq!(
        err.message(),
        "free variable 'x' referenced before assignment in enclosing scope"
    );
}

/// Emits `def <name>(...)` into a class body, storing it under `name`.
fn class_method(body: &mut CodeBuilder, name: &str, code: CodeBuilder) {
    body.load_const(code.build()).load_const(name).emit_arg(Opcode::MakeFunction, 0);
    body.name_op(Opcode::StoreName, name);
}

/// Emits `class <name>(<bases>): <body>` at module level.
fn define_class(module: &mut CodeBuilder, name: &str, bases: &[&str], mut body: CodeBuilder) {
    body.load_none().emit(Opcode::ReturnValue);
    module.load_const(body.build()).load_const(name).emit_arg(Opcode::MakeFunction, 0);
    module.load_const(name);
    for base in bases {
        module.name_op(Opcode::LoadName, base);
    }
    let count = u16::try_from(bases.len()).unwrap();
    module.emit_arg(Opcode::BuildClass, count).name_op(Opcode::StoreName, name);
}

fn point_class(module: &mut CodeBuilder) {
    let mut init = CodeBuilder::new("__init__");
    init.params(&["self", "x"]);
    init.local_op(Opcode::LoadFast, "x").local_op(Opcode::LoadFast, "self").name_op(Opcode::StoreAttr, "x");
    init.load_none().emit(Opcode::ReturnValue);

    let mut double = CodeBuilder::new("double");
    double.params(&["self"]);
    double.local_op(Opcode::LoadFast, "self").name_op(Opcode::LoadAttr, "x");
    double.load_const(2).emit(Opcode::BinaryMultiply).emit(Opcode::ReturnValue);

    let mut body = CodeBuilder::new("Point");
    class_method(&mut body, "__init__", init);
    class_method(&mut body, "double", double);
    define_class(module, "Point", &[], body);
}

#[test]
fn classes_construct_instances_and_bind_methods() {
    let mut module = CodeBuilder::new("<module>");
    point_class(&mut module);
    module.name_op(Opcode::LoadName, "Point").load_const(21).call(1, 0);
    module.name_op(Opcode::LoadAttr, "double").call(0, 0).emit(Opcode::ReturnValue);
    assert_eq!(run_module(module).unwrap(), Value::Int(42));
}

#[test]
fn unbound_methods_check_their_receiver() {
    let mut module = CodeBuilder::new("<module>");
    point_class(&mut module);
    define_class(&mut module, "Child", &["Point"], CodeBuilder::new("Child"));
    // Point.double(Child(4)) works through inheritance
    module.name_op(Opcode::LoadName, "Point").name_op(Opcode::LoadAttr, "double");
    module.name_op(Opcode::LoadName, "Child").load_const(4).call(1, 0).call(1, 0);
    module.name_op(Opcode::StoreName, "ok");
    module.name_op(Opcode::LoadName, "Point").name_op(Opcode::LoadAttr, "double");
    module.load_const(1).call(1, 0).emit(Opcode::ReturnValue);

    let mut vm = Vm::new(NoLimitTracker::new(), NoopTracer);
    let globals = Namespace::new();
    let err = vm.run(Rc::new(module.build()), globals.clone(), None).unwrap_err();
    assert_eq!(globals.get("ok"), Some(Value::Int(8)));
    assert!(err.is(ExcType::TypeError));
    assert_eq!(
        err.message(),
        "unbound method double() must be called with Point instance as first argument (got int instance instead)"
    );
}

#[test]
fn init_must_return_none() {
    let mut init = CodeBuilder::new("__init__");
    init.params(&["self"]);
    init.load_const(1).emit(Opcode::ReturnValue);
    let mut body = CodeBuilder::new("Bad");
    class_method(&mut body, "__init__", init);

    let mut module = CodeBuilder::new("<module>");
    define_class(&mut module, "Bad", &[], body);
    module.name_op(Opcode::LoadName, "Bad").call(0, 0).emit(Opcode::ReturnValue);
    let err = run_module(module).unwrap_err();
    assert_eq!(err.message(), "__init__() should return None, not 'int'");
}

#[test]
fn print_writes_to_the_configured_writer() {
    let mut module = CodeBuilder::new("<module>");
    module.name_op(Opcode::LoadName, "print").load_const("hi").load_const(3).call(2, 0);
    module.emit(Opcode::PopTop).load_none().emit(Opcode::ReturnValue);

    let mut vm = Vm::new(NoLimitTracker::new(), NoopTracer).with_print(CollectStringPrint::new());
    vm.run(Rc::new(module.build()), Namespace::new(), None).unwrap();
    assert_eq!(vm.print_writer().output(), "hi 3\n");
}

#[test]
fn host_functions_are_callable_and_may_raise() {
    let globals = Namespace::new();
    let halve = HostFunction::new("halve", |args: &[Value]| match args {
        [Value::Int(n)] if n % 2 == 0 => Ok(Value::Int(n / 2)),
        _ => Err(Exception::new(ExcType::ValueError, "odd")),
    });
    globals.set("halve", Value::HostFunction(Rc::new(halve)));

    let mut module = CodeBuilder::new("<module>");
    module.name_op(Opcode::LoadName, "halve").load_const(8).call(1, 0).emit(Opcode::ReturnValue);
    let mut vm = Vm::new(NoLimitTracker::new(), NoopTracer);
    assert_eq!(vm.run(Rc::new(module.build()), globals.clone(), None).unwrap(), Value::Int(4));

    let mut module = CodeBuilder::new("<module>");
    module.name_op(Opcode::LoadName, "halve").load_const(3).call(1, 0).emit(Opcode::ReturnValue);
    let err = vm.run(Rc::new(module.build()), globals, None).unwrap_err();
    assert!(err.is(ExcType::ValueError));
    assert_eq!(err.message(), "odd");
}

#[test]
fn imports_go_through_the_hook() {
    let math = Namespace::new();
    math.set("half", Value::Float(0.5));
    let math = Value::Module(Rc::new(Module::new("math", math)));

    let mut module = CodeBuilder::new("<module>");
    module.load_const(0).load_none().name_op(Opcode::ImportName, "math");
    module.name_op(Opcode::ImportFrom, "half").name_op(Opcode::StoreName, "half");
    module.emit(Opcode::PopTop);
    module.name_op(Opcode::LoadName, "half").emit(Opcode::ReturnValue);
    let code = Rc::new(module.build());

    let mut vm = Vm::new(NoLimitTracker::new(), NoopTracer);
    let err = vm.run(code.clone(), Namespace::new(), None).unwrap_err();
    assert!(err.is(ExcType::ImportError));
    assert_eq!(err.message(), "No module named 'math'");

    vm.set_import_hook(move |name: &str| match name {
        "math" => Ok(math.clone()),
        other => Err(Exception::new(ExcType::ImportError, format!("No module named '{other}'"))),
    });
    assert_eq!(vm.run(code, Namespace::new(), None).unwrap(), Value::Float(0.5));

    let mut module = CodeBuilder::new("<module>");
    module.load_const(0).load_none().name_op(Opcode::ImportName, "math");
    module.name_op(Opcode::ImportFrom, "missing").emit(Opcode::ReturnValue);
    let err = vm.run(Rc::new(module.build()), Namespace::new(), None).unwrap_err();
    assert_eq!(err.message(), "cannot import name 'missing'");
}

#[test]
fn escaping_exceptions_carry_a_traceback() {
    let mut f = CodeBuilder::new("f");
    f.first_line(2).set_line(3);
    f.name_op(Opcode::LoadGlobal, "ValueError").load_const("bad").call(1, 0);
    f.emit_arg(Opcode::RaiseVarargs, 1);

    let mut module = CodeBuilder::new("<module>");
    module.set_line(5);
    module.load_const(f.build()).load_const("f").emit_arg(Opcode::MakeFunction, 0);
    module.name_op(Opcode::StoreName, "f");
    module.set_line(7).name_op(Opcode::LoadName, "f").call(0, 0).emit(Opcode::ReturnValue);

    let err = run_module(module).unwrap_err();
    assert!(err.is(ExcType::ValueError));
    assert_eq!(err.message(), "bad");
    assert_eq!(
        err.traceback(),
        &[
            StackFrame {
                name: "f".to_owned(),
                line: 3
            },
            StackFrame {
                name: "<module>".to_owned(),
                line: 7
            },
        ]
    );
    assert_eq!(
        err.to_string(),
        "Traceback (most recent call last):\n  line 7, in <module>\n  line 3, in f\nValueError: bad"
    );
}

#[test]
fn make_frame_binds_arguments_by_name() {
    let mut code = CodeBuilder::new("double");
    code.params(&["x"]);
    code.local_op(Opcode::LoadFast, "x").load_const(2).emit(Opcode::BinaryMultiply);
    code.emit(Opcode::ReturnValue);

    let mut vm = Vm::new(NoLimitTracker::new(), NoopTracer);
    let frame = vm
        .make_frame(Rc::new(code.build()), [("x", Value::Int(21))], Namespace::new(), None)
        .unwrap();
    assert_eq!(frame.stack_depth(), 0);
    assert_eq!(vm.run_frame(frame).unwrap(), Value::Int(42));
}

#[test]
fn make_frame_leaves_free_variables_empty() {
    let mut code = CodeBuilder::new("peek");
    code.freevars(&["hidden"]);
    code.deref_op(Opcode::LoadDeref, "hidden").emit(Opcode::ReturnValue);

    let mut vm = Vm::new(NoLimitTracker::new(), NoopTracer);
    let frame = vm
        .make_frame(Rc::new(code.build()), no_kwargs(), Namespace::new(), None)
        .unwrap();
    let err = vm.run_frame(frame).unwrap_err();
    assert!(err.is(ExcType::NameError));
    assert!(!err.is_uncatchable());
    assert_eq!(vm.frame_depth(), 0);
}
