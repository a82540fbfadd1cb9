use std::rc::Rc;

use coil::{Code, CodeBuilder, CompareOp, Namespace, NoLimitTracker, NoopTracer, Opcode, Value, Vm};
use criterion::{Bencher, Criterion, black_box, criterion_group, criterion_main};

/// Runs a module code unit once to check its result, then measures repeated runs.
fn run_coil(bench: &mut Bencher, code: Code, expected: i64) {
    let code = Rc::new(code);
    let mut vm = Vm::new(NoLimitTracker::new(), NoopTracer);
    let r = vm.run(code.clone(), Namespace::new(), None).unwrap();
    assert_eq!(r, Value::Int(expected));

    bench.iter(|| {
        let r = vm.run(code.clone(), Namespace::new(), None).unwrap();
        black_box(r);
    });
}

/// ```text
/// total = 0
/// for i in range(n):
///     total += i
/// total
/// ```
fn loop_sum(n: i64) -> Code {
    let mut module = CodeBuilder::new("<module>");
    let (top, cleanup, end) = (module.new_label(), module.new_label(), module.new_label());
    module.load_const(0).name_op(Opcode::StoreName, "total");
    module.jump(Opcode::SetupLoop, end);
    module.name_op(Opcode::LoadName, "range").load_const(n).call(1, 0).emit(Opcode::GetIter);
    module.bind(top).jump(Opcode::ForIter, cleanup);
    module.name_op(Opcode::LoadName, "total").emit(Opcode::RotTwo).emit(Opcode::InplaceAdd);
    module.name_op(Opcode::StoreName, "total").jump(Opcode::JumpAbsolute, top);
    module.bind(cleanup).emit(Opcode::PopBlock);
    module.bind(end).name_op(Opcode::LoadName, "total").emit(Opcode::ReturnValue);
    module.build()
}

/// ```text
/// def fib(n):
///     if n < 2:
///         return n
///     return fib(n - 1) + fib(n - 2)
/// fib(n)
/// ```
fn recursive_fib(n: i64) -> Code {
    let mut fib = CodeBuilder::new("fib");
    fib.params(&["n"]);
    let recurse = fib.new_label();
    fib.local_op(Opcode::LoadFast, "n").load_const(2).compare(CompareOp::Lt);
    fib.jump(Opcode::PopJumpIfFalse, recurse);
    fib.local_op(Opcode::LoadFast, "n").emit(Opcode::ReturnValue);
    fib.bind(recurse);
    fib.name_op(Opcode::LoadGlobal, "fib").local_op(Opcode::LoadFast, "n").load_const(1);
    fib.emit(Opcode::BinarySubtract).call(1, 0);
    fib.name_op(Opcode::LoadGlobal, "fib").local_op(Opcode::LoadFast, "n").load_const(2);
    fib.emit(Opcode::BinarySubtract).call(1, 0);
    fib.emit(Opcode::BinaryAdd).emit(Opcode::ReturnValue);

    let mut module = CodeBuilder::new("<module>");
    module.load_const(fib.build()).load_const("fib").emit_arg(Opcode::MakeFunction, 0);
    module.name_op(Opcode::StoreName, "fib");
    module.name_op(Opcode::LoadName, "fib").load_const(n).call(1, 0).emit(Opcode::ReturnValue);
    module.build()
}

/// ```text
/// def count(n):
///     for i in range(n):
///         yield i
/// total = 0
/// for i in count(n):
///     total += i
/// total
/// ```
fn generator_sum(n: i64) -> Code {
    let mut count = CodeBuilder::new("count");
    count.params(&["n"]).generator();
    let (top, cleanup, end) = (count.new_label(), count.new_label(), count.new_label());
    count.jump(Opcode::SetupLoop, end);
    count.name_op(Opcode::LoadGlobal, "range").local_op(Opcode::LoadFast, "n").call(1, 0);
    count.emit(Opcode::GetIter);
    count.bind(top).jump(Opcode::ForIter, cleanup);
    count.emit(Opcode::YieldValue).emit(Opcode::PopTop).jump(Opcode::JumpAbsolute, top);
    count.bind(cleanup).emit(Opcode::PopBlock);
    count.bind(end).load_none().emit(Opcode::ReturnValue);

    let mut module = CodeBuilder::new("<module>");
    module.load_const(count.build()).load_const("count").emit_arg(Opcode::MakeFunction, 0);
    module.name_op(Opcode::StoreName, "count");
    let (top, cleanup, end) = (module.new_label(), module.new_label(), module.new_label());
    module.load_const(0).name_op(Opcode::StoreName, "total");
    module.jump(Opcode::SetupLoop, end);
    module.name_op(Opcode::LoadName, "count").load_const(n).call(1, 0).emit(Opcode::GetIter);
    module.bind(top).jump(Opcode::ForIter, cleanup);
    module.name_op(Opcode::LoadName, "total").emit(Opcode::RotTwo).emit(Opcode::InplaceAdd);
    module.name_op(Opcode::StoreName, "total").jump(Opcode::JumpAbsolute, top);
    module.bind(cleanup).emit(Opcode::PopBlock);
    module.bind(end).name_op(Opcode::LoadName, "total").emit(Opcode::ReturnValue);
    module.build()
}

fn criterion_benchmark(c: &mut Criterion) {
    c.bench_function("loop_sum_1000", |b| run_coil(b, loop_sum(1000), 499_500));
    c.bench_function("recursive_fib_15", |b| run_coil(b, recursive_fib(15), 610));
    c.bench_function("generator_sum_1000", |b| run_coil(b, generator_sum(1000), 499_500));
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
