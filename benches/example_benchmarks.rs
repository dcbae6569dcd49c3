use codspeed_criterion_compat::{criterion_group, criterion_main, Criterion};
use eqsat::{ast::*, expr, EGraph};

fn math_program(depth: i64) -> Vec<Command> {
    let mut program = vec![
        Command::Datatype {
            name: "Math".into(),
            variants: vec![
                Variant::new("Num", ["i64"]),
                Variant::new("Add", ["Math", "Math"]),
                Variant::new("Mul", ["Math", "Math"]),
            ],
        },
        Command::BiRewrite("".into(), Rewrite::new(expr!(Add a b), expr!(Add b a))),
        Command::BiRewrite("".into(), Rewrite::new(expr!(Mul a b), expr!(Mul b a))),
        Command::BiRewrite(
            "".into(),
            Rewrite::new(expr!(Add a (Add b c)), expr!(Add (Add a b) c)),
        ),
        Command::BiRewrite(
            "".into(),
            Rewrite::new(expr!(Mul a (Add b c)), expr!(Add (Mul a b) (Mul a c))),
        ),
    ];
    let mut term = Expr::call("Num", [Expr::lit(0)]);
    for i in 1..=depth {
        let num = Expr::call("Num", [Expr::lit(i)]);
        let op = if i % 2 == 0 { "Add" } else { "Mul" };
        term = Expr::call(op, [term, num]);
    }
    program.push(Command::Action(Action::Let("root".into(), term)));
    program.push(Command::RunSchedule(Schedule::repeat(6, Schedule::run(""))));
    program.push(Command::Extract {
        expr: expr!(root),
        variants: 0,
    });
    program
}

fn path_program(nodes: i64) -> Vec<Command> {
    let mut program = vec![
        Command::Relation {
            name: "edge".into(),
            inputs: vec!["i64".into(), "i64".into()],
        },
        Command::Relation {
            name: "path".into(),
            inputs: vec!["i64".into(), "i64".into()],
        },
        Command::Rule {
            name: "base".into(),
            ruleset: "".into(),
            rule: Rule {
                body: vec![Fact::Fact(expr!(edge x y))],
                head: vec![Action::Expr(expr!(path x y))],
            },
        },
        Command::Rule {
            name: "step".into(),
            ruleset: "".into(),
            rule: Rule {
                body: vec![Fact::Fact(expr!(path x y)), Fact::Fact(expr!(edge y z))],
                head: vec![Action::Expr(expr!(path x z))],
            },
        },
    ];
    for i in 0..nodes {
        program.push(Command::Action(Action::Expr(Expr::call(
            "edge",
            [Expr::lit(i), Expr::lit((i + 1) % nodes)],
        ))));
    }
    program.push(Command::RunSchedule(Schedule::saturate(Schedule::run(""))));
    program
}

pub fn criterion_benchmark(c: &mut Criterion) {
    let math = math_program(4);
    c.bench_function("math-microbenchmark", |b| {
        b.iter(|| EGraph::default().run_program(math.clone()).unwrap())
    });
    let path = path_program(60);
    c.bench_function("path-cycle", |b| {
        b.iter(|| EGraph::default().run_program(path.clone()).unwrap())
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
