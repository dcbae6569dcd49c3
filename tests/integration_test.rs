use eqsat::{ast::*, *};

fn i64s(values: &[i64]) -> Vec<Value> {
    values.iter().copied().map(Value::from).collect()
}

fn count_rows(egraph: &EGraph, name: &str) -> usize {
    let mut n = 0;
    egraph
        .for_each_row(name.into(), |_, output| {
            if !output.subsumed {
                n += 1
            }
        })
        .unwrap();
    n
}

fn call(f: &str, args: impl IntoIterator<Item = Expr>) -> Expr {
    Expr::call(f, args)
}

#[test]
fn test_simple_extract1() {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut egraph = EGraph::default();

    egraph
        .run_program(vec![
            Command::Datatype {
                name: "Op".into(),
                variants: vec![Variant::new("Add", ["i64", "i64"])],
            },
            Command::Action(Action::Let("expr".into(), expr!(Add 1 1))),
            Command::Extract {
                expr: expr!(expr),
                variants: 0,
            },
        ])
        .unwrap();

    let report = egraph.get_extract_report().clone().unwrap();
    let ExtractReport::Best { cost, .. } = report else {
        panic!();
    };
    assert_eq!(cost, 3);
}

#[test]
fn test_simple_extract2() {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut egraph = EGraph::default();

    egraph
        .run_program(vec![
            Command::Datatype {
                name: "Term".into(),
                variants: vec![
                    Variant::new("Origin", []).with_cost(0),
                    Variant::new("BigStep", ["Term"]).with_cost(10),
                    Variant::new("SmallStep", ["Term"]).with_cost(1),
                ],
            },
            Command::Action(Action::Let("t".into(), expr!((Origin)))),
            Command::Action(Action::Let("tb".into(), expr!(BigStep t))),
            Command::Action(Action::Let("tbs".into(), expr!(SmallStep tb))),
            Command::Action(Action::Let("ts".into(), expr!(SmallStep t))),
            Command::Action(Action::Let("tss".into(), expr!(SmallStep ts))),
            Command::Action(Action::Let("tsss".into(), expr!(SmallStep tss))),
            Command::Action(Action::Union(expr!(tbs), expr!(tsss))),
            Command::Action(Action::Let("tssss".into(), expr!(SmallStep tsss))),
            Command::Action(Action::Union(expr!(tssss), expr!(tb))),
            Command::Extract {
                expr: expr!(tb),
                variants: 0,
            },
        ])
        .unwrap();

    let report = egraph.get_extract_report().clone().unwrap();
    let ExtractReport::Best { cost, .. } = report else {
        panic!();
    };
    assert_eq!(cost, 4);
}

#[test]
fn conflicting_sets_are_merge_errors() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut egraph = EGraph::default();
    egraph
        .declare_function(&FunctionDecl::function(
            "add",
            Schema::new(vec!["i64".into(), "i64".into()], "i64".into()),
            None,
        ))
        .unwrap();

    let args = i64s(&[1, 2]);
    egraph.set("add".into(), &args, Value::from(3i64)).unwrap();
    egraph.set("add".into(), &args, Value::from(3i64)).unwrap();
    assert_eq!(egraph.num_tuples(), 1);

    let err = egraph.set("add".into(), &args, Value::from(4i64)).unwrap_err();
    assert!(matches!(err, Error::MergeError(..)));
    assert_eq!(
        egraph.lookup("add".into(), &args).unwrap(),
        Some(Value::from(3i64))
    );
}

#[test]
fn rebuild_restores_congruence() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut egraph = EGraph::default();
    egraph.declare_sort("E", &None).unwrap();
    egraph.declare_constructor("a", vec![], "E", None).unwrap();
    egraph.declare_constructor("c", vec![], "E", None).unwrap();
    egraph
        .declare_constructor("f", vec!["E".into()], "E", None)
        .unwrap();

    let (_, a) = egraph.eval_expr(&expr!((a))).unwrap();
    let (_, c) = egraph.eval_expr(&expr!((c))).unwrap();
    let (_, b) = egraph.eval_expr(&expr!(f (a))).unwrap();
    egraph.union(a, c).unwrap();
    egraph.rebuild().unwrap();

    assert_eq!(egraph.lookup("f".into(), &[c]).unwrap(), Some(egraph.find(b)));
    assert_eq!(egraph.find(a), egraph.find(c));
    for v in [a, b, c] {
        assert_eq!(egraph.find(egraph.find(v)), egraph.find(v));
    }
}

#[test]
fn congruence_propagates_through_parents() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut egraph = EGraph::default();
    egraph
        .run_program(vec![
            Command::Datatype {
                name: "E".into(),
                variants: vec![
                    Variant::new("a", []),
                    Variant::new("b", []),
                    Variant::new("f", ["E"]),
                ],
            },
            Command::Action(Action::Expr(expr!(f (f (a))))),
            Command::Action(Action::Expr(expr!(f (f (b))))),
            Command::Action(Action::Union(expr!((a)), expr!((b)))),
        ])
        .unwrap();
    egraph.rebuild().unwrap();

    assert!(egraph.check(&[Fact::eq(expr!(f (f (a))), expr!(f (f (b))))]));
    // a, f(a) and f(f(a)), each merged with its b counterpart
    assert_eq!(count_rows(&egraph, "f"), 2);
    assert_eq!(count_rows(&egraph, "a") + count_rows(&egraph, "b"), 2);
}

#[test]
fn union_rejects_primitive_values() {
    let mut egraph = EGraph::default();
    let err = egraph.union(Value::from(1i64), Value::from(2i64)).unwrap_err();
    assert!(matches!(
        err,
        Error::TypeError(TypeError::NonEqTypeUnion(_))
    ));
}

#[test]
fn saturation_collapses_a_chain() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut egraph = EGraph::default();
    egraph
        .run_program(vec![
            Command::Datatype {
                name: "E".into(),
                variants: vec![Variant::new("a", []), Variant::new("f", ["E"])],
            },
            Command::Rule {
                name: "collapse".into(),
                ruleset: "".into(),
                rule: Rule {
                    body: vec![Fact::eq(expr!(y), expr!(f x))],
                    head: vec![Action::Union(expr!(x), expr!(y))],
                },
            },
            Command::Action(Action::Expr(expr!(f (f (a))))),
            Command::RunSchedule(Schedule::saturate(Schedule::run(""))),
        ])
        .unwrap();

    assert!(egraph.check(&[
        Fact::eq(expr!((a)), expr!(f (a))),
        Fact::eq(expr!((a)), expr!(f (f (a)))),
    ]));
    let report = egraph.get_run_report().clone().unwrap();
    assert_eq!(report.stop_reason, Some(StopReason::Saturated));

    let all = egraph.extract_all();
    assert_eq!(all.best.len(), 1);
    assert!(all.unextractable.is_empty());
}

#[test]
fn extraction_prefers_the_cheaper_member() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut egraph = EGraph::default();
    egraph
        .run_program(vec![
            Command::Datatype {
                name: "E".into(),
                variants: vec![Variant::new("a", []), Variant::new("f", ["E"]).with_cost(2)],
            },
            Command::Action(Action::Union(expr!(f (a)), expr!((a)))),
            Command::Extract {
                expr: expr!(f (a)),
                variants: 0,
            },
        ])
        .unwrap();

    let Some(ExtractReport::Best {
        termdag,
        cost,
        term,
    }) = egraph.get_extract_report().clone()
    else {
        panic!("expected a best term");
    };
    assert_eq!(cost, 1);
    assert_eq!(termdag.to_string(term), "(a)");
}

fn path_program() -> Vec<Command> {
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
    for i in 1..10i64 {
        program.push(Command::Action(Action::Expr(call(
            "edge",
            [Expr::lit(i), Expr::lit(i + 1)],
        ))));
    }
    program.push(Command::RunSchedule(Schedule::saturate(Schedule::run(""))));
    program
}

#[test]
fn transitive_closure_saturates() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut egraph = EGraph::default();
    egraph.run_program(path_program()).unwrap();

    // every pair i < j of ten nodes
    assert_eq!(count_rows(&egraph, "path"), 45);
    assert!(egraph.check(&[Fact::Fact(expr!(path 1 10))]));
    assert!(!egraph.check(&[Fact::Fact(expr!(path 10 1))]));
}

#[test]
fn seminaive_matches_naive() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut seminaive = EGraph::default();
    seminaive.run_program(path_program()).unwrap();

    let mut naive = EGraph::default();
    naive.seminaive = false;
    naive.run_program(path_program()).unwrap();

    assert_eq!(count_rows(&seminaive, "path"), count_rows(&naive, "path"));
    assert_eq!(
        seminaive.get_run_report().as_ref().unwrap().iterations,
        naive.get_run_report().as_ref().unwrap().iterations
    );
}

fn counter_program() -> Vec<Command> {
    vec![
        Command::Relation {
            name: "R".into(),
            inputs: vec!["i64".into()],
        },
        Command::Rule {
            name: "count".into(),
            ruleset: "".into(),
            rule: Rule {
                body: vec![Fact::Fact(expr!(R n))],
                head: vec![Action::Expr(call("R", [call("+", [expr!(n), expr!(1)])]))],
            },
        },
        Command::Action(Action::Expr(expr!(R 0))),
    ]
}

#[test]
fn iteration_limit_exhausts_saturate() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut egraph = EGraph::default();
    egraph.iteration_limit = 5;
    egraph.run_program(counter_program()).unwrap();
    egraph
        .run_program(vec![Command::RunSchedule(Schedule::saturate(
            Schedule::run(""),
        ))])
        .unwrap();

    let report = egraph.get_run_report().clone().unwrap();
    assert_eq!(report.stop_reason, Some(StopReason::Exhausted(5)));
    assert_eq!(report.iterations, 5);
    assert_eq!(count_rows(&egraph, "R"), 6);
}

#[test]
fn node_limit_stops_the_run() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut egraph = EGraph::default();
    egraph.node_limit = 10;
    egraph.run_program(counter_program()).unwrap();
    egraph
        .run_program(vec![Command::RunSchedule(Schedule::saturate(
            Schedule::run(""),
        ))])
        .unwrap();

    let report = egraph.get_run_report().clone().unwrap();
    assert_eq!(report.stop_reason, Some(StopReason::NodeLimit(10)));
    assert_eq!(egraph.num_tuples(), 11);
}

#[test]
fn until_stops_early() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut egraph = EGraph::default();
    egraph.run_program(counter_program()).unwrap();
    egraph
        .run_program(vec![Command::RunSchedule(Schedule::saturate(
            Schedule::run_until("", vec![Fact::Fact(expr!(R 3))]),
        ))])
        .unwrap();

    let report = egraph.get_run_report().clone().unwrap();
    assert_eq!(report.stop_reason, Some(StopReason::Until));
    assert_eq!(count_rows(&egraph, "R"), 4);
}

#[test]
fn match_limit_caps_applications() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut egraph = EGraph::default();
    let mut program = vec![
        Command::Relation {
            name: "R".into(),
            inputs: vec!["i64".into()],
        },
        Command::Relation {
            name: "S".into(),
            inputs: vec!["i64".into()],
        },
        Command::Rule {
            name: "copy".into(),
            ruleset: "".into(),
            rule: Rule {
                body: vec![Fact::Fact(expr!(R n))],
                head: vec![Action::Expr(expr!(S n))],
            },
        },
        Command::SetOption {
            name: "match_limit".into(),
            value: expr!(2),
        },
    ];
    for i in 0..5i64 {
        program.push(Command::Action(Action::Expr(call("R", [Expr::lit(i)]))));
    }
    program.push(Command::RunSchedule(Schedule::run("")));
    egraph.run_program(program).unwrap();

    assert_eq!(count_rows(&egraph, "S"), 2);
    let report = egraph.get_run_report().clone().unwrap();
    assert_eq!(report.num_matches_per_rule[&Symbol::from("copy")], 2);
}

#[test]
fn merge_expressions_join_outputs() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut egraph = EGraph::default();
    egraph
        .run_program(vec![Command::Function(FunctionDecl::function(
            "best",
            Schema::new(vec!["i64".into()], "i64".into()),
            Some(call("max", [expr!(old), expr!(new)])),
        ))])
        .unwrap();

    let key = i64s(&[1]);
    for v in [3i64, 2] {
        egraph.set("best".into(), &key, Value::from(v)).unwrap();
    }
    assert_eq!(egraph.lookup("best".into(), &key).unwrap(), Some(Value::from(3i64)));
    egraph.set("best".into(), &key, Value::from(5i64)).unwrap();
    assert_eq!(egraph.lookup("best".into(), &key).unwrap(), Some(Value::from(5i64)));

    let err = egraph
        .run_program(vec![Command::Action(Action::Change(
            Change::Subsume,
            "best".into(),
            vec![expr!(1)],
        ))])
        .unwrap_err();
    assert!(matches!(err, Error::SubsumeMergeError(_)));
}

#[test]
fn merge_on_eq_output_is_rejected() {
    let mut egraph = EGraph::default();
    egraph.declare_sort("E", &None).unwrap();
    let err = egraph
        .declare_function(&FunctionDecl::function(
            "g",
            Schema::new(vec![], "E".into()),
            Some(expr!(old)),
        ))
        .unwrap_err();
    assert!(matches!(err, Error::TypeError(_)));
    // the failed declaration leaves the name free
    egraph
        .declare_function(&FunctionDecl::function("g", Schema::new(vec![], "E".into()), None))
        .unwrap();
}

#[test]
fn defaults_fill_missing_rows() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut egraph = EGraph::default();
    egraph
        .run_program(vec![
            Command::Function(
                FunctionDecl::function("g", Schema::new(vec!["i64".into()], "i64".into()), None)
                    .with_default(expr!(0)),
            ),
            Command::Function(FunctionDecl::function(
                "h",
                Schema::new(vec!["i64".into()], "i64".into()),
                None,
            )),
            Command::Action(Action::Expr(expr!(g 5))),
        ])
        .unwrap();
    assert_eq!(
        egraph.lookup("g".into(), &i64s(&[5])).unwrap(),
        Some(Value::from(0i64))
    );

    let err = egraph
        .run_program(vec![Command::Action(Action::Expr(expr!(h 5)))])
        .unwrap_err();
    assert!(matches!(err, Error::NotFoundError(_)));
    assert_eq!(egraph.lookup("h".into(), &i64s(&[5])).unwrap(), None);
}

#[test]
fn subsumed_terms_are_hidden() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut egraph = EGraph::default();
    egraph
        .run_program(vec![
            Command::Datatype {
                name: "Math".into(),
                variants: vec![
                    Variant::new("Num", ["i64"]),
                    Variant::new("Mul", ["Math", "i64"]),
                    Variant::new("Shl", ["Math", "i64"]).with_cost(10),
                ],
            },
            Command::Rewrite("".into(), Rewrite::new(expr!(Mul x 2), expr!(Shl x 1)), true),
            Command::Action(Action::Expr(expr!(Mul (Num 3) 2))),
            Command::RunSchedule(Schedule::run("")),
            Command::Extract {
                expr: expr!(Mul (Num 3) 2),
                variants: 0,
            },
        ])
        .unwrap();

    let Some(ExtractReport::Best { termdag, term, .. }) = egraph.get_extract_report().clone()
    else {
        panic!("expected a best term");
    };
    assert_eq!(termdag.to_string(term), "(Shl (Num 3) 1)");

    // still there for checks, gone for rules
    assert!(egraph.check(&[Fact::Fact(expr!(Mul (Num 3) 2))]));
    egraph
        .run_program(vec![
            Command::Relation {
                name: "seen".into(),
                inputs: vec!["Math".into()],
            },
            Command::AddRuleset("after".into()),
            Command::Rule {
                name: "see".into(),
                ruleset: "after".into(),
                rule: Rule {
                    body: vec![Fact::eq(expr!(e), expr!(Mul x n))],
                    head: vec![Action::Expr(expr!(seen e))],
                },
            },
            Command::RunSchedule(Schedule::run("after")),
        ])
        .unwrap();
    assert_eq!(count_rows(&egraph, "seen"), 0);
}

#[test]
fn delete_removes_rows() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut egraph = EGraph::default();
    egraph
        .run_program(vec![
            Command::Relation {
                name: "edge".into(),
                inputs: vec!["i64".into(), "i64".into()],
            },
            Command::Action(Action::Expr(expr!(edge 1 2))),
            Command::Action(Action::Expr(expr!(edge 2 3))),
            Command::Action(Action::Change(
                Change::Delete,
                "edge".into(),
                vec![expr!(1), expr!(2)],
            )),
        ])
        .unwrap();

    assert_eq!(egraph.num_tuples(), 1);
    assert!(!egraph.check(&[Fact::Fact(expr!(edge 1 2))]));
    assert!(egraph.check(&[Fact::Fact(expr!(edge 2 3))]));
}

#[test]
fn combined_rulesets_run_together() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut egraph = EGraph::default();
    egraph
        .run_program(vec![
            Command::Relation {
                name: "A".into(),
                inputs: vec!["i64".into()],
            },
            Command::Relation {
                name: "B".into(),
                inputs: vec!["i64".into()],
            },
            Command::AddRuleset("left".into()),
            Command::AddRuleset("right".into()),
            Command::UnstableCombinedRuleset("both".into(), vec!["left".into(), "right".into()]),
            Command::Rule {
                name: "a-to-b".into(),
                ruleset: "left".into(),
                rule: Rule {
                    body: vec![Fact::Fact(expr!(A n))],
                    head: vec![Action::Expr(expr!(B n))],
                },
            },
            Command::Rule {
                name: "b-to-a".into(),
                ruleset: "right".into(),
                rule: Rule {
                    body: vec![Fact::Fact(expr!(B n))],
                    head: vec![Action::Expr(call("A", [call("+", [expr!(n), expr!(1)])]))],
                },
            },
            Command::Action(Action::Expr(expr!(A 0))),
            Command::RunSchedule(Schedule::repeat(3, Schedule::run("both"))),
        ])
        .unwrap();

    // each iteration searches both rules before applying either
    assert_eq!(count_rows(&egraph, "A"), 2);
    assert_eq!(count_rows(&egraph, "B"), 2);

    let err = egraph
        .run_program(vec![Command::Rule {
            name: "nope".into(),
            ruleset: "both".into(),
            rule: Rule {
                body: vec![],
                head: vec![],
            },
        }])
        .unwrap_err();
    assert!(matches!(err, Error::CombinedRulesetError(_)));
}

#[test]
fn duplicate_rules_and_missing_rulesets_fail() {
    let mut egraph = EGraph::default();
    let rule = Command::Rule {
        name: "r".into(),
        ruleset: "".into(),
        rule: Rule {
            body: vec![],
            head: vec![],
        },
    };
    egraph.run_program(vec![rule.clone()]).unwrap();
    let err = egraph.run_program(vec![rule]).unwrap_err();
    assert!(matches!(err, Error::RuleAlreadyExists(..)));

    let err = egraph
        .run_program(vec![Command::RunSchedule(Schedule::run("nowhere"))])
        .unwrap_err();
    assert!(matches!(err, Error::NoSuchRuleset(_)));

    let err = egraph
        .run_program(vec![Command::AddRuleset("".into())])
        .unwrap_err();
    assert!(matches!(err, Error::RulesetAlreadyExists(_)));
}

#[test]
fn print_commands_produce_messages() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut egraph = EGraph::default();
    let msgs = egraph
        .run_program(vec![
            Command::Function(FunctionDecl::function(
                "fib",
                Schema::new(vec!["i64".into()], "i64".into()),
                None,
            )),
            Command::Action(Action::Set("fib".into(), vec![expr!(0)], expr!(0))),
            Command::Action(Action::Set("fib".into(), vec![expr!(1)], expr!(1))),
            Command::PrintFunction("fib".into(), 10),
            Command::PrintSize(Some("fib".into())),
        ])
        .unwrap();

    assert_eq!(
        msgs,
        vec![
            "(\n   (fib 0) -> 0\n   (fib 1) -> 1\n)".to_string(),
            "2".to_string()
        ]
    );
}

#[test]
fn variants_list_the_class() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut egraph = EGraph::default();
    egraph
        .run_program(vec![
            Command::Datatype {
                name: "Math".into(),
                variants: vec![Variant::new("Num", ["i64"]), Variant::new("Add", ["Math", "Math"])],
            },
            Command::BiRewrite("".into(), Rewrite::new(expr!(Add a b), expr!(Add b a))),
            Command::Action(Action::Expr(expr!(Add (Num 1) (Num 2)))),
            Command::RunSchedule(Schedule::saturate(Schedule::run(""))),
        ])
        .unwrap();

    let report = egraph.extract_expr(&expr!(Add (Num 1) (Num 2)), 5).unwrap();
    let ExtractReport::Variants { termdag, terms } = report else {
        panic!("expected variants");
    };
    let mut printed: Vec<String> = terms.iter().map(|t| termdag.to_string(*t)).collect();
    printed.sort();
    assert_eq!(printed, vec!["(Add (Num 1) (Num 2))", "(Add (Num 2) (Num 1))"]);
}

#[test]
fn serialized_snapshot_marks_roots() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut egraph = EGraph::default();
    egraph
        .run_program(vec![
            Command::Datatype {
                name: "Math".into(),
                variants: vec![Variant::new("Num", ["i64"]), Variant::new("Add", ["Math", "Math"])],
            },
            Command::Action(Action::Let("root".into(), expr!(Add (Num 1) (Num 2)))),
        ])
        .unwrap();

    let (sort, value) = egraph.eval_expr(&expr!(root)).unwrap();
    let serialized = egraph.serialize(SerializeConfig {
        root_eclasses: vec![(sort.clone(), value)],
        ..Default::default()
    });
    assert_eq!(
        serialized.root_eclasses,
        vec![egraph.value_to_class_id(&sort, &value)]
    );
    // the global is left out
    assert!(serialized.nodes.values().all(|n| n.op != "root"));
}

#[test]
fn overall_report_accumulates() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut egraph = EGraph::default();
    egraph.run_program(counter_program()).unwrap();
    let msgs = egraph
        .run_program(vec![
            Command::RunSchedule(Schedule::repeat(2, Schedule::run(""))),
            Command::RunSchedule(Schedule::run("")),
            Command::PrintOverallStatistics,
        ])
        .unwrap();

    assert_eq!(egraph.get_overall_run_report().iterations, 3);
    assert_eq!(egraph.get_run_report().as_ref().unwrap().iterations, 1);
    assert!(msgs[0].starts_with("Overall statistics:"));
}

#[test]
fn cyclic_classes_are_unextractable() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut egraph = EGraph::default();
    egraph
        .run_program(vec![
            Command::Sort("E".into(), None),
            Command::Function(
                FunctionDecl::constructor("h", Schema::new(vec![], "E".into()), None)
                    .unextractable(),
            ),
            Command::Function(FunctionDecl::constructor(
                "f",
                Schema::new(vec!["E".into()], "E".into()),
                None,
            )),
            Command::Action(Action::Union(expr!(f (h)), expr!((h)))),
        ])
        .unwrap();

    // the only extractable row of the class is f applied to the class itself
    let err = egraph
        .run_command(Command::Extract {
            expr: expr!(f (h)),
            variants: 0,
        })
        .unwrap_err();
    assert!(matches!(err, Error::ExtractError(_)));
    assert!(egraph.get_extract_report().is_none());

    let all = egraph.extract_all();
    assert!(all.best.is_empty());
    assert_eq!(all.unextractable.len(), 1);
}

fn commutative_math() -> Vec<Command> {
    vec![
        Command::Datatype {
            name: "Math".into(),
            variants: vec![
                Variant::new("Num", ["i64"]),
                Variant::new("Add", ["Math", "Math"]),
            ],
        },
        Command::Rewrite("".into(), Rewrite::new(expr!(Add a b), expr!(Add b a)), false),
        Command::Rewrite(
            "".into(),
            Rewrite::new(expr!(Add a (Add b c)), expr!(Add (Add a b) c)),
            false,
        ),
        Command::Action(Action::Expr(expr!(Add (Num 1) (Add (Num 2) (Num 3))))),
    ]
}

#[test]
fn rows_and_classes_never_shrink_without_deletes() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut egraph = EGraph::default();
    egraph.run_program(commutative_math()).unwrap();

    let classes = |egraph: &EGraph| {
        let all = egraph.extract_all();
        all.best.len() + all.unextractable.len()
    };
    let mut tuples = egraph.num_tuples();
    let mut n_classes = classes(&egraph);
    for _ in 0..4 {
        egraph
            .run_command(Command::RunSchedule(Schedule::run("")))
            .unwrap();
        let (new_tuples, new_classes) = (egraph.num_tuples(), classes(&egraph));
        assert!(new_tuples >= tuples, "{new_tuples} < {tuples}");
        assert!(new_classes >= n_classes, "{new_classes} < {n_classes}");
        tuples = new_tuples;
        n_classes = new_classes;
    }
}

#[test]
fn running_after_saturation_changes_nothing() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut egraph = EGraph::default();
    egraph.run_program(commutative_math()).unwrap();
    egraph
        .run_command(Command::RunSchedule(Schedule::saturate(Schedule::run(""))))
        .unwrap();
    assert_eq!(
        egraph.get_run_report().as_ref().unwrap().stop_reason,
        Some(StopReason::Saturated)
    );

    let tuples = egraph.num_tuples();
    egraph
        .run_command(Command::RunSchedule(Schedule::run("")))
        .unwrap();
    let report = egraph.get_run_report().clone().unwrap();
    assert!(!report.updated);
    assert_eq!(egraph.num_tuples(), tuples);
    assert!(egraph.check(&[Fact::eq(
        expr!(Add (Num 1) (Add (Num 2) (Num 3))),
        expr!(Add (Add (Num 3) (Num 2)) (Num 1)),
    )]));
}
