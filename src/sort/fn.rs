//! Sort to represent functions as values.
//!
//! To declare the sort, list the input sorts followed by the output sort:
//! `(sort IntToString (UnstableFn (i64) String))`
//!
//! `(unstable-fn "name" partial-args...)` builds a function value from a
//! declared function and `(unstable-app f args...)` applies one. Both are only
//! evaluable in actions, since applying may insert into the database.
//!
//! Values are interned like vectors: each entry is the function name plus the
//! partially applied arguments with their sorts.
use std::hash::{Hash, Hasher};
use std::iter::once;
use std::sync::Mutex;

use super::*;
use crate::constraint::{Constraint, ImpossibleConstraint};
use crate::core::{Atom, AtomTerm};
use crate::util::IndexSet;

#[derive(Clone, Debug)]
pub struct FnValue {
    pub name: Symbol,
    pub args: Vec<(ArcSort, Value)>,
}

// sorts are not comparable; two equal values always have the same sorts
impl PartialEq for FnValue {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.args.iter().map(|(_, v)| v).eq(other.args.iter().map(|(_, v)| v))
    }
}

impl Eq for FnValue {}

impl Hash for FnValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        for (_, v) in &self.args {
            v.hash(state);
        }
    }
}

#[derive(Debug)]
pub struct FunctionSort {
    name: Symbol,
    inputs: Vec<ArcSort>,
    output: ArcSort,
    functions: Mutex<IndexSet<FnValue>>,
}

impl FunctionSort {
    pub fn inputs(&self) -> &[ArcSort] {
        &self.inputs
    }

    pub fn output(&self) -> ArcSort {
        self.output.clone()
    }

    fn load(&self, value: &Value) -> FnValue {
        let functions = self.functions.lock().unwrap();
        functions.get_index(value.bits as usize).unwrap().clone()
    }

    fn store(&self, function: FnValue) -> Value {
        let (i, _) = self.functions.lock().unwrap().insert_full(function);
        Value {
            tag: self.name,
            bits: i as u64,
        }
    }
}

impl Presort for FunctionSort {
    fn presort_name() -> Symbol {
        "UnstableFn".into()
    }

    fn reserved_primitives() -> Vec<Symbol> {
        vec!["unstable-fn".into(), "unstable-app".into()]
    }

    fn make_sort(
        typeinfo: &mut TypeInfo,
        name: Symbol,
        args: &[Expr],
    ) -> Result<ArcSort, TypeError> {
        let presort = Self::presort_name();
        let [inputs, _] = args else {
            return Err(TypeError::PresortArgument(
                presort,
                Expr::call(name, args.to_vec()),
            ));
        };
        let output = sort_argument(typeinfo, presort, args, 1)?;
        // `(i64 String)` parses as a call of `i64`, and `()` as the unit literal
        let input_names: Vec<Expr> = match inputs {
            Expr::Call(first, rest) => once(Expr::Var(*first)).chain(rest.iter().cloned()).collect(),
            Expr::Lit(Literal::Unit) => vec![],
            other => return Err(TypeError::PresortArgument(presort, other.clone())),
        };
        let inputs = (0..input_names.len())
            .map(|i| sort_argument(typeinfo, presort, &input_names, i))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Arc::new(Self {
            name,
            inputs,
            output,
            functions: Default::default(),
        }))
    }
}

impl Sort for FunctionSort {
    fn name(&self) -> Symbol {
        self.name
    }

    fn as_arc_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync + 'static> {
        self
    }

    fn is_container_sort(&self) -> bool {
        true
    }

    // partial arguments of any sort may be captured
    fn is_eq_container_sort(&self) -> bool {
        true
    }

    fn inner_values(&self, value: &Value) -> Vec<(ArcSort, Value)> {
        self.load(value).args
    }

    fn canonicalize(&self, value: &mut Value, unionfind: &UnionFind) -> bool {
        let mut function = self.load(value);
        let mut changed = false;
        for (sort, v) in function.args.iter_mut() {
            changed |= sort.canonicalize(v, unionfind);
        }
        if changed {
            *value = self.store(function);
        }
        changed
    }

    fn register_primitives(self: Arc<Self>, info: &mut TypeInfo) {
        info.add_primitive(Ctor {
            name: "unstable-fn".into(),
            function: self.clone(),
            string: info.get_sort_nofail(),
        });
        info.add_primitive(Apply {
            name: "unstable-app".into(),
            function: self,
        });
    }

    fn extract_term(
        &self,
        _egraph: &EGraph,
        value: Value,
        extractor: &Extractor,
        termdag: &mut TermDag,
    ) -> Option<TermId> {
        let function = self.load(&value);
        let mut children = vec![termdag.lit(Literal::String(function.name))];
        for (sort, v) in function.args {
            children.push(extractor.extract_value(v, &sort, termdag)?);
        }
        Some(termdag.app("unstable-fn".into(), children))
    }
}

/// Takes the name of a function and any partially applied arguments.
/// The remaining inputs and the output of the named function must match the
/// function sort.
struct FunctionCtorTypeConstraint {
    name: Symbol,
    function: Arc<FunctionSort>,
    string: Arc<StringSort>,
}

impl TypeConstraint for FunctionCtorTypeConstraint {
    fn get(
        &self,
        arguments: &[AtomTerm],
        typeinfo: &TypeInfo,
    ) -> Vec<Constraint<AtomTerm, ArcSort>> {
        let arity_mismatch = |expected| {
            Constraint::Impossible(ImpossibleConstraint::ArityMismatch {
                atom: Atom {
                    head: self.name,
                    args: arguments.to_vec(),
                },
                expected,
                actual: arguments.len(),
            })
        };
        // at least the name plus the output
        if arguments.len() < 2 {
            return vec![arity_mismatch(2)];
        }
        let Some(AtomTerm::Literal(Literal::String(fname))) = arguments.first() else {
            return vec![Constraint::Assign(arguments[0].clone(), self.string.clone())];
        };
        let Some(func_type) = typeinfo.func_types.get(fname) else {
            return vec![Constraint::Impossible(ImpossibleConstraint::FunctionMismatch {
                function: *fname,
                sort: self.function.name,
            })];
        };
        let n_partial = arguments.len() - 2;
        if n_partial + self.function.inputs.len() != func_type.input.len() {
            return vec![arity_mismatch(func_type.input.len() + 2 - self.function.inputs.len())];
        }
        let remaining = &func_type.input[n_partial..];
        let same_sorts = remaining
            .iter()
            .map(|s| s.name())
            .eq(self.function.inputs.iter().map(|s| s.name()));
        if !same_sorts || func_type.output.name() != self.function.output.name() {
            return vec![Constraint::Impossible(ImpossibleConstraint::FunctionMismatch {
                function: *fname,
                sort: self.function.name,
            })];
        }
        func_type.input[..n_partial]
            .iter()
            .zip(&arguments[1..arguments.len() - 1])
            .map(|(sort, arg)| Constraint::Assign(arg.clone(), sort.clone()))
            .chain(once(Constraint::Assign(
                arguments[arguments.len() - 1].clone(),
                self.function.clone() as ArcSort,
            )))
            .collect()
    }
}

// (unstable-fn "name" partial-args...)
struct Ctor {
    name: Symbol,
    function: Arc<FunctionSort>,
    string: Arc<StringSort>,
}

impl PrimitiveLike for Ctor {
    fn name(&self) -> Symbol {
        self.name
    }

    fn get_type_constraints(&self) -> Box<dyn TypeConstraint> {
        Box::new(FunctionCtorTypeConstraint {
            name: self.name,
            function: self.function.clone(),
            string: self.string.clone(),
        })
    }

    fn apply(&self, values: &[Value], egraph: Option<&mut EGraph>) -> Option<Value> {
        let (name, partial) = values.split_first()?;
        let name = Symbol::load(&self.string, name);
        let input = egraph?.function_input_sorts(name)?;
        let args = input.into_iter().zip(partial.iter().copied()).collect();
        Some(self.function.store(FnValue { name, args }))
    }
}

// (unstable-app f args...)
struct Apply {
    name: Symbol,
    function: Arc<FunctionSort>,
}

impl PrimitiveLike for Apply {
    fn name(&self) -> Symbol {
        self.name
    }

    fn get_type_constraints(&self) -> Box<dyn TypeConstraint> {
        let mut sorts: Vec<ArcSort> = vec![self.function.clone()];
        sorts.extend(self.function.inputs.iter().cloned());
        sorts.push(self.function.output.clone());
        SimpleTypeConstraint::new(self.name, sorts).into_box()
    }

    fn apply(&self, values: &[Value], egraph: Option<&mut EGraph>) -> Option<Value> {
        let (f, rest) = values.split_first()?;
        let function = self.function.load(f);
        let args: Vec<Value> = function
            .args
            .iter()
            .map(|(_, v)| *v)
            .chain(rest.iter().copied())
            .collect();
        egraph?.call_function(function.name, &args).ok()
    }
}

#[cfg(test)]
mod tests {
    use crate::ast::*;
    use crate::{expr, EGraph};

    #[test]
    fn partial_application_calls_the_table() {
        let mut egraph = EGraph::default();
        egraph
            .run_program(vec![
                Command::Sort(
                    "IntFn".into(),
                    Some(("UnstableFn".into(), vec![Expr::call("i64", []), expr!(i64)])),
                ),
                Command::Function(FunctionDecl::function(
                    "add",
                    Schema::new(vec!["i64".into(), "i64".into()], "i64".into()),
                    None,
                )),
                Command::Action(Action::Set("add".into(), vec![expr!(1), expr!(2)], expr!(3))),
                Command::Action(Action::Let(
                    "inc".into(),
                    Expr::call("unstable-fn", [Expr::lit("add"), expr!(1)]),
                )),
                Command::Action(Action::Let(
                    "r".into(),
                    Expr::call("unstable-app", [expr!(inc), expr!(2)]),
                )),
                Command::Check(vec![Fact::eq(expr!(r), expr!(3))]),
            ])
            .unwrap();
    }
}
