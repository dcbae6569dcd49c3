//! A small constraint solver for sort inference.
//!
//! Each atom of a flattened rule contributes constraints over its argument
//! terms. Overloaded heads (a function and primitives sharing a name, or one
//! primitive registered per container sort) contribute an [`Constraint::Xor`]
//! of alternatives; propagation runs to a fixpoint and an alternative is only
//! committed once every other one has been ruled out.
use crate::{
    core::{Atom, AtomTerm, HeadOrEq},
    typechecking::TypeError,
    util::HashMap,
    ArcSort, Symbol, TypeInfo,
};
use std::hash::Hash;
use std::{fmt::Debug, iter::once};

#[derive(Clone, Debug)]
pub enum ImpossibleConstraint {
    ArityMismatch {
        atom: Atom<Symbol>,
        expected: usize,
        actual: usize,
    },
    FunctionMismatch {
        function: Symbol,
        sort: Symbol,
    },
}

#[derive(Clone, Debug)]
pub enum Constraint<Var, Value> {
    Eq(Var, Var),
    Assign(Var, Value),
    And(Vec<Constraint<Var, Value>>),
    // Exactly one of the constraints holds
    // and all others are false
    Xor(Vec<Constraint<Var, Value>>),
    Impossible(ImpossibleConstraint),
}

#[derive(Debug)]
pub enum ConstraintError<Var, Value> {
    InconsistentConstraint(Var, Value, Value),
    UnconstrainedVar(Var),
    Ambiguous(Var, Vec<Value>),
    NoConstraintSatisfied(Vec<ConstraintError<Var, Value>>),
    ImpossibleCaseIdentified(ImpossibleConstraint),
}

impl ConstraintError<AtomTerm, ArcSort> {
    pub fn to_type_error(&self) -> TypeError {
        match &self {
            ConstraintError::InconsistentConstraint(x, v1, v2) => TypeError::Mismatch {
                expr: x.to_expr(),
                expected: v1.clone(),
                actual: v2.clone(),
            },
            ConstraintError::UnconstrainedVar(v) => TypeError::InferenceFailure(v.to_expr()),
            ConstraintError::Ambiguous(v, candidates) => TypeError::Ambiguous {
                expr: v.to_expr(),
                candidates: candidates.iter().map(|sort| sort.name()).collect(),
            },
            ConstraintError::NoConstraintSatisfied(constraints) => {
                // a single failing alternative is reported as is
                if let [single] = constraints.as_slice() {
                    single.to_type_error()
                } else {
                    TypeError::AllAlternativeFailed(
                        constraints.iter().map(|c| c.to_type_error()).collect(),
                    )
                }
            }
            ConstraintError::ImpossibleCaseIdentified(ImpossibleConstraint::ArityMismatch {
                atom,
                expected,
                actual,
            }) => {
                debug_assert_eq!(*actual, atom.args.len());
                TypeError::Arity {
                    expr: atom.to_expr(),
                    expected: *expected,
                }
            }
            ConstraintError::ImpossibleCaseIdentified(ImpossibleConstraint::FunctionMismatch {
                function,
                sort,
            }) => TypeError::FunctionTypeMismatch(*function, *sort),
        }
    }
}

impl<Var, Value> Constraint<Var, Value>
where
    Var: Eq + PartialEq + Hash + Clone,
    Value: Clone,
{
    /// Takes a partial assignment and update it based on the constraint.
    /// If there's a conflict, returns the conflicting variable, the assigned conflicting types.
    /// Otherwise, return whether the assignment is updated.
    fn update<K: Eq>(
        &self,
        assignment: &mut Assignment<Var, Value>,
        key: impl Fn(&Value) -> K + Copy,
    ) -> Result<bool, ConstraintError<Var, Value>> {
        match self {
            Constraint::Eq(x, y) => match (assignment.0.get(x), assignment.0.get(y)) {
                (Some(value), None) => {
                    assignment.insert(y.clone(), value.clone());
                    Ok(true)
                }
                (None, Some(value)) => {
                    assignment.insert(x.clone(), value.clone());
                    Ok(true)
                }
                (Some(v1), Some(v2)) => {
                    if key(v1) == key(v2) {
                        Ok(false)
                    } else {
                        Err(ConstraintError::InconsistentConstraint(
                            x.clone(),
                            v1.clone(),
                            v2.clone(),
                        ))
                    }
                }
                (None, None) => Ok(false),
            },
            Constraint::Assign(x, v) => match assignment.0.get(x) {
                None => {
                    assignment.insert(x.clone(), v.clone());
                    Ok(true)
                }
                Some(value) => {
                    if key(value) == key(v) {
                        Ok(false)
                    } else {
                        Err(ConstraintError::InconsistentConstraint(
                            x.clone(),
                            v.clone(),
                            value.clone(),
                        ))
                    }
                }
            },
            Constraint::Xor(cs) => {
                let mut survivors = vec![];
                let mut errors = vec![];
                for c in cs {
                    let mut candidate = assignment.clone();
                    match c.update(&mut candidate, key) {
                        Ok(updated) => survivors.push((candidate, updated)),
                        Err(error) => errors.push(error),
                    }
                }
                // One surviving alternative is the only one that can hold, so commit it.
                // With several survivors nothing is learned yet.
                match survivors.len() {
                    0 => Err(ConstraintError::NoConstraintSatisfied(errors)),
                    1 => {
                        let (candidate, updated) = survivors.pop().unwrap();
                        *assignment = candidate;
                        Ok(updated)
                    }
                    _ => Ok(false),
                }
            }
            Constraint::Impossible(constraint) => Err(ConstraintError::ImpossibleCaseIdentified(
                constraint.clone(),
            )),
            Constraint::And(cs) => {
                let mut updated = false;
                for c in cs {
                    updated |= c.update(assignment, key)?;
                }
                Ok(updated)
            }
        }
    }

    /// Values that some still-feasible alternative of an undecided `Xor` would give `var`.
    fn candidates<K: Eq>(
        &self,
        var: &Var,
        assignment: &Assignment<Var, Value>,
        key: impl Fn(&Value) -> K + Copy,
        out: &mut Vec<Value>,
    ) {
        match self {
            Constraint::Xor(cs) => {
                for c in cs {
                    let mut candidate = assignment.clone();
                    if c.update(&mut candidate, key).is_ok() {
                        if let Some(value) = candidate.get(var) {
                            if !out.iter().any(|v| key(v) == key(value)) {
                                out.push(value.clone());
                            }
                        }
                    }
                }
            }
            Constraint::And(cs) => cs
                .iter()
                .for_each(|c| c.candidates(var, assignment, key, out)),
            _ => (),
        }
    }
}

#[derive(Debug)]
pub struct Problem<Var, Value> {
    pub constraints: Vec<Constraint<Var, Value>>,
}

impl<Var, Value> Default for Problem<Var, Value> {
    fn default() -> Self {
        Self {
            constraints: vec![],
        }
    }
}

#[derive(Clone, Debug)]
pub(crate) struct Assignment<Var, Value>(pub HashMap<Var, Value>);

impl<Var, Value> Assignment<Var, Value>
where
    Var: Hash + Eq + PartialEq,
{
    pub fn insert(&mut self, var: Var, value: Value) -> Option<Value> {
        self.0.insert(var, value)
    }

    pub fn get(&self, var: &Var) -> Option<&Value> {
        self.0.get(var)
    }
}

impl<Var, Value> Problem<Var, Value>
where
    Var: Eq + PartialEq + Hash + Clone + Debug,
    Value: Clone,
{
    pub(crate) fn solve<'a, K: Eq + Debug>(
        &'a self,
        range: impl Iterator<Item = &'a Var>,
        key: impl Fn(&Value) -> K + Copy,
    ) -> Result<Assignment<Var, Value>, ConstraintError<Var, Value>> {
        let mut assignment = Assignment(HashMap::default());
        let mut changed = true;
        while changed {
            changed = false;
            for constraint in self.constraints.iter() {
                changed |= constraint.update(&mut assignment, key)?;
            }
        }

        for v in range {
            if !assignment.0.contains_key(v) {
                let mut candidates = vec![];
                for constraint in self.constraints.iter() {
                    constraint.candidates(v, &assignment, key, &mut candidates);
                }
                return Err(if candidates.len() > 1 {
                    ConstraintError::Ambiguous(v.clone(), candidates)
                } else {
                    ConstraintError::UnconstrainedVar(v.clone())
                });
            }
        }
        Ok(assignment)
    }
}

impl Atom<HeadOrEq> {
    pub fn get_constraints(
        &self,
        type_info: &TypeInfo,
    ) -> Result<Vec<Constraint<AtomTerm, ArcSort>>, TypeError> {
        let literal_constraints = get_literal_constraints(&self.args, type_info);
        match &self.head {
            HeadOrEq::Eq => {
                assert_eq!(self.args.len(), 2);
                let constraints = literal_constraints
                    .chain(once(Constraint::Eq(
                        self.args[0].clone(),
                        self.args[1].clone(),
                    )))
                    .collect();
                Ok(constraints)
            }
            HeadOrEq::Symbol(head) => {
                // An atom can have potentially different semantics due to polymorphism
                // e.g. (set-empty) can mean any empty set with some element type.
                // Each possible instantiation is a vec of constraints, and
                // `Constraint::Xor` means one and only one of them can hold.
                let mut xor_constraints: Vec<Vec<Constraint<AtomTerm, ArcSort>>> = vec![];

                if let Some(typ) = type_info.func_types.get(head) {
                    let mut constraints = vec![];
                    if typ.input.len() + 1 != self.args.len() {
                        constraints.push(Constraint::Impossible(
                            ImpossibleConstraint::ArityMismatch {
                                atom: Atom {
                                    head: *head,
                                    args: self.args.clone(),
                                },
                                expected: typ.input.len() + 1,
                                actual: self.args.len(),
                            },
                        ));
                    } else {
                        for (arg_typ, arg) in typ
                            .input
                            .iter()
                            .cloned()
                            .chain(once(typ.output.clone()))
                            .zip(self.args.iter().cloned())
                        {
                            constraints.push(Constraint::Assign(arg, arg_typ));
                        }
                    }
                    xor_constraints.push(constraints);
                }

                if let Some(primitives) = type_info.primitives.get(head) {
                    for p in primitives {
                        let constraints = p.get_type_constraints().get(&self.args, type_info);
                        xor_constraints.push(constraints);
                    }
                }

                // literal constraints go first as they are the most informative
                match xor_constraints.len() {
                    0 => Err(TypeError::UnboundFunction(*head)),
                    1 => Ok(literal_constraints
                        .chain(xor_constraints.pop().unwrap_or_default())
                        .collect()),
                    _ => Ok(literal_constraints
                        .chain(once(Constraint::Xor(
                            xor_constraints.into_iter().map(Constraint::And).collect(),
                        )))
                        .collect()),
                }
            }
        }
    }
}

pub(crate) fn get_literal_constraints<'a>(
    args: &'a [AtomTerm],
    type_info: &'a TypeInfo,
) -> impl Iterator<Item = Constraint<AtomTerm, ArcSort>> + 'a {
    args.iter().filter_map(|arg| match arg {
        AtomTerm::Var(_) => None,
        AtomTerm::Literal(lit) => {
            let typ = type_info.infer_literal(lit);
            Some(Constraint::Assign(arg.clone(), typ))
        }
    })
}

/// The sort constraints a primitive places on its arguments. The last
/// argument is the primitive's output.
pub trait TypeConstraint {
    fn get(
        &self,
        arguments: &[AtomTerm],
        typeinfo: &TypeInfo,
    ) -> Vec<Constraint<AtomTerm, ArcSort>>;
}

/// Construct a set of `Assign` constraints that fully constrain the type of arguments
pub struct SimpleTypeConstraint {
    name: Symbol,
    sorts: Vec<ArcSort>,
}

impl SimpleTypeConstraint {
    pub fn new(name: Symbol, sorts: Vec<ArcSort>) -> SimpleTypeConstraint {
        SimpleTypeConstraint { name, sorts }
    }

    pub fn into_box(self) -> Box<dyn TypeConstraint> {
        Box::new(self)
    }
}

impl TypeConstraint for SimpleTypeConstraint {
    fn get(
        &self,
        arguments: &[AtomTerm],
        _typeinfo: &TypeInfo,
    ) -> Vec<Constraint<AtomTerm, ArcSort>> {
        if arguments.len() != self.sorts.len() {
            vec![Constraint::Impossible(
                ImpossibleConstraint::ArityMismatch {
                    atom: Atom {
                        head: self.name,
                        args: arguments.to_vec(),
                    },
                    expected: self.sorts.len(),
                    actual: arguments.len(),
                },
            )]
        } else {
            arguments
                .iter()
                .cloned()
                .zip(self.sorts.iter().cloned())
                .map(|(arg, sort)| Constraint::Assign(arg, sort))
                .collect()
        }
    }
}

/// This constraint requires all types to be equivalent to each other
pub struct AllEqualTypeConstraint {
    name: Symbol,
    sort: Option<ArcSort>,
    exact_length: Option<usize>,
    output: Option<ArcSort>,
}

impl AllEqualTypeConstraint {
    pub fn new(name: Symbol) -> AllEqualTypeConstraint {
        AllEqualTypeConstraint {
            name,
            sort: None,
            exact_length: None,
            output: None,
        }
    }

    pub fn into_box(self) -> Box<dyn TypeConstraint> {
        Box::new(self)
    }

    /// Requires all arguments to have the given sort.
    /// If `with_output_sort` is not specified, this requirement
    /// also applies to the output argument.
    pub fn with_all_arguments_sort(mut self, sort: ArcSort) -> Self {
        self.sort = Some(sort);
        self
    }

    /// Requires the length of arguments to be `exact_length`.
    /// Note this includes both input arguments and output argument.
    pub fn with_exact_length(mut self, exact_length: usize) -> Self {
        self.exact_length = Some(exact_length);
        self
    }

    /// Requires the output argument to have the given sort.
    pub fn with_output_sort(mut self, output_sort: ArcSort) -> Self {
        self.output = Some(output_sort);
        self
    }
}

impl TypeConstraint for AllEqualTypeConstraint {
    fn get(
        &self,
        mut arguments: &[AtomTerm],
        _typeinfo: &TypeInfo,
    ) -> Vec<Constraint<AtomTerm, ArcSort>> {
        match self.exact_length {
            Some(exact_length) if exact_length != arguments.len() => {
                return vec![Constraint::Impossible(
                    ImpossibleConstraint::ArityMismatch {
                        atom: Atom {
                            head: self.name,
                            args: arguments.to_vec(),
                        },
                        expected: exact_length,
                        actual: arguments.len(),
                    },
                )]
            }
            _ => (),
        }

        let mut constraints = vec![];
        if let Some(output) = self.output.clone() {
            match arguments.split_last() {
                Some((out, inputs)) => {
                    constraints.push(Constraint::Assign(out.clone(), output));
                    arguments = inputs;
                }
                None => {
                    return vec![Constraint::Impossible(
                        ImpossibleConstraint::ArityMismatch {
                            atom: Atom {
                                head: self.name,
                                args: vec![],
                            },
                            expected: 1,
                            actual: 0,
                        },
                    )]
                }
            }
        }

        if let Some(sort) = self.sort.clone() {
            constraints.extend(
                arguments
                    .iter()
                    .cloned()
                    .map(|arg| Constraint::Assign(arg, sort.clone())),
            )
        } else if let Some((first, rest)) = arguments.split_first() {
            constraints.extend(
                rest.iter()
                    .cloned()
                    .map(|arg| Constraint::Eq(arg, first.clone())),
            );
        }
        constraints
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &&'static str) -> &'static str {
        s
    }

    #[test]
    fn propagates_through_equalities() {
        let problem = Problem {
            constraints: vec![
                Constraint::Eq("a", "b"),
                Constraint::Eq("b", "c"),
                Constraint::Assign("c", "i64"),
            ],
        };
        let assignment = problem.solve(["a", "b", "c"].iter(), key).unwrap();
        assert_eq!(assignment.get(&"a"), Some(&"i64"));
    }

    #[test]
    fn xor_commits_the_only_feasible_alternative() {
        let problem: Problem<&str, &str> = Problem {
            constraints: vec![
                Constraint::Assign("x", "f64"),
                Constraint::Xor(vec![
                    Constraint::And(vec![
                        Constraint::Assign("x", "i64"),
                        Constraint::Assign("out", "i64"),
                    ]),
                    Constraint::And(vec![
                        Constraint::Assign("x", "f64"),
                        Constraint::Assign("out", "f64"),
                    ]),
                ]),
            ],
        };
        let assignment = problem.solve(["x", "out"].iter(), key).unwrap();
        assert_eq!(assignment.get(&"out"), Some(&"f64"));
    }

    #[test]
    fn undecided_xor_is_ambiguous() {
        let problem: Problem<&str, &str> = Problem {
            constraints: vec![Constraint::Xor(vec![
                Constraint::Assign("out", "SetA"),
                Constraint::Assign("out", "SetB"),
            ])],
        };
        match problem.solve(["out"].iter(), key) {
            Err(ConstraintError::Ambiguous(var, candidates)) => {
                assert_eq!(var, "out");
                assert_eq!(candidates, vec!["SetA", "SetB"]);
            }
            other => panic!("expected ambiguity, got {other:?}"),
        }
    }

    #[test]
    fn conflicting_assignments_fail() {
        let problem: Problem<&str, &str> = Problem {
            constraints: vec![
                Constraint::Assign("x", "i64"),
                Constraint::Eq("x", "y"),
                Constraint::Assign("y", "String"),
            ],
        };
        assert!(matches!(
            problem.solve(["x", "y"].iter(), key),
            Err(ConstraintError::InconsistentConstraint(..))
        ));
    }
}
