use thiserror::Error;

use crate::{
    constraint::{get_literal_constraints, Constraint, ImpossibleConstraint, Problem},
    core::{Atom, AtomTerm, CoreAction, CoreRule, Flattener, HeadOrEq, ResolvedCall, ResolvedCoreRule},
    sort::*,
    util::{HEntry, HashMap, HashSet, IndexMap, IndexSet, ListDisplay},
    *,
};

#[derive(Clone, Debug)]
pub struct FuncType {
    pub name: Symbol,
    pub input: Vec<ArcSort>,
    pub output: ArcSort,
}

/// An expression lowered to core actions whose value ends up in `output`.
#[derive(Clone, Debug)]
pub struct TypedExpr {
    pub rule: ResolvedCoreRule,
    pub output: AtomTerm,
    pub sort: ArcSort,
}

/// Stores resolved typechecking information.
#[derive(Clone)]
pub struct TypeInfo {
    presorts: HashMap<Symbol, PreSort>,
    reserved_primitives: HashSet<Symbol>,
    sorts: HashMap<Symbol, ArcSort>,
    pub(crate) primitives: HashMap<Symbol, Vec<Primitive>>,
    pub(crate) func_types: HashMap<Symbol, FuncType>,
    globals: HashSet<Symbol>,
}

impl Default for TypeInfo {
    fn default() -> Self {
        let mut res = Self {
            presorts: Default::default(),
            reserved_primitives: Default::default(),
            sorts: Default::default(),
            primitives: Default::default(),
            func_types: Default::default(),
            globals: Default::default(),
        };

        res.add_sort(UnitSort);
        res.add_sort(StringSort);
        res.add_sort(BoolSort);
        res.add_sort(I64Sort);
        res.add_sort(F64Sort);
        res.add_sort(RationalSort::default());

        // none of the presorts can already be bound in a fresh table
        let _ = res.add_presort::<MapSort>();
        let _ = res.add_presort::<SetSort>();
        let _ = res.add_presort::<VecSort>();
        let _ = res.add_presort::<FunctionSort>();

        res.add_primitive(NotEqualPrimitive {
            unit: res.get_sort_nofail::<UnitSort>(),
        });

        res
    }
}

impl TypeInfo {
    /// Adds a sort constructor to the typechecker's known set of types.
    pub fn add_presort<S: Presort>(&mut self) -> Result<(), TypeError> {
        let name = S::presort_name();
        match self.presorts.entry(name) {
            HEntry::Occupied(_) => Err(TypeError::SortAlreadyBound(name)),
            HEntry::Vacant(e) => {
                e.insert(S::make_sort);
                self.reserved_primitives.extend(S::reserved_primitives());
                Ok(())
            }
        }
    }

    pub fn add_sort<S: Sort + 'static>(&mut self, sort: S) {
        let sort = Arc::new(sort);
        if self.add_arcsort(sort.clone()).is_err() {
            log::warn!("Sort {} is already declared", sort.name());
        }
    }

    pub fn add_arcsort(&mut self, sort: ArcSort) -> Result<(), TypeError> {
        let name = sort.name();
        match self.sorts.entry(name) {
            HEntry::Occupied(_) => Err(TypeError::SortAlreadyBound(name)),
            HEntry::Vacant(e) => {
                e.insert(sort.clone());
                sort.register_primitives(self);
                Ok(())
            }
        }
    }

    /// Declare a fresh eq sort, or instantiate a presort with arguments.
    pub fn declare_sort(
        &mut self,
        name: impl Into<Symbol>,
        presort_and_args: &Option<(Symbol, Vec<Expr>)>,
    ) -> Result<ArcSort, TypeError> {
        let name = name.into();
        if self.func_types.contains_key(&name) {
            return Err(TypeError::FunctionAlreadyBound(name));
        }

        let sort = match presort_and_args {
            None => Arc::new(EqSort { name }),
            Some((presort, args)) => {
                if let Some(mksort) = self.presorts.get(presort).copied() {
                    mksort(self, name, args)?
                } else {
                    return Err(TypeError::PresortNotFound(*presort));
                }
            }
        };

        self.add_arcsort(sort.clone())?;
        Ok(sort)
    }

    pub fn add_primitive(&mut self, prim: impl Into<Primitive>) {
        let prim = prim.into();
        self.primitives.entry(prim.name()).or_default().push(prim);
    }

    pub fn get_sorts_by<S: Sort>(&self, pred: impl Fn(&Arc<S>) -> bool) -> Vec<Arc<S>> {
        let mut results = Vec::new();
        for sort in self.sorts.values() {
            let sort = sort.clone().as_arc_any();
            if let Ok(sort) = Arc::downcast(sort) {
                if pred(&sort) {
                    results.push(sort);
                }
            }
        }
        results
    }

    /// The unique registered sort of type `S`. Panics when there is none or
    /// several, so only use it for the built-in base sorts.
    pub fn get_sort_nofail<S: Sort>(&self) -> Arc<S> {
        let results = self.get_sorts_by::<S>(|_| true);
        assert_eq!(
            results.len(),
            1,
            "Expected exactly one sort for type {}",
            std::any::type_name::<S>()
        );
        results.into_iter().next().unwrap()
    }

    pub fn get_sort_by_name(&self, sym: &Symbol) -> Option<&ArcSort> {
        self.sorts.get(sym)
    }

    pub fn get_prims(&self, sym: &Symbol) -> Option<&Vec<Primitive>> {
        self.primitives.get(sym)
    }

    pub fn is_primitive(&self, sym: Symbol) -> bool {
        self.primitives.contains_key(&sym) || self.reserved_primitives.contains(&sym)
    }

    pub fn get_func_type(&self, sym: &Symbol) -> Option<&FuncType> {
        self.func_types.get(sym)
    }

    pub fn is_global(&self, sym: Symbol) -> bool {
        self.globals.contains(&sym)
    }

    pub fn infer_literal(&self, lit: &Literal) -> ArcSort {
        match lit {
            Literal::Int(_) => self.get_sort_nofail::<I64Sort>(),
            Literal::F64(_) => self.get_sort_nofail::<F64Sort>(),
            Literal::String(_) => self.get_sort_nofail::<StringSort>(),
            Literal::Bool(_) => self.get_sort_nofail::<BoolSort>(),
            Literal::Unit => self.get_sort_nofail::<UnitSort>(),
        }
    }

    fn lookup_sort(&self, name: Symbol) -> Result<ArcSort, TypeError> {
        self.sorts
            .get(&name)
            .cloned()
            .ok_or(TypeError::UndefinedSort(name))
    }

    /// Register the signature of a function declaration.
    pub(crate) fn declare_function(&mut self, decl: &FunctionDecl) -> Result<FuncType, TypeError> {
        if self.sorts.contains_key(&decl.name) {
            return Err(TypeError::SortAlreadyBound(decl.name));
        }
        if self.is_primitive(decl.name) {
            return Err(TypeError::PrimitiveAlreadyBound(decl.name));
        }
        if self.func_types.contains_key(&decl.name) {
            return Err(TypeError::FunctionAlreadyBound(decl.name));
        }
        let input = decl
            .schema
            .input
            .iter()
            .map(|name| self.lookup_sort(*name))
            .collect::<Result<Vec<_>, _>>()?;
        let output = self.lookup_sort(decl.schema.output)?;
        if decl.merge.is_some() && output.is_eq_sort() {
            return Err(TypeError::MergeOnEqSort(decl.name));
        }
        let ftype = FuncType {
            name: decl.name,
            input,
            output,
        };
        self.func_types.insert(decl.name, ftype.clone());
        Ok(ftype)
    }

    /// Globals are nullary functions; references to their names become calls.
    pub(crate) fn declare_global(&mut self, name: Symbol, sort: ArcSort) -> Result<FuncType, TypeError> {
        if self.func_types.contains_key(&name) || self.is_primitive(name) {
            return Err(TypeError::AlreadyDefined(name));
        }
        let ftype = FuncType {
            name,
            input: vec![],
            output: sort,
        };
        self.func_types.insert(name, ftype.clone());
        self.globals.insert(name);
        Ok(ftype)
    }

    pub(crate) fn typecheck_rule(&self, rule: &Rule) -> Result<ResolvedCoreRule, TypeError> {
        let core = Flattener::new(self).flatten_rule(rule)?;
        self.resolve(core, &Default::default())
    }

    pub(crate) fn typecheck_query(&self, facts: &[Fact]) -> Result<ResolvedCoreRule, TypeError> {
        let body = Flattener::new(self).flatten_query(facts)?;
        self.resolve(CoreRule { body, head: vec![] }, &Default::default())
    }

    /// Typecheck actions run outside of any rule, where `binding` provides
    /// the sorts of variables set up by the caller.
    pub(crate) fn typecheck_actions(
        &self,
        actions: &[Action],
        binding: &IndexMap<Symbol, ArcSort>,
    ) -> Result<ResolvedCoreRule, TypeError> {
        let mut bound: IndexSet<Symbol> = binding.keys().copied().collect();
        let head = Flattener::new(self).flatten_actions(actions, &mut bound)?;
        self.resolve(
            CoreRule {
                body: Default::default(),
                head,
            },
            binding,
        )
    }

    pub(crate) fn typecheck_expr(
        &self,
        expr: &Expr,
        binding: &IndexMap<Symbol, ArcSort>,
    ) -> Result<TypedExpr, TypeError> {
        let mut bound: IndexSet<Symbol> = binding.keys().copied().collect();
        let mut head = vec![];
        let output = Flattener::new(self).flatten_action_expr(expr, &mut bound, &mut head)?;
        let rule = self.resolve(
            CoreRule {
                body: Default::default(),
                head,
            },
            binding,
        )?;
        let sort = match &output {
            AtomTerm::Var(v) => rule.var_types.get(v).cloned().ok_or(TypeError::Unbound(*v))?,
            AtomTerm::Literal(lit) => self.infer_literal(lit),
        };
        Ok(TypedExpr { rule, output, sort })
    }

    fn action_constraints(
        &self,
        action: &CoreAction<Symbol>,
    ) -> Result<Vec<Constraint<AtomTerm, ArcSort>>, TypeError> {
        match action {
            CoreAction::Let(v, f, args) => {
                let mut args = args.clone();
                args.push(AtomTerm::Var(*v));
                Atom {
                    head: HeadOrEq::Symbol(*f),
                    args,
                }
                .get_constraints(self)
            }
            CoreAction::LetAtomTerm(v, term) => Ok(get_literal_constraints(std::slice::from_ref(term), self)
                .chain(std::iter::once(Constraint::Eq(AtomTerm::Var(*v), term.clone())))
                .collect()),
            CoreAction::Set(f, args, rhs) => {
                let mut all = args.clone();
                all.push(rhs.clone());
                self.table_constraints(*f, &all, args.len())
            }
            CoreAction::Change(_, f, args) => self.table_constraints(*f, args, args.len()),
            CoreAction::Union(a, b) => {
                let pair = [a.clone(), b.clone()];
                Ok(get_literal_constraints(&pair, self)
                    .chain(std::iter::once(Constraint::Eq(a.clone(), b.clone())))
                    .collect())
            }
            CoreAction::Panic(_) => Ok(vec![]),
        }
    }

    /// Constraints for `set` and `delete`/`subsume`, which only apply to
    /// functions. `terms` are the inputs, optionally followed by the output.
    fn table_constraints(
        &self,
        f: Symbol,
        terms: &[AtomTerm],
        n_inputs: usize,
    ) -> Result<Vec<Constraint<AtomTerm, ArcSort>>, TypeError> {
        let Some(ftype) = self.func_types.get(&f) else {
            return Err(if self.is_primitive(f) {
                TypeError::SetPrimitive(f)
            } else {
                TypeError::UnboundFunction(f)
            });
        };
        let mut constraints: Vec<_> = get_literal_constraints(terms, self).collect();
        if ftype.input.len() != n_inputs {
            constraints.push(Constraint::Impossible(ImpossibleConstraint::ArityMismatch {
                atom: Atom {
                    head: f,
                    args: terms.to_vec(),
                },
                expected: ftype.input.len() + terms.len() - n_inputs,
                actual: terms.len(),
            }));
            return Ok(constraints);
        }
        let sorts = ftype.input.iter().chain(std::iter::once(&ftype.output));
        for (term, sort) in terms.iter().zip(sorts) {
            constraints.push(Constraint::Assign(term.clone(), sort.clone()));
        }
        Ok(constraints)
    }

    /// Infer sorts, remove equality atoms and pick the overload of every call.
    fn resolve(
        &self,
        mut rule: CoreRule,
        binding: &IndexMap<Symbol, ArcSort>,
    ) -> Result<ResolvedCoreRule, TypeError> {
        let body_vars = rule.body.get_vars();

        let mut problem = Problem::default();
        for atom in &rule.body.atoms {
            problem.constraints.extend(atom.get_constraints(self)?);
        }
        for action in &rule.head {
            problem.constraints.extend(self.action_constraints(action)?);
        }
        for (var, sort) in binding {
            problem
                .constraints
                .push(Constraint::Assign(AtomTerm::Var(*var), sort.clone()));
        }

        let mut range: IndexSet<AtomTerm> = IndexSet::default();
        for atom in &rule.body.atoms {
            range.extend(atom.args.iter().cloned());
        }
        for action in &rule.head {
            range.extend(action.used_vars().into_iter().map(AtomTerm::Var));
            range.extend(action.bound_var().map(AtomTerm::Var));
        }

        let assignment = problem
            .solve(range.iter(), |sort: &ArcSort| sort.name())
            .map_err(|e| e.to_type_error())?;
        let sort_of = |term: &AtomTerm| -> Result<ArcSort, TypeError> {
            match term {
                AtomTerm::Literal(lit) => Ok(self.infer_literal(lit)),
                AtomTerm::Var(_) => assignment
                    .get(term)
                    .cloned()
                    .ok_or_else(|| TypeError::InferenceFailure(term.to_expr())),
            }
        };

        let (substitution, unsat) = rule.canonicalize();

        let mut atoms = vec![];
        for atom in &rule.body.atoms {
            let HeadOrEq::Symbol(head) = &atom.head else {
                continue;
            };
            let types = atom.args.iter().map(&sort_of).collect::<Result<Vec<_>, _>>()?;
            atoms.push(Atom {
                head: ResolvedCall::from_resolution(head, &types, self)?,
                args: atom.args.clone(),
            });
        }

        let mut head = vec![];
        for action in &rule.head {
            head.push(match action {
                CoreAction::Let(v, f, args) => {
                    let mut types = args.iter().map(&sort_of).collect::<Result<Vec<_>, _>>()?;
                    types.push(sort_of(&AtomTerm::Var(*v))?);
                    CoreAction::Let(*v, ResolvedCall::from_resolution(f, &types, self)?, args.clone())
                }
                CoreAction::LetAtomTerm(v, term) => CoreAction::LetAtomTerm(*v, term.clone()),
                CoreAction::Set(f, args, rhs) => {
                    CoreAction::Set(self.resolve_table(f)?, args.clone(), rhs.clone())
                }
                CoreAction::Change(change, f, args) => {
                    CoreAction::Change(*change, self.resolve_table(f)?, args.clone())
                }
                CoreAction::Union(a, b) => {
                    let sort = sort_of(a)?;
                    if !sort.is_eq_sort() {
                        return Err(TypeError::NonEqTypeUnion(sort));
                    }
                    CoreAction::Union(a.clone(), b.clone())
                }
                CoreAction::Panic(msg) => CoreAction::Panic(msg.clone()),
            });
        }

        let mut var_types = IndexMap::default();
        for term in range.iter() {
            if let AtomTerm::Var(v) = term {
                var_types.insert(*v, sort_of(term)?);
            }
        }

        let resolved = ResolvedCoreRule {
            body: crate::core::Query { atoms },
            head,
            var_types,
            unsat,
        };
        let body_vars: Vec<Symbol> = body_vars
            .iter()
            .filter_map(|v| match substitution.get(v) {
                Some(AtomTerm::Var(w)) => Some(*w),
                Some(AtomTerm::Literal(_)) => None,
                None => Some(*v),
            })
            .collect();
        resolved.check_grounded(&body_vars, binding.keys().copied())?;
        Ok(resolved)
    }

    fn resolve_table(&self, f: &Symbol) -> Result<ResolvedCall, TypeError> {
        self.func_types
            .get(f)
            .cloned()
            .map(ResolvedCall::Func)
            .ok_or(TypeError::UnboundFunction(*f))
    }
}

#[derive(Debug, Clone, Error)]
pub enum TypeError {
    #[error("Arity mismatch, expected {expected} args: {expr}")]
    Arity { expr: Expr, expected: usize },
    #[error(
        "Expect expression {expr} to have type {}, but get type {}",
        .expected.name(), .actual.name(),
    )]
    Mismatch {
        expr: Expr,
        expected: ArcSort,
        actual: ArcSort,
    },
    #[error("Unbound symbol {0}")]
    Unbound(Symbol),
    #[error("Undefined sort {0}")]
    UndefinedSort(Symbol),
    #[error("Sort {0} definition is disallowed: {1}")]
    DisallowedSort(Symbol, String),
    #[error("Unbound function {0}")]
    UnboundFunction(Symbol),
    #[error("Function already bound {0}")]
    FunctionAlreadyBound(Symbol),
    #[error("Sort {0} already declared.")]
    SortAlreadyBound(Symbol),
    #[error("Primitive {0} already declared.")]
    PrimitiveAlreadyBound(Symbol),
    #[error("Function {0} does not have the signature of sort {1}")]
    FunctionTypeMismatch(Symbol, Symbol),
    #[error("Presort {0} not found.")]
    PresortNotFound(Symbol),
    #[error("Invalid argument to presort {0}: {1}")]
    PresortArgument(Symbol, Expr),
    #[error("Failed to infer a type for: {0}")]
    InferenceFailure(Expr),
    #[error("Ambiguous type for {expr}, candidates: {}", ListDisplay(.candidates, ", "))]
    Ambiguous { expr: Expr, candidates: Vec<Symbol> },
    #[error("Variable {0} was already defined")]
    AlreadyDefined(Symbol),
    #[error("All alternative definitions considered failed\n{}", .0.iter().map(|e| format!("  {e}\n")).collect::<Vec<_>>().join(""))]
    AllAlternativeFailed(Vec<TypeError>),
    #[error("Cannot union values of sort {}", .0.name())]
    NonEqTypeUnion(ArcSort),
    #[error("Variable {0} is not bound by any function in the query")]
    Ungrounded(Symbol),
    #[error("Function {0} has an eq sort output and cannot have a merge expression")]
    MergeOnEqSort(Symbol),
    #[error("Cannot set or change {0}, which is a primitive")]
    SetPrimitive(Symbol),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn math() -> TypeInfo {
        let mut info = TypeInfo::default();
        info.declare_sort("Math", &None).unwrap();
        info.declare_function(&FunctionDecl::constructor(
            "Num",
            Schema::new(vec!["i64".into()], "Math".into()),
            None,
        ))
        .unwrap();
        info.declare_function(&FunctionDecl::constructor(
            "Add",
            Schema::new(vec!["Math".into(), "Math".into()], "Math".into()),
            None,
        ))
        .unwrap();
        info
    }

    #[test]
    fn arity_mismatch() {
        let info = math();
        let rule = Rule {
            body: vec![Fact::Fact(expr!(Add a b c))],
            head: vec![],
        };
        match info.typecheck_rule(&rule) {
            Err(TypeError::Arity { expected: 3, expr }) => {
                assert_eq!(expr.to_string(), "(Add a b c $Add0)");
            }
            other => panic!("Expected arity mismatch, got: {other:?}"),
        }
    }

    #[test]
    fn infers_overloaded_primitives() {
        let info = math();
        let plus = Expr::call("+", [expr!(x), expr!(1)]);
        let rule = Rule {
            body: vec![Fact::eq(expr!(e), expr!(Num x))],
            head: vec![Action::Let("y".into(), plus.clone())],
        };
        let resolved = info.typecheck_rule(&rule).unwrap();
        assert_eq!(resolved.var_types[&Symbol::from("y")].name(), Symbol::from("i64"));
        assert_eq!(resolved.var_types[&Symbol::from("e")].name(), Symbol::from("Math"));

        // x is only an input of a primitive here
        let rule = Rule {
            body: vec![Fact::eq(expr!(e), Expr::call("Num", [plus]))],
            head: vec![],
        };
        assert!(matches!(
            info.typecheck_rule(&rule),
            Err(TypeError::Ungrounded(_))
        ));
    }

    #[test]
    fn union_of_primitives_is_rejected() {
        let info = math();
        let rule = Rule {
            body: vec![Fact::eq(expr!(e), expr!(Num x))],
            head: vec![Action::Union(expr!(x), expr!(1))],
        };
        assert!(matches!(
            info.typecheck_rule(&rule),
            Err(TypeError::NonEqTypeUnion(_))
        ));
    }

    #[test]
    fn primitive_only_variables_are_ungrounded() {
        let info = math();
        let rule = Rule {
            body: vec![Fact::eq(expr!(y), Expr::call("+", [expr!(x), expr!(1)]))],
            head: vec![],
        };
        assert!(matches!(
            info.typecheck_rule(&rule),
            Err(TypeError::Ungrounded(_))
        ));
    }

    #[test]
    fn merge_on_eq_output_is_rejected() {
        let mut info = math();
        let decl = FunctionDecl::function(
            "best",
            Schema::new(vec![], "Math".into()),
            Some(expr!(old)),
        );
        assert!(matches!(
            info.declare_function(&decl),
            Err(TypeError::MergeOnEqSort(_))
        ));
    }
}
