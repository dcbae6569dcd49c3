//! # eqsat
//!
//! An equality saturation engine. An [`EGraph`] is a relational database of
//! terms: sorts are the types of its columns, functions are its tables, and
//! the union-find behind every eq sort makes it an e-graph. Rules are
//! conjunctive queries with actions; running them to a fixpoint closes the
//! database under rewriting, and extraction reads the cheapest term out of
//! any e-class.
//!
//! The engine is driven by a typed command stream ([`ast::Command`]) or by
//! the methods of [`EGraph`] directly:
//!
//! ```
//! use eqsat::{ast::*, expr, EGraph};
//!
//! let mut egraph = EGraph::default();
//! egraph
//!     .run_program(vec![
//!         Command::Datatype {
//!             name: "Math".into(),
//!             variants: vec![
//!                 Variant::new("Num", ["i64"]),
//!                 Variant::new("Add", ["Math", "Math"]),
//!             ],
//!         },
//!         Command::Rewrite("".into(), Rewrite::new(expr!(Add a b), expr!(Add b a)), false),
//!         Command::Action(Action::Expr(expr!(Add (Num 1) (Num 2)))),
//!         Command::RunSchedule(Schedule::saturate(Schedule::run(""))),
//!     ])
//!     .unwrap();
//! assert!(egraph.check(&[Fact::eq(expr!(Add (Num 1) (Num 2)), expr!(Add (Num 2) (Num 1)))]));
//! ```
mod actions;
pub mod ast;
pub mod constraint;
mod core;
mod extract;
mod function;
mod gj;
mod scheduler;
mod serialize;
pub mod sort;
mod termdag;
mod typechecking;
mod unionfind;
pub mod util;
mod value;

use std::fmt::{Debug, Display, Formatter};
use std::hash::Hash;
use std::ops::Deref;
use std::sync::Arc;

use instant::Instant;
use smallvec::SmallVec;
use thiserror::Error;

use ast::*;
use constraint::{Constraint, Problem, TypeConstraint};
use function::*;
use scheduler::{CompiledRule, Ruleset};
use sort::*;
use util::*;

pub use ast::Symbol;
pub use extract::{Cost, CostModel, Extractor, GlobalExtractReport, TreeAdditiveCostModel};
pub use function::Function;
pub use scheduler::{IterationReport, RunReport, StopReason};
pub use serialize::SerializeConfig;
pub use sort::{ArcSort, Sort};
pub use termdag::{Term, TermDag, TermId};
pub use typechecking::{FuncType, TypeError, TypeInfo};
pub use unionfind::{Id, UnionFind};
pub use value::*;

use crate::core::AtomTerm;

pub type ValueVec = SmallVec<[Value; 3]>;

/// The output of a row, with the timestamp of its last change.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TupleOutput {
    pub value: Value,
    pub timestamp: u32,
    /// Subsumed rows are hidden from queries and extraction.
    pub subsumed: bool,
}

/// A builtin operation over values, such as `+` on `i64`.
///
/// Overloads share a name and are told apart by their type constraints.
pub trait PrimitiveLike {
    fn name(&self) -> Symbol;
    /// Constrain the sorts of the arguments, which are the inputs followed
    /// by the output.
    fn get_type_constraints(&self) -> Box<dyn TypeConstraint>;
    /// Compute the output, or `None` when the primitive is undefined on the
    /// inputs. The e-graph is only available when called from actions.
    fn apply(&self, values: &[Value], egraph: Option<&mut EGraph>) -> Option<Value>;
}

#[derive(Clone)]
pub struct Primitive(Arc<dyn PrimitiveLike>);

impl Primitive {
    /// Whether the primitive is compatible with the signature `tys`, which
    /// lists the input sorts followed by the output sort.
    pub(crate) fn accept(&self, tys: &[ArcSort], typeinfo: &TypeInfo) -> bool {
        let args: Vec<AtomTerm> = (0..tys.len())
            .map(|i| AtomTerm::Var(Symbol::from(format!("$arg{i}").as_str())))
            .collect();
        let mut constraints: Vec<_> = args
            .iter()
            .zip(tys)
            .map(|(arg, ty)| Constraint::Assign(arg.clone(), ty.clone()))
            .collect();
        constraints.extend(self.get_type_constraints().get(&args, typeinfo));
        let problem = Problem { constraints };
        problem.solve(args.iter(), |sort: &ArcSort| sort.name()).is_ok()
    }
}

impl Deref for Primitive {
    type Target = dyn PrimitiveLike;
    fn deref(&self) -> &Self::Target {
        &*self.0
    }
}

impl Hash for Primitive {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.0) as *const u8).hash(state);
    }
}

impl Eq for Primitive {}
impl PartialEq for Primitive {
    fn eq(&self, other: &Self) -> bool {
        // compare the data pointers, not the vtables
        std::ptr::eq(
            Arc::as_ptr(&self.0) as *const u8,
            Arc::as_ptr(&other.0) as *const u8,
        )
    }
}

impl Debug for Primitive {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Prim({})", self.0.name())
    }
}

impl<T: PrimitiveLike + 'static> From<T> for Primitive {
    fn from(p: T) -> Self {
        Self(Arc::new(p))
    }
}

/// The result of the last `extract` command.
#[derive(Debug, Clone)]
pub enum ExtractReport {
    Best {
        termdag: TermDag,
        cost: Cost,
        term: TermId,
    },
    Variants {
        termdag: TermDag,
        terms: Vec<TermId>,
    },
}

#[derive(Clone)]
pub struct EGraph {
    egraphs: Vec<Self>,
    pub(crate) unionfind: UnionFind,
    pub(crate) functions: IndexMap<Symbol, Function>,
    pub(crate) rulesets: IndexMap<Symbol, Ruleset>,
    pub(crate) rule_last_run_timestamp: HashMap<Symbol, u32>,
    pub(crate) timestamp: u32,
    /// Most matches of one rule applied per iteration.
    pub match_limit: usize,
    /// A run stops once the database holds more rows than this.
    pub node_limit: usize,
    /// Most iterations of a single `saturate`.
    pub iteration_limit: usize,
    /// Only look at rows that are new since a rule last ran.
    pub seminaive: bool,
    pub(crate) type_info: TypeInfo,
    extract_report: Option<ExtractReport>,
    /// The run report for the most recent run of a schedule.
    recent_run_report: Option<RunReport>,
    /// The run report unioned over all runs so far.
    overall_run_report: RunReport,
    msgs: Vec<String>,
}

impl Default for EGraph {
    fn default() -> Self {
        let mut egraph = Self {
            egraphs: vec![],
            unionfind: Default::default(),
            functions: Default::default(),
            rulesets: Default::default(),
            rule_last_run_timestamp: Default::default(),
            timestamp: 0,
            match_limit: usize::MAX,
            node_limit: usize::MAX,
            iteration_limit: 10_000,
            seminaive: true,
            type_info: Default::default(),
            extract_report: None,
            recent_run_report: None,
            overall_run_report: Default::default(),
            msgs: Default::default(),
        };
        egraph
            .rulesets
            .insert("".into(), Ruleset::Rules(Default::default()));
        egraph
    }
}

#[derive(Debug, Error)]
#[error("Not found: {0}")]
pub struct NotFoundError(String);

impl EGraph {
    pub fn push(&mut self) {
        self.egraphs.push(self.clone());
    }

    /// Pop the current egraph off the stack, replacing
    /// it with the previously pushed egraph.
    /// It preserves the run report and messages from the popped
    /// egraph.
    pub fn pop(&mut self) -> Result<(), Error> {
        match self.egraphs.pop() {
            Some(e) => {
                self.restore(e);
                Ok(())
            }
            None => Err(Error::Pop),
        }
    }

    /// Replace the database by `backup`, keeping messages and reports.
    fn restore(&mut self, backup: EGraph) {
        let extract_report = self.extract_report.take();
        let recent_run_report = self.recent_run_report.take();
        let overall_run_report = std::mem::take(&mut self.overall_run_report);
        let messages = std::mem::take(&mut self.msgs);

        *self = backup;
        self.extract_report = extract_report.or(self.extract_report.take());
        self.recent_run_report = recent_run_report.or(self.recent_run_report.take());
        self.overall_run_report = overall_run_report;
        self.msgs = messages;
    }

    /// The canonical representative of a value. Values of primitive sorts
    /// are their own representative.
    pub fn find(&self, value: Value) -> Value {
        let mut value = value;
        if let Some(sort) = self.type_info.get_sort_by_name(&value.tag) {
            sort.canonicalize(&mut value, &self.unionfind);
        }
        value
    }

    /// Union two e-classes of the same eq sort. The database is not
    /// congruent again until the next [`EGraph::rebuild`] or command.
    /// A rebuild that fails leaves the database half-canonicalized; run the
    /// union through [`EGraph::run_command`] to get it rolled back.
    pub fn union(&mut self, a: Value, b: Value) -> Result<Value, Error> {
        let sort = self
            .type_info
            .get_sort_by_name(&a.tag)
            .cloned()
            .ok_or(TypeError::UndefinedSort(a.tag))?;
        if !sort.is_eq_sort() {
            return Err(TypeError::NonEqTypeUnion(sort).into());
        }
        if a.tag != b.tag {
            let other = self
                .type_info
                .get_sort_by_name(&b.tag)
                .cloned()
                .ok_or(TypeError::UndefinedSort(b.tag))?;
            return Err(TypeError::Mismatch {
                expr: Expr::call("union", []),
                expected: sort,
                actual: other,
            }
            .into());
        }
        Ok(self.unionfind.union_values(a, b, a.tag))
    }

    #[cfg(debug_assertions)]
    fn debug_assert_invariants(&self) {
        for (name, function) in self.functions.iter() {
            function.nodes.assert_sorted();
            for (inputs, output) in function.nodes.iter(true) {
                let values = inputs.iter().chain(std::iter::once(&output.value));
                for (value, sort) in values.zip(function.schema.columns()) {
                    let mut canonical = *value;
                    assert!(
                        !sort.canonicalize(&mut canonical, &self.unionfind),
                        "{name}({inputs:?}) = {output:?} is not canonical"
                    );
                }
            }
        }
    }

    /// Restore congruence: canonicalize every row that mentions a class
    /// that got unioned away, merging rows that collide, until no more
    /// unions happen. Returns the number of rows updated.
    pub fn rebuild(&mut self) -> Result<usize, Error> {
        let mut updates = 0;
        loop {
            self.unionfind.clear_recent_ids();
            if !self.unionfind.has_recent_ids() {
                break;
            }
            let new = self.rebuild_one()?;
            log::debug!("rebuild round updated {new} rows");
            updates += new;
        }

        #[cfg(debug_assertions)]
        self.debug_assert_invariants();
        Ok(updates)
    }

    fn rebuild_one(&mut self) -> Result<usize, Error> {
        let mut updates = 0;
        let mut deferred_merges = Vec::new();
        for function in self.functions.values_mut() {
            let (n, merges) = function.rebuild(&mut self.unionfind, self.timestamp)?;
            if !merges.is_empty() {
                deferred_merges.push((function.decl.name, merges));
            }
            updates += n;
        }
        for (func, merges) in deferred_merges {
            self.apply_merges(func, &merges)?;
        }
        Ok(updates)
    }

    /// Run the merge expression of `func` on collisions found while
    /// rebuilding.
    fn apply_merges(&mut self, func: Symbol, merges: &[DeferredMerge]) -> Result<(), Error> {
        let MergeFn::Expr(merge_prog) = self.functions[&func].merge.clone() else {
            return Ok(());
        };
        let mut stack = Vec::new();
        for DeferredMerge { inputs, old, new } in merges {
            stack.clear();
            self.run_actions(&mut stack, &[*old, *new], &merge_prog)?;
            let merged = stack.pop().unwrap_or(*old);
            let ts = self.timestamp;
            if let Some(function) = self.functions.get_mut(&func) {
                function.insert(inputs, merged, ts);
            }
        }
        Ok(())
    }

    /// Declare a sort: a fresh eq sort, or an instance of a container
    /// presort such as `(Vec Math)`.
    pub fn declare_sort(
        &mut self,
        name: impl Into<Symbol>,
        presort_and_args: &Option<(Symbol, Vec<Expr>)>,
    ) -> Result<ArcSort, Error> {
        let name = name.into();
        if self.functions.contains_key(&name) {
            return Err(TypeError::FunctionAlreadyBound(name).into());
        }
        let sort = self.type_info.declare_sort(name, presort_and_args)?;
        log::info!("Declared sort {name}.");
        Ok(sort)
    }

    pub fn declare_function(&mut self, decl: &FunctionDecl) -> Result<(), Error> {
        let ftype = self.type_info.declare_function(decl)?;
        let function = match Function::new(&self.type_info, decl, ftype) {
            Ok(function) => function,
            Err(e) => {
                self.type_info.func_types.remove(&decl.name);
                return Err(e);
            }
        };
        self.functions.insert(decl.name, function);
        log::info!("Declared function {}.", decl.name);
        Ok(())
    }

    pub fn declare_constructor(
        &mut self,
        name: impl Into<Symbol>,
        inputs: Vec<Symbol>,
        output: impl Into<Symbol>,
        cost: Option<usize>,
    ) -> Result<(), Error> {
        let decl = FunctionDecl::constructor(name, Schema::new(inputs, output.into()), cost);
        self.declare_function(&decl)
    }

    pub fn declare_relation(
        &mut self,
        name: impl Into<Symbol>,
        inputs: Vec<Symbol>,
    ) -> Result<(), Error> {
        self.declare_function(&FunctionDecl::relation(name, inputs))
    }

    /// A fresh eq sort with one constructor per variant.
    pub fn declare_datatype(&mut self, name: Symbol, variants: &[Variant]) -> Result<(), Error> {
        self.declare_sort(name, &None)?;
        for variant in variants {
            self.declare_constructor(variant.name, variant.types.clone(), name, variant.cost)?;
        }
        Ok(())
    }

    /// The input sorts of a function, if there is one called `name`.
    pub fn function_input_sorts(&self, name: Symbol) -> Option<Vec<ArcSort>> {
        self.functions.get(&name).map(|f| f.schema.input.clone())
    }

    pub fn add_ruleset(&mut self, name: Symbol) -> Result<(), Error> {
        if self.rulesets.contains_key(&name) {
            return Err(Error::RulesetAlreadyExists(name));
        }
        self.rulesets.insert(name, Ruleset::Rules(Default::default()));
        log::info!("Declared ruleset {name}.");
        Ok(())
    }

    /// A ruleset that runs the rules of all of `rulesets` in one iteration.
    pub fn add_combined_ruleset(&mut self, name: Symbol, rulesets: Vec<Symbol>) -> Result<(), Error> {
        if self.rulesets.contains_key(&name) {
            return Err(Error::RulesetAlreadyExists(name));
        }
        if let Some(missing) = rulesets.iter().find(|r| !self.rulesets.contains_key(*r)) {
            return Err(Error::NoSuchRuleset(*missing));
        }
        self.rulesets.insert(name, Ruleset::Combined(rulesets));
        log::info!("Declared ruleset {name}.");
        Ok(())
    }

    /// Add a rule to a ruleset. An empty name names the rule after its
    /// printed form. Returns the name of the rule.
    pub fn add_rule(&mut self, name: Symbol, rule: &Rule, ruleset: Symbol) -> Result<Symbol, Error> {
        let name = if name.as_str().is_empty() {
            Symbol::from(rule.to_string().as_str())
        } else {
            name
        };
        match self.rulesets.get(&ruleset) {
            None => return Err(Error::NoSuchRuleset(ruleset)),
            Some(Ruleset::Combined(_)) => return Err(Error::CombinedRulesetError(ruleset)),
            Some(Ruleset::Rules(rules)) if rules.contains_key(&name) => {
                return Err(Error::RuleAlreadyExists(name, ruleset))
            }
            Some(Ruleset::Rules(_)) => {}
        }

        let resolved = self.type_info.typecheck_rule(rule)?;
        let query = self.compile_gj_query(&resolved.body);
        let vars: IndexSet<Symbol> = query.vars.keys().copied().collect();
        let program = actions::Program::compile(&vars, &resolved.var_types, &resolved.head);
        let compiled = CompiledRule {
            query,
            program,
            unsat: resolved.unsat,
        };
        if let Some(Ruleset::Rules(rules)) = self.rulesets.get_mut(&ruleset) {
            rules.insert(name, Arc::new(compiled));
        }
        log::info!("Declared rule {name}.");
        Ok(name)
    }

    /// Fail with [`Error::CheckError`] unless the facts have a match.
    /// Subsumed rows count.
    pub fn check_facts(&self, facts: &[Fact]) -> Result<(), Error> {
        let resolved = self.type_info.typecheck_query(facts)?;
        let mut matched = false;
        if !resolved.unsat {
            let query = self.compile_gj_query(&resolved.body);
            self.run_query(&query, 0, true, |values| {
                debug_assert_eq!(values.len(), query.vars.len());
                matched = true;
                Err(())
            });
        }
        if matched {
            Ok(())
        } else {
            Err(Error::CheckError(facts.to_vec()))
        }
    }

    pub fn check(&self, facts: &[Fact]) -> bool {
        self.check_facts(facts).is_ok()
    }

    /// Evaluate an expression the way an action would, adding the rows it
    /// mentions.
    pub fn eval_expr(&mut self, expr: &Expr) -> Result<(ArcSort, Value), Error> {
        let typed = self.type_info.typecheck_expr(expr, &Default::default())?;
        let program = actions::Program::compile_expr(
            &Default::default(),
            &typed.rule.var_types,
            &typed.rule.head,
            &typed.output,
        );
        let mut stack = vec![];
        self.run_actions(&mut stack, &[], &program)?;
        let value = stack
            .pop()
            .ok_or_else(|| NotFoundError(format!("{expr} produced no value")))?;
        Ok((typed.sort, value))
    }

    /// Run actions outside of any rule. A `let` here only binds for the
    /// rest of the actions.
    pub fn eval_actions(&mut self, actions: &[Action]) -> Result<(), Error> {
        let resolved = self.type_info.typecheck_actions(actions, &Default::default())?;
        let program =
            actions::Program::compile(&Default::default(), &resolved.var_types, &resolved.head);
        let mut stack = vec![];
        self.run_actions(&mut stack, &[], &program)
    }

    /// `let` at the top level: a global, stored as a nullary function that
    /// is never extracted.
    fn declare_global_value(&mut self, name: Symbol, expr: &Expr) -> Result<(), Error> {
        let (sort, value) = self.eval_expr(expr)?;
        let ftype = self.type_info.declare_global(name, sort.clone())?;
        let decl =
            FunctionDecl::function(name, Schema::new(vec![], sort.name()), None).unextractable();
        let mut function = Function::new(&self.type_info, &decl, ftype)?;
        function.insert(&[], value, self.timestamp);
        self.functions.insert(name, function);
        log::info!("Declared global {name}.");
        Ok(())
    }

    /// Merge `output` into the row of `name` at `inputs`.
    pub fn set(&mut self, name: Symbol, inputs: &[Value], output: Value) -> Result<(), Error> {
        self.check_arity(name, inputs)?;
        self.perform_set(name, inputs, output)
    }

    /// The canonical output of the row of `name` at `inputs`, if any.
    pub fn lookup(&self, name: Symbol, inputs: &[Value]) -> Result<Option<Value>, Error> {
        self.check_arity(name, inputs)?;
        let inputs: ValueVec = inputs.iter().map(|v| self.find(*v)).collect();
        Ok(self.functions[&name]
            .get(&inputs)
            .map(|value| self.find(value)))
    }

    fn check_arity(&self, name: Symbol, inputs: &[Value]) -> Result<(), Error> {
        let function = self
            .functions
            .get(&name)
            .ok_or(TypeError::UnboundFunction(name))?;
        if function.schema.input.len() != inputs.len() {
            return Err(TypeError::Arity {
                expr: Expr::call(name, inputs.iter().map(|v| Expr::var(format!("{v:?}").as_str()))),
                expected: function.schema.input.len(),
            }
            .into());
        }
        Ok(())
    }

    /// Visit every row of a function, subsumed ones included.
    pub fn for_each_row(
        &self,
        name: Symbol,
        mut f: impl FnMut(&[Value], &TupleOutput),
    ) -> Result<(), Error> {
        let function = self
            .functions
            .get(&name)
            .ok_or(TypeError::UnboundFunction(name))?;
        for (inputs, output) in function.nodes.iter(true) {
            f(inputs, output);
        }
        Ok(())
    }

    /// The first `n` rows of a function as terms, each input and output
    /// replaced by its best term.
    pub fn function_to_dag(
        &self,
        sym: Symbol,
        n: usize,
    ) -> Result<(Vec<(TermId, TermId)>, TermDag), Error> {
        let f = self
            .functions
            .get(&sym)
            .ok_or(TypeError::UnboundFunction(sym))?;
        let mut termdag = TermDag::default();
        let extractor = Extractor::new(self, &TreeAdditiveCostModel);
        let mut terms = Vec::new();
        for (ins, out) in f.nodes.iter(true).take(n) {
            let mut children = Vec::new();
            for (a, a_type) in ins.iter().copied().zip(&f.schema.input) {
                let term = extractor
                    .extract_value(a, a_type, &mut termdag)
                    .ok_or(Error::ExtractError(a))?;
                children.push(term);
            }
            let out = extractor
                .extract_value(out.value, &f.schema.output, &mut termdag)
                .ok_or(Error::ExtractError(out.value))?;
            terms.push((termdag.app(sym, children), out));
        }
        Ok((terms, termdag))
    }

    pub fn print_function(&mut self, sym: Symbol, n: usize) -> Result<(), Error> {
        log::info!("Printing up to {n} tuples of table {sym}: ");
        let (terms_with_outputs, termdag) = self.function_to_dag(sym, n)?;
        let out_is_unit = self.functions[&sym].schema.output.name() == Value::unit().tag;

        let mut buf = String::from("(\n");
        if terms_with_outputs.is_empty() {
            log::info!("   (none)");
        }
        for (term, output) in terms_with_outputs {
            let tuple_str = if out_is_unit {
                format!("   {}", termdag.to_string(term))
            } else {
                format!("   {} -> {}", termdag.to_string(term), termdag.to_string(output))
            };
            log::info!("{}", tuple_str);
            buf.push_str(&tuple_str);
            buf.push('\n');
        }
        buf.push(')');
        self.print_msg(buf);
        Ok(())
    }

    pub fn print_size(&mut self, sym: Option<Symbol>) -> Result<(), Error> {
        if let Some(sym) = sym {
            let f = self
                .functions
                .get(&sym)
                .ok_or(TypeError::UnboundFunction(sym))?;
            let size = f.nodes.num_live();
            log::info!("Function {} has size {}", sym, size);
            self.print_msg(size.to_string());
        } else {
            let mut lens = self
                .functions
                .iter()
                .map(|(sym, f)| (*sym, f.nodes.num_live()))
                .collect::<Vec<_>>();
            lens.sort_by_key(|(name, _)| name.as_str());
            for (sym, len) in &lens {
                log::info!("Function {} has size {}", sym, len);
            }
            self.print_msg(
                lens.into_iter()
                    .map(|(name, len)| format!("{}: {}", name, len))
                    .collect::<Vec<_>>()
                    .join("\n"),
            );
        }
        Ok(())
    }

    /// Extract the best term of `expr`, or up to `variants` terms of its
    /// e-class when `variants` is non-zero. The terms are also saved as the
    /// extract report and printed as a message.
    pub fn extract_expr(&mut self, expr: &Expr, variants: usize) -> Result<ExtractReport, Error> {
        let (sort, value) = self.eval_expr(expr)?;
        let mut termdag = TermDag::default();
        let report = if variants == 0 {
            let (cost, term) = self.extract(value, &mut termdag, &sort)?;
            log::info!("extracted with cost {cost}: {}", termdag.to_string(term));
            self.print_msg(termdag.to_string(term));
            ExtractReport::Best {
                termdag,
                cost,
                term,
            }
        } else {
            let terms = self.extract_variants(&sort, value, variants, &mut termdag);
            log::info!("extracted {} variants for {expr}", terms.len());
            let mut msg = String::from("(\n");
            for term in &terms {
                msg.push_str(&format!("   {}\n", termdag.to_string(*term)));
            }
            msg.push(')');
            self.print_msg(msg);
            ExtractReport::Variants { termdag, terms }
        };
        self.extract_report = Some(report.clone());
        Ok(report)
    }

    /// Extract a value to a string for printing.
    pub fn extract_value_to_string(&self, value: Value) -> Result<String, Error> {
        let sort = self
            .type_info
            .get_sort_by_name(&value.tag)
            .cloned()
            .ok_or(TypeError::UndefinedSort(value.tag))?;
        let mut termdag = TermDag::default();
        let (_, term) = self.extract(value, &mut termdag, &sort)?;
        Ok(termdag.to_string(term))
    }

    fn set_option(&mut self, name: Symbol, value: &Expr) -> Result<(), Error> {
        let invalid = || Error::OptionError(name, value.clone());
        let as_usize = || match value {
            Expr::Lit(Literal::Int(i)) => usize::try_from(*i).map_err(|_| invalid()),
            _ => Err(invalid()),
        };
        match name.as_str() {
            "match_limit" => self.match_limit = as_usize()?,
            "node_limit" => self.node_limit = as_usize()?,
            "iteration_limit" => self.iteration_limit = as_usize()?,
            "seminaive" => {
                self.seminaive = match value {
                    Expr::Lit(Literal::Bool(b)) => *b,
                    Expr::Lit(Literal::Int(i)) => *i != 0,
                    _ => return Err(invalid()),
                }
            }
            _ => return Err(invalid()),
        }
        log::info!("Set option {name} to {value}");
        Ok(())
    }

    /// Commands that either fail before changing anything or cannot fail
    /// at all.
    fn is_atomic(command: &Command) -> bool {
        matches!(
            command,
            Command::SetOption { .. }
                | Command::Function(_)
                | Command::Relation { .. }
                | Command::AddRuleset(_)
                | Command::UnstableCombinedRuleset(..)
                | Command::PrintOverallStatistics
                | Command::Check(_)
                | Command::PrintFunction(..)
                | Command::PrintSize(_)
                | Command::Push(_)
                | Command::Pop(_)
        )
    }

    /// Run one command. A command that fails leaves the database as it was
    /// before the command; messages and reports are kept.
    pub fn run_command(&mut self, command: Command) -> Result<(), Error> {
        // unions made through the API are only rebuilt here, and a failed
        // rebuild must be rolled back too
        if Self::is_atomic(&command) && !self.unionfind.is_dirty() {
            return self.run_command_inner(command);
        }
        // `fail` may push or pop, so it has to save the scopes as well
        let keep_scopes = !matches!(command, Command::Fail(_));
        let backup = if keep_scopes {
            let scopes = std::mem::take(&mut self.egraphs);
            let backup = self.clone();
            self.egraphs = scopes;
            backup
        } else {
            self.clone()
        };

        let result = self.run_command_inner(command);
        if let Err(e) = &result {
            log::info!("Rolling back failed command: {e}");
            let scopes = std::mem::take(&mut self.egraphs);
            self.restore(backup);
            if keep_scopes {
                self.egraphs = scopes;
            }
        }
        result
    }

    fn run_command_inner(&mut self, command: Command) -> Result<(), Error> {
        let pre_rebuild = Instant::now();
        let rebuild_num = self.rebuild()?;
        if rebuild_num > 0 {
            log::info!(
                "Rebuild before command: {:10}ms",
                pre_rebuild.elapsed().as_millis()
            );
        }

        match command {
            Command::SetOption { name, value } => self.set_option(name, &value)?,
            Command::Datatype { name, variants } => {
                self.declare_datatype(name, &variants)?;
            }
            Command::Sort(name, presort_and_args) => {
                self.declare_sort(name, &presort_and_args)?;
            }
            Command::Function(decl) => self.declare_function(&decl)?,
            Command::Relation { name, inputs } => self.declare_relation(name, inputs)?,
            Command::AddRuleset(name) => self.add_ruleset(name)?,
            Command::UnstableCombinedRuleset(name, others) => {
                self.add_combined_ruleset(name, others)?
            }
            Command::Rule {
                name,
                ruleset,
                rule,
            } => {
                self.add_rule(name, &rule, ruleset)?;
            }
            Command::Rewrite(ruleset, rewrite, subsume) => {
                self.add_rule("".into(), &rewrite.to_rule(subsume), ruleset)?;
            }
            Command::BiRewrite(ruleset, rewrite) => {
                self.add_rule("".into(), &rewrite.to_rule(false), ruleset)?;
                self.add_rule("".into(), &rewrite.reversed().to_rule(false), ruleset)?;
            }
            Command::Action(Action::Let(name, expr)) => self.declare_global_value(name, &expr)?,
            Command::Action(action) => self.eval_actions(&[action])?,
            Command::RunSchedule(sched) => {
                let report = self.run_schedule(&sched)?;
                log::info!("Ran schedule {}.", sched);
                log::info!("Report: {}", report);
                self.overall_run_report = self.overall_run_report.union(&report);
                self.recent_run_report = Some(report);
            }
            Command::PrintOverallStatistics => {
                log::info!("Overall statistics:\n{}", self.overall_run_report);
                self.print_msg(format!("Overall statistics:\n{}", self.overall_run_report));
            }
            Command::Check(facts) => {
                self.check_facts(&facts)?;
                log::info!("Checked fact {}.", ListDisplay(&facts, " "));
            }
            Command::Extract { expr, variants } => {
                self.extract_expr(&expr, variants)?;
            }
            Command::PrintFunction(f, n) => self.print_function(f, n)?,
            Command::PrintSize(f) => self.print_size(f)?,
            Command::Push(n) => {
                (0..n).for_each(|_| self.push());
                log::info!("Pushed {n} levels.")
            }
            Command::Pop(n) => {
                if n > self.egraphs.len() {
                    return Err(Error::Pop);
                }
                for _ in 0..n {
                    self.pop()?;
                }
                log::info!("Popped {n} levels.")
            }
            Command::Fail(c) => {
                if let Err(e) = self.run_command(*c) {
                    log::info!("Command failed as expected: {e}");
                } else {
                    return Err(Error::ExpectFail);
                }
            }
        };
        // a union that breaks a function's merge fails its own command
        self.rebuild()?;
        Ok(())
    }

    /// Run a program, represented as an AST.
    /// Return a list of messages.
    pub fn run_program(&mut self, program: Vec<Command>) -> Result<Vec<String>, Error> {
        for command in program {
            self.run_command(command)?;
        }
        log::logger().flush();
        Ok(self.flush_msgs())
    }

    /// The number of live rows in the database.
    pub fn num_tuples(&self) -> usize {
        self.functions.values().map(|f| f.nodes.num_live()).sum()
    }

    /// Returns the first sort of type `S` that satisfies the predicate.
    pub fn get_sort_by<S: Sort>(&self, pred: impl Fn(&Arc<S>) -> bool) -> Option<Arc<S>> {
        self.type_info.get_sorts_by(pred).into_iter().next()
    }

    pub fn get_sort<S: Sort>(&self) -> Option<Arc<S>> {
        self.get_sort_by(|_| true)
    }

    pub fn get_sort_by_name(&self, name: Symbol) -> Option<&ArcSort> {
        self.type_info.get_sort_by_name(&name)
    }

    /// Add a user-defined sort
    pub fn add_arcsort(&mut self, arcsort: ArcSort) -> Result<(), Error> {
        Ok(self.type_info.add_arcsort(arcsort)?)
    }

    /// Add a user-defined primitive
    pub fn add_primitive(&mut self, prim: impl Into<Primitive>) {
        self.type_info.add_primitive(prim)
    }

    /// Gets the last extract report and returns it, if the last command saved it.
    pub fn get_extract_report(&self) -> &Option<ExtractReport> {
        &self.extract_report
    }

    /// Gets the last run report and returns it, if the last command saved it.
    pub fn get_run_report(&self) -> &Option<RunReport> {
        &self.recent_run_report
    }

    /// Gets the overall run report and returns it.
    pub fn get_overall_run_report(&self) -> &RunReport {
        &self.overall_run_report
    }

    pub(crate) fn print_msg(&mut self, msg: String) {
        self.msgs.push(msg);
    }

    fn flush_msgs(&mut self) -> Vec<String> {
        self.msgs.dedup_by(|a, b| a.is_empty() && b.is_empty());
        std::mem::take(&mut self.msgs)
    }

    pub fn type_info(&self) -> &TypeInfo {
        &self.type_info
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    NotFoundError(#[from] NotFoundError),
    #[error(transparent)]
    TypeError(#[from] TypeError),
    #[error("Errors:\n{}", ListDisplay(.0, "\n"))]
    TypeErrors(Vec<TypeError>),
    #[error("Check failed: \n{}", ListDisplay(.0, "\n"))]
    CheckError(Vec<Fact>),
    #[error("No such ruleset: {0}")]
    NoSuchRuleset(Symbol),
    #[error("Ruleset {0} was already present")]
    RulesetAlreadyExists(Symbol),
    #[error("Attempted to add a rule to combined ruleset {0}. Combined rulesets may only depend on other rulesets.")]
    CombinedRulesetError(Symbol),
    #[error("Rule {0} was already present in ruleset {1}")]
    RuleAlreadyExists(Symbol, Symbol),
    #[error("Evaluating primitive {0:?} failed. ({} {})", .0.name(), ListDebug(.1, " "))]
    PrimitiveError(Primitive, Vec<Value>),
    #[error("Illegal merge attempted for function {0}, {1:?} != {2:?}")]
    MergeError(Symbol, Value, Value),
    #[error("No term can be extracted for {0:?}")]
    ExtractError(Value),
    #[error("Tried to pop too much")]
    Pop,
    #[error("Command should have failed.")]
    ExpectFail,
    #[error("Cannot subsume function with merge: {0}")]
    SubsumeMergeError(Symbol),
    #[error("Panic: {0}")]
    Panic(String),
    #[error("Invalid option {0} = {1}")]
    OptionError(Symbol, Expr),
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::{
        ast::*,
        constraint::{SimpleTypeConstraint, TypeConstraint},
        expr,
        sort::{FromSort, I64Sort, IntoSort, Sort, VecSort},
        EGraph, Error, PrimitiveLike, Symbol, Value,
    };

    struct InnerProduct {
        ele: Arc<I64Sort>,
        vec: Arc<VecSort>,
    }

    impl PrimitiveLike for InnerProduct {
        fn name(&self) -> Symbol {
            "inner-product".into()
        }

        fn get_type_constraints(&self) -> Box<dyn TypeConstraint> {
            SimpleTypeConstraint::new(
                self.name(),
                vec![self.vec.clone(), self.vec.clone(), self.ele.clone()],
            )
            .into_box()
        }

        fn apply(&self, values: &[Value], _egraph: Option<&mut EGraph>) -> Option<Value> {
            let mut sum = 0;
            let vec1 = self.vec.load(&values[0]);
            let vec2 = self.vec.load(&values[1]);
            assert_eq!(vec1.len(), vec2.len());
            for (a, b) in vec1.iter().zip(vec2.iter()) {
                let a = i64::load(&self.ele, a);
                let b = i64::load(&self.ele, b);
                sum += a * b;
            }
            sum.store(&self.ele)
        }
    }

    #[test]
    fn test_user_defined_primitive() {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut egraph = EGraph::default();
        egraph
            .run_program(vec![Command::Sort(
                "IntVec".into(),
                Some(("Vec".into(), vec![expr!(i64)])),
            )])
            .unwrap();
        let i64_sort: Arc<I64Sort> = egraph.get_sort().unwrap();
        let int_vec_sort: Arc<VecSort> = egraph
            .get_sort_by(|s: &Arc<VecSort>| s.element().name() == i64_sort.name())
            .unwrap();
        egraph.add_primitive(InnerProduct {
            ele: i64_sort,
            vec: int_vec_sort,
        });
        egraph
            .run_program(vec![
                Command::Action(Action::Let(
                    "a".into(),
                    Expr::call("vec-of", (1..=6).map(Expr::lit)),
                )),
                Command::Action(Action::Let(
                    "b".into(),
                    Expr::call("vec-of", (1..=6).rev().map(Expr::lit)),
                )),
            ])
            .unwrap();
        let product = Expr::call("inner-product", [expr!(a), expr!(b)]);
        assert!(egraph.check(&[Fact::eq(product, expr!(56))]));
    }

    #[test]
    fn failed_commands_roll_back() {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut egraph = EGraph::default();
        egraph
            .run_program(vec![
                Command::Function(FunctionDecl::function(
                    "f",
                    Schema::new(vec!["i64".into()], "i64".into()),
                    None,
                )),
                Command::Action(Action::Set("f".into(), vec![expr!(1)], expr!(1))),
                Command::Rule {
                    name: "conflict".into(),
                    ruleset: "".into(),
                    rule: Rule {
                        body: vec![Fact::eq(expr!(x), expr!(f 1))],
                        head: vec![
                            Action::Set("f".into(), vec![expr!(2)], expr!(x)),
                            Action::Set(
                                "f".into(),
                                vec![expr!(1)],
                                Expr::call("+", [expr!(x), expr!(1)]),
                            ),
                        ],
                    },
                },
            ])
            .unwrap();

        // the first set of the head lands before the second one conflicts
        let err = egraph
            .run_program(vec![Command::RunSchedule(Schedule::run(""))])
            .unwrap_err();
        assert!(matches!(err, Error::MergeError(..)));
        assert_eq!(egraph.num_tuples(), 1);
        assert_eq!(egraph.lookup("f".into(), &[Value::from(2i64)]).unwrap(), None);

        let err = egraph
            .run_command(Command::Rule {
                name: "".into(),
                ruleset: "missing".into(),
                rule: Rule {
                    head: vec![],
                    body: vec![],
                },
            })
            .unwrap_err();
        assert!(matches!(err, Error::NoSuchRuleset(_)));
    }

    #[test]
    fn unions_that_break_a_function_are_rolled_back() {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut egraph = EGraph::default();
        egraph
            .run_program(vec![
                Command::Datatype {
                    name: "E".into(),
                    variants: vec![Variant::new("a", []), Variant::new("b", [])],
                },
                Command::Function(FunctionDecl::function(
                    "g",
                    Schema::new(vec!["E".into()], "i64".into()),
                    None,
                )),
                Command::Action(Action::Set("g".into(), vec![expr!((a))], expr!(1))),
                Command::Action(Action::Set("g".into(), vec![expr!((b))], expr!(2))),
            ])
            .unwrap();
        let g_rows = |egraph: &EGraph| {
            let mut n = 0;
            egraph.for_each_row("g".into(), |_, _| n += 1).unwrap();
            n
        };

        let err = egraph
            .run_command(Command::Action(Action::Union(expr!((a)), expr!((b)))))
            .unwrap_err();
        assert!(matches!(err, Error::MergeError(..)));
        assert_eq!(g_rows(&egraph), 2);
        assert!(!egraph.check(&[Fact::eq(expr!((a)), expr!((b)))]));
        let check = || Command::Check(vec![Fact::Fact(expr!(g (a)))]);
        egraph.run_command(check()).unwrap();

        // a union made through the API fails the next command, every time
        let (_, a) = egraph.eval_expr(&expr!((a))).unwrap();
        let (_, b) = egraph.eval_expr(&expr!((b))).unwrap();
        egraph.union(a, b).unwrap();
        for _ in 0..2 {
            let err = egraph.run_command(check()).unwrap_err();
            assert!(matches!(err, Error::MergeError(..)));
            assert_eq!(g_rows(&egraph), 2);
        }
    }

    #[test]
    fn fail_command_leaves_no_trace() {
        let mut egraph = EGraph::default();
        let msgs = egraph
            .run_program(vec![
                Command::Datatype {
                    name: "E".into(),
                    variants: vec![Variant::new("A", []), Variant::new("B", [])],
                },
                Command::Fail(Box::new(Command::Check(vec![Fact::eq(
                    expr!((A)),
                    expr!((B)),
                )]))),
                Command::PrintSize(None),
            ])
            .unwrap();
        // the failed check never added (A) or (B)
        assert_eq!(msgs, vec!["A: 0\nB: 0".to_string()]);

        let err = egraph
            .run_program(vec![Command::Fail(Box::new(Command::Action(Action::Expr(
                expr!((A)),
            ))))])
            .unwrap_err();
        assert!(matches!(err, Error::ExpectFail));
        assert_eq!(egraph.num_tuples(), 0);
    }

    #[test]
    fn push_and_pop_restore_the_database() {
        let mut egraph = EGraph::default();
        egraph
            .run_program(vec![
                Command::Datatype {
                    name: "E".into(),
                    variants: vec![Variant::new("A", []), Variant::new("B", [])],
                },
                Command::Push(1),
                Command::Action(Action::Union(expr!((A)), expr!((B)))),
                Command::Check(vec![Fact::eq(expr!((A)), expr!((B)))]),
                Command::Pop(1),
            ])
            .unwrap();
        assert!(!egraph.check(&[Fact::eq(expr!((A)), expr!((B)))]));
        assert!(matches!(egraph.pop(), Err(Error::Pop)));
    }

    #[test]
    fn options_are_validated() {
        let mut egraph = EGraph::default();
        egraph
            .run_program(vec![
                Command::SetOption {
                    name: "match_limit".into(),
                    value: expr!(10),
                },
                Command::SetOption {
                    name: "seminaive".into(),
                    value: Expr::lit(false),
                },
            ])
            .unwrap();
        assert_eq!(egraph.match_limit, 10);
        assert!(!egraph.seminaive);

        let err = egraph
            .run_program(vec![Command::SetOption {
                name: "node_limit".into(),
                value: expr!(-1),
            }])
            .unwrap_err();
        assert!(matches!(err, Error::OptionError(..)));
    }
}
