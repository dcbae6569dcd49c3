//! The core IR of rules, which is what typechecking, query compilation and
//! action compilation work over.
//!
//! A rule body is lowered to a conjunctive query: a list of atoms whose
//! arguments are variables or literals, with the output of every call as the
//! last argument. A rule head is lowered to a straight-line list of core
//! actions where every nested call is bound to a fresh variable first.
//! Every construct has an unresolved form, whose heads are symbols, and a
//! resolved form, whose heads are specific functions or primitive overloads.
use std::fmt::{self, Display, Formatter};
use std::iter::once;

use crate::typechecking::{FuncType, TypeError};
use crate::util::{HashMap, HashSet, IndexMap, IndexSet, ListDisplay, SymbolGen};
use crate::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeadOrEq {
    Symbol(Symbol),
    Eq,
}

impl HeadOrEq {
    pub fn is_eq(&self) -> bool {
        matches!(self, HeadOrEq::Eq)
    }
}

impl Display for HeadOrEq {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            HeadOrEq::Symbol(s) => Display::fmt(s, f),
            HeadOrEq::Eq => f.write_str("="),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SpecializedPrimitive {
    pub primitive: Primitive,
    pub input: Vec<ArcSort>,
}

#[derive(Debug, Clone)]
pub enum ResolvedCall {
    Func(FuncType),
    Primitive(SpecializedPrimitive),
}

impl ResolvedCall {
    pub fn name(&self) -> Symbol {
        match self {
            ResolvedCall::Func(f) => f.name,
            ResolvedCall::Primitive(prim) => prim.primitive.name(),
        }
    }

    /// Pick the function or primitive overload named `head` whose signature
    /// matches `types`, the sorts of the inputs followed by the output.
    pub fn from_resolution(
        head: &Symbol,
        types: &[ArcSort],
        typeinfo: &TypeInfo,
    ) -> Result<ResolvedCall, TypeError> {
        let mut resolved_call = Vec::with_capacity(1);
        if let Some(ty) = typeinfo.func_types.get(head) {
            let expected = ty.input.iter().chain(once(&ty.output)).map(|s| s.name());
            let actual = types.iter().map(|s| s.name());
            if expected.eq(actual) {
                resolved_call.push(ResolvedCall::Func(ty.clone()));
            }
        }

        if let Some(primitives) = typeinfo.primitives.get(head) {
            for primitive in primitives {
                if primitive.accept(types, typeinfo) {
                    if let Some((_, inp)) = types.split_last() {
                        resolved_call.push(ResolvedCall::Primitive(SpecializedPrimitive {
                            primitive: primitive.clone(),
                            input: inp.to_vec(),
                        }));
                    }
                }
            }
        }

        let call = Expr::call(
            *head,
            types.iter().map(|sort| Expr::Var(sort.name())),
        );
        match resolved_call.len() {
            0 => Err(TypeError::InferenceFailure(call)),
            1 => Ok(resolved_call.remove(0)),
            _ => Err(TypeError::Ambiguous {
                expr: call,
                candidates: types.iter().map(|s| s.name()).collect(),
            }),
        }
    }
}

impl Display for ResolvedCall {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.name(), f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AtomTerm {
    Var(Symbol),
    Literal(Literal),
}

impl AtomTerm {
    pub fn to_expr(&self) -> Expr {
        match self {
            AtomTerm::Var(v) => Expr::Var(*v),
            AtomTerm::Literal(l) => Expr::Lit(l.clone()),
        }
    }

    pub fn var(&self) -> Option<Symbol> {
        match self {
            AtomTerm::Var(v) => Some(*v),
            AtomTerm::Literal(_) => None,
        }
    }

    fn subst(&mut self, subst: &HashMap<Symbol, AtomTerm>) {
        if let AtomTerm::Var(v) = self {
            if let Some(replacement) = subst.get(v) {
                *self = replacement.clone();
            }
        }
    }
}

impl Display for AtomTerm {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            AtomTerm::Var(v) => Display::fmt(v, f),
            AtomTerm::Literal(lit) => Display::fmt(lit, f),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Atom<Head> {
    pub head: Head,
    pub args: Vec<AtomTerm>,
}

impl<Head: Display> Display for Atom<Head> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "({} {})", self.head, ListDisplay(&self.args, " "))
    }
}

impl<Head> Atom<Head> {
    pub fn vars(&self) -> impl Iterator<Item = Symbol> + '_ {
        self.args.iter().filter_map(|t| t.var())
    }

    fn subst(&mut self, subst: &HashMap<Symbol, AtomTerm>) {
        self.args.iter_mut().for_each(|arg| arg.subst(subst));
    }
}

impl Atom<Symbol> {
    pub(crate) fn to_expr(&self) -> Expr {
        Expr::Call(self.head, self.args.iter().map(|a| a.to_expr()).collect())
    }
}

#[derive(Debug, Clone)]
pub struct Query<Head> {
    pub atoms: Vec<Atom<Head>>,
}

impl<Head> Default for Query<Head> {
    fn default() -> Self {
        Self { atoms: vec![] }
    }
}

impl<Head> Query<Head> {
    pub(crate) fn get_vars(&self) -> IndexSet<Symbol> {
        self.atoms.iter().flat_map(|atom| atom.vars()).collect()
    }
}

impl<Head: Display> Display for Query<Head> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", ListDisplay(&self.atoms, " "))
    }
}

impl Query<ResolvedCall> {
    /// Atoms over tables, as opposed to primitive calls.
    pub fn funcs(&self) -> impl Iterator<Item = (&FuncType, &[AtomTerm])> + '_ {
        self.atoms.iter().filter_map(|atom| match &atom.head {
            ResolvedCall::Func(f) => Some((f, atom.args.as_slice())),
            ResolvedCall::Primitive(_) => None,
        })
    }

    pub fn filters(&self) -> impl Iterator<Item = (&SpecializedPrimitive, &[AtomTerm])> + '_ {
        self.atoms.iter().filter_map(|atom| match &atom.head {
            ResolvedCall::Primitive(p) => Some((p, atom.args.as_slice())),
            ResolvedCall::Func(_) => None,
        })
    }
}

#[derive(Debug, Clone)]
pub enum CoreAction<Head> {
    Let(Symbol, Head, Vec<AtomTerm>),
    LetAtomTerm(Symbol, AtomTerm),
    Set(Head, Vec<AtomTerm>, AtomTerm),
    Change(Change, Head, Vec<AtomTerm>),
    Union(AtomTerm, AtomTerm),
    Panic(String),
}

impl<Head> CoreAction<Head> {
    fn subst(&mut self, subst: &HashMap<Symbol, AtomTerm>) {
        match self {
            CoreAction::Let(_, _, args) | CoreAction::Change(_, _, args) => {
                args.iter_mut().for_each(|a| a.subst(subst))
            }
            CoreAction::LetAtomTerm(_, term) => term.subst(subst),
            CoreAction::Set(_, args, rhs) => {
                args.iter_mut().for_each(|a| a.subst(subst));
                rhs.subst(subst);
            }
            CoreAction::Union(a, b) => {
                a.subst(subst);
                b.subst(subst);
            }
            CoreAction::Panic(_) => (),
        }
    }

    /// Variables read by the action.
    pub(crate) fn used_vars(&self) -> Vec<Symbol> {
        let terms: Vec<&AtomTerm> = match self {
            CoreAction::Let(_, _, args) | CoreAction::Change(_, _, args) => args.iter().collect(),
            CoreAction::LetAtomTerm(_, term) => vec![term],
            CoreAction::Set(_, args, rhs) => args.iter().chain(once(rhs)).collect(),
            CoreAction::Union(a, b) => vec![a, b],
            CoreAction::Panic(_) => vec![],
        };
        terms.into_iter().filter_map(|t| t.var()).collect()
    }

    /// The variable the action binds, if any.
    pub(crate) fn bound_var(&self) -> Option<Symbol> {
        match self {
            CoreAction::Let(v, _, _) | CoreAction::LetAtomTerm(v, _) => Some(*v),
            _ => None,
        }
    }
}

/// A rule after flattening, before sorts are known.
#[derive(Debug, Clone)]
pub(crate) struct CoreRule {
    pub(crate) body: Query<HeadOrEq>,
    pub(crate) head: Vec<CoreAction<Symbol>>,
}

/// A typechecked rule, ready for query and action compilation.
#[derive(Debug, Clone)]
pub struct ResolvedCoreRule {
    pub body: Query<ResolvedCall>,
    pub head: Vec<CoreAction<ResolvedCall>>,
    pub var_types: IndexMap<Symbol, ArcSort>,
    /// The body equates two distinct literals, so the rule can never match.
    pub unsat: bool,
}

/// Lowers surface facts and actions into the core IR, introducing fresh
/// variables for the outputs of nested calls. Names of globals become
/// nullary calls.
pub(crate) struct Flattener<'a> {
    typeinfo: &'a TypeInfo,
    fresh: SymbolGen,
}

impl<'a> Flattener<'a> {
    pub(crate) fn new(typeinfo: &'a TypeInfo) -> Self {
        Flattener {
            typeinfo,
            fresh: SymbolGen::new("$"),
        }
    }

    pub(crate) fn flatten_rule(&mut self, rule: &Rule) -> Result<CoreRule, TypeError> {
        let body = self.flatten_query(&rule.body)?;
        let mut binding: IndexSet<Symbol> = body.get_vars();
        let head = self.flatten_actions(&rule.head, &mut binding)?;
        Ok(CoreRule { body, head })
    }

    pub(crate) fn flatten_query(&mut self, facts: &[Fact]) -> Result<Query<HeadOrEq>, TypeError> {
        let mut atoms = vec![];
        for fact in facts {
            match fact {
                Fact::Eq(exprs) => {
                    if exprs.len() < 2 {
                        return Err(TypeError::Arity {
                            expr: Expr::call("=", exprs.clone()),
                            expected: 2,
                        });
                    }
                    let terms: Vec<AtomTerm> = exprs
                        .iter()
                        .map(|e| self.flatten_query_expr(e, &mut atoms))
                        .collect();
                    for pair in terms.windows(2) {
                        atoms.push(Atom {
                            head: HeadOrEq::Eq,
                            args: pair.to_vec(),
                        });
                    }
                }
                Fact::Fact(expr) => {
                    self.flatten_query_expr(expr, &mut atoms);
                }
            }
        }
        Ok(Query { atoms })
    }

    fn flatten_query_expr(&mut self, expr: &Expr, atoms: &mut Vec<Atom<HeadOrEq>>) -> AtomTerm {
        match expr {
            Expr::Lit(lit) => AtomTerm::Literal(lit.clone()),
            Expr::Var(v) if self.typeinfo.is_global(*v) => {
                self.flatten_query_expr(&Expr::Call(*v, vec![]), atoms)
            }
            Expr::Var(v) => AtomTerm::Var(*v),
            Expr::Call(f, children) => {
                let mut args: Vec<AtomTerm> = children
                    .iter()
                    .map(|child| self.flatten_query_expr(child, atoms))
                    .collect();
                let out = self.fresh.fresh(f);
                args.push(AtomTerm::Var(out));
                atoms.push(Atom {
                    head: HeadOrEq::Symbol(*f),
                    args,
                });
                AtomTerm::Var(out)
            }
        }
    }

    // During the lowering, there are two guarantees:
    //   Every used variable is bound.
    //   Every introduced variable is unbound before.
    pub(crate) fn flatten_actions(
        &mut self,
        actions: &[Action],
        binding: &mut IndexSet<Symbol>,
    ) -> Result<Vec<CoreAction<Symbol>>, TypeError> {
        let mut out = vec![];
        for action in actions {
            match action {
                Action::Let(var, expr) => {
                    if binding.contains(var) || self.typeinfo.is_global(*var) {
                        return Err(TypeError::AlreadyDefined(*var));
                    }
                    let term = self.flatten_action_expr(expr, binding, &mut out)?;
                    out.push(CoreAction::LetAtomTerm(*var, term));
                    binding.insert(*var);
                }
                Action::Set(f, args, rhs) => {
                    let args = self.flatten_action_exprs(args, binding, &mut out)?;
                    let rhs = self.flatten_action_expr(rhs, binding, &mut out)?;
                    out.push(CoreAction::Set(*f, args, rhs));
                }
                Action::Change(change, f, args) => {
                    let args = self.flatten_action_exprs(args, binding, &mut out)?;
                    out.push(CoreAction::Change(*change, *f, args));
                }
                Action::Union(e1, e2) => {
                    let t1 = self.flatten_action_expr(e1, binding, &mut out)?;
                    let t2 = self.flatten_action_expr(e2, binding, &mut out)?;
                    out.push(CoreAction::Union(t1, t2));
                }
                Action::Panic(msg) => out.push(CoreAction::Panic(msg.clone())),
                Action::Expr(expr) => {
                    self.flatten_action_expr(expr, binding, &mut out)?;
                }
            }
        }
        Ok(out)
    }

    fn flatten_action_exprs(
        &mut self,
        exprs: &[Expr],
        binding: &mut IndexSet<Symbol>,
        out: &mut Vec<CoreAction<Symbol>>,
    ) -> Result<Vec<AtomTerm>, TypeError> {
        exprs
            .iter()
            .map(|e| self.flatten_action_expr(e, binding, out))
            .collect()
    }

    pub(crate) fn flatten_action_expr(
        &mut self,
        expr: &Expr,
        binding: &mut IndexSet<Symbol>,
        out: &mut Vec<CoreAction<Symbol>>,
    ) -> Result<AtomTerm, TypeError> {
        match expr {
            Expr::Lit(lit) => Ok(AtomTerm::Literal(lit.clone())),
            Expr::Var(v) if binding.contains(v) => Ok(AtomTerm::Var(*v)),
            Expr::Var(v) if self.typeinfo.is_global(*v) => {
                self.flatten_action_expr(&Expr::Call(*v, vec![]), binding, out)
            }
            Expr::Var(v) => Err(TypeError::Unbound(*v)),
            Expr::Call(f, children) => {
                let args = self.flatten_action_exprs(children, binding, out)?;
                let var = self.fresh.fresh(f);
                binding.insert(var);
                out.push(CoreAction::Let(var, *f, args));
                Ok(AtomTerm::Var(var))
            }
        }
    }
}

impl CoreRule {
    fn subst(&mut self, subst: &HashMap<Symbol, AtomTerm>) {
        self.body.atoms.iter_mut().for_each(|atom| atom.subst(subst));
        self.head.iter_mut().for_each(|action| action.subst(subst));
    }

    /// Removes equality atoms by substituting variables away. Returns the
    /// resulting substitution and whether two distinct literals were equated.
    pub(crate) fn canonicalize(&mut self) -> (HashMap<Symbol, AtomTerm>, bool) {
        let mut substitution: HashMap<Symbol, AtomTerm> = HashMap::default();
        loop {
            let mut to_subst = None;
            for atom in self.body.atoms.iter() {
                if atom.head.is_eq() && atom.args[0] != atom.args[1] {
                    match &atom.args[..] {
                        // prefer keeping literals, then user variables
                        [AtomTerm::Var(x), y @ AtomTerm::Literal(_)]
                        | [y @ AtomTerm::Literal(_), AtomTerm::Var(x)] => {
                            to_subst = Some((*x, y.clone()));
                            break;
                        }
                        [AtomTerm::Var(x), AtomTerm::Var(y)] => {
                            let (from, to) = if is_fresh(*y) { (*y, *x) } else { (*x, *y) };
                            to_subst = Some((from, AtomTerm::Var(to)));
                            break;
                        }
                        _ => (),
                    }
                }
            }
            let Some((x, y)) = to_subst else { break };
            let step = HashMap::from_iter([(x, y.clone())]);
            substitution.values_mut().for_each(|t| t.subst(&step));
            substitution.insert(x, y);
            self.subst(&step);
        }

        let mut unsat = false;
        self.body.atoms.retain(|atom| {
            if !atom.head.is_eq() {
                return true;
            }
            // only literal pairs are left
            if atom.args[0] != atom.args[1] {
                unsat = true;
            }
            false
        });
        (substitution, unsat)
    }
}

fn is_fresh(v: Symbol) -> bool {
    v.as_str().starts_with('$')
}

impl ResolvedCoreRule {
    /// Every variable must be bound by a table atom, by a primitive whose
    /// inputs are bound, or by an earlier action.
    /// Variables in `bound` are provided by the caller.
    pub(crate) fn check_grounded(
        &self,
        body_vars: &[Symbol],
        bound: impl IntoIterator<Item = Symbol>,
    ) -> Result<(), TypeError> {
        let mut grounded: HashSet<Symbol> = self
            .body
            .funcs()
            .flat_map(|(_, args)| args.iter().filter_map(|a| a.var()))
            .chain(bound)
            .collect();
        let mut changed = true;
        while changed {
            changed = false;
            for (_, args) in self.body.filters() {
                if let Some((out, inputs)) = args.split_last() {
                    let inputs_ready = inputs
                        .iter()
                        .all(|a| a.var().map_or(true, |v| grounded.contains(&v)));
                    if inputs_ready {
                        if let Some(v) = out.var() {
                            changed |= grounded.insert(v);
                        }
                    }
                }
            }
        }

        let body_query_vars = self.body.get_vars();
        for v in body_vars.iter().chain(body_query_vars.iter()) {
            if !grounded.contains(v) {
                return Err(TypeError::Ungrounded(*v));
            }
        }

        for action in &self.head {
            for v in action.used_vars() {
                if !grounded.contains(&v) {
                    return Err(TypeError::Ungrounded(v));
                }
            }
            if let Some(v) = action.bound_var() {
                grounded.insert(v);
            }
        }
        Ok(())
    }
}

impl Display for ResolvedCoreRule {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "(rule ({}) (", self.body)?;
        for (i, action) in self.head.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            match action {
                CoreAction::Let(v, head, args) => {
                    write!(f, "(let {v} ({head} {}))", ListDisplay(args, " "))?
                }
                CoreAction::LetAtomTerm(v, term) => write!(f, "(let {v} {term})")?,
                CoreAction::Set(head, args, rhs) => {
                    write!(f, "(set ({head} {}) {rhs})", ListDisplay(args, " "))?
                }
                CoreAction::Change(change, head, args) => {
                    write!(f, "({change} ({head} {}))", ListDisplay(args, " "))?
                }
                CoreAction::Union(a, b) => write!(f, "(union {a} {b})")?,
                CoreAction::Panic(msg) => write!(f, "(panic {msg:?})")?,
            }
        }
        write!(f, "))")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flatten(typeinfo: &TypeInfo, rule: Rule) -> CoreRule {
        Flattener::new(typeinfo).flatten_rule(&rule).unwrap()
    }

    #[test]
    fn nested_calls_get_fresh_outputs() {
        let typeinfo = TypeInfo::default();
        let rule = Rule {
            body: vec![Fact::Eq(vec![expr!(e), expr!(Add (Num x) y)])],
            head: vec![Action::Union(expr!(e), expr!(y))],
        };
        let core = flatten(&typeinfo, rule);
        // (Num x $Num0) (Add $Num0 y $Add1) (= e $Add1)
        assert_eq!(core.body.atoms.len(), 3);
        assert!(core.body.atoms[2].head.is_eq());
        assert_eq!(core.body.atoms[0].args.len(), 2);
    }

    #[test]
    fn canonicalize_keeps_user_variables() {
        let typeinfo = TypeInfo::default();
        let rule = Rule {
            body: vec![Fact::Eq(vec![expr!(e), expr!(Neg x)])],
            head: vec![Action::Union(expr!(e), expr!(x))],
        };
        let mut core = flatten(&typeinfo, rule);
        let (_, unsat) = core.canonicalize();
        assert!(!unsat);
        assert_eq!(core.body.atoms.len(), 1);
        assert_eq!(core.body.atoms[0].to_string(), "(Neg x e)");
    }

    #[test]
    fn distinct_literals_are_unsatisfiable() {
        let typeinfo = TypeInfo::default();
        let rule = Rule {
            body: vec![Fact::Eq(vec![expr!(1), expr!(2)])],
            head: vec![],
        };
        let mut core = flatten(&typeinfo, rule);
        let (_, unsat) = core.canonicalize();
        assert!(unsat);
        assert!(core.body.atoms.is_empty());
    }

    #[test]
    fn unbound_action_variable_is_rejected() {
        let typeinfo = TypeInfo::default();
        let rule = Rule {
            body: vec![],
            head: vec![Action::Union(expr!(a), expr!(b))],
        };
        let err = Flattener::new(&typeinfo).flatten_rule(&rule).unwrap_err();
        assert!(matches!(err, TypeError::Unbound(v) if v == "a".into()));
    }
}
