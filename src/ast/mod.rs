//! The typed command stream accepted by an [`EGraph`](crate::EGraph).
//!
//! There is no surface parser in this crate: callers build [`Command`]s,
//! [`Expr`]s, [`Fact`]s and [`Action`]s directly (the [`expr!`](crate::expr)
//! macro helps with the common case). Every type here prints in the usual
//! s-expression syntax, which is what shows up in logs and error messages.
mod expr;

use std::fmt::{self, Display};

pub use expr::*;
pub use symbol_table::GlobalSymbol as Symbol;

use crate::util::ListDisplay;

/// Whether a rewrite also subsumes its left-hand side.
pub type Subsume = bool;

/// A query atom of a rule body or a `check` command.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Fact {
    /// All expressions evaluate to the same value: `(= e1 e2 ...)`.
    Eq(Vec<Expr>),
    /// The expression is present in the database. For a relation this
    /// means the row exists; for a function, that its inputs have a row.
    Fact(Expr),
}

impl Fact {
    pub fn eq(lhs: Expr, rhs: Expr) -> Self {
        Fact::Eq(vec![lhs, rhs])
    }
}

impl Display for Fact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fact::Eq(exprs) => write!(f, "(= {})", ListDisplay(exprs, " ")),
            Fact::Fact(expr) => write!(f, "{expr}"),
        }
    }
}

/// Change a function entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Change {
    /// `delete` this entry from a function.
    /// Be wary! Only delete entries that are guaranteed to be not useful.
    Delete,
    /// `subsume` this entry so that it cannot be queried or extracted, but
    /// still can be checked. Subsumed entries stay subsumed.
    Subsume,
}

impl Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Change::Delete => f.write_str("delete"),
            Change::Subsume => f.write_str("subsume"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Action {
    /// Bind a variable to a value for the rest of the actions. At the top
    /// level this declares a global.
    Let(Symbol, Expr),
    /// `set` a function to a particular result.
    /// `set` should not be used on datatypes: use `union` instead.
    Set(Symbol, Vec<Expr>, Expr),
    /// Delete or subsume (mark as hidden from future rewrites and unextractable)
    /// an entry from a function.
    Change(Change, Symbol, Vec<Expr>),
    /// `union` two datatypes, making them equal in the implicit, global
    /// equality relation.
    Union(Expr, Expr),
    /// Abort with an error message.
    Panic(String),
    /// Evaluate an expression for its side effect of inserting rows.
    Expr(Expr),
}

impl Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Let(name, expr) => write!(f, "(let {name} {expr})"),
            Action::Set(name, args, rhs) => {
                write!(f, "(set {} {rhs})", Expr::Call(*name, args.clone()))
            }
            Action::Change(change, name, args) => {
                write!(f, "({change} {})", Expr::Call(*name, args.clone()))
            }
            Action::Union(lhs, rhs) => write!(f, "(union {lhs} {rhs})"),
            Action::Panic(msg) => write!(f, "(panic {msg:?})"),
            Action::Expr(e) => write!(f, "{e}"),
        }
    }
}

/// A rule: whenever every fact of the `body` matches, run the `head`
/// actions once per match.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Rule {
    pub head: Vec<Action>,
    pub body: Vec<Fact>,
}

impl Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "(rule ({}) ({}))",
            ListDisplay(&self.body, " "),
            ListDisplay(&self.head, " ")
        )
    }
}

lazy_static::lazy_static! {
    static ref REWRITE_VAR: Symbol = "$rewrite_lhs".into();
}

/// `lhs => rhs` whenever the `conditions` hold.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Rewrite {
    pub lhs: Expr,
    pub rhs: Expr,
    pub conditions: Vec<Fact>,
}

impl Rewrite {
    pub fn new(lhs: Expr, rhs: Expr) -> Self {
        Rewrite {
            lhs,
            rhs,
            conditions: vec![],
        }
    }

    pub fn when(mut self, conditions: impl IntoIterator<Item = Fact>) -> Self {
        self.conditions.extend(conditions);
        self
    }

    /// The rule a rewrite stands for:
    ///
    /// ```text
    /// (rule ((= v lhs) conditions...)
    ///       ((union v rhs) (subsume lhs)?))
    /// ```
    pub fn to_rule(&self, subsume: Subsume) -> Rule {
        let var = Expr::Var(*REWRITE_VAR);
        let mut body = vec![Fact::eq(var.clone(), self.lhs.clone())];
        body.extend(self.conditions.iter().cloned());
        let mut head = vec![Action::Union(var, self.rhs.clone())];
        if subsume {
            if let Expr::Call(f, args) = &self.lhs {
                head.push(Action::Change(Change::Subsume, *f, args.clone()));
            }
        }
        Rule { head, body }
    }

    pub(crate) fn reversed(&self) -> Self {
        Rewrite {
            lhs: self.rhs.clone(),
            rhs: self.lhs.clone(),
            conditions: self.conditions.clone(),
        }
    }
}

impl Display for Rewrite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(rewrite {} {}", self.lhs, self.rhs)?;
        if !self.conditions.is_empty() {
            write!(f, " :when ({})", ListDisplay(&self.conditions, " "))?;
        }
        write!(f, ")")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RunConfig {
    pub ruleset: Symbol,
    /// Stop as soon as all of these facts hold.
    pub until: Option<Vec<Fact>>,
}

impl Display for RunConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(run")?;
        if !self.ruleset.as_str().is_empty() {
            write!(f, " {}", self.ruleset)?;
        }
        if let Some(until) = &self.until {
            write!(f, " :until ({})", ListDisplay(until, " "))?;
        }
        write!(f, ")")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Schedule {
    /// Run the inner schedule until it stops updating the database.
    Saturate(Box<Schedule>),
    Repeat(usize, Box<Schedule>),
    /// A single iteration of one ruleset.
    Run(RunConfig),
    Sequence(Vec<Schedule>),
}

impl Schedule {
    pub fn run(ruleset: impl Into<Symbol>) -> Self {
        Schedule::Run(RunConfig {
            ruleset: ruleset.into(),
            until: None,
        })
    }

    pub fn run_until(ruleset: impl Into<Symbol>, until: Vec<Fact>) -> Self {
        Schedule::Run(RunConfig {
            ruleset: ruleset.into(),
            until: Some(until),
        })
    }

    pub fn repeat(n: usize, schedule: Schedule) -> Self {
        Schedule::Repeat(n, Box::new(schedule))
    }

    pub fn saturate(schedule: Schedule) -> Self {
        Schedule::Saturate(Box::new(schedule))
    }

    pub fn seq(schedules: impl IntoIterator<Item = Schedule>) -> Self {
        Schedule::Sequence(schedules.into_iter().collect())
    }
}

impl Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Schedule::Saturate(sched) => write!(f, "(saturate {sched})"),
            Schedule::Repeat(n, sched) => write!(f, "(repeat {n} {sched})"),
            Schedule::Run(config) => write!(f, "{config}"),
            Schedule::Sequence(scheds) => write!(f, "(seq {})", ListDisplay(scheds, " ")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Schema {
    pub input: Vec<Symbol>,
    pub output: Symbol,
}

impl Schema {
    pub fn new(input: Vec<Symbol>, output: Symbol) -> Self {
        Self { input, output }
    }
}

impl Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}) {}", ListDisplay(&self.input, " "), self.output)
    }
}

/// A function declaration: a table with a functional dependency from its
/// inputs to one output.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FunctionDecl {
    pub name: Symbol,
    pub schema: Schema,
    /// Evaluated when the function is called on inputs with no row.
    pub default: Option<Expr>,
    /// Lattice join over the variables `old` and `new`, run when two outputs
    /// are set for the same inputs.
    pub merge: Option<Expr>,
    pub cost: Option<usize>,
    pub unextractable: bool,
}

impl FunctionDecl {
    pub fn function(name: impl Into<Symbol>, schema: Schema, merge: Option<Expr>) -> Self {
        Self {
            name: name.into(),
            schema,
            default: None,
            merge,
            cost: None,
            unextractable: false,
        }
    }

    pub fn constructor(name: impl Into<Symbol>, schema: Schema, cost: Option<usize>) -> Self {
        Self {
            name: name.into(),
            schema,
            default: None,
            merge: None,
            cost,
            unextractable: false,
        }
    }

    /// A relation is a function whose output is `Unit`.
    pub fn relation(name: impl Into<Symbol>, input: Vec<Symbol>) -> Self {
        Self::function(name, Schema::new(input, "Unit".into()), None)
    }

    pub fn with_default(mut self, default: Expr) -> Self {
        self.default = Some(default);
        self
    }

    pub fn unextractable(mut self) -> Self {
        self.unextractable = true;
        self
    }
}

impl Display for FunctionDecl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(function {} {}", self.name, self.schema)?;
        if let Some(cost) = self.cost {
            write!(f, " :cost {cost}")?;
        }
        if self.unextractable {
            write!(f, " :unextractable")?;
        }
        if let Some(merge) = &self.merge {
            write!(f, " :merge {merge}")?;
        }
        if let Some(default) = &self.default {
            write!(f, " :default {default}")?;
        }
        write!(f, ")")
    }
}

/// One constructor of a [`Command::Datatype`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Variant {
    pub name: Symbol,
    pub types: Vec<Symbol>,
    pub cost: Option<usize>,
}

impl Variant {
    pub fn new(name: impl Into<Symbol>, types: impl IntoIterator<Item = &'static str>) -> Self {
        Variant {
            name: name.into(),
            types: types.into_iter().map(Symbol::from).collect(),
            cost: None,
        }
    }

    pub fn with_cost(mut self, cost: usize) -> Self {
        self.cost = Some(cost);
        self
    }
}

impl Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}", self.name)?;
        for ty in &self.types {
            write!(f, " {ty}")?;
        }
        if let Some(cost) = self.cost {
            write!(f, " :cost {cost}")?;
        }
        write!(f, ")")
    }
}

/// A [`Command`] is the top-level unit of work. It declares sorts,
/// functions and rules, adds to tables, and runs rules (via a [`Schedule`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Set one of the engine options: `match_limit`, `node_limit`,
    /// `iteration_limit` (integers) or `seminaive` (bool).
    SetOption { name: Symbol, value: Expr },
    /// Declare a user-defined datatype.
    ///
    /// ```text
    /// (datatype Math
    ///   (Num i64)
    ///   (Var String)
    ///   (Add Math Math))
    /// ```
    ///
    /// is the same as a [`Command::Sort`] followed by one constructor
    /// [`Command::Function`] per variant.
    Datatype { name: Symbol, variants: Vec<Variant> },
    /// Create a new sort. Without arguments this is a fresh eq sort, which
    /// is also how mutually recursive datatypes are forward-declared. With a
    /// presort and arguments it builds a container sort:
    ///
    /// ```text
    /// (sort MathVec (Vec Math))
    /// ```
    Sort(Symbol, Option<(Symbol, Vec<Expr>)>),
    /// Declare a function, a table with a functional dependency from its
    /// inputs to one output.
    ///
    /// A function with an eq-sorted output and no merge behaves like a
    /// constructor: calling it on new inputs creates a fresh e-class, and
    /// conflicting outputs are unioned. Functions with a primitive output
    /// are `set`, and conflicting outputs go through the `merge` expression
    /// (an error when there is none).
    Function(FunctionDecl),
    /// A function returning `Unit`.
    ///
    /// ```text
    /// (relation path (i64 i64))
    /// ```
    Relation { name: Symbol, inputs: Vec<Symbol> },
    /// Define a new, empty ruleset.
    AddRuleset(Symbol),
    /// A ruleset that runs all the rules of the given rulesets, including
    /// rules added to them later.
    UnstableCombinedRuleset(Symbol, Vec<Symbol>),
    /// Add a rule. The matches are done *modulo equality*: equal e-classes
    /// in the database are considered equal.
    ///
    /// ```text
    /// (rule ((path x y) (edge y z))
    ///       ((path x z)))
    /// ```
    Rule {
        name: Symbol,
        ruleset: Symbol,
        rule: Rule,
    },
    /// Sugar for a rule that unions the two sides, optionally subsuming the
    /// left-hand side.
    Rewrite(Symbol, Rewrite, Subsume),
    /// A rewrite in both directions.
    BiRewrite(Symbol, Rewrite),
    /// Run an action at the top level. A `let` here declares a global.
    Action(Action),
    RunSchedule(Schedule),
    /// Print the statistics accumulated over every run so far.
    PrintOverallStatistics,
    /// Fail unless all the facts hold.
    Check(Vec<Fact>),
    /// Extract the cheapest term equal to `expr`, or up to `variants` terms
    /// of its e-class when `variants` is non-zero.
    Extract { expr: Expr, variants: usize },
    /// Print up to `n` rows of a function.
    PrintFunction(Symbol, usize),
    /// Print the number of rows of one function, or of every function.
    PrintSize(Option<Symbol>),
    /// Save `n` copies of the database to return to with [`Command::Pop`].
    Push(usize),
    Pop(usize),
    /// Succeed only if the inner command fails. The failed command leaves
    /// no trace in the database.
    Fail(Box<Command>),
}

impl Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::SetOption { name, value } => write!(f, "(set-option {name} {value})"),
            Command::Datatype { name, variants } => {
                write!(f, "(datatype {name} {})", ListDisplay(variants, " "))
            }
            Command::Sort(name, None) => write!(f, "(sort {name})"),
            Command::Sort(name, Some((presort, args))) => {
                write!(f, "(sort {name} ({presort} {}))", ListDisplay(args, " "))
            }
            Command::Function(decl) => write!(f, "{decl}"),
            Command::Relation { name, inputs } => {
                write!(f, "(relation {name} ({}))", ListDisplay(inputs, " "))
            }
            Command::AddRuleset(name) => write!(f, "(ruleset {name})"),
            Command::UnstableCombinedRuleset(name, others) => {
                write!(
                    f,
                    "(unstable-combined-ruleset {name} {})",
                    ListDisplay(others, " ")
                )
            }
            Command::Rule {
                name,
                ruleset,
                rule,
            } => {
                write!(
                    f,
                    "(rule ({}) ({})",
                    ListDisplay(&rule.body, " "),
                    ListDisplay(&rule.head, " ")
                )?;
                if !ruleset.as_str().is_empty() {
                    write!(f, " :ruleset {ruleset}")?;
                }
                if !name.as_str().is_empty() {
                    write!(f, " :name {:?}", name.as_str())?;
                }
                write!(f, ")")
            }
            Command::Rewrite(ruleset, rewrite, subsume) => {
                let text = rewrite.to_string();
                write!(f, "{}", &text[..text.len() - 1])?;
                if *subsume {
                    write!(f, " :subsume")?;
                }
                if !ruleset.as_str().is_empty() {
                    write!(f, " :ruleset {ruleset}")?;
                }
                write!(f, ")")
            }
            Command::BiRewrite(ruleset, rewrite) => {
                let text = rewrite.to_string();
                write!(f, "(birewrite{}", &text["(rewrite".len()..text.len() - 1])?;
                if !ruleset.as_str().is_empty() {
                    write!(f, " :ruleset {ruleset}")?;
                }
                write!(f, ")")
            }
            Command::Action(action) => write!(f, "{action}"),
            Command::RunSchedule(sched) => write!(f, "(run-schedule {sched})"),
            Command::PrintOverallStatistics => write!(f, "(print-stats)"),
            Command::Check(facts) => write!(f, "(check {})", ListDisplay(facts, " ")),
            Command::Extract { expr, variants: 0 } => write!(f, "(extract {expr})"),
            Command::Extract { expr, variants } => write!(f, "(extract {expr} {variants})"),
            Command::PrintFunction(name, n) => write!(f, "(print-function {name} {n})"),
            Command::PrintSize(None) => write!(f, "(print-size)"),
            Command::PrintSize(Some(name)) => write!(f, "(print-size {name})"),
            Command::Push(n) => write!(f, "(push {n})"),
            Command::Pop(n) => write!(f, "(pop {n})"),
            Command::Fail(cmd) => write!(f, "(fail {cmd})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr;

    #[test]
    fn rewrite_desugars_to_union_rule() {
        let rw = Rewrite::new(expr!(Add a b), expr!(Add b a));
        let rule = rw.to_rule(true);
        assert_eq!(
            rule.to_string(),
            "(rule ((= $rewrite_lhs (Add a b))) ((union $rewrite_lhs (Add b a)) (subsume (Add a b))))"
        );
        assert_eq!(rw.reversed().lhs, expr!(Add b a));
    }

    #[test]
    fn commands_print_as_sexps() {
        let cmd = Command::Rewrite("".into(), Rewrite::new(expr!(f x), expr!(x)), false);
        assert_eq!(cmd.to_string(), "(rewrite (f x) x)");
        let cmd = Command::BiRewrite(
            "opt".into(),
            Rewrite::new(expr!(f x), expr!(g x)).when([Fact::Fact(expr!(h x))]),
        );
        assert_eq!(
            cmd.to_string(),
            "(birewrite (f x) (g x) :when ((h x)) :ruleset opt)"
        );
        let sched = Schedule::seq([
            Schedule::saturate(Schedule::run("a")),
            Schedule::repeat(3, Schedule::run("")),
        ]);
        assert_eq!(sched.to_string(), "(seq (saturate (run a)) (repeat 3 (run)))");
        let decl = FunctionDecl::function(
            "lo",
            Schema::new(vec!["Math".into()], "i64".into()),
            Some(expr!(max old new)),
        );
        assert_eq!(decl.to_string(), "(function lo (Math) i64 :merge (max old new))");
    }
}
