//! Generic join over function tables.
//!
//! A query is compiled into a program of instructions: one `Intersect` per
//! variable bound by table atoms, in a fixed variable order, interleaved with
//! primitive `Call`s as soon as their inputs are bound. Each table atom is
//! projected into a trie following that order, so binding a variable is an
//! intersection of the current trie level of every atom that mentions it.
//!
//! Semi-naive evaluation splits a run into one pass per table atom, where
//! that atom only sees rows newer than the rule's last search.
use std::ops::Range;

use crate::{
    core::{AtomTerm, Query, ResolvedCall, SpecializedPrimitive},
    util::{HashMap, IndexMap, ListDisplay},
    *,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Arg {
    Tuple(usize),
    Const(Value),
}

#[derive(Debug, Clone)]
enum Instr {
    Intersect {
        idx: usize,
        trie_indices: Vec<usize>,
    },
    Call {
        prim: SpecializedPrimitive,
        args: Vec<Arg>,
        out: Arg,
        // check the result against an already bound output, or bind it
        check: bool,
    },
}

#[derive(Debug, Clone)]
struct TableAtom {
    func: Symbol,
    args: Vec<AtomTerm>,
}

#[derive(Debug, Default, Clone)]
pub struct VarInfo {
    /// indexes into the `atoms` field of CompiledQuery
    occurences: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct CompiledQuery {
    atoms: Vec<TableAtom>,
    pub vars: IndexMap<Symbol, VarInfo>,
    program: Vec<Instr>,
}

enum Constraint {
    Eq(usize, usize),
    Const(usize, Value),
}

struct TrieRequest {
    sym: Symbol,
    projection: Vec<usize>,
    constraints: Vec<Constraint>,
    range: Range<u32>,
}

#[derive(Debug, Default)]
struct Trie(HashMap<Value, Self>);

impl Trie {
    fn len(&self) -> usize {
        self.0.len()
    }

    fn insert(&mut self, shuffle: &[usize], tuple: &[Value]) {
        debug_assert!(shuffle.len() <= tuple.len());
        let mut trie = self;
        for i in shuffle {
            trie = trie.0.entry(tuple[*i]).or_default();
        }
    }
}

struct Context<'b> {
    tries: Vec<&'b Trie>,
    tuple: Vec<Value>,
    empty: &'b Trie,
    val_pool: Vec<Vec<Value>>,
}

impl<'b> Context<'b> {
    fn eval<F>(&mut self, program: &[Instr], f: &mut F) -> Result<(), ()>
    where
        F: FnMut(&[Value]) -> Result<(), ()>,
    {
        let (instr, program) = match program.split_first() {
            None => return f(&self.tuple),
            Some(pair) => pair,
        };

        match instr {
            Instr::Intersect { idx, trie_indices } => {
                match trie_indices.len() {
                    1 => {
                        let j = trie_indices[0];
                        let r = self.tries[j];
                        for (val, trie) in r.0.iter() {
                            self.tuple[*idx] = *val;
                            self.tries[j] = trie;
                            let res = self.eval(program, f);
                            if res.is_err() {
                                self.tries[j] = r;
                                return res;
                            }
                        }
                        self.tries[j] = r;
                    }
                    _ => {
                        // the index of the smallest trie
                        let j_min = trie_indices
                            .iter()
                            .copied()
                            .min_by_key(|j| self.tries[*j].len())
                            .unwrap_or(trie_indices[0]);
                        let mut intersection = self.val_pool.pop().unwrap_or_default();
                        intersection.extend(self.tries[j_min].0.keys().cloned());

                        for &j in trie_indices {
                            if j != j_min {
                                let r = &self.tries[j].0;
                                intersection.retain(|t| r.contains_key(t));
                            }
                        }
                        let rs: Vec<&'b Trie> = trie_indices.iter().map(|&j| self.tries[j]).collect();

                        let mut res = Ok(());
                        for val in intersection.drain(..) {
                            self.tuple[*idx] = val;

                            for (&r, &j) in rs.iter().zip(trie_indices) {
                                self.tries[j] = r.0.get(&val).unwrap_or(self.empty);
                            }

                            res = self.eval(program, f);
                            if res.is_err() {
                                break;
                            }
                        }
                        intersection.clear();
                        self.val_pool.push(intersection);

                        for (&r, &j) in rs.iter().zip(trie_indices) {
                            self.tries[j] = r;
                        }
                        res?;
                    }
                };
            }
            Instr::Call {
                prim,
                args,
                out,
                check,
            } => {
                let values: Vec<Value> = args
                    .iter()
                    .map(|arg| match arg {
                        Arg::Tuple(i) => self.tuple[*i],
                        Arg::Const(val) => *val,
                    })
                    .collect();

                if let Some(res) = prim.primitive.apply(&values, None) {
                    match out {
                        Arg::Tuple(i) => {
                            if *check && self.tuple[*i] != res {
                                return Ok(());
                            }
                            self.tuple[*i] = res;
                        }
                        Arg::Const(val) => {
                            debug_assert!(*check);
                            if val != &res {
                                return Ok(());
                            }
                        }
                    }
                    self.eval(program, f)?;
                }
            }
        }
        Ok(())
    }
}

impl EGraph {
    pub(crate) fn compile_gj_query(&self, query: &Query<ResolvedCall>) -> CompiledQuery {
        let atoms: Vec<TableAtom> = query
            .funcs()
            .map(|(func, args)| TableAtom {
                func: func.name,
                args: args.to_vec(),
            })
            .collect();

        let mut vars: IndexMap<Symbol, VarInfo> = Default::default();
        for (i, atom) in atoms.iter().enumerate() {
            for v in atom.args.iter().filter_map(|a| a.var()) {
                vars.entry(v).or_default().occurences.push(i)
            }
        }
        for info in vars.values_mut() {
            info.occurences.dedup();
        }

        let relation_size = |info: &VarInfo| {
            info.occurences
                .iter()
                .map(|&i| self.functions[&atoms[i].func].nodes.num_live())
                .min()
                .unwrap_or(0)
        };
        // most constrained variables first, then those of the smallest relations
        vars.sort_by(|_v1, i1, _v2, i2| {
            i2.occurences
                .len()
                .cmp(&i1.occurences.len())
                .then_with(|| relation_size(i1).cmp(&relation_size(i2)))
        });

        let mut extra: Vec<(SpecializedPrimitive, &[AtomTerm])> = query
            .filters()
            .map(|(p, args)| (p.clone(), args))
            .collect();
        let table_vars: Vec<Symbol> = vars.keys().copied().collect();

        let mut program = vec![];
        // bound[i] holds once the i-th table variable has been intersected
        let mut n_bound = 0;
        loop {
            // schedule every primitive whose inputs are ready
            loop {
                let is_bound = |vars: &IndexMap<Symbol, VarInfo>, v: &Symbol| match vars.get_index_of(v) {
                    Some(i) => i >= table_vars.len() || i < n_bound,
                    None => false,
                };
                let next = extra.iter().position(|(_, args)| {
                    let Some((out, inputs)) = args.split_last() else {
                        return false;
                    };
                    let inputs_ready = inputs
                        .iter()
                        .all(|a| a.var().map_or(true, |v| is_bound(&vars, &v)));
                    // outputs that a table atom binds must wait for it
                    let out_ready = match out.var() {
                        Some(v) if vars.contains_key(&v) => is_bound(&vars, &v),
                        _ => true,
                    };
                    inputs_ready && out_ready
                });
                let Some(i) = next else { break };
                let (prim, args) = extra.remove(i);
                let Some((out, inputs)) = args.split_last() else {
                    continue;
                };
                let to_arg = |vars: &IndexMap<Symbol, VarInfo>, a: &AtomTerm| match a {
                    AtomTerm::Var(v) => Arg::Tuple(vars.get_index_of(v).unwrap_or_default()),
                    AtomTerm::Literal(lit) => Arg::Const(lit.to_value()),
                };
                let args = inputs.iter().map(|a| to_arg(&vars, a)).collect();
                let check = match out {
                    AtomTerm::Var(v) if vars.contains_key(v) => true,
                    AtomTerm::Var(v) => {
                        vars.insert(*v, VarInfo::default());
                        false
                    }
                    AtomTerm::Literal(_) => true,
                };
                program.push(Instr::Call {
                    prim,
                    args,
                    out: to_arg(&vars, out),
                    check,
                });
            }

            if n_bound == table_vars.len() {
                break;
            }
            let info = &vars[n_bound];
            program.push(Instr::Intersect {
                idx: n_bound,
                trie_indices: info.occurences.clone(),
            });
            n_bound += 1;
        }
        // typechecking rejects queries whose primitives can never run
        debug_assert!(extra.is_empty(), "unschedulable primitives in query");

        log::debug!("vars: [{}]", ListDisplay(vars.keys(), ", "));

        CompiledQuery {
            atoms,
            vars,
            program,
        }
    }

    fn build_trie(&self, req: &TrieRequest, include_subsumed: bool) -> (Trie, bool) {
        let mut trie = Trie::default();
        let mut matched = false;
        let table = &self.functions[&req.sym].nodes;
        let mut tuple: Vec<Value> = vec![];
        for (_, inputs, out) in table.iter_timestamp_range(&req.range, include_subsumed) {
            tuple.clear();
            tuple.extend_from_slice(inputs);
            tuple.push(out.value);
            let ok = req.constraints.iter().all(|constraint| match constraint {
                Constraint::Eq(i, j) => tuple[*i] == tuple[*j],
                Constraint::Const(i, t) => &tuple[*i] == t,
            });
            if ok {
                matched = true;
                trie.insert(&req.projection, &tuple);
            }
        }
        (trie, matched)
    }

    fn trie_request(&self, query: &CompiledQuery, atom: &TableAtom, range: Range<u32>) -> TrieRequest {
        let mut constraints = vec![];
        for (i, t) in atom.args.iter().enumerate() {
            match t {
                AtomTerm::Literal(lit) => constraints.push(Constraint::Const(i, lit.to_value())),
                AtomTerm::Var(_) => {
                    if let Some(j) = atom.args[..i].iter().position(|t2| t == t2) {
                        constraints.push(Constraint::Eq(j, i));
                    }
                }
            }
        }

        let mut projection = vec![];
        for v in query.vars.keys() {
            if let Some(i) = atom.args.iter().position(|t| t == &AtomTerm::Var(*v)) {
                projection.push(i);
            }
        }

        TrieRequest {
            sym: atom.func,
            projection,
            constraints,
            range,
        }
    }

    fn run_query_with_ranges<F>(
        &self,
        query: &CompiledQuery,
        ranges: &[Range<u32>],
        include_subsumed: bool,
        f: &mut F,
    ) -> Result<(), ()>
    where
        F: FnMut(&[Value]) -> Result<(), ()>,
    {
        let mut tries = Vec::with_capacity(query.atoms.len());
        for (atom, range) in query.atoms.iter().zip(ranges) {
            let (trie, matched) =
                self.build_trie(&self.trie_request(query, atom, range.clone()), include_subsumed);
            if !matched {
                return Ok(());
            }
            tries.push(trie);
        }
        let empty = Trie::default();
        let mut ctx = Context {
            tries: tries.iter().collect(),
            tuple: vec![Value::fake(); query.vars.len()],
            empty: &empty,
            val_pool: Default::default(),
        };
        ctx.eval(&query.program, f)
    }

    /// Call `f` on every match of the query, as a tuple in the order of
    /// [`CompiledQuery::vars`]. With a nonzero `last_run`, only matches that
    /// use at least one row added at or after `last_run` are reported.
    /// Returning `Err` from `f` stops the search.
    pub(crate) fn run_query<F>(
        &self,
        query: &CompiledQuery,
        last_run: u32,
        include_subsumed: bool,
        mut f: F,
    ) where
        F: FnMut(&[Value]) -> Result<(), ()>,
    {
        let n = query.atoms.len();
        if n == 0 {
            // a query over primitives alone only matches on the first run
            if last_run == 0 {
                let empty = Trie::default();
                let mut ctx = Context {
                    tries: vec![],
                    tuple: vec![Value::fake(); query.vars.len()],
                    empty: &empty,
                    val_pool: Default::default(),
                };
                let _ = ctx.eval(&query.program, &mut f);
            }
            return;
        }

        let all = 0..u32::MAX;
        if last_run == 0 {
            let ranges = vec![all; n];
            let _ = self.run_query_with_ranges(query, &ranges, include_subsumed, &mut f);
            return;
        }

        let old = 0..last_run;
        let new = last_run..u32::MAX;
        for i in 0..n {
            let table = &self.functions[&query.atoms[i].func].nodes;
            if table.approximate_range_size(&new) == 0 {
                continue;
            }
            let ranges: Vec<Range<u32>> = (0..n)
                .map(|j| match j.cmp(&i) {
                    std::cmp::Ordering::Less => old.clone(),
                    std::cmp::Ordering::Equal => new.clone(),
                    std::cmp::Ordering::Greater => all.clone(),
                })
                .collect();
            if self
                .run_query_with_ranges(query, &ranges, include_subsumed, &mut f)
                .is_err()
            {
                return;
            }
        }
    }
}
