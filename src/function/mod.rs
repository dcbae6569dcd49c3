use std::sync::Arc;

use crate::{actions::Program, typechecking::FuncType, util::IndexMap, *};
use index::ColumnIndex;

mod binary_search;
pub(crate) mod index;
pub(crate) mod table;

use table::Table;

/// How two outputs set for the same inputs are combined.
#[derive(Clone, Debug)]
pub(crate) enum MergeFn {
    /// A second, different output is an error.
    AssertEq,
    /// Outputs are e-classes and get unioned.
    Union,
    /// A merge expression over `old` and `new`.
    Expr(Arc<Program>),
}

/// A merge found while rebuilding whose merge expression has to run once
/// the tables are no longer borrowed.
#[derive(Debug)]
pub(crate) struct DeferredMerge {
    pub(crate) inputs: ValueVec,
    pub(crate) old: Value,
    pub(crate) new: Value,
}

#[derive(Clone, Debug)]
pub struct ResolvedSchema {
    pub input: Vec<ArcSort>,
    pub output: ArcSort,
}

impl ResolvedSchema {
    pub fn get_by_pos(&self, index: usize) -> Option<&ArcSort> {
        if self.input.len() == index {
            Some(&self.output)
        } else {
            self.input.get(index)
        }
    }

    pub(crate) fn columns(&self) -> impl Iterator<Item = &ArcSort> + '_ {
        self.input.iter().chain(std::iter::once(&self.output))
    }
}

#[derive(Clone)]
pub struct Function {
    pub(crate) decl: FunctionDecl,
    pub schema: ResolvedSchema,
    pub(crate) merge: MergeFn,
    pub(crate) default: Option<Arc<Program>>,
    pub(crate) nodes: Table,
    /// One index per eq-sorted column, inputs then output.
    indexes: Vec<Option<ColumnIndex>>,
    index_updated_through: usize,
    has_eq_containers: bool,
}

impl Debug for Function {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Function")
            .field("decl", &self.decl)
            .field("schema", &self.schema)
            .finish()
    }
}

impl Function {
    pub(crate) fn new(type_info: &TypeInfo, decl: &FunctionDecl, ftype: FuncType) -> Result<Self, Error> {
        let schema = ResolvedSchema {
            input: ftype.input,
            output: ftype.output,
        };

        let merge = if schema.output.is_eq_sort() {
            MergeFn::Union
        } else if let Some(expr) = &decl.merge {
            let mut binding = IndexMap::default();
            binding.insert(Symbol::from("old"), schema.output.clone());
            binding.insert(Symbol::from("new"), schema.output.clone());
            MergeFn::Expr(Arc::new(compile_output_expr(
                type_info,
                expr,
                &binding,
                &schema.output,
            )?))
        } else {
            MergeFn::AssertEq
        };

        let default = match &decl.default {
            Some(expr) => Some(Arc::new(compile_output_expr(
                type_info,
                expr,
                &Default::default(),
                &schema.output,
            )?)),
            None => None,
        };

        let indexes = schema
            .columns()
            .map(|sort| sort.is_eq_sort().then(|| ColumnIndex::new(sort.name())))
            .collect();
        let has_eq_containers = schema.columns().any(|sort| sort.is_eq_container_sort());

        Ok(Function {
            decl: decl.clone(),
            schema,
            merge,
            default,
            nodes: Default::default(),
            indexes,
            index_updated_through: 0,
            has_eq_containers,
        })
    }

    pub fn is_extractable(&self) -> bool {
        !self.decl.unextractable
    }

    pub fn get(&self, inputs: &[Value]) -> Option<Value> {
        self.nodes.get(inputs).map(|out| out.value)
    }

    pub(crate) fn insert(&mut self, inputs: &[Value], value: Value, timestamp: u32) -> Option<Value> {
        self.nodes.insert(inputs, value, timestamp)
    }

    pub(crate) fn subsume(&mut self, inputs: &[Value], timestamp: u32) -> bool {
        self.nodes.subsume(inputs, timestamp)
    }

    pub(crate) fn remove(&mut self, inputs: &[Value], timestamp: u32) -> bool {
        let removed = self.nodes.remove(inputs, timestamp);
        if removed && self.nodes.too_stale() {
            self.rehash();
        }
        removed
    }

    fn rehash(&mut self) {
        self.nodes.rehash();
        self.indexes
            .iter_mut()
            .flatten()
            .for_each(ColumnIndex::clear);
        self.index_updated_through = 0;
    }

    fn update_indexes(&mut self) {
        let through = self.nodes.len();
        for (i, inputs, out) in self
            .nodes
            .iter_range(self.index_updated_through..through, true)
        {
            for (col, index) in self.indexes.iter_mut().enumerate() {
                if let Some(index) = index {
                    let value = inputs.get(col).copied().unwrap_or(out.value);
                    index.add(value, i);
                }
            }
        }
        self.index_updated_through = through;
    }

    /// Re-canonicalize the rows that mention ids that stopped being roots
    /// (every row, if a column holds containers of e-classes and unions
    /// happened), merging rows whose inputs collide. Returns the number of
    /// rows that changed and the merges that still need their merge
    /// expression run.
    pub(crate) fn rebuild(
        &mut self,
        uf: &mut UnionFind,
        timestamp: u32,
    ) -> Result<(usize, Vec<DeferredMerge>), Error> {
        let mut deferred = vec![];
        if !uf.has_recent_ids() {
            return Ok((0, deferred));
        }
        if self.nodes.too_stale() {
            self.rehash();
        }
        self.update_indexes();

        let mut offsets: Vec<usize> = if self.has_eq_containers {
            (0..self.nodes.len()).collect()
        } else {
            let mut offsets: Vec<usize> = self
                .indexes
                .iter()
                .flatten()
                .flat_map(|index| index.to_canonicalize(uf))
                .collect();
            offsets.sort_unstable();
            offsets.dedup();
            offsets
        };
        // offsets past the end of the table can only come from rows added
        // during this loop, which are canonical already
        let end = self.nodes.len();
        offsets.retain(|&i| i < end);

        let mut updates = 0;
        let mut scratch: Vec<Value> = vec![];
        for i in offsets {
            let Some((inputs, out)) = self.nodes.get_index(i) else {
                continue;
            };
            scratch.clear();
            scratch.extend_from_slice(inputs);
            let mut new_out = out.value;
            let subsumed = out.subsumed;
            let mut changed = false;
            for (value, sort) in scratch.iter_mut().zip(&self.schema.input) {
                changed |= sort.canonicalize(value, uf);
            }
            changed |= self.schema.output.canonicalize(&mut new_out, uf);
            if !changed {
                continue;
            }
            updates += 1;

            let old_inputs: ValueVec = inputs.into();
            self.nodes.remove(&old_inputs, timestamp);

            let mut result = Ok(());
            let sort = self.schema.output.name();
            let merge = &self.merge;
            self.nodes
                .insert_and_merge(&scratch, timestamp, subsumed, |prev| match prev {
                    None => new_out,
                    Some(prev) if prev == new_out => prev,
                    Some(prev) => match merge {
                        MergeFn::Union => uf.union_values(prev, new_out, sort),
                        MergeFn::AssertEq => {
                            result = Err(Error::MergeError(self.decl.name, prev, new_out));
                            prev
                        }
                        MergeFn::Expr(_) => {
                            deferred.push(DeferredMerge {
                                inputs: scratch.iter().copied().collect(),
                                old: prev,
                                new: new_out,
                            });
                            prev
                        }
                    },
                });
            result?;
        }

        if self.nodes.too_stale() {
            self.rehash();
        }
        log::trace!("rebuilt {updates} rows of {}", self.decl.name);
        Ok((updates, deferred))
    }
}

/// Typecheck and compile an expression whose value must be of sort `output`.
fn compile_output_expr(
    type_info: &TypeInfo,
    expr: &Expr,
    binding: &IndexMap<Symbol, ArcSort>,
    output: &ArcSort,
) -> Result<Program, Error> {
    let typed = type_info.typecheck_expr(expr, binding)?;
    if typed.sort.name() != output.name() {
        return Err(TypeError::Mismatch {
            expr: expr.clone(),
            expected: output.clone(),
            actual: typed.sort,
        }
        .into());
    }
    let subst = binding.keys().copied().collect();
    Ok(Program::compile_expr(
        &subst,
        &typed.rule.var_types,
        &typed.rule.head,
        &typed.output,
    ))
}
