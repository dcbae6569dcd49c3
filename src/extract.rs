use crate::termdag::{TermDag, TermId};
use crate::util::{HashMap, HashSet, IndexMap};
use crate::*;

pub type Cost = usize;

/// How the cost of a term is computed from the costs of its parts.
pub trait CostModel {
    /// The cost of an application of `head`, whose own cost is `head_cost`,
    /// to children with the given costs.
    fn fold(&self, head: Symbol, children_cost: &[Cost], head_cost: Cost) -> Cost;

    /// The cost of a value of a container sort with elements of the given
    /// costs.
    fn container_primitive(&self, sort: &ArcSort, value: Value, element_costs: &[Cost]) -> Cost;

    /// The cost of a value of a primitive sort.
    fn leaf_primitive(&self, sort: &ArcSort, value: Value) -> Cost;
}

/// The size of a term as a tree, where every function contributes its
/// declared `:cost` (1 by default) and every primitive 1.
#[derive(Default, Clone, Copy, Debug)]
pub struct TreeAdditiveCostModel;

impl CostModel for TreeAdditiveCostModel {
    fn fold(&self, _head: Symbol, children_cost: &[Cost], head_cost: Cost) -> Cost {
        children_cost
            .iter()
            .fold(head_cost, |s, c| s.saturating_add(*c))
    }

    fn container_primitive(&self, _sort: &ArcSort, _value: Value, element_costs: &[Cost]) -> Cost {
        element_costs.iter().fold(1, |s, c| s.saturating_add(*c))
    }

    fn leaf_primitive(&self, _sort: &ArcSort, _value: Value) -> Cost {
        1
    }
}

/// The best row found for an e-class.
#[derive(Clone, Debug)]
struct Best {
    cost: Cost,
    func: Symbol,
    inputs: ValueVec,
}

/// Computes the cheapest row of every e-class reachable through
/// extractable functions, and builds terms from those rows on demand.
pub struct Extractor<'a> {
    costs: HashMap<Value, Best>,
    ctors: Vec<Symbol>,
    egraph: &'a EGraph,
    cost_model: &'a dyn CostModel,
}

/// The result of extracting every e-class at once.
#[derive(Debug, Clone)]
pub struct GlobalExtractReport {
    pub termdag: TermDag,
    /// The best term and its cost, for every e-class that has one.
    pub best: IndexMap<Value, (Cost, TermId)>,
    /// E-classes without any finite term.
    pub unextractable: Vec<Value>,
    /// The sum of the tree costs of all best terms.
    pub tree_cost: Cost,
    /// The cost of the chosen representatives, each counted once.
    pub dag_cost: Cost,
    /// False when some e-class had several cheapest rows and sits on a cycle,
    /// where the choice can change the cost of the other classes.
    pub exact: bool,
}

impl EGraph {
    /// Extract the cheapest term equal to `value` under the default
    /// [`TreeAdditiveCostModel`].
    ///
    /// ```
    /// use eqsat::{ast::*, expr, EGraph, TermDag};
    /// let mut egraph = EGraph::default();
    /// egraph
    ///     .run_program(vec![
    ///         Command::Datatype {
    ///             name: "Op".into(),
    ///             variants: vec![Variant::new("Add", ["i64", "i64"])],
    ///         },
    ///         Command::Action(Action::Let("expr".into(), expr!(Add 1 1))),
    ///     ])
    ///     .unwrap();
    /// let mut termdag = TermDag::default();
    /// let (sort, value) = egraph.eval_expr(&expr!(expr)).unwrap();
    /// let (_, extracted) = egraph.extract(value, &mut termdag, &sort).unwrap();
    /// assert_eq!(termdag.to_string(extracted), "(Add 1 1)");
    /// ```
    pub fn extract(
        &self,
        value: Value,
        termdag: &mut TermDag,
        arcsort: &ArcSort,
    ) -> Result<(Cost, TermId), Error> {
        self.extract_with(value, termdag, arcsort, &TreeAdditiveCostModel)
    }

    pub fn extract_with(
        &self,
        value: Value,
        termdag: &mut TermDag,
        arcsort: &ArcSort,
        cost_model: &dyn CostModel,
    ) -> Result<(Cost, TermId), Error> {
        let extractor = Extractor::new(self, cost_model);
        extractor.find_best(value, termdag, arcsort).ok_or_else(|| {
            log::error!("No cost for {:?}", value);
            Error::ExtractError(value)
        })
    }

    /// Up to `limit` terms, one per row of the e-class of `value`, each with
    /// the best terms for the children.
    pub fn extract_variants(
        &self,
        sort: &ArcSort,
        value: Value,
        limit: usize,
        termdag: &mut TermDag,
    ) -> Vec<TermId> {
        let output_value = self.find(value);
        let ext = Extractor::new(self, &TreeAdditiveCostModel);
        ext.ctors
            .iter()
            .flat_map(|&sym| {
                let func = &self.functions[&sym];
                if func.schema.output.name() != sort.name() {
                    return vec![];
                }
                func.nodes
                    .iter(false)
                    .filter(|&(_, output)| self.find(output.value) == output_value)
                    .filter_map(|(inputs, _output)| ext.term_from_row(sym, inputs, termdag))
                    .collect()
            })
            .take(limit)
            .collect()
    }

    /// Extract every e-class of the database at once.
    pub fn extract_all(&self) -> GlobalExtractReport {
        self.extract_all_with(&TreeAdditiveCostModel)
    }

    pub fn extract_all_with(&self, cost_model: &dyn CostModel) -> GlobalExtractReport {
        let extractor = Extractor::new(self, cost_model);
        let mut termdag = TermDag::default();

        let mut classes: IndexMap<Value, ()> = IndexMap::default();
        for function in self.functions.values() {
            for (inputs, output) in function.nodes.iter(true) {
                let values = inputs.iter().chain(std::iter::once(&output.value));
                for (value, sort) in values.zip(function.schema.columns()) {
                    if sort.is_eq_sort() {
                        classes.insert(self.find(*value), ());
                    }
                }
            }
        }

        let mut best = IndexMap::default();
        let mut unextractable = vec![];
        let mut tree_cost: Cost = 0;
        for class in classes.keys() {
            match extractor.costs.get(class) {
                Some(b) => {
                    let term = extractor.find_best_term(*class, &mut termdag);
                    if let Some(term) = term {
                        tree_cost = tree_cost.saturating_add(b.cost);
                        best.insert(*class, (b.cost, term));
                    } else {
                        unextractable.push(*class);
                    }
                }
                None => unextractable.push(*class),
            }
        }

        let dag_cost = extractor.dag_cost();

        GlobalExtractReport {
            termdag,
            best,
            unextractable,
            tree_cost,
            dag_cost,
            exact: !extractor.tie_on_cycle(),
        }
    }
}

impl<'a> Extractor<'a> {
    pub fn new(egraph: &'a EGraph, cost_model: &'a dyn CostModel) -> Self {
        let mut extractor = Extractor {
            costs: HashMap::default(),
            egraph,
            cost_model,
            ctors: vec![],
        };

        // only consider "extractable" functions that build e-classes
        extractor.ctors.extend(
            egraph
                .functions
                .iter()
                .filter(|(_, func)| func.is_extractable() && func.schema.output.is_eq_sort())
                .map(|(name, _)| *name),
        );

        log::debug!("Extracting from ctors: {:?}", extractor.ctors);
        extractor.find_costs();
        extractor
    }

    pub(crate) fn term_from_row(&self, sym: Symbol, inputs: &[Value], termdag: &mut TermDag) -> Option<TermId> {
        let func = &self.egraph.functions[&sym];
        debug_assert_eq!(inputs.len(), func.schema.input.len());
        let mut children = vec![];
        for (value, arcsort) in inputs.iter().zip(&func.schema.input) {
            children.push(self.extract_value(*value, arcsort, termdag)?)
        }
        Some(termdag.app(sym, children))
    }

    /// The best term for an e-class, if it has one.
    pub fn find_best_term(&self, value: Value, termdag: &mut TermDag) -> Option<TermId> {
        let best = self.costs.get(&self.egraph.find(value))?;
        self.term_from_row(best.func, &best.inputs, termdag)
    }

    /// The term for any value: the best term of an e-class, or the term a
    /// primitive or container sort builds for its value.
    pub fn extract_value(&self, value: Value, sort: &ArcSort, termdag: &mut TermDag) -> Option<TermId> {
        if sort.is_eq_sort() {
            self.find_best_term(value, termdag)
        } else {
            sort.extract_term(self.egraph, value, self, termdag)
        }
    }

    pub fn find_best(&self, value: Value, termdag: &mut TermDag, sort: &ArcSort) -> Option<(Cost, TermId)> {
        let cost = self.value_cost(value, sort)?;
        let term = self.extract_value(value, sort, termdag)?;
        Some((cost, term))
    }

    fn value_cost(&self, value: Value, sort: &ArcSort) -> Option<Cost> {
        if sort.is_eq_sort() {
            self.costs.get(&self.egraph.find(value)).map(|b| b.cost)
        } else if sort.is_container_sort() {
            let element_costs = sort
                .inner_values(&value)
                .into_iter()
                .map(|(sort, value)| self.value_cost(value, &sort))
                .collect::<Option<Vec<_>>>()?;
            Some(self.cost_model.container_primitive(sort, value, &element_costs))
        } else {
            Some(self.cost_model.leaf_primitive(sort, value))
        }
    }

    fn row_cost(&self, sym: Symbol, func: &Function, inputs: &[Value]) -> Option<Cost> {
        let children_cost = inputs
            .iter()
            .zip(&func.schema.input)
            .map(|(value, sort)| self.value_cost(*value, sort))
            .collect::<Option<Vec<_>>>()?;
        Some(
            self.cost_model
                .fold(sym, &children_cost, func.decl.cost.unwrap_or(1)),
        )
    }

    /// Bellman-Ford: lower the cost of every class until nothing changes.
    fn find_costs(&mut self) {
        let mut did_something = true;
        while did_something {
            did_something = false;

            for &sym in &self.ctors {
                let func = &self.egraph.functions[&sym];
                for (inputs, output) in func.nodes.iter(false) {
                    let Some(new_cost) = self.row_cost(sym, func, inputs) else {
                        continue;
                    };
                    let make_best = || Best {
                        cost: new_cost,
                        func: sym,
                        inputs: inputs.iter().map(|v| self.egraph.find(*v)).collect(),
                    };
                    let id = self.egraph.find(output.value);
                    let best = match self.costs.get(&id) {
                        None => make_best(),
                        Some(old) if new_cost < old.cost => make_best(),
                        Some(_) => continue,
                    };
                    did_something = true;
                    self.costs.insert(id, best);
                }
            }
        }
    }

    /// The cost of the chosen rows with every child shared: each row is
    /// folded over zero-cost children and each distinct primitive leaf
    /// is counted once.
    fn dag_cost(&self) -> Cost {
        let mut leaves: HashSet<Value> = HashSet::default();
        let mut cost: Cost = 0;
        for best in self.costs.values() {
            let func = &self.egraph.functions[&best.func];
            let zeros = vec![0; best.inputs.len()];
            let head_cost = func.decl.cost.unwrap_or(1);
            cost = cost.saturating_add(self.cost_model.fold(best.func, &zeros, head_cost));
            for (value, sort) in best.inputs.iter().zip(&func.schema.input) {
                if sort.is_eq_sort() || !leaves.insert(*value) {
                    continue;
                }
                let leaf = if sort.is_container_sort() {
                    let zeros = vec![0; sort.inner_values(value).len()];
                    self.cost_model.container_primitive(sort, *value, &zeros)
                } else {
                    self.cost_model.leaf_primitive(sort, *value)
                };
                cost = cost.saturating_add(leaf);
            }
        }
        cost
    }

    /// Whether some class has several cheapest rows while being reachable
    /// from one of its own children.
    fn tie_on_cycle(&self) -> bool {
        let mut children: HashMap<Value, HashSet<Value>> = HashMap::default();
        let mut tied: HashMap<Value, usize> = HashMap::default();
        for &sym in &self.ctors {
            let func = &self.egraph.functions[&sym];
            for (inputs, output) in func.nodes.iter(false) {
                let class = self.egraph.find(output.value);
                let kids = children.entry(class).or_default();
                for (value, sort) in inputs.iter().zip(&func.schema.input) {
                    if sort.is_eq_sort() {
                        kids.insert(self.egraph.find(*value));
                    }
                }
                let (Some(best), Some(cost)) = (self.costs.get(&class), self.row_cost(sym, func, inputs)) else {
                    continue;
                };
                if cost == best.cost {
                    *tied.entry(class).or_default() += 1;
                }
            }
        }

        tied.iter().filter(|(_, n)| **n > 1).any(|(class, _)| {
            let mut seen = HashSet::default();
            let mut stack: Vec<Value> = children.get(class).into_iter().flatten().copied().collect();
            while let Some(next) = stack.pop() {
                if next == *class {
                    return true;
                }
                if seen.insert(next) {
                    stack.extend(children.get(&next).into_iter().flatten().copied());
                }
            }
            false
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr;

    #[test]
    fn tree_additive_costs_add_up() {
        let model = TreeAdditiveCostModel;
        assert_eq!(model.fold("f".into(), &[1, 2, 3], 4), 10);
        assert_eq!(model.fold("f".into(), &[usize::MAX], 1), usize::MAX);
    }

    #[test]
    fn costs_follow_declared_costs() {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut egraph = EGraph::default();
        egraph
            .run_program(vec![
                Command::Datatype {
                    name: "E".into(),
                    variants: vec![
                        Variant::new("A", []).with_cost(5),
                        Variant::new("B", []),
                        Variant::new("C", ["E"]),
                    ],
                },
                Command::Action(Action::Union(expr!((A)), expr!(C ((B))))),
            ])
            .unwrap();

        let (sort, value) = egraph.eval_expr(&expr!((A))).unwrap();
        let mut termdag = TermDag::default();
        let (cost, term) = egraph.extract(value, &mut termdag, &sort).unwrap();
        assert_eq!(cost, 2);
        assert_eq!(termdag.to_string(term), "(C (B))");

        let variants = egraph.extract_variants(&sort, value, 10, &mut termdag);
        let mut printed: Vec<String> = variants.iter().map(|t| termdag.to_string(*t)).collect();
        printed.sort();
        assert_eq!(printed, vec!["(A)", "(C (B))"]);
    }

    /// Every head costs twice its declared cost and primitives are free.
    struct DoubledHeads;

    impl CostModel for DoubledHeads {
        fn fold(&self, _head: Symbol, children_cost: &[Cost], head_cost: Cost) -> Cost {
            children_cost.iter().sum::<Cost>() + 2 * head_cost
        }

        fn container_primitive(&self, _sort: &ArcSort, _value: Value, element_costs: &[Cost]) -> Cost {
            element_costs.iter().sum()
        }

        fn leaf_primitive(&self, _sort: &ArcSort, _value: Value) -> Cost {
            0
        }
    }

    #[test]
    fn global_extraction_uses_the_given_cost_model() {
        let mut egraph = EGraph::default();
        egraph
            .run_program(vec![
                Command::Datatype {
                    name: "E".into(),
                    variants: vec![Variant::new("Leaf", ["i64"]), Variant::new("Node", ["E", "E"])],
                },
                Command::Action(Action::Expr(expr!(Node (Leaf 1) (Leaf 1)))),
            ])
            .unwrap();

        let (sort, value) = egraph.eval_expr(&expr!(Node (Leaf 1) (Leaf 1))).unwrap();
        let mut termdag = TermDag::default();
        let (cost, _) = egraph
            .extract_with(value, &mut termdag, &sort, &DoubledHeads)
            .unwrap();
        assert_eq!(cost, 6);

        let report = egraph.extract_all_with(&DoubledHeads);
        // (Leaf 1) costs 2, (Node ...) costs 6
        assert_eq!(report.tree_cost, 8);
        assert_eq!(report.dag_cost, 4);
    }

    #[test]
    fn global_extraction_reports_every_class() {
        let mut egraph = EGraph::default();
        egraph
            .run_program(vec![
                Command::Datatype {
                    name: "E".into(),
                    variants: vec![Variant::new("Leaf", ["i64"]), Variant::new("Node", ["E", "E"])],
                },
                Command::Action(Action::Expr(expr!(Node (Leaf 1) (Leaf 1)))),
            ])
            .unwrap();

        let report = egraph.extract_all();
        assert_eq!(report.best.len(), 2);
        assert!(report.unextractable.is_empty());
        // (Leaf 1) costs 2, (Node ...) costs 5
        assert_eq!(report.tree_cost, 7);
        // both rows plus the shared leaf 1
        assert_eq!(report.dag_cost, 3);
        assert!(report.exact);
    }
}
