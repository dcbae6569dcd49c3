//! Structural snapshots of the database as an [`egraph_serialize::EGraph`].
use std::collections::VecDeque;

use ordered_float::NotNan;

use crate::{
    extract::{Extractor, TreeAdditiveCostModel},
    termdag::TermDag,
    util::HashMap,
    *,
};

pub struct SerializeConfig {
    /// Functions past this many (counting only non-empty ones) are left out.
    pub max_functions: Option<usize>,
    /// Rows past this many per function are left out.
    pub max_calls_per_function: Option<usize>,
    /// Whether to include the tables backing globals.
    pub include_temporary_functions: bool,
    /// E-classes to mark as roots of the output.
    pub root_eclasses: Vec<(ArcSort, Value)>,
}

/// Default outputs every node.
impl Default for SerializeConfig {
    fn default() -> Self {
        SerializeConfig {
            max_functions: None,
            max_calls_per_function: None,
            include_temporary_functions: false,
            root_eclasses: vec![],
        }
    }
}

type NodeIds = HashMap<egraph_serialize::ClassId, VecDeque<egraph_serialize::NodeId>>;

struct Serializer<'a> {
    extractor: Extractor<'a>,
    termdag: TermDag,
    node_ids: NodeIds,
    result: egraph_serialize::EGraph,
}

fn node_cost(cost: f64) -> NotNan<f64> {
    NotNan::new(cost).unwrap_or_default()
}

impl EGraph {
    /// Snapshot the database for export.
    ///
    /// Every row becomes a node in the e-class of its output, with cost the
    /// function's `:cost` (1 by default). Primitive values become their own
    /// e-class with a single node. Edges point at a node of the child's
    /// e-class, rotating through the candidates so they spread out. When all
    /// nodes of a class were cut by the limits, a `[...]` placeholder of
    /// infinite cost stands in for them.
    pub fn serialize(&self, config: SerializeConfig) -> egraph_serialize::EGraph {
        let all_calls: Vec<(Symbol, &Function, &[Value], &TupleOutput, usize)> = self
            .functions
            .iter()
            .filter(|(name, _)| {
                config.include_temporary_functions || !self.type_info.is_global(**name)
            })
            .map(|(name, function)| {
                function
                    .nodes
                    .iter_range(0..function.nodes.len(), true)
                    .take(config.max_calls_per_function.unwrap_or(usize::MAX))
                    .map(|(offset, input, output)| (*name, function, input, output, offset))
                    .collect::<Vec<_>>()
            })
            .filter(|calls| !calls.is_empty())
            .take(config.max_functions.unwrap_or(usize::MAX))
            .flatten()
            .collect();

        let mut node_ids = NodeIds::default();
        for (name, function, _, output, offset) in &all_calls {
            if function.schema.output.is_eq_sort() {
                let class_id = self.value_to_class_id(&function.schema.output, &output.value);
                node_ids
                    .entry(class_id)
                    .or_default()
                    .push_back(function_node_id(*name, *offset));
            }
        }

        let mut serializer = Serializer {
            extractor: Extractor::new(self, &TreeAdditiveCostModel),
            termdag: TermDag::default(),
            node_ids,
            result: egraph_serialize::EGraph::default(),
        };

        for (name, function, input, output, offset) in all_calls {
            let class_id = self.value_to_class_id(&function.schema.output, &output.value);
            self.serialize_value(&mut serializer, &function.schema.output, &output.value);
            let children = input
                .iter()
                .zip(&function.schema.input)
                .map(|(v, sort)| self.serialize_value(&mut serializer, sort, v))
                .collect();
            serializer.result.nodes.insert(
                function_node_id(name, offset),
                egraph_serialize::Node {
                    op: name.to_string(),
                    eclass: class_id,
                    cost: node_cost(function.decl.cost.unwrap_or(1) as f64),
                    children,
                    subsumed: output.subsumed,
                },
            );
        }

        serializer.result.root_eclasses = config
            .root_eclasses
            .iter()
            .map(|(sort, v)| self.value_to_class_id(sort, v))
            .collect();
        serializer.result
    }

    /// The serialized e-class of a value: its sort and canonical bits.
    pub fn value_to_class_id(&self, sort: &ArcSort, value: &Value) -> egraph_serialize::ClassId {
        let mut value = *value;
        sort.canonicalize(&mut value, &self.unionfind);
        format!("{}-{}", sort.name(), value.bits).into()
    }

    /// Add the node for a value if it is a primitive, and return the node
    /// an edge to it should point at.
    fn serialize_value(
        &self,
        serializer: &mut Serializer,
        sort: &ArcSort,
        value: &Value,
    ) -> egraph_serialize::NodeId {
        let class_id = self.value_to_class_id(sort, value);
        let node_id = if sort.is_eq_sort() {
            let node_ids = serializer
                .node_ids
                .entry(class_id.clone())
                .or_insert_with(|| {
                    let node_id: egraph_serialize::NodeId = format!("dummy-{class_id}").into();
                    serializer.result.nodes.insert(
                        node_id.clone(),
                        egraph_serialize::Node {
                            op: "[...]".to_string(),
                            eclass: class_id.clone(),
                            cost: node_cost(f64::INFINITY),
                            children: vec![],
                            subsumed: false,
                        },
                    );
                    VecDeque::from(vec![node_id])
                });
            node_ids.rotate_left(1);
            match node_ids.front() {
                Some(id) => id.clone(),
                None => format!("dummy-{class_id}").into(),
            }
        } else {
            let node_id: egraph_serialize::NodeId = format!("primitive-{class_id}").into();
            if !serializer.result.nodes.contains_key(&node_id) {
                let children = sort
                    .inner_values(value)
                    .into_iter()
                    .map(|(s, v)| self.serialize_value(serializer, &s, &v))
                    .collect();
                let op = if sort.is_container_sort() {
                    sort.name().to_string()
                } else {
                    sort.extract_term(self, *value, &serializer.extractor, &mut serializer.termdag)
                        .map(|term| serializer.termdag.to_string(term))
                        .unwrap_or_else(|| format!("{value:?}"))
                };
                serializer.result.nodes.insert(
                    node_id.clone(),
                    egraph_serialize::Node {
                        op,
                        eclass: class_id.clone(),
                        cost: node_cost(1.0),
                        children,
                        subsumed: false,
                    },
                );
            }
            node_id
        };
        serializer.result.class_data.insert(
            class_id,
            egraph_serialize::ClassData {
                typ: Some(sort.name().to_string()),
            },
        );
        node_id
    }
}

fn function_node_id(name: Symbol, offset: usize) -> egraph_serialize::NodeId {
    format!("function-{offset}-{name}").into()
}

#[cfg(test)]
mod tests {
    use crate::{ast::*, expr, EGraph, SerializeConfig};

    #[test]
    fn snapshot_groups_rows_by_class() {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut egraph = EGraph::default();
        egraph
            .run_program(vec![
                Command::Datatype {
                    name: "Math".into(),
                    variants: vec![Variant::new("Num", ["i64"]), Variant::new("Neg", ["Math"])],
                },
                Command::Action(Action::Union(expr!(Neg (Neg (Num 1))), expr!(Num 1))),
            ])
            .unwrap();
        egraph.rebuild().unwrap();

        let serialized = egraph.serialize(SerializeConfig::default());
        // three rows plus the literal 1
        assert_eq!(serialized.nodes.len(), 4);
        let classes: std::collections::HashSet<_> =
            serialized.nodes.values().map(|n| n.eclass.clone()).collect();
        // {Num 1, Neg (Neg ..)}, {Neg (Num 1)} and {1}
        assert_eq!(classes.len(), 3);
    }

    #[test]
    fn truncated_classes_get_a_placeholder() {
        let mut egraph = EGraph::default();
        egraph
            .run_program(vec![
                Command::Datatype {
                    name: "Math".into(),
                    variants: vec![Variant::new("Neg", ["Math"]), Variant::new("Num", ["i64"])],
                },
                Command::Action(Action::Expr(expr!(Neg (Num 1)))),
            ])
            .unwrap();

        let config = SerializeConfig {
            max_functions: Some(1),
            ..Default::default()
        };
        // only `Neg` is kept, so the class of (Num 1) has no nodes
        let serialized = egraph.serialize(config);
        assert!(serialized.nodes.values().any(|n| n.op == "[...]"));
    }
}
