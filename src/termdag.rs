use crate::{
    ast::{Expr, Literal},
    util::{HashMap, IndexSet},
    Symbol,
};

pub type TermId = usize;

/// A node of a [`TermDag`]. Children of an application are ids of nodes
/// already in the same dag.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum Term {
    Lit(Literal),
    Var(Symbol),
    App(Symbol, Vec<TermId>),
}

/// A hashconsed store of terms: structurally equal terms share one id, so
/// extracted terms with repeated subterms stay small.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct TermDag {
    nodes: IndexSet<Term>,
}

impl TermDag {
    pub fn size(&self) -> usize {
        self.nodes.len()
    }

    /// The id of a term whose children are already in the dag.
    ///
    /// Panics if the term is not in the dag.
    pub fn lookup(&self, node: &Term) -> TermId {
        self.nodes
            .get_index_of(node)
            .unwrap_or_else(|| panic!("term {node:?} is not in the dag"))
    }

    pub fn get(&self, id: TermId) -> &Term {
        &self.nodes[id]
    }

    fn add(&mut self, node: Term) -> TermId {
        self.nodes.insert_full(node).0
    }

    pub fn app(&mut self, sym: Symbol, children: Vec<TermId>) -> TermId {
        self.add(Term::App(sym, children))
    }

    pub fn lit(&mut self, lit: Literal) -> TermId {
        self.add(Term::Lit(lit))
    }

    pub fn var(&mut self, sym: Symbol) -> TermId {
        self.add(Term::Var(sym))
    }

    pub fn expr_to_term(&mut self, expr: &Expr) -> TermId {
        match expr {
            Expr::Lit(lit) => self.lit(lit.clone()),
            Expr::Var(v) => self.var(*v),
            Expr::Call(op, args) => {
                let args = args.iter().map(|a| self.expr_to_term(a)).collect();
                self.app(*op, args)
            }
        }
    }

    pub fn term_to_expr(&self, id: TermId) -> Expr {
        match self.get(id) {
            Term::Lit(lit) => Expr::Lit(lit.clone()),
            Term::Var(v) => Expr::Var(*v),
            Term::App(op, args) => {
                Expr::Call(*op, args.iter().map(|a| self.term_to_expr(*a)).collect())
            }
        }
    }

    /// The number of nodes of the term as a tree, counting shared subterms once
    /// per occurrence.
    pub fn tree_size(&self, id: TermId) -> usize {
        let mut sizes = HashMap::<TermId, usize>::default();
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            if sizes.contains_key(&next) {
                continue;
            }
            match self.get(next) {
                Term::App(_, children) => {
                    let pending: Vec<TermId> = children
                        .iter()
                        .copied()
                        .filter(|c| !sizes.contains_key(c))
                        .collect();
                    if pending.is_empty() {
                        let size = 1 + children.iter().map(|c| sizes[c]).sum::<usize>();
                        sizes.insert(next, size);
                    } else {
                        stack.push(next);
                        stack.extend(pending);
                    }
                }
                Term::Lit(_) | Term::Var(_) => {
                    sizes.insert(next, 1);
                }
            }
        }
        sizes[&id]
    }

    pub fn to_string(&self, id: TermId) -> String {
        let mut stored = HashMap::<TermId, String>::default();
        // use a stack to avoid stack overflow on deep terms
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            if stored.contains_key(&next) {
                continue;
            }
            match self.get(next) {
                Term::App(name, children) => {
                    if children.iter().all(|c| stored.contains_key(c)) {
                        let mut str = format!("({}", name);
                        for c in children.iter() {
                            str.push(' ');
                            str.push_str(&stored[c]);
                        }
                        str.push(')');
                        stored.insert(next, str);
                    } else {
                        stack.push(next);
                        for c in children.iter().rev() {
                            stack.push(*c);
                        }
                    }
                }
                Term::Lit(lit) => {
                    stored.insert(next, format!("{}", lit));
                }
                Term::Var(v) => {
                    stored.insert(next, format!("{}", v));
                }
            }
        }

        stored.remove(&id).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr;

    #[test]
    fn shared_subterms_are_stored_once() {
        let mut td = TermDag::default();
        let e = expr!(Add (Num 1) (Num 1));
        let t = td.expr_to_term(&e);
        // 1, (Num 1), (Add ...)
        assert_eq!(td.size(), 3);
        assert_eq!(td.tree_size(t), 5);
        assert_eq!(td.to_string(t), "(Add (Num 1) (Num 1))");
        assert_eq!(td.term_to_expr(t), e);
    }

    #[test]
    fn nullary_applications_print_with_parens() {
        let mut td = TermDag::default();
        let nil = td.app("Nil".into(), vec![]);
        let x = td.var("x".into());
        let cons = td.app("Cons".into(), vec![x, nil]);
        assert_eq!(td.to_string(cons), "(Cons x (Nil))");
        assert_eq!(td.lookup(&Term::App("Nil".into(), vec![])), nil);
    }
}
