//! A small stack machine for the actions of rule heads, top-level actions,
//! merge expressions and function defaults.
//!
//! Core actions are already flat, so compilation is a single pass: every
//! `let` pushes exactly one value, which makes a local's index in the set of
//! locals its position on the stack.
use crate::core::{AtomTerm, CoreAction, ResolvedCall, SpecializedPrimitive};
use crate::util::{IndexMap, IndexSet, ListDebug};
use crate::*;

struct ActionCompiler<'a> {
    subst: &'a IndexSet<Symbol>,
    types: &'a IndexMap<Symbol, ArcSort>,
    locals: IndexSet<Symbol>,
    instructions: Vec<Instruction>,
}

impl<'a> ActionCompiler<'a> {
    fn compile_action(&mut self, action: &CoreAction<ResolvedCall>) {
        match action {
            CoreAction::Let(v, f, args) => {
                self.do_call(f, args);
                self.locals.insert(*v);
            }
            CoreAction::LetAtomTerm(v, at) => {
                self.do_atom_term(at);
                self.locals.insert(*v);
            }
            CoreAction::Set(f, args, e) => {
                let ResolvedCall::Func(func) = f else {
                    panic!("typechecking let a primitive through to `set`")
                };
                for arg in args {
                    self.do_atom_term(arg);
                }
                self.do_atom_term(e);
                self.instructions
                    .push(Instruction::Set(func.name, func.input.len()));
            }
            CoreAction::Change(change, f, args) => {
                let ResolvedCall::Func(func) = f else {
                    panic!("typechecking let a primitive through to `{change}`")
                };
                for arg in args {
                    self.do_atom_term(arg);
                }
                self.instructions
                    .push(Instruction::Change(*change, func.name, func.input.len()));
            }
            CoreAction::Union(arg1, arg2) => {
                let sort = self.sort_of(arg1);
                self.do_atom_term(arg1);
                self.do_atom_term(arg2);
                self.instructions.push(Instruction::Union(sort));
            }
            CoreAction::Panic(msg) => {
                self.instructions.push(Instruction::Panic(msg.clone()));
            }
        }
    }

    fn do_call(&mut self, f: &ResolvedCall, args: &[AtomTerm]) {
        for arg in args {
            self.do_atom_term(arg);
        }
        match f {
            ResolvedCall::Func(f) => self
                .instructions
                .push(Instruction::CallFunction(f.name, f.input.len())),
            ResolvedCall::Primitive(p) => self
                .instructions
                .push(Instruction::CallPrimitive(p.clone(), p.input.len())),
        }
    }

    fn do_atom_term(&mut self, at: &AtomTerm) {
        match at {
            AtomTerm::Var(var) => {
                if let Some(i) = self.locals.get_index_of(var) {
                    self.instructions.push(Instruction::Load(Load::Stack(i)));
                } else if let Some(i) = self.subst.get_index_of(var) {
                    self.instructions.push(Instruction::Load(Load::Subst(i)));
                } else {
                    panic!("variable {var} survived typechecking unbound")
                }
            }
            AtomTerm::Literal(lit) => {
                self.instructions.push(Instruction::Literal(lit.clone()));
            }
        }
    }

    fn sort_of(&self, at: &AtomTerm) -> Symbol {
        match at {
            AtomTerm::Var(v) => self
                .types
                .get(v)
                .map(|sort| sort.name())
                .unwrap_or_else(|| panic!("no sort for variable {v}")),
            AtomTerm::Literal(lit) => lit.to_value().tag,
        }
    }
}

#[derive(Clone, Debug)]
enum Load {
    Stack(usize),
    Subst(usize),
}

/// The instruction set for the action VM.
#[derive(Clone, Debug)]
enum Instruction {
    /// Push a literal onto the stack.
    Literal(Literal),
    /// Push a value from the stack or the substitution onto the stack.
    Load(Load),
    /// Pop function arguments off the stack, look the function up (or fill
    /// in a missing row) and push the result.
    CallFunction(Symbol, usize),
    /// Pop primitive arguments off the stack, call the primitive and push the
    /// result.
    CallPrimitive(SpecializedPrimitive, usize),
    /// Pop function arguments off the stack and either delete or subsume the
    /// corresponding row.
    Change(Change, Symbol, usize),
    /// Pop the new output and the function arguments off the stack and merge
    /// the output into the row.
    Set(Symbol, usize),
    /// Union the two values on top of the stack, which are of the given sort.
    Union(Symbol),
    Panic(String),
}

#[derive(Clone, Debug)]
pub struct Program(Vec<Instruction>);

impl Program {
    /// Compile actions to run against a substitution whose variables are
    /// `subst`, in order. `types` must give the sort of every variable.
    pub(crate) fn compile(
        subst: &IndexSet<Symbol>,
        types: &IndexMap<Symbol, ArcSort>,
        actions: &[CoreAction<ResolvedCall>],
    ) -> Program {
        let mut compiler = ActionCompiler {
            subst,
            types,
            locals: IndexSet::default(),
            instructions: Vec::new(),
        };
        for a in actions {
            compiler.compile_action(a);
        }
        Program(compiler.instructions)
    }

    /// Like [`Program::compile`], but leaves the value of `target` on top of
    /// the stack. An expression like `2` lowers to no actions at all, so the
    /// output has to be loaded explicitly.
    pub(crate) fn compile_expr(
        subst: &IndexSet<Symbol>,
        types: &IndexMap<Symbol, ArcSort>,
        actions: &[CoreAction<ResolvedCall>],
        target: &AtomTerm,
    ) -> Program {
        let mut compiler = ActionCompiler {
            subst,
            types,
            locals: IndexSet::default(),
            instructions: Vec::new(),
        };
        for a in actions {
            compiler.compile_action(a);
        }
        compiler.do_atom_term(target);
        Program(compiler.instructions)
    }
}

impl EGraph {
    fn canonicalize_inputs(&self, name: Symbol, args: &[Value]) -> Result<ValueVec, Error> {
        let function = self
            .functions
            .get(&name)
            .ok_or(TypeError::UnboundFunction(name))?;
        debug_assert_eq!(args.len(), function.schema.input.len());
        Ok(args
            .iter()
            .zip(&function.schema.input)
            .map(|(value, sort)| {
                let mut value = *value;
                sort.canonicalize(&mut value, &self.unionfind);
                value
            })
            .collect())
    }

    /// Call a function the way an action does: the output of the row for
    /// `args` if there is one. Otherwise a row is added when the output can
    /// be made up: a fresh e-class for eq sorts, `()` for relations, or the
    /// function's default. Anything else is [`Error::NotFoundError`].
    pub fn call_function(&mut self, name: Symbol, args: &[Value]) -> Result<Value, Error> {
        let args = self.canonicalize_inputs(name, args)?;
        let function = &self.functions[&name];
        if let Some(out) = function.nodes.get(&args) {
            return Ok(out.value);
        }

        let output = function.schema.output.clone();
        let value = if output.is_eq_sort() {
            Value::from_id(output.name(), self.unionfind.make_set())
        } else if output.name() == Value::unit().tag {
            Value::unit()
        } else if let Some(default) = function.default.clone() {
            let mut stack = vec![];
            self.run_actions(&mut stack, &[], &default)?;
            stack
                .pop()
                .ok_or_else(|| NotFoundError(format!("default of {name} produced no value")))?
        } else {
            return Err(NotFoundError(format!("No value found for ({name} {})", ListDebug(&args, " "))).into());
        };

        let ts = self.timestamp;
        self.functions
            .get_mut(&name)
            .ok_or(TypeError::UnboundFunction(name))?
            .insert(&args, value, ts);
        Ok(value)
    }

    /// Merge `new_value` into the row of `name` at `args`, following the
    /// function's merge policy.
    pub(crate) fn perform_set(
        &mut self,
        name: Symbol,
        args: &[Value],
        new_value: Value,
    ) -> Result<(), Error> {
        let args = self.canonicalize_inputs(name, args)?;
        let function = &self.functions[&name];
        let mut new_value = new_value;
        function
            .schema
            .output
            .canonicalize(&mut new_value, &self.unionfind);

        let merged = match function.nodes.get(&args) {
            None => new_value,
            Some(old) if old.value == new_value => return Ok(()),
            Some(old) => {
                let old_value = old.value;
                match function.merge.clone() {
                    MergeFn::AssertEq => {
                        return Err(Error::MergeError(name, old_value, new_value));
                    }
                    MergeFn::Union => {
                        let sort = function.schema.output.name();
                        self.unionfind.union_values(old_value, new_value, sort)
                    }
                    MergeFn::Expr(merge_prog) => {
                        let mut stack = vec![];
                        self.run_actions(&mut stack, &[old_value, new_value], &merge_prog)?;
                        stack.pop().unwrap_or(old_value)
                    }
                }
            }
        };

        let ts = self.timestamp;
        if let Some(function) = self.functions.get_mut(&name) {
            function.insert(&args, merged, ts);
        }
        Ok(())
    }

    pub(crate) fn perform_change(
        &mut self,
        change: Change,
        name: Symbol,
        args: &[Value],
    ) -> Result<(), Error> {
        match change {
            Change::Delete => {
                let args = self.canonicalize_inputs(name, args)?;
                let ts = self.timestamp;
                if let Some(function) = self.functions.get_mut(&name) {
                    function.remove(&args, ts);
                }
            }
            Change::Subsume => {
                if matches!(self.functions[&name].merge, MergeFn::Expr(_)) {
                    return Err(Error::SubsumeMergeError(name));
                }
                // subsuming a term that is not there yet adds it first
                self.call_function(name, args)?;
                let args = self.canonicalize_inputs(name, args)?;
                let ts = self.timestamp;
                if let Some(function) = self.functions.get_mut(&name) {
                    function.subsume(&args, ts);
                }
            }
        }
        Ok(())
    }

    /// Run `program` with the variables of its substitution bound to `subst`.
    /// Values the program leaves behind stay on `stack`.
    pub(crate) fn run_actions(
        &mut self,
        stack: &mut Vec<Value>,
        subst: &[Value],
        program: &Program,
    ) -> Result<(), Error> {
        for instr in &program.0 {
            match instr {
                Instruction::Load(load) => match load {
                    Load::Stack(idx) => stack.push(stack[*idx]),
                    Load::Subst(idx) => stack.push(subst[*idx]),
                },
                Instruction::Literal(lit) => stack.push(lit.to_value()),
                Instruction::CallFunction(f, arity) => {
                    let new_len = stack.len() - arity;
                    let value = self.call_function(*f, &stack[new_len..])?;
                    stack.truncate(new_len);
                    stack.push(value);
                }
                Instruction::CallPrimitive(p, arity) => {
                    let new_len = stack.len() - arity;
                    let values = &stack[new_len..];
                    if let Some(value) = p.primitive.apply(values, Some(self)) {
                        stack.truncate(new_len);
                        stack.push(value);
                    } else {
                        return Err(Error::PrimitiveError(p.primitive.clone(), values.to_vec()));
                    }
                }
                Instruction::Set(f, arity) => {
                    let new_value = stack.pop().unwrap_or_else(|| panic!("set {f} on an empty stack"));
                    let new_len = stack.len() - arity;
                    self.perform_set(*f, &stack[new_len..], new_value)?;
                    stack.truncate(new_len);
                }
                Instruction::Change(change, f, arity) => {
                    let new_len = stack.len() - arity;
                    self.perform_change(*change, *f, &stack[new_len..])?;
                    stack.truncate(new_len);
                }
                Instruction::Union(sort) => {
                    let new_len = stack.len() - 2;
                    let (a, b) = (stack[new_len], stack[new_len + 1]);
                    self.unionfind.union_values(a, b, *sort);
                    stack.truncate(new_len);
                }
                Instruction::Panic(msg) => return Err(Error::Panic(msg.clone())),
            }
        }
        Ok(())
    }
}
