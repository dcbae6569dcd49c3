use std::fmt::{self, Display};

use ordered_float::OrderedFloat;

use crate::*;

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone)]
pub enum Literal {
    Int(i64),
    F64(OrderedFloat<f64>),
    String(Symbol),
    Bool(bool),
    Unit,
}

macro_rules! impl_from {
    ($ctor:ident($t:ty)) => {
        impl From<Literal> for $t {
            fn from(literal: Literal) -> Self {
                match literal {
                    Literal::$ctor(t) => t,
                    #[allow(unreachable_patterns)]
                    _ => panic!("Expected {}, got {literal}", stringify!($ctor)),
                }
            }
        }

        impl From<$t> for Literal {
            fn from(t: $t) -> Self {
                Literal::$ctor(t)
            }
        }
    };
}

impl_from!(Int(i64));
impl_from!(F64(OrderedFloat<f64>));
impl_from!(String(Symbol));
impl_from!(Bool(bool));

impl From<i32> for Literal {
    fn from(i: i32) -> Self {
        Literal::Int(i.into())
    }
}

impl From<f64> for Literal {
    fn from(f: f64) -> Self {
        Literal::F64(OrderedFloat(f))
    }
}

impl From<&str> for Literal {
    fn from(s: &str) -> Self {
        Literal::String(s.into())
    }
}

impl From<()> for Literal {
    fn from((): ()) -> Self {
        Literal::Unit
    }
}

impl Literal {
    pub fn to_value(&self) -> Value {
        match self {
            Literal::Int(i) => Value::from(*i),
            Literal::F64(f) => Value::from(*f),
            Literal::String(s) => Value::from(*s),
            Literal::Bool(b) => Value::from(*b),
            Literal::Unit => Value::unit(),
        }
    }
}

impl Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Int(i) => Display::fmt(i, f),
            Literal::F64(n) => {
                // keep a decimal point so floats never print like integers
                if n.is_finite() && n.fract() == 0.0 {
                    write!(f, "{:.1}", n.into_inner())
                } else {
                    write!(f, "{}", n.into_inner())
                }
            }
            Literal::String(s) => write!(f, "\"{}\"", s),
            Literal::Bool(b) => Display::fmt(b, f),
            Literal::Unit => write!(f, "()"),
        }
    }
}

/// A surface expression: a literal, a variable, or a call of a function or
/// primitive on argument expressions.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone)]
pub enum Expr {
    Lit(Literal),
    Var(Symbol),
    Call(Symbol, Vec<Expr>),
}

impl Expr {
    pub fn call(op: impl Into<Symbol>, children: impl IntoIterator<Item = Self>) -> Self {
        Self::Call(op.into(), children.into_iter().collect())
    }

    pub fn lit(lit: impl Into<Literal>) -> Self {
        Self::Lit(lit.into())
    }

    pub fn var(name: impl Into<Symbol>) -> Self {
        Self::Var(name.into())
    }

    pub fn int(i: i64) -> Self {
        Self::Lit(Literal::Int(i))
    }

    pub fn get_var(&self) -> Option<Symbol> {
        match self {
            Expr::Var(v) => Some(*v),
            _ => None,
        }
    }

    fn children(&self) -> &[Self] {
        match self {
            Expr::Var(_) | Expr::Lit(_) => &[],
            Expr::Call(_, children) => children,
        }
    }

    pub fn walk(&self, pre: &mut impl FnMut(&Self), post: &mut impl FnMut(&Self)) {
        pre(self);
        self.children()
            .iter()
            .for_each(|child| child.walk(pre, post));
        post(self);
    }

    /// All variables mentioned in the expression, with repeats.
    pub fn vars(&self) -> Vec<Symbol> {
        let mut vars = vec![];
        self.walk(
            &mut |e| {
                if let Expr::Var(v) = e {
                    vars.push(*v)
                }
            },
            &mut |_| {},
        );
        vars
    }
}

impl Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Lit(val) => Display::fmt(val, f),
            Expr::Var(var) => Display::fmt(var, f),
            Expr::Call(op, args) => {
                write!(f, "({}", op)?;
                for arg in args {
                    write!(f, " {}", arg)?;
                }
                write!(f, ")")
            }
        }
    }
}

/// Builds an [`Expr`] from s-expression-like tokens.
///
/// ```
/// use eqsat::{ast::Expr, expr};
/// let e = expr!(Add x (Num 1));
/// assert_eq!(e.to_string(), "(Add x (Num 1))");
/// assert_eq!(expr!((Nil)), Expr::call("Nil", []));
/// ```
#[macro_export]
macro_rules! expr {
    (( $f:ident )) => { $crate::ast::Expr::call(stringify!($f), []) };
    (( $($inner:tt)* )) => { $crate::expr!($($inner)*) };
    ($sym:ident) => { $crate::ast::Expr::var(stringify!($sym)) };
    ($f:ident $($arg:tt)+) => { $crate::ast::Expr::call(stringify!($f), [$($crate::expr!($arg)),+]) };
    ($e:literal) => { $crate::ast::Expr::lit($e) };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_round_trips_through_macro() {
        let e = expr!(Add (Mul x 2) (Neg y));
        assert_eq!(e.to_string(), "(Add (Mul x 2) (Neg y))");
        assert_eq!(e.vars(), vec![Symbol::from("x"), Symbol::from("y")]);
    }

    #[test]
    fn literals_print_like_source() {
        assert_eq!(Literal::from(1.0).to_string(), "1.0");
        assert_eq!(Literal::from(2.5).to_string(), "2.5");
        assert_eq!(Literal::from("hi").to_string(), "\"hi\"");
        assert_eq!(Literal::Unit.to_string(), "()");
        assert_eq!(expr!("s"), Expr::Lit(Literal::String("s".into())));
    }
}
