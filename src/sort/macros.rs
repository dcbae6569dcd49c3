/// Register a primitive whose argument and result types are Rust types with
/// a [`FromSort`](crate::sort::FromSort)/[`IntoSort`](crate::sort::IntoSort)
/// mapping to a unique registered sort.
///
/// ```text
/// add_primitives!(info, "+" = |a: i64, b: i64| -> Option<i64> { a.checked_add(b) });
/// ```
///
/// A result of `Option<T>` is a partial primitive: `None` fails the match in
/// a query and is an error in an action.
#[macro_export]
macro_rules! add_primitives {
    ($type_info:expr,
        $name:literal = |$($param:ident : $param_t:ty),*| -> $ret:ty { $body:expr }
    ) => {{
        let type_info: &mut $crate::TypeInfo = $type_info;
        #[allow(unused_imports, non_snake_case)]
        {
            use std::sync::Arc;
            use $crate::{*, sort::*, constraint::*};

            struct MyPrim {$(
                $param: Arc<<$param_t as FromSort>::Sort>,
            )*
                __out: Arc<<$ret as IntoSort>::Sort>,
            }

            impl $crate::PrimitiveLike for MyPrim {
                fn name(&self) -> $crate::Symbol {
                    $name.into()
                }

                fn get_type_constraints(&self) -> Box<dyn TypeConstraint> {
                    let sorts: Vec<ArcSort> = vec![$(self.$param.clone(),)* self.__out.clone()];
                    SimpleTypeConstraint::new(self.name(), sorts).into_box()
                }

                fn apply(&self, values: &[Value], _egraph: Option<&mut EGraph>) -> Option<Value> {
                    if let [$($param),*] = values {
                        $(let $param: $param_t = <$param_t as FromSort>::load(&self.$param, $param);)*
                        let result: $ret = $body;
                        result.store(&self.__out)
                    } else {
                        panic!("{} applied to {} arguments", $name, values.len())
                    }
                }
            }

            type_info.add_primitive($crate::Primitive::from(MyPrim {
                $( $param: type_info.get_sort_nofail::<<$param_t as FromSort>::Sort>(), )*
                __out: type_info.get_sort_nofail::<<$ret as IntoSort>::Sort>(),
            }))
        }
    }};
}
