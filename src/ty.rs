use std::collections::{HashMap, HashSet};
use std::fmt;

/// A resolved Hygge type. Type variables refer to the most recent alias
/// binding in the enclosing typing environment; `expand_type` chases them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Bool,
    Int,
    Float,
    String,
    Unit,
    Var(String),
    Fn(Vec<Type>, Box<Type>),
    Struct(Vec<StructField>),
    Union(Vec<UnionCase>),
    Array(Box<Type>),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StructField {
    pub mutable: bool,
    pub id: String,
    pub ty: Type,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UnionCase {
    pub label: String,
    pub ty: Type,
}

impl Type {
    pub fn is_primitive_name(name: &str) -> bool {
        match name {
            "bool" | "int" | "float" | "string" | "unit" => true,
            _ => false,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Type::Bool => write!(f, "bool"),
            Type::Int => write!(f, "int"),
            Type::Float => write!(f, "float"),
            Type::String => write!(f, "string"),
            Type::Unit => write!(f, "unit"),
            Type::Var(name) => write!(f, "{}", name),
            Type::Fn(args, ret) => {
                write!(f, "(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ") -> {}", ret)
            }
            Type::Struct(fields) => {
                write!(f, "struct {{")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ";")?;
                    }
                    if field.mutable {
                        write!(f, " {}: {}", field.id, field.ty)?;
                    } else {
                        write!(f, " immutable {}: {}", field.id, field.ty)?;
                    }
                }
                write!(f, " }}")
            }
            Type::Union(cases) => {
                write!(f, "union {{")?;
                for (i, case) in cases.iter().enumerate() {
                    if i > 0 {
                        write!(f, ";")?;
                    }
                    write!(f, " {}: {}", case.label, case.ty)?;
                }
                write!(f, " }}")
            }
            Type::Array(elem) => write!(f, "array {{ {} }}", elem),
        }
    }
}

/// The three mappings carried by every typed node: variable types, alias
/// definitions, and the set of names currently declared mutable. Extended
/// functionally at every binding so snapshots stay valid.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TypingEnv {
    pub vars: HashMap<String, Type>,
    pub type_aliases: HashMap<String, Type>,
    pub mutables: HashSet<String>,
}

impl TypingEnv {
    /// Bind an immutable variable; shadowing removes any previous
    /// mutability of the same name.
    pub fn bind_var(&self, name: &str, ty: Type) -> TypingEnv {
        let mut env = self.clone();
        env.vars.insert(name.to_owned(), ty);
        env.mutables.remove(name);
        env
    }

    pub fn bind_mutable_var(&self, name: &str, ty: Type) -> TypingEnv {
        let mut env = self.clone();
        env.vars.insert(name.to_owned(), ty);
        env.mutables.insert(name.to_owned());
        env
    }

    pub fn bind_alias(&self, name: &str, ty: Type) -> TypingEnv {
        let mut env = self.clone();
        env.type_aliases.insert(name.to_owned(), ty);
        env
    }

    pub fn is_mutable(&self, name: &str) -> bool {
        self.mutables.contains(name)
    }
}

/// Resolve a type through alias bindings until a non-variable type is
/// reached. `None` if the chain runs into an unbound alias.
pub fn expand_type(env: &TypingEnv, ty: &Type) -> Option<Type> {
    let mut ty = ty.clone();
    loop {
        match ty {
            Type::Var(ref name) => match env.type_aliases.get(name) {
                Some(def) => ty = def.clone(),
                None => return None,
            },
            _ => return Some(ty),
        }
    }
}

/// The set of type-variable names appearing anywhere in a type.
pub fn free_type_vars(ty: &Type) -> HashSet<String> {
    let mut vars = HashSet::new();
    collect_type_vars(ty, &mut vars);
    vars
}

fn collect_type_vars(ty: &Type, vars: &mut HashSet<String>) {
    match ty {
        Type::Bool | Type::Int | Type::Float | Type::String | Type::Unit => (),
        Type::Var(name) => {
            vars.insert(name.clone());
        }
        Type::Fn(args, ret) => {
            for arg in args {
                collect_type_vars(arg, vars);
            }
            collect_type_vars(ret, vars);
        }
        Type::Struct(fields) => {
            for field in fields {
                collect_type_vars(&field.ty, vars);
            }
        }
        Type::Union(cases) => {
            for case in cases {
                collect_type_vars(&case.ty, vars);
            }
        }
        Type::Array(elem) => collect_type_vars(elem, vars),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::hashset;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_expand_alias_chain() {
        let env = TypingEnv::default()
            .bind_alias("A", Type::Int)
            .bind_alias("B", Type::Var("A".to_owned()));
        assert_eq!(expand_type(&env, &Type::Var("B".to_owned())), Some(Type::Int));
        assert_eq!(expand_type(&env, &Type::Float), Some(Type::Float));
        assert_eq!(expand_type(&env, &Type::Var("C".to_owned())), None);
    }

    #[test]
    fn test_expand_stops_at_constructor() {
        let list = Type::Union(vec![
            UnionCase {
                label: "End".to_owned(),
                ty: Type::Int,
            },
            UnionCase {
                label: "Next".to_owned(),
                ty: Type::Var("L".to_owned()),
            },
        ]);
        let env = TypingEnv::default().bind_alias("L", list.clone());
        assert_eq!(expand_type(&env, &Type::Var("L".to_owned())), Some(list));
    }

    #[test]
    fn test_free_type_vars() {
        let ty = Type::Struct(vec![
            StructField {
                mutable: true,
                id: "head".to_owned(),
                ty: Type::Int,
            },
            StructField {
                mutable: false,
                id: "tail".to_owned(),
                ty: Type::Array(Box::new(Type::Var("T".to_owned()))),
            },
        ]);
        assert_eq!(free_type_vars(&ty), hashset! { "T".to_owned() });
        assert_eq!(free_type_vars(&Type::Int), hashset! {});
    }

    #[test]
    fn test_display() {
        let ty = Type::Fn(
            vec![Type::Int, Type::Var("L".to_owned())],
            Box::new(Type::Bool),
        );
        assert_eq!(ty.to_string(), "(int, L) -> bool");
        let ty = Type::Struct(vec![
            StructField {
                mutable: false,
                id: "a".to_owned(),
                ty: Type::Int,
            },
            StructField {
                mutable: true,
                id: "b".to_owned(),
                ty: Type::Float,
            },
        ]);
        assert_eq!(ty.to_string(), "struct { immutable a: int; b: float }");
    }

    #[test]
    fn test_shadowing_removes_mutability() {
        let env = TypingEnv::default().bind_mutable_var("x", Type::Int);
        assert!(env.is_mutable("x"));
        let env = env.bind_var("x", Type::Bool);
        assert!(!env.is_mutable("x"));
        assert_eq!(env.vars["x"], Type::Bool);
    }
}
