use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Primitive {
    Void,
    Bool,

    // integer
    Char,
    Short,
    Int,
    Long,

    // floating point
    Half,
    Float,
    Double,
    Quad,
}

impl Primitive {
    pub fn is_integer(self) -> bool {
        matches!(
            self,
            Primitive::Bool | Primitive::Char | Primitive::Short | Primitive::Int | Primitive::Long
        )
    }
}

/// A resolved source type. Shared freely: the same primitive or class type is
/// referenced from many declarations, so compound types hold `Rc` targets.
#[derive(Debug, Clone, PartialEq)]
pub enum Type {
    Primitive { kind: Primitive, signed: bool },
    Pointer(Rc<Type>),
    Array { element: Rc<Type>, len: u32 },
    Class(Rc<ClassDecl>),
}

impl Type {
    pub fn primitive(kind: Primitive, signed: bool) -> Self {
        Type::Primitive { kind, signed }
    }

    /// Signedness only applies to integer primitives; compound types delegate
    /// to their target so that it survives pointer and array wrapping.
    pub fn is_signed(&self) -> bool {
        match self {
            Type::Primitive { signed, .. } => *signed,
            Type::Pointer(target) => target.is_signed(),
            Type::Array { element, .. } => element.is_signed(),
            Type::Class(_) => false,
        }
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, Type::Primitive { kind, .. } if kind.is_integer())
    }

    pub fn as_pointer(&self) -> Option<&Rc<Type>> {
        match self {
            Type::Pointer(target) => Some(target),
            _ => None,
        }
    }

    pub fn as_class(&self) -> Option<&Rc<ClassDecl>> {
        match self {
            Type::Class(decl) => Some(decl),
            _ => None,
        }
    }
}

/// A user-defined record type. Member insertion order is the struct layout
/// order, so the map must never be reordered; split `class` declarations
/// append through `add_members`.
pub struct ClassDecl {
    name: String,
    members: RefCell<IndexMap<String, Type>>,
}

impl ClassDecl {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            members: RefCell::new(IndexMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn member_type(&self, name: &str) -> Option<Type> {
        self.members.borrow().get(name).cloned()
    }

    pub fn member_index(&self, name: &str) -> Option<usize> {
        self.members.borrow().get_index_of(name)
    }

    pub fn members(&self) -> Vec<(String, Type)> {
        self.members
            .borrow()
            .iter()
            .map(|(name, ty)| (name.clone(), ty.clone()))
            .collect()
    }

    pub fn member_count(&self) -> usize {
        self.members.borrow().len()
    }

    pub fn add_members(&self, new_members: IndexMap<String, Type>) {
        let mut members = self.members.borrow_mut();
        for (name, ty) in new_members {
            members.insert(name, ty);
        }
    }
}

// Members can point back at the declaring class; printing only the name keeps
// Debug from chasing that cycle.
impl fmt::Debug for ClassDecl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClassDecl({})", self.name)
    }
}

// Class names are unique in the type registry.
impl PartialEq for ClassDecl {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Less,
    More,
    Equal,
}

/// Typed expression tree. Each node records the signedness of the value it
/// produces; the parser checks that binary operands agree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Variable {
        name: String,
        signed: bool,
    },
    StructAccess {
        target: Box<Expr>,
        member: String,
        class: Rc<ClassDecl>,
        signed: bool,
    },
    ArrayAccess {
        target: Box<Expr>,
        index: Box<Expr>,
        array: Type,
        signed: bool,
    },
    PointerIndex {
        target: Box<Expr>,
        index: Box<Expr>,
        pointer: Type,
        signed: bool,
    },
    Deref {
        target: Box<Expr>,
        pointee: Type,
        signed: bool,
    },
    AddressOf {
        target: Box<Expr>,
        signed: bool,
    },
    IntLiteral(i32),
    FloatLiteral(f32),
    StringLiteral(String),
    Call {
        name: String,
        args: Vec<Expr>,
        signed: bool,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
        signed: bool,
    },
}

impl Expr {
    pub fn is_signed(&self) -> bool {
        match self {
            Expr::Variable { signed, .. }
            | Expr::StructAccess { signed, .. }
            | Expr::ArrayAccess { signed, .. }
            | Expr::PointerIndex { signed, .. }
            | Expr::Deref { signed, .. }
            | Expr::AddressOf { signed, .. }
            | Expr::Call { signed, .. }
            | Expr::Binary { signed, .. } => *signed,
            Expr::IntLiteral(_) | Expr::FloatLiteral(_) => true,
            Expr::StringLiteral(_) => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    VarDecl {
        ty: Type,
        name: String,
        init: Option<Expr>,
    },
    Assign {
        target: Expr,
        value: Expr,
    },
    Return {
        value: Option<Expr>,
    },
    If {
        condition: Expr,
        true_body: Vec<Stmt>,
        false_body: Option<Vec<Stmt>>,
    },
    While {
        condition: Expr,
        body: Vec<Stmt>,
    },
    Expr(Expr),
}

/// A parsed function. Methods carry their class name mangled in (`Point_sum`)
/// and an implicit leading `this` parameter; `detached` distinguishes free
/// functions from methods.
#[derive(Debug)]
pub struct FunctionDecl {
    pub name: String,
    pub return_type: Type,
    pub is_public: bool,
    pub params: Vec<(String, Type)>,
    pub body: Option<Vec<Stmt>>,
    pub detached: bool,
}
