//! Struct layout computation.
//!
//! The backend has no aggregate types, so classes are lowered to byte
//! layouts up front: every member gets a natural-alignment offset and the
//! addressing code adds those offsets to a base pointer. Layouts for all
//! classes are computed before any function body is lowered; pointer members
//! never need the pointee's layout, which is what makes self-referential
//! classes work.

use std::collections::HashMap;
use std::rc::Rc;

use crate::errors::Diagnostic;
use crate::parser::ast::{ClassDecl, Primitive, Type};

#[derive(Debug)]
pub struct StructLayout {
    pub size: u32,
    pub align: u32,
    fields: Vec<(String, u32)>,
}

impl StructLayout {
    pub fn offset_of(&self, member: &str) -> Option<u32> {
        self.fields
            .iter()
            .find(|(name, _)| name == member)
            .map(|(_, offset)| *offset)
    }

    pub fn fields(&self) -> &[(String, u32)] {
        &self.fields
    }
}

#[derive(Debug)]
pub struct ClassLayouts {
    map: HashMap<String, StructLayout>,
    ptr_bytes: u32,
}

fn round_up(value: u32, align: u32) -> u32 {
    debug_assert!(align.is_power_of_two());
    (value + align - 1) & !(align - 1)
}

impl ClassLayouts {
    pub fn new(ptr_bytes: u32) -> Self {
        Self {
            map: HashMap::new(),
            ptr_bytes,
        }
    }

    pub fn compute(classes: &[Rc<ClassDecl>], ptr_bytes: u32) -> Result<Self, Diagnostic> {
        let mut layouts = Self::new(ptr_bytes);
        for class in classes {
            layouts.layout_class(class, &mut Vec::new())?;
        }
        Ok(layouts)
    }

    pub fn get(&self, class: &str) -> Option<&StructLayout> {
        self.map.get(class)
    }

    fn layout_class(&mut self, class: &ClassDecl, stack: &mut Vec<String>) -> Result<(), Diagnostic> {
        if self.map.contains_key(class.name()) {
            return Ok(());
        }
        if stack.iter().any(|name| name == class.name()) {
            return Err(Diagnostic::codegen(format!(
                "Class '{}' recursively contains itself by value",
                class.name()
            )));
        }

        stack.push(class.name().to_string());

        let mut size = 0u32;
        let mut align = 1u32;
        let mut fields = Vec::new();

        for (name, ty) in class.members() {
            let (member_size, member_align) = self.size_align(&ty, stack)?;
            size = round_up(size, member_align);
            fields.push((name, size));
            size += member_size;
            align = align.max(member_align);
        }
        size = round_up(size, align);

        stack.pop();
        self.map
            .insert(class.name().to_string(), StructLayout { size, align, fields });
        Ok(())
    }

    fn size_align(&mut self, ty: &Type, stack: &mut Vec<String>) -> Result<(u32, u32), Diagnostic> {
        match ty {
            Type::Primitive { kind, .. } => match kind {
                Primitive::Void => Err(Diagnostic::codegen("Cannot compute the size of 'void'")),
                Primitive::Bool | Primitive::Char => Ok((1, 1)),
                Primitive::Short | Primitive::Half => Ok((2, 2)),
                Primitive::Int | Primitive::Float => Ok((4, 4)),
                Primitive::Long | Primitive::Double => Ok((8, 8)),
                Primitive::Quad => Ok((16, 16)),
            },
            Type::Pointer(_) => Ok((self.ptr_bytes, self.ptr_bytes)),
            Type::Array { element, len } => {
                let (element_size, element_align) = self.size_align(element, stack)?;
                Ok((element_size * len, element_align))
            }
            Type::Class(decl) => {
                self.layout_class(decl, stack)?;
                let layout = &self.map[decl.name()];
                Ok((layout.size, layout.align))
            }
        }
    }

    /// Byte size of an already-laid-out type. Classes must have gone through
    /// `compute` first.
    pub fn size_of(&self, ty: &Type) -> Result<u32, Diagnostic> {
        match ty {
            Type::Primitive { kind, .. } => match kind {
                Primitive::Void => Err(Diagnostic::codegen("Cannot compute the size of 'void'")),
                Primitive::Bool | Primitive::Char => Ok(1),
                Primitive::Short | Primitive::Half => Ok(2),
                Primitive::Int | Primitive::Float => Ok(4),
                Primitive::Long | Primitive::Double => Ok(8),
                Primitive::Quad => Ok(16),
            },
            Type::Pointer(_) => Ok(self.ptr_bytes),
            Type::Array { element, len } => Ok(self.size_of(element)? * len),
            Type::Class(decl) => self
                .map
                .get(decl.name())
                .map(|layout| layout.size)
                .ok_or_else(|| {
                    Diagnostic::internal(format!("No layout computed for class '{}'", decl.name()))
                }),
        }
    }

    pub fn align_of(&self, ty: &Type) -> Result<u32, Diagnostic> {
        match ty {
            Type::Primitive { .. } | Type::Pointer(_) => self.size_of(ty),
            Type::Array { element, .. } => self.align_of(element),
            Type::Class(decl) => self
                .map
                .get(decl.name())
                .map(|layout| layout.align.max(1))
                .ok_or_else(|| {
                    Diagnostic::internal(format!("No layout computed for class '{}'", decl.name()))
                }),
        }
    }
}
