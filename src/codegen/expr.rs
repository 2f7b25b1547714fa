//! Expression lowering.
//!
//! Every expression lowers two ways: `lower_expr` produces the value
//! (r-value), `lower_lvalue` produces the address of the storage it denotes
//! together with the pointee type. Only variable references, struct accesses,
//! subscript forms, and dereferences have addresses.

use std::rc::Rc;

use cranelift::prelude::{InstBuilder, IntCC, MemFlags, Value};
use cranelift_module::Module;

use crate::errors::Diagnostic;
use crate::parser::ast::{BinaryOp, Expr, Primitive, Type};

use super::FunctionLowering;

impl<'a, 'b, M: Module> FunctionLowering<'a, 'b, M> {
    pub(crate) fn lower_expr(&mut self, expr: &Expr) -> Result<(Value, Type), Diagnostic> {
        match expr {
            Expr::Variable { .. }
            | Expr::StructAccess { .. }
            | Expr::ArrayAccess { .. }
            | Expr::PointerIndex { .. } => {
                let (addr, ty) = self.lower_lvalue(expr)?;
                let value = self.load_scalar(addr, &ty)?;
                Ok((value, ty))
            }
            Expr::Deref { target, pointee, .. } => {
                let (ptr, ptr_ty) = self.lower_expr(target)?;
                if ptr_ty.as_pointer().is_none() {
                    return Err(Diagnostic::codegen("Cannot dereference non-pointer type"));
                }
                let value = self.load_scalar(ptr, pointee)?;
                Ok((value, pointee.clone()))
            }
            Expr::AddressOf { target, .. } => {
                let (addr, pointee) = self.lower_lvalue(target)?;
                Ok((addr, Type::Pointer(Rc::new(pointee))))
            }
            Expr::IntLiteral(value) => {
                let constant = self
                    .builder
                    .ins()
                    .iconst(cranelift::prelude::types::I32, i64::from(*value));
                Ok((constant, Type::primitive(Primitive::Int, true)))
            }
            Expr::FloatLiteral(value) => {
                let constant = self.builder.ins().f32const(*value);
                Ok((constant, Type::primitive(Primitive::Float, true)))
            }
            Expr::StringLiteral(text) => {
                let pointer = self.string_constant(text)?;
                Ok((
                    pointer,
                    Type::Pointer(Rc::new(Type::primitive(Primitive::Char, false))),
                ))
            }
            Expr::Call { name, args, .. } => {
                let (value, return_type) = self.lower_call(name, args)?;
                let Some(value) = value else {
                    return Err(Diagnostic::codegen(format!(
                        "Cannot use the result of void function '{}'",
                        name
                    )));
                };
                Ok((value, return_type))
            }
            Expr::Binary {
                op,
                lhs,
                rhs,
                signed,
            } => self.lower_binary(*op, lhs, rhs, *signed),
        }
    }

    pub(crate) fn lower_lvalue(&mut self, expr: &Expr) -> Result<(Value, Type), Diagnostic> {
        match expr {
            Expr::Variable { name, .. } => {
                let Some(var) = self.lookup_variable(name) else {
                    return Err(Diagnostic::codegen(format!("Undefined variable '{}'", name)));
                };
                let addr = self.slot_addr(var.slot);
                Ok((addr, var.ty))
            }
            Expr::StructAccess {
                target,
                member,
                class,
                ..
            } => {
                let (base, _) = self.lower_lvalue(target)?;
                let Some(field_type) = class.member_type(member) else {
                    return Err(Diagnostic::codegen(format!(
                        "Struct '{}' has no member named '{}'",
                        class.name(),
                        member
                    )));
                };
                let Some(offset) = self
                    .layouts
                    .get(class.name())
                    .and_then(|layout| layout.offset_of(member))
                else {
                    return Err(Diagnostic::internal(format!(
                        "No layout for member '{}' of class '{}'",
                        member,
                        class.name()
                    )));
                };
                let addr = if offset == 0 {
                    base
                } else {
                    self.builder.ins().iadd_imm(base, i64::from(offset))
                };
                Ok((addr, field_type))
            }
            Expr::ArrayAccess {
                target,
                index,
                array,
                ..
            } => {
                let (base, _) = self.lower_lvalue(target)?;
                let Type::Array { element, .. } = array else {
                    return Err(Diagnostic::internal("Array access over a non-array type"));
                };
                let (index_value, index_type) = self.lower_expr(index)?;
                if !index_type.is_integer() {
                    return Err(Diagnostic::codegen("Array index must be an integer type"));
                }
                let element_size = self.layouts.size_of(element)?;
                let addr = self.index_address(base, index_value, element_size);
                Ok((addr, element.as_ref().clone()))
            }
            Expr::PointerIndex {
                target,
                index,
                pointer,
                ..
            } => {
                // the pointer itself is a value: load it, then index
                let (pointer_value, pointer_ty) = self.lower_expr(target)?;
                if pointer_ty.as_pointer().is_none() {
                    return Err(Diagnostic::codegen("Cannot index into non-pointer type"));
                }
                let Type::Pointer(element) = pointer else {
                    return Err(Diagnostic::internal("Pointer index over a non-pointer type"));
                };
                let (index_value, index_type) = self.lower_expr(index)?;
                if !index_type.is_integer() {
                    return Err(Diagnostic::codegen("Pointer index must be an integer type"));
                }
                let element_size = self.layouts.size_of(element)?;
                let addr = self.index_address(pointer_value, index_value, element_size);
                Ok((addr, element.as_ref().clone()))
            }
            Expr::Deref { target, pointee, .. } => {
                // the loaded pointer is the address of the pointee
                let (ptr, ptr_ty) = self.lower_expr(target)?;
                if ptr_ty.as_pointer().is_none() {
                    return Err(Diagnostic::codegen("Cannot dereference non-pointer type"));
                }
                Ok((ptr, pointee.clone()))
            }
            _ => Err(Diagnostic::codegen(
                "Lvalue code generation is not supported for this expression",
            )),
        }
    }

    pub(crate) fn lower_call(
        &mut self,
        name: &str,
        args: &[Expr],
    ) -> Result<(Option<Value>, Type), Diagnostic> {
        let (param_count, return_type) = match self.declared_function(name) {
            Some(function) => (function.signature.params.len(), function.return_type.clone()),
            None => return Err(Diagnostic::codegen(format!("Unknown function '{}'", name))),
        };

        if args.len() != param_count {
            return Err(Diagnostic::codegen(format!(
                "Function '{}' expects {} arguments, got {}",
                name,
                param_count,
                args.len()
            )));
        }

        let mut lowered = Vec::with_capacity(args.len());
        for arg in args {
            lowered.push(self.lower_expr(arg)?.0);
        }

        let func_ref = self
            .func_ref(name)
            .ok_or_else(|| Diagnostic::internal(format!("No reference for function '{}'", name)))?;
        let call = self.builder.ins().call(func_ref, &lowered);
        let results = self.builder.inst_results(call);
        Ok((results.first().copied(), return_type))
    }

    fn lower_binary(
        &mut self,
        op: BinaryOp,
        lhs_expr: &Expr,
        rhs_expr: &Expr,
        signed: bool,
    ) -> Result<(Value, Type), Diagnostic> {
        let (lhs, lhs_ty) = self.lower_expr(lhs_expr)?;
        let (rhs, rhs_ty) = self.lower_expr(rhs_expr)?;

        // the right operand adopts the left operand's width
        let rhs = self.convert_if_needed(rhs, &rhs_ty, &lhs_ty, signed);

        let both_integer = lhs_ty.is_integer() && rhs_ty.is_integer();

        match op {
            BinaryOp::Add => {
                if let Some(pointee) = lhs_ty.as_pointer() {
                    if !rhs_ty.is_integer() {
                        return Err(Diagnostic::codegen("Cannot add non-integer to pointer"));
                    }
                    let element_size = self.layouts.size_of(pointee)?;
                    let addr = self.index_address(lhs, rhs, element_size);
                    Ok((addr, lhs_ty))
                } else if let Some(pointee) = rhs_ty.as_pointer() {
                    if !lhs_ty.is_integer() {
                        return Err(Diagnostic::codegen("Cannot add non-integer to pointer"));
                    }
                    let element_size = self.layouts.size_of(pointee)?;
                    let addr = self.index_address(rhs, lhs, element_size);
                    Ok((addr, rhs_ty))
                } else if both_integer {
                    Ok((self.builder.ins().iadd(lhs, rhs), lhs_ty))
                } else {
                    Err(Diagnostic::codegen("Addition requires integer operands"))
                }
            }
            BinaryOp::Subtract => {
                if let Some(pointee) = lhs_ty.as_pointer() {
                    if !rhs_ty.is_integer() {
                        return Err(Diagnostic::codegen(
                            "Cannot subtract non-integer from pointer",
                        ));
                    }
                    let element_size = self.layouts.size_of(pointee)?;
                    let negated = self.builder.ins().ineg(rhs);
                    let addr = self.index_address(lhs, negated, element_size);
                    Ok((addr, lhs_ty))
                } else if both_integer {
                    Ok((self.builder.ins().isub(lhs, rhs), lhs_ty))
                } else {
                    Err(Diagnostic::codegen("Subtraction requires integer operands"))
                }
            }
            BinaryOp::Multiply => {
                if !both_integer {
                    return Err(Diagnostic::codegen(
                        "Multiplication requires integer operands",
                    ));
                }
                Ok((self.builder.ins().imul(lhs, rhs), lhs_ty))
            }
            BinaryOp::Divide => {
                if !both_integer {
                    return Err(Diagnostic::codegen("Division requires integer operands"));
                }
                let value = if signed {
                    self.builder.ins().sdiv(lhs, rhs)
                } else {
                    self.builder.ins().udiv(lhs, rhs)
                };
                Ok((value, lhs_ty))
            }
            BinaryOp::Less => {
                self.lower_comparison(
                    lhs, rhs, both_integer,
                    if signed { IntCC::SignedLessThan } else { IntCC::UnsignedLessThan },
                )
            }
            BinaryOp::More => {
                self.lower_comparison(
                    lhs, rhs, both_integer,
                    if signed { IntCC::SignedGreaterThan } else { IntCC::UnsignedGreaterThan },
                )
            }
            BinaryOp::Equal => self.lower_comparison(lhs, rhs, both_integer, IntCC::Equal),
        }
    }

    fn lower_comparison(
        &mut self,
        lhs: Value,
        rhs: Value,
        both_integer: bool,
        condition: IntCC,
    ) -> Result<(Value, Type), Diagnostic> {
        if !both_integer {
            return Err(Diagnostic::codegen("Comparison requires integer operands"));
        }
        let value = self.builder.ins().icmp(condition, lhs, rhs);
        Ok((value, Type::primitive(Primitive::Bool, false)))
    }

    /// Widen or truncate an integer value to the width of the target type.
    /// Extension follows the signedness of the value's expression, not the
    /// target's. Non-integer operands pass through untouched.
    pub(crate) fn convert_if_needed(
        &mut self,
        value: Value,
        value_ty: &Type,
        target_ty: &Type,
        signed: bool,
    ) -> Value {
        if !value_ty.is_integer() || !target_ty.is_integer() {
            return value;
        }
        let Some(target) = self.clif_type(target_ty) else {
            return value;
        };
        let current = self.builder.func.dfg.value_type(value);
        if current == target {
            return value;
        }
        if current.bits() < target.bits() {
            if signed {
                self.builder.ins().sextend(target, value)
            } else {
                self.builder.ins().uextend(target, value)
            }
        } else {
            self.builder.ins().ireduce(target, value)
        }
    }

    fn load_scalar(&mut self, addr: Value, ty: &Type) -> Result<Value, Diagnostic> {
        let Some(clif) = self.clif_type(ty) else {
            return Err(Diagnostic::codegen(
                "Cannot load a value of aggregate or void type",
            ));
        };
        Ok(self.builder.ins().load(clif, MemFlags::new(), addr, 0))
    }

    /// `base + index * element_size`, with the index sign-extended to
    /// pointer width.
    fn index_address(&mut self, base: Value, index: Value, element_size: u32) -> Value {
        let index_ty = self.builder.func.dfg.value_type(index);
        let index = if index_ty == self.ptr_type {
            index
        } else if index_ty.bits() < self.ptr_type.bits() {
            self.builder.ins().sextend(self.ptr_type, index)
        } else {
            self.builder.ins().ireduce(self.ptr_type, index)
        };
        let offset = if element_size == 1 {
            index
        } else {
            self.builder.ins().imul_imm(index, i64::from(element_size))
        };
        self.builder.ins().iadd(base, offset)
    }
}
