//! Statement lowering: stack slots, stores, and structured control flow.

use cranelift::prelude::{Block, InstBuilder, MemFlags};
use cranelift_module::Module;

use crate::errors::Diagnostic;
use crate::parser::ast::{Expr, Stmt};

use super::{is_void, FunctionLowering};

impl<'a, 'b, M: Module> FunctionLowering<'a, 'b, M> {
    pub(crate) fn lower_stmt(&mut self, stmt: &Stmt) -> Result<(), Diagnostic> {
        match stmt {
            Stmt::VarDecl { ty, name, init } => {
                let slot = self.create_slot(ty)?;

                if let Some(init) = init {
                    let (value, value_ty) = self.lower_expr(init)?;
                    let converted = self.convert_if_needed(value, &value_ty, ty, init.is_signed());
                    self.check_store_compatible(converted, ty, || {
                        format!("Cannot initialize variable '{}' with incompatible type", name)
                    })?;
                    let addr = self.slot_addr(slot);
                    self.builder.ins().store(MemFlags::new(), converted, addr, 0);
                }

                self.declare_variable(name.clone(), slot, ty.clone());
                Ok(())
            }
            Stmt::Assign { target, value } => {
                let (addr, target_ty) = self.lower_lvalue(target)?;
                let (lowered, value_ty) = self.lower_expr(value)?;
                let converted =
                    self.convert_if_needed(lowered, &value_ty, &target_ty, value.is_signed());
                self.check_store_compatible(converted, &target_ty, || {
                    "Cannot assign a value of incompatible type".to_string()
                })?;
                self.builder.ins().store(MemFlags::new(), converted, addr, 0);
                Ok(())
            }
            Stmt::Return { value } => {
                match value {
                    Some(expr) => {
                        let (lowered, value_ty) = self.lower_expr(expr)?;
                        let return_type = self.return_type.clone();
                        let converted =
                            self.convert_if_needed(lowered, &value_ty, &return_type, expr.is_signed());

                        let expected = self.clif_type(&return_type);
                        let actual = self.builder.func.dfg.value_type(converted);
                        if expected != Some(actual) {
                            return Err(Diagnostic::codegen(
                                "Return value type does not match function return type",
                            ));
                        }
                        self.builder.ins().return_(&[converted]);
                    }
                    None => {
                        if !is_void(&self.return_type) {
                            return Err(Diagnostic::codegen(
                                "Non-void function must return a value",
                            ));
                        }
                        self.builder.ins().return_(&[]);
                    }
                }
                self.terminated = true;
                Ok(())
            }
            Stmt::If {
                condition,
                true_body,
                false_body,
            } => self.lower_if(condition, true_body, false_body.as_deref()),
            Stmt::While { condition, body } => self.lower_while(condition, body),
            Stmt::Expr(expr) => {
                // lowered for side effects only
                if let Expr::Call { name, args, .. } = expr {
                    self.lower_call(name, args)?;
                } else {
                    self.lower_expr(expr)?;
                }
                Ok(())
            }
        }
    }

    fn lower_if(
        &mut self,
        condition: &Expr,
        true_body: &[Stmt],
        false_body: Option<&[Stmt]>,
    ) -> Result<(), Diagnostic> {
        let (cond, cond_ty) = self.lower_expr(condition)?;
        if !cond_ty.is_integer() {
            return Err(Diagnostic::codegen("If statement condition must be integer type"));
        }

        let then_block = self.builder.create_block();
        let else_block = false_body.map(|_| self.builder.create_block());

        // the merge block is only materialized once something branches to it,
        // so a function ending in an if/else where both sides return emits no
        // unreachable tail
        let mut merge_block: Option<Block> = None;

        match else_block {
            Some(else_block) => {
                self.builder.ins().brif(cond, then_block, &[], else_block, &[]);
            }
            None => {
                let merge = self.builder.create_block();
                self.builder.ins().brif(cond, then_block, &[], merge, &[]);
                merge_block = Some(merge);
            }
        }

        self.builder.switch_to_block(then_block);
        self.terminated = false;
        for stmt in true_body {
            if self.terminated {
                break;
            }
            self.lower_stmt(stmt)?;
        }
        if !self.terminated {
            let merge = *merge_block.get_or_insert_with(|| self.builder.create_block());
            self.builder.ins().jump(merge, &[]);
        }

        if let (Some(false_body), Some(else_block)) = (false_body, else_block) {
            self.builder.switch_to_block(else_block);
            self.terminated = false;
            for stmt in false_body {
                if self.terminated {
                    break;
                }
                self.lower_stmt(stmt)?;
            }
            if !self.terminated {
                let merge = *merge_block.get_or_insert_with(|| self.builder.create_block());
                self.builder.ins().jump(merge, &[]);
            }
        }

        match merge_block {
            Some(merge) => {
                self.builder.switch_to_block(merge);
                self.terminated = false;
            }
            None => {
                // both branches diverged; anything after this is unreachable
                self.terminated = true;
            }
        }
        Ok(())
    }

    fn lower_while(&mut self, condition: &Expr, body: &[Stmt]) -> Result<(), Diagnostic> {
        let cond_block = self.builder.create_block();
        let body_block = self.builder.create_block();
        let exit_block = self.builder.create_block();

        self.builder.ins().jump(cond_block, &[]);

        self.builder.switch_to_block(cond_block);
        let (cond, cond_ty) = self.lower_expr(condition)?;
        if !cond_ty.is_integer() {
            return Err(Diagnostic::codegen(
                "While statement condition must be integer type",
            ));
        }
        self.builder.ins().brif(cond, body_block, &[], exit_block, &[]);

        self.builder.switch_to_block(body_block);
        self.terminated = false;
        for stmt in body {
            if self.terminated {
                break;
            }
            self.lower_stmt(stmt)?;
        }
        if !self.terminated {
            self.builder.ins().jump(cond_block, &[]);
        }

        self.builder.switch_to_block(exit_block);
        self.terminated = false;
        Ok(())
    }

    fn check_store_compatible(
        &mut self,
        value: cranelift::prelude::Value,
        target_ty: &crate::parser::ast::Type,
        message: impl FnOnce() -> String,
    ) -> Result<(), Diagnostic> {
        let Some(expected) = self.clif_type(target_ty) else {
            return Err(Diagnostic::codegen(message()));
        };
        let actual = self.builder.func.dfg.value_type(value);
        if expected != actual {
            return Err(Diagnostic::codegen(message()));
        }
        Ok(())
    }
}
