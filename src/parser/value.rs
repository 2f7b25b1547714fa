use crate::errors::Diagnostic;
use crate::lexer::token::TokenKind;

use super::ast::{Expr, Type};
use super::Parser;

impl Parser {
    /// Parse the compound named-access grammar:
    ///
    /// ```text
    /// value := '$'* '&'? identifier (member | index)*
    /// member:= '.' '$'* identifier ('(' args ')')?
    /// index := '$'* '[' expr ']'
    /// ```
    ///
    /// The identifier resolves against the scope stack first; inside a method
    /// an unresolved name is retried as a member of `*this` (so parameters
    /// shadow members). Returns the expression together with the type it
    /// derives to. A member call short-circuits into the desugared
    /// `<Class>_<member>(&target, ...)` form.
    pub(crate) fn parse_value(&mut self) -> Result<(Expr, Type), Diagnostic> {
        let mut prefix_drefs = 0;
        while self.lexer.peek_is(TokenKind::Dollar)? {
            prefix_drefs += 1;
            self.lexer.consume()?;
        }

        let address_of = if self.lexer.peek_is(TokenKind::Ampersand)? {
            self.lexer.consume()?;
            true
        } else {
            false
        };

        let name_token = self.expect(TokenKind::Identifier)?;
        self.validate_identifier(&name_token)?;
        let name = name_token.text;

        let (mut target, mut derived) = match self.lookup_variable(&name) {
            Some(ty) => (
                Expr::Variable {
                    name: name.clone(),
                    signed: ty.is_signed(),
                },
                ty,
            ),
            None => self.resolve_implicit_member(&name)?,
        };

        for _ in 0..prefix_drefs {
            (target, derived) = self.apply_deref(target, derived)?;
        }

        loop {
            if self.lexer.peek_is(TokenKind::Period)? {
                self.lexer.consume()?;

                // auto-dereference a pointer-to-struct
                let mut class = derived.as_class().cloned();
                if class.is_none() {
                    if let Some(inner) = derived.as_pointer() {
                        if let Type::Class(decl) = inner.as_ref() {
                            class = Some(decl.clone());
                            let pointee = inner.as_ref().clone();
                            target = Expr::Deref {
                                target: Box::new(target),
                                signed: pointee.is_signed(),
                                pointee: pointee.clone(),
                            };
                            derived = pointee;
                        }
                    }
                }
                let Some(class) = class else {
                    return Err(self.semantic_error("Cannot access member of non-struct type"));
                };

                // dereferences written before the member name apply to the
                // member value afterwards
                let mut member_drefs = 0;
                while self.lexer.peek_is(TokenKind::Dollar)? {
                    member_drefs += 1;
                    self.lexer.consume()?;
                }

                let field_token = self.expect(TokenKind::Identifier)?;
                self.validate_identifier(&field_token)?;
                let field = field_token.text;

                if self.lexer.peek_is(TokenKind::LParen)? {
                    // member method call: the target becomes argument zero
                    let method = format!("{}_{}", class.name(), field);
                    self.lexer.consume()?; // '('

                    let mut args = Vec::new();
                    args.push(Expr::AddressOf {
                        signed: derived.is_signed(),
                        target: Box::new(target),
                    });
                    while !self.lexer.peek_is(TokenKind::RParen)? {
                        args.push(self.parse_expression(TokenKind::Comma)?);
                        if self.lexer.peek_is(TokenKind::Comma)? {
                            self.lexer.consume()?;
                        }
                    }
                    self.lexer.consume()?; // ')'

                    let Some(return_type) = self.lookup_function_return_type(&method) else {
                        return Err(self.semantic_error(format!(
                            "Call to undefined member method '{}'",
                            method
                        )));
                    };

                    let call = Expr::Call {
                        name: method,
                        args,
                        signed: return_type.is_signed(),
                    };
                    return Ok((call, return_type));
                }

                let Some(field_type) = class.member_type(&field) else {
                    return Err(self.semantic_error(format!(
                        "Struct '{}' has no member '{}'",
                        class.name(),
                        field
                    )));
                };

                target = Expr::StructAccess {
                    target: Box::new(target),
                    member: field,
                    class: class.clone(),
                    signed: field_type.is_signed(),
                };
                derived = field_type;

                for _ in 0..member_drefs {
                    (target, derived) = self.apply_deref(target, derived)?;
                }
                continue;
            }

            // subscript, optionally preceded by dereferences that apply to
            // the element afterwards
            let mut drefs_ahead = 0;
            while self.lexer.peek_is_at(TokenKind::Dollar, drefs_ahead)? {
                drefs_ahead += 1;
            }
            if !self.lexer.peek_is_at(TokenKind::LBracket, drefs_ahead)? {
                break;
            }
            for _ in 0..drefs_ahead {
                self.lexer.consume()?;
            }
            self.lexer.consume()?; // '['

            if derived.as_pointer().is_none() && !matches!(derived, Type::Array { .. }) {
                return Err(
                    self.semantic_error("Cannot apply subscript operator to non-array/non-pointer type")
                );
            }

            let index = self.parse_expression(TokenKind::RBracket)?;
            self.expect(TokenKind::RBracket)?;

            match derived.clone() {
                Type::Array { element, .. } => {
                    target = Expr::ArrayAccess {
                        target: Box::new(target),
                        index: Box::new(index),
                        array: derived.clone(),
                        signed: derived.is_signed(),
                    };
                    derived = element.as_ref().clone();
                }
                Type::Pointer(inner) => {
                    target = Expr::PointerIndex {
                        target: Box::new(target),
                        index: Box::new(index),
                        pointer: derived.clone(),
                        signed: derived.is_signed(),
                    };
                    derived = inner.as_ref().clone();
                }
                _ => unreachable!("subscript target checked above"),
            }

            for _ in 0..drefs_ahead {
                (target, derived) = self.apply_deref(target, derived)?;
            }
        }

        if address_of {
            target = Expr::AddressOf {
                signed: derived.is_signed(),
                target: Box::new(target),
            };
        }

        Ok((target, derived))
    }

    /// Inside a method, a bare name that is not in scope may be a member of
    /// the implicit `this`.
    fn resolve_implicit_member(&mut self, name: &str) -> Result<(Expr, Type), Diagnostic> {
        if let Some(this_type) = self.lookup_variable("this") {
            if let Some(inner) = this_type.as_pointer() {
                if let Type::Class(decl) = inner.as_ref() {
                    if let Some(field_type) = decl.member_type(name) {
                        let pointee = inner.as_ref().clone();
                        let this_ref = Expr::Variable {
                            name: "this".to_string(),
                            signed: this_type.is_signed(),
                        };
                        let deref_this = Expr::Deref {
                            target: Box::new(this_ref),
                            signed: pointee.is_signed(),
                            pointee,
                        };
                        let access = Expr::StructAccess {
                            target: Box::new(deref_this),
                            member: name.to_string(),
                            class: decl.clone(),
                            signed: field_type.is_signed(),
                        };
                        return Ok((access, field_type));
                    }
                }
            }
        }

        Err(self.semantic_error(format!("Undefined variable '{}'", name)))
    }

    fn apply_deref(&mut self, target: Expr, derived: Type) -> Result<(Expr, Type), Diagnostic> {
        let Some(inner) = derived.as_pointer() else {
            return Err(self.semantic_error("Cannot dereference non-pointer type"));
        };
        let pointee = inner.as_ref().clone();
        let deref = Expr::Deref {
            target: Box::new(target),
            signed: pointee.is_signed(),
            pointee: pointee.clone(),
        };
        Ok((deref, pointee))
    }
}
