use crate::errors::Diagnostic;
use crate::lexer::token::TokenKind;

use super::ast::{BinaryOp, Expr};
use super::Parser;

fn operator_precedence(kind: TokenKind) -> i32 {
    match kind {
        TokenKind::Asterisk | TokenKind::Slash => 20,
        TokenKind::Plus | TokenKind::Minus => 10,
        TokenKind::Less | TokenKind::Greater => 5,
        TokenKind::Equals => 3, // '==' is two adjacent '=' tokens
        _ => -1,
    }
}

fn token_to_binary_op(kind: TokenKind) -> Option<BinaryOp> {
    match kind {
        TokenKind::Plus => Some(BinaryOp::Add),
        TokenKind::Minus => Some(BinaryOp::Subtract),
        TokenKind::Asterisk => Some(BinaryOp::Multiply),
        TokenKind::Slash => Some(BinaryOp::Divide),
        TokenKind::Less => Some(BinaryOp::Less),
        TokenKind::Greater => Some(BinaryOp::More),
        TokenKind::Equals => Some(BinaryOp::Equal),
        _ => None,
    }
}

impl Parser {
    /// Pratt parse up to (not including) `terminator`. When the terminator is
    /// `,` a `)` also terminates, so the same entry point serves call
    /// argument lists.
    pub(crate) fn parse_expression(&mut self, terminator: TokenKind) -> Result<Expr, Diagnostic> {
        let lhs = self.parse_primary_expression()?;
        self.parse_binary_op_rhs(0, lhs, terminator)
    }

    fn parse_primary_expression(&mut self) -> Result<Expr, Diagnostic> {
        match self.lexer.peek()?.kind {
            TokenKind::IntLit => {
                let token = self.expect(TokenKind::IntLit)?;
                Ok(Expr::IntLiteral(self.parse_int_literal(&token)?))
            }
            TokenKind::StringLit => {
                let token = self.expect(TokenKind::StringLit)?;
                Ok(Expr::StringLiteral(token.text))
            }
            TokenKind::FloatLit => {
                let token = self.expect(TokenKind::FloatLit)?;
                Ok(Expr::FloatLiteral(self.parse_float_literal(&token)?))
            }
            TokenKind::Minus => {
                // unary minus fuses with the literal that follows
                self.lexer.consume()?;
                if self.lexer.peek_is(TokenKind::FloatLit)? {
                    let token = self.expect(TokenKind::FloatLit)?;
                    Ok(Expr::FloatLiteral(-self.parse_float_literal(&token)?))
                } else {
                    let token = self.expect(TokenKind::IntLit)?;
                    Ok(Expr::IntLiteral(-self.parse_int_literal(&token)?))
                }
            }
            TokenKind::Ampersand | TokenKind::Dollar | TokenKind::Identifier => {
                if self.lexer.peek_is_at(TokenKind::LParen, 1)? {
                    // function call
                    let name_token = self.expect(TokenKind::Identifier)?;
                    self.validate_identifier(&name_token)?;
                    self.expect(TokenKind::LParen)?;
                    return self.finish_function_call(name_token.text);
                }

                if self.lexer.peek_is(TokenKind::Identifier)? {
                    let text = self.lexer.peek()?.text;
                    if let Some(&value) = self.int_defs.get(&text) {
                        self.lexer.consume()?;
                        return Ok(Expr::IntLiteral(value));
                    }
                }

                Ok(self.parse_value()?.0)
            }
            TokenKind::LParen => {
                self.expect(TokenKind::LParen)?;
                let expr = self.parse_expression(TokenKind::RParen)?;
                self.expect(TokenKind::RParen)?;
                Ok(expr)
            }
            _ => Err(self.syntax_error("Unexpected token in expression")),
        }
    }

    /// Parse `( args )` after the opening paren was consumed, resolve the
    /// callee against the functions parsed so far, and build the call node.
    pub(crate) fn finish_function_call(&mut self, name: String) -> Result<Expr, Diagnostic> {
        let mut args = Vec::new();
        while !self.lexer.peek_is(TokenKind::RParen)? {
            args.push(self.parse_expression(TokenKind::Comma)?);
            if self.lexer.peek_is(TokenKind::Comma)? {
                self.lexer.consume()?;
            }
        }
        self.lexer.consume()?; // ')'

        let Some(return_type) = self.lookup_function_return_type(&name) else {
            return Err(self.semantic_error(format!("Call to undefined function '{}'", name)));
        };

        // member functions are only callable through an instance
        if !self.in_class().is_empty() && name.contains('_') {
            let prefix = format!("{}_", self.in_class());
            if name.starts_with(&prefix) {
                return Err(self.semantic_error(format!(
                    "Cannot call member function '{}' without an instance of the class",
                    name
                )));
            }
        }

        Ok(Expr::Call {
            name,
            args,
            signed: return_type.is_signed(),
        })
    }

    fn parse_binary_op_rhs(
        &mut self,
        expr_prec: i32,
        mut lhs: Expr,
        terminator: TokenKind,
    ) -> Result<Expr, Diagnostic> {
        loop {
            if self.at_terminator(terminator)? {
                return Ok(lhs);
            }

            let token_kind = self.lexer.peek()?.kind;

            if token_kind == TokenKind::Equals && !self.lexer.peek_is_at(TokenKind::Equals, 1)? {
                return Err(self.semantic_error(
                    "Variable assignment is not an expression, did you mean '=='?",
                ));
            }

            let token_prec = operator_precedence(token_kind);
            if token_prec < expr_prec {
                return Ok(lhs);
            }

            if token_kind == TokenKind::Equals {
                self.lexer.consume()?;
                self.lexer.consume()?;
            } else {
                self.lexer.consume()?;
            }

            let mut rhs = self.parse_primary_expression()?;

            if !self.at_terminator(terminator)? {
                let next_kind = self.lexer.peek()?.kind;
                let lone_equals =
                    next_kind == TokenKind::Equals && !self.lexer.peek_is_at(TokenKind::Equals, 1)?;
                if !lone_equals && operator_precedence(next_kind) > token_prec {
                    rhs = self.parse_binary_op_rhs(token_prec + 1, rhs, terminator)?;
                }
            }

            if lhs.is_signed() != rhs.is_signed() {
                return Err(self.semantic_error(
                    "Cannot create binary operation with types of different signedness",
                ));
            }

            let Some(op) = token_to_binary_op(token_kind) else {
                return Err(self.semantic_error("Invalid binary operator"));
            };
            let signed = lhs.is_signed();
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                signed,
            };
        }
    }

    fn at_terminator(&mut self, terminator: TokenKind) -> Result<bool, Diagnostic> {
        let kind = self.lexer.peek()?.kind;
        if kind == terminator {
            return Ok(true);
        }
        Ok(terminator == TokenKind::Comma && kind == TokenKind::RParen)
    }
}
