pub mod ast;
mod expr;
mod value;

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use indexmap::IndexMap;

use crate::errors::{Diagnostic, SourceLocation};
use crate::lexer::token::{describe, Token, TokenKind};
use crate::lexer::Lexer;
use ast::{ClassDecl, Expr, FunctionDecl, Primitive, Stmt, Type};

/// Everything the parser produces for one compile: classes in encounter
/// order, then every function (methods carry their mangled names).
#[derive(Debug)]
pub struct ParseOutput {
    pub classes: Vec<Rc<ClassDecl>>,
    pub functions: Vec<FunctionDecl>,
}

/// Recursive-descent parser fused with name and type resolution. Expressions
/// come out typed: variable references are resolved against the scope stack,
/// member accesses against the class registry, and method calls are already
/// desugared to mangled free calls with an explicit `this` argument.
pub struct Parser {
    lexer: Lexer,
    current_file: String,
    current_class: String,

    functions: Vec<FunctionDecl>,
    classes: Vec<Rc<ClassDecl>>,

    // per-function variable scopes
    scopes: Vec<HashMap<String, Type>>,

    // name -> resolved type (primitives, typedefs, class references)
    types: HashMap<String, Type>,

    // compile-time integer constants from `intdef`
    int_defs: HashMap<String, i32>,

    // canonical paths of files already parsed, for import dedup
    imported: HashSet<PathBuf>,
}

impl Parser {
    pub fn new(source: &str, file_path: impl Into<String>) -> Self {
        let mut parser = Self {
            lexer: Lexer::new(source),
            current_file: file_path.into(),
            current_class: String::new(),
            functions: Vec::new(),
            classes: Vec::new(),
            scopes: Vec::new(),
            types: HashMap::new(),
            int_defs: HashMap::new(),
            imported: HashSet::new(),
        };

        parser.register_primitive("bool", Primitive::Bool, false);
        parser.register_primitive("void", Primitive::Void, false);

        parser.register_primitive("char", Primitive::Char, true);
        parser.register_primitive("uchar", Primitive::Char, false);

        parser.register_primitive("short", Primitive::Short, true);
        parser.register_primitive("ushort", Primitive::Short, false);

        parser.register_primitive("int", Primitive::Int, true);
        parser.register_primitive("uint", Primitive::Int, false);

        parser.register_primitive("long", Primitive::Long, true);
        parser.register_primitive("ulong", Primitive::Long, false);

        // fp types are always signed
        parser.register_primitive("half", Primitive::Half, true);
        parser.register_primitive("float", Primitive::Float, true);
        parser.register_primitive("double", Primitive::Double, true);
        parser.register_primitive("quad", Primitive::Quad, true);

        parser
    }

    pub fn parse(mut self) -> Result<ParseOutput, Diagnostic> {
        if !self.current_file.is_empty() {
            if let Ok(canonical) = fs::canonicalize(&self.current_file) {
                self.imported.insert(canonical);
            }
        }

        self.process_imports()?;
        self.parse_file()?;

        Ok(ParseOutput {
            classes: self.classes,
            functions: self.functions,
        })
    }

    /// Recursively pull in `import "<path>";` items at the head of the file.
    /// Paths are resolved relative to the importing file and canonicalized;
    /// a file is parsed at most once no matter how it is spelled.
    fn process_imports(&mut self) -> Result<(), Diagnostic> {
        while self.lexer.peek_is(TokenKind::Import)? {
            self.lexer.consume()?;

            let import_file = self.expect(TokenKind::StringLit)?.text;
            self.expect(TokenKind::Semi)?;

            let mut import_path = PathBuf::from(&import_file);
            if !import_path.is_absolute() && !self.current_file.is_empty() {
                if let Some(dir) = Path::new(&self.current_file).parent() {
                    import_path = dir.join(import_path);
                }
            }

            if !import_path.exists() {
                return Err(
                    self.semantic_error(format!("Cannot import nonexistent file: '{}'", import_file))
                );
            }

            let canonical = fs::canonicalize(&import_path).map_err(|err| {
                self.semantic_error(format!("Cannot canonicalize import '{}': {}", import_file, err))
            })?;

            if !self.imported.insert(canonical.clone()) {
                continue;
            }

            let source = fs::read_to_string(&import_path).map_err(|err| {
                self.semantic_error(format!("Cannot read import '{}': {}", import_file, err))
            })?;

            let saved_lexer = std::mem::replace(&mut self.lexer, Lexer::new(&source));
            let saved_file =
                std::mem::replace(&mut self.current_file, canonical.display().to_string());

            let result = self.process_imports().and_then(|_| self.parse_file());

            self.lexer = saved_lexer;
            self.current_file = saved_file;
            result?;
        }

        Ok(())
    }

    fn parse_file(&mut self) -> Result<(), Diagnostic> {
        while !self.lexer.peek_is(TokenKind::Eof)? {
            match self.lexer.peek()?.kind {
                TokenKind::Import => {
                    // already handled by process_imports
                    self.lexer.consume()?;
                    self.expect(TokenKind::StringLit)?;
                    self.expect(TokenKind::Semi)?;
                }
                TokenKind::Typedef => self.parse_typedef()?,
                TokenKind::Intdef => self.parse_intdef()?,
                TokenKind::Class => {
                    self.lexer.consume()?;
                    let name_token = self.expect(TokenKind::Identifier)?;
                    self.validate_identifier(&name_token)?;
                    self.current_class = name_token.text.clone();
                    self.expect(TokenKind::LBrace)?;
                    self.parse_class()?;
                    self.expect(TokenKind::RBrace)?;
                    self.current_class.clear();
                }
                _ => {
                    let function = self.parse_function()?;
                    self.functions.push(function);
                }
            }
        }
        Ok(())
    }

    fn parse_typedef(&mut self) -> Result<(), Diagnostic> {
        self.expect(TokenKind::Typedef)?;
        let alias = self.expect(TokenKind::Identifier)?;
        self.validate_identifier(&alias)?;
        let target = self.expect(TokenKind::Identifier)?;

        let Some(target_type) = self.types.get(&target.text).cloned() else {
            return Err(self.syntax_error("Invalid target type in typedef"));
        };
        self.types.insert(alias.text, target_type);

        self.expect(TokenKind::Semi)?;
        Ok(())
    }

    fn parse_intdef(&mut self) -> Result<(), Diagnostic> {
        self.expect(TokenKind::Intdef)?;
        let alias = self.expect(TokenKind::Identifier)?;
        self.validate_identifier(&alias)?;
        let literal = self.expect(TokenKind::IntLit)?;
        let value = self.parse_int_literal(&literal)?;
        self.int_defs.insert(alias.text, value);

        self.expect(TokenKind::Semi)?;
        Ok(())
    }

    /// Parse a class body in two passes. The first pass registers the data
    /// members (so that method bodies see the full member set regardless of
    /// declaration order), skipping over function definitions by balancing
    /// braces. The lexer is then rewound and the second pass parses only the
    /// functions.
    fn parse_class(&mut self) -> Result<(), Diagnostic> {
        // Register the class before reading its body so members and methods
        // can refer to the class itself (`ptr Node next;`). A repeated
        // `class` declaration extends the existing one.
        let decl = match self.types.get(&self.current_class) {
            Some(Type::Class(existing)) => existing.clone(),
            Some(_) => {
                return Err(self.semantic_error(format!(
                    "'{}' is already defined as a non-class type",
                    self.current_class
                )))
            }
            None => {
                let decl = Rc::new(ClassDecl::new(self.current_class.clone()));
                self.classes.push(decl.clone());
                self.types
                    .insert(self.current_class.clone(), Type::Class(decl.clone()));
                decl
            }
        };

        let saved_state = self.lexer.save_state();
        let mut members: IndexMap<String, Type> = IndexMap::new();

        // first pass: member variables
        while !self.lexer.peek_is(TokenKind::Eof)? && !self.lexer.peek_is(TokenKind::RBrace)? {
            let member_type = self.expect_type()?;
            let name_token = self.expect(TokenKind::Identifier)?;
            self.validate_identifier(&name_token)?;

            if !self.lexer.peek_is(TokenKind::LParen)? {
                self.expect(TokenKind::Semi)?;
                members.insert(name_token.text, member_type);
                continue;
            }

            // skip a function: the type and name are already consumed
            self.expect(TokenKind::LParen)?;
            while !self.lexer.peek_is(TokenKind::RParen)? {
                if !self.lexer.peek_is(TokenKind::Comma)? {
                    self.expect_type()?;
                    let param = self.expect(TokenKind::Identifier)?;
                    self.validate_identifier(&param)?;
                }
                if self.lexer.peek_is(TokenKind::Comma)? {
                    self.lexer.consume()?;
                }
            }
            self.expect(TokenKind::RParen)?;

            if self.lexer.peek_is(TokenKind::LBrace)? {
                self.lexer.consume()?;
                let mut depth = 1;
                while depth > 0 && !self.lexer.peek_is(TokenKind::Eof)? {
                    match self.lexer.peek()?.kind {
                        TokenKind::LBrace => depth += 1,
                        TokenKind::RBrace => depth -= 1,
                        _ => {}
                    }
                    self.lexer.consume()?;
                }
            } else {
                self.expect(TokenKind::Semi)?;
            }
        }

        decl.add_members(members);

        // second pass: function definitions only
        self.lexer.restore_state(saved_state);
        self.parse_class_functions()
    }

    /// Second class-body pass: parse the functions, skipping member lines.
    fn parse_class_functions(&mut self) -> Result<(), Diagnostic> {
        while !self.lexer.peek_is(TokenKind::Eof)? && !self.lexer.peek_is(TokenKind::RBrace)? {
            let type_len = self.next_type_length()?;
            if self.lexer.peek_is_at(TokenKind::LParen, type_len + 1)? {
                let function = self.parse_function()?;
                self.functions.push(function);
                continue;
            }

            // a data member line, already recorded by the first pass
            self.expect_type()?;
            self.expect(TokenKind::Identifier)?;
            self.expect(TokenKind::Semi)?;
        }
        Ok(())
    }

    fn parse_function(&mut self) -> Result<FunctionDecl, Diagnostic> {
        let detached = self.current_class.is_empty();

        let return_type = self.expect_type()?;

        let name_token = self.expect(TokenKind::Identifier)?;
        self.validate_identifier(&name_token)?;
        let name = if detached {
            name_token.text
        } else {
            format!("{}_{}", self.current_class, name_token.text)
        };

        self.expect(TokenKind::LParen)?;

        let mut params: Vec<(String, Type)> = Vec::new();

        // member functions receive the enclosing class through `this`
        if !detached {
            let this_type = self.types.get(&self.current_class).cloned().ok_or_else(|| {
                Diagnostic::internal(format!("class '{}' is not registered", self.current_class))
            })?;
            params.push(("this".to_string(), Type::Pointer(Rc::new(this_type))));
        }

        while !self.lexer.peek_is(TokenKind::RParen)? {
            let param_type = self.expect_type()?;
            let param_token = self.expect(TokenKind::Identifier)?;
            self.validate_identifier(&param_token)?;
            params.push((param_token.text, param_type));

            if self.lexer.peek_is(TokenKind::Comma)? {
                self.lexer.consume()?;
            }
        }
        self.expect(TokenKind::RParen)?;

        let body = if self.lexer.peek_is(TokenKind::LBrace)? {
            self.lexer.consume()?;
            self.push_scope();
            for (param_name, param_type) in &params {
                self.index_variable(param_name.clone(), param_type.clone());
            }

            let mut statements = Vec::new();
            while !self.lexer.peek_is(TokenKind::RBrace)? {
                statements.push(self.parse_statement()?);
            }
            self.expect(TokenKind::RBrace)?;
            self.pop_scope();
            Some(statements)
        } else {
            // bodyless: a forward declaration / external function
            self.expect(TokenKind::Semi)?;
            None
        };

        Ok(FunctionDecl {
            name,
            return_type,
            is_public: true,
            params,
            body,
            detached,
        })
    }

    fn parse_statement(&mut self) -> Result<Stmt, Diagnostic> {
        match self.lexer.peek()?.kind {
            TokenKind::Return => {
                self.lexer.consume()?;

                if self.lexer.peek_is(TokenKind::Semi)? {
                    self.lexer.consume()?;
                    return Ok(Stmt::Return { value: None });
                }

                let value = self.parse_expression(TokenKind::Semi)?;
                self.expect(TokenKind::Semi)?;
                Ok(Stmt::Return { value: Some(value) })
            }
            TokenKind::If => {
                self.lexer.consume()?;

                self.expect(TokenKind::LParen)?;
                let condition = self.parse_expression(TokenKind::RParen)?;
                self.expect(TokenKind::RParen)?;

                self.expect(TokenKind::LBrace)?;
                let mut true_body = Vec::new();
                while !self.lexer.peek_is(TokenKind::RBrace)? {
                    true_body.push(self.parse_statement()?);
                }
                self.expect(TokenKind::RBrace)?;

                let false_body = if self.lexer.peek_is(TokenKind::Else)? {
                    self.lexer.consume()?;
                    self.expect(TokenKind::LBrace)?;
                    let mut body = Vec::new();
                    while !self.lexer.peek_is(TokenKind::RBrace)? {
                        body.push(self.parse_statement()?);
                    }
                    self.expect(TokenKind::RBrace)?;
                    Some(body)
                } else {
                    None
                };

                Ok(Stmt::If {
                    condition,
                    true_body,
                    false_body,
                })
            }
            TokenKind::While => {
                self.lexer.consume()?;

                self.expect(TokenKind::LParen)?;
                let condition = self.parse_expression(TokenKind::RParen)?;
                self.expect(TokenKind::RParen)?;

                self.expect(TokenKind::LBrace)?;
                let mut body = Vec::new();
                while !self.lexer.peek_is(TokenKind::RBrace)? {
                    body.push(self.parse_statement()?);
                }
                self.expect(TokenKind::RBrace)?;

                Ok(Stmt::While { condition, body })
            }
            _ => self.parse_simple_statement(),
        }
    }

    /// Declarations, assignments, and call statements: anything that does not
    /// start with a statement keyword.
    fn parse_simple_statement(&mut self) -> Result<Stmt, Diagnostic> {
        if let Some(ty) = self.parse_type()? {
            // variable declaration with optional initializer
            let name_token = self.expect(TokenKind::Identifier)?;
            self.validate_identifier(&name_token)?;

            let init = if self.lexer.peek_is(TokenKind::Equals)? {
                self.lexer.consume()?;
                Some(self.parse_expression(TokenKind::Semi)?)
            } else {
                None
            };
            self.expect(TokenKind::Semi)?;

            // indexed after the initializer: `int x = x;` does not resolve
            self.index_variable(name_token.text.clone(), ty.clone());

            return Ok(Stmt::VarDecl {
                ty,
                name: name_token.text,
                init,
            });
        }

        // detached function call statement
        if self.lexer.peek_is(TokenKind::Identifier)?
            && self.lexer.peek_is_at(TokenKind::LParen, 1)?
        {
            let name_token = self.expect(TokenKind::Identifier)?;
            self.validate_identifier(&name_token)?;
            self.expect(TokenKind::LParen)?;
            let call = self.finish_function_call(name_token.text)?;
            self.expect(TokenKind::Semi)?;
            return Ok(Stmt::Expr(call));
        }

        let (target, _derived) = self.parse_value()?;

        // a method call in statement position needs no assignment
        if matches!(target, Expr::Call { .. }) {
            self.expect(TokenKind::Semi)?;
            return Ok(Stmt::Expr(target));
        }

        self.expect(TokenKind::Equals)?;
        let value = self.parse_expression(TokenKind::Semi)?;
        self.expect(TokenKind::Semi)?;

        Ok(Stmt::Assign { target, value })
    }

    /// Consume a type (with `ptr` and `[len]` modifiers) if one starts here.
    /// Pointers wrap the named type first; the array modifier wraps the
    /// result. A length of zero means "not an array".
    fn parse_type(&mut self) -> Result<Option<Type>, Diagnostic> {
        let mut ptrs = 0;
        while self.lexer.peek_is(TokenKind::Ptr)? {
            ptrs += 1;
            self.lexer.consume()?;
        }

        let name = self.lexer.peek()?.text;
        let Some(base) = self.types.get(&name).cloned() else {
            if ptrs > 0 {
                return Err(self.syntax_error(format!("Expected type name, found '{}'", name)));
            }
            return Ok(None);
        };
        self.lexer.consume()?;

        let mut array_len = 0;
        if self.lexer.peek_is(TokenKind::LBracket)? {
            self.lexer.consume()?;
            let literal = self.expect(TokenKind::IntLit)?;
            array_len = self.parse_int_literal(&literal)?;
            self.expect(TokenKind::RBracket)?;
        }

        let mut ty = base;
        for _ in 0..ptrs {
            ty = Type::Pointer(Rc::new(ty));
        }
        if array_len > 0 {
            ty = Type::Array {
                element: Rc::new(ty),
                len: array_len as u32,
            };
        }

        Ok(Some(ty))
    }

    fn expect_type(&mut self) -> Result<Type, Diagnostic> {
        match self.parse_type()? {
            Some(ty) => Ok(ty),
            None => {
                let found = self.lexer.peek()?.text.clone();
                Err(self.syntax_error(format!("Expected type name, found '{}'", found)))
            }
        }
    }

    /// Count the tokens the next type occupies without consuming anything.
    fn next_type_length(&mut self) -> Result<usize, Diagnostic> {
        let mut i = 0;

        while self.lexer.peek_is_at(TokenKind::Ptr, i)? {
            i += 1;
        }

        if self.lexer.peek_is_at(TokenKind::Identifier, i)? {
            i += 1;
        }

        if self.lexer.peek_is_at(TokenKind::LBracket, i)? {
            i += 1;
            if self.lexer.peek_is_at(TokenKind::IntLit, i)? {
                i += 1;
            }
            if self.lexer.peek_is_at(TokenKind::RBracket, i)? {
                i += 1;
            }
        }

        Ok(i)
    }

    /// All integer literal sites accept an optional 0x/0X prefix.
    fn parse_int_literal(&mut self, token: &Token) -> Result<i32, Diagnostic> {
        let text = &token.text;
        let parsed = if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X"))
        {
            i32::from_str_radix(hex, 16)
        } else {
            text.parse::<i32>()
        };
        parsed.map_err(|_| self.error_at_token(token, format!("Invalid integer literal '{}'", text)))
    }

    fn parse_float_literal(&mut self, token: &Token) -> Result<f32, Diagnostic> {
        token
            .text
            .parse::<f32>()
            .map_err(|_| self.error_at_token(token, format!("Invalid float literal '{}'", token.text)))
    }

    // ---- parsing utils ----

    fn expect(&mut self, kind: TokenKind) -> Result<Token, Diagnostic> {
        if self.lexer.peek()?.kind != kind {
            return Err(self.syntax_error(format!("Expected token: '{}'", describe(kind))));
        }
        self.lexer.consume()
    }

    fn validate_identifier(&mut self, token: &Token) -> Result<(), Diagnostic> {
        if token.text.contains('_') {
            return Err(self.error_at_token(
                token,
                format!(
                    "Invalid identifier '{}': underscores are not allowed in identifiers",
                    token.text
                ),
            ));
        }
        Ok(())
    }

    fn location_here(&mut self) -> SourceLocation {
        let (row, col, token_text) = match self.lexer.peek() {
            Ok(token) => (token.row, token.col, token.text),
            Err(_) => (0, 0, String::new()),
        };
        SourceLocation {
            file: self.current_file.clone(),
            class_name: self.current_class.clone(),
            row,
            col,
            token_text,
        }
    }

    pub(crate) fn syntax_error(&mut self, message: impl Into<String>) -> Diagnostic {
        let location = self.location_here();
        Diagnostic::syntax(message).at(location)
    }

    pub(crate) fn semantic_error(&mut self, message: impl Into<String>) -> Diagnostic {
        let location = self.location_here();
        Diagnostic::semantic(message).at(location)
    }

    fn error_at_token(&self, token: &Token, message: impl Into<String>) -> Diagnostic {
        Diagnostic::syntax(message).at(SourceLocation {
            file: self.current_file.clone(),
            class_name: self.current_class.clone(),
            row: token.row,
            col: token.col,
            token_text: token.text.clone(),
        })
    }

    // ---- variable utils ----

    fn push_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    fn index_variable(&mut self, name: String, ty: Type) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name, ty);
        }
    }

    pub(crate) fn lookup_variable(&self, name: &str) -> Option<Type> {
        for scope in self.scopes.iter().rev() {
            if let Some(ty) = scope.get(name) {
                return Some(ty.clone());
            }
        }
        None
    }

    // ---- type utils ----

    fn register_primitive(&mut self, name: &str, kind: Primitive, signed: bool) {
        self.types
            .insert(name.to_string(), Type::primitive(kind, signed));
    }

    pub(crate) fn lookup_function_return_type(&self, name: &str) -> Option<Type> {
        self.functions
            .iter()
            .find(|function| function.name == name)
            .map(|function| function.return_type.clone())
    }

    pub(crate) fn in_class(&self) -> &str {
        &self.current_class
    }
}

#[cfg(test)]
mod tests {
    use super::ast::{BinaryOp, Expr, Primitive, Stmt, Type};
    use super::*;

    fn parse(source: &str) -> ParseOutput {
        Parser::new(source, "").parse().expect("parses")
    }

    fn parse_err(source: &str) -> Diagnostic {
        Parser::new(source, "").parse().expect_err("should fail")
    }

    fn body(output: &ParseOutput, name: &str) -> Vec<Stmt> {
        output
            .functions
            .iter()
            .find(|f| f.name == name)
            .unwrap_or_else(|| panic!("no function '{}'", name))
            .body
            .clone()
            .expect("has body")
    }

    #[test]
    fn minimal_function() {
        let output = parse("int main() { return 0; }");
        assert_eq!(output.functions.len(), 1);
        let main = &output.functions[0];
        assert_eq!(main.name, "main");
        assert!(main.detached);
        assert!(main.is_public);
        assert_eq!(main.params.len(), 0);
        assert_eq!(
            body(&output, "main"),
            vec![Stmt::Return {
                value: Some(Expr::IntLiteral(0))
            }]
        );
    }

    #[test]
    fn bodyless_function_is_forward_declaration() {
        let output = parse("int getchar();");
        assert!(output.functions[0].body.is_none());
    }

    #[test]
    fn pointer_and_array_types() {
        let output = parse("int f(ptr int a, int b[4]) { return 0; }");
        let params = &output.functions[0].params;
        assert!(matches!(&params[0].1, Type::Pointer(t) if t.is_integer()));
        match &params[1].1 {
            Type::Array { element, len } => {
                assert_eq!(*len, 4);
                assert!(element.is_integer());
            }
            other => panic!("expected array type, got {:?}", other),
        }
    }

    #[test]
    fn array_of_pointers_wraps_pointer_first() {
        let output = parse("int f() { ptr int a[3]; return 0; }");
        match &body(&output, "f")[0] {
            Stmt::VarDecl { ty: Type::Array { element, len }, .. } => {
                assert_eq!(*len, 3);
                assert!(matches!(element.as_ref(), Type::Pointer(_)));
            }
            other => panic!("expected array decl, got {:?}", other),
        }
    }

    #[test]
    fn operator_precedence_folds_right() {
        let output = parse("int f() { return 1 + 2 * 3; }");
        match &body(&output, "f")[0] {
            Stmt::Return { value: Some(Expr::Binary { op, rhs, .. }) } => {
                assert_eq!(*op, BinaryOp::Add);
                assert!(matches!(
                    rhs.as_ref(),
                    Expr::Binary { op: BinaryOp::Multiply, .. }
                ));
            }
            other => panic!("expected binary return, got {:?}", other),
        }
    }

    #[test]
    fn equality_is_two_equals_tokens() {
        let output = parse("int f(int a) { if (a == 3) { return 1; } return 0; }");
        match &body(&output, "f")[0] {
            Stmt::If { condition, .. } => {
                assert!(matches!(condition, Expr::Binary { op: BinaryOp::Equal, .. }));
            }
            other => panic!("expected if, got {:?}", other),
        }
    }

    #[test]
    fn lone_equals_in_expression_is_rejected() {
        let err = parse_err("int f(int a) { return a = 3; }");
        assert!(err.message.contains("did you mean '=='?"));
    }

    #[test]
    fn hex_literals_accepted_everywhere() {
        let output = parse("intdef FLAGS 0x10;\nint f() { int a[0x2]; a[0] = 0x1F; a[1] = FLAGS; return a[0]; }");
        match &body(&output, "f")[1] {
            Stmt::Assign { value, .. } => assert_eq!(*value, Expr::IntLiteral(0x1F)),
            other => panic!("expected assignment, got {:?}", other),
        }
        match &body(&output, "f")[2] {
            Stmt::Assign { value, .. } => assert_eq!(*value, Expr::IntLiteral(0x10)),
            other => panic!("expected assignment, got {:?}", other),
        }
    }

    #[test]
    fn underscores_are_rejected_by_the_parser() {
        let err = parse_err("int my_func() { return 0; }");
        assert!(err.message.contains("underscores are not allowed"));
    }

    #[test]
    fn undefined_variable_is_semantic_error() {
        let err = parse_err("int f() { return q; }");
        assert_eq!(err.kind, crate::errors::ErrorKind::Semantic);
        assert!(err.message.contains("Undefined variable 'q'"));
    }

    #[test]
    fn missing_semicolon_reports_expected_token() {
        let err = parse_err("int main() { return 1 }");
        assert_eq!(err.kind, crate::errors::ErrorKind::Syntax);
        assert!(err.message.contains("Expected token: ';'"));
        let loc = err.location.expect("has location");
        assert_eq!(loc.token_text, "}");
    }

    #[test]
    fn class_members_keep_declaration_order() {
        let output = parse("class Point { int x; int y; long z; }");
        let class = &output.classes[0];
        assert_eq!(class.name(), "Point");
        assert_eq!(class.member_index("x"), Some(0));
        assert_eq!(class.member_index("y"), Some(1));
        assert_eq!(class.member_index("z"), Some(2));
    }

    #[test]
    fn split_class_declarations_append_members() {
        let output = parse("class A { int x; }\nclass A { int y; }");
        assert_eq!(output.classes.len(), 1);
        let class = &output.classes[0];
        assert_eq!(class.member_index("x"), Some(0));
        assert_eq!(class.member_index("y"), Some(1));
    }

    #[test]
    fn class_can_reference_itself_through_a_pointer() {
        let output = parse("class Node { int value; ptr Node next; }");
        let class = &output.classes[0];
        let next = class.member_type("next").expect("has next");
        match next {
            Type::Pointer(inner) => match inner.as_ref() {
                Type::Class(decl) => assert_eq!(decl.name(), "Node"),
                other => panic!("expected class pointee, got {:?}", other),
            },
            other => panic!("expected pointer member, got {:?}", other),
        }
    }

    #[test]
    fn methods_get_mangled_names_and_implicit_this() {
        let output = parse("class Point { int x; int y; int sum() { return x + y; } }");
        let sum = output
            .functions
            .iter()
            .find(|f| f.name == "Point_sum")
            .expect("method parsed");
        assert!(!sum.detached);
        assert_eq!(sum.params.len(), 1);
        assert_eq!(sum.params[0].0, "this");
        match &sum.params[0].1 {
            Type::Pointer(inner) => assert!(matches!(inner.as_ref(), Type::Class(_))),
            other => panic!("expected pointer this, got {:?}", other),
        }
    }

    #[test]
    fn bare_members_resolve_through_this() {
        let output = parse("class Point { int x; int y; int sum() { return x + y; } }");
        let sum_body = body(&output, "Point_sum");
        match &sum_body[0] {
            Stmt::Return { value: Some(Expr::Binary { lhs, .. }) } => match lhs.as_ref() {
                Expr::StructAccess { target, member, .. } => {
                    assert_eq!(member, "x");
                    assert!(matches!(
                        target.as_ref(),
                        Expr::Deref { target: inner, .. }
                            if matches!(inner.as_ref(), Expr::Variable { name, .. } if name == "this")
                    ));
                }
                other => panic!("expected member access, got {:?}", other),
            },
            other => panic!("expected return, got {:?}", other),
        }
    }

    #[test]
    fn parameters_shadow_members() {
        let output =
            parse("class Point { int x; int y; int pick(int x) { return x; } }");
        let pick_body = body(&output, "Point_pick");
        match &pick_body[0] {
            Stmt::Return { value: Some(Expr::Variable { name, .. }) } => assert_eq!(name, "x"),
            other => panic!("expected plain variable, got {:?}", other),
        }
    }

    #[test]
    fn method_call_desugars_to_mangled_free_call() {
        let output = parse(
            "class Point { int x; int y; int sum() { return x + y; } }\n\
             int run() { Point p; return p.sum(); }",
        );
        let run_body = body(&output, "run");
        match &run_body[1] {
            Stmt::Return { value: Some(Expr::Call { name, args, .. }) } => {
                assert_eq!(name, "Point_sum");
                assert_eq!(args.len(), 1);
                assert!(matches!(
                    &args[0],
                    Expr::AddressOf { target, .. }
                        if matches!(target.as_ref(), Expr::Variable { name, .. } if name == "p")
                ));
            }
            other => panic!("expected desugared call, got {:?}", other),
        }
    }

    #[test]
    fn method_call_through_pointer_auto_dereferences() {
        let output = parse(
            "class Point { int x; int sum() { return x; } }\n\
             int run(ptr Point p) { return p.sum(); }",
        );
        let run_body = body(&output, "run");
        match &run_body[0] {
            Stmt::Return { value: Some(Expr::Call { name, args, .. }) } => {
                assert_eq!(name, "Point_sum");
                assert!(matches!(
                    &args[0],
                    Expr::AddressOf { target, .. } if matches!(target.as_ref(), Expr::Deref { .. })
                ));
            }
            other => panic!("expected desugared call, got {:?}", other),
        }
    }

    #[test]
    fn dollar_peels_one_pointer_layer() {
        let output = parse("int f(ptr int p) { return $p; }");
        match &body(&output, "f")[0] {
            Stmt::Return { value: Some(Expr::Deref { pointee, .. }) } => {
                assert!(pointee.is_integer());
            }
            other => panic!("expected deref, got {:?}", other),
        }
    }

    #[test]
    fn deref_of_non_pointer_is_rejected() {
        let err = parse_err("int f(int a) { return $a; }");
        assert!(err.message.contains("Cannot dereference non-pointer type"));
    }

    #[test]
    fn subscript_distinguishes_arrays_and_pointers() {
        let output = parse("int f(ptr int p) { int a[4]; return a[0] + p[1]; }");
        match &body(&output, "f")[1] {
            Stmt::Return { value: Some(Expr::Binary { lhs, rhs, .. }) } => {
                assert!(matches!(lhs.as_ref(), Expr::ArrayAccess { .. }));
                assert!(matches!(rhs.as_ref(), Expr::PointerIndex { .. }));
            }
            other => panic!("expected return, got {:?}", other),
        }
    }

    #[test]
    fn subscript_on_scalar_is_rejected() {
        let err = parse_err("int f(int a) { return a[0]; }");
        assert!(err.message.contains("non-array/non-pointer"));
    }

    #[test]
    fn signedness_mismatch_in_binary_op() {
        let err = parse_err("int f(int a, uint b) { return a + b; }");
        assert!(err.message.contains("different signedness"));
    }

    #[test]
    fn signedness_propagates_from_declared_types() {
        let output = parse("uint f(uint a, uint b) { return a + b; }");
        match &body(&output, "f")[0] {
            Stmt::Return { value: Some(expr) } => assert!(!expr.is_signed()),
            other => panic!("expected return, got {:?}", other),
        }
    }

    #[test]
    fn typedef_aliases_resolve() {
        let output = parse("typedef i32 int;\ni32 f(i32 a) { return a; }");
        assert!(output.functions[0].return_type.is_integer());
        assert!(matches!(
            output.functions[0].return_type,
            Type::Primitive { kind: Primitive::Int, signed: true }
        ));
    }

    #[test]
    fn call_to_undefined_function_is_semantic_error() {
        let err = parse_err("int f() { return g(); }");
        assert!(err.message.contains("Call to undefined function 'g'"));
    }

    #[test]
    fn member_function_requires_instance() {
        // the mangled name itself is unwritable: it contains an underscore
        let err = parse_err(
            "class A { int x; int m() { return x; } int n() { return A_m(); } }",
        );
        assert!(err.message.contains("underscores are not allowed"));
    }

    #[test]
    fn address_of_applies_after_postfix_chain() {
        let output = parse("class P { int x; }\nint f() { P p; ptr int q; q = &p.x; return 0; }");
        match &body(&output, "f")[2] {
            Stmt::Assign { value, .. } => {
                assert!(matches!(
                    value,
                    Expr::AddressOf { target, .. }
                        if matches!(target.as_ref(), Expr::StructAccess { .. })
                ));
            }
            other => panic!("expected assignment, got {:?}", other),
        }
    }
}
