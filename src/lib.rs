//! axc - compiler for the ax language.
//!
//! ax is a small statically-typed imperative language: primitive numeric
//! types, pointers, fixed-size arrays, classes with methods, free functions,
//! textual imports, `typedef` aliases and `intdef` constants. The compiler
//! parses a root file (resolving imports transitively), builds a typed AST,
//! and lowers it through Cranelift to either textual IR or a native object
//! file for the host.

pub mod codegen;
pub mod errors;
pub mod lexer;
pub mod parser;

use std::path::Path;

use codegen::Codegen;
use errors::Diagnostic;
use parser::Parser;

/// Compiler version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Compile a source file to textual backend IR.
///
/// `file_path` is used for import resolution and error reporting; it may be
/// empty for in-memory sources (imports then resolve against the working
/// directory).
pub fn compile_to_clif(source: &str, file_path: &str) -> Result<String, Diagnostic> {
    let output = Parser::new(source, file_path).parse()?;
    let module = codegen::native_object_module(&module_name(file_path))?;
    let mut codegen = Codegen::new(module);
    codegen.compile(&output)?;
    Ok(codegen.clif_text())
}

/// Compile a source file to a native object file for the host target.
pub fn compile_to_object(source: &str, file_path: &str) -> Result<Vec<u8>, Diagnostic> {
    let output = Parser::new(source, file_path).parse()?;
    let module = codegen::native_object_module(&module_name(file_path))?;
    let mut codegen = Codegen::new(module);
    codegen.compile(&output)?;

    let product = codegen.finish().finish();
    product
        .emit()
        .map_err(|err| Diagnostic::codegen(format!("Failed to emit object bytes: {}", err)))
}

fn module_name(file_path: &str) -> String {
    Path::new(file_path)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .filter(|stem| !stem.is_empty())
        .unwrap_or("main")
        .to_string()
}
