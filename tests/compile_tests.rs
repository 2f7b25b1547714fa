//! End-to-end tests: source text in, verified backend IR (or object bytes) out.

use std::fs;
use std::path::PathBuf;

use axc::errors::ErrorKind;
use axc::{compile_to_clif, compile_to_object};

fn clif(source: &str) -> String {
    compile_to_clif(source, "").expect("source should compile")
}

/// Count non-overlapping occurrences of `needle`.
fn count(haystack: &str, needle: &str) -> usize {
    haystack.matches(needle).count()
}

#[test]
fn minimal_program() {
    let text = clif("int main() { return 0; }");
    assert!(text.contains("function %main"));
    assert!(text.contains("iconst.i32 0"));
    assert!(text.contains("return"));
}

#[test]
fn empty_file_lowers_to_an_empty_module() {
    assert_eq!(clif(""), "");
}

#[test]
fn compilation_is_deterministic() {
    let source = r#"
        class Point { int x; int y; int sum() { return x + y; } }
        int run() { Point p; p.x = 3; p.y = 4; return p.sum(); }
    "#;
    assert_eq!(clif(source), clif(source));
}

#[test]
fn pointer_indexing_scales_and_loads() {
    let text = clif(
        "int sum(ptr int a, int n) {\n\
           int total = 0;\n\
           int i = 0;\n\
           while (i < n) { total = total + a[i]; i = i + 1; }\n\
           return total;\n\
         }",
    );
    // a[i]: the index is widened, scaled by the element size, added to the
    // loaded pointer, and the element loaded; no bounds check appears
    assert!(text.contains("imul_imm"));
    assert!(text.contains("load.i32"));
    assert!(text.contains("brif"));
    assert!(!text.contains("trap"));
}

#[test]
fn while_loop_shape() {
    let text = clif("int f(int n) { int i = 0; while (i < n) { i = i + 1; } return i; }");
    // cond / body / exit blocks plus the entry
    assert!(count(&text, "block") >= 4);
    assert!(text.contains("jump"));
    assert!(text.contains("brif"));
}

#[test]
fn class_with_method() {
    let text = clif(
        "class Point { int x; int y; int sum() { return x + y; } }\n\
         int run() { Point p; p.x = 3; p.y = 4; return p.sum(); }",
    );
    assert!(text.contains("function %Point_sum"));
    assert!(text.contains("function %run"));
    // p.y lives four bytes past p.x
    assert!(text.contains("iadd_imm"));
    assert!(text.contains(", 4"));
    // run passes &p to the method
    assert!(text.contains("call"));
    assert!(text.contains("stack_addr"));
}

#[test]
fn method_reads_members_through_this() {
    let text = clif("class P { int x; int v() { return x; } }");
    // the this pointer is reloaded from its slot, then the member loaded
    assert!(text.contains("function %P_v"));
    assert!(text.contains("load.i32"));
}

#[test]
fn signed_comparison_and_division() {
    let text = clif("int f(int a, int b) { if (a < b) { return a / b; } return 0; }");
    assert!(text.contains("slt"));
    assert!(text.contains("sdiv"));
}

#[test]
fn unsigned_comparison_and_division() {
    let text = clif("uint f(uint a, uint b) { if (a < b) { return a / b; } return 0; }");
    assert!(text.contains("ult"));
    assert!(text.contains("udiv"));
}

#[test]
fn integer_widening_follows_expression_signedness() {
    let signed = clif("long f(int a) { long b = a; return b; }");
    assert!(signed.contains("sextend"));

    let unsigned = clif("ulong f(uint a) { ulong b = a; return b; }");
    assert!(unsigned.contains("uextend"));

    let narrowing = clif("char f(int a) { char c = a; return c; }");
    assert!(narrowing.contains("ireduce"));
}

#[test]
fn both_branches_returning_emits_no_void_return() {
    let text = clif("int f(int c) { if (c) { return 1; } else { return 2; } }");
    // two value returns and no bare `return`
    assert_eq!(count(&text, "return v"), 2);
    assert!(!text.lines().any(|line| line.trim() == "return"));
}

#[test]
fn nested_ifs_where_all_paths_return_still_verify() {
    let text = clif(
        "int f(int a, int b) {\n\
           if (a) {\n\
             if (b) { return 1; } else { return 2; }\n\
           } else { return 3; }\n\
         }",
    );
    assert!(text.contains("function %f"));
}

#[test]
fn void_function_gets_implicit_return() {
    let text = clif("void noop() { }");
    assert!(text.lines().any(|line| line.trim() == "return"));
}

#[test]
fn falling_off_a_non_void_function_is_rejected() {
    let err = compile_to_clif("int f(int c) { if (c) { return 1; } }", "").unwrap_err();
    assert_eq!(err.kind, ErrorKind::Codegen);
    assert!(err.message.contains("without returning a value"));
}

#[test]
fn bodyless_function_becomes_external_declaration() {
    let text = clif("int getchar();\nint main() { return getchar(); }");
    assert!(text.contains("function %main"));
    assert!(!text.contains("function %getchar"));
    assert!(text.contains("call"));
}

#[test]
fn string_literals_lower_to_interned_data() {
    let text = clif(
        "int puts(ptr uchar s);\n\
         int main() { puts(\"hello\"); puts(\"hello\"); return 0; }",
    );
    // the literal is materialized as data and loaded by address
    assert!(text.contains("global_value"));
    assert_eq!(count(&text, "call"), 2);
}

#[test]
fn intdef_constants_fold_to_literals() {
    let text = clif("intdef LIMIT 0x10;\nint f() { return LIMIT; }");
    assert!(text.contains("iconst.i32 16"));
}

#[test]
fn typedef_aliases_compile() {
    let text = clif("typedef i32 int;\ni32 f(i32 a) { return a; }");
    assert!(text.contains("function %f"));
}

#[test]
fn syntax_error_reports_location_and_exits_compile() {
    let err = compile_to_clif("int main() { return 1 }", "").unwrap_err();
    assert_eq!(err.kind, ErrorKind::Syntax);
    assert!(err.message.contains("Expected token: ';'"));
    let location = err.location.expect("location attached");
    assert_eq!(location.token_text, "}");
    assert!(location.row >= 1);
}

#[test]
fn undefined_variable_reports_semantic_error() {
    let err = compile_to_clif("int f() { return q; }", "").unwrap_err();
    assert_eq!(err.kind, ErrorKind::Semantic);
    assert!(err.message.contains("Undefined variable 'q'"));
}

#[test]
fn object_emission_produces_bytes() {
    let bytes = compile_to_object("int main() { return 0; }", "main.ax").expect("object builds");
    assert!(!bytes.is_empty());
}

fn scratch_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("axc-test-{}-{}", tag, std::process::id()));
    fs::create_dir_all(&dir).expect("create scratch dir");
    dir
}

#[test]
fn imports_are_parsed_exactly_once() {
    let dir = scratch_dir("imports");
    fs::write(dir.join("common.ax"), "int common() { return 1; }\n").unwrap();
    fs::write(dir.join("a.ax"), "import \"common.ax\";\nint a() { return common(); }\n").unwrap();
    fs::write(
        dir.join("b.ax"),
        "import \"./common.ax\";\nint b() { return common(); }\n",
    )
    .unwrap();
    let root = dir.join("root.ax");
    fs::write(
        &root,
        "import \"a.ax\";\nimport \"b.ax\";\nint main() { return a() + b(); }\n",
    )
    .unwrap();

    let source = fs::read_to_string(&root).unwrap();
    let text = compile_to_clif(&source, root.to_str().unwrap()).expect("compiles");

    // common.ax canonicalizes to one path and is compiled once, even though
    // it is spelled two ways
    assert_eq!(count(&text, "function %common"), 1);
    assert_eq!(count(&text, "function %a"), 1);
    assert_eq!(count(&text, "function %b"), 1);
    assert!(text.contains("function %main"));

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn missing_import_is_a_semantic_error() {
    let err = compile_to_clif("import \"nope-not-here.ax\";\n", "").unwrap_err();
    assert_eq!(err.kind, ErrorKind::Semantic);
    assert!(err.message.contains("Cannot import nonexistent file"));
}

#[test]
fn import_cycles_do_not_reparse() {
    let dir = scratch_dir("cycle");
    let first = dir.join("first.ax");
    let second = dir.join("second.ax");
    fs::write(&first, "import \"second.ax\";\nint one() { return 1; }\n").unwrap();
    fs::write(&second, "import \"first.ax\";\nint two() { return 2; }\n").unwrap();

    let source = fs::read_to_string(&first).unwrap();
    let text = compile_to_clif(&source, first.to_str().unwrap()).expect("compiles");
    assert_eq!(count(&text, "function %one"), 1);
    assert_eq!(count(&text, "function %two"), 1);

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn pointer_arithmetic_in_expressions() {
    let text = clif("ptr int next(ptr int p) { return p + 1; }");
    // stride is the pointee size
    assert!(text.contains("imul_imm") || text.contains("iadd"));
    assert!(text.contains("function %next"));
}

#[test]
fn address_of_and_deref_round_trip() {
    let text = clif(
        "int f() { int x; ptr int p; x = 41; p = &x; $p = $p + 1; return x; }",
    );
    assert!(text.contains("function %f"));
    assert!(text.contains("stack_addr"));
    assert!(text.contains("load.i32"));
}

#[test]
fn arrays_inside_classes() {
    let text = clif(
        "class Buf { int len; int data[4]; }\n\
         int f() { Buf b; b.len = 2; b.data[1] = 7; return b.data[1]; }",
    );
    assert!(text.contains("function %f"));
    // data starts after len
    assert!(text.contains("iadd_imm"));
}
