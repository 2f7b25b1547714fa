use std::env;
use std::fs;
use std::process;

use axc::errors::Diagnostic;

fn main() {
    if let Err(err) = run() {
        eprintln!("{}", err);
        process::exit(1);
    }
}

fn run() -> Result<(), Diagnostic> {
    let args = env::args().skip(1).collect::<Vec<_>>();

    let mut src_file = String::new();
    let mut output_file = String::new();

    let mut index = 0;
    while index < args.len() {
        match args[index].as_str() {
            "-f" => {
                index += 1;
                src_file = args
                    .get(index)
                    .cloned()
                    .ok_or_else(|| Diagnostic::syntax("Missing value for argument: -f"))?;
            }
            "-o" => {
                index += 1;
                output_file = args
                    .get(index)
                    .cloned()
                    .ok_or_else(|| Diagnostic::syntax("Missing value for argument: -o"))?;
            }
            other => {
                return Err(Diagnostic::syntax(format!("Invalid argument: '{}'", other)));
            }
        }
        index += 1;
    }

    if src_file.is_empty() {
        return Err(Diagnostic::syntax("Missing required argument: -f <source file>"));
    }

    let source = fs::read_to_string(&src_file)
        .map_err(|_| Diagnostic::syntax(format!("Could not open file: '{}'", src_file)))?;

    if output_file.is_empty() {
        println!("{}", axc::compile_to_clif(&source, &src_file)?);
    } else {
        // the object file is only written after the module verified
        let bytes = axc::compile_to_object(&source, &src_file)?;
        fs::write(&output_file, bytes).map_err(|err| {
            Diagnostic::codegen(format!("Could not write output file '{}': {}", output_file, err))
        })?;
    }

    Ok(())
}
