use std::error::Error;
use std::fmt;

/// What stage of the compiler rejected the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Syntax,
    Semantic,
    Codegen,
    Internal,
}

impl ErrorKind {
    fn label(self) -> &'static str {
        match self {
            ErrorKind::Syntax => "Syntax Error",
            ErrorKind::Semantic => "Semantic Error",
            ErrorKind::Codegen => "Code Generation Error",
            ErrorKind::Internal => "Internal Compiler Error",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceLocation {
    pub file: String,
    pub class_name: String,
    pub row: u32,
    pub col: u32,
    pub token_text: String,
}

/// A fatal compile error. The compiler never recovers: the first diagnostic
/// produced propagates out to the driver, which prints it and exits non-zero.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub kind: ErrorKind,
    pub message: String,
    pub location: Option<SourceLocation>,
}

impl Diagnostic {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            location: None,
        }
    }

    pub fn syntax(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Syntax, message)
    }

    pub fn semantic(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Semantic, message)
    }

    pub fn codegen(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Codegen, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn at(mut self, location: SourceLocation) -> Self {
        self.location = Some(location);
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.label(), self.message)?;

        if let Some(loc) = &self.location {
            if loc.row > 0 && loc.col > 0 {
                write!(f, "\n  at line {}, column {}", loc.row, loc.col)?;
                if !loc.token_text.is_empty() {
                    write!(f, " (token: '{}')", loc.token_text)?;
                }
            }
            if !loc.class_name.is_empty() {
                write!(f, "\n  in class '{}'", loc.class_name)?;
            }
            if !loc.file.is_empty() {
                write!(f, "\n  in file '{}'", loc.file)?;
            }
        }

        Ok(())
    }
}

impl Error for Diagnostic {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_without_location() {
        let diag = Diagnostic::codegen("Division requires integer operands");
        assert_eq!(
            diag.to_string(),
            "Code Generation Error: Division requires integer operands"
        );
    }

    #[test]
    fn display_with_full_location() {
        let diag = Diagnostic::syntax("Expected token: ';'").at(SourceLocation {
            file: "main.ax".to_string(),
            class_name: "Point".to_string(),
            row: 3,
            col: 14,
            token_text: "}".to_string(),
        });
        let rendered = diag.to_string();
        assert!(rendered.starts_with("Syntax Error: Expected token: ';'"));
        assert!(rendered.contains("at line 3, column 14 (token: '}')"));
        assert!(rendered.contains("in class 'Point'"));
        assert!(rendered.contains("in file 'main.ax'"));
    }
}
