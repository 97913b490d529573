//! TypeScript support for host and worker scripts
//!
//! Scripts with a TypeScript extension are run through the OXC pipeline
//! (parse, semantic, transform, codegen) before Boa sees them. Plain
//! JavaScript is passed through untouched.

use oxc_allocator::Allocator;
use oxc_codegen::{Codegen, CodegenOptions};
use oxc_parser::Parser;
use oxc_semantic::SemanticBuilder;
use oxc_span::SourceType;
use oxc_transformer::{TransformOptions, Transformer};
use std::path::Path;
use thiserror::Error;
use tracing::warn;

/// Errors that can occur during TypeScript transpilation
#[derive(Error, Debug)]
pub enum TranspileError {
    #[error("Failed to parse TypeScript: {0}")]
    ParseError(String),

    #[error("Failed to transform TypeScript: {0}")]
    TransformError(String),

    #[error("Invalid source type: {0}")]
    InvalidSourceType(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Result type for transpilation operations
pub type TranspileResult<T> = Result<T, TranspileError>;

const TS_EXTENSIONS: &[&str] = &["ts", "mts", "cts", "tsx"];

/// Configuration for the TypeScript transpiler
#[derive(Debug, Clone, Default)]
pub struct TranspilerConfig {
    /// Whether to minify the output
    pub minify: bool,
}

/// Whether a script path or URL path needs transpiling before evaluation
pub fn needs_transpile(path: &str) -> bool {
    Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| TS_EXTENSIONS.contains(&ext))
}

/// TypeScript to JavaScript transpiler
#[derive(Debug, Clone, Default)]
pub struct Transpiler {
    config: TranspilerConfig,
}

impl Transpiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: TranspilerConfig) -> Self {
        Self { config }
    }

    /// Transpile source code; `filename` selects the source type (.ts, .tsx, ...)
    pub fn transpile(&self, source: &str, filename: &str) -> TranspileResult<String> {
        let allocator = Allocator::default();

        let source_type = SourceType::from_path(filename).map_err(|e| {
            TranspileError::InvalidSourceType(format!("Unknown file extension: {:?}", e))
        })?;

        let parser_return = Parser::new(&allocator, source, source_type).parse();
        if !parser_return.errors.is_empty() {
            let error_messages: Vec<String> = parser_return
                .errors
                .iter()
                .map(|e| e.to_string())
                .collect();
            return Err(TranspileError::ParseError(error_messages.join("\n")));
        }

        let mut program = parser_return.program;

        // Semantic errors are reported but do not stop the build
        let semantic_ret = SemanticBuilder::new().build(&program);
        for error in &semantic_ret.errors {
            warn!(filename, "{}", error);
        }
        let scoping = semantic_ret.semantic.into_scoping();

        let transform_options = TransformOptions::default();
        let transformer_return = Transformer::new(&allocator, Path::new(filename), &transform_options)
            .build_with_scoping(scoping, &mut program);

        if !transformer_return.errors.is_empty() {
            let error_messages: Vec<String> = transformer_return
                .errors
                .iter()
                .map(|e| e.to_string())
                .collect();
            return Err(TranspileError::TransformError(error_messages.join("\n")));
        }

        let codegen_options = CodegenOptions {
            minify: self.config.minify,
            ..Default::default()
        };

        Ok(Codegen::new().with_options(codegen_options).build(&program).code)
    }

    /// Transpile only when `filename` has a TypeScript extension
    pub fn prepare(&self, source: String, filename: &str) -> TranspileResult<String> {
        if needs_transpile(filename) {
            self.transpile(&source, filename)
        } else {
            Ok(source)
        }
    }

    /// Transpile a file from disk
    pub fn transpile_file(&self, path: &Path) -> TranspileResult<String> {
        let source = std::fs::read_to_string(path)?;

        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("input.ts");

        self.transpile(&source, filename)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_typescript_transpilation() {
        let transpiler = Transpiler::new();
        let ts_code = r#"
            const message: string = "Hello, World!";
            postMessage(message);
        "#;

        let js_code = transpiler.transpile(ts_code, "worker.ts").unwrap();
        assert!(!js_code.contains(": string"));
        assert!(js_code.contains("Hello, World!"));
    }

    #[test]
    fn test_interface_removal() {
        let transpiler = Transpiler::new();
        let ts_code = r#"
            interface Job {
                id: number;
                payload: string;
            }

            onmessage = (e: { data: Job }) => postMessage(e.data.id);
        "#;

        let js_code = transpiler.transpile(ts_code, "worker.ts").unwrap();
        assert!(!js_code.contains("interface"));
        assert!(js_code.contains("postMessage"));
    }

    #[test]
    fn test_parse_error() {
        let transpiler = Transpiler::new();
        let result = transpiler.transpile("const = ;", "broken.ts");
        assert!(matches!(result, Err(TranspileError::ParseError(_))));
    }

    #[test]
    fn test_needs_transpile() {
        assert!(needs_transpile("worker.ts"));
        assert!(needs_transpile("/srv/app/worker.mts"));
        assert!(!needs_transpile("worker.js"));
        assert!(!needs_transpile("worker"));
    }

    #[test]
    fn test_prepare_passes_javascript_through() {
        let transpiler = Transpiler::new();
        let source = "let   x = 1;".to_string();
        assert_eq!(transpiler.prepare(source.clone(), "w.js").unwrap(), source);
    }
}
