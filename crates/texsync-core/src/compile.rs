//! Compiler collaborator interface.
//!
//! The compilation engine is an external service: it receives file contents,
//! a main file, and produces a PDF plus a log. Nothing here knows how LaTeX
//! is actually compiled.

use crate::editor::Editor;
use crate::error::SyncError;
use crate::path::validate_filename;
use crate::ready::ReadyGate;
use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileOutput {
    pub pdf: Vec<u8>,
    pub log: String,
}

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("Compiler unavailable: {0}")]
    Unavailable(String),

    #[error("Compilation failed")]
    Failed { log: String },

    #[error(transparent)]
    Sync(#[from] SyncError),
}

#[async_trait]
pub trait Compiler: Send + Sync {
    async fn set_main_file(&self, name: &str) -> Result<(), CompileError>;

    async fn write_file(&self, name: &str, content: &str) -> Result<(), CompileError>;

    async fn compile(&self) -> Result<CompileOutput, CompileError>;
}

/// Defers every call until the wrapped compiler's gate is signaled.
pub struct GatedCompiler<C> {
    inner: C,
    gate: ReadyGate,
}

impl<C: Compiler> GatedCompiler<C> {
    pub fn new(inner: C, gate: ReadyGate) -> Self {
        Self { inner, gate }
    }

    pub fn gate(&self) -> &ReadyGate {
        &self.gate
    }
}

#[async_trait]
impl<C: Compiler> Compiler for GatedCompiler<C> {
    async fn set_main_file(&self, name: &str) -> Result<(), CompileError> {
        self.gate.run(self.inner.set_main_file(name)).await
    }

    async fn write_file(&self, name: &str, content: &str) -> Result<(), CompileError> {
        self.gate.run(self.inner.write_file(name, content)).await
    }

    async fn compile(&self) -> Result<CompileOutput, CompileError> {
        self.gate.run(self.inner.compile()).await
    }
}

/// Compile the current state of every open file, rooted at `main`.
///
/// `main` is staged first if it is not open yet, so a freshly started
/// editor can still compile a document that only exists on disk.
pub async fn compile_open_files(
    editor: &Editor,
    compiler: &dyn Compiler,
    main: &str,
) -> Result<CompileOutput, CompileError> {
    let main = validate_filename(main).map_err(|source| SyncError::InvalidPath {
        filename: main.to_string(),
        source,
    })?;
    editor.fetch(&main).await?;

    let files = editor.snapshot().await;
    for (name, content) in &files {
        compiler.write_file(name, content).await?;
    }
    compiler.set_main_file(&main).await?;

    match compiler.compile().await {
        Ok(output) => {
            info!(
                "Compiled {} ({} file(s), {} byte PDF)",
                main,
                files.len(),
                output.pdf.len()
            );
            Ok(output)
        }
        Err(e) => {
            warn!("Compiling {} failed: {}", main, e);
            Err(e)
        }
    }
}
