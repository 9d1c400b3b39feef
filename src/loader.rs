use crate::{pipeline, Program, Statement};
use anyhow::{bail, Context, Result};
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::debug;

/// Reads and parses `path`, replacing each top-level `load("...")` with the
/// statements of the named file. Paths are relative to the loading file.
pub fn load_program(path: impl AsRef<Path>) -> Result<Program> {
    let mut loading = Vec::new();
    load_file(path.as_ref(), &mut loading)
}

fn load_file(path: &Path, loading: &mut Vec<PathBuf>) -> Result<Program> {
    let canonical = fs::canonicalize(path)
        .with_context(|| format!("Failed to read file: {}", path.display()))?;
    if loading.contains(&canonical) {
        let chain = loading
            .iter()
            .chain(std::iter::once(&canonical))
            .map(|path| path.display().to_string())
            .collect::<Vec<_>>()
            .join(" -> ");
        bail!("load cycle: {}", chain);
    }

    let source = fs::read_to_string(&canonical)
        .with_context(|| format!("Failed to read file: {}", path.display()))?;
    let program = pipeline::parse(&source).with_context(|| format!("Failed to parse {}", path.display()))?;
    debug!(path = %canonical.display(), "loaded source");

    let directory = canonical.parent().map(Path::to_path_buf).unwrap_or_default();
    loading.push(canonical);
    let mut statements = Vec::with_capacity(program.statements.len());
    for statement in program.statements {
        match statement {
            Statement::Load(target, _) => {
                let loaded = load_file(&directory.join(&target), loading)?;
                statements.extend(loaded.statements);
            }
            other => statements.push(other),
        }
    }
    loading.pop();

    Ok(Program { statements })
}
