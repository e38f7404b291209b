//! Staging: copies the program's artifacts into an isolated temp directory
//! before launch, so the traced run never touches the user's tree.

use std::path::{Path, PathBuf};

use tempfile::TempDir;

/// An isolated copy of the target program. Sources land under `sources/`,
/// compiled classes under `classes/` (flattened; the tracer instruments
/// default-package demo programs, not full package trees). The directory is
/// removed on drop.
pub struct StagedProgram {
    dir: TempDir,
}

impl StagedProgram {
    pub fn stage(program_dir: &Path) -> std::io::Result<Self> {
        let dir = TempDir::with_prefix("flowtrace-")?;
        let sources = dir.path().join("sources");
        let classes = dir.path().join("classes");
        std::fs::create_dir_all(&sources)?;
        std::fs::create_dir_all(&classes)?;
        copy_tree(program_dir, &sources, &classes)?;
        Ok(Self { dir })
    }

    /// Classpath to launch the target with.
    pub fn classes_dir(&self) -> PathBuf {
        self.dir.path().join("classes")
    }

    pub fn sources_dir(&self) -> PathBuf {
        self.dir.path().join("sources")
    }
}

fn copy_tree(dir: &Path, sources: &Path, classes: &Path) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            copy_tree(&path, sources, classes)?;
        } else if let Some(name) = path.file_name() {
            match path.extension().and_then(|e| e.to_str()) {
                Some("java") => {
                    std::fs::copy(&path, sources.join(name))?;
                }
                Some("class") => {
                    std::fs::copy(&path, classes.join(name))?;
                }
                _ => {}
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stages_sources_and_classes_separately() {
        let program = TempDir::new().unwrap();
        std::fs::write(program.path().join("Main.java"), "class Main {}").unwrap();
        std::fs::write(program.path().join("Main.class"), b"\xca\xfe\xba\xbe").unwrap();
        let nested = program.path().join("sub");
        std::fs::create_dir(&nested).unwrap();
        std::fs::write(nested.join("Aux.java"), "class Aux {}").unwrap();
        std::fs::write(program.path().join("notes.txt"), "ignored").unwrap();

        let staged = StagedProgram::stage(program.path()).unwrap();
        assert!(staged.sources_dir().join("Main.java").is_file());
        assert!(staged.sources_dir().join("Aux.java").is_file());
        assert!(staged.classes_dir().join("Main.class").is_file());
        assert!(!staged.sources_dir().join("notes.txt").exists());
    }
}
