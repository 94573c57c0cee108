//! On-disk plan folder builder for integration tests
//!
//! Writes plan documents and agent files into a temporary directory that is
//! removed when the tree is dropped.

use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A temporary directory holding one or more plan folders
pub struct PlanTree {
    dir: TempDir,
}

impl PlanTree {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("create temp dir"),
        }
    }

    /// Directory containing the plan folders
    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Start a plan folder named `folder` (e.g. "0001-test-plan")
    pub fn plan(&self, folder: &str) -> PlanFolder {
        let path = self.root().join(folder);
        fs::create_dir_all(path.join("agents")).expect("create plan folder");
        PlanFolder { path }
    }
}

/// One plan folder inside a [`PlanTree`]
pub struct PlanFolder {
    pub path: PathBuf,
}

impl PlanFolder {
    /// Write the plan document as `{folder}-plan.md`
    pub fn document(&self, content: &str) -> &Self {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.write(&format!("{}-plan.md", name), content)
    }

    /// Write `agents/{file}`
    pub fn agent(&self, file: &str, content: &str) -> &Self {
        self.write(&format!("agents/{}", file), content)
    }

    /// Write a file relative to the plan folder
    pub fn write(&self, relative: &str, content: &str) -> &Self {
        let path = self.path.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent dir");
        }
        fs::write(&path, content).expect("write plan file");
        self
    }

    pub fn remove(&self, relative: &str) {
        fs::remove_file(self.path.join(relative)).expect("remove plan file");
    }
}

/// Agent markdown with the given frontmatter lines and body
pub fn agent_doc(frontmatter: &[&str], body: &str) -> String {
    format!("---\n{}\n---\n{}", frontmatter.join("\n"), body)
}
