//! Discovery and reading of migration scripts.

use std::path::{Path, PathBuf};

use tracing::debug;

use super::splitter::{split_statements_for, Statement};
use crate::db::Backend;
use keel_core::error::{KeelError, Result};

/// A script ready to execute.
#[derive(Debug, Clone)]
pub struct MigrationScript {
    /// File name, e.g. "0002_add_posts.sql". This is the ledger key.
    pub filename: String,
    /// 0-based position in load order.
    pub ordinal: usize,
    pub statements: Vec<Statement>,
}

/// Reads scripts from a directory.
///
/// Scripts should be named with a fixed-width sortable prefix:
/// - `0001_create_users.sql`
/// - `0002_add_posts.sql`
///
/// They are sorted byte-wise by file name. Unpadded prefixes are not
/// reinterpreted: `10_x.sql` sorts before `2_x.sql`.
#[derive(Debug, Clone)]
pub struct ScriptLoader {
    dir: PathBuf,
    extension: String,
    backend: Backend,
}

impl ScriptLoader {
    pub fn new(dir: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            extension: extension.into(),
            backend: Backend::Sqlite,
        }
    }

    /// Split scripts with the comment rules of `backend`.
    pub fn for_backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File names of all eligible scripts in load order.
    pub fn list_scripts(&self) -> Result<Vec<String>> {
        let entries = std::fs::read_dir(&self.dir)
            .map_err(|e| KeelError::source_unreadable(&self.dir, e))?;

        let mut filenames = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| KeelError::source_unreadable(&self.dir, e))?;
            let path = entry.path();

            let file_type = entry
                .file_type()
                .map_err(|e| KeelError::source_unreadable(&path, e))?;
            // Follow symlinks so linked scripts still count
            let is_file = file_type.is_file() || (file_type.is_symlink() && path.is_file());
            if !is_file || !self.is_eligible(&path) {
                continue;
            }

            let filename = entry.file_name().into_string().map_err(|name| {
                KeelError::source_unreadable(
                    self.dir.join(&name),
                    "file name is not valid UTF-8",
                )
            })?;
            if filename.starts_with('.') {
                continue;
            }

            filenames.push(filename);
        }

        filenames.sort();

        debug!(
            "Found {} migration scripts in {}",
            filenames.len(),
            self.dir.display()
        );
        Ok(filenames)
    }

    /// Full source of one script.
    pub fn read_script(&self, filename: &str) -> Result<String> {
        let path = self.dir.join(filename);
        let bytes = std::fs::read(&path).map_err(|e| KeelError::source_unreadable(&path, e))?;
        String::from_utf8(bytes)
            .map_err(|_| KeelError::source_unreadable(&path, "content is not valid UTF-8"))
    }

    /// Read and split one script.
    pub fn load(&self, filename: &str, ordinal: usize) -> Result<MigrationScript> {
        let sql = self.read_script(filename)?;
        let statements = split_statements_for(&sql, self.backend);
        debug!("{} has {} statements", filename, statements.len());

        Ok(MigrationScript {
            filename: filename.to_string(),
            ordinal,
            statements,
        })
    }

    fn is_eligible(&self, path: &Path) -> bool {
        path.extension()
            .map(|e| e.to_str() == Some(self.extension.as_str()))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn loader(dir: &TempDir) -> ScriptLoader {
        ScriptLoader::new(dir.path(), "sql")
    }

    #[test]
    fn test_list_scripts_empty_dir() {
        let dir = TempDir::new().unwrap();
        assert!(loader(&dir).list_scripts().unwrap().is_empty());
    }

    #[test]
    fn test_list_scripts_missing_dir() {
        let loader = ScriptLoader::new("/nonexistent/path", "sql");
        let err = loader.list_scripts().unwrap_err();
        assert!(matches!(err, KeelError::SourceUnreadable { ref path, .. } if path == Path::new("/nonexistent/path")));
    }

    #[test]
    fn test_list_scripts_sorted() {
        let dir = TempDir::new().unwrap();

        // Create scripts out of order
        fs::write(dir.path().join("0002_second.sql"), "SELECT 2;").unwrap();
        fs::write(dir.path().join("0001_first.sql"), "SELECT 1;").unwrap();
        fs::write(dir.path().join("0003_third.sql"), "SELECT 3;").unwrap();

        let scripts = loader(&dir).list_scripts().unwrap();
        assert_eq!(
            scripts,
            vec!["0001_first.sql", "0002_second.sql", "0003_third.sql"]
        );
    }

    #[test]
    fn test_list_scripts_unpadded_prefixes_sort_lexicographically() {
        let dir = TempDir::new().unwrap();
        for name in ["2_x.sql", "10_x.sql", "1_x.sql"] {
            fs::write(dir.path().join(name), "SELECT 1;").unwrap();
        }

        // '0' sorts before '_', so "10_x" comes first
        let scripts = loader(&dir).list_scripts().unwrap();
        assert_eq!(scripts, vec!["10_x.sql", "1_x.sql", "2_x.sql"]);

        let dir = TempDir::new().unwrap();
        for name in ["2.sql", "10.sql", "1.sql"] {
            fs::write(dir.path().join(name), "SELECT 1;").unwrap();
        }
        let scripts = loader(&dir).list_scripts().unwrap();
        assert_eq!(scripts, vec!["1.sql", "10.sql", "2.sql"]);
    }

    #[test]
    fn test_list_scripts_ignores_ineligible_entries() {
        let dir = TempDir::new().unwrap();

        fs::write(dir.path().join("0001_migration.sql"), "SELECT 1;").unwrap();
        fs::write(dir.path().join("readme.txt"), "Not a migration").unwrap();
        fs::write(dir.path().join("backup.sql.bak"), "Backup").unwrap();
        fs::write(dir.path().join(".0000_hidden.sql"), "SELECT 0;").unwrap();
        fs::create_dir(dir.path().join("0009_dir.sql")).unwrap();

        let scripts = loader(&dir).list_scripts().unwrap();
        assert_eq!(scripts, vec!["0001_migration.sql"]);
    }

    #[test]
    fn test_custom_extension() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("0001_a.sql"), "SELECT 1;").unwrap();
        fs::write(dir.path().join("0001_a.pgsql"), "SELECT 1;").unwrap();

        let scripts = ScriptLoader::new(dir.path(), "pgsql").list_scripts().unwrap();
        assert_eq!(scripts, vec!["0001_a.pgsql"]);
    }

    #[test]
    fn test_read_and_load_script() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("001_init.sql"),
            "CREATE TABLE a(id INT); CREATE TABLE b(id INT);",
        )
        .unwrap();

        let loader = loader(&dir);
        assert!(loader.read_script("001_init.sql").unwrap().starts_with("CREATE TABLE a"));

        let script = loader.load("001_init.sql", 0).unwrap();
        assert_eq!(script.filename, "001_init.sql");
        assert_eq!(script.ordinal, 0);
        assert_eq!(script.statements.len(), 2);
        assert_eq!(script.statements[1].sql, "CREATE TABLE b(id INT)");
    }

    #[test]
    fn test_load_uses_backend_comment_rules() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("001_notes.sql"),
            "/* draft /* old */ note; */ CREATE TABLE a(id INT);",
        )
        .unwrap();

        let postgres = loader(&dir).for_backend(Backend::Postgres);
        assert_eq!(postgres.load("001_notes.sql", 0).unwrap().statements.len(), 1);

        let sqlite = loader(&dir);
        assert_eq!(sqlite.load("001_notes.sql", 0).unwrap().statements.len(), 2);
    }

    #[test]
    fn test_read_missing_script() {
        let dir = TempDir::new().unwrap();
        let err = loader(&dir).read_script("404.sql").unwrap_err();
        assert!(matches!(err, KeelError::SourceUnreadable { .. }));
    }

    #[test]
    fn test_read_non_utf8_script() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("001_bin.sql"), [0xff, 0xfe, 0x00]).unwrap();

        let err = loader(&dir).read_script("001_bin.sql").unwrap_err();
        assert!(err.to_string().contains("not valid UTF-8"));
    }
}
