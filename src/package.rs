//! Packages and module resolution
//!
//! A package is every file reachable from the entry files through local
//! imports. Files are named by canonical `@/`-rooted paths with `/`
//! separators, whatever the platform.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::rc::Rc;

use rustc_hash::FxHashMap;
use tracing::{debug, instrument};

use crate::ast::{Import, Program};
use crate::error::{Result, VortexError};
use crate::note::{Level, Note, Pos};
use crate::parser::parse_source;

/// Marker file for the root of a package on disk.
pub const PACKAGE_MARKER: &str = ".vxpackage";

/// Where module text comes from.
pub trait SourceReader {
    /// Text of the module at a canonical path, or `None` if it does not exist.
    fn read(&self, file: &str) -> Option<String>;
}

/// Reads modules from a directory on disk.
#[derive(Debug, Clone)]
pub struct FsReader {
    root: PathBuf,
}

impl FsReader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FsReader { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Find the package containing `entry`: the nearest ancestor directory
    /// holding a `.vxpackage` marker, or the entry's own directory. Returns
    /// the reader and the entry's canonical path.
    pub fn discover(entry: &Path) -> Result<(FsReader, String)> {
        let entry = fs::canonicalize(entry)?;
        let dir = entry
            .parent()
            .ok_or_else(|| {
                VortexError::internal(format!("{} has no parent directory", entry.display()))
            })?;

        let root = dir
            .ancestors()
            .find(|candidate| candidate.join(PACKAGE_MARKER).is_file())
            .unwrap_or(dir)
            .to_path_buf();

        let reader = FsReader::new(root);
        let canonical = reader.canonical(&entry)?;
        Ok((reader, canonical))
    }

    /// Canonical name of a file inside the package root.
    pub fn canonical(&self, path: &Path) -> Result<String> {
        let path = fs::canonicalize(path)?;
        let relative = path.strip_prefix(&self.root).map_err(|_| {
            VortexError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("{} is outside the package at {}", path.display(), self.root.display()),
            ))
        })?;

        let parts: Vec<String> = relative
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect();

        Ok(format!("@/{}", parts.join("/")))
    }

    fn local_path(&self, file: &str) -> Option<PathBuf> {
        let rest = file.strip_prefix("@/")?;
        let mut path = self.root.clone();
        for part in rest.split('/') {
            path.push(part);
        }
        Some(path)
    }
}

impl SourceReader for FsReader {
    fn read(&self, file: &str) -> Option<String> {
        let path = self.local_path(file)?;
        fs::read_to_string(path).ok()
    }
}

/// In-memory sources, keyed by canonical path.
#[derive(Debug, Clone, Default)]
pub struct MemoryReader {
    files: FxHashMap<String, String>,
}

impl MemoryReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, file: impl Into<String>, text: impl Into<String>) -> Self {
        self.insert(file, text);
        self
    }

    pub fn insert(&mut self, file: impl Into<String>, text: impl Into<String>) {
        self.files.insert(file.into(), text.into());
    }
}

impl SourceReader for MemoryReader {
    fn read(&self, file: &str) -> Option<String> {
        self.files.get(file).cloned()
    }
}

/// One file of a package.
#[derive(Debug, Clone)]
pub struct PackageModule {
    pub file: String,
    /// `None` when the file could not be read.
    pub text: Option<String>,
    /// `None` when the file could not be read or parsed.
    pub program: Option<Rc<Program>>,
    /// Read, parse and import resolution notes.
    pub notes: Vec<Note>,
}

/// What an import refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// A module of this package, by canonical path.
    Local(String),
    /// A module of another package. Not supported yet.
    Remote { package: String, path: String },
}

/// Every module reachable from the entry files.
#[derive(Debug, Default)]
pub struct Package {
    pub entries: Vec<String>,
    modules: FxHashMap<String, PackageModule>,
    /// Files in the order they were collected.
    order: Vec<String>,
    /// External package name -> paths imported from it.
    pub remote: BTreeMap<String, BTreeSet<String>>,
}

impl Package {
    /// Parse the entries and, transitively, every local module they import.
    #[instrument(level = "debug", skip_all, fields(entries = entries.len()))]
    pub fn collect(entries: &[String], reader: &dyn SourceReader) -> Package {
        let mut package = Package {
            entries: entries.to_vec(),
            ..Package::default()
        };

        let mut queue: Vec<String> = entries.to_vec();
        queue.reverse();

        while let Some(file) = queue.pop() {
            if package.modules.contains_key(&file) {
                continue;
            }

            let module = load(&file, reader);

            if let Some(program) = &module.program {
                for import in program.imports() {
                    match resolve_import(&file, &import) {
                        Ok(Target::Local(dep)) => {
                            if !package.modules.contains_key(&dep) && !queue.contains(&dep) {
                                queue.insert(0, dep);
                            }
                        }
                        Ok(Target::Remote { package: name, path }) => {
                            package.remote.entry(name).or_default().insert(path);
                        }
                        // Reported when the import is evaluated.
                        Err(_) => {}
                    }
                }
            }

            debug!(file = %file, parsed = module.program.is_some(), "collected module");
            package.order.push(file.clone());
            package.modules.insert(file, module);
        }

        package
    }

    pub fn module(&self, file: &str) -> Option<&PackageModule> {
        self.modules.get(file)
    }

    /// Modules in collection order: entries first, then dependencies.
    pub fn modules(&self) -> impl Iterator<Item = &PackageModule> {
        self.order.iter().filter_map(|file| self.modules.get(file))
    }
}

fn load(file: &str, reader: &dyn SourceReader) -> PackageModule {
    let Some(text) = reader.read(file) else {
        return PackageModule {
            file: file.to_string(),
            text: None,
            program: None,
            notes: vec![Note::new(
                Pos::file(file),
                Level::Error,
                &["package", "not-found"],
                format!("File not found: {}", file),
            )],
        };
    };

    let (program, notes) = match parse_source(&text) {
        Ok(program) => (Some(Rc::new(program)), Vec::new()),
        Err(VortexError::Syntax { message, span, .. }) => (
            None,
            vec![Note::new(Pos::new(file, span), Level::Error, &["syntax-error"], message)],
        ),
        Err(other) => (
            None,
            vec![Note::new(
                Pos::file(file),
                Level::Error,
                &["syntax-error", "internal"],
                other.to_string(),
            )],
        ),
    };

    PackageModule {
        file: file.to_string(),
        text: Some(text),
        program,
        notes,
    }
}

/// Work out which module `import` in `file` refers to.
///
/// `import name` looks for `name.vx` next to the importing file, and
/// `import name from 'dir'` looks for `dir/name.vx`. A source ending in `.vx`
/// names the file itself. Sources starting with `.` or `..` are relative to
/// the importing file, `@` is the package root, and anything else is an
/// external package.
pub fn resolve_import(file: &str, import: &Import) -> std::result::Result<Target, Note> {
    let source = import.source.as_ref().map_or(".", |(s, _)| s.as_str());

    let mut parts: Vec<&str> = source.split('/').filter(|p| !p.is_empty()).collect();
    let file_name = format!("{}.vx", import.name.name);
    let names_file = parts.last().is_some_and(|p| p.ends_with(".vx"));

    let first = if parts.is_empty() { "." } else { parts.remove(0) };

    if first != "." && first != ".." && first != "@" {
        let mut path = parts.join("/");
        if !names_file {
            if !path.is_empty() {
                path.push('/');
            }
            path.push_str(&file_name);
        }
        return Ok(Target::Remote {
            package: first.to_string(),
            path,
        });
    }

    let mut dir: Vec<&str> = if first == "@" {
        vec!["@"]
    } else {
        let mut dir: Vec<&str> = file.split('/').collect();
        dir.pop();
        dir
    };

    let mut rest = parts.into_iter().peekable();
    let mut up = first == "..";

    loop {
        if up {
            // The root marker `@` is never popped.
            if dir.len() <= 1 {
                return Err(Note::new(
                    Pos::new(file, import.span),
                    Level::Error,
                    &["package", "invalid-import-source"],
                    "Import source is above the package root",
                ));
            }
            dir.pop();
        }

        match rest.peek() {
            Some(&"..") => {
                rest.next();
                up = true;
            }
            Some(&".") => {
                rest.next();
                up = false;
            }
            _ => break,
        }
    }

    let mut path: Vec<&str> = dir;
    path.extend(rest);
    let mut path = path.join("/");

    if !names_file {
        path.push('/');
        path.push_str(&file_name);
    }

    Ok(Target::Local(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Ident;
    use crate::token::Span;
    use pretty_assertions::assert_eq;

    fn import(name: &str, source: Option<&str>) -> Import {
        Import {
            name: Ident::new(name, Span::default()),
            source: source.map(|s| (s.to_string(), Span::default())),
            span: Span::default(),
        }
    }

    fn local(file: &str, name: &str, source: Option<&str>) -> String {
        match resolve_import(file, &import(name, source)) {
            Ok(Target::Local(path)) => path,
            other => panic!("expected a local target, got {:?}", other),
        }
    }

    #[test]
    fn test_resolve_relative_imports() {
        assert_eq!(local("@/main.vx", "util", None), "@/util.vx");
        assert_eq!(local("@/app/main.vx", "util", Some("./lib")), "@/app/lib/util.vx");
        assert_eq!(local("@/app/main.vx", "util", Some("..")), "@/util.vx");
        assert_eq!(local("@/app/deep/main.vx", "util", Some("../../lib")), "@/lib/util.vx");
        assert_eq!(local("@/app/main.vx", "util", Some("@/lib")), "@/lib/util.vx");
        assert_eq!(
            local("@/app/main.vx", "messages", Some("./lib/messages.vx")),
            "@/app/lib/messages.vx"
        );
    }

    #[test]
    fn test_resolve_above_root_is_an_error() {
        let note = resolve_import("@/main.vx", &import("x", Some(".."))).unwrap_err();
        assert!(note.has_tag("invalid-import-source"));
    }

    #[test]
    fn test_resolve_remote_package() {
        assert_eq!(
            resolve_import("@/main.vx", &import("vec", Some("stdlib/math"))).unwrap(),
            Target::Remote {
                package: "stdlib".into(),
                path: "math/vec.vx".into()
            }
        );
    }

    #[test]
    fn test_collect_follows_local_imports() {
        let reader = MemoryReader::new()
            .with("@/main.vx", "import util; import missing; return util.x;")
            .with("@/util.vx", "import main; return {x: 1};");

        let package = Package::collect(&["@/main.vx".to_string()], &reader);
        let files: Vec<_> = package.modules().map(|m| m.file.as_str()).collect();
        assert_eq!(files, vec!["@/main.vx", "@/util.vx", "@/missing.vx"]);

        let missing = package.module("@/missing.vx").unwrap();
        assert!(missing.program.is_none());
        assert!(missing.notes[0].has_tag("not-found"));
    }

    #[test]
    fn test_collect_keeps_syntax_errors_as_notes() {
        let reader = MemoryReader::new().with("@/main.vx", "return (1;");
        let package = Package::collect(&["@/main.vx".to_string()], &reader);
        let module = package.module("@/main.vx").unwrap();
        assert!(module.program.is_none());
        assert!(module.notes[0].has_tag("syntax-error"));
        assert_eq!(module.notes[0].pos.line(), Some(1));
    }

    #[test]
    fn test_fs_reader_finds_package_marker() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(PACKAGE_MARKER), "").unwrap();
        fs::create_dir(dir.path().join("app")).unwrap();
        let entry = dir.path().join("app").join("main.vx");
        fs::write(&entry, "return 1;").unwrap();

        let (reader, canonical) = FsReader::discover(&entry).unwrap();
        assert_eq!(canonical, "@/app/main.vx");
        assert_eq!(reader.read("@/app/main.vx").as_deref(), Some("return 1;"));
        assert_eq!(reader.read("@/app/other.vx"), None);
    }
}
