//! Test discovery and loading
//!
//! Resolves source inputs (files, directories, wildcard patterns) to `.hyp`
//! files, parses their declarations and builds an [`ExecutionPlan`].
//! Bodies are pre-parsed through the evaluator so syntax errors surface at
//! load time, naming the unit they belong to.

mod data;
mod parser;

pub use data::{load_rows, parse_rows};
pub use parser::DEFAULT_FIXTURE;

use crate::context::ScriptEvaluator;
use crate::fixture::ScopeKind;
use crate::plan::{
    ExecutionPlan, FixtureDecl, LoadError, ParamSource, PlanNode, TestGroup, TestUnit, UnitKind,
};
use crate::source::{BodyRef, Snippet, SourceFile};
use parser::{ChildDecl, FixtureItem, GroupDecl, UnitDecl, UnitKeyword};
use regex::Regex;
use std::collections::HashSet;
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};
use walkdir::WalkDir;

/// File extension of test sources
pub const SOURCE_EXTENSION: &str = "hyp";

const DEFAULT_BENCH_ITERATIONS: u64 = 10;
const DEFAULT_LOAD_ITERATIONS: u64 = 10;

/// Errors that abort discovery as a whole
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("no test sources match '{0}'")]
    NoMatch(String),

    #[error("invalid pattern '{pattern}': {message}")]
    Pattern { pattern: String, message: String },

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{} load error(s):\n{}", .0.len(), format_load_errors(.0))]
    LoadFailed(Vec<LoadError>),
}

fn format_load_errors(errors: &[LoadError]) -> String {
    errors
        .iter()
        .map(|e| format!("  {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Builds execution plans from source inputs
pub struct Loader<'a> {
    evaluator: &'a dyn ScriptEvaluator,
    strict: bool,
    coverage_exclude: Vec<Regex>,
}

impl<'a> Loader<'a> {
    pub fn new(evaluator: &'a dyn ScriptEvaluator) -> Self {
        Self {
            evaluator,
            strict: true,
            coverage_exclude: Vec::new(),
        }
    }

    /// In strict mode (the default) any load error aborts the load
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Files matching any of these patterns are not instrumented
    pub fn with_coverage_exclude(mut self, patterns: &[String]) -> Result<Self, DiscoveryError> {
        self.coverage_exclude = patterns
            .iter()
            .map(|p| pattern_regex(p))
            .collect::<Result<_, _>>()?;
        Ok(self)
    }

    /// Resolve inputs and load every matching file
    pub fn load<S: AsRef<str>>(&self, inputs: &[S]) -> Result<ExecutionPlan, DiscoveryError> {
        let files = resolve_inputs(inputs)?;
        self.load_files(&files)
    }

    pub fn load_files(&self, files: &[PathBuf]) -> Result<ExecutionPlan, DiscoveryError> {
        let mut plan = ExecutionPlan::default();
        let mut errors = Vec::new();

        for path in files {
            let source = fs::read_to_string(path).map_err(|source| DiscoveryError::Io {
                path: path.clone(),
                source,
            })?;
            let file_index = plan.files.len();
            if let Some((file, root)) = self.load_source(file_index, path, &source, &mut errors) {
                plan.files.push(file);
                plan.roots.push(root);
            }
        }

        info!(
            files = plan.files.len(),
            units = plan.units().len(),
            errors = errors.len(),
            "discovery finished"
        );

        if self.strict && !errors.is_empty() {
            return Err(DiscoveryError::LoadFailed(errors));
        }
        plan.load_errors = errors;
        Ok(plan)
    }

    /// Build the root group of one file. `None` when its declarations
    /// cannot be parsed at all.
    pub fn load_source(
        &self,
        file_index: usize,
        path: &Path,
        source: &str,
        errors: &mut Vec<LoadError>,
    ) -> Option<(Arc<SourceFile>, TestGroup)> {
        let decl = match parser::parse_file(source) {
            Ok(decl) => decl,
            Err(e) => {
                errors.push(LoadError::new(path, e.message).at_line(e.line));
                return None;
            }
        };

        let name = display_name(path);
        let mut file = SourceFile::new(path.to_path_buf(), name.as_str());
        file.coverage_excluded = self.coverage_exclude.iter().any(|re| {
            re.is_match(&name)
                || path
                    .file_name()
                    .and_then(OsStr::to_str)
                    .is_some_and(|f| re.is_match(f))
        });
        file.helpers = decl.helpers;
        let mut helper_regions = Vec::new();
        for helper in &file.helpers {
            match self.evaluator.prepare(&file, helper) {
                Ok(lines) => helper_regions.extend(lines),
                Err(e) => {
                    errors.push(
                        LoadError::new(path, format!("in helper function: {}", e.message))
                            .at_line(e.line),
                    );
                    return None;
                }
            }
        }
        file.helper_regions = helper_regions;
        let file = Arc::new(file);
        debug!(file = %file.name, "loaded declarations");

        let mut resolver = Resolver {
            loader: self,
            file: file.clone(),
            file_index,
            ordinal: 0,
            errors,
        };
        let mut root = TestGroup::new(file.name.to_string());
        root.serial = decl.root.serial;
        let scope = Inherited::default();
        resolver.fill_group(&decl.root, &mut root, &scope);
        Some((file, root))
    }
}

/// State inherited from enclosing groups
#[derive(Clone, Default)]
struct Inherited {
    path: Vec<String>,
    tags: Vec<String>,
    fixtures: Vec<Arc<FixtureDecl>>,
}

struct Resolver<'l, 'a> {
    loader: &'l Loader<'a>,
    file: Arc<SourceFile>,
    file_index: usize,
    ordinal: usize,
    errors: &'l mut Vec<LoadError>,
}

impl Resolver<'_, '_> {
    fn fill_group(&mut self, decl: &GroupDecl, group: &mut TestGroup, outer: &Inherited) {
        let mut inherited = outer.clone();
        inherited.tags.extend(decl.tags.iter().cloned());

        let unit_label = if inherited.path.is_empty() {
            None
        } else {
            Some(inherited.path.join("/"))
        };
        match self.fixtures(&decl.fixtures, &inherited.fixtures) {
            Ok(fixtures) => inherited.fixtures = fixtures,
            Err(message) => {
                // Every unit below a broken group fixture is excluded
                let mut error = LoadError::new(&self.file.path, message).at_line(decl.line);
                if let Some(label) = unit_label {
                    error = error.in_unit(label);
                }
                self.errors.push(error);
                return;
            }
        }

        let mut seen: HashSet<&str> = HashSet::new();
        for child in &decl.children {
            match child {
                ChildDecl::Group(sub) => {
                    let mut nested = TestGroup::new(sub.name.clone());
                    nested.serial = sub.serial;
                    nested.tags = sub.tags.clone();
                    let mut scope = inherited.clone();
                    scope.path.push(sub.name.clone());
                    self.fill_group(sub, &mut nested, &scope);
                    group.children.push(PlanNode::Group(nested));
                }
                ChildDecl::Unit(unit) => {
                    let ordinal = self.ordinal;
                    self.ordinal += 1;
                    if !seen.insert(unit.name.as_str()) {
                        self.unit_error(&inherited, unit, unit.line, "duplicate unit name in group");
                        continue;
                    }
                    if let Some(built) = self.unit(unit, ordinal, &inherited) {
                        group.children.push(PlanNode::Unit(Arc::new(built)));
                    }
                }
            }
        }
    }

    fn unit(&mut self, decl: &UnitDecl, ordinal: usize, inherited: &Inherited) -> Option<TestUnit> {
        let Some(body_snippet) = &decl.body else {
            self.unit_error(inherited, decl, decl.line, "missing body");
            return None;
        };

        let kind = match self.kind(decl) {
            Ok(kind) => kind,
            Err(message) => {
                self.unit_error(inherited, decl, decl.line, &message);
                return None;
            }
        };

        let params = match self.params(decl) {
            Ok(params) => params,
            Err((message, line)) => {
                self.unit_error(inherited, decl, line, &message);
                return None;
            }
        };

        let fixtures = match self.fixtures(&decl.fixtures, &inherited.fixtures) {
            Ok(fixtures) => fixtures,
            Err(message) => {
                self.unit_error(inherited, decl, decl.line, &message);
                return None;
            }
        };

        let body = match self.body(body_snippet) {
            Ok(body) => body,
            Err((message, line)) => {
                self.unit_error(inherited, decl, line, &format!("in body: {}", message));
                return None;
            }
        };

        let mut tags = inherited.tags.clone();
        for tag in &decl.tags {
            if !tags.contains(tag) {
                tags.push(tag.clone());
            }
        }

        Some(TestUnit {
            name: decl.name.clone(),
            group_path: inherited.path.clone(),
            file: self.file.clone(),
            file_index: self.file_index,
            ordinal,
            line: decl.line,
            kind,
            body,
            fixtures,
            params,
            timeout: decl.timeout_ms.map(Duration::from_millis),
            tags,
            skip: decl.skip.clone(),
        })
    }

    fn kind(&self, decl: &UnitDecl) -> Result<UnitKind, String> {
        let positive = |value: Option<u64>, default: u64, what: &str| -> Result<u32, String> {
            match value.unwrap_or(default) {
                0 => Err(format!("{} must be greater than zero", what)),
                n => u32::try_from(n).map_err(|_| format!("{} is too large", what)),
            }
        };
        match decl.keyword {
            UnitKeyword::Test => {
                if decl.iterations.is_some() || decl.concurrency.is_some() || decl.warmup.is_some() {
                    return Err("iterations, warmup and concurrency apply only to bench and load units".into());
                }
                Ok(UnitKind::Test)
            }
            UnitKeyword::Bench => {
                if decl.concurrency.is_some() {
                    return Err("concurrency applies only to load units".into());
                }
                Ok(UnitKind::Bench {
                    iterations: positive(decl.iterations, DEFAULT_BENCH_ITERATIONS, "iterations")?,
                    warmup: u32::try_from(decl.warmup.unwrap_or(0))
                        .map_err(|_| "warmup is too large".to_string())?,
                })
            }
            UnitKeyword::Load => {
                if decl.warmup.is_some() {
                    return Err("warmup applies only to bench units".into());
                }
                Ok(UnitKind::Load {
                    iterations: positive(decl.iterations, DEFAULT_LOAD_ITERATIONS, "iterations")?,
                    concurrency: positive(decl.concurrency, 1, "concurrency")?,
                })
            }
        }
    }

    fn params(&self, decl: &UnitDecl) -> Result<ParamSource, (String, u32)> {
        let source = match (&decl.params, &decl.data) {
            (Some(_), Some((_, line))) => {
                return Err((
                    "declares both params and a data source".to_string(),
                    *line,
                ))
            }
            (Some((rows, _)), None) => ParamSource::Inline(rows.clone()),
            (None, Some((relative, line))) => {
                let base = self.file.path.parent().unwrap_or_else(|| Path::new(""));
                let path = base.join(relative);
                let rows = data::load_rows(&path).map_err(|e| (e, *line))?;
                ParamSource::Data { path, rows }
            }
            (None, None) => ParamSource::None,
        };

        if let Some(rows) = source.rows() {
            if let Some((index, expected, found)) = data::inconsistent_arity(rows) {
                let line = decl
                    .params
                    .as_ref()
                    .map(|(_, l)| *l)
                    .or(decl.data.as_ref().map(|(_, l)| *l))
                    .unwrap_or(decl.line);
                return Err((
                    format!(
                        "parameter tuple {} has {} value(s), expected {}",
                        index, found, expected
                    ),
                    line,
                ));
            }
        }
        Ok(source)
    }

    /// Effective fixtures: inherited ones, with `(scope, name)` redeclarations
    /// replacing the inherited entry for this subtree
    fn fixtures(
        &self,
        own: &[FixtureItem],
        inherited: &[Arc<FixtureDecl>],
    ) -> Result<Vec<Arc<FixtureDecl>>, String> {
        let mut effective: Vec<Arc<FixtureDecl>> = inherited.to_vec();
        for item in own {
            let scope = if item.global {
                ScopeKind::Global
            } else {
                ScopeKind::PerTest
            };
            let id = format!("{}:{}:{}", self.file.name, item.line, item.name);
            let mut decl = FixtureDecl::new(id, item.name.clone(), scope);
            if let Some(setup) = &item.setup {
                decl = decl.with_setup(self.body(setup).map_err(|(message, _)| {
                    format!("in setup of fixture '{}': {}", item.name, message)
                })?);
            }
            if let Some(teardown) = &item.teardown {
                decl = decl.with_teardown(self.body(teardown).map_err(|(message, _)| {
                    format!("in teardown of fixture '{}': {}", item.name, message)
                })?);
            }
            effective.retain(|f| !(f.scope == scope && f.name == item.name));
            effective.push(Arc::new(decl));
        }
        Ok(effective)
    }

    fn body(&self, snippet: &Snippet) -> Result<BodyRef, (String, u32)> {
        let regions = self
            .loader
            .evaluator
            .prepare(&self.file, snippet)
            .map_err(|e| (e.message, e.line))?;
        Ok(BodyRef {
            file: self.file.clone(),
            snippet: snippet.clone(),
            regions,
        })
    }

    fn unit_error(&mut self, inherited: &Inherited, decl: &UnitDecl, line: u32, message: &str) {
        let mut name = inherited.path.clone();
        name.push(decl.name.clone());
        self.errors.push(
            LoadError::new(&self.file.path, message)
                .in_unit(name.join("/"))
                .at_line(line),
        );
    }
}

/// Expand files, directories and wildcard patterns into a sorted,
/// de-duplicated list of source files
pub fn resolve_inputs<S: AsRef<str>>(inputs: &[S]) -> Result<Vec<PathBuf>, DiscoveryError> {
    let mut files = Vec::new();
    for input in inputs {
        let input = input.as_ref();
        let before = files.len();
        if is_pattern(input) {
            let regex = pattern_regex(input)?;
            let base = pattern_base(input);
            for entry in WalkDir::new(&base)
                .follow_links(true)
                .into_iter()
                .filter_map(Result::ok)
                .filter(|e| e.file_type().is_file())
            {
                if regex.is_match(&normalize(entry.path())) {
                    files.push(entry.path().to_path_buf());
                }
            }
        } else {
            let path = Path::new(input);
            if path.is_dir() {
                files.extend(discover_dir(path));
            } else if path.is_file() {
                files.push(path.to_path_buf());
            }
        }
        if files.len() == before {
            return Err(DiscoveryError::NoMatch(input.to_string()));
        }
    }
    files.sort();
    files.dedup();
    Ok(files)
}

/// Every `.hyp` file below `root`
pub fn discover_dir(root: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.path().extension() == Some(OsStr::new(SOURCE_EXTENSION)))
        .map(|e| e.path().to_path_buf())
        .collect();
    files.sort();
    files
}

fn is_pattern(input: &str) -> bool {
    input.contains('*') || input.contains('?')
}

/// Leading path components without wildcards
fn pattern_base(pattern: &str) -> PathBuf {
    let normalized = pattern.replace('\\', "/");
    let mut base = Vec::new();
    for component in normalized.split('/') {
        if is_pattern(component) {
            break;
        }
        base.push(component);
    }
    match base.join("/") {
        b if b.is_empty() && normalized.starts_with('/') => PathBuf::from("/"),
        b if b.is_empty() => PathBuf::from("."),
        b => PathBuf::from(b),
    }
}

/// Translate a wildcard pattern into an anchored regex.
///
/// `**` crosses directories, `*` and `?` stay within one path component.
pub fn pattern_regex(pattern: &str) -> Result<Regex, DiscoveryError> {
    let normalized = pattern.replace('\\', "/");
    let normalized = normalized.strip_prefix("./").unwrap_or(&normalized);
    let mut regex = String::from("^(?:\\./)?");
    let chars: Vec<char> = normalized.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '*' if chars.get(i + 1) == Some(&'*') => {
                if chars.get(i + 2) == Some(&'/') {
                    regex.push_str("(?:.*/)?");
                    i += 3;
                } else {
                    regex.push_str(".*");
                    i += 2;
                }
                continue;
            }
            '*' => regex.push_str("[^/]*"),
            '?' => regex.push_str("[^/]"),
            c => regex.push_str(&regex::escape(&c.to_string())),
        }
        i += 1;
    }
    regex.push('$');
    Regex::new(&regex).map_err(|e| DiscoveryError::Pattern {
        pattern: pattern.to_string(),
        message: e.to_string(),
    })
}

fn normalize(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// Name used in reports and coverage: the path as given, `/`-separated
pub fn display_name(path: &Path) -> String {
    let normalized = normalize(path);
    normalized
        .strip_prefix("./")
        .map(str::to_string)
        .unwrap_or(normalized)
}
