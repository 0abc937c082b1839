//! Execution plan: the tree of groups and units produced by the loader
//!
//! Everything here is built once at load time and is immutable afterwards.
//! Units carry their effective fixtures and tags already resolved, so the
//! scheduler never walks the tree to find inherited state.

use crate::fixture::ScopeKind;
use crate::source::{BodyRef, SourceFile};
use crate::value::Value;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// What a unit measures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitKind {
    Test,
    Bench { iterations: u32, warmup: u32 },
    Load { iterations: u32, concurrency: u32 },
}

impl UnitKind {
    pub fn tag(&self) -> UnitKindTag {
        match self {
            UnitKind::Test => UnitKindTag::Test,
            UnitKind::Bench { .. } => UnitKindTag::Bench,
            UnitKind::Load { .. } => UnitKindTag::Load,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitKindTag {
    Test,
    Bench,
    Load,
}

impl fmt::Display for UnitKindTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitKindTag::Test => write!(f, "test"),
            UnitKindTag::Bench => write!(f, "bench"),
            UnitKindTag::Load => write!(f, "load"),
        }
    }
}

/// A declared fixture
#[derive(Debug, Clone)]
pub struct FixtureDecl {
    /// Unique within a plan: `file:line:name`
    pub id: String,
    pub name: String,
    pub scope: ScopeKind,
    pub setup: Option<BodyRef>,
    pub teardown: Option<BodyRef>,
}

impl FixtureDecl {
    pub fn new(id: impl Into<String>, name: impl Into<String>, scope: ScopeKind) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            scope,
            setup: None,
            teardown: None,
        }
    }

    pub fn with_setup(mut self, body: BodyRef) -> Self {
        self.setup = Some(body);
        self
    }

    pub fn with_teardown(mut self, body: BodyRef) -> Self {
        self.teardown = Some(body);
        self
    }
}

/// Where a unit's parameter tuples come from
#[derive(Debug, Clone, Default, PartialEq)]
pub enum ParamSource {
    #[default]
    None,
    Inline(Vec<Vec<Value>>),
    Data { path: PathBuf, rows: Vec<Vec<Value>> },
}

impl ParamSource {
    pub fn rows(&self) -> Option<&[Vec<Value>]> {
        match self {
            ParamSource::None => None,
            ParamSource::Inline(rows) | ParamSource::Data { rows, .. } => Some(rows),
        }
    }
}

/// A single declared test, bench or load test
#[derive(Debug)]
pub struct TestUnit {
    pub name: String,
    pub group_path: Vec<String>,
    pub file: Arc<SourceFile>,
    /// Index of the file in the plan
    pub file_index: usize,
    /// Declaration order within the file
    pub ordinal: usize,
    pub line: u32,
    pub kind: UnitKind,
    pub body: BodyRef,
    /// Effective fixtures, outermost first, after shadowing
    pub fixtures: Vec<Arc<FixtureDecl>>,
    pub params: ParamSource,
    pub timeout: Option<Duration>,
    /// Own tags plus inherited group tags
    pub tags: Vec<String>,
    pub skip: Option<String>,
}

impl TestUnit {
    /// `group/sub/name`
    pub fn full_name(&self) -> String {
        let mut parts = self.group_path.clone();
        parts.push(self.name.clone());
        parts.join("/")
    }

    /// One run spec per parameter tuple. No tuples (or an empty set)
    /// means a single unparameterized run.
    pub fn instances(self: &Arc<Self>) -> Vec<RunSpec> {
        match self.params.rows().filter(|rows| !rows.is_empty()) {
            None => vec![RunSpec {
                unit: self.clone(),
                param_index: None,
                params: Vec::new(),
            }],
            Some(rows) => rows
                .iter()
                .enumerate()
                .map(|(index, row)| RunSpec {
                    unit: self.clone(),
                    param_index: Some(index),
                    params: row.clone(),
                })
                .collect(),
        }
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

/// One unit with one parameter instance, ready to schedule
#[derive(Debug, Clone)]
pub struct RunSpec {
    pub unit: Arc<TestUnit>,
    pub param_index: Option<usize>,
    pub params: Vec<Value>,
}

impl RunSpec {
    pub fn label(&self) -> String {
        match self.param_index {
            Some(index) => format!("{}#{}", self.unit.full_name(), index),
            None => self.unit.full_name(),
        }
    }
}

#[derive(Debug)]
pub enum PlanNode {
    Group(TestGroup),
    Unit(Arc<TestUnit>),
}

#[derive(Debug, Default)]
pub struct TestGroup {
    pub name: String,
    /// Children run one at a time, in declaration order
    pub serial: bool,
    pub tags: Vec<String>,
    pub children: Vec<PlanNode>,
}

impl TestGroup {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Units in declaration order, depth first
    pub fn units(&self) -> Vec<Arc<TestUnit>> {
        let mut out = Vec::new();
        self.collect_units(&mut out);
        out
    }

    fn collect_units(&self, out: &mut Vec<Arc<TestUnit>>) {
        for child in &self.children {
            match child {
                PlanNode::Unit(unit) => out.push(unit.clone()),
                PlanNode::Group(group) => group.collect_units(out),
            }
        }
    }

    fn collect_batches(&self, out: &mut Vec<Batch>) {
        if self.serial {
            let runs = self.units().iter().flat_map(|u| u.instances()).collect();
            out.push(Batch { serial: true, runs });
            return;
        }
        for child in &self.children {
            match child {
                PlanNode::Unit(unit) => {
                    for spec in unit.instances() {
                        out.push(Batch {
                            serial: false,
                            runs: vec![spec],
                        });
                    }
                }
                PlanNode::Group(group) => group.collect_batches(out),
            }
        }
    }
}

/// Work item for one worker: a single run, or a serial group's runs in order
#[derive(Debug, Clone)]
pub struct Batch {
    pub serial: bool,
    pub runs: Vec<RunSpec>,
}

/// A malformed declaration, naming the file and unit
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[error("{}{}: {message}", .file.display(), unit_suffix(.unit))]
pub struct LoadError {
    pub file: PathBuf,
    pub unit: Option<String>,
    pub line: Option<u32>,
    pub message: String,
}

impl LoadError {
    pub fn new(file: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            unit: None,
            line: None,
            message: message.into(),
        }
    }

    pub fn in_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    pub fn at_line(mut self, line: u32) -> Self {
        self.line = Some(line);
        self
    }
}

fn unit_suffix(unit: &Option<String>) -> String {
    unit.as_ref()
        .map(|u| format!(" [{}]", u))
        .unwrap_or_default()
}

/// Loaded suite
#[derive(Debug, Default)]
pub struct ExecutionPlan {
    pub files: Vec<Arc<SourceFile>>,
    /// One root group per file, named after the file
    pub roots: Vec<TestGroup>,
    /// Errors of units that were excluded instead of aborting the load
    pub load_errors: Vec<LoadError>,
}

impl ExecutionPlan {
    pub fn units(&self) -> Vec<Arc<TestUnit>> {
        self.roots.iter().flat_map(TestGroup::units).collect()
    }

    pub fn instance_count(&self) -> usize {
        self.units().iter().map(|u| u.instances().len()).sum()
    }

    /// Schedulable work in declaration order
    pub fn batches(&self) -> Vec<Batch> {
        let mut out = Vec::new();
        for root in &self.roots {
            root.collect_batches(&mut out);
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.roots.iter().all(|r| r.units().is_empty())
    }
}
