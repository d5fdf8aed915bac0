#![forbid(unsafe_code)]

use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::ops::Range;
use std::path::{Path, PathBuf};

use tgen_alloc::CaseUnit;

/// Problem files larger than this are skipped rather than parsed.
pub const MAX_PROBLEM_FILE_BYTES: u64 = 16 * 1024 * 1024;

/// Raw test-list length at which index 0 is treated as held out.
pub const HELD_OUT_TEST_LIST_LEN: usize = 10;

pub const CORPUS_REASON_CODES: [&str; 4] = [
    "corpus_problem_file_unreadable",
    "corpus_problem_file_oversized",
    "corpus_problem_json_invalid",
    "corpus_structured_log_contract",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorpusError {
    ProblemFileUnreadable(String),
    ProblemFileOversized(u64),
    ProblemJsonInvalid(String),
}

impl CorpusError {
    #[must_use]
    pub const fn reason_code(&self) -> &'static str {
        match self {
            Self::ProblemFileUnreadable(_) => "corpus_problem_file_unreadable",
            Self::ProblemFileOversized(_) => "corpus_problem_file_oversized",
            Self::ProblemJsonInvalid(_) => "corpus_problem_json_invalid",
        }
    }
}

impl fmt::Display for CorpusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ProblemFileUnreadable(detail) => write!(f, "{detail}"),
            Self::ProblemFileOversized(bytes) => {
                write!(
                    f,
                    "problem file is {bytes} bytes, over the {MAX_PROBLEM_FILE_BYTES}-byte budget"
                )
            }
            Self::ProblemJsonInvalid(detail) => write!(f, "{detail}"),
        }
    }
}

impl std::error::Error for CorpusError {}

/// One corpus category: `count` problem files named `{base}{ordinal}.json`
/// under the `name` directory, with per-ordinal overrides for files whose
/// on-disk name breaks the pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategorySpec {
    pub name: String,
    pub base: String,
    pub count: usize,
    pub special: BTreeMap<usize, String>,
}

impl CategorySpec {
    #[must_use]
    pub fn new(name: &str, base: &str, count: usize) -> Self {
        Self {
            name: name.to_string(),
            base: base.to_string(),
            count,
            special: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_special(mut self, ordinal: usize, file_name: &str) -> Self {
        self.special.insert(ordinal, file_name.to_string());
        self
    }

    #[must_use]
    fn file_name(&self, ordinal: usize) -> String {
        self.special
            .get(&ordinal)
            .cloned()
            .unwrap_or_else(|| format!("{}{ordinal}.json", self.base))
    }
}

/// The production corpus layout: 16 categories of 10 problems each.
#[must_use]
pub fn default_category_manifest() -> Vec<CategorySpec> {
    vec![
        CategorySpec::new("AboveBelow_v2", "AboveBelow", 10),
        CategorySpec::new("Center_v2", "Center", 10),
        CategorySpec::new("Cleanup_v2", "CleanUp", 10),
        CategorySpec::new("CompleteShape_v2", "CompleteShape", 10)
            .with_special(1, "completeShape1.json"),
        CategorySpec::new("Copy_v2", "Copy", 10),
        CategorySpec::new("Count_v2", "Count", 10),
        CategorySpec::new("ExtendToBoundary_v2", "ExtendToBoundary", 10),
        CategorySpec::new("ExtractObjects_v2", "ExtractObjects", 10),
        CategorySpec::new("FilledNotFilled_v2", "FilledNotFilled", 10),
        CategorySpec::new("HorizontalVertical_v2", "HorizontalVertical", 10),
        CategorySpec::new("InsideOutside_v2", "InsideOutside", 10),
        CategorySpec::new("MoveToBoundary_v2", "MoveToBoundary", 10),
        CategorySpec::new("Order_v2", "Order", 10),
        CategorySpec::new("SameDifferent_v2", "SameDifferent", 10),
        CategorySpec::new("TopBottom2D_v2", "TopBottom2D", 10),
        CategorySpec::new("TopBottom3D_v2", "TopBottom3D", 10),
    ]
}

/// One enumerated problem file. `problem_index` is assigned in enumeration
/// order over files that exist on disk, before any parsing happens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskEntry {
    pub problem_index: usize,
    /// Absolute path used for reading.
    pub path: PathBuf,
    /// Forward-slash path relative to the corpus parent, for web consumers.
    pub task_path: String,
    pub task_name: String,
    pub category: String,
}

/// Enumerate the problem files a manifest describes. Files missing on disk
/// are skipped without shifting the indices of the files that follow.
#[must_use]
pub fn enumerate_tasks(corpus_root: &Path, manifest: &[CategorySpec]) -> Vec<TaskEntry> {
    let corpus_dir_name = corpus_root
        .file_name()
        .map_or_else(|| "corpus".to_string(), |name| name.to_string_lossy().into_owned());

    let mut tasks = Vec::new();
    for category in manifest {
        for ordinal in 1..=category.count {
            let file_name = category.file_name(ordinal);
            let path = corpus_root.join(&category.name).join(&file_name);
            if path.exists() {
                tasks.push(TaskEntry {
                    problem_index: tasks.len(),
                    task_path: format!("{corpus_dir_name}/{}/{file_name}", category.name),
                    task_name: format!("{}/{file_name}", category.name),
                    category: category.name.clone(),
                    path,
                });
            }
        }
    }
    tasks
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProblemFile {
    #[serde(default)]
    pub train: Vec<Value>,
    #[serde(default)]
    pub test: Vec<Value>,
}

/// Usable test indices for a raw test list of length `raw_test_count`:
/// `1..raw_test_count` when the list has exactly ten entries (index 0 is
/// held out), `0..raw_test_count` otherwise.
#[must_use]
pub fn usable_test_indices(raw_test_count: usize) -> Range<usize> {
    if raw_test_count == HELD_OUT_TEST_LIST_LEN {
        1..raw_test_count
    } else {
        0..raw_test_count
    }
}

/// Payload carried through allocation into serialization, untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CasePayload {
    pub task_path: String,
    pub task_name: String,
    pub category: String,
    pub train: Vec<Value>,
    pub test_case: Value,
}

/// A problem file that was enumerated but contributed no units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedProblem {
    pub problem_index: usize,
    pub task_name: String,
    pub reason_code: &'static str,
    pub detail: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadedCorpus {
    pub units: Vec<CaseUnit<CasePayload>>,
    pub skipped: Vec<SkippedProblem>,
    pub task_count: usize,
}

/// Load every usable test case the manifest describes.
///
/// Unreadable, oversized, or malformed problem files are recorded in
/// `skipped` and the load continues; a skipped file keeps its
/// `problem_index`, so the indices of the surviving problems are unaffected.
#[must_use]
pub fn load_corpus(corpus_root: &Path, manifest: &[CategorySpec]) -> LoadedCorpus {
    let tasks = enumerate_tasks(corpus_root, manifest);
    let mut units = Vec::new();
    let mut skipped = Vec::new();

    for task in &tasks {
        match read_problem_file(&task.path) {
            Ok(problem) => {
                for test_index in usable_test_indices(problem.test.len()) {
                    units.push(CaseUnit::new(
                        task.problem_index,
                        test_index,
                        CasePayload {
                            task_path: task.task_path.clone(),
                            task_name: task.task_name.clone(),
                            category: task.category.clone(),
                            train: problem.train.clone(),
                            test_case: problem.test[test_index].clone(),
                        },
                    ));
                }
            }
            Err(err) => skipped.push(SkippedProblem {
                problem_index: task.problem_index,
                task_name: task.task_name.clone(),
                reason_code: err.reason_code(),
                detail: err.to_string(),
            }),
        }
    }

    LoadedCorpus {
        units,
        skipped,
        task_count: tasks.len(),
    }
}

fn read_problem_file(path: &Path) -> Result<ProblemFile, CorpusError> {
    let metadata = fs::metadata(path).map_err(|err| {
        CorpusError::ProblemFileUnreadable(format!("failed reading {}: {err}", path.display()))
    })?;
    if metadata.len() > MAX_PROBLEM_FILE_BYTES {
        return Err(CorpusError::ProblemFileOversized(metadata.len()));
    }
    let raw = fs::read_to_string(path).map_err(|err| {
        CorpusError::ProblemFileUnreadable(format!("failed reading {}: {err}", path.display()))
    })?;
    serde_json::from_str(&raw).map_err(|err| {
        CorpusError::ProblemJsonInvalid(format!("invalid JSON {}: {err}", path.display()))
    })
}
