use std::path::PathBuf;

/// Errors from forest growing and forest serialization.
#[derive(Debug, thiserror::Error)]
pub enum ForestError {
    /// Returned when n_trees is zero.
    #[error("n_trees must be at least 1, got {n_trees}")]
    InvalidTreeCount {
        /// The invalid n_trees value provided.
        n_trees: usize,
    },

    /// Returned when an explicit m_try exceeds the candidate pool.
    #[error("m_try is {m_try}, but only {available} candidate features are available")]
    InvalidMTry {
        /// The requested m_try.
        m_try: usize,
        /// The number of non-target features.
        available: usize,
    },

    /// Returned when the minimum leaf size is larger than the per-tree sample.
    #[error("min_leaf_size must be in [1, {sample_size}], got {min_leaf_size}")]
    InvalidLeafSize {
        /// The resolved minimum leaf size.
        min_leaf_size: usize,
        /// The resolved per-tree sample size.
        sample_size: usize,
    },

    /// Returned when the target feature name is not in the matrix.
    #[error("target feature \"{name}\" not found in feature matrix")]
    TargetNotFound {
        /// The name that was looked up.
        name: String,
    },

    /// Returned when the matrix has no feature besides the target.
    #[error("feature matrix has no candidate features besides the target")]
    NoCandidateFeatures,

    /// Returned when fewer rows carry a target value than one leaf needs.
    #[error("only {labelled} rows have a target value, but min_leaf_size is {min_leaf_size}")]
    TooFewLabelledRows {
        /// Rows whose target value is present.
        labelled: usize,
        /// The resolved minimum leaf size.
        min_leaf_size: usize,
    },

    /// Returned when a dedicated thread pool cannot be built.
    #[error("failed to build thread pool")]
    ThreadPool {
        /// The underlying rayon error.
        source: rayon::ThreadPoolBuildError,
    },

    /// Returned when a feature matrix is built from zero columns or zero rows.
    #[error("feature matrix has no columns or no rows")]
    EmptyMatrix,

    /// Returned when columns have different row counts.
    #[error("column \"{name}\" has {got} rows, expected {expected}")]
    RaggedColumns {
        /// Name of the offending column.
        name: String,
        /// Row count of the first column.
        expected: usize,
        /// Row count of the offending column.
        got: usize,
    },

    /// Returned when two columns share a name.
    #[error("duplicate feature name \"{name}\"")]
    DuplicateFeatureName {
        /// The duplicated name.
        name: String,
    },

    /// Returned when a present numeric value is NaN or infinite.
    #[error("non-finite value in feature \"{feature}\" at row {row}")]
    NonFiniteValue {
        /// Name of the offending column.
        feature: String,
        /// Zero-based row index.
        row: usize,
    },

    /// Returned when a categorical code is outside the column's levels.
    #[error("level code {code} in feature \"{feature}\" at row {row} exceeds cardinality {cardinality}")]
    InvalidLevelCode {
        /// Name of the offending column.
        feature: String,
        /// Zero-based row index.
        row: usize,
        /// The out-of-range code.
        code: u32,
        /// Number of levels declared for the column.
        cardinality: usize,
    },

    /// Returned when a target variant is applied to the wrong column kind.
    #[error("{variant} target requires a {expected} column, but \"{target}\" is not")]
    TargetKindMismatch {
        /// Name of the target column.
        target: String,
        /// Human-readable target variant.
        variant: &'static str,
        /// Column kind the variant requires.
        expected: &'static str,
    },

    /// Returned when a misclassification cost is negative or non-finite.
    #[error("cost for category \"{category}\" must be finite and non-negative, got {cost}")]
    InvalidCost {
        /// The category the cost was given for.
        category: String,
        /// The invalid cost.
        cost: f64,
    },

    /// Returned when a cost map is not a JSON object of numbers.
    #[error("failed to parse cost map")]
    InvalidCostMap {
        /// The underlying JSON error.
        source: serde_json::Error,
    },

    /// Returned when the forest writer is used out of its state order.
    #[error("forest writer misuse: cannot {action} in state {state}")]
    WriterMisuse {
        /// The attempted operation.
        action: &'static str,
        /// The writer state at the time.
        state: &'static str,
    },

    /// Returned when more trees are appended than the header declared.
    #[error("header declared {declared} trees, cannot append another")]
    TooManyTrees {
        /// Tree count declared in the header.
        declared: usize,
    },

    /// Returned when a tree is appended with an unexpected index.
    #[error("tree appended with index {got}, expected {expected}")]
    TreeOutOfOrder {
        /// The next index the writer expects.
        expected: usize,
        /// The index given.
        got: usize,
    },

    /// Returned when a writer is finished before all declared trees are written.
    #[error("header declared {declared} trees, but only {written} were written")]
    IncompleteForest {
        /// Tree count declared in the header.
        declared: usize,
        /// Trees actually written.
        written: usize,
    },

    /// Returned when a target name cannot be stored in the text format.
    #[error("target name {name:?} cannot contain line breaks")]
    InvalidTargetName {
        /// The rejected name.
        name: String,
    },

    /// Returned when bincode encoding fails.
    #[error("failed to encode forest record")]
    Encode {
        /// The underlying bincode error.
        source: Box<bincode::ErrorKind>,
    },

    /// Returned when bincode decoding fails.
    #[error("failed to decode forest record")]
    Decode {
        /// The underlying bincode error.
        source: Box<bincode::ErrorKind>,
    },

    /// Returned when the underlying stream fails.
    #[error("forest stream I/O failed")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Returned when a forest file cannot be created.
    #[error("failed to create forest file {path}")]
    CreateFile {
        /// Path that was attempted.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Returned when a forest file cannot be opened.
    #[error("failed to open forest file {path}")]
    OpenFile {
        /// Path that was attempted.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Returned when a text forest record cannot be parsed.
    #[error("malformed forest record at line {line}: {reason}")]
    MalformedRecord {
        /// One-based line number.
        line: usize,
        /// Human-readable description of the problem.
        reason: String,
    },

    /// Returned when reading a forest written with another format version.
    #[error("incompatible forest format version: expected {expected}, found {found}")]
    IncompatibleFormatVersion {
        /// The version this build reads.
        expected: u32,
        /// The version found in the stream.
        found: u32,
    },

    /// Returned when importance scores do not cover every matrix column,
    /// e.g. because tracking was disabled.
    #[error("importance has {got} entries, but the matrix has {expected} columns")]
    ImportanceUnavailable {
        /// Number of matrix columns.
        expected: usize,
        /// Number of importance entries given.
        got: usize,
    },

    /// Returned when writing the importance table fails.
    #[error("failed to write importance table")]
    WriteImportance {
        /// The underlying CSV error.
        source: csv::Error,
    },
}
