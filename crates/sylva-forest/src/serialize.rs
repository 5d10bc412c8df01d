//! Streaming forest output: one header, then one self-delimiting record per tree.

use std::fmt::Write as _;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

use tracing::{debug, info, instrument};

use crate::error::ForestError;
use crate::node::{FeatureIndex, LevelSet, Node, NodeIndex, Prediction, SplitRule};
use crate::tree::Tree;

/// Current forest format version, shared by both encodings.
pub const FORMAT_VERSION: u32 = 1;

/// On-stream encoding of a forest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ForestFormat {
    /// Compact bincode records.
    #[default]
    Binary,
    /// Line-oriented `KEY=value` records.
    Text,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterState {
    Unopened,
    HeaderWritten,
    TreeAppended,
    Closed,
}

impl WriterState {
    fn name(self) -> &'static str {
        match self {
            WriterState::Unopened => "Unopened",
            WriterState::HeaderWritten => "HeaderWritten",
            WriterState::TreeAppended => "TreeAppended",
            WriterState::Closed => "Closed",
        }
    }
}

#[derive(serde::Serialize, serde::Deserialize)]
struct ForestHeader {
    format_version: u32,
    target: String,
    n_trees: usize,
}

#[derive(serde::Serialize)]
struct TreeRecordRef<'t> {
    index: usize,
    tree: &'t Tree,
}

#[derive(serde::Deserialize)]
struct TreeRecord {
    index: usize,
    tree: Tree,
}

/// Writes a forest header followed by trees, one at a time.
///
/// The writer moves through `Unopened → HeaderWritten → TreeAppended* →
/// Closed`; calls out of that order fail with [`ForestError::WriterMisuse`].
/// Each tree is flushed as soon as it is appended, so nothing beyond the
/// current tree is buffered.
#[derive(Debug)]
pub struct ForestWriter<W: Write> {
    inner: W,
    format: ForestFormat,
    state: WriterState,
    declared: usize,
    written: usize,
}

impl ForestWriter<BufWriter<File>> {
    /// Create (or truncate) a forest file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ForestError::CreateFile`] if the file cannot be created.
    pub fn create(path: impl AsRef<Path>, format: ForestFormat) -> Result<Self, ForestError> {
        let path = path.as_ref();
        let file = File::create(path).map_err(|source| ForestError::CreateFile {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::new(BufWriter::new(file), format))
    }
}

impl<W: Write> ForestWriter<W> {
    /// Wrap a stream.
    pub fn new(inner: W, format: ForestFormat) -> Self {
        Self {
            inner,
            format,
            state: WriterState::Unopened,
            declared: 0,
            written: 0,
        }
    }

    /// Return the encoding this writer uses.
    #[must_use]
    pub fn format(&self) -> ForestFormat {
        self.format
    }

    /// Return the number of trees appended so far.
    #[must_use]
    pub fn trees_written(&self) -> usize {
        self.written
    }

    /// Write the forest header. Must be called exactly once, before any tree.
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`ForestError::WriterMisuse`] | header already written, or writer closed |
    /// | [`ForestError::InvalidTargetName`] | name contains a line break |
    /// | [`ForestError::Encode`] / [`ForestError::Io`] | the stream rejects the header |
    #[instrument(skip(self), fields(format = ?self.format))]
    pub fn write_header(&mut self, target_name: &str, tree_count: usize) -> Result<(), ForestError> {
        if self.state != WriterState::Unopened {
            return Err(self.misuse("write header"));
        }
        if target_name.contains(['\n', '\r']) {
            return Err(ForestError::InvalidTargetName {
                name: target_name.to_owned(),
            });
        }

        match self.format {
            ForestFormat::Binary => {
                let header = ForestHeader {
                    format_version: FORMAT_VERSION,
                    target: target_name.to_owned(),
                    n_trees: tree_count,
                };
                bincode::serialize_into(&mut self.inner, &header)
                    .map_err(|source| ForestError::Encode { source })?;
            }
            ForestFormat::Text => {
                writeln!(
                    self.inner,
                    "FOREST=RF,VERSION={FORMAT_VERSION},NTREES={tree_count},TARGET={target_name}"
                )?;
            }
        }
        self.inner.flush()?;

        self.declared = tree_count;
        self.state = WriterState::HeaderWritten;
        debug!(tree_count, "forest header written");
        Ok(())
    }

    /// Append the tree with the given index and flush it to the stream.
    ///
    /// Indices must be consecutive starting at zero.
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`ForestError::WriterMisuse`] | no header yet, or writer closed |
    /// | [`ForestError::TooManyTrees`] | every declared tree is already written |
    /// | [`ForestError::TreeOutOfOrder`] | `index` is not the next expected index |
    /// | [`ForestError::Encode`] / [`ForestError::Io`] | the stream rejects the tree |
    pub fn append_tree(&mut self, tree: &Tree, index: usize) -> Result<(), ForestError> {
        match self.state {
            WriterState::HeaderWritten | WriterState::TreeAppended => {}
            WriterState::Unopened | WriterState::Closed => return Err(self.misuse("append tree")),
        }
        if self.written == self.declared {
            return Err(ForestError::TooManyTrees {
                declared: self.declared,
            });
        }
        if index != self.written {
            return Err(ForestError::TreeOutOfOrder {
                expected: self.written,
                got: index,
            });
        }

        match self.format {
            ForestFormat::Binary => {
                bincode::serialize_into(&mut self.inner, &TreeRecordRef { index, tree })
                    .map_err(|source| ForestError::Encode { source })?;
            }
            ForestFormat::Text => {
                let mut text = format!("TREE={index}\n");
                if !tree.nodes().is_empty() {
                    encode_node(tree.nodes(), 0, &mut String::from("*"), &mut text);
                }
                self.inner.write_all(text.as_bytes())?;
            }
        }
        self.inner.flush()?;

        self.written += 1;
        self.state = WriterState::TreeAppended;
        debug!(index, n_nodes = tree.n_nodes(), "tree appended");
        Ok(())
    }

    /// Close the forest after checking every declared tree was written.
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`ForestError::WriterMisuse`] | no header yet, or already closed |
    /// | [`ForestError::IncompleteForest`] | fewer trees written than declared |
    /// | [`ForestError::Io`] | final flush failed |
    pub fn finish(&mut self) -> Result<(), ForestError> {
        match self.state {
            WriterState::HeaderWritten | WriterState::TreeAppended => {}
            WriterState::Unopened | WriterState::Closed => return Err(self.misuse("finish")),
        }
        if self.written != self.declared {
            return Err(ForestError::IncompleteForest {
                declared: self.declared,
                written: self.written,
            });
        }
        self.inner.flush()?;
        self.state = WriterState::Closed;
        info!(n_trees = self.written, "forest written");
        Ok(())
    }

    /// Consume the writer, returning the underlying stream.
    pub fn into_inner(self) -> W {
        self.inner
    }

    fn misuse(&self, action: &'static str) -> ForestError {
        ForestError::WriterMisuse {
            action,
            state: self.state.name(),
        }
    }
}

fn join_codes<T: ToString>(items: impl Iterator<Item = T>) -> String {
    items.map(|i| i.to_string()).collect::<Vec<_>>().join(":")
}

/// Append the pre-order lines of the subtree rooted at `idx`.
fn encode_node(nodes: &[Node], idx: usize, path: &mut String, out: &mut String) {
    match &nodes[idx] {
        Node::Leaf { prediction, n_rows } => {
            let _ = write!(out, "NODE={path},ROWS={n_rows}");
            match prediction {
                Prediction::Numeric(v) => {
                    let _ = writeln!(out, ",PRED={v}");
                }
                Prediction::Class { class, counts } => {
                    let _ = writeln!(out, ",CLASS={class},COUNTS={}", join_codes(counts.iter()));
                }
            }
        }
        Node::Split {
            feature,
            rule,
            left,
            right,
            missing,
            n_rows,
            impurity_decrease,
        } => {
            let _ = write!(
                out,
                "NODE={path},FEATURE={feature},ROWS={n_rows},GAIN={impurity_decrease}"
            );
            match rule {
                SplitRule::Threshold(t) => {
                    let _ = writeln!(out, ",THRESHOLD={t}");
                }
                SplitRule::Levels(levels) => {
                    let _ = writeln!(out, ",LEVELS={}", join_codes(levels.iter()));
                }
            }
            for (child, step) in [(Some(*left), 'L'), (Some(*right), 'R'), (*missing, 'M')] {
                if let Some(child) = child {
                    path.push(step);
                    encode_node(nodes, child.index(), path, out);
                    path.pop();
                }
            }
        }
    }
}

/// Header fields of a stored forest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForestInfo {
    /// Name of the target feature.
    pub target: String,
    /// Number of trees declared in the header.
    pub n_trees: usize,
}

/// Reads a forest back, tree by tree, in append order.
///
/// Iterating yields `(index, tree)` pairs and stops after the declared tree
/// count or at the first error.
#[derive(Debug)]
pub struct ForestReader<R: Read> {
    inner: BufReader<R>,
    format: ForestFormat,
    info: ForestInfo,
    next_index: usize,
    line: usize,
    peeked: Option<String>,
    failed: bool,
}

impl ForestReader<File> {
    /// Open a forest file and parse its header.
    ///
    /// # Errors
    ///
    /// Returns [`ForestError::OpenFile`] if the file cannot be opened, or any
    /// error of [`ForestReader::new`].
    #[instrument(skip_all, fields(path = %path.as_ref().display(), ?format))]
    pub fn open(path: impl AsRef<Path>, format: ForestFormat) -> Result<Self, ForestError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| ForestError::OpenFile {
            path: path.to_path_buf(),
            source,
        })?;
        Self::new(file, format)
    }
}

impl<R: Read> ForestReader<R> {
    /// Wrap a stream and parse the forest header.
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`ForestError::IncompatibleFormatVersion`] | header carries another version |
    /// | [`ForestError::Decode`] | binary header cannot be decoded |
    /// | [`ForestError::MalformedRecord`] | text header cannot be parsed |
    /// | [`ForestError::Io`] | the stream fails |
    pub fn new(inner: R, format: ForestFormat) -> Result<Self, ForestError> {
        let mut reader = Self {
            inner: BufReader::new(inner),
            format,
            info: ForestInfo {
                target: String::new(),
                n_trees: 0,
            },
            next_index: 0,
            line: 0,
            peeked: None,
            failed: false,
        };
        let (version, info) = match format {
            ForestFormat::Binary => {
                let header: ForestHeader = bincode::deserialize_from(&mut reader.inner)
                    .map_err(|source| ForestError::Decode { source })?;
                (
                    header.format_version,
                    ForestInfo {
                        target: header.target,
                        n_trees: header.n_trees,
                    },
                )
            }
            ForestFormat::Text => {
                let line = reader.next_line()?.ok_or_else(|| reader.malformed("missing header"))?;
                reader.parse_header(&line)?
            }
        };
        if version != FORMAT_VERSION {
            return Err(ForestError::IncompatibleFormatVersion {
                expected: FORMAT_VERSION,
                found: version,
            });
        }
        debug!(target = %info.target, n_trees = info.n_trees, "forest header read");
        reader.info = info;
        Ok(reader)
    }

    /// Return the parsed header.
    #[must_use]
    pub fn header(&self) -> &ForestInfo {
        &self.info
    }

    fn malformed(&self, reason: impl Into<String>) -> ForestError {
        ForestError::MalformedRecord {
            line: self.line,
            reason: reason.into(),
        }
    }

    fn next_line(&mut self) -> Result<Option<String>, ForestError> {
        if let Some(line) = self.peeked.take() {
            return Ok(Some(line));
        }
        let mut buf = String::new();
        if self.inner.read_line(&mut buf)? == 0 {
            return Ok(None);
        }
        self.line += 1;
        let trimmed = buf.trim_end_matches(['\n', '\r']).len();
        buf.truncate(trimmed);
        Ok(Some(buf))
    }

    fn peek_line(&mut self) -> Result<Option<&str>, ForestError> {
        if self.peeked.is_none() {
            self.peeked = self.next_line()?;
        }
        Ok(self.peeked.as_deref())
    }

    fn parse_header(&self, line: &str) -> Result<(u32, ForestInfo), ForestError> {
        let (head, target) = line
            .split_once(",TARGET=")
            .ok_or_else(|| self.malformed("header has no TARGET field"))?;
        let mut fields = head.split(',');
        if fields.next() != Some("FOREST=RF") {
            return Err(self.malformed("header must start with FOREST=RF"));
        }
        let version = self.field(fields.next(), "VERSION")?;
        let n_trees = self.field(fields.next(), "NTREES")?;
        if fields.next().is_some() {
            return Err(self.malformed("unexpected header field"));
        }
        Ok((
            version,
            ForestInfo {
                target: target.to_owned(),
                n_trees,
            },
        ))
    }

    /// Parse a `KEY=value` field with the expected key.
    fn field<T: std::str::FromStr>(&self, field: Option<&str>, key: &str) -> Result<T, ForestError> {
        let field = field.ok_or_else(|| self.malformed(format!("missing {key}")))?;
        let value = field
            .strip_prefix(key)
            .and_then(|rest| rest.strip_prefix('='))
            .ok_or_else(|| self.malformed(format!("expected {key}=, found {field:?}")))?;
        value
            .parse()
            .map_err(|_| self.malformed(format!("invalid {key} value {value:?}")))
    }

    fn codes<T: std::str::FromStr>(&self, value: &str, key: &str) -> Result<Vec<T>, ForestError> {
        if value.is_empty() {
            return Ok(Vec::new());
        }
        value
            .split(':')
            .map(|code| {
                code.parse()
                    .map_err(|_| self.malformed(format!("invalid {key} entry {code:?}")))
            })
            .collect()
    }

    fn read_binary_tree(&mut self) -> Result<(usize, Tree), ForestError> {
        let record: TreeRecord = bincode::deserialize_from(&mut self.inner)
            .map_err(|source| ForestError::Decode { source })?;
        Ok((record.index, record.tree))
    }

    fn read_text_tree(&mut self) -> Result<(usize, Tree), ForestError> {
        let line = self
            .next_line()?
            .ok_or_else(|| self.malformed("unexpected end of forest"))?;
        let index = self.field(Some(line.as_str()), "TREE")?;
        let mut nodes = Vec::new();
        self.decode_node(&mut String::from("*"), &mut nodes)?;
        Ok((index, Tree::from_nodes(nodes)))
    }

    /// Parse the pre-order lines of the subtree at `path` into `nodes`.
    fn decode_node(&mut self, path: &mut String, nodes: &mut Vec<Node>) -> Result<NodeIndex, ForestError> {
        let line = self
            .next_line()?
            .ok_or_else(|| self.malformed(format!("missing node {path}")))?;
        let mut fields = line.split(',');
        let node_path: String = self.field(fields.next(), "NODE")?;
        if node_path != *path {
            return Err(self.malformed(format!("expected node {path}, found {node_path}")));
        }

        let second = fields.next();
        let idx = nodes.len();
        if second.is_some_and(|f| f.starts_with("FEATURE=")) {
            let feature = FeatureIndex::new(self.field(second, "FEATURE")?);
            let n_rows = self.field(fields.next(), "ROWS")?;
            let impurity_decrease = self.field(fields.next(), "GAIN")?;
            let rule_field = fields.next().ok_or_else(|| self.malformed("split has no rule"))?;
            let rule = match rule_field.split_once('=') {
                Some(("THRESHOLD", _)) => SplitRule::Threshold(self.field(Some(rule_field), "THRESHOLD")?),
                Some(("LEVELS", value)) => {
                    SplitRule::Levels(self.codes::<u32>(value, "LEVELS")?.into_iter().collect::<LevelSet>())
                }
                _ => return Err(self.malformed(format!("unknown split rule {rule_field:?}"))),
            };
            if fields.next().is_some() {
                return Err(self.malformed("unexpected split field"));
            }

            nodes.push(Node::Leaf {
                prediction: Prediction::Numeric(0.0),
                n_rows,
            });
            path.push('L');
            let left = self.decode_node(path, nodes)?;
            path.pop();
            path.push('R');
            let right = self.decode_node(path, nodes)?;
            path.pop();
            path.push('M');
            let prefix = format!("NODE={path},");
            let has_missing = self.peek_line()?.is_some_and(|l| l.starts_with(&prefix));
            let missing = if has_missing {
                Some(self.decode_node(path, nodes)?)
            } else {
                None
            };
            path.pop();

            nodes[idx] = Node::Split {
                feature,
                rule,
                left,
                right,
                missing,
                n_rows,
                impurity_decrease,
            };
        } else {
            let n_rows = self.field(second, "ROWS")?;
            let value_field = fields.next().ok_or_else(|| self.malformed("leaf has no prediction"))?;
            let prediction = match value_field.split_once('=') {
                Some(("PRED", _)) => Prediction::Numeric(self.field(Some(value_field), "PRED")?),
                Some(("CLASS", _)) => {
                    let class = self.field(Some(value_field), "CLASS")?;
                    let counts_field = fields.next().ok_or_else(|| self.malformed("class leaf has no COUNTS"))?;
                    let counts = match counts_field.strip_prefix("COUNTS=") {
                        Some(value) => self.codes(value, "COUNTS")?,
                        None => return Err(self.malformed("class leaf has no COUNTS")),
                    };
                    Prediction::Class { class, counts }
                }
                _ => return Err(self.malformed(format!("unknown leaf value {value_field:?}"))),
            };
            if fields.next().is_some() {
                return Err(self.malformed("unexpected leaf field"));
            }
            nodes.push(Node::Leaf { prediction, n_rows });
        }
        Ok(NodeIndex::new(idx))
    }
}

impl<R: Read> Iterator for ForestReader<R> {
    type Item = Result<(usize, Tree), ForestError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.next_index == self.info.n_trees {
            return None;
        }
        let record = match self.format {
            ForestFormat::Binary => self.read_binary_tree(),
            ForestFormat::Text => self.read_text_tree(),
        };
        let record = record.and_then(|(index, tree)| {
            if index == self.next_index {
                Ok((index, tree))
            } else {
                Err(ForestError::TreeOutOfOrder {
                    expected: self.next_index,
                    got: index,
                })
            }
        });
        match &record {
            Ok(_) => self.next_index += 1,
            Err(_) => self.failed = true,
        }
        Some(record)
    }
}
