//! Plan folder extraction

use super::builder::ExtractionBuilder;
use super::frontmatter::{list_field, split_frontmatter, string_field};
use super::markdown::{scan_markdown, ScannedDocument};
use super::refs::{
    looks_like_path, mentions_dependency, parse_dependency_entry, scan_agent_tokens,
    scan_dependency_line, scan_tags,
};
use super::ExtractionResult;
use crate::change::compute_content_hash;
use crate::graph::{CanonicalRef, EntityType, Metadata, NewEntity, RelationType};
use regex_lite::Regex;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::debug;
use walkdir::WalkDir;

fn plan_prefix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d{4})").expect("valid plan prefix pattern"))
}

fn agent_prefix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d{3})").expect("valid agent prefix pattern"))
}

fn feature_heading_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^feature\b\s*(\d+)?\s*[:.)\-]?\s*(.*)$").expect("valid feature pattern")
    })
}

fn trailing_number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d+)\s*$").expect("valid number pattern"))
}

/// Extract entities and relationships from one plan folder.
///
/// `path` may be the plan folder itself or any file or directory inside it.
/// Problems with the input never fail the call; they are collected in
/// [`ExtractionResult::warnings`] next to whatever could be extracted.
pub fn extract_plan(path: impl AsRef<Path>) -> ExtractionResult {
    let path = path.as_ref();
    let mut builder = ExtractionBuilder::new();

    if !path.exists() {
        builder.warn(format!("plan path does not exist: {}", path.display()));
        return builder.finish(None);
    }

    let path = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    let start = if path.is_file() {
        path.parent().unwrap_or(path.as_path())
    } else {
        path.as_path()
    };

    let Some((root, plan_id)) = find_plan_root(start) else {
        builder.warn(format!(
            "no four-digit plan prefix in {} or its parents",
            path.display()
        ));
        return builder.finish(None);
    };

    debug!("extracting plan {} from {}", plan_id, root.display());

    let mut extractor = PlanExtractor {
        builder,
        plan: CanonicalRef::plan(&plan_id),
        plan_id,
        root,
        next_feature: 1,
    };
    extractor.extract_plan_document();
    extractor.extract_agents();

    let PlanExtractor {
        builder, plan_id, ..
    } = extractor;
    builder.finish(Some(plan_id))
}

/// Nearest directory, starting at `start`, whose name carries a plan ID
fn find_plan_root(start: &Path) -> Option<(PathBuf, String)> {
    start.ancestors().find_map(|dir| {
        let name = dir.file_name()?.to_str()?;
        let caps = plan_prefix_re().captures(name)?;
        Some((dir.to_path_buf(), caps[1].to_string()))
    })
}

/// Markdown files directly inside `dir`, sorted by file name
fn markdown_files(dir: &Path) -> Vec<PathBuf> {
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            e.path()
                .extension()
                .map(|ext| ext == "md")
                .unwrap_or(false)
        })
        .map(|e| e.into_path())
        .collect()
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// A markdown file read from disk
struct Document {
    source: String,
    hash: String,
    fields: Metadata,
    scanned: ScannedDocument,
}

struct PlanExtractor {
    builder: ExtractionBuilder,
    plan_id: String,
    plan: CanonicalRef,
    root: PathBuf,
    next_feature: u32,
}

impl PlanExtractor {
    fn read_document(&mut self, path: &Path) -> Option<Document> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                self.builder
                    .warn(format!("failed to read {}: {}", path.display(), e));
                return None;
            }
        };

        let (fields, body) = split_frontmatter(&content);
        let fields = match fields {
            Some(Ok(fields)) => fields,
            Some(Err(e)) => {
                self.builder
                    .warn(format!("invalid frontmatter in {}: {}", path.display(), e));
                Metadata::new()
            }
            None => Metadata::new(),
        };

        debug!("read {} ({} frontmatter keys)", path.display(), fields.len());

        Some(Document {
            source: path.to_string_lossy().into_owned(),
            hash: compute_content_hash(&content),
            scanned: scan_markdown(body),
            fields,
        })
    }

    fn extract_plan_document(&mut self) {
        let files = markdown_files(&self.root);
        let chosen = files
            .iter()
            .find(|p| file_name(p).ends_with("-plan.md"))
            .or_else(|| files.first())
            .cloned();

        let folder = file_name(&self.root);
        let document = match chosen {
            Some(path) => self.read_document(&path),
            None => {
                self.builder.warn(format!(
                    "no plan markdown found in {}",
                    self.root.display()
                ));
                None
            }
        };

        let Some(doc) = document else {
            self.builder.add_entity(
                NewEntity::new(self.plan.clone(), folder)
                    .with_metadata("planId", self.plan_id.as_str()),
            );
            return;
        };

        let name = string_field(&doc.fields, "title")
            .or_else(|| doc.scanned.title.clone())
            .unwrap_or(folder);
        let mut plan = NewEntity::new(self.plan.clone(), name)
            .with_source(doc.source.as_str())
            .with_content_hash(doc.hash.as_str());
        plan.metadata = doc.fields.clone();
        plan.metadata
            .insert("planId".into(), Value::from(self.plan_id.as_str()));
        self.builder.add_entity(plan);

        let owner = self.plan.clone();
        self.extract_features(&doc);
        self.link_document(&owner, &doc);
    }

    fn extract_features(&mut self, doc: &Document) {
        for section in &doc.scanned.sections {
            if !(2..=3).contains(&section.level) {
                continue;
            }
            let Some(caps) = feature_heading_re().captures(&section.heading) else {
                continue;
            };

            let number = match caps.get(1).and_then(|m| m.as_str().parse::<u32>().ok()) {
                Some(n) => {
                    self.next_feature = self.next_feature.max(n.saturating_add(1));
                    n
                }
                None => {
                    let n = self.next_feature;
                    self.next_feature += 1;
                    n
                }
            };

            let title = caps.get(2).map(|m| m.as_str().trim()).unwrap_or("");
            let name = if title.is_empty() {
                section.heading.clone()
            } else {
                title.to_string()
            };

            let feature = CanonicalRef::feature(&self.plan_id, number);
            self.builder.add_entity(
                NewEntity::new(feature.clone(), name)
                    .with_source(doc.source.as_str())
                    .with_content_hash(doc.hash.as_str())
                    .with_metadata("planId", self.plan_id.as_str())
                    .with_metadata("featureNumber", number),
            );
            self.builder
                .relate(&self.plan, &feature, RelationType::Contains);

            for line in &section.lines {
                for tag in scan_tags(line) {
                    self.link_tag(&feature, &tag);
                }
            }
        }
    }

    fn extract_agents(&mut self) {
        let agents_dir = self.root.join("agents");
        if !agents_dir.is_dir() {
            self.builder.warn(format!(
                "no agents directory in {}",
                self.root.display()
            ));
            return;
        }

        for path in markdown_files(&agents_dir) {
            let file = file_name(&path);
            let Some(caps) = agent_prefix_re().captures(&file) else {
                debug!("skipping {}: no agent number", path.display());
                continue;
            };
            let number = caps[1].to_string();
            let Some(doc) = self.read_document(&path) else {
                continue;
            };

            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| number.clone());
            let name = string_field(&doc.fields, "title")
                .or_else(|| string_field(&doc.fields, "name"))
                .or_else(|| doc.scanned.title.clone())
                .unwrap_or(stem);

            let agent = CanonicalRef::agent(&self.plan_id, &number);
            let mut entity = NewEntity::new(agent.clone(), name)
                .with_source(doc.source.as_str())
                .with_content_hash(doc.hash.as_str());
            entity.metadata = doc.fields.clone();
            entity
                .metadata
                .insert("planId".into(), Value::from(self.plan_id.as_str()));
            entity
                .metadata
                .insert("agentNumber".into(), Value::from(number.as_str()));
            self.builder.add_entity(entity);
            self.builder
                .relate(&self.plan, &agent, RelationType::Contains);

            for entry in list_field(&doc.fields, "feature")
                .into_iter()
                .chain(list_field(&doc.fields, "features"))
            {
                match self.feature_ref(&entry) {
                    Some(feature) => {
                        self.builder
                            .relate(&agent, &feature, RelationType::Implements)
                    }
                    None => self.builder.warn(format!(
                        "unrecognized feature reference '{}' in {}",
                        entry,
                        path.display()
                    )),
                }
            }

            self.link_document(&agent, &doc);
        }
    }

    /// `feature:NNNN#N`, or a bare number (`2`, `Feature 2`) in this plan
    fn feature_ref(&self, entry: &str) -> Option<CanonicalRef> {
        if let Some(parsed) = CanonicalRef::parse(entry.trim()) {
            return (parsed.entity_type == EntityType::Feature).then_some(parsed);
        }
        let caps = trailing_number_re().captures(entry)?;
        let number = caps[1].parse().ok()?;
        Some(CanonicalRef::feature(&self.plan_id, number))
    }

    /// Tags, files and dependencies mentioned by a document
    fn link_document(&mut self, owner: &CanonicalRef, doc: &Document) {
        let mut tags = list_field(&doc.fields, "tags");
        for line in doc.scanned.lines() {
            tags.extend(scan_tags(line));
        }
        for tag in &tags {
            self.link_tag(owner, tag);
        }

        let files = list_field(&doc.fields, "files").into_iter().chain(
            doc.scanned
                .code_spans()
                .filter(|span| looks_like_path(span))
                .map(str::to_string),
        );
        for path in files.collect::<Vec<_>>() {
            let file = CanonicalRef::file(&path);
            if file.value.is_empty() {
                continue;
            }
            self.builder
                .add_entity(NewEntity::new(file.clone(), file.value.as_str()));
            self.builder.relate(owner, &file, RelationType::Modifies);
        }

        for entry in list_field(&doc.fields, "dependencies") {
            match parse_dependency_entry(&entry, &self.plan_id) {
                Some(target) => self.link_dependency(owner, &target),
                None => self.builder.warn(format!(
                    "unrecognized dependency '{}' in {}",
                    entry, doc.source
                )),
            }
        }

        let mut targets = Vec::new();
        for section in &doc.scanned.sections {
            let dependency_section = mentions_dependency(&section.heading);
            for line in &section.lines {
                targets.extend(scan_agent_tokens(line));
                if dependency_section || mentions_dependency(line) {
                    targets.extend(scan_dependency_line(line, &self.plan_id));
                }
            }
        }
        for target in &targets {
            self.link_dependency(owner, target);
        }
    }

    fn link_tag(&mut self, owner: &CanonicalRef, name: &str) {
        let Some(tag) = CanonicalRef::tag(name) else {
            debug!("dropping invalid tag '{}'", name);
            return;
        };
        self.builder
            .add_entity(NewEntity::new(tag.clone(), tag.value.as_str()));
        self.builder.relate(owner, &tag, RelationType::TaggedWith);
    }

    fn link_dependency(&mut self, owner: &CanonicalRef, target: &CanonicalRef) {
        if target.entity_type == EntityType::Plan {
            self.builder.ensure_plan_placeholder(&target.value);
        }
        self.builder.relate(owner, target, RelationType::DependsOn);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::is_placeholder;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &Path, rel: &str, content: &str) -> PathBuf {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        path
    }

    fn ids(result: &ExtractionResult) -> Vec<String> {
        result.entities.iter().map(|e| e.canonical_id()).collect()
    }

    fn has_edge(result: &ExtractionResult, from: &str, to: &str, rel: RelationType) -> bool {
        result.relationships.iter().any(|r| {
            r.source.to_string() == from && r.target.to_string() == to && r.relation_type == rel
        })
    }

    fn sample_plan() -> (TempDir, PathBuf) {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("0042-search-rework");
        write(
            &root,
            "0042-search-rework-plan.md",
            "---\nstatus: WIP\ntags: [search]\n---\n\
             # Search Rework\n\n\
             Rebuild the index. #backend\n\n\
             Depends on 0007 for the new schema.\n\n\
             ## Feature 1: Index schema\n\nTouches `src/index.rs`. #storage\n\n\
             ## Feature: Query parser\n\nParser work.\n\n\
             ## Notes\n\nShipped in 2024 with 300 tests.\n",
        );
        write(
            &root,
            "agents/000-schema.md",
            "---\nstatus: WIP\nfiles: [src/index.rs, ./src/schema.rs]\nfeatures: [1]\n---\n\
             # Build schema\n\nSee agent:0007#002 for the old layout.\n",
        );
        write(
            &root,
            "agents/001-parser.md",
            "---\nstatus: PASS\ndependencies: [000]\nfeature: 2\n---\n\
             # Parser\n\n```\ndepends on 0099\n```\n",
        );
        write(&root, "agents/notes.md", "# Not an agent\n");
        (tmp, root)
    }

    #[test]
    fn test_extracts_plan_features_and_agents() {
        let (_tmp, root) = sample_plan();
        let result = extract_plan(&root);

        assert_eq!(result.plan_id.as_deref(), Some("0042"));
        assert!(result.warnings.is_empty(), "{:?}", result.warnings);

        let plan = result.entity(&CanonicalRef::plan("0042")).unwrap();
        assert_eq!(plan.name, "Search Rework");
        assert_eq!(plan.metadata["planId"], "0042");
        assert_eq!(plan.metadata["status"], "WIP");
        assert!(plan.source_path.as_deref().unwrap().ends_with("-plan.md"));
        assert_eq!(plan.content_hash.as_ref().unwrap().len(), 64);

        let f1 = result.entity(&CanonicalRef::feature("0042", 1)).unwrap();
        assert_eq!(f1.name, "Index schema");
        let f2 = result.entity(&CanonicalRef::feature("0042", 2)).unwrap();
        assert_eq!(f2.name, "Query parser");

        let agent = result.entity(&CanonicalRef::agent("0042", "000")).unwrap();
        assert_eq!(agent.name, "Build schema");
        assert_eq!(agent.metadata["agentNumber"], "000");
        assert!(result.entity(&CanonicalRef::agent("0042", "001")).is_some());

        assert!(has_edge(&result, "plan:0042", "feature:0042#1", RelationType::Contains));
        assert!(has_edge(&result, "plan:0042", "agent:0042#000", RelationType::Contains));
        assert!(has_edge(&result, "agent:0042#000", "feature:0042#1", RelationType::Implements));
        assert!(has_edge(&result, "agent:0042#001", "feature:0042#2", RelationType::Implements));
    }

    #[test]
    fn test_files_and_tags() {
        let (_tmp, root) = sample_plan();
        let result = extract_plan(&root);

        assert!(has_edge(&result, "agent:0042#000", "file:src/index.rs", RelationType::Modifies));
        assert!(has_edge(&result, "agent:0042#000", "file:src/schema.rs", RelationType::Modifies));
        assert!(has_edge(&result, "plan:0042", "file:src/index.rs", RelationType::Modifies));

        assert!(has_edge(&result, "plan:0042", "tag:search", RelationType::TaggedWith));
        assert!(has_edge(&result, "plan:0042", "tag:backend", RelationType::TaggedWith));
        assert!(has_edge(&result, "feature:0042#1", "tag:storage", RelationType::TaggedWith));
        assert!(!has_edge(&result, "feature:0042#2", "tag:storage", RelationType::TaggedWith));
    }

    #[test]
    fn test_dependency_grammars() {
        let (_tmp, root) = sample_plan();
        let result = extract_plan(&root);

        // Bare plan ref on a dependency line creates a placeholder
        assert!(has_edge(&result, "plan:0042", "plan:0007", RelationType::DependsOn));
        let placeholder = result.entity(&CanonicalRef::plan("0007")).unwrap();
        assert_eq!(placeholder.name, "Plan 0007");
        assert!(is_placeholder(placeholder));

        // Explicit agent token anywhere in prose
        assert!(has_edge(&result, "agent:0042#000", "agent:0007#002", RelationType::DependsOn));

        // YAML integer dependency resolved against this plan
        assert!(has_edge(&result, "agent:0042#001", "agent:0042#000", RelationType::DependsOn));

        // Numbers in ordinary prose and code blocks are not references
        let all = ids(&result);
        assert!(!all.iter().any(|id| id == "plan:2024" || id == "plan:0099"));
        assert!(!result
            .relationships
            .iter()
            .any(|r| r.target.to_string() == "agent:0042#300"));
    }

    #[test]
    fn test_inner_path_resolves_to_plan_root() {
        let (_tmp, root) = sample_plan();
        let from_file = extract_plan(root.join("agents/000-schema.md"));
        let from_root = extract_plan(&root);

        assert_eq!(from_file.plan_id.as_deref(), Some("0042"));
        assert_eq!(ids(&from_file), ids(&from_root));
    }

    #[test]
    fn test_unique_ids_and_no_self_loops() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("0003-loops");
        write(
            &root,
            "plan.md",
            "# Loops\n\nDepends on 0003.\n\n## Feature 2: B\n\n## Feature: C\n\n## Feature 2: Again\n",
        );
        write(
            &root,
            "agents/004-self.md",
            "---\ndependencies: [004, '0003#004']\ntags: [x, X, '#x']\n---\nDepends on 004 and agent:0003#004\n",
        );

        let result = extract_plan(&root);
        let mut all = ids(&result);
        let count = all.len();
        all.sort();
        all.dedup();
        assert_eq!(all.len(), count);

        assert!(result.relationships.iter().all(|r| r.source != r.target));

        // Unnumbered feature after "Feature 2" takes 3
        assert!(result.entity(&CanonicalRef::feature("0003", 3)).is_some());
        assert_eq!(
            result.entity(&CanonicalRef::feature("0003", 2)).unwrap().name,
            "Again"
        );

        // Own plan is real, not a placeholder
        let plan = result.entity(&CanonicalRef::plan("0003")).unwrap();
        assert!(!is_placeholder(plan));
    }

    #[test]
    fn test_missing_path_warns() {
        let result = extract_plan("/definitely/not/here/0001-x");
        assert!(result.is_empty());
        assert_eq!(result.warnings.len(), 1);
        assert!(result.plan_id.is_none());
    }

    #[test]
    fn test_folder_without_prefix_warns() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("no-number");
        fs::create_dir_all(&dir).unwrap();

        let result = extract_plan(&dir);
        assert!(result.is_empty());
        assert!(result.warnings[0].contains("plan prefix"));
    }

    #[test]
    fn test_missing_markdown_and_agents_dir() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("0005-empty");
        fs::create_dir_all(&root).unwrap();

        let result = extract_plan(&root);
        assert_eq!(result.warnings.len(), 2);
        let plan = result.entity(&CanonicalRef::plan("0005")).unwrap();
        assert_eq!(plan.name, "0005-empty");
        assert!(plan.source_path.is_none());
    }

    #[test]
    fn test_prefers_plan_suffix() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("0006-pick");
        write(&root, "a-notes.md", "# Notes\n");
        write(&root, "z-plan.md", "# The Plan\n");
        fs::create_dir_all(root.join("agents")).unwrap();

        let result = extract_plan(&root);
        assert_eq!(
            result.entity(&CanonicalRef::plan("0006")).unwrap().name,
            "The Plan"
        );
    }

    #[test]
    fn test_bad_frontmatter_is_a_warning() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("0008-bad");
        write(&root, "0008-plan.md", "---\ntags: [unclosed\n---\n# Still Here\n");
        fs::create_dir_all(root.join("agents")).unwrap();

        let result = extract_plan(&root);
        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].contains("frontmatter"));
        assert_eq!(
            result.entity(&CanonicalRef::plan("0008")).unwrap().name,
            "Still Here"
        );
    }
}
