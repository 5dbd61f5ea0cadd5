//! The revision graph.
//!
//! Revisions form a DAG through their `down_revision` (parent) and
//! `depends_on` edges. [`RevisionMap`] validates the graph when it is built,
//! resolves user-facing revision specs (`head`, `heads`, `base`,
//! `label@head`, id prefixes, ...) and computes upgrade and downgrade paths.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt::Write as _;

use indexmap::IndexMap;

use crate::error::{MigrateResult, MigrationError};
use crate::script::Revision;

/// Marker shown for the parents of a base revision.
pub const BASE_MARKER: &str = "<base>";

/// Split a `start:end` range. Either side may be empty.
pub fn split_range(spec: &str) -> Option<(&str, &str)> {
    spec.split_once(':')
}

/// What a downgrade goes back to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DowngradeTarget {
    /// Revert everything.
    Base,
    /// Revert every applied revision carrying a branch label.
    BranchBase(String),
    /// Revert everything applied on top of these revisions.
    Revisions(Vec<String>),
}

/// Options for [`RevisionMap::format_revision`].
#[derive(Debug, Clone, Default)]
pub struct FormatOptions<'a> {
    /// Multi-line output with path, dependencies and full message.
    pub verbose: bool,
    /// Revisions to tag as `(current)`.
    pub current: &'a [String],
}

/// A validated revision DAG.
#[derive(Debug, Clone, Default)]
pub struct RevisionMap {
    revisions: IndexMap<String, Revision>,
    children: HashMap<String, Vec<String>>,
    dependents: HashMap<String, Vec<String>>,
    labels: HashMap<String, BTreeSet<String>>,
    label_owners: HashMap<String, String>,
}

impl RevisionMap {
    /// Build and validate a graph.
    ///
    /// Fails on duplicate ids, references to unknown revisions, repeated
    /// branch labels and cycles.
    pub fn new(revisions: Vec<Revision>) -> MigrateResult<Self> {
        let mut map = Self::default();

        for rev in revisions {
            if let Some(existing) = map.revisions.get(&rev.id) {
                return Err(MigrationError::DuplicateRevision {
                    id: rev.id.clone(),
                    first: existing.path.display().to_string(),
                    second: rev.path.display().to_string(),
                });
            }
            map.revisions.insert(rev.id.clone(), rev);
        }

        for rev in map.revisions.values() {
            for parent in &rev.down_revisions {
                if !map.revisions.contains_key(parent) {
                    return Err(MigrationError::bad_reference(parent));
                }
                map.children
                    .entry(parent.clone())
                    .or_default()
                    .push(rev.id.clone());
            }
            for dep in &rev.depends_on {
                if !map.revisions.contains_key(dep) {
                    return Err(MigrationError::bad_reference(dep));
                }
                map.dependents
                    .entry(dep.clone())
                    .or_default()
                    .push(rev.id.clone());
            }
            for label in &rev.branch_labels {
                if let Some(owner) = map.label_owners.get(label) {
                    return Err(MigrationError::usage(format!(
                        "Branch name '{}' in revision {} already used by revision {}",
                        label, rev.id, owner
                    )));
                }
                map.label_owners.insert(label.clone(), rev.id.clone());
            }
        }

        let all: HashSet<String> = map.revisions.keys().cloned().collect();
        let order: Vec<String> = map.walk_set(&all).map(|r| r.id.clone()).collect();
        if order.len() != all.len() {
            let sorted: HashSet<&String> = order.iter().collect();
            let stuck: Vec<String> = map
                .revisions
                .keys()
                .filter(|id| !sorted.contains(id))
                .cloned()
                .collect();
            return Err(MigrationError::Cycle(stuck));
        }

        for id in &order {
            let labels = map.inherited_labels(id);
            map.labels.insert(id.clone(), labels);
        }

        Ok(map)
    }

    fn inherited_labels(&self, id: &str) -> BTreeSet<String> {
        let mut labels = BTreeSet::new();
        if let Some(rev) = self.revisions.get(id) {
            labels.extend(rev.branch_labels.iter().cloned());
            for parent in &rev.down_revisions {
                if let Some(parent_labels) = self.labels.get(parent) {
                    labels.extend(parent_labels.iter().cloned());
                }
            }
        }
        labels
    }

    /// Add a freshly generated revision.
    pub fn add_revision(&mut self, rev: Revision) -> MigrateResult<()> {
        if let Some(existing) = self.revisions.get(&rev.id) {
            return Err(MigrationError::DuplicateRevision {
                id: rev.id.clone(),
                first: existing.path.display().to_string(),
                second: rev.path.display().to_string(),
            });
        }
        for reference in rev.down_revisions.iter().chain(&rev.depends_on) {
            if !self.revisions.contains_key(reference) {
                return Err(MigrationError::bad_reference(reference));
            }
        }
        for label in &rev.branch_labels {
            if let Some(owner) = self.label_owners.get(label) {
                return Err(MigrationError::usage(format!(
                    "Branch name '{}' in revision {} already used by revision {}",
                    label, rev.id, owner
                )));
            }
        }

        for parent in &rev.down_revisions {
            self.children
                .entry(parent.clone())
                .or_default()
                .push(rev.id.clone());
        }
        for dep in &rev.depends_on {
            self.dependents
                .entry(dep.clone())
                .or_default()
                .push(rev.id.clone());
        }
        for label in &rev.branch_labels {
            self.label_owners.insert(label.clone(), rev.id.clone());
        }
        let id = rev.id.clone();
        self.revisions.insert(id.clone(), rev);
        let labels = self.inherited_labels(&id);
        self.labels.insert(id, labels);
        Ok(())
    }

    /// Look up a revision by exact id.
    pub fn get(&self, id: &str) -> Option<&Revision> {
        self.revisions.get(id)
    }

    /// Replace the stored path of a revision after it was moved.
    pub fn set_path(&mut self, id: &str, path: std::path::PathBuf) {
        if let Some(rev) = self.revisions.get_mut(id) {
            rev.path = path;
        }
    }

    /// All revisions in scan order.
    pub fn iter(&self) -> impl Iterator<Item = &Revision> {
        self.revisions.values()
    }

    /// Number of revisions.
    pub fn len(&self) -> usize {
        self.revisions.len()
    }

    /// Whether the graph has no revisions.
    pub fn is_empty(&self) -> bool {
        self.revisions.is_empty()
    }

    /// Direct children along parent edges.
    pub fn children(&self, id: &str) -> &[String] {
        self.children.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Effective branch labels (own and inherited).
    pub fn labels_of(&self, id: &str) -> Vec<&str> {
        self.labels
            .get(id)
            .map(|l| l.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Whether a branch label is declared anywhere.
    pub fn has_label(&self, label: &str) -> bool {
        self.label_owners.contains_key(label)
    }

    fn carries_label(&self, id: &str, label: &str) -> bool {
        self.labels.get(id).is_some_and(|l| l.contains(label))
    }

    /// Revisions with no children.
    pub fn heads(&self) -> Vec<String> {
        self.revisions
            .keys()
            .filter(|id| self.children(id).is_empty())
            .cloned()
            .collect()
    }

    /// Heads, additionally dropping revisions that others depend on.
    pub fn heads_resolving_dependencies(&self) -> Vec<String> {
        self.revisions
            .keys()
            .filter(|id| {
                self.children(id).is_empty()
                    && self.dependents.get(*id).is_none_or(|d| d.is_empty())
            })
            .cloned()
            .collect()
    }

    /// Revisions with no parents.
    pub fn bases(&self) -> Vec<String> {
        self.revisions
            .values()
            .filter(|r| r.is_base())
            .map(|r| r.id.clone())
            .collect()
    }

    /// Whether more than one revision names `id` as parent.
    pub fn is_branch_point(&self, id: &str) -> bool {
        self.children(id).len() > 1
    }

    /// Revisions that are branch points, in scan order.
    pub fn branch_points(&self) -> Vec<&Revision> {
        self.revisions
            .values()
            .filter(|r| self.is_branch_point(&r.id))
            .collect()
    }

    /// Resolve a revision spec to ids.
    pub fn get_revisions(&self, spec: &str) -> MigrateResult<Vec<String>> {
        let spec = spec.trim();
        if split_range(spec).is_some() {
            return Err(MigrationError::InvalidRange(spec.to_string()));
        }

        match spec {
            "heads" => return Ok(self.heads()),
            "head" => {
                let heads = self.heads();
                if heads.len() > 1 {
                    return Err(MigrationError::AmbiguousHead {
                        spec: spec.to_string(),
                        heads,
                    });
                }
                return Ok(heads);
            }
            "base" | "" => return Ok(Vec::new()),
            _ => {}
        }

        if let Some((label, rest)) = spec.split_once('@') {
            if !self.has_label(label) {
                return Err(MigrationError::bad_reference(spec));
            }
            return match rest {
                "head" => {
                    let heads: Vec<String> = self
                        .heads()
                        .into_iter()
                        .filter(|h| self.carries_label(h, label))
                        .collect();
                    match heads.len() {
                        0 => Err(MigrationError::bad_reference(spec)),
                        1 => Ok(heads),
                        _ => Err(MigrationError::AmbiguousHead {
                            spec: spec.to_string(),
                            heads,
                        }),
                    }
                }
                "base" => Ok(Vec::new()),
                prefix => {
                    let id = self.resolve_id(prefix, Some(label))?;
                    Ok(vec![id])
                }
            };
        }

        if self.revisions.contains_key(spec) {
            return Ok(vec![spec.to_string()]);
        }
        if let Some(owner) = self.label_owners.get(spec) {
            return Ok(vec![owner.clone()]);
        }
        Ok(vec![self.resolve_id(spec, None)?])
    }

    /// Resolve several specs and union the results, keeping first-seen order.
    pub fn get_revisions_many(&self, specs: &[String]) -> MigrateResult<Vec<String>> {
        let mut out: Vec<String> = Vec::new();
        for spec in specs {
            for id in self.get_revisions(spec)? {
                if !out.contains(&id) {
                    out.push(id);
                }
            }
        }
        Ok(out)
    }

    fn resolve_id(&self, prefix: &str, label: Option<&str>) -> MigrateResult<String> {
        let matches: Vec<&String> = self
            .revisions
            .keys()
            .filter(|id| id.starts_with(prefix))
            .filter(|id| label.is_none_or(|l| self.carries_label(id, l)))
            .collect();
        match matches.as_slice() {
            [one] => Ok((*one).clone()),
            _ => Err(MigrationError::bad_reference(prefix)),
        }
    }

    /// Every revision reachable from `ids` through parent and dependency
    /// edges, the starting points included.
    pub fn ancestors(&self, ids: &[String]) -> HashSet<String> {
        let mut seen = HashSet::new();
        let mut stack: Vec<&str> = ids.iter().map(String::as_str).collect();
        while let Some(id) = stack.pop() {
            if !seen.insert(id.to_string()) {
                continue;
            }
            if let Some(rev) = self.revisions.get(id) {
                stack.extend(rev.down_revisions.iter().map(String::as_str));
                stack.extend(rev.depends_on.iter().map(String::as_str));
            }
        }
        seen
    }

    /// Every revision reachable from `ids` through child and dependent
    /// edges, the starting points included.
    pub fn descendants(&self, ids: &[String]) -> HashSet<String> {
        let mut seen = HashSet::new();
        let mut stack: Vec<&str> = ids.iter().map(String::as_str).collect();
        while let Some(id) = stack.pop() {
            if !seen.insert(id.to_string()) {
                continue;
            }
            stack.extend(self.children(id).iter().map(String::as_str));
            if let Some(deps) = self.dependents.get(id) {
                stack.extend(deps.iter().map(String::as_str));
            }
        }
        seen
    }

    /// Revisions between `base` (exclusive) and `head` (inclusive), parents
    /// first.
    pub fn walk_revisions(&self, base: &[String], head: &[String]) -> Walk<'_> {
        let excluded = self.ancestors(base);
        let members: HashSet<String> = self
            .ancestors(head)
            .into_iter()
            .filter(|id| !excluded.contains(id))
            .collect();
        self.walk_set(&members)
    }

    fn walk_set(&self, members: &HashSet<String>) -> Walk<'_> {
        let mut pending = HashMap::new();
        let mut ready = VecDeque::new();
        for (id, rev) in &self.revisions {
            if !members.contains(id) {
                continue;
            }
            let count = rev
                .down_revisions
                .iter()
                .chain(&rev.depends_on)
                .filter(|p| members.contains(*p))
                .count();
            if count == 0 {
                ready.push_back(id.clone());
            } else {
                pending.insert(id.clone(), count);
            }
        }
        Walk {
            map: self,
            members: members.clone(),
            pending,
            ready,
        }
    }

    /// Revisions to apply, parents first, to go from `current` to `targets`.
    pub fn plan_upgrade(&self, current: &[String], targets: &[String]) -> Vec<String> {
        self.walk_revisions(current, targets)
            .map(|r| r.id.clone())
            .collect()
    }

    /// Revisions to revert, children first.
    pub fn plan_downgrade(
        &self,
        current: &[String],
        target: &DowngradeTarget,
    ) -> MigrateResult<Vec<String>> {
        let applied = self.ancestors(current);

        let revert: HashSet<String> = match target {
            DowngradeTarget::Base => applied,
            DowngradeTarget::BranchBase(label) => {
                if !self.has_label(label) {
                    return Err(MigrationError::bad_reference(format!("{}@base", label)));
                }
                let members: Vec<String> = applied
                    .iter()
                    .filter(|id| self.carries_label(id, label))
                    .cloned()
                    .collect();
                self.descendants(&members)
                    .into_iter()
                    .filter(|id| applied.contains(id))
                    .collect()
            }
            DowngradeTarget::Revisions(targets) => {
                for target in targets {
                    if !applied.contains(target) {
                        return Err(MigrationError::usage(format!(
                            "Destination {} is not a valid downgrade target from current head(s)",
                            target
                        )));
                    }
                }
                let keep = self.ancestors(targets);
                self.descendants(targets)
                    .into_iter()
                    .filter(|id| applied.contains(id) && !keep.contains(id))
                    .collect()
            }
        };

        let mut order: Vec<String> = self.walk_set(&revert).map(|r| r.id.clone()).collect();
        order.reverse();
        Ok(order)
    }

    /// The version rows that describe `applied`: its members with no child
    /// inside it.
    pub fn heads_of(&self, applied: &HashSet<String>) -> Vec<String> {
        self.revisions
            .keys()
            .filter(|id| applied.contains(*id))
            .filter(|id| !self.children(id).iter().any(|c| applied.contains(c)))
            .cloned()
            .collect()
    }

    /// One-line or verbose description used by `history`, `heads`, `show`
    /// and friends.
    pub fn format_revision(&self, rev: &Revision, options: &FormatOptions<'_>) -> String {
        let parents = if rev.down_revisions.is_empty() {
            BASE_MARKER.to_string()
        } else {
            rev.down_revisions.join(", ")
        };

        let mut markers = String::new();
        if !rev.branch_labels.is_empty() {
            let _ = write!(markers, " ({})", rev.branch_labels.join(", "));
        }
        if self.children(&rev.id).is_empty() {
            markers.push_str(" (head)");
        }
        if self.is_branch_point(&rev.id) {
            markers.push_str(" (branchpoint)");
        }
        if rev.is_merge_point() {
            markers.push_str(" (mergepoint)");
        }
        if options.current.contains(&rev.id) {
            markers.push_str(" (current)");
        }

        if !options.verbose {
            return format!("{} -> {}{}, {}", parents, rev.id, markers, rev.doc());
        }

        let mut out = String::new();
        let _ = writeln!(out, "Rev: {}{}", rev.id, markers);
        if rev.is_merge_point() {
            let _ = writeln!(out, "Merges: {}", parents);
        } else {
            let _ = writeln!(out, "Parent: {}", parents);
        }
        if !rev.depends_on.is_empty() {
            let _ = writeln!(out, "Also depends on: {}", rev.depends_on.join(", "));
        }
        if self.is_branch_point(&rev.id) {
            let _ = writeln!(out, "Branches into: {}", self.children(&rev.id).join(", "));
        }
        let labels = self.labels_of(&rev.id);
        if !labels.is_empty() {
            let _ = writeln!(out, "Branch names: {}", labels.join(", "));
        }
        let _ = writeln!(out, "Path: {}", rev.path.display());
        out.push('\n');
        for line in rev.message.as_deref().unwrap_or("").lines() {
            let _ = writeln!(out, "    {}", line);
        }
        out.push('\n');
        let _ = writeln!(out, "    Revision ID: {}", rev.id);
        let _ = writeln!(out, "    Revises: {}", rev.down_revisions.join(", "));
        if let Some(date) = rev.create_date {
            let _ = writeln!(out, "    Create Date: {}", date.format("%Y-%m-%d %H:%M:%S%.6f"));
        }
        out
    }
}

/// A lazy, parents-first traversal over part of a [`RevisionMap`].
///
/// Clone a fresh walk to traverse the same set again.
#[derive(Debug, Clone)]
pub struct Walk<'a> {
    map: &'a RevisionMap,
    members: HashSet<String>,
    pending: HashMap<String, usize>,
    ready: VecDeque<String>,
}

impl<'a> Iterator for Walk<'a> {
    type Item = &'a Revision;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.ready.pop_front()?;
        let map = self.map;
        let followers = map
            .children(&id)
            .iter()
            .chain(map.dependents.get(&id).into_iter().flatten());
        for follower in followers {
            if !self.members.contains(follower) {
                continue;
            }
            if let Some(count) = self.pending.get_mut(follower) {
                *count -= 1;
                if *count == 0 {
                    self.pending.remove(follower);
                    self.ready.push_back(follower.clone());
                }
            }
        }
        map.revisions.get(&id)
    }
}
