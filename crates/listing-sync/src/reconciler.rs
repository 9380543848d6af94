//! Reconciliation: diff normalized source records against mirror items.
//!
//! Planning is pure and happens in two phases. First every source record is
//! matched to at most one mirror item (stored reference first, then slug),
//! claiming that item. Only after all matches are known are the unclaimed
//! mirror items turned into deletes, so an item can never be both matched
//! and deleted in the same plan.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::debug;

use crate::mapper::{FieldMapping, MappedFields, SourceRecord};
use crate::mirror::MirrorRecord;
use crate::slug::{disambiguate, slugify};

/// Mutation classes a plan entry can belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    Create,
    Update,
    Publish,
    Delete,
}

impl MutationKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationKind::Create => "create",
            MutationKind::Update => "update",
            MutationKind::Publish => "publish",
            MutationKind::Delete => "delete",
        }
    }
}

impl std::fmt::Display for MutationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of a [`MutationPlan`].
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    /// Source record has no mirror item.
    Create {
        source_id: String,
        slug: String,
        /// Mapped fields including the slug.
        fields: MappedFields,
        /// Reference stored on the source that pointed at a missing item.
        stale_ref: Option<String>,
    },
    /// Matched pair whose mapped fields drifted.
    Update {
        source_id: String,
        mirror_id: String,
        /// Full mapped field set, never containing the slug.
        fields: MappedFields,
    },
    /// Matched pair in sync whose item has not reached the live listing.
    Publish { source_id: String, mirror_id: String },
    /// Mirror item with no source record.
    Delete { mirror_id: String, slug: String },
}

impl Mutation {
    #[must_use]
    pub fn kind(&self) -> MutationKind {
        match self {
            Mutation::Create { .. } => MutationKind::Create,
            Mutation::Update { .. } => MutationKind::Update,
            Mutation::Publish { .. } => MutationKind::Publish,
            Mutation::Delete { .. } => MutationKind::Delete,
        }
    }

    #[must_use]
    pub fn source_id(&self) -> Option<&str> {
        match self {
            Mutation::Create { source_id, .. }
            | Mutation::Update { source_id, .. }
            | Mutation::Publish { source_id, .. } => Some(source_id),
            Mutation::Delete { .. } => None,
        }
    }

    #[must_use]
    pub fn mirror_id(&self) -> Option<&str> {
        match self {
            Mutation::Update { mirror_id, .. }
            | Mutation::Publish { mirror_id, .. }
            | Mutation::Delete { mirror_id, .. } => Some(mirror_id),
            Mutation::Create { .. } => None,
        }
    }

    /// Stable key for logging and diagnostics.
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Mutation::Create { source_id, .. }
            | Mutation::Update { source_id, .. }
            | Mutation::Publish { source_id, .. } => source_id,
            Mutation::Delete { mirror_id, .. } => mirror_id,
        }
    }
}

/// A matched pair whose source record does not yet store the mirror id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relink {
    pub source_id: String,
    pub mirror_id: String,
}

/// Ordered mutations for one cycle: creates, updates and publishes first,
/// deletes last.
#[derive(Debug, Clone, Default)]
pub struct MutationPlan {
    pub entries: Vec<Mutation>,
    pub relinks: Vec<Relink>,
}

impl MutationPlan {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn count(&self, kind: MutationKind) -> usize {
        self.entries.iter().filter(|m| m.kind() == kind).count()
    }

    /// Split into the write phase and the delete phase.
    #[must_use]
    pub fn into_phases(self) -> (Vec<Mutation>, Vec<Mutation>) {
        self.entries
            .into_iter()
            .partition(|m| m.kind() != MutationKind::Delete)
    }
}

/// Computes a [`MutationPlan`] from both collections.
pub struct Reconciler<'a> {
    mapping: &'a FieldMapping,
    protected: HashSet<String>,
}

impl<'a> Reconciler<'a> {
    #[must_use]
    pub fn new(mapping: &'a FieldMapping) -> Self {
        Self {
            mapping,
            protected: HashSet::new(),
        }
    }

    /// Mirror ids that must not be deleted even when unmatched, e.g. items
    /// referenced by source rows that failed to normalize this cycle.
    #[must_use]
    pub fn with_protected<I>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        self.protected.extend(ids);
        self
    }

    /// Build the plan.
    #[must_use]
    pub fn plan(&self, sources: &[SourceRecord], mirrors: &[MirrorRecord]) -> MutationPlan {
        let by_id: HashMap<&str, &MirrorRecord> =
            mirrors.iter().map(|m| (m.id.as_str(), m)).collect();
        let mut by_slug: HashMap<&str, Vec<&MirrorRecord>> = HashMap::new();
        for mirror in mirrors.iter().filter(|m| !m.slug.is_empty()) {
            by_slug.entry(mirror.slug.as_str()).or_default().push(mirror);
        }

        let mut claimed: HashSet<&str> = HashSet::new();
        let mut matched: Vec<Option<&MirrorRecord>> = vec![None; sources.len()];

        // Phase 1a: stored references.
        for (idx, source) in sources.iter().enumerate() {
            let Some(reference) = source.mirror_ref.as_deref() else {
                continue;
            };
            if let Some(&mirror) = by_id.get(reference) {
                if claimed.insert(mirror.id.as_str()) {
                    matched[idx] = Some(mirror);
                }
            }
        }

        // Slugs of items kept by a reference stay taken: updates never
        // rename an item, so a create reusing one would be rejected.
        let reserved: HashSet<&str> = mirrors
            .iter()
            .filter(|m| !m.slug.is_empty() && claimed.contains(m.id.as_str()))
            .map(|m| m.slug.as_str())
            .collect();
        let slugs = resolve_slugs(
            sources
                .iter()
                .zip(&matched)
                .filter(|(_, mirror)| mirror.is_none())
                .map(|(source, _)| source),
            &reserved,
        );

        // Phase 1b: slugs, for whatever is still unmatched.
        for (idx, source) in sources.iter().enumerate() {
            if matched[idx].is_some() {
                continue;
            }
            let slug = slugs[source.id.as_str()].as_str();
            let candidate = by_slug
                .get(slug)
                .and_then(|list| list.iter().copied().find(|m| !claimed.contains(m.id.as_str())));
            if let Some(mirror) = candidate {
                claimed.insert(mirror.id.as_str());
                matched[idx] = Some(mirror);
            }
        }

        // Phase 2: derive entries from the final match set.
        let mut plan = MutationPlan::default();
        for (source, mirror) in sources.iter().zip(&matched) {
            match mirror {
                Some(mirror) => {
                    if source.mirror_ref.as_deref() != Some(mirror.id.as_str()) {
                        plan.relinks.push(Relink {
                            source_id: source.id.clone(),
                            mirror_id: mirror.id.clone(),
                        });
                    }
                    let fields = self.mapping.map_fields(source);
                    if fields.differs_from(&mirror.fields) {
                        plan.entries.push(Mutation::Update {
                            source_id: source.id.clone(),
                            mirror_id: mirror.id.clone(),
                            fields,
                        });
                    } else if mirror.pending_publish {
                        plan.entries.push(Mutation::Publish {
                            source_id: source.id.clone(),
                            mirror_id: mirror.id.clone(),
                        });
                    }
                }
                None => {
                    let slug = slugs[source.id.as_str()].clone();
                    plan.entries.push(Mutation::Create {
                        source_id: source.id.clone(),
                        fields: self.mapping.create_fields(source, &slug),
                        slug,
                        stale_ref: source.mirror_ref.clone(),
                    });
                }
            }
        }

        for mirror in mirrors {
            if claimed.contains(mirror.id.as_str()) {
                continue;
            }
            if self.protected.contains(&mirror.id) {
                debug!(mirror_id = %mirror.id, "Keeping unmatched mirror item referenced by a skipped source record");
                continue;
            }
            plan.entries.push(Mutation::Delete {
                mirror_id: mirror.id.clone(),
                slug: mirror.slug.clone(),
            });
        }

        debug!(
            sources = sources.len(),
            mirrors = mirrors.len(),
            creates = plan.count(MutationKind::Create),
            updates = plan.count(MutationKind::Update),
            publishes = plan.count(MutationKind::Publish),
            deletes = plan.count(MutationKind::Delete),
            relinks = plan.relinks.len(),
            "Computed mutation plan"
        );

        plan
    }
}

/// Assign every source record a slug that is unique within the cycle.
///
/// Records sharing a base slug are ordered by id; the first keeps the base
/// slug and the rest get the record id appended. Blank base slugs always
/// fall back to the record id, and so does a base slug found in `reserved`.
#[must_use]
pub fn resolve_slugs<'s, I>(sources: I, reserved: &HashSet<&str>) -> HashMap<&'s str, String>
where
    I: IntoIterator<Item = &'s SourceRecord>,
{
    let mut groups: BTreeMap<String, Vec<&'s str>> = BTreeMap::new();
    for source in sources {
        groups
            .entry(slugify(&source.name))
            .or_default()
            .push(source.id.as_str());
    }

    let mut resolved: HashMap<&'s str, String> = HashMap::new();
    let mut taken: HashSet<String> = reserved.iter().map(|s| (*s).to_string()).collect();
    let mut pending: Vec<(&str, &'s str)> = Vec::new();

    for (base, ids) in &mut groups {
        ids.sort_unstable();
        let mut rest = ids.iter();
        if !base.is_empty() && !taken.contains(base.as_str()) {
            if let Some(first) = rest.next() {
                taken.insert(base.clone());
                resolved.insert(*first, base.clone());
            }
        }
        pending.extend(rest.map(|id| (base.as_str(), *id)));
    }

    pending.sort_unstable_by(|a, b| a.1.cmp(b.1));
    for (base, id) in pending {
        let mut candidate = disambiguate(base, id);
        let mut n = 2;
        while taken.contains(&candidate) {
            candidate = format!("{}-{n}", disambiguate(base, id));
            n += 1;
        }
        taken.insert(candidate.clone());
        resolved.insert(id, candidate);
    }

    resolved
}
