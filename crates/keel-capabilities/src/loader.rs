//! Capability loader: three-state promotion under a token budget.
//!
//! States only move forward within a session (Unloaded → Loaded →
//! Expanded); the only demotion path is a full [`CapabilityLoader::reset`].
//! Promotion is all-or-nothing against the budget: a promotion that would
//! overflow it loads nothing and returns `BudgetExceeded`.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use keel_core::ids::ManifestId;
use keel_core::tokens::estimate_tokens;

use crate::errors::CapabilityError;
use crate::matching::{mentions, tokenize, trigger_matches};
use crate::parser::parse_capsule;

/// A reference file a manifest can promote at the Expanded level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceFile {
    /// Name as declared in the capsule header.
    pub name: String,
    /// Resolved path, relative to the capsule's directory.
    pub path: PathBuf,
}

/// One discovered capability, header-only resident.
#[derive(Debug, Clone)]
pub struct CapabilityManifest {
    /// Stable identifier from the capsule header.
    pub id: ManifestId,
    /// What kind of task this capability serves; always resident.
    pub trigger_description: String,
    /// The CAPSULE.md file the body is promoted from.
    pub capsule_path: PathBuf,
    /// Files promotable at the Reference level.
    pub references: Vec<ReferenceFile>,
    /// Declared size on disk (capsule plus present references).
    pub size_bytes: u64,
}

/// Disclosure state of one manifest within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LoadState {
    /// Only the trigger description is resident.
    Unloaded,
    /// The instruction body is resident.
    Loaded,
    /// The body and at least one reference file are resident.
    Expanded,
}

/// What to promote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadLevel {
    /// The capsule's instruction body.
    Body,
    /// A named reference file (implies the body).
    Reference(String),
}

/// Content returned by a promotion request.
#[derive(Debug, Clone)]
pub struct LoadedContent {
    /// Manifest the content belongs to.
    pub id: ManifestId,
    /// The promoted text.
    pub text: String,
    /// Estimated tokens the text occupies.
    pub tokens: u64,
    /// `false` when the request was an idempotent no-op on already
    /// resident content.
    pub newly_loaded: bool,
}

/// One line of the always-resident enumeration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestSummary {
    /// Manifest id.
    pub id: ManifestId,
    /// Trigger description.
    pub trigger_description: String,
    /// Current disclosure state.
    pub state: LoadState,
    /// Declared size on disk.
    pub size_bytes: u64,
}

#[derive(Debug)]
struct Slot {
    manifest: CapabilityManifest,
    state: LoadState,
    body: Option<String>,
    body_tokens: u64,
    refs: HashMap<String, (String, u64)>,
}

/// Session-scoped capability cache.
#[derive(Debug)]
pub struct CapabilityLoader {
    slots: Vec<Slot>,
    index: HashMap<ManifestId, usize>,
    budget_tokens: u64,
    resident_tokens: u64,
}

impl CapabilityLoader {
    /// Create an empty loader with the given resident-content budget.
    #[must_use]
    pub fn new(budget_tokens: u64) -> Self {
        Self {
            slots: Vec::new(),
            index: HashMap::new(),
            budget_tokens,
            resident_tokens: 0,
        }
    }

    /// Create a loader seeded with discovered manifests.
    ///
    /// Later duplicates of an id are dropped with a warning.
    #[must_use]
    pub fn with_manifests(manifests: Vec<CapabilityManifest>, budget_tokens: u64) -> Self {
        let mut loader = Self::new(budget_tokens);
        for manifest in manifests {
            let _ = loader.insert(manifest);
        }
        loader
    }

    /// Register one manifest. Returns `false` if the id is already taken.
    pub fn insert(&mut self, manifest: CapabilityManifest) -> bool {
        if self.index.contains_key(&manifest.id) {
            warn!(id = %manifest.id, "Duplicate capability id dropped");
            return false;
        }
        let _ = self.index.insert(manifest.id.clone(), self.slots.len());
        self.slots.push(Slot {
            manifest,
            state: LoadState::Unloaded,
            body: None,
            body_tokens: 0,
            refs: HashMap::new(),
        });
        true
    }

    /// The always-resident enumeration, in discovery order.
    #[must_use]
    pub fn enumeration(&self) -> Vec<ManifestSummary> {
        self.slots
            .iter()
            .map(|slot| ManifestSummary {
                id: slot.manifest.id.clone(),
                trigger_description: slot.manifest.trigger_description.clone(),
                state: slot.state,
                size_bytes: slot.manifest.size_bytes,
            })
            .collect()
    }

    /// Disclosure state of one manifest.
    #[must_use]
    pub fn state(&self, id: &ManifestId) -> Option<LoadState> {
        self.index.get(id).map(|&i| self.slots[i].state)
    }

    /// Tokens currently resident through this loader.
    #[must_use]
    pub fn resident_tokens(&self) -> u64 {
        self.resident_tokens
    }

    /// The resident-content budget.
    #[must_use]
    pub fn budget_tokens(&self) -> u64 {
        self.budget_tokens
    }

    /// Manifests whose triggers match the given task text, in discovery
    /// order. `@id` mentions always match; otherwise lexical word overlap
    /// decides.
    #[must_use]
    pub fn triggered_by(&self, text: &str) -> Vec<ManifestId> {
        let words = tokenize(text);
        let mentioned = mentions(text);
        self.slots
            .iter()
            .filter(|slot| {
                mentioned.contains(&slot.manifest.id.as_str().to_lowercase())
                    || trigger_matches(&slot.manifest.trigger_description, &words)
            })
            .map(|slot| slot.manifest.id.clone())
            .collect()
    }

    /// Promote a manifest to the requested level and return the content.
    ///
    /// Idempotent: requesting already-resident content returns it without
    /// charging the budget again. A `Reference` request on an unloaded
    /// manifest promotes the body too, charged atomically — if the
    /// combined cost overflows the budget, nothing is loaded.
    pub fn ensure_loaded(
        &mut self,
        id: &ManifestId,
        level: &LoadLevel,
    ) -> Result<LoadedContent, CapabilityError> {
        let idx = *self
            .index
            .get(id)
            .ok_or_else(|| CapabilityError::UnknownManifest { id: id.clone() })?;

        match level {
            LoadLevel::Body => self.ensure_body(idx),
            LoadLevel::Reference(name) => self.ensure_reference(idx, name),
        }
    }

    /// Forget all promoted content, returning every manifest to Unloaded.
    ///
    /// The only demotion path; corresponds to a full session reset.
    pub fn reset(&mut self) {
        for slot in &mut self.slots {
            slot.state = LoadState::Unloaded;
            slot.body = None;
            slot.body_tokens = 0;
            slot.refs.clear();
        }
        self.resident_tokens = 0;
        debug!("Capability loader reset; all manifests unloaded");
    }

    fn ensure_body(&mut self, idx: usize) -> Result<LoadedContent, CapabilityError> {
        let id = self.slots[idx].manifest.id.clone();
        if let Some(body) = &self.slots[idx].body {
            return Ok(LoadedContent {
                id,
                text: body.clone(),
                tokens: self.slots[idx].body_tokens,
                newly_loaded: false,
            });
        }

        let path = self.slots[idx].manifest.capsule_path.clone();
        let body = read_capsule_body(&path)?;
        let tokens = estimate_tokens(&body);
        self.charge(&id, tokens)?;

        let slot = &mut self.slots[idx];
        slot.body = Some(body.clone());
        slot.body_tokens = tokens;
        slot.state = slot.state.max(LoadState::Loaded);
        debug!(id = %id, tokens, "Capability body promoted");

        Ok(LoadedContent {
            id,
            text: body,
            tokens,
            newly_loaded: true,
        })
    }

    fn ensure_reference(&mut self, idx: usize, name: &str) -> Result<LoadedContent, CapabilityError> {
        let id = self.slots[idx].manifest.id.clone();
        if let Some((text, tokens)) = self.slots[idx].refs.get(name) {
            return Ok(LoadedContent {
                id,
                text: text.clone(),
                tokens: *tokens,
                newly_loaded: false,
            });
        }

        let reference = self.slots[idx]
            .manifest
            .references
            .iter()
            .find(|r| r.name == name)
            .cloned()
            .ok_or_else(|| CapabilityError::UnknownReference {
                id: id.clone(),
                name: name.to_string(),
            })?;

        let ref_text =
            std::fs::read_to_string(&reference.path).map_err(|source| CapabilityError::Io {
                path: reference.path.display().to_string(),
                source,
            })?;
        let ref_tokens = estimate_tokens(&ref_text);

        // An unloaded manifest gets its body in the same promotion, with
        // one combined budget check so a refusal loads nothing.
        let body = if self.slots[idx].body.is_none() {
            let path = self.slots[idx].manifest.capsule_path.clone();
            Some(read_capsule_body(&path)?)
        } else {
            None
        };
        let body_tokens = body.as_deref().map_or(0, estimate_tokens);

        self.charge(&id, ref_tokens + body_tokens)?;

        let slot = &mut self.slots[idx];
        if let Some(body) = body {
            slot.body = Some(body);
            slot.body_tokens = body_tokens;
        }
        let _ = slot
            .refs
            .insert(name.to_string(), (ref_text.clone(), ref_tokens));
        slot.state = LoadState::Expanded;
        debug!(id = %id, reference = name, tokens = ref_tokens, "Capability reference promoted");

        Ok(LoadedContent {
            id,
            text: ref_text,
            tokens: ref_tokens,
            newly_loaded: true,
        })
    }

    /// Charge tokens against the budget, or decline in full.
    fn charge(&mut self, id: &ManifestId, needed_tokens: u64) -> Result<(), CapabilityError> {
        let available_tokens = self.budget_tokens.saturating_sub(self.resident_tokens);
        if needed_tokens > available_tokens {
            warn!(
                id = %id,
                needed_tokens,
                available_tokens,
                "Capability promotion declined: budget exceeded"
            );
            return Err(CapabilityError::BudgetExceeded {
                id: id.clone(),
                needed_tokens,
                available_tokens,
                budget_tokens: self.budget_tokens,
            });
        }
        self.resident_tokens += needed_tokens;
        Ok(())
    }
}

/// Read and strip a capsule file down to its instruction body.
fn read_capsule_body(path: &std::path::Path) -> Result<String, CapabilityError> {
    let raw = std::fs::read_to_string(path).map_err(|source| CapabilityError::Io {
        path: path.display().to_string(),
        source,
    })?;
    Ok(parse_capsule(&raw).body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::fs;
    use tempfile::TempDir;

    use crate::discovery::{CAPSULE_FILENAME, scan_capsules};

    /// A capsule on disk with a ~100-token body and one ~50-token reference.
    fn fixture(tmp: &TempDir, id: &str, trigger: &str) -> CapabilityManifest {
        let dir = tmp.path().join(id);
        fs::create_dir_all(&dir).unwrap();
        let body = "b".repeat(400);
        fs::write(
            dir.join(CAPSULE_FILENAME),
            format!("---\nid: {id}\ntrigger: {trigger}\nreferences: [extra.md]\n---\n{body}"),
        )
        .unwrap();
        fs::write(dir.join("extra.md"), "r".repeat(200)).unwrap();

        let report = scan_capsules(&dir);
        assert!(report.errors.is_empty());
        report.manifests.into_iter().next().unwrap()
    }

    #[test]
    fn test_enumeration_is_resident_without_loading() {
        let tmp = TempDir::new().unwrap();
        let loader =
            CapabilityLoader::with_manifests(vec![fixture(&tmp, "pdf", "PDF files")], 10_000);

        let listing = loader.enumeration();
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].trigger_description, "PDF files");
        assert_eq!(listing[0].state, LoadState::Unloaded);
        assert_eq!(loader.resident_tokens(), 0);
    }

    #[test]
    fn test_body_promotion_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let manifest = fixture(&tmp, "pdf", "PDF files");
        let id = manifest.id.clone();
        let mut loader = CapabilityLoader::with_manifests(vec![manifest], 10_000);

        let first = loader.ensure_loaded(&id, &LoadLevel::Body).unwrap();
        assert!(first.newly_loaded);
        assert_eq!(loader.state(&id), Some(LoadState::Loaded));
        let after_first = loader.resident_tokens();
        assert_eq!(after_first, first.tokens);

        // Re-triggering an already-loaded manifest is a no-op.
        let second = loader.ensure_loaded(&id, &LoadLevel::Body).unwrap();
        assert!(!second.newly_loaded);
        assert_eq!(second.text, first.text);
        assert_eq!(loader.resident_tokens(), after_first);
    }

    #[test]
    fn test_budget_exceeded_fails_closed() {
        let tmp = TempDir::new().unwrap();
        let manifest = fixture(&tmp, "pdf", "PDF files");
        let id = manifest.id.clone();
        let mut loader = CapabilityLoader::with_manifests(vec![manifest], 10);

        let err = loader.ensure_loaded(&id, &LoadLevel::Body).unwrap_err();
        assert_matches!(err, CapabilityError::BudgetExceeded { available_tokens: 10, .. });
        // Nothing was partially loaded.
        assert_eq!(loader.state(&id), Some(LoadState::Unloaded));
        assert_eq!(loader.resident_tokens(), 0);
    }

    #[test]
    fn test_reference_promotion_expands() {
        let tmp = TempDir::new().unwrap();
        let manifest = fixture(&tmp, "pdf", "PDF files");
        let id = manifest.id.clone();
        let mut loader = CapabilityLoader::with_manifests(vec![manifest], 10_000);

        let _ = loader.ensure_loaded(&id, &LoadLevel::Body).unwrap();
        let reference = loader
            .ensure_loaded(&id, &LoadLevel::Reference("extra.md".to_string()))
            .unwrap();
        assert!(reference.newly_loaded);
        assert!(reference.text.starts_with('r'));
        assert_eq!(loader.state(&id), Some(LoadState::Expanded));
    }

    #[test]
    fn test_reference_on_unloaded_manifest_charges_atomically() {
        let tmp = TempDir::new().unwrap();
        let manifest = fixture(&tmp, "pdf", "PDF files");
        let id = manifest.id.clone();

        // Budget fits the reference (50 tokens) but not body + reference.
        let mut small = CapabilityLoader::with_manifests(vec![manifest.clone()], 60);
        let err = small
            .ensure_loaded(&id, &LoadLevel::Reference("extra.md".to_string()))
            .unwrap_err();
        assert_matches!(err, CapabilityError::BudgetExceeded { .. });
        assert_eq!(small.state(&id), Some(LoadState::Unloaded));
        assert_eq!(small.resident_tokens(), 0);

        // With room for both, one call promotes straight to Expanded.
        let mut roomy = CapabilityLoader::with_manifests(vec![manifest], 10_000);
        let loaded = roomy
            .ensure_loaded(&id, &LoadLevel::Reference("extra.md".to_string()))
            .unwrap();
        assert!(loaded.newly_loaded);
        assert_eq!(roomy.state(&id), Some(LoadState::Expanded));
    }

    #[test]
    fn test_unknown_manifest_and_reference() {
        let tmp = TempDir::new().unwrap();
        let manifest = fixture(&tmp, "pdf", "PDF files");
        let id = manifest.id.clone();
        let mut loader = CapabilityLoader::with_manifests(vec![manifest], 10_000);

        let missing = ManifestId::from("nope");
        assert_matches!(
            loader.ensure_loaded(&missing, &LoadLevel::Body),
            Err(CapabilityError::UnknownManifest { .. })
        );
        assert_matches!(
            loader.ensure_loaded(&id, &LoadLevel::Reference("ghost.md".to_string())),
            Err(CapabilityError::UnknownReference { .. })
        );
    }

    #[test]
    fn test_states_never_demote_without_reset() {
        let tmp = TempDir::new().unwrap();
        let manifest = fixture(&tmp, "pdf", "PDF files");
        let id = manifest.id.clone();
        let mut loader = CapabilityLoader::with_manifests(vec![manifest], 10_000);

        let _ = loader
            .ensure_loaded(&id, &LoadLevel::Reference("extra.md".to_string()))
            .unwrap();
        assert_eq!(loader.state(&id), Some(LoadState::Expanded));

        // A body request on an expanded manifest must not demote it.
        let _ = loader.ensure_loaded(&id, &LoadLevel::Body).unwrap();
        assert_eq!(loader.state(&id), Some(LoadState::Expanded));

        loader.reset();
        assert_eq!(loader.state(&id), Some(LoadState::Unloaded));
        assert_eq!(loader.resident_tokens(), 0);
    }

    #[test]
    fn test_triggered_by_lexical_and_mention() {
        let tmp = TempDir::new().unwrap();
        let pdf = fixture(&tmp, "pdf-tools", "working with PDF files");
        let sheets = fixture(&tmp, "sheets", "spreadsheet formulas");
        let loader = CapabilityLoader::with_manifests(vec![pdf, sheets], 10_000);

        let lexical = loader.triggered_by("extract tables from this pdf");
        assert_eq!(lexical, vec![ManifestId::from("pdf-tools")]);

        let mentioned = loader.triggered_by("use @sheets for this");
        assert_eq!(mentioned, vec![ManifestId::from("sheets")]);

        assert!(loader.triggered_by("unrelated request").is_empty());
    }

    #[test]
    fn test_duplicate_id_dropped() {
        let tmp = TempDir::new().unwrap();
        let a = fixture(&tmp, "pdf", "PDF files");
        let mut b = fixture(&tmp, "pdf2", "other");
        b.id = a.id.clone();
        let loader = CapabilityLoader::with_manifests(vec![a, b], 10_000);
        assert_eq!(loader.enumeration().len(), 1);
    }
}
