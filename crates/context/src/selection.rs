//! Selection sets and the capacity budget invariant.
//!
//! Invariant: the total estimated cost of all selected documents never
//! exceeds the budget. `toggle` is the only way membership changes, and it
//! refuses additions that would break the invariant. Removal is always
//! permitted.
//!
//! Totals are recomputed on demand — O(n) per query is accepted since n
//! (documents per user) is small.

use crate::cost::{CharCost, CostModel};
use docuchat_core::document::{Document, DocumentId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// The set of documents currently included in the next LLM request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionSet {
    ids: BTreeSet<DocumentId>,
}

impl SelectionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: &DocumentId) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DocumentId> {
        self.ids.iter()
    }

    /// Build a selection from stored chat associations.
    ///
    /// Used when loading a persisted chat; the budget invariant is enforced
    /// on toggles going forward, not retroactively.
    pub fn from_ids(ids: impl IntoIterator<Item = DocumentId>) -> Self {
        Self {
            ids: ids.into_iter().collect(),
        }
    }

    fn with(&self, id: DocumentId) -> Self {
        let mut ids = self.ids.clone();
        ids.insert(id);
        Self { ids }
    }

    fn without(&self, id: &DocumentId) -> Self {
        let mut ids = self.ids.clone();
        ids.remove(id);
        Self { ids }
    }
}

/// Result of a toggle attempt. A rejection is a normal outcome the caller
/// must surface to the user, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToggleOutcome {
    /// The document was added; the invariant still holds.
    Added(SelectionSet),
    /// The document was removed (always succeeds).
    Removed(SelectionSet),
    /// Adding the document would exceed the budget; selection unchanged.
    Rejected {
        selection: SelectionSet,
        would_total: usize,
        budget: usize,
    },
}

impl ToggleOutcome {
    /// The selection set after the toggle (unchanged on rejection).
    pub fn selection(&self) -> &SelectionSet {
        match self {
            ToggleOutcome::Added(s) | ToggleOutcome::Removed(s) => s,
            ToggleOutcome::Rejected { selection, .. } => selection,
        }
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, ToggleOutcome::Rejected { .. })
    }
}

/// Budget usage for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub used: usize,
    pub budget: usize,
    pub level: UsageLevel,
}

/// Coarse usage bands matching the UI's bar colors: warning above 70%,
/// critical above 90%.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UsageLevel {
    Normal,
    Warning,
    Critical,
}

/// The budgeting engine: a fixed capacity plus a cost model.
///
/// Stateless — create one and reuse it across requests.
pub struct BudgetEngine<C: CostModel = CharCost> {
    budget: usize,
    cost: C,
}

impl BudgetEngine<CharCost> {
    /// Create an engine with the default chars/4 cost model.
    pub fn new(budget: usize) -> Self {
        Self {
            budget,
            cost: CharCost,
        }
    }
}

impl<C: CostModel> BudgetEngine<C> {
    /// Create an engine with a custom cost model.
    pub fn with_cost_model(budget: usize, cost: C) -> Self {
        Self { budget, cost }
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    /// Estimated cost of a single document's summary.
    pub fn document_cost(&self, doc: &Document) -> usize {
        self.cost.estimate(&doc.summary)
    }

    /// Sum of estimated costs over the selected documents.
    ///
    /// Selected ids with no matching document contribute nothing.
    pub fn total_cost(&self, selection: &SelectionSet, documents: &[Document]) -> usize {
        documents
            .iter()
            .filter(|d| selection.contains(&d.id))
            .map(|d| self.document_cost(d))
            .sum()
    }

    /// True iff `candidate` is not already selected and selecting it would
    /// push the total over the budget.
    pub fn would_exceed(
        &self,
        candidate: &DocumentId,
        selection: &SelectionSet,
        documents: &[Document],
    ) -> bool {
        if selection.contains(candidate) {
            return false;
        }
        let Some(doc) = documents.iter().find(|d| &d.id == candidate) else {
            return false;
        };
        self.total_cost(selection, documents) + self.document_cost(doc) > self.budget
    }

    /// Toggle a document in or out of the selection.
    ///
    /// - already selected → removed (always succeeds)
    /// - absent and over budget → rejected, selection unchanged
    /// - absent and unknown id → rejected, selection unchanged
    /// - absent otherwise → added
    pub fn toggle(
        &self,
        candidate: &DocumentId,
        selection: &SelectionSet,
        documents: &[Document],
    ) -> ToggleOutcome {
        if selection.contains(candidate) {
            return ToggleOutcome::Removed(selection.without(candidate));
        }

        let Some(doc) = documents.iter().find(|d| &d.id == candidate) else {
            // An id for a document that no longer exists cannot be context
            return ToggleOutcome::Rejected {
                selection: selection.clone(),
                would_total: self.total_cost(selection, documents),
                budget: self.budget,
            };
        };

        let would_total = self.total_cost(selection, documents) + self.document_cost(doc);
        if would_total > self.budget {
            tracing::debug!(
                candidate = %candidate,
                would_total,
                budget = self.budget,
                "Selection rejected: over budget"
            );
            return ToggleOutcome::Rejected {
                selection: selection.clone(),
                would_total,
                budget: self.budget,
            };
        }

        ToggleOutcome::Added(selection.with(candidate.clone()))
    }

    /// Current usage for display.
    pub fn usage(&self, selection: &SelectionSet, documents: &[Document]) -> Usage {
        let used = self.total_cost(selection, documents);
        let level = if used * 10 > self.budget * 9 {
            UsageLevel::Critical
        } else if used * 10 > self.budget * 7 {
            UsageLevel::Warning
        } else {
            UsageLevel::Normal
        };
        Usage {
            used,
            budget: self.budget,
            level,
        }
    }
}
