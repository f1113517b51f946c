//! Reconciliation plans and the actions they carry.

use crate::identity::ObjectIdentity;
use crate::object::{DesiredObject, SpecHash};
use chrono::{DateTime, Utc};
use std::fmt;

/// Kind of mutating call an action makes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ActionKind {
    /// Create a missing object
    Create,
    /// Update an object whose spec hash differs
    Patch,
    /// Delete an object no longer desired
    Delete,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Create => "create",
            ActionKind::Patch => "patch",
            ActionKind::Delete => "delete",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of a reconciliation plan.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Create `target`
    Create { target: DesiredObject },
    /// Move an object from `from` (None if it carried no hash) to `target`
    Patch {
        from: Option<SpecHash>,
        target: DesiredObject,
    },
    /// Delete `identity`, last seen with `observed`
    Delete {
        identity: ObjectIdentity,
        observed: Option<SpecHash>,
    },
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::Create { .. } => ActionKind::Create,
            Action::Patch { .. } => ActionKind::Patch,
            Action::Delete { .. } => ActionKind::Delete,
        }
    }

    pub fn identity(&self) -> &ObjectIdentity {
        match self {
            Action::Create { target } | Action::Patch { target, .. } => target.identity(),
            Action::Delete { identity, .. } => identity,
        }
    }

    /// Spec hash the action drives the object to; `None` for deletes.
    pub fn target_hash(&self) -> Option<&SpecHash> {
        match self {
            Action::Create { target } | Action::Patch { target, .. } => Some(target.spec_hash()),
            Action::Delete { .. } => None,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Create { target } => {
                write!(f, "create {} @{}", target.identity(), target.spec_hash().short())
            }
            Action::Patch { from, target } => write!(
                f,
                "patch {} {}->{}",
                target.identity(),
                from.as_ref().map_or("none", |h| h.short()),
                target.spec_hash().short()
            ),
            Action::Delete { identity, .. } => write!(f, "delete {}", identity),
        }
    }
}

/// Ordered, immutable set of actions for exactly one cycle.
///
/// Plans are built by the reconciler and handed to the executor by value;
/// there is no shared "current plan".
#[derive(Debug, Clone)]
pub struct ReconciliationPlan {
    cycle: u64,
    created_at: DateTime<Utc>,
    actions: Vec<Action>,
}

impl ReconciliationPlan {
    pub fn new(cycle: u64, actions: Vec<Action>) -> Self {
        Self {
            cycle,
            created_at: Utc::now(),
            actions,
        }
    }

    /// Plan with no actions.
    pub fn empty(cycle: u64) -> Self {
        Self::new(cycle, Vec::new())
    }

    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub fn into_actions(self) -> Vec<Action> {
        self.actions
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Counts actions of one kind.
    pub fn count(&self, kind: ActionKind) -> usize {
        self.actions.iter().filter(|a| a.kind() == kind).count()
    }

    /// Human-readable lines for debugging.
    pub fn dump(&self) -> Vec<String> {
        self.actions.iter().map(|a| a.to_string()).collect()
    }
}
