use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// ActionKind
// ---------------------------------------------------------------------------

/// Discriminant for the five action kinds. One exclusivity lock exists per
/// kind per connection, keyed by this value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionKind {
    Composite,
    Utterance,
    Motion,
    Image,
    Url,
}

impl ActionKind {
    /// Wire/lock name. These are the names device clients and operators see
    /// in aggregated error messages, so they are fixed.
    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::Composite => "MultiAction",
            ActionKind::Utterance => "UtteranceItem",
            ActionKind::Motion => "MotionItem",
            ActionKind::Image => "ImageItem",
            ActionKind::Url => "URLItem",
        }
    }

    /// The four single (non-composite) kinds, in child-dispatch order.
    pub fn singles() -> &'static [ActionKind] {
        &[
            ActionKind::Utterance,
            ActionKind::Motion,
            ActionKind::Image,
            ActionKind::Url,
        ]
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Single items
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UtteranceItem {
    pub id: Uuid,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub delay: u32,
    pub phrase: String,
    /// Path of the synthesized/uploaded audio the device should play.
    #[serde(default)]
    pub file_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MotionItem {
    pub id: Uuid,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub delay: u32,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageItem {
    pub id: Uuid,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub delay: u32,
    pub name: String,
    #[serde(default)]
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UrlItem {
    pub id: Uuid,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub delay: u32,
    pub name: String,
    pub url: String,
}

// ---------------------------------------------------------------------------
// CompositeAction
// ---------------------------------------------------------------------------

/// A bundle of up to one child of each single kind, dispatched as
/// concurrently-running children.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompositeAction {
    pub id: Uuid,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    /// Clear stale on-device visual content before executing.
    #[serde(default)]
    pub primary: bool,
    #[serde(default)]
    pub utterance: Option<UtteranceItem>,
    #[serde(default)]
    pub motion: Option<MotionItem>,
    #[serde(default)]
    pub image: Option<ImageItem>,
    #[serde(default)]
    pub url: Option<UrlItem>,
}

impl CompositeAction {
    /// Valid children in fixed dispatch order. A child is valid when its
    /// kind-specific payload is present.
    pub fn children(&self) -> Vec<Action> {
        let mut out = Vec::new();
        if let Some(u) = &self.utterance {
            if !u.phrase.is_empty() {
                out.push(Action::Utterance(u.clone()));
            }
        }
        if let Some(m) = &self.motion {
            if !m.name.is_empty() {
                out.push(Action::Motion(m.clone()));
            }
        }
        if let Some(i) = &self.image {
            if !i.data.is_empty() {
                out.push(Action::Image(i.clone()));
            }
        }
        if let Some(u) = &self.url {
            if !u.url.is_empty() {
                out.push(Action::Url(u.clone()));
            }
        }
        out
    }

}

// ---------------------------------------------------------------------------
// Action
// ---------------------------------------------------------------------------

/// A unit of device behavior: a single typed command or a composite bundle.
/// Immutable value records; the dispatch engine only reads them by id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Action {
    Utterance(UtteranceItem),
    Motion(MotionItem),
    Image(ImageItem),
    Url(UrlItem),
    Composite(CompositeAction),
}

impl Action {
    pub fn id(&self) -> Uuid {
        match self {
            Action::Utterance(i) => i.id,
            Action::Motion(i) => i.id,
            Action::Image(i) => i.id,
            Action::Url(i) => i.id,
            Action::Composite(c) => c.id,
        }
    }

    pub fn kind(&self) -> ActionKind {
        match self {
            Action::Utterance(_) => ActionKind::Utterance,
            Action::Motion(_) => ActionKind::Motion,
            Action::Image(_) => ActionKind::Image,
            Action::Url(_) => ActionKind::Url,
            Action::Composite(_) => ActionKind::Composite,
        }
    }

    /// Whether dispatching this action must clear stale visuals first.
    pub fn is_primary(&self) -> bool {
        matches!(self, Action::Composite(c) if c.primary)
    }
}

// ---------------------------------------------------------------------------
// ActionRepository
// ---------------------------------------------------------------------------

/// In-memory action lookup. Registering a composite also registers each
/// valid child under its own id, since sub-command workers re-resolve
/// children independently.
#[derive(Default)]
pub struct ActionRepository {
    actions: RwLock<HashMap<Uuid, Action>>,
}

impl ActionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, action: Action) {
        let mut map = self.actions.write().expect("action repository poisoned");
        if let Action::Composite(c) = &action {
            for child in c.children() {
                map.entry(child.id()).or_insert(child);
            }
        }
        map.entry(action.id()).or_insert(action);
    }

    pub fn get(&self, id: Uuid) -> Option<Action> {
        self.actions
            .read()
            .expect("action repository poisoned")
            .get(&id)
            .cloned()
    }

    pub fn all(&self) -> Vec<Action> {
        self.actions
            .read()
            .expect("action repository poisoned")
            .values()
            .cloned()
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
