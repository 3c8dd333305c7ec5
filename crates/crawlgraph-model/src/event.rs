use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::state::StateId;

/// How an element is located in the rendered page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum How {
    Xpath,
    Id,
    Name,
    Tag,
    Text,
    PartialText,
}

impl std::fmt::Display for How {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            How::Xpath => "xpath",
            How::Id => "id",
            How::Name => "name",
            How::Tag => "tag",
            How::Text => "text",
            How::PartialText => "partial_text",
        };
        f.write_str(s)
    }
}

/// Identification of the acted-upon element: a method plus a value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identification {
    pub how: How,
    pub value: String,
}

impl Identification {
    pub fn new(how: How, value: impl Into<String>) -> Self {
        Self {
            how,
            value: value.into(),
        }
    }

    pub fn xpath(value: impl Into<String>) -> Self {
        Self::new(How::Xpath, value)
    }
}

impl std::fmt::Display for Identification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.how, self.value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Click,
    Hover,
    Enter,
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EventType::Click => "click",
            EventType::Hover => "hover",
            EventType::Enter => "enter",
        };
        f.write_str(s)
    }
}

/// A value typed into a form field before an event is fired.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FormInput {
    pub field: Identification,
    pub value: String,
}

impl FormInput {
    pub fn new(field: Identification, value: impl Into<String>) -> Self {
        Self {
            field,
            value: value.into(),
        }
    }
}

/// A UI action that can be fired in the browser.
///
/// Identity is (identification, event type, frame). Form inputs are carried
/// along but do not distinguish two events, so refilling a form with other
/// values does not create a parallel edge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub identification: Identification,
    pub event_type: EventType,
    #[serde(default)]
    pub form_inputs: Vec<FormInput>,
    /// Frame the element lives in; empty for the top-level document.
    #[serde(default)]
    pub related_frame: String,
}

impl Event {
    pub fn new(identification: Identification, event_type: EventType) -> Self {
        Self {
            identification,
            event_type,
            form_inputs: Vec::new(),
            related_frame: String::new(),
        }
    }

    pub fn click(identification: Identification) -> Self {
        Self::new(identification, EventType::Click)
    }

    pub fn with_form_inputs(mut self, inputs: Vec<FormInput>) -> Self {
        self.form_inputs = inputs;
        self
    }

    pub fn in_frame(mut self, frame: impl Into<String>) -> Self {
        self.related_frame = frame.into();
        self
    }
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.identification == other.identification
            && self.event_type == other.event_type
            && self.related_frame == other.related_frame
    }
}

impl Eq for Event {}

impl Hash for Event {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identification.hash(state);
        self.event_type.hash(state);
        self.related_frame.hash(state);
    }
}

impl std::fmt::Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} on {}", self.event_type, self.identification)?;
        if !self.related_frame.is_empty() {
            write!(f, " in frame {}", self.related_frame)?;
        }
        Ok(())
    }
}

pub type TransitionId = u64;

/// A fired event recorded as a graph edge.
///
/// Immutable: the graph builds it once, at insertion, with both endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct Transition {
    id: TransitionId,
    source: StateId,
    target: StateId,
    event: Event,
}

impl Transition {
    pub fn new(id: TransitionId, source: StateId, target: StateId, event: Event) -> Self {
        Self {
            id,
            source,
            target,
            event,
        }
    }

    pub fn id(&self) -> TransitionId {
        self.id
    }

    pub fn source(&self) -> StateId {
        self.source
    }

    pub fn target(&self) -> StateId {
        self.target
    }

    pub fn event(&self) -> &Event {
        &self.event
    }
}

impl std::fmt::Display for Transition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} -[{}]-> {}", self.source, self.event, self.target)
    }
}
