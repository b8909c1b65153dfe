use std::borrow::Cow;

use serde_json::Value;
use time::OffsetDateTime;

use crate::level::Level;

/// Key/value pair attached to a [`Logger`](crate::Logger) or an [`Event`].
pub type Field = (Cow<'static, str>, Value);

/// Ordered list of fields with unique keys.
///
/// Inserting an existing key replaces its value in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct FieldList(Vec<Field>);

impl FieldList {
    pub(crate) fn insert(&mut self, key: Cow<'static, str>, value: Value) {
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.0.push((key, value)),
        }
    }

    pub(crate) fn get(&self, key: &str) -> Option<&Value> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Returns `self` overlaid with `over`; keys present in both take the value from `over`.
    pub(crate) fn overlaid(&self, over: &FieldList) -> FieldList {
        let mut merged = self.clone();
        for (key, value) in &over.0 {
            merged.insert(key.clone(), value.clone());
        }
        merged
    }

    pub(crate) fn as_slice(&self) -> &[Field] {
        &self.0
    }
}

/// A single log event under construction.
///
/// Events are built by value: every [`with`](Event::with) call consumes the
/// event and returns the extended one.
///
/// ```rust
/// use actix_web_middleware_reqlog::{Event, Level};
///
/// let event = Event::new(Level::Info).with("user", "alice").with("attempt", 2);
/// assert_eq!(event.get("attempt"), Some(&2.into()));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    level: Level,
    fields: FieldList,
}

impl Event {
    pub fn new(level: Level) -> Self {
        Event {
            level,
            fields: FieldList::default(),
        }
    }

    pub fn level(&self) -> Level {
        self.level
    }

    /// Attaches `key`, replacing any earlier value under the same key.
    pub fn with(mut self, key: impl Into<Cow<'static, str>>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.as_slice().iter().map(|(k, v)| (k.as_ref(), v))
    }

    pub(crate) fn field_list(&self) -> &FieldList {
        &self.fields
    }
}

/// Fully assembled event handed to a [`Sink`](crate::Sink).
#[derive(Debug, Clone, Copy)]
pub struct Record<'a> {
    pub time: OffsetDateTime,
    pub level: Level,
    pub message: &'a str,
    pub fields: &'a [Field],
}

/// Current time, in UTC or in the local offset.
///
/// Falls back to UTC when the local offset can't be determined.
pub(crate) fn now(utc: bool) -> OffsetDateTime {
    if utc {
        OffsetDateTime::now_utc()
    } else {
        OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
    }
}
