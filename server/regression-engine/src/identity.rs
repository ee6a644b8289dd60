//! Semantic identity of an event, independent of its raw id.

use crate::types::{Location, RawEvent};

/// Events with equal identities are duplicates of each other.
///
/// Only events with an error location have an identity; events without one
/// are never grouped with anything.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventIdentity {
  event_type: String,
  origin: Option<Location>,
  error: Location,
  call_stack_group: Option<String>,
}

impl EventIdentity {
  pub fn of(event: &RawEvent) -> Option<Self> {
    let error = event.error.clone()?;
    Some(Self {
      event_type: event.event_type.clone(),
      origin: event.origin.clone(),
      error,
      call_stack_group: event.call_stack_group.clone(),
    })
  }

  pub fn error_class(&self) -> &str {
    &self.error.class_name
  }
}
