//! Typed attachments carried through a deployment.
//!
//! At most one value per type. Steps look up what they need by type
//! instead of by name.

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::fmt;

#[derive(Default)]
pub struct Attachments {
    values: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl Attachments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches `value`, returning the value of the same type it replaced.
    pub fn insert<T: Any + Send + Sync>(&mut self, value: T) -> Option<T> {
        self.values
            .insert(TypeId::of::<T>(), Box::new(value))
            .and_then(|old| old.downcast::<T>().ok())
            .map(|old| *old)
    }

    pub fn get<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.values
            .get(&TypeId::of::<T>())
            .and_then(|value| value.downcast_ref::<T>())
    }

    pub fn get_mut<T: Any + Send + Sync>(&mut self) -> Option<&mut T> {
        self.values
            .get_mut(&TypeId::of::<T>())
            .and_then(|value| value.downcast_mut::<T>())
    }

    pub fn remove<T: Any + Send + Sync>(&mut self) -> Option<T> {
        self.values
            .remove(&TypeId::of::<T>())
            .and_then(|value| value.downcast::<T>().ok())
            .map(|value| *value)
    }

    pub fn contains<T: Any + Send + Sync>(&self) -> bool {
        self.values.contains_key(&TypeId::of::<T>())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Name of `T` for error messages.
    pub fn name_of<T: Any>() -> &'static str {
        type_name::<T>()
    }
}

impl fmt::Debug for Attachments {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attachments")
            .field("count", &self.values.len())
            .finish()
    }
}
