#![forbid(unsafe_code)]

//! Object observation: the arena of wrapped objects.
//!
//! Wrapping structured content moves it into the runtime's arena and returns
//! an [`ObjectHandle`]. Field writes go through the runtime so every write
//! fans out to the handle's owners (the properties that hold it). An object
//! can be held by several properties at once; each is recorded once in the
//! handle's [`OwningSet`].
//!
//! # Invariants
//!
//! 1. A handle's owner set never contains duplicates.
//! 2. The slot of a handle is freed exactly when its owner count drops from
//!    one to zero. A handle wrapped without an owner stays alive until an
//!    owner is added and later removed.
//! 3. A freed slot bumps its generation, so stale handles never alias a
//!    newer object in the same slot.
//!
//! # Failure Modes
//!
//! | Failure                         | Cause                              | Behavior                         |
//! |---------------------------------|------------------------------------|----------------------------------|
//! | `StaleHandle`                   | object already destroyed           | error (strict) / no-op (lenient) |
//! | `NotAnOwner`                    | removing an owner not recorded     | error (strict) / no-op (lenient) |
//! | `FieldType`                     | name key on a list, index on a map | write rejected                   |
//! | `IndexOutOfBounds`              | list index past the end            | write rejected                   |

use std::fmt;

use smallvec::SmallVec;
use tracing::{debug, trace};

use crate::config::OwnerRemovalPolicy;
use crate::runtime::Runtime;
use crate::subscriber::{Capabilities, Change, ChangeSource, SubscriberId};
use crate::value::{FieldKey, RawObject, Value};

/// Compact reference to a wrapped object.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct ObjectHandle {
    slot: u32,
    generation: u32,
}

impl ObjectHandle {
    #[inline]
    fn slot(self) -> usize {
        self.slot as usize
    }
}

impl fmt::Debug for ObjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectHandle({}@{})", self.slot, self.generation)
    }
}

/// Errors reported by object operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectError {
    /// The handle's object was destroyed.
    StaleHandle(ObjectHandle),
    /// The value is not structured content.
    NotAnObject,
    /// The subscriber is not recorded as an owner of the handle.
    NotAnOwner {
        handle: ObjectHandle,
        owner: SubscriberId,
    },
    /// The key kind does not match the object kind.
    FieldType { key: FieldKey },
    /// A list index beyond the append position.
    IndexOutOfBounds { index: usize, len: usize },
}

impl fmt::Display for ObjectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StaleHandle(handle) => write!(f, "object {handle:?} no longer exists"),
            Self::NotAnObject => write!(f, "value is not an object"),
            Self::NotAnOwner { handle, owner } => {
                write!(f, "subscriber {owner} does not own object {handle:?}")
            }
            Self::FieldType { key } => write!(f, "field key '{key}' does not match object kind"),
            Self::IndexOutOfBounds { index, len } => {
                write!(f, "index {index} out of bounds for list of length {len}")
            }
        }
    }
}

impl std::error::Error for ObjectError {}

/// Insertion-ordered set of owning subscribers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OwningSet {
    owners: SmallVec<[SubscriberId; 4]>,
}

impl OwningSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an owner. Returns `false` if it was already present.
    pub fn add(&mut self, owner: SubscriberId) -> bool {
        if self.contains(owner) {
            return false;
        }
        self.owners.push(owner);
        true
    }

    /// Remove an owner. Returns `false` if it was not present.
    pub fn remove(&mut self, owner: SubscriberId) -> bool {
        match self.owners.iter().position(|&o| o == owner) {
            Some(pos) => {
                self.owners.remove(pos);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, owner: SubscriberId) -> bool {
        self.owners.contains(&owner)
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = SubscriberId> + '_ {
        self.owners.iter().copied()
    }
}

#[derive(Debug)]
pub(crate) struct ObjectEntry {
    raw: RawObject,
    owners: OwningSet,
}

#[derive(Debug)]
struct ObjectSlot {
    generation: u32,
    entry: Option<ObjectEntry>,
}

/// Slot storage for wrapped objects.
#[derive(Debug, Default)]
pub(crate) struct ObjectArena {
    slots: Vec<ObjectSlot>,
    free_list: Vec<u32>,
}

impl ObjectArena {
    pub(crate) fn insert(&mut self, raw: RawObject, owner: Option<SubscriberId>) -> ObjectHandle {
        let mut owners = OwningSet::new();
        if let Some(owner) = owner {
            owners.add(owner);
        }
        let entry = ObjectEntry { raw, owners };
        if let Some(slot_idx) = self.free_list.pop() {
            let slot = &mut self.slots[slot_idx as usize];
            slot.entry = Some(entry);
            return ObjectHandle {
                slot: slot_idx,
                generation: slot.generation,
            };
        }
        let slot_idx = u32::try_from(self.slots.len()).expect("object arena exceeds u32 slots");
        self.slots.push(ObjectSlot {
            generation: 0,
            entry: Some(entry),
        });
        ObjectHandle {
            slot: slot_idx,
            generation: 0,
        }
    }

    pub(crate) fn get(&self, handle: ObjectHandle) -> Option<&ObjectEntry> {
        self.slots
            .get(handle.slot())
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.entry.as_ref())
    }

    fn get_mut(&mut self, handle: ObjectHandle) -> Option<&mut ObjectEntry> {
        self.slots
            .get_mut(handle.slot())
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.entry.as_mut())
    }

    fn free(&mut self, handle: ObjectHandle) -> Option<RawObject> {
        let slot = self.slots.get_mut(handle.slot())?;
        if slot.generation != handle.generation {
            return None;
        }
        let entry = slot.entry.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free_list.push(handle.slot);
        Some(entry.raw)
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len().saturating_sub(self.free_list.len())
    }
}

impl Runtime {
    /// Wrap a structured value so its field writes are observable.
    ///
    /// Already wrapped values are returned as-is; `owner`, if given, is added
    /// to the handle's owners either way.
    pub fn wrap(
        &self,
        value: Value,
        owner: Option<SubscriberId>,
    ) -> Result<ObjectHandle, ObjectError> {
        match value {
            Value::Raw(raw) => Ok(self.wrap_raw(raw, owner)),
            Value::Object(handle) => {
                if !self.is_alive(handle) {
                    return Err(ObjectError::StaleHandle(handle));
                }
                if let Some(owner) = owner {
                    self.add_owner(handle, owner)?;
                }
                Ok(handle)
            }
            _ => Err(ObjectError::NotAnObject),
        }
    }

    /// Move unwrapped content into the arena.
    pub fn wrap_raw(&self, raw: RawObject, owner: Option<SubscriberId>) -> ObjectHandle {
        let handle = self.objects().borrow_mut().insert(raw, owner);
        trace!(handle = ?handle, owner = ?owner, "object wrapped");
        handle
    }

    /// Copy of the object's current content.
    pub fn unwrap(&self, handle: ObjectHandle) -> Option<RawObject> {
        self.objects().borrow().get(handle).map(|e| e.raw.clone())
    }

    /// Swap the object's content without notifying owners. Returns the
    /// previous content.
    pub fn replace_object(
        &self,
        handle: ObjectHandle,
        raw: RawObject,
    ) -> Result<RawObject, ObjectError> {
        let mut objects = self.objects().borrow_mut();
        let entry = objects
            .get_mut(handle)
            .ok_or(ObjectError::StaleHandle(handle))?;
        Ok(std::mem::replace(&mut entry.raw, raw))
    }

    /// Whether the handle still refers to a live object.
    pub fn is_alive(&self, handle: ObjectHandle) -> bool {
        self.objects().borrow().get(handle).is_some()
    }

    /// Number of live objects.
    pub fn object_count(&self) -> usize {
        self.objects().borrow().len()
    }

    /// Record `owner` on the handle. Returns `false` if it was already an
    /// owner.
    pub fn add_owner(
        &self,
        handle: ObjectHandle,
        owner: SubscriberId,
    ) -> Result<bool, ObjectError> {
        let mut objects = self.objects().borrow_mut();
        let entry = objects
            .get_mut(handle)
            .ok_or(ObjectError::StaleHandle(handle))?;
        Ok(entry.owners.add(owner))
    }

    /// Remove `owner` from the handle, destroying the object when the last
    /// owner leaves.
    ///
    /// Removing an absent owner, or removing from a destroyed object, follows
    /// the configured [`OwnerRemovalPolicy`]: `Ok(false)` when lenient, an
    /// error when strict.
    pub fn remove_owner(
        &self,
        handle: ObjectHandle,
        owner: SubscriberId,
    ) -> Result<bool, ObjectError> {
        let strict = self.config().owner_removal == OwnerRemovalPolicy::Strict;
        let mut objects = self.objects().borrow_mut();
        let Some(entry) = objects.get_mut(handle) else {
            return if strict {
                Err(ObjectError::StaleHandle(handle))
            } else {
                Ok(false)
            };
        };
        if !entry.owners.remove(owner) {
            return if strict {
                Err(ObjectError::NotAnOwner { handle, owner })
            } else {
                Ok(false)
            };
        }
        if entry.owners.is_empty() {
            objects.free(handle);
            debug!(handle = ?handle, "last owner released, object destroyed");
        }
        Ok(true)
    }

    /// Number of owners of the handle; zero for destroyed objects.
    pub fn owner_count(&self, handle: ObjectHandle) -> usize {
        self.objects()
            .borrow()
            .get(handle)
            .map_or(0, |e| e.owners.len())
    }

    /// Whether `owner` is recorded on the handle.
    pub fn is_owner(&self, handle: ObjectHandle, owner: SubscriberId) -> bool {
        self.objects()
            .borrow()
            .get(handle)
            .is_some_and(|e| e.owners.contains(owner))
    }

    /// Owners of the handle in insertion order.
    pub fn owners(&self, handle: ObjectHandle) -> Vec<SubscriberId> {
        self.objects()
            .borrow()
            .get(handle)
            .map(|e| e.owners.iter().collect())
            .unwrap_or_default()
    }

    /// Read a field without notifying anyone.
    pub fn read_field(&self, handle: ObjectHandle, key: impl Into<FieldKey>) -> Option<Value> {
        let key = key.into();
        self.objects()
            .borrow()
            .get(handle)
            .and_then(|e| e.raw.get(&key).cloned())
    }

    /// Number of fields or items of the object.
    pub fn field_count(&self, handle: ObjectHandle) -> Option<usize> {
        self.objects().borrow().get(handle).map(|e| e.raw.len())
    }

    /// Write a field and notify every owner with `property_changed`.
    ///
    /// Writing a value equal to the current one changes nothing and returns
    /// `Ok(false)`.
    pub fn write_field(
        &self,
        handle: ObjectHandle,
        key: impl Into<FieldKey>,
        value: impl Into<Value>,
    ) -> Result<bool, ObjectError> {
        let key = key.into();
        let value = value.into();
        let owners = {
            let mut objects = self.objects().borrow_mut();
            let entry = objects
                .get_mut(handle)
                .ok_or(ObjectError::StaleHandle(handle))?;
            if !entry.raw.write(&key, value.clone())? {
                return Ok(false);
            }
            snapshot(&entry.owners)
        };
        self.notify_owners(handle, &owners, &key.to_string(), &value);
        Ok(true)
    }

    /// Append to a list object. Returns the new item's index.
    pub fn push(
        &self,
        handle: ObjectHandle,
        value: impl Into<Value>,
    ) -> Result<usize, ObjectError> {
        let len = {
            let objects = self.objects().borrow();
            let entry = objects.get(handle).ok_or(ObjectError::StaleHandle(handle))?;
            match &entry.raw {
                RawObject::List(items) => items.len(),
                RawObject::Map(_) => {
                    return Err(ObjectError::FieldType {
                        key: FieldKey::Index(0),
                    });
                }
            }
        };
        self.write_field(handle, FieldKey::Index(len), value)?;
        Ok(len)
    }

    /// Re-broadcast a field's current value to the handle's owners.
    pub fn notify_field_changed(
        &self,
        handle: ObjectHandle,
        key: impl Into<FieldKey>,
    ) -> Result<(), ObjectError> {
        let key = key.into();
        let (owners, value) = {
            let objects = self.objects().borrow();
            let entry = objects.get(handle).ok_or(ObjectError::StaleHandle(handle))?;
            let value = entry.raw.get(&key).cloned().unwrap_or_default();
            (snapshot(&entry.owners), value)
        };
        self.notify_owners(handle, &owners, &key.to_string(), &value);
        Ok(())
    }

    fn notify_owners(
        &self,
        handle: ObjectHandle,
        owners: &[SubscriberId],
        name: &str,
        value: &Value,
    ) {
        debug!(handle = ?handle, field = name, owners = owners.len(), "object field changed");
        let change = Change::new(ChangeSource::Object(handle), Some(name), value);
        for &id in owners {
            // Owners released earlier in this pass are skipped.
            if !self.is_owner(handle, id) {
                continue;
            }
            match self.resolve(id) {
                Ok(owner) => {
                    if owner.capabilities().contains(Capabilities::PROPERTY_CHANGED) {
                        owner.property_changed(&change);
                    }
                }
                Err(err) => self.report_unknown("object fan-out", err),
            }
        }
    }
}

fn snapshot(owners: &OwningSet) -> SmallVec<[SubscriberId; 8]> {
    owners.iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;

    fn id(raw: u64) -> SubscriberId {
        SubscriberId::from_raw(raw)
    }

    #[test]
    fn owning_set_is_idempotent() {
        let mut set = OwningSet::new();
        assert!(set.add(id(1)));
        assert!(!set.add(id(1)));
        assert!(set.add(id(2)));
        assert_eq!(set.len(), 2);
        assert!(set.remove(id(1)));
        assert!(!set.remove(id(1)));
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![id(2)]);
    }

    #[test]
    fn wrap_is_identity_on_wrapped() {
        let rt = Runtime::new();
        let h = rt.wrap(Value::Raw(RawObject::map()), None).unwrap();
        assert_eq!(rt.wrap(Value::Object(h), None), Ok(h));
        assert!(Value::Object(h).is_wrapped());
        assert_eq!(rt.wrap(Value::Int(1), None), Err(ObjectError::NotAnObject));
    }

    #[test]
    fn last_owner_destroys_object() {
        let rt = Runtime::new();
        let h = rt.wrap_raw(RawObject::map(), Some(id(1)));
        rt.add_owner(h, id(2)).unwrap();
        assert_eq!(rt.owner_count(h), 2);
        assert_eq!(rt.remove_owner(h, id(1)), Ok(true));
        assert!(rt.is_alive(h));
        assert_eq!(rt.remove_owner(h, id(2)), Ok(true));
        assert!(!rt.is_alive(h));
        assert_eq!(rt.object_count(), 0);
    }

    #[test]
    fn duplicate_owner_counted_once() {
        let rt = Runtime::new();
        let h = rt.wrap_raw(RawObject::map(), Some(id(1)));
        assert_eq!(rt.add_owner(h, id(1)), Ok(false));
        assert_eq!(rt.owner_count(h), 1);
    }

    #[test]
    fn lenient_removal_of_absent_owner() {
        let rt = Runtime::new();
        let h = rt.wrap_raw(RawObject::map(), Some(id(1)));
        assert_eq!(rt.remove_owner(h, id(9)), Ok(false));
        assert_eq!(rt.owner_count(h), 1);
    }

    #[test]
    fn strict_removal_of_absent_owner() {
        let rt = Runtime::with_config(RuntimeConfig::strict());
        let h = rt.wrap_raw(RawObject::map(), Some(id(1)));
        assert_eq!(
            rt.remove_owner(h, id(9)),
            Err(ObjectError::NotAnOwner {
                handle: h,
                owner: id(9)
            })
        );
        rt.remove_owner(h, id(1)).unwrap();
        assert_eq!(rt.remove_owner(h, id(1)), Err(ObjectError::StaleHandle(h)));
    }

    #[test]
    fn stale_handle_does_not_alias_reused_slot() {
        let rt = Runtime::new();
        let old = rt.wrap_raw(RawObject::map().with_field("v", 1), Some(id(1)));
        rt.remove_owner(old, id(1)).unwrap();
        let new = rt.wrap_raw(RawObject::map().with_field("v", 2), Some(id(1)));
        assert_ne!(old, new);
        assert!(rt.read_field(old, "v").is_none());
        assert_eq!(rt.read_field(new, "v"), Some(Value::Int(2)));
    }

    #[test]
    fn field_writes_and_push() {
        let rt = Runtime::new();
        let h = rt.wrap_raw(RawObject::list(), None);
        assert_eq!(rt.push(h, "a"), Ok(0));
        assert_eq!(rt.push(h, "b"), Ok(1));
        assert_eq!(rt.write_field(h, 0_usize, "a"), Ok(false));
        assert_eq!(rt.write_field(h, 0_usize, "z"), Ok(true));
        assert_eq!(rt.field_count(h), Some(2));
        assert_eq!(
            rt.unwrap(h),
            Some(RawObject::list().with_item("z").with_item("b"))
        );
    }

    #[test]
    fn replace_is_silent_until_notified() {
        let rt = Runtime::new();
        let h = rt.wrap_raw(RawObject::map().with_field("k", 1), None);
        let old = rt.replace_object(h, RawObject::map().with_field("k", 2)).unwrap();
        assert_eq!(old.get(&FieldKey::from("k")), Some(&Value::Int(1)));
        assert_eq!(rt.read_field(h, "k"), Some(Value::Int(2)));
        assert!(rt.notify_field_changed(h, "k").is_ok());
    }
}
