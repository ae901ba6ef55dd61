//! Creator and modifier function types.
//!
//! A creator maps the current object (or a blank one) to the desired
//! object. A named creator pairs it with the object name. A modifier wraps
//! a creator to add a cross-cutting concern, so creators never need to know
//! about ownership.

use std::sync::Arc;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;

use crate::error::BuildError;
use crate::kind::ManagedKind;

/// `(existing) -> desired`
pub type ObjectCreator<K> = Arc<dyn Fn(K) -> Result<K, BuildError> + Send + Sync>;

/// `() -> (name, creator)`
pub type NamedObjectCreator<K> = Arc<dyn Fn() -> (String, ObjectCreator<K>) + Send + Sync>;

/// `(creator) -> creator`
pub type ObjectModifier<K> = Arc<dyn Fn(ObjectCreator<K>) -> ObjectCreator<K> + Send + Sync>;

/// Convenience constructor for a named creator.
pub fn named_creator<K, F>(name: impl Into<String>, create: F) -> NamedObjectCreator<K>
where
    K: ManagedKind,
    F: Fn(K) -> Result<K, BuildError> + Send + Sync + 'static,
{
    let name = name.into();
    let create: ObjectCreator<K> = Arc::new(create);
    Arc::new(move || (name.clone(), Arc::clone(&create)))
}

/// Sets `owner` on the created object, replacing any reference with the
/// same uid and keeping unrelated ones.
pub fn owner_reference_modifier<K: ManagedKind>(owner: OwnerReference) -> ObjectModifier<K> {
    Arc::new(move |create: ObjectCreator<K>| {
        let owner = owner.clone();
        Arc::new(move |existing: K| {
            let mut object = create(existing)?;
            let refs = object
                .meta_mut()
                .owner_references
                .get_or_insert_with(Vec::new);
            match refs.iter_mut().find(|r| r.uid == owner.uid) {
                Some(existing_ref) => *existing_ref = owner.clone(),
                None => refs.push(owner.clone()),
            }
            Ok(object)
        })
    })
}

/// Applies modifiers in order; the first modifier wraps the creator first.
pub fn apply_modifiers<K: ManagedKind>(
    create: ObjectCreator<K>,
    modifiers: &[ObjectModifier<K>],
) -> ObjectCreator<K> {
    modifiers.iter().fold(create, |create, modify| modify(create))
}
