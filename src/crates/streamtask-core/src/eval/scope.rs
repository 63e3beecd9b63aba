//! `fillScope`, the scope pool, and the per-group compiled-expression
//! cache (§4.3, §9 "scope pool for lambdas", §9 "group-keyed state").

use super::expr::{CallState, Expr, Value};
use crate::error::{EngineError, Result};
use crate::model::group::GroupId;
use crate::model::point::FieldValue;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};

/// A flat variable scope evaluated expressions read from. Backed by a
/// `Vec` rather than a map: scopes are small (one entry per referenced
/// variable) and rebuilt on every evaluation, so linear lookup beats
/// hashing for the sizes this sees in practice.
#[derive(Debug, Default, Clone)]
pub struct Scope {
    entries: Vec<(String, Value)>,
}

impl Scope {
    pub fn with_capacity(cap: usize) -> Self {
        Self { entries: Vec::with_capacity(cap) }
    }

    pub fn insert(&mut self, name: String, value: Value) {
        match self.entries.iter_mut().find(|(k, _)| *k == name) {
            Some((_, slot)) => *slot = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Populate `scope` for the variables in `refs`, resolving each against
/// `fields`/`tags` (and the synthetic `time` variable bound to `now`).
/// Rejects undefined references and field/tag name collisions, per
/// §4.3's `fillScope` contract.
pub fn fill_scope(
    scope: &mut Scope,
    refs: &[String],
    now: DateTime<Utc>,
    fields: &BTreeMap<String, FieldValue>,
    tags: &BTreeMap<String, String>,
) -> Result<()> {
    scope.clear();
    for name in refs {
        if name == "time" {
            scope.insert(name.clone(), Value::Time(now));
            continue;
        }
        let in_fields = fields.contains_key(name);
        let in_tags = tags.contains_key(name);
        if in_fields && in_tags {
            return Err(EngineError::data("eval", format!("{name} exists in both fields and tags")));
        }
        if in_fields {
            scope.insert(name.clone(), fields[name].clone().try_into()?);
        } else if in_tags {
            scope.insert(name.clone(), Value::Str(tags[name].clone()));
        } else {
            return Err(EngineError::data("eval", format!("no field or tag exists for {name}")));
        }
    }
    Ok(())
}

/// An object pool of pre-sized [`Scope`]s keyed by their reference-variable
/// set, so repeated evaluations of the same compiled expression do not
/// reallocate. A bounded free-list per key; under contention callers
/// simply allocate a fresh scope rather than blocking (§9: "must not
/// deadlock").
#[derive(Default)]
pub struct ScopePool {
    free: Mutex<HashMap<Vec<String>, Vec<Scope>>>,
}

impl ScopePool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&self, refs: &[String]) -> Scope {
        let mut free = self.free.lock();
        if let Some(bucket) = free.get_mut(refs) {
            if let Some(scope) = bucket.pop() {
                return scope;
            }
        }
        Scope::with_capacity(refs.len())
    }

    pub fn release(&self, refs: &[String], mut scope: Scope) {
        scope.clear();
        let mut free = self.free.lock();
        free.entry(refs.to_vec()).or_default().push(scope);
    }
}

/// A named lambda with its reference-variable set, shared immutably
/// across groups; only the per-call-site [`CallState`] in
/// [`GroupExpressionCache`] varies by group.
#[derive(Debug, Clone)]
pub struct CompiledExpr {
    pub name: String,
    pub expr: Expr,
    pub refs: Vec<String>,
}

impl CompiledExpr {
    pub fn new(name: impl Into<String>, expr: Expr, refs: Vec<String>) -> Self {
        Self { name: name.into(), expr, refs }
    }
}

/// `GroupID → compiled expression instance` (§4.3): here, specifically,
/// the per-group mutable [`CallState`] a stateful expression accumulates.
/// A base (empty) state is cloned in on first use of a new group.
#[derive(Default)]
pub struct GroupExpressionCache {
    by_group: HashMap<GroupId, CallState>,
}

impl GroupExpressionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Borrow (creating on first use) the call state for `group`.
    pub fn state_for(&mut self, group: &GroupId) -> &mut CallState {
        self.by_group.entry(group.clone()).or_default()
    }

    /// Purge a group's state. Stateful operators MUST call this on
    /// receipt of `DeleteGroup` to bound memory (§9).
    pub fn forget(&mut self, group: &GroupId) {
        self.by_group.remove(group);
    }

    pub fn len(&self) -> usize {
        self.by_group.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_group.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::group::Dimensions;

    #[test]
    fn fill_scope_resolves_fields_tags_and_time() {
        let mut scope = Scope::with_capacity(3);
        let fields = BTreeMap::from([("total".to_string(), FieldValue::Int(100))]);
        let tags = BTreeMap::from([("host".to_string(), "A".to_string())]);
        let now = Utc::now();
        fill_scope(&mut scope, &["total".into(), "host".into(), "time".into()], now, &fields, &tags).unwrap();
        assert!(matches!(scope.get("total"), Some(Value::Int(100))));
        assert!(matches!(scope.get("host"), Some(Value::Str(s)) if s == "A"));
        assert!(matches!(scope.get("time"), Some(Value::Time(_))));
    }

    #[test]
    fn fill_scope_rejects_field_tag_collisions() {
        let mut scope = Scope::with_capacity(1);
        let fields = BTreeMap::from([("host".to_string(), FieldValue::Int(1))]);
        let tags = BTreeMap::from([("host".to_string(), "A".to_string())]);
        let err = fill_scope(&mut scope, &["host".into()], Utc::now(), &fields, &tags).unwrap_err();
        assert!(matches!(err, EngineError::Data { .. }));
    }

    #[test]
    fn fill_scope_rejects_undefined_variables() {
        let mut scope = Scope::with_capacity(1);
        let err = fill_scope(&mut scope, &["missing".into()], Utc::now(), &BTreeMap::new(), &BTreeMap::new()).unwrap_err();
        assert!(matches!(err, EngineError::Data { .. }));
    }

    #[test]
    fn scope_pool_reuses_released_scopes() {
        let pool = ScopePool::new();
        let refs = vec!["a".to_string()];
        let mut s = pool.acquire(&refs);
        s.insert("a".into(), Value::Int(1));
        pool.release(&refs, s);
        let reused = pool.acquire(&refs);
        assert!(reused.is_empty());
    }

    #[test]
    fn group_cache_forgets_state_on_delete_group() {
        let mut cache = GroupExpressionCache::new();
        let g = GroupId::derive("cpu", &Dimensions::new(vec!["host".into()], false), &BTreeMap::from([("host".to_string(), "A".to_string())]));
        cache.state_for(&g).counts.insert(0, 3);
        assert_eq!(cache.len(), 1);
        cache.forget(&g);
        assert!(cache.is_empty());
    }
}
