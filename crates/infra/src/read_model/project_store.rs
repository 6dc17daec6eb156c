use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, RwLock};

use invrecon_core::ProjectId;

/// Project-isolated key/value store for disposable read models.
pub trait ProjectStore<K, V>: Send + Sync {
    fn get(&self, project_id: ProjectId, key: &K) -> Option<V>;
    fn upsert(&self, project_id: ProjectId, key: K, value: V);
    fn remove(&self, project_id: ProjectId, key: &K);
    fn list(&self, project_id: ProjectId) -> Vec<V>;
    /// Drop every record of a project.
    fn clear_project(&self, project_id: ProjectId);
}

impl<K, V, S> ProjectStore<K, V> for Arc<S>
where
    S: ProjectStore<K, V> + ?Sized,
{
    fn get(&self, project_id: ProjectId, key: &K) -> Option<V> {
        (**self).get(project_id, key)
    }

    fn upsert(&self, project_id: ProjectId, key: K, value: V) {
        (**self).upsert(project_id, key, value)
    }

    fn remove(&self, project_id: ProjectId, key: &K) {
        (**self).remove(project_id, key)
    }

    fn list(&self, project_id: ProjectId) -> Vec<V> {
        (**self).list(project_id)
    }

    fn clear_project(&self, project_id: ProjectId) {
        (**self).clear_project(project_id)
    }
}

#[derive(Debug)]
pub struct InMemoryProjectStore<K, V> {
    inner: RwLock<HashMap<(ProjectId, K), V>>,
}

impl<K, V> InMemoryProjectStore<K, V> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }
}

impl<K, V> Default for InMemoryProjectStore<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> ProjectStore<K, V> for InMemoryProjectStore<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn get(&self, project_id: ProjectId, key: &K) -> Option<V> {
        let map = self.inner.read().ok()?;
        map.get(&(project_id, key.clone())).cloned()
    }

    fn upsert(&self, project_id: ProjectId, key: K, value: V) {
        if let Ok(mut map) = self.inner.write() {
            map.insert((project_id, key), value);
        }
    }

    fn remove(&self, project_id: ProjectId, key: &K) {
        if let Ok(mut map) = self.inner.write() {
            map.remove(&(project_id, key.clone()));
        }
    }

    fn list(&self, project_id: ProjectId) -> Vec<V> {
        let Ok(map) = self.inner.read() else {
            return Vec::new();
        };
        map.iter()
            .filter(|((p, _), _)| *p == project_id)
            .map(|(_, v)| v.clone())
            .collect()
    }

    fn clear_project(&self, project_id: ProjectId) {
        if let Ok(mut map) = self.inner.write() {
            map.retain(|(p, _), _| *p != project_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn projects_do_not_see_each_other() {
        let store: InMemoryProjectStore<String, u32> = InMemoryProjectStore::new();
        let a = ProjectId::new();
        let b = ProjectId::new();

        store.upsert(a, "k".to_string(), 1);
        store.upsert(b, "k".to_string(), 2);

        assert_eq!(store.get(a, &"k".to_string()), Some(1));
        assert_eq!(store.list(b), vec![2]);

        store.clear_project(a);
        assert!(store.list(a).is_empty());
        assert_eq!(store.list(b), vec![2]);
    }
}
