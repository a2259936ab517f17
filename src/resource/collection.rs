//! A package's resources keyed by href.

use super::Resource;
use crate::common::{Error, Result};
use std::collections::btree_map;
use std::collections::{BTreeMap, HashMap};

/// Resources of one package, ordered by href.
///
/// Every resource added receives a unique, valid id.
#[derive(Debug, Clone)]
pub struct Resources {
    resources: BTreeMap<String, Resource>,
    /// id -> href; an entry is live only while that resource still carries the id
    ids: HashMap<String, String>,
    last_id: u32,
}

impl Default for Resources {
    fn default() -> Self {
        Self {
            resources: BTreeMap::new(),
            ids: HashMap::new(),
            last_id: 1,
        }
    }
}

impl Resources {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a resource, assigning or repairing its id.
    ///
    /// A resource already stored under the same href is replaced and
    /// returned.
    ///
    /// ```
    /// use quire::resource::{Resource, Resources};
    ///
    /// let mut resources = Resources::new();
    /// resources.add(Resource::from_text("<p/>", "ch1.xhtml"));
    /// resources.add(Resource::from_bytes(vec![0u8; 8], "cover.png"));
    ///
    /// assert_eq!(resources.get("ch1.xhtml").and_then(|r| r.id()), Some("item_1"));
    /// assert_eq!(resources.get("cover.png").and_then(|r| r.id()), Some("image_1"));
    /// ```
    pub fn add(&mut self, mut resource: Resource) -> Option<Resource> {
        self.fix_id(&mut resource);
        if let Some(id) = resource.id() {
            self.ids.insert(id.to_string(), resource.href().to_string());
        }
        self.resources
            .insert(resource.href().to_string(), resource)
    }

    #[inline]
    pub fn get(&self, href: &str) -> Option<&Resource> {
        self.resources.get(href)
    }

    /// Mutable access to a stored resource.
    ///
    /// Change ids with [`Resources::set_id`]; an id set directly on the
    /// returned resource is not indexed.
    #[inline]
    pub fn get_mut(&mut self, href: &str) -> Option<&mut Resource> {
        self.resources.get_mut(href)
    }

    pub fn get_by_id(&self, id: &str) -> Option<&Resource> {
        self.ids
            .get(id)
            .and_then(|href| self.resources.get(href))
            .filter(|resource| resource.id() == Some(id))
    }

    /// Give the resource at `href` a new id.
    ///
    /// # Errors
    ///
    /// [`Error::ResourceNotFound`], [`Error::InvalidId`], or
    /// [`Error::DuplicateId`] when another resource carries `id`.
    pub fn set_id(&mut self, href: &str, id: &str) -> Result<()> {
        if self.get_by_id(id).is_some_and(|other| other.href() != href) {
            return Err(Error::DuplicateId(id.to_string()));
        }
        let resource = self
            .resources
            .get_mut(href)
            .ok_or_else(|| Error::ResourceNotFound(href.to_string()))?;
        let previous = resource.id().map(str::to_string);
        resource.set_id(id)?;
        if let Some(previous) = previous {
            self.ids.remove(&previous);
        }
        self.ids.insert(id.to_string(), href.to_string());
        Ok(())
    }

    #[inline]
    pub fn contains(&self, href: &str) -> bool {
        self.resources.contains_key(href)
    }

    pub fn contains_id(&self, id: &str) -> bool {
        self.get_by_id(id).is_some()
    }

    pub fn remove(&mut self, href: &str) -> Option<Resource> {
        let resource = self.resources.remove(href)?;
        if let Some(id) = resource.id()
            && self.ids.get(id).is_some_and(|indexed| indexed == href)
        {
            self.ids.remove(id);
        }
        Some(resource)
    }

    /// Move the resource at `from` to the href `to`.
    ///
    /// # Errors
    ///
    /// [`Error::ResourceNotFound`] if nothing is stored at `from`,
    /// [`Error::DuplicateHref`] if `to` is already taken.
    pub fn rename(&mut self, from: &str, to: &str) -> Result<()> {
        if from == to {
            return if self.contains(from) {
                Ok(())
            } else {
                Err(Error::ResourceNotFound(from.to_string()))
            };
        }
        if self.contains(to) {
            return Err(Error::DuplicateHref(to.to_string()));
        }
        let mut resource = self
            .resources
            .remove(from)
            .ok_or_else(|| Error::ResourceNotFound(from.to_string()))?;
        resource.set_href(to.to_string());
        if let Some(id) = resource.id() {
            self.ids.insert(id.to_string(), to.to_string());
        }
        self.resources.insert(to.to_string(), resource);
        Ok(())
    }

    pub fn iter(&self) -> btree_map::Values<'_, String, Resource> {
        self.resources.values()
    }

    pub fn iter_mut(&mut self) -> btree_map::ValuesMut<'_, String, Resource> {
        self.resources.values_mut()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn hrefs(&self) -> impl Iterator<Item = &str> + '_ {
        self.resources.keys().map(String::as_str)
    }

    /// Release the cached bytes of every store-backed resource.
    pub fn release_all(&mut self) {
        for resource in self.resources.values_mut() {
            resource.release();
        }
    }

    /// Sum of all resource sizes; never loads anything.
    pub fn total_size(&self) -> u64 {
        self.resources.values().map(Resource::size).sum()
    }

    /// XHTML/HTML content documents.
    pub fn markup_resources(&self) -> impl Iterator<Item = &Resource> + '_ {
        self.resources.values().filter(|r| r.is_markup())
    }

    pub(crate) fn map_mut(&mut self) -> &mut BTreeMap<String, Resource> {
        &mut self.resources
    }

    fn fix_id(&mut self, resource: &mut Resource) {
        let prefix = id_prefix(resource);
        let repaired = resource
            .id()
            .filter(|id| !id.trim().is_empty())
            .map(|id| make_valid_id(id.trim(), prefix));

        let taken_by_other = |id: &str| {
            self.get_by_id(id)
                .is_some_and(|other| other.href() != resource.href())
        };

        let id = match repaired {
            Some(id) if !taken_by_other(&id) => id,
            _ => self.unique_id(prefix),
        };
        resource.set_id_unchecked(id);
    }

    fn unique_id(&mut self, prefix: &str) -> String {
        let mut counter = self.last_id;
        let mut id = format!("{prefix}{counter}");
        while self.contains_id(&id) {
            counter += 1;
            id = format!("{prefix}{counter}");
        }
        self.last_id = counter;
        id
    }
}

impl<'a> IntoIterator for &'a Resources {
    type Item = &'a Resource;
    type IntoIter = btree_map::Values<'a, String, Resource>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl FromIterator<Resource> for Resources {
    fn from_iter<I: IntoIterator<Item = Resource>>(iter: I) -> Self {
        let mut resources = Resources::new();
        for resource in iter {
            resources.add(resource);
        }
        resources
    }
}

fn id_prefix(resource: &Resource) -> &'static str {
    if resource.media_type().is_some_and(|m| m.is_image()) {
        "image_"
    } else {
        "item_"
    }
}

fn is_name_start(c: char) -> bool {
    c == '_' || c.is_alphabetic()
}

fn is_name_char(c: char) -> bool {
    is_name_start(c) || c.is_numeric() || c == '-' || c == '.' || c == '\u{B7}'
}

/// XML name without a colon.
pub(crate) fn is_valid_ncname(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) if is_name_start(first) => chars.all(is_name_char),
        _ => false,
    }
}

fn make_valid_id(id: &str, prefix: &str) -> String {
    let body: String = id
        .chars()
        .map(|c| if is_name_char(c) { c } else { '_' })
        .collect();
    match body.chars().next() {
        Some(first) if is_name_start(first) => body,
        _ => format!("{prefix}{body}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_valid_ncname() {
        assert!(is_valid_ncname("chapter1"));
        assert!(is_valid_ncname("_x.y-z"));
        assert!(is_valid_ncname("é"));
        assert!(!is_valid_ncname(""));
        assert!(!is_valid_ncname("1st"));
        assert!(!is_valid_ncname("a:b"));
        assert!(!is_valid_ncname("a b"));
    }

    #[test]
    fn test_id_assignment_counters() {
        let mut resources = Resources::new();
        resources.add(Resource::new("a.xhtml"));
        resources.add(Resource::new("b.xhtml"));
        resources.add(Resource::from_bytes(vec![1], "c.jpg"));

        assert_eq!(resources.get("a.xhtml").and_then(|r| r.id()), Some("item_1"));
        assert_eq!(resources.get("b.xhtml").and_then(|r| r.id()), Some("item_2"));
        assert_eq!(resources.get("c.jpg").and_then(|r| r.id()), Some("image_2"));
    }

    #[test]
    fn test_id_repair() {
        let mut resources = Resources::new();
        let mut numeric = Resource::new("one.xhtml");
        numeric.set_id_unchecked("1".to_string());
        resources.add(numeric);
        assert_eq!(resources.get("one.xhtml").and_then(|r| r.id()), Some("item_1"));

        let mut spaced = Resource::new("two.xhtml");
        spaced.set_id_unchecked("my chapter".to_string());
        resources.add(spaced);
        assert_eq!(resources.get("two.xhtml").and_then(|r| r.id()), Some("my_chapter"));

        // A clashing id is replaced by a generated one.
        let clash = Resource::new("three.xhtml").with_id("my_chapter").unwrap();
        resources.add(clash);
        let id = resources.get("three.xhtml").and_then(|r| r.id()).unwrap();
        assert_ne!(id, "my_chapter");
        assert!(is_valid_ncname(id));
    }

    #[test]
    fn test_id_index_follows_changes() {
        let mut resources: Resources = (0..2000)
            .map(|i| Resource::new(format!("ch{i:04}.xhtml")))
            .collect();
        assert_eq!(resources.len(), 2000);
        assert_eq!(
            resources.get_by_id("item_2000").map(Resource::href),
            Some("ch1999.xhtml")
        );

        resources.rename("ch0000.xhtml", "front.xhtml").unwrap();
        assert_eq!(
            resources.get_by_id("item_1").map(Resource::href),
            Some("front.xhtml")
        );

        resources.set_id("front.xhtml", "cover").unwrap();
        assert!(!resources.contains_id("item_1"));
        assert!(resources.contains_id("cover"));
        assert!(matches!(
            resources.set_id("ch0001.xhtml", "cover"),
            Err(Error::DuplicateId(_))
        ));
        assert!(matches!(
            resources.set_id("ch0001.xhtml", "2nd"),
            Err(Error::InvalidId(_))
        ));

        resources.remove("front.xhtml");
        assert!(!resources.contains_id("cover"));
        resources.add(Resource::new("late.xhtml"));
        assert_eq!(resources.get("late.xhtml").and_then(|r| r.id()), Some("item_2001"));
    }

    #[test]
    fn test_add_replaces_same_href() {
        let mut resources = Resources::new();
        assert!(resources.add(Resource::from_text("old", "a.css")).is_none());
        let previous = resources.add(Resource::from_text("new", "a.css")).unwrap();
        assert_eq!(previous.data().unwrap().as_ref(), b"old");
        assert_eq!(resources.len(), 1);
    }

    #[test]
    fn test_rename_rekeys() {
        let mut resources: Resources = [
            Resource::new("a.xhtml"),
            Resource::new("b.xhtml"),
        ]
        .into_iter()
        .collect();

        resources.rename("a.xhtml", "z.xhtml").unwrap();
        assert!(!resources.contains("a.xhtml"));
        assert_eq!(resources.get("z.xhtml").map(Resource::href), Some("z.xhtml"));
        assert_eq!(resources.hrefs().collect::<Vec<_>>(), ["b.xhtml", "z.xhtml"]);

        assert!(matches!(
            resources.rename("b.xhtml", "z.xhtml"),
            Err(Error::DuplicateHref(_))
        ));
        assert!(matches!(
            resources.rename("missing.xhtml", "y.xhtml"),
            Err(Error::ResourceNotFound(_))
        ));
    }

    #[test]
    fn test_sizes_and_filters() {
        let mut resources = Resources::new();
        resources.add(Resource::from_text("<p/>", "a.xhtml"));
        resources.add(Resource::from_bytes(vec![0; 10], "b.png"));
        resources.add(Resource::from_text("p{}", "c.css"));

        assert_eq!(resources.total_size(), 17);
        let markup: Vec<&str> = resources.markup_resources().map(Resource::href).collect();
        assert_eq!(markup, ["a.xhtml"]);
        assert!(resources.get_by_id("item_1").is_some());
        assert!(resources.remove("b.png").is_some());
        assert_eq!(resources.len(), 2);
    }

    #[test]
    fn test_release_all_keeps_eager_content() {
        use crate::resource::store::{MemoryStore, StoreRef};
        use std::sync::Arc;

        let store = Arc::new(MemoryStore::new());
        store.insert("ch1.xhtml", b"<p>1</p>".to_vec());
        let len = store.entry_len("ch1.xhtml").unwrap();

        let mut resources = Resources::new();
        resources.add(Resource::lazy(StoreRef::new(store, "ch1.xhtml", len), "ch1.xhtml"));
        resources.add(Resource::from_text("p{}", "a.css"));
        for resource in resources.iter_mut() {
            resource.load().unwrap();
        }

        resources.release_all();
        assert!(!resources.get("ch1.xhtml").unwrap().is_initialized());
        assert!(resources.get("a.css").unwrap().is_initialized());
        assert_eq!(resources.total_size(), 11);
    }
}
