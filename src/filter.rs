use crate::models::{Activity, Tag, TagCategory};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Selected tag ids bucketed by category.
///
/// OR within each system category, AND across categories, and every id in
/// `user_tags` must be present. An empty filter means "pick from everything".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FilterSpec {
    pub place: BTreeSet<i64>,
    pub company: BTreeSet<i64>,
    pub duration: BTreeSet<i64>,
    pub user_tags: BTreeSet<i64>,
}

impl FilterSpec {
    pub fn from_tags<'a, I>(selected: I) -> Self
    where
        I: IntoIterator<Item = &'a Tag>,
    {
        let mut spec = Self::default();
        for tag in selected {
            spec.bucket_mut(tag.category).insert(tag.id);
        }
        spec
    }

    pub fn is_empty(&self) -> bool {
        self.place.is_empty() && self.company.is_empty() && self.duration.is_empty() && self.user_tags.is_empty()
    }

    pub fn bucket(&self, category: TagCategory) -> &BTreeSet<i64> {
        match category {
            TagCategory::Place => &self.place,
            TagCategory::Company => &self.company,
            TagCategory::Duration => &self.duration,
            TagCategory::Uncategorized => &self.user_tags,
        }
    }

    fn bucket_mut(&mut self, category: TagCategory) -> &mut BTreeSet<i64> {
        match category {
            TagCategory::Place => &mut self.place,
            TagCategory::Company => &mut self.company,
            TagCategory::Duration => &mut self.duration,
            TagCategory::Uncategorized => &mut self.user_tags,
        }
    }

    /// Flips the tag in its bucket; returns whether it is selected afterwards.
    pub fn toggle(&mut self, tag: &Tag) -> bool {
        let bucket = self.bucket_mut(tag.category);
        if bucket.remove(&tag.id) {
            false
        } else {
            bucket.insert(tag.id);
            true
        }
    }

    pub fn contains(&self, tag: &Tag) -> bool {
        self.bucket(tag.category).contains(&tag.id)
    }

    /// The filter part of eligibility, evaluated against an activity's tag ids.
    pub fn matches(&self, tag_ids: &BTreeSet<i64>) -> bool {
        let any_of = |wanted: &BTreeSet<i64>| wanted.is_empty() || !wanted.is_disjoint(tag_ids);
        any_of(&self.place)
            && any_of(&self.company)
            && any_of(&self.duration)
            && self.user_tags.is_subset(tag_ids)
    }
}

/// In-memory form of the selection predicate used by the store's SQL.
pub fn is_eligible(activity: &Activity, tags: &[Tag], filter: &FilterSpec) -> bool {
    if activity.is_archived || tags.iter().any(Tag::hides_activities) {
        return false;
    }
    if filter.is_empty() {
        return true;
    }
    let tag_ids = tags.iter().map(|tag| tag.id).collect::<BTreeSet<_>>();
    filter.matches(&tag_ids)
}
