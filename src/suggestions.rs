use crate::config::AppConfig;
use crate::db::Database;
use crate::errors::AppResult;
use crate::filter::FilterSpec;
use crate::live::{ChangeFeed, Dependency, LiveQuery, Revision};
use crate::models::{Activity, ActivityDetail, ListActivitiesFilters, ListTagsFilters, Tag, TagCategory};
use rand::Rng;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::watch;

/// Entry point for presentation code: store access, random picks and live views.
#[derive(Debug)]
pub struct SuggestionCore {
    db: Arc<Database>,
    feed: ChangeFeed,
}

impl SuggestionCore {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            db,
            feed: ChangeFeed::new(),
        }
    }

    pub fn open(config: &AppConfig) -> AppResult<Self> {
        config.validate()?;
        let db = Database::new(&config.database_path())?;
        let core = Self::new(Arc::new(db));
        if config.seed_default_tags {
            core.seed_defaults()?;
        }
        tracing::info!(path = %config.database_path().to_string_lossy(), "activity store opened");
        Ok(core)
    }

    pub fn in_memory() -> AppResult<Self> {
        let core = Self::new(Arc::new(Database::open_in_memory()?));
        core.seed_defaults()?;
        Ok(core)
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn revision(&self) -> Revision {
        self.feed.current()
    }

    pub fn subscribe(&self) -> watch::Receiver<Revision> {
        self.feed.subscribe()
    }

    pub fn seed_defaults(&self) -> AppResult<usize> {
        let inserted = self.db.seed_default_tags()?;
        if inserted > 0 {
            self.feed.tags_changed();
        }
        Ok(inserted)
    }

    pub fn list_activities(&self) -> AppResult<Vec<Activity>> {
        self.db.list_activities(&ListActivitiesFilters::visible())
    }

    pub fn list_activities_any_status(&self) -> AppResult<Vec<Activity>> {
        self.db.list_activities(&ListActivitiesFilters::any_status())
    }

    pub fn search_activities(&self, filters: &ListActivitiesFilters) -> AppResult<Vec<Activity>> {
        self.db.list_activities(filters)
    }

    pub fn watch_activities(&self) -> LiveQuery<Activity> {
        self.watch_activity_list(ListActivitiesFilters::visible())
    }

    pub fn watch_activities_any_status(&self) -> LiveQuery<Activity> {
        self.watch_activity_list(ListActivitiesFilters::any_status())
    }

    fn watch_activity_list(&self, filters: ListActivitiesFilters) -> LiveQuery<Activity> {
        LiveQuery::new(self.db.clone(), self.feed.subscribe(), Dependency::Activities, move |db| {
            db.list_activities(&filters)
        })
    }

    pub fn get_activity(&self, id: i64) -> AppResult<Option<Activity>> {
        self.db.get_activity(id)
    }

    pub fn get_activity_detail(&self, id: i64) -> AppResult<Option<ActivityDetail>> {
        self.db.get_activity_detail(id)
    }

    pub fn create_activity(&self, text: &str, tag_ids: &[i64]) -> AppResult<i64> {
        let activity = self.db.insert_activity(text, tag_ids)?;
        self.feed.activities_changed();
        Ok(activity.id)
    }

    pub fn update_activity(&self, id: i64, text: &str, tag_ids: &[i64]) -> AppResult<Activity> {
        let activity = self.db.update_activity(id, text, tag_ids)?;
        self.feed.activities_changed();
        Ok(activity)
    }

    pub fn delete_activity(&self, id: i64) -> AppResult<bool> {
        let deleted = self.db.delete_activity(id)?;
        if deleted {
            self.feed.activities_changed();
        }
        Ok(deleted)
    }

    pub fn attach_tag(&self, activity_id: i64, tag_id: i64) -> AppResult<bool> {
        let attached = self.db.attach_tag(activity_id, tag_id)?;
        if attached {
            self.feed.activities_changed();
        }
        Ok(attached)
    }

    pub fn detach_tag(&self, activity_id: i64, tag_id: i64) -> AppResult<bool> {
        let detached = self.db.detach_tag(activity_id, tag_id)?;
        if detached {
            self.feed.activities_changed();
        }
        Ok(detached)
    }

    pub fn tags_for_activity(&self, activity_id: i64) -> AppResult<Vec<Tag>> {
        self.db.tags_for_activity(activity_id)
    }

    pub fn tags_by_ids(&self, ids: &[i64]) -> AppResult<Vec<Tag>> {
        self.db.tags_by_ids(ids)
    }

    pub fn list_active_tags(&self) -> AppResult<Vec<Tag>> {
        self.db.list_tags(&ListTagsFilters::active())
    }

    pub fn list_all_tags(&self) -> AppResult<Vec<Tag>> {
        self.db.list_tags(&ListTagsFilters::all())
    }

    pub fn list_tags(&self, filters: &ListTagsFilters) -> AppResult<Vec<Tag>> {
        self.db.list_tags(filters)
    }

    pub fn watch_active_tags(&self) -> LiveQuery<Tag> {
        self.watch_tag_list(ListTagsFilters::active())
    }

    pub fn watch_all_tags(&self) -> LiveQuery<Tag> {
        self.watch_tag_list(ListTagsFilters::all())
    }

    fn watch_tag_list(&self, filters: ListTagsFilters) -> LiveQuery<Tag> {
        LiveQuery::new(self.db.clone(), self.feed.subscribe(), Dependency::Tags, move |db| {
            db.list_tags(&filters)
        })
    }

    /// Creates a free-form user tag, or returns the id of the existing one.
    pub fn create_tag(&self, name: &str) -> AppResult<i64> {
        self.create_tag_in(name, TagCategory::Uncategorized)
    }

    pub fn create_tag_in(&self, name: &str, category: TagCategory) -> AppResult<i64> {
        let (tag, created) = self.db.insert_tag(name, category)?;
        if created {
            self.feed.tags_changed();
        }
        Ok(tag.id)
    }

    pub fn rename_tag(&self, id: i64, name: &str) -> AppResult<Tag> {
        let tag = self.db.rename_tag(id, name)?;
        self.feed.tags_changed();
        Ok(tag)
    }

    /// Hard delete; associations go with it. System tags come back on the next seed.
    pub fn delete_tag(&self, id: i64) -> AppResult<bool> {
        let deleted = self.db.delete_tag(id)?;
        if deleted {
            self.feed.tags_and_activities_changed();
        }
        Ok(deleted)
    }

    pub fn set_tag_active(&self, id: i64, active: bool) -> AppResult<bool> {
        let applied = self.db.set_tag_active(id, active)?;
        if applied {
            self.feed.tags_changed();
        }
        Ok(applied)
    }

    pub fn deactivate_tag(&self, id: i64) -> AppResult<bool> {
        self.set_tag_active(id, false)
    }

    pub fn activate_tag(&self, id: i64) -> AppResult<bool> {
        self.set_tag_active(id, true)
    }

    /// Builds a filter from selected tag ids. Ids that no longer exist stay in
    /// the filter as must-have tags, so they match nothing.
    pub fn filter_from_tag_ids(&self, ids: &[i64]) -> AppResult<FilterSpec> {
        let tags = self.db.tags_by_ids(ids)?;
        let mut filter = FilterSpec::from_tags(&tags);
        let known = tags.iter().map(|tag| tag.id).collect::<BTreeSet<_>>();
        filter
            .user_tags
            .extend(ids.iter().copied().filter(|id| !known.contains(id)));
        Ok(filter)
    }

    pub fn pick_random(&self, filter: &FilterSpec) -> AppResult<Option<Activity>> {
        self.db.pick_random(filter)
    }

    pub fn pick_random_with<R: Rng + ?Sized>(&self, filter: &FilterSpec, rng: &mut R) -> AppResult<Option<Activity>> {
        self.db.pick_random_with(filter, rng)
    }
}
