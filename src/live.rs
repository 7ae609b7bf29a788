use crate::db::Database;
use crate::errors::AppResult;
use std::sync::Arc;
use tokio::sync::watch;

/// Monotonic counters bumped after each committed mutation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Revision {
    pub activities: u64,
    pub tags: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dependency {
    /// Activity lists also depend on tag state (inactive system tags hide rows).
    Activities,
    Tags,
}

impl Dependency {
    fn affected(self, seen: Revision, current: Revision) -> bool {
        match self {
            Self::Activities => seen != current,
            Self::Tags => seen.tags != current.tags,
        }
    }
}

#[derive(Debug)]
pub struct ChangeFeed {
    sender: watch::Sender<Revision>,
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeFeed {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(Revision::default());
        Self { sender }
    }

    pub fn current(&self) -> Revision {
        *self.sender.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<Revision> {
        self.sender.subscribe()
    }

    pub fn activities_changed(&self) {
        self.sender.send_modify(|revision| revision.activities += 1);
    }

    pub fn tags_changed(&self) {
        self.sender.send_modify(|revision| revision.tags += 1);
    }

    /// Tag removals cascade into associations, so both views move.
    pub fn tags_and_activities_changed(&self) {
        self.sender.send_modify(|revision| {
            revision.activities += 1;
            revision.tags += 1;
        });
    }
}

type Loader<T> = Box<dyn Fn(&Database) -> AppResult<Vec<T>> + Send + Sync>;

/// A query that can be read now and re-read whenever the data it depends on changes.
pub struct LiveQuery<T> {
    db: Arc<Database>,
    receiver: watch::Receiver<Revision>,
    seen: Revision,
    dependency: Dependency,
    load: Loader<T>,
}

impl<T> LiveQuery<T> {
    pub fn new(
        db: Arc<Database>,
        mut receiver: watch::Receiver<Revision>,
        dependency: Dependency,
        load: impl Fn(&Database) -> AppResult<Vec<T>> + Send + Sync + 'static,
    ) -> Self {
        let seen = *receiver.borrow_and_update();
        Self {
            db,
            receiver,
            seen,
            dependency,
            load: Box::new(load),
        }
    }

    pub fn snapshot(&self) -> AppResult<Vec<T>> {
        (self.load)(&self.db)
    }

    /// Waits for the next relevant change and returns fresh rows.
    /// Yields `None` once the owning core has been dropped.
    pub async fn changed(&mut self) -> Option<AppResult<Vec<T>>> {
        loop {
            if self.receiver.changed().await.is_err() {
                return None;
            }
            if self.advance() {
                return Some(self.snapshot());
            }
        }
    }

    /// Non-blocking variant of [`LiveQuery::changed`].
    pub fn try_changed(&mut self) -> Option<AppResult<Vec<T>>> {
        match self.receiver.has_changed() {
            Ok(true) if self.advance() => Some(self.snapshot()),
            _ => None,
        }
    }

    fn advance(&mut self) -> bool {
        let current = *self.receiver.borrow_and_update();
        let affected = self.dependency.affected(self.seen, current);
        self.seen = current;
        affected
    }
}

#[cfg(test)]
mod tests {
    use super::{ChangeFeed, Dependency, LiveQuery};
    use crate::db::Database;
    use crate::models::{ListActivitiesFilters, ListTagsFilters, TagCategory};
    use std::sync::Arc;
    use std::time::Duration;

    fn activity_query(db: &Arc<Database>, feed: &ChangeFeed) -> LiveQuery<crate::models::Activity> {
        LiveQuery::new(db.clone(), feed.subscribe(), Dependency::Activities, |db| {
            db.list_activities(&ListActivitiesFilters::visible())
        })
    }

    #[tokio::test]
    async fn activity_view_refreshes_after_mutation() {
        let db = Arc::new(Database::open_in_memory().expect("db"));
        let feed = ChangeFeed::new();
        let mut live = activity_query(&db, &feed);
        assert!(live.snapshot().expect("snapshot").is_empty());

        db.insert_activity("Read a book", &[]).expect("insert");
        feed.activities_changed();

        let rows = tokio::time::timeout(Duration::from_secs(1), live.changed())
            .await
            .expect("change delivered")
            .expect("feed open")
            .expect("rows");
        assert_eq!(rows.len(), 1);
        assert!(live.try_changed().is_none());
    }

    #[test]
    fn tag_view_ignores_activity_changes() {
        let db = Arc::new(Database::open_in_memory().expect("db"));
        let feed = ChangeFeed::new();
        let mut tags = LiveQuery::new(db.clone(), feed.subscribe(), Dependency::Tags, |db| {
            db.list_tags(&ListTagsFilters::active())
        });
        let mut activities = activity_query(&db, &feed);

        feed.activities_changed();
        assert!(tags.try_changed().is_none());
        assert!(activities.try_changed().is_some());

        db.insert_tag("fun", TagCategory::Uncategorized).expect("tag");
        feed.tags_changed();
        assert_eq!(tags.try_changed().expect("changed").expect("rows").len(), 1);
        assert!(activities.try_changed().is_some());
    }

    #[tokio::test]
    async fn closed_feed_ends_the_stream() {
        let db = Arc::new(Database::open_in_memory().expect("db"));
        let feed = ChangeFeed::new();
        let mut live = activity_query(&db, &feed);
        drop(feed);
        assert!(live.changed().await.is_none());
    }
}
