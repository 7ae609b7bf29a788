mod selection;

use crate::errors::{AppError, AppResult};
use crate::models::{
    Activity, ActivityDetail, ListActivitiesFilters, ListTagsFilters, Tag, TagCategory, DEFAULT_TAGS,
};
use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

const SCHEMA_SQL: &str = include_str!("schema.sql");

const ACTIVITY_COLUMNS: &str = "a.id, a.text, a.created_at, a.updated_at, a.is_archived";
const TAG_COLUMNS: &str = "t.id, t.name, t.category, t.is_default, t.is_active";
const TAG_ORDER: &str = "t.category IS NULL,
    CASE t.category WHEN 'place' THEN 0 WHEN 'company' THEN 1 WHEN 'duration' THEN 2 ELSE 3 END,
    t.name, t.id";

/// Matches activities carrying at least one deactivated system tag.
const HIDDEN_BY_INACTIVE_SYSTEM_TAG: &str = "EXISTS (
    SELECT 1
    FROM activity_tags j
    INNER JOIN tags t ON t.id = j.tag_id
    WHERE j.activity_id = a.id
      AND t.category IS NOT NULL
      AND t.is_active = 0
  )";

#[derive(Debug)]
pub struct Database {
    conn: Mutex<Connection>,
    db_path: Option<PathBuf>,
}

impl Database {
    pub fn new(path: &Path) -> AppResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| AppError::Io(err.to_string()))?;
        }
        let conn = Connection::open(path).map_err(AppError::from)?;
        Self::with_connection(conn, Some(path.to_path_buf()))
    }

    pub fn open_in_memory() -> AppResult<Self> {
        let conn = Connection::open_in_memory().map_err(AppError::from)?;
        Self::with_connection(conn, None)
    }

    fn with_connection(conn: Connection, db_path: Option<PathBuf>) -> AppResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA_SQL).map_err(AppError::from)?;
        Ok(Self {
            conn: Mutex::new(conn),
            db_path,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    fn conn(&self) -> AppResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AppError::Storage("database mutex poisoned".to_string()))
    }

    pub fn insert_activity(&self, text: &str, tag_ids: &[i64]) -> AppResult<Activity> {
        let text = normalize_activity_text(text)?;
        let now = Utc::now().timestamp_millis();

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO activities (text, created_at, updated_at, is_archived) VALUES (?1, ?2, ?2, 0)",
            params![text, now],
        )?;
        let id = tx.last_insert_rowid();
        replace_activity_tags(&tx, id, tag_ids)?;
        let activity = load_activity(&tx, id)?
            .ok_or_else(|| AppError::Storage(format!("activity {} vanished after insert", id)))?;
        tx.commit()?;

        tracing::debug!(activity_id = id, tags = tag_ids.len(), "activity created");
        Ok(activity)
    }

    /// Rewrites text and replaces the full tag set. `updated_at` always moves forward.
    pub fn update_activity(&self, id: i64, text: &str, tag_ids: &[i64]) -> AppResult<Activity> {
        let text = normalize_activity_text(text)?;
        let now = Utc::now().timestamp_millis();

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let updated = tx.execute(
            "UPDATE activities SET text = ?1, updated_at = MAX(?2, updated_at + 1) WHERE id = ?3",
            params![text, now, id],
        )?;
        if updated == 0 {
            return Err(AppError::NotFound(format!("activity {}", id)));
        }
        replace_activity_tags(&tx, id, tag_ids)?;
        let activity = load_activity(&tx, id)?.ok_or_else(|| AppError::NotFound(format!("activity {}", id)))?;
        tx.commit()?;

        tracing::debug!(activity_id = id, tags = tag_ids.len(), "activity updated");
        Ok(activity)
    }

    pub fn delete_activity(&self, id: i64) -> AppResult<bool> {
        let conn = self.conn()?;
        let deleted = conn.execute("DELETE FROM activities WHERE id = ?1", [id])?;
        if deleted > 0 {
            tracing::info!(activity_id = id, "activity deleted");
        }
        Ok(deleted > 0)
    }

    pub fn get_activity(&self, id: i64) -> AppResult<Option<Activity>> {
        let conn = self.conn()?;
        load_activity(&conn, id)
    }

    pub fn get_activity_detail(&self, id: i64) -> AppResult<Option<ActivityDetail>> {
        let conn = self.conn()?;
        let activity = match load_activity(&conn, id)? {
            Some(activity) => activity,
            None => return Ok(None),
        };
        let tags = load_activity_tags(&conn, id)?;
        Ok(Some(ActivityDetail { activity, tags }))
    }

    pub fn list_activities(&self, filters: &ListActivitiesFilters) -> AppResult<Vec<Activity>> {
        let conn = self.conn()?;
        let mut query = format!("SELECT {} FROM activities a WHERE a.is_archived = 0", ACTIVITY_COLUMNS);
        let mut params_vec: Vec<Value> = Vec::new();

        if filters.hide_inactive_system_tagged {
            query.push_str(" AND NOT ");
            query.push_str(HIDDEN_BY_INACTIVE_SYSTEM_TAG);
        }
        if let Some(search) = filters.search.as_deref().map(str::trim).filter(|search| !search.is_empty()) {
            query.push_str(" AND a.text LIKE ? ESCAPE '\\'");
            params_vec.push(Value::Text(like_pattern(search)));
        }

        query.push_str(" ORDER BY a.updated_at DESC, a.id DESC LIMIT ? OFFSET ?");
        params_vec.push(Value::Integer(filters.limit.map(i64::from).unwrap_or(-1)));
        params_vec.push(Value::Integer(filters.offset.map(i64::from).unwrap_or(0)));

        let mut statement = conn.prepare(&query)?;
        let rows = statement.query_map(rusqlite::params_from_iter(params_vec), parse_activity_row)?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    pub fn tags_for_activity(&self, activity_id: i64) -> AppResult<Vec<Tag>> {
        let conn = self.conn()?;
        load_activity_tags(&conn, activity_id)
    }

    /// Adds a single association. Returns false when it already existed.
    pub fn attach_tag(&self, activity_id: i64, tag_id: i64) -> AppResult<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        if load_activity(&tx, activity_id)?.is_none() {
            return Err(AppError::NotFound(format!("activity {}", activity_id)));
        }
        ensure_tag_exists(&tx, tag_id)?;
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO activity_tags (activity_id, tag_id) VALUES (?1, ?2)",
            params![activity_id, tag_id],
        )?;
        if inserted > 0 {
            touch_activity(&tx, activity_id)?;
        }
        tx.commit()?;
        Ok(inserted > 0)
    }

    pub fn detach_tag(&self, activity_id: i64, tag_id: i64) -> AppResult<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let removed = tx.execute(
            "DELETE FROM activity_tags WHERE activity_id = ?1 AND tag_id = ?2",
            params![activity_id, tag_id],
        )?;
        if removed > 0 {
            touch_activity(&tx, activity_id)?;
        }
        tx.commit()?;
        Ok(removed > 0)
    }

    /// Inserts a tag unless (name, category) already exists, in which case the
    /// existing row is returned untouched. The flag reports whether a row was created.
    pub fn insert_tag(&self, name: &str, category: TagCategory) -> AppResult<(Tag, bool)> {
        let name = normalize_tag_name(name)?;
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let outcome = insert_tag_if_absent(&tx, &name, category, false)?;
        tx.commit()?;
        if outcome.1 {
            tracing::debug!(tag_id = outcome.0.id, category = ?category, "tag created");
        }
        Ok(outcome)
    }

    pub fn rename_tag(&self, id: i64, name: &str) -> AppResult<Tag> {
        let name = normalize_tag_name(name)?;
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let tag = load_tag(&tx, id)?.ok_or_else(|| AppError::NotFound(format!("tag {}", id)))?;
        if let Some(existing) = find_tag(&tx, &name, tag.category)? {
            if existing.id != id {
                return Err(AppError::Conflict(format!(
                    "tag '{}' already exists in category {:?}",
                    existing.name, existing.category
                )));
            }
        }
        tx.execute("UPDATE tags SET name = ?1 WHERE id = ?2", params![name, id])?;
        let renamed = load_tag(&tx, id)?.ok_or_else(|| AppError::NotFound(format!("tag {}", id)))?;
        tx.commit()?;
        Ok(renamed)
    }

    pub fn delete_tag(&self, id: i64) -> AppResult<bool> {
        let conn = self.conn()?;
        let deleted = conn.execute("DELETE FROM tags WHERE id = ?1", [id])?;
        if deleted > 0 {
            tracing::info!(tag_id = id, "tag deleted");
        }
        Ok(deleted > 0)
    }

    /// Soft-hides or restores a system tag. Returns whether the flag changed;
    /// user tags are left alone and yield `false`.
    pub fn set_tag_active(&self, id: i64, active: bool) -> AppResult<bool> {
        let conn = self.conn()?;
        let tag = load_tag(&conn, id)?.ok_or_else(|| AppError::NotFound(format!("tag {}", id)))?;
        if !tag.is_system() {
            tracing::warn!(tag_id = id, "ignoring active flag change on a user tag");
            return Ok(false);
        }
        let changed = conn.execute(
            "UPDATE tags SET is_active = ?1 WHERE id = ?2 AND is_active != ?1",
            params![i32::from(active), id],
        )?;
        if changed > 0 {
            tracing::info!(tag_id = id, active, "tag active flag changed");
        }
        Ok(changed > 0)
    }

    pub fn get_tag(&self, id: i64) -> AppResult<Option<Tag>> {
        let conn = self.conn()?;
        load_tag(&conn, id)
    }

    pub fn tags_by_ids(&self, ids: &[i64]) -> AppResult<Vec<Tag>> {
        let ids = ids.iter().copied().collect::<BTreeSet<_>>();
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn()?;
        let query = format!(
            "SELECT {} FROM tags t WHERE t.id IN ({}) ORDER BY {}",
            TAG_COLUMNS,
            placeholders(ids.len()),
            TAG_ORDER
        );
        let mut statement = conn.prepare(&query)?;
        let tags = statement
            .query_map(rusqlite::params_from_iter(ids), parse_tag_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tags)
    }

    pub fn list_tags(&self, filters: &ListTagsFilters) -> AppResult<Vec<Tag>> {
        let conn = self.conn()?;
        let mut query = format!("SELECT {} FROM tags t WHERE 1 = 1", TAG_COLUMNS);
        let mut params_vec: Vec<Value> = Vec::new();

        if !filters.include_inactive {
            query.push_str(" AND t.is_active = 1");
        }
        if filters.system_only {
            query.push_str(" AND t.category IS NOT NULL");
        }
        if let Some(category) = filters.category {
            query.push_str(" AND t.category IS ?");
            params_vec.push(
                category
                    .as_db_value()
                    .map(|raw| Value::Text(raw.to_string()))
                    .unwrap_or(Value::Null),
            );
        }
        query.push_str(" ORDER BY ");
        query.push_str(TAG_ORDER);

        let mut statement = conn.prepare(&query)?;
        let tags = statement
            .query_map(rusqlite::params_from_iter(params_vec), parse_tag_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tags)
    }

    /// Inserts the missing default tags. Existing rows, including their active
    /// flag, are never touched, so this runs on every startup.
    pub fn seed_default_tags(&self) -> AppResult<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut inserted = 0usize;
        for (name, category) in DEFAULT_TAGS {
            let (_, created) = insert_tag_if_absent(&tx, name, category, true)?;
            if created {
                inserted += 1;
            }
        }
        tx.commit()?;
        tracing::info!(inserted, total = DEFAULT_TAGS.len(), "default tags seeded");
        Ok(inserted)
    }
}

fn normalize_activity_text(raw: &str) -> AppResult<String> {
    let text = raw.trim();
    if text.is_empty() {
        return Err(AppError::Validation("activity text must not be blank".to_string()));
    }
    Ok(text.to_string())
}

fn normalize_tag_name(raw: &str) -> AppResult<String> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(AppError::Validation("tag name must not be blank".to_string()));
    }
    Ok(name.to_string())
}

fn replace_activity_tags(conn: &Connection, activity_id: i64, tag_ids: &[i64]) -> AppResult<()> {
    conn.execute("DELETE FROM activity_tags WHERE activity_id = ?1", [activity_id])?;
    let unique = tag_ids.iter().copied().collect::<BTreeSet<_>>();
    for tag_id in unique {
        ensure_tag_exists(conn, tag_id)?;
        conn.execute(
            "INSERT OR IGNORE INTO activity_tags (activity_id, tag_id) VALUES (?1, ?2)",
            params![activity_id, tag_id],
        )?;
    }
    Ok(())
}

fn ensure_tag_exists(conn: &Connection, tag_id: i64) -> AppResult<()> {
    let exists: bool = conn.query_row("SELECT COUNT(1) > 0 FROM tags WHERE id = ?1", [tag_id], |row| {
        row.get(0)
    })?;
    if !exists {
        return Err(AppError::NotFound(format!("tag {}", tag_id)));
    }
    Ok(())
}

fn touch_activity(conn: &Connection, activity_id: i64) -> AppResult<()> {
    conn.execute(
        "UPDATE activities SET updated_at = MAX(?1, updated_at + 1) WHERE id = ?2",
        params![Utc::now().timestamp_millis(), activity_id],
    )?;
    Ok(())
}

fn insert_tag_if_absent(
    conn: &Connection,
    name: &str,
    category: TagCategory,
    is_default: bool,
) -> AppResult<(Tag, bool)> {
    if let Some(existing) = find_tag(conn, name, category)? {
        return Ok((existing, false));
    }
    conn.execute(
        "INSERT INTO tags (name, category, is_default, is_active) VALUES (?1, ?2, ?3, 1)",
        params![name, category.as_db_value(), i32::from(is_default)],
    )?;
    let id = conn.last_insert_rowid();
    let tag = load_tag(conn, id)?.ok_or_else(|| AppError::Storage(format!("tag {} vanished after insert", id)))?;
    Ok((tag, true))
}

fn find_tag(conn: &Connection, name: &str, category: TagCategory) -> AppResult<Option<Tag>> {
    conn.query_row(
        &format!("SELECT {} FROM tags t WHERE t.name = ?1 AND t.category IS ?2", TAG_COLUMNS),
        params![name, category.as_db_value()],
        parse_tag_row,
    )
    .optional()
    .map_err(AppError::from)
}

fn load_tag(conn: &Connection, id: i64) -> AppResult<Option<Tag>> {
    conn.query_row(
        &format!("SELECT {} FROM tags t WHERE t.id = ?1", TAG_COLUMNS),
        [id],
        parse_tag_row,
    )
    .optional()
    .map_err(AppError::from)
}

fn load_activity(conn: &Connection, id: i64) -> AppResult<Option<Activity>> {
    conn.query_row(
        &format!("SELECT {} FROM activities a WHERE a.id = ?1", ACTIVITY_COLUMNS),
        [id],
        parse_activity_row,
    )
    .optional()
    .map_err(AppError::from)
}

fn load_activity_tags(conn: &Connection, activity_id: i64) -> AppResult<Vec<Tag>> {
    let mut statement = conn.prepare(&format!(
        "SELECT {} FROM tags t
         INNER JOIN activity_tags j ON j.tag_id = t.id
         WHERE j.activity_id = ?1
         ORDER BY {}",
        TAG_COLUMNS, TAG_ORDER
    ))?;
    let tags = statement
        .query_map([activity_id], parse_tag_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(tags)
}

fn parse_activity_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Activity> {
    Ok(Activity {
        id: row.get(0)?,
        text: row.get(1)?,
        created_at: parse_millis(row.get(2)?)?,
        updated_at: parse_millis(row.get(3)?)?,
        is_archived: row.get::<_, i32>(4)? != 0,
    })
}

fn parse_tag_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Tag> {
    let raw_category: Option<String> = row.get(2)?;
    let category = TagCategory::from_db_value(raw_category.as_deref()).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("Unknown tag category '{}'", raw_category.clone().unwrap_or_default()),
            )),
        )
    })?;
    Ok(Tag {
        id: row.get(0)?,
        name: row.get(1)?,
        category,
        is_default: row.get::<_, i32>(3)? != 0,
        is_active: row.get::<_, i32>(4)? != 0,
    })
}

fn parse_millis(raw: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Integer,
            Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("timestamp out of range: {}", raw),
            )),
        )
    })
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

fn like_pattern(search: &str) -> String {
    let mut escaped = String::with_capacity(search.len() + 2);
    escaped.push('%');
    for ch in search.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped.push('%');
    escaped
}
