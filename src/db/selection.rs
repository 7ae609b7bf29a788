use super::{parse_activity_row, placeholders, Database, ACTIVITY_COLUMNS, HIDDEN_BY_INACTIVE_SYSTEM_TAG};
use crate::errors::{AppError, AppResult};
use crate::filter::FilterSpec;
use crate::models::Activity;
use rand::Rng;
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension};
use std::collections::BTreeSet;

/// WHERE clause over `activities a` selecting eligible rows for a filter.
struct EligibleQuery {
    clause: String,
    params: Vec<Value>,
}

impl EligibleQuery {
    fn any() -> Self {
        Self {
            clause: format!("a.is_archived = 0 AND NOT {}", HIDDEN_BY_INACTIVE_SYSTEM_TAG),
            params: Vec::new(),
        }
    }

    fn for_filter(filter: &FilterSpec) -> Self {
        let mut query = Self::any();
        if filter.is_empty() {
            return query;
        }

        for wanted in [&filter.place, &filter.company, &filter.duration] {
            if wanted.is_empty() {
                continue;
            }
            query.clause.push_str(&format!(
                " AND EXISTS (
                    SELECT 1 FROM activity_tags j
                    WHERE j.activity_id = a.id AND j.tag_id IN ({})
                  )",
                placeholders(wanted.len())
            ));
            query.push_ids(wanted);
        }

        if !filter.user_tags.is_empty() {
            query.clause.push_str(&format!(
                " AND (
                    SELECT COUNT(DISTINCT j.tag_id) FROM activity_tags j
                    WHERE j.activity_id = a.id AND j.tag_id IN ({})
                  ) = ?",
                placeholders(filter.user_tags.len())
            ));
            query.push_ids(&filter.user_tags);
            query.params.push(Value::Integer(filter.user_tags.len() as i64));
        }
        query
    }

    fn push_ids(&mut self, ids: &BTreeSet<i64>) {
        self.params.extend(ids.iter().map(|id| Value::Integer(*id)));
    }

    fn count(&self, conn: &Connection) -> AppResult<u64> {
        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(1) FROM activities a WHERE {}", self.clause),
            rusqlite::params_from_iter(self.params.iter()),
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }

    fn nth(&self, conn: &Connection, offset: u64) -> AppResult<Option<Activity>> {
        let offset = i64::try_from(offset).map_err(|_| AppError::Internal("selection offset overflow".to_string()))?;
        let mut params = self.params.clone();
        params.push(Value::Integer(offset));
        conn.query_row(
            &format!(
                "SELECT {} FROM activities a WHERE {} ORDER BY a.id ASC LIMIT 1 OFFSET ?",
                ACTIVITY_COLUMNS, self.clause
            ),
            rusqlite::params_from_iter(params),
            parse_activity_row,
        )
        .optional()
        .map_err(AppError::from)
    }

    fn ids(&self, conn: &Connection) -> AppResult<Vec<i64>> {
        let mut statement = conn.prepare(&format!(
            "SELECT a.id FROM activities a WHERE {} ORDER BY a.id ASC",
            self.clause
        ))?;
        let ids = statement
            .query_map(rusqlite::params_from_iter(self.params.iter()), |row| row.get(0))?
            .collect::<Result<Vec<i64>, _>>()?;
        Ok(ids)
    }
}

impl Database {
    pub fn pick_random(&self, filter: &FilterSpec) -> AppResult<Option<Activity>> {
        self.pick_random_with(filter, &mut rand::rng())
    }

    /// Uniform pick among eligible activities. Counting and fetching happen
    /// under one lock so both see the same association state.
    pub fn pick_random_with<R: Rng + ?Sized>(&self, filter: &FilterSpec, rng: &mut R) -> AppResult<Option<Activity>> {
        let query = EligibleQuery::for_filter(filter);
        let conn = self.conn()?;
        let eligible = query.count(&conn)?;
        if eligible == 0 {
            tracing::debug!(empty_filter = filter.is_empty(), "no eligible activity");
            return Ok(None);
        }
        let offset = rng.random_range(0..eligible);
        let picked = query.nth(&conn, offset)?;
        tracing::debug!(
            eligible,
            activity_id = picked.as_ref().map(|activity| activity.id),
            "picked random activity"
        );
        Ok(picked)
    }

    pub fn count_eligible(&self, filter: &FilterSpec) -> AppResult<u64> {
        let conn = self.conn()?;
        EligibleQuery::for_filter(filter).count(&conn)
    }

    pub fn eligible_activity_ids(&self, filter: &FilterSpec) -> AppResult<Vec<i64>> {
        let conn = self.conn()?;
        EligibleQuery::for_filter(filter).ids(&conn)
    }
}

#[cfg(test)]
mod tests {
    use crate::db::Database;
    use crate::filter::{is_eligible, FilterSpec};
    use crate::models::{ListTagsFilters, TagCategory};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::{BTreeSet, HashMap};

    fn seeded() -> (Database, HashMap<String, i64>) {
        let db = Database::open_in_memory().expect("db");
        db.seed_default_tags().expect("seed");
        db.insert_tag("urgent", TagCategory::Uncategorized).expect("urgent");
        db.insert_tag("fun", TagCategory::Uncategorized).expect("fun");
        let tags = db
            .list_tags(&ListTagsFilters::all())
            .expect("tags")
            .into_iter()
            .map(|tag| (tag.name, tag.id))
            .collect();
        (db, tags)
    }

    fn ids(values: &[i64]) -> BTreeSet<i64> {
        values.iter().copied().collect()
    }

    #[test]
    fn empty_store_yields_no_result() {
        let (db, _) = seeded();
        let mut rng = StdRng::seed_from_u64(1);
        assert!(db.pick_random_with(&FilterSpec::default(), &mut rng).expect("pick").is_none());
    }

    #[test]
    fn sql_predicate_agrees_with_in_memory_predicate() {
        let (db, tag) = seeded();
        let fixtures: [(&str, &[&str]); 6] = [
            ("Read a book", &["doma", "sám", "30–60 min"]),
            ("Run outside", &["venku", "sám", "do 30 min"]),
            ("Board games", &["doma", "s kamarády", "60+ min", "fun"]),
            ("Pay bills", &["doma", "urgent"]),
            ("Picnic", &["venku", "s partnerem", "fun", "urgent"]),
            ("Untagged", &[]),
        ];
        for (text, names) in fixtures {
            let tag_ids = names.iter().map(|name| tag[*name]).collect::<Vec<_>>();
            db.insert_activity(text, &tag_ids).expect("insert");
        }
        db.set_tag_active(tag["s partnerem"], false).expect("deactivate");

        let filters = vec![
            FilterSpec::default(),
            FilterSpec {
                place: ids(&[tag["doma"]]),
                ..FilterSpec::default()
            },
            FilterSpec {
                place: ids(&[tag["doma"], tag["venku"]]),
                company: ids(&[tag["sám"]]),
                ..FilterSpec::default()
            },
            FilterSpec {
                user_tags: ids(&[tag["fun"], tag["urgent"]]),
                ..FilterSpec::default()
            },
            FilterSpec {
                place: ids(&[tag["doma"]]),
                user_tags: ids(&[tag["urgent"]]),
                ..FilterSpec::default()
            },
            FilterSpec {
                duration: ids(&[9_999]),
                ..FilterSpec::default()
            },
        ];

        let mut rng = StdRng::seed_from_u64(42);
        for filter in &filters {
            let expected = (1..=6)
                .filter(|id| {
                    let detail = db.get_activity_detail(*id).expect("detail").expect("exists");
                    is_eligible(&detail.activity, &detail.tags, filter)
                })
                .collect::<Vec<i64>>();
            assert_eq!(db.eligible_activity_ids(filter).expect("ids"), expected, "{:?}", filter);
            assert_eq!(db.count_eligible(filter).expect("count"), expected.len() as u64);

            for _ in 0..20 {
                let picked = db.pick_random_with(filter, &mut rng).expect("pick");
                match picked {
                    Some(activity) => assert!(expected.contains(&activity.id)),
                    None => assert!(expected.is_empty()),
                }
            }
        }
    }

    #[test]
    fn archived_activities_are_never_picked() {
        let (db, _) = seeded();
        let archived = db.insert_activity("Archived", &[]).expect("insert");
        db.conn()
            .expect("lock")
            .execute("UPDATE activities SET is_archived = 1 WHERE id = ?1", [archived.id])
            .expect("archive");

        let mut rng = StdRng::seed_from_u64(3);
        assert!(db.pick_random_with(&FilterSpec::default(), &mut rng).expect("pick").is_none());
    }

    #[test]
    fn picks_are_spread_across_all_eligible_activities() {
        let (db, tag) = seeded();
        let first = db.insert_activity("First", &[tag["doma"]]).expect("first");
        let second = db.insert_activity("Second", &[tag["doma"]]).expect("second");
        db.insert_activity("Elsewhere", &[tag["venku"]]).expect("third");

        let filter = FilterSpec {
            place: ids(&[tag["doma"]]),
            ..FilterSpec::default()
        };
        let mut rng = StdRng::seed_from_u64(11);
        let mut counts: HashMap<i64, usize> = HashMap::new();
        for _ in 0..400 {
            let picked = db.pick_random_with(&filter, &mut rng).expect("pick").expect("some");
            *counts.entry(picked.id).or_default() += 1;
        }
        assert_eq!(counts.len(), 2);
        assert!(counts[&first.id] > 100);
        assert!(counts[&second.id] > 100);
    }
}
