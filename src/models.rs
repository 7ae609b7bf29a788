use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Tags seeded at startup: place x2, company x3, duration x3.
pub const DEFAULT_TAGS: [(&str, TagCategory); 8] = [
    ("doma", TagCategory::Place),
    ("venku", TagCategory::Place),
    ("sám", TagCategory::Company),
    ("s kamarády", TagCategory::Company),
    ("s partnerem", TagCategory::Company),
    ("do 30 min", TagCategory::Duration),
    ("30–60 min", TagCategory::Duration),
    ("60+ min", TagCategory::Duration),
];

/// Fixed system categories plus the free-form bucket used by user tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TagCategory {
    Place,
    Company,
    Duration,
    Uncategorized,
}

impl TagCategory {
    /// Persisted column value; user tags are stored with a NULL category.
    pub fn as_db_value(self) -> Option<&'static str> {
        match self {
            Self::Place => Some("place"),
            Self::Company => Some("company"),
            Self::Duration => Some("duration"),
            Self::Uncategorized => None,
        }
    }

    pub fn from_db_value(raw: Option<&str>) -> Option<Self> {
        match raw {
            None => Some(Self::Uncategorized),
            Some("place") => Some(Self::Place),
            Some("company") => Some(Self::Company),
            Some("duration") => Some(Self::Duration),
            Some(_) => None,
        }
    }

    pub fn is_system(self) -> bool {
        !matches!(self, Self::Uncategorized)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    pub id: i64,
    pub text: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
    pub is_archived: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tag {
    pub id: i64,
    pub name: String,
    pub category: TagCategory,
    pub is_default: bool,
    pub is_active: bool,
}

impl Tag {
    pub fn is_system(&self) -> bool {
        self.category.is_system()
    }

    /// A deactivated system tag hides every activity carrying it.
    pub fn hides_activities(&self) -> bool {
        self.is_system() && !self.is_active
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityDetail {
    pub activity: Activity,
    pub tags: Vec<Tag>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListActivitiesFilters {
    pub hide_inactive_system_tagged: bool,
    pub search: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl ListActivitiesFilters {
    pub fn visible() -> Self {
        Self {
            hide_inactive_system_tagged: true,
            ..Self::default()
        }
    }

    pub fn any_status() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListTagsFilters {
    pub include_inactive: bool,
    pub category: Option<TagCategory>,
    pub system_only: bool,
}

impl ListTagsFilters {
    pub fn active() -> Self {
        Self::default()
    }

    pub fn all() -> Self {
        Self {
            include_inactive: true,
            ..Self::default()
        }
    }
}
