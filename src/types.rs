//! Core types: identifiers, wire items, and the status classifier.

use crate::clock;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque identifier of an item managed by the external service.
///
/// The API reports numeric ids but the controller treats them as opaque
/// strings: they are only ever compared and passed back.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct ItemId(pub String);

impl ItemId {
    /// Create a new ItemId
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the inner string value
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ItemId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ItemId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<i64> for ItemId {
    fn from(id: i64) -> Self {
        Self(id.to_string())
    }
}

// The API is inconsistent about whether ids arrive as numbers or strings,
// so deserialization accepts both.
impl<'de> Deserialize<'de> for ItemId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct IdVisitor;

        impl serde::de::Visitor<'_> for IdVisitor {
            type Value = ItemId;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("a numeric or string item id")
            }

            fn visit_i64<E: serde::de::Error>(self, v: i64) -> Result<ItemId, E> {
                Ok(ItemId(v.to_string()))
            }

            fn visit_u64<E: serde::de::Error>(self, v: u64) -> Result<ItemId, E> {
                Ok(ItemId(v.to_string()))
            }

            fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<ItemId, E> {
                Ok(ItemId(v.to_string()))
            }
        }

        deserializer.deserialize_any(IdVisitor)
    }
}

impl sqlx::Type<sqlx::Sqlite> for ItemId {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <String as sqlx::Type<sqlx::Sqlite>>::type_info()
    }

    fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
        <String as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for ItemId {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <String as sqlx::Encode<sqlx::Sqlite>>::encode(self.0.clone(), buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for ItemId {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let id = <String as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        Ok(Self(id))
    }
}

/// Identifier of a registered user (the auth id of the external account)
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuthId(pub String);

impl AuthId {
    /// Create a new AuthId
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the inner string value
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AuthId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AuthId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl sqlx::Type<sqlx::Sqlite> for AuthId {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <String as sqlx::Type<sqlx::Sqlite>>::type_info()
    }

    fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
        <String as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for AuthId {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <String as sqlx::Encode<sqlx::Sqlite>>::encode(self.0.clone(), buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for AuthId {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let id = <String as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        Ok(Self(id))
    }
}

/// Unique identifier for a tag
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct TagId(pub i64);

impl TagId {
    /// Create a new TagId
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the inner i64 value
    pub fn get(&self) -> i64 {
        self.0
    }
}

impl From<i64> for TagId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl From<TagId> for i64 {
    fn from(id: TagId) -> Self {
        id.0
    }
}

impl std::fmt::Display for TagId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl sqlx::Type<sqlx::Sqlite> for TagId {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <i64 as sqlx::Type<sqlx::Sqlite>>::type_info()
    }

    fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
        <i64 as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for TagId {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        sqlx::Encode::<sqlx::Sqlite>::encode_by_ref(&self.0, buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for TagId {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let id = <i64 as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        Ok(Self(id))
    }
}

/// Unique identifier for an automation rule
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct RuleId(pub i64);

impl RuleId {
    /// Create a new RuleId
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the inner i64 value
    pub fn get(&self) -> i64 {
        self.0
    }
}

impl From<i64> for RuleId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl From<RuleId> for i64 {
    fn from(id: RuleId) -> Self {
        id.0
    }
}

impl std::fmt::Display for RuleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RuleId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

impl sqlx::Type<sqlx::Sqlite> for RuleId {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <i64 as sqlx::Type<sqlx::Sqlite>>::type_info()
    }

    fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
        <i64 as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for RuleId {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        sqlx::Encode::<sqlx::Sqlite>::encode_by_ref(&self.0, buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for RuleId {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let id = <i64 as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        Ok(Self(id))
    }
}

/// Normalize the wire's many boolean spellings (`true`, `1`, `"true"`, null)
/// into a plain bool at the field readers, so nothing downstream has to care.
pub(crate) fn de_truthy<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: serde::Deserializer<'de>,
{
    struct TruthyVisitor;

    impl<'de> serde::de::Visitor<'de> for TruthyVisitor {
        type Value = bool;

        fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            f.write_str("a boolean, number, or boolean-like string")
        }

        fn visit_bool<E: serde::de::Error>(self, v: bool) -> Result<bool, E> {
            Ok(v)
        }

        fn visit_i64<E: serde::de::Error>(self, v: i64) -> Result<bool, E> {
            Ok(v != 0)
        }

        fn visit_u64<E: serde::de::Error>(self, v: u64) -> Result<bool, E> {
            Ok(v != 0)
        }

        fn visit_f64<E: serde::de::Error>(self, v: f64) -> Result<bool, E> {
            Ok(v != 0.0)
        }

        fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<bool, E> {
            Ok(truthy_str(v))
        }

        fn visit_unit<E: serde::de::Error>(self) -> Result<bool, E> {
            Ok(false)
        }

        fn visit_none<E: serde::de::Error>(self) -> Result<bool, E> {
            Ok(false)
        }

        fn visit_some<D>(self, d: D) -> Result<bool, D::Error>
        where
            D: serde::Deserializer<'de>,
        {
            d.deserialize_any(TruthyVisitor)
        }
    }

    deserializer.deserialize_any(TruthyVisitor)
}

/// Truthiness of a string value from the wire or a rule payload
pub(crate) fn truthy_str(v: &str) -> bool {
    matches!(v.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes")
}

/// Deserialize an optional timestamp from the wire's ISO-8601 strings
pub(crate) fn de_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(clock::parse_timestamp))
}

/// A file inside an item, as reported by the API
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct ItemFile {
    /// File name (path within the item)
    #[serde(default)]
    pub name: String,

    /// File size in bytes
    #[serde(default)]
    pub size: i64,
}

/// A unit of work managed by the external service, as fetched for one cycle.
///
/// The controller never owns items: each snapshot is read, diffed against the
/// shadow, and discarded. Boolean fields are normalized at ingress (the API
/// variously reports `true`, `1`, and `"true"`).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Item {
    /// Opaque item identifier
    pub id: ItemId,

    /// Display name
    #[serde(default)]
    pub name: String,

    /// Total size in bytes
    #[serde(default)]
    pub size: i64,

    /// Download progress as a fraction (0.0..=1.0)
    #[serde(default)]
    pub progress: f64,

    /// Live download speed in bytes per second
    #[serde(default)]
    pub download_speed: i64,

    /// Live upload speed in bytes per second
    #[serde(default)]
    pub upload_speed: i64,

    /// Cumulative bytes downloaded
    #[serde(default)]
    pub total_downloaded: i64,

    /// Cumulative bytes uploaded
    #[serde(default)]
    pub total_uploaded: i64,

    /// Seed count
    #[serde(default)]
    pub seeds: i64,

    /// Peer count
    #[serde(default)]
    pub peers: i64,

    /// Share ratio as reported by the API, if present
    #[serde(default)]
    pub ratio: Option<f64>,

    /// Estimated seconds to completion
    #[serde(default)]
    pub eta: i64,

    /// When the item was added
    #[serde(default, deserialize_with = "de_timestamp")]
    pub created_at: Option<DateTime<Utc>>,

    /// When the item became available in the service's cache
    #[serde(default, deserialize_with = "de_timestamp")]
    pub cached_at: Option<DateTime<Utc>>,

    /// When the item will expire from the service
    #[serde(default, deserialize_with = "de_timestamp")]
    pub expires_at: Option<DateTime<Utc>>,

    /// Whether the transfer is active on the service
    #[serde(default, deserialize_with = "de_truthy")]
    pub active: bool,

    /// Whether the item comes from a private tracker
    #[serde(default, deserialize_with = "de_truthy")]
    pub private: bool,

    /// Whether the item is available from the service's cache
    #[serde(default, deserialize_with = "de_truthy")]
    pub cached: bool,

    /// Whether seeding is enabled for this item
    #[serde(default, deserialize_with = "de_truthy")]
    pub seed_torrent: bool,

    /// Whether long-term seeding is enabled
    #[serde(default, deserialize_with = "de_truthy")]
    pub long_term_seeding: bool,

    /// Whether zipped download is allowed
    #[serde(default, deserialize_with = "de_truthy")]
    pub allow_zipped: bool,

    /// Swarm availability as a fraction
    #[serde(default)]
    pub availability: f64,

    /// Tracker host, if known
    #[serde(default)]
    pub tracker: Option<String>,

    /// Files inside the item; absent means not yet resolved
    #[serde(default)]
    pub files: Option<Vec<ItemFile>>,

    /// Raw transfer state label from the service
    #[serde(default)]
    pub download_state: Option<String>,

    /// Whether the finished payload is present on the service
    #[serde(default, deserialize_with = "de_truthy")]
    pub download_present: bool,

    /// Whether the transfer has finished
    #[serde(default, deserialize_with = "de_truthy")]
    pub download_finished: bool,

    /// Set by the client for items returned from the queue endpoint.
    /// Never present on the wire.
    #[serde(skip)]
    pub queued: bool,
}

impl Item {
    /// Share ratio: the API value when present, else derived from the
    /// cumulative totals, else 0.
    pub fn effective_ratio(&self) -> f64 {
        if let Some(ratio) = self.ratio {
            return ratio;
        }
        if self.total_downloaded > 0 {
            self.total_uploaded as f64 / self.total_downloaded as f64
        } else {
            0.0
        }
    }

    /// Number of files; a missing list counts as 0
    pub fn file_count(&self) -> i64 {
        self.files.as_ref().map(|f| f.len() as i64).unwrap_or(0)
    }
}

/// Classified status of an item.
///
/// The classification is part of the observable contract: rules compare
/// against these labels, so both the vocabulary and the classifier's priority
/// order must stay stable across versions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    /// Actively downloading
    Downloading,
    /// Finished and actively uploading to peers
    Uploading,
    /// Finished and seeding
    Seeding,
    /// Waiting in the service's queue
    Queued,
    /// Downloading but making no progress
    Stalled,
    /// Finished and no longer transferring
    Completed,
    /// The transfer failed
    Failed,
    /// Not active and not finished
    Inactive,
    /// Available from the service's cache but never started
    Cached,
}

impl ItemStatus {
    /// Canonical lowercase label, as stored in the shadow table and matched
    /// by `STATUS` rule conditions
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Downloading => "downloading",
            ItemStatus::Uploading => "uploading",
            ItemStatus::Seeding => "seeding",
            ItemStatus::Queued => "queued",
            ItemStatus::Stalled => "stalled",
            ItemStatus::Completed => "completed",
            ItemStatus::Failed => "failed",
            ItemStatus::Inactive => "inactive",
            ItemStatus::Cached => "cached",
        }
    }

    /// Parse a canonical label; unknown labels return None
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "downloading" => Some(ItemStatus::Downloading),
            "uploading" => Some(ItemStatus::Uploading),
            "seeding" => Some(ItemStatus::Seeding),
            "queued" => Some(ItemStatus::Queued),
            "stalled" => Some(ItemStatus::Stalled),
            "completed" => Some(ItemStatus::Completed),
            "failed" => Some(ItemStatus::Failed),
            "inactive" => Some(ItemStatus::Inactive),
            "cached" => Some(ItemStatus::Cached),
            _ => None,
        }
    }

    /// Terminal statuses: the item will not change again and is excluded
    /// from shadow and telemetry
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ItemStatus::Completed | ItemStatus::Failed | ItemStatus::Inactive
        )
    }

    /// Statuses in which download progress is still expected
    pub fn is_downloading_family(&self) -> bool {
        matches!(self, ItemStatus::Downloading | ItemStatus::Stalled)
    }

    /// Statuses in which upload progress is still expected
    pub fn is_uploading_family(&self) -> bool {
        matches!(self, ItemStatus::Seeding | ItemStatus::Uploading)
    }
}

impl std::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify an item into a status label.
///
/// Total and deterministic: every item maps to exactly one status, using a
/// fixed priority over the raw fields. The order below is load-bearing and
/// pinned by a table test; do not reorder:
///
/// 1. queue-endpoint items are `queued`
/// 2. a failed/errored `download_state` is `failed`
/// 3. cached on the service, never started (`!download_present && !active`)
///    is `cached`
/// 4. finished (`download_finished` or `progress >= 1`):
///    `uploading` if active with an uploading state label, `seeding` if
///    active otherwise, else `completed`
/// 5. active but unfinished: `stalled` on a stalled state label or a dry
///    swarm (`seeds == 0`), else `downloading`
/// 6. everything else is `inactive`
pub fn classify(item: &Item) -> ItemStatus {
    if item.queued {
        return ItemStatus::Queued;
    }

    let state = item
        .download_state
        .as_deref()
        .unwrap_or("")
        .to_ascii_lowercase();

    if state.contains("failed") || state.contains("error") {
        return ItemStatus::Failed;
    }

    if item.cached && !item.download_present && !item.active {
        return ItemStatus::Cached;
    }

    let finished = item.download_finished || item.progress >= 1.0;
    if finished {
        if item.active {
            if state.contains("upload") {
                return ItemStatus::Uploading;
            }
            return ItemStatus::Seeding;
        }
        return ItemStatus::Completed;
    }

    if item.active {
        if state.contains("stalled") || item.seeds == 0 {
            return ItemStatus::Stalled;
        }
        return ItemStatus::Downloading;
    }

    ItemStatus::Inactive
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn base_item(id: &str) -> Item {
        Item {
            id: ItemId::from(id),
            name: format!("item-{}", id),
            ..Item::default()
        }
    }

    #[test]
    fn test_item_id_accepts_number_and_string() {
        let from_number: ItemId = serde_json::from_str("42").unwrap();
        let from_string: ItemId = serde_json::from_str("\"42\"").unwrap();
        assert_eq!(from_number, from_string);
        assert_eq!(from_number.as_str(), "42");
    }

    #[test]
    fn test_truthy_normalization_on_wire() {
        let item: Item = serde_json::from_str(
            r#"{"id": 1, "active": "true", "cached": 1, "private": false, "seed_torrent": null}"#,
        )
        .unwrap();
        assert!(item.active);
        assert!(item.cached);
        assert!(!item.private);
        assert!(!item.seed_torrent);
    }

    #[test]
    fn test_wire_timestamps_parse() {
        let item: Item = serde_json::from_str(
            r#"{"id": 1, "created_at": "2026-08-01T09:00:00.000Z", "cached_at": "2026-08-01 10:00:00"}"#,
        )
        .unwrap();
        assert!(item.created_at.is_some());
        assert!(item.cached_at.is_some());
        assert!(item.expires_at.is_none());
    }

    #[test]
    fn test_effective_ratio() {
        let mut item = base_item("1");
        item.ratio = Some(1.5);
        item.total_downloaded = 100;
        item.total_uploaded = 50;
        assert_eq!(item.effective_ratio(), 1.5);

        item.ratio = None;
        assert_eq!(item.effective_ratio(), 0.5);

        item.total_downloaded = 0;
        assert_eq!(item.effective_ratio(), 0.0);
    }

    #[test]
    fn test_file_count_missing_is_zero() {
        let mut item = base_item("1");
        assert_eq!(item.file_count(), 0);
        item.files = Some(vec![]);
        assert_eq!(item.file_count(), 0);
        item.files = Some(vec![ItemFile::default(), ItemFile::default()]);
        assert_eq!(item.file_count(), 2);
    }

    #[test]
    fn test_status_labels_round_trip() {
        for status in [
            ItemStatus::Downloading,
            ItemStatus::Uploading,
            ItemStatus::Seeding,
            ItemStatus::Queued,
            ItemStatus::Stalled,
            ItemStatus::Completed,
            ItemStatus::Failed,
            ItemStatus::Inactive,
            ItemStatus::Cached,
        ] {
            assert_eq!(ItemStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ItemStatus::parse("paused"), None);
    }

    // Golden-master table for the classifier. The expectations encode the
    // priority order documented on `classify`; a change here is a breaking
    // change for every stored rule that matches on STATUS.
    #[test]
    fn test_classifier_golden_master() {
        struct Case {
            name: &'static str,
            item: Item,
            expected: ItemStatus,
        }

        let cases = vec![
            Case {
                name: "queue endpoint wins over everything",
                item: Item {
                    queued: true,
                    active: true,
                    download_state: Some("failed".into()),
                    ..base_item("1")
                },
                expected: ItemStatus::Queued,
            },
            Case {
                name: "failed state label",
                item: Item {
                    download_state: Some("failed (tracker)".into()),
                    active: true,
                    ..base_item("2")
                },
                expected: ItemStatus::Failed,
            },
            Case {
                name: "error state label",
                item: Item {
                    download_state: Some("Error".into()),
                    ..base_item("3")
                },
                expected: ItemStatus::Failed,
            },
            Case {
                name: "cached never started",
                item: Item {
                    cached: true,
                    ..base_item("4")
                },
                expected: ItemStatus::Cached,
            },
            Case {
                name: "finished active uploading label",
                item: Item {
                    download_finished: true,
                    download_present: true,
                    active: true,
                    download_state: Some("uploading".into()),
                    ..base_item("5")
                },
                expected: ItemStatus::Uploading,
            },
            Case {
                name: "finished active defaults to seeding",
                item: Item {
                    download_finished: true,
                    download_present: true,
                    active: true,
                    seeds: 3,
                    ..base_item("6")
                },
                expected: ItemStatus::Seeding,
            },
            Case {
                name: "progress 1.0 counts as finished",
                item: Item {
                    progress: 1.0,
                    active: true,
                    ..base_item("7")
                },
                expected: ItemStatus::Seeding,
            },
            Case {
                name: "finished inactive is completed",
                item: Item {
                    download_finished: true,
                    download_present: true,
                    ..base_item("8")
                },
                expected: ItemStatus::Completed,
            },
            Case {
                name: "active with stalled label",
                item: Item {
                    active: true,
                    seeds: 5,
                    progress: 0.4,
                    download_state: Some("stalled (no seeds)".into()),
                    ..base_item("9")
                },
                expected: ItemStatus::Stalled,
            },
            Case {
                name: "active dry swarm is stalled",
                item: Item {
                    active: true,
                    seeds: 0,
                    progress: 0.4,
                    download_state: Some("downloading".into()),
                    ..base_item("10")
                },
                expected: ItemStatus::Stalled,
            },
            Case {
                name: "active with seeds is downloading",
                item: Item {
                    active: true,
                    seeds: 12,
                    progress: 0.4,
                    download_state: Some("downloading".into()),
                    ..base_item("11")
                },
                expected: ItemStatus::Downloading,
            },
            Case {
                name: "nothing set is inactive",
                item: base_item("12"),
                expected: ItemStatus::Inactive,
            },
            Case {
                name: "cached but present falls through to completed",
                item: Item {
                    cached: true,
                    download_present: true,
                    download_finished: true,
                    ..base_item("13")
                },
                expected: ItemStatus::Completed,
            },
        ];

        for case in cases {
            assert_eq!(classify(&case.item), case.expected, "{}", case.name);
        }
    }

    #[test]
    fn test_terminal_set() {
        assert!(ItemStatus::Completed.is_terminal());
        assert!(ItemStatus::Failed.is_terminal());
        assert!(ItemStatus::Inactive.is_terminal());
        for status in [
            ItemStatus::Downloading,
            ItemStatus::Uploading,
            ItemStatus::Seeding,
            ItemStatus::Queued,
            ItemStatus::Stalled,
            ItemStatus::Cached,
        ] {
            assert!(!status.is_terminal(), "{status} must not be terminal");
        }
    }
}
