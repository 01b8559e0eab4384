//! MongoDB 账户与通话记录存储
//!
//! 账户集合：`users`（工作人员）、`pilgrims`；通话记录集合：`call_histories`。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::bson::{Bson, DateTime as BsonDateTime, Document, doc, oid::ObjectId};
use mongodb::options::{FindOneAndUpdateOptions, FindOptions, ReturnDocument};
use mongodb::{Client, Collection, Database, IndexModel};
use pilgrim_core::error::{ErrorBuilder, ErrorCode, InfraResultExt, PilgrimError, Result};
use pilgrim_core::utils::millis_to_datetime;
use tracing::{debug, info};

use crate::domain::model::{AccountRecord, CallRecord, CallStatus, CallTransition, CallType};
use crate::domain::repository::{AccountStore, CallRecordRepository};
use crate::domain::value_object::{CallId, UserId};

pub async fn connect_database(url: &str, database: &str) -> Result<Database> {
    let client = Client::with_uri_str(url)
        .await
        .into_pilgrim(ErrorCode::ServiceUnavailable, "failed to connect mongodb")?;
    info!(database = %database, "mongodb client initialised");
    Ok(client.database(database))
}

/// 标识能解析为 ObjectId 时按 ObjectId 存取，否则按字符串
fn id_bson(raw: &str) -> Bson {
    ObjectId::parse_str(raw)
        .map(Bson::ObjectId)
        .unwrap_or_else(|_| Bson::String(raw.to_string()))
}

fn bson_to_id(value: Option<&Bson>) -> Option<String> {
    match value {
        Some(Bson::ObjectId(oid)) => Some(oid.to_hex()),
        Some(Bson::String(s)) => Some(s.clone()),
        _ => None,
    }
}

fn bson_datetime(value: Option<&Bson>) -> Option<DateTime<Utc>> {
    match value {
        Some(Bson::DateTime(dt)) => millis_to_datetime(dt.timestamp_millis()),
        _ => None,
    }
}

fn bson_u64(value: Option<&Bson>) -> u64 {
    match value {
        Some(Bson::Int32(v)) => u64::try_from(*v).unwrap_or(0),
        Some(Bson::Int64(v)) => u64::try_from(*v).unwrap_or(0),
        Some(Bson::Double(v)) if *v > 0.0 => *v as u64,
        _ => 0,
    }
}

fn to_bson_datetime(at: DateTime<Utc>) -> BsonDateTime {
    BsonDateTime::from_millis(at.timestamp_millis())
}

fn optional_str(doc: &Document, key: &str) -> Option<String> {
    doc.get_str(key)
        .ok()
        .map(str::to_string)
        .filter(|s| !s.is_empty())
}

pub struct MongoAccountStore {
    collection: Collection<Document>,
}

impl MongoAccountStore {
    pub fn new(database: &Database, collection: &str) -> Self {
        Self {
            collection: database.collection::<Document>(collection),
        }
    }
}

#[async_trait]
impl AccountStore for MongoAccountStore {
    async fn find_account(&self, user_id: &UserId) -> Result<Option<AccountRecord>> {
        let found = self
            .collection
            .find_one(doc! { "_id": id_bson(user_id.as_str()) }, None)
            .await
            .into_pilgrim(ErrorCode::PersistenceError, "account lookup failed")?;

        Ok(found.map(|doc| AccountRecord {
            full_name: optional_str(&doc, "full_name"),
            role: optional_str(&doc, "role").or_else(|| optional_str(&doc, "user_type")),
            push_token: optional_str(&doc, "fcm_token"),
            is_online: doc.get_bool("is_online").unwrap_or(false),
            last_active_at: bson_datetime(doc.get("last_active_at")),
        }))
    }

    async fn set_presence(
        &self,
        user_id: &UserId,
        online: bool,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let result = self
            .collection
            .update_one(
                doc! { "_id": id_bson(user_id.as_str()) },
                doc! { "$set": { "is_online": online, "last_active_at": to_bson_datetime(at) } },
                None,
            )
            .await
            .into_pilgrim(ErrorCode::PersistenceError, "presence update failed")?;

        if result.matched_count == 0 {
            debug!(user_id = %user_id, "presence update matched no account");
        }
        Ok(())
    }
}

pub struct MongoCallRecordRepository {
    collection: Collection<Document>,
}

impl MongoCallRecordRepository {
    pub fn new(database: &Database, collection: &str) -> Self {
        Self {
            collection: database.collection::<Document>(collection),
        }
    }

    /// 历史查询按 (主叫|被叫, 创建时间倒序) 走索引
    pub async fn ensure_indexes(&self) -> Result<()> {
        let indexes = vec![
            IndexModel::builder()
                .keys(doc! { "caller_id": 1, "createdAt": -1 })
                .build(),
            IndexModel::builder()
                .keys(doc! { "receiver_id": 1, "createdAt": -1 })
                .build(),
        ];
        self.collection
            .create_indexes(indexes, None)
            .await
            .into_pilgrim(ErrorCode::PersistenceError, "failed to create call indexes")?;
        Ok(())
    }

    fn unread_missed_filter(user_id: &UserId) -> Document {
        doc! {
            "receiver_id": id_bson(user_id.as_str()),
            "status": CallStatus::Missed.as_str(),
            "is_read": false,
        }
    }
}

fn malformed(field: &str) -> PilgrimError {
    ErrorBuilder::new(ErrorCode::PersistenceError, "malformed call record")
        .details(format!("missing or invalid field `{field}`"))
        .build_error()
}

fn record_from_document(doc: &Document) -> Result<CallRecord> {
    let id = bson_to_id(doc.get("_id")).ok_or_else(|| malformed("_id"))?;
    let caller_id = bson_to_id(doc.get("caller_id"))
        .and_then(|raw| UserId::parse(&raw))
        .ok_or_else(|| malformed("caller_id"))?;
    let receiver_id = bson_to_id(doc.get("receiver_id"))
        .and_then(|raw| UserId::parse(&raw))
        .ok_or_else(|| malformed("receiver_id"))?;
    let status = doc
        .get_str("status")
        .ok()
        .and_then(CallStatus::parse)
        .ok_or_else(|| malformed("status"))?;
    let created_at = bson_datetime(doc.get("createdAt")).ok_or_else(|| malformed("createdAt"))?;

    Ok(CallRecord {
        id: CallId::from_string(id),
        caller_id,
        receiver_id,
        call_type: CallType::Internet,
        status,
        started_at: bson_datetime(doc.get("started_at")),
        ended_at: bson_datetime(doc.get("ended_at")),
        duration: bson_u64(doc.get("duration")),
        is_read: doc.get_bool("is_read").unwrap_or(false),
        created_at,
    })
}

#[async_trait]
impl CallRecordRepository for MongoCallRecordRepository {
    async fn create(
        &self,
        caller_id: &UserId,
        receiver_id: &UserId,
        at: DateTime<Utc>,
    ) -> Result<CallId> {
        let oid = ObjectId::new();
        let record = doc! {
            "_id": oid,
            "caller_id": id_bson(caller_id.as_str()),
            "receiver_id": id_bson(receiver_id.as_str()),
            "call_type": CallType::Internet.as_str(),
            "status": CallStatus::Ringing.as_str(),
            "duration": 0_i64,
            "started_at": Bson::Null,
            "ended_at": Bson::Null,
            "is_read": false,
            "createdAt": to_bson_datetime(at),
            "updatedAt": to_bson_datetime(at),
        };
        self.collection
            .insert_one(record, None)
            .await
            .into_pilgrim(ErrorCode::PersistenceError, "call record create failed")?;
        Ok(CallId::from_string(oid.to_hex()))
    }

    async fn transition(&self, id: &CallId, transition: CallTransition) -> Result<CallRecord> {
        let mut set = doc! {
            "status": transition.status.as_str(),
            "updatedAt": to_bson_datetime(Utc::now()),
        };
        if let Some(started_at) = transition.started_at {
            set.insert("started_at", to_bson_datetime(started_at));
        }
        if let Some(ended_at) = transition.ended_at {
            set.insert("ended_at", to_bson_datetime(ended_at));
        }
        if let Some(duration) = transition.duration {
            set.insert("duration", i64::try_from(duration).unwrap_or(i64::MAX));
        }

        let allowed: Vec<&str> = transition
            .status
            .predecessors()
            .iter()
            .map(CallStatus::as_str)
            .collect();
        let filter = doc! { "_id": id_bson(id.as_str()), "status": { "$in": allowed } };
        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build();

        let updated = self
            .collection
            .find_one_and_update(filter, doc! { "$set": set }, options)
            .await
            .into_pilgrim(ErrorCode::PersistenceError, "call record update failed")?;

        match updated {
            Some(doc) => record_from_document(&doc),
            None => match self.get(id).await? {
                Some(current) => Err(ErrorBuilder::new(
                    ErrorCode::InvalidStateTransition,
                    "call record transition rejected",
                )
                .details(format!("{}: {} -> {}", id, current.status, transition.status))
                .build_error()),
                None => Err(PilgrimError::new(
                    ErrorCode::NotFound,
                    format!("call record {id} not found"),
                )),
            },
        }
    }

    async fn get(&self, id: &CallId) -> Result<Option<CallRecord>> {
        let found = self
            .collection
            .find_one(doc! { "_id": id_bson(id.as_str()) }, None)
            .await
            .into_pilgrim(ErrorCode::PersistenceError, "call record lookup failed")?;
        found.as_ref().map(record_from_document).transpose()
    }

    async fn list_for_user(&self, user_id: &UserId, limit: usize) -> Result<Vec<CallRecord>> {
        let id = id_bson(user_id.as_str());
        let filter = doc! { "$or": [ { "caller_id": id.clone() }, { "receiver_id": id } ] };
        let options = FindOptions::builder()
            .sort(doc! { "createdAt": -1 })
            .limit(i64::try_from(limit).unwrap_or(i64::MAX))
            .build();

        let docs: Vec<Document> = self
            .collection
            .find(filter, options)
            .await
            .into_pilgrim(ErrorCode::PersistenceError, "call history query failed")?
            .try_collect()
            .await
            .into_pilgrim(ErrorCode::PersistenceError, "call history cursor failed")?;

        docs.iter().map(record_from_document).collect()
    }

    async fn count_unread_missed(&self, user_id: &UserId) -> Result<u64> {
        self.collection
            .count_documents(Self::unread_missed_filter(user_id), None)
            .await
            .into_pilgrim(ErrorCode::PersistenceError, "missed call count failed")
    }

    async fn mark_missed_read(&self, user_id: &UserId) -> Result<u64> {
        let result = self
            .collection
            .update_many(
                Self::unread_missed_filter(user_id),
                doc! { "$set": { "is_read": true } },
                None,
            )
            .await
            .into_pilgrim(ErrorCode::PersistenceError, "mark missed calls read failed")?;
        Ok(result.modified_count)
    }
}
