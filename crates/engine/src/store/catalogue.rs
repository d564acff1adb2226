//! Catalogue Store (C7, §4.7): upserts extracted products and offers keyed
//! by (oem_id, external_key), version history and change-event emission.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use oemwatch_common::ids::{OemId, OfferId, OfferVersionId, ProductId, ProductVersionId};
use oemwatch_common::types::{
    Availability, ChangeEvent, ChangeEventType, CtaLink, EntityKind, KeyFeature, Offer, Price,
    Product, Severity, VariantDescriptor,
};

use super::StoreError;
use crate::hashdiff::{
    assign_offer_event, assign_product_event, canonicalize_offer, canonicalize_product,
    content_hash, diff_values,
};

/// Semantic fields an extractor produces for one product, before the store
/// assigns identity and version bookkeeping.
#[derive(Clone, Debug)]
pub struct ProductCandidate {
    pub external_key: String,
    pub title: String,
    pub subtitle: Option<String>,
    pub body_type: Option<String>,
    pub fuel_type: Option<String>,
    pub availability: Availability,
    pub price: Option<Price>,
    pub key_features: Vec<KeyFeature>,
    pub variants: Vec<VariantDescriptor>,
    pub cta_links: Vec<CtaLink>,
    pub meta: HashMap<String, Value>,
}

#[derive(Clone, Debug)]
pub struct OfferCandidate {
    pub external_key: String,
    pub offer_type: String,
    pub applicable_models: Vec<String>,
    pub validity_start: Option<DateTime<Utc>>,
    pub validity_end: Option<DateTime<Utc>>,
    pub saving_amount: Option<Price>,
    pub meta: HashMap<String, Value>,
}

/// Outcome of one upsert call; callers use this to bump ImportRun counters
/// and decide whether an event needs downstream dispatch.
pub enum UpsertOutcome {
    Created(ChangeEvent),
    Updated(ChangeEvent),
    Unchanged,
}

pub struct CatalogueStore {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct ProductRow {
    id: Uuid,
    external_key: String,
    title: String,
    subtitle: Option<String>,
    body_type: Option<String>,
    fuel_type: Option<String>,
    availability: String,
    price: Option<Value>,
    key_features: Value,
    variants: Value,
    cta_links: Value,
    meta: Value,
    content_hash: String,
    first_seen_at: DateTime<Utc>,
    last_seen_at: DateTime<Utc>,
}

impl ProductRow {
    fn into_domain(self, oem_id: OemId) -> Product {
        Product {
            id: ProductId::from_uuid(self.id),
            oem_id,
            external_key: self.external_key,
            title: self.title,
            subtitle: self.subtitle,
            body_type: self.body_type,
            fuel_type: self.fuel_type,
            availability: Availability::from_db_str(&self.availability),
            price: self.price.and_then(|v| serde_json::from_value(v).ok()),
            key_features: serde_json::from_value(self.key_features).unwrap_or_default(),
            variants: serde_json::from_value(self.variants).unwrap_or_default(),
            cta_links: serde_json::from_value(self.cta_links).unwrap_or_default(),
            meta: serde_json::from_value(self.meta).unwrap_or_default(),
            content_hash: self.content_hash,
            first_seen_at: self.first_seen_at,
            last_seen_at: self.last_seen_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct OfferRow {
    id: Uuid,
    external_key: String,
    offer_type: String,
    applicable_models: Value,
    validity_start: Option<DateTime<Utc>>,
    validity_end: Option<DateTime<Utc>>,
    saving_amount: Option<Value>,
    meta: Value,
    content_hash: String,
    first_seen_at: DateTime<Utc>,
    last_seen_at: DateTime<Utc>,
}

impl OfferRow {
    fn into_domain(self, oem_id: OemId) -> Offer {
        Offer {
            id: OfferId::from_uuid(self.id),
            oem_id,
            external_key: self.external_key,
            offer_type: self.offer_type,
            applicable_models: serde_json::from_value(self.applicable_models).unwrap_or_default(),
            validity_start: self.validity_start,
            validity_end: self.validity_end,
            saving_amount: self.saving_amount.and_then(|v| serde_json::from_value(v).ok()),
            meta: serde_json::from_value(self.meta).unwrap_or_default(),
            content_hash: self.content_hash,
            first_seen_at: self.first_seen_at,
            last_seen_at: self.last_seen_at,
        }
    }
}

fn placeholder_product(oem_id: OemId, c: &ProductCandidate, now: DateTime<Utc>) -> Product {
    Product {
        id: ProductId::new(),
        oem_id,
        external_key: c.external_key.clone(),
        title: c.title.clone(),
        subtitle: c.subtitle.clone(),
        body_type: c.body_type.clone(),
        fuel_type: c.fuel_type.clone(),
        availability: c.availability,
        price: c.price.clone(),
        key_features: c.key_features.clone(),
        variants: c.variants.clone(),
        cta_links: c.cta_links.clone(),
        meta: c.meta.clone(),
        content_hash: String::new(),
        first_seen_at: now,
        last_seen_at: now,
    }
}

fn placeholder_offer(oem_id: OemId, c: &OfferCandidate, now: DateTime<Utc>) -> Offer {
    Offer {
        id: OfferId::new(),
        oem_id,
        external_key: c.external_key.clone(),
        offer_type: c.offer_type.clone(),
        applicable_models: c.applicable_models.clone(),
        validity_start: c.validity_start,
        validity_end: c.validity_end,
        saving_amount: c.saving_amount.clone(),
        meta: c.meta.clone(),
        content_hash: String::new(),
        first_seen_at: now,
        last_seen_at: now,
    }
}

impl CatalogueStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert or refresh a product by (oem_id, external_key) (§4.7): a
    /// missing row gets inserted with a `created` event; an unchanged
    /// content hash only touches `last_seen_at`; a changed hash writes a new
    /// version row and a diffed event. All three paths commit atomically.
    pub async fn upsert_product(
        &self,
        oem_id: &OemId,
        candidate: ProductCandidate,
        critical_fields: &[String],
    ) -> Result<(ProductId, UpsertOutcome), StoreError> {
        let mut tx = self.pool.begin().await.map_err(|e| StoreError::Query(e.to_string()))?;

        let existing: Option<ProductRow> = sqlx::query_as(
            "SELECT * FROM products WHERE oem_id = $1 AND external_key = $2 FOR UPDATE",
        )
        .bind(oem_id.as_str())
        .bind(&candidate.external_key)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        let now = Utc::now();
        let draft = placeholder_product(oem_id.clone(), &candidate, now);
        let canonical = canonicalize_product(&draft);
        let new_hash = content_hash(&canonical);

        let (product_id, outcome) = match existing {
            None => {
                let product_id = ProductId::new();
                sqlx::query(
                    "INSERT INTO products
                        (id, oem_id, external_key, title, subtitle, body_type, fuel_type,
                         availability, price, key_features, variants, cta_links, meta,
                         content_hash, first_seen_at, last_seen_at)
                     VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$15)",
                )
                .bind(product_id.0)
                .bind(oem_id.as_str())
                .bind(&candidate.external_key)
                .bind(&candidate.title)
                .bind(&candidate.subtitle)
                .bind(&candidate.body_type)
                .bind(&candidate.fuel_type)
                .bind(candidate.availability.as_db_str())
                .bind(serde_json::to_value(&candidate.price).unwrap_or(Value::Null))
                .bind(serde_json::to_value(&candidate.key_features).unwrap_or(Value::Null))
                .bind(serde_json::to_value(&candidate.variants).unwrap_or(Value::Null))
                .bind(serde_json::to_value(&candidate.cta_links).unwrap_or(Value::Null))
                .bind(serde_json::to_value(&candidate.meta).unwrap_or(Value::Null))
                .bind(&new_hash)
                .bind(now)
                .execute(&mut *tx)
                .await
                .map_err(|e| StoreError::Query(e.to_string()))?;

                insert_product_version(&mut tx, product_id, &new_hash, &canonical, now).await?;

                let event = ChangeEvent::new(
                    oem_id.clone(),
                    EntityKind::Product,
                    Some(product_id.0),
                    ChangeEventType::Created,
                    Severity::Medium,
                    format!("{} added to catalogue", candidate.title),
                    HashMap::new(),
                );
                insert_change_event(&mut tx, &event).await?;

                (product_id, UpsertOutcome::Created(event))
            }
            Some(row) => {
                let product_id = ProductId::from_uuid(row.id);
                if row.content_hash == new_hash {
                    sqlx::query("UPDATE products SET last_seen_at = $1 WHERE id = $2")
                        .bind(now)
                        .bind(row.id)
                        .execute(&mut *tx)
                        .await
                        .map_err(|e| StoreError::Query(e.to_string()))?;
                    (product_id, UpsertOutcome::Unchanged)
                } else {
                    let previous = canonicalize_product(&row.into_domain(oem_id.clone()));
                    let diff = diff_values(&previous, &canonical);
                    let (event_type, severity) = assign_product_event(&diff, critical_fields);

                    sqlx::query(
                        "UPDATE products SET title = $1, subtitle = $2, body_type = $3,
                            fuel_type = $4, availability = $5, price = $6, key_features = $7,
                            variants = $8, cta_links = $9, meta = $10, content_hash = $11,
                            last_seen_at = $12
                         WHERE id = $13",
                    )
                    .bind(&candidate.title)
                    .bind(&candidate.subtitle)
                    .bind(&candidate.body_type)
                    .bind(&candidate.fuel_type)
                    .bind(candidate.availability.as_db_str())
                    .bind(serde_json::to_value(&candidate.price).unwrap_or(Value::Null))
                    .bind(serde_json::to_value(&candidate.key_features).unwrap_or(Value::Null))
                    .bind(serde_json::to_value(&candidate.variants).unwrap_or(Value::Null))
                    .bind(serde_json::to_value(&candidate.cta_links).unwrap_or(Value::Null))
                    .bind(serde_json::to_value(&candidate.meta).unwrap_or(Value::Null))
                    .bind(&new_hash)
                    .bind(now)
                    .bind(row.id)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| StoreError::Query(e.to_string()))?;

                    insert_product_version(&mut tx, product_id, &new_hash, &canonical, now).await?;

                    let event = ChangeEvent::new(
                        oem_id.clone(),
                        EntityKind::Product,
                        Some(product_id.0),
                        event_type,
                        severity,
                        format!("{} changed", candidate.title),
                        diff,
                    );
                    insert_change_event(&mut tx, &event).await?;

                    (product_id, UpsertOutcome::Updated(event))
                }
            }
        };

        tx.commit().await.map_err(|e| StoreError::Query(e.to_string()))?;
        Ok((product_id, outcome))
    }

    /// Offer analogue of `upsert_product` (§4.7).
    pub async fn upsert_offer(
        &self,
        oem_id: &OemId,
        candidate: OfferCandidate,
        critical_fields: &[String],
    ) -> Result<(OfferId, UpsertOutcome), StoreError> {
        let mut tx = self.pool.begin().await.map_err(|e| StoreError::Query(e.to_string()))?;

        let existing: Option<OfferRow> = sqlx::query_as(
            "SELECT * FROM offers WHERE oem_id = $1 AND external_key = $2 FOR UPDATE",
        )
        .bind(oem_id.as_str())
        .bind(&candidate.external_key)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        let now = Utc::now();
        let draft = placeholder_offer(oem_id.clone(), &candidate, now);
        let canonical = canonicalize_offer(&draft);
        let new_hash = content_hash(&canonical);

        let (offer_id, outcome) = match existing {
            None => {
                let offer_id = OfferId::new();
                sqlx::query(
                    "INSERT INTO offers
                        (id, oem_id, external_key, offer_type, applicable_models,
                         validity_start, validity_end, saving_amount, meta, content_hash,
                         first_seen_at, last_seen_at)
                     VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$11)",
                )
                .bind(offer_id.0)
                .bind(oem_id.as_str())
                .bind(&candidate.external_key)
                .bind(&candidate.offer_type)
                .bind(serde_json::to_value(&candidate.applicable_models).unwrap_or(Value::Null))
                .bind(candidate.validity_start)
                .bind(candidate.validity_end)
                .bind(serde_json::to_value(&candidate.saving_amount).unwrap_or(Value::Null))
                .bind(serde_json::to_value(&candidate.meta).unwrap_or(Value::Null))
                .bind(&new_hash)
                .bind(now)
                .execute(&mut *tx)
                .await
                .map_err(|e| StoreError::Query(e.to_string()))?;

                insert_offer_version(&mut tx, offer_id, &new_hash, &canonical, now).await?;

                let event = ChangeEvent::new(
                    oem_id.clone(),
                    EntityKind::Offer,
                    Some(offer_id.0),
                    ChangeEventType::Created,
                    Severity::Medium,
                    format!("offer {} added", candidate.external_key),
                    HashMap::new(),
                );
                insert_change_event(&mut tx, &event).await?;

                (offer_id, UpsertOutcome::Created(event))
            }
            Some(row) => {
                let offer_id = OfferId::from_uuid(row.id);
                if row.content_hash == new_hash {
                    sqlx::query("UPDATE offers SET last_seen_at = $1 WHERE id = $2")
                        .bind(now)
                        .bind(row.id)
                        .execute(&mut *tx)
                        .await
                        .map_err(|e| StoreError::Query(e.to_string()))?;
                    (offer_id, UpsertOutcome::Unchanged)
                } else {
                    let previous = canonicalize_offer(&row.into_domain(oem_id.clone()));
                    let diff = diff_values(&previous, &canonical);
                    let (event_type, severity) = assign_offer_event(&diff, critical_fields);

                    sqlx::query(
                        "UPDATE offers SET offer_type = $1, applicable_models = $2,
                            validity_start = $3, validity_end = $4, saving_amount = $5,
                            meta = $6, content_hash = $7, last_seen_at = $8
                         WHERE id = $9",
                    )
                    .bind(&candidate.offer_type)
                    .bind(serde_json::to_value(&candidate.applicable_models).unwrap_or(Value::Null))
                    .bind(candidate.validity_start)
                    .bind(candidate.validity_end)
                    .bind(serde_json::to_value(&candidate.saving_amount).unwrap_or(Value::Null))
                    .bind(serde_json::to_value(&candidate.meta).unwrap_or(Value::Null))
                    .bind(&new_hash)
                    .bind(now)
                    .bind(row.id)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| StoreError::Query(e.to_string()))?;

                    insert_offer_version(&mut tx, offer_id, &new_hash, &canonical, now).await?;

                    let event = ChangeEvent::new(
                        oem_id.clone(),
                        EntityKind::Offer,
                        Some(offer_id.0),
                        event_type,
                        severity,
                        format!("offer {} changed", candidate.external_key),
                        diff,
                    );
                    insert_change_event(&mut tx, &event).await?;

                    (offer_id, UpsertOutcome::Updated(event))
                }
            }
        };

        tx.commit().await.map_err(|e| StoreError::Query(e.to_string()))?;
        Ok((offer_id, outcome))
    }

    /// Removal reconciliation at ImportRun end (§4.7): products not touched
    /// since `run_started_at - grace_secs` are not present on the site
    /// anymore. History is append-only, so nothing is deleted — the product
    /// is marked `discontinued` and a `removed` event is emitted, both in
    /// the same transaction so a crash can never leave one without the
    /// other.
    pub async fn emit_removed_products(
        &self,
        oem_id: &OemId,
        run_started_at: DateTime<Utc>,
        grace_secs: i64,
    ) -> Result<Vec<ChangeEvent>, StoreError> {
        let cutoff = run_started_at - chrono::Duration::seconds(grace_secs);
        let stale: Vec<(Uuid, String)> = sqlx::query_as(
            "SELECT id, title FROM products WHERE oem_id = $1 AND last_seen_at < $2 AND availability != $3",
        )
        .bind(oem_id.as_str())
        .bind(cutoff)
        .bind(Availability::Discontinued.as_db_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        let mut events = Vec::with_capacity(stale.len());
        for (id, title) in stale {
            let event = ChangeEvent::new(
                oem_id.clone(),
                EntityKind::Product,
                Some(id),
                ChangeEventType::Removed,
                Severity::High,
                format!("{title} no longer listed"),
                HashMap::new(),
            );
            let mut tx = self.pool.begin().await.map_err(|e| StoreError::Query(e.to_string()))?;
            sqlx::query("UPDATE products SET availability = $1 WHERE id = $2")
                .bind(Availability::Discontinued.as_db_str())
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(|e| StoreError::Query(e.to_string()))?;
            insert_change_event(&mut tx, &event).await?;
            tx.commit().await.map_err(|e| StoreError::Query(e.to_string()))?;
            events.push(event);
        }
        Ok(events)
    }
}

async fn insert_product_version(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    product_id: ProductId,
    content_hash: &str,
    snapshot: &Value,
    captured_at: DateTime<Utc>,
) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO product_versions (id, product_id, content_hash, captured_at, snapshot)
         VALUES ($1, $2, $3, $4, $5)
         ON CONFLICT (product_id, content_hash) DO NOTHING",
    )
    .bind(ProductVersionId::new().0)
    .bind(product_id.0)
    .bind(content_hash)
    .bind(captured_at)
    .bind(snapshot)
    .execute(&mut **tx)
    .await
    .map_err(|e| StoreError::Query(e.to_string()))?;
    Ok(())
}

async fn insert_offer_version(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    offer_id: OfferId,
    content_hash: &str,
    snapshot: &Value,
    captured_at: DateTime<Utc>,
) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO offer_versions (id, offer_id, content_hash, captured_at, snapshot)
         VALUES ($1, $2, $3, $4, $5)
         ON CONFLICT (offer_id, content_hash) DO NOTHING",
    )
    .bind(OfferVersionId::new().0)
    .bind(offer_id.0)
    .bind(content_hash)
    .bind(captured_at)
    .bind(snapshot)
    .execute(&mut **tx)
    .await
    .map_err(|e| StoreError::Query(e.to_string()))?;
    Ok(())
}

async fn insert_change_event(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    event: &ChangeEvent,
) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO change_events
            (id, oem_id, entity_type, entity_id, event_type, severity, summary, diff, created_at)
         VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9)",
    )
    .bind(event.id.0)
    .bind(event.oem_id.as_str())
    .bind(event.entity_type.as_db_str())
    .bind(event.entity_id)
    .bind(event.event_type.as_db_str())
    .bind(event.severity.as_db_str())
    .bind(&event.summary)
    .bind(serde_json::to_value(&event.diff).unwrap_or(Value::Null))
    .bind(event.created_at)
    .execute(&mut **tx)
    .await
    .map_err(|e| StoreError::Query(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_product_canonicalizes_deterministically() {
        let candidate = ProductCandidate {
            external_key: "ranger-xlt".into(),
            title: "Ranger XLT".into(),
            subtitle: None,
            body_type: Some("ute".into()),
            fuel_type: Some("diesel".into()),
            availability: Availability::Available,
            price: None,
            key_features: vec![],
            variants: vec![],
            cta_links: vec![],
            meta: HashMap::new(),
        };
        let now = Utc::now();
        let a = placeholder_product(OemId::new("ford"), &candidate, now);
        let b = placeholder_product(OemId::new("ford"), &candidate, now);
        assert_eq!(content_hash(&canonicalize_product(&a)), content_hash(&canonicalize_product(&b)));
    }
}
