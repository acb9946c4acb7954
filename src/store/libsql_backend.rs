//! libSQL backend: async `Database` trait implementation.
//!
//! Supports local file and in-memory databases. Nested values (requirements,
//! price breakdowns, attachments) are stored as JSON text columns; money is
//! stored as decimal text so it round-trips exactly.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use rust_decimal::Decimal;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::model::{
    Budget, Dispatch, OfferedTimeline, Pricing, Proposal, ProposalStatus, Rfp, RfpStatus,
    Timeline, Vendor, VendorStatus,
};
use crate::store::migrations;
use crate::store::traits::{Database, InboundRecord, UpsertOutcome};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db).await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        Self::from_database(db).await
    }

    async fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        conn.query("PRAGMA foreign_keys = ON", ())
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to enable foreign keys: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.init_schema().await?;
        Ok(backend)
    }

    /// Get the connection.
    fn conn(&self) -> &Connection {
        &self.conn
    }

    async fn load_dispatches(&self, rfp_id: &str) -> Result<Vec<Dispatch>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT vendor_id, sent_at FROM rfp_dispatches WHERE rfp_id = ?1 ORDER BY sent_at ASC",
                params![rfp_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("load_dispatches: {e}")))?;

        let mut dispatches = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("load_dispatches: {e}")))?
        {
            let vendor_id: String = row
                .get(0)
                .map_err(|e| DatabaseError::Query(format!("dispatch row parse: {e}")))?;
            let sent_at: String = row
                .get(1)
                .map_err(|e| DatabaseError::Query(format!("dispatch row parse: {e}")))?;
            dispatches.push(Dispatch {
                vendor_id: parse_uuid(&vendor_id)?,
                sent_at: parse_datetime(&sent_at),
            });
        }
        Ok(dispatches)
    }

    /// Run an RFP query and attach dispatch history to each row.
    async fn query_rfps(
        &self,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<Vec<Rfp>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(sql, params)
            .await
            .map_err(|e| DatabaseError::Query(format!("query_rfps: {e}")))?;

        let mut rfps = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("query_rfps: {e}")))?
        {
            rfps.push(row_to_rfp(&row)?);
        }

        for rfp in &mut rfps {
            rfp.sent_to_vendors = self.load_dispatches(&rfp.id.to_string()).await?;
        }
        Ok(rfps)
    }

    async fn query_proposals(
        &self,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<Vec<Proposal>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(sql, params)
            .await
            .map_err(|e| DatabaseError::Query(format!("query_proposals: {e}")))?;

        let mut proposals = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("query_proposals: {e}")))?
        {
            proposals.push(row_to_proposal(&row)?);
        }
        Ok(proposals)
    }

    async fn query_vendors(
        &self,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<Vec<Vendor>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(sql, params)
            .await
            .map_err(|e| DatabaseError::Query(format!("query_vendors: {e}")))?;

        let mut vendors = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("query_vendors: {e}")))?
        {
            vendors.push(row_to_vendor(&row)?);
        }
        Ok(vendors)
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_optional_datetime(s: &Option<String>) -> Option<DateTime<Utc>> {
    s.as_ref().map(|s| parse_datetime(s))
}

fn parse_uuid(s: &str) -> Result<Uuid, DatabaseError> {
    Uuid::parse_str(s).map_err(|e| DatabaseError::Serialization(format!("bad uuid '{s}': {e}")))
}

fn parse_decimal(s: &str) -> Result<Decimal, DatabaseError> {
    s.parse()
        .map_err(|e| DatabaseError::Serialization(format!("bad decimal '{s}': {e}")))
}

fn parse_json<T: serde::de::DeserializeOwned>(column: &str, s: &str) -> Result<T, DatabaseError> {
    serde_json::from_str(s)
        .map_err(|e| DatabaseError::Serialization(format!("{column}: {e}")))
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, DatabaseError> {
    serde_json::to_string(value).map_err(|e| DatabaseError::Serialization(e.to_string()))
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

/// Convert `Option<String>` to libsql Value.
fn opt_text_owned(s: Option<String>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s),
        None => libsql::Value::Null,
    }
}

fn opt_int(n: Option<i64>) -> libsql::Value {
    match n {
        Some(n) => libsql::Value::Integer(n),
        None => libsql::Value::Null,
    }
}

/// Escape `%`, `_` and `\` for a LIKE pattern using `ESCAPE '\'`.
fn escape_like(fragment: &str) -> String {
    let mut out = String::with_capacity(fragment.len());
    for ch in fragment.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

fn row_err(e: libsql::Error) -> DatabaseError {
    DatabaseError::Query(format!("row parse: {e}"))
}

fn row_to_vendor(row: &libsql::Row) -> Result<Vendor, DatabaseError> {
    let id: String = row.get(0).map_err(row_err)?;
    let status: String = row.get(7).map_err(row_err)?;
    let created: String = row.get(8).map_err(row_err)?;
    let updated: String = row.get(9).map_err(row_err)?;

    Ok(Vendor {
        id: parse_uuid(&id)?,
        name: row.get(1).map_err(row_err)?,
        email: row.get(2).map_err(row_err)?,
        company: row.get(3).map_err(row_err)?,
        phone: row.get(4).ok(),
        specialization: row.get(5).ok(),
        address: row.get(6).ok(),
        status: status.parse().unwrap_or(VendorStatus::Active),
        created_at: parse_datetime(&created),
        updated_at: parse_datetime(&updated),
    })
}

/// Column order matches RFP_COLUMNS.
fn row_to_rfp(row: &libsql::Row) -> Result<Rfp, DatabaseError> {
    let id: String = row.get(0).map_err(row_err)?;
    let amount: String = row.get(3).map_err(row_err)?;
    let requirements: String = row.get(5).map_err(row_err)?;
    let delivery_value: Option<i64> = row.get(6).ok();
    let delivery_unit: Option<String> = row.get(7).ok();
    let status: String = row.get(11).map_err(row_err)?;
    let created: String = row.get(13).map_err(row_err)?;
    let updated: String = row.get(14).map_err(row_err)?;

    let delivery_timeline = match delivery_value {
        Some(value) => Some(Timeline {
            value: u32::try_from(value).unwrap_or_default(),
            unit: delivery_unit
                .as_deref()
                .and_then(|u| u.parse().ok())
                .unwrap_or_default(),
        }),
        None => None,
    };

    Ok(Rfp {
        id: parse_uuid(&id)?,
        title: row.get(1).map_err(row_err)?,
        description: row.get(2).map_err(row_err)?,
        budget: Budget {
            amount: parse_decimal(&amount)?,
            currency: row.get(4).map_err(row_err)?,
        },
        requirements: parse_json("requirements", &requirements)?,
        delivery_timeline,
        payment_terms: row.get(8).map_err(row_err)?,
        warranty: row.get(9).ok(),
        additional_terms: row.get(10).ok(),
        status: status
            .parse()
            .map_err(|e: String| DatabaseError::Serialization(e))?,
        sent_to_vendors: Vec::new(),
        raw_input: row.get(12).ok(),
        created_at: parse_datetime(&created),
        updated_at: parse_datetime(&updated),
    })
}

/// Column order matches PROPOSAL_COLUMNS.
fn row_to_proposal(row: &libsql::Row) -> Result<Proposal, DatabaseError> {
    let id: String = row.get(0).map_err(row_err)?;
    let rfp_id: String = row.get(1).map_err(row_err)?;
    let vendor_id: String = row.get(2).map_err(row_err)?;
    let total: String = row.get(3).map_err(row_err)?;
    let breakdown: String = row.get(5).map_err(row_err)?;
    let timeline: Option<String> = row.get(6).ok();
    let compliance: Option<i64> = row.get(10).ok();
    let ai_score: Option<i64> = row.get(12).ok();
    let received_at: Option<String> = row.get(15).ok();
    let attachments: String = row.get(16).map_err(row_err)?;
    let status: String = row.get(17).map_err(row_err)?;
    let created: String = row.get(18).map_err(row_err)?;
    let updated: String = row.get(19).map_err(row_err)?;

    let delivery_timeline: Option<OfferedTimeline> = match timeline {
        Some(raw) => Some(parse_json("delivery_timeline", &raw)?),
        None => None,
    };

    Ok(Proposal {
        id: parse_uuid(&id)?,
        rfp_id: parse_uuid(&rfp_id)?,
        vendor_id: parse_uuid(&vendor_id)?,
        pricing: Pricing {
            total_amount: parse_decimal(&total)?,
            currency: row.get(4).map_err(row_err)?,
            breakdown: parse_json("breakdown", &breakdown)?,
        },
        delivery_timeline,
        payment_terms: row.get(7).ok(),
        warranty: row.get(8).ok(),
        additional_terms: row.get(9).ok(),
        compliance_score: compliance.and_then(|n| u8::try_from(n).ok()),
        ai_summary: row.get(11).ok(),
        ai_score: ai_score.and_then(|n| u8::try_from(n).ok()),
        ai_recommendation: row.get(13).ok(),
        raw_email_content: row.get(14).ok(),
        email_received_at: parse_optional_datetime(&received_at),
        attachments: parse_json("attachments", &attachments)?,
        status: status
            .parse()
            .map_err(|e: String| DatabaseError::Serialization(e))?,
        created_at: parse_datetime(&created),
        updated_at: parse_datetime(&updated),
    })
}

// ── Trait implementation ────────────────────────────────────────────

const VENDOR_COLUMNS: &str =
    "id, name, email, company, phone, specialization, address, status, created_at, updated_at";

const RFP_COLUMNS: &str = "id, title, description, budget_amount, budget_currency, requirements, \
     delivery_value, delivery_unit, payment_terms, warranty, additional_terms, status, raw_input, \
     created_at, updated_at";

const PROPOSAL_COLUMNS: &str = "id, rfp_id, vendor_id, total_amount, currency, breakdown, \
     delivery_timeline, payment_terms, warranty, additional_terms, compliance_score, ai_summary, \
     ai_score, ai_recommendation, raw_email_content, email_received_at, attachments, status, \
     created_at, updated_at";

#[async_trait]
impl Database for LibSqlBackend {
    async fn init_schema(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Vendors ─────────────────────────────────────────────────────

    async fn insert_vendor(&self, vendor: &Vendor) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                &format!(
                    "INSERT INTO vendors ({VENDOR_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
                ),
                params![
                    vendor.id.to_string(),
                    vendor.name.as_str(),
                    vendor.email.to_lowercase(),
                    vendor.company.as_str(),
                    opt_text(vendor.phone.as_deref()),
                    opt_text(vendor.specialization.as_deref()),
                    opt_text(vendor.address.as_deref()),
                    vendor.status.to_string(),
                    vendor.created_at.to_rfc3339(),
                    vendor.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| {
                if e.to_string().contains("UNIQUE") {
                    DatabaseError::Constraint(format!("vendor email {} already exists", vendor.email))
                } else {
                    DatabaseError::Query(format!("insert_vendor: {e}"))
                }
            })?;

        debug!(vendor_id = %vendor.id, email = %vendor.email, "Vendor inserted into DB");
        Ok(())
    }

    async fn get_vendor(&self, id: Uuid) -> Result<Option<Vendor>, DatabaseError> {
        let mut vendors = self
            .query_vendors(
                &format!("SELECT {VENDOR_COLUMNS} FROM vendors WHERE id = ?1"),
                params![id.to_string()],
            )
            .await?;
        Ok(vendors.pop())
    }

    async fn find_vendor_by_email(&self, email: &str) -> Result<Option<Vendor>, DatabaseError> {
        let mut vendors = self
            .query_vendors(
                &format!("SELECT {VENDOR_COLUMNS} FROM vendors WHERE email = ?1 COLLATE NOCASE"),
                params![email.trim()],
            )
            .await?;
        Ok(vendors.pop())
    }

    async fn list_vendors(&self) -> Result<Vec<Vendor>, DatabaseError> {
        self.query_vendors(
            &format!("SELECT {VENDOR_COLUMNS} FROM vendors ORDER BY name ASC"),
            (),
        )
        .await
    }

    // ── RFPs ────────────────────────────────────────────────────────

    async fn insert_rfp(&self, rfp: &Rfp) -> Result<(), DatabaseError> {
        let requirements = to_json(&rfp.requirements)?;
        self.conn()
            .execute(
                &format!(
                    "INSERT INTO rfps ({RFP_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)"
                ),
                params![
                    rfp.id.to_string(),
                    rfp.title.as_str(),
                    rfp.description.as_str(),
                    rfp.budget.amount.to_string(),
                    rfp.budget.currency.as_str(),
                    requirements,
                    opt_int(rfp.delivery_timeline.as_ref().map(|t| i64::from(t.value))),
                    opt_text_owned(rfp.delivery_timeline.as_ref().map(|t| t.unit.to_string())),
                    rfp.payment_terms.as_str(),
                    opt_text(rfp.warranty.as_deref()),
                    opt_text(rfp.additional_terms.as_deref()),
                    rfp.status.to_string(),
                    opt_text(rfp.raw_input.as_deref()),
                    rfp.created_at.to_rfc3339(),
                    rfp.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_rfp: {e}")))?;

        if !rfp.sent_to_vendors.is_empty() {
            for dispatch in &rfp.sent_to_vendors {
                self.conn()
                    .execute(
                        "INSERT INTO rfp_dispatches (rfp_id, vendor_id, sent_at) VALUES (?1, ?2, ?3)",
                        params![
                            rfp.id.to_string(),
                            dispatch.vendor_id.to_string(),
                            dispatch.sent_at.to_rfc3339(),
                        ],
                    )
                    .await
                    .map_err(|e| DatabaseError::Query(format!("insert_rfp dispatch: {e}")))?;
            }
        }

        debug!(rfp_id = %rfp.id, title = %rfp.title, "RFP inserted into DB");
        Ok(())
    }

    async fn get_rfp(&self, id: Uuid) -> Result<Option<Rfp>, DatabaseError> {
        let mut rfps = self
            .query_rfps(
                &format!("SELECT {RFP_COLUMNS} FROM rfps WHERE id = ?1"),
                params![id.to_string()],
            )
            .await?;
        Ok(rfps.pop())
    }

    async fn list_rfps(&self) -> Result<Vec<Rfp>, DatabaseError> {
        self.query_rfps(
            &format!("SELECT {RFP_COLUMNS} FROM rfps ORDER BY created_at DESC"),
            (),
        )
        .await
    }

    async fn find_rfps_by_title(&self, fragment: &str) -> Result<Vec<Rfp>, DatabaseError> {
        let fragment = fragment.trim();
        if fragment.is_empty() {
            return Ok(Vec::new());
        }
        let pattern = format!("%{}%", escape_like(fragment));
        self.query_rfps(
            &format!(
                "SELECT {RFP_COLUMNS} FROM rfps WHERE title LIKE ?1 ESCAPE '\\' ORDER BY created_at DESC"
            ),
            params![pattern],
        )
        .await
    }

    async fn update_rfp_status(&self, id: Uuid, status: RfpStatus) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let changed = self
            .conn()
            .execute(
                "UPDATE rfps SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![status.to_string(), now, id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_rfp_status: {e}")))?;

        if changed == 0 {
            return Err(DatabaseError::NotFound {
                entity: "rfp".into(),
                id: id.to_string(),
            });
        }
        debug!(rfp_id = %id, status = %status, "RFP status updated in DB");
        Ok(())
    }

    async fn record_dispatch(
        &self,
        rfp_id: Uuid,
        vendor_ids: &[Uuid],
        sent_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        let tx = self
            .conn()
            .transaction()
            .await
            .map_err(|e| DatabaseError::Query(format!("record_dispatch begin: {e}")))?;

        for vendor_id in vendor_ids {
            tx.execute(
                "INSERT INTO rfp_dispatches (rfp_id, vendor_id, sent_at) VALUES (?1, ?2, ?3)",
                params![rfp_id.to_string(), vendor_id.to_string(), sent_at.to_rfc3339()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("record_dispatch: {e}")))?;
        }

        let changed = tx
            .execute(
                "UPDATE rfps SET status = CASE WHEN status = 'draft' THEN 'sent' ELSE status END, \
                 updated_at = ?1 WHERE id = ?2",
                params![Utc::now().to_rfc3339(), rfp_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("record_dispatch status: {e}")))?;

        if changed == 0 {
            tx.rollback()
                .await
                .map_err(|e| DatabaseError::Query(format!("record_dispatch rollback: {e}")))?;
            return Err(DatabaseError::NotFound {
                entity: "rfp".into(),
                id: rfp_id.to_string(),
            });
        }

        tx.commit()
            .await
            .map_err(|e| DatabaseError::Query(format!("record_dispatch commit: {e}")))?;

        info!(rfp_id = %rfp_id, vendors = vendor_ids.len(), "RFP dispatch recorded");
        Ok(())
    }

    async fn delete_rfp(&self, id: Uuid) -> Result<bool, DatabaseError> {
        let id = id.to_string();
        let tx = self
            .conn()
            .transaction()
            .await
            .map_err(|e| DatabaseError::Query(format!("delete_rfp begin: {e}")))?;

        let result = async {
            tx.execute("DELETE FROM proposals WHERE rfp_id = ?1", params![id.as_str()])
                .await
                .map_err(|e| DatabaseError::Query(format!("delete_rfp proposals: {e}")))?;
            tx.execute("DELETE FROM rfp_dispatches WHERE rfp_id = ?1", params![id.as_str()])
                .await
                .map_err(|e| DatabaseError::Query(format!("delete_rfp dispatches: {e}")))?;
            tx.execute("DELETE FROM rfps WHERE id = ?1", params![id.as_str()])
                .await
                .map_err(|e| DatabaseError::Query(format!("delete_rfp: {e}")))
        }
        .await;

        let deleted = match result {
            Ok(deleted) => deleted,
            Err(e) => {
                tx.rollback()
                    .await
                    .map_err(|e| DatabaseError::Query(format!("delete_rfp rollback: {e}")))?;
                return Err(e);
            }
        };

        tx.commit()
            .await
            .map_err(|e| DatabaseError::Query(format!("delete_rfp commit: {e}")))?;
        Ok(deleted > 0)
    }

    // ── Proposals ───────────────────────────────────────────────────

    async fn upsert_proposal(&self, proposal: &Proposal) -> Result<UpsertOutcome, DatabaseError> {
        let breakdown = to_json(&proposal.pricing.breakdown)?;
        let timeline = match &proposal.delivery_timeline {
            Some(t) => Some(to_json(t)?),
            None => None,
        };
        let attachments = to_json(&proposal.attachments)?;

        let mut rows = self
            .conn()
            .query(
                &format!(
                    "INSERT INTO proposals ({PROPOSAL_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20)
                     ON CONFLICT (rfp_id, vendor_id) DO UPDATE SET
                        total_amount = excluded.total_amount,
                        currency = excluded.currency,
                        breakdown = excluded.breakdown,
                        delivery_timeline = excluded.delivery_timeline,
                        payment_terms = excluded.payment_terms,
                        warranty = excluded.warranty,
                        additional_terms = excluded.additional_terms,
                        compliance_score = excluded.compliance_score,
                        ai_summary = excluded.ai_summary,
                        ai_score = NULL,
                        ai_recommendation = NULL,
                        raw_email_content = excluded.raw_email_content,
                        email_received_at = excluded.email_received_at,
                        attachments = excluded.attachments,
                        updated_at = excluded.updated_at
                     RETURNING id"
                ),
                params![
                    proposal.id.to_string(),
                    proposal.rfp_id.to_string(),
                    proposal.vendor_id.to_string(),
                    proposal.pricing.total_amount.to_string(),
                    proposal.pricing.currency.as_str(),
                    breakdown,
                    opt_text_owned(timeline),
                    opt_text(proposal.payment_terms.as_deref()),
                    opt_text(proposal.warranty.as_deref()),
                    opt_text(proposal.additional_terms.as_deref()),
                    opt_int(proposal.compliance_score.map(i64::from)),
                    opt_text(proposal.ai_summary.as_deref()),
                    opt_int(proposal.ai_score.map(i64::from)),
                    opt_text(proposal.ai_recommendation.as_deref()),
                    opt_text(proposal.raw_email_content.as_deref()),
                    opt_text_owned(proposal.email_received_at.map(|d| d.to_rfc3339())),
                    attachments,
                    proposal.status.to_string(),
                    proposal.created_at.to_rfc3339(),
                    proposal.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("upsert_proposal: {e}")))?;

        let row = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("upsert_proposal: {e}")))?
            .ok_or_else(|| DatabaseError::Query("upsert_proposal returned no row".into()))?;
        let stored_id: String = row.get(0).map_err(row_err)?;
        let stored_id = parse_uuid(&stored_id)?;

        let outcome = if stored_id == proposal.id {
            UpsertOutcome::Created(stored_id)
        } else {
            UpsertOutcome::Updated(stored_id)
        };
        debug!(
            proposal_id = %stored_id,
            rfp_id = %proposal.rfp_id,
            vendor_id = %proposal.vendor_id,
            created = matches!(outcome, UpsertOutcome::Created(_)),
            "Proposal upserted"
        );
        Ok(outcome)
    }

    async fn get_proposal(&self, id: Uuid) -> Result<Option<Proposal>, DatabaseError> {
        let mut proposals = self
            .query_proposals(
                &format!("SELECT {PROPOSAL_COLUMNS} FROM proposals WHERE id = ?1"),
                params![id.to_string()],
            )
            .await?;
        Ok(proposals.pop())
    }

    async fn list_proposals_for_rfp(&self, rfp_id: Uuid) -> Result<Vec<Proposal>, DatabaseError> {
        self.query_proposals(
            &format!(
                "SELECT {PROPOSAL_COLUMNS} FROM proposals WHERE rfp_id = ?1 ORDER BY created_at DESC"
            ),
            params![rfp_id.to_string()],
        )
        .await
    }

    async fn update_proposal_status(
        &self,
        id: Uuid,
        status: ProposalStatus,
    ) -> Result<(), DatabaseError> {
        let changed = self
            .conn()
            .execute(
                "UPDATE proposals SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![status.to_string(), Utc::now().to_rfc3339(), id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_proposal_status: {e}")))?;

        if changed == 0 {
            return Err(DatabaseError::NotFound {
                entity: "proposal".into(),
                id: id.to_string(),
            });
        }
        Ok(())
    }

    async fn record_proposal_score(
        &self,
        id: Uuid,
        ai_score: u8,
        ai_recommendation: &str,
    ) -> Result<(), DatabaseError> {
        let changed = self
            .conn()
            .execute(
                "UPDATE proposals SET ai_score = ?1, ai_recommendation = ?2, updated_at = ?3 WHERE id = ?4",
                params![
                    i64::from(ai_score),
                    ai_recommendation,
                    Utc::now().to_rfc3339(),
                    id.to_string(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("record_proposal_score: {e}")))?;

        if changed == 0 {
            return Err(DatabaseError::NotFound {
                entity: "proposal".into(),
                id: id.to_string(),
            });
        }
        Ok(())
    }

    // ── Inbound ledger ──────────────────────────────────────────────

    async fn get_inbound(&self, message_id: &str) -> Result<Option<InboundRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT message_id, sender, subject, outcome, rfp_id, proposal_id, processed_at
                 FROM inbound_emails WHERE message_id = ?1",
                params![message_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_inbound: {e}")))?;

        let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("get_inbound: {e}")))?
        else {
            return Ok(None);
        };

        let outcome: String = row.get(3).map_err(row_err)?;
        let rfp_id: Option<String> = row.get(4).ok();
        let proposal_id: Option<String> = row.get(5).ok();
        let processed_at: String = row.get(6).map_err(row_err)?;

        Ok(Some(InboundRecord {
            message_id: row.get(0).map_err(row_err)?,
            sender: row.get(1).map_err(row_err)?,
            subject: row.get(2).map_err(row_err)?,
            outcome: outcome.parse().map_err(DatabaseError::Serialization)?,
            rfp_id: rfp_id.as_deref().map(parse_uuid).transpose()?,
            proposal_id: proposal_id.as_deref().map(parse_uuid).transpose()?,
            processed_at: parse_datetime(&processed_at),
        }))
    }

    async fn record_inbound(&self, record: &InboundRecord) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT OR IGNORE INTO inbound_emails
                    (message_id, sender, subject, outcome, rfp_id, proposal_id, processed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    record.message_id.as_str(),
                    record.sender.as_str(),
                    record.subject.as_str(),
                    record.outcome.as_str(),
                    opt_text_owned(record.rfp_id.map(|id| id.to_string())),
                    opt_text_owned(record.proposal_id.map(|id| id.to_string())),
                    record.processed_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("record_inbound: {e}")))?;

        debug!(
            message_id = %record.message_id,
            outcome = record.outcome.as_str(),
            "Inbound email recorded"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AttachmentMeta, LineItem, Requirement, TimelineUnit};
    use crate::store::traits::InboundOutcome;
    use rust_decimal_macros::dec;

    async fn backend() -> LibSqlBackend {
        LibSqlBackend::new_memory().await.unwrap()
    }

    fn sample_rfp(title: &str) -> Rfp {
        let mut rfp = Rfp::new(
            title,
            "Laptops for the new office",
            Budget {
                amount: dec!(50000.00),
                currency: "USD".into(),
            },
        );
        rfp.requirements = vec![Requirement {
            item: "Laptop".into(),
            quantity: Some(20),
            specifications: Some("16GB RAM".into()),
        }];
        rfp.delivery_timeline = Some(Timeline {
            value: 30,
            unit: TimelineUnit::Days,
        });
        rfp
    }

    fn sample_proposal(rfp_id: Uuid, vendor_id: Uuid, total: Decimal) -> Proposal {
        let mut proposal = Proposal::new(
            rfp_id,
            vendor_id,
            Pricing {
                total_amount: total,
                currency: "USD".into(),
                breakdown: vec![LineItem {
                    item: "Laptop".into(),
                    unit_price: Some(dec!(1200)),
                    quantity: Some(20),
                    total_price: Some(dec!(24000)),
                }],
            },
        );
        proposal.compliance_score = Some(85);
        proposal.attachments = vec![AttachmentMeta {
            filename: "quote.pdf".into(),
            mimetype: "application/pdf".into(),
            size: 1024,
        }];
        proposal
    }

    #[tokio::test]
    async fn vendor_lookup_is_case_insensitive() {
        let db = backend().await;
        let vendor = Vendor::new("Tech Solutions", "contact@techsolutions.com", "Tech Solutions Ltd")
            .with_phone("+1-555-0101");
        db.insert_vendor(&vendor).await.unwrap();

        let found = db
            .find_vendor_by_email("Contact@TechSolutions.COM")
            .await
            .unwrap()
            .expect("vendor should be found");
        assert_eq!(found.id, vendor.id);
        assert_eq!(found.phone.as_deref(), Some("+1-555-0101"));
        assert!(found.address.is_none());

        assert!(db.find_vendor_by_email("other@x.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_vendor_email_is_constraint_error() {
        let db = backend().await;
        db.insert_vendor(&Vendor::new("A", "a@x.com", "A")).await.unwrap();
        let err = db
            .insert_vendor(&Vendor::new("A2", "A@X.com", "A2"))
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::Constraint(_)));
    }

    #[tokio::test]
    async fn rfp_round_trip_keeps_money_and_requirements() {
        let db = backend().await;
        let rfp = sample_rfp("Office Laptops");
        db.insert_rfp(&rfp).await.unwrap();

        let loaded = db.get_rfp(rfp.id).await.unwrap().unwrap();
        assert_eq!(loaded.title, "Office Laptops");
        assert_eq!(loaded.budget.amount, dec!(50000.00));
        assert_eq!(loaded.requirements, rfp.requirements);
        assert_eq!(loaded.delivery_timeline, rfp.delivery_timeline);
        assert_eq!(loaded.status, RfpStatus::Draft);
        assert!(loaded.sent_to_vendors.is_empty());
    }

    #[tokio::test]
    async fn find_rfps_by_title_matches_substring_and_escapes_wildcards() {
        let db = backend().await;
        db.insert_rfp(&sample_rfp("Office Laptops")).await.unwrap();
        db.insert_rfp(&sample_rfp("Warehouse Forklifts")).await.unwrap();
        db.insert_rfp(&sample_rfp("100% Recycled Paper")).await.unwrap();

        let hits = db.find_rfps_by_title("laptop").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].title, "Office Laptops");

        let hits = db.find_rfps_by_title("100%").await.unwrap();
        assert_eq!(hits.len(), 1);

        // A bare wildcard must not match everything.
        assert!(db.find_rfps_by_title("_").await.unwrap().is_empty());
        assert!(db.find_rfps_by_title("  ").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn record_dispatch_marks_sent() {
        let db = backend().await;
        let vendor = Vendor::new("V", "v@x.com", "V Co");
        db.insert_vendor(&vendor).await.unwrap();
        let rfp = sample_rfp("Chairs");
        db.insert_rfp(&rfp).await.unwrap();

        db.record_dispatch(rfp.id, &[vendor.id], Utc::now()).await.unwrap();

        let loaded = db.get_rfp(rfp.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, RfpStatus::Sent);
        assert!(loaded.was_sent_to(vendor.id));
    }

    #[tokio::test]
    async fn record_dispatch_unknown_rfp_is_not_found() {
        let db = backend().await;
        let err = db
            .record_dispatch(Uuid::new_v4(), &[], Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound { .. }));
    }

    #[tokio::test]
    async fn upsert_creates_then_updates_in_place() {
        let db = backend().await;
        let vendor = Vendor::new("V", "v@x.com", "V Co");
        db.insert_vendor(&vendor).await.unwrap();
        let rfp = sample_rfp("Desks");
        db.insert_rfp(&rfp).await.unwrap();

        let first = sample_proposal(rfp.id, vendor.id, dec!(24000));
        let outcome = db.upsert_proposal(&first).await.unwrap();
        assert_eq!(outcome, UpsertOutcome::Created(first.id));

        db.update_proposal_status(first.id, ProposalStatus::UnderReview)
            .await
            .unwrap();
        db.record_proposal_score(first.id, 77, "{}").await.unwrap();

        let second = sample_proposal(rfp.id, vendor.id, dec!(22500.75));
        let outcome = db.upsert_proposal(&second).await.unwrap();
        assert_eq!(outcome, UpsertOutcome::Updated(first.id));

        let all = db.list_proposals_for_rfp(rfp.id).await.unwrap();
        assert_eq!(all.len(), 1);
        let stored = &all[0];
        assert_eq!(stored.id, first.id);
        assert_eq!(stored.pricing.total_amount, dec!(22500.75));
        assert_eq!(stored.status, ProposalStatus::UnderReview);
        assert_eq!(stored.ai_score, None);
        assert_eq!(stored.attachments.len(), 1);
        assert_eq!(stored.pricing.breakdown[0].unit_price, Some(dec!(1200)));
    }

    #[tokio::test]
    async fn delete_rfp_removes_proposals() {
        let db = backend().await;
        let vendor = Vendor::new("V", "v@x.com", "V Co");
        db.insert_vendor(&vendor).await.unwrap();
        let rfp = sample_rfp("Monitors");
        db.insert_rfp(&rfp).await.unwrap();
        let proposal = sample_proposal(rfp.id, vendor.id, dec!(1000));
        db.upsert_proposal(&proposal).await.unwrap();

        assert!(db.delete_rfp(rfp.id).await.unwrap());
        assert!(db.get_rfp(rfp.id).await.unwrap().is_none());
        assert!(db.get_proposal(proposal.id).await.unwrap().is_none());
        assert!(!db.delete_rfp(rfp.id).await.unwrap());
    }

    #[tokio::test]
    async fn failed_delete_rfp_keeps_proposals_and_dispatches() {
        let db = backend().await;
        let vendor = Vendor::new("V", "v@x.com", "V Co");
        db.insert_vendor(&vendor).await.unwrap();
        let rfp = sample_rfp("Monitors");
        db.insert_rfp(&rfp).await.unwrap();
        db.record_dispatch(rfp.id, &[vendor.id], Utc::now()).await.unwrap();
        let proposal = sample_proposal(rfp.id, vendor.id, dec!(1000));
        db.upsert_proposal(&proposal).await.unwrap();

        // The last statement of the delete fails after the first two ran.
        db.conn()
            .execute(
                "CREATE TRIGGER block_rfp_delete BEFORE DELETE ON rfps \
                 BEGIN SELECT RAISE(ABORT, 'blocked'); END",
                (),
            )
            .await
            .unwrap();

        assert!(db.delete_rfp(rfp.id).await.is_err());
        assert!(db.get_proposal(proposal.id).await.unwrap().is_some());
        let kept = db.get_rfp(rfp.id).await.unwrap().unwrap();
        assert!(kept.was_sent_to(vendor.id));

        db.conn().execute("DROP TRIGGER block_rfp_delete", ()).await.unwrap();
        assert!(db.delete_rfp(rfp.id).await.unwrap());
        assert!(db.get_proposal(proposal.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn inbound_ledger_ignores_second_record() {
        let db = backend().await;
        let mut record = InboundRecord {
            message_id: "<abc@mail>".into(),
            sender: "v@x.com".into(),
            subject: "Re: RFP: Desks".into(),
            outcome: InboundOutcome::UnknownRfp,
            rfp_id: None,
            proposal_id: None,
            processed_at: Utc::now(),
        };
        db.record_inbound(&record).await.unwrap();
        record.outcome = InboundOutcome::ProposalCreated;
        db.record_inbound(&record).await.unwrap();

        let stored = db.get_inbound("<abc@mail>").await.unwrap().unwrap();
        assert_eq!(stored.outcome, InboundOutcome::UnknownRfp);
        assert!(db.get_inbound("<other@mail>").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn new_local_creates_parent_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("rfp.db");
        let db = LibSqlBackend::new_local(&path).await.unwrap();
        db.insert_vendor(&Vendor::new("V", "v@x.com", "V")).await.unwrap();
        assert!(path.exists());
    }

    #[test]
    fn escape_like_escapes_wildcards() {
        assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");
        assert_eq!(escape_like("plain"), "plain");
    }
}
