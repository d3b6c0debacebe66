use super::{ActivityWindowSummary, NewAlert, NewIncident, NewThreat, Repository};
use crate::model::*;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sentinel_core::{ActivityKind, Result, RiskLevel, UserId};
use sqlx::{postgres::PgRow, PgPool, Row};
use tracing::info;

/// PostgreSQL-backed repository. All timestamps are persisted in UTC
/// (`TIMESTAMPTZ`); conversion to the display timezone happens on read in
/// the handlers.
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn activity_from_row(row: &PgRow) -> Result<Activity> {
        let kind: String = row.try_get("kind").map_err(sentinel_core::Error::from)?;
        let kind: ActivityKind = kind.parse()?;
        let details: serde_json::Value = row.try_get("details").map_err(sentinel_core::Error::from)?;
        let details: ActivityDetails = serde_json::from_value(details)?;
        Ok(Activity {
            id: row.try_get("id").map_err(sentinel_core::Error::from)?,
            user_id: UserId(row.try_get("user_id").map_err(sentinel_core::Error::from)?),
            timestamp: row.try_get("timestamp").map_err(sentinel_core::Error::from)?,
            kind,
            details,
        })
    }
}

#[async_trait]
impl Repository for PostgresRepository {
    async fn initialize(&self) -> Result<()> {
        let ddl = r#"
            CREATE TABLE IF NOT EXISTS users (
                user_id TEXT PRIMARY KEY,
                name TEXT NOT NULL DEFAULT '',
                role TEXT NOT NULL DEFAULT '',
                department TEXT NOT NULL DEFAULT '',
                email TEXT NOT NULL DEFAULT '',
                its_score DOUBLE PRECISION NOT NULL DEFAULT 5.0,
                risk_level TEXT NOT NULL DEFAULT 'low',
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            );

            CREATE TABLE IF NOT EXISTS activities (
                id UUID PRIMARY KEY,
                user_id TEXT NOT NULL REFERENCES users(user_id),
                timestamp TIMESTAMPTZ NOT NULL,
                kind TEXT NOT NULL,
                details JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            );
            CREATE INDEX IF NOT EXISTS idx_activities_user_ts ON activities (user_id, timestamp DESC);
            CREATE INDEX IF NOT EXISTS idx_activities_kind ON activities (kind);

            CREATE TABLE IF NOT EXISTS anomaly_alerts (
                id BIGSERIAL PRIMARY KEY,
                user_id TEXT NOT NULL REFERENCES users(user_id),
                fingerprint TEXT NOT NULL,
                ml_score DOUBLE PRECISION NOT NULL,
                its_score DOUBLE PRECISION NOT NULL,
                risk_level TEXT NOT NULL,
                explanation TEXT NOT NULL DEFAULT '',
                anomalies JSONB NOT NULL DEFAULT '[]',
                status TEXT NOT NULL DEFAULT 'new',
                viewed BOOLEAN NOT NULL DEFAULT FALSE,
                suppressed_until TIMESTAMPTZ,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            );
            CREATE INDEX IF NOT EXISTS idx_alerts_fingerprint ON anomaly_alerts (fingerprint);
            CREATE INDEX IF NOT EXISTS idx_alerts_status ON anomaly_alerts (status);
            CREATE INDEX IF NOT EXISTS idx_alerts_created ON anomaly_alerts (created_at DESC);

            CREATE TABLE IF NOT EXISTS threats (
                id BIGSERIAL PRIMARY KEY,
                alert_id BIGINT,
                user_id TEXT NOT NULL REFERENCES users(user_id),
                category TEXT NOT NULL,
                ml_score DOUBLE PRECISION NOT NULL,
                its_score DOUBLE PRECISION NOT NULL,
                fingerprint TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'open',
                notes TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            );
            CREATE INDEX IF NOT EXISTS idx_threats_fingerprint ON threats (fingerprint);
            CREATE INDEX IF NOT EXISTS idx_threats_status ON threats (status);

            CREATE TABLE IF NOT EXISTS incidents (
                id BIGSERIAL PRIMARY KEY,
                threat_id BIGINT,
                alert_id BIGINT,
                user_id TEXT NOT NULL REFERENCES users(user_id),
                incident_type TEXT NOT NULL,
                severity TEXT NOT NULL,
                its_score DOUBLE PRECISION NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                evidence JSONB NOT NULL DEFAULT '{}',
                status TEXT NOT NULL DEFAULT 'open',
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            );
            CREATE INDEX IF NOT EXISTS idx_incidents_user_created ON incidents (user_id, created_at DESC);
            CREATE INDEX IF NOT EXISTS idx_incidents_status ON incidents (status);

            CREATE TABLE IF NOT EXISTS fingerprints (
                fingerprint TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                first_seen TIMESTAMPTZ NOT NULL,
                last_seen TIMESTAMPTZ NOT NULL,
                observation_count BIGINT NOT NULL DEFAULT 1,
                escalated BOOLEAN NOT NULL DEFAULT FALSE,
                suppressed_until TIMESTAMPTZ
            );

            CREATE TABLE IF NOT EXISTS historical_its_scores (
                id BIGSERIAL PRIMARY KEY,
                user_id TEXT NOT NULL REFERENCES users(user_id),
                date TIMESTAMPTZ NOT NULL,
                its_score DOUBLE PRECISION NOT NULL,
                risk_level TEXT NOT NULL,
                alert_count BIGINT NOT NULL DEFAULT 0,
                activity_count BIGINT NOT NULL DEFAULT 0,
                UNIQUE (user_id, date)
            );
            CREATE INDEX IF NOT EXISTS idx_its_scores_user_date ON historical_its_scores (user_id, date DESC);
        "#;

        sqlx::raw_sql(ddl).execute(&self.pool).await.map_err(sentinel_core::Error::from)?;
        info!("Detection schema initialized");
        Ok(())
    }

    // -- users -------------------------------------------------------------

    async fn get_user(&self, user_id: &str) -> Result<Option<MonitoredUser>> {
        let user = sqlx::query_as::<_, MonitoredUser>("SELECT * FROM users WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    async fn list_users(&self) -> Result<Vec<MonitoredUser>> {
        let users = sqlx::query_as::<_, MonitoredUser>("SELECT * FROM users ORDER BY user_id")
            .fetch_all(&self.pool)
            .await?;
        Ok(users)
    }

    async fn update_user_score(&self, user_id: &str, its_score: f64, risk: RiskLevel) -> Result<()> {
        sqlx::query("UPDATE users SET its_score = $2, risk_level = $3 WHERE user_id = $1")
            .bind(user_id)
            .bind(its_score)
            .bind(risk.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // -- activities ----------------------------------------------------------

    async fn insert_activity(&self, activity: &Activity) -> Result<()> {
        let details = serde_json::to_value(&activity.details)?;
        sqlx::query(
            "INSERT INTO activities (id, user_id, timestamp, kind, details) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(activity.id)
        .bind(activity.user_id.as_str())
        .bind(activity.timestamp)
        .bind(activity.kind.as_str())
        .bind(details)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recent_context(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Activity>> {
        // Cap applies to the most recent events, then restore chronological order.
        let rows = sqlx::query(
            r#"
            SELECT * FROM (
                SELECT id, user_id, timestamp, kind, details
                FROM activities
                WHERE user_id = $1 AND timestamp >= $2
                ORDER BY timestamp DESC
                LIMIT $3
            ) recent ORDER BY timestamp ASC
            "#,
        )
        .bind(user_id)
        .bind(since)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(sentinel_core::Error::from)?;

        rows.iter().map(Self::activity_from_row).collect()
    }

    async fn activities_since(&self, user_id: &str, since: DateTime<Utc>) -> Result<Vec<Activity>> {
        let rows = sqlx::query(
            "SELECT id, user_id, timestamp, kind, details FROM activities \
             WHERE user_id = $1 AND timestamp >= $2 ORDER BY timestamp ASC",
        )
        .bind(user_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .map_err(sentinel_core::Error::from)?;

        rows.iter().map(Self::activity_from_row).collect()
    }

    async fn latest_activities(&self, user_id: &str, limit: i64) -> Result<Vec<Activity>> {
        let rows = sqlx::query(
            "SELECT id, user_id, timestamp, kind, details FROM activities \
             WHERE user_id = $1 ORDER BY timestamp DESC LIMIT $2",
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(sentinel_core::Error::from)?;

        rows.iter().map(Self::activity_from_row).collect()
    }

    async fn count_activities_between(
        &self,
        user_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM activities WHERE user_id = $1 AND timestamp >= $2 AND timestamp < $3",
        )
        .bind(user_id)
        .bind(from)
        .bind(to)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    // -- fingerprints --------------------------------------------------------

    async fn get_fingerprint(&self, fingerprint: &str) -> Result<Option<FingerprintRecord>> {
        let record = sqlx::query_as::<_, FingerprintRecord>(
            "SELECT * FROM fingerprints WHERE fingerprint = $1",
        )
        .bind(fingerprint)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    async fn observe_fingerprint(
        &self,
        fingerprint: &str,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<FingerprintRecord> {
        // Single upsert keeps create-or-refresh linearizable under
        // concurrent ingest of the same fingerprint.
        let record = sqlx::query_as::<_, FingerprintRecord>(
            r#"
            INSERT INTO fingerprints (fingerprint, user_id, first_seen, last_seen, observation_count)
            VALUES ($1, $2, $3, $3, 1)
            ON CONFLICT (fingerprint) DO UPDATE
                SET last_seen = EXCLUDED.last_seen,
                    observation_count = fingerprints.observation_count + 1
            RETURNING *
            "#,
        )
        .bind(fingerprint)
        .bind(user_id)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(record)
    }

    async fn set_fingerprint_suppression(
        &self,
        fingerprint: &str,
        until: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query("UPDATE fingerprints SET suppressed_until = $2 WHERE fingerprint = $1")
            .bind(fingerprint)
            .bind(until)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_fingerprint_escalated(&self, fingerprint: &str) -> Result<()> {
        sqlx::query("UPDATE fingerprints SET escalated = TRUE WHERE fingerprint = $1")
            .bind(fingerprint)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // -- alerts --------------------------------------------------------------

    async fn open_alert_for_fingerprint(&self, fingerprint: &str) -> Result<Option<AnomalyAlert>> {
        let alert = sqlx::query_as::<_, AnomalyAlert>(
            "SELECT * FROM anomaly_alerts WHERE fingerprint = $1 AND status IN ('new', 'validated') \
             ORDER BY created_at DESC LIMIT 1",
        )
        .bind(fingerprint)
        .fetch_optional(&self.pool)
        .await?;
        Ok(alert)
    }

    async fn create_alert(&self, alert: NewAlert) -> Result<AnomalyAlert> {
        let anomalies = serde_json::to_value(&alert.anomalies)?;
        let created = sqlx::query_as::<_, AnomalyAlert>(
            r#"
            INSERT INTO anomaly_alerts
                (user_id, fingerprint, ml_score, its_score, risk_level, explanation, anomalies, suppressed_until)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *
            "#,
        )
        .bind(&alert.user_id)
        .bind(&alert.fingerprint)
        .bind(alert.ml_score)
        .bind(alert.its_score)
        .bind(alert.risk_level.as_str())
        .bind(&alert.explanation)
        .bind(anomalies)
        .bind(alert.suppressed_until)
        .fetch_one(&self.pool)
        .await?;
        Ok(created)
    }

    async fn refresh_alert(
        &self,
        id: i64,
        ml_score: f64,
        its_score: f64,
        risk: RiskLevel,
        explanation: &str,
        anomalies: &[String],
        now: DateTime<Utc>,
    ) -> Result<AnomalyAlert> {
        let anomalies = serde_json::to_value(anomalies)?;
        let updated = sqlx::query_as::<_, AnomalyAlert>(
            r#"
            UPDATE anomaly_alerts
            SET ml_score = $2, its_score = $3, risk_level = $4, explanation = $5,
                anomalies = $6, updated_at = $7
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(ml_score)
        .bind(its_score)
        .bind(risk.as_str())
        .bind(explanation)
        .bind(anomalies)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(updated)
    }

    async fn get_alert(&self, id: i64) -> Result<Option<AnomalyAlert>> {
        let alert = sqlx::query_as::<_, AnomalyAlert>("SELECT * FROM anomaly_alerts WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(alert)
    }

    async fn list_alerts(&self, status: Option<&str>, limit: i64) -> Result<Vec<AnomalyAlert>> {
        let alerts = match status {
            Some(status) => {
                sqlx::query_as::<_, AnomalyAlert>(
                    "SELECT * FROM anomaly_alerts WHERE status = $1 ORDER BY updated_at DESC LIMIT $2",
                )
                .bind(status)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, AnomalyAlert>(
                    "SELECT * FROM anomaly_alerts ORDER BY updated_at DESC LIMIT $1",
                )
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(alerts)
    }

    async fn set_alert_status(&self, id: i64, status: AlertStatus) -> Result<()> {
        sqlx::query("UPDATE anomaly_alerts SET status = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_alerts_viewed(&self, ids: &[i64]) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE anomaly_alerts SET viewed = TRUE WHERE id = ANY($1) AND viewed = FALSE",
        )
        .bind(ids.to_vec())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn count_unread_alerts(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM anomaly_alerts WHERE viewed = FALSE")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn count_alerts_between(
        &self,
        user_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM anomaly_alerts WHERE user_id = $1 AND created_at >= $2 AND created_at < $3",
        )
        .bind(user_id)
        .bind(from)
        .bind(to)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    // -- threats -------------------------------------------------------------

    async fn create_threat(&self, threat: NewThreat) -> Result<Threat> {
        let created = sqlx::query_as::<_, Threat>(
            r#"
            INSERT INTO threats (alert_id, user_id, category, ml_score, its_score, fingerprint)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(threat.alert_id)
        .bind(&threat.user_id)
        .bind(threat.category.as_str())
        .bind(threat.ml_score)
        .bind(threat.its_score)
        .bind(&threat.fingerprint)
        .fetch_one(&self.pool)
        .await?;
        Ok(created)
    }

    async fn get_threat(&self, id: i64) -> Result<Option<Threat>> {
        let threat = sqlx::query_as::<_, Threat>("SELECT * FROM threats WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(threat)
    }

    async fn list_threats(&self, status: Option<&str>, limit: i64) -> Result<Vec<Threat>> {
        let threats = match status {
            Some(status) => {
                sqlx::query_as::<_, Threat>(
                    "SELECT * FROM threats WHERE status = $1 ORDER BY updated_at DESC LIMIT $2",
                )
                .bind(status)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, Threat>("SELECT * FROM threats ORDER BY updated_at DESC LIMIT $1")
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        Ok(threats)
    }

    async fn update_threat_status(&self, id: i64, status: &str, notes: Option<&str>) -> Result<Threat> {
        let updated = sqlx::query_as::<_, Threat>(
            r#"
            UPDATE threats
            SET status = $2, notes = COALESCE($3, notes), updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(status)
        .bind(notes)
        .fetch_one(&self.pool)
        .await?;
        Ok(updated)
    }

    async fn open_threat_for_fingerprint(&self, fingerprint: &str) -> Result<Option<Threat>> {
        let threat = sqlx::query_as::<_, Threat>(
            "SELECT * FROM threats WHERE fingerprint = $1 AND status = 'open' \
             ORDER BY created_at DESC LIMIT 1",
        )
        .bind(fingerprint)
        .fetch_optional(&self.pool)
        .await?;
        Ok(threat)
    }

    // -- incidents -----------------------------------------------------------

    async fn create_incident(&self, incident: NewIncident) -> Result<Incident> {
        let created = sqlx::query_as::<_, Incident>(
            r#"
            INSERT INTO incidents
                (threat_id, alert_id, user_id, incident_type, severity, its_score, description, evidence)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *
            "#,
        )
        .bind(incident.threat_id)
        .bind(incident.alert_id)
        .bind(&incident.user_id)
        .bind(&incident.incident_type)
        .bind(incident.severity.as_str())
        .bind(incident.its_score)
        .bind(&incident.description)
        .bind(incident.evidence)
        .fetch_one(&self.pool)
        .await?;
        Ok(created)
    }

    async fn get_incident(&self, id: i64) -> Result<Option<Incident>> {
        let incident = sqlx::query_as::<_, Incident>("SELECT * FROM incidents WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(incident)
    }

    async fn list_incidents(&self, status: Option<&str>, limit: i64) -> Result<Vec<Incident>> {
        let incidents = match status {
            Some(status) => {
                sqlx::query_as::<_, Incident>(
                    "SELECT * FROM incidents WHERE status = $1 ORDER BY updated_at DESC LIMIT $2",
                )
                .bind(status)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, Incident>(
                    "SELECT * FROM incidents ORDER BY updated_at DESC LIMIT $1",
                )
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(incidents)
    }

    async fn update_incident_status(&self, id: i64, status: &str) -> Result<Incident> {
        let updated = sqlx::query_as::<_, Incident>(
            "UPDATE incidents SET status = $2, updated_at = NOW() WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(status)
        .fetch_one(&self.pool)
        .await?;
        Ok(updated)
    }

    async fn recent_open_incident_for_user(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<Incident>> {
        let incident = sqlx::query_as::<_, Incident>(
            "SELECT * FROM incidents WHERE user_id = $1 AND status = 'open' AND created_at >= $2 \
             ORDER BY created_at DESC LIMIT 1",
        )
        .bind(user_id)
        .bind(since)
        .fetch_optional(&self.pool)
        .await?;
        Ok(incident)
    }

    async fn touch_incident(
        &self,
        id: i64,
        its_score: f64,
        severity: RiskLevel,
        now: DateTime<Utc>,
    ) -> Result<Incident> {
        let updated = sqlx::query_as::<_, Incident>(
            r#"
            UPDATE incidents
            SET its_score = $2,
                severity = CASE
                    WHEN array_position(ARRAY['low','medium','high','critical'], $3) >
                         array_position(ARRAY['low','medium','high','critical'], severity)
                    THEN $3 ELSE severity END,
                updated_at = $4
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(its_score)
        .bind(severity.as_str())
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(updated)
    }

    async fn incident_for_alert(&self, alert_id: i64) -> Result<Option<Incident>> {
        let incident = sqlx::query_as::<_, Incident>(
            "SELECT * FROM incidents WHERE alert_id = $1 ORDER BY created_at ASC LIMIT 1",
        )
        .bind(alert_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(incident)
    }

    // -- ITS snapshots -------------------------------------------------------

    async fn upsert_snapshot(&self, snapshot: &ItsSnapshot) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO historical_its_scores
                (user_id, date, its_score, risk_level, alert_count, activity_count)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (user_id, date) DO UPDATE
                SET its_score = EXCLUDED.its_score,
                    risk_level = EXCLUDED.risk_level,
                    alert_count = EXCLUDED.alert_count,
                    activity_count = EXCLUDED.activity_count
            "#,
        )
        .bind(&snapshot.user_id)
        .bind(snapshot.date)
        .bind(snapshot.its_score)
        .bind(&snapshot.risk_level)
        .bind(snapshot.alert_count)
        .bind(snapshot.activity_count)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn snapshots_for_user(
        &self,
        user_id: &str,
        from: DateTime<Utc>,
    ) -> Result<Vec<ItsSnapshot>> {
        let snapshots = sqlx::query_as::<_, ItsSnapshot>(
            "SELECT user_id, date, its_score, risk_level, alert_count, activity_count \
             FROM historical_its_scores WHERE user_id = $1 AND date >= $2 ORDER BY date ASC",
        )
        .bind(user_id)
        .bind(from)
        .fetch_all(&self.pool)
        .await?;
        Ok(snapshots)
    }

    // -- aggregates ----------------------------------------------------------

    async fn summarize_window(
        &self,
        user_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<ActivityWindowSummary> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE kind = 'logon') AS logon_count,
                COALESCE(AVG((details->>'activity_hour')::float) FILTER (WHERE kind = 'logon'), 9.0) AS mean_logon_hour,
                COALESCE(SUM((details->>'geo_anomaly')::int) FILTER (WHERE kind = 'logon'), 0) AS geo_anomalies,
                COUNT(*) FILTER (WHERE kind = 'file_access') AS file_accesses,
                COUNT(*) FILTER (WHERE kind = 'file_access' AND (details->>'sensitive')::boolean) AS sensitive_file_accesses,
                COALESCE(SUM((details->>'size_mb')::float) FILTER (WHERE kind = 'file_access'), 0.0) AS downloaded_mb,
                COUNT(*) FILTER (WHERE kind = 'email') AS emails_sent,
                COUNT(*) FILTER (WHERE kind = 'email' AND (details->>'external')::boolean) AS external_emails,
                COUNT(*) FILTER (WHERE kind = 'email' AND (details->>'attachment_size_mb')::float > 10) AS large_attachments,
                COALESCE(SUM((details->>'suspicious_keywords')::int) FILTER (WHERE kind = 'email'), 0) AS suspicious_keywords,
                COUNT(*) AS total_activities,
                MAX(timestamp) AS most_recent
            FROM activities
            WHERE user_id = $1 AND timestamp >= $2 AND timestamp < $3
            "#,
        )
        .bind(user_id)
        .bind(from)
        .bind(to)
        .fetch_one(&self.pool)
        .await
        .map_err(sentinel_core::Error::from)?;

        Ok(ActivityWindowSummary {
            logon_count: row.try_get("logon_count").map_err(sentinel_core::Error::from)?,
            mean_logon_hour: row.try_get("mean_logon_hour").map_err(sentinel_core::Error::from)?,
            geo_anomalies: row.try_get::<i64, _>("geo_anomalies").map_err(sentinel_core::Error::from)?,
            file_accesses: row.try_get("file_accesses").map_err(sentinel_core::Error::from)?,
            sensitive_file_accesses: row
                .try_get("sensitive_file_accesses")
                .map_err(sentinel_core::Error::from)?,
            downloaded_mb: row.try_get("downloaded_mb").map_err(sentinel_core::Error::from)?,
            emails_sent: row.try_get("emails_sent").map_err(sentinel_core::Error::from)?,
            external_emails: row.try_get("external_emails").map_err(sentinel_core::Error::from)?,
            large_attachments: row.try_get("large_attachments").map_err(sentinel_core::Error::from)?,
            suspicious_keywords: row
                .try_get::<i64, _>("suspicious_keywords")
                .map_err(sentinel_core::Error::from)?,
            total_activities: row.try_get("total_activities").map_err(sentinel_core::Error::from)?,
            most_recent: row.try_get("most_recent").map_err(sentinel_core::Error::from)?,
        })
    }

    // -- dashboard -----------------------------------------------------------

    async fn count_users(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn count_users_with_its_at_least(&self, threshold: f64) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE its_score >= $1")
            .bind(threshold)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn average_its(&self) -> Result<f64> {
        let avg: f64 = sqlx::query_scalar("SELECT COALESCE(AVG(its_score), 0.0) FROM users")
            .fetch_one(&self.pool)
            .await?;
        Ok(avg)
    }

    async fn users_with_risk_at_least(&self, level: RiskLevel) -> Result<Vec<MonitoredUser>> {
        let threshold = match level {
            RiskLevel::Low => 0.0,
            RiskLevel::Medium => 25.0,
            RiskLevel::High => 50.0,
            RiskLevel::Critical => 75.0,
        };
        let users = sqlx::query_as::<_, MonitoredUser>(
            "SELECT * FROM users WHERE its_score >= $1 ORDER BY its_score DESC",
        )
        .bind(threshold)
        .fetch_all(&self.pool)
        .await?;
        Ok(users)
    }
}
