use crate::db::{AuditEntry, DbConn};
use crate::error::AgriResult;
use chrono::Utc;

/// Appends an administrative action to the audit log, inside the caller's transaction.
pub async fn log_system_action(
    conn: &mut DbConn,
    actor_id: i64,
    action: &str,
    details: &str,
) -> AgriResult<()> {
    tracing::warn!(actor_id, action, "{}", details);
    sqlx::query("INSERT INTO audit_log (actor_id, action, details, created_at) VALUES (?, ?, ?, ?)")
        .bind(actor_id)
        .bind(action)
        .bind(details)
        .bind(Utc::now())
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn list_audit_entries(conn: &mut DbConn, limit: i64) -> AgriResult<Vec<AuditEntry>> {
    Ok(sqlx::query_as::<_, AuditEntry>(
        "SELECT * FROM audit_log ORDER BY created_at DESC, id DESC LIMIT ?",
    )
    .bind(limit)
    .fetch_all(&mut *conn)
    .await?)
}
