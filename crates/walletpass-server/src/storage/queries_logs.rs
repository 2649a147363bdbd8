//! Device log queries.

use super::models::{LogEntry, NewLog};
use super::{DatabaseError, PassDatabase};

impl PassDatabase {
    /// Store one device log message.
    pub async fn insert_log(&self, log: &NewLog<'_>) -> Result<i64, DatabaseError> {
        let result = sqlx::query(
            "INSERT INTO logs (created_at, status, task_type, pass_type_identifier, serial_number, \
             pass_id, web_service_url, device_id, msg, message) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(log.created_at)
        .bind(log.status)
        .bind(log.task_type)
        .bind(log.pass_type_identifier)
        .bind(log.serial_number)
        .bind(log.pass_id)
        .bind(log.web_service_url)
        .bind(log.device_id)
        .bind(log.msg)
        .bind(log.message)
        .execute(self.pool())
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Resolve the pass a log message refers to.
    ///
    /// Web service errors carry no serial number, so the pass type is
    /// optional here.
    pub async fn find_pass_id_for_log(
        &self,
        serial_number: &str,
        pass_type_identifier: Option<&str>,
    ) -> Result<Option<i64>, DatabaseError> {
        let id: Option<(i64,)> = sqlx::query_as(
            "SELECT id FROM passes WHERE serial_number = ? \
             AND (? IS NULL OR pass_type_identifier = ?) ORDER BY id LIMIT 1",
        )
        .bind(serial_number)
        .bind(pass_type_identifier)
        .bind(pass_type_identifier)
        .fetch_optional(self.pool())
        .await?;

        Ok(id.map(|(id,)| id))
    }

    /// Most recent logs first.
    pub async fn recent_logs(&self, limit: i64) -> Result<Vec<LogEntry>, DatabaseError> {
        let logs = sqlx::query_as::<_, LogEntry>("SELECT * FROM logs ORDER BY id DESC LIMIT ?")
            .bind(limit)
            .fetch_all(self.pool())
            .await?;

        Ok(logs)
    }
}
