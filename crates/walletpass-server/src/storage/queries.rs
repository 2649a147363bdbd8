//! Pass and registration queries.

use walletpass_core::db::{unix_timestamp, unix_timestamp_micros};
use walletpass_core::{NewPass, PassRepository};

use super::models::{Pass, Registration, SerialUpdate};
use super::{DatabaseError, PassDatabase};

impl PassDatabase {
    // =========================================================================
    // Pass queries
    // =========================================================================

    /// Insert a new pass. `(pass type, serial)` must be unused.
    pub async fn create_pass(&self, pass: &NewPass<'_>) -> Result<Pass, DatabaseError> {
        let now = unix_timestamp();

        let result = sqlx::query(
            "INSERT INTO passes (pass_type_identifier, serial_number, authentication_token, data, data_name, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(pass.pass_type_identifier)
        .bind(pass.serial_number)
        .bind(pass.authentication_token)
        .bind(pass.data)
        .bind(pass.data_name)
        .bind(now)
        .bind(unix_timestamp_micros())
        .execute(self.pool())
        .await?;

        self.get_pass(result.last_insert_rowid()).await
    }

    /// Swap in a rebuilt artifact and its identifiers in a single statement.
    ///
    /// `updated_at` becomes `max(now, previous + 1)` so it strictly advances
    /// even when the clock does not.
    pub async fn replace_pass_content(
        &self,
        id: i64,
        pass: &NewPass<'_>,
    ) -> Result<Pass, DatabaseError> {
        let result = sqlx::query(
            "UPDATE passes SET pass_type_identifier = ?, serial_number = ?, authentication_token = ?, \
             data = ?, data_name = ?, updated_at = MAX(?, updated_at + 1) WHERE id = ?",
        )
        .bind(pass.pass_type_identifier)
        .bind(pass.serial_number)
        .bind(pass.authentication_token)
        .bind(pass.data)
        .bind(pass.data_name)
        .bind(unix_timestamp_micros())
        .bind(id)
        .execute(self.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(format!("Pass {id}")));
        }
        self.get_pass(id).await
    }

    /// Get a pass by ID.
    pub async fn get_pass(&self, id: i64) -> Result<Pass, DatabaseError> {
        sqlx::query_as::<_, Pass>("SELECT * FROM passes WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Pass {id}")))
    }

    /// Look up a pass by its public identifiers.
    pub async fn find_pass(
        &self,
        pass_type_identifier: &str,
        serial_number: &str,
    ) -> Result<Option<Pass>, DatabaseError> {
        let pass = sqlx::query_as::<_, Pass>(
            "SELECT * FROM passes WHERE pass_type_identifier = ? AND serial_number = ?",
        )
        .bind(pass_type_identifier)
        .bind(serial_number)
        .fetch_optional(self.pool())
        .await?;

        Ok(pass)
    }

    /// Delete a pass. Registrations and logs go with it.
    ///
    /// Returns `true` if a row was deleted.
    pub async fn delete_pass(&self, id: i64) -> Result<bool, DatabaseError> {
        let result = sqlx::query("DELETE FROM passes WHERE id = ?")
            .bind(id)
            .execute(self.pool())
            .await?;

        Ok(result.rows_affected() > 0)
    }

    // =========================================================================
    // Registration queries
    // =========================================================================

    /// Get the registration of `pass_id` on a device, if any.
    pub async fn get_registration(
        &self,
        device_library_identifier: &str,
        pass_id: i64,
    ) -> Result<Option<Registration>, DatabaseError> {
        let registration = sqlx::query_as::<_, Registration>(
            "SELECT * FROM registrations WHERE device_library_identifier = ? AND pass_id = ?",
        )
        .bind(device_library_identifier)
        .bind(pass_id)
        .fetch_optional(self.pool())
        .await?;

        Ok(registration)
    }

    /// Register a device for updates to `pass_id`.
    ///
    /// Returns `false` when the device was already registered; the existing
    /// row is left untouched.
    pub async fn create_registration(
        &self,
        device_library_identifier: &str,
        push_token: &str,
        pass_id: i64,
    ) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            "INSERT INTO registrations (device_library_identifier, push_token, pass_id, created_at) \
             VALUES (?, ?, ?, ?) \
             ON CONFLICT(device_library_identifier, pass_id) DO NOTHING",
        )
        .bind(device_library_identifier)
        .bind(push_token)
        .bind(pass_id)
        .bind(unix_timestamp())
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Remove a device's registration for `pass_id`.
    ///
    /// Returns `true` if a row was deleted.
    pub async fn delete_registration(
        &self,
        device_library_identifier: &str,
        pass_id: i64,
    ) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            "DELETE FROM registrations WHERE device_library_identifier = ? AND pass_id = ?",
        )
        .bind(device_library_identifier)
        .bind(pass_id)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// All registrations for one pass.
    pub async fn registrations_for_pass(
        &self,
        pass_id: i64,
    ) -> Result<Vec<Registration>, DatabaseError> {
        let registrations = sqlx::query_as::<_, Registration>(
            "SELECT * FROM registrations WHERE pass_id = ? ORDER BY id",
        )
        .bind(pass_id)
        .fetch_all(self.pool())
        .await?;

        Ok(registrations)
    }

    /// Delete every registration holding `push_token` and return them.
    pub async fn delete_registrations_by_push_token(
        &self,
        push_token: &str,
    ) -> Result<Vec<Registration>, DatabaseError> {
        let removed = sqlx::query_as::<_, Registration>(
            "DELETE FROM registrations WHERE push_token = ? RETURNING *",
        )
        .bind(push_token)
        .fetch_all(self.pool())
        .await?;

        Ok(removed)
    }

    /// Whether a device holds any registration for passes of this type.
    pub async fn has_registrations(
        &self,
        device_library_identifier: &str,
        pass_type_identifier: &str,
    ) -> Result<bool, DatabaseError> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM registrations r JOIN passes p ON p.id = r.pass_id \
             WHERE r.device_library_identifier = ? AND p.pass_type_identifier = ?",
        )
        .bind(device_library_identifier)
        .bind(pass_type_identifier)
        .fetch_one(self.pool())
        .await?;

        Ok(count > 0)
    }

    /// Serial numbers and `updated_at` of the passes of one type registered
    /// on a device, optionally only those updated after `since` (micros).
    pub async fn registered_serials(
        &self,
        device_library_identifier: &str,
        pass_type_identifier: &str,
        since: Option<i64>,
    ) -> Result<Vec<SerialUpdate>, DatabaseError> {
        let rows = sqlx::query_as::<_, SerialUpdate>(
            "SELECT p.serial_number, p.updated_at FROM registrations r JOIN passes p ON p.id = r.pass_id \
             WHERE r.device_library_identifier = ? AND p.pass_type_identifier = ? \
             AND (? IS NULL OR p.updated_at > ?) \
             ORDER BY p.serial_number",
        )
        .bind(device_library_identifier)
        .bind(pass_type_identifier)
        .bind(since)
        .bind(since)
        .fetch_all(self.pool())
        .await?;

        Ok(rows)
    }
}

impl PassRepository for PassDatabase {
    async fn insert_pass(&self, pass: &NewPass<'_>) -> Result<Pass, DatabaseError> {
        self.create_pass(pass).await
    }

    async fn replace_pass(&self, id: i64, pass: &NewPass<'_>) -> Result<Pass, DatabaseError> {
        self.replace_pass_content(id, pass).await
    }
}
