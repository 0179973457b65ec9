// sqlx::Error -> AppError mapping

use dispatch_core::error::AppError;

/// Convert sqlx::Error to AppError with structured information
///
/// Unique violations become `AppError::Conflict` so callers can tell
/// "already exists" apart from a broken database.
pub(crate) fn map_sqlx_error(err: sqlx::Error) -> AppError {
    match &err {
        sqlx::Error::Database(db_err) => {
            let Some(code) = db_err.code() else {
                return AppError::Database(format!("Database error: {}", db_err.message()));
            };

            // SQLite error codes: https://www.sqlite.org/rescode.html
            match code.as_ref() {
                // SQLITE_CONSTRAINT_UNIQUE / SQLITE_CONSTRAINT_PRIMARYKEY
                "2067" | "1555" => AppError::Conflict(format!(
                    "Unique constraint violation: {}",
                    db_err.message()
                )),
                // SQLITE_CONSTRAINT_CHECK
                "275" => AppError::Database(format!(
                    "Check constraint violation: {}",
                    db_err.message()
                )),
                "5" => AppError::Database(format!(
                    "Database locked (SQLITE_BUSY): {}",
                    db_err.message()
                )),
                "13" => AppError::Database(format!("Database full: {}", db_err.message())),
                other => AppError::Database(format!(
                    "Database error [{}]: {}",
                    other,
                    db_err.message()
                )),
            }
        }
        sqlx::Error::RowNotFound => AppError::Database("Row not found".to_string()),
        sqlx::Error::ColumnNotFound(col) => {
            AppError::Database(format!("Column not found: {}", col))
        }
        // Connection, pool, protocol errors
        _ => AppError::Database(err.to_string()),
    }
}

/// Stored integer that must fit a u32 (attempt counters)
pub(crate) fn to_u32(value: i64, column: &str) -> Result<u32, AppError> {
    u32::try_from(value)
        .map_err(|_| AppError::Database(format!("Corrupt {} value: {}", column, value)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_u32_rejects_negative() {
        assert_eq!(to_u32(3, "attempts").unwrap(), 3);
        assert!(to_u32(-1, "attempts").is_err());
    }

    #[test]
    fn test_row_not_found_maps_to_database() {
        assert!(matches!(
            map_sqlx_error(sqlx::Error::RowNotFound),
            AppError::Database(_)
        ));
    }
}
