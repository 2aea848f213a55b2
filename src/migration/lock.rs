//! Advisory-lock scope guard

use crate::executor::Connection;
use crate::migration::MigrationError;

/// Lock guard that automatically releases the lock when dropped
///
/// Holds the database advisory lock for the duration of one engine call so
/// concurrent migrators against the same database serialize. The lock is
/// released on every exit path, including early `?` returns.
pub struct MigrationLockGuard<'a> {
    conn: &'a mut dyn Connection,
}

impl<'a> MigrationLockGuard<'a> {
    /// Acquire the advisory lock and create guard
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::Database` if the lock cannot be taken.
    pub fn acquire(conn: &'a mut dyn Connection) -> Result<Self, MigrationError> {
        conn.lock()?;
        tracing::debug!(driver = %conn.kind(), "advisory lock acquired");
        Ok(Self { conn })
    }

    /// The locked connection
    pub fn conn(&mut self) -> &mut dyn Connection {
        &mut *self.conn
    }
}

impl Drop for MigrationLockGuard<'_> {
    fn drop(&mut self) {
        // Can't propagate from drop
        if let Err(e) = self.conn.unlock() {
            tracing::warn!(error = %e, "failed to release advisory lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DriverKind;
    use crate::executor::testing::RecordingConnection;

    #[test]
    fn test_lock_released_on_drop() {
        let mut conn = RecordingConnection::new(DriverKind::Postgres);
        {
            let mut guard = MigrationLockGuard::acquire(&mut conn).unwrap();
            guard.conn().execute("SELECT 1", &[]).unwrap();
        }
        assert_eq!(conn.journal.entries(), vec!["LOCK", "SELECT 1", "UNLOCK"]);
    }

    #[test]
    fn test_lock_released_on_early_return() {
        fn failing(conn: &mut dyn Connection) -> Result<(), MigrationError> {
            let mut guard = MigrationLockGuard::acquire(conn)?;
            guard.conn().execute("BROKEN", &[])?;
            Ok(())
        }

        let mut conn = RecordingConnection::new(DriverKind::Postgres).failing_on("BROKEN");
        assert!(failing(&mut conn).is_err());
        assert_eq!(conn.journal.entries().last().map(String::as_str), Some("UNLOCK"));
    }
}
