//! The statement seam between the transaction manager and a database driver.

use crate::error::BoxError;
use crate::isolation::IsolationLevel;

/// Statements a database session must be able to run for transactions.
///
/// Every method has a default built on [`execute`](Self::execute) with the
/// common SQL spelling. Drivers override the ones their dialect spells
/// differently.
pub trait TransactionDriver {
    /// Execute a statement that returns no rows.
    fn execute(&mut self, sql: &str) -> Result<(), BoxError>;

    /// Whether [`begin_isolated_db_transaction`](Self::begin_isolated_db_transaction)
    /// is supported.
    fn supports_transaction_isolation(&self) -> bool {
        false
    }

    /// Open a real transaction.
    fn begin_db_transaction(&mut self) -> Result<(), BoxError> {
        self.execute("BEGIN")
    }

    /// Open a real transaction with the given isolation level.
    fn begin_isolated_db_transaction(&mut self, isolation: IsolationLevel) -> Result<(), BoxError> {
        self.execute(isolation.as_sql())?;
        self.begin_db_transaction()
    }

    /// Commit the real transaction.
    fn commit_db_transaction(&mut self) -> Result<(), BoxError> {
        self.execute("COMMIT")
    }

    /// Roll back the real transaction.
    fn rollback_db_transaction(&mut self) -> Result<(), BoxError> {
        self.execute("ROLLBACK")
    }

    /// Create a named savepoint.
    fn create_savepoint(&mut self, name: &str) -> Result<(), BoxError> {
        self.execute(&format!("SAVEPOINT {name}"))
    }

    /// Release a named savepoint, keeping its changes.
    fn release_savepoint(&mut self, name: &str) -> Result<(), BoxError> {
        self.execute(&format!("RELEASE SAVEPOINT {name}"))
    }

    /// Undo everything since a named savepoint.
    fn rollback_to_savepoint(&mut self, name: &str) -> Result<(), BoxError> {
        self.execute(&format!("ROLLBACK TO SAVEPOINT {name}"))
    }
}

impl<D: TransactionDriver + ?Sized> TransactionDriver for Box<D> {
    fn execute(&mut self, sql: &str) -> Result<(), BoxError> {
        (**self).execute(sql)
    }

    fn supports_transaction_isolation(&self) -> bool {
        (**self).supports_transaction_isolation()
    }

    fn begin_db_transaction(&mut self) -> Result<(), BoxError> {
        (**self).begin_db_transaction()
    }

    fn begin_isolated_db_transaction(&mut self, isolation: IsolationLevel) -> Result<(), BoxError> {
        (**self).begin_isolated_db_transaction(isolation)
    }

    fn commit_db_transaction(&mut self) -> Result<(), BoxError> {
        (**self).commit_db_transaction()
    }

    fn rollback_db_transaction(&mut self) -> Result<(), BoxError> {
        (**self).rollback_db_transaction()
    }

    fn create_savepoint(&mut self, name: &str) -> Result<(), BoxError> {
        (**self).create_savepoint(name)
    }

    fn release_savepoint(&mut self, name: &str) -> Result<(), BoxError> {
        (**self).release_savepoint(name)
    }

    fn rollback_to_savepoint(&mut self, name: &str) -> Result<(), BoxError> {
        (**self).rollback_to_savepoint(name)
    }
}
