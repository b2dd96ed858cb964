use super::hierarchy::Registry;
use crate::connection::Connection;
use crate::core::Result;
use crate::result::Rows;
use crate::statement::{ExecutionOutcome, Select, Statement};
use log::debug;

/// Connection of one persister operation, logging statements through the
/// `relmap::sql` target when enabled.
pub(crate) struct Session<'r, 'c> {
    registry: &'r Registry,
    connection: &'c mut dyn Connection,
}

impl<'r, 'c> Session<'r, 'c> {
    pub fn new(registry: &'r Registry, connection: &'c mut dyn Connection) -> Self {
        Self {
            registry,
            connection,
        }
    }

    pub fn execute(&mut self, statement: impl Into<Statement>) -> Result<ExecutionOutcome> {
        let statement = statement.into();
        if self.registry.log_statements {
            debug!(target: "relmap::sql", "{}", self.registry.dialect.render(&statement));
        }
        Ok(self.connection.execute(&statement)?)
    }

    pub fn query(&mut self, select: &Select) -> Result<Rows> {
        if self.registry.log_statements {
            debug!(target: "relmap::sql", "{}", self.registry.dialect.render_select(select));
        }
        Ok(self.connection.query(select)?)
    }

    pub fn connection(&mut self) -> &mut dyn Connection {
        &mut *self.connection
    }
}
