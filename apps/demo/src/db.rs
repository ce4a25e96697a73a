//! Simulated slow database used as the pooled resource.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use queuepool::{ResourceFactory, Result};

/// Rows the demo "database" returns for every `query_all`.
#[derive(Debug, Clone, Default)]
pub struct Tables {
    pub users: Vec<String>,
    pub occupations: Vec<String>,
    pub departments: Vec<String>,
    pub tasks: Vec<String>,
}

impl Tables {
    /// Small fixed data set.
    pub fn seeded() -> Self {
        let names = |items: &[&str]| items.iter().map(ToString::to_string).collect();
        Self {
            users: names(&["ada", "grace", "linus"]),
            occupations: names(&["engineer", "operator"]),
            departments: names(&["platform", "storage"]),
            tasks: names(&["rotate keys", "vacuum"]),
        }
    }

    pub fn row_count(&self) -> usize {
        self.users.len() + self.occupations.len() + self.departments.len() + self.tasks.len()
    }
}

/// An open session to the simulated database.
#[derive(Debug)]
pub struct Connection {
    pub id: u64,
    pub opened_at: DateTime<Utc>,
    tables: Arc<Tables>,
}

impl Connection {
    /// Read every table, then keep the connection busy for `hold`.
    pub async fn query_all(&self, hold: Duration) -> Tables {
        tracing::debug!(connection = self.id, rows = self.tables.row_count(), "SELECT * (4 tables)");
        tokio::time::sleep(hold).await;
        (*self.tables).clone()
    }
}

/// Factory that opens [`Connection`]s after a simulated handshake.
#[derive(Debug)]
pub struct SimulatedDatabase {
    name: String,
    handshake: Duration,
    tables: Arc<Tables>,
    next_id: AtomicU64,
}

impl SimulatedDatabase {
    pub fn new(name: impl Into<String>, handshake: Duration) -> Self {
        Self {
            name: name.into(),
            handshake,
            tables: Arc::new(Tables::seeded()),
            next_id: AtomicU64::new(1),
        }
    }
}

#[async_trait]
impl ResourceFactory for SimulatedDatabase {
    type Resource = Connection;

    fn id(&self) -> &str {
        &self.name
    }

    async fn create(&self) -> Result<Connection> {
        tokio::time::sleep(self.handshake).await;
        Ok(Connection {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            opened_at: Utc::now(),
            tables: Arc::clone(&self.tables),
        })
    }

    async fn destroy(&self, conn: Connection) -> Result<()> {
        tracing::debug!(
            connection = conn.id,
            age_ms = (Utc::now() - conn.opened_at).num_milliseconds(),
            "Connection closed"
        );
        Ok(())
    }
}
