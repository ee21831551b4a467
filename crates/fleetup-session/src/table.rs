//! Table-based update session — one table partition per (fleet,
//! application).
//!
//! The partition holds a domain row, a modified-marker row, and one row
//! per enlisted instance. Mutual exclusion comes from atomic multi-row
//! batches with optimistic-concurrency preconditions: takeovers condition
//! on the domain row's version and trip over the marker row if anyone
//! enlisted since the read.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use fleetup_store::{BatchOp, CoordinationTable, StoreError, TableRow};

use crate::epoch_millis;
use crate::error::SessionResult;
use crate::session::UpdateSession;

/// Row key of the active-domain row.
pub const DOMAIN_ROW_KEY: &str = "update-domain";
/// Row key of the modified-marker row. Carries no payload; its version is
/// the optimistic-concurrency tripwire for takeovers.
pub const MODIFIED_ROW_KEY: &str = "update-modified";

/// Configuration for a table-based session.
#[derive(Debug, Clone)]
pub struct TableSessionConfig {
    /// Fleet scope; prefixes every partition so fleets never interfere.
    pub fleet_id: String,
    /// This node's instance id. Doubles as the instance row key.
    pub instance_id: String,
    /// The update domain this node belongs to.
    pub update_domain: String,
    /// Age after which an instance row no longer counts as enlisted.
    pub enlistment_ttl: Duration,
}

impl TableSessionConfig {
    pub fn new(
        fleet_id: impl Into<String>,
        instance_id: impl Into<String>,
        update_domain: impl Into<String>,
    ) -> Self {
        Self {
            fleet_id: fleet_id.into(),
            instance_id: instance_id.into(),
            update_domain: update_domain.into(),
            enlistment_ttl: Duration::from_secs(600),
        }
    }

    /// Set the enlistment staleness TTL.
    pub fn with_enlistment_ttl(mut self, ttl: Duration) -> Self {
        self.enlistment_ttl = ttl;
        self
    }
}

/// Update session over a transactional table partition.
pub struct TableUpdateSession<S> {
    store: S,
    config: TableSessionConfig,
}

impl<S: CoordinationTable> TableUpdateSession<S> {
    pub fn new(store: S, config: TableSessionConfig) -> Self {
        Self { store, config }
    }

    fn partition(&self, app_id: &str) -> String {
        format!("{}/{}", self.config.fleet_id, app_id)
    }

    /// Instance rows still counting as enlisted: younger than the TTL.
    /// A crashed instance's row ages out here instead of being evicted.
    fn live_instances<'a>(&self, rows: &'a [TableRow]) -> Vec<&'a TableRow> {
        let now = epoch_millis();
        let ttl = self.config.enlistment_ttl.as_millis() as u64;
        rows.iter()
            .filter(|r| r.row_key != DOMAIN_ROW_KEY && r.row_key != MODIFIED_ROW_KEY)
            .filter(|r| now.saturating_sub(r.timestamp) <= ttl)
            .collect()
    }

    fn own_row(&self) -> BatchOp {
        BatchOp::InsertOrReplace {
            row_key: self.config.instance_id.clone(),
            update_domain: self.config.update_domain.clone(),
        }
    }

    fn touch_marker() -> BatchOp {
        BatchOp::InsertOrReplace {
            row_key: MODIFIED_ROW_KEY.to_string(),
            update_domain: String::new(),
        }
    }
}

#[async_trait]
impl<S: CoordinationTable> UpdateSession for TableUpdateSession<S> {
    async fn try_start(&self, app_id: &str) -> SessionResult<bool> {
        let partition = self.partition(app_id);
        let rows = self.store.query_partition(&partition).await?;

        let domain_row = rows.iter().find(|r| r.row_key == DOMAIN_ROW_KEY);
        let modified_row = rows.iter().find(|r| r.row_key == MODIFIED_ROW_KEY);
        let ours = &self.config.update_domain;

        let batch = match domain_row {
            // First use: create the domain row (insert-if-absent, so a
            // concurrent creator wins the race) and touch the marker.
            None => vec![
                BatchOp::Insert {
                    row_key: DOMAIN_ROW_KEY.to_string(),
                    update_domain: ours.clone(),
                },
                Self::touch_marker(),
                self.own_row(),
            ],

            // Our domain is already active: enlist. The marker touch lets
            // concurrent takeover attempts detect the enlistment.
            Some(row) if row.update_domain == *ours => {
                vec![Self::touch_marker(), self.own_row()]
            }

            // Another domain is recorded. Refuse while it has live
            // enlistments; otherwise take the abandoned domain over.
            Some(row) => {
                let live = self.live_instances(&rows);
                let active = live
                    .iter()
                    .filter(|r| r.update_domain == row.update_domain)
                    .count();
                if active > 0 {
                    debug!(
                        %partition,
                        active_domain = %row.update_domain,
                        our_domain = %ours,
                        enlisted = active,
                        "refused: another update domain is rolling"
                    );
                    return Ok(false);
                }

                // Conditioning on the marker row closes the race where an
                // instance enlists into the old domain between our read
                // and this write.
                let tripwire = match modified_row {
                    Some(marker) => BatchOp::Replace {
                        row_key: MODIFIED_ROW_KEY.to_string(),
                        update_domain: String::new(),
                        if_version: marker.version,
                    },
                    None => BatchOp::Insert {
                        row_key: MODIFIED_ROW_KEY.to_string(),
                        update_domain: String::new(),
                    },
                };
                vec![
                    BatchOp::Replace {
                        row_key: DOMAIN_ROW_KEY.to_string(),
                        update_domain: ours.clone(),
                        if_version: row.version,
                    },
                    tripwire,
                    self.own_row(),
                ]
            }
        };

        match self.store.submit_batch(&partition, batch).await {
            Ok(()) => {}
            Err(e) if e.is_contention() => {
                debug!(%partition, error = %e, "lost the enlistment race");
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        }

        // Post-commit check: a concurrent batch may have moved the active
        // domain between our read and our write. If it did, back out.
        let after = self.store.query_partition(&partition).await?;
        let active = after
            .iter()
            .find(|r| r.row_key == DOMAIN_ROW_KEY)
            .map(|r| r.update_domain.as_str());
        if active != Some(ours.as_str()) {
            if let Err(e) = self
                .store
                .delete_row(&partition, &self.config.instance_id)
                .await
            {
                debug!(%partition, error = %e, "cleanup after lost race failed");
            }
            return Ok(false);
        }

        info!(
            %partition,
            domain = %ours,
            instance = %self.config.instance_id,
            "admitted to update session"
        );
        Ok(true)
    }

    async fn end(&self, app_id: &str) -> SessionResult<()> {
        let partition = self.partition(app_id);
        match self
            .store
            .delete_row(&partition, &self.config.instance_id)
            .await
        {
            Ok(()) => {
                info!(%partition, instance = %self.config.instance_id, "update session ended");
                Ok(())
            }
            // Never admitted (or already cleaned up); nothing to do.
            Err(StoreError::NotFound(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
