use std::fmt;
use anyhow::{Context, Result};
use serde::Serialize;
use uuid::Uuid;
use shared::types::{SrvRecord, TargetFields};
use crate::cloudflare::{CloudflareClient, ProviderError};
use crate::store_manager::StoreHandle;

/// What happened to one source record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum RecordDetail {
    #[serde(rename_all = "camelCase")]
    Created {
        external_key: String,
        target_id: Uuid,
        dns_record: String,
        target_host: String,
        target_port: u16,
    },
    #[serde(rename_all = "camelCase")]
    Updated {
        external_key: String,
        target_id: Uuid,
        dns_record: String,
        target_host: String,
        target_port: u16,
    },
    #[serde(rename_all = "camelCase")]
    Unchanged {
        external_key: String,
        target_id: Uuid,
    },
    #[serde(rename_all = "camelCase")]
    Failed {
        external_key: String,
        error: String,
    },
}

impl fmt::Display for RecordDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordDetail::Created { dns_record, target_host, target_port, .. } => {
                write!(f, "{dns_record} ({target_host}:{target_port}) - created")
            }
            RecordDetail::Updated { dns_record, target_host, target_port, .. } => {
                write!(f, "{dns_record} ({target_host}:{target_port}) - updated")
            }
            RecordDetail::Unchanged { external_key, .. } => write!(f, "{external_key} - unchanged"),
            RecordDetail::Failed { external_key, error } => write!(f, "{external_key} - failed: {error}"),
        }
    }
}

/// Summary of one reconciliation run. Partial success is normal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    pub total_records: usize,
    pub created_count: usize,
    pub updated_count: usize,
    pub unchanged_count: usize,
    pub failed_count: usize,
    pub details: Vec<RecordDetail>,
}

impl ReconcileReport {
    fn push(&mut self, detail: RecordDetail) {
        match &detail {
            RecordDetail::Created { .. } => self.created_count += 1,
            RecordDetail::Updated { .. } => self.updated_count += 1,
            RecordDetail::Unchanged { .. } => self.unchanged_count += 1,
            RecordDetail::Failed { .. } => self.failed_count += 1,
        }
        self.details.push(detail);
    }
}

/// Upsert local targets from provider records, keyed by external key.
///
/// Records are handled one at a time; a failing record is reported and the
/// rest still run. Targets missing from `records` are never deleted, and an
/// existing target only ever has its destination host and port changed.
pub async fn reconcile(store: &StoreHandle, records: &[SrvRecord]) -> ReconcileReport {
    let mut report = ReconcileReport {
        total_records: records.len(),
        ..ReconcileReport::default()
    };

    for record in records {
        let detail = match reconcile_one(store, record).await {
            Ok(detail) => detail,
            Err(e) => {
                tracing::warn!("Failed to reconcile record {}: {:#}", record.external_key, e);
                RecordDetail::Failed {
                    external_key: record.external_key.clone(),
                    error: format!("{e:#}"),
                }
            }
        };
        tracing::debug!("{}", detail);
        report.push(detail);
    }

    tracing::info!(
        "Reconciled {} records: {} created, {} updated, {} unchanged, {} failed",
        report.total_records,
        report.created_count,
        report.updated_count,
        report.unchanged_count,
        report.failed_count
    );

    report
}

async fn reconcile_one(store: &StoreHandle, record: &SrvRecord) -> Result<RecordDetail> {
    let record = record.validate()?;

    let existing = store
        .find_by_external_key(record.external_key.clone())
        .await
        .context("Failed to look up target")?;

    match existing {
        Some(target) => {
            let changed = store
                .update_destination(target.id, record.target_host.clone(), record.target_port)
                .await
                .context("Failed to update target")?;

            if !changed {
                return Ok(RecordDetail::Unchanged {
                    external_key: record.external_key.clone(),
                    target_id: target.id,
                });
            }

            Ok(RecordDetail::Updated {
                external_key: record.external_key.clone(),
                target_id: target.id,
                dns_record: target.dns_record,
                target_host: record.target_host.clone(),
                target_port: record.target_port,
            })
        }
        None => {
            let fields = TargetFields {
                name: record.domain.clone(),
                dns_record: record.domain.clone(),
                target_host: record.target_host.clone(),
                target_port: record.target_port,
                poll_host: None,
            };
            let target = store
                .create(fields, Some(record.external_key.clone()))
                .await
                .context("Failed to create target")?;

            Ok(RecordDetail::Created {
                external_key: record.external_key.clone(),
                target_id: target.id,
                dns_record: target.dns_record,
                target_host: target.target_host,
                target_port: target.target_port,
            })
        }
    }
}

/// Pull Minecraft SRV records from the provider and reconcile them.
/// Only a failure to list records aborts the import.
pub async fn import(
    provider: &CloudflareClient,
    store: &StoreHandle,
    domain: Option<&str>,
) -> Result<ReconcileReport, ProviderError> {
    tracing::info!(
        "Importing SRV records from Cloudflare{}",
        domain.map(|d| format!(" (domain: {d})")).unwrap_or_default()
    );

    let records = provider.list_srv_records(domain).await?;
    if records.is_empty() {
        tracing::info!("No Minecraft SRV records found");
    }

    Ok(reconcile(store, &records).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::db::StoreDb;

    fn store() -> StoreHandle {
        StoreHandle::spawn(StoreDb::open(":memory:").unwrap())
    }

    fn record(key: &str, domain: &str, host: &str, port: u16) -> SrvRecord {
        SrvRecord {
            external_key: key.to_string(),
            domain: domain.to_string(),
            target_host: host.to_string(),
            target_port: port,
        }
    }

    #[tokio::test]
    async fn test_creates_target_in_empty_registry() {
        let store = store();
        let report = reconcile(&store, &[record("r1", "mc1.example.com", "10.0.0.1", 25565)]).await;

        assert_eq!(report.created_count, 1);
        assert_eq!(report.updated_count, 0);

        let targets = store.list().await.unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].external_key.as_deref(), Some("r1"));
        assert_eq!(targets[0].dns_record, "mc1.example.com");
        assert_eq!(targets[0].name, "mc1.example.com");
        assert_eq!(targets[0].target_host, "10.0.0.1");
        assert_eq!(targets[0].target_port, 25565);
    }

    #[tokio::test]
    async fn test_port_change_updates_in_place() {
        let store = store();
        reconcile(&store, &[record("r1", "mc1.example.com", "10.0.0.1", 25565)]).await;
        let before = store.list().await.unwrap().remove(0);

        let report = reconcile(&store, &[record("r1", "mc1.example.com", "10.0.0.1", 25566)]).await;
        assert_eq!(report.created_count, 0);
        assert_eq!(report.updated_count, 1);

        let targets = store.list().await.unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].id, before.id);
        assert_eq!(targets[0].external_key.as_deref(), Some("r1"));
        assert_eq!(targets[0].target_port, 25566);
    }

    #[tokio::test]
    async fn test_second_run_is_idempotent() {
        let store = store();
        let records = vec![
            record("r1", "mc1.example.com", "10.0.0.1", 25565),
            record("r2", "mc2.example.com", "10.0.0.2", 25566),
        ];

        reconcile(&store, &records).await;
        let first = store.list().await.unwrap();

        let report = reconcile(&store, &records).await;
        assert_eq!(report.created_count, 0);
        assert_eq!(report.updated_count, 0);
        assert_eq!(report.unchanged_count, 2);
        assert_eq!(store.list().await.unwrap(), first);
    }

    #[tokio::test]
    async fn test_never_deletes_or_renames() {
        let store = store();
        let manual = store
            .create(
                TargetFields {
                    name: "Hand made".to_string(),
                    dns_record: "manual.example.com".to_string(),
                    target_host: "10.0.0.9".to_string(),
                    target_port: 25565,
                    poll_host: None,
                },
                None,
            )
            .await
            .unwrap();

        reconcile(&store, &[record("r1", "mc1.example.com", "10.0.0.1", 25565)]).await;
        let imported = store.find_by_external_key("r1".to_string()).await.unwrap().unwrap();

        let mut renamed = TargetFields {
            name: "Survival".to_string(),
            dns_record: "play.example.com".to_string(),
            target_host: imported.target_host.clone(),
            target_port: imported.target_port,
            poll_host: None,
        };
        store.update(imported.id, renamed.clone()).await.unwrap();

        // r1 moves host, and the source set no longer lists anything else
        reconcile(&store, &[record("r1", "mc1.example.com", "10.0.0.5", 25565)]).await;

        let after = store.get(imported.id).await.unwrap().unwrap();
        renamed.target_host = "10.0.0.5".to_string();
        assert_eq!(after.name, renamed.name);
        assert_eq!(after.dns_record, renamed.dns_record);
        assert_eq!(after.target_host, renamed.target_host);

        reconcile(&store, &[]).await;
        assert!(store.get(manual.id).await.unwrap().is_some());
        assert!(store.get(imported.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_bad_record_does_not_block_others() {
        let store = store();
        let report = reconcile(
            &store,
            &[
                record("r1", "mc1.example.com", "10.0.0.1", 0),
                record("r2", "", "10.0.0.2", 25565),
                record("r3", "mc3.example.com", "10.0.0.3", 25565),
            ],
        )
        .await;

        assert_eq!(report.total_records, 3);
        assert_eq!(report.failed_count, 2);
        assert_eq!(report.created_count, 1);
        assert!(matches!(&report.details[0], RecordDetail::Failed { external_key, .. } if external_key == "r1"));

        let targets = store.list().await.unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].external_key.as_deref(), Some("r3"));
    }

    #[tokio::test]
    async fn test_padded_record_is_stored_trimmed() {
        let store = store();
        let report = reconcile(&store, &[record(" r1 ", " mc1.example.com ", "10.0.0.1\t", 25565)]).await;
        assert_eq!(report.created_count, 1);

        let target = store.find_by_external_key("r1".to_string()).await.unwrap().unwrap();
        assert_eq!(target.dns_record, "mc1.example.com");
        assert_eq!(target.name, "mc1.example.com");
        assert_eq!(target.target_host, "10.0.0.1");

        let report = reconcile(&store, &[record("r1", "mc1.example.com", " 10.0.0.1", 25565)]).await;
        assert_eq!(report.unchanged_count, 1);
    }

    #[test]
    fn test_detail_display() {
        let detail = RecordDetail::Updated {
            external_key: "r1".to_string(),
            target_id: Uuid::nil(),
            dns_record: "mc1.example.com".to_string(),
            target_host: "10.0.0.1".to_string(),
            target_port: 25566,
        };
        assert_eq!(detail.to_string(), "mc1.example.com (10.0.0.1:25566) - updated");
    }
}
