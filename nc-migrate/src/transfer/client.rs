//! The contract the engines use to talk to one server scope

use async_trait::async_trait;

use crate::api::ClientError;

use super::cancel::CancelFlag;
use super::catalog::EntityType;
use super::record::Record;

/// A server plus the service organisation that bounds what is visible there
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    pub server: String,
    pub service_org_id: i64,
}

impl Scope {
    pub fn new(server: impl Into<String>, service_org_id: i64) -> Self {
        Scope {
            server: server.into(),
            service_org_id,
        }
    }

    /// Check that the scope can be used for a run
    pub fn validate(&self) -> Result<(), String> {
        if self.server.trim().is_empty() {
            return Err("server address is empty".to_string());
        }
        if self.service_org_id <= 0 {
            return Err(format!(
                "service organization id must be positive, got {}",
                self.service_org_id
            ));
        }
        Ok(())
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (SO {})", self.server, self.service_org_id)
    }
}

/// One page of a listing
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub records: Vec<Record>,
    pub has_more: bool,
}

/// Typed read/create access to one scope
///
/// Authentication and base URL are bound when the client is built and are
/// invisible to callers. Pages are numbered from 1.
#[async_trait]
pub trait EntityClient: Send + Sync {
    fn scope(&self) -> &Scope;

    async fn list(&self, entity_type: EntityType, page: u32) -> Result<Page, ClientError>;

    /// Create a record and return its new identifier
    async fn create(&self, entity_type: EntityType, record: &Record) -> Result<String, ClientError>;
}

/// Fetch a complete listing, page by page
///
/// Returns `Ok(None)` when cancellation was requested between pages.
pub async fn fetch_all(
    client: &dyn EntityClient,
    entity_type: EntityType,
    cancel: &CancelFlag,
) -> Result<Option<Vec<Record>>, ClientError> {
    let mut records = Vec::new();
    let mut page_number = 1;

    loop {
        if cancel.is_cancelled() {
            return Ok(None);
        }

        let page = client.list(entity_type, page_number).await?;
        log::debug!(
            "Fetched page {} of {} from {}: {} records",
            page_number,
            entity_type,
            client.scope(),
            page.records.len()
        );
        records.extend(page.records);

        if !page.has_more {
            break;
        }
        page_number += 1;
    }

    Ok(Some(records))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ClientErrorKind;
    use serde_json::Map;
    use std::sync::Mutex;

    struct PagedClient {
        scope: Scope,
        pages: Vec<Vec<&'static str>>,
        requested: Mutex<Vec<u32>>,
        cancel_after: Option<(u32, CancelFlag)>,
    }

    #[async_trait]
    impl EntityClient for PagedClient {
        fn scope(&self) -> &Scope {
            &self.scope
        }

        async fn list(&self, entity_type: EntityType, page: u32) -> Result<Page, ClientError> {
            self.requested.lock().unwrap().push(page);
            if let Some((after, flag)) = &self.cancel_after {
                if page == *after {
                    flag.cancel();
                }
            }
            let index = (page - 1) as usize;
            let ids = self.pages.get(index).ok_or_else(|| {
                ClientError::new(ClientErrorKind::NotFound, "no such page")
            })?;
            Ok(Page {
                records: ids
                    .iter()
                    .map(|id| Record::new(entity_type, *id, Map::new()))
                    .collect(),
                has_more: index + 1 < self.pages.len(),
            })
        }

        async fn create(&self, _: EntityType, _: &Record) -> Result<String, ClientError> {
            Err(ClientError::new(ClientErrorKind::Permission, "read only"))
        }
    }

    fn client(pages: Vec<Vec<&'static str>>) -> PagedClient {
        PagedClient {
            scope: Scope::new("nc.example.com", 50),
            pages,
            requested: Mutex::new(Vec::new()),
            cancel_after: None,
        }
    }

    #[tokio::test]
    async fn test_fetch_all_pages_in_order() {
        let client = client(vec![vec!["1", "2"], vec!["3"]]);
        let records = fetch_all(&client, EntityType::Customer, &CancelFlag::new())
            .await
            .unwrap()
            .unwrap();

        let ids: Vec<_> = records.iter().map(|r| r.source_id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
        assert_eq!(*client.requested.lock().unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_fetch_all_stops_on_cancel() {
        let flag = CancelFlag::new();
        let mut client = client(vec![vec!["1"], vec!["2"], vec!["3"]]);
        client.cancel_after = Some((1, flag.clone()));

        let result = fetch_all(&client, EntityType::Customer, &flag).await.unwrap();
        assert!(result.is_none());
        assert_eq!(*client.requested.lock().unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn test_fetch_all_propagates_errors() {
        let client = client(vec![]);
        let err = fetch_all(&client, EntityType::Site, &CancelFlag::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ClientErrorKind::NotFound);
    }

    #[test]
    fn test_scope_validate() {
        assert!(Scope::new("nc.example.com", 50).validate().is_ok());
        assert!(Scope::new("  ", 50).validate().is_err());
        assert!(Scope::new("nc.example.com", 0).validate().is_err());
    }
}
