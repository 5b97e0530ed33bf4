//! Store Module Tests
//!
//! ## Test Scopes
//! - **InMemoryTableStore**: conditional replace semantics, paging, table lifecycle.
//! - **HTTP round trip**: `HttpTableStore` against the axum router, including
//!   the status code mapping back to `StoreError`.

#[cfg(test)]
mod tests {
    use crate::store::TableStore;
    use crate::store::handlers::router;
    use crate::store::http::HttpTableStore;
    use crate::store::memory::InMemoryTableStore;
    use crate::store::types::*;
    use std::sync::Arc;
    use std::time::Duration;

    const TABLE: &str = "leases";

    fn props(owner: &str) -> Properties {
        let mut properties = Properties::new();
        properties.insert("NodeID".to_string(), PropertyValue::from(owner));
        properties
    }

    async fn store_with_rows(page_size: usize, count: usize) -> InMemoryTableStore {
        let store = InMemoryTableStore::with_page_size(page_size);
        store.create_table_if_absent(TABLE).await.unwrap();
        for i in 0..count {
            let key = RowKey::new(format!("x{:04x}", i), "0");
            store.insert_if_absent(TABLE, &key, props("none")).await.unwrap();
        }
        store
            .insert_if_absent(TABLE, &RowKey::new("Control", "Created"), Properties::new())
            .await
            .unwrap();
        store
    }

    // ============================================================
    // TEST 1: Conditional Replace
    // ============================================================

    #[tokio::test]
    async fn test_only_one_writer_wins_with_same_token() {
        // ARRANGE: One row, many writers holding its initial token
        let store = Arc::new(InMemoryTableStore::new());
        store.create_table_if_absent(TABLE).await.unwrap();
        let key = RowKey::new("x0000", "0");
        let token = store
            .insert_if_absent(TABLE, &key, props("none"))
            .await
            .unwrap()
            .unwrap();

        // ACT: Race them
        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            let key = key.clone();
            let token = token.clone();
            handles.push(tokio::spawn(async move {
                store
                    .conditional_replace(TABLE, &key, &token, props(&format!("N{:03}", i)))
                    .await
            }));
        }

        let mut won = 0;
        let mut conflicts = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => won += 1,
                Err(e) => {
                    assert!(e.is_conflict());
                    conflicts += 1;
                }
            }
        }

        // ASSERT
        assert_eq!(won, 1);
        assert_eq!(conflicts, 7);
    }

    #[tokio::test]
    async fn test_replace_with_stale_token_fails() {
        let store = store_with_rows(10, 1).await;
        let key = RowKey::new("x0000", "0");
        let rows = store.scan_all(TABLE, &KeyFilter::partition("x0000")).await.unwrap();
        let original = rows[0].token.clone();

        let fresh = store
            .conditional_replace(TABLE, &key, &original, props("N001"))
            .await
            .unwrap();
        assert_ne!(fresh, original);

        let result = store
            .conditional_replace(TABLE, &key, &original, props("N002"))
            .await;
        assert_eq!(result, Err(StoreError::PreconditionFailed(key.clone())));

        // Renewing with the token we got back keeps working
        assert!(store
            .conditional_replace(TABLE, &key, &fresh, props("N001"))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_wildcard_replaces_any_version_but_not_missing_rows() {
        let store = store_with_rows(10, 1).await;
        let key = RowKey::new("x0000", "0");

        assert!(store
            .conditional_replace(TABLE, &key, &ConcurrencyToken::wildcard(), props("kicked"))
            .await
            .is_ok());

        let missing = RowKey::new("x00ff", "0");
        let result = store
            .conditional_replace(TABLE, &missing, &ConcurrencyToken::wildcard(), props("kicked"))
            .await;
        assert_eq!(result, Err(StoreError::PreconditionFailed(missing)));
    }

    #[tokio::test]
    async fn test_insert_if_absent_does_not_overwrite() {
        let store = store_with_rows(10, 1).await;
        let key = RowKey::new("x0000", "0");

        let second = store.insert_if_absent(TABLE, &key, props("N001")).await.unwrap();

        assert!(second.is_none());
        let rows = store.scan_all(TABLE, &KeyFilter::partition("x0000")).await.unwrap();
        assert_eq!(rows[0].get_str("NodeID"), Some("none"));
    }

    // ============================================================
    // TEST 2: Scans and Table Lifecycle
    // ============================================================

    #[tokio::test]
    async fn test_scan_pages_through_range() {
        // ARRANGE: 5 partition rows, 2 per page, plus a control row
        let store = store_with_rows(2, 5).await;
        let filter = KeyFilter::range("x", "y");

        // ACT
        let first = store.scan(TABLE, &filter, None).await.unwrap();
        let second = store
            .scan(TABLE, &filter, first.continuation.as_ref())
            .await
            .unwrap();
        let all = store.scan_all(TABLE, &filter).await.unwrap();

        // ASSERT
        assert_eq!(first.rows.len(), 2);
        assert_eq!(first.continuation, Some(RowKey::new("x0001", "0")));
        assert_eq!(second.rows[0].key, RowKey::new("x0002", "0"));
        assert_eq!(all.len(), 5);
        assert!(all.iter().all(|row| row.key.partition_key != "Control"));
        assert!(all.windows(2).all(|pair| pair[0].key < pair[1].key));
    }

    #[tokio::test]
    async fn test_last_page_has_no_continuation() {
        let store = store_with_rows(5, 5).await;

        let page = store.scan(TABLE, &KeyFilter::range("x", "y"), None).await.unwrap();

        assert_eq!(page.rows.len(), 5);
        assert!(page.continuation.is_none());
    }

    #[tokio::test]
    async fn test_missing_table_is_reported() {
        let store = InMemoryTableStore::new();

        let result = store.scan(TABLE, &KeyFilter::range("x", "y"), None).await;

        assert_eq!(result.unwrap_err(), StoreError::TableNotFound(TABLE.to_string()));
    }

    #[tokio::test]
    async fn test_create_and_delete_table() {
        let store = InMemoryTableStore::new();

        assert!(store.create_table_if_absent(TABLE).await.unwrap());
        assert!(!store.create_table_if_absent(TABLE).await.unwrap());
        assert!(store.delete_table(TABLE).await.unwrap());
        assert!(!store.delete_table(TABLE).await.unwrap());
        assert!(!store.table_exists(TABLE));
    }

    // ============================================================
    // TEST 3: HTTP Round Trip
    // ============================================================

    async fn serve(store: Arc<InMemoryTableStore>) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(store)).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_http_store_round_trip() {
        // ARRANGE
        let backend = Arc::new(InMemoryTableStore::with_page_size(2));
        let url = serve(backend.clone()).await;
        let client = HttpTableStore::with_timeout(&url, Duration::from_secs(2));

        // ACT: Create, fill, page through
        assert!(client.create_table_if_absent(TABLE).await.unwrap());
        for i in 0..3 {
            let key = RowKey::new(format!("x{:04x}", i), "0");
            assert!(client.insert_if_absent(TABLE, &key, props("none")).await.unwrap().is_some());
        }
        let rows = client.scan_all(TABLE, &KeyFilter::range("x", "y")).await.unwrap();

        // ASSERT
        assert_eq!(rows.len(), 3);
        assert_eq!(backend.row_count(TABLE), 3);
        assert_eq!(rows[1].get_str("NodeID"), Some("none"));
    }

    #[tokio::test]
    async fn test_http_store_maps_conflicts_and_missing_tables() {
        let backend = Arc::new(InMemoryTableStore::new());
        let url = serve(backend.clone()).await;
        let client = HttpTableStore::new(&url);

        let missing = client.scan(TABLE, &KeyFilter::range("x", "y"), None).await;
        assert_eq!(missing.unwrap_err(), StoreError::TableNotFound(TABLE.to_string()));

        client.create_table_if_absent(TABLE).await.unwrap();
        let key = RowKey::new("x0000", "0");
        let token = client
            .insert_if_absent(TABLE, &key, props("none"))
            .await
            .unwrap()
            .unwrap();

        client
            .conditional_replace(TABLE, &key, &token, props("N001"))
            .await
            .unwrap();
        let stale = client
            .conditional_replace(TABLE, &key, &token, props("N002"))
            .await;

        assert_eq!(stale, Err(StoreError::PreconditionFailed(key)));
        assert!(client.delete_table(TABLE).await.unwrap());
    }

    #[tokio::test]
    async fn test_http_store_unreachable_server_is_unavailable() {
        // Nothing listens on this port once the listener is dropped
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = HttpTableStore::with_timeout(&format!("http://{}", addr), Duration::from_millis(200));
        let result = client.create_table_if_absent(TABLE).await;

        assert!(matches!(result, Err(StoreError::Unavailable(_))));
    }
}
