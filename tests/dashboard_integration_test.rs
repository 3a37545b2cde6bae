//! Integration tests for the upstream client and dashboard store
//!
//! Everything runs against the scripted FakeTransport under a paused clock.

#[cfg(test)]
mod dashboard_integration_tests {
    use serde_json::{json, Value};
    use std::sync::Arc;
    use std::time::Duration;
    use tokenwatch::config::Config;
    use tokenwatch::test_utils::{enhanced_transfer, fake_client, supply_result, FakeTransport};
    use tokenwatch::types::{TokenSupply, TopHolder};
    use tokenwatch::{DashboardStore, UpstreamError};

    const MINT: &str = "So11111111111111111111111111111111111111112";
    const WALLET_A: &str = "9WzDXwBbmkg8ZTbNMqUxvQRAyrZzDsGYdLVL9zYtAWWM";
    const WALLET_B: &str = "7xKXtg2CW87d97TXJSDpbD5jBkheTqA83TZRuJosgAsU";

    fn holder(rank: usize, owner: &str, balance: f64) -> TopHolder {
        TopHolder {
            rank,
            owner: owner.to_string(),
            token_account: format!("ata-{}", rank),
            balance,
            percentage: balance / 100_000_000.0 * 100.0,
        }
    }

    fn hundred_million() -> TokenSupply {
        TokenSupply {
            amount: 100_000_000_000_000,
            decimals: 6,
            ui_amount: 100_000_000.0,
        }
    }

    fn token_accounts(balance: f64) -> Value {
        json!({
            "context": {"slot": 1},
            "value": [{
                "pubkey": "ataWallet",
                "account": {"data": {"parsed": {"info": {
                    "mint": MINT,
                    "owner": WALLET_B,
                    "tokenAmount": {"amount": "0", "decimals": 6, "uiAmount": balance}
                }}}}
            }]
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_wallet_holding_one_percent() {
        let fake = FakeTransport::new();
        fake.always(FakeTransport::rpc_key("getTokenAccountsByOwner"), Ok(token_accounts(1_000_000.0)));
        fake.always(
            FakeTransport::get_key(&format!("/addresses/{}/transactions", WALLET_B)),
            Ok(json!([])),
        );
        let client = fake_client(fake, Config::default());

        let info = client
            .fetch_wallet_info(WALLET_B, &[], &hundred_million())
            .await
            .unwrap();
        assert!((info.percentage - 1.0).abs() < 1e-9);
        assert_eq!(info.rank, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wallet_rank_from_holders() {
        let fake = FakeTransport::new();
        fake.always(FakeTransport::rpc_key("getTokenAccountsByOwner"), Ok(token_accounts(30_000_000.0)));
        fake.always(
            FakeTransport::get_key(&format!("/addresses/{}/transactions", WALLET_B)),
            Ok(json!([
                enhanced_transfer("s1", 100, WALLET_B, WALLET_A, MINT, 10.0),
                enhanced_transfer("s2", 200, WALLET_A, WALLET_B, MINT, 30.0)
            ])),
        );
        let client = fake_client(fake, Config::default());
        let holders = vec![
            holder(1, WALLET_A, 40_000_000.0),
            holder(2, WALLET_B, 30_000_000.0),
            holder(3, "CWallet", 10_000_000.0),
        ];

        let info = client
            .fetch_wallet_info(WALLET_B, &holders, &hundred_million())
            .await
            .unwrap();
        assert_eq!(info.rank, Some(2));
        assert!(info.is_top_holder);
        assert!((info.percentage - 30.0).abs() < 1e-9);
        assert_eq!(info.transaction_count, 2);
        assert_eq!(info.last_transaction, Some(200));
        assert_eq!(info.total_volume, 40.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wallet_history_failure_only_zeroes_activity() {
        let fake = FakeTransport::new();
        fake.always(FakeTransport::rpc_key("getTokenAccountsByOwner"), Ok(token_accounts(2_000_000.0)));
        let client = fake_client(fake, Config::default());

        let info = client
            .fetch_wallet_info(WALLET_B, &[], &hundred_million())
            .await
            .unwrap();
        assert!((info.percentage - 2.0).abs() < 1e-9);
        assert_eq!(info.transaction_count, 0);
        assert_eq!(info.last_transaction, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_parse_transactions_skips_failed_sub_batch() {
        let fake = FakeTransport::new();
        fake.handle(FakeTransport::post_key("/transactions"), |body| {
            let sigs: Vec<String> = body["transactions"]
                .as_array()
                .map(|a| a.iter().filter_map(|s| s.as_str().map(str::to_string)).collect())
                .unwrap_or_default();
            if sigs.iter().any(|s| s == "sig6") {
                return Err(UpstreamError::Http {
                    endpoint: "/transactions".to_string(),
                    status: 500,
                    body: "internal error".to_string(),
                });
            }
            Ok(Value::Array(
                sigs.iter()
                    .map(|s| enhanced_transfer(s, 1, "a", "b", MINT, 1.0))
                    .collect(),
            ))
        });
        let mut config = Config::default();
        config.parsing.sub_batch_size = 2;
        let client = fake_client(fake.clone(), config);

        let sigs: Vec<String> = (1..=7).map(|i| format!("sig{}", i)).collect();
        let records = client.parse_transactions(&sigs).await;

        // Sub-batches: [1,2] [3,4] [5,6] [7]; the third fails on every attempt.
        let parsed: Vec<&str> = records.iter().map(|r| r.signature.as_str()).collect();
        assert_eq!(parsed, vec!["sig1", "sig2", "sig3", "sig4", "sig7"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_parse_seven_signatures_third_sub_batch_failing() {
        let fake = FakeTransport::new();
        let key = FakeTransport::post_key("/transactions");
        let page = |sigs: &[&str]| {
            Ok(Value::Array(
                sigs.iter()
                    .map(|s| enhanced_transfer(s, 1, "a", "b", MINT, 1.0))
                    .collect(),
            ))
        };
        fake.push(key.clone(), page(&["s1", "s2", "s3"]));
        fake.push(key.clone(), page(&["s4", "s5", "s6"]));
        fake.always(
            key.clone(),
            Err(UpstreamError::Http {
                endpoint: "/transactions".to_string(),
                status: 500,
                body: "internal error".to_string(),
            }),
        );
        let client = fake_client(fake.clone(), Config::default());

        let sigs: Vec<String> = (1..=7).map(|i| format!("s{}", i)).collect();
        let records = client.parse_transactions(&sigs).await;
        assert_eq!(records.len(), 6);
        // The failing sub-batch was retried by the governor before being skipped.
        assert_eq!(fake.call_count(&key), 2 + 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sub_batches_are_spaced() {
        let fake = FakeTransport::new();
        fake.always(FakeTransport::post_key("/transactions"), Ok(json!([])));
        let client = fake_client(fake, Config::default());

        let sigs: Vec<String> = (0..9).map(|i| format!("s{}", i)).collect();
        let started = tokio::time::Instant::now();
        client.parse_transactions(&sigs).await;
        assert!(started.elapsed() >= Duration::from_millis(2000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_filters_meaningless_transactions() {
        let fake = FakeTransport::new();
        let mut unknown = enhanced_transfer("u1", 3, "a", "b", MINT, 1.0);
        unknown["type"] = json!("UNKNOWN");
        let mut undescribed = enhanced_transfer("d1", 2, "a", "b", MINT, 1.0);
        undescribed["description"] = json!("");
        let mut no_transfers = enhanced_transfer("n1", 1, "a", "b", MINT, 1.0);
        no_transfers["tokenTransfers"] = json!([]);

        fake.always(
            FakeTransport::get_key(&format!("/addresses/{}/transactions", MINT)),
            Ok(json!([
                unknown,
                enhanced_transfer("ok", 4, "a", "b", MINT, 1.0),
                undescribed,
                no_transfers
            ])),
        );
        let config = Config::default();
        let store = DashboardStore::new(fake_client(fake, config.clone()), config.polling);

        assert_eq!(store.poll_transactions(10).await.unwrap(), 1);
        assert_eq!(store.state().transactions.signatures(), vec!["ok"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_lookup_without_snapshot() {
        let fake = FakeTransport::new();
        fake.always(FakeTransport::rpc_key("getTokenSupply"), Ok(supply_result(100_000_000.0, 6)));
        fake.always(
            FakeTransport::rpc_key("getTokenLargestAccounts"),
            Ok(json!({"value": [
                {"address": "ataTop", "amount": "1", "decimals": 6, "uiAmount": 9_000_000.0},
                {"address": "ataWallet", "amount": "1", "decimals": 6, "uiAmount": 3_000_000.0}
            ]})),
        );
        fake.always(
            FakeTransport::rpc_key("getMultipleAccounts"),
            Ok(json!({"value": [
                {"data": {"parsed": {"info": {"owner": WALLET_A}}}},
                {"data": {"parsed": {"info": {"owner": WALLET_B}}}}
            ]})),
        );
        fake.always(FakeTransport::rpc_key("getTokenAccountsByOwner"), Ok(token_accounts(3_000_000.0)));
        fake.always(
            FakeTransport::get_key(&format!("/addresses/{}/transactions", WALLET_B)),
            Ok(json!([])),
        );
        let config = Config::default();
        let store = Arc::new(DashboardStore::new(fake_client(fake, config.clone()), config.polling));

        let info = store.lookup_wallet(WALLET_B).await.unwrap();
        assert_eq!(info.rank, Some(2));
        assert!((info.percentage - 3.0).abs() < 1e-9);
    }
}
