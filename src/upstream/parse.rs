//! Raw upstream response shapes and their conversion into domain records.
//!
//! Optional fields default at this boundary; anything that is not the
//! expected container shape is reported as [`UpstreamError::Malformed`].

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;

use crate::config::TokenConfig;
use crate::governor::UpstreamError;
use crate::types::{
    NativeTransfer, TokenAccountBalance, TokenMetadata, TokenSupply, TokenTransfer, TransactionKind,
    TransactionRecord,
};

/// Source label for records rebuilt from plain RPC data
pub const RPC_FALLBACK_SOURCE: &str = "SOLANA_RPC";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawEnhancedTransaction {
    signature: Option<String>,
    timestamp: Option<i64>,
    fee: Option<u64>,
    fee_payer: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    source: Option<String>,
    description: Option<String>,
    token_transfers: Option<Vec<RawTokenTransfer>>,
    native_transfers: Option<Vec<RawNativeTransfer>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawTokenTransfer {
    from_user_account: Option<String>,
    to_user_account: Option<String>,
    mint: Option<String>,
    token_amount: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawNativeTransfer {
    from_user_account: Option<String>,
    to_user_account: Option<String>,
    amount: Option<u64>,
}

impl From<RawEnhancedTransaction> for TransactionRecord {
    fn from(raw: RawEnhancedTransaction) -> Self {
        TransactionRecord {
            signature: raw.signature.unwrap_or_default(),
            timestamp: raw.timestamp.unwrap_or(0),
            fee: raw.fee.unwrap_or(0),
            fee_payer: raw.fee_payer.unwrap_or_default(),
            kind: TransactionKind::from_upstream(raw.kind.as_deref().unwrap_or("")),
            source: raw.source.unwrap_or_default(),
            description: raw.description.unwrap_or_default(),
            token_transfers: raw
                .token_transfers
                .unwrap_or_default()
                .into_iter()
                .map(|t| TokenTransfer {
                    from_user: t.from_user_account.unwrap_or_default(),
                    to_user: t.to_user_account.unwrap_or_default(),
                    mint: t.mint.unwrap_or_default(),
                    amount: t.token_amount.unwrap_or(0.0),
                })
                .collect(),
            native_transfers: raw
                .native_transfers
                .unwrap_or_default()
                .into_iter()
                .map(|t| NativeTransfer {
                    from_user: t.from_user_account.unwrap_or_default(),
                    to_user: t.to_user_account.unwrap_or_default(),
                    lamports: t.amount.unwrap_or(0),
                })
                .collect(),
        }
    }
}

/// Parse an enhanced-transactions array. Entries without a signature are dropped.
pub fn enhanced_transactions(context: &str, value: Value) -> Result<Vec<TransactionRecord>, UpstreamError> {
    if !value.is_array() {
        return Err(UpstreamError::malformed(context, "expected an array of transactions"));
    }
    let raw: Vec<RawEnhancedTransaction> =
        serde_json::from_value(value).map_err(|e| UpstreamError::malformed(context, e.to_string()))?;

    Ok(raw
        .into_iter()
        .map(TransactionRecord::from)
        .filter(|record| !record.signature.is_empty())
        .collect())
}

/// Numbers that the RPC encodes as decimal strings (`"amount": "1000"`)
fn u64_field(value: &Value) -> Option<u64> {
    match value {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_u64(),
        _ => None,
    }
}

fn ui_amount(token_amount: &Value) -> f64 {
    if let Some(ui) = token_amount.get("uiAmount").and_then(Value::as_f64) {
        return ui;
    }
    if let Some(ui) = token_amount
        .get("uiAmountString")
        .and_then(Value::as_str)
        .and_then(|s| s.parse::<f64>().ok())
    {
        return ui;
    }
    let raw = token_amount.get("amount").and_then(u64_field).unwrap_or(0);
    let decimals = token_amount.get("decimals").and_then(Value::as_u64).unwrap_or(0);
    raw as f64 / 10f64.powi(decimals as i32)
}

/// `getTokenSupply` result
pub fn token_supply(value: &Value) -> Result<TokenSupply, UpstreamError> {
    let inner = value
        .get("value")
        .ok_or_else(|| UpstreamError::malformed("getTokenSupply", "missing value"))?;
    let amount = inner
        .get("amount")
        .and_then(u64_field)
        .ok_or_else(|| UpstreamError::malformed("getTokenSupply", "missing amount"))?;
    let decimals = inner.get("decimals").and_then(Value::as_u64).unwrap_or(0) as u8;

    Ok(TokenSupply {
        amount,
        decimals,
        ui_amount: ui_amount(inner),
    })
}

/// Token account and whole-token balance from `getTokenLargestAccounts`
#[derive(Debug, Clone, PartialEq)]
pub struct LargestAccount {
    pub address: String,
    pub balance: f64,
}

pub fn largest_accounts(value: &Value) -> Result<Vec<LargestAccount>, UpstreamError> {
    let entries = value
        .get("value")
        .and_then(Value::as_array)
        .ok_or_else(|| UpstreamError::malformed("getTokenLargestAccounts", "expected value array"))?;

    Ok(entries
        .iter()
        .filter_map(|entry| {
            let address = entry.get("address")?.as_str()?.to_string();
            Some(LargestAccount {
                address,
                balance: ui_amount(entry),
            })
        })
        .collect())
}

/// Owners from a jsonParsed `getMultipleAccounts` result, positionally
/// aligned with the requested accounts. `None` where an account was missing
/// or not a parsed token account.
pub fn account_owners(value: &Value) -> Result<Vec<Option<String>>, UpstreamError> {
    let entries = value
        .get("value")
        .and_then(Value::as_array)
        .ok_or_else(|| UpstreamError::malformed("getMultipleAccounts", "expected value array"))?;

    Ok(entries
        .iter()
        .map(|entry| {
            entry
                .pointer("/data/parsed/info/owner")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .collect())
}

/// Token accounts from a jsonParsed `getTokenAccountsByOwner` result
pub fn token_accounts(value: &Value) -> Result<Vec<TokenAccountBalance>, UpstreamError> {
    let entries = value
        .get("value")
        .and_then(Value::as_array)
        .ok_or_else(|| UpstreamError::malformed("getTokenAccountsByOwner", "expected value array"))?;

    Ok(entries
        .iter()
        .filter_map(|entry| {
            let account = entry.get("pubkey")?.as_str()?.to_string();
            let info = entry.pointer("/account/data/parsed/info")?;
            Some(TokenAccountBalance {
                account,
                mint: info.get("mint").and_then(Value::as_str).unwrap_or_default().to_string(),
                balance: info.get("tokenAmount").map(ui_amount).unwrap_or(0.0),
            })
        })
        .collect())
}

/// Signatures from `getSignaturesForAddress`, skipping failed transactions
pub fn signatures(value: &Value) -> Result<Vec<String>, UpstreamError> {
    let entries = value
        .as_array()
        .ok_or_else(|| UpstreamError::malformed("getSignaturesForAddress", "expected an array"))?;

    Ok(entries
        .iter()
        .filter(|entry| entry.get("err").map_or(true, Value::is_null))
        .filter_map(|entry| entry.get("signature")?.as_str().map(str::to_string))
        .collect())
}

fn first_str<'a>(value: &'a Value, pointers: &[&str]) -> Option<&'a str> {
    pointers
        .iter()
        .filter_map(|p| value.pointer(p).and_then(Value::as_str))
        .find(|s| !s.trim().is_empty())
}

/// Merge metadata sources: off-chain JSON, then on-chain metadata, then the
/// legacy token list, then the configured defaults.
pub fn token_metadata(value: &Value, token: &TokenConfig) -> Result<TokenMetadata, UpstreamError> {
    let entry = match value {
        Value::Array(items) => items
            .first()
            .ok_or_else(|| UpstreamError::malformed("token-metadata", "empty response"))?,
        Value::Object(_) => value,
        _ => return Err(UpstreamError::malformed("token-metadata", "expected array or object")),
    };

    let name = first_str(
        entry,
        &[
            "/offChainMetadata/metadata/name",
            "/onChainMetadata/metadata/data/name",
            "/legacyMetadata/name",
        ],
    )
    .unwrap_or(&token.name);
    let symbol = first_str(
        entry,
        &[
            "/offChainMetadata/metadata/symbol",
            "/onChainMetadata/metadata/data/symbol",
            "/legacyMetadata/symbol",
        ],
    )
    .unwrap_or(&token.symbol);
    let image = first_str(entry, &["/offChainMetadata/metadata/image", "/legacyMetadata/logoURI"]).unwrap_or("");
    let description = first_str(entry, &["/offChainMetadata/metadata/description"]).unwrap_or("");
    let decimals = entry
        .pointer("/onChainAccountInfo/accountInfo/data/parsed/info/decimals")
        .or_else(|| entry.pointer("/legacyMetadata/decimals"))
        .and_then(Value::as_u64)
        .map(|d| d as u8)
        .unwrap_or(token.decimals);

    Ok(TokenMetadata {
        mint: token.mint.clone(),
        // On-chain names are NUL padded to a fixed width.
        name: name.trim_end_matches('\0').trim().to_string(),
        symbol: symbol.trim_end_matches('\0').trim().to_string(),
        image: image.to_string(),
        description: description.to_string(),
        decimals,
    })
}

/// Metadata made only of configured values
pub fn default_metadata(token: &TokenConfig) -> TokenMetadata {
    TokenMetadata {
        mint: token.mint.clone(),
        name: token.name.clone(),
        symbol: token.symbol.clone(),
        image: String::new(),
        description: String::new(),
        decimals: token.decimals,
    }
}

/// `outAmount` of a quote, scaled by the output mint's decimals
pub fn quote_out_amount(value: &Value, out_decimals: u8) -> Result<f64, UpstreamError> {
    let raw = value
        .get("outAmount")
        .and_then(u64_field)
        .ok_or_else(|| UpstreamError::malformed("quote", "missing outAmount"))?;
    Ok(raw as f64 / 10f64.powi(out_decimals as i32))
}

fn account_keys(tx: &Value) -> Vec<String> {
    tx.pointer("/transaction/message/accountKeys")
        .and_then(Value::as_array)
        .map(|keys| {
            keys.iter()
                .filter_map(|k| match k {
                    Value::String(s) => Some(s.clone()),
                    other => other.get("pubkey").and_then(Value::as_str).map(str::to_string),
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Per (owner, mint) ui balances from a pre/post token balance list
fn token_balances(tx: &Value, field: &str, keys: &[String]) -> HashMap<(String, String), f64> {
    let mut balances = HashMap::new();
    let Some(entries) = tx.pointer(&format!("/meta/{}", field)).and_then(Value::as_array) else {
        return balances;
    };
    for entry in entries {
        let Some(mint) = entry.get("mint").and_then(Value::as_str) else {
            continue;
        };
        let owner = entry
            .get("owner")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| {
                let index = entry.get("accountIndex")?.as_u64()? as usize;
                keys.get(index).cloned()
            })
            .unwrap_or_default();
        let amount = entry.get("uiTokenAmount").map(ui_amount).unwrap_or(0.0);
        *balances.entry((owner, mint.to_string())).or_insert(0.0) += amount;
    }
    balances
}

/// Rebuild a basic record from a jsonParsed `getTransaction` result.
///
/// Token movements are inferred from pre/post token balances: per mint the
/// largest sender is paired with each receiver. Returns `None` for missing
/// or failed transactions.
pub fn basic_transaction(signature: &str, tx: &Value, tracked_mint: &str) -> Option<TransactionRecord> {
    if tx.is_null() {
        return None;
    }
    if tx.pointer("/meta/err").is_some_and(|e| !e.is_null()) {
        return None;
    }

    let keys = account_keys(tx);
    let pre = token_balances(tx, "preTokenBalances", &keys);
    let post = token_balances(tx, "postTokenBalances", &keys);

    let mut deltas: HashMap<String, Vec<(String, f64)>> = HashMap::new();
    let mut seen: Vec<&(String, String)> = pre.keys().chain(post.keys()).collect();
    seen.sort();
    seen.dedup();
    for key in seen {
        let delta = post.get(key).copied().unwrap_or(0.0) - pre.get(key).copied().unwrap_or(0.0);
        if delta.abs() > f64::EPSILON {
            deltas.entry(key.1.clone()).or_default().push((key.0.clone(), delta));
        }
    }

    let mut mints: Vec<&String> = deltas.keys().collect();
    mints.sort_by_key(|m| (m.as_str() != tracked_mint, m.to_string()));

    let mut token_transfers = Vec::new();
    for mint in mints {
        let changes = &deltas[mint];
        let sender = changes
            .iter()
            .filter(|(_, d)| *d < 0.0)
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(owner, _)| owner.clone())
            .unwrap_or_default();
        for (owner, delta) in changes.iter().filter(|(_, d)| *d > 0.0) {
            token_transfers.push(TokenTransfer {
                from_user: sender.clone(),
                to_user: owner.clone(),
                mint: mint.clone(),
                amount: *delta,
            });
        }
    }

    let kind = if token_transfers.is_empty() {
        TransactionKind::Unknown
    } else {
        TransactionKind::Transfer
    };
    let description = token_transfers
        .first()
        .map(|t| format!("{} transferred {} {} to {}", t.from_user, t.amount, t.mint, t.to_user))
        .unwrap_or_default();

    Some(TransactionRecord {
        signature: signature.to_string(),
        timestamp: tx.get("blockTime").and_then(Value::as_i64).unwrap_or(0),
        fee: tx.pointer("/meta/fee").and_then(Value::as_u64).unwrap_or(0),
        fee_payer: keys.first().cloned().unwrap_or_default(),
        kind,
        source: RPC_FALLBACK_SOURCE.to_string(),
        description,
        token_transfers,
        native_transfers: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_enhanced_defaults_missing_fields() {
        let records = enhanced_transactions(
            "test",
            json!([
                {
                    "signature": "sig1",
                    "timestamp": 1700000000,
                    "type": "SWAP",
                    "description": "a swapped b",
                    "tokenTransfers": [
                        {"fromUserAccount": "a", "toUserAccount": "b", "mint": "m", "tokenAmount": 2.5}
                    ],
                    "nativeTransfers": null
                },
                {"timestamp": 1}
            ]),
        )
        .unwrap();

        assert_eq!(records.len(), 1);
        let tx = &records[0];
        assert_eq!(tx.kind, TransactionKind::Swap);
        assert_eq!(tx.fee, 0);
        assert_eq!(tx.fee_payer, "");
        assert_eq!(tx.token_transfers[0].amount, 2.5);
        assert!(tx.native_transfers.is_empty());
    }

    #[test]
    fn test_enhanced_rejects_non_array() {
        assert!(matches!(
            enhanced_transactions("test", json!({"error": "nope"})),
            Err(UpstreamError::Malformed { .. })
        ));
    }

    #[test]
    fn test_supply_string_amount() {
        let supply = token_supply(&json!({
            "context": {"slot": 1},
            "value": {"amount": "100000000000000", "decimals": 6, "uiAmount": 100000000.0}
        }))
        .unwrap();
        assert_eq!(supply.amount, 100_000_000_000_000);
        assert_eq!(supply.decimals, 6);
        assert_eq!(supply.whole_tokens(), 100_000_000.0);
    }

    #[test]
    fn test_owners_align_with_request() {
        let owners = account_owners(&json!({
            "value": [
                {"data": {"parsed": {"info": {"owner": "ownerA"}}}},
                null,
                {"data": ["base64data", "base64"]}
            ]
        }))
        .unwrap();
        assert_eq!(owners, vec![Some("ownerA".to_string()), None, None]);
    }

    #[test]
    fn test_metadata_precedence() {
        let token = TokenConfig::default();
        let meta = token_metadata(
            &json!([{
                "onChainMetadata": {"metadata": {"data": {"name": "Chain Name\u{0}\u{0}", "symbol": "CHN"}}},
                "offChainMetadata": {"metadata": {"name": "", "image": "https://img"}},
                "legacyMetadata": {"symbol": "LEG", "decimals": 4}
            }]),
            &token,
        )
        .unwrap();
        assert_eq!(meta.name, "Chain Name");
        assert_eq!(meta.symbol, "CHN");
        assert_eq!(meta.image, "https://img");
        assert_eq!(meta.decimals, 4);
    }

    #[test]
    fn test_metadata_falls_back_to_config() {
        let token = TokenConfig::default();
        let meta = token_metadata(&json!([{}]), &token).unwrap();
        assert_eq!(meta, default_metadata(&token));
    }

    #[test]
    fn test_signatures_skip_failed() {
        let sigs = signatures(&json!([
            {"signature": "ok1", "err": null},
            {"signature": "bad", "err": {"InstructionError": [0, "Custom"]}},
            {"signature": "ok2"}
        ]))
        .unwrap();
        assert_eq!(sigs, vec!["ok1", "ok2"]);
    }

    #[test]
    fn test_basic_transaction_from_balance_diff() {
        let tx = json!({
            "blockTime": 1700000100,
            "meta": {
                "err": null,
                "fee": 5000,
                "preTokenBalances": [
                    {"accountIndex": 1, "mint": "M", "owner": "alice", "uiTokenAmount": {"uiAmount": 10.0}},
                    {"accountIndex": 2, "mint": "M", "owner": "bob", "uiTokenAmount": {"uiAmount": 1.0}}
                ],
                "postTokenBalances": [
                    {"accountIndex": 1, "mint": "M", "owner": "alice", "uiTokenAmount": {"uiAmount": 6.0}},
                    {"accountIndex": 2, "mint": "M", "owner": "bob", "uiTokenAmount": {"uiAmount": 5.0}}
                ]
            },
            "transaction": {"message": {"accountKeys": [{"pubkey": "alice"}, {"pubkey": "ataA"}, {"pubkey": "ataB"}]}}
        });

        let record = basic_transaction("sigX", &tx, "M").unwrap();
        assert_eq!(record.fee_payer, "alice");
        assert_eq!(record.fee, 5000);
        assert_eq!(record.kind, TransactionKind::Transfer);
        assert_eq!(record.source, RPC_FALLBACK_SOURCE);
        assert_eq!(record.token_transfers.len(), 1);
        assert_eq!(record.token_transfers[0].from_user, "alice");
        assert_eq!(record.token_transfers[0].to_user, "bob");
        assert!((record.token_transfers[0].amount - 4.0).abs() < 1e-9);
        assert!(record.is_meaningful());
    }

    #[test]
    fn test_basic_transaction_skips_failed() {
        assert!(basic_transaction("s", &json!({"meta": {"err": {"x": 1}}}), "M").is_none());
        assert!(basic_transaction("s", &Value::Null, "M").is_none());
    }

    #[test]
    fn test_quote_scaling() {
        let rate = quote_out_amount(&json!({"inAmount": "1000000000", "outAmount": "152340000"}), 6).unwrap();
        assert!((rate - 152.34).abs() < 1e-9);
    }
}
