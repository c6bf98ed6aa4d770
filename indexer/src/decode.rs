//! Transaction-decode sub-rules (spec.md §4.4.3). All decoding here is best-effort: a raw body
//! that does not fit the expected shape never fails the block, it falls back to the documented
//! defaults.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use indexer_common::domain::{DexLiquidity, DexSwap, Event, LiquidityAction, OraclePrice};
use log::warn;
use sha2::{Digest, Sha256};
use sqlx::types::chrono::{DateTime, Utc};

/// Transaction hash is not returned by `GetBlock`; the node identifies transactions by the hex
/// SHA-256 digest of their raw (base64-decoded) bytes, the standard Tendermint convention.
pub fn tx_hash(raw_tx: &str) -> String {
    let bytes = STANDARD.decode(raw_tx).unwrap_or_default();
    let digest = Sha256::digest(&bytes);
    hex::encode_upper(digest)
}

/// The message-type, sender and fee, decoded from a transaction's opaque raw body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedEnvelope {
    pub r#type: String,
    pub sender: String,
    pub fee_amount: String,
    pub fee_denom: String,
}

/// Decodes `raw_tx` (base64 of a JSON envelope) per §4.4.3: `type` is
/// `body.messages[0]["@type"]` verbatim; `sender` is the first present of
/// `body.messages[0].from_address` or `.sender`; fee is `auth_info.fee.amount[0]`. Any failure
/// to base64-decode or parse falls back to `type="unknown"`, empty sender and fee.
pub fn decode_envelope(raw_tx: &str) -> DecodedEnvelope {
    let fallback = DecodedEnvelope {
        r#type: "unknown".to_string(),
        sender: String::new(),
        fee_amount: String::new(),
        fee_denom: String::new(),
    };

    let Ok(bytes) = STANDARD.decode(raw_tx) else {
        return fallback;
    };

    let Ok(body) = serde_json::from_slice::<serde_json::Value>(&bytes) else {
        return fallback;
    };

    let r#type = body
        .pointer("/body/messages/0/@type")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .to_string();

    let sender = body
        .pointer("/body/messages/0/from_address")
        .or_else(|| body.pointer("/body/messages/0/sender"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    let fee_amount = body
        .pointer("/auth_info/fee/amount/0/amount")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    let fee_denom = body
        .pointer("/auth_info/fee/amount/0/denom")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    DecodedEnvelope {
        r#type,
        sender,
        fee_amount,
        fee_denom,
    }
}

/// The transaction's decoded `body.messages` array, or an empty array if `raw_tx` does not
/// decode to the expected shape.
pub fn messages_json(raw_tx: &str) -> serde_json::Value {
    STANDARD
        .decode(raw_tx)
        .ok()
        .and_then(|bytes| serde_json::from_slice::<serde_json::Value>(&bytes).ok())
        .and_then(|body| body.pointer("/body/messages").cloned())
        .unwrap_or(serde_json::Value::Array(Vec::new()))
}

/// Parses a numeric string field, defaulting to zero and logging a warning on overflow or
/// malformed input rather than failing the block (spec.md §4.4.3, §9).
pub fn parse_i64_or_zero(field: &'static str, raw: &str) -> i64 {
    match raw.parse() {
        Ok(value) => value,

        Err(error) => {
            warn!(field, raw, error:%; "numeric field overflowed or malformed, defaulting to zero");
            0
        }
    }
}

fn attribute<'a>(event: &'a Event, key: &str) -> &'a str {
    event
        .attributes
        .iter()
        .find(|attribute| attribute.key == key)
        .map(|attribute| attribute.value.as_str())
        .unwrap_or("")
}

pub fn dex_swap_from_event(event: &Event, time: DateTime<Utc>) -> DexSwap {
    DexSwap {
        tx_hash: event.tx_hash.clone(),
        event_index: event.event_index,
        pool_id: attribute(event, "pool_id").to_string(),
        sender: attribute(event, "sender").to_string(),
        token_in: attribute(event, "token_in").to_string(),
        token_out: attribute(event, "token_out").to_string(),
        amount_in: attribute(event, "amount_in").to_string(),
        amount_out: attribute(event, "amount_out").to_string(),
        price: attribute(event, "price").to_string(),
        fee: attribute(event, "fee").to_string(),
        time,
    }
}

pub fn dex_liquidity_from_event(
    event: &Event,
    action: LiquidityAction,
    time: DateTime<Utc>,
) -> DexLiquidity {
    DexLiquidity {
        tx_hash: event.tx_hash.clone(),
        event_index: event.event_index,
        pool_id: attribute(event, "pool_id").to_string(),
        sender: attribute(event, "sender").to_string(),
        action,
        token_a: attribute(event, "token_a").to_string(),
        token_b: attribute(event, "token_b").to_string(),
        amount_a: attribute(event, "amount_a").to_string(),
        amount_b: attribute(event, "amount_b").to_string(),
        time,
    }
}

pub fn oracle_price_from_event(event: &Event, time: DateTime<Utc>) -> OraclePrice {
    OraclePrice {
        tx_hash: event.tx_hash.clone(),
        event_index: event.event_index,
        asset: attribute(event, "asset").to_string(),
        price: attribute(event, "price").to_string(),
        timestamp: time,
        block_height: event.block_height,
        source: attribute(event, "source").to_string(),
    }
}

/// Parses an RFC 3339 timestamp, defaulting to the Unix epoch and logging a warning on failure
/// rather than rejecting the block.
pub fn parse_time(raw: &str) -> DateTime<Utc> {
    raw.parse().unwrap_or_else(|error| {
        warn!(raw, error:%; "malformed timestamp, defaulting to epoch");
        DateTime::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope_json(value: serde_json::Value) -> String {
        STANDARD.encode(value.to_string())
    }

    #[test]
    fn decodes_type_and_sender_from_address() {
        let raw = envelope_json(serde_json::json!({
            "body": { "messages": [{ "@type": "/cosmos.bank.v1beta1.MsgSend", "from_address": "addr1" }] },
            "auth_info": { "fee": { "amount": [{ "amount": "100", "denom": "utoken" }] } },
        }));

        let decoded = decode_envelope(&raw);
        assert_eq!(decoded.r#type, "/cosmos.bank.v1beta1.MsgSend");
        assert_eq!(decoded.sender, "addr1");
        assert_eq!(decoded.fee_amount, "100");
        assert_eq!(decoded.fee_denom, "utoken");
    }

    #[test]
    fn falls_back_to_sender_field_when_from_address_absent() {
        let raw = envelope_json(serde_json::json!({
            "body": { "messages": [{ "@type": "/dex.MsgSwap", "sender": "addr2" }] },
        }));

        let decoded = decode_envelope(&raw);
        assert_eq!(decoded.sender, "addr2");
    }

    #[test]
    fn undecodable_body_yields_unknown_and_empty_fields() {
        let decoded = decode_envelope("not valid base64!!!");
        assert_eq!(decoded.r#type, "unknown");
        assert_eq!(decoded.sender, "");
        assert_eq!(decoded.fee_amount, "");
        assert_eq!(decoded.fee_denom, "");
    }

    #[test]
    fn missing_fee_fields_default_to_empty_strings() {
        let raw = envelope_json(serde_json::json!({
            "body": { "messages": [{ "@type": "/dex.MsgSwap" }] },
        }));

        let decoded = decode_envelope(&raw);
        assert_eq!(decoded.fee_amount, "");
        assert_eq!(decoded.fee_denom, "");
    }

    #[test]
    fn tx_hash_is_deterministic_and_stable_length() {
        let raw = STANDARD.encode("some transaction bytes");
        let hash = tx_hash(&raw);
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, tx_hash(&raw));
    }

    #[test]
    fn messages_json_extracts_body_messages() {
        let raw = envelope_json(serde_json::json!({
            "body": { "messages": [{ "@type": "/dex.MsgSwap" }] },
        }));

        let messages = messages_json(&raw);
        assert_eq!(messages, serde_json::json!([{ "@type": "/dex.MsgSwap" }]));
    }

    #[test]
    fn messages_json_falls_back_to_empty_array() {
        assert_eq!(messages_json("not valid base64!!!"), serde_json::json!([]));
    }

    #[test]
    fn numeric_overflow_defaults_to_zero() {
        assert_eq!(parse_i64_or_zero("gas_used", "99999999999999999999999"), 0);
        assert_eq!(parse_i64_or_zero("gas_used", "12345"), 12345);
    }
}
