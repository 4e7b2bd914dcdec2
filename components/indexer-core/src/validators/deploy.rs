use rust_decimal::Decimal;
use std::str::FromStr;

use crate::models::{Deploy, DeployContent};
use crate::validators::Validated;

/// Enforces the deploy schema (spec 4.5): `p`/`op` tags, non-empty id/name,
/// a positive integer `max`, a positive decimal `price` with at most 8
/// fractional digits, non-empty deployer address, and positive
/// block height/timestamp/position. `source_id` is set equal to the
/// inscription's own id, per the deploy row's self-reference invariant
/// (spec 3).
pub fn validate_deploy(
    content: &DeployContent,
    inscription_id: &str,
    deployer_address: &str,
    block_height: u64,
    timestamp: i64,
    position: u32,
) -> Validated<Deploy> {
    if content.p != "brc-420" {
        return Validated::Skipped(format!("unexpected protocol tag {}", content.p));
    }
    if content.op != "deploy" {
        return Validated::Skipped(format!("unexpected op {}", content.op));
    }
    if content.id.is_empty() {
        return Validated::Skipped("empty content id".to_string());
    }
    if content.name.is_empty() {
        return Validated::Skipped("empty name".to_string());
    }
    if inscription_id.is_empty() {
        return Validated::Skipped("empty inscription id".to_string());
    }
    if deployer_address.is_empty() {
        return Validated::Skipped("empty deployer address".to_string());
    }
    if block_height == 0 {
        return Validated::Skipped("non-positive block height".to_string());
    }
    if timestamp <= 0 {
        return Validated::Skipped("non-positive timestamp".to_string());
    }
    if position == 0 {
        return Validated::Skipped("non-positive position".to_string());
    }

    let max = match value_as_i64(&content.max) {
        Some(m) if m > 0 => m,
        _ => return Validated::Skipped(format!("max must be a positive integer, got {:?}", content.max)),
    };

    let price = match value_as_decimal(&content.price) {
        Some(p) if p > Decimal::ZERO && p.scale() <= 8 => p,
        Some(p) => return Validated::Skipped(format!("price {p} has more than 8 fractional digits")),
        None => return Validated::Skipped(format!("price must be a positive decimal, got {:?}", content.price)),
    };

    Validated::Accepted(Deploy {
        id: inscription_id.to_string(),
        p: content.p.clone(),
        op: content.op.clone(),
        name: content.name.clone(),
        max,
        price,
        deployer_address: deployer_address.to_string(),
        block_height,
        timestamp,
        source_id: inscription_id.to_string(),
        position,
        mint_count: 0,
        wallet: None,
        updated_at: None,
    })
}

fn value_as_i64(value: &serde_json::Value) -> Option<i64> {
    match value {
        serde_json::Value::Number(n) => n.as_i64().or_else(|| n.to_string().parse().ok()),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn value_as_decimal(value: &serde_json::Value) -> Option<Decimal> {
    match value {
        serde_json::Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
        serde_json::Value::String(s) => Decimal::from_str(s).ok(),
        _ => None,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use test_case::test_case;

    fn content(max: &str, price: &str) -> DeployContent {
        DeployContent {
            p: "brc-420".to_string(),
            op: "deploy".to_string(),
            id: "sourcei0".to_string(),
            name: "Test".to_string(),
            max: serde_json::Value::String(max.to_string()),
            price: serde_json::Value::String(price.to_string()),
        }
    }

    #[test]
    fn accepts_well_formed_deploy() {
        let result = validate_deploy(&content("100", "0.00012345"), "abci0", "bc1deployer", 1, 1, 1);
        match result {
            Validated::Accepted(deploy) => {
                assert_eq!(deploy.id, "abci0");
                assert_eq!(deploy.source_id, "abci0");
                assert_eq!(deploy.max, 100);
            }
            Validated::Skipped(reason) => panic!("unexpected skip: {reason}"),
        }
    }

    #[test_case("0", "0.01" ; "zero max")]
    #[test_case("-5", "0.01" ; "negative max")]
    #[test_case("not_a_number", "0.01" ; "non numeric max")]
    fn rejects_invalid_max(max: &str, price: &str) {
        assert!(matches!(
            validate_deploy(&content(max, price), "abci0", "bc1deployer", 1, 1, 1),
            Validated::Skipped(_)
        ));
    }

    #[test]
    fn rejects_price_with_too_many_fractional_digits() {
        assert!(matches!(
            validate_deploy(&content("100", "0.000000001"), "abci0", "bc1deployer", 1, 1, 1),
            Validated::Skipped(_)
        ));
    }

    #[test]
    fn rejects_zero_price() {
        assert!(matches!(
            validate_deploy(&content("100", "0"), "abci0", "bc1deployer", 1, 1, 1),
            Validated::Skipped(_)
        ));
    }

    #[test]
    fn rejects_empty_deployer_address() {
        assert!(matches!(
            validate_deploy(&content("100", "0.01"), "abci0", "", 1, 1, 1),
            Validated::Skipped(_)
        ));
    }
}
