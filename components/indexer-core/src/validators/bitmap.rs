use crate::models::Bitmap;
use crate::validators::Validated;

/// Enforces the bitmap schema plus the chain-height sanity and uniqueness
/// invariants (spec 4.5). `already_claimed` is resolved by the caller via a
/// store lookup so this function stays a pure predicate over its inputs.
pub fn validate_bitmap(
    number: u64,
    content: &str,
    inscription_id: &str,
    block_height: u64,
    address: &str,
    position: u32,
    already_claimed: bool,
) -> Validated<Bitmap> {
    if inscription_id.is_empty() {
        return Validated::Skipped("empty inscription id".to_string());
    }
    if address.is_empty() {
        return Validated::Skipped("empty holder address".to_string());
    }
    if block_height == 0 {
        return Validated::Skipped("non-positive block height".to_string());
    }
    if position == 0 {
        return Validated::Skipped("non-positive position".to_string());
    }
    if number > block_height {
        return Validated::Skipped(format!(
            "bitmap {number} claims a future block (current height {block_height})"
        ));
    }
    if already_claimed {
        return Validated::Skipped(format!("bitmap {number} already claimed"));
    }

    Validated::Accepted(Bitmap {
        inscription_id: inscription_id.to_string(),
        block_height,
        bitmap_number: number,
        address: address.to_string(),
        content: content.to_string(),
        position,
        previous_address: None,
        address_update_block: None,
        address_update_timestamp: None,
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn accepts_bitmap_claiming_its_own_or_earlier_block() {
        let result = validate_bitmap(100, "100.bitmap", "abci0", 100, "bc1holder", 1, false);
        assert!(matches!(result, Validated::Accepted(_)));
    }

    #[test]
    fn rejects_bitmap_claiming_a_future_block() {
        let result = validate_bitmap(101, "101.bitmap", "abci0", 100, "bc1holder", 1, false);
        assert!(matches!(result, Validated::Skipped(_)));
    }

    #[test]
    fn rejects_duplicate_bitmap_number() {
        let result = validate_bitmap(100, "100.bitmap", "abci0", 100, "bc1holder", 1, true);
        assert!(matches!(result, Validated::Skipped(_)));
    }

    #[test]
    fn rejects_empty_address() {
        let result = validate_bitmap(100, "100.bitmap", "abci0", 100, "", 1, false);
        assert!(matches!(result, Validated::Skipped(_)));
    }
}
