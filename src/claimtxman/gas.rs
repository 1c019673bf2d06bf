//! Gas price escalation for replacement claim transactions.

/// `price` increased by `percent`, rounded up and always strictly higher than `price`.
pub fn bump_gas_price(price: u128, percent: u64) -> u128 {
	let increase = price.saturating_mul(u128::from(percent)).div_ceil(100).max(1);
	price.saturating_add(increase)
}

/// Gas price for the next build: the node's suggestion, but never below the bumped price of the
/// previous build, and never above `cap`.
pub fn next_gas_price(
	suggested: u128,
	previous: Option<u128>,
	percent: u64,
	cap: Option<u128>,
) -> u128 {
	let price = match previous {
		Some(previous) => suggested.max(bump_gas_price(previous, percent)),
		None => suggested,
	};
	cap.map_or(price, |cap| price.min(cap))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_bump_rounds_up() {
		assert_eq!(bump_gas_price(1_000, 20), 1_200);
		assert_eq!(bump_gas_price(1_001, 10), 1_102);
		assert_eq!(bump_gas_price(5, 0), 6);
		assert_eq!(bump_gas_price(0, 50), 1);
		assert_eq!(bump_gas_price(u128::MAX, 20), u128::MAX);
	}

	#[test]
	fn test_next_price_never_below_bumped_previous() {
		assert_eq!(next_gas_price(1_000, None, 20, None), 1_000);
		assert_eq!(next_gas_price(1_000, Some(1_000), 20, None), 1_200);
		assert_eq!(next_gas_price(5_000, Some(1_000), 20, None), 5_000);
	}

	#[test]
	fn test_cap_bounds_escalation() {
		assert_eq!(next_gas_price(1_000, Some(1_200), 20, Some(1_300)), 1_300);
		assert_eq!(next_gas_price(9_000, None, 20, Some(1_300)), 1_300);
		assert_eq!(next_gas_price(1_000, None, 20, Some(1_300)), 1_000);
	}
}
