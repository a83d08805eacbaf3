use alloy_primitives::utils::Unit;
use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

/// An ERC20 asset held by a pool and priced by the oracle.
///
/// Assets are referenced by pools and by the price sampler but owned by neither;
/// identity is the token address only.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Asset {
    address: Address,
    decimals: u8,
}

impl Hash for Asset {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address.hash(state)
    }
}

impl PartialEq for Asset {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl Eq for Asset {}

impl Ord for Asset {
    fn cmp(&self, other: &Self) -> Ordering {
        self.address.cmp(&other.address)
    }
}

impl PartialOrd for Asset {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Asset {
    pub fn new(address: Address, decimals: u8) -> Asset {
        Asset { address, decimals }
    }

    // For testing purposes
    pub fn repeat_byte(byte: u8) -> Asset {
        Asset::new(Address::repeat_byte(byte), 18)
    }

    pub fn get_address(&self) -> Address {
        self.address
    }

    pub fn get_decimals(&self) -> u8 {
        self.decimals
    }

    /// `10^decimals`, the raw amount of one whole unit.
    pub fn get_exp(&self) -> U256 {
        if self.decimals == 18 { Unit::ETHER.wei() } else { U256::from(10).pow(U256::from(self.decimals)) }
    }

    pub fn to_float(&self, value: U256) -> f64 {
        let (div, rem) = value.div_rem(self.get_exp());
        match (u64::try_from(div), u64::try_from(rem)) {
            (Ok(div), Ok(rem)) => div as f64 + (rem as f64) / 10f64.powi(self.decimals as i32),
            _ => f64::MAX,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_identity_is_address_only() {
        let a = Asset::new(Address::repeat_byte(0xaa), 6);
        let b = Asset::new(Address::repeat_byte(0xaa), 18);
        assert_eq!(a, b);
    }

    #[test]
    fn test_to_float() {
        let usdc = Asset::new(Address::repeat_byte(0x01), 6);
        assert_eq!(usdc.get_exp(), U256::from(1_000_000u64));
        assert_eq!(usdc.to_float(U256::from(2_500_000u64)), 2.5);

        let weth = Asset::repeat_byte(0x02);
        assert_eq!(weth.to_float(Unit::ETHER.wei()), 1.0);
    }

    #[test]
    fn test_serialize() {
        let asset = Asset::new(Address::repeat_byte(0x11), 6);
        let serialized = serde_json::to_string(&asset).unwrap();
        assert_eq!(serialized, "{\"address\":\"0x1111111111111111111111111111111111111111\",\"decimals\":6}");
    }
}
