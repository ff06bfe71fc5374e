use crate::claim::error::AddressError;
pub use alloy_primitives::Address;

const ADDRESS_HEX_LEN: usize = 40;

/// Parse a 20-byte account address, `0x` prefix optional.
///
/// All-lowercase and all-uppercase forms are taken as-is; a mixed-case form
/// must carry a valid EIP-55 checksum.
pub fn parse_address(s: &str) -> Result<Address, AddressError> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    if digits.len() != ADDRESS_HEX_LEN {
        return Err(AddressError::InvalidLength(digits.len()));
    }
    if !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(AddressError::InvalidHex);
    }

    let has_lower = digits.bytes().any(|b| b.is_ascii_lowercase());
    let has_upper = digits.bytes().any(|b| b.is_ascii_uppercase());
    if has_lower && has_upper {
        return Address::parse_checksummed(format!("0x{digits}"), None)
            .map_err(|_| AddressError::BadChecksum);
    }

    digits.parse().map_err(|_| AddressError::InvalidHex)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_checksummed() {
        let addr = parse_address("0xee67A313FA15595cd8D20C018a0d6C3765585589").unwrap();
        assert_eq!(
            addr.to_checksum(None),
            "0xee67A313FA15595cd8D20C018a0d6C3765585589"
        );
    }

    #[test]
    fn test_parse_lowercase_and_uppercase() {
        let lower = parse_address("0x3e11d657331c286624826ac797a974777be0e47f").unwrap();
        let upper = parse_address("3E11D657331C286624826AC797A974777BE0E47F").unwrap();
        assert_eq!(lower, upper);
        assert_eq!(
            lower.to_checksum(None),
            "0x3E11d657331c286624826ac797a974777be0e47F"
        );
    }

    #[test]
    fn test_parse_rejects_bad_checksum() {
        // Flip the case of one letter in a valid checksum address
        let result = parse_address("0xEe67A313FA15595cd8D20C018a0d6C3765585589");
        assert_eq!(result, Err(AddressError::BadChecksum));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert_eq!(parse_address("0x1234"), Err(AddressError::InvalidLength(4)));
        assert_eq!(
            parse_address(&format!("0x{}", "zz".repeat(20))),
            Err(AddressError::InvalidHex)
        );
        assert!(parse_address("").is_err());
    }

    #[test]
    fn test_display_is_checksum() {
        let addr = Address::ZERO;
        assert_eq!(addr.to_checksum(None), format!("0x{}", "0".repeat(40)));
    }
}
