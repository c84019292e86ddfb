use std::{fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::AddressError;

/// 8-byte 1-Wire ROM code: family byte, 48-bit serial, CRC-8.
///
/// Serialised everywhere as 16 uppercase hex digits with no separators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct DeviceAddress([u8; 8]);

impl DeviceAddress {
    pub const UNSET: Self = Self([0; 8]);

    pub const fn new(bytes: [u8; 8]) -> Self {
        Self(bytes)
    }

    /// Builds an address from family code and serial, filling in the CRC byte.
    pub fn from_parts(family: u8, serial: [u8; 6]) -> Self {
        let mut bytes = [0_u8; 8];
        bytes[0] = family;
        bytes[1..7].copy_from_slice(&serial);
        bytes[7] = crc8(&bytes[..7]);
        Self(bytes)
    }

    pub fn bytes(&self) -> &[u8; 8] {
        &self.0
    }

    pub fn family_code(&self) -> u8 {
        self.0[0]
    }

    pub fn is_unset(&self) -> bool {
        self.0 == [0; 8]
    }

    pub fn is_valid(&self) -> bool {
        !self.is_unset() && crc8(&self.0[..7]) == self.0[7]
    }

    pub fn to_hex(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02X}")?;
        }
        Ok(())
    }
}

impl FromStr for DeviceAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 16 {
            return Err(AddressError::Length(s.len()));
        }
        if let Some(bad) = s.chars().find(|c| !c.is_ascii_hexdigit()) {
            return Err(AddressError::InvalidDigit(bad));
        }

        let mut bytes = [0_u8; 8];
        for (index, byte) in bytes.iter_mut().enumerate() {
            let pair = &s[index * 2..index * 2 + 2];
            *byte = u8::from_str_radix(pair, 16).map_err(|_| AddressError::InvalidDigit('?'))?;
        }
        Ok(Self(bytes))
    }
}

impl Serialize for DeviceAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DeviceAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Dallas/Maxim CRC-8 (polynomial x^8 + x^5 + x^4 + 1, reflected).
pub fn crc8(data: &[u8]) -> u8 {
    let mut crc = 0_u8;
    for &byte in data {
        let mut value = byte;
        for _ in 0..8 {
            let mix = (crc ^ value) & 0x01;
            crc >>= 1;
            if mix != 0 {
                crc ^= 0x8C;
            }
            value >>= 1;
        }
    }
    crc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_as_uppercase_hex() {
        let address = DeviceAddress::new([0x28, 0xff, 0x64, 0x1e, 0x0f, 0x16, 0x03, 0xab]);
        assert_eq!(address.to_string(), "28FF641E0F1603AB");
    }

    #[test]
    fn parses_either_case() {
        let upper: DeviceAddress = "28FF641E0F1603AB".parse().unwrap();
        let lower: DeviceAddress = "28ff641e0f1603ab".parse().unwrap();
        assert_eq!(upper, lower);
        assert_eq!(lower.to_string(), "28FF641E0F1603AB");
    }

    #[test]
    fn rejects_bad_input() {
        assert_eq!(
            "28FF".parse::<DeviceAddress>(),
            Err(AddressError::Length(4))
        );
        assert_eq!(
            "28:F641E0F1603AB".parse::<DeviceAddress>(),
            Err(AddressError::InvalidDigit(':'))
        );
    }

    #[test]
    fn crc_matches_known_rom_code() {
        // ROM code from the DS18B20 datasheet CRC example.
        let rom = [0x02, 0x1C, 0xB8, 0x01, 0x00, 0x00, 0x00];
        assert_eq!(crc8(&rom), 0xA2);
    }

    #[test]
    fn validity_checks_crc_and_zero() {
        let good = DeviceAddress::from_parts(0x28, [1, 2, 3, 4, 5, 6]);
        assert!(good.is_valid());

        let mut bytes = *good.bytes();
        bytes[7] ^= 0xFF;
        assert!(!DeviceAddress::new(bytes).is_valid());
        assert!(!DeviceAddress::UNSET.is_valid());
    }
}
